//! # OPD Core
//!
//! 门诊就诊工作流的核心模块，提供就诊记录、临床医嘱、出院小结等数据结构、
//! 统一错误定义和通用工具。

pub mod error;
pub mod models;
pub mod utils;

pub use error::{OpdError, Result};
pub use models::*;
