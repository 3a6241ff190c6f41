//! # OPD存储模块
//!
//! 就诊记录、医嘱和出院小结的持久化接口。持久化存储本身是外部协作方，
//! 这里定义它必须满足的契约，并提供一个内存实现用于测试和演示。

pub mod directory;
pub mod memory;
pub mod models;
pub mod store;

// 重新导出主要类型
pub use directory::{InMemoryPatientDirectory, PatientDirectory};
pub use memory::InMemoryStore;
pub use models::*;
pub use store::RecordStore;
