//! 通用工具函数

use crate::error::{OpdError, Result};

/// 规范化科室代码：去除空白并转为大写，仅允许 2-8 位字母数字
pub fn normalize_department_code(raw: &str) -> Result<String> {
    let code = raw.trim().to_ascii_uppercase();
    if code.len() < 2 || code.len() > 8 || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(OpdError::Validation(format!(
            "invalid department code: '{}'",
            raw
        )));
    }
    Ok(code)
}

/// 必填文本字段校验
pub fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(OpdError::Validation(format!("{} is required", field)));
    }
    Ok(())
}

/// 验证就诊号格式 OPD-<DEPT>-<YYYYMMDD>-<SEQ>
pub fn is_valid_token(token: &str) -> bool {
    let parts: Vec<&str> = token.split('-').collect();
    if parts.len() != 4 || parts[0] != "OPD" {
        return false;
    }
    normalize_department_code(parts[1]).map(|d| d == parts[1]).unwrap_or(false)
        && parts[2].len() == 8
        && parts[2].chars().all(|c| c.is_ascii_digit())
        && parts[3].len() >= 3
        && parts[3].chars().all(|c| c.is_ascii_digit())
}
