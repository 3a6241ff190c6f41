//! 日志初始化

use crate::config::LoggingConfig;
use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 构造日志过滤器，命令行指定的级别优先于配置
pub fn build_filter(config: &LoggingConfig, level_override: Option<&str>) -> Result<EnvFilter> {
    let level = level_override.unwrap_or(&config.level);
    EnvFilter::try_new(level).with_context(|| format!("Invalid log filter: {}", level))
}

/// 初始化全局日志订阅器
pub fn init_logging(config: &LoggingConfig, level_override: Option<&str>) -> Result<()> {
    let filter = build_filter(config, level_override)?;
    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.format.as_str() {
        "full" => registry.with(fmt::layer().with_target(true)).try_init(),
        _ => registry.with(fmt::layer().compact().with_target(false)).try_init(),
    };

    result.context("Failed to install tracing subscriber")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_takes_precedence() {
        let config = LoggingConfig::default();
        let filter = build_filter(&config, Some("opd_workflow=debug")).unwrap();
        assert!(filter.to_string().contains("opd_workflow=debug"));

        let filter = build_filter(&config, None).unwrap();
        assert_eq!(filter.to_string(), "info");
    }

    #[test]
    fn test_invalid_filter_rejected() {
        let config = LoggingConfig {
            level: "opd=verbose".to_string(),
            format: "compact".to_string(),
        };
        assert!(build_filter(&config, None).is_err());
    }
}
