use crate::error::{FlowError, Result};
use std::env;
use std::str::FromStr;

/// 调试开关环境变量
pub const DEBUG_ENV: &str = "FLOWSUB_DEBUG";

/// 环境变量配置管理
pub struct EnvConfig;

impl EnvConfig {
    /// 获取可选的环境变量
    pub fn get_env_optional(key: &str) -> Option<String> {
        env::var(key).ok().filter(|value| !value.trim().is_empty())
    }

    /// 解析可选的环境变量，未设置时返回 None，格式错误时返回配置错误
    pub fn parse_env<T>(key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match Self::get_env_optional(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|err| FlowError::Config(format!("{key}={raw}: {err}"))),
        }
    }

    /// 解析布尔开关，接受 1/0/true/false/yes/no/on/off
    pub fn parse_flag(key: &str) -> Result<Option<bool>> {
        match Self::get_env_optional(key) {
            None => Ok(None),
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(Some(true)),
                "0" | "false" | "no" | "off" => Ok(Some(false)),
                _ => Err(FlowError::Config(format!("{key}={raw}: expected a boolean"))),
            },
        }
    }

    /// 检查是否启用调试模式
    pub fn is_debug_mode() -> bool {
        env::var(DEBUG_ENV).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_number() {
        env::set_var("FLOWSUB_TEST_NUMBER", "12");
        assert_eq!(EnvConfig::parse_env::<u32>("FLOWSUB_TEST_NUMBER").unwrap(), Some(12));
        env::set_var("FLOWSUB_TEST_NUMBER", "twelve");
        assert!(EnvConfig::parse_env::<u32>("FLOWSUB_TEST_NUMBER").is_err());
        env::remove_var("FLOWSUB_TEST_NUMBER");
        assert_eq!(EnvConfig::parse_env::<u32>("FLOWSUB_TEST_NUMBER").unwrap(), None);
    }

    #[test]
    fn test_parse_flag() {
        env::set_var("FLOWSUB_TEST_FLAG", "On");
        assert_eq!(EnvConfig::parse_flag("FLOWSUB_TEST_FLAG").unwrap(), Some(true));
        env::set_var("FLOWSUB_TEST_FLAG", "maybe");
        assert!(EnvConfig::parse_flag("FLOWSUB_TEST_FLAG").is_err());
        env::remove_var("FLOWSUB_TEST_FLAG");
    }
}
