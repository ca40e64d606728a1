use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};

use super::env::EnvConfig;

pub const MAX_NESTING_DEPTH_ENV: &str = "FLOWSUB_MAX_NESTING_DEPTH";
pub const WARN_DUPLICATE_START_ENV: &str = "FLOWSUB_WARN_DUPLICATE_START";

/// Flow Subsystem 配置
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubsystemConfig {
    /// 嵌套实例的最大深度，根实例深度为 0
    pub max_nesting_depth: u32,
    /// 重复启动时以 warn 而不是 debug 级别记录
    pub warn_on_duplicate_start: bool,
}

impl Default for SubsystemConfig {
    fn default() -> Self {
        Self {
            max_nesting_depth: 16,
            warn_on_duplicate_start: false,
        }
    }
}

impl SubsystemConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(raw).map_err(|err| FlowError::Config(err.to_string()))?;
        config.validate()
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|err| FlowError::Config(format!("{}: {err}", path.display())))?;
        Self::from_json_str(&raw)
    }

    /// 默认值叠加环境变量
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(depth) = EnvConfig::parse_env::<u32>(MAX_NESTING_DEPTH_ENV)? {
            self.max_nesting_depth = depth;
        }
        if let Some(flag) = EnvConfig::parse_flag(WARN_DUPLICATE_START_ENV)? {
            self.warn_on_duplicate_start = flag;
        }
        self.validate()
    }

    pub fn with_max_nesting_depth(mut self, depth: u32) -> Self {
        self.max_nesting_depth = depth;
        self
    }

    fn validate(self) -> Result<Self> {
        if self.max_nesting_depth == 0 {
            return Err(FlowError::Config(
                "max_nesting_depth must be at least 1".to_string(),
            ));
        }
        Ok(self)
    }
}
