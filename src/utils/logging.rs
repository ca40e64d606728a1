use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::EnvConfig;

/// 日志配置
pub struct LoggingConfig;

impl LoggingConfig {
    /// 初始化日志系统
    ///
    /// 支持通过环境变量配置：
    /// - RUST_LOG: 设置日志级别（error, warn, info, debug, trace）
    /// - FLOWSUB_DEBUG: 启用详细调试输出
    ///
    /// 使用示例：
    /// ```no_run
    /// use flowsub::utils::LoggingConfig;
    ///
    /// fn main() {
    ///     LoggingConfig::init();
    ///     // 现在可以使用 tracing 宏
    /// }
    /// ```
    pub fn init() {
        let is_debug = Self::is_debug();

        let env_filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => {
                if is_debug {
                    EnvFilter::new("flowsub=debug,info")
                } else {
                    EnvFilter::new("flowsub=info,warn")
                }
            }
        };

        let fmt_layer = if is_debug {
            fmt::layer()
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_thread_ids(true)
        } else {
            fmt::layer()
                .with_target(false)
                .with_file(false)
                .with_line_number(false)
                .with_thread_ids(false)
        };

        if let Err(err) = tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
        {
            eprintln!("flowsub: failed to install tracing subscriber: {err}");
            return;
        }

        if is_debug {
            tracing::debug!("调试模式已启用");
        }
    }

    /// 初始化日志系统（带自定义过滤器）
    pub fn init_with_filter(filter: &str) {
        if let Err(err) = Self::try_init_with_filter(filter) {
            eprintln!("flowsub: failed to install tracing subscriber: {err}");
        }
    }

    /// 全局 subscriber 已安装时返回错误
    pub fn try_init_with_filter(filter: &str) -> Result<(), TryInitError> {
        tracing_subscriber::registry()
            .with(EnvFilter::new(filter))
            .with(fmt::layer())
            .try_init()
    }

    /// 检查是否启用调试模式
    pub fn is_debug() -> bool {
        EnvConfig::is_debug_mode()
    }
}

/// 便捷宏：记录带上下文的错误
#[macro_export]
macro_rules! log_error {
    ($err:expr) => {
        tracing::error!(error = %$err, "错误发生")
    };
    ($err:expr, $($key:tt = $value:expr),+) => {
        tracing::error!(error = %$err, $($key = $value),+)
    };
}
