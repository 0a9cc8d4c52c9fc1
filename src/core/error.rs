//! 错误处理模块
//!
//! 定义了图形上下文中使用的统一错误类型。
//!
//! 本模块中的所有错误都被视为不可恢复的：设备创建失败、Fence 等待失败、
//! 设备丢失都会终止当前会话，调用方不应静默重试。
//! 描述符耗尽属于编程错误，直接 panic，不经过这里。

use std::fmt;

/// 统一的 Result 类型
pub type Result<T> = std::result::Result<T, DistGfxError>;

/// 图形上下文的错误类型
#[derive(Debug)]
pub enum DistGfxError {
    /// 配置错误
    Config(ConfigError),

    /// 图形 API 错误
    Graphics(GraphicsError),

    /// IO 错误
    Io(std::io::Error),

    /// 日志系统错误
    Log(String),

    /// 初始化错误
    Initialization(String),

    /// 运行时错误
    Runtime(String),
}

/// 配置相关的错误
#[derive(Debug)]
pub enum ConfigError {
    /// 配置文件未找到
    FileNotFound(String),

    /// 配置文件解析失败
    ParseError(String),

    /// 配置值无效
    InvalidValue { field: String, reason: String },
}

/// 图形 API 相关的错误
#[derive(Debug)]
pub enum GraphicsError {
    /// 设备创建失败
    DeviceCreation(String),

    /// 交换链错误
    SwapchainError(String),

    /// 资源创建失败
    ResourceCreation(String),

    /// 命令记录或提交失败
    CommandExecution(String),

    /// CPU 等待 Fence 失败
    FenceWait(String),

    /// GPU 设备已丢失，之后不能再产生任何帧
    DeviceRemoved(String),

    /// 上下文已经排空，不允许再开始新帧
    ContextDrained,
}

impl GraphicsError {
    /// 是否为终止性错误（设备丢失后上下文不可再用）
    pub fn is_device_lost(&self) -> bool {
        matches!(self, GraphicsError::DeviceRemoved(_))
    }
}

impl fmt::Display for DistGfxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistGfxError::Config(e) => write!(f, "Configuration error: {}", e),
            DistGfxError::Graphics(e) => write!(f, "Graphics error: {}", e),
            DistGfxError::Io(e) => write!(f, "IO error: {}", e),
            DistGfxError::Log(msg) => write!(f, "Log error: {}", msg),
            DistGfxError::Initialization(msg) => write!(f, "Initialization error: {}", msg),
            DistGfxError::Runtime(msg) => write!(f, "Runtime error: {}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {}", path),
            ConfigError::ParseError(msg) => write!(f, "Failed to parse config: {}", msg),
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
        }
    }
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphicsError::DeviceCreation(msg) => write!(f, "Device creation failed: {}", msg),
            GraphicsError::SwapchainError(msg) => write!(f, "Swapchain error: {}", msg),
            GraphicsError::ResourceCreation(msg) => write!(f, "Resource creation failed: {}", msg),
            GraphicsError::CommandExecution(msg) => write!(f, "Command execution failed: {}", msg),
            GraphicsError::FenceWait(msg) => write!(f, "Fence wait failed: {}", msg),
            GraphicsError::DeviceRemoved(msg) => write!(f, "Device removed: {}", msg),
            GraphicsError::ContextDrained => write!(f, "Graphics context has been drained"),
        }
    }
}

impl std::error::Error for DistGfxError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DistGfxError::Io(e) => Some(e),
            DistGfxError::Config(e) => Some(e),
            DistGfxError::Graphics(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for ConfigError {}
impl std::error::Error for GraphicsError {}

// 实现 From trait 以便于错误转换
impl From<std::io::Error> for DistGfxError {
    fn from(err: std::io::Error) -> Self {
        DistGfxError::Io(err)
    }
}

impl From<ConfigError> for DistGfxError {
    fn from(err: ConfigError) -> Self {
        DistGfxError::Config(err)
    }
}

impl From<GraphicsError> for DistGfxError {
    fn from(err: GraphicsError) -> Self {
        DistGfxError::Graphics(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err: DistGfxError = GraphicsError::FenceWait("timeout".to_string()).into();
        assert_eq!(err.to_string(), "Graphics error: Fence wait failed: timeout");

        let err: DistGfxError = ConfigError::InvalidValue {
            field: "graphics.back_buffer_count".to_string(),
            reason: "must be 2..=4".to_string(),
        }
        .into();
        assert!(err.to_string().contains("graphics.back_buffer_count"));
    }

    #[test]
    fn test_device_lost_classification() {
        assert!(GraphicsError::DeviceRemoved("hung".to_string()).is_device_lost());
        assert!(!GraphicsError::ContextDrained.is_device_lost());
    }
}
