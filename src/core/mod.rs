//! 核心功能模块
//!
//! 与具体图形 API 无关的基础设施：配置、日志、错误处理、帧统计和文件加载。
//!
//! # 模块组织
//!
//! - `config`：配置管理，支持从 TOML 文件加载
//! - `log`：日志系统，基于 tracing 的结构化日志
//! - `error`：错误处理，定义统一的错误类型
//! - `stats`：帧时间与帧率统计
//! - `fs`：文件加载

pub mod config;
pub mod error;
pub mod fs;
pub mod log;
pub mod stats;

// 重新导出常用类型，方便使用
pub use config::Config;
pub use error::{DistGfxError, GraphicsError, Result};
pub use stats::{FrameStats, FrameTime};
