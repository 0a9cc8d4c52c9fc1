//! 配置管理模块
//!
//! 提供图形上下文配置的加载、解析和管理功能。
//! 支持从 TOML 配置文件加载，也支持命令行参数覆盖。
//!
//! # 配置文件格式 (config.toml)
//!
//! ```toml
//! [window]
//! width = 1280
//! height = 720
//! title = "DistGfx"
//!
//! [graphics]
//! backend = "dx12"       # 或 "headless"
//! swap_interval = 1      # 0 = 不等待垂直同步
//! back_buffer_count = 4
//! debug_layer = true
//!
//! [descriptors]
//! cpu_cbv_srv_uav = 10000
//! gpu_cbv_srv_uav = 10000
//! cpu_sampler = 256
//! gpu_sampler = 256
//!
//! [headless]
//! completion = "on_wait" # eager, on_wait, manual
//! wait_timeout_ms = 2000
//!
//! [logging]
//! level = "info"
//! file_output = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::error::{ConfigError, Result};
use crate::renderer::descriptor::{MAX_CBV_SRV_UAV_DESCRIPTORS, MAX_SAMPLER_DESCRIPTORS};
use crate::renderer::sync::MAX_BACK_BUFFERS;

/// 上下文配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// 窗口配置
    #[serde(default)]
    pub window: WindowConfig,

    /// 图形配置
    #[serde(default)]
    pub graphics: GraphicsConfig,

    /// 描述符堆容量
    #[serde(default)]
    pub descriptors: DescriptorConfig,

    /// 无头后端配置
    #[serde(default)]
    pub headless: HeadlessConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 窗口配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    #[serde(default = "default_title")]
    pub title: String,
}

/// 图形配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphicsConfig {
    /// 图形后端选择
    #[serde(default = "default_backend")]
    pub backend: GraphicsBackend,

    /// Present 时等待的垂直同步次数（0 表示不等待）
    #[serde(default = "default_swap_interval")]
    pub swap_interval: u32,

    /// 交换链缓冲数量（2..=4）
    #[serde(default = "default_back_buffer_count")]
    pub back_buffer_count: u32,

    /// 是否启用调试层（仅 DX12）
    #[serde(default = "default_debug_layer")]
    pub debug_layer: bool,
}

/// 图形后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphicsBackend {
    /// DirectX 12 后端（仅 Windows）
    Dx12,
    /// 无头后端（模拟 GPU，所有平台可用）
    Headless,
}

/// 描述符堆容量配置
///
/// RTV 堆容量等于交换链缓冲数量，DSV 堆容量固定为 1，不在此配置。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptorConfig {
    /// 持久的 CPU 可见 CBV/SRV/UAV 堆
    #[serde(default = "default_cbv_srv_uav_capacity")]
    pub cpu_cbv_srv_uav: u32,

    /// 每个帧槽位的着色器可见 CBV/SRV/UAV 堆
    #[serde(default = "default_cbv_srv_uav_capacity")]
    pub gpu_cbv_srv_uav: u32,

    /// 持久的 CPU 可见采样器堆
    #[serde(default = "default_sampler_capacity")]
    pub cpu_sampler: u32,

    /// 每个帧槽位的着色器可见采样器堆
    #[serde(default = "default_sampler_capacity")]
    pub gpu_sampler: u32,
}

/// 无头后端的 GPU 完成模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionMode {
    /// Signal 时立即完成
    Eager,
    /// 只有 CPU 阻塞等待时，GPU 才按提交顺序完成排队的工作
    OnWait,
    /// 只有外部调用 `GpuHandle::complete` 才会推进 Fence
    Manual,
}

/// 无头后端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadlessConfig {
    #[serde(default = "default_completion")]
    pub completion: CompletionMode,

    /// Manual 模式下单次等待的超时时间（毫秒）
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    #[serde(default = "default_file_output")]
    pub file_output: bool,

    #[serde(default = "default_log_file")]
    pub log_file: String,
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

// 默认值函数
fn default_width() -> u32 { 1280 }
fn default_height() -> u32 { 720 }
fn default_title() -> String { "DistGfx".to_string() }
fn default_backend() -> GraphicsBackend {
    if cfg!(target_os = "windows") {
        GraphicsBackend::Dx12
    } else {
        GraphicsBackend::Headless
    }
}
fn default_swap_interval() -> u32 { 1 }
fn default_back_buffer_count() -> u32 { MAX_BACK_BUFFERS as u32 }
fn default_debug_layer() -> bool { cfg!(debug_assertions) }
fn default_cbv_srv_uav_capacity() -> u32 { 10000 }
fn default_sampler_capacity() -> u32 { 256 }
fn default_completion() -> CompletionMode { CompletionMode::OnWait }
fn default_wait_timeout_ms() -> u64 { 2000 }
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_file_output() -> bool { false }
fn default_log_file() -> String { "distgfx.log".to_string() }

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            title: default_title(),
        }
    }
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            swap_interval: default_swap_interval(),
            back_buffer_count: default_back_buffer_count(),
            debug_layer: default_debug_layer(),
        }
    }
}

impl Default for DescriptorConfig {
    fn default() -> Self {
        Self {
            cpu_cbv_srv_uav: default_cbv_srv_uav_capacity(),
            gpu_cbv_srv_uav: default_cbv_srv_uav_capacity(),
            cpu_sampler: default_sampler_capacity(),
            gpu_sampler: default_sampler_capacity(),
        }
    }
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            completion: default_completion(),
            wait_timeout_ms: default_wait_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: default_file_output(),
            log_file: default_log_file(),
        }
    }
}

impl Config {
    /// 从配置文件加载
    ///
    /// # 示例
    ///
    /// ```no_run
    /// use dist_gfx::core::Config;
    ///
    /// let config = Config::from_file("config.toml").unwrap();
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let bytes = super::fs::load_file(path).map_err(|_| ConfigError::FileNotFound(path_str.clone()))?;
        let contents = String::from_utf8(bytes)
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", path_str, e)))?;

        Self::from_toml(&contents)
    }

    /// 从 TOML 字符串解析
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| ConfigError::ParseError(e.to_string()).into())
    }

    /// 从配置文件加载，如果文件不存在或无法解析则使用默认配置
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::from_file(path).unwrap_or_default()
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// 从命令行参数覆盖配置
    ///
    /// 支持的参数：
    /// - `--dx12` / `--headless`: 选择图形后端
    /// - `--width <value>` / `--height <value>`: 设置窗口尺寸
    /// - `--vsync` / `--no-vsync`: 交换间隔设为 1 / 0
    pub fn apply_args<I>(&mut self, args: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|s| s.as_ref().to_string()).collect();

        if args.iter().any(|a| a == "--dx12") {
            self.graphics.backend = GraphicsBackend::Dx12;
        }

        if args.iter().any(|a| a == "--headless") {
            self.graphics.backend = GraphicsBackend::Headless;
        }

        if args.iter().any(|a| a == "--vsync") {
            self.graphics.swap_interval = 1;
        }

        if args.iter().any(|a| a == "--no-vsync") {
            self.graphics.swap_interval = 0;
        }

        if let Some(idx) = args.iter().position(|a| a == "--width") {
            if let Some(width) = args.get(idx + 1).and_then(|s| s.parse().ok()) {
                self.window.width = width;
            }
        }

        if let Some(idx) = args.iter().position(|a| a == "--height") {
            if let Some(height) = args.get(idx + 1).and_then(|s| s.parse().ok()) {
                self.window.height = height;
            }
        }
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(invalid("window.width/height", "Window dimensions must be greater than 0"));
        }

        let count = self.graphics.back_buffer_count;
        if count < 2 || count as usize > MAX_BACK_BUFFERS {
            return Err(invalid(
                "graphics.back_buffer_count",
                &format!("must be between 2 and {}", MAX_BACK_BUFFERS),
            ));
        }

        // DXGI 允许的最大交换间隔为 4
        if self.graphics.swap_interval > 4 {
            return Err(invalid("graphics.swap_interval", "must be between 0 and 4"));
        }

        let d = &self.descriptors;
        for (field, value, max) in [
            ("descriptors.cpu_cbv_srv_uav", d.cpu_cbv_srv_uav, MAX_CBV_SRV_UAV_DESCRIPTORS),
            ("descriptors.gpu_cbv_srv_uav", d.gpu_cbv_srv_uav, MAX_CBV_SRV_UAV_DESCRIPTORS),
            ("descriptors.cpu_sampler", d.cpu_sampler, MAX_SAMPLER_DESCRIPTORS),
            ("descriptors.gpu_sampler", d.gpu_sampler, MAX_SAMPLER_DESCRIPTORS),
        ] {
            if value == 0 || value > max {
                return Err(invalid(field, &format!("heap capacity must be between 1 and {}", max)));
            }
        }

        if self.headless.completion == CompletionMode::Manual && self.headless.wait_timeout_ms == 0 {
            return Err(invalid("headless.wait_timeout_ms", "manual completion needs a non-zero timeout"));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> super::error::DistGfxError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

impl GraphicsBackend {
    /// 获取后端名称
    pub fn name(&self) -> &'static str {
        match self {
            GraphicsBackend::Dx12 => "DirectX 12",
            GraphicsBackend::Headless => "Headless",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.graphics.back_buffer_count, 4);
        assert_eq!(config.descriptors.gpu_cbv_srv_uav, 10000);
        assert_eq!(config.headless.completion, CompletionMode::OnWait);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = Config::from_toml(
            r#"
            [graphics]
            backend = "headless"
            swap_interval = 0
            back_buffer_count = 3

            [descriptors]
            gpu_cbv_srv_uav = 256

            [headless]
            completion = "manual"
            "#,
        )
        .unwrap();

        assert_eq!(config.graphics.backend, GraphicsBackend::Headless);
        assert_eq!(config.graphics.swap_interval, 0);
        assert_eq!(config.graphics.back_buffer_count, 3);
        assert_eq!(config.descriptors.gpu_cbv_srv_uav, 256);
        assert_eq!(config.descriptors.cpu_sampler, 256);
        assert_eq!(config.headless.completion, CompletionMode::Manual);
        assert_eq!(config.window.height, 720);
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join(format!("dist_gfx_config_{}.toml", std::process::id()));
        std::fs::write(&path, "[window]\nwidth = 800\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.window.width, 800);

        std::fs::write(&path, [0xffu8, 0xfe, 0x00]).unwrap();
        assert!(Config::from_file(&path).is_err());

        std::fs::remove_file(&path).unwrap();
        assert!(matches!(
            Config::from_file(&path),
            Err(crate::core::error::DistGfxError::Config(ConfigError::FileNotFound(_)))
        ));
    }

    #[test]
    fn test_parse_error() {
        assert!(Config::from_toml("[graphics]\nbackend = \"vulkan\"").is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.window.width = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.graphics.back_buffer_count = 5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.graphics.back_buffer_count = 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.descriptors.cpu_sampler = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.descriptors.gpu_cbv_srv_uav = u32::MAX;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.descriptors.gpu_sampler = 2049;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_apply_args() {
        let mut config = Config::default();
        config.apply_args(["dist_gfx", "--headless", "--width", "640", "--height", "480", "--no-vsync"]);

        assert_eq!(config.graphics.backend, GraphicsBackend::Headless);
        assert_eq!(config.window.width, 640);
        assert_eq!(config.window.height, 480);
        assert_eq!(config.graphics.swap_interval, 0);

        // 无法解析的值保持原样
        config.apply_args(["--width", "abc"]);
        assert_eq!(config.window.width, 640);
    }
}
