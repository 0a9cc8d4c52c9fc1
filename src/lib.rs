//! DistGfx - 图形设备上下文
//!
//! DistGfx 管理一个 GPU 会话的底层资源：描述符堆、双帧命令分配器、
//! Fence 帧同步以及交换链的后台缓冲。上层渲染代码每帧通过
//! `GraphicsContext` 开始一帧、分配描述符、录制命令并呈现。
//!
//! # 模块结构
//!
//! - `core`: 核心功能模块（配置、日志、错误处理、帧统计、文件加载）
//! - `gfx`: 图形后端抽象层（DirectX 12 与无头模拟 GPU）
//! - `renderer`: 上下文核心（描述符堆、帧同步、图形上下文）
//!
//! # 使用示例
//!
//! ```no_run
//! use dist_gfx::core::Config;
//! use dist_gfx::gfx::{GpuDevice, HeadlessDevice, HeadlessWindow};
//! use dist_gfx::renderer::GraphicsContext;
//!
//! let config = Config::default();
//! let device = HeadlessDevice::new(&config.headless);
//! let window = HeadlessWindow::new(config.window.width, config.window.height);
//! let mut context = GraphicsContext::new(device, &window, &config)?;
//!
//! context.begin_frame()?;
//! let back_buffer = context.back_buffer()?.view;
//! context.device().clear_render_target(context.command_list(), back_buffer, [0.0, 0.0, 0.0, 1.0]);
//! context.present_frame(0)?;
//!
//! context.shutdown()?;
//! # Ok::<(), dist_gfx::core::DistGfxError>(())
//! ```

pub mod core;
pub mod gfx;
pub mod renderer;

pub use crate::core::error::{DistGfxError, GraphicsError, Result};
pub use crate::renderer::GraphicsContext;
