//! DistGfx 演示程序
//!
//! 每帧清空后台缓冲和深度缓冲并呈现，用来检验图形上下文的帧循环。
//!
//! # 使用方法
//!
//! ```bash
//! # 使用配置文件
//! cargo run
//!
//! # 使用 DirectX 12（命令行覆盖）
//! cargo run -- --dx12
//!
//! # 无窗口，在模拟 GPU 上跑 600 帧
//! cargo run -- --headless --frames 600
//! ```

use anyhow::{bail, Context as _};
use tracing::{debug, error, info};
use winit::dpi::PhysicalSize;
use winit::event::{Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::window::WindowBuilder;

use dist_gfx::core::config::GraphicsBackend;
use dist_gfx::core::{log, Config, FrameStats, FrameTime};
use dist_gfx::gfx::{GpuDevice, HeadlessDevice, HeadlessWindow, ResourceState};
use dist_gfx::renderer::{CpuDescriptorHandle, DescriptorHeapType, FenceValue, GraphicsContext};

/// 无头模式默认运行的帧数
const DEFAULT_HEADLESS_FRAMES: u64 = 300;

/// 应用程序入口点
///
/// # 初始化流程
///
/// 1. 加载配置文件（config.toml）
/// 2. 应用命令行参数覆盖
/// 3. 初始化日志系统
/// 4. 按配置选择后端并进入帧循环
///
/// # 命令行参数
///
/// - `--dx12` / `--headless`: 选择图形后端
/// - `--width <value>` / `--height <value>`: 设置窗口尺寸
/// - `--vsync` / `--no-vsync`: 是否等待垂直同步
/// - `--frames <value>`: 无头模式下运行的帧数
fn main() -> anyhow::Result<()> {
    // 1. 加载配置（在初始化日志之前）
    let mut config = Config::from_file_or_default("config.toml");

    // 2. 应用命令行参数
    let args: Vec<String> = std::env::args().collect();
    config.apply_args(&args);

    // 3. 验证配置
    config.validate().context("Invalid configuration")?;

    // 4. 初始化日志系统（使用配置中的设置）
    let log_file = config
        .logging
        .file_output
        .then_some(config.logging.log_file.as_str());
    log::init_logger(config.logging.level, config.logging.file_output, log_file);
    info!(version = env!("CARGO_PKG_VERSION"), "DistGfx starting...");
    info!(
        backend = config.graphics.backend.name(),
        width = config.window.width,
        height = config.window.height,
        back_buffers = config.graphics.back_buffer_count,
        swap_interval = config.graphics.swap_interval,
        "Graphics configuration"
    );

    match config.graphics.backend {
        GraphicsBackend::Headless => {
            let frames = frame_count_arg(&args).unwrap_or(DEFAULT_HEADLESS_FRAMES);
            run_headless(&config, frames)
        }
        #[cfg(target_os = "windows")]
        GraphicsBackend::Dx12 => {
            let device_config = config.graphics.clone();
            run_windowed(&config, move || dist_gfx::gfx::Dx12Device::new(&device_config))
        }
        #[cfg(not(target_os = "windows"))]
        GraphicsBackend::Dx12 => bail!("DirectX 12 backend is only available on Windows"),
    }
}

fn frame_count_arg(args: &[String]) -> Option<u64> {
    let idx = args.iter().position(|a| a == "--frames")?;
    args.get(idx + 1).and_then(|s| s.parse().ok())
}

/// 在模拟 GPU 上运行固定帧数，不创建窗口
fn run_headless(config: &Config, frames: u64) -> anyhow::Result<()> {
    let device = HeadlessDevice::new(&config.headless);
    let gpu = device.gpu();
    let window = HeadlessWindow::new(config.window.width, config.window.height);
    let mut context = GraphicsContext::new(device, &window, config)?;
    let staging = context.allocate_descriptors(DescriptorHeapType::CbvSrvUav, 1)?;

    let mut stats = FrameStats::new();
    for _ in 0..frames {
        let (frame, refreshed) = stats.update();
        render_frame(&mut context, &frame, staging, config.graphics.swap_interval)?;
        if refreshed {
            info!(frame_count = context.frame_count(), "{}", stats.title(&config.window.title));
        }
    }

    context.shutdown()?;

    let errors = gpu.validation_errors();
    if !errors.is_empty() {
        for message in &errors {
            error!("{}", message);
        }
        bail!("{} validation errors reported by the headless device", errors.len());
    }
    info!(frames, "Headless run finished");
    Ok(())
}

/// 创建窗口并在事件循环中逐帧渲染
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
fn run_windowed<D, F>(config: &Config, create_device: F) -> anyhow::Result<()>
where
    D: GpuDevice + 'static,
    F: FnOnce() -> dist_gfx::Result<D>,
{
    let event_loop = EventLoop::new()?;
    let window = WindowBuilder::new()
        .with_title(config.window.title.clone())
        .with_inner_size(PhysicalSize::new(config.window.width, config.window.height))
        .build(&event_loop)?;

    let mut context = GraphicsContext::new(create_device()?, &window, config)?;
    let staging = context.allocate_descriptors(DescriptorHeapType::CbvSrvUav, 1)?;
    // 退出事件循环时取出并显式关闭
    let mut context = Some(context);

    let title = config.window.title.clone();
    let swap_interval = config.graphics.swap_interval;
    let mut stats = FrameStats::new();

    info!("Entering main loop...");
    event_loop.set_control_flow(ControlFlow::Poll);
    event_loop.run(move |event, elwt| match event {
        // 窗口关闭事件
        Event::WindowEvent {
            event: WindowEvent::CloseRequested,
            ..
        } => {
            info!("Close requested, shutting down...");
            elwt.exit();
        }
        Event::WindowEvent {
            event: WindowEvent::Resized(size),
            ..
        } => {
            // 交换链保持初始分辨率
            debug!(width = size.width, height = size.height, "Window resized");
        }
        Event::WindowEvent {
            event: WindowEvent::RedrawRequested,
            ..
        } => {
            let Some(context) = context.as_mut() else {
                return;
            };
            let (frame, refreshed) = stats.update();
            if let Err(e) = render_frame(context, &frame, staging, swap_interval) {
                error!("Frame failed: {}", e);
                elwt.exit();
                return;
            }
            if refreshed {
                window.set_title(&stats.title(&title));
            }
        }
        Event::AboutToWait => window.request_redraw(),
        Event::LoopExiting => {
            if let Some(context) = context.take() {
                if let Err(e) = context.shutdown() {
                    error!("Shutdown failed: {}", e);
                }
            }
        }
        _ => (),
    })?;

    Ok(())
}

/// 录制并呈现一帧：清空后台缓冲与深度缓冲
fn render_frame<D: GpuDevice>(
    context: &mut GraphicsContext<D>,
    frame: &FrameTime,
    staging: CpuDescriptorHandle,
    swap_interval: u32,
) -> dist_gfx::Result<FenceValue> {
    context.begin_frame()?;
    context.bind_gpu_descriptor_heaps()?;
    context.copy_descriptors_to_gpu(DescriptorHeapType::CbvSrvUav, 1, staging)?;

    let back_buffer = context.back_buffer()?;
    let depth_view = context.depth_stencil_buffer().view;
    let device = context.device();
    let list = context.command_list();

    let pulse = (frame.time.sin() * 0.5 + 0.5) as f32;
    device.transition(list, &back_buffer.resource, ResourceState::Present, ResourceState::RenderTarget);
    device.clear_render_target(list, back_buffer.view, [0.1, 0.2 + 0.3 * pulse, 0.4, 1.0]);
    device.clear_depth_stencil(list, depth_view, 1.0);
    device.transition(list, &back_buffer.resource, ResourceState::RenderTarget, ResourceState::Present);

    context.present_frame(swap_interval)
}
