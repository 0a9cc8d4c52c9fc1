//! 图形上下文
//!
//! 拥有设备、命令队列、交换链、深度缓冲、所有描述符堆和帧同步器，
//! 并对外提供每帧的 begin / present 协议。
//!
//! # 每帧流程
//!
//! ```text
//! begin_frame()                  等待帧槽位可复用，重置分配器、逐帧堆和命令列表
//!   allocate_gpu_descriptors()   从当前帧的着色器可见堆分配
//!   copy_descriptors_to_gpu()    从持久 CPU 堆发布到当前帧的堆
//!   bind_gpu_descriptor_heaps()
//!   ...录制命令...
//! present_frame(interval)        关闭并提交命令列表，呈现，signal
//! ```
//!
//! 字段声明顺序即释放顺序：GPU 工作排空之后先释放堆和资源，最后释放设备。

use tracing::debug;

use crate::core::config::Config;
use crate::core::error::{DistGfxError, GraphicsError, Result};
use crate::gfx::backend::{GpuDevice, SwapChainDescriptor, WindowProvider};
use crate::renderer::command::CommandRecorder;
use crate::renderer::descriptor::{
    CpuDescriptorHandle, DescriptorHandlePair, DescriptorHeap, DescriptorHeapRegistry, DescriptorHeapStats,
    DescriptorHeapType, GpuDescriptorHandle, HeapCapacityPolicy,
};
use crate::renderer::sync::{FenceValue, FramePipeline, FRAMES_IN_FLIGHT, MAX_BACK_BUFFERS};
use crate::{engine_error, engine_info, engine_warn};

/// 资源及其 RTV/DSV 描述符
#[derive(Debug, Clone)]
pub struct ViewedResource<R> {
    pub resource: R,
    pub view: CpuDescriptorHandle,
}

/// 图形上下文
pub struct GraphicsContext<D: GpuDevice> {
    pipeline: FramePipeline<D>,
    registry: DescriptorHeapRegistry<D::DescriptorHeap>,
    recorder: CommandRecorder<D::CommandList>,
    depth_stencil: ViewedResource<D::Resource>,
    back_buffers: [Option<ViewedResource<D::Resource>>; MAX_BACK_BUFFERS],
    swap_chain: D::SwapChain,
    queue: D::CommandQueue,
    resolution: [u32; 2],
    back_buffer_count: u32,
    back_buffer_index: u32,
    device: D,
}

impl<D: GpuDevice> GraphicsContext<D> {
    /// 创建上下文
    ///
    /// 窗口只在这里使用：读取分辨率，并交给设备创建交换链。
    pub fn new(device: D, window: &dyn WindowProvider, config: &Config) -> Result<Self> {
        config.validate()?;

        let resolution = window.resolution();
        if resolution[0] == 0 || resolution[1] == 0 {
            return Err(DistGfxError::Initialization(format!(
                "Window resolution {}x{} is empty",
                resolution[0], resolution[1]
            )));
        }
        if resolution != [config.window.width, config.window.height] {
            engine_warn!(
                width = resolution[0],
                height = resolution[1],
                "Window resolution differs from configuration, using the window size"
            );
        }
        let back_buffer_count = config.graphics.back_buffer_count;

        let queue = device.create_command_queue()?;
        let swap_chain = device.create_swap_chain(
            &queue,
            window,
            &SwapChainDescriptor {
                width: resolution[0],
                height: resolution[1],
                buffer_count: back_buffer_count,
            },
        )?;

        let policy = HeapCapacityPolicy::new(back_buffer_count, config.descriptors.clone());
        let mut registry = DescriptorHeapRegistry::new(policy);

        let mut back_buffers: [Option<ViewedResource<D::Resource>>; MAX_BACK_BUFFERS] =
            std::array::from_fn(|_| None);
        let rtv_heap = registry.get_or_create(&device, DescriptorHeapType::RenderTarget, false, 0)?;
        for (index, slot) in back_buffers.iter_mut().take(back_buffer_count as usize).enumerate() {
            let resource = device.swap_chain_buffer(&swap_chain, index as u32)?;
            let view = rtv_heap.allocate(1);
            device.create_render_target_view(&resource, view);
            *slot = Some(ViewedResource { resource, view });
        }

        let depth_resource = device.create_depth_stencil_buffer(resolution[0], resolution[1])?;
        let dsv_view = registry
            .get_or_create(&device, DescriptorHeapType::DepthStencil, false, 0)?
            .allocate(1);
        device.create_depth_stencil_view(&depth_resource, dsv_view);

        // 持久 CPU 堆和每个帧槽位的着色器可见堆在初始化时就创建，采样器堆按需创建
        registry.get_or_create(&device, DescriptorHeapType::CbvSrvUav, false, 0)?;
        for frame_index in 0..FRAMES_IN_FLIGHT {
            registry.get_or_create(&device, DescriptorHeapType::CbvSrvUav, true, frame_index)?;
        }

        let pipeline = FramePipeline::new(&device)?;
        let recorder = CommandRecorder::new(device.create_command_list(pipeline.current_allocator())?);
        let back_buffer_index = device.current_back_buffer_index(&swap_chain);

        engine_info!(
            backend = device.backend_name(),
            width = resolution[0],
            height = resolution[1],
            back_buffers = back_buffer_count,
            "Graphics context created"
        );

        Ok(Self {
            pipeline,
            registry,
            recorder,
            depth_stencil: ViewedResource {
                resource: depth_resource,
                view: dsv_view,
            },
            back_buffers,
            swap_chain,
            queue,
            resolution,
            back_buffer_count,
            back_buffer_index,
            device,
        })
    }

    /// 开始一帧，返回重新打开的命令列表
    ///
    /// 如果当前帧槽位上一次的工作还在 GPU 上执行，这里会阻塞。
    pub fn begin_frame(&mut self) -> Result<&D::CommandList> {
        if self.recorder.is_recording() {
            return Err(GraphicsError::CommandExecution(
                "begin_frame called while the command list is still recording".to_string(),
            )
            .into());
        }

        let frame_index = self.pipeline.begin_frame(&self.device)?;
        self.registry.begin_frame(frame_index);
        self.recorder.begin(&self.device, self.pipeline.current_allocator())?;
        Ok(self.recorder.list())
    }

    /// 从 CPU 可见的持久堆分配 `count` 个描述符
    ///
    /// # Panics
    ///
    /// 堆容量不足时 panic。
    pub fn allocate_descriptors(&mut self, heap_type: DescriptorHeapType, count: u32) -> Result<CpuDescriptorHandle> {
        let frame_index = self.pipeline.frame_index();
        let heap = self.registry.get_or_create(&self.device, heap_type, false, frame_index)?;
        Ok(heap.allocate(count))
    }

    /// 从当前帧的着色器可见堆分配 `count` 个描述符
    ///
    /// # Panics
    ///
    /// 堆容量不足时 panic。
    pub fn allocate_gpu_descriptors(&mut self, heap_type: DescriptorHeapType, count: u32) -> Result<DescriptorHandlePair> {
        self.ensure_recording("Shader visible descriptors allocated")?;
        let frame_index = self.pipeline.frame_index();
        let heap = self.registry.get_or_create(&self.device, heap_type, true, frame_index)?;
        Ok(heap.allocate_gpu_visible(count))
    }

    /// 把 `src` 开始的 `count` 个描述符复制到当前帧的着色器可见堆，返回 GPU 句柄
    pub fn copy_descriptors_to_gpu(
        &mut self,
        heap_type: DescriptorHeapType,
        count: u32,
        src: CpuDescriptorHandle,
    ) -> Result<GpuDescriptorHandle> {
        self.ensure_recording("Descriptors copied")?;
        let dst = self.allocate_gpu_descriptors(heap_type, count)?;
        self.device.copy_descriptors(count, dst.cpu, src, heap_type);
        Ok(dst.gpu)
    }

    /// 当前后台缓冲及其 RTV
    pub fn back_buffer(&self) -> Result<&ViewedResource<D::Resource>> {
        self.back_buffers
            .get(self.back_buffer_index as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| {
                GraphicsError::SwapchainError(format!("No back buffer at index {}", self.back_buffer_index)).into()
            })
    }

    /// 深度缓冲及其 DSV
    pub fn depth_stencil_buffer(&self) -> &ViewedResource<D::Resource> {
        &self.depth_stencil
    }

    /// 将当前帧的着色器可见堆绑定到命令列表
    pub fn bind_gpu_descriptor_heaps(&mut self) -> Result<()> {
        self.ensure_recording("Descriptor heaps bound")?;

        let frame_index = self.pipeline.frame_index();
        self.registry
            .get_or_create(&self.device, DescriptorHeapType::CbvSrvUav, true, frame_index)?;
        let heaps = self.registry.shader_visible_heaps(frame_index);
        self.device.set_descriptor_heaps(self.recorder.list(), &heaps);
        Ok(())
    }

    /// 逐帧堆只在 begin_frame 与 present_frame 之间有效
    fn ensure_recording(&self, what: &str) -> Result<()> {
        if self.recorder.is_recording() {
            return Ok(());
        }
        Err(GraphicsError::CommandExecution(format!("{} outside begin_frame/present_frame", what)).into())
    }

    /// 关闭并提交命令列表，呈现后台缓冲，然后 signal 帧 Fence
    ///
    /// `swap_interval` 为 0 时不等待垂直同步。
    pub fn present_frame(&mut self, swap_interval: u32) -> Result<FenceValue> {
        self.recorder.finish(&self.device)?;
        self.device.execute_command_list(&self.queue, self.recorder.list())?;
        self.device.present(&self.swap_chain, swap_interval)?;

        let fence_value = self.pipeline.end_frame(&self.device, &self.queue)?;
        self.back_buffer_index = self.device.current_back_buffer_index(&self.swap_chain);
        Ok(fence_value)
    }

    /// 等待 GPU 完成目前提交的所有工作（用于同步回读）
    pub fn wait_for_gpu(&mut self) -> Result<()> {
        let value = self.pipeline.flush(&self.device, &self.queue)?;
        debug!(fence_value = value.value(), "GPU idle");
        Ok(())
    }

    /// 排空 GPU 工作并释放上下文
    pub fn shutdown(mut self) -> Result<()> {
        self.pipeline.drain(&self.device, &self.queue)?;
        engine_info!(frame_count = self.pipeline.frame_count(), "Graphics context shut down");
        Ok(())
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn command_list(&self) -> &D::CommandList {
        self.recorder.list()
    }

    pub fn command_queue(&self) -> &D::CommandQueue {
        &self.queue
    }

    pub fn resolution(&self) -> [u32; 2] {
        self.resolution
    }

    pub fn frame_index(&self) -> usize {
        self.pipeline.frame_index()
    }

    pub fn frame_count(&self) -> u64 {
        self.pipeline.frame_count()
    }

    pub fn back_buffer_index(&self) -> u32 {
        self.back_buffer_index
    }

    pub fn back_buffer_count(&self) -> u32 {
        self.back_buffer_count
    }

    /// 帧同步器
    pub fn pipeline(&self) -> &FramePipeline<D> {
        &self.pipeline
    }

    /// GPU 已经完成的 Fence 值
    pub fn completed_fence_value(&self) -> FenceValue {
        self.pipeline.completed_value(&self.device)
    }

    /// 查询已创建的堆；着色器可见的堆按 `frame_index` 区分
    pub fn heap(
        &self,
        heap_type: DescriptorHeapType,
        shader_visible: bool,
        frame_index: usize,
    ) -> Option<&DescriptorHeap<D::DescriptorHeap>> {
        self.registry.get(heap_type, shader_visible, frame_index)
    }

    /// 所有已创建堆的统计信息
    pub fn heap_stats(&self) -> Vec<DescriptorHeapStats> {
        self.registry.all_stats()
    }
}

impl<D: GpuDevice> Drop for GraphicsContext<D> {
    fn drop(&mut self) {
        if self.pipeline.is_drained() {
            return;
        }
        if let Err(e) = self.pipeline.drain(&self.device, &self.queue) {
            engine_error!("Failed to drain GPU work before release: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::CompletionMode;
    use crate::gfx::headless::{HeadlessDevice, HeadlessWindow};

    fn context(completion: CompletionMode) -> GraphicsContext<HeadlessDevice> {
        let mut config = Config::default();
        config.descriptors.gpu_cbv_srv_uav = 64;
        GraphicsContext::new(
            HeadlessDevice::with_completion(completion),
            &HeadlessWindow::new(320, 240),
            &config,
        )
        .unwrap()
    }

    #[test]
    fn test_initial_heaps() {
        let ctx = context(CompletionMode::OnWait);

        let rtv = ctx.heap(DescriptorHeapType::RenderTarget, false, 0).unwrap();
        assert_eq!(rtv.capacity(), 4);
        assert_eq!(rtv.size(), 4);
        assert_eq!(ctx.heap(DescriptorHeapType::DepthStencil, false, 0).unwrap().size(), 1);
        assert!(ctx.heap(DescriptorHeapType::CbvSrvUav, true, 1).is_some());
        assert!(ctx.heap(DescriptorHeapType::Sampler, true, 0).is_none());
        assert_eq!(ctx.resolution(), [320, 240]);
    }

    #[test]
    fn test_back_buffer_rotation() {
        let mut ctx = context(CompletionMode::OnWait);
        let first = ctx.back_buffer().unwrap().view;

        ctx.begin_frame().unwrap();
        ctx.present_frame(0).unwrap();
        assert_eq!(ctx.back_buffer_index(), 1);

        let rtv = ctx.heap(DescriptorHeapType::RenderTarget, false, 0).unwrap();
        assert_eq!(ctx.back_buffer().unwrap().view, first.offset(1, rtv.increment_size()));
    }

    #[test]
    fn test_command_state_errors() {
        let mut ctx = context(CompletionMode::OnWait);
        assert!(ctx.present_frame(1).is_err());
        assert!(ctx.bind_gpu_descriptor_heaps().is_err());

        ctx.begin_frame().unwrap();
        let err = ctx.begin_frame().unwrap_err();
        assert!(matches!(err, DistGfxError::Graphics(GraphicsError::CommandExecution(_))));
    }

    #[test]
    fn test_frame_descriptors_rejected_outside_frame() {
        let mut ctx = context(CompletionMode::OnWait);
        let src = ctx.allocate_descriptors(DescriptorHeapType::CbvSrvUav, 2).unwrap();

        let err = ctx.allocate_gpu_descriptors(DescriptorHeapType::CbvSrvUav, 4).unwrap_err();
        assert!(matches!(err, DistGfxError::Graphics(GraphicsError::CommandExecution(_))));
        assert!(ctx.copy_descriptors_to_gpu(DescriptorHeapType::CbvSrvUav, 2, src).is_err());
        assert_eq!(ctx.heap(DescriptorHeapType::CbvSrvUav, true, 0).unwrap().size(), 0);

        ctx.begin_frame().unwrap();
        let first = ctx.allocate_gpu_descriptors(DescriptorHeapType::CbvSrvUav, 4).unwrap();
        ctx.present_frame(0).unwrap();

        // present 之后、下一次 begin_frame 之前同样拒绝
        assert!(ctx.allocate_gpu_descriptors(DescriptorHeapType::CbvSrvUav, 4).is_err());
        assert!(ctx.copy_descriptors_to_gpu(DescriptorHeapType::CbvSrvUav, 2, src).is_err());
        assert_eq!(ctx.heap(DescriptorHeapType::CbvSrvUav, true, 0).unwrap().size(), 4);

        ctx.begin_frame().unwrap();
        let second = ctx.allocate_gpu_descriptors(DescriptorHeapType::CbvSrvUav, 4).unwrap();
        assert_ne!(first.gpu, second.gpu);
    }

    #[test]
    fn test_invalid_window() {
        let result = GraphicsContext::new(
            HeadlessDevice::with_completion(CompletionMode::OnWait),
            &HeadlessWindow::new(0, 240),
            &Config::default(),
        );
        assert!(matches!(result, Err(DistGfxError::Initialization(_))));
    }
}
