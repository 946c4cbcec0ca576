use crate::backends::{KilnNativeCommand, KilnNativeHandle};
use crate::error::invalid_operation;
use crate::queue::KilnCommittedCommandList;
use crate::{
    KilnClearFlags, KilnColorRenderTargetBinding, KilnCommandBufferDef,
    KilnDepthStencilRenderTargetBinding, KilnDescriptorHeapType, KilnError, KilnLoadOp,
    KilnPassKind, KilnQueue, KilnQueueType, KilnResult, KilnTextureUsage,
};

/// Where a command buffer is in its lifecycle. A buffer starts `Idle`, moves between `Idle` and
/// `Encoding` once per pass, and ends `Submitted`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum KilnCommandBufferState {
    Idle,
    Encoding(KilnPassKind),
    Submitted,
}

/// Records passes into a native command list and hands it to its queue on `commit`.
///
/// At most one pass is open at a time, draws only happen inside render passes and dispatches
/// only inside compute passes. A command buffer is recorded through `&mut self`, so it can be
/// moved to another thread but never recorded from two at once.
#[derive(Debug)]
pub struct KilnCommandBuffer {
    queue: KilnQueue,
    // None once committed
    command_list: Option<KilnNativeHandle>,
    execution_order: u64,
    state: KilnCommandBufferState,
}

impl KilnCommandBuffer {
    pub fn new(
        queue: &KilnQueue,
        command_buffer_def: &KilnCommandBufferDef,
    ) -> KilnResult<KilnCommandBuffer> {
        let device_context = queue.device_context();
        device_context.check_not_destroyed()?;

        let command_list = queue
            .inner()
            .acquire_command_list(&**device_context.backend(), device_context.frame_fence())?;

        let execution_order = match command_buffer_def.execution_order {
            Some(execution_order) => execution_order,
            None => queue.inner().reserve_execution_order(),
        };

        log::trace!(
            "Created command buffer on {:?} queue with execution order {}",
            queue.queue_type(),
            execution_order
        );

        Ok(KilnCommandBuffer {
            queue: queue.clone(),
            command_list: Some(command_list),
            execution_order,
            state: KilnCommandBufferState::Idle,
        })
    }

    pub fn queue(&self) -> &KilnQueue {
        &self.queue
    }

    pub fn state(&self) -> KilnCommandBufferState {
        self.state
    }

    pub fn execution_order(&self) -> u64 {
        self.execution_order
    }

    /// The native list being recorded. None once committed.
    pub fn command_list(&self) -> Option<KilnNativeHandle> {
        self.command_list
    }

    fn record(
        &self,
        command: KilnNativeCommand,
    ) -> KilnResult<()> {
        let command_list = self.command_list.ok_or_else(|| {
            invalid_operation("Recorded into a command buffer that was committed".to_string())
        })?;

        self.queue
            .device_context()
            .backend()
            .record_command(command_list, &command)
    }

    fn begin_pass(
        &self,
        pass_kind: KilnPassKind,
    ) -> KilnResult<()> {
        match self.state {
            KilnCommandBufferState::Idle => Ok(()),
            KilnCommandBufferState::Encoding(open_pass) => Err(invalid_operation(format!(
                "Tried to begin a {:?} pass while a {:?} pass is still open",
                pass_kind, open_pass
            ))),
            KilnCommandBufferState::Submitted => Err(invalid_operation(format!(
                "Tried to begin a {:?} pass on a command buffer that was already committed",
                pass_kind
            ))),
        }
    }

    /// Bind the given attachments and apply their load ops. Render target views are allocated
    /// from the linear heaps, so they are only valid for the frame being recorded.
    pub fn begin_render_pass(
        &mut self,
        color_targets: &[KilnColorRenderTargetBinding],
        depth_target: Option<KilnDepthStencilRenderTargetBinding>,
    ) -> KilnResult<()> {
        self.begin_pass(KilnPassKind::Render)?;

        if self.queue.queue_type() != KilnQueueType::Graphics {
            return Err(invalid_operation(format!(
                "Render passes can't be recorded on a {:?} queue",
                self.queue.queue_type()
            )));
        }

        for color_target in color_targets {
            if !color_target
                .texture
                .texture_def()
                .usage
                .contains(KilnTextureUsage::RENDER_TARGET)
            {
                return Err(invalid_operation(format!(
                    "Texture {:?} bound as a color target without RENDER_TARGET usage",
                    color_target.texture.native()
                )));
            }
        }

        if let Some(depth_target) = &depth_target {
            if !depth_target
                .texture
                .texture_def()
                .usage
                .contains(KilnTextureUsage::DEPTH_STENCIL)
            {
                return Err(invalid_operation(format!(
                    "Texture {:?} bound as a depth target without DEPTH_STENCIL usage",
                    depth_target.texture.native()
                )));
            }
        }

        let device_context = self.queue.device_context().clone();
        let backend = device_context.backend();

        let mut color_views = Vec::with_capacity(color_targets.len());
        if !color_targets.is_empty() {
            let rtvs = device_context.allocate_linear_descriptors(
                KilnDescriptorHeapType::Rtv,
                false,
                color_targets.len() as u32,
            )?;

            for (i, color_target) in color_targets.iter().enumerate() {
                let view = rtvs.cpu_address_at(i as u32).ok_or_else(|| {
                    KilnError::StringError(format!(
                        "Linear RTV range {:?} is shorter than {} color targets",
                        rtvs,
                        color_targets.len()
                    ))
                })?;
                backend.create_view(
                    KilnDescriptorHeapType::Rtv,
                    color_target.texture.native(),
                    view,
                )?;
                color_views.push(view);
            }
        }

        let mut depth_stencil_view = None;
        if let Some(depth_target) = &depth_target {
            let dsv =
                device_context.allocate_linear_descriptors(KilnDescriptorHeapType::Dsv, false, 1)?;
            backend.create_view(
                KilnDescriptorHeapType::Dsv,
                depth_target.texture.native(),
                dsv.cpu_address(),
            )?;
            depth_stencil_view = Some(dsv.cpu_address());
        }

        self.record(KilnNativeCommand::SetRenderTargets {
            color_views: color_views.clone(),
            depth_stencil_view,
        })?;

        for (color_target, view) in color_targets.iter().zip(color_views) {
            match color_target.load_op {
                KilnLoadOp::Clear => self.record(KilnNativeCommand::ClearRenderTarget {
                    view,
                    color: color_target.clear_value.0,
                })?,
                KilnLoadOp::DontCare => self.record(KilnNativeCommand::DiscardView { view })?,
                KilnLoadOp::Load => {}
            }
        }

        if let (Some(depth_target), Some(view)) = (&depth_target, depth_stencil_view) {
            let mut flags = KilnClearFlags::empty();
            if depth_target.depth_load_op == KilnLoadOp::Clear {
                flags |= KilnClearFlags::DEPTH;
            }
            if depth_target.stencil_load_op == KilnLoadOp::Clear {
                flags |= KilnClearFlags::STENCIL;
            }

            if !flags.is_empty() {
                self.record(KilnNativeCommand::ClearDepthStencil {
                    view,
                    flags,
                    depth: depth_target.clear_value.depth,
                    stencil: depth_target.clear_value.stencil,
                })?;
            } else if depth_target.depth_load_op == KilnLoadOp::DontCare
                && depth_target.stencil_load_op == KilnLoadOp::DontCare
            {
                self.record(KilnNativeCommand::DiscardView { view })?;
            }
        }

        self.state = KilnCommandBufferState::Encoding(KilnPassKind::Render);
        Ok(())
    }

    pub fn begin_compute_pass(&mut self) -> KilnResult<()> {
        self.begin_pass(KilnPassKind::Compute)?;

        if self.queue.queue_type() == KilnQueueType::Transfer {
            return Err(invalid_operation(
                "Compute passes can't be recorded on a transfer queue".to_string(),
            ));
        }

        self.state = KilnCommandBufferState::Encoding(KilnPassKind::Compute);
        Ok(())
    }

    fn require_pass(
        &self,
        pass_kind: KilnPassKind,
        operation: &str,
    ) -> KilnResult<()> {
        if self.state == KilnCommandBufferState::Encoding(pass_kind) {
            Ok(())
        } else {
            Err(invalid_operation(format!(
                "{} requires an open {:?} pass, but the command buffer is {:?}",
                operation, pass_kind, self.state
            )))
        }
    }

    pub fn cmd_draw(
        &mut self,
        vertex_count: u32,
        first_vertex: u32,
    ) -> KilnResult<()> {
        self.cmd_draw_instanced(vertex_count, first_vertex, 1, 0)
    }

    pub fn cmd_draw_instanced(
        &mut self,
        vertex_count: u32,
        first_vertex: u32,
        instance_count: u32,
        first_instance: u32,
    ) -> KilnResult<()> {
        self.require_pass(KilnPassKind::Render, "cmd_draw")?;
        self.record(KilnNativeCommand::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        })
    }

    pub fn cmd_dispatch(
        &mut self,
        group_count_x: u32,
        group_count_y: u32,
        group_count_z: u32,
    ) -> KilnResult<()> {
        self.require_pass(KilnPassKind::Compute, "cmd_dispatch")?;
        self.record(KilnNativeCommand::Dispatch {
            group_count_x,
            group_count_y,
            group_count_z,
        })
    }

    pub fn end_pass(&mut self) -> KilnResult<()> {
        match self.state {
            KilnCommandBufferState::Encoding(KilnPassKind::Render) => {
                self.record(KilnNativeCommand::UnbindRenderTargets)?;
            }
            KilnCommandBufferState::Encoding(KilnPassKind::Compute) => {}
            state => {
                return Err(invalid_operation(format!(
                    "end_pass called with no open pass, the command buffer is {:?}",
                    state
                )));
            }
        }

        self.state = KilnCommandBufferState::Idle;
        Ok(())
    }

    /// Close the command list and hand it to the queue. It executes on the next
    /// `KilnQueue::submit` (or `advance_frame`), ordered by this buffer's execution order.
    pub fn commit(&mut self) -> KilnResult<()> {
        match self.state {
            KilnCommandBufferState::Idle => {}
            KilnCommandBufferState::Encoding(pass_kind) => {
                return Err(invalid_operation(format!(
                    "Tried to commit while a {:?} pass is open",
                    pass_kind
                )));
            }
            KilnCommandBufferState::Submitted => {
                return Err(invalid_operation(
                    "Tried to commit a command buffer twice".to_string(),
                ));
            }
        }

        let device_context = self.queue.device_context();
        device_context.check_not_destroyed()?;

        let command_list = self.command_list.ok_or(KilnError::DeviceDestroyed)?;
        device_context.backend().close_command_list(command_list)?;
        self.queue.inner().commit(KilnCommittedCommandList {
            execution_order: self.execution_order,
            command_list,
        })?;

        self.command_list = None;
        self.state = KilnCommandBufferState::Submitted;
        Ok(())
    }
}

impl Drop for KilnCommandBuffer {
    fn drop(&mut self) {
        if let Some(command_list) = self.command_list.take() {
            let device_context = self.queue.device_context();
            if device_context.is_destroyed() {
                // Not in any pool, so teardown could not have released it
                device_context.backend().release(command_list);
            } else {
                // Never executed, so the GPU can't be using it
                self.queue.inner().return_command_list(command_list, 0);
            }
        }
    }
}
