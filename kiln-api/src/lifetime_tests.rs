use crate::backends::null::{KilnNullBackend, KilnNullRetireMode};
use crate::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// Lets the simulated GPU finish everything before the device is torn down, otherwise waiting
// for idle would block forever in manual retire mode
struct TestApi {
    backend: Arc<KilnNullBackend>,
    api: KilnApi,
}

impl TestApi {
    fn device_context(&self) -> Option<KilnDeviceContext> {
        self.api.device_context()
    }

    fn destroy(&mut self) -> KilnResult<()> {
        self.backend.set_retire_mode(KilnNullRetireMode::Immediate);
        self.api.destroy()
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        self.backend.set_retire_mode(KilnNullRetireMode::Immediate);
    }
}

fn create_api_with_def(
    retire_mode: KilnNullRetireMode,
    api_def: &KilnApiDef,
) -> (Arc<KilnNullBackend>, TestApi, KilnDeviceContext) {
    init_logging();
    let backend = Arc::new(KilnNullBackend::new(retire_mode));
    let api = KilnApi::new(backend.clone(), api_def).unwrap();
    let device_context = api.device_context().unwrap();
    let api = TestApi {
        backend: backend.clone(),
        api,
    };
    (backend, api, device_context)
}

fn create_api(
    retire_mode: KilnNullRetireMode,
    render_latency: u32,
) -> (Arc<KilnNullBackend>, TestApi, KilnDeviceContext) {
    let api_def = KilnApiDef {
        render_latency,
        ..Default::default()
    };
    create_api_with_def(retire_mode, &api_def)
}

// Retires GPU work in the background until dropped
struct GpuThread {
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl GpuThread {
    fn spawn(backend: &Arc<KilnNullBackend>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let thread = {
            let backend = backend.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    std::thread::sleep(Duration::from_millis(1));
                    backend.retire_through(u64::MAX);
                }
            })
        };

        GpuThread {
            stop,
            thread: Some(thread),
        }
    }
}

impl Drop for GpuThread {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            thread.join().unwrap();
        }
    }
}

#[test]
fn idle_destroy_is_immediate() {
    let (backend, _api, device_context) = create_api(KilnNullRetireMode::Immediate, 2);
    let buffer = device_context
        .create_buffer(&KilnBufferDef::for_uniform_buffer(256))
        .unwrap();
    let native = buffer.native();
    assert!(buffer.view().is_some());
    assert_eq!(device_context.resource_count(), 1);

    drop(buffer);
    assert!(backend.is_released(native));
    assert_eq!(device_context.pending_release_count(), 0);
    assert_eq!(device_context.resource_count(), 0);
}

#[test]
fn in_flight_destroy_waits_for_fence() {
    let (backend, _api, device_context) = create_api(KilnNullRetireMode::Manual, 3);
    let buffer = device_context
        .create_buffer(&KilnBufferDef::for_uniform_buffer(256))
        .unwrap();
    let native = buffer.native();

    device_context.advance_frame().unwrap();
    device_context.advance_frame().unwrap();
    for gpu_frame in 1..=3 {
        backend.retire_through(gpu_frame);
        device_context.advance_frame().unwrap();
    }

    let counters = device_context.frame_counters();
    assert_eq!(counters.cpu_frame(), 5);
    assert_eq!(counters.gpu_frame(), 3);

    // The buffer and its persistent view
    drop(buffer);
    assert!(!backend.is_released(native));
    assert_eq!(device_context.pending_release_count(), 2);

    backend.retire_through(5);
    device_context.advance_frame().unwrap();
    assert_eq!(device_context.frame_counters().gpu_frame(), 5);
    assert!(!backend.is_released(native));

    backend.retire_through(6);
    device_context.advance_frame().unwrap();
    assert_eq!(device_context.frame_counters().gpu_frame(), 6);
    assert!(backend.is_released(native));
    assert_eq!(device_context.pending_release_count(), 0);
}

#[test]
fn gap_stays_within_render_latency() {
    let (backend, _api, device_context) = create_api(KilnNullRetireMode::Manual, 2);
    let _gpu = GpuThread::spawn(&backend);

    let mut last_gpu_frame = 0;
    for _ in 0..30 {
        device_context.advance_frame().unwrap();
        let counters = device_context.frame_counters();
        assert!(counters.gpu_frame() <= counters.cpu_frame());
        assert!(counters.frames_in_flight() <= device_context.render_latency() as u64);
        assert!(counters.gpu_frame() >= last_gpu_frame);
        last_gpu_frame = counters.gpu_frame();
    }
}

#[test]
fn resource_used_by_a_frame_outlives_it() {
    let (backend, _api, device_context) = create_api(KilnNullRetireMode::Manual, 3);
    let queue = device_context.queue(KilnQueueType::Graphics);

    device_context.advance_frame().unwrap();
    let recorded_frame = device_context.frame_counters().cpu_frame();

    let texture = device_context
        .create_texture(&KilnTextureDef::for_render_target(64, 64))
        .unwrap();
    let native = texture.native();

    let mut command_buffer = queue
        .create_command_buffer(&KilnCommandBufferDef::default())
        .unwrap();
    command_buffer
        .begin_render_pass(
            &[KilnColorRenderTargetBinding {
                texture: &texture,
                load_op: KilnLoadOp::Clear,
                clear_value: KilnColorClearValue([0.0, 0.0, 0.0, 1.0]),
            }],
            None,
        )
        .unwrap();
    command_buffer.cmd_draw(3, 0).unwrap();
    command_buffer.end_pass().unwrap();
    command_buffer.commit().unwrap();
    drop(texture);

    // Step the GPU forward one frame at a time
    for _ in 0..4 {
        device_context.advance_frame().unwrap();
        let gpu_frame = device_context.frame_counters().gpu_frame();
        backend.retire_through(gpu_frame + 1);

        if backend.is_released(native) {
            assert!(device_context
                .is_frame_signaled(recorded_frame + 1)
                .unwrap());
        }
    }

    assert!(backend.is_released(native));
}

#[test]
fn persistent_heap_overflow_is_exhausted() {
    let mut api_def = KilnApiDef::default();
    api_def.persistent_descriptor_counts.cbv_srv_uav = 2;
    let (backend, _api, device_context) =
        create_api_with_def(KilnNullRetireMode::Immediate, &api_def);

    let _a = device_context
        .create_buffer(&KilnBufferDef::for_uniform_buffer(16))
        .unwrap();
    let _b = device_context
        .create_buffer(&KilnBufferDef::for_uniform_buffer(16))
        .unwrap();
    let live_objects = backend.live_object_count();

    let result = device_context.create_buffer(&KilnBufferDef::for_uniform_buffer(16));
    assert_eq!(
        result.err(),
        Some(KilnError::Exhausted {
            heap_type: KilnDescriptorHeapType::CbvSrvUav,
            shader_visible: false,
            capacity: 2,
        })
    );

    // The native buffer created before the descriptor allocation failed was released
    assert_eq!(backend.live_object_count(), live_objects);
    assert_eq!(device_context.resource_count(), 2);

    // Buffers without views don't need a descriptor
    let vertex_buffer = KilnBufferDef {
        size: 16,
        usage: KilnBufferUsage::VERTEX,
        transient: false,
    };
    assert!(device_context.create_buffer(&vertex_buffer).is_ok());
}

#[test]
fn freed_descriptor_slot_is_reused() {
    let (_backend, _api, device_context) = create_api(KilnNullRetireMode::Immediate, 2);
    let texture_def = KilnTextureDef::for_render_target(16, 16);

    let a = device_context.create_texture(&texture_def).unwrap();
    let b = device_context.create_texture(&texture_def).unwrap();
    let c = device_context.create_texture(&texture_def).unwrap();

    let freed_index = b.srv().unwrap().index();
    assert_ne!(a.srv().unwrap().index(), freed_index);
    assert_ne!(c.srv().unwrap().index(), freed_index);

    drop(b);
    let d = device_context.create_texture(&texture_def).unwrap();
    assert_eq!(d.srv().unwrap().index(), freed_index);
}

#[test]
fn released_descriptor_waits_for_fence() {
    let (_backend, _api, device_context) = create_api(KilnNullRetireMode::Immediate, 2);
    let descriptor = device_context
        .allocate_persistent_descriptor(KilnDescriptorHeapType::Sampler, true)
        .unwrap();
    assert!(descriptor.gpu_address().is_some());

    device_context.release_descriptor(&descriptor, true).unwrap();
    assert_eq!(device_context.pending_release_count(), 1);

    // Still allocated, so freeing it directly would be a double free later on
    let next = device_context
        .allocate_persistent_descriptor(KilnDescriptorHeapType::Sampler, true)
        .unwrap();
    assert_ne!(next.index(), descriptor.index());

    device_context.advance_frame().unwrap();
    assert_eq!(device_context.pending_release_count(), 0);
    assert!(matches!(
        device_context.free_persistent_descriptor(&descriptor),
        Err(KilnError::InvalidOperation(_))
    ));
}

#[test]
fn passes_are_exclusive() {
    let (_backend, _api, device_context) = create_api(KilnNullRetireMode::Immediate, 2);
    let texture = device_context
        .create_texture(&KilnTextureDef::for_render_target(16, 16))
        .unwrap();
    let color_targets = [KilnColorRenderTargetBinding {
        texture: &texture,
        load_op: KilnLoadOp::Load,
        clear_value: Default::default(),
    }];

    let queue = device_context.queue(KilnQueueType::Graphics);
    let mut command_buffer = queue
        .create_command_buffer(&KilnCommandBufferDef::default())
        .unwrap();
    assert_eq!(command_buffer.state(), KilnCommandBufferState::Idle);

    command_buffer.begin_compute_pass().unwrap();
    assert_eq!(
        command_buffer.state(),
        KilnCommandBufferState::Encoding(KilnPassKind::Compute)
    );

    assert!(matches!(
        command_buffer.begin_render_pass(&color_targets, None),
        Err(KilnError::InvalidOperation(_))
    ));
    assert!(matches!(
        command_buffer.cmd_draw(3, 0),
        Err(KilnError::InvalidOperation(_))
    ));
    assert!(matches!(
        command_buffer.commit(),
        Err(KilnError::InvalidOperation(_))
    ));

    command_buffer.cmd_dispatch(1, 1, 1).unwrap();
    command_buffer.end_pass().unwrap();
    assert!(matches!(
        command_buffer.end_pass(),
        Err(KilnError::InvalidOperation(_))
    ));
    assert!(matches!(
        command_buffer.cmd_dispatch(1, 1, 1),
        Err(KilnError::InvalidOperation(_))
    ));

    command_buffer
        .begin_render_pass(&color_targets, None)
        .unwrap();
    command_buffer.end_pass().unwrap();

    command_buffer.commit().unwrap();
    assert_eq!(command_buffer.state(), KilnCommandBufferState::Submitted);
    assert!(command_buffer.commit().is_err());
    assert!(command_buffer.begin_compute_pass().is_err());
}

#[test]
fn render_pass_requires_render_target_usage() {
    let (_backend, _api, device_context) = create_api(KilnNullRetireMode::Immediate, 2);
    let sampled_only = device_context
        .create_texture(&KilnTextureDef {
            extents: KilnExtents3D {
                width: 8,
                height: 8,
                depth: 1,
            },
            ..Default::default()
        })
        .unwrap();

    let queue = device_context.queue(KilnQueueType::Graphics);
    let mut command_buffer = queue
        .create_command_buffer(&KilnCommandBufferDef::default())
        .unwrap();
    let result = command_buffer.begin_render_pass(
        &[KilnColorRenderTargetBinding {
            texture: &sampled_only,
            load_op: KilnLoadOp::Clear,
            clear_value: Default::default(),
        }],
        None,
    );
    assert!(matches!(result, Err(KilnError::InvalidOperation(_))));
    assert_eq!(command_buffer.state(), KilnCommandBufferState::Idle);

    let compute_queue = device_context.queue(KilnQueueType::Compute);
    let mut compute_command_buffer = compute_queue
        .create_command_buffer(&KilnCommandBufferDef::default())
        .unwrap();
    assert!(compute_command_buffer
        .begin_render_pass(&[], None)
        .is_err());
    compute_command_buffer.begin_compute_pass().unwrap();
}

#[test]
fn render_pass_applies_load_ops() {
    let (backend, _api, device_context) = create_api(KilnNullRetireMode::Immediate, 2);
    let cleared = device_context
        .create_texture(&KilnTextureDef::for_render_target(16, 16))
        .unwrap();
    let discarded = device_context
        .create_texture(&KilnTextureDef::for_render_target(16, 16))
        .unwrap();
    let depth = device_context
        .create_texture(&KilnTextureDef::for_depth_target(16, 16))
        .unwrap();

    let queue = device_context.queue(KilnQueueType::Graphics);
    let mut command_buffer = queue
        .create_command_buffer(&KilnCommandBufferDef::default())
        .unwrap();
    command_buffer
        .begin_render_pass(
            &[
                KilnColorRenderTargetBinding {
                    texture: &cleared,
                    load_op: KilnLoadOp::Clear,
                    clear_value: KilnColorClearValue([1.0, 0.0, 0.0, 1.0]),
                },
                KilnColorRenderTargetBinding {
                    texture: &discarded,
                    load_op: KilnLoadOp::DontCare,
                    clear_value: Default::default(),
                },
            ],
            Some(KilnDepthStencilRenderTargetBinding {
                texture: &depth,
                depth_load_op: KilnLoadOp::Clear,
                stencil_load_op: KilnLoadOp::Clear,
                clear_value: KilnDepthStencilClearValue {
                    depth: 1.0,
                    stencil: 0,
                },
            }),
        )
        .unwrap();
    command_buffer.cmd_draw(3, 0).unwrap();
    command_buffer.end_pass().unwrap();
    command_buffer.commit().unwrap();
    assert_eq!(queue.submit().unwrap(), 1);

    let executions = backend.executions();
    assert_eq!(executions.len(), 1);
    let commands = &executions[0].commands;

    let (color_views, depth_view) = match &commands[0] {
        KilnNativeCommand::SetRenderTargets {
            color_views,
            depth_stencil_view,
        } => (color_views.clone(), depth_stencil_view.unwrap()),
        other => panic!("Expected render targets to be bound first, got {:?}", other),
    };

    // Both color views come from one linear allocation
    assert_eq!(color_views.len(), 2);
    assert_eq!(color_views[1], color_views[0] + 32);

    assert_eq!(
        &commands[1..],
        &[
            KilnNativeCommand::ClearRenderTarget {
                view: color_views[0],
                color: [1.0, 0.0, 0.0, 1.0],
            },
            KilnNativeCommand::DiscardView {
                view: color_views[1]
            },
            KilnNativeCommand::ClearDepthStencil {
                view: depth_view,
                flags: KilnClearFlags::DEPTH | KilnClearFlags::STENCIL,
                depth: 1.0,
                stencil: 0,
            },
            KilnNativeCommand::Draw {
                vertex_count: 3,
                instance_count: 1,
                first_vertex: 0,
                first_instance: 0,
            },
            KilnNativeCommand::UnbindRenderTargets,
        ]
    );
}

#[test]
fn submission_follows_execution_order() {
    let (backend, _api, device_context) = create_api(KilnNullRetireMode::Immediate, 2);
    let queue = device_context.queue(KilnQueueType::Compute);

    let mut command_buffers: Vec<_> = (0..3)
        .map(|_| {
            queue
                .create_command_buffer(&KilnCommandBufferDef::default())
                .unwrap()
        })
        .collect();
    let expected_order: Vec<_> = command_buffers
        .iter()
        .map(|x| x.command_list().unwrap())
        .collect();
    assert!(command_buffers[0].execution_order() < command_buffers[1].execution_order());
    assert!(command_buffers[1].execution_order() < command_buffers[2].execution_order());

    // Commit 3, 1, 2 from different threads
    let third = command_buffers.pop().unwrap();
    let second = command_buffers.pop().unwrap();
    let first = command_buffers.pop().unwrap();
    for mut command_buffer in vec![third, first, second] {
        std::thread::spawn(move || {
            command_buffer.begin_compute_pass().unwrap();
            command_buffer.cmd_dispatch(1, 1, 1).unwrap();
            command_buffer.end_pass().unwrap();
            command_buffer.commit().unwrap();
        })
        .join()
        .unwrap();
    }

    assert_eq!(queue.submit().unwrap(), 3);
    assert_eq!(backend.executed_command_lists(), expected_order);
}

#[test]
fn explicit_execution_order_runs_first() {
    let (backend, _api, device_context) = create_api(KilnNullRetireMode::Immediate, 2);
    let queue = device_context.queue(KilnQueueType::Graphics);

    let mut late = queue
        .create_command_buffer(&KilnCommandBufferDef::default())
        .unwrap();
    let mut early = queue
        .create_command_buffer(&KilnCommandBufferDef {
            execution_order: Some(0),
        })
        .unwrap();
    let late_list = late.command_list().unwrap();
    let early_list = early.command_list().unwrap();

    late.commit().unwrap();
    early.commit().unwrap();

    // advance_frame flushes every queue before signaling
    device_context.advance_frame().unwrap();
    assert_eq!(backend.executed_command_lists(), vec![early_list, late_list]);
}

#[test]
fn command_lists_are_reused_after_fence() {
    let (backend, _api, device_context) = create_api(KilnNullRetireMode::Manual, 3);
    let queue = device_context.queue(KilnQueueType::Graphics);

    let mut first = queue
        .create_command_buffer(&KilnCommandBufferDef::default())
        .unwrap();
    let list_a = first.command_list().unwrap();
    first.commit().unwrap();
    queue.submit().unwrap();
    drop(first);
    assert_eq!(queue.pooled_command_list_count(), 1);

    // list_a was executed during frame 0 and the GPU hasn't finished it
    let second = queue
        .create_command_buffer(&KilnCommandBufferDef::default())
        .unwrap();
    let list_b = second.command_list().unwrap();
    assert_ne!(list_a, list_b);

    // Never executed, so it can be reused right away
    drop(second);
    let third = queue
        .create_command_buffer(&KilnCommandBufferDef::default())
        .unwrap();
    assert_eq!(third.command_list(), Some(list_b));
    drop(third);

    device_context.advance_frame().unwrap();
    backend.retire_through(1);

    let fourth = queue
        .create_command_buffer(&KilnCommandBufferDef::default())
        .unwrap();
    assert_eq!(fourth.command_list(), Some(list_a));
}

#[test]
fn linear_heap_is_retired_through_deferred_queue() {
    let mut api_def = KilnApiDef::default();
    api_def.linear_descriptor_counts.rtv = 4;
    let (backend, _api, device_context) =
        create_api_with_def(KilnNullRetireMode::Immediate, &api_def);

    let first = device_context
        .allocate_linear_descriptors(KilnDescriptorHeapType::Rtv, false, 3)
        .unwrap();
    let second = device_context
        .allocate_linear_descriptors(KilnDescriptorHeapType::Rtv, false, 2)
        .unwrap();

    let retired_heap = first.heap();
    assert_ne!(second.heap(), retired_heap);
    assert!(!device_context.is_linear_descriptor_current(&first));
    assert!(device_context.is_linear_descriptor_current(&second));

    // Frames recorded with the old heap may still be in flight
    assert!(backend.is_live(retired_heap));
    assert_eq!(device_context.pending_release_count(), 1);

    device_context.advance_frame().unwrap();
    assert!(backend.is_released(retired_heap));
    assert!(backend.is_live(second.heap()));

    assert!(matches!(
        device_context.allocate_linear_descriptors(KilnDescriptorHeapType::Rtv, false, 5),
        Err(KilnError::InvalidOperation(_))
    ));
}

#[test]
fn transient_buffers_are_always_deferred() {
    let (backend, _api, device_context) = create_api(KilnNullRetireMode::Immediate, 2);
    assert!(device_context.frame_counters().is_idle());

    let buffer = device_context
        .create_buffer(&KilnBufferDef::for_transient_vertex_buffer(1024))
        .unwrap();
    let native = buffer.native();
    drop(buffer);
    assert!(!backend.is_released(native));

    device_context.advance_frame().unwrap();
    assert!(backend.is_released(native));
}

#[test]
fn resources_created_in_flight_are_deferred() {
    let (backend, _api, device_context) = create_api(KilnNullRetireMode::Manual, 2);
    device_context.advance_frame().unwrap();
    assert!(!device_context.frame_counters().is_idle());

    let sampler = device_context
        .create_sampler(&KilnSamplerDef::default())
        .unwrap();
    let native = sampler.native();

    backend.set_retire_mode(KilnNullRetireMode::Immediate);
    device_context.advance_frame().unwrap();
    assert!(device_context.frame_counters().is_idle());

    drop(sampler);
    assert!(!backend.is_released(native));
    device_context.advance_frame().unwrap();
    assert!(backend.is_released(native));
}

#[test]
fn wait_idle_releases_everything() {
    let (backend, _api, device_context) = create_api(KilnNullRetireMode::Manual, 3);
    device_context.advance_frame().unwrap();

    let buffers: Vec<_> = (0..4)
        .map(|_| {
            device_context
                .create_buffer(&KilnBufferDef::for_uniform_buffer(64))
                .unwrap()
        })
        .collect();
    let natives: Vec<_> = buffers.iter().map(|x| x.native()).collect();
    drop(buffers);
    assert_eq!(device_context.pending_release_count(), 8);

    let _gpu = GpuThread::spawn(&backend);
    device_context.wait_idle().unwrap();
    assert!(device_context.frame_counters().is_idle());
    assert_eq!(device_context.pending_release_count(), 0);
    for native in natives {
        assert!(backend.is_released(native));
    }
}

#[test]
fn teardown_destroys_aggregates_first() {
    let (backend, mut api, device_context) = create_api(KilnNullRetireMode::Immediate, 2);

    let buffer = device_context
        .create_buffer(&KilnBufferDef::for_uniform_buffer(64))
        .unwrap();
    let texture = device_context
        .create_texture(&KilnTextureDef::for_render_target(32, 32))
        .unwrap();
    let sampler = device_context
        .create_sampler(&KilnSamplerDef::default())
        .unwrap();
    let swapchain = device_context
        .create_swapchain(&KilnSwapchainDef {
            width: 32,
            height: 32,
            image_count: 3,
        })
        .unwrap();
    buffer.set_debug_name("leaked buffer");

    let queue = device_context.queue(KilnQueueType::Graphics);
    let mut command_buffer = queue
        .create_command_buffer(&KilnCommandBufferDef::default())
        .unwrap();
    command_buffer.begin_compute_pass().unwrap();
    command_buffer.end_pass().unwrap();
    command_buffer.commit().unwrap();
    device_context.advance_frame().unwrap();

    assert_eq!(device_context.resource_count(), 7);
    api.destroy().unwrap();
    assert_eq!(device_context.resource_count(), 0);

    let released = backend.released_handles();
    let position = |handle: KilnNativeHandle| released.iter().position(|x| *x == handle).unwrap();

    let swapchain_position = position(swapchain.native());
    for image in swapchain.images() {
        assert!(swapchain_position < position(image.native()));
    }
    assert!(swapchain_position < position(texture.native()));
    assert!(position(texture.native()) < position(buffer.native()));
    assert!(position(buffer.native()) < position(sampler.native()));

    // Dropping after teardown must not release anything a second time
    drop(swapchain);
    drop(texture);
    drop(buffer);
    drop(sampler);
    assert_eq!(backend.double_release_count(), 0);
    assert_eq!(backend.live_object_count(), 0);

    assert!(matches!(
        device_context.advance_frame(),
        Err(KilnError::DeviceDestroyed)
    ));
    assert!(matches!(
        device_context.create_buffer(&KilnBufferDef::for_uniform_buffer(64)),
        Err(KilnError::DeviceDestroyed)
    ));
    assert!(api.device_context().is_none());
}

#[test]
fn command_buffer_outliving_device_is_released() {
    let (backend, mut api, device_context) = create_api(KilnNullRetireMode::Immediate, 2);
    let queue = device_context.queue(KilnQueueType::Transfer);
    let command_buffer = queue
        .create_command_buffer(&KilnCommandBufferDef::default())
        .unwrap();
    let command_list = command_buffer.command_list().unwrap();

    api.destroy().unwrap();
    assert!(backend.is_live(command_list));

    drop(command_buffer);
    assert!(backend.is_released(command_list));
    assert_eq!(backend.live_object_count(), 0);
}

#[test]
fn swapchain_rebuild_defers_old_images() {
    let (backend, _api, device_context) = create_api(KilnNullRetireMode::Manual, 2);
    let mut swapchain = device_context
        .create_swapchain(&KilnSwapchainDef {
            width: 32,
            height: 32,
            image_count: 2,
        })
        .unwrap();
    let old_swapchain = swapchain.native();
    let old_image = swapchain.image(0).native();

    device_context.advance_frame().unwrap();
    swapchain
        .rebuild(&KilnSwapchainDef {
            width: 64,
            height: 48,
            image_count: 3,
        })
        .unwrap();

    assert_eq!(swapchain.image_count(), 3);
    assert_eq!(swapchain.image(2).texture_def().extents.width, 64);
    assert!(backend.is_live(old_swapchain));
    assert!(backend.is_live(old_image));

    backend.retire_through(1);
    device_context.advance_frame().unwrap();
    backend.retire_through(2);
    device_context.advance_frame().unwrap();
    assert!(backend.is_released(old_swapchain));
    assert!(backend.is_released(old_image));
}

#[test]
fn device_creation_failure_propagates() {
    init_logging();
    let backend = Arc::new(KilnNullBackend::new(KilnNullRetireMode::Immediate));
    backend.fail_next_creation();
    assert!(matches!(
        KilnApi::new(backend.clone(), &KilnApiDef::default()),
        Err(KilnError::DeviceCreationFailed(_))
    ));

    let api = KilnApi::new(backend.clone(), &KilnApiDef::default()).unwrap();
    let device_context = api.device_context().unwrap();
    backend.fail_next_creation();
    assert!(matches!(
        device_context.create_texture(&KilnTextureDef::for_render_target(8, 8)),
        Err(KilnError::DeviceCreationFailed(_))
    ));
    assert_eq!(device_context.resource_count(), 0);
}

#[test]
fn invalid_api_def_is_rejected() {
    init_logging();
    let backend = Arc::new(KilnNullBackend::new(KilnNullRetireMode::Immediate));
    let api_def = KilnApiDef {
        render_latency: 0,
        ..Default::default()
    };
    assert!(KilnApi::new(backend.clone(), &api_def).is_err());

    let mut api_def = KilnApiDef::default();
    api_def.persistent_descriptor_counts.dsv = 0;
    assert!(KilnApi::new(backend.clone(), &api_def).is_err());
    assert_eq!(backend.live_object_count(), 0);
}

#[test]
fn partial_device_creation_releases_everything() {
    init_logging();

    // Six descriptor heaps, then a queue and a fence per queue type
    let native_object_count = 12;
    for succeeding in 0..native_object_count {
        let backend = Arc::new(KilnNullBackend::new(KilnNullRetireMode::Immediate));
        backend.fail_creation_after(succeeding);
        assert!(matches!(
            KilnApi::new(backend.clone(), &KilnApiDef::default()),
            Err(KilnError::DeviceCreationFailed(_))
        ));
        assert_eq!(backend.live_object_count(), 0);
        assert_eq!(backend.released_handles().len(), succeeding as usize);
        assert_eq!(backend.double_release_count(), 0);
    }

    let backend = Arc::new(KilnNullBackend::new(KilnNullRetireMode::Immediate));
    let _api = KilnApi::new(backend.clone(), &KilnApiDef::default()).unwrap();
    assert_eq!(backend.live_object_count(), native_object_count as usize);
}

#[test]
fn failed_frame_wait_keeps_release_buckets_consistent() {
    let (backend, _api, device_context) = create_api(KilnNullRetireMode::Manual, 2);
    let transient = KilnBufferDef::for_transient_vertex_buffer(64);

    let first = device_context.create_buffer(&transient).unwrap();
    let first_native = first.native();
    drop(first);
    device_context.advance_frame().unwrap();
    let before = device_context.frame_counters();

    // The second advance has to wait for the GPU, and the wait fails
    backend.fail_next_wait();
    assert!(device_context.advance_frame().is_err());
    assert_eq!(device_context.frame_counters(), before);

    let second = device_context.create_buffer(&transient).unwrap();
    let second_native = second.native();
    drop(second);
    assert_eq!(device_context.pending_release_count(), 2);

    backend.retire_through(u64::MAX);
    device_context.advance_frame().unwrap();
    assert!(device_context.frame_counters().is_idle());
    assert!(backend.is_released(first_native));
    assert!(backend.is_released(second_native));
}

#[test]
fn destroy_can_be_retried_after_failed_wait() {
    init_logging();
    let backend = Arc::new(KilnNullBackend::new(KilnNullRetireMode::Manual));
    let mut api = KilnApi::new(backend.clone(), &KilnApiDef::default()).unwrap();
    let device_context = api.device_context().unwrap();
    device_context.advance_frame().unwrap();

    backend.fail_next_wait();
    assert!(api.destroy().is_err());
    assert!(api.device_context().is_some());
    assert!(!device_context.is_destroyed());

    backend.set_retire_mode(KilnNullRetireMode::Immediate);
    api.destroy().unwrap();
    assert!(api.device_context().is_none());
    assert!(device_context.is_destroyed());
    assert_eq!(backend.live_object_count(), 0);
}
