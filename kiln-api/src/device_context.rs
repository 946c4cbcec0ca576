use crate::backends::{KilnBackend, KilnNativeHandle, KilnNativeResourceDesc};
use crate::error::invalid_operation;
use crate::internal::{
    KilnDeferredRelease, KilnDeferredReleaseQueue, KilnDescriptorHandle, KilnDescriptorHeapSet,
    KilnDescriptorLifetime, KilnFenceTimeline, KilnFrameCounters, KilnFrameFence, KilnResourceId,
    KilnResourceRegistry, KilnTrackedResource,
};
use crate::queue::KilnQueueInner;
use crate::resource::KilnResource;
use crate::{
    KilnApiDef, KilnBuffer, KilnBufferDef, KilnDescriptorHeapType, KilnDeviceInfo, KilnError,
    KilnQueue, KilnQueueType, KilnResourceKind, KilnResult, KilnSampler, KilnSamplerDef,
    KilnSwapchain, KilnSwapchainDef, KilnTexture, KilnTextureDef,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

// The frame counters and the deferred buckets change together, so deciding whether a release can
// happen immediately is atomic with advancing the frame
struct KilnFrameState {
    counters: KilnFrameCounters,
    deferred: KilnDeferredReleaseQueue,
}

pub(crate) struct KilnDeviceContextInner {
    backend: Arc<dyn KilnBackend>,
    device_info: KilnDeviceInfo,
    api_def: KilnApiDef,

    registry: KilnResourceRegistry,
    frame: Mutex<KilnFrameState>,
    frame_fence: KilnFrameFence,
    heaps: KilnDescriptorHeapSet,
    // Indexed by KilnQueueType::index()
    queues: Vec<KilnQueueInner>,

    destroyed: AtomicBool,
}

impl Drop for KilnDeviceContextInner {
    fn drop(&mut self) {
        if !self.destroyed.load(Ordering::Acquire) {
            log::error!("KilnDeviceContext dropped without being destroyed, native objects leaked");
        }
    }
}

impl KilnDeviceContextInner {
    pub fn new(
        backend: Arc<dyn KilnBackend>,
        api_def: &KilnApiDef,
    ) -> KilnResult<Self> {
        api_def.verify()?;

        let device_info = backend.query_capabilities()?;
        log::info!(
            "Creating device on {} backend, render latency {}",
            device_info.backend_name,
            api_def.render_latency
        );

        let heaps = KilnDescriptorHeapSet::new(&backend, &device_info, api_def)?;

        let mut queues = Vec::with_capacity(KilnQueueType::ALL.len());
        let mut timelines: Vec<KilnFenceTimeline> = Vec::with_capacity(KilnQueueType::ALL.len());
        for &queue_type in KilnQueueType::ALL.iter() {
            debug_assert_eq!(queue_type.index(), queues.len());
            let created = backend.create_queue(queue_type).and_then(|queue| {
                match backend.create_fence(0) {
                    Ok(fence) => Ok((queue, fence)),
                    Err(e) => {
                        backend.release(queue);
                        Err(e)
                    }
                }
            });

            let (queue, fence) = match created {
                Ok(created) => created,
                Err(e) => {
                    log::error!("Failed to create {:?} queue: {}", queue_type, e);
                    for timeline in &timelines {
                        backend.release(timeline.fence);
                        backend.release(timeline.queue);
                    }
                    heaps.destroy();
                    return Err(e);
                }
            };

            queues.push(KilnQueueInner::new(queue_type, queue));
            timelines.push(KilnFenceTimeline { queue, fence });
        }

        let frame_fence = KilnFrameFence::new(backend.clone(), timelines, api_def.render_latency);

        Ok(KilnDeviceContextInner {
            backend,
            device_info,
            api_def: api_def.clone(),
            registry: KilnResourceRegistry::new(),
            frame: Mutex::new(KilnFrameState {
                counters: KilnFrameCounters::default(),
                deferred: KilnDeferredReleaseQueue::new(api_def.render_latency),
            }),
            frame_fence,
            heaps,
            queues,
            destroyed: AtomicBool::new(false),
        })
    }
}

/// Handle to a device. Cheap to clone, every resource holds one.
#[derive(Clone)]
pub struct KilnDeviceContext {
    pub(crate) inner: Arc<KilnDeviceContextInner>,
}

impl std::fmt::Debug for KilnDeviceContext {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter,
    ) -> std::fmt::Result {
        f.debug_struct("KilnDeviceContext")
            .field("backend", &self.inner.device_info.backend_name)
            .finish()
    }
}

impl KilnDeviceContext {
    pub(crate) fn new(inner: Arc<KilnDeviceContextInner>) -> Self {
        KilnDeviceContext { inner }
    }

    pub fn device_info(&self) -> &KilnDeviceInfo {
        &self.inner.device_info
    }

    pub fn api_def(&self) -> &KilnApiDef {
        &self.inner.api_def
    }

    pub fn backend(&self) -> &Arc<dyn KilnBackend> {
        &self.inner.backend
    }

    pub(crate) fn frame_fence(&self) -> &KilnFrameFence {
        &self.inner.frame_fence
    }

    pub(crate) fn queue_inner(
        &self,
        queue_type: KilnQueueType,
    ) -> &KilnQueueInner {
        &self.inner.queues[queue_type.index()]
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }

    pub(crate) fn check_not_destroyed(&self) -> KilnResult<()> {
        if self.is_destroyed() {
            Err(KilnError::DeviceDestroyed)
        } else {
            Ok(())
        }
    }

    pub fn frame_counters(&self) -> KilnFrameCounters {
        self.inner.frame.lock().unwrap().counters
    }

    pub fn render_latency(&self) -> u32 {
        self.inner.api_def.render_latency
    }

    /// Non-blocking check for whether the GPU has finished the given frame value. Callers that
    /// need a timeout should poll this.
    pub fn is_frame_signaled(
        &self,
        value: u64,
    ) -> KilnResult<bool> {
        self.check_not_destroyed()?;
        self.inner.frame_fence.is_signaled(value)
    }

    /// Number of live tracked resources
    pub fn resource_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Number of releases waiting on the GPU
    pub fn pending_release_count(&self) -> usize {
        self.inner.frame.lock().unwrap().deferred.len()
    }

    pub fn queue(
        &self,
        queue_type: KilnQueueType,
    ) -> KilnQueue {
        KilnQueue::new(self.clone(), queue_type)
    }

    fn flush_queues(
        &self,
        counters: &KilnFrameCounters,
    ) -> KilnResult<()> {
        for queue in &self.inner.queues {
            queue.flush(&*self.inner.backend, counters)?;
        }

        Ok(())
    }

    pub(crate) fn submit_queue(
        &self,
        queue_type: KilnQueueType,
    ) -> KilnResult<usize> {
        self.check_not_destroyed()?;
        let frame = self.inner.frame.lock().unwrap();
        self.queue_inner(queue_type)
            .flush(&*self.inner.backend, &frame.counters)
    }

    /// End the current CPU frame: execute everything committed on every queue, signal the frame
    /// fence, block if the CPU is `render_latency` frames ahead, and release whatever the GPU has
    /// finished with.
    pub fn advance_frame(&self) -> KilnResult<()> {
        profiling::scope!("KilnDeviceContext::advance_frame");
        self.check_not_destroyed()?;

        let retired = {
            let mut frame = self.inner.frame.lock().unwrap();
            let frame = &mut *frame;
            self.flush_queues(&frame.counters)?;
            self.inner.frame_fence.advance(&mut frame.counters)?;
            log::debug!(
                "Advanced to cpu frame {}, gpu frame {}",
                frame.counters.cpu_frame(),
                frame.counters.gpu_frame()
            );
            frame.deferred.drain_retired(frame.counters.gpu_frame())
        };

        self.release_now(retired);
        Ok(())
    }

    /// Block until the GPU has finished everything submitted so far and release everything that
    /// was waiting on it
    pub fn wait_idle(&self) -> KilnResult<()> {
        self.check_not_destroyed()?;
        self.wait_idle_internal()
    }

    fn wait_idle_internal(&self) -> KilnResult<()> {
        profiling::scope!("KilnDeviceContext::wait_idle");
        let retired = {
            let mut frame = self.inner.frame.lock().unwrap();
            let frame = &mut *frame;
            self.flush_queues(&frame.counters)?;
            self.inner.frame_fence.wait_idle(&mut frame.counters)?;
            frame.deferred.drain_all()
        };

        self.release_now(retired);
        Ok(())
    }

    /// Route a release through the deferred queue. Released immediately if nothing is in flight
    /// and `force_deferred` is false.
    pub(crate) fn release(
        &self,
        entries: Vec<KilnDeferredRelease>,
        force_deferred: bool,
    ) {
        let immediate: Vec<_> = {
            let mut frame = self.inner.frame.lock().unwrap();
            let KilnFrameState { counters, deferred } = &mut *frame;
            entries
                .into_iter()
                .filter_map(|entry| deferred.release(counters, entry, force_deferred))
                .collect()
        };

        self.release_now(immediate);
    }

    fn release_now(
        &self,
        entries: Vec<KilnDeferredRelease>,
    ) {
        for entry in entries {
            match entry {
                KilnDeferredRelease::Native(handle) => self.release_native(handle),
                KilnDeferredRelease::Descriptor(descriptor) => {
                    // Errors are logged at the point they are raised
                    let _ = self
                        .inner
                        .heaps
                        .heap_for_handle(&descriptor)
                        .and_then(|heap| heap.free_persistent(&descriptor));
                }
            }
        }
    }

    fn release_native(
        &self,
        handle: KilnNativeHandle,
    ) {
        log::trace!("release {:?}", handle);
        let remaining = self.inner.backend.release(handle);
        if remaining != 0 {
            log::warn!(
                "{:?} still has {} references after release, it will leak",
                handle,
                remaining
            );
        }
    }

    pub fn allocate_persistent_descriptor(
        &self,
        heap_type: KilnDescriptorHeapType,
        shader_visible: bool,
    ) -> KilnResult<KilnDescriptorHandle> {
        self.check_not_destroyed()?;
        self.inner
            .heaps
            .heap(heap_type, shader_visible)?
            .allocate_persistent()
    }

    /// Allocate descriptors that are only valid for the frame being recorded. If this replaces
    /// the active linear heap, the old one is released once the GPU is done with this frame.
    pub fn allocate_linear_descriptors(
        &self,
        heap_type: KilnDescriptorHeapType,
        shader_visible: bool,
        count: u32,
    ) -> KilnResult<KilnDescriptorHandle> {
        self.check_not_destroyed()?;
        let (handle, retired_heap) = self
            .inner
            .heaps
            .heap(heap_type, shader_visible)?
            .allocate_linear(count)?;

        if let Some(retired_heap) = retired_heap {
            log::debug!(
                "Retiring exhausted linear {:?} heap {:?}",
                heap_type,
                retired_heap
            );
            self.release(vec![KilnDeferredRelease::Native(retired_heap)], true);
        }

        Ok(handle)
    }

    pub fn is_linear_descriptor_current(
        &self,
        handle: &KilnDescriptorHandle,
    ) -> bool {
        self.inner
            .heaps
            .heap_for_handle(handle)
            .map(|heap| heap.is_linear_handle_current(handle))
            .unwrap_or(false)
    }

    /// Free a persistent descriptor right away. Only valid if the GPU can't be using it, otherwise
    /// use `release_descriptor`.
    pub fn free_persistent_descriptor(
        &self,
        handle: &KilnDescriptorHandle,
    ) -> KilnResult<()> {
        self.inner
            .heaps
            .heap_for_handle(handle)?
            .free_persistent(handle)
    }

    /// Free a persistent descriptor once the GPU is done with the current frame
    pub fn release_descriptor(
        &self,
        handle: &KilnDescriptorHandle,
        force_deferred: bool,
    ) -> KilnResult<()> {
        self.check_not_destroyed()?;
        if handle.lifetime() != KilnDescriptorLifetime::Persistent {
            return Err(invalid_operation(format!(
                "Only persistent descriptors can be released, got {:?}",
                handle
            )));
        }

        self.release(vec![KilnDeferredRelease::Descriptor(*handle)], force_deferred);
        Ok(())
    }

    /// Create a native resource, write a persistent view of it into each of `view_heaps`, and
    /// start tracking it. Nothing is leaked if any step fails.
    pub(crate) fn create_tracked_resource(
        &self,
        kind: KilnResourceKind,
        desc: KilnNativeResourceDesc,
        view_heaps: &[KilnDescriptorHeapType],
        force_deferred: bool,
    ) -> KilnResult<KilnResource> {
        self.check_not_destroyed()?;
        let native = self.inner.backend.create_resource(desc)?;

        let mut descriptors = Vec::with_capacity(view_heaps.len());
        for &heap_type in view_heaps {
            let result = self
                .allocate_persistent_descriptor(heap_type, false)
                .and_then(|descriptor| {
                    descriptors.push(descriptor);
                    self.inner
                        .backend
                        .create_view(heap_type, native, descriptor.cpu_address())
                });

            if let Err(e) = result {
                for descriptor in &descriptors {
                    let _ = self.free_persistent_descriptor(descriptor);
                }
                self.release_native(native);
                return Err(e);
            }
        }

        Ok(KilnResource::new(
            self.clone(),
            kind,
            native,
            descriptors,
            force_deferred,
        ))
    }

    pub(crate) fn track_resource(
        &self,
        kind: KilnResourceKind,
        native: KilnNativeHandle,
        descriptors: Vec<KilnDescriptorHandle>,
    ) -> KilnResourceId {
        self.inner.registry.track(kind, native, descriptors)
    }

    pub(crate) fn set_resource_debug_name(
        &self,
        id: KilnResourceId,
        name: String,
    ) {
        self.inner.registry.set_debug_name(id, name);
    }

    /// Called when a resource is dropped. A no-op if teardown already destroyed it.
    pub(crate) fn destroy_resource(
        &self,
        id: KilnResourceId,
        force_deferred: bool,
    ) {
        if let Some(tracked) = self.inner.registry.untrack(id) {
            self.release(release_entries(tracked), force_deferred);
        }
    }

    pub fn create_buffer(
        &self,
        buffer_def: &KilnBufferDef,
    ) -> KilnResult<KilnBuffer> {
        KilnBuffer::new(self, buffer_def)
    }

    pub fn create_texture(
        &self,
        texture_def: &KilnTextureDef,
    ) -> KilnResult<KilnTexture> {
        KilnTexture::new(self, texture_def)
    }

    pub fn create_sampler(
        &self,
        sampler_def: &KilnSamplerDef,
    ) -> KilnResult<KilnSampler> {
        KilnSampler::new(self, sampler_def)
    }

    pub fn create_swapchain(
        &self,
        swapchain_def: &KilnSwapchainDef,
    ) -> KilnResult<KilnSwapchain> {
        KilnSwapchain::new(self, swapchain_def)
    }

    /// Wait for the GPU, destroy every resource that is still alive (aggregates first), then
    /// release the device's own objects. Resources dropped afterwards do nothing.
    pub(crate) fn destroy(&self) -> KilnResult<()> {
        if self.is_destroyed() {
            return Ok(());
        }

        log::trace!("destroying device");
        self.wait_idle_internal()?;
        self.inner.destroyed.store(true, Ordering::Release);

        let backend = &*self.inner.backend;
        self.inner.registry.destroy_all(|tracked| {
            for entry in release_entries(tracked) {
                match entry {
                    KilnDeferredRelease::Native(handle) => self.release_native(handle),
                    KilnDeferredRelease::Descriptor(descriptor) => {
                        let _ = self.free_persistent_descriptor(&descriptor);
                    }
                }
            }
        });

        for queue in &self.inner.queues {
            queue.destroy(backend);
        }

        self.inner.frame_fence.destroy();
        self.inner.heaps.destroy();
        Ok(())
    }
}

// Descriptors are freed before the object they view
fn release_entries(tracked: KilnTrackedResource) -> Vec<KilnDeferredRelease> {
    let mut entries: Vec<_> = tracked
        .descriptors
        .into_iter()
        .map(KilnDeferredRelease::Descriptor)
        .collect();
    entries.push(KilnDeferredRelease::Native(tracked.native));
    entries
}
