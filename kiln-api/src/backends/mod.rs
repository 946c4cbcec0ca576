//! The boundary between the lifetime/synchronization core and a native graphics API.
//!
//! A backend implements `KilnBackend` once. It is selected when `KilnApi` is created and
//! everything above it talks to the trait object, never to a specific native API.

use crate::{
    KilnBufferDef, KilnClearFlags, KilnDescriptorHeapType, KilnDeviceInfo, KilnQueueType,
    KilnResult, KilnSamplerDef, KilnSwapchainDef, KilnTextureDef,
};

pub mod null;

/// Opaque reference to a native object (heap, fence, queue, command list, buffer...)
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KilnNativeHandle(pub u64);

/// A native descriptor heap and the addresses of its first slot
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct KilnNativeHeap {
    pub handle: KilnNativeHandle,
    pub cpu_first_handle: usize,
    /// Only present for heaps created shader visible
    pub gpu_first_handle: Option<u64>,
}

/// What to create when asking the backend for a resource
#[derive(Copy, Clone, Debug)]
pub enum KilnNativeResourceDesc<'a> {
    Buffer(&'a KilnBufferDef),
    Texture(&'a KilnTextureDef),
    Sampler(&'a KilnSamplerDef),
    Swapchain(&'a KilnSwapchainDef),
    /// A back buffer owned by a previously created swapchain
    SwapchainImage {
        swapchain: KilnNativeHandle,
        image_index: u32,
    },
}

/// A command recorded into a native command list. Views are referenced by CPU descriptor address.
#[derive(Clone, Debug, PartialEq)]
pub enum KilnNativeCommand {
    SetRenderTargets {
        color_views: Vec<usize>,
        depth_stencil_view: Option<usize>,
    },
    ClearRenderTarget {
        view: usize,
        color: [f32; 4],
    },
    ClearDepthStencil {
        view: usize,
        flags: KilnClearFlags,
        depth: f32,
        stencil: u8,
    },
    DiscardView {
        view: usize,
    },
    UnbindRenderTargets,
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    Dispatch {
        group_count_x: u32,
        group_count_y: u32,
        group_count_z: u32,
    },
}

/// The capability set a native API has to provide.
///
/// Objects returned from `create_*` calls are owned by the caller until passed to `release`.
pub trait KilnBackend: Send + Sync + std::fmt::Debug {
    /// One-shot capability query, called once when the device is created
    fn query_capabilities(&self) -> KilnResult<KilnDeviceInfo>;

    /// Distance in bytes between consecutive slots of a heap type
    fn descriptor_increment(
        &self,
        heap_type: KilnDescriptorHeapType,
    ) -> u32;

    fn create_descriptor_heap(
        &self,
        heap_type: KilnDescriptorHeapType,
        descriptor_count: u32,
        shader_visible: bool,
    ) -> KilnResult<KilnNativeHeap>;

    /// Write a view of `resource` into the descriptor slot at `cpu_handle`
    fn create_view(
        &self,
        heap_type: KilnDescriptorHeapType,
        resource: KilnNativeHandle,
        cpu_handle: usize,
    ) -> KilnResult<()>;

    fn create_fence(
        &self,
        initial_value: u64,
    ) -> KilnResult<KilnNativeHandle>;

    /// Have the queue set the fence to `value` once all previously executed work completes
    fn signal_fence(
        &self,
        queue: KilnNativeHandle,
        fence: KilnNativeHandle,
        value: u64,
    ) -> KilnResult<()>;

    /// The highest value the GPU has reached on this fence. Never blocks.
    fn fence_completed_value(
        &self,
        fence: KilnNativeHandle,
    ) -> KilnResult<u64>;

    /// Block the calling thread until the fence reaches `value`
    fn wait_fence(
        &self,
        fence: KilnNativeHandle,
        value: u64,
    ) -> KilnResult<()>;

    fn create_queue(
        &self,
        queue_type: KilnQueueType,
    ) -> KilnResult<KilnNativeHandle>;

    fn create_command_list(
        &self,
        queue_type: KilnQueueType,
    ) -> KilnResult<KilnNativeHandle>;

    /// Clear all recorded state and open the list for recording
    fn reset_command_list(
        &self,
        command_list: KilnNativeHandle,
    ) -> KilnResult<()>;

    fn record_command(
        &self,
        command_list: KilnNativeHandle,
        command: &KilnNativeCommand,
    ) -> KilnResult<()>;

    fn close_command_list(
        &self,
        command_list: KilnNativeHandle,
    ) -> KilnResult<()>;

    /// Execute closed command lists in the given order
    fn execute_command_lists(
        &self,
        queue: KilnNativeHandle,
        command_lists: &[KilnNativeHandle],
    ) -> KilnResult<()>;

    fn create_resource(
        &self,
        desc: KilnNativeResourceDesc,
    ) -> KilnResult<KilnNativeHandle>;

    /// Drop a reference to a native object. Returns the remaining reference count, which is
    /// expected to be zero.
    fn release(
        &self,
        handle: KilnNativeHandle,
    ) -> u32;
}
