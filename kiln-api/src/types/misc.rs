#[cfg(feature = "serde-support")]
use serde::{Deserialize, Serialize};

/// Information about the device, mostly limits, requirements (like memory alignment), and flags to
/// indicate whether certain features are supported.
///
/// Produced once by the backend when the device is created. Nothing above the backend queries the
/// platform on its own.
#[derive(Clone, Debug)]
pub struct KilnDeviceInfo {
    pub backend_name: &'static str,
    pub supports_multithreaded_usage: bool,

    // D3D12_MAX_SHADER_VISIBLE_DESCRIPTOR_HEAP_SIZE_TIER_1 is 1M
    pub max_shader_visible_view_descriptors: u32,
    // D3D12_MAX_SHADER_VISIBLE_SAMPLER_HEAP_SIZE is 2048
    pub max_shader_visible_sampler_descriptors: u32,
}

/// Used to indicate which type of queue to use. Some operations require certain types of queues.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-support", derive(Serialize, Deserialize))]
pub enum KilnQueueType {
    /// Graphics queues generally supports all operations and are a safe default choice
    Graphics,

    /// Compute queues can be used for compute-based work.
    Compute,

    /// Transfer queues are generally limited to basic operations like copying data from buffers
    /// to images.
    Transfer,
}

impl KilnQueueType {
    pub const ALL: [KilnQueueType; 3] = [
        KilnQueueType::Graphics,
        KilnQueueType::Compute,
        KilnQueueType::Transfer,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            KilnQueueType::Graphics => 0,
            KilnQueueType::Compute => 1,
            KilnQueueType::Transfer => 2,
        }
    }
}

/// The kind of descriptor slots a heap holds
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-support", derive(Serialize, Deserialize))]
pub enum KilnDescriptorHeapType {
    /// Constant buffer, shader resource and unordered access views
    CbvSrvUav,
    Sampler,
    /// Render target views
    Rtv,
    /// Depth stencil views
    Dsv,
}

impl KilnDescriptorHeapType {
    pub const ALL: [KilnDescriptorHeapType; 4] = [
        KilnDescriptorHeapType::CbvSrvUav,
        KilnDescriptorHeapType::Sampler,
        KilnDescriptorHeapType::Rtv,
        KilnDescriptorHeapType::Dsv,
    ];

    /// Only view and sampler heaps may be bound to shaders
    pub fn supports_shader_visibility(self) -> bool {
        match self {
            KilnDescriptorHeapType::CbvSrvUav | KilnDescriptorHeapType::Sampler => true,
            KilnDescriptorHeapType::Rtv | KilnDescriptorHeapType::Dsv => false,
        }
    }
}

/// Tags what a tracked resource is. The discriminant order is the teardown order: aggregates that
/// hold references to other resources sort (and are destroyed) before the things they reference.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KilnResourceKind {
    Swapchain = 0,
    Texture = 1,
    Buffer = 2,
    Sampler = 3,
}

/// What a pass is encoding
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum KilnPassKind {
    Render,
    Compute,
}

/// Determines if the contents of an image attachment in a renderpass begins with its previous
/// contents, a clear value, or undefined data.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-support", derive(Serialize, Deserialize))]
pub enum KilnLoadOp {
    DontCare,
    Load,
    Clear,
}

impl Default for KilnLoadOp {
    fn default() -> Self {
        KilnLoadOp::DontCare
    }
}

/// A clear value for color attachments
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct KilnColorClearValue(pub [f32; 4]);

/// A clear values for depth/stencil attachments. One or both values may be used depending on the
/// format of the attached image
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct KilnDepthStencilClearValue {
    pub depth: f32,
    pub stencil: u8,
}

impl Default for KilnDepthStencilClearValue {
    fn default() -> Self {
        KilnDepthStencilClearValue {
            depth: 0.0,
            stencil: 0,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-support", derive(Serialize, Deserialize))]
pub struct KilnExtents3D {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

bitflags::bitflags! {
    /// Which aspects of a depth/stencil attachment a clear affects
    #[cfg_attr(feature = "serde-support", derive(Serialize, Deserialize))]
    pub struct KilnClearFlags: u8 {
        const DEPTH = 1;
        const STENCIL = 2;
    }
}

bitflags::bitflags! {
    /// Indicates how a buffer will be used. Uniform and storage buffers get a persistent view.
    #[derive(Default)]
    #[cfg_attr(feature = "serde-support", derive(Serialize, Deserialize))]
    pub struct KilnBufferUsage: u32 {
        const VERTEX = 1<<0;
        const INDEX = 1<<1;
        const UNIFORM = 1<<2;
        const STORAGE = 1<<3;
    }
}

bitflags::bitflags! {
    /// Indicates how a texture will be used. Sampled textures get a persistent view.
    #[derive(Default)]
    #[cfg_attr(feature = "serde-support", derive(Serialize, Deserialize))]
    pub struct KilnTextureUsage: u32 {
        const SAMPLED = 1<<0;
        const RENDER_TARGET = 1<<1;
        const DEPTH_STENCIL = 1<<2;
        const STORAGE = 1<<3;
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-support", derive(Serialize, Deserialize))]
pub enum KilnFilterType {
    Nearest,
    Linear,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-support", derive(Serialize, Deserialize))]
pub enum KilnAddressMode {
    Mirror,
    Repeat,
    ClampToEdge,
}
