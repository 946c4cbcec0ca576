use super::*;
use crate::{KilnError, KilnResult, KilnTexture};

#[cfg(feature = "serde-support")]
use serde::{Deserialize, Serialize};

/// A descriptor count for each heap type
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde-support", derive(Serialize, Deserialize))]
pub struct KilnDescriptorCounts {
    pub cbv_srv_uav: u32,
    pub sampler: u32,
    pub rtv: u32,
    pub dsv: u32,
}

impl KilnDescriptorCounts {
    pub fn get(
        &self,
        heap_type: KilnDescriptorHeapType,
    ) -> u32 {
        match heap_type {
            KilnDescriptorHeapType::CbvSrvUav => self.cbv_srv_uav,
            KilnDescriptorHeapType::Sampler => self.sampler,
            KilnDescriptorHeapType::Rtv => self.rtv,
            KilnDescriptorHeapType::Dsv => self.dsv,
        }
    }
}

/// General configuration for the device
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde-support", derive(Serialize, Deserialize))]
pub struct KilnApiDef {
    /// How many frames the CPU may record ahead of the GPU before `advance_frame` blocks. Also the
    /// number of deferred release buckets.
    pub render_latency: u32,

    /// Capacity of each persistent heap. Fixed for the lifetime of the device, running out is a
    /// configuration error.
    pub persistent_descriptor_counts: KilnDescriptorCounts,

    /// Size of each linear heap. When one fills up it is retired and a new one of the same size
    /// is created. Shader-visible sizes are clamped to the device limits.
    pub linear_descriptor_counts: KilnDescriptorCounts,

    pub enable_debug_names: bool,
}

impl Default for KilnApiDef {
    fn default() -> Self {
        KilnApiDef {
            render_latency: 2,
            persistent_descriptor_counts: KilnDescriptorCounts {
                cbv_srv_uav: 4096,
                sampler: 256,
                rtv: 256,
                dsv: 64,
            },
            linear_descriptor_counts: KilnDescriptorCounts {
                cbv_srv_uav: 1_000_000,
                sampler: 2048,
                rtv: 1024,
                dsv: 1024,
            },
            enable_debug_names: false,
        }
    }
}

impl KilnApiDef {
    pub fn verify(&self) -> KilnResult<()> {
        if self.render_latency == 0 {
            return Err(KilnError::StringError(
                "render_latency must be at least 1".to_string(),
            ));
        }

        for heap_type in KilnDescriptorHeapType::ALL.iter() {
            if self.persistent_descriptor_counts.get(*heap_type) == 0 {
                return Err(KilnError::StringError(format!(
                    "persistent descriptor count for {:?} must be non-zero",
                    heap_type
                )));
            }

            if self.linear_descriptor_counts.get(*heap_type) == 0 {
                return Err(KilnError::StringError(format!(
                    "linear descriptor count for {:?} must be non-zero",
                    heap_type
                )));
            }
        }

        Ok(())
    }
}

/// Used to create a `KilnBuffer`
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde-support", derive(Serialize, Deserialize))]
pub struct KilnBufferDef {
    pub size: u64,
    pub usage: KilnBufferUsage,
    /// Transient buffers (per-frame dynamic data) are assumed to be referenced by the frame being
    /// recorded, so their destruction is always deferred
    pub transient: bool,
}

impl Default for KilnBufferDef {
    fn default() -> Self {
        KilnBufferDef {
            size: 0,
            usage: KilnBufferUsage::empty(),
            transient: false,
        }
    }
}

impl KilnBufferDef {
    pub fn verify(&self) -> KilnResult<()> {
        if self.size == 0 {
            return Err(KilnError::StringError(
                "Buffers must have a non-zero size".to_string(),
            ));
        }

        Ok(())
    }

    pub fn for_uniform_buffer(size: u64) -> KilnBufferDef {
        KilnBufferDef {
            size,
            usage: KilnBufferUsage::UNIFORM,
            transient: false,
        }
    }

    pub fn for_transient_vertex_buffer(size: u64) -> KilnBufferDef {
        KilnBufferDef {
            size,
            usage: KilnBufferUsage::VERTEX,
            transient: true,
        }
    }
}

/// Used to create a `KilnTexture`
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde-support", derive(Serialize, Deserialize))]
pub struct KilnTextureDef {
    pub extents: KilnExtents3D,
    pub mip_count: u32,
    pub usage: KilnTextureUsage,
}

impl Default for KilnTextureDef {
    fn default() -> Self {
        KilnTextureDef {
            extents: KilnExtents3D {
                width: 0,
                height: 0,
                depth: 1,
            },
            mip_count: 1,
            usage: KilnTextureUsage::SAMPLED,
        }
    }
}

impl KilnTextureDef {
    pub fn verify(&self) -> KilnResult<()> {
        if self.extents.width == 0 || self.extents.height == 0 || self.extents.depth == 0 {
            return Err(KilnError::StringError(format!(
                "Texture extents must be non-zero, got {:?}",
                self.extents
            )));
        }

        if self.mip_count == 0 {
            return Err(KilnError::StringError(
                "Textures must have at least one mip".to_string(),
            ));
        }

        if self.usage.contains(KilnTextureUsage::RENDER_TARGET | KilnTextureUsage::DEPTH_STENCIL)
        {
            return Err(KilnError::StringError(
                "A texture can't be both a color and a depth/stencil render target".to_string(),
            ));
        }

        Ok(())
    }

    pub fn for_render_target(
        width: u32,
        height: u32,
    ) -> KilnTextureDef {
        KilnTextureDef {
            extents: KilnExtents3D {
                width,
                height,
                depth: 1,
            },
            mip_count: 1,
            usage: KilnTextureUsage::RENDER_TARGET | KilnTextureUsage::SAMPLED,
        }
    }

    pub fn for_depth_target(
        width: u32,
        height: u32,
    ) -> KilnTextureDef {
        KilnTextureDef {
            extents: KilnExtents3D {
                width,
                height,
                depth: 1,
            },
            mip_count: 1,
            usage: KilnTextureUsage::DEPTH_STENCIL,
        }
    }
}

/// Used to create a `KilnSampler`
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde-support", derive(Serialize, Deserialize))]
pub struct KilnSamplerDef {
    pub min_filter: KilnFilterType,
    pub mag_filter: KilnFilterType,
    pub address_mode: KilnAddressMode,
}

impl Default for KilnSamplerDef {
    fn default() -> Self {
        KilnSamplerDef {
            min_filter: KilnFilterType::Linear,
            mag_filter: KilnFilterType::Linear,
            address_mode: KilnAddressMode::Repeat,
        }
    }
}

/// Used to create a `KilnSwapchain`
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde-support", derive(Serialize, Deserialize))]
pub struct KilnSwapchainDef {
    pub width: u32,
    pub height: u32,
    pub image_count: u32,
}

impl KilnSwapchainDef {
    pub fn verify(&self) -> KilnResult<()> {
        if self.width == 0 || self.height == 0 || self.image_count == 0 {
            return Err(KilnError::StringError(format!(
                "Invalid swapchain def {:?}",
                self
            )));
        }

        Ok(())
    }
}

/// Used to create a `KilnCommandBuffer`
#[derive(Clone, Debug, Default)]
pub struct KilnCommandBufferDef {
    /// Position of this command buffer in the queue's execution order. If None, the queue assigns
    /// the next number in sequence. Buffers are executed sorted by this value, regardless of the
    /// order (or thread) they were committed from.
    pub execution_order: Option<u64>,
}

/// A color attachment to bind when beginning a render pass
#[derive(Clone, Debug)]
pub struct KilnColorRenderTargetBinding<'a> {
    pub texture: &'a KilnTexture,
    pub load_op: KilnLoadOp,
    pub clear_value: KilnColorClearValue,
}

/// A depth/stencil attachment to bind when beginning a render pass
#[derive(Clone, Debug)]
pub struct KilnDepthStencilRenderTargetBinding<'a> {
    pub texture: &'a KilnTexture,
    pub depth_load_op: KilnLoadOp,
    pub stencil_load_op: KilnLoadOp,
    pub clear_value: KilnDepthStencilClearValue,
}
