use crate::backends::{KilnNativeHandle, KilnNativeResourceDesc};
use crate::internal::KilnResourceId;
use crate::resource::KilnResource;
use crate::{
    KilnDeviceContext, KilnExtents3D, KilnResourceKind, KilnResult, KilnSwapchainDef, KilnTexture,
    KilnTextureDef, KilnTextureUsage,
};

/// A set of presentable back buffers.
///
/// The swapchain is an aggregate: it owns its back buffer textures, and is destroyed before them
/// when the device tears down.
#[derive(Debug)]
pub struct KilnSwapchain {
    // Declared first so it is dropped before the images
    resource: KilnResource,
    swapchain_def: KilnSwapchainDef,
    images: Vec<KilnTexture>,
}

impl KilnSwapchain {
    pub fn new(
        device_context: &KilnDeviceContext,
        swapchain_def: &KilnSwapchainDef,
    ) -> KilnResult<KilnSwapchain> {
        swapchain_def.verify()?;

        let resource = device_context.create_tracked_resource(
            KilnResourceKind::Swapchain,
            KilnNativeResourceDesc::Swapchain(swapchain_def),
            &[],
            false,
        )?;

        let image_def = KilnTextureDef {
            extents: KilnExtents3D {
                width: swapchain_def.width,
                height: swapchain_def.height,
                depth: 1,
            },
            mip_count: 1,
            usage: KilnTextureUsage::RENDER_TARGET,
        };

        let mut images = Vec::with_capacity(swapchain_def.image_count as usize);
        for image_index in 0..swapchain_def.image_count {
            images.push(KilnTexture::from_swapchain_image(
                device_context,
                &image_def,
                resource.native(),
                image_index,
            )?);
        }

        log::debug!(
            "Created swapchain {:?} with {} images",
            resource.native(),
            images.len()
        );

        Ok(KilnSwapchain {
            resource,
            swapchain_def: swapchain_def.clone(),
            images,
        })
    }

    pub fn swapchain_def(&self) -> &KilnSwapchainDef {
        &self.swapchain_def
    }

    pub fn native(&self) -> KilnNativeHandle {
        self.resource.native()
    }

    pub fn resource_id(&self) -> KilnResourceId {
        self.resource.id()
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn image(
        &self,
        image_index: usize,
    ) -> &KilnTexture {
        &self.images[image_index]
    }

    pub fn images(&self) -> &[KilnTexture] {
        &self.images
    }

    /// Recreate the swapchain, for example after a window resize. The old swapchain and its
    /// images go through the deferred release queue like any other dropped resource.
    pub fn rebuild(
        &mut self,
        swapchain_def: &KilnSwapchainDef,
    ) -> KilnResult<()> {
        let device_context = self.resource.device_context().clone();
        *self = KilnSwapchain::new(&device_context, swapchain_def)?;
        Ok(())
    }
}
