use crate::backends::{KilnNativeHandle, KilnNativeResourceDesc};
use crate::internal::{KilnDescriptorHandle, KilnResourceId};
use crate::resource::KilnResource;
use crate::{
    KilnDescriptorHeapType, KilnDeviceContext, KilnResourceKind, KilnResult, KilnTextureDef,
    KilnTextureUsage,
};

/// A GPU texture. Sampled textures get a persistent SRV. Render target and depth views are not
/// persistent, a render pass writes them into linear heaps each time it binds the texture.
#[derive(Debug)]
pub struct KilnTexture {
    resource: KilnResource,
    texture_def: KilnTextureDef,
}

impl KilnTexture {
    pub fn new(
        device_context: &KilnDeviceContext,
        texture_def: &KilnTextureDef,
    ) -> KilnResult<KilnTexture> {
        texture_def.verify()?;
        Self::create(
            device_context,
            texture_def,
            KilnNativeResourceDesc::Texture(texture_def),
        )
    }

    /// Wraps a back buffer owned by a swapchain
    pub(crate) fn from_swapchain_image(
        device_context: &KilnDeviceContext,
        texture_def: &KilnTextureDef,
        swapchain: KilnNativeHandle,
        image_index: u32,
    ) -> KilnResult<KilnTexture> {
        Self::create(
            device_context,
            texture_def,
            KilnNativeResourceDesc::SwapchainImage {
                swapchain,
                image_index,
            },
        )
    }

    fn create(
        device_context: &KilnDeviceContext,
        texture_def: &KilnTextureDef,
        desc: KilnNativeResourceDesc,
    ) -> KilnResult<KilnTexture> {
        let view_heaps: &[KilnDescriptorHeapType] =
            if texture_def.usage.contains(KilnTextureUsage::SAMPLED) {
                &[KilnDescriptorHeapType::CbvSrvUav]
            } else {
                &[]
            };

        let resource = device_context.create_tracked_resource(
            KilnResourceKind::Texture,
            desc,
            view_heaps,
            false,
        )?;

        Ok(KilnTexture {
            resource,
            texture_def: texture_def.clone(),
        })
    }

    pub fn texture_def(&self) -> &KilnTextureDef {
        &self.texture_def
    }

    pub fn native(&self) -> KilnNativeHandle {
        self.resource.native()
    }

    pub fn resource_id(&self) -> KilnResourceId {
        self.resource.id()
    }

    /// None unless the texture has SAMPLED usage
    pub fn srv(&self) -> Option<&KilnDescriptorHandle> {
        self.resource.descriptors().first()
    }

    pub fn set_debug_name(
        &self,
        name: impl AsRef<str>,
    ) {
        self.resource.set_debug_name(name)
    }
}
