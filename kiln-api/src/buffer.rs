use crate::backends::{KilnNativeHandle, KilnNativeResourceDesc};
use crate::internal::{KilnDescriptorHandle, KilnResourceId};
use crate::resource::KilnResource;
use crate::{
    KilnBufferDef, KilnBufferUsage, KilnDescriptorHeapType, KilnDeviceContext, KilnResourceKind,
    KilnResult,
};

/// A GPU buffer. Uniform and storage buffers get a persistent CBV/SRV/UAV descriptor.
///
/// Dropping the buffer defers its destruction until the GPU is done with any frame that may
/// reference it. Transient buffers are always deferred.
#[derive(Debug)]
pub struct KilnBuffer {
    resource: KilnResource,
    buffer_def: KilnBufferDef,
}

impl KilnBuffer {
    pub fn new(
        device_context: &KilnDeviceContext,
        buffer_def: &KilnBufferDef,
    ) -> KilnResult<KilnBuffer> {
        buffer_def.verify()?;

        let needs_view = buffer_def
            .usage
            .intersects(KilnBufferUsage::UNIFORM | KilnBufferUsage::STORAGE);
        let view_heaps: &[KilnDescriptorHeapType] = if needs_view {
            &[KilnDescriptorHeapType::CbvSrvUav]
        } else {
            &[]
        };

        let resource = device_context.create_tracked_resource(
            KilnResourceKind::Buffer,
            KilnNativeResourceDesc::Buffer(buffer_def),
            view_heaps,
            buffer_def.transient,
        )?;

        Ok(KilnBuffer {
            resource,
            buffer_def: buffer_def.clone(),
        })
    }

    pub fn buffer_def(&self) -> &KilnBufferDef {
        &self.buffer_def
    }

    pub fn native(&self) -> KilnNativeHandle {
        self.resource.native()
    }

    pub fn resource_id(&self) -> KilnResourceId {
        self.resource.id()
    }

    /// None unless the buffer has UNIFORM or STORAGE usage
    pub fn view(&self) -> Option<&KilnDescriptorHandle> {
        self.resource.descriptors().first()
    }

    pub fn set_debug_name(
        &self,
        name: impl AsRef<str>,
    ) {
        self.resource.set_debug_name(name)
    }
}
