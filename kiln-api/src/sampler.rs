use crate::backends::{KilnNativeHandle, KilnNativeResourceDesc};
use crate::internal::{KilnDescriptorHandle, KilnResourceId};
use crate::resource::KilnResource;
use crate::{
    KilnDescriptorHeapType, KilnDeviceContext, KilnResourceKind, KilnResult, KilnSamplerDef,
};

#[derive(Debug)]
pub struct KilnSampler {
    resource: KilnResource,
    sampler_def: KilnSamplerDef,
}

impl KilnSampler {
    pub fn new(
        device_context: &KilnDeviceContext,
        sampler_def: &KilnSamplerDef,
    ) -> KilnResult<KilnSampler> {
        let resource = device_context.create_tracked_resource(
            KilnResourceKind::Sampler,
            KilnNativeResourceDesc::Sampler(sampler_def),
            &[KilnDescriptorHeapType::Sampler],
            false,
        )?;

        Ok(KilnSampler {
            resource,
            sampler_def: sampler_def.clone(),
        })
    }

    pub fn sampler_def(&self) -> &KilnSamplerDef {
        &self.sampler_def
    }

    pub fn native(&self) -> KilnNativeHandle {
        self.resource.native()
    }

    pub fn resource_id(&self) -> KilnResourceId {
        self.resource.id()
    }

    pub fn descriptor(&self) -> &KilnDescriptorHandle {
        &self.resource.descriptors()[0]
    }
}
