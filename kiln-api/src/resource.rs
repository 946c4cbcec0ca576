use crate::backends::KilnNativeHandle;
use crate::internal::{KilnDescriptorHandle, KilnResourceId};
use crate::{KilnDeviceContext, KilnResourceKind};

/// Owns one tracked native object. Dropping it hands the object (and its persistent descriptors)
/// to the device's deferred release queue.
#[derive(Debug)]
pub(crate) struct KilnResource {
    device_context: KilnDeviceContext,
    id: KilnResourceId,
    kind: KilnResourceKind,
    native: KilnNativeHandle,
    descriptors: Vec<KilnDescriptorHandle>,
    force_deferred: bool,
}

impl KilnResource {
    pub fn new(
        device_context: KilnDeviceContext,
        kind: KilnResourceKind,
        native: KilnNativeHandle,
        descriptors: Vec<KilnDescriptorHandle>,
        force_deferred: bool,
    ) -> Self {
        // Something created mid-frame may already be referenced by commands recorded this frame
        let created_in_flight = !device_context.frame_counters().is_idle();
        let id = device_context.track_resource(kind, native, descriptors.clone());

        KilnResource {
            device_context,
            id,
            kind,
            native,
            descriptors,
            force_deferred: force_deferred || created_in_flight,
        }
    }

    pub fn id(&self) -> KilnResourceId {
        self.id
    }

    pub fn native(&self) -> KilnNativeHandle {
        self.native
    }

    pub fn descriptors(&self) -> &[KilnDescriptorHandle] {
        &self.descriptors
    }

    pub fn device_context(&self) -> &KilnDeviceContext {
        &self.device_context
    }

    pub fn set_debug_name(
        &self,
        name: impl AsRef<str>,
    ) {
        if self.device_context.api_def().enable_debug_names {
            self.device_context
                .set_resource_debug_name(self.id, name.as_ref().to_string());
        }
    }
}

impl Drop for KilnResource {
    fn drop(&mut self) {
        log::trace!("dropping {:?} {:?}", self.kind, self.native);
        self.device_context
            .destroy_resource(self.id, self.force_deferred);
    }
}
