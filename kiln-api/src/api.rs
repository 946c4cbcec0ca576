use crate::backends::KilnBackend;
use crate::device_context::KilnDeviceContextInner;
use crate::{KilnApiDef, KilnDeviceContext, KilnResult};
use std::sync::Arc;

/// Primary entry point. Creating a `KilnApi` selects the backend and creates the device.
///
/// Call `destroy` (or drop the `KilnApi`) to wait for the GPU and release everything the device
/// owns. Resources still alive at that point are destroyed too, and dropping them later is a
/// no-op.
pub struct KilnApi {
    device_context: Option<KilnDeviceContext>,
}

impl Drop for KilnApi {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            log::error!("Error while destroying KilnApi: {}", e);
        }
    }
}

impl KilnApi {
    pub fn new(
        backend: Arc<dyn KilnBackend>,
        api_def: &KilnApiDef,
    ) -> KilnResult<Self> {
        let inner = Arc::new(KilnDeviceContextInner::new(backend, api_def)?);
        let device_context = KilnDeviceContext::new(inner);

        Ok(KilnApi {
            device_context: Some(device_context),
        })
    }

    /// Returns None once destroyed
    pub fn device_context(&self) -> Option<KilnDeviceContext> {
        self.device_context.clone()
    }

    /// If waiting for the GPU fails the device is left intact, so `destroy` can be retried
    pub fn destroy(&mut self) -> KilnResult<()> {
        if let Some(device_context) = &self.device_context {
            device_context.destroy()?;
        }

        if let Some(device_context) = self.device_context.take() {
            let remaining = Arc::strong_count(&device_context.inner) - 1;
            if remaining > 0 {
                log::debug!(
                    "{} handles to the destroyed device are still alive",
                    remaining
                );
            }
        }

        Ok(())
    }
}
