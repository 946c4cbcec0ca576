mod resource_registry;
pub use resource_registry::KilnResourceId;
pub(crate) use resource_registry::*;

mod frame_fence;
pub use frame_fence::KilnFrameCounters;
pub(crate) use frame_fence::*;

mod deferred_release;
pub use deferred_release::KilnDeferredRelease;
pub(crate) use deferred_release::*;

mod descriptor_heap;
pub use descriptor_heap::{KilnDescriptorHandle, KilnDescriptorLifetime};
pub(crate) use descriptor_heap::*;
