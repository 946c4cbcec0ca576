//! Resource lifetime and synchronization core of a multi-backend GPU abstraction.
//!
//! * Every resource a device creates is tracked until it is destroyed
//! * Destruction of anything the GPU may still be using is deferred until a frame fence proves
//!   the GPU is done with it
//! * Descriptor slots come from fixed-capacity heaps, either persistent (free list) or linear
//!   (bump allocated, per frame)
//! * Command buffers enforce non-overlapping passes and execute in a defined order
//!
//! Everything talks to the native API through the `KilnBackend` trait. A software `null`
//! backend is included.

pub use api::*;
pub use buffer::*;
pub use command_buffer::*;
pub use device_context::*;
pub use error::*;
pub use internal::{
    KilnDeferredRelease, KilnDescriptorHandle, KilnDescriptorLifetime, KilnFrameCounters,
    KilnResourceId,
};
pub use queue::*;
pub use sampler::*;
pub use swapchain::*;
pub use texture::*;
pub use types::*;

pub use backends::{
    KilnBackend, KilnNativeCommand, KilnNativeHandle, KilnNativeHeap, KilnNativeResourceDesc,
};

pub mod backends;
mod error;
mod internal;
mod types;

mod api;
mod buffer;
mod command_buffer;
mod device_context;
mod queue;
mod resource;
mod sampler;
mod swapchain;
mod texture;

#[cfg(test)]
mod lifetime_tests;
