use crate::{KilnDescriptorHandle, KilnNativeHandle, KilnResourceKind};
use fnv::FnvHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Identifies a resource tracked by a device. Ids are never reused within a device.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KilnResourceId(pub(crate) u64);

/// Everything the device needs to destroy a resource: its native object plus the persistent
/// descriptor slots that were written for it
pub(crate) struct KilnTrackedResource {
    pub(crate) id: KilnResourceId,
    pub(crate) kind: KilnResourceKind,
    pub(crate) native: KilnNativeHandle,
    pub(crate) descriptors: Vec<KilnDescriptorHandle>,
    pub(crate) debug_name: Option<String>,

    #[cfg(feature = "track-resources")]
    pub(crate) create_backtrace: backtrace::Backtrace,
}

/// The set of live resources owned by a device. This is the single source of truth for whether
/// a resource still needs to be destroyed: whoever untracks it owns its destruction.
pub(crate) struct KilnResourceRegistry {
    next_id: AtomicU64,
    live: Mutex<FnvHashMap<KilnResourceId, KilnTrackedResource>>,
}

impl KilnResourceRegistry {
    pub fn new() -> Self {
        KilnResourceRegistry {
            next_id: AtomicU64::new(1),
            live: Default::default(),
        }
    }

    pub fn track(
        &self,
        kind: KilnResourceKind,
        native: KilnNativeHandle,
        descriptors: Vec<KilnDescriptorHandle>,
    ) -> KilnResourceId {
        let id = KilnResourceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        log::trace!("track {:?} {:?} {:?}", id, kind, native);

        let tracked = KilnTrackedResource {
            id,
            kind,
            native,
            descriptors,
            debug_name: None,
            #[cfg(feature = "track-resources")]
            create_backtrace: backtrace::Backtrace::new_unresolved(),
        };

        let old = self.live.lock().unwrap().insert(id, tracked);
        assert!(old.is_none());
        id
    }

    /// Removes the resource and hands it back to the caller for destruction. Untracking something
    /// that is not tracked (already untracked, or swept up by `destroy_all`) returns None.
    pub fn untrack(
        &self,
        id: KilnResourceId,
    ) -> Option<KilnTrackedResource> {
        let tracked = self.live.lock().unwrap().remove(&id);
        if tracked.is_some() {
            log::trace!("untrack {:?}", id);
        }

        tracked
    }

    pub fn set_debug_name(
        &self,
        id: KilnResourceId,
        name: String,
    ) {
        if let Some(tracked) = self.live.lock().unwrap().get_mut(&id) {
            tracked.debug_name = Some(name);
        }
    }

    #[cfg(test)]
    pub fn is_tracked(
        &self,
        id: KilnResourceId,
    ) -> bool {
        self.live.lock().unwrap().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    /// Untrack everything and pass each resource to `destroy_fn`, ordered by kind (aggregates
    /// first) and then by creation order. Returns how many resources were destroyed.
    pub fn destroy_all<F: FnMut(KilnTrackedResource)>(
        &self,
        mut destroy_fn: F,
    ) -> usize {
        let snapshot = {
            let mut live = self.live.lock().unwrap();
            let mut snapshot: Vec<_> = live.drain().map(|(_, tracked)| tracked).collect();
            snapshot.sort_by_key(|tracked| (tracked.kind, tracked.id));
            snapshot
        };

        let count = snapshot.len();
        if count > 0 {
            log::warn!("{} resources still alive at device teardown", count);
        }

        for tracked in snapshot {
            #[cfg(feature = "track-resources")]
            {
                let mut backtrace = tracked.create_backtrace.clone();
                backtrace.resolve();
                log::warn!(
                    "  {:?} {:?} {:?} created at:\n{:?}",
                    tracked.kind,
                    tracked.native,
                    tracked.debug_name,
                    backtrace
                );
            }

            #[cfg(not(feature = "track-resources"))]
            {
                log::warn!(
                    "  {:?} {:?} {:?}",
                    tracked.kind,
                    tracked.native,
                    tracked.debug_name
                );
            }

            (destroy_fn)(tracked);
        }

        count
    }
}
