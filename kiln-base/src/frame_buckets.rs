struct FrameBucket<T> {
    // The frame that most recently pushed into this bucket. Only meaningful while entries is
    // non-empty
    owning_frame: u64,
    entries: Vec<T>,
}

/// Holds values that must outlive the GPU work of the frame they were pushed in.
///
/// There is one bucket per frame that may be in flight. A value pushed while the CPU is on frame
/// `f` lands in bucket `f % slot_count`, and the bucket remembers `f` as its owner. Callers drain
/// a bucket once the GPU has retired the owning frame. As long as the CPU never gets more than
/// `slot_count - 1` frames ahead of the GPU, a bucket has always been drained before a newer
/// frame wraps around onto it.
pub struct FrameBuckets<T> {
    buckets: Vec<FrameBucket<T>>,
}

impl<T> FrameBuckets<T> {
    pub fn new(slot_count: u32) -> Self {
        assert!(slot_count > 0);
        let buckets = (0..slot_count)
            .map(|_| FrameBucket {
                owning_frame: 0,
                entries: Vec::default(),
            })
            .collect();

        FrameBuckets { buckets }
    }

    pub fn slot_count(&self) -> u32 {
        self.buckets.len() as u32
    }

    pub fn slot_for_frame(
        &self,
        frame: u64,
    ) -> usize {
        (frame % self.buckets.len() as u64) as usize
    }

    /// Owning frame of a slot, None if the slot is empty
    pub fn owning_frame(
        &self,
        slot: usize,
    ) -> Option<u64> {
        let bucket = &self.buckets[slot];
        if bucket.entries.is_empty() {
            None
        } else {
            Some(bucket.owning_frame)
        }
    }

    pub fn slot_len(
        &self,
        slot: usize,
    ) -> usize {
        self.buckets[slot].entries.len()
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(|x| x.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|x| x.entries.is_empty())
    }

    /// Push a value owned by the given frame.
    ///
    /// Panics if the target slot still holds values from a different frame. That means the
    /// caller let the CPU run a full ring ahead of what it drained.
    pub fn push(
        &mut self,
        frame: u64,
        value: T,
    ) {
        let slot = self.slot_for_frame(frame);
        let bucket = &mut self.buckets[slot];
        if bucket.entries.is_empty() {
            bucket.owning_frame = frame;
        } else {
            assert_eq!(
                bucket.owning_frame, frame,
                "Frame bucket {} still holds values from frame {} when pushing for frame {}",
                slot, bucket.owning_frame, frame
            );
        }

        bucket.entries.push(value);
    }

    /// Remove and return everything in a slot. The caller is responsible for proving that the
    /// slot's owning frame has retired.
    pub fn drain_slot(
        &mut self,
        slot: usize,
    ) -> Vec<T> {
        std::mem::take(&mut self.buckets[slot].entries)
    }

    /// Remove and return everything owned by frames older than `first_unretired_frame`
    pub fn drain_older_than(
        &mut self,
        first_unretired_frame: u64,
    ) -> Vec<T> {
        let mut drained = Vec::default();
        for bucket in &mut self.buckets {
            if !bucket.entries.is_empty() && bucket.owning_frame < first_unretired_frame {
                drained.append(&mut bucket.entries);
            }
        }

        drained
    }

    /// Immediately remove everything. Only valid once nothing is in flight.
    pub fn drain_all(&mut self) -> Vec<T> {
        let mut drained = Vec::default();
        for bucket in &mut self.buckets {
            drained.append(&mut bucket.entries);
        }

        drained
    }
}
