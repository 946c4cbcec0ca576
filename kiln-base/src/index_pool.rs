/// A fixed-capacity pool of `u32` indices backed by a dead-list.
///
/// Indices are handed out lowest-first from a fresh pool. Freed indices are pushed back onto the
/// dead-list and are the next ones handed out (LIFO). The capacity never changes, so every index
/// that is freed is available again; nothing leaks and nothing is silently wrapped.
pub struct IndexPool {
    // Stack of free indices, the next index to hand out is at the end
    dead_list: Vec<u32>,

    //TODO: bitfield
    allocated: Vec<bool>,
    allocated_count: u32,
}

impl IndexPool {
    pub fn new(capacity: u32) -> Self {
        IndexPool {
            dead_list: (0..capacity).rev().collect(),
            allocated: vec![false; capacity as usize],
            allocated_count: 0,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.allocated.len() as u32
    }

    pub fn allocated_count(&self) -> u32 {
        self.allocated_count
    }

    pub fn available_count(&self) -> u32 {
        self.dead_list.len() as u32
    }

    pub fn is_allocated(
        &self,
        index: u32,
    ) -> bool {
        self.allocated
            .get(index as usize)
            .copied()
            .unwrap_or(false)
    }

    /// Returns None if every index is in use
    pub fn allocate(&mut self) -> Option<u32> {
        let index = self.dead_list.pop()?;
        debug_assert!(!self.allocated[index as usize]);
        self.allocated[index as usize] = true;
        self.allocated_count += 1;
        Some(index)
    }

    /// Returns false (and changes nothing) if the index is out of range or not currently
    /// allocated
    pub fn free(
        &mut self,
        index: u32,
    ) -> bool {
        if !self.is_allocated(index) {
            return false;
        }

        self.allocated[index as usize] = false;
        self.allocated_count -= 1;
        self.dead_list.push(index);
        true
    }
}
