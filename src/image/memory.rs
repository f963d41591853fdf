//! Texture memory accounting.

/// Highest texture size bucket, as a power of two.
pub const MAX_TEXTURE_LOG_SIZE: usize = 22;

/// Bucket of a byte count: `floor(log2(bytes))` clamped to
/// `0..=MAX_TEXTURE_LOG_SIZE`.
#[must_use]
pub fn texture_counter_index(bytes: u64) -> usize {
    if bytes < 2 {
        0
    } else {
        (bytes.ilog2() as usize).min(MAX_TEXTURE_LOG_SIZE)
    }
}

/// Global and per-category texture byte counters.
///
/// Every [`allocate`](Self::allocate) must be paired with exactly one
/// [`release`](Self::release) of the same size and category.
#[derive(Debug, Clone)]
pub struct TextureMemory {
    allocated: u64,
    textures: usize,
    by_category: Vec<u64>,
    loaded_counter: [u32; MAX_TEXTURE_LOG_SIZE + 1],
    frame: u64,
    bound: u64,
    cur_bound: u64,
    bind_count: u32,
    unique_count: u32,
}

impl Default for TextureMemory {
    fn default() -> Self {
        Self {
            allocated: 0,
            textures: 0,
            by_category: Vec::new(),
            loaded_counter: [0; MAX_TEXTURE_LOG_SIZE + 1],
            frame: 1,
            bound: 0,
            cur_bound: 0,
            bind_count: 0,
            unique_count: 0,
        }
    }
}

impl TextureMemory {
    pub(crate) fn allocate(&mut self, bytes: u64, category: Option<usize>) {
        self.allocated += bytes;
        self.textures += 1;
        self.loaded_counter[texture_counter_index(bytes)] += 1;
        if let Some(category) = category {
            if self.by_category.len() <= category {
                self.by_category.resize(category + 1, 0);
            }
            self.by_category[category] += bytes;
        }
    }

    pub(crate) fn release(&mut self, bytes: u64, category: Option<usize>) {
        debug_assert!(self.allocated >= bytes, "texture memory released twice");
        self.allocated = self.allocated.saturating_sub(bytes);
        self.textures = self.textures.saturating_sub(1);
        let counter = &mut self.loaded_counter[texture_counter_index(bytes)];
        *counter = counter.saturating_sub(1);
        if let Some(slot) = category.and_then(|c| self.by_category.get_mut(c)) {
            *slot = slot.saturating_sub(bytes);
        }
    }

    pub(crate) fn move_category(&mut self, bytes: u64, from: Option<usize>, to: Option<usize>) {
        if let Some(slot) = from.and_then(|c| self.by_category.get_mut(c)) {
            *slot = slot.saturating_sub(bytes);
        }
        if let Some(category) = to {
            if self.by_category.len() <= category {
                self.by_category.resize(category + 1, 0);
            }
            self.by_category[category] += bytes;
        }
    }

    /// Record a bind; the first bind of a texture in a frame counts its
    /// bytes towards the bound total. Returns whether this was that first
    /// bind.
    pub(crate) fn record_bind(&mut self, last_bind_frame: &mut u64, bytes: u64) -> bool {
        self.bind_count += 1;
        if *last_bind_frame == self.frame {
            return false;
        }
        *last_bind_frame = self.frame;
        self.unique_count += 1;
        self.cur_bound += bytes;
        true
    }

    /// Close the current frame: the bytes bound during it become
    /// [`bound_bytes`](Self::bound_bytes) and the counters restart.
    pub fn update_stats(&mut self) {
        self.frame += 1;
        self.bound = self.cur_bound;
        self.cur_bound = 0;
        self.bind_count = 0;
        self.unique_count = 0;
    }

    pub(crate) fn frame(&self) -> u64 {
        self.frame
    }

    /// Bytes held by live GPU textures.
    #[must_use]
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated
    }

    /// Number of live GPU textures.
    #[must_use]
    pub fn texture_count(&self) -> usize {
        self.textures
    }

    /// Bytes held by live textures in `category`.
    #[must_use]
    pub fn category_bytes(&self, category: usize) -> u64 {
        self.by_category.get(category).copied().unwrap_or(0)
    }

    /// Live textures per size bucket, see [`texture_counter_index`].
    #[must_use]
    pub fn loaded_counter(&self) -> &[u32] {
        &self.loaded_counter
    }

    /// Bytes of distinct textures bound during the previous frame.
    #[must_use]
    pub fn bound_bytes(&self) -> u64 {
        self.bound
    }

    /// Bytes of distinct textures bound so far this frame.
    #[must_use]
    pub fn current_bound_bytes(&self) -> u64 {
        self.cur_bound
    }

    /// Binds issued this frame.
    #[must_use]
    pub fn bind_count(&self) -> u32 {
        self.bind_count
    }

    /// Distinct textures bound this frame.
    #[must_use]
    pub fn unique_bind_count(&self) -> u32 {
        self.unique_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_pairs_cancel() {
        let mut memory = TextureMemory::default();
        memory.allocate(64, Some(2));
        memory.allocate(4096, None);
        assert_eq!(memory.allocated_bytes(), 4160);
        assert_eq!(memory.category_bytes(2), 64);
        assert_eq!(memory.loaded_counter()[6], 1);
        memory.release(64, Some(2));
        memory.release(4096, None);
        assert_eq!(memory.allocated_bytes(), 0);
        assert_eq!(memory.texture_count(), 0);
        assert_eq!(memory.category_bytes(2), 0);
        assert!(memory.loaded_counter().iter().all(|&n| n == 0));
    }

    #[test]
    fn bound_bytes_count_each_texture_once_per_frame() {
        let mut memory = TextureMemory::default();
        let mut last = 0;
        assert!(memory.record_bind(&mut last, 100));
        assert!(!memory.record_bind(&mut last, 100));
        assert_eq!(memory.current_bound_bytes(), 100);
        assert_eq!(memory.bind_count(), 2);
        memory.update_stats();
        assert_eq!(memory.bound_bytes(), 100);
        assert!(memory.record_bind(&mut last, 100));
    }

    #[test]
    fn counter_buckets_clamp() {
        assert_eq!(texture_counter_index(0), 0);
        assert_eq!(texture_counter_index(1024), 10);
        assert_eq!(texture_counter_index(u64::MAX), MAX_TEXTURE_LOG_SIZE);
    }
}
