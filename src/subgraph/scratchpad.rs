//! Per-task temporary storage for fused kernels

/// Region alignment in bytes
const REGION_ALIGN: usize = 64;

/// Reusable kernel scratch buffer, grown on demand and never shrunk
#[derive(Debug, Default)]
pub struct Scratchpad {
    words: Vec<u64>,
}

impl Scratchpad {
    /// Empty scratchpad
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocated bytes
    pub fn capacity(&self) -> usize {
        self.words.len() * std::mem::size_of::<u64>()
    }

    /// Make room for `tasks` disjoint regions of `per_task` bytes
    ///
    /// Regions start on 64-byte boundaries relative to the buffer.
    pub fn reserve(&mut self, per_task: usize, tasks: usize) -> ScratchRegions {
        if per_task == 0 {
            return ScratchRegions::EMPTY;
        }
        let stride = per_task.div_ceil(REGION_ALIGN) * REGION_ALIGN;
        let needed = stride * tasks.max(1);
        if needed > self.capacity() {
            tracing::debug!(bytes = needed, "growing kernel scratchpad");
            self.words.resize(needed.div_ceil(std::mem::size_of::<u64>()), 0);
        }
        ScratchRegions {
            base: self.words.as_mut_ptr() as usize,
            stride,
            len: per_task,
            tasks: tasks.max(1),
        }
    }
}

/// Disjoint scratch regions handed to parallel tasks
///
/// Holds the buffer address rather than a borrow so it can cross into
/// worker closures; valid while the owning [`Scratchpad`] is neither
/// dropped nor reserved again.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ScratchRegions {
    base: usize,
    stride: usize,
    len: usize,
    tasks: usize,
}

impl ScratchRegions {
    const EMPTY: Self = Self {
        base: 0,
        stride: 0,
        len: 0,
        tasks: 0,
    };

    /// Pointer and length of the region of `task`
    ///
    /// Null with length 0 when no scratch was requested.
    pub fn region(&self, task: usize) -> (*mut u8, usize) {
        if self.len == 0 || task >= self.tasks {
            return (std::ptr::null_mut(), 0);
        }
        ((self.base + task * self.stride) as *mut u8, self.len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regions_disjoint() {
        let mut pad = Scratchpad::new();
        let regions = pad.reserve(100, 4);
        let spans: Vec<(usize, usize)> = (0..4)
            .map(|t| {
                let (ptr, len) = regions.region(t);
                assert_eq!(len, 100);
                assert_eq!((ptr as usize - regions.base) % REGION_ALIGN, 0);
                (ptr as usize, ptr as usize + len)
            })
            .collect();
        for pair in spans.windows(2) {
            assert!(pair[0].1 <= pair[1].0);
        }
        assert!(spans[3].1 <= regions.base + pad.capacity());
    }

    #[test]
    fn test_grows_never_shrinks() {
        let mut pad = Scratchpad::new();
        pad.reserve(256, 2);
        let grown = pad.capacity();
        assert!(grown >= 512);
        pad.reserve(16, 1);
        assert_eq!(pad.capacity(), grown);
        pad.reserve(1024, 2);
        assert!(pad.capacity() >= 2048);
    }

    #[test]
    fn test_empty_request() {
        let mut pad = Scratchpad::new();
        let regions = pad.reserve(0, 8);
        assert_eq!(regions.region(0), (std::ptr::null_mut(), 0));
        assert_eq!(pad.capacity(), 0);
    }
}
