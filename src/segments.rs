use crate::error::ScopeError;

/// Partitioning of device sample memory into equal capture segments.
#[derive(Debug, Clone)]
pub struct MemorySegmenter {
    total_memory: u64,
    max_segments: u32,
    segments: u32,
    captures: u32,
}

impl MemorySegmenter {
    pub fn new(total_memory: u64, max_segments: u32) -> Self {
        Self {
            total_memory,
            max_segments: max_segments.max(1),
            segments: 1,
            captures: 1,
        }
    }

    /// Sample capacity of a single segment for `segments` partitions.
    pub fn capacity_for(&self, segments: u32) -> Result<u64, ScopeError> {
        if segments < 1 {
            return Err(ScopeError::validation("segment count must be at least 1"));
        }
        if segments > self.max_segments {
            return Err(ScopeError::validation(format!(
                "segment count {segments} exceeds device maximum {}",
                self.max_segments
            )));
        }
        let per_segment = self.total_memory / u64::from(segments);
        if per_segment == 0 {
            return Err(ScopeError::validation(format!(
                "{segments} segments leave no room for samples"
            )));
        }
        Ok(per_segment)
    }

    /// Repartition memory. Any data still held in the old segments is lost.
    pub fn set_segments(&mut self, segments: u32) -> Result<u64, ScopeError> {
        let per_segment = self.capacity_for(segments)?;
        self.segments = segments;
        if self.captures > segments {
            log::debug!(
                "Capture count {} reduced to new segment count {segments}",
                self.captures
            );
            self.captures = segments;
        }
        Ok(per_segment)
    }

    pub fn set_capture_count(&mut self, captures: u32) -> Result<(), ScopeError> {
        if captures < 1 || captures > self.segments {
            return Err(ScopeError::validation(format!(
                "capture count {captures} must be between 1 and the segment count {}",
                self.segments
            )));
        }
        self.captures = captures;
        Ok(())
    }

    pub fn segments(&self) -> u32 {
        self.segments
    }

    pub fn captures(&self) -> u32 {
        self.captures
    }

    pub fn samples_per_segment(&self) -> u64 {
        self.total_memory / u64::from(self.segments)
    }

    pub fn total_memory(&self) -> u64 {
        self.total_memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEMORY: u64 = 4_000_000_003;

    #[test]
    fn test_segments_divide_memory() {
        let mut segmenter = MemorySegmenter::new(MEMORY, 1_000_000);
        assert_eq!(segmenter.set_segments(100).unwrap(), MEMORY / 100);
        assert_eq!(segmenter.set_segments(100).unwrap(), MEMORY / 100);
        assert_eq!(segmenter.samples_per_segment(), MEMORY / 100);
    }

    #[test]
    fn test_more_segments_never_grow_capacity() {
        let segmenter = MemorySegmenter::new(MEMORY, 1_000_000);
        let mut previous = u64::MAX;
        for n in 1..500 {
            let capacity = segmenter.capacity_for(n).unwrap();
            assert!(capacity <= previous);
            previous = capacity;
        }
    }

    #[test]
    fn test_capture_count_bounded_by_segments() {
        let mut segmenter = MemorySegmenter::new(MEMORY, 1_000_000);
        segmenter.set_segments(100).unwrap();
        assert!(segmenter.set_capture_count(100).is_ok());
        assert!(matches!(
            segmenter.set_capture_count(101),
            Err(ScopeError::Validation(_))
        ));
        assert!(segmenter.set_capture_count(0).is_err());
        assert_eq!(segmenter.captures(), 100);
    }

    #[test]
    fn test_shrinking_segments_clamps_captures() {
        let mut segmenter = MemorySegmenter::new(MEMORY, 1_000_000);
        segmenter.set_segments(10).unwrap();
        segmenter.set_capture_count(10).unwrap();
        segmenter.set_segments(4).unwrap();
        assert_eq!(segmenter.captures(), 4);
    }

    #[test]
    fn test_invalid_segment_counts() {
        let mut segmenter = MemorySegmenter::new(16, 32);
        assert!(segmenter.set_segments(0).is_err());
        assert!(segmenter.set_segments(33).is_err());
        assert!(segmenter.set_segments(17).is_err());
        assert_eq!(segmenter.segments(), 1);
    }
}
