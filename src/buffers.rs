use bitflags::bitflags;

use crate::channel::ChannelId;
use crate::driver::DataTarget;
use crate::error::ScopeError;

bitflags! {
    /// Device-side reduction applied while transferring samples.
    ///
    /// The empty set is not a valid mode; plain samples are `RAW`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DownsampleMode: u32 {
        const AGGREGATE = 1 << 0;
        const DECIMATE  = 1 << 1;
        const AVERAGE   = 1 << 2;
        const TRIGGER   = 1 << 30;
        const RAW       = 1 << 31;
    }
}

/// Capture geometry a set of bindings was made against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferGeometry {
    pub num_samples: u64,
    pub segments: u32,
    pub resolution_generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferKey {
    pub channel: ChannelId,
    pub segment: u32,
    pub downsample: DownsampleMode,
}

/// Caller storage attached to one channel/segment slot.
#[derive(Debug)]
pub struct BoundBuffer<'buf> {
    pub key: BufferKey,
    storage: &'buf mut [i16],
}

impl BoundBuffer<'_> {
    pub fn samples(&self) -> &[i16] {
        self.storage
    }
}

/// Borrows caller-owned sample storage for one acquisition so the driver can
/// write straight into it.
#[derive(Debug)]
pub struct BufferBinder<'buf> {
    geometry: BufferGeometry,
    bindings: Vec<BoundBuffer<'buf>>,
}

impl<'buf> BufferBinder<'buf> {
    pub fn new(geometry: BufferGeometry) -> Self {
        Self {
            geometry,
            bindings: Vec::new(),
        }
    }

    pub fn geometry(&self) -> BufferGeometry {
        self.geometry
    }

    fn validate(
        &self,
        storage_len: usize,
        downsample: DownsampleMode,
        segment: u32,
    ) -> Result<(), ScopeError> {
        if downsample.is_empty() {
            return Err(ScopeError::validation(
                "downsample mode 0 is invalid, use DownsampleMode::RAW for plain samples",
            ));
        }
        if segment >= self.geometry.segments {
            return Err(ScopeError::validation(format!(
                "segment {segment} out of range, {} segment(s) configured",
                self.geometry.segments
            )));
        }
        if (storage_len as u64) < self.geometry.num_samples {
            return Err(ScopeError::validation(format!(
                "buffer holds {storage_len} samples, capture needs {}",
                self.geometry.num_samples
            )));
        }
        Ok(())
    }

    pub fn bind(
        &mut self,
        channel: ChannelId,
        storage: &'buf mut [i16],
        downsample: DownsampleMode,
        segment: u32,
    ) -> Result<(), ScopeError> {
        self.validate(storage.len(), downsample, segment)?;

        let key = BufferKey {
            channel,
            segment,
            downsample,
        };
        if let Some(existing) = self.bindings.iter_mut().find(|bound| bound.key == key) {
            log::debug!("Rebinding channel {channel} segment {segment}");
            existing.storage = storage;
        } else {
            log::trace!(
                "Bound {} samples to channel {channel} segment {segment} ({downsample:?})",
                storage.len()
            );
            self.bindings.push(BoundBuffer { key, storage });
        }
        Ok(())
    }

    /// Bind consecutive rows of `storage`, each `stride` samples long, to
    /// segments `0..captures` of `channel`.
    pub fn bind_bulk(
        &mut self,
        channel: ChannelId,
        storage: &'buf mut [i16],
        stride: usize,
        captures: u32,
        downsample: DownsampleMode,
    ) -> Result<(), ScopeError> {
        if stride == 0 || storage.len() < stride * captures as usize {
            return Err(ScopeError::validation(format!(
                "bulk buffer of {} samples cannot hold {captures} rows of {stride}",
                storage.len()
            )));
        }
        // Check every row up front so a failure leaves no partial bindings.
        for segment in 0..captures {
            self.validate(stride, downsample, segment)?;
        }
        for (segment, row) in (0..captures).zip(storage.chunks_mut(stride)) {
            self.bind(channel, row, downsample, segment)?;
        }
        Ok(())
    }

    pub fn unbind_all(&mut self) {
        log::trace!("Unbinding {} buffer(s)", self.bindings.len());
        self.bindings.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn bindings(&self) -> impl Iterator<Item = &BoundBuffer<'buf>> {
        self.bindings.iter()
    }

    pub fn get(&self, channel: ChannelId, segment: u32) -> Option<&[i16]> {
        self.bindings
            .iter()
            .find(|bound| bound.key.channel == channel && bound.key.segment == segment)
            .map(BoundBuffer::samples)
    }

    /// Lowest and highest bound segment.
    pub(crate) fn segment_span(&self) -> Option<(u32, u32)> {
        let first = self.bindings.iter().map(|bound| bound.key.segment).min()?;
        let last = self.bindings.iter().map(|bound| bound.key.segment).max()?;
        Some((first, last))
    }

    pub(crate) fn targets(&mut self) -> Vec<DataTarget<'_>> {
        self.bindings
            .iter_mut()
            .map(|bound| DataTarget {
                channel: bound.key.channel,
                segment: bound.key.segment,
                downsample: bound.key.downsample,
                samples: &mut *bound.storage,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> BufferGeometry {
        BufferGeometry {
            num_samples: 16,
            segments: 4,
            resolution_generation: 0,
        }
    }

    #[test]
    fn test_zero_downsample_rejected() {
        let mut storage = vec![0i16; 16];
        let mut binder = BufferBinder::new(geometry());
        let err = binder
            .bind(ChannelId::A, &mut storage, DownsampleMode::empty(), 0)
            .unwrap_err();
        assert!(matches!(err, ScopeError::Validation(_)));
        assert!(binder.is_empty());
    }

    #[test]
    fn test_short_buffer_rejected() {
        let mut storage = vec![0i16; 15];
        let mut binder = BufferBinder::new(geometry());
        assert!(binder
            .bind(ChannelId::A, &mut storage, DownsampleMode::RAW, 0)
            .is_err());
    }

    #[test]
    fn test_segment_out_of_range() {
        let mut storage = vec![0i16; 16];
        let mut binder = BufferBinder::new(geometry());
        assert!(binder
            .bind(ChannelId::A, &mut storage, DownsampleMode::RAW, 4)
            .is_err());
    }

    #[test]
    fn test_rebinding_same_slot_replaces() {
        let mut first = vec![1i16; 16];
        let mut second = vec![2i16; 16];
        let mut binder = BufferBinder::new(geometry());
        binder.bind(ChannelId::B, &mut first, DownsampleMode::RAW, 1).unwrap();
        binder.bind(ChannelId::B, &mut second, DownsampleMode::RAW, 1).unwrap();
        assert_eq!(binder.len(), 1);
        assert_eq!(binder.get(ChannelId::B, 1).unwrap()[0], 2);
    }

    #[test]
    fn test_bulk_binding_rows() {
        let mut storage = vec![0i16; 4 * 20];
        let mut binder = BufferBinder::new(geometry());
        binder
            .bind_bulk(ChannelId::A, &mut storage, 20, 4, DownsampleMode::RAW)
            .unwrap();
        assert_eq!(binder.len(), 4);
        assert_eq!(binder.segment_span(), Some((0, 3)));

        for target in binder.targets() {
            target.samples[0] = target.segment as i16;
        }
        assert_eq!(binder.get(ChannelId::A, 3).unwrap()[0], 3);
        drop(binder);
        assert_eq!(storage[60], 3);
    }

    #[test]
    fn test_bulk_too_many_rows_binds_nothing() {
        let mut storage = vec![0i16; 5 * 16];
        let mut binder = BufferBinder::new(geometry());
        assert!(binder
            .bind_bulk(ChannelId::A, &mut storage, 16, 5, DownsampleMode::RAW)
            .is_err());
        assert!(binder.is_empty());
    }

    #[test]
    fn test_unbind_all() {
        let mut storage = vec![0i16; 16];
        let mut binder = BufferBinder::new(geometry());
        binder.bind(ChannelId::A, &mut storage, DownsampleMode::RAW, 0).unwrap();
        binder.unbind_all();
        assert!(binder.is_empty());
    }
}
