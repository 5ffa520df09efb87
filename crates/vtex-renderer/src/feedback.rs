//! GPU feedback
//!
//! The feedback pass writes, per screen texel, the page it sampled. The
//! buffer reaches the CPU through an asynchronous readback whose completion
//! may fire on another thread; [`feedback_channel`] is the hand-off point.

use std::sync::Arc;

use ahash::AHashSet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{VtError, VtResult};

/// Encoding of one feedback texel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum FeedbackFormat {
    /// `(x, y, mip, unused)` as four bytes; addresses pages 0..=255
    #[default]
    Rgba8,
    /// `(x, y, mip, unused)` as four little-endian u16
    Rgba16,
}

impl FeedbackFormat {
    /// Bytes per texel
    pub fn stride(self) -> usize {
        match self {
            Self::Rgba8 => 4,
            Self::Rgba16 => 8,
        }
    }

    /// Largest encodable coordinate
    pub fn max_coordinate(self) -> u32 {
        match self {
            Self::Rgba8 => u8::MAX as u32,
            Self::Rgba16 => u16::MAX as u32,
        }
    }
}

/// One decoded feedback texel. `x` and `y` are mip-0 table coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeedbackSample {
    pub x: u32,
    pub y: u32,
    pub mip: u32,
}

impl FeedbackSample {
    pub const fn new(x: u32, y: u32, mip: u32) -> Self {
        Self { x, y, mip }
    }
}

/// Feedback texels read back from the GPU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackBuffer {
    format: FeedbackFormat,
    bytes: Vec<u8>,
}

impl FeedbackBuffer {
    /// Wrap raw readback bytes
    pub fn from_bytes(format: FeedbackFormat, bytes: Vec<u8>) -> Self {
        Self { format, bytes }
    }

    /// Encode samples, as the feedback shader would
    pub fn encode(format: FeedbackFormat, samples: &[FeedbackSample]) -> VtResult<Self> {
        let max = format.max_coordinate();
        let mut bytes = Vec::with_capacity(samples.len() * format.stride());
        for sample in samples {
            for value in [sample.x, sample.y, sample.mip, 0] {
                if value > max {
                    return Err(VtError::FeedbackRange { value, format });
                }
                match format {
                    FeedbackFormat::Rgba8 => bytes.push(value as u8),
                    FeedbackFormat::Rgba16 => bytes.extend_from_slice(&(value as u16).to_le_bytes()),
                }
            }
        }
        Ok(Self { format, bytes })
    }

    pub fn format(&self) -> FeedbackFormat {
        self.format
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of texels
    pub fn len(&self) -> usize {
        self.bytes.len() / self.format.stride()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decode every texel
    pub fn samples(&self) -> VtResult<impl Iterator<Item = FeedbackSample> + '_> {
        let stride = self.format.stride();
        if self.bytes.len() % stride != 0 {
            return Err(VtError::FeedbackLength {
                len: self.bytes.len(),
                stride,
            });
        }

        let format = self.format;
        Ok(self.bytes.chunks_exact(stride).map(move |texel| match format {
            FeedbackFormat::Rgba8 => {
                FeedbackSample::new(texel[0] as u32, texel[1] as u32, texel[2] as u32)
            }
            FeedbackFormat::Rgba16 => {
                let read = |i: usize| u16::from_le_bytes([texel[i], texel[i + 1]]) as u32;
                FeedbackSample::new(read(0), read(2), read(4))
            }
        }))
    }

    /// Distinct samples in first-seen order
    pub fn unique_samples(&self) -> VtResult<Vec<FeedbackSample>> {
        let mut seen = AHashSet::new();
        Ok(self.samples()?.filter(|s| seen.insert(*s)).collect())
    }
}

#[derive(Debug, Default)]
struct FeedbackSlot {
    ready: Option<FeedbackBuffer>,
    delivered: u64,
}

/// Producer side, handed to the readback pass
#[derive(Debug, Clone)]
pub struct FeedbackSender {
    slot: Arc<Mutex<FeedbackSlot>>,
}

impl FeedbackSender {
    /// Publish a completed readback. A buffer that was never taken is replaced.
    pub fn complete(&self, buffer: FeedbackBuffer) {
        let mut slot = self.slot.lock();
        if slot.ready.replace(buffer).is_some() {
            log::debug!("Feedback buffer replaced before it was consumed");
        }
        slot.delivered += 1;
    }
}

/// Consumer side, owned by the streaming system
#[derive(Debug)]
pub struct FeedbackReceiver {
    slot: Arc<Mutex<FeedbackSlot>>,
}

impl FeedbackReceiver {
    /// Take the completed readback, if one arrived
    pub fn try_take(&self) -> Option<FeedbackBuffer> {
        self.slot.lock().ready.take()
    }

    /// Total readbacks published so far
    pub fn delivered(&self) -> u64 {
        self.slot.lock().delivered
    }
}

/// Create a connected feedback sender/receiver pair
pub fn feedback_channel() -> (FeedbackSender, FeedbackReceiver) {
    let slot = Arc::new(Mutex::new(FeedbackSlot::default()));
    (
        FeedbackSender { slot: slot.clone() },
        FeedbackReceiver { slot },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_rgba8() {
        let buffer = FeedbackBuffer::from_bytes(FeedbackFormat::Rgba8, vec![1, 2, 3, 255, 10, 20, 0, 0]);
        let samples: Vec<_> = buffer.samples().unwrap().collect();
        assert_eq!(
            samples,
            vec![FeedbackSample::new(1, 2, 3), FeedbackSample::new(10, 20, 0)]
        );
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_rgba16_addresses_wide_tables() {
        let samples = [FeedbackSample::new(300, 1023, 2)];
        let buffer = FeedbackBuffer::encode(FeedbackFormat::Rgba16, &samples).unwrap();
        assert_eq!(buffer.as_bytes().len(), 8);
        assert_eq!(buffer.samples().unwrap().collect::<Vec<_>>(), samples.to_vec());
    }

    #[test]
    fn test_rgba8_rejects_wide_coordinates() {
        let result = FeedbackBuffer::encode(FeedbackFormat::Rgba8, &[FeedbackSample::new(256, 0, 0)]);
        assert!(matches!(result, Err(VtError::FeedbackRange { value: 256, .. })));
    }

    #[test]
    fn test_truncated_buffer_is_an_error() {
        let buffer = FeedbackBuffer::from_bytes(FeedbackFormat::Rgba8, vec![1, 2, 3]);
        assert!(matches!(
            buffer.samples(),
            Err(VtError::FeedbackLength { len: 3, stride: 4 })
        ));
    }

    #[test]
    fn test_unique_samples() {
        let samples = [
            FeedbackSample::new(1, 1, 0),
            FeedbackSample::new(2, 1, 0),
            FeedbackSample::new(1, 1, 0),
        ];
        let buffer = FeedbackBuffer::encode(FeedbackFormat::Rgba8, &samples).unwrap();
        assert_eq!(buffer.unique_samples().unwrap(), samples[..2].to_vec());
    }

    #[test]
    fn test_channel_hand_off() {
        let (sender, receiver) = feedback_channel();
        assert!(receiver.try_take().is_none());

        let buffer = FeedbackBuffer::encode(FeedbackFormat::Rgba8, &[FeedbackSample::new(0, 0, 8)]).unwrap();
        let remote = sender.clone();
        std::thread::spawn(move || remote.complete(buffer)).join().unwrap();

        assert_eq!(receiver.delivered(), 1);
        assert_eq!(receiver.try_take().map(|b| b.len()), Some(1));
        assert!(receiver.try_take().is_none());
    }
}
