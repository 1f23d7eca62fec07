//! Upstream source contract
//!
//! A source delivers ordered [`SampleBlock`]s with non-decreasing
//! `start_sample` and a constant layout for the lifetime of one
//! configuration. When a downstream stage publishes a `next_start` that
//! lies before the end of what was already delivered, the source must
//! re-deliver those samples rather than skip them — overlap-discard stages
//! depend on seeing them again.

use crate::error::{Error, Result};
use crate::timeseries::{SampleBlock, SampleOrder};

/// Ordered block producer feeding the first stage of a pipeline.
pub trait SampleSource {
    /// Next block, or `None` at end of stream.
    fn next_block(&mut self) -> Result<Option<SampleBlock>>;

    /// Position the source so the next block starts at `start_sample`.
    /// Seeking backwards re-delivers samples; seeking past the end of the
    /// stream is an error.
    fn seek(&mut self, start_sample: u64) -> Result<()>;
}

/// In-memory source over a single real- or complex-valued signal, chunked
/// into fixed-size blocks. Primarily a test collaborator.
#[derive(Debug, Clone)]
pub struct VecSource {
    data: Vec<f64>,
    ndim: usize,
    sample_rate: f64,
    chunk: usize,
    pos: u64,
}

impl VecSource {
    /// Source over real samples.
    pub fn real(data: Vec<f64>, sample_rate: f64, chunk: usize) -> Self {
        Self {
            data,
            ndim: 1,
            sample_rate,
            chunk: chunk.max(1),
            pos: 0,
        }
    }

    /// Total samples in the underlying signal.
    pub fn len(&self) -> usize {
        self.data.len() / self.ndim
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl SampleSource for VecSource {
    fn next_block(&mut self) -> Result<Option<SampleBlock>> {
        let total = self.len() as u64;
        if self.pos >= total {
            return Ok(None);
        }
        let take = self.chunk.min((total - self.pos) as usize);
        let from = self.pos as usize * self.ndim;
        let to = from + take * self.ndim;

        let mut block = SampleBlock::new(self.pos, 1, 1, self.ndim, SampleOrder::TimeMajor, self.sample_rate);
        block.data_mut().extend_from_slice(&self.data[from..to]);
        self.pos += take as u64;
        Ok(Some(block))
    }

    fn seek(&mut self, start_sample: u64) -> Result<()> {
        if start_sample > self.len() as u64 {
            return Err(Error::Buffering(format!(
                "seek to {} past end of stream at {}",
                start_sample,
                self.len()
            )));
        }
        self.pos = start_sample;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunked_delivery_is_continuous() {
        let mut source = VecSource::real((0..10).map(|v| v as f64).collect(), 1.0, 4);
        let a = source.next_block().unwrap().unwrap();
        let b = source.next_block().unwrap().unwrap();
        let c = source.next_block().unwrap().unwrap();
        assert!(source.next_block().unwrap().is_none());

        assert_eq!((a.start_sample, a.count()), (0, 4));
        assert!(b.follows(&a).is_ok());
        assert!(c.follows(&b).is_ok());
        assert_eq!(c.count(), 2);
    }

    #[test]
    fn test_seek_redelivers() {
        let mut source = VecSource::real((0..8).map(|v| v as f64).collect(), 1.0, 4);
        source.next_block().unwrap().unwrap();
        source.seek(2).unwrap();
        let b = source.next_block().unwrap().unwrap();
        assert_eq!(b.start_sample, 2);
        assert_eq!(b.data(), &[2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_seek_past_end_rejected() {
        let mut source = VecSource::real(vec![0.0; 4], 1.0, 2);
        assert!(source.seek(5).is_err());
        assert!(source.seek(4).is_ok());
        assert!(source.next_block().unwrap().is_none());
    }
}
