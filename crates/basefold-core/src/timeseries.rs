//! Sample blocks — the unit of data exchanged between stages
//!
//! A [`SampleBlock`] is one finite slice of a conceptually unbounded sample
//! stream. Each block carries its position in the global stream
//! (`start_sample`), its channel/polarization/dimension layout, and its
//! interleaving order. Stages consume blocks, retain whatever tail samples
//! their algorithm needs, and emit new blocks whose `start_sample` values
//! are strictly continuous across calls.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Complex sample type used throughout the crate.
pub type IQSample = Complex64;

/// Interleaving order of the values inside a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleOrder {
    /// Time is the slowest axis: `[time][chan][pol][dim]`
    TimeMajor,
    /// Channel/pol are the slowest axes: `[chan][pol][time][dim]`
    FrequencyMajor,
}

/// One block of interleaved samples from the logical infinite stream.
#[derive(Debug, Clone)]
pub struct SampleBlock {
    /// Global index of the first time sample in this block
    pub start_sample: u64,
    /// Number of frequency channels
    pub nchan: usize,
    /// Number of polarizations
    pub npol: usize,
    /// Values per sample: 1 = real, 2 = complex
    pub ndim: usize,
    /// Interleaving order of `data`
    pub order: SampleOrder,
    /// Samples per second per channel
    pub sample_rate: f64,
    data: Vec<f64>,
}

impl SampleBlock {
    /// Create an empty block with the given layout.
    pub fn new(
        start_sample: u64,
        nchan: usize,
        npol: usize,
        ndim: usize,
        order: SampleOrder,
        sample_rate: f64,
    ) -> Self {
        Self {
            start_sample,
            nchan,
            npol,
            ndim,
            order,
            sample_rate,
            data: Vec::new(),
        }
    }

    /// Single-channel, single-polarization block of real samples.
    pub fn from_real(start_sample: u64, sample_rate: f64, samples: Vec<f64>) -> Self {
        Self {
            start_sample,
            nchan: 1,
            npol: 1,
            ndim: 1,
            order: SampleOrder::TimeMajor,
            sample_rate,
            data: samples,
        }
    }

    /// Single-channel, single-polarization block of complex samples.
    pub fn from_complex(start_sample: u64, sample_rate: f64, samples: &[IQSample]) -> Self {
        let mut data = Vec::with_capacity(samples.len() * 2);
        for s in samples {
            data.push(s.re);
            data.push(s.im);
        }
        Self {
            start_sample,
            nchan: 1,
            npol: 1,
            ndim: 2,
            order: SampleOrder::TimeMajor,
            sample_rate,
            data,
        }
    }

    /// Values per time sample across all channels and polarizations.
    pub fn stride(&self) -> usize {
        self.nchan * self.npol * self.ndim
    }

    /// Number of time samples held in this block.
    pub fn count(&self) -> usize {
        let stride = self.stride();
        if stride == 0 {
            0
        } else {
            self.data.len() / stride
        }
    }

    /// Global index one past the last sample in this block.
    pub fn end_sample(&self) -> u64 {
        self.start_sample + self.count() as u64
    }

    /// Raw interleaved values.
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Mutable raw interleaved values.
    pub fn data_mut(&mut self) -> &mut Vec<f64> {
        &mut self.data
    }

    /// Index into `data` for time sample `t`, channel `c`, polarization `p`,
    /// dimension `d`.
    pub fn value_index(&self, t: usize, c: usize, p: usize, d: usize) -> usize {
        match self.order {
            SampleOrder::TimeMajor => ((t * self.nchan + c) * self.npol + p) * self.ndim + d,
            SampleOrder::FrequencyMajor => {
                ((c * self.npol + p) * self.count() + t) * self.ndim + d
            }
        }
    }

    /// Value at `(t, c, p, d)`.
    pub fn value(&self, t: usize, c: usize, p: usize, d: usize) -> f64 {
        self.data[self.value_index(t, c, p, d)]
    }

    /// Extract one `(channel, polarization)` signal as complex samples.
    /// Real data is promoted with a zero imaginary part.
    pub fn signal(&self, c: usize, p: usize) -> Vec<IQSample> {
        let n = self.count();
        let mut out = Vec::with_capacity(n);
        self.signal_into(c, p, &mut out);
        out
    }

    /// As [`signal`](Self::signal), reusing the caller's buffer.
    pub fn signal_into(&self, c: usize, p: usize, out: &mut Vec<IQSample>) {
        let n = self.count();
        out.clear();
        out.reserve(n);
        for t in 0..n {
            let re = self.value(t, c, p, 0);
            let im = if self.ndim == 2 { self.value(t, c, p, 1) } else { 0.0 };
            out.push(IQSample::new(re, im));
        }
    }

    /// True when the channel/pol/dim layout and ordering match `other`.
    pub fn layout_matches(&self, other: &SampleBlock) -> bool {
        self.nchan == other.nchan
            && self.npol == other.npol
            && self.ndim == other.ndim
            && self.order == other.order
    }

    /// Verify this block directly continues `prev` with no gap or retreat.
    pub fn follows(&self, prev: &SampleBlock) -> Result<()> {
        if self.start_sample != prev.end_sample() {
            return Err(Error::Buffering(format!(
                "block at sample {} does not continue previous block ending at {}",
                self.start_sample,
                prev.end_sample()
            )));
        }
        Ok(())
    }

    /// Splice `frames` (interleaved, starting at global index `start`) in
    /// front of this block's data. Only meaningful for time-major blocks,
    /// where one time sample is contiguous in memory.
    pub fn prepend_frames(&mut self, frames: &[f64], start: u64) -> Result<()> {
        if self.order != SampleOrder::TimeMajor {
            return Err(Error::Buffering(
                "carryover splicing requires time-major data".into(),
            ));
        }
        let stride = self.stride();
        debug_assert_eq!(frames.len() % stride, 0);
        let nframes = (frames.len() / stride) as u64;
        if start + nframes != self.start_sample {
            return Err(Error::Buffering(format!(
                "carryover ending at {} does not meet block starting at {}",
                start + nframes,
                self.start_sample
            )));
        }
        let mut spliced = Vec::with_capacity(frames.len() + self.data.len());
        spliced.extend_from_slice(frames);
        spliced.append(&mut self.data);
        self.data = spliced;
        self.start_sample = start;
        Ok(())
    }

    /// Interleaved values from time sample `from` (block-relative) to the
    /// end of the block. Time-major only.
    pub fn tail_frames(&self, from: usize) -> &[f64] {
        debug_assert_eq!(self.order, SampleOrder::TimeMajor);
        &self.data[from * self.stride()..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_and_stride() {
        let mut block = SampleBlock::new(0, 2, 2, 2, SampleOrder::TimeMajor, 1000.0);
        block.data_mut().extend(std::iter::repeat(0.0).take(80));
        assert_eq!(block.stride(), 8);
        assert_eq!(block.count(), 10);
        assert_eq!(block.end_sample(), 10);
    }

    #[test]
    fn test_value_index_time_major() {
        let mut block = SampleBlock::new(0, 2, 1, 2, SampleOrder::TimeMajor, 1.0);
        block.data_mut().extend((0..16).map(|v| v as f64));
        // frame 1, channel 1, dim 1 => ((1*2 + 1)*1 + 0)*2 + 1 = 7
        assert_eq!(block.value(1, 1, 0, 1), 7.0);
    }

    #[test]
    fn test_value_index_frequency_major() {
        let mut block = SampleBlock::new(0, 2, 1, 1, SampleOrder::FrequencyMajor, 1.0);
        block.data_mut().extend((0..8).map(|v| v as f64));
        // channel 1, frame 2 => (1*1 + 0)*4 + 2 = 6
        assert_eq!(block.value(2, 1, 0, 0), 6.0);
    }

    #[test]
    fn test_signal_promotes_real_to_complex() {
        let block = SampleBlock::from_real(0, 1.0, vec![1.0, -2.0, 3.0]);
        let sig = block.signal(0, 0);
        assert_eq!(sig.len(), 3);
        assert_eq!(sig[1], IQSample::new(-2.0, 0.0));
    }

    #[test]
    fn test_prepend_frames_splices_and_rewinds_start() {
        let mut block = SampleBlock::from_real(5, 1.0, vec![5.0, 6.0]);
        block.prepend_frames(&[3.0, 4.0], 3).unwrap();
        assert_eq!(block.start_sample, 3);
        assert_eq!(block.data(), &[3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_prepend_frames_rejects_gap() {
        let mut block = SampleBlock::from_real(10, 1.0, vec![0.0; 4]);
        let err = block.prepend_frames(&[1.0, 2.0], 3).unwrap_err();
        assert!(err.to_string().contains("does not meet"));
    }

    #[test]
    fn test_follows_detects_gap() {
        let a = SampleBlock::from_real(0, 1.0, vec![0.0; 8]);
        let b = SampleBlock::from_real(8, 1.0, vec![0.0; 8]);
        let c = SampleBlock::from_real(20, 1.0, vec![0.0; 8]);
        assert!(b.follows(&a).is_ok());
        assert!(c.follows(&b).is_err());
    }
}
