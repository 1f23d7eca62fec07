//! Buffering policies — per-stage sample continuity across block boundaries
//!
//! Overlap-discard convolution invalidates samples at the edge of every
//! transform window; those samples are not lost, they must be seen again at
//! the front of the next window. A [`BufferingPolicy`] owns that contract
//! for one stage: `pre_transform` splices retained carryover in front of the
//! incoming block, `post_transform` captures the unconsumed tail, and
//! `set_next_start` records where the stage's next read begins so an
//! upstream source that rewinds can re-deliver the overlap region.
//!
//! Both source behaviors are supported: a source that simply continues
//! (carryover supplies the overlap) and a source that honors `next_start`
//! by re-delivering samples (the duplicated region is trimmed during the
//! splice). Either way the effective input seen by the stage kernel is
//! identical.

use crate::error::{Error, Result};
use crate::timeseries::SampleBlock;

/// Continuity contract run around a stage's transformation.
///
/// `post_transform` without a matching `pre_transform` in the same cycle is
/// a fatal logic error, as is a `next_start` that moves backwards.
pub trait BufferingPolicy {
    /// Splice any retained carryover in front of `block`, producing the
    /// effective input the stage kernel will see.
    fn pre_transform(&mut self, block: &mut SampleBlock) -> Result<()>;

    /// Retain everything from global sample `next_unconsumed` to the end of
    /// `block` for the next cycle.
    fn post_transform(&mut self, block: &SampleBlock, next_unconsumed: u64) -> Result<()>;

    /// Record the global index at which the stage's next read begins.
    fn set_next_start(&mut self, next: u64) -> Result<()>;

    /// Where the stage's next read begins, once known.
    fn next_start(&self) -> Option<u64>;
}

/// Policy for stateless stages: nothing is retained, every delivered sample
/// is consumed in the cycle it arrives.
#[derive(Debug, Default)]
pub struct NullBuffering {
    next: Option<u64>,
    cycle_open: bool,
}

impl NullBuffering {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BufferingPolicy for NullBuffering {
    fn pre_transform(&mut self, _block: &mut SampleBlock) -> Result<()> {
        self.cycle_open = true;
        Ok(())
    }

    fn post_transform(&mut self, block: &SampleBlock, next_unconsumed: u64) -> Result<()> {
        if !self.cycle_open {
            return Err(Error::Buffering(
                "post_transform called without matching pre_transform".into(),
            ));
        }
        self.cycle_open = false;
        if next_unconsumed != block.end_sample() {
            return Err(Error::Buffering(format!(
                "null policy cannot retain samples: asked to keep from {} but block ends at {}",
                next_unconsumed,
                block.end_sample()
            )));
        }
        Ok(())
    }

    fn set_next_start(&mut self, next: u64) -> Result<()> {
        if let Some(prev) = self.next {
            if next < prev {
                return Err(Error::Buffering(format!(
                    "next_start retreated from {prev} to {next}"
                )));
            }
        }
        self.next = Some(next);
        Ok(())
    }

    fn next_start(&self) -> Option<u64> {
        self.next
    }
}

/// Single-region carryover: the trailing samples of each block are retained
/// and spliced in front of the next. Retains arbitrarily long tails, so the
/// same policy serves both filterbank overlap and deeper multi-tap history.
#[derive(Debug, Default)]
pub struct OverlapBuffering {
    carry: Vec<f64>,
    carry_start: u64,
    stride: usize,
    next: Option<u64>,
    cycle_open: bool,
}

impl OverlapBuffering {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time samples currently retained.
    pub fn pending(&self) -> usize {
        if self.stride == 0 {
            0
        } else {
            self.carry.len() / self.stride
        }
    }

    fn carry_end(&self) -> u64 {
        self.carry_start + self.pending() as u64
    }
}

impl BufferingPolicy for OverlapBuffering {
    fn pre_transform(&mut self, block: &mut SampleBlock) -> Result<()> {
        self.cycle_open = true;
        self.stride = block.stride();
        if self.carry.is_empty() {
            return Ok(());
        }

        let carry_end = self.carry_end();
        if block.start_sample >= carry_end {
            if block.start_sample > carry_end {
                return Err(Error::Buffering(format!(
                    "source skipped samples {}..{} still required by this stage",
                    carry_end, block.start_sample
                )));
            }
            // Source continued exactly where the carryover ends.
        } else if block.start_sample <= self.carry_start {
            // Source rewound past the whole carryover (it honored
            // next_start); the re-delivered samples supersede it.
            self.carry.clear();
            return Ok(());
        } else {
            // Partial re-delivery: keep only the carryover frames that
            // precede the incoming block.
            let keep = (block.start_sample - self.carry_start) as usize * self.stride;
            self.carry.truncate(keep);
        }

        block.prepend_frames(&self.carry, self.carry_start)?;
        self.carry.clear();
        Ok(())
    }

    fn post_transform(&mut self, block: &SampleBlock, next_unconsumed: u64) -> Result<()> {
        if !self.cycle_open {
            return Err(Error::Buffering(
                "post_transform called without matching pre_transform".into(),
            ));
        }
        self.cycle_open = false;

        if next_unconsumed < block.start_sample || next_unconsumed > block.end_sample() {
            return Err(Error::Buffering(format!(
                "retained region starting at {} lies outside block {}..{}",
                next_unconsumed,
                block.start_sample,
                block.end_sample()
            )));
        }

        let from = (next_unconsumed - block.start_sample) as usize;
        self.carry.clear();
        self.carry.extend_from_slice(block.tail_frames(from));
        self.carry_start = next_unconsumed;
        Ok(())
    }

    fn set_next_start(&mut self, next: u64) -> Result<()> {
        if let Some(prev) = self.next {
            if next < prev {
                return Err(Error::Buffering(format!(
                    "next_start retreated from {prev} to {next}"
                )));
            }
        }
        self.next = Some(next);
        Ok(())
    }

    fn next_start(&self) -> Option<u64> {
        self.next
    }
}
