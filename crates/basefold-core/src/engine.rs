//! Engine contracts — pluggable compute backends for stage kernels
//!
//! Every transform kind defines its own engine trait, but all share the
//! same two-phase shape: `setup` validates and commits geometry, allocating
//! any backend-resident scratch sized for the largest block the stage will
//! ever pass; `execute` (or `fold`) performs the numeric kernel under that
//! fixed configuration. Re-invoking `setup` is free until the first
//! execution; afterwards only an identical configuration is accepted, and
//! anything else fails with a configuration error that leaves prior state
//! unmodified.
//!
//! The stage's bookkeeping (buffering, deferral, output assembly) never
//! depends on which engine is installed, so a reference host kernel and an
//! accelerator-resident kernel are interchangeable at configuration time.

use crate::error::Result;
use crate::fold::{BinPlan, FoldedProfile};
use crate::timeseries::{IQSample, SampleBlock, SampleOrder};

/// Geometry and kernel for one filterbank configuration, derived by
/// `Filterbank::prepare` and committed to an engine at setup.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterbankPlan {
    /// Channels the input band is divided into
    pub nchan: usize,
    /// Frequency-domain points per channel
    pub freq_res: usize,
    /// Backward-transform samples discarded at the leading edge
    pub nfilt_pos: usize,
    /// Backward-transform samples discarded at the trailing edge
    pub nfilt_neg: usize,
    /// Interleaving the engine must produce
    pub output_order: SampleOrder,
    /// Frequency-domain kernel applied to each channel (`freq_res` points)
    pub kernel: Vec<IQSample>,
}

impl FilterbankPlan {
    /// Forward transform length in input samples.
    pub fn fwd_nfft(&self) -> usize {
        self.nchan * self.freq_res
    }

    /// Output samples retained per channel per transform.
    pub fn nkeep(&self) -> usize {
        self.freq_res - self.nfilt_pos - self.nfilt_neg
    }

    /// Input samples invalidated per transform; re-read, never skipped.
    pub fn overlap(&self) -> usize {
        (self.nfilt_pos + self.nfilt_neg) * self.nchan
    }

    /// Input samples consumed (advanced past) per transform.
    pub fn step(&self) -> usize {
        self.fwd_nfft() - self.overlap()
    }

    /// Output values produced for `nparts` transforms of one input signal.
    pub fn output_len(&self, nparts: usize) -> usize {
        self.nchan * self.nkeep() * nparts
    }

    /// Index into an engine output buffer for transform `part`, retained
    /// point `k`, channel `chan`, honoring the configured order.
    pub fn output_index(&self, part: usize, k: usize, chan: usize, nparts: usize) -> usize {
        let t = part * self.nkeep() + k;
        match self.output_order {
            SampleOrder::TimeMajor => t * self.nchan + chan,
            SampleOrder::FrequencyMajor => chan * (nparts * self.nkeep()) + t,
        }
    }
}

/// Compute backend for the overlap-discard filterbank kernel.
pub trait ChannelizerEngine {
    /// Validate and commit the plan, allocating backend scratch.
    fn setup(&mut self, plan: &FilterbankPlan) -> Result<()>;

    /// Run `nparts` overlap-discard transforms over `input`.
    ///
    /// `input` must hold at least `(nparts - 1) * step + fwd_nfft` samples;
    /// consecutive transforms start `step` samples apart. `out` must hold
    /// `output_len(nparts)` values, written in the plan's configured order.
    /// The call is synchronous: buffers may be reused once it returns.
    fn execute(&mut self, input: &[IQSample], nparts: usize, out: &mut [IQSample]) -> Result<()>;
}

/// Channel/polarization/bin geometry of one folding run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoldGeometry {
    pub nchan: usize,
    pub npol: usize,
    pub nbin: usize,
}

/// Compute backend for the phase-folding kernel.
pub trait FolderEngine {
    /// Validate and commit the folding geometry, allocating any
    /// backend-resident profile storage.
    fn setup(&mut self, geometry: FoldGeometry) -> Result<()>;

    /// Accumulate one block into `profile` according to `plan`.
    ///
    /// The host plan is authoritative; a backend may cache an uploaded copy
    /// keyed on the plan revision and reuse it while the revision is
    /// unchanged. The call is synchronous: `profile` holds the fully
    /// accumulated result when it returns.
    fn fold(
        &mut self,
        plan: &BinPlan,
        block: &SampleBlock,
        profile: &mut FoldedProfile,
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex64;

    fn plan(nchan: usize, freq_res: usize, nfilt: usize) -> FilterbankPlan {
        FilterbankPlan {
            nchan,
            freq_res,
            nfilt_pos: nfilt,
            nfilt_neg: nfilt,
            output_order: SampleOrder::TimeMajor,
            kernel: vec![Complex64::new(1.0, 0.0); freq_res],
        }
    }

    #[test]
    fn test_plan_geometry() {
        let p = plan(8, 4, 1);
        assert_eq!(p.fwd_nfft(), 32);
        assert_eq!(p.nkeep(), 2);
        assert_eq!(p.overlap(), 16);
        assert_eq!(p.step(), 16);
        // step is always a whole number of channels worth of samples
        assert_eq!(p.step() % p.nchan, 0);
    }

    #[test]
    fn test_plan_without_discard_consumes_everything() {
        let p = plan(8, 1, 0);
        assert_eq!(p.overlap(), 0);
        assert_eq!(p.step(), p.fwd_nfft());
        assert_eq!(p.output_len(4), 32);
    }

    #[test]
    fn test_output_index_orders_are_permutations() {
        let mut tfp = plan(4, 2, 0);
        tfp.output_order = SampleOrder::TimeMajor;
        let mut fpt = tfp.clone();
        fpt.output_order = SampleOrder::FrequencyMajor;

        let nparts = 3;
        let len = tfp.output_len(nparts);
        let mut seen_tfp = vec![false; len];
        let mut seen_fpt = vec![false; len];
        for part in 0..nparts {
            for k in 0..tfp.nkeep() {
                for chan in 0..tfp.nchan {
                    seen_tfp[tfp.output_index(part, k, chan, nparts)] = true;
                    seen_fpt[fpt.output_index(part, k, chan, nparts)] = true;
                }
            }
        }
        assert!(seen_tfp.iter().all(|&s| s));
        assert!(seen_fpt.iter().all(|&s| s));
    }
}
