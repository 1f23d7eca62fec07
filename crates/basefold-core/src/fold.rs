//! Phase folding — accumulate samples into periodic phase bins
//!
//! For folding period `P`, bin count `nbin`, and sample interval `dt`,
//! global sample `s` lands at phase `frac(s*dt / P)` and bin
//! `floor(phase * nbin) mod nbin`. Rather than branching per sample at
//! execute time, the stage compresses the bin assignment of one block into
//! a run-length [`BinPlan`] once per configuration and hands that plan to
//! its engine, so an accelerator backend can upload it once and reuse it
//! for every block with the same length and period alignment.
//!
//! The defining property of this stage is chunk-size invariance: folding
//! the same stream through any partition into blocks yields the identical
//! accumulated profile.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::buffering::{BufferingPolicy, NullBuffering};
use crate::engine::{FoldGeometry, FolderEngine};
use crate::error::{Error, Result};
use crate::host::HostFolder;
use crate::timeseries::SampleBlock;

/// Folding geometry: period, bin count, and sample interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FoldConfig {
    /// Folding period in seconds
    pub period: f64,
    /// Number of phase bins
    pub nbin: usize,
    /// Seconds between consecutive samples
    pub sample_interval: f64,
}

impl Default for FoldConfig {
    fn default() -> Self {
        Self {
            period: 1.0,
            nbin: 1024,
            sample_interval: 1e-3,
        }
    }
}

impl FoldConfig {
    /// Phase bin for global sample index `s`.
    pub fn bin_of(&self, s: u64) -> u32 {
        let t = (s as f64 * self.sample_interval) % self.period;
        let bin = (t / self.period * self.nbin as f64).floor() as u64;
        (bin % self.nbin as u64) as u32
    }

    /// Samples per folding period (not necessarily integral).
    pub fn samples_per_period(&self) -> f64 {
        self.period / self.sample_interval
    }

    fn validate(&self) -> Result<()> {
        if self.period <= 0.0 {
            return Err(Error::config("fold", "period", "must be positive"));
        }
        if self.nbin == 0 {
            return Err(Error::config("fold", "nbin", "must be at least 1"));
        }
        if self.sample_interval <= 0.0 {
            return Err(Error::config("fold", "sample_interval", "must be positive"));
        }
        Ok(())
    }
}

/// One maximal run of consecutive samples mapping to the same phase bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinRun {
    /// Phase bin receiving this run
    pub ibin: u32,
    /// Samples in the run
    pub hits: u32,
    /// First sample of the run, relative to the block
    pub offset: u64,
}

/// Run-length-compressed bin assignment for one block shape.
///
/// The host copy is authoritative; any backend-resident copy is a derived
/// cache keyed on [`revision`](Self::revision) and invalidated whenever the
/// plan is rebuilt.
#[derive(Debug, Clone, PartialEq)]
pub struct BinPlan {
    runs: Vec<BinRun>,
    start_sample: u64,
    count: u64,
    revision: u64,
}

impl BinPlan {
    /// Build a plan covering `count` samples starting at `start_sample`.
    pub fn build(config: &FoldConfig, start_sample: u64, count: u64, revision: u64) -> Self {
        let mut builder = BinPlanBuilder::new();
        for i in 0..count {
            builder.set_bin(i, config.bin_of(start_sample + i));
        }
        builder.finish(start_sample, revision)
    }

    /// The runs, in block order.
    pub fn runs(&self) -> &[BinRun] {
        &self.runs
    }

    /// Samples covered by the plan.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Global sample index the plan was built for.
    pub fn start_sample(&self) -> u64 {
        self.start_sample
    }

    /// Monotonic rebuild counter; backends key their cached copy on this.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Sum of hit counts over all runs.
    pub fn total_hits(&self) -> u64 {
        self.runs.iter().map(|r| r.hits as u64).sum()
    }

    /// True when this plan applies verbatim to a block of `count` samples
    /// starting at `start`: same length, and the start is a whole number of
    /// folding periods away from the plan's own start.
    pub fn reusable_for(&self, config: &FoldConfig, start: u64, count: u64) -> bool {
        if count != self.count || start < self.start_sample {
            return false;
        }
        if start == self.start_sample {
            return true;
        }
        let elapsed = (start - self.start_sample) as f64 * config.sample_interval;
        let periods = elapsed / config.period;
        (periods - periods.round()).abs() < 1e-9
    }
}

/// Incremental run-length builder carrying the current run across calls,
/// so plan construction may resume at a block boundary.
#[derive(Debug, Default)]
pub struct BinPlanBuilder {
    runs: Vec<BinRun>,
    current_bin: Option<u32>,
    current_hits: u32,
    run_offset: u64,
}

impl BinPlanBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign block-relative sample `idat` to bin `ibin`. Samples must be
    /// presented in order.
    pub fn set_bin(&mut self, idat: u64, ibin: u32) {
        match self.current_bin {
            Some(bin) if bin == ibin => {
                self.current_hits += 1;
            }
            Some(bin) => {
                self.runs.push(BinRun {
                    ibin: bin,
                    hits: self.current_hits,
                    offset: self.run_offset,
                });
                self.current_bin = Some(ibin);
                self.current_hits = 1;
                self.run_offset = idat;
            }
            None => {
                self.current_bin = Some(ibin);
                self.current_hits = 1;
                self.run_offset = idat;
            }
        }
    }

    /// Flush the open run and produce the finished plan.
    pub fn finish(mut self, start_sample: u64, revision: u64) -> BinPlan {
        if let Some(bin) = self.current_bin.take() {
            self.runs.push(BinRun {
                ibin: bin,
                hits: self.current_hits,
                offset: self.run_offset,
            });
        }
        let count = self.runs.iter().map(|r| r.hits as u64).sum();
        BinPlan {
            runs: self.runs,
            start_sample,
            count,
            revision,
        }
    }
}

/// Accumulated folded profile: one value and hit count per
/// `(channel, polarization, bin)` cell.
///
/// Survives across block boundaries for the lifetime of one folding run;
/// reset only explicitly, never implicitly. Complex input folds as detected
/// power `re^2 + im^2`, real input as the raw sample value.
#[derive(Debug, Clone, PartialEq)]
pub struct FoldedProfile {
    geometry: FoldGeometry,
    amps: Vec<f64>,
    hits: Vec<u64>,
}

impl FoldedProfile {
    pub fn new(geometry: FoldGeometry) -> Self {
        let cells = geometry.nchan * geometry.npol * geometry.nbin;
        Self {
            geometry,
            amps: vec![0.0; cells],
            hits: vec![0; cells],
        }
    }

    pub fn geometry(&self) -> FoldGeometry {
        self.geometry
    }

    fn idx(&self, c: usize, p: usize, b: usize) -> usize {
        (c * self.geometry.npol + p) * self.geometry.nbin + b
    }

    /// Accumulated value for one cell.
    pub fn amp(&self, c: usize, p: usize, b: usize) -> f64 {
        self.amps[self.idx(c, p, b)]
    }

    /// Hit count for one cell.
    pub fn hits(&self, c: usize, p: usize, b: usize) -> u64 {
        self.hits[self.idx(c, p, b)]
    }

    /// Add `amp` and `hits` into one cell.
    pub fn accumulate(&mut self, c: usize, p: usize, b: usize, amp: f64, hits: u64) {
        let i = self.idx(c, p, b);
        self.amps[i] += amp;
        self.hits[i] += hits;
    }

    /// Total hits across all bins of one `(channel, polarization)` signal.
    pub fn total_hits(&self, c: usize, p: usize) -> u64 {
        (0..self.geometry.nbin).map(|b| self.hits(c, p, b)).sum()
    }

    /// Add another profile of identical geometry into this one. Used by
    /// backends synchronizing a device-resident profile back to the host.
    pub fn absorb(&mut self, other: &FoldedProfile) -> Result<()> {
        if other.geometry != self.geometry {
            return Err(Error::config(
                "folded profile",
                "geometry",
                "cannot absorb a profile with different geometry",
            ));
        }
        for i in 0..self.amps.len() {
            self.amps[i] += other.amps[i];
            self.hits[i] += other.hits[i];
        }
        Ok(())
    }

    /// Zero every cell. The only way accumulated state is discarded.
    pub fn reset(&mut self) {
        self.amps.fill(0.0);
        self.hits.fill(0);
    }
}

/// The folding stage: owns the configuration, the authoritative bin plan,
/// the accumulating profile, and a swappable [`FolderEngine`].
pub struct Fold {
    config: FoldConfig,
    engine: Box<dyn FolderEngine>,
    buffering: NullBuffering,
    plan: Option<BinPlan>,
    next_revision: u64,
    profile: Option<FoldedProfile>,
    input_ndim: Option<usize>,
    locked: bool,
    finished: bool,
}

impl Fold {
    pub fn new(config: FoldConfig) -> Self {
        Self {
            config,
            engine: Box::new(HostFolder::new()),
            buffering: NullBuffering::new(),
            plan: None,
            next_revision: 0,
            profile: None,
            input_ndim: None,
            locked: false,
            finished: false,
        }
    }

    /// Install a compute backend. Rejected once data has flowed.
    pub fn set_engine(&mut self, engine: Box<dyn FolderEngine>) -> Result<()> {
        self.check_unlocked("engine")?;
        self.engine = engine;
        Ok(())
    }

    pub fn set_nbin(&mut self, nbin: usize) -> Result<()> {
        self.check_unlocked("nbin")?;
        self.config.nbin = nbin;
        self.plan = None;
        Ok(())
    }

    pub fn set_period(&mut self, period: f64) -> Result<()> {
        self.check_unlocked("period")?;
        self.config.period = period;
        self.plan = None;
        Ok(())
    }

    pub fn set_sample_interval(&mut self, sample_interval: f64) -> Result<()> {
        self.check_unlocked("sample_interval")?;
        self.config.sample_interval = sample_interval;
        self.plan = None;
        Ok(())
    }

    pub fn config(&self) -> &FoldConfig {
        &self.config
    }

    /// The accumulating profile, once the first block has been folded.
    pub fn profile(&self) -> Option<&FoldedProfile> {
        self.profile.as_ref()
    }

    /// Where the stage's next read begins.
    pub fn next_start(&self) -> Option<u64> {
        self.buffering.next_start()
    }

    fn check_unlocked(&self, parameter: &'static str) -> Result<()> {
        if self.locked {
            return Err(Error::config(
                "fold",
                parameter,
                "cannot change folding geometry after data has been folded",
            ));
        }
        Ok(())
    }

    /// Fold one block into the profile.
    pub fn fold(&mut self, block: &SampleBlock) -> Result<()> {
        if self.finished {
            return Err(Error::config(
                "fold",
                "finish",
                "fold called after the profile was finalized",
            ));
        }
        self.config.validate()?;
        if block.ndim != 1 && block.ndim != 2 {
            return Err(Error::config(
                "fold",
                "ndim",
                format!("expected real or complex data, got ndim={}", block.ndim),
            ));
        }
        // Real and complex samples fold different detected quantities, so
        // the dimensionality is part of the committed layout.
        match self.input_ndim {
            Some(committed) if committed != block.ndim => {
                return Err(Error::config(
                    "fold",
                    "ndim",
                    format!(
                        "block has ndim={} but the run is committed to ndim={}",
                        block.ndim, committed
                    ),
                ));
            }
            Some(_) => {}
            None => self.input_ndim = Some(block.ndim),
        }

        let geometry = FoldGeometry {
            nchan: block.nchan,
            npol: block.npol,
            nbin: self.config.nbin,
        };
        match &self.profile {
            Some(profile) => {
                let committed = profile.geometry();
                if committed != geometry {
                    return Err(Error::config(
                        "fold",
                        "geometry",
                        format!(
                            "block has {}x{} chan/pol but the run is committed to {}x{}",
                            geometry.nchan, geometry.npol, committed.nchan, committed.npol
                        ),
                    ));
                }
            }
            None => {
                self.engine.setup(geometry)?;
                self.profile = Some(FoldedProfile::new(geometry));
                self.locked = true;
            }
        }

        let mut work = block.clone();
        self.buffering.pre_transform(&mut work)?;

        let count = work.count() as u64;
        let rebuild = match &self.plan {
            Some(plan) => !plan.reusable_for(&self.config, work.start_sample, count),
            None => true,
        };
        if rebuild {
            debug!(
                "fold: building bin plan for {} samples at {} (nbin={}, period={})",
                count, work.start_sample, self.config.nbin, self.config.period
            );
            self.plan = Some(BinPlan::build(
                &self.config,
                work.start_sample,
                count,
                self.next_revision,
            ));
            self.next_revision += 1;
        }
        let plan = self.plan.as_ref().unwrap();

        if plan.total_hits() != count {
            return Err(Error::PlanMismatch {
                expected: plan.total_hits(),
                actual: count,
            });
        }

        let profile = self.profile.as_mut().unwrap();
        self.engine.fold(plan, &work, profile)?;

        self.buffering.post_transform(&work, work.end_sample())?;
        self.buffering.set_next_start(work.end_sample())
    }

    /// Finalize the run after end-of-stream. May be called once; the
    /// returned profile is final and read-only.
    pub fn finish(&mut self) -> Result<&FoldedProfile> {
        if self.finished {
            return Err(Error::config(
                "fold",
                "finish",
                "profile was already finalized",
            ));
        }
        self.finished = true;
        self.profile.as_ref().ok_or_else(|| {
            Error::config("fold", "finish", "no data was folded in this run")
        })
    }
}

impl std::fmt::Debug for Fold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fold")
            .field("config", &self.config)
            .field("locked", &self.locked)
            .field("finished", &self.finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(start: u64, count: usize) -> Vec<f64> {
        (0..count)
            .map(|i| ((start + i as u64) as f64 * 0.1).sin() + 1.5)
            .collect()
    }

    #[test]
    fn test_bin_of_one_to_one_when_interval_equals_bin_width() {
        // Bin width P/nbin ~ 0.0039 s; with dt equal to it, the first
        // folding cycle maps samples one-to-one onto bins.
        let cfg = FoldConfig {
            period: 1.0,
            nbin: 256,
            sample_interval: 1.0 / 256.0,
        };
        for s in 0..256 {
            assert_eq!(cfg.bin_of(s), s as u32);
        }
        assert_eq!(cfg.bin_of(256), 0);
    }

    #[test]
    fn test_bin_of_periodicity() {
        let cfg = FoldConfig {
            period: 1.0,
            nbin: 256,
            sample_interval: 0.001,
        };
        // round(P/dt) = 1000 samples per period
        assert_eq!(cfg.samples_per_period().round() as u64, 1000);
        for s in [0u64, 3, 17, 255, 999] {
            assert_eq!(cfg.bin_of(s), cfg.bin_of(s + 1000));
        }
        // bin width ~ 0.0039 s: the first four samples share bin 0
        for s in 0..4 {
            assert_eq!(cfg.bin_of(s), 0);
        }
        // bin index is non-decreasing within the first period
        for s in 1..1000 {
            assert!(cfg.bin_of(s) >= cfg.bin_of(s - 1));
        }
        assert_eq!(cfg.bin_of(1000), 0);
    }

    #[test]
    fn test_plan_covers_block_exactly() {
        let cfg = FoldConfig {
            period: 0.01,
            nbin: 16,
            sample_interval: 0.0007,
        };
        let plan = BinPlan::build(&cfg, 123, 500, 0);
        assert_eq!(plan.total_hits(), 500);
        // runs are ordered and contiguous
        let mut next = 0u64;
        for run in plan.runs() {
            assert_eq!(run.offset, next);
            next += run.hits as u64;
        }
        assert_eq!(next, 500);
    }

    #[test]
    fn test_plan_reusable_when_start_is_period_aligned() {
        let cfg = FoldConfig {
            period: 0.25,
            nbin: 64,
            sample_interval: 0.001,
        };
        // 250 samples per period
        let plan = BinPlan::build(&cfg, 0, 250, 0);
        assert!(plan.reusable_for(&cfg, 0, 250));
        assert!(plan.reusable_for(&cfg, 250, 250));
        assert!(plan.reusable_for(&cfg, 750, 250));
        assert!(!plan.reusable_for(&cfg, 251, 250));
        assert!(!plan.reusable_for(&cfg, 250, 249));
    }

    #[test]
    fn test_builder_run_state_spans_boundaries() {
        let mut builder = BinPlanBuilder::new();
        builder.set_bin(0, 7);
        builder.set_bin(1, 7);
        builder.set_bin(2, 8);
        builder.set_bin(3, 8);
        builder.set_bin(4, 8);
        let plan = builder.finish(0, 0);
        assert_eq!(plan.runs().len(), 2);
        assert_eq!(plan.runs()[0], BinRun { ibin: 7, hits: 2, offset: 0 });
        assert_eq!(plan.runs()[1], BinRun { ibin: 8, hits: 3, offset: 2 });
    }

    #[test]
    fn test_fold_chunk_invariance() {
        let cfg = FoldConfig {
            period: 0.0123,
            nbin: 32,
            sample_interval: 0.00033,
        };
        let data = signal(0, 1000);

        let mut whole = Fold::new(cfg.clone());
        whole
            .fold(&SampleBlock::from_real(0, 1.0 / cfg.sample_interval, data.clone()))
            .unwrap();
        let whole_profile = whole.finish().unwrap().clone();

        for splits in [vec![137, 400], vec![1, 999], vec![250, 500, 750]] {
            let mut chunked = Fold::new(cfg.clone());
            let mut prev = 0usize;
            let bounds: Vec<usize> =
                splits.iter().copied().chain(std::iter::once(1000)).collect();
            for end in bounds {
                let block = SampleBlock::from_real(
                    prev as u64,
                    1.0 / cfg.sample_interval,
                    data[prev..end].to_vec(),
                );
                chunked.fold(&block).unwrap();
                prev = end;
            }
            let profile = chunked.finish().unwrap().clone();

            assert_eq!(profile.total_hits(0, 0), 1000);
            for b in 0..cfg.nbin {
                assert_eq!(profile.hits(0, 0, b), whole_profile.hits(0, 0, b));
                assert!(
                    (profile.amp(0, 0, b) - whole_profile.amp(0, 0, b)).abs() < 1e-9,
                    "bin {b} differs"
                );
            }
        }
    }

    #[test]
    fn test_plan_reused_for_aligned_constant_blocks() {
        let cfg = FoldConfig {
            period: 0.25,
            nbin: 64,
            sample_interval: 0.001,
        };
        let mut fold = Fold::new(cfg.clone());
        // 250 samples per period; 250-sample blocks stay aligned
        for i in 0..4u64 {
            let block =
                SampleBlock::from_real(i * 250, 1000.0, signal(i * 250, 250));
            fold.fold(&block).unwrap();
        }
        // one build only: revision counter advanced exactly once
        assert_eq!(fold.next_revision, 1);
        assert_eq!(fold.profile().unwrap().total_hits(0, 0), 1000);
    }

    #[test]
    fn test_geometry_locked_after_first_fold() {
        let mut fold = Fold::new(FoldConfig::default());
        fold.fold(&SampleBlock::from_real(0, 1000.0, signal(0, 100)))
            .unwrap();
        let err = fold.set_nbin(512).unwrap_err();
        assert!(matches!(err, Error::Config { stage: "fold", parameter: "nbin", .. }));
        // prior state unmodified
        assert_eq!(fold.config().nbin, FoldConfig::default().nbin);
    }

    #[test]
    fn test_mismatched_layout_rejected() {
        let mut fold = Fold::new(FoldConfig::default());
        fold.fold(&SampleBlock::from_real(0, 1000.0, signal(0, 64)))
            .unwrap();

        let mut twochan = SampleBlock::new(64, 2, 1, 1, crate::timeseries::SampleOrder::TimeMajor, 1000.0);
        twochan.data_mut().extend(std::iter::repeat(0.5).take(128));
        let err = fold.fold(&twochan).unwrap_err();
        assert!(matches!(err, Error::Config { parameter: "geometry", .. }));
    }

    #[test]
    fn test_mixed_real_and_complex_blocks_rejected() {
        use crate::timeseries::IQSample;

        // Same chan/pol shape, but real folds raw values and complex folds
        // detected power; mixing them in one run must fail.
        let mut fold = Fold::new(FoldConfig::default());
        fold.fold(&SampleBlock::from_real(0, 1000.0, signal(0, 64)))
            .unwrap();
        let complex = SampleBlock::from_complex(64, 1000.0, &[IQSample::new(1.0, 0.5); 64]);
        let err = fold.fold(&complex).unwrap_err();
        assert!(matches!(err, Error::Config { parameter: "ndim", .. }));
        // the committed run is untouched
        assert_eq!(fold.profile().unwrap().total_hits(0, 0), 64);
    }

    #[test]
    fn test_config_yaml_round_trip() {
        let config = FoldConfig {
            period: 0.089,
            nbin: 128,
            sample_interval: 64e-6,
        };
        let yaml = serde_yaml::to_string(&config).unwrap();
        let back: FoldConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, config);

        // omitted fields take defaults
        let partial: FoldConfig = serde_yaml::from_str("nbin: 32\n").unwrap();
        assert_eq!(partial.nbin, 32);
        assert_eq!(partial.period, 1.0);
        assert_eq!(partial.sample_interval, 1e-3);
    }

    #[test]
    fn test_finish_only_once() {
        let mut fold = Fold::new(FoldConfig::default());
        fold.fold(&SampleBlock::from_real(0, 1000.0, signal(0, 16)))
            .unwrap();
        fold.finish().unwrap();
        assert!(fold.finish().is_err());
    }

    #[test]
    fn test_fold_after_finish_rejected() {
        let mut fold = Fold::new(FoldConfig::default());
        fold.fold(&SampleBlock::from_real(0, 1000.0, signal(0, 16)))
            .unwrap();
        fold.finish().unwrap();
        let err = fold
            .fold(&SampleBlock::from_real(16, 1000.0, signal(16, 16)))
            .unwrap_err();
        assert!(err.to_string().contains("finalized"));
    }

    #[test]
    fn test_profile_reset_is_explicit() {
        let geometry = FoldGeometry { nchan: 1, npol: 1, nbin: 8 };
        let mut profile = FoldedProfile::new(geometry);
        profile.accumulate(0, 0, 3, 2.5, 4);
        assert_eq!(profile.hits(0, 0, 3), 4);
        profile.reset();
        assert_eq!(profile.hits(0, 0, 3), 0);
        assert_eq!(profile.amp(0, 0, 3), 0.0);
    }

    #[test]
    fn test_next_start_tracks_stream() {
        let mut fold = Fold::new(FoldConfig::default());
        fold.fold(&SampleBlock::from_real(0, 1000.0, signal(0, 64)))
            .unwrap();
        assert_eq!(fold.next_start(), Some(64));
        fold.fold(&SampleBlock::from_real(64, 1000.0, signal(64, 64)))
            .unwrap();
        assert_eq!(fold.next_start(), Some(128));
    }
}
