//! Coherent filterbank — overlap-discard FFT channelization
//!
//! Splits each wideband input signal into `nchan` narrower frequency
//! channels. One forward transform of `nchan * freq_res` samples resolves
//! `freq_res` frequency-domain points per channel; after multiplying by the
//! configured frequency response, a backward transform per channel returns
//! to the time domain, where the response's roll-off invalidates
//! `nfilt_pos + nfilt_neg` samples at the edges. Those samples are never
//! emitted and must be re-read on the next transform, so consecutive
//! transforms overlap by `(nfilt_pos + nfilt_neg) * nchan` input samples —
//! the buffering policy owns that continuity.
//!
//! ```text
//! input ──┬─ window of nchan*freq_res ──FFT──┬─ chan 0: ×kernel ─IFFT─ keep middle ─┐
//!         │                                  ├─ chan 1: ...                         ├─ output
//!         └─ next window starts `step` later └─ chan n: ...                         ┘
//! ```
//!
//! A block shorter than one transform window is held via the buffering
//! policy and produces no output for that call; it is never processed as a
//! short, invalid window.

use log::{debug, trace};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::buffering::{BufferingPolicy, OverlapBuffering};
use crate::engine::{ChannelizerEngine, FilterbankPlan};
use crate::error::{Error, Result};
use crate::host::HostChannelizer;
use crate::response::FrequencyResponse;
use crate::timeseries::{IQSample, SampleBlock, SampleOrder};

/// User-facing filterbank configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterbankConfig {
    /// Channels each input signal is divided into
    pub nchan: usize,
    /// Frequency-resolution factor: frequency-domain points per channel
    pub freq_res: usize,
    /// Interleaving of the output block
    pub output_order: SampleOrder,
}

impl Default for FilterbankConfig {
    fn default() -> Self {
        Self {
            nchan: 8,
            freq_res: 1,
            output_order: SampleOrder::TimeMajor,
        }
    }
}

/// The channelizer stage: buffering, deferral, and output assembly around a
/// swappable [`ChannelizerEngine`].
pub struct Filterbank {
    config: FilterbankConfig,
    response: Option<FrequencyResponse>,
    engine: Box<dyn ChannelizerEngine>,
    buffering: OverlapBuffering,
    plan: Option<FilterbankPlan>,
    max_samples: usize,
    locked: bool,
    input_layout: Option<(usize, usize, usize)>,
    out_start: u64,
    signal_buf: Vec<IQSample>,
    engine_out: Vec<IQSample>,
}

impl Filterbank {
    pub fn new(config: FilterbankConfig) -> Self {
        Self {
            config,
            response: None,
            engine: Box::new(HostChannelizer::new()),
            buffering: OverlapBuffering::new(),
            plan: None,
            max_samples: 0,
            locked: false,
            input_layout: None,
            out_start: 0,
            signal_buf: Vec::new(),
            engine_out: Vec::new(),
        }
    }

    /// Install a compute backend. Rejected once data has flowed.
    pub fn set_engine(&mut self, engine: Box<dyn ChannelizerEngine>) -> Result<()> {
        self.check_unlocked("engine")?;
        self.engine = engine;
        Ok(())
    }

    /// Install a frequency response kernel. Rejected once data has flowed.
    pub fn set_response(&mut self, response: FrequencyResponse) -> Result<()> {
        self.check_unlocked("frequency_response")?;
        self.response = Some(response);
        self.plan = None;
        Ok(())
    }

    pub fn set_nchan(&mut self, nchan: usize) -> Result<()> {
        self.check_unlocked("nchan")?;
        self.config.nchan = nchan;
        self.plan = None;
        Ok(())
    }

    pub fn set_freq_res(&mut self, freq_res: usize) -> Result<()> {
        self.check_unlocked("freq_res")?;
        self.config.freq_res = freq_res;
        self.plan = None;
        Ok(())
    }

    pub fn set_output_order(&mut self, order: SampleOrder) -> Result<()> {
        self.check_unlocked("output_order")?;
        self.config.output_order = order;
        self.plan = None;
        Ok(())
    }

    /// Largest input block the stage should expect; used by [`reserve`](Self::reserve).
    pub fn set_maximum_samples(&mut self, max_samples: usize) -> Result<()> {
        self.check_unlocked("maximum_samples")?;
        self.max_samples = max_samples;
        Ok(())
    }

    pub fn config(&self) -> &FilterbankConfig {
        &self.config
    }

    /// Derive the transform geometry from the current configuration.
    /// Re-run automatically whenever a parameter changes (parameters are
    /// immutable once data has flowed, so in practice this runs once).
    pub fn prepare(&mut self) -> Result<()> {
        if self.config.nchan < 2 {
            return Err(Error::config("filterbank", "nchan", "must be at least 2"));
        }
        if self.config.freq_res < 1 {
            return Err(Error::config("filterbank", "freq_res", "must be at least 1"));
        }
        let response = self
            .response
            .get_or_insert_with(|| FrequencyResponse::identity(self.config.freq_res));
        if response.freq_res() != self.config.freq_res {
            return Err(Error::config(
                "filterbank",
                "frequency_response",
                format!(
                    "response resolves {} points per channel but freq_res is {}",
                    response.freq_res(),
                    self.config.freq_res
                ),
            ));
        }
        if response.nfilt_total() >= self.config.freq_res {
            return Err(Error::config(
                "filterbank",
                "frequency_response",
                "discard counts leave no valid samples per transform",
            ));
        }

        let plan = FilterbankPlan {
            nchan: self.config.nchan,
            freq_res: self.config.freq_res,
            nfilt_pos: response.nfilt_pos(),
            nfilt_neg: response.nfilt_neg(),
            output_order: self.config.output_order,
            kernel: response.coeffs().to_vec(),
        };
        debug!(
            "filterbank: nchan={} freq_res={} fwd_nfft={} overlap={} step={}",
            plan.nchan,
            plan.freq_res,
            plan.fwd_nfft(),
            plan.overlap(),
            plan.step()
        );
        self.plan = Some(plan);
        Ok(())
    }

    /// Pre-size the per-signal staging buffers for the configured maximum
    /// input, so steady-state [`process`](Self::process) calls fill them
    /// without growing. The emitted block is owned by the caller and is
    /// allocated per call.
    pub fn reserve(&mut self) {
        if let Some(plan) = &self.plan {
            if self.max_samples > 0 {
                let max_parts = self.max_samples / plan.step() + 1;
                self.engine_out.reserve(plan.output_len(max_parts));
                self.signal_buf.reserve(self.max_samples + plan.fwd_nfft());
            }
        }
    }

    /// Minimum samples required before any output can be produced.
    pub fn minimum_samples(&self) -> Option<usize> {
        self.plan.as_ref().map(|p| p.fwd_nfft())
    }

    /// Samples re-read (not lost) at each transform boundary.
    pub fn minimum_samples_lost(&self) -> Option<usize> {
        self.plan.as_ref().map(|p| p.overlap())
    }

    /// Time samples currently held by the buffering policy.
    pub fn pending(&self) -> usize {
        self.buffering.pending()
    }

    /// Where the stage's next read begins.
    pub fn next_start(&self) -> Option<u64> {
        self.buffering.next_start()
    }

    fn check_unlocked(&self, parameter: &'static str) -> Result<()> {
        if self.locked {
            return Err(Error::config(
                "filterbank",
                parameter,
                "cannot change channelizer geometry after data has flowed",
            ));
        }
        Ok(())
    }

    /// Channelize one block. Returns `Ok(None)` when fewer samples than one
    /// transform window are available; the samples are retained and the
    /// next call resumes exactly where this one left off.
    pub fn process(&mut self, block: &SampleBlock) -> Result<Option<SampleBlock>> {
        if block.order != SampleOrder::TimeMajor {
            return Err(Error::config(
                "filterbank",
                "order",
                "input must be time-major",
            ));
        }
        if block.ndim != 1 && block.ndim != 2 {
            return Err(Error::config(
                "filterbank",
                "ndim",
                format!("expected real or complex data, got ndim={}", block.ndim),
            ));
        }
        let layout = (block.nchan, block.npol, block.ndim);
        match self.input_layout {
            Some(committed) if committed != layout => {
                return Err(Error::config(
                    "filterbank",
                    "layout",
                    format!(
                        "block layout {:?} does not match committed layout {:?}",
                        layout, committed
                    ),
                ));
            }
            Some(_) => {}
            None => self.input_layout = Some(layout),
        }

        if !self.locked {
            if self.plan.is_none() {
                self.prepare()?;
            }
            self.engine.setup(self.plan.as_ref().unwrap())?;
            self.reserve();
            self.locked = true;
        }

        let mut work = block.clone();
        self.buffering.pre_transform(&mut work)?;

        let plan = self.plan.as_ref().unwrap();
        let fwd_nfft = plan.fwd_nfft();
        let step = plan.step();
        let overlap = plan.overlap();
        let nkeep = plan.nkeep();
        let nchan = plan.nchan;

        let avail = work.count();
        if avail < fwd_nfft {
            trace!(
                "filterbank: holding {avail} samples, need {fwd_nfft} for one transform"
            );
            self.buffering.post_transform(&work, work.start_sample)?;
            self.buffering.set_next_start(work.start_sample)?;
            return Ok(None);
        }

        let nparts = (avail - overlap) / step;
        let consumed = nparts * step;
        let needed = consumed + overlap;
        let count_out = nparts * nkeep;

        let (in_nchan, in_npol, _) = layout;
        let mut out = SampleBlock::new(
            self.out_start,
            in_nchan * nchan,
            in_npol,
            2,
            plan.output_order,
            work.sample_rate / nchan as f64,
        );
        let out_len = out.stride() * count_out;
        out.data_mut().resize(out_len, 0.0);

        for c_in in 0..in_nchan {
            for p in 0..in_npol {
                work.signal_into(c_in, p, &mut self.signal_buf);
                self.engine_out
                    .resize(plan.output_len(nparts), Complex64::new(0.0, 0.0));
                self.engine
                    .execute(&self.signal_buf[..needed], nparts, &mut self.engine_out)?;

                for part in 0..nparts {
                    for k in 0..nkeep {
                        let t = part * nkeep + k;
                        for sub in 0..nchan {
                            let v = self.engine_out[plan.output_index(part, k, sub, nparts)];
                            let chan = c_in * nchan + sub;
                            let i = out.value_index(t, chan, p, 0);
                            out.data_mut()[i] = v.re;
                            out.data_mut()[i + 1] = v.im;
                        }
                    }
                }
            }
        }

        self.buffering
            .post_transform(&work, work.start_sample + consumed as u64)?;
        self.buffering
            .set_next_start(work.start_sample + consumed as u64)?;
        self.out_start += count_out as u64;
        Ok(Some(out))
    }
}

impl std::fmt::Debug for Filterbank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filterbank")
            .field("config", &self.config)
            .field("locked", &self.locked)
            .field("pending", &self.pending())
            .finish()
    }
}
