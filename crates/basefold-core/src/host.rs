//! Reference host engines
//!
//! These are the embedded fallback kernels every stage carries: plain host
//! implementations of the channelizer and folder contracts, used when no
//! accelerator engine is installed and as the correctness baseline any
//! other backend must agree with within floating tolerance.

use std::sync::Arc;

use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};

use crate::engine::{ChannelizerEngine, FilterbankPlan, FoldGeometry, FolderEngine};
use crate::error::{Error, Result};
use crate::fold::{BinPlan, FoldedProfile};
use crate::timeseries::{IQSample, SampleBlock};

/// Host overlap-discard convolution kernel built on planned FFTs.
///
/// Scratch and transform plans are allocated once at `setup`; steady-state
/// execution performs no allocation.
pub struct HostChannelizer {
    plan: Option<FilterbankPlan>,
    executed: bool,
    fwd: Option<Arc<dyn Fft<f64>>>,
    bwd: Option<Arc<dyn Fft<f64>>>,
    window: Vec<IQSample>,
    subband: Vec<IQSample>,
    scratch: Vec<IQSample>,
}

impl HostChannelizer {
    pub fn new() -> Self {
        Self {
            plan: None,
            executed: false,
            fwd: None,
            bwd: None,
            window: Vec::new(),
            subband: Vec::new(),
            scratch: Vec::new(),
        }
    }
}

impl Default for HostChannelizer {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_plan(plan: &FilterbankPlan) -> Result<()> {
    if plan.nchan < 1 {
        return Err(Error::config("channelizer engine", "nchan", "must be at least 1"));
    }
    if plan.freq_res < 1 {
        return Err(Error::config(
            "channelizer engine",
            "freq_res",
            "must be at least 1",
        ));
    }
    if plan.kernel.len() != plan.freq_res {
        return Err(Error::config(
            "channelizer engine",
            "kernel",
            format!(
                "kernel holds {} points but freq_res is {}",
                plan.kernel.len(),
                plan.freq_res
            ),
        ));
    }
    if plan.nfilt_pos + plan.nfilt_neg >= plan.freq_res {
        return Err(Error::config(
            "channelizer engine",
            "kernel",
            "discard counts leave no output samples per transform",
        ));
    }
    Ok(())
}

impl ChannelizerEngine for HostChannelizer {
    fn setup(&mut self, plan: &FilterbankPlan) -> Result<()> {
        validate_plan(plan)?;
        if let Some(committed) = &self.plan {
            if self.executed {
                if committed == plan {
                    return Ok(());
                }
                return Err(Error::config(
                    "channelizer engine",
                    "plan",
                    "geometry is locked after the first execute",
                ));
            }
        }

        let mut planner = FftPlanner::new();
        let fwd = planner.plan_fft_forward(plan.fwd_nfft());
        let bwd = planner.plan_fft_inverse(plan.freq_res);
        let scratch_len = fwd
            .get_inplace_scratch_len()
            .max(bwd.get_inplace_scratch_len());

        self.window = vec![Complex64::new(0.0, 0.0); plan.fwd_nfft()];
        self.subband = vec![Complex64::new(0.0, 0.0); plan.freq_res];
        self.scratch = vec![Complex64::new(0.0, 0.0); scratch_len];
        self.fwd = Some(fwd);
        self.bwd = Some(bwd);
        self.plan = Some(plan.clone());
        Ok(())
    }

    fn execute(&mut self, input: &[IQSample], nparts: usize, out: &mut [IQSample]) -> Result<()> {
        let plan = self.plan.as_ref().ok_or_else(|| {
            Error::config("channelizer engine", "setup", "execute called before setup")
        })?;
        if nparts == 0 {
            return Err(Error::config(
                "channelizer engine",
                "input",
                "at least one transform is required",
            ));
        }
        let step = plan.step();
        let fwd_nfft = plan.fwd_nfft();
        let needed = (nparts - 1) * step + fwd_nfft;
        if input.len() < needed {
            return Err(Error::config(
                "channelizer engine",
                "input",
                format!("{} transforms need {} samples, got {}", nparts, needed, input.len()),
            ));
        }
        if out.len() != plan.output_len(nparts) {
            return Err(Error::config(
                "channelizer engine",
                "output",
                format!(
                    "output buffer holds {} values, expected {}",
                    out.len(),
                    plan.output_len(nparts)
                ),
            ));
        }
        self.executed = true;

        let fwd = self.fwd.as_ref().unwrap();
        let bwd = self.bwd.as_ref().unwrap();
        let scale = 1.0 / fwd_nfft as f64;
        let nkeep = plan.nkeep();

        for part in 0..nparts {
            let base = part * step;
            self.window.copy_from_slice(&input[base..base + fwd_nfft]);
            fwd.process_with_scratch(&mut self.window, &mut self.scratch);

            for chan in 0..plan.nchan {
                for k in 0..plan.freq_res {
                    self.subband[k] = self.window[chan * plan.freq_res + k] * plan.kernel[k];
                }
                bwd.process_with_scratch(&mut self.subband, &mut self.scratch);
                for k in 0..nkeep {
                    out[plan.output_index(part, k, chan, nparts)] =
                        self.subband[plan.nfilt_pos + k] * scale;
                }
            }
        }
        Ok(())
    }
}

/// Host phase-folding kernel: walks the run-length bin plan and adds each
/// run's detected samples into the profile.
#[derive(Debug, Default)]
pub struct HostFolder {
    geometry: Option<FoldGeometry>,
    executed: bool,
}

impl HostFolder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FolderEngine for HostFolder {
    fn setup(&mut self, geometry: FoldGeometry) -> Result<()> {
        if let Some(committed) = self.geometry {
            if self.executed {
                if committed == geometry {
                    return Ok(());
                }
                return Err(Error::config(
                    "folder engine",
                    "geometry",
                    "folding geometry is locked after the first fold",
                ));
            }
        }
        if geometry.nbin == 0 || geometry.nchan == 0 || geometry.npol == 0 {
            return Err(Error::config(
                "folder engine",
                "geometry",
                "all geometry dimensions must be non-zero",
            ));
        }
        self.geometry = Some(geometry);
        Ok(())
    }

    fn fold(
        &mut self,
        plan: &BinPlan,
        block: &SampleBlock,
        profile: &mut FoldedProfile,
    ) -> Result<()> {
        let geometry = self.geometry.ok_or_else(|| {
            Error::config("folder engine", "setup", "fold called before setup")
        })?;
        if profile.geometry() != geometry {
            return Err(Error::config(
                "folder engine",
                "geometry",
                "profile does not match the committed geometry",
            ));
        }
        self.executed = true;

        for run in plan.runs() {
            let bin = run.ibin as usize;
            for c in 0..geometry.nchan {
                for p in 0..geometry.npol {
                    let mut sum = 0.0;
                    for i in 0..run.hits as usize {
                        let t = run.offset as usize + i;
                        sum += if block.ndim == 2 {
                            let re = block.value(t, c, p, 0);
                            let im = block.value(t, c, p, 1);
                            re * re + im * im
                        } else {
                            block.value(t, c, p, 0)
                        };
                    }
                    profile.accumulate(c, p, bin, sum, run.hits as u64);
                }
            }
        }
        Ok(())
    }
}
