//! Accelerator-resident channelizer engine

use log::{debug, trace};
use num_complex::Complex64;

use basefold_core::{ChannelizerEngine, Error, FilterbankPlan, IQSample, Result};

use crate::sim::SimulatedAccel;

/// Overlap-discard convolution kernel resident on a (simulated) device.
///
/// `setup` uploads the frequency-response kernel and claims device scratch
/// once, sized for the committed transform geometry; `execute` launches the
/// per-window transform kernel and blocks until the output is downloaded,
/// so the caller may reuse its buffers immediately.
pub struct AccelChannelizer {
    device: SimulatedAccel,
    plan: Option<FilterbankPlan>,
    executed: bool,
    kernel: Vec<IQSample>,
    window: Vec<IQSample>,
    subband: Vec<IQSample>,
}

impl AccelChannelizer {
    pub fn new() -> Self {
        Self::with_device(SimulatedAccel::new())
    }

    pub fn with_device(device: SimulatedAccel) -> Self {
        Self {
            device,
            plan: None,
            executed: false,
            kernel: Vec::new(),
            window: Vec::new(),
            subband: Vec::new(),
        }
    }

    /// The underlying device, for transfer accounting.
    pub fn device(&self) -> &SimulatedAccel {
        &self.device
    }

    /// Mutable device access, for fault injection in tests.
    pub fn device_mut(&mut self) -> &mut SimulatedAccel {
        &mut self.device
    }
}

impl Default for AccelChannelizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelizerEngine for AccelChannelizer {
    fn setup(&mut self, plan: &FilterbankPlan) -> Result<()> {
        if let Some(committed) = &self.plan {
            if self.executed {
                if committed == plan {
                    return Ok(());
                }
                return Err(Error::config(
                    "accel channelizer",
                    "plan",
                    "geometry is locked after the first execute",
                ));
            }
        }

        let fwd_nfft = plan.fwd_nfft();
        if !fwd_nfft.is_power_of_two() || !plan.freq_res.is_power_of_two() {
            return Err(Error::Backend(format!(
                "device transforms require power-of-two lengths (fwd_nfft={}, freq_res={})",
                fwd_nfft, plan.freq_res
            )));
        }

        let sample_bytes = std::mem::size_of::<Complex64>();
        self.device
            .alloc((fwd_nfft + 2 * plan.freq_res) * sample_bytes)?;
        self.device.record_upload(plan.freq_res * sample_bytes);
        debug!(
            "accel channelizer: committed fwd_nfft={} freq_res={} on device",
            fwd_nfft, plan.freq_res
        );

        self.kernel = plan.kernel.clone();
        self.window = vec![Complex64::new(0.0, 0.0); fwd_nfft];
        self.subband = vec![Complex64::new(0.0, 0.0); plan.freq_res];
        self.plan = Some(plan.clone());
        Ok(())
    }

    fn execute(&mut self, input: &[IQSample], nparts: usize, out: &mut [IQSample]) -> Result<()> {
        let plan = self.plan.as_ref().ok_or_else(|| {
            Error::config("accel channelizer", "setup", "execute called before setup")
        })?;
        if nparts == 0 {
            return Err(Error::config(
                "accel channelizer",
                "input",
                "at least one transform is required",
            ));
        }
        let step = plan.step();
        let fwd_nfft = plan.fwd_nfft();
        let needed = (nparts - 1) * step + fwd_nfft;
        if input.len() < needed || out.len() != plan.output_len(nparts) {
            return Err(Error::config(
                "accel channelizer",
                "input",
                format!(
                    "{} transforms need {} input samples and {} outputs, got {} and {}",
                    nparts,
                    needed,
                    plan.output_len(nparts),
                    input.len(),
                    out.len()
                ),
            ));
        }
        self.device.check_fault()?;
        self.executed = true;

        let scale = 1.0 / fwd_nfft as f64;
        let nkeep = plan.nkeep();
        trace!("accel channelizer: launching {nparts} transforms");

        for part in 0..nparts {
            let base = part * step;
            self.window.copy_from_slice(&input[base..base + fwd_nfft]);
            self.device.fft(&mut self.window, false)?;

            for chan in 0..plan.nchan {
                for k in 0..plan.freq_res {
                    self.subband[k] = self.window[chan * plan.freq_res + k] * self.kernel[k];
                }
                self.device.fft(&mut self.subband, true)?;
                for k in 0..nkeep {
                    out[plan.output_index(part, k, chan, nparts)] =
                        self.subband[plan.nfilt_pos + k] * scale;
                }
            }
        }

        self.device
            .record_download(out.len() * std::mem::size_of::<Complex64>());
        Ok(())
    }
}
