//! Accelerator-resident folding engine

use log::{debug, trace};

use basefold_core::{BinPlan, BinRun, Error, FoldGeometry, FoldedProfile, FolderEngine, Result, SampleBlock};

use crate::sim::SimulatedAccel;

/// Phase-folding kernel resident on a (simulated) device.
///
/// The host bin plan is authoritative; the device keeps a cached copy
/// keyed on the plan revision and re-uploads only when the revision
/// changes, so steady-state folding of constant-size, period-aligned
/// blocks costs one upload for the whole run. Each `fold` runs a
/// segmented per-run reduction into a device-resident profile and
/// synchronizes the result back into the host profile before returning.
pub struct AccelFolder {
    device: SimulatedAccel,
    geometry: Option<FoldGeometry>,
    executed: bool,
    plan_revision: Option<u64>,
    plan_dev: Vec<BinRun>,
    scratch: Option<FoldedProfile>,
}

impl AccelFolder {
    pub fn new() -> Self {
        Self::with_device(SimulatedAccel::new())
    }

    pub fn with_device(device: SimulatedAccel) -> Self {
        Self {
            device,
            geometry: None,
            executed: false,
            plan_revision: None,
            plan_dev: Vec::new(),
            scratch: None,
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

impl Default for AccelFolder {
    fn default() -> Self {
        Self::new()
    }
}

impl FolderEngine for AccelFolder {
    fn setup(&mut self, geometry: FoldGeometry) -> Result<()> {
        if let Some(committed) = self.geometry {
            if self.executed {
                if committed == geometry {
                    return Ok(());
                }
                return Err(Error::config(
                    "accel folder",
                    "geometry",
                    "folding geometry is locked after the first fold",
                ));
            }
        }
        if geometry.nbin == 0 || geometry.nchan == 0 || geometry.npol == 0 {
            return Err(Error::config(
                "accel folder",
                "geometry",
                "all geometry dimensions must be non-zero",
            ));
        }

        let cells = geometry.nchan * geometry.npol * geometry.nbin;
        self.device.alloc(cells * (8 + 8))?;
        debug!(
            "accel folder: device profile allocated for {}x{}x{} cells",
            geometry.nchan, geometry.npol, geometry.nbin
        );
        self.scratch = Some(FoldedProfile::new(geometry));
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
            Error::config("accel folder", "setup", "fold called before setup")
        })?;
        if profile.geometry() != geometry {
            return Err(Error::config(
                "accel folder",
                "geometry",
                "profile does not match the committed geometry",
            ));
        }
        self.device.check_fault()?;
        self.executed = true;

        if self.plan_revision != Some(plan.revision()) {
            let runs = plan.runs();
            if runs.len() > self.device.capabilities().max_plan_runs {
                return Err(Error::Backend(format!(
                    "bin plan with {} runs exceeds device plan storage ({})",
                    runs.len(),
                    self.device.capabilities().max_plan_runs
                )));
            }
            self.plan_dev = runs.to_vec();
            self.device
                .record_upload(runs.len() * std::mem::size_of::<BinRun>());
            self.plan_revision = Some(plan.revision());
            debug!(
                "accel folder: uploaded plan revision {} ({} runs)",
                plan.revision(),
                runs.len()
            );
        } else {
            trace!("accel folder: reusing cached plan revision {}", plan.revision());
        }

        // Segmented reduction keyed by plan runs, into the device profile.
        let scratch = self.scratch.as_mut().ok_or_else(|| {
            Error::config("accel folder", "setup", "fold called before setup")
        })?;
        scratch.reset();
        for run in &self.plan_dev {
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
                    scratch.accumulate(c, p, bin, sum, run.hits as u64);
                }
            }
        }

        // Synchronize back to the host-side profile before returning.
        profile.absorb(scratch)?;
        self.device.record_download(
            geometry.nchan * geometry.npol * geometry.nbin * (8 + 8),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basefold_core::FoldConfig;

    fn geometry() -> FoldGeometry {
        FoldGeometry { nchan: 1, npol: 1, nbin: 8 }
    }

    fn config() -> FoldConfig {
        FoldConfig {
            period: 0.008,
            nbin: 8,
            sample_interval: 0.001,
        }
    }

    #[test]
    fn test_plan_uploaded_once_per_revision() {
        let mut engine = AccelFolder::new();
        engine.setup(geometry()).unwrap();
        let mut profile = FoldedProfile::new(geometry());

        let plan = BinPlan::build(&config(), 0, 16, 7);
        for i in 0..3u64 {
            let block = SampleBlock::from_real(i * 16, 1000.0, vec![1.0; 16]);
            engine.fold(&plan, &block, &mut profile).unwrap();
        }
        assert_eq!(engine.device().uploads(), 1);
        assert_eq!(engine.device().downloads(), 3);
        assert_eq!(profile.total_hits(0, 0), 48);
    }

    #[test]
    fn test_rebuilt_plan_reuploaded() {
        let mut engine = AccelFolder::new();
        engine.setup(geometry()).unwrap();
        let mut profile = FoldedProfile::new(geometry());

        let block = SampleBlock::from_real(0, 1000.0, vec![1.0; 16]);
        engine
            .fold(&BinPlan::build(&config(), 0, 16, 0), &block, &mut profile)
            .unwrap();
        engine
            .fold(&BinPlan::build(&config(), 0, 16, 1), &block, &mut profile)
            .unwrap();
        assert_eq!(engine.device().uploads(), 2);
    }

    #[test]
    fn test_setup_before_fold_required() {
        let mut engine = AccelFolder::new();
        let block = SampleBlock::from_real(0, 1000.0, vec![1.0; 8]);
        let plan = BinPlan::build(&config(), 0, 8, 0);
        let mut profile = FoldedProfile::new(geometry());
        assert!(engine.fold(&plan, &block, &mut profile).is_err());
    }

    #[test]
    fn test_device_memory_exhaustion_is_backend_error() {
        use crate::sim::AccelCapabilities;
        let device = SimulatedAccel::with_capabilities(AccelCapabilities {
            device_memory: 16,
            ..Default::default()
        });
        let mut engine = AccelFolder::with_device(device);
        let err = engine.setup(geometry()).unwrap_err();
        assert!(matches!(err, Error::Backend(_)));
    }
}
