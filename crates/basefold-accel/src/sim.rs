//! Simulated accelerator device
//!
//! Software emulation of an accelerator-resident backend: tracked device
//! memory, explicit upload/download accounting, and a self-contained
//! radix-2 transform kernel. Engines built on it behave like real
//! device-backed engines — setup-time allocation, upload-once plan caches,
//! synchronous execution — without any hardware present, which makes it the
//! vehicle for engine-parity and amortization testing.

use num_complex::Complex64;

use crate::error::{AccelError, AccelResult};

/// Static limits of a device.
#[derive(Debug, Clone)]
pub struct AccelCapabilities {
    /// Largest transform length the device kernel supports
    pub max_transform: usize,
    /// Largest bin plan (in runs) that fits device plan storage
    pub max_plan_runs: usize,
    /// Device memory available for engine allocations, in bytes
    pub device_memory: usize,
}

impl Default for AccelCapabilities {
    fn default() -> Self {
        Self {
            max_transform: 65536,
            max_plan_runs: 1 << 20,
            device_memory: 64 * 1024 * 1024,
        }
    }
}

/// Simulated device: allocation, transfer accounting, and the transform
/// kernel engines delegate to.
#[derive(Debug)]
pub struct SimulatedAccel {
    capabilities: AccelCapabilities,
    allocated: usize,
    uploads: u64,
    upload_bytes: u64,
    downloads: u64,
    injected_fault: Option<String>,
}

impl SimulatedAccel {
    pub fn new() -> Self {
        Self::with_capabilities(AccelCapabilities::default())
    }

    pub fn with_capabilities(capabilities: AccelCapabilities) -> Self {
        Self {
            capabilities,
            allocated: 0,
            uploads: 0,
            upload_bytes: 0,
            downloads: 0,
            injected_fault: None,
        }
    }

    pub fn capabilities(&self) -> &AccelCapabilities {
        &self.capabilities
    }

    /// Claim `bytes` of device memory; fails fast when the device is full
    /// rather than silently spilling to the host.
    pub fn alloc(&mut self, bytes: usize) -> AccelResult<()> {
        if self.allocated + bytes > self.capabilities.device_memory {
            return Err(AccelError::CapabilityExceeded(format!(
                "allocation of {} bytes exceeds device memory ({} of {} in use)",
                bytes, self.allocated, self.capabilities.device_memory
            )));
        }
        self.allocated += bytes;
        Ok(())
    }

    /// Bytes currently allocated on the device.
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    /// Record one host-to-device transfer.
    pub fn record_upload(&mut self, bytes: usize) {
        self.uploads += 1;
        self.upload_bytes += bytes as u64;
    }

    /// Record one device-to-host transfer.
    pub fn record_download(&mut self, _bytes: usize) {
        self.downloads += 1;
    }

    /// Host-to-device transfers performed so far.
    pub fn uploads(&self) -> u64 {
        self.uploads
    }

    /// Device-to-host transfers performed so far.
    pub fn downloads(&self) -> u64 {
        self.downloads
    }

    /// Make the next kernel launch fail; test hook for the fatal backend
    /// error path.
    pub fn inject_fault(&mut self, reason: impl Into<String>) {
        self.injected_fault = Some(reason.into());
    }

    /// Raise any injected fault. Called at every kernel launch.
    pub fn check_fault(&mut self) -> AccelResult<()> {
        match self.injected_fault.take() {
            Some(reason) => Err(AccelError::KernelFailed(reason)),
            None => Ok(()),
        }
    }

    /// In-place radix-2 transform. Forward uses the e^(-2πi/n) convention;
    /// inverse is unnormalized, matching the host engine's scaling.
    pub fn fft(&mut self, data: &mut [Complex64], inverse: bool) -> AccelResult<()> {
        let n = data.len();
        if n <= 1 {
            return Ok(());
        }
        if !n.is_power_of_two() {
            return Err(AccelError::NotSupported(format!(
                "device transform requires a power-of-two length, got {n}"
            )));
        }
        if n > self.capabilities.max_transform {
            return Err(AccelError::CapabilityExceeded(format!(
                "transform length {} exceeds device maximum {}",
                n, self.capabilities.max_transform
            )));
        }

        // Bit-reversal permutation
        let mut j = 0usize;
        for i in 0..n {
            if i < j {
                data.swap(i, j);
            }
            let mut m = n >> 1;
            while m >= 1 && j >= m {
                j -= m;
                m >>= 1;
            }
            j += m;
        }

        // Iterative butterflies
        let sign = if inverse { 1.0 } else { -1.0 };
        let mut len = 2;
        while len <= n {
            let angle = sign * 2.0 * std::f64::consts::PI / len as f64;
            let wlen = Complex64::from_polar(1.0, angle);
            let mut base = 0;
            while base < n {
                let mut w = Complex64::new(1.0, 0.0);
                for k in 0..len / 2 {
                    let u = data[base + k];
                    let v = data[base + k + len / 2] * w;
                    data[base + k] = u + v;
                    data[base + k + len / 2] = u - v;
                    w *= wlen;
                }
                base += len;
            }
            len <<= 1;
        }
        Ok(())
    }
}

impl Default for SimulatedAccel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fft_roundtrip() {
        let mut device = SimulatedAccel::new();
        let original: Vec<Complex64> = (0..16)
            .map(|i| Complex64::new((i as f64 * 0.3).sin(), (i as f64 * 0.7).cos()))
            .collect();
        let mut data = original.clone();
        device.fft(&mut data, false).unwrap();
        device.fft(&mut data, true).unwrap();
        for (a, b) in data.iter().zip(original.iter()) {
            assert!((a / 16.0 - b).norm() < 1e-12);
        }
    }

    #[test]
    fn test_fft_rejects_non_power_of_two() {
        let mut device = SimulatedAccel::new();
        let mut data = vec![Complex64::new(0.0, 0.0); 6];
        assert!(matches!(
            device.fft(&mut data, false),
            Err(AccelError::NotSupported(_))
        ));
    }

    #[test]
    fn test_alloc_respects_device_memory() {
        let mut device = SimulatedAccel::with_capabilities(AccelCapabilities {
            device_memory: 1024,
            ..Default::default()
        });
        device.alloc(512).unwrap();
        device.alloc(512).unwrap();
        assert!(matches!(
            device.alloc(1),
            Err(AccelError::CapabilityExceeded(_))
        ));
        assert_eq!(device.allocated(), 1024);
    }

    #[test]
    fn test_injected_fault_fires_once() {
        let mut device = SimulatedAccel::new();
        device.inject_fault("simulated launch failure");
        assert!(matches!(
            device.check_fault(),
            Err(AccelError::KernelFailed(_))
        ));
        assert!(device.check_fault().is_ok());
    }
}
