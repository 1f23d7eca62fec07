//! Frequency response kernels for the overlap-discard filterbank
//!
//! The filterbank multiplies the `freq_res` frequency-domain points of each
//! channel by a kernel before the backward transform. A finite-support
//! kernel smears energy in the backward time domain, so a number of samples
//! at each edge of every backward transform are invalid and must be
//! discarded; those discard counts live here alongside the coefficients.

use num_complex::Complex64;
use rustfft::FftPlanner;

use crate::error::{Error, Result};
use crate::timeseries::IQSample;

/// Per-channel frequency-domain kernel plus its edge discard counts.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyResponse {
    coeffs: Vec<IQSample>,
    nfilt_pos: usize,
    nfilt_neg: usize,
}

impl FrequencyResponse {
    /// Flat unit response: no filtering, nothing discarded.
    pub fn identity(freq_res: usize) -> Self {
        Self {
            coeffs: vec![Complex64::new(1.0, 0.0); freq_res],
            nfilt_pos: 0,
            nfilt_neg: 0,
        }
    }

    /// Build a response from FIR filter taps.
    ///
    /// The taps are zero-padded to `freq_res` and transformed to the
    /// frequency domain. Half the tap support is discarded at each edge of
    /// every backward transform.
    pub fn from_fir(taps: &[f64], freq_res: usize) -> Result<Self> {
        if taps.is_empty() {
            return Err(Error::config(
                "frequency response",
                "taps",
                "at least one tap required",
            ));
        }
        if taps.len() > freq_res {
            return Err(Error::config(
                "frequency response",
                "taps",
                format!(
                    "{} taps exceed the frequency resolution {}",
                    taps.len(),
                    freq_res
                ),
            ));
        }

        let mut coeffs: Vec<IQSample> = taps
            .iter()
            .map(|&t| Complex64::new(t, 0.0))
            .chain(std::iter::repeat(Complex64::new(0.0, 0.0)))
            .take(freq_res)
            .collect();
        FftPlanner::new().plan_fft_forward(freq_res).process(&mut coeffs);

        let nfilt_pos = taps.len() / 2;
        let nfilt_neg = taps.len() / 2;
        Ok(Self {
            coeffs,
            nfilt_pos,
            nfilt_neg,
        })
    }

    /// Explicit kernel with caller-specified discard counts.
    pub fn from_kernel(coeffs: Vec<IQSample>, nfilt_pos: usize, nfilt_neg: usize) -> Self {
        Self {
            coeffs,
            nfilt_pos,
            nfilt_neg,
        }
    }

    /// Frequency-domain points per channel.
    pub fn freq_res(&self) -> usize {
        self.coeffs.len()
    }

    /// Samples invalidated at the leading edge of each backward transform.
    pub fn nfilt_pos(&self) -> usize {
        self.nfilt_pos
    }

    /// Samples invalidated at the trailing edge of each backward transform.
    pub fn nfilt_neg(&self) -> usize {
        self.nfilt_neg
    }

    /// Total samples discarded per backward transform.
    pub fn nfilt_total(&self) -> usize {
        self.nfilt_pos + self.nfilt_neg
    }

    /// Kernel coefficients.
    pub fn coeffs(&self) -> &[IQSample] {
        &self.coeffs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_discards_nothing() {
        let r = FrequencyResponse::identity(16);
        assert_eq!(r.freq_res(), 16);
        assert_eq!(r.nfilt_total(), 0);
        assert!(r.coeffs().iter().all(|c| (c.re - 1.0).abs() < 1e-12 && c.im.abs() < 1e-12));
    }

    #[test]
    fn test_single_tap_is_flat() {
        let r = FrequencyResponse::from_fir(&[1.0], 8).unwrap();
        assert_eq!(r.nfilt_total(), 0);
        for c in r.coeffs() {
            assert!((c.re - 1.0).abs() < 1e-12);
            assert!(c.im.abs() < 1e-12);
        }
    }

    #[test]
    fn test_fir_discard_counts() {
        let r = FrequencyResponse::from_fir(&[0.25, 0.5, 0.25], 8).unwrap();
        assert_eq!(r.nfilt_pos(), 1);
        assert_eq!(r.nfilt_neg(), 1);
        // DC gain equals the tap sum
        assert!((r.coeffs()[0].re - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_too_many_taps_rejected() {
        let err = FrequencyResponse::from_fir(&[1.0; 9], 8).unwrap_err();
        assert!(err.to_string().contains("exceed"));
    }
}
