//! Accelerator backends for the basefold pipeline
//!
//! Drop-in engine implementations that run the channelizer and folder
//! kernels on an accelerator device. The device here is simulated in
//! software, but the engines go through the full device discipline:
//! capability checks, explicit memory accounting, host/device transfer
//! tracking, and an on-device FFT, so swapping in real device bindings
//! changes nothing above the [`SimulatedAccel`] seam.
//!
//! Engines are selected on the host stages, never the other way around:
//!
//! ```
//! use basefold_core::{Filterbank, FilterbankConfig, Fold, FoldConfig};
//! use basefold_accel::{AccelChannelizer, AccelFolder};
//!
//! let mut fb = Filterbank::new(FilterbankConfig::default());
//! fb.set_engine(Box::new(AccelChannelizer::new())).unwrap();
//!
//! let mut fold = Fold::new(FoldConfig::default());
//! fold.set_engine(Box::new(AccelFolder::new())).unwrap();
//! ```
//!
//! A device failure surfaces as a backend error from the stage that hit
//! it; there is no silent fallback to the host engines.

pub mod channelizer;
pub mod error;
pub mod folder;
pub mod sim;

pub use channelizer::AccelChannelizer;
pub use error::{AccelError, AccelResult};
pub use folder::AccelFolder;
pub use sim::{AccelCapabilities, SimulatedAccel};
