//! # basefold-core
//!
//! Streaming DSP core for radio-telescope baseband data: successive finite
//! blocks drawn from a conceptually unbounded sample stream pass through
//! staged transformations whose numerically heavy kernels can be swapped
//! between a reference host implementation and an accelerator-resident
//! engine without touching the stage bookkeeping.
//!
//! ## Signal Flow
//!
//! ```text
//! source ──SampleBlock──> Filterbank ──channelized blocks──> Fold ──> FoldedProfile
//!              │               │ OverlapBuffering                │ BinPlan + engine
//!              └ honors next_start (overlap re-delivery)         └ flushed once at EOS
//! ```
//!
//! Two guarantees hold across arbitrary block boundaries:
//!
//! - **Channelizer chunk invariance**: however the input stream is split
//!   into blocks, the concatenated channelized output is identical to
//!   processing the whole stream at once.
//! - **Folder resumability**: the final folded profile is independent of
//!   the partition of the stream into blocks.
//!
//! ## Example
//!
//! ```rust
//! use basefold_core::{Filterbank, FilterbankConfig, Fold, FoldConfig, SampleBlock};
//!
//! let mut filterbank = Filterbank::new(FilterbankConfig {
//!     nchan: 8,
//!     ..Default::default()
//! });
//! let mut fold = Fold::new(FoldConfig {
//!     period: 0.064,
//!     nbin: 16,
//!     sample_interval: 0.001,
//! });
//!
//! let samples: Vec<f64> = (0..4096).map(|i| (i as f64 * 0.07).sin()).collect();
//! let block = SampleBlock::from_real(0, 1000.0, samples);
//! if let Some(channelized) = filterbank.process(&block).unwrap() {
//!     fold.fold(&channelized).unwrap();
//! }
//! let profile = fold.finish().unwrap();
//! assert_eq!(profile.total_hits(0, 0), 512);
//! ```

pub mod buffering;
pub mod engine;
pub mod error;
pub mod filterbank;
pub mod fold;
pub mod host;
pub mod response;
pub mod source;
pub mod timeseries;

pub use buffering::{BufferingPolicy, NullBuffering, OverlapBuffering};
pub use engine::{ChannelizerEngine, FilterbankPlan, FoldGeometry, FolderEngine};
pub use error::{Error, Result};
pub use filterbank::{Filterbank, FilterbankConfig};
pub use fold::{BinPlan, BinPlanBuilder, BinRun, Fold, FoldConfig, FoldedProfile};
pub use host::{HostChannelizer, HostFolder};
pub use response::FrequencyResponse;
pub use source::{SampleSource, VecSource};
pub use timeseries::{IQSample, SampleBlock, SampleOrder};
