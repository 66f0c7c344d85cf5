//! Phase sequencers
//!
//! Each sequencer is an explicit state machine advanced by `tick`. A
//! phase waits by returning without transitioning; timeouts are
//! "elapsed >= budget" checks against the phase entry time.

pub mod cut;
pub mod feed;
pub mod splice;

pub use cut::{CutConfig, CutError, CutPhase, CutResult, CutStatistics, CuttingSystem};
pub use feed::{FeedConfig, FeedError, FeedEvent, FeedMode, FeedStatistics, FeedSystem};
pub use splice::{
    SpliceConfig, SpliceEngine, SpliceError, SplicePhase, SpliceStatistics, SpliceTelemetry,
};
