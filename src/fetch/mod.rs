//! Fetch Module
//!
//! Everything between a cache miss and a cached answer: dedup of in-flight
//! calls, upstream pacing, the transports, envelope normalization, and the
//! batch fan-out built on top.

mod batch;
mod envelope;
mod fetcher;
mod inflight;
mod rate;
mod scripted;
mod transport;

pub use batch::{
    default_identity, BatchConfig, BatchCoordinator, BatchMode, BatchOutcome, BatchReport,
    BatchRequest, IdentityFn, PartitionFailure,
};
pub use envelope::{Envelope, Normalized, Paging};
pub use fetcher::{
    CancelToken, DiskTier, DuplicatePolicy, FetchConfig, FetchOutcome, FetchRequest, FetchStats,
    Fetcher, FetcherBuilder, Source,
};
pub use inflight::{InFlightGuard, InFlightHandle, InFlightRegistry};
pub use rate::{RateConfig, RateGovernor, RatePermit, RateState};
pub use scripted::{envelope_body, RecordedCall, ScriptedTransport};
pub use transport::{BackendTransport, HttpTransport, Transport, TransportKind, UpstreamResponse};
