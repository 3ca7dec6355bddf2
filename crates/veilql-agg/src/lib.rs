//! Anonymizing aggregation primitives.
//!
//! Per-bucket aggregator states are built from two trackers: an AID tracker
//! (distinct AID hashes plus a running XOR seed) and a contribution tracker
//! (per-AID aggregated contributions with a bounded top-contributors list).
//! The summable core turns a tracker into a flattened, noisy aggregate under
//! a strict determinism contract: identical input populations, salt, and
//! configuration produce bit-identical results in any transition order.
//!
//! [`AnonAggState`] is the uniform dispatch surface the bucketing layer
//! drives: create, transition, merge, finalize, explain.

mod aid;
mod aid_tracker;
mod contribution;
mod contribution_tracker;
mod count;
mod count_distinct;
mod count_histogram;
mod dispatch;
mod low_count;
mod record_hash;
mod sum;
mod summable;

pub use aid::{Aid, AidMapper};
pub use aid_tracker::AidTracker;
pub use contribution::ContributionOps;
pub use contribution_tracker::{ContributionTracker, Contributor};
pub use count::CountState;
pub use count_distinct::CountDistinctState;
pub use count_histogram::CountHistogramState;
pub use dispatch::{AggKind, AnonAggState, ArgSpec, ArgsDescriptor};
pub use low_count::LowCountState;
pub use record_hash::{RECORD_HASH_SIZE, RecordHasher};
pub use sum::SumState;
pub use summable::{SummableResult, SummableResultAccumulator};
