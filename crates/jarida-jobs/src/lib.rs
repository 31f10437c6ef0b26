//! jarida-jobs — rate-limited re-enrichment job queue.
//!
//! Asynchronous worker pool that re-runs enrichment on already-persisted
//! tender records. Callers enqueue record ids and poll job status; the
//! queue enforces a shared concurrency ceiling with minimum spacing between
//! provider calls and retries transient failures with backoff.

pub mod job;
pub mod limiter;
pub mod queue;

pub use job::{EnrichmentJob, JobState};
pub use limiter::{Permit, RateLimiter};
pub use queue::{Enricher, EnrichmentQueue};
