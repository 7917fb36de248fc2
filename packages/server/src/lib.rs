// Lead-generation campaign engine - core
//
// Drives multi-phase campaigns (domain generation -> DNS validation ->
// HTTP/keyword validation -> analysis) against PostgreSQL. Phase work is
// enqueued as jobs, claimed at-most-once by a pool of workers, and written
// back in bulk under audit and idempotency guarantees.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;

pub use config::*;
