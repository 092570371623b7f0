//! Process-wide counters (spec.md §4.3, §8 scenario 3): shmem overrun
//! fallbacks, accepted connections, and dispatched requests.
//!
//! Grounded on `libsql-server`'s `src/metrics.rs`: lazily-registered
//! `metrics` crate handles behind `once_cell::sync::Lazy` statics, named
//! with the crate's own prefix. Exporting them (e.g. via
//! `metrics-exporter-prometheus`) is left to the embedding process; this
//! crate only registers and increments.

use metrics::{describe_counter, register_counter, Counter};
use once_cell::sync::Lazy;

/// Incremented whenever a response that asked for shmem placement had to
/// fall back to inband transmission (capacity or overlap refusal).
pub static SHMEM_OVERRUNS: Lazy<Counter> = Lazy::new(|| {
    const NAME: &str = "mds_shmem_overruns";
    describe_counter!(
        NAME,
        "responses that wanted shmem placement but fell back to inband"
    );
    register_counter!(NAME)
});

pub static CONNECTIONS_ACCEPTED: Lazy<Counter> = Lazy::new(|| {
    const NAME: &str = "mds_connections_accepted";
    describe_counter!(NAME, "number of accepted client connections");
    register_counter!(NAME)
});

pub static REQUESTS_DISPATCHED: Lazy<Counter> = Lazy::new(|| {
    const NAME: &str = "mds_requests_dispatched";
    describe_counter!(NAME, "number of requests dispatched to a handler");
    register_counter!(NAME)
});
