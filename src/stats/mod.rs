//! Statistics and introspection

pub mod metrics;
pub mod snapshot;

pub use metrics::SessionStats;
pub use snapshot::StreamSnapshot;
