pub mod metrics;
pub mod report;
pub mod server;
pub mod snapshot;
pub mod source_record;
