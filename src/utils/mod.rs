//utilities: event trace, counters and end-of-run summary export
pub mod export;
pub mod metrics;
