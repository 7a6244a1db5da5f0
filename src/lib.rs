pub mod backfill;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod history;
pub mod limiter;
pub mod parser;
pub mod scheduler;
pub mod sensors;
pub mod store;
