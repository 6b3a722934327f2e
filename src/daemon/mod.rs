//! The registry daemon: configuration, submissions, the HTTP API and the
//! background tasks.

pub mod config;
pub mod http;
pub mod irrdserver;
pub mod scheduler;
pub mod start;
pub mod submission;
