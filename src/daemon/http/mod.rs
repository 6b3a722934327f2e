//! The HTTP API: submissions, queries and administration.

pub mod dispatch;
pub mod request;
pub mod response;
pub mod server;
