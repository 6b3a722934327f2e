//! The _irrd_ library crate.
//!
//! A routing registry daemon: RPSL objects organised in sources, a per
//! source serial journal, mirroring between registries and maintainer
//! based authentication of changes.

#[macro_use]
extern crate log;

pub mod auth;
pub mod cli;
pub mod commons;
pub mod constants;
pub mod daemon;
pub mod journal;
pub mod mirror;
pub mod query;
pub mod rpsl;
