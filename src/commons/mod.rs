//! Common types and utilities used by both the daemon and the client.

pub mod api;
pub mod error;
pub mod storage;
pub mod util;

//------------ Response Aliases ----------------------------------------------

pub type IrrdResult<T> = std::result::Result<T, error::Error>;
pub type IrrdEmptyResult = std::result::Result<(), error::Error>;
