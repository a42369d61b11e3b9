#[macro_use]
extern crate async_trait;

pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod format;
pub mod import;
pub mod meta;
pub mod models;
pub mod series;
pub mod server;
pub mod storage;

pub use error::{Error, Result};
