pub mod activity;
pub mod block_store;
pub mod cipher;
pub mod config;
pub mod contract;
pub mod directory;
pub mod error;
pub mod keys;
pub mod ledger;
pub mod network;
pub mod placement;
pub mod progress;
pub mod provider;
pub mod renter;
pub mod rs_codec;
pub mod sharing;
pub mod snapshot;
pub mod transfer;
pub mod types;
pub mod version;

pub use error::{Error, ErrorKind, Result};
