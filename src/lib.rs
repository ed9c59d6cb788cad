#![forbid(unsafe_code)]

//! Bridge between a line-oriented coding-agent subprocess and a JSON-RPC
//! host protocol, with per-operation permission arbitration.

pub mod bridge;
pub mod classifier;
pub mod config;
pub mod errors;
pub mod models;
pub mod paths;
pub mod permission;
pub mod process;
pub mod registry;
pub mod rpc;

pub use config::BridgeConfig;
pub use errors::{AppError, Result};
