//! Ethereum <-> Solana bridge operator
//!
//! Lock/mint and burn/release transfers signed off by a validator quorum,
//! with stuck-transfer detection, bounded recovery, supervisory overrides,
//! liquidity tracking and health gating.

pub mod alerts;
pub mod api;
pub mod bounded_cache;
pub mod chain;
pub mod config;
pub mod db;
pub mod detector;
pub mod error;
pub mod hash;
pub mod health;
pub mod liquidity;
pub mod metrics;
pub mod orchestrator;
pub mod overrides;
pub mod recovery;
pub mod service;
pub mod store;
pub mod testing;
pub mod transaction;
pub mod types;
pub mod validators;

pub use error::{BridgeError, Result};
pub use service::{BridgeService, ServiceSettings};
pub use types::{Direction, Status};
