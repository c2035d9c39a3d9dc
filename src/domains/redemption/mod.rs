//! Quota redemption codes: single-use codes and multi-user gift codes.

pub mod admin;
pub mod error;
pub mod locks;
pub mod memory_store;
pub mod models;
pub mod pg_store;
pub mod service;
pub mod store;

pub use admin::CodeAdminService;
pub use error::{RedeemError, StoreError};
pub use memory_store::MemoryStore;
pub use models::*;
pub use pg_store::PgRedemptionStore;
pub use service::{RedeemDelay, Redeemed, RedemptionService};
pub use store::{Clock, CodeAdminStore, FactLog, RedemptionStore, RedemptionTx, SystemClock};
