//! Shared types for the sBTC payment confirmation monitor.
//!
//! This crate defines the domain records tracked by the monitor, the chain
//! status payloads it consumes, the events it publishes, and the storage
//! key namespaces used by the persistence layer.

pub mod chain;
pub mod events;
pub mod payment;
pub mod storage;
pub mod transaction;

pub use chain::{TokenTransfer, TxStatusResponse};
pub use events::MonitorEvent;
pub use payment::{Payment, PaymentStatus, Seller};
pub use storage::StoreKey;
pub use transaction::{TrackedTransaction, TxState};
