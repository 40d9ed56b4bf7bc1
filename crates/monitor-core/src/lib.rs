//! Core confirmation-monitoring engine for the sBTC payment monitor.
//!
//! This crate owns the registry of in-flight transactions, the per
//! transaction poll loop, status classification, and the terminal outcome
//! handlers that update payments, credit sellers, and fire webhooks.

pub mod event_bus;
pub mod monitor;
mod outcomes;

pub use event_bus::EventBus;
pub use monitor::ConfirmationMonitor;
