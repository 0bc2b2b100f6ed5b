//! Subscription service: plan catalog, subscription lifecycle, and payment
//! reconciliation against the YooKassa gateway.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;

pub use startup::{AppState, Application};
