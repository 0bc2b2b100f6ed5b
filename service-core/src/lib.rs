//! service-core: Shared infrastructure for the subscription services.
pub mod error;
pub mod observability;
