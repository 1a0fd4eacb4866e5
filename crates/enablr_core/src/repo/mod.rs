//! Store adapters for individuals and reminder instances.
//!
//! # Responsibility
//! - Define the store contract consumed by services.
//! - Keep SQL details inside the persistence boundary.

pub mod sqlite_store;
pub mod store;
