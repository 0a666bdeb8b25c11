//! Companies behind the listings, plus enrichment metadata.

pub mod models;

pub use models::{Company, CompanyTier};
