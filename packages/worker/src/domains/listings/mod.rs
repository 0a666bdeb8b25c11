//! Job listings and their analysis results.

pub mod models;

pub use models::{JobListing, JobMatch, ListingStatus, MatchPriority};
