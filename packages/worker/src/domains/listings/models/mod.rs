pub mod job_match;
pub mod listing;

pub use job_match::{JobMatch, MatchPriority};
pub use listing::{JobListing, ListingStatus};
