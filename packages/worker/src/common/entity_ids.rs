//! Typed ID definitions for all domain entities.
//!
//! Type aliases per entity give compile-time safety for ID usage throughout
//! the pipeline: a `ListingId` cannot be passed where a `CompanyId` is
//! expected.

// Re-export the core Id type and version markers
pub use super::id::{Id, V4, V7};

// ============================================================================
// Entity marker types
// ============================================================================

/// Marker type for queue items.
pub struct QueueItemEntity;

/// Marker type for job listings.
pub struct ListingEntity;

/// Marker type for job matches (analysis results).
pub struct MatchEntity;

/// Marker type for companies.
pub struct CompanyEntity;

/// Marker type for job sources (boards, feeds, career pages).
pub struct SourceEntity;

// ============================================================================
// Type aliases - the primary API
// ============================================================================

/// Typed ID for queue items.
pub type QueueItemId = Id<QueueItemEntity>;

/// Typed ID for job listings.
pub type ListingId = Id<ListingEntity>;

/// Typed ID for job matches.
pub type MatchId = Id<MatchEntity>;

/// Typed ID for companies.
pub type CompanyId = Id<CompanyEntity>;

/// Typed ID for job sources.
pub type SourceId = Id<SourceEntity>;
