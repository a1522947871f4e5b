//! Change-feed mechanics: collection topics, full-snapshot envelopes and
//! subscriptions.
//!
//! The engine never sees incremental diffs. Every delivery is a complete
//! snapshot of one tenant-scoped collection, so consumers recompute derived
//! state from scratch and tolerate duplicates and reordering for free.

pub mod collection;
pub mod feed;
pub mod in_memory_feed;
pub mod snapshot;
pub mod tenant;

pub use collection::{Collection, Topic};
pub use feed::{ChangeFeed, Subscription};
pub use in_memory_feed::{InMemoryChangeFeed, InMemoryFeedError};
pub use snapshot::SnapshotEnvelope;
pub use tenant::TenantScoped;
