//! Shared vocabulary used by every other `keeper-*` crate: entity addressing,
//! the tag map, content hashing, and duration parsing. Analogous to a small
//! protocol crate — the one piece of the workspace every bounded context
//! depends on.

mod duration;
mod error;
mod ids;
mod tags;

pub use duration::resolve_time_bound;
pub use error::ModelError;
pub use error::ModelResult;
pub use ids::EntityRef;
pub use ids::content_addressed_id;
pub use ids::content_hash;
pub use ids::is_system_id;
pub use ids::legacy_hash;
pub use ids::parse_entity_ref;
pub use tags::SystemTags;
pub use tags::TagFilter;
pub use tags::TagSource;
pub use tags::Tags;
pub use tags::stamp_system_tags;
