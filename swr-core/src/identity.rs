//! Identity types for cache entries

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Identity of one cache entry instance.
/// UUIDv7 embeds a Unix timestamp, making ids naturally sortable by creation time.
/// Two entries stored under the same key at different times never share an id.
pub type EntryId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Generate a new UUIDv7 EntryId (timestamp-sortable).
pub fn new_entry_id() -> EntryId {
    Uuid::now_v7()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_ids_are_unique_v7() {
        let first = new_entry_id();
        let second = new_entry_id();
        assert_ne!(first, second);
        assert_eq!(first.get_version_num(), 7);
    }
}
