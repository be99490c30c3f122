// Helper for generating UUIDv7 (timestamp-sortable UUIDs)
//
// Principals, sessions and token ids are generated app-side so that the
// in-memory and PostgreSQL stores agree on identifiers.

use uuid::Uuid;

/// Generate a new UUIDv7 (timestamp-sortable).
pub fn uuidv7() -> Uuid {
    Uuid::now_v7()
}

/// Parse a UUID from caller input, accepting surrounding whitespace.
pub fn parse_id(raw: &str) -> Option<Uuid> {
    Uuid::parse_str(raw.trim()).ok()
}
