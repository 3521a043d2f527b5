//! Identifier generation: UUIDv7 for session and request ids.

use uuid::Uuid;

/// Mints a time-ordered UUIDv7 string.
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}
