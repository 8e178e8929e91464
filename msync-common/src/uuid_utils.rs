//! Id utilities
//!
//! Provisional ids are minted locally for optimistic creates and must never
//! collide with an authoritative id handed out by a backend, so they carry a
//! fixed prefix that no backend uses.

use uuid::Uuid;

/// Prefix marking a client-generated id that has not been promoted yet
pub const PROVISIONAL_PREFIX: &str = "tmp-";

/// Generate a new UUIDv4
pub fn generate() -> Uuid {
    Uuid::new_v4()
}

/// Parse UUID from string
pub fn parse(s: &str) -> Result<Uuid, uuid::Error> {
    Uuid::parse_str(s)
}

/// Mint a fresh provisional id
pub fn provisional_id() -> String {
    format!("{}{}", PROVISIONAL_PREFIX, generate())
}

/// Whether `id` was minted by [`provisional_id`]
pub fn is_provisional(id: &str) -> bool {
    id.starts_with(PROVISIONAL_PREFIX)
}

/// Whether `id` is a well-formed UUID (the hosted database keys projects by UUID)
pub fn is_valid_uuid(id: &str) -> bool {
    !id.is_empty() && parse(id).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provisional_ids_are_marked_and_unique() {
        let a = provisional_id();
        let b = provisional_id();
        assert!(is_provisional(&a));
        assert!(is_provisional(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn test_authoritative_ids_are_not_provisional() {
        assert!(!is_provisional("t-42"));
        assert!(!is_provisional(&generate().to_string()));
    }

    #[test]
    fn test_is_valid_uuid() {
        assert!(is_valid_uuid("8c0e4a2e-6f5b-4e43-9a57-1f2d3c4b5a69"));
        assert!(!is_valid_uuid(""));
        assert!(!is_valid_uuid("p1"));
        assert!(!is_valid_uuid("tmp-8c0e4a2e"));
    }
}
