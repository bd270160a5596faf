//! Utility functions for identifiers, timestamps and fingerprints.

pub mod timestamps;
mod uuid_utils;

pub use timestamps::{duration_ms, elapsed_ms, format_secs, iso_timestamp, now_utc, Timestamp};
pub use uuid_utils::{fingerprint, generate_uuid_v7};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_uuid_is_time_ordered() {
        let id = generate_uuid_v7();
        assert_eq!(id.get_version_num(), 7);
    }

    #[test]
    fn test_iso_timestamp_format() {
        let ts = iso_timestamp();
        assert!(ts.contains('T'));
        assert!(ts.ends_with("+00:00"));
    }
}
