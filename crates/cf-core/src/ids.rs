//! Typed ID wrappers providing compile-time safety for entity identifiers.
//!
//! Each ID type is a newtype over a version 7 `Uuid`. V7 ids embed a
//! millisecond timestamp followed by random bits, so they sort by creation
//! time and two ids minted in the same millisecond still differ.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Generate a newtype ID wrapper over `Uuid`.
///
/// The macro produces a struct with:
/// - `new()` to create a fresh time-ordered v7 UUID
/// - `Debug`, `Clone`, `Copy`, `PartialEq`, `Eq`, `Hash`, `Ord`, `Serialize`, `Deserialize`
/// - `Display` and `FromStr` delegating to the inner UUID
/// - `From<Uuid>` and `Into<Uuid>` conversions
/// - `Default` that generates a new ID
macro_rules! typed_id {
    ($($(#[doc = $doc:expr])* $name:ident),+ $(,)?) => {
        $(
            $(#[doc = $doc])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $name(Uuid);

            impl $name {
                /// Create a new time-ordered ID.
                #[must_use]
                pub fn new() -> Self {
                    Self(Uuid::now_v7())
                }

                /// Return the inner UUID value.
                #[must_use]
                pub fn as_uuid(&self) -> &Uuid {
                    &self.0
                }

                /// Milliseconds since the Unix epoch encoded in the id, if it
                /// is a time-based UUID.
                #[must_use]
                pub fn timestamp_millis(&self) -> Option<u64> {
                    self.0.get_timestamp().map(|ts| {
                        let (secs, nanos) = ts.to_unix();
                        secs * 1000 + u64::from(nanos) / 1_000_000
                    })
                }
            }

            impl Default for $name {
                fn default() -> Self {
                    Self::new()
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }

            impl FromStr for $name {
                type Err = uuid::Error;

                fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                    Uuid::parse_str(s).map(Self)
                }
            }

            impl From<Uuid> for $name {
                fn from(uuid: Uuid) -> Self {
                    Self(uuid)
                }
            }

            impl From<$name> for Uuid {
                fn from(id: $name) -> Self {
                    id.0
                }
            }
        )+
    };
}

typed_id! {
    /// Unique identifier for a live ingestion session.
    SessionId,
    /// Unique identifier for a published VOD asset.
    AssetId,
    /// Unique identifier for a VOD packaging job.
    JobId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn ids_minted_back_to_back_sort_by_creation() {
        let ids: Vec<SessionId> = (0..64).map(|_| SessionId::new()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);

        let unique: std::collections::HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }

    #[test]
    fn timestamp_is_close_to_now() {
        let before = chrono::Utc::now().timestamp_millis() as u64;
        let id = JobId::new();
        let after = chrono::Utc::now().timestamp_millis() as u64;
        let ts = id.timestamp_millis().unwrap();
        assert!(ts >= before && ts <= after, "{before} <= {ts} <= {after}");
    }

    #[test]
    fn display_and_from_str() {
        let id = AssetId::new();
        let s = id.to_string();
        let parsed: AssetId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn serde_roundtrip() {
        let id = SessionId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn invalid_from_str() {
        assert!(SessionId::from_str("not-a-uuid").is_err());
        assert!(SessionId::from_str("../etc").is_err());
    }

    #[test]
    fn nil_uuid_has_no_timestamp() {
        let id = AssetId::from(Uuid::nil());
        assert_eq!(id.timestamp_millis(), None);
    }
}
