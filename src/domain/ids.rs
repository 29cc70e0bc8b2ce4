//! Type-safe board and user identifiers.
//!
//! [`BoardId`] and [`UserId`] are newtype wrappers around [`uuid::Uuid`] so
//! that a board identifier can never be passed where a user identifier is
//! expected. Both serialize transparently as UUID strings, which is also how
//! they appear in subjects and URL paths.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! uuid_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(uuid::Uuid);

        impl $name {
            /// Creates a new random identifier (UUID v4).
            #[must_use]
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            /// Creates an identifier from an existing [`uuid::Uuid`].
            #[must_use]
            pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the inner [`uuid::Uuid`].
            #[must_use]
            pub const fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
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

        impl From<uuid::Uuid> for $name {
            fn from(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                uuid::Uuid::parse_str(s).map(Self)
            }
        }

        impl From<$name> for uuid::Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_newtype!(
    /// Unique identifier of a retrospective board.
    ///
    /// Every board owns one broadcast subject and one private subject per
    /// waiting user; see [`crate::broker::Subject`].
    BoardId
);

uuid_newtype!(
    /// Unique identifier of a user (participant or join requester).
    UserId
);

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn new_generates_unique_ids() {
        assert_ne!(BoardId::new(), BoardId::new());
        assert_ne!(UserId::new(), UserId::new());
    }

    #[test]
    fn display_is_hyphenated_uuid() {
        let uuid = uuid::Uuid::new_v4();
        let id = BoardId::from_uuid(uuid);
        assert_eq!(id.to_string(), uuid.hyphenated().to_string());
    }

    #[test]
    fn serde_is_transparent() {
        let uuid = uuid::Uuid::new_v4();
        let id = UserId::from(uuid);
        let Ok(json) = serde_json::to_string(&id) else {
            panic!("serialization failed");
        };
        assert_eq!(json, format!("\"{uuid}\""));

        let Ok(back) = serde_json::from_str::<UserId>(&json) else {
            panic!("deserialization failed");
        };
        assert_eq!(back, id);
    }

    #[test]
    fn parses_from_path_segment() {
        let uuid = uuid::Uuid::new_v4();
        let Ok(id) = uuid.to_string().parse::<BoardId>() else {
            panic!("valid uuid rejected");
        };
        assert_eq!(*id.as_uuid(), uuid);
        assert!("not-a-board".parse::<UserId>().is_err());
    }

    #[test]
    fn uuid_conversions_round_trip() {
        let uuid = uuid::Uuid::new_v4();
        let id = BoardId::from(uuid);
        assert_eq!(*id.as_uuid(), uuid);
        assert_eq!(uuid::Uuid::from(id), uuid);
    }
}
