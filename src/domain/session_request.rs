//! Admission status of a user's request to join a board.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status of a board session request.
///
/// Moderators resolve a `Pending` request to `Accepted` or `Rejected`; the
/// decision is delivered on the requester's private subject and forwarded to
/// their waiting socket as the JSON string (e.g. `"ACCEPTED"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionRequestStatus {
    /// Waiting for a moderator.
    Pending,
    /// The user may join the board.
    Accepted,
    /// The user was turned away.
    Rejected,
}

impl SessionRequestStatus {
    /// Returns `true` for `Accepted` and `Rejected`.
    #[must_use]
    pub const fn is_decided(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Returns the wire string of this status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Accepted => "ACCEPTED",
            Self::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for SessionRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_is_screaming_snake() {
        let Ok(json) = serde_json::to_string(&SessionRequestStatus::Accepted) else {
            panic!("encoding failed");
        };
        assert_eq!(json, "\"ACCEPTED\"");
        let Ok(status) = serde_json::from_str::<SessionRequestStatus>("\"REJECTED\"") else {
            panic!("decoding failed");
        };
        assert_eq!(status, SessionRequestStatus::Rejected);
    }

    #[test]
    fn only_pending_is_undecided() {
        assert!(!SessionRequestStatus::Pending.is_decided());
        assert!(SessionRequestStatus::Accepted.is_decided());
        assert!(SessionRequestStatus::Rejected.is_decided());
    }

    #[test]
    fn display_matches_wire() {
        assert_eq!(SessionRequestStatus::Pending.to_string(), "PENDING");
    }
}
