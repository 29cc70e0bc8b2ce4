//! Transport subjects derived from board and user identifiers.

use std::fmt;

use crate::domain::{BoardId, UserId};

/// Routing key of one message stream on the transport.
///
/// - `board.<board_id>` carries every [`crate::domain::BoardEvent`] of a
///   board.
/// - `board.<board_id>.session-request.<user_id>` carries admission
///   decisions for one waiting user.
///
/// UUIDs contain no `.`, so the segment layout makes every (board, user)
/// pair map to a distinct subject, and a board subject never equals a
/// private one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subject(String);

impl Subject {
    /// Broadcast subject of a board.
    #[must_use]
    pub fn board(board_id: BoardId) -> Self {
        Self(format!("board.{board_id}"))
    }

    /// Private session-request subject of a user on a board.
    #[must_use]
    pub fn session_request(board_id: BoardId, user_id: UserId) -> Self {
        Self(format!("board.{board_id}.session-request.{user_id}"))
    }

    /// Returns the subject string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Subject {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
