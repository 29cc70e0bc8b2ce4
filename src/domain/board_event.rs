//! Board events: the envelope delivered to every client of a board.
//!
//! A [`BoardEvent`] is `{ "type": <kind>, "data": <json> }`. The kind comes
//! from a closed vocabulary ([`BoardEventType`]); the data is rendered by the
//! producing service and carried as an opaque [`serde_json::Value`]. Nothing
//! in the broker looks inside `data`.
//!
//! Because the payload travels as JSON, consumers see the JSON shape of what
//! the producer serialized: integer map keys come back as strings and every
//! number is a JSON number. That is a property of the wire format and is
//! relied upon by the frontend.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Discriminator for [`BoardEvent`].
///
/// The wire strings are part of the client protocol: adding a kind is
/// backward compatible, renaming one is not. Kinds this build does not know
/// decode as [`BoardEventType::Unknown`] instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoardEventType {
    /// Full board snapshot sent when a board socket opens.
    Init,
    /// Board settings changed.
    BoardUpdated,
    /// The board timer was started, changed or stopped.
    BoardTimerUpdated,
    /// The board was deleted; clients should leave.
    BoardDeleted,
    /// A transient board-wide reaction (e.g. applause).
    BoardReactionAdded,
    /// Column set or column properties changed.
    ColumnsUpdated,
    /// A column was deleted.
    ColumnDeleted,
    /// Notes changed (created, edited, moved, stacked).
    NotesUpdated,
    /// A note was deleted.
    NoteDeleted,
    /// A reaction was added to a note.
    ReactionAdded,
    /// A reaction was removed from a note.
    ReactionDeleted,
    /// A reaction on a note was changed.
    ReactionUpdated,
    /// A voting phase was opened.
    VotingCreated,
    /// A voting phase was updated or closed.
    VotingUpdated,
    /// Votes were cast.
    VotesUpdated,
    /// Votes were withdrawn.
    VotesDeleted,
    /// A participant joined the board.
    ParticipantCreated,
    /// One participant changed (role, ready state, ...).
    ParticipantUpdated,
    /// Several participants changed at once.
    ParticipantsUpdated,
    /// A user asked to join the board.
    SessionRequestCreated,
    /// A join request was accepted or rejected.
    SessionRequestUpdated,
    /// Catch-all for kinds introduced after this build.
    Unknown,
}

impl BoardEventType {
    /// Returns the wire string of this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::BoardUpdated => "BOARD_UPDATED",
            Self::BoardTimerUpdated => "BOARD_TIMER_UPDATED",
            Self::BoardDeleted => "BOARD_DELETED",
            Self::BoardReactionAdded => "BOARD_REACTION_ADDED",
            Self::ColumnsUpdated => "COLUMNS_UPDATED",
            Self::ColumnDeleted => "COLUMN_DELETED",
            Self::NotesUpdated => "NOTES_UPDATED",
            Self::NoteDeleted => "NOTE_DELETED",
            Self::ReactionAdded => "REACTION_ADDED",
            Self::ReactionDeleted => "REACTION_DELETED",
            Self::ReactionUpdated => "REACTION_UPDATED",
            Self::VotingCreated => "VOTING_CREATED",
            Self::VotingUpdated => "VOTING_UPDATED",
            Self::VotesUpdated => "VOTES_UPDATED",
            Self::VotesDeleted => "VOTES_DELETED",
            Self::ParticipantCreated => "PARTICIPANT_CREATED",
            Self::ParticipantUpdated => "PARTICIPANT_UPDATED",
            Self::ParticipantsUpdated => "PARTICIPANTS_UPDATED",
            Self::SessionRequestCreated => "REQUEST_CREATED",
            Self::SessionRequestUpdated => "REQUEST_UPDATED",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Parses a wire string, mapping unrecognised kinds to
    /// [`BoardEventType::Unknown`].
    #[must_use]
    pub fn from_wire(kind: &str) -> Self {
        match kind {
            "INIT" => Self::Init,
            "BOARD_UPDATED" => Self::BoardUpdated,
            "BOARD_TIMER_UPDATED" => Self::BoardTimerUpdated,
            "BOARD_DELETED" => Self::BoardDeleted,
            "BOARD_REACTION_ADDED" => Self::BoardReactionAdded,
            "COLUMNS_UPDATED" => Self::ColumnsUpdated,
            "COLUMN_DELETED" => Self::ColumnDeleted,
            "NOTES_UPDATED" => Self::NotesUpdated,
            "NOTE_DELETED" => Self::NoteDeleted,
            "REACTION_ADDED" => Self::ReactionAdded,
            "REACTION_DELETED" => Self::ReactionDeleted,
            "REACTION_UPDATED" => Self::ReactionUpdated,
            "VOTING_CREATED" => Self::VotingCreated,
            "VOTING_UPDATED" => Self::VotingUpdated,
            "VOTES_UPDATED" => Self::VotesUpdated,
            "VOTES_DELETED" => Self::VotesDeleted,
            "PARTICIPANT_CREATED" => Self::ParticipantCreated,
            "PARTICIPANT_UPDATED" => Self::ParticipantUpdated,
            "PARTICIPANTS_UPDATED" => Self::ParticipantsUpdated,
            "REQUEST_CREATED" => Self::SessionRequestCreated,
            "REQUEST_UPDATED" => Self::SessionRequestUpdated,
            _ => Self::Unknown,
        }
    }
}

impl Serialize for BoardEventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for BoardEventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let kind = String::deserialize(deserializer)?;
        Ok(Self::from_wire(&kind))
    }
}

/// Event envelope broadcast to all listeners of a board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardEvent {
    /// Event kind.
    #[serde(rename = "type")]
    pub event_type: BoardEventType,
    /// Pre-rendered payload. `null` when the kind carries no data.
    #[serde(default)]
    pub data: Value,
}

impl BoardEvent {
    /// Creates an event from an already-rendered JSON payload.
    #[must_use]
    pub const fn new(event_type: BoardEventType, data: Value) -> Self {
        Self { event_type, data }
    }

    /// Creates an event from any serializable payload.
    ///
    /// This is where a producer's typed value becomes the opaque wire
    /// payload.
    ///
    /// # Errors
    ///
    /// Returns the [`serde_json::Error`] raised while rendering `payload`
    /// (e.g. a map with non-string-convertible keys).
    pub fn from_payload<T: Serialize + ?Sized>(
        event_type: BoardEventType,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_type,
            data: serde_json::to_value(payload)?,
        })
    }

    /// Creates an event without payload.
    #[must_use]
    pub const fn empty(event_type: BoardEventType) -> Self {
        Self {
            event_type,
            data: Value::Null,
        }
    }
}
