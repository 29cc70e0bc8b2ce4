//! Domain layer: identifiers, board events and session-request status.
//!
//! These are the values that travel through the broker. Producers render
//! their state into a [`BoardEvent`]; admission decisions travel as a
//! [`SessionRequestStatus`] on a per-user subject.

pub mod board_event;
pub mod ids;
pub mod session_request;

pub use board_event::{BoardEvent, BoardEventType};
pub use ids::{BoardId, UserId};
pub use session_request::SessionRequestStatus;
