//! Service layer: the publishing facade for application services.
//!
//! [`BoardNotifier`] is what note, column, voting and session services call
//! after a successful write. It never fails the caller.

pub mod board_notifier;

pub use board_notifier::BoardNotifier;
