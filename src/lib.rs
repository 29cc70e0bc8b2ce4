//! # retro-realtime
//!
//! Realtime event delivery for collaborative retrospective boards.
//!
//! Application services publish board events and join-request decisions
//! through a [`broker::Broker`]; connected clients receive them over
//! WebSockets. The broker talks to a pluggable pub/sub backend (NATS, Redis
//! or in-process) and keeps exactly one backend subscription per subject,
//! fanning each message out locally to every interested listener.
//!
//! ## Architecture
//!
//! ```text
//! Clients (WebSocket)                Application services
//!     │                                      │
//!     ├── WS handlers (ws/)                  ├── BoardNotifier (service/)
//!     ├── SessionRequestBridge (ws/)         │
//!     │                                      │
//!     └──────────────┬───────────────────────┘
//!                    │
//!              Broker (broker/)
//!              ChannelRegistry: one subscription per subject
//!                    │
//!              Transport (transport/)
//!              NATS · Redis · memory
//! ```

#[cfg(test)]
macro_rules! settle {
    ($cond:expr) => {{
        let mut reached = false;
        for _ in 0..200 {
            if $cond {
                reached = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(reached, "condition not reached: {}", stringify!($cond));
    }};
}

pub mod api;
pub mod app_state;
pub mod broker;
pub mod config;
pub mod domain;
pub mod error;
pub mod service;
pub mod transport;
pub mod ws;
