//! # fedline-core
//!
//! Pure logic for fedline (no I/O, instant tests).
//!
//! This crate implements the state machines and algorithms behind the
//! session lifecycle and timeline sync without any network or disk I/O.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. The actual I/O (network, database) is performed by
//! `fedline-client` and `fedline-store`, which interpret the results.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod moderation;
pub mod pkce;
pub mod session_state;
pub mod status;
pub mod window;

pub use backoff::RetryPolicy;
pub use moderation::MuteFilter;
pub use pkce::{generate_state, PkceError, PkcePair};
pub use session_state::{Action, Event, RefreshFailure, SessionEvent, SessionState, SignOutReason};
pub use status::{ErrorClass, StatusEvent, TimelineStatus};
pub use window::{AppendOutcome, Tile, TimelineWindow};
