//! # fedline-client
//!
//! Session lifecycle and offline-first timeline sync for fedline.
//!
//! This is the library applications drive: sign in, keep the session fresh,
//! and render timelines from the local cache while syncing in the background.
//!
//! ## Features
//!
//! - **Two login paths**: handle and password, or OAuth with PKCE and pushed
//!   authorization requests
//! - **Single-flight refresh**: concurrent callers share one token refresh
//! - **Offline-first timelines**: observers read the [`LocalStore`] only;
//!   fetches merge into it
//! - **Transport Abstraction**: Pluggable transport layer (HTTP, mock)
//! - **Pure State Machines**: Uses fedline-core for side-effect-free logic
//!
//! ## Example
//!
//! ```ignore
//! use fedline_client::{ClientConfig, HttpTransport, SessionManager, TimelineSynchronizer};
//!
//! let sessions = SessionManager::new(transport, kv, clock, config.clone());
//! sessions.begin_credential_login("alice.example", password).await?;
//!
//! let timelines = TimelineSynchronizer::new(Arc::new(sessions), store, clock, config.timeline);
//! let mut states = timelines.observe(TimelineKey::Following);
//! timelines.refresh(&TimelineKey::Following).await?;
//! ```
//!
//! [`LocalStore`]: fedline_store::LocalStore

#![warn(missing_docs)]
#![warn(clippy::all)]

mod api;
pub mod classify;
pub mod clock;
pub mod coalesce;
pub mod config;
pub mod error;
pub mod retry;
pub mod session;
pub mod timeline;
pub mod transport;

pub use classify::{classify, is_session_rejection, FailureClass};
pub use clock::{Clock, ManualClock, SystemClock};
pub use coalesce::Coalescer;
pub use config::{ClientConfig, ConfigError};
pub use error::ClientError;
pub use retry::send_with_retry;
pub use session::{AuthenticatedApi, SessionManager, SessionSnapshot, SESSION_KEY};
pub use timeline::{TimelineState, TimelineSynchronizer};
pub use transport::{
    Body, HttpTransport, Method, MockTransport, Request, Response, Transport, TransportError,
};
