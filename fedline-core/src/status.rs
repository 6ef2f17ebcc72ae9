//! Per-timeline load status.
//!
//! At most one of `Loading` (refresh) or `LoadingMore` is active per key.
//! A refresh preempts a running load-more; the window generation takes care
//! of discarding the load-more result when it lands.

use serde::{Deserialize, Serialize};

/// Coarse failure class carried by [`TimelineStatus::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Timeout, reset, 5xx. Worth retrying.
    Transient,
    /// No network at all.
    NoConnectivity,
    /// Malformed response or rejected request.
    Fatal,
    /// The session was rejected.
    SessionExpired,
    /// No session to fetch with.
    NotSignedIn,
    /// The local cache failed.
    Storage,
}

/// Load status of one timeline.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimelineStatus {
    /// Nothing requested yet.
    #[default]
    Idle,
    /// Fetching the head page.
    Loading,
    /// Fetching the page after the last cursor.
    LoadingMore,
    /// The last fetch was merged.
    Refreshed,
    /// The last fetch failed. Existing tiles stay visible.
    Error {
        /// Failure class.
        class: ErrorClass,
        /// Human-readable detail.
        message: String,
    },
}

/// Status transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// A refresh started.
    RefreshRequested,
    /// A load-more started.
    LoadMoreRequested,
    /// The refreshed page was committed.
    RefreshMerged,
    /// The refresh failed.
    RefreshFailed {
        /// Failure class.
        class: ErrorClass,
        /// Detail.
        message: String,
    },
    /// The next page was committed (or found superseded).
    LoadMoreMerged,
    /// The load-more failed.
    LoadMoreFailed {
        /// Failure class.
        class: ErrorClass,
        /// Detail.
        message: String,
    },
}

impl TimelineStatus {
    /// Apply an event. Invalid transitions keep the current status.
    pub fn on_event(self, event: StatusEvent) -> Self {
        match (self, event) {
            (_, StatusEvent::RefreshRequested) => Self::Loading,

            (Self::Idle | Self::Refreshed | Self::Error { .. }, StatusEvent::LoadMoreRequested) => {
                Self::LoadingMore
            }

            (Self::Loading, StatusEvent::RefreshMerged) => Self::Refreshed,
            (Self::Loading, StatusEvent::RefreshFailed { class, message }) => {
                Self::Error { class, message }
            }

            (Self::LoadingMore, StatusEvent::LoadMoreMerged) => Self::Refreshed,
            (Self::LoadingMore, StatusEvent::LoadMoreFailed { class, message }) => {
                Self::Error { class, message }
            }

            (status, _) => status,
        }
    }

    /// Check if a refresh is running.
    pub fn is_refreshing(&self) -> bool {
        matches!(self, Self::Loading)
    }

    /// Check if any fetch is running.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Loading | Self::LoadingMore)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed() -> StatusEvent {
        StatusEvent::RefreshFailed {
            class: ErrorClass::Transient,
            message: "timeout".into(),
        }
    }

    #[test]
    fn refresh_cycle() {
        let status = TimelineStatus::Idle.on_event(StatusEvent::RefreshRequested);
        assert_eq!(status, TimelineStatus::Loading);
        assert!(status.is_refreshing());

        let status = status.on_event(StatusEvent::RefreshMerged);
        assert_eq!(status, TimelineStatus::Refreshed);
        assert!(!status.is_busy());
    }

    #[test]
    fn refresh_failure_carries_class() {
        let status = TimelineStatus::Loading.on_event(failed());
        assert_eq!(
            status,
            TimelineStatus::Error {
                class: ErrorClass::Transient,
                message: "timeout".into()
            }
        );
    }

    #[test]
    fn load_more_allowed_after_error() {
        let status = TimelineStatus::Loading
            .on_event(failed())
            .on_event(StatusEvent::LoadMoreRequested);
        assert_eq!(status, TimelineStatus::LoadingMore);

        let status = status.on_event(StatusEvent::LoadMoreMerged);
        assert_eq!(status, TimelineStatus::Refreshed);
    }

    #[test]
    fn load_more_ignored_while_refreshing() {
        let status = TimelineStatus::Loading.on_event(StatusEvent::LoadMoreRequested);
        assert_eq!(status, TimelineStatus::Loading);
    }

    #[test]
    fn refresh_preempts_load_more() {
        let status = TimelineStatus::LoadingMore.on_event(StatusEvent::RefreshRequested);
        assert_eq!(status, TimelineStatus::Loading);

        // The superseded load-more landing must not end the refresh.
        let status = status.on_event(StatusEvent::LoadMoreMerged);
        assert_eq!(status, TimelineStatus::Loading);
        let status = status.on_event(StatusEvent::LoadMoreFailed {
            class: ErrorClass::Fatal,
            message: "late".into(),
        });
        assert_eq!(status, TimelineStatus::Loading);
    }

    #[test]
    fn load_more_failure() {
        let status = TimelineStatus::LoadingMore.on_event(StatusEvent::LoadMoreFailed {
            class: ErrorClass::NoConnectivity,
            message: "offline".into(),
        });
        assert!(matches!(
            status,
            TimelineStatus::Error {
                class: ErrorClass::NoConnectivity,
                ..
            }
        ));
    }
}
