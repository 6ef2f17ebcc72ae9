//! Session lifecycle state machine.
//!
//! Pure transitions: the state machine takes events as input and produces a
//! new state plus a list of actions. `fedline-client` owns the session value,
//! the pending authorization and the key-value store, and executes the
//! actions against them.

/// Session lifecycle state - NO I/O, just state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No session.
    #[default]
    SignedOut,
    /// A login (credential exchange or OAuth handshake) is in progress.
    Authorizing,
    /// A session is active.
    SignedIn,
    /// A session is active and its tokens are being exchanged.
    Refreshing,
}

/// How a token refresh failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshFailure {
    /// The server no longer accepts the refresh token.
    Rejected,
    /// Network trouble; the session may still be valid.
    Transient,
    /// Anything else.
    Fatal,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutReason {
    /// The user asked to sign out.
    UserRequested,
    /// The server rejected the session.
    Expired,
    /// A login attempt failed.
    LoginFailed,
    /// A refresh failed fatally.
    RefreshFailed,
}

/// Input events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A credential or OAuth login started.
    LoginStarted,
    /// The login produced a session.
    LoginSucceeded,
    /// The login failed.
    LoginFailed,
    /// A persisted session was decoded at start-up.
    Restored,
    /// A token refresh started.
    RefreshStarted,
    /// The refresh produced new tokens.
    RefreshSucceeded,
    /// The refresh failed.
    RefreshFailed(RefreshFailure),
    /// An authenticated call was rejected even after a forced refresh.
    SessionRejected,
    /// The user asked to sign out.
    SignOutRequested,
}

/// Side effects requested by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Write the current session to durable storage.
    PersistSession,
    /// Drop the in-memory session and its durable record.
    ClearSession,
    /// Drop any pending OAuth authorization request.
    DiscardPending,
    /// Notify observers.
    Emit(SessionEvent),
}

/// Events emitted to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A session became active.
    SignedIn,
    /// The session tokens were replaced.
    Refreshed,
    /// The session ended.
    SignedOut(SignOutReason),
}

impl SessionState {
    /// Process an event and return the new state plus actions to execute.
    ///
    /// Invalid transitions leave the state unchanged and produce no actions.
    pub fn on_event(self, event: Event) -> (Self, Vec<Action>) {
        match (self, event) {
            // Login
            (Self::SignedOut | Self::Authorizing, Event::LoginStarted) => {
                (Self::Authorizing, vec![])
            }
            (Self::SignedIn, Event::LoginStarted) => (Self::Authorizing, vec![Action::ClearSession]),
            (Self::Authorizing, Event::LoginSucceeded) => (
                Self::SignedIn,
                vec![
                    Action::DiscardPending,
                    Action::PersistSession,
                    Action::Emit(SessionEvent::SignedIn),
                ],
            ),
            (Self::Authorizing, Event::LoginFailed) => (
                Self::SignedOut,
                vec![
                    Action::DiscardPending,
                    Action::Emit(SessionEvent::SignedOut(SignOutReason::LoginFailed)),
                ],
            ),

            // Start-up
            (Self::SignedOut, Event::Restored) => {
                (Self::SignedIn, vec![Action::Emit(SessionEvent::SignedIn)])
            }

            // Refresh
            (Self::SignedIn, Event::RefreshStarted) => (Self::Refreshing, vec![]),
            (Self::Refreshing, Event::RefreshSucceeded) => (
                Self::SignedIn,
                vec![Action::PersistSession, Action::Emit(SessionEvent::Refreshed)],
            ),
            (Self::Refreshing, Event::RefreshFailed(RefreshFailure::Transient)) => {
                (Self::SignedIn, vec![])
            }
            (Self::Refreshing, Event::RefreshFailed(RefreshFailure::Rejected))
            | (Self::SignedIn | Self::Refreshing, Event::SessionRejected) => (
                Self::SignedOut,
                vec![
                    Action::ClearSession,
                    Action::Emit(SessionEvent::SignedOut(SignOutReason::Expired)),
                ],
            ),
            (Self::Refreshing, Event::RefreshFailed(RefreshFailure::Fatal)) => (
                Self::SignedOut,
                vec![
                    Action::ClearSession,
                    Action::Emit(SessionEvent::SignedOut(SignOutReason::RefreshFailed)),
                ],
            ),

            // Sign-out is idempotent
            (Self::SignedOut, Event::SignOutRequested) => {
                (Self::SignedOut, vec![Action::DiscardPending, Action::ClearSession])
            }
            (_, Event::SignOutRequested) => (
                Self::SignedOut,
                vec![
                    Action::DiscardPending,
                    Action::ClearSession,
                    Action::Emit(SessionEvent::SignedOut(SignOutReason::UserRequested)),
                ],
            ),

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if a session is active.
    pub fn is_signed_in(&self) -> bool {
        matches!(self, Self::SignedIn | Self::Refreshing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emits(actions: &[Action], event: SessionEvent) -> bool {
        actions.iter().any(|a| *a == Action::Emit(event))
    }

    // ===========================================
    // Login
    // ===========================================

    #[test]
    fn starts_signed_out() {
        assert_eq!(SessionState::default(), SessionState::SignedOut);
        assert!(!SessionState::default().is_signed_in());
    }

    #[test]
    fn login_success_persists_and_emits() {
        let (state, _) = SessionState::SignedOut.on_event(Event::LoginStarted);
        assert_eq!(state, SessionState::Authorizing);

        let (state, actions) = state.on_event(Event::LoginSucceeded);
        assert_eq!(state, SessionState::SignedIn);
        assert!(actions.contains(&Action::PersistSession));
        assert!(actions.contains(&Action::DiscardPending));
        assert!(emits(&actions, SessionEvent::SignedIn));
    }

    #[test]
    fn login_failure_returns_to_signed_out() {
        let (state, actions) = SessionState::Authorizing.on_event(Event::LoginFailed);
        assert_eq!(state, SessionState::SignedOut);
        assert!(actions.contains(&Action::DiscardPending));
        assert!(!actions.contains(&Action::PersistSession));
    }

    #[test]
    fn login_while_signed_in_drops_old_session() {
        let (state, actions) = SessionState::SignedIn.on_event(Event::LoginStarted);
        assert_eq!(state, SessionState::Authorizing);
        assert_eq!(actions, vec![Action::ClearSession]);
    }

    #[test]
    fn login_success_without_start_is_ignored() {
        let (state, actions) = SessionState::SignedOut.on_event(Event::LoginSucceeded);
        assert_eq!(state, SessionState::SignedOut);
        assert!(actions.is_empty());
    }

    // ===========================================
    // Refresh
    // ===========================================

    #[test]
    fn refresh_success_persists() {
        let (state, _) = SessionState::SignedIn.on_event(Event::RefreshStarted);
        assert_eq!(state, SessionState::Refreshing);
        assert!(state.is_signed_in());

        let (state, actions) = state.on_event(Event::RefreshSucceeded);
        assert_eq!(state, SessionState::SignedIn);
        assert!(actions.contains(&Action::PersistSession));
        assert!(emits(&actions, SessionEvent::Refreshed));
    }

    #[test]
    fn transient_refresh_failure_keeps_session() {
        let (state, actions) =
            SessionState::Refreshing.on_event(Event::RefreshFailed(RefreshFailure::Transient));
        assert_eq!(state, SessionState::SignedIn);
        assert!(actions.is_empty());
    }

    #[test]
    fn rejected_refresh_signs_out_as_expired() {
        let (state, actions) =
            SessionState::Refreshing.on_event(Event::RefreshFailed(RefreshFailure::Rejected));
        assert_eq!(state, SessionState::SignedOut);
        assert!(actions.contains(&Action::ClearSession));
        assert!(emits(
            &actions,
            SessionEvent::SignedOut(SignOutReason::Expired)
        ));
    }

    #[test]
    fn fatal_refresh_failure_signs_out() {
        let (state, actions) =
            SessionState::Refreshing.on_event(Event::RefreshFailed(RefreshFailure::Fatal));
        assert_eq!(state, SessionState::SignedOut);
        assert!(emits(
            &actions,
            SessionEvent::SignedOut(SignOutReason::RefreshFailed)
        ));
    }

    #[test]
    fn rejected_call_signs_out() {
        let (state, actions) = SessionState::SignedIn.on_event(Event::SessionRejected);
        assert_eq!(state, SessionState::SignedOut);
        assert!(actions.contains(&Action::ClearSession));
    }

    // ===========================================
    // Restore and sign-out
    // ===========================================

    #[test]
    fn restore_signs_in_without_persisting() {
        let (state, actions) = SessionState::SignedOut.on_event(Event::Restored);
        assert_eq!(state, SessionState::SignedIn);
        assert!(!actions.contains(&Action::PersistSession));
    }

    #[test]
    fn sign_out_from_every_state() {
        for from in [
            SessionState::Authorizing,
            SessionState::SignedIn,
            SessionState::Refreshing,
        ] {
            let (state, actions) = from.on_event(Event::SignOutRequested);
            assert_eq!(state, SessionState::SignedOut);
            assert!(actions.contains(&Action::ClearSession));
            assert!(actions.contains(&Action::DiscardPending));
            assert!(emits(
                &actions,
                SessionEvent::SignedOut(SignOutReason::UserRequested)
            ));
        }
    }

    #[test]
    fn sign_out_when_signed_out_is_quiet() {
        let (state, actions) = SessionState::SignedOut.on_event(Event::SignOutRequested);
        assert_eq!(state, SessionState::SignedOut);
        assert!(!actions.iter().any(|a| matches!(a, Action::Emit(_))));
    }
}
