//! SessionManager - the signed-in account.
//!
//! This module provides [`SessionManager`], which logs in with a password or
//! through the OAuth authorization code flow (PKCE + PAR), keeps the tokens
//! fresh, persists the session and signs out.
//!
//! # Architecture
//!
//! SessionManager feeds events into the pure session state machine (from
//! fedline-core) and executes the actions it returns against the session
//! cell, the pending authorization and the key-value store.
//!
//! ```text
//! Application → SessionManager → Transport → Network
//!                   ↓       ↓
//!      session_state    KeyValueStore ("session")
//! ```
//!
//! # Example
//!
//! ```ignore
//! let sessions = SessionManager::new(transport, kv, Arc::new(SystemClock), config);
//! sessions.restore().await?;
//! if sessions.current_session().is_none() {
//!     sessions.begin_credential_login("alice.example", Secret::new(password)).await?;
//! }
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

use fedline_core::{
    generate_state, Action, Event, PkcePair, RefreshFailure, SessionState,
};
use fedline_store::KeyValueStore;
use fedline_types::{
    decode, encode, AuthorizationRequest, Did, Encoding, Handle, OAuthLaunch, Profile, Secret,
    Session, SessionTokens, CODE_CHALLENGE_METHOD, RESPONSE_TYPE,
};

use crate::api::{
    jwt_expiry, AuthServerMetadata, CreateSessionBody, ParResponse, ResolveHandleResponse,
    SessionResponse, TokenResponse, AUTH_SERVER_METADATA, CREATE_SESSION, REFRESH_SESSION,
    RESOLVE_HANDLE,
};
use crate::classify::{classify, is_session_rejection};
use crate::clock::Clock;
use crate::coalesce::Coalescer;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::retry::send_with_retry;
use crate::transport::{Request, Response, Transport, TransportError};

/// Key of the persisted session record.
pub const SESSION_KEY: &str = "session";

/// Session state as seen by hosts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionSnapshot {
    /// Lifecycle state.
    pub state: SessionState,
    /// The session, present while signed in.
    pub session: Option<Session>,
}

/// Remote calls made on behalf of the signed-in account.
#[async_trait]
pub trait AuthenticatedApi: Send + Sync {
    /// Send `request` with the account's bearer token.
    ///
    /// Refreshes first when the token is about to expire. A rejected token
    /// triggers one forced refresh and a single replay.
    async fn send(&self, request: Request) -> Result<Response, ClientError>;

    /// Check if a session is present.
    fn has_session(&self) -> bool;

    /// Profile stub of the signed-in account.
    fn viewer(&self) -> Option<Profile>;
}

// Authorization waiting for its callback. Never leaves the manager.
struct PendingAuthorization {
    request: AuthorizationRequest,
    code_verifier: Secret,
    issuer: String,
    token_endpoint: String,
    did: Did,
    handle: Handle,
}

/// Owns the process-wide session.
pub struct SessionManager<T: Transport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for SessionManager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<T> {
    transport: T,
    kv: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    config: ClientConfig,
    /// Serializes transitions. Lock before `pending`.
    state: Mutex<SessionState>,
    snapshot: watch::Sender<SessionSnapshot>,
    pending: Mutex<Option<PendingAuthorization>>,
    refresh: Coalescer<(), Session>,
}

impl<T: Transport + 'static> SessionManager<T> {
    /// Create a signed-out manager. Call [`SessionManager::restore`] to pick
    /// up a persisted session.
    pub fn new(
        transport: T,
        kv: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: ClientConfig,
    ) -> Self {
        let (snapshot, _) = watch::channel(SessionSnapshot::default());
        Self {
            inner: Arc::new(Inner {
                transport,
                kv,
                clock,
                config,
                state: Mutex::new(SessionState::SignedOut),
                snapshot,
                pending: Mutex::new(None),
                refresh: Coalescer::new(),
            }),
        }
    }

    /// The current session, without waiting.
    pub fn current_session(&self) -> Option<Session> {
        self.inner.snapshot.borrow().session.clone()
    }

    /// The current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.inner.snapshot.borrow().state
    }

    /// Watch session changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshot.subscribe()
    }

    /// Check if an OAuth authorization is waiting for its callback.
    pub async fn has_pending_authorization(&self) -> bool {
        self.inner.pending.lock().await.is_some()
    }

    /// Log in with handle and password.
    ///
    /// The password is only ever held in zeroize-on-drop buffers: the
    /// caller's [`Secret`] and the sealed request body. Both are dropped
    /// once the exchange is over.
    pub async fn begin_credential_login(
        &self,
        handle: &str,
        password: Secret,
    ) -> Result<Session, ClientError> {
        let handle = Handle::parse(handle).map_err(|e| ClientError::Fatal(e.to_string()))?;
        let request = Request::post(CREATE_SESSION)
            .sealed_json(&CreateSessionBody {
                identifier: handle.as_str(),
                password: password.expose(),
            })
            .map_err(|e| ClientError::Fatal(e.to_string()))?;
        drop(password);

        let inner = &self.inner;
        inner.apply(Event::LoginStarted, None).await;

        let result = inner
            .call(&request)
            .await
            .map_err(credential_error)
            .and_then(|response| inner.credentials_session(&response));
        drop(request);

        match result {
            Ok(session) => inner.finish_login(session).await,
            Err(e) => {
                tracing::debug!(handle = %handle, error = %e, "credential login failed");
                inner.apply(Event::LoginFailed, None).await;
                Err(e)
            }
        }
    }

    /// Start an OAuth login for `handle`.
    ///
    /// Resolves the handle, pushes the authorization request and returns the
    /// URL to open. Any earlier pending authorization is replaced.
    pub async fn begin_oauth_login(
        &self,
        handle: &str,
        login_hint: Option<&str>,
    ) -> Result<OAuthLaunch, ClientError> {
        let handle = Handle::parse(handle).map_err(|e| ClientError::Fatal(e.to_string()))?;
        let inner = &self.inner;
        inner.apply(Event::LoginStarted, None).await;

        let (pending, launch) = match inner.push_authorization(&handle, login_hint).await {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::debug!(handle = %handle, error = %e, "oauth login could not start");
                inner.apply(Event::LoginFailed, None).await;
                return Err(e);
            }
        };

        let state = inner.state.lock().await;
        if *state != SessionState::Authorizing {
            // Signed out or logged in another way meanwhile.
            return Err(ClientError::Abandoned);
        }
        *inner.pending.lock().await = Some(pending);
        drop(state);

        tracing::info!(handle = %handle, "authorization pending");
        Ok(launch)
    }

    /// Finish an OAuth login from the redirect the browser landed on.
    ///
    /// The pending authorization is consumed whatever the outcome.
    pub async fn complete_oauth_login(&self, callback_uri: &str) -> Result<Session, ClientError> {
        let inner = &self.inner;
        let pending = inner.pending.lock().await.take();

        match inner.redeem(pending, callback_uri).await {
            Ok(session) => inner.finish_login(session).await,
            Err(e) => {
                tracing::debug!(error = %e, "oauth callback rejected");
                inner.apply(Event::LoginFailed, None).await;
                Err(e)
            }
        }
    }

    /// Refresh the tokens if the access token expires within the configured margin.
    pub async fn refresh_if_needed(&self) -> Result<(), ClientError> {
        let session = self.current_session().ok_or(ClientError::NotSignedIn)?;
        let margin_ms = self.inner.config.session.refresh_margin().as_millis() as i64;
        if !session
            .tokens()
            .expires_within(self.inner.clock.now_millis(), margin_ms)
        {
            return Ok(());
        }
        self.refresh_now().await.map(|_| ())
    }

    /// Refresh the tokens now.
    ///
    /// Concurrent callers share one exchange and all get its result.
    pub async fn refresh_now(&self) -> Result<Session, ClientError> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .refresh
            .run((), move || async move { inner.perform_refresh().await })
            .await
    }

    /// Sign out: drop the session, any pending authorization and the
    /// persisted record. Signing out twice is harmless.
    pub async fn sign_out(&self) {
        self.inner.apply(Event::SignOutRequested, None).await;
    }

    /// Load the persisted session, if any.
    ///
    /// An undecodable record is discarded.
    pub async fn restore(&self) -> Result<Option<Session>, ClientError> {
        let inner = &self.inner;
        let Some(bytes) = inner.kv.get(SESSION_KEY).await? else {
            return Ok(None);
        };

        match decode::<Session>(Encoding::Compact, &bytes) {
            Ok(session) => {
                inner.apply(Event::Restored, Some(session)).await;
                Ok(self.current_session())
            }
            Err(e) => {
                tracing::warn!(error = %e, "discarding undecodable session record");
                inner.kv.delete(SESSION_KEY).await?;
                Ok(None)
            }
        }
    }
}

impl<T: Transport + 'static> Inner<T> {
    async fn call(&self, request: &Request) -> Result<Response, TransportError> {
        send_with_retry(
            &self.transport,
            request,
            &self.config.network.retry_policy(),
            self.config.network.request_timeout(),
        )
        .await
    }

    /// Feed `event` to the state machine and run the resulting actions.
    ///
    /// `session` is installed only on a transition into SignedIn.
    async fn apply(&self, event: Event, session: Option<Session>) -> SessionState {
        let mut state = self.state.lock().await;
        let prior = *state;
        let (next, actions) = prior.on_event(event);
        *state = next;

        let mut current = self.snapshot.borrow().session.clone();
        if next == SessionState::SignedIn && prior != SessionState::SignedIn {
            if let Some(session) = session {
                current = Some(session);
            }
        }

        for action in actions {
            match action {
                Action::PersistSession => {
                    if let Some(session) = &current {
                        self.persist(session).await;
                    }
                }
                Action::ClearSession => {
                    current = None;
                    if let Err(e) = self.kv.delete(SESSION_KEY).await {
                        tracing::warn!(error = %e, "failed to delete persisted session");
                    }
                }
                Action::DiscardPending => {
                    self.pending.lock().await.take();
                }
                Action::Emit(emitted) => {
                    tracing::info!(
                        event = ?emitted,
                        did = current.as_ref().map(|s| s.did().as_str()),
                        "session event"
                    );
                }
            }
        }

        tracing::debug!(from = ?prior, to = ?next, trigger = ?event, "session transition");
        self.snapshot.send_replace(SessionSnapshot {
            state: next,
            session: current,
        });
        next
    }

    async fn persist(&self, session: &Session) {
        let bytes = match encode(Encoding::Compact, session) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode session");
                return;
            }
        };
        if let Err(e) = self.kv.put(SESSION_KEY, &bytes).await {
            tracing::warn!(error = %e, "failed to persist session");
        }
    }

    async fn finish_login(&self, session: Session) -> Result<Session, ClientError> {
        match self.apply(Event::LoginSucceeded, Some(session.clone())).await {
            SessionState::SignedIn => Ok(session),
            _ => Err(ClientError::Abandoned),
        }
    }

    fn tokens(&self, access: String, refresh: String, expires_in_secs: Option<i64>) -> SessionTokens {
        let now = self.clock.now_millis();
        let expires_at = expires_in_secs
            .map(|secs| now.saturating_add(secs.saturating_mul(1000)))
            .or_else(|| jwt_expiry(&access))
            .unwrap_or_else(|| {
                let lifetime = self.config.session.default_access_lifetime();
                now.saturating_add(lifetime.as_millis() as i64)
            });

        SessionTokens {
            access: Secret::new(access),
            refresh: Secret::new(refresh),
            expires_at,
        }
    }

    fn credentials_session(&self, response: &Response) -> Result<Session, ClientError> {
        let body: SessionResponse = response.parse()?;
        let did = Did::parse(body.did).map_err(|e| ClientError::Fatal(e.to_string()))?;
        Ok(Session::Credentials {
            handle: Handle::new(&body.handle),
            did,
            tokens: self.tokens(body.access_jwt, body.refresh_jwt, None),
        })
    }

    async fn push_authorization(
        &self,
        handle: &Handle,
        login_hint: Option<&str>,
    ) -> Result<(PendingAuthorization, OAuthLaunch), ClientError> {
        let resolved: ResolveHandleResponse = self
            .call(&Request::get(RESOLVE_HANDLE).query("handle", handle.as_str()))
            .await?
            .parse()?;
        let did = Did::parse(resolved.did).map_err(|e| ClientError::Fatal(e.to_string()))?;

        let metadata: AuthServerMetadata = self
            .call(&Request::get(AUTH_SERVER_METADATA))
            .await?
            .parse()?;

        let pkce = PkcePair::generate().map_err(|e| ClientError::Fatal(e.to_string()))?;
        let state = generate_state().map_err(|e| ClientError::Fatal(e.to_string()))?;
        let oauth = &self.config.oauth;
        let request = AuthorizationRequest {
            client_id: oauth.client_id.clone(),
            redirect_uri: oauth.redirect_uri.clone(),
            scope: oauth.scope.clone(),
            state,
            code_challenge: pkce.challenge,
            code_challenge_method: CODE_CHALLENGE_METHOD.to_string(),
            response_type: RESPONSE_TYPE.to_string(),
            login_hint: Some(login_hint.unwrap_or(handle.as_str()).to_string()),
        };

        let par: ParResponse = self
            .call(
                &Request::post(&metadata.pushed_authorization_request_endpoint)
                    .form(request.to_form_pairs()),
            )
            .await?
            .parse()?;

        let authorization_url = reqwest::Url::parse_with_params(
            &metadata.authorization_endpoint,
            &[
                ("client_id", request.client_id.as_str()),
                ("request_uri", par.request_uri.as_str()),
            ],
        )
        .map_err(|e| ClientError::Fatal(format!("invalid authorization endpoint: {e}")))?;

        tracing::debug!(
            did = %did,
            issuer = %metadata.issuer,
            expires_in = ?par.expires_in,
            "authorization request pushed"
        );

        let pending = PendingAuthorization {
            request: request.clone(),
            code_verifier: pkce.verifier,
            issuer: metadata.issuer,
            token_endpoint: metadata.token_endpoint,
            did,
            handle: handle.clone(),
        };
        let launch = OAuthLaunch {
            request,
            authorization_url: authorization_url.to_string(),
        };
        Ok((pending, launch))
    }

    async fn redeem(
        &self,
        pending: Option<PendingAuthorization>,
        callback_uri: &str,
    ) -> Result<Session, ClientError> {
        let params = callback_params(callback_uri).ok_or(ClientError::StateMismatch)?;
        let pending = pending.ok_or(ClientError::StateMismatch)?;
        if params.get("state") != Some(&pending.request.state) {
            return Err(ClientError::StateMismatch);
        }
        if let Some(error) = params.get("error") {
            let detail = params.get("error_description").unwrap_or(error);
            return Err(ClientError::AuthorizationDenied(detail.clone()));
        }
        let code = params
            .get("code")
            .ok_or_else(|| ClientError::Fatal("callback carries no code".into()))?;

        let request = &pending.request;
        let body: TokenResponse = self
            .call(&Request::post(&pending.token_endpoint).form([
                ("grant_type", "authorization_code"),
                ("code", code.as_str()),
                ("redirect_uri", request.redirect_uri.as_str()),
                ("client_id", request.client_id.as_str()),
                ("code_verifier", pending.code_verifier.expose()),
            ]))
            .await?
            .parse()?;

        if body.sub != pending.did.as_str() {
            return Err(ClientError::Fatal(format!(
                "token subject {} does not match {}",
                body.sub, pending.did
            )));
        }

        Ok(Session::OAuth {
            handle: pending.handle,
            did: pending.did,
            issuer: pending.issuer,
            token_endpoint: pending.token_endpoint,
            tokens: self.tokens(body.access_token, body.refresh_token, body.expires_in),
        })
    }

    async fn perform_refresh(&self) -> Result<Session, ClientError> {
        let session = self
            .snapshot
            .borrow()
            .session
            .clone()
            .ok_or(ClientError::NotSignedIn)?;
        if self.apply(Event::RefreshStarted, None).await != SessionState::Refreshing {
            return Err(ClientError::NotSignedIn);
        }

        match self.exchange_refresh(&session).await {
            Ok(tokens) => {
                let refreshed = session.with_tokens(tokens);
                match self.apply(Event::RefreshSucceeded, Some(refreshed.clone())).await {
                    SessionState::SignedIn => Ok(refreshed),
                    _ => Err(ClientError::NotSignedIn),
                }
            }
            Err(e) if is_session_rejection(&e) => {
                tracing::info!(error = %e, "refresh token rejected");
                self.apply(Event::RefreshFailed(RefreshFailure::Rejected), None)
                    .await;
                Err(ClientError::SessionExpired)
            }
            Err(e) => {
                let failure = if classify(&e).is_retryable() {
                    RefreshFailure::Transient
                } else {
                    RefreshFailure::Fatal
                };
                tracing::debug!(error = %e, ?failure, "refresh failed");
                self.apply(Event::RefreshFailed(failure), None).await;
                Err(ClientError::from_transport(&e))
            }
        }
    }

    async fn exchange_refresh(&self, session: &Session) -> Result<SessionTokens, TransportError> {
        match session {
            Session::Credentials { tokens, .. } => {
                let body: SessionResponse = self
                    .call(&Request::post(REFRESH_SESSION).bearer(tokens.refresh.clone()))
                    .await?
                    .parse()?;
                Ok(self.tokens(body.access_jwt, body.refresh_jwt, None))
            }
            Session::OAuth {
                did,
                token_endpoint,
                tokens,
                ..
            } => {
                let body: TokenResponse = self
                    .call(&Request::post(token_endpoint).form([
                        ("grant_type", "refresh_token"),
                        ("refresh_token", tokens.refresh.expose()),
                        ("client_id", self.config.oauth.client_id.as_str()),
                    ]))
                    .await?
                    .parse()?;
                if body.sub != did.as_str() {
                    return Err(TransportError::Protocol(format!(
                        "refreshed token subject {} does not match {}",
                        body.sub, did
                    )));
                }
                Ok(self.tokens(body.access_token, body.refresh_token, body.expires_in))
            }
        }
    }
}

#[async_trait]
impl<T: Transport + 'static> AuthenticatedApi for SessionManager<T> {
    async fn send(&self, request: Request) -> Result<Response, ClientError> {
        self.refresh_if_needed().await?;
        let session = self.current_session().ok_or(ClientError::NotSignedIn)?;

        let first = self
            .inner
            .call(&request.clone().bearer(session.tokens().access.clone()))
            .await;
        match first {
            Ok(response) => return Ok(response),
            Err(e) if !is_session_rejection(&e) => return Err(e.into()),
            Err(_) => {}
        }

        tracing::debug!(endpoint = %request.endpoint, "access token rejected, refreshing");
        let refreshed = self.refresh_now().await?;
        match self
            .inner
            .call(&request.bearer(refreshed.tokens().access.clone()))
            .await
        {
            Ok(response) => Ok(response),
            Err(e) if is_session_rejection(&e) => {
                self.inner.apply(Event::SessionRejected, None).await;
                Err(ClientError::SessionExpired)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn has_session(&self) -> bool {
        self.inner.snapshot.borrow().session.is_some()
    }

    fn viewer(&self) -> Option<Profile> {
        self.inner
            .snapshot
            .borrow()
            .session
            .as_ref()
            .map(|s| Profile::new(s.did().clone(), s.handle().clone()))
    }
}

/// A 401, or a 400 `AuthenticationRequired`, means the password was wrong.
fn credential_error(error: TransportError) -> ClientError {
    match (error.status(), error.error_code()) {
        (Some(401), _) | (Some(400), Some("AuthenticationRequired")) => {
            ClientError::InvalidCredentials
        }
        _ => ClientError::from_transport(&error),
    }
}

fn callback_params(callback_uri: &str) -> Option<HashMap<String, String>> {
    let url = reqwest::Url::parse(callback_uri).ok()?;
    Some(url.query_pairs().into_owned().collect())
}
