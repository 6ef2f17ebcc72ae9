//! TimelineSynchronizer - offline-first tiled timelines.
//!
//! Pages are fetched through an [`AuthenticatedApi`], merged into the
//! [`LocalStore`] and projected back out as [`TimelineState`]. Observers
//! read only from the store, so a timeline renders from cache before the
//! first fetch and stays visible while a fetch fails.
//!
//! Per key, merges are serialized by the slot's write lock. Refresh bumps
//! the window generation, which makes an in-flight load-more land as
//! superseded and get dropped.

use dashmap::{DashMap, DashSet};
use futures_util::stream::{self, BoxStream, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};

use fedline_core::{AppendOutcome, MuteFilter, StatusEvent, TimelineStatus, TimelineWindow};
use fedline_store::{LocalStore, StoreChange, TimelineCommit, TimelineItem, TimelineTile};
use fedline_types::{ContentId, Cursor, Did, FeedPage, TimelineKey};

use crate::api::{feed_request, profiles_request, ProfilesResponse};
use crate::clock::Clock;
use crate::coalesce::Coalescer;
use crate::config::TimelineConfig;
use crate::error::ClientError;
use crate::session::AuthenticatedApi;

/// What an observer sees for one timeline.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TimelineState {
    /// Load status.
    pub status: TimelineStatus,
    /// Tiles with muted items removed.
    pub tiles: Vec<TimelineTile>,
    /// Cursor for the next page, `None` at the end of the feed.
    pub last_cursor: Option<Cursor>,
}

impl TimelineState {
    /// Items of all tiles, in order.
    pub fn items(&self) -> impl Iterator<Item = &TimelineItem> {
        self.tiles.iter().flat_map(|t| t.items.iter())
    }

    /// Number of visible items.
    pub fn len(&self) -> usize {
        self.tiles.iter().map(|t| t.items.len()).sum()
    }

    /// Check if no item is visible.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct TimelineSlot {
    /// Held while merging into the stored window.
    write: Mutex<()>,
    status: watch::Sender<TimelineStatus>,
}

impl TimelineSlot {
    fn new() -> Self {
        let (status, _) = watch::channel(TimelineStatus::Idle);
        Self {
            write: Mutex::new(()),
            status,
        }
    }

    fn apply(&self, event: StatusEvent) -> TimelineStatus {
        let mut result = TimelineStatus::Idle;
        self.status.send_if_modified(|status| {
            let next = status.clone().on_event(event);
            let changed = *status != next;
            *status = next.clone();
            result = next;
            changed
        });
        result
    }
}

/// Keeps timelines in the local store in step with the server.
pub struct TimelineSynchronizer<A: AuthenticatedApi> {
    inner: Arc<SyncInner<A>>,
}

impl<A: AuthenticatedApi> Clone for TimelineSynchronizer<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct SyncInner<A> {
    api: Arc<A>,
    store: LocalStore,
    clock: Arc<dyn Clock>,
    config: TimelineConfig,
    slots: DashMap<TimelineKey, Arc<TimelineSlot>>,
    refreshes: Coalescer<TimelineKey, ()>,
    load_mores: Coalescer<TimelineKey, ()>,
    /// Dids with a profile lookup in flight.
    hydrating: DashSet<Did>,
    /// Number of running hydration tasks.
    hydrations: watch::Sender<usize>,
}

impl<A: AuthenticatedApi + 'static> TimelineSynchronizer<A> {
    /// Create a synchronizer over `store`.
    pub fn new(
        api: Arc<A>,
        store: LocalStore,
        clock: Arc<dyn Clock>,
        config: TimelineConfig,
    ) -> Self {
        let (hydrations, _) = watch::channel(0);
        Self {
            inner: Arc::new(SyncInner {
                api,
                store,
                clock,
                config,
                slots: DashMap::new(),
                refreshes: Coalescer::new(),
                load_mores: Coalescer::new(),
                hydrating: DashSet::new(),
                hydrations,
            }),
        }
    }

    /// Watch the projection of `key`.
    ///
    /// Emits the current state at once, then again whenever the status or
    /// the cached data behind it changes. Equal consecutive states are
    /// emitted once.
    pub fn observe(&self, key: TimelineKey) -> BoxStream<'static, TimelineState> {
        let inner = Arc::clone(&self.inner);
        let observer = Observer {
            status: inner.slot(&key).status.subscribe(),
            changes: inner.store.subscribe(),
            inner,
            key,
            started: false,
            last: None,
        };
        stream::unfold(observer, |mut observer| async move {
            let state = observer.next_state().await?;
            Some((state, observer))
        })
        .boxed()
    }

    /// The projection of `key` right now.
    pub async fn current(&self, key: &TimelineKey) -> Result<TimelineState, ClientError> {
        self.inner.project(key).await
    }

    /// Load status of `key`.
    pub fn status(&self, key: &TimelineKey) -> TimelineStatus {
        self.inner.slot(key).status.borrow().clone()
    }

    /// Fetch the newest page of `key` and merge it at the head.
    ///
    /// Concurrent refreshes of one key share a single fetch.
    pub async fn refresh(&self, key: &TimelineKey) -> Result<(), ClientError> {
        let inner = Arc::clone(&self.inner);
        let owned = key.clone();
        self.inner
            .refreshes
            .run(key.clone(), move || inner.run_refresh(owned))
            .await
    }

    /// Fetch the page after the last cursor of `key` and append it.
    ///
    /// Does nothing without a session, without a stored window, at the end
    /// of the feed or while a refresh is loading.
    pub async fn load_more(&self, key: &TimelineKey) -> Result<(), ClientError> {
        if !self.inner.api.has_session() {
            return Ok(());
        }
        if self.inner.slot(key).status.borrow().is_refreshing() {
            return Ok(());
        }
        match self.inner.store.timeline_window(key).await? {
            Some(window) if window.last_cursor().is_some() => {}
            _ => return Ok(()),
        }

        let inner = Arc::clone(&self.inner);
        let owned = key.clone();
        self.inner
            .load_mores
            .run(key.clone(), move || inner.run_load_more(owned))
            .await
    }

    /// Wait until no profile hydration is running.
    pub async fn wait_for_hydration(&self) {
        let mut running = self.inner.hydrations.subscribe();
        let _ = running.wait_for(|n| *n == 0).await;
    }
}

impl<A: AuthenticatedApi + 'static> SyncInner<A> {
    fn slot(&self, key: &TimelineKey) -> Arc<TimelineSlot> {
        let slot = self
            .slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(TimelineSlot::new()));
        Arc::clone(slot.value())
    }

    async fn project(&self, key: &TimelineKey) -> Result<TimelineState, ClientError> {
        let status = self.slot(key).status.borrow().clone();
        let mut tiles = self.store.timeline_items(key).await?;

        if let Some(viewer) = self.api.viewer() {
            let now = self.clock.now_millis();
            let rules = self.store.active_muted_words(&viewer.did, now).await?;
            let filter = MuteFilter::new(&rules, now);
            if !filter.is_empty() {
                for tile in &mut tiles {
                    tile.items
                        .retain(|item| !filter.is_muted(&item.post, item.author.viewer_following));
                }
            }
        }

        let last_cursor = tiles.last().and_then(|t| t.cursor.clone());
        Ok(TimelineState {
            status,
            tiles,
            last_cursor,
        })
    }

    async fn run_refresh(self: Arc<Self>, key: TimelineKey) -> Result<(), ClientError> {
        let slot = self.slot(&key);
        slot.apply(StatusEvent::RefreshRequested);

        match self.merge_head(&key, &slot).await {
            Ok(()) => {
                slot.apply(StatusEvent::RefreshMerged);
                Ok(())
            }
            Err(e) => {
                tracing::debug!(key = %key, error = %e, "refresh failed");
                slot.apply(StatusEvent::RefreshFailed {
                    class: e.class(),
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn merge_head(
        self: &Arc<Self>,
        key: &TimelineKey,
        slot: &TimelineSlot,
    ) -> Result<(), ClientError> {
        let page = self.fetch_page(key, None).await?;

        let guard = slot.write.lock().await;
        let mut window = self.store.timeline_window(key).await?.unwrap_or_default();
        window.apply_refresh(page_ids(&page), page.cursor.clone());
        let now = self.clock.now_millis();
        let generation = window.generation;
        self.commit(key, &page, window, Some(now)).await?;
        drop(guard);

        tracing::debug!(
            key = %key,
            items = page.feed.len(),
            generation,
            "refresh merged"
        );
        self.hydrate_missing(&page).await;
        Ok(())
    }

    async fn run_load_more(self: Arc<Self>, key: TimelineKey) -> Result<(), ClientError> {
        let slot = self.slot(&key);
        let Some(window) = self.store.timeline_window(&key).await? else {
            return Ok(());
        };
        let Some(cursor) = window.last_cursor().cloned() else {
            return Ok(());
        };
        if slot.apply(StatusEvent::LoadMoreRequested) != TimelineStatus::LoadingMore {
            return Ok(());
        }

        match self.merge_tail(&key, &slot, window.generation, &cursor).await {
            Ok(()) => {
                slot.apply(StatusEvent::LoadMoreMerged);
                Ok(())
            }
            Err(e) => {
                tracing::debug!(key = %key, error = %e, "load more failed");
                slot.apply(StatusEvent::LoadMoreFailed {
                    class: e.class(),
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn merge_tail(
        self: &Arc<Self>,
        key: &TimelineKey,
        slot: &TimelineSlot,
        generation: u64,
        cursor: &Cursor,
    ) -> Result<(), ClientError> {
        let page = self.fetch_page(key, Some(cursor)).await?;

        let guard = slot.write.lock().await;
        let mut window = self.store.timeline_window(key).await?.unwrap_or_default();
        match window.apply_append(generation, cursor, page_ids(&page), page.cursor.clone()) {
            AppendOutcome::Appended => {}
            AppendOutcome::Superseded => {
                tracing::debug!(key = %key, cursor = %cursor, "discarding superseded page");
                return Ok(());
            }
        }
        self.commit(key, &page, window, None).await?;
        drop(guard);

        tracing::debug!(key = %key, items = page.feed.len(), "page appended");
        self.hydrate_missing(&page).await;
        Ok(())
    }

    async fn fetch_page(
        &self,
        key: &TimelineKey,
        cursor: Option<&Cursor>,
    ) -> Result<FeedPage, ClientError> {
        let request = feed_request(key, cursor, self.config.page_size);
        let page = self.api.send(request).await?.parse()?;
        Ok(page)
    }

    async fn commit(
        &self,
        key: &TimelineKey,
        page: &FeedPage,
        window: TimelineWindow,
        refreshed_at: Option<i64>,
    ) -> Result<(), ClientError> {
        // Muted words hang off the viewer's profile row.
        if let Some(viewer) = self.api.viewer() {
            self.store.ensure_profile(&viewer).await?;
        }

        let commit = TimelineCommit {
            authors: page
                .feed
                .iter()
                .map(|entry| entry.post.author.clone())
                .collect(),
            posts: page.feed.iter().map(|entry| entry.post.to_post()).collect(),
            window,
            committed_at: self.clock.now_millis(),
            refreshed_at,
        };
        self.store.commit_timeline(key, commit).await?;
        Ok(())
    }

    /// Spawn a profile lookup for page authors that came without profile
    /// data and have no hydrated row.
    async fn hydrate_missing(self: &Arc<Self>, page: &FeedPage) {
        let claimed: Vec<Did> = page
            .feed
            .iter()
            .filter(|entry| !entry.post.author.has_profile())
            .map(|entry| entry.post.author.did.clone())
            .collect();
        if claimed.is_empty() {
            return;
        }

        let missing = match self.store.missing_profiles(&claimed).await {
            Ok(missing) => missing,
            Err(e) => {
                tracing::debug!(error = %e, "could not check cached profiles");
                return;
            }
        };
        let dids: Vec<Did> = missing
            .into_iter()
            .filter(|did| self.hydrating.insert(did.clone()))
            .collect();
        if dids.is_empty() {
            return;
        }

        self.hydrations.send_modify(|n| *n += 1);
        let running = Hydration {
            inner: Arc::clone(self),
            dids,
        };
        tokio::spawn(async move {
            running.inner.hydrate(&running.dids).await;
            drop(running);
        });
    }

    async fn hydrate(&self, dids: &[Did]) {
        for batch in dids.chunks(self.config.hydration_batch.max(1)) {
            match self.fetch_profiles(batch).await {
                Ok(received) => {
                    tracing::debug!(requested = batch.len(), received, "profiles hydrated")
                }
                Err(e) => tracing::debug!(
                    requested = batch.len(),
                    error = %e,
                    "profile hydration failed"
                ),
            }
        }
    }

    async fn fetch_profiles(&self, batch: &[Did]) -> Result<usize, ClientError> {
        let body: ProfilesResponse = self.api.send(profiles_request(batch)).await?.parse()?;
        let profiles: Vec<_> = body
            .profiles
            .into_iter()
            .filter(|p| !p.is_unknown())
            .collect();
        self.store.upsert_profiles(&profiles).await?;
        Ok(profiles.len())
    }
}

// Releases the in-flight dids when a lookup ends, also when it panics.
struct Hydration<A> {
    inner: Arc<SyncInner<A>>,
    dids: Vec<Did>,
}

impl<A> Drop for Hydration<A> {
    fn drop(&mut self) {
        for did in &self.dids {
            self.inner.hydrating.remove(did);
        }
        self.inner
            .hydrations
            .send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Ids of a page in server order, first occurrence wins.
fn page_ids(page: &FeedPage) -> Vec<ContentId> {
    let mut seen = HashSet::new();
    page.feed
        .iter()
        .map(|entry| entry.post.uri.clone())
        .filter(|uri| seen.insert(uri.clone()))
        .collect()
}

struct Observer<A> {
    inner: Arc<SyncInner<A>>,
    key: TimelineKey,
    status: watch::Receiver<TimelineStatus>,
    changes: broadcast::Receiver<StoreChange>,
    started: bool,
    last: Option<TimelineState>,
}

enum Wake {
    Status(bool),
    Store(Result<StoreChange, broadcast::error::RecvError>),
}

impl<A: AuthenticatedApi + 'static> Observer<A> {
    async fn next_state(&mut self) -> Option<TimelineState> {
        loop {
            if self.started {
                self.changed().await?;
            }
            self.started = true;

            match self.inner.project(&self.key).await {
                Ok(state) if self.last.as_ref() != Some(&state) => {
                    self.last = Some(state.clone());
                    return Some(state);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(key = %self.key, error = %e, "timeline projection failed"),
            }
        }
    }

    /// Wait for something that can change the projection.
    async fn changed(&mut self) -> Option<()> {
        loop {
            let wake = tokio::select! {
                changed = self.status.changed() => Wake::Status(changed.is_ok()),
                change = self.changes.recv() => Wake::Store(change),
            };
            match wake {
                Wake::Status(true) => return Some(()),
                Wake::Status(false) => return None,
                Wake::Store(Ok(change)) => {
                    let viewer = self.inner.api.viewer().map(|p| p.did);
                    if change.affects(&self.key, viewer.as_ref()) {
                        return Some(());
                    }
                }
                Wake::Store(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    tracing::debug!(key = %self.key, skipped, "observer lagged");
                    return Some(());
                }
                Wake::Store(Err(broadcast::error::RecvError::Closed)) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{test_jwt, CREATE_SESSION, GET_AUTHOR_FEED, GET_PROFILES, GET_TIMELINE};
    use crate::clock::ManualClock;
    use crate::config::ClientConfig;
    use crate::session::SessionManager;
    use crate::transport::{MockTransport, Request, Response, TransportError};
    use fedline_core::ErrorClass;
    use fedline_store::MemoryKeyValueStore;
    use fedline_types::{
        Handle, MutedWordActorTarget, MutedWordPreference, MutedWordTarget, Profile, Secret,
    };
    use serde_json::json;
    use std::time::Duration;

    const NOW: i64 = 1_700_000_000_000;

    struct Harness {
        sync: TimelineSynchronizer<SessionManager<MockTransport>>,
        sessions: SessionManager<MockTransport>,
        transport: MockTransport,
        store: LocalStore,
        clock: ManualClock,
    }

    async fn harness() -> Harness {
        let transport = MockTransport::new();
        let clock = ManualClock::new(NOW);
        let store = LocalStore::in_memory().await.unwrap();
        let mut config = ClientConfig::default();
        config.network.max_retries = 2;
        config.network.retry_base_delay_ms = 1;
        config.network.retry_max_delay_ms = 2;

        let sessions = SessionManager::new(
            transport.clone(),
            Arc::new(MemoryKeyValueStore::new()),
            Arc::new(clock.clone()),
            config.clone(),
        );
        let sync = TimelineSynchronizer::new(
            Arc::new(sessions.clone()),
            store.clone(),
            Arc::new(clock.clone()),
            config.timeline,
        );
        Harness {
            sync,
            sessions,
            transport,
            store,
            clock,
        }
    }

    async fn signed_in() -> Harness {
        let h = harness().await;
        h.transport.queue_json(
            CREATE_SESSION,
            200,
            json!({
                "accessJwt": test_jwt(NOW / 1000 + 3600),
                "refreshJwt": "refresh",
                "handle": "alice.example",
                "did": "did:plc:alice",
            }),
        );
        h.sessions
            .begin_credential_login("alice.example", Secret::new("pw"))
            .await
            .unwrap();
        h
    }

    fn post(i: u32, text: &str) -> serde_json::Value {
        json!({
            "post": {
                "uri": format!("at://did:plc:bob/app.bsky.feed.post/{i}"),
                "author": {"did": "did:plc:bob", "handle": "bob.example"},
                "text": text,
                "createdAt": NOW - i as i64,
            }
        })
    }

    fn page(range: std::ops::Range<u32>, cursor: Option<&str>) -> serde_json::Value {
        let feed: Vec<_> = range.map(|i| post(i, &format!("post {i}"))).collect();
        match cursor {
            Some(c) => json!({"feed": feed, "cursor": c}),
            None => json!({"feed": feed}),
        }
    }

    fn uri(i: u32) -> ContentId {
        ContentId::new(format!("at://did:plc:bob/app.bsky.feed.post/{i}"))
    }

    // ===========================================
    // Refresh and load-more
    // ===========================================

    #[tokio::test]
    async fn refresh_then_load_more_to_the_end() {
        let h = signed_in().await;
        let key = TimelineKey::Following;

        h.transport.queue_json(GET_TIMELINE, 200, page(0..30, Some("c1")));
        h.sync.refresh(&key).await.unwrap();

        let state = h.sync.current(&key).await.unwrap();
        assert_eq!(state.status, TimelineStatus::Refreshed);
        assert_eq!(state.len(), 30);
        assert_eq!(state.last_cursor, Some(Cursor::new("c1")));
        let first = h.transport.requests_to(GET_TIMELINE).pop().unwrap();
        assert_eq!(first.query_value("limit"), Some("30"));
        assert_eq!(first.query_value("cursor"), None);

        h.transport.queue_json(GET_TIMELINE, 200, page(30..60, None));
        h.sync.load_more(&key).await.unwrap();

        let state = h.sync.current(&key).await.unwrap();
        assert_eq!(state.status, TimelineStatus::Refreshed);
        assert_eq!(state.len(), 60);
        assert_eq!(state.last_cursor, None);
        let second = h.transport.requests_to(GET_TIMELINE).pop().unwrap();
        assert_eq!(second.query_value("cursor"), Some("c1"));

        // End of feed.
        h.sync.load_more(&key).await.unwrap();
        assert_eq!(h.transport.requests_to(GET_TIMELINE).len(), 2);

        let ids: Vec<_> = state.items().map(|i| i.post.uri.clone()).collect();
        assert_eq!(ids, (0..60).map(uri).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn overlapping_refresh_keeps_tail_cursor() {
        let h = signed_in().await;
        let key = TimelineKey::Following;
        h.transport.queue_json(GET_TIMELINE, 200, page(0..30, Some("c1")));
        h.sync.refresh(&key).await.unwrap();
        h.transport.queue_json(GET_TIMELINE, 200, page(30..60, Some("c2")));
        h.sync.load_more(&key).await.unwrap();

        // Two new posts on top, then the head of the previous first page.
        let mut feed = vec![post(100, "new a"), post(101, "new b")];
        feed.extend((0..28).map(|i| post(i, &format!("post {i}"))));
        h.transport
            .queue_json(GET_TIMELINE, 200, json!({"feed": feed, "cursor": "fresh"}));
        h.sync.refresh(&key).await.unwrap();

        let state = h.sync.current(&key).await.unwrap();
        assert_eq!(state.len(), 62);
        assert_eq!(state.last_cursor, Some(Cursor::new("c2")));
        let ids: Vec<_> = state.items().map(|i| i.post.uri.clone()).collect();
        assert_eq!(ids[0], uri(100));
        assert_eq!(ids[1], uri(101));
        assert_eq!(ids[61], uri(59));

        let window = h.store.timeline_window(&key).await.unwrap().unwrap();
        assert_eq!(window.generation, 2);
    }

    #[tokio::test]
    async fn disjoint_refresh_rebuilds_window() {
        let h = signed_in().await;
        let key = TimelineKey::Following;
        h.transport.queue_json(GET_TIMELINE, 200, page(0..30, Some("c1")));
        h.sync.refresh(&key).await.unwrap();

        h.transport.queue_json(GET_TIMELINE, 200, page(200..210, Some("z")));
        h.sync.refresh(&key).await.unwrap();

        let state = h.sync.current(&key).await.unwrap();
        assert_eq!(state.len(), 10);
        assert_eq!(state.last_cursor, Some(Cursor::new("z")));
        // Posts stay cached even when they leave the window.
        assert!(h.store.post(&uri(0)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn failed_refresh_keeps_tiles() {
        let h = signed_in().await;
        let key = TimelineKey::Following;
        h.transport.queue_json(GET_TIMELINE, 200, page(0..30, Some("c1")));
        h.sync.refresh(&key).await.unwrap();

        for _ in 0..3 {
            h.transport.queue_json(GET_TIMELINE, 503, json!({}));
        }
        let result = h.sync.refresh(&key).await;
        assert!(matches!(result, Err(ClientError::Transient(_))));

        let state = h.sync.current(&key).await.unwrap();
        assert!(matches!(
            state.status,
            TimelineStatus::Error {
                class: ErrorClass::Transient,
                ..
            }
        ));
        assert_eq!(state.len(), 30);
    }

    #[tokio::test]
    async fn failed_load_more_reports_error() {
        let h = signed_in().await;
        let key = TimelineKey::Following;
        h.transport.queue_json(GET_TIMELINE, 200, page(0..30, Some("c1")));
        h.sync.refresh(&key).await.unwrap();

        h.transport
            .queue_json(GET_TIMELINE, 200, json!({"feed": "not a list"}));
        let result = h.sync.load_more(&key).await;
        assert!(matches!(result, Err(ClientError::Fatal(_))));
        assert!(matches!(
            h.sync.status(&key),
            TimelineStatus::Error {
                class: ErrorClass::Fatal,
                ..
            }
        ));
        assert_eq!(h.sync.current(&key).await.unwrap().len(), 30);
    }

    #[tokio::test]
    async fn load_more_superseded_by_refresh_is_discarded() {
        let h = signed_in().await;
        let key = TimelineKey::Following;
        h.transport.queue_json(GET_TIMELINE, 200, page(0..30, Some("c1")));
        h.sync.refresh(&key).await.unwrap();

        // First reply answers the load-more, the second the refresh.
        h.transport.queue_json(GET_TIMELINE, 200, page(30..60, Some("c2")));
        h.transport.queue_json(GET_TIMELINE, 200, page(300..330, Some("r1")));

        h.transport.set_latency(Duration::from_millis(50));
        let sync = h.sync.clone();
        let load_key = key.clone();
        let load = tokio::spawn(async move { sync.load_more(&load_key).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.sync.status(&key), TimelineStatus::LoadingMore);

        h.transport.set_latency(Duration::ZERO);
        h.sync.refresh(&key).await.unwrap();
        load.await.unwrap().unwrap();

        let state = h.sync.current(&key).await.unwrap();
        assert_eq!(state.status, TimelineStatus::Refreshed);
        assert_eq!(state.len(), 30);
        assert_eq!(state.last_cursor, Some(Cursor::new("r1")));
        assert!(state.items().all(|i| i.post.uri != uri(30)));
        // Superseded pages are not cached either.
        assert!(h.store.post(&uri(30)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_load_mores_share_one_fetch() {
        let h = signed_in().await;
        let key = TimelineKey::Following;
        h.transport.queue_json(GET_TIMELINE, 200, page(0..30, Some("c1")));
        h.sync.refresh(&key).await.unwrap();

        h.transport.set_latency(Duration::from_millis(20));
        h.transport.queue_json(GET_TIMELINE, 200, page(30..60, Some("c2")));
        let (a, b) = tokio::join!(h.sync.load_more(&key), h.sync.load_more(&key));
        assert_eq!((a, b), (Ok(()), Ok(())));
        assert_eq!(h.transport.requests_to(GET_TIMELINE).len(), 2);
        assert_eq!(h.sync.current(&key).await.unwrap().len(), 60);
    }

    #[tokio::test]
    async fn load_more_without_window_or_session_is_a_no_op() {
        let h = harness().await;
        let key = TimelineKey::Following;
        h.sync.load_more(&key).await.unwrap();

        let h = signed_in().await;
        h.sync.load_more(&key).await.unwrap();
        assert!(h.transport.requests_to(GET_TIMELINE).is_empty());
        assert_eq!(h.sync.status(&key), TimelineStatus::Idle);
    }

    #[tokio::test]
    async fn refresh_without_session() {
        let h = harness().await;
        let key = TimelineKey::Following;
        assert_eq!(h.sync.refresh(&key).await, Err(ClientError::NotSignedIn));
        assert!(matches!(
            h.sync.status(&key),
            TimelineStatus::Error {
                class: ErrorClass::NotSignedIn,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn author_timeline_uses_author_feed() {
        let h = signed_in().await;
        let bob = Did::parse("did:plc:bob").unwrap();
        let key = TimelineKey::Author(bob);
        h.transport.queue_json(GET_AUTHOR_FEED, 200, page(0..3, None));
        h.sync.refresh(&key).await.unwrap();

        let sent = h.transport.requests_to(GET_AUTHOR_FEED).pop().unwrap();
        assert_eq!(sent.query_value("actor"), Some("did:plc:bob"));
        assert_eq!(h.sync.current(&key).await.unwrap().len(), 3);
        // Other keys are untouched.
        assert!(h
            .sync
            .current(&TimelineKey::Following)
            .await
            .unwrap()
            .is_empty());
    }

    // ===========================================
    // Author hydration
    // ===========================================

    fn anonymous_post(i: u32, did: &str) -> serde_json::Value {
        json!({
            "post": {
                "uri": format!("at://{did}/app.bsky.feed.post/{i}"),
                "author": {"did": did},
                "text": "who wrote this",
                "createdAt": NOW,
            }
        })
    }

    #[tokio::test]
    async fn unknown_author_is_hydrated() {
        let h = signed_in().await;
        let key = TimelineKey::Following;
        h.transport.queue_json(
            GET_TIMELINE,
            200,
            json!({"feed": [anonymous_post(1, "did:plc:carol")]}),
        );
        h.transport.queue_json(
            GET_PROFILES,
            200,
            json!({"profiles": [{"did": "did:plc:carol", "handle": "carol.example", "displayName": "Carol"}]}),
        );

        h.sync.refresh(&key).await.unwrap();
        h.sync.wait_for_hydration().await;

        let lookup = h.transport.requests_to(GET_PROFILES).pop().unwrap();
        assert_eq!(lookup.query_value("actors"), Some("did:plc:carol"));
        let state = h.sync.current(&key).await.unwrap();
        let item = state.items().next().unwrap();
        assert_eq!(item.author.handle.as_str(), "carol.example");
        assert_eq!(item.author.display_name.as_deref(), Some("Carol"));
    }

    #[tokio::test]
    async fn failed_hydration_leaves_placeholder() {
        let h = signed_in().await;
        let key = TimelineKey::Following;
        h.transport.queue_json(
            GET_TIMELINE,
            200,
            json!({"feed": [anonymous_post(1, "did:plc:dave")]}),
        );
        h.transport
            .queue_error(GET_PROFILES, TransportError::Malformed("eof".into()));

        h.sync.refresh(&key).await.unwrap();
        h.sync.wait_for_hydration().await;

        let state = h.sync.current(&key).await.unwrap();
        assert_eq!(state.status, TimelineStatus::Refreshed);
        assert!(state.items().next().unwrap().author.is_unknown());
    }

    #[tokio::test]
    async fn hydration_batches_lookups() {
        let h = signed_in().await;
        let key = TimelineKey::Following;
        let feed: Vec<_> = (0..30)
            .map(|i| anonymous_post(i, &format!("did:plc:anon{i}")))
            .collect();
        h.transport
            .queue_json(GET_TIMELINE, 200, json!({"feed": feed}));
        h.transport
            .queue_json(GET_PROFILES, 200, json!({"profiles": []}));
        h.transport
            .queue_json(GET_PROFILES, 200, json!({"profiles": []}));

        h.sync.refresh(&key).await.unwrap();
        h.sync.wait_for_hydration().await;

        let lookups = h.transport.requests_to(GET_PROFILES);
        assert_eq!(lookups.len(), 2);
        assert_eq!(lookups[0].query.len(), 25);
        assert_eq!(lookups[1].query.len(), 5);
    }

    #[tokio::test]
    async fn viewer_posts_get_the_viewer_profile() {
        let h = signed_in().await;
        let key = TimelineKey::Author(viewer());
        h.transport.queue_json(
            GET_AUTHOR_FEED,
            200,
            json!({"feed": [anonymous_post(1, "did:plc:alice")]}),
        );
        h.transport.queue_json(
            GET_PROFILES,
            200,
            json!({"profiles": [{"did": "did:plc:alice", "handle": "alice.example", "displayName": "Alice", "followersCount": 7}]}),
        );

        h.sync.refresh(&key).await.unwrap();
        h.sync.wait_for_hydration().await;

        // The session's stub row is looked up like any uncached author.
        let lookup = h.transport.requests_to(GET_PROFILES).pop().unwrap();
        assert_eq!(lookup.query_value("actors"), Some("did:plc:alice"));
        let state = h.sync.current(&key).await.unwrap();
        let item = state.items().next().unwrap();
        assert!(!item.author.is_unknown());
        assert_eq!(item.author.display_name.as_deref(), Some("Alice"));
        assert_eq!(item.author.followers_count, 7);
    }

    struct FailingLookups(SessionManager<MockTransport>);

    #[async_trait::async_trait]
    impl AuthenticatedApi for FailingLookups {
        async fn send(&self, request: Request) -> Result<Response, ClientError> {
            if request.endpoint == GET_PROFILES {
                panic!("profile lookup crashed");
            }
            self.0.send(request).await
        }

        fn has_session(&self) -> bool {
            self.0.has_session()
        }

        fn viewer(&self) -> Option<Profile> {
            self.0.viewer()
        }
    }

    #[tokio::test]
    async fn crashed_hydration_does_not_block_waiters() {
        let h = signed_in().await;
        let sync = TimelineSynchronizer::new(
            Arc::new(FailingLookups(h.sessions.clone())),
            h.store.clone(),
            Arc::new(h.clock.clone()),
            TimelineConfig::default(),
        );
        let key = TimelineKey::Following;
        h.transport.queue_json(
            GET_TIMELINE,
            200,
            json!({"feed": [anonymous_post(1, "did:plc:erin")]}),
        );

        sync.refresh(&key).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), sync.wait_for_hydration())
            .await
            .unwrap();
        assert!(sync.inner.hydrating.is_empty());
    }

    // ===========================================
    // Cached profiles
    // ===========================================

    fn cached_bob() -> Profile {
        let mut bob = Profile::new(Did::parse("did:plc:bob").unwrap(), Handle::new("bob.example"));
        bob.display_name = Some("Bob".into());
        bob.description = Some("bio".into());
        bob.followers_count = 1234;
        bob.created_at = Some(42);
        bob.viewer_following = true;
        bob
    }

    #[tokio::test]
    async fn page_merge_keeps_cached_profile_fields() {
        let h = signed_in().await;
        h.store.upsert_profile(&cached_bob()).await.unwrap();

        // The embedded author view has only a did and a handle.
        let key = refreshed_with_spoiler(&h).await;

        let stored = h.store.profile(&cached_bob().did).await.unwrap().unwrap();
        assert_eq!(stored, cached_bob());

        // Still followed, so an ExcludeFollowing rule leaves the post visible.
        let rule = MutedWordPreference::new(viewer(), "spoilers", [MutedWordTarget::Content])
            .with_actor_target(MutedWordActorTarget::ExcludeFollowing);
        h.store.upsert_muted_word(&rule).await.unwrap();
        assert_eq!(h.sync.current(&key).await.unwrap().len(), 2);
    }

    // ===========================================
    // Muted words
    // ===========================================

    async fn refreshed_with_spoiler(h: &Harness) -> TimelineKey {
        let key = TimelineKey::Following;
        h.transport.queue_json(
            GET_TIMELINE,
            200,
            json!({"feed": [post(1, "Huge SPOILERS ahead"), post(2, "nothing to see")]}),
        );
        h.sync.refresh(&key).await.unwrap();
        key
    }

    fn viewer() -> Did {
        Did::parse("did:plc:alice").unwrap()
    }

    #[tokio::test]
    async fn active_muted_word_hides_content_only_in_projection() {
        let h = signed_in().await;
        let key = refreshed_with_spoiler(&h).await;

        let rule = MutedWordPreference::new(viewer(), "spoilers", [MutedWordTarget::Content])
            .with_expiry(NOW + 60_000);
        h.store.upsert_muted_word(&rule).await.unwrap();

        let state = h.sync.current(&key).await.unwrap();
        assert_eq!(state.len(), 1);
        assert_eq!(state.items().next().unwrap().post.uri, uri(2));
        assert!(h.store.post(&uri(1)).await.unwrap().is_some());

        // Once expired the post shows again; the rule stays stored.
        h.clock.advance(Duration::from_secs(61));
        assert_eq!(h.sync.current(&key).await.unwrap().len(), 2);
        assert_eq!(h.store.muted_words(&viewer()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn followed_authors_can_be_excluded_from_muting() {
        let h = signed_in().await;
        let key = TimelineKey::Following;
        h.transport.queue_json(
            GET_TIMELINE,
            200,
            json!({"feed": [{
                "post": {
                    "uri": "at://did:plc:bob/app.bsky.feed.post/1",
                    "author": {"did": "did:plc:bob", "handle": "bob.example", "viewerFollowing": true},
                    "text": "spoilers",
                    "createdAt": NOW,
                }
            }]}),
        );
        h.sync.refresh(&key).await.unwrap();

        let rule = MutedWordPreference::new(viewer(), "spoilers", [MutedWordTarget::Content])
            .with_actor_target(MutedWordActorTarget::ExcludeFollowing);
        h.store.upsert_muted_word(&rule).await.unwrap();
        assert_eq!(h.sync.current(&key).await.unwrap().len(), 1);
    }

    // ===========================================
    // Observation
    // ===========================================

    #[tokio::test]
    async fn observe_emits_now_and_on_change() {
        let h = signed_in().await;
        let key = TimelineKey::Following;
        let mut states = h.sync.observe(key.clone());

        let initial = states.next().await.unwrap();
        assert_eq!(initial.status, TimelineStatus::Idle);
        assert!(initial.is_empty());

        h.transport.queue_json(GET_TIMELINE, 200, page(0..30, Some("c1")));
        h.sync.refresh(&key).await.unwrap();

        let mut previous = initial;
        let settled = loop {
            let state = tokio::time::timeout(Duration::from_secs(5), states.next())
                .await
                .unwrap()
                .unwrap();
            assert_ne!(state, previous, "duplicate emission");
            if state.status == TimelineStatus::Refreshed && state.len() == 30 {
                break state;
            }
            previous = state;
        };
        assert_eq!(settled.last_cursor, Some(Cursor::new("c1")));
    }

    #[tokio::test]
    async fn observe_reacts_to_muted_words() {
        let h = signed_in().await;
        let key = refreshed_with_spoiler(&h).await;
        let mut states = h.sync.observe(key.clone());
        assert_eq!(states.next().await.unwrap().len(), 2);

        let rule = MutedWordPreference::new(viewer(), "spoilers", [MutedWordTarget::Content]);
        h.store.upsert_muted_word(&rule).await.unwrap();

        let state = tokio::time::timeout(Duration::from_secs(5), states.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.len(), 1);
    }

    #[tokio::test]
    async fn cached_timeline_renders_before_fetch() {
        let h = signed_in().await;
        let key = TimelineKey::Following;
        h.transport.queue_json(GET_TIMELINE, 200, page(0..5, Some("c1")));
        h.sync.refresh(&key).await.unwrap();

        // A second synchronizer over the same store, as after a restart.
        let restarted = TimelineSynchronizer::new(
            Arc::new(h.sessions.clone()),
            h.store.clone(),
            Arc::new(h.clock.clone()),
            TimelineConfig::default(),
        );
        let state = restarted.observe(key).next().await.unwrap();
        assert_eq!(state.status, TimelineStatus::Idle);
        assert_eq!(state.len(), 5);
    }
}
