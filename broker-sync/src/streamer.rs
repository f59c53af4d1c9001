//! The C2 Market-Data Streamer: a single authenticated WebSocket with
//! subscription recovery, staleness detection, and a per-conid cache
//! (`spec.md` §4.2).
//!
//! Generalized from the teacher's `WebSocketSync`/`BrokerSyncDaemon` shape:
//! a split sink/stream over `tokio_tungstenite`, a shared `Arc<Mutex<_>>`
//! state machine, and independent timer tasks selected alongside the
//! reader loop (`spec.md` §9 "Timers and intervals" guidance — heartbeat,
//! session-refresh, and health-check are three separate cancellable tasks,
//! never one omnibus loop).

use crate::backoff::ConnectionPhase;
use crate::cache::SharedCache;
use crate::wire::{apply_tick, parse_server_message, ServerMessage};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use model::market_data::Subscription;
use model::persistence::LatestPriceWrite;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, Mutex, Notify};
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Callback the session manager registers so the streamer can obtain fresh
/// credentials without ever importing or owning a session
/// (`spec.md` §9 "cyclic reference" guidance).
#[async_trait]
pub trait CredentialRefresh: Send + Sync {
    /// Returns the current `Cookie` header value and, when available, a
    /// fresh SSO token.
    async fn refresh(&self) -> anyhow::Result<(String, Option<String>)>;
}

/// One update delivered to a subscriber of [`MarketDataStreamer::on_update`].
#[derive(Debug, Clone)]
pub struct UpdateEvent {
    /// The conid that just ticked.
    pub conid: i64,
}

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const SESSION_REFRESH_INTERVAL: Duration = Duration::from_secs(60);
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);
const SSO_REFRESH_MARGIN: Duration = Duration::from_secs(120);
const STALE_THRESHOLD: Duration = Duration::from_secs(60);
const UPDATE_QUEUE_CAPACITY: usize = 256;
/// Minimum gap between `upsert_latest_price` calls for the same conid
/// (`spec.md` §4.2).
const PRICE_PERSIST_DEBOUNCE_SECS: i64 = 5;

/// The streamer handle. Cheap to clone; every task above shares one
/// instance via `Arc`.
pub struct MarketDataStreamer {
    url: String,
    cache: Arc<SharedCache>,
    credential_refresh: Mutex<Option<Arc<dyn CredentialRefresh>>>,
    updates: broadcast::Sender<UpdateEvent>,
    latest_price_sink: Option<Arc<dyn LatestPriceWrite>>,
    authenticated: AtomicBool,
    disconnect_requested: Notify,
    shutdown: Notify,
    sso_token: Mutex<Option<String>>,
    last_persisted: Mutex<HashMap<i64, chrono::DateTime<chrono::Utc>>>,
}

impl MarketDataStreamer {
    /// Construct a streamer for the given WS URL. Performs no I/O.
    pub fn new(url: impl Into<String>, latest_price_sink: Option<Arc<dyn LatestPriceWrite>>) -> Arc<Self> {
        let (updates, _rx) = broadcast::channel(UPDATE_QUEUE_CAPACITY);
        Arc::new(Self {
            url: url.into(),
            cache: Arc::new(SharedCache::new()),
            credential_refresh: Mutex::new(None),
            updates,
            latest_price_sink,
            authenticated: AtomicBool::new(false),
            disconnect_requested: Notify::new(),
            shutdown: Notify::new(),
            sso_token: Mutex::new(None),
            last_persisted: Mutex::new(HashMap::new()),
        })
    }

    /// `setCredentialRefreshCallback(fn)`.
    pub async fn set_credential_refresh_callback(&self, callback: Arc<dyn CredentialRefresh>) {
        *self.credential_refresh.lock().await = Some(callback);
    }

    /// `subscribe(conid, {...})` — stores the subscription; sends
    /// immediately when authenticated, otherwise the next successful
    /// connect replays it.
    pub async fn subscribe(&self, subscription: Subscription, writer: Option<&mpsc::Sender<Message>>) {
        self.cache.add_subscription(subscription.clone()).await;
        if self.authenticated.load(Ordering::SeqCst) {
            if let Some(tx) = writer {
                let _ = tx.send(Message::Text(subscription.subscribe_frame())).await;
            }
        }
    }

    /// `unsubscribe(conid)`.
    pub async fn unsubscribe(&self, conid: i64, writer: Option<&mpsc::Sender<Message>>) {
        if let Some(subscription) = self.cache.remove_subscription(conid).await {
            if let Some(tx) = writer {
                let _ = tx.send(Message::Text(subscription.unsubscribe_frame())).await;
            }
        }
    }

    /// `onUpdate(callback)` — returns a receiver; drop it to unsubscribe.
    /// Lagging receivers silently drop the oldest queued updates rather
    /// than block the reader task (`spec.md` §9).
    pub fn on_update(&self) -> broadcast::Receiver<UpdateEvent> {
        self.updates.subscribe()
    }

    /// `getCachedMarketData(conid)`.
    pub async fn get_cached_market_data(&self, conid: i64) -> Option<model::MarketDataCacheEntry> {
        self.cache.get(conid).await
    }

    /// Rehydrate the cache from persisted rows so consumers see last-known
    /// prices immediately on startup, before the first WS tick arrives
    /// (`spec.md` §4.2). Call before [`Self::run`] begins reading frames.
    pub async fn seed_from_persisted(&self, rows: Vec<model::persistence::LatestPriceRow>) {
        for row in rows {
            self.cache.seed(row.conid, row.price, row.bid, row.ask, row.updated_at).await;
        }
    }

    /// `isDataFresh(maxAgeMs)` for one conid.
    pub async fn is_data_fresh(&self, conid: i64, max_age_ms: i64) -> bool {
        self.cache
            .is_fresh(conid, chrono::Utc::now(), chrono::Duration::milliseconds(max_age_ms))
            .await
    }

    /// `getDataAge()` — the oldest still-subscribed conid's cache age.
    pub async fn get_data_age_ms(&self) -> Option<i64> {
        self.cache.oldest_age_ms(chrono::Utc::now()).await
    }

    /// `hasSubscriptionError()`.
    pub async fn has_subscription_error(&self) -> bool {
        self.cache.has_subscription_error().await
    }

    /// `forceFullReconnect()` — clears the cache and signals the run loop
    /// to tear down and redial (`spec.md` §4.2).
    pub async fn force_full_reconnect(&self) {
        self.cache.clear_cache().await;
        self.disconnect_requested.notify_one();
    }

    /// `disconnect()` — stop the run loop entirely.
    pub fn disconnect(&self) {
        self.shutdown.notify_one();
    }

    async fn refresh_credentials(&self) -> anyhow::Result<(String, Option<String>)> {
        let callback = self.credential_refresh.lock().await.clone();
        match callback {
            Some(cb) => cb.refresh().await,
            None => anyhow::bail!("no credential-refresh callback registered"),
        }
    }

    /// Run the streamer until `disconnect()` is called. Reconnects with
    /// exponential backoff on any failure (`spec.md` §4.2, §5).
    pub async fn run(self: Arc<Self>) {
        let mut phase = ConnectionPhase::Disconnected;
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("streamer shutdown requested");
                    return;
                }
                result = self.connect_and_stream() => {
                    match result {
                        Ok(()) => {
                            debug!("connection cycle ended cleanly, reconnecting");
                            phase = ConnectionPhase::Disconnected;
                        }
                        Err(err) => {
                            warn!(error = %err, "connection cycle failed");
                            phase = phase.record_failure(Instant::now());
                            if phase.is_exhausted() {
                                error!("exceeded max reconnect attempts for this window");
                            }
                        }
                    }
                }
            }

            let delay = match &phase {
                ConnectionPhase::ErrorRecovery { next_retry, .. } => {
                    next_retry.saturating_duration_since(Instant::now())
                }
                _ => Duration::from_millis(0),
            };
            tokio::select! {
                _ = self.shutdown.notified() => return,
                _ = sleep(delay) => {}
            }
        }
    }

    /// One full connection lifecycle: dial, authenticate, replay
    /// subscriptions, run reader + three timer tasks until disconnect.
    async fn connect_and_stream(self: &Arc<Self>) -> anyhow::Result<()> {
        let (cookie_string, sso_token) = self.refresh_credentials().await?;
        *self.sso_token.lock().await = sso_token.clone();

        let mut request = self.url.clone().into_client_request()?;
        request
            .headers_mut()
            .insert("Cookie", cookie_string.parse()?);

        let (ws_stream, _) = timeout(Duration::from_secs(10), connect_async(request))
            .await
            .map_err(|_| anyhow::anyhow!("connect timed out"))??;
        let (mut sink, mut stream) = ws_stream.split();

        if let Some(token) = &sso_token {
            let frame = serde_json::json!({ "session": token }).to_string();
            sink.send(Message::Text(frame)).await?;
        }

        let (write_tx, mut write_rx) = mpsc::channel::<Message>(64);
        let writer_task = tokio::spawn(async move {
            while let Some(msg) = write_rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let streamer = self.clone();
        let write_tx_heartbeat = write_tx.clone();
        let heartbeat_task = tokio::spawn(async move {
            loop {
                sleep(HEARTBEAT_INTERVAL).await;
                if write_tx_heartbeat.send(Message::Text("tic".to_string())).await.is_err() {
                    break;
                }
            }
        });

        let write_tx_refresh = write_tx.clone();
        let refresh_task = tokio::spawn(async move {
            loop {
                sleep(SESSION_REFRESH_INTERVAL).await;
                let current_token = streamer.sso_token.lock().await.clone();
                // Without visibility into the token's own expiry here, the
                // session manager is the source of truth: always ask it,
                // and it no-ops when the current token still has margin.
                if let Ok((_, Some(token))) = streamer.refresh_credentials().await {
                    if Some(&token) != current_token.as_ref() {
                        *streamer.sso_token.lock().await = Some(token.clone());
                        let frame = serde_json::json!({ "session": token }).to_string();
                        if write_tx_refresh.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let streamer = self.clone();
        let health_check_task = tokio::spawn(async move {
            loop {
                sleep(HEALTH_CHECK_INTERVAL).await;
                if !streamer.authenticated.load(Ordering::SeqCst) {
                    continue;
                }
                let spy_conid = streamer
                    .cache
                    .all_subscriptions()
                    .await
                    .into_iter()
                    .find(|s| s.symbol.as_deref() == Some("SPY"))
                    .map(|s| s.conid);
                if let Some(conid) = spy_conid {
                    let fresh = streamer
                        .cache
                        .is_fresh(conid, chrono::Utc::now(), chrono::Duration::seconds(STALE_THRESHOLD.as_secs() as i64))
                        .await;
                    if !fresh {
                        warn!("SPY cache stale beyond threshold, forcing full reconnect");
                        streamer.force_full_reconnect().await;
                    }
                }
            }
        });

        self.authenticated.store(false, Ordering::SeqCst);
        let result = self.read_loop(&mut stream, &write_tx).await;

        heartbeat_task.abort();
        refresh_task.abort();
        health_check_task.abort();
        drop(write_tx);
        let _ = writer_task.await;
        self.authenticated.store(false, Ordering::SeqCst);

        result
    }

    async fn read_loop(
        self: &Arc<Self>,
        stream: &mut (impl futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin),
        write_tx: &mpsc::Sender<Message>,
    ) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                _ = self.disconnect_requested.notified() => {
                    return Ok(());
                }
                _ = self.shutdown.notified() => {
                    return Ok(());
                }
                next = stream.next() => {
                    match next {
                        Some(Ok(Message::Text(text))) => {
                            if self.handle_text(&text, write_tx).await? {
                                return Ok(());
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!("websocket closed");
                            return Err(anyhow::anyhow!("socket closed"));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            return Err(err.into());
                        }
                    }
                }
            }
        }
    }

    /// Returns `Ok(true)` when the caller should tear down and reconnect
    /// (an authentication failure), `Ok(false)` to keep reading.
    async fn handle_text(self: &Arc<Self>, text: &str, write_tx: &mpsc::Sender<Message>) -> anyhow::Result<bool> {
        match parse_server_message(text) {
            ServerMessage::Tic => {}
            ServerMessage::WaitingForSession => {
                let token = self.sso_token.lock().await.clone();
                if let Some(token) = token {
                    let frame = serde_json::json!({ "session": token }).to_string();
                    let _ = write_tx.send(Message::Text(frame)).await;
                } else {
                    warn!("server wants a session frame but no SSO token is available");
                    return Ok(true);
                }
            }
            ServerMessage::Status { authenticated } => {
                if authenticated {
                    self.authenticated.store(true, Ordering::SeqCst);
                    for subscription in self.cache.all_subscriptions().await {
                        let _ = write_tx.send(Message::Text(subscription.subscribe_frame())).await;
                    }
                } else {
                    warn!("WS authentication failed even though the socket is open");
                    self.cache.clear_cache().await;
                    return Ok(true);
                }
            }
            ServerMessage::Tick { conid, error, fields } => {
                if let Some(message) = error {
                    self.cache.record_subscription_error(conid, message.clone()).await;
                    let lower = message.to_lowercase();
                    if lower.contains("not authenticated") || lower.contains("authentication") {
                        return Ok(true);
                    }
                    return Ok(false);
                }

                let symbol = self
                    .cache
                    .all_subscriptions()
                    .await
                    .into_iter()
                    .find(|s| s.conid == conid)
                    .and_then(|s| s.symbol);

                self.cache
                    .update_entry(conid, chrono::Utc::now(), |entry| {
                        apply_tick(entry, symbol.as_deref(), &fields, chrono::Utc::now());
                    })
                    .await;

                if let Some(sink) = &self.latest_price_sink {
                    if let Some(entry) = self.cache.get(conid).await {
                        let now = chrono::Utc::now();
                        let due = {
                            let mut last_persisted = self.last_persisted.lock().await;
                            let due = last_persisted
                                .get(&conid)
                                .is_none_or(|last| now - *last >= chrono::Duration::seconds(PRICE_PERSIST_DEBOUNCE_SECS));
                            if due {
                                last_persisted.insert(conid, now);
                            }
                            due
                        };
                        if due {
                            let _ = sink
                                .upsert_latest_price(
                                    symbol.as_deref().unwrap_or_default(),
                                    conid,
                                    entry.last,
                                    entry.bid,
                                    entry.ask,
                                    "websocket",
                                    entry.timestamp,
                                )
                                .await;
                        }
                    }
                }

                let _ = self.updates.send(UpdateEvent { conid });
            }
            ServerMessage::Other(_) => {}
        }
        Ok(false)
    }
}
