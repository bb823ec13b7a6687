// offchain/spm_client/src/live.rs
//! Live-update channel over the cluster's pubsub websocket.
//!
//! One connection multiplexes every subscription key. Subscriptions survive reconnects:
//! on every open, each registered key is (re-)sent exactly once. Notifications are routed
//! only to the key owning the server subscription id and carry no decoded state; handlers
//! treat them as "something changed, re-fetch".
//!
//! Bookkeeping lives in [`ChannelCore`], a plain state machine behind a mutex that is never
//! held across an await or while a handler runs. The websocket itself is owned by a driver
//! task spawned from [`LiveChannel::start`].

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use futures::{FutureExt, SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use solana_sdk::pubkey::Pubkey;
use tokio::{
    sync::{mpsc, watch, Notify},
    task::JoinHandle,
    time::{interval_at, sleep, Instant},
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, trace, warn};

use crate::config::ChannelConfig;

pub type Handler = Arc<dyn Fn(Value) + Send + Sync>;
pub type StatusListener = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Open,
    Reconnecting { attempt: u32 },
    /// Gave up after the max attempt count; only `reconnect()` leaves this state.
    Offline,
}

const NOTIFICATION_METHODS: [&str; 2] = ["accountNotification", "programNotification"];

/// `{ encoding: "base64", commitment: "confirmed" }`
pub fn subscribe_options() -> Value {
    json!({ "encoding": "base64", "commitment": "confirmed" })
}

/// `accountSubscribe` -> `accountUnsubscribe`, etc.
pub fn unsubscribe_method(method: &str) -> String {
    method.replace("Subscribe", "Unsubscribe")
}

struct Subscription {
    method: String,
    params: Value,
    handler: Handler,
    request_id: Option<u64>,
    server_id: Option<u64>,
}

#[derive(Deserialize)]
struct Inbound {
    id: Option<u64>,
    result: Option<Value>,
    error: Option<Value>,
    method: Option<String>,
    params: Option<NotificationParams>,
}

#[derive(Deserialize)]
struct NotificationParams {
    subscription: u64,
    #[serde(default)]
    result: Value,
}

// ---------- Core state machine ----------

pub struct ChannelCore {
    state: ChannelState,
    attempts: u32,
    next_request_id: u64,
    subscriptions: HashMap<String, Subscription>,
    pending: HashMap<u64, String>, // request id -> subscription key
    listeners: HashMap<ListenerId, StatusListener>,
    next_listener_id: u64,
    outbound: Option<mpsc::UnboundedSender<String>>,
}

impl Default for ChannelCore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelCore {
    pub fn new() -> Self {
        Self {
            state: ChannelState::Disconnected,
            attempts: 0,
            next_request_id: 0,
            subscriptions: HashMap::new(),
            pending: HashMap::new(),
            listeners: HashMap::new(),
            next_listener_id: 0,
            outbound: None,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn has_subscription(&self, key: &str) -> bool {
        self.subscriptions.contains_key(key)
    }

    pub fn server_id(&self, key: &str) -> Option<u64> {
        self.subscriptions.get(key).and_then(|s| s.server_id)
    }

    /// Writes the frame if a socket is attached. Returns the request id either way.
    fn send_request(&mut self, method: &str, params: Value) -> u64 {
        self.next_request_id += 1;
        let id = self.next_request_id;
        if let Some(tx) = self.outbound.as_ref().filter(|_| self.state == ChannelState::Open) {
            let frame = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
            if tx.send(frame.to_string()).is_err() {
                debug!(method, "writer gone, dropping request");
            }
        }
        id
    }

    fn send_subscription(&mut self, key: &str) {
        let Some((method, params)) = self
            .subscriptions
            .get(key)
            .map(|s| (s.method.clone(), s.params.clone()))
        else {
            return;
        };
        let id = self.send_request(&method, params);
        self.pending.insert(id, key.to_string());
        if let Some(sub) = self.subscriptions.get_mut(key) {
            sub.request_id = Some(id);
            sub.server_id = None;
        }
    }

    pub fn subscribe(&mut self, key: &str, method: &str, params: Value, handler: Handler) {
        if self.subscriptions.contains_key(key) {
            self.unsubscribe(key);
        }
        self.subscriptions.insert(
            key.to_string(),
            Subscription {
                method: method.to_string(),
                params,
                handler,
                request_id: None,
                server_id: None,
            },
        );
        if self.is_open() {
            self.send_subscription(key);
        }
    }

    /// Sends the paired unsubscribe only when open and a server id was assigned.
    /// Returns whether the key existed.
    pub fn unsubscribe(&mut self, key: &str) -> bool {
        let Some(sub) = self.subscriptions.remove(key) else {
            return false;
        };
        self.pending.retain(|_, k| k != key);
        if let (true, Some(server_id)) = (self.is_open(), sub.server_id) {
            self.send_request(&unsubscribe_method(&sub.method), json!([server_id]));
        }
        true
    }

    pub fn add_listener(&mut self, listener: StatusListener) -> ListenerId {
        self.next_listener_id += 1;
        let id = ListenerId(self.next_listener_id);
        self.listeners.insert(id, listener);
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    fn listeners(&self) -> Vec<StatusListener> {
        self.listeners.values().cloned().collect()
    }

    pub fn begin_connect(&mut self) {
        self.state = ChannelState::Connecting;
    }

    /// Socket is up: reset backoff, attach the writer, resend every subscription once.
    /// Returns the listeners to notify with `true`.
    pub fn on_open(&mut self, outbound: mpsc::UnboundedSender<String>) -> Vec<StatusListener> {
        self.state = ChannelState::Open;
        self.attempts = 0;
        self.outbound = Some(outbound);
        self.pending.clear();

        let mut keys: Vec<String> = self.subscriptions.keys().cloned().collect();
        keys.sort();
        for key in keys {
            self.send_subscription(&key);
        }
        self.listeners()
    }

    /// Socket is gone. Server ids die with the connection. Returns listeners to notify
    /// with `false` when this is a real open -> closed transition, otherwise none.
    pub fn on_close(&mut self) -> Vec<StatusListener> {
        let was_open = self.is_open();
        self.outbound = None;
        self.pending.clear();
        for sub in self.subscriptions.values_mut() {
            sub.server_id = None;
            sub.request_id = None;
        }
        if was_open {
            self.state = ChannelState::Disconnected;
            self.listeners()
        } else {
            Vec::new()
        }
    }

    /// Next attempt number, or `None` once `max` attempts are spent (channel goes offline).
    pub fn next_reconnect(&mut self, max: u32) -> Option<u32> {
        if self.attempts >= max {
            self.state = ChannelState::Offline;
            return None;
        }
        self.attempts += 1;
        self.state = ChannelState::Reconnecting {
            attempt: self.attempts,
        };
        Some(self.attempts)
    }

    pub fn reset_attempts(&mut self) {
        self.attempts = 0;
    }

    pub fn heartbeat(&mut self) {
        if self.is_open() {
            self.send_request("ping", json!([]));
        }
    }

    /// Full teardown: drop every subscription and pending request.
    pub fn shutdown(&mut self) -> Vec<StatusListener> {
        let listeners = self.on_close();
        self.subscriptions.clear();
        self.state = ChannelState::Disconnected;
        self.attempts = 0;
        listeners
    }

    /// Correlates responses and routes notifications. Returns the handler to invoke (after
    /// the lock is released) and its payload.
    pub fn handle_message(&mut self, text: &str) -> Option<(Handler, Value)> {
        let msg: Inbound = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                debug!(%e, "ignoring malformed frame");
                return None;
            }
        };

        if let Some((id, key)) = msg.id.and_then(|id| self.pending.remove(&id).map(|k| (id, k))) {
            let server_id = msg.result.as_ref().and_then(Value::as_u64);
            match (self.subscriptions.get_mut(&key), server_id) {
                (Some(sub), Some(server_id)) if sub.request_id == Some(id) => {
                    trace!(key = %key, server_id, "subscription confirmed");
                    sub.server_id = Some(server_id);
                }
                (_, None) => {
                    warn!(key = %key, error = ?msg.error, "subscribe request rejected");
                }
                _ => {}
            }
            return None;
        }

        let method = msg.method.as_deref()?;
        if !NOTIFICATION_METHODS.contains(&method) {
            return None;
        }
        let params = msg.params?;
        let found = self
            .subscriptions
            .values()
            .find(|s| s.server_id == Some(params.subscription))
            .map(|s| s.handler.clone());
        if found.is_none() {
            trace!(subscription = params.subscription, "notification for unknown subscription");
        }
        found.map(|h| (h, params.result))
    }
}

fn notify(listeners: Vec<StatusListener>, connected: bool) {
    for l in listeners {
        l(connected);
    }
}

// ---------- Service ----------

struct Driver {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Reconnecting JSON-RPC pubsub channel. Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct LiveChannel {
    config: Arc<ChannelConfig>,
    core: Arc<Mutex<ChannelCore>>,
    wake: Arc<Notify>,
    driver: Arc<Mutex<Option<Driver>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl LiveChannel {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config: Arc::new(config),
            core: Arc::new(Mutex::new(ChannelCore::new())),
            wake: Arc::new(Notify::new()),
            driver: Arc::new(Mutex::new(None)),
        }
    }

    /// Spawns the driver on the current tokio runtime. No-op if already running.
    pub fn start(&self) {
        let mut driver = lock(&self.driver);
        if driver.as_ref().is_some_and(|d| !d.handle.is_finished()) {
            return;
        }
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run(
            self.config.clone(),
            self.core.clone(),
            self.wake.clone(),
            stop_rx,
        ));
        *driver = Some(Driver {
            stop: stop_tx,
            handle,
        });
    }

    /// Closes the socket, waits for the driver, and drops all subscriptions.
    pub async fn stop(&self) {
        let driver = lock(&self.driver).take();
        if let Some(Driver { stop, handle }) = driver {
            let _ = stop.send(true);
            if let Err(e) = handle.await {
                warn!(%e, "live channel driver ended abnormally");
            }
        }
        let listeners = lock(&self.core).shutdown();
        notify(listeners, false);
    }

    /// Forces a fresh connection with a reset attempt counter. Also leaves `Offline`.
    pub fn reconnect(&self) {
        lock(&self.core).reset_attempts();
        let running = lock(&self.driver)
            .as_ref()
            .is_some_and(|d| !d.handle.is_finished());
        if running {
            self.wake.notify_one();
        } else {
            self.start();
        }
    }

    pub fn subscribe<F>(&self, key: &str, method: &str, params: Value, handler: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        lock(&self.core).subscribe(key, method, params, Arc::new(handler));
    }

    pub fn subscribe_account<F>(&self, key: &str, address: &Pubkey, handler: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.subscribe(
            key,
            "accountSubscribe",
            json!([address.to_string(), subscribe_options()]),
            handler,
        );
    }

    pub fn subscribe_program<F>(&self, key: &str, program_id: &Pubkey, handler: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.subscribe(
            key,
            "programSubscribe",
            json!([program_id.to_string(), subscribe_options()]),
            handler,
        );
    }

    pub fn unsubscribe(&self, key: &str) -> bool {
        lock(&self.core).unsubscribe(key)
    }

    pub fn on_status_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        lock(&self.core).add_listener(Arc::new(listener))
    }

    pub fn remove_status_listener(&self, id: ListenerId) -> bool {
        lock(&self.core).remove_listener(id)
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.core).is_open()
    }

    pub fn state(&self) -> ChannelState {
        lock(&self.core).state()
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }
}

// ---------- Driver ----------

enum SessionEnd {
    Closed,
    Stopped,
    Reconnect,
}

async fn run(
    config: Arc<ChannelConfig>,
    core: Arc<Mutex<ChannelCore>>,
    wake: Arc<Notify>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        lock(&core).begin_connect();
        debug!(url = %config.ws_url, "connecting");

        let end = tokio::select! {
            res = connect_async(config.ws_url.as_str()) => match res {
                Ok((ws, _)) => session(ws, &config, &core, &wake, &mut stop).await,
                Err(e) => {
                    warn!(url = %config.ws_url, %e, "websocket connect failed");
                    SessionEnd::Closed
                }
            },
            _ = stop.changed() => SessionEnd::Stopped,
        };

        let listeners = lock(&core).on_close();
        if !listeners.is_empty() {
            info!("live channel closed");
        }
        notify(listeners, false);

        match end {
            SessionEnd::Stopped => break,
            SessionEnd::Reconnect => continue,
            SessionEnd::Closed => {}
        }

        let next = lock(&core).next_reconnect(config.max_reconnect_attempts);
        match next {
            Some(attempt) => {
                let delay = config.backoff(attempt);
                info!(attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = wake.notified() => {}
                    _ = stop.changed() => break,
                }
            }
            None => {
                warn!(
                    attempts = config.max_reconnect_attempts,
                    "live channel offline, waiting for explicit reconnect"
                );
                tokio::select! {
                    _ = wake.notified() => {}
                    _ = stop.changed() => break,
                }
            }
        }
    }
    debug!("live channel driver stopped");
}

async fn session<S>(
    ws: tokio_tungstenite::WebSocketStream<S>,
    config: &ChannelConfig,
    core: &Mutex<ChannelCore>,
    wake: &Notify,
    stop: &mut watch::Receiver<bool>,
) -> SessionEnd
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut ws_write, mut ws_read) = ws.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

    // A reconnect requested while connecting is satisfied by this socket.
    let _ = wake.notified().now_or_never();

    let listeners = lock(core).on_open(out_tx);
    info!(url = %config.ws_url, "live channel open");
    notify(listeners, true);

    let period = config.heartbeat_interval;
    let mut heartbeat = interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            msg = ws_read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let routed = lock(core).handle_message(&text);
                    if let Some((handler, payload)) = routed {
                        handler(payload);
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "server closed websocket");
                    return SessionEnd::Closed;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(%e, "websocket read error");
                    return SessionEnd::Closed;
                }
                None => return SessionEnd::Closed,
            },
            Some(frame) = out_rx.recv() => {
                if let Err(e) = ws_write.send(Message::Text(frame)).await {
                    warn!(%e, "websocket write error");
                    return SessionEnd::Closed;
                }
            }
            _ = heartbeat.tick() => lock(core).heartbeat(),
            _ = stop.changed() => {
                let _ = ws_write.send(Message::Close(None)).await;
                return SessionEnd::Stopped;
            }
            _ = wake.notified() => {
                let _ = ws_write.send(Message::Close(None)).await;
                return SessionEnd::Reconnect;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, Handler) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        (
            hits,
            Arc::new(move |_: Value| {
                h.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(serde_json::from_str(&frame).unwrap());
        }
        out
    }

    fn open(core: &mut ChannelCore) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        core.on_open(tx);
        rx
    }

    fn confirm(core: &mut ChannelCore, request_id: u64, server_id: u64) {
        let frame = json!({ "jsonrpc": "2.0", "id": request_id, "result": server_id });
        assert!(core.handle_message(&frame.to_string()).is_none());
    }

    fn notification(server_id: u64) -> String {
        json!({
            "jsonrpc": "2.0",
            "method": "accountNotification",
            "params": { "subscription": server_id, "result": { "value": null } }
        })
        .to_string()
    }

    #[test]
    fn queued_subscriptions_are_sent_once_on_open() {
        let mut core = ChannelCore::new();
        let (_, h) = counter();
        core.subscribe("a", "accountSubscribe", json!(["A"]), h.clone());
        core.subscribe("b", "programSubscribe", json!(["B"]), h);

        let mut rx = open(&mut core);
        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0]["method"], "accountSubscribe");
        assert_eq!(sent[1]["method"], "programSubscribe");
        assert_eq!(sent[0]["jsonrpc"], "2.0");
        assert!(sent[0]["id"].as_u64() < sent[1]["id"].as_u64());
    }

    #[test]
    fn notification_routes_to_owner_only() {
        let mut core = ChannelCore::new();
        let mut rx = open(&mut core);
        let (hits_a, ha) = counter();
        let (hits_b, hb) = counter();
        core.subscribe("a", "accountSubscribe", json!([]), ha);
        core.subscribe("b", "accountSubscribe", json!([]), hb);
        let ids: Vec<u64> = drain(&mut rx).iter().map(|f| f["id"].as_u64().unwrap()).collect();
        confirm(&mut core, ids[0], 100);
        confirm(&mut core, ids[1], 200);
        assert_eq!(core.server_id("a"), Some(100));

        let (handler, payload) = core.handle_message(&notification(200)).unwrap();
        handler(payload);
        assert_eq!(hits_a.load(Ordering::SeqCst), 0);
        assert_eq!(hits_b.load(Ordering::SeqCst), 1);

        assert!(core.handle_message(&notification(999)).is_none());
        assert!(core.handle_message("not json").is_none());
    }

    #[test]
    fn unsubscribe_sends_pair_only_when_open_with_server_id() {
        let mut core = ChannelCore::new();
        let mut rx = open(&mut core);
        let (_, h) = counter();
        core.subscribe("a", "programSubscribe", json!([]), h.clone());
        let id = drain(&mut rx)[0]["id"].as_u64().unwrap();

        // No server id yet: local removal only.
        assert!(core.unsubscribe("a"));
        assert!(drain(&mut rx).is_empty());

        core.subscribe("a", "programSubscribe", json!([]), h);
        let id2 = drain(&mut rx)[0]["id"].as_u64().unwrap();
        confirm(&mut core, id, 1); // stale response for the removed request
        assert_eq!(core.server_id("a"), None);
        confirm(&mut core, id2, 7);
        assert!(core.unsubscribe("a"));
        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["method"], "programUnsubscribe");
        assert_eq!(sent[0]["params"], json!([7]));
        assert!(!core.unsubscribe("a"));
    }

    #[test]
    fn unsubscribe_after_close_is_local() {
        let mut core = ChannelCore::new();
        let mut rx = open(&mut core);
        let (_, h) = counter();
        core.subscribe("a", "accountSubscribe", json!([]), h);
        let id = drain(&mut rx)[0]["id"].as_u64().unwrap();
        confirm(&mut core, id, 5);
        core.on_close();
        assert!(core.unsubscribe("a"));
        assert!(drain(&mut rx).is_empty());
        assert!(!core.has_subscription("a"));
    }

    #[test]
    fn reopen_resubscribes_and_forgets_old_ids() {
        let mut core = ChannelCore::new();
        let mut rx = open(&mut core);
        let (_, h) = counter();
        core.subscribe("a", "accountSubscribe", json!([]), h);
        let id = drain(&mut rx)[0]["id"].as_u64().unwrap();
        confirm(&mut core, id, 5);
        core.on_close();
        assert_eq!(core.server_id("a"), None);

        let mut rx = open(&mut core);
        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["method"], "accountSubscribe");
        assert!(core.handle_message(&notification(5)).is_none());
    }

    #[test]
    fn reconnect_attempts_cap_then_offline() {
        let mut core = ChannelCore::new();
        assert_eq!(core.next_reconnect(3), Some(1));
        assert_eq!(core.state(), ChannelState::Reconnecting { attempt: 1 });
        assert_eq!(core.next_reconnect(3), Some(2));
        assert_eq!(core.next_reconnect(3), Some(3));
        assert_eq!(core.next_reconnect(3), None);
        assert_eq!(core.state(), ChannelState::Offline);
        core.reset_attempts();
        assert_eq!(core.next_reconnect(3), Some(1));
    }

    #[test]
    fn status_listeners_fire_on_transitions_only() {
        let mut core = ChannelCore::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let id = core.add_listener(Arc::new(move |up: bool| s.lock().unwrap().push(up)));

        notify(core.on_close(), false); // never opened
        let _rx = open(&mut core);
        notify(core.listeners(), true);
        notify(core.on_close(), false);
        assert_eq!(*seen.lock().unwrap(), vec![true, false]);

        assert!(core.remove_listener(id));
        let _rx = open(&mut core);
        notify(core.on_close(), false);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn heartbeat_only_while_open() {
        let mut core = ChannelCore::new();
        core.heartbeat();
        let mut rx = open(&mut core);
        core.heartbeat();
        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["method"], "ping");
    }

    #[test]
    fn unsubscribe_method_names() {
        assert_eq!(unsubscribe_method("accountSubscribe"), "accountUnsubscribe");
        assert_eq!(unsubscribe_method("programSubscribe"), "programUnsubscribe");
    }
}
