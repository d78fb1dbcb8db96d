use crate::error::ChannelError;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use jc_core::channel_wire::{decode_frame, encode_frame, normalize_namespace, ChannelFrame};
use jc_core::config::ChannelConfig;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

const OUTBOUND_QUEUE: usize = 256;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Connecting,
    Connected,
    Disconnected,
}

impl ChannelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelStatus::Connecting => "connecting",
            ChannelStatus::Connected => "connected",
            ChannelStatus::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Most recent frame accepted on this connection's namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMessage {
    pub event: String,
    pub data: Value,
    pub received_at: DateTime<Utc>,
}

struct Binding {
    token: u64,
    callback: Callback,
}

struct Driver {
    task: JoinHandle<()>,
    outbound: mpsc::Sender<String>,
}

struct Shared {
    namespace: String,
    endpoint: Url,
    config: ChannelConfig,
    runtime: Handle,
    bindings: Mutex<HashMap<String, Binding>>,
    status: watch::Sender<ChannelStatus>,
    driver: Mutex<Option<Driver>>,
    last_message: Mutex<Option<ChannelMessage>>,
    next_token: AtomicU64,
    given_up: AtomicBool,
    closed: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn set_status(&self, next: ChannelStatus) {
        self.status.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn dispatch(&self, text: &str) {
        if self.is_closed() {
            return;
        }
        let frame = match decode_frame(text, self.config.max_frame_bytes) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(event = "channel_frame_error", namespace = %self.namespace, error = %err);
                return;
            }
        };
        if !frame.belongs_to(&self.namespace) {
            debug!(
                event = "channel_foreign_frame",
                namespace = %self.namespace,
                name = %frame.event,
                tagged = ?frame.namespace
            );
            return;
        }

        *lock(&self.last_message) = Some(ChannelMessage {
            event: frame.event.clone(),
            data: frame.data.clone(),
            received_at: Utc::now(),
        });

        // Invoked without the registry lock so callbacks may (un)subscribe.
        let callback = lock(&self.bindings)
            .get(&frame.event)
            .map(|binding| binding.callback.clone());
        match callback {
            Some(callback) => callback(&frame.data),
            None => debug!(
                event = "channel_unhandled_event",
                namespace = %self.namespace,
                name = %frame.event
            ),
        }
    }
}

/// One namespace-scoped push connection. The event registry belongs to the client,
/// so bindings carry over every reconnect. Dropping the client closes it.
pub struct ChannelClient {
    shared: Arc<Shared>,
}

impl ChannelClient {
    /// Builds an idle client; nothing is dialed until [`ChannelClient::start`].
    pub fn new(config: &ChannelConfig, namespace: &str) -> Result<Self, ChannelError> {
        let runtime = Handle::try_current().map_err(|_| ChannelError::NoRuntime)?;
        let namespace = normalize_namespace(namespace);
        let endpoint = config.endpoint(&namespace)?;
        let (status, _) = watch::channel(ChannelStatus::Disconnected);
        Ok(Self {
            shared: Arc::new(Shared {
                namespace,
                endpoint,
                config: config.clone(),
                runtime,
                bindings: Mutex::new(HashMap::new()),
                status,
                driver: Mutex::new(None),
                last_message: Mutex::new(None),
                next_token: AtomicU64::new(1),
                given_up: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn connect(config: &ChannelConfig, namespace: &str) -> Result<Self, ChannelError> {
        let client = Self::new(config, namespace)?;
        client.start();
        Ok(client)
    }

    /// Launches the connection task. Returns false when the client is closed or
    /// a connection task is still working.
    pub fn start(&self) -> bool {
        if self.shared.is_closed() {
            return false;
        }
        let mut driver = lock(&self.shared.driver);
        if let Some(active) = driver.take() {
            if !active.task.is_finished() && !self.has_given_up() {
                *driver = Some(active);
                return false;
            }
            active.task.abort();
        }
        self.shared.given_up.store(false, Ordering::SeqCst);
        self.shared.set_status(ChannelStatus::Connecting);

        let (outbound, queue) = mpsc::channel(OUTBOUND_QUEUE);
        let task = self.shared.runtime.spawn(drive(self.shared.clone(), queue));
        *driver = Some(Driver { task, outbound });
        true
    }

    /// Manual restart after give-up. Bindings registered before are kept.
    pub fn reconnect(&self) -> bool {
        let started = self.start();
        if started {
            info!(event = "channel_manual_reconnect", namespace = %self.shared.namespace);
        }
        started
    }

    pub fn namespace(&self) -> &str {
        &self.shared.namespace
    }

    pub fn endpoint(&self) -> &Url {
        &self.shared.endpoint
    }

    pub fn status(&self) -> ChannelStatus {
        *self.shared.status.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ChannelStatus::Connected
    }

    pub fn status_watch(&self) -> watch::Receiver<ChannelStatus> {
        self.shared.status.subscribe()
    }

    pub fn has_given_up(&self) -> bool {
        self.shared.given_up.load(Ordering::SeqCst)
    }

    pub fn last_message(&self) -> Option<ChannelMessage> {
        lock(&self.shared.last_message).clone()
    }

    /// Binds `callback` to `event`, replacing any earlier binding for that name.
    pub fn subscribe<F>(&self, event: &str, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let token = self.shared.next_token.fetch_add(1, Ordering::SeqCst);
        if !self.shared.is_closed() {
            let replaced = lock(&self.shared.bindings)
                .insert(
                    event.to_string(),
                    Binding {
                        token,
                        callback: Arc::new(callback),
                    },
                )
                .is_some();
            debug!(
                event = "channel_subscribe",
                namespace = %self.shared.namespace,
                name = event,
                replaced
            );
        }
        Subscription {
            shared: Arc::downgrade(&self.shared),
            event: event.to_string(),
            token,
            released: false,
        }
    }

    pub fn unsubscribe(&self, event: &str) {
        lock(&self.shared.bindings).remove(event);
    }

    /// Sends only while connected. Anything else is dropped, never queued.
    pub fn emit(&self, event: &str, payload: Value) -> bool {
        if !self.is_connected() {
            debug!(
                event = "channel_emit_dropped",
                namespace = %self.shared.namespace,
                name = event,
                reason = "disconnected"
            );
            return false;
        }
        let frame = ChannelFrame::new(event, payload);
        let text = match encode_frame(&frame, self.shared.config.max_frame_bytes) {
            Ok(text) => text,
            Err(err) => {
                warn!(event = "channel_emit_encode_error", namespace = %self.shared.namespace, error = %err);
                return false;
            }
        };
        let driver = lock(&self.shared.driver);
        let Some(active) = driver.as_ref() else {
            return false;
        };
        match active.outbound.try_send(text) {
            Ok(()) => true,
            Err(err) => {
                debug!(
                    event = "channel_emit_dropped",
                    namespace = %self.shared.namespace,
                    name = event,
                    reason = %err
                );
                false
            }
        }
    }

    /// Releases every binding and stops the connection task. Idempotent.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        lock(&self.shared.bindings).clear();
        if let Some(driver) = lock(&self.shared.driver).take() {
            driver.task.abort();
        }
        self.shared.set_status(ChannelStatus::Disconnected);
        info!(event = "channel_closed", namespace = %self.shared.namespace);
    }
}

impl Drop for ChannelClient {
    fn drop(&mut self) {
        self.close();
    }
}

/// Handle for one binding. Dropping or disposing it removes the binding, unless a
/// later `subscribe` for the same event already replaced it.
#[must_use = "dropping a Subscription releases its callback"]
pub struct Subscription {
    shared: Weak<Shared>,
    event: String,
    token: u64,
    released: bool,
}

impl Subscription {
    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn is_active(&self) -> bool {
        if self.released {
            return false;
        }
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        let bindings = lock(&shared.bindings);
        bindings
            .get(&self.event)
            .is_some_and(|binding| binding.token == self.token)
    }

    pub fn dispose(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let mut bindings = lock(&shared.bindings);
        if bindings
            .get(&self.event)
            .is_some_and(|binding| binding.token == self.token)
        {
            bindings.remove(&self.event);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

async fn drive(shared: Arc<Shared>, mut outbound: mpsc::Receiver<String>) {
    let policy = shared.config.reconnect;
    let mut failures: u32 = 0;
    loop {
        shared.set_status(ChannelStatus::Connecting);
        debug!(
            event = "channel_connecting",
            namespace = %shared.namespace,
            endpoint = %shared.endpoint,
            attempt = failures + 1
        );
        let attempt = tokio::time::timeout(policy.connect_timeout, connect_async(shared.endpoint.as_str())).await;
        let connected = match attempt {
            Ok(Ok((socket, _))) => Ok(socket),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_) => Err(format!(
                "handshake timed out after {}ms",
                policy.connect_timeout.as_millis()
            )),
        };
        match connected {
            Ok(socket) => {
                failures = 0;
                shared.set_status(ChannelStatus::Connected);
                info!(event = "channel_connected", namespace = %shared.namespace, endpoint = %shared.endpoint);

                let reason = pump(&shared, socket, &mut outbound).await;
                // emits aimed at the dead socket are not replayed on the next one
                while outbound.try_recv().is_ok() {}
                shared.set_status(ChannelStatus::Disconnected);
                if shared.is_closed() {
                    return;
                }
                info!(event = "channel_disconnected", namespace = %shared.namespace, reason);
            }
            Err(error) => {
                failures += 1;
                shared.set_status(ChannelStatus::Disconnected);
                warn!(
                    event = "channel_connect_error",
                    namespace = %shared.namespace,
                    error = %error,
                    attempt = failures,
                    max_attempts = policy.max_attempts
                );
                if failures >= policy.max_attempts {
                    shared.given_up.store(true, Ordering::SeqCst);
                    warn!(event = "channel_give_up", namespace = %shared.namespace, attempts = failures);
                    return;
                }
            }
        }
        tokio::time::sleep(policy.delay).await;
    }
}

async fn pump(shared: &Shared, socket: Socket, outbound: &mut mpsc::Receiver<String>) -> &'static str {
    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => shared.dispatch(&text),
                Some(Ok(Message::Close(_))) | None => return "closed_by_server",
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(event = "channel_read_error", namespace = %shared.namespace, error = %err);
                    return "read_error";
                }
            },
            Some(text) = outbound.recv() => {
                if let Err(err) = sink.send(Message::Text(text)).await {
                    warn!(event = "channel_write_error", namespace = %shared.namespace, error = %err);
                    return "write_error";
                }
            }
        }
    }
}
