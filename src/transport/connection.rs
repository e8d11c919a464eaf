use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::{connect_via_proxy, ensure_crypto_provider};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::stream::codec::{decode, encode, Record};
use crate::util::preview_for_log;

type HubStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type HubSink = SplitSink<HubStream, Message>;
type HubSource = SplitStream<HubStream>;

const HANDSHAKE_FRAME: &str = "{\"protocol\":\"json\",\"version\":1}\u{1e}";
const KEEPALIVE_FRAME: &str = "{\"type\":6}\u{1e}";
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Handshaking,
    Ready,
    Closed,
}

/// Where and how to reach the hub.
#[derive(Debug, Clone)]
pub struct HubOptions {
    pub url: url::Url,
    pub proxy: Option<url::Url>,
    pub keepalive_interval: Duration,
    pub connect_timeout: Duration,
    pub debug: bool,
}

impl HubOptions {
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] when the hub or proxy URL is invalid.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        let url = url::Url::parse(&config.service.hub_url)
            .map_err(|err| ClientError::Config(format!("Invalid service.hub_url: {err}")))?;
        let proxy = config
            .service
            .proxy
            .as_deref()
            .map(url::Url::parse)
            .transpose()
            .map_err(|err| ClientError::Config(format!("Invalid service.proxy: {err}")))?;
        Ok(Self {
            url,
            proxy,
            keepalive_interval: config.exchange.keepalive_interval(),
            connect_timeout: config.exchange.connect_timeout(),
            debug: config.features.debug,
        })
    }
}

/// One duplex hub connection, exclusive to a single exchange.
///
/// [`HubConnection::open`] returns only once the handshake is acknowledged.
/// From then on a writer task owns the socket's send half and emits the
/// keep-alive frame on a fixed interval, and a reader task decodes incoming
/// messages into [`Record`]s. Both tasks stop when the connection's
/// cancellation token fires: on [`HubConnection::close`], on drop, or when
/// the transport ends.
pub struct HubConnection {
    state: Arc<Mutex<ConnectionState>>,
    outgoing: mpsc::UnboundedSender<Message>,
    incoming: mpsc::UnboundedReceiver<Record>,
    shutdown: CancellationToken,
    keepalive_running: Arc<AtomicBool>,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    debug: bool,
}

impl HubConnection {
    /// Connect, perform the handshake and start the keep-alive.
    ///
    /// Records received before the acknowledgement are logged and dropped;
    /// records that arrive in the same message after it are kept.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] when the connection cannot be
    /// established or the hub goes away before acknowledging the handshake.
    pub async fn open(options: &HubOptions) -> Result<Self, ClientError> {
        let state = Arc::new(Mutex::new(ConnectionState::Connecting));
        let stream = tokio::time::timeout(options.connect_timeout, connect(options))
            .await
            .map_err(|_| {
                ClientError::Transport(format!("Timed out connecting to {}", options.url))
            })??;
        let (mut sink, mut source) = stream.split();

        tracing::debug!("performing handshake");
        sink.send(Message::Text(HANDSHAKE_FRAME.to_string())).await?;
        *state.lock() = ConnectionState::Handshaking;

        let pending = await_handshake(&mut source, options.debug).await?;
        *state.lock() = ConnectionState::Ready;
        tracing::debug!("handshake established");

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        for record in pending {
            let _ = incoming_tx.send(record);
        }

        let shutdown = CancellationToken::new();
        let keepalive_running = Arc::new(AtomicBool::new(true));
        let writer = tokio::spawn(run_writer(
            sink,
            outgoing_rx,
            shutdown.clone(),
            options.keepalive_interval,
            Arc::clone(&keepalive_running),
        ));
        let reader = tokio::spawn(run_reader(
            source,
            incoming_tx,
            shutdown.clone(),
            Arc::clone(&state),
            options.debug,
        ));

        Ok(Self {
            state,
            outgoing: outgoing_tx,
            incoming: incoming_rx,
            shutdown,
            keepalive_running,
            tasks: tokio::sync::Mutex::new(vec![writer, reader]),
            debug: options.debug,
        })
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    #[must_use]
    pub fn keepalive_running(&self) -> bool {
        self.keepalive_running.load(Ordering::Acquire)
    }

    /// Queue one record for sending.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Internal`] when the connection is not `Ready`
    /// and [`ClientError::Transport`] when the writer has already stopped.
    pub fn send<T: Serialize + ?Sized>(&self, record: &T) -> Result<(), ClientError> {
        let state = self.state();
        if state != ConnectionState::Ready {
            return Err(ClientError::Internal(format!(
                "send on a connection in state {state:?}"
            )));
        }
        let frame = encode(record)?;
        if self.debug {
            tracing::debug!(frame = preview_for_log(&frame), "sending frame");
        }
        self.outgoing
            .send(Message::Text(frame))
            .map_err(|_| ClientError::Transport("Hub connection closed".to_string()))
    }

    /// Next decoded record, or `None` once the transport has ended.
    pub async fn next_record(&mut self) -> Option<Record> {
        self.incoming.recv().await
    }

    /// Stop the keep-alive, close the socket and wait for both tasks.
    ///
    /// Safe to call more than once and from several places. Every caller
    /// returns only after the tasks have finished.
    pub async fn close(&self) {
        self.shutdown.cancel();
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            if let Err(err) = task.await {
                tracing::warn!("hub connection task failed: {err}");
            }
        }
        *self.state.lock() = ConnectionState::Closed;
    }
}

impl Drop for HubConnection {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn connect(options: &HubOptions) -> Result<HubStream, ClientError> {
    ensure_crypto_provider();
    let request = options.url.as_str().into_client_request()?;
    let (stream, response) = match &options.proxy {
        Some(proxy) => {
            let tunnel = connect_via_proxy(proxy, &options.url).await?;
            tokio_tungstenite::client_async_tls_with_config(request, tunnel, None, None).await?
        }
        None => tokio_tungstenite::connect_async(request).await?,
    };
    tracing::debug!(status = %response.status(), url = %options.url, "hub connected");
    Ok(stream)
}

fn message_text(message: &Message) -> Option<Cow<'_, str>> {
    match message {
        Message::Text(text) => Some(Cow::Borrowed(text.as_str())),
        Message::Binary(bytes) => Some(String::from_utf8_lossy(bytes)),
        _ => None,
    }
}

async fn await_handshake(source: &mut HubSource, debug: bool) -> Result<Vec<Record>, ClientError> {
    loop {
        let message = match source.next().await {
            Some(Ok(message)) => message,
            Some(Err(err)) => {
                tracing::warn!("hub transport error during handshake: {err}");
                return Err(err.into());
            }
            None => {
                return Err(ClientError::Transport(
                    "Hub closed before the handshake completed".to_string(),
                ))
            }
        };
        if let Message::Close(frame) = &message {
            return Err(ClientError::Transport(format!(
                "Hub closed during handshake: {frame:?}"
            )));
        }
        let Some(text) = message_text(&message) else {
            continue;
        };
        let mut records = decode(&text).into_iter();
        while let Some(record) = records.next() {
            if record.is_handshake_ack() {
                return Ok(records.collect());
            }
            if debug {
                tracing::debug!(?record, "record before handshake acknowledgement");
            }
        }
    }
}

async fn run_writer(
    mut sink: HubSink,
    mut outgoing: mpsc::UnboundedReceiver<Message>,
    shutdown: CancellationToken,
    keepalive_interval: Duration,
    keepalive_running: Arc<AtomicBool>,
) {
    let mut keepalive = tokio::time::interval_at(
        tokio::time::Instant::now() + keepalive_interval,
        keepalive_interval,
    );
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            message = outgoing.recv() => {
                let Some(message) = message else { break };
                if let Err(err) = sink.send(message).await {
                    tracing::warn!("hub send failed: {err}");
                    break;
                }
            }
            _ = keepalive.tick() => {
                if let Err(err) = sink.send(Message::Text(KEEPALIVE_FRAME.to_string())).await {
                    tracing::warn!("hub keep-alive failed: {err}");
                    break;
                }
            }
        }
    }

    keepalive_running.store(false, Ordering::Release);
    shutdown.cancel();
    if tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await.is_err() {
        tracing::debug!("hub close frame not flushed in time");
    }
}

async fn run_reader(
    mut source: HubSource,
    incoming: mpsc::UnboundedSender<Record>,
    shutdown: CancellationToken,
    state: Arc<Mutex<ConnectionState>>,
    debug: bool,
) {
    'read: loop {
        let next = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            next = source.next() => next,
        };
        match next {
            Some(Ok(Message::Close(frame))) => {
                tracing::debug!(?frame, "disconnected");
                break;
            }
            Some(Ok(message)) => {
                let Some(text) = message_text(&message) else {
                    continue;
                };
                if debug {
                    tracing::debug!(frame = preview_for_log(&text), "hub frame");
                }
                for record in decode(&text) {
                    if incoming.send(record).is_err() {
                        break 'read;
                    }
                }
            }
            Some(Err(err)) => {
                tracing::warn!("hub transport error: {err}");
                break;
            }
            None => {
                tracing::debug!("disconnected");
                break;
            }
        }
    }
    *state.lock() = ConnectionState::Closed;
    shutdown.cancel();
}
