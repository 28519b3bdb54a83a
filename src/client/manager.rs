//! Subscriber connection manager
//!
//! Keeps one subscriber channel open to the relay. When the channel closes
//! or a connection attempt fails, the manager waits a fixed delay and opens
//! a fresh channel through its [`Connector`]. Only one attempt is ever in
//! flight.
//!
//! Inbound `reset_ack` messages are routed to
//! [`SubscriberEvents::on_reset_ack`] and never reach `on_message`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::transport::{Channel, Connector, WsConnector, DEFAULT_CONNECT_TIMEOUT};
use crate::protocol::{parse_text, ControlMessage, Envelope, Message};

/// How long a closing channel gets to flush on shutdown
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Connectivity of a [`SubscriberClient`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
        }
    }
}

/// Subscriber client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Relay WebSocket endpoint
    #[serde(default = "default_url")]
    pub url: String,
    /// Fixed delay before each reconnect attempt
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Bound on each connect attempt, handshake included
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_url() -> String {
    "ws://127.0.0.1:3000/ws".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    3000
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT.as_millis() as u64
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Application callbacks
///
/// Called from the connection task; implementations should hand work off
/// rather than block.
pub trait SubscriberEvents: Send + Sync + 'static {
    /// An ordinary message arrived
    fn on_message(&self, message: Message);

    /// The relay acknowledged a reset
    fn on_reset_ack(&self) {}

    /// Connectivity changed
    fn on_state_change(&self, _state: ConnectionState) {}
}

struct Shared {
    state: watch::Sender<ConnectionState>,
    /// Present only while connected
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl Shared {
    fn set_state(&self, events: &dyn SubscriberEvents, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "Subscriber state changed");
            events.on_state_change(state);
        }
    }

    fn set_outbound(&self, sender: Option<mpsc::UnboundedSender<String>>) {
        *self.outbound.lock().unwrap_or_else(PoisonError::into_inner) = sender;
    }
}

/// Client half of the relay's subscriber channel
pub struct SubscriberClient {
    shared: Arc<Shared>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl fmt::Debug for SubscriberClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberClient")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SubscriberClient {
    /// Start the connection task
    ///
    /// Must be called inside a Tokio runtime. The first attempt starts
    /// immediately.
    pub fn spawn<C: Connector>(
        connector: C,
        events: Arc<dyn SubscriberEvents>,
        config: ClientConfig,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let shared = Arc::new(Shared {
            state,
            outbound: Mutex::new(None),
        });
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(run_connection_loop(
            connector,
            events,
            Arc::clone(&shared),
            config.reconnect_delay(),
            shutdown_rx,
        ));

        Self {
            shared,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }

    /// Connect to `config.url` over WebSocket
    pub fn connect_ws(config: ClientConfig, events: Arc<dyn SubscriberEvents>) -> Self {
        let connector =
            WsConnector::new(config.url.clone()).with_connect_timeout(config.connect_timeout());
        Self::spawn(connector, events, config)
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Receiver that observes every state change
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Serialize and send a payload
    ///
    /// Returns false without sending when the channel is not open.
    pub fn send<T: Serialize + ?Sized>(&self, payload: &T) -> bool {
        if !self.is_connected() {
            tracing::debug!("Not connected, dropping outbound payload");
            return false;
        }

        let text = match serde_json::to_string(payload) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize outbound payload");
                return false;
            }
        };

        let outbound = self
            .shared
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match outbound.as_ref() {
            Some(tx) => tx.send(text).is_ok(),
            None => false,
        }
    }

    /// Ask the relay to reset application state
    pub fn send_reset(&self) -> bool {
        self.send(&ControlMessage::Reset)
    }

    /// Close the channel and wait for the connection task to exit
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Subscriber task ended abnormally");
            }
        }
    }
}

impl Drop for SubscriberClient {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Connect, run, and reconnect until shutdown
async fn run_connection_loop<C: Connector>(
    connector: C,
    events: Arc<dyn SubscriberEvents>,
    shared: Arc<Shared>,
    reconnect_delay: Duration,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        shared.set_state(&*events, ConnectionState::Connecting);

        let attempt = tokio::select! {
            result = connector.connect() => result,
            _ = &mut shutdown_rx => break,
        };

        match attempt {
            Ok(channel) => {
                let (tx, rx) = mpsc::unbounded_channel();
                shared.set_outbound(Some(tx));
                shared.set_state(&*events, ConnectionState::Connected);
                tracing::info!("Subscriber connected");

                let shutdown_requested =
                    run_message_loop(channel, rx, &*events, &mut shutdown_rx).await;
                shared.set_outbound(None);

                if shutdown_requested {
                    break;
                }
                tracing::warn!(
                    retry_in_ms = reconnect_delay.as_millis() as u64,
                    "Subscriber channel closed"
                );
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    retry_in_ms = reconnect_delay.as_millis() as u64,
                    "Subscriber connect failed"
                );
            }
        }

        shared.set_state(&*events, ConnectionState::Disconnected);

        tokio::select! {
            _ = tokio::time::sleep(reconnect_delay) => {}
            _ = &mut shutdown_rx => break,
        }
    }

    shared.set_outbound(None);
    shared.set_state(&*events, ConnectionState::Disconnected);
    tracing::info!("Subscriber stopped");
}

/// Pump one open channel
///
/// Returns true if it exited because shutdown was requested.
async fn run_message_loop(
    channel: Channel,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: &dyn SubscriberEvents,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> bool {
    let Channel {
        mut writer,
        mut reader,
    } = channel;

    let shutdown_requested = loop {
        tokio::select! {
            Some(text) = outbound.recv() => {
                if let Err(e) = writer.send_text(text).await {
                    tracing::warn!(error = %e, "Subscriber send failed");
                    break false;
                }
            }
            incoming = reader.recv() => match incoming {
                Some(Ok(text)) => dispatch_incoming(events, &text),
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Subscriber receive failed");
                    break false;
                }
                None => break false,
            },
            _ = &mut *shutdown_rx => break true,
        }
    };

    if shutdown_requested {
        drop(reader);
        match tokio::time::timeout(CLOSE_TIMEOUT, writer.close()).await {
            Ok(Err(e)) => tracing::debug!(error = %e, "Error closing subscriber channel"),
            Err(_) => tracing::debug!("Timed out closing subscriber channel"),
            Ok(Ok(())) => {}
        }
    }

    shutdown_requested
}

fn dispatch_incoming(events: &dyn SubscriberEvents, text: &str) {
    match parse_text(text) {
        Ok(Envelope::Control(ControlMessage::ResetAck)) => events.on_reset_ack(),
        Ok(Envelope::Control(ControlMessage::Reset)) => {
            tracing::debug!("Ignoring reset request sent to a subscriber");
        }
        Ok(Envelope::Message(message)) => events.on_message(message),
        Err(e) => tracing::warn!(error = %e, "Dropping invalid payload from relay"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::transport::{ChannelReader, ChannelWriter};
    use crate::protocol::{RelayError, RelayResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Relay side of an in-memory channel
    struct ServerEnd {
        to_client: mpsc::UnboundedSender<String>,
        from_client: mpsc::UnboundedReceiver<String>,
    }

    struct MemoryWriter(mpsc::UnboundedSender<String>);

    #[async_trait]
    impl ChannelWriter for MemoryWriter {
        async fn send_text(&mut self, text: String) -> RelayResult<()> {
            self.0
                .send(text)
                .map_err(|_| RelayError::Transport("peer gone".to_string()))
        }

        async fn close(&mut self) -> RelayResult<()> {
            Ok(())
        }
    }

    struct MemoryReader(mpsc::UnboundedReceiver<String>);

    #[async_trait]
    impl ChannelReader for MemoryReader {
        async fn recv(&mut self) -> Option<RelayResult<String>> {
            self.0.recv().await.map(Ok)
        }
    }

    struct MemoryConnector {
        attempts: Arc<AtomicUsize>,
        refuse: Arc<AtomicBool>,
        servers: mpsc::UnboundedSender<ServerEnd>,
    }

    #[async_trait]
    impl Connector for MemoryConnector {
        async fn connect(&self) -> RelayResult<Channel> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.refuse.load(Ordering::SeqCst) {
                return Err(RelayError::Transport("connection refused".to_string()));
            }

            let (to_server, from_client) = mpsc::unbounded_channel();
            let (to_client, from_server) = mpsc::unbounded_channel();
            let _ = self.servers.send(ServerEnd {
                to_client,
                from_client,
            });
            Ok(Channel::new(MemoryWriter(to_server), MemoryReader(from_server)))
        }
    }

    struct Harness {
        attempts: Arc<AtomicUsize>,
        refuse: Arc<AtomicBool>,
        servers: mpsc::UnboundedReceiver<ServerEnd>,
        events: mpsc::UnboundedReceiver<Event>,
        client: SubscriberClient,
    }

    #[derive(Debug, PartialEq)]
    enum Event {
        Message(Message),
        ResetAck,
        State(ConnectionState),
    }

    struct Recorder(mpsc::UnboundedSender<Event>);

    impl SubscriberEvents for Recorder {
        fn on_message(&self, message: Message) {
            let _ = self.0.send(Event::Message(message));
        }

        fn on_reset_ack(&self) {
            let _ = self.0.send(Event::ResetAck);
        }

        fn on_state_change(&self, state: ConnectionState) {
            let _ = self.0.send(Event::State(state));
        }
    }

    fn start(refuse: bool) -> Harness {
        let attempts = Arc::new(AtomicUsize::new(0));
        let refuse = Arc::new(AtomicBool::new(refuse));
        let (servers_tx, servers) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();

        let connector = MemoryConnector {
            attempts: Arc::clone(&attempts),
            refuse: Arc::clone(&refuse),
            servers: servers_tx,
        };
        let client = SubscriberClient::spawn(
            connector,
            Arc::new(Recorder(events_tx)),
            ClientConfig::new("memory://relay"),
        );

        Harness {
            attempts,
            refuse,
            servers,
            events,
            client,
        }
    }

    async fn wait_for_state(rx: &mut watch::Receiver<ConnectionState>, want: ConnectionState) {
        tokio::time::timeout(Duration::from_secs(60), async {
            loop {
                if *rx.borrow_and_update() == want {
                    return;
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
    }

    /// Next application event, skipping state changes
    async fn next_payload_event(events: &mut mpsc::UnboundedReceiver<Event>) -> Event {
        loop {
            match events.recv().await.unwrap() {
                Event::State(_) => continue,
                other => return other,
            }
        }
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.reconnect_delay(), Duration::from_millis(3000));
        assert_eq!(config.url, "ws://127.0.0.1:3000/ws");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_once_after_delay() {
        let mut h = start(false);
        let mut state = h.client.watch_state();

        let server = h.servers.recv().await.unwrap();
        wait_for_state(&mut state, ConnectionState::Connected).await;
        assert_eq!(h.attempts.load(Ordering::SeqCst), 1);

        // Relay closes the channel
        drop(server);
        wait_for_state(&mut state, ConnectionState::Disconnected).await;
        assert!(!h.client.is_connected());

        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert_eq!(h.attempts.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let _server = h.servers.recv().await.unwrap();
        wait_for_state(&mut state, ConnectionState::Connected).await;
        assert_eq!(h.attempts.load(Ordering::SeqCst), 2);

        // No further attempts while the new channel stays open
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.attempts.load(Ordering::SeqCst), 2);

        h.client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connect_retries_after_delay() {
        let mut h = start(true);
        let mut state = h.client.watch_state();

        assert_eq!(
            h.events.recv().await.unwrap(),
            Event::State(ConnectionState::Connecting)
        );
        assert_eq!(
            h.events.recv().await.unwrap(),
            Event::State(ConnectionState::Disconnected)
        );
        assert_eq!(h.attempts.load(Ordering::SeqCst), 1);

        h.refuse.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(3100)).await;
        wait_for_state(&mut state, ConnectionState::Connected).await;
        assert_eq!(h.attempts.load(Ordering::SeqCst), 2);
        assert!(h.servers.recv().await.is_some());

        h.client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_is_noop_while_disconnected() {
        let h = start(true);

        assert!(!h.client.send(&Message::new("hello")));
        assert!(!h.client.send_reset());

        h.client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_reaches_relay() {
        let mut h = start(false);
        let mut state = h.client.watch_state();
        let mut server = h.servers.recv().await.unwrap();
        wait_for_state(&mut state, ConnectionState::Connected).await;

        assert!(h.client.send_reset());
        assert!(h.client.send(&Message::new("up").with_audio("u.mp3")));

        assert_eq!(server.from_client.recv().await.unwrap(), r#"{"type":"reset"}"#);
        assert_eq!(
            server.from_client.recv().await.unwrap(),
            r#"{"text":"up","audio":"u.mp3"}"#
        );

        h.client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_ack_is_not_an_ordinary_message() {
        let mut h = start(false);
        let server = h.servers.recv().await.unwrap();

        for text in [
            r#"{"text":"hi"}"#,
            r#"{"type":"reset_ack"}"#,
            "not json",
            r#"{"type":"reset"}"#,
            r#"{"text":"bye","audio":"b.mp3"}"#,
        ] {
            server.to_client.send(text.to_string()).unwrap();
        }

        assert_eq!(
            next_payload_event(&mut h.events).await,
            Event::Message(Message::new("hi"))
        );
        assert_eq!(next_payload_event(&mut h.events).await, Event::ResetAck);
        assert_eq!(
            next_payload_event(&mut h.events).await,
            Event::Message(Message::new("bye").with_audio("b.mp3"))
        );

        h.client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_changes_are_reported() {
        let mut h = start(false);
        let _server = h.servers.recv().await.unwrap();

        assert_eq!(
            h.events.recv().await.unwrap(),
            Event::State(ConnectionState::Connecting)
        );
        assert_eq!(
            h.events.recv().await.unwrap(),
            Event::State(ConnectionState::Connected)
        );

        h.client.shutdown().await;
        assert_eq!(
            h.events.recv().await.unwrap(),
            Event::State(ConnectionState::Disconnected)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_reconnecting() {
        let mut h = start(false);
        let state = h.client.watch_state();
        let mut server = h.servers.recv().await.unwrap();

        h.client.shutdown().await;
        assert_eq!(*state.borrow(), ConnectionState::Disconnected);

        // Writer is gone
        assert!(server.from_client.recv().await.is_none());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.attempts.load(Ordering::SeqCst), 1);
    }
}
