//! Live API transport
//!
//! The session only needs three things from the network: start connecting,
//! push an audio payload, hang up. Everything the server says comes back as
//! [`SessionEvent`]s on the session queue, tagged with the attempt's epoch.

use crate::config::Config;
use crate::events::{Epoch, EventSender, SessionEvent};
use crate::gemini::{
    decode_server_message, BidiGenerateContentSetup, ClientMessage, LiveEvent, RealtimeInput,
};
use crate::persona::Persona;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::fmt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Error type for Live API transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Setup not complete")]
    SetupNotComplete,

    #[error("Timeout waiting for setup")]
    Timeout,

    #[error("Channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// An open, set-up connection. Only exists after the open event fired.
pub trait LiveLink: Send + fmt::Debug {
    /// Queue a base64 PCM payload. Does not wait for the network.
    fn send_audio(&mut self, data: String) -> Result<()>;

    /// Hang up. Safe to call more than once.
    fn close(&mut self);
}

/// Starts connection attempts on behalf of the session.
pub trait Connector: Send {
    /// Begin connecting. The outcome arrives later as `Opened`,
    /// `TransportFailed` or `Closed` carrying `epoch`.
    fn connect(&self, epoch: Epoch, persona: &Persona, events: EventSender) -> ConnectTicket;
}

/// Handle on an in-flight connection attempt.
#[derive(Debug, Default)]
pub struct ConnectTicket {
    abort: Option<AbortHandle>,
}

impl ConnectTicket {
    pub fn new(abort: AbortHandle) -> Self {
        Self { abort: Some(abort) }
    }

    /// A ticket with nothing to cancel.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn cancel(self) {
        if let Some(abort) = self.abort {
            abort.abort();
        }
    }
}

/// Outbound frames for the writer task.
#[derive(Debug)]
enum WsCommand {
    Send(ClientMessage),
    Close,
}

/// Connector for the Gemini Live websocket endpoint.
#[derive(Debug, Clone)]
pub struct GeminiConnector {
    config: Config,
}

impl GeminiConnector {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl Connector for GeminiConnector {
    fn connect(&self, epoch: Epoch, persona: &Persona, events: EventSender) -> ConnectTicket {
        let config = self.config.clone();
        let setup = BidiGenerateContentSetup::for_persona(&config.model, persona);

        let task = tokio::spawn(async move {
            if let Err(e) = run_connection(epoch, config, setup, events.clone()).await {
                error!("Live connection failed: {}", e);
                let _ = events.send(SessionEvent::TransportFailed { epoch, error: e });
            }
        });
        ConnectTicket::new(task.abort_handle())
    }
}

/// Connect, set up, then hand the socket halves to the reader and writer tasks.
async fn run_connection(
    epoch: Epoch,
    config: Config,
    setup: BidiGenerateContentSetup,
    events: EventSender,
) -> Result<()> {
    info!("Connecting to Live API at {}", config.endpoint);
    let (ws, _resp) = connect_async(config.live_url()).await?;
    let (mut sink, mut stream) = ws.split();

    info!("Sending setup message with model: {}", setup.model);
    send_message(&mut sink, &ClientMessage::Setup(setup)).await?;

    tokio::time::timeout(config.setup_timeout, wait_for_setup_complete(&mut stream))
        .await
        .map_err(|_| TransportError::Timeout)??;
    info!("Live session setup complete");

    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_loop(epoch, sink, out_rx, events.clone()));

    // The reader may only forward frames once the session has seen `Opened`.
    let (go_tx, go_rx) = oneshot::channel::<()>();
    let reader_events = events.clone();
    let reader = tokio::spawn(async move {
        if go_rx.await.is_ok() {
            read_loop(epoch, stream, reader_events).await;
        }
    });

    let link = GeminiLink {
        out_tx,
        writer: Some(writer),
        reader: reader.abort_handle(),
    };
    if events.send(SessionEvent::Opened { epoch, link: Box::new(link) }).is_err() {
        return Err(TransportError::ChannelClosed);
    }
    let _ = go_tx.send(());
    Ok(())
}

async fn send_message(sink: &mut WsSink, msg: &ClientMessage) -> Result<()> {
    let json = serde_json::to_string(msg)?;
    sink.send(Message::text(json)).await?;
    Ok(())
}

/// Frame payload as text; the Live API sometimes sends JSON in binary frames.
fn frame_text(message: &Message) -> Option<&str> {
    match message {
        Message::Text(text) => Some(text.as_str()),
        Message::Binary(bytes) => std::str::from_utf8(bytes).ok(),
        _ => None,
    }
}

async fn wait_for_setup_complete(stream: &mut WsSource) -> Result<()> {
    while let Some(message) = stream.next().await {
        let message = message?;
        if let Message::Close(frame) = &message {
            info!("WebSocket closed during setup: {:?}", frame);
            return Err(TransportError::ConnectionClosed);
        }
        let Some(text) = frame_text(&message) else {
            continue;
        };
        if decode_server_message(text)?.contains(&LiveEvent::SetupComplete) {
            return Ok(());
        }
        debug!("Ignoring pre-setup frame: {}", text);
    }
    Err(TransportError::SetupNotComplete)
}

async fn read_loop(epoch: Epoch, mut stream: WsSource, events: EventSender) {
    info!("Inbound message task started");

    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                error!("WebSocket error: {:?}", e);
                let _ = events.send(SessionEvent::TransportFailed {
                    epoch,
                    error: TransportError::WebSocket(e),
                });
                return;
            }
        };

        if let Message::Close(frame) = &message {
            info!("WebSocket closed: {:?}", frame);
            let reason = frame.as_ref().map(|f| f.reason.as_str().to_string());
            let _ = events.send(SessionEvent::Closed { epoch, reason });
            return;
        }

        let Some(text) = frame_text(&message) else {
            continue;
        };
        let decoded = match decode_server_message(text) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Failed to parse server message: {:?}", e);
                continue;
            }
        };

        for event in decoded {
            let forwarded = match event {
                LiveEvent::Audio(pcm) => SessionEvent::OutputAudio { epoch, pcm },
                LiveEvent::Interrupted => SessionEvent::Interrupted { epoch },
                LiveEvent::InputTranscript(text) => SessionEvent::InputTranscript { epoch, text },
                LiveEvent::OutputTranscript(text) => SessionEvent::OutputTranscript { epoch, text },
                LiveEvent::TurnComplete => SessionEvent::TurnComplete { epoch },
                LiveEvent::GoAway => {
                    info!("Server requested disconnection");
                    let _ = events.send(SessionEvent::Closed {
                        epoch,
                        reason: Some("go away".to_string()),
                    });
                    return;
                }
                LiveEvent::Text(text) => {
                    debug!("Model text part: {}", text);
                    continue;
                }
                LiveEvent::SetupComplete => continue,
            };
            if events.send(forwarded).is_err() {
                return;
            }
        }
    }

    let _ = events.send(SessionEvent::Closed { epoch, reason: None });
    info!("Inbound message task terminated");
}

async fn write_loop(
    epoch: Epoch,
    mut sink: WsSink,
    mut out_rx: mpsc::UnboundedReceiver<WsCommand>,
    events: EventSender,
) {
    while let Some(command) = out_rx.recv().await {
        match command {
            WsCommand::Send(msg) => {
                if let Err(e) = send_message(&mut sink, &msg).await {
                    error!("Failed to send message: {:?}", e);
                    let _ = events.send(SessionEvent::TransportFailed { epoch, error: e });
                    break;
                }
            }
            WsCommand::Close => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
    let _ = sink.close().await;
}

/// Live link backed by the websocket writer task.
pub struct GeminiLink {
    out_tx: mpsc::UnboundedSender<WsCommand>,
    writer: Option<JoinHandle<()>>,
    reader: AbortHandle,
}

impl fmt::Debug for GeminiLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiLink")
            .field("open", &self.writer.is_some())
            .finish()
    }
}

impl LiveLink for GeminiLink {
    fn send_audio(&mut self, data: String) -> Result<()> {
        self.out_tx
            .send(WsCommand::Send(ClientMessage::RealtimeInput(RealtimeInput::audio(data))))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn close(&mut self) {
        if self.writer.take().is_some() {
            debug!("Closing Live link");
            let _ = self.out_tx.send(WsCommand::Close);
            self.reader.abort();
        }
    }
}

impl Drop for GeminiLink {
    fn drop(&mut self) {
        self.close();
    }
}
