//! In-process WebSocket peer for driving `FundLinkClient` in tests.
//!
//! Every accepted connection gets an index (0, 1, ...) so tests can tell the
//! traffic of the first socket from the traffic after a reconnect.

#![allow(dead_code)]

use fund_link::{
    ClientConfig, ConnectionInfo, ConnectionState, Envelope, EnvelopeKind, FundLinkClient,
};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

static LOGGER: OnceLock<()> = OnceLock::new();

pub fn init_logging() {
    LOGGER.get_or_init(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Short timers so reconnect and heartbeat scenarios finish quickly.
/// Heartbeats are off unless a test turns them on.
pub fn fast_config() -> ClientConfig {
    ClientConfig::default()
        .with_reconnect_delay_ms(20)
        .with_max_reconnect_delay_ms(100)
        .with_reconnect_jitter_ms(0)
        .with_heartbeat_interval_ms(0)
        .with_connect_timeout_ms(2000)
        .with_request_timeout_ms(2000)
        .with_debug(true)
}

/// Builds the peer's reply to an inbound envelope, if any.
pub type Responder = Arc<dyn Fn(&Envelope) -> Option<Envelope> + Send + Sync>;

#[derive(Clone)]
pub struct MockOptions {
    /// Answer heartbeat pings with a pong carrying the same id.
    pub auto_pong: bool,
    pub responder: Option<Responder>,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            auto_pong: true,
            responder: None,
        }
    }
}

/// An envelope the peer received, tagged with its connection index.
#[derive(Debug, Clone)]
pub struct Received {
    pub conn: usize,
    pub envelope: Envelope,
}

enum PeerCmd {
    Send(Envelope),
    Close(u16),
    Drop,
}

pub struct MockServer {
    addr: SocketAddr,
    inbound_rx: mpsc::UnboundedReceiver<Received>,
    peers: Arc<Mutex<Vec<mpsc::UnboundedSender<PeerCmd>>>>,
    accepted: Arc<AtomicUsize>,
    accept_task: JoinHandle<()>,
}

impl MockServer {
    pub async fn start() -> Self {
        Self::start_with(MockOptions::default()).await
    }

    pub async fn start_with(options: MockOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().expect("mock server address");
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let peers = Arc::new(Mutex::new(Vec::new()));
        let accepted = Arc::new(AtomicUsize::new(0));

        let accept_task = tokio::spawn(accept_loop(
            listener,
            options,
            inbound_tx,
            peers.clone(),
            accepted.clone(),
        ));

        Self {
            addr,
            inbound_rx,
            peers,
            accepted,
            accept_task,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Number of TCP connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub async fn wait_for_accepted(&self, count: usize) {
        let deadline = tokio::time::Instant::now() + WAIT;
        while self.accepted() < count {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {} connections (have {})",
                count,
                self.accepted()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Close the listening socket; later connection attempts are refused.
    pub fn stop_accepting(&self) {
        self.accept_task.abort();
    }

    /// Push an envelope to every open connection.
    pub fn broadcast(&self, envelope: Envelope) {
        for peer in self.peers.lock().unwrap().iter() {
            let _ = peer.send(PeerCmd::Send(envelope.clone()));
        }
    }

    /// Drop every open socket without a close handshake.
    pub fn drop_connections(&self) {
        for peer in self.peers.lock().unwrap().drain(..) {
            let _ = peer.send(PeerCmd::Drop);
        }
    }

    /// Send a close frame with `code` on every open socket.
    pub fn close_connections(&self, code: u16) {
        for peer in self.peers.lock().unwrap().drain(..) {
            let _ = peer.send(PeerCmd::Close(code));
        }
    }

    /// Next envelope from any connection.
    pub async fn recv(&mut self) -> Received {
        match tokio::time::timeout(WAIT, self.inbound_rx.recv()).await {
            Ok(Some(received)) => received,
            Ok(None) => panic!("mock server stopped"),
            Err(_) => panic!("timed out waiting for an inbound envelope"),
        }
    }

    /// Next envelope of `kind`, skipping everything else.
    pub async fn recv_kind(&mut self, kind: EnvelopeKind) -> Received {
        loop {
            let received = self.recv().await;
            if received.envelope.kind == kind {
                return received;
            }
        }
    }

    /// Everything received within `window`.
    pub async fn collect_for(&mut self, window: Duration) -> Vec<Received> {
        let deadline = tokio::time::Instant::now() + window;
        let mut out = Vec::new();
        while let Ok(Some(received)) =
            tokio::time::timeout_at(deadline, self.inbound_rx.recv()).await
        {
            out.push(received);
        }
        out
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    options: MockOptions,
    inbound_tx: mpsc::UnboundedSender<Received>,
    peers: Arc<Mutex<Vec<mpsc::UnboundedSender<PeerCmd>>>>,
    accepted: Arc<AtomicUsize>,
) {
    while let Ok((stream, _)) = listener.accept().await {
        let conn = accepted.fetch_add(1, Ordering::SeqCst);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        peers.lock().unwrap().push(cmd_tx);
        tokio::spawn(serve_peer(conn, stream, options.clone(), inbound_tx.clone(), cmd_rx));
    }
}

async fn serve_peer(
    conn: usize,
    stream: TcpStream,
    options: MockOptions,
    inbound_tx: mpsc::UnboundedSender<Received>,
    mut cmd_rx: mpsc::UnboundedReceiver<PeerCmd>,
) {
    let mut ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(_) => return,
    };

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(PeerCmd::Send(envelope)) => {
                    let text = serde_json::to_string(&envelope).expect("encode envelope");
                    if ws.send(Message::Text(text.into())).await.is_err() {
                        return;
                    }
                },
                Some(PeerCmd::Close(code)) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: "server going away".into(),
                    };
                    let _ = ws.close(Some(frame)).await;
                    return;
                },
                Some(PeerCmd::Drop) | None => return,
            },
            frame = ws.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let envelope: Envelope = match serde_json::from_str(text.as_str()) {
                        Ok(envelope) => envelope,
                        Err(_) => continue,
                    };
                    let mut replies = Vec::new();
                    if options.auto_pong && envelope.kind == EnvelopeKind::Ping {
                        replies.push(Envelope::pong(envelope.id.clone()));
                    }
                    if let Some(responder) = options.responder.as_ref() {
                        replies.extend(responder(&envelope));
                    }
                    let _ = inbound_tx.send(Received { conn, envelope });
                    for reply in replies {
                        let text = serde_json::to_string(&reply).expect("encode reply");
                        if ws.send(Message::Text(text.into())).await.is_err() {
                            return;
                        }
                    }
                },
                Some(Ok(_)) => {},
                Some(Err(_)) | None => return,
            },
        }
    }
}

/// Listener that completes the WebSocket handshake for the first
/// `handshakes` connections, drops each of those after `hold`, and leaves
/// every later connection hanging before the handshake.
pub struct StallingServer {
    addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl StallingServer {
    pub async fn start(handshakes: usize, hold: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stalling server");
        let addr = listener.local_addr().expect("stalling server address");
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();

        let task = tokio::spawn(async move {
            let mut stalled: Vec<TcpStream> = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                let conn = counter.fetch_add(1, Ordering::SeqCst);
                if conn < handshakes {
                    tokio::spawn(async move {
                        if let Ok(ws) = accept_async(stream).await {
                            tokio::time::sleep(hold).await;
                            drop(ws);
                        }
                    });
                } else {
                    stalled.push(stream);
                }
            }
        });

        Self { addr, accepted, task }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub async fn wait_for_accepted(&self, count: usize) {
        let deadline = tokio::time::Instant::now() + WAIT;
        while self.accepted() < count {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {} connections (have {})",
                count,
                self.accepted()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for StallingServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Wait until the published connection info satisfies `predicate`.
pub async fn wait_for_info(
    client: &FundLinkClient,
    predicate: impl FnMut(&ConnectionInfo) -> bool,
) -> ConnectionInfo {
    let mut rx = client.state_changes();
    let result = tokio::time::timeout(WAIT, rx.wait_for(predicate)).await;
    let info = match result {
        Ok(Ok(info)) => info.clone(),
        Ok(Err(_)) => panic!("connection task stopped"),
        Err(_) => panic!(
            "timed out waiting for connection info (current: {:?})",
            client.connection_info()
        ),
    };
    info
}

pub async fn wait_for_state(client: &FundLinkClient, state: ConnectionState) -> ConnectionInfo {
    wait_for_info(client, |info| info.state == state).await
}

/// Receiving end of a handler that forwards every envelope it sees.
pub fn envelope_sink() -> (
    impl Fn(&Envelope) + Send + Sync + 'static,
    mpsc::UnboundedReceiver<Envelope>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = move |envelope: &Envelope| {
        let _ = tx.send(envelope.clone());
    };
    (handler, rx)
}

pub async fn next_envelope(rx: &mut mpsc::UnboundedReceiver<Envelope>) -> Envelope {
    match tokio::time::timeout(WAIT, rx.recv()).await {
        Ok(Some(envelope)) => envelope,
        Ok(None) => panic!("handler dropped"),
        Err(_) => panic!("timed out waiting for a delivered envelope"),
    }
}
