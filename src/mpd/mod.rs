pub mod albumart;
pub mod ops;
pub mod protocol;
pub mod queue;
pub mod transport;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::{Mutex as AsyncMutex, RwLock, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::events::{EventBus, SessionEvent};
use crate::util;

use protocol::{Attributes, ProtocolVersion};
use queue::{CommandError, CommandQueue, CommandResult, RawResponse};
use transport::{Transport, TransportEvent};
use types::Stats;

pub const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(30);

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const STABLE_RUN: Duration = Duration::from_secs(30);

pub struct Config {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    /// Where album art files land.
    pub art_dir: PathBuf,
}

/// Handle to one live MPD session. Cheap to clone; every clone feeds the
/// same FIFO command queue, so results come back in call order no matter
/// who calls.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

struct Shared {
    config: Config,
    requests: mpsc::UnboundedSender<Enqueue>,
    state: RwLock<State>,
    events: EventBus,
    status_interval: watch::Sender<Duration>,
    shutdown: CancellationToken,
}

#[derive(Default)]
struct State {
    connected: bool,
    version: Option<ProtocolVersion>,
    file_suffixes: Vec<String>,
    stats: Stats,
    current_playlist: Option<String>,
}

struct Enqueue {
    text: String,
    art_file: Option<PathBuf>,
    finish: oneshot::Sender<CommandResult>,
}

impl Session {
    /// Open a session. The returned handle resolves only once the socket is
    /// up and, when a password was given, the server accepted it.
    pub async fn connect(config: Config, events: EventBus) -> Result<Session> {
        events.publish(SessionEvent::Connecting {
            host: config.host.clone(),
            port: config.port,
        });

        let conn = match Transport::connect(&config.host, config.port).await {
            Ok(conn) => conn,
            Err(err) => {
                events.publish(SessionEvent::Disconnected {
                    host: config.host.clone(),
                    port: config.port,
                });
                return Err(err);
            }
        };

        events.publish(SessionEvent::Connected {
            host: config.host.clone(),
            port: config.port,
        });

        let (requests, request_rx) = mpsc::unbounded_channel();
        let (status_interval, _) = watch::channel(DEFAULT_STATUS_INTERVAL);
        let password = config.password.clone();

        let shared = Arc::new(Shared {
            config,
            requests,
            state: RwLock::new(State::default()),
            events,
            status_interval,
            shutdown: CancellationToken::new(),
        });
        let session = Session { shared: shared.clone() };

        tokio::task::spawn(supervisor(shared.clone(), request_rx, conn));
        tokio::task::spawn(status_poller(session.clone()));

        if let Some(password) = password {
            if let Err(err) = session.login(&password).await {
                session.disconnect();
                return Err(err).context("authenticating");
            }
        }

        // Primes the stats cache; also means the init handshake has landed
        // by the time the caller gets the handle back.
        if let Err(err) = session.refresh_stats().await {
            log::warn!("fetching library stats: {err:#}");
        }

        Ok(session)
    }

    /// Tear the session down: pending commands are rejected and the
    /// supervisor stops reconnecting.
    pub fn disconnect(&self) {
        self.shared.shutdown.cancel();
    }

    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    pub fn host(&self) -> &str {
        &self.shared.config.host
    }

    pub fn port(&self) -> u16 {
        self.shared.config.port
    }

    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    pub async fn is_connected(&self) -> bool {
        self.shared.state.read().await.connected
    }

    pub async fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.shared.state.read().await.version
    }

    pub async fn file_suffixes(&self) -> Vec<String> {
        self.shared.state.read().await.file_suffixes.clone()
    }

    /// Library totals cached by the last [`Session::refresh_stats`].
    pub async fn cached_stats(&self) -> Stats {
        self.shared.state.read().await.stats
    }

    pub async fn current_playlist_name(&self) -> Option<String> {
        self.shared.state.read().await.current_playlist.clone()
    }

    pub async fn set_current_playlist_name(&self, name: Option<String>) {
        self.shared.state.write().await.current_playlist = name;
    }

    /// Change the status poll cadence, e.g. down to a second while a
    /// now-playing view is on screen. Applies immediately.
    pub fn set_status_interval(&self, interval: Duration) {
        self.shared.status_interval.send_replace(interval);
    }

    pub(crate) async fn command(&self, text: impl Into<String>) -> Result<RawResponse, CommandError> {
        self.command_with_art(text, None).await
    }

    pub(crate) async fn command_with_art(
        &self,
        text: impl Into<String>,
        art_file: Option<PathBuf>,
    ) -> Result<RawResponse, CommandError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(CommandError::EmptyCommand);
        }

        let (finish, rx) = oneshot::channel();
        self.shared
            .requests
            .send(Enqueue { text, art_file, finish })
            .map_err(|_| CommandError::Closed)?;

        rx.await.map_err(|_| CommandError::Closed)?
    }
}

type Conn = (Transport, mpsc::UnboundedReceiver<TransportEvent>);

enum ConnectionEnd {
    Lost,
    Shutdown,
}

/// Owns the connection lifecycle: runs the session loop over the live
/// transport, and when the connection is lost, re-establishes it with
/// doubling backoff. Backoff resets after a connection that held for a
/// while. Runs until `disconnect()`.
async fn supervisor(shared: Arc<Shared>, mut requests: mpsc::UnboundedReceiver<Enqueue>, first: Conn) {
    let mut next = Some(first);
    let mut delay = INITIAL_BACKOFF;

    loop {
        let (transport, events) = match next.take() {
            Some(conn) => conn,
            None => {
                shared.events.publish(SessionEvent::Connecting {
                    host: shared.config.host.clone(),
                    port: shared.config.port,
                });

                match Transport::connect(&shared.config.host, shared.config.port).await {
                    Ok(conn) => {
                        shared.events.publish(SessionEvent::Reconnected {
                            host: shared.config.host.clone(),
                            port: shared.config.port,
                        });
                        conn
                    }
                    Err(err) => {
                        if util::connection_refused(&*err) {
                            log::warn!(
                                "{}:{} refused connection, retrying in {delay:?}",
                                shared.config.host, shared.config.port
                            );
                        } else {
                            log::warn!("reconnect failed: {err:#}, retrying in {delay:?}");
                        }

                        tokio::select! {
                            _ = shared.shutdown.cancelled() => return,
                            _ = tokio::time::sleep(delay) => {}
                        }
                        delay = (delay * 2).min(MAX_BACKOFF);
                        continue;
                    }
                }
            }
        };

        let started = Instant::now();
        let end = run_connection(&shared, &mut requests, transport, events).await;

        shared.state.write().await.connected = false;
        shared.events.publish(SessionEvent::Disconnected {
            host: shared.config.host.clone(),
            port: shared.config.port,
        });

        match end {
            ConnectionEnd::Shutdown => return,
            ConnectionEnd::Lost if started.elapsed() >= STABLE_RUN => {
                delay = INITIAL_BACKOFF;
            }
            ConnectionEnd::Lost => {
                // connection died young; don't redial in a tight loop
                tokio::select! {
                    _ = shared.shutdown.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                delay = (delay * 2).min(MAX_BACKOFF);
            }
        }
    }
}

/// The session loop for one connection: multiplexes enqueue requests, the
/// watchdog tick and transport events over the command queue. This is the
/// only place the queue is touched, so there is no locking to get wrong.
async fn run_connection(
    shared: &Arc<Shared>,
    requests: &mut mpsc::UnboundedReceiver<Enqueue>,
    transport: Transport,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) -> ConnectionEnd {
    let mut queue = CommandQueue::new();
    let mut ticker = tokio::time::interval(queue::TICK_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    shared.state.write().await.connected = true;

    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => {
                queue.fail_all(CommandError::Closed);
                return ConnectionEnd::Shutdown;
            }

            request = requests.recv() => match request {
                Some(Enqueue { text, art_file, finish }) => {
                    queue.push(text, art_file, finish);
                }
                // every handle is gone; nobody is left to answer
                None => {
                    queue.fail_all(CommandError::Closed);
                    return ConnectionEnd::Shutdown;
                }
            },

            _ = ticker.tick() => {
                if let Some(write) = queue.tick(true) {
                    transport.write(write);
                }
            }

            event = events.recv() => {
                let Some(event) = event else {
                    queue.fail_all(CommandError::ConnectionReset);
                    return ConnectionEnd::Lost;
                };

                match event {
                    TransportEvent::Init { banner } => {
                        handle_init(shared, &mut queue, &banner).await;
                    }
                    TransportEvent::Response { data, art_file } => {
                        queue.complete(&data, art_file);
                        // don't make the next command wait out the tick
                        if let Some(write) = queue.kick(true) {
                            transport.write(write);
                        }
                    }
                    TransportEvent::ResponseError { data } => {
                        queue.fail_head(CommandError::Ack(data));
                    }
                    TransportEvent::Error { message, timed_out } => {
                        if timed_out {
                            log::info!("idle timeout on {}:{}, reconnecting", shared.config.host, shared.config.port);
                        } else {
                            log::error!("transport error: {message}");
                        }
                        queue.fail_head(CommandError::Transport(message));
                        queue.fail_all(CommandError::ConnectionReset);
                        return ConnectionEnd::Lost;
                    }
                    TransportEvent::Closed => {
                        queue.fail_all(CommandError::ConnectionReset);
                        return ConnectionEnd::Lost;
                    }
                }
            }
        }
    }
}

/// Server banner: record the protocol version, then load the decoder
/// suffix whitelist through the same queue as everything else.
async fn handle_init(shared: &Arc<Shared>, queue: &mut CommandQueue, banner: &str) {
    match ProtocolVersion::from_banner(banner) {
        Ok(version) => {
            log::info!(
                "connected to mpd at {}:{}, protocol version {version}",
                shared.config.host, shared.config.port
            );
            shared.state.write().await.version = Some(version);
        }
        Err(err) => log::warn!("{err:#}"),
    }

    let (finish, response) = oneshot::channel();
    queue.push("decoders".to_string(), None, finish);

    let shared = shared.clone();
    tokio::task::spawn(async move {
        match response.await {
            Ok(Ok(response)) => {
                let suffixes = decoder_suffixes(&response.body);
                log::debug!("{} decoder suffixes loaded", suffixes.len());
                shared.state.write().await.file_suffixes = suffixes;
            }
            Ok(Err(err)) => log::warn!("loading decoder suffixes: {err}"),
            Err(_) => {}
        }
    });
}

fn decoder_suffixes(body: &str) -> Vec<String> {
    let attrs = Attributes::parse(body);
    let mut suffixes = Vec::new();
    for suffix in attrs.get_all("suffix") {
        let suffix = format!(".{suffix}");
        if !suffixes.contains(&suffix) {
            suffixes.push(suffix);
        }
    }
    suffixes
}

/// Emits a parsed status block to the bus at the configured cadence. Just
/// another queue caller; a wedged user command stalls status updates, which
/// is the price of total ordering.
async fn status_poller(session: Session) {
    let mut interval = session.shared.status_interval.subscribe();

    loop {
        let wait = *interval.borrow();
        tokio::select! {
            _ = session.shared.shutdown.cancelled() => return,
            changed = interval.changed() => {
                if changed.is_err() {
                    return;
                }
                continue;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        if !session.is_connected().await {
            continue;
        }

        match session.status().await {
            Ok(status) => {
                session.shared.events.publish(SessionEvent::Status(status));
            }
            Err(err) => log::warn!("status poll: {err:#}"),
        }
    }
}

/// The one live session. Connecting tears down whatever was connected
/// before; there is never more than one socket in flight.
pub struct SessionManager {
    events: EventBus,
    current: AsyncMutex<Option<Session>>,
}

impl SessionManager {
    pub fn new(events: EventBus) -> SessionManager {
        SessionManager {
            events,
            current: AsyncMutex::new(None),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub async fn connect(&self, config: Config) -> Result<Session> {
        let mut current = self.current.lock().await;
        if let Some(old) = current.take() {
            old.disconnect();
        }

        let session = Session::connect(config, self.events.clone()).await?;
        *current = Some(session.clone());
        Ok(session)
    }

    pub async fn disconnect(&self) {
        if let Some(session) = self.current.lock().await.take() {
            session.disconnect();
        }
    }

    pub async fn current(&self) -> Option<Session> {
        self.current.lock().await.clone()
    }

    pub async fn is_connected(&self) -> bool {
        match self.current.lock().await.as_ref() {
            Some(session) => session.is_connected().await,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};

    /// Minimal fake server: banner, then an `OK`-ish reply per command.
    /// Closes the connection when told to `close`.
    async fn serve_connection(stream: TcpStream) {
        let (rx, mut tx) = stream.into_split();
        let mut lines = BufReader::new(rx).lines();

        tx.write_all(b"OK MPD 0.21.11\n").await.unwrap();

        let mut in_list = false;
        while let Ok(Some(line)) = lines.next_line().await {
            match line.as_str() {
                "command_list_begin" => in_list = true,
                "command_list_end" => {
                    in_list = false;
                    tx.write_all(b"OK\n").await.unwrap();
                }
                _ if in_list => {}
                "close" => return,
                "stats" => {
                    tx.write_all(b"artists: 2\nalbums: 3\nsongs: 5\nOK\n").await.unwrap();
                }
                "decoders" => {
                    tx.write_all(b"suffix: flac\nsuffix: mp3\nOK\n").await.unwrap();
                }
                "list artist" => {
                    tx.write_all(b"Artist: The Beatles\nArtist: Abba\nArtist: The Who\nOK\n")
                        .await
                        .unwrap();
                }
                _ => {
                    tx.write_all(b"OK\n").await.unwrap();
                }
            }
        }
    }

    async fn spawn_server() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::task::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                tokio::task::spawn(serve_connection(stream));
            }
        });
        port
    }

    fn config(port: u16) -> Config {
        Config {
            name: "test".to_string(),
            host: "127.0.0.1".to_string(),
            port,
            password: None,
            art_dir: std::env::temp_dir(),
        }
    }

    async fn next_event(rx: &mut tokio::sync::broadcast::Receiver<SessionEvent>) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event bus closed")
    }

    #[tokio::test]
    async fn connect_runs_the_init_handshake() {
        let port = spawn_server().await;
        let events = EventBus::default();
        let mut rx = events.subscribe();

        let session = Session::connect(config(port), events).await.unwrap();

        assert!(matches!(next_event(&mut rx).await, SessionEvent::Connecting { .. }));
        assert!(matches!(next_event(&mut rx).await, SessionEvent::Connected { .. }));

        assert!(session.is_connected().await);
        assert_eq!(session.protocol_version().await.map(|v| v.minor), Some(21));
        assert_eq!(session.cached_stats().await.songs, 5);

        // decoders response has been applied by the time stats resolved
        let suffixes = session.file_suffixes().await;
        assert!(suffixes.contains(&".flac".to_string()));

        session.disconnect();
    }

    #[tokio::test]
    async fn commands_resolve_in_submission_order() {
        let port = spawn_server().await;
        let session = Session::connect(config(port), EventBus::default()).await.unwrap();

        let a = session.command("stats");
        let b = session.command("decoders");
        let (a, b) = tokio::join!(a, b);
        assert!(a.unwrap().body.contains("songs: 5"));
        assert!(b.unwrap().body.contains("suffix: flac"));

        let artists = session.artists(None).await.unwrap();
        let names: Vec<&str> = artists.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["Abba", "The Beatles", "The Who"]);

        session.disconnect();
    }

    #[tokio::test]
    async fn lost_connection_rejects_pending_and_reconnects() {
        let port = spawn_server().await;
        let events = EventBus::default();
        let session = Session::connect(config(port), events.clone()).await.unwrap();

        let mut rx = events.subscribe();

        // server drops the connection without replying
        let err = session.command("close").await.unwrap_err();
        assert!(matches!(err, CommandError::ConnectionReset));

        assert!(matches!(next_event(&mut rx).await, SessionEvent::Disconnected { .. }));
        assert!(matches!(next_event(&mut rx).await, SessionEvent::Connecting { .. }));
        assert!(matches!(next_event(&mut rx).await, SessionEvent::Reconnected { .. }));

        // the new connection serves commands again
        let stats = session.refresh_stats().await.unwrap();
        assert_eq!(stats.songs, 5);

        session.disconnect();
    }

    #[tokio::test]
    async fn empty_command_is_refused_up_front() {
        let port = spawn_server().await;
        let session = Session::connect(config(port), EventBus::default()).await.unwrap();

        assert!(matches!(
            session.command("  ").await.unwrap_err(),
            CommandError::EmptyCommand
        ));

        session.disconnect();
    }
}
