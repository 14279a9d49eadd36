use std::mem;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;

use crate::mpd::protocol::{ACK_PREFIX, BINARY_PREFIX, OK_LINE, prefixed};
use crate::mpd::queue::WriteRequest;
use crate::util;

/// Everything the socket surfaces to the session, in arrival order.
#[derive(Debug)]
pub enum TransportEvent {
    /// Server banner, the first line after connecting.
    Init { banner: String },
    /// One complete success block, terminator line included.
    Response {
        data: String,
        art_file: Option<PathBuf>,
    },
    /// Server rejected the in-flight command; text after the `ACK ` prefix.
    ResponseError { data: String },
    /// Socket failure. `timed_out` marks the idle-timeout signature that
    /// should force a reconnect.
    Error { message: String, timed_out: bool },
    /// Peer closed the connection.
    Closed,
}

/// One TCP connection to the server. A reader task turns incoming bytes
/// into [`TransportEvent`]s; a writer task drains queued write requests.
/// Binary payloads never reach the text path: the writer parks the
/// destination file of the in-flight command and the reader appends
/// `binary:` chunks straight to it.
pub struct Transport {
    write_tx: mpsc::UnboundedSender<WriteRequest>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

type BinarySink = Arc<AsyncMutex<Option<PathBuf>>>;

impl Transport {
    pub async fn connect(
        host: &str,
        port: u16,
    ) -> Result<(Transport, mpsc::UnboundedReceiver<TransportEvent>)> {
        let stream = TcpStream::connect((host, port))
            .await
            .with_context(|| format!("connecting to {host}:{port}"))?;
        let (rx_half, tx_half) = stream.into_split();

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let sink = BinarySink::default();

        let reader = tokio::task::spawn(reader_task(rx_half, event_tx.clone(), sink.clone()));
        let writer = tokio::task::spawn(writer_task(tx_half, write_rx, event_tx, sink));

        Ok((Transport { write_tx, reader, writer }, event_rx))
    }

    pub fn write(&self, request: WriteRequest) {
        if self.write_tx.send(request).is_err() {
            log::warn!("write requested after transport closed");
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

async fn reader_task<R>(reader: R, events: mpsc::UnboundedSender<TransportEvent>, sink: BinarySink)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);

    match run_reader(&mut reader, &events, &sink).await {
        Ok(()) => {
            let _ = events.send(TransportEvent::Closed);
        }
        Err(err) => {
            let timed_out = err
                .downcast_ref::<std::io::Error>()
                .is_some_and(util::idle_timeout);
            let _ = events.send(TransportEvent::Error {
                message: format!("{err:#}"),
                timed_out,
            });
        }
    }
}

async fn run_reader<R>(
    reader: &mut R,
    events: &mpsc::UnboundedSender<TransportEvent>,
    sink: &BinarySink,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut buff = String::new();

    if reader.read_line(&mut buff).await? == 0 {
        bail!("connection closed before banner");
    }
    let _ = events.send(TransportEvent::Init {
        banner: buff.trim_end().to_string(),
    });

    let mut block = String::new();
    loop {
        buff.clear();
        if reader.read_line(&mut buff).await? == 0 {
            // peer hung up; a partial block is of no use to anyone
            return Ok(());
        }

        let line = buff.trim_end_matches(['\n', '\r']);
        log::trace!("recv: {line}");

        if line == OK_LINE {
            block.push_str(OK_LINE);
            block.push('\n');
            let art_file = sink.lock().await.take();
            let _ = events.send(TransportEvent::Response {
                data: mem::take(&mut block),
                art_file,
            });
        } else if let Some(message) = prefixed(ACK_PREFIX, line) {
            block.clear();
            sink.lock().await.take();
            let _ = events.send(TransportEvent::ResponseError {
                data: message.trim().to_string(),
            });
        } else if let Some(len) = prefixed(BINARY_PREFIX, line) {
            // keep the metadata line in the text block, divert the payload
            block.push_str(line);
            block.push('\n');
            read_binary(reader, len, sink).await?;
        } else {
            block.push_str(line);
            block.push('\n');
        }
    }
}

async fn read_binary<R>(reader: &mut R, len: &str, sink: &BinarySink) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let len: usize = len.trim().parse().context("parsing length of binary data")?;
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes).await.context("reading binary data")?;

    let newline = reader.read_u8().await.context("reading binary trailing newline")?;
    if newline != b'\n' {
        bail!("binary data did not end with trailing newline");
    }

    let dest = sink.lock().await.clone();
    match dest {
        Some(path) => {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .with_context(|| format!("opening {}", path.display()))?;
            file.write_all(&bytes)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
        }
        None => {
            log::warn!("{len} byte binary payload with no destination file, dropped");
        }
    }

    Ok(())
}

async fn writer_task<W>(
    mut writer: W,
    mut write_rx: mpsc::UnboundedReceiver<WriteRequest>,
    events: mpsc::UnboundedSender<TransportEvent>,
    sink: BinarySink,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(request) = write_rx.recv().await {
        *sink.lock().await = request.art_file.clone();
        log::trace!("send: {}", request.text.lines().next().unwrap_or(""));

        let result = async {
            writer.write_all(request.text.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        }
        .await;

        if let Err(err) = result {
            let timed_out = util::idle_timeout(&err);
            let _ = events.send(TransportEvent::Error {
                message: format!("write failed: {err}"),
                timed_out,
            });
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn events_from(input: &str) -> mpsc::UnboundedReceiver<TransportEvent> {
        let (mut server, client) = tokio::io::duplex(4096);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::task::spawn(reader_task(client, event_tx, BinarySink::default()));

        server.write_all(input.as_bytes()).await.unwrap();
        drop(server);
        event_rx
    }

    #[tokio::test]
    async fn banner_then_blocks() {
        let mut events =
            events_from("OK MPD 0.21.11\nvolume: 50\nstate: stop\nOK\nACK [50@0] {play} nope\n")
                .await;

        match events.recv().await.unwrap() {
            TransportEvent::Init { banner } => assert_eq!(banner, "OK MPD 0.21.11"),
            other => panic!("expected init, got {other:?}"),
        }

        match events.recv().await.unwrap() {
            TransportEvent::Response { data, art_file } => {
                assert_eq!(data, "volume: 50\nstate: stop\nOK\n");
                assert!(art_file.is_none());
            }
            other => panic!("expected response, got {other:?}"),
        }

        match events.recv().await.unwrap() {
            TransportEvent::ResponseError { data } => {
                assert_eq!(data, "[50@0] {play} nope");
            }
            other => panic!("expected response error, got {other:?}"),
        }

        assert!(matches!(events.recv().await.unwrap(), TransportEvent::Closed));
    }

    #[tokio::test]
    async fn error_block_does_not_leak_into_next_response() {
        let mut events =
            events_from("OK MPD 0.21.11\npartial: 1\nACK [5@0] {bad} err\nfresh: 2\nOK\n").await;

        events.recv().await.unwrap(); // init
        assert!(matches!(
            events.recv().await.unwrap(),
            TransportEvent::ResponseError { .. }
        ));

        match events.recv().await.unwrap() {
            TransportEvent::Response { data, .. } => assert_eq!(data, "fresh: 2\nOK\n"),
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn binary_payload_is_diverted_to_the_sink_file() {
        let dest = std::env::temp_dir().join(format!("mpdlink_art_{}.png", std::process::id()));
        let _ = std::fs::remove_file(&dest);

        let (mut server, client) = tokio::io::duplex(4096);
        let (event_tx, mut events) = mpsc::unbounded_channel();
        let sink = BinarySink::new(AsyncMutex::new(Some(dest.clone())));
        tokio::task::spawn(reader_task(client, event_tx, sink));

        server.write_all(b"OK MPD 0.21.11\n").await.unwrap();
        server.write_all(b"size: 8\nbinary: 4\nPNG0\nOK\n").await.unwrap();
        drop(server);

        events.recv().await.unwrap(); // init
        match events.recv().await.unwrap() {
            TransportEvent::Response { data, art_file } => {
                // metadata stays in the text block, payload bytes do not
                assert_eq!(data, "size: 8\nbinary: 4\nOK\n");
                assert_eq!(art_file.as_deref(), Some(dest.as_path()));
            }
            other => panic!("expected response, got {other:?}"),
        }

        assert_eq!(std::fs::read(&dest).unwrap(), b"PNG0");
        let _ = std::fs::remove_file(&dest);
    }
}
