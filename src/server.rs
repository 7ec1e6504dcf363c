//! The accept loop and per-connection task: one reader/dispatcher task and
//! one writer task per peer, multiplexed by the tokio reactor.

use std::os::unix::io::AsRawFd;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, instrument};

use crate::codec::{LineReader, MAX_INPUT_BUFFER};
use crate::command::{self, Command};
use crate::engine::{Engine, ALL_CHANNEL};
use crate::shutdown::Shutdown;
use crate::{bootstrap, stats};

/// Bytes read off the socket per `read` call, matching the reference's fixed
/// 1024-byte read buffer.
const READ_CHUNK: usize = 1024;

/// Run the accept loop over every bound listener until `shutdown` resolves,
/// then wait for all in-flight connections to finish their queued output.
pub async fn run(listeners: Vec<TcpListener>, engine: Engine, shutdown: impl std::future::Future) {
    let (notify_shutdown, _) = broadcast::channel(1);
    let (shutdown_complete_tx, mut shutdown_complete_rx) = mpsc::channel(1);

    let accept_tasks: Vec<_> = listeners
        .into_iter()
        .map(|listener| {
            let engine = engine.clone();
            let notify_shutdown = notify_shutdown.clone();
            let shutdown_complete_tx = shutdown_complete_tx.clone();
            tokio::spawn(accept_loop(listener, engine, notify_shutdown, shutdown_complete_tx))
        })
        .collect();

    tokio::select! {
        _ = futures_wait_all(accept_tasks) => {}
        _ = shutdown => {
            info!("shutdown signal received, closing listeners");
        }
    }

    drop(notify_shutdown);
    drop(shutdown_complete_tx);

    let _ = shutdown_complete_rx.recv().await;
}

/// Await every accept-loop task, ignoring join errors (a panicking accept
/// loop should not prevent shutdown from completing).
async fn futures_wait_all(tasks: Vec<tokio::task::JoinHandle<()>>) {
    for task in tasks {
        let _ = task.await;
    }
}

async fn accept_loop(
    listener: TcpListener,
    engine: Engine,
    notify_shutdown: broadcast::Sender<()>,
    shutdown_complete_tx: mpsc::Sender<()>,
) {
    let mut shutdown_signal = notify_shutdown.subscribe();

    loop {
        let accept_result = tokio::select! {
            res = listener.accept() => res,
            _ = shutdown_signal.recv() => break,
        };

        let (socket, addr) = match accept_result {
            Ok(pair) => pair,
            Err(err) => {
                error!(cause = %err, "accept failed");
                continue;
            }
        };

        if let Err(err) = bootstrap::enable_keepalive(&socket) {
            debug!(cause = %err, "failed to enable keepalive");
        }

        let peer_id = socket.as_raw_fd() as u64;
        let engine = engine.clone();
        let shutdown = Shutdown::new(notify_shutdown.subscribe());
        let shutdown_complete_tx = shutdown_complete_tx.clone();

        tokio::spawn(async move {
            handle_connection(socket, addr, peer_id, engine, shutdown).await;
            drop(shutdown_complete_tx);
        });
    }
}

/// Drive one accepted connection from admission through disconnect.
#[instrument(skip(socket, engine, shutdown), fields(peer = peer_id))]
async fn handle_connection(
    mut socket: TcpStream,
    addr: std::net::SocketAddr,
    peer_id: u64,
    engine: Engine,
    mut shutdown: Shutdown,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();

    if !engine.try_admit(peer_id, addr, tx) {
        let _ = socket.try_write(b"debug!busy\n");
        return;
    }

    engine.subscribe(peer_id, ALL_CHANNEL);
    let _ = socket.write_all(b"debug!connected...\n").await;

    let (mut read_half, mut write_half) = socket.into_split();

    let writer_task = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if write_half.write_all(&line).await.is_err() {
                break;
            }
        }
    });

    let mut reader = LineReader::new();
    let mut read_buf = [0_u8; READ_CHUNK];

    'connection: loop {
        if shutdown.is_shutdown() {
            break;
        }

        let read_result = tokio::select! {
            res = read_half.read(&mut read_buf) => res,
            _ = shutdown.recv() => break 'connection,
        };

        let bytes_read = match read_result {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };

        if reader.push(&read_buf[..bytes_read]).is_err() {
            debug!("peer exceeded the {}-byte input buffer, disconnecting", MAX_INPUT_BUFFER);
            break;
        }

        while let Some(line) = reader.next_line() {
            dispatch(&engine, peer_id, &line);
        }
    }

    engine.disconnect(peer_id);
    writer_task.abort();
}

/// Parse and apply one framed line. Never returns an error: malformed
/// commands are silently discarded and the peer stays connected.
fn dispatch(engine: &Engine, peer_id: u64, line: &[u8]) {
    match command::parse(line) {
        Command::Ping => {
            engine.bump_pings();
            let reply = format!("{}\n", unix_seconds());
            send_to(engine, peer_id, reply.into_bytes());
        }
        Command::Info => {
            let reply = stats::render(engine);
            send_to(engine, peer_id, reply.into_bytes());
        }
        Command::Announce { channel, body } => {
            engine.announce(channel, body);
        }
        Command::Subscribe { channel } => {
            engine.subscribe(peer_id, channel);
        }
        Command::Unsubscribe { channel } => {
            engine.unsubscribe(peer_id, channel);
        }
        Command::Garbage => {}
    }
}

/// Enqueue `bytes` on `peer_id`'s outbound queue directly, used for replies
/// that don't go through `announce`'s fanout (`ping`/`info`).
fn send_to(engine: &Engine, peer_id: u64, bytes: Vec<u8>) {
    engine.send_direct(peer_id, Bytes::from(bytes));
}

fn unix_seconds() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}
