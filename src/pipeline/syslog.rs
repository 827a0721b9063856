//! Syslog listener: UDP datagrams and newline-delimited TCP frames on
//! the same port. Each line becomes an event with `source="syslog"`,
//! the sender's IP as host, and default Info severity; a leading
//! RFC3164 `<pri>` prefix is stripped when parseable.

use crate::model::Event;
use crate::pipeline::IngestionPipeline;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::watch;
use tracing::{debug, info, warn};

const UDP_BUFFER: usize = 65_535;

/// Bind both sockets. Failing to bind a configured listener port is a
/// startup failure, surfaced to the caller.
pub async fn bind(port: u16) -> std::io::Result<(UdpSocket, TcpListener)> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let udp = UdpSocket::bind(addr).await?;
    let tcp = TcpListener::bind(addr).await?;
    info!(%addr, "syslog listening on UDP and TCP");
    Ok((udp, tcp))
}

/// Serve the UDP socket until shutdown.
pub async fn serve_udp(
    socket: UdpSocket,
    pipeline: Arc<IngestionPipeline>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; UDP_BUFFER];
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            res = socket.recv_from(&mut buf) => {
                match res {
                    Ok((n, peer)) => {
                        let raw = String::from_utf8_lossy(&buf[..n]).into_owned();
                        ingest_line(&pipeline, &raw, &peer.ip().to_string());
                    }
                    Err(e) => {
                        warn!(error = %e, "syslog udp receive failed");
                    }
                }
            }
        }
    }
}

/// Accept TCP connections until shutdown; each connection is consumed
/// line by line on its own task.
pub async fn serve_tcp(
    listener: TcpListener,
    pipeline: Arc<IngestionPipeline>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            res = listener.accept() => {
                match res {
                    Ok((stream, peer)) => {
                        let pipeline = pipeline.clone();
                        let conn_shutdown = shutdown.clone();
                        tokio::spawn(handle_conn(stream, peer, pipeline, conn_shutdown));
                    }
                    Err(e) => {
                        warn!(error = %e, "syslog tcp accept failed");
                    }
                }
            }
        }
    }
}

async fn handle_conn(
    stream: tokio::net::TcpStream,
    peer: SocketAddr,
    pipeline: Arc<IngestionPipeline>,
    mut shutdown: watch::Receiver<bool>,
) {
    let host = peer.ip().to_string();
    let mut lines = BufReader::new(stream).lines();
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => ingest_line(&pipeline, &line, &host),
                    Ok(None) => return,
                    Err(e) => {
                        debug!(%peer, error = %e, "syslog tcp read failed");
                        return;
                    }
                }
            }
        }
    }
}

/// Parse one raw syslog line into an event and enqueue it. Empty
/// lines are ignored.
pub fn ingest_line(pipeline: &IngestionPipeline, raw: &str, host: &str) {
    let msg = raw.trim();
    if msg.is_empty() {
        return;
    }
    let mut ev = Event::new("syslog", host, strip_priority(msg));
    ev.raw = raw.to_string();
    pipeline.ingest(ev);
}

/// Strip a leading `<pri>` prefix when it parses as one: `<` followed
/// by at most three digits and `>`.
fn strip_priority(msg: &str) -> String {
    if let Some(rest) = msg.strip_prefix('<') {
        if let Some(end) = rest.find('>') {
            if end > 0 && end <= 3 && rest[..end].bytes().all(|b| b.is_ascii_digit()) {
                return rest[end + 1..].trim_start().to_string();
            }
        }
    }
    msg.to_string()
}
