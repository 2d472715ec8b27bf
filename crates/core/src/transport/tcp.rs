use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::protocol::MethodHandler;
use crate::protocol::RtspRequest;
use crate::server::ServerContext;

/// Bodies larger than this are refused and the connection dropped.
const MAX_BODY: usize = 64 * 1024;

/// Non-blocking TCP accept loop.
///
/// Polls every 50ms so [`Server::stop`](crate::Server::stop) ends it promptly.
pub fn accept_loop(listener: TcpListener, context: ServerContext, running: Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                let context = context.clone();
                let running = running.clone();
                let spawned = thread::Builder::new()
                    .name("rtsp-conn".to_string())
                    .spawn(move || Connection::handle(stream, context, running));
                if let Err(e) = spawned {
                    tracing::error!(error = %e, "failed to spawn connection thread");
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            }
        }
    }
    tracing::debug!("accept loop exited");
}

/// One RTSP client connection.
struct Connection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    handler: MethodHandler,
    peer_addr: SocketAddr,
}

impl Connection {
    fn handle(stream: TcpStream, context: ServerContext, running: Arc<AtomicBool>) {
        let Ok(peer_addr) = stream.peer_addr() else {
            return;
        };
        let Ok(reader_stream) = stream.try_clone() else {
            return;
        };

        tracing::info!(%peer_addr, "client connected");

        let mut conn = Connection {
            reader: BufReader::new(reader_stream),
            writer: stream,
            handler: MethodHandler::new(context, peer_addr),
            peer_addr,
        };

        let reason = conn.run(&running);
        let released = conn.handler.release_sessions();
        if released > 0 {
            tracing::info!(peer = %peer_addr, released, "cleaned up sessions on disconnect");
        }

        tracing::info!(%peer_addr, reason, "client disconnected");
    }

    /// Read one request: header block, then `Content-Length` bytes of body.
    fn read_request(&mut self) -> Result<Option<String>, &'static str> {
        let mut text = String::new();
        let mut content_length = 0usize;
        loop {
            let mut line = String::new();
            match self.reader.read_line(&mut line) {
                Ok(0) => return Err("connection closed by client"),
                Ok(_) => {
                    if let Some((name, value)) = line.split_once(':')
                        && name.trim().eq_ignore_ascii_case("Content-Length")
                    {
                        content_length = value.trim().parse().unwrap_or(0);
                    }
                    text.push_str(&line);
                    if line == "\r\n" || line == "\n" {
                        break;
                    }
                }
                Err(_) => return Err("read error"),
            }
        }

        if text.trim().is_empty() {
            return Ok(None);
        }

        if content_length > 0 {
            if content_length > MAX_BODY {
                return Err("request body too large");
            }
            let mut body = vec![0u8; content_length];
            if self.reader.read_exact(&mut body).is_err() {
                return Err("read error");
            }
            text.push_str(&String::from_utf8_lossy(&body));
        }
        Ok(Some(text))
    }

    fn run(&mut self, running: &AtomicBool) -> &'static str {
        while running.load(Ordering::SeqCst) {
            let request_text = match self.read_request() {
                Ok(Some(text)) => text,
                Ok(None) => continue,
                Err(reason) => return reason,
            };

            match RtspRequest::parse(&request_text) {
                Ok(request) => {
                    tracing::debug!(
                        peer = %self.peer_addr,
                        method = %request.method,
                        uri = %request.uri,
                        "request"
                    );

                    let response = self.handler.handle(&request);

                    tracing::debug!(
                        peer = %self.peer_addr,
                        status = response.status_code,
                        "response"
                    );

                    if self
                        .writer
                        .write_all(response.serialize().as_bytes())
                        .is_err()
                    {
                        return "write error";
                    }
                }
                Err(e) => {
                    tracing::warn!(peer = %self.peer_addr, error = %e, "parse error");
                }
            }
        }

        "server shutting down"
    }
}
