//! TCP transport for the capsheet daemon.
//!
//! Binds to 127.0.0.1 and handles JSONL messages, one connection per thread.
//! The first message must be a hello; after the welcome, messages go through
//! the dispatcher.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use capsheet_protocol::*;

use crate::dispatch::{self, AppState};

/// Maximum consecutive parse failures before disconnecting a client.
const MAX_PARSE_FAILURES: u32 = 5;

/// The daemon: TCP listener plus its shutdown signal.
pub struct Daemon {
    listener_handle: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    bound_addr: Option<SocketAddr>,
}

impl Daemon {
    pub fn new() -> Self {
        Daemon {
            listener_handle: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            bound_addr: None,
        }
    }

    /// Bind and start accepting connections. Port 0 picks a free port.
    pub fn start(&mut self, port: u16, state: AppState) -> std::io::Result<()> {
        if self.is_running() {
            return Ok(());
        }

        self.shutdown.store(false, Ordering::SeqCst);

        let listener = TcpListener::bind(("127.0.0.1", port))?;
        let addr = listener.local_addr()?;
        self.bound_addr = Some(addr);

        // Non-blocking accept so the loop can observe the shutdown flag
        listener.set_nonblocking(true)?;

        let shutdown = Arc::clone(&self.shutdown);
        self.listener_handle = Some(thread::spawn(move || {
            run_listener(listener, shutdown, state);
        }));

        log::info!("capsheetd listening on {}", addr);
        Ok(())
    }

    pub fn stop(&mut self) {
        if !self.is_running() {
            return;
        }

        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.listener_handle.take() {
            let _ = handle.join();
        }
        self.bound_addr = None;

        log::info!("capsheetd stopped");
    }

    pub fn is_running(&self) -> bool {
        self.listener_handle.is_some() && !self.shutdown.load(Ordering::SeqCst)
    }

    pub fn bound_addr(&self) -> Option<SocketAddr> {
        self.bound_addr
    }

    /// Block until the listener thread exits.
    pub fn join(&mut self) {
        if let Some(handle) = self.listener_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_listener(listener: TcpListener, shutdown: Arc<AtomicBool>, state: AppState) {
    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, addr)) => {
                log::debug!("Accepted connection from {}", addr);
                let state = state.clone();
                thread::spawn(move || {
                    if let Err(e) = handle_connection(stream, &state) {
                        log::warn!("Connection error from {}: {}", addr, e);
                    }
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                log::error!("Accept error: {}", e);
                break;
            }
        }
    }
}

fn handle_connection(mut stream: TcpStream, state: &AppState) -> std::io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_millis(100)))?;
    stream.set_write_timeout(Some(Duration::from_secs(10)))?;

    let reader = BufReader::new(stream.try_clone()?);
    let mut lines = reader.lines();
    let mut greeted = false;
    let mut parse_failures: u32 = 0;

    loop {
        let line = match lines.next() {
            Some(Ok(line)) => line,
            Some(Err(ref e)) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
            Some(Err(ref e)) if e.kind() == std::io::ErrorKind::TimedOut => continue,
            Some(Err(e)) => return Err(e),
            None => return Ok(()), // Connection closed
        };

        // Oversized messages end the connection immediately
        if line.len() > MAX_MESSAGE_SIZE {
            send_error(&mut stream, None, ProtocolError::MessageTooLarge)?;
            log::warn!("Oversized message ({} bytes), disconnecting", line.len());
            return Ok(());
        }

        let msg: ClientMessage = match serde_json::from_str(&line) {
            Ok(m) => {
                parse_failures = 0;
                m
            }
            Err(e) => {
                parse_failures += 1;
                log::debug!("Malformed message ({}/{}): {}", parse_failures, MAX_PARSE_FAILURES, e);
                send_error(&mut stream, None, ProtocolError::MalformedMessage)?;
                if parse_failures >= MAX_PARSE_FAILURES {
                    log::warn!("Parse failure limit exceeded, disconnecting");
                    return Ok(());
                }
                continue;
            }
        };

        // First message must be hello
        if !greeted {
            match msg {
                ClientMessage::Hello(hello) => {
                    if hello.protocol_version > PROTOCOL_VERSION {
                        send_error(&mut stream, Some(hello.id), ProtocolError::ProtocolMismatch)?;
                        return Ok(());
                    }
                    greeted = true;
                    let response = ServerMessage::Welcome(WelcomeMessage {
                        id: hello.id,
                        protocol_version: hello.protocol_version.min(PROTOCOL_VERSION),
                        capabilities: dispatch::capabilities(),
                    });
                    send_message(&mut stream, &response)?;
                }
                _ => {
                    send_error(&mut stream, None, ProtocolError::MalformedMessage)?;
                    return Ok(());
                }
            }
            continue;
        }

        let response = dispatch::handle_message(state, msg);
        send_message(&mut stream, &response)?;
    }
}

fn send_message(stream: &mut TcpStream, msg: &ServerMessage) -> std::io::Result<()> {
    let json = serde_json::to_string(msg)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    writeln!(stream, "{}", json)?;
    stream.flush()
}

fn send_error(
    stream: &mut TcpStream,
    id: Option<String>,
    error: ProtocolError,
) -> std::io::Result<()> {
    let msg = ServerMessage::Error(error.to_error_message(id));
    send_message(stream, &msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ScriptedOracle;
    use capsheet_oracle::OracleError;
    use std::io::{BufRead, BufReader, Write};

    fn start_daemon(responses: Vec<Result<String, OracleError>>) -> (Daemon, SocketAddr) {
        let state = AppState::new(Arc::new(ScriptedOracle::new(responses)));
        let mut daemon = Daemon::new();
        daemon.start(0, state).unwrap();
        let addr = daemon.bound_addr().unwrap();
        (daemon, addr)
    }

    fn connect_and_greet(addr: SocketAddr) -> (TcpStream, BufReader<TcpStream>) {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        let hello = serde_json::json!({
            "type": "hello",
            "id": "1",
            "client": "test",
            "version": "0.1.0",
            "protocol_version": 1
        });
        writeln!(stream, "{}", hello).unwrap();

        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut response = String::new();
        reader.read_line(&mut response).unwrap();
        let msg: ServerMessage = serde_json::from_str(&response).unwrap();
        assert!(matches!(msg, ServerMessage::Welcome(_)));

        (stream, reader)
    }

    #[test]
    fn test_daemon_lifecycle() {
        let (mut daemon, _addr) = start_daemon(vec![]);
        assert!(daemon.is_running());
        daemon.stop();
        assert!(!daemon.is_running());
    }

    #[test]
    fn test_hello_then_ping() {
        let (mut daemon, addr) = start_daemon(vec![]);
        let (mut stream, mut reader) = connect_and_greet(addr);

        let ping = serde_json::json!({"type": "ping", "id": "2"});
        writeln!(stream, "{}", ping).unwrap();

        let mut response = String::new();
        reader.read_line(&mut response).unwrap();
        let msg: ServerMessage = serde_json::from_str(&response).unwrap();
        assert!(matches!(msg, ServerMessage::Pong(_)));

        daemon.stop();
    }

    #[test]
    fn test_first_message_must_be_hello() {
        let (mut daemon, addr) = start_daemon(vec![]);
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        let ping = serde_json::json!({"type": "ping", "id": "1"});
        writeln!(stream, "{}", ping).unwrap();

        let mut reader = BufReader::new(stream);
        let mut response = String::new();
        reader.read_line(&mut response).unwrap();
        let msg: ServerMessage = serde_json::from_str(&response).unwrap();
        match msg {
            ServerMessage::Error(e) => assert_eq!(e.code, "malformed_message"),
            other => panic!("expected error, got {:?}", other),
        }

        daemon.stop();
    }

    #[test]
    fn test_protocol_mismatch_rejected() {
        let (mut daemon, addr) = start_daemon(vec![]);
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        let hello = serde_json::json!({
            "type": "hello",
            "id": "1",
            "client": "test",
            "version": "0.1.0",
            "protocol_version": 99
        });
        writeln!(stream, "{}", hello).unwrap();

        let mut reader = BufReader::new(stream);
        let mut response = String::new();
        reader.read_line(&mut response).unwrap();
        let msg: ServerMessage = serde_json::from_str(&response).unwrap();
        match msg {
            ServerMessage::Error(e) => assert_eq!(e.code, "protocol_mismatch"),
            other => panic!("expected error, got {:?}", other),
        }

        daemon.stop();
    }

    #[test]
    fn test_parse_failures_disconnect() {
        let (mut daemon, addr) = start_daemon(vec![]);
        let (mut stream, mut reader) = connect_and_greet(addr);

        for i in 0..MAX_PARSE_FAILURES {
            writeln!(stream, "{{invalid json {}", i).unwrap();
            let mut response = String::new();
            let result = reader.read_line(&mut response);
            if i < MAX_PARSE_FAILURES - 1 {
                assert!(result.is_ok());
                assert!(response.contains("malformed_message"));
            }
        }

        // Connection should be closed now
        thread::sleep(Duration::from_millis(100));
        let mut response = String::new();
        let result = reader.read_line(&mut response);
        assert!(result.is_err() || response.is_empty());

        daemon.stop();
    }

    #[test]
    fn test_chat_over_tcp() {
        let (mut daemon, addr) = start_daemon(vec![Ok("{}".to_string())]);
        let (mut stream, mut reader) = connect_and_greet(addr);

        let chat = serde_json::json!({
            "type": "chat",
            "id": "2",
            "message": "start a funding round"
        });
        writeln!(stream, "{}", chat).unwrap();

        let mut response = String::new();
        reader.read_line(&mut response).unwrap();
        let msg: ServerMessage = serde_json::from_str(&response).unwrap();
        match msg {
            ServerMessage::ChatResult(r) => {
                assert!(!r.session_id.is_empty());
                assert!(r.assistant_message.is_some());
            }
            other => panic!("expected chat result, got {:?}", other),
        }

        daemon.stop();
    }
}
