//! Scripted mock Solys2 server for connection-level tests.
//!
//! [`MockSolys`] listens on a random localhost port and answers each
//! CR-terminated command through a responder closure. Connections are served
//! one at a time, which matches the single-session client.

#![allow(dead_code)]

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use hardware::solys::ConnectionConfig;

/// What the mock does with one command.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Write these lines, each terminated with CR.
    Reply(String),
    /// Say nothing and keep the socket open.
    Silent,
    /// Close the socket without answering.
    Disconnect,
}

pub fn reply(text: impl Into<String>) -> Response {
    Response::Reply(text.into())
}

/// A command as received, tagged with the 0-based connection it arrived on.
#[derive(Debug, Clone, PartialEq)]
pub struct Received {
    pub connection: usize,
    pub command: String,
}

pub struct MockSolys {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<Received>>>,
    connections: Arc<AtomicUsize>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MockSolys {
    /// Serve every command with [`standard_reply`].
    pub fn standard() -> Self {
        Self::start(|_, command| standard_reply(command))
    }

    pub fn start<F>(mut responder: F) -> Self
    where
        F: FnMut(usize, &str) -> Response + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        listener.set_nonblocking(true).expect("nonblocking listener");
        let addr = listener.local_addr().expect("local addr");

        let received = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let received = received.clone();
            let connections = connections.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    match listener.accept() {
                        Ok((stream, _)) => {
                            let index = connections.fetch_add(1, Ordering::SeqCst);
                            serve(stream, index, &mut responder, &received, &stop);
                        }
                        Err(e) if e.kind() == ErrorKind::WouldBlock => {
                            thread::sleep(Duration::from_millis(2));
                        }
                        Err(_) => break,
                    }
                }
            })
        };

        Self {
            addr,
            received,
            connections,
            stop,
            handle: Some(handle),
        }
    }

    /// Client config with short timeouts so recovery paths run quickly.
    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig {
            host: "127.0.0.1".to_string(),
            port: self.addr.port(),
            read_timeout_ms: 50,
            empty_reply_threshold: 4,
            reconnect_pause_ms: 10,
            connect_timeout_ms: 1000,
            ..ConnectionConfig::default()
        }
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<Received> {
        self.received.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.received().into_iter().map(|r| r.command).collect()
    }

    /// Commands received on one connection.
    pub fn commands_on(&self, connection: usize) -> Vec<String> {
        self.received()
            .into_iter()
            .filter(|r| r.connection == connection)
            .map(|r| r.command)
            .collect()
    }
}

impl Drop for MockSolys {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn serve<F>(
    mut stream: TcpStream,
    index: usize,
    responder: &mut F,
    received: &Mutex<Vec<Received>>,
    stop: &AtomicBool,
) where
    F: FnMut(usize, &str) -> Response,
{
    stream.set_nonblocking(false).expect("blocking stream");
    stream
        .set_read_timeout(Some(Duration::from_millis(10)))
        .expect("read timeout");

    let mut buffer = Vec::new();
    let mut chunk = [0u8; 256];

    while !stop.load(Ordering::SeqCst) {
        match stream.read(&mut chunk) {
            Ok(0) => return,
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
            Err(_) => return,
        }

        while let Some(end) = buffer.iter().position(|&b| b == b'\r') {
            let line: Vec<u8> = buffer.drain(..=end).collect();
            let command = String::from_utf8_lossy(&line[..end]).trim().to_string();
            received.lock().unwrap().push(Received {
                connection: index,
                command: command.clone(),
            });

            match responder(index, &command) {
                Response::Reply(text) => {
                    let mut out = Vec::new();
                    for line in text.split('\r') {
                        out.extend_from_slice(line.as_bytes());
                        out.push(b'\r');
                    }
                    if stream.write_all(&out).is_err() {
                        return;
                    }
                }
                Response::Silent => {}
                Response::Disconnect => return,
            }
        }
    }
}

/// Plausible answers for a healthy tracker.
pub fn standard_reply(command: &str) -> Response {
    let mut tokens = command.split_whitespace();
    let mnemonic = tokens.next().unwrap_or_default();
    let has_args = tokens.next().is_some();

    match (mnemonic, has_args) {
        ("VE", _) => reply("VE 3.2.1 MOCK"),
        ("CP", _) => reply("CP 120.5 30.25"),
        ("PO", false) => reply("PO 120.5 30.25"),
        ("IS", _) => reply("IS 1 0188"),
        ("AD", false) => reply("AD 0.05 -0.1"),
        ("LL", _) => reply("LL 41.6636 -4.7058 1013.2"),
        ("PS", false) => reply("PS 0"),
        ("QS", _) => reply("QS 0 2"),
        ("FU", false) => reply("FU 1"),
        ("SI", _) => reply("SI 1.5 1.4 1.6 1.5 6.0"),
        ("TI", _) => reply("TI 2024 60 13 5 30"),
        (other, _) => reply(other),
    }
}
