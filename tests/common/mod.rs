#![allow(dead_code)]

use arm_relay::domain::model::PortInfo;
use arm_relay::domain::ports::{LinkSettings, SerialBackend, SerialLink};
use arm_relay::core::session::SessionConfig;
use arm_relay::{DeviceSession, RelayError, Result};
use std::collections::HashMap;
use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

enum Inbound {
    Bytes(Vec<u8>),
    Fail(io::ErrorKind),
}

#[derive(Default)]
struct MockState {
    ports: Vec<PortInfo>,
    fail_list: bool,
    list_delay: Option<Duration>,
    open_error: Option<String>,
    fail_writes: HashMap<usize, io::ErrorKind>,
    fail_close: bool,
    write_count: usize,
    writes: Vec<(Instant, Vec<u8>)>,
    log: Vec<String>,
    inbound: Option<mpsc::Sender<Inbound>>,
}

/// In-memory serial backend that records every call.
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ports(self, paths: &[&str]) -> Self {
        self.state.lock().unwrap().ports = paths
            .iter()
            .map(|p| PortInfo {
                path: p.to_string(),
                manufacturer: Some("wch.cn".to_string()),
                vendor_id: Some("1a86".to_string()),
                product_id: Some("7523".to_string()),
            })
            .collect();
        self
    }

    pub fn fail_listing(&self) {
        self.state.lock().unwrap().fail_list = true;
    }

    pub fn delay_listing(&self, delay: Duration) {
        self.state.lock().unwrap().list_delay = Some(delay);
    }

    pub fn fail_open(&self, reason: &str) {
        self.state.lock().unwrap().open_error = Some(reason.to_string());
    }

    /// Makes the n-th write (0-based, counted across links) fail.
    pub fn fail_write(&self, index: usize, kind: io::ErrorKind) {
        self.state.lock().unwrap().fail_writes.insert(index, kind);
    }

    pub fn fail_close(&self) {
        self.state.lock().unwrap().fail_close = true;
    }

    /// Pushes raw bytes into the currently open link's read side.
    pub fn feed(&self, bytes: &[u8]) {
        if let Some(tx) = &self.state.lock().unwrap().inbound {
            let _ = tx.send(Inbound::Bytes(bytes.to_vec()));
        }
    }

    /// Makes the current link's next read fail.
    pub fn break_reader(&self, kind: io::ErrorKind) {
        if let Some(tx) = &self.state.lock().unwrap().inbound {
            let _ = tx.send(Inbound::Fail(kind));
        }
    }

    pub fn written(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .writes
            .iter()
            .map(|(_, bytes)| String::from_utf8_lossy(bytes).into_owned())
            .collect()
    }

    pub fn write_times(&self) -> Vec<Instant> {
        self.state
            .lock()
            .unwrap()
            .writes
            .iter()
            .map(|(at, _)| *at)
            .collect()
    }

    pub fn write_attempts(&self) -> usize {
        self.state.lock().unwrap().write_count
    }

    /// Ordered log of `open:<path>` and `close:<path>` calls.
    pub fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn open_calls(&self) -> usize {
        self.log().iter().filter(|e| e.starts_with("open:")).count()
    }
}

impl SerialBackend for MockBackend {
    fn list_ports(&self) -> Result<Vec<PortInfo>> {
        let (delay, fail, ports) = {
            let state = self.state.lock().unwrap();
            (state.list_delay, state.fail_list, state.ports.clone())
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if fail {
            return Err(RelayError::EnumerationError {
                message: "enumeration tool crashed".to_string(),
            });
        }
        Ok(ports)
    }

    fn open(&self, path: &str, settings: &LinkSettings) -> Result<Box<dyn SerialLink>> {
        assert_eq!(settings.baud_rate, 115_200);

        let mut state = self.state.lock().unwrap();
        state.log.push(format!("open:{}", path));
        if let Some(reason) = &state.open_error {
            return Err(RelayError::OpenError {
                path: path.to_string(),
                reason: reason.clone(),
            });
        }

        let (tx, rx) = mpsc::channel();
        state.inbound = Some(tx);

        Ok(Box::new(MockLink {
            path: path.to_string(),
            state: self.state.clone(),
            inbound: Some(rx),
        }))
    }
}

struct MockLink {
    path: String,
    state: Arc<Mutex<MockState>>,
    inbound: Option<mpsc::Receiver<Inbound>>,
}

impl SerialLink for MockLink {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        let index = state.write_count;
        state.write_count += 1;
        if let Some(kind) = state.fail_writes.get(&index) {
            return Err(io::Error::new(*kind, "injected write failure"));
        }
        state.writes.push((Instant::now(), bytes.to_vec()));
        Ok(())
    }

    fn reader(&mut self) -> io::Result<Box<dyn io::Read + Send>> {
        let rx = self
            .inbound
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "reader already taken"))?;
        Ok(Box::new(MockReader {
            rx,
            pending: Vec::new(),
        }))
    }

    fn close(self: Box<Self>) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.log.push(format!("close:{}", self.path));
        state.inbound = None;
        if state.fail_close {
            return Err(io::Error::new(io::ErrorKind::Other, "injected close failure"));
        }
        Ok(())
    }
}

struct MockReader {
    rx: mpsc::Receiver<Inbound>,
    pending: Vec<u8>,
}

impl io::Read for MockReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv_timeout(Duration::from_millis(10)) {
                Ok(Inbound::Bytes(bytes)) => self.pending = bytes,
                Ok(Inbound::Fail(kind)) => return Err(io::Error::new(kind, "injected read failure")),
                Err(RecvTimeoutError::Timeout) => return Err(io::ErrorKind::TimedOut.into()),
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }

        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

pub fn spawn_session(backend: &MockBackend) -> DeviceSession {
    DeviceSession::spawn(
        Arc::new(backend.clone()),
        SessionConfig {
            link: LinkSettings::default(),
            list_timeout: Duration::from_millis(200),
        },
    )
}

/// Polls `check` until it holds or two seconds pass.
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
