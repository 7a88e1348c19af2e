//! The single serial connection, owned by one actor task.
//!
//! Every client shares one [`DeviceSession`] handle. Open, write and close
//! requests are queued to the actor, which runs the blocking serial calls on
//! the blocking pool one at a time, so a reopen always finishes closing the
//! previous link before the new one is attempted. A dedicated reader thread
//! per link turns inbound bytes into lines and hands them to the `on_line`
//! callback given at open time.

use crate::core::line_codec::LineDecoder;
use crate::domain::model::{CloseOutcome, DeviceState, PortInfo};
use crate::domain::ports::{LinkSettings, SerialBackend, SerialLink};
use crate::utils::error::{RelayError, Result};
use crate::utils::validation::validate_device_path;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

/// Receives every line read from the device.
pub type LineCallback = Arc<dyn Fn(String) + Send + Sync>;

const REQUEST_QUEUE_DEPTH: usize = 64;
const READ_CHUNK_BYTES: usize = 256;

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub link: LinkSettings,
    /// Upper bound on port enumeration.
    pub list_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            link: LinkSettings::default(),
            list_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: DeviceState,
    pub path: Option<String>,
}

enum Request {
    Open {
        path: String,
        on_line: LineCallback,
        reply: oneshot::Sender<Result<()>>,
    },
    Write {
        bytes: Vec<u8>,
        reply: oneshot::Sender<Result<()>>,
    },
    Close {
        reply: oneshot::Sender<CloseOutcome>,
    },
}

struct LinkFault {
    generation: u64,
    error: io::Error,
}

/// Cheap, cloneable handle to the device actor.
#[derive(Clone)]
pub struct DeviceSession {
    requests: mpsc::Sender<Request>,
    state: watch::Receiver<SessionSnapshot>,
    backend: Arc<dyn SerialBackend>,
    list_timeout: Duration,
}

impl DeviceSession {
    /// Starts the actor on the current Tokio runtime.
    pub fn spawn(backend: Arc<dyn SerialBackend>, config: SessionConfig) -> Self {
        let (requests_tx, requests_rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);
        let (faults_tx, faults_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionSnapshot {
            state: DeviceState::Closed,
            path: None,
        });

        let actor = SessionActor {
            backend: backend.clone(),
            settings: config.link,
            active: None,
            generation: 0,
            state_tx,
            faults_tx,
        };
        tokio::spawn(actor.run(requests_rx, faults_rx));

        Self {
            requests: requests_tx,
            state: state_rx,
            backend,
            list_timeout: config.list_timeout,
        }
    }

    /// Lists attached serial devices. Failures degrade to an empty list.
    pub async fn list_available(&self) -> Vec<PortInfo> {
        let backend = self.backend.clone();
        let task = tokio::task::spawn_blocking(move || backend.list_ports());

        match tokio::time::timeout(self.list_timeout, task).await {
            Ok(Ok(Ok(ports))) => {
                tracing::debug!("Found {} serial ports", ports.len());
                ports
            }
            Ok(Ok(Err(e))) => {
                tracing::warn!("Error listing serial ports: {}", e);
                Vec::new()
            }
            Ok(Err(e)) => {
                tracing::warn!("Serial port enumeration task failed: {}", e);
                Vec::new()
            }
            Err(_) => {
                tracing::warn!(
                    "Serial port enumeration timed out after {:?}",
                    self.list_timeout
                );
                Vec::new()
            }
        }
    }

    pub async fn open<F>(&self, path: &str, on_line: F) -> Result<()>
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        validate_device_path(path)?;

        let (reply, rx) = oneshot::channel();
        self.send(Request::Open {
            path: path.to_string(),
            on_line: Arc::new(on_line),
            reply,
        })
        .await?;
        rx.await.map_err(|_| RelayError::SessionClosed)?
    }

    pub async fn write(&self, bytes: &[u8]) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::Write {
            bytes: bytes.to_vec(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| RelayError::SessionClosed)?
    }

    pub async fn close(&self) -> Result<CloseOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::Close { reply }).await?;
        rx.await.map_err(|_| RelayError::SessionClosed)
    }

    pub fn is_open(&self) -> bool {
        self.state.borrow().state == DeviceState::Open
    }

    pub fn state(&self) -> DeviceState {
        self.state.borrow().state
    }

    pub fn active_path(&self) -> Option<String> {
        self.state.borrow().path.clone()
    }

    /// Watch channel that sees every state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.clone()
    }

    async fn send(&self, request: Request) -> Result<()> {
        self.requests
            .send(request)
            .await
            .map_err(|_| RelayError::SessionClosed)
    }
}

struct ActiveLink {
    path: String,
    generation: u64,
    // None only while a blocking write holds the link.
    link: Option<Box<dyn SerialLink>>,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

struct SessionActor {
    backend: Arc<dyn SerialBackend>,
    settings: LinkSettings,
    active: Option<ActiveLink>,
    generation: u64,
    state_tx: watch::Sender<SessionSnapshot>,
    faults_tx: mpsc::UnboundedSender<LinkFault>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut requests: mpsc::Receiver<Request>,
        mut faults: mpsc::UnboundedReceiver<LinkFault>,
    ) {
        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => self.handle(request).await,
                    None => break,
                },
                Some(fault) = faults.recv() => self.handle_fault(fault).await,
            }
        }

        tracing::debug!("All session handles dropped, shutting down device actor");
        self.close_active().await;
    }

    async fn handle(&mut self, request: Request) {
        match request {
            Request::Open {
                path,
                on_line,
                reply,
            } => {
                let result = self.open(path, on_line).await;
                let _ = reply.send(result);
            }
            Request::Write { bytes, reply } => {
                let result = self.write(bytes).await;
                let _ = reply.send(result);
            }
            Request::Close { reply } => {
                let outcome = self.close_active().await;
                let _ = reply.send(outcome);
            }
        }
    }

    async fn open(&mut self, path: String, on_line: LineCallback) -> Result<()> {
        if self.active.is_some() {
            tracing::info!("Closing previous port before opening {}", path);
            self.close_active().await;
        }

        self.publish(DeviceState::Opening, Some(path.clone()));

        let backend = self.backend.clone();
        let settings = self.settings;
        let target = path.clone();
        let opened = tokio::task::spawn_blocking(move || {
            let mut link = backend.open(&target, &settings)?;
            match link.reader() {
                Ok(reader) => Ok((link, reader)),
                Err(e) => {
                    let _ = link.close();
                    Err(RelayError::OpenError {
                        path: target,
                        reason: format!("cannot read from port: {}", e),
                    })
                }
            }
        })
        .await;

        let (link, reader) = match opened {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                tracing::error!("Error opening port {}: {}", path, e);
                self.publish(DeviceState::Closed, None);
                return Err(e);
            }
            Err(e) => {
                self.publish(DeviceState::Closed, None);
                return Err(RelayError::OpenError {
                    path,
                    reason: format!("open task failed: {}", e),
                });
            }
        };

        self.generation += 1;
        let stop = Arc::new(AtomicBool::new(false));
        let reader = spawn_reader(
            reader,
            on_line,
            stop.clone(),
            self.generation,
            self.faults_tx.clone(),
        );
        self.activate(path, link, stop, reader).await
    }

    async fn activate(
        &mut self,
        path: String,
        link: Box<dyn SerialLink>,
        stop: Arc<AtomicBool>,
        reader: io::Result<JoinHandle<()>>,
    ) -> Result<()> {
        let reader = match reader {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!("Failed to start reader for {}: {}", path, e);
                close_link(&path, link).await;
                self.publish(DeviceState::Closed, None);
                return Err(RelayError::OpenError {
                    path,
                    reason: format!("cannot start reader thread: {}", e),
                });
            }
        };

        tracing::info!(
            "Serial port {} opened successfully at {} baud",
            path,
            self.settings.baud_rate
        );
        self.active = Some(ActiveLink {
            path: path.clone(),
            generation: self.generation,
            link: Some(link),
            stop,
            reader: Some(reader),
        });
        self.publish(DeviceState::Open, Some(path));
        Ok(())
    }

    async fn write(&mut self, bytes: Vec<u8>) -> Result<()> {
        let Some(active) = self.active.as_mut() else {
            tracing::warn!("Serial port is not open");
            return Err(RelayError::NotOpenError);
        };
        let Some(mut link) = active.link.take() else {
            return Err(RelayError::NotOpenError);
        };

        tracing::debug!("Sending command: {:?}", String::from_utf8_lossy(&bytes));

        let joined = tokio::task::spawn_blocking(move || {
            let result = link.write_all(&bytes);
            (link, result)
        })
        .await;

        let result = match joined {
            Ok((link, result)) => {
                active.link = Some(link);
                result
            }
            Err(e) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("serial writer task failed: {}", e),
            )),
        };

        match result {
            Ok(()) => Ok(()),
            Err(e) if is_io_class(&e) => {
                tracing::error!("Error sending command: {}", e);
                self.fail().await;
                Err(RelayError::IoError(e))
            }
            Err(e) => {
                tracing::warn!("Error sending command: {}", e);
                Err(RelayError::WriteError(e))
            }
        }
    }

    async fn handle_fault(&mut self, fault: LinkFault) {
        let current = self
            .active
            .as_ref()
            .filter(|active| active.generation == fault.generation)
            .map(|active| active.path.clone());

        match current {
            Some(path) => {
                tracing::error!("Serial port error on {}: {}", path, fault.error);
                self.fail().await;
            }
            None => tracing::debug!(
                "Ignoring fault from stale link generation {}: {}",
                fault.generation,
                fault.error
            ),
        }
    }

    async fn fail(&mut self) {
        let path = self.active.as_ref().map(|a| a.path.clone());
        self.publish(DeviceState::Error, path);
        self.close_active().await;
    }

    async fn close_active(&mut self) -> CloseOutcome {
        let Some(mut active) = self.active.take() else {
            tracing::debug!("Serial port was not open");
            self.publish(DeviceState::Closed, None);
            return CloseOutcome::AlreadyClosed;
        };

        self.publish(DeviceState::Closing, Some(active.path.clone()));
        active.stop.store(true, Ordering::Release);

        if let Some(link) = active.link.take() {
            close_link(&active.path, link).await;
        }
        // 等讀取執行緒放掉複製的 fd 再回報關閉
        if let Some(reader) = active.reader.take() {
            let joined = tokio::task::spawn_blocking(move || reader.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                tracing::warn!("Reader thread for {} did not exit cleanly", active.path);
            }
        }

        self.publish(DeviceState::Closed, None);
        CloseOutcome::Closed
    }

    fn publish(&self, state: DeviceState, path: Option<String>) {
        self.state_tx.send_replace(SessionSnapshot { state, path });
    }
}

async fn close_link(path: &str, link: Box<dyn SerialLink>) {
    match tokio::task::spawn_blocking(move || link.close()).await {
        Ok(Ok(())) => tracing::info!("Serial port {} closed successfully", path),
        Ok(Err(e)) => tracing::warn!("Error closing serial port {}: {}", path, e),
        Err(e) => tracing::warn!("Close task for {} failed: {}", path, e),
    }
}

fn spawn_reader(
    reader: Box<dyn Read + Send>,
    on_line: LineCallback,
    stop: Arc<AtomicBool>,
    generation: u64,
    faults: mpsc::UnboundedSender<LinkFault>,
) -> io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(format!("serial-reader-{}", generation))
        .spawn(move || read_lines(reader, on_line, stop, generation, faults))
}

fn read_lines(
    mut reader: Box<dyn Read + Send>,
    on_line: LineCallback,
    stop: Arc<AtomicBool>,
    generation: u64,
    faults: mpsc::UnboundedSender<LinkFault>,
) {
    let mut decoder = LineDecoder::new();
    let mut buf = [0u8; READ_CHUNK_BYTES];

    while !stop.load(Ordering::Acquire) {
        let error = match reader.read(&mut buf) {
            Ok(0) => io::Error::new(io::ErrorKind::UnexpectedEof, "serial device closed"),
            Ok(n) => {
                for line in decoder.push(&buf[..n]) {
                    if stop.load(Ordering::Acquire) {
                        return;
                    }
                    tracing::debug!("Received from serial: {}", line);
                    on_line(line);
                }
                continue;
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                continue
            }
            Err(e) => e,
        };

        if !stop.load(Ordering::Acquire) {
            let _ = faults.send(LinkFault { generation, error });
        }
        return;
    }
}

/// Errors meaning the device itself is gone or unusable.
pub(crate) fn is_io_class(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof
    ) {
        return true;
    }

    // EIO, ENXIO, ENODEV
    #[cfg(unix)]
    let device_gone: &[i32] = &[5, 6, 19];
    // ERROR_GEN_FAILURE, ERROR_DEVICE_NOT_CONNECTED
    #[cfg(not(unix))]
    let device_gone: &[i32] = &[31, 1167];

    err.raw_os_error()
        .is_some_and(|code| device_gone.contains(&code))
}
