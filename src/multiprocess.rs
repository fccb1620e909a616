//! Cross-process statistics transport
//!
//! The coordinator process listens on a localhost UDP socket. Workers keep a
//! buffer of per-function deltas and a background thread pushes it to the
//! coordinator every flush interval. Messages are JSON datagrams.

use crate::{
    registry::{FuncCallEvent, UsageRecord},
    result::{Result, SqlFnError},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Address of the coordinator's listener, inherited by child processes
pub const REGISTRY_ADDR_ENV: &str = "SQLFN_REGISTRY_ADDR";
/// Pid of the coordinator process
pub const REGISTRY_PID_ENV: &str = "SQLFN_REGISTRY_PID";

const MAX_DATAGRAM: usize = 65_507;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum Message {
    Register { name: String },
    Delta { name: String, record: UsageRecord },
    Stop,
}

pub(crate) fn default_bind_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
}

/// Coordinator address inherited through the environment, unless this process is the coordinator
pub fn coordinator_from_env() -> Option<SocketAddr> {
    let raw = std::env::var(REGISTRY_ADDR_ENV).ok()?;
    if let Ok(pid) = std::env::var(REGISTRY_PID_ENV) {
        if pid.trim().parse::<u32>().ok() == Some(std::process::id()) {
            return None;
        }
    }
    match raw.trim().parse() {
        Ok(addr) => Some(addr),
        Err(e) => {
            tracing::warn!(value = %raw, error = %e, "ignoring malformed {REGISTRY_ADDR_ENV}");
            None
        }
    }
}

pub(crate) fn child_env(addr: SocketAddr) -> Vec<(String, String)> {
    vec![
        (REGISTRY_ADDR_ENV.to_string(), addr.to_string()),
        (REGISTRY_PID_ENV.to_string(), std::process::id().to_string()),
    ]
}

fn reachable(addr: SocketAddr) -> SocketAddr {
    if addr.ip().is_unspecified() {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
    } else {
        addr
    }
}

fn send_message(socket: &UdpSocket, target: SocketAddr, message: &Message) -> Result<()> {
    let bytes = serde_json::to_vec(message)?;
    if bytes.len() > MAX_DATAGRAM {
        return Err(SqlFnError::new_configuration(format!(
            "registry message of {} bytes exceeds a single datagram",
            bytes.len()
        )));
    }
    socket.send_to(&bytes, target)?;
    Ok(())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Listener side, owned by the coordinator's registry
pub(crate) struct Coordinator {
    addr: SocketAddr,
    handle: Option<JoinHandle<()>>,
}

impl Coordinator {
    /// Bind and start the listener thread; `sink` returns false to stop listening
    pub(crate) fn start<F>(bind: SocketAddr, mut sink: F) -> Result<Self>
    where
        F: FnMut(Message) -> bool + Send + 'static,
    {
        let socket = UdpSocket::bind(bind)?;
        let addr = socket.local_addr()?;
        let handle = thread::Builder::new()
            .name("sqlfn-registry-listener".to_string())
            .spawn(move || {
                let mut buf = vec![0u8; MAX_DATAGRAM];
                loop {
                    let len = match socket.recv_from(&mut buf) {
                        Ok((len, _)) => len,
                        Err(e) => {
                            tracing::warn!(error = %e, "registry listener stopped");
                            break;
                        }
                    };
                    match serde_json::from_slice::<Message>(&buf[..len]) {
                        Ok(Message::Stop) => break,
                        Ok(message) => {
                            if !sink(message) {
                                break;
                            }
                        }
                        Err(e) => tracing::debug!(error = %e, "ignoring malformed registry datagram"),
                    }
                }
            })?;
        Ok(Coordinator {
            addr,
            handle: Some(handle),
        })
    }

    pub(crate) fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub(crate) fn stop(self) {
        drop(self);
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let stopped = UdpSocket::bind(default_bind_addr())
            .map_err(SqlFnError::from)
            .and_then(|socket| send_message(&socket, reachable(self.addr), &Message::Stop));
        if let Err(e) = stopped {
            tracing::warn!(error = %e, "could not stop registry listener");
            return;
        }
        if handle.thread().id() != thread::current().id() {
            let _ = handle.join();
        }
    }
}

struct Outbox {
    socket: UdpSocket,
    target: SocketAddr,
    pending: Mutex<HashMap<String, UsageRecord>>,
}

impl Outbox {
    fn flush(&self) -> Result<()> {
        let drained: Vec<(String, UsageRecord)> = lock(&self.pending).drain().collect();
        let mut failed = None;
        for (name, record) in drained {
            if failed.is_some() {
                self.requeue(name, &record);
                continue;
            }
            let message = Message::Delta { name, record };
            if let Err(e) = send_message(&self.socket, self.target, &message) {
                if let Message::Delta { name, record } = message {
                    self.requeue(name, &record);
                }
                failed = Some(e);
            }
        }
        match failed {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn requeue(&self, name: String, record: &UsageRecord) {
        lock(&self.pending).entry(name).or_default().merge(record);
    }
}

/// Worker side: buffers deltas and pushes them to the coordinator
pub(crate) struct Contributor {
    outbox: Arc<Outbox>,
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Contributor {
    pub(crate) fn start(target: SocketAddr, interval: Duration) -> Result<Self> {
        let target = reachable(target);
        let bind = match target {
            SocketAddr::V4(_) => default_bind_addr(),
            SocketAddr::V6(_) => "[::1]:0".parse().map_err(|e| {
                SqlFnError::new_configuration(format!("invalid bind address: {e}"))
            })?,
        };
        let outbox = Arc::new(Outbox {
            socket: UdpSocket::bind(bind)?,
            target,
            pending: Mutex::new(HashMap::new()),
        });

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let flusher = outbox.clone();
        let handle = thread::Builder::new()
            .name("sqlfn-registry-flusher".to_string())
            .spawn(move || {
                loop {
                    let stop = match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => false,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
                    };
                    if let Err(e) = flusher.flush() {
                        tracing::warn!(error = %e, "registry delta push failed");
                    }
                    if stop {
                        break;
                    }
                }
            })?;

        Ok(Contributor {
            outbox,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub(crate) fn target(&self) -> SocketAddr {
        self.outbox.target
    }

    pub(crate) fn register(&self, name: &str) {
        let message = Message::Register {
            name: name.to_string(),
        };
        if let Err(e) = send_message(&self.outbox.socket, self.outbox.target, &message) {
            tracing::debug!(func = %name, error = %e, "could not announce function to coordinator");
        }
    }

    pub(crate) fn buffer(&self, event: &FuncCallEvent) {
        lock(&self.outbox.pending)
            .entry(event.func_name.clone())
            .or_default()
            .apply(event);
    }

    pub(crate) fn buffer_record(&self, name: &str, record: &UsageRecord) {
        self.outbox.requeue(name.to_string(), record);
    }

    pub(crate) fn flush(&self) -> Result<()> {
        self.outbox.flush()
    }

    pub(crate) fn stop(self) {
        drop(self);
    }
}

impl Drop for Contributor {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}
