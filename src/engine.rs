//! # Connection Engine
//!
//! Owns the listening endpoint, the client registry and the full connection
//! lifecycle: accept, receive, assemble, send, destroy.
//!
//! ## Pipeline
//!
//! ```text
//! acceptor ──▶ read task (1 per client) ──▶ assembly queue ──▶ worker pool
//!                     ▲                                            │
//!                     └──────────── re-arm after feed ◀────────────┘
//!                                                                  │
//!                              request queue ◀── parsed envelopes ─┘
//! ```
//!
//! Each client has at most one outstanding read; the worker re-arms it only
//! after the assembler has consumed the buffer. That rule is the engine's
//! flow control and what makes a multi-worker pool safe without per-client
//! locking in the assembler.
//!
//! ## Lifecycle
//!
//! Every in-flight I/O task and every transient accessor holds a
//! [`ClientRef`]. A client is destroyed (registry removal, socket close,
//! assembler state release) only when its disconnect latch is set and the
//! last reference drops. The latch is only ever flipped while holding a
//! reference, so the predicate is re-evaluated on that reference's release.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::assembler::MessageAssembler;
use crate::client::{Client, ClientId};
use crate::config::ServerConfig;
use crate::defaults::{MAX_BUFFER_LENGTH_FOR_REQUESTS, MAX_CONNECTION_QUEUE};
use crate::error::ServerError;
use crate::queue::{RequestEnvelope, WorkQueue};

/// State shared by the engine handle and every spawned task.
struct Shared<A: MessageAssembler> {
    assembler: A,
    config: ServerConfig,
    registry: RwLock<HashMap<ClientId, Arc<Client>>>,
    assembly_queue: WorkQueue<ClientId>,
    request_queue: WorkQueue<RequestEnvelope<A::Message>>,
    next_id: AtomicU64,
    listening: AtomicBool,
    shutdown: watch::Sender<bool>,
    local_addr: parking_lot::Mutex<Option<SocketAddr>>,
}

/// RAII reference to a client. Dropping it releases the reference and, when
/// the destruction predicate holds, destroys the client.
struct ClientRef<A: MessageAssembler> {
    client: Arc<Client>,
    shared: Arc<Shared<A>>,
}

impl<A: MessageAssembler> ClientRef<A> {
    /// Take a new reference.
    fn acquire(client: Arc<Client>, shared: Arc<Shared<A>>) -> Self {
        client.acquire_ref();
        Self { client, shared }
    }

    /// Wrap a reference that is already counted (the accept reference a
    /// client is born with).
    fn adopt(client: Arc<Client>, shared: Arc<Shared<A>>) -> Self {
        Self { client, shared }
    }
}

impl<A: MessageAssembler> Drop for ClientRef<A> {
    fn drop(&mut self) {
        if self.client.release_ref() == 0 && self.client.is_disconnecting() {
            destroy(&self.shared, &self.client);
        }
    }
}

/// Remove the client from the registry and close its socket. Runs at most
/// once per client: the predicate can only hold for one final release.
fn destroy<A: MessageAssembler>(shared: &Arc<Shared<A>>, client: &Arc<Client>) {
    let removed = shared.registry.write().remove(&client.id());
    if removed.is_none() {
        return;
    }
    shared.assembler.release(client.id());
    // No reference remains, so nothing can hold the writer lock.
    if let Ok(mut writer) = client.writer.try_lock() {
        *writer = None;
    }
    debug!(
        "client {} destroyed ({}:{})",
        client.id(),
        client.peer_ip(),
        client.peer_port()
    );
}

/// The connection engine. Constructed idle; [`start`](Self::start) binds the
/// endpoint and spawns the acceptor and worker tasks.
pub struct ConnectionEngine<A: MessageAssembler> {
    shared: Arc<Shared<A>>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl<A: MessageAssembler> ConnectionEngine<A> {
    pub fn new(config: ServerConfig, assembler: A) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                assembler,
                config,
                registry: RwLock::new(HashMap::new()),
                assembly_queue: WorkQueue::new(),
                request_queue: WorkQueue::new(),
                next_id: AtomicU64::new(1),
                listening: AtomicBool::new(false),
                shutdown,
                local_addr: parking_lot::Mutex::new(None),
            }),
            tasks: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Bind, listen and begin accepting. A second call while running is a
    /// no-op.
    pub async fn start(&self) -> Result<(), ServerError> {
        if self.shared.listening.swap(true, Ordering::SeqCst) {
            debug!("start requested while already listening");
            return Ok(());
        }

        let listener = match bind_listener(&self.shared.config) {
            Ok(listener) => listener,
            Err(e) => {
                self.shared.listening.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        let local = listener.local_addr().map_err(|source| {
            self.shared.listening.store(false, Ordering::SeqCst);
            ServerError::SocketInit { source }
        })?;
        *self.shared.local_addr.lock() = Some(local);
        let _ = self.shared.shutdown.send(false);

        info!(
            "listening on {} with {} assembler workers",
            local, self.shared.config.workers
        );

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(acceptor(self.shared.clone(), listener)));
        for idx in 0..self.shared.config.workers {
            tasks.push(tokio::spawn(worker(self.shared.clone(), idx)));
        }
        Ok(())
    }

    /// Cooperative shutdown: stop accepting, wake every loop, mark all
    /// clients disconnecting and wait for the reference graph to drain.
    pub async fn stop(&self) {
        if !self.shared.listening.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("shutting down");
        let _ = self.shared.shutdown.send(true);

        let clients: Vec<Arc<Client>> = self.shared.registry.read().values().cloned().collect();
        for client in clients {
            let guard = ClientRef::acquire(client.clone(), self.shared.clone());
            client.begin_disconnect();
            drop(guard);
        }

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let remaining = self.shared.registry.read().len();
            if remaining == 0 {
                break;
            }
            if Instant::now() >= deadline {
                warn!("shutdown timed out with {} clients still draining", remaining);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        info!("server stopped");
    }

    /// Queue a complete outbound message for a client. Unknown or draining
    /// clients are logged and skipped; oversized messages disconnect the
    /// client and are dropped.
    pub fn send(&self, id: ClientId, bytes: Vec<u8>) {
        let client = self.shared.registry.read().get(&id).cloned();
        let Some(client) = client else {
            warn!("send requested for unknown client {}", id);
            return;
        };
        if client.is_disconnecting() {
            warn!("send requested for disconnecting client {}", id);
            return;
        }
        if bytes.len() > MAX_BUFFER_LENGTH_FOR_REQUESTS {
            error!(
                "dropping {} byte message for client {}: exceeds the {} byte send limit",
                bytes.len(),
                id,
                MAX_BUFFER_LENGTH_FOR_REQUESTS
            );
            let guard = ClientRef::acquire(client.clone(), self.shared.clone());
            client.begin_disconnect();
            drop(guard);
            return;
        }
        let guard = ClientRef::acquire(client.clone(), self.shared.clone());
        enqueue_send(&self.shared, &client, bytes);
        drop(guard);
    }

    /// Blocking pop of the next parsed request envelope.
    pub async fn next(&self) -> RequestEnvelope<A::Message> {
        self.shared.request_queue.pop().await
    }

    /// Write one fixed-width row per live client.
    pub fn show_clients(&self, out: &mut dyn io::Write) -> io::Result<()> {
        let registry = self.shared.registry.read();
        writeln!(
            out,
            "{:<10} | {:<22} | {:<6} | {:<4} | {:<13}",
            "id", "ip", "port", "refs", "disconnecting"
        )?;
        writeln!(out, "{}", "-".repeat(67))?;
        let mut clients: Vec<_> = registry.values().collect();
        clients.sort_by_key(|c| c.id());
        for client in clients {
            writeln!(
                out,
                "{:<10} | {:<22} | {:<6} | {:<4} | {:<13}",
                client.id(),
                client.peer_ip(),
                client.peer_port(),
                client.reference_count(),
                client.is_disconnecting()
            )?;
        }
        Ok(())
    }

    pub fn ip(&self) -> &str {
        &self.shared.config.address
    }

    pub fn port(&self) -> u16 {
        self.shared.config.port
    }

    /// The actually bound address, once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.shared.local_addr.lock()
    }

    pub fn client_count(&self) -> usize {
        self.shared.registry.read().len()
    }
}

/// Build the listener through socket2 so the backlog is exactly the
/// configured connection queue.
fn bind_listener(config: &ServerConfig) -> Result<TcpListener, ServerError> {
    let addr = SocketAddr::from((config.ipv4(), config.port));
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
        .map_err(|source| ServerError::SocketInit { source })?;
    socket
        .set_reuse_address(true)
        .map_err(|source| ServerError::SocketInit { source })?;
    socket
        .bind(&addr.into())
        .map_err(|source| ServerError::Bind { addr, source })?;
    socket
        .listen(MAX_CONNECTION_QUEUE)
        .map_err(|source| ServerError::Listen { addr, source })?;
    socket
        .set_nonblocking(true)
        .map_err(|source| ServerError::SocketInit { source })?;
    TcpListener::from_std(socket.into()).map_err(|source| ServerError::SocketInit { source })
}

async fn acceptor<A: MessageAssembler>(shared: Arc<Shared<A>>, listener: TcpListener) {
    let mut shutdown = shared.shutdown.subscribe();
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => accept_client(&shared, stream, peer),
                Err(e) => {
                    error!("accept failed: {}", e);
                }
            }
        }
    }
    debug!("acceptor stopped");
}

fn accept_client<A: MessageAssembler>(
    shared: &Arc<Shared<A>>,
    stream: TcpStream,
    peer: SocketAddr,
) {
    let _ = stream.set_nodelay(true);
    let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
    let (read_half, write_half) = stream.into_split();

    // Born with one reference: the engine's accept reference.
    let client = Arc::new(Client::new(
        id,
        peer.ip().to_string(),
        peer.port(),
        write_half,
        MAX_BUFFER_LENGTH_FOR_REQUESTS,
    ));
    shared.registry.write().insert(id, client.clone());
    info!("accepted connection {} from {}", id, peer);

    let accept_ref = ClientRef::adopt(client.clone(), shared.clone());
    // Arm the first receive before the accept reference is released.
    let read_ref = ClientRef::acquire(client, shared.clone());
    tokio::spawn(read_loop(read_ref, read_half));
    drop(accept_ref);
}

/// Per-client read task. Holds one reference for its whole lifetime and owns
/// the read half; at most one receive is outstanding at any point, and the
/// next one is armed only after a worker has run the assembler.
async fn read_loop<A: MessageAssembler>(read_ref: ClientRef<A>, mut half: OwnedReadHalf) {
    let client = read_ref.client.clone();
    let shared = read_ref.shared.clone();
    let mut shutdown = shared.shutdown.subscribe();

    loop {
        if client.is_disconnecting() {
            break;
        }
        let mut buf = client.recv.lock().await;
        let outcome = tokio::select! {
            _ = client.abort.notified() => break,
            _ = shutdown.changed() => break,
            read = half.read(buf.spare_mut()) => read,
        };
        match outcome {
            Ok(0) => {
                debug!("client {} closed the connection", client.id());
                break;
            }
            Ok(n) => {
                buf.record_read(n);
                drop(buf);
                shared.assembly_queue.push(client.id());
            }
            Err(e) => {
                error!("receive failed for client {}: {}", client.id(), e);
                break;
            }
        }
        tokio::select! {
            _ = client.abort.notified() => break,
            _ = client.rearm.notified() => {}
        }
    }

    client.begin_disconnect();
    // read_ref drops here and re-checks the destruction predicate.
}

/// Assembler worker: pop a client id, run the assembler over its buffer,
/// forward completed messages and re-arm the receive.
async fn worker<A: MessageAssembler>(shared: Arc<Shared<A>>, idx: usize) {
    let mut shutdown = shared.shutdown.subscribe();
    debug!("assembler worker {} started", idx);
    loop {
        let id = tokio::select! {
            _ = shutdown.changed() => break,
            id = shared.assembly_queue.pop() => id,
        };
        let client = shared.registry.read().get(&id).cloned();
        let Some(client) = client else {
            debug!("client {} vanished before assembly", id);
            continue;
        };
        if client.is_disconnecting() {
            continue;
        }

        let guard = ClientRef::acquire(client.clone(), shared.clone());
        let outcome = {
            let mut buf = client.recv.lock().await;
            shared.assembler.feed(id, &mut buf)
        };
        match outcome {
            Ok(messages) => {
                for message in messages {
                    shared.request_queue.push(RequestEnvelope {
                        client: client.info(),
                        message,
                    });
                }
                client.rearm.notify_one();
            }
            Err(err) => {
                warn!("disconnecting client {}: {}", id, err.reason);
                // Best effort: the error payload goes out before the close.
                enqueue_send(&shared, &client, err.response);
                client.begin_disconnect();
            }
        }
        drop(guard);
    }
    debug!("assembler worker {} stopped", idx);
}

/// Append to the client's outbound queue; the first message in flight spawns
/// the drain task that keeps sends serialized and FIFO.
fn enqueue_send<A: MessageAssembler>(shared: &Arc<Shared<A>>, client: &Arc<Client>, bytes: Vec<u8>) {
    let spawn_drain = {
        let mut state = client.send_state.lock();
        state.outbound.push_back(bytes);
        if state.sending {
            false
        } else {
            state.sending = true;
            true
        }
    };
    if spawn_drain {
        let drain_ref = ClientRef::acquire(client.clone(), shared.clone());
        tokio::spawn(drain_outbound(drain_ref));
    }
}

/// Pop-and-write until the outbound queue is empty, then clear `sending`.
/// Only one drain task exists per client at a time, which serializes send
/// completions in FIFO order.
async fn drain_outbound<A: MessageAssembler>(drain_ref: ClientRef<A>) {
    let client = drain_ref.client.clone();
    loop {
        let next = {
            let mut state = client.send_state.lock();
            match state.outbound.pop_front() {
                Some(bytes) => bytes,
                None => {
                    state.sending = false;
                    break;
                }
            }
        };
        let mut writer = client.writer.lock().await;
        let result = match writer.as_mut() {
            Some(w) => w.write_all(&next).await,
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "socket closed")),
        };
        drop(writer);
        if let Err(e) = result {
            error!("send failed for client {}: {}", client.id(), e);
            let mut state = client.send_state.lock();
            state.outbound.clear();
            state.sending = false;
            drop(state);
            client.begin_disconnect();
            break;
        }
    }
    // drain_ref drops here and re-checks the destruction predicate.
}
