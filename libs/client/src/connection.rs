//! Connection state shared by the executor and the middleware chain
//!
//! A [`Connection`] owns at most one live [`Session`] at a time. A session is
//! one physical connection: a writer task that puts whole frames on the
//! socket one after another, a reader task that routes every incoming frame
//! to the waiter registered under its sync, the sync counter, and the
//! authentication state of that socket. When a session dies the next call
//! opens a fresh one, which starts unauthenticated.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tarn_protocol::codec::{Codec, MsgpackCodec};
use tarn_protocol::Greeting;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::Endpoint;
use crate::error::{Error, Result};
use crate::transport::{self, FrameReader, FrameWriter, Transport, TransportOptions};

type Reply = Result<Vec<u8>>;

/// Frames queued for the writer task before callers have to wait.
const WRITE_QUEUE: usize = 64;

enum Outgoing {
    Frame {
        bytes: Vec<u8>,
        written: oneshot::Sender<Result<()>>,
    },
    Shutdown(oneshot::Sender<()>),
}

/// Authentication progress of one physical connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Handshaking,
    Authenticated,
    Failed { code: u32, message: String },
}

/// Single-flight gate around the handshake of a session.
pub struct AuthGate {
    state: Mutex<AuthState>,
    flight: tokio::sync::Mutex<()>,
}

impl AuthGate {
    fn new() -> Self {
        Self {
            state: Mutex::new(AuthState::Unauthenticated),
            flight: tokio::sync::Mutex::new(()),
        }
    }

    pub fn state(&self) -> AuthState {
        self.state.lock().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        *self.state.lock() == AuthState::Authenticated
    }

    /// Run `handshake` unless the session is already authenticated.
    ///
    /// Callers arriving while a handshake is in flight wait for its outcome
    /// instead of starting a second one. A rejected handshake is sticky: later
    /// callers get the same authentication error. Any other failure returns
    /// the gate to `Unauthenticated` so the next caller tries again.
    pub async fn authenticate_with<F, Fut>(&self, handshake: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        if self.is_authenticated() {
            return Ok(());
        }

        let _flight = self.flight.lock().await;
        {
            let mut state = self.state.lock();
            match &*state {
                AuthState::Authenticated => return Ok(()),
                AuthState::Failed { code, message } => {
                    return Err(Error::Authentication {
                        code: *code,
                        message: message.clone(),
                    })
                }
                AuthState::Unauthenticated | AuthState::Handshaking => {}
            }
            *state = AuthState::Handshaking;
        }

        let result = handshake().await;
        *self.state.lock() = match &result {
            Ok(()) => AuthState::Authenticated,
            Err(Error::Authentication { code, message }) => AuthState::Failed {
                code: *code,
                message: message.clone(),
            },
            Err(_) => AuthState::Unauthenticated,
        };
        result
    }
}

#[derive(Default)]
struct Waiters {
    closed: bool,
    by_sync: HashMap<u64, oneshot::Sender<Reply>>,
}

/// In-flight requests of one session, keyed by sync.
#[derive(Default)]
struct Pending {
    waiters: Mutex<Waiters>,
}

impl Pending {
    fn take(&self, sync: u64) -> Option<oneshot::Sender<Reply>> {
        self.waiters.lock().by_sync.remove(&sync)
    }

    fn forget(&self, sync: u64) {
        self.waiters.lock().by_sync.remove(&sync);
    }

    fn fail_all(&self, error: &Error) {
        let drained: Vec<_> = {
            let mut waiters = self.waiters.lock();
            waiters.closed = true;
            waiters.by_sync.drain().collect()
        };
        for (_, waiter) in drained {
            let _ = waiter.send(Err(error.duplicate()));
        }
    }
}

/// Handle on the reply to one request.
///
/// Dropping it, for instance when the caller gives up, removes the slot so a
/// late reply is discarded by the reader.
pub struct Waiter {
    sync: u64,
    rx: oneshot::Receiver<Reply>,
    pending: Arc<Pending>,
}

impl Waiter {
    pub fn sync(&self) -> u64 {
        self.sync
    }

    /// Wait for the reply frame, giving up after `timeout`.
    pub async fn wait(mut self, timeout: Option<Duration>) -> Result<Vec<u8>> {
        let reply = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, &mut self.rx)
                .await
                .map_err(|_| Error::Timeout(crate::error::TimeoutKind::Read))?,
            None => (&mut self.rx).await,
        };
        reply.map_err(|_| Error::ConnectionClosed)?
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.pending.forget(self.sync);
    }
}

/// One physical connection.
pub struct Session {
    id: u64,
    greeting: Greeting,
    outgoing: mpsc::Sender<Outgoing>,
    pending: Arc<Pending>,
    next_sync: AtomicU64,
    auth: AuthGate,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Session {
    /// Take over an open transport and start its reader and writer tasks.
    pub fn start(id: u64, transport: Box<dyn Transport>) -> Arc<Self> {
        let greeting = transport.greeting().clone();
        let (reader, writer) = transport.into_split();
        Self::from_parts(id, greeting, reader, writer)
    }

    pub(crate) fn from_parts(
        id: u64,
        greeting: Greeting,
        reader: FrameReader,
        writer: FrameWriter,
    ) -> Arc<Self> {
        let pending = Arc::new(Pending::default());
        let (outgoing, queue) = mpsc::channel(WRITE_QUEUE);
        let reader = tokio::spawn(read_loop(id, reader, Arc::clone(&pending)));
        let writer = tokio::spawn(write_loop(id, writer, queue, Arc::clone(&pending)));

        Arc::new(Self {
            id,
            greeting,
            outgoing,
            pending,
            next_sync: AtomicU64::new(1),
            auth: AuthGate::new(),
            reader,
            writer,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn greeting(&self) -> &Greeting {
        &self.greeting
    }

    pub fn auth(&self) -> &AuthGate {
        &self.auth
    }

    /// Next sync; never reused while the session lives.
    pub fn next_sync(&self) -> u64 {
        self.next_sync.fetch_add(1, Ordering::Relaxed)
    }

    /// Reserve the reply slot for `sync`. Must happen before the request is
    /// written so a fast reply cannot arrive unclaimed.
    pub fn register(&self, sync: u64) -> Result<Waiter> {
        let (tx, rx) = oneshot::channel();
        {
            let mut waiters = self.pending.waiters.lock();
            if waiters.closed {
                return Err(Error::ConnectionClosed);
            }
            waiters.by_sync.insert(sync, tx);
        }
        Ok(Waiter {
            sync,
            rx,
            pending: Arc::clone(&self.pending),
        })
    }

    /// Write one frame. Frames never interleave, and once queued a frame is
    /// written in full even if the caller stops waiting.
    pub async fn write(&self, frame: Vec<u8>) -> Result<()> {
        let (written, done) = oneshot::channel();
        self.outgoing
            .send(Outgoing::Frame {
                bytes: frame,
                written,
            })
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        done.await.map_err(|_| Error::ConnectionClosed)?
    }

    pub fn is_closed(&self) -> bool {
        self.pending.waiters.lock().closed
    }

    /// Number of requests still waiting for a reply.
    pub fn in_flight(&self) -> usize {
        self.pending.waiters.lock().by_sync.len()
    }

    /// Shut the socket down and fail everything still in flight.
    pub async fn close(&self) {
        self.reader.abort();
        self.pending.fail_all(&Error::ConnectionClosed);
        let (ack, flushed) = oneshot::channel();
        if self.outgoing.send(Outgoing::Shutdown(ack)).await.is_ok() {
            let _ = flushed.await;
        }
        tracing::debug!(session = self.id, "session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

async fn write_loop(
    id: u64,
    mut writer: FrameWriter,
    mut queue: mpsc::Receiver<Outgoing>,
    pending: Arc<Pending>,
) {
    while let Some(outgoing) = queue.recv().await {
        match outgoing {
            Outgoing::Frame { bytes, written } => {
                if let Err(e) = writer.send(&bytes).await {
                    // A partial frame may be on the wire; nothing after it can be trusted.
                    tracing::debug!(session = id, error = %e, "writer stopped");
                    pending.fail_all(&e);
                    let _ = written.send(Err(e));
                    return;
                }
                let _ = written.send(Ok(()));
            }
            Outgoing::Shutdown(ack) => {
                if let Err(e) = writer.shutdown().await {
                    tracing::trace!(session = id, error = %e, "shutdown failed");
                }
                let _ = ack.send(());
                return;
            }
        }
    }
}

async fn read_loop(id: u64, mut reader: FrameReader, pending: Arc<Pending>) {
    let error = loop {
        let frame = match reader.receive().await {
            Ok(frame) => frame,
            Err(e) => break e,
        };
        let sync = match MsgpackCodec.decode_header(&frame) {
            Ok(header) => header.sync,
            Err(e) => break Error::Protocol(e),
        };
        match pending.take(sync) {
            Some(waiter) => {
                tracing::trace!(session = id, sync, "response received");
                let _ = waiter.send(Ok(frame));
            }
            None => tracing::warn!(session = id, sync, "dropping response nobody waits for"),
        }
    };

    tracing::debug!(session = id, error = %error, "reader stopped");
    pending.fail_all(&error);
}

/// The logical connection of one client.
///
/// Opens its physical connection lazily and replaces it after it dies.
pub struct Connection {
    endpoint: Endpoint,
    options: TransportOptions,
    current: tokio::sync::Mutex<Option<Arc<Session>>>,
    opened: AtomicU64,
}

impl Connection {
    pub fn new(endpoint: Endpoint, options: TransportOptions) -> Self {
        Self {
            endpoint,
            options,
            current: tokio::sync::Mutex::new(None),
            opened: AtomicU64::new(0),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.options.read_timeout
    }

    /// Number of physical connections opened so far.
    pub fn opened(&self) -> u64 {
        self.opened.load(Ordering::Relaxed)
    }

    /// The live session, opening a new one if there is none or the current
    /// one is closed.
    pub async fn session(&self) -> Result<Arc<Session>> {
        let mut current = self.current.lock().await;
        if let Some(session) = current.as_ref().filter(|s| !s.is_closed()) {
            return Ok(Arc::clone(session));
        }

        let transport = transport::connect(&self.endpoint, &self.options).await?;
        let id = self.opened.fetch_add(1, Ordering::Relaxed) + 1;
        let session = Session::start(id, transport);
        tracing::debug!(session = id, endpoint = %self.endpoint, "session opened");
        *current = Some(Arc::clone(&session));
        Ok(session)
    }

    /// Drop `session` if it is still the current one, closing its socket.
    pub async fn discard(&self, session: &Arc<Session>) {
        let replaced = {
            let mut current = self.current.lock().await;
            if current.as_ref().is_some_and(|s| Arc::ptr_eq(s, session)) {
                current.take()
            } else {
                None
            }
        };
        if let Some(session) = replaced {
            session.close().await;
        }
    }

    /// Close the current session, if any.
    pub async fn close(&self) {
        let session = self.current.lock().await.take();
        if let Some(session) = session {
            session.close().await;
        }
    }

    /// Close the current session unless requests are still in flight on it.
    pub async fn close_if_idle(&self) {
        let idle = {
            let mut current = self.current.lock().await;
            if current.as_ref().is_some_and(|s| s.in_flight() == 0) {
                current.take()
            } else {
                None
            }
        };
        if let Some(session) = idle {
            session.close().await;
        }
    }

    #[cfg(test)]
    pub(crate) async fn install(&self, session: Arc<Session>) {
        *self.current.lock().await = Some(session);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use tokio::io::DuplexStream;

    use super::*;

    /// Session over in-memory pipes. Returns the peer ends of the read and
    /// write halves; dropping the first one ends the session.
    pub fn session(id: u64, buffer: usize) -> (Arc<Session>, DuplexStream, DuplexStream) {
        let (read_half, read_peer) = tokio::io::duplex(buffer);
        let (write_half, write_peer) = tokio::io::duplex(buffer);
        let session = Session::from_parts(
            id,
            Greeting::new("Tarantool 2.11.1 (Binary)", [3u8; tarn_protocol::greeting::SALT_SIZE]),
            FrameReader::new(Box::new(read_half), None),
            FrameWriter::new(Box::new(write_half), None),
        );
        (session, read_peer, write_peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn concurrent_callers_share_one_handshake() {
        let gate = Arc::new(AuthGate::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let gate = Arc::clone(&gate);
            let runs = Arc::clone(&runs);
            tasks.push(tokio::spawn(async move {
                gate.authenticate_with(|| async {
                    runs.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(())
                })
                .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(gate.state(), AuthState::Authenticated);
    }

    #[tokio::test]
    async fn rejected_handshake_is_sticky() {
        let gate = AuthGate::new();
        let err = gate
            .authenticate_with(|| async {
                Err(Error::Authentication {
                    code: 47,
                    message: "Incorrect password".to_string(),
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Authentication { code: 47, .. }));

        // no second attempt is made on this session
        let err = gate
            .authenticate_with(|| async { Err(Error::ConnectionClosed) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Authentication { code: 47, .. }));
        assert!(matches!(gate.state(), AuthState::Failed { code: 47, .. }));
    }

    #[tokio::test]
    async fn transport_failure_during_handshake_allows_another_try() {
        let gate = AuthGate::new();
        let err = gate
            .authenticate_with(|| async { Err(Error::ConnectionClosed) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
        assert_eq!(gate.state(), AuthState::Unauthenticated);

        gate.authenticate_with(|| async { Ok(()) }).await.unwrap();
        assert!(gate.is_authenticated());
    }

    #[tokio::test]
    async fn dropped_waiter_frees_its_slot() {
        let pending = Arc::new(Pending::default());
        let (tx, rx) = oneshot::channel();
        pending.waiters.lock().by_sync.insert(5, tx);

        let waiter = Waiter {
            sync: 5,
            rx,
            pending: Arc::clone(&pending),
        };
        drop(waiter);

        assert!(pending.take(5).is_none());
    }

    #[tokio::test]
    async fn abandoned_write_still_finishes_its_frame() {
        let (session, _replies, mut wire) = testing::session(1, 16);
        let large = vec![0xabu8; 4096];

        // the peer is not reading yet, so the write cannot complete in time
        let abandoned =
            tokio::time::timeout(Duration::from_millis(10), session.write(large.clone())).await;
        assert!(abandoned.is_err());

        let next = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.write(b"ping".to_vec()).await })
        };

        assert_eq!(transport::read_frame(&mut wire).await.unwrap(), large);
        assert_eq!(transport::read_frame(&mut wire).await.unwrap(), b"ping");
        next.await.unwrap().unwrap();
        assert!(!session.is_closed());
    }

    #[tokio::test]
    async fn failed_write_closes_the_session() {
        let (session, _replies, wire) = testing::session(1, 16);
        drop(wire);

        assert!(session.write(vec![0u8; 64]).await.is_err());
        assert!(session.is_closed());
        assert!(matches!(session.register(9), Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn failing_all_closes_and_notifies() {
        let pending = Arc::new(Pending::default());
        let (tx, rx) = oneshot::channel();
        pending.waiters.lock().by_sync.insert(1, tx);
        let waiter = Waiter {
            sync: 1,
            rx,
            pending: Arc::clone(&pending),
        };

        pending.fail_all(&Error::ConnectionClosed);

        assert!(pending.waiters.lock().closed);
        assert!(matches!(
            waiter.wait(None).await,
            Err(Error::ConnectionClosed)
        ));
    }
}
