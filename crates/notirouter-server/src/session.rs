//! Per-connection session handling.
//!
//! Each accepted stream gets its own [`Session`] task. The stream is split:
//! the session keeps the read half, while the write half goes into a shared
//! [`Peer`] so that other sessions can forward notifications to it. The
//! registry only ever sees a weak reference to the peer.
//!
//! Session states:
//!
//! ```text
//! AwaitingDiscriminant -> Dispatching -> Replying -> Closed
//!          ^                                |
//!          +--------- (Register) -----------+
//! ```

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf};
use tokio::sync::Mutex;
use tracing::{Instrument, debug, info, info_span, warn};

use notirouter_protocol::{
    Address, ERROR_BYTE, Frame, FrameReader, ListingEntry, Message, ProtocolError,
    ProtocolResult, encode,
};

use crate::config::ServerConfig;
use crate::error::{SessionError, SessionResult};
use crate::registry::{Liveness, Registry, UserRecord};
use crate::signals::ShutdownHandle;
use crate::socket::Connection;

/// Registry shared by every session of one router.
pub type SharedRegistry = Arc<Registry<Peer>>;

/// Creates a registry with the server entry in slot 0.
pub fn new_shared_registry(server_name: impl Into<String>) -> SharedRegistry {
    Arc::new(Registry::new(server_name))
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Write side of one connection.
///
/// Replies from the owning session and notifications forwarded by other
/// sessions both go through [`Peer::send`], which holds the write lock for
/// the whole message.
pub struct Peer {
    id: u64,
    label: String,
    writer: Mutex<BoxedWriter>,
    alive: AtomicBool,
    closed: AtomicBool,
    write_timeout: Duration,
}

impl Peer {
    fn new(id: u64, label: String, writer: BoxedWriter, write_timeout: Duration) -> Self {
        Self {
            id,
            label,
            writer: Mutex::new(writer),
            alive: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            write_timeout,
        }
    }

    /// Connection id, unique per router.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Writes one complete message.
    ///
    /// A failed or timed out write marks the peer dead; it is not retried.
    pub async fn send(&self, bytes: &[u8]) -> SessionResult<()> {
        let mut writer = self.writer.lock().await;
        self.write_locked(&mut writer, bytes).await
    }

    /// Writes through a writer lock the caller already holds.
    async fn write_locked(&self, writer: &mut BoxedWriter, bytes: &[u8]) -> SessionResult<()> {
        if !self.is_alive() {
            return Err(SessionError::write_failure(
                &self.label,
                io::Error::new(io::ErrorKind::NotConnected, "connection closed"),
            ));
        }

        let result = tokio::time::timeout(self.write_timeout, async {
            writer.write_all(bytes).await?;
            writer.flush().await
        })
        .await;

        let error = match result {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => e,
            Err(_) => io::Error::new(io::ErrorKind::TimedOut, "write timed out"),
        };
        self.alive.store(false, Ordering::Release);
        Err(SessionError::write_failure(&self.label, error))
    }

    /// Shuts the write side down. Only the first call does anything.
    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.alive.store(false, Ordering::Release);

        let mut writer = self.writer.lock().await;
        match tokio::time::timeout(self.write_timeout, writer.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "Error while closing connection"),
            Err(_) => debug!("Timed out closing connection"),
        }
    }
}

impl Liveness for Peer {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// What to write back after a message, and whether the connection survives.
#[derive(Debug)]
struct Reply {
    bytes: Option<Vec<u8>>,
    keep_open: bool,
}

impl Reply {
    fn close() -> Self {
        Self {
            bytes: None,
            keep_open: false,
        }
    }

    /// Nothing to write (already written), keep reading.
    fn keep_open() -> Self {
        Self {
            bytes: None,
            keep_open: true,
        }
    }

    fn error() -> Self {
        Self {
            bytes: Some(vec![ERROR_BYTE]),
            keep_open: false,
        }
    }

    fn message(message: &Message, keep_open: bool) -> SessionResult<Self> {
        Ok(Self {
            bytes: Some(encode(message)?),
            keep_open,
        })
    }
}

#[derive(Debug)]
enum SessionState {
    AwaitingDiscriminant,
    Dispatching,
    Replying(Reply),
    Closed,
}

/// Keeps the server entry and at most `requested` client entries (0 = all).
fn cap_listing(entries: Vec<ListingEntry>, requested: u8) -> Vec<ListingEntry> {
    if requested == 0 {
        return entries;
    }
    let mut clients = 0usize;
    entries
        .into_iter()
        .filter(|entry| {
            if entry.address.is_server() {
                return true;
            }
            clients += 1;
            clients <= requested as usize
        })
        .collect()
}

async fn read_bounded<T>(
    limit: Option<Duration>,
    operation: &'static str,
    read: impl Future<Output = ProtocolResult<T>>,
) -> SessionResult<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, read)
            .await
            .map_err(|_| SessionError::Timeout { operation })?
            .map_err(SessionError::from),
        None => read.await.map_err(SessionError::from),
    }
}

/// One accepted connection, end to end.
struct Session<S> {
    reader: FrameReader<ReadHalf<S>>,
    peer: Arc<Peer>,
    registry: SharedRegistry,
    shutdown: ShutdownHandle,
    read_timeout: Duration,
    registered: bool,
}

impl<S: AsyncRead + AsyncWrite> Session<S> {
    async fn serve(&mut self) -> SessionResult<()> {
        let mut state = SessionState::AwaitingDiscriminant;
        loop {
            state = match state {
                SessionState::AwaitingDiscriminant => match self.await_discriminant().await? {
                    Some(code) => {
                        debug!(code, "Message incoming");
                        SessionState::Dispatching
                    }
                    None => SessionState::Closed,
                },
                SessionState::Dispatching => match self.next_frame().await {
                    Ok(Some(frame)) => SessionState::Replying(self.dispatch(frame).await?),
                    Ok(None) => SessionState::Closed,
                    Err(SessionError::Protocol(e)) if !matches!(e, ProtocolError::Io(_)) => {
                        warn!(error = %e, "Malformed message");
                        SessionState::Replying(Reply::error())
                    }
                    Err(e @ SessionError::Timeout { .. }) => {
                        warn!(error = %e, "Incomplete message");
                        SessionState::Replying(Reply::error())
                    }
                    Err(e) => return Err(e),
                },
                SessionState::Replying(reply) => {
                    if let Some(bytes) = &reply.bytes {
                        self.peer.send(bytes).await?;
                    }
                    if reply.keep_open {
                        SessionState::AwaitingDiscriminant
                    } else {
                        SessionState::Closed
                    }
                }
                SessionState::Closed => return Ok(()),
            };
        }
    }

    /// Waits for the first byte of the next message without consuming it.
    ///
    /// Registered connections may idle indefinitely; others are bounded by
    /// the read timeout.
    async fn await_discriminant(&mut self) -> SessionResult<Option<u8>> {
        let limit = (!self.registered).then_some(self.read_timeout);
        let shutdown = self.shutdown.signal();
        tokio::select! {
            result = read_bounded(limit, "awaiting message", self.reader.peek_discriminant()) => result,
            _ = shutdown.wait() => {
                debug!("Shutdown while awaiting message");
                Ok(None)
            }
        }
    }

    async fn next_frame(&mut self) -> SessionResult<Option<Frame>> {
        let shutdown = self.shutdown.signal();
        tokio::select! {
            result = read_bounded(Some(self.read_timeout), "reading message", self.reader.read_frame()) => result,
            _ = shutdown.wait() => Ok(None),
        }
    }

    async fn dispatch(&mut self, frame: Frame) -> SessionResult<Reply> {
        let kind = frame.message.kind();
        match frame.message {
            Message::Notification {
                emitter,
                receptor,
                payload,
            } => {
                info!(
                    emitter = %emitter,
                    receptor = %receptor,
                    bytes = payload.len(),
                    "Notification received"
                );
                self.forward(receptor, &frame.raw).await?;
                Ok(Reply::close())
            }
            Message::Listing { requested_count } => {
                let evicted = self.registry.clean_disconnects().await;
                info!(requested_count, evicted, "Listing requested");
                let entries = cap_listing(self.registry.list().await, requested_count);
                Reply::message(&Message::listing_reply(entries), false)
            }
            Message::Register {
                requested_address,
                name,
            } => self.register(requested_address, name).await,
            Message::Disconnect => {
                match self.registry.release(&self.peer).await {
                    Some(address) => info!(address = %address, "Client disconnected"),
                    None => debug!("Disconnect from unregistered connection"),
                }
                self.registered = false;
                Ok(Reply::close())
            }
            Message::ListingReply { .. } | Message::RegisterReply { .. } => {
                warn!(kind, "Client sent a server-only message");
                Ok(Reply::error())
            }
            Message::Unknown { raw_first_byte } => {
                warn!(code = raw_first_byte, "Invalid message received");
                Ok(Reply::error())
            }
        }
    }

    /// Relays the raw notification bytes to the receptor's connection.
    async fn forward(&self, receptor: Address, raw: &[u8]) -> SessionResult<()> {
        let Some(recipient) = self.registry.connection(receptor).await else {
            return Err(SessionError::UnknownReceptor { address: receptor });
        };
        recipient.send(raw).await?;
        debug!(receptor = %receptor, recipient = recipient.id(), "Notification forwarded");
        Ok(())
    }

    /// The reply is written while the peer's writer lock is held from
    /// before `add`, so nothing forwarded to the new address can precede it.
    async fn register(&mut self, requested: Address, name: String) -> SessionResult<Reply> {
        if let Some(previous) = self.registry.release(&self.peer).await {
            debug!(previous = %previous, "Releasing previous address");
        }

        let mut writer = self.peer.writer.lock().await;
        let (assigned, outcome) = self
            .registry
            .add(requested, UserRecord::client(name.as_str(), &self.peer))
            .await;
        info!(
            name = %name,
            requested = %requested,
            assigned = %assigned,
            outcome = %outcome,
            "Registration handled"
        );
        self.registered = outcome.is_registered();

        let reply = encode(&Message::register_reply(outcome, assigned))?;
        self.peer.write_locked(&mut writer, &reply).await?;
        Ok(Reply::keep_open())
    }

    async fn close(&self) {
        self.peer.close().await;
        let evicted = self.registry.clean_disconnects().await;
        if evicted > 0 {
            info!(evicted, "Evicted dead connections");
        }
    }
}

/// Entry point handed to the accept loop.
///
/// Cloning is cheap; every clone shares the registry and connection counter.
#[derive(Clone)]
pub struct SessionHandler {
    registry: SharedRegistry,
    shutdown: ShutdownHandle,
    read_timeout: Duration,
    write_timeout: Duration,
    next_id: Arc<AtomicU64>,
}

impl SessionHandler {
    /// Creates a handler over `registry`.
    pub fn new(registry: SharedRegistry, config: &ServerConfig, shutdown: ShutdownHandle) -> Self {
        Self {
            registry,
            shutdown,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Returns the shared registry.
    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Handles an accepted TCP connection until it closes.
    pub async fn handle_connection(&self, conn: Connection) {
        let (stream, peer_addr, permit) = conn.into_parts();
        self.handle_stream(stream, peer_addr.to_string()).await;
        drop(permit);
    }

    /// Handles any duplex byte stream until it closes.
    ///
    /// Errors are logged here and never returned to the caller.
    pub async fn handle_stream<S>(&self, stream: S, label: impl Into<String>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let label = label.into();
        let span = info_span!("session", conn = id, peer = %label);

        let (read_half, write_half) = tokio::io::split(stream);
        let peer = Arc::new(Peer::new(
            id,
            label,
            Box::new(write_half),
            self.write_timeout,
        ));
        let mut session = Session {
            reader: FrameReader::new(read_half),
            peer,
            registry: self.registry.clone(),
            shutdown: self.shutdown.clone(),
            read_timeout: self.read_timeout,
            registered: false,
        };

        async move {
            debug!("Connection accepted");
            let result = session.serve().await;
            session.close().await;
            match result {
                Ok(()) => debug!("Connection closed"),
                Err(e @ SessionError::Timeout { .. }) => debug!(error = %e, "Connection idle"),
                Err(e) => warn!(error = %e, "Connection closed with error"),
            }
        }
        .instrument(span)
        .await
    }
}

/// Creates a connection handler function for use with `RouterServer::run`.
pub fn make_connection_handler(
    handler: SessionHandler,
) -> impl Fn(Connection) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync + 'static {
    move |conn| {
        let handler = handler.clone();
        Box::pin(async move { handler.handle_connection(conn).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notirouter_protocol::RegisterOutcome;
    use tokio::io::{AsyncReadExt, DuplexStream};
    use tokio::task::JoinHandle;

    fn handler() -> SessionHandler {
        let config = ServerConfig::default()
            .with_read_timeout(Duration::from_secs(5))
            .with_write_timeout(Duration::from_secs(5));
        SessionHandler::new(new_shared_registry("Server"), &config, ShutdownHandle::new())
    }

    fn connect(handler: &SessionHandler) -> (DuplexStream, JoinHandle<()>) {
        let (client, server) = tokio::io::duplex(4096);
        let handler = handler.clone();
        let task = tokio::spawn(async move { handler.handle_stream(server, "test").await });
        (client, task)
    }

    async fn send(client: &mut DuplexStream, message: &Message) {
        client.write_all(&encode(message).unwrap()).await.unwrap();
    }

    async fn recv_exact(client: &mut DuplexStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        tokio::time::timeout(Duration::from_secs(5), client.read_exact(&mut buf))
            .await
            .expect("timed out waiting for bytes")
            .unwrap();
        buf
    }

    async fn assert_closed(client: &mut DuplexStream) {
        let mut buf = [0u8; 1];
        let n = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
            .await
            .expect("connection was not closed")
            .unwrap();
        assert_eq!(n, 0, "expected EOF, got byte {}", buf[0]);
    }

    async fn register(
        handler: &SessionHandler,
        address: u8,
        name: &str,
    ) -> (DuplexStream, JoinHandle<()>, Message) {
        let (mut client, task) = connect(handler);
        send(&mut client, &Message::register(Address::new(address), name)).await;
        let reply = notirouter_protocol::decode(&recv_exact(&mut client, 3).await).unwrap();
        (client, task, reply)
    }

    fn dummy_peer() -> Arc<Peer> {
        Arc::new(Peer::new(
            0,
            "dummy".to_string(),
            Box::new(tokio::io::sink()),
            Duration::from_secs(1),
        ))
    }

    #[tokio::test]
    async fn register_then_notify() {
        let handler = handler();
        let (mut x, _x_task, reply) = register(&handler, 5, "x").await;
        assert_eq!(
            reply,
            Message::register_reply(RegisterOutcome::Accepted, Address::new(5))
        );

        let notification = encode(&Message::notification("y", Address::new(5), "hi")).unwrap();
        let (mut y, y_task) = connect(&handler);
        y.write_all(&notification).await.unwrap();

        assert_eq!(recv_exact(&mut x, notification.len()).await, notification);
        assert_closed(&mut y).await;
        y_task.await.unwrap();

        // The receiver stays registered.
        assert!(handler.registry().connection(Address::new(5)).await.is_some());
    }

    #[tokio::test]
    async fn collision_reassigns() {
        let handler = handler();
        let (_a, _a_task, first) = register(&handler, 5, "a").await;
        let (_b, _b_task, second) = register(&handler, 5, "b").await;

        assert_eq!(
            first,
            Message::register_reply(RegisterOutcome::Accepted, Address::new(5))
        );
        match second {
            Message::RegisterReply {
                outcome,
                assigned_address,
            } => {
                assert_eq!(outcome, RegisterOutcome::ReassignedAddress);
                assert_ne!(assigned_address, Address::new(5));
            }
            other => panic!("expected register reply, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn listing_returns_ascending_entries() {
        let handler = handler();
        let (_one, _t1, _) = register(&handler, 1, "name1").await;
        let (_two, _t2, _) = register(&handler, 2, "name2").await;

        let (mut client, task) = connect(&handler);
        send(&mut client, &Message::listing(2)).await;
        let reply = FrameReader::new(&mut client)
            .read_message()
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            reply,
            Message::listing_reply(vec![
                ListingEntry::new(Address::SERVER, "Server"),
                ListingEntry::new(Address::new(1), "name1"),
                ListingEntry::new(Address::new(2), "name2"),
            ])
        );
        assert_closed(&mut client).await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn listing_sweeps_dead_entries() {
        let handler = handler();
        let dead = dummy_peer();
        handler
            .registry()
            .add(Address::new(40), UserRecord::client("ghost", &dead))
            .await;
        dead.alive.store(false, Ordering::SeqCst);

        let (mut client, _task) = connect(&handler);
        send(&mut client, &Message::listing(0)).await;
        let reply = FrameReader::new(&mut client)
            .read_message()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            reply,
            Message::listing_reply(vec![ListingEntry::new(Address::SERVER, "Server")])
        );
    }

    #[tokio::test]
    async fn disconnect_then_notify() {
        let handler = handler();
        let (mut client, task, _) = register(&handler, 7, "seven").await;
        send(&mut client, &Message::Disconnect).await;
        assert_closed(&mut client).await;
        task.await.unwrap();
        assert!(handler.registry().get(Address::new(7)).await.is_none());

        let (mut sender, sender_task) = connect(&handler);
        send(&mut sender, &Message::notification("late", Address::new(7), "hello")).await;
        assert_closed(&mut sender).await;
        sender_task.await.unwrap();

        let (_client, server) = tokio::io::duplex(64);
        let (read_half, _write_half) = tokio::io::split(server);
        let session = Session {
            reader: FrameReader::new(read_half),
            peer: dummy_peer(),
            registry: handler.registry().clone(),
            shutdown: ShutdownHandle::new(),
            read_timeout: Duration::from_secs(1),
            registered: false,
        };
        let raw = encode(&Message::notification("late", Address::new(7), "hello")).unwrap();
        assert!(matches!(
            session.forward(Address::new(7), &raw).await,
            Err(SessionError::UnknownReceptor { address }) if address == Address::new(7)
        ));
    }

    #[tokio::test]
    async fn notify_server_address_is_unknown_receptor() {
        let handler = handler();
        let (mut sender, task) = connect(&handler);
        send(&mut sender, &Message::notification("me", Address::SERVER, "x")).await;
        assert_closed(&mut sender).await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn unknown_discriminant_gets_error_byte() {
        let handler = handler();
        let (mut client, task) = connect(&handler);
        client.write_all(b"X").await.unwrap();
        assert_eq!(recv_exact(&mut client, 1).await, vec![ERROR_BYTE]);
        assert_closed(&mut client).await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn reply_messages_from_client_are_rejected() {
        let handler = handler();
        let (mut client, _task) = connect(&handler);
        send(
            &mut client,
            &Message::register_reply(RegisterOutcome::Accepted, Address::new(3)),
        )
        .await;
        assert_eq!(recv_exact(&mut client, 1).await, vec![ERROR_BYTE]);
        assert_closed(&mut client).await;
    }

    #[tokio::test]
    async fn truncated_message_gets_error_byte() {
        let handler = handler();
        let (mut client, task) = connect(&handler);
        client.write_all(&[b'R', 5, 10, b'a']).await.unwrap();
        client.shutdown().await.unwrap();
        assert_eq!(recv_exact(&mut client, 1).await, vec![ERROR_BYTE]);
        assert_closed(&mut client).await;
        task.await.unwrap();
        assert!(handler.registry().is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_message_gets_error_byte() {
        let config = ServerConfig::default().with_read_timeout(Duration::from_secs(1));
        let handler =
            SessionHandler::new(new_shared_registry("Server"), &config, ShutdownHandle::new());
        let (mut client, task) = connect(&handler);

        // Name promises 10 bytes, only one arrives and the stream stays open.
        client.write_all(&[b'R', 5, 10, b'a']).await.unwrap();
        assert_eq!(recv_exact(&mut client, 1).await, vec![ERROR_BYTE]);
        assert_closed(&mut client).await;
        task.await.unwrap();
        assert!(handler.registry().is_empty().await);
    }

    #[tokio::test]
    async fn dropped_client_is_evicted_on_close() {
        let handler = handler();
        let (client, task, _) = register(&handler, 9, "nine").await;
        assert!(handler.registry().get(Address::new(9)).await.is_some());

        drop(client);
        task.await.unwrap();
        assert!(handler.registry().get(Address::new(9)).await.is_none());
    }

    #[tokio::test]
    async fn server_full_keeps_connection_open() {
        let handler = handler();
        let filler = dummy_peer();
        for n in 1..=255u8 {
            handler
                .registry()
                .add(Address::new(n), UserRecord::client("filler", &filler))
                .await;
        }

        let (mut client, _task, reply) = register(&handler, 10, "late").await;
        assert_eq!(
            reply,
            Message::register_reply(RegisterOutcome::ServerFull, Address::SERVER)
        );

        assert!(handler.registry().remove(Address::new(10)).await);
        send(&mut client, &Message::register(Address::new(10), "late")).await;
        let retry = notirouter_protocol::decode(&recv_exact(&mut client, 3).await).unwrap();
        assert_eq!(
            retry,
            Message::register_reply(RegisterOutcome::Accepted, Address::new(10))
        );
        assert_eq!(handler.registry().get(Address::new(10)).await.unwrap().name, "late");
    }

    #[tokio::test]
    async fn reregister_releases_previous_slot() {
        let handler = handler();
        let (mut client, _task, _) = register(&handler, 3, "mover").await;
        send(&mut client, &Message::register(Address::new(4), "mover")).await;
        let reply = notirouter_protocol::decode(&recv_exact(&mut client, 3).await).unwrap();

        assert_eq!(
            reply,
            Message::register_reply(RegisterOutcome::Accepted, Address::new(4))
        );
        assert!(handler.registry().get(Address::new(3)).await.is_none());
        assert_eq!(handler.registry().len().await, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_forwards_do_not_interleave() {
        let handler = handler();
        let (receiver, _task, _) = register(&handler, 20, "sink").await;

        let reader_task = tokio::spawn(async move {
            let mut reader = FrameReader::new(receiver);
            let mut seen = Vec::new();
            for _ in 0..4 {
                match reader.read_message().await.unwrap().unwrap() {
                    Message::Notification { payload, .. } => {
                        assert_eq!(payload.len(), 3000);
                        assert!(payload.iter().all(|b| *b == payload[0]));
                        seen.push(payload[0]);
                    }
                    other => panic!("expected notification, got {:?}", other),
                }
            }
            seen
        });

        let mut senders = Vec::new();
        for fill in [b'a', b'b', b'c', b'd'] {
            let handler = handler.clone();
            senders.push(tokio::spawn(async move {
                let (mut client, task) = connect(&handler);
                let payload = vec![fill; 3000];
                send(
                    &mut client,
                    &Message::notification("burst", Address::new(20), payload),
                )
                .await;
                task.await.unwrap();
            }));
        }
        for sender in senders {
            sender.await.unwrap();
        }

        let mut seen = tokio::time::timeout(Duration::from_secs(5), reader_task)
            .await
            .expect("receiver did not get every notification")
            .unwrap();
        seen.sort();
        assert_eq!(seen, vec![b'a', b'b', b'c', b'd']);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn register_reply_precedes_forwarded_notifications() {
        let handler = handler();

        let notifier = {
            let handler = handler.clone();
            tokio::spawn(async move {
                for _ in 0..200 {
                    let (mut client, task) = connect(&handler);
                    send(&mut client, &Message::notification("eager", Address::new(5), "hi"))
                        .await;
                    task.await.unwrap();
                }
            })
        };
        tokio::task::yield_now().await;

        let (mut client, _task) = connect(&handler);
        send(&mut client, &Message::register(Address::new(5), "late")).await;
        let mut reader = FrameReader::new(client);
        let first = tokio::time::timeout(Duration::from_secs(5), reader.read_message())
            .await
            .expect("no reply")
            .unwrap()
            .unwrap();
        assert_eq!(
            first,
            Message::register_reply(RegisterOutcome::Accepted, Address::new(5))
        );

        let drain = tokio::spawn(async move {
            while let Ok(Some(message)) = reader.read_message().await {
                assert!(matches!(message, Message::Notification { .. }));
            }
        });
        notifier.await.unwrap();
        drain.abort();
    }

    #[tokio::test]
    async fn shutdown_unblocks_registered_session() {
        let shutdown = ShutdownHandle::new();
        let handler = SessionHandler::new(
            new_shared_registry("Server"),
            &ServerConfig::default(),
            shutdown.clone(),
        );
        let (mut client, task, _) = register(&handler, 11, "idle").await;

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("session ignored shutdown")
            .unwrap();
        assert_closed(&mut client).await;
        assert!(handler.registry().get(Address::new(11)).await.is_none());
    }

    #[tokio::test]
    async fn silent_connection_times_out() {
        let config = ServerConfig::default().with_read_timeout(Duration::from_millis(50));
        let handler =
            SessionHandler::new(new_shared_registry("Server"), &config, ShutdownHandle::new());
        let (mut client, task) = connect(&handler);
        assert_closed(&mut client).await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn write_failure_marks_peer_dead() {
        let (client, server) = tokio::io::duplex(16);
        drop(client);
        let peer = Peer::new(1, "gone".to_string(), Box::new(server), Duration::from_secs(1));

        let result = peer.send(b"hello").await;
        assert!(matches!(
            result,
            Err(SessionError::TransportWriteFailure { .. })
        ));
        assert!(!peer.is_alive());
    }

    #[test]
    fn cap_listing_keeps_server_entry() {
        let entries = vec![
            ListingEntry::new(Address::SERVER, "Server"),
            ListingEntry::new(Address::new(1), "a"),
            ListingEntry::new(Address::new(2), "b"),
            ListingEntry::new(Address::new(3), "c"),
        ];
        let capped = cap_listing(entries.clone(), 2);
        assert_eq!(capped, entries[..3].to_vec());
        assert_eq!(cap_listing(entries.clone(), 0), entries);
        assert_eq!(cap_listing(entries.clone(), 200), entries);
    }
}
