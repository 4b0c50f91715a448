//! TCP client for talking to a notirouter.
//!
//! Listing and sending are one-shot: connect, write one message, read until
//! the router closes. Registration keeps its connection open so that
//! forwarded notifications can be read from it.

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;

use notirouter_protocol::{
    Address, ERROR_BYTE, FrameReader, FrameWriter, ListingEntry, Message, RegisterOutcome,
};

use crate::error::{ClientError, ClientResult};

/// A notification delivered to a registered client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedNotification {
    /// Name the sender put in the emitter field.
    pub emitter: String,
    /// Raw payload.
    pub payload: Vec<u8>,
}

impl ReceivedNotification {
    /// Payload decoded as UTF-8, with invalid sequences replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Client for one router address.
#[derive(Debug, Clone)]
pub struct RouterClient {
    server_addr: String,
    timeout: Duration,
}

impl RouterClient {
    /// Creates a new client.
    pub fn new(server_addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            server_addr: server_addr.into(),
            timeout,
        }
    }

    /// Returns the router address.
    pub fn server_addr(&self) -> &str {
        &self.server_addr
    }

    async fn connect(&self) -> ClientResult<TcpStream> {
        debug!(server = %self.server_addr, "connecting to router");

        tokio::time::timeout(self.timeout, TcpStream::connect(&self.server_addr))
            .await
            .map_err(|_| {
                ClientError::Connection(format!(
                    "connection timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| {
                ClientError::Connection(format!(
                    "failed to connect to {}: {}",
                    self.server_addr, e
                ))
            })
    }

    async fn write(
        &self,
        writer: &mut FrameWriter<OwnedWriteHalf>,
        message: &Message,
    ) -> ClientResult<()> {
        tokio::time::timeout(self.timeout, writer.write_message(message))
            .await
            .map_err(|_| ClientError::Timeout(format!("sending {}", message.kind())))??;
        Ok(())
    }

    async fn open(
        &self,
    ) -> ClientResult<(FrameReader<OwnedReadHalf>, FrameWriter<OwnedWriteHalf>)> {
        let (read_half, write_half) = self.connect().await?.into_split();
        Ok((FrameReader::new(read_half), FrameWriter::new(write_half)))
    }

    async fn read(
        &self,
        reader: &mut FrameReader<OwnedReadHalf>,
        operation: &str,
    ) -> ClientResult<Option<Message>> {
        let message = tokio::time::timeout(self.timeout, reader.read_message())
            .await
            .map_err(|_| ClientError::Timeout(operation.to_string()))??;
        Ok(message)
    }

    /// Sends one notification to `receptor`.
    ///
    /// Waits for the router to close the connection. The router does not
    /// acknowledge delivery, so an unknown receptor is not reported.
    pub async fn notify(
        &self,
        emitter: &str,
        receptor: Address,
        payload: impl Into<Vec<u8>>,
    ) -> ClientResult<()> {
        let message = Message::notification(emitter, receptor, payload);
        let (mut reader, mut writer) = self.open().await?;
        self.write(&mut writer, &message).await?;

        match self.read(&mut reader, "waiting for the router").await? {
            None => {
                debug!(receptor = %receptor, "notification handed to router");
                Ok(())
            }
            Some(Message::Unknown { raw_first_byte }) if raw_first_byte == ERROR_BYTE => Err(
                ClientError::Server("router rejected the notification".to_string()),
            ),
            Some(other) => Err(ClientError::Protocol(format!(
                "unexpected {} after notification",
                other.kind()
            ))),
        }
    }

    /// Fetches the directory.
    ///
    /// `count` caps the number of client entries (0 means all); the server
    /// entry is always included.
    pub async fn list(&self, count: u8) -> ClientResult<Vec<ListingEntry>> {
        let (mut reader, mut writer) = self.open().await?;
        self.write(&mut writer, &Message::listing(count)).await?;

        match self.read(&mut reader, "reading listing").await? {
            Some(Message::ListingReply { entries }) => Ok(entries),
            other => Err(unexpected_reply("listing", other)),
        }
    }

    /// Registers under `address` (or the next free one) and keeps the
    /// connection for receiving notifications.
    pub async fn register(&self, address: Address, name: &str) -> ClientResult<Registration> {
        let (mut reader, mut writer) = self.open().await?;
        self.write(&mut writer, &Message::register(address, name))
            .await?;

        match self.read(&mut reader, "reading registration reply").await? {
            Some(Message::RegisterReply {
                outcome: RegisterOutcome::ServerFull,
                ..
            }) => Err(ClientError::Rejected("router is full".to_string())),
            Some(Message::RegisterReply {
                outcome,
                assigned_address,
            }) => {
                debug!(address = %assigned_address, outcome = %outcome, "registered");
                Ok(Registration {
                    reader,
                    writer,
                    address: assigned_address,
                    outcome,
                    timeout: self.timeout,
                })
            }
            other => Err(unexpected_reply("registration", other)),
        }
    }
}

fn unexpected_reply(operation: &str, reply: Option<Message>) -> ClientError {
    match reply {
        None => ClientError::Connection(format!("router closed the connection during {}", operation)),
        Some(Message::Unknown { raw_first_byte }) if raw_first_byte == ERROR_BYTE => {
            ClientError::Server(format!("router rejected the {} request", operation))
        }
        Some(other) => ClientError::Protocol(format!(
            "unexpected {} in reply to {}",
            other.kind(),
            operation
        )),
    }
}

/// An open registration.
pub struct Registration {
    reader: FrameReader<OwnedReadHalf>,
    writer: FrameWriter<OwnedWriteHalf>,
    address: Address,
    outcome: RegisterOutcome,
    timeout: Duration,
}

impl Registration {
    /// Address the router assigned.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Whether the requested address was granted or reassigned.
    pub fn outcome(&self) -> RegisterOutcome {
        self.outcome
    }

    /// Waits for the next forwarded notification.
    ///
    /// Returns `Ok(None)` once the router closes the connection.
    pub async fn next_notification(&mut self) -> ClientResult<Option<ReceivedNotification>> {
        match self.reader.read_message().await? {
            None => Ok(None),
            Some(Message::Notification {
                emitter, payload, ..
            }) => Ok(Some(ReceivedNotification { emitter, payload })),
            Some(other) => Err(ClientError::Protocol(format!(
                "unexpected {} on registered connection",
                other.kind()
            ))),
        }
    }

    /// Releases the address and closes the connection.
    pub async fn disconnect(mut self) -> ClientResult<()> {
        let writer = &mut self.writer;
        tokio::time::timeout(self.timeout, async move {
            writer.write_message(&Message::Disconnect).await?;
            writer.get_mut().shutdown().await?;
            Ok::<_, ClientError>(())
        })
        .await
        .map_err(|_| ClientError::Timeout("sending disconnect".to_string()))??;
        debug!(address = %self.address, "disconnected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notirouter_server::{
        RouterServer, ServerConfig, SessionHandler, ShutdownHandle, SharedRegistry,
        make_connection_handler, new_shared_registry,
    };

    async fn spawn_router() -> (RouterClient, SharedRegistry, ShutdownHandle) {
        let server = RouterServer::bind(ServerConfig::new("127.0.0.1:0"))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = ShutdownHandle::new();
        let registry = new_shared_registry("Server");
        let handler = SessionHandler::new(registry.clone(), server.config(), shutdown.clone());

        let signal = shutdown.signal();
        tokio::spawn(async move {
            server
                .run_until_shutdown(make_connection_handler(handler), signal.wait())
                .await
        });

        let client = RouterClient::new(addr.to_string(), Duration::from_secs(5));
        (client, registry, shutdown)
    }

    #[tokio::test]
    async fn register_notify_and_receive() {
        let (client, _registry, shutdown) = spawn_router().await;

        let mut alice = client.register(Address::new(4), "alice").await.unwrap();
        assert_eq!(alice.address(), Address::new(4));
        assert_eq!(alice.outcome(), RegisterOutcome::Accepted);

        client
            .notify("bob", Address::new(4), "lunch?")
            .await
            .unwrap();

        let received = tokio::time::timeout(Duration::from_secs(5), alice.next_notification())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(received.emitter, "bob");
        assert_eq!(received.text(), "lunch?");

        shutdown.trigger();
    }

    #[tokio::test]
    async fn list_includes_server_and_clients() {
        let (client, _registry, shutdown) = spawn_router().await;
        let _one = client.register(Address::new(1), "one").await.unwrap();
        let _two = client.register(Address::new(1), "two").await.unwrap();

        let entries = client.list(0).await.unwrap();
        assert_eq!(
            entries,
            vec![
                ListingEntry::new(Address::SERVER, "Server"),
                ListingEntry::new(Address::new(1), "one"),
                ListingEntry::new(Address::new(2), "two"),
            ]
        );

        let capped = client.list(1).await.unwrap();
        assert_eq!(capped.len(), 2);

        shutdown.trigger();
    }

    #[tokio::test]
    async fn disconnect_releases_address() {
        let (client, registry, shutdown) = spawn_router().await;
        let registration = client.register(Address::new(8), "temp").await.unwrap();
        assert!(registry.get(Address::new(8)).await.is_some());

        registration.disconnect().await.unwrap();

        let mut released = false;
        for _ in 0..50 {
            if registry.get(Address::new(8)).await.is_none() {
                released = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(released);

        shutdown.trigger();
    }

    #[tokio::test]
    async fn notify_unknown_receptor_is_silent() {
        let (client, _registry, shutdown) = spawn_router().await;
        client
            .notify("nobody", Address::new(200), "hello?")
            .await
            .unwrap();
        shutdown.trigger();
    }

    #[tokio::test]
    async fn connect_failure_is_reported() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = RouterClient::new(addr.to_string(), Duration::from_secs(2));
        let err = client.list(0).await.unwrap_err();
        assert!(matches!(err, ClientError::Connection(_)));
    }

    #[test]
    fn notification_text_is_lossy() {
        let received = ReceivedNotification {
            emitter: "x".to_string(),
            payload: vec![b'h', b'i', 0xff],
        };
        assert_eq!(received.text(), "hi\u{fffd}");
    }
}
