//! Register, send and list commands.

use tracing::{info, warn};

use notirouter_protocol::{Address, ListingEntry, MAX_PAYLOAD_LEN, RegisterOutcome};

use crate::error::{ClientError, ClientResult};
use crate::socket::{ReceivedNotification, RouterClient};

/// Registers `name` and prints notifications until Ctrl+C or the router
/// goes away.
pub async fn register(client: &RouterClient, address: u8, name: &str) -> ClientResult<()> {
    if address == 0 {
        return Err(ClientError::Config(
            "address 0 is reserved for the router".to_string(),
        ));
    }

    let mut registration = client.register(Address::new(address), name).await?;
    match registration.outcome() {
        RegisterOutcome::ReassignedAddress => println!(
            "Address {} was taken; registered {:?} at {}",
            address,
            name,
            registration.address()
        ),
        _ => println!("Registered {:?} at {}", name, registration.address()),
    }

    loop {
        tokio::select! {
            received = registration.next_notification() => match received? {
                Some(notification) => println!("{}", render_notification(&notification)),
                None => {
                    warn!("Router closed the connection");
                    return Ok(());
                }
            },
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for Ctrl+C");
                }
                break;
            }
        }
    }

    info!(address = %registration.address(), "Disconnecting");
    registration.disconnect().await
}

/// Sends one notification.
pub async fn send(client: &RouterClient, to: u8, from: &str, message: &str) -> ClientResult<()> {
    if message.len() > MAX_PAYLOAD_LEN {
        return Err(ClientError::Config(format!(
            "message is {} bytes, the limit is {}",
            message.len(),
            MAX_PAYLOAD_LEN
        )));
    }
    client.notify(from, Address::new(to), message).await?;
    info!(to, "Notification sent");
    Ok(())
}

/// Prints the directory.
pub async fn list(client: &RouterClient, count: u8, json: bool) -> ClientResult<()> {
    let entries = client.list(count).await?;
    if json {
        let rendered = serde_json::to_string_pretty(&entries)
            .map_err(|e| ClientError::Protocol(format!("failed to render listing: {}", e)))?;
        println!("{}", rendered);
    } else {
        print!("{}", render_listing(&entries));
    }
    Ok(())
}

/// One line per entry, address right-aligned.
pub fn render_listing(entries: &[ListingEntry]) -> String {
    entries
        .iter()
        .map(|entry| format!("{:>3}  {}\n", entry.address, entry.name))
        .collect()
}

/// Formats a received notification for the terminal.
pub fn render_notification(notification: &ReceivedNotification) -> String {
    format!("[{}] {}", notification.emitter, notification.text())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn listing_is_aligned() {
        let entries = vec![
            ListingEntry::new(Address::SERVER, "Server"),
            ListingEntry::new(Address::new(12), "alice"),
            ListingEntry::new(Address::new(200), "bob"),
        ];
        assert_eq!(
            render_listing(&entries),
            "  0  Server\n 12  alice\n200  bob\n"
        );
    }

    #[test]
    fn notification_line() {
        let notification = ReceivedNotification {
            emitter: "cron".to_string(),
            payload: b"backup done".to_vec(),
        };
        assert_eq!(render_notification(&notification), "[cron] backup done");
    }

    #[tokio::test]
    async fn reserved_address_is_refused_locally() {
        let client = RouterClient::new("127.0.0.1:1", Duration::from_millis(100));
        assert!(matches!(
            register(&client, 0, "x").await,
            Err(ClientError::Config(_))
        ));
    }

    #[tokio::test]
    async fn oversized_message_is_refused_locally() {
        let client = RouterClient::new("127.0.0.1:1", Duration::from_millis(100));
        let message = "x".repeat(MAX_PAYLOAD_LEN + 1);
        assert!(matches!(
            send(&client, 3, "me", &message).await,
            Err(ClientError::Config(_))
        ));
    }
}
