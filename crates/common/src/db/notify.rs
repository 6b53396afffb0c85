//! Change feed over PostgreSQL LISTEN/NOTIFY
//!
//! Table triggers publish `<topic>:<key>` payloads on [`CHANGE_CHANNEL`]. One
//! listener task per process fans them out to every live query through a
//! broadcast channel.

use crate::domain::UserId;
use crate::errors::Result;
use sqlx::postgres::PgListener;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Notification channel the schema triggers publish on
pub const CHANGE_CHANNEL: &str = "studyvault_changes";

const FEED_CAPACITY: usize = 256;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// A committed write that may invalidate live queries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Any resource row or like changed
    Resources,
    /// A profile or its saved set changed
    Profile(UserId),
    /// A chat turn was appended
    Chat(UserId),
    /// Notifications may have been missed; every query should refresh
    Resync,
}

impl Change {
    /// Parse a trigger payload
    pub fn parse(payload: &str) -> Option<Self> {
        let (topic, key) = payload.split_once(':')?;
        match topic {
            "resources" => Some(Change::Resources),
            "profile" if !key.is_empty() => Some(Change::Profile(UserId::new(key))),
            "chat" if !key.is_empty() => Some(Change::Chat(UserId::new(key))),
            _ => None,
        }
    }
}

/// Process-wide fan-out of database change notifications
#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<Change>,
}

impl ChangeFeed {
    /// Connect a listener and start forwarding notifications
    pub async fn start(database_url: &str) -> Result<Self> {
        let mut listener = PgListener::connect(database_url).await?;
        listener.listen(CHANGE_CHANNEL).await?;
        info!(channel = CHANGE_CHANNEL, "Listening for changes");

        let (tx, _) = broadcast::channel(FEED_CAPACITY);
        let feed = Self { tx: tx.clone() };

        tokio::spawn(async move {
            loop {
                match listener.recv().await {
                    Ok(notification) => match Change::parse(notification.payload()) {
                        Some(change) => {
                            debug!(?change, "Change received");
                            // No receivers just means no live queries right now
                            let _ = tx.send(change);
                        }
                        None => warn!(payload = notification.payload(), "Unrecognized change payload"),
                    },
                    Err(e) => {
                        // PgListener reconnects on the next recv; anything sent meanwhile is lost
                        warn!(error = %e, "Change listener interrupted");
                        let _ = tx.send(Change::Resync);
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        });

        Ok(feed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Change> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_parsing() {
        assert_eq!(Change::parse("resources:"), Some(Change::Resources));
        assert_eq!(
            Change::parse("profile:u1"),
            Some(Change::Profile(UserId::new("u1")))
        );
        assert_eq!(Change::parse("chat:u1"), Some(Change::Chat(UserId::new("u1"))));
        assert_eq!(Change::parse("profile:"), None);
        assert_eq!(Change::parse("garbage"), None);
    }
}
