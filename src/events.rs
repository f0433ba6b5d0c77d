//! Change notifications emitted by the file store.
//!
//! The file store publishes a [`ChangeEvent`] after each committed mutation;
//! the index side consumes them (see [`crate::consumer`]). Delivery is
//! at-least-once from the consumer's point of view, so every handler is
//! idempotent.
//!
//! Events serialize as JSON objects tagged by `type`:
//!
//! ```json
//! {"type":"FileCreated","repository_id":"42","repository_identifier":"demo","file_path":"src/App.java"}
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use repovault_core::models::ChangedFile;

/// A notification that the working tree of a repository changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChangeEvent {
    FileCreated {
        repository_id: String,
        repository_identifier: String,
        file_path: String,
    },
    FileUpdated {
        repository_id: String,
        repository_identifier: String,
        file_path: String,
    },
    FileDeleted {
        repository_id: String,
        file_path: String,
    },
    FolderCreated {
        repository_id: String,
        repository_identifier: String,
        folder_path: String,
    },
    FolderDeleted {
        repository_id: String,
        repository_identifier: String,
        folder_path: String,
    },
    /// A working tree appeared in full (clone or import).
    RepositoryCloned { id: String, identifier: String },
    /// A batch of files changed at once (e.g. a pull).
    RepositoryUpdated {
        repository_id: String,
        identifier: String,
        changed_files: Vec<ChangedFile>,
    },
}

impl ChangeEvent {
    /// Event name, as used in the `type` tag.
    pub fn name(&self) -> &'static str {
        match self {
            ChangeEvent::FileCreated { .. } => "FileCreated",
            ChangeEvent::FileUpdated { .. } => "FileUpdated",
            ChangeEvent::FileDeleted { .. } => "FileDeleted",
            ChangeEvent::FolderCreated { .. } => "FolderCreated",
            ChangeEvent::FolderDeleted { .. } => "FolderDeleted",
            ChangeEvent::RepositoryCloned { .. } => "RepositoryCloned",
            ChangeEvent::RepositoryUpdated { .. } => "RepositoryUpdated",
        }
    }

    pub fn repository_id(&self) -> &str {
        match self {
            ChangeEvent::FileCreated { repository_id, .. }
            | ChangeEvent::FileUpdated { repository_id, .. }
            | ChangeEvent::FileDeleted { repository_id, .. }
            | ChangeEvent::FolderCreated { repository_id, .. }
            | ChangeEvent::FolderDeleted { repository_id, .. }
            | ChangeEvent::RepositoryUpdated { repository_id, .. } => repository_id,
            ChangeEvent::RepositoryCloned { id, .. } => id,
        }
    }
}

/// Sink for change events. Publishing never fails the caller's operation.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: ChangeEvent);
}

/// Drops every event.
pub struct NullPublisher;

impl EventPublisher for NullPublisher {
    fn publish(&self, _event: ChangeEvent) {}
}

/// Forwards events into an unbounded Tokio channel.
#[derive(Clone)]
pub struct ChannelPublisher {
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

impl ChannelPublisher {
    pub fn new(tx: mpsc::UnboundedSender<ChangeEvent>) -> Self {
        Self { tx }
    }
}

impl EventPublisher for ChannelPublisher {
    fn publish(&self, event: ChangeEvent) {
        if let Err(e) = self.tx.send(event) {
            warn!(event = e.0.name(), "change event dropped: consumer has stopped");
        }
    }
}

/// A connected publisher and receiver.
pub fn channel() -> (ChannelPublisher, mpsc::UnboundedReceiver<ChangeEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelPublisher::new(tx), rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use repovault_core::models::ChangeKind;

    #[test]
    fn test_json_shape() {
        let event = ChangeEvent::FileDeleted {
            repository_id: "42".into(),
            file_path: "src/App.java".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "FileDeleted");
        assert_eq!(json["file_path"], "src/App.java");

        let back: ChangeEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_repository_updated_payload() {
        let src = r#"{
            "type": "RepositoryUpdated",
            "repository_id": "7",
            "identifier": "demo",
            "changed_files": [
                {"path": "a.rs", "content": "fn a() {}", "kind": "MODIFIED"},
                {"path": "b.rs", "kind": "DELETED"}
            ]
        }"#;
        let event: ChangeEvent = serde_json::from_str(src).unwrap();
        match &event {
            ChangeEvent::RepositoryUpdated { changed_files, .. } => {
                assert_eq!(changed_files.len(), 2);
                assert_eq!(changed_files[1].kind, ChangeKind::Deleted);
                assert!(changed_files[1].content.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(event.repository_id(), "7");
    }

    #[tokio::test]
    async fn test_channel_delivers_in_order() {
        let (publisher, mut rx) = channel();
        for id in ["1", "2"] {
            publisher.publish(ChangeEvent::RepositoryCloned {
                id: id.into(),
                identifier: "demo".into(),
            });
        }
        assert_eq!(rx.recv().await.unwrap().repository_id(), "1");
        assert_eq!(rx.recv().await.unwrap().repository_id(), "2");
    }

    #[test]
    fn test_publish_after_receiver_dropped_is_silent() {
        let (publisher, rx) = channel();
        drop(rx);
        publisher.publish(ChangeEvent::RepositoryCloned {
            id: "1".into(),
            identifier: "demo".into(),
        });
    }
}
