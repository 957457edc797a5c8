//! Subscription hub.
//!
//! Tracks live connections (WebSocket clients and SSE streams) and which
//! documents each one follows, and fans document changes out to them.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::document::DocumentId;

/// A committed change to one document.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub document: DocumentId,
    /// New value, `None` when the document was deleted.
    pub value: Option<Value>,
    pub revision: u64,
}

/// Sender for changes delivered to one connection.
pub type ChangeSender = mpsc::UnboundedSender<Change>;

/// A single live connection.
#[derive(Debug)]
struct Connection {
    sender: ChangeSender,
    documents: HashSet<DocumentId>,
}

/// Fans document changes out to subscribers.
///
/// Thread-safe and can be shared across handlers via `Arc`.
#[derive(Debug, Default)]
pub struct SubscriptionHub {
    connections: DashMap<String, Connection>,
    subscribers: DashMap<DocumentId, HashSet<String>>,
    /// Highest revision published per document.
    published: DashMap<DocumentId, u64>,
}

impl SubscriptionHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a connection. Returns its id.
    pub fn register(&self, sender: ChangeSender) -> String {
        let conn_id = uuid::Uuid::new_v4().to_string();
        self.connections.insert(
            conn_id.clone(),
            Connection {
                sender,
                documents: HashSet::new(),
            },
        );
        tracing::debug!(conn_id = %conn_id, "Connection registered");
        conn_id
    }

    /// Drop a connection and all of its subscriptions.
    pub fn unregister(&self, conn_id: &str) {
        let Some((_, conn)) = self.connections.remove(conn_id) else {
            return;
        };
        for document in &conn.documents {
            self.remove_subscriber(document, conn_id);
        }
        tracing::debug!(
            conn_id = %conn_id,
            documents = conn.documents.len(),
            "Connection unregistered"
        );
    }

    /// Follow `document` on behalf of a connection. Returns `false` for an
    /// unknown connection.
    pub fn subscribe(&self, conn_id: &str, document: DocumentId) -> bool {
        let Some(mut conn) = self.connections.get_mut(conn_id) else {
            return false;
        };
        conn.documents.insert(document.clone());
        drop(conn);

        self.subscribers
            .entry(document)
            .or_default()
            .insert(conn_id.to_string());
        true
    }

    /// Stop following `document`. Returns whether a subscription existed.
    pub fn unsubscribe(&self, conn_id: &str, document: &DocumentId) -> bool {
        let removed = self
            .connections
            .get_mut(conn_id)
            .map(|mut conn| conn.documents.remove(document))
            .unwrap_or(false);
        if removed {
            self.remove_subscriber(document, conn_id);
        }
        removed
    }

    fn remove_subscriber(&self, document: &DocumentId, conn_id: &str) {
        if let Some(mut subs) = self.subscribers.get_mut(document) {
            subs.remove(conn_id);
            if subs.is_empty() {
                drop(subs);
                self.subscribers.remove_if(document, |_, subs| subs.is_empty());
            }
        }
    }

    /// Deliver a change to every subscriber of its document.
    ///
    /// Changes older than one already published for the same document are
    /// dropped, so subscribers never see a revision go backwards even when
    /// concurrent writers publish out of commit order. Returns the number of
    /// connections that received the change.
    pub fn publish(&self, change: Change) -> usize {
        {
            let mut latest = self.published.entry(change.document.clone()).or_insert(0);
            if change.revision <= *latest {
                tracing::debug!(
                    document = %change.document,
                    revision = change.revision,
                    latest = *latest,
                    "Dropping out-of-order change"
                );
                return 0;
            }
            *latest = change.revision;
        }

        let recipients: Vec<String> = self
            .subscribers
            .get(&change.document)
            .map(|subs| subs.iter().cloned().collect())
            .unwrap_or_default();

        let mut sent = 0;
        for conn_id in recipients {
            if let Some(conn) = self.connections.get(&conn_id) {
                if conn.sender.send(change.clone()).is_ok() {
                    sent += 1;
                }
            }
        }

        tracing::debug!(
            document = %change.document,
            revision = change.revision,
            recipients = sent,
            "Published change"
        );
        sent
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn subscriber_count(&self, document: &DocumentId) -> usize {
        self.subscribers
            .get(document)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(key: &str) -> DocumentId {
        DocumentId::parse("attendanceApp", key).unwrap()
    }

    fn change(key: &str, revision: u64) -> Change {
        Change {
            document: doc(key),
            value: Some(json!([revision])),
            revision,
        }
    }

    #[test]
    fn delivers_to_subscribers_only() {
        let hub = SubscriptionHub::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = hub.register(tx_a);
        let b = hub.register(tx_b);

        assert!(hub.subscribe(&a, doc("roster")));
        assert!(hub.subscribe(&b, doc("attendanceRecords")));

        assert_eq!(hub.publish(change("roster", 1)), 1);
        assert_eq!(rx_a.try_recv().unwrap().revision, 1);
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn drops_out_of_order_changes() {
        let hub = SubscriptionHub::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = hub.register(tx);
        hub.subscribe(&conn, doc("roster"));

        assert_eq!(hub.publish(change("roster", 3)), 1);
        assert_eq!(hub.publish(change("roster", 2)), 0);
        assert_eq!(hub.publish(change("roster", 3)), 0);
        assert_eq!(hub.publish(change("roster", 4)), 1);

        let revisions: Vec<u64> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|c| c.revision)
            .collect();
        assert_eq!(revisions, vec![3, 4]);
    }

    #[test]
    fn unregister_cleans_up() {
        let hub = SubscriptionHub::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = hub.register(tx);
        hub.subscribe(&conn, doc("roster"));
        hub.subscribe(&conn, doc("adminCredential"));
        assert_eq!(hub.subscriber_count(&doc("roster")), 1);

        hub.unregister(&conn);
        assert_eq!(hub.connection_count(), 0);
        assert_eq!(hub.subscriber_count(&doc("roster")), 0);
        assert_eq!(hub.subscriber_count(&doc("adminCredential")), 0);
        assert!(!hub.subscribe(&conn, doc("roster")));
    }

    #[test]
    fn unsubscribe_one_document() {
        let hub = SubscriptionHub::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = hub.register(tx);
        hub.subscribe(&conn, doc("roster"));

        assert!(hub.unsubscribe(&conn, &doc("roster")));
        assert!(!hub.unsubscribe(&conn, &doc("roster")));
        assert_eq!(hub.publish(change("roster", 1)), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_receiver_is_not_counted() {
        let hub = SubscriptionHub::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = hub.register(tx);
        hub.subscribe(&conn, doc("roster"));
        drop(rx);
        assert_eq!(hub.publish(change("roster", 1)), 0);
    }
}
