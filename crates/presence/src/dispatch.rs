//! Best-effort fanout to a resolved recipient set.
//!
//! Each recipient has a bounded outbound queue drained by its socket writer.
//! A full, closed, or already-deregistered queue is a delivery gap: the
//! message is dropped for that recipient only and never retried.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;

use st_domain::identity::ConnectionId;
use st_domain::trace::TraceEvent;
use st_protocol::ServerMessage;

use crate::registry::ConnectionRegistry;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub requested: usize,
    pub delivered: usize,
    pub gaps: usize,
}

#[derive(Clone)]
pub struct FanoutDispatcher {
    registry: Arc<ConnectionRegistry>,
}

impl FanoutDispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Send `msg` to every connection in `recipients`.  Never blocks on a
    /// slow recipient and never fails as a whole.
    pub fn dispatch(&self, msg: &ServerMessage, recipients: &HashSet<ConnectionId>) -> DispatchReport {
        let mut report = DispatchReport {
            requested: recipients.len(),
            ..Default::default()
        };
        for connection_id in recipients {
            if self.send(connection_id, msg.clone()) {
                report.delivered += 1;
            } else {
                report.gaps += 1;
            }
        }

        if report.gaps > 0 {
            TraceEvent::Fanout {
                message_event: msg.event_name().to_owned(),
                requested: report.requested,
                delivered: report.delivered,
                gaps: report.gaps,
            }
            .emit();
        }
        report
    }

    /// Queue one message for one connection.  Returns false on a gap.
    pub fn send(&self, connection_id: &str, msg: ServerMessage) -> bool {
        let Some(sink) = self.registry.sink(connection_id) else {
            tracing::debug!(connection_id, event = msg.event_name(), "recipient already gone");
            return false;
        };
        match sink.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(msg)) => {
                tracing::warn!(
                    connection_id,
                    event = msg.event_name(),
                    "outbound queue full, dropping message"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(connection_id, "outbound queue closed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Connection;
    use st_domain::identity::Identity;
    use tokio::sync::mpsc;

    fn pong() -> ServerMessage {
        ServerMessage::Pong { timestamp: 1 }
    }

    #[tokio::test]
    async fn slow_recipient_does_not_affect_others() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (fast_tx, mut fast_rx) = mpsc::channel(8);
        let (slow_tx, _slow_rx) = mpsc::channel(1);
        registry.register(Connection::new("fast", Identity::member("a", "A"), fast_tx));
        registry.register(Connection::new("slow", Identity::member("b", "B"), slow_tx));

        let dispatcher = FanoutDispatcher::new(registry);
        let all: HashSet<String> = ["fast", "slow"].iter().map(|s| s.to_string()).collect();

        let first = dispatcher.dispatch(&pong(), &all);
        assert_eq!(first.delivered, 2);

        let second = dispatcher.dispatch(&pong(), &all);
        assert_eq!(second, DispatchReport { requested: 2, delivered: 1, gaps: 1 });

        assert_eq!(fast_rx.recv().await, Some(pong()));
        assert_eq!(fast_rx.recv().await, Some(pong()));
    }

    #[tokio::test]
    async fn missing_and_closed_recipients_are_gaps() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (tx, rx) = mpsc::channel(4);
        registry.register(Connection::new("closed", Identity::member("a", "A"), tx));
        drop(rx);

        let dispatcher = FanoutDispatcher::new(registry);
        let targets: HashSet<String> = ["closed", "ghost"].iter().map(|s| s.to_string()).collect();
        let report = dispatcher.dispatch(&pong(), &targets);
        assert_eq!(report.delivered, 0);
        assert_eq!(report.gaps, 2);
    }

    #[tokio::test]
    async fn empty_recipient_set_is_noop() {
        let dispatcher = FanoutDispatcher::new(Arc::new(ConnectionRegistry::new()));
        assert_eq!(dispatcher.dispatch(&pong(), &HashSet::new()), DispatchReport::default());
    }
}
