use serde::Serialize;

/// Structured trace events emitted across all SafeTrack crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    ConnectionRegistered {
        connection_id: String,
        identity_id: String,
        guest: bool,
        connections_for_identity: usize,
    },
    ConnectionDeregistered {
        connection_id: String,
        identity_id: String,
        went_offline: bool,
    },
    WalkStarted {
        session_id: String,
        walker_id: String,
        circle_size: usize,
    },
    WalkEnded {
        session_id: String,
        walker_id: String,
        status: String,
        path_points: usize,
    },
    DestinationReached {
        session_id: String,
        walker_id: String,
    },
    Fanout {
        message_event: String,
        requested: usize,
        delivered: usize,
        gaps: usize,
    },
    PersistenceFailed {
        record: String,
        error: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "st_event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fanout_serializes_with_event_tag() {
        let ev = TraceEvent::Fanout {
            message_event: "walk-location-update".into(),
            requested: 3,
            delivered: 2,
            gaps: 1,
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["event"], "Fanout");
        assert_eq!(v["message_event"], "walk-location-update");
        assert_eq!(v["gaps"], 1);
    }
}
