//! Communication tracer — append-only log of inter-agent hops for a session.

use uuid::Uuid;

use super::types::AgentCommunication;
use crate::transport::types::InterAgentRecord;

/// Status recorded when the wire frame does not carry one.
const DEFAULT_STATUS: &str = "sent";

/// Per-session, append-only trace of agent-to-agent communication.
#[derive(Debug, Clone, Default)]
pub struct CommunicationTracer {
    records: Vec<AgentCommunication>,
}

impl CommunicationTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a hop. Returns the stored, immutable record.
    pub fn record(&mut self, hop: &InterAgentRecord) -> &AgentCommunication {
        let correlation_id = hop
            .correlation_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let status = hop
            .status
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_STATUS.to_string());

        let record = AgentCommunication::new(
            correlation_id,
            hop.source.clone(),
            hop.target.clone(),
            hop.message.clone(),
            status,
            hop.latency_ms,
        );

        tracing::info!(
            target: "turnrelay::trace",
            correlation_id = %record.correlation_id(),
            source = %record.source_agent(),
            target_agent = %record.target_agent(),
            status = %record.status(),
            latency_ms = ?record.latency_ms(),
            "inter-agent hop"
        );

        self.records.push(record);
        let last = self.records.len() - 1;
        &self.records[last]
    }

    /// All records in arrival order.
    pub fn records(&self) -> &[AgentCommunication] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records sharing a correlation id, in arrival order.
    pub fn for_correlation<'a>(
        &'a self,
        correlation_id: &'a str,
    ) -> impl Iterator<Item = &'a AgentCommunication> + 'a {
        self.records
            .iter()
            .filter(move |r| r.correlation_id() == correlation_id)
    }
}
