use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use flowwarden_common::{AnalyzedEvent, RawRecord, SourceKind};

use crate::features::TransformContext;

const EVENT_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2b7e_9a40_4d5e_8c31_f0a2_5b6d_7e91);

/// Id of the event derived from one record. Stable across replays of the same
/// offset, so a batch persisted again after a failed commit dedupes in the sink.
pub fn record_event_id(tenant: &str, kind: SourceKind, offset: i64) -> Uuid {
    Uuid::new_v5(&EVENT_NAMESPACE, format!("{tenant}/{kind}/{offset}").as_bytes())
}

/// Turns raw records of one source kind into analyzed events.
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &str;

    fn analyze(
        &self,
        kind: SourceKind,
        record: &RawRecord,
        ctx: &TransformContext,
    ) -> Result<Vec<AnalyzedEvent>>;
}

/// Wraps each record in a tenant-scoped envelope with the transform context
/// attached. One event per record.
#[derive(Debug, Default, Clone)]
pub struct EnvelopeAnalyzer;

impl EnvelopeAnalyzer {
    fn event_type(kind: SourceKind, payload: &serde_json::Value) -> String {
        payload
            .get("event_type")
            .or_else(|| payload.get("type"))
            .and_then(|v| v.as_str())
            .map(|t| format!("{kind}.{t}"))
            .unwrap_or_else(|| format!("{kind}.record"))
    }

    fn observed_at(record: &RawRecord) -> DateTime<Utc> {
        record
            .payload
            .get("timestamp")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(record.received_at)
    }
}

impl Analyzer for EnvelopeAnalyzer {
    fn name(&self) -> &str {
        "envelope"
    }

    fn analyze(
        &self,
        kind: SourceKind,
        record: &RawRecord,
        ctx: &TransformContext,
    ) -> Result<Vec<AnalyzedEvent>> {
        Ok(vec![AnalyzedEvent {
            id: record_event_id(&ctx.tenant, kind, record.offset),
            kind,
            tenant: ctx.tenant.clone(),
            event_type: Self::event_type(kind, &record.payload),
            observed_at: Self::observed_at(record),
            source_offset: record.offset,
            payload: json!({
                "record": record.payload,
                "features": ctx.features,
                "model": ctx.model_path.as_ref().map(|p| p.display().to_string()),
            }),
        }])
    }
}

/// Which analyzer handles which source kind.
#[derive(Clone, Default)]
pub struct AnalyzerRegistry {
    analyzers: BTreeMap<SourceKind, Arc<dyn Analyzer>>,
}

impl AnalyzerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The envelope analyzer registered for every supported kind.
    pub fn standard() -> Self {
        let envelope: Arc<dyn Analyzer> = Arc::new(EnvelopeAnalyzer);
        SourceKind::ALL
            .into_iter()
            .fold(Self::new(), |reg, kind| reg.with(kind, envelope.clone()))
    }

    pub fn with(mut self, kind: SourceKind, analyzer: Arc<dyn Analyzer>) -> Self {
        self.analyzers.insert(kind, analyzer);
        self
    }

    pub fn get(&self, kind: SourceKind) -> Option<Arc<dyn Analyzer>> {
        self.analyzers.get(&kind).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(payload: serde_json::Value) -> RawRecord {
        RawRecord {
            offset: 42,
            received_at: DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
                .unwrap()
                .with_timezone(&Utc),
            payload,
        }
    }

    #[test]
    fn event_type_comes_from_payload() {
        let ctx = TransformContext::new("acme");
        let events = EnvelopeAnalyzer
            .analyze(SourceKind::Dns, &record(json!({ "type": "query" })), &ctx)
            .unwrap();
        assert_eq!(events[0].event_type, "dns.query");
        assert_eq!(events[0].tenant, "acme");
        assert_eq!(events[0].source_offset, 42);
    }

    #[test]
    fn missing_type_falls_back_to_record() {
        let ctx = TransformContext::new("acme");
        let events = EnvelopeAnalyzer
            .analyze(SourceKind::Ssh, &record(json!([1, 2, 3])), &ctx)
            .unwrap();
        assert_eq!(events[0].event_type, "ssh.record");
    }

    #[test]
    fn payload_timestamp_wins_over_receive_time() {
        let ctx = TransformContext::new("acme");
        let rec = record(json!({ "timestamp": "2025-12-31T23:59:00+01:00" }));
        let events = EnvelopeAnalyzer.analyze(SourceKind::Http, &rec, &ctx).unwrap();
        assert_eq!(events[0].observed_at.to_rfc3339(), "2025-12-31T22:59:00+00:00");
    }

    #[test]
    fn features_travel_with_the_event() {
        let ctx = TransformContext::new("acme").with_feature("threshold", json!(0.8));
        let events = EnvelopeAnalyzer
            .analyze(SourceKind::Tls, &record(json!({})), &ctx)
            .unwrap();
        assert_eq!(events[0].payload["features"]["threshold"], 0.8);
    }

    #[test]
    fn same_record_gets_the_same_id() {
        let ctx = TransformContext::new("acme");
        let rec = record(json!({ "type": "query" }));
        let first = EnvelopeAnalyzer.analyze(SourceKind::Dns, &rec, &ctx).unwrap();
        let again = EnvelopeAnalyzer.analyze(SourceKind::Dns, &rec, &ctx).unwrap();
        assert_eq!(first[0].id, again[0].id);
        assert_eq!(first[0].id, record_event_id("acme", SourceKind::Dns, 42));
    }

    #[test]
    fn id_differs_by_kind_offset_and_tenant() {
        let base = record_event_id("acme", SourceKind::Dns, 42);
        assert_ne!(base, record_event_id("acme", SourceKind::Tls, 42));
        assert_ne!(base, record_event_id("acme", SourceKind::Dns, 43));
        assert_ne!(base, record_event_id("globex", SourceKind::Dns, 42));
    }

    #[test]
    fn standard_registry_covers_every_kind() {
        let reg = AnalyzerRegistry::standard();
        assert!(SourceKind::ALL.iter().all(|k| reg.get(*k).is_some()));
    }
}
