use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Source kinds ---

/// The fixed set of source kinds a pipeline can be attached for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Dns,
    Http,
    Tls,
    Netflow,
    Syslog,
    Smtp,
    Ssh,
    Dhcp,
    Kerberos,
}

impl SourceKind {
    pub const ALL: [SourceKind; 9] = [
        SourceKind::Dns,
        SourceKind::Http,
        SourceKind::Tls,
        SourceKind::Netflow,
        SourceKind::Syslog,
        SourceKind::Smtp,
        SourceKind::Ssh,
        SourceKind::Dhcp,
        SourceKind::Kerberos,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dns => "dns",
            Self::Http => "http",
            Self::Tls => "tls",
            Self::Netflow => "netflow",
            Self::Syslog => "syslog",
            Self::Smtp => "smtp",
            Self::Ssh => "ssh",
            Self::Dhcp => "dhcp",
            Self::Kerberos => "kerberos",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown source kind: {0}")]
pub struct UnknownSourceKind(pub String);

impl FromStr for SourceKind {
    type Err = UnknownSourceKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        SourceKind::ALL
            .into_iter()
            .find(|k| k.as_str() == lower)
            .ok_or_else(|| UnknownSourceKind(s.to_string()))
    }
}

// --- Records flowing through a pipeline ---

/// A record as pulled from a source, before analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Monotonic position of the record within its source.
    pub offset: i64,
    pub received_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// An analyzer's output, ready to be persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzedEvent {
    pub id: Uuid,
    pub kind: SourceKind,
    pub tenant: String,
    pub event_type: String,
    pub observed_at: DateTime<Utc>,
    pub source_offset: i64,
    pub payload: serde_json::Value,
}

/// All events produced by one batch of the running computation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordBatch {
    pub batch_seq: u64,
    pub events: Vec<AnalyzedEvent>,
}

impl RecordBatch {
    pub fn new(batch_seq: u64) -> Self {
        Self {
            batch_seq,
            events: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }
}
