//! Versioned snapshot encoding.
//!
//! Every document carries a numeric `version`. Decoding branches on it:
//! the current version is restored, any other version is rejected with a
//! diagnostic naming it, and a document with no version at all is only
//! read through the legacy layout when the caller opted in.

use crew_core::{AgentSnapshot, Error, LegacySnapshot, Result, SNAPSHOT_VERSION};
use serde_json::Value;

/// Result of decoding one stored document.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedSnapshot {
    Current(Box<AgentSnapshot>),
    /// Unversioned document read through the legacy fallback.
    Legacy(LegacySnapshot),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotCodec {
    allow_legacy: bool,
}

impl SnapshotCodec {
    pub fn new(allow_legacy: bool) -> Self {
        Self { allow_legacy }
    }

    pub fn encode(&self, snapshot: &AgentSnapshot) -> Result<String> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(Error::internal(format!(
                "refusing to write snapshot for '{}' tagged version {}",
                snapshot.name, snapshot.version
            )));
        }
        Ok(serde_json::to_string_pretty(snapshot)?)
    }

    /// Decode the document stored under `agent`.
    pub fn decode(&self, agent: &str, document: &str) -> Result<DecodedSnapshot> {
        let value: Value = serde_json::from_str(document)
            .map_err(|e| Error::corrupt_snapshot(agent, format!("not valid JSON: {}", e)))?;
        let Value::Object(fields) = &value else {
            return Err(Error::corrupt_snapshot(agent, "top level is not an object"));
        };

        match fields.get("version") {
            Some(tag) => {
                let version = tag.as_u64().ok_or_else(|| {
                    Error::corrupt_snapshot(agent, format!("version tag {} is not a number", tag))
                })?;
                if version != SNAPSHOT_VERSION {
                    return Err(Error::UnsupportedSnapshotVersion {
                        agent: agent.to_string(),
                        version,
                    });
                }
                let snapshot: AgentSnapshot = serde_json::from_value(value)
                    .map_err(|e| Error::corrupt_snapshot(agent, e.to_string()))?;
                if snapshot.name != agent {
                    return Err(Error::corrupt_snapshot(
                        agent,
                        format!("stored under '{}' but names '{}'", agent, snapshot.name),
                    ));
                }
                Ok(DecodedSnapshot::Current(Box::new(snapshot)))
            }
            None if self.allow_legacy => {
                let legacy: LegacySnapshot = serde_json::from_value(value)
                    .map_err(|e| Error::corrupt_snapshot(agent, e.to_string()))?;
                tracing::warn!(
                    agent = %agent,
                    "Snapshot has no version tag; reading it with the legacy layout"
                );
                Ok(DecodedSnapshot::Legacy(legacy))
            }
            None => Err(Error::corrupt_snapshot(
                agent,
                "missing version tag (legacy snapshots are disabled)",
            )),
        }
    }
}
