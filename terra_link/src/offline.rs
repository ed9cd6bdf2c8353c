//! Client-side offline command queue.
//!
//! When the link is down, non-critical commands are persisted verbatim,
//! original id, timestamp and signature, as one JSON line per entry, plus
//! the local queueing time. On reconnect each entry is submitted unchanged;
//! the server rejects whatever has gone stale in the meantime. Entries older
//! than the queue TTL are discarded on load and by `expire`. Critical
//! commands are never queued.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use terra_common::types::command::CommandEnvelope;

use crate::error::LinkError;

/// One persisted queue entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedCommand {
    pub envelope: CommandEnvelope,
    /// Wall-clock queueing time [ms].
    pub queued_at_ms: u64,
}

/// Append-only JSON-lines backed queue.
#[derive(Debug)]
pub struct OfflineQueue {
    path: PathBuf,
    ttl_ms: u64,
    enabled: bool,
    entries: Vec<QueuedCommand>,
}

impl OfflineQueue {
    /// Open (or create) the queue file, discarding expired entries and
    /// rewriting the file compacted.
    pub fn open(path: &Path, ttl_s: u64, enabled: bool, now_ms: u64) -> Result<Self, LinkError> {
        let ttl_ms = ttl_s.saturating_mul(1_000);
        let mut entries = Vec::new();
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            for (lineno, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<QueuedCommand>(line) {
                    Ok(entry) => {
                        if now_ms.saturating_sub(entry.queued_at_ms) <= ttl_ms {
                            entries.push(entry);
                        }
                    }
                    Err(e) => {
                        warn!(line = lineno + 1, error = %e, "dropping corrupt queue entry");
                    }
                }
            }
        }
        let queue = Self {
            path: path.to_path_buf(),
            ttl_ms,
            enabled,
            entries,
        };
        queue.rewrite()?;
        info!(entries = queue.entries.len(), "offline queue loaded");
        Ok(queue)
    }

    /// Queue a signed envelope verbatim.
    ///
    /// Refused for critical commands and when offline operation is disabled.
    pub fn push(&mut self, envelope: CommandEnvelope, now_ms: u64) -> Result<(), LinkError> {
        if !self.enabled {
            return Err(LinkError::NotQueueable(
                "offline operation disabled".to_string(),
            ));
        }
        if envelope.command.is_critical() {
            return Err(LinkError::NotQueueable(format!(
                "critical command '{}' is never queued",
                envelope.command.type_name()
            )));
        }
        let entry = QueuedCommand {
            envelope,
            queued_at_ms: now_ms,
        };
        let line = serde_json::to_string(&entry)
            .map_err(|e| LinkError::InvalidFormat(format!("queue entry: {e}")))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        self.entries.push(entry);
        Ok(())
    }

    /// Take every queued entry (oldest first) and truncate the file.
    pub fn drain(&mut self) -> Result<Vec<QueuedCommand>, LinkError> {
        let drained = std::mem::take(&mut self.entries);
        self.rewrite()?;
        Ok(drained)
    }

    /// Drop entries older than the TTL; returns how many were removed.
    pub fn expire(&mut self, now_ms: u64) -> Result<usize, LinkError> {
        let before = self.entries.len();
        let ttl_ms = self.ttl_ms;
        self.entries
            .retain(|e| now_ms.saturating_sub(e.queued_at_ms) <= ttl_ms);
        let removed = before - self.entries.len();
        if removed > 0 {
            self.rewrite()?;
        }
        Ok(removed)
    }

    fn rewrite(&self) -> Result<(), LinkError> {
        let mut out = String::new();
        for entry in &self.entries {
            let line = serde_json::to_string(entry)
                .map_err(|e| LinkError::InvalidFormat(format!("queue entry: {e}")))?;
            out.push_str(&line);
            out.push('\n');
        }
        std::fs::write(&self.path, out)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use terra_common::types::command::Command;
    use uuid::Uuid;

    fn envelope(command: Command) -> CommandEnvelope {
        CommandEnvelope {
            id: Uuid::new_v4(),
            command,
            timestamp_ms: 1_000,
            signature: "aa".repeat(32),
            nonce: None,
        }
    }

    fn queue_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("queue.jsonl")
    }

    #[test]
    fn push_and_drain_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut q = OfflineQueue::open(&queue_path(&dir), 604_800, true, 0).unwrap();
        let env = envelope(Command::Move {
            speed: 1.0,
            direction: 0.0,
        });
        q.push(env.clone(), 500).unwrap();
        assert_eq!(q.len(), 1);

        let drained = q.drain().unwrap();
        assert_eq!(drained.len(), 1);
        // Verbatim persistence: id, timestamp, signature untouched.
        assert_eq!(drained[0].envelope, env);
        assert_eq!(drained[0].queued_at_ms, 500);
        assert!(q.is_empty());
    }

    #[test]
    fn critical_commands_never_queued() {
        let dir = tempfile::tempdir().unwrap();
        let mut q = OfflineQueue::open(&queue_path(&dir), 604_800, true, 0).unwrap();
        let err = q
            .push(
                envelope(Command::EmergencyStop {
                    reason: "x".into(),
                }),
                0,
            )
            .unwrap_err();
        assert!(matches!(err, LinkError::NotQueueable(_)));
        assert!(q.is_empty());
    }

    #[test]
    fn disabled_queue_refuses() {
        let dir = tempfile::tempdir().unwrap();
        let mut q = OfflineQueue::open(&queue_path(&dir), 604_800, false, 0).unwrap();
        assert!(q
            .push(envelope(Command::Stop {}), 0)
            .is_err());
    }

    #[test]
    fn entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = queue_path(&dir);
        {
            let mut q = OfflineQueue::open(&path, 604_800, true, 0).unwrap();
            q.push(envelope(Command::Stop {}), 100).unwrap();
            q.push(envelope(Command::Stop {}), 200).unwrap();
        }
        let q = OfflineQueue::open(&path, 604_800, true, 1_000).unwrap();
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn expired_entries_dropped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = queue_path(&dir);
        {
            let mut q = OfflineQueue::open(&path, 10, true, 0).unwrap();
            q.push(envelope(Command::Stop {}), 1_000).unwrap();
            q.push(envelope(Command::Stop {}), 50_000).unwrap();
        }
        // TTL 10 s: the first entry (queued at t=1 s) is gone at t=60 s.
        let q = OfflineQueue::open(&path, 10, true, 60_000).unwrap();
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn corrupt_lines_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = queue_path(&dir);
        {
            let mut q = OfflineQueue::open(&path, 604_800, true, 0).unwrap();
            q.push(envelope(Command::Stop {}), 100).unwrap();
        }
        // Corrupt the file by hand.
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("this is not json\n");
        std::fs::write(&path, content).unwrap();

        let q = OfflineQueue::open(&path, 604_800, true, 1_000).unwrap();
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn expire_rewrites_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = queue_path(&dir);
        let mut q = OfflineQueue::open(&path, 10, true, 0).unwrap();
        q.push(envelope(Command::Stop {}), 0).unwrap();
        assert_eq!(q.expire(60_000).unwrap(), 1);
        let reopened = OfflineQueue::open(&path, 10, true, 60_000).unwrap();
        assert!(reopened.is_empty());
    }
}
