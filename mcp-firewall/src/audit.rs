//! Audit pipeline: every decision the firewall takes is written to an
//! append-only local JSONL log, and optionally offered to the SIEM shipper.
//!
//! Emission never suspends the request path: the writer is fed through an
//! unbounded channel and the SIEM queue is try-send only.

use async_trait::async_trait;
use camino::Utf8PathBuf;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt as _;
use tokio::sync::mpsc;

use crate::detect::{Span, SpanKind};
use crate::policy::{Context, Decision};
use crate::siem::SiemHandle;
use crate::task::{ShutdownSignal, Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Classify,
    Redact,
    Detokenize,
    Route,
    SiemDropped,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryObservation {
    #[serde(rename = "type")]
    pub kind: SpanKind,
    pub confidence: f64,
}

/// One audited action. The raw payload never appears here; only counts,
/// types, and sizes.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub action: AuditAction,
    pub context: Context,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<CategoryObservation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    pub redacted: usize,
    pub restored: usize,
    pub payload_bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dropped_records: Option<u64>,
}

impl AuditRecord {
    pub fn new(action: AuditAction, context: Context) -> Self {
        Self {
            timestamp: OffsetDateTime::now_utc(),
            action,
            context,
            categories: Vec::new(),
            decision: None,
            redacted: 0,
            restored: 0,
            payload_bytes: 0,
            upstream_status: None,
            dropped_records: None,
        }
    }

    /// Keeps one observation per kind, at its best confidence.
    pub fn with_spans(mut self, spans: impl IntoIterator<Item = Span>) -> Self {
        for span in spans {
            if let Some(existing) = self.categories.iter_mut().find(|o| o.kind == span.kind) {
                existing.confidence = existing.confidence.max(span.confidence);
            } else {
                self.categories.push(CategoryObservation {
                    kind: span.kind,
                    confidence: span.confidence,
                });
            }
        }
        self
    }

    pub fn with_decision(mut self, decision: Decision) -> Self {
        self.decision = Some(decision);
        self
    }
}

/// Shared emission handle. Cloned into every request handler.
#[derive(Clone)]
pub struct AuditHandle {
    tx: mpsc::UnboundedSender<AuditRecord>,
    siem: Option<SiemHandle>,
}

impl AuditHandle {
    pub fn emit(&self, record: AuditRecord) {
        if let Some(siem) = &self.siem {
            siem.offer(&record);
        }

        // The writer task outlives request handlers; failure here means the
        // service is shutting down.
        let _ = self.tx.send(record);
    }

    pub fn siem_enabled(&self) -> bool {
        self.siem.is_some()
    }

    /// Sender for the local writer only, bypassing the SIEM queue.
    pub(crate) fn local_sender(&self) -> mpsc::UnboundedSender<AuditRecord> {
        self.tx.clone()
    }
}

pub type AuditReceiver = mpsc::UnboundedReceiver<AuditRecord>;

pub fn audit_channel(siem: Option<SiemHandle>) -> (AuditHandle, AuditReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (AuditHandle { tx, siem }, rx)
}

/// Appends one JSON object per line to the local audit log. Each record is
/// written with a single `write`, so concurrent workers are serialized by
/// the kernel's append semantics.
pub struct AuditWriterTask {
    pub rx: AuditReceiver,
    pub path: Utf8PathBuf,
}

#[async_trait]
impl Task for AuditWriterTask {
    type Output = anyhow::Result<()>;

    const NAME: &'static str = "audit writer";

    async fn run(mut self, mut shutdown_signal: ShutdownSignal) -> Self::Output {
        use anyhow::Context as _;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path.as_std_path())
            .await
            .with_context(|| format!("failed to open audit log at {}", self.path))?;

        debug!(path = %self.path, "Task started");

        loop {
            tokio::select! {
                record = self.rx.recv() => {
                    let Some(record) = record else {
                        break;
                    };
                    write_record(&mut file, &record).await;
                }
                _ = shutdown_signal.wait() => {
                    // Drain whatever was emitted before the signal.
                    while let Ok(record) = self.rx.try_recv() {
                        write_record(&mut file, &record).await;
                    }
                    break;
                }
            }
        }

        let _ = file.flush().await;

        debug!("Task terminated");

        Ok(())
    }
}

async fn write_record(file: &mut tokio::fs::File, record: &AuditRecord) {
    let mut line = match serde_json::to_string(record) {
        Ok(line) => line,
        Err(error) => {
            error!(%error, "Couldn’t serialize audit record");
            return;
        }
    };
    line.push('\n');

    if let Err(error) = file.write_all(line.as_bytes()).await {
        error!(%error, "Couldn’t append audit record");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Span;

    fn ctx() -> Context {
        Context {
            caller: "user".to_owned(),
            region: "us".to_owned(),
            env: "prod".to_owned(),
            conversation_id: "c1".to_owned(),
        }
    }

    #[test]
    fn record_never_contains_payload_text() {
        let payload = "Email alice@ex.com please";
        let record = AuditRecord {
            payload_bytes: payload.len(),
            ..AuditRecord::new(AuditAction::Redact, ctx())
        }
        .with_spans([Span::new(6, 18, SpanKind::Email, 0.9)]);

        let line = serde_json::to_string(&record).expect("record serializes");
        assert!(!line.contains("alice@ex.com"));
        assert!(line.contains("EMAIL"));
        assert!(line.contains("\"payload_bytes\":25"));
    }

    #[test]
    fn observations_dedupe_by_kind_keeping_best_confidence() {
        let record = AuditRecord::new(AuditAction::Classify, ctx()).with_spans([
            Span::new(0, 5, SpanKind::Email, 0.5),
            Span::new(10, 15, SpanKind::Email, 0.9),
        ]);

        assert_eq!(record.categories.len(), 1);
        assert!((record.categories[0].confidence - 0.9).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn emitted_records_are_appended_as_json_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = Utf8PathBuf::from_path_buf(dir.path().join("audit.jsonl")).expect("utf-8 path");

        let (handle, rx) = audit_channel(None);
        let (shutdown_handle, shutdown_signal) = crate::task::ShutdownHandle::new();

        let task = crate::task::spawn_task(
            AuditWriterTask {
                rx,
                path: path.clone(),
            },
            shutdown_signal,
        );

        handle.emit(AuditRecord::new(AuditAction::Route, ctx()));
        handle.emit(AuditRecord::new(AuditAction::Redact, ctx()));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        shutdown_handle.signal();
        task.join().await.expect("writer join").expect("writer result");

        let contents = std::fs::read_to_string(path.as_std_path()).expect("read log");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let value: serde_json::Value = serde_json::from_str(line).expect("valid JSON line");
            assert!(value.get("timestamp").is_some());
        }
    }
}
