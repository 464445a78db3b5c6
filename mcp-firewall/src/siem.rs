//! SIEM shipping, out of the critical path.
//!
//! Records are offered to a bounded queue; a background task drains them into
//! batches and posts them to the configured sink. A full queue drops the
//! record on the floor and bumps a counter, which is itself audited locally.
//! Shipping failures never surface to a caller.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::audit::{AuditAction, AuditRecord};
use crate::policy::Context;
use crate::task::{ShutdownSignal, Task};

pub const QUEUE_CAPACITY: usize = 1000;
pub const BATCH_SIZE: usize = 100;
pub const BATCH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiemKind {
    None,
    Splunk,
    Elasticsearch,
    Datadog,
    Syslog,
}

#[derive(Debug, Clone)]
pub struct SiemConf {
    pub kind: SiemKind,
    pub url: String,
    pub token: Option<String>,
    pub index: Option<String>,
}

/// Non-blocking producer side of the SIEM queue.
#[derive(Clone)]
pub struct SiemHandle {
    tx: mpsc::Sender<serde_json::Value>,
    dropped: Arc<AtomicU64>,
}

impl SiemHandle {
    pub fn offer(&self, record: &AuditRecord) {
        let value = match serde_json::to_value(record) {
            Ok(value) => value,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        if self.tx.try_send(value).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

pub fn siem_channel() -> (SiemHandle, mpsc::Receiver<serde_json::Value>, Arc<AtomicU64>) {
    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    let dropped = Arc::new(AtomicU64::new(0));
    (
        SiemHandle {
            tx,
            dropped: Arc::clone(&dropped),
        },
        rx,
        dropped,
    )
}

pub enum SiemSink {
    Splunk {
        client: reqwest::Client,
        url: String,
        token: String,
    },
    Elasticsearch {
        client: reqwest::Client,
        url: String,
        index: String,
    },
    Datadog {
        client: reqwest::Client,
        url: String,
        api_key: String,
    },
    Syslog {
        socket: UdpSocket,
        target: SocketAddr,
        hostname: String,
    },
}

impl SiemSink {
    pub async fn build(conf: &SiemConf) -> anyhow::Result<SiemSink> {
        use anyhow::Context as _;

        let client = || {
            reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .timeout(Duration::from_secs(30))
                .build()
                .context("failed to build SIEM HTTP client")
        };

        match conf.kind {
            SiemKind::Splunk => Ok(SiemSink::Splunk {
                client: client()?,
                url: format!("{}/services/collector/event", conf.url.trim_end_matches('/')),
                token: conf.token.clone().context("SIEM_TOKEN is required for splunk")?,
            }),
            SiemKind::Elasticsearch => Ok(SiemSink::Elasticsearch {
                client: client()?,
                url: format!("{}/_bulk", conf.url.trim_end_matches('/')),
                index: conf.index.clone().unwrap_or_else(|| "mcp-firewall-audit".to_owned()),
            }),
            SiemKind::Datadog => Ok(SiemSink::Datadog {
                client: client()?,
                url: format!("{}/api/v2/logs", conf.url.trim_end_matches('/')),
                api_key: conf.token.clone().context("SIEM_TOKEN is required for datadog")?,
            }),
            SiemKind::Syslog => {
                let target: SocketAddr = conf.url.parse().context("SIEM_URL must be host:port for syslog")?;
                let socket = UdpSocket::bind("0.0.0.0:0").await.context("failed to bind UDP socket")?;
                let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "-".to_owned());
                Ok(SiemSink::Syslog {
                    socket,
                    target,
                    hostname,
                })
            }
            SiemKind::None => anyhow::bail!("SIEM sink requested with SIEM_TYPE=none"),
        }
    }

    async fn ship(&self, batch: &[serde_json::Value]) -> anyhow::Result<()> {
        use anyhow::Context as _;

        match self {
            SiemSink::Splunk { client, url, token } => {
                let mut body = String::new();
                for record in batch {
                    let event = serde_json::json!({ "event": record, "sourcetype": "mcp-firewall" });
                    body.push_str(&event.to_string());
                    body.push('\n');
                }

                client
                    .post(url)
                    .header("Authorization", format!("Splunk {token}"))
                    .body(body)
                    .send()
                    .await
                    .context("splunk HEC post failed")?
                    .error_for_status()
                    .context("splunk HEC rejected the batch")?;
            }
            SiemSink::Elasticsearch { client, url, index } => {
                let mut body = String::new();
                for record in batch {
                    body.push_str(&serde_json::json!({ "index": { "_index": index } }).to_string());
                    body.push('\n');
                    body.push_str(&record.to_string());
                    body.push('\n');
                }

                client
                    .post(url)
                    .header("content-type", "application/x-ndjson")
                    .body(body)
                    .send()
                    .await
                    .context("elasticsearch bulk post failed")?
                    .error_for_status()
                    .context("elasticsearch rejected the batch")?;
            }
            SiemSink::Datadog { client, url, api_key } => {
                let entries: Vec<serde_json::Value> = batch
                    .iter()
                    .map(|record| {
                        serde_json::json!({
                            "ddsource": "mcp-firewall",
                            "service": "mcp-firewall",
                            "message": record.to_string(),
                        })
                    })
                    .collect();

                client
                    .post(url)
                    .header("DD-API-KEY", api_key)
                    .json(&entries)
                    .send()
                    .await
                    .context("datadog post failed")?
                    .error_for_status()
                    .context("datadog rejected the batch")?;
            }
            SiemSink::Syslog {
                socket,
                target,
                hostname,
            } => {
                for record in batch {
                    let datagram = format_rfc5424(hostname, record);
                    socket
                        .send_to(datagram.as_bytes(), target)
                        .await
                        .context("syslog datagram send failed")?;
                }
            }
        }

        Ok(())
    }
}

/// RFC 5424, facility local0, severity informational.
fn format_rfc5424(hostname: &str, record: &serde_json::Value) -> String {
    let timestamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "-".to_owned());

    format!("<134>1 {timestamp} {hostname} mcp-firewall - - - {record}")
}

/// Drains the SIEM queue into batches of [`BATCH_SIZE`] records or
/// [`BATCH_INTERVAL`], whichever comes first.
pub struct SiemShipperTask {
    pub rx: mpsc::Receiver<serde_json::Value>,
    pub sink: SiemSink,
    pub dropped: Arc<AtomicU64>,
    /// Local writer channel for auditing drop counts.
    pub local_audit: mpsc::UnboundedSender<AuditRecord>,
}

#[async_trait]
impl Task for SiemShipperTask {
    type Output = anyhow::Result<()>;

    const NAME: &'static str = "siem shipper";

    async fn run(mut self, mut shutdown_signal: ShutdownSignal) -> Self::Output {
        debug!("Task started");

        let mut batch: Vec<serde_json::Value> = Vec::with_capacity(BATCH_SIZE);
        let mut interval = tokio::time::interval(BATCH_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                record = self.rx.recv() => {
                    let Some(record) = record else {
                        break;
                    };

                    batch.push(record);

                    if batch.len() >= BATCH_SIZE {
                        self.flush(&mut batch).await;
                    }
                }
                _ = interval.tick() => {
                    self.flush(&mut batch).await;
                }
                _ = shutdown_signal.wait() => {
                    break;
                }
            }
        }

        self.flush(&mut batch).await;

        debug!("Task terminated");

        Ok(())
    }
}

impl SiemShipperTask {
    async fn flush(&self, batch: &mut Vec<serde_json::Value>) {
        if !batch.is_empty() {
            if let Err(error) = self.sink.ship(batch).await {
                warn!(error = format!("{error:#}"), count = batch.len(), "SIEM shipping failed");
            }
            batch.clear();
        }

        let dropped = self.dropped.swap(0, Ordering::Relaxed);
        if dropped > 0 {
            warn!(dropped, "SIEM queue overflowed; records were dropped");

            let context = Context {
                caller: "mcp-firewall".to_owned(),
                region: "-".to_owned(),
                env: "-".to_owned(),
                conversation_id: "-".to_owned(),
            };
            let record = AuditRecord {
                dropped_records: Some(dropped),
                ..AuditRecord::new(AuditAction::SiemDropped, context)
            };
            let _ = self.local_audit.send(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> AuditRecord {
        AuditRecord::new(
            AuditAction::Route,
            Context {
                caller: "user".to_owned(),
                region: "us".to_owned(),
                env: "prod".to_owned(),
                conversation_id: "c1".to_owned(),
            },
        )
    }

    #[tokio::test]
    async fn queue_overflow_drops_and_counts() {
        let (handle, _rx, dropped) = siem_channel();

        for _ in 0..(QUEUE_CAPACITY + 7) {
            handle.offer(&sample_record());
        }

        assert_eq!(dropped.load(Ordering::Relaxed), 7);
    }

    #[test]
    fn rfc5424_frame_shape() {
        let record = serde_json::json!({"action": "route"});
        let frame = format_rfc5424("host01", &record);

        assert!(frame.starts_with("<134>1 "));
        assert!(frame.contains(" host01 mcp-firewall - - - "));
        assert!(frame.ends_with(r#"{"action":"route"}"#));
    }
}
