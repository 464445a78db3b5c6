//! Service lifecycle: configuration load, task spawning, graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::runtime::{self, Runtime};

use crate::FwState;
use crate::audit::{AuditWriterTask, audit_channel};
use crate::classify::Classifier;
use crate::config::{ConfHandle, TokenBackend};
use crate::detect::Detector;
use crate::log::{self, LoggerGuard};
use crate::pipeline::Pipeline;
use crate::siem::{SiemShipperTask, SiemSink, siem_channel};
use crate::task::{ChildTask, ShutdownHandle, ShutdownSignal, Task};
use crate::token::Tokenizer;
use crate::token::remote::RemoteTokenStore;
use crate::token::store::{DynTokenStore, MemoryTokenStore, SweepTask};

pub const SERVICE_NAME: &str = "mcp-firewall";

#[allow(clippy::large_enum_variant)] // `Running` variant is bigger than `Stopped` but we don't care
enum ServiceState {
    Stopped,
    Running {
        shutdown_handle: ShutdownHandle,
        runtime: Runtime,
    },
}

pub struct FirewallService {
    conf_handle: ConfHandle,
    state: ServiceState,
    _logger_guard: LoggerGuard,
}

impl FirewallService {
    pub fn load(conf_handle: ConfHandle) -> anyhow::Result<Self> {
        let conf = conf_handle.get_conf();

        let logger_guard = log::init(conf.log_path.as_deref(), &conf.log_filter).context("failed to setup logger")?;

        info!(version = env!("CARGO_PKG_VERSION"));
        info!(
            policy_version = conf.policy.version,
            token_backend = conf.token_backend.as_str(),
            proxy_enabled = conf.proxy_enabled,
            "Configuration loaded"
        );

        Ok(FirewallService {
            conf_handle,
            state: ServiceState::Stopped,
            _logger_guard: logger_guard,
        })
    }

    pub fn start(&mut self) -> anyhow::Result<()> {
        let runtime = runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to create runtime")?;

        let conf_handle = self.conf_handle.clone();

        // spawn_tasks needs to run in the runtime in order to bind sockets.
        let tasks = runtime.block_on(spawn_tasks(conf_handle))?;

        trace!("Tasks created");

        let mut join_all = futures::future::select_all(tasks.inner.into_iter().map(|child| Box::pin(child.join())));

        runtime.spawn(async {
            loop {
                let (result, _, rest) = join_all.await;

                match result {
                    Ok(Ok(())) => trace!("A task terminated gracefully"),
                    Ok(Err(error)) => error!(error = format!("{error:#}"), "A task failed"),
                    Err(error) => error!(%error, "Something went very wrong with a task"),
                }

                if rest.is_empty() {
                    break;
                } else {
                    join_all = futures::future::select_all(rest);
                }
            }
        });

        self.state = ServiceState::Running {
            shutdown_handle: tasks.shutdown_handle,
            runtime,
        };

        Ok(())
    }

    pub fn stop(&mut self) {
        match std::mem::replace(&mut self.state, ServiceState::Stopped) {
            ServiceState::Stopped => {
                info!("Attempted to stop the firewall service, but it's already stopped");
            }
            ServiceState::Running {
                shutdown_handle,
                runtime,
            } => {
                info!("Stopping the firewall service");

                // Send shutdown signals to all tasks
                shutdown_handle.signal();

                runtime.block_on(async move {
                    tokio::select! {
                        _ = shutdown_handle.all_closed() => {
                            debug!("All tasks closed gracefully");
                        }
                        _ = tokio::time::sleep(Duration::from_secs(10)) => {
                            warn!("Some tasks didn’t terminate at all");
                        }
                    }
                });

                runtime.shutdown_timeout(Duration::from_secs(3));

                self.state = ServiceState::Stopped;
            }
        }
    }
}

struct Tasks {
    inner: Vec<ChildTask<anyhow::Result<()>>>,
    shutdown_handle: ShutdownHandle,
    shutdown_signal: ShutdownSignal,
}

impl Tasks {
    fn new() -> Self {
        let (shutdown_handle, shutdown_signal) = ShutdownHandle::new();

        Self {
            inner: Vec::new(),
            shutdown_handle,
            shutdown_signal,
        }
    }

    fn register<T>(&mut self, task: T)
    where
        T: Task<Output = anyhow::Result<()>> + 'static,
    {
        let child = crate::task::spawn_task(task, self.shutdown_signal.clone());
        self.inner.push(child);
    }
}

async fn spawn_tasks(conf_handle: ConfHandle) -> anyhow::Result<Tasks> {
    let conf = conf_handle.get_conf();

    let mut tasks = Tasks::new();

    let (store, sweep_task): (DynTokenStore, Option<SweepTask>) = match conf.token_backend {
        TokenBackend::Memory => {
            let store = Arc::new(MemoryTokenStore::new(conf.token_ttl));
            let interval_secs = u64::try_from(conf.token_ttl.whole_seconds() / 10).unwrap_or(1).max(1);
            let sweep = SweepTask {
                store: Arc::clone(&store),
                interval: Duration::from_secs(interval_secs),
            };
            (store, Some(sweep))
        }
        TokenBackend::Remote => {
            let url = conf.remote_url.as_ref().context("REMOTE_URL is validated at startup")?;
            let key = conf
                .encryption_key
                .as_ref()
                .context("ENCRYPTION_KEY is validated at startup")?;

            let store = RemoteTokenStore::connect(url, key, conf.token_ttl)
                .await
                .context("failed to connect to the remote token store")?;

            (Arc::new(store), None)
        }
    };

    let siem_setup = match &conf.siem {
        Some(siem_conf) => {
            let sink = SiemSink::build(siem_conf).await.context("failed to build the SIEM sink")?;
            let (handle, rx, dropped) = siem_channel();
            Some((handle, rx, dropped, sink))
        }
        None => None,
    };

    let (audit_handle, audit_rx) = audit_channel(siem_setup.as_ref().map(|(handle, ..)| handle.clone()));

    let pipeline = Pipeline::new(
        Detector::new(&conf.internal_domain_suffixes),
        Classifier::new(&conf.classifier_keywords, conf.classifier_threshold),
        Arc::clone(&conf.policy),
        Tokenizer::new(conf.salt.to_vec()),
        store,
        conf.token_ttl,
        conf.max_payload_bytes,
    );

    let upstream = reqwest::Client::builder()
        .connect_timeout(crate::proxy::CONNECT_TIMEOUT)
        .build()
        .context("failed to build the upstream HTTP client")?;

    let state = FwState {
        conf_handle: conf_handle.clone(),
        pipeline: Arc::new(pipeline),
        audit: audit_handle.clone(),
        upstream,
        shutdown_signal: tasks.shutdown_signal.clone(),
    };

    let listener = tokio::net::TcpListener::bind(conf.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", conf.listen_addr))?;

    info!(addr = %conf.listen_addr, "Listener bound");

    tasks.register(HttpListenerTask {
        listener,
        state: state.clone(),
    });

    if let Some(sweep) = sweep_task {
        tasks.register(sweep);
    }

    tasks.register(AuditWriterTask {
        rx: audit_rx,
        path: conf.audit_path.clone(),
    });

    if let Some((_handle, rx, dropped, sink)) = siem_setup {
        tasks.register(SiemShipperTask {
            rx,
            sink,
            dropped,
            local_audit: audit_handle.local_sender(),
        });
    }

    Ok(tasks)
}

struct HttpListenerTask {
    listener: tokio::net::TcpListener,
    state: FwState,
}

#[async_trait]
impl Task for HttpListenerTask {
    type Output = anyhow::Result<()>;

    const NAME: &'static str = "http listener";

    async fn run(self, mut shutdown_signal: ShutdownSignal) -> Self::Output {
        let router = crate::api::make_router(self.state);

        axum::serve(self.listener, router)
            .with_graceful_shutdown(async move { shutdown_signal.wait().await })
            .await
            .context("HTTP server failed")
    }
}
