#![allow(clippy::print_stdout)]

use anyhow::Context as _;
use mcp_firewall::config::ConfHandle;
use mcp_firewall::service::FirewallService;

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args();
    let executable = args.next().context("executable name is missing from the environment")?;

    if args.next().is_some() {
        println!(
            r#"HELP:

    Run (configuration is read from the environment; see the README):
        "{executable}"

    Required environment:
        SALT_ENV            HMAC salt for placeholder generation (>= 16 bytes)

    Common options:
        POLICY_PATH         policy YAML (built-in permissive policy when unset)
        TOKEN_BACKEND       memory (default) or remote
        AUDIT_PATH          append-only audit log location
        PROXY_ENABLED       expose the provider proxy endpoints
        LISTEN_ADDR         bind address (default 0.0.0.0:8080)
"#
        );
        return Ok(());
    }

    let conf_handle = ConfHandle::init().context("unable to initialize configuration")?;
    let mut service = FirewallService::load(conf_handle).context("service loading failed")?;

    service.start().context("failed to start")?;

    // Waiting for some stop signal (CTRL-C…)
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()
        .context("failed to build the async runtime")?;
    rt.block_on(build_signals_fut())?;

    service.stop();

    Ok(())
}

#[cfg(unix)]
async fn build_signals_fut() -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate_signal = signal(SignalKind::terminate()).context("failed to create terminate signal stream")?;
    let mut quit_signal = signal(SignalKind::quit()).context("failed to create quit signal stream failed")?;
    let mut interrupt_signal =
        signal(SignalKind::interrupt()).context("failed to create interrupt signal stream failed")?;

    futures::future::select_all(vec![
        Box::pin(terminate_signal.recv()),
        Box::pin(quit_signal.recv()),
        Box::pin(interrupt_signal.recv()),
    ])
    .await;

    Ok(())
}

#[cfg(not(unix))]
async fn build_signals_fut() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await.context("CTRL_C signal failed")
}
