//! Foreground service mode: run the monitor until a shutdown signal.

use crate::backend;
use crate::config::Config;
use crate::events::{EventSink, FanOutSink, JsonLinesSink, LogSink};
use crate::monitor::{Monitor, MonitorConfig};
use anyhow::Context;
use std::sync::Arc;

/// How monitor events reach the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutput {
    /// Coloured lines on stderr.
    Console,
    /// One JSON object per event on stdout.
    JsonLines,
    /// Log records only.
    LogOnly,
}

/// Build the sink for `output`. Events are always logged as well.
pub fn event_sink(output: EventOutput) -> Arc<dyn EventSink> {
    let sink = FanOutSink::new().with(Arc::new(LogSink));
    let sink = match output {
        EventOutput::Console => sink.with(Arc::new(crate::events::ConsoleSink)),
        EventOutput::JsonLines => sink.with(Arc::new(JsonLinesSink::stdout())),
        EventOutput::LogOnly => sink,
    };
    Arc::new(sink)
}

/// Run the monitor: build the backend, start, wait for SIGINT or SIGTERM.
///
/// # Returns
/// Ok(()) on graceful shutdown, error when the configuration is invalid
pub async fn run_monitor(config: Config, output: EventOutput) -> anyhow::Result<()> {
    config.validate().context("Invalid configuration")?;

    let backend = backend::from_config(&config);
    let monitor_config = MonitorConfig::from(&config);
    tracing::info!(
        keyword = %monitor_config.keyword,
        backend = backend.name(),
        watchdog_stall_ms = monitor_config.watchdog.stall.as_millis() as u64,
        "wakeguard starting"
    );

    let monitor = Arc::new(Monitor::new(monitor_config, backend, event_sink(output)));
    monitor.start();

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                tracing::error!(error = %e, "failed to listen for SIGINT");
            }
            tracing::info!("received SIGINT, shutting down");
        }
        res = wait_for_sigterm() => {
            if let Err(e) = res {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
            }
            tracing::info!("received SIGTERM, shutting down");
        }
    }

    // Stopping joins worker threads.
    let stopping = Arc::clone(&monitor);
    tokio::task::spawn_blocking(move || stopping.stop())
        .await
        .context("Monitor shutdown task failed")?;

    let status = monitor.status();
    tracing::info!(restarts = status.restarts, "wakeguard stopped");
    Ok(())
}

/// Wait for SIGTERM signal (used by service managers).
#[cfg(unix)]
async fn wait_for_sigterm() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate())?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_sigterm() -> std::io::Result<()> {
    // On non-Unix, just wait forever (Ctrl+C will still work)
    std::future::pending::<()>().await
}
