//! Long-running dispatcher process.

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    clap::Args,
    courier_config::CourierConfig,
    courier_dispatch::{Analysis, build_service},
    courier_metrics::{MetricsRecorderConfig, init_metrics},
    courier_scheduler::BroadcastNotifier,
    tokio::sync::broadcast::error::RecvError,
    tracing::{info, warn},
};

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Seconds between analysis reports in the log. 0 disables them.
    #[arg(long, default_value_t = 300)]
    pub report_secs: u64,
    /// Write Prometheus metrics text here on shutdown.
    #[arg(long)]
    pub metrics_out: Option<PathBuf>,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            report_secs: 300,
            metrics_out: None,
        }
    }
}

pub async fn run(config: CourierConfig, args: RunArgs) -> anyhow::Result<()> {
    let metrics = init_metrics(MetricsRecorderConfig {
        enabled: config.metrics.enabled,
        global_labels: config.metrics.labels.clone().into_iter().collect(),
    })?;

    let notifier = Arc::new(BroadcastNotifier::default());
    let mut events = notifier.subscribe();
    let service = build_service(&config, notifier.clone()).await?;

    let event_log = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => info!(
                    message_id = %event.message_id,
                    channel = %event.channel,
                    direction = ?event.direction,
                    status = %event.status,
                    "delivery event"
                ),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "delivery event log lagging"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    service.start().await?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let every = Duration::from_secs(args.report_secs.max(1));
    let mut report = tokio::time::interval_at(tokio::time::Instant::now() + every, every);

    loop {
        tokio::select! {
            res = &mut shutdown => {
                res?;
                info!("shutdown requested");
                break;
            }
            _ = report.tick(), if args.report_secs > 0 => log_report(&service.analysis()),
        }
    }

    service.stop().await;
    event_log.abort();

    println!("{}", serde_json::to_string_pretty(&service.analysis())?);
    if let Some(path) = args.metrics_out {
        std::fs::write(&path, metrics.render())?;
        info!(path = %path.display(), "metrics written");
    }
    Ok(())
}

fn log_report(analysis: &Analysis) {
    let overview = &analysis.overview;
    info!(
        total = overview.total_messages,
        failed = overview.failed_messages,
        reliability_pct = overview.reliability_pct,
        average_latency_ms = overview.average_latency_ms,
        total_cost = overview.total_cost,
        "dispatch report"
    );
    for line in &analysis.recommendations {
        info!(recommendation = %line);
    }
}
