mod config;
use config::StreamTailConfig;
use hive_stream::{HttpBackend, StreamDispatcher, UpdateEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

fn describe(event: &UpdateEvent) -> String {
    let secondary: Vec<&str> = event.secondary_object_types().collect();
    let mut line = format!(
        "{} {:?} root={}",
        event.object_type(),
        event.base.operation,
        if event.root_id().is_empty() { "-" } else { event.root_id() }
    );
    if let Some(id) = &event.base.object_id {
        line.push_str(&format!(" object={}", id));
    }
    if !secondary.is_empty() {
        line.push_str(&format!(" also={}", secondary.join(",")));
    }
    line
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logging / tracing
    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "info,hive_stream=info,stream_tail=info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    // Load configuration (defaults + env + optional TOML overlay)
    let cfg = StreamTailConfig::load();
    info!(
        target: "stream_tail",
        base_url = %cfg.stream.base_url,
        channels = cfg.channels.len(),
        "Starting stream tail"
    );

    let backend = Arc::new(HttpBackend::new(&cfg.stream)?);
    let dispatcher = Arc::new(
        StreamDispatcher::new(backend).with_keep_alive_status(cfg.stream.keep_alive_status),
    );

    // One subscriber per configured channel; kept alive until exit
    let mut subscriptions = Vec::new();
    for key in &cfg.channels {
        let label = key.to_string();
        let verbose = cfg.verbose;
        subscriptions.push(dispatcher.registry().subscribe(key.clone(), move |events| {
            for event in events {
                if verbose {
                    match serde_json::to_string(event) {
                        Ok(json) => info!(target: "stream_tail", channel = %label, "{}", json),
                        Err(e) => error!(target: "stream_tail", error = %e, "Unprintable event"),
                    }
                } else {
                    info!(target: "stream_tail", channel = %label, "{}", describe(event));
                }
            }
        }));
    }

    dispatcher.initialize().await?;

    let stats_task = (cfg.stats_interval_secs > 0).then(|| {
        let dispatcher = Arc::clone(&dispatcher);
        let period = Duration::from_secs(cfg.stats_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match serde_json::to_string(&dispatcher.stats()) {
                    Ok(stats) => info!(target: "stream_tail", "stats {}", stats),
                    Err(e) => error!(target: "stream_tail", error = %e, "Failed to encode stats"),
                }
            }
        })
    });

    signal::ctrl_c().await?;
    info!(target: "stream_tail", "Shutting down");

    if let Some(task) = stats_task {
        task.abort();
    }
    dispatcher.shutdown().await;
    drop(subscriptions);
    Ok(())
}
