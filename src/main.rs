//! # Veilsync 守护进程入口
//!
//! 连接 worker 控制通道并同步订阅。
//!
//! ## 主要功能
//! - 绑定 worker，记录状态变化与流量采样
//! - 启动时创建配置中的订阅，并按间隔定期刷新
//! - 收到信号后优雅关闭并解除绑定
//!
//! ## 配置
//! - 第一个命令行参数或 `VEILSYNC_CONFIG`: TOML 配置文件路径
//! - 否则读取 `VEILSYNC_*` 环境变量
//! - `RUST_LOG` 优先于配置中的日志级别

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use veilsync::{
    config::Config,
    service::{ReconnectPolicy, ServiceCallback, ServiceConnection, ServiceState},
    subscription::{
        HttpFetcher, MemoryProfileStore, MemorySubscriptionStore, SubscriptionManager,
    },
    worker::{TrafficStats, WsWorkerConnector},
    Error,
};

/// Observer that writes worker activity to the log
struct LoggingCallback;

impl ServiceCallback for LoggingCallback {
    fn on_state_changed(
        &self,
        state: ServiceState,
        profile_name: Option<&str>,
        error_message: Option<&str>,
    ) {
        match error_message {
            Some(message) => error!(%state, profile = ?profile_name, "Worker failed: {}", message),
            None => info!(%state, profile = ?profile_name, "Worker state changed"),
        }
    }

    fn on_traffic_updated(&self, profile_id: i64, stats: TrafficStats) {
        debug!(
            profile_id,
            tx_rate = stats.tx_rate,
            rx_rate = stats.rx_rate,
            tx_total = stats.tx_total,
            rx_total = stats.rx_total,
            "Traffic"
        );
    }

    fn on_traffic_persisted(&self, profile_id: i64) {
        debug!(profile_id, "Traffic persisted");
    }
}

fn load_config() -> anyhow::Result<Config> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("VEILSYNC_CONFIG").ok());

    match path {
        Some(path) => Config::from_file(&path).with_context(|| format!("loading {}", path)),
        None => Config::from_env().context("loading environment configuration"),
    }
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM signal"),
                    _ = sigint.recv() => info!("Received SIGINT signal"),
                }
            }
            _ => {
                warn!("Signal handlers unavailable, falling back to Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C signal");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Veilsync v{}", veilsync::VERSION);
    info!(
        endpoint = %config.worker_endpoint,
        mode = %config.service_mode,
        subscriptions = config.subscription_urls.len(),
        "Configuration loaded"
    );

    // Worker connection
    let connector = Arc::new(WsWorkerConnector::new(
        config.worker_endpoint.clone(),
        Duration::from_millis(config.command_timeout_ms),
    ));
    let connection = ServiceConnection::new(connector, ReconnectPolicy::from_config(&config));
    connection
        .set_bandwidth_interval(config.bandwidth_interval_ms)
        .await;
    if let Err(e) = connection.connect(Arc::new(LoggingCallback)).await {
        warn!("Worker not reachable yet: {}", e);
    }

    // Subscription sync
    let manager = Arc::new(SubscriptionManager::new(
        Arc::new(MemoryProfileStore::new()),
        Arc::new(MemorySubscriptionStore::new()),
        Arc::new(HttpFetcher::from_config(&config)),
        config.network_settings()?,
    ));

    for url in &config.subscription_urls {
        match manager.create(url, config.use_proxy_for_fetch).await {
            Ok(subscription) => info!(
                id = subscription.id,
                group = %subscription.group,
                status = ?subscription.status,
                "Subscription added"
            ),
            Err(Error::DuplicateGroup(group)) => {
                warn!(url = %url, group = %group, "Subscription group already present")
            }
            Err(e) => error!(url = %url, "Failed to add subscription: {}", e),
        }
    }

    let refresh = (config.subscription_refresh_secs > 0).then(|| {
        let manager = manager.clone();
        let use_proxy = config.use_proxy_for_fetch;
        let period = Duration::from_secs(config.subscription_refresh_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // first tick fires immediately; startup already synced
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(e) = manager.update_all(use_proxy).await {
                    warn!("Subscription refresh failed: {}", e);
                }
            }
        })
    });

    wait_for_shutdown().await;
    info!("Shutdown signal received, stopping...");

    if let Some(task) = refresh {
        task.abort();
    }
    connection.disconnect().await;

    info!("Shutdown complete");
    Ok(())
}
