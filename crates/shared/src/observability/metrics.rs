//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。
//! 未安装 recorder 时，各 record_* 函数退化为空操作。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器，在指定端口暴露 `/metrics` 与 `/health`。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    register_waitlist_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

fn register_waitlist_metrics(service_name: &str) {
    metrics::describe_counter!("waitlist_joins_total", "Customers added to a waiting list");
    metrics::describe_counter!("offers_created_total", "Slot offers created");
    metrics::describe_counter!(
        "offers_resolved_total",
        "Offers that reached a terminal status, by outcome"
    );
    metrics::describe_counter!(
        "notifications_dispatched_total",
        "Notification jobs processed by the dispatcher, by outcome"
    );
    metrics::describe_counter!(
        "notification_channel_attempts_total",
        "Per-channel transport attempts, by channel and outcome"
    );
    metrics::describe_counter!(
        "suppressions_recorded_total",
        "Addresses added to the suppression list, by reason"
    );
    metrics::describe_counter!(
        "scheduled_work_processed_total",
        "Scheduled work items executed, by kind"
    );
    metrics::describe_gauge!(
        "worker_last_run_timestamp",
        "Unix timestamp of the last completed worker poll"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

/// 获取全局 Prometheus handle（用于自定义渲染）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

#[inline]
pub fn record_join() {
    metrics::counter!("waitlist_joins_total").increment(1);
}

#[inline]
pub fn record_offer_created() {
    metrics::counter!("offers_created_total").increment(1);
}

/// 记录 Offer 终态（accepted / declined / expired / cancelled）
#[inline]
pub fn record_offer_resolved(outcome: &str) {
    metrics::counter!("offers_resolved_total", "outcome" => outcome.to_string()).increment(1);
}

/// 记录一次派发结果（sent / deferred / failed / duplicate / retrying）
#[inline]
pub fn record_dispatch(outcome: &str) {
    metrics::counter!("notifications_dispatched_total", "outcome" => outcome.to_string())
        .increment(1);
}

#[inline]
pub fn record_channel_attempt(channel: &str, outcome: &str) {
    metrics::counter!(
        "notification_channel_attempts_total",
        "channel" => channel.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

#[inline]
pub fn record_suppression(reason: &str) {
    metrics::counter!("suppressions_recorded_total", "reason" => reason.to_string()).increment(1);
}

#[inline]
pub fn record_scheduled_work(kind: &str) {
    metrics::counter!("scheduled_work_processed_total", "kind" => kind.to_string()).increment(1);
}

/// 设置 Worker 最后运行时间
#[inline]
pub fn set_worker_last_run(worker: &str) {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    metrics::gauge!("worker_last_run_timestamp", "worker" => worker.to_string()).set(now);
}
