//! 候补引擎进程
//!
//! 加载配置、连接数据库，运行持久化调度 Worker 直到收到关闭信号。

use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tracing::{info, warn};
use waitlist_engine::{
    EmailTransport, InMemoryBookingSink, InMemoryDirectory, LockConfig, LockManager,
    Repositories, SchedulerWorker, SmsTransport, SystemClock, Transport, WaitlistEngine,
};
use waitlist_shared::{config::AppConfig, database::Database, observability};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置：config/default.toml → config/{env}.toml → config/waitlist-engine.toml → 环境变量
    let config = AppConfig::load("waitlist-engine").unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {e}");
        AppConfig::default()
    });

    let _guard = observability::init(&config.observability).await?;

    info!("Starting waitlist-engine...");
    info!(environment = %config.environment, "Configuration loaded");
    config.waitlist.validate()?;

    // 2. 数据库
    let db = Database::connect(&config.database).await?;
    db.run_migrations().await?;
    info!("Database connection established");

    // 3. 互斥锁：多实例部署需要启用 Redis
    let lock_config = LockConfig::with_ttl(config.waitlist.lock_ttl());
    let locks = if config.redis.enabled {
        let client = redis::Client::open(config.redis.url.as_str())?;
        info!("Using Redis lock backend");
        Arc::new(LockManager::redis(client, lock_config))
    } else {
        if config.is_production() {
            warn!("Redis 未启用，互斥锁仅在单进程内有效");
        }
        Arc::new(LockManager::local(lock_config))
    };

    // 4. 引擎
    warn!("顾客目录为进程内实现且初始为空，通知将因缺少联系方式失败，需接入外部目录");
    warn!("预约草稿仅保存在进程内，需接入外部预约系统");
    let transports: Vec<Arc<dyn Transport>> = vec![
        Arc::new(EmailTransport::with_defaults()),
        Arc::new(SmsTransport::with_defaults()),
    ];
    let engine = Arc::new(WaitlistEngine::new(
        &config.waitlist,
        Repositories::postgres(db.pool().clone()),
        Arc::new(InMemoryDirectory::new()),
        Arc::new(InMemoryBookingSink::new()),
        transports,
        locks,
        Arc::new(SystemClock),
    )?);
    info!("Waitlist engine initialized");

    // 5. 调度 Worker
    let worker = SchedulerWorker::new(
        engine.clone(),
        engine.scheduler(),
        config.waitlist.scheduler_poll_interval(),
        config.waitlist.scheduler_batch_size,
    );

    tokio::select! {
        _ = worker.run() => {}
        _ = shutdown_signal() => {}
    }

    db.close().await;
    info!("Service shutdown complete");
    Ok(())
}

/// 监听 Ctrl+C 和 SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
