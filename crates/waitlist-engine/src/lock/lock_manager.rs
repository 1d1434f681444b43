//! (business, service) 互斥锁管理器
//!
//! 默认使用进程内的 tokio 互斥锁；多实例部署时切换到 Redis 分布式锁。
//!
//! Redis 锁是固定租约，不续期：持锁期间的操作必须在 `lock_ttl_secs` 内完成。
//! 租约提前过期时，同一时段最多一个 Pending Offer 仍由存储层的唯一约束保证。
//! 进程内锁在最后一个持有者释放后从表中移除。

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use redis::Client as RedisClient;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::{Result, WaitlistError};

/// 锁配置
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Redis 锁租约
    pub default_ttl: Duration,
    /// 获取锁重试次数
    pub retry_count: u32,
    /// 重试间隔
    pub retry_delay: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(30),
            retry_count: 50,
            retry_delay: Duration::from_millis(100),
        }
    }
}

impl LockConfig {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            default_ttl: ttl,
            ..Self::default()
        }
    }

    /// 进程内锁的最长等待时间
    fn max_wait(&self) -> Duration {
        self.retry_delay * self.retry_count.max(1)
    }
}

type LocalLocks = Arc<DashMap<String, Arc<Mutex<()>>>>;

enum Backend {
    Local(LocalLocks),
    Redis(RedisClient),
}

/// 互斥锁管理器
///
/// 同一 (business, service) 的所有状态变更都必须在 `LockGuard` 持有期间完成。
pub struct LockManager {
    backend: Backend,
    config: LockConfig,
    /// 实例唯一标识，用于区分不同服务实例持有的锁
    instance_id: String,
}

impl LockManager {
    /// 进程内锁
    pub fn local(config: LockConfig) -> Self {
        Self {
            backend: Backend::Local(Arc::new(DashMap::new())),
            config,
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// Redis 分布式锁
    pub fn redis(client: RedisClient, config: LockConfig) -> Self {
        Self {
            backend: Backend::Redis(client),
            config,
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn lock_key(business_id: &str, service_id: &str) -> String {
        format!("waitlist:{}:{}", business_id, service_id)
    }

    /// 获取 (business, service) 锁
    ///
    /// 在配置的重试窗口内无法获取时返回 `LockConflict`。
    #[instrument(skip(self), fields(instance_id = %self.instance_id))]
    pub async fn acquire(&self, business_id: &str, service_id: &str) -> Result<LockGuard> {
        let key = Self::lock_key(business_id, service_id);
        // owner 格式: instance_id:uuid，确保锁的唯一性
        let owner = format!("{}:{}", self.instance_id, Uuid::new_v4());

        match &self.backend {
            Backend::Local(locks) => {
                let mutex = locks
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(())))
                    .clone();

                match tokio::time::timeout(self.config.max_wait(), mutex.lock_owned()).await {
                    Ok(guard) => {
                        debug!(key = %key, "Local lock acquired");
                        Ok(LockGuard::new_local(key, owner, guard, locks.clone()))
                    }
                    Err(_) => Err(WaitlistError::LockConflict { resource: key }),
                }
            }
            Backend::Redis(client) => {
                for attempt in 0..self.config.retry_count.max(1) {
                    if self.try_redis_lock(client, &key, &owner).await? {
                        debug!(key = %key, owner = %owner, attempt, "Redis lock acquired");
                        return Ok(LockGuard::new_redis(key, owner, client.clone()));
                    }
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(WaitlistError::LockConflict { resource: key })
            }
        }
    }

    #[cfg(test)]
    fn local_entries(&self) -> usize {
        match &self.backend {
            Backend::Local(locks) => locks.len(),
            Backend::Redis(_) => 0,
        }
    }

    /// 尝试获取 Redis 锁
    ///
    /// 使用 SET NX PX 原子操作，确保只有一个客户端能获取锁
    async fn try_redis_lock(&self, client: &RedisClient, key: &str, owner: &str) -> Result<bool> {
        let lock_key = format!("lock:{}", key);
        let ttl_ms = self.config.default_ttl.as_millis() as u64;

        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| WaitlistError::Redis(e.to_string()))?;

        // SET NX 成功时返回 "OK"，失败时返回 None
        let result: Option<String> = redis::cmd("SET")
            .arg(&lock_key)
            .arg(owner)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| WaitlistError::Redis(e.to_string()))?;

        Ok(result.is_some())
    }
}

/// 锁守卫
///
/// 进程内锁在 drop 时自动释放；Redis 锁应调用 `release()` 显式释放，
/// 否则只能等待 TTL 过期。
pub struct LockGuard {
    key: String,
    owner: String,
    backend: GuardBackend,
    /// 标记锁是否已被释放，避免重复释放
    released: bool,
}

enum GuardBackend {
    Local {
        guard: Option<OwnedMutexGuard<()>>,
        locks: LocalLocks,
    },
    Redis(RedisClient),
}

impl LockGuard {
    fn new_local(
        key: String,
        owner: String,
        guard: OwnedMutexGuard<()>,
        locks: LocalLocks,
    ) -> Self {
        Self {
            key,
            owner,
            backend: GuardBackend::Local {
                guard: Some(guard),
                locks,
            },
            released: false,
        }
    }

    fn new_redis(key: String, owner: String, client: RedisClient) -> Self {
        Self {
            key,
            owner,
            backend: GuardBackend::Redis(client),
            released: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// 显式释放锁
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        let client = match &self.backend {
            GuardBackend::Local { .. } => None,
            GuardBackend::Redis(client) => Some(client.clone()),
        };
        match client {
            Some(client) => self.release_redis(&client).await,
            None => {
                self.release_local();
                debug!(key = %self.key, "Local lock released");
                Ok(())
            }
        }
    }

    /// 释放进程内锁；没有其他等待者时移除表项
    fn release_local(&mut self) {
        let GuardBackend::Local { guard, locks } = &mut self.backend else {
            return;
        };
        if guard.take().is_none() {
            return;
        }
        // 等待者持有同一个 Arc，计数为 1 说明只剩表本身引用
        locks.remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }

    /// 释放 Redis 锁
    ///
    /// 使用 Lua 脚本原子验证 owner 并删除，防止误删其他客户端的锁
    async fn release_redis(&self, client: &RedisClient) -> Result<()> {
        let lock_key = format!("lock:{}", self.key);

        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| WaitlistError::Redis(e.to_string()))?;

        let script = r#"
            if redis.call("get", KEYS[1]) == ARGV[1] then
                return redis.call("del", KEYS[1])
            else
                return 0
            end
        "#;

        let result: i32 = redis::Script::new(script)
            .key(&lock_key)
            .arg(&self.owner)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| WaitlistError::Redis(e.to_string()))?;

        if result == 0 {
            // 锁已过期或被其他客户端持有
            warn!(
                key = %self.key,
                owner = %self.owner,
                "Lock was already released or owned by another client"
            );
        } else {
            debug!(key = %self.key, "Redis lock released");
        }

        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if matches!(self.backend, GuardBackend::Local { .. }) {
            self.release_local();
            return;
        }
        if !self.released {
            // Drop 中无法执行异步操作，锁最终会通过 TTL 过期自动释放
            warn!(
                lock_key = %self.key,
                owner = %self.owner,
                "LockGuard dropped without explicit release - lock will expire via TTL"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> LockConfig {
        LockConfig {
            default_ttl: Duration::from_secs(5),
            retry_count: 2,
            retry_delay: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_lock_key_format() {
        assert_eq!(LockManager::lock_key("biz1", "svc1"), "waitlist:biz1:svc1");
    }

    #[tokio::test]
    async fn test_local_lock_is_exclusive_per_pair() {
        let manager = LockManager::local(fast_config());

        let guard = manager.acquire("biz1", "svc1").await.unwrap();
        assert_eq!(guard.key(), "waitlist:biz1:svc1");

        let err = manager.acquire("biz1", "svc1").await.err().unwrap();
        assert!(matches!(err, WaitlistError::LockConflict { .. }));

        // 不同的 (business, service) 互不影响
        let other = manager.acquire("biz1", "svc2").await.unwrap();
        other.release().await.unwrap();

        guard.release().await.unwrap();
        let again = manager.acquire("biz1", "svc1").await.unwrap();
        again.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_local_lock_released_on_drop() {
        let manager = LockManager::local(fast_config());
        {
            let _guard = manager.acquire("biz1", "svc1").await.unwrap();
        }
        let guard = manager.acquire("biz1", "svc1").await.unwrap();
        guard.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_local_locks_are_evicted() {
        let manager = LockManager::local(fast_config());
        for svc in ["svc1", "svc2", "svc3"] {
            let guard = manager.acquire("biz1", svc).await.unwrap();
            guard.release().await.unwrap();
        }
        {
            let _dropped = manager.acquire("biz2", "svc1").await.unwrap();
        }
        assert_eq!(manager.local_entries(), 0);
    }

    #[tokio::test]
    async fn test_local_lock_kept_while_waiter_queued() {
        let manager = Arc::new(LockManager::local(LockConfig {
            default_ttl: Duration::from_secs(5),
            retry_count: 100,
            retry_delay: Duration::from_millis(10),
        }));
        let guard = manager.acquire("biz1", "svc1").await.unwrap();

        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move {
                let guard = manager.acquire("biz1", "svc1").await.unwrap();
                guard.release().await.unwrap();
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        guard.release().await.unwrap();
        waiter.await.unwrap();
        assert_eq!(manager.local_entries(), 0);
    }

    #[tokio::test]
    #[ignore] // 需要 Redis
    async fn test_redis_lock_exclusive() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let manager = LockManager::redis(RedisClient::open(url).unwrap(), fast_config());

        let guard = manager.acquire("biz-lock-test", "svc").await.unwrap();
        assert!(manager.acquire("biz-lock-test", "svc").await.is_err());
        guard.release().await.unwrap();
    }
}
