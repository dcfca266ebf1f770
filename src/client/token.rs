//! Delegation token lifecycle / 委托令牌生命周期
//!
//! The token is held in a [`TokenCell`] shared between request building and
//! the background refresh task. The refresh task renews ahead of expiry with
//! jitter, retries with linear backoff and falls back to acquiring a fresh
//! token after repeated failures.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::{ClientError, ClientResult};

/// Opaque delegation token plus its expiration / 委托令牌及其过期时间
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegationToken {
    pub value: String,
    /// Unknown until the first successful renewal / 首次续期前未知
    pub expires_at: Option<DateTime<Utc>>,
}

impl DelegationToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            expires_at: None,
        }
    }

    pub fn with_expiry(value: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            expires_at: Some(expires_at),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(exp) if exp <= now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Convert a gateway expiration (ms since epoch) / 转换网关返回的过期时间
pub fn expiration_from_millis(ms: i64) -> ClientResult<DateTime<Utc>> {
    if ms <= 0 {
        return Err(ClientError::malformed(format!(
            "non-positive token expiration: {}",
            ms
        )));
    }
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| ClientError::malformed(format!("token expiration out of range: {}", ms)))
}

/// Guarded shared token slot / 受保护的共享令牌槽
#[derive(Debug, Default)]
pub struct TokenCell {
    inner: RwLock<Option<DelegationToken>>,
}

impl TokenCell {
    pub fn new(token: Option<DelegationToken>) -> Self {
        Self {
            inner: RwLock::new(token),
        }
    }

    pub fn get(&self) -> Option<DelegationToken> {
        self.inner.read().clone()
    }

    /// Token that may still be attached to requests / 仍可附加到请求的令牌
    pub fn usable(&self) -> Option<DelegationToken> {
        self.inner.read().clone().filter(|t| !t.is_expired())
    }

    pub fn replace(&self, token: DelegationToken) {
        *self.inner.write() = Some(token);
    }

    pub fn clear(&self) {
        *self.inner.write() = None;
    }

    /// Record a renewed expiration if `value` is still the held token
    /// 若仍持有该令牌则更新过期时间
    pub fn update_expiry(&self, value: &str, expires_at: DateTime<Utc>) -> bool {
        let mut guard = self.inner.write();
        match guard.as_mut() {
            Some(token) if token.value == value => {
                token.expires_at = Some(expires_at);
                true
            }
            _ => false,
        }
    }
}

/// Network side of token management / 令牌管理的网络接口
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn acquire(&self) -> ClientResult<DelegationToken>;

    async fn renew(&self, token: &DelegationToken) -> ClientResult<DateTime<Utc>>;
}

/// Refresh scheduling knobs / 刷新调度参数
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshPolicy {
    pub safety_margin: Duration,
    pub max_jitter: Duration,
    pub backoff_step: Duration,
    pub max_renew_attempts: u32,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            safety_margin: Duration::from_secs(30 * 60),
            max_jitter: Duration::from_secs(10 * 60),
            backoff_step: Duration::from_secs(10),
            max_renew_attempts: 3,
        }
    }
}

/// `remaining - margin - jitter` when that is positive, else `remaining`
/// 计算续期延迟；不足安全余量时等待剩余时间
///
/// Zero only when nothing remains.
pub fn renewal_delay(remaining: Duration, margin: Duration, jitter: Duration) -> Duration {
    remaining
        .checked_sub(margin)
        .and_then(|d| d.checked_sub(jitter))
        .filter(|d| !d.is_zero())
        .unwrap_or(remaining)
}

/// Linear backoff `attempt * step`, saturating / 线性退避
pub fn backoff_delay(step: Duration, attempt: u32) -> Duration {
    step.checked_mul(attempt).unwrap_or(Duration::MAX)
}

/// Delay before the next renewal attempt / 下次续期前的等待时间
pub fn next_renewal_delay(token: Option<&DelegationToken>, policy: &RefreshPolicy) -> Duration {
    let Some(expires_at) = token.and_then(|t| t.expires_at) else {
        return Duration::ZERO;
    };
    let remaining = (expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    let max_jitter_ms = policy.max_jitter.as_millis() as u64;
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=max_jitter_ms));
    renewal_delay(remaining, policy.safety_margin, jitter)
}

/// Owns token acquisition, renewal and the refresh task / 令牌管理器
pub struct TokenManager {
    source: Arc<dyn TokenSource>,
    cell: Arc<TokenCell>,
    policy: RefreshPolicy,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TokenManager {
    pub fn new(source: Arc<dyn TokenSource>, cell: Arc<TokenCell>, policy: RefreshPolicy) -> Self {
        Self {
            source,
            cell,
            policy,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    pub fn cell(&self) -> &Arc<TokenCell> {
        &self.cell
    }

    pub fn current(&self) -> Option<DelegationToken> {
        self.cell.get()
    }

    /// Acquire a fresh token and install it / 获取并安装新令牌
    pub async fn acquire(&self) -> ClientResult<DelegationToken> {
        let token = self.source.acquire().await?;
        self.cell.replace(token.clone());
        info!("acquired delegation token");
        Ok(token)
    }

    /// Renew the held token in place / 原地续期当前令牌
    pub async fn renew(&self) -> ClientResult<DateTime<Utc>> {
        let token = self
            .cell
            .get()
            .ok_or_else(|| ClientError::configuration("no delegation token held"))?;
        let expires_at = self.source.renew(&token).await?;
        self.cell.update_expiry(&token.value, expires_at);
        info!(expires_at = %expires_at, "renewed delegation token");
        Ok(expires_at)
    }

    /// Spawn the refresh task once / 启动刷新任务（仅一次）
    pub fn start_refresh(&self) -> bool {
        let mut task = self.task.lock();
        if task.is_some() || self.cancel.is_cancelled() {
            return false;
        }
        let source = self.source.clone();
        let cell = self.cell.clone();
        let policy = self.policy.clone();
        let cancel = self.cancel.clone();
        *task = Some(tokio::spawn(async move {
            refresh_loop(source, cell, policy, cancel).await;
        }));
        true
    }

    pub fn is_refreshing(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Stop the refresh task / 停止刷新任务
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for TokenManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn sleep_or_cancel(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

async fn renew_once(
    source: &dyn TokenSource,
    cell: &TokenCell,
    token: &DelegationToken,
) -> ClientResult<DateTime<Utc>> {
    let expires_at = source.renew(token).await?;
    if expires_at <= Utc::now() {
        return Err(ClientError::malformed(format!(
            "renewed expiration already passed: {}",
            expires_at
        )));
    }
    cell.update_expiry(&token.value, expires_at);
    Ok(expires_at)
}

/// Returns false when cancelled while backing off / 退避期间被取消时返回false
async fn reacquire(
    source: &dyn TokenSource,
    cell: &TokenCell,
    policy: &RefreshPolicy,
    cancel: &CancellationToken,
) -> bool {
    match source.acquire().await {
        Ok(token) => {
            info!("re-acquired delegation token");
            cell.replace(token);
            true
        }
        Err(e) => {
            error!(error = %e, "delegation token re-acquisition failed");
            sleep_or_cancel(cancel, policy.backoff_step).await
        }
    }
}

async fn refresh_loop(
    source: Arc<dyn TokenSource>,
    cell: Arc<TokenCell>,
    policy: RefreshPolicy,
    cancel: CancellationToken,
) {
    info!("delegation token refresh started");
    'refresh: loop {
        let delay = next_renewal_delay(cell.get().as_ref(), &policy);
        debug!(delay_secs = delay.as_secs(), "next delegation token renewal");
        if !sleep_or_cancel(&cancel, delay).await {
            break;
        }

        let mut attempt: u32 = 0;
        loop {
            let Some(token) = cell.get() else {
                if !reacquire(source.as_ref(), &cell, &policy, &cancel).await {
                    break 'refresh;
                }
                break;
            };

            attempt += 1;
            match renew_once(source.as_ref(), &cell, &token).await {
                Ok(expires_at) => {
                    info!(expires_at = %expires_at, "renewed delegation token");
                    break;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "delegation token renewal failed");
                    if attempt >= policy.max_renew_attempts {
                        if !reacquire(source.as_ref(), &cell, &policy, &cancel).await {
                            break 'refresh;
                        }
                        break;
                    }
                    let backoff = backoff_delay(policy.backoff_step, attempt);
                    if !sleep_or_cancel(&cancel, backoff).await {
                        break 'refresh;
                    }
                }
            }
        }
    }
    info!("delegation token refresh stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Acquire,
        Renew,
    }

    /// What `renew` answers / 续期的返回方式
    #[derive(Debug, Clone, Copy)]
    enum Renewal {
        /// Expiration `now + offset`, possibly in the past
        Extend(ChronoDuration),
        Reject,
    }

    struct ScriptedSource {
        calls: mpsc::UnboundedSender<Call>,
        renewal: Renewal,
        /// Number of leading `acquire` calls that fail
        acquire_failures: AtomicUsize,
        acquired: AtomicUsize,
    }

    #[async_trait]
    impl TokenSource for ScriptedSource {
        async fn acquire(&self) -> ClientResult<DelegationToken> {
            let _ = self.calls.send(Call::Acquire);
            let failing = self
                .acquire_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(ClientError::malformed("token request rejected"));
            }
            let n = self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(DelegationToken::new(format!("fresh-{}", n)))
        }

        async fn renew(&self, _token: &DelegationToken) -> ClientResult<DateTime<Utc>> {
            let _ = self.calls.send(Call::Renew);
            match self.renewal {
                Renewal::Extend(offset) => Ok(Utc::now() + offset),
                Renewal::Reject => Err(ClientError::malformed("renewal rejected")),
            }
        }
    }

    fn scripted_manager(
        renewal: Renewal,
        acquire_failures: usize,
        token: DelegationToken,
    ) -> (TokenManager, mpsc::UnboundedReceiver<Call>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = Arc::new(ScriptedSource {
            calls: tx,
            renewal,
            acquire_failures: AtomicUsize::new(acquire_failures),
            acquired: AtomicUsize::new(0),
        });
        let cell = Arc::new(TokenCell::new(Some(token)));
        (
            TokenManager::new(source, cell, RefreshPolicy::default()),
            rx,
        )
    }

    fn manager(
        renew_ok: bool,
        token: DelegationToken,
    ) -> (TokenManager, mpsc::UnboundedReceiver<Call>) {
        let renewal = if renew_ok {
            Renewal::Extend(ChronoDuration::hours(24))
        } else {
            Renewal::Reject
        };
        scripted_manager(renewal, 0, token)
    }

    #[test]
    fn test_delay_for_two_hour_expiry_stays_in_window() {
        let policy = RefreshPolicy::default();
        let token = DelegationToken::with_expiry("t", Utc::now() + ChronoDuration::hours(2));
        for _ in 0..500 {
            let delay = next_renewal_delay(Some(&token), &policy);
            assert!(delay >= Duration::from_secs(50 * 60), "{:?}", delay);
            assert!(delay <= Duration::from_secs(90 * 60), "{:?}", delay);
        }
    }

    #[test]
    fn test_delay_never_negative() {
        let policy = RefreshPolicy::default();
        // Inside the safety margin the full remaining lifetime is waited out
        let soon = DelegationToken::with_expiry("t", Utc::now() + ChronoDuration::minutes(5));
        let delay = next_renewal_delay(Some(&soon), &policy);
        assert!(delay > Duration::from_secs(4 * 60), "{:?}", delay);
        assert!(delay <= Duration::from_secs(5 * 60), "{:?}", delay);
        let past = DelegationToken::with_expiry("t", Utc::now() - ChronoDuration::hours(1));
        assert_eq!(next_renewal_delay(Some(&past), &policy), Duration::ZERO);
        assert_eq!(next_renewal_delay(None, &policy), Duration::ZERO);
        assert_eq!(
            renewal_delay(
                Duration::from_secs(7200),
                Duration::from_secs(1800),
                Duration::from_secs(600)
            ),
            Duration::from_secs(4800)
        );
        assert_eq!(
            renewal_delay(
                Duration::from_secs(300),
                Duration::from_secs(1800),
                Duration::from_secs(600)
            ),
            Duration::from_secs(300)
        );
        assert_eq!(
            renewal_delay(
                Duration::from_secs(2400),
                Duration::from_secs(1800),
                Duration::from_secs(600)
            ),
            Duration::from_secs(2400)
        );
        assert_eq!(
            renewal_delay(Duration::ZERO, Duration::from_secs(1800), Duration::ZERO),
            Duration::ZERO
        );
    }

    #[test]
    fn test_expiration_from_millis() {
        assert!(matches!(
            expiration_from_millis(0),
            Err(ClientError::MalformedResponse { .. })
        ));
        assert!(expiration_from_millis(-5).is_err());
        let exp = expiration_from_millis(1_320_962_673_997).unwrap();
        assert_eq!(exp.timestamp(), 1_320_962_673);
    }

    #[test]
    fn test_cell_update_expiry_only_for_held_token() {
        let cell = TokenCell::new(Some(DelegationToken::new("a")));
        let exp = Utc::now() + ChronoDuration::hours(1);
        assert!(!cell.update_expiry("b", exp));
        assert!(cell.update_expiry("a", exp));
        assert_eq!(cell.get().unwrap().expires_at, Some(exp));
        assert!(cell.usable().is_some());
    }

    #[tokio::test]
    async fn test_manual_acquire_and_renew() {
        let (manager, mut rx) = manager(true, DelegationToken::new("seed"));
        let token = manager.acquire().await.unwrap();
        assert_eq!(token.value, "fresh-0");
        let exp = manager.renew().await.unwrap();
        assert_eq!(manager.current().unwrap().expires_at, Some(exp));
        assert_eq!(rx.recv().await, Some(Call::Acquire));
        assert_eq!(rx.recv().await, Some(Call::Renew));
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_failures_fall_back_to_acquire() {
        let start = DelegationToken::with_expiry("seed", Utc::now() + ChronoDuration::hours(2));
        let (manager, mut rx) = manager(false, start);
        assert!(manager.start_refresh());
        assert!(!manager.start_refresh());

        let mut calls = Vec::new();
        for _ in 0..8 {
            calls.push(rx.recv().await.unwrap());
        }
        use Call::*;
        assert_eq!(
            calls,
            vec![Renew, Renew, Renew, Acquire, Renew, Renew, Renew, Acquire]
        );
        assert_eq!(manager.current().unwrap().value, "fresh-1");
        manager.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_renewal_updates_expiry() {
        let start = DelegationToken::new("seed");
        let (manager, mut rx) = manager(true, start);
        manager.start_refresh();
        assert_eq!(rx.recv().await, Some(Call::Renew));
        // Wait for the loop to park on the next sleep / 等待循环进入下一次休眠
        for _ in 0..10 {
            if manager.current().unwrap().expires_at.is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }
        let token = manager.current().unwrap();
        assert_eq!(token.value, "seed");
        assert!(token.expires_at.unwrap() > Utc::now() + ChronoDuration::hours(23));
        manager.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_refresh_task() {
        let start = DelegationToken::with_expiry("seed", Utc::now() + ChronoDuration::hours(2));
        let (manager, mut rx) = manager(true, start);
        manager.start_refresh();
        tokio::task::yield_now().await;
        assert!(manager.is_refreshing());

        manager.shutdown();
        for _ in 0..10 {
            if !manager.is_refreshing() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!manager.is_refreshing());
        assert!(rx.try_recv().is_err());
        assert!(!manager.start_refresh());
    }

    #[test]
    fn test_backoff_delay_saturates() {
        let step = Duration::from_secs(10);
        assert_eq!(backoff_delay(step, 1), Duration::from_secs(10));
        assert_eq!(backoff_delay(step, 3), Duration::from_secs(30));
        assert_eq!(backoff_delay(Duration::from_secs(u64::MAX), 2), Duration::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_lived_renewals_are_spaced_out() {
        // Every renewal comes back ten minutes out, as near the maximum lifetime
        let (manager, mut rx) = scripted_manager(
            Renewal::Extend(ChronoDuration::minutes(10)),
            0,
            DelegationToken::new("seed"),
        );
        manager.start_refresh();

        let mut renewed_at = Vec::new();
        for _ in 0..3 {
            assert_eq!(rx.recv().await, Some(Call::Renew));
            renewed_at.push(tokio::time::Instant::now());
        }
        for pair in renewed_at.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_secs(9 * 60), "renewed again after {:?}", gap);
        }
        assert!(rx.try_recv().is_err());
        manager.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_expiration_counts_as_failure() {
        let start = DelegationToken::with_expiry("seed", Utc::now() + ChronoDuration::hours(2));
        let (manager, mut rx) = scripted_manager(
            Renewal::Extend(ChronoDuration::seconds(-1)),
            0,
            start,
        );
        manager.start_refresh();

        let mut calls = Vec::new();
        for _ in 0..4 {
            calls.push(rx.recv().await.unwrap());
        }
        use Call::*;
        assert_eq!(calls, vec![Renew, Renew, Renew, Acquire]);
        assert_eq!(manager.current().unwrap().value, "fresh-0");
        manager.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reacquire_keeps_loop_running() {
        let start = DelegationToken::with_expiry("seed", Utc::now() + ChronoDuration::hours(2));
        let (manager, mut rx) = scripted_manager(Renewal::Reject, 1, start);
        manager.start_refresh();

        let mut calls = Vec::new();
        let mut seen_at = Vec::new();
        for _ in 0..8 {
            calls.push(rx.recv().await.unwrap());
            seen_at.push(tokio::time::Instant::now());
        }
        use Call::*;
        assert_eq!(
            calls,
            vec![Renew, Renew, Renew, Acquire, Renew, Renew, Renew, Acquire]
        );
        // The failed acquire is followed by at least one backoff step
        assert!(seen_at[4] - seen_at[3] >= RefreshPolicy::default().backoff_step);
        assert_eq!(manager.current().unwrap().value, "fresh-0");
        assert!(manager.is_refreshing());
        manager.shutdown();
    }
}
