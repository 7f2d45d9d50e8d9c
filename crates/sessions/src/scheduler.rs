//! Per-channel token refresh timers.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    secrecy::Secret,
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info},
};

use crate::{registry::ChannelLocks, strategy::TokenRefresher};

/// Notifications from the scheduler to the session owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// New tokens for `channel` are persisted; its connection should be
    /// reopened with them.
    CredentialsRotated { channel: String },
}

/// Delay before refreshing a token that expires in `expires_in_secs`:
/// 90% of the remaining lifetime, zero once expired.
pub fn refresh_delay(expires_in_secs: i64) -> Duration {
    if expires_in_secs <= 0 {
        return Duration::ZERO;
    }
    let millis = (expires_in_secs as u64).saturating_mul(1000) / 10 * 9;
    Duration::from_millis(millis)
}

struct ArmedTimer {
    generation: u64,
    delay: Duration,
    cancel: CancellationToken,
}

/// Holds at most one pending refresh per channel.
///
/// A firing timer runs its exchange and store write under the channel's
/// lifecycle lock, so it never overlaps a stop, reconnect or tier change.
pub struct RefreshScheduler {
    refresher: Arc<TokenRefresher>,
    locks: Arc<ChannelLocks>,
    timers: Mutex<HashMap<String, ArmedTimer>>,
    next_generation: AtomicU64,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl RefreshScheduler {
    pub fn new(
        refresher: Arc<TokenRefresher>,
        locks: Arc<ChannelLocks>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            refresher,
            locks,
            timers: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            events,
        }
    }

    /// Arm a refresh for `channel` after `delay`, replacing any pending one.
    pub fn schedule(self: &Arc<Self>, channel: &str, refresh_token: Secret<String>, delay: Duration) {
        let mut timers = self.lock_timers();
        self.arm(&mut timers, channel, refresh_token, delay);
    }

    /// Cancel the pending refresh for `channel`. Returns whether one existed.
    pub fn cancel(&self, channel: &str) -> bool {
        match self.lock_timers().remove(channel) {
            Some(timer) => {
                timer.cancel.cancel();
                debug!(channel, "cancelled refresh timer");
                true
            },
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for (_, timer) in self.lock_timers().drain() {
            timer.cancel.cancel();
        }
    }

    pub fn has_timer(&self, channel: &str) -> bool {
        self.lock_timers().contains_key(channel)
    }

    /// Delay the pending timer for `channel` was armed with.
    pub fn armed_delay(&self, channel: &str) -> Option<Duration> {
        self.lock_timers().get(channel).map(|t| t.delay)
    }

    pub fn active_timers(&self) -> usize {
        self.lock_timers().len()
    }

    fn lock_timers(&self) -> std::sync::MutexGuard<'_, HashMap<String, ArmedTimer>> {
        self.timers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn arm(
        self: &Arc<Self>,
        timers: &mut HashMap<String, ArmedTimer>,
        channel: &str,
        refresh_token: Secret<String>,
        delay: Duration,
    ) {
        if let Some(previous) = timers.remove(channel) {
            previous.cancel.cancel();
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        timers.insert(channel.to_string(), ArmedTimer {
            generation,
            delay,
            cancel: cancel.clone(),
        });
        debug!(channel, generation, delay_ms = delay.as_millis() as u64, "armed refresh timer");

        let this = Arc::clone(self);
        let channel = channel.to_string();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {},
                () = tokio::time::sleep(delay) => {
                    this.fire(&channel, generation, refresh_token).await;
                },
            }
        });
    }

    async fn fire(self: &Arc<Self>, channel: &str, generation: u64, refresh_token: Secret<String>) {
        let _guard = self.locks.lock(channel).await;
        // Stopping or re-authorizing the channel replaces or drops this timer.
        if !self.is_current(channel, generation) {
            debug!(channel, generation, "stale refresh timer ignored");
            return;
        }

        match self.refresher.refresh(channel, &refresh_token).await {
            Ok(grant) => {
                let delay = refresh_delay(i64::try_from(grant.expires_in).unwrap_or(i64::MAX));
                {
                    let mut timers = self.lock_timers();
                    // `cancel_all` does not take channel locks.
                    if timers.get(channel).map(|t| t.generation) != Some(generation) {
                        debug!(channel, "refresh completed for a channel no longer scheduled");
                        return;
                    }
                    self.arm(&mut timers, channel, grant.refresh_token.clone(), delay);
                }
                info!(channel, "credentials rotated");
                if self
                    .events
                    .send(SessionEvent::CredentialsRotated {
                        channel: channel.to_string(),
                    })
                    .is_err()
                {
                    debug!(channel, "no listener for session events");
                }
            },
            Err(e) => {
                let mut timers = self.lock_timers();
                if timers.get(channel).map(|t| t.generation) == Some(generation) {
                    timers.remove(channel);
                }
                drop(timers);
                error!(
                    channel,
                    error = %e,
                    "token refresh failed, channel needs to re-authorize"
                );
            },
        }
    }

    fn is_current(&self, channel: &str, generation: u64) -> bool {
        self.lock_timers()
            .get(channel)
            .is_some_and(|t| t.generation == generation)
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        async_trait::async_trait,
        ladderbot_channels::{ChannelRegistration, ChannelStore, InMemoryChannelStore, TokenSet},
        ladderbot_oauth::{TokenExchange, TokenGrant, TokenValidation},
        secrecy::ExposeSecret,
        std::sync::atomic::AtomicUsize,
    };

    #[derive(Default)]
    struct CountingExchange {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl TokenExchange for CountingExchange {
        async fn refresh(&self, _refresh_token: &str) -> ladderbot_oauth::Result<TokenGrant> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail {
                return Err(ladderbot_oauth::Error::message("identity service down"));
            }
            Ok(TokenGrant::new(format!("a{}", n + 1), format!("r{}", n + 1), 3600))
        }

        async fn validate(&self, _access_token: &str) -> ladderbot_oauth::Result<TokenValidation> {
            Ok(TokenValidation::default())
        }
    }

    async fn scheduler(
        fail: bool,
    ) -> (
        Arc<RefreshScheduler>,
        Arc<CountingExchange>,
        Arc<InMemoryChannelStore>,
        mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        let store = Arc::new(InMemoryChannelStore::with_registrations([
            ChannelRegistration::new_oauth("foo", TokenSet::new("a1", "r1", 100), 1),
        ]));
        let exchange = Arc::new(CountingExchange {
            fail,
            ..Default::default()
        });
        let refresher = Arc::new(TokenRefresher::new(
            Arc::clone(&exchange) as Arc<dyn TokenExchange>,
            Arc::clone(&store) as Arc<dyn ChannelStore>,
        ));
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = RefreshScheduler::new(refresher, Arc::new(ChannelLocks::new()), tx);
        (Arc::new(scheduler), exchange, store, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn due_timer_waits_for_the_channel_lock() {
        let (scheduler, exchange, store, _rx) = scheduler(false).await;
        let guard = scheduler.locks.lock("foo").await;
        scheduler.schedule("foo", token("r1"), Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 0);

        // Whoever holds the lock stops the channel before releasing it.
        assert!(scheduler.cancel("foo"));
        drop(guard);
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(exchange.calls.load(Ordering::SeqCst), 0);
        let stored = store.get("foo").await.unwrap().unwrap();
        assert_eq!(stored.access_token.unwrap().expose_secret(), "a1");
        assert!(!scheduler.has_timer("foo"));
    }

    fn token(s: &str) -> Secret<String> {
        Secret::new(s.to_string())
    }

    #[test]
    fn delay_is_ninety_percent() {
        assert_eq!(refresh_delay(3600), Duration::from_millis(3_240_000));
        assert_eq!(refresh_delay(10), Duration::from_millis(9_000));
        assert_eq!(refresh_delay(0), Duration::ZERO);
        assert_eq!(refresh_delay(-5), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_keeps_one_timer() {
        let (scheduler, exchange, _store, _rx) = scheduler(false).await;
        for secs in 1..=5 {
            scheduler.schedule("foo", token("r1"), Duration::from_secs(secs * 100));
        }
        assert_eq!(scheduler.active_timers(), 1);
        assert_eq!(scheduler.armed_delay("foo"), Some(Duration::from_secs(500)));

        tokio::time::sleep(Duration::from_secs(450)).await;
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fire_refreshes_and_reschedules() {
        let (scheduler, exchange, store, mut rx) = scheduler(false).await;
        scheduler.schedule("foo", token("r1"), Duration::from_secs(10));

        let event = rx.recv().await.unwrap();
        assert_eq!(event, SessionEvent::CredentialsRotated {
            channel: "foo".into()
        });
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 1);

        let stored = store.get("foo").await.unwrap().unwrap();
        assert_eq!(stored.access_token.unwrap().expose_secret(), "a2");
        assert_eq!(
            scheduler.armed_delay("foo"),
            Some(Duration::from_millis(3_240_000))
        );
        assert_eq!(scheduler.active_timers(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let (scheduler, exchange, _store, _rx) = scheduler(false).await;
        scheduler.schedule("foo", token("r1"), Duration::from_secs(10));
        assert!(scheduler.cancel("foo"));
        assert!(!scheduler.cancel("foo"));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 0);
        assert!(!scheduler.has_timer("foo"));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_clears_timer_without_retry() {
        let (scheduler, exchange, _store, mut rx) = scheduler(true).await;
        scheduler.schedule("foo", token("r1"), Duration::ZERO);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 1);
        assert!(!scheduler.has_timer("foo"));
        assert!(rx.try_recv().is_err());
    }
}
