use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    ladderbot_channels::{NotificationSink, notify_quietly, unix_now},
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use crate::strategy::SharedCredential;

/// Minimum spacing between two warnings, in seconds.
const NOTIFY_COOLDOWN_SECS: i64 = 86_400;

/// Warns operators when the shared chat token approaches its estimated
/// expiry. The token is never refreshed automatically.
pub struct SharedCredentialNotifier {
    credential: Arc<SharedCredential>,
    sink: Arc<dyn NotificationSink>,
    warning_window: Duration,
    check_interval: Duration,
    last_notified: Mutex<Option<i64>>,
}

impl SharedCredentialNotifier {
    pub fn new(
        credential: Arc<SharedCredential>,
        sink: Arc<dyn NotificationSink>,
        warning_window: Duration,
        check_interval: Duration,
    ) -> Self {
        Self {
            credential,
            sink,
            warning_window,
            check_interval,
            last_notified: Mutex::new(None),
        }
    }

    /// Run one check at `now`. Returns `true` when a warning was sent.
    pub async fn check(&self, now: i64) -> bool {
        let Some(expires_at) = self.credential.expires_at() else {
            return false;
        };
        let remaining = expires_at - now;
        let window = i64::try_from(self.warning_window.as_secs()).unwrap_or(i64::MAX);

        if remaining > window {
            *self.lock_last() = None;
            return false;
        }
        let recently = self
            .lock_last()
            .is_some_and(|last| now - last < NOTIFY_COOLDOWN_SECS);
        if recently {
            debug!("shared credential warning already sent recently");
            return false;
        }

        let login = self.credential.login();
        let message = if remaining <= 0 {
            format!("The shared chat token for {login} has likely expired. Issue a new token.")
        } else {
            let days = (remaining + 86_399) / 86_400;
            format!(
                "The shared chat token for {login} expires in about {days} day(s). Issue a new token soon."
            )
        };
        warn!(login, remaining_secs = remaining, "shared chat token nearing expiry");
        notify_quietly(self.sink.as_ref(), &message).await;
        *self.lock_last() = Some(now);
        true
    }

    /// Check every `check_interval` until `cancel` fires.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.check_interval.max(Duration::from_secs(1));
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        self.check(unix_now()).await;
                    },
                }
            }
        })
    }

    fn lock_last(&self) -> std::sync::MutexGuard<'_, Option<i64>> {
        self.last_notified.lock().unwrap_or_else(|e| e.into_inner())
    }
}
