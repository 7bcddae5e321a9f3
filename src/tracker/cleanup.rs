//! Background eviction of expired clients.

use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::info;

use super::defender::Defender;

impl<K> Defender<K>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + 'static,
{
    /// Run [`Defender::cleanup`] once per eviction period until `shutdown`
    /// resolves.
    ///
    /// The first pass happens one full period after the call. Shutdown is
    /// only observed between passes, never in the middle of one.
    pub async fn run_cleanup<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let period = self.eviction_period();
        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(period = ?period, "Starting background eviction");

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    self.cleanup();
                }
            }
        }

        info!("Background eviction stopped");
    }

    /// Spawn [`Defender::run_cleanup`] onto the current tokio runtime.
    pub fn spawn_cleanup<F>(self: &Arc<Self>, shutdown: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let defender = Arc::clone(self);
        tokio::spawn(async move { defender.run_cleanup(shutdown).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::{Clock, ManualClock};
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn tracked(clock: &ManualClock) -> Arc<Defender<&'static str>> {
        Arc::new(
            Defender::builder(1, Duration::from_secs(1), Duration::from_secs(5))
                .clock(clock.clone())
                .build()
                .unwrap(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_eviction_removes_expired() {
        let clock = ManualClock::new();
        let defender = tracked(&clock);
        let period = defender.eviction_period();

        defender.check(&"idle").unwrap();

        let (tx, rx) = oneshot::channel::<()>();
        let handle = defender.spawn_cleanup(async move {
            let _ = rx.await;
        });

        // First pass runs, but the client has not expired yet
        time::sleep(period + Duration::from_millis(1)).await;
        assert_eq!(defender.len(), 1);

        clock.advance(period + Duration::from_secs(1));
        time::sleep(period).await;
        assert!(defender.is_empty());

        tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_eviction_stops_on_shutdown() {
        let clock = ManualClock::new();
        let defender = tracked(&clock);

        defender.check(&"a").unwrap();
        clock.advance(Duration::from_secs(60));

        // Already-resolved shutdown: returns before any pass runs
        defender.run_cleanup(async {}).await;
        assert_eq!(defender.len(), 1);
        assert!(defender.client(&"a").unwrap().expire() < clock.now());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_eviction_keeps_banned_until_ban_lifts() {
        let clock = ManualClock::new();
        let defender = Arc::new(
            Defender::builder(1, Duration::from_millis(100), Duration::from_secs(30))
                .clock(clock.clone())
                .build()
                .unwrap(),
        );
        // Eviction period is one second here
        let period = defender.eviction_period();
        assert_eq!(period, Duration::from_secs(1));

        defender.check(&"noisy").unwrap();
        assert!(defender.check(&"noisy").unwrap());

        let (tx, rx) = oneshot::channel::<()>();
        let handle = defender.spawn_cleanup(async move {
            let _ = rx.await;
        });

        clock.advance(Duration::from_secs(10));
        time::sleep(period * 2 + Duration::from_millis(1)).await;
        assert_eq!(defender.ban_list().len(), 1);

        clock.advance(Duration::from_secs(21));
        time::sleep(period).await;
        assert!(defender.ban_list().is_empty());

        tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
