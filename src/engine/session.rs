//! Session - everything that belongs to one (symbol, interval) subscription
//!
//! Spawned fetches, the delayed expiry refresh and the kline push channel all
//! hang off the session. Tearing it down aborts them in one place; anything
//! that still reports back carries a stale generation and is dropped.

use std::future::Future;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::candles::{KlineEvent, SubscriptionGeneration};
use crate::exchange::KlineSubscription;
use crate::types::{SymbolConfig, SymbolKey};

pub struct Session {
    symbol: &'static SymbolConfig,
    key: SymbolKey,
    generation: SubscriptionGeneration,
    tasks: Vec<JoinHandle<()>>,
    subscription: Option<KlineSubscription>,
    refresh_pending: bool,
}

impl Session {
    pub fn new(
        symbol: &'static SymbolConfig,
        key: SymbolKey,
        generation: SubscriptionGeneration,
    ) -> Self {
        Self {
            symbol,
            key,
            generation,
            tasks: Vec::new(),
            subscription: None,
            refresh_pending: false,
        }
    }

    pub fn symbol(&self) -> &'static SymbolConfig {
        self.symbol
    }

    pub fn key(&self) -> SymbolKey {
        self.key
    }

    pub fn generation(&self) -> SubscriptionGeneration {
        self.generation
    }

    pub fn is_current(&self, generation: SubscriptionGeneration) -> bool {
        self.generation == generation
    }

    /// Spawn a task owned by this session
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.retain(|t| !t.is_finished());
        self.tasks.push(tokio::spawn(task));
    }

    /// Tasks that have not finished yet
    pub fn active_tasks(&self) -> usize {
        self.tasks.iter().filter(|t| !t.is_finished()).count()
    }

    pub fn attach_subscription(&mut self, subscription: KlineSubscription) {
        if let Some(mut old) = self.subscription.replace(subscription) {
            old.close();
        }
    }

    pub fn has_subscription(&self) -> bool {
        self.subscription.is_some()
    }

    /// Next push delta; pends forever once the feed is gone
    pub async fn next_kline(&mut self) -> Option<KlineEvent> {
        let Some(subscription) = self.subscription.as_mut() else {
            return std::future::pending().await;
        };
        let event = subscription.recv().await;
        if event.is_none() {
            debug!(generation = %self.generation, "Kline feed ended");
            self.subscription = None;
        }
        event
    }

    /// Claim the single pending expiry refresh; `false` if one is already queued
    pub fn claim_refresh(&mut self) -> bool {
        !std::mem::replace(&mut self.refresh_pending, true)
    }

    pub fn release_refresh(&mut self) {
        self.refresh_pending = false;
    }

    pub fn refresh_pending(&self) -> bool {
        self.refresh_pending
    }

    /// Abort every task and close the push channel
    pub fn teardown(&mut self) {
        let aborted = self.tasks.len();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(mut subscription) = self.subscription.take() {
            subscription.close();
        }
        self.refresh_pending = false;
        if aborted > 0 {
            debug!(generation = %self.generation, aborted, "Session torn down");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{find_symbol, Interval};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn session(gen: u64) -> Session {
        let symbol = find_symbol("BTCUSDT").unwrap();
        Session::new(
            symbol,
            SymbolKey {
                symbol: symbol.symbol,
                interval: Interval::Min5,
            },
            SubscriptionGeneration(gen),
        )
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_leaves_no_timers_behind() {
        let alive = Arc::new(());
        let mut s = session(1);
        for _ in 0..5 {
            let token = alive.clone();
            s.spawn(async move {
                let _token = token;
                loop {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            });
        }
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(s.active_tasks(), 5);
        assert_eq!(Arc::strong_count(&alive), 6);

        s.teardown();
        settle().await;
        assert_eq!(Arc::strong_count(&alive), 1);
        assert_eq!(s.active_tasks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_switches_do_not_accumulate_tasks() {
        let alive = Arc::new(());
        let mut current = session(0);
        for gen in 1..=20 {
            current = session(gen);
            let token = alive.clone();
            current.spawn(async move {
                let _token = token;
                tokio::time::sleep(Duration::from_secs(3600)).await;
            });
            settle().await;
        }
        assert_eq!(Arc::strong_count(&alive), 2);
        drop(current);
        settle().await;
        assert_eq!(Arc::strong_count(&alive), 1);
    }

    #[tokio::test]
    async fn closed_feed_is_detached() {
        let (tx, rx) = mpsc::channel(4);
        let mut s = session(1);
        s.attach_subscription(KlineSubscription::from_channel(SubscriptionGeneration(1), rx));
        drop(tx);
        assert!(s.next_kline().await.is_none());
        assert!(!s.has_subscription());
    }

    #[test]
    fn missing_feed_pends_instead_of_spinning() {
        let mut s = session(1);
        let mut next = tokio_test::task::spawn(s.next_kline());
        tokio_test::assert_pending!(next.poll());
    }

    #[test]
    fn only_one_refresh_can_be_pending() {
        let mut s = session(1);
        assert!(s.claim_refresh());
        assert!(!s.claim_refresh());
        s.release_refresh();
        assert!(s.claim_refresh());
    }
}
