//! Update polling loop.
//!
//! Asks the server whether categories or transactions changed, re-fetches
//! whatever it is told changed and hands the fresh snapshots to the App.
//! Exactly one request is in flight at a time. The loop ends on a 401 or
//! when its cancellation token fires.

use std::ops::ControlFlow;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::api::Ledger;
use super::state::{Category, Transaction, UpdateSignal};
use crate::error::ApiError;

/// The calls the loop needs from the server.
#[async_trait]
pub trait LedgerFeed: Send + Sync {
    async fn poll_updates(&self) -> Result<UpdateSignal, ApiError>;
    async fn list_categories(&self) -> Result<Vec<Category>, ApiError>;
    async fn list_transactions(&self) -> Result<Vec<Transaction>, ApiError>;
}

#[async_trait]
impl LedgerFeed for Ledger {
    async fn poll_updates(&self) -> Result<UpdateSignal, ApiError> {
        Ledger::poll_updates(self).await
    }

    async fn list_categories(&self) -> Result<Vec<Category>, ApiError> {
        Ledger::list_categories(self).await
    }

    async fn list_transactions(&self) -> Result<Vec<Transaction>, ApiError> {
        Ledger::list_transactions(self).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Polling,
    Reconciling,
    Backoff,
    Unauthenticated,
    Stopped,
}

impl SyncState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Polling => "live",
            Self::Reconciling => "syncing",
            Self::Backoff => "retrying",
            Self::Unauthenticated => "signed out",
            Self::Stopped => "stopped",
        }
    }
}

/// What the loop reports back to its owner.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    State(SyncState),
    Categories(Vec<Category>),
    Transactions(Vec<Transaction>),
    SessionExpired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncExit {
    Unauthenticated,
    Cancelled,
}

pub struct SyncLoop<F> {
    feed: F,
    retry_delay: Duration,
    events: UnboundedSender<SyncEvent>,
    cancel: CancellationToken,
    state: SyncState,
}

impl<F: LedgerFeed> SyncLoop<F> {
    pub fn new(
        feed: F,
        retry_delay: Duration,
        events: UnboundedSender<SyncEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            feed,
            retry_delay,
            events,
            cancel,
            state: SyncState::Idle,
        }
    }

    pub async fn run(mut self) -> SyncExit {
        tracing::debug!("Sync loop started");
        loop {
            self.set_state(SyncState::Polling);

            let polled = tokio::select! {
                _ = self.cancel.cancelled() => return self.stop(),
                res = self.feed.poll_updates() => res,
            };

            match polled {
                Ok(signal) => {
                    tracing::debug!(
                        categories = signal.categories_updated,
                        transactions = signal.transactions_updated,
                        "Updates"
                    );
                    if signal.any() {
                        self.set_state(SyncState::Reconciling);
                        if let ControlFlow::Break(exit) = self.reconcile(signal).await {
                            return exit;
                        }
                    }
                    // Back-to-back polls: yield so cancellation is observed.
                    tokio::task::yield_now().await;
                }
                Err(ApiError::Unauthorized) => return self.expire(),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        retry_in_secs = self.retry_delay.as_secs_f64(),
                        "Polling updates failed, retrying"
                    );
                    self.set_state(SyncState::Backoff);
                    tokio::select! {
                        _ = self.cancel.cancelled() => return self.stop(),
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
            }

            if self.events.is_closed() {
                return self.stop();
            }
        }
    }

    /// One re-fetch per raised flag, categories first.
    async fn reconcile(&mut self, signal: UpdateSignal) -> ControlFlow<SyncExit> {
        if signal.categories_updated {
            tracing::info!("Categories updated. Reloading categories");
            let res = tokio::select! {
                _ = self.cancel.cancelled() => return ControlFlow::Break(self.stop()),
                res = self.feed.list_categories() => res,
            };
            match res {
                Ok(list) => self.emit(SyncEvent::Categories(list)),
                Err(ApiError::Unauthorized) => return ControlFlow::Break(self.expire()),
                Err(e) => tracing::warn!(error = %e, "Reloading categories failed"),
            }
        }

        if signal.transactions_updated {
            tracing::info!("Transactions updated. Reloading transactions");
            let res = tokio::select! {
                _ = self.cancel.cancelled() => return ControlFlow::Break(self.stop()),
                res = self.feed.list_transactions() => res,
            };
            match res {
                Ok(list) => self.emit(SyncEvent::Transactions(list)),
                Err(ApiError::Unauthorized) => return ControlFlow::Break(self.expire()),
                Err(e) => tracing::warn!(error = %e, "Reloading transactions failed"),
            }
        }

        ControlFlow::Continue(())
    }

    fn set_state(&mut self, state: SyncState) {
        if self.state != state {
            tracing::trace!(from = ?self.state, to = ?state, "Sync state");
            self.state = state;
            self.emit(SyncEvent::State(state));
        }
    }

    fn emit(&self, event: SyncEvent) {
        // A closed channel means the owner is gone; the loop notices on its next turn.
        let _ = self.events.send(event);
    }

    fn expire(&mut self) -> SyncExit {
        tracing::warn!("Session rejected by server, stopping sync");
        self.set_state(SyncState::Unauthenticated);
        self.emit(SyncEvent::SessionExpired);
        SyncExit::Unauthenticated
    }

    fn stop(&mut self) -> SyncExit {
        tracing::debug!("Sync loop cancelled");
        self.set_state(SyncState::Stopped);
        SyncExit::Cancelled
    }
}

/// A running sync loop. Dropping the handle cancels the loop.
pub struct SyncHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<SyncExit>>,
}

impl SyncHandle {
    pub fn spawn<F>(feed: F, retry_delay: Duration) -> (Self, UnboundedReceiver<SyncEvent>)
    where
        F: LedgerFeed + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(SyncLoop::new(feed, retry_delay, tx, cancel.clone()).run());
        (Self { cancel, task: Some(task) }, rx)
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Cancel and wait for the loop to wind down.
    pub async fn shutdown(self) -> SyncExit {
        self.cancel.cancel();
        self.join().await
    }

    /// Wait for the loop to end on its own.
    pub async fn join(mut self) -> SyncExit {
        match self.task.take() {
            Some(task) => task.await.unwrap_or(SyncExit::Cancelled),
            None => SyncExit::Cancelled,
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::state::{CategoryId, CategoryName, Money, TxnKind};
    use rust_decimal::Decimal;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    #[derive(Default)]
    struct Script {
        polls: VecDeque<Result<UpdateSignal, ApiError>>,
        poll_times: Vec<Instant>,
        category_loads: usize,
        transaction_loads: usize,
        /// Re-fetch answers; a sample snapshot once these run out.
        category_results: VecDeque<Result<Vec<Category>, ApiError>>,
        transaction_results: VecDeque<Result<Vec<Transaction>, ApiError>>,
        /// Polls never answer.
        hang: bool,
    }

    /// Replays scripted poll results, then answers 401 so the loop ends.
    #[derive(Clone, Default)]
    struct ScriptedFeed(Arc<Mutex<Script>>);

    impl ScriptedFeed {
        fn new(polls: Vec<Result<UpdateSignal, ApiError>>) -> Self {
            let feed = Self::default();
            feed.0.lock().unwrap().polls = polls.into();
            feed
        }
    }

    #[async_trait]
    impl LedgerFeed for ScriptedFeed {
        async fn poll_updates(&self) -> Result<UpdateSignal, ApiError> {
            let next = {
                let mut s = self.0.lock().unwrap();
                s.poll_times.push(Instant::now());
                if s.hang {
                    None
                } else {
                    Some(s.polls.pop_front().unwrap_or(Err(ApiError::Unauthorized)))
                }
            };
            match next {
                Some(res) => res,
                None => std::future::pending().await,
            }
        }

        async fn list_categories(&self) -> Result<Vec<Category>, ApiError> {
            let mut s = self.0.lock().unwrap();
            s.category_loads += 1;
            s.category_results.pop_front().unwrap_or_else(|| {
                Ok(vec![Category { id: CategoryId("c1".into()), name: "Food".into() }])
            })
        }

        async fn list_transactions(&self) -> Result<Vec<Transaction>, ApiError> {
            let mut s = self.0.lock().unwrap();
            s.transaction_loads += 1;
            s.transaction_results.pop_front().unwrap_or_else(|| {
                Ok(vec![Transaction {
                    id: "t1".into(),
                    kind: TxnKind::Expense,
                    amount: Money(Decimal::new(30, 0)),
                    category: CategoryName("Food".into()),
                }])
            })
        }
    }

    fn signal(categories: bool, transactions: bool) -> Result<UpdateSignal, ApiError> {
        Ok(UpdateSignal { categories_updated: categories, transactions_updated: transactions })
    }

    async fn run_script(
        feed: &ScriptedFeed,
        delay: Duration,
    ) -> (SyncExit, Vec<SyncEvent>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let exit = SyncLoop::new(feed.clone(), delay, tx, CancellationToken::new())
            .run()
            .await;
        let mut events = Vec::new();
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        (exit, events)
    }

    #[tokio::test]
    async fn categories_flag_reloads_categories_once() {
        let feed = ScriptedFeed::new(vec![signal(true, false)]);
        let (exit, events) = run_script(&feed, Duration::from_secs(5)).await;

        assert_eq!(exit, SyncExit::Unauthenticated);
        let s = feed.0.lock().unwrap();
        assert_eq!(s.category_loads, 1);
        assert_eq!(s.transaction_loads, 0);
        let snapshots = events
            .iter()
            .filter(|e| matches!(e, SyncEvent::Categories(_)))
            .count();
        assert_eq!(snapshots, 1);
    }

    #[tokio::test]
    async fn both_flags_reload_both() {
        let feed = ScriptedFeed::new(vec![signal(true, true)]);
        run_script(&feed, Duration::from_secs(5)).await;

        let s = feed.0.lock().unwrap();
        assert_eq!(s.category_loads, 1);
        assert_eq!(s.transaction_loads, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_signal_polls_again_immediately() {
        let feed = ScriptedFeed::new(vec![signal(false, false), signal(false, false)]);
        run_script(&feed, Duration::from_secs(5)).await;

        let s = feed.0.lock().unwrap();
        assert_eq!(s.category_loads, 0);
        assert_eq!(s.transaction_loads, 0);
        assert_eq!(s.poll_times.len(), 3);
        assert_eq!(s.poll_times[1], s.poll_times[0]);
        assert_eq!(s.poll_times[2], s.poll_times[1]);
    }

    #[tokio::test]
    async fn unauthorized_ends_loop_without_another_poll() {
        let feed = ScriptedFeed::new(vec![Err(ApiError::Unauthorized), signal(true, true)]);
        let (exit, events) = run_script(&feed, Duration::from_secs(5)).await;

        assert_eq!(exit, SyncExit::Unauthenticated);
        let s = feed.0.lock().unwrap();
        assert_eq!(s.poll_times.len(), 1);
        assert_eq!(s.polls.len(), 1);
        assert!(matches!(events.last(), Some(SyncEvent::SessionExpired)));
    }

    #[tokio::test(start_paused = true)]
    async fn network_failure_retries_after_delay() {
        let feed = ScriptedFeed::new(vec![
            Err(ApiError::Network("connection refused".into())),
            Err(ApiError::Rejected { status: 503, message: "busy".into() }),
            Err(ApiError::Network("dns".into())),
            signal(false, false),
        ]);
        run_script(&feed, Duration::from_secs(5)).await;

        let s = feed.0.lock().unwrap();
        assert_eq!(s.poll_times.len(), 5);
        for pair in s.poll_times[..4].windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= Duration::from_secs(5));
        }
        // success → next poll without delay
        assert_eq!(s.poll_times[4], s.poll_times[3]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_stops_polling() {
        let feed = ScriptedFeed::new(vec![
            Err(ApiError::Network("connection refused".into())),
            signal(false, false),
        ]);
        let (handle, mut rx) = SyncHandle::spawn(feed.clone(), Duration::from_secs(5));

        loop {
            match rx.recv().await {
                Some(SyncEvent::State(SyncState::Backoff)) => break,
                Some(_) => continue,
                None => panic!("loop ended early"),
            }
        }
        tokio::time::advance(Duration::from_secs(1)).await;

        assert_eq!(handle.shutdown().await, SyncExit::Cancelled);
        assert_eq!(feed.0.lock().unwrap().poll_times.len(), 1);
    }

    #[tokio::test]
    async fn unauthorized_refetch_expires_session() {
        let feed = ScriptedFeed::new(vec![signal(true, true), signal(true, true)]);
        feed.0.lock().unwrap().category_results.push_back(Err(ApiError::Unauthorized));
        let (exit, events) = run_script(&feed, Duration::from_secs(5)).await;

        assert_eq!(exit, SyncExit::Unauthenticated);
        let s = feed.0.lock().unwrap();
        assert_eq!(s.poll_times.len(), 1);
        assert_eq!(s.category_loads, 1);
        assert_eq!(s.transaction_loads, 0);
        assert!(matches!(events.last(), Some(SyncEvent::SessionExpired)));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refetch_keeps_polling() {
        let feed = ScriptedFeed::new(vec![signal(true, true), signal(true, false)]);
        {
            let mut s = feed.0.lock().unwrap();
            s.category_results.push_back(Err(ApiError::Network("reset".into())));
            s.category_results.push_back(Err(ApiError::Rejected { status: 500, message: "boom".into() }));
        }
        let (exit, events) = run_script(&feed, Duration::from_secs(5)).await;

        // the script's end answers 401
        assert_eq!(exit, SyncExit::Unauthenticated);
        let s = feed.0.lock().unwrap();
        assert_eq!(s.poll_times.len(), 3);
        assert_eq!(s.category_loads, 2);
        // a failed categories reload does not skip the transactions one
        assert_eq!(s.transaction_loads, 1);
        // and does not trigger the retry delay
        assert_eq!(s.poll_times[1], s.poll_times[0]);
        let categories = events.iter().filter(|e| matches!(e, SyncEvent::Categories(_))).count();
        let transactions = events.iter().filter(|e| matches!(e, SyncEvent::Transactions(_))).count();
        assert_eq!((categories, transactions), (0, 1));
    }

    #[tokio::test]
    async fn cancel_while_poll_in_flight() {
        let feed = ScriptedFeed::default();
        feed.0.lock().unwrap().hang = true;
        let (handle, mut rx) = SyncHandle::spawn(feed.clone(), Duration::from_secs(5));

        loop {
            match rx.recv().await {
                Some(SyncEvent::State(SyncState::Polling)) => break,
                Some(_) => continue,
                None => panic!("loop ended early"),
            }
        }
        let exit = tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
            .await
            .expect("loop ignored cancellation");

        assert_eq!(exit, SyncExit::Cancelled);
        assert_eq!(feed.0.lock().unwrap().poll_times.len(), 1);
        let mut last = None;
        while let Ok(ev) = rx.try_recv() {
            last = Some(ev);
        }
        assert!(matches!(last, Some(SyncEvent::State(SyncState::Stopped))));
    }

    #[tokio::test]
    async fn dropping_receiver_stops_loop() {
        let feed = ScriptedFeed::new(
            (0..1000).map(|_| signal(false, false)).collect(),
        );
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let exit = SyncLoop::new(feed.clone(), Duration::from_secs(5), tx, CancellationToken::new())
            .run()
            .await;
        assert_eq!(exit, SyncExit::Cancelled);
        assert_eq!(feed.0.lock().unwrap().poll_times.len(), 1);
    }
}
