//! Delayed message deletions that survive restarts.

mod types;
pub use types::*;

use std::{
    cmp::Reverse,
    collections::BinaryHeap,
    sync::{Arc, Weak},
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::{
    sync::{Mutex, Notify},
    time::{sleep_until, Instant},
};

use crate::store::SnapshotStore;

/// How long to wait before deleting messages that were due while the bot was down.
pub const OVERDUE_GRACE: Duration = Duration::from_secs(1);

pub struct Scheduler<S, D> {
    store: S,
    deleter: D,
    state: Mutex<State>,
    // Arc is so that the scheduler can be dropped independently of notify
    notify: Arc<Notify>,
}

#[derive(Default)]
struct State {
    /// Exactly what the store should contain.
    pending: Vec<ScheduledAction>,
    armed: BinaryHeap<Reverse<Armed>>,
    next_seq: u64,
}

enum NextUp {
    Now(MessageTarget),
    At(Instant),
    Nothing,
}

impl State {
    fn arm(&mut self, target: MessageTarget, delay: Duration) {
        let now = Instant::now();
        // Absurd delays would overflow; a few decades is forever enough.
        let fire_at = now
            .checked_add(delay)
            .unwrap_or_else(|| now + Duration::from_secs(86400 * 365 * 30));

        self.armed.push(Reverse(Armed {
            fire_at,
            seq: self.next_seq,
            target,
        }));
        self.next_seq += 1;
    }

    fn is_pending(&self, target: MessageTarget) -> bool {
        self.pending.iter().any(|x| x.target() == target)
    }

    fn next_up(&mut self) -> NextUp {
        let Some(Reverse(next)) = self.armed.peek() else {
            return NextUp::Nothing;
        };

        if next.fire_at > Instant::now() {
            return NextUp::At(next.fire_at);
        }

        match self.armed.pop() {
            Some(Reverse(next)) => NextUp::Now(next.target),
            None => NextUp::Nothing,
        }
    }
}

impl<S, D> Drop for Scheduler<S, D> {
    fn drop(&mut self) {
        self.notify.notify_waiters();
    }
}

impl<S, D> Scheduler<S, D>
where
    S: SnapshotStore<Vec<ScheduledAction>>,
    D: MessageDeleter,
{
    /// Create a scheduler with nothing pending, and start its dispatcher.
    /// Call [`Self::recover`] to pick up what's in the store.
    pub fn new(store: S, deleter: D) -> Arc<Self> {
        let scheduler = Arc::new(Scheduler {
            store,
            deleter,
            state: Mutex::new(State::default()),
            notify: Arc::new(Notify::new()),
        });

        tokio::task::spawn(dispatch_spinjob(Arc::downgrade(&scheduler)));

        scheduler
    }

    #[must_use]
    pub fn deleter(&self) -> &D {
        &self.deleter
    }

    /// Schedule the message to be deleted after `delay`.
    ///
    /// The deletion is written to the store before it's armed, so if we die
    /// right after this, it's still picked up by [`Self::recover`] later.
    ///
    /// Submitting the same message twice makes two entries; both are removed
    /// by whichever fires first.
    pub async fn submit(&self, target: MessageTarget, delay: Duration, now: DateTime<Utc>) {
        let due_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut state = self.state.lock().await;

        state.pending.push(ScheduledAction::new(target, due_at));
        if let Err(e) = self.store.persist(&state.pending).await {
            log::error!("Failed to save scheduled deletion of {target:?}: {e}");
        }

        state.arm(target, delay);
        drop(state);

        log::debug!("Scheduled deletion of {target:?} at {due_at}.");
        self.notify.notify_waiters();
    }

    /// Delete the message now, and forget about every pending deletion of it.
    /// Does nothing if there's no pending deletion of it.
    ///
    /// Failing to delete is only logged; the deletion is forgotten either way.
    pub async fn execute(&self, target: MessageTarget) {
        if !self.state.lock().await.is_pending(target) {
            log::debug!("Deletion of {target:?} is not pending anymore, skipping.");
            return;
        }

        match self.deleter.delete_target(target).await {
            Ok(()) => log::debug!("Deleted {target:?} as scheduled."),
            Err(e) => log::warn!("Failed to delete {target:?} as scheduled: {e}"),
        }

        let mut state = self.state.lock().await;
        let before = state.pending.len();
        state.pending.retain(|x| x.target() != target);

        if state.pending.len() != before {
            if let Err(e) = self.store.persist(&state.pending).await {
                log::error!("Failed to save removal of executed deletion {target:?}: {e}");
            }
        }
    }

    /// Load what's pending from the store and arm all of it. Deletions that
    /// were due while we were down are armed to happen after [`OVERDUE_GRACE`].
    ///
    /// Meant to be called once, at startup. Doesn't write to the store.
    pub async fn recover(&self, now: DateTime<Utc>) {
        let loaded = match self.store.load().await {
            Ok(loaded) => loaded,
            Err(e) => {
                log::warn!("Failed to load scheduled deletions, starting with none: {e}");
                Vec::new()
            }
        };

        let mut state = self.state.lock().await;
        let mut overdue = 0;

        for action in &loaded {
            let delay = match (action.due_at - now).to_std() {
                Ok(remaining) if !remaining.is_zero() => remaining,
                _ => {
                    overdue += 1;
                    OVERDUE_GRACE
                }
            };
            state.arm(action.target(), delay);
        }

        log::info!(
            "Recovered {} scheduled deletions, {} of them overdue.",
            loaded.len(),
            overdue
        );

        state.pending.extend(loaded);
        drop(state);

        self.notify.notify_waiters();
    }

    /// Everything that's waiting to be deleted.
    pub async fn pending(&self) -> Vec<ScheduledAction> {
        self.state.lock().await.pending.clone()
    }
}

/// Executes armed deletions as they come due, one at a time.
/// Stops once the scheduler is dropped.
async fn dispatch_spinjob<S, D>(scheduler: Weak<Scheduler<S, D>>)
where
    S: SnapshotStore<Vec<ScheduledAction>>,
    D: MessageDeleter,
{
    loop {
        let Some(scheduler) = scheduler.upgrade() else {
            return;
        };

        // Just in case, *before* we look at the queue.
        let notify = scheduler.notify.clone();
        let notified = notify.notified();

        let next_up = scheduler.state.lock().await.next_up();

        match next_up {
            NextUp::Now(target) => scheduler.execute(target).await,
            NextUp::At(fire_at) => {
                drop(scheduler);
                tokio::select! {
                    () = sleep_until(fire_at) => (),
                    () = notified => (),
                }
            }
            NextUp::Nothing => {
                drop(scheduler);
                notified.await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::Mutex as StdMutex;

    use chrono::TimeZone;
    use teloxide::{
        types::{ChatId, MessageId},
        ApiError, RequestError,
    };

    use super::*;
    use crate::store::MemoryStore;

    type Store = MemoryStore<Vec<ScheduledAction>>;

    /// Remembers what it was asked to delete, and when.
    #[derive(Clone, Default)]
    struct RecordingDeleter {
        calls: Arc<StdMutex<Vec<(MessageTarget, Instant)>>>,
        failing: bool,
    }

    impl RecordingDeleter {
        fn failing() -> Self {
            RecordingDeleter {
                failing: true,
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<(MessageTarget, Instant)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl MessageDeleter for RecordingDeleter {
        async fn delete_target(&self, target: MessageTarget) -> Result<(), RequestError> {
            self.calls.lock().unwrap().push((target, Instant::now()));
            if self.failing {
                Err(RequestError::Api(ApiError::MessageCantBeDeleted))
            } else {
                Ok(())
            }
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn target(message_id: i32) -> MessageTarget {
        MessageTarget::new(ChatId(-100123), MessageId(message_id))
    }

    const DAY: Duration = Duration::from_secs(86400);
    const MARGIN: Duration = Duration::from_millis(50);

    #[tokio::test(start_paused = true)]
    async fn submitted_deletion_is_saved_then_executed() {
        let store = Store::default();
        let deleter = RecordingDeleter::default();
        let scheduler = Scheduler::new(store.clone(), deleter.clone());
        let start = Instant::now();

        scheduler.submit(target(1), DAY, t0()).await;

        assert_eq!(
            store.contents(),
            vec![ScheduledAction::new(target(1), t0() + chrono::Duration::days(1))]
        );
        assert!(deleter.calls().is_empty());

        tokio::time::sleep(DAY + MARGIN).await;

        let calls = deleter.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, target(1));
        assert!(calls[0].1 - start >= DAY);
        assert!(calls[0].1 - start <= DAY + MARGIN);
        assert!(store.contents().is_empty());
        assert!(scheduler.pending().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn executes_in_due_order() {
        let deleter = RecordingDeleter::default();
        let scheduler = Scheduler::new(Store::default(), deleter.clone());

        scheduler.submit(target(1), Duration::from_secs(30), t0()).await;
        scheduler.submit(target(2), Duration::from_secs(10), t0()).await;
        scheduler.submit(target(3), Duration::from_secs(20), t0()).await;

        tokio::time::sleep(Duration::from_secs(31)).await;

        let order: Vec<_> = deleter.calls().into_iter().map(|x| x.0).collect();
        assert_eq!(order, vec![target(2), target(3), target(1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_halfway_waits_the_rest() {
        let store = Store::default();
        let deleter = RecordingDeleter::default();

        let scheduler = Scheduler::new(store.clone(), deleter.clone());
        scheduler.submit(target(7), DAY, t0()).await;
        // Process dies.
        drop(scheduler);

        let scheduler = Scheduler::new(store.clone(), deleter.clone());
        let restarted = Instant::now();
        scheduler.recover(t0() + chrono::Duration::hours(12)).await;
        assert_eq!(scheduler.pending().await.len(), 1);

        tokio::time::sleep(DAY).await;

        let calls = deleter.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, target(7));
        assert!(calls[0].1 - restarted >= DAY / 2);
        assert!(calls[0].1 - restarted <= DAY / 2 + MARGIN);
        assert!(store.contents().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_before_due_waits_until_due() {
        let due = t0() + chrono::Duration::seconds(5);
        let store = Store::new(vec![ScheduledAction::new(target(1), due)]);
        let deleter = RecordingDeleter::default();

        let scheduler = Scheduler::new(store.clone(), deleter.clone());
        let started = Instant::now();
        scheduler.recover(t0()).await;

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(deleter.calls().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let calls = deleter.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].1 - started >= Duration::from_secs(5));
        assert!(calls[0].1 - started <= Duration::from_secs(5) + MARGIN);
    }

    #[tokio::test(start_paused = true)]
    async fn overdue_deletions_run_right_after_recovery() {
        let due = t0() - chrono::Duration::seconds(5);
        let store = Store::new(vec![ScheduledAction::new(target(1), due)]);
        let deleter = RecordingDeleter::default();

        let scheduler = Scheduler::new(store.clone(), deleter.clone());
        let started = Instant::now();
        scheduler.recover(t0()).await;

        // Recovery itself doesn't touch the store.
        assert_eq!(store.writes(), 0);
        assert_eq!(store.contents().len(), 1);

        tokio::time::sleep(OVERDUE_GRACE + MARGIN).await;

        let calls = deleter.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].1 - started <= OVERDUE_GRACE + MARGIN);
        assert!(store.contents().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn execute_twice_is_harmless() {
        let store = Store::default();
        let deleter = RecordingDeleter::default();
        let scheduler = Scheduler::new(store.clone(), deleter.clone());

        scheduler.submit(target(1), DAY, t0()).await;
        scheduler.submit(target(2), DAY, t0()).await;

        scheduler.execute(target(1)).await;
        scheduler.execute(target(1)).await;

        assert_eq!(deleter.calls().len(), 1);
        assert_eq!(
            store.contents(),
            vec![ScheduledAction::new(target(2), t0() + chrono::Duration::days(1))]
        );

        // The armed timer for the first one goes off into nothing.
        tokio::time::sleep(DAY + MARGIN).await;
        let order: Vec<_> = deleter.calls().into_iter().map(|x| x.0).collect();
        assert_eq!(order, vec![target(1), target(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicates_are_kept_and_collapse_on_execution() {
        let store = Store::default();
        let deleter = RecordingDeleter::default();
        let scheduler = Scheduler::new(store.clone(), deleter.clone());

        scheduler.submit(target(1), Duration::from_secs(10), t0()).await;
        scheduler
            .submit(target(1), Duration::from_secs(20), t0() + chrono::Duration::seconds(1))
            .await;
        assert_eq!(store.contents().len(), 2);

        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(deleter.calls().len(), 1);
        assert!(store.contents().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_deletion_is_still_forgotten() {
        let store = Store::default();
        let deleter = RecordingDeleter::failing();
        let scheduler = Scheduler::new(store.clone(), deleter.clone());

        scheduler.submit(target(1), Duration::from_secs(10), t0()).await;
        tokio::time::sleep(Duration::from_secs(11)).await;

        assert_eq!(deleter.calls().len(), 1);
        assert!(store.contents().is_empty());
        assert!(scheduler.pending().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_save_still_deletes() {
        let store = Store::default();
        store.set_failing(true);
        let deleter = RecordingDeleter::default();
        let scheduler = Scheduler::new(store.clone(), deleter.clone());

        scheduler.submit(target(1), Duration::from_secs(10), t0()).await;
        assert!(store.contents().is_empty());
        assert_eq!(scheduler.pending().await.len(), 1);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(deleter.calls().len(), 1);
        assert!(scheduler.pending().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dispatcher_stops_with_the_scheduler() {
        let deleter = RecordingDeleter::default();
        let scheduler = Scheduler::new(Store::default(), deleter.clone());
        let weak = Arc::downgrade(&scheduler);

        scheduler.submit(target(1), Duration::from_secs(10), t0()).await;
        drop(scheduler);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(weak.upgrade().is_none());
        assert!(deleter.calls().is_empty());
    }
}
