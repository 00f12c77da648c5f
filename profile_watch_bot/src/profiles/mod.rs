//! Tracking of users' names and usernames, and the history of their changes.

mod types;
pub use types::*;

use chrono::{DateTime, Utc};
use teloxide::types::UserId;
use tokio::sync::Mutex;

use crate::store::SnapshotStore;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum NotFound {
    #[error("no profile recorded for user {0}")]
    Subject(UserId),
    #[error("no profile recorded with username @{0}")]
    Handle(String),
}

/// Keeps every seen user's profile, notices when it changes, and keeps the
/// changes around forever.
///
/// All records live in memory; every observation writes the whole set back
/// to the store.
pub struct ProfileTracker<S> {
    store: S,
    records: Mutex<Vec<ProfileRecord>>,
}

impl<S: SnapshotStore<Vec<ProfileRecord>>> ProfileTracker<S> {
    /// Load all records from the store. If they can't be loaded, start with none.
    pub async fn open(store: S) -> Self {
        let records = match store.load().await {
            Ok(records) => records,
            Err(e) => {
                log::warn!("Failed to load profiles, starting with none: {e}");
                Vec::new()
            }
        };

        log::info!("Loaded {} profiles.", records.len());

        ProfileTracker {
            store,
            records: Mutex::new(records),
        }
    }

    /// Take note of what a user currently looks like, and return what has
    /// changed since the last time they were seen.
    ///
    /// The first observation of a user only establishes the baseline and
    /// never reports changes. Writes to the store exactly once either way.
    pub async fn observe(
        &self,
        subject: UserId,
        observation: Observation,
        now: DateTime<Utc>,
    ) -> ChangeSet {
        let mut records = self.records.lock().await;

        let events = match records.iter_mut().find(|r| r.id == subject) {
            Some(record) => record.apply(observation, now),
            None => {
                log::debug!("First time seeing user {subject}.");
                records.push(ProfileRecord::new(subject, observation, now));
                Vec::new()
            }
        };

        if let Err(e) = self.store.persist(&records).await {
            log::error!("Failed to save profiles after observing user {subject}: {e}");
        }

        if !events.is_empty() {
            log::debug!("User {subject} changed {} things.", events.len());
        }

        ChangeSet { subject, events }
    }

    /// All recorded changes of this user, oldest first.
    pub async fn history(&self, subject: UserId) -> Result<Vec<ChangeEvent>, NotFound> {
        self.records
            .lock()
            .await
            .iter()
            .find(|r| r.id == subject)
            .map(|r| r.history.clone())
            .ok_or(NotFound::Subject(subject))
    }

    /// The whole record of this user, if they were ever seen.
    pub async fn profile(&self, subject: UserId) -> Option<ProfileRecord> {
        self.records
            .lock()
            .await
            .iter()
            .find(|r| r.id == subject)
            .cloned()
    }

    /// Find a user by their current username, ignoring case and a leading `@`.
    /// If several users somehow have it, the first one found wins.
    pub async fn resolve_subject_by_handle(&self, handle: &str) -> Result<UserId, NotFound> {
        let wanted = handle.trim().trim_start_matches('@');

        if !wanted.is_empty() {
            let records = self.records.lock().await;
            let found = records.iter().find(|r| {
                r.handle
                    .as_deref()
                    .is_some_and(|h| h.eq_ignore_ascii_case(wanted))
            });
            if let Some(record) = found {
                return Ok(record.id);
            }
        }

        Err(NotFound::Handle(wanted.to_string()))
    }

    /// How many users are being tracked.
    pub async fn tracked_count(&self) -> usize {
        self.records.lock().await.len()
    }
}
