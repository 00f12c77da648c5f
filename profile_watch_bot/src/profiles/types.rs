use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use teloxide::types::{User, UserId};

/// Trim a name-like value, treating empty ones as absent.
fn normalize(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|x| !x.is_empty())
        .map(String::from)
}

/// What a single message tells us about its sender.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Observation {
    display_name: Option<String>,
    handle: Option<String>,
}

impl Observation {
    pub fn new(display_name: Option<&str>, handle: Option<&str>) -> Self {
        Observation {
            display_name: normalize(display_name),
            handle: normalize(handle.map(|h| h.trim().trim_start_matches('@'))),
        }
    }

    pub fn of_user(user: &User) -> Self {
        Self::new(Some(user.full_name().as_str()), user.username.as_deref())
    }

    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    #[must_use]
    pub fn handle(&self) -> Option<&str> {
        self.handle.as_deref()
    }
}

/// Which part of a profile has changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Handle,
    DisplayName,
}

impl ChangeKind {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            ChangeKind::Handle => "Username",
            ChangeKind::DisplayName => "Name",
        }
    }
}

/// When a change was detected. Stored leniently: a value that isn't a
/// timestamp is kept as is, so one bad entry doesn't make the whole
/// history unreadable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventTime {
    Known(DateTime<Utc>),
    Malformed(String),
}

impl EventTime {
    #[must_use]
    pub fn known(&self) -> Option<DateTime<Utc>> {
        match self {
            EventTime::Known(time) => Some(*time),
            EventTime::Malformed(_) => None,
        }
    }
}

/// One detected transition of one field. Never modified after it's recorded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub observed_at: EventTime,
}

impl ChangeEvent {
    fn new(
        kind: ChangeKind,
        old_value: Option<String>,
        new_value: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        ChangeEvent {
            kind,
            old_value,
            new_value,
            observed_at: EventTime::Known(now),
        }
    }

    /// A value of this event, as shown to people: `@handle` for handles,
    /// and `None` when absent.
    #[must_use]
    pub fn pretty_value(&self, value: Option<&str>) -> String {
        match (self.kind, value) {
            (_, None) => String::from("None"),
            (ChangeKind::Handle, Some(handle)) => format!("@{handle}"),
            (ChangeKind::DisplayName, Some(name)) => name.to_string(),
        }
    }
}

impl Display for ChangeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} → {}",
            self.kind.label(),
            self.pretty_value(self.old_value.as_deref()),
            self.pretty_value(self.new_value.as_deref())
        )
    }
}

/// Everything known about one tracked user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub id: UserId,
    pub display_name: Option<String>,
    pub handle: Option<String>,
    pub last_observed_at: DateTime<Utc>,
    /// Oldest first.
    #[serde(default)]
    pub history: Vec<ChangeEvent>,
}

impl ProfileRecord {
    /// A fresh record, with the observation as its baseline and no history.
    pub(super) fn new(id: UserId, observation: Observation, now: DateTime<Utc>) -> Self {
        ProfileRecord {
            id,
            display_name: observation.display_name,
            handle: observation.handle,
            last_observed_at: now,
            history: Vec::new(),
        }
    }

    /// Compare with a new observation, record the differences, and take on the
    /// observed values. Returns the newly recorded events.
    ///
    /// Handle is always compared before display name.
    pub(super) fn apply(
        &mut self,
        observation: Observation,
        now: DateTime<Utc>,
    ) -> Vec<ChangeEvent> {
        let mut events = Vec::new();

        if self.handle != observation.handle {
            events.push(ChangeEvent::new(
                ChangeKind::Handle,
                self.handle.clone(),
                observation.handle.clone(),
                now,
            ));
        }

        if self.display_name != observation.display_name {
            events.push(ChangeEvent::new(
                ChangeKind::DisplayName,
                self.display_name.clone(),
                observation.display_name.clone(),
                now,
            ));
        }

        self.history.extend(events.iter().cloned());
        self.handle = observation.handle;
        self.display_name = observation.display_name;
        self.last_observed_at = now;

        events
    }
}

/// Changes detected by a single observation, in detection order.
/// Empty if nothing changed, which means there's nothing to announce.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeSet {
    pub subject: UserId,
    pub events: Vec<ChangeEvent>,
}

impl ChangeSet {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
