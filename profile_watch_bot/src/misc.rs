use std::fmt::Write;

use html_escape::encode_text;
use teloxide::types::User;

use crate::profiles::{ChangeEvent, ChangeSet, EventTime};

/// Tries to print the user in the prettiest way possible, with either `@username` or full name
/// that links to the user. Optionally allows including user ID. The output is HTML-escaped.
#[must_use]
pub fn user_name_prettyprint(user: &User, with_id: bool) -> String {
    let mut name = if let Some(username) = &user.username {
        format!("@{}", encode_text(username))
    } else {
        format!(
            "<a href=\"tg://user?id={}\">{}</a>",
            user.id,
            encode_text(&user.full_name())
        )
    };

    if with_id {
        write!(name, " (userid {})", user.id).expect("Writing to a String never fails");
    }

    name
}

/// Render when a change happened, or a placeholder if the stored time is garbage.
#[must_use]
pub fn event_time_prettyprint(time: &EventTime) -> String {
    match time.known() {
        Some(time) => time.format("%Y-%m-%d %H:%M UTC").to_string(),
        None => String::from("unknown time"),
    }
}

/// The message announcing that someone changed their profile, one change per line.
#[must_use]
pub fn render_change_notification(user: &User, changes: &ChangeSet) -> String {
    let mut text = format!(
        "<b>Profile change detected</b> for {}:\n",
        user_name_prettyprint(user, true)
    );

    for event in &changes.events {
        text.push('\n');
        text.push_str(&encode_text(&event.to_string()));
    }

    text
}

/// The reply to `/history`. Events come in stored order, oldest first, and are
/// shown newest first.
#[must_use]
pub fn render_history(subject_label: &str, events: &[ChangeEvent]) -> String {
    if events.is_empty() {
        return format!(
            "No changes recorded yet for {}.",
            encode_text(subject_label)
        );
    }

    let mut text = format!(
        "<b>History of {}</b>: {} change{}\n",
        encode_text(subject_label),
        events.len(),
        if events.len() == 1 { "" } else { "s" }
    );

    for (index, event) in events.iter().rev().enumerate() {
        write!(
            text,
            "\n{}. [{}] {}",
            index + 1,
            event_time_prettyprint(&event.observed_at),
            encode_text(&event.to_string())
        )
        .expect("Writing to a String never fails");
    }

    text
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use chrono::{TimeZone, Utc};
    use teloxide::types::UserId;

    use super::*;
    use crate::profiles::ChangeKind;

    fn user(first_name: &str, username: Option<&str>) -> User {
        serde_json::from_value(serde_json::json!({
            "id": 1234,
            "is_bot": false,
            "first_name": first_name,
            "username": username,
        }))
        .unwrap()
    }

    fn event(kind: ChangeKind, old: Option<&str>, new: Option<&str>, at: EventTime) -> ChangeEvent {
        ChangeEvent {
            kind,
            old_value: old.map(String::from),
            new_value: new.map(String::from),
            observed_at: at,
        }
    }

    fn at(hour: u32) -> EventTime {
        EventTime::Known(Utc.with_ymd_and_hms(2024, 5, 1, hour, 30, 0).unwrap())
    }

    #[test]
    fn pretty_names() {
        assert_eq!(
            user_name_prettyprint(&user("Amogus", Some("sus")), false),
            "@sus"
        );
        assert_eq!(
            user_name_prettyprint(&user("<b>Amogus</b>", None), true),
            "<a href=\"tg://user?id=1234\">&lt;b&gt;Amogus&lt;/b&gt;</a> (userid 1234)"
        );
    }

    #[test]
    fn notification_lists_changes_in_order() {
        let changes = ChangeSet {
            subject: UserId(1234),
            events: vec![
                event(ChangeKind::Handle, Some("old"), Some("new"), at(1)),
                event(ChangeKind::DisplayName, None, Some("A & B"), at(1)),
            ],
        };

        let text = render_change_notification(&user("A & B", Some("new")), &changes);

        assert_eq!(
            text,
            "<b>Profile change detected</b> for @new (userid 1234):\n\
             \nUsername: @old → @new\
             \nName: None → A &amp; B"
        );
    }

    #[test]
    fn history_is_newest_first() {
        let events = vec![
            event(ChangeKind::Handle, Some("a"), Some("b"), at(1)),
            event(ChangeKind::DisplayName, Some("X"), Some("Y"), at(2)),
        ];

        let text = render_history("@b", &events);

        assert_eq!(
            text,
            "<b>History of @b</b>: 2 changes\n\
             \n1. [2024-05-01 02:30 UTC] Name: X → Y\
             \n2. [2024-05-01 01:30 UTC] Username: @a → @b"
        );
    }

    #[test]
    fn history_with_bad_times_and_no_events() {
        let events = vec![event(
            ChangeKind::Handle,
            None,
            Some("b"),
            EventTime::Malformed("whenever".into()),
        )];

        assert_eq!(
            render_history("Bob", &events),
            "<b>History of Bob</b>: 1 change\n\n1. [unknown time] Username: None → @b"
        );
        assert_eq!(
            render_history("Bob", &[]),
            "No changes recorded yet for Bob."
        );
    }
}
