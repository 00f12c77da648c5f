//! Deleting unwanted messages in moderated chats.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use regex::Regex;
use teloxide::types::ChatId;

use crate::{
    config::Config,
    scheduler::{MessageDeleter, MessageTarget, ScheduledAction, Scheduler},
    store::SnapshotStore,
};

/// What should happen to a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Clean,
    /// Delete right now.
    Banned,
    /// Delete, but later.
    DelayedDelete,
}

/// Returns true if any word of the text is in the `banned` set.
///
/// Words are what's left between non-alphanumeric characters, lowercased.
/// The set is expected to be lowercase too.
pub fn contains_banned_word(text: &str, banned: &HashSet<String>) -> bool {
    if banned.is_empty() {
        return false;
    }

    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .any(|word| banned.contains(word))
}

/// Returns true if the text has one of the keywords, as a whole word or phrase.
pub fn contains_delay_keyword(text: &str, keywords: &Regex) -> bool {
    keywords.is_match(text)
}

/// Build a case-insensitive regex matching any of the keywords when they're
/// not glued to other letters or digits. No keywords means no regex.
///
/// # Errors
///
/// Errors if the resulting regex is too big lol
pub fn build_keyword_regex<S: AsRef<str>>(keywords: &[S]) -> Result<Option<Regex>, regex::Error> {
    let alternatives: Vec<String> = keywords
        .iter()
        .map(|x| x.as_ref().trim())
        .filter(|x| !x.is_empty())
        .map(regex::escape)
        .collect();

    if alternatives.is_empty() {
        return Ok(None);
    }

    // \b doesn't work for keywords like "#report", so spell out the edges.
    let pattern = format!(
        r"(?i)(?:^|[^\p{{L}}\p{{N}}_])(?:{})(?:$|[^\p{{L}}\p{{N}}_])",
        alternatives.join("|")
    );

    Regex::new(&pattern).map(Some)
}

/// The moderation rules, as set in the config.
#[derive(Debug)]
pub struct Moderation {
    moderated_chats: HashSet<ChatId>,
    banned_words: HashSet<String>,
    delay_keywords: Option<Regex>,
    delete_delay: std::time::Duration,
}

impl Moderation {
    /// # Errors
    ///
    /// Errors if the delay keywords can't be made into a regex.
    pub fn from_config(config: &Config) -> Result<Self, regex::Error> {
        Ok(Moderation {
            moderated_chats: config.moderated_chat_ids().collect(),
            banned_words: config
                .banned_words
                .iter()
                .map(|x| x.trim().to_lowercase())
                .filter(|x| !x.is_empty())
                .collect(),
            delay_keywords: build_keyword_regex(&config.delay_keywords)?,
            delete_delay: config.delete_delay(),
        })
    }

    #[must_use]
    pub fn is_moderated(&self, chat_id: ChatId) -> bool {
        self.moderated_chats.contains(&chat_id)
    }

    #[must_use]
    pub fn moderated_chat_count(&self) -> usize {
        self.moderated_chats.len()
    }

    #[must_use]
    pub fn delete_delay(&self) -> std::time::Duration {
        self.delete_delay
    }

    /// Judge the text. Banned words win over delay keywords.
    #[must_use]
    pub fn verdict(&self, text: &str) -> Verdict {
        if contains_banned_word(text, &self.banned_words) {
            return Verdict::Banned;
        }

        if self
            .delay_keywords
            .as_ref()
            .is_some_and(|keywords| contains_delay_keyword(text, keywords))
        {
            return Verdict::DelayedDelete;
        }

        Verdict::Clean
    }
}

/// Judge a message in a moderated chat and act on it: delete it right away if
/// it's banned, or schedule its deletion if it has a delay keyword.
///
/// The caller checks whether the chat is moderated.
pub async fn moderate<S, D>(
    moderation: &Moderation,
    scheduler: &Scheduler<S, D>,
    target: MessageTarget,
    text: &str,
    now: DateTime<Utc>,
) -> Verdict
where
    S: SnapshotStore<Vec<ScheduledAction>>,
    D: MessageDeleter,
{
    let verdict = moderation.verdict(text);

    match verdict {
        Verdict::Clean => (),
        Verdict::Banned => {
            log::info!("Deleting {target:?} for a banned word.");
            if let Err(e) = scheduler.deleter().delete_target(target).await {
                log::warn!("Failed to delete {target:?} with a banned word: {e}");
            }
        }
        Verdict::DelayedDelete => {
            scheduler
                .submit(target, moderation.delete_delay(), now)
                .await;
        }
    }

    verdict
}
