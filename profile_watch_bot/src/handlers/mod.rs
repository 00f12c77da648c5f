pub mod commands;
use arch_bot_commons::useful_methods::*;

use std::sync::Arc;

use chrono::Utc;
use teloxide::{
    types::{Me, Message, MessageId, User, UserId},
    Bot, RequestError,
};

use crate::{
    actions::send_change_notification,
    moderation::{moderate, Moderation, Verdict},
    profiles::Observation,
    scheduler::MessageTarget,
    DeletionScheduler, Tracker,
};

pub use commands::generate_bot_commands;
use commands::Command;

/// Where a new message should go.
#[derive(Debug, PartialEq, Eq)]
pub enum Route {
    /// One of our commands. Not watched and not moderated.
    Command(&'static Command),
    /// Everything else, including commands we don't know or that are for other bots.
    Regular,
}

/// Decide what to do with a message with this text (or caption), as seen by
/// the bot with this username.
pub fn route(text: Option<&str>, bot_username: &str) -> Route {
    match text.and_then(|text| commands::our_command(text, bot_username)) {
        Some(command) => Route::Command(command),
        None => Route::Regular,
    }
}

/// Returns true if this message was sent by us or some other bot.
///
/// Messages posted on behalf of a chat have a bot in `from` for backwards
/// compatibility, and those don't count.
fn sent_by_a_bot(from: Option<&User>, posted_as_chat: bool, my_id: UserId) -> bool {
    !posted_as_chat && from.is_some_and(|from| from.id == my_id || from.is_bot)
}

/// What the change notification should reply to. Nothing if the message is
/// already gone.
fn notification_reply_to(message_id: MessageId, verdict: Option<Verdict>) -> Option<MessageId> {
    match verdict {
        Some(Verdict::Banned) => None,
        _ => Some(message_id),
    }
}

/// Run moderation on the message, if it's in a moderated chat and has text.
async fn moderate_message(
    message: &Message,
    scheduler: &DeletionScheduler,
    moderation: &Moderation,
) -> Option<Verdict> {
    if !moderation.is_moderated(message.chat.id) {
        return None;
    }

    let text = message.text_full()?;

    Some(
        moderate(
            moderation,
            scheduler,
            MessageTarget::of(message),
            text,
            Utc::now(),
        )
        .await,
    )
}

pub async fn handle_new_message(
    bot: Bot,
    me: Me,
    message: Message,
    tracker: Arc<Tracker>,
    scheduler: Arc<DeletionScheduler>,
    moderation: Arc<Moderation>,
) -> Result<(), RequestError> {
    // Bot ignores messages made by itself, and other bots.
    if sent_by_a_bot(message.from.as_ref(), message.sender_chat.is_some(), me.id) {
        return Ok(());
    }

    if let Route::Command(command) = route(message.text_full(), me.username()) {
        return commands::run_command(command, &bot, &message, &tracker, &scheduler, &moderation)
            .await;
    }

    let verdict = moderate_message(&message, &scheduler, &moderation).await;

    if let Some(user) = message.human_sender() {
        let changes = tracker
            .observe(user.id, Observation::of_user(user), Utc::now())
            .await;

        let reply_to = notification_reply_to(message.id, verdict);

        // Not the end of the world if this fails; it's in the history anyway.
        if let Err(e) = send_change_notification(&bot, &message, user, &changes, reply_to).await {
            log::warn!("Failed to announce changes of user {}: {e}", changes.subject);
        }
    }

    Ok(())
}

/// Edits only go through moderation. Names are watched on new messages.
pub async fn handle_edited_message(
    me: Me,
    message: Message,
    scheduler: Arc<DeletionScheduler>,
    moderation: Arc<Moderation>,
) -> Result<(), RequestError> {
    if sent_by_a_bot(message.from.as_ref(), message.sender_chat.is_some(), me.id) {
        return Ok(());
    }

    moderate_message(&message, &scheduler, &moderation).await;

    Ok(())
}
