use arch_bot_commons::{teloxide_retry, useful_methods::BotArchSendMsg};
use teloxide::{
    prelude::Requester,
    types::{Message, MessageId, User},
    ApiError, Bot, RequestError,
};

use crate::{
    misc::render_change_notification,
    profiles::ChangeSet,
    scheduler::{MessageDeleter, MessageTarget},
};

impl MessageDeleter for Bot {
    async fn delete_target(&self, target: MessageTarget) -> Result<(), RequestError> {
        match teloxide_retry!(self.delete_message(target.chat_id, target.message_id).await) {
            Ok(_) => Ok(()),
            Err(RequestError::Api(ApiError::MessageIdInvalid | ApiError::MessageToDeleteNotFound)) => {
                // Someone else probably has already deleted it. That's fine.
                log::debug!("{target:?} was already gone.");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Tell the chat that this user changed their name or username.
/// Does nothing if nothing changed.
pub async fn send_change_notification(
    bot: &Bot,
    message: &Message,
    user: &User,
    changes: &ChangeSet,
    reply_to: Option<MessageId>,
) -> Result<(), RequestError> {
    if changes.is_empty() {
        return Ok(());
    }

    let text = render_change_notification(user, changes);
    bot.archsendmsg(message.chat.id, text.as_str(), reply_to)
        .await?;

    Ok(())
}

/// Delete this message if possible, and don't care if it's not.
pub async fn delete_best_effort(bot: &Bot, message: &Message) {
    if let Err(e) = bot.delete_target(MessageTarget::of(message)).await {
        log::debug!("Couldn't delete {:?}: {e}", MessageTarget::of(message));
    }
}
