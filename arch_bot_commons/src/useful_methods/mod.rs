mod split_msg;
pub use split_msg::*;

use teloxide::types::{Message, User};

pub trait MessageStuff {
    /// Text of the message, or its caption if it has media instead.
    fn text_full(&self) -> Option<&str>;
    /// The user that sent this message, unless it's posted on behalf of a chat
    /// (anonymous admins, linked channels) or by a bot.
    fn human_sender(&self) -> Option<&User>;
}

impl MessageStuff for Message {
    fn text_full(&self) -> Option<&str> {
        self.text().or_else(|| self.caption())
    }
    fn human_sender(&self) -> Option<&User> {
        if self.sender_chat.is_some() {
            // "from" is @GroupAnonymousBot or @Channel_Bot here, for backwards compatibility.
            return None;
        }
        self.from.as_ref().filter(|user| !user.is_bot)
    }
}
