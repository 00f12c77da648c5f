use std::{future::Future, time::Duration};

use teloxide::{
    payloads::SendMessageSetters,
    requests::Requester,
    sugar::request::{RequestLinkPreviewExt, RequestReplyExt},
    types::{Message, MessageId, ParseMode, Recipient},
    Bot, RequestError,
};

/// Maximum length of a single Telegram message, in bytes we count here.
pub const MESSAGE_LENGTH_LIMIT: usize = 4096;

pub trait BotArchSendMsg {
    /// Opinionated method to send a message, with HTML markup, no link previews,
    /// and retries due to flood waiting or any other issues.
    /// Also splits the message into many if it's longer than
    /// the character limit.
    ///
    /// Only the first chunk is sent as a reply to `reply_to`.
    fn archsendmsg<'a>(
        &'a self,
        to_where: impl Into<Recipient> + Send,
        text: impl Into<&'a str> + Send,
        reply_to: impl Into<Option<MessageId>> + Send,
    ) -> impl Future<Output = Result<Vec<Message>, RequestError>> + Send;
}

impl BotArchSendMsg for Bot {
    async fn archsendmsg<'a>(
        &'a self,
        to_where: impl Into<Recipient> + Send,
        text: impl Into<&'a str> + Send,
        reply_to: impl Into<Option<MessageId>> + Send,
    ) -> Result<Vec<Message>, RequestError> {
        let to_where: Recipient = to_where.into();
        let text = text.into();
        let mut reply_to = reply_to.into();
        let mut sent_messages = Vec::new();

        for text in LineChunks::new(text, MESSAGE_LENGTH_LIMIT) {
            // Try up to 3 times lol
            let mut looped: u8 = 0;
            let result = loop {
                looped += 1;
                let mut request = self
                    .send_message(to_where.clone(), text)
                    .parse_mode(ParseMode::Html)
                    .disable_link_preview(true);
                if let Some(reply_to) = reply_to {
                    request = request.reply_to(reply_to);
                }
                let result = request.await;

                if result.is_ok() || looped >= 3 {
                    break result;
                }

                if let Err(RequestError::RetryAfter(seconds)) = &result {
                    tokio::time::sleep(seconds.duration()).await;
                } else {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            };

            sent_messages.push(result?);
            reply_to = None;
        }

        Ok(sent_messages)
    }
}

/// Iterator that packs whole lines of text into chunks no longer than a
/// specified amount of bytes.
///
/// Lines that don't fit into a chunk on their own get cut at character
/// boundaries. Line breaks at the edges of chunks are dropped.
pub struct LineChunks<'a> {
    data: &'a str,
    max_len: usize,
}

impl<'a> LineChunks<'a> {
    /// Create a new splitter with specified max length by bytes.
    ///
    /// # Panics
    /// Panics if a max length of less than 4 is specified,
    /// as a single character may be up to 4 bytes in size.
    #[must_use]
    pub fn new(data: &'a str, max_len: usize) -> LineChunks<'a> {
        assert!(max_len >= 4, "Max length is too small");
        LineChunks { data, max_len }
    }
}

impl<'a> Iterator for LineChunks<'a> {
    type Item = &'a str;
    fn next(&mut self) -> Option<Self::Item> {
        self.data = self.data.trim_start_matches('\n');
        if self.data.is_empty() {
            return None;
        }

        if self.data.len() <= self.max_len {
            let output = self.data;
            self.data = "";
            return Some(output);
        }

        let mut limit = self.max_len;
        while !self.data.is_char_boundary(limit) {
            limit -= 1;
        }

        // Cut at the last line break that still fits, or mid-line if there is none.
        let cut = if self.data.as_bytes()[limit] == b'\n' {
            limit
        } else {
            match self.data[..limit].rfind('\n') {
                Some(newline) if newline > 0 => newline,
                _ => limit,
            }
        };

        let output = &self.data[..cut];
        self.data = &self.data[cut..];
        Some(output)
    }
}
