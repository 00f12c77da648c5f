use arch_bot_commons::useful_methods::*;
use teloxide::{
    types::{BotCommand, Message, UserId},
    Bot, RequestError,
};

use crate::{
    actions::delete_best_effort,
    misc::render_history,
    moderation::Moderation,
    profiles::ProfileRecord,
    DeletionScheduler, Tracker,
};

#[derive(Debug, PartialEq, Eq)]
pub struct Command {
    pub callname: &'static str,
    pub description: &'static str,
}

pub const START: Command = Command {
    callname: "/start",
    description: "Show what this bot is doing in this chat.",
};

pub const HISTORY: Command = Command {
    callname: "/history",
    description: "Show name and username changes of a user. Reply to them, give their @username, or nothing for yourself.",
};

pub const COMMANDS: &[Command] = &[START, HISTORY];

impl Command {
    pub fn is_matching_callname(&self, command: &str) -> bool {
        self.callname.eq_ignore_ascii_case(command)
    }
}

pub fn generate_bot_commands() -> Vec<BotCommand> {
    COMMANDS
        .iter()
        // Cut off the /
        .map(|command| BotCommand::new(&command.callname[1..], command.description))
        .collect()
}

/// Text that looks like a command, split into its parts.
pub struct CommandParams<'a> {
    pub message_text: &'a str,
    pub command_len: usize,
}

impl<'a> CommandParams<'a> {
    /// Returns [`None`] if this message is not a command.
    pub fn new(message: &'a Message) -> Option<Self> {
        Self::parse(message.text_full()?)
    }

    pub fn parse(message_text: &'a str) -> Option<Self> {
        if !message_text.starts_with('/') {
            return None;
        }

        let command = message_text.split_whitespace().next()?;

        if !command.is_ascii() {
            // Telegram commands must be ASCII.
            // See https://core.telegram.org/bots/api#botcommand
            return None;
        }

        Some(CommandParams {
            message_text,
            command_len: command.len(),
        })
    }

    /// Get text command.
    ///
    /// If the input command is `/history@Some_Bot @amogus`,
    /// this will be the substring `/history@Some_Bot`.
    pub fn command(&self) -> &'a str {
        &self.message_text[..self.command_len]
    }

    /// Get the command's name, or [`None`] if it's addressed to some other bot.
    ///
    /// If the input command is `/history@Some_Bot @amogus` and we're `@Some_Bot`,
    /// this will be the substring `/history`.
    pub fn callname(&self, bot_username: &str) -> Option<&'a str> {
        let command = self.command();
        let Some(username_start) = command.find('@') else {
            return Some(command);
        };

        // Bot names are guaranteed ASCII, so ignore ASCII case specifically.
        if !command[username_start + '@'.len_utf8()..].eq_ignore_ascii_case(bot_username) {
            return None;
        }

        Some(&command[..username_start])
    }

    /// Get text parameters.
    ///
    /// If the input command is `/history @amogus`,
    /// this will be the substring `@amogus`.
    pub fn get_params(&self) -> &'a str {
        self.message_text[self.command_len..].trim()
    }
}

/// Find which of our commands this text is, if any.
///
/// Unknown commands and commands addressed to other bots are [`None`], and
/// are treated like any other message.
pub fn our_command(text: &str, bot_username: &str) -> Option<&'static Command> {
    let params = CommandParams::parse(text)?;
    let callname = params.callname(bot_username)?;

    COMMANDS
        .iter()
        .find(|command| command.is_matching_callname(callname))
}

/// Run one of our commands, as found by [`our_command`].
pub async fn run_command(
    command: &Command,
    bot: &Bot,
    message: &Message,
    tracker: &Tracker,
    scheduler: &DeletionScheduler,
    moderation: &Moderation,
) -> Result<(), RequestError> {
    let Some(params) = CommandParams::new(message) else {
        return Ok(());
    };

    if command.is_matching_callname(HISTORY.callname) {
        history(bot, message, &params, tracker).await
    } else if command.is_matching_callname(START.callname) {
        start(bot, message, tracker, scheduler, moderation).await
    } else {
        // No matching command found. lol lmao
        log::debug!("Unknown command {}", command.callname);
        Ok(())
    }
}

/// Whose history is being asked for, and how to call them.
async fn history_subject(
    message: &Message,
    params: &CommandParams<'_>,
    tracker: &Tracker,
) -> Result<UserId, String> {
    let handle = params.get_params();

    if !handle.is_empty() {
        return tracker
            .resolve_subject_by_handle(handle)
            .await
            .map_err(|e| e.to_string());
    }

    if let Some(reply_to) = message.reply_to_message() {
        return reply_to
            .human_sender()
            .map(|user| user.id)
            .ok_or_else(|| String::from("That message wasn't sent by a person."));
    }

    message
        .human_sender()
        .map(|user| user.id)
        .ok_or_else(|| String::from("Can't tell whose history you want."))
}

fn subject_label(subject: UserId, profile: Option<&ProfileRecord>) -> String {
    let Some(profile) = profile else {
        return format!("user {subject}");
    };

    if let Some(handle) = &profile.handle {
        format!("@{handle}")
    } else if let Some(name) = &profile.display_name {
        name.clone()
    } else {
        format!("user {subject}")
    }
}

async fn history(
    bot: &Bot,
    message: &Message,
    params: &CommandParams<'_>,
    tracker: &Tracker,
) -> Result<(), RequestError> {
    let response = match history_subject(message, params, tracker).await {
        Ok(subject) => match tracker.history(subject).await {
            Ok(events) => {
                let profile = tracker.profile(subject).await;
                render_history(&subject_label(subject, profile.as_ref()), &events)
            }
            Err(e) => html_escape::encode_text(&capitalize(&e.to_string())).into_owned(),
        },
        Err(e) => html_escape::encode_text(&capitalize(&e)).into_owned(),
    };

    let sent = bot.archsendmsg(message.chat.id, response.as_str(), None).await;

    // The command itself is just clutter now.
    delete_best_effort(bot, message).await;

    sent.map(|_| ())
}

async fn start(
    bot: &Bot,
    message: &Message,
    tracker: &Tracker,
    scheduler: &DeletionScheduler,
    moderation: &Moderation,
) -> Result<(), RequestError> {
    if !(message.chat.is_group() || message.chat.is_supergroup()) {
        return Ok(());
    }

    let moderated = if moderation.is_moderated(message.chat.id) {
        "This chat is moderated: messages with banned words get deleted, and reported ones get deleted later."
    } else {
        "This chat is not moderated."
    };

    let response = format!(
        concat!(
            "Hi! I keep track of name and username changes and announce them here.\n\n",
            "Tracking {} users, with {} deletions pending.\n",
            "{}\n\n",
            "Use /history to see someone's changes."
        ),
        tracker.tracked_count().await,
        scheduler.pending().await.len(),
        moderated
    );

    bot.archsendmsg(message.chat.id, response.as_str(), message.id)
        .await?;

    Ok(())
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
