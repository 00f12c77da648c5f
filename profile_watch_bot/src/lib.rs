//! Source code for Profile Watch Bot, a Telegram bot that keeps an eye on
//! people's names and usernames and tells the chat when they change.
//!
//! In moderated chats it also deletes messages with banned words right away,
//! and reported messages some time later, even across restarts.

/// Saving and loading of whole snapshots of state.
pub mod store;

/// Change detection and history of names and usernames.
pub mod profiles;

/// Delayed deletions that survive restarts.
pub mod scheduler;

/// Banned words and delay keywords.
pub mod moderation;

/// The `config.json` file.
pub mod config;

/// Miscellaneous functions.
mod misc;

/// Functions that perform stuff via the bot.
mod actions;

/// Functions that handle events from Telegram.
mod handlers;

/// Entry function that starts the bot.
mod entry;
pub use entry::*;

use teloxide::Bot;

use crate::{
    profiles::{ProfileRecord, ProfileTracker},
    scheduler::{ScheduledAction, Scheduler},
    store::JsonFileStore,
};

/// Where the config is read from, relative to the working directory.
pub static CONFIG_PATH: &str = "config.json";

pub type Tracker = ProfileTracker<JsonFileStore<Vec<ProfileRecord>>>;
pub type DeletionScheduler = Scheduler<JsonFileStore<Vec<ScheduledAction>>, Bot>;
