use std::{fs, sync::Arc};

use chrono::Utc;
use teloxide::{dptree::deps, prelude::*};

use crate::{
    config::Config,
    handlers::{generate_bot_commands, handle_edited_message, handle_new_message},
    moderation::Moderation,
    profiles::ProfileTracker,
    scheduler::Scheduler,
    store::JsonFileStore,
    DeletionScheduler, Tracker, CONFIG_PATH,
};

/// Read the bot token from the key file, or from `TELOXIDE_TOKEN` if there's none.
///
/// # Panics
///
/// Panics if there's neither.
fn load_key() -> String {
    let key_file = match cfg!(debug_assertions) {
        true => "key_debug",
        false => "key",
    };

    match fs::read_to_string(key_file) {
        Ok(key) => key.trim().to_string(),
        Err(e) => {
            log::info!("No {key_file} file ({e}), trying TELOXIDE_TOKEN instead.");
            std::env::var("TELOXIDE_TOKEN").expect("Could not load bot key file!")
        }
    }
}

/// # Panics
///
/// Panics if there's no bot token, or the delay keywords in the config are broken.
pub async fn entry() {
    log::info!("ASYNC WOOOO");

    let bot = Bot::new(load_key());

    let config = Config::load(CONFIG_PATH);
    let moderation =
        Arc::new(Moderation::from_config(&config).expect("Failed to build the keyword regex!"));
    log::info!(
        "Moderating {} chats, deleting reported messages after {:?}.",
        moderation.moderated_chat_count(),
        moderation.delete_delay()
    );

    if let Err(e) = bot.set_my_commands(generate_bot_commands()).await {
        log::warn!("Failed to set bot commands: {e}");
    }

    let profiles_store = JsonFileStore::new(config.profiles_path.as_str());
    let deletions_store = JsonFileStore::new(config.scheduled_deletions_path.as_str());
    log::info!(
        "Keeping profiles in {} and scheduled deletions in {}.",
        profiles_store.path().display(),
        deletions_store.path().display()
    );

    let tracker: Arc<Tracker> = Arc::new(ProfileTracker::open(profiles_store).await);

    let scheduler: Arc<DeletionScheduler> = Scheduler::new(deletions_store, bot.clone());
    scheduler.recover(Utc::now()).await;

    log::info!("Creating the handler...");

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_new_message))
        .branch(Update::filter_edited_message().endpoint(handle_edited_message));

    log::info!("Dispatching the dispatcher!");

    Dispatcher::builder(bot, handler)
        .default_handler(|_| async {})
        .dependencies(deps![tracker, scheduler, moderation])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    log::info!("it appears we have been bonked.");
}
