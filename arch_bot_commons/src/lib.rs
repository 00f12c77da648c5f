//! This create houses common for me functions, because some things
//! are just boilerplate and aaAAAAAAAAA

use std::future::Future;

pub mod useful_methods;

/// Initialize logging and start the `closure` in an async runtime.
/// Logging is enabled by default on level `info` unless overridden
/// by environment variable `RUST_LOG`. This uses the crate
/// [pretty_env_logger][] internally, see its documentation for more details.
///
/// When running as a systemd service, timestamps are left out, because
/// the journal records its own.
///
/// # Panics
///
/// Panics if the tokio runtime fails to build.
///
/// [pretty_env_logger]: https://docs.rs/pretty_env_logger
pub fn start_everything(closure: impl Future<Output = ()>) {
    let log_level = std::env::var_os("RUST_LOG")
        .unwrap_or_else(|| std::ffi::OsString::from("info"))
        .into_string()
        .unwrap_or_else(|_| String::from("info"));

    let running_as_systemd_service = std::env::var_os("JOURNAL_STREAM").is_some();

    let mut builder = match running_as_systemd_service {
        true => pretty_env_logger::formatted_builder(),
        false => pretty_env_logger::formatted_timed_builder(),
    };

    builder.parse_filters(&log_level);

    if builder.try_init().is_err() {
        log::error!("Tried to init logger twice!");
    }

    log::info!("hi");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build the tokio runtime!")
        .block_on(closure);
}

/// Run a teloxide request expression, and if Telegram tells us to wait
/// because of flood control, wait as long as asked and run it again.
/// Gives up after a few attempts and returns the last result.
///
/// ```ignore
/// let result = teloxide_retry!(bot.delete_message(chat_id, message_id).await);
/// ```
#[macro_export]
macro_rules! teloxide_retry {
    ($request: expr) => {{
        let mut attempts: u8 = 0;
        loop {
            attempts += 1;
            let result = $request;
            match result {
                Err(::teloxide::RequestError::RetryAfter(seconds)) if attempts < 3 => {
                    ::log::debug!("Flood control, retrying after {seconds:?}");
                    ::tokio::time::sleep(seconds.duration()).await;
                }
                other => break other,
            }
        }
    }};
}
