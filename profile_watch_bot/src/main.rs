use arch_bot_commons::*;

fn main() {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "WARN,profile_watch_bot=debug");
    }
    start_everything(profile_watch_bot::entry());
}
