//! Build metadata captured by `build.rs`.

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_COMMIT: &str = env!("TURNWISE_BUILD_GIT_HASH");
pub const BUILD_TIMESTAMP: &str = env!("TURNWISE_BUILD_TIMESTAMP");

/// Text printed by `turnwise --version`.
pub const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\ncommit: ",
    env!("TURNWISE_BUILD_GIT_HASH"),
    "\nbuilt: ",
    env!("TURNWISE_BUILD_TIMESTAMP")
);

/// One-line banner shown when the REPL starts.
pub fn banner_line() -> String {
    format!("v{VERSION} ({GIT_COMMIT}, built {BUILD_TIMESTAMP})")
}
