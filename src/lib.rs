pub mod config;
pub mod error;
pub mod recording;

pub use config::RecorderConfig;
pub use error::{JobErrorKind, RecorderError};
pub use recording::coordinator::RecordingCoordinator;

/**
 * Initialize the log backend once per process
 * Defaults to info for this crate, RUST_LOG overrides
 */
pub fn init_logging() {
    let env = env_logger::Env::default().default_filter_or("slide_recorder=info,warn");
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .try_init();
}
