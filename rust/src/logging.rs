use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use tracing_subscriber::EnvFilter;

pub const LOG_FILE_NAME: &str = "murmur.log";

static INIT: OnceLock<()> = OnceLock::new();

/// Install the global subscriber once per process. Later calls (one per opened
/// conversation) are no-ops. Falls back to stderr if the log file can't be opened.
pub fn init_logging(data_dir: &str) {
    INIT.get_or_init(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let path = Path::new(data_dir).join(LOG_FILE_NAME);
        let file = OpenOptions::new().create(true).append(true).open(&path);

        let installed = match file {
            Ok(file) => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_target(false)
                .with_writer(Mutex::new(file))
                .try_init(),
            Err(e) => {
                eprintln!("murmur: cannot open {}: {e}", path.display());
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(std::io::stderr)
                    .try_init()
            }
        };
        // Another subscriber (e.g. the host app's) may already be installed.
        let _ = installed;
    });
}
