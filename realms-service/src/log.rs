//! Logging init: wires this crate's name/rotation policy into `iam_log::init`.

use camino::Utf8Path;
use iam_log::{LoggerGuard, StaticLogConfig};

pub struct RealmsServiceLogConfig;

impl StaticLogConfig for RealmsServiceLogConfig {
    const MAX_BYTES_PER_LOG_FILE: u64 = 100 * 1024 * 1024;
    const MAX_LOG_FILES: usize = 10;
    const LOG_FILE_PREFIX: &'static str = "realms-service";
}

/// Initializes structured logging to `log_path`, filtered by `log_filter` (an `EnvFilter`
/// directive string, e.g. `"info,realms_service=debug"`).
pub fn init(log_path: &Utf8Path, log_filter: &str) -> anyhow::Result<LoggerGuard> {
    iam_log::init::<RealmsServiceLogConfig>(log_path, log_filter, None)
}
