use std::fmt::Debug;

use tracing::{error, warn};

/// Logs results nobody is waiting on
pub trait LogErrorExt {
    fn log_error(self, message: &str);
    fn log_warn(self, message: &str);
}

impl<T, E: Debug> LogErrorExt for Result<T, E> {
    fn log_error(self, message: &str) {
        if let Err(err) = self {
            error!("{message}: {err:?}");
        }
    }

    fn log_warn(self, message: &str) {
        if let Err(err) = self {
            warn!("{message}: {err:?}");
        }
    }
}
