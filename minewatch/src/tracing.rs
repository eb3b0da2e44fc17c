//! Logging setup.
//!
//! Modules import the macros through [`prelude`] so the log backend can
//! change in one place.

use time::macros::format_description;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::notify::NotifyLayer;

pub mod prelude {
    pub use ::tracing::{debug, error, info, trace, warn};
}

/// Install the global subscriber.
///
/// Honors `RUST_LOG` (default `info`). Under systemd (`JOURNAL_STREAM`
/// set) events go to journald instead of stderr. The optional notify
/// layer forwards error and notice events to a push service.
pub fn init(notify: Option<NotifyLayer>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let journald = if std::env::var_os("JOURNAL_STREAM").is_some() {
        tracing_journald::layer().ok()
    } else {
        None
    };

    let stderr = journald.is_none().then(|| {
        fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::LocalTime::new(format_description!(
                "[year]-[month]-[day] [hour]:[minute]:[second]"
            )))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(journald)
        .with(notify)
        .init();
}
