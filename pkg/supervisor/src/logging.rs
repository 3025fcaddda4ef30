use tracing::warn;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{Layer, fmt};

use pkg_types::verbosity::{VERBOSITY_ENV, Verbosity};

/// Install the global subscriber for a binary. `flag` is the `--v` value;
/// the environment override wins when it parses.
pub fn init(flag: u8) -> Verbosity {
    let verbosity = Verbosity::from_env(flag);
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .compact()
                .with_line_number(true)
                .with_target(false)
                .with_filter(verbosity.level_filter()),
        )
        .init();

    if let Some(raw) = &verbosity.rejected_env {
        warn!(
            "Ignoring invalid {}={:?}, using verbosity {}",
            VERBOSITY_ENV, raw, verbosity.level
        );
    }
    verbosity
}
