//! Tracing subscriber setup for the `xvdscope` binary.
//!
//! `RUST_LOG` takes precedence when set:
//!
//! ```bash
//! RUST_LOG=xvdscope=trace xvdscope layout game.xvd
//! ```
//!
//! Otherwise the filter is `xvdscope=info`, or `xvdscope=debug` with
//! `--verbose`.  Logs go to stderr so stdout stays clean for `--json`.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("xvdscope=debug")
        } else {
            EnvFilter::new("xvdscope=info")
        }
    });

    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(verbose)
            .with_file(verbose)
            .with_line_number(verbose)
            .compact(),
    );

    // A second call (e.g. from tests) keeps the first subscriber.
    let _ = tracing::subscriber::set_global_default(subscriber);
}
