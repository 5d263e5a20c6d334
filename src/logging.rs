//! A.2: structured logging. Installed once at process start, writing to
//! stderr (FD 2), which the activator routes to the journal. A verbose
//! request raises the effective level to debug for the remainder of that
//! invocation by swapping the installed filter through a reload handle,
//! rather than installing a second global subscriber (which `tracing`
//! does not allow). Nothing here ever logs the secret buffer, which has no
//! `Debug`/`Display` impl to begin with.

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, Registry};

pub type ReloadHandle = reload::Handle<LevelFilter, Registry>;

/// Installs the global subscriber at INFO and returns a handle that can
/// later raise the effective level without reinstalling anything.
pub fn init() -> ReloadHandle {
    let (filter, handle) = reload::Layer::new(LevelFilter::INFO);
    let fmt_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();

    handle
}

/// Raises the effective level to DEBUG. Called at most once per process,
/// when the request's verbose flag is seen.
pub fn set_verbose(handle: &ReloadHandle) {
    let _ = handle.modify(|filter| *filter = LevelFilter::DEBUG);
}
