mod app;
mod errors;
pub mod panic_handler;
mod platform;

use std::{io, sync::mpsc};

use color_eyre::eyre::Result;
use tracing::info;

use app::App;
use platform::PulseSession;

pub use errors::{AppResult, VolwatchError};

/// Builds the session backend and runs the watcher until the event stream
/// closes or a query fails. Stdout carries the status feed and nothing else.
pub fn run() -> Result<()> {
    let (event_tx, event_rx) = mpsc::channel();

    let session = PulseSession::build(event_tx)?;
    info!("subscribed to session manager events");

    let app = App::new(session, event_rx, io::stdout());
    app.run()?;

    Ok(())
}
