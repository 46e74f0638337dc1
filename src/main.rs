use color_eyre::eyre::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    volwatch::panic_handler::initialize_panic_handler()?;
    init_logging();

    info!("volwatch v{}", env!("CARGO_PKG_VERSION"));

    volwatch::run()
}

/// Diagnostics go to stderr; stdout is reserved for the status feed.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(concat!(env!("CARGO_PKG_NAME"), "=info")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
