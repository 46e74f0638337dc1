use color_eyre::eyre::Result;
use tracing::error;

/// Routes panic reports to the log and stderr, keeping stdout clean for the
/// status feed.
pub fn initialize_panic_handler() -> Result<()> {
    let (panic_hook, eyre_hook) = color_eyre::config::HookBuilder::default()
        .panic_section(format!(
            "This is a bug. Consider reporting it at {}",
            env!("CARGO_PKG_REPOSITORY")
        ))
        .display_location_section(true)
        .display_env_section(true)
        .into_hooks();
    eyre_hook.install()?;
    std::panic::set_hook(Box::new(move |panic_info| {
        error!("Panic! {panic_info:#?}");
        eprintln!("{}", panic_hook.panic_report(panic_info));
        std::process::exit(1);
    }));
    Ok(())
}
