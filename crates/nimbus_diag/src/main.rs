use anyhow::Result;
use clap::{CommandFactory, Parser};
use nimbus_diag::callbacks::grouping;
use nimbus_diag::cli::{Cli, Commands};
use nimbus_diag::{config, demo, shutdown};

fn main() -> Result<()> {
    // 1. Setup File Logging
    let file_appender = tracing_appender::rolling::daily("logs", "nimbus_diag.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    shutdown::install_log_guard(guard);

    // 2. Setup Console Logging
    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy();

    // 3. Combine Subscribers
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer()) // Stdout
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        ) // File
        .init();

    // 4. Setup Panic Hook
    std::panic::set_hook(Box::new(|panic_info| {
        let payload = panic_info.payload();
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            *s
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.as_str()
        } else {
            "Unknown panic"
        };

        let location = panic_info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();
        tracing::error!(target: "panic", "🔥 CRASH detected at {}: {}", location, msg);
        eprintln!("🔥 CRASH detected at {}: {}", location, msg);
    }));

    tracing::info!("🚀 nimbus_diag started.");

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Validate(args)) => demo::run(args)?,
        Some(Commands::Groups(args)) => grouping::run(args)?,
        Some(Commands::Config(args)) => config::run(args)?,
        None => Cli::command().print_help()?,
    }

    Ok(())
}
