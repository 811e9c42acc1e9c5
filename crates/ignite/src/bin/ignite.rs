//! Ignite CLI
//!
//! Usage:
//!   ignite launch/demo.yaml
//!   ignite launch/demo.yaml --stop-timeout 10
//!   ignite launch/demo.yaml --dry-run

use ignite::{Group, GroupOptions, LaunchArgs};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const STARTUP_GRACE: Duration = Duration::from_secs(1);
const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() {
    let args: LaunchArgs = argh::from_env();

    // Initialize logging
    let env = env_logger::Env::default().default_filter_or(args.log_filter());
    env_logger::init_from_env(env);

    let mut options = GroupOptions::default()
        .with_output(Arc::new(ignite::Output::stdout(!args.no_color)))
        .with_line_buffering(!args.no_line_buffering);
    if let Some(timeout) = args.stop_timeout {
        options = options.with_stop_timeout(timeout);
    }

    log::info!("Loading launch file: {}", args.launch_file);
    let mut group = match Group::load(&args.launch_file, &options).await {
        Ok(group) => group,
        Err(e) => {
            log::error!("Error opening launch file {}: {}", args.launch_file, e);
            std::process::exit(1);
        }
    };

    // Validate only mode
    if args.validate {
        println!("Launch file '{}' is valid", args.launch_file);
        println!("  Title: {}", group.info().display_title());
        println!("  Programs: {}", group.programs().len());
        println!("  Plugins: {}", group.plugins().join(", "));
        println!("  Startup sequence: {}", group.sequence().join(", "));
        return;
    }

    // Dry run mode
    if args.dry_run {
        println!("{}", group.plan());
        return;
    }

    // Every SIGINT/SIGTERM bumps the counter
    let (interrupt_tx, mut interrupt_rx) = watch::channel(0u32);
    if let Err(e) = ctrlc::set_handler(move || {
        interrupt_tx.send_modify(|count| *count += 1);
    }) {
        log::error!("Failed to install signal handler: {}", e);
        std::process::exit(1);
    }

    group.announce("Starting up ...");
    group.start().await;

    tokio::select! {
        _ = tokio::time::sleep(STARTUP_GRACE) => {}
        _ = interrupt_rx.changed() => {}
    }

    while group.valid() && *interrupt_rx.borrow() == 0 {
        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = interrupt_rx.changed() => {}
        }
    }

    group.announce("Shutting down ...");
    interrupt_rx.borrow_and_update();

    let forced = tokio::select! {
        _ = group.stop(false) => false,
        _ = interrupt_rx.changed() => true,
    };

    if forced {
        log::warn!("Interrupted during shutdown, killing remaining programs");
        group.stop(true).await;
    }

    log::info!("Ignite exiting");
}
