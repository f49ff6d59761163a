//! `cyberdeck` – daemon and operator shell for the cyberdeck hardware stack.
//!
//! 1. Loads `~/.cyberdeck/config.toml` (defaults when absent).
//! 2. Boots the daemon: hardware context, subsystem registry, background
//!    loops, heartbeat.  Any boot error is fatal.
//! 3. Drops the operator into an interactive REPL.
//! 4. On `/quit`, EOF or Ctrl-C stops the heartbeat and every background loop
//!    before exiting.

mod config;
mod repl;

use colored::Colorize;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use cyberdeck_runtime::{Daemon, init_tracing};
use tokio::sync::Notify;
use tracing::warn;

fn main() -> ExitCode {
    // ── Structured logging ────────────────────────────────────────────────
    let _telemetry = init_tracing("cyberdeck");

    print_banner();

    // ── First run ─────────────────────────────────────────────────────────
    let settings_path = config::config_path();
    if !settings_path.exists() {
        match config::save_to(&config::Settings::default(), &settings_path) {
            Ok(()) => println!("  Wrote default settings to {}", settings_path.display().to_string().bold()),
            Err(e) => warn!(error = %e, "could not write default settings"),
        }
    }

    let settings = match config::load() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{}: {}", "Settings error".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };
    println!("  Settings  : {}", settings_path.display().to_string().bold());
    println!("  Subsystems: {}", settings.subsystems_path.display().to_string().bold());
    if settings.simulate_hardware {
        println!("  {}", "Simulated hardware".yellow());
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Runtime error".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    let code = runtime.block_on(serve(settings));
    // The REPL thread may still be parked on stdin after Ctrl-C.
    runtime.shutdown_timeout(Duration::from_millis(200));
    code
}

async fn serve(settings: config::Settings) -> ExitCode {
    let daemon = match Daemon::boot(&settings.daemon_config()).await {
        Ok(d) => d,
        Err(e) => {
            eprintln!("{}: {}", "Boot failed".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    let systems = daemon.dispatcher().registry().ids();
    println!("  {} {} subsystem(s): {}", "✓".green(), systems.len(), systems.join(", "));
    println!("  Type {} for available commands.\n", "/help".bold());

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let interrupted = Arc::new(Notify::new());

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    {
        let shutdown = Arc::clone(&shutdown);
        let interrupted = Arc::clone(&interrupted);
        if let Err(e) = ctrlc::set_handler(move || {
            println!();
            println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
            shutdown.store(true, Ordering::SeqCst);
            interrupted.notify_one();
        }) {
            warn!(error = %e, "failed to install Ctrl-C handler; only /quit will stop the daemon");
        }
    }

    // ── REPL ──────────────────────────────────────────────────────────────
    let console = repl::Console::new(
        Arc::clone(daemon.dispatcher()),
        daemon.heartbeat().cloned(),
        tokio::runtime::Handle::current(),
    );
    let repl_shutdown = Arc::clone(&shutdown);
    let mut shell = tokio::task::spawn_blocking(move || repl::run(&console, repl_shutdown));

    tokio::select! {
        joined = &mut shell => {
            if let Err(e) = joined {
                warn!(error = %e, "REPL ended abnormally");
            }
        }
        _ = interrupted.notified() => {}
    }

    // ── Orderly shutdown ──────────────────────────────────────────────────
    for (id, state) in daemon.shutdown().await {
        println!("  {} {:<16} {:?}", "✓".green(), id, state);
    }
    println!("{}", "  Cyberdeck stopped.".green());
    ExitCode::SUCCESS
}

fn print_banner() {
    let banner = r#"
   ______      __              __          __
  / ____/_  __/ /_  ___  _____/ /__  _____/ /__
 / /   / / / / __ \/ _ \/ ___/ __  / _ \/ ___/ //_/
/ /___/ /_/ / /_/ /  __/ /  / /_/ /  __/ /__/ ,<
\____/\__, /_.___/\___/_/   \__,_/\___/\___/_/|_|
     /____/
"#;
    println!("{}", banner.bold().cyan());
    println!(
        "  {}  v{}",
        "Cyberdeck Hardware Supervisor".bold(),
        env!("CARGO_PKG_VERSION").dimmed()
    );
    println!();
}
