//! `fake-overwatcher`: the listener-mode counterpart to `overwatcher`
//! (spec.md §4.1's "fake" variant) — binds and waits for the device (or
//! a test harness standing in for one) to connect, rather than dialing
//! out. Everything past connection setup is identical, matching
//! `original_source/fakeOverwatcher.py`'s one-method override of its
//! parent class.

use overwatcher::cli::{parse_args, print_usage};
use overwatcher::setup::{init_tracing, setup_shutdown_signal};
use overwatcher_core::link::LinkMode;
use overwatcher_core::outcome::Outcome;
use tracing::{error, info};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("--version") => {
            println!("fake-overwatcher {VERSION}");
            return;
        }
        Some("--help") | None => {
            print_usage("fake-overwatcher");
            std::process::exit(if args.len() < 2 { 1 } else { 0 });
        }
        _ => {}
    }

    let parsed = match parse_args(&args[1..]) {
        Ok(parsed) => parsed,
        Err(message) => {
            eprintln!("error: {message}");
            print_usage("fake-overwatcher");
            std::process::exit(1);
        }
    };

    init_tracing();

    let mut description = match overwatcher_core::load(&parsed.description_path) {
        Ok(description) => description,
        Err(e) => {
            error!("failed to load test description: {e}");
            std::process::exit(Outcome::ConfigFailed.exit_code());
        }
    };
    if parsed.endr {
        description.options.sendendr = true;
    }

    let shutdown = setup_shutdown_signal();

    info!(
        "fake-overwatcher {} listening on {}:{}",
        VERSION, parsed.server, parsed.port
    );

    let run = overwatcher_core::run_engine(
        description,
        parsed.server,
        parsed.port,
        LinkMode::Listener,
        parsed.telnet,
        shutdown,
    )
    .await;

    match run {
        Ok(run_outcome) => {
            info!("result: {}", run_outcome.outcome);
            if !run_outcome.counters.is_empty() {
                info!("counters: {:?}", run_outcome.counters);
            }
            std::process::exit(run_outcome.exit_code);
        }
        Err(e) => {
            error!("run failed: {e}");
            std::process::exit(Outcome::ConfigFailed.exit_code());
        }
    }
}
