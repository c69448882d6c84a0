//! Top-level orchestration: wires the Reader, Writer, watcher, timer,
//! and driver together and owns the shutdown sequence (spec.md §3
//! "Lifecycles", §9 design note on channel-closure shutdown).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::context::EngineContext;
use crate::description::TestDescription;
use crate::driver::run_driver;
use crate::errors::EngineError;
use crate::link::{LinkManager, LinkMode};
use crate::logging::TestLogger;
use crate::outcome::{DriverOutcome, Outcome};
use crate::reader::run_reader;
use crate::result::ResultSlot;
use crate::timer::{run_timer, MainTimer};
use crate::watcher::run_watcher;
use crate::writer::run_writer;

/// What a completed run produced: the decisive outcome plus whatever
/// `COUNT` modifiers accumulated (spec.md §6.2 "Final report").
///
/// `outcome` is always a named [`Outcome`] for logging/reporting
/// purposes; `exit_code` is usually just `outcome.exit_code()` but
/// overrides to [`crate::outcome::RESULT_DRAIN_FAILURE_EXIT_CODE`] in the
/// −99 case (spec.md §4.7/§7), which has no corresponding named outcome.
pub struct RunOutcome {
    pub outcome: Outcome,
    pub exit_code: i32,
    pub counters: HashMap<String, u64>,
}

/// This engine's build stamp, compared against a description's
/// `overwatcher revision required` (spec.md §3 SUPPLEMENT). A mismatch
/// is informational only — `original_source/fakeOverwatcher.py` compares
/// but never enforces it, so neither does this port.
pub const OVERWATCHER_REVISION: i64 = 20260729;

/// Runs one full test against `description`, over a connection dialed
/// (Client) or accepted (Listener) at `server:port`.
///
/// `shutdown` lets the caller (the CLI's `tokio::signal` handler) cut
/// the run short; an externally requested shutdown is reported as
/// [`Outcome::Failed`] after logging the interruption.
pub async fn run_engine(
    description: TestDescription,
    server: String,
    port: u16,
    mode: LinkMode,
    telnet: bool,
    shutdown: CancellationToken,
) -> Result<RunOutcome, EngineError> {
    if let Some(token) = description.unknown_sequence_tokens().into_iter().next() {
        return Err(EngineError::UnknownModifier(token));
    }

    let description = Arc::new(description);
    let logger = Arc::new(TestLogger::open(&description, true, false)?);

    if let Some(required) = description.required_revision() {
        if required != OVERWATCHER_REVISION {
            tracing::warn!(
                required,
                actual = OVERWATCHER_REVISION,
                "test description targets a different overwatcher revision"
            );
        }
    }

    let link = Arc::new(LinkManager::new(
        server,
        port,
        mode,
        telnet,
        description.options.sleep_sock_wait,
    ));
    link.open_initial(&logger)
        .map_err(|e| EngineError::FatalLink(e.to_string()))?;

    let ctx = Arc::new(EngineContext::new(&description.options, telnet));
    let active_markers = Arc::new(RwLock::new(description.markers.clone()));
    let timer = Arc::new(MainTimer::new());
    let (result, result_rx) = ResultSlot::new();
    let result = Arc::new(result);

    let (rx_tx, rx_rx) = mpsc::unbounded_channel::<String>();
    let (state_tx, state_rx) = mpsc::unbounded_channel::<String>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<String>();

    let run_flag = Arc::new(AtomicBool::new(true));

    let reader_handle = {
        let link = link.clone();
        let ctx = ctx.clone();
        let logger = logger.clone();
        let rx_tx = rx_tx.clone();
        let run_flag = run_flag.clone();
        std::thread::spawn(move || run_reader(link, ctx, logger, rx_tx, run_flag))
    };
    // The reader thread holds its own clone for its whole lifetime; this
    // one only exists so `rx_rx` closes once that thread exits.
    drop(rx_tx);

    let writer_handle = {
        let link = link.clone();
        let logger = logger.clone();
        let telnet_flag = telnet;
        let sendendr = description.options.sendendr;
        std::thread::spawn(move || run_writer(link, logger, telnet_flag, sendendr, cmd_rx))
    };

    let watcher_handle = tokio::spawn(run_watcher(
        description.clone(),
        active_markers.clone(),
        ctx.clone(),
        link.clone(),
        logger.clone(),
        rx_rx,
        state_tx.clone(),
        cmd_tx.clone(),
    ));

    let timer_handle = tokio::spawn(run_timer(
        timer.clone(),
        ctx.clone(),
        cmd_tx.clone(),
        result.clone(),
        logger.clone(),
        Duration::from_secs_f64(description.options.timeout),
        shutdown.clone(),
    ));

    let driver_outcome = tokio::select! {
        driver_outcome = run_driver(
            description.clone(),
            active_markers,
            ctx.clone(),
            link.clone(),
            logger.clone(),
            timer.clone(),
            result.clone(),
            cmd_tx.clone(),
            state_tx.clone(),
            state_rx,
            result_rx,
        ) => driver_outcome,
        _ = shutdown.cancelled() => {
            logger.log(&["INTERRUPTED"]);
            result.set(Outcome::Failed);
            DriverOutcome::Decided(Outcome::Failed)
        }
    };

    run_flag.store(false, Ordering::SeqCst);
    link.close();
    watcher_handle.abort();
    timer_handle.abort();
    drop(cmd_tx);
    let _ = reader_handle.join();
    let _ = writer_handle.join();

    // A drain failure has no named Outcome of its own; report it as
    // Failed while still surfacing its distinct −99 exit code.
    let outcome = match driver_outcome {
        DriverOutcome::Decided(outcome) => outcome,
        DriverOutcome::ResultDrainFailed => Outcome::Failed,
    };
    logger.log(&["RUN COMPLETE:", outcome.as_str()]);

    Ok(RunOutcome {
        outcome,
        exit_code: driver_outcome.exit_code(),
        counters: ctx.counters_snapshot(),
    })
}
