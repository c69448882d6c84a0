//! The test driver (spec.md §4.5): walks the config and test sequences,
//! dispatching each token by the priority order user input → action →
//! modifier → state name.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tokio::sync::{watch, RwLock};

use crate::context::EngineContext;
use crate::description::TestDescription;
use crate::link::LinkManager;
use crate::logging::TestLogger;
use crate::modifiers::Modifier;
use crate::outcome::{DriverOutcome, Outcome};
use crate::result::ResultSlot;
use crate::timer::MainTimer;

/// Polling period used by the blocking "wait for prompt" helper
/// (spec.md §4.5, §3 "waitPrompt_enter/return").
const PROMPT_POLL_PERIOD: Duration = Duration::from_millis(200);

enum WalkFailure {
    Mismatch,
    AlreadyDecided(Outcome),
    ChannelClosed,
    /// The result cell's sender was dropped without ever recording an
    /// outcome — the −99 "failed result read" case (spec.md §4.7/§7).
    ResultDrainFailed,
}

#[allow(clippy::too_many_arguments)]
struct DriverHandles<'a> {
    description: &'a TestDescription,
    ctx: &'a EngineContext,
    link: &'a LinkManager,
    logger: &'a TestLogger,
    timer: &'a MainTimer,
    tx_tx: &'a UnboundedSender<String>,
    state_tx: &'a UnboundedSender<String>,
    state_rx: &'a mut UnboundedReceiver<String>,
    result_rx: &'a mut watch::Receiver<Option<Outcome>>,
    timeout_duration: Duration,
}

/// Runs the full driver lifecycle: config phase, then the test phase
/// (looped if `infiniteTest`), reporting the final [`Outcome`] through
/// `result`. Returns the outcome it decided (or observed already
/// decided by the timer).
#[allow(clippy::too_many_arguments)]
pub async fn run_driver(
    description: Arc<TestDescription>,
    active_markers: Arc<RwLock<Vec<(String, String)>>>,
    ctx: Arc<EngineContext>,
    link: Arc<LinkManager>,
    logger: Arc<TestLogger>,
    timer: Arc<MainTimer>,
    result: Arc<ResultSlot>,
    tx_tx: UnboundedSender<String>,
    state_tx: UnboundedSender<String>,
    mut state_rx: UnboundedReceiver<String>,
    mut result_rx: watch::Receiver<Option<Outcome>>,
) -> DriverOutcome {
    let timeout_duration = Duration::from_secs_f64(description.options.timeout);

    let mut handles = DriverHandles {
        description: description.as_ref(),
        ctx: ctx.as_ref(),
        link: link.as_ref(),
        logger: logger.as_ref(),
        timer: timer.as_ref(),
        tx_tx: &tx_tx,
        state_tx: &state_tx,
        state_rx: &mut state_rx,
        result_rx: &mut result_rx,
        timeout_duration,
    };

    logger.log(&["STARTED CONFIG!"]);
    *active_markers.write().await = description.config_markers();

    if !description.config_seq.is_empty() {
        match walk_sequence(&description.config_seq, &mut handles).await {
            Ok(()) => {}
            Err(WalkFailure::Mismatch) | Err(WalkFailure::ChannelClosed) => {
                return DriverOutcome::Decided(finish(&result, &logger, Outcome::ConfigFailed));
            }
            Err(WalkFailure::AlreadyDecided(outcome)) => {
                return DriverOutcome::Decided(finish(&result, &logger, outcome));
            }
            Err(WalkFailure::ResultDrainFailed) => {
                logger.log(&["RESULT DRAIN FAILED"]);
                return DriverOutcome::ResultDrainFailed;
            }
        }
    }
    logger.log(&["ENDED CONFIG!"]);

    // Stray states queued during the config walk (e.g. a marker that
    // matched twice before the driver advanced) don't leak into the
    // test phase's state stream.
    while handles.state_rx.try_recv().is_ok() {}

    *active_markers.write().await = description.markers.clone();
    timer.restart(timeout_duration);

    loop {
        match walk_sequence(&description.test_seq, &mut handles).await {
            Ok(()) => {
                if description.options.infinite_test {
                    ctx.increment_test_loop();
                    ctx.reset_test_timeouts(description.options.test_max_timeouts);
                    logger.log(&["TEST LOOP:", &ctx.test_loop().to_string()]);
                    continue;
                }
                timer.stop();
                return DriverOutcome::Decided(finish(&result, &logger, Outcome::Ok));
            }
            Err(WalkFailure::Mismatch) => {
                timer.stop();
                return DriverOutcome::Decided(finish(&result, &logger, Outcome::Failed));
            }
            Err(WalkFailure::ChannelClosed) => {
                return DriverOutcome::Decided(finish(&result, &logger, Outcome::Failed));
            }
            Err(WalkFailure::AlreadyDecided(outcome)) => {
                return DriverOutcome::Decided(finish(&result, &logger, outcome));
            }
            Err(WalkFailure::ResultDrainFailed) => {
                logger.log(&["RESULT DRAIN FAILED"]);
                return DriverOutcome::ResultDrainFailed;
            }
        }
    }
}

fn finish(result: &ResultSlot, logger: &TestLogger, outcome: Outcome) -> Outcome {
    logger.log(&["RESULT:", outcome.as_str()]);
    result.set(outcome);
    outcome
}

async fn walk_sequence(
    sequence: &[String],
    handles: &mut DriverHandles<'_>,
) -> Result<(), WalkFailure> {
    let mut index = 0;

    while index < sequence.len() {
        if let Some(outcome) = *handles.result_rx.borrow() {
            return Err(WalkFailure::AlreadyDecided(outcome));
        }

        let token = &sequence[index];

        if let Some(prompt) = handles.description.user_inp.get(token) {
            run_user_prompt(prompt, handles).await;
            index += 1;
            continue;
        }

        if let Some(commands) = handles.description.actions.get(token) {
            handles.logger.log(&["RUNNING ACTIONS:", token]);
            for command in commands {
                run_action_command(command, handles).await;
            }
            index += 1;
            continue;
        }

        if let Some(modifier) = Modifier::from_token(token) {
            handles.timer.stop();
            handles
                .ctx
                .apply_modifier(modifier, token, handles.logger, handles.link)
                .await;
            index += 1;
            handles.timer.restart(handles.timeout_duration);
            continue;
        }

        handles.logger.log(&["LOOKING FOR:", token]);
        tokio::select! {
            biased;
            changed = handles.result_rx.changed() => {
                if changed.is_err() {
                    // Sender dropped without ever recording an outcome.
                    return Err(WalkFailure::ResultDrainFailed);
                }
                match *handles.result_rx.borrow() {
                    Some(outcome) => return Err(WalkFailure::AlreadyDecided(outcome)),
                    None => return Err(WalkFailure::ResultDrainFailed),
                }
            }
            observed = handles.state_rx.recv() => {
                match observed {
                    None => return Err(WalkFailure::ChannelClosed),
                    Some(observed) => {
                        if handles.ctx.ignore_states() {
                            handles.logger.log(&["IGNORED STATE:", &observed]);
                            continue;
                        }
                        if observed == *token {
                            handles.logger.log(&["MOVED TO STATE=", token]);
                            index += 1;
                            handles.timer.restart(handles.timeout_duration);
                        } else {
                            let tolerated = handles
                                .description
                                .triggers
                                .get(&observed)
                                .map(|tokens| tokens.iter().any(|t| Modifier::from_token(t).is_some()))
                                .unwrap_or(false);
                            if tolerated {
                                handles.logger.log(&[
                                    "MISMATCH TOLERATED (modifier present):",
                                    &observed,
                                ]);
                            } else {
                                handles.logger.log(&[
                                    "FOUND=",
                                    &observed,
                                    ", BUT WAS LOOKING FOR:",
                                    token,
                                ]);
                                return Err(WalkFailure::Mismatch);
                            }
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

async fn run_action_command(command: &str, handles: &mut DriverHandles<'_>) {
    if let Some(modifier) = Modifier::from_token(command) {
        handles
            .ctx
            .apply_modifier(modifier, command, handles.logger, handles.link)
            .await;
        return;
    }
    if !handles.ctx.toss_coin() {
        return;
    }
    let _ = handles.tx_tx.send(command.to_string());
    wait_for_prompt(handles).await;
}

async fn run_user_prompt(prompt: &str, handles: &mut DriverHandles<'_>) {
    handles.timer.stop();
    handles.logger.log(&["\n\n\n", prompt, "\n\n\n"]);
    println!("EXECUTE ACTION AND PRESS ENTER");
    let _ = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)
    })
    .await;
    println!("\nCONTINUING\n");
    handles.timer.restart(handles.timeout_duration);
}

/// Blocks the action loop (not the whole driver — the watcher keeps
/// feeding `state` concurrently) until a prompt marker is observed, a
/// poll budget elapses, or `ignore_states` is set. Non-prompt states
/// observed while waiting are passed back onto `state` so the normal
/// step logic still sees them (spec.md §4.5).
async fn wait_for_prompt(handles: &mut DriverHandles<'_>) {
    if handles.ctx.ignore_states() {
        return;
    }

    let start = Instant::now();
    let mut iterations: u32 = 0;
    let mut nudged = false;

    loop {
        if handles.ctx.ignore_states() {
            return;
        }

        match handles.state_rx.try_recv() {
            Ok(observed) => {
                if handles.description.prompts.contains(&observed) {
                    if handles.ctx.time_cmd() {
                        handles.logger.log(&[
                            "PROMPT WAIT TOOK:",
                            &format!("{:?}", start.elapsed()),
                        ]);
                        handles.ctx.clear_time_cmd();
                    }
                    return;
                }
                let _ = handles.state_tx.send(observed);
            }
            Err(TryRecvError::Empty) => {
                iterations += 1;
                if !nudged && iterations >= handles.ctx.wait_prompt_enter {
                    let _ = handles.tx_tx.send(String::new());
                    nudged = true;
                }
                if iterations >= handles.ctx.wait_prompt_return {
                    if handles.ctx.time_cmd() {
                        handles.ctx.clear_time_cmd();
                    }
                    return;
                }
                tokio::time::sleep(PROMPT_POLL_PERIOD).await;
            }
            Err(TryRecvError::Disconnected) => return,
        }
    }
}
