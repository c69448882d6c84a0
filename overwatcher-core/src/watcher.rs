//! The state watcher (spec.md §4.4): turns framed lines into state
//! observations and fires triggers.
//!
//! Runs as a tokio task. The active marker table is behind an `RwLock`
//! because the driver swaps it wholesale between the config phase and
//! the test phase (spec.md §3); everything else here is read-only for
//! the lifetime of a run.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;

use crate::context::EngineContext;
use crate::description::TestDescription;
use crate::link::LinkManager;
use crate::logging::TestLogger;
use crate::modifiers::Modifier;

/// Runs the watcher loop until `rx_rx` closes.
///
/// Every marker in the active table is checked against every line (no
/// short-circuit on first match, matching how multiple independent
/// markers can legitimately co-occur in one line of device output).
#[allow(clippy::too_many_arguments)]
pub async fn run_watcher(
    description: Arc<TestDescription>,
    active_markers: Arc<RwLock<Vec<(String, String)>>>,
    ctx: Arc<EngineContext>,
    link: Arc<LinkManager>,
    logger: Arc<TestLogger>,
    mut rx_rx: UnboundedReceiver<String>,
    state_tx: UnboundedSender<String>,
    tx_tx: UnboundedSender<String>,
) {
    while let Some(line) = rx_rx.recv().await {
        let table = active_markers.read().await;
        for (marker, state) in table.iter() {
            if !marker_matches(marker, state, &line, &description.prompts) {
                continue;
            }

            logger.log(&["FOUND", state, "IN:", &line]);

            let tokens = description.triggers.get(state);

            // Critical modifiers (WATCH_STATES, TRIGGER_START) run even
            // when triggers are currently disabled (spec.md §4.4) —
            // they gate the mechanism that disabled them in the first
            // place, so they must not be silenced by it.
            if let Some(tokens) = tokens {
                for token in tokens {
                    if let Some(modifier) = Modifier::from_token(token) {
                        if modifier.is_critical() {
                            ctx.apply_modifier(modifier, state, &logger, &link).await;
                        }
                    }
                }
            }

            let _ = state_tx.send(state.clone());

            if ctx.run_triggers() {
                if let Some(tokens) = tokens {
                    for token in tokens {
                        match Modifier::from_token(token) {
                            Some(modifier) if modifier.is_critical() => {
                                // Already applied above.
                            }
                            Some(modifier) => {
                                ctx.apply_modifier(modifier, state, &logger, &link).await;
                            }
                            None => {
                                let _ = tx_tx.send(token.clone());
                            }
                        }
                    }
                }
            }
        }
    }
}

/// A prompt marker matches only when the line ends with it — equivalent
/// to "splitting the line on the marker leaves an empty trailing
/// segment" (spec.md §4.4), which rules out matching a command echo
/// that merely contains the prompt text mid-line. Non-prompt markers
/// match anywhere in the line.
fn marker_matches(marker: &str, state: &str, line: &str, prompts: &HashSet<String>) -> bool {
    if marker.is_empty() {
        return false;
    }
    if prompts.contains(state) {
        line.ends_with(marker)
    } else {
        line.contains(marker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn description_with(
        markers: Vec<(String, String)>,
        prompts: HashSet<String>,
        triggers: HashMap<String, Vec<String>>,
    ) -> Arc<TestDescription> {
        let mut fixture = crate::description::load_test_fixture();
        fixture.markers = markers;
        fixture.prompts = prompts;
        fixture.triggers = triggers;
        Arc::new(fixture)
    }

    #[test]
    fn prompt_marker_requires_trailing_match() {
        let mut prompts = HashSet::new();
        prompts.insert("LOGIN".to_string());
        assert!(marker_matches("login:", "LOGIN", "login:", &prompts));
        assert!(!marker_matches("login:", "LOGIN", "login: admin", &prompts));
    }

    #[test]
    fn non_prompt_marker_matches_anywhere() {
        let prompts = HashSet::new();
        assert!(marker_matches("BOOT OK", "BOOTED", "system BOOT OK now", &prompts));
    }

    #[tokio::test]
    async fn matching_line_enqueues_state_and_runs_non_critical_trigger() {
        let mut triggers = HashMap::new();
        triggers.insert("READY".to_string(), vec!["echo hi".to_string()]);
        let description = description_with(
            vec![("ready>".to_string(), "READY".to_string())],
            HashSet::new(),
            triggers,
        );

        let active_markers = Arc::new(RwLock::new(description.markers.clone()));
        let ctx = Arc::new(EngineContext::new(&description.options, false));
        let link = Arc::new(LinkManager::new(
            "127.0.0.1".into(),
            0,
            crate::link::LinkMode::Client,
            false,
            0.0,
        ));
        let logger = Arc::new(
            TestLogger::open(&description, true, false).unwrap(),
        );

        let (rx_tx, rx_rx) = tokio::sync::mpsc::unbounded_channel();
        let (state_tx, mut state_rx) = tokio::sync::mpsc::unbounded_channel();
        let (cmd_tx, mut cmd_rx) = tokio::sync::mpsc::unbounded_channel();

        let handle = tokio::spawn(run_watcher(
            description.clone(),
            active_markers,
            ctx,
            link,
            logger,
            rx_rx,
            state_tx,
            cmd_tx,
        ));

        rx_tx.send("ready>".to_string()).unwrap();
        let observed = state_rx.recv().await.unwrap();
        assert_eq!(observed, "READY");
        let command = cmd_rx.recv().await.unwrap();
        assert_eq!(command, "echo hi");

        drop(rx_tx);
        handle.await.unwrap();

        let path = format!(
            "{}_testresults.log",
            description.name.clone().unwrap()
        );
        std::fs::remove_file(&path).ok();
    }

    /// Testable property #3 (spec.md §8): a critical modifier
    /// (`WATCH_STATES`) runs ahead of the `run_triggers` gate, clearing
    /// `ignore_states` even though it was set before the line arrived —
    /// and the remainder of the trigger list still runs afterward.
    #[tokio::test]
    async fn critical_modifier_clears_flag_then_runs_remainder() {
        let mut triggers = HashMap::new();
        triggers.insert(
            "S".to_string(),
            vec!["WATCH_STATES".to_string(), "cmd1".to_string()],
        );
        let description = description_with(
            vec![("s-marker".to_string(), "S".to_string())],
            HashSet::new(),
            triggers,
        );

        let active_markers = Arc::new(RwLock::new(description.markers.clone()));
        let ctx = Arc::new(EngineContext::new(&description.options, false));
        let logger = Arc::new(TestLogger::open(&description, true, false).unwrap());

        // Set up the precondition the review asks for: states are being
        // ignored before "S" is observed.
        ctx.set_ignore_states(true, &logger);
        assert!(ctx.ignore_states());

        let link = Arc::new(LinkManager::new(
            "127.0.0.1".into(),
            0,
            crate::link::LinkMode::Client,
            false,
            0.0,
        ));

        let (rx_tx, rx_rx) = tokio::sync::mpsc::unbounded_channel();
        let (state_tx, mut state_rx) = tokio::sync::mpsc::unbounded_channel();
        let (cmd_tx, mut cmd_rx) = tokio::sync::mpsc::unbounded_channel();

        let handle = tokio::spawn(run_watcher(
            description.clone(),
            active_markers,
            ctx.clone(),
            link,
            logger,
            rx_rx,
            state_tx,
            cmd_tx,
        ));

        rx_tx.send("s-marker".to_string()).unwrap();
        let observed = state_rx.recv().await.unwrap();
        assert_eq!(observed, "S");

        // The remainder of the trigger list (cmd1) still runs, dispatched
        // after the critical modifier clears the flag.
        let command = cmd_rx.recv().await.unwrap();
        assert_eq!(command, "cmd1");
        assert!(!ctx.ignore_states());

        drop(rx_tx);
        handle.await.unwrap();

        let path = format!(
            "{}_testresults.log",
            description.name.clone().unwrap()
        );
        std::fs::remove_file(&path).ok();
    }
}
