//! The shared, mutable runtime state (spec.md §3 "Runtime state", §5
//! "Shared writable cells").
//!
//! Per spec.md §9's design note, the boolean flag cells that the Python
//! original stores as loose instance attributes are gathered into one
//! context struct owned by the engine; the watcher and driver each hold a
//! reference. The flags are single-word set-to-constant, so atomics with
//! relaxed-enough (we use `SeqCst` throughout for simplicity, matching
//! `core/src/backends/telnet.rs`'s `AtomicBool` usage) ordering suffice —
//! there is no multi-field invariant across them that would need a mutex.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;

use rand::Rng;

use crate::description::Options;
use crate::link::LinkManager;
use crate::logging::TestLogger;
use crate::modifiers::Modifier;

/// Engine-wide mutable state shared between the watcher and driver tasks.
pub struct EngineContext {
    ignore_states: AtomicBool,
    run_triggers: AtomicBool,
    random_exec: AtomicBool,
    time_cmd: AtomicBool,

    counters: Mutex<HashMap<String, u64>>,
    test_loop: AtomicU64,
    test_timeouts: AtomicI64,

    pub telnet: bool,
    pub sendendr: bool,
    pub sleep_min: f64,
    pub sleep_max: f64,
    pub wait_prompt_enter: u32,
    pub wait_prompt_return: u32,
    pub sleep_sock_wait: f64,
}

impl EngineContext {
    pub fn new(options: &Options, telnet: bool) -> Self {
        Self {
            ignore_states: AtomicBool::new(false),
            run_triggers: AtomicBool::new(true),
            random_exec: AtomicBool::new(false),
            time_cmd: AtomicBool::new(false),
            counters: Mutex::new(HashMap::new()),
            test_loop: AtomicU64::new(1),
            test_timeouts: AtomicI64::new(options.test_max_timeouts as i64),
            telnet,
            sendendr: options.sendendr,
            sleep_min: options.sleep_min,
            sleep_max: options.sleep_max,
            wait_prompt_enter: options.wait_prompt_enter,
            wait_prompt_return: options.wait_prompt_return,
            sleep_sock_wait: options.sleep_sock_wait,
        }
    }

    pub fn ignore_states(&self) -> bool {
        self.ignore_states.load(Ordering::SeqCst)
    }

    pub fn run_triggers(&self) -> bool {
        self.run_triggers.load(Ordering::SeqCst)
    }

    pub fn random_exec(&self) -> bool {
        self.random_exec.load(Ordering::SeqCst)
    }

    pub fn time_cmd(&self) -> bool {
        self.time_cmd.load(Ordering::SeqCst)
    }

    pub fn clear_time_cmd(&self) {
        self.time_cmd.store(false, Ordering::SeqCst);
    }

    pub fn test_loop(&self) -> u64 {
        self.test_loop.load(Ordering::SeqCst)
    }

    pub fn increment_test_loop(&self) {
        self.test_loop.fetch_add(1, Ordering::SeqCst);
    }

    pub fn test_timeouts(&self) -> i64 {
        self.test_timeouts.load(Ordering::SeqCst)
    }

    pub fn reset_test_timeouts(&self, budget: u32) {
        self.test_timeouts.store(budget as i64, Ordering::SeqCst);
    }

    /// Decrements the soft-timeout budget, returning the value *after*
    /// the decrement. Spec.md §4.7: "if `test_timeouts > 0`, decrement...".
    pub fn decrement_test_timeouts(&self) -> i64 {
        self.test_timeouts.fetch_sub(1, Ordering::SeqCst) - 1
    }

    pub fn counters_snapshot(&self) -> HashMap<String, u64> {
        self.counters.lock().expect("counters mutex poisoned").clone()
    }

    pub(crate) fn set_ignore_states(&self, value: bool, logger: &TestLogger) {
        let previous = self.ignore_states.swap(value, Ordering::SeqCst);
        if previous == value {
            return;
        }
        if value {
            logger.log(&["IGNORING STATES"]);
        } else {
            logger.log(&["WATCHING STATES"]);
        }
    }

    pub(crate) fn set_run_triggers(&self, value: bool, logger: &TestLogger) {
        let previous = self.run_triggers.swap(value, Ordering::SeqCst);
        if previous == value {
            return;
        }
        if value {
            logger.log(&["ENABLING TRIGGERS"]);
        } else {
            logger.log(&["DISABLING TRIGGERS"]);
        }
    }

    /// Applies a modifier's side effect (spec.md §4.6). `state` is the
    /// state name the modifier fired under (unused by most variants).
    pub async fn apply_modifier(
        &self,
        modifier: Modifier,
        state: &str,
        logger: &TestLogger,
        link: &LinkManager,
    ) {
        match modifier {
            Modifier::IgnoreStates => {
                self.set_ignore_states(true, logger);
                if self.telnet {
                    link.force_close();
                }
            }
            Modifier::WatchStates => {
                self.set_ignore_states(false, logger);
            }
            Modifier::TriggerStart => {
                self.set_run_triggers(true, logger);
            }
            Modifier::TriggerStop => {
                self.set_run_triggers(false, logger);
            }
            Modifier::SleepRandom => {
                let seconds = {
                    let mut rng = rand::thread_rng();
                    rng.gen_range(self.sleep_min..=self.sleep_max)
                };
                logger.log(&["SLEEP_RANDOM", &format!("{seconds:.2}s")]);
                tokio::time::sleep(std::time::Duration::from_secs_f64(seconds)).await;
            }
            Modifier::RandomStart => {
                self.random_exec.store(true, Ordering::SeqCst);
                logger.log(&["RANDOM EXEC ENABLED"]);
            }
            Modifier::RandomStop => {
                self.random_exec.store(false, Ordering::SeqCst);
                logger.log(&["RANDOM EXEC DISABLED"]);
            }
            Modifier::Count => {
                let snapshot = {
                    let mut counters = self.counters.lock().expect("counters mutex poisoned");
                    *counters.entry(state.to_string()).or_insert(0) += 1;
                    counters.clone()
                };
                logger.log(&["COUNTERS", &format!("{snapshot:?}")]);
            }
            Modifier::TimeCmd => {
                self.time_cmd.store(true, Ordering::SeqCst);
            }
        }
    }

    /// Returns `true` if `tossCoin` should execute the command: always
    /// true when random execution is off, otherwise a 50/50 coin flip
    /// (spec.md §4.5 "Random execution").
    pub fn toss_coin(&self) -> bool {
        if !self.random_exec() {
            return true;
        }
        rand::thread_rng().gen_bool(0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::Options;
    use crate::link::{LinkManager, LinkMode};

    fn ctx() -> EngineContext {
        EngineContext::new(&Options::default(), false)
    }

    #[test]
    fn defaults_match_spec() {
        let ctx = ctx();
        assert!(!ctx.ignore_states());
        assert!(ctx.run_triggers());
        assert!(!ctx.random_exec());
        assert!(!ctx.time_cmd());
        assert_eq!(ctx.test_loop(), 1);
        assert_eq!(ctx.test_timeouts(), 2);
    }

    #[test]
    fn toss_coin_always_true_when_random_exec_off() {
        let ctx = ctx();
        for _ in 0..50 {
            assert!(ctx.toss_coin());
        }
    }

    #[test]
    fn toss_coin_gates_roughly_half_when_random_exec_on() {
        let ctx = ctx();
        ctx.random_exec.store(true, Ordering::SeqCst);
        let trials = 10_000;
        let sent = (0..trials).filter(|_| ctx.toss_coin()).count();
        let fraction = sent as f64 / trials as f64;
        assert!((fraction - 0.5).abs() < 0.05, "fraction was {fraction}");
    }

    #[test]
    fn decrement_test_timeouts_counts_down() {
        let ctx = ctx();
        assert_eq!(ctx.decrement_test_timeouts(), 1);
        assert_eq!(ctx.decrement_test_timeouts(), 0);
        assert_eq!(ctx.decrement_test_timeouts(), -1);
    }

    #[tokio::test]
    async fn trigger_start_is_idempotent_and_silent() {
        let ctx = ctx();
        let description = crate::description::load_test_fixture();
        let logger = TestLogger::open(&description, true, false).unwrap();
        let link = LinkManager::new("127.0.0.1".into(), 0, LinkMode::Client, false, 0.0);

        // Already true by default: applying again must not flip/log.
        ctx.apply_modifier(Modifier::TriggerStart, "S", &logger, &link)
            .await;
        assert!(ctx.run_triggers());
        let path = format!(
            "{}_testresults.log",
            description.name.clone().unwrap()
        );
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn ignore_states_on_telnet_closes_socket() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let _server_side = listener.accept().unwrap();

        let link = LinkManager::new("127.0.0.1".into(), addr.port(), LinkMode::Client, true, 0.0);
        link.install_for_test(client);

        let ctx = EngineContext::new(&Options::default(), true);
        let description = crate::description::load_test_fixture();
        let logger = TestLogger::open(&description, true, false).unwrap();

        ctx.apply_modifier(Modifier::IgnoreStates, "S", &logger, &link)
            .await;
        assert!(ctx.ignore_states());
        assert!(link.is_closed_for_test());

        let path = format!(
            "{}_testresults.log",
            description.name.clone().unwrap()
        );
        std::fs::remove_file(&path).ok();
    }
}
