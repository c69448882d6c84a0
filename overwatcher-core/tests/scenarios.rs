//! End-to-end scenarios from spec.md §8, driven against real loopback
//! TCP "devices" rather than mocked collaborators. Scenario A (trivial
//! pass) lives as a unit test inside `engine.rs`; Scenario D (reboot-aware
//! reconnect) is covered at the unit level in `link.rs` since driving it
//! for real would mean blocking a test for 30+ seconds.

use std::collections::{HashMap, HashSet};
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;

use overwatcher_core::description::{Options, TestDescription};
use overwatcher_core::link::LinkMode;
use overwatcher_core::outcome::Outcome;
use overwatcher_core::run_engine;
use tokio_util::sync::CancellationToken;

fn base_description(name: &str) -> TestDescription {
    TestDescription {
        name: Some(name.to_string()),
        full_name: Some(name.to_string()),
        info: serde_yaml::Mapping::new(),
        markers: Vec::new(),
        markers_cfg: Vec::new(),
        prompts: HashSet::new(),
        triggers: HashMap::new(),
        actions: HashMap::new(),
        user_inp: HashMap::new(),
        config_seq: Vec::new(),
        test_seq: Vec::new(),
        options: Options::default(),
    }
}

fn cleanup(description: &TestDescription) {
    let path = format!("{}_testresults.log", description.name.clone().unwrap());
    std::fs::remove_file(&path).ok();
}

/// Reads one frame the way the engine's own Reader does: a run of bytes
/// up to a `\r` or `\n`, with stray empty runs (a lone trailing `\n`
/// after a `\r`-terminated frame) swallowed. Telnet-mode commands are
/// `\r`-terminated with no `\n`, so `BufRead::read_line` can't see them.
fn read_frame(stream: &mut std::net::TcpStream) -> String {
    use std::io::Read;
    let mut byte = [0u8; 1];
    let mut line = String::new();
    loop {
        match stream.read(&mut byte) {
            Ok(0) => break,
            Ok(_) => {
                let b = byte[0];
                if b == b'\r' || b == b'\n' {
                    if line.is_empty() {
                        continue;
                    }
                    break;
                }
                line.push(b as char);
            }
            Err(_) => break,
        }
    }
    line
}

/// Scenario B (spec.md §8): an action sends a device command and the
/// driver waits for the shell prompt before advancing to the next step.
///
/// The scenario's illustrative two-line device script only covers the
/// prompt that `wait_for_prompt` consumes; the following `SHELL` step in
/// `test_seq` still needs its own, later marker line to match against, so
/// the device emits a third `#` line. `wait_for_prompt`'s literal
/// algorithm (spec.md §4.5) treats any observed prompt state as the
/// signal to stop waiting — it does not also satisfy a subsequent
/// state-name step, which is why the extra emission is needed here and
/// is not a loosening of the scenario.
#[tokio::test]
async fn scenario_b_action_then_prompt() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let device = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        stream.write_all(b"init#\r\n").unwrap();

        let command = read_frame(&mut stream);
        assert_eq!(command, "echo hi");

        stream.write_all(b"echo hi ok#\r\n").unwrap();
        stream.write_all(b"final#\r\n").unwrap();

        let mut reader = BufReader::new(stream);
        let mut tail = String::new();
        let _ = reader.read_line(&mut tail);
    });

    let mut description = base_description("scenario-b");
    description.markers = vec![("#".to_string(), "SHELL".to_string())];
    description.prompts = HashSet::from(["SHELL".to_string()]);
    description.actions = HashMap::from([("DO".to_string(), vec!["echo hi".to_string()])]);
    description.test_seq = vec!["SHELL".to_string(), "DO".to_string(), "SHELL".to_string()];
    description.options.timeout = 5.0;

    let shutdown = CancellationToken::new();
    let result = run_engine(
        description.clone(),
        addr.ip().to_string(),
        addr.port(),
        LinkMode::Client,
        true,
        shutdown,
    )
    .await
    .unwrap();

    assert_eq!(result.outcome, Outcome::Ok);
    device.join().unwrap();
    cleanup(&description);
}

/// Scenario C (spec.md §8): the device emits a state with no tolerant
/// modifier trigger while the driver is still waiting for a different
/// one, so the run fails immediately rather than timing out.
#[tokio::test]
async fn scenario_c_mismatch_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let device = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        stream.write_all(b"line-A\r\n").unwrap();
        stream.write_all(b"line-B\r\n").unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut tail = String::new();
        let _ = reader.read_line(&mut tail);
    });

    let mut description = base_description("scenario-c");
    description.markers = vec![
        ("A".to_string(), "SA".to_string()),
        ("B".to_string(), "SB".to_string()),
    ];
    description.test_seq = vec!["SA".to_string(), "SA".to_string()];
    description.options.timeout = 5.0;

    let shutdown = CancellationToken::new();
    let result = run_engine(
        description.clone(),
        addr.ip().to_string(),
        addr.port(),
        LinkMode::Client,
        true,
        shutdown,
    )
    .await
    .unwrap();

    assert_eq!(result.outcome, Outcome::Failed);
    assert_eq!(result.outcome.exit_code(), 1);
    device.join().unwrap();
    cleanup(&description);
}

/// Scenario E (spec.md §8): with `timeout=1.0` and `test_max_timeouts=1`,
/// a silent device costs the run two timer fires (the first tolerated,
/// the second exhausting the budget) before the outcome is recorded as
/// [`Outcome::Timeout`] — testable property #4.
#[tokio::test]
async fn scenario_e_timeout_with_budget() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let device = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream);
        let mut tail = String::new();
        let _ = reader.read_line(&mut tail);
    });

    let mut description = base_description("scenario-e");
    description.markers = vec![("never-seen".to_string(), "NEVER".to_string())];
    description.test_seq = vec!["NEVER".to_string()];
    description.options.timeout = 1.0;
    description.options.test_max_timeouts = 1;

    let started = std::time::Instant::now();
    let shutdown = CancellationToken::new();
    let result = run_engine(
        description.clone(),
        addr.ip().to_string(),
        addr.port(),
        LinkMode::Client,
        true,
        shutdown,
    )
    .await
    .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(result.outcome, Outcome::Timeout);
    assert_eq!(result.outcome.exit_code(), 2);
    assert!(elapsed >= std::time::Duration::from_secs(2), "elapsed was {elapsed:?}");
    device.join().unwrap();
    cleanup(&description);
}

/// Scenario F (spec.md §8): a `COUNT` trigger tallies five occurrences
/// of the same state before the run completes normally.
#[tokio::test]
async fn scenario_f_counter_modifier() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let device = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        for _ in 0..5 {
            stream.write_all(b"tick\n").unwrap();
        }
        stream.write_all(b"done\n").unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut tail = String::new();
        let _ = reader.read_line(&mut tail);
    });

    let mut description = base_description("scenario-f");
    description.markers = vec![
        ("tick".to_string(), "TICK".to_string()),
        ("done".to_string(), "DONE".to_string()),
    ];
    description.triggers = HashMap::from([("TICK".to_string(), vec!["COUNT".to_string()])]);
    description.test_seq = vec![
        "TICK".to_string(),
        "TICK".to_string(),
        "TICK".to_string(),
        "TICK".to_string(),
        "TICK".to_string(),
        "DONE".to_string(),
    ];
    description.options.timeout = 5.0;

    let shutdown = CancellationToken::new();
    let result = run_engine(
        description.clone(),
        addr.ip().to_string(),
        addr.port(),
        LinkMode::Client,
        false,
        shutdown,
    )
    .await
    .unwrap();

    assert_eq!(result.outcome, Outcome::Ok);
    assert_eq!(result.counters.get("TICK"), Some(&5));
    device.join().unwrap();
    cleanup(&description);
}
