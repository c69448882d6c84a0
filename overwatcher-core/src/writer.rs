//! The Writer (spec.md §4.3): serializes outbound commands onto the link.
//!
//! Runs as a dedicated OS thread, blocking on the `tx` channel. Per
//! spec.md §9, there is no sentinel value for shutdown: the loop ends
//! when the channel closes (`recv()` returns `None`), matching the
//! channel-closure idiom used throughout this engine instead of the
//! Python original's `None`-sentinel convention.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::link::LinkManager;
use crate::logging::TestLogger;

/// Commands whose *pre-terminator* length exceeds this are split in two
/// writes with a pause in between (spec.md §4.3, testable property #6:
/// "a 46-character command (before terminator) is split... a 45-character
/// command is sent in one write"). The terminator itself never counts
/// toward the threshold, even though it rides along in whichever write
/// it lands in.
const CHUNK_THRESHOLD: usize = 45;
const CHUNK_HEAD: usize = 40;
const CHUNK_PAUSE: Duration = Duration::from_millis(500);
const SEND_RETRY_DELAY: Duration = Duration::from_millis(500);
const INTER_COMMAND_GAP: Duration = Duration::from_millis(400);

/// Runs the Writer loop until `tx_rx` closes. Intended to be spawned on
/// a dedicated `std::thread`.
pub fn run_writer(
    link: Arc<LinkManager>,
    logger: Arc<TestLogger>,
    telnet: bool,
    sendendr: bool,
    mut tx_rx: UnboundedReceiver<String>,
) {
    while let Some(command) = tx_rx.blocking_recv() {
        let payload = build_payload(&command, telnet, sendendr);
        let should_chunk = command.chars().count() > CHUNK_THRESHOLD;
        send_with_retry(&link, &logger, &payload, should_chunk);
        std::thread::sleep(INTER_COMMAND_GAP);
    }
}

/// Builds the bytes actually written to the socket. A one-character
/// command is sent raw, unmodified — this covers single-key Y/N prompt
/// answers and (once a terminator is appended below) the "send a bare
/// line ending" idiom used to nudge a device waiting on input, since an
/// empty command always falls through to the terminator-appending arm.
fn build_payload(command: &str, telnet: bool, sendendr: bool) -> Vec<u8> {
    if command.chars().count() == 1 {
        return command.as_bytes().to_vec();
    }

    let mut payload = command.to_string();
    if telnet {
        payload.push('\r');
    } else if sendendr {
        payload.push_str("\r\n");
    } else {
        payload.push('\n');
    }
    payload.into_bytes()
}

fn send_with_retry(link: &LinkManager, logger: &TestLogger, payload: &[u8], should_chunk: bool) {
    loop {
        let attempt = link.with_socket(|stream| {
            if should_chunk {
                let head = payload.len().min(CHUNK_HEAD);
                stream.write_all(&payload[..head])?;
                stream.flush()?;
                std::thread::sleep(CHUNK_PAUSE);
                stream.write_all(&payload[head..])?;
            } else {
                stream.write_all(payload)?;
            }
            stream.flush()
        });

        match attempt {
            Ok(()) => return,
            Err(e) => {
                logger.log(&["SEND FAILED, RETRYING:", &e.to_string()]);
                std::thread::sleep(SEND_RETRY_DELAY);
            }
        }
    }
}
