//! The Reader (spec.md §4.2): frames inbound bytes into stripped lines.
//!
//! Runs as a dedicated OS thread performing blocking, one-byte-at-a-time
//! reads and bridges into the async `rx` channel — the same bridging
//! idiom `core/src/backends/telnet.rs`'s reader thread uses
//! (`sender.blocking_send`), except here the channel is unbounded so a
//! plain synchronous `send` suffices.
//!
//! The thread owns a `try_clone()`d socket handle (re-cloned after every
//! reopen) rather than locking the shared socket for each read, matching
//! `core/src/backends/telnet.rs:230` — holding the shared lock across a
//! read that can block for up to [`crate::link::READ_TIMEOUT`] would
//! serialize the Writer's sends behind it.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::context::EngineContext;
use crate::link::LinkManager;
use crate::logging::TestLogger;

/// Runs the Reader loop until `run_flag` is cleared. Intended to be
/// spawned on a dedicated `std::thread`.
pub fn run_reader(
    link: Arc<LinkManager>,
    ctx: Arc<EngineContext>,
    logger: Arc<TestLogger>,
    rx_tx: UnboundedSender<String>,
    run_flag: Arc<AtomicBool>,
) {
    let mut accumulator = String::new();
    let mut stream = match link.try_clone_current() {
        Ok(stream) => stream,
        Err(_) => return,
    };

    while run_flag.load(Ordering::SeqCst) {
        let mut byte = [0u8; 1];
        let read_result = stream.read(&mut byte);

        match read_result {
            Ok(1) => {
                let b = byte[0];
                if b == b'\r' || b == b'\n' {
                    flush_line(&mut accumulator, &rx_tx);
                } else if b.is_ascii() {
                    accumulator.push(b as char);
                }
                // Non-ASCII bytes that fail to decode are silently dropped.
            }
            Ok(_) => {
                // Zero-byte read: socket closed (EOF).
                if run_flag.load(Ordering::SeqCst) {
                    link.reopen(&ctx, &logger);
                    accumulator.clear();
                    if let Ok(cloned) = link.try_clone_current() {
                        stream = cloned;
                    }
                }
            }
            Err(ref e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                // Synthesize an LF: forces a line flush without blocking,
                // so quiet-but-waiting prompts (e.g. "User:") still
                // produce a line to match against markers.
                flush_line(&mut accumulator, &rx_tx);
            }
            Err(_) => {
                if run_flag.load(Ordering::SeqCst) {
                    link.reopen(&ctx, &logger);
                    accumulator.clear();
                    if let Ok(cloned) = link.try_clone_current() {
                        stream = cloned;
                    }
                }
            }
        }
    }

    link.close();
}

fn flush_line(accumulator: &mut String, rx_tx: &UnboundedSender<String>) {
    let stripped = accumulator.trim();
    if !stripped.is_empty() {
        let _ = rx_tx.send(stripped.to_string());
    }
    accumulator.clear();
}
