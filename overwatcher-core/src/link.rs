//! The link manager (spec.md §4.1): opens, reopens, and tears down the
//! byte stream Reader and Writer share.
//!
//! Grounded in `core/src/backends/telnet.rs`'s connection lifecycle
//! (`Arc<Mutex<TcpStream>>` + `Arc<AtomicBool>` liveness). The Writer
//! re-locks the mutex for the duration of each write via [`with_socket`],
//! matching spec.md §3's invariant that a socket replacement on reconnect
//! is visible to it. The Reader instead takes its own `try_clone()`d
//! handle via [`try_clone_current`] and re-clones it after every
//! `reopen()`, the way `core/src/backends/telnet.rs:230` hands its reader
//! thread an owned handle — its read blocks for up to [`READ_TIMEOUT`],
//! and holding the shared lock for that long would serialize every write
//! behind it.
//!
//! [`with_socket`]: LinkManager::with_socket
//! [`try_clone_current`]: LinkManager::try_clone_current

use std::io;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::context::EngineContext;
use crate::description::SLEEP_SOCK_WAIT_GRACE_PERIOD_SECS;
use crate::errors::LinkError;
use crate::logging::TestLogger;

/// Read timeout set on every connected socket (spec.md §4.1). This is
/// also what makes the Reader's per-byte timeout-driven line flush work.
pub const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Delay between connect retries (spec.md §4.1).
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Client (dial out, spec.md §4.1) vs. Listener ("fake" variant: bind and
/// accept one connection) — the only behavioral difference between the
/// real and fake overwatcher, per spec.md §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    Client,
    Listener,
}

/// Owns the live socket shared by the Reader and Writer threads.
pub struct LinkManager {
    server: String,
    port: u16,
    mode: LinkMode,
    telnet: bool,
    sleep_sock_wait: f64,
    socket: Mutex<Option<TcpStream>>,
    listener: Mutex<Option<TcpListener>>,
    alive: AtomicBool,
    started_at: Instant,
}

impl LinkManager {
    pub fn new(server: String, port: u16, mode: LinkMode, telnet: bool, sleep_sock_wait: f64) -> Self {
        Self {
            server,
            port,
            mode,
            telnet,
            sleep_sock_wait,
            socket: Mutex::new(None),
            listener: Mutex::new(None),
            alive: AtomicBool::new(false),
            started_at: Instant::now(),
        }
    }

    /// Establishes the first connection. Only a failure to construct the
    /// socket itself (address resolution, bind) is fatal — connect
    /// retries loop forever (spec.md §4.1).
    pub fn open_initial(&self, logger: &TestLogger) -> Result<(), LinkError> {
        match self.mode {
            LinkMode::Client => {
                let addrs = format!("{}:{}", self.server, self.port);
                // Resolved lazily on every attempt via `ToSocketAddrs`
                // rather than parsed once into a `SocketAddr`, since
                // `server` is frequently a hostname (e.g. `localhost`),
                // not a literal IP.
                use std::net::ToSocketAddrs;
                if addrs.to_socket_addrs().is_err() {
                    return Err(LinkError::Construct(format!(
                        "could not resolve address: {addrs}"
                    )));
                }

                loop {
                    match TcpStream::connect(&addrs) {
                        Ok(stream) => {
                            stream.set_read_timeout(Some(READ_TIMEOUT)).ok();
                            *self.socket.lock().expect("socket mutex poisoned") = Some(stream);
                            self.alive.store(true, Ordering::SeqCst);
                            return Ok(());
                        }
                        Err(e) => {
                            logger.log(&["CONNECT FAILED, RETRYING:", &e.to_string()]);
                            std::thread::sleep(CONNECT_RETRY_DELAY);
                        }
                    }
                }
            }
            LinkMode::Listener => {
                let addrs = format!("{}:{}", self.server, self.port);
                let tcp_listener = TcpListener::bind(&addrs)
                    .map_err(|e| LinkError::Construct(format!("bind failed: {e}")))?;
                logger.log(&["WAITING FOR CLIENT ON", &addrs]);
                let (stream, _) = tcp_listener
                    .accept()
                    .map_err(|e| LinkError::Construct(format!("accept failed: {e}")))?;
                stream.set_read_timeout(Some(READ_TIMEOUT)).ok();
                *self.socket.lock().expect("socket mutex poisoned") = Some(stream);
                *self.listener.lock().expect("listener mutex poisoned") = Some(tcp_listener);
                self.alive.store(true, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    /// Reopens the connection after a fault. Applies the telnet
    /// reboot-aware reconnection policy (spec.md §4.1) when applicable.
    pub fn reopen(&self, ctx: &EngineContext, logger: &TestLogger) {
        self.alive.store(false, Ordering::SeqCst);

        let reboot_policy_applies = self.telnet
            && self.sleep_sock_wait > 0.0
            && self.started_at.elapsed().as_secs_f64() >= SLEEP_SOCK_WAIT_GRACE_PERIOD_SECS;

        if reboot_policy_applies {
            ctx.set_ignore_states(true, logger);
            ctx.set_run_triggers(false, logger);
            logger.log(&[
                "REBOOT-AWARE RECONNECT: SLEEPING",
                &format!("{}s", self.sleep_sock_wait),
            ]);
            std::thread::sleep(Duration::from_secs_f64(self.sleep_sock_wait));
        }

        match self.mode {
            LinkMode::Client => {
                let addrs = format!("{}:{}", self.server, self.port);
                loop {
                    match TcpStream::connect(&addrs) {
                        Ok(stream) => {
                            stream.set_read_timeout(Some(READ_TIMEOUT)).ok();
                            *self.socket.lock().expect("socket mutex poisoned") = Some(stream);
                            self.alive.store(true, Ordering::SeqCst);
                            break;
                        }
                        Err(e) => {
                            logger.log(&["RECONNECT FAILED, RETRYING:", &e.to_string()]);
                            std::thread::sleep(CONNECT_RETRY_DELAY);
                        }
                    }
                }
            }
            LinkMode::Listener => {
                let listener_guard = self.listener.lock().expect("listener mutex poisoned");
                if let Some(tcp_listener) = listener_guard.as_ref() {
                    match tcp_listener.accept() {
                        Ok((stream, _)) => {
                            stream.set_read_timeout(Some(READ_TIMEOUT)).ok();
                            *self.socket.lock().expect("socket mutex poisoned") = Some(stream);
                            self.alive.store(true, Ordering::SeqCst);
                        }
                        Err(e) => {
                            logger.log(&["ACCEPT FAILED ON REOPEN:", &e.to_string()]);
                        }
                    }
                }
            }
        }

        if reboot_policy_applies {
            ctx.set_ignore_states(false, logger);
            ctx.set_run_triggers(true, logger);
        }
    }

    /// Forces the current socket closed, e.g. so `IGNORE_STATES` on
    /// telnet (spec.md §4.6) makes the Reader notice a fault and reopen.
    pub fn force_close(&self) {
        if let Ok(guard) = self.socket.lock() {
            if let Some(stream) = guard.as_ref() {
                let _ = stream.shutdown(std::net::Shutdown::Both);
            }
        }
    }

    /// Runs `f` with exclusive access to the current socket. Returns
    /// `Err(NotConnected)` if no socket is installed yet.
    pub fn with_socket<R>(&self, f: impl FnOnce(&mut TcpStream) -> io::Result<R>) -> io::Result<R> {
        let mut guard = self.socket.lock().expect("socket mutex poisoned");
        match guard.as_mut() {
            Some(stream) => f(stream),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "link not open")),
        }
    }

    /// Clones the currently installed socket so a caller (the Reader) can
    /// read from its own handle instead of locking [`with_socket`] for
    /// every byte. Must be called again after every `reopen()`/`open_initial()`
    /// to pick up the replacement socket.
    pub fn try_clone_current(&self) -> io::Result<TcpStream> {
        let guard = self.socket.lock().expect("socket mutex poisoned");
        match guard.as_ref() {
            Some(stream) => stream.try_clone(),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "link not open")),
        }
    }

    /// Closes the socket exactly once, at Reader shutdown (spec.md §3
    /// "Lifecycles").
    pub fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        if let Ok(mut guard) = self.socket.lock() {
            if let Some(stream) = guard.take() {
                let _ = stream.shutdown(std::net::Shutdown::Both);
            }
        }
        if let Ok(mut guard) = self.listener.lock() {
            guard.take();
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub fn install_for_test(&self, stream: TcpStream) {
        stream.set_read_timeout(Some(READ_TIMEOUT)).ok();
        *self.socket.lock().unwrap() = Some(stream);
        self.alive.store(true, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub fn is_closed_for_test(&self) -> bool {
        let guard = self.socket.lock().unwrap();
        match guard.as_ref() {
            Some(stream) => {
                // A shutdown socket fails a zero-byte peek with an error
                // on some platforms and returns Ok(0) on others; either
                // is evidence the half-close landed.
                use std::io::Read;
                let mut buf = [0u8; 1];
                stream.set_nonblocking(true).ok();
                let result = stream.try_clone().unwrap().read(&mut buf);
                stream.set_nonblocking(false).ok();
                !matches!(result, Err(ref e) if e.kind() == io::ErrorKind::WouldBlock)
            }
            None => true,
        }
    }
}
