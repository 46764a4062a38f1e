//! The outer cooperative loop.
//!
//! The library never blocks; this module is the "external scheduler" that
//! re-invokes a suspended operation until it completes, sleeping one tick
//! between attempts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::Poll;
use std::thread;
use std::time::{Duration, Instant};

use zmtp_peer::PeerError;

use crate::exit::{peer_error, CliError, CliResult, FAILURE, INTERNAL, TIMEOUT};

pub const TICK: Duration = Duration::from_millis(2);

/// Why a driven operation did not complete.
#[derive(Debug)]
pub enum Stop {
    Peer(PeerError),
    Interrupted,
    TimedOut(Duration),
}

impl Stop {
    pub fn into_cli_error(self, context: &str) -> CliError {
        match self {
            Stop::Peer(err) => peer_error(context, err),
            Stop::Interrupted => CliError::new(FAILURE, format!("{context}: interrupted")),
            Stop::TimedOut(limit) => {
                CliError::new(TIMEOUT, format!("{context}: timed out after {limit:?}"))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    running: Arc<AtomicBool>,
    timeout: Option<Duration>,
    tick: Duration,
}

impl Scheduler {
    pub fn new(running: Arc<AtomicBool>, timeout: Option<Duration>) -> Self {
        Self {
            running,
            timeout,
            tick: TICK,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Poll `op` until it is ready, the timeout passes or Ctrl-C is pressed.
    pub fn run<T>(&self, mut op: impl FnMut() -> Poll<zmtp_peer::Result<T>>) -> Result<T, Stop> {
        let started = Instant::now();
        loop {
            match op() {
                Poll::Ready(Ok(value)) => return Ok(value),
                Poll::Ready(Err(err)) => return Err(Stop::Peer(err)),
                Poll::Pending => {}
            }
            if !self.is_running() {
                return Err(Stop::Interrupted);
            }
            if let Some(limit) = self.timeout {
                if started.elapsed() >= limit {
                    return Err(Stop::TimedOut(limit));
                }
            }
            thread::sleep(self.tick);
        }
    }
}

/// Flag cleared by Ctrl-C.
pub fn install_ctrlc_handler() -> CliResult<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        flag.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))?;
    Ok(running)
}
