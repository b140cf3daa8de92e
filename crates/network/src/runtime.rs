//! # Session Runtime
//!
//! Every session runs on two threads:
//!
//! - a **network thread** that owns the session and calls `poll` every
//!   `poll_interval` until the stop flag is set
//! - a **command-input thread** that blocks on a line reader and pushes each
//!   line into the session's [`CommandQueue`]
//!
//! The queue is the only state the two threads share besides the stop flag
//! and the output log.
//!
//! # Example
//!
//! ```rust
//! use netsession_network::{runtime, LoopbackNetwork, ServerSession, SessionConfig};
//!
//! let network = LoopbackNetwork::new();
//! let config = SessionConfig { port: 0, ..SessionConfig::default() };
//! let server = ServerSession::new(network.endpoint(), config).unwrap();
//!
//! let handle = runtime::start(server).unwrap();
//! handle.push_input("/quit");
//! handle.join().unwrap();
//! ```

use crate::output::OutputLog;
use netsession_commands::CommandQueue;
use netsession_core::{NetError, Result, SessionRole};
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// A pollable session that can be driven by [`start`]
pub trait Session: Send + 'static {
    fn role(&self) -> SessionRole;

    /// Called once on the network thread before the first poll
    fn start(&mut self) -> Result<()>;

    /// One iteration of the session loop
    fn poll(&mut self) -> Result<()>;

    /// Called once on the network thread after the loop ends
    fn shutdown(&mut self);

    fn command_queue(&self) -> CommandQueue;

    fn output_log(&self) -> OutputLog;

    fn stop_flag(&self) -> Arc<AtomicBool>;

    fn poll_interval(&self) -> Duration;
}

/// Handle to a running session
///
/// Dropping the handle stops the session and waits for its network thread.
pub struct SessionHandle {
    role: SessionRole,
    stop: Arc<AtomicBool>,
    queue: CommandQueue,
    output: OutputLog,
    network: Option<JoinHandle<Result<()>>>,
    input: Option<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn role(&self) -> SessionRole {
        self.role
    }

    /// Ask the session to stop
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Whether the network thread is still running
    pub fn is_running(&self) -> bool {
        self.network.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Queue a command line as if it had been typed
    pub fn push_input(&self, line: impl Into<String>) {
        self.queue.push(line);
    }

    pub fn output(&self) -> &OutputLog {
        &self.output
    }

    /// Wait for the network thread, then the input thread, to finish
    ///
    /// The input thread notices the stop flag only once its current read
    /// returns, so this blocks until the input source yields another line or
    /// is closed.
    ///
    /// # Returns
    /// The error that ended the session loop, if any
    pub fn join(mut self) -> Result<()> {
        let result = match self.network.take() {
            Some(handle) => handle
                .join()
                .unwrap_or_else(|_| Err(NetError::Consistency("Network thread panicked".into()))),
            None => Ok(()),
        };

        if let Some(input) = self.input.take() {
            if !input.is_finished() {
                debug!("Waiting for command input to return from its read");
            }
            if input.join().is_err() {
                warn!("Command input thread panicked");
            }
        }
        result
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.network.take() {
            if handle.join().is_err() {
                error!("Network thread panicked");
            }
        }
    }
}

/// Run `session` on its own network thread with no input thread
///
/// Commands can still be queued with [`SessionHandle::push_input`].
pub fn start<S: Session>(session: S) -> Result<SessionHandle> {
    spawn(session, None)
}

/// Run `session` on its own network thread, reading commands from `input`
pub fn start_with_input<S, R>(session: S, input: R) -> Result<SessionHandle>
where
    S: Session,
    R: BufRead + Send + 'static,
{
    spawn(session, Some(Box::new(input)))
}

fn spawn<S: Session>(session: S, input: Option<Box<dyn BufRead + Send>>) -> Result<SessionHandle> {
    let role = session.role();
    let stop = session.stop_flag();
    let queue = session.command_queue();
    let output = session.output_log();

    let network = thread::Builder::new()
        .name(format!("{}-network", role.as_str()))
        .spawn(move || run_network(session))?;

    let input = match input {
        Some(reader) => {
            let thread = thread::Builder::new()
                .name(format!("{}-input", role.as_str()))
                .spawn({
                    let queue = queue.clone();
                    let stop = stop.clone();
                    let output = output.clone();
                    move || run_input(reader, queue, stop, output)
                });
            match thread {
                Ok(handle) => Some(handle),
                Err(e) => {
                    stop.store(true, Ordering::Release);
                    if network.join().is_err() {
                        error!("Network thread panicked");
                    }
                    return Err(e.into());
                }
            }
        }
        None => None,
    };

    Ok(SessionHandle {
        role,
        stop,
        queue,
        output,
        network: Some(network),
        input,
    })
}

/// Network thread body: start, poll until stopped, shut down
fn run_network<S: Session>(mut session: S) -> Result<()> {
    let stop = session.stop_flag();
    let role = session.role();

    if let Err(e) = session.start() {
        error!("Failed to start {} session: {}", role.as_str(), e);
        stop.store(true, Ordering::Release);
        return Err(e);
    }
    info!("{} session started", role.as_str());

    let interval = session.poll_interval();
    let mut result = Ok(());
    while !stop.load(Ordering::Acquire) {
        if let Err(e) = session.poll() {
            if e.is_fatal() {
                error!("Stopping {} session: {}", role.as_str(), e);
                result = Err(e);
                break;
            }
            warn!("Poll failed: {}", e);
        }
        thread::sleep(interval);
    }

    stop.store(true, Ordering::Release);
    session.shutdown();
    info!("{} session stopped", role.as_str());
    result
}

/// Command-input thread body: forward lines until EOF, error or stop
fn run_input(mut reader: Box<dyn BufRead + Send>, queue: CommandQueue, stop: Arc<AtomicBool>, output: OutputLog) {
    let mut line = String::new();
    while !stop.load(Ordering::Acquire) {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => {
                debug!("Command input closed");
                break;
            }
            Ok(_) => queue.push(line.as_str()),
            Err(e) => {
                if !stop.load(Ordering::Acquire) {
                    debug!("Command input failed: {}", e);
                    output.error("Error: Failed to read command on stdin.");
                    stop.store(true, Ordering::Release);
                }
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClientSession, LoopbackNetwork, ServerSession, SessionConfig};
    use std::io::{self, Cursor, Read};
    use std::sync::mpsc;
    use std::time::Instant;

    fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    fn config() -> SessionConfig {
        SessionConfig {
            port: 0,
            poll_interval: Duration::from_millis(1),
            ..SessionConfig::default()
        }
    }

    /// Reader that fails on the first read
    struct BrokenInput;

    impl Read for BrokenInput {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "broken pipe"))
        }
    }

    #[test]
    fn test_input_lines_reach_session() {
        let network = LoopbackNetwork::new();
        let client = ClientSession::new(network.endpoint(), config()).unwrap();

        let input = Cursor::new("/online\n/quit\n");
        let handle = start_with_input(client, input).unwrap();
        assert!(wait_for(Duration::from_secs(5), || !handle.is_running()));

        let output = handle.output().clone();
        handle.join().unwrap();
        assert!(output.contains("Warning: Client is not connected to a server."));
        assert!(output.contains("Client stopped."));
    }

    #[test]
    fn test_input_error_stops_session() {
        let network = LoopbackNetwork::new();
        let server = ServerSession::new(network.endpoint(), config()).unwrap();

        let handle = start_with_input(server, io::BufReader::new(BrokenInput)).unwrap();
        assert!(wait_for(Duration::from_secs(5), || !handle.is_running()));

        let output = handle.output().clone();
        handle.join().unwrap();
        assert!(output.contains("Error: Failed to read command on stdin."));
        assert!(output.contains("Server Shutting down.."));
    }

    /// Reader that blocks until a chunk is sent; EOF once the sender is gone
    struct GatedInput(mpsc::Receiver<Vec<u8>>);

    impl Read for GatedInput {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.recv() {
                Ok(chunk) => {
                    let len = chunk.len().min(buf.len());
                    buf[..len].copy_from_slice(&chunk[..len]);
                    Ok(len)
                }
                Err(_) => Ok(0),
            }
        }
    }

    #[test]
    fn test_join_waits_for_blocked_input() {
        let network = LoopbackNetwork::new();
        let server = ServerSession::new(network.endpoint(), config()).unwrap();

        let (gate, lines) = mpsc::channel();
        let handle = start_with_input(server, io::BufReader::new(GatedInput(lines))).unwrap();
        handle.push_input("/quit");
        assert!(wait_for(Duration::from_secs(5), || !handle.is_running()));

        let (done_tx, done_rx) = mpsc::channel();
        let joiner = thread::spawn(move || done_tx.send(handle.join().is_ok()));
        assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());

        gate.send(b"ignored\n".to_vec()).unwrap();
        assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)), Ok(true));
        joiner.join().unwrap().unwrap();
    }

    #[test]
    fn test_stop_from_handle() {
        let network = LoopbackNetwork::new();
        let server = ServerSession::new(network.endpoint(), config()).unwrap();

        let handle = start(server).unwrap();
        assert_eq!(handle.role(), SessionRole::Server);
        assert!(wait_for(Duration::from_secs(5), || handle.output().contains("Server listening")));
        handle.stop();
        assert!(handle.join().is_ok());
    }

    #[test]
    fn test_start_failure_is_returned() {
        let network = LoopbackNetwork::new();
        let mut first = network.endpoint();
        let port = crate::Transport::listen(&mut first, 0).unwrap();

        let server = ServerSession::new(
            network.endpoint(),
            SessionConfig {
                port,
                ..config()
            },
        )
        .unwrap();
        let handle = start(server).unwrap();
        assert!(matches!(handle.join(), Err(NetError::Transport(_))));
    }
}
