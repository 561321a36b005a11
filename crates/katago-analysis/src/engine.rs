//! KataGo analysis-engine process wrapper.
//!
//! An [`EngineProcess`] owns one `katago analysis` subprocess. Two listener
//! threads drain its output: stdout lines (protocol responses) are forwarded
//! over a channel, stderr lines (diagnostics) go to the log. Requests are
//! written synchronously and at most one query is in flight at a time.

use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::protocol::{
    parse_response, EvaluationResult, PositionSetup, Query, QueryId, Response,
};

/// Poll interval while waiting for a process to exit.
const EXIT_POLL: Duration = Duration::from_millis(10);

/// Errors that can occur when working with an analysis engine process.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The process could not be launched or exited right after launch.
    #[error("Failed to start engine {executable}: {reason}")]
    ProcessStartFailure { executable: String, reason: String },
    /// No matching response arrived before the deadline.
    #[error("Query {query} timed out after {after:?}")]
    Timeout { query: QueryId, after: Duration },
    /// The engine sent something that is not a valid answer to the query.
    #[error("Malformed engine response: {0}")]
    MalformedResponse(String),
    /// The process is gone.
    #[error("Engine crashed: {0}")]
    EngineCrashed(String),
    /// The query could not be encoded.
    #[error("Failed to encode query: {0}")]
    Encode(#[from] serde_json::Error),
    /// Pipe I/O failed while the process was still running.
    #[error("Engine I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// How a response id relates to the query currently in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Correlation {
    Matches,
    /// Answer to an earlier query that was abandoned after a timeout.
    Stale,
    Unknown,
}

fn correlate(id: &str, sent: QueryId) -> Correlation {
    match id.parse::<u64>() {
        Ok(n) if n == sent.0 => Correlation::Matches,
        Ok(n) if n >= 1 && n < sent.0 => Correlation::Stale,
        _ => Correlation::Unknown,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One running analysis engine.
///
/// `evaluate` blocks the calling thread until the response arrives or the
/// timeout elapses. Concurrent callers are serialized, so the process never
/// has more than one outstanding query.
pub struct EngineProcess {
    label: String,
    config: EngineConfig,
    pid: u32,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    /// Response lines from the stdout listener. Held for the whole of an
    /// `evaluate` call.
    responses: Mutex<Receiver<String>>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
    last_query_id: AtomicU64,
    /// Set once a query has observed the process gone.
    lost: AtomicBool,
}

impl EngineProcess {
    /// Launch an engine process.
    ///
    /// Runs `<executable> analysis -config <config_file> -model <model_file>`,
    /// starts the stdout and stderr listeners, then waits for the configured
    /// startup grace period to make sure the process did not exit at once.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ProcessStartFailure`] if a path is invalid, the
    /// process cannot be spawned, or it exits during the grace period.
    pub fn start(config: &EngineConfig, label: impl Into<String>) -> Result<Self, EngineError> {
        let label = label.into();
        let executable = config.executable.display().to_string();
        let start_failure = |reason: String| EngineError::ProcessStartFailure {
            executable: executable.clone(),
            reason,
        };

        config
            .validate()
            .map_err(|e| start_failure(e.to_string()))?;
        let program = config
            .resolve_executable()
            .ok_or_else(|| start_failure("executable not found".to_string()))?;

        let mut child = Command::new(&program)
            .arg("analysis")
            .arg("-config")
            .arg(&config.config_file)
            .arg("-model")
            .arg(&config.model_file)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| start_failure(e.to_string()))?;
        let pid = child.id();

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (tx, rx) = mpsc::channel();

        let engine = Self {
            label: label.clone(),
            config: config.clone(),
            pid,
            child: Mutex::new(Some(child)),
            stdin: Mutex::new(stdin),
            responses: Mutex::new(rx),
            listeners: Mutex::new(Vec::new()),
            last_query_id: AtomicU64::new(0),
            lost: AtomicBool::new(false),
        };

        let (Some(stdout), Some(stderr)) = (stdout, stderr) else {
            engine.stop();
            return Err(start_failure("process pipes unavailable".to_string()));
        };

        let stdout_listener = thread::Builder::new()
            .name(format!("{label}-stdout"))
            .spawn({
                let label = label.clone();
                move || {
                    for line in BufReader::new(stdout).lines() {
                        let Ok(line) = line else { break };
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        debug!(engine = %label, line, "engine >");
                        if tx.send(line.to_string()).is_err() {
                            break;
                        }
                    }
                }
            });
        let stderr_listener = thread::Builder::new()
            .name(format!("{label}-stderr"))
            .spawn({
                let label = label.clone();
                move || drain_diagnostics(&label, stderr)
            });

        match (stdout_listener, stderr_listener) {
            (Ok(out), Ok(err)) => lock(&engine.listeners).extend([out, err]),
            (out, err) => {
                engine.stop();
                let reason = out.err().or(err.err()).map(|e| e.to_string());
                return Err(start_failure(
                    reason.unwrap_or_else(|| "listener thread failed".to_string()),
                ));
            }
        }

        let grace = config.startup_grace();
        if !grace.is_zero() {
            thread::sleep(grace);
            if !engine.is_alive() {
                let reason = format!("exited immediately ({})", engine.exit_description());
                engine.stop();
                return Err(start_failure(reason));
            }
        }

        info!(engine = %label, pid, "analysis engine started");
        Ok(engine)
    }

    /// Name used in logs and thread names.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Operating-system process id.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// The configuration this process was started with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns true while the subprocess is running.
    pub fn is_alive(&self) -> bool {
        if self.lost.load(Ordering::SeqCst) {
            return false;
        }
        match lock(&self.child).as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Build the next query for this engine, allocating a fresh id.
    pub fn next_query(&self, setup: PositionSetup, position_index: usize, max_visits: u32) -> Query {
        let id = self.last_query_id.fetch_add(1, Ordering::SeqCst) + 1;
        Query {
            id: QueryId(id),
            position_index,
            setup,
            max_visits,
        }
    }

    /// Send `query` and wait up to `timeout` for its response.
    ///
    /// Responses to earlier, abandoned queries are discarded. The process is
    /// left running on timeout.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Timeout`] if no matching response arrived in time
    /// - [`EngineError::MalformedResponse`] for unparseable lines, unknown ids,
    ///   wrong turn numbers, or a query the engine rejected
    /// - [`EngineError::EngineCrashed`] if the process has exited
    pub fn evaluate(&self, query: &Query, timeout: Duration) -> Result<EvaluationResult, EngineError> {
        let outcome = self.exchange(query, timeout);
        if matches!(outcome, Err(EngineError::EngineCrashed(_))) {
            self.lost.store(true, Ordering::SeqCst);
        }
        outcome
    }

    fn exchange(&self, query: &Query, timeout: Duration) -> Result<EvaluationResult, EngineError> {
        let responses = lock(&self.responses);
        let line = query.to_wire_line()?;
        self.send_line(&line)?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(self.timed_out(query, timeout));
            }
            match responses.recv_timeout(remaining) {
                Ok(line) => {
                    if let Some(result) = self.match_response(&line, query)? {
                        return Ok(result);
                    }
                }
                Err(RecvTimeoutError::Timeout) => return Err(self.timed_out(query, timeout)),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(EngineError::EngineCrashed(format!(
                        "{} {}",
                        self.label,
                        self.exit_description()
                    )));
                }
            }
        }
    }

    /// Stop the process.
    ///
    /// Closes stdin so the engine can finish on its own, kills it if it is
    /// still running after the shutdown grace period, reaps it, and joins the
    /// listener threads. Safe to call more than once and while a query is in
    /// flight; the in-flight call then fails with `EngineCrashed`.
    pub fn stop(&self) {
        drop(lock(&self.stdin).take());

        let child = lock(&self.child).take();
        if let Some(mut child) = child {
            let deadline = Instant::now() + self.config.shutdown_grace();
            loop {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        info!(engine = %self.label, %status, "analysis engine exited");
                        break;
                    }
                    Ok(None) if Instant::now() < deadline => thread::sleep(EXIT_POLL),
                    _ => {
                        warn!(engine = %self.label, "engine did not exit in time, killing it");
                        let _ = child.kill();
                        let _ = child.wait();
                        break;
                    }
                }
            }
        }

        let listeners: Vec<_> = lock(&self.listeners).drain(..).collect();
        for listener in listeners {
            let _ = listener.join();
        }
    }

    fn send_line(&self, line: &str) -> Result<(), EngineError> {
        let mut stdin = lock(&self.stdin);
        let pipe = stdin
            .as_mut()
            .ok_or_else(|| EngineError::EngineCrashed(format!("{} was stopped", self.label)))?;
        debug!(engine = %self.label, line, "engine <");
        let written = writeln!(pipe, "{line}").and_then(|_| pipe.flush());
        drop(stdin);
        match written {
            Ok(()) => Ok(()),
            Err(_) if !self.is_alive() => Err(EngineError::EngineCrashed(format!(
                "{} {}",
                self.label,
                self.exit_description()
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Err(
                EngineError::EngineCrashed(format!("{} closed its input", self.label)),
            ),
            Err(e) => Err(EngineError::Io(e)),
        }
    }

    /// Interpret one output line while `query` is in flight.
    ///
    /// `Ok(None)` means the line was not the answer and waiting continues.
    fn match_response(
        &self,
        line: &str,
        query: &Query,
    ) -> Result<Option<EvaluationResult>, EngineError> {
        let response =
            parse_response(line).map_err(|e| EngineError::MalformedResponse(e.to_string()))?;

        match response {
            Response::Warning { id, message } => {
                warn!(engine = %self.label, id = ?id, %message, "engine warning");
                Ok(None)
            }
            Response::Error { id, message } => match id.map(|id| correlate(&id, query.id)) {
                Some(Correlation::Stale) => {
                    debug!(engine = %self.label, %message, "discarding error for abandoned query");
                    Ok(None)
                }
                _ => Err(EngineError::MalformedResponse(format!(
                    "engine rejected query {}: {message}",
                    query.id
                ))),
            },
            Response::Partial { id } => match correlate(&id, query.id) {
                Correlation::Unknown => Err(self.unknown_id(&id, query)),
                _ => Ok(None),
            },
            Response::Analysis {
                id,
                turn_number,
                move_infos,
                root_info,
            } => match correlate(&id, query.id) {
                Correlation::Stale => {
                    warn!(engine = %self.label, stale = %id, current = %query.id, "discarding late response");
                    Ok(None)
                }
                Correlation::Unknown => Err(self.unknown_id(&id, query)),
                Correlation::Matches if turn_number != query.turn_number() => {
                    Err(EngineError::MalformedResponse(format!(
                        "response {id} is for turn {turn_number}, expected {}",
                        query.turn_number()
                    )))
                }
                Correlation::Matches => Ok(Some(EvaluationResult {
                    position_index: query.position_index,
                    query_id: query.id,
                    candidates: move_infos,
                    root: root_info,
                })),
            },
        }
    }

    fn unknown_id(&self, id: &str, query: &Query) -> EngineError {
        EngineError::MalformedResponse(format!(
            "response id {id:?} does not match query {}",
            query.id
        ))
    }

    fn timed_out(&self, query: &Query, after: Duration) -> EngineError {
        warn!(engine = %self.label, query = %query.id, ?after, "query timed out");
        EngineError::Timeout {
            query: query.id,
            after,
        }
    }

    fn exit_description(&self) -> String {
        match lock(&self.child).as_mut() {
            Some(child) => match child.try_wait() {
                Ok(Some(status)) => format!("exited with {status}"),
                Ok(None) => "closed its output stream".to_string(),
                Err(e) => format!("is in an unknown state: {e}"),
            },
            None => "was stopped".to_string(),
        }
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

fn drain_diagnostics(label: &str, stderr: impl Read) {
    for line in BufReader::new(stderr).lines() {
        let Ok(line) = line else { break };
        let line = line.trim();
        if !line.is_empty() {
            debug!(engine = %label, line, "engine stderr");
        }
    }
}
