//! Bounded fan-out of subscriptions into worker processes.
//!
//! The supervisor is a single-threaded polling loop: it starts one worker per
//! subscription, samples liveness once per cycle and never waits on an
//! individual process. Failures stay with the worker that produced them.

use std::fmt;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use conduit_core::SubscriptionId;

use crate::config::SupervisorConfig;
use crate::output::{OutputMultiplexer, RenderRegion};

/// Subcommand a worker runs.
pub const WORKER_SUBCOMMAND: &str = "run-subscription";

/// How a worker process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    Code(i32),
    /// Killed by a signal, no exit code.
    Signal,
    /// The exit status could not be determined.
    Unknown(String),
}

impl WorkerExit {
    pub fn success(&self) -> bool {
        matches!(self, WorkerExit::Code(0))
    }
}

/// Output a worker produced since it was last read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerOutput {
    pub stdout: String,
    pub stderr: String,
}

/// A running worker as seen by the supervisor.
pub trait WorkerProcess {
    /// Exit status once terminated. Never blocks on a live process.
    fn try_exit(&mut self) -> io::Result<Option<WorkerExit>>;

    /// Output buffered since the previous call.
    fn read_output(&mut self) -> WorkerOutput;

    /// Kill the process and reap it, best effort.
    fn terminate(&mut self);
}

/// Starts worker processes.
pub trait WorkerLauncher {
    type Process: WorkerProcess;

    fn launch(&mut self, command: &WorkerCommand) -> io::Result<Self::Process>;
}

/// Command line of one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn for_subscription(config: &SupervisorConfig, id: &SubscriptionId) -> Self {
        let mut args = vec![
            WORKER_SUBCOMMAND.to_string(),
            id.kind().to_string(),
            id.value().to_string(),
        ];
        args.extend(config.pass_through.iter().cloned());

        Self {
            program: config.executable.clone(),
            args,
        }
    }
}

impl fmt::Display for WorkerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

/// Launches workers as OS child processes with captured output.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsLauncher;

impl WorkerLauncher for OsLauncher {
    type Process = OsProcess;

    fn launch(&mut self, command: &WorkerCommand) -> io::Result<OsProcess> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let (sender, receiver) = mpsc::channel();
        let readers = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => vec![
                forward(stdout, Stream::Stdout, sender.clone())?,
                forward(stderr, Stream::Stderr, sender)?,
            ],
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(io::Error::other("worker output was not captured"));
            }
        };

        debug!(pid = child.id(), "worker started");
        Ok(OsProcess {
            child,
            output: receiver,
            readers,
            stdout: Utf8Decoder::default(),
            stderr: Utf8Decoder::default(),
        })
    }
}

/// Pump everything `source` produces into `sender` on a background thread.
fn forward<R>(mut source: R, stream: Stream, sender: Sender<(Stream, Vec<u8>)>) -> io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name(format!("worker-{stream:?}").to_lowercase())
        .spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match source.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if sender.send((stream, buf[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
        })
}

/// Incremental UTF-8 decoding of a byte stream read in arbitrary chunks.
///
/// An incomplete sequence at the end of a chunk is held back until the next
/// chunk completes it. Invalid bytes become U+FFFD.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, bytes: &[u8], out: &mut String) {
        self.pending.extend_from_slice(bytes);

        let mut rest = self.pending.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    out.push_str(text);
                    rest = &[];
                    break;
                }
                Err(err) => {
                    let (valid, tail) = rest.split_at(err.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(invalid) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &tail[invalid..];
                        }
                        None => {
                            rest = tail;
                            break;
                        }
                    }
                }
            }
        }

        let consumed = self.pending.len() - rest.len();
        self.pending.drain(..consumed);
    }

    /// The stream ended: whatever is held back can no longer be completed.
    fn finish(&mut self, out: &mut String) {
        if !self.pending.is_empty() {
            out.push_str(&String::from_utf8_lossy(&self.pending));
            self.pending.clear();
        }
    }
}

/// A worker child process.
#[derive(Debug)]
pub struct OsProcess {
    child: Child,
    output: Receiver<(Stream, Vec<u8>)>,
    readers: Vec<JoinHandle<()>>,
    stdout: Utf8Decoder,
    stderr: Utf8Decoder,
}

impl OsProcess {
    /// Pipes hit EOF once the child is gone; wait for the tail of its output.
    fn join_readers(&mut self) {
        for reader in self.readers.drain(..) {
            let _ = reader.join();
        }
    }
}

impl WorkerProcess for OsProcess {
    fn try_exit(&mut self) -> io::Result<Option<WorkerExit>> {
        let Some(status) = self.child.try_wait()? else {
            return Ok(None);
        };
        self.join_readers();

        Ok(Some(match status.code() {
            Some(code) => WorkerExit::Code(code),
            None => WorkerExit::Signal,
        }))
    }

    fn read_output(&mut self) -> WorkerOutput {
        let mut output = WorkerOutput::default();
        while let Ok((stream, bytes)) = self.output.try_recv() {
            match stream {
                Stream::Stdout => self.stdout.decode(&bytes, &mut output.stdout),
                Stream::Stderr => self.stderr.decode(&bytes, &mut output.stderr),
            }
        }

        if self.readers.is_empty() {
            self.stdout.finish(&mut output.stdout);
            self.stderr.finish(&mut output.stderr);
        }
        output
    }

    fn terminate(&mut self) {
        if let Err(err) = self.child.kill() {
            debug!(pid = self.child.id(), error = %err, "worker could not be killed");
        }
        let _ = self.child.wait();
        self.join_readers();
    }
}

/// What a supervisor run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorReport {
    pub spawned: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Subscriptions whose worker could not be started.
    pub not_started: usize,
    /// Highest number of simultaneously live workers observed.
    pub max_live: usize,
}

struct Worker<P> {
    id: SubscriptionId,
    process: P,
    region: RenderRegion,
}

/// Runs every subscription in its own worker, at most `concurrency_limit` at a time.
pub struct WorkerProcessSupervisor<L: WorkerLauncher, W: Write> {
    launcher: L,
    config: SupervisorConfig,
    output: OutputMultiplexer<W>,
}

impl<L: WorkerLauncher, W: Write> WorkerProcessSupervisor<L, W> {
    pub fn new(launcher: L, config: SupervisorConfig, output: OutputMultiplexer<W>) -> Self {
        Self {
            launcher,
            config,
            output,
        }
    }

    pub fn into_output(self) -> OutputMultiplexer<W> {
        self.output
    }

    /// Start a worker per subscription, in order, and wait until all are done.
    pub fn run<I>(&mut self, subscriptions: I) -> io::Result<SupervisorReport>
    where
        I: IntoIterator<Item = SubscriptionId>,
    {
        let mut report = SupervisorReport::default();
        let mut workers: Vec<Worker<L::Process>> = Vec::new();

        for id in subscriptions {
            let command = WorkerCommand::for_subscription(&self.config, &id);
            debug!(subscription = %id, %command, "starting worker");

            match self.launcher.launch(&command) {
                Ok(process) => {
                    let region = self.output.open(&id);
                    workers.push(Worker {
                        id,
                        process,
                        region,
                    });
                    report.spawned += 1;
                    report.max_live = report.max_live.max(workers.len());
                }
                Err(err) => {
                    warn!(subscription = %id, error = %err, "worker could not be started");
                    report.not_started += 1;
                    self.output.spawn_failed(&id, &err)?;
                }
            }

            while workers.len() >= self.config.concurrency_limit {
                self.poll(&mut workers, &mut report)?;
            }
        }

        while !workers.is_empty() {
            self.poll(&mut workers, &mut report)?;
        }

        info!(
            spawned = report.spawned,
            succeeded = report.succeeded,
            failed = report.failed,
            not_started = report.not_started,
            max_live = report.max_live,
            "all workers finished"
        );
        Ok(report)
    }

    /// One poll cycle over every live worker, then the poll interval sleep.
    fn poll(
        &mut self,
        workers: &mut Vec<Worker<L::Process>>,
        report: &mut SupervisorReport,
    ) -> io::Result<()> {
        report.max_live = report.max_live.max(workers.len());

        let mut index = 0;
        while index < workers.len() {
            let worker = &mut workers[index];
            let exit = match worker.process.try_exit() {
                Ok(exit) => exit,
                Err(err) => {
                    warn!(subscription = %worker.id, error = %err, "worker status unavailable, killing it");
                    worker.process.terminate();
                    Some(WorkerExit::Unknown(err.to_string()))
                }
            };
            let output = worker.process.read_output();
            worker.region.feed(&output);

            let Some(exit) = exit else {
                self.output.refresh(&mut worker.region)?;
                index += 1;
                continue;
            };

            let worker = workers.remove(index);
            if exit.success() {
                report.succeeded += 1;
                debug!(subscription = %worker.id, "worker finished");
            } else {
                report.failed += 1;
                warn!(subscription = %worker.id, exit = ?exit, "worker failed");
            }
            self.output.close(worker.region, &exit)?;
        }

        if !workers.is_empty() {
            thread::sleep(self.config.poll_interval);
        }
        Ok(())
    }
}
