//! Local script runner.
//!
//! Launches the trial script as a child process and reads its output on
//! background threads, so polling never blocks the controller. The script
//! talks back through stdout lines prefixed with `[sweepline]`:
//!
//! ```text
//! [sweepline] report <step> <value>
//! [sweepline] score <value>
//! [sweepline] model <path>
//! [sweepline] monitor <metric name>
//! ```

use crossbeam_channel::{Receiver, TryRecvError};
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use sl_types::{Params, Report, RunnerStage};

use crate::objective::{ObjectiveContext, ObjectiveRunner};

const PROTOCOL_PREFIX: &str = "[sweepline]";
const STDERR_TAIL_LINES: usize = 20;
/// How long output may keep trickling in after the process exited.
const EXIT_DRAIN_GRACE: Duration = Duration::from_secs(2);

enum StreamLine {
    Stdout(String),
    Stderr(String),
}

/// Runs one trial as a local child process.
pub struct ScriptObjective {
    context: ObjectiveContext,
    stage: RunnerStage,
    child: Option<Child>,
    lines: Option<Receiver<StreamLine>>,
    exit: Option<(ExitStatus, Instant)>,
    drain_grace: Duration,
    reports: Vec<Report>,
    best_model_score: Option<f64>,
    best_model_path: Option<String>,
    monitor: Option<String>,
    stderr_tail: VecDeque<String>,
    failure: Option<String>,
    stopped: bool,
}

impl ScriptObjective {
    pub fn new(context: ObjectiveContext) -> Self {
        Self {
            context,
            stage: RunnerStage::NotStarted,
            child: None,
            lines: None,
            exit: None,
            drain_grace: EXIT_DRAIN_GRACE,
            reports: Vec::new(),
            best_model_score: None,
            best_model_path: None,
            monitor: None,
            stderr_tail: VecDeque::new(),
            failure: None,
            stopped: false,
        }
    }

    /// Override how long to wait for the output pipes to close once the
    /// script has exited. Background processes that inherit stdout can keep
    /// them open indefinitely.
    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    fn command(&self, params: &Params, restart_count: u32) -> Command {
        let context = &self.context;
        let mut command = match &context.interpreter {
            Some(interpreter) => {
                let mut command = Command::new(interpreter);
                command.arg(&context.script_path);
                command
            }
            None => Command::new(&context.script_path),
        };
        command
            .args(&context.script_args)
            .args(params.iter().map(|(name, value)| format!("--{name}={value}")))
            .envs(&context.env)
            .env("SWEEPLINE_SWEEP_ID", &context.sweep_id)
            .env("SWEEPLINE_TRIAL_ID", context.trial_id.to_string())
            .env("SWEEPLINE_RESTART_COUNT", restart_count.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }

    fn spawn(&mut self, params: &Params, restart_count: u32) {
        let mut child = match self.command(params, restart_count).spawn() {
            Ok(child) => child,
            Err(e) => {
                self.fail(format!("failed to launch {}: {e}", self.context.script_path));
                return;
            }
        };

        let (tx, rx) = crossbeam_channel::unbounded();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, tx.clone(), StreamLine::Stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, tx, StreamLine::Stderr);
        }

        debug!(
            sweep_id = %self.context.sweep_id,
            trial_id = self.context.trial_id,
            pid = child.id(),
            "trial script launched"
        );
        self.child = Some(child);
        self.lines = Some(rx);
        self.stage = RunnerStage::Running;
    }

    fn poll(&mut self) {
        let mut drained = Vec::new();
        let mut streams_closed = false;
        if let Some(rx) = &self.lines {
            loop {
                match rx.try_recv() {
                    Ok(line) => drained.push(line),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        streams_closed = true;
                        break;
                    }
                }
            }
        }
        for line in drained {
            self.handle_line(line);
        }

        if self.exit.is_none() {
            if let Some(child) = self.child.as_mut() {
                match child.try_wait() {
                    Ok(status) => self.exit = status.map(|status| (status, Instant::now())),
                    Err(e) => {
                        self.fail(format!("failed to poll trial process: {e}"));
                        return;
                    }
                }
            }
        }

        // Let both pipes drain so the final score isn't lost, within the grace.
        if let Some((status, exited_at)) = self.exit {
            if streams_closed || exited_at.elapsed() >= self.drain_grace {
                self.finish(status);
            }
        }
    }

    fn handle_line(&mut self, line: StreamLine) {
        match line {
            StreamLine::Stdout(line) => {
                if let Some(message) = line.strip_prefix(PROTOCOL_PREFIX) {
                    self.handle_message(message.trim());
                }
            }
            StreamLine::Stderr(line) => {
                if self.stderr_tail.len() == STDERR_TAIL_LINES {
                    self.stderr_tail.pop_front();
                }
                self.stderr_tail.push_back(line);
            }
        }
    }

    fn handle_message(&mut self, message: &str) {
        let (keyword, rest) = message.split_once(' ').unwrap_or((message, ""));
        let rest = rest.trim();
        let parsed = match keyword {
            "report" => {
                let mut parts = rest.split_whitespace();
                match (
                    parts.next().and_then(|s| s.parse::<u64>().ok()),
                    parts.next().and_then(parse_finite),
                ) {
                    (Some(step), Some(value)) => {
                        self.reports.push(Report::new(step, value));
                        true
                    }
                    _ => false,
                }
            }
            "score" => match parse_finite(rest) {
                Some(score) => {
                    self.best_model_score = Some(score);
                    true
                }
                None => false,
            },
            "model" if !rest.is_empty() => {
                self.best_model_path = Some(rest.to_string());
                true
            }
            "monitor" if !rest.is_empty() => {
                self.monitor = Some(rest.to_string());
                true
            }
            _ => false,
        };
        if !parsed {
            warn!(
                trial_id = self.context.trial_id,
                "ignoring malformed protocol line: {message}"
            );
        }
    }

    fn finish(&mut self, status: ExitStatus) {
        self.child = None;
        self.lines = None;
        if !status.success() {
            let tail: Vec<&str> = self.stderr_tail.iter().map(String::as_str).collect();
            self.fail(format!("script exited with {status}: {}", tail.join("\n")));
        } else if self.best_model_score.is_none() {
            self.fail("script exited without reporting a score".to_string());
        } else {
            self.stage = RunnerStage::Succeeded;
        }
    }

    fn fail(&mut self, message: String) {
        self.failure = Some(message);
        self.stage = RunnerStage::Failed;
    }

    fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        self.lines = None;
    }
}

/// NaN and infinities are rejected like any other unparsable number.
fn parse_finite(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|value| value.is_finite())
}

/// Reads until EOF. Lines that are not UTF-8 are decoded lossily rather than
/// ending the read, which would close the pipe under the script.
fn forward_lines<R, F>(stream: R, tx: crossbeam_channel::Sender<StreamLine>, wrap: F)
where
    R: Read + Send + 'static,
    F: Fn(String) -> StreamLine + Send + 'static,
{
    std::thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = String::from_utf8_lossy(&buf);
            let line = line.trim_end_matches(['\n', '\r']).to_string();
            if tx.send(wrap(line)).is_err() {
                break;
            }
        }
    });
}

impl ObjectiveRunner for ScriptObjective {
    fn run(&mut self, params: &Params, restart_count: u32) {
        match self.stage {
            RunnerStage::NotStarted => {
                self.spawn(params, restart_count);
                if self.stage == RunnerStage::Running {
                    self.poll();
                }
            }
            RunnerStage::Running => self.poll(),
            _ => {}
        }
    }

    fn stage(&self) -> RunnerStage {
        self.stage
    }

    fn reports(&self) -> &[Report] {
        &self.reports
    }

    /// Only published once the script exited cleanly, so a score line
    /// followed by a crash never counts.
    fn best_model_score(&self) -> Option<f64> {
        self.best_model_score
            .filter(|_| self.stage == RunnerStage::Succeeded)
    }

    fn best_model_path(&self) -> Option<&str> {
        self.best_model_path.as_deref()
    }

    fn monitor(&self) -> Option<&str> {
        self.monitor.as_deref()
    }

    fn has_stopped(&self) -> bool {
        self.stopped
    }

    fn failure_message(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    fn stop(&mut self) {
        self.kill();
        self.stopped = true;
        if matches!(self.stage, RunnerStage::NotStarted | RunnerStage::Running) {
            self.stage = RunnerStage::Stopped;
        }
    }
}

impl Drop for ScriptObjective {
    fn drop(&mut self) {
        self.kill();
    }
}
