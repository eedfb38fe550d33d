//! Bounded interpreter for parsed routines.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use crate::config::SandboxConfig;
use crate::error::{ContinuityError, Result};

use super::parser::{parse_routine, Op, Routine, Segment, Template};

/// Read-only values a routine may interpolate.
#[derive(Debug, Clone, Default)]
pub struct SandboxContext {
    pub snapshot_id: String,
    pub instance_name: String,
    pub steward: String,
    pub covenant: String,
}

/// What a completed routine produced.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SandboxOutput {
    /// Lines written with `emit`, in order.
    pub emitted: Vec<String>,
    /// Value of the `return` command, if one ran.
    pub returned: Option<String>,
    pub steps: u64,
}

/// Executes recovery routines with a wall-clock timeout, a step budget and
/// an output cap. Routines have no access to storage, network, or the host.
#[derive(Debug, Clone)]
pub struct Sandbox {
    config: SandboxConfig,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Parse and run `source`.
    ///
    /// Syntax errors and runtime faults are `Execution`; exceeding the
    /// wall-clock limit is `Timeout`.
    pub fn run(&self, source: &str, context: &SandboxContext) -> Result<SandboxOutput> {
        let routine = parse_routine(source)
            .map_err(|e| ContinuityError::Execution(format!("routine does not parse: {e}")))?;
        self.run_routine(routine, context.clone())
    }

    /// Run an already parsed routine on a worker thread.
    pub fn run_routine(&self, routine: Routine, context: SandboxContext) -> Result<SandboxOutput> {
        let timeout = self.config.timeout();
        let deadline = Instant::now() + timeout;
        let abort = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();

        let worker = Worker {
            vars: HashMap::new(),
            context,
            max_steps: self.config.max_steps,
            max_output_bytes: self.config.max_output_bytes,
            timeout_ms: self.config.timeout_ms,
            deadline,
            abort: abort.clone(),
        };
        std::thread::Builder::new()
            .name("acont-sandbox".into())
            .spawn(move || {
                let _ = tx.send(worker.execute(&routine));
            })
            .map_err(|e| ContinuityError::Execution(format!("failed to start sandbox: {e}")))?;

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                abort.store(true, Ordering::SeqCst);
                Err(ContinuityError::Timeout {
                    timeout_ms: self.config.timeout_ms,
                })
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(ContinuityError::Execution(
                "sandbox worker terminated abnormally".into(),
            )),
        }
    }
}

struct Worker {
    vars: HashMap<String, String>,
    context: SandboxContext,
    max_steps: u64,
    max_output_bytes: usize,
    timeout_ms: u64,
    deadline: Instant,
    abort: Arc<AtomicBool>,
}

impl Worker {
    fn execute(mut self, routine: &Routine) -> Result<SandboxOutput> {
        let mut out = SandboxOutput::default();
        let mut output_bytes = 0usize;

        for command in &routine.commands {
            self.check_deadline()?;
            out.steps += 1;
            if out.steps > self.max_steps {
                return Err(ContinuityError::Execution(format!(
                    "step budget of {} exceeded",
                    self.max_steps
                )));
            }

            match &command.op {
                Op::Set { name, value } => {
                    let value = self.render(value, self.max_output_bytes)?;
                    self.vars.insert(name.clone(), value);
                }
                Op::Emit(template) => {
                    let text = self.render(template, self.max_output_bytes - output_bytes)?;
                    output_bytes += text.len();
                    out.emitted.push(text);
                }
                Op::Wait(ms) => self.wait(Duration::from_millis(*ms))?,
                Op::Fail(template) => {
                    return Err(ContinuityError::Execution(format!(
                        "routine failed at line {}: {}",
                        command.line,
                        self.render(template, self.max_output_bytes)?
                    )));
                }
                Op::Return(template) => {
                    out.returned = Some(self.render(template, self.max_output_bytes - output_bytes)?);
                    break;
                }
            }
        }
        Ok(out)
    }

    /// Render `template`, refusing to grow the result past `limit` bytes.
    fn render(&self, template: &Template, limit: usize) -> Result<String> {
        let mut s = String::new();
        for segment in &template.segments {
            let piece = match segment {
                Segment::Text(t) => t.as_str(),
                Segment::Var(name) => self.lookup(name),
            };
            if s.len() + piece.len() > limit {
                return Err(ContinuityError::Execution(format!(
                    "output limit of {} bytes exceeded",
                    self.max_output_bytes
                )));
            }
            s.push_str(piece);
        }
        Ok(s)
    }

    fn lookup(&self, name: &str) -> &str {
        match name {
            "snapshot_id" => &self.context.snapshot_id,
            "instance_name" => &self.context.instance_name,
            "steward" => &self.context.steward,
            "covenant" => &self.context.covenant,
            other => self.vars.get(other).map(String::as_str).unwrap_or(""),
        }
    }

    /// Sleep in short slices so an abort or deadline is noticed promptly.
    fn wait(&self, total: Duration) -> Result<()> {
        let until = Instant::now() + total;
        loop {
            self.check_deadline()?;
            let now = Instant::now();
            if now >= until {
                return Ok(());
            }
            std::thread::sleep((until - now).min(Duration::from_millis(5)));
        }
    }

    fn check_deadline(&self) -> Result<()> {
        if self.abort.load(Ordering::SeqCst) || Instant::now() >= self.deadline {
            return Err(ContinuityError::Timeout {
                timeout_ms: self.timeout_ms,
            });
        }
        Ok(())
    }
}
