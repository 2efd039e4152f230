//! Two-domain demonstration
//!
//! Scenario one: a domain catches a failure thrown from a timer it created.
//!
//! Scenario two: a domain hosts an async sequence. Each step awaits a
//! one-shot promise settled by an immediate:
//!
//! 1. the immediate fails with `foo` before settling, so the await rejects
//!    and the failure itself is routed to the domain;
//! 2. the immediate rejects with `reject` and schedules another immediate that
//!    fails with `thrown`;
//! 3. the immediate resolves with `resolve`.

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{anyhow, Context};
use clap::ValueEnum;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::domain::{router, Domain};
use crate::error::Result;
use crate::runtime::scheduler::EventLoop;
use crate::util::config::EngineConfig;

/// Which scenarios to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// Timer failure caught by a domain
    S1,
    /// Async sequence inside a domain
    S2,
    /// Both, on one loop
    All,
}

impl Scenario {
    fn includes_one(self) -> bool {
        matches!(self, Scenario::S1 | Scenario::All)
    }

    fn includes_two(self) -> bool {
        matches!(self, Scenario::S2 | Scenario::All)
    }
}

/// Lines written by the demo, in order.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    lines: Rc<RefCell<Vec<String>>>,
}

impl Transcript {
    /// Create an empty transcript.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a line.
    pub fn record(
        &self,
        line: impl Into<String>,
    ) {
        let line = line.into();
        debug!("demo: {}", line);
        self.lines.borrow_mut().push(line);
    }

    /// Snapshot of every line so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.borrow().clone()
    }

    /// Whether `line` was recorded.
    pub fn contains(
        &self,
        line: &str,
    ) -> bool {
        self.lines.borrow().iter().any(|l| l == line)
    }
}

/// A promise settled by an event loop callback.
type Promise = oneshot::Receiver<anyhow::Result<String>>;

/// Run `scenario` on a fresh event loop and return what it printed.
///
/// The error router is installed for the duration of the run when the
/// configuration asks for it. Without it, the first routed failure is fatal.
pub fn run_demo(
    scenario: Scenario,
    config: &EngineConfig,
) -> Result<Transcript> {
    let installed = config.router.install_on_start && router::install();
    let event_loop = EventLoop::with_config(config.event_loop.clone());
    let transcript = Transcript::new();

    let mut domains = Vec::new();
    if scenario.includes_one() {
        domains.push(scenario_one(&event_loop, &transcript));
    }
    if scenario.includes_two() {
        domains.push(scenario_two(&event_loop, &transcript));
    }

    let outcome = event_loop.run();
    if installed {
        router::uninstall();
    }
    let stats = outcome?;
    info!(
        "demo {:?} finished: {} operations, {} failures routed",
        scenario, stats.created, stats.faults_handled
    );
    drop(domains);
    Ok(transcript)
}

fn scenario_one(
    event_loop: &EventLoop,
    transcript: &Transcript,
) -> Domain {
    let domain = Domain::create();
    let out = transcript.clone();
    domain.on_error(move |fault| out.record(format!("domain error {}", fault)));

    domain.run(|| {
        event_loop.set_timeout(0, || anyhow::bail!("my error"));
    });
    domain
}

fn scenario_two(
    event_loop: &EventLoop,
    transcript: &Transcript,
) -> Domain {
    let domain = Domain::create();
    let out = transcript.clone();
    domain.on_error(move |fault| out.record(format!("domain2 error {}", fault)));

    let handle = event_loop.clone();
    let out = transcript.clone();
    domain.run(|| {
        event_loop.spawn(sequence(handle, out));
    });
    domain
}

async fn sequence(
    event_loop: EventLoop,
    transcript: Transcript,
) -> anyhow::Result<()> {
    if settle(func1(&event_loop)).await.is_err() {
        transcript.record("caught throw in func1");
    }

    if settle(func2(&event_loop)).await.is_err() {
        transcript.record("caught rejection in func2");
    }

    match settle(func3(&event_loop)).await {
        Ok(value) => transcript.record(value),
        Err(_) => transcript.record("caught throw in func3"),
    }
    Ok(())
}

async fn settle(promise: Promise) -> anyhow::Result<String> {
    promise.await.context("promise abandoned")?
}

/// Fails inside the immediate; the promise is dropped unsettled.
fn func1(event_loop: &EventLoop) -> Promise {
    let (resolve, promise) = oneshot::channel();
    event_loop.set_immediate(move || {
        let _resolve = resolve;
        anyhow::bail!("foo")
    });
    promise
}

/// Rejects, and schedules a failure for later.
fn func2(event_loop: &EventLoop) -> Promise {
    let (resolve, promise) = oneshot::channel();
    let handle = event_loop.clone();
    event_loop.set_immediate(move || {
        handle.set_immediate(|| anyhow::bail!("thrown"));
        let _ = resolve.send(Err(anyhow!("reject")));
        Ok(())
    });
    promise
}

/// Resolves.
fn func3(event_loop: &EventLoop) -> Promise {
    let (resolve, promise) = oneshot::channel();
    event_loop.set_immediate(move || {
        let _ = resolve.send(Ok("resolve".to_string()));
        Ok(())
    });
    promise
}
