// src/exec/script_runner.rs

//! Bounded script pools.
//!
//! Each script kind (PRE/POST/HOLD) gets its own pool with an independent
//! concurrency cap. Requests beyond the cap queue up and are drained as
//! running scripts exit. Scripts whose exit status matched their configured
//! defer status are parked with a wake-up deadline and re-queued on a later
//! tick.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::model::OptionsSection;
use crate::exec::launcher::ScriptLauncher;
use crate::exec::script::ScriptExec;
use crate::types::ScriptKind;

#[derive(Debug)]
pub struct ScriptRunner {
    kind: ScriptKind,
    /// 0 means unlimited.
    max_concurrent: usize,
    running: usize,
    waiting: VecDeque<ScriptExec>,
    /// Deferred scripts with their earliest re-queue time.
    parked: Vec<(Instant, ScriptExec)>,
    /// Total requests that ever had to wait for a slot.
    pub total_deferred: u64,
}

impl ScriptRunner {
    pub fn new(kind: ScriptKind, max_concurrent: usize) -> Self {
        Self {
            kind,
            max_concurrent,
            running: 0,
            waiting: VecDeque::new(),
            parked: Vec::new(),
            total_deferred: 0,
        }
    }

    fn at_capacity(&self) -> bool {
        self.max_concurrent != 0 && self.running >= self.max_concurrent
    }

    pub fn running(&self) -> usize {
        self.running
    }

    /// Scripts either running or queued for a slot.
    pub fn outstanding(&self) -> usize {
        self.running + self.waiting.len() + self.parked.len()
    }

    /// Start the script now if a slot is free, otherwise queue it.
    pub fn run(&mut self, exec: ScriptExec, launcher: &mut dyn ScriptLauncher) {
        if self.at_capacity() {
            debug!(
                node = %exec.node,
                kind = self.kind.label(),
                running = self.running,
                "script pool full, deferring"
            );
            self.total_deferred += 1;
            self.waiting.push_back(exec);
            return;
        }
        self.running += 1;
        launcher.launch(exec);
    }

    /// Bookkeeping when a script of this kind exits; starts the next queued
    /// script if one is waiting.
    pub fn on_exit(&mut self, launcher: &mut dyn ScriptLauncher) {
        self.running = self.running.saturating_sub(1);
        if !self.at_capacity()
            && let Some(next) = self.waiting.pop_front()
        {
            self.running += 1;
            launcher.launch(next);
        }
    }

    /// Park a script whose exit asked for a retry after `delay`.
    pub fn defer(&mut self, exec: ScriptExec, delay: Duration) {
        self.parked.push((Instant::now() + delay, exec));
    }

    /// Re-queue parked scripts whose deadline has passed.
    pub fn poll_parked(&mut self, now: Instant, launcher: &mut dyn ScriptLauncher) {
        let mut due = Vec::new();
        self.parked.retain(|(deadline, exec)| {
            if *deadline <= now {
                due.push(exec.clone());
                false
            } else {
                true
            }
        });
        for exec in due {
            self.run(exec, launcher);
        }
    }
}

/// The three pools, built from the resolved options.
#[derive(Debug)]
pub struct ScriptRunners {
    pub pre: ScriptRunner,
    pub post: ScriptRunner,
    pub hold: ScriptRunner,
}

impl ScriptRunners {
    pub fn from_options(opts: &OptionsSection) -> Self {
        Self {
            pre: ScriptRunner::new(ScriptKind::Pre, opts.max_pre_scripts),
            post: ScriptRunner::new(ScriptKind::Post, opts.max_post_scripts),
            hold: ScriptRunner::new(ScriptKind::Hold, opts.max_hold_scripts),
        }
    }

    pub fn for_kind(&mut self, kind: ScriptKind) -> &mut ScriptRunner {
        match kind {
            ScriptKind::Pre => &mut self.pre,
            ScriptKind::Post => &mut self.post,
            ScriptKind::Hold => &mut self.hold,
        }
    }

    pub fn outstanding(&self) -> usize {
        self.pre.outstanding() + self.post.outstanding() + self.hold.outstanding()
    }

    pub fn poll_parked(&mut self, now: Instant, launcher: &mut dyn ScriptLauncher) {
        self.pre.poll_parked(now, launcher);
        self.post.poll_parked(now, launcher);
        self.hold.poll_parked(now, launcher);
    }
}
