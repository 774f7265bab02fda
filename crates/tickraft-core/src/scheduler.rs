//! # scheduler
//!
//! why: multi-tick operations (joining a cluster, waiting for a commit) must
//! make progress without threads or blocking waits
//! relations: owned by the tickraft-server tick engine, stepped once per tick
//! what: Task (resumable step function), Scheduler with a sequential queue and
//! a concurrent set, global cancellation

use std::collections::VecDeque;
use std::fmt;

/// Result of stepping a task once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Suspend until the next pass
    Yield,
    Done,
}

/// How a queued task is run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Runs alone; the next sequential task starts once this one is done
    Sequential,
    /// Stepped every pass alongside the other concurrent tasks
    Concurrent,
}

type StepFn<C> = Box<dyn FnMut(&mut C) -> Step>;

/// A suspendable sequence of steps over a context `C`.
pub struct Task<C> {
    name: String,
    step: StepFn<C>,
    done: bool,
}

impl<C> Task<C> {
    pub fn new(name: impl Into<String>, step: impl FnMut(&mut C) -> Step + 'static) -> Self {
        Self {
            name: name.into(),
            step: Box::new(step),
            done: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Run one step unless the task already finished.
    pub fn signal(&mut self, ctx: &mut C) {
        if !self.done && (self.step)(ctx) == Step::Done {
            self.done = true;
        }
    }
}

impl<C> fmt::Debug for Task<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("done", &self.done)
            .finish()
    }
}

/// Cooperative scheduler driven once per tick.
pub struct Scheduler<C> {
    current: Option<Task<C>>,
    sequential: VecDeque<Task<C>>,
    concurrent: Vec<Task<C>>,
    clear_requested: bool,
}

impl<C> Default for Scheduler<C> {
    fn default() -> Self {
        Self {
            current: None,
            sequential: VecDeque::new(),
            concurrent: Vec::new(),
            clear_requested: false,
        }
    }
}

impl<C> Scheduler<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&mut self, task: Task<C>, mode: Mode) {
        match mode {
            Mode::Sequential => self.sequential.push_back(task),
            Mode::Concurrent => self.concurrent.push(task),
        }
    }

    /// Drop every pending task on the next pass.
    pub fn clear(&mut self) {
        self.clear_requested = true;
    }

    /// Tasks not yet finished, including the running sequential one.
    pub fn pending(&self) -> usize {
        self.current.iter().count() + self.sequential.len() + self.concurrent.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    /// Step every concurrent task once and the running sequential task once.
    pub fn run(&mut self, ctx: &mut C) {
        if self.clear_requested {
            self.clear_requested = false;
            self.current = None;
            self.sequential.clear();
            self.concurrent.clear();
            return;
        }

        for task in self.concurrent.iter_mut() {
            task.signal(ctx);
        }
        self.concurrent.retain(|task| !task.is_done());

        self.run_sequential(ctx);
    }

    fn run_sequential(&mut self, ctx: &mut C) {
        loop {
            if self.current.is_none() {
                self.current = self.sequential.pop_front();
            }
            let Some(task) = self.current.as_mut() else {
                return;
            };
            task.signal(ctx);
            if !task.is_done() {
                return;
            }
            // a finished task hands over to the next one within the same pass
            self.current = None;
        }
    }
}

impl<C> fmt::Debug for Scheduler<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("current", &self.current)
            .field("sequential", &self.sequential.len())
            .field("concurrent", &self.concurrent.len())
            .field("clear_requested", &self.clear_requested)
            .finish()
    }
}
