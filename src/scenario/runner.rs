//! Drives a scenario against a scheduler and prints what it commits.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use super::{Scenario, ScenarioError, Step};
use crate::clock::Time;
use crate::commit::Commit;
use crate::config::SchedulerConfig;
use crate::core::{NodeId, Priority, SchedulerError, TaskHandle};
use crate::debug;
use crate::logger::StatusLine;
use crate::scheduler::{Scheduler, TaskInfo, TaskStatus};

/// Outcome of a whole script.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub steps: usize,
    pub commits: Vec<Commit>,
    /// Uncaught failures, one line each.
    pub failures: Vec<String>,
    /// Tasks still waiting when the script ended.
    pub blocked: Vec<TaskInfo>,
    pub now: Time,
}

pub struct Runner {
    scheduler: Scheduler,
    ids: FxHashMap<String, NodeId>,
    steps: Vec<Step>,
    commits: Rc<RefCell<Vec<Commit>>>,
    printed: usize,
    tasks: Vec<TaskHandle>,
    failures: Vec<String>,
    status: StatusLine,
    quiet: bool,
}

impl Runner {
    pub fn new(scenario: &Scenario, config: SchedulerConfig) -> Result<Self, ScenarioError> {
        scenario.validate()?;
        let mut scheduler = Scheduler::new(config);
        let ids = scenario.build(&mut scheduler)?;

        let commits = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&commits);
        scheduler.on_commit(move |commit| sink.borrow_mut().push(commit.clone()));

        Ok(Self {
            scheduler,
            ids,
            steps: scenario.steps.clone(),
            commits,
            printed: 0,
            tasks: Vec::new(),
            failures: Vec::new(),
            status: StatusLine::new(),
            quiet: false,
        })
    }

    /// Suppress status lines.
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Tree node of a scenario id.
    pub fn node(&self, id: &str) -> Option<NodeId> {
        self.ids.get(id).copied()
    }

    pub fn run(mut self) -> Result<RunSummary, ScenarioError> {
        let steps = std::mem::take(&mut self.steps);
        for (i, step) in steps.iter().enumerate() {
            debug!("scenario"; "step {}: {}", i + 1, step);
            self.step(i + 1, step)?;
            self.print_commits();
        }

        let blocked: Vec<TaskInfo> = self
            .tasks
            .iter()
            .filter_map(|&task| self.scheduler.task_info(task))
            .filter(|info| info.status == TaskStatus::Blocked)
            .collect();
        if !self.quiet {
            let now = self.scheduler.now();
            for info in &blocked {
                let tokens: Vec<String> = info.blocked_on.iter().map(ToString::to_string).collect();
                self.status.pending(
                    now,
                    &format!("{} still blocked on {}", info.id, tokens.join(", ")),
                );
            }
        }

        Ok(RunSummary {
            steps: steps.len(),
            commits: self.commits.take(),
            failures: self.failures,
            blocked,
            now: self.scheduler.now(),
        })
    }

    fn step(&mut self, index: usize, step: &Step) -> Result<(), ScenarioError> {
        match step {
            Step::Schedule { root, priority } => {
                let node = self.lookup(index, root)?;
                let task = self.scheduler.schedule(node, *priority)?;
                self.tasks.push(task);
            }
            Step::Flush => loop {
                // An uncaught failure stops the flush; keep draining the rest.
                match self.scheduler.flush_all() {
                    Ok(_) => break,
                    Err(err) => self.failed(err)?,
                }
            },
            Step::FlushSync { root } => {
                let node = self.lookup(index, root)?;
                match self.scheduler.flush_sync(|s| s.schedule(node, Priority::Sync)) {
                    Ok(task) => self.tasks.push(task?),
                    Err(err) => self.failed(err)?,
                }
            }
            Step::Advance(ticks) => {
                let now = self.scheduler.advance_time(*ticks);
                debug!("scenario"; "clock at {}", now);
            }
            Step::Work(budget) => {
                if let Err(err) = self.scheduler.work(*budget) {
                    self.failed(err)?;
                }
            }
            Step::Resolve { key, value } => {
                if self.scheduler.resources().resolve(key, value.clone()).is_none() {
                    debug!("scenario"; "nothing was waiting on `{}`", key);
                }
            }
            Step::Reject { key, message } => {
                if self.scheduler.resources().reject(key, message.clone()).is_none() {
                    debug!("scenario"; "nothing was waiting on `{}`", key);
                }
            }
            Step::Invalidate(key) => self.scheduler.resources().invalidate(key),
        }
        Ok(())
    }

    fn lookup(&self, index: usize, id: &str) -> Result<NodeId, ScenarioError> {
        self.node(id).ok_or_else(|| ScenarioError::UnknownNode {
            id: id.to_string(),
            at: format!("step {index}"),
        })
    }

    /// Record an uncaught failure. Any other error ends the run.
    fn failed(&mut self, err: SchedulerError) -> Result<(), ScenarioError> {
        let (task, name, error) = match err {
            SchedulerError::Uncaught {
                task, name, error, ..
            } => (task, name, error),
            other => return Err(other.into()),
        };
        let summary = format!("{task} failed at `{name}`");
        if !self.quiet {
            self.status
                .error(self.scheduler.now(), &summary, &error.to_string());
        }
        self.failures.push(format!("{summary}: {error}"));
        Ok(())
    }

    fn print_commits(&mut self) {
        let commits = self.commits.borrow();
        if !self.quiet {
            for commit in &commits[self.printed..] {
                self.status.success(commit.at, &commit.to_string());
            }
        }
        self.printed = commits.len();
    }
}
