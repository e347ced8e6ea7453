//! Jobs: the runtime side of a pipeline.
//!
//! A [`Job`] tracks the processes of one launched pipeline through their
//! shared process group. The [`JobController`] starts pipelines, waits for
//! foreground jobs and keeps background or stopped jobs in a table until they
//! are reaped.

use crate::command::Status;
use crate::env::Environment;
use crate::error::RuntimeError;
use crate::external::{StageStart, launch_pipeline};
use crate::parser::Pipeline;
use crate::terminal::TerminalState;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use std::fmt;

/// Lifecycle of a job kept in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Stopped(i32),
    Done(Status),
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Running => write!(f, "Running"),
            JobState::Stopped(sig) => write!(f, "{}", Status::Stopped(*sig)),
            JobState::Done(status) => write!(f, "{status}"),
        }
    }
}

#[derive(Debug)]
struct Member {
    pid: Pid,
    status: Option<Status>,
}

/// One invocation of a pipeline.
#[derive(Debug)]
pub struct Job {
    /// Table identifier; 0 until the job enters the table.
    pub id: usize,
    pub pgid: Pid,
    /// The line that started the job.
    pub command: String,
    members: Vec<Member>,
    /// Pid of the last stage, if it was started.
    last_pid: Option<Pid>,
    /// Status of the last stage when it could not be started.
    last_failed: Option<Status>,
    state: JobState,
}

impl Job {
    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn pids(&self) -> impl Iterator<Item = Pid> + '_ {
        self.members.iter().map(|m| m.pid)
    }

    fn is_finished(&self) -> bool {
        self.members.iter().all(|m| m.status.is_some())
    }

    fn record(&mut self, pid: Pid, status: Status) {
        if let Some(member) = self.members.iter_mut().find(|m| m.pid == pid) {
            member.status = Some(status);
        }
    }

    /// Pipeline status: the status of the last stage.
    fn final_status(&self) -> Status {
        let last = self
            .last_pid
            .and_then(|pid| self.members.iter().find(|m| m.pid == pid))
            .and_then(|m| m.status);
        last.or(self.last_failed).unwrap_or_default()
    }

    /// Applies one `waitpid` result. Returns false once nothing more can be
    /// collected right now.
    fn apply(&mut self, result: nix::Result<WaitStatus>) -> bool {
        match result {
            Ok(WaitStatus::Exited(pid, code)) => self.record(pid, Status::Exited(code)),
            Ok(WaitStatus::Signaled(pid, sig, _)) => self.record(pid, Status::Signaled(sig as i32)),
            Ok(WaitStatus::Stopped(pid, sig)) => {
                log::debug!("job {} (pid {}) stopped by {}", self.pgid, pid, sig);
                self.state = JobState::Stopped(sig as i32);
            }
            Ok(WaitStatus::Continued(_)) => self.state = JobState::Running,
            Ok(WaitStatus::StillAlive) => return false,
            Ok(_) | Err(Errno::EINTR) => {}
            Err(Errno::ECHILD) => {
                // Nothing left in the group; members we never saw are gone.
                for member in self.members.iter_mut().filter(|m| m.status.is_none()) {
                    log::warn!("pid {} vanished without a status", member.pid);
                    member.status = Some(Status::Exited(0));
                }
                return false;
            }
            Err(e) => {
                log::error!("waitpid on group {} failed: {}", self.pgid, e);
                return false;
            }
        }
        if self.is_finished() {
            self.state = JobState::Done(self.final_status());
        }
        true
    }

    /// Blocks until every member has terminated or the job is stopped.
    fn wait_blocking(&mut self) -> Status {
        self.state = JobState::Running;
        let group = Pid::from_raw(-self.pgid.as_raw());
        while self.state == JobState::Running {
            if !self.apply(waitpid(group, Some(WaitPidFlag::WUNTRACED))) {
                break;
            }
        }
        match self.state {
            JobState::Stopped(sig) => Status::Stopped(sig),
            _ => self.final_status(),
        }
    }

    /// Collects whatever state changes are pending without blocking.
    fn poll(&mut self) {
        let group = Pid::from_raw(-self.pgid.as_raw());
        let flags = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED;
        while !self.is_finished() && self.apply(waitpid(group, Some(flags))) {}
    }

    /// Delivers `sig` to every process of the job.
    pub fn signal(&self, sig: Signal) -> Result<(), RuntimeError> {
        signal::killpg(self.pgid, sig)?;
        Ok(())
    }
}

/// What the shell learns from running one pipeline.
#[derive(Debug)]
pub struct JobReport {
    /// Status of the last stage, or `Exited(0)` for a background launch.
    pub status: Status,
    /// Stages that never got a process, with their position.
    pub failures: Vec<(usize, RuntimeError)>,
    /// `(id, pgid)` when the pipeline went to the background.
    pub background: Option<(usize, Pid)>,
    /// Table id when the foreground job was stopped.
    pub stopped: Option<usize>,
}

/// A job that finished in the background, as announced to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finished {
    pub id: usize,
    pub command: String,
    pub status: Status,
}

/// Starts pipelines and tracks their jobs.
#[derive(Debug)]
pub struct JobController {
    jobs: Vec<Job>,
    next_id: usize,
    terminal: Option<TerminalState>,
}

impl JobController {
    /// `terminal` is present only for an interactive shell that owns its
    /// controlling terminal.
    pub fn new(terminal: Option<TerminalState>) -> Self {
        Self {
            jobs: Vec::new(),
            next_id: 1,
            terminal,
        }
    }

    pub fn is_interactive(&self) -> bool {
        self.terminal.is_some()
    }

    /// Jobs currently in the table, oldest first.
    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }

    /// Launches `pipeline` and either waits for it or registers it as a
    /// background job.
    ///
    /// Children that were started are always waited for or registered, even
    /// when other stages failed to start.
    pub fn run(&mut self, pipeline: &Pipeline, env: &Environment) -> Result<JobReport, RuntimeError> {
        let tty = self
            .terminal
            .as_ref()
            .filter(|_| !pipeline.background)
            .map(TerminalState::raw_fd);
        let launch = launch_pipeline(pipeline, env, tty)?;

        let last_index = launch.stages.len().saturating_sub(1);
        let mut members = Vec::new();
        let mut failures = Vec::new();
        let mut last_pid = None;
        let mut last_failed = None;
        for (i, stage) in launch.stages.into_iter().enumerate() {
            match stage {
                StageStart::Running(pid) => {
                    members.push(Member { pid, status: None });
                    if i == last_index {
                        last_pid = Some(pid);
                    }
                }
                StageStart::Failed(e) => {
                    if i == last_index {
                        last_failed = Some(Status::Exited(e.stage_code()));
                    }
                    failures.push((i, e));
                }
            }
        }

        let mut report = JobReport {
            status: last_failed.unwrap_or_default(),
            failures,
            background: None,
            stopped: None,
        };
        let Some(pgid) = launch.pgid else {
            return Ok(report);
        };

        let mut job = Job {
            id: 0,
            pgid,
            command: pipeline.text.clone(),
            members,
            last_pid,
            last_failed,
            state: JobState::Running,
        };

        if pipeline.background {
            let id = self.insert(job);
            log::debug!("job [{}] started in background, pgid {}", id, pgid);
            report.status = Status::SUCCESS;
            report.background = Some((id, pgid));
            return Ok(report);
        }

        report.status = self.wait_in_foreground(&mut job);
        if let JobState::Stopped(_) = job.state {
            report.stopped = Some(self.insert(job));
        }
        Ok(report)
    }

    fn insert(&mut self, mut job: Job) -> usize {
        if job.id == 0 {
            job.id = self.next_id;
            self.next_id += 1;
        }
        let id = job.id;
        self.jobs.push(job);
        id
    }

    fn hand_terminal_to(&self, pgid: Pid) {
        if let Some(terminal) = &self.terminal {
            if let Err(e) = terminal.give_terminal_to(pgid) {
                log::warn!("cannot give terminal to group {}: {}", pgid, e);
            }
        }
    }

    fn take_terminal_back(&self) {
        if let Some(terminal) = &self.terminal {
            if let Err(e) = terminal.reclaim_terminal() {
                log::warn!("cannot reclaim terminal: {}", e);
            }
        }
    }

    /// Gives the terminal to `job`, waits for it and takes the terminal back.
    fn wait_in_foreground(&self, job: &mut Job) -> Status {
        self.hand_terminal_to(job.pgid);
        let status = job.wait_blocking();
        self.take_terminal_back();
        status
    }

    /// Collects state changes of all table jobs without blocking and removes
    /// the ones that have finished.
    pub fn reap(&mut self) -> Vec<Finished> {
        for job in &mut self.jobs {
            job.poll();
        }
        let (done, alive): (Vec<Job>, Vec<Job>) = std::mem::take(&mut self.jobs)
            .into_iter()
            .partition(Job::is_finished);
        self.jobs = alive;

        done.into_iter()
            .map(|job| {
                log::debug!("job [{}] reaped", job.id);
                Finished {
                    id: job.id,
                    status: job.final_status(),
                    command: job.command,
                }
            })
            .collect()
    }

    /// Job `id`, or the most recent job when `id` is `None`.
    pub fn get(&self, id: Option<usize>) -> Option<&Job> {
        self.position(id).ok().and_then(|i| self.jobs.get(i))
    }

    fn position(&self, id: Option<usize>) -> Result<usize, RuntimeError> {
        let found = match id {
            Some(id) => self.jobs.iter().position(|j| j.id == id),
            None => self.jobs.len().checked_sub(1),
        };
        found.ok_or_else(|| {
            RuntimeError::NoSuchJob(id.map_or_else(|| "current".to_owned(), |id| id.to_string()))
        })
    }

    /// Continues job `id` (default: the most recent) in the foreground and
    /// waits for it. Returns the job's command line and its status.
    pub fn foreground(&mut self, id: Option<usize>) -> Result<(String, Status), RuntimeError> {
        let index = self.position(id)?;
        let mut job = self.jobs.remove(index);
        let command = job.command.clone();

        // The group must own the terminal before it runs again, or a reader
        // like `cat` stops at once on SIGTTIN.
        self.hand_terminal_to(job.pgid);
        if let Err(e) = job.signal(Signal::SIGCONT) {
            self.take_terminal_back();
            self.jobs.insert(index, job);
            return Err(e);
        }
        let status = job.wait_blocking();
        self.take_terminal_back();
        if let JobState::Stopped(_) = job.state {
            self.insert(job);
        }
        Ok((command, status))
    }

    /// Continues a stopped job `id` (default: the most recent) in the
    /// background. Returns its id.
    pub fn background(&mut self, id: Option<usize>) -> Result<usize, RuntimeError> {
        let index = self.position(id)?;
        let job = self
            .jobs
            .get_mut(index)
            .ok_or_else(|| RuntimeError::NoSuchJob(format!("{index}")))?;
        job.signal(Signal::SIGCONT)?;
        job.state = JobState::Running;
        Ok(job.id)
    }
}
