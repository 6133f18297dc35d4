//! Run observation.
//!
//! The orchestrator never talks to a console or UI directly; it reports
//! lifecycle events through an injected [`Notifier`]. A CLI front end,
//! a richer UI, or a test double all implement the same trait, keeping
//! the scheduler decoupled from presentation.

use crate::core::TaskStatus;

/// Severity attached to an event for presentation purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Lifecycle events emitted during a run.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The run started with the given task count and parallelism.
    RunStarted { total_tasks: usize, max_parallel: usize },
    /// A browser connection was established (slot / requested count).
    ConnectionReady { slot: usize, requested: usize },
    /// A browser connection could not be established.
    ConnectionFailed { slot: usize, error: String },
    /// Authentication finished.
    Authenticated,
    /// A scheduling wave started with these task ids.
    WaveStarted { wave: usize, task_ids: Vec<String> },
    /// A task started an attempt (0-indexed).
    TaskStarted { task_id: String, attempt: u32 },
    /// A task attempt failed and will be retried after a delay.
    TaskRetrying { task_id: String, attempt: u32, delay_secs: f64, error: String },
    /// A task reached a terminal status.
    TaskFinished { task_id: String, status: TaskStatus, branch_name: Option<String> },
    /// Completion polling gave up within the budget; outcome unknown.
    TaskIndeterminate { task_id: String, waited_secs: u64 },
    /// The run was interrupted; no further waves will start.
    RunCancelled,
    /// Final summary counts and branches recorded this run.
    RunSummary {
        completed: usize,
        failed: usize,
        skipped: usize,
        branches: Vec<String>,
    },
    /// Free-form progress message.
    Message { severity: Severity, text: String },
}

/// Observer interface the orchestrator, executor, and diagnostics call.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: Event);
}

/// Notifier that writes events to the conductor log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: Event) {
        match &event {
            Event::TaskRetrying { task_id, attempt, delay_secs, error } => {
                crate::log::warn(&format!(
                    "task {} attempt {} failed ({}), retrying in {:.1}s",
                    task_id, attempt + 1, error, delay_secs
                ));
            }
            Event::ConnectionFailed { slot, error } => {
                crate::log::warn(&format!("connection {} failed: {}", slot + 1, error));
            }
            Event::TaskIndeterminate { task_id, waited_secs } => {
                crate::log::warn(&format!(
                    "task {} completion not detected after {}s; leaving to retry policy",
                    task_id, waited_secs
                ));
            }
            Event::Message { severity: Severity::Error, text } => crate::log::error(text),
            Event::Message { severity: Severity::Warning, text } => crate::log::warn(text),
            Event::Message { severity: Severity::Info, text } => crate::log::info(text),
            other => crate::log::info(&format!("{:?}", other)),
        }
    }
}

/// Notifier that drops every event. Useful when embedding.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _event: Event) {}
}
