use parking_lot::Mutex;

use super::command::{Command, CommandList};
use super::error::RhiError;
use super::fence::Fence;

/// One `execute_command_lists` call as observed by the queue.
#[derive(Clone, Debug)]
pub struct Submission {
    pub lists: Vec<Vec<Command>>,
}

/// The single graphics/compute command queue.
///
/// The software queue completes work instantly, but keeps the full ordered
/// submission log so callers can verify what the GPU would have seen.
pub struct CommandQueue {
    submissions: Mutex<Vec<Submission>>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self {
            submissions: Mutex::new(Vec::new()),
        }
    }

    /// Submit a batch of closed command lists as one atomic unit.
    /// The lists stay with the caller and may be reset and reused.
    pub fn execute_command_lists(&self, lists: &[&CommandList]) -> Result<(), RhiError> {
        if lists.iter().any(|list| !list.is_closed()) {
            return Err(RhiError::CommandListNotClosed);
        }

        self.submissions.lock().push(Submission {
            lists: lists.iter().map(|list| list.commands().to_vec()).collect(),
        });
        Ok(())
    }

    /// Signal `fence` to `value` once all prior submissions complete.
    /// Completion is immediate here; ordering relative to submissions is
    /// still faithful since the log is already written.
    pub fn signal(&self, fence: &Fence, value: u64) {
        fence.signal(value);
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().len()
    }

    /// Snapshot of every submission in queue order.
    pub fn submission_log(&self) -> Vec<Submission> {
        self.submissions.lock().clone()
    }

    /// All commands of every submission, flattened in GPU execution order.
    pub fn command_stream(&self) -> Vec<Command> {
        self.submissions
            .lock()
            .iter()
            .flat_map(|submission| submission.lists.iter().flatten().cloned())
            .collect()
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}
