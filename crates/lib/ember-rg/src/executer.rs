use std::ops::Range;
use std::sync::Arc;

use parking_lot::Mutex;

use ember_rhi::backend::{CommandAllocator, CommandList, CommandQueue, Device};

use crate::error::GraphError;
use crate::graph_data::FrameGraphData;
use crate::pass::PassSubmission;
use crate::releaser::ResourceReleaser;

/// Free list of reusable command lists, guarded separately from the
/// scheduler so recycling never contends with task claiming.
pub(crate) struct CommandListPool {
    device: Device,
    free: Mutex<Vec<CommandList>>,
}

impl CommandListPool {
    fn new(device: Device) -> Self {
        Self {
            device,
            free: Mutex::new(Vec::new()),
        }
    }

    fn acquire(&self) -> CommandList {
        self.free
            .lock()
            .pop()
            .unwrap_or_else(|| self.device.create_command_list())
    }

    fn recycle(&self, list: CommandList) {
        self.free.lock().push(list);
    }
}

enum NodeState {
    NotFinished,
    Pending {
        list: CommandList,
        submission: PassSubmission,
    },
    Submitted,
}

struct SchedulerState {
    /// Next undispatched node.
    next: usize,
    /// First node not yet submitted to the queue.
    submit_head: usize,
    nodes: Vec<NodeState>,
    aborted: bool,
}

/// Hands out pass nodes to workers and enforces that command lists reach the
/// queue in strict declaration order, however recording completes.
///
/// A list recorded ahead of its turn parks in its node's `Pending` slot; the
/// thread that submits the preceding node walks the contiguous pending run
/// and submits it as one batch.
pub(crate) struct TaskScheduler {
    state: Mutex<SchedulerState>,
}

impl TaskScheduler {
    fn new(node_count: usize) -> Self {
        Self {
            state: Mutex::new(SchedulerState {
                next: 0,
                submit_head: 0,
                nodes: (0..node_count).map(|_| NodeState::NotFinished).collect(),
                aborted: false,
            }),
        }
    }

    /// Claim the next contiguous run of undispatched nodes. Currently sized
    /// at one node per request; the range return type leaves room for
    /// batching heuristics later.
    fn request_task(&self) -> Option<Range<usize>> {
        let mut state = self.state.lock();
        if state.aborted || state.next == state.nodes.len() {
            return None;
        }
        let start = state.next;
        state.next += 1;
        Some(start..start + 1)
    }

    fn abort(&self) {
        self.state.lock().aborted = true;
    }

    /// Park a recorded list and, if its node is at the submission head,
    /// drain the contiguous pending run into the queue. Immediate-flagged
    /// passes split the batch: predecessors flush first, then the flagged
    /// list goes alone, then a fresh batch continues.
    fn submit_task(
        &self,
        range: Range<usize>,
        list: CommandList,
        submission: PassSubmission,
        queue: &CommandQueue,
        pool: &CommandListPool,
    ) -> Result<(), GraphError> {
        let mut state = self.state.lock();
        state.nodes[range.start] = NodeState::Pending { list, submission };

        if range.start != state.submit_head {
            return Ok(());
        }

        let mut batch: Vec<CommandList> = Vec::new();
        let mut head = state.submit_head;

        while head < state.nodes.len()
            && matches!(state.nodes[head], NodeState::Pending { .. })
        {
            let NodeState::Pending { list, submission } =
                std::mem::replace(&mut state.nodes[head], NodeState::Submitted)
            else {
                unreachable!()
            };

            match submission {
                PassSubmission::Batched => batch.push(list),
                PassSubmission::Immediate => {
                    flush(queue, pool, &mut batch)?;
                    batch.push(list);
                    flush(queue, pool, &mut batch)?;
                }
            }
            head += 1;
        }

        state.submit_head = head;
        flush(queue, pool, &mut batch)
    }
}

fn flush(
    queue: &CommandQueue,
    pool: &CommandListPool,
    batch: &mut Vec<CommandList>,
) -> Result<(), GraphError> {
    if batch.is_empty() {
        return Ok(());
    }
    let refs: Vec<&CommandList> = batch.iter().collect();
    queue.execute_command_lists(&refs)?;
    for list in batch.drain(..) {
        pool.recycle(list);
    }
    Ok(())
}

/// Records a compiled graph across a fixed pool of worker threads and
/// submits the resulting command lists in declaration order.
///
/// Compilation is single-threaded and fully precedes recording; the only
/// parallel work is independent command-list recording.
pub struct FrameGraphExecuter {
    queue: Arc<CommandQueue>,
    worker_count: usize,
    pool: CommandListPool,
    /// One allocator per worker per in-flight frame; reset only once the
    /// frame fence proves the GPU finished the frame that used the slot.
    frame_allocators: Vec<Vec<CommandAllocator>>,
}

impl FrameGraphExecuter {
    pub fn new(
        device: &Device,
        queue: Arc<CommandQueue>,
        worker_count: usize,
        in_flight_frames: usize,
    ) -> Self {
        let worker_count = worker_count.max(1);
        let frame_allocators = (0..in_flight_frames.max(1))
            .map(|_| {
                (0..worker_count)
                    .map(|_| device.create_command_allocator())
                    .collect()
            })
            .collect();

        Self {
            queue,
            worker_count,
            pool: CommandListPool::new(device.clone()),
            frame_allocators,
        }
    }

    /// Reset the command allocators of one frame slot. Only safe once the
    /// GPU has finished the frame that previously used this slot.
    pub fn reset_frame(&self, frame_index: usize) {
        for allocator in &self.frame_allocators[frame_index] {
            allocator.reset();
        }
    }

    pub fn execute(
        &self,
        data: &FrameGraphData,
        frame_index: usize,
        frame_releaser: &ResourceReleaser,
    ) -> Result<(), GraphError> {
        if data.nodes.is_empty() {
            return Ok(());
        }

        let scheduler = TaskScheduler::new(data.nodes.len());

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..self.worker_count)
                .map(|worker| {
                    let scheduler = &scheduler;
                    scope.spawn(move || {
                        self.worker_loop(worker, frame_index, data, scheduler, frame_releaser)
                    })
                })
                .collect();

            // a failed worker marks the scheduler aborted, so the others wind
            // down instead of stalling behind a hole in the submission chain
            let mut first_error = None;
            for handle in handles {
                match handle.join() {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        first_error.get_or_insert(err);
                    }
                    Err(_) => {
                        first_error.get_or_insert(GraphError::WorkerPanicked);
                    }
                }
            }
            match first_error {
                None => Ok(()),
                Some(err) => Err(err),
            }
        })
    }

    fn worker_loop(
        &self,
        worker: usize,
        frame_index: usize,
        data: &FrameGraphData,
        scheduler: &TaskScheduler,
        frame_releaser: &ResourceReleaser,
    ) -> Result<(), GraphError> {
        let allocator = &self.frame_allocators[frame_index][worker];

        loop {
            let Some(task) = scheduler.request_task() else {
                return Ok(());
            };

            let mut list = self.pool.acquire();
            list.begin(allocator);

            let mut submission = PassSubmission::Batched;
            for node_idx in task.clone() {
                match data.nodes[node_idx].execute(&mut list, data, frame_releaser) {
                    Ok(request) => submission = request,
                    Err(err) => {
                        glog::warn!(
                            "pass '{}' failed to record, aborting graph execution",
                            data.nodes[node_idx].name()
                        );
                        scheduler.abort();
                        self.pool.recycle(list);
                        return Err(err);
                    }
                }
            }

            if let Err(err) = list.close() {
                scheduler.abort();
                return Err(err.into());
            }
            if let Err(err) = scheduler.submit_task(task, list, submission, &self.queue, &self.pool)
            {
                scheduler.abort();
                return Err(err);
            }
        }
    }
}
