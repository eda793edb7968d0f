//! Parallel execution of a task graph.
//!
//! The executor runs a scheduling loop on the calling thread and hands
//! tasks to a fixed pool of workers. Status mutations happen only on the
//! scheduler thread; workers report results through a channel. Observer
//! callbacks are likewise invoked on the scheduler thread, so they are
//! serialized without any per-observer locking.

use crate::error::{ProjectError, ProjectResult};
use crate::graph::TaskGraph;
use crate::identifier::TaskId;
use crate::task::{TaskHandle, TaskKind, TaskStatus, TaskStatusType};
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::any::Any;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::JoinHandle;
use std::{io, thread};

assert_obj_safe!(GraphExecutorObserver);

/// Receives scheduling events. All callbacks run on the scheduler thread
/// and must not block.
pub trait GraphExecutorObserver {
    fn before_graph(&mut self, _graph: &TaskGraph) {}
    fn before_task(&mut self, _task: &TaskHandle) {}
    fn after_task(&mut self, _task: &TaskHandle, _status: &TaskStatus) {}
    fn after_graph(&mut self, _graph: &TaskGraph) {}
}

/// The default observer: reports task outcomes through the log facade.
#[derive(Debug, Default)]
pub struct LoggingObserver;

impl GraphExecutorObserver for LoggingObserver {
    fn before_graph(&mut self, graph: &TaskGraph) {
        debug!("executing graph with {} task(s)", graph.len());
    }

    fn before_task(&mut self, task: &TaskHandle) {
        debug!("> Task {}", task.id());
    }

    fn after_task(&mut self, task: &TaskHandle, status: &TaskStatus) {
        match status.ty() {
            TaskStatusType::Failed => match status.message() {
                Some(message) => error!("> Task {} FAILED: {}", task.id(), message),
                None => error!("> Task {} FAILED", task.id()),
            },
            ty => info!("> Task {} - {}", task.id(), ty),
        }
    }

    fn after_graph(&mut self, graph: &TaskGraph) {
        debug!(
            "graph execution finished, {} task(s) failed",
            graph.failed_tasks().len()
        );
    }
}

struct Completion {
    id: TaskId,
    status: TaskStatus,
}

/// A fixed pool of worker threads fed over a channel. Dropping the pool
/// disconnects the work channel and joins every worker.
struct WorkerPool {
    work: Option<Sender<TaskHandle>>,
    results: Receiver<Completion>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    fn start(size: usize) -> io::Result<WorkerPool> {
        let (work_sender, work_receiver) = unbounded::<TaskHandle>();
        let (result_sender, result_receiver) = unbounded::<Completion>();
        let mut handles = vec![];
        for worker in 0..size {
            let work_receiver = work_receiver.clone();
            let result_sender = result_sender.clone();
            let handle = thread::Builder::new()
                .name(format!("kraken-worker-{}", worker))
                .spawn(move || {
                    for task in work_receiver.iter() {
                        let status = run_task(&task);
                        if result_sender
                            .send(Completion {
                                id: task.id().clone(),
                                status,
                            })
                            .is_err()
                        {
                            break;
                        }
                    }
                })?;
            handles.push(handle);
        }
        Ok(WorkerPool {
            work: Some(work_sender),
            results: result_receiver,
            handles,
        })
    }

    fn submit(&self, task: TaskHandle) -> ProjectResult<()> {
        match &self.work {
            Some(sender) => sender
                .send(task)
                .map_err(|_| ProjectError::custom("worker pool disconnected")),
            None => Err(ProjectError::custom("worker pool already shut down")),
        }
    }

    fn recv(&self) -> ProjectResult<Completion> {
        self.results
            .recv()
            .map_err(|_| ProjectError::custom("all workers disconnected"))
    }

    fn try_recv(&self) -> Option<Completion> {
        self.results.try_recv().ok()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.work = None;
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Runs a task on a worker. Never panics and never returns a non-result:
/// action errors and panics both become `FAILED` statuses with a captured
/// message.
fn run_task(task: &TaskHandle) -> TaskStatus {
    let result = catch_unwind(AssertUnwindSafe(|| task.with(|t| t.execute())));
    match result {
        Ok(Ok(status)) => status,
        Ok(Err(exception)) => TaskStatus::failed(exception),
        Err(panic) => TaskStatus::failed(format!("task panicked: {}", panic_message(&panic))),
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("unknown panic")
    }
}

/// The parallel scheduler, bounded by a worker budget.
#[derive(Debug, Clone)]
pub struct GraphExecutor {
    workers: NonZeroUsize,
}

impl Default for GraphExecutor {
    fn default() -> Self {
        Self {
            workers: NonZeroUsize::new(num_cpus::get())
                .expect("number of cpus should never be 0"),
        }
    }
}

impl GraphExecutor {
    pub fn new(workers: NonZeroUsize) -> Self {
        Self { workers }
    }

    pub fn workers(&self) -> NonZeroUsize {
        self.workers
    }

    /// Drive the graph to completion.
    ///
    /// Launches every ready task that does not share a non-strict edge with
    /// an in-flight task, up to the worker budget, then blocks for at least
    /// one completion. The loop ends when the graph is complete or when
    /// nothing is ready and nothing is in flight (everything left is
    /// dormant behind a failure). Background tasks are torn down in reverse
    /// start order before this returns.
    pub fn execute(
        &self,
        graph: &mut TaskGraph,
        observer: &mut dyn GraphExecutorObserver,
    ) -> ProjectResult<()> {
        observer.before_graph(graph);
        let pool = WorkerPool::start(self.workers.get())?;
        let mut in_flight: HashSet<TaskId> = HashSet::new();
        let mut started_order: Vec<TaskId> = vec![];

        while !graph.is_complete() {
            let mut launched = false;
            for id in graph.ready() {
                if in_flight.len() >= self.workers.get() {
                    break;
                }
                // a launched background task keeps its PENDING status until
                // its start call returns, so it must be skipped here
                if in_flight.contains(&id) || has_soft_conflict(graph, &id, &in_flight) {
                    continue;
                }
                let handle = graph
                    .task(&id)
                    .ok_or_else(|| ProjectError::UnknownTask(id.clone()))?;
                let background = handle.with(|t| matches!(t.kind(), TaskKind::Background(_)));
                if !background {
                    graph.set_status(&id, TaskStatus::running())?;
                }
                observer.before_task(&handle);
                in_flight.insert(id.clone());
                pool.submit(handle)?;
                launched = true;
            }

            if !launched && in_flight.is_empty() {
                // everything left is dormant behind a failure
                break;
            }

            let completion = pool.recv()?;
            self.record(graph, observer, completion, &mut in_flight, &mut started_order)?;
            while let Some(completion) = pool.try_recv() {
                self.record(graph, observer, completion, &mut in_flight, &mut started_order)?;
            }
        }

        // tear down background tasks in reverse start order
        for id in started_order.iter().rev() {
            if graph.get_status(id).map(|s| s.ty()) != Some(TaskStatusType::Started) {
                continue;
            }
            let handle = graph
                .task(id)
                .ok_or_else(|| ProjectError::UnknownTask(id.clone()))?;
            debug!("tearing down background task {}", id);
            let status = match handle.with(|t| t.teardown()) {
                Ok(()) => TaskStatus::succeeded(),
                Err(exception) => TaskStatus::failed(exception),
            };
            graph.set_status(id, status)?;
        }

        observer.after_graph(graph);
        Ok(())
    }

    fn record(
        &self,
        graph: &mut TaskGraph,
        observer: &mut dyn GraphExecutorObserver,
        completion: Completion,
        in_flight: &mut HashSet<TaskId>,
        started_order: &mut Vec<TaskId>,
    ) -> ProjectResult<()> {
        let Completion { id, status } = completion;
        in_flight.remove(&id);
        let handle = graph
            .task(&id)
            .ok_or_else(|| ProjectError::UnknownTask(id.clone()))?;
        let background = handle.with(|t| matches!(t.kind(), TaskKind::Background(_)));
        match status.ty() {
            TaskStatusType::Started if background => {
                // the background work is up; dependants may run from here on
                graph.set_status(&id, status.clone())?;
                started_order.push(id);
            }
            TaskStatusType::Succeeded
            | TaskStatusType::Failed
            | TaskStatusType::Skipped
            | TaskStatusType::UpToDate => {
                graph.set_status(&id, status.clone())?;
            }
            other => {
                let status =
                    TaskStatus::failed(format!("task returned non-terminal status {}", other));
                graph.set_status(&id, status.clone())?;
                observer.after_task(&handle, &status);
                return Ok(());
            }
        }
        observer.after_task(&handle, &status);
        Ok(())
    }
}

/// Whether launching `id` would put two ends of a non-strict edge in flight
/// at once.
fn has_soft_conflict(graph: &TaskGraph, id: &TaskId, in_flight: &HashSet<TaskId>) -> bool {
    in_flight.iter().any(|running| {
        let forward = graph.get_edge(id, running);
        let backward = graph.get_edge(running, id);
        forward.map(|edge| !edge.strict).unwrap_or(false)
            || backward.map(|edge| !edge.strict).unwrap_or(false)
    })
}
