//! Tests for the graph executor: ordering, exclusivity, partial failure,
//! and background task teardown.

use kraken_core::context::{ProjectLoaderError, SharedContext};
use kraken_core::error::ProjectError;
use kraken_core::exception::{BuildException, BuildResult};
use kraken_core::executor::{GraphExecutor, GraphExecutorObserver};
use kraken_core::graph::TaskGraph;
use kraken_core::project::SharedProject;
use kraken_core::task::{
    BackgroundAction, Task, TaskHandle, TaskSpec, TaskStatus, TaskStatusType,
};
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn ok_loader(_: &SharedProject) -> Result<(), ProjectLoaderError> {
    Ok(())
}

fn context_with_project() -> (SharedContext, SharedProject) {
    let _ = env_logger::builder().is_test(true).try_init();
    let context = SharedContext::new("build");
    let project = context
        .load_project("example", &ok_loader)
        .expect("project should load");
    (context, project)
}

fn workers(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap()
}

/// A task action that appends its name to a shared log.
fn recording_action(
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
) -> impl Fn(&Task) -> BuildResult<TaskStatus> + Send + Sync + 'static {
    move |_task: &Task| {
        log.lock().push(name.to_string());
        Ok(TaskStatus::succeeded())
    }
}

#[derive(Default)]
struct RecordingObserver {
    events: Vec<String>,
}

impl GraphExecutorObserver for RecordingObserver {
    fn before_graph(&mut self, _graph: &TaskGraph) {
        self.events.push("before-graph".to_string());
    }

    fn before_task(&mut self, task: &TaskHandle) {
        self.events.push(format!("before:{}", task.path()));
    }

    fn after_task(&mut self, task: &TaskHandle, status: &TaskStatus) {
        self.events
            .push(format!("after:{}:{}", task.path(), status.ty()));
    }

    fn after_graph(&mut self, _graph: &TaskGraph) {
        self.events.push("after-graph".to_string());
    }
}

#[test]
fn linear_chain_runs_in_order() {
    let (context, project) = context_with_project();
    let log = Arc::new(Mutex::new(Vec::new()));
    let task_a = project
        .do_task("a", TaskSpec::action(recording_action("a", log.clone())))
        .unwrap();
    let task_b = project
        .do_task("b", TaskSpec::action(recording_action("b", log.clone())))
        .unwrap();
    let task_c = project
        .do_task("c", TaskSpec::action(recording_action("c", log.clone())))
        .unwrap();
    task_c.depends_on(&task_b);
    task_b.depends_on(&task_a);
    context.finalize().unwrap();

    let mut graph = TaskGraph::build(&context, &[task_c.clone()]).unwrap();
    let mut observer = RecordingObserver::default();
    GraphExecutor::new(workers(4))
        .execute(&mut graph, &mut observer)
        .unwrap();

    assert!(graph.is_complete());
    assert_eq!(*log.lock(), vec!["a", "b", "c"]);
    for task in [&task_a, &task_b, &task_c] {
        assert_eq!(
            graph.get_status(task.id()).unwrap().ty(),
            TaskStatusType::Succeeded
        );
    }

    // observer callbacks are serialized and ordered per task
    let events = &observer.events;
    assert_eq!(events.first().unwrap(), "before-graph");
    assert_eq!(events.last().unwrap(), "after-graph");
    for task in ["a", "b", "c"] {
        let before = events
            .iter()
            .position(|e| e == &format!("before::{}", task))
            .unwrap();
        let after = events
            .iter()
            .position(|e| e == &format!("after::{}:SUCCEEDED", task))
            .unwrap();
        assert!(before < after);
    }
}

#[test]
fn failures_keep_unrelated_tasks_running() {
    // d depends on b and c, c depends on a; b fails
    let (context, project) = context_with_project();
    let log = Arc::new(Mutex::new(Vec::new()));
    let task_a = project
        .do_task("a", TaskSpec::action(recording_action("a", log.clone())))
        .unwrap();
    let task_b = project
        .do_task(
            "b",
            TaskSpec::action(|_: &Task| -> BuildResult<TaskStatus> {
                Err(BuildException::new("boom"))
            }),
        )
        .unwrap();
    let task_c = project
        .do_task("c", TaskSpec::action(recording_action("c", log.clone())))
        .unwrap();
    let task_d = project
        .do_task("d", TaskSpec::action(recording_action("d", log.clone())))
        .unwrap();
    task_d.depends_on(&task_b);
    task_d.depends_on(&task_c);
    task_c.depends_on(&task_a);
    context.finalize().unwrap();

    let mut graph = TaskGraph::build(&context, &[task_d.clone()]).unwrap();
    GraphExecutor::new(workers(2))
        .execute(&mut graph, &mut RecordingObserver::default())
        .unwrap();

    // a and c still ran, d stayed dormant
    assert_eq!(
        {
            let mut ran = log.lock().clone();
            ran.sort();
            ran
        },
        vec!["a", "c"]
    );
    let failed = graph.failed_tasks();
    assert_eq!(
        failed.into_iter().map(|id| id.to_string()).collect::<Vec<_>>(),
        vec![":b"]
    );
    assert_eq!(
        graph.get_status(task_b.id()).unwrap().message(),
        Some("boom")
    );
    assert!(graph.get_status(task_d.id()).is_none(), "d never started");
    assert!(!graph.is_complete());
}

#[test]
fn build_errors_carry_the_failed_task_paths() {
    let (context, project) = context_with_project();
    project
        .do_task(
            "broken",
            TaskSpec::action(|_: &Task| -> BuildResult<TaskStatus> {
                Err(BuildException::new("nope"))
            }),
        )
        .unwrap();

    match context.execute(Some(&["broken"])) {
        Err(ProjectError::Build(error)) => {
            assert_eq!(error.to_string(), "task \":broken\" failed");
        }
        other => panic!("expected a build error, got {:?}", other),
    }
}

#[test]
fn panics_become_failed_statuses() {
    let (context, project) = context_with_project();
    let task = project
        .do_task(
            "panicky",
            TaskSpec::action(|_: &Task| -> BuildResult<TaskStatus> {
                panic!("worker must survive this")
            }),
        )
        .unwrap();
    context.finalize().unwrap();

    let mut graph = TaskGraph::build(&context, &[task.clone()]).unwrap();
    GraphExecutor::new(workers(1))
        .execute(&mut graph, &mut RecordingObserver::default())
        .unwrap();

    let status = graph.get_status(task.id()).unwrap();
    assert_eq!(status.ty(), TaskStatusType::Failed);
    assert!(status.message().unwrap().contains("worker must survive this"));
}

#[test]
fn soft_edges_forbid_concurrency_but_not_completion() {
    let (context, project) = context_with_project();
    let running = Arc::new(AtomicUsize::new(0));
    let overlapped = Arc::new(AtomicUsize::new(0));

    let exclusive_action = |running: Arc<AtomicUsize>, overlapped: Arc<AtomicUsize>| {
        move |_: &Task| -> BuildResult<TaskStatus> {
            if running.fetch_add(1, Ordering::SeqCst) > 0 {
                overlapped.fetch_add(1, Ordering::SeqCst);
            }
            thread::sleep(Duration::from_millis(40));
            running.fetch_sub(1, Ordering::SeqCst);
            Ok(TaskStatus::succeeded())
        }
    };

    let task_a = project
        .do_task(
            "a",
            TaskSpec::action(exclusive_action(running.clone(), overlapped.clone())),
        )
        .unwrap();
    let task_b = project
        .do_task(
            "b",
            TaskSpec::action(exclusive_action(running.clone(), overlapped.clone())),
        )
        .unwrap();
    // ordered but independent: never in flight together
    task_b.runs_after(&task_a);
    context.finalize().unwrap();

    let mut graph = TaskGraph::build(&context, &[task_a.clone(), task_b.clone()]).unwrap();
    GraphExecutor::new(workers(2))
        .execute(&mut graph, &mut RecordingObserver::default())
        .unwrap();

    assert!(graph.is_complete());
    assert_eq!(overlapped.load(Ordering::SeqCst), 0);
    for task in [&task_a, &task_b] {
        assert_eq!(
            graph.get_status(task.id()).unwrap().ty(),
            TaskStatusType::Succeeded
        );
    }
}

#[test]
fn worker_budget_bounds_parallelism() {
    let (context, project) = context_with_project();
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let join = project.do_task("join", TaskSpec::void()).unwrap();
    for i in 0..8 {
        let running = running.clone();
        let peak = peak.clone();
        let task = project
            .do_task(
                &format!("minor{}", i),
                TaskSpec::action(move |_: &Task| -> BuildResult<TaskStatus> {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(TaskStatus::succeeded())
                }),
            )
            .unwrap();
        join.depends_on(&task);
    }
    context.finalize().unwrap();

    let mut graph = TaskGraph::build(&context, &[join.clone()]).unwrap();
    GraphExecutor::new(workers(2))
        .execute(&mut graph, &mut RecordingObserver::default())
        .unwrap();

    assert!(graph.is_complete());
    let peak = peak.load(Ordering::SeqCst);
    assert!(peak <= 2, "peak parallelism was {}", peak);
    assert!(peak >= 1);
}

/// Background work recording its start and teardown.
struct Service {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

impl BackgroundAction for Service {
    fn start(&self, _task: &Task) -> BuildResult<()> {
        self.log.lock().push(format!("start:{}", self.name));
        Ok(())
    }

    fn teardown(&self, _task: &Task) -> BuildResult<()> {
        self.log.lock().push(format!("teardown:{}", self.name));
        Ok(())
    }
}

#[test]
fn background_tasks_start_and_tear_down_in_reverse_order() {
    let (context, project) = context_with_project();
    let log = Arc::new(Mutex::new(Vec::new()));

    let server = project
        .do_task(
            "server",
            TaskSpec::background(Service {
                name: "server",
                log: log.clone(),
            }),
        )
        .unwrap();
    let proxy = project
        .do_task(
            "proxy",
            TaskSpec::background(Service {
                name: "proxy",
                log: log.clone(),
            }),
        )
        .unwrap();
    // the proxy needs the server before it can start
    proxy.depends_on(&server);

    let smoke = project
        .do_task("smoke", TaskSpec::action(recording_action("smoke", log.clone())))
        .unwrap();
    smoke.depends_on(&proxy);
    context.finalize().unwrap();

    let mut graph = TaskGraph::build(&context, &[smoke.clone()]).unwrap();
    GraphExecutor::new(workers(2))
        .execute(&mut graph, &mut RecordingObserver::default())
        .unwrap();

    // dependants ran while the services stayed up; teardown happened after
    // everything else, in reverse start order
    assert_eq!(
        *log.lock(),
        vec![
            "start:server",
            "start:proxy",
            "smoke",
            "teardown:proxy",
            "teardown:server"
        ]
    );
    for task in [&server, &proxy] {
        assert_eq!(
            graph.get_status(task.id()).unwrap().ty(),
            TaskStatusType::Succeeded
        );
    }
    assert_eq!(
        graph.get_status(smoke.id()).unwrap().ty(),
        TaskStatusType::Succeeded
    );
}

#[test]
fn failing_teardown_marks_the_background_task_failed() {
    struct BrokenTeardown;

    impl BackgroundAction for BrokenTeardown {
        fn start(&self, _task: &Task) -> BuildResult<()> {
            Ok(())
        }

        fn teardown(&self, _task: &Task) -> BuildResult<()> {
            Err(BuildException::new("port already released"))
        }
    }

    let (context, project) = context_with_project();
    let service = project
        .do_task("service", TaskSpec::background(BrokenTeardown))
        .unwrap();
    context.finalize().unwrap();

    let mut graph = TaskGraph::build(&context, &[service.clone()]).unwrap();
    GraphExecutor::new(workers(1))
        .execute(&mut graph, &mut RecordingObserver::default())
        .unwrap();

    let status = graph.get_status(service.id()).unwrap();
    assert_eq!(status.ty(), TaskStatusType::Failed);
    assert_eq!(status.message(), Some("port already released"));
}

#[test]
fn group_targets_execute_members_then_report_up_to_date() {
    let (context, project) = context_with_project();
    let log = Arc::new(Mutex::new(Vec::new()));
    let task_a = project
        .do_task("a", TaskSpec::action(recording_action("a", log.clone())))
        .unwrap();
    let task_b = project
        .do_task("b", TaskSpec::action(recording_action("b", log.clone())))
        .unwrap();
    let group = project.group("g").unwrap();
    group.add_member(&task_a).unwrap();
    group.add_member(&task_b).unwrap();
    context.finalize().unwrap();

    let mut graph = TaskGraph::build(&context, &[group.clone()]).unwrap();
    GraphExecutor::new(workers(2))
        .execute(&mut graph, &mut RecordingObserver::default())
        .unwrap();

    assert!(graph.is_complete());
    assert_eq!(
        graph.get_status(group.id()).unwrap().ty(),
        TaskStatusType::UpToDate
    );
    let mut ran = log.lock().clone();
    ran.sort();
    assert_eq!(ran, vec!["a", "b"]);
}

#[test]
fn void_tasks_are_skipped() {
    let (context, project) = context_with_project();
    let task = project.do_task("noop", TaskSpec::void()).unwrap();
    context.finalize().unwrap();

    let mut graph = TaskGraph::build(&context, &[task.clone()]).unwrap();
    GraphExecutor::new(workers(1))
        .execute(&mut graph, &mut RecordingObserver::default())
        .unwrap();

    assert_eq!(
        graph.get_status(task.id()).unwrap().ty(),
        TaskStatusType::Skipped
    );
}

#[test]
fn properties_flow_between_tasks_during_execution() {
    let (context, project) = context_with_project();

    let producer = project
        .do_task(
            "producer",
            TaskSpec::action(|task: &Task| -> BuildResult<TaskStatus> {
                task.property::<String>("result")?.set("42".to_string())?;
                Ok(TaskStatus::succeeded())
            })
            .output::<String>("result"),
        )
        .unwrap();

    let seen = Arc::new(Mutex::new(None::<String>));
    let seen_by_consumer = seen.clone();
    let source = producer.property::<String>("result").unwrap();
    let consumer = project
        .do_task(
            "consumer",
            TaskSpec::action(move |task: &Task| -> BuildResult<TaskStatus> {
                let value = task.property::<String>("source")?.get()?;
                *seen_by_consumer.lock() = Some(value);
                Ok(TaskStatus::succeeded())
            })
            .input::<String>("source")
            .assign_supplier("source", source.map(|v| format!("value={}", v))),
        )
        .unwrap();
    context.finalize().unwrap();

    let mut graph = TaskGraph::build(&context, &[consumer.clone()]).unwrap();
    GraphExecutor::new(workers(2))
        .execute(&mut graph, &mut RecordingObserver::default())
        .unwrap();

    assert!(graph.is_complete());
    assert_eq!(seen.lock().clone(), Some("value=42".to_string()));
}

#[test]
fn execute_resolves_defaults_and_succeeds_on_empty_selection() {
    let (context, _project) = context_with_project();
    // only the default groups exist; they all execute as UP-TO-DATE
    context.execute::<&str>(None).unwrap();
}
