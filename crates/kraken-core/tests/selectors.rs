//! Tests for selector resolution, the project namespace, and the context
//! life cycle.

use kraken_core::context::{
    ContextEvent, ContextEventType, ProjectLoaderError, SharedContext,
};
use kraken_core::error::ProjectError;
use kraken_core::project::SharedProject;
use kraken_core::property::PropertyError;
use kraken_core::task::{TaskHandle, TaskSpec};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

fn ok_loader(_: &SharedProject) -> Result<(), ProjectLoaderError> {
    Ok(())
}

fn paths(handles: &[TaskHandle]) -> HashSet<String> {
    handles.iter().map(|h| h.path()).collect()
}

/// root and a subproject `sub`, each containing a task named `task`.
fn tree_with_shadowed_task() -> (SharedContext, SharedProject, SharedProject) {
    let context = SharedContext::new("build");
    let root = context.load_project("example", &ok_loader).unwrap();
    let sub = root.subproject("sub").unwrap();
    root.do_task("task", TaskSpec::void()).unwrap();
    sub.do_task("task", TaskSpec::void()).unwrap();
    (context, root, sub)
}

#[test]
fn bare_name_matches_subtree() {
    let (_context, root, sub) = tree_with_shadowed_task();

    let from_root = root.resolve_tasks("task").unwrap();
    assert_eq!(
        paths(&from_root),
        HashSet::from([":task".to_string(), ":sub:task".to_string()])
    );

    let from_sub = sub.resolve_tasks("task").unwrap();
    assert_eq!(paths(&from_sub), HashSet::from([":sub:task".to_string()]));
}

#[test]
fn absolute_name_matches_root_only() {
    let (_context, _root, sub) = tree_with_shadowed_task();

    let from_sub = sub.resolve_tasks(":task").unwrap();
    assert_eq!(paths(&from_sub), HashSet::from([":task".to_string()]));
}

#[test]
fn project_path_is_exact() {
    let (_context, root, sub) = tree_with_shadowed_task();

    let relative = root.resolve_tasks("sub:task").unwrap();
    assert_eq!(paths(&relative), HashSet::from([":sub:task".to_string()]));

    let absolute = sub.resolve_tasks(":sub:task").unwrap();
    assert_eq!(paths(&absolute), HashSet::from([":sub:task".to_string()]));
}

#[test]
fn optional_selectors_permit_empty_matches() {
    let (_context, root, _sub) = tree_with_shadowed_task();

    assert!(root.resolve_tasks("missing?").unwrap().is_empty());
    assert!(root.resolve_tasks("nowhere:task?").unwrap().is_empty());

    assert!(matches!(
        root.resolve_tasks("missing"),
        Err(ProjectError::NoSuchTask { .. })
    ));
    assert!(matches!(
        root.resolve_tasks("nowhere:task"),
        Err(ProjectError::NoSuchProject { .. })
    ));
}

#[test]
fn resolving_many_selectors_deduplicates() {
    let (_context, root, _sub) = tree_with_shadowed_task();

    let resolved = root.resolve_all(&["task", ":task", "sub:task"]).unwrap();
    assert_eq!(resolved.len(), 2);
}

#[test]
fn every_project_is_seeded_with_default_groups() {
    let (_context, root, sub) = tree_with_shadowed_task();

    for project in [&root, &sub] {
        for group in [
            "apply",
            "fmt",
            "check",
            "lint",
            "build",
            "test",
            "integrationTest",
            "publish",
            "deploy",
        ] {
            let task = project.task_named(group).unwrap();
            assert!(task.with(|t| t.is_group()), "{} should be a group", group);
        }
    }

    // check, lint and test run by default; the rest do not
    let defaults: HashSet<String> = root
        .default_tasks()
        .into_iter()
        .map(|t| t.path())
        .collect();
    assert_eq!(
        defaults,
        HashSet::from([
            ":check".to_string(),
            ":lint".to_string(),
            ":test".to_string(),
            ":sub:check".to_string(),
            ":sub:lint".to_string(),
            ":sub:test".to_string(),
        ])
    );
}

#[test]
fn tasks_and_subprojects_share_a_namespace() {
    let context = SharedContext::new("build");
    let root = context.load_project("example", &ok_loader).unwrap();
    root.subproject("sub").unwrap();

    assert!(matches!(
        root.do_task("sub", TaskSpec::void()),
        Err(ProjectError::DuplicateMember { .. })
    ));
    assert!(matches!(
        root.subproject("sub"),
        Err(ProjectError::DuplicateMember { .. })
    ));
    assert!(matches!(
        root.group("sub"),
        Err(ProjectError::DuplicateMember { .. })
    ));

    root.do_task("compile", TaskSpec::void()).unwrap();
    assert!(matches!(
        root.group("compile"),
        Err(ProjectError::NotAGroup(_))
    ));
}

#[test]
fn current_scopes_are_established_during_load() {
    let context = SharedContext::new("build");
    assert!(SharedContext::current().is_none());
    assert!(SharedProject::current().is_none());

    let seen = Arc::new(Mutex::new(None::<String>));
    let seen_in_loader = seen.clone();
    let loader = move |project: &SharedProject| -> Result<(), ProjectLoaderError> {
        let current = SharedProject::current().expect("a current project");
        assert_eq!(&current, project);
        assert!(SharedContext::current().is_some());
        *seen_in_loader.lock() = Some(current.path());
        Ok(())
    };
    context.load_project("example", &loader).unwrap();

    assert_eq!(seen.lock().clone(), Some(":".to_string()));
    // released on every exit path
    assert!(SharedContext::current().is_none());
    assert!(SharedProject::current().is_none());
}

#[test]
fn failed_loads_unregister_the_partial_project() {
    let context = SharedContext::new("build");
    let loader = |project: &SharedProject| -> Result<(), ProjectLoaderError> {
        project
            .do_task("partial", TaskSpec::void())
            .map_err(ProjectLoaderError::new)?;
        Err(ProjectLoaderError::new("script blew up"))
    };

    assert!(matches!(
        context.load_project("example", &loader),
        Err(ProjectError::Loader(_))
    ));
    assert!(context.root_project().is_none());
    // the current scopes were released on the failure path too
    assert!(SharedProject::current().is_none());

    // a fresh load still works
    let root = context.load_project("example", &ok_loader).unwrap();
    assert!(root.task_named("partial").is_none());
}

#[test]
fn later_loads_create_subprojects_of_the_root() {
    let context = SharedContext::new("build");
    let root = context.load_project("example", &ok_loader).unwrap();
    let sub_loader =
        |project: &SharedProject| -> Result<(), ProjectLoaderError> {
            project
                .do_task("compile", TaskSpec::void())
                .map_err(ProjectLoaderError::new)?;
            Ok(())
        };
    let loaded = context.load_project("example/library", &sub_loader).unwrap();

    assert_eq!(loaded.path(), ":library");
    assert_eq!(root.subprojects().len(), 1);
    assert!(context
        .root_project()
        .unwrap()
        .resolve_tasks("library:compile")
        .is_ok());
}

#[test]
fn events_fire_in_order_with_any_listeners_first() {
    let context = SharedContext::new("build");
    let events = Arc::new(Mutex::new(Vec::<String>::new()));

    let log = events.clone();
    context.listen(ContextEventType::Any, move |event: &ContextEvent| {
        log.lock().push(format!("any:{:?}", event.event_type()));
        Ok(())
    });
    let log = events.clone();
    context.listen(ContextEventType::ProjectInit, move |event: &ContextEvent| {
        if let ContextEvent::ProjectInit(project) = event {
            log.lock().push(format!("init:{}", project.path()));
        }
        Ok(())
    });
    let log = events.clone();
    context.listen(
        ContextEventType::ContextFinalized,
        move |_: &ContextEvent| {
            log.lock().push("context-finalized".to_string());
            Ok(())
        },
    );

    let root = context.load_project("example", &ok_loader).unwrap();
    root.subproject("sub").unwrap();
    context.finalize().unwrap();

    let recorded = events.lock().clone();
    assert_eq!(
        recorded,
        vec![
            "any:ProjectInit".to_string(),
            "init::".to_string(),
            "any:ProjectLoaded".to_string(),
            "any:ProjectInit".to_string(),
            "init::sub".to_string(),
            "any:ContextBeginFinalize".to_string(),
            "any:ProjectBeginFinalize".to_string(),
            "any:ProjectFinalized".to_string(),
            "any:ProjectBeginFinalize".to_string(),
            "any:ProjectFinalized".to_string(),
            "any:ContextFinalized".to_string(),
            "context-finalized".to_string(),
        ]
    );
}

#[test]
fn listener_errors_propagate() {
    let context = SharedContext::new("build");
    context.listen(ContextEventType::ProjectInit, |_: &ContextEvent| {
        Err(ProjectError::custom("listener rejected the project"))
    });

    assert!(matches!(
        context.load_project("example", &ok_loader),
        Err(ProjectError::Custom(_))
    ));
}

#[test]
fn finalize_is_idempotent_and_freezes_everything() {
    let context = SharedContext::new("build");
    let root = context.load_project("example", &ok_loader).unwrap();
    let task = root
        .do_task(
            "render",
            TaskSpec::void()
                .input::<String>("content")
                .output::<String>("written")
                .assign("content", "hello".to_string()),
        )
        .unwrap();

    context.finalize().unwrap();
    context.finalize().unwrap(); // logs and no-ops

    // non-output properties are read-only now
    let content = task.property::<String>("content").unwrap();
    assert_eq!(content.get().unwrap(), "hello");
    assert!(matches!(
        content.set("other".to_string()),
        Err(PropertyError::Finalized { .. })
    ));

    // output properties stay writable for the executing task
    let written = task.property::<String>("written").unwrap();
    written.set("out.txt".to_string()).unwrap();

    // no new members may be registered
    assert!(matches!(
        root.do_task("late", TaskSpec::void()),
        Err(ProjectError::AlreadyFinalized)
    ));
    assert!(matches!(
        root.subproject("late"),
        Err(ProjectError::AlreadyFinalized)
    ));
}

#[test]
fn unknown_assignment_keys_warn_but_do_not_fail() {
    let context = SharedContext::new("build");
    let root = context.load_project("example", &ok_loader).unwrap();
    // "typo" is not part of the schema; the assignment is dropped with a
    // warning
    let task = root
        .do_task(
            "render",
            TaskSpec::void()
                .input::<String>("content")
                .assign("typo", "value".to_string()),
        )
        .unwrap();
    assert!(task.property::<String>("content").unwrap().try_get().is_none());
}

#[test]
fn do_task_assigns_groups_and_defaults() {
    let context = SharedContext::new("build");
    let root = context.load_project("example", &ok_loader).unwrap();
    let task = root
        .do_task(
            "compile",
            TaskSpec::void()
                .description("compiles the sources")
                .default(true)
                .group("build"),
        )
        .unwrap();

    assert!(task.default());
    let build = root.group("build").unwrap();
    let members = build.with(|t| t.members().unwrap().to_vec());
    assert_eq!(members.len(), 1);

    let defaults = paths(&root.default_tasks());
    assert!(defaults.contains(":compile"));

    // groups can be reconfigured in place
    let docs = root
        .group_with("docs", true, "builds the documentation".to_string())
        .unwrap();
    assert!(docs.default());
    let again = root.group_with("docs", None, None).unwrap();
    assert!(again.default(), "reconfiguring with None changes nothing");
}

#[test]
fn resolve_tasks_with_no_targets_selects_defaults() {
    let (context, _root, _sub) = tree_with_shadowed_task();
    let resolved = context.resolve_tasks::<&str>(None).unwrap();
    let resolved = paths(&resolved);
    assert!(resolved.contains(":check"));
    assert!(resolved.contains(":sub:test"));
    assert!(!resolved.contains(":task"));
}
