//! Integration tests for task execution
//!
//! These tests drive tasks end to end through the router and the task
//! manager, using the built-in applets plus mock actions.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tasker_rs::engine::applet::{
    ids, Action, ActionOutput, AppletCall, AppletId, AppletNode, AppletRegistry, AppletTree,
    NodeKind, Value,
};
use tasker_rs::engine::error::StaticErrorCode;
use tasker_rs::engine::runtime::{Event, EventType, RunControl, ScopedKey, TaskRuntime};
use tasker_rs::engine::task::{
    EventRouter, RunOutcome, TaskManager, TaskMetadata, TaskStateListener, TaskType, XTask,
};
use tasker_rs::engine::{EngineConfig, EngineContext, EngineError};
use tasker_rs::tasker::applets::{self, EventTextSupplier, EXTRA_TEXT};
use tasker_rs::tasker::TaskLoader;
use tokio::sync::Notify;

// ============================================================================
// Mock Components
// ============================================================================

const COUNTED_CLICK: AppletId = AppletId(0x2000);
const GATE: AppletId = AppletId(0x2001);
const BOOM: AppletId = AppletId(0x2002);

/// Click action counting its invocations
#[derive(Default)]
struct CountingClick {
    clicks: AtomicUsize,
}

#[async_trait]
impl Action for CountingClick {
    async fn perform(
        &self,
        _call: &AppletCall<'_>,
    ) -> Result<ActionOutput, Box<dyn Error + Send + Sync>> {
        self.clicks.fetch_add(1, Ordering::SeqCst);
        Ok(ActionOutput::done())
    }
}

/// Action that blocks until the test lets it through
#[derive(Default)]
struct Gate {
    entered: AtomicUsize,
    open: Notify,
}

#[async_trait]
impl Action for Gate {
    async fn perform(
        &self,
        _call: &AppletCall<'_>,
    ) -> Result<ActionOutput, Box<dyn Error + Send + Sync>> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        self.open.notified().await;
        Ok(ActionOutput::done())
    }
}

/// Listener keeping the order of lifecycle callbacks
#[derive(Default)]
struct Recording {
    calls: Mutex<Vec<&'static str>>,
    event_counts: Mutex<Vec<usize>>,
}

impl Recording {
    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn push(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

impl TaskStateListener for Recording {
    fn on_started(&self, _task: &XTask, runtime: &TaskRuntime) {
        self.event_counts.lock().unwrap().push(runtime.events().len());
        self.push("started");
    }

    fn on_success(&self, _task: &XTask, _runtime: &TaskRuntime) {
        self.push("success");
    }

    fn on_failure(&self, _task: &XTask, _runtime: &TaskRuntime) {
        self.push("failure");
    }

    fn on_error(&self, _task: &XTask, _runtime: &TaskRuntime, _error: &EngineError) {
        self.push("error");
    }

    fn on_cancelled(&self, _task: &XTask, _runtime: &TaskRuntime) {
        self.push("cancelled");
    }
}

struct Fixture {
    manager: TaskManager,
    router: EventRouter,
    click: Arc<CountingClick>,
    gate: Arc<Gate>,
    listener: Arc<Recording>,
}

impl Fixture {
    fn new() -> Self {
        let registry = AppletRegistry::new();
        applets::register_builtin(&registry);
        let click = Arc::new(CountingClick::default());
        let gate = Arc::new(Gate::default());
        registry.register_action(COUNTED_CLICK, "counted-click", click.clone());
        registry.register_action(GATE, "gate", gate.clone());
        registry.register_action_fn(BOOM, "boom", |_| Err("target vanished".into()));

        let ctx = EngineContext::new(EngineConfig::default(), registry)
            .with_target_supplier(Arc::new(EventTextSupplier));
        let listener = Arc::new(Recording::default());
        let manager = TaskManager::new(Arc::new(ctx)).with_listener(listener.clone());
        Self {
            router: EventRouter::new(manager.clone()),
            manager,
            click,
            gate,
            listener,
        }
    }

    fn ctx(&self) -> &EngineContext {
        self.manager.context()
    }

    fn compile(&self, title: &str, task_type: TaskType, tree: AppletTree) -> Arc<XTask> {
        XTask::compile(self.ctx(), TaskMetadata::new(title, task_type), tree).unwrap()
    }

    async fn resident(&self, title: &str, tree: AppletTree) -> Arc<XTask> {
        let task = self.compile(title, TaskType::Resident, tree);
        self.manager.enable_resident(task.clone()).await.unwrap();
        task
    }

    fn clicks(&self) -> usize {
        self.click.clicks.load(Ordering::SeqCst)
    }

    fn global(&self, name: &str) -> Option<Value> {
        self.ctx().globals().get(&ScopedKey::global(name))
    }
}

static LOGIN_TASK: Lazy<String> = Lazy::new(|| {
    format!(
        r#"
title: Login clicker
type: resident
flow:
  - id: 0x01
    children: 3
  - id: 0x02
    children: 1
  - id: {entered}
  - id: 0x03
    children: 1
  - id: {text_is}
    value: Login
  - id: 0x05
    children: 1
  - id: {click}
"#,
        entered = ids::EVENT_BASE + EventType::PackageEntered.code() as u32,
        text_is = applets::TARGET_TEXT_IS.0,
        click = COUNTED_CLICK.0,
    )
});

fn login_tree(expected: &str) -> AppletTree {
    AppletTree::build(|root| {
        root.when(&[EventType::PackageEntered]);
        root.if_(|c| {
            c.criterion(applets::TARGET_TEXT_IS, expected);
        });
        root.then(|d| {
            d.action(COUNTED_CLICK);
        });
    })
}

fn entered_with_text(text: &str) -> Event {
    Event::with_component(EventType::PackageEntered, Some("com.example"), None, None)
        .with_extra(EXTRA_TEXT, text)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_login_clicked_when_text_matches() {
    let fx = Fixture::new();
    let task = TaskLoader::parse_task(fx.ctx(), &LOGIN_TASK).unwrap();
    fx.manager.enable_resident(task).await.unwrap();

    let runs = fx.router.on_events(vec![entered_with_text("Login")]).await;
    assert_eq!(runs.len(), 1);
    for run in runs {
        assert_eq!(run.await.unwrap(), RunOutcome::Success);
    }
    assert_eq!(fx.clicks(), 1);
}

#[tokio::test]
async fn test_login_not_clicked_for_other_text() {
    let fx = Fixture::new();
    let task = TaskLoader::parse_task(fx.ctx(), &LOGIN_TASK).unwrap();
    fx.manager.enable_resident(task.clone()).await.unwrap();

    for run in fx.router.on_events(vec![entered_with_text("Sign up")]).await {
        assert_eq!(run.await.unwrap(), RunOutcome::Failure);
    }
    assert_eq!(fx.clicks(), 0);
    assert!(task.is_enabled());

    let snapshots = fx.manager.snapshots(task.checksum()).await.unwrap();
    assert_eq!(snapshots[0].outcome, RunOutcome::Failure);
    assert!(snapshots[0].log.iter().any(|line| line.contains("Sign up")));
}

#[tokio::test]
async fn test_untriggered_events_start_nothing() {
    let fx = Fixture::new();
    fx.resident("login", login_tree("Login")).await;
    let runs = fx
        .router
        .on_events(vec![Event::new(EventType::PackageExited)])
        .await;
    assert!(runs.is_empty());
    assert!(fx.router.on_events(Vec::new()).await.is_empty());
}

#[tokio::test]
async fn test_duplicate_events_are_collapsed() {
    let fx = Fixture::new();
    fx.resident("login", login_tree("Login")).await;
    let event = entered_with_text("Login");
    for run in fx.router.on_events(vec![event.clone(), event]).await {
        run.await.unwrap();
    }
    assert_eq!(*fx.listener.event_counts.lock().unwrap(), vec![1]);
}

#[tokio::test]
async fn test_checksum_independent_of_construction() {
    let fx = Fixture::new();
    let parsed = TaskLoader::parse_task(fx.ctx(), &LOGIN_TASK).unwrap();
    let built = fx.compile("Login clicker", TaskType::Resident, login_tree("Login"));
    let changed = fx.compile("Login clicker", TaskType::Resident, login_tree("Log in"));
    assert_eq!(parsed.checksum(), built.checksum());
    assert_ne!(parsed.checksum(), changed.checksum());
}

#[tokio::test]
async fn test_forward_reference_fails_validation() {
    let fx = Fixture::new();
    let tree = AppletTree::build(|root| {
        root.then(|d| {
            d.add(AppletNode::new(applets::ECHO, NodeKind::Action).refer_to("greeting"));
            d.add(
                AppletNode::new(applets::ECHO, NodeKind::Action)
                    .with_value("hi")
                    .with_referent("greeting"),
            );
        });
    });
    let result = XTask::compile(fx.ctx(), TaskMetadata::new("t", TaskType::Oneshot), tree);
    match result {
        Err(EngineError::Static(e)) => assert_eq!(
            e.code,
            StaticErrorCode::UnresolvedReference("greeting".to_string())
        ),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_backward_reference_resolves() {
    let fx = Fixture::new();
    let tree = AppletTree::build(|root| {
        root.then(|d| {
            d.add(
                AppletNode::new(applets::ECHO, NodeKind::Action)
                    .with_value("hi")
                    .with_referent("greeting"),
            );
            d.add(
                AppletNode::new(applets::SET_GLOBAL, NodeKind::Action)
                    .with_value(Value::List(vec![Value::from("said"), Value::from("nothing")]))
                    .refer_to("greeting"),
            );
        });
    });
    let task = fx.compile("greet", TaskType::Oneshot, tree);
    fx.manager.add_oneshot_if_absent(task.clone()).await.unwrap();
    let outcome = fx
        .manager
        .launch_oneshot(task.checksum(), Vec::new())
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Success);
    assert_eq!(fx.global("said"), Some(Value::from("hi")));
    assert!(!fx.manager.is_task_existent(task.checksum()).await);
}

#[tokio::test]
async fn test_repeat_three_times() {
    let fx = Fixture::new();
    let tree = AppletTree::build(|root| {
        root.repeat(3i64, |r| {
            r.then(|d| {
                d.add(AppletNode::new(applets::INCREMENT, NodeKind::Action).with_value("counter"));
            });
        });
    });
    let task = fx.compile("count", TaskType::Oneshot, tree);
    fx.manager.add_oneshot_if_absent(task.clone()).await.unwrap();
    let outcome = fx.manager.launch_oneshot(task.checksum(), Vec::new()).await;
    assert_eq!(outcome.unwrap(), RunOutcome::Success);
    assert_eq!(fx.global("counter"), Some(Value::Int(3)));
}

#[tokio::test]
async fn test_repeat_stops_on_break() {
    let fx = Fixture::new();
    let tree = AppletTree::build(|root| {
        root.repeat(5i64, |r| {
            r.if_(|c| {
                c.criterion(
                    applets::GLOBAL_EQUALS,
                    Value::List(vec![Value::from("counter"), Value::Int(2)]),
                );
            });
            r.then(|d| {
                d.break_loop();
            });
            r.then(|d| {
                d.add(AppletNode::new(applets::INCREMENT, NodeKind::Action).with_value("counter"));
            });
        });
    });
    let task = fx.compile("count", TaskType::Oneshot, tree);
    fx.manager.add_oneshot_if_absent(task.clone()).await.unwrap();
    let outcome = fx.manager.launch_oneshot(task.checksum(), Vec::new()).await;
    assert_eq!(outcome.unwrap(), RunOutcome::Success);
    assert_eq!(fx.global("counter"), Some(Value::Int(2)));
}

#[tokio::test]
async fn test_retrigger_cancels_previous_run_once() {
    let fx = Fixture::new();
    let tree = AppletTree::build(|root| {
        root.when(&[EventType::Tick]);
        root.then(|d| {
            d.action(GATE);
        });
    });
    let task = fx.resident("gated", tree).await;

    let first = fx.router.on_events(vec![Event::new(EventType::Tick)]).await;
    wait_until(|| fx.gate.entered.load(Ordering::SeqCst) == 1).await;
    assert!(task.is_running());

    let second = fx.router.on_events(vec![Event::new(EventType::Tick)]).await;
    for run in first {
        assert_eq!(run.await.unwrap(), RunOutcome::Cancelled);
    }
    wait_until(|| fx.gate.entered.load(Ordering::SeqCst) == 2).await;
    fx.gate.open.notify_one();
    for run in second {
        assert_eq!(run.await.unwrap(), RunOutcome::Success);
    }

    assert_eq!(
        fx.listener.calls(),
        vec!["started", "cancelled", "started", "success"]
    );
    assert!(!task.is_running());
}

#[tokio::test]
async fn test_parked_run_resumes_with_new_batch() {
    let fx = Fixture::new();
    let tree = AppletTree::build(|root| {
        root.when(&[EventType::PackageEntered, EventType::ContentChanged]);
        root.wait_for(|w| {
            w.criterion(applets::PANE_TITLE_IS, "Welcome");
        });
        root.then(|d| {
            d.action(COUNTED_CLICK);
        });
    });
    let task = fx.resident("welcome", tree).await;

    let loading = Event::with_component(EventType::PackageEntered, Some("app"), None, Some("Loading"));
    let runs = fx.router.on_events(vec![loading]).await;
    assert_eq!(runs.len(), 1);
    wait_until(|| task.suspended_run().is_some()).await;
    assert_eq!(fx.clicks(), 0);

    let welcome =
        Event::with_component(EventType::ContentChanged, Some("app"), None, Some("Welcome"));
    let resumed = fx.router.on_events(vec![welcome]).await;
    assert!(resumed.is_empty());

    for run in runs {
        assert_eq!(run.await.unwrap(), RunOutcome::Success);
    }
    assert_eq!(fx.clicks(), 1);
    assert_eq!(fx.listener.calls(), vec!["started", "success"]);
}

#[tokio::test]
async fn test_parked_run_resumes_on_untriggered_event() {
    let fx = Fixture::new();
    let tree = AppletTree::build(|root| {
        root.when(&[EventType::PackageEntered]);
        root.wait_for(|w| {
            w.criterion(applets::PANE_TITLE_IS, "Welcome");
        });
        root.then(|d| {
            d.action(COUNTED_CLICK);
        });
    });
    let task = fx.resident("welcome", tree).await;

    let loading =
        Event::with_component(EventType::PackageEntered, Some("app"), None, Some("Loading"));
    let runs = fx.router.on_events(vec![loading]).await;
    wait_until(|| task.suspended_run().is_some()).await;

    let window = Event::with_component(EventType::NewWindow, Some("app"), None, Some("Welcome"));
    assert!(!task.is_triggered_by(std::slice::from_ref(&window)));
    assert!(fx.router.on_events(vec![window]).await.is_empty());

    for run in runs {
        assert_eq!(run.await.unwrap(), RunOutcome::Success);
    }
    assert_eq!(fx.clicks(), 1);
    assert!(task.suspended_run().is_none());
}

#[tokio::test]
async fn test_disable_cancels_parked_run() {
    let fx = Fixture::new();
    let tree = AppletTree::build(|root| {
        root.when(&[EventType::Tick]);
        root.wait_for(|w| {
            w.criterion(applets::PANE_TITLE_IS, "Never");
        });
    });
    let task = fx.resident("never", tree).await;
    let runs = fx.router.on_events(vec![Event::new(EventType::Tick)]).await;
    wait_until(|| task.suspended_run().is_some()).await;

    fx.manager.disable_resident(task.checksum()).await.unwrap();
    for run in runs {
        assert_eq!(run.await.unwrap(), RunOutcome::Cancelled);
    }
    assert_eq!(fx.listener.calls(), vec!["started", "cancelled"]);
}

#[tokio::test(start_paused = true)]
async fn test_paused_task_starts_no_runs() {
    let fx = Fixture::new();
    let task = fx.resident("login", login_tree("Login")).await;
    fx.manager
        .pause(task.checksum(), Duration::from_secs(30))
        .await
        .unwrap();

    assert!(fx.router.on_events(vec![entered_with_text("Login")]).await.is_empty());
    let left = fx.manager.pause_info(task.checksum()).await.unwrap().unwrap();
    assert!(left <= Duration::from_secs(30));

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(fx.manager.pause_info(task.checksum()).await.unwrap(), None);
    let runs = fx.router.on_events(vec![entered_with_text("Login")]).await;
    assert_eq!(runs.len(), 1);
    for run in runs {
        run.await.unwrap();
    }
    assert_eq!(fx.clicks(), 1);
}

#[tokio::test]
async fn test_engine_error_keeps_task_enabled() {
    let fx = Fixture::new();
    let tree = AppletTree::build(|root| {
        root.when(&[EventType::Tick]);
        root.then(|d| {
            d.action(BOOM);
        });
    });
    let task = fx.resident("boom", tree).await;
    for run in fx.router.on_events(vec![Event::new(EventType::Tick)]).await {
        match run.await.unwrap() {
            RunOutcome::Error(message) => assert!(message.contains("target vanished")),
            other => panic!("unexpected {:?}", other),
        }
    }
    assert!(task.is_enabled());
    assert_eq!(fx.listener.calls(), vec!["started", "error"]);
    let snapshots = fx.manager.snapshots(task.checksum()).await.unwrap();
    assert!(snapshots[0].error.is_some());
    assert!(snapshots[0]
        .log
        .iter()
        .any(|line| line.contains("raised: target vanished")));
}

#[tokio::test]
async fn test_identical_runs_fold_into_one_snapshot() {
    let fx = Fixture::new();
    let task = fx.resident("login", login_tree("Login")).await;
    for _ in 0..3 {
        for run in fx.router.on_events(vec![entered_with_text("Login")]).await {
            run.await.unwrap();
        }
    }
    let snapshots = fx.manager.snapshots(task.checksum()).await.unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].repeats, 2);
}

#[tokio::test]
async fn test_update_replaces_task_and_history() {
    let fx = Fixture::new();
    let v1 = fx.resident("login", login_tree("Login")).await;
    for run in fx.router.on_events(vec![entered_with_text("Login")]).await {
        run.await.unwrap();
    }
    assert_eq!(fx.manager.snapshot_count(v1.checksum()).await.unwrap(), 1);

    let v2 = fx.compile("login", TaskType::Resident, login_tree("Sign up"));
    fx.manager.update(v1.checksum(), v2.clone()).await.unwrap();
    assert_eq!(fx.manager.snapshot_count(v2.checksum()).await.unwrap(), 0);

    for run in fx.router.on_events(vec![entered_with_text("Sign up")]).await {
        assert_eq!(run.await.unwrap(), RunOutcome::Success);
    }
    assert_eq!(fx.clicks(), 2);
}

#[tokio::test]
async fn test_recycled_runtime_has_no_stale_state() {
    let fx = Fixture::new();
    let tree = AppletTree::build(|root| {
        root.if_(|c| {
            c.add(
                AppletNode::new(applets::TARGET_TEXT_IS, NodeKind::Criterion)
                    .with_value("Login")
                    .with_referent("text"),
            );
        });
    });
    let task = fx.compile("text-check", TaskType::Oneshot, tree);
    fx.manager.add_oneshot_if_absent(task.clone()).await.unwrap();
    let outcome = fx
        .manager
        .launch_oneshot(task.checksum(), vec![entered_with_text("Login")])
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Success);
    assert_eq!(fx.ctx().runtimes().available(), 1);

    let runtime = fx
        .ctx()
        .runtimes()
        .acquire(None, Vec::new(), Arc::new(RunControl::new()));
    assert!(runtime.referent("text").is_none());
    assert_eq!(runtime.referent_count(), 0);
    assert_eq!(runtime.fingerprint(), 0);
    assert_eq!(runtime.if_successful(), None);
    assert!(runtime.task().is_none());
}
