//! End-to-end engine scenarios against the in-memory repository.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use procflow_core::definition::parse_definition_yaml;
use procflow_core::engine::ProcessEngine;
use procflow_core::error::{EngineError, ListenerError};
use procflow_core::listener::{Listener, ListenerBus};
use procflow_core::lock::LocalJobLock;
use procflow_core::repository::ProcessRepository;
use procflow_core::scheduler::{ReminderScheduler, TickOutcome};
use procflow_types::config::EngineConfig;
use procflow_types::error::RepositoryError;
use procflow_types::event::{InstanceEvent, TaskEvent};
use procflow_types::instance::{InstanceState, TaskState};
use procflow_types::process::Variables;
use serde_json::json;
use uuid::Uuid;

use crate::memory::MemoryProcessRepository;

const APPROVAL: &str = r#"
id: approval
nodes:
  - id: start
    kind: start
    transitions:
      - target: approve
  - id: approve
    kind: task
    assignees: [alice]
    transitions:
      - target: end
  - id: end
    kind: end
"#;

const EXPENSE: &str = r#"
id: expense
nodes:
  - id: start
    kind: start
    transitions:
      - target: gate
  - id: gate
    kind: condition
    transitions:
      - target: escalate
        condition: "amount > 1000"
      - target: end
  - id: escalate
    kind: task
    assignees: [finance]
    transitions:
      - target: end
  - id: end
    kind: end
"#;

const CONTRACT: &str = r#"
id: contract
nodes:
  - id: start
    kind: start
    transitions:
      - target: prepare
  - id: prepare
    kind: task
    assignees: [sales]
    transitions:
      - target: legal
      - target: finance
  - id: legal
    kind: task
    assignees: [legal]
    transitions:
      - target: signoff
  - id: finance
    kind: task
    assignees: [finance]
    transitions:
      - target: signoff
  - id: signoff
    kind: join
    transitions:
      - target: end
  - id: end
    kind: end
"#;

const REGIONAL: &str = r#"
id: regional
nodes:
  - id: start
    kind: start
    transitions:
      - target: gate
  - id: gate
    kind: condition
    transitions:
      - target: eu_review
        condition: 'region == "eu"'
      - target: us_review
        condition: 'region == "us"'
  - id: eu_review
    kind: task
    transitions:
      - target: end
  - id: us_review
    kind: task
    transitions:
      - target: end
  - id: end
    kind: end
"#;

const COMMITTEE: &str = r#"
id: committee
nodes:
  - id: start
    kind: start
    transitions:
      - target: vote
  - id: vote
    kind: task
    assignees: [alice, bob]
    task_handler: per_assignee
    transitions:
      - target: end
  - id: end
    kind: end
"#;

const REVIEW: &str = r#"
id: review
nodes:
  - id: start
    kind: start
    transitions:
      - target: review
  - id: review
    kind: task
    assignees: [manager]
    transitions:
      - target: legal
        condition: "needs_legal"
      - target: finance
  - id: legal
    kind: task
    assignees: [legal]
    transitions:
      - target: signoff
  - id: finance
    kind: task
    assignees: [finance]
    transitions:
      - target: signoff
  - id: signoff
    kind: join
    transitions:
      - target: end
  - id: end
    kind: end
"#;

/// Records every instance and task event by name.
#[derive(Default)]
struct Journal(Mutex<Vec<String>>);

impl Journal {
    fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    fn count(&self, name: &str) -> usize {
        self.entries().iter().filter(|e| *e == name).count()
    }
}

impl Listener<InstanceEvent> for Journal {
    fn on_event(&self, event: &InstanceEvent) -> Result<(), ListenerError> {
        let name = match event {
            InstanceEvent::Started { .. } => "instance.started",
            InstanceEvent::Completed { .. } => "instance.completed",
            InstanceEvent::TimedOut { .. } => "instance.timed_out",
            InstanceEvent::Terminated { .. } => "instance.terminated",
            InstanceEvent::RoutingFailed { .. } => "instance.routing_failed",
        };
        self.0.lock().unwrap().push(name.to_string());
        Ok(())
    }
}

impl Listener<TaskEvent> for Journal {
    fn on_event(&self, event: &TaskEvent) -> Result<(), ListenerError> {
        let name = match event {
            TaskEvent::Created { task } => format!("task.created:{}", task.node_id),
            TaskEvent::Completed { task } => format!("task.completed:{}", task.node_id),
            TaskEvent::Terminated { task } => format!("task.terminated:{}", task.node_id),
        };
        self.0.lock().unwrap().push(name);
        Ok(())
    }
}

async fn engine(
    config: EngineConfig,
    definitions: &[&str],
) -> (Arc<ProcessEngine<MemoryProcessRepository>>, Arc<Journal>) {
    let journal = Arc::new(Journal::default());
    let listeners = ListenerBus::new()
        .with::<InstanceEvent>(journal.clone())
        .with::<TaskEvent>(journal.clone());
    let engine = ProcessEngine::builder(Arc::new(MemoryProcessRepository::new()))
        .listeners(listeners)
        .config(config)
        .build();
    for yaml in definitions {
        engine.deploy(&parse_definition_yaml(yaml).unwrap()).await.unwrap();
    }
    (Arc::new(engine), journal)
}

fn vars(value: serde_json::Value) -> Variables {
    serde_json::from_value(value).unwrap()
}

async fn only_open_task(engine: &ProcessEngine<MemoryProcessRepository>, id: Uuid) -> Uuid {
    let open = engine.open_tasks(id).await.unwrap();
    assert_eq!(open.len(), 1, "expected exactly one open task");
    open[0].id
}

#[tokio::test]
async fn approval_runs_to_completion() {
    let (engine, journal) = engine(EngineConfig::default(), &[APPROVAL]).await;

    let id = engine.start("approval", vars(json!({"amount": 100}))).await.unwrap();
    let task_id = only_open_task(&engine, id).await;
    engine
        .complete_task(task_id, vars(json!({"approved": true})))
        .await
        .unwrap();

    let instance = engine.instance(id).await.unwrap();
    assert_eq!(instance.state, InstanceState::Complete);
    assert_eq!(instance.variables.get("approved"), Some(&json!(true)));
    assert_eq!(instance.variables.get("amount"), Some(&json!(100)));
    assert_eq!(
        journal.entries(),
        vec![
            "instance.started",
            "task.created:approve",
            "task.completed:approve",
            "instance.completed",
        ]
    );
}

#[tokio::test]
async fn gateway_routes_by_amount() {
    let (engine, _journal) = engine(EngineConfig::default(), &[EXPENSE]).await;

    let small = engine.start("expense", vars(json!({"amount": 50}))).await.unwrap();
    assert_eq!(engine.instance(small).await.unwrap().state, InstanceState::Complete);
    assert!(engine.tasks(small).await.unwrap().is_empty());

    let large = engine.start("expense", vars(json!({"amount": 5000}))).await.unwrap();
    let instance = engine.instance(large).await.unwrap();
    assert_eq!(instance.state, InstanceState::Active);
    assert!(instance.current_nodes.contains("escalate"));
    assert_eq!(engine.tasks(large).await.unwrap()[0].node_id, "escalate");
}

#[tokio::test]
async fn completing_twice_leaves_instance_unchanged() {
    let (engine, journal) = engine(EngineConfig::default(), &[APPROVAL]).await;
    let id = engine.start("approval", Variables::new()).await.unwrap();
    let task_id = only_open_task(&engine, id).await;

    engine.complete_task(task_id, Variables::new()).await.unwrap();
    let before = engine.instance(id).await.unwrap();

    let err = engine
        .complete_task(task_id, vars(json!({"late": true})))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::State(_)));
    assert_eq!(engine.instance(id).await.unwrap(), before);
    assert_eq!(journal.count("instance.completed"), 1);
}

#[tokio::test]
async fn parallel_branches_join_before_end() {
    let (engine, _journal) = engine(EngineConfig::default(), &[CONTRACT]).await;
    let id = engine.start("contract", Variables::new()).await.unwrap();

    let prepare = only_open_task(&engine, id).await;
    engine.complete_task(prepare, Variables::new()).await.unwrap();

    let open = engine.open_tasks(id).await.unwrap();
    let nodes: Vec<&str> = open.iter().map(|t| t.node_id.as_str()).collect();
    assert_eq!(nodes, vec!["legal", "finance"]);

    engine.complete_task(open[0].id, Variables::new()).await.unwrap();
    let waiting = engine.instance(id).await.unwrap();
    assert_eq!(waiting.state, InstanceState::Active);
    assert!(waiting.current_nodes.contains("signoff"));
    assert_eq!(waiting.join_arrivals.get("signoff"), Some(&1));

    engine.complete_task(open[1].id, Variables::new()).await.unwrap();
    let done = engine.instance(id).await.unwrap();
    assert_eq!(done.state, InstanceState::Complete);
    assert!(done.join_arrivals.is_empty());
}

#[tokio::test]
async fn skipped_fork_branch_does_not_stall_join() {
    let (engine, journal) = engine(EngineConfig::default(), &[REVIEW]).await;
    let id = engine.start("review", Variables::new()).await.unwrap();

    let review = only_open_task(&engine, id).await;
    engine
        .complete_task(review, vars(json!({"needs_legal": false})))
        .await
        .unwrap();

    let finance = engine.open_tasks(id).await.unwrap();
    assert_eq!(finance.len(), 1);
    assert_eq!(finance[0].node_id, "finance");

    engine.complete_task(finance[0].id, Variables::new()).await.unwrap();
    let done = engine.instance(id).await.unwrap();
    assert_eq!(done.state, InstanceState::Complete);
    assert!(done.current_nodes.is_empty());
    assert!(done.join_arrivals.is_empty());
    assert!(!done.is_flagged());
    assert_eq!(journal.count("instance.completed"), 1);
}

#[tokio::test]
async fn guarded_fork_waits_for_every_taken_branch() {
    let (engine, _journal) = engine(EngineConfig::default(), &[REVIEW]).await;
    let id = engine.start("review", Variables::new()).await.unwrap();

    let review = only_open_task(&engine, id).await;
    engine
        .complete_task(review, vars(json!({"needs_legal": true})))
        .await
        .unwrap();

    let open = engine.open_tasks(id).await.unwrap();
    assert_eq!(open.len(), 2);

    engine.complete_task(open[1].id, Variables::new()).await.unwrap();
    let waiting = engine.instance(id).await.unwrap();
    assert_eq!(waiting.state, InstanceState::Active);
    assert!(waiting.current_nodes.contains("signoff"));

    engine.complete_task(open[0].id, Variables::new()).await.unwrap();
    assert_eq!(engine.instance(id).await.unwrap().state, InstanceState::Complete);
}

#[tokio::test]
async fn routing_failure_flags_and_retry_recovers() {
    let (engine, journal) = engine(EngineConfig::default(), &[REGIONAL]).await;

    let err = engine
        .start("regional", vars(json!({"region": "apac"})))
        .await
        .unwrap_err();
    let id = match err {
        EngineError::Routing { instance_id, node_id } => {
            assert_eq!(node_id, "gate");
            instance_id
        }
        other => panic!("expected routing error, got {other:?}"),
    };

    let flagged = engine.instance(id).await.unwrap();
    assert_eq!(flagged.state, InstanceState::Active);
    assert!(flagged.is_flagged());
    assert!(flagged.current_nodes.contains("gate"));
    assert_eq!(journal.count("instance.routing_failed"), 1);

    engine
        .update_variables(id, vars(json!({"region": "eu"})))
        .await
        .unwrap();
    engine.retry(id).await.unwrap();

    let recovered = engine.instance(id).await.unwrap();
    assert!(!recovered.is_flagged());
    assert!(!recovered.current_nodes.contains("gate"));
    assert!(recovered.current_nodes.contains("eu_review"));

    let err = engine.retry(id).await.unwrap_err();
    assert!(matches!(err, EngineError::State(_)));
}

#[tokio::test]
async fn per_assignee_tasks_all_close_before_advancing() {
    let (engine, _journal) = engine(EngineConfig::default(), &[COMMITTEE]).await;
    let id = engine.start("committee", Variables::new()).await.unwrap();

    let votes = engine.open_tasks(id).await.unwrap();
    assert_eq!(votes.len(), 2);

    engine
        .complete_task(votes[0].id, vars(json!({"alice": "yes"})))
        .await
        .unwrap();
    assert!(engine.instance(id).await.unwrap().current_nodes.contains("vote"));

    engine
        .complete_task(votes[1].id, vars(json!({"bob": "yes"})))
        .await
        .unwrap();
    let done = engine.instance(id).await.unwrap();
    assert_eq!(done.state, InstanceState::Complete);
    assert_eq!(done.variables.len(), 2);
}

#[tokio::test]
async fn terminate_closes_tasks_and_rejects_further_work() {
    let (engine, journal) = engine(EngineConfig::default(), &[APPROVAL]).await;
    let id = engine.start("approval", Variables::new()).await.unwrap();
    let task_id = only_open_task(&engine, id).await;

    engine.terminate(id).await.unwrap();
    assert_eq!(engine.instance(id).await.unwrap().state, InstanceState::Termination);
    assert_eq!(engine.tasks(id).await.unwrap()[0].state, TaskState::Terminated);
    assert_eq!(journal.count("task.terminated:approve"), 1);

    assert!(matches!(
        engine.complete_task(task_id, Variables::new()).await,
        Err(EngineError::State(_))
    ));
    assert!(matches!(engine.terminate(id).await, Err(EngineError::State(_))));
    assert!(matches!(
        engine.update_variables(id, Variables::new()).await,
        Err(EngineError::State(_))
    ));
}

#[tokio::test]
async fn scheduler_times_out_overdue_instances() {
    let config = EngineConfig {
        default_timeout_secs: Some(3600),
        ..EngineConfig::default()
    };
    let (engine, journal) = engine(config, &[APPROVAL]).await;
    let id = engine.start("approval", Variables::new()).await.unwrap();
    let scheduler = ReminderScheduler::new(engine.clone(), Arc::new(LocalJobLock::new()));

    match scheduler.tick(Utc::now()).await.unwrap() {
        TickOutcome::Ran(report) => {
            assert_eq!(report.scanned, 1);
            assert!(report.timed_out.is_empty());
        }
        TickOutcome::Skipped => panic!("tick skipped"),
    }

    let overdue = Utc::now() + chrono::Duration::hours(2);
    match scheduler.tick(overdue).await.unwrap() {
        TickOutcome::Ran(report) => assert_eq!(report.timed_out, vec![id]),
        TickOutcome::Skipped => panic!("tick skipped"),
    }
    assert_eq!(engine.instance(id).await.unwrap().state, InstanceState::Timeout);
    assert_eq!(journal.count("instance.timed_out"), 1);
}

#[tokio::test]
async fn stale_write_is_rejected_as_retryable_conflict() {
    let (engine, _journal) = engine(EngineConfig::default(), &[APPROVAL]).await;
    let id = engine.start("approval", Variables::new()).await.unwrap();
    let stale = engine.instance(id).await.unwrap();

    engine
        .update_variables(id, vars(json!({"note": "first"})))
        .await
        .unwrap();

    let err = engine.repository().save_instance(&stale).await.unwrap_err();
    assert!(matches!(err, RepositoryError::Conflict(_)));
    assert!(EngineError::from(err).is_retryable());
}
