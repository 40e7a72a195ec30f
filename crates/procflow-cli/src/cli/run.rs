//! `pflow run`: drive one instance of a definition through a scratch engine.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use tracing::Instrument;
use uuid::Uuid;

use procflow_core::definition::load_definition_file;
use procflow_core::engine::ProcessEngine;
use procflow_core::error::{EngineError, ListenerError};
use procflow_core::listener::{Listener, ListenerBus};
use procflow_infra::memory::MemoryProcessRepository;
use procflow_observe::attrs;
use procflow_types::config::EngineConfig;
use procflow_types::event::{InstanceEvent, TaskEvent};
use procflow_types::instance::{ProcessInstance, Task, TaskState};
use procflow_types::process::Variables;

/// Collects lifecycle events for the run summary.
#[derive(Default)]
struct EventLog(Mutex<Vec<String>>);

impl EventLog {
    fn push(&self, line: String) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).push(line);
    }

    fn lines(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Listener<InstanceEvent> for EventLog {
    fn on_event(&self, event: &InstanceEvent) -> Result<(), ListenerError> {
        let line = match event {
            InstanceEvent::Started { definition_id, .. } => format!("instance started ({definition_id})"),
            InstanceEvent::Completed { .. } => "instance completed".to_string(),
            InstanceEvent::TimedOut { .. } => "instance timed out".to_string(),
            InstanceEvent::Terminated { .. } => "instance terminated".to_string(),
            InstanceEvent::RoutingFailed { node_id, .. } => format!("routing failed at {node_id}"),
        };
        self.push(line);
        Ok(())
    }
}

impl Listener<TaskEvent> for EventLog {
    fn on_event(&self, event: &TaskEvent) -> Result<(), ListenerError> {
        let (verb, task) = match event {
            TaskEvent::Created { task } => ("created", task),
            TaskEvent::Completed { task } => ("completed", task),
            TaskEvent::Terminated { task } => ("terminated", task),
        };
        self.push(format!("task {verb} at {}", task.node_id));
        Ok(())
    }
}

pub async fn handle_run(
    file: &Path,
    vars: Option<&str>,
    completions: &[String],
    config: EngineConfig,
    json: bool,
) -> Result<()> {
    let def = load_definition_file(file)
        .with_context(|| format!("Failed to load definition {}", file.display()))?;
    let variables = match vars {
        Some(raw) => parse_variables(raw).context("Invalid --vars")?,
        None => Variables::new(),
    };
    let steps = completions
        .iter()
        .map(|raw| parse_completion(raw))
        .collect::<Result<Vec<_>>>()?;

    let log = Arc::new(EventLog::default());
    let listeners = ListenerBus::new()
        .with::<InstanceEvent>(log.clone())
        .with::<TaskEvent>(log.clone());
    let engine = ProcessEngine::builder(Arc::new(MemoryProcessRepository::new()))
        .config(config)
        .listeners(listeners)
        .build();

    let span = tracing::info_span!(
        "pflow.run",
        procflow.definition_id = tracing::field::Empty,
        procflow.instance_id = tracing::field::Empty,
        procflow.instance_state = tracing::field::Empty,
    );
    span.record(attrs::DEFINITION_ID, def.id.as_str());

    let instance_id = async {
        engine.deploy(&def).await?;
        let instance_id = accept_routing(engine.start(&def.id, variables).await)?;
        span.record(attrs::INSTANCE_ID, tracing::field::display(instance_id));

        for (node_id, output) in steps {
            let task = engine
                .open_tasks(instance_id)
                .await?
                .into_iter()
                .find(|t| t.node_id == node_id)
                .ok_or_else(|| anyhow::anyhow!("No open task on node '{node_id}'"))?;
            accept_routing(engine.complete_task(task.id, output).await.map(|()| instance_id))?;
        }
        anyhow::Ok(instance_id)
    }
    .instrument(span.clone())
    .await?;

    let instance = engine.instance(instance_id).await?;
    let tasks = engine.tasks(instance_id).await?;
    span.record(attrs::INSTANCE_STATE, tracing::field::display(instance.state));

    if json {
        let out = serde_json::json!({
            "instance": instance,
            "tasks": tasks,
            "events": log.lines(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print_summary(&instance, &tasks, &log.lines());
    }
    Ok(())
}

/// A routing failure still leaves a committed, flagged instance worth showing.
fn accept_routing(result: std::result::Result<Uuid, EngineError>) -> Result<Uuid> {
    match result {
        Ok(id) => Ok(id),
        Err(EngineError::Routing { instance_id, node_id }) => {
            tracing::warn!(%instance_id, %node_id, "instance parked on routing failure");
            Ok(instance_id)
        }
        Err(e) => Err(e.into()),
    }
}

fn parse_variables(raw: &str) -> Result<Variables> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    match value {
        serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
        other => bail!("expected a JSON object, got {other}"),
    }
}

/// Split `NODE=JSON`; an empty JSON part means no output variables.
fn parse_completion(raw: &str) -> Result<(String, Variables)> {
    let (node, output) = raw.split_once('=').unwrap_or((raw, ""));
    if node.trim().is_empty() {
        bail!("Invalid --complete '{raw}': expected NODE=JSON");
    }
    let output = if output.trim().is_empty() {
        Variables::new()
    } else {
        parse_variables(output).with_context(|| format!("Invalid --complete output for '{node}'"))?
    };
    Ok((node.trim().to_string(), output))
}

fn print_summary(instance: &ProcessInstance, tasks: &[Task], events: &[String]) {
    println!();
    println!(
        "  {} Instance {} of '{}'",
        style("*").green().bold(),
        style(instance.id).cyan(),
        instance.definition_id
    );
    let state = instance.state.to_string();
    let state = if instance.is_flagged() {
        style(format!("{state} (flagged)")).yellow()
    } else {
        style(state).bold()
    };
    println!("  State: {state}");
    if !instance.current_nodes.is_empty() {
        let parked: Vec<&str> = instance.current_nodes.iter().map(String::as_str).collect();
        println!("  Waiting at: {}", parked.join(", "));
    }
    if let Some(failure) = &instance.failure {
        println!("  Failure: {}", style(&failure.message).red());
    }
    if !instance.variables.is_empty() {
        let vars = serde_json::to_string(&instance.variables).unwrap_or_default();
        println!("  Variables: {}", style(vars).dim());
    }

    if !tasks.is_empty() {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                Cell::new("Task").fg(Color::Cyan),
                Cell::new("Node"),
                Cell::new("Assignees"),
                Cell::new("State"),
            ]);
        for task in tasks {
            let state = match task.state {
                TaskState::Created => Cell::new(task.state).fg(Color::Yellow),
                TaskState::Completed => Cell::new(task.state).fg(Color::Green),
                TaskState::Terminated => Cell::new(task.state).fg(Color::Red),
            };
            table.add_row(vec![
                Cell::new(task.id),
                Cell::new(&task.node_id),
                Cell::new(task.assignees.join(", ")),
                state,
            ]);
        }
        println!();
        println!("{table}");
    }

    if !events.is_empty() {
        println!();
        println!("  Events:");
        for line in events {
            println!("    {}", style(line).dim());
        }
    }
    println!();
}
