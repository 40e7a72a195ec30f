//! Process engine: deploys definitions and drives instances through them.
//!
//! Every externally triggered change (start, task completion, termination,
//! retry) runs as one traversal step over a worklist of node tokens. The
//! step accumulates its changes in memory and writes them through a single
//! `ProcessRepository::commit_step` call, so a handler or listener failure
//! leaves the stored instance untouched.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use procflow_types::config::EngineConfig;
use procflow_types::event::{InstanceEvent, TaskEvent};
use procflow_types::instance::{InstanceState, ProcessInstance, Task, TaskState};
use procflow_types::process::{Node, NodeKind, ProcessDefinition, Variables};
use tracing::Instrument;
use uuid::Uuid;

use crate::cache::{Cache, CacheExt, MemoryCache};
use crate::definition::{reachable_from, validate_definition, validate_guards, validate_reminders};
use crate::error::EngineError;
use crate::execution::{Execution, StepState, Token};
use crate::expression::{ConditionEvaluator, JexlEvaluator};
use crate::handler::HandlerRegistry;
use crate::listener::ListenerBus;
use crate::repository::ProcessRepository;

fn definition_key(id: &str) -> String {
    format!("definition:{id}")
}

/// Embedded workflow engine over a [`ProcessRepository`].
pub struct ProcessEngine<R: ProcessRepository> {
    repo: Arc<R>,
    evaluator: Arc<dyn ConditionEvaluator>,
    cache: Arc<dyn Cache>,
    handlers: HandlerRegistry,
    listeners: ListenerBus,
    config: EngineConfig,
}

/// Builder for [`ProcessEngine`]. Everything but the repository has a default.
pub struct ProcessEngineBuilder<R: ProcessRepository> {
    repo: Arc<R>,
    evaluator: Option<Arc<dyn ConditionEvaluator>>,
    cache: Option<Arc<dyn Cache>>,
    handlers: HandlerRegistry,
    listeners: ListenerBus,
    config: EngineConfig,
}

impl<R: ProcessRepository> ProcessEngineBuilder<R> {
    pub fn evaluator(mut self, evaluator: Arc<dyn ConditionEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn listeners(mut self, listeners: ListenerBus) -> Self {
        self.listeners = listeners;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> ProcessEngine<R> {
        ProcessEngine {
            repo: self.repo,
            evaluator: self
                .evaluator
                .unwrap_or_else(|| Arc::new(JexlEvaluator::new())),
            cache: self.cache.unwrap_or_else(|| Arc::new(MemoryCache::new())),
            handlers: self.handlers,
            listeners: self.listeners,
            config: self.config,
        }
    }
}

impl<R: ProcessRepository> ProcessEngine<R> {
    pub fn builder(repo: Arc<R>) -> ProcessEngineBuilder<R> {
        ProcessEngineBuilder {
            repo,
            evaluator: None,
            cache: None,
            handlers: HandlerRegistry::new(),
            listeners: ListenerBus::new(),
            config: EngineConfig::default(),
        }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn listeners(&self) -> &ListenerBus {
        &self.listeners
    }

    pub(crate) fn cache(&self) -> &dyn Cache {
        self.cache.as_ref()
    }

    // -----------------------------------------------------------------------
    // Definitions
    // -----------------------------------------------------------------------

    /// Check a definition's structure, guard syntax, reminder schedules and
    /// handler references against this engine's registry.
    pub fn validate(&self, def: &ProcessDefinition) -> Result<(), EngineError> {
        validate_definition(def)?;
        validate_guards(def, self.evaluator.as_ref())?;
        validate_reminders(def)?;

        for node in &def.nodes {
            if let Some(handler) = &node.handler {
                if !self.handlers.has_flow_handler(handler) {
                    return Err(EngineError::Configuration(format!(
                        "node '{}' references unknown flow handler '{handler}'",
                        node.id
                    )));
                }
            }
            if let NodeKind::Task { task_handler, .. } = &node.kind {
                self.handlers.task_handler(task_handler.as_deref())?;
            }
        }
        Ok(())
    }

    /// Validate and store a definition, replacing any previous one with the same id.
    pub async fn deploy(&self, def: &ProcessDefinition) -> Result<(), EngineError> {
        self.validate(def)?;
        self.repo.save_definition(def).await?;
        if self.config.cache_definitions {
            self.cache.put_as(&definition_key(&def.id), def);
        }
        tracing::info!(
            definition_id = %def.id,
            version = def.version,
            nodes = def.nodes.len(),
            "deployed process definition"
        );
        Ok(())
    }

    /// Resolve a definition, from the cache when possible.
    pub async fn definition(&self, id: &str) -> Result<ProcessDefinition, EngineError> {
        let key = definition_key(id);
        if self.config.cache_definitions {
            if let Some(def) = self.cache.get_as::<ProcessDefinition>(&key) {
                return Ok(def);
            }
        }

        let def = self
            .repo
            .load_definition(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("process definition '{id}'")))?;
        self.validate(&def)?;
        if self.config.cache_definitions {
            self.cache.put_as(&key, &def);
        }
        Ok(def)
    }

    // -----------------------------------------------------------------------
    // Instance operations
    // -----------------------------------------------------------------------

    /// Create an instance and traverse from the start node until every token
    /// parks or ends.
    ///
    /// A routing failure is committed (the instance stays `Active`, flagged)
    /// and then reported as `EngineError::Routing`.
    pub async fn start(
        &self,
        definition_id: &str,
        variables: Variables,
    ) -> Result<Uuid, EngineError> {
        let span = tracing::info_span!(
            "procflow.start",
            procflow.definition_id = %definition_id,
            procflow.instance_id = tracing::field::Empty,
        );
        self.start_instance(definition_id, variables)
            .instrument(span)
            .await
    }

    async fn start_instance(
        &self,
        definition_id: &str,
        variables: Variables,
    ) -> Result<Uuid, EngineError> {
        let def = self.definition(definition_id).await?;
        let start = def.start_node().ok_or_else(|| {
            EngineError::Configuration(format!("definition '{}' has no start node", def.id))
        })?;

        let now = Utc::now();
        let mut instance = ProcessInstance::new(&def.id, def.version, variables, now);
        instance.remind = def.remind.clone();
        instance.deadline = def
            .timeout_secs
            .or(self.config.default_timeout_secs)
            .and_then(|secs| deadline_after(now, secs));
        let instance_id = instance.id;
        tracing::Span::current().record("procflow.instance_id", tracing::field::display(instance_id));

        tracing::info!(
            instance_id = %instance_id,
            definition_id = %def.id,
            "starting process instance"
        );
        self.listeners.notify(|| InstanceEvent::Started {
            instance_id,
            definition_id: def.id.clone(),
        })?;

        let mut step = StepState::new(instance, now);
        self.advance(&def, &mut step, vec![Token::Enter(start.id.clone())])?;
        self.finish_step(step).await?;
        Ok(instance_id)
    }

    /// Complete an open task, merge its output into the instance variables,
    /// and continue traversal once no other task is open on the same node.
    pub async fn complete_task(&self, task_id: Uuid, output: Variables) -> Result<(), EngineError> {
        let span = tracing::info_span!(
            "procflow.complete_task",
            procflow.task_id = %task_id,
            procflow.instance_id = tracing::field::Empty,
            procflow.node_id = tracing::field::Empty,
        );
        self.complete_open_task(task_id, output)
            .instrument(span)
            .await
    }

    async fn complete_open_task(
        &self,
        task_id: Uuid,
        output: Variables,
    ) -> Result<(), EngineError> {
        let mut task = self
            .repo
            .load_task(&task_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("task {task_id}")))?;
        if !task.is_open() {
            return Err(EngineError::State(format!(
                "task {task_id} is already {}",
                task.state
            )));
        }

        let span = tracing::Span::current();
        span.record("procflow.instance_id", tracing::field::display(task.instance_id));
        span.record("procflow.node_id", task.node_id.as_str());

        let instance = self.active_instance(task.instance_id).await?;
        let def = self.definition(&instance.definition_id).await?;
        let now = Utc::now();
        let mut step = StepState::new(instance, now);

        step.instance
            .variables
            .extend(output.iter().map(|(k, v)| (k.clone(), v.clone())));
        task.state = TaskState::Completed;
        task.output = output;
        task.completed_at = Some(now);
        tracing::info!(
            instance_id = %task.instance_id,
            task_id = %task.id,
            node_id = %task.node_id,
            "task completed"
        );
        self.listeners
            .notify(|| TaskEvent::Completed { task: task.clone() })?;

        let siblings_open = self
            .repo
            .list_tasks(&task.instance_id)
            .await?
            .iter()
            .any(|t| t.id != task.id && t.node_id == task.node_id && t.is_open());
        let node_id = task.node_id.clone();
        step.updated_tasks.push(task);

        if siblings_open {
            tracing::debug!(
                instance_id = %step.instance.id,
                node_id = %node_id,
                "other tasks still open on node, not advancing"
            );
        } else {
            step.instance.current_nodes.remove(&node_id);
            self.advance(&def, &mut step, vec![Token::Leave(node_id)])?;
        }
        self.finish_step(step).await
    }

    /// Force an active instance into `Termination`, closing its open tasks.
    pub async fn terminate(&self, instance_id: Uuid) -> Result<(), EngineError> {
        self.close_instance(instance_id, InstanceState::Termination, Utc::now())
            .await
    }

    /// Force an active instance into `Timeout`, closing its open tasks.
    pub(crate) async fn time_out(
        &self,
        instance_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        self.close_instance(instance_id, InstanceState::Timeout, now)
            .await
    }

    /// Merge variables into an active instance without advancing it.
    pub async fn update_variables(
        &self,
        instance_id: Uuid,
        variables: Variables,
    ) -> Result<(), EngineError> {
        let mut instance = self.active_instance(instance_id).await?;
        instance.variables.extend(variables);
        instance.updated_at = Utc::now();
        let revision = self.repo.save_instance(&instance).await?;
        tracing::debug!(instance_id = %instance_id, revision, "instance variables updated");
        Ok(())
    }

    /// Re-route the gateways a previous step could not leave, typically after
    /// `update_variables` has fixed the data their guards read.
    pub async fn retry(&self, instance_id: Uuid) -> Result<(), EngineError> {
        let instance = self.active_instance(instance_id).await?;
        let Some(failure) = instance.failure.clone() else {
            return Err(EngineError::State(format!(
                "instance {instance_id} has no routing failure to retry"
            )));
        };
        let def = self.definition(&instance.definition_id).await?;

        let mut step = StepState::new(instance, Utc::now());
        step.instance.failure = None;
        for node_id in &failure.node_ids {
            step.instance.current_nodes.remove(node_id);
        }
        tracing::info!(
            instance_id = %instance_id,
            nodes = ?failure.node_ids,
            "retrying routing"
        );
        let tokens = failure.node_ids.into_iter().map(Token::Leave).collect();
        self.advance(&def, &mut step, tokens)?;
        self.finish_step(step).await
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn instance(&self, instance_id: Uuid) -> Result<ProcessInstance, EngineError> {
        self.repo
            .load_instance(&instance_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("process instance {instance_id}")))
    }

    /// Every task of an instance, in creation order.
    pub async fn tasks(&self, instance_id: Uuid) -> Result<Vec<Task>, EngineError> {
        Ok(self.repo.list_tasks(&instance_id).await?)
    }

    pub async fn open_tasks(&self, instance_id: Uuid) -> Result<Vec<Task>, EngineError> {
        let mut tasks = self.tasks(instance_id).await?;
        tasks.retain(Task::is_open);
        Ok(tasks)
    }

    // -----------------------------------------------------------------------
    // Traversal
    // -----------------------------------------------------------------------

    async fn active_instance(&self, instance_id: Uuid) -> Result<ProcessInstance, EngineError> {
        let instance = self.instance(instance_id).await?;
        if instance.state.is_terminal() {
            return Err(EngineError::State(format!(
                "instance {instance_id} is already {}",
                instance.state
            )));
        }
        Ok(instance)
    }

    async fn close_instance(
        &self,
        instance_id: Uuid,
        state: InstanceState,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let instance = self.active_instance(instance_id).await?;
        let definition_id = instance.definition_id.clone();
        let mut step = StepState::new(instance, now);

        for mut task in self.repo.list_tasks(&instance_id).await? {
            if !task.is_open() {
                continue;
            }
            task.state = TaskState::Terminated;
            task.completed_at = Some(now);
            self.listeners
                .notify(|| TaskEvent::Terminated { task: task.clone() })?;
            step.updated_tasks.push(task);
        }
        step.instance.state = state;
        step.instance.join_arrivals.clear();

        let closed = step.updated_tasks.len();
        match state {
            InstanceState::Timeout => {
                tracing::warn!(instance_id = %instance_id, closed_tasks = closed, "instance timed out");
                self.listeners.notify(|| InstanceEvent::TimedOut {
                    instance_id,
                    definition_id: definition_id.clone(),
                    at: now,
                })?;
            }
            _ => {
                tracing::info!(instance_id = %instance_id, closed_tasks = closed, "instance terminated");
                self.listeners.notify(|| InstanceEvent::Terminated {
                    instance_id,
                    definition_id: definition_id.clone(),
                    at: now,
                })?;
            }
        }

        self.repo.commit_step(&step.into_commit()).await?;
        Ok(())
    }

    /// Drain the worklist. Nothing here touches the repository.
    fn advance(
        &self,
        def: &ProcessDefinition,
        step: &mut StepState,
        tokens: Vec<Token>,
    ) -> Result<(), EngineError> {
        let mut queue: VecDeque<Token> = tokens.into();
        let mut entered: u32 = 0;

        loop {
            while let Some(token) = queue.pop_front() {
                match token {
                    Token::Enter(node_id) => {
                        entered += 1;
                        if entered > self.config.max_steps_per_traversal {
                            return Err(EngineError::Execution(format!(
                                "instance {} exceeded {} node visits in one step",
                                step.instance.id, self.config.max_steps_per_traversal
                            )));
                        }
                        let node = lookup(def, &node_id)?;
                        self.enter(def, node, step, &mut queue)?;
                    }
                    Token::Leave(node_id) => {
                        let node = lookup(def, &node_id)?;
                        self.leave(node, step, &mut queue)?;
                    }
                }
            }

            // A join whose missing branches were skipped by guards fires with
            // the arrivals it has.
            let Some(join_id) = starved_join(def, &step.instance) else {
                return Ok(());
            };
            tracing::debug!(
                instance_id = %step.instance.id,
                node_id = %join_id,
                arrivals = step.instance.join_arrivals.get(&join_id).copied().unwrap_or(0),
                "no pending branch can reach join, releasing"
            );
            step.instance.join_arrivals.remove(&join_id);
            step.instance.current_nodes.remove(&join_id);
            queue.push_back(Token::Leave(join_id));
        }
    }

    fn enter(
        &self,
        def: &ProcessDefinition,
        node: &Node,
        step: &mut StepState,
        queue: &mut VecDeque<Token>,
    ) -> Result<(), EngineError> {
        let instance_id = step.instance.id;
        tracing::debug!(
            instance_id = %instance_id,
            node_id = %node.id,
            kind = node.kind.as_str(),
            "entering node"
        );

        if let Some(handler_id) = &node.handler {
            let handler = self.handlers.flow_handler(handler_id)?;
            let mut execution = Execution {
                instance_id,
                definition: def,
                node,
                variables: &mut step.instance.variables,
                now: step.now,
            };
            handler
                .handle(&mut execution)
                .map_err(|e| EngineError::Handler {
                    node_id: node.id.clone(),
                    message: e.to_string(),
                })?;
        }

        match &node.kind {
            NodeKind::Start | NodeKind::Condition => {
                queue.push_back(Token::Leave(node.id.clone()));
            }
            NodeKind::Task { task_handler, .. } => {
                let handler = self.handlers.task_handler(task_handler.as_deref())?;
                let execution = Execution {
                    instance_id,
                    definition: def,
                    node,
                    variables: &mut step.instance.variables,
                    now: step.now,
                };
                let tasks = handler
                    .create_tasks(&execution)
                    .map_err(|e| EngineError::Handler {
                        node_id: node.id.clone(),
                        message: e.to_string(),
                    })?;

                if tasks.is_empty() {
                    tracing::debug!(instance_id = %instance_id, node_id = %node.id, "no tasks created, passing through");
                    queue.push_back(Token::Leave(node.id.clone()));
                    return Ok(());
                }

                step.instance.current_nodes.insert(node.id.clone());
                for task in tasks {
                    if task.instance_id != instance_id || task.node_id != node.id {
                        return Err(EngineError::Handler {
                            node_id: node.id.clone(),
                            message: format!("task {} belongs to another node", task.id),
                        });
                    }
                    tracing::info!(
                        instance_id = %instance_id,
                        node_id = %node.id,
                        task_id = %task.id,
                        "task created"
                    );
                    self.listeners
                        .notify(|| TaskEvent::Created { task: task.clone() })?;
                    step.created_tasks.push(task);
                }
            }
            NodeKind::Join { expected } => {
                let expected = expected
                    .unwrap_or_else(|| u32::try_from(def.incoming_count(&node.id)).unwrap_or(u32::MAX))
                    .max(1);
                let arrivals = step
                    .instance
                    .join_arrivals
                    .entry(node.id.clone())
                    .or_insert(0);
                *arrivals += 1;
                tracing::debug!(
                    instance_id = %instance_id,
                    node_id = %node.id,
                    arrivals = *arrivals,
                    expected,
                    "token arrived at join"
                );

                if *arrivals >= expected {
                    step.instance.join_arrivals.remove(&node.id);
                    step.instance.current_nodes.remove(&node.id);
                    queue.push_back(Token::Leave(node.id.clone()));
                } else {
                    step.instance.current_nodes.insert(node.id.clone());
                }
            }
            NodeKind::End => {
                tracing::debug!(instance_id = %instance_id, node_id = %node.id, "branch ended");
            }
        }
        Ok(())
    }

    fn leave(
        &self,
        node: &Node,
        step: &mut StepState,
        queue: &mut VecDeque<Token>,
    ) -> Result<(), EngineError> {
        let targets = self.route(node, &step.instance.variables)?;
        if targets.is_empty() {
            tracing::warn!(
                instance_id = %step.instance.id,
                node_id = %node.id,
                "no satisfied transition, flagging instance"
            );
            step.flag_routing_failure(&node.id);
            return Ok(());
        }
        for target in targets {
            queue.push_back(Token::Enter(target));
        }
        Ok(())
    }

    /// Targets a token leaving `node` moves to.
    ///
    /// Condition nodes take the first true guard in declaration order, then
    /// the first unguarded transition. Every other kind forks along each
    /// transition that is unguarded or whose guard holds.
    fn route(&self, node: &Node, variables: &Variables) -> Result<Vec<String>, EngineError> {
        match node.kind {
            NodeKind::Condition => {
                let mut fallback = None;
                for transition in &node.transitions {
                    match &transition.condition {
                        Some(guard) => {
                            if self.evaluator.evaluate(guard, variables)? {
                                return Ok(vec![transition.target.clone()]);
                            }
                        }
                        None => {
                            if fallback.is_none() {
                                fallback = Some(transition.target.clone());
                            }
                        }
                    }
                }
                Ok(fallback.into_iter().collect())
            }
            NodeKind::End => Ok(Vec::new()),
            _ => {
                let mut targets = Vec::new();
                for transition in &node.transitions {
                    let taken = match &transition.condition {
                        Some(guard) => self.evaluator.evaluate(guard, variables)?,
                        None => true,
                    };
                    if taken {
                        targets.push(transition.target.clone());
                    }
                }
                Ok(targets)
            }
        }
    }

    /// Settle completion, fire step-level events, and commit.
    async fn finish_step(&self, mut step: StepState) -> Result<(), EngineError> {
        let instance_id = step.instance.id;
        let definition_id = step.instance.definition_id.clone();

        for node_id in &step.routing_failures {
            self.listeners.notify(|| InstanceEvent::RoutingFailed {
                instance_id,
                definition_id: definition_id.clone(),
                node_id: node_id.clone(),
            })?;
        }

        if step.instance.is_active() && step.instance.current_nodes.is_empty() {
            step.instance.state = InstanceState::Complete;
            step.instance.join_arrivals.clear();
            tracing::info!(instance_id = %instance_id, definition_id = %definition_id, "instance completed");
            self.listeners.notify(|| InstanceEvent::Completed {
                instance_id,
                definition_id: definition_id.clone(),
                at: step.now,
            })?;
        }

        let failed = step.routing_failures.first().cloned();
        let revision = self.repo.commit_step(&step.into_commit()).await?;
        tracing::debug!(instance_id = %instance_id, revision, "step committed");

        match failed {
            Some(node_id) => Err(EngineError::Routing {
                instance_id,
                node_id,
            }),
            None => Ok(()),
        }
    }
}

fn lookup<'d>(def: &'d ProcessDefinition, node_id: &str) -> Result<&'d Node, EngineError> {
    def.node(node_id).ok_or_else(|| {
        EngineError::Configuration(format!(
            "definition '{}' has no node '{node_id}'",
            def.id
        ))
    })
}

/// A waiting join that no live branch can still reach.
///
/// Live branches are current nodes other than waiting joins: nodes with open
/// tasks and nodes parked on a routing failure. Among starved joins the one
/// no other starved join leads to is released first, so a chain of joins
/// fires in order.
fn starved_join(def: &ProcessDefinition, instance: &ProcessInstance) -> Option<String> {
    let waiting: Vec<&str> = instance
        .current_nodes
        .iter()
        .map(String::as_str)
        .filter(|id| instance.join_arrivals.contains_key(*id))
        .collect();
    if waiting.is_empty() {
        return None;
    }

    let mut live = HashSet::new();
    for id in &instance.current_nodes {
        if !waiting.contains(&id.as_str()) {
            live.extend(reachable_from(def, id));
        }
    }
    let starved: Vec<&str> = waiting
        .into_iter()
        .filter(|id| !live.contains(id))
        .collect();

    let upstream_of = |id: &str| {
        starved
            .iter()
            .any(|other| *other != id && reachable_from(def, other).contains(id))
    };
    starved
        .iter()
        .find(|id| !upstream_of(**id))
        .or_else(|| starved.first())
        .map(|id| (*id).to_string())
}

fn deadline_after(now: DateTime<Utc>, secs: u64) -> Option<DateTime<Utc>> {
    let timeout = chrono::Duration::from_std(std::time::Duration::from_secs(secs)).ok()?;
    now.checked_add_signed(timeout)
}
