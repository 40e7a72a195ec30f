//! Periodic reminder and timeout pass over active instances.
//!
//! Each tick runs under a [`JobLock`] so that only one scheduler in a
//! deployment scans at a time. A tick that cannot take the lock does nothing.
//! Reminders never change instance state; they are de-duplicated per
//! occurrence through the engine cache, which means a restart may repeat the
//! reminder for an occurrence still inside the tolerance window.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use procflow_types::event::ReminderEvent;
use procflow_types::instance::ProcessInstance;
use procflow_types::process::NodeKind;
use procflow_types::remind::RemindParam;
use serde_json::json;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::engine::ProcessEngine;
use crate::error::EngineError;
use crate::lock::{JobLock, JobLockGuard};
use crate::remind::ReminderRule;
use crate::repository::ProcessRepository;

/// Result of one [`ReminderScheduler::tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another holder had the lock; no instance was read.
    Skipped,
    Ran(TickReport),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Active instances examined.
    pub scanned: usize,
    pub timed_out: Vec<Uuid>,
    /// Reminder events fired.
    pub reminders: usize,
    /// Instances whose processing failed; they are retried next tick.
    pub errors: usize,
}

enum Visit {
    TimedOut,
    Reminded(usize),
}

pub struct ReminderScheduler<R: ProcessRepository> {
    engine: Arc<ProcessEngine<R>>,
    lock: Arc<dyn JobLock>,
    tolerance: Duration,
}

impl<R: ProcessRepository> ReminderScheduler<R> {
    /// Scheduler with the tolerance taken from the engine configuration.
    pub fn new(engine: Arc<ProcessEngine<R>>, lock: Arc<dyn JobLock>) -> Self {
        let secs = engine.config().reminder_tolerance_secs;
        let tolerance = Duration::from_std(std::time::Duration::from_secs(secs))
            .unwrap_or_else(|_| Duration::seconds(60));
        Self {
            engine,
            lock,
            tolerance,
        }
    }

    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Run one scheduling pass at `now`.
    ///
    /// Failures on individual instances are logged and counted; only a
    /// failure to list the active instances fails the tick.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickOutcome, EngineError> {
        let Some(_guard) = JobLockGuard::try_acquire(self.lock.as_ref()) else {
            tracing::debug!("reminder lock held elsewhere, skipping tick");
            return Ok(TickOutcome::Skipped);
        };

        let instances = self.engine.repository().list_active_instances().await?;
        let mut report = TickReport::default();

        for instance in &instances {
            report.scanned += 1;
            match self.visit(instance, now).await {
                Ok(Visit::TimedOut) => report.timed_out.push(instance.id),
                Ok(Visit::Reminded(fired)) => report.reminders += fired,
                Err(e) => {
                    report.errors += 1;
                    tracing::warn!(
                        instance_id = %instance.id,
                        error = %e,
                        "reminder pass failed for instance"
                    );
                }
            }
        }

        tracing::debug!(
            scanned = report.scanned,
            timed_out = report.timed_out.len(),
            reminders = report.reminders,
            errors = report.errors,
            "reminder tick finished"
        );
        Ok(TickOutcome::Ran(report))
    }

    /// Tick period from `reminder_interval_secs`, at least one second.
    pub fn configured_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.engine.config().reminder_interval_secs.max(1))
    }

    /// [`run`](Self::run) at the configured interval.
    pub async fn run_configured(&self, cancel: CancellationToken) {
        self.run(self.configured_interval(), cancel).await;
    }

    /// Tick every `interval` until `cancel` fires. Missed ticks are skipped.
    pub async fn run(&self, interval: std::time::Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(interval_secs = interval.as_secs(), "reminder scheduler started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("reminder scheduler stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        tracing::warn!(error = %e, "reminder tick failed");
                    }
                }
            }
        }
    }

    async fn visit(&self, instance: &ProcessInstance, now: DateTime<Utc>) -> Result<Visit, EngineError> {
        if instance.deadline.is_some_and(|deadline| deadline <= now) {
            self.engine.time_out(instance.id, now).await?;
            return Ok(Visit::TimedOut);
        }

        let def = self.engine.definition(&instance.definition_id).await?;
        let mut candidates: Vec<(Option<&str>, &RemindParam)> = Vec::new();
        if let Some(param) = &instance.remind {
            candidates.push((None, param));
        }
        for node_id in &instance.current_nodes {
            if let Some(node) = def.node(node_id) {
                if let NodeKind::Task {
                    remind: Some(param),
                    ..
                } = &node.kind
                {
                    candidates.push((Some(node.id.as_str()), param));
                }
            }
        }

        let mut fired = 0;
        for (node_id, param) in candidates {
            let rule = ReminderRule::compile(param)?;
            let Some(occurrence) = rule.due_occurrence(now, self.tolerance) else {
                continue;
            };
            let key = format!(
                "remind:{}:{}:{}",
                instance.id,
                node_id.unwrap_or("-"),
                occurrence.format("%Y%m%d%H%M")
            );
            let cache = self.engine.cache();
            if cache.get(&key).is_some() {
                continue;
            }

            let task_ids: Vec<Uuid> = self
                .engine
                .open_tasks(instance.id)
                .await?
                .into_iter()
                .filter(|t| node_id.is_none_or(|n| t.node_id == n))
                .map(|t| t.id)
                .collect();

            tracing::info!(
                instance_id = %instance.id,
                node_id = node_id.unwrap_or("-"),
                %occurrence,
                tasks = task_ids.len(),
                "reminder due"
            );
            self.engine.listeners().notify(|| ReminderEvent {
                instance_id: instance.id,
                definition_id: instance.definition_id.clone(),
                node_id: node_id.map(str::to_string),
                task_ids,
                occurrence,
                fired_at: now,
            })?;
            cache.put(&key, json!(now.to_rfc3339()));
            fired += 1;
        }
        Ok(Visit::Reminded(fired))
    }
}
