//! Recurring execution scheduler.
//!
//! Schedules fire every N seconds and synthesize an execution request
//! against the engine. The in-memory job map is the runtime registry; the
//! persisted `ScheduleRecord` is the durable declaration, re-registered on
//! process start. Single-process only: multiple instances each run their
//! own timers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::cloudsync::{CloudSyncClient, CloudSyncJob};
use crate::error::{Error, Result};
use crate::execution::{ExecutionEngine, StartRequest};
use crate::storage::ScheduleRecord;

/// Manages recurring workflow executions.
pub struct Scheduler {
    jobs: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
    engine: ExecutionEngine,
    cloudsync: CloudSyncClient,
}

impl Scheduler {
    pub fn new(engine: ExecutionEngine, cloudsync: CloudSyncClient) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            engine,
            cloudsync,
        }
    }

    /// Parse a frequency string into whole seconds.
    ///
    /// Cron expressions are recognized and rejected explicitly; only
    /// numeric second intervals are supported in this revision.
    fn parse_frequency(frequency: &str) -> Result<u64> {
        if frequency.split('*').count() > 5 {
            return Err(Error::Schedule(
                "Cron frequencies are not supported yet; provide an interval in whole seconds"
                    .to_string(),
            ));
        }

        let seconds: u64 = frequency.trim().parse().map_err(|_| {
            Error::Schedule(format!("Failed to parse frequency '{}'", frequency))
        })?;
        if seconds < 1 {
            return Err(Error::Schedule(
                "Frequency has to be more than 0".to_string(),
            ));
        }
        Ok(seconds)
    }

    /// Register an on-prem schedule: start the timer, then persist the
    /// declaration. A failed persist unrolls the timer.
    pub async fn create(
        &self,
        schedule_id: &str,
        workflow_id: &str,
        start_node: &str,
        frequency: &str,
        org_id: &str,
        body: &str,
    ) -> Result<()> {
        let seconds = Self::parse_frequency(frequency)?;

        let wrapped = serde_json::json!({
            "start": start_node,
            "execution_source": "schedule",
            "execution_argument": body,
        })
        .to_string();

        info!(
            schedule_id = %schedule_id,
            workflow_id = %workflow_id,
            seconds,
            "Registering schedule"
        );
        let handle = self.spawn_job(workflow_id.to_string(), wrapped.clone(), seconds);

        {
            let mut jobs = self.jobs.lock().await;
            if let Some(old) = jobs.insert(schedule_id.to_string(), handle) {
                old.abort();
            }
        }

        let now = Utc::now().timestamp();
        let record = ScheduleRecord {
            id: schedule_id.to_string(),
            workflow_id: workflow_id.to_string(),
            start_node: start_node.to_string(),
            argument: body.to_string(),
            wrapped_argument: wrapped,
            seconds,
            frequency: frequency.to_string(),
            org: org_id.to_string(),
            environment: "onprem".to_string(),
            creation_time: now,
            last_modification_time: now,
            last_runtime: now,
        };

        if let Err(e) = self.engine.storage().set_schedule(&record).await {
            error!("Failed to set schedule, unregistering timer: {}", e);
            let mut jobs = self.jobs.lock().await;
            if let Some(handle) = jobs.remove(schedule_id) {
                handle.abort();
            }
            return Err(e);
        }

        Ok(())
    }

    /// Persist a cloud schedule and forward the start intent to the sync
    /// service. No local timer is registered.
    pub async fn create_cloud(
        &self,
        schedule_id: &str,
        workflow_id: &str,
        start_node: &str,
        frequency: &str,
        org_id: &str,
        body: &str,
    ) -> Result<()> {
        let now = Utc::now().timestamp();
        let record = ScheduleRecord {
            id: schedule_id.to_string(),
            workflow_id: workflow_id.to_string(),
            start_node: start_node.to_string(),
            argument: body.to_string(),
            wrapped_argument: body.to_string(),
            frequency: frequency.to_string(),
            org: org_id.to_string(),
            environment: "cloud".to_string(),
            creation_time: now,
            last_modification_time: now,
            last_runtime: now,
            ..ScheduleRecord::default()
        };
        self.engine.storage().set_schedule(&record).await?;

        let job = CloudSyncJob {
            job_type: "schedule".to_string(),
            action: "start".to_string(),
            org_id: org_id.to_string(),
            primary_item_id: schedule_id.to_string(),
            secondary_item: frequency.to_string(),
            third_item: workflow_id.to_string(),
            fourth_item: body.to_string(),
            fifth_item: start_node.to_string(),
        };
        self.cloudsync.execute_action(&job).await
    }

    /// Stop a schedule's timer and remove its declaration.
    ///
    /// A declaration without a timer is treated as already stopped; neither
    /// timer nor declaration is an error.
    pub async fn delete(&self, schedule_id: &str) -> Result<()> {
        let had_handle = {
            let mut jobs = self.jobs.lock().await;
            match jobs.remove(schedule_id) {
                Some(handle) => {
                    handle.abort();
                    true
                }
                None => false,
            }
        };

        let record = self.engine.storage().get_schedule(schedule_id).await?;
        if record.is_none() {
            if had_handle {
                warn!("Schedule {} had a timer but no declaration", schedule_id);
                return Ok(());
            }
            return Err(Error::NotFound(format!(
                "Can't find schedule {}",
                schedule_id
            )));
        }

        if !had_handle {
            info!("Schedule {} was already stopped", schedule_id);
        }
        self.engine.storage().delete_schedule(schedule_id).await
    }

    /// Forward a stop intent for a cloud schedule and remove its record.
    pub async fn delete_cloud(
        &self,
        schedule: &ScheduleRecord,
        org_id: &str,
    ) -> Result<()> {
        let job = CloudSyncJob {
            job_type: "schedule".to_string(),
            action: "stop".to_string(),
            org_id: org_id.to_string(),
            primary_item_id: schedule.id.clone(),
            secondary_item: schedule.frequency.clone(),
            third_item: schedule.workflow_id.clone(),
            ..CloudSyncJob::default()
        };
        self.cloudsync.execute_action(&job).await?;
        self.engine.storage().delete_schedule(&schedule.id).await
    }

    /// Re-register every persisted on-prem schedule. Called on process
    /// start; the store is the ledger, the job map only a lease.
    pub async fn reload(&self) -> Result<usize> {
        let schedules = self.engine.storage().list_schedules(None).await?;
        let mut registered = 0;

        for schedule in schedules {
            if schedule.environment != "onprem" {
                continue;
            }
            if schedule.seconds < 1 {
                warn!("Skipping schedule {} with zero frequency", schedule.id);
                continue;
            }

            let handle = self.spawn_job(
                schedule.workflow_id.clone(),
                schedule.wrapped_argument.clone(),
                schedule.seconds,
            );
            let mut jobs = self.jobs.lock().await;
            if let Some(old) = jobs.insert(schedule.id.clone(), handle) {
                old.abort();
            }
            registered += 1;
        }

        info!("Scheduler reloaded {} schedule(s)", registered);
        Ok(registered)
    }

    /// Number of live timers.
    pub async fn job_count(&self) -> usize {
        self.jobs.lock().await.len()
    }

    /// Stop all timers.
    pub async fn stop(&self) {
        let mut jobs = self.jobs.lock().await;
        for (_, handle) in jobs.drain() {
            handle.abort();
        }
    }

    fn spawn_job(&self, workflow_id: String, wrapped_body: String, seconds: u64) -> JoinHandle<()> {
        let engine = self.engine.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(seconds));
            // The first tick completes immediately; schedules fire after
            // their first full period.
            interval.tick().await;

            loop {
                interval.tick().await;
                info!("Schedule firing for workflow {}", workflow_id);

                let request = StartRequest {
                    body: Some(wrapped_body.clone().into_bytes()),
                    ..StartRequest::default()
                };
                match engine.start(&workflow_id, request).await {
                    Ok(Some(execution)) => {
                        info!(
                            "Scheduled execution of {} started: {}",
                            workflow_id, execution.execution_id
                        );
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!("Failed to execute {}: {}", workflow_id, e);
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Environment, SqliteStorage};
    use crate::workflow::{Action, Org, Workflow, WorkflowConfiguration};

    fn scheduler_fixture() -> Scheduler {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let cloudsync = CloudSyncClient::new("http://127.0.0.1:9", "test-key");
        let engine = ExecutionEngine::new(storage, cloudsync.clone());
        Scheduler::new(engine, cloudsync)
    }

    const NODE_ID: &str = "11111111-2222-4333-8444-555555555555";

    async fn seed_workflow(scheduler: &Scheduler) -> String {
        let storage = scheduler.engine.storage();
        storage
            .set_environment(&Environment {
                name: "internal".to_string(),
                org_id: "org-1".to_string(),
                env_type: "onprem".to_string(),
                ..Environment::default()
            })
            .await
            .unwrap();

        let workflow = Workflow {
            id: "aaaaaaaa-bbbb-4ccc-8ddd-eeeeeeeeeeee".to_string(),
            name: "scheduled".to_string(),
            owner: "user-1".to_string(),
            org_id: "org-1".to_string(),
            executing_org: Org {
                id: "org-1".to_string(),
                ..Org::default()
            },
            start: NODE_ID.to_string(),
            is_valid: true,
            configuration: WorkflowConfiguration {
                exit_on_error: false,
                start_from_top: true,
            },
            actions: vec![Action {
                id: NODE_ID.to_string(),
                name: "hello_world".to_string(),
                environment: "internal".to_string(),
                is_valid: true,
                ..Action::default()
            }],
            ..Workflow::default()
        };
        storage.set_workflow(&workflow).await.unwrap();
        workflow.id
    }

    #[tokio::test]
    async fn test_cron_frequency_is_rejected() {
        let scheduler = scheduler_fixture();
        let err = scheduler
            .create("sched-1", "wf-1", NODE_ID, "*/15 * * * *", "org-1", "")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Cron"));
        assert_eq!(scheduler.job_count().await, 0);
    }

    #[tokio::test]
    async fn test_zero_frequency_is_rejected() {
        let scheduler = scheduler_fixture();
        assert!(scheduler
            .create("sched-1", "wf-1", NODE_ID, "0", "org-1", "")
            .await
            .is_err());
        assert!(scheduler
            .create("sched-1", "wf-1", NODE_ID, "soon", "org-1", "")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_create_registers_timer_and_declaration() {
        let scheduler = scheduler_fixture();
        let workflow_id = seed_workflow(&scheduler).await;

        scheduler
            .create("sched-1", &workflow_id, NODE_ID, "60", "org-1", "{}")
            .await
            .unwrap();

        assert_eq!(scheduler.job_count().await, 1);
        let record = scheduler
            .engine
            .storage()
            .get_schedule("sched-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.seconds, 60);
        assert_eq!(record.environment, "onprem");
        assert!(record.wrapped_argument.contains("\"execution_source\":\"schedule\""));

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_delete_stops_timer_and_removes_declaration() {
        let scheduler = scheduler_fixture();
        let workflow_id = seed_workflow(&scheduler).await;

        scheduler
            .create("sched-1", &workflow_id, NODE_ID, "60", "org-1", "")
            .await
            .unwrap();
        scheduler.delete("sched-1").await.unwrap();

        assert_eq!(scheduler.job_count().await, 0);
        assert!(scheduler
            .engine
            .storage()
            .get_schedule("sched-1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_timer() {
        let scheduler = scheduler_fixture();

        // Declaration without a live timer, e.g. after a restart.
        scheduler
            .engine
            .storage()
            .set_schedule(&ScheduleRecord {
                id: "sched-orphan".to_string(),
                environment: "onprem".to_string(),
                seconds: 60,
                ..ScheduleRecord::default()
            })
            .await
            .unwrap();

        scheduler.delete("sched-orphan").await.unwrap();
        assert!(scheduler
            .engine
            .storage()
            .get_schedule("sched-orphan")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_delete_missing_everything_is_an_error() {
        let scheduler = scheduler_fixture();
        assert!(scheduler.delete("no-such-schedule").await.is_err());
    }

    #[tokio::test]
    async fn test_reload_registers_persisted_onprem_schedules() {
        let scheduler = scheduler_fixture();
        let workflow_id = seed_workflow(&scheduler).await;

        for (id, environment) in [("s1", "onprem"), ("s2", "onprem"), ("s3", "cloud")] {
            scheduler
                .engine
                .storage()
                .set_schedule(&ScheduleRecord {
                    id: id.to_string(),
                    workflow_id: workflow_id.clone(),
                    environment: environment.to_string(),
                    seconds: 120,
                    wrapped_argument: "{}".to_string(),
                    ..ScheduleRecord::default()
                })
                .await
                .unwrap();
        }

        let registered = scheduler.reload().await.unwrap();
        assert_eq!(registered, 2);
        assert_eq!(scheduler.job_count().await, 2);

        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_fires_and_starts_execution() {
        let scheduler = scheduler_fixture();
        let workflow_id = seed_workflow(&scheduler).await;

        scheduler
            .create("sched-fire", &workflow_id, NODE_ID, "30", "org-1", "{\"alert\": 1}")
            .await
            .unwrap();

        // Paused clock: sleeping advances virtual time past one period.
        tokio::time::sleep(Duration::from_secs(95)).await;

        let executions = scheduler
            .engine
            .storage()
            .list_executions(&workflow_id, 20)
            .await
            .unwrap();
        assert!(!executions.is_empty());
        assert_eq!(executions[0].execution_source, "schedule");

        scheduler.stop().await;
    }
}
