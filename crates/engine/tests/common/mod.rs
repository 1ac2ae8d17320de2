//! In-memory collaborators for engine integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use patchflow_core::clients::{
    CatalogRow, ClientError, DirectoryInstance, InstanceDirectory, InvocationStatus,
    NotificationChannel, PatchCatalog, RemoteExecutor, RemoteStatus, ResultStore,
};
use patchflow_core::{MachineHistoryRecord, OsKey};
use patchflow_engine::{Collaborators, EngineConfig, PollConfig};

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeCatalog {
    rows: HashMap<String, Vec<CatalogRow>>,
    failing: HashSet<String>,
    stalled: HashSet<String>,
}

impl FakeCatalog {
    pub fn with_kbs(mut self, os: &str, kbs: &[&str]) -> Self {
        let rows = self.rows.entry(os.to_string()).or_default();
        rows.extend(kbs.iter().map(|kb| CatalogRow {
            kb: Some(kb.to_string()),
            severity: Some("Critical".to_string()),
            ..Default::default()
        }));
        self
    }

    pub fn failing(mut self, os: &str) -> Self {
        self.failing.insert(os.to_string());
        self
    }

    /// Queries for `os` never return.
    pub fn stalled(mut self, os: &str) -> Self {
        self.stalled.insert(os.to_string());
        self
    }
}

#[async_trait]
impl PatchCatalog for FakeCatalog {
    async fn list_by_os(&self, os: &OsKey) -> Result<Vec<CatalogRow>, ClientError> {
        if self.stalled.contains(os.as_str()) {
            return std::future::pending().await;
        }
        if self.failing.contains(os.as_str()) {
            return Err(ClientError::request("dynamodb", "ResourceNotFoundException"));
        }
        Ok(self.rows.get(os.as_str()).cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeDirectory {
    instances: Vec<DirectoryInstance>,
}

impl FakeDirectory {
    pub fn with_machines(mut self, os_tag: &str, ids: &[&str]) -> Self {
        self.instances.extend(ids.iter().map(|id| DirectoryInstance {
            id: id.to_string(),
            os_tag: Some(os_tag.to_string()),
        }));
        self
    }
}

#[async_trait]
impl InstanceDirectory for FakeDirectory {
    async fn list_running(&self) -> Result<Vec<DirectoryInstance>, ClientError> {
        Ok(self.instances.clone())
    }

    async fn os_tag(&self, instance_id: &str) -> Result<Option<String>, ClientError> {
        Ok(self
            .instances
            .iter()
            .find(|i| i.id == instance_id)
            .and_then(|i| i.os_tag.clone()))
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Scripted remote behaviour for one `(machine, kb)` pair.
#[derive(Clone)]
pub enum Behaviour {
    /// Every status query returns this, forever.
    Finish(RemoteStatus, String),
    /// Never reaches a terminal status.
    Hang,
    /// Submission is rejected.
    RejectSubmit,
    /// Submission never returns.
    StallSubmit,
}

impl Behaviour {
    pub fn success(reboot: bool) -> Self {
        Self::Finish(
            RemoteStatus::Success,
            format!("{{\"KB\":\"{{kb}}\",\"RebootRequired\":{reboot}}}"),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub machine_id: String,
    pub script: String,
    pub timeout: Duration,
}

/// Executor whose scripts are plain KB ids, so behaviour is keyed by
/// `(machine, script)`.
pub struct FakeExecutor {
    default: Behaviour,
    overrides: HashMap<(String, String), Behaviour>,
    submissions: Mutex<Vec<Submission>>,
    jobs: Mutex<HashMap<String, (String, String)>>,
    status_calls: Mutex<u32>,
}

impl Default for FakeExecutor {
    fn default() -> Self {
        Self {
            default: Behaviour::success(false),
            overrides: HashMap::new(),
            submissions: Mutex::new(Vec::new()),
            jobs: Mutex::new(HashMap::new()),
            status_calls: Mutex::new(0),
        }
    }
}

impl FakeExecutor {
    pub fn with_default(mut self, behaviour: Behaviour) -> Self {
        self.default = behaviour;
        self
    }

    pub fn with(mut self, machine: &str, kb: &str, behaviour: Behaviour) -> Self {
        self.overrides
            .insert((machine.to_string(), kb.to_string()), behaviour);
        self
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn status_calls(&self) -> u32 {
        *self.status_calls.lock().unwrap()
    }

    fn behaviour(&self, machine: &str, kb: &str) -> Behaviour {
        self.overrides
            .get(&(machine.to_string(), kb.to_string()))
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}

#[async_trait]
impl RemoteExecutor for FakeExecutor {
    async fn submit(
        &self,
        machine_id: &str,
        script: &str,
        timeout: Duration,
    ) -> Result<String, ClientError> {
        self.submissions.lock().unwrap().push(Submission {
            machine_id: machine_id.to_string(),
            script: script.to_string(),
            timeout,
        });
        match self.behaviour(machine_id, script) {
            Behaviour::RejectSubmit => {
                return Err(ClientError::request("ssm", "InvalidInstanceId"));
            }
            Behaviour::StallSubmit => return std::future::pending().await,
            Behaviour::Finish(..) | Behaviour::Hang => {}
        }
        let mut jobs = self.jobs.lock().unwrap();
        let job_id = format!("cmd-{}", jobs.len() + 1);
        jobs.insert(job_id.clone(), (machine_id.to_string(), script.to_string()));
        Ok(job_id)
    }

    async fn status(
        &self,
        job_id: &str,
        machine_id: &str,
    ) -> Result<InvocationStatus, ClientError> {
        *self.status_calls.lock().unwrap() += 1;
        let Some((machine, kb)) = self.jobs.lock().unwrap().get(job_id).cloned() else {
            return Err(ClientError::request("ssm", "InvocationDoesNotExist"));
        };
        assert_eq!(machine, machine_id, "status queried for the wrong machine");

        match self.behaviour(&machine, &kb) {
            Behaviour::Finish(status, output) => Ok(InvocationStatus {
                status,
                output: output.replace("{kb}", &kb),
            }),
            Behaviour::Hang | Behaviour::RejectSubmit | Behaviour::StallSubmit => Ok(InvocationStatus {
                status: RemoteStatus::InProgress,
                output: String::new(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Store / notifier
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeStore {
    failing_machines: HashSet<String>,
    records: Mutex<Vec<MachineHistoryRecord>>,
}

impl FakeStore {
    pub fn failing_for(mut self, machine: &str) -> Self {
        self.failing_machines.insert(machine.to_string());
        self
    }

    pub fn records(&self) -> Vec<MachineHistoryRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResultStore for FakeStore {
    async fn append(&self, record: &MachineHistoryRecord) -> Result<(), ClientError> {
        if self.failing_machines.contains(&record.machine_id) {
            return Err(ClientError::request("dynamodb", "ProvisionedThroughputExceeded"));
        }
        let mut records = self.records.lock().unwrap();
        let duplicate = records
            .iter()
            .any(|r| r.machine_id == record.machine_id && r.timestamp == record.timestamp);
        if duplicate {
            return Err(ClientError::Conflict {
                service: "dynamodb",
                message: "ConditionalCheckFailedException".to_string(),
            });
        }
        records.push(record.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    fail: bool,
    published: Mutex<Vec<(String, String)>>,
}

impl FakeNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationChannel for FakeNotifier {
    async fn publish(&self, subject: &str, message: &str) -> Result<(), ClientError> {
        if self.fail {
            return Err(ClientError::request("sns", "AuthorizationError"));
        }
        self.published
            .lock()
            .unwrap()
            .push((subject.to_string(), message.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub struct Harness {
    pub catalog: Arc<FakeCatalog>,
    pub directory: Arc<FakeDirectory>,
    pub executor: Arc<FakeExecutor>,
    pub store: Arc<FakeStore>,
    pub notifier: Arc<FakeNotifier>,
}

impl Harness {
    pub fn new(catalog: FakeCatalog, directory: FakeDirectory, executor: FakeExecutor) -> Self {
        Self {
            catalog: Arc::new(catalog),
            directory: Arc::new(directory),
            executor: Arc::new(executor),
            store: Arc::new(FakeStore::default()),
            notifier: Arc::new(FakeNotifier::default()),
        }
    }

    pub fn with_store(mut self, store: FakeStore) -> Self {
        self.store = Arc::new(store);
        self
    }

    pub fn with_notifier(mut self, notifier: FakeNotifier) -> Self {
        self.notifier = Arc::new(notifier);
        self
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            catalog: self.catalog.clone(),
            directory: self.directory.clone(),
            executor: self.executor.clone(),
            store: self.store.clone(),
            notifier: self.notifier.clone(),
        }
    }
}

/// Config whose script is just the KB id, with short polling bounds.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        max_concurrent_jobs: 4,
        execution_timeout: Duration::from_secs(600),
        poll: PollConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            deadline: Duration::from_secs(60),
        },
        run_deadline: Duration::from_secs(600),
        template: patchflow_core::script::ScriptTemplate::new("{kb}").unwrap(),
    }
}
