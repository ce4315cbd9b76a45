//! The lifecycle reconciler.
//!
//! Every read-modify-write of a resource runs under that resource's lock.
//! Each flow stamps a fresh `flow_id` into the status when it starts and only
//! writes its outcome back while that id is still current, so a late
//! completion never overwrites a newer transition or a recreated resource.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Utc};
use hostpilot_model::{
    Action, ApplicationResource, ExpectRequest, HealthReport, Host, Kind, LifecycleError,
    ResourceStatus, Status, CREATED_AT_KEY,
};
use hostpilot_reconcile::{plan_transition, Transition};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::locks::KeyedLocks;
use crate::bootstrap::Bootstrapper;
use crate::dispatch::Dispatcher;
use crate::store::{is_valid_bucket, KindStores, ResourceStore};

/// Reconciler settings.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Pause between starting the agent and sending it the install action.
    pub agent_start_delay: Duration,
}

/// Lifecycle service shared by the API handlers.
#[derive(Clone)]
pub struct Lifecycle {
    inner: Arc<LifecycleInner>,
}

struct LifecycleInner {
    stores: KindStores,
    locks: KeyedLocks,
    dispatcher: Dispatcher,
    bootstrapper: Bootstrapper,
    config: LifecycleConfig,
    shutdown: watch::Receiver<bool>,
}

impl Lifecycle {
    pub fn new(
        stores: KindStores,
        dispatcher: Dispatcher,
        bootstrapper: Bootstrapper,
        config: LifecycleConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            inner: Arc::new(LifecycleInner {
                stores,
                locks: KeyedLocks::new(),
                dispatcher,
                bootstrapper,
                config,
                shutdown,
            }),
        }
    }

    fn store(&self, kind: Kind) -> &ResourceStore {
        self.inner.stores.get(kind)
    }

    async fn lock(&self, kind: Kind, name: &str) -> tokio::sync::OwnedMutexGuard<()> {
        self.inner.locks.lock(&format!("{kind}/{name}")).await
    }

    async fn load(&self, kind: Kind, name: &str) -> Result<ApplicationResource, LifecycleError> {
        self.store(kind)
            .get(name)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(name.to_string()))
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Register a new resource. Any caller-supplied status is discarded.
    #[instrument(skip(self, resource), fields(name = %resource.name))]
    pub async fn create_resource(
        &self,
        kind: Kind,
        mut resource: ApplicationResource,
    ) -> Result<ApplicationResource, LifecycleError> {
        ApplicationResource::validate_name(&resource.name)?;

        resource.kind = kind;
        resource.status = ResourceStatus {
            updated_at: Some(Utc::now()),
            ..Default::default()
        };
        resource.spec.metadata.insert(
            CREATED_AT_KEY.to_string(),
            Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        );

        let _guard = self.lock(kind, &resource.name).await;
        if !self.store(kind).create(&resource).await? {
            return Err(LifecycleError::AlreadyExists(resource.name));
        }

        info!("Resource created");
        Ok(resource)
    }

    /// Current status. Never mutates the resource.
    pub async fn get_status(&self, kind: Kind, name: &str) -> Result<ResourceStatus, LifecycleError> {
        Ok(self.load(kind, name).await?.status)
    }

    /// Request a new expect status.
    ///
    /// If the request triggers a transition, the interim status is persisted
    /// and returned before the flow runs. Otherwise the status is returned
    /// unchanged.
    #[instrument(skip(self))]
    pub async fn request_status(
        &self,
        kind: Kind,
        name: &str,
        request: ExpectRequest,
    ) -> Result<ResourceStatus, LifecycleError> {
        let _guard = self.lock(kind, name).await;
        let mut resource = self.load(kind, name).await?;

        let Some(transition) = plan_transition(request, &resource.status) else {
            debug!(
                expect = %resource.status.expect,
                realtime = %resource.status.realtime,
                "No transition needed"
            );
            return Ok(resource.status);
        };

        let host = resource
            .primary_host()
            .cloned()
            .ok_or_else(|| LifecycleError::InvalidArgument(format!("{name} has no hosts")))?;
        if resource.spec.scripts.for_action(transition.action).is_empty() {
            return Err(LifecycleError::InvalidArgument(format!(
                "{name} has no {} script",
                transition.action
            )));
        }

        let flow_id = Uuid::new_v4();
        let status = &mut resource.status;
        status.expect = transition.expect;
        status.realtime = transition.interim;
        status.generation += 1;
        status.flow_id = Some(flow_id);
        status.last_action = Some(transition.action);
        status.last_error = None;
        status.updated_at = Some(Utc::now());
        self.store(kind).put(&resource).await?;

        info!(
            action = %transition.action,
            realtime = %transition.interim,
            generation = resource.status.generation,
            flow_id = %flow_id,
            "Transition started"
        );

        let status = resource.status.clone();
        self.spawn_flow(kind, flow_id, resource, host, transition);
        Ok(status)
    }

    /// Apply a health report from a resource's agent.
    ///
    /// An unhealthy report while the resource is expected to run marks it
    /// failed and records it in today's changed index.
    #[instrument(skip(self, report), fields(code = %report.code))]
    pub async fn report_health(
        &self,
        kind: Kind,
        name: &str,
        report: HealthReport,
    ) -> Result<(), LifecycleError> {
        let _guard = self.lock(kind, name).await;
        let mut resource = self.load(kind, name).await?;

        if report.is_healthy() {
            debug!("Healthy report");
            return Ok(());
        }
        if resource.status.expect != Status::Running || resource.status.realtime == Status::Failed {
            debug!(
                expect = %resource.status.expect,
                realtime = %resource.status.realtime,
                "Unhealthy report ignored"
            );
            return Ok(());
        }

        let now = Utc::now();
        resource.status.realtime = Status::Failed;
        resource.status.last_error = Some(format!(
            "health check failed with code {}: {}",
            report.code, report.msg
        ));
        resource.status.updated_at = Some(now);

        let store = self.store(kind);
        store.put(&resource).await?;
        store.record_changed(name, now).await?;

        warn!(msg = %report.msg, "Resource marked failed by health check");
        Ok(())
    }

    /// Remove a resource. Returns false if it did not exist.
    #[instrument(skip(self))]
    pub async fn delete_resource(&self, kind: Kind, name: &str) -> Result<bool, LifecycleError> {
        let _guard = self.lock(kind, name).await;
        let deleted = self.store(kind).delete(name).await?;
        if deleted {
            info!("Resource deleted");
        } else {
            debug!("Delete of missing resource");
        }
        Ok(deleted)
    }

    /// Names recorded in the changed index for an `MMDD` date.
    pub async fn changed_since(&self, kind: Kind, date: &str) -> Result<Vec<String>, LifecycleError> {
        if !is_valid_bucket(date) {
            return Err(LifecycleError::InvalidArgument(format!(
                "date must be MMDD: {date}"
            )));
        }
        Ok(self.store(kind).changed_names(date).await?)
    }

    /// Probe each kind's store, for readiness checks.
    pub async fn probe_stores(&self) -> Vec<(Kind, Result<(), LifecycleError>)> {
        let mut results = Vec::with_capacity(Kind::ALL.len());
        for store in self.inner.stores.all() {
            results.push((store.kind(), store.probe().await.map_err(Into::into)));
        }
        results
    }

    // =========================================================================
    // Flows
    // =========================================================================

    fn spawn_flow(
        &self,
        kind: Kind,
        flow_id: Uuid,
        resource: ApplicationResource,
        host: Host,
        transition: Transition,
    ) {
        let this = self.clone();
        let shutdown = self.inner.shutdown.clone();

        tokio::spawn(async move {
            let name = resource.name.clone();
            let action = transition.action;

            tokio::select! {
                result = this.run_flow(&resource, &host, action) => {
                    let succeeded = result.is_ok();
                    let outcome = result.map(|()| transition.on_success);
                    let applied = this.complete(kind, &name, flow_id, outcome).await;

                    if applied && succeeded && action == Action::Install {
                        this.start_health_check(&resource, &host).await;
                    }
                }
                _ = wait_for_shutdown(shutdown) => {
                    warn!(name = %name, action = %action, "Flow interrupted by shutdown");
                }
            }
        });
    }

    async fn run_flow(
        &self,
        resource: &ApplicationResource,
        host: &Host,
        action: Action,
    ) -> Result<(), LifecycleError> {
        if action == Action::Install {
            self.inner.bootstrapper.install(host).await?;
            tokio::time::sleep(self.inner.config.agent_start_delay).await;
        }
        self.inner
            .dispatcher
            .send_action(&host.ip, action, resource)
            .await?;
        Ok(())
    }

    /// Record a flow outcome. Returns true if it was applied.
    async fn complete(
        &self,
        kind: Kind,
        name: &str,
        flow_id: Uuid,
        outcome: Result<Status, LifecycleError>,
    ) -> bool {
        let _guard = self.lock(kind, name).await;
        let store = self.store(kind);

        let mut resource = match store.get(name).await {
            Ok(Some(resource)) => resource,
            Ok(None) => {
                info!(name = %name, "Resource deleted during flow, discarding outcome");
                return false;
            }
            Err(e) => {
                error!(name = %name, error = %e, "Failed to load resource after flow");
                return false;
            }
        };

        if resource.status.flow_id != Some(flow_id) {
            info!(
                name = %name,
                flow_id = %flow_id,
                current_flow_id = ?resource.status.flow_id,
                "Flow superseded, discarding outcome"
            );
            return false;
        }

        match outcome {
            Ok(status) => {
                info!(name = %name, realtime = %status, "Transition succeeded");
                resource.status.realtime = status;
                resource.status.last_error = None;
            }
            Err(e) => {
                error!(name = %name, error = %e, "Transition failed");
                resource.status.realtime = Transition::ON_FAILURE;
                resource.status.last_error = Some(e.to_string());
            }
        }
        resource.status.flow_id = None;
        resource.status.updated_at = Some(Utc::now());

        if let Err(e) = store.put(&resource).await {
            error!(name = %name, error = %e, "Failed to persist flow outcome");
            return false;
        }
        true
    }

    async fn start_health_check(&self, resource: &ApplicationResource, host: &Host) {
        if resource.spec.scripts.check.is_empty() {
            warn!(name = %resource.name, "No check script, health monitoring disabled");
            return;
        }
        match self
            .inner
            .dispatcher
            .send_action(&host.ip, Action::Check, resource)
            .await
        {
            Ok(()) => info!(name = %resource.name, "Health check started"),
            Err(e) => error!(name = %resource.name, error = %e, "Failed to start health check"),
        }
    }
}

/// Resolves once shutdown is signalled. Never resolves if the sender is gone.
async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use hostpilot_model::AgentActionRequest;
    use tokio::sync::Semaphore;

    use super::*;
    use crate::bootstrap::test_support::{self as bootstrap_support, FakeConnector, RemoteOp};
    use crate::dispatch::test_support::{self as dispatch_support, ScriptedTransport};
    use crate::dispatch::{AgentResponse, AgentTransport, TransportError};
    use crate::store::bucket_for;
    use crate::store::test_support::{resource, stores};

    struct Harness {
        lifecycle: Lifecycle,
        stores: KindStores,
        connector: Arc<FakeConnector>,
        shutdown: watch::Sender<bool>,
    }

    fn harness(transport: Arc<dyn AgentTransport>) -> Harness {
        let stores = stores();
        let connector = Arc::new(FakeConnector::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let lifecycle = Lifecycle::new(
            stores.clone(),
            Dispatcher::new(transport, dispatch_support::config()),
            Bootstrapper::new(connector.clone(), bootstrap_support::config()),
            LifecycleConfig {
                agent_start_delay: Duration::ZERO,
            },
            shutdown_rx,
        );
        Harness {
            lifecycle,
            stores,
            connector,
            shutdown: shutdown_tx,
        }
    }

    async fn wait_for_realtime(lifecycle: &Lifecycle, name: &str, expected: Status) -> ResourceStatus {
        for _ in 0..200 {
            let status = lifecycle.get_status(Kind::Database, name).await.unwrap();
            if status.realtime == expected {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{name} never reached {expected}");
    }

    async fn seed(h: &Harness, name: &str, realtime: Status) {
        let mut r = resource(name);
        r.status.expect = realtime;
        r.status.realtime = realtime;
        h.stores.get(Kind::Database).put(&r).await.unwrap();
    }

    /// Blocks every request until a permit is added.
    struct GatedTransport {
        gate: Semaphore,
        calls: Mutex<Vec<String>>,
    }

    impl GatedTransport {
        fn closed() -> Arc<Self> {
            Arc::new(Self {
                gate: Semaphore::new(0),
                calls: Mutex::default(),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        async fn wait_for_calls(&self, count: usize) {
            for _ in 0..200 {
                if self.calls().len() >= count {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("expected {count} agent calls, saw {:?}", self.calls());
        }
    }

    fn unhealthy(msg: &str) -> HealthReport {
        HealthReport {
            code: "1".to_string(),
            msg: msg.to_string(),
        }
    }

    #[async_trait]
    impl AgentTransport for GatedTransport {
        async fn post_action(
            &self,
            url: &str,
            _request: &AgentActionRequest,
        ) -> Result<AgentResponse, TransportError> {
            self.calls.lock().unwrap().push(url.to_string());
            self.gate.acquire().await.unwrap().forget();
            ScriptedTransport::ok()
        }
    }

    #[tokio::test]
    async fn test_create_resets_status_and_stamps_metadata() {
        let h = harness(Arc::new(ScriptedTransport::default()));
        let mut r = resource("db-1");
        r.status.expect = Status::Running;
        r.status.realtime = Status::Running;

        let created = h
            .lifecycle
            .create_resource(Kind::Middleware, r)
            .await
            .unwrap();

        assert_eq!(created.kind, Kind::Middleware);
        assert_eq!(created.status.expect, Status::NotInstalled);
        assert_eq!(created.status.realtime, Status::NotInstalled);
        assert!(created.spec.metadata.contains_key(CREATED_AT_KEY));
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates_and_bad_names() {
        let h = harness(Arc::new(ScriptedTransport::default()));
        h.lifecycle
            .create_resource(Kind::Database, resource("db-1"))
            .await
            .unwrap();

        let dup = h
            .lifecycle
            .create_resource(Kind::Database, resource("db-1"))
            .await
            .unwrap_err();
        assert!(matches!(dup, LifecycleError::AlreadyExists(_)));

        let empty = h
            .lifecycle
            .create_resource(Kind::Database, resource(""))
            .await
            .unwrap_err();
        assert!(matches!(empty, LifecycleError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_install_happy_path() {
        let transport = Arc::new(ScriptedTransport::default());
        let h = harness(transport.clone());
        h.lifecycle
            .create_resource(Kind::Database, resource("db-1"))
            .await
            .unwrap();

        let interim = h
            .lifecycle
            .request_status(Kind::Database, "db-1", ExpectRequest::Running)
            .await
            .unwrap();
        assert_eq!(interim.expect, Status::Running);
        assert_eq!(interim.realtime, Status::Installing);

        let done = wait_for_realtime(&h.lifecycle, "db-1", Status::Running).await;
        assert_eq!(done.expect, Status::Running);
        assert_eq!(done.last_action, Some(Action::Install));

        // The check dispatch follows the completion write.
        for _ in 0..200 {
            if transport.urls().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            transport.urls(),
            vec!["http://127.0.0.1:3335/install", "http://127.0.0.1:3335/check"]
        );
        assert!(h
            .connector
            .ops()
            .iter()
            .any(|op| matches!(op, RemoteOp::Upload { .. })));
    }

    #[tokio::test]
    async fn test_unknown_resource_is_not_found() {
        let h = harness(Arc::new(ScriptedTransport::default()));
        let err = h
            .lifecycle
            .request_status(Kind::Database, "ghost", ExpectRequest::Running)
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_failed_install_records_error_and_can_be_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(AgentResponse {
            status: 500,
            body: r#"{"error":"install.sh exited with 1"}"#.to_string(),
        })]));
        let h = harness(transport.clone());
        h.lifecycle
            .create_resource(Kind::Database, resource("db-1"))
            .await
            .unwrap();

        h.lifecycle
            .request_status(Kind::Database, "db-1", ExpectRequest::Running)
            .await
            .unwrap();
        let failed = wait_for_realtime(&h.lifecycle, "db-1", Status::Failed).await;
        assert!(failed.last_error.unwrap().contains("install.sh exited with 1"));

        let retry = h
            .lifecycle
            .request_status(Kind::Database, "db-1", ExpectRequest::Running)
            .await
            .unwrap();
        assert_eq!(retry.realtime, Status::Installing);
        assert_eq!(retry.last_error, None);
        wait_for_realtime(&h.lifecycle, "db-1", Status::Running).await;
    }

    #[tokio::test]
    async fn test_restart_is_stored_as_running() {
        let transport = Arc::new(ScriptedTransport::default());
        let h = harness(transport.clone());
        seed(&h, "db-1", Status::Running).await;

        let interim = h
            .lifecycle
            .request_status(Kind::Database, "db-1", ExpectRequest::Restart)
            .await
            .unwrap();
        assert_eq!(interim.expect, Status::Running);
        assert_eq!(interim.realtime, Status::Restarting);

        wait_for_realtime(&h.lifecycle, "db-1", Status::Running).await;
        assert_eq!(transport.urls(), vec!["http://127.0.0.1:3335/restart"]);
        assert!(h.connector.ops().is_empty());
    }

    #[tokio::test]
    async fn test_no_op_request_returns_unchanged_status() {
        let transport = Arc::new(ScriptedTransport::default());
        let h = harness(transport.clone());
        h.lifecycle
            .create_resource(Kind::Database, resource("db-1"))
            .await
            .unwrap();

        let status = h
            .lifecycle
            .request_status(Kind::Database, "db-1", ExpectRequest::Stopped)
            .await
            .unwrap();

        assert_eq!(status.expect, Status::NotInstalled);
        assert_eq!(status.realtime, Status::NotInstalled);
        assert_eq!(status.generation, 0);
        assert!(transport.urls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_script_is_invalid_argument() {
        let h = harness(Arc::new(ScriptedTransport::default()));
        let mut r = resource("db-1");
        r.spec.scripts.stop.clear();
        r.status.expect = Status::Running;
        r.status.realtime = Status::Running;
        h.stores.get(Kind::Database).put(&r).await.unwrap();

        let err = h
            .lifecycle
            .request_status(Kind::Database, "db-1", ExpectRequest::Stopped)
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidArgument(_)));

        let status = h.lifecycle.get_status(Kind::Database, "db-1").await.unwrap();
        assert_eq!(status.realtime, Status::Running);
    }

    #[tokio::test]
    async fn test_unhealthy_report_marks_failed_and_records_change() {
        let h = harness(Arc::new(ScriptedTransport::default()));
        seed(&h, "db-1", Status::Running).await;

        h.lifecycle
            .report_health(
                Kind::Database,
                "db-1",
                HealthReport {
                    code: "1".to_string(),
                    msg: "mysqld down".to_string(),
                },
            )
            .await
            .unwrap();

        let status = h.lifecycle.get_status(Kind::Database, "db-1").await.unwrap();
        assert_eq!(status.realtime, Status::Failed);
        assert!(status.last_error.unwrap().contains("mysqld down"));

        let today = bucket_for(Utc::now().date_naive());
        assert_eq!(
            h.lifecycle.changed_since(Kind::Database, &today).await.unwrap(),
            vec!["db-1"]
        );
    }

    #[tokio::test]
    async fn test_health_report_ignored_unless_expected_running() {
        let h = harness(Arc::new(ScriptedTransport::default()));
        seed(&h, "db-1", Status::Stopped).await;

        h.lifecycle
            .report_health(
                Kind::Database,
                "db-1",
                HealthReport {
                    code: "1".to_string(),
                    msg: "stopped".to_string(),
                },
            )
            .await
            .unwrap();

        let status = h.lifecycle.get_status(Kind::Database, "db-1").await.unwrap();
        assert_eq!(status.realtime, Status::Stopped);
        let today = bucket_for(Utc::now().date_naive());
        assert!(h
            .lifecycle
            .changed_since(Kind::Database, &today)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_healthy_report_changes_nothing() {
        let h = harness(Arc::new(ScriptedTransport::default()));
        seed(&h, "db-1", Status::Running).await;
        let before = h.lifecycle.get_status(Kind::Database, "db-1").await.unwrap();

        h.lifecycle
            .report_health(
                Kind::Database,
                "db-1",
                HealthReport {
                    code: "0".to_string(),
                    msg: "ok".to_string(),
                },
            )
            .await
            .unwrap();

        let after = h.lifecycle.get_status(Kind::Database, "db-1").await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_superseded_flow_outcome_is_discarded() {
        let transport = GatedTransport::closed();
        let h = harness(transport.clone());
        seed(&h, "db-1", Status::Stopped).await;

        h.lifecycle
            .request_status(Kind::Database, "db-1", ExpectRequest::Running)
            .await
            .unwrap();
        transport.wait_for_calls(1).await;

        // The agent reports failure mid-start and the operator asks again.
        h.lifecycle
            .report_health(Kind::Database, "db-1", unhealthy("mysqld down"))
            .await
            .unwrap();
        let retry = h
            .lifecycle
            .request_status(Kind::Database, "db-1", ExpectRequest::Running)
            .await
            .unwrap();
        assert_eq!(retry.realtime, Status::Starting);
        assert_eq!(retry.generation, 2);
        transport.wait_for_calls(2).await;

        // Permits go to waiters in order, so this releases the first start.
        transport.gate.add_permits(1);
        tokio::time::sleep(Duration::from_millis(100)).await;
        let status = h.lifecycle.get_status(Kind::Database, "db-1").await.unwrap();
        assert_eq!(status.realtime, Status::Starting);
        assert_eq!(status.flow_id, retry.flow_id);

        transport.gate.add_permits(1);
        let done = wait_for_realtime(&h.lifecycle, "db-1", Status::Running).await;
        assert_eq!(done.flow_id, None);
    }

    #[tokio::test]
    async fn test_health_report_during_flow_is_overtaken_by_outcome() {
        let transport = GatedTransport::closed();
        let h = harness(transport.clone());
        seed(&h, "db-1", Status::Stopped).await;

        h.lifecycle
            .request_status(Kind::Database, "db-1", ExpectRequest::Running)
            .await
            .unwrap();
        transport.wait_for_calls(1).await;

        h.lifecycle
            .report_health(Kind::Database, "db-1", unhealthy("not up yet"))
            .await
            .unwrap();
        let status = h.lifecycle.get_status(Kind::Database, "db-1").await.unwrap();
        assert_eq!(status.realtime, Status::Failed);

        transport.gate.add_permits(1);
        let done = wait_for_realtime(&h.lifecycle, "db-1", Status::Running).await;
        assert_eq!(done.expect, Status::Running);
        assert_eq!(done.last_error, None);
        assert_eq!(transport.calls(), vec!["http://127.0.0.1:3335/start"]);

        let today = bucket_for(Utc::now().date_naive());
        assert_eq!(
            h.lifecycle.changed_since(Kind::Database, &today).await.unwrap(),
            vec!["db-1"]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_start_one_transition() {
        let transport = GatedTransport::closed();
        let h = harness(transport.clone());
        h.lifecycle
            .create_resource(Kind::Database, resource("db-1"))
            .await
            .unwrap();

        let requests: Vec<_> = (0..8)
            .map(|_| {
                let lifecycle = h.lifecycle.clone();
                tokio::spawn(async move {
                    lifecycle
                        .request_status(Kind::Database, "db-1", ExpectRequest::Running)
                        .await
                })
            })
            .collect();
        for request in requests {
            let status = request.await.unwrap().unwrap();
            assert_eq!(status.realtime, Status::Installing);
            assert_eq!(status.generation, 1);
        }

        transport.wait_for_calls(1).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.calls(), vec!["http://127.0.0.1:3335/install"]);
        let uploads = h
            .connector
            .ops()
            .iter()
            .filter(|op| matches!(op, RemoteOp::Upload { .. }))
            .count();
        assert_eq!(uploads, 1);
    }

    #[tokio::test]
    async fn test_recreated_resource_ignores_old_flow() {
        let transport = GatedTransport::closed();
        let h = harness(transport.clone());
        seed(&h, "db-1", Status::Running).await;

        h.lifecycle
            .request_status(Kind::Database, "db-1", ExpectRequest::Stopped)
            .await
            .unwrap();
        transport.wait_for_calls(1).await;

        assert!(h
            .lifecycle
            .delete_resource(Kind::Database, "db-1")
            .await
            .unwrap());
        h.lifecycle
            .create_resource(Kind::Database, resource("db-1"))
            .await
            .unwrap();
        let install = h
            .lifecycle
            .request_status(Kind::Database, "db-1", ExpectRequest::Running)
            .await
            .unwrap();
        assert_eq!(install.realtime, Status::Installing);
        assert_eq!(install.generation, 1);
        transport.wait_for_calls(2).await;

        // Releases the stop issued before the delete.
        transport.gate.add_permits(1);
        tokio::time::sleep(Duration::from_millis(100)).await;
        let status = h.lifecycle.get_status(Kind::Database, "db-1").await.unwrap();
        assert_eq!(status.expect, Status::Running);
        assert_eq!(status.realtime, Status::Installing);

        transport.gate.add_permits(1);
        wait_for_realtime(&h.lifecycle, "db-1", Status::Running).await;
        assert_eq!(
            transport.calls()[..2],
            [
                "http://127.0.0.1:3335/stop".to_string(),
                "http://127.0.0.1:3335/install".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_during_flow_discards_outcome() {
        let transport = GatedTransport::closed();
        let h = harness(transport.clone());
        seed(&h, "db-1", Status::Running).await;

        h.lifecycle
            .request_status(Kind::Database, "db-1", ExpectRequest::Stopped)
            .await
            .unwrap();
        assert!(h
            .lifecycle
            .delete_resource(Kind::Database, "db-1")
            .await
            .unwrap());

        transport.gate.add_permits(1);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let err = h
            .lifecycle
            .get_status(Kind::Database, "db-1")
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let h = harness(Arc::new(ScriptedTransport::default()));
        h.lifecycle
            .create_resource(Kind::Database, resource("db-1"))
            .await
            .unwrap();

        assert!(h
            .lifecycle
            .delete_resource(Kind::Database, "db-1")
            .await
            .unwrap());
        assert!(!h
            .lifecycle
            .delete_resource(Kind::Database, "db-1")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_changed_since_validates_date() {
        let h = harness(Arc::new(ScriptedTransport::default()));
        let err = h
            .lifecycle
            .changed_since(Kind::Database, "2024-01-01")
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_flow() {
        let transport = GatedTransport::closed();
        let h = harness(transport.clone());
        seed(&h, "db-1", Status::Running).await;

        h.lifecycle
            .request_status(Kind::Database, "db-1", ExpectRequest::Stopped)
            .await
            .unwrap();
        h.shutdown.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        transport.gate.add_permits(1);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let status = h.lifecycle.get_status(Kind::Database, "db-1").await.unwrap();
        assert_eq!(status.realtime, Status::Stopping);
    }
}
