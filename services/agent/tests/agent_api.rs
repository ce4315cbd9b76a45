//! Agent API integration tests.
//!
//! Serves the agent router on a real listener, with a stub script repository
//! and a stub control plane receiving health reports.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use hostpilot_agent::{
    api,
    health::{HealthChecker, HttpHealthReporter, ScriptCheckRunner, CHECK_INFO_FILE},
    scripts::{HttpScriptSource, ScriptResolver},
    ActionHandler,
};
use hostpilot_model::HealthReport;
use serde_json::{json, Value};
use tokio::net::TcpListener;

type Reports = Arc<Mutex<Vec<(String, HealthReport)>>>;

struct AgentHarness {
    base_url: String,
    client: reqwest::Client,
    work_dir: tempfile::TempDir,
    repo_url: String,
    operator_port: u16,
    reports: Reports,
    checker: Arc<HealthChecker>,
}

impl AgentHarness {
    async fn new() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info,hostpilot_agent=debug".into()),
            )
            .with_test_writer()
            .try_init();

        let repo_url = format!("http://{}/scripts/", serve(script_repo()).await);

        let reports: Reports = Arc::new(Mutex::new(Vec::new()));
        let operator_port = serve(operator(reports.clone())).await.port();

        let work_dir = tempfile::tempdir().unwrap();
        let timeout = Duration::from_secs(5);
        let checker = Arc::new(HealthChecker::new(
            work_dir.path(),
            Arc::new(ScriptCheckRunner),
            Arc::new(HttpHealthReporter::new(timeout).unwrap()),
        ));
        let resolver = ScriptResolver::new(
            work_dir.path(),
            Arc::new(HttpScriptSource::new(timeout).unwrap()),
        );
        let handler = Arc::new(ActionHandler::new(resolver, checker.clone()));
        let addr = serve(api::router(handler)).await;

        Self {
            base_url: format!("http://{addr}"),
            client: reqwest::Client::new(),
            work_dir,
            repo_url,
            operator_port,
            reports,
            checker,
        }
    }

    fn request(&self) -> Value {
        json!({
            "name": "db-1",
            "kind": "database",
            "operator_ip": "127.0.0.1",
            "operator_port": self.operator_port,
            "repo_url": self.repo_url,
            "install": "install.sh",
            "start": "start.sh",
            "stop": "",
            "restart": "missing.sh",
            "uninstall": "uninstall.sh",
            "check": "check.sh",
            "package": "mysql-5.7.tar.gz",
            "metadata": {"PACKAGE": "mysql-5.7.tar.gz"}
        })
    }

    async fn post(&self, action: &str, body: &Value) -> (u16, Value) {
        let response = self
            .client
            .post(format!("{}/{action}", self.base_url))
            .json(body)
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }

    async fn wait_for_reports(&self, count: usize) -> Vec<(String, HealthReport)> {
        for _ in 0..300 {
            let reports = self.reports.lock().unwrap().clone();
            if reports.len() >= count {
                return reports;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {count} health reports");
    }
}

async fn serve(app: Router) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn script_repo() -> Router {
    async fn script(Path(name): Path<String>) -> Result<&'static str, StatusCode> {
        match name.as_str() {
            "install.sh" => Ok("echo \"$1\" > installed\n"),
            "start.sh" => Ok("echo starting\nexit 2\n"),
            "uninstall.sh" => Ok("rm -f installed\n"),
            "check.sh" => Ok("echo probing\necho '{\"code\":\"0\",\"msg\":\"ok\"}'\n"),
            _ => Err(StatusCode::NOT_FOUND),
        }
    }
    Router::new().route("/scripts/{name}", get(script))
}

fn operator(reports: Reports) -> Router {
    async fn check(
        State(reports): State<Reports>,
        Path((kind, name)): Path<(String, String)>,
        Json(report): Json<HealthReport>,
    ) -> StatusCode {
        reports
            .lock()
            .unwrap()
            .push((format!("{kind}/{name}"), report));
        StatusCode::ACCEPTED
    }
    Router::new()
        .route("/apis/v1alpha1/{kind}/{name}/check", put(check))
        .with_state(reports)
}

#[tokio::test]
async fn test_ping() {
    let h = AgentHarness::new().await;
    let body: Value = h
        .client
        .get(format!("{}/ping", h.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({"message": "pong"}));
}

#[tokio::test]
async fn test_install_runs_fetched_script() {
    let h = AgentHarness::new().await;

    let (status, body) = h.post("install", &h.request()).await;

    assert_eq!(status, 200);
    assert_eq!(body, json!({"msg": "ok"}));
    let installed = std::fs::read_to_string(h.work_dir.path().join("installed")).unwrap();
    assert_eq!(installed, "PACKAGE=mysql-5.7.tar.gz\n");
    assert!(h.work_dir.path().join("install.sh").exists());
}

#[tokio::test]
async fn test_unknown_action_is_bad_request() {
    let h = AgentHarness::new().await;
    let (status, body) = h.post("reboot", &h.request()).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "action can't be reboot");
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let h = AgentHarness::new().await;
    let (status, body) = h.post("install", &json!({"name": "db-1"})).await;
    assert_eq!(status, 400);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_empty_script_is_bad_request() {
    let h = AgentHarness::new().await;
    let (status, body) = h.post("stop", &h.request()).await;
    assert_eq!(status, 400);
    assert!(body["error"].as_str().unwrap().contains("stop"));
}

#[tokio::test]
async fn test_script_failures_are_server_errors() {
    let h = AgentHarness::new().await;

    let (status, _) = h.post("start", &h.request()).await;
    assert_eq!(status, 500);

    let (status, body) = h.post("restart", &h.request()).await;
    assert_eq!(status, 500);
    assert!(body["error"].as_str().unwrap().contains("404"));
}

#[tokio::test]
async fn test_check_reports_health_until_uninstall() {
    let h = AgentHarness::new().await;

    let (status, _) = h.post("check", &h.request()).await;
    assert_eq!(status, 200);
    assert!(h.work_dir.path().join(CHECK_INFO_FILE).exists());

    let reports = h.wait_for_reports(1).await;
    assert_eq!(reports[0].0, "database/db-1");
    assert!(reports[0].1.is_healthy());

    let (status, _) = h.post("uninstall", &h.request()).await;
    assert_eq!(status, 200);
    assert!(!h.checker.is_running().await);
    assert!(!h.work_dir.path().join(CHECK_INFO_FILE).exists());
}
