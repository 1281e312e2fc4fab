use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode as HttpStatusCode;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use server::routes::AppState;
use service::{
    errors::ServiceError,
    giveaway::{domain::Address, GiveawayService, GiveawayStores, XRedirects},
    oauth::{AuthorizationLink, XOAuthClient},
    storage::{metrics::StoreMetrics, MemoryFileStore, ShutdownDrain, StoreOptions, StoreRegistry},
    verify::SignatureVerifier,
};

const ADDR: &str = "0x5B38Da6a701c568545dCfcB03FcB875f56beddC4";
const OTHER: &str = "0xab8483f64d9c6d1ecf9b849ae677dd3315835cb2";
const ADMIN_KEY: &str = "k-123";
const SUCCESS_URI: &str = "https://example.com/leaderboard";

/// Accepts exactly the signature `0x01`.
struct StubVerifier;

#[async_trait]
impl SignatureVerifier for StubVerifier {
    async fn verify(&self, _: &Address, _: &str, signature: &[u8]) -> Result<bool, ServiceError> {
        Ok(signature == [1u8])
    }
}

/// Hands out state `s-<n>` and accepts code `good` as user `plop`.
struct StubX {
    issued: std::sync::atomic::AtomicUsize,
}

#[async_trait]
impl XOAuthClient for StubX {
    fn authorization_link(&self, redirect_uri: &str) -> Result<AuthorizationLink, ServiceError> {
        let n = self.issued.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(AuthorizationLink {
            url: format!("https://x.example/authorize?redirect_uri={redirect_uri}&state=s-{n}"),
            code_verifier: format!("v-{n}"),
            state: format!("s-{n}"),
        })
    }

    async fn exchange(&self, code: &str, _: &str, _: &str) -> Result<String, ServiceError> {
        if code == "good" {
            Ok("plop".into())
        } else {
            Err(ServiceError::Unauthorized("bad code".into()))
        }
    }
}

struct TestApp {
    base_url: String,
    backend: Arc<MemoryFileStore>,
    registry: Arc<StoreRegistry>,
}

async fn start_server() -> anyhow::Result<TestApp> {
    let backend = Arc::new(MemoryFileStore::new());
    let registry = Arc::new(StoreRegistry::with_metrics(
        backend.clone(),
        StoreOptions { debounce: Duration::from_millis(50), pretty: false },
        StoreMetrics::unregistered()?,
    ));
    let stores = GiveawayStores::open(&registry)?;
    let service = GiveawayService::new(
        stores,
        Arc::new(StubVerifier),
        Some(Arc::new(StubX { issued: Default::default() })),
        XRedirects { callback_uri: "http://localhost/giveaway/callbackX".into(), success_uri: SUCCESS_URI.into() },
    );
    let state = AppState {
        service: Arc::new(service),
        admin_api_key: Some(Arc::from(ADMIN_KEY)),
        metrics: prometheus::Registry::new(),
    };

    let app = server::startup::app(state);
    let listener = TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0)).await?;
    let addr: SocketAddr = listener.local_addr()?;
    let base_url = format!("http://{}:{}", addr.ip(), addr.port());

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await { eprintln!("server error: {}", e); }
    });

    Ok(TestApp { base_url, backend, registry })
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("reqwest client")
}

async fn seed_tasks(app: &TestApp, c: &reqwest::Client) -> anyhow::Result<()> {
    let res = c
        .post(format!("{}/giveaway/admin/tasks", app.base_url))
        .header("X-API-Key", ADMIN_KEY)
        .json(&json!([
            {"description": "Follow on X", "points": 10},
            {"description": "Join Discord", "points": 5}
        ]))
        .send()
        .await?;
    assert_eq!(res.status(), HttpStatusCode::OK);
    Ok(())
}

async fn complete(app: &TestApp, c: &reqwest::Client, address: &str, task_index: usize) -> anyhow::Result<HttpStatusCode> {
    let res = c
        .post(format!("{}/giveaway/completeTask", app.base_url))
        .header("X-API-Key", ADMIN_KEY)
        .json(&json!({"address": address, "taskIndex": task_index}))
        .send()
        .await?;
    Ok(res.status())
}

#[tokio::test]
async fn e2e_public_health() -> anyhow::Result<()> {
    let app = start_server().await?;
    let res = client().get(format!("{}/health", app.base_url)).send().await?;
    assert_eq!(res.status(), HttpStatusCode::OK);
    let body = res.json::<Value>().await?;
    assert_eq!(body["status"], "ok");
    Ok(())
}

#[tokio::test]
async fn e2e_admin_routes_require_api_key() -> anyhow::Result<()> {
    let app = start_server().await?;
    let c = client();

    let res = c
        .post(format!("{}/giveaway/completeTask", app.base_url))
        .json(&json!({"address": ADDR, "taskIndex": 0}))
        .send()
        .await?;
    assert_eq!(res.status(), HttpStatusCode::UNAUTHORIZED);

    let res = c
        .post(format!("{}/giveaway/completeTask", app.base_url))
        .header("X-API-Key", "wrong")
        .json(&json!({"address": ADDR, "taskIndex": 0}))
        .send()
        .await?;
    assert_eq!(res.status(), HttpStatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn e2e_tasks_and_leaderboard() -> anyhow::Result<()> {
    let app = start_server().await?;
    let c = client();
    seed_tasks(&app, &c).await?;

    let tasks = c.get(format!("{}/giveaway/tasks", app.base_url)).send().await?.json::<Value>().await?;
    assert_eq!(tasks[0]["description"], "Follow on X");

    assert_eq!(complete(&app, &c, ADDR, 0).await?, HttpStatusCode::OK);
    assert_eq!(complete(&app, &c, ADDR, 1).await?, HttpStatusCode::OK);
    assert_eq!(complete(&app, &c, OTHER, 1).await?, HttpStatusCode::OK);
    // repeat and unknown task
    assert_eq!(complete(&app, &c, ADDR, 0).await?, HttpStatusCode::CONFLICT);
    assert_eq!(complete(&app, &c, ADDR, 9).await?, HttpStatusCode::NOT_FOUND);

    let board = c
        .get(format!("{}/giveaway/leaderboard/{}", app.base_url, OTHER))
        .send()
        .await?
        .json::<Value>()
        .await?;
    let rows = board.as_array().cloned().unwrap_or_default();
    // two ranked rows plus the requested user's own row
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["address"], ADDR.to_lowercase());
    assert_eq!(rows[0]["score"], "15");
    assert_eq!(rows[0]["position"], 1);
    assert_eq!(rows[2]["address"], OTHER);
    assert_eq!(rows[2]["position"], 2);

    let res = c.get(format!("{}/giveaway/leaderboard/nope", app.base_url)).send().await?;
    assert_eq!(res.status(), HttpStatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn e2e_concurrent_completions_are_all_recorded() -> anyhow::Result<()> {
    let app = Arc::new(start_server().await?);
    let c = client();
    let res = c
        .post(format!("{}/giveaway/admin/tasks", app.base_url))
        .header("X-API-Key", ADMIN_KEY)
        .json(&(0..10).map(|i| json!({"description": format!("t{i}"), "points": 1})).collect::<Vec<_>>())
        .send()
        .await?;
    assert_eq!(res.status(), HttpStatusCode::OK);

    let mut handles = Vec::new();
    for i in 0..10usize {
        let app = Arc::clone(&app);
        let c = c.clone();
        handles.push(tokio::spawn(async move { complete(&app, &c, ADDR, i).await }));
    }
    for h in handles {
        assert_eq!(h.await??, HttpStatusCode::OK);
    }

    let user = c.get(format!("{}/giveaway/user/{}", app.base_url, ADDR)).send().await?.json::<Value>().await?;
    assert_eq!(user["completedTasks"].as_array().map(|a| a.len()), Some(10));
    Ok(())
}

#[tokio::test]
async fn e2e_x_login_flow() -> anyhow::Result<()> {
    let app = start_server().await?;
    let c = client();

    let res = c.post(format!("{}/giveaway/loginWithX?address={}", app.base_url, ADDR)).send().await?;
    assert_eq!(res.status(), HttpStatusCode::OK);
    let body = res.json::<Value>().await?;
    assert!(body["url"].as_str().is_some_and(|u| u.contains("state=s-0")));

    let res = c.get(format!("{}/giveaway/callbackX?state=s-0", app.base_url)).send().await?;
    assert_eq!(res.status(), HttpStatusCode::FORBIDDEN);

    let res = c.get(format!("{}/giveaway/callbackX?state=unknown&code=good", app.base_url)).send().await?;
    assert_eq!(res.status(), HttpStatusCode::FORBIDDEN);

    let res = c.get(format!("{}/giveaway/callbackX?state=s-0&code=good", app.base_url)).send().await?;
    assert!(res.status().is_redirection());
    assert_eq!(res.headers().get("location").and_then(|v| v.to_str().ok()), Some(SUCCESS_URI));

    let user = c.get(format!("{}/giveaway/user/{}", app.base_url, ADDR)).send().await?.json::<Value>().await?;
    assert_eq!(user["metadataUpdateRequests"][0]["metadataField"], "x");
    assert_eq!(user["metadataUpdateRequests"][0]["value"], "plop");

    // the same handle cannot be queued for a second address
    c.post(format!("{}/giveaway/loginWithX?address={}", app.base_url, OTHER)).send().await?;
    let request = r#"{"metadataField":"x","value":"plop"}"#;
    let res = c
        .post(format!("{}/giveaway/acceptMetadataRequest", app.base_url))
        .query(&[("address", ADDR), ("request", request), ("signature", "0x01")])
        .send()
        .await?;
    assert_eq!(res.status(), HttpStatusCode::OK);
    let res = c.get(format!("{}/giveaway/callbackX?state=s-1&code=good", app.base_url)).send().await?;
    assert_eq!(res.status(), HttpStatusCode::CONFLICT);

    let user = c.get(format!("{}/giveaway/user/{}", app.base_url, ADDR)).send().await?.json::<Value>().await?;
    assert_eq!(user["metadata"]["x"], "plop");
    Ok(())
}

#[tokio::test]
async fn e2e_accept_metadata_request_validation() -> anyhow::Result<()> {
    let app = start_server().await?;
    let c = client();
    let url = format!("{}/giveaway/acceptMetadataRequest", app.base_url);
    let request = r#"{"metadataField":"email","value":"a@b.c"}"#;

    let res = c.post(&url).query(&[("address", ADDR), ("request", request)]).send().await?;
    assert_eq!(res.status(), HttpStatusCode::FORBIDDEN);

    let res = c.post(&url).query(&[("address", ADDR), ("request", request), ("signature", "zz")]).send().await?;
    assert_eq!(res.status(), HttpStatusCode::BAD_REQUEST);

    let res = c.post(&url).query(&[("address", ADDR), ("request", request), ("signature", "0x02")]).send().await?;
    assert_eq!(res.status(), HttpStatusCode::BAD_REQUEST);
    assert_eq!(res.json::<Value>().await?["error"], "signature is not valid");

    let res = c.post(&url).query(&[("address", ADDR), ("request", request), ("signature", "0x01")]).send().await?;
    assert_eq!(res.status(), HttpStatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn e2e_droplist_registration() -> anyhow::Result<()> {
    let app = start_server().await?;
    let c = client();
    let url = format!("{}/giveaway/registerDroplist", app.base_url);

    let res = c.post(&url).query(&[("address", ADDR), ("signature", "0x01")]).send().await?;
    assert_eq!(res.status(), HttpStatusCode::OK);
    assert_eq!(res.json::<Value>().await?["slot"], 1);

    let res = c.post(&url).query(&[("address", ADDR), ("signature", "0x01")]).send().await?;
    assert_eq!(res.status(), HttpStatusCode::CONFLICT);

    let res = c.post(&url).query(&[("address", OTHER), ("signature", "0x01")]).send().await?;
    assert_eq!(res.json::<Value>().await?["slot"], 2);

    let slot = c.get(format!("{}/giveaway/droplist/{}", app.base_url, ADDR)).send().await?.json::<Value>().await?;
    assert_eq!(slot["slot"], 1);
    Ok(())
}

#[tokio::test]
async fn e2e_mutations_reach_storage_after_drain() -> anyhow::Result<()> {
    let app = start_server().await?;
    let c = client();
    seed_tasks(&app, &c).await?;
    assert_eq!(complete(&app, &c, ADDR, 0).await?, HttpStatusCode::OK);

    let report = ShutdownDrain::new(Arc::clone(&app.registry), Duration::from_secs(5)).drain().await;
    assert!(report.is_clean());

    let raw = app.backend.raw("users").expect("users persisted");
    let users: Value = serde_json::from_slice(&raw)?;
    assert_eq!(users[ADDR.to_lowercase()]["completedTasks"][0]["points"], 10);
    let tasks: Value = serde_json::from_slice(&app.backend.raw("tasks").expect("tasks persisted"))?;
    assert_eq!(tasks.as_array().map(|a| a.len()), Some(2));
    Ok(())
}
