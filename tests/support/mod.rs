//! In-process stand-in for the ledger REST service.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use personal_finance_client::cli::api::Client;
use personal_finance_client::cli::state::App;
use personal_finance_client::config::ClientConfig;

pub const USER: &str = "alice";
pub const PASSWORD: &str = "s3cret";
pub const CREATED_AT: &str = "2026-10-18T12:30:00Z";

#[derive(Default)]
pub struct Inner {
    pub users: HashMap<String, String>,
    pub token: String,
    pub categories: Vec<Value>,
    pub transactions: Vec<Value>,
    pub hits: HashMap<String, usize>,
    /// Scripted answers for `/updates`; a quiet signal once it runs dry.
    pub updates: VecDeque<(StatusCode, Value)>,
    /// When set, every mutation answers with this status and changes nothing.
    pub fail_mutations: Option<StatusCode>,
    pub last_body: Option<Value>,
    /// Delay before answering `DELETE /transactions` and `/updates`.
    pub stall: Duration,
    pub last_query: HashMap<String, String>,
    next_id: usize,
}

pub type Shared = Arc<Mutex<Inner>>;

pub struct FakeLedger {
    pub base: String,
    pub shared: Shared,
    task: JoinHandle<()>,
}

impl Drop for FakeLedger {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl FakeLedger {
    /// Server with one user, two categories and three transactions.
    pub async fn start() -> Self {
        let mut inner = Inner {
            token: "test-token".into(),
            next_id: 100,
            ..Default::default()
        };
        inner.users.insert(USER.into(), PASSWORD.into());
        inner.categories = vec![
            json!({"_id": "c1", "name": "Food"}),
            json!({"_id": "c2", "name": "Salary"}),
        ];
        inner.transactions = vec![
            json!({"_id": "t1", "type": "expense", "amount": 30.0, "category": "Food"}),
            json!({"_id": "t2", "type": "expense", "amount": 20.0, "category": "Food"}),
            json!({"_id": "t3", "type": "revenue", "amount": 1000.0, "category": "Salary"}),
        ];
        let shared: Shared = Arc::new(Mutex::new(inner));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(shared.clone());
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base: format!("http://{addr}/api"), shared, task }
    }

    pub fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared.lock().unwrap()
    }

    pub fn hits(&self, route: &str) -> usize {
        self.lock().hits.get(route).copied().unwrap_or(0)
    }

    pub fn push_update(&self, status: StatusCode, body: Value) {
        self.lock().updates.push_back((status, body));
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig::default()
            .with_api_base(&self.base)
            .with_retry_delay(Duration::from_millis(100))
    }

    pub fn client(&self) -> Client {
        Client::new(&self.config()).unwrap()
    }

    /// App without the background update loop, so request counts are exact.
    pub fn app(&self) -> App {
        self.app_with(self.config())
    }

    pub fn app_with(&self, config: ClientConfig) -> App {
        let mut app = App::new(Client::new(&config).unwrap(), config.retry_delay);
        app.auto_sync = false;
        app
    }

    pub async fn logged_in_app(&self) -> App {
        let mut app = self.app();
        app.login.username.set(USER);
        app.login.password.set(PASSWORD);
        app.submit_login().await;
        assert!(app.session().is_some(), "login failed: {:?}", app.login.error);
        app
    }
}

fn router(shared: Shared) -> Router {
    Router::new()
        .route("/api/register", post(register))
        .route("/api/login", post(login))
        .route("/api/categories", get(list_categories).post(add_category))
        .route("/api/categories/:id", delete(delete_category))
        .route("/api/transactions", get(list_transactions).post(add_transaction))
        .route("/api/transactions/:id", delete(delete_transaction))
        .route("/api/operations", get(list_operations))
        .route("/api/operations/:id", put(edit_operation).delete(delete_operation))
        .route("/api/reports", get(report))
        .route("/api/reports/categories", get(category_report))
        .route("/api/updates", get(updates))
        .with_state(shared)
}

fn hit(inner: &mut Inner, route: &str) {
    *inner.hits.entry(route.to_string()).or_default() += 1;
}

fn authorized(inner: &Inner, headers: &HeaderMap) -> bool {
    let expected = format!("Bearer {}", inner.token);
    headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) == Some(expected.as_str())
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({"message": "Unauthorized"}))).into_response()
}

fn rejected(status: StatusCode) -> Response {
    (status, Json(json!({"message": "Something went wrong"}))).into_response()
}

async fn register(State(shared): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut inner = shared.lock().unwrap();
    hit(&mut inner, "POST /register");
    let user = body["username"].as_str().unwrap_or_default().to_string();
    let pass = body["password"].as_str().unwrap_or_default().to_string();
    if inner.users.contains_key(&user) {
        return (StatusCode::BAD_REQUEST, Json(json!({"message": "Username already exists"})))
            .into_response();
    }
    inner.users.insert(user, pass);
    (StatusCode::CREATED, Json(json!({"message": "User registered"}))).into_response()
}

async fn login(State(shared): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut inner = shared.lock().unwrap();
    hit(&mut inner, "POST /login");
    let user = body["username"].as_str().unwrap_or_default();
    let pass = body["password"].as_str().unwrap_or_default();
    if inner.users.get(user).map(String::as_str) == Some(pass) {
        Json(json!({"token": inner.token})).into_response()
    } else {
        (StatusCode::UNAUTHORIZED, Json(json!({"message": "Invalid credentials"}))).into_response()
    }
}

async fn list_categories(State(shared): State<Shared>, headers: HeaderMap) -> Response {
    let mut inner = shared.lock().unwrap();
    hit(&mut inner, "GET /categories");
    if !authorized(&inner, &headers) {
        return unauthorized();
    }
    Json(Value::Array(inner.categories.clone())).into_response()
}

async fn add_category(
    State(shared): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut inner = shared.lock().unwrap();
    hit(&mut inner, "POST /categories");
    if !authorized(&inner, &headers) {
        return unauthorized();
    }
    inner.last_body = Some(body.clone());
    if let Some(status) = inner.fail_mutations {
        return rejected(status);
    }
    inner.next_id += 1;
    let id = format!("c{}", inner.next_id);
    inner.categories.push(json!({"_id": id, "name": body["name"]}));
    StatusCode::CREATED.into_response()
}

async fn delete_category(
    State(shared): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let mut inner = shared.lock().unwrap();
    hit(&mut inner, "DELETE /categories");
    if !authorized(&inner, &headers) {
        return unauthorized();
    }
    if let Some(status) = inner.fail_mutations {
        return rejected(status);
    }
    inner.categories.retain(|c| c["_id"] != id.as_str());
    StatusCode::NO_CONTENT.into_response()
}

async fn list_transactions(State(shared): State<Shared>, headers: HeaderMap) -> Response {
    let mut inner = shared.lock().unwrap();
    hit(&mut inner, "GET /transactions");
    if !authorized(&inner, &headers) {
        return unauthorized();
    }
    Json(Value::Array(inner.transactions.clone())).into_response()
}

async fn add_transaction(
    State(shared): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut inner = shared.lock().unwrap();
    hit(&mut inner, "POST /transactions");
    if !authorized(&inner, &headers) {
        return unauthorized();
    }
    inner.last_body = Some(body.clone());
    if let Some(status) = inner.fail_mutations {
        return rejected(status);
    }
    // the server resolves the category id to its name
    let name = inner
        .categories
        .iter()
        .find(|c| c["_id"] == body["category"])
        .map(|c| c["name"].clone());
    let Some(name) = name else {
        return (StatusCode::BAD_REQUEST, Json(json!({"message": "Unknown category"}))).into_response();
    };
    inner.next_id += 1;
    let id = format!("t{}", inner.next_id);
    inner.transactions.push(json!({
        "_id": id,
        "type": body["type"],
        "amount": body["amount"],
        "category": name,
    }));
    StatusCode::CREATED.into_response()
}

async fn delete_transaction(
    State(shared): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let stall = shared.lock().unwrap().stall;
    tokio::time::sleep(stall).await;
    remove_transaction(&shared, &headers, &id, "DELETE /transactions")
}

async fn delete_operation(
    State(shared): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    remove_transaction(&shared, &headers, &id, "DELETE /operations")
}

fn remove_transaction(shared: &Shared, headers: &HeaderMap, id: &str, route: &str) -> Response {
    let mut inner = shared.lock().unwrap();
    hit(&mut inner, route);
    if !authorized(&inner, headers) {
        return unauthorized();
    }
    if let Some(status) = inner.fail_mutations {
        return rejected(status);
    }
    inner.transactions.retain(|t| t["_id"] != id);
    StatusCode::NO_CONTENT.into_response()
}

async fn list_operations(State(shared): State<Shared>, headers: HeaderMap) -> Response {
    let mut inner = shared.lock().unwrap();
    hit(&mut inner, "GET /operations");
    if !authorized(&inner, &headers) {
        return unauthorized();
    }
    let ops: Vec<Value> = inner
        .transactions
        .iter()
        .map(|t| {
            let mut op = t.clone();
            op["created_at"] = json!(CREATED_AT);
            op
        })
        .collect();
    Json(Value::Array(ops)).into_response()
}

async fn edit_operation(
    State(shared): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let mut inner = shared.lock().unwrap();
    hit(&mut inner, "PUT /operations");
    if !authorized(&inner, &headers) {
        return unauthorized();
    }
    inner.last_body = Some(body.clone());
    if let Some(status) = inner.fail_mutations {
        return rejected(status);
    }
    match inner.transactions.iter_mut().find(|t| t["_id"] == id.as_str()) {
        Some(t) => {
            t["amount"] = body["amount"].clone();
            StatusCode::OK.into_response()
        }
        None => rejected(StatusCode::NOT_FOUND),
    }
}

fn totals<'a>(txns: impl Iterator<Item = &'a Value>) -> (f64, f64) {
    txns.fold((0.0, 0.0), |(exp, rev), t| {
        let amount = t["amount"].as_f64().unwrap_or(0.0);
        match t["type"].as_str() {
            Some("expense") => (exp + amount, rev),
            _ => (exp, rev + amount),
        }
    })
}

async fn report(
    State(shared): State<Shared>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let mut inner = shared.lock().unwrap();
    hit(&mut inner, "GET /reports");
    if !authorized(&inner, &headers) {
        return unauthorized();
    }
    inner.last_query = query;
    let (exp, rev) = totals(inner.transactions.iter());
    Json(json!({"total_expenses": exp, "total_revenues": rev, "balance": rev - exp})).into_response()
}

async fn category_report(
    State(shared): State<Shared>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let mut inner = shared.lock().unwrap();
    hit(&mut inner, "GET /reports/categories");
    if !authorized(&inner, &headers) {
        return unauthorized();
    }
    inner.last_query = query;
    let mut out = serde_json::Map::new();
    for c in &inner.categories {
        let name = c["name"].as_str().unwrap_or_default();
        let (exp, rev) = totals(inner.transactions.iter().filter(|t| t["category"] == name));
        out.insert(name.to_string(), json!({"expenses": exp, "revenues": rev}));
    }
    Json(Value::Object(out)).into_response()
}

async fn updates(State(shared): State<Shared>, headers: HeaderMap) -> Response {
    let (scripted, stall) = {
        let mut inner = shared.lock().unwrap();
        hit(&mut inner, "GET /updates");
        if !authorized(&inner, &headers) {
            return unauthorized();
        }
        (inner.updates.pop_front(), inner.stall)
    };
    tokio::time::sleep(stall).await;
    match scripted {
        Some((status, body)) => (status, Json(body)).into_response(),
        None => {
            // hold a quiet poll briefly, like a long-poll with nothing to report
            tokio::time::sleep(Duration::from_millis(25)).await;
            Json(json!({"categoriesUpdated": false, "transactionsUpdated": false})).into_response()
        }
    }
}
