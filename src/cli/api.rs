use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::session::Session;
use super::state::{
    Category, CategoryId, CategoryReport, Credentials, Money, NewTransaction, Operation,
    ReportRange, ReportSummary, Transaction, UpdateSignal,
};
use crate::config::ClientConfig;
use crate::error::ApiError;

/// Unauthenticated client: knows the base URL, can register and log in.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    base: String,
    timeout: Option<Duration>,
}

impl Client {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            base: config.api_base.trim_end_matches('/').to_string(),
            timeout: config.request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// A one-shot call, bounded by the configured timeout.
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let req = self.http.request(method, self.url(path));
        match self.timeout {
            Some(timeout) => req.timeout(timeout),
            None => req,
        }
    }

    // ============= Auth =============

    pub async fn register(&self, username: &str, password: &str) -> Result<(), ApiError> {
        let res = self
            .request(Method::POST, "/register")
            .json(&Credentials { username, password })
            .send()
            .await?;

        if res.status().is_success() {
            return Ok(());
        }
        let status = res.status().as_u16();
        let message = server_message(res)
            .await
            .unwrap_or_else(|| "Registration failed.".into());
        Err(ApiError::Rejected { status, message })
    }

    /// A rejected login is reported as `Rejected` even on 401: there is no
    /// session to expire yet.
    pub async fn login(&self, username: &str, password: &str) -> Result<Session, ApiError> {
        let res = self
            .request(Method::POST, "/login")
            .json(&Credentials { username, password })
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let message = server_message(res)
                .await
                .unwrap_or_else(|| "Login failed.".into());
            return Err(ApiError::Rejected { status, message });
        }

        let body: LoginResponse = res.json().await?;
        tracing::info!(user = %username, "Logged in");
        Ok(Session::new(body.token, username))
    }

    pub fn ledger(&self, session: Session) -> Ledger {
        Ledger { client: self.clone(), session }
    }
}

/// A client bound to a session. Every call carries the bearer token.
#[derive(Clone)]
pub struct Ledger {
    client: Client,
    session: Session,
}

impl Ledger {
    pub fn session(&self) -> &Session {
        &self.session
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.call(Method::GET, path)
    }

    fn call(&self, method: Method, path: &str) -> RequestBuilder {
        self.authed(self.client.request(method, path))
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.header(reqwest::header::AUTHORIZATION, self.session.bearer())
    }

    async fn fetch<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ApiError> {
        let res = check_status(req.send().await?).await?;
        let bytes = res.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Mutations only look at the status; the body is not interpreted.
    async fn mutate(&self, req: RequestBuilder) -> Result<(), ApiError> {
        check_status(req.send().await?).await?;
        Ok(())
    }

    // ============= Categories =============

    pub async fn list_categories(&self) -> Result<Vec<Category>, ApiError> {
        self.fetch(self.get("/categories")).await
    }

    pub async fn add_category(&self, name: &str) -> Result<(), ApiError> {
        let req = self.call(Method::POST, "/categories");
        self.mutate(req.json(&serde_json::json!({ "name": name })))
            .await
    }

    pub async fn delete_category(&self, id: &CategoryId) -> Result<(), ApiError> {
        let req = self.call(Method::DELETE, &format!("/categories/{}", id.0));
        self.mutate(req).await
    }

    // ============= Transactions =============

    pub async fn list_transactions(&self) -> Result<Vec<Transaction>, ApiError> {
        self.fetch(self.get("/transactions")).await
    }

    pub async fn add_transaction(&self, txn: &NewTransaction) -> Result<(), ApiError> {
        let req = self.call(Method::POST, "/transactions");
        self.mutate(req.json(txn)).await
    }

    pub async fn delete_transaction(&self, id: &str) -> Result<(), ApiError> {
        let req = self.call(Method::DELETE, &format!("/transactions/{id}"));
        self.mutate(req).await
    }

    // ============= Operations =============

    pub async fn list_operations(&self) -> Result<Vec<Operation>, ApiError> {
        self.fetch(self.get("/operations")).await
    }

    pub async fn edit_operation(&self, id: &str, amount: Money) -> Result<(), ApiError> {
        let req = self.call(Method::PUT, &format!("/operations/{id}"));
        self.mutate(req.json(&serde_json::json!({ "amount": amount })))
            .await
    }

    pub async fn delete_operation(&self, id: &str) -> Result<(), ApiError> {
        let req = self.call(Method::DELETE, &format!("/operations/{id}"));
        self.mutate(req).await
    }

    // ============= Reports =============

    pub async fn report(&self, range: &ReportRange) -> Result<ReportSummary, ApiError> {
        self.fetch(self.get("/reports").query(&range.query())).await
    }

    pub async fn category_report(&self, range: &ReportRange) -> Result<CategoryReport, ApiError> {
        self.fetch(self.get("/reports/categories").query(&range.query()))
            .await
    }

    // ============= Updates =============

    /// Long-poll: the server holds this until something changes, so it
    /// never carries the one-shot timeout.
    pub async fn poll_updates(&self) -> Result<UpdateSignal, ApiError> {
        let req = self.client.http.get(self.client.url("/updates"));
        self.fetch(self.authed(req)).await
    }
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Deserialize)]
struct ServerMessage {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

async fn check_status(res: Response) -> Result<Response, ApiError> {
    let status = res.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(ApiError::Unauthorized);
    }
    if !status.is_success() {
        let message = server_message(res)
            .await
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
        return Err(ApiError::Rejected { status: status.as_u16(), message });
    }
    Ok(res)
}

/// Pull `message` (or `error`) out of an error body, if there is one.
async fn server_message(res: Response) -> Option<String> {
    let bytes = res.bytes().await.ok()?;
    parse_server_message(&bytes)
}

fn parse_server_message(bytes: &[u8]) -> Option<String> {
    let body: ServerMessage = serde_json::from_slice(bytes).ok()?;
    body.message
        .or(body.error)
        .filter(|m| !m.trim().is_empty())
}
