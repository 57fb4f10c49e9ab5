// src/cli/state.rs
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Datelike, Local, NaiveDate};
use indexmap::IndexMap;
use ratatui::widgets::{ListState, TableState};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::cli::api::{Client, Ledger};
use crate::cli::chart::ExpenseChart;
use crate::cli::input::LineEdit;
use crate::cli::session::Session;
use crate::cli::sync::{SyncEvent, SyncHandle, SyncState};
use crate::cli::util;
use crate::error::ApiError;

// ============= Wire types =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(#[serde(with = "rust_decimal::serde::float")] pub Decimal);
impl Money {
    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }
}
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&util::fmt_money(&self.0))
    }
}

/// Server-side category id; what the create-transaction form sends.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryId(pub String);

/// Category display name; what the transaction list returns in the same slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryName(pub String);

impl fmt::Display for CategoryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxnKind {
    Expense,
    Revenue,
}
impl Default for TxnKind {
    fn default() -> Self {
        TxnKind::Expense
    }
}
impl TxnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expense => "expense",
            Self::Revenue => "revenue",
        }
    }
    pub fn toggled(self) -> Self {
        match self {
            Self::Expense => Self::Revenue,
            Self::Revenue => Self::Expense,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    #[serde(rename = "_id")]
    pub id: CategoryId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: TxnKind,
    pub amount: Money,
    pub category: CategoryName,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTransaction {
    pub category: CategoryId,
    pub amount: Money,
    #[serde(rename = "type")]
    pub kind: TxnKind,
}

/// A transaction as served by the editable ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "_id")]
    pub id: String,
    pub created_at: String,
    pub category: CategoryName,
    #[serde(rename = "type")]
    pub kind: TxnKind,
    pub amount: Money,
}

impl Operation {
    pub fn created_local(&self) -> Option<DateTime<Local>> {
        util::parse_timestamp(&self.created_at)
    }
}

/// Dirty flags from `/updates`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSignal {
    #[serde(rename = "categoriesUpdated", default, deserialize_with = "lenient_flag")]
    pub categories_updated: bool,
    #[serde(rename = "transactionsUpdated", default, deserialize_with = "lenient_flag")]
    pub transactions_updated: bool,
}

impl UpdateSignal {
    pub fn any(&self) -> bool {
        self.categories_updated || self.transactions_updated
    }
}

/// A flag may come as a bool or as the list of changed documents.
fn lenient_flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        List(Vec<serde_json::Value>),
    }

    Ok(match Option::<Flag>::deserialize(d)? {
        Some(Flag::Bool(b)) => b,
        Some(Flag::List(items)) => !items.is_empty(),
        None => false,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_expenses: Money,
    pub total_revenues: Money,
    pub balance: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryTotals {
    pub expenses: Money,
    pub revenues: Money,
}

/// Per-category totals in the order the server lists them.
pub type CategoryReport = IndexMap<String, CategoryTotals>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ReportRange {
    pub fn parse(start: &str, end: &str) -> Result<Self, ApiError> {
        const INVALID: &str = "Please select a valid date range.";
        let start = util::parse_date(start).ok_or_else(|| ApiError::validation(INVALID))?;
        let end = util::parse_date(end).ok_or_else(|| ApiError::validation(INVALID))?;
        if start > end {
            return Err(ApiError::validation(INVALID));
        }
        Ok(Self { start, end })
    }

    pub fn query(&self) -> [(&'static str, String); 2] {
        [("start_date", util::iso(&self.start)), ("end_date", util::iso(&self.end))]
    }
}

#[derive(Debug, Serialize)]
pub struct Credentials<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

// ============= Screens & pages =============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Login,
    Register,
    Main,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tab {
    Categories,
    Transactions,
    Operations,
    Reports,
    Help,
}

impl Tab {
    pub const ALL: [Tab; 5] = [
        Tab::Categories,
        Tab::Transactions,
        Tab::Operations,
        Tab::Reports,
        Tab::Help,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            Self::Categories => "Categories",
            Self::Transactions => "Transactions",
            Self::Operations => "Operations",
            Self::Reports => "Reports",
            Self::Help => "Help",
        }
    }

    pub fn index(&self) -> usize {
        Self::ALL.iter().position(|t| t == self).unwrap_or(0)
    }

    pub fn next(&self) -> Tab {
        Self::ALL[(self.index() + 1) % Self::ALL.len()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Self::Dark => Self::Light,
            Self::Light => Self::Dark,
        }
    }
}

#[derive(Default, Clone)]
pub struct LoginForm {
    pub username: LineEdit,
    pub password: LineEdit,
    // 0: Username, 1: Password
    pub focus: usize,
    pub error: Option<String>,
    pub info: Option<String>,
}

#[derive(Default, Clone)]
pub struct RegisterForm {
    pub username: LineEdit,
    pub password: LineEdit,
    pub confirm: LineEdit,
    // 0: Username, 1: Password, 2: Confirm
    pub focus: usize,
    pub error: Option<String>,
}

impl RegisterForm {
    pub fn new() -> Self {
        Self {
            password: LineEdit::masked(),
            confirm: LineEdit::masked(),
            ..Default::default()
        }
    }
}

#[derive(Default)]
pub struct CategoriesPage {
    pub list: Vec<Category>,
    pub sel: ListState,
    pub adding: bool,
    pub name: LineEdit,
}

#[derive(Default)]
pub struct TxnPage {
    pub table: Vec<Transaction>,
    pub tsel: TableState,
    pub chart: Option<ExpenseChart>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddField {
    #[default]
    Category,
    Amount,
}

#[derive(Default, Clone)]
pub struct AddTxnForm {
    pub open: bool,
    pub cat_sel: ListState,
    pub amount: LineEdit,
    pub kind: TxnKind,
    pub focus: AddField,
    pub error: Option<String>,
}

#[derive(Default)]
pub struct OperationsPage {
    pub table: Vec<Operation>,
    pub tsel: TableState,
    /// Operation being edited and the amount typed so far.
    pub editing: Option<(String, LineEdit)>,
    /// Operation awaiting delete confirmation.
    pub confirm_delete: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportField {
    #[default]
    Start,
    End,
}

#[derive(Default, Clone)]
pub struct ReportsPage {
    pub start: LineEdit,
    pub end: LineEdit,
    pub focus: ReportField,
    pub editing: bool,
    pub summary: Option<ReportSummary>,
    pub by_category: CategoryReport,
    pub error: Option<String>,
}

/// Which collection a mutation touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Categories,
    Transactions,
    Operations,
}

enum AuthState {
    LoggedOut,
    LoggedIn {
        ledger: Ledger,
        sync: Option<SyncHandle>,
        events: Option<UnboundedReceiver<SyncEvent>>,
    },
}

pub struct App {
    pub api: Client,
    pub retry_delay: Duration,
    /// Start the update loop after login.
    pub auto_sync: bool,
    pub screen: Screen,
    pub tab: Tab,
    pub theme: Theme,
    pub status: String,
    pub sync_state: SyncState,
    pub quit: bool,
    pub login: LoginForm,
    pub register: RegisterForm,
    pub categories: CategoriesPage,
    pub txn: TxnPage,
    pub add: AddTxnForm,
    pub ops: OperationsPage,
    pub reports: ReportsPage,
    auth: AuthState,
}

impl App {
    pub fn new(api: Client, retry_delay: Duration) -> Self {
        let today = util::today();
        let mut reports = ReportsPage::default();
        reports.start.set(util::iso(&today.with_day0(0).unwrap_or(today)));
        reports.end.set(util::iso(&today));

        let login = LoginForm { password: LineEdit::masked(), ..Default::default() };

        Self {
            api,
            retry_delay,
            auto_sync: true,
            screen: Screen::Login,
            tab: Tab::Categories,
            theme: Theme::default(),
            status: "Log in to continue | Esc to quit".into(),
            sync_state: SyncState::Idle,
            quit: false,
            login,
            register: RegisterForm::new(),
            categories: CategoriesPage::default(),
            txn: TxnPage::default(),
            add: AddTxnForm::default(),
            ops: OperationsPage::default(),
            reports,
            auth: AuthState::LoggedOut,
        }
    }

    pub fn session(&self) -> Option<&Session> {
        match &self.auth {
            AuthState::LoggedIn { ledger, .. } => Some(ledger.session()),
            AuthState::LoggedOut => None,
        }
    }

    fn ledger(&self) -> Result<Ledger, ApiError> {
        match &self.auth {
            AuthState::LoggedIn { ledger, .. } => Ok(ledger.clone()),
            AuthState::LoggedOut => Err(ApiError::Unauthorized),
        }
    }

    // ============= Auth =============

    pub async fn submit_register(&mut self) {
        let username = self.register.username.value.trim().to_string();
        let password = self.register.password.value.clone();

        if username.is_empty() || password.is_empty() {
            self.register.error = Some("Username and password are required".into());
            return;
        }
        if password != self.register.confirm.value {
            self.register.error = Some("Passwords do not match!".into());
            return;
        }

        match self.api.register(&username, &password).await {
            Ok(()) => {
                tracing::info!(user = %username, "Registered");
                self.register = RegisterForm::new();
                self.login.username.set(username);
                self.login.focus = 1;
                self.login.error = None;
                self.login.info = Some("Registration successful. Please log in.".into());
                self.screen = Screen::Login;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Registration failed");
                self.register.error = Some(user_message(&e, "Registration failed."));
            }
        }
    }

    pub async fn submit_login(&mut self) {
        let username = self.login.username.value.trim().to_string();
        let password = self.login.password.value.clone();

        if username.is_empty() || password.is_empty() {
            self.login.error = Some("Username and password are required".into());
            return;
        }

        match self.api.login(&username, &password).await {
            Ok(session) => {
                self.login.password.clear();
                self.login.error = None;
                self.login.info = None;
                self.start_session(session).await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Login failed");
                self.login.error = Some(user_message(&e, "Login failed."));
            }
        }
    }

    /// Install the session, load every view and start the update loop.
    pub async fn start_session(&mut self, session: Session) {
        let ledger = self.api.ledger(session);
        let (sync, events) = if self.auto_sync {
            let (handle, rx) = SyncHandle::spawn(ledger.clone(), self.retry_delay);
            (Some(handle), Some(rx))
        } else {
            (None, None)
        };
        self.auth = AuthState::LoggedIn { ledger, sync, events };
        self.screen = Screen::Main;
        self.tab = Tab::Categories;
        self.status = "Logged in | ? for help | q to quit".into();

        for what in [Collection::Categories, Collection::Transactions, Collection::Operations] {
            if let Err(e) = self.reload(what).await {
                self.report_error(what, e);
                if self.screen != Screen::Main {
                    return;
                }
            }
        }
    }

    pub fn logout(&mut self) {
        self.end_session();
        self.status = "Logged out".into();
    }

    fn end_session(&mut self) {
        if let AuthState::LoggedIn { sync: Some(handle), .. } = &self.auth {
            handle.stop();
        }
        self.auth = AuthState::LoggedOut;
        self.sync_state = SyncState::Idle;
        self.categories = CategoriesPage::default();
        self.txn = TxnPage::default();
        self.add = AddTxnForm::default();
        self.ops = OperationsPage::default();
        self.reports.summary = None;
        self.reports.by_category.clear();
        self.screen = Screen::Login;
    }

    fn session_expired(&mut self) {
        tracing::warn!("Session expired");
        self.end_session();
        let msg = ApiError::Unauthorized.to_string();
        self.login.error = Some(msg.clone());
        self.status = msg;
    }

    // ============= Reconciliation =============

    /// Replace one collection with a fresh snapshot from the server.
    pub async fn reload(&mut self, what: Collection) -> Result<(), ApiError> {
        let ledger = self.ledger()?;
        match what {
            Collection::Categories => {
                let list = ledger.list_categories().await?;
                self.replace_categories(list);
            }
            Collection::Transactions => {
                let rows = ledger.list_transactions().await?;
                self.replace_transactions(rows);
            }
            Collection::Operations => {
                let rows = ledger.list_operations().await?;
                self.replace_operations(rows);
            }
        }
        Ok(())
    }

    /// Manual reload from the keyboard.
    pub async fn refresh(&mut self, what: Collection) {
        match self.reload(what).await {
            Ok(()) => self.status = format!("Reloaded {}.", what.label()),
            Err(e) => self.report_error(what, e),
        }
    }

    fn replace_categories(&mut self, list: Vec<Category>) {
        self.categories.list = list;
        clamp_list(&mut self.categories.sel, self.categories.list.len());
        clamp_list(&mut self.add.cat_sel, self.categories.list.len());
    }

    fn replace_transactions(&mut self, rows: Vec<Transaction>) {
        self.txn.table = rows;
        clamp_table(&mut self.txn.tsel, self.txn.table.len());
        self.redraw_chart();
    }

    fn replace_operations(&mut self, rows: Vec<Operation>) {
        self.ops.table = rows;
        clamp_table(&mut self.ops.tsel, self.ops.table.len());
    }

    /// The previous chart is dropped before the new one is built.
    fn redraw_chart(&mut self) {
        if let Some(old) = self.txn.chart.take() {
            tracing::trace!(slices = old.slices.len(), "Disposing expense chart");
        }
        self.txn.chart = Some(ExpenseChart::from_transactions(&self.txn.table));
    }

    /// Report the mutation outcome, then re-fetch the collection no matter how it went.
    async fn after_mutation(&mut self, what: Collection, done: &str, outcome: Result<(), ApiError>) {
        match &outcome {
            Ok(()) => self.status = done.to_string(),
            Err(e) if e.is_auth_failure() => {
                self.session_expired();
                return;
            }
            Err(e) => {
                tracing::error!(collection = ?what, error = %e, "Mutation failed");
                self.status = format!("Failed: {e}");
            }
        }
        if let Err(e) = self.reload(what).await {
            self.report_error(what, e);
        }
    }

    fn report_error(&mut self, what: Collection, e: ApiError) {
        if e.is_auth_failure() {
            self.session_expired();
            return;
        }
        tracing::error!(collection = ?what, error = %e, "Loading failed");
        self.status = format!("Error loading {}: {e}", what.label());
    }

    // ============= Categories =============

    pub async fn add_category(&mut self) {
        let name = self.categories.name.value.trim().to_string();
        if name.is_empty() {
            self.status = "Category name is required".into();
            return;
        }
        let outcome = match self.ledger() {
            Ok(ledger) => ledger.add_category(&name).await,
            Err(e) => Err(e),
        };
        if outcome.is_ok() {
            self.categories.adding = false;
            self.categories.name.clear();
        }
        self.after_mutation(Collection::Categories, "Category added.", outcome)
            .await;
    }

    pub async fn delete_category(&mut self, id: &CategoryId) {
        let outcome = match self.ledger() {
            Ok(ledger) => ledger.delete_category(id).await,
            Err(e) => Err(e),
        };
        self.after_mutation(Collection::Categories, "Category deleted.", outcome)
            .await;
    }

    pub fn selected_category(&self) -> Option<&Category> {
        let idx = self.categories.sel.selected()?;
        self.categories.list.get(idx)
    }

    // ============= Transactions =============

    pub async fn submit_txn(&mut self) {
        let category = match self
            .add
            .cat_sel
            .selected()
            .and_then(|i| self.categories.list.get(i))
        {
            Some(c) => c.id.clone(),
            None => {
                self.add.error = Some("Category is required!".into());
                return;
            }
        };

        let amount = match util::parse_money(&self.add.amount.value) {
            Some(d) => Money(d),
            None => {
                self.add.error = Some("Invalid amount format".into());
                return;
            }
        };

        let req = NewTransaction { category, amount, kind: self.add.kind };
        let outcome = match self.ledger() {
            Ok(ledger) => ledger.add_transaction(&req).await,
            Err(e) => Err(e),
        };
        match &outcome {
            Ok(()) => {
                self.add.error = None;
                self.add.amount.clear();
                self.add.open = false;
            }
            Err(e) => self.add.error = Some(format!("Save failed: {e}")),
        }
        self.after_mutation(Collection::Transactions, "Transaction added.", outcome)
            .await;
    }

    pub async fn delete_transaction(&mut self, id: &str) {
        let outcome = match self.ledger() {
            Ok(ledger) => ledger.delete_transaction(id).await,
            Err(e) => Err(e),
        };
        self.after_mutation(Collection::Transactions, "Transaction deleted.", outcome)
            .await;
    }

    pub fn selected_txn(&self) -> Option<&Transaction> {
        let idx = self.txn.tsel.selected()?;
        self.txn.table.get(idx)
    }

    // ============= Operations =============

    /// An empty amount cancels the edit without a request.
    pub async fn edit_operation(&mut self, id: &str, amount: &str) {
        if amount.trim().is_empty() {
            self.status = "Edit cancelled".into();
            return;
        }
        let Some(amount) = util::parse_money(amount) else {
            self.status = "Invalid amount format".into();
            return;
        };
        let outcome = match self.ledger() {
            Ok(ledger) => ledger.edit_operation(id, Money(amount)).await,
            Err(e) => Err(e),
        };
        self.after_mutation(Collection::Operations, "Operation updated.", outcome)
            .await;
    }

    pub async fn delete_operation(&mut self, id: &str) {
        let outcome = match self.ledger() {
            Ok(ledger) => ledger.delete_operation(id).await,
            Err(e) => Err(e),
        };
        self.after_mutation(Collection::Operations, "Operation deleted.", outcome)
            .await;
    }

    pub fn selected_operation(&self) -> Option<&Operation> {
        let idx = self.ops.tsel.selected()?;
        self.ops.table.get(idx)
    }

    // ============= Reports =============

    pub async fn generate_report(&mut self) {
        let range = match ReportRange::parse(&self.reports.start.value, &self.reports.end.value) {
            Ok(r) => r,
            Err(e) => {
                self.reports.error = Some(e.to_string());
                return;
            }
        };
        let ledger = match self.ledger() {
            Ok(l) => l,
            Err(_) => return self.session_expired(),
        };

        let res = async {
            let summary = ledger.report(&range).await?;
            let by_category = ledger.category_report(&range).await?;
            Ok::<_, ApiError>((summary, by_category))
        }
        .await;

        match res {
            Ok((summary, by_category)) => {
                tracing::debug!(start = %range.start, end = %range.end, "Report generated");
                self.reports.summary = Some(summary);
                self.reports.by_category = by_category;
                self.reports.error = None;
            }
            Err(e) if e.is_auth_failure() => self.session_expired(),
            Err(e) => {
                tracing::error!(error = %e, "Error generating report");
                self.reports.error = Some(e.to_string());
            }
        }
    }

    // ============= Sync =============

    pub fn apply_sync_event(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::State(state) => self.sync_state = state,
            SyncEvent::Categories(list) => self.replace_categories(list),
            SyncEvent::Transactions(rows) => self.replace_transactions(rows),
            SyncEvent::SessionExpired => self.session_expired(),
        }
    }

    /// Apply everything the update loop has delivered since the last tick.
    pub fn pump_sync_events(&mut self) {
        let mut pending = Vec::new();
        if let AuthState::LoggedIn { events: Some(rx), .. } = &mut self.auth {
            while let Ok(ev) = rx.try_recv() {
                pending.push(ev);
            }
        }
        for ev in pending {
            self.apply_sync_event(ev);
            if self.screen != Screen::Main {
                break;
            }
        }
    }

    pub fn sync_running(&self) -> bool {
        matches!(&self.auth, AuthState::LoggedIn { sync: Some(h), .. } if !h.is_finished())
    }
}

impl Collection {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Categories => "categories",
            Self::Transactions => "transactions",
            Self::Operations => "operations",
        }
    }
}

fn user_message(e: &ApiError, fallback: &str) -> String {
    match e {
        ApiError::Rejected { message, .. } if !message.trim().is_empty() => message.clone(),
        ApiError::Network(_) => e.to_string(),
        ApiError::Validation(msg) => msg.clone(),
        _ => fallback.to_string(),
    }
}

fn clamp_list(sel: &mut ListState, len: usize) {
    match (len, sel.selected()) {
        (0, _) => sel.select(None),
        (n, Some(i)) if i >= n => sel.select(Some(n - 1)),
        (_, None) => sel.select(Some(0)),
        _ => {}
    }
}

fn clamp_table(sel: &mut TableState, len: usize) {
    match (len, sel.selected()) {
        (0, _) => sel.select(None),
        (n, Some(i)) if i >= n => sel.select(Some(n - 1)),
        (_, None) => sel.select(Some(0)),
        _ => {}
    }
}
