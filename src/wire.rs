use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{AuthSource, DefaultServerParameterProvider, LoginInfo, Password, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo, QueryResponse,
    Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::clock::format_minute;
use crate::engine::{Engine, EngineError};
use crate::observability;
use crate::sql::{self, BookingFilter, Command, SlotSize};
use crate::tenant::TenantManager;

const WEEKDAY_NAMES: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

pub struct ChairtimeHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<ChairtimeQueryParser>,
}

impl ChairtimeHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(ChairtimeQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager
            .get_or_create(&db)
            .map_err(|e| user_error("08006", format!("tenant error: {e}")))
    }

    /// Parse, execute and record RED metrics for one statement.
    async fn run(&self, engine: &Engine, query: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = execute_command(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        match &result {
            Err(e) if e.is_retryable() => tracing::warn!("{label} failed, client may retry: {e}"),
            Err(e) => tracing::debug!("{label} rejected: {e}"),
            Ok(_) => {}
        }
        result.map_err(engine_err)
    }
}

fn executed(tag: &str, rows: usize) -> Vec<Response> {
    vec![Response::Execution(Tag::new(tag).with_rows(rows))]
}

fn rows_response<T>(
    schema: Vec<FieldInfo>,
    items: impl IntoIterator<Item = T>,
    mut encode: impl FnMut(&mut DataRowEncoder, T) -> PgWireResult<()>,
) -> Vec<Response> {
    let schema = Arc::new(schema);
    let rows: Vec<_> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))]
}

async fn execute_command(engine: &Engine, cmd: Command) -> Result<Vec<Response>, EngineError> {
    match cmd {
        Command::InsertProvider { id, name } => {
            engine.create_provider(id, name).await?;
            Ok(executed("INSERT", 1))
        }
        Command::DeleteProvider { id } => {
            engine.delete_provider(id).await?;
            Ok(executed("DELETE", 1))
        }
        Command::SelectProviders => {
            let providers = engine.list_providers().await;
            Ok(rows_response(providers_schema(), providers, |enc, p| {
                let days: Vec<&str> = (0..7u8)
                    .filter(|d| p.template.is_working(*d))
                    .map(|d| WEEKDAY_NAMES[d as usize])
                    .collect();
                enc.encode_field(&p.id.to_string())?;
                enc.encode_field(&p.name)?;
                enc.encode_field(&days.join(","))
            }))
        }
        Command::SetWorkingDay {
            provider_id,
            weekday,
            working,
        } => {
            engine.set_working_day(provider_id, weekday, working).await?;
            Ok(executed("INSERT", 1))
        }
        Command::SelectTemplate { provider_id } => {
            let template = engine.get_template(provider_id).await?;
            Ok(rows_response(template_schema(), 0..7u8, |enc, d| {
                enc.encode_field(&(d as i32))?;
                enc.encode_field(&WEEKDAY_NAMES[d as usize].to_string())?;
                enc.encode_field(&template.is_working(d))
            }))
        }
        Command::SetDateOverride {
            provider_id,
            date,
            working,
        } => {
            engine.set_date_override(provider_id, date, working).await?;
            Ok(executed("INSERT", 1))
        }
        Command::ClearDateOverride { provider_id, date } => {
            let cleared = engine.clear_date_override(provider_id, date).await?;
            Ok(executed("DELETE", usize::from(cleared)))
        }
        Command::ToggleDateOverride { provider_id, date } => {
            let working = engine.toggle_date_override(provider_id, date).await?;
            Ok(working_day_rows(provider_id, date, working))
        }
        Command::SelectWorkingDay { provider_id, date } => {
            let working = engine.is_working_day(provider_id, date).await?;
            Ok(working_day_rows(provider_id, date, working))
        }
        Command::SelectSchedule {
            provider_id,
            year,
            month,
        } => {
            let days = engine.month_schedule(provider_id, year, month).await?;
            Ok(rows_response(schedule_schema(), days, |enc, day| {
                enc.encode_field(&day.date.to_string())?;
                enc.encode_field(&day.working)?;
                enc.encode_field(&day.overridden)
            }))
        }
        Command::InsertService {
            id,
            provider_id,
            name,
            category,
            duration,
            price,
        } => {
            engine
                .create_service(id, provider_id, name, category, duration, price)
                .await?;
            Ok(executed("INSERT", 1))
        }
        Command::DeleteService { id } => {
            engine.delete_service(id).await?;
            Ok(executed("DELETE", 1))
        }
        Command::SelectServices { provider_id } => {
            let services = engine.list_services(provider_id);
            Ok(rows_response(services_schema(), services, |enc, s| {
                enc.encode_field(&s.id.to_string())?;
                enc.encode_field(&s.provider_id.to_string())?;
                enc.encode_field(&s.name)?;
                enc.encode_field(&s.category)?;
                enc.encode_field(&s.duration)?;
                enc.encode_field(&s.price)
            }))
        }
        Command::InsertClient { id, name } => {
            engine.register_client(id, name).await?;
            Ok(executed("INSERT", 1))
        }
        Command::DeleteClient { id } => {
            engine.delete_client(id).await?;
            Ok(executed("DELETE", 1))
        }
        Command::SelectAvailability {
            provider_id,
            date,
            size,
        } => {
            let slots = match size {
                SlotSize::Minutes(duration) => engine.available_slots(provider_id, date, duration).await?,
                SlotSize::Service(service_id) => {
                    engine
                        .available_slots_for_service(provider_id, service_id, date)
                        .await?
                }
            };
            Ok(rows_response(availability_schema(), slots, |enc, slot| {
                enc.encode_field(&format_minute(slot.time))?;
                enc.encode_field(&slot.status.to_string())?;
                enc.encode_field(&slot.blocked_by.map(|id| id.to_string()))
            }))
        }
        Command::InsertBooking {
            id,
            provider_id,
            client_id,
            service_id,
            date,
            time,
        } => {
            engine
                .commit_booking(id, provider_id, client_id, service_id, date, time)
                .await?;
            Ok(executed("INSERT", 1))
        }
        Command::DeleteBooking { id } => {
            engine.cancel_booking(id).await?;
            Ok(executed("DELETE", 1))
        }
        Command::SelectBookings { filter } => {
            let bookings = match filter {
                BookingFilter::Provider { provider_id, date } => engine.bookings_for_provider(provider_id, date).await?,
                BookingFilter::Client(client_id) => engine.bookings_for_client(client_id).await?,
            };
            Ok(rows_response(bookings_schema(), bookings, |enc, b| {
                enc.encode_field(&b.id.to_string())?;
                enc.encode_field(&b.provider_id.to_string())?;
                enc.encode_field(&b.client_id.to_string())?;
                enc.encode_field(&b.service_id.to_string())?;
                enc.encode_field(&b.date.to_string())?;
                enc.encode_field(&format_minute(b.start))?;
                enc.encode_field(&b.duration)
            }))
        }
    }
}

fn working_day_rows(provider_id: Ulid, date: NaiveDate, working: bool) -> Vec<Response> {
    rows_response(working_day_schema(), [working], |enc, working| {
        enc.encode_field(&provider_id.to_string())?;
        enc.encode_field(&date.to_string())?;
        enc.encode_field(&working)
    })
}

// ── Result schemas ───────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn providers_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("working_days", Type::VARCHAR),
    ]
}

fn template_schema() -> Vec<FieldInfo> {
    vec![
        field("weekday", Type::INT4),
        field("day", Type::VARCHAR),
        field("is_working", Type::BOOL),
    ]
}

fn working_day_schema() -> Vec<FieldInfo> {
    vec![
        field("provider_id", Type::VARCHAR),
        field("date", Type::VARCHAR),
        field("is_working", Type::BOOL),
    ]
}

fn schedule_schema() -> Vec<FieldInfo> {
    vec![
        field("date", Type::VARCHAR),
        field("is_working", Type::BOOL),
        field("overridden", Type::BOOL),
    ]
}

fn services_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("provider_id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("category", Type::VARCHAR),
        field("duration", Type::INT4),
        field("price", Type::INT8),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        field("time", Type::VARCHAR),
        field("status", Type::VARCHAR),
        field("blocked_by", Type::VARCHAR),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("provider_id", Type::VARCHAR),
        field("client_id", Type::VARCHAR),
        field("service_id", Type::VARCHAR),
        field("date", Type::VARCHAR),
        field("time", Type::VARCHAR),
        field("duration", Type::INT4),
    ]
}

/// Row shape of a statement, known before it runs. Only SELECTs return rows;
/// the table name after FROM decides the shape.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let mut tokens = sql.split_whitespace();
    if !tokens.next().is_some_and(|t| t.eq_ignore_ascii_case("SELECT")) {
        return vec![];
    }
    let table = tokens
        .skip_while(|t| !t.eq_ignore_ascii_case("FROM"))
        .nth(1)
        .map(|t| t.trim_end_matches(';').to_ascii_lowercase());
    match table.as_deref() {
        Some("providers") => providers_schema(),
        Some("weekly_template") => template_schema(),
        Some("working_day" | "toggle_date_override") => working_day_schema(),
        Some("schedule") => schedule_schema(),
        Some("services") => services_schema(),
        Some("availability") => availability_schema(),
        Some("bookings") => bookings_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for ChairtimeHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        self.run(&engine, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ChairtimeQueryParser;

#[async_trait]
impl QueryParser for ChairtimeQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(&self, stmt: &String, _column_format: Option<&Format>) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for ChairtimeHandler {
    type Statement = String;
    type QueryParser = ChairtimeQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(&self, client: &mut C, portal: &Portal<Self::Statement>, _max_rows: usize) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        self.run(&engine, &sql)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| user_error("XX000", "statement produced no response".into()))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(param_types, result_schema(&target.statement)))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(&target.statement.statement)))
    }
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Inline bound text parameters as quoted literals. Highest index first so
/// `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut sql = portal.statement.statement.clone();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let value = match param {
            Some(bytes) => format!("'{}'", String::from_utf8_lossy(bytes).replace('\'', "''")),
            None => "NULL".to_string(),
        };
        sql = sql.replace(&format!("${}", i + 1), &value);
    }
    sql
}

// ── Auth ─────────────────────────────────────────────────────────

/// One shared cleartext password for every user and tenant.
#[derive(Debug)]
pub struct PasswordAuthSource {
    password: String,
}

impl PasswordAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for PasswordAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

// ── Factory ──────────────────────────────────────────────────────

pub struct ChairtimeFactory {
    handler: Arc<ChairtimeHandler>,
    auth_handler: Arc<CleartextPasswordAuthStartupHandler<PasswordAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl ChairtimeFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        Self {
            handler: Arc::new(ChairtimeHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                PasswordAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ChairtimeFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = ChairtimeFactory::new(tenant_manager, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(e.sqlstate(), e.to_string())
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
