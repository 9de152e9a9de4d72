use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::sql::{self, Command};

pub struct AulaHandler {
    engine: Arc<Engine>,
    query_parser: Arc<AulaQueryParser>,
}

impl AulaHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(AulaQueryParser),
        }
    }

    /// Login name from the connection's startup parameters. The identity
    /// provider in front of us owns authentication; we only match the name
    /// against the provisioned profile directory.
    fn username<C: ClientInfo>(client: &C) -> String {
        client
            .metadata()
            .get("user")
            .cloned()
            .unwrap_or_default()
    }

    async fn execute_command(&self, username: &str, cmd: Command) -> PgWireResult<Vec<Response>> {
        let label = crate::observability::command_label(&cmd);
        let start = std::time::Instant::now();
        let result = self.dispatch(username, cmd).await;
        metrics::histogram!(
            crate::observability::QUERY_DURATION_SECONDS,
            "command" => label
        )
        .record(start.elapsed().as_secs_f64());
        metrics::counter!(
            crate::observability::QUERIES_TOTAL,
            "command" => label,
            "status" => if result.is_ok() { "ok" } else { "error" }
        )
        .increment(1);
        result
    }

    async fn dispatch(&self, username: &str, cmd: Command) -> PgWireResult<Vec<Response>> {
        let engine = &self.engine;
        match cmd {
            Command::InsertHall {
                id,
                name,
                block,
                hall_type,
                capacity,
                equipment,
            } => {
                engine
                    .create_hall(id, name, block, hall_type, capacity, equipment)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateHallStatus {
                id,
                blocked,
                under_maintenance,
                note,
            } => {
                let actor = engine.require_profile(username).map_err(engine_err)?;
                engine
                    .set_hall_status(id, blocked, under_maintenance, note, &actor)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::InsertProfile {
                id,
                username: login,
                display_name,
                email,
                role,
                department,
            } => {
                engine
                    .upsert_profile(Profile {
                        user_id: id,
                        username: login,
                        display_name,
                        email,
                        role,
                        department,
                    })
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertBooking { request } => {
                let actor = engine.require_profile(username).map_err(engine_err)?;
                engine
                    .request_booking(request, &actor)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::ApproveBooking { id } => {
                let actor = engine.require_profile(username).map_err(engine_err)?;
                engine
                    .approve_booking(id, &actor)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::RejectBooking { id, reason } => {
                let actor = engine.require_profile(username).map_err(engine_err)?;
                engine
                    .reject_booking(id, &actor, &reason)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SwitchHall { id, hall_id, reason } => {
                let actor = engine.require_profile(username).map_err(engine_err)?;
                engine
                    .switch_hall(id, hall_id, &actor, reason)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::MarkNotificationRead { id } => {
                let actor = engine.require_profile(username).map_err(engine_err)?;
                engine
                    .mark_notification_read(actor.user_id, id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SelectHalls => {
                let halls = engine.list_halls().await;
                let schema = Arc::new(hall_schema());
                let rows: Vec<PgWireResult<_>> = halls
                    .into_iter()
                    .map(|h| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&h.id.to_string())?;
                        encoder.encode_field(&h.name)?;
                        encoder.encode_field(&h.block.as_str())?;
                        encoder.encode_field(&h.hall_type.as_str())?;
                        encoder.encode_field(&(h.capacity as i64))?;
                        encoder.encode_field(&h.equipment.ac)?;
                        encoder.encode_field(&h.equipment.mic)?;
                        encoder.encode_field(&h.equipment.projector)?;
                        encoder.encode_field(&h.equipment.audio)?;
                        encoder.encode_field(&h.blocked)?;
                        encoder.encode_field(&h.under_maintenance)?;
                        encoder.encode_field(&h.status_note)?;
                        encoder.encode_field(&h.in_use)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectBookings { filter } => {
                let bookings = engine.list_bookings(&filter).await;
                let schema = Arc::new(booking_schema());
                let rows: Vec<PgWireResult<_>> = bookings
                    .into_iter()
                    .map(|b| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&b.id.to_string())?;
                        encoder.encode_field(&b.hall_id.to_string())?;
                        encoder.encode_field(&b.faculty.to_string())?;
                        encoder.encode_field(&b.organizer)?;
                        encoder.encode_field(&b.department.as_str())?;
                        encoder.encode_field(&b.institution.as_str())?;
                        encoder.encode_field(&b.event_name)?;
                        encoder.encode_field(&b.event_description)?;
                        encoder.encode_field(&b.event_date.to_string())?;
                        encoder.encode_field(&hhmm(b.slot.start))?;
                        encoder.encode_field(&hhmm(b.slot.end))?;
                        encoder.encode_field(&(b.attendees as i64))?;
                        encoder.encode_field(&b.status.as_str())?;
                        encoder.encode_field(&b.rejection_reason)?;
                        encoder.encode_field(&b.hod_name)?;
                        encoder.encode_field(&b.original_hall_id.map(|id| id.to_string()))?;
                        encoder.encode_field(&b.created_at.to_rfc3339())?;
                        encoder.encode_field(&b.updated_at.to_rfc3339())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectApprovals { booking_id } => {
                let records = engine.approvals_for(booking_id);
                let schema = Arc::new(approval_schema());
                let rows: Vec<PgWireResult<_>> = records
                    .into_iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.id.to_string())?;
                        encoder.encode_field(&r.booking_id.to_string())?;
                        encoder.encode_field(&r.approver.to_string())?;
                        encoder.encode_field(&r.approver_name)?;
                        encoder.encode_field(&r.action.as_str())?;
                        encoder.encode_field(&r.reason)?;
                        encoder.encode_field(&r.at.to_rfc3339())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectNotifications => {
                let actor = engine.require_profile(username).map_err(engine_err)?;
                let notifications = engine.notifications_for(actor.user_id);
                let schema = Arc::new(notification_schema());
                let rows: Vec<PgWireResult<_>> = notifications
                    .into_iter()
                    .map(|n| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&n.id.to_string())?;
                        encoder.encode_field(&n.title)?;
                        encoder.encode_field(&n.message)?;
                        encoder.encode_field(&n.kind)?;
                        encoder.encode_field(&n.payload.map(|p| p.to_string()))?;
                        encoder.encode_field(&n.read)?;
                        encoder.encode_field(&n.created_at.to_rfc3339())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectAvailability {
                hall_id,
                event_date,
                start,
                end,
                exclude_booking,
            } => {
                // Fail closed: any engine failure reads as unavailable, never
                // as a silent go-ahead.
                let verdict = match engine
                    .availability_for(hall_id, event_date, Slot { start, end }, exclude_booking)
                    .await
                {
                    Ok(v) => v,
                    Err(e) => Availability::Unavailable {
                        reason: format!("could not verify availability: {e}"),
                        conflict: None,
                    },
                };

                let schema = Arc::new(availability_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                match verdict {
                    Availability::Available => {
                        encoder.encode_field(&true)?;
                        encoder.encode_field(&None::<String>)?;
                        encoder.encode_field(&None::<String>)?;
                        encoder.encode_field(&None::<String>)?;
                        encoder.encode_field(&None::<String>)?;
                    }
                    Availability::Unavailable { reason, conflict } => {
                        encoder.encode_field(&false)?;
                        encoder.encode_field(&Some(reason))?;
                        encoder.encode_field(&conflict.as_ref().map(|c| c.event_name.clone()))?;
                        encoder.encode_field(&conflict.as_ref().map(|c| hhmm(c.slot.start)))?;
                        encoder.encode_field(&conflict.as_ref().map(|c| hhmm(c.slot.end)))?;
                    }
                }
                let rows = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::Listen { channel } => {
                validate_user_channel(&channel)?;
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
            Command::Unlisten { channel } => {
                if let Some(ref c) = channel {
                    validate_user_channel(c)?;
                }
                Ok(vec![Response::Execution(Tag::new("UNLISTEN"))])
            }
        }
    }
}

/// Notification channels are per-recipient: `user_<ulid>`.
fn validate_user_channel(channel: &str) -> PgWireResult<Ulid> {
    let id_str = channel.strip_prefix("user_").ok_or_else(|| {
        PgWireError::UserError(Box::new(ErrorInfo::new(
            "ERROR".into(),
            "42000".into(),
            format!("invalid channel: {channel} (expected user_{{id}})"),
        )))
    })?;
    Ulid::from_string(id_str).map_err(|e| {
        PgWireError::UserError(Box::new(ErrorInfo::new(
            "ERROR".into(),
            "42000".into(),
            format!("bad ULID in channel: {e}"),
        )))
    })
}

// ── Row schemas ──────────────────────────────────────────────────

fn varchar(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn boolean(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::BOOL, FieldFormat::Text)
}

fn hall_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("name"),
        varchar("block"),
        varchar("hall_type"),
        int8("capacity"),
        boolean("has_ac"),
        boolean("has_mic"),
        boolean("has_projector"),
        boolean("has_audio"),
        boolean("is_blocked"),
        boolean("is_under_maintenance"),
        varchar("status_note"),
        boolean("in_use"),
    ]
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("hall_id"),
        varchar("faculty_id"),
        varchar("organizer"),
        varchar("department"),
        varchar("institution"),
        varchar("event_name"),
        varchar("event_description"),
        varchar("event_date"),
        varchar("start_time"),
        varchar("end_time"),
        int8("attendees"),
        varchar("status"),
        varchar("rejection_reason"),
        varchar("hod_name"),
        varchar("original_hall_id"),
        varchar("created_at"),
        varchar("updated_at"),
    ]
}

fn approval_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("booking_id"),
        varchar("approver_id"),
        varchar("approver_name"),
        varchar("action"),
        varchar("reason"),
        varchar("at"),
    ]
}

fn notification_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("title"),
        varchar("message"),
        varchar("kind"),
        varchar("payload"),
        boolean("is_read"),
        varchar("created_at"),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        boolean("available"),
        varchar("reason"),
        varchar("conflict_event"),
        varchar("conflict_start"),
        varchar("conflict_end"),
    ]
}

/// Result schema for Describe, inferred from the statement text.
fn schema_for_statement(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if !upper.contains("SELECT") {
        return vec![];
    }
    if upper.contains("AVAILABILITY") {
        availability_schema()
    } else if upper.contains("HALLS") {
        hall_schema()
    } else if upper.contains("BOOKINGS") {
        booking_schema()
    } else if upper.contains("APPROVALS") {
        approval_schema()
    } else if upper.contains("NOTIFICATIONS") {
        notification_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for AulaHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let username = Self::username(client);
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.execute_command(&username, cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct AulaQueryParser;

#[async_trait]
impl QueryParser for AulaQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema_for_statement(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for AulaHandler {
    type Statement = String;
    type QueryParser = AulaQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let username = Self::username(client);
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.execute_command(&username, cmd).await?;
        Ok(responses.remove(0))
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
        Ok(DescribeStatementResponse::new(
            param_types,
            schema_for_statement(&target.statement),
        ))
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
        Ok(DescribePortalResponse::new(schema_for_statement(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start {
                if let Ok(n) = sql[start..i].parse::<usize>() {
                    if n > max {
                        max = n;
                    }
                }
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let sql = portal.statement.statement.to_string();
    let params = &portal.parameters;
    let mut result = sql;

    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct AulaFactory {
    handler: Arc<AulaHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<
            crate::auth::AulaAuthSource,
            DefaultServerParameterProvider,
        >,
    >,
    noop: Arc<NoopHandler>,
}

impl AulaFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = crate::auth::AulaAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(AulaHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for AulaFactory {
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

/// Drive one client connection through the pgwire protocol machinery.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> Result<(), std::io::Error> {
    let factory = Arc::new(AulaFactory::new(engine, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: EngineError) -> PgWireError {
    // Distinct SQLSTATE classes so callers can tell validation, conflict and
    // authorization apart without string matching.
    let code = match &e {
        EngineError::Validation(_) | EngineError::EmptyReason | EngineError::LimitExceeded(_) => {
            "22023"
        }
        EngineError::Unavailable { .. } => "23P01",
        EngineError::Unauthorized(_) => "42501",
        EngineError::InvalidTransition { .. } => "55000",
        EngineError::NotFound(_) => "P0002",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::WalError(_) => "58030",
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
