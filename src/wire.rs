use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
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
use pgwire::tokio::{process_socket, TlsAcceptor};
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::BilletAuthSource;
use crate::engine::Engine;
use crate::observability;
use crate::sql::{self, Command};
use crate::tenant::TenantManager;

pub struct BilletHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<BilletQueryParser>,
}

impl BilletHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(BilletQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    async fn execute(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        let label = observability::command_label(&cmd);
        let start = std::time::Instant::now();
        let result = self.execute_command(engine, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertHotel {
                id,
                event_id,
                name,
                address,
            } => {
                engine
                    .create_hotel(id, event_id, name, address)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateHotel { id, name, address } => {
                engine
                    .update_hotel(id, name, address)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteHotel { id } => {
                engine.delete_hotel(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertRoom {
                id,
                hotel_id,
                number,
                room_type,
                capacity,
                default_bed_type,
                notes,
                status,
            } => {
                engine
                    .create_room(
                        id,
                        hotel_id,
                        number,
                        room_type,
                        capacity,
                        default_bed_type,
                        notes,
                        status,
                    )
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateRoom { id, patch } => {
                engine.update_room(id, patch).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::InsertAssignment {
                id,
                hotel_id,
                participant_id,
                room_id,
                bed_id,
                event_id,
                preferred_bed_type,
                check_in,
                check_out,
                status,
            } => {
                engine
                    .create_assignment(
                        id,
                        hotel_id,
                        participant_id,
                        room_id,
                        bed_id,
                        event_id,
                        preferred_bed_type,
                        check_in,
                        check_out,
                        status,
                    )
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateAssignment { id, patch } => {
                engine
                    .update_assignment(id, patch)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteAssignment { id } => {
                engine.remove_assignment(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectHotels { id } => {
                let mut hotels = engine.list_hotels().await;
                if let Some(id) = id {
                    hotels.retain(|h| h.id == id);
                }
                let schema = Arc::new(hotels_schema());
                let rows: Vec<PgWireResult<_>> = hotels
                    .into_iter()
                    .map(|h| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&h.id.to_string())?;
                        encoder.encode_field(&h.event_id.to_string())?;
                        encoder.encode_field(&h.name)?;
                        encoder.encode_field(&h.address)?;
                        encoder.encode_field(&(h.total_beds as i32))?;
                        encoder.encode_field(&(h.occupied_beds as i32))?;
                        encoder.encode_field(&to_json(&h.room_types)?)?;
                        encoder.encode_field(&to_json(&h.bed_types)?)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectRooms { hotel_id } => {
                let rooms = engine.list_rooms(hotel_id).await.map_err(engine_err)?;
                let schema = Arc::new(rooms_schema());
                let rows: Vec<PgWireResult<_>> = rooms
                    .into_iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.id.to_string())?;
                        encoder.encode_field(&r.hotel_id.to_string())?;
                        encoder.encode_field(&r.number)?;
                        encoder.encode_field(&r.room_type.as_str())?;
                        encoder.encode_field(&(r.capacity as i32))?;
                        encoder.encode_field(&r.default_bed_type.map(|b| b.as_str()))?;
                        encoder.encode_field(&r.notes)?;
                        encoder.encode_field(&r.status.as_str())?;
                        encoder.encode_field(&(r.bed_count as i32))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectBeds { hotel_id, room_id } => {
                let beds = engine
                    .list_beds(hotel_id, room_id)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(beds_schema());
                let rows: Vec<PgWireResult<_>> = beds
                    .into_iter()
                    .map(|b| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&b.id.to_string())?;
                        encoder.encode_field(&b.hotel_id.to_string())?;
                        encoder.encode_field(&b.room_id.to_string())?;
                        encoder.encode_field(&b.bed_type.as_str())?;
                        encoder.encode_field(&b.status.as_str())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectAssignments { hotel_id } => {
                let assignments = engine
                    .list_assignments(hotel_id)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(assignments_schema());
                let rows: Vec<PgWireResult<_>> = assignments
                    .into_iter()
                    .map(|a| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&a.id.to_string())?;
                        encoder.encode_field(&a.hotel_id.to_string())?;
                        encoder.encode_field(&a.participant_id.to_string())?;
                        encoder.encode_field(&a.room_id.map(|u| u.to_string()))?;
                        encoder.encode_field(&a.bed_id.map(|u| u.to_string()))?;
                        encoder.encode_field(&a.event_id.map(|u| u.to_string()))?;
                        encoder.encode_field(&a.preferred_bed_type.map(|b| b.as_str()))?;
                        encoder.encode_field(&a.check_in)?;
                        encoder.encode_field(&a.check_out)?;
                        encoder.encode_field(&a.status.as_str())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectOccupancy { hotel_id, event_id } => {
                let report = engine
                    .occupancy_for_hotel(hotel_id, event_id)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(occupancy_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&report.hotel_id.to_string())?;
                encoder.encode_field(&(report.total_rooms as i32))?;
                encoder.encode_field(&(report.total_beds as i32))?;
                encoder.encode_field(&(report.assigned as i32))?;
                encoder.encode_field(&(report.available as i32))?;
                encoder.encode_field(&report.occupancy_pct)?;
                encoder.encode_field(&to_json(&report.room_types)?)?;
                encoder.encode_field(&to_json(&report.bed_types)?)?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::Listen { channel } => {
                validate_channel(&channel)?;
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
            Command::Unlisten { channel } => {
                if channel != "*" {
                    validate_channel(&channel)?;
                }
                Ok(vec![Response::Execution(Tag::new("UNLISTEN"))])
            }
        }
    }
}

fn validate_channel(channel: &str) -> PgWireResult<()> {
    let hotel_id_str = channel.strip_prefix("hotel_").ok_or_else(|| {
        PgWireError::UserError(Box::new(ErrorInfo::new(
            "ERROR".into(),
            "42000".into(),
            format!("invalid channel: {channel} (expected hotel_{{id}})"),
        )))
    })?;
    Ulid::from_string(hotel_id_str).map_err(|e| {
        PgWireError::UserError(Box::new(ErrorInfo::new(
            "ERROR".into(),
            "42000".into(),
            format!("bad ULID in channel: {e}"),
        )))
    })?;
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> PgWireResult<String> {
    serde_json::to_string(value)
        .map_err(|e| PgWireError::ApiError(Box::new(e)))
}

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int4_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT4, FieldFormat::Text)
}

fn hotels_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("event_id"),
        text_field("name"),
        text_field("address"),
        int4_field("total_beds"),
        int4_field("occupied_beds"),
        text_field("room_types"),
        text_field("bed_types"),
    ]
}

fn rooms_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("hotel_id"),
        text_field("number"),
        text_field("room_type"),
        int4_field("capacity"),
        text_field("default_bed_type"),
        text_field("notes"),
        text_field("status"),
        int4_field("bed_count"),
    ]
}

fn beds_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("hotel_id"),
        text_field("room_id"),
        text_field("bed_type"),
        text_field("status"),
    ]
}

fn assignments_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("hotel_id"),
        text_field("participant_id"),
        text_field("room_id"),
        text_field("bed_id"),
        text_field("event_id"),
        text_field("preferred_bed_type"),
        FieldInfo::new("check_in".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("check_out".into(), None, None, Type::INT8, FieldFormat::Text),
        text_field("status"),
    ]
}

fn occupancy_schema() -> Vec<FieldInfo> {
    vec![
        text_field("hotel_id"),
        int4_field("total_rooms"),
        int4_field("total_beds"),
        int4_field("assigned"),
        int4_field("available"),
        FieldInfo::new(
            "occupancy_pct".into(),
            None,
            None,
            Type::FLOAT8,
            FieldFormat::Text,
        ),
        text_field("room_types"),
        text_field("bed_types"),
    ]
}

/// Result schema for a statement, chosen by the FROM table. Non-SELECT
/// statements have no result schema.
fn select_schema(stmt: &str) -> Vec<FieldInfo> {
    let upper = stmt.to_uppercase();
    if !upper.contains("SELECT") {
        return vec![];
    }
    if upper.contains("FROM HOTELS") {
        hotels_schema()
    } else if upper.contains("FROM ROOMS") {
        rooms_schema()
    } else if upper.contains("FROM BEDS") {
        beds_schema()
    } else if upper.contains("FROM ASSIGNMENTS") {
        assignments_schema()
    } else if upper.contains("FROM OCCUPANCY") {
        occupancy_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for BilletHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.execute(&engine, cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct BilletQueryParser;

#[async_trait]
impl QueryParser for BilletQueryParser {
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
        Ok(select_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for BilletHandler {
    type Statement = String;
    type QueryParser = BilletQueryParser;

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
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.execute(&engine, cmd).await?;
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
            select_schema(&target.statement),
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
        Ok(DescribePortalResponse::new(select_schema(
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

pub struct BilletFactory {
    handler: Arc<BilletHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<BilletAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl BilletFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = BilletAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(BilletHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for BilletFactory {
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

/// Serve one client connection to completion.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> Result<(), std::io::Error> {
    let factory = BilletFactory::new(tenant_manager, password);
    process_socket(socket, tls, factory).await
}

fn engine_err(e: crate::engine::EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "P0001".into(),
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
