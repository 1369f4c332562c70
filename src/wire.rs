use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

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
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::DaybookAuthSource;
use crate::engine::{BookingError, ConflictReason, Engine};
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, ResultShape, SqlError};
use crate::validation::{self, ReservationRequest, ValidationError};

pub struct DaybookHandler {
    engine: Arc<Engine>,
    query_parser: Arc<DaybookQueryParser>,
}

impl DaybookHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(DaybookQueryParser),
        }
    }

    fn candidate(&self, request: &ReservationRequest) -> PgWireResult<Candidate> {
        validation::validate(request, self.engine.today()).map_err(validation_err)
    }

    /// Parse, run and time one statement.
    async fn run(&self, query: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::SelectAvailability { request } => {
                let candidate = self.candidate(&request)?;
                engine
                    .check_availability(candidate)
                    .await
                    .map_err(booking_err)?;
                availability_response(&candidate)
            }
            Command::InsertReservation { request } => {
                let candidate = self.candidate(&request)?;
                let reservation = engine
                    .place_reservation(candidate)
                    .await
                    .map_err(booking_err)?;
                reservation_response(&[reservation])
            }
            Command::UpdateReservation { id, request } => {
                let candidate = self.candidate(&request)?;
                let reservation = engine
                    .modify_reservation(id, candidate)
                    .await
                    .map_err(booking_err)?;
                reservation_response(&[reservation])
            }
            Command::DeleteReservation { id } => {
                engine.cancel_reservation(id).await.map_err(booking_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectReservations { id: Some(id) } => {
                let reservation = engine.get_reservation(id).await.map_err(booking_err)?;
                reservation_response(&[reservation])
            }
            Command::SelectReservations { id: None } => {
                let reservations = engine.list_reservations().await.map_err(booking_err)?;
                reservation_response(&reservations)
            }
        }
    }
}

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn days_field() -> FieldInfo {
    FieldInfo::new("days".into(), None, None, Type::INT8, FieldFormat::Text)
}

fn reservation_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("date"),
        text_field("end_date"),
        days_field(),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        text_field("date"),
        text_field("end_date"),
        days_field(),
        text_field("message"),
    ]
}

fn schema_for(sql: &str) -> Vec<FieldInfo> {
    match sql::result_shape(sql) {
        ResultShape::Availability => availability_schema(),
        ResultShape::Reservation => reservation_schema(),
        ResultShape::NoRows => vec![],
    }
}

fn availability_response(candidate: &Candidate) -> PgWireResult<Response> {
    let schema = Arc::new(availability_schema());
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&candidate.date.to_string())?;
    encoder.encode_field(&candidate.finish().to_string())?;
    encoder.encode_field(&i64::from(candidate.days))?;
    encoder.encode_field(&"available")?;
    let rows = vec![Ok(encoder.take_row())];
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn reservation_response(reservations: &[Reservation]) -> PgWireResult<Response> {
    let schema = Arc::new(reservation_schema());
    let rows: Vec<PgWireResult<_>> = reservations
        .iter()
        .map(|r| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&r.id.to_string())?;
            encoder.encode_field(&r.start.to_string())?;
            encoder.encode_field(&r.finish.to_string())?;
            encoder.encode_field(&i64::from(r.days))?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

#[async_trait]
impl SimpleQueryHandler for DaybookHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct DaybookQueryParser;

#[async_trait]
impl QueryParser for DaybookQueryParser {
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
        Ok(schema_for(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for DaybookHandler {
    type Statement = String;
    type QueryParser = DaybookQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run(&substitute_params(portal)).await
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
            schema_for(&target.statement),
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
        Ok(DescribePortalResponse::new(schema_for(
            &target.statement.statement,
        )))
    }
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    let mut max = 0;
    let mut rest = sql;
    while let Some(pos) = rest.find('$') {
        rest = &rest[pos + 1..];
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if let Ok(n) = rest[..digits].parse::<usize>() {
            max = max.max(n);
        }
        rest = &rest[digits..];
    }
    max
}

fn substitute_params(portal: &Portal<String>) -> String {
    inline_params(&portal.statement.statement, &portal.parameters)
}

/// Inline bound parameters as quoted text literals (or NULL) in one pass over
/// the statement. Inlined values are never rescanned, and placeholders with no
/// bound value are left as written.
fn inline_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut rest = sql;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        let param = after[..digits]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| params.get(i));
        match param {
            Some(Some(bytes)) => {
                out.push('\'');
                out.push_str(&String::from_utf8_lossy(bytes.as_ref()).replace('\'', "''"));
                out.push('\'');
            }
            Some(None) => out.push_str("NULL"),
            None => out.push_str(&rest[pos..pos + 1 + digits]),
        }
        rest = &after[digits..];
    }
    out.push_str(rest);
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct DaybookFactory {
    handler: Arc<DaybookHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<DaybookAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl DaybookFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        Self {
            handler: Arc::new(DaybookHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                DaybookAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for DaybookFactory {
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

/// Serve one client socket until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(DaybookFactory::new(engine, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Error mapping ────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn sqlstate(e: &BookingError) -> &'static str {
    match e {
        BookingError::NotFound(_) => "P0002",
        BookingError::Conflict(ConflictReason::Reserved) => "23P01",
        BookingError::Conflict(ConflictReason::Started(_)) => "55000",
        BookingError::InvalidDays(_) => "22023",
        BookingError::Persistence(_) | BookingError::Store(_) => "58030",
    }
}

fn booking_err(e: BookingError) -> PgWireError {
    user_error(sqlstate(&e), e.to_string())
}

fn validation_err(e: ValidationError) -> PgWireError {
    user_error("22023", e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn inline_params_quotes_values_and_nulls() {
        let params = [Some(b"2026-10-20".to_vec()), None, Some(b"it's".to_vec())];
        assert_eq!(
            inline_params("VALUES ($1, $2, $3)", &params),
            "VALUES ('2026-10-20', NULL, 'it''s')"
        );
    }

    #[test]
    fn inline_params_does_not_rescan_bound_values() {
        let params = [Some(b"$2".to_vec()), Some(b"x".to_vec())];
        assert_eq!(inline_params("SELECT $1, $2", &params), "SELECT '$2', 'x'");

        let params = [Some(b"$1".to_vec())];
        assert_eq!(inline_params("WHERE id = $1", &params), "WHERE id = '$1'");
    }

    #[test]
    fn inline_params_keeps_multi_digit_and_unbound_placeholders() {
        let params: Vec<Option<Vec<u8>>> = (1..=10).map(|n| Some(n.to_string().into_bytes())).collect();
        assert_eq!(inline_params("$10 $1", &params), "'10' '1'");
        assert_eq!(inline_params("$11 $0 cost $", &params), "$11 $0 cost $");
    }

    #[test]
    fn count_params_finds_highest_placeholder() {
        assert_eq!(count_params("SELECT 1"), 0);
        assert_eq!(count_params("UPDATE reservations SET date = $1 WHERE id = $2"), 2);
        assert_eq!(count_params("VALUES ($10, $2)"), 10);
        assert_eq!(count_params("cost $ 5"), 0);
    }

    #[test]
    fn booking_errors_map_to_sqlstates() {
        let day = "2026-10-18".parse().unwrap();
        let cases = [
            (BookingError::NotFound(Ulid::new()), "P0002"),
            (BookingError::Conflict(ConflictReason::Reserved), "23P01"),
            (BookingError::Conflict(ConflictReason::Started(day)), "55000"),
            (BookingError::InvalidDays(7), "22023"),
            (BookingError::Persistence("disk full".into()), "58030"),
        ];
        for (err, code) in cases {
            assert_eq!(sqlstate(&err), code, "{err}");
        }
    }

    #[test]
    fn schema_follows_statement_shape() {
        let names = |sql: &str| -> Vec<String> {
            schema_for(sql).iter().map(|f| f.name().to_string()).collect()
        };
        assert_eq!(
            names("SELECT * FROM availability WHERE date = $1"),
            vec!["date", "end_date", "days", "message"]
        );
        assert_eq!(
            names("SELECT * FROM reservations"),
            vec!["id", "date", "end_date", "days"]
        );
        assert!(names("DELETE FROM reservations WHERE id = $1").is_empty());
    }
}
