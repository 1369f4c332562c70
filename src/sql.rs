use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;
use ulid::Ulid;

use crate::model::ReservationId;
use crate::validation::ReservationRequest;

/// Parsed command from SQL input. Dates and day counts stay raw here;
/// `validation` decides whether they are acceptable.
#[derive(Debug, PartialEq)]
pub enum Command {
    SelectAvailability {
        request: ReservationRequest,
    },
    InsertReservation {
        request: ReservationRequest,
    },
    UpdateReservation {
        id: ReservationId,
        request: ReservationRequest,
    },
    DeleteReservation {
        id: ReservationId,
    },
    SelectReservations {
        id: Option<ReservationId>,
    },
}

const RESERVATIONS: &str = "reservations";
const AVAILABILITY: &str = "availability";

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Row shape a statement produces, decided without binding its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    Availability,
    Reservation,
    NoRows,
}

pub fn result_shape(sql: &str) -> ResultShape {
    let Ok(stmts) = Parser::parse_sql(&PostgreSqlDialect {}, sql) else {
        return ResultShape::NoRows;
    };
    let table = match stmts.first() {
        Some(Statement::Insert(insert)) => insert_table_name(insert).ok(),
        Some(Statement::Update { table, .. }) => table_factor_name(&table.relation).ok(),
        Some(Statement::Query(query)) => match query.body.as_ref() {
            SetExpr::Select(select) => select
                .from
                .first()
                .and_then(|from| table_factor_name(&from.relation).ok()),
            _ => None,
        },
        _ => None,
    };
    match table.as_deref() {
        Some(AVAILABILITY) => ResultShape::Availability,
        Some(RESERVATIONS) => ResultShape::Reservation,
        _ => ResultShape::NoRows,
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    if table != RESERVATIONS {
        return Err(SqlError::UnknownTable(table));
    }

    let rows = extract_insert_rows(insert)?;
    if rows.len() > 1 {
        return Err(SqlError::Unsupported("multi-row INSERT".into()));
    }
    let values = &rows[0];

    // Honor an explicit column list; otherwise values are positional (date, days).
    let columns: Vec<String> = if insert.columns.is_empty() {
        ["date", "days"].iter().take(values.len()).map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if columns.len() != values.len() {
        return Err(SqlError::WrongArity(RESERVATIONS, columns.len(), values.len()));
    }

    let mut request = ReservationRequest::default();
    for (column, value) in columns.iter().zip(values) {
        assign_field(&mut request, column, value)?;
    }
    Ok(Command::InsertReservation { request })
}

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    if table != RESERVATIONS {
        return Err(SqlError::UnknownTable(table));
    }
    let id = extract_where_id(selection)?;

    let mut request = ReservationRequest::default();
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        }
        .ok_or_else(|| SqlError::Unsupported("tuple assignment".into()))?;
        assign_field(&mut request, &column, &assignment.value)?;
    }
    Ok(Command::UpdateReservation { id, request })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table != RESERVATIONS {
        return Err(SqlError::UnknownTable(table));
    }
    Ok(Command::DeleteReservation {
        id: extract_where_id(&delete.selection)?,
    })
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    match table.as_str() {
        AVAILABILITY => {
            let mut request = ReservationRequest::default();
            if let Some(selection) = &select.selection {
                extract_equalities(selection, &mut |column, value| {
                    assign_field(&mut request, column, value)
                })?;
            }
            Ok(Command::SelectAvailability { request })
        }
        RESERVATIONS => {
            let id = match &select.selection {
                None => None,
                selection => Some(extract_where_id(selection)?),
            };
            Ok(Command::SelectReservations { id })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Walk an `a = x AND b = y ...` tree, handing each `column = value` pair to `f`.
fn extract_equalities(
    expr: &Expr,
    f: &mut impl FnMut(&str, &Expr) -> Result<(), SqlError>,
) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            extract_equalities(left, f)?;
            extract_equalities(right, f)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => match expr_column_name(left) {
            Some(column) => f(&column, right),
            None => Err(SqlError::Unsupported(format!("filter on {left}"))),
        },
        Expr::Nested(inner) => extract_equalities(inner, f),
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

fn assign_field(request: &mut ReservationRequest, column: &str, value: &Expr) -> Result<(), SqlError> {
    match column {
        "date" => request.date = parse_text_or_null(value)?,
        "days" => request.days = parse_i64_or_null(value)?,
        other => return Err(SqlError::UnknownColumn(other.to_string())),
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    let first = tables
        .first()
        .ok_or_else(|| SqlError::Parse("DELETE without table".into()))?;
    table_factor_name(&first.relation)
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_rows(insert: &ast::Insert) -> Result<&[Vec<Expr>], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or_else(|| SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) if !values.rows.is_empty() => Ok(&values.rows),
        SetExpr::Values(_) => Err(SqlError::Parse("empty VALUES".into())),
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let mut id = None;
    if let Some(sel) = selection {
        extract_equalities(sel, &mut |column, value| {
            if column != "id" {
                return Err(SqlError::UnknownColumn(column.to_string()));
            }
            id = Some(parse_ulid_expr(value)?);
            Ok(())
        })?;
    }
    id.ok_or(SqlError::MissingFilter("id"))
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) => Ok(Some(s.clone())),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_i64_expr(expr).map(Some),
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return parse_i64_expr(expr)?
            .checked_neg()
            .ok_or_else(|| SqlError::Parse(format!("integer out of range: -{expr}")));
    }
    match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => s
            .trim()
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
        Some(value) => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("{0}: expected {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    fn request(date: Option<&str>, days: Option<i64>) -> ReservationRequest {
        ReservationRequest {
            date: date.map(String::from),
            days,
        }
    }

    #[test]
    fn parse_select_availability() {
        let sql = "SELECT * FROM availability WHERE date = '2026-10-20' AND days = 2";
        let cmd = parse_sql(sql).unwrap();
        assert_eq!(
            cmd,
            Command::SelectAvailability {
                request: request(Some("2026-10-20"), Some(2)),
            }
        );
    }

    #[test]
    fn parse_select_availability_without_days() {
        let sql = "SELECT * FROM availability WHERE date = '2026-10-20'";
        match parse_sql(sql).unwrap() {
            Command::SelectAvailability { request } => assert_eq!(request.days, None),
            cmd => panic!("expected SelectAvailability, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_availability_rejects_range_filters() {
        let sql = "SELECT * FROM availability WHERE date >= '2026-10-20'";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_insert_positional() {
        let sql = "INSERT INTO reservations VALUES ('2026-10-20', 3)";
        let cmd = parse_sql(sql).unwrap();
        assert_eq!(
            cmd,
            Command::InsertReservation {
                request: request(Some("2026-10-20"), Some(3)),
            }
        );
    }

    #[test]
    fn parse_insert_date_only() {
        let sql = "INSERT INTO reservations (date) VALUES ('2026-10-20')";
        match parse_sql(sql).unwrap() {
            Command::InsertReservation { request: r } => {
                assert_eq!(r, request(Some("2026-10-20"), None));
            }
            cmd => panic!("expected InsertReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_honors_column_order() {
        let sql = "INSERT INTO reservations (days, date) VALUES (2, '2026-10-20')";
        match parse_sql(sql).unwrap() {
            Command::InsertReservation { request: r } => {
                assert_eq!(r, request(Some("2026-10-20"), Some(2)));
            }
            cmd => panic!("expected InsertReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_quoted_days_from_bound_params() {
        let sql = "INSERT INTO reservations (date, days) VALUES ('2026-10-20', '2')";
        match parse_sql(sql).unwrap() {
            Command::InsertReservation { request } => assert_eq!(request.days, Some(2)),
            cmd => panic!("expected InsertReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_null_date_stays_missing() {
        let sql = "INSERT INTO reservations (date, days) VALUES (NULL, 1)";
        match parse_sql(sql).unwrap() {
            Command::InsertReservation { request } => assert_eq!(request.date, None),
            cmd => panic!("expected InsertReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_negative_days_kept_for_validation() {
        let sql = "INSERT INTO reservations (date, days) VALUES ('2026-10-20', -1)";
        match parse_sql(sql).unwrap() {
            Command::InsertReservation { request } => assert_eq!(request.days, Some(-1)),
            cmd => panic!("expected InsertReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_negated_min_integer_errors() {
        let sql = "INSERT INTO reservations (date, days) VALUES ('2026-10-20', -'-9223372036854775808')";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_insert_unknown_column_errors() {
        let sql = "INSERT INTO reservations (date, guests) VALUES ('2026-10-20', 2)";
        assert!(matches!(parse_sql(sql), Err(SqlError::UnknownColumn(c)) if c == "guests"));
    }

    #[test]
    fn parse_insert_arity_mismatch_errors() {
        let sql = "INSERT INTO reservations (date) VALUES ('2026-10-20', 2)";
        assert!(matches!(parse_sql(sql), Err(SqlError::WrongArity(_, 1, 2))));
    }

    #[test]
    fn parse_multi_row_insert_unsupported() {
        let sql = "INSERT INTO reservations (date) VALUES ('2026-10-20'), ('2026-10-25')";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_update() {
        let sql = format!("UPDATE reservations SET date = '2026-10-21', days = 1 WHERE id = '{ID}'");
        match parse_sql(&sql).unwrap() {
            Command::UpdateReservation { id, request: r } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(r, request(Some("2026-10-21"), Some(1)));
            }
            cmd => panic!("expected UpdateReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_without_id_errors() {
        let sql = "UPDATE reservations SET date = '2026-10-21'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("id"))));
    }

    #[test]
    fn parse_delete() {
        let sql = format!("DELETE FROM reservations WHERE id = '{ID}'");
        match parse_sql(&sql).unwrap() {
            Command::DeleteReservation { id } => assert_eq!(id.to_string(), ID),
            cmd => panic!("expected DeleteReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_delete_bad_ulid_errors() {
        let sql = "DELETE FROM reservations WHERE id = 'not-a-ulid'";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_select_reservations() {
        let cmd = parse_sql("SELECT * FROM reservations").unwrap();
        assert_eq!(cmd, Command::SelectReservations { id: None });

        let sql = format!("SELECT * FROM reservations WHERE id = '{ID}'");
        match parse_sql(&sql).unwrap() {
            Command::SelectReservations { id: Some(id) } => assert_eq!(id.to_string(), ID),
            cmd => panic!("expected SelectReservations, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = "INSERT INTO bookings (date) VALUES ('2026-10-20')";
        assert!(matches!(parse_sql(sql), Err(SqlError::UnknownTable(t)) if t == "bookings"));
    }

    #[test]
    fn result_shape_ignores_unbound_params() {
        assert_eq!(
            result_shape("SELECT * FROM availability WHERE date = $1 AND days = $2"),
            ResultShape::Availability
        );
        assert_eq!(
            result_shape("INSERT INTO reservations (date, days) VALUES ($1, $2)"),
            ResultShape::Reservation
        );
        assert_eq!(
            result_shape("UPDATE reservations SET date = $1 WHERE id = $2"),
            ResultShape::Reservation
        );
        assert_eq!(
            result_shape("DELETE FROM reservations WHERE id = $1"),
            ResultShape::NoRows
        );
        assert_eq!(result_shape("not sql"), ResultShape::NoRows);
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
