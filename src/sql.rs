use chrono::NaiveDate;
use sqlparser::ast::{
    self, Expr, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::{BookingFilter, BookingRequest};
use crate::model::*;

/// Parsed command from SQL input. The acting user is never part of the SQL —
/// it comes from the connection's `user` parameter.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertHall {
        id: Ulid,
        name: String,
        block: Block,
        hall_type: HallType,
        capacity: u32,
        equipment: Equipment,
    },
    UpdateHallStatus {
        id: Ulid,
        blocked: bool,
        under_maintenance: bool,
        note: Option<String>,
    },
    InsertProfile {
        id: Ulid,
        username: String,
        display_name: String,
        email: Option<String>,
        role: Role,
        department: Option<Department>,
    },
    InsertBooking {
        request: BookingRequest,
    },
    ApproveBooking {
        id: Ulid,
    },
    RejectBooking {
        id: Ulid,
        reason: String,
    },
    SwitchHall {
        id: Ulid,
        hall_id: Ulid,
        reason: Option<String>,
    },
    MarkNotificationRead {
        id: Ulid,
    },
    SelectHalls,
    SelectBookings {
        filter: BookingFilter,
    },
    SelectApprovals {
        booking_id: Ulid,
    },
    SelectNotifications,
    SelectAvailability {
        hall_id: Ulid,
        event_date: NaiveDate,
        start: Minute,
        end: Minute,
        exclude_booking: Option<Ulid>,
    },
    Listen {
        channel: String,
    },
    /// `None` means `UNLISTEN *`.
    Unlisten {
        channel: Option<String>,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    let upper = trimmed.to_uppercase();
    if upper.starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches(';').to_string();
        return Ok(Command::Listen { channel });
    }
    if upper.starts_with("UNLISTEN") {
        let rest = trimmed[8..].trim().trim_matches(';').trim();
        let channel = match rest {
            "" | "*" => None,
            c => Some(c.to_string()),
        };
        return Ok(Command::Unlisten { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        // (id, name, block, hall_type, capacity[, has_ac, has_mic, has_projector, has_audio])
        "halls" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("halls", 5, values.len()));
            }
            let equipment = Equipment {
                ac: values.get(5).map(parse_bool).transpose()?.unwrap_or(false),
                mic: values.get(6).map(parse_bool).transpose()?.unwrap_or(false),
                projector: values.get(7).map(parse_bool).transpose()?.unwrap_or(false),
                audio: values.get(8).map(parse_bool).transpose()?.unwrap_or(false),
            };
            Ok(Command::InsertHall {
                id: parse_ulid(&values[0])?,
                name: parse_string(&values[1])?,
                block: parse_enum(&values[2])?,
                hall_type: parse_enum(&values[3])?,
                capacity: parse_u32(&values[4])?,
                equipment,
            })
        }
        // (id, username, name, email, role, department)
        "profiles" => {
            if values.len() < 6 {
                return Err(SqlError::WrongArity("profiles", 6, values.len()));
            }
            Ok(Command::InsertProfile {
                id: parse_ulid(&values[0])?,
                username: parse_string(&values[1])?,
                display_name: parse_string(&values[2])?,
                email: parse_string_or_null(&values[3])?,
                role: parse_enum(&values[4])?,
                department: parse_enum_or_null(&values[5])?,
            })
        }
        // (id, hall_id, organizer, department, institution, event_name,
        //  event_description, event_date, start_time, end_time, attendees
        //  [, needs_ac, needs_mic, needs_projector, needs_audio])
        "bookings" => {
            if values.len() < 11 {
                return Err(SqlError::WrongArity("bookings", 11, values.len()));
            }
            let start = parse_time(&values[8])?;
            let end = parse_time(&values[9])?;
            let equipment = Equipment {
                ac: values.get(11).map(parse_bool).transpose()?.unwrap_or(false),
                mic: values.get(12).map(parse_bool).transpose()?.unwrap_or(false),
                projector: values.get(13).map(parse_bool).transpose()?.unwrap_or(false),
                audio: values.get(14).map(parse_bool).transpose()?.unwrap_or(false),
            };
            Ok(Command::InsertBooking {
                request: BookingRequest {
                    id: parse_ulid(&values[0])?,
                    hall_id: parse_ulid(&values[1])?,
                    organizer: parse_string(&values[2])?,
                    department: parse_enum(&values[3])?,
                    institution: parse_enum(&values[4])?,
                    event_name: parse_string(&values[5])?,
                    event_description: parse_string_or_null(&values[6])?.unwrap_or_default(),
                    event_date: parse_date(&values[7])?,
                    slot: Slot { start, end },
                    attendees: parse_u32(&values[10])?,
                    equipment,
                },
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let id = extract_where_id(selection)?;

    let mut set: Vec<(String, &Expr)> = Vec::with_capacity(assignments.len());
    for a in assignments {
        let col = assignment_column(a)
            .ok_or_else(|| SqlError::Parse("unsupported assignment target".into()))?;
        set.push((col, &a.value));
    }
    let lookup = |col: &str| set.iter().find(|(c, _)| c == col).map(|(_, e)| *e);

    match table.as_str() {
        "halls" => Ok(Command::UpdateHallStatus {
            id,
            blocked: lookup("is_blocked")
                .map(parse_bool)
                .transpose()?
                .unwrap_or(false),
            under_maintenance: lookup("is_under_maintenance")
                .map(parse_bool)
                .transpose()?
                .unwrap_or(false),
            note: lookup("status_note")
                .map(parse_string_or_null)
                .transpose()?
                .flatten(),
        }),
        "bookings" => {
            if let Some(expr) = lookup("hall_id") {
                let hall_id = parse_ulid(expr)?;
                let reason = lookup("reason")
                    .map(parse_string_or_null)
                    .transpose()?
                    .flatten();
                return Ok(Command::SwitchHall { id, hall_id, reason });
            }
            let status_expr = lookup("status").ok_or(SqlError::MissingFilter("status"))?;
            let status: BookingStatus = parse_enum(status_expr)?;
            match status {
                BookingStatus::Approved => Ok(Command::ApproveBooking { id }),
                BookingStatus::Rejected => {
                    let reason = lookup("reason")
                        .map(parse_string_or_null)
                        .transpose()?
                        .flatten()
                        .unwrap_or_default();
                    Ok(Command::RejectBooking { id, reason })
                }
                other => Err(SqlError::Unsupported(format!(
                    "cannot set booking status to {other} directly"
                ))),
            }
        }
        "notifications" => {
            let read = lookup("is_read")
                .map(parse_bool)
                .transpose()?
                .unwrap_or(false);
            if !read {
                return Err(SqlError::Unsupported(
                    "notifications can only be marked read".into(),
                ));
            }
            Ok(Command::MarkNotificationRead { id })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    match table.as_str() {
        "halls" => Ok(Command::SelectHalls),
        "notifications" => Ok(Command::SelectNotifications),
        "approvals" => {
            let mut booking_id = None;
            if let Some(selection) = &select.selection {
                extract_eq_filters(selection, &mut |col, expr| {
                    if col == "booking_id" {
                        booking_id = Some(parse_ulid(expr)?);
                    }
                    Ok(())
                })?;
            }
            Ok(Command::SelectApprovals {
                booking_id: booking_id.ok_or(SqlError::MissingFilter("booking_id"))?,
            })
        }
        "bookings" => {
            let mut filter = BookingFilter::default();
            if let Some(selection) = &select.selection {
                extract_eq_filters(selection, &mut |col, expr| {
                    match col {
                        "faculty_id" => filter.faculty = Some(parse_ulid(expr)?),
                        "status" => filter.status = Some(parse_enum(expr)?),
                        "department" => filter.department = Some(parse_enum(expr)?),
                        "hall_id" => filter.hall = Some(parse_ulid(expr)?),
                        "event_date" => filter.event_date = Some(parse_date(expr)?),
                        _ => {}
                    }
                    Ok(())
                })?;
            }
            Ok(Command::SelectBookings { filter })
        }
        "availability" => {
            let (mut hall_id, mut event_date, mut start, mut end, mut exclude) =
                (None, None, None, None, None);
            if let Some(selection) = &select.selection {
                extract_eq_filters(selection, &mut |col, expr| {
                    match col {
                        "hall_id" => hall_id = Some(parse_ulid(expr)?),
                        "event_date" => event_date = Some(parse_date(expr)?),
                        "start_time" => start = Some(parse_time(expr)?),
                        "end_time" => end = Some(parse_time(expr)?),
                        "exclude_booking" => exclude = Some(parse_ulid(expr)?),
                        _ => {}
                    }
                    Ok(())
                })?;
            }
            Ok(Command::SelectAvailability {
                hall_id: hall_id.ok_or(SqlError::MissingFilter("hall_id"))?,
                event_date: event_date.ok_or(SqlError::MissingFilter("event_date"))?,
                start: start.ok_or(SqlError::MissingFilter("start_time"))?,
                end: end.ok_or(SqlError::MissingFilter("end_time"))?,
                exclude_booking: exclude,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Walk an AND-combined WHERE clause invoking the callback for each
/// `column = value` leaf.
fn extract_eq_filters(
    expr: &Expr,
    on_eq: &mut dyn FnMut(&str, &Expr) -> Result<(), SqlError>,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_eq_filters(left, on_eq)?;
                extract_eq_filters(right, on_eq)?;
            }
            ast::BinaryOperator::Eq => {
                if let Some(col) = expr_column_name(left) {
                    on_eq(&col, right)?;
                }
            }
            _ => {}
        }
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

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn assignment_column(a: &ast::Assignment) -> Option<String> {
    match &a.target {
        ast::AssignmentTarget::ColumnName(name) => object_name_last(name),
        _ => None,
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            if values.rows.len() > 1 {
                return Err(SqlError::Unsupported("multi-row INSERT".into()));
            }
            Ok(values.rows[0].clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
    }
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

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    parse_string(expr).map(Some)
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

fn parse_time(expr: &Expr) -> Result<Minute, SqlError> {
    let s = parse_string(expr)?;
    minute_from_hhmm(&s).ok_or_else(|| SqlError::Parse(format!("bad time {s:?} (want HH:MM)")))
}

/// Parse any of the wire-spelling enums (department, role, status, …).
fn parse_enum<T: std::str::FromStr<Err = String>>(expr: &Expr) -> Result<T, SqlError> {
    parse_string(expr)?.parse().map_err(SqlError::Parse)
}

fn parse_enum_or_null<T: std::str::FromStr<Err = String>>(
    expr: &Expr,
) -> Result<Option<T>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    parse_enum(expr).map(Some)
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
