use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::{AssignmentPatch, RoomPatch};
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug)]
pub enum Command {
    InsertHotel {
        id: Ulid,
        event_id: Ulid,
        name: String,
        address: Option<String>,
    },
    UpdateHotel {
        id: Ulid,
        name: Option<String>,
        address: Option<Option<String>>,
    },
    DeleteHotel {
        id: Ulid,
    },
    InsertRoom {
        id: Ulid,
        hotel_id: Ulid,
        number: String,
        room_type: RoomType,
        capacity: u32,
        default_bed_type: Option<BedType>,
        notes: Option<String>,
        status: RoomStatus,
    },
    UpdateRoom {
        id: Ulid,
        patch: RoomPatch,
    },
    InsertAssignment {
        id: Ulid,
        hotel_id: Ulid,
        participant_id: Ulid,
        room_id: Option<Ulid>,
        bed_id: Option<Ulid>,
        event_id: Option<Ulid>,
        preferred_bed_type: Option<BedType>,
        check_in: Option<Ms>,
        check_out: Option<Ms>,
        status: AssignmentStatus,
    },
    UpdateAssignment {
        id: Ulid,
        patch: AssignmentPatch,
    },
    DeleteAssignment {
        id: Ulid,
    },
    SelectHotels {
        id: Option<Ulid>,
    },
    SelectRooms {
        hotel_id: Ulid,
    },
    SelectBeds {
        hotel_id: Ulid,
        room_id: Option<Ulid>,
    },
    SelectAssignments {
        hotel_id: Ulid,
    },
    SelectOccupancy {
        hotel_id: Ulid,
        event_id: Option<Ulid>,
    },
    Listen {
        channel: String,
    },
    Unlisten {
        channel: String,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    let upper = trimmed.to_uppercase();
    if upper.starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches(';').to_string();
        return Ok(Command::Listen { channel });
    }
    if upper.starts_with("UNLISTEN ") {
        let channel = trimmed[9..].trim().trim_matches(';').to_string();
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
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// One named value from an INSERT column list or an UPDATE SET list.
type NamedExprs<'a> = Vec<(String, &'a Expr)>;

fn get<'a>(values: &NamedExprs<'a>, col: &str) -> Option<&'a Expr> {
    values.iter().find(|(c, _)| c == col).map(|(_, e)| *e)
}

fn require<'a>(values: &NamedExprs<'a>, col: &'static str) -> Result<&'a Expr, SqlError> {
    get(values, col).ok_or(SqlError::MissingColumn(col))
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_named_insert_values(insert)?;

    match table.as_str() {
        "hotels" => Ok(Command::InsertHotel {
            id: parse_ulid(require(&values, "id")?)?,
            event_id: parse_ulid(require(&values, "event_id")?)?,
            name: parse_string(require(&values, "name")?)?,
            address: match get(&values, "address") {
                Some(e) => parse_string_or_null(e)?,
                None => None,
            },
        }),
        "rooms" => Ok(Command::InsertRoom {
            id: parse_ulid(require(&values, "id")?)?,
            hotel_id: parse_ulid(require(&values, "hotel_id")?)?,
            number: parse_string(require(&values, "number")?)?,
            room_type: parse_room_type(require(&values, "room_type")?)?,
            capacity: parse_u32(require(&values, "capacity")?)?,
            default_bed_type: match get(&values, "default_bed_type") {
                Some(e) => parse_bed_type_or_null(e)?,
                None => None,
            },
            notes: match get(&values, "notes") {
                Some(e) => parse_string_or_null(e)?,
                None => None,
            },
            status: match get(&values, "status") {
                Some(e) => parse_room_status(e)?,
                None => RoomStatus::Available,
            },
        }),
        "assignments" => Ok(Command::InsertAssignment {
            id: parse_ulid(require(&values, "id")?)?,
            hotel_id: parse_ulid(require(&values, "hotel_id")?)?,
            participant_id: parse_ulid(require(&values, "participant_id")?)?,
            room_id: match get(&values, "room_id") {
                Some(e) => parse_ulid_or_null(e)?,
                None => None,
            },
            bed_id: match get(&values, "bed_id") {
                Some(e) => parse_ulid_or_null(e)?,
                None => None,
            },
            event_id: match get(&values, "event_id") {
                Some(e) => parse_ulid_or_null(e)?,
                None => None,
            },
            preferred_bed_type: match get(&values, "preferred_bed_type") {
                Some(e) => parse_bed_type_or_null(e)?,
                None => None,
            },
            check_in: match get(&values, "check_in") {
                Some(e) => parse_i64_or_null(e)?,
                None => None,
            },
            check_out: match get(&values, "check_out") {
                Some(e) => parse_i64_or_null(e)?,
                None => None,
            },
            status: match get(&values, "status") {
                Some(e) => parse_assignment_status(e)?,
                None => AssignmentStatus::Scheduled,
            },
        }),
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

    let mut values: NamedExprs = Vec::with_capacity(assignments.len());
    for a in assignments {
        let col = match &a.target {
            ast::AssignmentTarget::ColumnName(name) => object_name_last(name)
                .ok_or_else(|| SqlError::Parse("empty column name in SET".into()))?,
            other => return Err(SqlError::Parse(format!("unsupported SET target: {other}"))),
        };
        values.push((col, &a.value));
    }

    match table.as_str() {
        "hotels" => Ok(Command::UpdateHotel {
            id,
            name: match get(&values, "name") {
                Some(e) => Some(parse_string(e)?),
                None => None,
            },
            address: match get(&values, "address") {
                Some(e) => Some(parse_string_or_null(e)?),
                None => None,
            },
        }),
        "rooms" => {
            let patch = RoomPatch {
                number: match get(&values, "number") {
                    Some(e) => Some(parse_string(e)?),
                    None => None,
                },
                room_type: match get(&values, "room_type") {
                    Some(e) => Some(parse_room_type(e)?),
                    None => None,
                },
                capacity: match get(&values, "capacity") {
                    Some(e) => Some(parse_u32(e)?),
                    None => None,
                },
                default_bed_type: match get(&values, "default_bed_type") {
                    Some(e) => Some(parse_bed_type_or_null(e)?),
                    None => None,
                },
                notes: match get(&values, "notes") {
                    Some(e) => Some(parse_string_or_null(e)?),
                    None => None,
                },
                status: match get(&values, "status") {
                    Some(e) => Some(parse_room_status(e)?),
                    None => None,
                },
            };
            Ok(Command::UpdateRoom { id, patch })
        }
        "assignments" => {
            let patch = AssignmentPatch {
                participant_id: match get(&values, "participant_id") {
                    Some(e) => Some(parse_ulid(e)?),
                    None => None,
                },
                room_id: match get(&values, "room_id") {
                    Some(e) => Some(parse_ulid_or_null(e)?),
                    None => None,
                },
                bed_id: match get(&values, "bed_id") {
                    Some(e) => Some(parse_ulid_or_null(e)?),
                    None => None,
                },
                event_id: match get(&values, "event_id") {
                    Some(e) => Some(parse_ulid_or_null(e)?),
                    None => None,
                },
                preferred_bed_type: match get(&values, "preferred_bed_type") {
                    Some(e) => Some(parse_bed_type_or_null(e)?),
                    None => None,
                },
                check_in: match get(&values, "check_in") {
                    Some(e) => Some(parse_i64_or_null(e)?),
                    None => None,
                },
                check_out: match get(&values, "check_out") {
                    Some(e) => Some(parse_i64_or_null(e)?),
                    None => None,
                },
                status: match get(&values, "status") {
                    Some(e) => Some(parse_assignment_status(e)?),
                    None => None,
                },
            };
            Ok(Command::UpdateAssignment { id, patch })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "hotels" => Ok(Command::DeleteHotel { id }),
        "assignments" => Ok(Command::DeleteAssignment { id }),
        // rooms and beds are not deletable through this surface
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

    let mut filters: Vec<(String, &Expr)> = Vec::new();
    if let Some(selection) = &select.selection {
        extract_eq_filters(selection, &mut filters)?;
    }
    let filter = |col: &str| filters.iter().find(|(c, _)| c == col).map(|(_, e)| *e);
    let require_ulid = |col: &'static str| -> Result<Ulid, SqlError> {
        parse_ulid(filter(col).ok_or(SqlError::MissingFilter(col))?)
    };

    match table.as_str() {
        "hotels" => Ok(Command::SelectHotels {
            id: match filter("id") {
                Some(e) => Some(parse_ulid(e)?),
                None => None,
            },
        }),
        "rooms" => Ok(Command::SelectRooms {
            hotel_id: require_ulid("hotel_id")?,
        }),
        "beds" => Ok(Command::SelectBeds {
            hotel_id: require_ulid("hotel_id")?,
            room_id: match filter("room_id") {
                Some(e) => Some(parse_ulid(e)?),
                None => None,
            },
        }),
        "assignments" => Ok(Command::SelectAssignments {
            hotel_id: require_ulid("hotel_id")?,
        }),
        "occupancy" => Ok(Command::SelectOccupancy {
            hotel_id: require_ulid("hotel_id")?,
            event_id: match filter("event_id") {
                Some(e) => Some(parse_ulid(e)?),
                None => None,
            },
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Collect `col = value` terms from an AND tree. Anything else is rejected —
/// this surface has no general predicate evaluation.
fn extract_eq_filters<'a>(
    expr: &'a Expr,
    filters: &mut Vec<(String, &'a Expr)>,
) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            extract_eq_filters(left, filters)?;
            extract_eq_filters(right, filters)?;
            Ok(())
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Parse(format!("bad filter column: {left}")))?;
            filters.push((col, right));
            Ok(())
        }
        Expr::Nested(inner) => extract_eq_filters(inner, filters),
        other => Err(SqlError::Unsupported(format!("filter: {other}"))),
    }
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
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
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

/// Zip the INSERT column list with the first VALUES row. A column list is
/// required — positional inserts are ambiguous with this many nullable
/// columns.
fn extract_named_insert_values(insert: &ast::Insert) -> Result<NamedExprs<'_>, SqlError> {
    if insert.columns.is_empty() {
        return Err(SqlError::Parse("INSERT requires a column list".into()));
    }
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    let row = match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            &values.rows[0]
        }
        _ => return Err(SqlError::Parse("expected VALUES".into())),
    };
    if row.len() != insert.columns.len() {
        return Err(SqlError::WrongArity(
            "VALUES",
            insert.columns.len(),
            row.len(),
        ));
    }
    Ok(insert
        .columns
        .iter()
        .map(|c| c.value.to_lowercase())
        .zip(row.iter())
        .collect())
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

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    parse_ulid(expr).map(Some)
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

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    parse_i64_expr(expr).map(Some)
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_room_type(expr: &Expr) -> Result<RoomType, SqlError> {
    let s = parse_string(expr)?;
    RoomType::parse(&s).ok_or(SqlError::BadEnum("room_type", s))
}

fn parse_bed_type_or_null(expr: &Expr) -> Result<Option<BedType>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    let s = parse_string(expr)?;
    BedType::parse(&s)
        .map(Some)
        .ok_or(SqlError::BadEnum("bed_type", s))
}

fn parse_room_status(expr: &Expr) -> Result<RoomStatus, SqlError> {
    let s = parse_string(expr)?;
    RoomStatus::parse(&s).ok_or(SqlError::BadEnum("status", s))
}

fn parse_assignment_status(expr: &Expr) -> Result<AssignmentStatus, SqlError> {
    let s = parse_string(expr)?;
    AssignmentStatus::parse(&s).ok_or(SqlError::BadEnum("status", s))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str),
    MissingFilter(&'static str),
    BadEnum(&'static str, String),
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
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::BadEnum(col, v) => write!(f, "bad value for {col}: {v}"),
        }
    }
}

impl std::error::Error for SqlError {}
