use std::collections::HashMap;

use chrono::{NaiveDate, NaiveTime};
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::Minute;

/// How long a candidate booking is when asking for availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotSize {
    Minutes(Minute),
    Service(Ulid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingFilter {
    Provider { provider_id: Ulid, date: Option<NaiveDate> },
    Client(Ulid),
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertProvider {
        id: Ulid,
        name: Option<String>,
    },
    DeleteProvider {
        id: Ulid,
    },
    SelectProviders,
    SetWorkingDay {
        provider_id: Ulid,
        weekday: u8,
        working: bool,
    },
    SelectTemplate {
        provider_id: Ulid,
    },
    SetDateOverride {
        provider_id: Ulid,
        date: NaiveDate,
        working: bool,
    },
    ClearDateOverride {
        provider_id: Ulid,
        date: NaiveDate,
    },
    ToggleDateOverride {
        provider_id: Ulid,
        date: NaiveDate,
    },
    SelectWorkingDay {
        provider_id: Ulid,
        date: NaiveDate,
    },
    SelectSchedule {
        provider_id: Ulid,
        year: i32,
        month: u32,
    },
    InsertService {
        id: Ulid,
        provider_id: Ulid,
        name: String,
        category: Option<String>,
        duration: Minute,
        price: i64,
    },
    DeleteService {
        id: Ulid,
    },
    SelectServices {
        provider_id: Option<Ulid>,
    },
    InsertClient {
        id: Ulid,
        name: Option<String>,
    },
    DeleteClient {
        id: Ulid,
    },
    SelectAvailability {
        provider_id: Ulid,
        date: NaiveDate,
        size: SlotSize,
    },
    InsertBooking {
        id: Ulid,
        provider_id: Ulid,
        client_id: Ulid,
        service_id: Ulid,
        date: NaiveDate,
        time: NaiveTime,
    },
    DeleteBooking {
        id: Ulid,
    },
    SelectBookings {
        filter: BookingFilter,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn expect_arity(table: &'static str, values: &[Expr], min: usize) -> Result<(), SqlError> {
    if values.len() < min {
        return Err(SqlError::WrongArity(table, min, values.len()));
    }
    Ok(())
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "providers" => {
            expect_arity("providers", &values, 1)?;
            Ok(Command::InsertProvider {
                id: parse_ulid_expr(&values[0])?,
                name: values.get(1).map(parse_string_or_null).transpose()?.flatten(),
            })
        }
        "weekly_template" => {
            expect_arity("weekly_template", &values, 3)?;
            Ok(Command::SetWorkingDay {
                provider_id: parse_ulid_expr(&values[0])?,
                weekday: parse_weekday(&values[1])?,
                working: parse_bool(&values[2])?,
            })
        }
        "date_overrides" => {
            expect_arity("date_overrides", &values, 3)?;
            Ok(Command::SetDateOverride {
                provider_id: parse_ulid_expr(&values[0])?,
                date: parse_date_expr(&values[1])?,
                working: parse_bool(&values[2])?,
            })
        }
        "services" => {
            expect_arity("services", &values, 6)?;
            Ok(Command::InsertService {
                id: parse_ulid_expr(&values[0])?,
                provider_id: parse_ulid_expr(&values[1])?,
                name: parse_string_or_null(&values[2])?.ok_or(SqlError::Parse("service name must not be NULL".into()))?,
                category: parse_string_or_null(&values[3])?,
                duration: parse_minutes(&values[4])?,
                price: parse_i64_expr(&values[5])?,
            })
        }
        "clients" => {
            expect_arity("clients", &values, 1)?;
            Ok(Command::InsertClient {
                id: parse_ulid_expr(&values[0])?,
                name: values.get(1).map(parse_string_or_null).transpose()?.flatten(),
            })
        }
        "bookings" => {
            expect_arity("bookings", &values, 6)?;
            Ok(Command::InsertBooking {
                id: parse_ulid_expr(&values[0])?,
                provider_id: parse_ulid_expr(&values[1])?,
                client_id: parse_ulid_expr(&values[2])?,
                service_id: parse_ulid_expr(&values[3])?,
                date: parse_date_expr(&values[4])?,
                time: parse_time_expr(&values[5])?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = Filters::collect(delete.selection.as_ref())?;

    match table.as_str() {
        "providers" => Ok(Command::DeleteProvider { id: filters.ulid("id")? }),
        "date_overrides" => Ok(Command::ClearDateOverride {
            provider_id: filters.ulid("provider_id")?,
            date: filters.date("date")?,
        }),
        "services" => Ok(Command::DeleteService { id: filters.ulid("id")? }),
        "clients" => Ok(Command::DeleteClient { id: filters.ulid("id")? }),
        "bookings" => Ok(Command::DeleteBooking { id: filters.ulid("id")? }),
        _ => Err(SqlError::UnknownTable(table)),
    }
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
    let filters = Filters::collect(select.selection.as_ref())?;

    match table.as_str() {
        "providers" => Ok(Command::SelectProviders),
        "weekly_template" => Ok(Command::SelectTemplate {
            provider_id: filters.ulid("provider_id")?,
        }),
        "toggle_date_override" => Ok(Command::ToggleDateOverride {
            provider_id: filters.ulid("provider_id")?,
            date: filters.date("date")?,
        }),
        "working_day" => Ok(Command::SelectWorkingDay {
            provider_id: filters.ulid("provider_id")?,
            date: filters.date("date")?,
        }),
        "schedule" => {
            let year = filters.i64("year")?;
            let month = filters.i64("month")?;
            Ok(Command::SelectSchedule {
                provider_id: filters.ulid("provider_id")?,
                year: i32::try_from(year).map_err(|_| SqlError::Parse(format!("year {year} out of range")))?,
                month: u32::try_from(month).map_err(|_| SqlError::Parse(format!("month {month} out of range")))?,
            })
        }
        "services" => Ok(Command::SelectServices {
            provider_id: filters.optional_ulid("provider_id")?,
        }),
        "availability" => {
            let size = match (filters.optional_ulid("service_id")?, filters.get("duration")) {
                (Some(service_id), None) => SlotSize::Service(service_id),
                (None, Some(expr)) => SlotSize::Minutes(parse_minutes(expr)?),
                (Some(_), Some(_)) => {
                    return Err(SqlError::Unsupported("filter by either duration or service_id, not both".into()));
                }
                (None, None) => return Err(SqlError::MissingFilter("duration or service_id")),
            };
            Ok(Command::SelectAvailability {
                provider_id: filters.ulid("provider_id")?,
                date: filters.date("date")?,
                size,
            })
        }
        "bookings" => {
            let filter = match (filters.optional_ulid("provider_id")?, filters.optional_ulid("client_id")?) {
                (Some(provider_id), None) => BookingFilter::Provider {
                    provider_id,
                    date: filters.get("date").map(parse_date_expr).transpose()?,
                },
                (None, Some(client_id)) => BookingFilter::Client(client_id),
                (Some(_), Some(_)) => {
                    return Err(SqlError::Unsupported("filter by either provider_id or client_id, not both".into()));
                }
                (None, None) => return Err(SqlError::MissingFilter("provider_id or client_id")),
            };
            Ok(Command::SelectBookings { filter })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `col = value` terms of a WHERE clause joined with AND.
struct Filters<'a> {
    terms: HashMap<String, &'a Expr>,
}

impl<'a> Filters<'a> {
    fn collect(selection: Option<&'a Expr>) -> Result<Self, SqlError> {
        let mut terms = HashMap::new();
        if let Some(expr) = selection {
            Self::walk(expr, &mut terms)?;
        }
        Ok(Self { terms })
    }

    fn walk(expr: &'a Expr, terms: &mut HashMap<String, &'a Expr>) -> Result<(), SqlError> {
        match expr {
            Expr::BinaryOp {
                left,
                op: ast::BinaryOperator::And,
                right,
            } => {
                Self::walk(left, terms)?;
                Self::walk(right, terms)
            }
            Expr::BinaryOp {
                left,
                op: ast::BinaryOperator::Eq,
                right,
            } => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
                if terms.insert(col.clone(), right.as_ref()).is_some() {
                    return Err(SqlError::Unsupported(format!("duplicate filter on {col}")));
                }
                Ok(())
            }
            Expr::Nested(inner) => Self::walk(inner, terms),
            other => Err(SqlError::Unsupported(format!("filter {other}"))),
        }
    }

    fn get(&self, col: &str) -> Option<&'a Expr> {
        self.terms.get(col).copied()
    }

    fn require(&self, col: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(col).ok_or(SqlError::MissingFilter(col))
    }

    fn ulid(&self, col: &'static str) -> Result<Ulid, SqlError> {
        parse_ulid_expr(self.require(col)?)
    }

    fn optional_ulid(&self, col: &str) -> Result<Option<Ulid>, SqlError> {
        self.get(col).map(parse_ulid_expr).transpose()
    }

    fn date(&self, col: &'static str) -> Result<NaiveDate, SqlError> {
        parse_date_expr(self.require(col)?)
    }

    fn i64(&self, col: &'static str) -> Result<i64, SqlError> {
        parse_i64_expr(self.require(col)?)
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
        TableObject::TableName(name) => object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into())),
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into())),
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

/// Values of a single-row INSERT.
fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert.source.as_ref().ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            rows => Err(SqlError::Unsupported(format!("multi-row INSERT ({} rows)", rows.len()))),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
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

fn parse_string_expr(expr: &Expr) -> Result<&str, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.as_str()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_string_expr(expr).map(|s| Some(s.to_string())),
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string_expr(expr)?;
    Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID {s}: {e}")))
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string_expr(expr)?;
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| SqlError::Parse(format!("bad date {s}: {e}")))
}

/// `HH:MM` or `HH:MM:SS`.
fn parse_time_expr(expr: &Expr) -> Result<NaiveTime, SqlError> {
    let s = parse_string_expr(expr)?;
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|e| SqlError::Parse(format!("bad time {s}: {e}")))
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => {
                s.parse().map_err(|e| SqlError::Parse(format!("bad integer {s}: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected number, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_minutes(expr: &Expr) -> Result<Minute, SqlError> {
    let v = parse_i64_expr(expr)?;
    Minute::try_from(v).map_err(|_| SqlError::Parse(format!("{v} minutes out of range")))
}

fn parse_weekday(expr: &Expr) -> Result<u8, SqlError> {
    let v = parse_i64_expr(expr)?;
    u8::try_from(v).map_err(|_| SqlError::Parse(format!("weekday {v} out of range")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(value) => Err(SqlError::Parse(format!("expected bool, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
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

#[cfg(test)]
mod tests {
    use super::*;

    const P: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const C: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";
    const S: &str = "01BX5ZZKBKACTAV9WEVGEMMVS0";

    fn ulid(s: &str) -> Ulid {
        Ulid::from_string(s).unwrap()
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn parse_insert_provider() {
        let cmd = parse_sql(&format!("INSERT INTO providers (id, name) VALUES ('{P}', 'Anna')")).unwrap();
        assert_eq!(
            cmd,
            Command::InsertProvider {
                id: ulid(P),
                name: Some("Anna".into())
            }
        );

        let cmd = parse_sql(&format!("INSERT INTO providers (id) VALUES ('{P}')")).unwrap();
        assert_eq!(cmd, Command::InsertProvider { id: ulid(P), name: None });
    }

    #[test]
    fn parse_template_and_overrides() {
        let cmd = parse_sql(&format!("INSERT INTO weekly_template (provider_id, weekday, is_working) VALUES ('{P}', 5, true)")).unwrap();
        assert_eq!(
            cmd,
            Command::SetWorkingDay {
                provider_id: ulid(P),
                weekday: 5,
                working: true
            }
        );

        let cmd = parse_sql(&format!(
            "INSERT INTO date_overrides (provider_id, date, is_working) VALUES ('{P}', '2024-03-08', false)"
        ))
        .unwrap();
        assert_eq!(
            cmd,
            Command::SetDateOverride {
                provider_id: ulid(P),
                date: d(2024, 3, 8),
                working: false
            }
        );

        let cmd = parse_sql(&format!("DELETE FROM date_overrides WHERE provider_id = '{P}' AND date = '2024-03-08'")).unwrap();
        assert_eq!(
            cmd,
            Command::ClearDateOverride {
                provider_id: ulid(P),
                date: d(2024, 3, 8)
            }
        );

        assert!(parse_sql(&format!("INSERT INTO weekly_template VALUES ('{P}', 300, true)")).is_err());
    }

    #[test]
    fn parse_toggle_and_working_day() {
        let cmd = parse_sql(&format!("SELECT * FROM toggle_date_override WHERE provider_id = '{P}' AND date = '2024-01-06'")).unwrap();
        assert_eq!(
            cmd,
            Command::ToggleDateOverride {
                provider_id: ulid(P),
                date: d(2024, 1, 6)
            }
        );

        // Filter order does not matter.
        let cmd = parse_sql(&format!("SELECT * FROM working_day WHERE date = '2024-01-06' AND provider_id = '{P}'")).unwrap();
        assert_eq!(
            cmd,
            Command::SelectWorkingDay {
                provider_id: ulid(P),
                date: d(2024, 1, 6)
            }
        );
    }

    #[test]
    fn parse_schedule() {
        let cmd = parse_sql(&format!("SELECT * FROM schedule WHERE provider_id = '{P}' AND year = 2024 AND month = 2")).unwrap();
        assert_eq!(
            cmd,
            Command::SelectSchedule {
                provider_id: ulid(P),
                year: 2024,
                month: 2
            }
        );
        assert!(matches!(
            parse_sql(&format!("SELECT * FROM schedule WHERE provider_id = '{P}' AND year = 2024")),
            Err(SqlError::MissingFilter("month"))
        ));
    }

    #[test]
    fn parse_services() {
        let cmd = parse_sql(&format!(
            "INSERT INTO services (id, provider_id, name, category, duration, price) VALUES ('{S}', '{P}', 'Trim', NULL, 30, 1500)"
        ))
        .unwrap();
        assert_eq!(
            cmd,
            Command::InsertService {
                id: ulid(S),
                provider_id: ulid(P),
                name: "Trim".into(),
                category: None,
                duration: 30,
                price: 1500
            }
        );

        assert_eq!(parse_sql("SELECT * FROM services").unwrap(), Command::SelectServices { provider_id: None });
        assert_eq!(
            parse_sql(&format!("SELECT * FROM services WHERE provider_id = '{P}'")).unwrap(),
            Command::SelectServices { provider_id: Some(ulid(P)) }
        );
        assert_eq!(
            parse_sql(&format!("DELETE FROM services WHERE id = '{S}'")).unwrap(),
            Command::DeleteService { id: ulid(S) }
        );
    }

    #[test]
    fn parse_availability_by_duration_or_service() {
        let cmd = parse_sql(&format!(
            "SELECT * FROM availability WHERE provider_id = '{P}' AND date = '2024-01-08' AND duration = 45"
        ))
        .unwrap();
        assert_eq!(
            cmd,
            Command::SelectAvailability {
                provider_id: ulid(P),
                date: d(2024, 1, 8),
                size: SlotSize::Minutes(45)
            }
        );

        let cmd = parse_sql(&format!(
            "SELECT * FROM availability WHERE provider_id = '{P}' AND date = '2024-01-08' AND service_id = '{S}'"
        ))
        .unwrap();
        assert!(matches!(
            cmd,
            Command::SelectAvailability {
                size: SlotSize::Service(_),
                ..
            }
        ));

        assert!(matches!(
            parse_sql(&format!("SELECT * FROM availability WHERE provider_id = '{P}' AND date = '2024-01-08'")),
            Err(SqlError::MissingFilter(_))
        ));
    }

    #[test]
    fn parse_insert_booking() {
        let cmd = parse_sql(&format!(
            "INSERT INTO bookings (id, provider_id, client_id, service_id, date, time) VALUES ('{S}', '{P}', '{C}', '{S}', '2024-01-08', '10:30')"
        ))
        .unwrap();
        assert_eq!(
            cmd,
            Command::InsertBooking {
                id: ulid(S),
                provider_id: ulid(P),
                client_id: ulid(C),
                service_id: ulid(S),
                date: d(2024, 1, 8),
                time: NaiveTime::from_hms_opt(10, 30, 0).unwrap()
            }
        );
    }

    #[test]
    fn parse_select_bookings() {
        assert_eq!(
            parse_sql(&format!("SELECT * FROM bookings WHERE provider_id = '{P}'")).unwrap(),
            Command::SelectBookings {
                filter: BookingFilter::Provider {
                    provider_id: ulid(P),
                    date: None
                }
            }
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM bookings WHERE provider_id = '{P}' AND date = '2024-01-08'")).unwrap(),
            Command::SelectBookings {
                filter: BookingFilter::Provider {
                    provider_id: ulid(P),
                    date: Some(d(2024, 1, 8))
                }
            }
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM bookings WHERE client_id = '{C}'")).unwrap(),
            Command::SelectBookings {
                filter: BookingFilter::Client(ulid(C))
            }
        );
        assert!(parse_sql("SELECT * FROM bookings").is_err());
    }

    #[test]
    fn parse_deletes() {
        assert_eq!(
            parse_sql(&format!("DELETE FROM bookings WHERE id = '{S}'")).unwrap(),
            Command::DeleteBooking { id: ulid(S) }
        );
        assert_eq!(
            parse_sql(&format!("DELETE FROM clients WHERE id = '{C}'")).unwrap(),
            Command::DeleteClient { id: ulid(C) }
        );
        assert_eq!(
            parse_sql(&format!("DELETE FROM providers WHERE id = '{P}'")).unwrap(),
            Command::DeleteProvider { id: ulid(P) }
        );
        assert!(matches!(parse_sql("DELETE FROM clients"), Err(SqlError::MissingFilter("id"))));
    }

    #[test]
    fn rejects_unsupported_filters() {
        assert!(matches!(
            parse_sql(&format!("SELECT * FROM bookings WHERE provider_id = '{P}' OR client_id = '{C}'")),
            Err(SqlError::Unsupported(_))
        ));
        assert!(matches!(
            parse_sql(&format!("SELECT * FROM working_day WHERE provider_id = '{P}' AND date > '2024-01-01'")),
            Err(SqlError::Unsupported(_))
        ));
    }

    #[test]
    fn rejects_bad_literals() {
        assert!(parse_sql("INSERT INTO providers (id) VALUES ('not-a-ulid')").is_err());
        assert!(parse_sql(&format!("SELECT * FROM working_day WHERE provider_id = '{P}' AND date = '2024-02-30'")).is_err());
        assert!(parse_sql(&format!(
            "INSERT INTO bookings VALUES ('{S}', '{P}', '{C}', '{S}', '2024-01-08', '25:00')"
        ))
        .is_err());
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO foobar (id) VALUES ('{P}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_multi_row_insert_unsupported() {
        let sql = format!("INSERT INTO clients (id) VALUES ('{C}'), ('{P}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
