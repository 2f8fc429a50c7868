use chrono::NaiveDate;
use sqlx::mysql::MySqlArguments;
use sqlx::query::QueryAs;
use sqlx::{MySql, MySqlPool};
use tracing::warn;

/// SQL bindable value
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    String(String),
    U64(u64),
    Date(NaiveDate),
}

#[derive(Debug)]
pub struct SqlUpdate {
    pub sql: String,
    pub values: Vec<SqlValue>,
}

/// Collects `column = ?` assignments for a partial update.
///
/// Column names come from code, never from the request body.
#[derive(Debug, Default)]
pub struct UpdateBuilder {
    columns: Vec<&'static str>,
    values: Vec<SqlValue>,
}

impl UpdateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, column: &'static str, value: SqlValue) -> &mut Self {
        self.columns.push(column);
        self.values.push(value);
        self
    }

    /// Sets the column only when the value is present and not blank.
    pub fn set_text(&mut self, column: &'static str, value: Option<&str>) -> &mut Self {
        if let Some(v) = value.map(str::trim).filter(|v| !v.is_empty()) {
            self.set(column, SqlValue::String(v.to_string()));
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// `None` when nothing was set.
    pub fn build(self, table: &str, where_clause: &str, where_values: Vec<SqlValue>) -> Option<SqlUpdate> {
        if self.columns.is_empty() {
            return None;
        }

        let set_clause = self
            .columns
            .iter()
            .map(|c| format!("{c} = ?"))
            .collect::<Vec<_>>()
            .join(", ");

        let mut values = self.values;
        values.extend(where_values);

        Some(SqlUpdate {
            sql: format!("UPDATE {table} SET {set_clause} WHERE {where_clause}"),
            values,
        })
    }
}

pub async fn execute_update(pool: &MySqlPool, update: SqlUpdate) -> Result<u64, sqlx::Error> {
    let mut query = sqlx::query(&update.sql);

    for value in update.values {
        query = match value {
            SqlValue::String(v) => query.bind(v),
            SqlValue::U64(v) => query.bind(v),
            SqlValue::Date(v) => query.bind(v),
        };
    }

    let result = query.execute(pool).await?;
    Ok(result.rows_affected())
}

/// Binds filter values collected alongside a dynamic WHERE clause.
pub fn bind_values<'q, O>(
    mut query: QueryAs<'q, MySql, O, MySqlArguments>,
    values: Vec<SqlValue>,
) -> QueryAs<'q, MySql, O, MySqlArguments> {
    for value in values {
        query = match value {
            SqlValue::String(v) => query.bind(v),
            SqlValue::U64(v) => query.bind(v),
            SqlValue::Date(v) => query.bind(v),
        };
    }
    query
}

/// Passes rows through, turning a column that fails to decode into `None`
/// so one corrupt row does not end a streaming scan.
pub fn skip_undecodable<T>(row: Result<T, sqlx::Error>) -> Result<Option<T>, sqlx::Error> {
    match row {
        Ok(row) => Ok(Some(row)),
        Err(sqlx::Error::ColumnDecode { index, source }) => {
            warn!(column = %index, error = %source, "Skipping unreadable row");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
