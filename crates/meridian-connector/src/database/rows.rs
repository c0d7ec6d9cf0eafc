// SPDX-FileCopyrightText: 2026 Meridian Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Row conversion between SQLite and the JSON values connectors pass around.

use async_trait::async_trait;
use meridian_core::{MeridianError, ScriptDatabase, ValueMap};
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::Value;

/// Runs `sql` and returns every row keyed by column name.
pub(crate) fn fetch_rows(conn: &rusqlite::Connection, sql: &str) -> rusqlite::Result<Vec<ValueMap>> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    if columns.is_empty() {
        stmt.raw_execute()?;
        return Ok(Vec::new());
    }
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut map = ValueMap::new();
        for (i, name) in columns.iter().enumerate() {
            map.insert(name.clone(), to_json(row.get_ref(i)?));
        }
        out.push(map);
    }
    Ok(out)
}

/// Runs `sql` once, binding each named parameter (`:name`, `@name`, `$name`)
/// from `params`. Parameters with no matching key bind `NULL`.
pub(crate) fn execute_named(
    conn: &rusqlite::Connection,
    sql: &str,
    params: &ValueMap,
) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare(sql)?;
    for index in 1..=stmt.parameter_count() {
        let value = stmt
            .parameter_name(index)
            .map(|name| name.trim_start_matches([':', '@', '$']))
            .and_then(|key| params.get(key))
            .map(to_sql)
            .unwrap_or(SqlValue::Null);
        stmt.raw_bind_parameter(index, value)?;
    }
    stmt.raw_execute()
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Array(b.iter().map(|byte| Value::from(*byte)).collect()),
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map_or(SqlValue::Null, SqlValue::Real),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Script-facing handle onto the connector's current connection.
#[derive(Clone)]
pub struct ConnectionDatabase {
    conn: tokio_rusqlite::Connection,
}

impl ConnectionDatabase {
    pub fn new(conn: tokio_rusqlite::Connection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl ScriptDatabase for ConnectionDatabase {
    async fn query(&self, sql: &str) -> Result<Vec<ValueMap>, MeridianError> {
        let sql = sql.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<ValueMap>, rusqlite::Error> { fetch_rows(conn, &sql) })
            .await
            .map_err(|e| MeridianError::Storage {
                source: Box::new(e),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outbox() -> rusqlite::Connection {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE outbox (id INTEGER PRIMARY KEY, payload TEXT, score REAL, processed INTEGER DEFAULT 0);
             INSERT INTO outbox (id, payload, score) VALUES (1, 'ADT^A01', 0.5), (2, NULL, 2.0);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn rows_are_keyed_by_column_name() {
        let conn = outbox();
        let rows = fetch_rows(&conn, "SELECT id, payload, score FROM outbox ORDER BY id").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"], json!(1));
        assert_eq!(rows[0]["payload"], json!("ADT^A01"));
        assert_eq!(rows[0]["score"], json!(0.5));
        assert_eq!(rows[1]["payload"], Value::Null);
    }

    #[test]
    fn statements_without_columns_return_no_rows() {
        let conn = outbox();
        let rows = fetch_rows(&conn, "UPDATE outbox SET processed = 1").unwrap();
        assert!(rows.is_empty());
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM outbox WHERE processed = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 2);
    }

    #[test]
    fn named_parameters_bind_from_the_map() {
        let conn = outbox();
        let mut params = ValueMap::new();
        params.insert("id".into(), json!(2));
        let changed =
            execute_named(&conn, "UPDATE outbox SET processed = 1 WHERE id = :id", &params).unwrap();
        assert_eq!(changed, 1);

        let missing = execute_named(&conn, "UPDATE outbox SET processed = 1 WHERE id = :nope", &params)
            .unwrap();
        assert_eq!(missing, 0);
    }
}
