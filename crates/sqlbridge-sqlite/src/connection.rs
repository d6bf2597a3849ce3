//! Connection wrapper executing compiled statements on the native handle.

use crate::codec;
use crate::config::ErrorHook;
use crate::native::NativeDatabase;
use asupersync::{Cx, Outcome};
use sqlbridge_core::{CompiledQuery, DatabaseConnection, Error, QueryResult};
use std::borrow::Cow;
use std::fmt;

/// Append `STRICT` to a `CREATE TABLE` statement that lacks it.
///
/// Only statements whose trimmed text starts with `CREATE TABLE` and ends
/// with `)` are rewritten; everything else is returned as is.
pub fn append_strict_mode(sql: &str) -> Cow<'_, str> {
    let upper = sql.trim().to_uppercase();
    if !upper.starts_with("CREATE TABLE") || upper.contains(" STRICT") {
        return Cow::Borrowed(sql);
    }
    let trimmed = sql.trim_end();
    if trimmed.ends_with(')') {
        Cow::Owned(format!("{} STRICT", trimmed))
    } else {
        Cow::Borrowed(sql)
    }
}

/// A connection over one [`NativeDatabase`].
#[derive(Clone)]
pub struct OpSqliteConnection {
    db: NativeDatabase,
    auto_affinity_conversion: bool,
    disable_strict_mode_create_table: bool,
    debug: bool,
    on_error: Option<ErrorHook>,
}

impl fmt::Debug for OpSqliteConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpSqliteConnection")
            .field("db", &self.db)
            .field("auto_affinity_conversion", &self.auto_affinity_conversion)
            .field("disable_strict_mode_create_table", &self.disable_strict_mode_create_table)
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}

impl OpSqliteConnection {
    pub fn new(db: NativeDatabase) -> Self {
        Self {
            db,
            auto_affinity_conversion: false,
            disable_strict_mode_create_table: false,
            debug: false,
            on_error: None,
        }
    }

    pub fn auto_affinity_conversion(mut self, enable: bool) -> Self {
        self.auto_affinity_conversion = enable;
        self
    }

    pub fn disable_strict_mode_create_table(mut self, disable: bool) -> Self {
        self.disable_strict_mode_create_table = disable;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn on_error(mut self, hook: Option<ErrorHook>) -> Self {
        self.on_error = hook;
        self
    }

    /// The underlying native handle.
    pub fn database(&self) -> &NativeDatabase {
        &self.db
    }

    /// Execute a compiled statement synchronously.
    pub fn execute_sync(&self, query: &CompiledQuery) -> Result<QueryResult, Error> {
        let params = codec::serialize_params(&query.parameters);
        let sql = if self.disable_strict_mode_create_table {
            Cow::Borrowed(query.sql.as_str())
        } else {
            append_strict_mode(&query.sql)
        };

        if self.debug {
            tracing::debug!(target: "sqlbridge::sqlite", sql = %sql, params = ?params, "executing query");
        }

        match self.db.execute(&sql, &params) {
            Ok(result) => Ok(QueryResult {
                rows: codec::deserialize_rows(
                    result.columns,
                    result.rows,
                    self.auto_affinity_conversion,
                ),
                num_affected_rows: result.rows_affected,
                insert_id: result.insert_id,
            }),
            Err(e) => {
                tracing::warn!(target: "sqlbridge::sqlite", error = %e, sql = %sql, "query failed");
                if let Some(hook) = &self.on_error {
                    hook(&format!("Query failed: {}", sql), &e);
                }
                Err(e)
            }
        }
    }
}

impl DatabaseConnection for OpSqliteConnection {
    fn execute_query(
        &self,
        _cx: &Cx,
        query: &CompiledQuery,
    ) -> impl Future<Output = Outcome<QueryResult, Error>> + Send {
        let result = self.execute_sync(query);
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn stream_query(
        &self,
        _cx: &Cx,
        _query: &CompiledQuery,
        _chunk_size: usize,
    ) -> impl Future<Output = Outcome<Vec<QueryResult>, Error>> + Send {
        async {
            Outcome::Err(Error::Unsupported(
                "OpSqliteConnection does not support streaming queries",
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asupersync::runtime::RuntimeBuilder;
    use sqlbridge_core::Value;
    use std::sync::{Arc, Mutex};

    fn connection() -> OpSqliteConnection {
        OpSqliteConnection::new(NativeDatabase::open_memory().expect("open in-memory database"))
    }

    fn run(conn: &OpSqliteConnection, sql: &str, params: Vec<Value>) -> QueryResult {
        conn.execute_sync(&CompiledQuery::raw(sql, params))
            .expect("query should succeed")
    }

    #[test]
    fn strict_mode_rewriting() {
        assert_eq!(
            append_strict_mode("CREATE TABLE t (id INTEGER)"),
            "CREATE TABLE t (id INTEGER) STRICT"
        );
        assert_eq!(
            append_strict_mode("  create table t (id integer)  \n"),
            "  create table t (id integer) STRICT"
        );
        assert!(matches!(
            append_strict_mode("CREATE TABLE t (id INTEGER) STRICT"),
            Cow::Borrowed(_)
        ));
        assert!(matches!(
            append_strict_mode("CREATE TABLE t (id INTEGER);"),
            Cow::Borrowed(_)
        ));
        assert!(matches!(append_strict_mode("SELECT (1)"), Cow::Borrowed(_)));
        assert!(matches!(
            append_strict_mode("CREATE INDEX i ON t (id)"),
            Cow::Borrowed(_)
        ));
    }

    #[test]
    fn strict_tables_reject_wrong_types() {
        let conn = connection();
        run(&conn, "CREATE TABLE t (id INTEGER)", vec![]);
        let err = conn
            .execute_sync(&CompiledQuery::raw(
                "INSERT INTO t (id) VALUES (?)",
                vec![Value::Text("abc".into())],
            ))
            .unwrap_err();
        assert!(err.is_constraint_violation());
    }

    #[test]
    fn strict_mode_can_be_disabled() {
        let conn = connection().disable_strict_mode_create_table(true);
        run(&conn, "CREATE TABLE t (id INTEGER)", vec![]);
        run(&conn, "INSERT INTO t (id) VALUES (?)", vec![Value::Text("abc".into())]);
    }

    #[test]
    fn affinity_conversion_on_read() {
        let conn = connection().auto_affinity_conversion(true);
        let result = run(
            &conn,
            "SELECT ? AS flag, ? AS doc, ? AS plain",
            vec![
                Value::Bool(true),
                Value::Json(serde_json::json!({"k": 1})),
                Value::Text("hello".into()),
            ],
        );
        let row = result.first().expect("one row");
        assert_eq!(row.get_by_name("flag"), Some(&Value::Bool(true)));
        assert_eq!(row.get_by_name("doc"), Some(&Value::Json(serde_json::json!({"k": 1}))));
        assert_eq!(row.get_by_name("plain"), Some(&Value::Text("hello".into())));
    }

    #[test]
    fn counts_are_copied_from_native_result() {
        let conn = connection();
        run(&conn, "CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)", vec![]);
        let insert = run(&conn, "INSERT INTO t (v) VALUES (?)", vec![Value::from("a")]);
        assert_eq!(insert.num_affected_rows, Some(1));
        assert_eq!(insert.insert_id, Some(1));
        let select = run(&conn, "SELECT * FROM t", vec![]);
        assert_eq!(select.num_affected_rows, None);
        assert_eq!(select.insert_id, None);
        assert_eq!(select.rows.len(), 1);
    }

    #[test]
    fn failures_reach_the_error_hook() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let hook: ErrorHook = Arc::new(move |message, _err| {
            sink.lock().unwrap().push(message.to_string());
        });
        let conn = connection().on_error(Some(hook));

        let err = conn
            .execute_sync(&CompiledQuery::raw("SELECT * FROM missing", vec![]))
            .unwrap_err();
        assert!(err.to_string().contains("no such table"));
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            ["Query failed: SELECT * FROM missing"]
        );
    }

    #[test]
    fn trait_methods() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let conn = connection();
        let query = CompiledQuery::raw("SELECT 1 AS one", vec![]);

        rt.block_on(async {
            match conn.execute_query(&cx, &query).await {
                Outcome::Ok(result) => {
                    assert_eq!(result.first().and_then(|r| r.get(0)), Some(&Value::Integer(1)));
                }
                other => panic!("unexpected outcome: {other:?}"),
            }
            match conn.stream_query(&cx, &query, 10).await {
                Outcome::Err(Error::Unsupported(msg)) => {
                    assert_eq!(msg, "OpSqliteConnection does not support streaming queries");
                }
                other => panic!("unexpected outcome: {other:?}"),
            }
        });
    }
}
