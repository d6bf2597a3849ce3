//! SQLite schema introspection.
//!
//! Reads tables and views from `sqlite_master` and their columns from
//! `pragma_table_info`, running every statement through a [`QueryExecutor`]
//! so it shares the caller's connection handling.

use crate::builder::{Query, ToQueryNode};
use crate::compiler::SqliteQueryCompiler;
use asupersync::{Cx, Outcome};
use sqlbridge_core::{
    ColumnMetadata, CompiledQuery, DEFAULT_MIGRATION_LOCK_TABLE, DEFAULT_MIGRATION_TABLE,
    DatabaseIntrospector, DatabaseMetadata, Error, Expr, IntrospectOptions, OrderBy,
    QueryCompiler, QueryExecutor, QueryResult, Row, SchemaMetadata, TableMetadata, Value,
};

/// Introspector for SQLite databases.
#[derive(Debug, Clone)]
pub struct SqliteIntrospector<E> {
    executor: E,
    compiler: SqliteQueryCompiler,
}

impl<E: QueryExecutor> SqliteIntrospector<E> {
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            compiler: SqliteQueryCompiler::new(),
        }
    }

    async fn run(&self, cx: &Cx, query: &CompiledQuery) -> Outcome<QueryResult, Error> {
        self.executor.execute_compiled(cx, query).await
    }

    async fn run_node(&self, cx: &Cx, node: &(impl ToQueryNode + Sync)) -> Outcome<QueryResult, Error> {
        match self.compiler.compile(&node.to_query_node()) {
            Ok(compiled) => self.run(cx, &compiled).await,
            Err(e) => Outcome::Err(e),
        }
    }

    async fn table_metadata(&self, cx: &Cx, table: &str) -> Outcome<TableMetadata, Error> {
        let definition = Query::select("sqlite_master")
            .columns(["sql", "type"])
            .filter(Expr::col("name").eq(table));
        let definition = match self.run_node(cx, &definition).await {
            Outcome::Ok(result) => result,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let Some(row) = definition.first() else {
            return Outcome::Err(Error::Custom(format!(
                "table '{}' not found in sqlite_master",
                table
            )));
        };
        let create_sql = row.get_by_name("sql").and_then(text_of);
        let is_view = row.get_by_name("type").and_then(text_of).as_deref() == Some("view");
        let autoincrement = create_sql.as_deref().and_then(autoincrement_column);

        let columns_query = CompiledQuery::raw(
            "SELECT \"name\", \"type\", \"notnull\", \"dflt_value\" FROM pragma_table_info(?) ORDER BY \"cid\"",
            vec![Value::Text(table.to_string())],
        );
        let columns = match self.run(cx, &columns_query).await {
            Outcome::Ok(result) => result,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let columns = columns
            .rows
            .iter()
            .map(|row| column_metadata(row, autoincrement.as_deref()))
            .collect();

        Outcome::Ok(TableMetadata {
            name: table.to_string(),
            is_view,
            schema: None,
            columns,
        })
    }
}

impl<E: QueryExecutor> DatabaseIntrospector for SqliteIntrospector<E> {
    /// SQLite has no schemas in the sense the query layer uses.
    fn get_schemas(&self, _cx: &Cx) -> impl Future<Output = Outcome<Vec<SchemaMetadata>, Error>> + Send {
        async { Outcome::Ok(Vec::new()) }
    }

    fn get_tables(
        &self,
        cx: &Cx,
        options: IntrospectOptions,
    ) -> impl Future<Output = Outcome<Vec<TableMetadata>, Error>> + Send {
        async move {
            let mut query = Query::select("sqlite_master")
                .columns(["name"])
                .filter(Expr::col("type").in_list(["table", "view"]))
                .filter(Expr::col("name").like("sqlite_%").not())
                .order_by(OrderBy::asc("name"));
            if !options.with_internal_migration_tables {
                query = query
                    .filter(Expr::col("name").ne(DEFAULT_MIGRATION_TABLE))
                    .filter(Expr::col("name").ne(DEFAULT_MIGRATION_LOCK_TABLE));
            }

            let names = match self.run_node(cx, &query).await {
                Outcome::Ok(result) => result,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };

            let mut tables = Vec::with_capacity(names.rows.len());
            for row in &names.rows {
                let Some(name) = row.get(0).and_then(text_of) else {
                    continue;
                };
                match self.table_metadata(cx, &name).await {
                    Outcome::Ok(table) => tables.push(table),
                    Outcome::Err(e) => return Outcome::Err(e),
                    Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                    Outcome::Panicked(p) => return Outcome::Panicked(p),
                }
            }
            Outcome::Ok(tables)
        }
    }

    fn get_metadata(
        &self,
        cx: &Cx,
        options: IntrospectOptions,
    ) -> impl Future<Output = Outcome<DatabaseMetadata, Error>> + Send {
        async move {
            match self.get_tables(cx, options).await {
                Outcome::Ok(tables) => Outcome::Ok(DatabaseMetadata { tables }),
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        }
    }
}

fn column_metadata(row: &Row, autoincrement: Option<&str>) -> ColumnMetadata {
    let name = row.get_by_name("name").and_then(text_of).unwrap_or_default();
    let data_type = row.get_by_name("type").and_then(text_of).unwrap_or_default();
    let not_null = row
        .get_by_name("notnull")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let has_default_value = row
        .get_by_name("dflt_value")
        .is_some_and(|v| !v.is_null());

    ColumnMetadata {
        is_autoincrementing: autoincrement == Some(name.as_str()),
        name,
        data_type,
        is_nullable: !not_null,
        has_default_value,
        comment: None,
    }
}

/// Textual form of a catalog value.
///
/// Catalog text may have been decoded into a richer value when affinity
/// conversion is on (a column named `true`, a JSON default), so every
/// non-null value is turned back into text.
fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Text(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Real(f) => Some(f.to_string()),
        Value::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
        Value::Timestamp(ts) => Some(ts.to_rfc3339()),
        Value::Json(j) => Some(j.to_string()),
    }
}

/// Find the column declared AUTOINCREMENT in a CREATE TABLE statement.
///
/// The statement is split on parentheses and commas; the first fragment
/// mentioning `autoincrement` starts with the column name.
pub fn autoincrement_column(create_sql: &str) -> Option<String> {
    create_sql
        .split(['(', ')', ','])
        .find(|part| part.to_lowercase().contains("autoincrement"))
        .and_then(|part| part.split_whitespace().next())
        .map(|name| name.replace(['"', '`'], ""))
}
