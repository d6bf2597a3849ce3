//! SQLite query compiler.
//!
//! Identifiers are double-quoted with embedded quotes doubled, literals are
//! always bound as `?` placeholders, and parameters are collected in the
//! order their placeholders appear in the SQL text.

use sqlbridge_core::{
    CompiledQuery, DeleteNode, Error, Expr, InsertNode, QueryCompiler, QueryKind, QueryNode,
    Result, SelectNode, UpdateNode, Value,
};

/// Compiles operation nodes to SQLite SQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteQueryCompiler;

impl SqliteQueryCompiler {
    pub fn new() -> Self {
        Self
    }
}

/// Quote an identifier for SQLite, doubling embedded `"` characters.
///
/// A dotted name such as `main.person` is quoted per segment.
pub fn quote_identifier(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

fn quote_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ")
}

impl QueryCompiler for SqliteQueryCompiler {
    fn compile(&self, node: &QueryNode) -> Result<CompiledQuery> {
        let mut params = Vec::new();
        let (kind, sql) = match node {
            QueryNode::Select(select) => (QueryKind::Select, compile_select(select, &mut params)),
            QueryNode::Insert(insert) => (QueryKind::Insert, compile_insert(insert, &mut params)?),
            QueryNode::Update(update) => (QueryKind::Update, compile_update(update, &mut params)?),
            QueryNode::Delete(delete) => (QueryKind::Delete, compile_delete(delete, &mut params)),
            QueryNode::Raw(raw) => {
                params.extend(raw.parameters.iter().cloned());
                (QueryKind::Raw, raw.sql.clone())
            }
        };
        Ok(CompiledQuery::new(kind, sql, params))
    }
}

fn compile_select(node: &SelectNode, params: &mut Vec<Value>) -> String {
    let mut sql = String::from("SELECT ");
    if node.distinct {
        sql.push_str("DISTINCT ");
    }
    if node.columns.is_empty() {
        sql.push('*');
    } else {
        sql.push_str(&quote_list(&node.columns));
    }
    sql.push_str(" FROM ");
    sql.push_str(&quote_identifier(&node.table));

    push_where(&mut sql, node.where_clause.as_ref(), params);

    if !node.order_by.is_empty() {
        let parts: Vec<String> = node
            .order_by
            .iter()
            .map(|o| format!("{} {}", quote_identifier(&o.column), o.direction.as_str()))
            .collect();
        sql.push_str(" ORDER BY ");
        sql.push_str(&parts.join(", "));
    }

    match (node.limit, node.offset) {
        (Some(limit), offset) => {
            sql.push_str(" LIMIT ?");
            params.push(Value::Integer(clamp_u64(limit)));
            if let Some(offset) = offset {
                sql.push_str(" OFFSET ?");
                params.push(Value::Integer(clamp_u64(offset)));
            }
        }
        // SQLite only accepts OFFSET after a LIMIT; -1 means no limit.
        (None, Some(offset)) => {
            sql.push_str(" LIMIT -1 OFFSET ?");
            params.push(Value::Integer(clamp_u64(offset)));
        }
        (None, None) => {}
    }

    sql
}

fn compile_insert(node: &InsertNode, params: &mut Vec<Value>) -> Result<String> {
    let mut sql = format!("INSERT INTO {}", quote_identifier(&node.table));

    if node.columns.is_empty() {
        if node.rows.len() > 1 {
            return Err(Error::Custom(
                "INSERT without columns can only insert a single default row".to_string(),
            ));
        }
        sql.push_str(" DEFAULT VALUES");
    } else {
        sql.push_str(" (");
        sql.push_str(&quote_list(&node.columns));
        sql.push_str(") VALUES ");
        let rows: Vec<String> = node
            .rows
            .iter()
            .map(|row| {
                let placeholders: Vec<&str> = row
                    .iter()
                    .map(|value| {
                        params.push(value.clone());
                        "?"
                    })
                    .collect();
                format!("({})", placeholders.join(", "))
            })
            .collect();
        sql.push_str(&rows.join(", "));
    }

    push_returning(&mut sql, &node.returning);
    Ok(sql)
}

fn compile_update(node: &UpdateNode, params: &mut Vec<Value>) -> Result<String> {
    if node.assignments.is_empty() {
        return Err(Error::Custom(format!(
            "UPDATE of \"{}\" has no assignments",
            node.table
        )));
    }

    let assignments: Vec<String> = node
        .assignments
        .iter()
        .map(|(column, value)| {
            params.push(value.clone());
            format!("{} = ?", quote_identifier(column))
        })
        .collect();

    let mut sql = format!(
        "UPDATE {} SET {}",
        quote_identifier(&node.table),
        assignments.join(", ")
    );
    push_where(&mut sql, node.where_clause.as_ref(), params);
    push_returning(&mut sql, &node.returning);
    Ok(sql)
}

fn compile_delete(node: &DeleteNode, params: &mut Vec<Value>) -> String {
    let mut sql = format!("DELETE FROM {}", quote_identifier(&node.table));
    push_where(&mut sql, node.where_clause.as_ref(), params);
    push_returning(&mut sql, &node.returning);
    sql
}

fn push_where(sql: &mut String, expr: Option<&Expr>, params: &mut Vec<Value>) {
    if let Some(expr) = expr {
        sql.push_str(" WHERE ");
        sql.push_str(&compile_expr(expr, params));
    }
}

fn push_returning(sql: &mut String, columns: &[String]) {
    if columns.is_empty() {
        return;
    }
    sql.push_str(" RETURNING ");
    if columns.iter().any(|c| c == "*") {
        sql.push('*');
    } else {
        sql.push_str(&quote_list(columns));
    }
}

fn compile_expr(expr: &Expr, params: &mut Vec<Value>) -> String {
    match expr {
        Expr::Column(name) => quote_identifier(name),
        Expr::Literal(value) => {
            params.push(value.clone());
            "?".to_string()
        }
        Expr::Binary { left, op, right } => {
            let l = compile_operand(left, params);
            let r = compile_operand(right, params);
            format!("{} {} {}", l, op.as_str(), r)
        }
        Expr::IsNull { expr, negated } => {
            let inner = compile_operand(expr, params);
            if *negated {
                format!("{} IS NOT NULL", inner)
            } else {
                format!("{} IS NULL", inner)
            }
        }
        Expr::InList { expr, values } => {
            let inner = compile_operand(expr, params);
            let placeholders: Vec<&str> = values
                .iter()
                .map(|v| {
                    params.push(v.clone());
                    "?"
                })
                .collect();
            format!("{} IN ({})", inner, placeholders.join(", "))
        }
        Expr::And(parts) => join_parts(parts, " AND ", params),
        Expr::Or(parts) => join_parts(parts, " OR ", params),
        Expr::Not(inner) => format!("NOT ({})", compile_expr(inner, params)),
    }
}

/// Compile an operand, parenthesizing anything that is not atomic.
fn compile_operand(expr: &Expr, params: &mut Vec<Value>) -> String {
    match expr {
        Expr::Column(_) | Expr::Literal(_) => compile_expr(expr, params),
        _ => format!("({})", compile_expr(expr, params)),
    }
}

fn join_parts(parts: &[Expr], sep: &str, params: &mut Vec<Value>) -> String {
    if parts.is_empty() {
        // Empty AND is true, empty OR is false.
        return if sep.trim() == "AND" { "1 = 1" } else { "1 = 0" }.to_string();
    }
    parts
        .iter()
        .map(|part| match part {
            Expr::And(_) | Expr::Or(_) => format!("({})", compile_expr(part, params)),
            _ => compile_expr(part, params),
        })
        .collect::<Vec<_>>()
        .join(sep)
}

fn clamp_u64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}
