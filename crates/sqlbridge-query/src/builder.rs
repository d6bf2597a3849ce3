//! Fluent builders for SELECT, INSERT, UPDATE, DELETE and raw statements.
//!
//! Builders only assemble [`QueryNode`]s; turning them into SQL is the job
//! of a dialect's compiler.

use sqlbridge_core::{
    DeleteNode, Expr, InsertNode, OrderBy, QueryNode, RawNode, SelectNode, UpdateNode, Value,
};

/// Anything that can be turned into an operation node.
pub trait ToQueryNode {
    fn to_query_node(&self) -> QueryNode;
}

impl ToQueryNode for QueryNode {
    fn to_query_node(&self) -> QueryNode {
        self.clone()
    }
}

/// Entry points for every builder.
pub struct Query;

impl Query {
    pub fn select(table: impl Into<String>) -> SelectBuilder {
        SelectBuilder::new(table)
    }

    pub fn insert_into(table: impl Into<String>) -> InsertBuilder {
        InsertBuilder::new(table)
    }

    pub fn update(table: impl Into<String>) -> UpdateBuilder {
        UpdateBuilder::new(table)
    }

    pub fn delete_from(table: impl Into<String>) -> DeleteBuilder {
        DeleteBuilder::new(table)
    }

    pub fn raw(sql: impl Into<String>) -> RawBuilder {
        RawBuilder::new(sql)
    }
}

fn and_where(existing: Option<Expr>, expr: Expr) -> Option<Expr> {
    Some(match existing {
        Some(current) => current.and(expr),
        None => expr,
    })
}

/// SELECT query builder.
#[derive(Debug, Clone)]
pub struct SelectBuilder {
    node: SelectNode,
}

impl SelectBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            node: SelectNode {
                table: table.into(),
                ..SelectNode::default()
            },
        }
    }

    /// Select specific columns instead of `*`.
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.node.columns.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn distinct(mut self) -> Self {
        self.node.distinct = true;
        self
    }

    /// Add a WHERE condition; repeated calls are combined with AND.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.node.where_clause = and_where(self.node.where_clause.take(), expr);
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.node.order_by.push(order);
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.node.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: u64) -> Self {
        self.node.offset = Some(n);
        self
    }
}

impl ToQueryNode for SelectBuilder {
    fn to_query_node(&self) -> QueryNode {
        QueryNode::Select(self.node.clone())
    }
}

/// INSERT query builder.
#[derive(Debug, Clone)]
pub struct InsertBuilder {
    node: InsertNode,
}

impl InsertBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            node: InsertNode {
                table: table.into(),
                ..InsertNode::default()
            },
        }
    }

    /// Add one row given as (column, value) pairs.
    ///
    /// The first row fixes the column list; later rows are reordered to
    /// match it and missing columns are filled with NULL.
    pub fn values<I, S, V>(mut self, row: I) -> Self
    where
        I: IntoIterator<Item = (S, V)>,
        S: Into<String>,
        V: Into<Value>,
    {
        let pairs: Vec<(String, Value)> = row
            .into_iter()
            .map(|(c, v)| (c.into(), v.into()))
            .collect();

        if self.node.columns.is_empty() && self.node.rows.is_empty() {
            self.node.columns = pairs.iter().map(|(c, _)| c.clone()).collect();
        }

        let aligned = self
            .node
            .columns
            .iter()
            .map(|column| {
                pairs
                    .iter()
                    .find(|(c, _)| c == column)
                    .map_or(Value::Null, |(_, v)| v.clone())
            })
            .collect();
        self.node.rows.push(aligned);
        self
    }

    pub fn returning<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.node.returning.extend(columns.into_iter().map(Into::into));
        self
    }
}

impl ToQueryNode for InsertBuilder {
    fn to_query_node(&self) -> QueryNode {
        QueryNode::Insert(self.node.clone())
    }
}

/// UPDATE query builder.
#[derive(Debug, Clone)]
pub struct UpdateBuilder {
    node: UpdateNode,
}

impl UpdateBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            node: UpdateNode {
                table: table.into(),
                ..UpdateNode::default()
            },
        }
    }

    /// Assign a column; assigning the same column twice keeps the last value.
    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        let column = column.into();
        let value = value.into();
        if let Some(slot) = self.node.assignments.iter_mut().find(|(c, _)| *c == column) {
            slot.1 = value;
        } else {
            self.node.assignments.push((column, value));
        }
        self
    }

    pub fn filter(mut self, expr: Expr) -> Self {
        self.node.where_clause = and_where(self.node.where_clause.take(), expr);
        self
    }

    pub fn returning<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.node.returning.extend(columns.into_iter().map(Into::into));
        self
    }
}

impl ToQueryNode for UpdateBuilder {
    fn to_query_node(&self) -> QueryNode {
        QueryNode::Update(self.node.clone())
    }
}

/// DELETE query builder.
#[derive(Debug, Clone)]
pub struct DeleteBuilder {
    node: DeleteNode,
}

impl DeleteBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            node: DeleteNode {
                table: table.into(),
                ..DeleteNode::default()
            },
        }
    }

    pub fn filter(mut self, expr: Expr) -> Self {
        self.node.where_clause = and_where(self.node.where_clause.take(), expr);
        self
    }

    pub fn returning<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.node.returning.extend(columns.into_iter().map(Into::into));
        self
    }
}

impl ToQueryNode for DeleteBuilder {
    fn to_query_node(&self) -> QueryNode {
        QueryNode::Delete(self.node.clone())
    }
}

/// Raw SQL with bound parameters.
#[derive(Debug, Clone)]
pub struct RawBuilder {
    node: RawNode,
}

impl RawBuilder {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            node: RawNode {
                sql: sql.into(),
                parameters: Vec::new(),
            },
        }
    }

    /// Bind the next positional parameter.
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.node.parameters.push(value.into());
        self
    }

    pub fn bind_all(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.node.parameters.extend(values);
        self
    }
}

impl ToQueryNode for RawBuilder {
    fn to_query_node(&self) -> QueryNode {
        QueryNode::Raw(self.node.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_filters_are_anded() {
        let node = Query::select("person")
            .filter(Expr::col("age").gt(18))
            .filter(Expr::col("name").like("A%"))
            .to_query_node();
        match node {
            QueryNode::Select(select) => {
                assert!(matches!(select.where_clause, Some(Expr::And(ref parts)) if parts.len() == 2));
            }
            other => panic!("expected select node, got {other:?}"),
        }
    }

    #[test]
    fn insert_aligns_later_rows_to_first() {
        let node = Query::insert_into("person")
            .values([("id", Value::Integer(1)), ("name", Value::from("Ann"))])
            .values([("name", Value::from("Bob"))])
            .to_query_node();
        match node {
            QueryNode::Insert(insert) => {
                assert_eq!(insert.columns, vec!["id", "name"]);
                assert_eq!(insert.rows[1], vec![Value::Null, Value::Text("Bob".into())]);
            }
            other => panic!("expected insert node, got {other:?}"),
        }
    }

    #[test]
    fn update_set_overwrites_same_column() {
        let node = Query::update("person")
            .set("name", "Ann")
            .set("name", "Anna")
            .to_query_node();
        match node {
            QueryNode::Update(update) => {
                assert_eq!(
                    update.assignments,
                    vec![("name".to_string(), Value::Text("Anna".into()))]
                );
            }
            other => panic!("expected update node, got {other:?}"),
        }
    }

    #[test]
    fn raw_binds_in_order() {
        let node = Query::raw("SELECT ?, ?").bind(1_i64).bind("x").to_query_node();
        assert_eq!(
            node,
            QueryNode::Raw(RawNode {
                sql: "SELECT ?, ?".into(),
                parameters: vec![Value::Integer(1), Value::Text("x".into())],
            })
        );
    }
}
