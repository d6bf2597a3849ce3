//! Operation nodes produced by query builders and consumed by compilers.
//!
//! Builders in `sqlbridge-query` assemble these nodes; a dialect's
//! [`QueryCompiler`](crate::dialect::QueryCompiler) turns them into a
//! [`CompiledQuery`](crate::query::CompiledQuery).

use crate::value::Value;

/// Root of every buildable statement.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryNode {
    Select(SelectNode),
    Insert(InsertNode),
    Update(UpdateNode),
    Delete(DeleteNode),
    Raw(RawNode),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectNode {
    pub table: String,
    /// Selected columns; empty means `*`
    pub columns: Vec<String>,
    pub distinct: bool,
    pub where_clause: Option<Expr>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct InsertNode {
    pub table: String,
    pub columns: Vec<String>,
    /// One entry per inserted row, each aligned with `columns`
    pub rows: Vec<Vec<Value>>,
    pub returning: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdateNode {
    pub table: String,
    pub assignments: Vec<(String, Value)>,
    pub where_clause: Option<Expr>,
    pub returning: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeleteNode {
    pub table: String,
    pub where_clause: Option<Expr>,
    pub returning: Vec<String>,
}

/// Hand-written SQL with its parameters, passed through untouched.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawNode {
    pub sql: String,
    pub parameters: Vec<Value>,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

impl OrderDirection {
    pub const fn as_str(self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        }
    }
}

/// ORDER BY entry.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: String,
    pub direction: OrderDirection,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: OrderDirection::Asc,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: OrderDirection::Desc,
        }
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// Equal (=)
    Eq,
    /// Not equal (<>)
    Ne,
    /// Less than (<)
    Lt,
    /// Less than or equal (<=)
    Le,
    /// Greater than (>)
    Gt,
    /// Greater than or equal (>=)
    Ge,
    /// Pattern match (LIKE)
    Like,
}

impl BinaryOp {
    /// Get the SQL representation of this operator.
    pub const fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Like => "LIKE",
        }
    }
}

/// A condition or operand in a WHERE clause.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Column reference
    Column(String),

    /// Literal value, always bound as a parameter
    Literal(Value),

    /// Binary comparison
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },

    /// IS NULL / IS NOT NULL
    IsNull { expr: Box<Expr>, negated: bool },

    /// expr IN (v1, v2, ...)
    InList { expr: Box<Expr>, values: Vec<Value> },

    /// All conditions must hold
    And(Vec<Expr>),

    /// Any condition may hold
    Or(Vec<Expr>),

    /// NOT expr
    Not(Box<Expr>),
}

impl Expr {
    /// Reference a column by name.
    pub fn col(name: impl Into<String>) -> Self {
        Expr::Column(name.into())
    }

    /// Literal value.
    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    fn binary(self, op: BinaryOp, other: impl Into<Expr>) -> Self {
        Expr::Binary {
            left: Box::new(self),
            op,
            right: Box::new(other.into()),
        }
    }

    pub fn eq(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Eq, other)
    }

    pub fn ne(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ne, other)
    }

    pub fn lt(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Lt, other)
    }

    pub fn le(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Le, other)
    }

    pub fn gt(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Gt, other)
    }

    pub fn ge(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ge, other)
    }

    pub fn like(self, pattern: impl Into<String>) -> Self {
        self.binary(BinaryOp::Like, Expr::Literal(Value::Text(pattern.into())))
    }

    pub fn is_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    pub fn is_not_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: true,
        }
    }

    pub fn in_list<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Self {
        Expr::InList {
            expr: Box::new(self),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Combine with AND, flattening nested conjunctions.
    pub fn and(self, other: impl Into<Expr>) -> Self {
        match (self, other.into()) {
            (Expr::And(mut left), Expr::And(right)) => {
                left.extend(right);
                Expr::And(left)
            }
            (Expr::And(mut left), right) => {
                left.push(right);
                Expr::And(left)
            }
            (left, right) => Expr::And(vec![left, right]),
        }
    }

    /// Combine with OR, flattening nested disjunctions.
    pub fn or(self, other: impl Into<Expr>) -> Self {
        match (self, other.into()) {
            (Expr::Or(mut left), Expr::Or(right)) => {
                left.extend(right);
                Expr::Or(left)
            }
            (Expr::Or(mut left), right) => {
                left.push(right);
                Expr::Or(left)
            }
            (left, right) => Expr::Or(vec![left, right]),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }
}

impl From<Value> for Expr {
    fn from(v: Value) -> Self {
        Expr::Literal(v)
    }
}

macro_rules! literal_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Expr {
                fn from(v: $ty) -> Self {
                    Expr::Literal(Value::from(v))
                }
            }
        )*
    };
}

literal_from!(
    bool,
    i32,
    i64,
    u32,
    f64,
    &str,
    String,
    Vec<u8>,
    chrono::DateTime<chrono::Utc>,
    serde_json::Value,
);
