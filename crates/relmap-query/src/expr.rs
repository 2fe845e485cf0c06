//! SQL expressions used in WHERE and ON clauses.
//!
//! Values are inlined as quoted string literals; the null sentinel renders as
//! `NULL`. Identifiers are always quoted for the target dialect.

use crate::clause::{OrderBy, OrderDirection};
use relmap_core::{Dialect, NULL_SENTINEL, SqlValue, is_null_sentinel};

/// A SQL expression that can be used in WHERE, ON, etc.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Column reference with optional table qualifier
    Column {
        /// Optional table name
        table: Option<String>,
        /// Column name
        name: String,
    },

    /// Literal value in its SQL string form
    Literal(String),

    /// Binary operation (e.g., a = b, a AND b)
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },

    /// NOT expr
    Not(Box<Expr>),

    /// IN expression
    In {
        expr: Box<Expr>,
        values: Vec<Expr>,
        negated: bool,
    },

    /// IS NULL / IS NOT NULL
    IsNull { expr: Box<Expr>, negated: bool },

    /// LIKE / NOT LIKE pattern
    Like {
        expr: Box<Expr>,
        pattern: String,
        negated: bool,
    },

    /// Raw SQL fragment (escape hatch)
    Raw(String),

    /// Parenthesized expression
    Paren(Box<Expr>),
}

/// Binary operators.
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
    /// Logical AND
    And,
    /// Logical OR
    Or,
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
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        }
    }

    /// Precedence of this operator (higher binds tighter).
    pub const fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            _ => 3,
        }
    }
}

/// Render a string as a single-quoted SQL literal, or `NULL` for the sentinel.
pub fn quote_literal(value: &str) -> String {
    if is_null_sentinel(value) {
        "NULL".to_string()
    } else {
        format!("'{}'", value.replace('\'', "''"))
    }
}

impl Expr {
    // ==================== Constructors ====================

    /// Create a column reference expression.
    pub fn col(name: impl Into<String>) -> Self {
        Expr::Column {
            table: None,
            name: name.into(),
        }
    }

    /// Create a qualified column reference (table.column).
    pub fn qualified(table: impl Into<String>, column: impl Into<String>) -> Self {
        Expr::Column {
            table: Some(table.into()),
            name: column.into(),
        }
    }

    /// Create a literal from any convertible value.
    pub fn lit(value: impl SqlValue) -> Self {
        Expr::Literal(value.to_sql_string())
    }

    /// Create a literal from an already converted string.
    pub fn text(value: impl Into<String>) -> Self {
        Expr::Literal(value.into())
    }

    /// Create a NULL literal.
    pub fn null() -> Self {
        Expr::Literal(NULL_SENTINEL.to_string())
    }

    /// Create a raw SQL expression (escape hatch).
    pub fn raw(sql: impl Into<String>) -> Self {
        Expr::Raw(sql.into())
    }

    fn binary(self, op: BinaryOp, other: impl Into<Expr>) -> Self {
        Expr::Binary {
            left: Box::new(self),
            op,
            right: Box::new(other.into()),
        }
    }

    // ==================== Comparison Operators ====================

    /// Equal to (=)
    pub fn eq(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Eq, other)
    }

    /// Not equal to (<>)
    pub fn ne(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ne, other)
    }

    /// Less than (<)
    pub fn lt(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Lt, other)
    }

    /// Less than or equal to (<=)
    pub fn le(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Le, other)
    }

    /// Greater than (>)
    pub fn gt(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Gt, other)
    }

    /// Greater than or equal to (>=)
    pub fn ge(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ge, other)
    }

    // ==================== Logical Operators ====================

    /// Logical AND
    pub fn and(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::And, other)
    }

    /// Logical OR
    pub fn or(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Or, other)
    }

    /// Logical NOT
    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    /// AND together every expression; `None` for an empty input.
    pub fn all(exprs: impl IntoIterator<Item = Expr>) -> Option<Self> {
        exprs.into_iter().reduce(Expr::and)
    }

    /// OR together every expression; `None` for an empty input.
    pub fn any(exprs: impl IntoIterator<Item = Expr>) -> Option<Self> {
        exprs.into_iter().reduce(Expr::or)
    }

    // ==================== Null Checks ====================

    /// IS NULL
    pub fn is_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    /// IS NOT NULL
    pub fn is_not_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: true,
        }
    }

    // ==================== Pattern Matching ====================

    /// LIKE pattern match
    pub fn like(self, pattern: impl Into<String>) -> Self {
        Expr::Like {
            expr: Box::new(self),
            pattern: pattern.into(),
            negated: false,
        }
    }

    /// NOT LIKE pattern match
    pub fn not_like(self, pattern: impl Into<String>) -> Self {
        Expr::Like {
            expr: Box::new(self),
            pattern: pattern.into(),
            negated: true,
        }
    }

    // ==================== IN Lists ====================

    /// IN list of values
    pub fn in_list(self, values: Vec<impl Into<Expr>>) -> Self {
        Expr::In {
            expr: Box::new(self),
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        }
    }

    /// NOT IN list of values
    pub fn not_in_list(self, values: Vec<impl Into<Expr>>) -> Self {
        Expr::In {
            expr: Box::new(self),
            values: values.into_iter().map(Into::into).collect(),
            negated: true,
        }
    }

    // ==================== Ordering ====================

    /// Create an ascending ORDER BY expression.
    pub fn asc(self) -> OrderBy {
        OrderBy::new(self, OrderDirection::Asc)
    }

    /// Create a descending ORDER BY expression.
    pub fn desc(self) -> OrderBy {
        OrderBy::new(self, OrderDirection::Desc)
    }

    // ==================== Utility ====================

    /// Wrap expression in parentheses.
    pub fn paren(self) -> Self {
        Expr::Paren(Box::new(self))
    }

    /// Table qualifiers of every column this expression references, in order
    /// of first appearance.
    pub fn referenced_tables(&self) -> Vec<&str> {
        let mut tables = Vec::new();
        self.collect_tables(&mut tables);
        tables
    }

    fn collect_tables<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Column {
                table: Some(table), ..
            } => {
                if !out.contains(&table.as_str()) {
                    out.push(table);
                }
            }
            Expr::Binary { left, right, .. } => {
                left.collect_tables(out);
                right.collect_tables(out);
            }
            Expr::Not(expr) | Expr::Paren(expr) => expr.collect_tables(out),
            Expr::IsNull { expr, .. } | Expr::Like { expr, .. } => expr.collect_tables(out),
            Expr::In { expr, values, .. } => {
                expr.collect_tables(out);
                for value in values {
                    value.collect_tables(out);
                }
            }
            Expr::Column { table: None, .. } | Expr::Literal(_) | Expr::Raw(_) => {}
        }
    }

    // ==================== SQL Generation ====================

    /// Render this expression for `dialect`.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        match self {
            Expr::Column { table, name } => {
                if let Some(t) = table {
                    format!(
                        "{}.{}",
                        dialect.quote_identifier(t),
                        dialect.quote_identifier(name)
                    )
                } else {
                    dialect.quote_identifier(name)
                }
            }

            Expr::Literal(value) => quote_literal(value),

            Expr::Binary { left, op, right } => {
                let left_sql = left.operand_sql(dialect, *op);
                let right_sql = right.operand_sql(dialect, *op);
                // `x = NULL` never matches; compare with IS instead.
                match (op, right.as_ref()) {
                    (BinaryOp::Eq, Expr::Literal(v)) if is_null_sentinel(v) => {
                        format!("{left_sql} IS NULL")
                    }
                    (BinaryOp::Ne, Expr::Literal(v)) if is_null_sentinel(v) => {
                        format!("{left_sql} IS NOT NULL")
                    }
                    _ => format!("{left_sql} {} {right_sql}", op.as_str()),
                }
            }

            Expr::Not(expr) => format!("NOT {}", expr.to_sql(dialect)),

            Expr::In {
                expr,
                values,
                negated,
            } => {
                let expr_sql = expr.to_sql(dialect);
                let value_sqls: Vec<_> = values.iter().map(|v| v.to_sql(dialect)).collect();
                let not_str = if *negated { "NOT " } else { "" };
                format!("{expr_sql} {not_str}IN ({})", value_sqls.join(", "))
            }

            Expr::IsNull { expr, negated } => {
                let not_str = if *negated { " NOT" } else { "" };
                format!("{} IS{not_str} NULL", expr.to_sql(dialect))
            }

            Expr::Like {
                expr,
                pattern,
                negated,
            } => {
                let not_str = if *negated { "NOT " } else { "" };
                format!(
                    "{} {not_str}LIKE {}",
                    expr.to_sql(dialect),
                    quote_literal(pattern)
                )
            }

            Expr::Raw(sql) => sql.clone(),

            Expr::Paren(expr) => format!("({})", expr.to_sql(dialect)),
        }
    }

    /// Render as the operand of `parent`, adding parentheses when a looser
    /// binary operator is nested inside a tighter one.
    fn operand_sql(&self, dialect: Dialect, parent: BinaryOp) -> String {
        match self {
            Expr::Binary { op, .. } if op.precedence() < parent.precedence() => {
                format!("({})", self.to_sql(dialect))
            }
            _ => self.to_sql(dialect),
        }
    }
}

impl From<&str> for Expr {
    fn from(value: &str) -> Self {
        Expr::text(value)
    }
}

impl From<String> for Expr {
    fn from(value: String) -> Self {
        Expr::Literal(value)
    }
}

macro_rules! impl_expr_from_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Expr {
                fn from(value: $ty) -> Self {
                    Expr::lit(value)
                }
            }
        )*
    };
}

impl_expr_from_scalar!(bool, i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);
