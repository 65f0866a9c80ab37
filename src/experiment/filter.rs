//! Search filter grammar
//!
//! Filters are a conjunction of comparisons, parsed with `sqlparser`:
//!
//! ```text
//! filter     := comparison ( AND comparison )*
//! comparison := key op literal | key [I]LIKE 'pattern'
//! key        := namespace '.' name | name          -- bare name = attribute
//! namespace  := metrics | params | tags | attributes
//! op         := = | != | <> | < | <= | > | >=
//! literal    := number | 'string'
//! ```
//!
//! Names containing dots or dashes are quoted: `tags."team.owner"`.
//! `OR`, `NOT LIKE` and nested expressions other than parentheses around
//! the whole conjunction are rejected with `InvalidArgument`.
//!
//! A clause referencing a key the subject does not have evaluates to
//! false, so filtering on an undefined metric yields no matches.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;

use sqlparser::ast::{BinaryOperator, Expr, Ident, UnaryOperator, Value};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::Token;

use crate::{Error, Result};

/// Namespace of a filter or order-by key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterNamespace {
    /// Latest metric value
    Metric,
    /// Run parameter
    Param,
    /// Tag
    Tag,
    /// Built-in attribute of the entity
    Attribute,
}

impl fmt::Display for FilterNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Metric => "metrics",
            Self::Param => "params",
            Self::Tag => "tags",
            Self::Attribute => "attributes",
        };
        f.write_str(name)
    }
}

/// A namespaced key such as `metrics.loss`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterKey {
    /// Key namespace
    pub namespace: FilterNamespace,
    /// Key name inside the namespace
    pub name: String,
}

impl FilterKey {
    /// Create a key.
    #[must_use]
    pub fn new(namespace: FilterNamespace, name: impl Into<String>) -> Self {
        Self {
            namespace,
            name: name.into(),
        }
    }

    /// Parse a standalone key (used by order-by clauses).
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `input` is not a single identifier.
    pub fn parse(input: &str) -> Result<Self> {
        let expr = parse_complete_expr(input)?;
        key_from_expr(&expr)
    }
}

impl fmt::Display for FilterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.\"{}\"", self.namespace, self.name)
    }
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    /// `=`
    Eq,
    /// `!=` / `<>`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
    /// `LIKE` (case-sensitive, `%` and `_` wildcards)
    Like,
    /// `ILIKE` (case-insensitive)
    ILike,
}

/// Literal on the right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    /// Numeric literal
    Number(f64),
    /// String literal
    Text(String),
}

/// Value of a field on the entity being filtered.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue<'a> {
    /// Numeric field (metric values, timestamps, versions)
    Number(f64),
    /// Text field (params, tags, names, statuses)
    Text(Cow<'a, str>),
}

/// Anything a [`SearchFilter`] can be evaluated against.
pub trait FilterSubject {
    /// Look up the field addressed by `key`, `None` if the entity lacks it.
    fn lookup(&self, key: &FilterKey) -> Option<FieldValue<'_>>;
}

/// One `key op literal` comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    /// Left-hand key
    pub key: FilterKey,
    /// Operator
    pub comparator: Comparator,
    /// Right-hand literal
    pub value: FilterValue,
}

impl Clause {
    /// Evaluate the clause against a subject.
    #[must_use]
    pub fn matches(&self, subject: &impl FilterSubject) -> bool {
        let Some(field) = subject.lookup(&self.key) else {
            return false;
        };
        match (self.comparator, &field, &self.value) {
            (Comparator::Like, FieldValue::Text(text), FilterValue::Text(pattern)) => {
                like_match(text, pattern, false)
            }
            (Comparator::ILike, FieldValue::Text(text), FilterValue::Text(pattern)) => {
                like_match(text, pattern, true)
            }
            (Comparator::Like | Comparator::ILike, _, _) => false,
            (op, FieldValue::Number(lhs), rhs) => {
                let rhs = match rhs {
                    FilterValue::Number(n) => Some(*n),
                    FilterValue::Text(t) => t.parse::<f64>().ok(),
                };
                rhs.and_then(|rhs| lhs.partial_cmp(&rhs))
                    .is_some_and(|ord| compare(op, ord))
            }
            (op, FieldValue::Text(lhs), FilterValue::Text(rhs)) => {
                let lhs: &str = lhs;
                compare(op, lhs.cmp(rhs.as_str()))
            }
            (op, FieldValue::Text(lhs), FilterValue::Number(rhs)) => lhs
                .parse::<f64>()
                .ok()
                .and_then(|lhs| lhs.partial_cmp(rhs))
                .is_some_and(|ord| compare(op, ord)),
        }
    }
}

fn compare(op: Comparator, ord: Ordering) -> bool {
    match op {
        Comparator::Eq => ord == Ordering::Equal,
        Comparator::NotEq => ord != Ordering::Equal,
        Comparator::Lt => ord == Ordering::Less,
        Comparator::LtEq => ord != Ordering::Greater,
        Comparator::Gt => ord == Ordering::Greater,
        Comparator::GtEq => ord != Ordering::Less,
        Comparator::Like | Comparator::ILike => false,
    }
}

/// SQL `LIKE` matching with `%` (any run) and `_` (any single char).
fn like_match(text: &str, pattern: &str, case_insensitive: bool) -> bool {
    let fold = |s: &str| -> Vec<char> {
        if case_insensitive {
            s.to_lowercase().chars().collect()
        } else {
            s.chars().collect()
        }
    };
    let text = fold(text);
    let pattern = fold(pattern);

    // dp[j]: pattern[..j] matches text[..i]
    let mut dp = vec![false; pattern.len() + 1];
    dp[0] = true;
    for j in 1..=pattern.len() {
        dp[j] = dp[j - 1] && pattern[j - 1] == '%';
    }
    for &c in &text {
        let mut prev_diag = dp[0];
        dp[0] = false;
        for j in 1..=pattern.len() {
            let above = dp[j];
            dp[j] = match pattern[j - 1] {
                '%' => dp[j - 1] || above,
                '_' => prev_diag,
                p => prev_diag && p == c,
            };
            prev_diag = above;
        }
    }
    dp[pattern.len()]
}

/// A parsed conjunction of comparisons. The empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilter {
    clauses: Vec<Clause>,
}

impl SearchFilter {
    /// Parse a filter expression. Blank input yields the empty filter.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for syntax errors and unsupported constructs.
    ///
    /// # Example
    ///
    /// ```
    /// use trueno_track::experiment::{FilterNamespace, SearchFilter};
    ///
    /// let filter = SearchFilter::parse("metrics.loss < 0.5 AND params.lr = '0.01'").unwrap();
    /// assert_eq!(filter.clauses().len(), 2);
    /// assert_eq!(filter.clauses()[0].key.namespace, FilterNamespace::Metric);
    /// ```
    pub fn parse(input: &str) -> Result<Self> {
        if input.trim().is_empty() {
            return Ok(Self::default());
        }
        let expr = parse_complete_expr(input)?;
        let mut clauses = Vec::new();
        collect_clauses(&expr, &mut clauses)?;
        Ok(Self { clauses })
    }

    /// Parsed clauses in source order.
    #[must_use]
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Whether the filter has no clauses.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Whether every clause matches the subject.
    #[must_use]
    pub fn matches(&self, subject: &impl FilterSubject) -> bool {
        self.clauses.iter().all(|clause| clause.matches(subject))
    }

    /// Reject clauses outside `namespaces` or naming unknown attributes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` naming the first offending key.
    pub fn restrict(&self, namespaces: &[FilterNamespace], attributes: &[&str]) -> Result<()> {
        for clause in &self.clauses {
            check_key(&clause.key, namespaces, attributes)?;
        }
        Ok(())
    }
}

pub(crate) fn check_key(
    key: &FilterKey,
    namespaces: &[FilterNamespace],
    attributes: &[&str],
) -> Result<()> {
    if !namespaces.contains(&key.namespace) {
        return Err(Error::invalid_argument(
            "filter",
            format!("namespace '{}' is not searchable here", key.namespace),
        ));
    }
    if key.namespace == FilterNamespace::Attribute && !attributes.contains(&key.name.as_str()) {
        return Err(Error::invalid_argument(
            "filter",
            format!(
                "unknown attribute '{}', expected one of {attributes:?}",
                key.name
            ),
        ));
    }
    Ok(())
}

fn parse_error(input: &str, reason: impl fmt::Display) -> Error {
    Error::invalid_argument("filter", format!("'{input}': {reason}"))
}

fn parse_complete_expr(input: &str) -> Result<Expr> {
    let dialect = GenericDialect {};
    let mut parser = Parser::new(&dialect)
        .try_with_sql(input)
        .map_err(|e| parse_error(input, e))?;
    let expr = parser.parse_expr().map_err(|e| parse_error(input, e))?;
    let next = parser.peek_token();
    if next.token != Token::EOF {
        return Err(parse_error(input, format!("unexpected trailing '{}'", next.token)));
    }
    Ok(expr)
}

fn collect_clauses(expr: &Expr, out: &mut Vec<Clause>) -> Result<()> {
    match expr {
        Expr::Nested(inner) => collect_clauses(inner, out),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            collect_clauses(left, out)?;
            collect_clauses(right, out)
        }
        Expr::BinaryOp {
            op: BinaryOperator::Or,
            ..
        } => Err(Error::invalid_argument(
            "filter",
            "OR is not supported; combine comparisons with AND",
        )),
        Expr::BinaryOp { left, op, right } => {
            let comparator = match op {
                BinaryOperator::Eq => Comparator::Eq,
                BinaryOperator::NotEq => Comparator::NotEq,
                BinaryOperator::Lt => Comparator::Lt,
                BinaryOperator::LtEq => Comparator::LtEq,
                BinaryOperator::Gt => Comparator::Gt,
                BinaryOperator::GtEq => Comparator::GtEq,
                other => {
                    return Err(Error::invalid_argument(
                        "filter",
                        format!("unsupported operator '{other}'"),
                    ))
                }
            };
            push_clause(left, comparator, right, out)
        }
        Expr::Like {
            negated,
            expr,
            pattern,
            ..
        } => {
            reject_negated(*negated)?;
            push_clause(expr, Comparator::Like, pattern, out)
        }
        Expr::ILike {
            negated,
            expr,
            pattern,
            ..
        } => {
            reject_negated(*negated)?;
            push_clause(expr, Comparator::ILike, pattern, out)
        }
        other => Err(Error::invalid_argument(
            "filter",
            format!("expected a comparison, found '{other}'"),
        )),
    }
}

fn reject_negated(negated: bool) -> Result<()> {
    if negated {
        return Err(Error::invalid_argument("filter", "NOT LIKE is not supported"));
    }
    Ok(())
}

fn push_clause(lhs: &Expr, comparator: Comparator, rhs: &Expr, out: &mut Vec<Clause>) -> Result<()> {
    let key = key_from_expr(lhs)?;
    let value = value_from_expr(rhs)?;
    match (&key.namespace, comparator, &value) {
        (FilterNamespace::Metric, _, FilterValue::Text(_)) => {
            return Err(Error::invalid_argument(
                "filter",
                format!("metric '{}' must be compared with a number", key.name),
            ));
        }
        (FilterNamespace::Param | FilterNamespace::Tag, _, FilterValue::Number(_)) => {
            return Err(Error::invalid_argument(
                "filter",
                format!("'{key}' must be compared with a quoted string"),
            ));
        }
        (_, Comparator::Like | Comparator::ILike, FilterValue::Number(_)) => {
            return Err(Error::invalid_argument("filter", "LIKE requires a string pattern"));
        }
        _ => {}
    }
    out.push(Clause {
        key,
        comparator,
        value,
    });
    Ok(())
}

fn namespace_from(ident: &Ident) -> Result<FilterNamespace> {
    match ident.value.to_ascii_lowercase().as_str() {
        "metric" | "metrics" => Ok(FilterNamespace::Metric),
        "param" | "params" | "parameter" | "parameters" => Ok(FilterNamespace::Param),
        "tag" | "tags" => Ok(FilterNamespace::Tag),
        "attribute" | "attributes" | "attr" | "run" => Ok(FilterNamespace::Attribute),
        other => Err(Error::invalid_argument(
            "filter",
            format!("unknown namespace '{other}'"),
        )),
    }
}

fn key_from_expr(expr: &Expr) -> Result<FilterKey> {
    match expr {
        Expr::Identifier(ident) => Ok(FilterKey::new(FilterNamespace::Attribute, &ident.value)),
        Expr::CompoundIdentifier(parts) if parts.len() >= 2 => {
            let namespace = namespace_from(&parts[0])?;
            let name = parts[1..]
                .iter()
                .map(|p| p.value.as_str())
                .collect::<Vec<_>>()
                .join(".");
            Ok(FilterKey::new(namespace, name))
        }
        other => Err(Error::invalid_argument(
            "filter",
            format!("expected a key like 'metrics.loss', found '{other}'"),
        )),
    }
}

fn value_from_expr(expr: &Expr) -> Result<FilterValue> {
    match expr {
        Expr::Value(Value::Number(n, _)) => n
            .parse::<f64>()
            .map(FilterValue::Number)
            .map_err(|e| Error::invalid_argument("filter", format!("bad number '{n}': {e}"))),
        Expr::Value(Value::SingleQuotedString(s) | Value::DoubleQuotedString(s)) => {
            Ok(FilterValue::Text(s.clone()))
        }
        // GenericDialect reads "abc" as a quoted identifier
        Expr::Identifier(ident) if ident.quote_style.is_some() => {
            Ok(FilterValue::Text(ident.value.clone()))
        }
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => match value_from_expr(expr)? {
            FilterValue::Number(n) => Ok(FilterValue::Number(-n)),
            FilterValue::Text(_) => Err(Error::invalid_argument(
                "filter",
                "unary minus applies to numbers only",
            )),
        },
        other => Err(Error::invalid_argument(
            "filter",
            format!("expected a literal, found '{other}'"),
        )),
    }
}
