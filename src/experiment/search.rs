//! Ordering and keyset pagination for searches
//!
//! Page tokens encode the sort key of the last row returned, not an offset.
//! Resuming a traversal selects rows strictly after that key, so rows
//! appended while a client pages through results never shift earlier rows
//! into a page twice or out of the traversal.

use std::cmp::Ordering;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::filter::{FieldValue, FilterKey, FilterNamespace, FilterSubject};
use super::LifecycleStage;
use crate::error::Entity;
use crate::{Error, Result};

/// Which lifecycle stages a search or lookup includes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ViewType {
    /// Only live entities (default)
    #[default]
    ActiveOnly,
    /// Only soft-deleted entities
    DeletedOnly,
    /// Both
    All,
}

impl ViewType {
    /// Whether an entity in `stage` is visible under this view.
    #[must_use]
    pub fn includes(self, stage: LifecycleStage) -> bool {
        match self {
            Self::ActiveOnly => stage == LifecycleStage::Active,
            Self::DeletedOnly => stage == LifecycleStage::Deleted,
            Self::All => true,
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::ActiveOnly => "active",
            Self::DeletedOnly => "deleted",
            Self::All => "all",
        }
    }
}

/// One `key [ASC|DESC]` ordering clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    /// Key to sort by
    pub key: FilterKey,
    /// Ascending when true
    pub ascending: bool,
}

impl OrderBy {
    /// Ascending order on `key`.
    #[must_use]
    pub const fn asc(key: FilterKey) -> Self {
        Self {
            key,
            ascending: true,
        }
    }

    /// Descending order on `key`.
    #[must_use]
    pub const fn desc(key: FilterKey) -> Self {
        Self {
            key,
            ascending: false,
        }
    }

    /// Parse `"metrics.loss DESC"`, `"start_time"` and similar.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a malformed key.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let (key, ascending) = match trimmed.rsplit_once(char::is_whitespace) {
            Some((key, dir)) if dir.eq_ignore_ascii_case("asc") => (key, true),
            Some((key, dir)) if dir.eq_ignore_ascii_case("desc") => (key, false),
            _ => (trimmed, true),
        };
        Ok(Self {
            key: FilterKey::parse(key.trim())?,
            ascending,
        })
    }

    /// Parse a list of clauses, rejecting keys outside the allowed set.
    pub(crate) fn parse_all(
        inputs: &[String],
        namespaces: &[FilterNamespace],
        attributes: &[&str],
    ) -> Result<Vec<Self>> {
        inputs
            .iter()
            .map(|s| {
                let order = Self::parse(s)?;
                super::filter::check_key(&order.key, namespaces, attributes)?;
                Ok(order)
            })
            .collect()
    }
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// Results in sort order
    pub items: Vec<T>,
    /// Token for the next page; `None` when the traversal is complete
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum SortValue {
    Null,
    Number(#[serde(with = "f64_bits")] f64),
    Text(String),
}

/// JSON has no infinities, so cursor numbers travel as their bit pattern.
mod f64_bits {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.to_bits())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        u64::deserialize(deserializer).map(f64::from_bits)
    }
}

impl SortValue {
    fn from_field(field: Option<FieldValue<'_>>) -> Self {
        match field {
            None => Self::Null,
            Some(FieldValue::Number(n)) if n.is_nan() => Self::Null,
            Some(FieldValue::Number(n)) => Self::Number(n),
            Some(FieldValue::Text(t)) => Self::Text(t.into_owned()),
        }
    }

    fn natural_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.total_cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Number(_), Self::Text(_)) => Ordering::Less,
            (Self::Text(_), Self::Number(_)) => Ordering::Greater,
            (Self::Null, _) | (_, Self::Null) => Ordering::Equal,
        }
    }
}

/// Full sort key of one row; the id breaks ties so the order is total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct SortKey {
    values: Vec<SortValue>,
    id: String,
}

impl SortKey {
    pub(crate) fn of(subject: &impl FilterSubject, orders: &[OrderBy], id: &str) -> Self {
        Self {
            values: orders
                .iter()
                .map(|o| SortValue::from_field(subject.lookup(&o.key)))
                .collect(),
            id: id.to_string(),
        }
    }

    fn cmp_with(&self, other: &Self, orders: &[OrderBy]) -> Ordering {
        for (i, order) in orders.iter().enumerate() {
            let (a, b) = (&self.values[i], &other.values[i]);
            // nulls sort last in both directions
            let ord = match (a, b) {
                (SortValue::Null, SortValue::Null) => Ordering::Equal,
                (SortValue::Null, _) => Ordering::Greater,
                (_, SortValue::Null) => Ordering::Less,
                _ if order.ascending => a.natural_cmp(b),
                _ => b.natural_cmp(a),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        self.id.cmp(&other.id)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Cursor {
    query: String,
    after: SortKey,
}

/// Stable digest of the query shape a token belongs to.
pub(crate) fn query_fingerprint(scope: &[String], filter: &str, orders: &[String], view: ViewType) -> String {
    let mut hasher = Sha256::new();
    let mut scope: Vec<&String> = scope.iter().collect();
    scope.sort();
    for part in scope {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update([1u8]);
    hasher.update(filter.trim().as_bytes());
    hasher.update([1u8]);
    for order in orders {
        hasher.update(order.trim().as_bytes());
        hasher.update([0u8]);
    }
    hasher.update(view.as_str().as_bytes());
    let digest = hasher.finalize();
    digest[..12].iter().map(|b| format!("{b:02x}")).collect()
}

fn decode_token(token: &str, fingerprint: &str) -> Result<SortKey> {
    let invalid = |reason: &str| Error::invalid_argument("page_token", reason.to_string());
    let bytes = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| invalid("not a valid page token"))?;
    let cursor: Cursor =
        serde_json::from_slice(&bytes).map_err(|_| invalid("not a valid page token"))?;
    if cursor.query != fingerprint {
        return Err(invalid("token belongs to a different query"));
    }
    Ok(cursor.after)
}

fn encode_token(after: SortKey, fingerprint: &str) -> Result<String> {
    let cursor = Cursor {
        query: fingerprint.to_string(),
        after,
    };
    let bytes = serde_json::to_vec(&cursor).map_err(|e| {
        Error::invalid_argument(Entity::PageToken.to_string(), e.to_string())
    })?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Sort `rows`, resume after `page_token` and cut one page.
pub(crate) fn paginate<T>(
    mut rows: Vec<(SortKey, T)>,
    orders: &[OrderBy],
    fingerprint: &str,
    page_token: Option<&str>,
    max_results: usize,
) -> Result<Page<T>> {
    let after = page_token
        .filter(|t| !t.is_empty())
        .map(|t| decode_token(t, fingerprint))
        .transpose()?;

    rows.sort_by(|(a, _), (b, _)| a.cmp_with(b, orders));
    if let Some(after) = &after {
        rows.retain(|(key, _)| key.cmp_with(after, orders) == Ordering::Greater);
    }

    let has_more = rows.len() > max_results;
    rows.truncate(max_results);
    let next_page_token = if has_more {
        rows.last()
            .map(|(key, _)| encode_token(key.clone(), fingerprint))
            .transpose()?
    } else {
        None
    };
    Ok(Page {
        items: rows.into_iter().map(|(_, item)| item).collect(),
        next_page_token,
    })
}
