//! Signature Engine
//!
//! A [`ModelSignature`] declares the columns (or the single tensor) a model
//! accepts and produces. Signatures are inferred from example data
//! ([`infer_signature`]) and enforced at predict time ([`validate`]).
//!
//! ## Widening
//!
//! A value of type `A` satisfies a column declared `B` when `A` widens to
//! `B` without loss:
//!
//! ```text
//! integer -> long -> double
//! integer -> float -> double
//! ```
//!
//! Narrowing (`double` into `integer`) is always a mismatch.

mod infer;
mod validate;

pub use infer::{infer_schema, infer_signature};
pub use validate::{enforce, validate};

use std::collections::HashSet;
use std::fmt;

use arrow::array::ArrayRef;
use arrow::datatypes::DataType as ArrowType;
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Column element type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// true/false
    Boolean,
    /// 32-bit (or narrower) signed integer
    Integer,
    /// 64-bit integer
    Long,
    /// 32-bit float
    Float,
    /// 64-bit float
    Double,
    /// UTF-8 text
    String,
    /// Raw bytes
    Binary,
    /// Date or timestamp
    Datetime,
    /// Variable-length list of the element type
    Array(Box<DataType>),
}

impl DataType {
    /// Whether values of `self` can be fed to a column declared `target`.
    #[must_use]
    pub fn widens_to(&self, target: &Self) -> bool {
        match (self, target) {
            (a, b) if a == b => true,
            (Self::Integer, Self::Long | Self::Float | Self::Double)
            | (Self::Long | Self::Float, Self::Double) => true,
            (Self::Array(a), Self::Array(b)) => a.widens_to(b),
            _ => false,
        }
    }

    /// Map an Arrow type onto the signature type system.
    ///
    /// Unsigned integers map to the smallest signed type holding every
    /// value. `UInt64` has none and maps to `Double`, which keeps the
    /// magnitude of values above `i64::MAX` at the cost of precision past
    /// 2^53.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for Arrow types with no signature equivalent
    /// (structs, maps, unions, decimals).
    pub fn from_arrow(data_type: &ArrowType) -> Result<Self> {
        Ok(match data_type {
            ArrowType::Boolean => Self::Boolean,
            ArrowType::Int8
            | ArrowType::Int16
            | ArrowType::Int32
            | ArrowType::UInt8
            | ArrowType::UInt16 => Self::Integer,
            ArrowType::Int64 | ArrowType::UInt32 => Self::Long,
            ArrowType::Float16 | ArrowType::Float32 => Self::Float,
            ArrowType::Float64 | ArrowType::UInt64 => Self::Double,
            ArrowType::Utf8 | ArrowType::LargeUtf8 | ArrowType::Utf8View => Self::String,
            ArrowType::Binary
            | ArrowType::LargeBinary
            | ArrowType::BinaryView
            | ArrowType::FixedSizeBinary(_) => Self::Binary,
            ArrowType::Date32 | ArrowType::Date64 | ArrowType::Timestamp(_, _) => Self::Datetime,
            ArrowType::List(field)
            | ArrowType::LargeList(field)
            | ArrowType::FixedSizeList(field, _) => {
                Self::Array(Box::new(Self::from_arrow(field.data_type())?))
            }
            other => {
                return Err(Error::invalid_argument(
                    "data_type",
                    format!("arrow type {other} has no signature equivalent"),
                ))
            }
        })
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean => f.write_str("boolean"),
            Self::Integer => f.write_str("integer"),
            Self::Long => f.write_str("long"),
            Self::Float => f.write_str("float"),
            Self::Double => f.write_str("double"),
            Self::String => f.write_str("string"),
            Self::Binary => f.write_str("binary"),
            Self::Datetime => f.write_str("datetime"),
            Self::Array(inner) => write!(f, "array<{inner}>"),
        }
    }
}

fn default_required() -> bool {
    true
}

/// One input or output column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColSpec {
    /// Column name; `None` for a tensor-style schema
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Element type
    #[serde(rename = "type")]
    pub data_type: DataType,
    /// Whether the column must be present and non-null
    #[serde(default = "default_required")]
    pub required: bool,
    /// Tensor shape, `-1` for a variable dimension
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<Vec<i64>>,
}

impl ColSpec {
    /// A required named column.
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: Some(name.into()),
            data_type,
            required: true,
            shape: None,
        }
    }

    /// An unnamed tensor column.
    #[must_use]
    pub const fn tensor(data_type: DataType, shape: Vec<i64>) -> Self {
        Self {
            name: None,
            data_type,
            required: true,
            shape: Some(shape),
        }
    }

    /// Mark the column optional.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Name for error messages.
    #[must_use]
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("<tensor>")
    }
}

/// Ordered column list.
///
/// Either every column is named (a table) or there is exactly one unnamed
/// column (a tensor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Schema {
    columns: Vec<ColSpec>,
}

impl Schema {
    /// Build a schema.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty schema, duplicate names, or a mix of
    /// named and unnamed columns.
    pub fn new(columns: Vec<ColSpec>) -> Result<Self> {
        if columns.is_empty() {
            return Err(Error::invalid_argument("schema", "schema must have at least one column"));
        }
        let unnamed = columns.iter().filter(|c| c.name.is_none()).count();
        if unnamed > 0 && columns.len() > 1 {
            return Err(Error::invalid_argument(
                "schema",
                "an unnamed tensor column cannot be combined with other columns",
            ));
        }
        let mut seen = HashSet::new();
        for name in columns.iter().filter_map(|c| c.name.as_deref()) {
            if !seen.insert(name) {
                return Err(Error::invalid_argument(
                    "schema",
                    format!("duplicate column '{name}'"),
                ));
            }
        }
        Ok(Self { columns })
    }

    /// Columns in declaration order.
    #[must_use]
    pub fn columns(&self) -> &[ColSpec] {
        &self.columns
    }

    /// Whether this is a single unnamed tensor.
    #[must_use]
    pub fn is_tensor(&self) -> bool {
        self.columns.len() == 1 && self.columns[0].name.is_none()
    }

    /// Column by name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColSpec> {
        self.columns.iter().find(|c| c.name.as_deref() == Some(name))
    }

    /// Names of all named columns.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().filter_map(|c| c.name.as_deref()).collect()
    }
}

impl<'de> Deserialize<'de> for Schema {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            columns: Vec<ColSpec>,
        }
        let raw = Raw::deserialize(deserializer)?;
        Self::new(raw.columns).map_err(serde::de::Error::custom)
    }
}

/// Declared input and (optional) output schemas of a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSignature {
    /// Input schema
    pub inputs: Schema,
    /// Output schema, if recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Schema>,
}

impl ModelSignature {
    /// A signature with inputs only.
    #[must_use]
    pub const fn new(inputs: Schema) -> Self {
        Self {
            inputs,
            outputs: None,
        }
    }

    /// Attach an output schema.
    #[must_use]
    pub fn with_outputs(mut self, outputs: Schema) -> Self {
        self.outputs = Some(outputs);
        self
    }
}

/// How columns not declared in the schema are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaEnforcement {
    /// Undeclared columns are a mismatch
    #[default]
    Strict,
    /// Undeclared columns are ignored
    Lenient,
}

/// What happens when validation fails at predict time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchPolicy {
    /// Fail with `SignatureMismatch`
    #[default]
    Reject,
    /// Log a warning and call the model anyway
    LogAndProceed,
}

/// Structured model input or output.
#[derive(Debug, Clone)]
pub enum ModelData {
    /// Named columns
    Table(RecordBatch),
    /// A single unnamed tensor, row-major
    Tensor {
        /// Flat element values
        values: ArrayRef,
        /// Dimensions; the product equals `values.len()`
        shape: Vec<i64>,
    },
}

impl ModelData {
    /// Build a tensor, checking that `shape` matches the element count.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the shape has negative dimensions or does not
    /// multiply out to `values.len()`.
    pub fn tensor(values: ArrayRef, shape: Vec<i64>) -> Result<Self> {
        let product = shape.iter().try_fold(1usize, |acc, &d| {
            usize::try_from(d).ok().and_then(|d| acc.checked_mul(d))
        });
        if product != Some(values.len()) {
            return Err(Error::invalid_argument(
                "shape",
                format!("shape {shape:?} does not match {} elements", values.len()),
            ));
        }
        Ok(Self::Tensor { values, shape })
    }

    /// Number of rows (first tensor dimension).
    #[must_use]
    pub fn num_rows(&self) -> usize {
        match self {
            Self::Table(batch) => batch.num_rows(),
            Self::Tensor { shape, .. } => shape
                .first()
                .and_then(|d| usize::try_from(*d).ok())
                .unwrap_or(0),
        }
    }

    /// The record batch, if this is a table.
    #[must_use]
    pub const fn as_table(&self) -> Option<&RecordBatch> {
        match self {
            Self::Table(batch) => Some(batch),
            Self::Tensor { .. } => None,
        }
    }
}

impl From<RecordBatch> for ModelData {
    fn from(batch: RecordBatch) -> Self {
        Self::Table(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Float64Array;
    use arrow::datatypes::{Field, TimeUnit};
    use std::sync::Arc;

    #[test]
    fn test_widening_policy() {
        assert!(DataType::Integer.widens_to(&DataType::Double));
        assert!(DataType::Integer.widens_to(&DataType::Long));
        assert!(DataType::Float.widens_to(&DataType::Double));
        assert!(!DataType::Double.widens_to(&DataType::Integer));
        assert!(!DataType::Long.widens_to(&DataType::Float));
        assert!(!DataType::String.widens_to(&DataType::Binary));
        let ints = DataType::Array(Box::new(DataType::Integer));
        let doubles = DataType::Array(Box::new(DataType::Double));
        assert!(ints.widens_to(&doubles));
        assert!(!doubles.widens_to(&ints));
    }

    #[test]
    fn test_from_arrow() {
        assert_eq!(DataType::from_arrow(&ArrowType::Int32).unwrap(), DataType::Integer);
        assert_eq!(DataType::from_arrow(&ArrowType::Int64).unwrap(), DataType::Long);
        assert_eq!(DataType::from_arrow(&ArrowType::Float64).unwrap(), DataType::Double);
        assert_eq!(DataType::from_arrow(&ArrowType::UInt32).unwrap(), DataType::Long);
        assert_eq!(DataType::from_arrow(&ArrowType::UInt64).unwrap(), DataType::Double);
        assert_eq!(
            DataType::from_arrow(&ArrowType::Timestamp(TimeUnit::Millisecond, None)).unwrap(),
            DataType::Datetime
        );
        let list = ArrowType::List(Arc::new(Field::new("item", ArrowType::Float32, true)));
        assert_eq!(
            DataType::from_arrow(&list).unwrap(),
            DataType::Array(Box::new(DataType::Float))
        );
        assert!(DataType::from_arrow(&ArrowType::Null).is_err());
    }

    #[test]
    fn test_schema_rules() {
        assert!(Schema::new(vec![]).is_err());
        assert!(Schema::new(vec![
            ColSpec::new("a", DataType::Double),
            ColSpec::new("a", DataType::Long),
        ])
        .is_err());
        assert!(Schema::new(vec![
            ColSpec::new("a", DataType::Double),
            ColSpec::tensor(DataType::Double, vec![-1, 2]),
        ])
        .is_err());
        let tensor = Schema::new(vec![ColSpec::tensor(DataType::Float, vec![-1, 4])]).unwrap();
        assert!(tensor.is_tensor());
    }

    #[test]
    fn test_signature_json_shape() {
        let signature = ModelSignature::new(
            Schema::new(vec![
                ColSpec::new("x", DataType::Double),
                ColSpec::new("tags", DataType::Array(Box::new(DataType::String))).optional(),
            ])
            .unwrap(),
        );
        let json = serde_json::to_value(&signature).unwrap();
        assert_eq!(json["inputs"]["columns"][0]["type"], "double");
        assert_eq!(json["inputs"]["columns"][1]["type"]["array"], "string");
        assert_eq!(json["inputs"]["columns"][1]["required"], false);

        let back: ModelSignature = serde_json::from_value(json).unwrap();
        assert_eq!(back, signature);

        let invalid = serde_json::json!({"inputs": {"columns": []}});
        assert!(serde_json::from_value::<ModelSignature>(invalid).is_err());
    }

    #[test]
    fn test_tensor_shape_check() {
        let values: ArrayRef = Arc::new(Float64Array::from(vec![1.0, 2.0, 3.0, 4.0]));
        let data = ModelData::tensor(Arc::clone(&values), vec![2, 2]).unwrap();
        assert_eq!(data.num_rows(), 2);
        assert!(ModelData::tensor(values, vec![3, 2]).is_err());
    }

    #[test]
    fn test_policy_defaults() {
        assert_eq!(SchemaEnforcement::default(), SchemaEnforcement::Strict);
        assert_eq!(MismatchPolicy::default(), MismatchPolicy::Reject);
        assert_eq!(
            serde_json::to_string(&MismatchPolicy::LogAndProceed).unwrap(),
            "\"log_and_proceed\""
        );
    }
}
