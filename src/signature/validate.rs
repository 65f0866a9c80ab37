//! Signature validation

use arrow::array::Array;
use tracing::warn;

use super::{ColSpec, DataType, MismatchPolicy, ModelData, Schema, SchemaEnforcement};
use crate::{Error, Result};

fn mismatch(field: &str, expected: impl ToString, actual: impl ToString) -> Error {
    Error::SignatureMismatch {
        field: field.to_string(),
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

/// Check that `data` conforms to `schema`.
///
/// Every required column must be present, non-null and of a type that
/// widens to the declared one. Undeclared columns fail under
/// [`SchemaEnforcement::Strict`] and are ignored under `Lenient`.
///
/// # Errors
///
/// `SignatureMismatch` naming the first offending field.
pub fn validate(schema: &Schema, data: &ModelData, enforcement: SchemaEnforcement) -> Result<()> {
    match (schema.is_tensor(), data) {
        (false, ModelData::Table(batch)) => {
            for spec in schema.columns() {
                let name = spec.label();
                let Some(array) = batch.column_by_name(name) else {
                    if spec.required {
                        return Err(mismatch(name, &spec.data_type, "missing column"));
                    }
                    continue;
                };
                check_type(spec, array.data_type())?;
                if spec.required && array.null_count() > 0 {
                    return Err(mismatch(
                        name,
                        format!("non-null {}", spec.data_type),
                        format!("{} null values", array.null_count()),
                    ));
                }
            }
            if enforcement == SchemaEnforcement::Strict {
                let batch_schema = batch.schema();
                if let Some(extra) = batch_schema
                    .fields()
                    .iter()
                    .find(|f| schema.column(f.name()).is_none())
                {
                    return Err(mismatch(extra.name(), "no such column", extra.data_type()));
                }
            }
            Ok(())
        }
        (true, ModelData::Tensor { values, shape }) => {
            let spec = &schema.columns()[0];
            check_type(spec, values.data_type())?;
            if let Some(expected) = &spec.shape {
                let conforms = expected.len() == shape.len()
                    && expected
                        .iter()
                        .zip(shape)
                        .all(|(want, got)| *want == -1 || want == got);
                if !conforms {
                    return Err(mismatch(
                        spec.label(),
                        format!("shape {expected:?}"),
                        format!("shape {shape:?}"),
                    ));
                }
            }
            Ok(())
        }
        (true, ModelData::Table(_)) => Err(mismatch("<input>", "tensor", "table")),
        (false, ModelData::Tensor { .. }) => Err(mismatch("<input>", "table", "tensor")),
    }
}

fn check_type(spec: &ColSpec, actual: &arrow::datatypes::DataType) -> Result<()> {
    let converted = DataType::from_arrow(actual)
        .map_err(|_| mismatch(spec.label(), &spec.data_type, actual))?;
    if converted.widens_to(&spec.data_type) {
        Ok(())
    } else {
        Err(mismatch(spec.label(), &spec.data_type, converted))
    }
}

/// Validate and apply the mismatch policy.
///
/// Under [`MismatchPolicy::LogAndProceed`] a failed validation is logged at
/// `warn` and `Ok` is returned.
///
/// # Errors
///
/// `SignatureMismatch` under [`MismatchPolicy::Reject`].
pub fn enforce(
    schema: &Schema,
    data: &ModelData,
    enforcement: SchemaEnforcement,
    policy: MismatchPolicy,
    role: &str,
) -> Result<()> {
    match validate(schema, data, enforcement) {
        Err(err) if policy == MismatchPolicy::LogAndProceed => {
            warn!(role, error = %err, "signature mismatch ignored by policy");
            Ok(())
        }
        other => other,
    }
}
