//! Signature inference from example data

use arrow::array::Array;

use super::{ColSpec, DataType, ModelData, ModelSignature, Schema};
use crate::Result;

/// Infer a schema from example data.
///
/// Table columns keep their order; a column containing nulls is inferred as
/// optional. A tensor becomes a single unnamed column whose first dimension
/// is variable (`-1`).
///
/// # Errors
///
/// `InvalidArgument` for column types with no signature equivalent.
pub fn infer_schema(data: &ModelData) -> Result<Schema> {
    match data {
        ModelData::Table(batch) => {
            let schema = batch.schema();
            let mut columns = Vec::with_capacity(schema.fields().len());
            for (field, array) in schema.fields().iter().zip(batch.columns()) {
                let mut spec = ColSpec::new(field.name(), DataType::from_arrow(field.data_type())?);
                if array.null_count() > 0 {
                    spec = spec.optional();
                }
                columns.push(spec);
            }
            Schema::new(columns)
        }
        ModelData::Tensor { values, shape } => {
            let mut dims = shape.clone();
            if let Some(first) = dims.first_mut() {
                *first = -1;
            }
            Schema::new(vec![ColSpec::tensor(
                DataType::from_arrow(values.data_type())?,
                dims,
            )])
        }
    }
}

/// Infer a signature from example input and, optionally, example output.
///
/// # Errors
///
/// As [`infer_schema`].
pub fn infer_signature(input: &ModelData, output: Option<&ModelData>) -> Result<ModelSignature> {
    let mut signature = ModelSignature::new(infer_schema(input)?);
    if let Some(output) = output {
        signature = signature.with_outputs(infer_schema(output)?);
    }
    Ok(signature)
}
