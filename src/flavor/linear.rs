//! `linear` flavor: a JSON-serialized linear model
//!
//! Small enough to exercise the whole save/load/predict path without an ML
//! framework behind it.

use std::any::Any;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Array};
use arrow::compute::cast;
use arrow::datatypes::DataType as ArrowType;
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{Flavor, ModelFiles, Predictor, SaveContext};
use crate::signature::ModelData;
use crate::{Error, Result};

const MODEL_FILE: &str = "model.json";

/// `prediction = intercept + sum(weight_i * feature_i)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    feature_names: Vec<String>,
    weights: Vec<f64>,
    intercept: f64,
}

impl LinearModel {
    /// Output column name for table predictions.
    pub const OUTPUT_COLUMN: &'static str = "prediction";

    /// Create a model; `weights[i]` applies to `feature_names[i]`.
    #[must_use]
    pub const fn new(feature_names: Vec<String>, weights: Vec<f64>, intercept: f64) -> Self {
        Self {
            feature_names,
            weights,
            intercept,
        }
    }

    /// Feature names, in weight order.
    #[must_use]
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Weights.
    #[must_use]
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Intercept.
    #[must_use]
    pub const fn intercept(&self) -> f64 {
        self.intercept
    }

    fn check(&self) -> Result<()> {
        if self.weights.is_empty() || self.weights.len() != self.feature_names.len() {
            return Err(Error::invalid_argument(
                "model",
                format!(
                    "{} weights for {} features",
                    self.weights.len(),
                    self.feature_names.len()
                ),
            ));
        }
        Ok(())
    }
}

fn as_f64(array: &ArrayRef) -> Result<Float64Array> {
    let casted = cast(array, &ArrowType::Float64)?;
    casted
        .as_any()
        .downcast_ref::<Float64Array>()
        .cloned()
        .ok_or_else(|| Error::invalid_argument("input", "expected numeric values"))
}

impl Predictor for LinearModel {
    fn predict(&self, input: &ModelData) -> Result<ModelData> {
        match input {
            ModelData::Table(batch) => {
                let columns = self
                    .feature_names
                    .iter()
                    .map(|name| {
                        batch
                            .column_by_name(name)
                            .ok_or_else(|| {
                                Error::invalid_argument("input", format!("missing feature '{name}'"))
                            })
                            .and_then(as_f64)
                    })
                    .collect::<Result<Vec<_>>>()?;

                let predictions: Float64Array = (0..batch.num_rows())
                    .map(|row| {
                        columns.iter().zip(&self.weights).try_fold(
                            self.intercept,
                            |acc, (column, weight)| {
                                column.is_valid(row).then(|| acc + weight * column.value(row))
                            },
                        )
                    })
                    .collect();
                let output = RecordBatch::try_from_iter(vec![(
                    Self::OUTPUT_COLUMN,
                    Arc::new(predictions) as ArrayRef,
                )])?;
                Ok(ModelData::Table(output))
            }
            ModelData::Tensor { values, shape } => {
                let width = self.weights.len();
                let rows = match shape.as_slice() {
                    [rows, cols] if usize::try_from(*cols).ok() == Some(width) => {
                        usize::try_from(*rows).unwrap_or(0)
                    }
                    _ => {
                        return Err(Error::invalid_argument(
                            "input",
                            format!("expected tensor shape [n, {width}], got {shape:?}"),
                        ))
                    }
                };
                let values = as_f64(values)?;
                let predictions: Float64Array = (0..rows)
                    .map(|row| {
                        (0..width).try_fold(self.intercept, |acc, col| {
                            let idx = row * width + col;
                            values
                                .is_valid(idx)
                                .then(|| acc + self.weights[col] * values.value(idx))
                        })
                    })
                    .collect();
                let rows = i64::try_from(rows).unwrap_or(i64::MAX);
                ModelData::tensor(Arc::new(predictions), vec![rows])
            }
        }
    }
}

/// Saves and loads [`LinearModel`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearFlavor;

impl LinearFlavor {
    /// Flavor name.
    pub const NAME: &'static str = "linear";
}

impl Flavor for LinearFlavor {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn save(&self, model: &dyn Any, ctx: &mut SaveContext) -> Result<Value> {
        let model = model.downcast_ref::<LinearModel>().ok_or_else(|| {
            Error::invalid_argument("model", "the linear flavor only saves LinearModel")
        })?;
        model.check()?;
        ctx.write_json(MODEL_FILE, model)?;
        Ok(json!({
            "model_file": MODEL_FILE,
            "n_features": model.weights.len(),
        }))
    }

    fn load(&self, config: &Value, files: &ModelFiles) -> Result<Box<dyn Predictor>> {
        let file = config
            .get("model_file")
            .and_then(Value::as_str)
            .unwrap_or(MODEL_FILE);
        let model: LinearModel = files.read_json(file)?;
        model.check()?;
        Ok(Box::new(model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int64Array;

    fn model() -> LinearModel {
        LinearModel::new(vec!["a".into(), "b".into()], vec![2.0, -1.0], 0.5)
    }

    #[test]
    fn test_predict_table_casts_integers() {
        let batch = RecordBatch::try_from_iter(vec![
            ("a", Arc::new(Int64Array::from(vec![1, 2])) as ArrayRef),
            ("b", Arc::new(Float64Array::from(vec![Some(1.0), None])) as ArrayRef),
        ])
        .unwrap();
        let output = model().predict(&ModelData::Table(batch)).unwrap();
        let table = output.as_table().unwrap();
        let predictions = table
            .column_by_name(LinearModel::OUTPUT_COLUMN)
            .unwrap()
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert!((predictions.value(0) - 1.5).abs() < 1e-12);
        assert!(predictions.is_null(1));
    }

    #[test]
    fn test_predict_tensor() {
        let values: ArrayRef = Arc::new(Float64Array::from(vec![1.0, 1.0, 3.0, 2.0]));
        let input = ModelData::tensor(values, vec![2, 2]).unwrap();
        let ModelData::Tensor { values, shape } = model().predict(&input).unwrap() else {
            panic!("expected tensor output");
        };
        assert_eq!(shape, vec![2]);
        let values = values.as_any().downcast_ref::<Float64Array>().unwrap();
        assert_eq!(values.values().to_vec(), vec![1.5, 4.5]);

        let bad = ModelData::tensor(Arc::new(Float64Array::from(vec![1.0; 3])), vec![1, 3]).unwrap();
        assert!(model().predict(&bad).is_err());
    }

    #[test]
    fn test_flavor_save_and_load() {
        let mut ctx = SaveContext::new();
        let config = LinearFlavor.save(&model(), &mut ctx).unwrap();
        assert_eq!(config["n_features"], 2);

        let files = ModelFiles::new(ctx.files().clone());
        let predictor = LinearFlavor.load(&config, &files).unwrap();
        let batch = RecordBatch::try_from_iter(vec![
            ("a", Arc::new(Float64Array::from(vec![0.0])) as ArrayRef),
            ("b", Arc::new(Float64Array::from(vec![0.0])) as ArrayRef),
        ])
        .unwrap();
        assert_eq!(predictor.predict(&batch.into()).unwrap().num_rows(), 1);
    }

    #[test]
    fn test_flavor_rejects_foreign_models() {
        let mut ctx = SaveContext::new();
        let err = LinearFlavor.save(&"not a model", &mut ctx).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidArgument);
    }
}
