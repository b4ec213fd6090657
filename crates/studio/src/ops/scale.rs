// Numeric scaling

use super::{ScaleMethod, ScaleParams};
use crate::error::{Result, StudioError};
use crate::table::{float_array, numeric_values, quantile, replace_columns, require_columns, sorted_present};
use arrow::record_batch::RecordBatch;
use std::collections::HashMap;

pub(super) fn apply(batch: &RecordBatch, params: &ScaleParams) -> Result<RecordBatch> {
    let indices = require_columns(batch, &params.columns)?;

    let mut replacements = HashMap::new();
    for index in indices {
        let values = numeric_values(batch, index)?;
        let present = sorted_present(&values);
        if present.is_empty() {
            return Err(StudioError::invalid_operation(format!(
                "column '{}' has no non-missing values to scale",
                batch.schema().field(index).name()
            )));
        }

        let (mut center, mut spread) = statistics(&present, params.method);
        let mut unit = 1.0;
        if !(center.is_finite() && spread.is_finite()) {
            // Scaling is unchanged by a positive factor; work in units of the
            // largest magnitude so sums and squares stay finite.
            unit = present.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
            let rescaled: Vec<f64> = present.iter().map(|v| v / unit).collect();
            (center, spread) = statistics(&rescaled, params.method);
        }
        if !(center.is_finite() && spread.is_finite()) {
            return Err(StudioError::invalid_operation(format!(
                "column '{}' has values too large to scale",
                batch.schema().field(index).name()
            )));
        }

        // A zero spread maps every value onto the center.
        let scaled = values
            .into_iter()
            .map(|v| {
                v.map(|v| {
                    if spread == 0.0 {
                        0.0
                    } else {
                        (v / unit - center) / spread
                    }
                })
            })
            .collect();
        let _ = replacements.insert(index, float_array(scaled));
    }
    replace_columns(batch, replacements)
}

/// Center and spread of sorted, non-empty values
fn statistics(present: &[f64], method: ScaleMethod) -> (f64, f64) {
    match method {
        ScaleMethod::Standard => {
            let n = present.len() as f64;
            let mean = present.iter().sum::<f64>() / n;
            let variance = present.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            (mean, variance.sqrt())
        }
        ScaleMethod::MinMax => {
            let min = present[0];
            let max = present[present.len() - 1];
            (min, max - min)
        }
        ScaleMethod::Robust => {
            let median = quantile(present, 0.5).unwrap_or_default();
            let q1 = quantile(present, 0.25).unwrap_or_default();
            let q3 = quantile(present, 0.75).unwrap_or_default();
            (median, q3 - q1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::AsArray;
    use arrow::datatypes::Float64Type;
    use arrow_array::record_batch;

    fn scale(batch: &RecordBatch, method: ScaleMethod) -> Result<Vec<Option<f64>>> {
        let out = apply(
            batch,
            &ScaleParams {
                columns: vec!["x".into()],
                method,
            },
        )?;
        Ok(out.column(0).as_primitive::<Float64Type>().iter().collect())
    }

    #[test]
    fn test_standard_uses_population_deviation() {
        let batch = record_batch!(("x", Int64, [Some(2), Some(4), None, Some(4), Some(4), Some(5), Some(5), Some(7), Some(9)])).unwrap();
        let out = scale(&batch, ScaleMethod::Standard).unwrap();
        assert_eq!(out[0], Some(-1.5));
        assert_eq!(out[2], None);
        assert_eq!(out[8], Some(2.0));
    }

    #[test]
    fn test_min_max() {
        let batch = record_batch!(("x", Float64, [10.0, 15.0, 20.0])).unwrap();
        assert_eq!(
            scale(&batch, ScaleMethod::MinMax).unwrap(),
            vec![Some(0.0), Some(0.5), Some(1.0)]
        );
    }

    #[test]
    fn test_robust() {
        let batch = record_batch!(("x", Float64, [1.0, 2.0, 3.0, 4.0, 5.0])).unwrap();
        assert_eq!(
            scale(&batch, ScaleMethod::Robust).unwrap(),
            vec![Some(-1.0), Some(-0.5), Some(0.0), Some(0.5), Some(1.0)]
        );
    }

    #[test]
    fn test_constant_column_scales_to_zero() {
        let batch = record_batch!(("x", Float64, [3.0, 3.0])).unwrap();
        assert_eq!(scale(&batch, ScaleMethod::Standard).unwrap(), vec![Some(0.0), Some(0.0)]);
        assert_eq!(scale(&batch, ScaleMethod::MinMax).unwrap(), vec![Some(0.0), Some(0.0)]);
    }

    #[test]
    fn test_extreme_finite_range() {
        let batch = record_batch!(("x", Float64, [-1e308, 0.0, 1e308])).unwrap();
        assert_eq!(
            scale(&batch, ScaleMethod::MinMax).unwrap(),
            vec![Some(0.0), Some(0.5), Some(1.0)]
        );
        let standard = scale(&batch, ScaleMethod::Standard).unwrap();
        assert!(standard.iter().flatten().all(|v| v.is_finite()));
        assert_eq!(standard[1], Some(0.0));

        let batch = record_batch!(("x", Float64, [1.0, f64::INFINITY])).unwrap();
        assert_eq!(scale(&batch, ScaleMethod::MinMax).unwrap_err().code(), "INVALID_OPERATION");
    }

    #[test]
    fn test_text_column_rejected() {
        let batch = record_batch!(("x", Utf8, ["a"])).unwrap();
        assert_eq!(scale(&batch, ScaleMethod::Standard).unwrap_err().code(), "INVALID_COLUMNS");
    }
}
