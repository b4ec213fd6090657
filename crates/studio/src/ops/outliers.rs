// Outlier treatment: winsorizing or dropping rows outside computed bounds

use super::{OutlierAction, OutlierMethod, OutlierParams};
use crate::error::{Result, StudioError};
use crate::table::{float_array, numeric_values, quantile, replace_columns, require_columns, sorted_present};
use arrow::array::BooleanArray;
use arrow::compute::filter_record_batch;
use arrow::record_batch::RecordBatch;
use std::collections::HashMap;

fn validate(params: &OutlierParams) -> Result<()> {
    match params.method {
        OutlierMethod::Percentile => {
            let in_range = |p: f64| (0.0..=1.0).contains(&p);
            if !in_range(params.lower) || !in_range(params.upper) || params.lower >= params.upper {
                return Err(StudioError::invalid_operation(format!(
                    "percentile bounds must satisfy 0 <= lower < upper <= 1 (got {} and {})",
                    params.lower, params.upper
                )));
            }
        }
        OutlierMethod::Iqr => {
            if !params.factor.is_finite() || params.factor < 0.0 {
                return Err(StudioError::invalid_operation(format!(
                    "IQR factor must be a non-negative number (got {})",
                    params.factor
                )));
            }
        }
    }
    Ok(())
}

/// `None` when there is nothing to bound against, including bounds that are
/// NaN or inverted
fn bounds(sorted: &[f64], params: &OutlierParams) -> Option<(f64, f64)> {
    let limits = match params.method {
        OutlierMethod::Percentile => Some((quantile(sorted, params.lower)?, quantile(sorted, params.upper)?)),
        OutlierMethod::Iqr => {
            let q1 = quantile(sorted, 0.25)?;
            let q3 = quantile(sorted, 0.75)?;
            let reach = (q3 - q1) * params.factor;
            Some((q1 - reach, q3 + reach))
        }
    };
    limits.filter(|(lo, hi)| lo <= hi)
}

pub(super) fn apply(batch: &RecordBatch, params: &OutlierParams) -> Result<RecordBatch> {
    validate(params)?;
    let indices = require_columns(batch, &params.columns)?;

    let mut columns = Vec::with_capacity(indices.len());
    for index in indices {
        let values = numeric_values(batch, index)?;
        let limits = bounds(&sorted_present(&values), params);
        columns.push((index, values, limits));
    }

    match params.action {
        OutlierAction::Cap => {
            let mut replacements = HashMap::new();
            for (index, values, limits) in columns {
                let capped = values
                    .into_iter()
                    .map(|v| match (v, limits) {
                        (Some(v), Some((lo, hi))) => Some(v.clamp(lo, hi)),
                        (v, _) => v,
                    })
                    .collect();
                let _ = replacements.insert(index, float_array(capped));
            }
            replace_columns(batch, replacements)
        }
        OutlierAction::DropRows => {
            let keep: BooleanArray = (0..batch.num_rows())
                .map(|row| {
                    Some(columns.iter().all(|(_, values, limits)| match (values[row], limits) {
                        (Some(v), Some((lo, hi))) => v >= *lo && v <= *hi,
                        _ => true,
                    }))
                })
                .collect();
            Ok(filter_record_batch(batch, &keep)?)
        }
    }
}
