// Missing-value imputation

use super::{FillValue, ImputeParams, ImputeStrategy};
use crate::error::{Result, StudioError};
use crate::table::{
    display_values, float_array, numeric_values, replace_columns, require_columns, sorted_present,
};
use arrow::array::{Array, ArrayRef, BooleanArray, Scalar, StringArray};
use arrow::compute::kernels::zip::zip;
use arrow::compute::{CastOptions, cast_with_options, filter_record_batch, is_null};
use arrow::record_batch::RecordBatch;
use std::collections::HashMap;

pub(super) fn apply(batch: &RecordBatch, params: &ImputeParams) -> Result<RecordBatch> {
    let indices = require_columns(batch, &params.columns)?;

    let mut replacements = HashMap::new();
    for &index in &indices {
        let filled = match params.strategy {
            ImputeStrategy::DropRows => return drop_incomplete_rows(batch, &indices),
            ImputeStrategy::Mean | ImputeStrategy::Median => {
                fill_numeric(batch, index, params.strategy)?
            }
            ImputeStrategy::Mode => fill_mode(batch, index)?,
            ImputeStrategy::Constant => {
                let value = params.fill_value.as_ref().ok_or_else(|| {
                    StudioError::invalid_operation("constant imputation requires a fill_value")
                })?;
                fill_constant(batch, index, value)?
            }
        };
        let _ = replacements.insert(index, filled);
    }
    replace_columns(batch, replacements)
}

fn column_name(batch: &RecordBatch, index: usize) -> String {
    batch.schema().field(index).name().clone()
}

fn fill_numeric(batch: &RecordBatch, index: usize, strategy: ImputeStrategy) -> Result<ArrayRef> {
    let values = numeric_values(batch, index)?;
    let present = sorted_present(&values);
    if present.is_empty() {
        return Err(StudioError::invalid_operation(format!(
            "column '{}' has no non-missing values to compute a {}",
            column_name(batch, index),
            strategy.as_str()
        )));
    }

    let fill = if strategy == ImputeStrategy::Mean {
        present.iter().sum::<f64>() / present.len() as f64
    } else {
        crate::table::quantile(&present, 0.5).unwrap_or_default()
    };

    Ok(float_array(
        values.into_iter().map(|v| Some(v.unwrap_or(fill))).collect(),
    ))
}

/// Most frequent value; ties go to the value seen first
fn fill_mode(batch: &RecordBatch, index: usize) -> Result<ArrayRef> {
    let column = batch.column(index);
    let rendered = display_values(column)?;

    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (row, value) in rendered.iter().enumerate() {
        if let Some(value) = value {
            let entry = counts.entry(value.as_str()).or_insert((0, row));
            entry.0 += 1;
        }
    }

    let Some((_, (_, first_row))) = counts
        .into_iter()
        .max_by(|(_, (ca, ra)), (_, (cb, rb))| ca.cmp(cb).then(rb.cmp(ra)))
    else {
        return Err(StudioError::invalid_operation(format!(
            "column '{}' has no non-missing values to compute a mode",
            column_name(batch, index)
        )));
    };

    fill_nulls(column, column.slice(first_row, 1))
}

fn fill_constant(batch: &RecordBatch, index: usize, value: &FillValue) -> Result<ArrayRef> {
    let column = batch.column(index);
    let literal: ArrayRef = std::sync::Arc::new(StringArray::from(vec![value.to_string()]));
    let options = CastOptions {
        safe: false,
        ..Default::default()
    };
    let fill = cast_with_options(&literal, column.data_type(), &options).map_err(|_| {
        StudioError::invalid_operation(format!(
            "cannot fill column '{}' ({}) with '{}'",
            column_name(batch, index),
            column.data_type(),
            value
        ))
    })?;
    fill_nulls(column, fill)
}

fn fill_nulls(column: &ArrayRef, fill: ArrayRef) -> Result<ArrayRef> {
    let mask = is_null(column.as_ref())?;
    Ok(zip(&mask, &Scalar::new(fill), column)?)
}

fn drop_incomplete_rows(batch: &RecordBatch, indices: &[usize]) -> Result<RecordBatch> {
    let keep: BooleanArray = (0..batch.num_rows())
        .map(|row| Some(indices.iter().all(|&i| batch.column(i).is_valid(row))))
        .collect();
    Ok(filter_record_batch(batch, &keep)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{AsArray, Int64Array};
    use arrow::datatypes::{DataType, Float64Type};
    use arrow_array::record_batch;

    fn impute(batch: &RecordBatch, column: &str, strategy: ImputeStrategy) -> Result<RecordBatch> {
        apply(
            batch,
            &ImputeParams {
                columns: vec![column.to_string()],
                strategy,
                fill_value: None,
            },
        )
    }

    #[test]
    fn test_mean_and_median() {
        let batch = record_batch!(("x", Int64, [Some(1), None, Some(2), Some(9)])).unwrap();

        let out = impute(&batch, "x", ImputeStrategy::Mean).unwrap();
        let x: Vec<_> = out.column(0).as_primitive::<Float64Type>().iter().collect();
        assert_eq!(x, vec![Some(1.0), Some(4.0), Some(2.0), Some(9.0)]);

        let out = impute(&batch, "x", ImputeStrategy::Median).unwrap();
        let x: Vec<_> = out.column(0).as_primitive::<Float64Type>().iter().collect();
        assert_eq!(x[1], Some(2.0));
    }

    #[test]
    fn test_mean_on_text_is_invalid_columns() {
        let batch = record_batch!(("s", Utf8, [Some("a"), None])).unwrap();
        let err = impute(&batch, "s", ImputeStrategy::Mean).unwrap_err();
        assert_eq!(err.code(), "INVALID_COLUMNS");
    }

    #[test]
    fn test_mode_keeps_type() {
        let batch = record_batch!(("s", Utf8, [Some("b"), None, Some("a"), Some("b"), Some("a")])).unwrap();
        let out = impute(&batch, "s", ImputeStrategy::Mode).unwrap();
        assert_eq!(out.schema().field(0).data_type(), &DataType::Utf8);
        assert_eq!(out.column(0).as_string::<i32>().value(1), "b");
        assert_eq!(out.column(0).null_count(), 0);
    }

    #[test]
    fn test_constant_is_cast_to_column_type() {
        let batch = record_batch!(("n", Int64, [Some(1), None])).unwrap();
        let out = apply(
            &batch,
            &ImputeParams {
                columns: vec!["n".into()],
                strategy: ImputeStrategy::Constant,
                fill_value: Some(FillValue::Number(7.0)),
            },
        )
        .unwrap();
        assert_eq!(out.column(0).as_primitive::<arrow::datatypes::Int64Type>(), &Int64Array::from(vec![1, 7]));

        let err = apply(
            &batch,
            &ImputeParams {
                columns: vec!["n".into()],
                strategy: ImputeStrategy::Constant,
                fill_value: Some(FillValue::Text("seven".into())),
            },
        )
        .unwrap_err();
        assert_eq!(err.code(), "INVALID_OPERATION");
    }

    #[test]
    fn test_constant_requires_value() {
        let batch = record_batch!(("n", Int64, [Some(1), None])).unwrap();
        assert!(impute(&batch, "n", ImputeStrategy::Constant).is_err());
    }

    #[test]
    fn test_all_missing_numeric_column_fails() {
        let batch = record_batch!(("x", Float64, [None::<f64>, None])).unwrap();
        assert_eq!(
            impute(&batch, "x", ImputeStrategy::Mean).unwrap_err().code(),
            "INVALID_OPERATION"
        );
    }

    #[test]
    fn test_drop_rows() {
        let batch = record_batch!(
            ("a", Int64, [Some(1), None, Some(3)]),
            ("b", Utf8, [Some("x"), Some("y"), None])
        )
        .unwrap();
        let out = apply(
            &batch,
            &ImputeParams {
                columns: vec!["a".into()],
                strategy: ImputeStrategy::DropRows,
                fill_value: None,
            },
        )
        .unwrap();
        assert_eq!(out.num_rows(), 2);
        assert_eq!(out.num_columns(), 2);
    }
}
