//! Helpers over Arrow record batches
//!
//! Snapshots are plain `RecordBatch` values. Operations never mutate a batch;
//! they build a new one from the columns of the old one.

use crate::error::{Result, StudioError};
use arrow::array::{Array, ArrayRef, AsArray, Float64Array};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Float64Type, Schema};
use arrow::record_batch::RecordBatch;
use arrow::util::display::{ArrayFormatter, FormatOptions};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub fn column_index(batch: &RecordBatch, name: &str) -> Result<usize> {
    batch
        .schema()
        .index_of(name)
        .map_err(|_| StudioError::missing_column(name))
}

/// Resolve a non-empty, duplicate-free list of column names
pub fn require_columns(batch: &RecordBatch, names: &[String]) -> Result<Vec<usize>> {
    if names.is_empty() {
        return Err(StudioError::invalid_operation("no columns given"));
    }
    let mut seen = HashSet::new();
    let mut indices = Vec::with_capacity(names.len());
    for name in names {
        if !seen.insert(name.as_str()) {
            return Err(StudioError::invalid_operation(format!(
                "column '{}' listed more than once",
                name
            )));
        }
        indices.push(column_index(batch, name)?);
    }
    Ok(indices)
}

pub fn is_numeric(data_type: &DataType) -> bool {
    data_type.is_numeric()
}

/// Values of a numeric column widened to f64; non-numeric columns are rejected
pub fn numeric_values(batch: &RecordBatch, index: usize) -> Result<Vec<Option<f64>>> {
    let schema = batch.schema();
    let field = schema.field(index);
    if !is_numeric(field.data_type()) {
        return Err(StudioError::InvalidColumns(format!(
            "column '{}' is not numeric ({})",
            field.name(),
            field.data_type()
        )));
    }
    let widened = cast(batch.column(index), &DataType::Float64)?;
    Ok(widened.as_primitive::<Float64Type>().iter().collect())
}

pub fn float_array(values: Vec<Option<f64>>) -> ArrayRef {
    Arc::new(Float64Array::from(values))
}

/// Non-missing, non-NaN values, sorted ascending
pub fn sorted_present(values: &[Option<f64>]) -> Vec<f64> {
    let mut present: Vec<f64> = values.iter().flatten().copied().filter(|v| !v.is_nan()).collect();
    present.sort_by(f64::total_cmp);
    present
}

/// Quantile with linear interpolation between closest ranks
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    if frac == 0.0 {
        return Some(sorted[lo]);
    }
    // Weighted sum, so wide finite ranges cannot overflow.
    Some(sorted[lo] * (1.0 - frac) + sorted[hi] * frac)
}

/// Display strings of every cell, `None` for nulls
pub fn display_values(array: &ArrayRef) -> Result<Vec<Option<String>>> {
    let options = FormatOptions::default();
    let formatter = ArrayFormatter::try_new(array.as_ref(), &options)?;
    Ok((0..array.len())
        .map(|i| {
            if array.is_null(i) {
                None
            } else {
                Some(formatter.value(i).to_string())
            }
        })
        .collect())
}

/// Assemble a batch from parallel field and column lists
pub fn build_batch(fields: Vec<Field>, columns: Vec<ArrayRef>) -> Result<RecordBatch> {
    if columns.is_empty() {
        return Err(StudioError::invalid_operation(
            "a table must keep at least one column",
        ));
    }
    let mut seen = HashSet::new();
    for field in &fields {
        if !seen.insert(field.name().clone()) {
            return Err(StudioError::invalid_operation(format!(
                "duplicate column name '{}'",
                field.name()
            )));
        }
    }
    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

/// Replace the column at `index` with zero or more new columns, in place
pub fn splice_columns(
    batch: &RecordBatch,
    index: usize,
    replacement: Vec<(Field, ArrayRef)>,
) -> Result<RecordBatch> {
    let schema = batch.schema();
    let mut fields = Vec::with_capacity(batch.num_columns() + replacement.len());
    let mut columns = Vec::with_capacity(fields.capacity());
    for (i, field) in schema.fields().iter().enumerate() {
        if i == index {
            for (f, c) in &replacement {
                fields.push(f.clone());
                columns.push(c.clone());
            }
        } else {
            fields.push(field.as_ref().clone());
            columns.push(batch.column(i).clone());
        }
    }
    build_batch(fields, columns)
}

/// Replace several columns keeping their names, e.g. after scaling
pub fn replace_columns(
    batch: &RecordBatch,
    replacements: HashMap<usize, ArrayRef>,
) -> Result<RecordBatch> {
    let schema = batch.schema();
    let mut fields = Vec::with_capacity(batch.num_columns());
    let mut columns = Vec::with_capacity(batch.num_columns());
    for (i, field) in schema.fields().iter().enumerate() {
        match replacements.get(&i) {
            Some(array) => {
                fields.push(Field::new(field.name(), array.data_type().clone(), true));
                columns.push(array.clone());
            }
            None => {
                fields.push(field.as_ref().clone());
                columns.push(batch.column(i).clone());
            }
        }
    }
    build_batch(fields, columns)
}

pub fn append_column(batch: &RecordBatch, field: Field, array: ArrayRef) -> Result<RecordBatch> {
    let schema = batch.schema();
    let mut fields: Vec<Field> = schema.fields().iter().map(|f| f.as_ref().clone()).collect();
    let mut columns = batch.columns().to_vec();
    fields.push(field);
    columns.push(array);
    build_batch(fields, columns)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

/// A page of rows rendered as strings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TablePreview {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Vec<Option<String>>>,
    pub offset: usize,
    pub total_rows: usize,
}

pub fn preview(batch: &RecordBatch, offset: usize, limit: usize) -> Result<TablePreview> {
    let total_rows = batch.num_rows();
    let start = offset.min(total_rows);
    let len = limit.min(total_rows - start);
    let page = batch.slice(start, len);

    let schema = page.schema();
    let columns = schema
        .fields()
        .iter()
        .map(|f| ColumnInfo {
            name: f.name().clone(),
            data_type: f.data_type().to_string(),
        })
        .collect();

    let rendered = page
        .columns()
        .iter()
        .map(display_values)
        .collect::<Result<Vec<_>>>()?;
    let rows = (0..len)
        .map(|r| rendered.iter().map(|col| col[r].clone()).collect())
        .collect();

    Ok(TablePreview {
        columns,
        rows,
        offset: start,
        total_rows,
    })
}

/// Summary statistics for one column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub name: String,
    pub data_type: String,
    pub null_count: usize,
    pub distinct_count: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
}

pub fn profile(batch: &RecordBatch) -> Result<Vec<ColumnProfile>> {
    let schema = batch.schema();
    let mut profiles = Vec::with_capacity(batch.num_columns());
    for (i, field) in schema.fields().iter().enumerate() {
        let column = batch.column(i);
        let distinct_count = display_values(column)?
            .into_iter()
            .flatten()
            .collect::<HashSet<_>>()
            .len();

        let (min, max, mean) = if is_numeric(field.data_type()) {
            let present = sorted_present(&numeric_values(batch, i)?);
            let mean = if present.is_empty() {
                None
            } else {
                Some(present.iter().sum::<f64>() / present.len() as f64)
            };
            (present.first().copied(), present.last().copied(), mean)
        } else {
            (None, None, None)
        };

        profiles.push(ColumnProfile {
            name: field.name().clone(),
            data_type: field.data_type().to_string(),
            null_count: column.null_count(),
            distinct_count,
            min,
            max,
            mean,
        });
    }
    Ok(profiles)
}
