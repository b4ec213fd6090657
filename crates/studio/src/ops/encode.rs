// Categorical encoding: one-hot with a category cap, and ordinal codes

use super::{ApplyContext, EncodeMethod, EncodeParams};
use crate::error::{Result, StudioError};
use crate::table::{display_values, require_columns, splice_columns};
use arrow::array::{ArrayRef, Int32Array, Int64Array};
use arrow::datatypes::{DataType, Field};
use arrow::record_batch::RecordBatch;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub(super) fn apply(
    batch: &RecordBatch,
    params: &EncodeParams,
    ctx: &ApplyContext,
) -> Result<RecordBatch> {
    let _ = require_columns(batch, &params.columns)?;

    let cap = params.max_categories.unwrap_or(ctx.one_hot_max_categories);
    if params.method == EncodeMethod::OneHot && cap == 0 {
        return Err(StudioError::invalid_operation("max_categories must be positive"));
    }

    // Column positions shift as one-hot splices in new columns, so look
    // each one up again against the batch being built.
    let mut current = batch.clone();
    for name in &params.columns {
        let index = crate::table::column_index(&current, name)?;
        let values = display_values(current.column(index))?;
        let replacement = match params.method {
            EncodeMethod::OneHot => one_hot(&current, name, &values, cap),
            EncodeMethod::Ordinal => ordinal(name, &values, params.order.as_deref())?,
        };
        current = splice_columns(&current, index, replacement)?;
    }
    Ok(current)
}

/// Categories ordered by frequency, ties broken by first appearance
fn ranked_categories(values: &[Option<String>]) -> Vec<&str> {
    let mut stats: HashMap<&str, (usize, usize)> = HashMap::new();
    for (row, value) in values.iter().enumerate() {
        if let Some(value) = value {
            stats.entry(value.as_str()).or_insert((0, row)).0 += 1;
        }
    }
    let mut ranked: Vec<(&str, (usize, usize))> = stats.into_iter().collect();
    ranked.sort_by(|(_, (ca, ra)), (_, (cb, rb))| cb.cmp(ca).then(ra.cmp(rb)));
    ranked.into_iter().map(|(value, _)| value).collect()
}

fn one_hot(
    batch: &RecordBatch,
    name: &str,
    values: &[Option<String>],
    cap: usize,
) -> Vec<(Field, ArrayRef)> {
    let ranked = ranked_categories(values);
    let overflow = ranked.len() > cap;
    let kept: Vec<&str> = ranked.into_iter().take(cap).collect();

    let schema = batch.schema();
    let mut taken: HashSet<String> = schema
        .fields()
        .iter()
        .filter(|f| f.name() != name)
        .map(|f| f.name().clone())
        .collect();
    let mut unique_name = |base: String| {
        let mut candidate = base;
        while taken.contains(&candidate) {
            candidate.push('_');
        }
        let _ = taken.insert(candidate.clone());
        candidate
    };

    let slot: HashMap<&str, usize> = kept.iter().enumerate().map(|(i, v)| (*v, i)).collect();
    let width = kept.len() + usize::from(overflow);
    let mut indicators = vec![vec![0i32; values.len()]; width];
    for (row, value) in values.iter().enumerate() {
        if let Some(value) = value {
            let column = slot.get(value.as_str()).copied().unwrap_or(kept.len());
            indicators[column][row] = 1;
        }
    }

    let mut names: Vec<String> = kept
        .iter()
        .map(|category| unique_name(format!("{}_{}", name, category)))
        .collect();
    if overflow {
        names.push(unique_name(format!("{}_other", name)));
    }

    names
        .into_iter()
        .zip(indicators)
        .map(|(column_name, bits)| {
            let array: ArrayRef = Arc::new(Int32Array::from(bits));
            (Field::new(column_name, DataType::Int32, false), array)
        })
        .collect()
}

fn ordinal(
    name: &str,
    values: &[Option<String>],
    order: Option<&[String]>,
) -> Result<Vec<(Field, ArrayRef)>> {
    let ranking: Vec<String> = match order {
        Some(order) => order.to_vec(),
        None => {
            let mut distinct: Vec<String> = values
                .iter()
                .flatten()
                .cloned()
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();
            distinct.sort();
            distinct
        }
    };
    let codes: HashMap<&str, i64> = ranking
        .iter()
        .enumerate()
        .map(|(i, v)| (v.as_str(), i as i64))
        .collect();

    let encoded = values
        .iter()
        .map(|value| match value {
            None => Ok(None),
            Some(v) => codes.get(v.as_str()).copied().map(Some).ok_or_else(|| {
                StudioError::invalid_operation(format!(
                    "value '{}' in column '{}' is not in the ordinal order",
                    v, name
                ))
            }),
        })
        .collect::<Result<Vec<Option<i64>>>>()?;

    let array: ArrayRef = Arc::new(Int64Array::from(encoded));
    Ok(vec![(Field::new(name, DataType::Int64, true), array)])
}
