// Structural column operations: drop, rename, reorder

use super::{DropColumnsParams, RenameColumnsParams, ReorderColumnsParams};
use crate::error::{Result, StudioError};
use crate::table::{build_batch, column_index, require_columns};
use arrow::datatypes::Field;
use arrow::record_batch::RecordBatch;
use std::collections::HashSet;

pub(super) fn drop(batch: &RecordBatch, params: &DropColumnsParams) -> Result<RecordBatch> {
    let dropped: HashSet<usize> = require_columns(batch, &params.columns)?.into_iter().collect();
    if dropped.len() == batch.num_columns() {
        return Err(StudioError::invalid_operation(
            "cannot drop every column of the table",
        ));
    }
    let keep: Vec<usize> = (0..batch.num_columns())
        .filter(|i| !dropped.contains(i))
        .collect();
    Ok(batch.project(&keep)?)
}

pub(super) fn rename(batch: &RecordBatch, params: &RenameColumnsParams) -> Result<RecordBatch> {
    if params.mapping.is_empty() {
        return Err(StudioError::invalid_operation("no columns given"));
    }
    for (from, to) in &params.mapping {
        let _ = column_index(batch, from)?;
        if to.trim().is_empty() {
            return Err(StudioError::invalid_operation(format!(
                "new name for column '{}' must not be empty",
                from
            )));
        }
    }

    let schema = batch.schema();
    let fields: Vec<Field> = schema
        .fields()
        .iter()
        .map(|f| match params.mapping.get(f.name()) {
            Some(to) => f.as_ref().clone().with_name(to),
            None => f.as_ref().clone(),
        })
        .collect();
    // Uniqueness of the resulting names is checked by build_batch.
    build_batch(fields, batch.columns().to_vec())
}

/// Listed columns first in the given order, the rest after in their original order
pub(super) fn reorder(batch: &RecordBatch, params: &ReorderColumnsParams) -> Result<RecordBatch> {
    let mut order = require_columns(batch, &params.columns)?;
    let listed: HashSet<usize> = order.iter().copied().collect();
    order.extend((0..batch.num_columns()).filter(|i| !listed.contains(i)));
    Ok(batch.project(&order)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::record_batch;
    use std::collections::BTreeMap;

    fn names(batch: &RecordBatch) -> Vec<String> {
        batch.schema().fields().iter().map(|f| f.name().clone()).collect()
    }

    fn sample() -> RecordBatch {
        record_batch!(("a", Int64, [1, 2]), ("b", Utf8, ["x", "y"]), ("c", Float64, [0.5, 1.5])).unwrap()
    }

    #[test]
    fn test_drop() {
        let out = drop(&sample(), &DropColumnsParams { columns: vec!["b".into()] }).unwrap();
        assert_eq!(names(&out), vec!["a", "c"]);
        assert_eq!(out.num_rows(), 2);

        let all = DropColumnsParams {
            columns: vec!["a".into(), "b".into(), "c".into()],
        };
        assert_eq!(drop(&sample(), &all).unwrap_err().code(), "INVALID_OPERATION");

        let missing = DropColumnsParams { columns: vec!["q".into()] };
        assert_eq!(drop(&sample(), &missing).unwrap_err().code(), "INVALID_COLUMNS");
    }

    #[test]
    fn test_rename() {
        let mut mapping = BTreeMap::new();
        let _ = mapping.insert("a".to_string(), "id".to_string());
        let out = rename(&sample(), &RenameColumnsParams { mapping }).unwrap();
        assert_eq!(names(&out), vec!["id", "b", "c"]);

        let mut clash = BTreeMap::new();
        let _ = clash.insert("a".to_string(), "b".to_string());
        let err = rename(&sample(), &RenameColumnsParams { mapping: clash }).unwrap_err();
        assert_eq!(err.code(), "INVALID_OPERATION");

        // Swapping two names is fine.
        let mut swap = BTreeMap::new();
        let _ = swap.insert("a".to_string(), "b".to_string());
        let _ = swap.insert("b".to_string(), "a".to_string());
        let out = rename(&sample(), &RenameColumnsParams { mapping: swap }).unwrap();
        assert_eq!(names(&out), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_reorder() {
        let out = reorder(&sample(), &ReorderColumnsParams { columns: vec!["c".into()] }).unwrap();
        assert_eq!(names(&out), vec!["c", "a", "b"]);

        let dup = ReorderColumnsParams {
            columns: vec!["c".into(), "c".into()],
        };
        assert_eq!(reorder(&sample(), &dup).unwrap_err().code(), "INVALID_OPERATION");
    }
}
