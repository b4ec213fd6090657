// Derived columns from sandboxed arithmetic expressions

use super::{ApplyContext, FeatureParams};
use crate::error::{Result, StudioError};
use crate::expr::Expression;
use crate::table::append_column;
use arrow::datatypes::{DataType, Field};
use arrow::record_batch::RecordBatch;

pub(super) fn apply(
    batch: &RecordBatch,
    params: &FeatureParams,
    ctx: &ApplyContext,
) -> Result<RecordBatch> {
    let name = params.name.trim();
    if name.is_empty() {
        return Err(StudioError::invalid_operation("feature name must not be empty"));
    }
    if batch.schema().index_of(name).is_ok() {
        return Err(StudioError::invalid_operation(format!(
            "column '{}' already exists",
            name
        )));
    }

    let expression = Expression::parse(&params.expression, ctx.max_expression_len)?;
    let values = expression.evaluate(batch)?;
    append_column(batch, Field::new(name, DataType::Float64, true), values)
}
