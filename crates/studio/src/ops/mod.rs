//! Transformation applier
//!
//! `Operation` is the closed set of transformations a session can record.
//! `apply` is a pure function from (table, operation) to a new table; a
//! failure never produces a partial table.

use crate::error::Result;
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

mod columns;
mod encode;
mod feature;
mod impute;
mod outliers;
mod scale;


/// Tuning knobs an operation may need beyond its own parameters
#[derive(Debug, Clone)]
pub struct ApplyContext {
    pub one_hot_max_categories: usize,
    pub max_expression_len: usize,
}

impl Default for ApplyContext {
    fn default() -> Self {
        Self {
            one_hot_max_categories: 20,
            max_expression_len: 1024,
        }
    }
}

impl From<&crate::config::StudioConfig> for ApplyContext {
    fn from(config: &crate::config::StudioConfig) -> Self {
        Self {
            one_hot_max_categories: config.one_hot_max_categories,
            max_expression_len: config.max_expression_len,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImputeStrategy {
    Mean,
    Median,
    Mode,
    Constant,
    DropRows,
}

impl ImputeStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            ImputeStrategy::Mean => "mean",
            ImputeStrategy::Median => "median",
            ImputeStrategy::Mode => "mode",
            ImputeStrategy::Constant => "constant",
            ImputeStrategy::DropRows => "drop_rows",
        }
    }
}

/// Literal used by the `constant` imputation strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FillValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl std::fmt::Display for FillValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FillValue::Bool(b) => write!(f, "{}", b),
            FillValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                write!(f, "{}", *n as i64)
            }
            FillValue::Number(n) => write!(f, "{}", n),
            FillValue::Text(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImputeParams {
    pub columns: Vec<String>,
    pub strategy: ImputeStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_value: Option<FillValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodeMethod {
    OneHot,
    Ordinal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodeParams {
    pub columns: Vec<String>,
    pub method: EncodeMethod,
    /// One-hot cap; the configured default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_categories: Option<usize>,
    /// Explicit ordinal ranking; sorted distinct values when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleMethod {
    #[default]
    Standard,
    MinMax,
    Robust,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleParams {
    pub columns: Vec<String>,
    #[serde(default)]
    pub method: ScaleMethod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierMethod {
    #[default]
    Percentile,
    Iqr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierAction {
    #[default]
    Cap,
    DropRows,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierParams {
    pub columns: Vec<String>,
    #[serde(default)]
    pub method: OutlierMethod,
    #[serde(default = "default_lower")]
    pub lower: f64,
    #[serde(default = "default_upper")]
    pub upper: f64,
    #[serde(default = "default_factor")]
    pub factor: f64,
    #[serde(default)]
    pub action: OutlierAction,
}

fn default_lower() -> f64 {
    0.05
}
fn default_upper() -> f64 {
    0.95
}
fn default_factor() -> f64 {
    1.5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureParams {
    pub name: String,
    pub expression: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropColumnsParams {
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenameColumnsParams {
    pub mapping: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReorderColumnsParams {
    pub columns: Vec<String>,
}

/// A recorded transformation, tagged by `"type"` on the wire
///
/// ```json
/// {"type": "impute", "columns": ["age"], "strategy": "median"}
/// {"type": "feature", "name": "total", "expression": "@price * @qty"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    Impute(ImputeParams),
    Encode(EncodeParams),
    Scale(ScaleParams),
    Outliers(OutlierParams),
    Feature(FeatureParams),
    DropColumns(DropColumnsParams),
    RenameColumns(RenameColumnsParams),
    ReorderColumns(ReorderColumnsParams),
}

fn quoted(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| format!("'{}'", c))
        .collect::<Vec<_>>()
        .join(", ")
}

impl Operation {
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Impute(_) => "impute",
            Operation::Encode(_) => "encode",
            Operation::Scale(_) => "scale",
            Operation::Outliers(_) => "outliers",
            Operation::Feature(_) => "feature",
            Operation::DropColumns(_) => "drop_columns",
            Operation::RenameColumns(_) => "rename_columns",
            Operation::ReorderColumns(_) => "reorder_columns",
        }
    }

    /// Human-readable summary recorded alongside the snapshot
    pub fn describe(&self) -> String {
        match self {
            Operation::Impute(p) => match (&p.strategy, &p.fill_value) {
                (ImputeStrategy::Constant, Some(v)) => {
                    format!("Impute {} with constant '{}'", quoted(&p.columns), v)
                }
                (ImputeStrategy::DropRows, _) => {
                    format!("Drop rows with missing {}", quoted(&p.columns))
                }
                (strategy, _) => {
                    format!("Impute {} using {}", quoted(&p.columns), strategy.as_str())
                }
            },
            Operation::Encode(p) => match p.method {
                EncodeMethod::OneHot => format!("One-hot encode {}", quoted(&p.columns)),
                EncodeMethod::Ordinal => format!("Ordinal encode {}", quoted(&p.columns)),
            },
            Operation::Scale(p) => {
                let method = match p.method {
                    ScaleMethod::Standard => "standard",
                    ScaleMethod::MinMax => "min-max",
                    ScaleMethod::Robust => "robust",
                };
                format!("Scale {} ({})", quoted(&p.columns), method)
            }
            Operation::Outliers(p) => {
                let bounds = match p.method {
                    OutlierMethod::Percentile => {
                        format!("percentiles {}-{}", p.lower, p.upper)
                    }
                    OutlierMethod::Iqr => format!("{} x IQR", p.factor),
                };
                let verb = match p.action {
                    OutlierAction::Cap => "Cap",
                    OutlierAction::DropRows => "Drop rows with",
                };
                format!("{} outliers in {} ({})", verb, quoted(&p.columns), bounds)
            }
            Operation::Feature(p) => format!("Add column '{}' = {}", p.name, p.expression),
            Operation::DropColumns(p) => format!("Drop {}", quoted(&p.columns)),
            Operation::RenameColumns(p) => format!(
                "Rename {}",
                p.mapping
                    .iter()
                    .map(|(from, to)| format!("'{}' to '{}'", from, to))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Operation::ReorderColumns(p) => format!("Reorder columns: {}", quoted(&p.columns)),
        }
    }
}

/// Produce the table that results from applying `op` to `batch`
pub fn apply(batch: &RecordBatch, op: &Operation, ctx: &ApplyContext) -> Result<RecordBatch> {
    match op {
        Operation::Impute(p) => impute::apply(batch, p),
        Operation::Encode(p) => encode::apply(batch, p, ctx),
        Operation::Scale(p) => scale::apply(batch, p),
        Operation::Outliers(p) => outliers::apply(batch, p),
        Operation::Feature(p) => feature::apply(batch, p, ctx),
        Operation::DropColumns(p) => columns::drop(batch, p),
        Operation::RenameColumns(p) => columns::rename(batch, p),
        Operation::ReorderColumns(p) => columns::reorder(batch, p),
    }
}
