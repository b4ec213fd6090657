//! Spreadsheets exported as HTML tables
//!
//! Excel's "Save as Web Page" and many reporting tools produce an `.xls` or
//! `.html` file that is really a `<table>`. The first table in the document is
//! read; its first row holds the column names and every following row is data.
//! Column types are inferred from the cell text: Int64, then Float64, then
//! Boolean, falling back to Utf8. Empty cells are nulls.

use crate::error::LoadError;
use arrow::array::{ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::RecordBatch;
use std::path::Path;
use std::sync::Arc;

pub(super) fn load(bytes: &[u8], path: &Path, encodings: &[String]) -> Result<RecordBatch, LoadError> {
    let html = super::csv::decode_text(bytes, path, encodings)?;
    let corrupt = |message: String| LoadError::Corrupt {
        path: path.to_path_buf(),
        message,
    };

    let dom = tl::parse(&html, tl::ParserOptions::default())
        .map_err(|e| corrupt(format!("HTML parse error: {}", e)))?;
    let parser = dom.parser();
    let table = dom
        .nodes()
        .iter()
        .find_map(|node| node.as_tag().filter(|tag| tag.name().as_utf8_str() == "table"))
        .ok_or_else(|| corrupt("no <table> element found".to_string()))?;

    let rows = table_rows(table, parser).map_err(corrupt)?;
    let mut rows = rows.into_iter();
    let header = rows
        .next()
        .ok_or_else(|| corrupt("table has no rows".to_string()))?;
    let names: Vec<String> = header
        .into_iter()
        .enumerate()
        .map(|(i, name)| {
            if name.is_empty() {
                format!("column_{}", i + 1)
            } else {
                name
            }
        })
        .collect();

    let mut cells: Vec<Vec<Option<String>>> = vec![Vec::new(); names.len()];
    for (row_number, row) in rows.enumerate() {
        if row.len() > names.len() {
            return Err(corrupt(format!(
                "data row {} has {} cells but the header has {}",
                row_number + 1,
                row.len(),
                names.len()
            )));
        }
        let mut row = row.into_iter();
        for column in cells.iter_mut() {
            column.push(row.next().filter(|v| !v.is_empty()));
        }
    }

    let mut fields = Vec::with_capacity(names.len());
    let mut columns = Vec::with_capacity(names.len());
    for (name, values) in names.into_iter().zip(cells) {
        let array = infer_column(&values);
        fields.push(Field::new(name, array.data_type().clone(), true));
        columns.push(array);
    }
    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).map_err(|e| corrupt(e.to_string()))
}

/// Text of every `<td>`/`<th>` cell, row by row
fn table_rows(table: &tl::HTMLTag, parser: &tl::Parser) -> Result<Vec<Vec<String>>, String> {
    let table_html = table.inner_html(parser);
    let table_dom = tl::parse(&table_html, tl::ParserOptions::default())
        .map_err(|e| format!("table parse error: {}", e))?;
    let table_parser = table_dom.parser();

    let mut rows = Vec::new();
    for node in table_dom.nodes().iter() {
        let Some(tr) = node.as_tag().filter(|tag| tag.name().as_utf8_str() == "tr") else {
            continue;
        };
        let row_html = tr.inner_html(table_parser);
        let row_dom = tl::parse(&row_html, tl::ParserOptions::default())
            .map_err(|e| format!("row parse error: {}", e))?;
        let row: Vec<String> = row_dom
            .nodes()
            .iter()
            .filter_map(|node| node.as_tag())
            .filter(|tag| {
                let name = tag.name().as_utf8_str();
                name == "td" || name == "th"
            })
            .map(|tag| decode_entities(tag.inner_text(row_dom.parser()).trim()))
            .collect();
        if !row.is_empty() {
            rows.push(row);
        }
    }
    Ok(rows)
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

fn infer_column(values: &[Option<String>]) -> ArrayRef {
    let present = || values.iter().flatten();
    let any_present = present().next().is_some();

    if any_present && present().all(|v| v.parse::<i64>().is_ok()) {
        return Arc::new(Int64Array::from(
            values
                .iter()
                .map(|v| v.as_ref().and_then(|v| v.parse().ok()))
                .collect::<Vec<Option<i64>>>(),
        ));
    }
    if any_present && present().all(|v| v.parse::<f64>().is_ok()) {
        return Arc::new(Float64Array::from(
            values
                .iter()
                .map(|v| v.as_ref().and_then(|v| v.parse().ok()))
                .collect::<Vec<Option<f64>>>(),
        ));
    }
    let as_bool = |v: &str| match v.to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    };
    if any_present && present().all(|v| as_bool(v.as_str()).is_some()) {
        return Arc::new(BooleanArray::from(
            values
                .iter()
                .map(|v| v.as_deref().and_then(as_bool))
                .collect::<Vec<Option<bool>>>(),
        ));
    }
    Arc::new(StringArray::from(values.to_vec()))
}
