// CSV loading: encoding fallback, delimiter sniffing, arrow-csv parsing

use crate::config::CsvConfig;
use crate::error::LoadError;
use arrow::compute::concat_batches;
use arrow::record_batch::RecordBatch;
use arrow_csv::reader::Format;
use encoding_rs::Encoding;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

pub(super) fn load(bytes: &[u8], path: &Path, config: &CsvConfig) -> Result<RecordBatch, LoadError> {
    let text = decode_text(bytes, path, &config.encodings)?;
    if text.trim().is_empty() {
        return Err(LoadError::Corrupt {
            path: path.to_path_buf(),
            message: "file is empty".to_string(),
        });
    }
    let delimiter = sniff_delimiter(&text, path, &config.delimiters, config.sniff_lines)?;
    parse(&text, path, delimiter, config)
}

/// Decode with the byte-order mark if there is one, else the first
/// configured encoding that decodes cleanly
pub(super) fn decode_text(bytes: &[u8], path: &Path, encodings: &[String]) -> Result<String, LoadError> {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        return encoding
            .decode_without_bom_handling_and_without_replacement(&bytes[bom_len..])
            .map(|text| text.into_owned())
            .ok_or_else(|| LoadError::Encoding {
                path: path.to_path_buf(),
                attempted: vec![encoding.name().to_string()],
            });
    }

    for label in encodings {
        let Some(encoding) = Encoding::for_label(label.as_bytes()) else {
            continue;
        };
        if let Some(text) = encoding.decode_without_bom_handling_and_without_replacement(bytes) {
            diagnostics::debug!("Decoded {path} as {encoding}", path: path.display().to_string(), encoding: encoding.name());
            return Ok(text.into_owned());
        }
    }
    Err(LoadError::Encoding {
        path: path.to_path_buf(),
        attempted: encodings.to_vec(),
    })
}

/// Number of fields on one line, ignoring delimiters inside double quotes
fn field_count(line: &str, delimiter: char) -> usize {
    let mut in_quotes = false;
    let mut count = 1;
    for c in line.chars() {
        if c == '"' {
            in_quotes = !in_quotes;
        } else if c == delimiter && !in_quotes {
            count += 1;
        }
    }
    count
}

pub(super) fn sniff_delimiter(
    text: &str,
    path: &Path,
    candidates: &[char],
    sniff_lines: usize,
) -> Result<char, LoadError> {
    let sample: Vec<&str> = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .take(sniff_lines.max(1))
        .collect();

    let mut best: Option<(char, usize)> = None;
    for &candidate in candidates {
        let mut counts = sample.iter().map(|line| field_count(line, candidate));
        let Some(first) = counts.next() else {
            continue;
        };
        if first >= 2 && counts.all(|n| n == first) && best.is_none_or(|(_, n)| first > n) {
            best = Some((candidate, first));
        }
    }
    if let Some((delimiter, _)) = best {
        return Ok(delimiter);
    }

    // No candidate anywhere: the file is a single column.
    let seen = sample
        .iter()
        .any(|line| candidates.iter().any(|&c| line.contains(c)));
    match candidates.first() {
        Some(&first) if !seen => Ok(first),
        _ => Err(LoadError::Delimiter {
            path: path.to_path_buf(),
            attempted: candidates.iter().map(|c| format!("{:?}", c)).collect(),
        }),
    }
}

fn parse(text: &str, path: &Path, delimiter: char, config: &CsvConfig) -> Result<RecordBatch, LoadError> {
    let corrupt = |message: String| LoadError::Corrupt {
        path: path.to_path_buf(),
        message,
    };
    let delimiter = u8::try_from(delimiter).map_err(|_| LoadError::Delimiter {
        path: path.to_path_buf(),
        attempted: vec![format!("{:?}", delimiter)],
    })?;

    let format = Format::default()
        .with_header(true)
        .with_delimiter(delimiter);
    let (schema, _) = format
        .infer_schema(Cursor::new(text.as_bytes()), Some(config.infer_max_records))
        .map_err(|e| corrupt(e.to_string()))?;
    let schema = Arc::new(schema);

    let reader = arrow_csv::ReaderBuilder::new(schema.clone())
        .with_header(true)
        .with_delimiter(delimiter)
        .with_batch_size(config.batch_size.max(1))
        .build(Cursor::new(text.as_bytes()))
        .map_err(|e| corrupt(e.to_string()))?;
    let batches = reader
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| corrupt(e.to_string()))?;
    concat_batches(&schema, &batches).map_err(|e| corrupt(e.to_string()))
}
