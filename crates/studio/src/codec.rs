//! Cache encoding for snapshots
//!
//! Tables are stored as Arrow IPC streams so column types and nullability
//! survive the round trip and the blobs stay readable from any Arrow runtime.

use crate::error::{Result, StudioError};
use arrow::compute::concat_batches;
use arrow::ipc::reader::StreamReader;
use arrow::ipc::writer::StreamWriter;
use arrow::record_batch::RecordBatch;
use std::io::Cursor;

pub fn encode_batch(batch: &RecordBatch) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    {
        let mut writer = StreamWriter::try_new(&mut buffer, &batch.schema())
            .map_err(|e| StudioError::CorruptSession(format!("IPC writer error: {}", e)))?;
        writer
            .write(batch)
            .map_err(|e| StudioError::CorruptSession(format!("IPC write error: {}", e)))?;
        writer
            .finish()
            .map_err(|e| StudioError::CorruptSession(format!("IPC finish error: {}", e)))?;
    }
    Ok(buffer)
}

pub fn decode_batch(bytes: &[u8]) -> Result<RecordBatch> {
    let reader = StreamReader::try_new(Cursor::new(bytes), None)
        .map_err(|e| StudioError::CorruptSession(format!("IPC reader error: {}", e)))?;
    let schema = reader.schema();

    let mut batches = reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| StudioError::CorruptSession(format!("IPC read error: {}", e)))?;

    if batches.len() == 1 {
        return Ok(batches.swap_remove(0));
    }
    concat_batches(&schema, &batches)
        .map_err(|e| StudioError::CorruptSession(format!("IPC concat error: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::record_batch;

    #[test]
    fn test_types_and_nulls_survive() {
        let batch = record_batch!(
            ("id", Int32, [Some(1), None, Some(3)]),
            ("score", Float64, [Some(0.5), Some(1.5), None]),
            ("label", Utf8, [None, Some("b"), Some("c")]),
            ("flag", Boolean, [true, false, true])
        )
        .unwrap();
        let decoded = decode_batch(&encode_batch(&batch).unwrap()).unwrap();
        assert_eq!(decoded.schema(), batch.schema());
        assert_eq!(decoded, batch);
    }

    #[test]
    fn test_empty_table_keeps_schema() {
        let batch = record_batch!(("a", Utf8, ["x"])).unwrap().slice(0, 0);
        let decoded = decode_batch(&encode_batch(&batch).unwrap()).unwrap();
        assert_eq!(decoded.num_rows(), 0);
        assert_eq!(decoded.schema(), batch.schema());
    }

    #[test]
    fn test_garbage_is_corrupt_session() {
        let err = decode_batch(b"definitely not arrow").unwrap_err();
        assert_eq!(err.code(), "SESSION_CORRUPT");
    }
}
