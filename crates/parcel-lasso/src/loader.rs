//! Background loading of row files
//!
//! Files hold one JSON object per row, either as a JSON array or as JSON lines. Parsing and
//! coercion run on the blocking pool; a snapshot of the dataset loaded so far is sent to the
//! session after every chunk, so the data can be used before loading completes.

use crate::AppError;
use parcel_lasso_lib::{Dataset, DatasetKind, IngestBuffer, IngestStats, RawRow};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A dataset snapshot published while loading
#[derive(Debug, Clone)]
pub struct LoadProgress {
    pub kind: DatasetKind,
    pub dataset: Arc<Dataset>,
    pub stats: IngestStats,
    pub total_rows: usize,
    /// Set on the last snapshot of a file
    pub done: bool,
}

impl LoadProgress {
    pub fn fraction(&self) -> f32 {
        self.stats.progress(self.total_rows)
    }
}

/// Read and parse every row of a file
pub fn read_rows(path: &Path) -> Result<Vec<RawRow>, AppError> {
    let text = std::fs::read_to_string(path).map_err(|source| AppError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_rows(path, &text)
}

/// Parse a JSON array of objects, or a stream of JSON objects
pub fn parse_rows(path: &Path, text: &str) -> Result<Vec<RawRow>, AppError> {
    let parse_error = |source| AppError::Parse {
        path: path.to_path_buf(),
        source,
    };

    let values: Vec<Value> = if text.trim_start().starts_with('[') {
        serde_json::from_str(text).map_err(parse_error)?
    } else {
        serde_json::Deserializer::from_str(text)
            .into_iter::<Value>()
            .collect::<Result<_, _>>()
            .map_err(parse_error)?
    };

    values
        .into_iter()
        .enumerate()
        .map(|(index, value)| match value {
            Value::Object(map) => Ok(map
                .into_iter()
                .map(|(column, cell)| (column, cell_text(cell)))
                .collect()),
            _ => Err(AppError::InvalidRow {
                path: path.to_path_buf(),
                index,
            }),
        })
        .collect()
}

/// Render a JSON cell the way a CSV reader would have produced it
fn cell_text(cell: Value) -> String {
    match cell {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Ingest rows chunk by chunk, handing a snapshot to `publish` after each chunk
///
/// Stops with [`AppError::LoadInterrupted`] when `publish` returns false.
pub fn ingest_rows(
    kind: DatasetKind,
    rows: &[RawRow],
    chunk_size: usize,
    mut publish: impl FnMut(LoadProgress) -> bool,
) -> Result<IngestStats, AppError> {
    let mut buffer = IngestBuffer::new(kind);
    let total_rows = rows.len();

    let mut chunks = rows.chunks(chunk_size.max(1)).peekable();
    while let Some(chunk) = chunks.next() {
        buffer.push_chunk(chunk);
        // The last chunk is published by `finish`
        if chunks.peek().is_none() {
            break;
        }
        let progress = LoadProgress {
            kind,
            dataset: buffer.publish(),
            stats: buffer.stats(),
            total_rows,
            done: false,
        };
        if !publish(progress) {
            return Err(AppError::LoadInterrupted { kind });
        }
    }

    let (dataset, stats) = buffer.finish();
    let progress = LoadProgress {
        kind,
        dataset,
        stats,
        total_rows,
        done: true,
    };
    if !publish(progress) {
        return Err(AppError::LoadInterrupted { kind });
    }
    Ok(stats)
}

/// Load a file on the blocking pool, sending snapshots over `tx`
pub fn spawn_loader(
    kind: DatasetKind,
    path: PathBuf,
    chunk_size: usize,
    tx: mpsc::Sender<LoadProgress>,
) -> JoinHandle<Result<IngestStats, AppError>> {
    tokio::task::spawn_blocking(move || {
        #[cfg(feature = "profiling")]
        profiling::scope!("load_rows");

        tracing::info!("Loading {} rows from {}", kind, path.display());
        let rows = read_rows(&path)?;
        ingest_rows(kind, &rows, chunk_size, |progress| {
            tx.blocking_send(progress).is_ok()
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parcel_lasso_lib::columns;

    fn rows(n: usize) -> Vec<RawRow> {
        (0..n)
            .map(|i| {
                RawRow::from([
                    (columns::APN.to_string(), format!("P{i}")),
                    (columns::LATITUDE.to_string(), "40.0".to_string()),
                    (columns::LONGITUDE.to_string(), "-77.0".to_string()),
                ])
            })
            .collect()
    }

    #[test]
    fn test_parse_json_array() {
        let text = r#"[
            {"APN - FORMATTED": "001", "LATITUDE": 40.5, "LONGITUDE": "-77.1", "LOT ACREAGE": null},
            {"APN - FORMATTED": "002", "LATITUDE": 40.6, "LONGITUDE": -77.2, "LOT ACREAGE": 3}
        ]"#;
        let rows = parse_rows(Path::new("pricing.json"), text).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][columns::LATITUDE], "40.5");
        assert_eq!(rows[0][columns::LONGITUDE], "-77.1");
        assert_eq!(rows[0][columns::LOT_ACREAGE], "");
        assert_eq!(rows[1][columns::LOT_ACREAGE], "3");
    }

    #[test]
    fn test_parse_json_lines() {
        let text = "{\"LATITUDE\": 1, \"LONGITUDE\": 2}\n{\"LATITUDE\": 3, \"LONGITUDE\": 4}\n";
        let rows = parse_rows(Path::new("comps.jsonl"), text).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][columns::LONGITUDE], "4");
    }

    #[test]
    fn test_parse_rejects_non_objects() {
        let err = parse_rows(Path::new("bad.json"), "[{\"a\": 1}, 5]").unwrap_err();
        assert!(matches!(err, AppError::InvalidRow { index: 1, .. }));
        assert!(matches!(
            parse_rows(Path::new("bad.json"), "[{"),
            Err(AppError::Parse { .. })
        ));
    }

    #[test]
    fn test_ingest_publishes_growing_snapshots() {
        let rows = rows(25);
        let mut published = Vec::new();
        let stats = ingest_rows(DatasetKind::Pricing, &rows, 10, |p| {
            published.push((p.dataset.len(), p.done));
            true
        })
        .unwrap();
        assert_eq!(stats.accepted, 25);
        assert_eq!(published, vec![(10, false), (20, false), (25, true)]);
    }

    #[test]
    fn test_ingest_empty_file_publishes_once() {
        let mut published = 0;
        let stats = ingest_rows(DatasetKind::Comps, &[], 10, |p| {
            assert!(p.done);
            assert!(p.dataset.is_empty());
            published += 1;
            true
        })
        .unwrap();
        assert_eq!(published, 1);
        assert_eq!(stats.rows_seen, 0);
    }

    #[test]
    fn test_ingest_stops_when_receiver_is_gone() {
        let rows = rows(30);
        let result = ingest_rows(DatasetKind::Pricing, &rows, 10, |_| false);
        assert!(matches!(
            result,
            Err(AppError::LoadInterrupted {
                kind: DatasetKind::Pricing
            })
        ));
    }

    #[tokio::test]
    async fn test_spawn_loader_missing_file() {
        let (tx, mut rx) = mpsc::channel(4);
        let handle = spawn_loader(
            DatasetKind::Pricing,
            PathBuf::from("/nonexistent/parcels.json"),
            10,
            tx,
        );
        assert!(rx.recv().await.is_none());
        assert!(matches!(handle.await.unwrap(), Err(AppError::Read { .. })));
    }
}
