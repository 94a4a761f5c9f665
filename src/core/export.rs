// LogQuest - core/export.rs
//
// CSV and JSON export of a session's accumulated results.
// Core layer: writes to any Write trait object.

use crate::core::model::{ResultSnapshot, Tuple};
use crate::util::error::ExportError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

/// Export format, chosen from the destination's file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn from_path(path: &Path) -> Result<Self, ExportError> {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("csv") => Ok(ExportFormat::Csv),
            Some("json") => Ok(ExportFormat::Json),
            _ => Err(ExportError::UnknownFormat {
                path: path.to_path_buf(),
            }),
        }
    }
}

/// Render a cell for CSV: strings unquoted, everything else as JSON text.
fn cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Export every tuple group to CSV.
///
/// Groups may have different shapes, so each row is `group, col1, col2, ...`
/// and each group is preceded by its own header row (`group` + column names).
/// Returns the number of tuples written.
pub fn export_csv<W: Write>(
    snapshot: &ResultSnapshot,
    writer: W,
    export_path: &Path,
) -> Result<usize, ExportError> {
    let csv_err = |e| ExportError::Csv {
        path: export_path.to_path_buf(),
        source: e,
    };
    let mut csv_writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(writer);

    let mut count = 0;
    for (key, rows) in &snapshot.tuples {
        let mut header = vec!["group".to_string()];
        if let Some(desc) = snapshot.descriptor.get(key) {
            header.extend(desc.columns.iter().map(|c| c.name.clone()));
        }
        csv_writer.write_record(&header).map_err(csv_err)?;

        for row in rows {
            let mut record = Vec::with_capacity(row.len() + 1);
            record.push(key.clone());
            record.extend(row.iter().map(cell));
            csv_writer.write_record(&record).map_err(csv_err)?;
            count += 1;
        }
    }

    csv_writer.flush().map_err(|e| ExportError::Io {
        path: export_path.to_path_buf(),
        source: e,
    })?;

    Ok(count)
}

/// One JSON output object: a tuple keyed by its descriptor's column names.
#[derive(Serialize)]
struct JsonRow<'a> {
    group: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<&'a str>,
    values: BTreeMap<String, &'a serde_json::Value>,
}

fn json_row<'a>(snapshot: &'a ResultSnapshot, key: &'a str, row: &'a Tuple) -> JsonRow<'a> {
    let desc = snapshot.descriptor.get(key);
    let values = row
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let name = desc
                .and_then(|d| d.columns.get(i))
                .map(|c| c.name.clone())
                .unwrap_or_else(|| format!("col{i}"));
            (name, v)
        })
        .collect();
    JsonRow {
        group: key,
        source: desc.and_then(|d| d.source.as_deref()),
        values,
    }
}

/// Export every tuple to JSON as an array of objects.
pub fn export_json<W: Write>(
    snapshot: &ResultSnapshot,
    writer: W,
    export_path: &Path,
) -> Result<usize, ExportError> {
    let rows: Vec<JsonRow<'_>> = snapshot
        .tuples
        .iter()
        .flat_map(|(key, rows)| rows.iter().map(move |row| json_row(snapshot, key, row)))
        .collect();

    serde_json::to_writer_pretty(writer, &rows).map_err(|e| ExportError::Json {
        path: export_path.to_path_buf(),
        source: e,
    })?;
    Ok(rows.len())
}

/// Export to `path`, choosing the format from its extension.
pub fn export_to_file(snapshot: &ResultSnapshot, path: &Path) -> Result<usize, ExportError> {
    let format = ExportFormat::from_path(path)?;
    let file = std::fs::File::create(path).map_err(|e| ExportError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let writer = std::io::BufWriter::new(file);
    let count = match format {
        ExportFormat::Csv => export_csv(snapshot, writer, path)?,
        ExportFormat::Json => export_json(snapshot, writer, path)?,
    };
    tracing::info!(path = %path.display(), tuples = count, "Results exported");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{Column, ColumnType, Descriptor};
    use serde_json::json;
    use std::path::PathBuf;

    fn sample() -> ResultSnapshot {
        let mut snap = ResultSnapshot::empty();
        snap.descriptor.insert(
            "g0".to_string(),
            Descriptor {
                columns: vec![
                    Column::new("line", ColumnType::Uint64),
                    Column::new("message", ColumnType::String),
                ],
                source: Some("app.log".to_string()),
            },
        );
        snap.tuples.insert(
            "g0".to_string(),
            vec![
                vec![json!(1), json!("Error one")],
                vec![json!(2), json!("Error two")],
            ],
        );
        snap
    }

    #[test]
    fn test_csv_export() {
        let mut buf = Vec::new();
        let count = export_csv(&sample(), &mut buf, &PathBuf::from("out.csv")).unwrap();
        assert_eq!(count, 2);

        let output = String::from_utf8(buf).unwrap();
        assert!(output.starts_with("group,line,message"));
        assert!(output.contains("g0,1,Error one"));
        assert!(output.contains("g0,2,Error two"));
    }

    #[test]
    fn test_json_export() {
        let mut buf = Vec::new();
        let count = export_json(&sample(), &mut buf, &PathBuf::from("out.json")).unwrap();
        assert_eq!(count, 2);

        let parsed: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(parsed[0]["group"], "g0");
        assert_eq!(parsed[0]["source"], "app.log");
        assert_eq!(parsed[1]["values"]["message"], "Error two");
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            ExportFormat::from_path(Path::new("a.CSV")).unwrap(),
            ExportFormat::Csv
        );
        assert!(ExportFormat::from_path(Path::new("a.txt")).is_err());
    }

    #[test]
    fn test_export_to_file_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        let count = export_to_file(&sample(), &path).unwrap();
        assert_eq!(count, 2);
        assert!(std::fs::read_to_string(&path).unwrap().contains("Error one"));
    }
}
