use std::{io::Cursor, str::FromStr, sync::Arc};

use arrow_array::{cast::AsArray, Array, ArrayRef, RecordBatch, StringArray};
use arrow_csv::{reader::Format, ReaderBuilder, WriterBuilder};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use serde::Serialize;
use serde_json::Value;

use crate::{
    error::{DatasetError, DatasetResult},
    naming::split_extension,
};

/// One CSV record, keyed by column name in column order.
pub type CsvRow = serde_json::Map<String, Value>;

/// Dataset formats the gateway accepts, selected by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetFormat {
    Csv,
    Json,
    Jsonl,
}

impl FromStr for DatasetFormat {
    type Err = DatasetError;

    fn from_str(extension: &str) -> Result<Self, Self::Err> {
        match extension.to_ascii_lowercase().as_str() {
            "csv" => Ok(DatasetFormat::Csv),
            "json" => Ok(DatasetFormat::Json),
            "jsonl" => Ok(DatasetFormat::Jsonl),
            _ => Err(DatasetError::UnsupportedFormat {
                extension: extension.to_string(),
            }),
        }
    }
}

impl DatasetFormat {
    pub fn from_filename(filename: &str) -> DatasetResult<Self> {
        let (_, extension) = split_extension(filename)?;
        extension.parse()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetFormat::Csv => "csv",
            DatasetFormat::Json => "json",
            DatasetFormat::Jsonl => "jsonl",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            DatasetFormat::Csv => "text/csv",
            DatasetFormat::Json => "application/json",
            DatasetFormat::Jsonl => "application/x-ndjson",
        }
    }

    pub fn codec(&self) -> &'static dyn Codec {
        match self {
            DatasetFormat::Csv => &CsvCodec,
            DatasetFormat::Json => &JsonCodec,
            DatasetFormat::Jsonl => &JsonlCodec,
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> DatasetResult<DatasetContent> {
        self.codec().decode(bytes)
    }

    pub fn encode(&self, content: &DatasetContent) -> DatasetResult<Vec<u8>> {
        self.codec().encode(content)
    }
}

/// Structured form of a dataset file. Built per request, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DatasetContent {
    Csv {
        columns: Vec<String>,
        rows: Vec<CsvRow>,
    },
    Json {
        data: Value,
    },
    Jsonl {
        data: Vec<Value>,
    },
}

impl DatasetContent {
    pub fn format(&self) -> DatasetFormat {
        match self {
            DatasetContent::Csv { .. } => DatasetFormat::Csv,
            DatasetContent::Json { .. } => DatasetFormat::Json,
            DatasetContent::Jsonl { .. } => DatasetFormat::Jsonl,
        }
    }
}

/// Converts between raw blob bytes and [`DatasetContent`] for one format.
pub trait Codec: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> DatasetResult<DatasetContent>;

    fn encode(&self, content: &DatasetContent) -> DatasetResult<Vec<u8>>;

    /// Checks one complete line of a streamed blob before it is emitted.
    fn check_line(&self, _line: &str) -> DatasetResult<()> {
        Ok(())
    }
}

fn utf8(bytes: &[u8]) -> DatasetResult<&str> {
    std::str::from_utf8(bytes).map_err(|e| DatasetError::malformed(format!("not utf-8 text: {e}")))
}

fn wrong_variant(expected: DatasetFormat, content: &DatasetContent) -> DatasetError {
    DatasetError::malformed(format!(
        "cannot encode {} content as {}",
        content.format().as_str(),
        expected.as_str()
    ))
}

/// Header-row CSV; every cell stays a string.
pub struct CsvCodec;

impl CsvCodec {
    fn string_schema(columns: &[String]) -> SchemaRef {
        let fields: Vec<Field> = columns
            .iter()
            .map(|name| Field::new(name.as_str(), DataType::Utf8, true))
            .collect();
        Arc::new(Schema::new(fields))
    }

    fn cell_text(value: Option<&Value>) -> String {
        match value {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }
}

impl Codec for CsvCodec {
    fn decode(&self, bytes: &[u8]) -> DatasetResult<DatasetContent> {
        if utf8(bytes)?.trim().is_empty() {
            return Ok(DatasetContent::Csv {
                columns: vec![],
                rows: vec![],
            });
        }

        // Only the header names are taken from inference, types are forced to utf8.
        let (header, _) = Format::default()
            .with_header(true)
            .infer_schema(Cursor::new(bytes), Some(0))
            .map_err(DatasetError::malformed)?;
        let columns: Vec<String> = header.fields().iter().map(|f| f.name().clone()).collect();

        let reader = ReaderBuilder::new(Self::string_schema(&columns))
            .with_header(true)
            .build(Cursor::new(bytes))
            .map_err(DatasetError::malformed)?;

        let mut rows = Vec::new();
        for batch in reader {
            let batch = batch.map_err(DatasetError::malformed)?;
            let arrays: Vec<&StringArray> = batch
                .columns()
                .iter()
                .map(|c| c.as_string::<i32>())
                .collect();
            for row in 0..batch.num_rows() {
                let mut record = CsvRow::new();
                for (name, array) in columns.iter().zip(&arrays) {
                    // Empty cells come back as nulls.
                    let cell = if array.is_null(row) {
                        ""
                    } else {
                        array.value(row)
                    };
                    record.insert(name.clone(), Value::String(cell.to_string()));
                }
                rows.push(record);
            }
        }
        Ok(DatasetContent::Csv { columns, rows })
    }

    fn encode(&self, content: &DatasetContent) -> DatasetResult<Vec<u8>> {
        let DatasetContent::Csv { columns, rows } = content else {
            return Err(wrong_variant(DatasetFormat::Csv, content));
        };
        if columns.is_empty() {
            return Ok(Vec::new());
        }

        let arrays: Vec<ArrayRef> = columns
            .iter()
            .map(|name| {
                let cells: StringArray = rows
                    .iter()
                    .map(|row| Some(Self::cell_text(row.get(name))))
                    .collect();
                Arc::new(cells) as ArrayRef
            })
            .collect();
        let batch = RecordBatch::try_new(Self::string_schema(columns), arrays)
            .map_err(DatasetError::malformed)?;

        let mut writer = WriterBuilder::new().with_header(true).build(Vec::new());
        writer.write(&batch).map_err(DatasetError::malformed)?;
        Ok(writer.into_inner())
    }
}

/// A single JSON document.
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn decode(&self, bytes: &[u8]) -> DatasetResult<DatasetContent> {
        let data = serde_json::from_slice(bytes).map_err(DatasetError::malformed)?;
        Ok(DatasetContent::Json { data })
    }

    fn encode(&self, content: &DatasetContent) -> DatasetResult<Vec<u8>> {
        let DatasetContent::Json { data } = content else {
            return Err(wrong_variant(DatasetFormat::Json, content));
        };
        serde_json::to_vec(data).map_err(DatasetError::malformed)
    }
}

/// Newline-delimited JSON, one value per non-empty line.
pub struct JsonlCodec;

impl JsonlCodec {
    fn parse_line(line: &str, number: usize) -> DatasetResult<Value> {
        serde_json::from_str(line)
            .map_err(|e| DatasetError::malformed(format!("line {}: {}", number, e)))
    }
}

impl Codec for JsonlCodec {
    fn decode(&self, bytes: &[u8]) -> DatasetResult<DatasetContent> {
        let data = utf8(bytes)?
            .trim()
            .split('\n')
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| Self::parse_line(line, i + 1))
            .collect::<DatasetResult<Vec<_>>>()?;
        Ok(DatasetContent::Jsonl { data })
    }

    fn encode(&self, content: &DatasetContent) -> DatasetResult<Vec<u8>> {
        let DatasetContent::Jsonl { data } = content else {
            return Err(wrong_variant(DatasetFormat::Jsonl, content));
        };
        let mut out = Vec::new();
        for value in data {
            serde_json::to_writer(&mut out, value).map_err(DatasetError::malformed)?;
            out.push(b'\n');
        }
        Ok(out)
    }

    fn check_line(&self, line: &str) -> DatasetResult<()> {
        if line.trim().is_empty() {
            return Ok(());
        }
        serde_json::from_str::<serde::de::IgnoredAny>(line)
            .map(|_| ())
            .map_err(DatasetError::malformed)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn row(pairs: &[(&str, &str)]) -> CsvRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect()
    }

    #[test]
    fn test_format_from_filename() {
        assert_eq!(
            DatasetFormat::from_filename("prompts.csv").unwrap(),
            DatasetFormat::Csv
        );
        assert_eq!(
            DatasetFormat::from_filename("data.backup.JSON").unwrap(),
            DatasetFormat::Json
        );
        assert_eq!(
            DatasetFormat::from_filename("train.jsonl").unwrap(),
            DatasetFormat::Jsonl
        );
        assert!(matches!(
            DatasetFormat::from_filename("notes.txt"),
            Err(DatasetError::UnsupportedFormat { .. })
        ));
        assert!(matches!(
            DatasetFormat::from_filename("notes"),
            Err(DatasetError::InvalidFilename { .. })
        ));
    }

    #[test]
    fn test_csv_decode() {
        let content = DatasetFormat::Csv
            .decode(b"act,prompt\nLinux Terminal,\"ls, then pwd\"\nPoet,\n")
            .unwrap();
        assert_eq!(
            content,
            DatasetContent::Csv {
                columns: vec!["act".to_string(), "prompt".to_string()],
                rows: vec![
                    row(&[("act", "Linux Terminal"), ("prompt", "ls, then pwd")]),
                    row(&[("act", "Poet"), ("prompt", "")]),
                ],
            }
        );
    }

    #[test]
    fn test_csv_keeps_numbers_as_strings() {
        let content = DatasetFormat::Csv.decode(b"id,score\n1,0.5\n").unwrap();
        let DatasetContent::Csv { rows, .. } = content else {
            panic!("expected csv content");
        };
        assert_eq!(rows[0]["id"], json!("1"));
        assert_eq!(rows[0]["score"], json!("0.5"));
    }

    #[test]
    fn test_csv_round_trip() {
        let content = DatasetContent::Csv {
            columns: vec!["name".to_string(), "note".to_string(), "n".to_string()],
            rows: vec![
                row(&[("name", "a"), ("note", "has, comma"), ("n", "1")]),
                row(&[("name", "b"), ("note", "has \"quotes\""), ("n", "2")]),
                row(&[("name", "c"), ("note", "multi\nline"), ("n", "3")]),
            ],
        };
        let bytes = DatasetFormat::Csv.encode(&content).unwrap();
        assert!(bytes.starts_with(b"name,note,n\n"));
        assert_eq!(DatasetFormat::Csv.decode(&bytes).unwrap(), content);
    }

    #[test]
    fn test_csv_header_only() {
        let content = DatasetFormat::Csv.decode(b"a,b\n").unwrap();
        assert_eq!(
            content,
            DatasetContent::Csv {
                columns: vec!["a".to_string(), "b".to_string()],
                rows: vec![],
            }
        );
    }

    #[test]
    fn test_csv_normalizes_line_endings() {
        let content = DatasetFormat::Csv.decode(b"a,b\r\n1,2\r\n").unwrap();
        let bytes = DatasetFormat::Csv.encode(&content).unwrap();
        assert_eq!(bytes, b"a,b\n1,2\n");
    }

    #[test]
    fn test_csv_malformed() {
        assert!(matches!(
            DatasetFormat::Csv.decode(&[0x61, 0x2c, 0xff, 0xfe, 0x0a]),
            Err(DatasetError::MalformedInput { .. })
        ));
        assert!(matches!(
            DatasetFormat::Csv.decode(b"a,b\n1,2,3\n"),
            Err(DatasetError::MalformedInput { .. })
        ));
    }

    #[test]
    fn test_json_decode() {
        let content = DatasetFormat::Json.decode(br#"{"a":1}"#).unwrap();
        assert_eq!(content, DatasetContent::Json { data: json!({"a": 1}) });
        assert!(matches!(
            DatasetFormat::Json.decode(b"{\"a\":"),
            Err(DatasetError::MalformedInput { .. })
        ));
    }

    #[test]
    fn test_json_encode_is_compact() {
        let content = DatasetFormat::Json
            .decode(b"{\n  \"a\": [1, 2],\n  \"b\": \"x\"\n}\n")
            .unwrap();
        let bytes = DatasetFormat::Json.encode(&content).unwrap();
        assert_eq!(bytes, br#"{"a":[1,2],"b":"x"}"#);
    }

    #[test]
    fn test_jsonl_decode() {
        let content = DatasetFormat::Jsonl
            .decode(b"\n{\"a\":1}\n\n[1,2]\n\"s\"\n  \n")
            .unwrap();
        assert_eq!(
            content,
            DatasetContent::Jsonl {
                data: vec![json!({"a": 1}), json!([1, 2]), json!("s")],
            }
        );
    }

    #[test]
    fn test_jsonl_single_bad_line_fails() {
        let err = DatasetFormat::Jsonl
            .decode(b"{\"a\":1}\nnot json\n{\"a\":3}\n")
            .unwrap_err();
        match err {
            DatasetError::MalformedInput { reason } => assert!(reason.starts_with("line 2")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_jsonl_encode() {
        let content = DatasetContent::Jsonl {
            data: vec![json!({"a": 1}), json!({"a": 2})],
        };
        let bytes = DatasetFormat::Jsonl.encode(&content).unwrap();
        assert_eq!(bytes, b"{\"a\":1}\n{\"a\":2}\n");
        assert_eq!(DatasetFormat::Jsonl.decode(&bytes).unwrap(), content);
    }

    #[test]
    fn test_encode_wrong_variant() {
        let content = DatasetContent::Json { data: json!(1) };
        assert!(matches!(
            DatasetFormat::Csv.encode(&content),
            Err(DatasetError::MalformedInput { .. })
        ));
    }

    #[test]
    fn test_check_line() {
        let jsonl = DatasetFormat::Jsonl.codec();
        assert!(jsonl.check_line("{\"a\":1}\n").is_ok());
        assert!(jsonl.check_line("\n").is_ok());
        assert!(jsonl.check_line("{oops\n").is_err());
        assert!(DatasetFormat::Csv.codec().check_line("anything,goes\n").is_ok());
    }

    #[test]
    fn test_content_serializes_with_type_tag() {
        let content = DatasetContent::Jsonl {
            data: vec![json!(1)],
        };
        assert_eq!(
            serde_json::to_value(&content).unwrap(),
            json!({"type": "jsonl", "data": [1]})
        );
    }
}
