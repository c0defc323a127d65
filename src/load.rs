use std::io::Cursor;

use anyhow::Result;
use polars::prelude::*;
use serde_json::{Map, Value};
use tracing::debug;

use crate::DataSet;

const PARQUET_MAGIC: &[u8] = b"PAR1";
static MISSING: Value = Value::Null;

/// 拉取到的原始内容，按格式加载成 DataSet
pub enum Loader {
    Parquet(Vec<u8>),
    Csv(Vec<u8>),
    Rows(RowBatch),
}

/// rows 接口返回的一批 JSON 行，以及每一列的类型
#[derive(Debug, Default)]
pub struct RowBatch {
    pub columns: Vec<(String, ColumnKind)>,
    pub rows: Vec<Map<String, Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ColumnKind {
    Int,
    Float,
    Bool,
    Text,
}

impl ColumnKind {
    /// hub 的 feature dtype，例如 `int64`、`string`
    pub fn from_dtype(dtype: &str) -> Self {
        match dtype {
            "int8" | "int16" | "int32" | "int64" | "uint8" | "uint16" | "uint32" | "uint64" => {
                ColumnKind::Int
            }
            "float16" | "float32" | "float64" => ColumnKind::Float,
            "bool" => ColumnKind::Bool,
            _ => ColumnKind::Text,
        }
    }

    /// 没有 feature 信息时从值推断
    pub fn infer<'a>(values: impl IntoIterator<Item = &'a Value>) -> Self {
        let mut kind = None;
        for value in values {
            let seen = match value {
                Value::Null => continue,
                Value::Bool(_) => ColumnKind::Bool,
                Value::Number(n) if n.is_i64() => ColumnKind::Int,
                Value::Number(_) => ColumnKind::Float,
                _ => return ColumnKind::Text,
            };
            kind = Some(match (kind, seen) {
                (None, k) => k,
                (Some(a), b) if a == b => a,
                (Some(ColumnKind::Int), ColumnKind::Float)
                | (Some(ColumnKind::Float), ColumnKind::Int) => ColumnKind::Float,
                _ => return ColumnKind::Text,
            });
        }
        kind.unwrap_or(ColumnKind::Text)
    }
}

pub fn detect_content(name: &str, data: Vec<u8>) -> Loader {
    if data.starts_with(PARQUET_MAGIC) || name.ends_with(".parquet") {
        Loader::Parquet(data)
    } else {
        Loader::Csv(data)
    }
}

impl Loader {
    pub fn load(self) -> Result<DataSet> {
        let df = match self {
            Loader::Parquet(data) => ParquetReader::new(Cursor::new(data)).finish()?,
            Loader::Csv(data) => CsvReader::new(Cursor::new(data)).finish()?,
            Loader::Rows(batch) => rows_to_frame(batch)?,
        };
        debug!(rows = df.height(), columns = df.width(), "loaded data frame");
        Ok(DataSet(df))
    }
}

fn rows_to_frame(batch: RowBatch) -> Result<DataFrame> {
    let RowBatch { columns, rows } = batch;
    let columns = columns
        .into_iter()
        .map(|(name, kind)| {
            let values: Vec<&Value> = rows
                .iter()
                .map(|row| row.get(&name).unwrap_or(&MISSING))
                .collect();
            Column::from(build_series(&name, kind, &values))
        })
        .collect();
    Ok(DataFrame::new(columns)?)
}

fn build_series(name: &str, kind: ColumnKind, values: &[&Value]) -> Series {
    // 值与声明类型不符时整列退化为文本
    let typed = match kind {
        ColumnKind::Int => collect_typed(values, Value::as_i64).map(|v| Series::new(name.into(), v)),
        ColumnKind::Float => {
            collect_typed(values, Value::as_f64).map(|v| Series::new(name.into(), v))
        }
        ColumnKind::Bool => {
            collect_typed(values, Value::as_bool).map(|v| Series::new(name.into(), v))
        }
        ColumnKind::Text => None,
    };
    typed.unwrap_or_else(|| {
        let text: Vec<Option<String>> = values.iter().map(|v| text_value(v)).collect();
        Series::new(name.into(), text)
    })
}

fn collect_typed<T>(values: &[&Value], cast: fn(&Value) -> Option<T>) -> Option<Vec<Option<T>>> {
    values
        .iter()
        .map(|v| match v {
            Value::Null => Some(None),
            v => cast(v).map(Some),
        })
        .collect()
}

fn text_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
