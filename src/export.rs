use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use polars::prelude::*;
use tracing::info;

use crate::config::ExportPlan;
use crate::DataSet;

const COUNT_COLUMN: &str = "count";

/// 导出完成后的结果，summary 由调用方按需计算
#[derive(Debug)]
pub struct Exported {
    pub dataset: DataSet,
    pub fetched_rows: usize,
    pub output: PathBuf,
}

impl Exported {
    pub fn persona_summary(&self, column: &str) -> Result<PersonaSummary> {
        self.dataset.persona_summary(column)
    }
}

/// persona 列的去重值与频次
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersonaSummary {
    /// 按字典序排序
    pub distinct: Vec<String>,
    /// 按频次降序，频次相同的顺序不保证
    pub counts: Vec<(String, u64)>,
}

impl fmt::Display for PersonaSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.counts.iter().map(|(p, _)| p.chars().count()).max().unwrap_or(0);
        for (persona, count) in &self.counts {
            writeln!(f, "{persona:<width$}  {count}")?;
        }
        Ok(())
    }
}

impl DataSet {
    /// 只保留 allow list 中实际存在的列，顺序以 allow list 为准
    pub fn project(&self, allow_list: &[String]) -> Result<DataSet> {
        let mut keep: Vec<&str> = Vec::new();
        for name in allow_list {
            if self.column(name).is_ok() && !keep.contains(&name.as_str()) {
                keep.push(name);
            }
        }
        Ok(DataSet(self.select(keep)?))
    }

    /// 写出 CSV：带表头，不带行号
    pub fn write_csv<W: Write>(&mut self, writer: W) -> Result<()> {
        CsvWriter::new(writer)
            .include_header(true)
            .with_separator(b',')
            .finish(&mut self.0)?;
        Ok(())
    }

    pub fn persona_summary(&self, column: &str) -> Result<PersonaSummary> {
        self.column(column)
            .with_context(|| format!("column `{column}` is missing, cannot summarize personas"))?;

        let grouped = self
            .0
            .clone()
            .lazy()
            .select([col(column).cast(DataType::String)])
            .filter(col(column).is_not_null())
            .group_by([col(column)])
            .agg([len().alias(COUNT_COLUMN)])
            .sort(
                [COUNT_COLUMN],
                SortMultipleOptions::default().with_order_descending(true),
            )
            .collect()?;

        let names = grouped.column(column)?.as_materialized_series().str()?;
        let totals = grouped
            .column(COUNT_COLUMN)?
            .cast(&DataType::UInt64)?;
        let totals = totals.as_materialized_series().u64()?;

        let counts: Vec<(String, u64)> = names
            .into_iter()
            .zip(totals.into_iter())
            .filter_map(|(name, count)| Some((name?.to_string(), count.unwrap_or(0))))
            .collect();
        let mut distinct: Vec<String> = counts.iter().map(|(name, _)| name.clone()).collect();
        distinct.sort();

        Ok(PersonaSummary { distinct, counts })
    }
}

/// 投影后写到 `plan.output`，父目录需已存在
pub fn write_export(dataset: DataSet, plan: &ExportPlan) -> Result<Exported> {
    let fetched_rows = dataset.height();
    let mut projected = dataset.project(&plan.columns)?;

    let file = File::create(&plan.output)
        .with_context(|| format!("failed to create {}", plan.output.display()))?;
    projected
        .write_csv(file)
        .with_context(|| format!("failed to write {}", plan.output.display()))?;
    info!(
        "wrote {} rows x {} columns to {}",
        projected.height(),
        projected.width(),
        plan.output.display()
    );

    Ok(Exported {
        dataset: projected,
        fetched_rows,
        output: plan.output.clone(),
    })
}
