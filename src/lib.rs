use std::io::Write;
use std::ops::{Deref, DerefMut};

use anyhow::Result;
use polars::frame::DataFrame;
use tracing::info;

pub mod cli;
pub mod config;
pub mod export;
pub mod fetcher;
pub mod hub;
pub mod load;
pub mod rows;

pub use config::{ExportConfig, ExportPlan, FetchSettings};
pub use export::{write_export, Exported, PersonaSummary};
pub use fetcher::{retrieve_data, Fetch, Refresh, Source};

#[derive(Debug)]
pub struct DataSet(pub DataFrame);

impl Deref for DataSet {
    type Target = DataFrame;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for DataSet {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

// DataSet 内部方法
impl DataSet {
    /// DataSet 转换为 CSV
    pub fn to_csv(&mut self) -> Result<String> {
        let mut buf = Vec::new();
        self.write_csv(&mut buf)?;
        Ok(String::from_utf8(buf)?)
    }

    /// 按顺序拼接同一 schema 的多个分片
    pub fn concat(parts: Vec<DataSet>) -> Result<DataSet> {
        let mut parts = parts.into_iter();
        let Some(DataSet(mut df)) = parts.next() else {
            return Ok(DataSet(DataFrame::empty()));
        };
        for part in parts {
            df.vstack_mut(&part)?;
        }
        Ok(DataSet(df))
    }
}

/// 从配置的来源拉取数据集，投影后写出 CSV
pub async fn fetch_dataset(config: &ExportConfig, refresh: Refresh) -> Result<Exported> {
    let ds = retrieve_data(&config.source, &config.fetch, refresh).await?;
    info!("dataset loaded: {} rows", ds.height());
    write_export(ds, &config.plan)
}

/// 命令行流程：进度与 summary 写到 `out`，行数在写文件之前输出
pub async fn run<W: Write>(config: &ExportConfig, refresh: Refresh, mut out: W) -> Result<()> {
    writeln!(out, "Loading dataset from Hugging Face...")?;
    let ds = retrieve_data(&config.source, &config.fetch, refresh).await?;
    writeln!(out, "Dataset loaded: {} rows", ds.height())?;

    let exported = write_export(ds, &config.plan)?;
    writeln!(
        out,
        "Saved {} rows to {}",
        exported.dataset.height(),
        exported.output.display()
    )?;

    let summary = exported.persona_summary(&config.plan.persona_column)?;
    writeln!(out, "Unique personas found: {:?}", summary.distinct)?;
    writeln!(out, "Persona distribution:")?;
    write!(out, "{summary}")?;
    Ok(())
}

/// 同 `fetch_dataset`，但数据来源由调用方提供
pub async fn export_with<F>(fetcher: &F, refresh: Refresh, plan: &ExportPlan) -> Result<Exported>
where
    F: Fetch<Error = anyhow::Error> + Sync + ?Sized,
{
    let ds = fetcher.fetch(refresh).await?;
    info!("dataset loaded: {} rows", ds.height());
    write_export(ds, plan)
}
