use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info};

use crate::config::FetchSettings;
use crate::hub::HubFetcher;
use crate::load::detect_content;
use crate::rows::RowsFetcher;
use crate::DataSet;

// rust 的 async trait 还没有稳定，可以用async_trait 宏
#[async_trait]
pub trait Fetch {
    type Error;
    async fn fetch(&self, refresh: Refresh) -> Result<DataSet, Self::Error>;
}

/// 是否绕过本地缓存重新下载
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Refresh {
    #[default]
    Reuse,
    Force,
}

impl Refresh {
    pub fn from_force(force: bool) -> Self {
        if force {
            Refresh::Force
        } else {
            Refresh::Reuse
        }
    }
}

/// 数据来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// hub 上的 parquet 转换分支
    Hub(String),
    /// datasets-server 的 rows 接口，分页拉取
    Rows(String),
    /// 直接下载的 parquet / csv 文件
    Url(String),
    /// 本地 parquet / csv 文件
    File(PathBuf),
}

impl FromStr for Source {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(path) = s.strip_prefix("file://") {
            if path.is_empty() {
                bail!("file source needs a path");
            }
            return Ok(Source::File(PathBuf::from(path)));
        }
        if s.starts_with("http://") || s.starts_with("https://") {
            return Ok(Source::Url(s.to_string()));
        }
        if let Some(id) = s.strip_prefix("rows://") {
            return Ok(Source::Rows(repo_id(id)?));
        }
        let id = s.strip_prefix("hf://").unwrap_or(s);
        Ok(Source::Hub(repo_id(id)?))
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Hub(id) => write!(f, "hf://{id}"),
            Source::Rows(id) => write!(f, "rows://{id}"),
            Source::Url(url) => f.write_str(url),
            Source::File(path) => write!(f, "file://{}", path.display()),
        }
    }
}

fn repo_id(id: &str) -> Result<String> {
    let valid = !id.is_empty()
        && !id.chars().any(char::is_whitespace)
        && id.split('/').count() <= 2
        && id.split('/').all(|part| !part.is_empty());
    if !valid {
        return Err(anyhow!("invalid dataset id: {:?}", id));
    }
    Ok(id.to_string())
}

/// 按来源类型选择 fetcher，拉取数据组成 DataSet
pub async fn retrieve_data(
    source: &Source,
    settings: &FetchSettings,
    refresh: Refresh,
) -> Result<DataSet> {
    info!("retrieving data from source: {}", source);
    match source {
        Source::Hub(id) => HubFetcher::new(id, settings)?.fetch(refresh).await,
        Source::Rows(id) => RowsFetcher::new(id, settings)?.fetch(refresh).await,
        Source::Url(url) => UrlFetcher(url).fetch(refresh).await,
        Source::File(path) => FileFetcher(path.clone()).fetch(refresh).await,
    }
}

pub struct UrlFetcher<'a>(pub(crate) &'a str);

#[async_trait]
impl<'a> Fetch for UrlFetcher<'a> {
    type Error = anyhow::Error;

    async fn fetch(&self, refresh: Refresh) -> Result<DataSet, Self::Error> {
        if refresh == Refresh::Force {
            debug!("direct downloads are not cached, nothing to refresh");
        }
        let data = reqwest::get(self.0)
            .await?
            .error_for_status()?
            .bytes()
            .await
            .with_context(|| format!("failed to download {}", self.0))?;
        let name = self.0.split('?').next().unwrap_or(self.0);
        detect_content(name, data.to_vec()).load()
    }
}

pub struct FileFetcher(pub PathBuf);

#[async_trait]
impl Fetch for FileFetcher {
    type Error = anyhow::Error;

    async fn fetch(&self, _refresh: Refresh) -> Result<DataSet, Self::Error> {
        let data = fs::read(&self.0)
            .await
            .with_context(|| format!("failed to read {}", self.0.display()))?;
        detect_content(&self.0.to_string_lossy(), data).load()
    }
}
