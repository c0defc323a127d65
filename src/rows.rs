use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::config::FetchSettings;
use crate::fetcher::{Fetch, Refresh};
use crate::load::{ColumnKind, Loader, RowBatch};
use crate::DataSet;

/// datasets-server 单页最多返回 100 行
pub const PAGE_SIZE: usize = 100;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// 通过 datasets-server 的 `/rows` 接口分页拉取整个 split
pub struct RowsFetcher {
    client: reqwest::Client,
    endpoint: String,
    dataset: String,
    subset: String,
    split: String,
    token: Option<String>,
    max_rows: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RowsPage {
    #[serde(default)]
    features: Vec<Feature>,
    #[serde(default)]
    rows: Vec<RowEntry>,
    num_rows_total: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    name: String,
    #[serde(rename = "type", default)]
    kind: Value,
}

#[derive(Debug, Deserialize)]
struct RowEntry {
    row: Map<String, Value>,
}

impl RowsPage {
    fn columns(&self) -> Vec<(String, ColumnKind)> {
        if !self.features.is_empty() {
            return self
                .features
                .iter()
                .map(|f| {
                    let dtype = f.kind.get("dtype").and_then(Value::as_str).unwrap_or("");
                    (f.name.clone(), ColumnKind::from_dtype(dtype))
                })
                .collect();
        }

        let mut names: Vec<&String> = Vec::new();
        for entry in &self.rows {
            for key in entry.row.keys() {
                if !names.contains(&key) {
                    names.push(key);
                }
            }
        }
        names
            .into_iter()
            .map(|name| {
                let kind = ColumnKind::infer(self.rows.iter().filter_map(|e| e.row.get(name)));
                (name.clone(), kind)
            })
            .collect()
    }
}

impl RowsFetcher {
    pub fn new(dataset: &str, settings: &FetchSettings) -> Result<Self> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            client,
            endpoint: settings.rows_endpoint.trim_end_matches('/').to_string(),
            dataset: dataset.to_string(),
            subset: settings.subset.clone(),
            split: settings.split.clone(),
            token: settings.token.clone(),
            max_rows: settings.max_rows,
        })
    }

    async fn page(&self, offset: usize, length: usize) -> Result<RowsPage> {
        let offset = offset.to_string();
        let length = length.to_string();
        let mut request = self.client.get(format!("{}/rows", self.endpoint)).query(&[
            ("dataset", self.dataset.as_str()),
            ("config", self.subset.as_str()),
            ("split", self.split.as_str()),
            ("offset", offset.as_str()),
            ("length", length.as_str()),
        ]);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("failed to reach {}", self.endpoint))?
            .error_for_status()
            .with_context(|| format!("rows request failed at offset {offset}"))?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl Fetch for RowsFetcher {
    type Error = anyhow::Error;

    async fn fetch(&self, refresh: Refresh) -> Result<DataSet, Self::Error> {
        if refresh == Refresh::Force {
            debug!("rows API is not cached locally, nothing to refresh");
        }

        let mut batch = RowBatch::default();
        let mut columns = None;
        let mut offset = 0;
        loop {
            let remaining = self
                .max_rows
                .map(|max| max.saturating_sub(batch.rows.len()));
            // 第一页总要请求，表头来自其中的 features
            if remaining == Some(0) && columns.is_some() {
                info!("stopping at the configured limit of {} rows", batch.rows.len());
                break;
            }
            let length = remaining.map_or(PAGE_SIZE, |left| PAGE_SIZE.min(left.max(1)));

            let page = self.page(offset, length).await?;
            if columns.is_none() {
                columns = Some(page.columns());
            }
            if page.rows.is_empty() {
                break;
            }

            offset += page.rows.len();
            let take = remaining.unwrap_or(usize::MAX);
            batch
                .rows
                .extend(page.rows.into_iter().take(take).map(|entry| entry.row));
            debug!(total = batch.rows.len(), "fetched rows page");

            if page.num_rows_total.is_some_and(|total| offset >= total) {
                break;
            }
        }

        batch.columns = columns.unwrap_or_default();
        info!("fetched {} rows from {}", batch.rows.len(), self.dataset);
        Loader::Rows(batch).load()
    }
}
