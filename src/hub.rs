use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use hf_hub::api::tokio::{Api, ApiBuilder, ApiRepo};
use hf_hub::{Cache, Repo, RepoType};
use tracing::{debug, info, warn};

use crate::config::FetchSettings;
use crate::fetcher::{Fetch, Refresh};
use crate::load::detect_content;
use crate::DataSet;

/// hub 为每个数据集自动生成的 parquet 分支
pub const PARQUET_REVISION: &str = "refs/convert/parquet";

/// 从 hub 的 parquet 转换分支读取一个 split，本地缓存由 hf-hub 维护
pub struct HubFetcher {
    api: Api,
    cache_root: PathBuf,
    dataset: String,
    subset: String,
    split: String,
}

impl HubFetcher {
    pub fn new(dataset: &str, settings: &FetchSettings) -> Result<Self> {
        let mut builder = ApiBuilder::from_env().with_progress(false);
        if let Some(token) = &settings.token {
            builder = builder.with_token(Some(token.clone()));
        }
        let cache_root = match &settings.cache_dir {
            Some(dir) => {
                builder = builder.with_cache_dir(dir.clone());
                dir.clone()
            }
            None => Cache::from_env().path().clone(),
        };

        Ok(Self {
            api: builder.build().context("failed to set up the hub client")?,
            cache_root,
            dataset: dataset.to_string(),
            subset: settings.subset.clone(),
            split: settings.split.clone(),
        })
    }
}

/// 对 hub 仓库的最小访问接口
#[async_trait]
pub trait ShardRepo: Send + Sync {
    /// 仓库里所有文件的相对路径，需要联网
    async fn files(&self) -> Result<Vec<String>>;
    /// 优先使用本地缓存
    async fn get(&self, file: &str) -> Result<PathBuf>;
    /// 忽略缓存重新下载
    async fn download(&self, file: &str) -> Result<PathBuf>;
    /// 本地缓存快照里已有的文件
    fn cached_files(&self) -> Vec<String>;
}

struct HubRepo {
    repo: ApiRepo,
    repo_dir: PathBuf,
}

#[async_trait]
impl ShardRepo for HubRepo {
    async fn files(&self) -> Result<Vec<String>> {
        let info = self.repo.info().await?;
        Ok(info.siblings.into_iter().map(|s| s.rfilename).collect())
    }

    async fn get(&self, file: &str) -> Result<PathBuf> {
        Ok(self.repo.get(file).await?)
    }

    async fn download(&self, file: &str) -> Result<PathBuf> {
        Ok(self.repo.download(file).await?)
    }

    fn cached_files(&self) -> Vec<String> {
        snapshot_files(&self.repo_dir, PARQUET_REVISION)
    }
}

/// hf-hub 缓存目录下数据集仓库的文件夹名
pub fn cache_folder(dataset: &str) -> String {
    format!("datasets--{}", dataset.replace('/', "--"))
}

/// 读取 `refs/<revision>` 指向的快照，列出其中的文件（相对路径，`/` 分隔）
pub fn snapshot_files(repo_dir: &Path, revision: &str) -> Vec<String> {
    let Ok(commit) = fs::read_to_string(repo_dir.join("refs").join(revision)) else {
        return Vec::new();
    };
    let root = repo_dir.join("snapshots").join(commit.trim());

    let mut files = Vec::new();
    let mut pending = vec![root.clone()];
    while let Some(dir) = pending.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if let Ok(relative) = path.strip_prefix(&root) {
                let parts: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                files.push(parts.join("/"));
            }
        }
    }
    files.sort();
    files
}

/// 选出属于 `subset/split` 的 parquet 分片，按文件名排序
pub fn parquet_shards<'a>(
    files: impl IntoIterator<Item = &'a str>,
    subset: &str,
    split: &str,
) -> Vec<String> {
    let files: Vec<&str> = files
        .into_iter()
        .filter(|f| f.ends_with(".parquet"))
        .collect();

    let full = format!("{subset}/{split}/");
    let partial = format!("{subset}/partial-{split}/");
    for prefix in [full, partial] {
        let mut shards: Vec<String> = files
            .iter()
            .filter(|f| f.starts_with(&prefix))
            .map(|f| f.to_string())
            .collect();
        if !shards.is_empty() {
            shards.sort();
            return shards;
        }
    }
    Vec::new()
}

/// 列出分片并逐个加载；Reuse 时 hub 不可达则退回本地快照
pub async fn load_split(
    repo: &dyn ShardRepo,
    dataset: &str,
    subset: &str,
    split: &str,
    refresh: Refresh,
) -> Result<DataSet> {
    let files = match repo.files().await {
        Ok(files) => files,
        Err(err) if refresh == Refresh::Reuse => {
            let cached = repo.cached_files();
            if cached.is_empty() {
                return Err(err.context(format!(
                    "failed to list files of dataset {dataset} and nothing is cached"
                )));
            }
            warn!("hub unreachable ({err:#}), using the cached snapshot of {dataset}");
            cached
        }
        Err(err) => {
            return Err(err.context(format!("failed to list files of dataset {dataset}")))
        }
    };

    let shards = parquet_shards(files.iter().map(String::as_str), subset, split);
    if shards.is_empty() {
        bail!("dataset {dataset} has no parquet files for {subset}/{split}");
    }

    let mut parts = Vec::with_capacity(shards.len());
    for shard in &shards {
        let path = match refresh {
            Refresh::Force => repo.download(shard).await,
            Refresh::Reuse => repo.get(shard).await,
        }
        .with_context(|| format!("failed to fetch {shard} from {dataset}"))?;
        debug!("loading shard {}", path.display());

        let data = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        parts.push(detect_content(shard, data).load()?);
    }

    info!(
        "loaded {} parquet shard(s) of {} ({:?})",
        shards.len(),
        dataset,
        refresh
    );
    DataSet::concat(parts)
}

#[async_trait]
impl Fetch for HubFetcher {
    type Error = anyhow::Error;

    async fn fetch(&self, refresh: Refresh) -> Result<DataSet, Self::Error> {
        let repo = HubRepo {
            repo: self.api.repo(Repo::with_revision(
                self.dataset.clone(),
                RepoType::Dataset,
                PARQUET_REVISION.to_string(),
            )),
            repo_dir: self.cache_root.join(cache_folder(&self.dataset)),
        };
        load_split(&repo, &self.dataset, &self.subset, &self.split, refresh).await
    }
}
