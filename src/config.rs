use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use crate::fetcher::Source;

pub const DEFAULT_SOURCE: &str = "zijuncheng/synthetic_profiles_ver_1";
pub const DEFAULT_SUBSET: &str = "default";
pub const DEFAULT_SPLIT: &str = "train";
pub const DEFAULT_OUTPUT: &str = "public/synthetic_profiles.csv";
pub const DEFAULT_ROWS_ENDPOINT: &str = "https://datasets-server.huggingface.co";
pub const PERSONA_COLUMN: &str = "persona";

/// CSV 中保留的列，按此顺序输出
pub const PROFILE_COLUMNS: [&str; 11] = [
    "persona",
    "visit_id",
    "visit_time",
    "visit_description",
    "place_id",
    "url",
    "title",
    "domain",
    "visit_count",
    "interest",
    "title_name",
];

/// 导出配置，从环境变量读取
#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub source: Source,
    pub fetch: FetchSettings,
    pub plan: ExportPlan,
}

/// 如何访问数据来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSettings {
    pub subset: String,
    pub split: String,
    pub token: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub rows_endpoint: String,
    /// 只对 rows 接口生效，必须大于 0
    pub max_rows: Option<usize>,
}

/// 写出哪些列，写到哪里
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPlan {
    pub columns: Vec<String>,
    pub persona_column: String,
    pub output: PathBuf,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            subset: DEFAULT_SUBSET.to_string(),
            split: DEFAULT_SPLIT.to_string(),
            token: None,
            cache_dir: None,
            rows_endpoint: DEFAULT_ROWS_ENDPOINT.to_string(),
            max_rows: None,
        }
    }
}

impl Default for ExportPlan {
    fn default() -> Self {
        Self {
            columns: PROFILE_COLUMNS.iter().map(|c| c.to_string()).collect(),
            persona_column: PERSONA_COLUMN.to_string(),
            output: PathBuf::from(DEFAULT_OUTPUT),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            source: Source::Hub(DEFAULT_SOURCE.to_string()),
            fetch: FetchSettings::default(),
            plan: ExportPlan::default(),
        }
    }
}

impl ExportConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let source = lookup("PROFILES_SOURCE")
            .unwrap_or_else(|| DEFAULT_SOURCE.to_string())
            .parse::<Source>()
            .context("invalid PROFILES_SOURCE")?;

        let max_rows = match lookup("PROFILES_MAX_ROWS") {
            Some(raw) => {
                let max = raw
                    .trim()
                    .parse::<usize>()
                    .with_context(|| format!("invalid PROFILES_MAX_ROWS: {raw:?}"))?;
                if max == 0 {
                    bail!("PROFILES_MAX_ROWS must be at least 1");
                }
                Some(max)
            }
            None => None,
        };

        let columns = match lookup("PROFILES_COLUMNS") {
            Some(raw) => raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => ExportPlan::default().columns,
        };

        Ok(Self {
            source,
            fetch: FetchSettings {
                subset: lookup("PROFILES_SUBSET").unwrap_or_else(|| DEFAULT_SUBSET.to_string()),
                split: lookup("PROFILES_SPLIT").unwrap_or_else(|| DEFAULT_SPLIT.to_string()),
                token: lookup("HF_TOKEN").filter(|t| !t.is_empty()),
                cache_dir: lookup("PROFILES_CACHE_DIR").map(PathBuf::from),
                rows_endpoint: lookup("PROFILES_ROWS_ENDPOINT")
                    .unwrap_or_else(|| DEFAULT_ROWS_ENDPOINT.to_string()),
                max_rows,
            },
            plan: ExportPlan {
                columns,
                persona_column: lookup("PROFILES_PERSONA_COLUMN")
                    .unwrap_or_else(|| PERSONA_COLUMN.to_string()),
                output: lookup("PROFILES_OUTPUT")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT)),
            },
        })
    }
}
