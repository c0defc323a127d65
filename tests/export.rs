use std::fs;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use polars::prelude::*;

use hf_profiles::config::PROFILE_COLUMNS;
use hf_profiles::{
    export_with, fetch_dataset, run, DataSet, ExportConfig, ExportPlan, Fetch, Refresh, Source,
};

/// 内存里的数据源，记录最后一次收到的 refresh 参数
struct MemoryFetcher {
    df: DataFrame,
    last_refresh: Mutex<Option<Refresh>>,
}

impl MemoryFetcher {
    fn new(df: DataFrame) -> Self {
        Self {
            df,
            last_refresh: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Fetch for MemoryFetcher {
    type Error = anyhow::Error;

    async fn fetch(&self, refresh: Refresh) -> Result<DataSet, Self::Error> {
        *self.last_refresh.lock().unwrap() = Some(refresh);
        Ok(DataSet(self.df.clone()))
    }
}

fn plan_in(dir: &Path) -> ExportPlan {
    ExportPlan {
        output: dir.join("synthetic_profiles.csv"),
        ..ExportPlan::default()
    }
}

fn two_profiles() -> DataFrame {
    df!(
        "persona" => &["student", "engineer"],
        "visit_id" => &[1i64, 2],
        "visit_time" => &["2024-01-01 10:00:00", "2024-01-02 11:30:00"],
        "url" => &["https://uni.test/courses", "https://docs.test/rust"],
        "title" => &["Courses, Spring", "The Rust Book"],
        "visit_count" => &[3i64, 7],
    )
    .unwrap()
}

#[tokio::test]
async fn two_profiles_are_exported_and_summarized() {
    let dir = tempfile::tempdir().unwrap();
    let plan = plan_in(dir.path());
    let fetcher = MemoryFetcher::new(two_profiles());

    let exported = export_with(&fetcher, Refresh::Reuse, &plan).await.unwrap();
    assert_eq!(exported.fetched_rows, 2);
    assert_eq!(exported.output, plan.output);

    let csv = fs::read_to_string(&plan.output).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "persona,visit_id,visit_time,url,title,visit_count");
    assert_eq!(
        lines[1],
        "student,1,2024-01-01 10:00:00,https://uni.test/courses,\"Courses, Spring\",3"
    );

    let summary = exported.persona_summary("persona").unwrap();
    assert_eq!(summary.distinct, vec!["engineer", "student"]);
    let mut counts = summary.counts.clone();
    counts.sort();
    assert_eq!(
        counts,
        vec![("engineer".to_string(), 1), ("student".to_string(), 1)]
    );
}

#[tokio::test]
async fn header_is_allow_list_order_without_unknown_columns() {
    let dir = tempfile::tempdir().unwrap();
    let plan = plan_in(dir.path());
    let df = df!(
        "title_name" => &["Dr"],
        "internal_score" => &[0.5f64],
        "domain" => &["uni.test"],
        "persona" => &["student"],
    )
    .unwrap();

    export_with(&MemoryFetcher::new(df), Refresh::Reuse, &plan)
        .await
        .unwrap();

    let csv = fs::read_to_string(&plan.output).unwrap();
    assert_eq!(csv, "persona,domain,title_name\nstudent,uni.test,Dr\n");
}

#[tokio::test]
async fn full_schema_keeps_every_listed_column() {
    let dir = tempfile::tempdir().unwrap();
    let plan = plan_in(dir.path());
    let columns: Vec<Column> = PROFILE_COLUMNS
        .iter()
        .rev()
        .map(|name| Column::from(Series::new((*name).into(), &["x"])))
        .collect();
    let df = DataFrame::new(columns).unwrap();

    export_with(&MemoryFetcher::new(df), Refresh::Reuse, &plan)
        .await
        .unwrap();

    let csv = fs::read_to_string(&plan.output).unwrap();
    assert_eq!(csv.lines().next().unwrap(), PROFILE_COLUMNS.join(","));
}

#[tokio::test]
async fn rerun_overwrites_with_identical_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let plan = plan_in(dir.path());
    let fetcher = MemoryFetcher::new(two_profiles());

    export_with(&fetcher, Refresh::Reuse, &plan).await.unwrap();
    let first = fs::read(&plan.output).unwrap();
    export_with(&fetcher, Refresh::Reuse, &plan).await.unwrap();
    let second = fs::read(&plan.output).unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn stale_output_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let plan = plan_in(dir.path());
    fs::write(&plan.output, "old,content\n1,2\n3,4\n5,6\n7,8\n").unwrap();

    export_with(&MemoryFetcher::new(two_profiles()), Refresh::Reuse, &plan)
        .await
        .unwrap();

    let csv = fs::read_to_string(&plan.output).unwrap();
    assert!(csv.starts_with("persona,"));
    assert_eq!(csv.lines().count(), 3);
}

#[tokio::test]
async fn empty_source_writes_header_only() {
    let dir = tempfile::tempdir().unwrap();
    let plan = plan_in(dir.path());
    let df = df!(
        "persona" => Vec::<String>::new(),
        "visit_id" => Vec::<i64>::new(),
    )
    .unwrap();

    let exported = export_with(&MemoryFetcher::new(df), Refresh::Reuse, &plan)
        .await
        .unwrap();
    assert_eq!(exported.fetched_rows, 0);

    let csv = fs::read_to_string(&plan.output).unwrap();
    assert_eq!(csv, "persona,visit_id\n");

    let summary = exported.persona_summary("persona").unwrap();
    assert!(summary.distinct.is_empty());
    assert!(summary.counts.is_empty());
}

#[tokio::test]
async fn missing_persona_fails_after_the_file_is_written() {
    let dir = tempfile::tempdir().unwrap();
    let plan = plan_in(dir.path());
    let df = df!("visit_id" => &[1i64, 2]).unwrap();

    let exported = export_with(&MemoryFetcher::new(df), Refresh::Reuse, &plan)
        .await
        .unwrap();
    assert!(plan.output.exists());
    assert!(exported.persona_summary("persona").is_err());
}

#[tokio::test]
async fn missing_output_directory_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let plan = ExportPlan {
        output: dir.path().join("public").join("synthetic_profiles.csv"),
        ..ExportPlan::default()
    };

    let err = export_with(&MemoryFetcher::new(two_profiles()), Refresh::Reuse, &plan)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("failed to create"));
    assert!(!dir.path().join("public").exists());
}

#[tokio::test]
async fn refresh_reaches_the_source() {
    let dir = tempfile::tempdir().unwrap();
    let plan = plan_in(dir.path());
    let fetcher = MemoryFetcher::new(two_profiles());

    export_with(&fetcher, Refresh::Force, &plan).await.unwrap();
    assert_eq!(*fetcher.last_refresh.lock().unwrap(), Some(Refresh::Force));
}

#[tokio::test]
async fn local_parquet_source_is_exported() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("train.parquet");
    let mut df = two_profiles();
    let mut file = fs::File::create(&input).unwrap();
    ParquetWriter::new(&mut file).finish(&mut df).unwrap();
    drop(file);

    let config = ExportConfig {
        source: Source::File(input),
        plan: plan_in(dir.path()),
        ..ExportConfig::default()
    };
    let exported = fetch_dataset(&config, Refresh::Reuse).await.unwrap();
    assert_eq!(exported.fetched_rows, 2);

    let csv = fs::read_to_string(&config.plan.output).unwrap();
    assert_eq!(
        csv.lines().next().unwrap(),
        "persona,visit_id,visit_time,url,title,visit_count"
    );
    assert_eq!(csv.lines().count(), 3);
}

#[tokio::test]
async fn local_csv_source_is_exported() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("profiles.csv");
    fs::write(&input, "visit_id,persona,notes\n1,student,x\n2,engineer,y\n").unwrap();

    let config = ExportConfig {
        source: format!("file://{}", input.display()).parse().unwrap(),
        plan: plan_in(dir.path()),
        ..ExportConfig::default()
    };
    let exported = fetch_dataset(&config, Refresh::Force).await.unwrap();

    let csv = fs::read_to_string(&exported.output).unwrap();
    assert_eq!(csv, "persona,visit_id\nstudent,1\nengineer,2\n");
}

fn csv_source(dir: &Path) -> Source {
    let input = dir.join("profiles.csv");
    fs::write(&input, "visit_id,persona\n1,student\n2,student\n3,engineer\n").unwrap();
    Source::File(input)
}

#[tokio::test]
async fn run_reports_progress_and_distribution() {
    let dir = tempfile::tempdir().unwrap();
    let config = ExportConfig {
        source: csv_source(dir.path()),
        plan: plan_in(dir.path()),
        ..ExportConfig::default()
    };

    let mut out = Vec::new();
    run(&config, Refresh::Reuse, &mut out).await.unwrap();
    let out = String::from_utf8(out).unwrap();
    let expected = format!(
        "Loading dataset from Hugging Face...\n\
         Dataset loaded: 3 rows\n\
         Saved 3 rows to {}\n\
         Unique personas found: [\"engineer\", \"student\"]\n\
         Persona distribution:\n\
         student   2\n\
         engineer  1\n",
        config.plan.output.display()
    );
    assert_eq!(out, expected);
}

#[tokio::test]
async fn run_reports_loaded_rows_before_a_failed_write() {
    let dir = tempfile::tempdir().unwrap();
    let config = ExportConfig {
        source: csv_source(dir.path()),
        plan: ExportPlan {
            output: dir.path().join("public").join("synthetic_profiles.csv"),
            ..ExportPlan::default()
        },
        ..ExportConfig::default()
    };

    let mut out = Vec::new();
    let err = run(&config, Refresh::Reuse, &mut out).await.unwrap_err();
    assert!(err.to_string().contains("failed to create"));

    let out = String::from_utf8(out).unwrap();
    assert!(out.contains("Dataset loaded: 3 rows\n"));
    assert!(!out.contains("Saved"));
}
