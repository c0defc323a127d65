use anyhow::Result;
use tracing_subscriber::EnvFilter;

use hf_profiles::cli::Args;
use hf_profiles::{run, ExportConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // 日志走 stderr，stdout 只输出结果
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::from_env();
    let config = ExportConfig::from_env()?;

    run(&config, args.refresh(), std::io::stdout()).await
}
