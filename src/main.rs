//! `diligence` - run the data-room pipeline from the command line
//!
//! ## Commands
//!
//! - `analyze`: analyze a `.zip` data room and store the result
//! - `export`: print (or write) the markdown report for a stored result

use clap::{Parser, Subcommand};
use dataroom_diligence::config::MAX_FILE_SIZE_BYTES;
use dataroom_diligence::report::{FsReportStore, MarkdownRenderer, ReportExporter, ReportStore};
use dataroom_diligence::{
    init_tracing, ErrorKind, LanguageModelGateway, LlmConfig, Orchestrator, PipelineConfig,
    PipelineError,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use thiserror::Error;

#[derive(Parser)]
#[command(name = "diligence")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Analyze a data-room archive and render a diligence report", long_about = None)]
struct Cli {
    /// Directory holding stored results and rendered reports
    #[arg(long, global = true, env = "DILIGENCE_OUT_DIR", default_value = "reports")]
    out: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a .zip archive and store the result
    Analyze {
        /// Path to the archive (.zip, at most 25 MiB)
        archive: PathBuf,

        /// Also print the rendered markdown report
        #[arg(long)]
        print: bool,
    },

    /// Render a stored result as markdown
    Export {
        /// Result identifier printed by `analyze`
        id: String,

        /// Write the report to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("{}: {reason}", .path.display())]
    Input { path: PathBuf, reason: String },
}

impl CliError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Pipeline(e) => e.kind(),
            Self::Input { .. } => ErrorKind::InvalidRequest,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // CWD first, then the parent directory
    if dotenvy::dotenv().is_err() {
        let _ = dotenvy::from_path("../.env");
    }
    init_tracing();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("[Cli] {:?}: {}", e.kind(), e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Analyze { archive, print } => analyze(&archive, &cli.out, print).await,
        Commands::Export { id, output } => export(&id, &cli.out, output.as_deref()).await,
    }
}

async fn analyze(archive: &Path, out: &Path, print: bool) -> Result<(), CliError> {
    let bytes = read_archive(archive).await?;

    let pipeline_config = PipelineConfig::from_env()?;
    let llm_config = LlmConfig::from_env()?;
    let gateway = Arc::new(LanguageModelGateway::from_config(llm_config)?);
    let orchestrator = Orchestrator::new(gateway, pipeline_config);

    let report = orchestrator.run(bytes).await?;

    let fs_store = FsReportStore::new(out)?;
    tracing::info!("[Cli] Storing results under {}", fs_store.root().display());
    let store: Arc<dyn ReportStore> = Arc::new(fs_store);
    let id = store.save_result(&report.result)?;

    eprintln!(
        "Analyzed {}/{} files in {:.1}s ({} needing review)",
        report.files_analyzed,
        report.files_admitted,
        report.elapsed.as_secs_f64(),
        report.result.errors.len()
    );
    println!("{}", id);

    if print {
        let exporter = ReportExporter::new(store, Arc::new(MarkdownRenderer::new()));
        println!("{}", exporter.export(&id)?);
    }

    Ok(())
}

async fn export(id: &str, out: &Path, output: Option<&Path>) -> Result<(), CliError> {
    let store = Arc::new(FsReportStore::new(out)?);
    let exporter = ReportExporter::new(store, Arc::new(MarkdownRenderer::new()));
    let markdown = exporter.export(id)?;

    match output {
        Some(path) => tokio::fs::write(path, &markdown)
            .await
            .map_err(|e| CliError::Input {
                path: path.to_path_buf(),
                reason: format!("failed to write report: {}", e),
            })?,
        None => print!("{}", markdown),
    }

    Ok(())
}

/// Ingress checks the core leaves to its caller: `.zip` and ≤ 25 MiB
async fn read_archive(path: &Path) -> Result<Vec<u8>, CliError> {
    let input_error = |reason: String| CliError::Input {
        path: path.to_path_buf(),
        reason,
    };

    let is_zip = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));
    if !is_zip {
        return Err(input_error("archive must be a .zip file".to_string()));
    }

    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| input_error(e.to_string()))?;
    if metadata.len() > MAX_FILE_SIZE_BYTES {
        return Err(input_error(format!(
            "archive is {} bytes, limit is {}",
            metadata.len(),
            MAX_FILE_SIZE_BYTES
        )));
    }

    tokio::fs::read(path)
        .await
        .map_err(|e| input_error(e.to_string()))
}
