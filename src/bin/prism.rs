#![forbid(unsafe_code)]

use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Deserialize;

use prism_harness::gateway::{GeminiAdapter, ProviderGateway, StderrUsageSink};
use prism_harness::lens::{list_all_lens_names, validate_configs, LensConfig};
use prism_harness::media::MediaManager;
use prism_harness::pipeline::{
    run_pipeline, LensSource, ModelConfig, PipelineDeps, PipelineRequest,
};
use prism_harness::work::{LocalFile, Modality, VideoMode, WorkInput};

#[derive(Parser)]
#[command(name = "prism", version, about = "Prism harness CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an analysis pipeline from a JSON request file
    Analyze {
        /// Path to the analysis request JSON
        #[arg(long)]
        request: PathBuf,
        /// Write the final result here (stdout when omitted)
        #[arg(long)]
        out: Option<PathBuf>,
        /// Also write every per-lens analysis to this directory
        #[arg(long)]
        contributions_dir: Option<PathBuf>,
    },
    /// List the known interpretive lenses
    Lenses,
}

/// On-disk shape of an analysis request.
#[derive(Deserialize)]
struct AnalyzeRequestFile {
    title: String,
    /// Inline text of the work; mutually exclusive with `file`.
    text: Option<String>,
    /// Path to a local media file to upload.
    file: Option<PathBuf>,
    modality: Option<Modality>,
    video_mode: Option<VideoMode>,
    keyframe_interval_secs: Option<u32>,
    /// Explicit lens configurations, used verbatim.
    configs: Option<Vec<LensConfig>>,
    /// Delegate lens choice to the smart selector.
    smart_select: Option<usize>,
}

impl AnalyzeRequestFile {
    fn into_work_and_source(self) -> Result<(WorkInput, LensSource), String> {
        let source = match (self.configs, self.smart_select) {
            (Some(configs), None) => {
                // Duplicate/completeness checks live with the caller; the
                // pipeline runs whatever it is handed.
                validate_configs(&configs).map_err(|e| e.to_string())?;
                LensSource::Manual(configs)
            }
            (None, Some(count)) => LensSource::SmartSelect { count },
            (Some(_), Some(_)) => {
                return Err("request sets both `configs` and `smart_select`".into())
            }
            (None, None) => return Err("request needs `configs` or `smart_select`".into()),
        };

        let work = match (self.text, self.file) {
            (Some(text), None) => WorkInput::text(self.title, text),
            (None, Some(path)) => {
                let bytes = fs::read(&path).map_err(|e| format!("reading {path:?}: {e}"))?;
                let modality = self
                    .modality
                    .ok_or("media requests must set `modality`")?;
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "upload.bin".to_string());
                let mut work = WorkInput::media(
                    self.title,
                    modality,
                    LocalFile {
                        file_name,
                        mime_type: None,
                        bytes,
                    },
                );
                if let Some(mode) = self.video_mode {
                    work = work.with_video_mode(mode, self.keyframe_interval_secs.unwrap_or(10));
                }
                work
            }
            (Some(_), Some(_)) => return Err("request sets both `text` and `file`".into()),
            (None, None) => return Err("request needs `text` or `file`".into()),
        };

        Ok((work, source))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Lenses => {
            for name in list_all_lens_names() {
                println!("{name}");
            }
        }
        Commands::Analyze {
            request,
            out,
            contributions_dir,
        } => {
            let raw = fs::read_to_string(&request)?;
            let parsed: AnalyzeRequestFile = serde_json::from_str(&raw)?;
            let (mut work, source) = parsed.into_work_and_source()?;

            let gateway = ProviderGateway::from_env(Arc::new(StderrUsageSink))?;
            let media = MediaManager::new(GeminiAdapter::from_env()?);
            let deps = PipelineDeps {
                gateway: &gateway,
                media: &media,
                models: ModelConfig::default(),
            };

            let outcome = run_pipeline(&deps, &mut work, &PipelineRequest { source }).await;

            // Remote media is released whether or not the run succeeded; the
            // CLI has no session to carry resources into, and a leaked cache
            // is billed for its whole TTL.
            media.release(&mut work).await;
            let outcome = outcome?;

            match out {
                Some(path) => fs::write(path, &outcome.result_text)?,
                None => println!("{}", outcome.result_text),
            }

            if let Some(dir) = contributions_dir {
                fs::create_dir_all(&dir)?;
                for (i, (config, analysis)) in outcome.contributions.iter().enumerate() {
                    let label = config
                        .speaker_label()
                        .to_lowercase()
                        .replace(|c: char| !c.is_ascii_alphanumeric(), "_");
                    let mut file = File::create(dir.join(format!("{:02}_{label}.md", i + 1)))?;
                    writeln!(file, "{analysis}")?;
                }
            }

            tracing::info!(
                api_calls = outcome.usage.api_calls,
                input_tokens = outcome.usage.input_tokens,
                output_tokens = outcome.usage.output_tokens,
                cached_tokens = outcome.usage.cached_tokens,
                "analysis complete"
            );
        }
    }

    Ok(())
}
