//! The orchestrator: strategy fan-out, synthesis dispatch, and refinement.

use futures::stream::{self, StreamExt};
use tracing::{info, instrument};

use crate::executor::{execute_analysis, ANALYSIS_HEADER_PREFIX, EXECUTION_TIMEOUT};
use crate::gateway::{
    Attribution, GenerateGateway, GenerateRequest, MediaStore, Part, ProviderError,
};
use crate::lens::{ConfigError, LensConfig};
use crate::media::{MediaError, MediaManager, DEFAULT_CACHE_TTL};
use crate::selector::{select_bridging_lens, select_lenses, SelectorError};
use crate::strategy::{generate_strategy, Strategy, StrategyError};
use crate::synthesis::{synthesize, synthesize_comparative};
use crate::work::{Modality, UsageSnapshot, WorkInput};

/// Upper bound on chains in flight at once. Provider-side rate limits bite
/// well before parallelism does.
const MAX_CONCURRENT_CHAINS: usize = 4;

const REFINE_MAX_TOKENS: u32 = 8192;

/// Which models serve each pipeline stage.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Strategy generation ("General") calls.
    pub general: String,
    /// Execution, synthesis, and refinement calls.
    pub analysis: String,
    /// Smart-selection calls; cheaper model, structured output only.
    pub selector: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            general: "gemini-2.5-pro".into(),
            analysis: "gemini-2.5-pro".into(),
            selector: "gemini-2.5-flash".into(),
        }
    }
}

/// How the run's lens configurations are chosen.
#[derive(Debug, Clone)]
pub enum LensSource {
    /// Caller-supplied configs, used verbatim and never deduplicated here.
    Manual(Vec<LensConfig>),
    /// Delegate the choice to the smart selector.
    SmartSelect { count: usize },
}

/// One pipeline run over a single work.
///
/// The analysis mode is implied by the resolved config count: one config is a
/// single-lens run, two a dialectic, three or more a symposium.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub source: LensSource,
}

/// Everything a run returns: the final text plus the per-lens intermediates
/// in input order.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub result_text: String,
    /// `(config, raw analysis)` pairs, index-aligned with the resolved configs.
    pub contributions: Vec<(LensConfig, String)>,
    pub strategies: Vec<Strategy>,
    pub usage: UsageSnapshot,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("smart selection failed: {0}")]
    Selector(#[from] SelectorError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error("strategy generation failed for {lens}: {source}")]
    Strategy {
        lens: String,
        #[source]
        source: StrategyError,
    },
    #[error("analysis failed for {lens}: {source}")]
    Execution {
        lens: String,
        #[source]
        source: ProviderError,
    },
    #[error("synthesis failed: {0}")]
    Synthesis(#[source] ProviderError),
    #[error("refinement failed: {0}")]
    Refinement(#[source] ProviderError),
}

/// Shared handles for one run.
pub struct PipelineDeps<'a, S: MediaStore> {
    pub gateway: &'a dyn GenerateGateway,
    pub media: &'a MediaManager<S>,
    pub models: ModelConfig,
}

/// One completed strategy+execution chain.
#[derive(Debug)]
pub struct ChainOutput {
    pub config: LensConfig,
    pub strategy: Strategy,
    pub analysis: String,
}

/// Run all chains concurrently with order-stable gathering: `result[i]`
/// corresponds to `configs[i]` regardless of completion order.
pub async fn run_chains(
    gateway: &dyn GenerateGateway,
    models: &ModelConfig,
    configs: &[LensConfig],
    work: &WorkInput,
) -> Vec<Result<ChainOutput, PipelineError>> {
    stream::iter(configs.iter().cloned().map(|config| async move {
        let label = config.speaker_label();
        let strategy = generate_strategy(gateway, &models.general, &config, work)
            .await
            .map_err(|source| PipelineError::Strategy {
                lens: label.clone(),
                source,
            })?;
        let analysis = execute_analysis(gateway, &models.analysis, &strategy, work)
            .await
            .map_err(|source| PipelineError::Execution {
                lens: label,
                source,
            })?;
        Ok(ChainOutput {
            config,
            strategy,
            analysis,
        })
    }))
    .buffered(MAX_CONCURRENT_CHAINS)
    .collect()
    .await
}

async fn resolve_configs<S: MediaStore>(
    deps: &PipelineDeps<'_, S>,
    work: &WorkInput,
    source: &LensSource,
) -> Result<Vec<LensConfig>, PipelineError> {
    let configs = match source {
        LensSource::Manual(configs) => configs.clone(),
        LensSource::SmartSelect { count } => {
            let chosen = select_lenses(deps.gateway, &deps.models.selector, work, *count).await?;
            chosen
                .into_iter()
                .map(|c| LensConfig::standard(c.lens))
                .collect()
        }
    };
    if configs.is_empty() {
        return Err(ConfigError::Empty.into());
    }
    Ok(configs)
}

/// Upload the work's media and bind a shared context cache, exactly once,
/// before any chain starts. Text works pass straight through.
async fn prepare_media<S: MediaStore>(
    deps: &PipelineDeps<'_, S>,
    work: &mut WorkInput,
) -> Result<(), MediaError> {
    if work.modality == Modality::Text {
        return Ok(());
    }
    deps.media.invalidate_if_mode_changed(work).await;
    deps.media.upload(work).await?;
    if work.cache.is_none() {
        deps.media
            .create_cache(work, &deps.models.analysis, DEFAULT_CACHE_TTL)
            .await;
    }
    Ok(())
}

/// Run a full analysis over one work.
///
/// A single resolved config returns the raw analysis directly; two or more
/// require every chain to succeed and then synthesize. Failed chains halt the
/// whole run: a synthesis over a partial roster would misrepresent itself.
///
/// Configs are taken verbatim and never deduplicated here; callers reject
/// duplicates up front via [`crate::lens::validate_configs`].
#[instrument(skip_all, fields(work = %work.title))]
pub async fn run_pipeline<S: MediaStore>(
    deps: &PipelineDeps<'_, S>,
    work: &mut WorkInput,
    request: &PipelineRequest,
) -> Result<PipelineOutcome, PipelineError> {
    let configs = resolve_configs(deps, work, &request.source).await?;
    prepare_media(deps, work).await?;

    info!(chains = configs.len(), "starting analysis fan-out");
    let results = run_chains(deps.gateway, &deps.models, &configs, work).await;

    let mut chains = Vec::with_capacity(results.len());
    for result in results {
        chains.push(result?);
    }

    let strategies: Vec<Strategy> = chains.iter().map(|c| c.strategy.clone()).collect();
    let contributions: Vec<(LensConfig, String)> = chains
        .into_iter()
        .map(|c| (c.config, c.analysis))
        .collect();

    let result_text = if contributions.len() == 1 {
        contributions[0].1.clone()
    } else {
        synthesize(deps.gateway, &deps.models.analysis, &contributions, work)
            .await
            .map_err(PipelineError::Synthesis)?
    };

    Ok(PipelineOutcome {
        result_text,
        usage: work.usage.snapshot(),
        contributions,
        strategies,
    })
}

/// Comparative mode: two works analyzed under one shared lens, then a
/// four-section comparative essay.
#[instrument(skip_all, fields(work_a = %work_a.title, work_b = %work_b.title))]
pub async fn run_comparative<S: MediaStore>(
    deps: &PipelineDeps<'_, S>,
    work_a: &mut WorkInput,
    work_b: &mut WorkInput,
    config: Option<LensConfig>,
) -> Result<PipelineOutcome, PipelineError> {
    let config = match config {
        Some(config) => config,
        None => {
            let chosen =
                select_bridging_lens(deps.gateway, &deps.models.selector, work_a, work_b).await?;
            LensConfig::standard(chosen.lens)
        }
    };

    prepare_media(deps, work_a).await?;
    prepare_media(deps, work_b).await?;

    // Each work gets its own chain under a clone of the shared config, and
    // both chains run at once; the 1:1 pairing keeps result order aligned
    // with (work_a, work_b).
    let (chain_a, chain_b) = futures::try_join!(
        run_one_chain(deps, &config, work_a),
        run_one_chain(deps, &config, work_b),
    )?;

    let result_text = synthesize_comparative(
        deps.gateway,
        &deps.models.analysis,
        &config.speaker_label(),
        work_a,
        &chain_a.analysis,
        work_b,
        &chain_b.analysis,
    )
    .await
    .map_err(PipelineError::Synthesis)?;

    Ok(PipelineOutcome {
        result_text,
        usage: work_a.usage.snapshot(),
        contributions: vec![
            (config.clone(), chain_a.analysis),
            (config, chain_b.analysis),
        ],
        strategies: vec![chain_a.strategy, chain_b.strategy],
    })
}

async fn run_one_chain<S: MediaStore>(
    deps: &PipelineDeps<'_, S>,
    config: &LensConfig,
    work: &WorkInput,
) -> Result<ChainOutput, PipelineError> {
    let mut results = run_chains(
        deps.gateway,
        &deps.models,
        std::slice::from_ref(config),
        work,
    )
    .await;
    results.remove(0)
}

/// Rework a previous result according to a user instruction.
///
/// One call, reusing the uploaded media reference and context cache; the work
/// is never re-uploaded. The output is a complete replacement, with persona
/// and lens preserved unless the instruction says otherwise.
pub async fn refine(
    gateway: &dyn GenerateGateway,
    model: &str,
    work: &WorkInput,
    previous_result: &str,
    instruction: &str,
) -> Result<String, PipelineError> {
    let mut parts = vec![Part::text(format!(
        "A critical analysis of \"{title}\" follows, then a revision \
         instruction. Produce a complete replacement for the analysis that \
         applies the instruction. Preserve the speaking persona, the \
         interpretive lens, and the `{ANALYSIS_HEADER_PREFIX}` header unless \
         the instruction explicitly changes them. Output only the revised \
         analysis.\n\n\
         --- Previous analysis ---\n{previous_result}\n\n\
         --- Revision instruction ---\n{instruction}",
        title = work.title
    ))];

    if let Some(file) = &work.remote_file {
        parts.push(Part::file(file.clone()));
    } else if let Some(text) = &work.text_data {
        parts.push(Part::text(format!("--- The work itself ---\n{text}")));
    }

    let mut request = GenerateRequest::new(model, parts, Attribution::new("pipeline::refine"))
        .temperature(0.7)
        .max_output_tokens(REFINE_MAX_TOKENS)
        .timeout(EXECUTION_TIMEOUT);
    if let Some(binding) = &work.cache {
        request = request.cached_content(binding.handle.clone());
    }

    let response = gateway
        .generate(request)
        .await
        .map_err(PipelineError::Refinement)?;
    work.usage.record(&response.usage);
    Ok(response.text)
}
