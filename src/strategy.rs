//! Stage 1 of the two-tier chain: turning a lens configuration into a
//! detailed analysis strategy for the executor.
//!
//! Prompt assembly is pure and fully unit-testable; only
//! [`generate_strategy`] touches the network.

use std::time::Duration;

use crate::executor::ANALYSIS_HEADER_PREFIX;
use crate::gateway::{Attribution, GenerateGateway, GenerateRequest, Part, ProviderError};
use crate::lens::{get_lens_entry, LensConfig, LensEntry, PersonaChoice, ScopeMode};
use crate::work::{Modality, VideoMode, WorkInput};

/// Timeout for the strategy-generation call. Shorter than execution:
/// the output is an instruction set, not a full analysis.
const STRATEGY_TIMEOUT: Duration = Duration::from_secs(180);

const STRATEGY_MAX_TOKENS: u32 = 4096;

/// A generated stage-2 instruction set, tagged with the label used when the
/// strategy's analysis later appears in a synthesis.
#[derive(Debug, Clone)]
pub struct Strategy {
    pub lens_label: String,
    pub text: String,
}

#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    #[error("zeitgeist configuration requires both context and persona")]
    IncompleteZeitgeist,
    #[error("unknown lens: {0}")]
    UnknownLens(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

// =============================================================================
// Zeitgeist (bypasses the lens knowledge base entirely)
// =============================================================================

/// Build the strategy for a Zeitgeist simulation directly, with no remote call.
///
/// The witness persona and historical frame are user-authored, so there is
/// nothing for a strategist model to decide.
fn build_zeitgeist_strategy(context: &str, persona: &str) -> Result<String, StrategyError> {
    if context.trim().is_empty() || persona.trim().is_empty() {
        return Err(StrategyError::IncompleteZeitgeist);
    }

    Ok(format!(
        "Fully adopt the following persona and do not break character: {persona}.\n\
         You are a witness living within this historical context: {context}.\n\n\
         Analyze the work strictly from inside this context. Restrict yourself \
         to knowledge, vocabulary, and frames of reference available to your \
         persona at that time and place. Anachronism is forbidden: do not \
         reference later events, later theory, or modern critical terminology.\n\n\
         Begin your response with exactly this markdown header on its own line:\n\
         {ANALYSIS_HEADER_PREFIX} {persona}\n\n\
         Then give your full reaction to and interpretation of the work as \
         this witness."
    ))
}

// =============================================================================
// Persona hierarchy (strict priority, first match wins)
// =============================================================================

fn persona_instructions(choice: &PersonaChoice, entry: &LensEntry) -> String {
    match choice {
        // a. Explicit user override beats everything.
        PersonaChoice::Named(name) => format!(
            "The analysis must be written in the voice of {name}. Instruct the \
             analyst to fully adopt this exact figure: their vocabulary, their \
             preoccupations, their characteristic rhetorical moves."
        ),
        // Forced archetypal title: also a user decision, also beats the pool.
        PersonaChoice::NoPersona => format!(
            "Do not adopt any named historical figure. Instruct the analyst to \
             write as a descriptive archetypal title appropriate to {lens} \
             (for example, \"A {lens} Critic\").",
            lens = entry.prompt_name
        ),
        PersonaChoice::AiDecides => {
            // b. Constrained choice from the lens's persona pool.
            if !entry.persona_pool.is_empty() {
                let pool = entry.persona_pool.join(", ");
                format!(
                    "Choose the single best-fitting persona for this specific \
                     work from this pool, and no other: {pool}. Base the choice \
                     on the work's content, then instruct the analyst to fully \
                     adopt that figure."
                )
            }
            // c. Configured persona + verbatim style guide.
            else if let Some(style) = &entry.style_guide {
                format!(
                    "Instruct the analyst to adopt the persona of {persona} and \
                     enforce this style guide exactly as written:\n{guide}",
                    persona = style.persona,
                    guide = style.guide
                )
            }
            // d. Fallback: model generates an appropriate persona.
            else {
                format!(
                    "Generate an appropriate persona for the analysis. Prefer a \
                     real historical proponent of {lens} if one figure is \
                     dominant and not anachronistic for this work; otherwise \
                     use a descriptive archetypal title.",
                    lens = entry.prompt_name
                )
            }
        }
    }
}

// =============================================================================
// Core-concept instructions (toolkit > primer > general knowledge)
// =============================================================================

fn concept_instructions(entry: &LensEntry) -> String {
    // a. Toolkit lenses dispatch via lead/support, unconditionally - even when
    //    a conceptual primer is also present.
    if entry.is_toolkit() {
        let toolkit = entry
            .sub_primers
            .iter()
            .map(|(name, primer)| format!("- {name}: {primer}"))
            .collect::<Vec<_>>()
            .join("\n");
        return format!(
            "This lens is a toolkit of specialized methodologies:\n{toolkit}\n\n\
             Apply the Lead-and-Support protocol. Diagnose which single \
             methodology above is most dominant for this specific work: that is \
             the Lead. Identify which of the others apply as secondary themes: \
             those are the Support. The strategy must center the analysis on \
             the Lead methodology while explicitly weaving in the Support \
             methodologies for nuance and contrast. Use only methodologies \
             from this toolkit; do not invent others."
        );
    }

    // b. Single canonical methodology.
    if let Some(primer) = entry.conceptual_primer {
        return format!(
            "Use this specific methodology as the defining framework of the \
             analysis, strictly:\n{primer}"
        );
    }

    // c. No primer configured: fall back to the model's general knowledge.
    format!(
        "Define the core concepts and terminology of {lens} from general \
         knowledge, and require the analysis to apply them explicitly.",
        lens = entry.prompt_name
    )
}

// =============================================================================
// Modality instructions
// =============================================================================

fn modality_instructions(work: &WorkInput) -> String {
    match work.modality {
        Modality::Text => "The work is a text, provided in full. Quote directly and cite \
             specific passages as evidence."
            .to_string(),
        Modality::Image => "The work is an image. Ground every claim in concrete visual \
             evidence: composition, color, light, figures, and framing."
            .to_string(),
        Modality::Audio => "The work is an audio recording. Attend to sonic evidence: \
             timbre, rhythm, arrangement, dynamics, lyric delivery, and \
             production choices, with approximate timestamps."
            .to_string(),
        Modality::Video => match work.video_mode {
            VideoMode::Full => "The work is a video, provided in full. Give comprehensive \
                 audiovisual treatment and reference specific moments by \
                 timestamp throughout."
                .to_string(),
            VideoMode::Keyframes => format!(
                "The work is a video sampled as keyframes at {}-second \
                 intervals. Bound visual attention to those sampled frames; \
                 treat motion between frames as inferred, not observed.",
                work.keyframe_interval_secs
            ),
            VideoMode::Transcript => "The work is a video supplied as transcript only. All visual \
                 analysis is forbidden: restrict every claim to dialogue, \
                 narration, and other textual evidence from the transcript."
                .to_string(),
        },
    }
}

// =============================================================================
// Assembly
// =============================================================================

fn scope_and_filter_hints(config: &LensConfig) -> Option<String> {
    let LensConfig::Standard { scope, filters, .. } = config else {
        return None;
    };

    let mut hints = Vec::new();
    match scope {
        ScopeMode::Narrow => hints.push(
            "Keep the analysis tightly scoped to the strongest few claims.".to_string(),
        ),
        ScopeMode::Broad => hints.push(
            "Range broadly: survey every register of the work the lens can reach.".to_string(),
        ),
    }
    for (label, value) in [
        ("disciplinary angle", &filters.discipline),
        ("critical function", &filters.function),
        ("era emphasis", &filters.era),
        ("geographic emphasis", &filters.geography),
    ] {
        if let Some(v) = value {
            hints.push(format!("Advisory {label}: {v}."));
        }
    }
    Some(hints.join(" "))
}

/// Assemble the full strategy-generation ("General") prompt for a standard
/// lens config. Pure; fails only on configuration errors.
pub fn build_general_prompt(
    config: &LensConfig,
    work: &WorkInput,
) -> Result<String, StrategyError> {
    let LensConfig::Standard { lens, persona, .. } = config else {
        // Zeitgeist never reaches the General; see generate_strategy.
        return Err(StrategyError::IncompleteZeitgeist);
    };

    let entry =
        get_lens_entry(lens).ok_or_else(|| StrategyError::UnknownLens(lens.clone()))?;

    let mut sections = vec![
        format!(
            "You are a master strategist of literary and cultural criticism. \
             Produce a detailed instruction set (a \"strategy\") that a second \
             analyst will follow to analyze the work titled \"{title}\" through \
             the lens of {lens}. Output only the instruction text itself, with \
             no preamble or commentary of your own.",
            title = work.title,
            lens = entry.prompt_name
        ),
        format!("Persona directive:\n{}", persona_instructions(persona, entry)),
        format!("Framework directive:\n{}", concept_instructions(entry)),
        format!("Modality directive:\n{}", modality_instructions(work)),
    ];

    if entry.requires_nuance {
        sections.push(
            "Nuance directive:\nForbid generalized or textbook treatment. Every \
             claim must be grounded in specific, intersectional evidence drawn \
             from this particular work."
                .to_string(),
        );
    }

    if let Some(hints) = scope_and_filter_hints(config) {
        sections.push(format!("Scope hints:\n{hints}"));
    }

    sections.push(format!(
        "Header contract:\nThe strategy must require the analysis to begin with \
         a markdown H3 header of exactly this form on its own line, naming the \
         adopted persona or title:\n{ANALYSIS_HEADER_PREFIX} {{persona}}"
    ));

    Ok(sections.join("\n\n"))
}

/// Generate the stage-2 strategy for one configuration.
///
/// Zeitgeist configs are built locally and return without a remote call;
/// standard configs issue one "General" call whose sole output is the
/// strategy text.
pub async fn generate_strategy(
    gateway: &dyn GenerateGateway,
    model: &str,
    config: &LensConfig,
    work: &WorkInput,
) -> Result<Strategy, StrategyError> {
    if let LensConfig::Zeitgeist { context, persona } = config {
        let text = build_zeitgeist_strategy(context, persona)?;
        return Ok(Strategy {
            lens_label: config.speaker_label(),
            text,
        });
    }

    let prompt = build_general_prompt(config, work)?;

    let mut parts = vec![Part::text(prompt)];
    match (&work.text_data, &work.remote_file) {
        (Some(text), _) => parts.push(Part::text(format!("The work follows.\n\n{text}"))),
        (None, Some(file)) => parts.push(Part::file(file.clone())),
        (None, None) => {}
    }

    let request = GenerateRequest::new(model, parts, Attribution::new("pipeline::general"))
        .temperature(0.7)
        .max_output_tokens(STRATEGY_MAX_TOKENS)
        .timeout(STRATEGY_TIMEOUT);

    let response = gateway.generate(request).await?;

    Ok(Strategy {
        lens_label: config.speaker_label(),
        text: response.text.trim().to_string(),
    })
}
