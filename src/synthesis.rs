//! Stage 3: weaving the independent analyses into one conversation.
//!
//! Prompt builders are pure; [`synthesize`] and [`synthesize_comparative`]
//! issue the single generation call.

use crate::executor::{ANALYSIS_HEADER_PREFIX, EXECUTION_TIMEOUT};
use crate::gateway::{Attribution, GenerateGateway, GenerateRequest, Part, ProviderError};
use crate::lens::{LensConfig, PersonaChoice};
use crate::work::WorkInput;

const SYNTHESIS_MAX_TOKENS: u32 = 8192;

/// Closing heading demanded of a two-voice synthesis.
pub const DIALECTICAL_CLOSING: &str = "## Synthesis: Aufheben";

/// Closing heading demanded of a three-or-more-voice synthesis.
pub const SYMPOSIUM_CLOSING: &str = "## Holistic Synthesis";

/// Pull the persona name out of an analysis' mandated first-line header.
///
/// Returns `None` when the header is missing or empty; callers fall back to
/// "Unknown Persona" rather than a lens label, so a missing header is visible
/// in the output instead of silently flattening the voice.
pub fn extract_persona_header(analysis: &str) -> Option<&str> {
    let first_line = analysis.trim_start().lines().next()?;
    let rest = first_line.trim().strip_prefix(ANALYSIS_HEADER_PREFIX)?;
    let name = rest.trim();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Resolve the display name for one contribution's speaker.
///
/// A user-named persona is stated directly. Every other case recovers the
/// name the executor actually adopted from the analysis header; collapsing to
/// the lens label would misattribute the voice.
pub fn speaker_name(config: &LensConfig, analysis: &str) -> String {
    if let LensConfig::Standard {
        persona: PersonaChoice::Named(name),
        ..
    } = config
    {
        return name.clone();
    }
    extract_persona_header(analysis)
        .unwrap_or("Unknown Persona")
        .to_string()
}

fn numbered_contributions(contributions: &[(LensConfig, String)]) -> String {
    contributions
        .iter()
        .enumerate()
        .map(|(i, (config, analysis))| {
            format!(
                "--- Contribution {n}: {speaker} (via {lens}) ---\n{analysis}",
                n = i + 1,
                speaker = speaker_name(config, analysis),
                lens = config.speaker_label()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Prompt for exactly two voices: thesis, antithesis, sublation.
pub fn build_dialectical_prompt(contributions: &[(LensConfig, String)]) -> String {
    let speakers: Vec<String> = contributions
        .iter()
        .map(|(c, a)| speaker_name(c, a))
        .collect();
    format!(
        "You are moderating a dialectical exchange between two critics, \
         {a} and {b}, who have each analyzed the same work. Their full \
         analyses follow.\n\n{body}\n\n\
         Write the exchange as a dialogue. First, each critic presents their \
         initial position in the order given above. Then they engage in an \
         open discussion: challenging, conceding, and building on one \
         another. Every claim a speaker makes must be grounded in their own \
         analysis above; do not fabricate positions neither critic took. \
         Mark each speaker turn with their name in bold.\n\
         Close with a final section under the exact heading \
         `{closing}` that sublates the two positions into a richer \
         reading neither reaches alone.",
        a = speakers[0],
        b = speakers[1],
        body = numbered_contributions(contributions),
        closing = DIALECTICAL_CLOSING
    )
}

/// Prompt for three or more voices around one table.
pub fn build_symposium_prompt(contributions: &[(LensConfig, String)]) -> String {
    let roster = contributions
        .iter()
        .map(|(c, a)| speaker_name(c, a))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "You are moderating a critical symposium. The participants are: \
         {roster}. Each has independently analyzed the same work; their full \
         analyses follow.\n\n{body}\n\n\
         Write the symposium as a moderated discussion. Each participant \
         first presents their position, in the order given above. Then open \
         the floor: participants respond to one another, drawing out \
         agreements, tensions, and blind spots. Every claim must be grounded \
         in that participant's analysis above; fabricating positions is \
         forbidden. Mark each speaker turn with their name in bold.\n\
         Close with a final section under the exact heading \
         `{closing}` that integrates all perspectives.",
        body = numbered_contributions(contributions),
        closing = SYMPOSIUM_CLOSING
    )
}

/// Prompt for a comparative essay: two works, one shared lens.
pub fn build_comparative_prompt(
    lens_label: &str,
    title_a: &str,
    analysis_a: &str,
    title_b: &str,
    analysis_b: &str,
) -> String {
    format!(
        "You are writing a comparative critical essay. Two works, \
         \"{title_a}\" and \"{title_b}\", have each been analyzed through \
         the lens of {lens_label}. The two analyses follow.\n\n\
         --- Analysis of \"{title_a}\" ---\n{analysis_a}\n\n\
         --- Analysis of \"{title_b}\" ---\n{analysis_b}\n\n\
         Write a single cohesive essay with exactly these four sections, in \
         order:\n\
         1. `## Key Themes` — the central findings of each work's analysis, \
         treated work by work.\n\
         2. `## Dissonance and Resonance` — where the two works diverge and \
         where they echo one another under this lens.\n\
         3. `## Emergent Insights` — what the comparison reveals that neither \
         analysis reaches alone.\n\
         4. `## Conclusion` — a structured closing judgment of the pairing.\n\
         Ground every claim in the analyses above."
    )
}

/// Synthesize two-or-more contributions over one work.
///
/// Dispatches dialectical (exactly 2) or symposium (3+) by count.
/// `contributions` must be in the user-facing input order: the prompts tell
/// the model to sequence initial statements "in the order given above", so
/// list position carries speaker order.
pub async fn synthesize(
    gateway: &dyn GenerateGateway,
    model: &str,
    contributions: &[(LensConfig, String)],
    work: &WorkInput,
) -> Result<String, ProviderError> {
    if contributions.len() < 2 {
        return Err(ProviderError::invalid_request(
            "synthesis requires at least two contributions",
        ));
    }
    let prompt = if contributions.len() == 2 {
        build_dialectical_prompt(contributions)
    } else {
        build_symposium_prompt(contributions)
    };

    let request = GenerateRequest::new(
        model,
        vec![Part::text(prompt)],
        Attribution::new("pipeline::synthesize"),
    )
    .temperature(0.7)
    .max_output_tokens(SYNTHESIS_MAX_TOKENS)
    .timeout(EXECUTION_TIMEOUT);

    let response = gateway.generate(request).await?;
    work.usage.record(&response.usage);
    Ok(response.text)
}

/// Synthesize the comparative essay for two works sharing one lens.
///
/// Usage is recorded against the first work's meter; the call belongs to the
/// comparison, not to either work alone.
pub async fn synthesize_comparative(
    gateway: &dyn GenerateGateway,
    model: &str,
    lens_label: &str,
    work_a: &WorkInput,
    analysis_a: &str,
    work_b: &WorkInput,
    analysis_b: &str,
) -> Result<String, ProviderError> {
    let prompt = build_comparative_prompt(
        lens_label,
        &work_a.title,
        analysis_a,
        &work_b.title,
        analysis_b,
    );

    let request = GenerateRequest::new(
        model,
        vec![Part::text(prompt)],
        Attribution::new("pipeline::compare"),
    )
    .temperature(0.7)
    .max_output_tokens(SYNTHESIS_MAX_TOKENS)
    .timeout(EXECUTION_TIMEOUT);

    let response = gateway.generate(request).await?;
    work_a.usage.record(&response.usage);
    Ok(response.text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_extraction_handles_padding_and_absence() {
        assert_eq!(
            extract_persona_header("### Analysis by Terry Eagleton\nBody."),
            Some("Terry Eagleton")
        );
        assert_eq!(
            extract_persona_header("\n  ### Analysis by  A Formalist Critic \nBody."),
            Some("A Formalist Critic")
        );
        assert_eq!(extract_persona_header("No header here."), None);
        assert_eq!(extract_persona_header("### Analysis by"), None);
        assert_eq!(extract_persona_header(""), None);
    }

    #[test]
    fn named_persona_is_stated_directly() {
        let config = LensConfig::standard("Formalist")
            .with_persona(PersonaChoice::Named("Walter Pater".into()));
        // Header disagrees; the user's named override still wins.
        let name = speaker_name(&config, "### Analysis by Someone Else\n...");
        assert_eq!(name, "Walter Pater");
    }

    #[test]
    fn ai_decided_persona_recovered_from_header_not_lens_label() {
        let config = LensConfig::standard("Formalist");
        let name = speaker_name(&config, "### Analysis by Viktor Shklovsky\n...");
        assert_eq!(name, "Viktor Shklovsky");
        assert_ne!(name, "Formalist");
    }

    #[test]
    fn zeitgeist_persona_recovered_from_header() {
        let config = LensConfig::zeitgeist("London, 1666", "a parish clerk");
        let name = speaker_name(&config, "### Analysis by a parish clerk\n...");
        assert_eq!(name, "a parish clerk");
    }

    #[test]
    fn missing_header_falls_back_to_unknown_persona() {
        let config = LensConfig::standard("Ecocriticism");
        assert_eq!(speaker_name(&config, "An analysis with no header."), "Unknown Persona");
    }

    fn two_contributions() -> Vec<(LensConfig, String)> {
        vec![
            (
                LensConfig::standard("Formalist"),
                "### Analysis by Viktor Shklovsky\nForm first.".into(),
            ),
            (
                LensConfig::standard("Marxist"),
                "### Analysis by Terry Eagleton\nBase and superstructure.".into(),
            ),
        ]
    }

    #[test]
    fn dialectical_prompt_orders_speakers_and_closes_with_aufheben() {
        let prompt = build_dialectical_prompt(&two_contributions());
        let a = prompt.find("Contribution 1: Viktor Shklovsky").unwrap();
        let b = prompt.find("Contribution 2: Terry Eagleton").unwrap();
        assert!(a < b);
        assert!(prompt.contains(DIALECTICAL_CLOSING));
        assert!(prompt.contains("do not fabricate"));
    }

    #[test]
    fn symposium_prompt_lists_roster_and_closes_holistically() {
        let mut contributions = two_contributions();
        contributions.push((
            LensConfig::zeitgeist("Paris, May 1968", "a student pamphleteer"),
            "### Analysis by a student pamphleteer\nThe barricades.".into(),
        ));
        let prompt = build_symposium_prompt(&contributions);
        assert!(prompt
            .contains("Viktor Shklovsky, Terry Eagleton, a student pamphleteer"));
        assert!(prompt.contains(SYMPOSIUM_CLOSING));
        assert!(prompt.contains("name in bold"));
    }

    #[test]
    fn comparative_prompt_has_four_sections() {
        let prompt = build_comparative_prompt(
            "Marxist",
            "The Raven",
            "### Analysis by Terry Eagleton\nA.",
            "Ozymandias",
            "### Analysis by Terry Eagleton\nB.",
        );
        assert!(prompt.contains("## Key Themes"));
        assert!(prompt.contains("## Dissonance and Resonance"));
        assert!(prompt.contains("## Emergent Insights"));
        assert!(prompt.contains("## Conclusion"));
        assert!(prompt.contains("The Raven"));
        assert!(prompt.contains("Ozymandias"));
    }

    #[tokio::test]
    async fn fewer_than_two_contributions_is_invalid() {
        struct PanicGateway;
        #[async_trait::async_trait]
        impl GenerateGateway for PanicGateway {
            async fn generate(
                &self,
                _req: GenerateRequest,
            ) -> Result<crate::gateway::GenerateResponse, ProviderError> {
                panic!("must not be called");
            }
        }

        let work = WorkInput::text("The Raven", "text");
        let contributions = vec![(
            LensConfig::standard("Formalist"),
            "### Analysis by X\n...".to_string(),
        )];
        let err = synthesize(&PanicGateway, "m", &contributions, &work)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest { .. }));
    }
}
