//! Interpretive lens configuration and the lens knowledge base.
//!
//! A lens is a named critical framework (Marxist, Formalist, ...). A config
//! is either a standard lens selection or a free-form Zeitgeist simulation;
//! the two cases are a sum type so every consumer branches exhaustively.

use serde::{Deserialize, Serialize};

// =============================================================================
// Configuration
// =============================================================================

/// How the analyzing persona is chosen for a standard lens.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonaChoice {
    /// The model picks the best-fitting persona.
    #[default]
    AiDecides,
    /// Force a generic archetypal title instead of a named figure.
    NoPersona,
    /// Adopt this exact named figure.
    Named(String),
}

/// How wide the analysis should range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeMode {
    #[default]
    Narrow,
    Broad,
}

/// Advisory filter hints passed through to the model; never validated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LensFilters {
    #[serde(default)]
    pub discipline: Option<String>,
    #[serde(default)]
    pub function: Option<String>,
    #[serde(default)]
    pub era: Option<String>,
    #[serde(default)]
    pub geography: Option<String>,
}

impl LensFilters {
    pub fn is_empty(&self) -> bool {
        self.discipline.is_none()
            && self.function.is_none()
            && self.era.is_none()
            && self.geography.is_none()
    }
}

/// One participant in an analysis: a standard lens or a Zeitgeist simulation.
///
/// Immutable once passed into the pipeline. The variant replaces the original
/// `is_zeitgeist` flag so the branch in every consuming function is an
/// exhaustive match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LensConfig {
    Standard {
        lens: String,
        #[serde(default)]
        persona: PersonaChoice,
        #[serde(default)]
        scope: ScopeMode,
        #[serde(default)]
        filters: LensFilters,
    },
    Zeitgeist {
        /// User-authored historical context the witness lives inside.
        context: String,
        /// User-authored witness description.
        persona: String,
    },
}

impl LensConfig {
    pub fn standard(lens: impl Into<String>) -> Self {
        LensConfig::Standard {
            lens: lens.into(),
            persona: PersonaChoice::AiDecides,
            scope: ScopeMode::Narrow,
            filters: LensFilters::default(),
        }
    }

    pub fn with_persona(self, persona: PersonaChoice) -> Self {
        match self {
            LensConfig::Standard {
                lens,
                scope,
                filters,
                ..
            } => LensConfig::Standard {
                lens,
                persona,
                scope,
                filters,
            },
            z => z,
        }
    }

    pub fn zeitgeist(context: impl Into<String>, persona: impl Into<String>) -> Self {
        LensConfig::Zeitgeist {
            context: context.into(),
            persona: persona.into(),
        }
    }

    /// Short label used in prompts and diagnostics.
    pub fn speaker_label(&self) -> String {
        match self {
            LensConfig::Standard { lens, .. } => lens.clone(),
            LensConfig::Zeitgeist { persona, .. } => format!("Zeitgeist witness: {persona}"),
        }
    }
}

/// Uniform caller-side validation applied to every mode before a pipeline run.
///
/// The pipeline itself never deduplicates; duplicate detection lives here so
/// the policy is the same for Single, Dialectical, Symposium and Comparative.
pub fn validate_configs(configs: &[LensConfig]) -> Result<(), ConfigError> {
    if configs.is_empty() {
        return Err(ConfigError::Empty);
    }
    for config in configs {
        match config {
            LensConfig::Zeitgeist { context, persona } => {
                if context.trim().is_empty() || persona.trim().is_empty() {
                    return Err(ConfigError::IncompleteZeitgeist);
                }
            }
            LensConfig::Standard { lens, persona, filters, .. } => {
                let has_lens = !lens.trim().is_empty();
                let has_persona = matches!(persona, PersonaChoice::Named(_));
                if !has_lens && !has_persona && filters.is_empty() {
                    return Err(ConfigError::UnderSpecified);
                }
            }
        }
    }
    for (i, a) in configs.iter().enumerate() {
        for b in configs.iter().skip(i + 1) {
            if a == b {
                return Err(ConfigError::Duplicate(a.speaker_label()));
            }
        }
    }
    Ok(())
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no lens configurations provided")]
    Empty,
    #[error("zeitgeist configuration requires both context and persona")]
    IncompleteZeitgeist,
    #[error("configuration needs a lens, a named persona, or at least one filter")]
    UnderSpecified,
    #[error("duplicate configuration: {0}")]
    Duplicate(String),
}

// =============================================================================
// Knowledge base
// =============================================================================

/// Tone/format/focus guide attached to a configured persona.
#[derive(Debug, Clone)]
pub struct StyleGuide {
    pub persona: &'static str,
    pub guide: &'static str,
}

/// Static per-lens metadata. Read-only.
#[derive(Debug, Clone)]
pub struct LensEntry {
    /// Canonical display name, also the lookup key.
    pub name: &'static str,
    /// Name used when addressing the model.
    pub prompt_name: &'static str,
    /// Free-text methodology description, when the lens has a single canon.
    pub conceptual_primer: Option<&'static str>,
    /// Named specialized methodologies under one umbrella ("toolkit" lens).
    pub sub_primers: &'static [(&'static str, &'static str)],
    /// Forbid generalized treatment; demand intersectional, work-specific evidence.
    pub requires_nuance: bool,
    /// Historical proponents the model may choose between.
    pub persona_pool: &'static [&'static str],
    /// Fixed persona plus a verbatim tone/format guide.
    pub style_guide: Option<StyleGuide>,
    /// Functional tier: "diagnostic", "contextual", or "experiential".
    pub tier: &'static str,
}

impl LensEntry {
    pub fn is_toolkit(&self) -> bool {
        !self.sub_primers.is_empty()
    }
}

static LENS_LIBRARY: &[LensEntry] = &[
    LensEntry {
        name: "Formalist",
        prompt_name: "Russian Formalism / New Criticism",
        conceptual_primer: Some(
            "Attend exclusively to the work's internal devices: structure, form, \
             rhythm, imagery, defamiliarization, and the tension between parts. \
             Biographical and historical context is out of bounds; meaning is \
             produced by the verbal artifact itself.",
        ),
        sub_primers: &[],
        requires_nuance: false,
        persona_pool: &["Viktor Shklovsky", "Cleanth Brooks", "Roman Jakobson"],
        style_guide: None,
        tier: "diagnostic",
    },
    LensEntry {
        name: "Marxist",
        prompt_name: "Marxist criticism",
        conceptual_primer: Some(
            "Read the work as a product of material conditions: class relations, \
             labor, commodity, ideology, and the economic base beneath the \
             cultural superstructure. Ask whose interests the work's form and \
             reception serve.",
        ),
        sub_primers: &[],
        requires_nuance: false,
        persona_pool: &["Terry Eagleton", "Fredric Jameson", "Raymond Williams"],
        style_guide: None,
        tier: "contextual",
    },
    LensEntry {
        name: "Psychoanalytic",
        prompt_name: "psychoanalytic criticism",
        conceptual_primer: Some(
            "Treat the work as an articulation of unconscious processes: desire, \
             repression, the uncanny, dreamwork, and the symbolic order. The \
             text's gaps and repetitions are symptoms to be interpreted.",
        ),
        sub_primers: &[],
        requires_nuance: false,
        persona_pool: &[],
        style_guide: Some(StyleGuide {
            persona: "The Viennese Analyst",
            guide: "Tone: clinical yet speculative, addressing the work as a \
                    patient's account. Format: open with a presenting symptom, \
                    proceed through associative evidence, close with an \
                    interpretation the work itself resists. Focus: latent \
                    content over manifest content.",
        }),
        tier: "diagnostic",
    },
    LensEntry {
        name: "Feminist",
        prompt_name: "feminist criticism",
        conceptual_primer: None,
        sub_primers: &[],
        requires_nuance: true,
        persona_pool: &["Elaine Showalter", "bell hooks", "Judith Butler"],
        style_guide: None,
        tier: "contextual",
    },
    LensEntry {
        name: "Post-Colonial",
        prompt_name: "post-colonial criticism",
        conceptual_primer: Some(
            "Interrogate the work's entanglement with empire: center and \
             periphery, othering, hybridity, subaltern speech, and the \
             afterlives of colonial power in language and form.",
        ),
        sub_primers: &[],
        requires_nuance: true,
        persona_pool: &["Edward Said", "Gayatri Spivak", "Homi Bhabha"],
        style_guide: None,
        tier: "contextual",
    },
    LensEntry {
        name: "Structuralist Toolkit",
        prompt_name: "structuralist and post-structuralist analysis",
        conceptual_primer: Some(
            "Meaning arises from systems of difference rather than intrinsic \
             essence.",
        ),
        sub_primers: &[
            (
                "Semiotics",
                "Decompose the work into signifier/signified relations, codes, \
                 and myth; trace how second-order signification naturalizes \
                 cultural meaning.",
            ),
            (
                "Narratology",
                "Map narrative functions, focalization, fabula versus syuzhet, \
                 and the grammar of events; the work is one realization of a \
                 narrative system.",
            ),
            (
                "Deconstruction",
                "Locate the binary oppositions the work depends on and show \
                 where the text undoes its own hierarchy; read the margins \
                 against the center.",
            ),
            (
                "Intertextuality",
                "Read the work as a mosaic of citations; identify the prior \
                 texts and genre codes it absorbs, transforms, or parodies.",
            ),
        ],
        requires_nuance: false,
        persona_pool: &[],
        style_guide: None,
        tier: "diagnostic",
    },
    LensEntry {
        name: "Reader-Response",
        prompt_name: "reader-response criticism",
        conceptual_primer: None,
        sub_primers: &[],
        requires_nuance: false,
        persona_pool: &["Stanley Fish", "Wolfgang Iser"],
        style_guide: Some(StyleGuide {
            persona: "The Implied Reader",
            guide: "Tone: first-person and experiential, narrating the act of \
                    reading as it unfolds. Format: move chronologically through \
                    the work, recording expectation, surprise, and revision. \
                    Focus: what the work does to its reader, not what it means.",
        }),
        tier: "experiential",
    },
    LensEntry {
        name: "Ecocriticism",
        prompt_name: "ecocriticism",
        conceptual_primer: None,
        sub_primers: &[],
        requires_nuance: false,
        persona_pool: &[],
        style_guide: None,
        tier: "experiential",
    },
];

/// Look up a lens entry by canonical name (case-insensitive).
pub fn get_lens_entry(name: &str) -> Option<&'static LensEntry> {
    LENS_LIBRARY
        .iter()
        .find(|e| e.name.eq_ignore_ascii_case(name.trim()))
}

/// Sorted unique list of all known lens names.
pub fn list_all_lens_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = LENS_LIBRARY.iter().map(|e| e.name).collect();
    names.sort_unstable();
    names.dedup();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        assert!(get_lens_entry("formalist").is_some());
        assert!(get_lens_entry(" Marxist ").is_some());
        assert!(get_lens_entry("Phrenology").is_none());
    }

    #[test]
    fn lens_names_sorted_unique() {
        let names = list_all_lens_names();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(names, sorted);
        assert!(names.contains(&"Structuralist Toolkit"));
    }

    #[test]
    fn toolkit_lens_detected() {
        assert!(get_lens_entry("Structuralist Toolkit").unwrap().is_toolkit());
        assert!(!get_lens_entry("Formalist").unwrap().is_toolkit());
    }

    #[test]
    fn validate_rejects_incomplete_zeitgeist() {
        let configs = vec![LensConfig::zeitgeist("London, 1666", "")];
        assert_eq!(
            validate_configs(&configs),
            Err(ConfigError::IncompleteZeitgeist)
        );
    }

    #[test]
    fn validate_rejects_duplicates_uniformly() {
        let a = LensConfig::standard("Formalist")
            .with_persona(PersonaChoice::Named("Cleanth Brooks".into()));
        let configs = vec![a.clone(), a];
        assert!(matches!(
            validate_configs(&configs),
            Err(ConfigError::Duplicate(_))
        ));
    }

    #[test]
    fn validate_accepts_distinct_configs() {
        let configs = vec![
            LensConfig::standard("Formalist"),
            LensConfig::standard("Marxist"),
            LensConfig::zeitgeist("Paris, May 1968", "a student pamphleteer"),
        ];
        assert!(validate_configs(&configs).is_ok());
    }

    #[test]
    fn validate_rejects_underspecified_standard() {
        let configs = vec![LensConfig::standard("")];
        assert_eq!(validate_configs(&configs), Err(ConfigError::UnderSpecified));
    }
}
