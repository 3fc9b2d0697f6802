//! Smart lens selection: delegating lens choice to the model, constrained to
//! the known lens universe and validated before anything trusts it.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::gateway::{Attribution, GenerateGateway, GenerateRequest, Part, ProviderError};
use crate::lens::{get_lens_entry, list_all_lens_names};
use crate::work::WorkInput;

/// Smart-selection calls are lightweight; keep the timeout short.
const SELECTOR_TIMEOUT: Duration = Duration::from_secs(60);

const SELECTOR_MAX_TOKENS: u32 = 1024;

/// One chosen lens with the model's reasoning.
#[derive(Debug, Clone)]
pub struct SelectedLens {
    /// Canonical lens name, validated against the knowledge base.
    pub lens: String,
    pub justification: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SelectorError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("selection response was not valid JSON: {0}")]
    Malformed(String),
    #[error("selection returned {got} lenses, required exactly {expected}")]
    WrongCount { expected: usize, got: usize },
    #[error("selection named an unknown lens: {0}")]
    UnknownLens(String),
    #[error("selection repeated the lens: {0}")]
    DuplicateLens(String),
}

#[derive(Debug, Deserialize)]
struct SelectionJson {
    selections: Vec<SelectionItemJson>,
}

#[derive(Debug, Deserialize)]
struct SelectionItemJson {
    lens: String,
    justification: String,
}

fn selection_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "selections": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "lens": { "type": "string" },
                        "justification": { "type": "string" }
                    },
                    "required": ["lens", "justification"]
                }
            }
        },
        "required": ["selections"]
    })
}

/// Parse and validate a selection response against the known lens universe.
///
/// Any violation is an error: the result is never truncated or padded to fit.
fn validate_selection(raw: &str, expected: usize) -> Result<Vec<SelectedLens>, SelectorError> {
    let parsed: SelectionJson =
        serde_json::from_str(raw).map_err(|e| SelectorError::Malformed(e.to_string()))?;

    if parsed.selections.len() != expected {
        return Err(SelectorError::WrongCount {
            expected,
            got: parsed.selections.len(),
        });
    }

    let mut seen: Vec<&str> = Vec::with_capacity(expected);
    let mut choices = Vec::with_capacity(expected);
    for item in &parsed.selections {
        let entry = get_lens_entry(&item.lens)
            .ok_or_else(|| SelectorError::UnknownLens(item.lens.clone()))?;
        if seen.contains(&entry.name) {
            return Err(SelectorError::DuplicateLens(entry.name.to_string()));
        }
        seen.push(entry.name);
        choices.push(SelectedLens {
            lens: entry.name.to_string(),
            justification: item.justification.clone(),
        });
    }
    Ok(choices)
}

fn work_part(work: &WorkInput) -> Part {
    match (&work.text_data, &work.remote_file) {
        (Some(text), _) => Part::text(format!(
            "Work \"{title}\" ({modality}):\n{text}",
            title = work.title,
            modality = work.modality.as_str()
        )),
        (None, Some(file)) => Part::file(file.clone()),
        (None, None) => Part::text(format!(
            "Work \"{title}\" ({modality}); content unavailable, judge by title.",
            title = work.title,
            modality = work.modality.as_str()
        )),
    }
}

fn tie_break_heuristic(k: usize) -> &'static str {
    if k == 2 {
        "Favor the pair with maximal interpretive contrast, so the two \
         analyses will productively disagree."
    } else {
        "Favor coverage across the three functional tiers (diagnostic, \
         contextual, experiential), so the perspectives complement rather \
         than repeat each other."
    }
}

/// Ask the model to choose exactly `k` distinct lenses for the work.
///
/// The caller should treat any error as "fall back to manual selection".
pub async fn select_lenses(
    gateway: &dyn GenerateGateway,
    model: &str,
    work: &WorkInput,
    k: usize,
) -> Result<Vec<SelectedLens>, SelectorError> {
    let universe = list_all_lens_names().join(", ");
    let prompt = format!(
        "You are an analyst-in-chief choosing interpretive lenses for a \
         critical analysis. From this closed set of lenses, and no other: \
         [{universe}], choose exactly {k} distinct lenses best suited to the \
         work below, each with a brief justification. {heuristic}\n\
         Respond with JSON only.",
        heuristic = tie_break_heuristic(k)
    );

    let request = GenerateRequest::new(
        model,
        vec![Part::text(prompt), work_part(work)],
        Attribution::new("selector::choose"),
    )
    .json_schema(selection_schema())
    .temperature(0.4)
    .max_output_tokens(SELECTOR_MAX_TOKENS)
    .timeout(SELECTOR_TIMEOUT);

    let response = gateway.generate(request).await?;
    work.usage.record(&response.usage);

    validate_selection(&response.text, k)
}

/// Ask the model for the single lens that best illuminates the shared ground
/// between two works (Comparative mode).
pub async fn select_bridging_lens(
    gateway: &dyn GenerateGateway,
    model: &str,
    work_a: &WorkInput,
    work_b: &WorkInput,
) -> Result<SelectedLens, SelectorError> {
    let universe = list_all_lens_names().join(", ");
    let prompt = format!(
        "You are a comparative strategist. From this closed set of lenses, and \
         no other: [{universe}], choose exactly 1 lens that best illuminates \
         the shared ground between the two works below, with a brief \
         justification of what it reveals about both.\nRespond with JSON only."
    );

    let request = GenerateRequest::new(
        model,
        vec![Part::text(prompt), work_part(work_a), work_part(work_b)],
        Attribution::new("selector::bridge"),
    )
    .json_schema(selection_schema())
    .temperature(0.4)
    .max_output_tokens(SELECTOR_MAX_TOKENS)
    .timeout(SELECTOR_TIMEOUT);

    let response = gateway.generate(request).await?;
    work_a.usage.record(&response.usage);

    let mut choices = validate_selection(&response.text, 1)?;
    Ok(choices.remove(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_selection_passes() {
        let raw = r#"{"selections":[
            {"lens":"Formalist","justification":"form-first"},
            {"lens":"Marxist","justification":"material conditions"}
        ]}"#;
        let choices = validate_selection(raw, 2).unwrap();
        assert_eq!(choices.len(), 2);
        assert_eq!(choices[0].lens, "Formalist");
    }

    #[test]
    fn wrong_count_is_rejected_not_truncated() {
        let raw = r#"{"selections":[
            {"lens":"Formalist","justification":"a"},
            {"lens":"Marxist","justification":"b"},
            {"lens":"Feminist","justification":"c"}
        ]}"#;
        let err = validate_selection(raw, 2).unwrap_err();
        assert!(matches!(
            err,
            SelectorError::WrongCount {
                expected: 2,
                got: 3
            }
        ));
    }

    #[test]
    fn unknown_lens_is_rejected() {
        let raw = r#"{"selections":[{"lens":"Vibes-Based","justification":"x"}]}"#;
        let err = validate_selection(raw, 1).unwrap_err();
        assert!(matches!(err, SelectorError::UnknownLens(_)));
    }

    #[test]
    fn duplicate_lens_is_rejected() {
        let raw = r#"{"selections":[
            {"lens":"Marxist","justification":"a"},
            {"lens":"marxist","justification":"b"}
        ]}"#;
        let err = validate_selection(raw, 2).unwrap_err();
        assert!(matches!(err, SelectorError::DuplicateLens(_)));
    }

    #[test]
    fn non_json_is_malformed() {
        let err = validate_selection("I'd suggest Formalism!", 1).unwrap_err();
        assert!(matches!(err, SelectorError::Malformed(_)));
    }

    #[test]
    fn selection_names_are_canonicalized() {
        let raw = r#"{"selections":[{"lens":"  formalist ","justification":"x"}]}"#;
        let choices = validate_selection(raw, 1).unwrap();
        assert_eq!(choices[0].lens, "Formalist");
    }

    #[test]
    fn heuristic_varies_with_count() {
        assert!(tie_break_heuristic(2).contains("contrast"));
        assert!(tie_break_heuristic(3).contains("tiers"));
    }
}
