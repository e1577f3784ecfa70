//! Prompt templates for LLM scoring requests.

use crate::collection::{CollectionContext, Entry};
use crate::criteria::Criterion;

/// System prompt framing the curation task.
pub fn system_prompt() -> &'static str {
    "You are a video game preservation expert curating a game collection. \
     You evaluate each game against the requested criteria and respond \
     with strict JSON only, no prose outside the JSON."
}

/// Build the scoring prompt for one chunk of entries.
pub fn scoring_prompt(
    entries: &[Entry],
    criteria: &[Criterion],
    context: Option<&CollectionContext>,
) -> String {
    let criteria_list = criteria
        .iter()
        .map(|c| format!("  - {}: {}", c.name, c.description))
        .collect::<Vec<_>>()
        .join("\n");

    let entry_list = entries
        .iter()
        .map(|e| match e.description() {
            Some(desc) if desc != e.name => format!("  - \"{}\" ({})", e.name, desc),
            _ => format!("  - \"{}\"", e.name),
        })
        .collect::<Vec<_>>()
        .join("\n");

    let context_str = match context {
        Some(ctx) => {
            let console = ctx.console.as_deref().unwrap_or("an unknown console");
            format!(
                "These games belong to a collection of {} titles for {}.",
                ctx.collection_size, console
            )
        }
        None => "No collection context is available.".to_string(),
    };

    format!(
        r#"Evaluate the following games against each criterion on a 0-10 scale.

## Context
{}

## Criteria
{}

## Games
{}

## Task
For every game, score every criterion and give a one-sentence justification
per score. Respond with a JSON array, one object per game, in the same
order as the list above:

[
  {{
    "name": "game name exactly as listed",
    "scores": {{
      "<criterion>": {{"score": 0.0, "reasoning": "...", "confidence": 0.0}}
    }}
  }}
]"#,
        context_str, criteria_list, entry_list
    )
}
