//! Curriculum planner: asks the backend for an ordered list of unit titles.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{info, warn};

use crate::error::LlmError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};

use super::model::Curriculum;

/// Numbered list item, e.g. `1. Title` or `12. **Title**`.
static NUMBERED_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\d+[.)]\s+(.+?)\s*$").expect("numbered line regex is valid")
});
static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("html tag regex is valid"));
static TOPIC_DISALLOWED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^a-zA-Z0-9\s\-_.,()\[\]:]").expect("topic charset regex is valid")
});
static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex is valid"));

const MAX_TOPIC_CHARS: usize = 100;

/// Outcome of asking for a curriculum.
#[derive(Debug)]
pub enum PlanOutcome {
    Accepted(Curriculum),
    /// The topic is unsuitable for a curriculum. A normal negative result.
    Rejected,
    TransientFailure(LlmError),
}

/// Planner settings.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub topics_per_level: usize,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            topics_per_level: 10,
            max_tokens: 2000,
            temperature: 0.7,
        }
    }
}

/// Builds curricula with the generative backend.
pub struct CurriculumPlanner {
    llm: Arc<dyn LlmProvider>,
    config: PlannerConfig,
}

impl CurriculumPlanner {
    pub fn new(llm: Arc<dyn LlmProvider>, config: PlannerConfig) -> Self {
        Self { llm, config }
    }

    /// Plan a curriculum for `topic`, also returning the raw response for history.
    pub async fn plan(&self, topic: &str) -> (PlanOutcome, Option<String>) {
        let prompt = format!(
            "Create a comprehensive learning plan for {topic}.\n\n\
             The plan should list {n} topics for each of three expertise levels:\n\
             - Beginner ({n} topics)\n\
             - Intermediate ({n} topics)\n\
             - Advanced ({n} topics)\n\n\
             Write every topic as a numbered line (\"1. Topic title\"), numbering \
             continuously from 1 across all levels, beginner first.\n\n\
             If the topic is not suitable for learning or is inappropriate, respond \
             with exactly: ERROR",
            n = self.config.topics_per_level,
        );

        let request = CompletionRequest::new(vec![
            ChatMessage::system(
                "You are an expert educational content creator specializing in creating \
                 structured learning plans.",
            ),
            ChatMessage::user(prompt),
        ])
        .with_max_tokens(self.config.max_tokens)
        .with_temperature(self.config.temperature);

        let response = match self.llm.complete(request).await {
            Ok(r) => r,
            Err(e) => {
                warn!(topic, error = %e, "Curriculum planning failed");
                return (PlanOutcome::TransientFailure(e), None);
            }
        };

        let outcome = interpret_plan(topic, &response.content);
        match &outcome {
            PlanOutcome::Accepted(c) => info!(topic, units = c.len(), "Curriculum planned"),
            PlanOutcome::Rejected => info!(topic, "Topic rejected by planner"),
            PlanOutcome::TransientFailure(_) => {}
        }
        (outcome, Some(response.content))
    }
}

/// Turn a raw planner response into an outcome.
pub fn interpret_plan(topic: &str, raw: &str) -> PlanOutcome {
    if raw.trim().to_uppercase().starts_with("ERROR") {
        return PlanOutcome::Rejected;
    }
    let titles = extract_titles(raw);
    if titles.is_empty() {
        return PlanOutcome::Rejected;
    }
    PlanOutcome::Accepted(Curriculum::new(topic, titles))
}

/// Pull unit titles out of numbered lines, stripping emphasis markers.
///
/// A title repeated later in the plan (ignoring case) is dropped, so every
/// unit of a curriculum has a distinct title.
pub fn extract_titles(plan: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    plan.lines()
        .filter_map(|line| NUMBERED_LINE.captures(line))
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim_matches(|c| c == '*' || c == '_').trim().to_string())
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.to_lowercase()))
        .collect()
}

/// Normalise user-supplied topic text.
pub fn sanitize_topic(raw: &str) -> String {
    let no_tags = HTML_TAG.replace_all(raw.trim(), "");
    let allowed = TOPIC_DISALLOWED.replace_all(&no_tags, "");
    let collapsed = WHITESPACE_RUN.replace_all(allowed.trim(), " ");
    let capped: String = collapsed.chars().take(MAX_TOPIC_CHARS).collect();
    title_case(capped.trim())
}

/// A sanitised topic must be 2..=100 characters.
pub fn validate_topic(topic: &str) -> bool {
    let len = topic.trim().chars().count();
    (2..=MAX_TOPIC_CHARS).contains(&len)
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = !c.is_alphanumeric();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_plain_and_bold_titles() {
        let plan = "## Beginner\n1. **What is Rust**\n2. Cargo basics\n\nSome prose.\n3) Ownership\n";
        assert_eq!(
            extract_titles(plan),
            vec!["What is Rust", "Cargo basics", "Ownership"]
        );
    }

    #[test]
    fn repeated_titles_keep_first_occurrence() {
        let plan = "Beginner\n1. Basics\n2. Loops\nAdvanced\n3. basics\n4. **Loops**\n5. Traits\n";
        assert_eq!(extract_titles(plan), vec!["Basics", "Loops", "Traits"]);
    }

    #[test]
    fn error_sentinel_is_rejection() {
        assert!(matches!(interpret_plan("x", "ERROR"), PlanOutcome::Rejected));
        assert!(matches!(
            interpret_plan("x", "  error: inappropriate"),
            PlanOutcome::Rejected
        ));
    }

    #[test]
    fn no_titles_is_rejection() {
        assert!(matches!(
            interpret_plan("x", "I cannot help with that."),
            PlanOutcome::Rejected
        ));
    }

    #[test]
    fn accepted_plan_keeps_order() {
        match interpret_plan("Chess", "1. Rules\n2. Openings\n3. Endgames") {
            PlanOutcome::Accepted(c) => {
                assert_eq!(c.topic(), "Chess");
                assert_eq!(c.units(), ["Rules", "Openings", "Endgames"]);
            }
            other => panic!("expected accepted, got {other:?}"),
        }
    }

    #[test]
    fn sanitize_strips_tags_and_symbols() {
        assert_eq!(sanitize_topic("  <b>machine   learning</b>!!  "), "Machine Learning");
        assert_eq!(sanitize_topic("c++ & rust"), "C Rust");
    }

    #[test]
    fn sanitize_caps_length() {
        let long = "a".repeat(150);
        assert_eq!(sanitize_topic(&long).chars().count(), 100);
    }

    #[test]
    fn validate_bounds() {
        assert!(!validate_topic("a"));
        assert!(validate_topic("Go"));
        assert!(!validate_topic(&"a".repeat(101)));
    }
}
