//! Context accumulator: a bounded rolling summary per (email, topic).
//!
//! Backend failures here never abort a unit. `create_initial` yields `None`
//! and `update` hands back the existing summary unchanged.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::curriculum::model::{ContextSummary, Curriculum, UserKey};
use crate::error::LlmError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};

const SYSTEM_ROLE: &str =
    "You maintain concise learning summaries that let a tutor continue a course without repetition.";

/// Summarisation settings.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: 900,
            temperature: 0.3,
        }
    }
}

pub struct ContextAccumulator {
    llm: Arc<dyn LlmProvider>,
    config: ContextConfig,
}

impl ContextAccumulator {
    pub fn new(llm: Arc<dyn LlmProvider>, config: ContextConfig) -> Self {
        Self { llm, config }
    }

    /// Founding summary after the first unit. `None` if the backend fails.
    pub async fn create_initial(
        &self,
        key: &UserKey,
        curriculum: &Curriculum,
        first_unit_raw: &str,
        first_unit_title: &str,
    ) -> Option<ContextSummary> {
        let prompt = format!(
            "A learner has started a course on \"{topic}\". The course outline is:\n{outline}\n\n\
             Here is the first lesson, \"{first_unit_title}\":\n{first_unit_raw}\n\n\
             Write a summary of about 200-300 words describing what the learner now knows: key \
             concepts, terms, and examples introduced. Plain prose, no headings.",
            topic = curriculum.topic(),
            outline = outline(curriculum),
        );

        match self.summarise(prompt).await {
            Ok(text) => {
                debug!(key = %key, "Initial context summary created");
                Some(ContextSummary::new(
                    key.clone(),
                    &text,
                    BTreeSet::from([first_unit_title.to_string()]),
                    1,
                    Utc::now(),
                ))
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Initial context summary failed; continuing without one");
                None
            }
        }
    }

    /// Fold a new unit into `existing`. On failure `existing` comes back unchanged.
    pub async fn update(
        &self,
        existing: &ContextSummary,
        new_unit_raw: &str,
        new_unit_title: &str,
        curriculum: &Curriculum,
    ) -> ContextSummary {
        let prompt = format!(
            "Course: \"{topic}\". Outline:\n{outline}\n\n\
             Existing summary of what the learner knows:\n{existing}\n\n\
             New lesson, \"{new_unit_title}\":\n{new_unit_raw}\n\n\
             Rewrite the summary so it also covers the new lesson. Aim for 300-500 words, keep \
             the most important concepts from earlier lessons, and note which outline topics are \
             done. Plain prose, no headings.",
            topic = curriculum.topic(),
            outline = outline(curriculum),
            existing = existing.summary_text(),
        );

        match self.summarise(prompt).await {
            Ok(text) => {
                let mut next = existing.clone();
                next.set_summary_text(&text);
                next.covered_titles.insert(new_unit_title.to_string());
                next.advance_count += 1;
                next.updated_at = Utc::now();
                debug!(key = %existing.key, count = next.advance_count, "Context summary updated");
                next
            }
            Err(e) => {
                warn!(key = %existing.key, error = %e, "Context update failed; keeping previous summary");
                existing.clone()
            }
        }
    }

    async fn summarise(&self, prompt: String) -> Result<String, LlmError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(SYSTEM_ROLE),
            ChatMessage::user(prompt),
        ])
        .with_max_tokens(self.config.max_tokens)
        .with_temperature(self.config.temperature);

        let response = self.llm.complete(request).await?;
        if response.content.trim().is_empty() {
            return Err(LlmError::EmptyResponse {
                provider: self.llm.provider_name().to_string(),
            });
        }
        Ok(response.content)
    }
}

fn outline(curriculum: &Curriculum) -> String {
    curriculum
        .units()
        .iter()
        .enumerate()
        .map(|(i, t)| format!("{}. {}", i + 1, t))
        .collect::<Vec<_>>()
        .join("\n")
}
