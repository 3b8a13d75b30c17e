//! Content generator: prompt construction for a single unit.

use std::sync::Arc;

use tracing::debug;

use crate::error::LlmError;
use crate::llm::{ChatMessage, CompletionRequest, CompletionResponse, LlmProvider};

use super::quiz::QUIZ_FORMAT;

const SYSTEM_ROLE: &str = "You are an expert educator and science communicator.";

const STRUCTURE: &str = "IMPORTANT: Format your response with clear structural markers:
- Use \"## Heading:\" for main sections (e.g., \"## Introduction:\", \"## Key Concepts:\")
- Use \"### Subheading:\" for subsections
- Use \"**Bold text**\" for emphasis and important terms
- Use \"- \" for bullet points
- Use \"---\" for section breaks
- Use \"**Link: [text](url)**\" for any relevant links, and include 3-5 relevant links";

/// Generation settings.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            max_tokens: 1800,
            temperature: 0.7,
        }
    }
}

/// Produces the raw text of one unit. One backend call, no retries.
pub struct ContentGenerator {
    llm: Arc<dyn LlmProvider>,
    config: GeneratorConfig,
}

impl ContentGenerator {
    pub fn new(llm: Arc<dyn LlmProvider>, config: GeneratorConfig) -> Self {
        Self { llm, config }
    }

    /// Generate a unit. With `context` the unit builds on earlier material;
    /// without it the unit is an introductory, self-contained piece.
    ///
    /// Token counts on the response are for telemetry only.
    pub async fn generate(
        &self,
        unit_title: &str,
        context: Option<&str>,
        curriculum_titles: &[String],
    ) -> Result<CompletionResponse, LlmError> {
        let prompt = match context {
            Some(summary) if !summary.trim().is_empty() => {
                contextual_prompt(unit_title, summary, curriculum_titles)
            }
            _ => introductory_prompt(unit_title),
        };

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

        debug!(
            unit = unit_title,
            contextual = context.is_some(),
            tokens = response.total_tokens(),
            "Unit generated"
        );
        Ok(response)
    }
}

fn introductory_prompt(unit_title: &str) -> String {
    format!(
        "Write a comprehensive, beginner-friendly educational report on the topic: \"{unit_title}\".

The report should include:
- An introduction to the topic
- Key concepts and definitions
- Real-world applications or examples
- Common misconceptions or pitfalls
- Further reading/resources (if appropriate)

{STRUCTURE}

End the report with a self-check quiz in exactly this format:

{QUIZ_FORMAT}

The tone should be clear, engaging, and accessible to someone new to the subject."
    )
}

fn contextual_prompt(unit_title: &str, summary: &str, curriculum_titles: &[String]) -> String {
    let outline = curriculum_titles
        .iter()
        .enumerate()
        .map(|(i, t)| format!("{}. {}", i + 1, t))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Write the next educational report in a learning series. This report covers: \"{unit_title}\".

The full curriculum, in order:
{outline}

Summary of what the learner has already covered:
{summary}

Build on that material without repeating it. Refer back to earlier concepts where they help, \
and prepare the ground for the topics that come later in the curriculum.

The report should include:
- How this topic connects to what came before
- Key concepts and definitions
- Real-world applications or examples
- Common misconceptions or pitfalls

{STRUCTURE}

End the report with a self-check quiz in exactly this format:

{QUIZ_FORMAT}

The tone should be clear, engaging, and accessible."
    )
}
