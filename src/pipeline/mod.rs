//! Per-unit content pipeline.
//!
//! For one eligible user the scheduler drives:
//! 1. `ContentGenerator::generate()`: one backend call for the raw unit text
//! 2. `quiz::extract()`: split off the quiz block, sanitise the body
//! 3. `ContextAccumulator`: fold the unit into the rolling summary
//! 4. `render`: HTML for the unit page and the curriculum index

pub mod context;
pub mod generator;
pub mod quiz;
pub mod render;

pub use context::{ContextAccumulator, ContextConfig};
pub use generator::{ContentGenerator, GeneratorConfig};
pub use quiz::{QUIZ_FORMAT, QUIZ_HEADING, extract, format_quiz_block, is_quiz_heading};
pub use render::{escape_html, markdown_to_html, render_plan_page, render_unit_page};

use crate::curriculum::model::GeneratedUnit;

/// Run extraction over raw backend text.
pub fn split_unit(raw_text: String) -> GeneratedUnit {
    let (body_without_quiz, quiz) = extract(&raw_text);
    GeneratedUnit {
        raw_text,
        body_without_quiz,
        quiz,
    }
}
