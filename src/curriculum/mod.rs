//! Curricula and per-user progression.

mod advance;
pub mod eligibility;
pub mod enrollment;
pub mod model;
pub mod planner;

pub use advance::{AdvanceOutcome, advance};
pub use eligibility::{Eligibility, EligibilityPolicy, is_eligible};
pub use enrollment::{EnrollOutcome, Enrollment};
pub use model::{
    ContextSummary, Curriculum, GeneratedUnit, MAX_SUMMARY_CHARS, OptionId, Quiz, QuizOption,
    UserKey, UserProgress, normalize_email,
};
pub use planner::{
    CurriculumPlanner, PlanOutcome, PlannerConfig, extract_titles, sanitize_topic, validate_topic,
};
