//! curriculum-drip: personalised learning curricula delivered one unit at a time.
//!
//! A learner enrolls in a topic and gets an ordered curriculum. Each scheduled
//! sweep generates the next unit for every eligible learner, publishes it as a
//! static page, and emails a link.

pub mod config;
pub mod curriculum;
pub mod error;
pub mod llm;
pub mod logging;
pub mod notify;
pub mod pipeline;
pub mod publish;
pub mod scheduler;
pub mod store;
