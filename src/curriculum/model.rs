//! Core types: curricula, per-user progress, context summaries, and quizzes.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound on a stored context summary, in characters.
pub const MAX_SUMMARY_CHARS: usize = 4000;

/// An ordered list of unit titles for one topic. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Curriculum {
    topic: String,
    units: Vec<String>,
}

impl Curriculum {
    pub fn new(topic: impl Into<String>, units: Vec<String>) -> Self {
        Self {
            topic: topic.into(),
            units,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn units(&self) -> &[String] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Title of the unit at `index`, if any.
    pub fn unit(&self, index: usize) -> Option<&str> {
        self.units.get(index).map(String::as_str)
    }
}

/// Composite key of a progress row. Email is compared case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserKey {
    pub email: String,
    pub topic: String,
}

impl UserKey {
    pub fn new(email: &str, topic: &str) -> Self {
        Self {
            email: normalize_email(email),
            topic: topic.to_string(),
        }
    }
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.email, self.topic)
    }
}

/// Lower-case and trim an email address for keying.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Per-user progression through one curriculum.
///
/// Fields are private: the only way to move `current_index` forward is
/// [`crate::curriculum::advance`], which keeps `completed_links` gap-free.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProgress {
    email: String,
    curriculum: Curriculum,
    current_index: usize,
    paid: bool,
    last_advance_time: Option<DateTime<Utc>>,
    completed_links: BTreeMap<usize, String>,
    plan_url: Option<String>,
}

impl UserProgress {
    /// A fresh progress row at the start of `curriculum`.
    pub fn new(email: &str, curriculum: Curriculum, paid: bool) -> Self {
        Self {
            email: normalize_email(email),
            curriculum,
            current_index: 0,
            paid,
            last_advance_time: None,
            completed_links: BTreeMap::new(),
            plan_url: None,
        }
    }

    /// Rebuild a row loaded from storage, checking the structural invariants.
    pub fn restore(
        email: &str,
        curriculum: Curriculum,
        current_index: usize,
        paid: bool,
        last_advance_time: Option<DateTime<Utc>>,
        completed_links: BTreeMap<usize, String>,
        plan_url: Option<String>,
    ) -> Result<Self, String> {
        let progress = Self {
            email: normalize_email(email),
            curriculum,
            current_index,
            paid,
            last_advance_time,
            completed_links,
            plan_url,
        };
        progress.check_invariants()?;
        Ok(progress)
    }

    /// `0 <= current_index <= len(units)` and `keys(completed_links) == 0..current_index`.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.current_index > self.curriculum.len() {
            return Err(format!(
                "current_index {} exceeds curriculum length {}",
                self.current_index,
                self.curriculum.len()
            ));
        }
        let expected: Vec<usize> = (0..self.current_index).collect();
        let actual: Vec<usize> = self.completed_links.keys().copied().collect();
        if expected != actual {
            return Err(format!(
                "completed_links keys {:?} do not match 0..{}",
                actual, self.current_index
            ));
        }
        Ok(())
    }

    pub fn key(&self) -> UserKey {
        UserKey {
            email: self.email.clone(),
            topic: self.curriculum.topic().to_string(),
        }
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn topic(&self) -> &str {
        self.curriculum.topic()
    }

    pub fn curriculum(&self) -> &Curriculum {
        &self.curriculum
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn paid(&self) -> bool {
        self.paid
    }

    pub fn last_advance_time(&self) -> Option<DateTime<Utc>> {
        self.last_advance_time
    }

    pub fn completed_links(&self) -> &BTreeMap<usize, String> {
        &self.completed_links
    }

    pub fn plan_url(&self) -> Option<&str> {
        self.plan_url.as_deref()
    }

    /// Title of the next unit to deliver, or `None` when complete.
    pub fn next_unit(&self) -> Option<&str> {
        self.curriculum.unit(self.current_index)
    }

    pub fn is_complete(&self) -> bool {
        self.current_index >= self.curriculum.len()
    }

    pub fn set_paid(&mut self, paid: bool) {
        self.paid = paid;
    }

    pub fn set_plan_url(&mut self, url: impl Into<String>) {
        self.plan_url = Some(url.into());
    }

    /// Record a completed unit. Only the advancer calls this, after its precondition check.
    pub(crate) fn record_completion(&mut self, url: String, now: DateTime<Utc>) {
        self.completed_links.insert(self.current_index, url);
        self.current_index += 1;
        self.last_advance_time = Some(now);
    }
}

/// Rolling digest of everything generated so far for one (email, topic).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSummary {
    pub key: UserKey,
    summary_text: String,
    pub covered_titles: BTreeSet<String>,
    pub advance_count: u32,
    pub updated_at: DateTime<Utc>,
}

impl ContextSummary {
    pub fn new(
        key: UserKey,
        summary_text: &str,
        covered_titles: BTreeSet<String>,
        advance_count: u32,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            summary_text: bound_summary(summary_text),
            covered_titles,
            advance_count,
            updated_at,
        }
    }

    pub fn summary_text(&self) -> &str {
        &self.summary_text
    }

    pub fn set_summary_text(&mut self, text: &str) {
        self.summary_text = bound_summary(text);
    }
}

/// Trim and cap a summary at [`MAX_SUMMARY_CHARS`] characters.
fn bound_summary(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(MAX_SUMMARY_CHARS) {
        Some((byte_idx, _)) => trimmed[..byte_idx].to_string(),
        None => trimmed.to_string(),
    }
}

/// Label of a quiz option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OptionId {
    A,
    B,
    C,
    D,
}

impl OptionId {
    pub const ALL: [OptionId; 4] = [OptionId::A, OptionId::B, OptionId::C, OptionId::D];

    pub fn as_char(self) -> char {
        match self {
            OptionId::A => 'A',
            OptionId::B => 'B',
            OptionId::C => 'C',
            OptionId::D => 'D',
        }
    }

    pub fn index(self) -> usize {
        match self {
            OptionId::A => 0,
            OptionId::B => 1,
            OptionId::C => 2,
            OptionId::D => 3,
        }
    }
}

impl fmt::Display for OptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

impl FromStr for OptionId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(OptionId::A),
            "B" => Ok(OptionId::B),
            "C" => Ok(OptionId::C),
            "D" => Ok(OptionId::D),
            other => Err(format!("not an option label: '{other}'")),
        }
    }
}

/// One answer option of a quiz.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizOption {
    pub id: OptionId,
    pub text: String,
    pub explanation: String,
}

/// A complete self-check quiz. Construction goes through [`Quiz::new`], which
/// rejects anything short of four options in A-D order with one valid answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quiz {
    question: String,
    options: [QuizOption; 4],
    correct_option_id: OptionId,
    why_it_matters: Option<String>,
}

impl Quiz {
    pub fn new(
        question: String,
        options: [QuizOption; 4],
        correct_option_id: OptionId,
        why_it_matters: Option<String>,
    ) -> Option<Self> {
        if question.trim().is_empty() {
            return None;
        }
        let ordered = options
            .iter()
            .zip(OptionId::ALL)
            .all(|(opt, id)| opt.id == id);
        let filled = options
            .iter()
            .all(|opt| !opt.text.trim().is_empty() && !opt.explanation.trim().is_empty());
        if !ordered || !filled {
            return None;
        }
        Some(Self {
            question,
            options,
            correct_option_id,
            why_it_matters: why_it_matters.filter(|w| !w.trim().is_empty()),
        })
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn options(&self) -> &[QuizOption; 4] {
        &self.options
    }

    pub fn correct_option_id(&self) -> OptionId {
        self.correct_option_id
    }

    pub fn correct_option(&self) -> &QuizOption {
        &self.options[self.correct_option_id.index()]
    }

    pub fn why_it_matters(&self) -> Option<&str> {
        self.why_it_matters.as_deref()
    }
}

/// One generated unit, ready for rendering. Never persisted as an entity.
#[derive(Debug, Clone)]
pub struct GeneratedUnit {
    pub raw_text: String,
    pub body_without_quiz: String,
    pub quiz: Option<Quiz>,
}
