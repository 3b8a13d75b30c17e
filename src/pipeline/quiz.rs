//! Quiz extraction and body sanitisation.
//!
//! Generated units end with an optional self-check block:
//!
//! ```text
//! ## Quiz
//! Question: What does `let` do?
//! A) Declares a binding
//! B) Allocates on the heap
//! C) Starts a loop
//! D) Imports a module
//! Correct: A
//! Explanation A: `let` introduces a new binding.
//! Explanation B: Heap allocation needs `Box` or a collection.
//! Explanation C: Loops use `loop`, `while`, or `for`.
//! Explanation D: Imports use `use`.
//! Why it matters: Every Rust program binds values.
//! ```
//!
//! The body is walked line by line through three states. Once the quiz
//! heading is seen the machine never leaves `InQuiz`, so the block is always
//! stripped from the body whether or not it parses.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::curriculum::model::{OptionId, Quiz, QuizOption};

/// Heading that introduces the quiz block.
pub const QUIZ_HEADING: &str = "## Quiz";

/// The block layout requested from the backend.
pub const QUIZ_FORMAT: &str = "## Quiz
Question: <one question about this unit>
A) <option text>
B) <option text>
C) <option text>
D) <option text>
Correct: <exactly one of A, B, C, D>
Explanation A: <why A is right or wrong>
Explanation B: <why B is right or wrong>
Explanation C: <why C is right or wrong>
Explanation D: <why D is right or wrong>
Why it matters: <one sentence, optional>";

static QUESTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^question\s*\d*\s*[:.]\s*(.*)$").expect("valid regex"));
static OPTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\(?([A-D])[).:]\s*(.*)$").expect("valid regex"));
static CORRECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:correct(?:\s+answer)?|answer)\s*[:.]\s*(.*)$").expect("valid regex")
});
static EXPLANATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^explanation\s+(?:for\s+)?\(?([A-D])\)?\s*[:.)\-]\s*(.*)$")
        .expect("valid regex")
});
static WHY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^why\s+it\s+matters\s*[:.]\s*(.*)$").expect("valid regex"));
static SINGLE_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\(?([A-Da-d])\)?(?:[).:]|\s|$)").expect("valid regex"));
static MULTI_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\(?[A-D]\)?\s*(?:,|/|&|\band\b|\bor\b)\s*\(?[A-D]\b").expect("valid regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Body,
    InList,
    InQuiz,
}

/// Split `raw` into a sanitised body and an optional fully-populated quiz.
pub fn extract(raw: &str) -> (String, Option<Quiz>) {
    let mut state = State::Body;
    let mut body: Vec<&str> = Vec::new();
    let mut quiz_lines: Vec<&str> = Vec::new();

    for line in raw.lines() {
        if state != State::InQuiz && is_quiz_heading(line) {
            state = State::InQuiz;
            continue;
        }

        state = match state {
            State::InQuiz => {
                quiz_lines.push(line);
                State::InQuiz
            }
            State::Body => {
                if is_list_item(line) {
                    if needs_gap_before_list(body.last()) {
                        body.push("");
                    }
                    body.push(line);
                    State::InList
                } else {
                    body.push(line);
                    State::Body
                }
            }
            State::InList => {
                if line.trim().is_empty() {
                    body.push(line);
                    State::Body
                } else if is_list_item(line) || line.starts_with(char::is_whitespace) {
                    body.push(line);
                    State::InList
                } else {
                    body.push("");
                    body.push(line);
                    State::Body
                }
            }
        };
    }

    let found_heading = state == State::InQuiz;
    let body = finish_body(body);

    if !found_heading {
        return (body, None);
    }

    let quiz = parse_quiz_block(&quiz_lines);
    if quiz.is_none() {
        warn!(lines = quiz_lines.len(), "Quiz block malformed; dropping quiz");
    } else {
        debug!("Quiz block parsed");
    }
    (body, quiz)
}

/// A heading line whose text is just "quiz", e.g. `## Quiz`, `### **Quiz:**`.
pub fn is_quiz_heading(line: &str) -> bool {
    let trimmed = line.trim();
    if !trimmed.starts_with('#') {
        return false;
    }
    let text = trimmed
        .trim_start_matches('#')
        .trim()
        .trim_matches('*')
        .trim()
        .trim_end_matches(':')
        .trim_matches('*')
        .trim();
    text.eq_ignore_ascii_case("quiz")
}

fn is_list_item(line: &str) -> bool {
    let t = line.trim_start();
    if t.starts_with("- ") || t.starts_with("* ") || t.starts_with("+ ") {
        return true;
    }
    let digits = t.chars().take_while(char::is_ascii_digit).count();
    digits > 0 && t[digits..].starts_with(". ")
}

/// A list directly after paragraph text needs a blank line to render as a list.
fn needs_gap_before_list(prev: Option<&&str>) -> bool {
    prev.is_some_and(|l| {
        let t = l.trim();
        !t.is_empty() && !t.starts_with('#') && !is_list_item(l)
    })
}

/// Join body lines, dropping trailing blank lines and a dangling `---` separator.
fn finish_body(mut lines: Vec<&str>) -> String {
    while let Some(last) = lines.last() {
        let t = last.trim();
        if t.is_empty() || (t.len() >= 3 && t.chars().all(|c| c == '-')) {
            lines.pop();
        } else {
            break;
        }
    }
    lines.join("\n")
}

/// Accumulates quiz fields. Any duplicate or malformed line poisons the draft.
#[derive(Debug, Default)]
struct QuizDraft {
    question: Option<String>,
    options: [Option<String>; 4],
    explanations: [Option<String>; 4],
    correct: Option<OptionId>,
    why: Option<String>,
    poisoned: bool,
}

impl QuizDraft {
    fn set(slot: &mut Option<String>, value: &str, poisoned: &mut bool) {
        if slot.is_some() {
            *poisoned = true;
        } else {
            *slot = Some(value.trim().to_string());
        }
    }

    fn feed(&mut self, line: &str) {
        let cleaned = clean_line(line);
        if cleaned.is_empty() {
            return;
        }

        if let Some(c) = EXPLANATION.captures(&cleaned) {
            match c[1].parse::<OptionId>() {
                Ok(id) => Self::set(&mut self.explanations[id.index()], &c[2], &mut self.poisoned),
                Err(_) => self.poisoned = true,
            }
        } else if let Some(c) = QUESTION.captures(&cleaned) {
            Self::set(&mut self.question, &c[1], &mut self.poisoned);
        } else if let Some(c) = CORRECT.captures(&cleaned) {
            match parse_correct_label(&c[1]) {
                Some(id) if self.correct.is_none() => self.correct = Some(id),
                _ => self.poisoned = true,
            }
        } else if let Some(c) = WHY.captures(&cleaned) {
            Self::set(&mut self.why, &c[1], &mut self.poisoned);
        } else if let Some(c) = OPTION.captures(&cleaned) {
            match c[1].parse::<OptionId>() {
                Ok(id) => Self::set(&mut self.options[id.index()], &c[2], &mut self.poisoned),
                Err(_) => self.poisoned = true,
            }
        }
    }

    fn finalize(self) -> Option<Quiz> {
        if self.poisoned {
            return None;
        }
        let question = self.question?;
        let correct = self.correct?;
        let [oa, ob, oc, od] = self.options;
        let [ea, eb, ec, ed] = self.explanations;
        let option = |id: OptionId, text: Option<String>, explanation: Option<String>| {
            Some(QuizOption {
                id,
                text: text?,
                explanation: explanation?,
            })
        };
        let options = [
            option(OptionId::A, oa, ea)?,
            option(OptionId::B, ob, eb)?,
            option(OptionId::C, oc, ec)?,
            option(OptionId::D, od, ed)?,
        ];
        Quiz::new(question, options, correct, self.why)
    }
}

/// Strip list bullets and bold markers so labels can be matched.
fn clean_line(line: &str) -> String {
    let t = line.trim();
    let t = t
        .strip_prefix("- ")
        .or_else(|| t.strip_prefix("* "))
        .unwrap_or(t);
    t.replace("**", "").replace("__", "").trim().to_string()
}

/// Exactly one label, e.g. `B`, `B)`, `(B)`, `B) Ownership moves`.
fn parse_correct_label(value: &str) -> Option<OptionId> {
    let v = value.trim().trim_matches('*').trim();
    if MULTI_LABEL.is_match(v) {
        return None;
    }
    SINGLE_LABEL
        .captures(v)
        .and_then(|c| c[1].parse::<OptionId>().ok())
}

fn parse_quiz_block(lines: &[&str]) -> Option<Quiz> {
    let mut draft = QuizDraft::default();
    for line in lines {
        draft.feed(line);
    }
    draft.finalize()
}

/// Render a quiz in the block layout that [`extract`] parses.
pub fn format_quiz_block(quiz: &Quiz) -> String {
    let mut out = format!("{QUIZ_HEADING}\nQuestion: {}\n", quiz.question());
    for opt in quiz.options() {
        out.push_str(&format!("{}) {}\n", opt.id, opt.text));
    }
    out.push_str(&format!("Correct: {}\n", quiz.correct_option_id()));
    for opt in quiz.options() {
        out.push_str(&format!("Explanation {}: {}\n", opt.id, opt.explanation));
    }
    if let Some(why) = quiz.why_it_matters() {
        out.push_str(&format!("Why it matters: {why}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const FULL: &str = "## Heading: Ownership\n\nRust tracks owners.\n- one owner\n- moves transfer\nAfter the list.\n\n---\n\n## Quiz\n**Question:** Who frees memory?\n- A) The garbage collector\n- B) The owner going out of scope\n- C) The programmer with free()\n- D) The OS at exit only\n**Correct:** B\nExplanation A: Rust has no GC.\nExplanation B: Drop runs at scope end.\nExplanation C: There is no manual free in safe Rust.\nExplanation D: Memory is reclaimed much sooner.\nWhy it matters: It removes a class of leaks.\n";

    #[test]
    fn parses_full_quiz_and_strips_block() {
        let (body, quiz) = extract(FULL);
        let quiz = quiz.expect("quiz should parse");
        assert_eq!(quiz.question(), "Who frees memory?");
        assert_eq!(quiz.correct_option_id(), OptionId::B);
        assert_eq!(quiz.options()[0].text, "The garbage collector");
        assert_eq!(quiz.options()[3].explanation, "Memory is reclaimed much sooner.");
        assert_eq!(quiz.why_it_matters(), Some("It removes a class of leaks."));
        assert!(!body.contains("Quiz"));
        assert!(!body.contains("garbage"));
        assert!(!body.trim_end().ends_with("---"));
    }

    #[test]
    fn options_keep_authored_order() {
        let (_, quiz) = extract(FULL);
        let ids: Vec<OptionId> = quiz.unwrap().options().iter().map(|o| o.id).collect();
        assert_eq!(ids, OptionId::ALL);
    }

    #[test]
    fn missing_explanation_drops_quiz_but_strips_block() {
        let raw = FULL.replace("Explanation C: There is no manual free in safe Rust.\n", "");
        let (body, quiz) = extract(&raw);
        assert!(quiz.is_none());
        assert!(!body.contains("## Quiz"));
        assert!(!body.contains("Who frees memory"));
    }

    #[test]
    fn multiple_correct_labels_drop_quiz() {
        let raw = FULL.replace("**Correct:** B", "Correct: A, B");
        assert!(extract(&raw).1.is_none());
    }

    #[test]
    fn invalid_correct_label_drops_quiz() {
        let raw = FULL.replace("**Correct:** B", "Correct: E");
        assert!(extract(&raw).1.is_none());
    }

    #[test]
    fn duplicate_option_drops_quiz() {
        let raw = FULL.replace("- D) The OS at exit only", "- C) Again");
        assert!(extract(&raw).1.is_none());
    }

    #[test]
    fn no_heading_means_no_quiz_and_body_kept() {
        let raw = "Just text.\nQuestion: not a quiz";
        let (body, quiz) = extract(raw);
        assert!(quiz.is_none());
        assert_eq!(body, raw);
    }

    #[test]
    fn list_spacing_is_normalised() {
        let (body, _) = extract("Intro line\n- a\n- b\nAfter");
        assert_eq!(body, "Intro line\n\n- a\n- b\n\nAfter");
    }

    #[test]
    fn heading_variants_detected() {
        assert!(is_quiz_heading("## Quiz"));
        assert!(is_quiz_heading("### **Quiz:**"));
        assert!(is_quiz_heading("  # quiz"));
        assert!(!is_quiz_heading("## Quiz answers"));
        assert!(!is_quiz_heading("Quiz"));
    }

    #[test]
    fn formatted_block_parses_back() {
        let (_, quiz) = extract(FULL);
        let quiz = quiz.unwrap();
        let (body, again) = extract(&format!("Body\n\n{}", format_quiz_block(&quiz)));
        assert_eq!(body, "Body");
        assert_eq!(again, Some(quiz));
    }

    proptest! {
        #[test]
        fn extraction_is_total(raw in "(?s).{0,400}") {
            let (_, quiz) = extract(&raw);
            if let Some(q) = quiz {
                prop_assert!(!q.question().trim().is_empty());
                for opt in q.options() {
                    prop_assert!(!opt.text.trim().is_empty());
                    prop_assert!(!opt.explanation.trim().is_empty());
                }
            }
        }

        #[test]
        fn body_never_contains_heading(
            before in "[a-zA-Z0-9 \\-\\n#*.:]{0,200}",
            after in "[a-zA-Z0-9 \\-\\n#*.:()]{0,200}",
        ) {
            let raw = format!("{before}\n## Quiz\n{after}");
            let (body, _) = extract(&raw);
            prop_assert!(!body.lines().any(is_quiz_heading));
        }
    }
}
