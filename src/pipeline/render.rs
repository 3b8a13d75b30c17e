//! HTML pages for published units and curriculum indexes.

use pulldown_cmark::{Event, Options, Parser, html};

use crate::curriculum::model::{Quiz, UserProgress};

/// Markdown to HTML. Raw HTML in the source is escaped, not passed through.
pub fn markdown_to_html(input: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TABLES);

    let parser = Parser::new_ext(input, options).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        other => other,
    });
    let mut out = String::new();
    html::push_html(&mut out, parser);
    out
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn page(title: &str, content: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{title}</title>\n</head>\n<body>\n<main>\n{content}</main>\n</body>\n</html>\n",
        title = escape_html(title),
    )
}

/// Full page for one unit, with the quiz section when one was parsed.
pub fn render_unit_page(
    topic: &str,
    unit_title: &str,
    body_markdown: &str,
    quiz: Option<&Quiz>,
    plan_url: Option<&str>,
) -> String {
    let mut content = format!(
        "<header>\n<p class=\"topic\">{}</p>\n<h1>{}</h1>\n</header>\n<article>\n{}</article>\n",
        escape_html(topic),
        escape_html(unit_title),
        markdown_to_html(body_markdown),
    );
    if let Some(quiz) = quiz {
        content.push_str(&render_quiz(quiz));
    }
    if let Some(url) = plan_url {
        content.push_str(&format!(
            "<nav><a href=\"{}\">Back to the curriculum</a></nav>\n",
            escape_html(url)
        ));
    }
    page(&format!("{topic}: {unit_title}"), &content)
}

fn render_quiz(quiz: &Quiz) -> String {
    let mut out = String::from("<section class=\"quiz\">\n<h2>Quiz</h2>\n");
    out.push_str(&format!("<p class=\"question\">{}</p>\n<ol type=\"A\">\n", escape_html(quiz.question())));
    for opt in quiz.options() {
        let correct = opt.id == quiz.correct_option_id();
        out.push_str(&format!(
            "<li data-option=\"{id}\" data-correct=\"{correct}\">{text}\
             <details><summary>Explanation</summary><p>{explanation}</p></details></li>\n",
            id = opt.id,
            text = escape_html(&opt.text),
            explanation = escape_html(&opt.explanation),
        ));
    }
    out.push_str("</ol>\n");
    out.push_str(&format!(
        "<details class=\"answer\"><summary>Show answer</summary><p>Correct answer: {}</p></details>\n",
        quiz.correct_option_id()
    ));
    if let Some(why) = quiz.why_it_matters() {
        out.push_str(&format!("<p class=\"why\">Why it matters: {}</p>\n", escape_html(why)));
    }
    out.push_str("</section>\n");
    out
}

/// Curriculum index. Delivered units link to their published pages.
pub fn render_plan_page(progress: &UserProgress) -> String {
    let curriculum = progress.curriculum();
    let mut content = format!(
        "<h1>{}</h1>\n<p>{} of {} units delivered</p>\n<ol>\n",
        escape_html(curriculum.topic()),
        progress.current_index(),
        curriculum.len(),
    );
    for (i, title) in curriculum.units().iter().enumerate() {
        match progress.completed_links().get(&i) {
            Some(url) => content.push_str(&format!(
                "<li><a href=\"{}\">{}</a></li>\n",
                escape_html(url),
                escape_html(title)
            )),
            None => content.push_str(&format!("<li>{}</li>\n", escape_html(title))),
        }
    }
    content.push_str("</ol>\n");
    page(&format!("{} learning plan", curriculum.topic()), &content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curriculum::{Curriculum, OptionId, QuizOption, advance};
    use chrono::Utc;

    #[test]
    fn markdown_renders_structure() {
        let html = markdown_to_html("## Key Concepts:\n\n**Term:** meaning\n\n- one\n- two");
        assert!(html.contains("<h2>Key Concepts:</h2>"));
        assert!(html.contains("<strong>Term:</strong>"));
        assert!(html.contains("<li>one</li>"));
    }

    #[test]
    fn raw_html_is_escaped() {
        let html = markdown_to_html("hello <script>alert(1)</script>");
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn unit_page_includes_quiz_in_order() {
        let options = OptionId::ALL.map(|id| QuizOption {
            id,
            text: format!("text {id}"),
            explanation: format!("exp {id}"),
        });
        let quiz = Quiz::new("Q <1>?".into(), options, OptionId::C, Some("matters".into())).unwrap();
        let html = render_unit_page("Rust", "Intro", "Body", Some(&quiz), Some("https://x/index.html"));
        assert!(html.contains("Q &lt;1&gt;?"));
        let a = html.find("text A").unwrap();
        let d = html.find("text D").unwrap();
        assert!(a < d);
        assert!(html.contains("data-option=\"C\" data-correct=\"true\""));
        assert!(html.contains("https://x/index.html"));
    }

    #[test]
    fn plan_page_links_completed_units_only() {
        let progress = crate::curriculum::UserProgress::new(
            "a@b.c",
            Curriculum::new("Rust", vec!["Intro".into(), "Variables".into()]),
            false,
        );
        let progress = advance(&progress, 0, "https://x/00_intro.html", Utc::now()).into_progress();
        let html = render_plan_page(&progress);
        assert!(html.contains("<a href=\"https://x/00_intro.html\">Intro</a>"));
        assert!(html.contains("<li>Variables</li>"));
        assert!(html.contains("1 of 2 units delivered"));
    }
}
