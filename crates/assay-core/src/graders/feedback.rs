//! Extended hint markup appended to correctness messages.

const HINT_CORRECT_STYLE: &str = "feedback-hint-correct";
const HINT_INCORRECT_STYLE: &str = "feedback-hint-incorrect";
const HINT_LABEL_STYLE: &str = "hint-label";
const HINT_TEXT_STYLE: &str = "hint-text";
const HINT_MULTILINE_STYLE: &str = "feedback-hint-multi";

/// Label shown before a hint.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HintLabel {
    /// "Correct:" or "Incorrect:" depending on the verdict.
    #[default]
    Verdict,
    /// Author-supplied label; empty suppresses the label.
    Custom(String),
}

/// Wrap hint texts in the feedback block.
///
/// Returns an empty string when there is nothing to show.
pub fn hint_div(texts: &[String], correct: bool, label: &HintLabel, multiline: bool) -> String {
    let texts: Vec<&String> = texts.iter().filter(|t| !t.trim().is_empty()).collect();
    if texts.is_empty() {
        return String::new();
    }

    let mut hints: String = texts
        .iter()
        .map(|t| format!("<div class=\"{}\">{}</div>", HINT_TEXT_STYLE, t.trim()))
        .collect();
    if multiline {
        hints = format!("<div class=\"{}\">{}</div>", HINT_MULTILINE_STYLE, hints);
    }

    let label = match label {
        HintLabel::Verdict if correct => "Correct:".to_string(),
        HintLabel::Verdict => "Incorrect:".to_string(),
        HintLabel::Custom(text) => text.clone(),
    };
    let label_wrap = if label.is_empty() {
        String::new()
    } else {
        format!(
            "<span class=\"{}\">{} </span>",
            HINT_LABEL_STYLE,
            html_escape(&label)
        )
    };

    let style = if correct {
        HINT_CORRECT_STYLE
    } else {
        HINT_INCORRECT_STYLE
    };
    format!(
        "<div class=\"{}\"><div class=\"explanation-title\">Answer</div>{}{}</div>",
        style, label_wrap, hints
    )
}

/// Shorthand for a single hint with the default label.
pub fn single_hint(text: &str, correct: bool) -> String {
    hint_div(&[text.to_string()], correct, &HintLabel::Verdict, false)
}

/// Escape text for inclusion in html.
pub fn html_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            other => out.push(other),
        }
    }
    out
}
