//! Text preparation for the full-text index: markup stripping on the way in,
//! query sanitizing and highlighting on the way out.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

/// Boundaries the index puts around matches in snippets. Compressed text
/// holds no control characters, so these survive HTML escaping unambiguously.
pub(crate) const MATCH_START: &str = "\u{2}";
pub(crate) const MATCH_END: &str = "\u{3}";

const BOOLEAN_OPERATORS: [&str; 3] = ["AND", "OR", "NOT"];

fn block_tag_regex() -> &'static Regex {
    static BLOCK_TAG: OnceLock<Regex> = OnceLock::new();
    BLOCK_TAG.get_or_init(|| {
        Regex::new(
            r"(?i)</?(p|div|br|hr|li|ul|ol|h[1-6]|tr|td|th|table|thead|tbody|blockquote|pre|section|article|header|footer|figure|figcaption)\b[^>]*>",
        )
        .expect("block tag pattern is valid")
    })
}

/// Reduce page markup to plain searchable text.
///
/// Tags are stripped (script and style bodies dropped), entities decoded,
/// and whitespace collapsed to single spaces.
pub fn compress_text_for_search(markup: &str) -> String {
    let spaced = block_tag_regex().replace_all(markup, " ");
    let stripped = ammonia::Builder::default()
        .tags(HashSet::new())
        .clean(&spaced)
        .to_string();
    let decoded = html_escape::decode_html_entities(&stripped);

    decoded
        .split(|c: char| c.is_whitespace() || c.is_control())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// The words of a user query, in order, as the index tokenizer sees them.
fn query_terms(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(|c: char| !c.is_alphanumeric())
        .filter(|term| !term.is_empty())
}

enum QueryPart<'a> {
    Term(&'a str),
    Operator(&'static str),
}

/// Translate free text into an FTS5 MATCH expression.
///
/// Every word becomes a quoted string so user input cannot inject syntax.
/// Uppercase `AND`, `OR` and `NOT` standing between two words are kept as
/// operators; elsewhere they are dropped. The last word matches as a prefix.
/// Returns an empty string when nothing searchable is left.
pub fn prepare_fts_query(raw: &str) -> String {
    let mut parts: Vec<QueryPart<'_>> = Vec::new();

    for chunk in raw.split_whitespace() {
        if let Some(operator) = BOOLEAN_OPERATORS.iter().find(|op| **op == chunk) {
            if matches!(parts.last(), Some(QueryPart::Term(_))) {
                parts.push(QueryPart::Operator(*operator));
            }
            continue;
        }
        parts.extend(query_terms(chunk).map(QueryPart::Term));
    }

    while matches!(parts.last(), Some(QueryPart::Operator(_))) {
        parts.pop();
    }

    let last_term = parts
        .iter()
        .rposition(|part| matches!(part, QueryPart::Term(_)));

    parts
        .iter()
        .enumerate()
        .map(|(i, part)| match part {
            QueryPart::Term(term) if Some(i) == last_term => format!("\"{term}\"*"),
            QueryPart::Term(term) => format!("\"{term}\""),
            QueryPart::Operator(op) => op.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// HTML-escape `text` and wrap every word starting with a query term in
/// `<mark>`. Matching is case-insensitive.
pub fn highlight_phrase(query: &str, text: &str) -> String {
    let mut terms: Vec<String> = query_terms(query)
        .filter(|term| !BOOLEAN_OPERATORS.contains(term))
        .map(regex::escape)
        .collect();
    terms.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    terms.dedup();

    if terms.is_empty() {
        return html_escape::encode_text(text).into_owned();
    }

    let Ok(pattern) = Regex::new(&format!(r"(?i)\b(?:{})\w*", terms.join("|"))) else {
        return html_escape::encode_text(text).into_owned();
    };

    let mut highlighted = String::with_capacity(text.len() + 16);
    let mut cursor = 0;
    for found in pattern.find_iter(text) {
        highlighted.push_str(&html_escape::encode_text(&text[cursor..found.start()]));
        highlighted.push_str("<mark>");
        highlighted.push_str(&html_escape::encode_text(found.as_str()));
        highlighted.push_str("</mark>");
        cursor = found.end();
    }
    highlighted.push_str(&html_escape::encode_text(&text[cursor..]));
    highlighted
}

/// Turn an index snippet into safe HTML with `<mark>` around matches.
pub(crate) fn render_snippet(snippet: &str) -> String {
    html_escape::encode_text(snippet)
        .replace(MATCH_START, "<mark>")
        .replace(MATCH_END, "</mark>")
}
