use std::collections::HashSet;

/// Reduces an unlock reason to plain text.
///
/// Tags are dropped and their text kept; `<script>` and `<style>` lose their
/// content too. The result is stored as plain text in the audit trail, so the
/// entity escaping ammonia applies on output is decoded again and whatever
/// renders it must escape.
pub fn clean_reason(input: &str) -> String {
    let dropped: HashSet<&str> = ["script", "style"].into_iter().collect();
    let cleaned = ammonia::Builder::empty()
        .clean_content_tags(dropped)
        .clean(input)
        .to_string();

    unescape_text(&cleaned).trim().to_string()
}

/// Inverts the entities html5ever emits when serializing text nodes.
fn unescape_text(escaped: &str) -> String {
    escaped
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", "\u{a0}")
        .replace("&amp;", "&")
}
