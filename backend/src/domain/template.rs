//! `${key}` placeholder substitution for notification templates.

use std::collections::BTreeMap;

/// Escape the characters that would otherwise be interpreted as markup.
pub fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Replace every `${key}` whose key is in `variables` with its HTML-escaped
/// value. Unknown placeholders and unterminated `${` are left untouched.
///
/// # Examples
/// ```
/// use accounts::domain::substitute_placeholders;
/// use std::collections::BTreeMap;
///
/// let vars = BTreeMap::from([("name".to_owned(), "Alice".to_owned())]);
/// assert_eq!(
///     substitute_placeholders("Hi ${name}, ${unknown}", &vars),
///     "Hi Alice, ${unknown}"
/// );
/// ```
pub fn substitute_placeholders(template: &str, variables: &BTreeMap<String, String>) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        let (before, candidate) = rest.split_at(start);
        rendered.push_str(before);
        let Some(end) = candidate.find('}') else {
            rest = candidate;
            break;
        };
        let (placeholder, after) = candidate.split_at(end + 1);
        let key = placeholder
            .strip_prefix("${")
            .and_then(|inner| inner.strip_suffix('}'))
            .unwrap_or_default();
        match variables.get(key) {
            Some(value) => rendered.push_str(&escape_html(value)),
            None => rendered.push_str(placeholder),
        }
        rest = after;
    }
    rendered.push_str(rest);
    rendered
}
