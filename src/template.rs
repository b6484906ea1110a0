//! `{placeholder}` scanning and substitution for endpoint, path and
//! parameter templates.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::TemplateError;

/// Binding name that carries the resolved credential into path-embedded keys.
pub const API_KEY_PLACEHOLDER: &str = "api_key";

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

/// The first placeholder a render pass could not fill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unresolved(pub String);

/// List the placeholder names in `template`, in order of appearance.
///
/// Stray or nested braces and empty names are rejected.
pub fn placeholders(template: &str) -> Result<Vec<String>, TemplateError> {
    let names = PLACEHOLDER
        .captures_iter(template)
        .map(|caps| caps[1].to_string())
        .collect();

    let residue = PLACEHOLDER.replace_all(template, "");
    if residue.contains('{') || residue.contains('}') {
        return Err(TemplateError::Malformed {
            template: template.to_string(),
            reason: "unbalanced brace or invalid placeholder name".to_string(),
        });
    }
    Ok(names)
}

/// Whether `template` contains any placeholder at all.
pub fn has_placeholders(template: &str) -> bool {
    PLACEHOLDER.is_match(template)
}

/// Substitute every placeholder using `lookup`.
///
/// Substitution is a single pass: values are inserted verbatim and never
/// re-scanned. Stops at the first name `lookup` cannot supply.
pub fn render<'a, F>(template: &str, lookup: F) -> Result<String, Unresolved>
where
    F: Fn(&str) -> Option<Cow<'a, str>>,
{
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in PLACEHOLDER.captures_iter(template) {
        let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
        let name = &caps[1];
        let value = lookup(name).ok_or_else(|| Unresolved(name.to_string()))?;
        out.push_str(&template[last..whole.start]);
        out.push_str(&value);
        last = whole.end;
    }
    out.push_str(&template[last..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bind<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<Cow<'a, str>> {
        move |name| {
            pairs
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| Cow::Borrowed(*v))
        }
    }

    #[test]
    fn test_placeholders_in_order() {
        let names = placeholders("{api_key}/latest/{base_currency}").unwrap();
        assert_eq!(names, vec!["api_key", "base_currency"]);
    }

    #[test]
    fn test_placeholders_none() {
        assert!(placeholders("coins/markets").unwrap().is_empty());
        assert!(!has_placeholders("coins/markets"));
    }

    #[test]
    fn test_placeholders_rejects_stray_brace() {
        assert!(placeholders("coins/{id/market_chart").is_err());
        assert!(placeholders("coins/id}/market_chart").is_err());
        assert!(placeholders("coins/{}/market_chart").is_err());
        assert!(placeholders("coins/{{id}}/market_chart").is_err());
    }

    #[test]
    fn test_render_substitutes_all() {
        let pairs = [("id", "bitcoin")];
        let rendered = render("coins/{id}/market_chart", bind(&pairs)).unwrap();
        assert_eq!(rendered, "coins/bitcoin/market_chart");
    }

    #[test]
    fn test_render_reports_first_unresolved() {
        let pairs = [("base_currency", "USD")];
        let err = render("{api_key}/latest/{base_currency}", bind(&pairs)).unwrap_err();
        assert_eq!(err, Unresolved("api_key".to_string()));
    }

    #[test]
    fn test_render_does_not_rescan_values() {
        let pairs = [("q", "{id}")];
        let rendered = render("search/{q}", bind(&pairs)).unwrap();
        assert_eq!(rendered, "search/{id}");
    }
}
