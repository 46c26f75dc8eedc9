//! Pluggable path evaluation over documents.
//!
//! Queries, filters, and on-demand resolvers never hardcode how a dotted
//! path like `owner.userName` or `tags[0]` maps onto a document — they go
//! through the [`PathEvaluator`] collaborator. The crate ships one simple
//! implementation, [`DottedPath`]; richer expression engines can be swapped
//! in behind the same trait.
//!
//! [`expand`] substitutes `${path}` placeholders in a template against a
//! document, which is how on-demand resolvers build secondary request URLs
//! (e.g. `releases/${releaseId}/vulnerabilities/${vulnId}/details`).

use crate::document::{Document, Value};
use crate::error::{Error, Result};

/// Resolves a path expression against a document.
///
/// Evaluation goes through [`Document::get`], so traversing a key that
/// holds an unresolved on-demand slot resolves (and memoizes) it.
pub trait PathEvaluator: Send + Sync {
    /// Evaluates `path` against `doc`. `Ok(None)` means the path does not
    /// lead to a value; errors come from on-demand resolution along the way.
    fn evaluate(&self, doc: &Document, path: &str) -> Result<Option<Value>>;
}

/// The default evaluator: dot-separated keys with optional `[index]` list
/// access, e.g. `owner.userName`, `issues[0].severity`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DottedPath;

impl DottedPath {
    fn split_segment(segment: &str) -> Result<(&str, Option<usize>)> {
        match segment.find('[') {
            None => Ok((segment, None)),
            Some(open) => {
                let close = segment
                    .rfind(']')
                    .ok_or_else(|| Error::config(format!("unclosed index in '{segment}'")))?;
                let index = segment[open + 1..close]
                    .parse::<usize>()
                    .map_err(|_| Error::config(format!("bad list index in '{segment}'")))?;
                Ok((&segment[..open], Some(index)))
            }
        }
    }
}

impl PathEvaluator for DottedPath {
    fn evaluate(&self, doc: &Document, path: &str) -> Result<Option<Value>> {
        if path.is_empty() {
            return Ok(None);
        }
        let mut current = Value::Doc(doc.clone());
        for segment in path.split('.') {
            let (key, index) = Self::split_segment(segment)?;
            let next = match &current {
                Value::Doc(d) => d.get(key)?,
                _ => None,
            };
            current = match next {
                Some(v) => v,
                None => return Ok(None),
            };
            if let Some(i) = index {
                current = match current {
                    Value::List(items) => match items.into_iter().nth(i) {
                        Some(v) => v,
                        None => return Ok(None),
                    },
                    _ => return Ok(None),
                };
            }
        }
        Ok(Some(current))
    }
}

/// Expands every `${path}` placeholder in `template` using values from
/// `doc`, as resolved by `evaluator`.
///
/// # Errors
///
/// Returns [`Error::Configuration`] when a placeholder is unterminated or
/// the path resolves to nothing scalar — a secondary request URL built
/// from a half-expanded template would target the wrong resource.
pub fn expand(template: &str, doc: &Document, evaluator: &dyn PathEvaluator) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| Error::config(format!("unterminated placeholder in '{template}'")))?;
        let path = &after[..end];
        let value = evaluator
            .evaluate(doc, path)?
            .and_then(|v| v.as_scalar_string())
            .ok_or_else(|| {
                Error::config(format!("template value '{path}' is missing or not scalar"))
            })?;
        out.push_str(&value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> Document {
        Document::from_json(&serde_json::json!({
            "releaseId": 8113,
            "vuln": {"id": "abc-1", "severity": 4},
            "issues": [{"name": "sqli"}, {"name": "xss"}]
        }))
        .unwrap()
    }

    #[test]
    fn evaluates_top_level_key() {
        let v = DottedPath.evaluate(&doc(), "releaseId").unwrap();
        assert_eq!(v.and_then(|v| v.as_i64()), Some(8113));
    }

    #[test]
    fn evaluates_nested_path() {
        let v = DottedPath.evaluate(&doc(), "vuln.severity").unwrap();
        assert_eq!(v.and_then(|v| v.as_i64()), Some(4));
    }

    #[test]
    fn evaluates_list_index() {
        let v = DottedPath.evaluate(&doc(), "issues[1].name").unwrap();
        assert_eq!(
            v.and_then(|v| v.as_str().map(str::to_owned)).as_deref(),
            Some("xss")
        );
    }

    #[test]
    fn missing_path_yields_none() {
        assert_eq!(DottedPath.evaluate(&doc(), "vuln.nope").unwrap(), None);
        assert_eq!(DottedPath.evaluate(&doc(), "issues[9].name").unwrap(), None);
        // Descending into a scalar dead-ends rather than erroring.
        assert_eq!(DottedPath.evaluate(&doc(), "releaseId.x").unwrap(), None);
    }

    #[test]
    fn malformed_index_is_a_configuration_error() {
        let err = DottedPath.evaluate(&doc(), "issues[one]").unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn expand_substitutes_placeholders() {
        let url = expand(
            "releases/${releaseId}/vulnerabilities/${vuln.id}/details",
            &doc(),
            &DottedPath,
        )
        .unwrap();
        assert_eq!(url, "releases/8113/vulnerabilities/abc-1/details");
    }

    #[test]
    fn expand_without_placeholders_is_identity() {
        let url = expand("api/v3/releases", &doc(), &DottedPath).unwrap();
        assert_eq!(url, "api/v3/releases");
    }

    #[test]
    fn expand_fails_on_missing_value() {
        let err = expand("releases/${nope}", &doc(), &DottedPath).unwrap_err();
        assert!(
            matches!(err, Error::Configuration { .. }),
            "missing template value must fail, not emit a broken URL"
        );
    }

    #[test]
    fn expand_fails_on_unterminated_placeholder() {
        let err = expand("releases/${releaseId", &doc(), &DottedPath).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }
}
