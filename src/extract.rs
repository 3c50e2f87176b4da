//! Recovers request descriptors from free-form agent text.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::{
    balanced_end, method_accepts_body, repair_json, MalformedReason, ParseFailure, RelayError,
    RequestDescriptor,
};

pub(crate) const DEFAULT_DIRECTIVE_KEY: &str = "send_response_function";

static FENCED_OBJECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```[A-Za-z0-9_-]*\s*(\{[\s\S]*?\})\s*```").expect("fenced object pattern")
});

#[derive(Debug, Clone)]
pub(crate) struct DescriptorParser {
    key: String,
    directive: Regex,
}

impl DescriptorParser {
    pub(crate) fn new(key: &str) -> Result<Self, RelayError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(RelayError::DirectiveKey(key.to_string()));
        }
        let pattern = format!(r#"["']?{}["']?\s*:\s*\["#, regex::escape(key));
        let directive =
            Regex::new(&pattern).map_err(|_| RelayError::DirectiveKey(key.to_string()))?;
        Ok(Self {
            key: key.to_string(),
            directive,
        })
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn extract_descriptors(
        &self,
        text: &str,
    ) -> Result<Vec<RequestDescriptor>, ParseFailure> {
        let snippet = self.locate(text).ok_or(ParseFailure::NotFound)?;
        let repaired = repair_json(snippet);
        let value: Value =
            serde_json::from_str(&repaired).map_err(|err| ParseFailure::Malformed {
                snippet: snippet.to_string(),
                reason: err.into(),
            })?;
        let items = self
            .descriptor_array(value)
            .ok_or_else(|| ParseFailure::Malformed {
                snippet: snippet.to_string(),
                reason: MalformedReason::MissingArray,
            })?;

        Ok(items
            .iter()
            .filter_map(|item| {
                let descriptor = coerce_descriptor(item);
                if descriptor.is_none() {
                    debug!(%item, "dropping descriptor without method or url");
                }
                descriptor
            })
            .collect())
    }

    /// Fenced object first, then `key: [ ... ]`.
    fn locate<'a>(&self, text: &'a str) -> Option<&'a str> {
        if let Some(found) = FENCED_OBJECT.captures(text).and_then(|caps| caps.get(1)) {
            return Some(found.as_str());
        }
        for found in self.directive.find_iter(text) {
            let open = found.end() - 1;
            if let Some(end) = balanced_end(text, open) {
                return Some(&text[open..end]);
            }
        }
        None
    }

    fn descriptor_array(&self, value: Value) -> Option<Vec<Value>> {
        match value {
            Value::Array(items) => Some(items),
            Value::Object(mut map) => {
                if let Some(Value::Array(items)) = map.remove(&self.key) {
                    return Some(items);
                }
                map.into_iter().find_map(|(_, v)| match v {
                    Value::Array(items) => Some(items),
                    _ => None,
                })
            }
            _ => None,
        }
    }
}

pub(crate) fn coerce_descriptor(value: &Value) -> Option<RequestDescriptor> {
    let obj = value.as_object()?;
    let method = non_empty_str(obj.get("method"))?;
    let url = non_empty_str(obj.get("url").or_else(|| obj.get("request_url")))?;

    let mut descriptor = RequestDescriptor::new(method, url);
    if let Some(headers) = obj.get("headers").and_then(Value::as_object) {
        for (name, value) in headers {
            if let Some(text) = scalar_text(value) {
                descriptor.headers.insert(name.clone(), text);
            }
        }
    }
    if method_accepts_body(&descriptor.method) {
        descriptor.body = obj.get("body").and_then(body_text);
    }
    Some(descriptor)
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn body_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> DescriptorParser {
        DescriptorParser::new(DEFAULT_DIRECTIVE_KEY).unwrap()
    }

    #[test]
    fn inline_directive_example() {
        let text = "`{send_response_function: [{'method':'GET','url':'http://x/a'}]}`";
        let found = parser().extract_descriptors(text).unwrap();
        assert_eq!(found, vec![RequestDescriptor::new("GET", "http://x/a")]);
        assert!(found[0].headers.is_empty());
    }

    #[test]
    fn fenced_block_wins_over_directive() {
        let text = "Here you go:\n```json\n{send_response_function: [{method: 'POST', url: 'http://x/fenced', body: 'a=1'}]}\n```\nsend_response_function: [{'method':'GET','url':'http://x/inline'}]";
        let found = parser().extract_descriptors(text).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].url, "http://x/fenced");
        assert_eq!(found[0].body.as_deref(), Some("a=1"));
    }

    #[test]
    fn multiline_directive_with_nested_headers() {
        let text = "Please replay these.\nsend_response_function: [\n  {'method': 'post', 'url': 'http://x/a', 'headers': {'Content-Type': 'application/json', 'X-Retry': 2}, 'body': {'k': [1, 2]}},\n  {'method': 'GET', 'url': 'http://x/b'}\n]\nThanks!";
        let found = parser().extract_descriptors(text).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].method, "POST");
        assert_eq!(found[0].headers["Content-Type"], "application/json");
        assert_eq!(found[0].headers["X-Retry"], "2");
        assert_eq!(found[0].body.as_deref(), Some(r#"{"k":[1,2]}"#));
        assert_eq!(found[1].summary(), "GET http://x/b");
    }

    #[test]
    fn lenient_text_matches_strict_canonical_form() {
        let lenient = "send_response_function: [{method: 'GET', url: 'http://x/a', headers: {Accept: 'text/html'}}, {'method': 'DELETE', 'url': 'http://x/b',}]";
        let strict = r#"```
{"send_response_function": [{"method": "GET", "url": "http://x/a", "headers": {"Accept": "text/html"}}, {"method": "DELETE", "url": "http://x/b"}]}
```"#;
        let p = parser();
        assert_eq!(
            p.extract_descriptors(lenient).unwrap(),
            p.extract_descriptors(strict).unwrap()
        );
    }

    #[test]
    fn no_marker_is_not_found() {
        let err = parser()
            .extract_descriptors("Hello! How can I help you today?")
            .unwrap_err();
        assert!(matches!(err, ParseFailure::NotFound));
    }

    #[test]
    fn empty_array_is_a_valid_empty_batch() {
        let found = parser()
            .extract_descriptors("send_response_function: []")
            .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn broken_json_is_malformed_with_snippet() {
        let text = "```\n{send_response_function: [{'method': 'GET' 'url': 'http://x/a'}]}\n```";
        match parser().extract_descriptors(text).unwrap_err() {
            ParseFailure::Malformed { snippet, reason } => {
                assert!(snippet.starts_with("{send_response_function"));
                assert!(matches!(reason, MalformedReason::Json(_)));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn object_without_array_is_malformed() {
        let text = "```\n{send_response_function: 'nothing here'}\n```";
        match parser().extract_descriptors(text).unwrap_err() {
            ParseFailure::Malformed { reason, .. } => {
                assert!(matches!(reason, MalformedReason::MissingArray))
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn any_array_field_is_accepted_when_key_differs() {
        let text = "```\n{requests: [{method: 'GET', url: 'http://x/a'}]}\n```";
        let found = parser().extract_descriptors(text).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn invalid_elements_are_dropped() {
        let text = "send_response_function: [{'method': 'GET'}, 'junk', 42, {'method': '', 'url': 'http://x/a'}, {'method': 'GET', 'url': 'http://x/ok'}]";
        let found = parser().extract_descriptors(text).unwrap();
        assert_eq!(found, vec![RequestDescriptor::new("GET", "http://x/ok")]);
    }

    #[test]
    fn request_url_alias_is_accepted() {
        let text = "send_response_function: [{'method': 'GET', 'request_url': 'http://x/legacy'}]";
        let found = parser().extract_descriptors(text).unwrap();
        assert_eq!(found[0].url, "http://x/legacy");
    }

    #[test]
    fn body_is_dropped_for_get() {
        let text = "send_response_function: [{'method': 'GET', 'url': 'http://x/a', 'body': 'ignored'}]";
        let found = parser().extract_descriptors(text).unwrap();
        assert_eq!(found[0].body, None);
    }

    #[test]
    fn quoted_directive_key_is_recognized() {
        let text = r#"Result: "send_response_function": [{"method": "GET", "url": "http://x/q"}]"#;
        let found = parser().extract_descriptors(text).unwrap();
        assert_eq!(found[0].url, "http://x/q");
    }

    #[test]
    fn custom_directive_key() {
        let p = DescriptorParser::new("replay_these").unwrap();
        assert_eq!(p.key(), "replay_these");
        let found = p
            .extract_descriptors("replay_these: [{'method':'PUT','url':'http://x/p','body':'v'}]")
            .unwrap();
        assert_eq!(found[0].method, "PUT");
        assert!(matches!(
            p.extract_descriptors("send_response_function: []"),
            Err(ParseFailure::NotFound)
        ));
    }

    #[test]
    fn empty_directive_key_is_rejected() {
        assert!(DescriptorParser::new("  ").is_err());
    }
}
