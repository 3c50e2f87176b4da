//! Near-JSON repair.
//!
//! Agent output often carries single-quoted strings, bare object keys and
//! trailing commas. This walks the text once, tracking string and container
//! boundaries, so that only real key positions are quoted and string contents
//! are never rewritten.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    Object,
    Array,
}

pub(crate) fn repair_json(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 16);
    let mut stack: Vec<Frame> = Vec::new();
    let mut expect_key = false;
    let mut i = 0usize;

    while i < chars.len() {
        let ch = chars[i];
        match ch {
            '"' | '\'' => {
                i = copy_string(&chars, i, &mut out);
                expect_key = false;
                continue;
            }
            '{' => {
                stack.push(Frame::Object);
                expect_key = true;
                out.push(ch);
            }
            '[' => {
                stack.push(Frame::Array);
                expect_key = false;
                out.push(ch);
            }
            '}' | ']' => {
                stack.pop();
                strip_trailing_comma(&mut out);
                expect_key = false;
                out.push(ch);
            }
            ',' => {
                expect_key = stack.last() == Some(&Frame::Object);
                out.push(ch);
            }
            c if expect_key && is_ident_start(c) => {
                let start = i;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                out.push('"');
                out.extend(&chars[start..i]);
                out.push('"');
                expect_key = false;
                continue;
            }
            c => {
                if !c.is_whitespace() {
                    expect_key = false;
                }
                out.push(c);
            }
        }
        i += 1;
    }

    out
}

/// Copies a quoted string starting at `chars[start]` as a JSON string and
/// returns the index just past its closing quote.
fn copy_string(chars: &[char], start: usize, out: &mut String) -> usize {
    let quote = chars[start];
    out.push('"');
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => {
                match chars.get(i + 1) {
                    // JSON has no \' escape.
                    Some('\'') => out.push('\''),
                    Some(next) => {
                        out.push('\\');
                        out.push(*next);
                    }
                    None => out.push_str("\\\\"),
                }
                i += 2;
                continue;
            }
            c if c == quote => {
                out.push('"');
                return i + 1;
            }
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
        i += 1;
    }
    // Unterminated: leave it open so the JSON parser reports it.
    chars.len()
}

fn strip_trailing_comma(out: &mut String) {
    let trimmed = out.trim_end().len();
    if out[..trimmed].ends_with(',') {
        out.remove(trimmed - 1);
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '$' | '-')
}

/// Byte index just past the bracket that closes the one at `open`, skipping
/// brackets inside quoted strings.
pub(crate) fn balanced_end(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (offset, c) in text[open..].char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '[' | '{' => depth += 1,
            ']' | '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(open + offset + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> serde_json::Value {
        serde_json::from_str(&repair_json(input)).unwrap()
    }

    #[test]
    fn strict_json_passes_through() {
        let input = r#"{"a": [1, 2, {"b": "c"}], "d": null}"#;
        assert_eq!(repair_json(input), input);
    }

    #[test]
    fn quotes_bare_keys_and_single_quoted_strings() {
        let value = parse("{send_response_function: [{'method':'GET','url':'http://x/a'}]}");
        assert_eq!(
            value,
            serde_json::json!({
                "send_response_function": [{"method": "GET", "url": "http://x/a"}]
            })
        );
    }

    #[test]
    fn colon_inside_value_is_not_treated_as_key() {
        let value = parse("{url: 'http://host:8080/path?q=a:b'}");
        assert_eq!(value["url"], "http://host:8080/path?q=a:b");
    }

    #[test]
    fn apostrophe_inside_double_quoted_string_survives() {
        let value = parse(r#"{body: "it's fine"}"#);
        assert_eq!(value["body"], "it's fine");
    }

    #[test]
    fn double_quote_inside_single_quoted_string_is_escaped() {
        let value = parse(r#"{body: '{"k": "v"}'}"#);
        assert_eq!(value["body"], r#"{"k": "v"}"#);
    }

    #[test]
    fn escaped_single_quote_becomes_plain_apostrophe() {
        let value = parse(r"{note: 'don\'t'}");
        assert_eq!(value["note"], "don't");
    }

    #[test]
    fn hyphenated_header_keys_are_quoted() {
        let value = parse("{headers: {Content-Type: 'application/json', X-Trace_Id: '1'}}");
        assert_eq!(value["headers"]["Content-Type"], "application/json");
        assert_eq!(value["headers"]["X-Trace_Id"], "1");
    }

    #[test]
    fn trailing_commas_are_dropped() {
        let value = parse("{a: [1, 2, ], b: {c: 3, }, }");
        assert_eq!(value, serde_json::json!({"a": [1, 2], "b": {"c": 3}}));
    }

    #[test]
    fn literals_in_value_position_are_untouched() {
        let value = parse("{a: true, b: false, c: null, d: 1.5}");
        assert_eq!(value, serde_json::json!({"a": true, "b": false, "c": null, "d": 1.5}));
    }

    #[test]
    fn raw_newlines_in_strings_are_escaped() {
        let value = parse("{body: 'line1\nline2'}");
        assert_eq!(value["body"], "line1\nline2");
    }

    #[test]
    fn unterminated_string_stays_invalid() {
        assert!(serde_json::from_str::<serde_json::Value>(&repair_json("{a: 'oops}")).is_err());
    }

    #[test]
    fn balanced_end_skips_nested_and_quoted_brackets() {
        let text = "x: [{'a': ']'}, [1, [2]]] tail";
        let open = text.find('[').unwrap();
        let end = balanced_end(text, open).unwrap();
        assert_eq!(&text[open..end], "[{'a': ']'}, [1, [2]]]");
    }

    #[test]
    fn balanced_end_none_when_unclosed() {
        assert_eq!(balanced_end("[1, [2]", 0), None);
    }
}
