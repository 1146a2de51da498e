//! Terse text codec.
//!
//! Messages are JSON arrays written without their outer brackets, and object
//! keys made only of `[A-Za-z0-9_]` are written bare (`{x:1}` instead of
//! `{"x":1}`). Decoding re-quotes bare keys, leaving string contents alone,
//! and re-wraps the brackets.

use serde_json::Value;

use crate::error::ProtocolError;

/// Returns true if `key` can be written without quotes.
pub fn is_bare_key(key: &str) -> bool {
    !key.is_empty() && key.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Writes a single value in terse form.
pub fn encode_value(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

/// Writes the elements of a top-level message array, without brackets.
pub fn encode_frame(elements: &[Value]) -> String {
    let mut out = String::new();
    for (i, v) in elements.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_value(v, &mut out);
    }
    out
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, v) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(v, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push('{');
            for (i, (k, v)) in map.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                if is_bare_key(k) {
                    out.push_str(k);
                } else {
                    // Display on a string value yields a quoted, escaped literal.
                    out.push_str(&Value::String(k.clone()).to_string());
                }
                out.push(':');
                write_value(v, out);
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Quotes every bare object key outside of string literals.
pub fn requote_bare_keys(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 16);
    let mut i = 0;
    let mut in_string = false;
    let mut escaped = false;

    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        if c == '"' {
            in_string = true;
            out.push(c);
            i += 1;
            continue;
        }

        if c.is_ascii_alphanumeric() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let mut j = i;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            let token: String = chars[start..i].iter().collect();
            if j < chars.len() && chars[j] == ':' {
                out.push('"');
                out.push_str(&token);
                out.push('"');
            } else {
                out.push_str(&token);
            }
            continue;
        }

        out.push(c);
        i += 1;
    }
    out
}

/// Parses a single terse value.
pub fn decode_value(input: &str) -> Result<Value, ProtocolError> {
    if input.trim().is_empty() {
        return Err(ProtocolError::Empty);
    }
    Ok(serde_json::from_str(&requote_bare_keys(input))?)
}

/// Parses a bracketless message frame into its elements.
pub fn decode_frame(input: &str) -> Result<Vec<Value>, ProtocolError> {
    if input.trim().is_empty() {
        return Err(ProtocolError::Empty);
    }
    let wrapped = format!("[{}]", requote_bare_keys(input));
    Ok(serde_json::from_str(&wrapped)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_keys_are_written_unquoted() {
        let v = json!({"hp": 3, "name": "a:b", "two words": true});
        let s = encode_value(&v);
        assert!(s.contains("hp:3"));
        assert!(s.contains("\"two words\":true"));
        assert!(s.contains("name:\"a:b\""));
    }

    #[test]
    fn frame_has_no_outer_brackets() {
        let s = encode_frame(&[json!(2), json!({"score": 10})]);
        assert_eq!(s, "2,{score:10}");
    }

    #[test]
    fn requote_leaves_string_contents_alone() {
        let raw = r#"{k:"x: \"y\" z:",n:{a_1 : 2}}"#;
        let v = decode_value(raw).unwrap();
        assert_eq!(v, json!({"k": "x: \"y\" z:", "n": {"a_1": 2}}));
    }

    #[test]
    fn decode_accepts_quoted_keys_too() {
        let v = decode_value(r#"{"up":true,left:false}"#).unwrap();
        assert_eq!(v, json!({"up": true, "left": false}));
    }

    #[test]
    fn frame_roundtrip_keeps_keys_and_numbers() {
        let elements = vec![json!(6), json!([[3, 1.25, -4.5, 0.0, 2.75], {"hp": 7}])];
        let back = decode_frame(&encode_frame(&elements)).unwrap();
        assert_eq!(back, elements);
    }

    #[test]
    fn garbage_is_a_syntax_error() {
        assert!(matches!(decode_frame("1,[[2,"), Err(ProtocolError::Syntax(_))));
        assert!(matches!(decode_value("   "), Err(ProtocolError::Empty)));
    }
}
