// src/extract/scan.rs

//! Fallbacks for model output that is not a clean JSON object: JSON repair
//! and line-by-line `key: value` scanning.

use regex::Regex;
use std::sync::LazyLock;

use crate::schema::normalize_key;

static PAIR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^["']?([A-Za-z][A-Za-z0-9 _./#()\-]{0,60}?)["']?\s*[:=]\s*(.*?)\s*,?\s*$"#)
        .expect("pair pattern compiles")
});

/// Scan `key: value` / `key = value` lines. Keys are normalized; the first
/// occurrence of a key wins.
pub fn scan_pairs(text: &str) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = Vec::new();

    for line in text.lines() {
        // Markdown decoration: "- **Total:** 115.00"
        let line = line
            .trim()
            .trim_start_matches(['-', '*', '#', '>', '•'])
            .replace("**", "")
            .replace("__", "");
        let Some(cap) = PAIR_RE.captures(line.trim()) else {
            continue;
        };

        let key = normalize_key(&cap[1]);
        let value = cap[2].trim().trim_matches(['"', '\'', '`']).trim();
        if key.is_empty() || value.is_empty() || value == "{" || value == "[" {
            continue;
        }
        if pairs.iter().any(|(k, _)| *k == key) {
            continue;
        }
        pairs.push((key, value.to_string()));
    }

    pairs
}

/// Repair the mistakes models commonly make in almost-JSON: single-quoted
/// strings, bare keys, Python literals, trailing commas.
pub fn repair_json(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len() + 16);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' | '\'' => {
                let (literal, next) = read_string(&chars, i);
                out.push_str(&literal);
                i = next;
            }
            ',' => {
                let next = next_significant(&chars, i + 1);
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(',');
                }
                i += 1;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                if next_significant(&chars, i) == Some(':') {
                    out.push('"');
                    out.push_str(&word);
                    out.push('"');
                } else {
                    out.push_str(match word.as_str() {
                        "None" | "NULL" | "Null" => "null",
                        "True" => "true",
                        "False" => "false",
                        other => other,
                    });
                }
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

fn next_significant(chars: &[char], from: usize) -> Option<char> {
    chars[from.min(chars.len())..]
        .iter()
        .copied()
        .find(|c| !c.is_whitespace())
}

/// Read a string literal starting at `start` and re-emit it double-quoted.
/// Returns the literal and the index after the closing quote.
fn read_string(chars: &[char], start: usize) -> (String, usize) {
    let quote = chars[start];
    let mut out = String::from('"');
    let mut i = start + 1;

    while i < chars.len() {
        let c = chars[i];
        if c == '\\' && i + 1 < chars.len() {
            let escaped = chars[i + 1];
            if quote == '\'' && escaped == '\'' {
                out.push('\'');
            } else {
                out.push('\\');
                out.push(escaped);
            }
            i += 2;
            continue;
        }
        if c == quote {
            out.push('"');
            return (out, i + 1);
        }
        if c == '"' {
            out.push_str("\\\"");
        } else if c == '\n' {
            out.push_str("\\n");
        } else {
            out.push(c);
        }
        i += 1;
    }

    // Unterminated: close it so the parser reports the real problem.
    out.push('"');
    (out, i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_pairs_plain_lines() {
        let text = "Invoice No.: INV-100\nSubtotal: 1,234.50\nTax = 10.00\nnotes without pairs\n";
        let pairs = scan_pairs(text);
        assert_eq!(
            pairs,
            vec![
                ("invoice_no".to_string(), "INV-100".to_string()),
                ("subtotal".to_string(), "1,234.50".to_string()),
                ("tax".to_string(), "10.00".to_string()),
            ]
        );
    }

    #[test]
    fn test_scan_pairs_markdown_and_broken_json() {
        let text = r#"Here is the data:
- **Invoice number:** INV-7
{
  "total": "115.00",
  "total": 999
  "invoice_date": '2024-01-31'
"#;
        let pairs = scan_pairs(text);
        assert!(pairs.contains(&("invoice_number".into(), "INV-7".into())));
        assert!(pairs.contains(&("total".into(), "115.00".into())));
        assert!(pairs.contains(&("invoice_date".into(), "2024-01-31".into())));
        assert_eq!(pairs.iter().filter(|(k, _)| k == "total").count(), 1);
    }

    #[test]
    fn test_scan_keeps_time_in_value() {
        let pairs = scan_pairs("Issued at: 10:30 on 2024-01-31");
        assert_eq!(pairs[0].1, "10:30 on 2024-01-31");
    }

    #[test]
    fn test_repair_trailing_commas_and_literals() {
        let repaired = repair_json(r#"{"a": None, "b": True, "c": [1, 2,], }"#);
        let value: serde_json::Value = serde_json::from_str(&repaired).unwrap();
        assert!(value["a"].is_null());
        assert_eq!(value["b"], true);
        assert_eq!(value["c"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_repair_single_quotes_and_bare_keys() {
        let repaired = repair_json(r#"{invoice_number: 'INV-"9"', 'note': 'it\'s fine'}"#);
        let value: serde_json::Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value["invoice_number"], "INV-\"9\"");
        assert_eq!(value["note"], "it's fine");
    }

    #[test]
    fn test_repair_leaves_valid_json_alone() {
        let src = r#"{"total": 10.5, "ok": true, "name": "None of it"}"#;
        assert_eq!(repair_json(src), src);
    }
}
