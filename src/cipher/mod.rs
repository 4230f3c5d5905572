use std::collections::HashMap;

use regex::Regex;
use tracing::{debug, warn};

/// Known shapes of how an obfuscated player script invokes its
/// signature-decoding entry function. Checked in order; the first match
/// supplies the entry function name in capture group 1.
const ENTRY_IDIOMS: &[&str] = &[
    r"\b[cs]\s*&&\s*[adf]\.set\([^,]+\s*,\s*encodeURIComponent\s*\(\s*([a-zA-Z0-9$]+)\(",
    r"\b[a-zA-Z0-9]+\s*&&\s*[a-zA-Z0-9]+\.set\([^,]+\s*,\s*encodeURIComponent\s*\(\s*([a-zA-Z0-9$]+)\(",
    r#"\b([a-zA-Z0-9$]{2})\s*=\s*function\(\s*a\s*\)\s*\{\s*a\s*=\s*a\.split\(\s*""\s*\)"#,
    r#"([a-zA-Z0-9$]+)\s*=\s*function\(\s*a\s*\)\s*\{\s*a\s*=\s*a\.split\(\s*""\s*\)"#,
    r#"["']signature["']\s*,\s*([a-zA-Z0-9$]+)\("#,
    r"\.sig\|\|([a-zA-Z0-9$]+)\(",
    r"\b[cs]\s*&&\s*[adf]\.set\([^,]+\s*,\s*([a-zA-Z0-9$]+)\(",
    r"\b[a-zA-Z0-9]+\s*&&\s*[a-zA-Z0-9]+\.set\([^,]+\s*,\s*([a-zA-Z0-9$]+)\(",
    r"\bc\s*&&\s*a\.set\([^,]+\s*,\s*\([^)]*\)\s*\(\s*([a-zA-Z0-9$]+)\(",
    r"\bc\s*&&\s*[a-zA-Z0-9]+\.set\([^,]+\s*,\s*\([^)]*\)\s*\(\s*([a-zA-Z0-9$]+)\(",
];

/// One `<namespace>.<name>(<arg>[, <n>])` call from the entry function
/// body. `argument` is empty when the call carries no numeric argument.
#[derive(Debug, Clone, PartialEq, Eq)]
struct JsCall {
    variable: String,
    name: String,
    argument: String,
}

/// The closed set of transformations the obfuscated scripts are known to
/// compose. The body-shape → operation mapping is static and exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CipherOp {
    Reverse,
    Splice,
    SwapHeadA,
    SwapHeadB,
}

impl CipherOp {
    /// Apply the operation in place. Returns false when the operation is
    /// inapplicable to the current signature (the fold then stops with its
    /// best-effort intermediate).
    fn apply(self, sig: &mut Vec<char>, argument: usize) -> bool {
        let len = sig.len();
        match self {
            CipherOp::Reverse => {
                sig.reverse();
                true
            }
            CipherOp::Splice => {
                sig.drain(..argument.min(len));
                true
            }
            // Writes the swapped head back to the literal index, so the
            // argument must be in range.
            CipherOp::SwapHeadA => {
                if len == 0 || argument >= len {
                    return false;
                }
                let head = sig[0];
                sig[0] = sig[argument % len];
                sig[argument] = head;
                true
            }
            // Re-mods the destination index as well.
            CipherOp::SwapHeadB => {
                if len == 0 {
                    return false;
                }
                let head = sig[0];
                sig[0] = sig[argument % len];
                sig[argument % len] = head;
                true
            }
        }
    }
}

/// Recover the transformation pipeline from an obfuscated player script and
/// apply it to `signature`. Returns `None` when no known entry idiom
/// matches (no transform available, so callers fall back to the
/// un-deciphered url); otherwise returns a best-effort result, partial if a
/// table lookup or an operation fails mid-fold.
pub fn decipher(js: &str, signature: &str) -> Option<String> {
    let entry = initial_function_name(js)?;
    debug!("Cipher entry function: {}", entry);

    let calls = transform_calls(js, &entry);
    if calls.is_empty() {
        debug!("No transform calls found for {}, signature kept as-is", entry);
        return Some(signature.to_string());
    }

    let table = transform_table(js, &calls[0].variable);

    let mut sig: Vec<char> = signature.chars().collect();
    for call in &calls {
        let op = match table.get(&call.name) {
            Some(op) => *op,
            None => {
                warn!(
                    "Transform {} not in operation table, keeping partial signature",
                    call.name
                );
                break;
            }
        };
        let argument = call.argument.parse::<usize>().unwrap_or(0);
        if !op.apply(&mut sig, argument) {
            warn!(
                "Transform {}({}) not applicable, keeping partial signature",
                call.name, argument
            );
            break;
        }
    }

    Some(sig.into_iter().collect())
}

fn initial_function_name(js: &str) -> Option<String> {
    for idiom in ENTRY_IDIOMS {
        let re = match Regex::new(idiom) {
            Ok(re) => re,
            Err(_) => continue,
        };
        if let Some(name) = re.captures(js).and_then(|caps| caps.get(1)) {
            if !name.as_str().is_empty() {
                return Some(name.as_str().to_string());
            }
        }
    }
    None
}

/// Extract the ordered call sequence from the entry function body. Order is
/// preserved exactly: the transformations do not commute.
fn transform_calls(js: &str, entry: &str) -> Vec<JsCall> {
    let pattern = format!(
        r#"{}=function\(\w\)\{{[a-z=.()"]*;(.*);(?:.+)\}}"#,
        regex::escape(entry)
    );
    let body = Regex::new(&pattern)
        .ok()
        .and_then(|re| re.captures(js).map(|caps| caps[1].to_string()));
    let body = match body {
        Some(body) => body,
        None => return Vec::new(),
    };

    let call_re = match Regex::new(r"([\w$]+)\.([\w$]+)\(\w+(?:,(\d+))?\)") {
        Ok(re) => re,
        Err(_) => return Vec::new(),
    };

    body.split(';')
        .filter_map(|statement| {
            let caps = call_re.captures(statement)?;
            Some(JsCall {
                variable: caps[1].to_string(),
                name: caps[2].to_string(),
                argument: caps.get(3).map(|m| m.as_str().to_string()).unwrap_or_default(),
            })
        })
        .collect()
}

/// Locate the namespace object literal and classify each member function
/// body against the four known operation shapes. Unrecognized bodies map to
/// no operation.
fn transform_table(js: &str, variable: &str) -> HashMap<String, CipherOp> {
    let classifiers: &[(&str, CipherOp)] = &[
        (r"\{\w\.reverse\(\)\}", CipherOp::Reverse),
        (r"\{\w\.splice\(0,\w\)\}", CipherOp::Splice),
        (
            r"\{var\s\w=\w\[0\];\w\[0\]=\w\[\w%\w\.length\];\w\[\w\]=\w\}",
            CipherOp::SwapHeadA,
        ),
        (
            r"\{var\s\w=\w\[0\];\w\[0\]=\w\[\w%\w\.length\];\w\[\w%\w\.length\]=\w\}",
            CipherOp::SwapHeadB,
        ),
    ];

    let mut table = HashMap::new();
    let object_body = match transform_object(js, variable) {
        Some(body) => body,
        None => return table,
    };

    let entry_re = match Regex::new(r"([\w$]+):function\([^)]*\)\{[^{}]*\}") {
        Ok(re) => re,
        Err(_) => return table,
    };

    for caps in entry_re.captures_iter(&object_body) {
        let name = caps[1].to_string();
        let snippet = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
        for (pattern, op) in classifiers {
            if Regex::new(pattern).map(|re| re.is_match(snippet)).unwrap_or(false) {
                table.insert(name, *op);
                break;
            }
        }
    }

    table
}

fn transform_object(js: &str, variable: &str) -> Option<String> {
    let escaped = regex::escape(variable);

    let strict = Regex::new(&format!(r"(?s)var {escaped}=\{{(.*?)\}};"))
        .ok()
        .and_then(|re| re.captures(js).map(|caps| caps[1].to_string()));
    if strict.is_some() {
        return strict;
    }

    // Some scripts omit the trailing semicolon after the object literal.
    Regex::new(&format!(r"(?s)var {escaped}=\{{(.*)\}}"))
        .ok()
        .and_then(|re| re.captures(js).map(|caps| caps[1].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROUND_TRIP_JS: &str = concat!(
        r#"XY=function(a){a=a.split("");XY.aa(a,3);XY.bb(a);return a.join("")}"#,
        "\n",
        r#"var XY={aa:function(a,b){a.splice(0,b)},bb:function(a){a.reverse()}}"#,
    );

    #[test]
    fn test_round_trip_splice_then_reverse() {
        assert_eq!(decipher(ROUND_TRIP_JS, "abcdef"), Some("fed".to_string()));
    }

    #[test]
    fn test_entry_name_extraction() {
        assert_eq!(initial_function_name(ROUND_TRIP_JS), Some("XY".to_string()));
        assert_eq!(initial_function_name("function nothing(){}"), None);
    }

    #[test]
    fn test_transform_calls_preserve_order_and_optional_argument() {
        let calls = transform_calls(ROUND_TRIP_JS, "XY");
        assert_eq!(
            calls,
            vec![
                JsCall {
                    variable: "XY".to_string(),
                    name: "aa".to_string(),
                    argument: "3".to_string(),
                },
                JsCall {
                    variable: "XY".to_string(),
                    name: "bb".to_string(),
                    argument: String::new(),
                },
            ]
        );
    }

    #[test]
    fn test_operation_table_classification() {
        let js = concat!(
            "var vd={rv:function(a){a.reverse()},",
            "sp:function(a,b){a.splice(0,b)},",
            "s1:function(a,b){var c=a[0];a[0]=a[b%a.length];a[b]=c},",
            "s2:function(a,b){var c=a[0];a[0]=a[b%a.length];a[b%a.length]=c},",
            "xx:function(a){a.push(0)}};",
        );
        let table = transform_table(js, "vd");
        assert_eq!(table.get("rv"), Some(&CipherOp::Reverse));
        assert_eq!(table.get("sp"), Some(&CipherOp::Splice));
        assert_eq!(table.get("s1"), Some(&CipherOp::SwapHeadA));
        assert_eq!(table.get("s2"), Some(&CipherOp::SwapHeadB));
        assert_eq!(table.get("xx"), None);
    }

    #[test]
    fn test_swap_variants_diverge_past_signature_end() {
        // With argument 5 on a 3-char signature the destination indices
        // diverge: variant A targets the literal index 5 and cannot apply,
        // variant B re-mods it to 2 and swaps.
        let mut a = vec!['a', 'b', 'c'];
        assert!(!CipherOp::SwapHeadA.apply(&mut a, 5));
        assert_eq!(a, vec!['a', 'b', 'c']);

        let mut b = vec!['a', 'b', 'c'];
        assert!(CipherOp::SwapHeadB.apply(&mut b, 5));
        assert_eq!(b, vec!['c', 'b', 'a']);
    }

    #[test]
    fn test_swap_variants_agree_in_range() {
        let mut a = vec!['a', 'b', 'c'];
        let mut b = vec!['a', 'b', 'c'];
        assert!(CipherOp::SwapHeadA.apply(&mut a, 2));
        assert!(CipherOp::SwapHeadB.apply(&mut b, 2));
        assert_eq!(a, b);
    }

    #[test]
    fn test_splice_past_end_empties_signature() {
        let mut sig = vec!['a', 'b', 'c'];
        assert!(CipherOp::Splice.apply(&mut sig, 10));
        assert!(sig.is_empty());
    }

    #[test]
    fn test_missing_table_entry_yields_partial() {
        let js = concat!(
            r#"XY=function(a){a=a.split("");XY.bb(a);XY.zz(a,2);return a.join("")}"#,
            "\n",
            r#"var XY={bb:function(a){a.reverse()}};"#,
        );
        // bb applies, zz is unknown: the fold stops after the reverse.
        assert_eq!(decipher(js, "abc"), Some("cba".to_string()));
    }

    #[test]
    fn test_unknown_idiom_returns_none() {
        assert_eq!(decipher("var a=1;", "abc"), None);
    }

    #[test]
    fn test_empty_signature_survives() {
        assert_eq!(decipher(ROUND_TRIP_JS, ""), Some(String::new()));
    }
}
