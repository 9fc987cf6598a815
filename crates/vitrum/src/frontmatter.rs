//! YAML front-matter machinery.
//!
//! Markdown notes may open with a `---`-delimited YAML block. This module
//! owns everything raw about that block so the parser and the sync service
//! agree on byte boundaries:
//!
//! - splitting a file into front-matter and body
//! - parsing the block into a [`serde_yaml`] mapping (arbitrary value shapes)
//! - emitting a mapping back to YAML for adoption and inbox writes
//! - the field-level updater used by the sync service, which rewrites single
//!   keys inside the `federation:` sub-block without touching sibling keys,
//!   key order, or the body
//! - body checksums in the `sha256:<hex>` wire form

use serde_yaml::{Mapping, Value};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// A file split into its front-matter block and body.
///
/// `front_matter` is the raw text between the `---` fences (fences excluded),
/// `None` when the file has no front-matter. `body` is everything after the
/// closing fence, with the single newline that follows it stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split<'a> {
    /// Raw YAML between the fences, fences excluded
    pub front_matter: Option<&'a str>,
    /// Document body after the closing fence
    pub body: &'a str,
}

/// Split raw file content into front-matter and body.
///
/// The front-matter block must start at byte 0 with a line that is exactly
/// `---` and ends at the next such line. Anything else is all body.
pub fn split(content: &str) -> Split<'_> {
    let Some(rest) = content.strip_prefix("---\n").or_else(|| content.strip_prefix("---\r\n"))
    else {
        return Split { front_matter: None, body: content };
    };

    // Closing fence: a line that is exactly "---", scanned at line boundaries
    // so a "---" inside a YAML value does not terminate the block early.
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == "---" {
            let fm = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Split { front_matter: Some(fm), body };
        }
        offset += line.len();
    }

    // Unterminated fence: treat the whole file as body, like a plain note.
    Split { front_matter: None, body: content }
}

/// Parse a front-matter block into a YAML mapping.
///
/// An empty or whitespace-only block yields an empty mapping. A block that
/// parses to a non-mapping value (e.g. a bare scalar) is malformed.
pub fn parse_mapping(block: &str) -> Result<Mapping> {
    if block.trim().is_empty() {
        return Ok(Mapping::new());
    }
    match serde_yaml::from_str::<Value>(block) {
        Ok(Value::Mapping(map)) => Ok(map),
        Ok(Value::Null) => Ok(Mapping::new()),
        Ok(other) => Err(Error::parse(format!(
            "front-matter is not a mapping (found {})",
            value_kind(&other)
        ))),
        Err(e) => Err(Error::parse(format!("malformed front-matter: {e}"))),
    }
}

/// Emit a mapping as a fenced front-matter block, trailing newline included.
pub fn render(map: &Mapping) -> Result<String> {
    if map.is_empty() {
        return Ok(String::new());
    }
    let yaml = serde_yaml::to_string(map)
        .map_err(|e| Error::internal(format!("front-matter emit failed: {e}")))?;
    Ok(format!("---\n{yaml}---\n"))
}

/// Compute the body checksum in wire form: `sha256:<hex>`.
///
/// The checksum covers raw body bytes only, never the front-matter block, so
/// metadata updates do not register as divergence.
#[must_use]
pub fn checksum(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    format!("sha256:{:x}", hasher.finalize())
}

/// Rewrite selected keys inside the `federation:` sub-block in place.
///
/// Operates line by line on the front-matter block: keys outside the
/// federation block, unrelated federation keys, key order, quoting of
/// untouched lines, and the body all pass through byte-identical. Returns
/// `None` when the content has no front-matter or no federation block.
pub fn update_federation_fields(content: &str, updates: &[(&str, &str)]) -> Option<String> {
    let parts = split(content);
    let fm = parts.front_matter?;
    if !fm.lines().any(|l| l.trim_end() == "federation:") {
        return None;
    }

    let mut out = String::with_capacity(content.len());
    out.push_str("---\n");

    let mut in_federation = false;
    for line in fm.lines() {
        if line.trim_end() == "federation:" {
            in_federation = true;
            out.push_str(line);
            out.push('\n');
            continue;
        }

        if in_federation {
            // The block ends at the first non-indented, non-empty line.
            let indented = line.starts_with(' ') || line.starts_with('\t');
            if !indented && !line.trim().is_empty() {
                in_federation = false;
            }
        }

        if in_federation {
            if let Some((key, indent)) = federation_line_key(line) {
                if let Some((_, value)) = updates.iter().find(|(k, _)| *k == key) {
                    out.push_str(&format!("{indent}{key}: '{}'\n", value.replace('\'', "''")));
                    continue;
                }
            }
        }

        out.push_str(line);
        out.push('\n');
    }

    out.push_str("---\n");
    out.push_str(parts.body);
    Some(out)
}

/// Extract the key and indentation of an indented `key: value` line.
fn federation_line_key(line: &str) -> Option<(&str, &str)> {
    let trimmed = line.trim_start();
    let indent = &line[..line.len() - trimmed.len()];
    if indent.is_empty() {
        return None;
    }
    let colon = trimmed.find(':')?;
    Some((trimmed[..colon].trim(), indent))
}

/// Convert a YAML value tree into a JSON value tree.
///
/// Front-matter travels over the wire as JSON; non-string mapping keys are
/// stringified rather than rejected so odd-but-valid YAML survives.
pub fn yaml_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                serde_json::Value::from(i)
            } else if let Some(u) = n.as_u64() {
                serde_json::Value::from(u)
            } else {
                n.as_f64().map_or(serde_json::Value::Null, serde_json::Value::from)
            }
        }
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Sequence(seq) => serde_json::Value::Array(seq.iter().map(yaml_to_json).collect()),
        Value::Mapping(map) => {
            let mut obj = serde_json::Map::new();
            for (k, v) in map {
                let key = match k {
                    Value::String(s) => s.clone(),
                    other => serde_yaml::to_string(other)
                        .map(|s| s.trim_end().to_string())
                        .unwrap_or_default(),
                };
                obj.insert(key, yaml_to_json(v));
            }
            serde_json::Value::Object(obj)
        }
        Value::Tagged(tagged) => yaml_to_json(&tagged.value),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "---\ntitle: Test\ntags: [a, b]\n---\n# Body\n";

    #[test]
    fn test_split_with_front_matter() {
        let parts = split(DOC);
        assert_eq!(parts.front_matter, Some("title: Test\ntags: [a, b]\n"));
        assert_eq!(parts.body, "# Body\n");
    }

    #[test]
    fn test_split_without_front_matter() {
        let parts = split("# Just a heading\n");
        assert_eq!(parts.front_matter, None);
        assert_eq!(parts.body, "# Just a heading\n");
    }

    #[test]
    fn test_split_unterminated_fence() {
        let content = "---\ntitle: Broken\nno closing fence";
        let parts = split(content);
        assert_eq!(parts.front_matter, None);
        assert_eq!(parts.body, content);
    }

    #[test]
    fn test_split_dashes_inside_value() {
        let content = "---\nnote: a --- b\n---\nbody";
        let parts = split(content);
        assert_eq!(parts.front_matter, Some("note: a --- b\n"));
        assert_eq!(parts.body, "body");
    }

    #[test]
    fn test_parse_mapping_shapes() {
        let map = parse_mapping("title: Test\nnested:\n  deep: [1, 2]\n").unwrap();
        assert_eq!(map.len(), 2);
        assert!(map.contains_key(Value::from("nested")));

        assert!(parse_mapping("").unwrap().is_empty());
        assert!(parse_mapping("- just\n- a list\n").is_err());
    }

    #[test]
    fn test_render_round_trip() {
        let map = parse_mapping("title: Test\ntags:\n- a\n- b\n").unwrap();
        let rendered = render(&map).unwrap();
        let reparsed = parse_mapping(split(&rendered).front_matter.unwrap()).unwrap();
        assert_eq!(map, reparsed);
    }

    #[test]
    fn test_checksum_wire_form() {
        // sha256("hello")
        assert_eq!(
            checksum("hello"),
            "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    const FED_DOC: &str = "---\ntitle: Adopted\nfederation:\n  origin-peer: 'p-1'\n  sync-status: 'synced'\n  local-checksum: 'sha256:aaa'\nstatus: active\n---\nbody text\n";

    #[test]
    fn test_update_federation_fields() {
        let updated =
            update_federation_fields(FED_DOC, &[("sync-status", "local-modified")]).unwrap();
        assert!(updated.contains("sync-status: 'local-modified'"));
        // Siblings, order, and body untouched
        assert!(updated.contains("origin-peer: 'p-1'"));
        assert!(updated.contains("local-checksum: 'sha256:aaa'"));
        assert!(updated.contains("title: Adopted"));
        assert!(updated.contains("status: active"));
        assert!(updated.ends_with("body text\n"));
    }

    #[test]
    fn test_update_stops_at_block_end() {
        // A top-level `status` key after the federation block must not be
        // mistaken for a federation field.
        let updated = update_federation_fields(FED_DOC, &[("status", "hijacked")]).unwrap();
        assert!(updated.contains("status: active"));
        assert!(!updated.contains("hijacked"));
    }

    #[test]
    fn test_update_without_federation_block() {
        assert!(update_federation_fields(DOC, &[("sync-status", "synced")]).is_none());
    }

    #[test]
    fn test_update_escapes_quotes() {
        let updated = update_federation_fields(FED_DOC, &[("origin-peer", "o'brien")]).unwrap();
        assert!(updated.contains("origin-peer: 'o''brien'"));
    }
}
