//! `{Address}` placeholder expansion.

use std::sync::LazyLock;

use conveyor_state::ExecutionContext;
use regex::{Captures, Regex};
use serde_json::Value;

use crate::params::scalar_text;

static PLACEHOLDER: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"\{([^{}]+)\}").expect("placeholder pattern is valid"));

/// Result of expanding a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expansion {
  pub text: String,
  /// Placeholders left in place because their address did not resolve.
  pub unresolved: Vec<String>,
}

/// Replace every `{Address}` with the value resolved from `ctx`.
///
/// Unresolved placeholders stay in the text verbatim.
pub fn expand(template: &str, ctx: &ExecutionContext) -> Expansion {
  expand_with(template, |name| ctx.resolve(name).map(scalar_text))
}

/// Like [`expand`] with an arbitrary lookup.
pub fn expand_with(template: &str, mut lookup: impl FnMut(&str) -> Option<String>) -> Expansion {
  let mut unresolved = Vec::new();
  let text = PLACEHOLDER
    .replace_all(template, |caps: &Captures| {
      let name = caps[1].trim();
      match lookup(name) {
        Some(value) => value,
        None => {
          unresolved.push(name.to_string());
          caps[0].to_string()
        }
      }
    })
    .into_owned();
  Expansion { text, unresolved }
}

/// Expand `template` from `ctx`, appending one warning per unresolved
/// placeholder to `log`.
pub(crate) fn expand_logged(template: &str, ctx: &ExecutionContext, log: &mut Vec<String>) -> String {
  let expansion = expand(template, ctx);
  for name in &expansion.unresolved {
    tracing::warn!(placeholder = %name, "unresolved_placeholder");
    log.push(format!("Warning: placeholder '{{{}}}' did not resolve", name));
  }
  expansion.text
}

/// Apply `lookup` to every string inside `value`, recursively.
///
/// A string that consists of exactly one placeholder is replaced by the
/// raw lookup value, so `"{PageStart}"` can become the number `40`.
pub(crate) fn expand_value(value: &Value, lookup: &impl Fn(&str) -> Option<Value>) -> Value {
  match value {
    Value::String(s) => {
      if let Some(caps) = PLACEHOLDER.captures(s)
        && caps[0].len() == s.len()
        && let Some(whole) = lookup(caps[1].trim())
      {
        return whole;
      }
      let expansion = expand_with(s, |name| lookup(name).map(|v| scalar_text(&v)));
      Value::String(expansion.text)
    }
    Value::Array(items) => Value::Array(items.iter().map(|v| expand_value(v, lookup)).collect()),
    Value::Object(map) => Value::Object(
      map
        .iter()
        .map(|(k, v)| (k.clone(), expand_value(v, lookup)))
        .collect(),
    ),
    other => other.clone(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn ctx() -> ExecutionContext {
    let mut ctx = ExecutionContext::new();
    ctx.set("Region", json!("eu-west"));
    ctx.set("Report.Count", json!(42));
    ctx
  }

  #[test]
  fn test_expand_resolves_addresses() {
    let expansion = expand("https://{Region}.example/reports?n={Report.Count}", &ctx());
    assert_eq!(expansion.text, "https://eu-west.example/reports?n=42");
    assert!(expansion.unresolved.is_empty());
  }

  #[test]
  fn test_unresolved_left_in_place() {
    let mut log = Vec::new();
    let text = expand_logged("Hello {Name}, from {Region}", &ctx(), &mut log);
    assert_eq!(text, "Hello {Name}, from eu-west");
    assert_eq!(log.len(), 1);
    assert!(log[0].contains("{Name}"));
  }

  #[test]
  fn test_json_braces_are_not_placeholders() {
    let expansion = expand(r#"{"a": {}}"#, &ctx());
    assert_eq!(expansion.text, r#"{"a": {}}"#);
  }

  #[test]
  fn test_expand_value_whole_placeholder_keeps_type() {
    let lookup = |name: &str| match name {
      "PageStart" => Some(json!(40)),
      "PageSize" => Some(json!(20)),
      _ => None,
    };
    let template = json!({
      "Query": {"offset": "{PageStart}", "limit": "{PageSize}"},
      "URL": "http://x/items?start={PageStart}",
      "Keep": "{Other}",
    });
    assert_eq!(
      expand_value(&template, &lookup),
      json!({
        "Query": {"offset": 40, "limit": 20},
        "URL": "http://x/items?start=40",
        "Keep": "{Other}",
      })
    );
  }
}
