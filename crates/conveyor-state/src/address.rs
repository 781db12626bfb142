//! State address parsing and traversal.
//!
//! An address is a dot-separated path. Each part may carry bracketed
//! indices: `Pages[3].Body.items[0]`. Numeric dot parts (`items.0`) also
//! index arrays.

use serde_json::{Map, Value};

/// One step of a parsed address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  Key(String),
  Index(usize),
}

/// Parse an address into segments.
///
/// Returns `None` for a blank address or one with an empty part
/// (`"a..b"`, `"[0]"`), since those cannot name a location.
pub fn parse_address(address: &str) -> Option<Vec<Segment>> {
  let address = address.trim();
  if address.is_empty() {
    return None;
  }

  let mut segments = Vec::new();
  for part in address.split('.') {
    let part = part.trim();
    let (key, indices) = match part.find('[') {
      Some(pos) => match parse_indices(&part[pos..]) {
        Some(indices) => (&part[..pos], indices),
        // Not a well-formed index suffix: treat the whole part as a key.
        None => (part, Vec::new()),
      },
      None => (part, Vec::new()),
    };
    if key.is_empty() {
      return None;
    }
    segments.push(Segment::Key(key.to_string()));
    segments.extend(indices.into_iter().map(Segment::Index));
  }

  Some(segments)
}

/// Parse `[1][2]` into `[1, 2]`.
fn parse_indices(mut rest: &str) -> Option<Vec<usize>> {
  let mut indices = Vec::new();
  while !rest.is_empty() {
    let inner = rest.strip_prefix('[')?;
    let close = inner.find(']')?;
    indices.push(inner[..close].trim().parse::<usize>().ok()?);
    rest = &inner[close + 1..];
  }
  Some(indices)
}

/// Walk `segments` from `root`, returning the addressed value if every
/// step exists and traverses a container.
pub fn resolve_in<'a>(root: &'a Map<String, Value>, segments: &[Segment]) -> Option<&'a Value> {
  let (first, rest) = segments.split_first()?;
  let Segment::Key(key) = first else {
    return None;
  };

  resolve_value(root.get(key)?, rest)
}

/// Walk `segments` from an arbitrary JSON value (a parsed response body,
/// an array element, ...).
pub fn resolve_value<'a>(root: &'a Value, segments: &[Segment]) -> Option<&'a Value> {
  let mut current = root;
  for segment in segments {
    current = match (segment, current) {
      (Segment::Key(key), Value::Object(map)) => map.get(key)?,
      (Segment::Key(key), Value::Array(items)) => items.get(key.parse::<usize>().ok()?)?,
      (Segment::Index(index), Value::Array(items)) => items.get(*index)?,
      _ => return None,
    };
  }
  Some(current)
}

/// Write `value` at `segments` under `root`, creating intermediate objects
/// and arrays as needed. Scalars in the way are replaced.
pub fn set_in(root: &mut Map<String, Value>, segments: &[Segment], value: Value) {
  let Some((Segment::Key(key), rest)) = segments.split_first() else {
    return;
  };
  let slot = root.entry(key.clone()).or_insert(Value::Null);
  set_value(slot, rest, value);
}

fn set_value(slot: &mut Value, rest: &[Segment], value: Value) {
  let Some((head, tail)) = rest.split_first() else {
    *slot = value;
    return;
  };

  let index = match head {
    Segment::Index(index) => Some(*index),
    Segment::Key(key) if slot.is_array() => key.parse::<usize>().ok(),
    Segment::Key(_) => None,
  };

  if let Some(index) = index {
    if !slot.is_array() {
      *slot = Value::Array(Vec::new());
    }
    if let Value::Array(items) = slot {
      if items.len() <= index {
        items.resize(index + 1, Value::Null);
      }
      set_value(&mut items[index], tail, value);
    }
  } else if let Segment::Key(key) = head {
    if !slot.is_object() {
      *slot = Value::Object(Map::new());
    }
    if let Value::Object(map) = slot {
      let child = map.entry(key.clone()).or_insert(Value::Null);
      set_value(child, tail, value);
    }
  }
}
