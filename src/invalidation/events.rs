use crate::store::escape_glob;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(String),
}

/// A key pattern with `{field}` placeholders, e.g. `user:{user_id}:*`.
///
/// Fields are looked up in the event payload by dot path (`{order.id}`).
/// Patterns containing `*` or `?` outside placeholders are wildcards and
/// resolved by scanning the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl KeyTemplate {
    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let mut segments = Vec::new();
        let mut rest = raw.as_str();
        while let Some(open) = rest.find('{') {
            let Some(len) = rest[open..].find('}') else {
                break;
            };
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            segments.push(Segment::Field(rest[open + 1..open + len].trim().to_string()));
            rest = &rest[open + len + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }
        Self { raw, segments }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_wildcard(&self) -> bool {
        self.segments.iter().any(|s| match s {
            Segment::Literal(text) => text.contains(['*', '?']),
            Segment::Field(_) => false,
        })
    }

    /// Interpolate `data`. `None` when a referenced field is missing, null or
    /// not a scalar.
    ///
    /// In wildcard templates the interpolated values are glob-escaped, so only
    /// the template's own `*` and `?` widen the match.
    pub fn render(&self, data: &Value) -> Option<String> {
        let wildcard = self.is_wildcard();
        let mut out = String::with_capacity(self.raw.len());
        for segment in &self.segments {
            let value = match segment {
                Segment::Literal(text) => {
                    out.push_str(text);
                    continue;
                }
                Segment::Field(path) => match lookup(data, path)? {
                    Value::String(s) => s.clone(),
                    v @ (Value::Number(_) | Value::Bool(_)) => v.to_string(),
                    _ => return None,
                },
            };
            if wildcard {
                out.push_str(&escape_glob(&value));
            } else {
                out.push_str(&value);
            }
        }
        Some(out)
    }
}

fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    path.split('.').try_fold(data, |current, part| match current {
        Value::Object(map) => map.get(part),
        Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Event name → key templates to invalidate when the event fires.
#[derive(Debug, Default)]
pub struct EventRegistry {
    events: RwLock<HashMap<String, Vec<KeyTemplate>>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add templates to `event`. Registering the same template twice is a no-op.
    pub fn register<I, S>(&self, event: &str, templates: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut events = self
            .events
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let list = events.entry(event.to_string()).or_default();
        for raw in templates {
            let template = KeyTemplate::parse(raw);
            if !list.contains(&template) {
                list.push(template);
            }
        }
    }

    pub fn templates(&self, event: &str) -> Vec<KeyTemplate> {
        self.events
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(event)
            .cloned()
            .unwrap_or_default()
    }

    /// Rendered key patterns for `event`, as `(pattern, is_wildcard)`.
    /// Templates whose fields are missing from `data` are skipped.
    pub fn resolve(&self, event: &str, data: &Value) -> Vec<(String, bool)> {
        self.templates(event)
            .into_iter()
            .filter_map(|template| match template.render(data) {
                Some(key) => Some((key, template.is_wildcard())),
                None => {
                    warn!(
                        event,
                        template = template.as_str(),
                        "event data lacks a field used by the key template, skipping"
                    );
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_scalars_and_paths() {
        let t = KeyTemplate::parse("user:{user_id}:orders:{order.id}");
        let data = json!({"user_id": "u1", "order": {"id": 42}});
        assert_eq!(t.render(&data).as_deref(), Some("user:u1:orders:42"));
        assert!(!t.is_wildcard());
        assert_eq!(t.render(&json!({"user_id": "u1"})), None);
        assert_eq!(t.render(&json!({"user_id": null, "order": {"id": 1}})), None);
    }

    #[test]
    fn test_wildcards_and_literals() {
        assert!(KeyTemplate::parse("user:{id}:*").is_wildcard());
        assert!(KeyTemplate::parse("feed:?").is_wildcard());
        let plain = KeyTemplate::parse("config");
        assert!(!plain.is_wildcard());
        assert_eq!(plain.render(&json!({})).as_deref(), Some("config"));
        // unmatched brace stays literal
        assert_eq!(
            KeyTemplate::parse("odd{").render(&json!({})).as_deref(),
            Some("odd{")
        );
    }

    #[test]
    fn test_field_values_are_escaped_in_wildcards() {
        let feed = KeyTemplate::parse("feed:{id}:*");
        assert_eq!(
            feed.render(&json!({"id": "*"})).as_deref(),
            Some(r"feed:\*:*")
        );
        assert_eq!(
            feed.render(&json!({"id": "a?[b]"})).as_deref(),
            Some(r"feed:a\?\[b\]:*")
        );
        // exact keys are deleted as-is
        assert_eq!(
            KeyTemplate::parse("user:{id}").render(&json!({"id": "*"})).as_deref(),
            Some("user:*")
        );
    }

    #[test]
    fn test_registry_resolves_and_skips_missing_fields() {
        let registry = EventRegistry::new();
        registry.register("user.updated", ["user:{id}", "user:{id}:*", "team:{team}"]);
        registry.register("user.updated", ["user:{id}"]);
        assert_eq!(registry.templates("user.updated").len(), 3);

        let resolved = registry.resolve("user.updated", &json!({"id": 7}));
        assert_eq!(
            resolved,
            vec![("user:7".to_string(), false), ("user:7:*".to_string(), true)]
        );
        assert!(registry.resolve("unknown", &json!({})).is_empty());
    }
}
