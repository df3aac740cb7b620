//! Template normalization: reduce a payload to its structural skeleton.
//!
//! # Template Normalizer
//!
//! Variable substrings (identifiers, e-mails, URLs, timestamps, addresses) are
//! replaced by fixed placeholders so that payloads with the same structure map
//! to the same template and therefore the same [`TemplateHash`].
//!
//! | Placeholder | Matches |
//! |-------------|---------|
//! | `{UUID}` | `8-4-4-4-12` hex groups |
//! | `{EMAIL}` | `local@domain.tld` |
//! | `{URL}` | `http(s)://`, `ftp://`, `ws(s)://` links |
//! | `{TIMESTAMP}` | ISO-8601 dates with optional time and offset |
//! | `{IP}` | dotted-quad IPv4 addresses |
//! | `{NUMBER}` | runs of 4+ digits, and digits glued to an identifier (`user42`, `#17`) |
//!
//! Normalization is intentionally lossy: two different messages may share a
//! template. Callers needing stricter matching layer a similarity fingerprint
//! on top (see [`crate::fingerprint`]).
//!
//! ## Example
//!
//! ```rust
//! use dedup_cache::template::{TemplateHash, TemplateNormalizer};
//!
//! let normalizer = TemplateNormalizer::new();
//! let a = normalizer.normalize("Hello user123, order #456 ready");
//! let b = normalizer.normalize("Hello user789, order #987 ready");
//! assert_eq!(a, "hello user{NUMBER}, order #{NUMBER} ready");
//! assert_eq!(TemplateHash::of(&a), TemplateHash::of(&b));
//! ```

mod hash;

pub use hash::TemplateHash;

use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;

/// One substitution step of the normalizer.
#[derive(Debug, Clone)]
pub struct SubstitutionRule {
    name: &'static str,
    pattern: Regex,
    replacement: String,
    placeholder: &'static str,
}

impl SubstitutionRule {
    /// Replace every match of `pattern` with `placeholder`.
    pub fn new(name: &'static str, pattern: Regex, placeholder: &'static str) -> Self {
        Self {
            name,
            pattern,
            replacement: placeholder.replace('$', "$$"),
            placeholder,
        }
    }

    /// Replace matches using a `regex` replacement string (`$name` expands capture groups).
    pub fn with_replacement(
        name: &'static str,
        pattern: Regex,
        replacement: impl Into<String>,
        placeholder: &'static str,
    ) -> Self {
        Self {
            name,
            pattern,
            replacement: replacement.into(),
            placeholder,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn placeholder(&self) -> &'static str {
        self.placeholder
    }

    fn apply<'a>(&self, text: &'a str) -> Cow<'a, str> {
        self.pattern.replace_all(text, self.replacement.as_str())
    }
}

/// Extra passes after the first before giving up on a fixed point.
const MAX_PASSES: usize = 4;

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("normalizer pattern must compile")
}

static DEFAULT_RULES: Lazy<Vec<SubstitutionRule>> = Lazy::new(|| {
    vec![
        SubstitutionRule::new(
            "uuid",
            compile(r"\b[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}\b"),
            "{UUID}",
        ),
        SubstitutionRule::new(
            "email",
            compile(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}"),
            "{EMAIL}",
        ),
        SubstitutionRule::new(
            "url",
            compile(r#"\b(?:https?|ftp|wss?)://[^\s<>"']+"#),
            "{URL}",
        ),
        SubstitutionRule::new(
            "timestamp",
            compile(
                r"\b\d{4}-\d{2}-\d{2}(?:[T ]\d{2}:\d{2}(?::\d{2}(?:[.,]\d+)?)?(?:Z|[+-]\d{2}:?\d{2})?)?\b",
            ),
            "{TIMESTAMP}",
        ),
        SubstitutionRule::new(
            "ip",
            compile(
                r"\b(?:(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\.){3}(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\b",
            ),
            "{IP}",
        ),
        SubstitutionRule::new("number", compile(r"\d{4,}"), "{NUMBER}"),
        SubstitutionRule::with_replacement(
            "identifier_digits",
            compile(r"(?P<prefix>[A-Za-z_#])\d+"),
            "${prefix}{NUMBER}",
            "{NUMBER}",
        ),
    ]
});

/// Converts free-form payloads into canonical templates.
///
/// Rules run in list order over the case-preserved payload. Afterwards the text
/// between placeholders is lowercased and the result trimmed. The output is a
/// fixed point: normalizing a template returns it unchanged.
#[derive(Debug, Clone)]
pub struct TemplateNormalizer {
    rules: Vec<SubstitutionRule>,
    placeholders: Option<Regex>,
}

impl TemplateNormalizer {
    /// Normalizer with [`default_rules`].
    pub fn new() -> Self {
        Self::with_rules(default_rules())
    }

    pub fn with_rules(rules: Vec<SubstitutionRule>) -> Self {
        let mut tokens: Vec<&str> = rules.iter().map(|r| r.placeholder).collect();
        tokens.sort_unstable();
        tokens.dedup();
        let alternation = tokens
            .iter()
            .map(|t| regex::escape(t))
            .collect::<Vec<_>>()
            .join("|");
        let placeholders = (!alternation.is_empty()).then(|| compile(&alternation));
        Self {
            rules,
            placeholders,
        }
    }

    pub fn rules(&self) -> &[SubstitutionRule] {
        &self.rules
    }

    /// Payload → template. Never fails; text matching no rule passes through.
    ///
    /// Lowercasing can turn non-ASCII letters into ones the rules match (the
    /// Kelvin sign becomes `k`), so passes repeat until the template is stable.
    pub fn normalize(&self, payload: &str) -> String {
        let mut template = self.pass(payload);
        for _ in 0..MAX_PASSES {
            let next = self.pass(&template);
            if next == template {
                break;
            }
            template = next;
        }
        template
    }

    fn pass(&self, payload: &str) -> String {
        let mut text = Cow::Borrowed(payload);
        for rule in &self.rules {
            if let Cow::Owned(replaced) = rule.apply(&text) {
                text = Cow::Owned(replaced);
            }
        }
        self.fold_case(&text).trim().to_string()
    }

    /// Template hash of `payload`, after normalization.
    pub fn template_hash(&self, payload: &str) -> TemplateHash {
        TemplateHash::of(&self.normalize(payload))
    }

    fn fold_case(&self, text: &str) -> String {
        let Some(placeholders) = &self.placeholders else {
            return text.to_lowercase();
        };
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for m in placeholders.find_iter(text) {
            out.push_str(&text[last..m.start()].to_lowercase());
            out.push_str(m.as_str());
            last = m.end();
        }
        out.push_str(&text[last..].to_lowercase());
        out
    }
}

impl Default for TemplateNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// The built-in rule list, in application order:
/// UUID, e-mail, URL, timestamp, IP, 4+ digit numbers, identifier digits.
///
/// Tokens spanning several character classes are rewritten before bare digit
/// runs, so a UUID or timestamp is never split into `{NUMBER}` fragments first.
pub fn default_rules() -> Vec<SubstitutionRule> {
    DEFAULT_RULES.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalize(s: &str) -> String {
        TemplateNormalizer::new().normalize(s)
    }

    #[test]
    fn test_each_placeholder() {
        assert_eq!(
            normalize("id 550e8400-e29b-41d4-a716-446655440000 failed"),
            "id {UUID} failed"
        );
        assert_eq!(normalize("mail Alice.Smith@Example.com now"), "mail {EMAIL} now");
        assert_eq!(
            normalize("see https://example.com/a?b=1 for details"),
            "see {URL} for details"
        );
        assert_eq!(
            normalize("at 2024-01-15T10:30:00Z job ran"),
            "at {TIMESTAMP} job ran"
        );
        assert_eq!(normalize("from 192.168.10.254 blocked"), "from {IP} blocked");
        assert_eq!(normalize("price is 1999 dollars"), "price is {NUMBER} dollars");
    }

    #[test]
    fn test_short_standalone_numbers_survive() {
        assert_eq!(normalize("retry 3 times"), "retry 3 times");
    }

    #[test]
    fn test_case_folding_and_trim_keep_placeholders() {
        assert_eq!(
            normalize("   WARN: Disk 9000 FULL  "),
            "warn: disk {NUMBER} full"
        );
    }

    #[test]
    fn test_equivalence_example() {
        let n = TemplateNormalizer::new();
        assert_eq!(
            n.template_hash("Hello user123, order #456 ready"),
            n.template_hash("Hello user789, order #987 ready")
        );
        assert_ne!(
            n.template_hash("Hello user123, order #456 ready"),
            n.template_hash("Goodbye user123, order #456 ready")
        );
    }

    #[test]
    fn test_variable_content_collapses() {
        let n = TemplateNormalizer::new();
        let a = n.normalize("Login by bob@corp.io from 10.0.0.1 at 2023-11-02 08:15:00, session 123456");
        let b = n.normalize("Login by eve@mail.net from 172.16.4.9 at 2024-02-29 23:59:59, session 987654321");
        assert_eq!(a, b);
    }

    #[test]
    fn test_idempotence() {
        let n = TemplateNormalizer::new();
        let samples = [
            "Hello user123, order #456 ready",
            "GET https://api.example.com/v1/items/12345?user=joe@x.org 200",
            "2024-05-01 12:00:00 worker-7 picked 3f2504e0-4f89-11d3-9a0c-0305e82c3301",
            "plain text with nothing variable",
            "",
            "  {NUMBER} already {IP}  ",
            "Mixed CASE 0xDEADBEEF v2 build#9",
            "code \u{212A}12 done",
            "\u{212A}\u{212A} 2024 \u{130}D7",
        ];
        for p in samples {
            let once = n.normalize(p);
            assert_eq!(n.normalize(&once), once, "not idempotent for {p:?}");
        }
    }

    #[test]
    fn test_letters_that_fold_to_ascii_are_rewritten() {
        // KELVIN SIGN lowercases to ASCII `k`
        assert_eq!(normalize("code \u{212A}12 done"), "code k{NUMBER} done");
        assert_eq!(normalize("code \u{212A}12 done"), normalize("code k34 done"));
    }

    #[test]
    fn test_custom_rules() {
        let n = TemplateNormalizer::with_rules(vec![SubstitutionRule::new(
            "order",
            Regex::new(r"ORD-\w+").unwrap(),
            "{ORDER}",
        )]);
        assert_eq!(n.normalize("Shipped ORD-AB12"), "shipped {ORDER}");
        assert_eq!(n.rules().len(), 1);
        assert_eq!(n.rules()[0].name(), "order");
    }
}
