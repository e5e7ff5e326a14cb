//! Column masks: field rewrites applied before a value leaves the trust
//! boundary.
//!
//! Every mask is idempotent. Tokenization goes through a process-wide
//! bounded map that also remembers the tokens it has issued, so masking
//! an already-tokenized value returns it unchanged.

use lru::LruCache;
use serde_json::Value;
use sha1::{Digest as Sha1Digest, Sha1};
use sha2::Sha256;
use std::num::NonZeroUsize;
use std::sync::Mutex;

/// Supported column mask kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaskKind {
    RedactFull,
    RedactPart { keep: usize },
    Hash,
    Tokenize,
    Initials,
    YearOnly,
    YyyyMm,
    CityOnly,
    Null,
}

impl MaskKind {
    /// Parse the policy-file spelling of a mask kind.
    ///
    /// `redact_part` keeps the last 4 characters unless an explicit
    /// `redact_part(keep=N)` is given. Unknown spellings are rejected so a
    /// typo in a policy never silently leaks a field.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Some(rest) = raw.strip_prefix("redact_part") {
            let rest = rest.trim();
            if rest.is_empty() {
                return Some(MaskKind::RedactPart { keep: 4 });
            }
            return rest
                .strip_prefix("(keep=")
                .and_then(|inner| inner.strip_suffix(')'))
                .and_then(|digits| digits.trim().parse().ok())
                .map(|keep| MaskKind::RedactPart { keep });
        }
        match raw {
            "redact_full" => Some(MaskKind::RedactFull),
            "hash" => Some(MaskKind::Hash),
            "tokenize" => Some(MaskKind::Tokenize),
            "initials" => Some(MaskKind::Initials),
            "year_only" => Some(MaskKind::YearOnly),
            "yyyy_mm" => Some(MaskKind::YyyyMm),
            "city_only" => Some(MaskKind::CityOnly),
            "null" | "none" => Some(MaskKind::Null),
            _ => None,
        }
    }
}

/// Process-wide tokenization map with an LRU bound.
///
/// Maps raw values to `tok_` tokens and each issued token to itself, so a
/// token fed back in comes out unchanged.
pub struct TokenMap {
    inner: Mutex<LruCache<String, String>>,
}

impl TokenMap {
    pub fn new(capacity: u32) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1) as usize).expect("nonzero capacity");
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Deterministic token for `raw`: `tok_` + first 10 hex of SHA-1.
    pub fn tokenize(&self, raw: &str) -> String {
        let mut map = self.inner.lock().unwrap();
        if let Some(token) = map.get(raw) {
            return token.clone();
        }
        let digest = format!("{:x}", Sha1::digest(raw.as_bytes()));
        let token = format!("tok_{}", &digest[..10]);
        map.put(raw.to_string(), token.clone());
        map.put(token.clone(), token.clone());
        token
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Apply a mask to a JSON value. Null stays null for every kind.
pub fn apply_mask(kind: &MaskKind, value: &Value, tokens: &TokenMap) -> Value {
    if value.is_null() {
        return Value::Null;
    }
    match kind {
        MaskKind::RedactFull | MaskKind::Null => Value::Null,
        MaskKind::RedactPart { keep } => {
            let text = stringify(value);
            let chars: Vec<char> = text.chars().collect();
            let kept: String = chars[chars.len().saturating_sub(*keep)..].iter().collect();
            let stars = "*".repeat(chars.len().saturating_sub(*keep));
            Value::String(format!("{}{}", stars, kept))
        }
        MaskKind::Hash => {
            let text = stringify(value);
            // Re-masking must be a no-op: a 16-hex digest is already masked
            if is_hash_digest(&text) {
                return Value::String(text);
            }
            let digest = format!("{:x}", Sha256::digest(text.as_bytes()));
            Value::String(digest[..16].to_string())
        }
        MaskKind::Tokenize => Value::String(tokens.tokenize(&stringify(value))),
        MaskKind::Initials => {
            let text = stringify(value);
            if is_initials(&text) {
                return Value::String(text);
            }
            let initials: String = text
                .split_whitespace()
                .filter_map(|word| word.chars().next())
                .flat_map(|ch| ch.to_uppercase())
                .collect();
            Value::String(initials)
        }
        MaskKind::YearOnly => Value::String(truncate_chars(&stringify(value), 4)),
        MaskKind::YyyyMm => Value::String(truncate_chars(&stringify(value), 7)),
        MaskKind::CityOnly => {
            let text = stringify(value);
            match text.rsplit_once(',') {
                Some((_, city)) => Value::String(city.trim().to_string()),
                None => Value::String(text),
            }
        }
    }
}

fn is_hash_digest(text: &str) -> bool {
    text.len() == 16
        && text
            .chars()
            .all(|ch| ch.is_ascii_digit() || ('a'..='f').contains(&ch))
        && text.chars().any(|ch| ch.is_ascii_alphabetic())
}

fn is_initials(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|ch| ch.is_ascii_uppercase())
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
