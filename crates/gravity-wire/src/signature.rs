//! Thought-signature validity rules and the process-global signature cache.
//!
//! The upstream authenticates past reasoning with an opaque signature string
//! attached to thinking blocks and tool calls. Clients routinely strip the
//! field when echoing history back, so the proxy remembers recently issued
//! signatures by tool-call id and restores them on the next turn.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::model::ModelFamily;

/// Real signatures are long opaque tokens; anything shorter is noise.
pub const MIN_SIGNATURE_LENGTH: usize = 50;

/// Marker attached to Gemini tool calls whose original signature is gone.
/// The upstream skips signature validation when it sees this value.
pub const SKIP_SIGNATURE_MARKER: &str = "gemini-skip-signature-validation";

/// Short placeholder values the Gemini family accepts in place of a real
/// signature. Claude requires the genuine article.
pub const PLACEHOLDER_SIGNATURES: &[&str] =
    &[SKIP_SIGNATURE_MARKER, "gemini-legacy-signature"];

/// A signature is valid when it is long enough to be real, or (Gemini only)
/// when it is one of the accepted placeholders.
pub fn signature_is_valid(sig: &str, family: ModelFamily) -> bool {
    if sig.len() >= MIN_SIGNATURE_LENGTH {
        return true;
    }
    family == ModelFamily::Gemini && PLACEHOLDER_SIGNATURES.contains(&sig)
}

struct CachedSignature {
    signature: String,
    cached_at: Instant,
}

/// Time-bounded map from tool-call id to thought signature. Pure
/// optimization: a miss only means the skip marker gets sent instead.
pub struct SignatureCache {
    entries: DashMap<String, CachedSignature>,
    ttl: Duration,
}

impl SignatureCache {
    pub fn new() -> Self {
        Self::with_ttl(Duration::from_secs(gravity_core::config::SIGNATURE_TTL_SECS))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Store a signature for a tool-call id. Empty ids or signatures are
    /// ignored rather than poisoning the map.
    pub fn put(&self, id: &str, signature: &str) {
        if id.is_empty() || signature.is_empty() {
            return;
        }
        self.entries.insert(
            id.to_string(),
            CachedSignature {
                signature: signature.to_string(),
                cached_at: Instant::now(),
            },
        );
    }

    /// Fetch the signature for a tool-call id. Expired entries are removed
    /// on read rather than by a background task.
    pub fn get(&self, id: &str) -> Option<String> {
        let expired = match self.entries.get(id) {
            Some(entry) => {
                if entry.cached_at.elapsed() < self.ttl {
                    return Some(entry.signature.clone());
                }
                true
            }
            None => false,
        };
        if expired {
            self.entries.remove(id);
        }
        None
    }

    /// Drop every expired entry. Optional; `get` already expires lazily.
    pub fn sweep(&self) {
        self.entries.retain(|_, v| v.cached_at.elapsed() < self.ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for SignatureCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validity_by_length() {
        let real = "s".repeat(MIN_SIGNATURE_LENGTH);
        assert!(signature_is_valid(&real, ModelFamily::Claude));
        assert!(signature_is_valid(&real, ModelFamily::Gemini));
        assert!(!signature_is_valid("short", ModelFamily::Claude));
        assert!(!signature_is_valid("", ModelFamily::Gemini));
    }

    #[test]
    fn placeholders_only_for_gemini() {
        assert!(signature_is_valid(SKIP_SIGNATURE_MARKER, ModelFamily::Gemini));
        assert!(!signature_is_valid(SKIP_SIGNATURE_MARKER, ModelFamily::Claude));
        assert!(!signature_is_valid(SKIP_SIGNATURE_MARKER, ModelFamily::Unknown));
    }

    #[test]
    fn put_get_round_trip() {
        let cache = SignatureCache::new();
        cache.put("toolu_1", "sig-value");
        assert_eq!(cache.get("toolu_1"), Some("sig-value".to_string()));
        assert_eq!(cache.get("toolu_2"), None);
    }

    #[test]
    fn empty_inputs_are_ignored() {
        let cache = SignatureCache::new();
        cache.put("", "sig");
        cache.put("id", "");
        assert!(cache.is_empty());
    }

    #[test]
    fn latest_put_wins() {
        let cache = SignatureCache::new();
        cache.put("id", "first");
        cache.put("id", "second");
        assert_eq!(cache.get("id"), Some("second".to_string()));
    }

    #[test]
    fn expiry_on_read() {
        let cache = SignatureCache::with_ttl(Duration::from_millis(0));
        cache.put("id", "sig");
        assert_eq!(cache.get("id"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn sweep_removes_expired() {
        let cache = SignatureCache::with_ttl(Duration::from_millis(0));
        cache.put("a", "x");
        cache.put("b", "y");
        cache.sweep();
        assert!(cache.is_empty());
    }
}
