//! Request fingerprinting (§3 "Request fingerprint"): a stable hash over
//! the normalized request, used as the cache key and for single-flight
//! dedup across concurrent identical completion requests.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Opaque cache/dedup key. Two requests that normalize to the same
/// fingerprint are treated as identical by the cache and single-flight
/// guard, regardless of surface differences (whitespace, key order).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Construct directly from an already-computed or test key. Production
    /// callers should use [`fingerprint`] instead.
    pub fn from_raw(raw: String) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Inputs folded into the fingerprint hash. Callers normalize upstream
/// (trim whitespace, canonicalize JSON key order, lowercase the model
/// id) before constructing this — the fingerprint itself does no
/// normalization beyond bucketing temperature.
#[derive(Debug, Clone)]
pub struct FingerprintInput<'a> {
    pub model: &'a str,
    pub messages_json: &'a str,
    pub tools_json: Option<&'a str>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub response_format: Option<&'a str>,
    pub policy_flags: &'a [&'a str],
}

/// Temperature is bucketed to two decimal places so that
/// floating-point jitter across client libraries doesn't fragment the
/// cache.
fn temperature_bucket(t: Option<f32>) -> i32 {
    t.map(|v| (v * 100.0).round() as i32).unwrap_or(-1)
}

pub fn fingerprint(input: &FingerprintInput) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(input.model.as_bytes());
    hasher.update([0u8]);
    hasher.update(input.messages_json.as_bytes());
    hasher.update([0u8]);
    hasher.update(input.tools_json.unwrap_or("").as_bytes());
    hasher.update([0u8]);
    hasher.update(temperature_bucket(input.temperature).to_le_bytes());
    hasher.update(input.max_tokens.unwrap_or(0).to_le_bytes());
    hasher.update(input.response_format.unwrap_or("").as_bytes());
    for flag in input.policy_flags {
        hasher.update(flag.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();
    Fingerprint(URL_SAFE_NO_PAD.encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_input() -> FingerprintInput<'static> {
        FingerprintInput {
            model: "gpt-4",
            messages_json: r#"[{"role":"user","content":"hi"}]"#,
            tools_json: None,
            temperature: Some(0.0),
            max_tokens: Some(256),
            response_format: None,
            policy_flags: &[],
        }
    }

    #[test]
    fn identical_inputs_fingerprint_identically() {
        assert_eq!(fingerprint(&base_input()), fingerprint(&base_input()));
    }

    #[test]
    fn different_models_fingerprint_differently() {
        let mut other = base_input();
        other.model = "gpt-3.5-turbo";
        assert_ne!(fingerprint(&base_input()), fingerprint(&other));
    }

    #[test]
    fn temperature_jitter_within_bucket_is_identical() {
        let mut a = base_input();
        let mut b = base_input();
        a.temperature = Some(0.70001);
        b.temperature = Some(0.70004);
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn temperature_across_bucket_boundary_differs() {
        let mut a = base_input();
        let mut b = base_input();
        a.temperature = Some(0.70);
        b.temperature = Some(0.80);
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }
}
