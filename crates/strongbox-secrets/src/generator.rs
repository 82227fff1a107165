//! Candidate value generation for rotation.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::distributions::{Alphanumeric, DistString};
use rand::seq::SliceRandom;
use rand::{Rng, RngCore};

use crate::types::{Classification, SecretValue};

/// Produces a fresh raw value for a classification.
pub trait ValueGenerator: Send + Sync {
    /// Generates a new candidate.
    fn generate(&self, classification: Classification) -> SecretValue;
}

const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
const SYMBOLS: &[u8] = b"!#%+-.=^_~";

/// Built-in generator with one shape per classification:
///
/// | Classification | Shape |
/// |---|---|
/// | `database-password` | 32 chars, at least one lower, upper, digit and symbol |
/// | `api-key` | `sk_` followed by 40 base62 chars |
/// | `jwt-signing` | 64 random bytes, base64url |
/// | `generic` | 32 random bytes, base64url |
#[derive(Debug, Clone)]
pub struct ClassificationGenerator {
    password_length: usize,
    api_key_prefix: String,
}

impl ClassificationGenerator {
    /// Length of generated database passwords.
    pub const PASSWORD_LENGTH: usize = 32;
    /// Number of random characters in an API key.
    pub const API_KEY_BODY: usize = 40;

    /// Creates the generator with default shapes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            password_length: Self::PASSWORD_LENGTH,
            api_key_prefix: "sk_".to_string(),
        }
    }

    /// Overrides the API key prefix.
    #[must_use]
    pub fn with_api_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.api_key_prefix = prefix.into();
        self
    }

    fn password(&self) -> String {
        let mut rng = rand::thread_rng();
        let classes = [LOWER, UPPER, DIGITS, SYMBOLS];
        let all: Vec<u8> = classes.concat();

        let length = self.password_length.max(classes.len());
        let mut chars: Vec<u8> = classes
            .iter()
            .map(|class| class[rng.gen_range(0..class.len())])
            .collect();
        chars.extend((chars.len()..length).map(|_| all[rng.gen_range(0..all.len())]));
        chars.shuffle(&mut rng);
        chars.into_iter().map(char::from).collect()
    }

    fn api_key(&self) -> String {
        let body = Alphanumeric.sample_string(&mut rand::thread_rng(), Self::API_KEY_BODY);
        format!("{}{body}", self.api_key_prefix)
    }
}

fn random_base64(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    let encoded = URL_SAFE_NO_PAD.encode(&buf);
    zeroize::Zeroize::zeroize(&mut buf);
    encoded
}

impl Default for ClassificationGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueGenerator for ClassificationGenerator {
    fn generate(&self, classification: Classification) -> SecretValue {
        let value = match classification {
            Classification::DatabasePassword => self.password(),
            Classification::ApiKey => self.api_key(),
            Classification::JwtSigning => random_base64(64),
            Classification::Generic => random_base64(32),
        };
        SecretValue::from_string(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn text(value: &SecretValue) -> String {
        value.as_str().expect("utf-8").to_string()
    }

    #[test]
    fn password_has_every_class() {
        let generator = ClassificationGenerator::new();
        for _ in 0..50 {
            let password = text(&generator.generate(Classification::DatabasePassword));
            assert_eq!(password.len(), ClassificationGenerator::PASSWORD_LENGTH);
            assert!(password.bytes().any(|b| LOWER.contains(&b)));
            assert!(password.bytes().any(|b| UPPER.contains(&b)));
            assert!(password.bytes().any(|b| DIGITS.contains(&b)));
            assert!(password.bytes().any(|b| SYMBOLS.contains(&b)));
        }
    }

    #[test]
    fn api_key_shape() {
        let key = text(&ClassificationGenerator::new().generate(Classification::ApiKey));
        let body = key.strip_prefix("sk_").expect("prefix");
        assert_eq!(body.len(), ClassificationGenerator::API_KEY_BODY);
        assert!(body.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn custom_api_key_prefix() {
        let generator = ClassificationGenerator::new().with_api_key_prefix("pk_live_");
        assert!(text(&generator.generate(Classification::ApiKey)).starts_with("pk_live_"));
    }

    #[test_case(Classification::JwtSigning, 64)]
    #[test_case(Classification::Generic, 32)]
    fn random_bytes_shape(classification: Classification, bytes: usize) {
        let value = text(&ClassificationGenerator::new().generate(classification));
        let decoded = URL_SAFE_NO_PAD.decode(value).expect("base64url");
        assert_eq!(decoded.len(), bytes);
    }

    #[test]
    fn values_are_fresh() {
        let generator = ClassificationGenerator::new();
        let a = generator.generate(Classification::Generic);
        let b = generator.generate(Classification::Generic);
        assert_ne!(a, b);
    }
}
