use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::normalizer::normalize;
use super::registry::{SignatureMatch, SignatureRegistry};
use super::tokenizer::Tokenizer;
use crate::utils::sha256_hex;

/// SHA-256 of the normalized body, hex encoded.
pub fn content_fingerprint(body: &str) -> String {
    sha256_hex(normalize(body).as_bytes())
}

/// Two-stage fingerprint: hash of the concatenated sorted tokens, then
/// hash of `token_digest_hex + content_digest_hex`.
pub fn combined_fingerprint(tokens: &[String], body: &str) -> String {
    let mut sorted: Vec<&str> = tokens.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    let token_digest = sha256_hex(sorted.concat().as_bytes());
    let content_digest = content_fingerprint(body);
    sha256_hex(format!("{token_digest}{content_digest}").as_bytes())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identification {
    pub identifier: String,
    pub tokens: Vec<String>,
    pub content_fingerprint: Option<String>,
    pub combined_fingerprint: String,
    pub matches: Vec<SignatureMatch>,
}

pub struct FingerprintEngine {
    tokenizer: Tokenizer,
    registry: Arc<SignatureRegistry>,
}

impl FingerprintEngine {
    pub fn new(tokenizer: Tokenizer, registry: Arc<SignatureRegistry>) -> Self {
        Self { tokenizer, registry }
    }

    pub fn tokenize(&self, identifier: &str, body: Option<&str>) -> Vec<String> {
        self.tokenizer.tokenize(identifier, body)
    }

    pub fn match_signature(&self, identifier: &str) -> Vec<SignatureMatch> {
        self.registry.match_signature(identifier)
    }

    /// Full identification of one resource. Without a body the combined
    /// fingerprint is taken over the empty body, which still separates
    /// resources by their structural tokens.
    pub fn identify(&self, identifier: &str, body: Option<&str>) -> Identification {
        let tokens = self.tokenize(identifier, body);
        let combined = combined_fingerprint(&tokens, body.unwrap_or_default());

        Identification {
            identifier: identifier.to_string(),
            content_fingerprint: body.map(content_fingerprint),
            combined_fingerprint: combined,
            matches: self.match_signature(identifier),
            tokens,
        }
    }
}
