use std::sync::{PoisonError, RwLock};

use log::{debug, info};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::SignatureSeed;
use crate::Result;

/// A known third-party script: a pattern over resource URLs plus the
/// reference fingerprint of its content.
#[derive(Debug, Clone)]
pub struct SignatureEntry {
    pub name: String,
    pub pattern: Regex,
    pub fingerprint: String,
}

impl SignatureEntry {
    pub fn new(name: &str, pattern: &str, fingerprint: &str) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            pattern: Regex::new(pattern)?,
            fingerprint: fingerprint.to_string(),
        })
    }
}

impl TryFrom<&SignatureSeed> for SignatureEntry {
    type Error = crate::SniffError;

    fn try_from(seed: &SignatureSeed) -> Result<Self> {
        Self::new(&seed.name, &seed.pattern, &seed.fingerprint)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureMatch {
    pub name: String,
    pub fingerprint: String,
    /// Capture groups by position; `None` for a group that did not take part.
    pub groups: Vec<Option<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Added,
    Replaced,
}

/// Ordered list of signatures, looked up by linear scan.
///
/// Names are unique; patterns and fingerprints are not, so a URL may hit
/// several entries. Writers replace whole entries under the write lock, so
/// a concurrent lookup sees either the old or the new entry.
#[derive(Debug, Default)]
pub struct SignatureRegistry {
    entries: RwLock<Vec<SignatureEntry>>,
}

impl SignatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seeds(seeds: &[SignatureSeed]) -> Result<Self> {
        let registry = Self::new();
        for seed in seeds {
            registry.register_or_replace(SignatureEntry::try_from(seed)?);
        }
        Ok(registry)
    }

    /// Replaces the entry with the same name in place, or appends.
    pub fn register_or_replace(&self, entry: SignatureEntry) -> Registration {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = entries.iter_mut().find(|e| e.name == entry.name) {
            info!("Updated signature for {}", entry.name);
            *existing = entry;
            return Registration::Replaced;
        }

        info!("Added signature for {}", entry.name);
        entries.push(entry);
        Registration::Added
    }

    /// Every entry whose pattern matches `identifier`, in registration order.
    pub fn match_signature(&self, identifier: &str) -> Vec<SignatureMatch> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);

        entries
            .iter()
            .filter_map(|entry| {
                let caps = entry.pattern.captures(identifier)?;
                let groups: Vec<Option<String>> = caps
                    .iter()
                    .skip(1)
                    .map(|group| group.map(|m| m.as_str().to_string()))
                    .collect();
                if !groups.is_empty() {
                    debug!("{} matched groups {:?}", entry.name, groups);
                }
                Some(SignatureMatch {
                    name: entry.name.clone(),
                    fingerprint: entry.fingerprint.clone(),
                    groups,
                })
            })
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.iter().map(|e| e.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use std::sync::Arc;
    use std::thread;

    fn builtin() -> SignatureRegistry {
        SignatureRegistry::from_seeds(&Config::default().fingerprint.signatures).unwrap()
    }

    fn groups(items: &[Option<&str>]) -> Vec<Option<String>> {
        items.iter().map(|item| item.map(str::to_string)).collect()
    }

    #[test]
    fn test_google_tag_manager_is_identified() {
        let registry = builtin();
        let matches = registry
            .match_signature("https://www.googletagmanager.com/gtm.js?id=GTM-ABC123&l=dataLayer");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].name, "Google Tag Manager");
        assert_eq!(
            matches[0].fingerprint,
            "6fafc56f9855a5f2c7bc3c722ff122f7d8079719e48e83b7b59b7c0ccc844f95"
        );
        assert_eq!(matches[0].groups, groups(&[Some("gtm.js"), Some("GTM-ABC123")]));
    }

    #[test]
    fn test_other_builtins() {
        let registry = builtin();
        let ga = registry.match_signature("https://www.google-analytics.com/analytics.js");
        assert_eq!(ga[0].name, "Google Analytics");
        let ads = registry.match_signature(
            "https://googleads.g.doubleclick.net/pagead/ads?client=ca-pub-123456789&output=html",
        );
        assert_eq!(ads[0].name, "Google Ads");
        assert_eq!(ads[0].groups, groups(&[Some("ca-pub-123456789")]));
        assert!(registry.match_signature("https://example.com/app.js").is_empty());
    }

    #[test]
    fn test_group_positions_are_stable() {
        let registry = SignatureRegistry::new();
        registry.register_or_replace(
            SignatureEntry::new("Pixel", r"px\.example\.com/(?:v(\d+)/)?(\w+)\.js", "ab").unwrap(),
        );

        let versioned = registry.match_signature("https://px.example.com/v2/track.js");
        assert_eq!(versioned[0].groups, groups(&[Some("2"), Some("track")]));
        let plain = registry.match_signature("https://px.example.com/track.js");
        assert_eq!(plain[0].groups, groups(&[None, Some("track")]));
    }

    #[test]
    fn test_multiple_matches_in_order() {
        let registry = SignatureRegistry::new();
        registry.register_or_replace(SignatureEntry::new("Any CDN", r"cdn\.example\.com/", "aa").unwrap());
        registry.register_or_replace(SignatureEntry::new("Loader", r"/loader\.js", "bb").unwrap());
        registry.register_or_replace(SignatureEntry::new("Other", r"unrelated", "cc").unwrap());

        let matches = registry.match_signature("https://cdn.example.com/loader.js");
        let names: Vec<&str> = matches.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Any CDN", "Loader"]);
    }

    #[test]
    fn test_replace_keeps_position() {
        let registry = builtin();
        let outcome = registry.register_or_replace(
            SignatureEntry::new("Google Analytics", r"google-analytics\.com/gtag\.js", "ff").unwrap(),
        );
        assert_eq!(outcome, Registration::Replaced);
        assert_eq!(registry.names(), vec!["Google Ads", "Google Analytics", "Google Tag Manager"]);
        assert!(registry.match_signature("https://www.google-analytics.com/analytics.js").is_empty());

        let outcome = registry.register_or_replace(SignatureEntry::new("Hotjar", r"static\.hotjar\.com", "ee").unwrap());
        assert_eq!(outcome, Registration::Added);
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        assert!(SignatureEntry::new("Broken", r"(unclosed", "00").is_err());
    }

    #[test]
    fn test_concurrent_replace_and_match() {
        let registry = Arc::new(SignatureRegistry::new());
        registry.register_or_replace(SignatureEntry::new("Tracker", r"t\.example/v0\.js", "v0").unwrap());

        let writer = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for i in 1..200 {
                    let entry = SignatureEntry::new("Tracker", r"t\.example/v\d+\.js", &format!("v{i}")).unwrap();
                    registry.register_or_replace(entry);
                }
            })
        };
        let reader = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for _ in 0..200 {
                    let matches = registry.match_signature("https://t.example/v0.js");
                    assert_eq!(matches.len(), 1);
                    assert!(matches[0].fingerprint.starts_with('v'));
                }
            })
        };
        writer.join().unwrap();
        reader.join().unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.match_signature("https://t.example/v0.js")[0].fingerprint, "v199");
    }
}
