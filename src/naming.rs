//! Display-name derivation for sensor subtrees.
//!
//! A display name is the prefix followed by the identity with every
//! non-alphanumeric character removed and letters uppercased, so
//! `aa:bb:cc:dd:ee:ff` and `AA-BB-CC-DD-EE-FF` name the same subtree.
//! The `Short` style additionally truncates the normalized identity, which
//! is lossy: identities sharing a normalized prefix derive the same name.
//! Collisions are resolved by the registry (see `registry.rs`).

use serde::Deserialize;

use crate::domain::{DisplayName, SensorIdentity};

/// used when an identity has no alphanumeric characters at all
const EMPTY_IDENTITY: &str = "UNNAMED";

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum NameStyle {
    /// whole normalized identity
    #[default]
    Full,
    /// first `short_length` normalized characters
    Short,
}

/// Pure, deterministic identity → display name mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingRule {
    pub style: NameStyle,
    pub prefix: String,
    pub short_length: usize,
}

impl Default for NamingRule {
    fn default() -> Self {
        Self {
            style: NameStyle::Full,
            prefix: "RuuviTag ".to_string(),
            short_length: 6,
        }
    }
}

impl NamingRule {
    pub fn derive_display_name(&self, identity: &SensorIdentity) -> DisplayName {
        let mut normalized = normalize(identity.as_str());

        if self.style == NameStyle::Short {
            if let Some((cut, _)) = normalized.char_indices().nth(self.short_length) {
                normalized.truncate(cut);
            }
        }
        if normalized.is_empty() {
            normalized.push_str(EMPTY_IDENTITY);
        }

        DisplayName::new(format!("{}{}", self.prefix, normalized))
    }
}

/// uppercase alphanumerics of `raw`, separators dropped
pub fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_uppercase)
        .collect()
}

/// Convenience wrapper using the default rule.
pub fn derive_display_name(identity: &SensorIdentity) -> DisplayName {
    NamingRule::default().derive_display_name(identity)
}
