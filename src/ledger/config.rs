use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::tier::{Tier, TierPolicyOverride};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// One account to provision at startup. Seeding is idempotent: an account
/// that already exists keeps its live balance.
#[derive(Clone, Serialize, Deserialize)]
pub struct AccountSeed {
    #[serde(alias = "account_id")]
    pub id: String,
    pub token: String,
    pub tier: Tier,
    /// Overrides the tier's default starting grant when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starting_credits: Option<i64>,
}

impl fmt::Debug for AccountSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountSeed")
            .field("id", &self.id)
            .field("token", &"<redacted>")
            .field("tier", &self.tier)
            .field("starting_credits", &self.starting_credits)
            .finish()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub accounts: Vec<AccountSeed>,
    /// Tier name -> partial policy override, merged over the builtin table.
    pub tiers: BTreeMap<String, TierPolicyOverride>,
    pub admin_tokens: Vec<String>,
    pub internal_tokens: Vec<String>,
}

impl fmt::Debug for LedgerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerConfig")
            .field("accounts", &self.accounts)
            .field("tiers", &self.tiers.keys().collect::<Vec<_>>())
            .field("admin_tokens", &format_args!("<{} redacted>", self.admin_tokens.len()))
            .field(
                "internal_tokens",
                &format_args!("<{} redacted>", self.internal_tokens.len()),
            )
            .finish()
    }
}

impl LedgerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: LedgerConfig =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut ids = BTreeSet::new();
        let mut tokens = BTreeSet::new();
        for seed in &self.accounts {
            if seed.id.is_empty() {
                return Err(ConfigError::Invalid("account with empty id".to_string()));
            }
            if seed.token.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "account {} has an empty token",
                    seed.id
                )));
            }
            if !ids.insert(seed.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate account id: {}",
                    seed.id
                )));
            }
            if !tokens.insert(seed.token.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate account token (account {})",
                    seed.id
                )));
            }
            if let Some(credits) = seed.starting_credits {
                if credits < 0 {
                    return Err(ConfigError::Invalid(format!(
                        "account {} has negative starting credits",
                        seed.id
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let raw = r#"{
            "accounts": [
                {"id": "acct-1", "token": "ck-1", "tier": "free"},
                {"account_id": "acct-2", "token": "ck-2", "tier": "pro", "starting_credits": 5000}
            ],
            "tiers": {"free": {"starting_credits": 250}},
            "admin_tokens": ["admin-1"],
            "internal_tokens": ["svc-1"]
        }"#;
        let config: LedgerConfig = serde_json::from_str(raw).expect("parse");
        config.validate().expect("valid");
        assert_eq!(config.accounts.len(), 2);
        assert_eq!(config.accounts[1].id, "acct-2");
        assert_eq!(config.accounts[1].tier, Tier::Pro);
        assert_eq!(config.accounts[1].starting_credits, Some(5000));
        assert_eq!(config.tiers["free"].starting_credits, Some(250));
        assert_eq!(config.admin_tokens, ["admin-1"]);
    }

    #[test]
    fn empty_object_is_a_valid_config() {
        let config: LedgerConfig = serde_json::from_str("{}").expect("parse");
        config.validate().expect("valid");
        assert!(config.accounts.is_empty());
    }

    #[test]
    fn rejects_duplicate_ids_and_tokens() {
        let dup_id = r#"{"accounts": [
            {"id": "a", "token": "t1", "tier": "free"},
            {"id": "a", "token": "t2", "tier": "free"}
        ]}"#;
        let config: LedgerConfig = serde_json::from_str(dup_id).expect("parse");
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let dup_token = r#"{"accounts": [
            {"id": "a", "token": "t", "tier": "free"},
            {"id": "b", "token": "t", "tier": "free"}
        ]}"#;
        let config: LedgerConfig = serde_json::from_str(dup_token).expect("parse");
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_unknown_tier_names() {
        let raw = r#"{"accounts": [{"id": "a", "token": "t", "tier": "platinum"}]}"#;
        assert!(serde_json::from_str::<LedgerConfig>(raw).is_err());
    }

    #[test]
    fn debug_output_redacts_tokens() {
        let config: LedgerConfig = serde_json::from_str(
            r#"{"accounts": [{"id": "a", "token": "ck-secret", "tier": "free"}],
                "admin_tokens": ["admin-secret"]}"#,
        )
        .expect("parse");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("ck-secret"));
        assert!(!rendered.contains("admin-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
