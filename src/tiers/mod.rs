//! Subscription tiers and their capability flags.
//!
//! Tiers are ordered `free < basic < pro < elite < premium`. Each carries a
//! flat table of boolean switches and integer ceilings from `config.yml`.
//! Admin is a role rather than a tier and bypasses every check.

pub mod gate;

pub use gate::{Advisory, Authorization, Capability, Clamped, TierGate};

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, LookupError};

/// A subscription tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Basic,
    Pro,
    Elite,
    Premium,
}

impl Tier {
    /// All tiers, lowest first.
    pub const ALL: [Tier; 5] = [Tier::Free, Tier::Basic, Tier::Pro, Tier::Elite, Tier::Premium];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Basic => "basic",
            Tier::Pro => "pro",
            Tier::Elite => "elite",
            Tier::Premium => "premium",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = LookupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Tier::ALL
            .into_iter()
            .find(|t| t.as_str() == lower)
            .ok_or_else(|| LookupError::UnknownTier {
                name: s.to_string(),
            })
    }
}

/// Authorization role of a caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

/// Who is making a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub tier: Tier,
    pub role: Role,
}

impl Caller {
    pub fn user(tier: Tier) -> Self {
        Self {
            tier,
            role: Role::User,
        }
    }

    pub fn admin(tier: Tier) -> Self {
        Self {
            tier,
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// A single capability flag value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    Int(i64),
}

/// Capability flags of one tier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TierProfile {
    flags: IndexMap<String, FlagValue>,
}

impl TierProfile {
    pub fn new(flags: IndexMap<String, FlagValue>) -> Self {
        Self { flags }
    }

    pub fn flag(&self, name: &str) -> Option<FlagValue> {
        self.flags.get(name).copied()
    }

    /// Boolean switch; `None` if missing or not a boolean.
    pub fn enabled(&self, name: &str) -> Option<bool> {
        match self.flags.get(name)? {
            FlagValue::Bool(b) => Some(*b),
            FlagValue::Int(_) => None,
        }
    }

    /// Integer ceiling; `None` if missing or not an integer.
    pub fn ceiling(&self, name: &str) -> Option<i64> {
        match self.flags.get(name)? {
            FlagValue::Int(i) => Some(*i),
            FlagValue::Bool(_) => None,
        }
    }

    pub fn flags(&self) -> impl Iterator<Item = (&str, FlagValue)> {
        self.flags.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// The full tier table. Immutable after load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierTable {
    /// Indexed by `Tier as usize`.
    profiles: Vec<TierProfile>,
}

impl TierTable {
    /// Build from the raw `tiers:` section of `config.yml`.
    ///
    /// Every tier must be present. An `admin` entry is ignored since admin is
    /// a role. Integer flags must not decrease from one tier to the next; a
    /// flag missing from a tier counts as unlimited.
    pub fn from_raw(raw: IndexMap<String, IndexMap<String, FlagValue>>) -> Result<Self, ConfigError> {
        let mut profiles = HashMap::new();
        for (name, flags) in raw {
            if name.eq_ignore_ascii_case("admin") {
                tracing::warn!("Ignoring `admin` tier profile; admin is a role and bypasses tier checks");
                continue;
            }
            let tier: Tier = name.parse().map_err(|_| ConfigError::InvalidValue {
                key: format!("tiers.{name}"),
                message: "unknown tier".to_string(),
            })?;
            profiles.insert(tier, TierProfile::new(flags));
        }

        let profiles = Tier::ALL
            .into_iter()
            .map(|tier| {
                profiles
                    .remove(&tier)
                    .ok_or_else(|| ConfigError::MissingTier(tier.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let table = Self { profiles };
        table.validate_monotonic()?;
        Ok(table)
    }

    fn validate_monotonic(&self) -> Result<(), ConfigError> {
        for pair in Tier::ALL.windows(2) {
            let (lower_tier, higher_tier) = (pair[0], pair[1]);
            let lower = self.profile(lower_tier);
            let higher = self.profile(higher_tier);

            let mut names: Vec<&str> = lower.flags().map(|(k, _)| k).collect();
            names.extend(higher.flags().map(|(k, _)| k));
            names.sort_unstable();
            names.dedup();

            for name in names {
                let lo = lower.ceiling(name);
                let hi = higher.ceiling(name);
                let decreases = match (lo, hi) {
                    (Some(lo), Some(hi)) => hi < lo,
                    // Unlimited below, capped above.
                    (None, Some(_)) => lower.flag(name).is_none(),
                    _ => false,
                };
                if decreases {
                    return Err(ConfigError::TierNotMonotonic {
                        flag: name.to_string(),
                        lower_tier: lower_tier.to_string(),
                        lower: lo.unwrap_or(i64::MAX),
                        higher_tier: higher_tier.to_string(),
                        higher: hi.unwrap_or(i64::MAX),
                    });
                }
            }
        }
        Ok(())
    }

    /// Profile for a tier.
    pub fn profile(&self, tier: Tier) -> &TierProfile {
        &self.profiles[tier as usize]
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const TIERS_YAML: &str = r#"
free:
  max_agent_modules: 1
  web_search_limit_chars: 2000
  web_search_max_results: 3
  uploaded_docs_max_files: 1
  api_max_results: 5
  document_summarization_enabled: false
  data_analysis_enabled: false
basic:
  max_agent_modules: 2
  web_search_limit_chars: 4000
  web_search_max_results: 5
  uploaded_docs_max_files: 5
  api_max_results: 10
  document_summarization_enabled: false
  data_analysis_enabled: false
pro:
  max_agent_modules: 5
  web_search_limit_chars: 8000
  web_search_max_results: 10
  uploaded_docs_max_files: 20
  api_max_results: 25
  document_summarization_enabled: true
  data_analysis_enabled: true
elite:
  max_agent_modules: 10
  web_search_limit_chars: 16000
  web_search_max_results: 20
  uploaded_docs_max_files: 50
  api_max_results: 50
  document_summarization_enabled: true
  data_analysis_enabled: true
premium:
  max_agent_modules: 20
  web_search_limit_chars: 32000
  web_search_max_results: 50
  uploaded_docs_max_files: 100
  api_max_results: 100
  document_summarization_enabled: true
  data_analysis_enabled: true
"#;

    pub(crate) fn table() -> TierTable {
        TierTable::from_raw(serde_yaml::from_str(TIERS_YAML).unwrap()).unwrap()
    }

    #[test]
    fn test_tier_order() {
        assert!(Tier::Free < Tier::Basic);
        assert!(Tier::Elite < Tier::Premium);
        assert_eq!("PRO".parse::<Tier>().unwrap(), Tier::Pro);
        assert!("gold".parse::<Tier>().is_err());
    }

    #[test]
    fn test_profile_flags() {
        let table = table();
        let free = table.profile(Tier::Free);
        assert_eq!(free.ceiling("web_search_limit_chars"), Some(2000));
        assert_eq!(free.enabled("document_summarization_enabled"), Some(false));
        assert_eq!(free.enabled("web_search_limit_chars"), None);
        assert_eq!(free.ceiling("unknown_flag"), None);
        assert_eq!(
            table.profile(Tier::Pro).enabled("document_summarization_enabled"),
            Some(true)
        );
    }

    #[test]
    fn test_non_monotonic_rejected() {
        let yaml = TIERS_YAML.replace("web_search_limit_chars: 16000", "web_search_limit_chars: 100");
        let err = TierTable::from_raw(serde_yaml::from_str(&yaml).unwrap()).unwrap_err();
        match err {
            ConfigError::TierNotMonotonic {
                flag,
                lower_tier,
                higher_tier,
                ..
            } => {
                assert_eq!(flag, "web_search_limit_chars");
                assert_eq!(lower_tier, "pro");
                assert_eq!(higher_tier, "elite");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_cap_introduced_above_unlimited_rejected() {
        let yaml = TIERS_YAML.replace("  api_max_results: 5\n", "");
        let err = TierTable::from_raw(serde_yaml::from_str(&yaml).unwrap()).unwrap_err();
        assert!(matches!(err, ConfigError::TierNotMonotonic { .. }));
    }

    #[test]
    fn test_missing_tier_rejected() {
        let yaml = "free: {}\nbasic: {}\npro: {}\nelite: {}\n";
        let err = TierTable::from_raw(serde_yaml::from_str(yaml).unwrap()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingTier(t) if t == "premium"));
    }

    #[test]
    fn test_admin_entry_ignored_and_unknown_rejected() {
        let yaml = "free: {}\nbasic: {}\npro: {}\nelite: {}\npremium: {}\nadmin: {x: 1}\n";
        assert!(TierTable::from_raw(serde_yaml::from_str(yaml).unwrap()).is_ok());

        let yaml = "free: {}\nbasic: {}\npro: {}\nelite: {}\npremium: {}\ngold: {}\n";
        assert!(matches!(
            TierTable::from_raw(serde_yaml::from_str(yaml).unwrap()),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_caller_roles() {
        assert!(Caller::admin(Tier::Free).is_admin());
        assert!(!Caller::user(Tier::Premium).is_admin());
    }
}
