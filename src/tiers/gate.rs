//! Tier gate: allow/deny a capability and clamp numeric asks to the caller's
//! tier ceiling before any request is built.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use super::{Caller, TierTable};
use crate::error::DeniedError;

/// Something a caller may ask to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    WebSearch,
    QueryUploadedDocs,
    DocumentSummarization,
    DataAnalysis,
    AgentModules,
    ProviderCall,
}

/// Flags consulted for a capability.
struct CapabilityRule {
    /// Boolean flag that must be `true`. Missing counts as disabled.
    switch: Option<&'static str>,
    /// `(request parameter, ceiling flag)` pairs.
    ceilings: &'static [(&'static str, &'static str)],
}

impl Capability {
    fn rule(&self) -> CapabilityRule {
        match self {
            Capability::WebSearch => CapabilityRule {
                switch: None,
                ceilings: &[
                    ("max_chars", "web_search_limit_chars"),
                    ("max_results", "web_search_max_results"),
                ],
            },
            Capability::QueryUploadedDocs => CapabilityRule {
                switch: None,
                ceilings: &[
                    ("files", "uploaded_docs_max_files"),
                    ("k", "uploaded_docs_max_results"),
                ],
            },
            Capability::DocumentSummarization => CapabilityRule {
                switch: Some("document_summarization_enabled"),
                ceilings: &[],
            },
            Capability::DataAnalysis => CapabilityRule {
                switch: Some("data_analysis_enabled"),
                ceilings: &[],
            },
            Capability::AgentModules => CapabilityRule {
                switch: None,
                ceilings: &[("modules", "max_agent_modules")],
            },
            Capability::ProviderCall => CapabilityRule {
                switch: None,
                ceilings: &[
                    ("max_results", "api_max_results"),
                    ("limit", "api_max_results"),
                ],
            },
        }
    }

    /// Ceiling flag for the number of results, when the capability has one.
    pub fn results_flag(&self) -> Option<&'static str> {
        match self {
            Capability::WebSearch => Some("web_search_max_results"),
            Capability::QueryUploadedDocs => Some("uploaded_docs_max_results"),
            Capability::ProviderCall => Some("api_max_results"),
            Capability::DocumentSummarization
            | Capability::DataAnalysis
            | Capability::AgentModules => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::WebSearch => "web search",
            Capability::QueryUploadedDocs => "uploaded document search",
            Capability::DocumentSummarization => "document summarization",
            Capability::DataAnalysis => "data analysis",
            Capability::AgentModules => "agent modules",
            Capability::ProviderCall => "provider calls",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A numeric ask that was lowered to the tier ceiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advisory {
    pub param: String,
    pub requested: i64,
    pub ceiling: i64,
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} limited to {} on your plan (requested {})",
            self.param, self.ceiling, self.requested
        )
    }
}

/// Parameters after gating.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Authorization {
    pub params: IndexMap<String, String>,
    pub advisories: Vec<Advisory>,
}

impl Authorization {
    pub fn was_clamped(&self) -> bool {
        !self.advisories.is_empty()
    }
}

/// A single clamped value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clamped {
    pub value: i64,
    pub advisory: bool,
}

/// Decides what a caller's tier allows.
#[derive(Debug, Clone)]
pub struct TierGate {
    table: Arc<TierTable>,
}

impl TierGate {
    pub fn new(table: Arc<TierTable>) -> Self {
        Self { table }
    }

    /// Check `capability` for `caller` and clamp any ceilinged parameters.
    ///
    /// Parameters without a ceiling pass through untouched.
    pub fn authorize(
        &self,
        caller: &Caller,
        capability: Capability,
        requested: &IndexMap<String, String>,
    ) -> Result<Authorization, DeniedError> {
        self.authorize_counted(caller, capability, requested, None)
    }

    /// Like [`authorize`](Self::authorize), also clamping a provider's own
    /// result-count parameter (e.g. `num`) against the capability's results
    /// ceiling.
    pub fn authorize_counted(
        &self,
        caller: &Caller,
        capability: Capability,
        requested: &IndexMap<String, String>,
        count_param: Option<&str>,
    ) -> Result<Authorization, DeniedError> {
        if caller.is_admin() {
            tracing::debug!(%capability, "Admin caller bypasses tier gate");
            return Ok(Authorization {
                params: requested.clone(),
                advisories: Vec::new(),
            });
        }

        let rule = capability.rule();
        let profile = self.table.profile(caller.tier);

        if let Some(switch) = rule.switch
            && profile.enabled(switch) != Some(true)
        {
            tracing::info!(tier = %caller.tier, %capability, "Capability denied by tier");
            return Err(DeniedError::CapabilityDisabled {
                tier: caller.tier.to_string(),
                capability: capability.to_string(),
            });
        }

        let mut ceilings: Vec<(&str, &str)> = rule.ceilings.to_vec();
        if let Some((param, flag)) = count_param.zip(capability.results_flag())
            && !ceilings.iter().any(|(p, _)| *p == param)
        {
            ceilings.push((param, flag));
        }

        let mut params = requested.clone();
        let mut advisories = Vec::new();
        for (param, flag) in ceilings {
            let Some(raw) = params.get_mut(param) else {
                continue;
            };
            let Some(ceiling) = profile.ceiling(flag) else {
                continue;
            };
            let asked: i64 = raw.trim().parse().map_err(|_| DeniedError::NonNumericQuota {
                capability: capability.to_string(),
                param: param.to_string(),
                value: raw.clone(),
            })?;
            if asked > ceiling {
                tracing::info!(
                    tier = %caller.tier,
                    %capability,
                    param,
                    requested = asked,
                    ceiling,
                    "Clamped request to tier ceiling"
                );
                *raw = ceiling.to_string();
                advisories.push(Advisory {
                    param: param.to_string(),
                    requested: asked,
                    ceiling,
                });
            }
        }

        Ok(Authorization { params, advisories })
    }

    /// Clamp one numeric ask, e.g. the character budget of a web search.
    pub fn clamp(
        &self,
        caller: &Caller,
        capability: Capability,
        param: &str,
        requested: i64,
    ) -> Result<Clamped, DeniedError> {
        let mut params = IndexMap::new();
        params.insert(param.to_string(), requested.to_string());
        let auth = self.authorize(caller, capability, &params)?;
        let value = auth
            .params
            .get(param)
            .and_then(|v| v.parse().ok())
            .unwrap_or(requested);
        Ok(Clamped {
            value,
            advisory: auth.was_clamped(),
        })
    }

    /// Check a capability that carries no parameters.
    pub fn check(&self, caller: &Caller, capability: Capability) -> Result<(), DeniedError> {
        self.authorize(caller, capability, &IndexMap::new()).map(|_| ())
    }
}
