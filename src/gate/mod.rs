//! Feature gate: local toggles merged with an optional remote override list.
//!
//! Local configuration always wins when it disables a feature. The remote
//! document can only switch a locally enabled feature off, never on.

pub mod remote;

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{Config, FeatureToggles};

pub use remote::{RemoteConfigSnapshot, RemoteOverride};

/// Reason reported when a remote entry disables a feature without saying why.
pub const UNSPECIFIED_REASON: &str = "disabled by remote configuration";

/// Stable feature identifiers shared by the local config and the remote document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FeatureId {
    /// Idle auto-pause on first start.
    AutoPause,
    /// Entity spawn suppression while idle-paused.
    SpawnBlocker,
    /// Terrain mesh leak remediation.
    TerrainLeak,
}

impl FeatureId {
    /// Every feature, in display order.
    pub const ALL: [FeatureId; 3] = [Self::AutoPause, Self::SpawnBlocker, Self::TerrainLeak];

    /// Stable string key.
    pub fn key(self) -> &'static str {
        match self {
            Self::AutoPause => "AutoPause",
            Self::SpawnBlocker => "SpawnBlocker",
            Self::TerrainLeak => "TerrainLeak",
        }
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.key())
    }
}

/// Error for an unrecognised feature key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown feature id `{0}`")]
pub struct UnknownFeature(pub String);

impl FromStr for FeatureId {
    type Err = UnknownFeature;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|id| id.key() == s)
            .ok_or_else(|| UnknownFeature(s.to_owned()))
    }
}

/// Derived view of one feature's enablement inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureDecision {
    /// The feature.
    pub feature: FeatureId,
    /// Local toggle.
    pub local_enabled: bool,
    /// Remote entry, when the remote snapshot is consulted and has one.
    pub remote_override: Option<RemoteOverride>,
}

impl FeatureDecision {
    /// `local AND remote`, with an absent remote entry counting as enabled.
    pub fn effective(&self) -> bool {
        self.local_enabled
            && self
                .remote_override
                .as_ref()
                .map_or(true, |remote| remote.enabled)
    }
}

/// Merges local toggles with the remote snapshot.
#[derive(Debug)]
pub struct FeatureGate {
    local: FeatureToggles,
    killswitch_enabled: bool,
    snapshot: Option<RemoteConfigSnapshot>,
    reported: Mutex<HashSet<FeatureId>>,
}

impl FeatureGate {
    /// Build a gate from explicit inputs.
    pub fn new(
        local: FeatureToggles,
        killswitch_enabled: bool,
        snapshot: Option<RemoteConfigSnapshot>,
    ) -> Self {
        if killswitch_enabled {
            if let Some(message) = snapshot.as_ref().and_then(|s| s.message.as_deref()) {
                info!(message = %message, "remote config message");
            }
        }
        Self {
            local,
            killswitch_enabled,
            snapshot,
            reported: Mutex::new(HashSet::new()),
        }
    }

    /// Gate that only consults local toggles.
    pub fn local_only(local: FeatureToggles) -> Self {
        Self::new(local, false, None)
    }

    /// Build the gate for `config`, fetching the remote snapshot when configured.
    ///
    /// Never fails: any fetch or parse problem degrades to local-only.
    pub async fn from_config(config: &Config) -> Self {
        let snapshot = match config.remote_url() {
            Some(url) => remote::load_snapshot(&url, config.remote.timeout()).await,
            None => None,
        };
        Self::new(config.features, config.remote.killswitch_enabled, snapshot)
    }

    /// The remote snapshot, if one was fetched.
    pub fn snapshot(&self) -> Option<&RemoteConfigSnapshot> {
        self.snapshot.as_ref()
    }

    fn consulted_override(&self, feature: FeatureId) -> Option<&RemoteOverride> {
        if !self.killswitch_enabled {
            return None;
        }
        self.snapshot.as_ref()?.features.get(&feature)
    }

    /// Effective enablement for `feature` given its local toggle.
    pub fn effective(&self, feature: FeatureId, local_enabled: bool) -> bool {
        if !local_enabled {
            return false;
        }
        match self.consulted_override(feature) {
            Some(remote) if !remote.enabled => {
                self.report_disabled(feature, remote);
                false
            }
            _ => local_enabled,
        }
    }

    /// Effective enablement using the configured local toggle.
    pub fn is_enabled(&self, feature: FeatureId) -> bool {
        self.effective(feature, self.local.get(feature))
    }

    /// Why the remote snapshot disables `feature`, if it does.
    pub fn disabled_reason(&self, feature: FeatureId) -> Option<String> {
        self.consulted_override(feature)
            .filter(|remote| !remote.enabled)
            .map(|remote| {
                remote
                    .reason
                    .clone()
                    .unwrap_or_else(|| UNSPECIFIED_REASON.to_owned())
            })
    }

    /// One decision per feature, for diagnostics.
    pub fn decisions(&self) -> Vec<FeatureDecision> {
        FeatureId::ALL
            .into_iter()
            .map(|feature| FeatureDecision {
                feature,
                local_enabled: self.local.get(feature),
                remote_override: self.consulted_override(feature).cloned(),
            })
            .collect()
    }

    fn report_disabled(&self, feature: FeatureId, remote: &RemoteOverride) {
        let mut reported = self.reported.lock().unwrap_or_else(PoisonError::into_inner);
        if reported.insert(feature) {
            warn!(
                feature = %feature,
                reason = remote.reason.as_deref().unwrap_or(UNSPECIFIED_REASON),
                "feature disabled by remote configuration"
            );
        }
    }
}
