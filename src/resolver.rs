//! Symbol resolution against the host's runtime type information.
//!
//! Each [`InterceptTarget`] is resolved once and the outcome is cached for
//! the lifetime of the process: the host's type layout cannot change
//! without a restart, so a failed lookup is never retried. Failures are
//! logged the first time they are seen and surface downstream as
//! [`Capability::Unavailable`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use crate::host::{MemberToken, TypeCatalog};

/// Identifies a host operation or field to bind against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterceptTarget {
    /// Declaring host type.
    pub owner_type: &'static str,
    /// Member name on that type.
    pub member: &'static str,
    /// Ordered parameter type names, when the member is overloaded.
    pub signature: Option<&'static [&'static str]>,
}

impl InterceptTarget {
    /// Target a member by name only.
    pub const fn named(owner_type: &'static str, member: &'static str) -> Self {
        Self {
            owner_type,
            member,
            signature: None,
        }
    }

    /// Target a member by name and exact parameter list.
    pub const fn with_signature(
        owner_type: &'static str,
        member: &'static str,
        signature: &'static [&'static str],
    ) -> Self {
        Self {
            owner_type,
            member,
            signature: Some(signature),
        }
    }
}

impl fmt::Display for InterceptTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.owner_type, self.member)?;
        if let Some(sig) = self.signature {
            write!(f, "({})", sig.join(", "))?;
        }
        Ok(())
    }
}

/// A target bound to a concrete host member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedHandle {
    /// The target that was resolved.
    pub target: InterceptTarget,
    /// Host member token.
    pub token: MemberToken,
}

/// Why a target could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// The owner type does not exist in the host.
    #[error("type `{0}` not found")]
    TypeNotFound(String),
    /// No member matches the name (and signature, when given).
    #[error("member `{member}` not found on `{owner}`")]
    MemberNotFound {
        /// Owner type name.
        owner: String,
        /// Requested member name.
        member: String,
    },
    /// More than one member matches and no signature disambiguates them.
    #[error("member `{member}` on `{owner}` is ambiguous ({candidates} overloads)")]
    Ambiguous {
        /// Owner type name.
        owner: String,
        /// Requested member name.
        member: String,
        /// Number of matching overloads.
        candidates: usize,
    },
}

/// Outcome of resolving one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The target was bound.
    Bound(ResolvedHandle),
    /// The target could not be bound; the dependent feature stays inert.
    Unresolved {
        /// The target that failed.
        target: InterceptTarget,
        /// Failure cause.
        error: ResolveError,
    },
}

impl Resolution {
    /// The bound handle, if any.
    pub fn handle(&self) -> Option<ResolvedHandle> {
        match self {
            Self::Bound(handle) => Some(*handle),
            Self::Unresolved { .. } => None,
        }
    }
}

/// A capability that is either bound and usable or tagged unavailable.
pub enum Capability<T> {
    /// Resolved and bound.
    Available(T),
    /// Not usable this session.
    Unavailable {
        /// Human-readable cause.
        reason: String,
    },
}

impl<T> Capability<T> {
    /// Borrow the bound value.
    pub fn get(&self) -> Option<&T> {
        match self {
            Self::Available(value) => Some(value),
            Self::Unavailable { .. } => None,
        }
    }
}

impl<T> fmt::Debug for Capability<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available(_) => f.write_str("Available"),
            Self::Unavailable { reason } => {
                f.debug_struct("Unavailable").field("reason", reason).finish()
            }
        }
    }
}

/// Resolves targets against a [`TypeCatalog`], caching every outcome.
pub struct SymbolResolver {
    catalog: Arc<dyn TypeCatalog>,
    cache: Mutex<HashMap<InterceptTarget, Resolution>>,
}

impl fmt::Debug for SymbolResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cached = self
            .cache
            .lock()
            .map(|cache| cache.len())
            .unwrap_or_default();
        f.debug_struct("SymbolResolver")
            .field("cached", &cached)
            .finish()
    }
}

impl SymbolResolver {
    /// Create a resolver over the host catalog.
    pub fn new(catalog: Arc<dyn TypeCatalog>) -> Self {
        Self {
            catalog,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a target. Never panics; failures are logged once per target.
    pub fn resolve(&self, target: InterceptTarget) -> Resolution {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(hit) = cache.get(&target) {
            return hit.clone();
        }

        let resolution = match lookup(self.catalog.as_ref(), target) {
            Ok(token) => {
                debug!(target = %target, "resolved intercept target");
                Resolution::Bound(ResolvedHandle { target, token })
            }
            Err(error) => {
                warn!(target = %target, error = %error, "intercept target unresolved");
                Resolution::Unresolved { target, error }
            }
        };
        cache.insert(target, resolution.clone());
        resolution
    }

    /// Resolve several targets, returning handles only if all of them bind.
    pub fn resolve_all(&self, targets: &[InterceptTarget]) -> Result<Vec<ResolvedHandle>, ResolveError> {
        targets
            .iter()
            .map(|target| match self.resolve(*target) {
                Resolution::Bound(handle) => Ok(handle),
                Resolution::Unresolved { error, .. } => Err(error),
            })
            .collect()
    }

    /// Every outcome resolved so far.
    pub fn resolutions(&self) -> Vec<Resolution> {
        let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.values().cloned().collect()
    }
}

fn lookup(catalog: &dyn TypeCatalog, target: InterceptTarget) -> Result<MemberToken, ResolveError> {
    let info = catalog
        .find_type(target.owner_type)
        .ok_or_else(|| ResolveError::TypeNotFound(target.owner_type.to_owned()))?;

    let candidates: Vec<_> = info
        .members
        .iter()
        .filter(|m| m.name == target.member)
        .filter(|m| match target.signature {
            Some(sig) => m.parameters.iter().map(String::as_str).eq(sig.iter().copied()),
            None => true,
        })
        .collect();

    match candidates.as_slice() {
        [] => Err(ResolveError::MemberNotFound {
            owner: target.owner_type.to_owned(),
            member: target.member.to_owned(),
        }),
        [only] => Ok(only.token),
        many => Err(ResolveError::Ambiguous {
            owner: target.owner_type.to_owned(),
            member: target.member.to_owned(),
            candidates: many.len(),
        }),
    }
}
