// ABOUTME: Operator scopes — named capabilities granted to an auth context.
// ABOUTME: The local console token carries the full admin set.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A capability the boundary can grant to a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Read,
    Write,
    Approvals,
    Admin,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Scope::Read => "read",
            Scope::Write => "write",
            Scope::Approvals => "approvals",
            Scope::Admin => "admin",
        };
        f.write_str(s)
    }
}

/// Per-request identity: the presented token and the scopes it carries.
/// Immutable for the duration of a turn.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub token: String,
    pub scopes: BTreeSet<Scope>,
}

impl AuthContext {
    pub fn new(token: impl Into<String>, scopes: impl IntoIterator<Item = Scope>) -> Self {
        Self {
            token: token.into(),
            scopes: scopes.into_iter().collect(),
        }
    }

    /// The full scope set issued to the trusted local console.
    pub fn admin(token: impl Into<String>) -> Self {
        Self::new(
            token,
            [Scope::Read, Scope::Write, Scope::Approvals, Scope::Admin],
        )
    }

    pub fn has(&self, scope: Scope) -> bool {
        self.scopes.contains(&scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_displays_lowercase() {
        assert_eq!(Scope::Write.to_string(), "write");
        assert_eq!(Scope::Approvals.to_string(), "approvals");
    }

    #[test]
    fn scope_serde_roundtrip() {
        let json = serde_json::to_string(&Scope::Admin).unwrap();
        assert_eq!(json, "\"admin\"");
        let parsed: Scope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, Scope::Admin);
    }

    #[test]
    fn admin_context_has_all_scopes() {
        let ctx = AuthContext::admin("tok");
        for s in [Scope::Read, Scope::Write, Scope::Approvals, Scope::Admin] {
            assert!(ctx.has(s));
        }
    }

    #[test]
    fn restricted_context_lacks_write() {
        let ctx = AuthContext::new("tok", [Scope::Read]);
        assert!(ctx.has(Scope::Read));
        assert!(!ctx.has(Scope::Write));
    }
}
