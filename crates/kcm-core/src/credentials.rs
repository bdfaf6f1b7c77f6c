//! Cluster credentials

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::values::Values;

/// How the cluster client authenticates
///
/// Either a kubeconfig (with an optional context) or a server URL plus a
/// bearer token. The kubeconfig may be a path or inline file content.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

impl Credentials {
    /// Read the `server`, `token`, `kubeconfig` and `context` keys
    pub fn from_values(values: &Values) -> Self {
        let get = |key: &str| values.get_str(key).map(str::to_string);
        Self {
            server: get("server"),
            token: get("token"),
            kubeconfig: get("kubeconfig"),
            context: get("context"),
        }
    }

    pub fn server(&self) -> Option<&str> {
        non_empty(&self.server)
    }

    pub fn token(&self) -> Option<&str> {
        non_empty(&self.token)
    }

    pub fn kubeconfig(&self) -> Option<&str> {
        non_empty(&self.kubeconfig)
    }

    pub fn context(&self) -> Option<&str> {
        non_empty(&self.context)
    }

    /// All four fields empty
    pub fn is_empty(&self) -> bool {
        self.server().is_none()
            && self.token().is_none()
            && self.kubeconfig().is_none()
            && self.context().is_none()
    }

    /// Fail with `EmptyCredentials` when nothing is set
    pub fn ensure_not_empty(self) -> Result<Self> {
        if self.is_empty() {
            return Err(CoreError::EmptyCredentials);
        }
        Ok(self)
    }

    /// The kubeconfig holds file content rather than a path
    pub fn is_inline_kubeconfig(&self) -> bool {
        self.kubeconfig().is_some_and(|k| k.contains('\n'))
    }

    /// Fill unset fields from `other`
    pub fn or(self, other: Credentials) -> Self {
        Self {
            server: self.server.filter(|s| !s.is_empty()).or(other.server),
            token: self.token.filter(|s| !s.is_empty()).or(other.token),
            kubeconfig: self.kubeconfig.filter(|s| !s.is_empty()).or(other.kubeconfig),
            context: self.context.filter(|s| !s.is_empty()).or(other.context),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kubeconfig = match self.kubeconfig() {
            Some(_) if self.is_inline_kubeconfig() => Some("<inline>"),
            other => other,
        };
        f.debug_struct("Credentials")
            .field("server", &self.server())
            .field("token", &self.token().map(|_| "***"))
            .field("kubeconfig", &kubeconfig)
            .field("context", &self.context())
            .finish()
    }
}
