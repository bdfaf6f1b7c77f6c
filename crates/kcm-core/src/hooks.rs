//! Lifecycle hooks
//!
//! A hook is a `Job` annotated with `kcm/hooks`. It is applied like any
//! other resource, but at a fixed point of a revision, and can be waited on
//! and cleaned up once it completed.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::annotations;
use crate::error::{CoreError, Result};
use crate::resource::Resource;

/// Hook lifecycle type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookType {
    /// Before resources are applied
    PreApply,
    /// After resources were applied
    PostApply,
    /// Before a manifest is removed
    PreDelete,
    /// After a manifest was removed
    PostDelete,
}

impl HookType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookType::PreApply => "pre-apply",
            HookType::PostApply => "post-apply",
            HookType::PreDelete => "pre-delete",
            HookType::PostDelete => "post-delete",
        }
    }
}

impl fmt::Display for HookType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookType {
    type Err = String;

    /// Accepts the canonical names plus the legacy create/upgrade spellings
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "pre-apply" | "pre-create" | "pre-upgrade" => Ok(HookType::PreApply),
            "post-apply" | "post-create" | "post-upgrade" => Ok(HookType::PostApply),
            "pre-delete" => Ok(HookType::PreDelete),
            "post-delete" => Ok(HookType::PostDelete),
            other => Err(format!("unknown hook type '{}'", other)),
        }
    }
}

/// Hooks of a manifest, bucketed by type
pub type HookMap = BTreeMap<HookType, Vec<Hook>>;

/// A hook Job with its lifecycle policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hook {
    pub resource: Resource,
    /// Every type this hook was declared for, deduplicated
    pub types: Vec<HookType>,
    /// Opaque `kcm/hook-policy` value
    pub policy: Option<String>,
    /// Condition for `kubectl wait --for`
    pub wait_for: Option<String>,
    pub wait_timeout: Option<Duration>,
    pub delete_after_completion: bool,
}

impl Hook {
    /// Build a hook from a parsed resource and its annotations
    pub fn from_resource(resource: Resource, annotations: &BTreeMap<String, String>) -> Result<Self> {
        if resource.kind != "Job" {
            return Err(CoreError::UnsupportedHookKind {
                kind: resource.kind,
                name: resource.name,
            });
        }

        let invalid = |annotation: &str, value: &str, reason: String| CoreError::InvalidAnnotation {
            resource: resource.to_string(),
            annotation: annotation.to_string(),
            value: value.to_string(),
            reason,
        };

        let raw_types = annotations
            .get(annotations::HOOKS)
            .map(String::as_str)
            .unwrap_or_default();
        let mut types = Vec::new();
        for name in annotations::split_list(raw_types) {
            let hook_type = name
                .parse::<HookType>()
                .map_err(|reason| invalid(annotations::HOOKS, raw_types, reason))?;
            if !types.contains(&hook_type) {
                types.push(hook_type);
            }
        }
        if types.is_empty() {
            return Err(invalid(
                annotations::HOOKS,
                raw_types,
                "no hook type given".to_string(),
            ));
        }

        let wait_timeout = match annotations::get(annotations, annotations::WAIT_TIMEOUT) {
            Some(raw) => Some(annotations::parse_duration(raw).ok_or_else(|| {
                invalid(
                    annotations::WAIT_TIMEOUT,
                    raw,
                    "expected a duration such as 90s or 5m".to_string(),
                )
            })?),
            None => None,
        };

        let delete_after_completion =
            match annotations::get(annotations, annotations::DELETE_AFTER_COMPLETION) {
                Some(raw) => annotations::parse_bool(raw).ok_or_else(|| {
                    invalid(
                        annotations::DELETE_AFTER_COMPLETION,
                        raw,
                        "expected true or false".to_string(),
                    )
                })?,
                None => false,
            };

        let policy = annotations::get(annotations, annotations::HOOK_POLICY).map(str::to_string);
        let wait_for = annotations::get(annotations, annotations::WAIT_FOR).map(str::to_string);

        Ok(Self {
            resource,
            types,
            policy,
            wait_for,
            wait_timeout,
            delete_after_completion,
        })
    }

    pub fn name(&self) -> &str {
        &self.resource.name
    }

    /// Condition to wait on after applying, if any
    ///
    /// A hook deleted after completion is always waited on, falling back to
    /// `condition=complete`, so a running Job is never removed.
    pub fn effective_wait_for(&self) -> Option<&str> {
        match (&self.wait_for, self.delete_after_completion) {
            (Some(condition), _) => Some(condition),
            (None, true) => Some("condition=complete"),
            (None, false) => None,
        }
    }

    /// Neither waited on nor cleaned up
    pub fn is_fire_and_forget(&self) -> bool {
        self.wait_for.is_none() && !self.delete_after_completion
    }
}
