//! Kubernetes resource parsing and ordering
//!
//! A rendered manifest is a multi-document YAML stream. [`parse`] splits it,
//! keeps only the handful of fields kcm needs (kind, name, namespace and the
//! `kcm/*` annotations) and re-serializes every document so that byte-level
//! comparisons between two runs are stable.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fmt;

use serde_yaml::Value as YamlValue;

use crate::annotations;
use crate::deletions::Selector;
use crate::error::{CoreError, Result};
use crate::hooks::{Hook, HookMap};

/// Namespace assumed when a document does not declare one
pub const DEFAULT_NAMESPACE: &str = "default";

/// Kind order used when applying resources
///
/// Namespaces and cluster-wide configuration come first, workloads last.
/// Deletion walks this list backwards.
pub const APPLY_ORDER: &[&str] = &[
    "Namespace",
    "ResourceQuota",
    "LimitRange",
    "PodSecurityPolicy",
    "PodDisruptionBudget",
    "Secret",
    "ConfigMap",
    "StorageClass",
    "PersistentVolume",
    "PersistentVolumeClaim",
    "ServiceAccount",
    "CustomResourceDefinition",
    "ClusterRole",
    "ClusterRoleBinding",
    "Role",
    "RoleBinding",
    "Service",
    "DaemonSet",
    "Pod",
    "ReplicationController",
    "ReplicaSet",
    "Deployment",
    "StatefulSet",
    "Job",
    "CronJob",
    "Ingress",
    "APIService",
];

/// Identity of a resource inside a cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} (namespace {})", self.kind, self.name, self.namespace)
    }
}

/// A single parsed Kubernetes document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub kind: String,
    pub name: String,
    pub namespace: String,
    /// Canonical YAML of the whole document
    pub content: String,
    /// StatefulSet annotated with `kcm/deletion-policy: delete-pvcs`
    pub delete_pvcs: bool,
    /// `spec.replicas` of a StatefulSet
    pub replicas: Option<u32>,
    /// `spec.volumeClaimTemplates[*].metadata.name` of a StatefulSet
    pub claim_templates: Vec<String>,
}

impl Resource {
    pub fn id(&self) -> ResourceId {
        ResourceId {
            kind: self.kind.clone(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    /// Same `(kind, namespace, name)`
    pub fn same_identity(&self, other: &Resource) -> bool {
        self.kind == other.kind && self.namespace == other.namespace && self.name == other.name
    }

    /// Selectors for the PersistentVolumeClaims a StatefulSet leaves behind
    ///
    /// Names follow the Kubernetes convention `<template>-<statefulset>-<ordinal>`.
    /// Only StatefulSets carrying the `delete-pvcs` deletion policy yield any.
    pub fn pvc_selectors(&self) -> Vec<Selector> {
        if self.kind != "StatefulSet" || !self.delete_pvcs {
            return Vec::new();
        }

        let replicas = self.replicas.unwrap_or(1).max(1);
        let mut selectors = Vec::new();
        for template in &self.claim_templates {
            for ordinal in 0..replicas {
                selectors.push(Selector::named(
                    "PersistentVolumeClaim",
                    format!("{}-{}-{}", template, self.name, ordinal),
                    Some(self.namespace.clone()),
                ));
            }
        }
        selectors
    }

    fn apply_rank(&self) -> usize {
        APPLY_ORDER
            .iter()
            .position(|k| *k == self.kind)
            .unwrap_or(APPLY_ORDER.len())
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Output of [`parse`]
#[derive(Debug, Clone, Default)]
pub struct ParsedDocuments {
    /// Plain resources in apply order
    pub resources: Vec<Resource>,
    /// Hooks bucketed by lifecycle type, each bucket sorted by (name, wait-for)
    pub hooks: HookMap,
}

/// Parse a multi-document YAML stream
///
/// Documents without a kind or a name are skipped, as are documents that
/// fail to parse. A Job carrying `kcm/hooks` becomes a hook; any other kind
/// with that annotation is an error.
pub fn parse(content: &str) -> Result<ParsedDocuments> {
    let mut parsed = ParsedDocuments::default();

    for (index, document) in split_documents(content).into_iter().enumerate() {
        if is_blank_document(document) {
            continue;
        }

        let value: YamlValue = match serde_yaml::from_str(document) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(document = index, error = %e, "skipping unparsable document");
                continue;
            }
        };
        if !value.is_mapping() {
            continue;
        }

        let kind = str_at(&value, &["kind"]).unwrap_or_default();
        let name = str_at(&value, &["metadata", "name"]).unwrap_or_default();
        if kind.is_empty() || name.is_empty() {
            tracing::debug!(document = index, "skipping document without kind or name");
            continue;
        }

        let namespace = str_at(&value, &["metadata", "namespace"])
            .filter(|ns| !ns.is_empty())
            .unwrap_or(DEFAULT_NAMESPACE);
        let annotations = annotations_of(&value);

        let mut resource = Resource {
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: namespace.to_string(),
            content: serde_yaml::to_string(&value)?,
            delete_pvcs: false,
            replicas: None,
            claim_templates: Vec::new(),
        };

        if resource.kind == "StatefulSet" {
            resource.delete_pvcs = annotations::get(&annotations, annotations::DELETION_POLICY)
                == Some(annotations::DELETE_PVCS);
            resource.replicas = replicas_of(&value, &resource)?;
            resource.claim_templates = claim_templates(&value);
        }

        if annotations.contains_key(annotations::HOOKS) {
            let hook = Hook::from_resource(resource, &annotations)?;
            for hook_type in hook.types.clone() {
                parsed.hooks.entry(hook_type).or_default().push(hook.clone());
            }
        } else {
            parsed.resources.push(resource);
        }
    }

    sort_for_apply(&mut parsed.resources);
    for bucket in parsed.hooks.values_mut() {
        bucket.sort_by(|a, b| {
            (&a.resource.name, &a.wait_for).cmp(&(&b.resource.name, &b.wait_for))
        });
    }

    Ok(parsed)
}

/// Join resources into a single YAML stream
pub fn serialize(resources: &[Resource]) -> String {
    if resources.is_empty() {
        return String::new();
    }
    let mut out = resources
        .iter()
        .map(|r| r.content.trim())
        .collect::<Vec<_>>()
        .join("\n---\n");
    out.push('\n');
    out
}

/// Sort in apply order: listed kinds by rank, unknown kinds after them by kind
pub fn sort_for_apply(resources: &mut [Resource]) {
    resources.sort_by(|a, b| {
        (a.apply_rank(), &a.kind, &a.name, &a.namespace)
            .cmp(&(b.apply_rank(), &b.kind, &b.name, &b.namespace))
    });
}

/// Sort in delete order: unknown kinds first, then listed kinds in reverse rank
pub fn sort_for_delete(resources: &mut [Resource]) {
    resources.sort_by(|a, b| {
        (Reverse(a.apply_rank()), &a.kind, &a.name, &a.namespace)
            .cmp(&(Reverse(b.apply_rank()), &b.kind, &b.name, &b.namespace))
    });
}

/// Find the resource with the same identity as `needle`
pub fn find_matching<'a>(resources: &'a [Resource], needle: &Resource) -> Option<&'a Resource> {
    resources.iter().find(|r| r.same_identity(needle))
}

/// True when a document holds nothing but whitespace and comments
pub(crate) fn is_blank_document(document: &str) -> bool {
    document.lines().all(|line| {
        let line = line.trim();
        line.is_empty() || line.starts_with('#')
    })
}

fn split_documents(content: &str) -> Vec<&str> {
    let mut documents = Vec::new();
    let mut start = 0;
    let mut offset = 0;

    for line in content.split_inclusive('\n') {
        if is_separator(line) {
            documents.push(&content[start..offset]);
            start = offset + line.len();
        }
        offset += line.len();
    }
    documents.push(&content[start..]);
    documents
}

fn is_separator(line: &str) -> bool {
    let Some(rest) = line.strip_prefix("---") else {
        return false;
    };
    let rest = rest.trim();
    rest.is_empty() || rest.starts_with('#')
}

fn at<'a>(value: &'a YamlValue, path: &[&str]) -> Option<&'a YamlValue> {
    path.iter().try_fold(value, |v, key| v.get(*key))
}

fn str_at<'a>(value: &'a YamlValue, path: &[&str]) -> Option<&'a str> {
    at(value, path).and_then(YamlValue::as_str)
}

fn annotations_of(value: &YamlValue) -> BTreeMap<String, String> {
    let Some(mapping) = at(value, &["metadata", "annotations"]).and_then(YamlValue::as_mapping)
    else {
        return BTreeMap::new();
    };

    mapping
        .iter()
        .filter_map(|(k, v)| {
            let key = k.as_str()?.to_string();
            let value = match v {
                YamlValue::String(s) => s.clone(),
                YamlValue::Bool(b) => b.to_string(),
                YamlValue::Number(n) => n.to_string(),
                _ => return None,
            };
            Some((key, value))
        })
        .collect()
}

/// `spec.replicas`, bounded by what the API server accepts (an int32)
fn replicas_of(value: &YamlValue, resource: &Resource) -> Result<Option<u32>> {
    let Some(replicas) = at(value, &["spec", "replicas"]).and_then(YamlValue::as_u64) else {
        return Ok(None);
    };
    match u32::try_from(replicas) {
        Ok(count) if count <= i32::MAX as u32 => Ok(Some(count)),
        _ => Err(CoreError::InvalidField {
            resource: resource.to_string(),
            field: "spec.replicas".to_string(),
            value: replicas.to_string(),
            reason: format!("must not exceed {}", i32::MAX),
        }),
    }
}

fn claim_templates(value: &YamlValue) -> Vec<String> {
    at(value, &["spec", "volumeClaimTemplates"])
        .and_then(YamlValue::as_sequence)
        .map(|templates| {
            templates
                .iter()
                .filter_map(|t| str_at(t, &["metadata", "name"]))
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
