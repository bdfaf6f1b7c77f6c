//! Revisions and change sets
//!
//! A revision pairs the manifest currently on disk with the freshly rendered
//! one of the same name. Its change set tells the upgrader what to apply and
//! what to delete.

use std::fmt;

use crate::deletions::Selector;
use crate::hooks::HookMap;
use crate::manifest::Manifest;
use crate::resource::{self, Resource, find_matching};

/// The kind of transition a revision represents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionKind {
    /// Manifest rendered for the first time
    Initial,
    /// Manifest present on both sides
    Upgrade,
    /// Manifest no longer rendered
    Removal,
}

impl fmt::Display for RevisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RevisionKind::Initial => "initial",
            RevisionKind::Upgrade => "upgrade",
            RevisionKind::Removal => "removal",
        };
        f.write_str(s)
    }
}

/// A `(current, next)` pair for one manifest name
#[derive(Debug, Clone)]
pub enum Revision {
    Initial { next: Manifest },
    Upgrade { current: Manifest, next: Manifest },
    Removal { current: Manifest },
}

impl Revision {
    pub fn kind(&self) -> RevisionKind {
        match self {
            Revision::Initial { .. } => RevisionKind::Initial,
            Revision::Upgrade { .. } => RevisionKind::Upgrade,
            Revision::Removal { .. } => RevisionKind::Removal,
        }
    }

    /// Name of the manifest this revision is about
    pub fn name(&self) -> &str {
        match self {
            Revision::Initial { next } | Revision::Upgrade { next, .. } => &next.name,
            Revision::Removal { current } => &current.name,
        }
    }

    pub fn current(&self) -> Option<&Manifest> {
        match self {
            Revision::Initial { .. } => None,
            Revision::Upgrade { current, .. } | Revision::Removal { current } => Some(current),
        }
    }

    pub fn next(&self) -> Option<&Manifest> {
        match self {
            Revision::Initial { next } | Revision::Upgrade { next, .. } => Some(next),
            Revision::Removal { .. } => None,
        }
    }

    /// Turn any revision into the removal of what is deployed
    ///
    /// The on-disk manifest wins; a manifest only known from rendering is
    /// removed as rendered.
    pub fn into_removal(self) -> Revision {
        match self {
            Revision::Initial { next } => Revision::Removal { current: next },
            Revision::Upgrade { current, .. } | Revision::Removal { current } => {
                Revision::Removal { current }
            }
        }
    }

    /// Compute what changes between both sides
    pub fn change_set(&self) -> ChangeSet {
        match self {
            Revision::Initial { next } => ChangeSet {
                added: next.resources.clone(),
                hooks: next.hooks.clone(),
                ..Default::default()
            },
            Revision::Removal { current } => ChangeSet {
                removed: current.resources.clone(),
                hooks: current.hooks.clone(),
                ..Default::default()
            },
            Revision::Upgrade { current, next } => {
                let mut set = ChangeSet {
                    hooks: next.hooks.clone(),
                    ..Default::default()
                };
                for old in &current.resources {
                    match find_matching(&next.resources, old) {
                        None => set.removed.push(old.clone()),
                        Some(new) if new.content == old.content => set.unchanged.push(new.clone()),
                        Some(new) => set.changed.push(new.clone()),
                    }
                }
                for new in &next.resources {
                    if find_matching(&current.resources, new).is_none() {
                        set.added.push(new.clone());
                    }
                }
                set
            }
        }
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.kind())
    }
}

/// Pair current manifests with next manifests by name
///
/// Current manifests come first in their own order, followed by manifests
/// that only exist in `next`, in `next` order.
pub fn build_revisions(current: Vec<Manifest>, next: Vec<Manifest>) -> Vec<Revision> {
    let mut next: Vec<Option<Manifest>> = next.into_iter().map(Some).collect();
    let mut revisions = Vec::with_capacity(current.len() + next.len());

    for current in current {
        let matched = next
            .iter_mut()
            .find(|n| n.as_ref().is_some_and(|n| n.matches(&current)))
            .and_then(Option::take);
        revisions.push(match matched {
            Some(next) => Revision::Upgrade { current, next },
            None => Revision::Removal { current },
        });
    }

    revisions.extend(next.into_iter().flatten().map(|next| Revision::Initial { next }));
    revisions
}

/// What a revision adds, changes, keeps and removes
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub added: Vec<Resource>,
    /// Resources whose content differs, carrying the next content
    pub changed: Vec<Resource>,
    pub unchanged: Vec<Resource>,
    pub removed: Vec<Resource>,
    pub hooks: HookMap,
}

impl ChangeSet {
    /// Resources to apply, in apply order
    pub fn to_apply(&self, include_unchanged: bool) -> Vec<Resource> {
        let mut resources: Vec<Resource> = self
            .changed
            .iter()
            .chain(&self.added)
            .cloned()
            .collect();
        if include_unchanged {
            resources.extend(self.unchanged.iter().cloned());
        }
        resource::sort_for_apply(&mut resources);
        resources
    }

    /// Resources to delete, in delete order
    pub fn to_delete(&self) -> Vec<Resource> {
        let mut resources = self.removed.clone();
        resource::sort_for_delete(&mut resources);
        resources
    }

    /// PVC selectors of removed StatefulSets carrying the delete-pvcs policy
    pub fn pvc_deletions(&self) -> Vec<Selector> {
        self.to_delete()
            .iter()
            .flat_map(Resource::pvc_selectors)
            .collect()
    }

    /// Any resource added, changed or removed
    pub fn has_changes(&self) -> bool {
        !self.added.is_empty() || !self.changed.is_empty() || !self.removed.is_empty()
    }

    /// Nothing to do at all, hooks included
    pub fn is_empty(&self) -> bool {
        !self.has_changes() && self.hooks.values().all(Vec::is_empty)
    }

    pub fn summary(&self) -> String {
        format!(
            "{} added, {} changed, {} unchanged, {} removed",
            self.added.len(),
            self.changed.len(),
            self.unchanged.len(),
            self.removed.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceId;
    use std::collections::BTreeSet;

    fn manifest(name: &str, content: &str) -> Manifest {
        Manifest::parse(name, content).unwrap()
    }

    fn names(resources: &[Resource]) -> Vec<&str> {
        resources.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn test_build_revisions_pairs_by_name() {
        let current = vec![manifest("a", ""), manifest("b", "")];
        let next = vec![manifest("c", ""), manifest("a", ""), manifest("d", "")];

        let revisions = build_revisions(current, next);
        let described: Vec<_> = revisions.iter().map(|r| r.to_string()).collect();
        assert_eq!(
            described,
            vec!["a (upgrade)", "b (removal)", "c (initial)", "d (initial)"]
        );
    }

    #[test]
    fn test_initial_change_set() {
        let revision = Revision::Initial {
            next: manifest(
                "m1",
                "kind: Deployment\nmetadata:\n  name: d-a\n---\nkind: ConfigMap\nmetadata:\n  name: cm-a\n",
            ),
        };
        let set = revision.change_set();
        assert_eq!(names(&set.to_apply(false)), vec!["cm-a", "d-a"]);
        assert!(set.removed.is_empty());
        assert!(set.has_changes());
    }

    #[test]
    fn test_upgrade_detects_changed_content() {
        let revision = Revision::Upgrade {
            current: manifest("m1", "kind: ConfigMap\nmetadata:\n  name: cm-a\ndata:\n  v: X\n"),
            next: manifest("m1", "kind: ConfigMap\nmetadata:\n  name: cm-a\ndata:\n  v: Y\n"),
        };
        let set = revision.change_set();

        assert_eq!(names(&set.changed), vec!["cm-a"]);
        assert!(set.added.is_empty() && set.unchanged.is_empty() && set.removed.is_empty());
        assert!(set.changed[0].content.contains("v: Y"));
    }

    #[test]
    fn test_upgrade_buckets_are_disjoint_and_complete() {
        let revision = Revision::Upgrade {
            current: manifest(
                "m1",
                "kind: ConfigMap\nmetadata:\n  name: same\n---\nkind: ConfigMap\nmetadata:\n  name: edit\ndata: {a: b}\n---\nkind: Secret\nmetadata:\n  name: gone\n",
            ),
            next: manifest(
                "m1",
                "kind: ConfigMap\nmetadata:\n  name: same\n---\nkind: ConfigMap\nmetadata:\n  name: edit\ndata: {a: c}\n---\nkind: Service\nmetadata:\n  name: fresh\n",
            ),
        };
        let set = revision.change_set();

        assert_eq!(names(&set.unchanged), vec!["same"]);
        assert_eq!(names(&set.changed), vec!["edit"]);
        assert_eq!(names(&set.removed), vec!["gone"]);
        assert_eq!(names(&set.added), vec!["fresh"]);

        let buckets = [&set.added, &set.changed, &set.unchanged, &set.removed];
        let total: usize = buckets.iter().map(|b| b.len()).sum();
        let union: BTreeSet<ResourceId> = buckets.iter().flat_map(|b| b.iter().map(Resource::id)).collect();
        assert_eq!(total, union.len());

        let expected: BTreeSet<ResourceId> = revision
            .current()
            .unwrap()
            .resources
            .iter()
            .chain(&revision.next().unwrap().resources)
            .map(Resource::id)
            .collect();
        assert_eq!(union, expected);
    }

    #[test]
    fn test_to_apply_include_unchanged() {
        let content = "kind: ConfigMap\nmetadata:\n  name: keep\n";
        let set = Revision::Upgrade {
            current: manifest("m1", content),
            next: manifest("m1", content),
        }
        .change_set();

        assert!(set.to_apply(false).is_empty());
        assert_eq!(names(&set.to_apply(true)), vec!["keep"]);
        assert!(set.is_empty());
    }

    #[test]
    fn test_removal_change_set_and_pvcs() {
        let revision = Revision::Removal {
            current: manifest(
                "m1",
                r#"
kind: Service
metadata:
  name: web
---
kind: StatefulSet
metadata:
  name: web
  annotations:
    kcm/deletion-policy: delete-pvcs
spec:
  replicas: 1
  volumeClaimTemplates:
    - metadata:
        name: data
---
kind: Job
metadata:
  name: cleanup
  annotations:
    kcm/hooks: pre-delete
"#,
            ),
        };
        let set = revision.change_set();

        let order: Vec<_> = set.to_delete().iter().map(|r| r.kind.clone()).collect();
        assert_eq!(order, vec!["StatefulSet", "Service"]);
        assert_eq!(set.hooks.values().map(Vec::len).sum::<usize>(), 1);
        let pvcs = set.pvc_deletions();
        assert_eq!(pvcs.len(), 1);
        assert_eq!(pvcs[0].name.as_deref(), Some("data-web-0"));
    }

    #[test]
    fn test_into_removal() {
        let initial = Revision::Initial { next: manifest("rendered", "") };
        assert_eq!(initial.into_removal().kind(), RevisionKind::Removal);

        let upgrade = Revision::Upgrade {
            current: manifest("m", "kind: ConfigMap\nmetadata:\n  name: on-disk\n"),
            next: manifest("m", "kind: ConfigMap\nmetadata:\n  name: rendered\n"),
        };
        let removal = upgrade.into_removal();
        assert_eq!(names(&removal.change_set().removed), vec!["on-disk"]);
    }

    #[test]
    fn test_summary() {
        let set = Revision::Initial {
            next: manifest("m", "kind: ConfigMap\nmetadata:\n  name: a\n"),
        }
        .change_set();
        assert_eq!(set.summary(), "1 added, 0 changed, 0 unchanged, 0 removed");
    }
}
