//! Change notifications and work queue keys
//!
//! Watch events are turned into [`ChangeEvent`]s by comparing them with the
//! local cache. The controller maps each event to the key of the Lotus that
//! has to be reconciled: the Lotus itself, or the owner of a derived Job.

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use kube::runtime::reflector::{ObjectRef, Store, store::Writer};
use kube::runtime::watcher;
use kube::{Resource, ResourceExt};

use crate::client::Lister;
use crate::controller::error::{Error, Result};
use crate::crd::Lotus;

/// A change observed on a watched object
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent<K> {
    Added(K),
    Updated { old: K, new: K },
    /// The last known state of an object that no longer exists
    Deleted(K),
}

impl<K> ChangeEvent<K> {
    /// The most recent known state of the object
    pub fn object(&self) -> &K {
        match self {
            ChangeEvent::Added(obj) => obj,
            ChangeEvent::Updated { new, .. } => new,
            ChangeEvent::Deleted(obj) => obj,
        }
    }
}

/// `namespace/name` key identifying a namespaced object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn from_object<K: Resource>(obj: &K) -> Option<Self> {
        Some(Self::new(obj.namespace()?, obj.meta().name.clone()?))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Derives [`ChangeEvent`]s from a watch stream
///
/// [`observe`](Self::observe) must see each watcher event before it is
/// applied to `cache`. A relist (`Init` .. `InitDone`) reports objects the
/// cache holds but the relist did not return as deleted, so deletions missed
/// while disconnected still trigger their owners.
pub struct ChangeTracker<K>
where
    K: Resource,
    K::DynamicType: Eq + Hash + Clone,
{
    relisted: Option<HashSet<ObjectRef<K>>>,
    /// Changes seen during a relist, held until the store swaps it in
    held: Vec<ChangeEvent<K>>,
}

impl<K> Default for ChangeTracker<K>
where
    K: Resource,
    K::DynamicType: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self {
            relisted: None,
            held: Vec::new(),
        }
    }
}

impl<K> ChangeTracker<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `event` to the store behind `writer` and return the changes it
    /// made
    ///
    /// Changes are only handed out once the store reflects them, so a worker
    /// woken by one of them never reads the state from before the event. The
    /// store publishes a relist all at once on `InitDone`, and so does this.
    pub fn apply(
        &mut self,
        event: &watcher::Event<K>,
        writer: &mut Writer<K>,
    ) -> Vec<ChangeEvent<K>> {
        let changes = self.observe(event, &writer.as_reader());
        writer.apply_watcher_event(event);
        match event {
            watcher::Event::Init | watcher::Event::InitApply(_) => {
                self.held.extend(changes);
                Vec::new()
            }
            watcher::Event::InitDone => {
                let mut released = std::mem::take(&mut self.held);
                released.extend(changes);
                released
            }
            watcher::Event::Apply(_) | watcher::Event::Delete(_) => changes,
        }
    }

    pub fn observe(&mut self, event: &watcher::Event<K>, cache: &Store<K>) -> Vec<ChangeEvent<K>> {
        match event {
            watcher::Event::Apply(obj) => vec![Self::applied(obj, cache)],
            watcher::Event::Delete(obj) => vec![ChangeEvent::Deleted(obj.clone())],
            watcher::Event::Init => {
                self.relisted = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(obj) => {
                if let Some(relisted) = &mut self.relisted {
                    relisted.insert(ObjectRef::from_obj(obj));
                }
                vec![Self::applied(obj, cache)]
            }
            watcher::Event::InitDone => {
                let Some(relisted) = self.relisted.take() else {
                    return Vec::new();
                };
                cache
                    .state()
                    .into_iter()
                    .filter(|obj| !relisted.contains(&ObjectRef::from_obj(obj.as_ref())))
                    .map(|obj| ChangeEvent::Deleted(obj.as_ref().clone()))
                    .collect()
            }
        }
    }

    fn applied(obj: &K, cache: &Store<K>) -> ChangeEvent<K> {
        match cache.get(&ObjectRef::from_obj(obj)) {
            Some(old) => ChangeEvent::Updated {
                old: old.as_ref().clone(),
                new: obj.clone(),
            },
            None => ChangeEvent::Added(obj.clone()),
        }
    }
}

/// Split a `namespace/name` key
pub fn split_meta_namespace_key(key: &str) -> Result<ObjectKey> {
    match key.split_once('/') {
        Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok(ObjectKey::new(ns, name))
        }
        _ => Err(Error::InvalidKey(key.to_string())),
    }
}

/// Kind and name of the controller owner of `obj`, if any
pub fn owner_key<K: Resource>(obj: &K) -> Option<(String, String)> {
    obj.owner_references()
        .iter()
        .find(|r| r.controller == Some(true))
        .map(|r| (r.kind.clone(), r.name.clone()))
}

/// Resolve the Lotus that owns `obj`
///
/// Objects without a controller owner, owned by another kind, or whose
/// owner is not in the cache are ignored.
pub fn owning_lotus<K: Resource>(obj: &K, lotuses: &dyn Lister<Lotus>) -> Option<Arc<Lotus>> {
    let (kind, name) = owner_key(obj)?;
    if kind != "Lotus" {
        return None;
    }
    let namespace = obj.namespace()?;
    lotuses.get(&namespace, &name)
}

/// Key to enqueue for a Lotus change; deletions need no reconciliation
pub fn lotus_event_key(event: &ChangeEvent<Lotus>) -> Option<ObjectKey> {
    match event {
        ChangeEvent::Added(lotus) | ChangeEvent::Updated { new: lotus, .. } => {
            ObjectKey::from_object(lotus)
        }
        ChangeEvent::Deleted(_) => None,
    }
}

/// Key to enqueue for a change of an object derived from a Lotus
pub fn owner_event_key<K: Resource>(
    event: &ChangeEvent<K>,
    lotuses: &dyn Lister<Lotus>,
) -> Option<ObjectKey> {
    let owner = owning_lotus(event.object(), lotuses)?;
    ObjectKey::from_object(owner.as_ref())
}
