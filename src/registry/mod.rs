//! MIB subtree registry.
//!
//! Maps OID ranges to handlers, one forest per context name. Overlapping
//! registrations are allowed: the covering range is split so that every
//! slot has a single `[start, end)`, and registrations claiming the same
//! slot are ordered by specificity (longer registered name first) and then
//! priority (lower value first).
//!
//! # Example
//!
//! ```
//! use snmp_agent_core::oid;
//! use snmp_agent_core::registry::{RegistrationRequest, Registry, RegistryStatus};
//!
//! let mut registry = Registry::new();
//! let status = registry.register("", RegistrationRequest::new("system", oid!(1, 3, 6, 1, 2, 1, 1), "system"));
//! assert_eq!(status, RegistryStatus::RegisteredOk);
//! registry.register(
//!     "",
//!     RegistrationRequest::new("sysDescr", oid!(1, 3, 6, 1, 2, 1, 1, 1), "sysDescr").priority(100),
//! );
//!
//! let hit = registry.resolve("", &oid!(1, 3, 6, 1, 2, 1, 1, 1, 0)).unwrap();
//! assert_eq!(hit.handler(), Some(&"sysDescr"));
//! ```

mod cache;
mod subtree;

pub use cache::{DEFAULT_LOOKUP_CACHE_SIZE, MAX_LOOKUP_CACHE_SIZE};
pub use subtree::{SUBTREE_ATTACHED, Subtree, Variable};

use std::collections::BTreeMap;
use std::time::Duration;

use subtree::{Forest, LoadError};

use crate::oid::Oid;

/// Default registration priority.
pub const DEFAULT_PRIORITY: u8 = 127;

/// Outcome of a registry mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryStatus {
    RegisteredOk,
    DuplicateRegistration,
    RegistrationFailed,
    NoSuchRegistration,
    UnregisteredOk,
}

impl RegistryStatus {
    pub fn is_ok(self) -> bool {
        matches!(self, Self::RegisteredOk | Self::UnregisteredOk)
    }
}

impl From<LoadError> for RegistryStatus {
    fn from(err: LoadError) -> Self {
        match err {
            LoadError::Duplicate => Self::DuplicateRegistration,
            LoadError::Failed => Self::RegistrationFailed,
        }
    }
}

/// Expands one registration into a run of siblings.
///
/// Arc `subid` (1-based) of the root takes every value from its registered
/// value through `upper_bound` inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RangeSpec {
    pub subid: usize,
    pub upper_bound: u32,
}

impl RangeSpec {
    pub fn new(subid: usize, upper_bound: u32) -> Self {
        Self { subid, upper_bound }
    }

    /// The roots this range covers, or `None` if `subid` does not name an
    /// arc of `root`.
    fn roots(self, root: &Oid) -> Option<impl Iterator<Item = Oid> + '_> {
        let index = self.subid.checked_sub(1)?;
        let first = *root.arcs().get(index)?;
        Some((first..=self.upper_bound.max(first)).filter_map(move |arc| root.with_arc(index, arc)))
    }
}

fn expand(root: &Oid, range: Option<RangeSpec>) -> Option<Vec<Oid>> {
    match range {
        None => Some(vec![root.clone()]),
        Some(range) => Some(range.roots(root)?.collect()),
    }
}

/// Parameters of one registration.
#[derive(Debug, Clone)]
pub struct RegistrationRequest<H> {
    label: Box<str>,
    root: Oid,
    priority: u8,
    range: Option<RangeSpec>,
    variables: Vec<Variable>,
    flags: u8,
    timeout: Option<Duration>,
    handler: H,
}

impl<H> RegistrationRequest<H> {
    pub fn new(label: impl Into<Box<str>>, root: Oid, handler: H) -> Self {
        Self {
            label: label.into(),
            root,
            priority: DEFAULT_PRIORITY,
            range: None,
            variables: Vec::new(),
            flags: 0,
            timeout: None,
            handler,
        }
    }

    /// Lower values win ties on the same range.
    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn range(mut self, subid: usize, upper_bound: u32) -> Self {
        self.range = Some(RangeSpec::new(subid, upper_bound));
        self
    }

    /// Value table; kept sorted by suffix.
    pub fn variables(mut self, mut variables: Vec<Variable>) -> Self {
        variables.sort_by(|a, b| a.suffix().cmp(b.suffix()));
        self.variables = variables;
        self
    }

    pub fn flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl<H: Clone> RegistrationRequest<H> {
    fn subtree(&self, name: Oid) -> Option<Subtree<H>> {
        let end = name.successor()?;
        Some(Subtree {
            start: name.clone(),
            name,
            end,
            label: self.label.clone(),
            priority: self.priority,
            range: self.range,
            variables: self.variables.clone(),
            flags: self.flags | SUBTREE_ATTACHED,
            timeout: self.timeout,
            handler: Some(self.handler.clone()),
            next: None,
            prev: None,
            children: None,
        })
    }
}

/// Registrations of every context.
#[derive(Debug, Clone)]
pub struct Registry<H> {
    contexts: BTreeMap<String, Forest<H>>,
    cache_size: usize,
}

impl<H> Default for Registry<H> {
    fn default() -> Self {
        Self {
            contexts: BTreeMap::new(),
            cache_size: DEFAULT_LOOKUP_CACHE_SIZE,
        }
    }
}

impl<H> Registry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-context lookup cache size. Negative selects the
    /// default, zero disables caching and larger values are capped at
    /// [`MAX_LOOKUP_CACHE_SIZE`].
    pub fn set_lookup_cache_size(&mut self, size: i32) {
        self.cache_size = cache::clamp_size(size);
        self.clear_lookup_caches();
    }

    pub fn lookup_cache_size(&self) -> usize {
        self.cache_size
    }

    pub fn clear_lookup_caches(&mut self) {
        for forest in self.contexts.values_mut() {
            forest.cache.clear();
        }
    }

    /// Context names that have been registered into.
    pub fn contexts(&self) -> impl Iterator<Item = &str> {
        self.contexts.keys().map(String::as_str)
    }

    /// Drop every registration of `context`. Returns whether it existed.
    pub fn clear_context(&mut self, context: &str) -> bool {
        let removed = self.contexts.remove(context).is_some();
        if removed {
            tracing::debug!(target: "snmp_agent_core::registry", { snmp.context = context }, "context cleared");
        }
        removed
    }

    /// The slot containing `oid`, placeholders included.
    pub fn find(&mut self, context: &str, oid: &Oid) -> Option<&Subtree<H>> {
        let size = self.cache_size;
        let forest = self.contexts.get_mut(context)?;
        let head = forest.find(oid, size)?;
        Some(&forest[head])
    }

    /// The registration answering for `oid`: the most specific, then
    /// lowest-priority, registration whose range contains it.
    pub fn resolve(&mut self, context: &str, oid: &Oid) -> Option<&Subtree<H>> {
        let size = self.cache_size;
        let forest = self.contexts.get_mut(context)?;
        let head = forest.find(oid, size)?;
        forest.winner(head)
    }

    /// Every registration covering `oid`, in precedence order.
    pub fn registrations_at(&mut self, context: &str, oid: &Oid) -> Vec<&Subtree<H>> {
        let size = self.cache_size;
        let Some(forest) = self.contexts.get_mut(context) else {
            return Vec::new();
        };
        let Some(head) = forest.find(oid, size) else {
            return Vec::new();
        };
        let forest: &Forest<H> = forest;
        forest
            .chain(Some(head))
            .map(|h| &forest[h])
            .filter(|node| !node.is_null())
            .collect()
    }

    /// The winning registration of the first slot starting after `oid`.
    pub fn find_next(&mut self, context: &str, oid: &Oid) -> Option<&Subtree<H>> {
        let size = self.cache_size;
        let forest = self.contexts.get_mut(context)?;
        let head = forest.find_next(oid, size)?;
        forest.winner(head)
    }

    /// The winning registration of the lowest live slot.
    pub fn find_first(&self, context: &str) -> Option<&Subtree<H>> {
        let forest = self.contexts.get(context)?;
        forest.winner(forest.first_live()?)
    }

    /// Slot heads in ascending `start` order, placeholders included.
    pub fn walk(&self, context: &str) -> impl Iterator<Item = &Subtree<H>> {
        self.contexts
            .get(context)
            .into_iter()
            .flat_map(|forest| forest.heads().map(move |h| &forest[h]))
    }
}

impl<H: Clone> Registry<H> {
    /// Register a handler over `[root, root + 1)`, or over each root of its
    /// range. Nothing is changed unless the whole request succeeds.
    pub fn register(&mut self, context: &str, request: RegistrationRequest<H>) -> RegistryStatus {
        let forest = self
            .contexts
            .entry(context.to_owned())
            .or_insert_with(Forest::seeded);
        let snapshot = forest.clone();

        let status = match Self::load_request(forest, &request) {
            Ok(()) => RegistryStatus::RegisteredOk,
            Err(err) => {
                *forest = snapshot;
                err.into()
            }
        };
        forest.cache.clear();

        tracing::debug!(
            target: "snmp_agent_core::registry",
            {
                snmp.context = context,
                snmp.oid = %request.root,
                snmp.priority = request.priority,
                snmp.label = &*request.label,
                ?status,
            },
            "register"
        );
        status
    }

    fn load_request(forest: &mut Forest<H>, request: &RegistrationRequest<H>) -> Result<(), LoadError> {
        let roots = expand(&request.root, request.range).ok_or(LoadError::Failed)?;
        for root in roots {
            let node = request.subtree(root).ok_or(LoadError::Failed)?;
            let handle = forest.alloc(node);
            forest.load(handle)?;
        }
        Ok(())
    }

    /// Remove the registration `(root, priority)` from `context`, with all
    /// fragments splits left behind. With a range, every root of the range
    /// is removed; the call succeeds if any was present.
    pub fn unregister(
        &mut self,
        context: &str,
        root: &Oid,
        priority: u8,
        range: Option<RangeSpec>,
    ) -> RegistryStatus {
        let Some(forest) = self.contexts.get_mut(context) else {
            return RegistryStatus::NoSuchRegistration;
        };
        let Some(roots) = expand(root, range) else {
            return RegistryStatus::NoSuchRegistration;
        };

        let mut removed = false;
        for root in &roots {
            removed |= forest.unregister(root, priority);
        }
        forest.cache.clear();

        let status = if removed {
            RegistryStatus::UnregisteredOk
        } else {
            RegistryStatus::NoSuchRegistration
        };
        tracing::debug!(
            target: "snmp_agent_core::registry",
            { snmp.context = context, snmp.oid = %root, snmp.priority = priority, ?status },
            "unregister"
        );
        status
    }

    /// Split the slot containing `boundary` so a new slot starts there.
    /// Returns `false` if `boundary` is unregistered or already a slot
    /// start.
    pub fn split(&mut self, context: &str, boundary: &Oid) -> bool {
        let Some(forest) = self.contexts.get_mut(context) else {
            return false;
        };
        let Some(head) = forest.find(boundary, 0) else {
            return false;
        };
        forest.split(head, boundary).is_some()
    }

    /// Merge neighbouring slots holding fragments of the same
    /// registrations. Returns the number of merges.
    pub fn join_adjacent(&mut self, context: &str) -> usize {
        self.contexts
            .get_mut(context)
            .map_or(0, Forest::join_adjacent)
    }
}
