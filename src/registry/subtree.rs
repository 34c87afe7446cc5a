//! Registration nodes and the per-context forest they live in.
//!
//! A forest is an arena of [`Subtree`] nodes. Heads form a list ordered by
//! `start` through `next`/`prev`; every head may carry a `children` chain of
//! registrations covering the same range, most specific first. Members of a
//! chain mirror their head's `next` and `prev`, so any of them can be
//! promoted to head when the head is removed.

use std::cmp::Ordering;
use std::ops::{Index, IndexMut};
use std::time::Duration;

use smallvec::SmallVec;

use super::cache::{CacheEntry, LookupCache};
use super::RangeSpec;
use crate::oid::Oid;

/// Set on every registration made through the registry.
pub const SUBTREE_ATTACHED: u8 = 0x01;

/// Priority of the placeholder registrations seeded into each context.
pub(crate) const NULL_PRIORITY: u8 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Handle(pub(crate) usize);

/// One entry of a registration's value table: an OID suffix below the
/// registered root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    suffix: SmallVec<[u32; 8]>,
    delegated: bool,
}

impl Variable {
    pub fn new(suffix: impl IntoIterator<Item = u32>) -> Self {
        Self {
            suffix: suffix.into_iter().collect(),
            delegated: false,
        }
    }

    /// Mark the entry as belonging to a handler with a request in flight.
    pub fn delegated(mut self, delegated: bool) -> Self {
        self.delegated = delegated;
        self
    }

    pub fn suffix(&self) -> &[u32] {
        &self.suffix
    }

    pub fn is_delegated(&self) -> bool {
        self.delegated
    }
}

/// A registration, or one fragment of it after splitting.
#[derive(Debug, Clone)]
pub struct Subtree<H> {
    pub(crate) name: Oid,
    pub(crate) start: Oid,
    pub(crate) end: Oid,
    pub(crate) label: Box<str>,
    pub(crate) priority: u8,
    pub(crate) range: Option<RangeSpec>,
    pub(crate) variables: Vec<Variable>,
    pub(crate) flags: u8,
    pub(crate) timeout: Option<Duration>,
    pub(crate) handler: Option<H>,
    pub(crate) next: Option<Handle>,
    pub(crate) prev: Option<Handle>,
    pub(crate) children: Option<Handle>,
}

impl<H> Subtree<H> {
    /// A placeholder covering `[root, root + 1)` that never resolves.
    pub(crate) fn null(root: u32) -> Self {
        let name = Oid::from_slice(&[root]);
        let end = Oid::from_slice(&[root.saturating_add(1)]);
        Self {
            start: name.clone(),
            name,
            end,
            label: "null".into(),
            priority: NULL_PRIORITY,
            range: None,
            variables: Vec::new(),
            flags: 0,
            timeout: None,
            handler: None,
            next: None,
            prev: None,
            children: None,
        }
    }

    /// The OID originally registered.
    pub fn name(&self) -> &Oid {
        &self.name
    }

    /// First OID covered by this fragment.
    pub fn start(&self) -> &Oid {
        &self.start
    }

    /// First OID past this fragment.
    pub fn end(&self) -> &Oid {
        &self.end
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn range(&self) -> Option<RangeSpec> {
        self.range
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn is_attached(&self) -> bool {
        self.flags & SUBTREE_ATTACHED != 0
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// `None` for the seeded placeholders.
    pub fn handler(&self) -> Option<&H> {
        self.handler.as_ref()
    }

    pub fn is_null(&self) -> bool {
        self.handler.is_none()
    }

    /// Whether `oid` lies in `[start, end)`.
    pub fn contains(&self, oid: &Oid) -> bool {
        self.start <= *oid && *oid < self.end
    }

    fn same_registration(&self, other: &Self) -> bool {
        self.name == other.name
            && self.priority == other.priority
            && self.label == other.label
            && self.flags == other.flags
            && self.range == other.range
            && self.timeout == other.timeout
    }
}

/// Why a load was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoadError {
    Duplicate,
    Failed,
}

/// Split a value table at `boundary`.
///
/// Entries before the boundary stay with the head. The tail gets entries at
/// or after it, plus any entry whose suffix is a prefix of the boundary
/// since that entry spans both halves. A delegated table stays whole in the
/// head, with the tail keeping only its first entry.
fn partition_variables(
    variables: &[Variable],
    name: &Oid,
    boundary: &Oid,
) -> (Vec<Variable>, Vec<Variable>) {
    if variables.first().is_some_and(Variable::is_delegated) {
        return (variables.to_vec(), variables[..1].to_vec());
    }

    let cut = boundary.suffix(name.len());
    let head = variables
        .iter()
        .take_while(|v| v.suffix() < cut)
        .cloned()
        .collect();
    let tail = variables
        .iter()
        .filter(|v| v.suffix() >= cut || cut.starts_with(v.suffix()))
        .cloned()
        .collect();
    (head, tail)
}

/// All registrations of one context.
#[derive(Debug, Clone)]
pub(crate) struct Forest<H> {
    nodes: Vec<Option<Subtree<H>>>,
    free: Vec<usize>,
    first: Option<Handle>,
    pub(crate) cache: LookupCache,
}

impl<H> Index<Handle> for Forest<H> {
    type Output = Subtree<H>;

    fn index(&self, handle: Handle) -> &Subtree<H> {
        match &self.nodes[handle.0] {
            Some(node) => node,
            None => unreachable!("released registry node {}", handle.0),
        }
    }
}

impl<H> IndexMut<Handle> for Forest<H> {
    fn index_mut(&mut self, handle: Handle) -> &mut Subtree<H> {
        match &mut self.nodes[handle.0] {
            Some(node) => node,
            None => unreachable!("released registry node {}", handle.0),
        }
    }
}

/// Walks a `children` chain.
pub(crate) struct Chain<'a, H> {
    forest: &'a Forest<H>,
    cursor: Option<Handle>,
}

impl<H> Iterator for Chain<'_, H> {
    type Item = Handle;

    fn next(&mut self) -> Option<Handle> {
        let handle = self.cursor?;
        self.cursor = self.forest[handle].children;
        Some(handle)
    }
}

/// Walks the heads in `start` order.
pub(crate) struct Heads<'a, H> {
    forest: &'a Forest<H>,
    cursor: Option<Handle>,
}

impl<H> Iterator for Heads<'_, H> {
    type Item = Handle;

    fn next(&mut self) -> Option<Handle> {
        let handle = self.cursor?;
        self.cursor = self.forest[handle].next;
        Some(handle)
    }
}

impl<H> Forest<H> {
    fn empty() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            first: None,
            cache: LookupCache::default(),
        }
    }

    /// A forest holding the `[0]`, `[1]` and `[2]` placeholders.
    pub(crate) fn seeded() -> Self {
        let mut forest = Self::empty();
        let mut prev = None;
        for root in 0..=2 {
            let mut node = Subtree::null(root);
            node.prev = prev;
            let handle = forest.alloc(node);
            match prev {
                Some(p) => forest[p].next = Some(handle),
                None => forest.first = Some(handle),
            }
            prev = Some(handle);
        }
        forest
    }

    pub(crate) fn alloc(&mut self, node: Subtree<H>) -> Handle {
        match self.free.pop() {
            Some(index) => {
                self.nodes[index] = Some(node);
                Handle(index)
            }
            None => {
                self.nodes.push(Some(node));
                Handle(self.nodes.len() - 1)
            }
        }
    }

    fn release(&mut self, handle: Handle) {
        if self.nodes[handle.0].take().is_some() {
            self.free.push(handle.0);
        }
    }

    pub(crate) fn chain(&self, head: Option<Handle>) -> Chain<'_, H> {
        Chain {
            forest: self,
            cursor: head,
        }
    }

    pub(crate) fn heads(&self) -> Heads<'_, H> {
        Heads {
            forest: self,
            cursor: self.first,
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    fn set_next(&mut self, head: Option<Handle>, next: Option<Handle>) {
        let members: SmallVec<[Handle; 4]> = self.chain(head).collect();
        for member in members {
            self[member].next = next;
        }
    }

    fn set_prev(&mut self, head: Option<Handle>, prev: Option<Handle>) {
        let members: SmallVec<[Handle; 4]> = self.chain(head).collect();
        for member in members {
            self[member].prev = prev;
        }
    }

    /// The winning registration of a slot: the first chain member with a
    /// handler.
    pub(crate) fn winner(&self, head: Handle) -> Option<&Subtree<H>> {
        self.chain(Some(head))
            .map(|h| &self[h])
            .find(|node| node.handler.is_some())
    }

    /// First slot with a live registration.
    pub(crate) fn first_live(&self) -> Option<Handle> {
        self.heads().find(|&h| self.winner(h).is_some())
    }

    fn entry_is_live(&self, entry: CacheEntry) -> bool {
        let previous = self.nodes.get(entry.previous.0).and_then(Option::as_ref);
        let next = self.nodes.get(entry.next.0).and_then(Option::as_ref);
        matches!((previous, next), (Some(p), Some(_)) if p.next == Some(entry.next))
    }

    /// Last head whose `start` is at or before `oid`.
    ///
    /// With a non-zero `cache_size` a cached boundary close to `oid` seeds
    /// the scan, and the boundary found is written back.
    pub(crate) fn find_prev(&mut self, oid: &Oid, cache_size: usize) -> Option<Handle> {
        let mut cursor = self.first;
        let mut previous = None;
        let mut hint = None;
        let mut exact = false;

        if cache_size > 0 {
            let mut best: Option<(usize, CacheEntry)> = None;
            for (slot, entry) in self.cache.entries(cache_size) {
                if !self.entry_is_live(entry) || *oid < self[entry.previous].start {
                    continue;
                }
                let closer = best.is_none_or(|(_, b)| self[entry.previous].start > self[b.previous].start);
                if closer {
                    best = Some((slot, entry));
                }
            }
            if let Some((slot, entry)) = best {
                exact = *oid == self[entry.previous].start;
                previous = Some(entry.previous);
                cursor = Some(entry.next);
                hint = Some(slot);
            }
        }

        while let Some(handle) = cursor {
            if *oid < self[handle].start {
                if cache_size > 0
                    && !exact
                    && let Some(previous) = previous
                {
                    let entry = CacheEntry {
                        previous,
                        next: handle,
                    };
                    match hint {
                        Some(slot) => self.cache.replace(slot, entry),
                        None => self.cache.add(entry, cache_size),
                    }
                }
                return previous;
            }
            previous = Some(handle);
            cursor = self[handle].next;
        }
        previous
    }

    /// The head whose range contains `oid`.
    pub(crate) fn find(&mut self, oid: &Oid, cache_size: usize) -> Option<Handle> {
        let handle = self.find_prev(oid, cache_size)?;
        (*oid < self[handle].end).then_some(handle)
    }

    /// The first head starting after `oid`, placeholders included.
    fn following(&mut self, oid: &Oid, cache_size: usize) -> Option<Handle> {
        match self.find_prev(oid, cache_size) {
            Some(previous) => self[previous].next,
            None => self.first,
        }
    }

    /// The first live head starting after `oid`.
    pub(crate) fn find_next(&mut self, oid: &Oid, cache_size: usize) -> Option<Handle> {
        let mut cursor = self.following(oid, cache_size);
        while let Some(handle) = cursor {
            if self.winner(handle).is_some() {
                return Some(handle);
            }
            cursor = self[handle].next;
        }
        None
    }
}

impl<H: Clone> Forest<H> {
    /// Copy a node and its chain, cutting the copies' ranges to start at
    /// `boundary`. Links are left to the caller.
    fn split_chain(&mut self, current: Handle, boundary: &Oid) -> Option<Handle> {
        let node = &self[current];
        if *boundary <= node.start || *boundary > node.end {
            return None;
        }

        let (head_vars, tail_vars) = partition_variables(&node.variables, &node.name, boundary);
        let mut tail = node.clone();
        tail.start = boundary.clone();
        tail.variables = tail_vars;
        tail.children = None;

        let children = node.children;
        let node = &mut self[current];
        node.end = boundary.clone();
        node.variables = head_vars;

        let tail = self.alloc(tail);
        if let Some(child) = children {
            let child_tail = self.split_chain(child, boundary)?;
            self[tail].children = Some(child_tail);
        }
        Some(tail)
    }

    /// Divide a slot in two at `boundary`, returning the new second half.
    ///
    /// `boundary` must lie in `(start, end]`.
    pub(crate) fn split(&mut self, current: Handle, boundary: &Oid) -> Option<Handle> {
        let tail = self.split_chain(current, boundary)?;
        let after = self[tail].next;
        self.set_next(Some(current), Some(tail));
        self.set_prev(Some(tail), Some(current));
        self.set_prev(after, Some(tail));
        self.cache.clear();
        Some(tail)
    }

    /// Link an allocated, unlinked node into the forest.
    pub(crate) fn load(&mut self, new: Handle) -> Result<(), LoadError> {
        let start = self[new].start.clone();
        let end = self[new].end.clone();

        let Some(mut existing) = self.find(&start, 0) else {
            let previous = self.find_prev(&start, 0);
            let after = match previous {
                Some(p) => self[p].next,
                None => self.first,
            };

            let mut rest = None;
            if let Some(after) = after
                && end > self[after].start
            {
                let boundary = self[after].start.clone();
                rest = Some(self.split(new, &boundary).ok_or(LoadError::Failed)?);
            }

            self.set_prev(Some(new), previous);
            self.set_prev(after, Some(new));
            match previous {
                Some(p) => self.set_next(Some(p), Some(new)),
                None => self.first = Some(new),
            }
            self.set_next(Some(new), after);
            self.cache.clear();

            return match rest {
                Some(rest) => self.load(rest),
                None => Ok(()),
            };
        };

        if self[existing].start != start {
            existing = self.split(existing, &start).ok_or(LoadError::Failed)?;
        }

        match end.cmp(&self[existing].end) {
            Ordering::Equal => self.attach(existing, new),
            Ordering::Less => {
                self.split(existing, &end).ok_or(LoadError::Failed)?;
                self.attach(existing, new)
            }
            Ordering::Greater => {
                let boundary = self[existing].end.clone();
                let rest = self.split(new, &boundary).ok_or(LoadError::Failed)?;
                self.load(new)?;
                self.load(rest)
            }
        }
    }

    /// Insert `new` into the chain at `head`, whose range it matches
    /// exactly. Longer names come first, then lower priority values.
    fn attach(&mut self, head: Handle, new: Handle) -> Result<(), LoadError> {
        let name_len = self[new].name.len();
        let priority = self[new].priority;

        let mut previous = None;
        let mut cursor = Some(head);
        while let Some(c) = cursor
            && self[c].name.len() > name_len
        {
            previous = cursor;
            cursor = self[c].children;
        }
        while let Some(c) = cursor
            && self[c].name.len() == name_len
            && self[c].priority < priority
        {
            previous = cursor;
            cursor = self[c].children;
        }
        if let Some(c) = cursor
            && self[c].name.len() == name_len
            && self[c].priority == priority
        {
            return Err(LoadError::Duplicate);
        }

        match previous {
            Some(p) => {
                let (prev, next) = (self[p].prev, self[p].next);
                self[p].children = Some(new);
                let node = &mut self[new];
                node.children = cursor;
                node.prev = prev;
                node.next = next;
            }
            None => {
                let (prev, next) = (self[head].prev, self[head].next);
                let node = &mut self[new];
                node.children = Some(head);
                node.prev = prev;
                node.next = next;
                self.set_prev(next, Some(new));
                match prev {
                    Some(p) => self.set_next(Some(p), Some(new)),
                    None => self.first = Some(new),
                }
            }
        }
        self.cache.clear();
        Ok(())
    }

    /// Detach `node`. `chain_prev` is its predecessor in a children chain,
    /// or `None` when `node` is a head.
    fn unload(&mut self, node: Handle, chain_prev: Option<Handle>) {
        let children = self[node].children;
        match chain_prev {
            Some(p) => self[p].children = children,
            None => {
                let (prev, next) = (self[node].prev, self[node].next);
                // a children chain takes over the slot, otherwise it closes up
                let replacement = children.or(next);
                self.set_next(prev, replacement);
                self.set_prev(next, children.or(prev));
                if prev.is_none() {
                    self.first = replacement;
                }
            }
        }
        self.cache.clear();
    }

    fn find_in_chain(&self, head: Handle, name: &Oid, priority: u8) -> Option<(Handle, Option<Handle>)> {
        let mut previous = None;
        for member in self.chain(Some(head)) {
            let node = &self[member];
            if node.name == *name && node.priority == priority {
                return Some((member, previous));
            }
            previous = Some(member);
        }
        None
    }

    /// Remove every fragment of the registration `(name, priority)`.
    /// Returns whether anything was removed.
    pub(crate) fn unregister(&mut self, name: &Oid, priority: u8) -> bool {
        let Some(head) = self.find(name, 0) else {
            return false;
        };
        let Some((found, chain_prev)) = self.find_in_chain(head, name, priority) else {
            return false;
        };

        let mut after = self[head].next;
        self.unload(found, chain_prev);
        self.release(found);

        // later fragments left behind by splits
        while let Some(slot) = after {
            let Some((found, chain_prev)) = self.find_in_chain(slot, name, priority) else {
                break;
            };
            after = self[slot].next;
            self.unload(found, chain_prev);
            self.release(found);
        }
        true
    }

    fn same_content(&self, left: Handle, right: Handle) -> bool {
        if self[left].end != self[right].start {
            return false;
        }
        let mut a = self.chain(Some(left));
        let mut b = self.chain(Some(right));
        loop {
            match (a.next(), b.next()) {
                (None, None) => return true,
                (Some(x), Some(y)) if self[x].same_registration(&self[y]) => {}
                _ => return false,
            }
        }
    }

    /// Fold `right` into `left`, its immediate successor with identical
    /// chain content.
    fn merge(&mut self, left: Handle, right: Handle) {
        let pairs: SmallVec<[(Handle, Handle); 4]> =
            self.chain(Some(left)).zip(self.chain(Some(right))).collect();
        let after = self[right].next;

        for (keep, gone) in pairs {
            let end = self[gone].end.clone();
            let variables = std::mem::take(&mut self[gone].variables);
            let node = &mut self[keep];
            node.end = end;
            for variable in variables {
                if !node.variables.contains(&variable) {
                    node.variables.push(variable);
                }
            }
            node.variables.sort_by(|l, r| l.suffix().cmp(r.suffix()));
            self.release(gone);
        }

        self.set_next(Some(left), after);
        self.set_prev(after, Some(left));
    }

    /// Re-merge neighbouring fragments of the same registrations. Returns
    /// the number of merges.
    pub(crate) fn join_adjacent(&mut self) -> usize {
        let mut merged = 0;
        let mut cursor = self.first;
        while let Some(handle) = cursor {
            match self[handle].next {
                Some(next) if self.same_content(handle, next) => {
                    self.merge(handle, next);
                    merged += 1;
                }
                next => cursor = next,
            }
        }
        if merged > 0 {
            self.cache.clear();
        }
        merged
    }
}
