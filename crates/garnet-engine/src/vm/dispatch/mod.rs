//! Dispatch cache control
//!
//! Two cache layers sit in front of method lookup:
//! - A global cache keyed by (lookup origin, selector)
//! - Per call-site inline caches, indexed by selector for invalidation
//!
//! Any method-table mutation for a selector clears both layers for that
//! selector in the same call and bumps the global serial. Inline caches
//! also record the serial they were filled at and treat a mismatch as stale.

use crate::vm::gc::heap::Forwarding;
use crate::vm::object::Visibility;
use crate::vm::symbol::Symbol;
use crate::vm::value::{ModuleId, ObjectRef};
use log::trace;
use rustc_hash::FxHashMap;

/// A resolved method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEntry {
    /// The executable found
    pub method: ObjectRef,
    /// Module it was found in
    pub module: ModuleId,
    /// Visibility at the resolving entry
    pub visibility: Visibility,
    /// Global serial when resolved
    pub serial: u64,
}

/// Selector-keyed global resolution cache
#[derive(Debug, Default)]
pub struct GlobalCache {
    entries: FxHashMap<(ModuleId, Symbol), CacheEntry>,
    hits: u64,
    misses: u64,
}

impl GlobalCache {
    /// Cached resolution for `selector` starting at `origin`
    pub fn lookup(&mut self, origin: ModuleId, selector: Symbol) -> Option<CacheEntry> {
        match self.entries.get(&(origin, selector)) {
            Some(entry) => {
                self.hits += 1;
                Some(*entry)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Record a resolution
    pub fn insert(&mut self, origin: ModuleId, selector: Symbol, entry: CacheEntry) {
        self.entries.insert((origin, selector), entry);
    }

    /// Drop every entry for `selector`; returns how many were dropped
    pub fn invalidate(&mut self, selector: Symbol) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(_, sel), _| *sel != selector);
        before - self.entries.len()
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of cached resolutions
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// (hits, misses)
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    fn after_collection(&mut self, forwarding: &Forwarding) {
        self.entries.retain(|_, entry| {
            if !forwarding.survived(entry.method) {
                return false;
            }
            forwarding.update(&mut entry.method);
            true
        });
    }
}

/// Identity of one call site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallSiteId(u32);

#[derive(Debug)]
struct InlineCache {
    selector: Symbol,
    cached: Option<(ModuleId, CacheEntry)>,
}

/// Registry of every call site's inline cache
#[derive(Debug, Default)]
pub struct InlineCacheRegistry {
    sites: Vec<InlineCache>,
    by_selector: FxHashMap<Symbol, Vec<CallSiteId>>,
}

impl InlineCacheRegistry {
    /// Register a new call site sending `selector`
    pub fn register(&mut self, selector: Symbol) -> CallSiteId {
        let id = CallSiteId(self.sites.len() as u32);
        self.sites.push(InlineCache {
            selector,
            cached: None,
        });
        self.by_selector.entry(selector).or_default().push(id);
        id
    }

    /// Selector sent at `site`
    pub fn selector(&self, site: CallSiteId) -> Option<Symbol> {
        self.sites.get(site.0 as usize).map(|s| s.selector)
    }

    /// Cached resolution if it was filled for `origin` at `serial`
    pub fn lookup(&self, site: CallSiteId, origin: ModuleId, serial: u64) -> Option<CacheEntry> {
        let (cached_origin, entry) = self.sites.get(site.0 as usize)?.cached?;
        (cached_origin == origin && entry.serial == serial).then_some(entry)
    }

    /// Fill `site` for receivers whose lookup starts at `origin`
    pub fn update(&mut self, site: CallSiteId, origin: ModuleId, entry: CacheEntry) {
        if let Some(cache) = self.sites.get_mut(site.0 as usize) {
            cache.cached = Some((origin, entry));
        }
    }

    /// Empty every site sending `selector`; returns how many were filled
    pub fn invalidate(&mut self, selector: Symbol) -> usize {
        let mut cleared = 0;
        if let Some(ids) = self.by_selector.get(&selector) {
            for id in ids {
                if let Some(cache) = self.sites.get_mut(id.0 as usize) {
                    if cache.cached.take().is_some() {
                        cleared += 1;
                    }
                }
            }
        }
        cleared
    }

    /// Empty every site
    pub fn clear(&mut self) {
        for cache in &mut self.sites {
            cache.cached = None;
        }
    }

    /// Number of registered call sites
    pub fn len(&self) -> usize {
        self.sites.len()
    }

    /// Whether no call site is registered
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    fn after_collection(&mut self, forwarding: &Forwarding) {
        for cache in &mut self.sites {
            if let Some((_, entry)) = &mut cache.cached {
                if forwarding.survived(entry.method) {
                    forwarding.update(&mut entry.method);
                } else {
                    cache.cached = None;
                }
            }
        }
    }
}

/// Both cache layers plus the global method serial
#[derive(Debug, Default)]
pub struct DispatchCaches {
    /// Global resolution cache
    pub global: GlobalCache,
    /// Call-site caches
    pub inline: InlineCacheRegistry,
    serial: u64,
}

impl DispatchCaches {
    /// Create empty caches
    pub fn new() -> Self {
        Self::default()
    }

    /// Current global serial
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Advance the global serial and return the new value
    pub fn inc_serial(&mut self) -> u64 {
        self.serial += 1;
        self.serial
    }

    /// Clear both layers for `selector`
    pub fn invalidate(&mut self, selector: Symbol) {
        let global = self.global.invalidate(selector);
        let inline = self.inline.invalidate(selector);
        trace!(
            "invalidated {}: {} global, {} inline entries",
            selector,
            global,
            inline
        );
    }

    /// Clear both layers entirely
    pub fn clear_all(&mut self) {
        self.global.clear();
        self.inline.clear();
    }

    /// Rewrite or drop cached method references after an evacuation
    pub fn after_collection(&mut self, forwarding: &Forwarding) {
        self.global.after_collection(forwarding);
        self.inline.after_collection(forwarding);
    }
}
