//! Scoped attachment registry.
//!
//! The [`AttachmentRegistry`] carries auxiliary data through a running
//! pipeline without widening every step's input type. Entries are addressed
//! by [`AttachmentKey`]s: opaque tokens that carry their value type as a
//! phantom parameter, so lookups are typed at the call site while the store
//! itself is type-erased.
//!
//! Two kinds of entries exist:
//!
//! - **constants**, stored with [`AttachmentRegistry::put`]
//! - **factories**, stored with [`AttachmentRegistry::put_factory`] and
//!   resolved lazily on first read, at most once per registry
//!
//! # Example
//!
//! ```
//! use nornir_core::attachment::AttachmentRegistry;
//!
//! let registry = AttachmentRegistry::new();
//! let greeting = registry.register("hello".to_string());
//! let shout = registry.register_factory(move |r| {
//!     Ok(r.get_assert(&greeting)?.to_uppercase())
//! });
//!
//! assert_eq!(registry.get(&shout).as_deref().map(String::as_str), Some("HELLO"));
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex, RwLock};

use crate::error::{NornirError, NornirResult};

/// Source of fresh key identities. Zero is reserved for the invocation key.
static NEXT_KEY_ID: AtomicU64 = AtomicU64::new(1);

/// Untyped identity of an attachment key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(u64);

impl KeyId {
    /// The identity reserved for the original invocation input.
    pub const INVOCATION: Self = Self(0);

    /// Returns the raw numeric identity.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A typed, globally unique attachment key.
///
/// Keys compare by identity only: two keys minted for the same `T` are
/// never equal.
pub struct AttachmentKey<T> {
    id: KeyId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> AttachmentKey<T> {
    /// Mints a fresh key.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: KeyId(NEXT_KEY_ID.fetch_add(1, Ordering::Relaxed)),
            _marker: PhantomData,
        }
    }

    /// The reserved key under which `build()` stores the invocation input.
    #[must_use]
    pub const fn invocation() -> Self {
        Self {
            id: KeyId::INVOCATION,
            _marker: PhantomData,
        }
    }

    /// Returns the key's identity.
    #[must_use]
    pub const fn id(&self) -> KeyId {
        self.id
    }
}

impl<T> Default for AttachmentKey<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for AttachmentKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for AttachmentKey<T> {}

impl<T> PartialEq for AttachmentKey<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for AttachmentKey<T> {}

impl<T> Hash for AttachmentKey<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> fmt::Debug for AttachmentKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachmentKey")
            .field("id", &self.id.0)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

/// Mints a fresh attachment key for values of type `T`.
#[must_use]
pub fn create_key<T>() -> AttachmentKey<T> {
    AttachmentKey::new()
}

type Value = Arc<dyn Any + Send + Sync>;
type Factory = Arc<dyn Fn(&AttachmentRegistry) -> NornirResult<Value> + Send + Sync>;

enum Slot {
    Resolved(Value),
    Pending(Factory),
    Resolving { factory: Factory, owner: ThreadId },
}

/// A stored item, owned by exactly one registry.
///
/// The map hands out `Arc<Entry>` only so a reader can drop the map lock
/// before a factory runs; `merge` copies slots into fresh entries.
struct Entry {
    type_name: &'static str,
    slot: Mutex<Slot>,
    settled: Condvar,
}

impl Entry {
    fn new(type_name: &'static str, slot: Slot) -> Self {
        Self {
            type_name,
            slot: Mutex::new(slot),
            settled: Condvar::new(),
        }
    }

    fn constant<T: Send + Sync + 'static>(value: T) -> Self {
        Self::new(
            std::any::type_name::<T>(),
            Slot::Resolved(Arc::new(value)),
        )
    }

    fn factory<T: 'static>(factory: Factory) -> Self {
        Self::new(std::any::type_name::<T>(), Slot::Pending(factory))
    }

    /// Copies the slot into an independent entry. In-flight factories are
    /// copied as pending.
    fn detached(&self) -> Self {
        let slot = match &*self.slot.lock() {
            Slot::Resolved(value) => Slot::Resolved(Arc::clone(value)),
            Slot::Pending(factory) | Slot::Resolving { factory, .. } => {
                Slot::Pending(Arc::clone(factory))
            }
        };
        Self::new(self.type_name, slot)
    }

    fn is_resolved(&self) -> bool {
        matches!(*self.slot.lock(), Slot::Resolved(_))
    }

    /// Resolves the entry, running a pending factory at most once.
    ///
    /// The factory runs without the slot lock held. Readers on other
    /// threads wait for it to settle; a read from the resolving thread
    /// itself is a cycle and fails.
    fn resolve(&self, id: KeyId, registry: &AttachmentRegistry) -> NornirResult<Value> {
        let current = thread::current().id();
        let mut slot = self.slot.lock();
        let factory = loop {
            match &*slot {
                Slot::Resolved(value) => return Ok(Arc::clone(value)),
                Slot::Pending(factory) => break Arc::clone(factory),
                Slot::Resolving { owner, .. } if *owner == current => {
                    return Err(NornirError::AttachmentCycle {
                        key: id.as_u64(),
                        type_name: self.type_name,
                    });
                }
                Slot::Resolving { .. } => self.settled.wait(&mut slot),
            }
        };
        *slot = Slot::Resolving {
            factory: Arc::clone(&factory),
            owner: current,
        };
        drop(slot);

        let guard = ResolvingGuard {
            entry: self,
            factory: Some(Arc::clone(&factory)),
        };
        let value = factory(registry)?;
        guard.settle(Arc::clone(&value));
        Ok(value)
    }
}

/// Puts a resolving slot back to pending unless it settled, so a failed
/// or panicking factory is retried on the next read.
struct ResolvingGuard<'a> {
    entry: &'a Entry,
    factory: Option<Factory>,
}

impl ResolvingGuard<'_> {
    fn settle(mut self, value: Value) {
        self.factory = None;
        *self.entry.slot.lock() = Slot::Resolved(value);
        self.entry.settled.notify_all();
    }
}

impl Drop for ResolvingGuard<'_> {
    fn drop(&mut self) {
        if let Some(factory) = self.factory.take() {
            *self.entry.slot.lock() = Slot::Pending(factory);
            self.entry.settled.notify_all();
        }
    }
}

/// A scoped, heterogeneous, keyed store.
///
/// One registry is created per top-level pipeline invocation and shared by
/// reference with every step, including fanned-out items of a split. All
/// methods take `&self`; writes to the same key from concurrent items are
/// last-writer-wins.
#[derive(Default)]
pub struct AttachmentRegistry {
    entries: RwLock<HashMap<KeyId, Arc<Entry>>>,
}

impl AttachmentRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a constant, overwriting any existing entry for `key`.
    pub fn put<T: Send + Sync + 'static>(&self, key: &AttachmentKey<T>, value: T) {
        self.entries
            .write()
            .insert(key.id(), Arc::new(Entry::constant(value)));
    }

    /// Stores a lazily resolved entry.
    ///
    /// The factory receives the registry itself so it can look up its own
    /// dependencies. It runs at most once successfully; a failed resolution
    /// is not cached and is retried on the next read.
    pub fn put_factory<T, F>(&self, key: &AttachmentKey<T>, factory: F)
    where
        T: Send + Sync + 'static,
        F: Fn(&AttachmentRegistry) -> NornirResult<T> + Send + Sync + 'static,
    {
        let erased: Factory = Arc::new(move |registry: &AttachmentRegistry| {
            factory(registry).map(|v| Arc::new(v) as Value)
        });
        self.entries
            .write()
            .insert(key.id(), Arc::new(Entry::factory::<T>(erased)));
    }

    /// Mints a key and stores a constant under it.
    pub fn register<T: Send + Sync + 'static>(&self, value: T) -> AttachmentKey<T> {
        let key = AttachmentKey::new();
        self.put(&key, value);
        key
    }

    /// Mints a key and stores a factory under it.
    pub fn register_factory<T, F>(&self, factory: F) -> AttachmentKey<T>
    where
        T: Send + Sync + 'static,
        F: Fn(&AttachmentRegistry) -> NornirResult<T> + Send + Sync + 'static,
    {
        let key = AttachmentKey::new();
        self.put_factory(&key, factory);
        key
    }

    /// Returns the value for `key`, resolving a factory if needed.
    ///
    /// Returns `None` if the key was never stored, or if its factory failed.
    #[must_use]
    pub fn get<T: Send + Sync + 'static>(&self, key: &AttachmentKey<T>) -> Option<Arc<T>> {
        match self.try_get(key) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(key = %key.id(), error = %error, "attachment factory failed");
                None
            }
        }
    }

    /// Like [`get`](Self::get), but surfaces a factory failure.
    pub fn try_get<T: Send + Sync + 'static>(
        &self,
        key: &AttachmentKey<T>,
    ) -> NornirResult<Option<Arc<T>>> {
        // Clone the entry out so a factory can read other keys.
        let entry = self.entries.read().get(&key.id()).cloned();
        let Some(entry) = entry else {
            return Ok(None);
        };

        entry
            .resolve(key.id(), self)?
            .downcast::<T>()
            .map(Some)
            .map_err(|_| NornirError::type_mismatch::<T>())
    }

    /// Returns the value for `key`, or a missing-attachment error.
    pub fn get_assert<T: Send + Sync + 'static>(
        &self,
        key: &AttachmentKey<T>,
    ) -> NornirResult<Arc<T>> {
        self.try_get(key)?.ok_or(NornirError::MissingAttachment {
            key: key.id().as_u64(),
            type_name: std::any::type_name::<T>(),
        })
    }

    /// Returns true if `key` has an entry (resolved or not).
    #[must_use]
    pub fn has<T>(&self, key: &AttachmentKey<T>) -> bool {
        self.contains(key.id())
    }

    /// Returns true if every key has an entry. Stops at the first missing key.
    pub fn has_all<I: IntoIterator<Item = KeyId>>(&self, keys: I) -> bool {
        let entries = self.entries.read();
        keys.into_iter().all(|id| entries.contains_key(&id))
    }

    /// Returns true if any key has an entry. Stops at the first present key.
    pub fn has_any<I: IntoIterator<Item = KeyId>>(&self, keys: I) -> bool {
        let entries = self.entries.read();
        keys.into_iter().any(|id| entries.contains_key(&id))
    }

    /// Removes the entry for `key`. Returns true if one was present.
    pub fn delete<T>(&self, key: &AttachmentKey<T>) -> bool {
        self.entries.write().remove(&key.id()).is_some()
    }

    /// Returns true if `key`'s entry exists and holds a computed value.
    #[must_use]
    pub fn is_resolved<T>(&self, key: &AttachmentKey<T>) -> bool {
        let entry = self.entries.read().get(&key.id()).cloned();
        entry.is_some_and(|e| e.is_resolved())
    }

    /// Imports every entry of `others` into this registry.
    ///
    /// Registries are applied in order, later entries overwriting earlier
    /// ones. Each entry is copied: pending factories stay unresolved and are
    /// resolved independently by every registry holding them, against that
    /// registry. The arguments are not modified, and merging a registry
    /// into itself does nothing.
    pub fn merge(&self, others: &[&AttachmentRegistry]) {
        let imported: Vec<(KeyId, Entry)> = others
            .iter()
            .filter(|other| !std::ptr::eq(**other, self))
            .flat_map(|other| {
                other
                    .entries
                    .read()
                    .iter()
                    .map(|(id, entry)| (*id, entry.detached()))
                    .collect::<Vec<_>>()
            })
            .collect();

        let mut entries = self.entries.write();
        for (id, entry) in imported {
            entries.insert(id, Arc::new(entry));
        }
    }

    /// Stores the original invocation input unless one is already present.
    ///
    /// Returns true if the value was stored.
    pub fn seed_invocation<T: Send + Sync + 'static>(&self, input: T) -> bool {
        let mut entries = self.entries.write();
        if entries.contains_key(&KeyId::INVOCATION) {
            return false;
        }
        entries.insert(KeyId::INVOCATION, Arc::new(Entry::constant(input)));
        true
    }

    /// Returns the original invocation input, if seeded with type `T`.
    #[must_use]
    pub fn invocation<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.get(&AttachmentKey::<T>::invocation())
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if the registry has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn contains(&self, id: KeyId) -> bool {
        self.entries.read().contains_key(&id)
    }
}

impl fmt::Debug for AttachmentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.read();
        let mut types: Vec<_> = entries.values().map(|e| e.type_name).collect();
        types.sort_unstable();
        f.debug_struct("AttachmentRegistry")
            .field("entry_count", &entries.len())
            .field("types", &types)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, PartialEq)]
    struct Database {
        url: String,
    }

    #[test]
    fn test_keys_are_unique() {
        let a = create_key::<u32>();
        let b = create_key::<u32>();
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert_ne!(a.id(), KeyId::INVOCATION);
    }

    #[test]
    fn test_register_get_delete() {
        let registry = AttachmentRegistry::new();
        let key = registry.register("v".to_string());

        assert_eq!(registry.get(&key).as_deref(), Some(&"v".to_string()));
        assert!(registry.delete(&key));
        assert!(registry.get(&key).is_none());
        assert!(!registry.has(&key));
        assert!(!registry.delete(&key));
    }

    #[test]
    fn test_put_overwrites() {
        let registry = AttachmentRegistry::new();
        let key = create_key::<i32>();
        registry.put(&key, 1);
        registry.put(&key, 2);
        assert_eq!(*registry.get(&key).unwrap(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_factory_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = AttachmentRegistry::new();
        let counter = Arc::clone(&calls);
        let key = registry.register_factory(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Database {
                url: "postgres://localhost".into(),
            })
        });

        assert!(!registry.is_resolved(&key));
        let first = registry.get(&key).unwrap();
        let second = registry.get(&key).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(registry.is_resolved(&key));
    }

    #[test]
    fn test_factory_reads_dependencies() {
        let registry = AttachmentRegistry::new();
        let base = registry.register(20_u32);
        let derived = registry.register_factory(move |r| Ok(*r.get_assert(&base)? + 1));
        assert_eq!(*registry.get(&derived).unwrap(), 21);
    }

    #[test]
    fn test_failed_factory_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = AttachmentRegistry::new();
        let counter = Arc::clone(&calls);
        let key = registry.register_factory(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(NornirError::msg("not ready"))
            } else {
                Ok(5_u8)
            }
        });

        assert!(registry.try_get(&key).is_err());
        assert!(!registry.is_resolved(&key));
        assert_eq!(*registry.get(&key).unwrap(), 5);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_self_reading_factory_fails() {
        let registry = AttachmentRegistry::new();
        let key = create_key::<u32>();
        registry.put_factory(&key, move |r| Ok(*r.get_assert(&key)? + 1));

        let err = registry.try_get(&key).unwrap_err();
        assert!(err.is_attachment_cycle());
        assert!(err.to_string().contains("u32"));
        assert!(!registry.is_resolved(&key));
    }

    #[test]
    fn test_factory_cycle_fails() {
        let registry = AttachmentRegistry::new();
        let a = create_key::<u8>();
        let b = create_key::<u8>();
        registry.put_factory(&a, move |r| Ok(*r.get_assert(&b)?));
        registry.put_factory(&b, move |r| Ok(*r.get_assert(&a)?));

        assert!(registry.try_get(&a).unwrap_err().is_attachment_cycle());
        assert!(registry.get(&b).is_none());

        registry.put(&b, 4);
        assert_eq!(*registry.get(&a).unwrap(), 4);
    }

    #[test]
    fn test_panicking_factory_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = AttachmentRegistry::new();
        let counter = Arc::clone(&calls);
        let key = registry.register_factory(move |_| {
            assert!(counter.fetch_add(1, Ordering::SeqCst) > 0, "first call panics");
            Ok(2_u8)
        });

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            registry.get(&key)
        }));
        assert!(outcome.is_err());
        assert!(!registry.is_resolved(&key));
        assert_eq!(*registry.get(&key).unwrap(), 2);
    }

    #[test]
    fn test_concurrent_readers_share_one_resolution() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = AttachmentRegistry::new();
        let counter = Arc::clone(&calls);
        let key = registry.register_factory(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(50));
            Ok(11_u32)
        });

        let registry = &registry;
        let values: Vec<u32> = std::thread::scope(|scope| {
            let readers: Vec<_> = (0..4)
                .map(|_| scope.spawn(move || *registry.get(&key).unwrap()))
                .collect();
            readers.into_iter().map(|r| r.join().unwrap()).collect()
        });

        assert_eq!(values, vec![11; 4]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_get_assert_missing() {
        let registry = AttachmentRegistry::new();
        let key = create_key::<Database>();
        let err = registry.get_assert(&key).unwrap_err();
        assert!(err.is_missing_attachment());
        assert!(err.to_string().contains("Database"));
    }

    #[test]
    fn test_has_all_and_has_any() {
        let registry = AttachmentRegistry::new();
        let a = registry.register(1_u8);
        let b = registry.register("b");
        let missing = create_key::<u8>();

        assert!(registry.has_all([a.id(), b.id(), a.id()]));
        assert!(!registry.has_all([a.id(), missing.id()]));
        assert!(registry.has_any([missing.id(), b.id()]));
        assert!(!registry.has_any([missing.id(), missing.id()]));
        assert!(registry.has_all(std::iter::empty()));
        assert!(!registry.has_any(std::iter::empty()));
    }

    #[test]
    fn test_merge_overwrites_in_order() {
        let key = create_key::<&'static str>();
        let only_first = create_key::<u8>();

        let first = AttachmentRegistry::new();
        first.put(&key, "first");
        first.put(&only_first, 1);

        let second = AttachmentRegistry::new();
        second.put(&key, "second");

        let target = AttachmentRegistry::new();
        target.put(&key, "target");
        target.merge(&[&first, &second]);

        assert_eq!(*target.get(&key).unwrap(), "second");
        assert_eq!(*target.get(&only_first).unwrap(), 1);
        assert_eq!(*first.get(&key).unwrap(), "first");
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn test_merge_keeps_factories_lazy() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = AttachmentRegistry::new();
        let counter = Arc::clone(&calls);
        let key = source.register_factory(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(9_i64)
        });

        let target = AttachmentRegistry::new();
        target.merge(&[&source]);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!target.is_resolved(&key));

        assert_eq!(*target.get(&key).unwrap(), 9);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(target.is_resolved(&key));
        assert!(!source.is_resolved(&key));

        assert_eq!(*source.get(&key).unwrap(), 9);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_merged_factory_resolves_against_each_registry() {
        let source = AttachmentRegistry::new();
        let dep = source.register(1_u32);
        let scaled = source.register_factory(move |r| Ok(*r.get_assert(&dep)? * 100));

        let target = AttachmentRegistry::new();
        target.merge(&[&source]);
        target.put(&dep, 7);

        assert_eq!(*target.get(&scaled).unwrap(), 700);
        assert!(!source.is_resolved(&scaled));
        assert_eq!(*source.get(&scaled).unwrap(), 100);
        assert_eq!(*target.get(&scaled).unwrap(), 700);
    }

    #[test]
    fn test_merge_copies_resolved_values() {
        let source = AttachmentRegistry::new();
        let key = source.register_factory(|_| Ok("warm".to_string()));
        let warm = source.get(&key).unwrap();

        let target = AttachmentRegistry::new();
        target.merge(&[&source]);

        assert!(target.is_resolved(&key));
        assert!(Arc::ptr_eq(&warm, &target.get(&key).unwrap()));
        assert!(target.delete(&key));
        assert!(source.has(&key));
    }

    #[test]
    fn test_merge_with_self_is_noop() {
        let registry = AttachmentRegistry::new();
        let key = registry.register(3_u16);
        registry.merge(&[&registry]);
        assert_eq!(*registry.get(&key).unwrap(), 3);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_seed_invocation_never_overwrites() {
        let registry = AttachmentRegistry::new();
        assert!(registry.seed_invocation(vec![1, 2]));
        assert!(!registry.seed_invocation(vec![3]));
        assert_eq!(*registry.invocation::<Vec<i32>>().unwrap(), vec![1, 2]);
        assert!(registry.invocation::<String>().is_none());
    }

    #[test]
    fn test_debug_lists_types() {
        let registry = AttachmentRegistry::new();
        registry.register(1_u8);
        let debug = format!("{:?}", registry);
        assert!(debug.contains("entry_count"));
        assert!(debug.contains("u8"));
    }
}
