//! Versioned object store.
//!
//! Every object kind lives in its own [`Index`], an arena keyed by instance
//! number with an optional unique secondary key. Each index keeps a stack of
//! undo states; [`ObjectDatabase`] drives all of them in lock step so a
//! session opened on the database covers every kind at once.
//!
//! The undo log for a session records, per index, the original value of every
//! modified object, every removed object, the ids created inside the session
//! and the instance counter at session start. Undoing replays that record in
//! reverse; squashing folds it into the enclosing session.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use tracing::error;

use crate::error::{ChainError, Result};
use crate::types::Digest;

/// A ledger object kind.
pub trait Object:
    Clone + fmt::Debug + Default + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const SPACE_ID: u8;
    const TYPE_ID: u8;
    const NAME: &'static str;

    /// Unique secondary key. Kinds without one use `()` and return `None`.
    type Key: Ord + Clone + fmt::Debug + Serialize + Send + Sync + 'static;

    fn id(&self) -> Id<Self>;
    fn set_id(&mut self, id: Id<Self>);

    fn key(&self) -> Option<Self::Key> {
        None
    }
}

/// Typed object id. Only the instance is stored; space and type come from `T`.
pub struct Id<T> {
    instance: u64,
    marker: PhantomData<fn() -> T>,
}

impl<T> Id<T> {
    pub const fn new(instance: u64) -> Self {
        Id {
            instance,
            marker: PhantomData,
        }
    }

    pub fn instance(&self) -> u64 {
        self.instance
    }
}

impl<T: Object> Id<T> {
    pub fn raw(&self) -> RawObjectId {
        RawObjectId {
            space: T::SPACE_ID,
            type_id: T::TYPE_ID,
            instance: self.instance,
        }
    }
}

impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Id<T> {}

impl<T> Default for Id<T> {
    fn default() -> Self {
        Id::new(0)
    }
}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.instance == other.instance
    }
}

impl<T> Eq for Id<T> {}

impl<T> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.instance.cmp(&other.instance)
    }
}

impl<T> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.instance.hash(state)
    }
}

impl<T> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.instance)
    }
}

impl<T: Object> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.raw().fmt(f)
    }
}

impl<T> Serialize for Id<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.instance.serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for Id<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        u64::deserialize(deserializer).map(Id::new)
    }
}

/// Untyped `(space, type, instance)` identity, as returned in operation results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RawObjectId {
    pub space: u8,
    pub type_id: u8,
    pub instance: u64,
}

impl fmt::Display for RawObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.space, self.type_id, self.instance)
    }
}

struct UndoState<T> {
    old_values: BTreeMap<u64, T>,
    removed_values: BTreeMap<u64, T>,
    new_ids: BTreeSet<u64>,
    old_next_instance: u64,
    revision: i64,
}

pub struct Index<T: Object> {
    objects: BTreeMap<u64, T>,
    by_key: BTreeMap<T::Key, u64>,
    next_instance: u64,
    stack: VecDeque<UndoState<T>>,
    revision: i64,
}

impl<T: Object> Default for Index<T> {
    fn default() -> Self {
        Index {
            objects: BTreeMap::new(),
            by_key: BTreeMap::new(),
            next_instance: 0,
            stack: VecDeque::new(),
            revision: 0,
        }
    }
}

impl<T: Object> Index<T> {
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn next_id(&self) -> Id<T> {
        Id::new(self.next_instance)
    }

    pub fn find(&self, id: Id<T>) -> Option<&T> {
        self.objects.get(&id.instance)
    }

    pub fn get(&self, id: Id<T>) -> Result<&T> {
        self.find(id).ok_or_else(|| {
            ChainError::DatabaseQuery(format!("unknown {} {}", T::NAME, id))
        })
    }

    pub fn find_by_key(&self, key: &T::Key) -> Option<&T> {
        self.by_key.get(key).and_then(|instance| self.objects.get(instance))
    }

    /// Objects in id order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.objects.values()
    }

    /// Objects in secondary-key order.
    pub fn iter_by_key(&self) -> impl Iterator<Item = &T> {
        self.by_key
            .values()
            .filter_map(move |instance| self.objects.get(instance))
    }

    pub fn create(&mut self, constructor: impl FnOnce(&mut T)) -> Result<&T> {
        let id = Id::new(self.next_instance);
        let mut object = T::default();
        constructor(&mut object);
        object.set_id(id);

        if let Some(key) = object.key() {
            if self.by_key.contains_key(&key) {
                return Err(ChainError::DatabaseQuery(format!(
                    "duplicate {} key {:?}",
                    T::NAME,
                    key
                )));
            }
            self.by_key.insert(key, id.instance);
        }

        self.next_instance += 1;
        if let Some(head) = self.stack.back_mut() {
            head.new_ids.insert(id.instance);
        }
        Ok(&*self.objects.entry(id.instance).or_insert(object))
    }

    pub fn modify(&mut self, id: Id<T>, modifier: impl FnOnce(&mut T)) -> Result<()> {
        let object = self.objects.get_mut(&id.instance).ok_or_else(|| {
            ChainError::DatabaseQuery(format!("cannot modify unknown {} {}", T::NAME, id))
        })?;
        let previous = object.clone();
        modifier(object);
        object.set_id(id);

        let old_key = previous.key();
        let new_key = object.key();
        if old_key != new_key {
            if let Some(key) = &new_key {
                if self.by_key.contains_key(key) {
                    *object = previous;
                    return Err(ChainError::DatabaseQuery(format!(
                        "duplicate {} key {:?}",
                        T::NAME,
                        key
                    )));
                }
            }
            if let Some(key) = old_key {
                self.by_key.remove(&key);
            }
            if let Some(key) = new_key {
                self.by_key.insert(key, id.instance);
            }
        }

        self.on_modify(previous);
        Ok(())
    }

    pub fn remove(&mut self, id: Id<T>) -> Result<T> {
        let object = self.objects.remove(&id.instance).ok_or_else(|| {
            ChainError::DatabaseQuery(format!("cannot remove unknown {} {}", T::NAME, id))
        })?;
        if let Some(key) = object.key() {
            self.by_key.remove(&key);
        }
        self.on_remove(object.clone());
        Ok(object)
    }

    fn on_modify(&mut self, previous: T) {
        let Some(head) = self.stack.back_mut() else {
            return;
        };
        let instance = previous.id().instance;
        if head.new_ids.contains(&instance) || head.old_values.contains_key(&instance) {
            return;
        }
        head.old_values.insert(instance, previous);
    }

    fn on_remove(&mut self, removed: T) {
        let Some(head) = self.stack.back_mut() else {
            return;
        };
        let instance = removed.id().instance;
        if head.new_ids.remove(&instance) {
            return;
        }
        if let Some(original) = head.old_values.remove(&instance) {
            head.removed_values.insert(instance, original);
            return;
        }
        head.removed_values.entry(instance).or_insert(removed);
    }

    fn insert_restored(&mut self, object: T) {
        let instance = object.id().instance;
        if let Some(key) = object.key() {
            self.by_key.insert(key, instance);
        }
        self.objects.insert(instance, object);
    }

    fn drop_object(&mut self, instance: u64) {
        if let Some(object) = self.objects.remove(&instance) {
            if let Some(key) = object.key() {
                self.by_key.remove(&key);
            }
        }
    }

    fn start_session(&mut self) -> i64 {
        self.revision += 1;
        self.stack.push_back(UndoState {
            old_values: BTreeMap::new(),
            removed_values: BTreeMap::new(),
            new_ids: BTreeSet::new(),
            old_next_instance: self.next_instance,
            revision: self.revision,
        });
        self.revision
    }

    fn undo_session(&mut self) -> bool {
        let Some(head) = self.stack.pop_back() else {
            return false;
        };
        // Everything touched is taken out before anything is put back, so
        // a key reused inside the session cannot shadow a restored object.
        for instance in &head.new_ids {
            self.drop_object(*instance);
        }
        for instance in head.old_values.keys() {
            self.drop_object(*instance);
        }
        self.next_instance = head.old_next_instance;
        for (_, original) in head.old_values {
            self.insert_restored(original);
        }
        for (_, removed) in head.removed_values {
            self.insert_restored(removed);
        }
        self.revision -= 1;
        true
    }

    fn squash_session(&mut self) -> bool {
        let Some(head) = self.stack.pop_back() else {
            return false;
        };
        let Some(prev) = self.stack.back_mut() else {
            // Squashing the outermost session commits it.
            self.revision -= 1;
            return true;
        };

        for (instance, original) in head.old_values {
            if prev.new_ids.contains(&instance) || prev.old_values.contains_key(&instance) {
                continue;
            }
            prev.old_values.insert(instance, original);
        }
        prev.new_ids.extend(head.new_ids);
        for (instance, removed) in head.removed_values {
            if prev.new_ids.remove(&instance) {
                continue;
            }
            if let Some(original) = prev.old_values.remove(&instance) {
                prev.removed_values.insert(instance, original);
                continue;
            }
            prev.removed_values.insert(instance, removed);
        }
        self.revision -= 1;
        true
    }

    fn commit_through(&mut self, revision: i64) {
        while self
            .stack
            .front()
            .is_some_and(|state| state.revision <= revision)
        {
            self.stack.pop_front();
        }
    }
}

/// Object-safe view of an [`Index`] used by the database to drive undo
/// across all kinds.
trait AnyIndex: Send + Sync {
    fn name(&self) -> &'static str;
    fn start_session(&mut self) -> i64;
    fn undo_session(&mut self) -> bool;
    fn squash_session(&mut self) -> bool;
    fn commit_through(&mut self, revision: i64);
    fn revision(&self) -> i64;
    fn set_revision(&mut self, revision: i64) -> bool;
    fn undo_depth(&self) -> usize;
    fn digest_into(&self, hasher: &mut Sha256) -> Result<()>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Object> AnyIndex for Index<T> {
    fn name(&self) -> &'static str {
        T::NAME
    }

    fn start_session(&mut self) -> i64 {
        Index::start_session(self)
    }

    fn undo_session(&mut self) -> bool {
        Index::undo_session(self)
    }

    fn squash_session(&mut self) -> bool {
        Index::squash_session(self)
    }

    fn commit_through(&mut self, revision: i64) {
        Index::commit_through(self, revision)
    }

    fn revision(&self) -> i64 {
        self.revision
    }

    fn set_revision(&mut self, revision: i64) -> bool {
        if !self.stack.is_empty() {
            return false;
        }
        self.revision = revision;
        true
    }

    fn undo_depth(&self) -> usize {
        self.stack.len()
    }

    fn digest_into(&self, hasher: &mut Sha256) -> Result<()> {
        hasher.update([T::SPACE_ID, T::TYPE_ID]);
        hasher.update(self.next_instance.to_le_bytes());
        hasher.update(bincode::serialize(&self.objects)?);
        hasher.update(bincode::serialize(&self.by_key)?);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// All indices plus the shared undo revision.
#[derive(Default)]
pub struct ObjectDatabase {
    indices: BTreeMap<(u8, u8), Box<dyn AnyIndex>>,
    revision: i64,
}

impl ObjectDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an index for `T`. Must happen before any session is opened.
    pub fn add_index<T: Object>(&mut self) {
        let mut index = Index::<T>::default();
        index.revision = self.revision;
        self.indices
            .entry((T::SPACE_ID, T::TYPE_ID))
            .or_insert_with(|| Box::new(index));
    }

    pub fn index<T: Object>(&self) -> Result<&Index<T>> {
        self.indices
            .get(&(T::SPACE_ID, T::TYPE_ID))
            .and_then(|index| index.as_any().downcast_ref::<Index<T>>())
            .ok_or_else(|| ChainError::IndexCorruption(format!("no index for {}", T::NAME)))
    }

    fn index_mut<T: Object>(&mut self) -> Result<&mut Index<T>> {
        self.indices
            .get_mut(&(T::SPACE_ID, T::TYPE_ID))
            .and_then(|index| index.as_any_mut().downcast_mut::<Index<T>>())
            .ok_or_else(|| ChainError::IndexCorruption(format!("no index for {}", T::NAME)))
    }

    pub fn create<T: Object>(&mut self, constructor: impl FnOnce(&mut T)) -> Result<&T> {
        self.index_mut::<T>()?.create(constructor)
    }

    pub fn modify<T: Object>(&mut self, id: Id<T>, modifier: impl FnOnce(&mut T)) -> Result<()> {
        self.index_mut::<T>()?.modify(id, modifier)
    }

    pub fn remove<T: Object>(&mut self, id: Id<T>) -> Result<T> {
        self.index_mut::<T>()?.remove(id)
    }

    pub fn get<T: Object>(&self, id: Id<T>) -> Result<&T> {
        self.index::<T>()?.get(id)
    }

    pub fn find<T: Object>(&self, id: Id<T>) -> Option<&T> {
        self.index::<T>().ok().and_then(|index| index.find(id))
    }

    pub fn find_by_key<T: Object>(&self, key: &T::Key) -> Option<&T> {
        self.index::<T>().ok().and_then(|index| index.find_by_key(key))
    }

    pub fn revision(&self) -> i64 {
        self.revision
    }

    /// Number of open undo states (sessions plus retained block checkpoints).
    pub fn undo_depth(&self) -> usize {
        self.indices
            .values()
            .next()
            .map_or(0, |index| index.undo_depth())
    }

    pub fn set_revision(&mut self, revision: i64) -> Result<()> {
        for index in self.indices.values_mut() {
            if !index.set_revision(revision) {
                return Err(ChainError::UndoDatabase(format!(
                    "cannot set revision of {} while undo states are open",
                    index.name()
                )));
            }
        }
        self.revision = revision;
        Ok(())
    }

    pub fn start_undo_session(&mut self) -> Result<i64> {
        for index in self.indices.values_mut() {
            let revision = index.start_session();
            if revision != self.revision + 1 {
                return Err(ChainError::IndexCorruption(format!(
                    "{} is at revision {} while the database is at {}",
                    index.name(),
                    revision - 1,
                    self.revision
                )));
            }
        }
        self.revision += 1;
        Ok(self.revision)
    }

    pub fn undo(&mut self) -> Result<()> {
        self.each_index(StackAction::Undo)
    }

    pub fn squash(&mut self) -> Result<()> {
        self.each_index(StackAction::Squash)
    }

    /// Discard undo states up to and including `revision`, making them final.
    pub fn commit(&mut self, revision: i64) {
        for index in self.indices.values_mut() {
            index.commit_through(revision);
        }
    }

    pub fn undo_all(&mut self) -> Result<()> {
        while self.undo_depth() > 0 {
            self.undo()?;
        }
        Ok(())
    }

    fn each_index(&mut self, action: StackAction) -> Result<()> {
        if self.undo_depth() == 0 {
            return Err(ChainError::UndoDatabase("no open undo session".into()));
        }
        for index in self.indices.values_mut() {
            let done = match action {
                StackAction::Undo => index.undo_session(),
                StackAction::Squash => index.squash_session(),
            };
            if !done {
                return Err(ChainError::IndexCorruption(format!(
                    "{} has no undo state",
                    index.name()
                )));
            }
        }
        self.revision -= 1;
        Ok(())
    }

    /// Digest of every index's contents, ids and instance counters.
    pub fn state_digest(&self) -> Result<Digest> {
        let mut hasher = Sha256::new();
        for index in self.indices.values() {
            index.digest_into(&mut hasher)?;
        }
        Ok(hasher.finalize().into())
    }
}

#[derive(Clone, Copy)]
enum StackAction {
    Undo,
    Squash,
}

/// Anything that owns an [`ObjectDatabase`] and can host undo sessions.
pub trait UndoDatabase {
    fn object_database(&mut self) -> &mut ObjectDatabase;
}

impl UndoDatabase for ObjectDatabase {
    fn object_database(&mut self) -> &mut ObjectDatabase {
        self
    }
}

/// Scoped rollback boundary.
///
/// Dereferences to the owning database so work continues through the guard.
/// Dropping it without `push`, `squash` or `undo` reverts everything done
/// since it was opened.
pub struct UndoSession<'a, D: UndoDatabase> {
    db: &'a mut D,
    active: bool,
}

impl<'a, D: UndoDatabase> UndoSession<'a, D> {
    pub fn start(db: &'a mut D) -> Result<Self> {
        db.object_database().start_undo_session()?;
        Ok(UndoSession { db, active: true })
    }

    /// Keep the changes as a retained undo state (a block checkpoint).
    pub fn push(mut self) {
        self.active = false;
    }

    /// Merge the changes into the enclosing session.
    pub fn squash(mut self) -> Result<()> {
        self.active = false;
        self.db.object_database().squash()
    }

    pub fn undo(mut self) -> Result<()> {
        self.active = false;
        self.db.object_database().undo()
    }
}

impl<D: UndoDatabase> Deref for UndoSession<'_, D> {
    type Target = D;

    fn deref(&self) -> &D {
        self.db
    }
}

impl<D: UndoDatabase> DerefMut for UndoSession<'_, D> {
    fn deref_mut(&mut self) -> &mut D {
        self.db
    }
}

impl<D: UndoDatabase> Drop for UndoSession<'_, D> {
    fn drop(&mut self) {
        if self.active {
            if let Err(e) = self.db.object_database().undo() {
                error!(error = %e, "failed to roll back undo session");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Widget {
        id: Id<Widget>,
        name: String,
        value: i64,
    }

    impl Object for Widget {
        const SPACE_ID: u8 = 9;
        const TYPE_ID: u8 = 1;
        const NAME: &'static str = "widget";
        type Key = String;

        fn id(&self) -> Id<Self> {
            self.id
        }

        fn set_id(&mut self, id: Id<Self>) {
            self.id = id;
        }

        fn key(&self) -> Option<String> {
            Some(self.name.clone())
        }
    }

    fn database() -> ObjectDatabase {
        let mut db = ObjectDatabase::new();
        db.add_index::<Widget>();
        db
    }

    fn add(db: &mut ObjectDatabase, name: &str, value: i64) -> Id<Widget> {
        db.create::<Widget>(|w| {
            w.name = name.to_string();
            w.value = value;
        })
        .unwrap()
        .id
    }

    #[test]
    fn test_create_assigns_sequential_ids() {
        let mut db = database();
        let a = add(&mut db, "a", 1);
        let b = add(&mut db, "b", 2);
        assert_eq!(a.instance(), 0);
        assert_eq!(b.instance(), 1);
        assert_eq!(a.raw().to_string(), "9.1.0");
        assert_eq!(db.find_by_key::<Widget>(&"b".to_string()).unwrap().value, 2);
    }

    #[test]
    fn test_unique_key_enforced() {
        let mut db = database();
        add(&mut db, "a", 1);
        let b = add(&mut db, "b", 2);
        assert!(db.create::<Widget>(|w| w.name = "a".into()).is_err());
        assert!(db.modify(b, |w| w.name = "a".into()).is_err());
        // failed modify is reverted
        assert_eq!(db.get(b).unwrap().name, "b");
        assert_eq!(db.index::<Widget>().unwrap().next_id().instance(), 2);
    }

    #[test]
    fn test_undo_restores_create_modify_remove() {
        let mut db = database();
        let a = add(&mut db, "a", 1);
        let b = add(&mut db, "b", 2);
        let before = db.state_digest().unwrap();

        db.start_undo_session().unwrap();
        add(&mut db, "c", 3);
        db.modify(a, |w| {
            w.value = 10;
            w.name = "renamed".into();
        })
        .unwrap();
        db.remove(b).unwrap();
        db.undo().unwrap();

        assert_eq!(db.state_digest().unwrap(), before);
        assert_eq!(db.get(a).unwrap().value, 1);
        assert_eq!(db.get(b).unwrap().name, "b");
        assert!(db.find_by_key::<Widget>(&"c".to_string()).is_none());
        assert!(db.find_by_key::<Widget>(&"renamed".to_string()).is_none());
        assert_eq!(db.index::<Widget>().unwrap().next_id().instance(), 2);
    }

    #[test]
    fn test_undo_with_key_reused_in_session() {
        let mut db = database();
        let a = add(&mut db, "a", 1);
        let b = add(&mut db, "b", 2);
        let before = db.state_digest().unwrap();

        db.start_undo_session().unwrap();
        db.modify(a, |w| w.name = "x".into()).unwrap();
        add(&mut db, "a", 3);
        db.remove(b).unwrap();
        add(&mut db, "b", 4);
        db.undo().unwrap();

        assert_eq!(db.find_by_key::<Widget>(&"a".to_string()).unwrap().id, a);
        assert_eq!(db.find_by_key::<Widget>(&"b".to_string()).unwrap().id, b);
        assert_eq!(db.state_digest().unwrap(), before);
    }

    #[test]
    fn test_undo_key_swap() {
        let mut db = database();
        let a = add(&mut db, "a", 1);
        let b = add(&mut db, "b", 2);
        let before = db.state_digest().unwrap();

        db.start_undo_session().unwrap();
        db.modify(a, |w| w.name = "tmp".into()).unwrap();
        db.modify(b, |w| w.name = "a".into()).unwrap();
        db.modify(a, |w| w.name = "b".into()).unwrap();
        db.undo().unwrap();

        assert_eq!(db.find_by_key::<Widget>(&"a".to_string()).unwrap().id, a);
        assert_eq!(db.find_by_key::<Widget>(&"b".to_string()).unwrap().id, b);
        assert_eq!(db.state_digest().unwrap(), before);
    }

    #[test]
    fn test_modify_then_remove_restores_original() {
        let mut db = database();
        let a = add(&mut db, "a", 1);
        db.start_undo_session().unwrap();
        db.modify(a, |w| w.value = 5).unwrap();
        db.remove(a).unwrap();
        db.undo().unwrap();
        assert_eq!(db.get(a).unwrap().value, 1);
    }

    #[test]
    fn test_squash_merges_into_parent() {
        let mut db = database();
        let a = add(&mut db, "a", 1);
        let before = db.state_digest().unwrap();

        db.start_undo_session().unwrap();
        let c = add(&mut db, "c", 3);
        db.start_undo_session().unwrap();
        db.modify(c, |w| w.value = 30).unwrap();
        db.modify(a, |w| w.value = 11).unwrap();
        db.remove(c).unwrap();
        db.squash().unwrap();
        assert_eq!(db.revision(), 1);
        assert_eq!(db.get(a).unwrap().value, 11);

        db.undo().unwrap();
        assert_eq!(db.state_digest().unwrap(), before);
    }

    #[test]
    fn test_commit_discards_old_states() {
        let mut db = database();
        db.start_undo_session().unwrap();
        add(&mut db, "a", 1);
        db.start_undo_session().unwrap();
        add(&mut db, "b", 2);
        assert_eq!(db.undo_depth(), 2);

        db.commit(1);
        assert_eq!(db.undo_depth(), 1);
        db.undo().unwrap();
        // "a" is now final, "b" was undone
        assert!(db.find_by_key::<Widget>(&"a".to_string()).is_some());
        assert!(db.find_by_key::<Widget>(&"b".to_string()).is_none());
        assert!(db.undo().is_err());
    }

    #[test]
    fn test_session_guard_rolls_back_on_drop() {
        let mut db = database();
        add(&mut db, "a", 1);
        let before = db.state_digest().unwrap();
        {
            let mut session = UndoSession::start(&mut db).unwrap();
            add(&mut session, "b", 2);
        }
        assert_eq!(db.state_digest().unwrap(), before);
        assert_eq!(db.revision(), 0);

        let mut session = UndoSession::start(&mut db).unwrap();
        add(&mut session, "b", 2);
        session.push();
        assert_eq!(db.revision(), 1);
        assert_eq!(db.undo_depth(), 1);
    }

    #[test]
    fn test_nested_guards_squash() {
        let mut db = database();
        let mut outer = UndoSession::start(&mut db).unwrap();
        {
            let mut inner = UndoSession::start(&mut *outer).unwrap();
            add(&mut inner, "a", 1);
            inner.squash().unwrap();
        }
        assert_eq!(outer.index::<Widget>().unwrap().len(), 1);
        drop(outer);
        assert!(db.index::<Widget>().unwrap().is_empty());
    }
}
