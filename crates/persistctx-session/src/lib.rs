//! Persistence context for persistctx.
//!
//! The [`Session`] is the per-transaction coordinator. It owns one store
//! connection and three pieces of in-memory state:
//!
//! - the **identity map**: at most one instance per (entity type, primary key),
//!   so repeated lookups return the same object;
//! - the **snapshot store**: persisted state captured when an instance becomes
//!   managed, compared field by field at flush time;
//! - the **write-behind queue**: inserts, updates and deletes accumulated since
//!   the last flush, executed in FIFO order.
//!
//! # Design Philosophy
//!
//! - **Write-behind**: `persist` and `remove` only enqueue; nothing reaches the
//!   store before `flush` or `commit`.
//! - **Reference identity**: instances are shared [`EntityRef`] handles; a cache hit
//!   hands back the very handle that was persisted or loaded.
//! - **Explicit ownership**: sessions come from a caller-owned [`SessionFactory`]
//!   and own their connection. A session is single-threaded.
//! - **No silent correction**: lifecycle and identity violations are errors.
//!
//! # Example
//!
//! ```ignore
//! let factory = SessionFactory::builder()
//!     .register::<Member>()
//!     .build(MemoryDatabase::new())?;
//! let mut session = factory.open_session()?;
//!
//! let member = EntityRef::new(Member::new("member1", "A", 12));
//! session.persist(&member)?;                 // enqueued, not written
//! let found = session.find::<Member>("member1")?.unwrap();
//! assert!(EntityRef::ptr_eq(&member, &found)); // first-level cache
//!
//! member.borrow_mut().age = 13;
//! session.commit()?;                         // INSERT, then UPDATE age
//! ```

pub mod config;
pub mod factory;
pub mod identity_map;
pub mod navigation;
pub mod queue;
pub mod snapshot;

use std::rc::Rc;
use std::time::Instant;

use persistctx_core::{
    BackingStore, Entity, EntityRef, EntityRegistry, EntityType, ErasedEntity, Error,
    LifecycleState, LinkTableInfo, Predicate, PrimaryKey, RelationshipKind, Result, Row, ToMany,
    ToOne, Value,
};
use serde::Serialize;

pub use config::{FlushMode, SessionConfig};
pub use factory::{SessionFactory, SessionFactoryBuilder};
pub use identity_map::{IdentityMap, ObjectKey};
pub use navigation::{CallSite, NavigationStats, NavigationTracker};
pub use queue::{FlushResult, OpKind, PendingOp, WriteBehindQueue};
pub use snapshot::{Diff, Snapshot, SnapshotStore};

// ============================================================================
// Session State
// ============================================================================

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// Accepting operations.
    Open,
    /// Inside `flush`.
    Flushing,
    /// Closed; every operation fails.
    Closed,
}

// ============================================================================
// Session
// ============================================================================

/// The persistence context.
///
/// Tracks instances persisted into or loaded through it and coordinates
/// flushing their changes to the backing store.
pub struct Session<S: BackingStore> {
    /// The store connection.
    store: S,
    /// Validated entity metadata shared with the factory.
    registry: Rc<EntityRegistry>,
    /// Configuration.
    config: SessionConfig,
    state: SessionState,
    /// Whether a store transaction is open.
    in_transaction: bool,
    identity_map: IdentityMap,
    snapshots: SnapshotStore,
    queue: WriteBehindQueue,
    navigation: NavigationTracker,
}

impl<S: BackingStore> Session<S> {
    /// Create a session over an open store connection.
    ///
    /// Sessions are normally opened with [`SessionFactory::open_session`].
    pub fn new(store: S, registry: Rc<EntityRegistry>, config: SessionConfig) -> Self {
        let navigation = NavigationTracker::new(config.lazy_load_warn_threshold);
        Self {
            store,
            registry,
            config,
            state: SessionState::Open,
            in_transaction: false,
            identity_map: IdentityMap::new(),
            snapshots: SnapshotStore::new(),
            queue: WriteBehindQueue::new(),
            navigation,
        }
    }

    /// Get a reference to the underlying store connection.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Get the session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The entity registry.
    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    fn ensure_open(&self, operation: &'static str) -> Result<()> {
        if self.state == SessionState::Closed {
            return Err(Error::SessionClosed { operation });
        }
        Ok(())
    }

    /// Key under which this exact instance is tracked, if it is.
    fn tracked_key<E: Entity>(&self, entity: &EntityRef<E>) -> Option<ObjectKey> {
        let erased = entity.erased();
        let key = ObjectKey::of(&*erased);
        self.identity_map.holds(&key, &erased).then_some(key)
    }

    // ========================================================================
    // Object Tracking
    // ========================================================================

    /// Make a new instance managed and schedule its INSERT.
    ///
    /// A store-generated key is assigned here when the instance has none.
    /// Persisting an instance this session already manages is a no-op.
    #[tracing::instrument(level = "debug", skip(self, entity))]
    pub fn persist<E: Entity>(&mut self, entity: &EntityRef<E>) -> Result<()> {
        self.ensure_open("persist")?;
        let registry = Rc::clone(&self.registry);
        let ty = registry.get(E::NAME)?;

        match entity.state() {
            LifecycleState::New => {}
            LifecycleState::Managed if self.tracked_key(entity).is_some() => {
                tracing::debug!(entity = E::NAME, "Already managed; persist is a no-op");
                return Ok(());
            }
            state => {
                return Err(Error::IllegalState {
                    operation: "persist",
                    state,
                });
            }
        }

        if ty.has_generated_key() && entity.key().is_unassigned() {
            let id = self.store.next_id(E::NAME)?;
            // Reject before assigning so a refused instance keeps no key. The
            // sequence value itself is consumed either way.
            let tentative = ObjectKey::new(E::NAME, id);
            if self.identity_map.lookup(&tentative).is_some() {
                return Err(Error::IdentityConflict {
                    entity: E::NAME,
                    key: tentative.key.to_string(),
                });
            }
            entity.borrow_mut().assign_generated_key(id);
            tracing::debug!(entity = E::NAME, id, "Assigned generated key");
        }
        let key = entity.key();
        if key.is_unassigned() {
            return Err(Error::Mapping(format!(
                "cannot persist {} without an identifier",
                E::NAME
            )));
        }

        let erased = entity.erased();
        let object_key = ObjectKey::new(E::NAME, key);
        self.identity_map
            .register(object_key.clone(), Rc::clone(&erased))?;
        erased.set_state(LifecycleState::Managed);

        let snapshot = self.snapshots.capture(object_key.clone(), &*erased, ty);
        let row = snapshot.values().clone();
        let links: Vec<(LinkTableInfo, Vec<PrimaryKey>)> = ty
            .owning_link_relationships()
            .filter_map(|rel| rel.link_table.map(|link| (link, snapshot.links(rel.name).to_vec())))
            .collect();

        tracing::info!(entity = E::NAME, key = %object_key.key, "Persisting entity");

        self.queue.enqueue(PendingOp::Insert {
            key: object_key.clone(),
            row,
        });
        for (link, targets) in links {
            for target in targets {
                self.queue.enqueue(PendingOp::Link {
                    link,
                    owner: object_key.key.clone(),
                    target,
                });
            }
        }
        Ok(())
    }

    /// Get an instance by primary key.
    ///
    /// First checks the identity map, then reads the store. A hit returns the
    /// tracked handle itself, including one already marked REMOVED.
    #[tracing::instrument(level = "debug", skip(self, key))]
    pub fn find<E: Entity>(&mut self, key: impl Into<PrimaryKey>) -> Result<Option<EntityRef<E>>> {
        self.ensure_open("find")?;
        let registry = Rc::clone(&self.registry);
        let ty = registry.get(E::NAME)?;
        let object_key = ObjectKey::new(E::NAME, key);

        if let Some(found) = self.identity_map.lookup(&object_key) {
            tracing::trace!(key = %object_key, "Identity map hit");
            return downcast::<E>(found).map(Some);
        }

        tracing::debug!(key = %object_key, "Identity map miss; reading store");
        match self.store.read_row(E::NAME, &object_key.key)? {
            Some(row) => self.materialize::<E>(ty, &row).map(Some),
            None => Ok(None),
        }
    }

    /// Mark a managed instance for deletion.
    ///
    /// The instance stays visible to `find` as REMOVED until its DELETE is flushed.
    /// Link rows it owns are deleted first.
    #[tracing::instrument(level = "debug", skip(self, entity))]
    pub fn remove<E: Entity>(&mut self, entity: &EntityRef<E>) -> Result<()> {
        self.ensure_open("remove")?;
        let state = entity.state();
        if state != LifecycleState::Managed {
            return Err(Error::IllegalState {
                operation: "remove",
                state,
            });
        }
        let object_key = self
            .tracked_key(entity)
            .ok_or(Error::NotManaged { operation: "remove" })?;
        let registry = Rc::clone(&self.registry);
        let ty = registry.get(E::NAME)?;

        tracing::info!(entity = E::NAME, key = %object_key.key, "Marking entity for deletion");

        entity.erased().set_state(LifecycleState::Removed);
        self.snapshots.discard(&object_key);
        for rel in ty.owning_link_relationships() {
            if let Some(link) = rel.link_table {
                self.queue.enqueue(PendingOp::UnlinkAll {
                    link,
                    owner: object_key.key.clone(),
                });
            }
        }
        self.queue.enqueue(PendingOp::Delete { key: object_key });
        Ok(())
    }

    /// Stop tracking a managed instance.
    ///
    /// Operations already enqueued for it, including its INSERT, are kept and
    /// still run at the next flush.
    #[tracing::instrument(level = "debug", skip(self, entity))]
    pub fn detach<E: Entity>(&mut self, entity: &EntityRef<E>) -> Result<()> {
        self.ensure_open("detach")?;
        let state = entity.state();
        if state != LifecycleState::Managed {
            return Err(Error::IllegalState {
                operation: "detach",
                state,
            });
        }
        let object_key = self
            .tracked_key(entity)
            .ok_or(Error::NotManaged { operation: "detach" })?;

        self.identity_map.evict(&object_key);
        self.snapshots.discard(&object_key);
        entity.erased().set_state(LifecycleState::Detached);
        tracing::debug!(key = %object_key, pending = self.queue.len(), "Detached entity");
        Ok(())
    }

    /// Detach every tracked instance. Pending operations are kept.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn clear(&mut self) -> Result<()> {
        self.ensure_open("clear")?;
        let detached = self.detach_all();
        self.navigation.reset();
        tracing::info!(detached, pending = self.queue.len(), "Cleared persistence context");
        Ok(())
    }

    fn detach_all(&mut self) -> usize {
        let evicted = self.identity_map.evict_all();
        for entity in &evicted {
            entity.set_state(LifecycleState::Detached);
        }
        self.snapshots.clear();
        evicted.len()
    }

    /// Whether this exact instance is managed by this session.
    pub fn contains<E: Entity>(&self, entity: &EntityRef<E>) -> bool {
        entity.state() == LifecycleState::Managed && self.tracked_key(entity).is_some()
    }

    /// State of the instance tracked under `key`, if any.
    pub fn state_of<E: Entity>(&self, key: impl Into<PrimaryKey>) -> Option<LifecycleState> {
        self.identity_map
            .lookup(&ObjectKey::new(E::NAME, key))
            .map(|e| e.state())
    }

    // ========================================================================
    // Queries and Navigation
    // ========================================================================

    /// Instances of `E` whose stored rows match `predicate`, in store order.
    ///
    /// Rows whose key is already tracked resolve to the tracked instance, whose
    /// in-memory state wins; REMOVED instances are skipped. With
    /// [`FlushMode::Auto`] pending changes are flushed first.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn query<E: Entity>(&mut self, predicate: Predicate) -> Result<Vec<EntityRef<E>>> {
        self.ensure_open("query")?;
        let registry = Rc::clone(&self.registry);
        let ty = registry.get(E::NAME)?;
        if self.config.flush_mode == FlushMode::Auto {
            self.flush()?;
        }
        let rows = self.store.query_by_predicate(E::NAME, &predicate)?;
        tracing::debug!(entity = E::NAME, predicate = %predicate, rows = rows.len(), "Query");
        self.resolve_rows::<E>(ty, rows)
    }

    /// Instances of `E` matching `predicate` whose owning reference
    /// `relationship` points at a `T` row matching `target`.
    ///
    /// Runs as two store queries: the keys of matching `T` rows, then the `E`
    /// rows whose join column holds one of them. Flushing and identity follow
    /// [`query`](Self::query).
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn query_join<E: Entity, T: Entity>(
        &mut self,
        predicate: Predicate,
        relationship: &'static str,
        target: Predicate,
    ) -> Result<Vec<EntityRef<E>>> {
        self.ensure_open("query")?;
        let registry = Rc::clone(&self.registry);
        let ty = registry.get(E::NAME)?;
        let rel = *registry.relationship(E::NAME, relationship)?;
        let column = match rel.local_key {
            Some(column) if rel.kind.is_to_one() && rel.related == T::NAME => column,
            _ => {
                return Err(Error::Mapping(format!(
                    "{}.{relationship} is not an owning reference to {}",
                    E::NAME,
                    T::NAME
                )));
            }
        };
        let target_key = match registry.get(T::NAME)?.primary_key_columns().as_slice() {
            [pk] => *pk,
            _ => {
                return Err(Error::Mapping(format!(
                    "cannot join {} on a composite key",
                    T::NAME
                )));
            }
        };
        if self.config.flush_mode == FlushMode::Auto {
            self.flush()?;
        }

        let keys: Vec<Value> = self
            .store
            .query_by_predicate(T::NAME, &target)?
            .iter()
            .filter_map(|row| row.get(target_key).cloned())
            .collect();
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let filter = Predicate::And(vec![predicate, Predicate::In(column, keys)]);
        let rows = self.store.query_by_predicate(E::NAME, &filter)?;
        tracing::debug!(
            entity = E::NAME,
            relationship,
            target = %target,
            rows = rows.len(),
            "Join query"
        );
        self.resolve_rows::<E>(ty, rows)
    }

    /// Resolve a lazy single-valued relationship.
    ///
    /// An owning reference is resolved through [`find`](Self::find), so a target
    /// already in the identity map costs nothing. An inverse one-to-one reference
    /// is looked up by the owning side's join column.
    #[track_caller]
    pub fn load_reference<E: Entity, T: Entity>(
        &mut self,
        owner: &EntityRef<E>,
        relationship: &'static str,
        field: fn(&mut E) -> &mut ToOne<T>,
    ) -> Result<Option<EntityRef<T>>> {
        self.ensure_open("load a reference")?;
        let registry = Rc::clone(&self.registry);
        let rel = *registry.relationship(E::NAME, relationship)?;
        if !rel.kind.is_to_one() || rel.related != T::NAME {
            return Err(Error::Mapping(format!(
                "{}.{relationship} is not a reference to {}",
                E::NAME,
                T::NAME
            )));
        }
        {
            let mut value = owner.borrow_mut();
            let reference = field(&mut value);
            if reference.is_loaded() {
                return Ok(reference.get().cloned());
            }
        }

        self.navigation.record_load(E::NAME, relationship);

        if rel.is_owning() {
            let Some(key) = field(&mut owner.borrow_mut()).key() else {
                return Ok(None);
            };
            let target = self.find::<T>(key)?;
            // A dangling key stays unloaded; clearing it would rewrite the join column.
            if let Some(target) = &target {
                field(&mut owner.borrow_mut()).set(Some(target.clone()));
            }
            return Ok(target);
        }

        let owning = registry.owning_side(&rel)?;
        let column = owning.local_key.ok_or_else(|| {
            Error::Mapping(format!("{}.{} has no join column", T::NAME, owning.name))
        })?;
        let value = single_key_value::<E>(&owner.key())?;
        let rows = self
            .store
            .query_by_predicate(T::NAME, &Predicate::Eq(column, value))?;
        let target = self
            .resolve_rows::<T>(registry.get(T::NAME)?, rows)?
            .into_iter()
            .next();
        field(&mut owner.borrow_mut()).set(target.clone());
        Ok(target)
    }

    /// Resolve a lazy collection, at most once.
    ///
    /// The first call issues one query against the child table (one-to-many) or
    /// one against the link table plus one batched query for targets not yet
    /// tracked (many-to-many). Tracked instances are reused. Items added before
    /// loading are kept. Later calls are served from the loaded collection.
    #[track_caller]
    pub fn load_collection<E: Entity, T: Entity>(
        &mut self,
        owner: &EntityRef<E>,
        relationship: &'static str,
        field: fn(&mut E) -> &mut ToMany<T>,
    ) -> Result<Vec<EntityRef<T>>> {
        self.ensure_open("load a collection")?;
        let registry = Rc::clone(&self.registry);
        let rel = *registry.relationship(E::NAME, relationship)?;
        if rel.kind.is_to_one() || rel.related != T::NAME {
            return Err(Error::Mapping(format!(
                "{}.{relationship} is not a collection of {}",
                E::NAME,
                T::NAME
            )));
        }
        {
            let mut value = owner.borrow_mut();
            let items = field(&mut value);
            if items.is_loaded() {
                return Ok(items.items().to_vec());
            }
        }

        self.navigation.record_load(E::NAME, relationship);

        let owner_value = single_key_value::<E>(&owner.key())?;
        let target_ty = registry.get(T::NAME)?;
        let mut stored_links = Vec::new();
        let targets = if rel.kind == RelationshipKind::OneToMany {
            let owning = registry.owning_side(&rel)?;
            let column = owning.local_key.ok_or_else(|| {
                Error::Mapping(format!("{}.{} has no join column", T::NAME, owning.name))
            })?;
            let rows = self
                .store
                .query_by_predicate(T::NAME, &Predicate::Eq(column, owner_value))?;
            self.resolve_rows::<T>(target_ty, rows)?
        } else {
            let (link, by, other) = if rel.is_owning() {
                let link = link_table(E::NAME, &rel)?;
                (link, link.local_column, link.remote_column)
            } else {
                let link = link_table(T::NAME, registry.owning_side(&rel)?)?;
                (link, link.remote_column, link.local_column)
            };
            let link_rows = self
                .store
                .query_by_predicate(link.table_name, &Predicate::Eq(by, owner_value))?;
            let keys: Vec<Value> = link_rows
                .iter()
                .filter_map(|row| row.get(other).cloned())
                .collect();
            stored_links = keys.iter().cloned().map(PrimaryKey::single).collect();
            self.load_by_keys::<T>(target_ty, &keys)?
        };

        tracing::debug!(
            entity = E::NAME,
            relationship,
            loaded = targets.len(),
            "Loaded collection"
        );

        field(&mut owner.borrow_mut()).mark_loaded(targets);
        if rel.kind == RelationshipKind::ManyToMany && rel.is_owning() {
            if let Some(object_key) = self.tracked_key(owner) {
                self.snapshots
                    .add_links(&object_key, rel.name, &stored_links);
            }
        }
        Ok(field(&mut owner.borrow_mut()).items().to_vec())
    }

    fn materialize<E: Entity>(&mut self, ty: &EntityType, row: &Row) -> Result<EntityRef<E>> {
        let value = E::from_row(row)?;
        let object_key = ObjectKey::new(E::NAME, value.primary_key());
        if let Some(existing) = self.identity_map.lookup(&object_key) {
            return downcast::<E>(existing);
        }
        let entity = EntityRef::with_state(value, LifecycleState::Managed);
        let erased = entity.erased();
        self.identity_map
            .register(object_key.clone(), Rc::clone(&erased))?;
        self.snapshots.capture(object_key.clone(), &*erased, ty);
        tracing::debug!(key = %object_key, "Loaded entity into persistence context");
        Ok(entity)
    }

    fn resolve_rows<E: Entity>(&mut self, ty: &EntityType, rows: Vec<Row>) -> Result<Vec<EntityRef<E>>> {
        let mut resolved = Vec::with_capacity(rows.len());
        for row in rows {
            let object_key = ObjectKey::new(E::NAME, key_from_row(ty, &row));
            let tracked = self.identity_map.lookup(&object_key).cloned();
            match tracked {
                Some(existing) if existing.state() == LifecycleState::Removed => {}
                Some(existing) => resolved.push(downcast::<E>(&existing)?),
                None => resolved.push(self.materialize::<E>(ty, &row)?),
            }
        }
        Ok(resolved)
    }

    /// Tracked or freshly loaded instances for `keys`, in key order, with one
    /// batched query for the keys not yet tracked.
    fn load_by_keys<E: Entity>(&mut self, ty: &EntityType, keys: &[Value]) -> Result<Vec<EntityRef<E>>> {
        let columns = ty.primary_key_columns();
        let [pk] = columns.as_slice() else {
            return Err(Error::Mapping(format!(
                "{} needs a single-column key to be loaded through a link table",
                E::NAME
            )));
        };
        let missing: Vec<Value> = keys
            .iter()
            .filter(|v| {
                self.identity_map
                    .lookup(&ObjectKey::new(E::NAME, (*v).clone()))
                    .is_none()
            })
            .cloned()
            .collect();
        if !missing.is_empty() {
            let rows = self
                .store
                .query_by_predicate(E::NAME, &Predicate::In(*pk, missing))?;
            for row in &rows {
                self.materialize::<E>(ty, row)?;
            }
        }

        let mut loaded = Vec::with_capacity(keys.len());
        for value in keys {
            let object_key = ObjectKey::new(E::NAME, value.clone());
            if let Some(entity) = self.identity_map.lookup(&object_key) {
                if entity.state() != LifecycleState::Removed {
                    loaded.push(downcast::<E>(entity)?);
                }
            }
        }
        Ok(loaded)
    }

    // ========================================================================
    // Bidirectional Setters
    // ========================================================================

    /// [`persistctx_core::set_many_to_one`] for an instance read from the store.
    ///
    /// An unloaded reference is resolved first so the previous parent's loaded
    /// collection loses `child`. A reference whose target no longer exists is
    /// simply replaced.
    #[track_caller]
    pub fn set_many_to_one<C: Entity, P: Entity>(
        &mut self,
        child: &EntityRef<C>,
        relationship: &'static str,
        parent: Option<&EntityRef<P>>,
        owning: fn(&mut C) -> &mut ToOne<P>,
        inverse: fn(&mut P) -> &mut ToMany<C>,
    ) -> Result<()> {
        self.ensure_open("set a reference")?;
        self.resolve_for_update(child, relationship, owning)?;
        persistctx_core::set_many_to_one(child, parent, owning, inverse)
    }

    /// [`persistctx_core::set_one_to_one`] for instances read from the store.
    ///
    /// Resolves the owner's current target and the new target's current owner,
    /// so both are released before the association moves.
    #[track_caller]
    pub fn set_one_to_one<O: Entity, T: Entity>(
        &mut self,
        owner: &EntityRef<O>,
        relationship: &'static str,
        target: Option<&EntityRef<T>>,
        owning: fn(&mut O) -> &mut ToOne<T>,
        inverse: fn(&mut T) -> &mut ToOne<O>,
    ) -> Result<()> {
        self.ensure_open("set a reference")?;
        self.resolve_for_update(owner, relationship, owning)?;
        if let Some(target) = target {
            let registry = Rc::clone(&self.registry);
            let inverse_name = registry
                .get(T::NAME)?
                .relationships()
                .iter()
                .find(|rel| rel.related == O::NAME && rel.mapped_by == Some(relationship))
                .map(|rel| rel.name)
                .ok_or_else(|| Error::UnknownRelationship {
                    entity: T::NAME,
                    relationship: format!("inverse of {}.{relationship}", O::NAME),
                })?;
            self.resolve_for_update(target, inverse_name, inverse)?;
        }
        persistctx_core::set_one_to_one(owner, target, owning, inverse)
    }

    #[track_caller]
    fn resolve_for_update<E: Entity, T: Entity>(
        &mut self,
        entity: &EntityRef<E>,
        relationship: &'static str,
        field: fn(&mut E) -> &mut ToOne<T>,
    ) -> Result<()> {
        if field(&mut entity.borrow_mut()).is_loaded() {
            return Ok(());
        }
        if self.load_reference(entity, relationship, field)?.is_none() {
            // Dangling key: no instance holds the other side.
            field(&mut entity.borrow_mut()).set(None);
        }
        Ok(())
    }

    // ========================================================================
    // Flush and Transaction Management
    // ========================================================================

    /// Begin a store transaction. A no-op if one is open.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn begin(&mut self) -> Result<()> {
        self.ensure_open("begin")?;
        if self.in_transaction {
            return Ok(());
        }
        tracing::info!("Beginning transaction");
        self.store.begin_transaction()?;
        self.in_transaction = true;
        Ok(())
    }

    /// Dirty-check every managed instance, then send all pending operations to
    /// the store in order.
    ///
    /// Entities stay managed and the transaction stays open. If the store
    /// rejects an operation, that operation is dropped, the ones after it stay
    /// queued, and the error is returned; the caller is expected to roll back.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn flush(&mut self) -> Result<FlushResult> {
        self.ensure_open("flush")?;
        self.state = SessionState::Flushing;
        let result = self.flush_pending();
        self.state = SessionState::Open;
        result
    }

    fn flush_pending(&mut self) -> Result<FlushResult> {
        let start = Instant::now();
        let dirty = self.enqueue_dirty()?;

        tracing::info!(
            inserts = self.queue.count(OpKind::Insert),
            updates = self.queue.count(OpKind::Update),
            deletes = self.queue.count(OpKind::Delete),
            links = self.queue.count(OpKind::Link) + self.queue.count(OpKind::Unlink),
            dirty,
            "Starting flush"
        );

        if self.config.auto_begin && !self.in_transaction && !self.queue.is_empty() {
            self.begin()?;
        }

        let mut result = FlushResult::new();
        while let Some(op) = self.queue.pop_front() {
            match op.execute(&mut self.store) {
                Ok(rows) => {
                    result.record(op.kind(), rows);
                    if let PendingOp::Delete { key } = &op {
                        self.evict_deleted(key);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        op = %op,
                        error = %e,
                        remaining = self.queue.len(),
                        "Flush aborted by store error"
                    );
                    return Err(e.into());
                }
            }
        }

        tracing::info!(
            inserted = result.inserted,
            updated = result.updated,
            deleted = result.deleted,
            elapsed_ms = start.elapsed().as_millis(),
            "Flush completed"
        );
        Ok(result)
    }

    /// Enqueue an UPDATE (and link changes) for every managed instance that
    /// differs from its snapshot, refreshing the snapshot. Returns how many did.
    fn enqueue_dirty(&mut self) -> Result<usize> {
        let registry = Rc::clone(&self.registry);
        let mut dirty = Vec::new();
        for (key, entity) in self.identity_map.iter() {
            if entity.state() != LifecycleState::Managed {
                continue;
            }
            let current = entity.primary_key();
            if current != key.key {
                return Err(Error::Mapping(format!(
                    "primary key of managed {key} changed to {current}"
                )));
            }
            let ty = registry.get(key.entity)?;
            let diff = self.snapshots.diff(key, &**entity, ty);
            if !diff.is_empty() {
                dirty.push((key.clone(), Rc::clone(entity), diff));
            }
        }

        let count = dirty.len();
        for (key, entity, diff) in dirty {
            let ty = registry.get(key.entity)?;
            if !diff.columns.is_empty() {
                tracing::debug!(key = %key, columns = ?diff.changed_columns(), "Dirty entity");
                self.queue.enqueue(PendingOp::Update {
                    key: key.clone(),
                    changes: diff.columns,
                });
            }
            for (relationship, target) in diff.unlinked {
                let link = link_table(key.entity, owning_relationship(ty, relationship)?)?;
                self.queue.enqueue(PendingOp::Unlink {
                    link,
                    owner: key.key.clone(),
                    target,
                });
            }
            for (relationship, target) in diff.linked {
                let link = link_table(key.entity, owning_relationship(ty, relationship)?)?;
                self.queue.enqueue(PendingOp::Link {
                    link,
                    owner: key.key.clone(),
                    target,
                });
            }
            self.snapshots.capture(key, &*entity, ty);
        }
        Ok(count)
    }

    /// Evict an instance whose DELETE was executed; it becomes NEW again.
    fn evict_deleted(&mut self, key: &ObjectKey) {
        let removed = self
            .identity_map
            .lookup(key)
            .is_some_and(|e| e.state() == LifecycleState::Removed);
        if removed {
            if let Some(entity) = self.identity_map.evict(key) {
                entity.set_state(LifecycleState::New);
            }
        }
    }

    /// Flush, then commit the store transaction.
    ///
    /// Managed instances stay managed; REMOVED ones are evicted.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn commit(&mut self) -> Result<FlushResult> {
        self.ensure_open("commit")?;
        tracing::info!("Committing transaction");
        let result = self.flush()?;
        if self.in_transaction {
            self.store.commit_transaction()?;
            self.in_transaction = false;
        }
        let removed: Vec<ObjectKey> = self
            .identity_map
            .iter()
            .filter(|(_, e)| e.state() == LifecycleState::Removed)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &removed {
            self.evict_deleted(key);
        }
        Ok(result)
    }

    /// Discard pending operations, detach every tracked instance, reset
    /// navigation tracking and roll back the store transaction.
    ///
    /// Writes a previous flush already sent are undone only by the store's own
    /// rollback; this layer issues no compensating statements.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_open("rollback")?;
        let discarded = self.queue.discard();
        let detached = self.detach_all();
        self.navigation.reset();
        tracing::info!(discarded, detached, "Rolling back transaction");
        if self.in_transaction {
            self.in_transaction = false;
            self.store.rollback_transaction()?;
        }
        Ok(())
    }

    /// Close the session: detach everything, drop unflushed work and roll back
    /// an open transaction. Closing twice is a no-op.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn close(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        let discarded = self.queue.discard();
        let detached = self.detach_all();
        self.navigation.reset();
        self.state = SessionState::Closed;
        tracing::info!(discarded, detached, "Closing session");
        if self.in_transaction {
            self.in_transaction = false;
            self.store.rollback_transaction()?;
        }
        Ok(())
    }

    // ========================================================================
    // Debug Diagnostics
    // ========================================================================

    /// Number of pending operations.
    pub fn pending_operations(&self) -> usize {
        self.queue.len()
    }

    /// The write-behind queue.
    pub fn queue(&self) -> &WriteBehindQueue {
        &self.queue
    }

    /// Get total tracked object count.
    pub fn tracked_count(&self) -> usize {
        self.identity_map.len()
    }

    /// Whether a store transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Lazy navigation statistics.
    pub fn navigation(&self) -> &NavigationTracker {
        &self.navigation
    }

    /// Dump session state for debugging.
    pub fn debug_state(&self) -> SessionDebugInfo {
        SessionDebugInfo {
            state: self.state,
            tracked: self.tracked_count(),
            snapshots: self.snapshots.len(),
            pending_inserts: self.queue.count(OpKind::Insert),
            pending_updates: self.queue.count(OpKind::Update),
            pending_deletes: self.queue.count(OpKind::Delete),
            pending_links: self.queue.count(OpKind::Link) + self.queue.count(OpKind::Unlink),
            in_transaction: self.in_transaction,
            navigation: self.navigation.stats(),
        }
    }
}

impl<S: BackingStore> Drop for Session<S> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "Failed to close dropped session");
        }
    }
}

/// Debug information about session state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionDebugInfo {
    /// Session state.
    pub state: SessionState,
    /// Total tracked objects.
    pub tracked: usize,
    /// Snapshots kept.
    pub snapshots: usize,
    /// Operations pending INSERT.
    pub pending_inserts: usize,
    /// Operations pending UPDATE.
    pub pending_updates: usize,
    /// Operations pending DELETE.
    pub pending_deletes: usize,
    /// Pending link-row inserts and deletes.
    pub pending_links: usize,
    /// Whether in a transaction.
    pub in_transaction: bool,
    /// Lazy navigation statistics.
    pub navigation: NavigationStats,
}

fn downcast<E: Entity>(entity: &Rc<dyn ErasedEntity>) -> Result<EntityRef<E>> {
    EntityRef::from_erased(Rc::clone(entity)).ok_or_else(|| {
        Error::Mapping(format!(
            "tracked {} instance is not a {}",
            entity.entity_name(),
            std::any::type_name::<E>()
        ))
    })
}

fn key_from_row(ty: &EntityType, row: &Row) -> PrimaryKey {
    PrimaryKey::composite(
        ty.primary_key_columns()
            .into_iter()
            .map(|c| row.get(c).cloned().unwrap_or(Value::Null)),
    )
}

fn single_key_value<E: Entity>(key: &PrimaryKey) -> Result<Value> {
    key.as_single().cloned().ok_or_else(|| {
        Error::Mapping(format!(
            "{} needs a single-column key for relationship navigation",
            E::NAME
        ))
    })
}

fn owning_relationship<'a>(
    ty: &'a EntityType,
    name: &str,
) -> Result<&'a persistctx_core::RelationshipInfo> {
    ty.relationship_named(name)
        .ok_or_else(|| Error::UnknownRelationship {
            entity: ty.name(),
            relationship: name.to_string(),
        })
}

fn link_table(entity: &str, rel: &persistctx_core::RelationshipInfo) -> Result<LinkTableInfo> {
    rel.link_table
        .ok_or_else(|| Error::Mapping(format!("{entity}.{} has no link table", rel.name)))
}

// ============================================================================
// Unit Tests
// ============================================================================
