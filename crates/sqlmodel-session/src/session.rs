//! The synchronous session: identity map and unit of work.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use sqlmodel_core::{
    Connection, Error, Instance, LazyLoader, ModelDescriptor, ObjectState, Related,
    RelationshipInfo, Result, Value, ValueKey,
};
use sqlmodel_query::{Expr, Selectable, select};

use crate::engine::{Engine, SharedConnection, lock_connection};
use crate::handoff;
use crate::result::{Executable, Selected};

// ============================================================================
// Session Configuration
// ============================================================================

/// Configuration for Session behavior.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Flush pending changes before running a query.
    pub autoflush: bool,
    /// Expire every instance after commit; the next read reloads it.
    pub expire_on_commit: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            autoflush: true,
            expire_on_commit: true,
        }
    }
}

impl SessionConfig {
    pub fn autoflush(mut self, value: bool) -> Self {
        self.autoflush = value;
        self
    }

    pub fn expire_on_commit(mut self, value: bool) -> Self {
        self.expire_on_commit = value;
        self
    }
}

// ============================================================================
// Object Key
// ============================================================================

/// Unique key for an object in the identity map.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    table: String,
    pk: ValueKey,
}

impl ObjectKey {
    pub fn new(table: impl Into<String>, pk: &[Value]) -> Self {
        Self {
            table: table.into(),
            pk: ValueKey::new(pk),
        }
    }

    /// Key of a table-model instance whose primary key is filled in.
    #[must_use]
    pub fn of(instance: &Instance) -> Option<Self> {
        let table = instance.model().table_name()?;
        let pk = instance.primary_key_values();
        if pk.is_empty() || pk.iter().any(Value::is_null) {
            return None;
        }
        Some(Self::new(table, &pk))
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }
}

// ============================================================================
// Session state
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Sync,
    Async,
}

#[derive(Default)]
pub(crate) struct SessionState {
    pub(crate) identity: HashMap<ObjectKey, Instance>,
    /// Added, not inserted yet; in add order.
    pub(crate) pending: Vec<Instance>,
    /// Marked for deletion by `delete`.
    pub(crate) deleted: Vec<Instance>,
    /// Inserted by a flush of the open transaction.
    pub(crate) inserted_in_tx: Vec<Instance>,
    /// Deleted by a flush of the open transaction.
    pub(crate) deleted_in_tx: Vec<(ObjectKey, Instance)>,
    pub(crate) in_transaction: bool,
}

pub(crate) struct SessionInner {
    engine: Engine,
    conn: SharedConnection,
    pub(crate) config: SessionConfig,
    mode: Mode,
    state: Mutex<SessionState>,
    me: Weak<SessionInner>,
}

impl SessionInner {
    /// Lock order is connection first, then state.
    pub(crate) fn connection(&self) -> MutexGuard<'_, Box<dyn Connection>> {
        lock_connection(&self.conn)
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn loader(&self) -> Weak<dyn LazyLoader> {
        let me: Weak<dyn LazyLoader> = self.me.clone();
        me
    }

    fn check_handoff(&self, attribute: &str) -> Result<()> {
        if self.mode == Mode::Async && !handoff::is_active() {
            return Err(Error::MissingHandoff {
                attribute: attribute.to_string(),
            });
        }
        Ok(())
    }

    /// The identity-mapped instance for a freshly read row.
    ///
    /// Returns `None` when the primary key is null (an outer join miss).
    /// An instance already in the map keeps its state unless it is expired.
    pub(crate) fn register_loaded(&self, model: &Arc<ModelDescriptor>, values: Vec<Value>) -> Option<Instance> {
        let table = model.table_name()?;
        let pk: Vec<Value> = model.primary_key().iter().map(|i| values[*i].clone()).collect();
        if pk.iter().any(Value::is_null) {
            return None;
        }
        let key = ObjectKey::new(table, &pk);
        let mut state = self.state();
        if let Some(existing) = state.identity.get(&key) {
            if existing.is_expired() {
                existing.load_row(values);
            }
            return Some(existing.clone());
        }
        let instance = Instance::from_row(model, values);
        instance.bind(self.loader());
        state.identity.insert(key, instance.clone());
        Some(instance)
    }

    /// Identity-map hit for `target.column = value`, when `column` is the
    /// target's single primary-key column.
    pub(crate) fn identity_lookup(&self, target: &ModelDescriptor, column: &str, value: &Value) -> Option<Instance> {
        let [pk] = target.primary_key() else { return None };
        if target.fields()[*pk].column_name() != Some(column) {
            return None;
        }
        let key = ObjectKey::new(target.table_name()?, std::slice::from_ref(value));
        self.state()
            .identity
            .get(&key)
            .filter(|i| i.state() != ObjectState::Deleted)
            .cloned()
    }

    /// Attach `instance` and every instance reachable through its loaded
    /// relationships: transient ones become pending, detached ones
    /// persistent again. With `undelete`, instances marked for deletion are
    /// unmarked.
    pub(crate) fn attach_graph(&self, instance: &Instance, undelete: bool) -> Result<()> {
        let loader = self.loader();
        let mut state = self.state();
        let mut queue = vec![instance.clone()];
        let mut seen: Vec<Instance> = Vec::new();

        while let Some(inst) = queue.pop() {
            if seen.iter().any(|s| s.same(&inst)) {
                continue;
            }
            seen.push(inst.clone());
            let mine = inst.is_bound_to(&loader);
            if inst.is_bound() && !mine {
                return Err(Error::Config(format!(
                    "{} instance is already attached to another session",
                    inst.model().name()
                )));
            }

            match inst.state() {
                ObjectState::Transient => {
                    inst.bind(loader.clone());
                    inst.set_state(ObjectState::Pending);
                    state.pending.push(inst.clone());
                    tracing::debug!(model = inst.model().name(), "Instance pending");
                }
                ObjectState::Pending => {
                    inst.bind(loader.clone());
                    if !state.pending.iter().any(|p| p.same(&inst)) {
                        state.pending.push(inst.clone());
                    }
                }
                ObjectState::Persistent if mine => {
                    if undelete {
                        state.deleted.retain(|d| !d.same(&inst));
                    }
                }
                ObjectState::Persistent | ObjectState::Detached => {
                    let key = inst
                        .committed_primary_key()
                        .and_then(|pk| Some(ObjectKey::new(inst.model().table_name()?, &pk)))
                        .ok_or_else(|| {
                            Error::Config(format!(
                                "{} instance has no primary key to attach with",
                                inst.model().name()
                            ))
                        })?;
                    if state.identity.get(&key).is_some_and(|other| !other.same(&inst)) {
                        return Err(Error::Config(format!(
                            "another {} instance with the same identity key is already in this session",
                            inst.model().name()
                        )));
                    }
                    inst.bind(loader.clone());
                    inst.set_state(ObjectState::Persistent);
                    state.identity.insert(key, inst.clone());
                }
                ObjectState::Deleted => continue,
            }

            for rel in inst.model().relationships().iter().filter(|r| !r.viewonly) {
                if let Some(related) = inst.loaded_related(&rel.name) {
                    queue.extend(related.into_vec());
                }
            }
        }
        Ok(())
    }

    pub(crate) fn begin_if_needed(&self, conn: &mut dyn Connection) -> Result<()> {
        let mut state = self.state();
        if !state.in_transaction {
            tracing::info!("Beginning transaction");
            conn.begin()?;
            state.in_transaction = true;
        }
        Ok(())
    }

    fn has_pending_work(&self) -> bool {
        let state = self.state();
        !state.pending.is_empty()
            || !state.deleted.is_empty()
            || state.identity.values().any(Instance::has_changes)
    }
}

impl LazyLoader for SessionInner {
    fn load_relationship(&self, instance: &Instance, relationship: &RelationshipInfo) -> Result<Related> {
        self.check_handoff(&relationship.name)?;
        self.load_relationship_now(instance, relationship)
    }

    fn refresh(&self, instance: &Instance) -> Result<()> {
        self.check_handoff(instance.model().name())?;
        self.reload(instance)
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.in_transaction {
            if let Err(err) = lock_connection(&self.conn).rollback() {
                tracing::warn!(error = %err, "Rollback of abandoned session failed");
            }
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// The central unit-of-work manager.
///
/// It tracks instances loaded from or added to the database and coordinates
/// flushing their changes. One session is one unit of work over one
/// connection; do not share it between concurrent logical operations.
pub struct Session {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state();
        f.debug_struct("Session")
            .field("engine", &self.inner.engine)
            .field("identity", &state.identity.len())
            .field("pending", &state.pending.len())
            .field("deleted", &state.deleted.len())
            .field("in_transaction", &state.in_transaction)
            .finish()
    }
}

impl Session {
    /// Open a session on `engine`.
    pub fn new(engine: &Engine) -> Result<Self> {
        Self::with_config(engine, SessionConfig::default())
    }

    pub fn with_config(engine: &Engine, config: SessionConfig) -> Result<Self> {
        Self::with_mode(engine, config, Mode::Sync)
    }

    pub(crate) fn with_mode(engine: &Engine, config: SessionConfig, mode: Mode) -> Result<Self> {
        let conn = engine.connect()?;
        let inner = Arc::new_cyclic(|me| SessionInner {
            engine: engine.clone(),
            conn,
            config,
            mode,
            state: Mutex::new(SessionState::default()),
            me: me.clone(),
        });
        Ok(Self { inner })
    }

    pub(crate) fn from_inner(inner: Arc<SessionInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<SessionInner> {
        &self.inner
    }

    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    // ========================================================================
    // Object Tracking
    // ========================================================================

    /// Add an instance; it is INSERTed on the next flush.
    ///
    /// Related instances already loaded on it are added too. A detached
    /// instance is re-attached as persistent.
    #[tracing::instrument(level = "debug", skip(self, instance), fields(model = instance.model().name()))]
    pub fn add(&self, instance: &Instance) -> Result<()> {
        if !instance.model().is_table() {
            return Err(Error::Config(format!(
                "class '{}' is not mapped; only table models can be added to a session",
                instance.model().name()
            )));
        }
        self.inner.attach_graph(instance, true)
    }

    /// Add several instances.
    pub fn add_all<'a, I>(&self, instances: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a Instance>,
    {
        for instance in instances {
            self.add(instance)?;
        }
        Ok(())
    }

    /// Mark an instance for deletion; it is DELETEd on the next flush.
    ///
    /// A pending instance is simply dropped from the session.
    #[tracing::instrument(level = "debug", skip(self, instance), fields(model = instance.model().name()))]
    pub fn delete(&self, instance: &Instance) -> Result<()> {
        let loader = self.inner.loader();
        let mut state = self.inner.state();
        if let Some(pos) = state.pending.iter().position(|p| p.same(instance)) {
            state.pending.remove(pos);
            instance.unbind();
            return Ok(());
        }
        if instance.is_bound_to(&loader) && instance.state() == ObjectState::Persistent {
            if !state.deleted.iter().any(|d| d.same(instance)) {
                state.deleted.push(instance.clone());
            }
            return Ok(());
        }
        Err(Error::Config(format!(
            "{} instance is not persisted in this session",
            instance.model().name()
        )))
    }

    /// Remove an instance from the session without touching the database.
    pub fn expunge(&self, instance: &Instance) {
        let mut state = self.inner.state();
        state.identity.retain(|_, i| !i.same(instance));
        state.pending.retain(|i| !i.same(instance));
        state.deleted.retain(|i| !i.same(instance));
        instance.unbind();
    }

    /// Remove every instance from the session.
    pub fn expunge_all(&self) {
        let mut state = self.inner.state();
        for inst in state.pending.drain(..) {
            inst.unbind();
        }
        for (_, inst) in state.identity.drain() {
            inst.unbind();
        }
        state.deleted.clear();
    }

    /// True if the instance is pending or persistent in this session.
    #[must_use]
    pub fn contains(&self, instance: &Instance) -> bool {
        instance.is_bound_to(&self.inner.loader())
            && matches!(instance.state(), ObjectState::Pending | ObjectState::Persistent)
    }

    /// True if the instance has unflushed attribute changes.
    #[must_use]
    pub fn is_modified(&self, instance: &Instance) -> bool {
        instance.has_changes()
    }

    /// Instances waiting to be inserted.
    #[must_use]
    pub fn new_instances(&self) -> Vec<Instance> {
        self.inner.state().pending.clone()
    }

    /// Persistent instances with unflushed changes.
    #[must_use]
    pub fn dirty_instances(&self) -> Vec<Instance> {
        self.inner
            .state()
            .identity
            .values()
            .filter(|i| i.has_changes())
            .cloned()
            .collect()
    }

    /// Instances marked for deletion.
    #[must_use]
    pub fn deleted_instances(&self) -> Vec<Instance> {
        self.inner.state().deleted.clone()
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.inner.state().in_transaction
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Execute a statement: scalar selects yield a [`ScalarResult`](crate::ScalarResult),
    /// tuple selects a [`TupleResult`](crate::TupleResult).
    pub fn exec<S: Executable>(&self, statement: &S) -> Result<S::Output> {
        statement.execute(self)
    }

    /// Instance of `model` by single-column primary key.
    pub fn get(&self, model: &Arc<ModelDescriptor>, pk: impl Into<Value>) -> Result<Option<Instance>> {
        self.get_by_key(model, &[pk.into()])
    }

    /// Instance of `model` by primary key, consulting the identity map first.
    #[tracing::instrument(level = "debug", skip(self, model, key), fields(model = model.name()))]
    pub fn get_by_key(&self, model: &Arc<ModelDescriptor>, key: &[Value]) -> Result<Option<Instance>> {
        let table = model.table_name().ok_or_else(|| {
            Error::Config(format!("class '{}' is not mapped", model.name()))
        })?;
        if key.len() != model.primary_key().len() {
            return Err(Error::Config(format!(
                "{} has a {}-column primary key; got {} value(s)",
                model.name(),
                model.primary_key().len(),
                key.len()
            )));
        }

        if let Some(found) = self.inner.state().identity.get(&ObjectKey::new(table, key)) {
            tracing::debug!("Identity map hit");
            return Ok((found.state() != ObjectState::Deleted).then(|| found.clone()));
        }

        let mut stmt = select(model);
        for (idx, value) in model.primary_key().iter().zip(key) {
            let column = model.col(&model.fields()[*idx].name)?;
            stmt = stmt.where_(Expr::from(column).eq(value.clone()));
        }
        Ok(self.exec(&stmt)?.one_or_none()?.and_then(Selected::into_instance))
    }

    /// Flush when `autoflush` is on and there is something to write.
    pub(crate) fn autoflush(&self) -> Result<()> {
        if self.inner.config.autoflush && self.inner.has_pending_work() {
            self.flush()?;
        }
        Ok(())
    }

    // ========================================================================
    // Unit of work
    // ========================================================================

    /// Write pending changes to the database without committing.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn flush(&self) -> Result<()> {
        self.inner.flush()
    }

    /// Flush, then commit the transaction.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn commit(&self) -> Result<()> {
        self.inner.flush()?;
        tracing::info!("Committing transaction");

        let mut conn = self.inner.connection();
        let mut guard = self.inner.state();
        let state = &mut *guard;
        if state.in_transaction {
            conn.commit()?;
            state.in_transaction = false;
        }
        state.inserted_in_tx.clear();
        for (_, inst) in state.deleted_in_tx.drain(..) {
            inst.unbind();
        }
        if self.inner.config.expire_on_commit {
            for inst in state.identity.values() {
                inst.expire();
            }
        }
        Ok(())
    }

    /// Roll back the transaction and discard every pending change.
    ///
    /// Instances inserted in the transaction become transient again, deleted
    /// ones persistent; everything else is expired.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn rollback(&self) -> Result<()> {
        tracing::info!("Rolling back transaction");

        let mut conn = self.inner.connection();
        let mut guard = self.inner.state();
        let state = &mut *guard;
        if state.in_transaction {
            conn.rollback()?;
            state.in_transaction = false;
        }

        for inst in state.pending.drain(..) {
            inst.unbind();
        }
        for inst in std::mem::take(&mut state.inserted_in_tx) {
            state.identity.retain(|_, i| !i.same(&inst));
            inst.unbind();
            inst.set_state(ObjectState::Transient);
        }
        for (key, inst) in std::mem::take(&mut state.deleted_in_tx) {
            inst.set_state(ObjectState::Persistent);
            state.identity.insert(key, inst);
        }
        state.deleted.clear();
        for inst in state.identity.values() {
            inst.mark_persistent();
            inst.expire();
        }
        Ok(())
    }

    /// Reload the column values of a persistent instance.
    ///
    /// Loaded relationships are dropped; fields changed in memory keep their
    /// value.
    #[tracing::instrument(level = "debug", skip(self, instance), fields(model = instance.model().name()))]
    pub fn refresh(&self, instance: &Instance) -> Result<()> {
        if !instance.is_bound_to(&self.inner.loader()) || instance.state() != ObjectState::Persistent {
            return Err(Error::Config(format!(
                "{} instance is not persistent within this session",
                instance.model().name()
            )));
        }
        instance.expire();
        self.inner.reload(instance)
    }

    /// Load a relationship now, bypassing its lazy strategy.
    pub fn load_related(&self, instance: &Instance, name: &str) -> Result<Related> {
        let rel = instance.model().relationship(name).cloned().ok_or_else(|| {
            Error::Config(format!(
                "'{}' object has no relationship '{name}'",
                instance.model().name()
            ))
        })?;
        if let Some(loaded) = instance.loaded_related(name) {
            return Ok(loaded);
        }
        let loaded = self.inner.load_relationship_now(instance, &rel)?;
        instance.set_loaded_related(name, loaded.clone());
        Ok(loaded)
    }

    /// Roll back any open transaction and detach every instance.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn close(&self) -> Result<()> {
        let mut conn = self.inner.connection();
        let mut guard = self.inner.state();
        let state = &mut *guard;
        if state.in_transaction {
            conn.rollback()?;
            state.in_transaction = false;
        }
        for inst in state.pending.drain(..) {
            inst.unbind();
        }
        for (_, inst) in state.identity.drain() {
            inst.unbind();
        }
        for (_, inst) in state.deleted_in_tx.drain(..) {
            inst.unbind();
        }
        state.inserted_in_tx.clear();
        state.deleted.clear();
        tracing::info!("Session closed");
        Ok(())
    }
}

/// The entity a scalar select returns, if it selects one.
pub(crate) fn selected_entity(item: &Selectable) -> Option<&Arc<ModelDescriptor>> {
    match item {
        Selectable::Entity(model) => Some(model),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::create_engine;
    use rstest::rstest;
    use sqlmodel_core::{Annotation, Field, ModelBuilder, Registry, Relationship, Schema, kwargs};

    fn id_field() -> Field {
        Field::new().default(Value::Null).primary_key(true)
    }

    fn heroes_schema(team_heroes: Relationship) -> Arc<Schema> {
        let mut registry = Registry::new();
        ModelBuilder::table("Team")
            .field("id", Annotation::optional(Annotation::Int), id_field())
            .annotate("name", Annotation::Str)
            .annotate("headquarters", Annotation::Str)
            .relationship("heroes", Annotation::list(Annotation::model("Hero")), team_heroes)
            .declare(&mut registry)
            .unwrap();
        ModelBuilder::table("Hero")
            .field("id", Annotation::optional(Annotation::Int), id_field())
            .annotate("name", Annotation::Str)
            .with_default("age", Annotation::optional(Annotation::Int), Value::Null)
            .field(
                "team_id",
                Annotation::optional(Annotation::Int),
                Field::new().default(Value::Null).foreign_key("team.id"),
            )
            .relationship(
                "team",
                Annotation::optional(Annotation::model("Team")),
                Relationship::new().back_populates("heroes"),
            )
            .declare(&mut registry)
            .unwrap();
        registry.build().unwrap()
    }

    struct Fixture {
        engine: Engine,
        team: Arc<ModelDescriptor>,
        hero: Arc<ModelDescriptor>,
    }

    fn setup_with(team_heroes: Relationship) -> Fixture {
        let schema = heroes_schema(team_heroes);
        let engine = create_engine("sqlite://").unwrap();
        engine.create_all(schema.metadata()).unwrap();
        Fixture {
            engine,
            team: Arc::clone(schema.model("Team").unwrap()),
            hero: Arc::clone(schema.model("Hero").unwrap()),
        }
    }

    fn setup() -> Fixture {
        setup_with(Relationship::new().back_populates("team"))
    }

    fn count(session: &Session, model: &Arc<ModelDescriptor>) -> i64 {
        let stmt = select(Expr::count_all()).select_from(model);
        session.exec(&stmt).unwrap().values()[0].as_i64().unwrap()
    }

    #[test]
    fn test_add_commit_assigns_generated_key() {
        let fx = setup();
        let session = Session::new(&fx.engine).unwrap();
        let hero = fx.hero.construct(kwargs! { "name" => "Deadpond" }).unwrap();
        session.add(&hero).unwrap();
        assert_eq!(hero.state(), ObjectState::Pending);
        assert_eq!(session.new_instances().len(), 1);

        session.commit().unwrap();
        assert_eq!(hero.state(), ObjectState::Persistent);
        assert!(hero.is_expired());
        assert_eq!(hero.get("id").unwrap(), Value::BigInt(1));
        assert_eq!(hero.get("age").unwrap(), Value::Null);
        assert!(!session.in_transaction());
    }

    #[test]
    fn test_get_uses_identity_map() {
        let fx = setup();
        let session = Session::new(&fx.engine).unwrap();
        let hero = fx.hero.construct(kwargs! { "name" => "Spider-Boy" }).unwrap();
        session.add(&hero).unwrap();
        session.commit().unwrap();

        let found = session.get(&fx.hero, 1).unwrap().unwrap();
        assert!(found.same(&hero));
        assert!(session.get(&fx.hero, 99).unwrap().is_none());

        let other = Session::new(&fx.engine).unwrap();
        let loaded = other.get(&fx.hero, 1).unwrap().unwrap();
        assert!(!loaded.same(&hero));
        assert_eq!(loaded.get("name").unwrap(), Value::from("Spider-Boy"));
        assert!(loaded.model_fields_set().is_empty());
    }

    #[test]
    fn test_update_writes_changed_columns() {
        let fx = setup();
        let session = Session::new(&fx.engine).unwrap();
        let hero = fx.hero.construct(kwargs! { "name" => "Rusty-Man", "age" => 48 }).unwrap();
        session.add(&hero).unwrap();
        session.commit().unwrap();

        hero.set("age", 49).unwrap();
        assert!(session.is_modified(&hero));
        assert_eq!(session.dirty_instances().len(), 1);
        session.commit().unwrap();

        let other = Session::new(&fx.engine).unwrap();
        let loaded = other.get(&fx.hero, 1).unwrap().unwrap();
        assert_eq!(loaded.get("age").unwrap(), Value::BigInt(49));
    }

    #[test]
    fn test_autoflush_before_query() {
        let fx = setup();
        let session = Session::new(&fx.engine).unwrap();
        let hero = fx.hero.construct(kwargs! { "name" => "Tarantula" }).unwrap();
        session.add(&hero).unwrap();
        assert_eq!(count(&session, &fx.hero), 1);
        assert!(session.in_transaction());

        let manual = Session::with_config(&fx.engine, SessionConfig::default().autoflush(false)).unwrap();
        let other = fx.hero.construct(kwargs! { "name" => "Black Lion" }).unwrap();
        manual.add(&other).unwrap();
        assert_eq!(other.state(), ObjectState::Pending);
        session.rollback().unwrap();
        assert_eq!(count(&manual, &fx.hero), 0);
    }

    #[test]
    fn test_rollback_discards_changes() {
        let fx = setup();
        let session = Session::new(&fx.engine).unwrap();
        let kept = fx.hero.construct(kwargs! { "name" => "Dr. Weird" }).unwrap();
        session.add(&kept).unwrap();
        session.commit().unwrap();

        kept.set("name", "Captain North").unwrap();
        let added = fx.hero.construct(kwargs! { "name" => "Princess Sure-E" }).unwrap();
        session.add(&added).unwrap();
        session.flush().unwrap();
        session.rollback().unwrap();

        assert_eq!(added.state(), ObjectState::Transient);
        assert!(!session.contains(&added));
        assert_eq!(kept.get("name").unwrap(), Value::from("Dr. Weird"));
        assert_eq!(count(&session, &fx.hero), 1);
    }

    #[test]
    fn test_delete_removes_row() {
        let fx = setup();
        let session = Session::new(&fx.engine).unwrap();
        let hero = fx.hero.construct(kwargs! { "name" => "Spider-Youngster" }).unwrap();
        session.add(&hero).unwrap();
        session.commit().unwrap();

        session.delete(&hero).unwrap();
        assert_eq!(session.deleted_instances().len(), 1);
        session.commit().unwrap();
        assert_eq!(hero.state(), ObjectState::Detached);
        assert!(session.get(&fx.hero, 1).unwrap().is_none());
        assert_eq!(count(&session, &fx.hero), 0);
    }

    #[test]
    fn test_delete_pending_just_forgets_it() {
        let fx = setup();
        let session = Session::new(&fx.engine).unwrap();
        let hero = fx.hero.construct(kwargs! { "name" => "Captain North" }).unwrap();
        session.add(&hero).unwrap();
        session.delete(&hero).unwrap();
        assert_eq!(hero.state(), ObjectState::Transient);
        session.commit().unwrap();
        assert_eq!(count(&session, &fx.hero), 0);

        let stranger = fx.hero.construct(kwargs! { "name" => "Nobody" }).unwrap();
        assert!(matches!(session.delete(&stranger), Err(Error::Config(_))));
    }

    #[test]
    fn test_back_populates_after_commit() {
        let fx = setup();
        let session = Session::new(&fx.engine).unwrap();
        let team = fx
            .team
            .construct(kwargs! { "name" => "Preventers", "headquarters" => "Sharp Tower" })
            .unwrap();
        let hero = fx
            .hero
            .construct(kwargs! { "name" => "Rusty-Man", "age" => 48, "team" => &team })
            .unwrap();
        session.add(&hero).unwrap();
        assert!(session.contains(&team));
        session.commit().unwrap();

        assert_eq!(hero.get("team_id").unwrap(), team.get("id").unwrap());
        let heroes = team.related("heroes").unwrap();
        assert_eq!(heroes.len(), 1);
        assert!(heroes.many()[0].same(&hero));
        assert!(hero.related("team").unwrap().one().unwrap().same(&team));
    }

    #[test]
    fn test_reassigning_team_moves_foreign_key() {
        let fx = setup();
        let session = Session::new(&fx.engine).unwrap();
        let first = fx.team.construct(kwargs! { "name" => "Z-Force", "headquarters" => "Sister Margaret's Bar" }).unwrap();
        let second = fx.team.construct(kwargs! { "name" => "Preventers", "headquarters" => "Sharp Tower" }).unwrap();
        let hero = fx.hero.construct(kwargs! { "name" => "Deadpond", "team" => &first }).unwrap();
        session.add_all([&hero, &second]).unwrap();
        session.commit().unwrap();

        hero.set("team", &second).unwrap();
        session.commit().unwrap();
        assert_eq!(hero.get("team_id").unwrap(), second.get("id").unwrap());
        assert!(first.related("heroes").unwrap().is_empty());

        hero.set("team", Value::Null).unwrap();
        session.commit().unwrap();
        assert_eq!(hero.get("team_id").unwrap(), Value::Null);
    }

    #[test]
    fn test_deleting_parent_nulls_children() {
        let fx = setup();
        let session = Session::new(&fx.engine).unwrap();
        let team = fx.team.construct(kwargs! { "name" => "Wakaland", "headquarters" => "Wakaland Capital City" }).unwrap();
        let hero = fx.hero.construct(kwargs! { "name" => "Black Lion", "team" => &team }).unwrap();
        session.add(&hero).unwrap();
        session.commit().unwrap();
        assert!(!hero.get("team_id").unwrap().is_null());

        session.delete(&team).unwrap();
        session.commit().unwrap();
        assert_eq!(count(&session, &fx.hero), 1);
        assert_eq!(hero.get("team_id").unwrap(), Value::Null);
    }

    #[test]
    fn test_cascade_delete_removes_children() {
        let fx = setup_with(Relationship::new().back_populates("team").cascade_delete(true));
        let session = Session::new(&fx.engine).unwrap();
        let team = fx.team.construct(kwargs! { "name" => "Preventers", "headquarters" => "Sharp Tower" }).unwrap();
        for name in ["Rusty-Man", "Spider-Boy"] {
            let hero = fx.hero.construct(kwargs! { "name" => name, "team" => &team }).unwrap();
            session.add(&hero).unwrap();
        }
        session.commit().unwrap();
        assert_eq!(count(&session, &fx.hero), 2);

        session.delete(&team).unwrap();
        session.commit().unwrap();
        assert_eq!(count(&session, &fx.hero), 0);
        assert_eq!(count(&session, &fx.team), 0);
    }

    fn seed_team_with_hero(fx: &Fixture) {
        let writer = Session::new(&fx.engine).unwrap();
        let team = fx.team.construct(kwargs! { "name" => "Preventers", "headquarters" => "Sharp Tower" }).unwrap();
        writer.add(&team).unwrap();
        writer.commit().unwrap();
        let hero = fx
            .hero
            .construct(kwargs! { "name" => "Rusty-Man", "team_id" => team.get("id").unwrap() })
            .unwrap();
        writer.add(&hero).unwrap();
        writer.commit().unwrap();
    }

    #[rstest]
    #[case::select("select", false, Some(1))]
    #[case::selectin("selectin", true, Some(1))]
    #[case::noload("noload", false, Some(0))]
    #[case::raise("raise", false, None)]
    fn test_lazy_strategies(#[case] lazy: &str, #[case] preloaded: bool, #[case] visible: Option<usize>) {
        let fx = setup_with(Relationship::new().back_populates("team").sa_relationship_kwarg("lazy", lazy));
        seed_team_with_hero(&fx);

        let reader = Session::new(&fx.engine).unwrap();
        let teams = reader.exec(&select(&fx.team)).unwrap().instances();
        assert_eq!(teams.len(), 1);
        assert_eq!(teams[0].loaded_related("heroes").is_some(), preloaded);

        match (teams[0].related("heroes"), visible) {
            (Ok(heroes), Some(len)) => {
                assert_eq!(heroes.len(), len);
                if len > 0 {
                    assert_eq!(heroes.many()[0].get("name").unwrap(), Value::from("Rusty-Man"));
                }
            }
            (Err(Error::LazyLoadRaised { attribute, .. }), None) => assert_eq!(attribute, "heroes"),
            (other, _) => panic!("unexpected load result {other:?} for lazy={lazy}"),
        }
        let explicit = reader.load_related(&teams[0], "heroes").unwrap();
        assert_eq!(explicit.len(), 1);
    }

    #[test]
    fn test_refresh_keeps_unflushed_changes() {
        let fx = setup();
        let session = Session::new(&fx.engine).unwrap();
        let hero = fx.hero.construct(kwargs! { "name" => "Dr. Weird", "age" => 36 }).unwrap();
        session.add(&hero).unwrap();
        session.commit().unwrap();

        hero.set("name", "Captain North").unwrap();
        session.refresh(&hero).unwrap();
        assert_eq!(hero.get("name").unwrap(), Value::from("Captain North"));
        assert_eq!(hero.get("age").unwrap(), Value::BigInt(36));

        let stranger = fx.hero.construct(kwargs! { "name" => "Nobody" }).unwrap();
        assert!(matches!(session.refresh(&stranger), Err(Error::Config(_))));
    }

    #[test]
    fn test_instance_belongs_to_one_session() {
        let fx = setup();
        let first = Session::new(&fx.engine).unwrap();
        let second = Session::new(&fx.engine).unwrap();
        let hero = fx.hero.construct(kwargs! { "name" => "Deadpond" }).unwrap();
        first.add(&hero).unwrap();
        assert!(matches!(second.add(&hero), Err(Error::Config(_))));

        first.expunge(&hero);
        assert_eq!(hero.state(), ObjectState::Transient);
        second.add(&hero).unwrap();
        assert!(second.contains(&hero));
    }

    #[test]
    fn test_closed_session_detaches_instances() {
        let fx = setup();
        let session = Session::new(&fx.engine).unwrap();
        let hero = fx.hero.construct(kwargs! { "name" => "Deadpond" }).unwrap();
        session.add(&hero).unwrap();
        session.commit().unwrap();
        session.close().unwrap();

        assert_eq!(hero.state(), ObjectState::Detached);
        assert!(matches!(hero.get("name"), Err(Error::DetachedInstance { .. })));

        let again = Session::new(&fx.engine).unwrap();
        again.add(&hero).unwrap();
        assert_eq!(hero.state(), ObjectState::Persistent);
        assert_eq!(hero.get("name").unwrap(), Value::from("Deadpond"));
    }

    #[test]
    fn test_object_key_ignores_incomplete_keys() {
        let fx = setup();
        let hero = fx.hero.construct(kwargs! { "name" => "Deadpond" }).unwrap();
        assert!(ObjectKey::of(&hero).is_none());
        hero.set("id", 3).unwrap();
        let key = ObjectKey::of(&hero).unwrap();
        assert_eq!(key, ObjectKey::new("hero", &[Value::BigInt(3)]));
        assert_eq!(key.table(), "hero");
    }

    #[test]
    fn test_object_key_compares_primary_key_values() {
        let int_key = ObjectKey::new("hero", &[Value::BigInt(1)]);
        assert_eq!(int_key, ObjectKey::new("hero", &[Value::BigInt(1)]));
        assert_ne!(int_key, ObjectKey::new("hero", &[Value::Text("1".into())]));
        assert_ne!(int_key, ObjectKey::new("team", &[Value::BigInt(1)]));

        let mut identity = HashMap::new();
        for id in 0..5_000 {
            identity.insert(ObjectKey::new("hero", &[Value::BigInt(id)]), id);
        }
        assert_eq!(identity.len(), 5_000);
        assert_eq!(identity.get(&ObjectKey::new("hero", &[Value::BigInt(4_321)])), Some(&4_321));
    }
}
