//! The unit of work: turning tracked changes into INSERT, UPDATE and DELETE.
//!
//! A flush runs in this order:
//!
//! 1. keys of already-persistent parents are copied into the children of
//!    their loaded one-to-many collections;
//! 2. pending instances are inserted, referenced tables first, each after
//!    copying its many-to-one targets' keys into its foreign-key columns;
//!    generated primary keys are written back;
//! 3. changed persistent instances are updated;
//! 4. rows dropped from changed one-to-many collections get a null key;
//! 5. link rows of changed many-to-many collections are rewritten;
//! 6. instances marked for deletion are deleted, dependent tables first.

use std::time::Instant;

use sqlmodel_core::{
    Connection, Dialect, Error, Instance, ModelDescriptor, ObjectState, Related, RelationshipKind,
    Result, Value,
};
use sqlmodel_query::{DeleteBuilder, Expr, InsertBuilder, UpdateBuilder, select};

use crate::session::{ObjectKey, SessionInner};

/// A row of a many-to-many link table, columns in name order.
#[derive(Debug, PartialEq)]
struct LinkRow {
    table: String,
    columns: [(String, Value); 2],
}

impl LinkRow {
    fn new(table: &str, a: (&str, Value), b: (&str, Value)) -> Self {
        let (first, second) = if a.0 <= b.0 { (a, b) } else { (b, a) };
        Self {
            table: table.to_string(),
            columns: [
                (first.0.to_string(), first.1),
                (second.0.to_string(), second.1),
            ],
        }
    }
}

/// Position of the instance's table in dependency order.
fn table_rank(instance: &Instance) -> usize {
    let model = instance.model();
    model
        .schema()
        .ok()
        .and_then(|schema| {
            schema
                .metadata()
                .sorted_tables()
                .iter()
                .position(|t| Some(t.name.as_str()) == model.table_name())
        })
        .unwrap_or(usize::MAX)
}

fn table_of(model: &ModelDescriptor) -> Result<&str> {
    model
        .table_name()
        .ok_or_else(|| Error::Config(format!("class '{}' is not mapped", model.name())))
}

/// Bind `value` for `table.column` using the column's storage type.
fn bind_column(model: &ModelDescriptor, table: &str, column: &str, value: &Value, dialect: Dialect) -> Value {
    model
        .schema()
        .ok()
        .and_then(|schema| {
            schema
                .metadata()
                .table(table)
                .and_then(|t| t.column(column))
                .map(|c| c.sql_type.bind(value, dialect))
        })
        .unwrap_or_else(|| value.clone())
}

/// Value of the field backed by `column`.
fn column_value(instance: &Instance, column: &str) -> Value {
    instance
        .model()
        .field_for_column(column)
        .map(|idx| instance.value_at(idx))
        .unwrap_or_default()
}

/// WHERE clause matching the row of `pk` (values in key order).
fn key_filter(model: &ModelDescriptor, pk: &[Value], dialect: Dialect) -> Result<Expr> {
    let conditions = model.primary_key().iter().zip(pk).filter_map(|(idx, value)| {
        let col = model.fields()[*idx].column.as_ref()?;
        Some(Expr::col(&col.name).eq(col.sql_type.bind(value, dialect)))
    });
    Expr::all(conditions).ok_or_else(|| {
        Error::Config(format!("{} has no primary key", model.name()))
    })
}

/// Copy the keys of loaded many-to-one targets into the foreign-key fields.
fn sync_foreign_keys(instance: &Instance) {
    let model = instance.model();
    let dirty = instance.dirty_relationships();
    for rel in model
        .relationships()
        .iter()
        .filter(|r| r.holds_foreign_key() && !r.viewonly)
    {
        let Some(local) = model.field_for_column(&rel.local_key) else { continue };
        match instance.loaded_related(&rel.name) {
            Some(Related::One(Some(target))) if target.state() != ObjectState::Deleted => {
                let value = column_value(&target, &rel.remote_key);
                if instance.value_at(local) != value {
                    instance.set_value_at(local, value);
                }
            }
            Some(Related::One(None)) if dirty.contains(&rel.name) => {
                if !instance.value_at(local).is_null() {
                    instance.set_value_at(local, Value::Null);
                }
            }
            _ => {}
        }
    }
}

/// Copy a parent's key into the children of its loaded collections.
fn sync_children(parent: &Instance) {
    let model = parent.model();
    for rel in model.relationships().iter().filter(|r| {
        matches!(r.kind, RelationshipKind::OneToMany | RelationshipKind::OneToOne) && !r.viewonly
    }) {
        let Some(related) = parent.loaded_related(&rel.name) else { continue };
        let value = column_value(parent, &rel.local_key);
        if value.is_null() {
            continue;
        }
        for child in related.many() {
            let Some(idx) = child.model().field_for_column(&rel.remote_key) else { continue };
            if child.value_at(idx) != value {
                child.set_value_at(idx, value.clone());
            }
        }
    }
}

impl SessionInner {
    pub(crate) fn flush(&self) -> Result<()> {
        let mut guard = self.connection();
        let conn: &mut dyn Connection = &mut **guard;

        let reassigned: Vec<Instance> = {
            let state = self.state();
            state
                .pending
                .iter()
                .chain(state.identity.values())
                .filter(|i| !i.dirty_relationships().is_empty())
                .cloned()
                .collect()
        };
        for inst in &reassigned {
            self.attach_graph(inst, false)?;
        }

        let (mut inserts, mut deletes, persistent) = {
            let state = self.state();
            let persistent: Vec<Instance> = state
                .identity
                .values()
                .filter(|i| !state.deleted.iter().any(|d| d.same(i)))
                .cloned()
                .collect();
            (state.pending.clone(), state.deleted.clone(), persistent)
        };
        if inserts.is_empty() && deletes.is_empty() && !persistent.iter().any(Instance::has_changes) {
            return Ok(());
        }

        let start = Instant::now();
        tracing::info!(
            inserts = inserts.len(),
            deletes = deletes.len(),
            "Starting flush"
        );
        self.begin_if_needed(conn)?;
        let dialect = conn.dialect();

        for parent in &persistent {
            sync_children(parent);
        }

        inserts.sort_by_key(table_rank);
        for inst in &inserts {
            sync_foreign_keys(inst);
            self.insert_instance(conn, dialect, inst)?;
            sync_children(inst);
        }

        let mut updated = 0usize;
        for inst in inserts.iter().chain(&persistent) {
            sync_foreign_keys(inst);
            if self.update_instance(conn, dialect, inst)? {
                updated += 1;
            }
        }

        for parent in &persistent {
            self.release_children(conn, dialect, parent)?;
        }

        let written: Vec<Instance> = inserts.iter().chain(&persistent).cloned().collect();
        self.write_links(conn, dialect, &written)?;

        deletes.sort_by_key(|i| std::cmp::Reverse(table_rank(i)));
        for inst in &deletes {
            self.delete_instance(conn, dialect, inst)?;
        }

        for inst in &written {
            inst.clear_dirty_relationships();
        }
        tracing::info!(
            inserted = inserts.len(),
            updated,
            deleted = deletes.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "Flush completed"
        );
        Ok(())
    }

    fn insert_instance(&self, conn: &mut dyn Connection, dialect: Dialect, inst: &Instance) -> Result<()> {
        let model = inst.model();
        let table = table_of(model)?;
        let schema = model.schema()?;
        let generated_column = schema
            .metadata()
            .table(table)
            .and_then(|t| t.autoincrement_column())
            .map(|c| c.name.clone());

        let values = inst.values();
        let mut builder = InsertBuilder::new(table);
        let mut generated = None;
        for (idx, field) in model.fields().iter().enumerate() {
            let Some(col) = &field.column else { continue };
            let value = &values[idx];
            if value.is_null() {
                if generated_column.as_deref() == Some(col.name.as_str()) {
                    generated = Some(idx);
                    continue;
                }
                if col.server_default.is_some() {
                    continue;
                }
            }
            builder = builder.value(&col.name, col.sql_type.bind(value, dialect));
        }

        let (sql, params) = builder.build_with_dialect(dialect);
        let rowid = conn.insert(&sql, &params)?;
        if let Some(idx) = generated {
            inst.set_value_at(idx, Value::BigInt(rowid));
        }
        inst.mark_persistent();
        tracing::debug!(table = %table, rowid, "Inserted row");

        let mut state = self.state();
        state.pending.retain(|p| !p.same(inst));
        if let Some(key) = ObjectKey::of(inst) {
            state.identity.insert(key, inst.clone());
        }
        state.inserted_in_tx.push(inst.clone());
        Ok(())
    }

    /// UPDATE the changed columns; false if nothing changed.
    fn update_instance(&self, conn: &mut dyn Connection, dialect: Dialect, inst: &Instance) -> Result<bool> {
        let dirty = inst.dirty_fields();
        if dirty.is_empty() {
            return Ok(false);
        }
        let Some(committed_pk) = inst.committed_primary_key() else {
            return Ok(false);
        };
        let model = inst.model();
        let table = table_of(model)?;

        let mut builder = UpdateBuilder::new(table);
        for idx in dirty {
            let Some(col) = &model.fields()[idx].column else { continue };
            builder = builder.set(&col.name, col.sql_type.bind(&inst.value_at(idx), dialect));
        }
        let builder = builder.filter(key_filter(model, &committed_pk, dialect)?);
        let (sql, params) = builder.build_with_dialect(dialect);
        conn.execute(&sql, &params)?;
        inst.mark_persistent();
        tracing::debug!(table = %table, "Updated row");

        let old_key = ObjectKey::new(table, &committed_pk);
        if let Some(new_key) = ObjectKey::of(inst) {
            if new_key != old_key {
                let mut state = self.state();
                state.identity.remove(&old_key);
                state.identity.insert(new_key, inst.clone());
            }
        }
        Ok(true)
    }

    /// Null the foreign key of rows no longer in a changed one-to-many
    /// collection of `parent`.
    fn release_children(&self, conn: &mut dyn Connection, dialect: Dialect, parent: &Instance) -> Result<()> {
        let model = parent.model();
        let dirty = parent.dirty_relationships();
        for rel in model.relationships().iter().filter(|r| {
            r.kind == RelationshipKind::OneToMany && !r.viewonly && dirty.contains(&r.name)
        }) {
            let Some(Related::Many(kept)) = parent.loaded_related(&rel.name) else { continue };
            let key = column_value(parent, &rel.local_key);
            if key.is_null() {
                continue;
            }
            let target = model.related_model(rel)?;
            let mut builder = UpdateBuilder::new(&rel.related_table)
                .set(&rel.remote_key, Value::Null)
                .filter(Expr::col(&rel.remote_key).eq(key.clone()));
            for child in &kept {
                if let Some(pk) = child.committed_primary_key() {
                    builder = builder.filter(key_filter(&target, &pk, dialect)?.not());
                }
            }
            let (sql, params) = builder.build_with_dialect(dialect);
            let released = conn.execute(&sql, &params)?;
            if released > 0 {
                tracing::debug!(table = %rel.related_table, released, "Released children");
            }
            self.detach_children(parent, &rel.related_table, &rel.remote_key, &key, &kept);
        }
        Ok(())
    }

    /// Rewrite the link rows of changed many-to-many collections.
    fn write_links(&self, conn: &mut dyn Connection, dialect: Dialect, instances: &[Instance]) -> Result<()> {
        let mut clear: Vec<(String, String, Value)> = Vec::new();
        let mut rows: Vec<LinkRow> = Vec::new();

        for inst in instances {
            let model = inst.model();
            let dirty = inst.dirty_relationships();
            for rel in model.relationships().iter().filter(|r| {
                r.kind == RelationshipKind::ManyToMany && !r.viewonly && dirty.contains(&r.name)
            }) {
                let Some(link) = &rel.link_table else { continue };
                let Some(Related::Many(items)) = inst.loaded_related(&rel.name) else { continue };
                let local = column_value(inst, &rel.local_key);
                if local.is_null() {
                    continue;
                }
                let local = bind_column(model, &link.table_name, &link.local_column, &local, dialect);
                clear.push((link.table_name.clone(), link.local_column.clone(), local.clone()));
                for item in &items {
                    let remote = column_value(item, &rel.remote_key);
                    if remote.is_null() {
                        continue;
                    }
                    let remote = bind_column(model, &link.table_name, &link.remote_column, &remote, dialect);
                    let row = LinkRow::new(
                        &link.table_name,
                        (&link.local_column, local.clone()),
                        (&link.remote_column, remote),
                    );
                    if !rows.contains(&row) {
                        rows.push(row);
                    }
                }
            }
        }

        for (table, column, value) in &clear {
            let (sql, params) = DeleteBuilder::new(table)
                .filter(Expr::col(column).eq(value.clone()))
                .build_with_dialect(dialect);
            conn.execute(&sql, &params)?;
        }
        for row in &rows {
            let [(c1, v1), (c2, v2)] = &row.columns;
            let (sql, params) = InsertBuilder::new(&row.table)
                .value(c1, v1.clone())
                .value(c2, v2.clone())
                .build_with_dialect(dialect);
            conn.execute(&sql, &params)?;
        }
        if !rows.is_empty() || !clear.is_empty() {
            tracing::debug!(cleared = clear.len(), inserted = rows.len(), "Wrote link rows");
        }
        Ok(())
    }

    /// DELETE the row of `inst`, handling dependent rows first: cascaded
    /// children are deleted, others get their foreign key set to NULL, and
    /// many-to-many link rows are removed.
    fn delete_instance(&self, conn: &mut dyn Connection, dialect: Dialect, inst: &Instance) -> Result<()> {
        if inst.state() == ObjectState::Deleted {
            return Ok(());
        }
        let model = inst.model();
        let table = table_of(model)?;
        let Some(pk) = inst.committed_primary_key() else {
            return Ok(());
        };

        for rel in model.relationships().iter().filter(|r| !r.viewonly) {
            let key = column_value(inst, &rel.local_key);
            if key.is_null() {
                continue;
            }
            match rel.kind {
                RelationshipKind::OneToMany | RelationshipKind::OneToOne => {
                    if rel.passive_deletes {
                        continue;
                    }
                    let target = model.related_model(rel)?;
                    if rel.cascade_delete {
                        let stmt = select(&target)
                            .where_(Expr::qualified(&rel.related_table, &rel.remote_key).eq(key.clone()));
                        for child in self.fetch_entities(conn, &stmt)? {
                            self.delete_instance(conn, dialect, &child)?;
                        }
                    } else {
                        let (sql, params) = UpdateBuilder::new(&rel.related_table)
                            .set(&rel.remote_key, Value::Null)
                            .filter(Expr::col(&rel.remote_key).eq(key.clone()))
                            .build_with_dialect(dialect);
                        conn.execute(&sql, &params)?;
                        self.detach_children(inst, &rel.related_table, &rel.remote_key, &key, &[]);
                    }
                }
                RelationshipKind::ManyToMany => {
                    let Some(link) = &rel.link_table else { continue };
                    let bound = bind_column(model, &link.table_name, &link.local_column, &key, dialect);
                    let (sql, params) = DeleteBuilder::new(&link.table_name)
                        .filter(Expr::col(&link.local_column).eq(bound))
                        .build_with_dialect(dialect);
                    conn.execute(&sql, &params)?;
                }
                RelationshipKind::ManyToOne => {}
            }
        }

        let (sql, params) = DeleteBuilder::new(table)
            .filter(key_filter(model, &pk, dialect)?)
            .build_with_dialect(dialect);
        conn.execute(&sql, &params)?;
        inst.set_state(ObjectState::Deleted);
        tracing::debug!(table = %table, "Deleted row");

        let mut state = self.state();
        state.identity.retain(|_, i| !i.same(inst));
        state.deleted.retain(|i| !i.same(inst));
        state.deleted_in_tx.push((ObjectKey::new(table, &pk), inst.clone()));
        Ok(())
    }

    /// In-memory side of nulling children's foreign keys: clear the key and
    /// the many-to-one reference back to `parent`, except for `keep`.
    fn detach_children(&self, parent: &Instance, table: &str, column: &str, key: &Value, keep: &[Instance]) {
        let children: Vec<Instance> = self
            .state()
            .identity
            .values()
            .filter(|i| i.model().table_name() == Some(table))
            .cloned()
            .collect();
        for child in children {
            let Some(idx) = child.model().field_for_column(column) else { continue };
            if child.value_at(idx) != *key || keep.iter().any(|k| k.same(&child)) {
                continue;
            }
            child.set_value_at(idx, Value::Null);
            // Updates already ran, so the row now matches memory
            if child.state() == ObjectState::Persistent {
                child.mark_persistent();
            }
            for rel in child.model().relationships().iter().filter(|r| r.holds_foreign_key()) {
                if let Some(Related::One(Some(target))) = child.loaded_related(&rel.name) {
                    if target.same(parent) {
                        child.set_loaded_related(&rel.name, Related::One(None));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_rows_compare_regardless_of_side() {
        let from_hero = LinkRow::new("heroteamlink", ("hero_id", Value::BigInt(1)), ("team_id", Value::BigInt(2)));
        let from_team = LinkRow::new("heroteamlink", ("team_id", Value::BigInt(2)), ("hero_id", Value::BigInt(1)));
        assert_eq!(from_hero, from_team);
        assert_eq!(from_hero.columns[0].0, "hero_id");
    }
}
