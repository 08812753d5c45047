//! Reading rows into instances: relationship loads, refresh and `selectin`
//! eager loading.

use std::collections::HashMap;
use std::sync::Arc;

use sqlmodel_core::{
    Connection, Dialect, Error, Instance, LazyStrategy, ModelDescriptor, Related, RelationshipInfo,
    RelationshipKind, Result, Value, ValueKey,
};
use sqlmodel_query::{Expr, SelectOfScalar, select};

use crate::session::{SessionInner, selected_entity};

/// Decode the cells of one entity (its column fields, in field order) into
/// a full row of field values.
pub(crate) fn decode_entity(
    model: &ModelDescriptor,
    cells: &mut impl Iterator<Item = Value>,
) -> Result<Vec<Value>> {
    let mut values = Vec::with_capacity(model.fields().len());
    for field in model.fields() {
        match &field.column {
            Some(col) => {
                let raw = cells.next().ok_or_else(|| {
                    Error::Database(format!("result row is missing column '{}'", col.name))
                })?;
                values.push(col.sql_type.result(raw)?);
            }
            None => values.push(Value::Null),
        }
    }
    Ok(values)
}

/// Storage form of `value` for `table.column`.
fn bind_for(model: &ModelDescriptor, table: &str, column: &str, value: &Value, dialect: Dialect) -> Value {
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

impl SessionInner {
    /// Run an entity select and map the rows through the identity map.
    pub(crate) fn fetch_entities(&self, conn: &mut dyn Connection, stmt: &SelectOfScalar) -> Result<Vec<Instance>> {
        let model = selected_entity(stmt.item())
            .ok_or_else(|| Error::Config("statement does not select an entity".to_string()))?;
        let (sql, params) = stmt.build_with_dialect(conn.dialect())?;
        let rows = conn.query(&sql, &params)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let values = decode_entity(model, &mut row.into_values().into_iter())?;
            if let Some(instance) = self.register_loaded(model, values) {
                out.push(instance);
            }
        }
        Ok(out)
    }

    /// SELECT of the rows related to an instance whose join value is `local`.
    fn relationship_select(
        &self,
        target: &Arc<ModelDescriptor>,
        rel: &RelationshipInfo,
        local: &Value,
        dialect: Dialect,
    ) -> Result<SelectOfScalar> {
        let mut stmt = select(target);
        match (&rel.link_table, rel.kind) {
            (Some(link), RelationshipKind::ManyToMany) => {
                let schema = target.schema()?;
                let link_model = schema.table_model(&link.table_name).ok_or_else(|| {
                    Error::Config(format!("link table '{}' has no model", link.table_name))
                })?;
                let bound = bind_for(target, &link.table_name, &link.local_column, local, dialect);
                stmt = stmt
                    .join_on(
                        link_model,
                        Expr::qualified(&link.table_name, &link.remote_column)
                            .eq(Expr::qualified(&rel.related_table, &rel.remote_key)),
                    )
                    .where_(Expr::qualified(&link.table_name, &link.local_column).eq(bound));
            }
            _ => {
                let bound = bind_for(target, &rel.related_table, &rel.remote_key, local, dialect);
                stmt = stmt.where_(Expr::qualified(&rel.related_table, &rel.remote_key).eq(bound));
            }
        }
        if let Some(order) = &rel.order_by {
            stmt = stmt.order_by(Expr::qualified(&rel.related_table, order));
        }
        Ok(stmt)
    }

    /// Load one relationship of `instance` from the database.
    ///
    /// Many-to-one targets already in the identity map are returned without
    /// a query.
    pub(crate) fn load_relationship_now(&self, instance: &Instance, rel: &RelationshipInfo) -> Result<Related> {
        let local = column_value(instance, &rel.local_key);
        if local.is_null() {
            return Ok(Related::empty(rel.uselist));
        }
        let target = instance.model().related_model(rel)?;
        if rel.kind == RelationshipKind::ManyToOne {
            if let Some(hit) = self.identity_lookup(&target, &rel.remote_key, &local) {
                return Ok(Related::One(Some(hit)));
            }
        }

        let found = {
            let mut guard = self.connection();
            let conn: &mut dyn Connection = &mut **guard;
            let stmt = self.relationship_select(&target, rel, &local, conn.dialect())?;
            self.fetch_entities(conn, &stmt)?
        };
        tracing::debug!(
            model = instance.model().name(),
            relationship = %rel.name,
            rows = found.len(),
            "Loaded relationship"
        );
        if rel.uselist {
            Ok(Related::Many(found))
        } else {
            Ok(Related::One(found.into_iter().next()))
        }
    }

    /// Re-read the row of a persistent instance.
    pub(crate) fn reload(&self, instance: &Instance) -> Result<()> {
        let model = instance.model();
        let pk = instance
            .committed_primary_key()
            .unwrap_or_else(|| instance.primary_key_values());
        let row = {
            let mut guard = self.connection();
            let conn: &mut dyn Connection = &mut **guard;
            let dialect = conn.dialect();
            let mut stmt = select(model);
            for (idx, value) in model.primary_key().iter().zip(&pk) {
                let field = &model.fields()[*idx];
                let Some(col) = &field.column else { continue };
                let column = model.col(&field.name)?;
                stmt = stmt.where_(Expr::from(column).eq(col.sql_type.bind(value, dialect)));
            }
            let (sql, params) = stmt.build_with_dialect(dialect)?;
            conn.query(&sql, &params)?.into_iter().next()
        };
        let row = row.ok_or(Error::NoResultFound)?;
        let values = decode_entity(model, &mut row.into_values().into_iter())?;
        instance.load_row(values);
        tracing::debug!(model = model.name(), "Refreshed instance");
        Ok(())
    }

    /// Load every `selectin` relationship of freshly selected instances,
    /// one IN query per relationship.
    pub(crate) fn eager_load(&self, instances: &[Instance]) -> Result<()> {
        let Some(first) = instances.first() else { return Ok(()) };
        let model = Arc::clone(first.model());
        for rel in model
            .relationships()
            .iter()
            .filter(|r| r.lazy == LazyStrategy::Selectin)
        {
            let waiting: Vec<&Instance> = instances
                .iter()
                .filter(|i| i.loaded_related(&rel.name).is_none())
                .collect();
            if waiting.is_empty() {
                continue;
            }
            if rel.kind == RelationshipKind::ManyToMany {
                for inst in waiting {
                    let loaded = self.load_relationship_now(inst, rel)?;
                    inst.set_loaded_related(&rel.name, loaded);
                }
                continue;
            }

            let mut keys: Vec<Value> = Vec::new();
            for inst in &waiting {
                let value = column_value(inst, &rel.local_key);
                if !value.is_null() && !keys.contains(&value) {
                    keys.push(value);
                }
            }
            let target = model.related_model(rel)?;
            let found = if keys.is_empty() {
                Vec::new()
            } else {
                let mut guard = self.connection();
                let conn: &mut dyn Connection = &mut **guard;
                let dialect = conn.dialect();
                let bound: Vec<Value> = keys
                    .iter()
                    .map(|k| bind_for(&target, &rel.related_table, &rel.remote_key, k, dialect))
                    .collect();
                let mut stmt = select(&target)
                    .where_(Expr::qualified(&rel.related_table, &rel.remote_key).in_list(bound));
                if let Some(order) = &rel.order_by {
                    stmt = stmt.order_by(Expr::qualified(&rel.related_table, order));
                }
                self.fetch_entities(conn, &stmt)?
            };

            let mut grouped: HashMap<ValueKey, Vec<Instance>> = HashMap::new();
            for item in found {
                let key = ValueKey::new(&[column_value(&item, &rel.remote_key)]);
                grouped.entry(key).or_default().push(item);
            }
            for inst in waiting {
                let key = ValueKey::new(&[column_value(inst, &rel.local_key)]);
                let items = grouped.get(&key).cloned().unwrap_or_default();
                let loaded = if rel.uselist {
                    Related::Many(items)
                } else {
                    Related::One(items.into_iter().next())
                };
                inst.set_loaded_related(&rel.name, loaded);
            }
            tracing::debug!(
                model = model.name(),
                relationship = %rel.name,
                parents = keys.len(),
                "Eager loaded relationship"
            );
        }
        Ok(())
    }
}
