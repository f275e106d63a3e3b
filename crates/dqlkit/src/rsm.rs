//! Native-SQL result set mapping.
//!
//! A [`ResultSetMapping`] tells how the columns of a hand-written SQL query
//! map back to entities: field results, meta results (foreign keys and
//! discriminators) and scalar results. [`ResultSetMappingBuilder`] derives it
//! from class metadata, including parent and subclass fields of single-table
//! and joined inheritance, and generates the matching SELECT list.
//!
//! ```ignore
//! let mut builder = ResultSetMappingBuilder::new(&registry);
//! builder.add_root_entity_from_class_metadata("User", "u", None)?;
//! let select = builder.generate_select_clause(&HashMap::new())?;
//! let sql = format!("SELECT {select} FROM users u");
//! ```

use crate::connection::Row;
use crate::error::{DbError, DbResult};
use crate::metadata::{ClassMetadata, InheritanceType, MetadataRegistry};
use crate::value::Value;
use std::collections::{BTreeMap, HashMap};

/// How result column aliases are derived from column names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ColumnRenaming {
    /// Use the column name as is.
    #[default]
    Raw,
    /// Append a per-builder counter, keeping aliases unique across joined tables.
    Increment,
    /// Caller-supplied `column → alias` table; unlisted columns keep their name.
    Custom(HashMap<String, String>),
}

/// What a result column maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnMapping {
    Field {
        alias: String,
        field: String,
        declaring_class: String,
    },
    Meta {
        alias: String,
        /// Database column (join column or discriminator).
        column: String,
        is_identifier: bool,
        type_name: String,
    },
    Scalar {
        result_alias: String,
        type_name: String,
    },
}

/// An entity alias of the mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityResult {
    pub alias: String,
    pub class: String,
    /// `(parent alias, relation field)` for joined entities.
    pub parent: Option<(String, String)>,
    /// Result column carrying the discriminator.
    pub discriminator_column: Option<String>,
    /// Discriminator value → class.
    pub discriminator_map: BTreeMap<String, String>,
    /// Result column whose value keys the entity.
    pub index_by: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSetMapping {
    entities: Vec<EntityResult>,
    columns: Vec<(String, ColumnMapping)>,
    /// class → ancestors, used to pick fields when hydrating subclasses.
    ancestors: BTreeMap<String, Vec<String>>,
}

impl ResultSetMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entities(&self) -> &[EntityResult] {
        &self.entities
    }

    pub fn entity(&self, alias: &str) -> Option<&EntityResult> {
        self.entities.iter().find(|e| e.alias == alias)
    }

    /// Result columns in mapping order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &ColumnMapping)> {
        self.columns.iter().map(|(c, m)| (c.as_str(), m))
    }

    pub fn mapping(&self, column: &str) -> Option<&ColumnMapping> {
        self.columns.iter().find(|(c, _)| c == column).map(|(_, m)| m)
    }

    pub fn is_root_alias(&self, alias: &str) -> bool {
        self.entity(alias).is_some_and(|e| e.parent.is_none())
    }

    /// Result column mapped to `field` of `alias`.
    pub fn column_for_field(&self, alias: &str, field: &str) -> Option<&str> {
        self.columns.iter().find_map(|(c, m)| match m {
            ColumnMapping::Field {
                alias: a, field: f, ..
            } if a == alias && f == field => Some(c.as_str()),
            _ => None,
        })
    }

    /// Owner alias of a field or meta column.
    pub fn column_owner(&self, column: &str) -> Option<&str> {
        match self.mapping(column)? {
            ColumnMapping::Field { alias, .. } | ColumnMapping::Meta { alias, .. } => {
                Some(alias.as_str())
            }
            ColumnMapping::Scalar { .. } => None,
        }
    }

    pub fn add_entity_result(&mut self, class: &str, alias: &str) -> DbResult<&mut EntityResult> {
        if self.entity(alias).is_some() {
            return Err(DbError::configuration(format!(
                "alias '{alias}' is already mapped"
            )));
        }
        self.entities.push(EntityResult {
            alias: alias.to_string(),
            class: class.to_string(),
            parent: None,
            discriminator_column: None,
            discriminator_map: BTreeMap::new(),
            index_by: None,
        });
        let idx = self.entities.len() - 1;
        Ok(&mut self.entities[idx])
    }

    fn add_column(&mut self, column: String, mapping: ColumnMapping) -> DbResult<()> {
        if let Some(existing) = self.mapping(&column) {
            return Err(DbError::configuration(format!(
                "the column '{column}' conflicts with another column in the mapper \
                 (already mapped as {existing:?})"
            )));
        }
        self.columns.push((column, mapping));
        Ok(())
    }

    pub fn add_scalar_result(
        &mut self,
        column: &str,
        result_alias: &str,
        type_name: &str,
    ) -> DbResult<()> {
        self.add_column(
            column.to_string(),
            ColumnMapping::Scalar {
                result_alias: result_alias.to_string(),
                type_name: type_name.to_string(),
            },
        )
    }

    /// Key the entities of `alias` by the value of `field`.
    pub fn add_index_by(&mut self, alias: &str, field: &str) -> DbResult<()> {
        let column = self
            .column_for_field(alias, field)
            .map(str::to_string)
            .ok_or_else(|| {
                DbError::configuration(format!(
                    "cannot index by '{alias}.{field}': the field is not mapped"
                ))
            })?;
        let entity = self
            .entities
            .iter_mut()
            .find(|e| e.alias == alias)
            .ok_or_else(|| DbError::configuration(format!("alias '{alias}' is not mapped")))?;
        entity.index_by = Some(column);
        Ok(())
    }

    /// Group a flat row into per-alias entity data.
    ///
    /// The class of an entity with a discriminator is resolved from the
    /// discriminator value; only fields declared by that class or its
    /// ancestors are kept. A joined entity whose fields are all NULL (an
    /// unmatched LEFT JOIN) is omitted.
    pub fn hydrate_row(&self, row: &Row) -> DbResult<HydratedRow> {
        let mut hydrated = HydratedRow::default();

        for entity in &self.entities {
            let class = match &entity.discriminator_column {
                Some(column) => match row.get(column) {
                    Some(Value::Null) | None => entity.class.clone(),
                    Some(value) => {
                        let key = match value.as_str() {
                            Some(text) => text.to_string(),
                            None => value.to_string(),
                        };
                        entity.discriminator_map.get(&key).cloned().ok_or_else(|| {
                            DbError::configuration(format!(
                                "invalid discriminator value '{key}' for alias '{}'",
                                entity.alias
                            ))
                        })?
                    }
                },
                None => entity.class.clone(),
            };
            let lineage = self.ancestors.get(&class);
            let declared_here = |declaring: &str| {
                declaring == class || lineage.is_some_and(|a| a.iter().any(|c| c == declaring))
            };

            let mut fields = BTreeMap::new();
            let mut meta = BTreeMap::new();
            for (column, mapping) in &self.columns {
                let Some(value) = row.get(column) else {
                    continue;
                };
                match mapping {
                    ColumnMapping::Field {
                        alias,
                        field,
                        declaring_class,
                    } if *alias == entity.alias && declared_here(declaring_class.as_str()) => {
                        fields.insert(field.clone(), value.clone());
                    }
                    ColumnMapping::Meta {
                        alias, column: db, ..
                    } if *alias == entity.alias => {
                        meta.insert(db.clone(), value.clone());
                    }
                    _ => {}
                }
            }

            if entity.parent.is_some() && fields.values().all(Value::is_null) {
                continue;
            }
            let key = entity
                .index_by
                .as_deref()
                .and_then(|c| row.get(c))
                .cloned();
            hydrated.entities.push(HydratedEntity {
                alias: entity.alias.clone(),
                class,
                parent: entity.parent.clone(),
                key,
                fields,
                meta,
            });
        }

        for (column, mapping) in &self.columns {
            if let ColumnMapping::Scalar { result_alias, .. } = mapping {
                if let Some(value) = row.get(column) {
                    hydrated.scalars.insert(result_alias.clone(), value.clone());
                }
            }
        }

        Ok(hydrated)
    }
}

/// Entity data read from one row.
#[derive(Debug, Clone, PartialEq)]
pub struct HydratedEntity {
    pub alias: String,
    pub class: String,
    pub parent: Option<(String, String)>,
    /// Value of the index-by column, if configured.
    pub key: Option<Value>,
    pub fields: BTreeMap<String, Value>,
    /// Meta columns (join columns, discriminator) by database column name.
    pub meta: BTreeMap<String, Value>,
}

/// One row grouped by entity alias.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HydratedRow {
    pub entities: Vec<HydratedEntity>,
    pub scalars: BTreeMap<String, Value>,
}

impl HydratedRow {
    pub fn entity(&self, alias: &str) -> Option<&HydratedEntity> {
        self.entities.iter().find(|e| e.alias == alias)
    }
}

/// Builds a [`ResultSetMapping`] from class metadata.
pub struct ResultSetMappingBuilder<'m> {
    registry: &'m MetadataRegistry,
    rsm: ResultSetMapping,
    default_renaming: ColumnRenaming,
    sql_counter: usize,
}

impl<'m> ResultSetMappingBuilder<'m> {
    pub fn new(registry: &'m MetadataRegistry) -> Self {
        Self {
            registry,
            rsm: ResultSetMapping::new(),
            default_renaming: ColumnRenaming::Raw,
            sql_counter: 0,
        }
    }

    /// Renaming used when a call passes `None`.
    pub fn with_default_renaming(mut self, renaming: ColumnRenaming) -> Self {
        self.default_renaming = renaming;
        self
    }

    pub fn mapping(&self) -> &ResultSetMapping {
        &self.rsm
    }

    pub fn build(self) -> ResultSetMapping {
        self.rsm
    }

    /// Map `class` as a root entity under `alias`.
    pub fn add_root_entity_from_class_metadata(
        &mut self,
        class: &str,
        alias: &str,
        renaming: Option<ColumnRenaming>,
    ) -> DbResult<&mut Self> {
        let renaming = renaming.unwrap_or_else(|| self.default_renaming.clone());
        self.rsm.add_entity_result(class, alias)?;
        self.add_all_class_fields(class, alias, &renaming)?;
        Ok(self)
    }

    /// Map `class` under `alias`, joined to `parent_alias` through `relation`.
    pub fn add_joined_entity_from_class_metadata(
        &mut self,
        class: &str,
        alias: &str,
        parent_alias: &str,
        relation: &str,
        renaming: Option<ColumnRenaming>,
    ) -> DbResult<&mut Self> {
        if self.rsm.entity(parent_alias).is_none() {
            return Err(DbError::configuration(format!(
                "parent alias '{parent_alias}' is not mapped"
            )));
        }
        let renaming = renaming.unwrap_or_else(|| self.default_renaming.clone());
        let entity = self.rsm.add_entity_result(class, alias)?;
        entity.parent = Some((parent_alias.to_string(), relation.to_string()));
        self.add_all_class_fields(class, alias, &renaming)?;
        Ok(self)
    }

    pub fn add_scalar_result(
        &mut self,
        column: &str,
        result_alias: &str,
        type_name: &str,
    ) -> DbResult<&mut Self> {
        self.rsm.add_scalar_result(column, result_alias, type_name)?;
        Ok(self)
    }

    pub fn add_index_by(&mut self, alias: &str, field: &str) -> DbResult<&mut Self> {
        self.rsm.add_index_by(alias, field)?;
        Ok(self)
    }

    /// `<table alias>.<column> AS <result column>` for every mapped field and
    /// meta column. `table_aliases` remaps entity aliases to SQL table aliases.
    pub fn generate_select_clause(&self, table_aliases: &HashMap<String, String>) -> DbResult<String> {
        let mut parts = Vec::with_capacity(self.rsm.columns.len());
        for (result_column, mapping) in &self.rsm.columns {
            let (alias, column) = match mapping {
                ColumnMapping::Field {
                    alias,
                    field,
                    declaring_class,
                } => (alias, self.field_column(declaring_class, field)?),
                ColumnMapping::Meta { alias, column, .. } => (alias, column.clone()),
                ColumnMapping::Scalar { .. } => continue,
            };
            let table_alias = table_aliases.get(alias).unwrap_or(alias);
            parts.push(format!("{table_alias}.{column} AS {result_column}"));
        }
        Ok(parts.join(", "))
    }

    /// Column of `field`, searching subclasses when `class` does not map it.
    fn field_column(&self, class: &str, field: &str) -> DbResult<String> {
        let meta = self.registry.get(class)?;
        if let Some(mapping) = meta.field(field) {
            return Ok(mapping.column_name.clone());
        }
        for sub in &meta.sub_classes {
            if let Some(mapping) = self.registry.get(sub)?.field(field) {
                return Ok(mapping.column_name.clone());
            }
        }
        Err(DbError::configuration(format!(
            "field '{field}' is not mapped by '{class}' or its subclasses"
        )))
    }

    fn add_all_class_fields(
        &mut self,
        class: &str,
        alias: &str,
        renaming: &ColumnRenaming,
    ) -> DbResult<()> {
        let registry = self.registry;
        let meta = registry.get(class)?;
        if meta.inheritance_type == InheritanceType::TablePerClass {
            return Err(DbError::configuration(format!(
                "result set mapping does not support the inheritance scheme of '{class}'"
            )));
        }
        self.rsm
            .ancestors
            .insert(meta.name.clone(), meta.parent_classes.clone());

        self.add_fields(meta, alias, renaming)?;
        self.add_join_columns(meta, alias, renaming)?;

        if meta.has_discriminated_inheritance() {
            if let Some(disc) = &meta.discriminator_column {
                let column = self.column_alias(&disc.name, renaming);
                self.rsm.add_column(
                    column.clone(),
                    ColumnMapping::Meta {
                        alias: alias.to_string(),
                        column: disc.name.clone(),
                        is_identifier: false,
                        type_name: disc.type_name.clone(),
                    },
                )?;
                let discriminator_map = self.discriminator_map(meta)?;
                if let Some(entity) = self.rsm.entities.iter_mut().find(|e| e.alias == alias) {
                    entity.discriminator_column = Some(column);
                    entity.discriminator_map = discriminator_map;
                }
            }
            for sub in &meta.sub_classes {
                let sub_meta = registry.get(sub)?;
                self.rsm
                    .ancestors
                    .insert(sub_meta.name.clone(), sub_meta.parent_classes.clone());
                self.add_fields(sub_meta, alias, renaming)?;
                self.add_join_columns(sub_meta, alias, renaming)?;
            }
        }
        Ok(())
    }

    /// Inherited fields first, then the class's own.
    fn add_fields(
        &mut self,
        meta: &ClassMetadata,
        alias: &str,
        renaming: &ColumnRenaming,
    ) -> DbResult<()> {
        let inherited = meta.fields.iter().filter(|f| f.inherited.is_some());
        let own = meta.fields.iter().filter(|f| f.inherited.is_none());
        for field in inherited.chain(own) {
            if self.rsm.column_for_field(alias, &field.field_name).is_some() {
                continue;
            }
            let column = self.column_alias(&field.column_name, renaming);
            self.rsm.add_column(
                column,
                ColumnMapping::Field {
                    alias: alias.to_string(),
                    field: field.field_name.clone(),
                    declaring_class: field.inherited.clone().unwrap_or_else(|| meta.name.clone()),
                },
            )?;
        }
        Ok(())
    }

    /// Join columns of owning to-one associations, typed like the column
    /// they reference.
    fn add_join_columns(
        &mut self,
        meta: &ClassMetadata,
        alias: &str,
        renaming: &ColumnRenaming,
    ) -> DbResult<()> {
        let registry = self.registry;
        for association in meta.associations.iter().filter(|a| a.has_join_columns()) {
            let target = registry.get(&association.target_entity)?;
            for join_column in &association.join_columns {
                let already_mapped = self.rsm.columns.iter().any(|(_, m)| {
                    matches!(m, ColumnMapping::Meta { alias: a, column, .. }
                        if a == alias && *column == join_column.name)
                });
                if already_mapped {
                    continue;
                }
                let type_name = target
                    .field_for_column(&join_column.referenced_column_name)
                    .map(|f| f.type_name.clone())
                    .ok_or_else(|| {
                        DbError::configuration(format!(
                            "column '{}' referenced by '{}.{}' is not mapped by '{}'",
                            join_column.referenced_column_name,
                            meta.name,
                            association.field_name,
                            target.name
                        ))
                    })?;
                let column = self.column_alias(&join_column.name, renaming);
                self.rsm.add_column(
                    column,
                    ColumnMapping::Meta {
                        alias: alias.to_string(),
                        column: join_column.name.clone(),
                        is_identifier: association.id,
                        type_name,
                    },
                )?;
            }
        }
        Ok(())
    }

    /// Discriminator values of the hierarchy, the class's own value included.
    fn discriminator_map(&self, meta: &ClassMetadata) -> DbResult<BTreeMap<String, String>> {
        let mut map = meta.discriminator_map.clone();
        if let Some(value) = &meta.discriminator_value {
            map.entry(value.clone()).or_insert_with(|| meta.name.clone());
        }
        for sub in &meta.sub_classes {
            let sub_meta = self.registry.get(sub)?;
            if let Some(value) = &sub_meta.discriminator_value {
                map.entry(value.clone())
                    .or_insert_with(|| sub_meta.name.clone());
            }
        }
        Ok(map)
    }

    fn column_alias(&mut self, column: &str, renaming: &ColumnRenaming) -> String {
        match renaming {
            ColumnRenaming::Raw => column.to_string(),
            ColumnRenaming::Increment => {
                let alias = format!("{column}{}", self.sql_counter);
                self.sql_counter += 1;
                alias
            }
            ColumnRenaming::Custom(map) => map.get(column).cloned().unwrap_or_else(|| column.to_string()),
        }
    }
}
