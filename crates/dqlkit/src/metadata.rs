//! Entity mapping metadata.
//!
//! This is the subset of ORM class metadata the builders and the unique
//! inserter consume: fields and their columns, identifiers, owning-side join
//! columns, the inheritance tree and the identifier generation strategy.
//! A [`MetadataRegistry`] can be filled in code or loaded from JSON.

use crate::error::{DbError, DbResult};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

/// A mapped field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FieldMapping {
    pub field_name: String,
    pub column_name: String,
    #[serde(rename = "type", default = "default_type")]
    pub type_name: String,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub id: bool,
    /// Class that declares the field when it is inherited.
    #[serde(default)]
    pub inherited: Option<String>,
}

fn default_type() -> String {
    "string".to_string()
}

impl FieldMapping {
    pub fn new(field_name: impl Into<String>, column_name: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            column_name: column_name.into(),
            type_name: default_type(),
            nullable: false,
            unique: false,
            id: false,
            inherited: None,
        }
    }

    pub fn with_type(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = type_name.into();
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn id(mut self) -> Self {
        self.id = true;
        self
    }

    pub fn inherited_from(mut self, class: impl Into<String>) -> Self {
        self.inherited = Some(class.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationKind {
    OneToOne,
    ManyToOne,
    OneToMany,
    ManyToMany,
}

impl AssociationKind {
    pub fn is_to_one(self) -> bool {
        matches!(self, AssociationKind::OneToOne | AssociationKind::ManyToOne)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JoinColumn {
    pub name: String,
    #[serde(default = "default_referenced_column")]
    pub referenced_column_name: String,
    #[serde(default = "default_true")]
    pub nullable: bool,
}

fn default_referenced_column() -> String {
    "id".to_string()
}

fn default_true() -> bool {
    true
}

impl JoinColumn {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            referenced_column_name: default_referenced_column(),
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// A mapped relation to another entity.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AssociationMapping {
    pub field_name: String,
    pub target_entity: String,
    pub kind: AssociationKind,
    #[serde(default = "default_true")]
    pub owning_side: bool,
    #[serde(default)]
    pub join_columns: Vec<JoinColumn>,
    /// Part of the identifier (derived identity).
    #[serde(default)]
    pub id: bool,
}

impl AssociationMapping {
    /// Owning to-one association: the side that stores join columns.
    pub fn has_join_columns(&self) -> bool {
        self.owning_side && self.kind.is_to_one()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InheritanceType {
    #[default]
    None,
    SingleTable,
    Joined,
    TablePerClass,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DiscriminatorColumn {
    pub name: String,
    #[serde(default)]
    pub field_name: Option<String>,
    #[serde(rename = "type", default = "default_type")]
    pub type_name: String,
}

/// How identifiers are produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum IdGenerator {
    /// Identifier values are set by the application.
    #[default]
    Assigned,
    /// The database generates the identifier on insert
    /// (auto-increment, identity column or sequence default).
    Identity {
        #[serde(default)]
        sequence: Option<String>,
    },
}

impl IdGenerator {
    pub fn is_post_insert(&self) -> bool {
        matches!(self, IdGenerator::Identity { .. })
    }
}

/// Mapping metadata of one entity class.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClassMetadata {
    pub name: String,
    pub table_name: String,
    #[serde(default)]
    pub fields: Vec<FieldMapping>,
    #[serde(default)]
    pub associations: Vec<AssociationMapping>,
    #[serde(default)]
    pub inheritance_type: InheritanceType,
    #[serde(default)]
    pub discriminator_column: Option<DiscriminatorColumn>,
    #[serde(default)]
    pub discriminator_value: Option<String>,
    /// Discriminator value → class name.
    #[serde(default)]
    pub discriminator_map: BTreeMap<String, String>,
    /// Ancestors, nearest first.
    #[serde(default)]
    pub parent_classes: Vec<String>,
    #[serde(default)]
    pub sub_classes: Vec<String>,
    #[serde(default)]
    pub id_generator: IdGenerator,
}

impl ClassMetadata {
    pub fn new(name: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table_name: table_name.into(),
            fields: Vec::new(),
            associations: Vec::new(),
            inheritance_type: InheritanceType::None,
            discriminator_column: None,
            discriminator_value: None,
            discriminator_map: BTreeMap::new(),
            parent_classes: Vec::new(),
            sub_classes: Vec::new(),
            id_generator: IdGenerator::Assigned,
        }
    }

    pub fn with_field(mut self, field: FieldMapping) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_association(mut self, association: AssociationMapping) -> Self {
        self.associations.push(association);
        self
    }

    pub fn with_id_generator(mut self, generator: IdGenerator) -> Self {
        self.id_generator = generator;
        self
    }

    pub fn with_inheritance(
        mut self,
        inheritance_type: InheritanceType,
        discriminator: DiscriminatorColumn,
    ) -> Self {
        self.inheritance_type = inheritance_type;
        self.discriminator_column = Some(discriminator);
        self
    }

    pub fn field(&self, field_name: &str) -> Option<&FieldMapping> {
        self.fields.iter().find(|f| f.field_name == field_name)
    }

    pub fn field_for_column(&self, column_name: &str) -> Option<&FieldMapping> {
        self.fields.iter().find(|f| f.column_name == column_name)
    }

    pub fn association(&self, field_name: &str) -> Option<&AssociationMapping> {
        self.associations.iter().find(|a| a.field_name == field_name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.column_name.as_str())
    }

    pub fn identifier_field_names(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.id)
            .map(|f| f.field_name.as_str())
            .chain(
                self.associations
                    .iter()
                    .filter(|a| a.id)
                    .map(|a| a.field_name.as_str()),
            )
            .collect()
    }

    pub fn is_identifier(&self, field_name: &str) -> bool {
        self.field(field_name).is_some_and(|f| f.id)
            || self.association(field_name).is_some_and(|a| a.id)
    }

    pub fn uses_id_generator(&self) -> bool {
        self.id_generator.is_post_insert()
    }

    /// Single-table or joined inheritance, the schemes with a discriminator.
    pub fn has_discriminated_inheritance(&self) -> bool {
        matches!(
            self.inheritance_type,
            InheritanceType::SingleTable | InheritanceType::Joined
        )
    }

    pub fn is_root_entity(&self) -> bool {
        self.parent_classes.is_empty()
    }
}

/// Class metadata keyed by class name.
#[derive(Debug, Clone, Default)]
pub struct MetadataRegistry {
    classes: HashMap<String, ClassMetadata>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load metadata from a JSON array of class descriptions.
    pub fn from_json(json: &str) -> DbResult<Self> {
        let classes: Vec<ClassMetadata> = serde_json::from_str(json)
            .map_err(|e| DbError::configuration(format!("invalid metadata JSON: {e}")))?;
        let mut registry = Self::new();
        for class in classes {
            registry.register(class);
        }
        Ok(registry)
    }

    pub fn register(&mut self, class: ClassMetadata) -> &mut Self {
        self.classes.insert(class.name.clone(), class);
        self
    }

    pub fn with(mut self, class: ClassMetadata) -> Self {
        self.register(class);
        self
    }

    pub fn contains(&self, class: &str) -> bool {
        self.classes.contains_key(class)
    }

    pub fn get(&self, class: &str) -> DbResult<&ClassMetadata> {
        self.classes
            .get(class)
            .ok_or_else(|| DbError::configuration(format!("class '{class}' is not mapped")))
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
