use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::{
    EnumMember, EnumType, Multiplicity, NavigationProperty, PrimitiveKind, ReferentialConstraint,
    Schema, SchemaType, StructuralProperty, TypeId, TypeKind, TypeRef,
};

/// Schema construction failure. Reported once, when the schema is built.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("type '{name}' referenced by '{referenced_by}' is not defined")]
    UnknownType { name: String, referenced_by: String },

    #[error("type '{name}' is defined more than once")]
    DuplicateType { name: String },

    #[error("'{property}' is declared more than once on '{type_name}' or its base types")]
    DuplicateProperty { type_name: String, property: String },

    #[error("inheritance cycle through '{type_name}'")]
    InheritanceCycle { type_name: String },

    #[error("'{type_name}' cannot derive from '{base}'")]
    InvalidBaseType { type_name: String, base: String },

    #[error("navigation '{navigation}' on '{type_name}' targets '{target}', which is not an entity type")]
    InvalidNavigationTarget {
        type_name: String,
        navigation: String,
        target: String,
    },

    #[error("property '{property}' on '{type_name}' has type '{ty}', which is not a primitive, complex or enum type")]
    InvalidPropertyType {
        type_name: String,
        property: String,
        ty: String,
    },

    #[error("key property '{property}' is not a property of '{type_name}'")]
    UnknownKeyProperty { type_name: String, property: String },

    #[error("enum '{type_name}': {detail}")]
    InvalidEnum { type_name: String, detail: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKindDescription {
    Entity,
    Complex,
    Enum,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PropertyDescription {
    pub name: String,
    /// `Edm.*` primitive, or a complex/enum type name.
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub collection: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NavigationDescription {
    pub name: String,
    pub target: String,
    pub multiplicity: Multiplicity,
    #[serde(default)]
    pub partner: Option<String>,
    #[serde(default)]
    pub constraints: Vec<ReferentialConstraint>,
}

/// Declarative description of one schema type.
///
/// ```yaml
/// name: Customer
/// kind: entity
/// key: [Id]
/// properties:
///   - { name: Id, type: Edm.Int32, nullable: false }
/// navigations:
///   - { name: Orders, target: Order, multiplicity: many }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
#[must_use]
pub struct TypeDescription {
    pub name: String,
    pub kind: TypeKindDescription,
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub key: Vec<String>,
    #[serde(default)]
    pub properties: Vec<PropertyDescription>,
    #[serde(default)]
    pub navigations: Vec<NavigationDescription>,
    /// Enum members, in declaration order.
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub is_flags: bool,
}

impl TypeDescription {
    fn new(name: impl Into<String>, kind: TypeKindDescription) -> Self {
        Self {
            name: name.into(),
            kind,
            base: None,
            key: Vec::new(),
            properties: Vec::new(),
            navigations: Vec::new(),
            members: Vec::new(),
            is_flags: false,
        }
    }

    pub fn entity(name: impl Into<String>) -> Self {
        Self::new(name, TypeKindDescription::Entity)
    }

    pub fn complex(name: impl Into<String>) -> Self {
        Self::new(name, TypeKindDescription::Complex)
    }

    pub fn enumeration(name: impl Into<String>) -> Self {
        Self::new(name, TypeKindDescription::Enum)
    }

    pub fn base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    pub fn key(mut self, property: impl Into<String>) -> Self {
        self.key.push(property.into());
        self
    }

    fn push_property(mut self, name: String, ty: String, nullable: bool, collection: bool) -> Self {
        self.properties.push(PropertyDescription {
            name,
            ty,
            nullable,
            collection,
        });
        self
    }

    /// Nullable single-valued property.
    pub fn property(self, name: impl Into<String>, ty: impl Into<String>) -> Self {
        self.push_property(name.into(), ty.into(), true, false)
    }

    /// Non-nullable single-valued property.
    pub fn required(self, name: impl Into<String>, ty: impl Into<String>) -> Self {
        self.push_property(name.into(), ty.into(), false, false)
    }

    pub fn collection(self, name: impl Into<String>, ty: impl Into<String>) -> Self {
        self.push_property(name.into(), ty.into(), false, true)
    }

    pub fn navigation(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        multiplicity: Multiplicity,
    ) -> Self {
        self.navigations.push(NavigationDescription {
            name: name.into(),
            target: target.into(),
            multiplicity,
            partner: None,
            constraints: Vec::new(),
        });
        self
    }

    pub fn member(mut self, name: impl Into<String>) -> Self {
        self.members.push(name.into());
        self
    }

    pub fn flags(mut self) -> Self {
        self.is_flags = true;
        self
    }
}

/// Whole-schema description, deserializable from YAML or JSON.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaDescription {
    pub namespace: String,
    #[serde(default)]
    pub types: Vec<TypeDescription>,
}

impl SchemaDescription {
    /// Validates the description and builds the immutable schema.
    ///
    /// # Errors
    /// Returns `SchemaError` for unresolved or duplicate names, inheritance
    /// cycles, and invalid property or navigation targets.
    pub fn build(&self) -> Result<Schema, SchemaError> {
        let mut types: Vec<SchemaType> = PrimitiveKind::ALL
            .iter()
            .map(|kind| blank_type(kind.name().to_owned(), TypeKind::Primitive(*kind)))
            .collect();
        let mut by_name: HashMap<String, TypeId> = types
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.clone(), type_id(i)))
            .collect();

        for desc in &self.types {
            let name = qualify(&self.namespace, &desc.name);
            if by_name.contains_key(&name) {
                return Err(SchemaError::DuplicateType { name });
            }
            let kind = match desc.kind {
                TypeKindDescription::Entity => TypeKind::Entity,
                TypeKindDescription::Complex => TypeKind::Complex,
                TypeKindDescription::Enum => TypeKind::Enum(enum_type(&name, desc)?),
            };
            by_name.insert(name.clone(), type_id(types.len()));
            types.push(blank_type(name, kind));
        }

        let resolve = |name: &str, referenced_by: &str| -> Result<TypeId, SchemaError> {
            by_name
                .get(name)
                .or_else(|| by_name.get(&qualify(&self.namespace, name)))
                .copied()
                .ok_or_else(|| SchemaError::UnknownType {
                    name: name.to_owned(),
                    referenced_by: referenced_by.to_owned(),
                })
        };

        for (offset, desc) in self.types.iter().enumerate() {
            let index = PrimitiveKind::ALL.len() + offset;
            let type_name = types[index].name.clone();

            if let Some(base) = &desc.base {
                let base_id = resolve(base, &type_name)?;
                let base_kind = &types[base_id.index()].kind;
                let compatible = matches!(
                    (&types[index].kind, base_kind),
                    (TypeKind::Entity, TypeKind::Entity) | (TypeKind::Complex, TypeKind::Complex)
                );
                if !compatible {
                    return Err(SchemaError::InvalidBaseType {
                        type_name,
                        base: types[base_id.index()].name.clone(),
                    });
                }
                types[index].base = Some(base_id);
            }

            let mut properties = Vec::with_capacity(desc.properties.len());
            for p in &desc.properties {
                let id = resolve(&p.ty, &type_name)?;
                let target = &types[id.index()];
                if target.is_entity() {
                    return Err(SchemaError::InvalidPropertyType {
                        type_name,
                        property: p.name.clone(),
                        ty: target.name.clone(),
                    });
                }
                properties.push(StructuralProperty {
                    name: p.name.clone(),
                    ty: TypeRef {
                        id,
                        collection: p.collection,
                    },
                    nullable: p.nullable,
                });
            }

            let mut navigations = Vec::with_capacity(desc.navigations.len());
            for n in &desc.navigations {
                let target = resolve(&n.target, &type_name)?;
                if !types[target.index()].is_entity() {
                    return Err(SchemaError::InvalidNavigationTarget {
                        type_name,
                        navigation: n.name.clone(),
                        target: types[target.index()].name.clone(),
                    });
                }
                navigations.push(NavigationProperty {
                    name: n.name.clone(),
                    target,
                    multiplicity: n.multiplicity,
                    partner: n.partner.clone(),
                    constraints: n.constraints.clone(),
                });
            }

            let entry = &mut types[index];
            entry.properties = properties;
            entry.navigations = navigations;
            entry.key.clone_from(&desc.key);
        }

        check_cycles(&types)?;

        for index in 0..types.len() {
            let mut cur = types[index].base;
            while let Some(base) = cur {
                types[base.index()].derived.push(type_id(index));
                cur = types[base.index()].base;
            }
        }

        let schema = Schema {
            namespace: self.namespace.clone(),
            types,
            by_name,
        };
        check_members(&schema)?;

        tracing::debug!(
            namespace = %schema.namespace,
            types = schema.types.len() - PrimitiveKind::ALL.len(),
            "schema built"
        );
        Ok(schema)
    }
}

/// Fluent construction of a [`Schema`] in code.
#[derive(Clone, Debug, Default)]
#[must_use]
pub struct SchemaBuilder {
    description: SchemaDescription,
}

impl SchemaBuilder {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            description: SchemaDescription {
                namespace: namespace.into(),
                types: Vec::new(),
            },
        }
    }

    pub fn with_type(mut self, ty: TypeDescription) -> Self {
        self.description.types.push(ty);
        self
    }

    /// # Errors
    /// See [`SchemaDescription::build`].
    pub fn build(self) -> Result<Schema, SchemaError> {
        self.description.build()
    }
}

fn type_id(index: usize) -> TypeId {
    TypeId(u32::try_from(index).unwrap_or(u32::MAX))
}

fn qualify(namespace: &str, name: &str) -> String {
    if name.contains('.') || namespace.is_empty() {
        name.to_owned()
    } else {
        format!("{namespace}.{name}")
    }
}

fn blank_type(name: String, kind: TypeKind) -> SchemaType {
    SchemaType {
        name,
        kind,
        base: None,
        properties: Vec::new(),
        navigations: Vec::new(),
        key: Vec::new(),
        derived: Vec::new(),
    }
}

fn enum_type(name: &str, desc: &TypeDescription) -> Result<EnumType, SchemaError> {
    let invalid = |detail: String| SchemaError::InvalidEnum {
        type_name: name.to_owned(),
        detail,
    };
    if desc.members.is_empty() {
        return Err(invalid("no members".to_owned()));
    }

    let mut seen = HashSet::new();
    let mut members = Vec::with_capacity(desc.members.len());
    for (i, member) in desc.members.iter().enumerate() {
        if !seen.insert(member.as_str()) {
            return Err(invalid(format!("member '{member}' is declared twice")));
        }
        let ordinal = u32::try_from(i).map_err(|_| invalid("too many members".to_owned()))?;
        let value = if desc.is_flags {
            1_i64
                .checked_shl(ordinal)
                .filter(|v| *v > 0)
                .ok_or_else(|| invalid("flags enum has more than 62 members".to_owned()))?
        } else {
            i64::from(ordinal)
        };
        members.push(EnumMember {
            name: member.clone(),
            value,
        });
    }
    Ok(EnumType {
        members,
        is_flags: desc.is_flags,
    })
}

fn check_cycles(types: &[SchemaType]) -> Result<(), SchemaError> {
    for (index, ty) in types.iter().enumerate() {
        let mut steps = 0;
        let mut cur = ty.base;
        while let Some(base) = cur {
            if base.index() == index || steps > types.len() {
                return Err(SchemaError::InheritanceCycle {
                    type_name: ty.name.clone(),
                });
            }
            steps += 1;
            cur = types[base.index()].base;
        }
    }
    Ok(())
}

fn check_members(schema: &Schema) -> Result<(), SchemaError> {
    for (id, ty) in schema.types().filter(|(_, t)| t.is_structured()) {
        let mut seen = HashSet::new();
        let names = schema
            .properties(id)
            .map(|p| p.name.as_str())
            .chain(schema.navigations(id).map(|n| n.name.as_str()));
        for name in names {
            if !seen.insert(name) {
                return Err(SchemaError::DuplicateProperty {
                    type_name: ty.name.clone(),
                    property: name.to_owned(),
                });
            }
        }

        for key in &ty.key {
            if !schema.properties(id).any(|p| p.name == *key) {
                return Err(SchemaError::UnknownKeyProperty {
                    type_name: ty.name.clone(),
                    property: key.clone(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn builds_from_yaml_description() {
        let yaml = r"
namespace: Sales
types:
  - name: Color
    kind: enum
    members: [Red, Green]
  - name: Address
    kind: complex
    properties:
      - { name: City, type: Edm.String }
  - name: Customer
    kind: entity
    key: [Id]
    properties:
      - { name: Id, type: Edm.Int32, nullable: false }
      - { name: Favorite, type: Color }
      - { name: Address, type: Address }
      - { name: Tags, type: Edm.String, collection: true }
    navigations:
      - { name: Orders, target: Order, multiplicity: many, partner: Customer }
  - name: Order
    kind: entity
    key: [Id]
    properties:
      - { name: Id, type: Edm.Int32, nullable: false }
      - { name: CustomerId, type: Edm.Int32 }
    navigations:
      - name: Customer
        target: Customer
        multiplicity: zero_or_one
        constraints:
          - { property: CustomerId, referenced_property: Id }
";
        let desc: SchemaDescription = serde_saphyr::from_str(yaml).unwrap();
        let schema = desc.build().unwrap();

        let customer = schema.find_type("Customer").unwrap();
        let tags = schema
            .properties(customer)
            .find(|p| p.name == "Tags")
            .unwrap();
        assert!(tags.ty.collection);
        assert!(!tags.nullable);

        let order = schema.find_type("Sales.Order").unwrap();
        let nav = schema.navigations(order).next().unwrap();
        assert!(nav.is_nullable());
        assert_eq!(nav.constraints[0].referenced_property, "Id");

        let color = schema.find_type("Color").unwrap();
        assert_eq!(
            schema.get(color).enum_type().unwrap().parse_value("Green"),
            Some(1)
        );
    }

    #[test]
    fn rejects_unknown_property_type() {
        let err = SchemaBuilder::new("S")
            .with_type(TypeDescription::entity("A").property("X", "Edm.Money"))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            SchemaError::UnknownType {
                name: "Edm.Money".to_owned(),
                referenced_by: "S.A".to_owned()
            }
        );
    }

    #[test]
    fn rejects_duplicate_types() {
        let err = SchemaBuilder::new("S")
            .with_type(TypeDescription::entity("A"))
            .with_type(TypeDescription::complex("S.A"))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateType { name } if name == "S.A"));
    }

    #[test]
    fn rejects_inheritance_cycles() {
        let err = SchemaBuilder::new("S")
            .with_type(TypeDescription::entity("A").base("B"))
            .with_type(TypeDescription::entity("B").base("A"))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::InheritanceCycle { .. }));
    }

    #[test]
    fn rejects_entity_deriving_from_complex() {
        let err = SchemaBuilder::new("S")
            .with_type(TypeDescription::complex("C"))
            .with_type(TypeDescription::entity("E").base("C"))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidBaseType { .. }));
    }

    #[test]
    fn rejects_property_redeclared_in_derived_type() {
        let err = SchemaBuilder::new("S")
            .with_type(TypeDescription::entity("A").property("X", "Edm.Int32"))
            .with_type(
                TypeDescription::entity("B")
                    .base("A")
                    .property("X", "Edm.String"),
            )
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            SchemaError::DuplicateProperty {
                type_name: "S.B".to_owned(),
                property: "X".to_owned()
            }
        );
    }

    #[test]
    fn rejects_navigation_to_complex_type() {
        let err = SchemaBuilder::new("S")
            .with_type(TypeDescription::complex("C"))
            .with_type(TypeDescription::entity("E").navigation("Nav", "C", Multiplicity::One))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidNavigationTarget { .. }));
    }

    #[test]
    fn rejects_missing_key_property() {
        let err = SchemaBuilder::new("S")
            .with_type(TypeDescription::entity("E").key("Id"))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownKeyProperty { .. }));
    }

    #[test]
    fn flags_enum_members_get_bit_values() {
        let schema = SchemaBuilder::new("S")
            .with_type(
                TypeDescription::enumeration("Access")
                    .member("Read")
                    .member("Write")
                    .member("Delete")
                    .flags(),
            )
            .build()
            .unwrap();
        let access = schema.find_type("Access").unwrap();
        let values: Vec<_> = schema
            .get(access)
            .enum_type()
            .unwrap()
            .members
            .iter()
            .map(|m| m.value)
            .collect();
        assert_eq!(values, vec![1, 2, 4]);
    }
}
