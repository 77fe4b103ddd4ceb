//! Read-only entity data model the binder resolves names against.
//!
//! A [`Schema`] is an arena of [`SchemaType`]s addressed by [`TypeId`].
//! The `Edm.*` primitive types are registered first in every schema so
//! primitive lookups never fail. Schemas are built and validated once by
//! [`SchemaBuilder`] (or from a serde [`SchemaDescription`]) and are
//! immutable afterwards; [`SchemaRegistry`] publishes new versions.

mod builder;
mod registry;

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use builder::{
    NavigationDescription, PropertyDescription, SchemaBuilder, SchemaDescription, SchemaError,
    TypeDescription, TypeKindDescription,
};
pub use registry::{PublishedSchema, SchemaRegistry, SchemaVersion};

/// Index of a type inside one [`Schema`]. Not meaningful across schemas.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u32);

impl TypeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Built-in `Edm` primitive types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveKind {
    Boolean,
    Byte,
    Int16,
    Int32,
    Int64,
    Decimal,
    Single,
    Double,
    String,
    Guid,
    Date,
    TimeOfDay,
    DateTimeOffset,
    Duration,
}

impl PrimitiveKind {
    pub const ALL: [PrimitiveKind; 14] = [
        PrimitiveKind::Boolean,
        PrimitiveKind::Byte,
        PrimitiveKind::Int16,
        PrimitiveKind::Int32,
        PrimitiveKind::Int64,
        PrimitiveKind::Decimal,
        PrimitiveKind::Single,
        PrimitiveKind::Double,
        PrimitiveKind::String,
        PrimitiveKind::Guid,
        PrimitiveKind::Date,
        PrimitiveKind::TimeOfDay,
        PrimitiveKind::DateTimeOffset,
        PrimitiveKind::Duration,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            PrimitiveKind::Boolean => "Edm.Boolean",
            PrimitiveKind::Byte => "Edm.Byte",
            PrimitiveKind::Int16 => "Edm.Int16",
            PrimitiveKind::Int32 => "Edm.Int32",
            PrimitiveKind::Int64 => "Edm.Int64",
            PrimitiveKind::Decimal => "Edm.Decimal",
            PrimitiveKind::Single => "Edm.Single",
            PrimitiveKind::Double => "Edm.Double",
            PrimitiveKind::String => "Edm.String",
            PrimitiveKind::Guid => "Edm.Guid",
            PrimitiveKind::Date => "Edm.Date",
            PrimitiveKind::TimeOfDay => "Edm.TimeOfDay",
            PrimitiveKind::DateTimeOffset => "Edm.DateTimeOffset",
            PrimitiveKind::Duration => "Edm.Duration",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    #[must_use]
    pub fn is_integral(self) -> bool {
        matches!(
            self,
            PrimitiveKind::Byte | PrimitiveKind::Int16 | PrimitiveKind::Int32 | PrimitiveKind::Int64
        )
    }

    #[must_use]
    pub fn is_numeric(self) -> bool {
        self.is_integral()
            || matches!(
                self,
                PrimitiveKind::Decimal | PrimitiveKind::Single | PrimitiveKind::Double
            )
    }

    /// Position in the widening order `Byte < Int16 < Int32 < Int64 < Decimal
    /// < Single < Double`; `None` for non-numeric kinds.
    #[must_use]
    pub fn numeric_rank(self) -> Option<u8> {
        Some(match self {
            PrimitiveKind::Byte => 0,
            PrimitiveKind::Int16 => 1,
            PrimitiveKind::Int32 => 2,
            PrimitiveKind::Int64 => 3,
            PrimitiveKind::Decimal => 4,
            PrimitiveKind::Single => 5,
            PrimitiveKind::Double => 6,
            _ => return None,
        })
    }

    fn id(self) -> TypeId {
        let pos = Self::ALL.iter().position(|k| *k == self).unwrap_or_default();
        TypeId(u32::try_from(pos).unwrap_or_default())
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Enum type members; flags enums allow `has` and comma-combined values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnumType {
    pub members: Vec<EnumMember>,
    pub is_flags: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnumMember {
    pub name: String,
    pub value: i64,
}

impl EnumType {
    #[must_use]
    pub fn member(&self, name: &str) -> Option<&EnumMember> {
        self.members.iter().find(|m| m.name == name)
    }

    /// Resolves `Red` or, for flags enums, `Red,Blue` to a numeric value.
    #[must_use]
    pub fn parse_value(&self, text: &str) -> Option<i64> {
        if !self.is_flags {
            return self.member(text.trim()).map(|m| m.value);
        }
        text.split(',')
            .map(|part| self.member(part.trim()).map(|m| m.value))
            .try_fold(0_i64, |acc, v| v.map(|v| acc | v))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeKind {
    Primitive(PrimitiveKind),
    Complex,
    Entity,
    Enum(EnumType),
}

/// Property type: a schema type, possibly as a collection of it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TypeRef {
    pub id: TypeId,
    pub collection: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructuralProperty {
    pub name: String,
    pub ty: TypeRef,
    pub nullable: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Multiplicity {
    One,
    ZeroOrOne,
    Many,
}

/// `property` on the declaring type references `referenced_property` on the target.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferentialConstraint {
    pub property: String,
    pub referenced_property: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NavigationProperty {
    pub name: String,
    pub target: TypeId,
    pub multiplicity: Multiplicity,
    pub partner: Option<String>,
    pub constraints: Vec<ReferentialConstraint>,
}

impl NavigationProperty {
    #[must_use]
    pub fn is_collection(&self) -> bool {
        self.multiplicity == Multiplicity::Many
    }

    /// Single-valued navigation that may be absent.
    #[must_use]
    pub fn is_nullable(&self) -> bool {
        self.multiplicity == Multiplicity::ZeroOrOne
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaType {
    pub name: String,
    pub kind: TypeKind,
    pub base: Option<TypeId>,
    /// Declared on this type only; inherited members live on the base.
    pub properties: Vec<StructuralProperty>,
    pub navigations: Vec<NavigationProperty>,
    pub key: Vec<String>,
    /// Transitive set of types deriving from this one.
    derived: Vec<TypeId>,
}

impl SchemaType {
    #[must_use]
    pub fn is_structured(&self) -> bool {
        matches!(self.kind, TypeKind::Complex | TypeKind::Entity)
    }

    #[must_use]
    pub fn is_entity(&self) -> bool {
        self.kind == TypeKind::Entity
    }

    #[must_use]
    pub fn primitive(&self) -> Option<PrimitiveKind> {
        match self.kind {
            TypeKind::Primitive(p) => Some(p),
            _ => None,
        }
    }

    #[must_use]
    pub fn enum_type(&self) -> Option<&EnumType> {
        match &self.kind {
            TypeKind::Enum(e) => Some(e),
            _ => None,
        }
    }

    #[must_use]
    pub fn derived(&self) -> &[TypeId] {
        &self.derived
    }
}

/// A member resolved on a structured type (including inherited members).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Member<'a> {
    Structural(&'a StructuralProperty),
    Navigation(&'a NavigationProperty),
}

impl Member<'_> {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Member::Structural(p) => &p.name,
            Member::Navigation(n) => &n.name,
        }
    }
}

/// Validated, immutable schema graph.
#[derive(Clone, Debug)]
pub struct Schema {
    namespace: String,
    types: Vec<SchemaType>,
    by_name: HashMap<String, TypeId>,
}

impl Schema {
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Type by id. Ids are only handed out by this schema.
    #[must_use]
    pub fn get(&self, id: TypeId) -> &SchemaType {
        &self.types[id.index()]
    }

    #[must_use]
    pub fn type_name(&self, id: TypeId) -> &str {
        &self.get(id).name
    }

    #[must_use]
    pub fn primitive(&self, kind: PrimitiveKind) -> TypeId {
        kind.id()
    }

    /// Looks up `Namespace.Name`, `Edm.*`, or a bare name in the schema's own
    /// namespace.
    #[must_use]
    pub fn find_type(&self, name: &str) -> Option<TypeId> {
        if let Some(id) = self.by_name.get(name) {
            return Some(*id);
        }
        if name.contains('.') {
            return None;
        }
        self.by_name
            .get(&format!("{}.{name}", self.namespace))
            .copied()
    }

    pub fn types(&self) -> impl Iterator<Item = (TypeId, &SchemaType)> {
        self.types
            .iter()
            .enumerate()
            .map(|(i, t)| (TypeId(u32::try_from(i).unwrap_or(u32::MAX)), t))
    }

    pub fn entity_types(&self) -> impl Iterator<Item = (TypeId, &SchemaType)> {
        self.types().filter(|(_, t)| t.is_entity())
    }

    /// `true` when `derived` equals `base` or inherits from it.
    #[must_use]
    pub fn is_same_or_derived(&self, derived: TypeId, base: TypeId) -> bool {
        derived == base || self.get(base).derived.contains(&derived)
    }

    /// Base-first chain ending with `id` itself.
    #[must_use]
    pub fn ancestry(&self, id: TypeId) -> Vec<TypeId> {
        let mut chain = vec![id];
        let mut cur = self.get(id).base;
        while let Some(base) = cur {
            chain.push(base);
            cur = self.get(base).base;
        }
        chain.reverse();
        chain
    }

    /// Structural properties including inherited ones, base first.
    pub fn properties(&self, id: TypeId) -> impl Iterator<Item = &StructuralProperty> {
        self.ancestry(id)
            .into_iter()
            .flat_map(move |t| self.get(t).properties.iter())
    }

    /// Navigation properties including inherited ones, base first.
    pub fn navigations(&self, id: TypeId) -> impl Iterator<Item = &NavigationProperty> {
        self.ancestry(id)
            .into_iter()
            .flat_map(move |t| self.get(t).navigations.iter())
    }

    /// Resolves a member name on a structured type, walking the base chain.
    #[must_use]
    pub fn find_member(&self, id: TypeId, name: &str, case_insensitive: bool) -> Option<Member<'_>> {
        let matches = |candidate: &str| {
            if case_insensitive {
                candidate.eq_ignore_ascii_case(name)
            } else {
                candidate == name
            }
        };
        // Exact matches win over case-insensitive ones.
        let exact = self
            .properties(id)
            .find(|p| p.name == name)
            .map(Member::Structural)
            .or_else(|| {
                self.navigations(id)
                    .find(|n| n.name == name)
                    .map(Member::Navigation)
            });
        if exact.is_some() || !case_insensitive {
            return exact;
        }
        self.properties(id)
            .find(|p| matches(&p.name))
            .map(Member::Structural)
            .or_else(|| {
                self.navigations(id)
                    .find(|n| matches(&n.name))
                    .map(Member::Navigation)
            })
    }
}
