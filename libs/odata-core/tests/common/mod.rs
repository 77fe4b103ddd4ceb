#![allow(dead_code)]

use odata_core::{Schema, SchemaDescription};

pub const SCHEMA_YAML: &str = r"
namespace: NS
types:
  - name: Address
    kind: complex
    properties:
      - { name: City, type: Edm.String }
      - { name: Zip, type: Edm.String }
  - name: Person
    kind: entity
    key: [Id]
    properties:
      - { name: Id, type: Edm.Int32, nullable: false }
      - { name: Name, type: Edm.String }
      - { name: Age, type: Edm.Int32 }
      - { name: Address, type: Address }
    navigations:
      - { name: Manager, target: Person, multiplicity: zero_or_one }
      - { name: Orders, target: Order, multiplicity: many }
  - name: Employee
    kind: entity
    base: Person
    properties:
      - { name: OnlyOnDerived, type: Edm.Int32 }
  - name: Robot
    kind: entity
    key: [Serial]
    properties:
      - { name: Serial, type: Edm.String, nullable: false }
  - name: Order
    kind: entity
    key: [Id]
    properties:
      - { name: Id, type: Edm.Int32, nullable: false }
      - { name: Amount, type: Edm.Decimal }
";

pub fn description() -> SchemaDescription {
    serde_saphyr::from_str(SCHEMA_YAML).unwrap()
}

pub fn schema() -> Schema {
    description().build().unwrap()
}

/// Same schema without `Person/Age`.
pub fn schema_without_age() -> Schema {
    let mut description = description();
    for ty in &mut description.types {
        ty.properties.retain(|p| p.name != "Age");
    }
    description.build().unwrap()
}
