use std::sync::LazyLock;

use odata_core::schema::{Multiplicity, TypeDescription};
use odata_core::{CancellationToken, ODataLimits, QueryOptions, Schema, SchemaBuilder};

pub static SCHEMA: LazyLock<Option<Schema>> = LazyLock::new(|| {
    SchemaBuilder::new("NS")
        .with_type(
            TypeDescription::enumeration("Access")
                .member("Read")
                .member("Write")
                .flags(),
        )
        .with_type(
            TypeDescription::complex("Address")
                .property("City", "Edm.String")
                .property("Zip", "Edm.String"),
        )
        .with_type(
            TypeDescription::entity("Person")
                .key("Id")
                .required("Id", "Edm.Int32")
                .property("Name", "Edm.String")
                .property("Age", "Edm.Int32")
                .property("Born", "Edm.DateTimeOffset")
                .property("Rights", "Access")
                .property("Address", "Address")
                .collection("Tags", "Edm.String")
                .navigation("Manager", "Person", Multiplicity::ZeroOrOne)
                .navigation("Orders", "Order", Multiplicity::Many),
        )
        .with_type(
            TypeDescription::entity("Employee")
                .base("Person")
                .property("Level", "Edm.Int32"),
        )
        .with_type(
            TypeDescription::entity("Order")
                .key("Id")
                .required("Id", "Edm.Int32")
                .property("Amount", "Edm.Decimal"),
        )
        .build()
        .ok()
});

/// Compiles `options` against the fixed schema; only panics matter.
pub fn compile(options: &QueryOptions) {
    if let Some(schema) = SCHEMA.as_ref() {
        let _ = odata_core::parse_and_bind(
            options,
            schema,
            "Person",
            &ODataLimits::default(),
            &CancellationToken::new(),
        );
    }
}
