#![allow(clippy::unwrap_used, clippy::expect_used)]

use odata_core::{
    CancellationToken, PlanExecutor, QueryEngine, QueryOptions, SchemaDescription,
};
use odata_memory::MemoryExecutor;
use serde_json::{Value as Json, json};

const SCHEMA_YAML: &str = r"
namespace: HR
types:
  - name: Access
    kind: enum
    is_flags: true
    members: [Read, Write, Admin]
  - name: Person
    kind: entity
    key: [Id]
    properties:
      - { name: Id, type: Edm.Int32, nullable: false }
      - { name: Name, type: Edm.String }
      - { name: Salary, type: Edm.Decimal }
      - { name: Hired, type: Edm.Date }
      - { name: Rights, type: Access }
    navigations:
      - { name: Manager, target: Person, multiplicity: zero_or_one }
      - { name: Reports, target: Person, multiplicity: many }
  - name: Engineer
    kind: entity
    base: Person
    properties:
      - { name: Level, type: Edm.Int32 }
";

fn engine() -> QueryEngine {
    let description: SchemaDescription = serde_saphyr::from_str(SCHEMA_YAML).unwrap();
    QueryEngine::new(description.build().unwrap())
}

fn people() -> Vec<Json> {
    vec![
        json!({
            "Id": 1, "Name": "Ada", "Salary": "9000.50", "Hired": "2019-03-01",
            "Rights": "Read,Admin", "Manager": null,
            "Reports": [{"Id": 2, "Name": "Lin"}, {"Id": 3, "Name": "Tove"}],
        }),
        json!({
            "@odata.type": "#HR.Engineer",
            "Id": 2, "Name": "Lin", "Salary": 7000, "Hired": "2021-11-15", "Level": 3,
            "Rights": "Read", "Manager": {"Id": 1, "Name": "Ada"}, "Reports": [],
        }),
        json!({
            "Id": 3, "Name": "Tove", "Salary": null, "Hired": "2023-06-30",
            "Rights": "Read,Write", "Manager": {"Id": 1, "Name": "Ada"}, "Reports": [],
        }),
    ]
}

fn run(query: &str) -> Vec<i64> {
    let options = QueryOptions::parse_query(query).unwrap();
    let plan = engine()
        .parse_and_bind(&options, "Person", &CancellationToken::new())
        .unwrap();
    MemoryExecutor
        .execute(&plan, &people())
        .unwrap()
        .items
        .iter()
        .map(|row| row["Id"].as_i64().unwrap())
        .collect()
}

#[test]
fn navigation_through_null_is_not_an_error() {
    assert_eq!(run("$filter=Manager/Name eq 'Ada'"), vec![2, 3]);
    assert_eq!(run("$filter=Manager/Name eq 'Bob'"), Vec::<i64>::new());
    assert_eq!(run("$filter=Manager eq null"), vec![1]);
}

#[test]
fn unknown_salary_is_filtered_out_both_ways() {
    assert_eq!(run("$filter=Salary gt 8000"), vec![1]);
    assert_eq!(run("$filter=not (Salary gt 8000)"), vec![2]);
    assert_eq!(run("$filter=Salary gt 8000 or Id eq 3"), vec![1, 3]);
}

#[test]
fn derived_members_need_a_cast() {
    assert_eq!(run("$filter=cast(HR.Engineer)/Level ge 3"), vec![2]);
    assert_eq!(run("$filter=isof(HR.Engineer)"), vec![2]);
}

#[test]
fn flags_enum_has() {
    assert_eq!(run("$filter=Rights has HR.Access'Admin'"), vec![1]);
    assert_eq!(run("$filter=Rights has HR.Access'Read'"), vec![1, 2, 3]);
}

#[test]
fn dates_and_functions() {
    assert_eq!(run("$filter=year(Hired) ge 2021&$orderby=Hired desc"), vec![3, 2]);
    assert_eq!(run("$filter=contains(Name, 'o') or endswith(Name, 'a')"), vec![1, 3]);
}

#[test]
fn ordering_and_paging() {
    assert_eq!(run("$orderby=Salary desc,Id"), vec![1, 2, 3]);
    assert_eq!(run("$orderby=Name&$skip=1&$top=5"), vec![2, 3]);
}

#[test]
fn expand_and_count() {
    let options = QueryOptions::parse_query(
        "$select=Name&$expand=Manager($select=Name),Reports($orderby=Id desc;$top=1;$count=true)&$count=true&$filter=Id le 2",
    )
    .unwrap();
    let plan = engine()
        .parse_and_bind(&options, "Person", &CancellationToken::new())
        .unwrap();
    let result = MemoryExecutor.execute(&plan, &people()).unwrap();

    assert_eq!(result.count, Some(2));
    assert_eq!(
        result.items,
        vec![
            json!({
                "Name": "Ada",
                "Manager": null,
                "Reports": [{"Id": 3, "Name": "Tove"}],
                "Reports@odata.count": 2,
            }),
            json!({
                "@odata.type": "#HR.Engineer",
                "Name": "Lin",
                "Manager": {"Name": "Ada"},
                "Reports": [],
                "Reports@odata.count": 0,
            }),
        ]
    );
}

#[test]
fn result_serializes_with_count() {
    let options = QueryOptions::parse_query("$select=Id&$top=1&$count=true").unwrap();
    let plan = engine()
        .parse_and_bind(&options, "Person", &CancellationToken::new())
        .unwrap();
    let result = MemoryExecutor.execute(&plan, &people()).unwrap();
    assert_eq!(
        serde_json::to_value(&result).unwrap(),
        json!({"items": [{"Id": 1}], "count": 3})
    );
}
