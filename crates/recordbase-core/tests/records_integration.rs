//! Integration tests for the record lifecycle.

use std::collections::BTreeSet;
use std::sync::Arc;

use recordbase_core::catalog::{
    AccessRule, FieldDef, FieldType, PermissionDef, ResourceDef, ResourcePermissions, RoleDef,
    MANAGE_RESOURCES,
};
use recordbase_core::query::{
    Accumulation, Accumulator, AggregationDef, Filter, GroupKey, SortOrder, Stage,
};
use recordbase_core::security::{Action, FieldProjector, Subject, User};
use recordbase_core::storage::{ChangeKind, ListOptions, StorageConfig};
use recordbase_core::Database;
use serde_json::{json, Map, Value};

struct TestContext {
    db: Database,
    _dir: tempfile::TempDir,
}

impl TestContext {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(StorageConfig::new(dir.path()).with_flush_every_ms(None)).unwrap();
        let catalog = db.catalog();
        catalog
            .save_permission(PermissionDef::global("manage", MANAGE_RESOURCES))
            .unwrap();
        catalog
            .save_role(RoleDef::new("admin", "Admin").with_permission("manage"))
            .unwrap();
        for role in ["writer", "A", "B", "finance"] {
            catalog.save_role(RoleDef::new(role, role)).unwrap();
        }
        Self { db, _dir: dir }
    }

    fn resource(&self, resource: ResourceDef) -> Arc<ResourceDef> {
        self.db.catalog().save_resource(resource).unwrap()
    }
}

fn obj(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

fn writer() -> User {
    User::new("w").with_role("writer")
}

fn sales_resource() -> ResourceDef {
    ResourceDef::new("Sales")
        .with_id_shape("{year}-{incremental}", 4)
        .with_field(FieldDef::new("a", FieldType::Number))
        .with_field(FieldDef::new("b", FieldType::Number))
        .with_field(FieldDef::new("country", FieldType::Text))
        .with_field(FieldDef::new("amount", FieldType::Number).visible_to(&["writer", "finance"]))
        .with_aggregation(AggregationDef::new(
            "totals",
            vec!["country".into(), "amount".into()],
            vec![
                Stage::Group {
                    group_by: vec![GroupKey::Field("country".into())],
                    add_fields: vec![Accumulation::new("total", Accumulator::Sum, Some("amount"))],
                },
                Stage::Sort {
                    field: "country".into(),
                    order: SortOrder::Asc,
                },
            ],
        ))
        .with_permissions(ResourcePermissions {
            can_see: vec!["writer".into()],
            can_create_records: vec!["writer".into()],
            can_see_records: vec![
                AccessRule::all("writer"),
                AccessRule::when("A", Filter::eq("country", "FR")),
                AccessRule::all("B"),
            ],
            can_update_records: vec![AccessRule::all("writer")],
            can_delete_records: vec![AccessRule::all("writer")],
            ..Default::default()
        })
}

#[test]
fn test_versions_track_every_update() {
    let ctx = TestContext::new();
    let resource = ctx.resource(sales_resource());
    let store = ctx.db.records();

    let record = store
        .create(&resource.id, None, obj(json!({"a": 0})), &writer())
        .unwrap();
    for i in 1..=5 {
        store
            .update(&record.id, obj(json!({"a": i})), &writer())
            .unwrap();
    }

    let record = store.get(&record.id, &writer()).unwrap();
    assert_eq!(record.versions.len(), 5);
    for (i, version) in record.versions.iter().enumerate() {
        assert_eq!(version.data.get("a"), Some(&json!(i)));
    }
    assert_eq!(record.data.get("a"), Some(&json!(5)));
    assert!(record
        .versions
        .windows(2)
        .all(|pair| pair[0].created_at < pair[1].created_at));
}

#[test]
fn test_concurrent_creates_yield_distinct_identifiers() {
    let ctx = TestContext::new();
    let resource = ctx.resource(sales_resource());
    let store = ctx.db.records();
    let user = writer();

    let ids: Vec<String> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| {
                    (0..125)
                        .map(|_| {
                            store
                                .create(&resource.id, None, Map::new(), &user)
                                .unwrap()
                                .incremental_id
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect()
    });

    assert_eq!(ids.len(), 1000);
    let distinct: BTreeSet<&str> = ids.iter().map(String::as_str).collect();
    assert_eq!(distinct.len(), 1000);

    let mut counters: Vec<u32> = ids
        .iter()
        .map(|id| {
            let (_, counter) = id.rsplit_once('-').unwrap();
            assert_eq!(counter.len(), 4);
            counter.parse().unwrap()
        })
        .collect();
    counters.sort_unstable();
    assert_eq!(counters, (1..=1000).collect::<Vec<u32>>());
}

#[test]
fn test_concurrent_updates_keep_every_version() {
    let ctx = TestContext::new();
    let resource = ctx.resource(sales_resource());
    let store = ctx.db.records();
    let record = store
        .create(&resource.id, None, obj(json!({"a": 0})), &writer())
        .unwrap();

    std::thread::scope(|scope| {
        for thread in 0..8 {
            let id = record.id.as_str();
            scope.spawn(move || {
                for i in 0..25 {
                    store
                        .update(id, obj(json!({"a": thread * 100 + i})), &writer())
                        .unwrap();
                }
            });
        }
    });

    let record = store.get(&record.id, &writer()).unwrap();
    assert_eq!(record.versions.len(), 200);
    assert!(record
        .versions
        .windows(2)
        .all(|pair| pair[0].created_at < pair[1].created_at));
    assert!(record.versions[199].created_at < record.modified_at);
}

#[test]
fn test_history_round_trip() {
    let ctx = TestContext::new();
    let resource = ctx.resource(sales_resource());
    let store = ctx.db.records();

    let record = store
        .create(&resource.id, None, obj(json!({"a": 1})), &writer())
        .unwrap();
    store
        .update(&record.id, obj(json!({"a": 1, "b": 2})), &writer())
        .unwrap();
    store
        .update(&record.id, obj(json!({"b": 3})), &writer())
        .unwrap();

    let history = store.history(&record.id, &writer()).unwrap();
    assert_eq!(history.len(), 2);

    let first: Vec<_> = history[0]
        .changes
        .iter()
        .map(|c| (c.kind, c.field.as_str(), c.old.clone(), c.new.clone()))
        .collect();
    assert_eq!(first, vec![(ChangeKind::Add, "b", None, Some(json!(2)))]);

    let second: Vec<_> = history[1]
        .changes
        .iter()
        .map(|c| (c.kind, c.field.as_str(), c.old.clone(), c.new.clone()))
        .collect();
    assert_eq!(
        second,
        vec![
            (ChangeKind::Remove, "a", Some(json!(1)), None),
            (ChangeKind::Modify, "b", Some(json!(2)), Some(json!(3))),
        ]
    );
}

#[test]
fn test_access_rules_or_combine() {
    let ctx = TestContext::new();
    let resource = ctx.resource(sales_resource());
    let store = ctx.db.records();

    for country in ["FR", "US", "DE"] {
        store
            .create(&resource.id, None, obj(json!({"country": country})), &writer())
            .unwrap();
    }

    let only_b = User::new("b").with_role("B");
    let only_a = User::new("a").with_role("A");
    let both = User::new("ab").with_role("A").with_role("B");

    let count = |user: &User| {
        store
            .list(&resource.id, user, ListOptions::default())
            .unwrap()
            .len()
    };
    assert_eq!(count(&only_b), 3);
    assert_eq!(count(&only_a), 1);
    assert_eq!(count(&both), 3);
    assert_eq!(count(&User::new("nobody")), 0);
}

#[test]
fn test_empty_access_condition_grants_every_record() {
    let ctx = TestContext::new();
    let resource: ResourceDef = serde_json::from_value(json!({
        "name": "Open",
        "fields": [{"name": "country", "type": "text"}],
        "permissions": {
            "canCreateRecords": ["writer"],
            "canSeeRecords": [{"role": "B", "access": {}}]
        }
    }))
    .unwrap();
    let resource = ctx.resource(resource);
    let store = ctx.db.records();
    for country in ["FR", "US"] {
        store
            .create(&resource.id, None, obj(json!({"country": country})), &writer())
            .unwrap();
    }

    let viewer = User::new("b").with_role("B");
    assert!(ctx
        .db
        .ability(&resource.id, &viewer)
        .unwrap()
        .can(Action::Read, Subject::Records));
    assert_eq!(
        store
            .list(&resource.id, &viewer, ListOptions::default())
            .unwrap()
            .len(),
        2
    );
}

#[test]
fn test_redaction_hides_field_existence() {
    let ctx = TestContext::new();
    let resource = ctx.resource(sales_resource());
    let store = ctx.db.records();

    let with_amount = store
        .create(&resource.id, None, obj(json!({"country": "FR", "amount": 10})), &writer())
        .unwrap();
    let without_amount = store
        .create(&resource.id, None, obj(json!({"country": "FR"})), &writer())
        .unwrap();

    let viewer = User::new("b").with_role("B");
    let ability = ctx.db.ability(&resource.id, &viewer).unwrap();
    assert!(!ability.can(Action::Read, Subject::Field("amount")));

    let first = store.get(&with_amount.id, &viewer).unwrap();
    let second = store.get(&without_amount.id, &viewer).unwrap();
    assert_eq!(
        serde_json::to_value(&first.data).unwrap(),
        serde_json::to_value(&second.data).unwrap()
    );

    // Projection is idempotent and keeps metadata.
    let again = FieldProjector::project(&first, &ability);
    assert_eq!(again, first);
    assert_eq!(first.id, with_amount.id);
}

#[test]
fn test_aggregation_over_visible_records() {
    let ctx = TestContext::new();
    let resource = ctx.resource(sales_resource());
    let store = ctx.db.records();

    for (country, amount) in [("FR", 10), ("FR", 5), ("US", 7)] {
        store
            .create(
                &resource.id,
                None,
                obj(json!({"country": country, "amount": amount})),
                &writer(),
            )
            .unwrap();
    }

    let totals = store.aggregate(&resource.id, "totals", &writer()).unwrap();
    assert_eq!(
        Value::Array(totals.into_iter().map(Value::Object).collect()),
        json!([{"country": "FR", "total": 15}, {"country": "US", "total": 7}])
    );

    let finance = User::new("f").with_role("finance").with_role("A");
    let totals = store.aggregate(&resource.id, "totals", &finance).unwrap();
    assert_eq!(
        Value::Array(totals.into_iter().map(Value::Object).collect()),
        json!([{"country": "FR", "total": 15}])
    );

    let err = store.aggregate(&resource.id, "missing", &writer()).unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_deleting_resource_cascades_records() {
    let ctx = TestContext::new();
    let resource = ctx.resource(sales_resource());
    let store = ctx.db.records();

    let record = store
        .create(&resource.id, None, obj(json!({"a": 1})), &writer())
        .unwrap();
    ctx.db
        .delete_resource(&resource.id, &User::new("root").with_role("admin"))
        .unwrap();

    assert!(store.get(&record.id, &writer()).unwrap_err().is_not_found());
    assert!(ctx.db.catalog().resource(&resource.id).unwrap_err().is_not_found());

    // A recreated resource starts its counter over.
    let recreated = ctx.resource(sales_resource());
    let first = store
        .create(&recreated.id, None, Map::new(), &writer())
        .unwrap();
    assert!(first.incremental_id.ends_with("-0001"));
}

#[test]
fn test_deleting_role_strips_references() {
    let ctx = TestContext::new();
    let resource = ctx.resource(sales_resource());

    ctx.db.catalog().delete_role("A").unwrap();
    let resource = ctx.db.catalog().resource(&resource.id).unwrap();
    assert!(resource
        .permissions
        .can_see_records
        .iter()
        .all(|rule| rule.role != "A"));
    assert!(!resource.role_references().contains("A"));
}

#[test]
fn test_data_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let record_id = {
        let db = Database::open(StorageConfig::new(dir.path())).unwrap();
        db.catalog().save_role(RoleDef::new("writer", "Writer")).unwrap();
        let resource = db
            .catalog()
            .save_resource(
                ResourceDef::new("Notes")
                    .with_field(FieldDef::new("text", FieldType::Text))
                    .with_permissions(ResourcePermissions {
                        can_create_records: vec!["writer".into()],
                        can_see_records: vec![AccessRule::all("writer")],
                        ..Default::default()
                    }),
            )
            .unwrap();
        let record = db
            .records()
            .create(&resource.id, None, obj(json!({"text": "hello"})), &writer())
            .unwrap();
        db.flush().unwrap();
        record.id
    };

    let db = Database::open(StorageConfig::new(dir.path())).unwrap();
    let record = db.records().get(&record_id, &writer()).unwrap();
    assert_eq!(record.data.get("text"), Some(&json!("hello")));
}
