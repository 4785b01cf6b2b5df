//! Integration tests for the migration engine.

use quikdb_core::catalog::{EntityDef, FieldDef, FieldType, SchemaBundle};
use quikdb_core::migration::{
    preference_fn, transform_fn, ConsistencyChecker, CrossEntitySnapshot, MigrationConfig,
    MigrationError, MigrationJournal, MigrationRunner, MigrationStep, PreferenceEdits,
    RunStatus, RunnerPhase, SchemaRegistry, TransformConfig, TransformContext, TransformOutput,
};
use quikdb_core::storage::{Key, Record, Store, StoreConfig, Value};
use std::collections::BTreeMap;

struct TestContext {
    store: Store,
    _dir: tempfile::TempDir,
}

impl TestContext {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(StoreConfig::new(dir.path())).unwrap();
        Self { store, _dir: dir }
    }

    fn reopen(self) -> Self {
        self.store.flush().unwrap();
        self.reopen_unflushed()
    }

    fn reopen_unflushed(self) -> Self {
        let TestContext { store, _dir } = self;
        drop(store);
        let store = Store::open(StoreConfig::new(_dir.path())).unwrap();
        Self { store, _dir }
    }

    fn contents(&self) -> BTreeMap<String, Vec<Record>> {
        self.store
            .stored_entities()
            .unwrap()
            .into_iter()
            .map(|entity| {
                let records = self.store.records_of(&entity).unwrap();
                (entity, records)
            })
            .collect()
    }

    fn seed(&self, registry: &SchemaRegistry, version: u64) {
        MigrationRunner::new(&self.store, registry).stamp(version).unwrap();
    }
}

fn baseline() -> SchemaBundle {
    SchemaBundle::new(0)
        .with_entity(
            EntityDef::new("Conversation")
                .with_field(FieldDef::primary("id", FieldType::Int))
                .with_field(FieldDef::list("recipients", FieldType::reference_list("Recipient")))
                .with_field(FieldDef::new("date", FieldType::Int).with_default(0)),
        )
        .with_entity(
            EntityDef::new("Recipient")
                .with_field(FieldDef::primary("id", FieldType::Int))
                .with_field(FieldDef::new("address", FieldType::String)),
        )
        .with_entity(
            EntityDef::new("Message")
                .with_field(FieldDef::primary("id", FieldType::Int))
                .with_field(FieldDef::new("threadId", FieldType::Int).with_index())
                .with_field(FieldDef::new("date", FieldType::Int))
                .with_field(FieldDef::new("body", FieldType::String)),
        )
        .with_entity(
            EntityDef::new("PhoneNumber")
                .with_field(FieldDef::new("address", FieldType::String)),
        )
}

fn steps() -> Vec<MigrationStep> {
    vec![
        MigrationStep::new(0, "blocked numbers").create_table(
            EntityDef::new("BlockedNumber")
                .with_field(FieldDef::primary("id", FieldType::Int))
                .with_field(FieldDef::new("address", FieldType::String)),
        ),
        MigrationStep::new(1, "last message")
            .add_reference("Conversation", "lastMessage", "Message")
            .remove_field("Conversation", "date")
            .transform(
                "Conversation",
                transform_fn(|mut conversation: Record, cx: &TransformContext<'_>| {
                    let id = conversation.get_int("id");
                    let latest = cx.snapshot().max_by_key(
                        "Message",
                        |m| m.get_int("threadId") == id,
                        |m| m.get_int("date"),
                    );
                    conversation.set("lastMessage", latest.map(|m| m.key.clone()));
                    Ok(conversation)
                }),
            ),
        MigrationStep::new(2, "keyed phone numbers")
            .clear_table("PhoneNumber")
            .add_field("PhoneNumber", FieldDef::primary("id", FieldType::Int))
            .add_field(
                "Recipient",
                FieldDef::list("numbers", FieldType::reference_list("PhoneNumber")),
            )
            .transform(
                "Recipient",
                transform_fn(|mut recipient: Record, _cx: &TransformContext<'_>| {
                    let id = recipient.get_int("id").unwrap_or(0);
                    let address = recipient.get_str("address").unwrap_or("").to_string();
                    let number = Record::keyed("id", id * 100).with("address", address);
                    recipient.set("numbers", vec![number.key.clone()]);
                    Ok(TransformOutput::new(recipient).emit("PhoneNumber", number))
                }),
            )
            .rewrite_preferences(preference_fn(
                |snapshot: &CrossEntitySnapshot, prefs: &mut PreferenceEdits<'_>| {
                    for conversation in snapshot.records("Conversation") {
                        let id = conversation.key.to_string();
                        let legacy = format!("theme_{}", id);
                        if let Some(theme) = prefs.get_int(&legacy) {
                            for recipient in conversation.get_refs("recipients") {
                                prefs.set(format!("theme_{}", recipient), theme);
                            }
                            prefs.delete(legacy);
                        }
                    }
                    Ok(())
                },
            )),
        MigrationStep::new(3, "sync marker")
            .create_table(
                EntityDef::new("SyncNeeded")
                    .with_field(FieldDef::new("createdAt", FieldType::Int).with_default(0)),
            )
            .insert("SyncNeeded", Record::keyless().with("createdAt", 0)),
    ]
}

fn registry() -> SchemaRegistry {
    SchemaRegistry::build(baseline(), steps()).unwrap()
}

fn populate_v0(store: &Store) {
    for id in 1..=3 {
        store
            .insert(
                "Recipient",
                Record::keyed("id", id).with("address", format!("555010{}", id)),
            )
            .unwrap();
    }
    store
        .insert(
            "Conversation",
            Record::keyed("id", 10)
                .with("recipients", vec![Key::Int(1), Key::Int(2)])
                .with("date", 99),
        )
        .unwrap();
    store
        .insert(
            "Conversation",
            Record::keyed("id", 11).with("recipients", vec![Key::Int(3)]),
        )
        .unwrap();
    for (id, thread, date) in [(100, 10, 5), (101, 10, 9), (102, 10, 7)] {
        store
            .insert(
                "Message",
                Record::keyed("id", id)
                    .with("threadId", thread)
                    .with("date", date)
                    .with("body", "hi"),
            )
            .unwrap();
    }
    store.insert("PhoneNumber", Record::keyless().with("address", "stale")).unwrap();
    store.set_preference("theme_10", &Value::Int(0x2196f3)).unwrap();
}

#[test]
fn test_full_migration() {
    let ctx = TestContext::new();
    let registry = registry();
    ctx.seed(&registry, 0);
    populate_v0(&ctx.store);

    let report = MigrationRunner::new(&ctx.store, &registry).run().unwrap();
    assert_eq!(report.from_version, 0);
    assert_eq!(report.to_version, 4);
    assert_eq!(report.steps.len(), 4);

    let store = &ctx.store;
    assert_eq!(store.stamped_version().unwrap(), Some(4));
    assert_eq!(store.count("BlockedNumber").unwrap(), 0);

    // Latest message of thread 10 by date; thread 11 has none.
    let c10 = store.get("Conversation", &Key::Int(10)).unwrap().unwrap();
    assert_eq!(c10.get("lastMessage"), Some(&Value::Ref(Key::Int(101))));
    assert!(!c10.has("date"));
    let c11 = store.get("Conversation", &Key::Int(11)).unwrap().unwrap();
    assert_eq!(c11.get("lastMessage"), Some(&Value::Null));

    // Stale key-less phone numbers are replaced by keyed ones.
    let numbers = store.records_of("PhoneNumber").unwrap();
    assert_eq!(numbers.len(), 3);
    assert!(numbers.iter().all(|n| matches!(n.key, Key::Int(_))));
    let r2 = store.get("Recipient", &Key::Int(2)).unwrap().unwrap();
    assert_eq!(r2.get_refs("numbers"), &[Key::Int(200)]);

    // Theme moved from the conversation to each of its recipients.
    assert_eq!(store.preference("theme_10").unwrap(), None);
    assert_eq!(store.preference("theme_1").unwrap(), Some(Value::Int(0x2196f3)));
    assert_eq!(store.preference("theme_2").unwrap(), Some(Value::Int(0x2196f3)));
    assert_eq!(store.preference("theme_3").unwrap(), None);

    // One marker row inserted.
    assert_eq!(store.count("SyncNeeded").unwrap(), 1);
    assert_eq!(report.steps[3].records_added, 1);

    ConsistencyChecker::new().check(store, &registry).unwrap();
    store.ensure_ready(4).unwrap();
}

#[test]
fn test_rerun_is_noop() {
    let ctx = TestContext::new();
    let registry = registry();
    ctx.seed(&registry, 0);
    populate_v0(&ctx.store);
    MigrationRunner::new(&ctx.store, &registry).run().unwrap();

    let before = ctx.contents();
    let prefs_before = ctx.store.preferences().unwrap();

    let ctx = ctx.reopen();
    let runner = MigrationRunner::new(&ctx.store, &registry);
    let report = runner.run().unwrap();

    assert!(report.is_noop());
    assert_eq!(runner.phase(), RunnerPhase::Done);
    assert_eq!(ctx.store.stamped_version().unwrap(), Some(4));
    assert_eq!(ctx.contents(), before);
    assert_eq!(ctx.store.preferences().unwrap(), prefs_before);
    assert_eq!(ctx.store.count("SyncNeeded").unwrap(), 1);
}

#[test]
fn test_completed_run_is_durable() {
    let ctx = TestContext::new();
    let registry = registry();
    ctx.seed(&registry, 0);
    populate_v0(&ctx.store);
    MigrationRunner::new(&ctx.store, &registry).run().unwrap();
    let migrated = ctx.contents();

    let ctx = ctx.reopen_unflushed();
    assert_eq!(ctx.store.stamped_version().unwrap(), Some(4));
    assert_eq!(ctx.contents(), migrated);
    ctx.store.ensure_ready(4).unwrap();
}

#[test]
fn test_partial_history_resumes_from_stamp() {
    let ctx = TestContext::new();
    let registry = registry();
    ctx.seed(&registry, 2);
    ctx.store
        .insert("Recipient", Record::keyed("id", 4).with("address", "5550104"))
        .unwrap();

    let report = MigrationRunner::new(&ctx.store, &registry).run().unwrap();
    assert_eq!(report.from_version, 2);
    let versions: Vec<u64> = report.steps.iter().map(|s| s.source_version).collect();
    assert_eq!(versions, vec![2, 3]);
    assert_eq!(ctx.store.count("PhoneNumber").unwrap(), 1);
}

#[test]
fn test_version_never_decreases() {
    let ctx = TestContext::new();
    let registry = registry();
    ctx.seed(&registry, 1);
    populate_conversations_only(&ctx.store);

    let before = ctx.store.stamped_version().unwrap().unwrap();
    MigrationRunner::new(&ctx.store, &registry).run().unwrap();
    let after = ctx.store.stamped_version().unwrap().unwrap();
    assert!(after >= before);

    // An older engine must refuse rather than roll back.
    let older = SchemaRegistry::build(baseline(), steps().into_iter().take(2)).unwrap();
    let err = MigrationRunner::new(&ctx.store, &older).run().unwrap_err();
    assert!(matches!(err, MigrationError::StoreAhead { stamped: 4, target: 2 }));
    assert_eq!(ctx.store.stamped_version().unwrap(), Some(4));
}

fn populate_conversations_only(store: &Store) {
    store
        .insert(
            "Conversation",
            Record::keyed("id", 1).with("recipients", Vec::<Key>::new()),
        )
        .unwrap();
}

#[test]
fn test_out_of_order_steps_are_rejected() {
    // Steps for 4 and 5 exist, but nothing takes a store from 3 to 4.
    let baseline = SchemaBundle {
        version: 3,
        ..baseline()
    };
    let steps = vec![
        MigrationStep::new(5, "second")
            .add_field("Message", FieldDef::new("seen", FieldType::Bool).with_default(false)),
        MigrationStep::new(4, "first")
            .add_field("Message", FieldDef::new("read", FieldType::Bool).with_default(false)),
    ];
    let registry = SchemaRegistry::build(baseline, steps).unwrap();
    assert_eq!(registry.current_version(), 6);
    assert_eq!(registry.baseline_version(), 3);

    let ctx = TestContext::new();
    ctx.seed(&registry, 3);
    ctx.store
        .insert(
            "Message",
            Record::keyed("id", 1).with("threadId", 1).with("date", 1).with("body", "x"),
        )
        .unwrap();

    let runner = MigrationRunner::new(&ctx.store, &registry);
    let err = runner.run().unwrap_err();
    assert!(matches!(err, MigrationError::MissingStep(3)));
    assert_eq!(runner.phase(), RunnerPhase::Failed);
    assert_eq!(ctx.store.stamped_version().unwrap(), Some(3));

    let message = ctx.store.get("Message", &Key::Int(1)).unwrap().unwrap();
    assert!(!message.has("read"));
    assert!(!message.has("seen"));

    let journal = MigrationJournal::load(&ctx.store).unwrap().unwrap();
    assert_eq!(journal.status, RunStatus::Failed);
    assert_eq!(journal.completed_steps(), 0);
}

#[test]
fn test_duplicate_version_fails_before_any_store() {
    let mut steps = steps();
    steps.push(MigrationStep::new(2, "second step for version 2"));
    let err = SchemaRegistry::build(baseline(), steps).unwrap_err();
    assert!(matches!(err, MigrationError::DuplicateVersion(2)));
    assert!(err.is_build_error());
}

#[test]
fn test_parallel_transform_matches_sequential() {
    let registry = registry();

    let run_with = |transform: TransformConfig| {
        let ctx = TestContext::new();
        ctx.seed(&registry, 1);
        for id in 0..500 {
            ctx.store
                .insert(
                    "Message",
                    Record::keyed("id", id)
                        .with("threadId", id % 37)
                        .with("date", (id * 7919) % 1000)
                        .with("body", "x"),
                )
                .unwrap();
        }
        for id in 0..40 {
            ctx.store
                .insert(
                    "Conversation",
                    Record::keyed("id", id).with("recipients", Vec::<Key>::new()),
                )
                .unwrap();
        }
        let config = MigrationConfig {
            transform,
            ..MigrationConfig::default()
        };
        MigrationRunner::with_config(&ctx.store, &registry, config)
            .run()
            .unwrap();
        ctx.store.records_of("Conversation").unwrap()
    };

    let sequential = run_with(TransformConfig::sequential());
    let parallel = run_with(
        TransformConfig::default()
            .with_workers(4)
            .with_parallel_threshold(1),
    );
    assert_eq!(sequential.len(), 40);
    assert_eq!(sequential, parallel);
}

#[test]
fn test_failure_leaves_last_committed_version() {
    let mut steps = steps();
    steps.push(
        MigrationStep::new(4, "broken").transform(
            "Recipient",
            transform_fn(|record: Record, cx: &TransformContext<'_>| {
                if record.get_int("id") == Some(2) {
                    Err(MigrationError::transform(cx.entity(), "cannot derive value"))
                } else {
                    Ok(record)
                }
            }),
        ),
    );
    let registry = SchemaRegistry::build(baseline(), steps).unwrap();

    let ctx = TestContext::new();
    ctx.seed(&registry, 0);
    populate_v0(&ctx.store);

    let err = MigrationRunner::new(&ctx.store, &registry).run().unwrap_err();
    assert!(matches!(err, MigrationError::Transform { .. }));
    assert_eq!(ctx.store.stamped_version().unwrap(), Some(4));

    let ctx = ctx.reopen();
    let journal = MigrationJournal::load(&ctx.store).unwrap().unwrap();
    assert!(journal.is_failed());
    assert_eq!(journal.completed_steps(), 4);
    assert!(matches!(
        ctx.store.ensure_ready(5),
        Err(MigrationError::Blocked { .. })
    ));
}
