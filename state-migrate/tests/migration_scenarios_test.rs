use state_migrate::{AttributeStore, Delta, MigrationError, MigrationRegistry, MigrationRunner};

const RESOURCE: &str = "example_certificate_authority";

fn deletion_window_registry() -> MigrationRegistry {
    let mut registry = MigrationRegistry::new();
    registry
        .register(
            MigrationRegistry::define(RESOURCE)
                .from(0)
                .delta(Delta::new().add_default("permanent_deletion_time_in_days", "30"))
                .into_current(),
        )
        .expect("register failed");
    registry
}

fn two_step_registry() -> MigrationRegistry {
    let mut registry = MigrationRegistry::new();
    registry
        .register(
            MigrationRegistry::define(RESOURCE)
                .from(0)
                .delta(Delta::new().add_default("permanent_deletion_time_in_days", "30"))
                .step(|store| {
                    // v2 folds the tag list into a single comma-separated attribute
                    let tags = store.remove_list("tags")?.unwrap_or_default();
                    store.set("tag_list", tags.join(","));
                    Ok(())
                })
                .into_current(),
        )
        .expect("register failed");
    registry
}

#[test]
fn test_adds_deletion_window_to_v0_state() {
    let registry = deletion_window_registry();
    let runner = MigrationRunner::new(&registry);

    let input = AttributeStore::from_attributes(0, [("name", "acme")]);
    let output = runner.migrate(RESOURCE, input, 0, 1).expect("Migration failed");

    let expected = AttributeStore::from_attributes(
        1,
        [("name", "acme"), ("permanent_deletion_time_in_days", "30")],
    );
    assert_eq!(output, expected);
}

#[test]
fn test_empty_state_is_left_alone() {
    let registry = deletion_window_registry();
    let runner = MigrationRunner::new(&registry);

    let output = runner
        .migrate(RESOURCE, AttributeStore::new(0), 0, 1)
        .expect("Migration failed");

    assert!(output.is_empty());
    assert_eq!(output.version(), 0);
}

#[test]
fn test_empty_state_ignores_versions() {
    let registry = MigrationRegistry::new();
    let runner = MigrationRunner::new(&registry);

    // No steps at all, and the versions could never be bridged.
    let output = runner
        .migrate("anything", AttributeStore::new(5), 5, 1)
        .expect("Migration failed");
    assert_eq!(output, AttributeStore::new(5));
}

#[test]
fn test_unknown_version_fails() {
    let registry = deletion_window_registry();
    let runner = MigrationRunner::new(&registry);

    let input = AttributeStore::from_attributes(5, [("x", "y")]);
    let result = runner.migrate(RESOURCE, input, 5, 1);

    match result {
        Err(MigrationError::UnknownSchemaVersion {
            resource_type,
            version,
            target,
        }) => {
            assert_eq!(resource_type, RESOURCE);
            assert_eq!(version, 5);
            assert_eq!(target, 1);
        }
        other => panic!("expected UnknownSchemaVersion, got {:?}", other),
    }
}

#[test]
fn test_gap_in_chain_fails() {
    let registry = deletion_window_registry();
    let runner = MigrationRunner::new(&registry);

    let input = AttributeStore::from_attributes(0, [("name", "acme")]);
    let result = runner.migrate(RESOURCE, input, 0, 3);

    assert!(matches!(
        result,
        Err(MigrationError::UnknownSchemaVersion {
            version: 1,
            target: 3,
            ..
        })
    ));
}

#[test]
fn test_same_version_without_steps_is_noop() {
    let registry = MigrationRegistry::new();
    let runner = MigrationRunner::new(&registry);

    for version in [0, 1, 7, 42] {
        let input = AttributeStore::from_attributes(version, [("name", "acme")]);
        let output = runner
            .migrate("unregistered", input.clone(), version, version)
            .expect("Migration failed");
        assert_eq!(output, input);
    }
}

#[test]
fn test_chained_migration_applies_steps_in_order() {
    let registry = two_step_registry();
    let runner = MigrationRunner::new(&registry);

    let input = AttributeStore::from_attributes(
        0,
        [
            ("name", "acme"),
            ("tags.#", "2"),
            ("tags.0", "Name"),
            ("tags.1", "Owner"),
        ],
    );
    let output = runner.migrate(RESOURCE, input, 0, 2).expect("Migration failed");

    assert_eq!(output.version(), 2);
    assert_eq!(output.get("name"), Some("acme"));
    assert_eq!(output.get("permanent_deletion_time_in_days"), Some("30"));
    assert_eq!(output.get("tag_list"), Some("Name,Owner"));
    assert!(!output.contains("tags.#"));
    assert_eq!(output.len(), 3);
}

#[test]
fn test_chain_can_start_midway() {
    let registry = two_step_registry();
    let runner = MigrationRunner::new(&registry);

    let input = AttributeStore::from_attributes(1, [("name", "acme")]);
    let output = runner.migrate(RESOURCE, input, 1, 2).expect("Migration failed");

    assert_eq!(output.version(), 2);
    assert_eq!(output.get("tag_list"), Some(""));
    assert!(!output.contains("permanent_deletion_time_in_days"));
}

#[test]
fn test_failing_second_step_discards_first() {
    let registry = two_step_registry();
    let runner = MigrationRunner::new(&registry);

    let mut store = AttributeStore::from_attributes(0, [("name", "acme"), ("tags.#", "3")]);
    let before = store.clone();

    let result = runner.migrate_in_place(RESOURCE, &mut store, 0, 2);

    assert!(matches!(
        result,
        Err(MigrationError::MalformedState { from: 1, to: 2, .. })
    ));
    assert_eq!(store, before);
}

#[test]
fn test_single_steps_preserve_untouched_keys() {
    let registry = two_step_registry();

    let inputs = [
        AttributeStore::from_attributes(0, [("a", "1")]),
        AttributeStore::from_attributes(0, [("a", "1"), ("b", "2"), ("c.d", "3")]),
        AttributeStore::from_attributes(1, [("z", "last"), ("tags.#", "0")]),
    ];

    for input in inputs {
        let step = registry
            .lookup(RESOURCE, input.version())
            .expect("step registered");
        let mut output = input.clone();
        step.apply(&mut output).expect("step failed");

        assert_eq!(output.version(), input.version() + 1);
        for (key, value) in input.iter() {
            if key.starts_with("tags.") {
                continue;
            }
            assert_eq!(output.get(key), Some(value), "key {} changed", key);
        }
    }
}
