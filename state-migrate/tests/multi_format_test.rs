use state_migrate::{Delta, MigrationRegistry, MigrationRunner, PersistedRecord};

fn setup_registry() -> MigrationRegistry {
    let mut registry = MigrationRegistry::new();
    registry
        .register(
            MigrationRegistry::define("example_certificate_authority")
                .from(0)
                .delta(Delta::new().add_default("permanent_deletion_time_in_days", "30"))
                .into_current(),
        )
        .expect("register failed");
    registry
}

#[test]
fn test_load_record_from_toml() {
    let registry = setup_registry();
    let runner = MigrationRunner::new(&registry);

    let toml_str = r#"
resource_type = "example_certificate_authority"
schema_version = 0

[attributes]
name = "acme"
"tags.#" = "1"
"tags.0" = "Name"
"#;
    let toml_value: toml::Value = toml::from_str(toml_str).expect("Failed to parse TOML");
    let record = runner.load_record_from(toml_value).expect("Migration failed");

    assert_eq!(record.schema_version, 1);
    assert_eq!(record.attributes["name"], "acme");
    assert_eq!(record.attributes["tags.0"], "Name");
    assert_eq!(record.attributes["permanent_deletion_time_in_days"], "30");
}

#[test]
fn test_load_record_from_yaml() {
    let registry = setup_registry();
    let runner = MigrationRunner::new(&registry);

    let yaml_str = r#"
resource_type: example_certificate_authority
schema_version: 0
attributes:
  name: acme
  permanent_deletion_time_in_days: "7"
"#;
    let yaml_value: serde_yaml::Value = serde_yaml::from_str(yaml_str).expect("Failed to parse YAML");
    let record = runner.load_record_from(yaml_value).expect("Migration failed");

    assert_eq!(record.schema_version, 1);
    assert_eq!(record.attributes["permanent_deletion_time_in_days"], "7");
}

#[test]
fn test_load_record_from_struct() {
    let registry = setup_registry();
    let runner = MigrationRunner::new(&registry);

    let record = PersistedRecord::new(
        "example_certificate_authority",
        1,
        [("name".to_string(), "acme".to_string())].into_iter().collect(),
    );
    let loaded = runner.load_record_from(&record).expect("Load failed");
    assert_eq!(loaded, record);
}

#[test]
fn test_save_then_load_migrates_old_record() {
    let registry = setup_registry();
    let runner = MigrationRunner::new(&registry);

    let old = PersistedRecord::new(
        "example_certificate_authority",
        0,
        [("name".to_string(), "acme".to_string())].into_iter().collect(),
    );
    let json = runner.save_record(&old).expect("Save failed");
    let loaded = runner.load_record(&json).expect("Load failed");

    assert_eq!(loaded.schema_version, 1);
    assert_eq!(loaded.attributes.len(), 2);
}

#[test]
fn test_load_record_with_unknown_type_fails() {
    let registry = setup_registry();
    let runner = MigrationRunner::new(&registry);

    let json = r#"{"resource_type":"example_other","schema_version":0,"attributes":{"a":"b"}}"#;
    let err = runner.load_record(json).unwrap_err();
    assert!(err.to_string().contains("example_other"));
}
