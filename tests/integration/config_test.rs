//! Config Integration Tests
//!
//! Config files on disk feeding a runner.

use std::fs;

use insight_cascade::{ConfigService, DrilldownRunner, SettingsUpdate};
use tempfile::TempDir;

#[test]
fn test_open_writes_defaults_in_nested_dir() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let service = ConfigService::open(&path).unwrap();

    assert!(path.exists());
    assert!(service.is_healthy());
    let content = fs::read_to_string(&path).unwrap();
    assert!(content.contains("[pipeline]"));
    assert_eq!(service.get_config().pipeline.max_repair_cycles, 8);
}

#[test]
fn test_partial_toml_keeps_defaults_for_missing_sections() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "[pipeline]\nmax_repair_cycles = 3\n").unwrap();

    let service = ConfigService::open(&path).unwrap();
    let config = service.get_config();

    assert_eq!(config.pipeline.max_repair_cycles, 3);
    assert_eq!(config.pipeline.max_in_flight, 4);
    assert!(!config.schema.is_empty());
    assert_eq!(config.warehouse.dataset_id, "velocity_ai_iis");
}

#[test]
fn test_update_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");

    let mut service = ConfigService::open(&path).unwrap();
    service
        .update_config(SettingsUpdate {
            max_repair_cycles: Some(5),
            dataset_id: Some("sandbox".to_string()),
            ..Default::default()
        })
        .unwrap();

    let reopened = ConfigService::open(&path).unwrap();
    assert_eq!(reopened.get_config().pipeline.max_repair_cycles, 5);
    assert_eq!(reopened.get_config().warehouse.dataset_id, "sandbox");
}

#[test]
fn test_rejected_update_leaves_file_untouched() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");

    let mut service = ConfigService::open(&path).unwrap();
    let before = fs::read_to_string(&path).unwrap();

    let result = service.update_config(SettingsUpdate {
        max_in_flight: Some(0),
        ..Default::default()
    });

    assert!(result.is_err());
    assert_eq!(service.get_config().pipeline.max_in_flight, 4);
    assert_eq!(fs::read_to_string(&path).unwrap(), before);
}

#[test]
fn test_runner_builds_from_loaded_config() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "[pipeline]\nmax_repair_cycles = 2\nmax_in_flight = 1\n").unwrap();

    let service = ConfigService::open(&path).unwrap();
    let runner = DrilldownRunner::from_config(service.get_config()).unwrap();

    assert_eq!(runner.settings().max_repair_cycles, 2);
    assert_eq!(runner.settings().max_in_flight, 1);
}
