//! End-to-end runs of the driver over unit files on disk

use pretty_assertions::assert_eq;
use rsreflect::{check, discover_units, inspect, run, Config, Emit};
use rsreflect_core::ast::{BuiltinKind, QualType, RecordDecl, VarDecl};
use rsreflect_core::UnitBuilder;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A script exporting one `Point` variable; `second` names the second field.
fn point_unit(file: &str, second: &str) -> String {
    let mut builder = UnitBuilder::script(file, "com.example.geometry");
    let point = builder.record(
        RecordDecl::structure("Point")
            .field("x", QualType::float())
            .field(second, QualType::float()),
    );
    builder
        .var(VarDecl::global("origin", QualType::record(point)))
        .var(VarDecl::global("tint", QualType::vector(BuiltinKind::Float, 4)));
    serde_json::to_string_pretty(&builder.build()).unwrap()
}

fn write_unit(dir: &Path, name: &str, json: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, json).unwrap();
    path
}

fn config(output: &Path, emit: Emit) -> Config {
    Config {
        output_dir: Some(output.to_path_buf()),
        emit,
        ..Config::default()
    }
}

#[test]
fn test_directory_compiles_into_plans() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    let units = temp_dir.path().join("units");
    fs::create_dir(&units)?;
    write_unit(&units, "a.json", &point_unit("a.rs", "y"));
    write_unit(&units, "b.json", &point_unit("b.rs", "y"));
    fs::write(units.join("notes.txt"), "not a unit")?;

    let out = temp_dir.path().join("gen");
    let outcome = run(&config(&out, Emit::Plan), &[units])?;

    assert!(outcome.summary.is_success());
    assert_eq!(outcome.summary.files, 2);
    assert_eq!(outcome.summary.registered_types, 1);
    assert_eq!(outcome.written, vec![out.join("a.plan.json"), out.join("b.plan.json")]);

    let plan: serde_json::Value = serde_json::from_str(&fs::read_to_string(out.join("a.plan.json"))?)?;
    assert_eq!(plan["class_name"], "ScriptC_a");
    assert_eq!(plan["vars"][0]["host_type"], "ScriptField_Point.Item");
    assert_eq!(plan["vars"][1]["host_type"], "Float4");
    Ok(())
}

#[test]
fn test_conflicting_file_does_not_stop_batch() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    let first = write_unit(temp_dir.path(), "first.json", &point_unit("first.rs", "y"));
    let second = write_unit(temp_dir.path(), "second.json", &point_unit("second.rs", "z"));
    let third = write_unit(temp_dir.path(), "third.json", &point_unit("third.rs", "y"));

    let out = temp_dir.path().join("out");
    let outcome = run(&config(&out, Emit::Json), &[first, second, third])?;

    assert_eq!(outcome.summary.failed, vec!["second.rs".to_string()]);
    assert_eq!(outcome.written.len(), 2);
    assert!(!out.join("second.types.json").exists());

    let failed = &outcome.reports[1];
    assert!(!failed.success);
    let message = &failed.diagnostics.errors().next().unwrap().message;
    assert!(message.contains("incompatible type definition"), "{}", message);
    Ok(())
}

#[test]
fn test_binary_descriptors_can_be_inspected() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    let unit = write_unit(temp_dir.path(), "shapes.json", &point_unit("shapes.rs", "y"));
    let out = temp_dir.path().join("bin");

    let outcome = run(&config(&out, Emit::Binary), &[unit])?;
    assert_eq!(outcome.written, vec![out.join("shapes.rstd")]);

    let bytes = fs::read(out.join("shapes.rstd"))?;
    assert_eq!(&bytes[..4], b"RSTD");
    let table = rsreflect_core::DescriptorTable::decode(&bytes)?;
    assert!(table.find_record("Point").is_some());

    let json = inspect(&out.join("shapes.rstd"))?;
    assert!(json.contains("\"Point\""));
    Ok(())
}

#[test]
fn test_binary_needs_output_dir() {
    let temp_dir = TempDir::new().unwrap();
    let unit = write_unit(temp_dir.path(), "a.json", &point_unit("a.rs", "y"));
    let config = Config {
        emit: Emit::Binary,
        ..Config::default()
    };
    let err = run(&config, &[unit]).unwrap_err();
    assert_eq!(err.to_string(), "binary output requires an output directory");
}

#[test]
fn test_config_file_target_is_checked_before_compiling() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("rsreflect.toml");
    fs::write(&config_path, "target_api = 9\nstrict_dialect = true\n").unwrap();
    let unit = write_unit(temp_dir.path(), "a.json", &point_unit("a.rs", "y"));

    let config = Config::discover(None, temp_dir.path()).unwrap();
    assert_eq!(config.target_api, 9);
    assert!(config.strict_dialect);

    let err = check(&config, &[unit]).unwrap_err();
    assert!(err.to_string().contains("outside the supported range"));
}

#[test]
fn test_check_writes_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let unit = write_unit(temp_dir.path(), "a.json", &point_unit("a.rs", "y"));
    let out = temp_dir.path().join("out");

    let outcome = check(&config(&out, Emit::Plan), &[unit]).unwrap();
    assert!(outcome.summary.is_success());
    assert!(outcome.written.is_empty());
    assert!(!out.exists());
}

#[test]
fn test_unreadable_unit_is_reported() {
    let temp_dir = TempDir::new().unwrap();
    let unit = write_unit(temp_dir.path(), "broken.json", "{ not json");
    let err = check(&Config::default(), &[unit]).unwrap_err();
    assert!(err.to_string().starts_with("Failed to parse translation unit"));

    let missing = temp_dir.path().join("missing.json");
    assert!(discover_units(&[missing]).is_err());
}
