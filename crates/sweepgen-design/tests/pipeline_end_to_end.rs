use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::{json, Value};
use sweepgen_core::SweepError;
use sweepgen_design::{
    run, Assignment, Experiment, JsonSchemaValidator, NoRegistry, Registry, RegistryConfig,
    RunConfig, RunMode,
};

fn write(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("mkdir");
    }
    fs::write(path, contents).expect("write");
}

/// Base template with sweeps `A={a1,a2}` and `B={b1,b2,b3}`.
fn two_sweep_repository(root: &Path) {
    write(
        &root.join("base.json"),
        r#"{"model": {"pop": 100, "parameters": {"iseed": 0}, "vector": {"species": "gambiae"}}}"#,
    );
    for (arm, pop) in [("a1", 100), ("a2", 2000)] {
        write(
            &root.join(format!("A/{arm}.json")),
            &format!(
                r#"{{"model": {{"pop": {pop}, "parameters": {{"iseed": 0}}, "vector": {{"species": "gambiae"}}}}}}"#
            ),
        );
    }
    for (arm, species) in [("b1", "gambiae"), ("b2", "funestus"), ("b3", "arabiensis")] {
        write(
            &root.join(format!("B/{arm}.json")),
            &format!(
                r#"{{"model": {{"pop": 100, "parameters": {{"iseed": 0}}, "vector": {{"species": "{species}"}}}}}}"#
            ),
        );
    }
}

fn config_in(root: &Path) -> RunConfig {
    RunConfig::new(
        root.join("description"),
        root.join("scenarios"),
        root.join("scenarios.csv"),
    )
}

fn read_json(path: &Path) -> Value {
    serde_json::from_slice(&fs::read(path).expect("read")).expect("json")
}

#[derive(Default)]
struct CountingRegistry {
    calls: AtomicUsize,
}

impl Registry for CountingRegistry {
    fn label(&self) -> String {
        "counting".into()
    }

    fn synchronize(&self, _experiment: &Experiment) -> Result<Option<Assignment>, SweepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }
}

#[test]
fn two_sweeps_produce_six_scenarios_in_row_major_order() {
    let temp = tempfile::tempdir().expect("tmp dir");
    two_sweep_repository(&temp.path().join("description"));
    let config = config_in(temp.path());

    let report = run(&config, &NoRegistry, None).expect("run");
    assert_eq!(report.design_size, 6);
    assert_eq!(report.written.len(), 6);
    assert_eq!(report.registry_offset, None);
    for (id, path) in report.written.iter().enumerate() {
        assert_eq!(path, &config.output_dir.join(format!("EXPERIMENT_{id}.json")));
    }

    let manifest = fs::read_to_string(&config.manifest_path).expect("manifest");
    let rows: Vec<_> = manifest.lines().collect();
    assert_eq!(
        rows,
        [
            "scenario_id,A,B,dummy_1",
            "0,a1,b1,none",
            "1,a1,b2,none",
            "2,a1,b3,none",
            "3,a2,b1,none",
            "4,a2,b2,none",
            "5,a2,b3,none",
        ]
    );

    let scenario = read_json(&config.output_dir.join("EXPERIMENT_4.json"));
    assert_eq!(scenario["model"]["pop"], json!(2000));
    assert_eq!(scenario["model"]["vector"]["species"], json!("funestus"));
}

#[test]
fn repeated_runs_are_byte_identical() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let input = temp.path().join("description");
    two_sweep_repository(&input);

    let mut first = config_in(temp.path());
    first.seeds.count = 3;
    first.seeds.master_seed = 42;
    let mut second = first.clone();
    second.output_dir = temp.path().join("again");
    second.manifest_path = temp.path().join("again.csv");
    second.parallelism = 4;

    let report_first = run(&first, &NoRegistry, None).expect("first run");
    let report_second = run(&second, &NoRegistry, None).expect("second run");
    assert_eq!(report_first.design_size, 18);
    assert_eq!(report_first.fingerprint, report_second.fingerprint);
    assert_eq!(
        fs::read(&first.manifest_path).expect("first manifest"),
        fs::read(&second.manifest_path).expect("second manifest")
    );
    for (a, b) in report_first.written.iter().zip(&report_second.written) {
        assert_eq!(a.file_name(), b.file_name());
        assert_eq!(fs::read(a).expect("a"), fs::read(b).expect("b"));
    }
}

#[test]
fn seed_sweep_is_last_and_sets_the_seed_field() {
    let temp = tempfile::tempdir().expect("tmp dir");
    two_sweep_repository(&temp.path().join("description"));
    let mut config = config_in(temp.path());
    config.seeds.count = 2;

    let report = run(&config, &NoRegistry, None).expect("run");
    assert_eq!(report.design_size, 12);
    let manifest = fs::read_to_string(&config.manifest_path).expect("manifest");
    assert_eq!(manifest.lines().next(), Some("scenario_id,A,B,seed"));

    let first = read_json(&report.written[0]);
    let second = read_json(&report.written[1]);
    assert!(first["model"]["parameters"]["iseed"].is_u64());
    assert_ne!(
        first["model"]["parameters"]["iseed"],
        second["model"]["parameters"]["iseed"]
    );
}

#[test]
fn non_empty_output_is_refused_before_registry_work() {
    let temp = tempfile::tempdir().expect("tmp dir");
    two_sweep_repository(&temp.path().join("description"));
    let config = config_in(temp.path());
    write(&config.output_dir.join("stale.json"), "{}");

    let registry = CountingRegistry::default();
    let err = run(&config, &registry, None).expect_err("non-empty output");
    assert!(matches!(err, SweepError::Io(_)));
    assert_eq!(err.info().code, "output.not_empty");
    assert_eq!(registry.calls.load(Ordering::SeqCst), 0);
    assert!(!config.manifest_path.exists());
}

#[test]
fn write_list_only_skips_scenarios_and_registry() {
    let temp = tempfile::tempdir().expect("tmp dir");
    two_sweep_repository(&temp.path().join("description"));
    let mut config = config_in(temp.path());
    config.mode = RunMode::WriteListOnly;

    let registry = CountingRegistry::default();
    let report = run(&config, &registry, None).expect("run");
    assert!(report.written.is_empty());
    assert_eq!(report.manifest.as_deref(), Some(config.manifest_path.as_path()));
    assert!(!config.output_dir.exists());
    assert_eq!(registry.calls.load(Ordering::SeqCst), 0);
    let manifest = fs::read_to_string(&config.manifest_path).expect("manifest");
    assert_eq!(manifest.lines().count(), 7);
}

#[test]
fn patch_mode_writes_deltas_only() {
    let temp = tempfile::tempdir().expect("tmp dir");
    two_sweep_repository(&temp.path().join("description"));
    let mut config = config_in(temp.path());
    config.patches = true;

    let report = run(&config, &NoRegistry, None).expect("run");
    let last = &report.written[5];
    assert_eq!(
        last.file_name().and_then(|name| name.to_str()),
        Some("EXPERIMENT_5.patch.json")
    );
    let patch = read_json(last);
    let entries = patch.as_array().expect("entries");
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0]["sweep"], json!("A"));
    assert_eq!(entries[0]["arm"], json!("a2"));
    assert_eq!(entries[1]["delta"][0]["op"], json!("replace"));
    assert_eq!(entries[2]["delta"], json!([]));
}

#[test]
fn invalid_arm_fails_validation_unless_disabled() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let input = temp.path().join("description");
    two_sweep_repository(&input);
    write(
        &input.join("A/a3.json"),
        r#"{"model": {"pop": "lots", "parameters": {"iseed": 0}, "vector": {"species": "gambiae"}}}"#,
    );
    let validator = JsonSchemaValidator::from_value(&json!({
        "type": "object",
        "required": ["model"],
        "properties": {"model": {"properties": {"pop": {"type": "integer"}}}}
    }))
    .expect("schema");

    let config = config_in(temp.path());
    let err = run(&config, &NoRegistry, Some(&validator)).expect_err("schema violation");
    assert!(matches!(err, SweepError::SchemaViolation(_)));
    assert_eq!(err.info().context.get("sweep").map(String::as_str), Some("A"));

    let mut lenient = config_in(temp.path());
    lenient.validate = false;
    let report = run(&lenient, &NoRegistry, Some(&validator)).expect("unvalidated run");
    assert_eq!(report.design_size, 9);
}

#[test]
fn registry_without_description_is_rejected() {
    let temp = tempfile::tempdir().expect("tmp dir");
    two_sweep_repository(&temp.path().join("description"));
    let mut config = config_in(temp.path());
    config.registry = Some(RegistryConfig::new(temp.path().join("registry.sqlite")));

    let err = run(&config, &NoRegistry, None).expect_err("missing description");
    assert!(matches!(err, SweepError::MalformedInput(_)));
    assert!(!config.output_dir.exists());
}

#[test]
fn yaml_templates_produce_yaml_scenarios() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let input = temp.path().join("description");
    write(&input.join("base.yaml"), "model:\n  pop: 100\n");
    write(&input.join("pop/small.yaml"), "model:\n  pop: 10\n");
    write(&input.join("pop/large.yml"), "model:\n  pop: 1000\n");
    let mut config = config_in(temp.path());
    config.min_three_sweeps = false;

    let report = run(&config, &NoRegistry, None).expect("run");
    assert_eq!(report.design_size, 2);
    let text = fs::read_to_string(&report.written[1]).expect("scenario");
    let doc: Value = serde_yaml::from_str(&text).expect("yaml");
    assert_eq!(doc["model"]["pop"], json!(10));
    assert!(report.written[1].to_string_lossy().ends_with("EXPERIMENT_1.yaml"));
}

#[test]
fn scenarios_keep_the_template_key_order() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let input = temp.path().join("description");
    write(
        &input.join("base.json"),
        r#"{"zeta": 1, "alpha": {"y": 1, "b": 2, "m": 3}}"#,
    );
    write(&input.join("zeta/one.json"), r#"{"zeta": 1, "alpha": {"y": 1, "b": 2, "m": 3}}"#);
    write(&input.join("zeta/two.json"), r#"{"zeta": 2, "alpha": {"y": 1, "b": 2}}"#);
    let mut config = config_in(temp.path());
    config.min_three_sweeps = false;

    let report = run(&config, &NoRegistry, None).expect("run");
    let text = fs::read_to_string(&report.written[1]).expect("scenario");
    let position = |needle: &str| text.find(needle).expect(needle);
    assert!(position("\"zeta\"") < position("\"alpha\""));
    assert!(position("\"y\"") < position("\"b\""));
    assert!(!text.contains("\"m\""));
}

#[test]
fn seed_sweep_cannot_shadow_a_sweep_directory() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let input = temp.path().join("description");
    two_sweep_repository(&input);
    write(
        &input.join("seed/fixed.json"),
        r#"{"model": {"pop": 100, "parameters": {"iseed": 42}, "vector": {"species": "gambiae"}}}"#,
    );
    let mut config = config_in(temp.path());
    config.seeds.count = 2;

    let err = run(&config, &NoRegistry, None).expect_err("duplicate sweep");
    assert!(matches!(err, SweepError::MalformedInput(_)));
    assert_eq!(err.info().code, "design.duplicate_sweep");
    assert!(!config.manifest_path.exists());

    config.seeds.count = -1;
    let report = run(&config, &NoRegistry, None).expect("directory sweep alone is fine");
    assert_eq!(report.design_size, 6);
}

#[test]
fn failed_combination_removes_written_scenarios() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let input = temp.path().join("description");
    let base = r#"{"model": {"pop": 1, "vector": {"species": "x"}}}"#;
    write(&input.join("base.json"), base);
    write(&input.join("a/drop.json"), r#"{"model": {"pop": 1}}"#);
    write(&input.join("a/keep.json"), base);
    write(&input.join("b/other.json"), r#"{"model": {"pop": 1, "vector": {"species": "y"}}}"#);
    write(&input.join("b/same.json"), base);
    let mut config = config_in(temp.path());
    config.min_three_sweeps = false;
    config.parallelism = 2;

    let err = run(&config, &NoRegistry, None).expect_err("merge failure");
    assert!(matches!(err, SweepError::Merge(_)));
    let left: Vec<_> = fs::read_dir(&config.output_dir).expect("output dir").collect();
    assert!(left.is_empty());
    assert!(!config.manifest_path.exists());
}
