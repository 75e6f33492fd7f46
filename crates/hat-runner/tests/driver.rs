use chrono::Utc;
use hat_runner::{
    BatchSummary, Driver, DriverConfig, Settings, ToolInvocation, ToolOutput, ToolRunner, Tools,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::{json, Value};
use std::cell::{Cell, RefCell};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

struct FnTool<F>(F);

impl<F: Fn(&ToolInvocation) -> io::Result<ToolOutput>> ToolRunner for FnTool<F> {
    fn run(&self, invocation: &ToolInvocation) -> io::Result<ToolOutput> {
        (self.0)(invocation)
    }
}

fn writes(invocation: &ToolInvocation, body: &str) -> io::Result<ToolOutput> {
    fs::write(&invocation.produced, body)?;
    Ok(ToolOutput {
        exit_code: Some(0),
        produced_file: Some(invocation.produced.clone()),
        ..ToolOutput::default()
    })
}

fn nice_instance(invocation: &ToolInvocation) -> io::Result<ToolOutput> {
    writes(
        invocation,
        &json!({"parameters": {"is_nice": true}, "points": []}).to_string(),
    )
}

fn verdict(invocation: &ToolInvocation, succeeded: bool) -> io::Result<ToolOutput> {
    writes(invocation, &json!({ "succeeded": succeeded }).to_string())
}

struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    fn new(tag: &str) -> Self {
        let root = std::env::temp_dir().join(format!(
            "hat_driver_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        fs::create_dir_all(&root).expect("sandbox");
        Self { root }
    }

    fn config(&self, iterations: u64) -> DriverConfig {
        Settings {
            iterations: Some(iterations),
            min_n: Some(10),
            max_n: Some(10),
            min_c: Some(1),
            max_c: Some(1),
            min_ell: Some(2),
            max_ell: Some(2),
            threads: Some(4),
            decoder_command: Some(PathBuf::from("decoder")),
            scratch_dir: Some(self.root.join("scratch")),
            ..Settings::default()
        }
        .resolve(
            self.root.join("results.csv"),
            self.root.join("cache"),
            "abc1234".to_string(),
        )
        .expect("config")
    }

    fn rows(&self) -> Vec<Vec<String>> {
        let text = fs::read_to_string(self.root.join("results.csv")).expect("log");
        text.split("\r\n")
            .filter(|l| !l.is_empty())
            .map(|l| l.split(',').map(str::to_string).collect())
            .collect()
    }

    fn cache_files(&self) -> Vec<String> {
        list(&self.root.join("cache"))
    }

    fn scratch_files(&self) -> Vec<String> {
        list(&self.root.join("scratch"))
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

fn list(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().to_string())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

fn run(
    config: &DriverConfig,
    generator: &dyn ToolRunner,
    decoder: &dyn ToolRunner,
) -> BatchSummary {
    let tools = Tools { generator, decoder };
    let mut rng = StdRng::seed_from_u64(2024);
    Driver::new(config, tools)
        .expect("driver")
        .run_batch(&mut rng)
        .expect("batch")
}

#[test]
fn failing_trials_archive_exactly_three_files_each() {
    let sandbox = Sandbox::new("failing");
    let config = sandbox.config(3);
    let generator = FnTool(nice_instance);
    let decoder = FnTool(|inv: &ToolInvocation| verdict(inv, false));

    let summary = run(&config, &generator, &decoder);
    assert_eq!(summary.trials, 3);
    assert_eq!(summary.decoder_failed, 3);
    assert_eq!(summary.archived, 3);

    let rows = sandbox.rows();
    assert_eq!(rows.len(), 4);
    let cache = sandbox.cache_files();
    assert_eq!(cache.len(), 9);
    for row in &rows[1..] {
        let id = &row[0];
        for name in [
            format!("instance-{}.json", id),
            format!("config-{}.json", id),
            format!("decoder-output-{}.json", id),
        ] {
            assert!(cache.contains(&name), "missing {} in {:?}", name, cache);
        }
        assert_eq!(row[16], "False");
        assert_eq!(row[13], "True");
    }
    assert!(sandbox.scratch_files().is_empty());

    let archived_config: Value = serde_json::from_slice(
        &fs::read(sandbox.root.join("cache").join(format!("config-{}.json", rows[1][0])))
            .expect("config"),
    )
    .expect("json");
    assert_eq!(
        archived_config,
        json!({"batch_sizes": [10], "c_vals": [1], "threads": 4})
    );
}

#[test]
fn successful_trials_leave_no_artifacts() {
    let sandbox = Sandbox::new("passing");
    let config = sandbox.config(2);
    let generator = FnTool(nice_instance);
    let decoder = FnTool(|inv: &ToolInvocation| verdict(inv, true));

    let summary = run(&config, &generator, &decoder);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.archived, 0);
    assert!(sandbox.cache_files().is_empty());
    assert!(sandbox.scratch_files().is_empty());

    let rows = sandbox.rows();
    assert_eq!(rows.len(), 3);
    assert!(rows[1..].iter().all(|r| r[16] == "True"));
}

#[test]
fn log_has_one_row_per_trial_across_mixed_outcomes() {
    let sandbox = Sandbox::new("mixed");
    let config = sandbox.config(5);
    let calls = Cell::new(0u32);
    let generator = FnTool(nice_instance);
    let decoder = FnTool(|inv: &ToolInvocation| {
        let i = calls.get();
        calls.set(i + 1);
        verdict(inv, i % 2 == 0)
    });

    let summary = run(&config, &generator, &decoder);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.decoder_failed, 2);

    let rows = sandbox.rows();
    assert_eq!(rows.len(), 6);
    assert_eq!(rows[0][0], "id");
    assert_eq!(rows[0][16], "succeeded");
    assert_eq!(sandbox.cache_files().len(), 6);

    // A second batch appends without repeating the header.
    run(&config, &generator, &decoder);
    let rows = sandbox.rows();
    assert_eq!(rows.len(), 11);
    assert_eq!(rows.iter().filter(|r| r[0] == "id").count(), 1);
}

#[test]
fn pinned_ranges_give_fixed_parameters_and_consistent_partition() {
    let sandbox = Sandbox::new("pinned");
    let config = sandbox.config(4);
    let seen = RefCell::new(Vec::new());
    let generator = FnTool(|inv: &ToolInvocation| {
        seen.borrow_mut().push(inv.args.clone());
        nice_instance(inv)
    });
    let decoder = FnTool(|inv: &ToolInvocation| verdict(inv, true));

    run(&config, &generator, &decoder);

    for row in &sandbox.rows()[1..] {
        assert_eq!(
            &row[1..13],
            &["abc1234", "adversarial", "10", "10", "1", "1", "2", "2", "10", "1", "2", "7"]
        );
        assert_eq!(row[14], "False");
        assert_eq!(row[15], "False");
    }

    let seen = seen.borrow();
    assert_eq!(seen.len(), 4);
    for args in seen.iter() {
        assert_eq!(args[0], "a");
        assert_eq!(&args[2..8], &["-c", "1", "-l", "2", "-mf", "11"]);
        let e = args.iter().position(|a| a == "-e").expect("-e flag");
        let counts: Vec<u64> = args[e + 1..]
            .iter()
            .map(|v| v.parse().expect("count"))
            .collect();
        assert_eq!(counts.iter().sum::<u64>(), 10);
        let (residual, sufficient) = counts.split_last().expect("residual");
        assert!(sufficient.len() <= 3);
        for count in sufficient {
            assert!(*count >= 3, "{:?}", counts);
        }
        assert!(*residual <= 10);
    }
}

#[test]
fn generator_crash_is_recorded_and_batch_continues() {
    let sandbox = Sandbox::new("gen_crash");
    let config = sandbox.config(2);
    let decoder_calls = Cell::new(0u32);
    let generator = FnTool(|_: &ToolInvocation| {
        Ok(ToolOutput {
            exit_code: Some(1),
            stderr_tail: "Traceback: boom".to_string(),
            ..ToolOutput::default()
        })
    });
    let decoder = FnTool(|inv: &ToolInvocation| {
        decoder_calls.set(decoder_calls.get() + 1);
        verdict(inv, true)
    });

    let summary = run(&config, &generator, &decoder);
    assert_eq!(summary.trials, 2);
    assert_eq!(summary.harness_errors, 2);
    assert_eq!(decoder_calls.get(), 0);

    let rows = sandbox.rows();
    assert_eq!(rows.len(), 3);
    for row in &rows[1..] {
        assert_eq!(row[13], "");
        assert_eq!(row[16], "False");
        let report: Value = serde_json::from_slice(
            &fs::read(sandbox.root.join("cache").join(format!("failure-{}.json", row[0])))
                .expect("report"),
        )
        .expect("json");
        assert_eq!(report["code"], "generator_exit");
        assert!(report["message"]
            .as_str()
            .expect("message")
            .contains("Traceback: boom"));
    }
    // config + failure report per trial; the generator wrote nothing.
    assert_eq!(sandbox.cache_files().len(), 4);
}

#[test]
fn decoder_crash_is_recorded_and_batch_continues() {
    let sandbox = Sandbox::new("dec_crash");
    let config = sandbox.config(3);
    let generator = FnTool(nice_instance);
    let decoder = FnTool(|_: &ToolInvocation| {
        Ok(ToolOutput {
            exit_code: Some(1),
            stderr_tail: "segfault in decode".to_string(),
            ..ToolOutput::default()
        })
    });

    let summary = run(&config, &generator, &decoder);
    assert_eq!(summary.trials, 3);
    assert_eq!(summary.harness_errors, 3);
    assert_eq!(summary.decoder_failed, 0);
    assert_eq!(summary.archived, 3);

    let rows = sandbox.rows();
    assert_eq!(rows.len(), 4);
    for row in &rows[1..] {
        assert_eq!(row[13], "True");
        assert_eq!(row[16], "False");
        let report: Value = serde_json::from_slice(
            &fs::read(sandbox.root.join("cache").join(format!("failure-{}.json", row[0])))
                .expect("report"),
        )
        .expect("json");
        assert_eq!(report["code"], "decoder_exit");
        assert!(report["message"]
            .as_str()
            .expect("message")
            .contains("segfault in decode"));
    }
    // instance + config + failure report per trial; no decoder output.
    assert_eq!(sandbox.cache_files().len(), 9);
    assert!(sandbox.scratch_files().is_empty());
}

#[test]
fn malformed_decoder_output_is_distinguished_from_decoder_failure() {
    let sandbox = Sandbox::new("malformed");
    let config = sandbox.config(1);
    let generator = FnTool(nice_instance);
    let decoder = FnTool(|inv: &ToolInvocation| writes(inv, "{\"result\": "));

    let summary = run(&config, &generator, &decoder);
    assert_eq!(summary.harness_errors, 1);
    assert_eq!(summary.decoder_failed, 0);

    let rows = sandbox.rows();
    let id = &rows[1][0];
    assert_eq!(rows[1][13], "True");
    assert_eq!(rows[1][16], "False");
    let cache = sandbox.cache_files();
    assert_eq!(cache.len(), 4);
    assert!(cache.contains(&format!("failure-{}.json", id)));
    let report: Value = serde_json::from_slice(
        &fs::read(sandbox.root.join("cache").join(format!("failure-{}.json", id)))
            .expect("report"),
    )
    .expect("json");
    assert_eq!(report["code"], "decoder_malformed_output");
}

#[test]
fn unwritable_cache_dir_is_fatal_before_any_trial() {
    let sandbox = Sandbox::new("unwritable");
    // A regular file where the cache directory should be.
    fs::write(sandbox.root.join("cache"), "not a dir").expect("blocker");
    let config = sandbox.config(1);
    let generator = FnTool(nice_instance);
    let decoder = FnTool(|inv: &ToolInvocation| verdict(inv, true));
    let tools = Tools {
        generator: &generator,
        decoder: &decoder,
    };
    assert!(Driver::new(&config, tools).is_err());
    assert!(!sandbox.root.join("results.csv").exists());
}
