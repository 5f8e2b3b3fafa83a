use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

const QUOTABENCH_EXE: &str = env!("CARGO_BIN_EXE_quotabench");

/// A driver that records its role when measuring and replays forever when generating load.
const DRIVER: &str = r#"
if [ -n "$2" ]; then
    case "$2" in
        *client_9) exit 5 ;;
    esac
    echo "query,time,httpCalls" > "$2/execution_times.csv"
    echo "$QUOTABENCH_ROLE" > "$2/role"
else
    while true; do sleep 0.05; done
fi
"#;

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new(workloads: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();

        let scripts = dir.path().join("scripts");
        fs::create_dir(&scripts).unwrap();
        fs::write(scripts.join("run_bgp.sh"), DRIVER).unwrap();

        for name in workloads {
            let workload = dir.path().join("workloads").join(name);
            fs::create_dir_all(&workload).unwrap();
            fs::write(workload.join("q1.sparql"), "SELECT * WHERE { ?s ?p ?o }").unwrap();
        }

        Self { dir }
    }

    fn path(&self, relative: &str) -> std::path::PathBuf {
        self.dir.path().join(relative)
    }

    fn quotabench(&self, args: &[&str]) -> Output {
        Command::new(QUOTABENCH_EXE)
            .args(args)
            .env("QB__SCRIPTS", self.path("scripts"))
            .env("QB__SETTLE_DELAY", "300ms")
            .env("QB__GATE_TIMEOUT", "30s")
            .env("QB__TERMINATE_GRACE", "2s")
            .env("QB__LOGGING__FORMAT", "simplified")
            .current_dir(self.dir.path())
            .output()
            .expect("failed to run quotabench")
    }

    fn run(&self, clients: usize, extra: &[&str]) -> Output {
        let clients = clients.to_string();
        let mut args = vec![
            "run",
            "--workloads",
            "workloads",
            "--output",
            "results",
            "--clients",
            &clients,
            "--backend",
            "sage",
        ];
        args.extend_from_slice(extra);
        self.quotabench(&args)
    }
}

fn read_times(path: &Path) -> Vec<(String, f64, u32)> {
    let content = fs::read_to_string(path).unwrap();
    let mut lines = content.lines();
    assert_eq!(lines.next(), Some("query,time,httpCalls"));
    lines
        .map(|line| {
            let fields: Vec<_> = line.split(',').collect();
            (
                fields[0].to_owned(),
                fields[1].parse().unwrap(),
                fields[2].parse().unwrap(),
            )
        })
        .collect()
}

#[test]
fn measured_run_stops_load_after_measurement() {
    let fixture = Fixture::new(&["a", "b"]);
    let output = fixture.run(3, &[]);
    assert!(output.status.success(), "{output:?}");

    let measured = fixture.path("results/3clients/mix_a/client_2");
    assert_eq!(
        fs::read_to_string(measured.join("role")).unwrap().trim(),
        "measurement"
    );
    assert!(measured.join("execution_times.csv").is_file());

    for load in ["results/3clients/mix_a/client_0", "results/3clients/mix_b/client_1"] {
        let load = fixture.path(load);
        assert!(load.is_dir());
        assert!(!load.join("role").exists());
    }
}

#[test]
fn symmetric_run_measures_every_client() {
    let fixture = Fixture::new(&["0"]);
    let output = fixture.run(2, &["--mode", "symmetric"]);
    assert!(output.status.success(), "{output:?}");

    for index in 0..2 {
        let role = fixture.path(&format!("results/2clients/mix_0/client_{index}/role"));
        assert_eq!(fs::read_to_string(role).unwrap().trim(), "measurement");
    }
}

#[test]
fn failed_client_is_a_partial_failure() {
    let fixture = Fixture::new(&["0"]);
    let output = fixture.run(10, &["--mode", "symmetric"]);
    assert_eq!(output.status.code(), Some(2), "{output:?}");

    assert!(fixture.path("results/10clients/mix_0/client_8/role").is_file());
    assert!(!fixture.path("results/10clients/mix_0/client_9/role").exists());
}

#[test]
fn configuration_errors_fail_before_spawning() {
    let fixture = Fixture::new(&["0"]);

    let unknown_backend = fixture.quotabench(&[
        "run", "--workloads", "workloads", "--output", "results", "--clients", "2", "--backend",
        "hdt",
    ]);
    assert!(!unknown_backend.status.success());

    let missing_workloads = fixture.quotabench(&[
        "run", "--workloads", "missing", "--output", "results", "--clients", "2", "--backend",
        "sage",
    ]);
    assert_eq!(missing_workloads.status.code(), Some(1));

    let missing_driver = fixture.quotabench(&[
        "run", "--workloads", "workloads", "--output", "results", "--clients", "2", "--backend",
        "tpf",
    ]);
    assert_eq!(missing_driver.status.code(), Some(1));

    let no_clients = fixture.run(0, &[]);
    assert_eq!(no_clients.status.code(), Some(1));

    assert!(!fixture.path("results").exists());
}

#[test]
fn simulate_sweeps_concurrency_levels() {
    let fixture = Fixture::new(&[]);
    fs::write(
        fixture.path("baseline.csv"),
        "query,time,httpCalls\nQ1,2.0,4\nQ2,0.25,1\n",
    )
    .unwrap();

    let output = fixture.quotabench(&[
        "simulate",
        "--queries",
        "baseline.csv",
        "--quota",
        "100",
        "--clients",
        "1",
        "--clients",
        "5",
        "--trials",
        "5000",
        "--seed",
        "17",
    ]);
    assert!(output.status.success(), "{output:?}");

    let solo = read_times(&fixture.path("simulation_1c_100q_5000runs.csv"));
    assert_eq!(
        solo,
        [("Q1".into(), 2.0, 4), ("Q2".into(), 0.25, 1)]
    );

    let contended = read_times(&fixture.path("simulation_5c_100q_5000runs.csv"));
    assert_eq!(contended.len(), 2);
    assert!((contended[0].1 - 2.8).abs() < 0.03, "{contended:?}");
    assert!(contended[1].1 >= 0.25);
}

#[test]
fn simulate_reports_invalid_rows() {
    let fixture = Fixture::new(&[]);
    fs::write(
        fixture.path("baseline.csv"),
        "query,time,httpCalls\nQ1,1.5,3\nQ2,0.5,0\n",
    )
    .unwrap();

    let output = fixture.quotabench(&[
        "simulate",
        "--queries",
        "baseline.csv",
        "--quota",
        "50",
        "--clients",
        "3",
        "--output",
        "estimates.csv",
    ]);
    assert_eq!(output.status.code(), Some(1), "{output:?}");

    let estimates = read_times(&fixture.path("estimates.csv"));
    assert_eq!(estimates.len(), 1);
    assert_eq!(estimates[0].0, "Q1");
}

#[test]
fn simulate_rejects_single_output_for_sweeps() {
    let fixture = Fixture::new(&[]);
    fs::write(fixture.path("baseline.csv"), "query,time,httpCalls\nQ1,1.0,1\n").unwrap();

    let output = fixture.quotabench(&[
        "simulate",
        "--queries",
        "baseline.csv",
        "--quota",
        "50",
        "--clients",
        "2",
        "--clients",
        "3",
        "--output",
        "estimates.csv",
    ]);
    assert_eq!(output.status.code(), Some(1));
    assert!(!fixture.path("estimates.csv").exists());
}

#[test]
fn simulate_rejects_unrepresentable_quota() {
    let fixture = Fixture::new(&[]);
    fs::write(fixture.path("baseline.csv"), "query,time,httpCalls\nQ1,1.0,1\n").unwrap();

    let output = fixture.quotabench(&[
        "simulate",
        "--queries",
        "baseline.csv",
        "--quota",
        "1e30",
        "--clients",
        "2",
        "--output",
        "estimates.csv",
    ]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("out of range"));
    assert!(!fixture.path("estimates.csv").exists());
}
