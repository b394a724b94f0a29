use crate::{run, stdout_of};
use std::fs;

fn generate(dir: &std::path::Path, extra: &[&str]) -> std::process::Output {
    let out = dir.to_str().unwrap();
    let mut args = vec![
        "generate",
        "--oracle",
        "reference",
        "--no-toolchain",
        "-n",
        "40",
        "--seeds",
        "2",
        "-j",
        "2",
        "--seed",
        "7",
        "--out-dir",
        out,
    ];
    args.extend_from_slice(extra);
    run(&args)
}

#[test]
fn test_generate_writes_seeds_and_stats() {
    let dir = tempfile::tempdir().unwrap();
    let output = generate(dir.path(), &["--profile", "integer"]);
    assert!(
        output.status.success(),
        "generate failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(stdout_of(&output).contains("Generation summary"));

    for i in 0..2 {
        let text = fs::read_to_string(dir.path().join(format!("seeds_{}_.S", i))).unwrap();
        assert!(text.contains("main:"));
        assert!(text.contains("write_tohost:"));
    }
    let sidecar = fs::read_to_string(dir.path().join(".isa_info")).unwrap();
    assert!(sidecar.contains("ARCH_BITS=64"));

    let stats: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("run_stats.json")).unwrap())
            .unwrap();
    assert_eq!(stats["completed"].as_array().unwrap().len(), 2);
    assert!(stats["resolve_duplicates"].as_u64().unwrap() > 0);
}

#[test]
fn test_generate_json_report_for_rv32() {
    let dir = tempfile::tempdir().unwrap();
    let output = generate(dir.path(), &["--target", "rv32", "--profile", "integer", "--json"]);
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_str(&stdout_of(&output)).unwrap();
    assert_eq!(report["seeds_requested"], 2);
    let sidecar = fs::read_to_string(dir.path().join(".isa_info")).unwrap();
    assert!(sidecar.starts_with("ISA=rv32"));
    assert!(sidecar.contains("ARCH_BITS=32"));
}

#[test]
fn test_generate_with_trace_directory() {
    let dir = tempfile::tempdir().unwrap();
    let traces = dir.path().join("traces");
    let output = generate(
        dir.path(),
        &["--profile", "integer", "--debug-trace", traces.to_str().unwrap()],
    );
    assert!(output.status.success());
    assert!(traces.join("seeds_0_.trace").exists());
    assert!(traces.join("seeds_1_.trace").exists());
}

#[test]
fn test_generate_reports_missing_toolchain() {
    let dir = tempfile::tempdir().unwrap();
    let output = run(&[
        "generate",
        "--toolchain-prefix",
        "definitely-not-a-toolchain-",
        "--seeds",
        "1",
        "--out-dir",
        dir.path().to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("not available"));
}
