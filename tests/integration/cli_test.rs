use crate::{run, stdout_of};

#[test]
fn test_encode_single_instruction() {
    let output = run(&["encode", "add a0, a1, a2"]);
    assert!(
        output.status.success(),
        "Command failed with status: {:?}",
        output.status
    );
    let stdout = stdout_of(&output);
    assert!(stdout.contains("0x00c58533"), "unexpected output: {}", stdout);
    assert!(stdout.contains("(4 bytes)"));
}

#[test]
fn test_encode_compressed_instruction() {
    let output = run(&["encode", "c.ebreak"]);
    assert!(output.status.success());
    let stdout = stdout_of(&output);
    assert!(stdout.contains("0x9002"));
    assert!(stdout.contains("(2 bytes)"));
}

#[test]
fn test_encode_rejects_garbage() {
    let output = run(&["encode", "frobnicate a0"]);
    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error"));
}

#[test]
fn test_split_offset() {
    let output = run(&["split-offset", "4095"]);
    assert!(output.status.success());
    let stdout = stdout_of(&output);
    assert!(stdout.contains("hi20:   1"), "unexpected output: {}", stdout);
    assert!(stdout.contains("lo12:   -1"));

    let output = run(&["split-offset", "20"]);
    let stdout = stdout_of(&output);
    assert!(stdout.contains("hi20:   0"));
    assert!(stdout.contains("lo12:   20"));
}

#[test]
fn test_profiles_lists_builtins() {
    let output = run(&["profiles"]);
    assert!(output.status.success());
    let stdout = stdout_of(&output);
    for name in ["general:", "cva6:", "rv32:", "base:", "integer:"] {
        assert!(stdout.contains(name), "missing profile {}", name);
    }
    assert!(stdout.contains("RV_I"));
}

#[test]
fn test_profiles_single_and_unknown() {
    let output = run(&["profiles", "integer"]);
    assert!(output.status.success());
    let stdout = stdout_of(&output);
    assert!(stdout.contains("RV_I"));
    assert!(stdout.contains("1.0000"));

    let output = run(&["profiles", "nonsense"]);
    assert!(!output.status.success());
}

#[test]
fn test_disasm_rejects_non_elf() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("not_an_elf");
    std::fs::write(&path, b"hello").unwrap();
    let output = run(&["disasm", path.to_str().unwrap()]);
    assert!(!output.status.success());
}
