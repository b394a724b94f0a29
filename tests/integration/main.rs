mod cli_test;
mod generate_test;

use std::path::PathBuf;
use std::process::{Command, Output};

pub fn get_binary_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_rvsynth"))
}

pub fn run(args: &[&str]) -> Output {
    Command::new(get_binary_path())
        .args(args)
        .env("RVSYNTH_LOG", "error")
        .output()
        .expect("Failed to execute rvsynth")
}

pub fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}
