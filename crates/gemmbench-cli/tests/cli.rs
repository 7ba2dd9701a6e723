use std::path::PathBuf;
use std::process::Command;
use tempfile::TempDir;

fn get_binary_path() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.push("gemmbench");
    path
}

fn run_gemmbench(dir: &TempDir, args: &[&str]) -> std::process::Output {
    Command::new(get_binary_path())
        .args(args)
        .current_dir(dir.path())
        .env_remove("GEMMBENCH_CONFIG")
        .env("HOME", dir.path())
        .output()
        .expect("Failed to execute gemmbench binary")
}

#[test]
fn help_lists_commands() {
    let dir = TempDir::new().unwrap();
    let output = run_gemmbench(&dir, &["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["check", "bench", "probe", "config"] {
        assert!(stdout.contains(command), "missing {command}");
    }
}

#[test]
fn config_generate_then_show_picks_up_file() {
    let dir = TempDir::new().unwrap();
    let output = run_gemmbench(&dir, &["config", "generate", "-o", ".gemmbench.toml"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let written = std::fs::read_to_string(dir.path().join(".gemmbench.toml")).unwrap();
    let edited = written.replacen("m = 256", "m = 48", 1);
    assert_ne!(written, edited);
    std::fs::write(dir.path().join(".gemmbench.toml"), edited).unwrap();

    let output = run_gemmbench(&dir, &["config", "show"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("m: 48"), "{stdout}");
}

#[test]
fn unreadable_explicit_config_fails() {
    let dir = TempDir::new().unwrap();
    let output = run_gemmbench(&dir, &["--config", "missing.yaml", "config", "show"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("missing.yaml"));
}
