//! End-to-end tests for tomopar CLI commands.

#![allow(deprecated)] // Allow deprecated Command::cargo_bin for tests

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

/// A temporary directory holding a raw f32 volume and the segment directory.
struct TestVolume {
    temp_dir: TempDir,
    path: PathBuf,
}

impl TestVolume {
    fn new(values: &[f32]) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("volume.raw");
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        fs::write(&path, bytes).expect("Failed to write volume");
        fs::create_dir(temp_dir.path().join("shm")).expect("Failed to create segment directory");
        Self { temp_dir, path }
    }

    fn path(&self) -> &str {
        self.path.to_str().unwrap()
    }

    fn sibling(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    fn command(&self) -> Command {
        let mut cmd = Command::cargo_bin("tomopar").expect("Failed to find tomopar binary");
        cmd.env("TOMOPAR_SHM_DIR", self.temp_dir.path().join("shm"));
        cmd
    }

    fn segments_left(&self) -> usize {
        fs::read_dir(self.temp_dir.path().join("shm")).unwrap().count()
    }
}

fn read_f32(path: &Path) -> Vec<f32> {
    fs::read(path)
        .unwrap()
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

// =============================================================================
// tomopar estimate Tests
// =============================================================================

#[test]
fn test_estimate_prints_megabytes() {
    Command::cargo_bin("tomopar")
        .expect("Failed to find tomopar binary")
        .args(["estimate", "--shape", "10,100,100"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0.38 MB"))
        .stdout(predicate::str::contains("400000 bytes"));
}

#[test]
fn test_estimate_json_range() {
    let output = Command::cargo_bin("tomopar")
        .expect("Failed to find tomopar binary")
        .args([
            "estimate", "--shape", "10,100,100", "--dtype", "f64", "--start", "0", "--end", "10",
            "--step", "2", "--json",
        ])
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["slice"]["bytes"], 80_000);
    assert_eq!(json["full"]["bytes"], 800_000);
    assert_eq!(json["range"]["estimate"]["bytes"], 400_000);
    assert_eq!(json["parallel_peak"]["bytes"], 1_600_000);
}

#[test]
fn test_estimate_rejects_bad_shape() {
    Command::cargo_bin("tomopar")
        .expect("Failed to find tomopar binary")
        .args(["estimate", "--shape", "10,100"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("SLICES,ROWS,COLUMNS"));
}

#[test]
fn test_estimate_rejects_unaddressable_shape() {
    Command::cargo_bin("tomopar")
        .expect("Failed to find tomopar binary")
        .args(["estimate", "--shape", "18446744073709551615,1024,1024", "--dtype", "f64"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("too large to address"))
        .stderr(predicate::str::contains("panicked").not());
}

// =============================================================================
// tomopar filters Tests
// =============================================================================

#[test]
fn test_filters_lists_builtins() {
    Command::cargo_bin("tomopar")
        .expect("Failed to find tomopar binary")
        .arg("filters")
        .assert()
        .success()
        .stdout(predicate::str::contains("gaussian"))
        .stdout(predicate::str::contains("minus_log"))
        .stdout(predicate::str::contains("in-place-2"));
}

// =============================================================================
// tomopar run Tests
// =============================================================================

#[test]
fn test_run_sequential_in_place() {
    let volume = TestVolume::new(&[1.0; 16]);

    volume
        .command()
        .args([
            "run", volume.path(), "--shape", "4,2,2", "--filter", "add", "--param", "value=2",
            "--sequential",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Completed"))
        .stdout(predicate::str::contains("4/4"));

    assert_eq!(read_f32(&volume.path), vec![3.0; 16]);
    assert_eq!(volume.segments_left(), 0);
}

#[test]
fn test_run_writes_output_and_json_report() {
    let volume = TestVolume::new(&[2.0; 24]);
    let output_path = volume.sibling("scaled.raw");

    let output = volume
        .command()
        .args([
            "run", volume.path(), "--shape", "6,2,2", "--filter", "scale", "-p", "factor=1.5",
            "--cores", "2", "--chunk-size", "2", "--json", "--output",
        ])
        .arg(&output_path)
        .output()
        .expect("Failed to execute command");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "tomopar run should succeed. stderr: {}", stderr);

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["slices_processed"], 6);
    assert_eq!(read_f32(&output_path), vec![3.0; 24]);
    assert_eq!(read_f32(&volume.path), vec![2.0; 24]);
    assert_eq!(volume.segments_left(), 0);
}

#[test]
fn test_run_with_counts() {
    let volume = TestVolume::new(&[8.0; 8]);
    let counts = volume.sibling("counts.txt");
    fs::write(&counts, "100 200\n400 50\n").unwrap();

    volume
        .command()
        .args(["run", volume.path(), "--shape", "4,1,2", "--filter", "divide_by_counts", "--sequential", "--counts"])
        .arg(&counts)
        .assert()
        .success();

    assert_eq!(read_f32(&volume.path), vec![8.0, 8.0, 4.0, 4.0, 2.0, 2.0, 16.0, 16.0]);
}

#[test]
fn test_run_unknown_filter_shows_hint() {
    let volume = TestVolume::new(&[0.0; 4]);

    volume
        .command()
        .args(["run", volume.path(), "--shape", "1,2,2", "--filter", "sharpen"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown operation: sharpen"))
        .stderr(predicate::str::contains("tomopar filters"));
}

#[test]
fn test_run_bad_parameter() {
    let volume = TestVolume::new(&[0.0; 4]);

    volume
        .command()
        .args([
            "run", volume.path(), "--shape", "1,2,2", "--filter", "add", "--param", "value={\"a\":1}",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported parameter `value`"));
}

#[test]
fn test_run_failing_filter_reports_slice() {
    let volume = TestVolume::new(&[0.0; 12]);

    volume
        .command()
        .args([
            "run", volume.path(), "--shape", "3,2,2", "--filter", "fail_on_slice", "--param", "index=1",
            "--sequential",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed at slice 1"));

    assert_eq!(read_f32(&volume.path), vec![0.0; 12]);
    assert_eq!(volume.segments_left(), 0);
}

#[test]
fn test_run_size_mismatch() {
    let volume = TestVolume::new(&[0.0; 5]);

    volume
        .command()
        .args(["run", volume.path(), "--shape", "2,2,2", "--filter", "minus_log"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("needs 32"));
}

#[test]
fn test_run_rejects_unaddressable_shape() {
    let volume = TestVolume::new(&[0.0; 4]);

    volume
        .command()
        .args(["run", volume.path(), "--shape", "18446744073709551615,1024,1024", "--filter", "add"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("too large to address"))
        .stderr(predicate::str::contains("panicked").not());
}
