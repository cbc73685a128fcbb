use anyhow::Result;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

fn write_config(dir: &TempDir, source: &Path, extra: &str) -> Result<PathBuf> {
    let config_path = dir.path().join("zad1.conf");
    fs::write(
        &config_path,
        format!(
            "number_of_producers: 1\n\
             number_of_consumers: 1\n\
             pointer_array_size: 3\n\
             source_file: {:?}\n\
             magic_number_length: 3\n\
             search_mode: 0\n\
             log_mode: 0\n\
             {}",
            source.display().to_string(),
            extra
        ),
    )?;
    Ok(config_path)
}

fn write_source(dir: &TempDir) -> Result<PathBuf> {
    let source = dir.path().join("lines.txt");
    fs::write(&source, "ab\nabcdef\nabc\n")?;
    Ok(source)
}

fn ringscan(dir: &TempDir) -> Result<Command> {
    let mut cmd = Command::cargo_bin("ringscan-cli")?;
    cmd.current_dir(dir.path())
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG");
    Ok(cmd)
}

#[test]
fn test_reports_match() -> Result<()> {
    let dir = tempdir()?;
    let source = write_source(&dir)?;
    let config = write_config(&dir, &source, "nk: 5\n")?;

    ringscan(&dir)?
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("CONSUMER: Found at index: 2\nabc\n"))
        .stdout(predicate::str::contains("abcdef").not())
        .stdout(predicate::str::contains("producing at index").not());
    Ok(())
}

#[test]
fn test_verbose_traces_slots() -> Result<()> {
    let dir = tempdir()?;
    let source = write_source(&dir)?;
    let config = write_config(&dir, &source, "nk: 5\n")?;

    ringscan(&dir)?
        .arg(&config)
        .arg("--verbose")
        .assert()
        .success()
        .stdout(predicate::str::contains("PRODUCER 0: I have been created"))
        .stdout(predicate::str::contains("PRODUCER: producing at index 0"))
        .stdout(predicate::str::contains("CONSUMER: consuming at index 2"))
        .stdout(predicate::str::contains("CONSUMER 0: I am done"));
    Ok(())
}

#[test]
fn test_summary_formats() -> Result<()> {
    let dir = tempdir()?;
    let source = write_source(&dir)?;
    let config = write_config(&dir, &source, "nk: 5\n")?;

    ringscan(&dir)?
        .arg(&config)
        .args(["--summary", "text"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Read 3 lines, consumed 3, 1 matched, 0 left in buffer",
        ));

    ringscan(&dir)?
        .arg(&config)
        .args(["--summary", "json", "-c", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"lines_read\": 3"))
        .stdout(predicate::str::contains("\"cancelled\": null"));
    Ok(())
}

#[test]
fn test_print_config_applies_overrides() -> Result<()> {
    let dir = tempdir()?;
    let source = write_source(&dir)?;
    let config = write_config(&dir, &source, "")?;

    ringscan(&dir)?
        .arg(&config)
        .args(["--print-config", "-p", "4", "-s", "16", "-t", "90s"])
        .assert()
        .success()
        .stdout(predicate::str::contains("number_of_producers: 4"))
        .stdout(predicate::str::contains("pointer_array_size: 16"))
        .stdout(predicate::str::contains("nk: 90"))
        .stdout(predicate::str::contains("Found at index").not());
    Ok(())
}

#[test]
fn test_largest_deadline_runs_to_end_of_input() -> Result<()> {
    let dir = tempdir()?;
    let source = write_source(&dir)?;
    let config = write_config(&dir, &source, "nk: 18446744073709551615\n")?;

    ringscan(&dir)?
        .arg(&config)
        .args(["--summary", "text"])
        .timeout(std::time::Duration::from_secs(20))
        .assert()
        .success()
        .stdout(predicate::str::contains("CONSUMER: Found at index: 2\nabc\n"))
        .stdout(predicate::str::contains("(cancelled").not());
    Ok(())
}

#[test]
fn test_missing_config_fails() -> Result<()> {
    let dir = tempdir()?;

    ringscan(&dir)?
        .arg("no-such.conf")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"))
        .stderr(predicate::str::contains("no-such.conf"));
    Ok(())
}

#[test]
fn test_missing_source_fails() -> Result<()> {
    let dir = tempdir()?;
    let config = write_config(&dir, &dir.path().join("absent.txt"), "nk: 5\n")?;

    ringscan(&dir)?
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("File not found"));
    Ok(())
}

#[test]
fn test_invalid_capacity_fails() -> Result<()> {
    let dir = tempdir()?;
    let source = write_source(&dir)?;
    let config = write_config(&dir, &source, "nk: 5\n")?;

    ringscan(&dir)?
        .arg(&config)
        .args(["--capacity", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("pointer_array_size must be at least 2"));
    Ok(())
}

#[cfg(unix)]
#[test]
fn test_deadline_stops_endless_source() -> Result<()> {
    let dir = tempdir()?;
    let config_path = dir.path().join("endless.yaml");
    fs::write(
        &config_path,
        "number_of_producers: 2\n\
         number_of_consumers: 2\n\
         pointer_array_size: 8\n\
         source_file: /dev/urandom\n\
         magic_number_length: 100000\n\
         search_mode: 1\n\
         log_mode: 0\n\
         nk: 60\n",
    )?;

    ringscan(&dir)?
        .arg(&config_path)
        .args(["--deadline", "1s", "--summary", "text"])
        .timeout(std::time::Duration::from_secs(20))
        .assert()
        .success()
        .stdout(predicate::str::contains("deadline reached - cancelling all workers"))
        .stdout(predicate::str::contains("(cancelled: deadline)"));
    Ok(())
}

#[cfg(unix)]
#[test]
fn test_deadline_stops_source_without_newlines() -> Result<()> {
    let dir = tempdir()?;
    let config_path = dir.path().join("zero.yaml");
    fs::write(
        &config_path,
        "number_of_producers: 1\n\
         number_of_consumers: 1\n\
         pointer_array_size: 4\n\
         source_file: /dev/zero\n\
         magic_number_length: 1\n\
         search_mode: -1\n\
         log_mode: 0\n\
         nk: 1\n",
    )?;

    ringscan(&dir)?
        .arg(&config_path)
        .args(["--summary", "text"])
        .timeout(std::time::Duration::from_secs(20))
        .assert()
        .success()
        .stdout(predicate::str::contains("(cancelled: deadline)"));
    Ok(())
}
