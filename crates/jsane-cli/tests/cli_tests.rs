/*!
# CLI Tests

Runs the `jsane` binary against files in a temporary directory.
*/

use std::fs;
use std::process::Command;

use pretty_assertions::assert_eq;

fn jsane() -> Command {
    Command::new(env!("CARGO_BIN_EXE_jsane"))
}

#[test]
fn test_writes_instrumented_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in.js");
    let output = dir.path().join("out.js");
    fs::write(&input, "x = a + b;\n")?;

    let status = jsane()
        .arg(&input)
        .arg("-o")
        .arg(&output)
        .args(["--linkage", "none", "--hook-name", "R"])
        .status()?;
    assert!(status.success());

    let code = fs::read_to_string(&output)?;
    assert!(code.contains("R.arithmeticCheck("));
    assert!(code.contains("R.assign("));
    assert!(!code.contains("require("));
    Ok(())
}

#[test]
fn test_prints_to_stdout_with_require_linkage() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in.js");
    fs::write(&input, "f();\n")?;

    let result = jsane().arg(&input).args(["--module", "./jsane-runtime"]).output()?;
    assert!(result.status.success());
    let stdout = String::from_utf8(result.stdout)?;
    assert!(stdout.starts_with("var __rt = require(\"./jsane-runtime\").runtime;"));
    Ok(())
}

#[test]
fn test_config_file_and_embedded_runtime() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in.js");
    let runtime = dir.path().join("runtime.js");
    let config = dir.path().join("jsane.json");
    fs::write(&input, "y = 1;\n")?;
    fs::write(&runtime, "exports.runtime = {};")?;
    fs::write(&config, r#"{"instrument": {"linkage": "embed", "hook_variable_name": "H"}}"#)?;

    let result = jsane()
        .arg(&input)
        .arg("--config")
        .arg(&config)
        .arg("--runtime")
        .arg(&runtime)
        .output()?;
    assert!(result.status.success());
    let stdout = String::from_utf8(result.stdout)?;
    assert!(stdout.starts_with("var H = (typeof H !== \"undefined\") ? H : (function (exports) {\nexports.runtime = {};"));
    Ok(())
}

#[test]
fn test_diagnostics_go_to_stderr() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in.js");
    fs::write(&input, "f(...xs);\n")?;

    let result = jsane().arg(&input).args(["--linkage", "none"]).output()?;
    assert!(result.status.success());
    assert_eq!(String::from_utf8(result.stdout)?, "f(...xs);\n");
    assert!(String::from_utf8(result.stderr)?.contains("warning: "));
    Ok(())
}

#[test]
fn test_fatal_errors_fail_the_run() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("bad.js");
    fs::write(&input, "var = ;\n")?;

    let result = jsane().arg(&input).output()?;
    assert!(!result.status.success());
    assert!(String::from_utf8(result.stderr)?.contains("parse error"));

    let missing = jsane().arg(dir.path().join("missing.js")).output()?;
    assert!(!missing.status.success());

    let embed_without_runtime = jsane().arg(&input).args(["--linkage", "embed"]).output()?;
    assert!(!embed_without_runtime.status.success());
    Ok(())
}
