use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;

use alchemist_core::compile;
use alchemist_runtime::{Session, SessionConfig};

/// Compile an Alloy source file to a portable module.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Source file to compile (.aly).
    input: PathBuf,

    #[arg(
        short,
        long,
        value_name = "PATH",
        help = "Artifact path (defaults to the input with a .wat extension)"
    )]
    output: Option<PathBuf>,

    #[arg(long, help = "Instantiate the compiled module and invoke its exported main")]
    run: bool,

    #[arg(long, default_value_t = 2, value_name = "PAGES")]
    initial_pages: u32,

    #[arg(long, default_value_t = 64, value_name = "PAGES")]
    max_pages: u32,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    execute(cli)
}

fn execute(cli: Cli) -> Result<()> {
    let config = SessionConfig {
        initial_pages: cli.initial_pages,
        max_pages: cli.max_pages,
        ..SessionConfig::default()
    };

    let source = fs::read_to_string(&cli.input)
        .with_context(|| format!("failed to read input file {}", cli.input.display()))?;

    // Compile first: on failure nothing is written, not even a stub.
    let artifact = compile(&source, &config.compile_options())?;

    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| cli.input.with_extension("wat"));
    write_output(&output, artifact.module_text.as_bytes())?;
    println!("Compiled {} -> {}", cli.input.display(), output.display());

    if cli.run {
        let mut session = Session::new(&config)?;
        let instance = session.instantiate(&artifact)?;
        let result = session.run_main(&instance)?;
        println!("Program exited with {result}");
        flush_written_files(&session)?;
    }

    Ok(())
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
    }
    fs::write(path, bytes)
        .with_context(|| format!("failed to write output file {}", path.display()))?;
    Ok(())
}

/// Files the module emitted through the bridge's write_file callback
/// land on disk once the run finishes cleanly.
fn flush_written_files(session: &Session) -> Result<()> {
    for file in &session.host().files {
        write_output(Path::new(&file.path), &file.contents)?;
        println!("Wrote {}", file.path);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_cmd::Command;
    use predicates::prelude::*;
    use tempfile::tempdir;

    fn cli() -> Command {
        Command::cargo_bin("alchemist-cli").expect("binary exists")
    }

    #[test]
    fn compiles_to_a_sibling_wat_artifact() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("add.aly");
        fs::write(&input, "export fn add(a: i32, b: i32) -> i32 { return a + b; }")
            .expect("write input");

        cli()
            .arg(&input)
            .assert()
            .success()
            .stdout(predicate::str::contains("Compiled"));

        let artifact = dir.path().join("add.wat");
        let text = fs::read_to_string(&artifact).expect("artifact written");
        assert!(text.contains("(module"));
        assert!(text.contains("add"));
    }

    #[test]
    fn honors_an_explicit_output_path() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("id.aly");
        fs::write(&input, "export fn id(x: i32) -> i32 { return x; }").expect("write input");
        let output = dir.path().join("artifacts/id.wat");

        cli()
            .arg(&input)
            .arg("--output")
            .arg(&output)
            .assert()
            .success();

        assert!(output.exists(), "artifact was not created");
    }

    #[test]
    fn runs_the_compiled_module() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("main.aly");
        fs::write(&input, "export fn main() -> i32 { return 40 + 2; }").expect("write input");

        cli()
            .arg(&input)
            .arg("--run")
            .assert()
            .success()
            .stdout(predicate::str::contains("Program exited with 42"));
    }

    #[test]
    fn flushes_files_written_by_the_module() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("emit.aly");
        fs::write(
            &input,
            "export fn main() -> i32 { write_file(\"generated.txt\", \"payload\"); return 0; }",
        )
        .expect("write input");

        cli()
            .current_dir(dir.path())
            .arg(&input)
            .arg("--run")
            .assert()
            .success()
            .stdout(predicate::str::contains("Wrote generated.txt"));

        let contents = fs::read_to_string(dir.path().join("generated.txt")).expect("flushed file");
        assert_eq!(contents, "payload");
    }

    #[test]
    fn syntax_errors_write_no_artifact() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("broken.aly");
        fs::write(&input, "fn broken( {").expect("write input");

        cli()
            .arg(&input)
            .assert()
            .failure()
            .stderr(predicate::str::contains("syntax error"));

        assert!(!dir.path().join("broken.wat").exists(), "no partial artifact");
    }

    #[test]
    fn type_errors_render_as_one_message() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("mixed.aly");
        fs::write(
            &input,
            "export fn f(a: i32, b: u32) -> i32 { return a + b; }",
        )
        .expect("write input");

        cli()
            .arg(&input)
            .assert()
            .failure()
            .stderr(predicate::str::contains("type error"));
    }

    #[test]
    fn aborting_modules_fail_the_run() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("abort.aly");
        fs::write(&input, "export fn main() -> i32 { abort(9); return 0; }")
            .expect("write input");

        cli()
            .arg(&input)
            .arg("--run")
            .assert()
            .failure()
            .stderr(predicate::str::contains("code 9"));
    }
}
