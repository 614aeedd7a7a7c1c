//! Runs every MapSpec in `fixtures/` through the compiler twice and checks
//! that both runs are byte-identical. When `<stem>.expected.jsonata` or
//! `<stem>.expected.cs` sits next to a fixture, the output must match it too.
use std::path::{Path, PathBuf};
use colored::Colorize;

use mapspec_compiler::codegen::GeneratorOptions;
use mapspec_compiler::mapspec::MapSpec;
use mapspec_compiler::pipeline::compile;
use mapspec_compiler::reference::NoResolver;

fn fixtures_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("fixtures")
}

fn run_fixture(path: &Path) -> Result<Vec<String>, String> {
    let spec = MapSpec::from_file(path).map_err(|e| e.to_string())?;
    let options = GeneratorOptions::default();
    let first = compile(&spec, &NoResolver, &options).map_err(|e| e.to_string())?;
    let second = compile(&spec, &NoResolver, &options).map_err(|e| e.to_string())?;

    let mut problems = Vec::new();
    if first.structural != second.structural {
        problems.push("structural output differs between runs".to_string());
    }
    if first.declarative != second.declarative {
        problems.push("declarative output differs between runs".to_string());
    }
    if first.ir != second.ir {
        problems.push("IR differs between runs".to_string());
    }

    for (extension, actual) in [("jsonata", &first.declarative), ("cs", &first.structural)] {
        let expected_path = path.with_extension(format!("expected.{extension}"));
        if let Ok(expected) = std::fs::read_to_string(&expected_path) {
            if &expected != actual {
                problems.push(format!("output differs from {}", expected_path.display()));
            }
        }
    }
    Ok(problems)
}

fn main() {
    let pattern = fixtures_dir().join("*.json");
    let pattern = pattern.to_string_lossy();
    let paths: Vec<PathBuf> = match glob::glob(&pattern) {
        Ok(paths) => paths.filter_map(Result::ok).collect(),
        Err(error) => {
            eprintln!("{} bad fixture pattern: {error}", "error".red().bold());
            std::process::exit(2);
        }
    };

    let mut failed = 0usize;
    for path in &paths {
        let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        match run_fixture(path) {
            Ok(problems) if problems.is_empty() => println!("{} {name}", "pass".green().bold()),
            Ok(problems) => {
                failed += 1;
                println!("{} {name}", "FAIL".red().bold());
                for problem in problems {
                    println!("    {problem}");
                }
            }
            Err(error) => {
                failed += 1;
                println!("{} {name}: {error}", "FAIL".red().bold());
            }
        }
    }

    println!("{} fixture(s), {} failed", paths.len(), failed);
    if failed > 0 {
        std::process::exit(1);
    }
}
