//! `mapspec` CLI: generate | ir | schema | fingerprint | validate
use std::path::{Path, PathBuf};
use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use rayon::prelude::*;

use mapspec_compiler::codegen::GeneratorOptions;
use mapspec_compiler::diagnostics::{has_errors, Diagnostic, DiagnosticSink, NullSink, Severity};
use mapspec_compiler::mapspec::{MapSpec, Side};
use mapspec_compiler::pipeline::{self, Compilation};
use mapspec_compiler::reference::{DirectoryResolver, NoResolver, SchemaResolver};

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

/// compile visual-mapper MapSpec files into C# and JSONata
#[derive(Parser, Debug)]
pub struct CommandLineInterface {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// generate C# and/or JSONata for each MapSpec
    Generate(GenerateOut),
    /// print the lowered MapperIR as JSON
    Ir(IrOut),
    /// print a part's resolved schema, tree, or terminals
    Schema(SchemaOut),
    /// print the key-order independent fingerprint of JSON schema files
    Fingerprint(FingerprintOut),
    /// check MapSpec files; exits non-zero when any error is found
    Validate(ValidateOut),
}

#[derive(Args, Debug, Clone)]
struct InputSettings {
    /// One or more inputs. May be literal paths or quoted glob patterns
    #[arg(long, short, num_args = 1.., required = true)]
    input: Vec<String>,

    /// root of `<domain>/<flow>/<key>@<version>.json` files for referenced schemas
    #[arg(long)]
    schemas_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    Both,
    Structural,
    Declarative,
}

#[derive(clap::Parser, Debug)]
struct GenerateOut {
    #[command(flatten)]
    input_settings: InputSettings,

    /// generator options JSON (class name, method name, indent, structural style, ...)
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Backend::Both)]
    backend: Backend,

    /// output directory for `<stem>.cs` / `<stem>.jsonata` (stdout if omitted)
    #[arg(short, long)]
    out_dir: Option<PathBuf>,
}

#[derive(clap::Parser, Debug)]
struct IrOut {
    #[command(flatten)]
    input_settings: InputSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SchemaView {
    Resolved,
    Tree,
    Terminals,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SideArg {
    Source,
    Target,
}

#[derive(clap::Parser, Debug)]
struct SchemaOut {
    #[command(flatten)]
    input_settings: InputSettings,

    #[arg(long, value_enum, default_value_t = SideArg::Source)]
    side: SideArg,

    /// only this part (all parts if omitted)
    #[arg(long)]
    part: Option<String>,

    #[arg(long, value_enum, default_value_t = SchemaView::Terminals)]
    view: SchemaView,

    /// skip schema overlays
    #[arg(long)]
    no_overlays: bool,

    /// do not print diagnostics
    #[arg(long, short)]
    quiet: bool,
}

#[derive(clap::Parser, Debug)]
struct FingerprintOut {
    /// JSON schema files (literal paths or quoted glob patterns)
    #[arg(long, short, num_args = 1.., required = true)]
    input: Vec<String>,
}

#[derive(clap::Parser, Debug)]
struct ValidateOut {
    #[command(flatten)]
    input_settings: InputSettings,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl InputSettings {
    fn paths(&self) -> anyhow::Result<Vec<PathBuf>> {
        resolve_file_path_patterns(&self.input).context("failed to resolve input file paths")
    }

    fn resolver(&self) -> Box<dyn SchemaResolver + Send + Sync> {
        match &self.schemas_dir {
            Some(dir) => Box::new(DirectoryResolver::new(dir)),
            None => Box::new(NoResolver),
        }
    }
}

impl From<SideArg> for Side {
    fn from(side: SideArg) -> Self {
        match side {
            SideArg::Source => Side::Source,
            SideArg::Target => Side::Target,
        }
    }
}

impl CommandLineInterface {
    pub fn load() -> Self {
        Self::parse()
    }

    pub fn run(&self) -> anyhow::Result<()> {
        match &self.cmd {
            Command::Generate(target) => target.run(),
            Command::Ir(target) => {
                let resolver = target.input_settings.resolver();
                for path in target.input_settings.paths()? {
                    let spec = load_spec(&path)?;
                    let mut diagnostics: Vec<Diagnostic> = Vec::new();
                    let ir = pipeline::lower_spec(&spec, resolver.as_ref(), &mut diagnostics)
                        .with_context(|| format!("failed to lower {}", path.display()))?;
                    report(&path, &diagnostics);
                    println!("{}", ir.to_json_pretty());
                }
                Ok(())
            }
            Command::Schema(target) => target.run(),
            Command::Fingerprint(target) => {
                for path in resolve_file_path_patterns(&target.input)? {
                    let source = std::fs::read_to_string(&path)
                        .with_context(|| format!("failed to read {}", path.display()))?;
                    let schema: serde_json::Value = serde_json::from_str(&source)
                        .with_context(|| format!("failed to parse JSON {}", path.display()))?;
                    println!("{}  {}", mapspec_compiler::fingerprint::fingerprint(&schema), path.display());
                }
                Ok(())
            }
            Command::Validate(target) => {
                let mut failed = 0usize;
                for path in target.input_settings.paths()? {
                    let spec = load_spec(&path)?;
                    let diagnostics = mapspec_compiler::validate::validate(&spec);
                    report(&path, &diagnostics);
                    if has_errors(&diagnostics) {
                        failed += 1;
                    } else {
                        eprintln!("{} {}", "ok".green().bold(), path.display());
                    }
                }
                if failed > 0 {
                    bail!("{failed} MapSpec file(s) failed validation");
                }
                Ok(())
            }
        }
    }
}

impl GenerateOut {
    fn run(&self) -> anyhow::Result<()> {
        let options = match &self.config {
            Some(path) => GeneratorOptions::from_file(path)?,
            None => GeneratorOptions::default(),
        };
        let resolver = self.input_settings.resolver();
        let paths = self.input_settings.paths()?;

        // Compilation is pure; only the reporting and writing below is ordered.
        let results: Vec<(PathBuf, anyhow::Result<Compilation>)> = paths
            .into_par_iter()
            .map(|path| {
                let result = load_spec(&path).and_then(|spec| {
                    pipeline::compile(&spec, resolver.as_ref(), &options)
                        .with_context(|| format!("failed to compile {}", path.display()))
                });
                (path, result)
            })
            .collect();

        for (path, result) in results {
            let compilation = result?;
            report(&path, &compilation.diagnostics);
            let stem = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_else(|| "mapper".into());
            if matches!(self.backend, Backend::Both | Backend::Structural) {
                self.emit(&stem, "cs", &compilation.structural)?;
            }
            if matches!(self.backend, Backend::Both | Backend::Declarative) {
                self.emit(&stem, "jsonata", &compilation.declarative)?;
            }
        }
        Ok(())
    }

    fn emit(&self, stem: &str, extension: &str, source: &str) -> anyhow::Result<()> {
        match &self.out_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
                let out = dir.join(format!("{stem}.{extension}"));
                std::fs::write(&out, source).with_context(|| format!("failed to write {}", out.display()))?;
                tracing::info!(path = %out.display(), "wrote generated source");
            }
            None => print!("{source}"),
        }
        Ok(())
    }
}

impl SchemaOut {
    fn run(&self) -> anyhow::Result<()> {
        let resolver = self.input_settings.resolver();
        for path in self.input_settings.paths()? {
            let spec = load_spec(&path)?;
            let mut diagnostics: Vec<Diagnostic> = Vec::new();
            let mut silenced = NullSink;
            let sink: &mut dyn DiagnosticSink = if self.quiet { &mut silenced } else { &mut diagnostics };
            let parts = pipeline::prepare_side(&spec, self.side.into(), resolver.as_ref(), !self.no_overlays, sink)?;
            report(&path, &diagnostics);
            for part in parts.iter().filter(|p| self.part.as_ref().is_none_or(|name| &p.name == name)) {
                let view = match self.view {
                    SchemaView::Resolved => serde_json::to_string_pretty(&part.schema)?,
                    SchemaView::Tree => serde_json::to_string_pretty(&part.tree)?,
                    SchemaView::Terminals => serde_json::to_string_pretty(&part.terminals)?,
                };
                println!("{view}");
            }
        }
        Ok(())
    }
}

// ————————————————————————————————————————————————————————————————————————————
// INTERNAL HELPERS
// ————————————————————————————————————————————————————————————————————————————

fn load_spec(path: &Path) -> anyhow::Result<MapSpec> {
    MapSpec::from_file(path).with_context(|| format!("failed to load MapSpec {}", path.display()))
}

fn report(path: &Path, diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        let severity = match diagnostic.severity {
            Severity::Error => "error".red().bold(),
            Severity::Warning => "warning".yellow().bold(),
            Severity::Info => "info".blue(),
        };
        let location = match &diagnostic.path {
            Some(at) => format!(" at {at}"),
            None => String::new(),
        };
        eprintln!(
            "{severity}[{}] {}: {}{}",
            diagnostic.code,
            path.display(),
            diagnostic.message,
            location.dimmed()
        );
    }
}

fn resolve_file_path_patterns<I>(patterns: I) -> anyhow::Result<Vec<PathBuf>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    fn has_glob_chars(s: &str) -> bool {
        s.bytes().any(|b| matches!(b, b'*' | b'?' | b'[' | b'{'))
    }

    let mut out = Vec::<PathBuf>::new();

    for raw in patterns {
        let pattern = raw.as_ref();

        if has_glob_chars(pattern) {
            let mut matched_any = false;
            for entry in glob::glob(pattern)? {
                out.push(entry?);
                matched_any = true;
            }
            if !matched_any {
                // An explicit glob that matches nothing is almost always a typo.
                bail!("glob pattern matched no files: {pattern}");
            }
        } else {
            out.push(PathBuf::from(pattern));
        }
    }

    Ok(out)
}
