//! MapSpec compiler: schema composition and overlays, graph lowering to
//! MapperIR, and C# / JSONata code generation.
pub mod codegen;
pub mod diagnostics;
pub mod error;
pub mod fingerprint;
pub mod ir;
pub mod lower;
pub mod mapspec;
pub mod path_de;
pub mod pipeline;
pub mod reference;
pub mod schema;
pub mod validate;

pub use diagnostics::{Diagnostic, DiagnosticSink, Severity};
pub use error::MapSpecError;
pub use ir::MapperIr;
pub use mapspec::MapSpec;
pub use pipeline::{compile, Compilation};
