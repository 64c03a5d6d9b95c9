//! A language for declaring data-bound, GPU-instanced graphical marks.

use codespan_reporting::diagnostic::Diagnostic;
use indexmap::IndexMap;
use thiserror::Error;

pub mod source;
pub mod types;

pub mod intrinsics;
pub mod library;
pub mod specification;
pub mod syntax;

pub mod compiler;
pub mod eval;
pub mod flatten;

pub mod binding;
pub mod mark;
pub mod marks;
pub mod platform;
pub mod scale;
pub mod shaders;

pub mod driver;

pub use crate::compiler::{compile_expression, compile_file, CompileError};
pub use crate::driver::{Driver, Status};
pub use crate::flatten::{flatten_emits, FlattenError, FlattenedEmits};
pub use crate::intrinsics::Registry;
pub use crate::library::Library;
pub use crate::specification::Specification;
pub use crate::syntax::ParseError;

pub const BUG_REPORT_URL: &str = concat!(env!("CARGO_PKG_REPOSITORY"), "/issues/new");

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Compile(#[from] CompileError),
}

impl Error {
    pub fn to_diagnostic(&self) -> Diagnostic<source::FileId> {
        match self {
            Error::Parse(error) => error.to_diagnostic(),
            Error::Compile(error) => error.to_diagnostic(),
        }
    }
}

/// File id given to sources compiled with [`compile_string`]. Builtin library
/// modules use the ids before it.
pub const STRING_FILE_ID: source::FileId = library::SOURCES.len();

/// Parse and compile every mark and shader in `source` against the builtin
/// registry and library.
pub fn compile_string(source: &str) -> Result<IndexMap<String, Specification>, Error> {
    let file = syntax::parse_file(STRING_FILE_ID, source)?;
    let specifications = compile_file(Registry::shared(), Library::shared(), &file)?;
    Ok(specifications)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Value, ValueType};

    #[test]
    fn compiles_a_triangle_end_to_end() {
        let specs = compile_string(
            "mark Tri(p1: Vector2, p2: Vector2, p3: Vector2, color: Color = [0,0,0,1]) {
                emit [{position:p1,color:color},{position:p2,color:color},{position:p3,color:color}];
            }",
        )
        .unwrap();
        let spec = &specs["Tri"];
        assert_eq!(spec.inputs.keys().collect::<Vec<_>>(), ["p1", "p2", "p3", "color"]);
        assert_eq!(spec.inputs["color"].default, Some(Value::from([0.0, 0.0, 0.0, 1.0])));
        assert_eq!(spec.outputs["position"], ValueType::Vector2);
        assert_eq!(spec.outputs["color"], ValueType::Color);

        let flattened = flatten_emits(spec).unwrap();
        assert_eq!(flattened.count, 3);
        let inputs = IndexMap::from([
            ("p1".to_owned(), Value::from([1.0, 0.0])),
            ("p2".to_owned(), Value::from([2.0, 0.0])),
            ("p3".to_owned(), Value::from([3.0, 0.0])),
        ]);
        for index in 0..3 {
            let mut inputs = inputs.clone();
            inputs.insert(flattened.index_variable.clone(), Value::Scalar(index as f64));
            let vertices = eval::evaluate(Registry::shared(), &flattened.specification, &inputs).unwrap();
            assert_eq!(vertices.len(), 1);
            assert_eq!(vertices[0]["position"], Value::from([index as f64 + 1.0, 0.0]));
        }
    }

    #[test]
    fn errors_become_diagnostics() {
        let error = compile_string("mark M( {").unwrap_err();
        assert!(matches!(error, Error::Parse(_)));
        let error = compile_string("mark M() { let x = y; }").unwrap_err();
        let diagnostic = error.to_diagnostic();
        assert_eq!(diagnostic.labels[0].file_id, STRING_FILE_ID);
    }
}
