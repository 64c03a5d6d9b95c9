use codespan_reporting::diagnostic::{Diagnostic, Label};
use thiserror::Error;

use crate::source::{ByteRange, FileId};
use crate::types::{Value, ValueType};

/// Compilation errors. Every error aborts the current compilation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("`{name}` is already declared in this scope")]
    DuplicateDeclaration { range: ByteRange, name: String },
    #[error("cannot find variable `{name}` in scope")]
    UndefinedVariable {
        range: ByteRange,
        name: String,
        suggestion: Option<String>,
    },
    #[error("cannot find function `{name}`")]
    UndefinedFunction {
        range: ByteRange,
        name: String,
        suggestion: Option<String>,
    },
    #[error("no field `{field}` on type `{value_type}`")]
    UndefinedField {
        range: ByteRange,
        value_type: ValueType,
        field: String,
        suggestion: Option<String>,
    },
    #[error("cannot find type `{name}`")]
    UndefinedType {
        range: ByteRange,
        name: String,
        suggestion: Option<String>,
    },
    #[error("cannot find module `{name}`")]
    UndefinedModule {
        range: ByteRange,
        name: String,
        suggestion: Option<String>,
    },
    #[error("unable to resolve call `{signature}`")]
    UnresolvedCall { range: ByteRange, signature: String },
    #[error("cannot convert type `{found}` to `{expected}`")]
    MismatchedTypes {
        range: ByteRange,
        found: ValueType,
        expected: ValueType,
    },
    #[error("default value `{value}` does not fit type `{value_type}`")]
    MismatchedDefault {
        range: ByteRange,
        value: Value,
        value_type: ValueType,
    },
    #[error("output `{name}` has conflicting types `{first}` and `{second}`")]
    ConflictingOutputTypes {
        range: ByteRange,
        first_range: ByteRange,
        name: String,
        first: ValueType,
        second: ValueType,
    },
    #[error("`return` outside of the top level of a function body")]
    MisplacedReturn { range: ByteRange },
    #[error("call to `{name}` does not return a value")]
    MissingReturnValue { range: ByteRange, name: String },
    #[error("cannot infer the type of `{name}`")]
    MissingTypeAnnotation { range: ByteRange, name: String },
    #[error("recursive call to `{name}`")]
    RecursiveCall { range: ByteRange, name: String },
}

impl CompileError {
    pub fn range(&self) -> ByteRange {
        match self {
            CompileError::DuplicateDeclaration { range, .. }
            | CompileError::UndefinedVariable { range, .. }
            | CompileError::UndefinedFunction { range, .. }
            | CompileError::UndefinedField { range, .. }
            | CompileError::UndefinedType { range, .. }
            | CompileError::UndefinedModule { range, .. }
            | CompileError::UnresolvedCall { range, .. }
            | CompileError::MismatchedTypes { range, .. }
            | CompileError::MismatchedDefault { range, .. }
            | CompileError::ConflictingOutputTypes { range, .. }
            | CompileError::MisplacedReturn { range }
            | CompileError::MissingReturnValue { range, .. }
            | CompileError::MissingTypeAnnotation { range, .. }
            | CompileError::RecursiveCall { range, .. } => *range,
        }
    }

    pub fn suggestion(&self) -> Option<&str> {
        match self {
            CompileError::UndefinedVariable { suggestion, .. }
            | CompileError::UndefinedFunction { suggestion, .. }
            | CompileError::UndefinedField { suggestion, .. }
            | CompileError::UndefinedType { suggestion, .. }
            | CompileError::UndefinedModule { suggestion, .. } => suggestion.as_deref(),
            _ => None,
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic<FileId> {
        let primary_label = |range: &ByteRange| Label::primary(range.file_id(), *range);
        let secondary_label = |range: &ByteRange| Label::secondary(range.file_id(), *range);

        let labels = match self {
            CompileError::DuplicateDeclaration { range, .. } => {
                vec![primary_label(range).with_message("redeclared here")]
            }
            CompileError::UndefinedVariable { range, .. } => {
                vec![primary_label(range).with_message("unbound name")]
            }
            CompileError::UndefinedFunction { range, .. } => {
                vec![primary_label(range).with_message("unknown function")]
            }
            CompileError::UndefinedField {
                range, value_type, ..
            } => vec![primary_label(range).with_message(format!("expression of type {value_type}"))],
            CompileError::UndefinedType { range, .. } => {
                vec![primary_label(range).with_message("unknown type")]
            }
            CompileError::UndefinedModule { range, .. } => {
                vec![primary_label(range).with_message("unknown module")]
            }
            CompileError::UnresolvedCall { range, .. } => {
                vec![primary_label(range).with_message("no matching overload")]
            }
            CompileError::MismatchedTypes {
                range, expected, ..
            } => vec![primary_label(range).with_message(format!("expected {expected}"))],
            CompileError::MismatchedDefault { range, .. } => vec![primary_label(range)],
            CompileError::ConflictingOutputTypes {
                range,
                first_range,
                first,
                second,
                ..
            } => vec![
                primary_label(range).with_message(format!("emitted as {second}")),
                secondary_label(first_range).with_message(format!("first emitted as {first}")),
            ],
            CompileError::MisplacedReturn { range } => {
                vec![primary_label(range).with_message("unexpected return")]
            }
            CompileError::MissingReturnValue { range, .. } => {
                vec![primary_label(range).with_message("used as a value here")]
            }
            CompileError::MissingTypeAnnotation { range, .. } => {
                vec![primary_label(range).with_message("needs a type or an initializer")]
            }
            CompileError::RecursiveCall { range, .. } => {
                vec![primary_label(range).with_message("function is already being inlined")]
            }
        };

        let notes = match (self, self.suggestion()) {
            (_, Some(suggestion)) => vec![format!("help: did you mean `{suggestion}`?")],
            (CompileError::RecursiveCall { .. }, None) => {
                vec!["recursion cannot be expanded statically".to_owned()]
            }
            (_, None) => Vec::new(),
        };

        Diagnostic::error()
            .with_message(self.to_string())
            .with_labels(labels)
            .with_notes(notes)
    }
}

/// The closest of `candidates` to a misspelled `name`.
pub fn suggest_name<'a>(name: &str, candidates: impl IntoIterator<Item = &'a str>) -> Option<String> {
    (candidates.into_iter())
        .filter_map(|candidate| {
            let distance = levenshtein::levenshtein(name, candidate);
            (distance > 0 && distance <= 2).then_some((distance, candidate))
        })
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, candidate)| candidate.to_owned())
}
