use codespan_reporting::diagnostic::{Diagnostic, Severity};
use codespan_reporting::files::{Files, SimpleFiles};
use codespan_reporting::term::termcolor::{BufferedStandardStream, ColorChoice, WriteColor};
use indexmap::IndexMap;
use pretty::RcDoc;
use std::cell::RefCell;
use std::io::{Read, Write};
use std::path::Path;

use crate::eval::{self, EvalError};
use crate::flatten::FlattenError;
use crate::source::FileId;
use crate::specification::pretty::Context as PrettyContext;
use crate::{library, syntax, Library, Registry, Specification, BUG_REPORT_URL};

#[derive(Debug, Copy, Clone)]
pub enum Status {
    Ok,
    Error,
}

impl Status {
    pub fn exit_code(self) -> i32 {
        match self {
            Status::Ok => 0,
            Status::Error => 1,
        }
    }
}

fn color_choice(stream: atty::Stream) -> ColorChoice {
    if atty::is(stream) {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    }
}

pub struct Driver {
    files: SimpleFiles<String, String>,

    seen_errors: RefCell<bool>,
    codespan_config: codespan_reporting::term::Config,
    diagnostic_writer: RefCell<Box<dyn WriteColor>>,

    emit_width: usize,
    emit_writer: RefCell<Box<dyn WriteColor>>,
}

impl Driver {
    pub fn new() -> Driver {
        let mut files = SimpleFiles::new();
        // Builtin modules are parsed with their index as the file id
        for (name, source) in library::SOURCES {
            files.add(format!("<{name}>"), source.to_string());
        }

        Driver {
            files,

            seen_errors: RefCell::new(false),
            codespan_config: codespan_reporting::term::Config::default(),
            diagnostic_writer: RefCell::new(Box::new(BufferedStandardStream::stderr(color_choice(
                atty::Stream::Stderr,
            )))),

            emit_width: usize::MAX,
            emit_writer: RefCell::new(Box::new(BufferedStandardStream::stdout(color_choice(
                atty::Stream::Stdout,
            )))),
        }
    }

    /// Setup a global panic hook
    pub fn install_panic_hook(&self) {
        // Use the currently set codespan configuration
        let term_config = self.codespan_config.clone();
        // Fetch the default hook (which prints the panic message and an optional backtrace)
        let default_hook = std::panic::take_hook();

        std::panic::set_hook(Box::new(move |info| {
            let location = info.location();
            let message = if let Some(message) = info.payload().downcast_ref::<String>() {
                message.as_str()
            } else if let Some(message) = info.payload().downcast_ref::<&str>() {
                message
            } else {
                "unknown panic type"
            };

            let diagnostic = Diagnostic::bug()
                .with_message(format!("compiler panicked at '{message}'"))
                .with_notes(vec![
                    match location {
                        Some(location) => format!("panicked at: {location}"),
                        None => "panicked at: unknown location".to_owned(),
                    },
                    format!("please file a bug report at: {BUG_REPORT_URL}"),
                ]);

            let mut writer = BufferedStandardStream::stderr(color_choice(atty::Stream::Stderr));
            let dummy_files = SimpleFiles::<String, String>::new();

            default_hook(info);
            eprintln!();
            // Nothing else can be reported if stderr is gone
            let _ = codespan_reporting::term::emit(&mut writer, &term_config, &dummy_files, &diagnostic);
        }));
    }

    /// Set the writer to use when rendering diagnostics
    pub fn set_diagnostic_writer(&mut self, stream: impl 'static + WriteColor) {
        self.diagnostic_writer = RefCell::new(Box::new(stream) as Box<dyn WriteColor>);
    }

    /// Set the width to use when emitting specifications and vertices
    pub fn set_emit_width(&mut self, emit_width: usize) {
        self.emit_width = emit_width;
    }

    /// Set the writer to use when emitting specifications and vertices
    pub fn set_emit_writer(&mut self, stream: impl 'static + WriteColor) {
        self.emit_writer = RefCell::new(Box::new(stream) as Box<dyn WriteColor>);
    }

    /// Load a source string into the file database.
    pub fn load_source_string(&mut self, name: String, source: String) -> FileId {
        self.files.add(name, source)
    }

    /// Load a source file into the file database using a reader.
    pub fn load_source(&mut self, name: String, mut reader: impl Read) -> Option<FileId> {
        let mut source = String::new();
        match reader.read_to_string(&mut source) {
            Ok(_) => Some(self.load_source_string(name, source)),
            Err(error) => {
                self.emit_read_diagnostic(name, error);
                None
            }
        }
    }

    /// Load a source file into the file database from the given path.
    pub fn load_source_path(&mut self, path: &Path) -> Option<FileId> {
        match std::fs::File::open(path) {
            Ok(file) => self.load_source(path.display().to_string(), file),
            Err(error) => {
                self.emit_read_diagnostic(path.display(), error);
                None
            }
        }
    }

    /// Parse and compile a file, reporting any errors.
    pub fn check(&mut self, file_id: FileId) -> Status {
        match self.compile(file_id) {
            Some(_) => self.status(),
            None => Status::Error,
        }
    }

    /// Compile a file and print each specification, or only the one named
    /// `mark`.
    pub fn compile_and_emit(&mut self, file_id: FileId, mark: Option<&str>, flatten: bool) -> Status {
        let Some(specifications) = self.compile(file_id) else {
            return Status::Error;
        };
        let Some(specifications) = self.select(specifications, mark) else {
            return Status::Error;
        };

        let pp = PrettyContext::new();
        for (name, specification) in &specifications {
            if flatten {
                let flattened = match crate::flatten_emits(specification) {
                    Ok(flattened) => flattened,
                    Err(error) => {
                        self.emit_flatten_diagnostic(name, error);
                        return Status::Error;
                    }
                };
                self.emit_doc(RcDoc::text(format!(
                    "// {} emits, indexed by `{}`",
                    flattened.count, flattened.index_variable,
                )));
                self.emit_doc(pp.specification(name, &flattened.specification));
            } else {
                self.emit_doc(pp.specification(name, specification));
            }
        }
        self.status()
    }

    /// Flatten the specification named `mark` and evaluate it at each vertex
    /// index. Inputs take their declared defaults, or the default value of
    /// their type.
    pub fn eval_and_emit(&mut self, file_id: FileId, mark: &str) -> Status {
        let Some(specifications) = self.compile(file_id) else {
            return Status::Error;
        };
        let selected = self.select(specifications, Some(mark));
        let Some((name, specification)) = selected.and_then(|mut selected| selected.pop()) else {
            return Status::Error;
        };

        let flattened = match crate::flatten_emits(&specification) {
            Ok(flattened) => flattened,
            Err(error) => {
                self.emit_flatten_diagnostic(&name, error);
                return Status::Error;
            }
        };
        let mut inputs = IndexMap::new();
        for (input_name, input) in &flattened.specification.inputs {
            match input.default.clone().or_else(|| input.r#type.default_value()) {
                Some(value) => {
                    inputs.insert(input_name.clone(), value);
                }
                None => {
                    self.emit_eval_diagnostic(&name, EvalError::MissingInput(input_name.clone()));
                    return Status::Error;
                }
            }
        }

        let pp = PrettyContext::new();
        for index in 0..flattened.count {
            inputs.insert(flattened.index_variable.clone(), (index as f64).into());
            match eval::evaluate(Registry::shared(), &flattened.specification, &inputs) {
                Ok(vertices) => {
                    for vertex in &vertices {
                        self.emit_doc(pp.vertex(index, vertex));
                    }
                }
                Err(error) => {
                    self.emit_eval_diagnostic(&name, error);
                    return Status::Error;
                }
            }
        }
        self.status()
    }

    fn status(&self) -> Status {
        if *self.seen_errors.borrow() {
            Status::Error
        } else {
            Status::Ok
        }
    }

    fn compile(&self, file_id: FileId) -> Option<IndexMap<String, Specification>> {
        let source = match self.files.source(file_id) {
            Ok(source) => source,
            Err(error) => {
                self.emit_diagnostic(Diagnostic::bug().with_message(format!("missing source: {error}")));
                return None;
            }
        };

        let file = match syntax::parse_file(file_id, source) {
            Ok(file) => file,
            Err(error) => {
                self.emit_diagnostic(error.to_diagnostic());
                return None;
            }
        };
        match crate::compile_file(Registry::shared(), Library::shared(), &file) {
            Ok(specifications) => Some(specifications),
            Err(error) => {
                self.emit_diagnostic(error.to_diagnostic());
                None
            }
        }
    }

    /// Keep only the specification named `mark`, if given.
    fn select(
        &self,
        mut specifications: IndexMap<String, Specification>,
        mark: Option<&str>,
    ) -> Option<Vec<(String, Specification)>> {
        match mark {
            None => Some(specifications.into_iter().collect()),
            Some(mark) => match specifications.shift_remove(mark) {
                Some(specification) => Some(vec![(mark.to_owned(), specification)]),
                None => {
                    let mut diagnostic = Diagnostic::error().with_message(format!("no mark named `{mark}`"));
                    let names = specifications.keys().map(String::as_str);
                    if let Some(name) = crate::compiler::suggest_name(mark, names) {
                        diagnostic = diagnostic.with_notes(vec![format!("help: did you mean `{name}`?")]);
                    }
                    self.emit_diagnostic(diagnostic);
                    None
                }
            },
        }
    }

    fn emit_doc(&self, doc: RcDoc) {
        let mut emit_writer = self.emit_writer.borrow_mut();
        let result = writeln!(emit_writer, "{}", doc.pretty(self.emit_width)).and_then(|()| emit_writer.flush());
        drop(emit_writer);
        if let Err(error) = result {
            self.emit_diagnostic(Diagnostic::error().with_message(format!("couldn't write output: {error}")));
        }
    }

    fn emit_diagnostic(&self, diagnostic: Diagnostic<FileId>) {
        let mut writer = self.diagnostic_writer.borrow_mut();
        let config = &self.codespan_config;

        // Diagnostics are best effort once stderr fails
        let _ = codespan_reporting::term::emit(&mut *writer, config, &self.files, &diagnostic);
        let _ = writer.flush();

        if diagnostic.severity >= Severity::Error {
            *self.seen_errors.borrow_mut() = true;
        }
    }

    fn emit_read_diagnostic(&self, name: impl std::fmt::Display, error: std::io::Error) {
        let diagnostic = Diagnostic::error().with_message(format!("couldn't read `{name}`: {error}"));
        self.emit_diagnostic(diagnostic);
    }

    fn emit_flatten_diagnostic(&self, name: &str, error: FlattenError) {
        let diagnostic = Diagnostic::error().with_message(format!("failed to flatten `{name}`: {error}"));
        self.emit_diagnostic(diagnostic);
    }

    fn emit_eval_diagnostic(&self, name: &str, error: EvalError) {
        let diagnostic = Diagnostic::error().with_message(format!("failed to evaluate `{name}`: {error}"));
        self.emit_diagnostic(diagnostic);
    }
}

impl Default for Driver {
    fn default() -> Driver {
        Driver::new()
    }
}
