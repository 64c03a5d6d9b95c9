//! Compilation of syntax trees into specifications.
//!
//! Calls to functions with bodies are inlined, so every specification is a
//! flat sequence of statements over its inputs and variables. Lexical blocks
//! only exist for scoping, except for the bodies of conditions and loops.

use fxhash::FxHashMap;
use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::intrinsics::Registry;
use crate::library::Library;
use crate::source::ByteRange;
use crate::specification::{self, Input, Specification, SpecificationKind};
use crate::syntax::{self, Block, Function, FunctionKind, Global, TypeName};
use crate::types::{Value, ValueType};

pub mod resolve;
mod reporting;
pub mod scope;

pub use self::reporting::{suggest_name, CompileError};
use self::resolve::{Callee, Defined, ResolveError, Resolver};
use self::scope::{Placement, Scope, ScopeError};

/// Compile every mark and shader in a file.
pub fn compile_file(
    registry: &Registry,
    library: &Library,
    file: &syntax::File,
) -> Result<IndexMap<String, Specification>, CompileError> {
    let mut compiler = Compiler::new(registry, library);
    compiler.load_file(file)?;

    let mut specifications = IndexMap::new();
    for block in &file.blocks {
        match block {
            Block::Function(function) if function.is_renderable() => {
                let specification = compiler.compile_function(function)?;
                specifications.insert(function.name.clone(), specification);
            }
            Block::Function(_) | Block::Global(_) | Block::Import(_) => {}
        }
    }
    Ok(specifications)
}

/// Compile an expression outside of any mark, where names refer to the
/// expressions in `variables`, or failing that to named constants. Only
/// intrinsics can be called.
pub fn compile_expression(
    registry: &Registry,
    expr: &syntax::Expr,
    variables: &IndexMap<String, specification::Expr>,
) -> Result<specification::Expr, CompileError> {
    use syntax::Expr;

    match expr {
        Expr::Literal(_, value, r#type) => Ok(specification::Expr::Constant(value.clone(), *r#type)),
        Expr::Name(range, name) => {
            if let Some(expr) = variables.get(name) {
                return Ok(expr.clone());
            }
            match registry.constant(name) {
                Some(constant) => Ok(specification::Expr::Constant(constant.value.clone(), constant.r#type)),
                None => Err(CompileError::UndefinedVariable {
                    range: *range,
                    name: name.clone(),
                    suggestion: suggest_name(name, variables.keys().map(String::as_str)),
                }),
            }
        }
        Expr::Field(range, base, field) => {
            let base = compile_expression(registry, base, variables)?;
            field_access(registry, *range, base, field)
        }
        Expr::Call(range, name, args, kwargs) => {
            let args = (args.iter())
                .map(|arg| compile_expression(registry, arg, variables))
                .collect::<Result<Vec<_>, _>>()?;
            let kwargs = (kwargs.iter())
                .map(|(name, arg)| Ok((name.clone(), compile_expression(registry, arg, variables)?)))
                .collect::<Result<Vec<_>, CompileError>>()?;
            call_intrinsic(registry, *range, name, args, kwargs)
        }
        Expr::UnOp(range, op, operand) => {
            let operand = compile_expression(registry, operand, variables)?;
            let name = crate::intrinsics::operator_name(op.symbol());
            call_intrinsic(registry, *range, &name, vec![operand], Vec::new())
        }
        Expr::BinOp(range, lhs, op, rhs) => {
            let lhs = compile_expression(registry, lhs, variables)?;
            let rhs = compile_expression(registry, rhs, variables)?;
            let name = crate::intrinsics::operator_name(op.symbol());
            call_intrinsic(registry, *range, &name, vec![lhs, rhs], Vec::new())
        }
    }
}

fn call_intrinsic(
    registry: &Registry,
    range: ByteRange,
    name: &str,
    args: Vec<specification::Expr>,
    kwargs: Vec<(String, specification::Expr)>,
) -> Result<specification::Expr, CompileError> {
    // No functions are loaded, so only intrinsics resolve.
    let resolver = Resolver::new(registry, Library::shared());
    let resolution = (resolver.resolve(name, &args, &kwargs))
        .map_err(|error| resolve_error(&resolver, error, range, name, &args, &kwargs))?;
    match resolution.callee {
        Callee::Intrinsic(intrinsic) => Ok(specification::Expr::Call(
            intrinsic.internal_name().to_owned(),
            resolution.args,
            intrinsic.return_type(),
        )),
        Callee::Defined(_) => Err(CompileError::UndefinedFunction {
            range,
            name: name.to_owned(),
            suggestion: None,
        }),
    }
}

fn field_access(
    registry: &Registry,
    range: ByteRange,
    base: specification::Expr,
    field: &str,
) -> Result<specification::Expr, CompileError> {
    match registry.field_type(base.r#type(), field) {
        Some(r#type) => Ok(specification::Expr::Field(Box::new(base), field.to_owned(), r#type)),
        None => Err(CompileError::UndefinedField {
            range,
            value_type: base.r#type(),
            field: field.to_owned(),
            suggestion: suggest_name(field, registry.field_names(base.r#type())),
        }),
    }
}

fn resolve_error(
    resolver: &Resolver<'_>,
    error: ResolveError,
    range: ByteRange,
    name: &str,
    args: &[specification::Expr],
    kwargs: &[(String, specification::Expr)],
) -> CompileError {
    match error {
        ResolveError::Undefined => CompileError::UndefinedFunction {
            range,
            name: name.to_owned(),
            suggestion: suggest_name(name, resolver.function_names()),
        },
        ResolveError::Unresolved => CompileError::UnresolvedCall {
            range,
            signature: resolve::signature(name, args, kwargs),
        },
    }
}

fn value_type(type_name: &TypeName) -> Result<ValueType, CompileError> {
    ValueType::from_name(&type_name.name).ok_or_else(|| CompileError::UndefinedType {
        range: type_name.range,
        name: type_name.name.clone(),
        suggestion: suggest_name(&type_name.name, ValueType::ALL.iter().map(|r#type| r#type.name())),
    })
}

pub struct Compiler<'a> {
    registry: &'a Registry,
    library: &'a Library,
    resolver: Resolver<'a>,
    globals: Vec<&'a Global>,

    scope: Scope,
    /// Destination of compiled statements.
    statements: Vec<specification::Stmt>,
    /// Output types, with the range at which each was first emitted.
    outputs: IndexMap<String, (ValueType, ByteRange)>,
    /// Functions currently being inlined.
    call_stack: Vec<(Option<&'a str>, &'a str)>,
}

impl<'a> Compiler<'a> {
    pub fn new(registry: &'a Registry, library: &'a Library) -> Compiler<'a> {
        Compiler {
            registry,
            library,
            resolver: Resolver::new(registry, library),
            globals: Vec::new(),
            scope: Scope::new(),
            statements: Vec::new(),
            outputs: IndexMap::new(),
            call_stack: Vec::new(),
        }
    }

    /// Make the functions, globals, and imports of a file available to
    /// subsequent compilations.
    pub fn load_file(&mut self, file: &'a syntax::File) -> Result<(), CompileError> {
        for block in &file.blocks {
            match block {
                Block::Function(function) => {
                    for param in &function.params {
                        let r#type = value_type(&param.r#type)?;
                        default_value(param.range, r#type, param.default.as_ref())?;
                    }
                    function.return_type.as_ref().map(value_type).transpose()?;
                    self.resolver.add_function(None, function);
                }
                Block::Global(global) => {
                    value_type(&global.r#type)?;
                    self.globals.push(global);
                }
                Block::Import(import) => {
                    let library = self.library;
                    let module = library.module(&import.module).ok_or_else(|| {
                        CompileError::UndefinedModule {
                            range: import.range,
                            name: import.module.clone(),
                            suggestion: suggest_name(&import.module, library.module_names()),
                        }
                    })?;
                    match &import.names {
                        None => {
                            for function in module.all_functions() {
                                self.resolver.add_function(Some(module.name()), function);
                            }
                        }
                        Some(names) => {
                            for (range, name) in names {
                                let mut functions = module.functions(name).peekable();
                                if functions.peek().is_none() {
                                    return Err(CompileError::UndefinedFunction {
                                        range: *range,
                                        name: name.clone(),
                                        suggestion: suggest_name(name, module.function_names()),
                                    });
                                }
                                for function in functions {
                                    self.resolver.add_function(Some(module.name()), function);
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Compile a mark or shader into a specification, inlining every call to
    /// a function with a body.
    pub fn compile_function(&mut self, function: &'a Function) -> Result<Specification, CompileError> {
        self.scope = Scope::new();
        self.statements = Vec::new();
        self.outputs = IndexMap::new();
        self.call_stack = vec![(None, function.name.as_str())];

        let mut inputs = IndexMap::new();
        let globals = self.globals.clone();
        for global in globals {
            let r#type = value_type(&global.r#type)?;
            self.declare(global.range, &global.name, r#type, Placement::Global)?;
            let default = default_value(global.range, r#type, global.default.as_ref())?;
            inputs.insert(global.name.clone(), Input { r#type, default });
        }
        for param in &function.params {
            let r#type = value_type(&param.r#type)?;
            self.declare(param.range, &param.name, r#type, Placement::Local)?;
            let default = default_value(param.range, r#type, param.default.as_ref())?;
            inputs.insert(param.name.clone(), Input { r#type, default });
        }

        self.compile_block(&function.body)?;

        let variables = (self.scope.translated_names().iter())
            .filter(|(name, _)| !inputs.contains_key(*name))
            .map(|(name, r#type)| (name.clone(), *r#type))
            .collect();
        let outputs = (self.outputs.iter())
            .map(|(name, (r#type, _))| (name.clone(), *r#type))
            .collect();
        let kind = match function.kind {
            FunctionKind::Shader => SpecificationKind::Shader,
            FunctionKind::Mark | FunctionKind::Function => SpecificationKind::Mark,
        };

        let specification = Specification {
            kind,
            inputs,
            outputs,
            variables,
            statements: std::mem::take(&mut self.statements),
            repeat: None,
        };
        debug!(
            name = %function.name,
            inputs = specification.inputs.len(),
            variables = specification.variables.len(),
            statements = specification.statements.len(),
            "compiled specification",
        );
        Ok(specification)
    }

    fn declare(
        &mut self,
        range: ByteRange,
        name: &str,
        r#type: ValueType,
        placement: Placement,
    ) -> Result<String, CompileError> {
        match self.scope.add_variable(name, r#type, placement) {
            Ok(variable) => Ok(variable.translated),
            Err(_) => Err(CompileError::DuplicateDeclaration {
                range,
                name: name.to_owned(),
            }),
        }
    }

    fn push_statement(&mut self, stmt: specification::Stmt) {
        self.statements.push(stmt);
    }

    /// Compile statements into a separate sequence instead of the current
    /// destination.
    fn capture_statements(
        &mut self,
        compile: impl FnOnce(&mut Self) -> Result<(), CompileError>,
    ) -> Result<Vec<specification::Stmt>, CompileError> {
        let outer = std::mem::take(&mut self.statements);
        let result = compile(self);
        let captured = std::mem::replace(&mut self.statements, outer);
        result.map(|()| captured)
    }

    /// Compile statements in a new lexical scope.
    fn compile_block(&mut self, stmts: &'a [syntax::Stmt]) -> Result<(), CompileError> {
        self.scope.push(None);
        let result = stmts.iter().try_for_each(|stmt| self.compile_stmt(stmt));
        self.scope.pop();
        result
    }

    fn compile_scoped(&mut self, stmt: &'a syntax::Stmt) -> Result<(), CompileError> {
        self.compile_block(std::slice::from_ref(stmt))
    }

    fn compile_stmt(&mut self, stmt: &'a syntax::Stmt) -> Result<(), CompileError> {
        use syntax::Stmt;

        match stmt {
            Stmt::Expr(syntax::Expr::Call(range, name, args, kwargs)) => {
                self.compile_call(*range, name, args, kwargs)?;
            }
            Stmt::Expr(expr) => {
                self.compile_expr(expr)?;
            }
            Stmt::Let(range, name, type_name, init) => {
                let r#type = type_name.as_ref().map(value_type).transpose()?;
                match (r#type, init) {
                    (r#type, Some(init)) => {
                        let expr = self.compile_expr(init)?;
                        let r#type = r#type.unwrap_or_else(|| expr.r#type());
                        let translated = self.declare(*range, name, r#type, Placement::Local)?;
                        let expr = self.coerce(init.range(), expr, r#type)?;
                        self.push_statement(specification::Stmt::Assign(translated, expr));
                    }
                    (Some(r#type), None) => {
                        self.declare(*range, name, r#type, Placement::Local)?;
                    }
                    (None, None) => {
                        return Err(CompileError::MissingTypeAnnotation {
                            range: *range,
                            name: name.clone(),
                        });
                    }
                }
            }
            Stmt::Assign(range, name, expr) => {
                let expr = self.compile_expr(expr)?;
                let variable = self.variable(*range, name)?;
                let (translated, r#type) = (variable.translated.clone(), variable.r#type);
                let expr = self.coerce(*range, expr, r#type)?;
                self.push_statement(specification::Stmt::Assign(translated, expr));
            }
            Stmt::Return(range, _) => return Err(CompileError::MisplacedReturn { range: *range }),
            Stmt::Discard(_) => self.push_statement(specification::Stmt::Discard),
            Stmt::Emit(_, vertices) => {
                for vertex in vertices {
                    let mut attrs = IndexMap::new();
                    for (range, name, expr) in vertex {
                        let expr = self.compile_expr(expr)?;
                        self.record_output(*range, name, expr.r#type())?;
                        attrs.insert(name.clone(), expr);
                    }
                    self.push_statement(specification::Stmt::Emit(attrs));
                }
            }
            Stmt::For {
                range,
                var,
                start,
                end,
                body,
            } => {
                self.scope.push(None);
                let result = self.declare(*range, var, ValueType::Int, Placement::Local).and_then(|var| {
                    let body = self.capture_statements(|this| this.compile_stmt(body))?;
                    Ok(specification::Stmt::ForLoop {
                        var,
                        range_min: *start,
                        range_max: *end,
                        body,
                    })
                });
                self.scope.pop();
                self.push_statement(result?);
            }
            Stmt::If {
                branches,
                otherwise,
                ..
            } => self.compile_condition(branches, otherwise.as_deref())?,
            Stmt::Block(_, stmts) => self.compile_block(stmts)?,
        }
        Ok(())
    }

    /// Compile an `if`/`else if`/`else` chain as nested conditions.
    fn compile_condition(
        &mut self,
        branches: &'a [(syntax::Expr, syntax::Stmt)],
        otherwise: Option<&'a syntax::Stmt>,
    ) -> Result<(), CompileError> {
        let Some(((test, then_stmt), rest)) = branches.split_first() else {
            return match otherwise {
                Some(stmt) => self.compile_scoped(stmt),
                None => Ok(()),
            };
        };

        let test_expr = self.compile_expr(test)?;
        let test_expr = self.coerce(test.range(), test_expr, ValueType::Bool)?;
        let then_body = self.capture_statements(|this| this.compile_scoped(then_stmt))?;
        let else_body = self.capture_statements(|this| this.compile_condition(rest, otherwise))?;
        self.push_statement(specification::Stmt::Condition {
            test: test_expr,
            then_body,
            else_body,
        });
        Ok(())
    }

    fn record_output(&mut self, range: ByteRange, name: &str, r#type: ValueType) -> Result<(), CompileError> {
        match self.outputs.get(name) {
            Some((first, _)) if *first == r#type => Ok(()),
            Some((first, first_range)) => Err(CompileError::ConflictingOutputTypes {
                range,
                first_range: *first_range,
                name: name.to_owned(),
                first: *first,
                second: r#type,
            }),
            None => {
                self.outputs.insert(name.to_owned(), (r#type, range));
                Ok(())
            }
        }
    }

    fn variable(&self, range: ByteRange, name: &str) -> Result<&scope::ScopeVariable, CompileError> {
        self.scope.get_variable(name).map_err(|error| match error {
            ScopeError::Undefined(name) | ScopeError::Duplicate(name) => {
                let constants = self.registry.constant_names();
                let candidates = self.scope.visible_names().chain(constants);
                CompileError::UndefinedVariable {
                    range,
                    suggestion: suggest_name(&name, candidates),
                    name,
                }
            }
        })
    }

    fn coerce(
        &self,
        range: ByteRange,
        expr: specification::Expr,
        r#type: ValueType,
    ) -> Result<specification::Expr, CompileError> {
        let found = expr.r#type();
        match resolve::coerce(self.registry, expr, r#type) {
            Some((expr, _)) => Ok(expr),
            None => Err(CompileError::MismatchedTypes {
                range,
                found,
                expected: r#type,
            }),
        }
    }

    pub fn compile_expr(&mut self, expr: &'a syntax::Expr) -> Result<specification::Expr, CompileError> {
        use syntax::Expr;

        match expr {
            Expr::Literal(_, value, r#type) => Ok(specification::Expr::Constant(value.clone(), *r#type)),
            Expr::Name(range, name) => {
                if let Some(constant) = self.registry.constant(name) {
                    return Ok(specification::Expr::Constant(constant.value.clone(), constant.r#type));
                }
                let variable = self.variable(*range, name)?;
                Ok(specification::Expr::Variable(variable.translated.clone(), variable.r#type))
            }
            Expr::Field(range, base, field) => {
                let base = self.compile_expr(base)?;
                field_access(self.registry, *range, base, field)
            }
            Expr::Call(range, name, args, kwargs) => {
                let result = self.compile_call(*range, name, args, kwargs)?;
                result.ok_or_else(|| CompileError::MissingReturnValue {
                    range: *range,
                    name: name.clone(),
                })
            }
            Expr::UnOp(range, op, operand) => {
                let operand = self.compile_expr(operand)?;
                self.compile_operator(*range, op.symbol(), vec![operand])
            }
            Expr::BinOp(range, lhs, op, rhs) => {
                let lhs = self.compile_expr(lhs)?;
                let rhs = self.compile_expr(rhs)?;
                self.compile_operator(*range, op.symbol(), vec![lhs, rhs])
            }
        }
    }

    fn compile_operator(
        &mut self,
        range: ByteRange,
        op: &str,
        args: Vec<specification::Expr>,
    ) -> Result<specification::Expr, CompileError> {
        let name = crate::intrinsics::operator_name(op);
        let result = self.call(range, &name, args, Vec::new())?;
        result.ok_or(CompileError::MissingReturnValue { range, name })
    }

    /// Compile a call, returning its result, or `None` if the callee has no
    /// `return` statement.
    fn compile_call(
        &mut self,
        range: ByteRange,
        name: &str,
        args: &'a [syntax::Expr],
        kwargs: &'a [(String, syntax::Expr)],
    ) -> Result<Option<specification::Expr>, CompileError> {
        let args = (args.iter())
            .map(|arg| self.compile_expr(arg))
            .collect::<Result<Vec<_>, _>>()?;
        let kwargs = (kwargs.iter())
            .map(|(name, arg)| Ok((name.clone(), self.compile_expr(arg)?)))
            .collect::<Result<Vec<_>, CompileError>>()?;
        self.call(range, name, args, kwargs)
    }

    fn call(
        &mut self,
        range: ByteRange,
        name: &str,
        args: Vec<specification::Expr>,
        kwargs: Vec<(String, specification::Expr)>,
    ) -> Result<Option<specification::Expr>, CompileError> {
        let resolution = (self.resolver.resolve(name, &args, &kwargs))
            .map_err(|error| resolve_error(&self.resolver, error, range, name, &args, &kwargs))?;
        match resolution.callee {
            Callee::Intrinsic(intrinsic) => Ok(Some(specification::Expr::Call(
                intrinsic.internal_name().to_owned(),
                resolution.args,
                intrinsic.return_type(),
            ))),
            Callee::Defined(defined) => self.inline(range, defined, resolution.args),
        }
    }

    /// Splice the body of a function into the current statements, binding
    /// each formal parameter to a fresh temporary.
    fn inline(
        &mut self,
        range: ByteRange,
        defined: Defined<'a>,
        args: Vec<specification::Expr>,
    ) -> Result<Option<specification::Expr>, CompileError> {
        let function = defined.function;
        let key = (defined.module, function.name.as_str());
        if self.call_stack.contains(&key) {
            return Err(CompileError::RecursiveCall {
                range,
                name: function.name.clone(),
            });
        }
        let return_type = function.return_type.as_ref().map(value_type).transpose()?;

        let mut arg_map = FxHashMap::default();
        for (param, arg) in function.params.iter().zip(args) {
            let temporary = self.scope.next_variable(arg.r#type());
            self.push_statement(specification::Stmt::Assign(temporary.translated, arg));
            arg_map.insert(param.name.clone(), temporary.name);
        }

        trace!(function = %function.name, module = ?defined.module, "inlining call");
        self.call_stack.push(key);
        self.scope.push(Some(arg_map));
        self.resolver.enter_module(defined.module);
        let result = self.inline_body(&function.body);
        self.resolver.exit_module();
        self.scope.pop();
        self.call_stack.pop();

        match (result?, return_type) {
            (Some(expr), Some(r#type)) => self.coerce(range, expr, r#type).map(Some),
            (result, _) => Ok(result),
        }
    }

    /// Compile statements of a function body up to the first `return`.
    fn inline_body(&mut self, body: &'a [syntax::Stmt]) -> Result<Option<specification::Expr>, CompileError> {
        for stmt in body {
            match stmt {
                syntax::Stmt::Return(_, expr) => return self.compile_expr(expr).map(Some),
                stmt => self.compile_stmt(stmt)?,
            }
        }
        Ok(None)
    }
}

fn default_value(
    range: ByteRange,
    r#type: ValueType,
    default: Option<&Value>,
) -> Result<Option<Value>, CompileError> {
    match default {
        Some(value) if r#type.accepts(value) => Ok(Some(value.clone())),
        Some(value) => Err(CompileError::MismatchedDefault {
            range,
            value: value.clone(),
            value_type: r#type,
        }),
        None => Ok(r#type.default_value()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::specification::{for_each_emit, Expr, Stmt};

    fn compile(source: &str) -> Result<IndexMap<String, Specification>, CompileError> {
        let file = syntax::parse_file(SOURCE_FILE, source).unwrap();
        compile_file(Registry::shared(), Library::shared(), &file)
    }

    const SOURCE_FILE: usize = crate::library::SOURCES.len();

    fn emit_count(spec: &Specification) -> usize {
        let mut count = 0;
        for_each_emit(&spec.statements, &mut |_| count += 1);
        count
    }

    #[test]
    fn compiles_a_mark() {
        let specs = compile(
            "mark Tri(p: Vector2, color: Color = [1, 0, 0, 1]) {
                let q = p * 2;
                emit [{ position: q, color: color }];
            }",
        )
        .unwrap();
        let spec = &specs["Tri"];
        assert_eq!(spec.kind, SpecificationKind::Mark);
        assert_eq!(spec.inputs.keys().collect::<Vec<_>>(), ["p", "color"]);
        assert_eq!(spec.inputs["color"].default, Some(Value::from([1.0, 0.0, 0.0, 1.0])));
        assert_eq!(spec.variables, IndexMap::from([("q".to_owned(), ValueType::Vector2)]));
        assert_eq!(
            spec.outputs,
            IndexMap::from([
                ("position".to_owned(), ValueType::Vector2),
                ("color".to_owned(), ValueType::Color),
            ])
        );
        let Stmt::Assign(name, Expr::Call(op, args, ValueType::Vector2)) = &spec.statements[0] else {
            panic!("expected an assignment");
        };
        assert_eq!(name, "q");
        assert_eq!(op, "@@*:Vector2,float:Vector2");
        assert!(matches!(&args[1], Expr::Call(cast, _, ValueType::Float) if cast == "@cast:int:float:int:float"));
        assert!(spec.undeclared_variables().is_empty());
    }

    #[test]
    fn inlined_names_are_unique() {
        let specs = compile(
            "function offset(p: Vector2, d: float): Vector2 {
                let x = p + Vector2(d, d);
                return x;
            }
            mark M(x: Vector2) {
                let y = offset(x, 1.0);
                let z = offset(y, 2.0);
                emit [{ position: z }];
            }",
        )
        .unwrap();
        let spec = &specs["M"];
        assert_eq!(
            spec.variables.keys().collect::<Vec<_>>(),
            ["tmp", "tmp1", "x1", "y", "tmp2", "tmp3", "x2", "z"]
        );
        assert_eq!(spec.statements.len(), 9);
        assert_eq!(
            spec.statements[0],
            Stmt::Assign("tmp".to_owned(), Expr::variable("x", ValueType::Vector2))
        );
        assert_eq!(
            spec.statements[3],
            Stmt::Assign("y".to_owned(), Expr::variable("x1", ValueType::Vector2))
        );
        assert!(spec.undeclared_variables().is_empty());
        assert!(!specs.contains_key("offset"));
    }

    #[test]
    fn globals_come_first() {
        let specs = compile(
            "global time: float = 2;
            mark M(x: float) { emit [{ value: x * time }]; }",
        )
        .unwrap();
        let spec = &specs["M"];
        assert_eq!(spec.inputs.keys().collect::<Vec<_>>(), ["time", "x"]);
        assert_eq!(spec.inputs["time"].default, Some(Value::Scalar(2.0)));
        assert_eq!(spec.inputs["x"].default, Some(Value::Scalar(0.0)));
        assert!(spec.variables.is_empty());
    }

    #[test]
    fn conditions_and_loops() {
        let specs = compile(
            "mark M(x: float) {
                if x > 0 { emit [{ a: x }]; } else { emit [{ a: -x }]; }
                for (i in 0..3) { emit [{ a: float(i) }]; }
            }",
        )
        .unwrap();
        let spec = &specs["M"];
        let Stmt::Condition { test, then_body, else_body } = &spec.statements[0] else {
            panic!("expected a condition");
        };
        assert_eq!(test.r#type(), ValueType::Bool);
        assert!(matches!(test, Expr::Call(name, _, _) if name == "@@>:float,float:bool"));
        assert_eq!((then_body.len(), else_body.len()), (1, 1));
        let Stmt::ForLoop { var, range_min: 0, range_max: 3, body } = &spec.statements[1] else {
            panic!("expected a loop");
        };
        assert_eq!(var, "i");
        assert_eq!(body.len(), 1);
        assert_eq!(spec.variables.get("i"), Some(&ValueType::Int));
        assert!(spec.undeclared_variables().is_empty());
    }

    #[test]
    fn shaders_compile() {
        let specs = compile("shader S(color: Color) { emit { color: color }; }").unwrap();
        assert_eq!(specs["S"].kind, SpecificationKind::Shader);
        assert_eq!(specs["S"].outputs["color"], ValueType::Color);
    }

    #[test]
    fn imported_marks_resolve_within_their_module() {
        let specs = compile(
            "import OutlinedRectangle from P2D;
            mark Rectangle(x: float) { emit [{ position: Vector2(x, x) }]; }
            mark Frame(p1: Vector2, p2: Vector2) { OutlinedRectangle(p1, p2, width = 2); }",
        )
        .unwrap();
        let spec = &specs["Frame"];
        assert_eq!(emit_count(spec), 24);
        assert_eq!(
            spec.outputs,
            IndexMap::from([
                ("position".to_owned(), ValueType::Vector2),
                ("color".to_owned(), ValueType::Color),
            ])
        );
        assert!(spec.undeclared_variables().is_empty());
    }

    #[test]
    fn whole_modules_import() {
        let specs = compile("import P3D; mark M(a: Vector3, b: Vector3, c: Vector3, d: Vector3) { Tetrahedron(a, b, c, d); }").unwrap();
        let spec = &specs["M"];
        assert_eq!(emit_count(spec), 12);
        assert_eq!(spec.outputs.get("normal"), Some(&ValueType::Vector3));
    }

    #[test]
    fn conflicting_outputs() {
        let error = compile(
            "mark M() {
                emit [{ position: Vector2(0, 0) }];
                emit [{ position: Vector3(0, 0, 0) }];
            }",
        )
        .unwrap_err();
        assert!(matches!(
            error,
            CompileError::ConflictingOutputTypes {
                ref name,
                first: ValueType::Vector2,
                second: ValueType::Vector3,
                ..
            } if name == "position"
        ));
    }

    #[test]
    fn recursion_is_rejected() {
        let error = compile("function f(x: float): float { return f(x); } mark M() { let y = f(1.0); }").unwrap_err();
        assert!(matches!(error, CompileError::RecursiveCall { ref name, .. } if name == "f"));

        let error = compile(
            "function g(x: float): float { return h(x); }
            function h(x: float): float { return g(x); }
            mark M() { let y = g(1.0); }",
        )
        .unwrap_err();
        assert!(matches!(error, CompileError::RecursiveCall { ref name, .. } if name == "g"));

        let error = compile("mark M() { M(); }").unwrap_err();
        assert!(matches!(error, CompileError::RecursiveCall { .. }));
    }

    #[test]
    fn returns_only_at_the_top_level() {
        let error = compile(
            "function f(x: float): float { if x > 0 { return x; } return 0.0; }
            mark M() { let y = f(1.0); }",
        )
        .unwrap_err();
        assert!(matches!(error, CompileError::MisplacedReturn { .. }));

        let error = compile("mark M() { return 1.0; }").unwrap_err();
        assert!(matches!(error, CompileError::MisplacedReturn { .. }));
    }

    #[test]
    fn functions_without_return() {
        let specs = compile("function f(x: float) { } mark M() { f(1.0); }").unwrap();
        assert_eq!(specs["M"].statements.len(), 1);

        let error = compile("function f(x: float) { } mark M() { let y = f(1.0); }").unwrap_err();
        assert!(matches!(error, CompileError::MissingReturnValue { ref name, .. } if name == "f"));
    }

    #[test]
    fn declarations() {
        let error = compile("mark M() { let x = 1.0; let x = 2.0; }").unwrap_err();
        assert!(matches!(error, CompileError::DuplicateDeclaration { ref name, .. } if name == "x"));
        let error = compile("mark M(x: float, x: float) { }").unwrap_err();
        assert!(matches!(error, CompileError::DuplicateDeclaration { .. }));

        // Shadowing a parameter in the body is allowed.
        let specs = compile("mark M(x: float) { let x = 1; let y: float; }").unwrap();
        assert_eq!(
            specs["M"].variables,
            IndexMap::from([("x1".to_owned(), ValueType::Int), ("y".to_owned(), ValueType::Float)])
        );

        let error = compile("mark M() { let x; }").unwrap_err();
        assert!(matches!(error, CompileError::MissingTypeAnnotation { .. }));
        let error = compile("mark M() { let x: int = 1.5; }").unwrap_err();
        assert!(matches!(
            error,
            CompileError::MismatchedTypes {
                found: ValueType::Float,
                expected: ValueType::Int,
                ..
            }
        ));
        let error = compile("mark M(c: Color = 1) { }").unwrap_err();
        assert!(matches!(error, CompileError::MismatchedDefault { .. }));
    }

    #[test]
    fn helper_defaults_are_checked() {
        let error = compile(
            "function f(c: Color = 1): Color { return c; }
            mark M() { emit [{ color: f() }]; }",
        )
        .unwrap_err();
        assert!(matches!(
            error,
            CompileError::MismatchedDefault {
                value_type: ValueType::Color,
                ..
            }
        ));

        let specs = compile(
            "function f(c: Color = [1, 0, 0, 1]): Color { return c; }
            mark M() { emit [{ color: f() }]; }",
        )
        .unwrap();
        assert_eq!(specs["M"].outputs["color"], ValueType::Color);
    }

    #[test]
    fn undefined_names_suggest_alternatives() {
        let suggestion = |source: &str| compile(source).unwrap_err().suggestion().map(str::to_owned);

        let error = compile("mark M(color: Color) { emit [{ color: colr }]; }").unwrap_err();
        assert!(matches!(error, CompileError::UndefinedVariable { .. }));
        assert_eq!(suggestion("mark M(color: Color) { emit [{ color: colr }]; }").as_deref(), Some("color"));
        assert_eq!(suggestion("mark M() { let x = sqr(2.0); }").as_deref(), Some("sqrt"));
        assert_eq!(suggestion("mark M(p: Vector2) { let x = p.xx; }").as_deref(), Some("x"));
        assert_eq!(suggestion("mark M(p: Vectr2) { }").as_deref(), Some("Vector2"));
        assert_eq!(suggestion("import P2; mark M() { }").as_deref(), Some("P2D"));
        assert_eq!(suggestion("import Rectangel from P2D; mark M() { }").as_deref(), Some("Rectangle"));

        let error = compile("mark M() { let x = sqrt(Vector2(1, 2)); }").unwrap_err();
        assert!(matches!(error, CompileError::UnresolvedCall { ref signature, .. } if signature == "sqrt(Vector2)"));
    }

    #[test]
    fn standalone_expressions() {
        let registry = Registry::shared();
        let variables = IndexMap::from([("x".to_owned(), Expr::variable("s0", ValueType::Float))]);
        let expr = syntax::parse_expression(SOURCE_FILE, "x * 2 + PI").unwrap();
        let expr = compile_expression(registry, &expr, &variables).unwrap();
        let Expr::Call(name, args, ValueType::Float) = &expr else {
            panic!("expected a call");
        };
        assert_eq!(name, "@@+:float,float:float");
        assert!(matches!(&args[1], Expr::Constant(_, ValueType::Float)));

        let expr = syntax::parse_expression(SOURCE_FILE, "y + 1").unwrap();
        let error = compile_expression(registry, &expr, &variables).unwrap_err();
        assert!(matches!(error, CompileError::UndefinedVariable { .. }));

        let expr = syntax::parse_expression(SOURCE_FILE, "Rectangle(x)").unwrap();
        let error = compile_expression(registry, &expr, &variables).unwrap_err();
        assert!(matches!(error, CompileError::UndefinedFunction { .. }));
    }
}
