//! Overload resolution.

use itertools::Itertools;
use tracing::trace;

use crate::intrinsics::{Intrinsic, Registry};
use crate::library::Library;
use crate::specification::Expr;
use crate::syntax::Function;
use crate::types::{Value, ValueType};

/// A function declared in source, along with the module it was loaded from.
#[derive(Debug, Copy, Clone)]
pub struct Defined<'a> {
    pub module: Option<&'a str>,
    pub function: &'a Function,
}

#[derive(Debug, Copy, Clone)]
pub enum Callee<'a> {
    Intrinsic(&'a Intrinsic),
    Defined(Defined<'a>),
}

impl<'a> Callee<'a> {
    fn formals(&self) -> Vec<Formal<'a>> {
        match self {
            Callee::Intrinsic(intrinsic) => (intrinsic.param_types().iter())
                .map(|r#type| Formal {
                    name: None,
                    r#type: Some(*r#type),
                    default: None,
                })
                .collect(),
            Callee::Defined(defined) => (defined.function.params.iter())
                .map(|param| Formal {
                    name: Some(param.name.as_str()),
                    r#type: ValueType::from_name(&param.r#type.name),
                    default: param.default.as_ref(),
                })
                .collect(),
        }
    }
}

struct Formal<'a> {
    name: Option<&'a str>,
    /// `None` if the declared type is unknown, which rejects the candidate.
    r#type: Option<ValueType>,
    default: Option<&'a Value>,
}

#[derive(Debug, Clone)]
pub struct Resolution<'a> {
    pub callee: Callee<'a>,
    /// Arguments bound to each formal parameter, coerced to its type.
    pub args: Vec<Expr>,
    pub rank: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// No function has the requested name.
    Undefined,
    /// No overload accepts the arguments.
    Unresolved,
}

/// Coerce `expr` to `target`, returning the rank of the conversion used.
pub fn coerce(registry: &Registry, expr: Expr, target: ValueType) -> Option<(Expr, u32)> {
    let source = expr.r#type();
    if source == target {
        return Some((expr, 0));
    }
    let conversion = registry.conversion(source, target)?;
    let expr = Expr::Call(conversion.internal_name.clone(), vec![expr], target);
    Some((expr, conversion.rank))
}

/// Describe a call for diagnostics, eg. `mix(Color, Color, t = float)`.
pub fn signature(name: &str, args: &[Expr], kwargs: &[(String, Expr)]) -> String {
    let args = args.iter().map(|arg| arg.r#type().to_string());
    let kwargs = (kwargs.iter()).map(|(name, arg)| format!("{name} = {}", arg.r#type()));
    format!("{name}({})", args.chain(kwargs).format(", "))
}

pub struct Resolver<'a> {
    registry: &'a Registry,
    library: &'a Library,
    functions: Vec<Defined<'a>>,
    /// Modules of the functions currently being inlined, innermost last.
    modules: Vec<Option<&'a str>>,
}

impl<'a> Resolver<'a> {
    pub fn new(registry: &'a Registry, library: &'a Library) -> Resolver<'a> {
        Resolver {
            registry,
            library,
            functions: Vec::new(),
            modules: Vec::new(),
        }
    }

    pub fn add_function(&mut self, module: Option<&'a str>, function: &'a Function) {
        self.functions.push(Defined { module, function });
    }

    pub fn enter_module(&mut self, module: Option<&'a str>) {
        self.modules.push(module);
    }

    pub fn exit_module(&mut self) {
        self.modules.pop();
    }

    /// Candidates for a call, in preference order. The innermost entered
    /// module that declares `name` shadows everything else.
    fn candidates(&self, name: &str) -> Vec<Callee<'a>> {
        let library = self.library;
        for module in self.modules.iter().rev().flatten() {
            let functions = library.module(module).into_iter().flat_map(|module| {
                module.functions(name).map(move |function| Defined {
                    module: Some(module.name()),
                    function,
                })
            });
            let shadowing = functions.map(Callee::Defined).collect::<Vec<_>>();
            if !shadowing.is_empty() {
                return shadowing;
            }
        }

        let intrinsics = self.registry.functions(name).map(Callee::Intrinsic);
        let defined = (self.functions.iter())
            .filter(|defined| defined.function.name == name)
            .map(|defined| Callee::Defined(*defined));
        intrinsics.chain(defined).collect()
    }

    pub fn resolve(
        &self,
        name: &str,
        args: &[Expr],
        kwargs: &[(String, Expr)],
    ) -> Result<Resolution<'a>, ResolveError> {
        let candidates = self.candidates(name);
        if candidates.is_empty() {
            return Err(ResolveError::Undefined);
        }

        let mut best: Option<(Resolution<'a>, usize)> = None;
        for callee in candidates {
            let Some((resolution, conversions)) = self.bind(callee, args, kwargs) else {
                continue;
            };
            let better = match &best {
                None => true,
                Some((current, current_conversions)) => {
                    (resolution.rank, conversions) < (current.rank, *current_conversions)
                }
            };
            if better {
                best = Some((resolution, conversions));
            }
        }

        let (resolution, _) = best.ok_or(ResolveError::Unresolved)?;
        trace!(
            call = %signature(name, args, kwargs),
            rank = resolution.rank,
            "resolved call",
        );
        Ok(resolution)
    }

    /// Bind the arguments of a call to the formals of `callee`, returning the
    /// resolution and the number of conversions applied.
    fn bind(
        &self,
        callee: Callee<'a>,
        args: &[Expr],
        kwargs: &[(String, Expr)],
    ) -> Option<(Resolution<'a>, usize)> {
        let formals = callee.formals();
        let mut bound = Vec::with_capacity(formals.len());
        let mut used_kwargs = 0;
        let mut rank = 0;
        let mut conversions = 0;

        for (index, formal) in formals.iter().enumerate() {
            let r#type = formal.r#type?;
            // Positional arguments take precedence over keywords, then defaults.
            let keyword = formal.name.and_then(|formal_name| {
                kwargs.iter().find(|(name, _)| name == formal_name)
            });
            let arg = match (args.get(index), keyword) {
                (Some(arg), _) => arg.clone(),
                (None, Some((_, arg))) => {
                    used_kwargs += 1;
                    arg.clone()
                }
                (None, None) => Expr::Constant(formal.default?.clone(), r#type),
            };
            conversions += usize::from(arg.r#type() != r#type);
            let (arg, arg_rank) = coerce(self.registry, arg, r#type)?;
            rank += arg_rank;
            bound.push(arg);
        }

        if args.len() > formals.len() || used_kwargs < kwargs.len() {
            return None;
        }
        Some((
            Resolution {
                callee,
                args: bound,
                rank,
            },
            conversions,
        ))
    }

    /// Names of all callable functions, for diagnostics.
    pub fn function_names(&self) -> impl Iterator<Item = &str> + '_ {
        let intrinsics = (self.registry.intrinsics().iter())
            .map(Intrinsic::name)
            .filter(|name| !name.starts_with('@') && !name.starts_with("cast:"));
        let defined = self.functions.iter().map(|defined| defined.function.name.as_str());
        intrinsics.chain(defined).unique()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::{self, Block};

    fn resolver<'a>() -> Resolver<'a> {
        Resolver::new(Registry::shared(), Library::shared())
    }

    fn var(r#type: ValueType) -> Expr {
        Expr::variable("v", r#type)
    }

    fn internal_name(resolution: &Resolution<'_>) -> String {
        match resolution.callee {
            Callee::Intrinsic(intrinsic) => intrinsic.internal_name().to_owned(),
            Callee::Defined(defined) => defined.function.name.clone(),
        }
    }

    #[test]
    fn exact_matches_beat_conversions() {
        let resolver = resolver();
        let resolution = resolver.resolve("abs", &[var(ValueType::Int)], &[]).unwrap();
        assert_eq!(internal_name(&resolution), "@abs:int:int");
        assert_eq!(resolution.rank, 0);

        let resolution = resolver.resolve("sqrt", &[var(ValueType::Int)], &[]).unwrap();
        assert_eq!(resolution.rank, 1);
        assert!(matches!(&resolution.args[0], Expr::Call(name, _, ValueType::Float) if name == "@cast:int:float:int:float"));
    }

    #[test]
    fn zero_rank_conversions_lose_to_exact_matches() {
        let resolver = resolver();
        let args = [var(ValueType::Color), var(ValueType::Color), var(ValueType::Float)];
        let resolution = resolver.resolve("mix", &args, &[]).unwrap();
        assert_eq!(internal_name(&resolution), "@mix:Color,Color,float:Color");
    }

    #[test]
    fn resolution_is_deterministic() {
        let resolver = resolver();
        let args = [var(ValueType::Int), var(ValueType::Float)];
        let first = resolver.resolve("@+", &args, &[]).unwrap();
        let second = resolver.resolve("@+", &args, &[]).unwrap();
        assert_eq!(internal_name(&first), internal_name(&second));
        assert_eq!(first.args, second.args);
        assert_eq!(internal_name(&first), "@@+:float,float:float");
    }

    #[test]
    fn undefined_and_unresolved() {
        let resolver = resolver();
        assert_eq!(resolver.resolve("nope", &[], &[]).unwrap_err(), ResolveError::Undefined);
        let err = resolver.resolve("sqrt", &[var(ValueType::Vector2)], &[]).unwrap_err();
        assert_eq!(err, ResolveError::Unresolved);
        let err = resolver.resolve("sqrt", &[var(ValueType::Float), var(ValueType::Float)], &[]);
        assert_eq!(err.unwrap_err(), ResolveError::Unresolved);
    }

    #[test]
    fn keywords_and_defaults() {
        let file = syntax::parse_file(0, "function f(a: float, b: float = 2, c: int = 3): float { return a; }").unwrap();
        let Block::Function(function) = &file.blocks[0] else {
            panic!("expected a function");
        };
        let mut resolver = resolver();
        resolver.add_function(None, function);

        let kwargs = [("c".to_owned(), var(ValueType::Int))];
        let resolution = resolver.resolve("f", &[var(ValueType::Float)], &kwargs).unwrap();
        assert_eq!(
            resolution.args,
            [
                var(ValueType::Float),
                Expr::constant(2.0, ValueType::Float),
                var(ValueType::Int),
            ]
        );

        // A keyword naming a formal that is already bound positionally is
        // never consumed.
        let kwargs = [("a".to_owned(), var(ValueType::Float))];
        let err = resolver.resolve("f", &[var(ValueType::Float)], &kwargs).unwrap_err();
        assert_eq!(err, ResolveError::Unresolved);

        assert_eq!(
            signature("f", &[var(ValueType::Float)], &kwargs),
            "f(float, a = float)"
        );
    }

    #[test]
    fn entered_modules_shadow_other_functions() {
        let file = syntax::parse_file(0, "function Rectangle(x: float) {}").unwrap();
        let Block::Function(function) = &file.blocks[0] else {
            panic!("expected a function");
        };
        let mut resolver = resolver();
        resolver.add_function(None, function);
        assert!(resolver.resolve("Rectangle", &[var(ValueType::Float)], &[]).is_ok());

        resolver.enter_module(Some("P2D"));
        let args = [var(ValueType::Vector2), var(ValueType::Vector2)];
        let resolution = resolver.resolve("Rectangle", &args, &[]).unwrap();
        assert!(matches!(resolution.callee, Callee::Defined(Defined { module: Some("P2D"), .. })));
        assert!(resolver.resolve("Rectangle", &[var(ValueType::Float)], &[]).is_err());
        resolver.exit_module();
    }
}
