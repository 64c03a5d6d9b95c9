//! Scales: attribute bindings computed inside the specification from a few
//! scalar parameters, rather than evaluated for each datum on the host.
//!
//! Binding an attribute to a scale replaces the attribute input with a
//! variable, assigned from an expression over new inputs. Each scale parameter
//! becomes one such input, named after the attribute and the parameter's
//! bound name. Parameters of the scale itself are prefixed with `s`, the
//! arguments it is applied to with `a` and their index.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::binding::{BindingValue, RuntimeError};
use crate::compiler::resolve::{coerce, signature, Callee, Resolver};
use crate::compiler::{compile_expression, CompileError};
use crate::intrinsics::{operator_name, Registry};
use crate::library::Library;
use crate::specification::Expr;
use crate::syntax::{self, ParseError};
use crate::types::{Value, ValueType};

pub struct ScaleAttribute<D> {
    pub name: String,
    pub value_type: ValueType,
    pub binding: BindingValue<D>,
}

pub trait Scale<D> {
    /// The parameters of the scale.
    fn attributes(&self) -> Vec<ScaleAttribute<D>>;

    /// Build the scaled value from the parameters, keyed by name, and the
    /// scale's arguments.
    fn expression(&self, attrs: &IndexMap<String, Expr>, values: Vec<Expr>) -> Result<Expr, RuntimeError>;
}

pub enum ScaleArgument<D> {
    Value(BindingValue<D>),
    Scale(ScaleBinding<D>),
}

impl<D> From<BindingValue<D>> for ScaleArgument<D> {
    fn from(value: BindingValue<D>) -> Self {
        ScaleArgument::Value(value)
    }
}

impl<D> From<ScaleBinding<D>> for ScaleArgument<D> {
    fn from(scale: ScaleBinding<D>) -> Self {
        ScaleArgument::Scale(scale)
    }
}

impl<D> From<Value> for ScaleArgument<D> {
    fn from(value: Value) -> Self {
        ScaleArgument::Value(BindingValue::Literal(value))
    }
}

impl<D> From<f64> for ScaleArgument<D> {
    fn from(value: f64) -> Self {
        ScaleArgument::Value(BindingValue::Literal(Value::Scalar(value)))
    }
}

/// A scale applied to its arguments.
pub struct ScaleBinding<D> {
    scale: Rc<dyn Scale<D>>,
    return_type: ValueType,
    arg_types: Vec<ValueType>,
    args: Vec<ScaleArgument<D>>,
}

impl<D> fmt::Debug for ScaleBinding<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScaleBinding")
            .field("return_type", &self.return_type)
            .field("arg_types", &self.arg_types)
            .finish_non_exhaustive()
    }
}

impl<D> ScaleBinding<D> {
    pub fn new(
        scale: Rc<dyn Scale<D>>,
        return_type: ValueType,
        arg_types: Vec<ValueType>,
        args: Vec<ScaleArgument<D>>,
    ) -> ScaleBinding<D> {
        ScaleBinding {
            scale,
            return_type,
            arg_types,
            args,
        }
    }

    pub fn return_type(&self) -> ValueType {
        self.return_type
    }

    /// Every parameter needed to compute the scaled value, including those of
    /// nested scales, under their bound names.
    pub fn attributes(&self) -> Vec<ScaleAttribute<D>> {
        let mut attributes = (self.scale.attributes().into_iter())
            .map(|attr| ScaleAttribute {
                name: format!("s{}", attr.name),
                ..attr
            })
            .collect::<Vec<_>>();

        for (index, arg) in self.args.iter().enumerate() {
            match arg {
                ScaleArgument::Scale(scale) => {
                    attributes.extend(scale.attributes().into_iter().map(|attr| ScaleAttribute {
                        name: format!("a{index}{}", attr.name),
                        ..attr
                    }))
                }
                ScaleArgument::Value(binding) => attributes.push(ScaleAttribute {
                    name: format!("a{index}"),
                    value_type: self.arg_types.get(index).copied().unwrap_or(ValueType::Float),
                    binding: binding.clone(),
                }),
            }
        }
        attributes
    }

    /// The scaled value, given an expression for each bound name returned by
    /// [`ScaleBinding::attributes`].
    pub fn expression(&self, attrs: &IndexMap<String, Expr>) -> Result<Expr, RuntimeError> {
        let lookup = |name: String| match attrs.get(&name) {
            Some(expr) => Ok(expr.clone()),
            None => Err(RuntimeError::UndefinedAttribute(name)),
        };

        let own = (self.scale.attributes().into_iter())
            .map(|attr| Ok((attr.name.clone(), lookup(format!("s{}", attr.name))?)))
            .collect::<Result<IndexMap<_, _>, RuntimeError>>()?;

        let mut values = Vec::with_capacity(self.args.len());
        for (index, arg) in self.args.iter().enumerate() {
            let value = match arg {
                ScaleArgument::Scale(scale) => {
                    let nested = (scale.attributes().into_iter())
                        .map(|attr| Ok((attr.name.clone(), lookup(format!("a{index}{}", attr.name))?)))
                        .collect::<Result<IndexMap<_, _>, RuntimeError>>()?;
                    scale.expression(&nested)?
                }
                ScaleArgument::Value(_) => lookup(format!("a{index}"))?,
            };
            values.push(value);
        }

        self.scale.expression(&own, values)
    }
}

/// Take the next scale argument.
fn argument(values: &mut Vec<Expr>, index: usize) -> Result<Expr, RuntimeError> {
    if values.is_empty() {
        return Err(RuntimeError::UndefinedAttribute(format!("a{index}")));
    }
    Ok(values.remove(0))
}

fn attribute(attrs: &IndexMap<String, Expr>, name: &str) -> Result<Expr, RuntimeError> {
    (attrs.get(name).cloned()).ok_or_else(|| RuntimeError::UndefinedAttribute(name.to_owned()))
}

/// A value of `value_type` with every component set to `component`.
fn splat(value_type: ValueType, component: f64) -> Value {
    match value_type.primitive_count() {
        1 => Value::Scalar(component),
        count => Value::Vector(vec![component; count]),
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Interpolation {
    Linear,
    Log,
}

/// Maps a float domain onto a range of `value_type`.
pub struct Continuous<D> {
    interpolation: Interpolation,
    value_type: ValueType,
    domain: [BindingValue<D>; 2],
    range: [BindingValue<D>; 2],
}

pub fn linear<D: 'static>(value_type: ValueType) -> Continuous<D> {
    Continuous::new(Interpolation::Linear, value_type)
}

pub fn log<D: 'static>(value_type: ValueType) -> Continuous<D> {
    Continuous::new(Interpolation::Log, value_type)
}

impl<D: 'static> Continuous<D> {
    fn new(interpolation: Interpolation, value_type: ValueType) -> Continuous<D> {
        Continuous {
            interpolation,
            value_type,
            domain: [0.0.into(), 1.0.into()],
            range: [
                splat(value_type, 0.0).into(),
                splat(value_type, 1.0).into(),
            ],
        }
    }

    pub fn domain(mut self, d0: impl Into<BindingValue<D>>, d1: impl Into<BindingValue<D>>) -> Self {
        self.domain = [d0.into(), d1.into()];
        self
    }

    pub fn range(mut self, r0: impl Into<BindingValue<D>>, r1: impl Into<BindingValue<D>>) -> Self {
        self.range = [r0.into(), r1.into()];
        self
    }

    pub fn bind(self, value: impl Into<ScaleArgument<D>>) -> ScaleBinding<D> {
        let return_type = self.value_type;
        ScaleBinding::new(Rc::new(self), return_type, vec![ValueType::Float], vec![value.into()])
    }
}

impl<D> Scale<D> for Continuous<D> {
    fn attributes(&self) -> Vec<ScaleAttribute<D>> {
        let [d0, d1] = &self.domain;
        let [r0, r1] = &self.range;
        [
            ("d0", ValueType::Float, d0),
            ("d1", ValueType::Float, d1),
            ("r0", self.value_type, r0),
            ("r1", self.value_type, r1),
        ]
        .into_iter()
        .map(|(name, value_type, binding)| ScaleAttribute {
            name: name.to_owned(),
            value_type,
            binding: binding.clone(),
        })
        .collect()
    }

    fn expression(&self, attrs: &IndexMap<String, Expr>, mut values: Vec<Expr>) -> Result<Expr, RuntimeError> {
        let value = argument(&mut values, 0)?;
        let d0 = attribute(attrs, "d0")?;
        let d1 = attribute(attrs, "d1")?;
        let t = match self.interpolation {
            Interpolation::Linear => Expr::binop("/", Expr::binop("-", value, d0.clone()), Expr::binop("-", d1, d0)),
            Interpolation::Log => {
                let log = |expr| Expr::intrinsic("log", vec![expr], ValueType::Float);
                Expr::binop("/", log(Expr::binop("/", value, d0.clone())), log(Expr::binop("/", d1, d0)))
            }
        };
        let args = vec![attribute(attrs, "r0")?, attribute(attrs, "r1")?, t];
        Ok(Expr::intrinsic("mix", args, self.value_type))
    }
}

/// An intrinsic applied to the scale's arguments, with the overload resolved
/// from their types.
struct Call {
    internal_name: String,
    param_types: Vec<ValueType>,
    return_type: ValueType,
}

impl<D> Scale<D> for Call {
    fn attributes(&self) -> Vec<ScaleAttribute<D>> {
        Vec::new()
    }

    fn expression(&self, _: &IndexMap<String, Expr>, mut values: Vec<Expr>) -> Result<Expr, RuntimeError> {
        let mut args = Vec::with_capacity(self.param_types.len());
        for (index, param_type) in self.param_types.iter().enumerate() {
            let arg = argument(&mut values, index)?;
            let found = arg.r#type();
            let (arg, _) = coerce(Registry::shared(), arg, *param_type).ok_or(RuntimeError::MismatchedScale {
                name: format!("a{index}"),
                found,
                expected: *param_type,
            })?;
            args.push(arg);
        }
        Ok(Expr::Call(self.internal_name.clone(), args, self.return_type))
    }
}

/// The type an argument has inside the scale expression. Per-datum functions
/// are taken to produce floats.
fn argument_type<D>(arg: &ScaleArgument<D>) -> ValueType {
    match arg {
        ScaleArgument::Scale(scale) => scale.return_type(),
        ScaleArgument::Value(BindingValue::Literal(Value::Vector(components))) => match components.len() {
            2 => ValueType::Vector2,
            3 => ValueType::Vector3,
            _ => ValueType::Vector4,
        },
        ScaleArgument::Value(_) => ValueType::Float,
    }
}

/// Resolve the overload of `name` accepting `args`.
fn call<D: 'static>(name: &str, args: Vec<ScaleArgument<D>>) -> Result<ScaleBinding<D>, RuntimeError> {
    let arg_types = args.iter().map(argument_type).collect::<Vec<_>>();
    let placeholders = (arg_types.iter().enumerate())
        .map(|(index, r#type)| Expr::variable(format!("a{index}"), *r#type))
        .collect::<Vec<_>>();

    let resolver = Resolver::new(Registry::shared(), Library::shared());
    let unresolved = || RuntimeError::UnresolvedScale(signature(name, &placeholders, &[]));
    let resolution = resolver.resolve(name, &placeholders, &[]).map_err(|_| unresolved())?;
    let Callee::Intrinsic(intrinsic) = resolution.callee else {
        return Err(unresolved());
    };

    let scale = Call {
        internal_name: intrinsic.internal_name().to_owned(),
        param_types: intrinsic.param_types().to_vec(),
        return_type: intrinsic.return_type(),
    };
    Ok(ScaleBinding::new(Rc::new(scale), intrinsic.return_type(), arg_types, args))
}

fn operator<D: 'static>(
    op: &str,
    lhs: impl Into<ScaleArgument<D>>,
    rhs: impl Into<ScaleArgument<D>>,
) -> Result<ScaleBinding<D>, RuntimeError> {
    call(&operator_name(op), vec![lhs.into(), rhs.into()])
}

pub fn add<D: 'static>(
    lhs: impl Into<ScaleArgument<D>>,
    rhs: impl Into<ScaleArgument<D>>,
) -> Result<ScaleBinding<D>, RuntimeError> {
    operator("+", lhs, rhs)
}

pub fn sub<D: 'static>(
    lhs: impl Into<ScaleArgument<D>>,
    rhs: impl Into<ScaleArgument<D>>,
) -> Result<ScaleBinding<D>, RuntimeError> {
    operator("-", lhs, rhs)
}

pub fn mul<D: 'static>(
    lhs: impl Into<ScaleArgument<D>>,
    rhs: impl Into<ScaleArgument<D>>,
) -> Result<ScaleBinding<D>, RuntimeError> {
    operator("*", lhs, rhs)
}

pub fn div<D: 'static>(
    lhs: impl Into<ScaleArgument<D>>,
    rhs: impl Into<ScaleArgument<D>>,
) -> Result<ScaleBinding<D>, RuntimeError> {
    operator("/", lhs, rhs)
}

/// Combine two float arguments into a `Vector2`.
pub fn vector2<D: 'static>(
    x: impl Into<ScaleArgument<D>>,
    y: impl Into<ScaleArgument<D>>,
) -> Result<ScaleBinding<D>, RuntimeError> {
    call("Vector2", vec![x.into(), y.into()])
}

/// A scale given by an expression over `value` and float parameters.
pub struct Custom<D> {
    expr: syntax::Expr,
    attributes: IndexMap<String, BindingValue<D>>,
}

pub fn custom<D: 'static>(source: &str) -> Result<Custom<D>, ParseError> {
    Ok(Custom {
        expr: syntax::parse_expression(crate::STRING_FILE_ID, source)?,
        attributes: IndexMap::new(),
    })
}

impl<D: 'static> Custom<D> {
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<BindingValue<D>>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    fn compile(&self, attrs: &IndexMap<String, Expr>, value: Expr) -> Result<Expr, CompileError> {
        let mut variables = attrs.clone();
        variables.insert("value".to_owned(), value);
        compile_expression(Registry::shared(), &self.expr, &variables)
    }

    /// Apply the scale, inferring its type by compiling the expression once.
    pub fn bind(self, value: impl Into<ScaleArgument<D>>) -> Result<ScaleBinding<D>, CompileError> {
        let zero = || Expr::constant(0.0, ValueType::Float);
        let placeholders = (self.attributes.keys()).map(|name| (name.clone(), zero())).collect();
        let return_type = self.compile(&placeholders, zero())?.r#type();
        Ok(ScaleBinding::new(Rc::new(self), return_type, vec![ValueType::Float], vec![value.into()]))
    }
}

impl<D> Scale<D> for Custom<D> {
    fn attributes(&self) -> Vec<ScaleAttribute<D>> {
        (self.attributes.iter())
            .map(|(name, binding)| ScaleAttribute {
                name: name.clone(),
                value_type: ValueType::Float,
                binding: binding.clone(),
            })
            .collect()
    }

    fn expression(&self, attrs: &IndexMap<String, Expr>, mut values: Vec<Expr>) -> Result<Expr, RuntimeError> {
        let value = argument(&mut values, 0)?;
        let mut variables = attrs.clone();
        variables.insert("value".to_owned(), value);
        Ok(compile_expression(Registry::shared(), &self.expr, &variables)?)
    }
}
