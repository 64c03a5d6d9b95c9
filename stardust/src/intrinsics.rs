//! Built-in functions, operators, implicit conversions, named constants and
//! field accessors.
//!
//! The [`Registry`] is built once and is read-only afterwards. It is passed
//! explicitly to the compiler rather than being consulted as ambient state.

use fxhash::FxHashMap;
use itertools::Itertools;
use once_cell::sync::Lazy;

use crate::types::{Value, ValueType};

macro_rules! step {
    ([$($param:pat),*] => $body:expr) => {
        |args: &[Value]| match args {
            [$($param),*] => Some($body),
            _ => None,
        }
    };
}

macro_rules! compare_step {
    ($op:tt) => {
        step!([Value::Scalar(a), Value::Scalar(b)] => Value::from_bool(*a $op *b))
    };
}

macro_rules! float_step {
    ($method:ident) => {
        step!([Value::Scalar(a)] => Value::Scalar(a.$method()))
    };
}

/// Host implementation of an intrinsic, used by the IR evaluator. Returns
/// `None` when the arguments are outside of the function's domain.
pub type Step = fn(&[Value]) -> Option<Value>;

/// A function with no body, implemented by the rendering backend.
#[derive(Debug)]
pub struct Intrinsic {
    name: String,
    internal_name: String,
    param_types: Vec<ValueType>,
    return_type: ValueType,
    step: Option<Step>,
}

impl Intrinsic {
    /// The name used at call sites. Operators are named `@<op>`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unique name of this overload, `@<name>:<param types>:<return type>`.
    pub fn internal_name(&self) -> &str {
        &self.internal_name
    }

    pub fn param_types(&self) -> &[ValueType] {
        &self.param_types
    }

    pub fn return_type(&self) -> ValueType {
        self.return_type
    }

    pub fn step(&self) -> Option<Step> {
        self.step
    }
}

/// An implicit conversion between two value types.
#[derive(Debug, Clone)]
pub struct Conversion {
    /// Internal name of the intrinsic performing the conversion.
    pub internal_name: String,
    /// Lower ranks are preferred during overload resolution.
    pub rank: u32,
}

#[derive(Debug, Clone)]
pub struct Constant {
    pub r#type: ValueType,
    pub value: Value,
}

pub fn internal_name(name: &str, param_types: &[ValueType], return_type: ValueType) -> String {
    format!(
        "@{name}:{}:{return_type}",
        param_types.iter().map(|r#type| r#type.name()).join(",")
    )
}

pub fn operator_name(op: &str) -> String {
    format!("@{op}")
}

pub struct Registry {
    intrinsics: Vec<Intrinsic>,
    by_name: FxHashMap<String, Vec<usize>>,
    by_internal_name: FxHashMap<String, usize>,
    conversions: FxHashMap<(ValueType, ValueType), Conversion>,
    constants: FxHashMap<&'static str, Constant>,
    fields: FxHashMap<(ValueType, &'static str), ValueType>,
}

static SHARED: Lazy<Registry> = Lazy::new(Registry::new);

impl Registry {
    /// The registry of builtins, built on first use.
    pub fn shared() -> &'static Registry {
        &SHARED
    }

    /// Intrinsic overloads with the given call name, in declaration order.
    pub fn functions(&self, name: &str) -> impl Iterator<Item = &Intrinsic> + '_ {
        let indices = self.by_name.get(name).map_or(&[][..], Vec::as_slice);
        indices.iter().map(move |index| &self.intrinsics[*index])
    }

    /// All intrinsics, in declaration order.
    pub fn intrinsics(&self) -> &[Intrinsic] {
        &self.intrinsics
    }

    pub fn intrinsic(&self, internal_name: &str) -> Option<&Intrinsic> {
        let index = self.by_internal_name.get(internal_name)?;
        Some(&self.intrinsics[*index])
    }

    pub fn conversion(&self, source: ValueType, target: ValueType) -> Option<&Conversion> {
        self.conversions.get(&(source, target))
    }

    pub fn constant(&self, name: &str) -> Option<&Constant> {
        self.constants.get(name)
    }

    pub fn constant_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.constants.keys().copied()
    }

    pub fn field_type(&self, base: ValueType, field: &str) -> Option<ValueType> {
        self.fields.get(&(base, field)).copied()
    }

    pub fn field_names(&self, base: ValueType) -> impl Iterator<Item = &str> + '_ {
        self.fields
            .keys()
            .filter(move |(r#type, _)| *r#type == base)
            .map(|(_, field)| *field)
    }

    pub fn new() -> Registry {
        use ValueType::*;

        let mut registry = RegistryBuilder::new();

        // Arithmetic
        for op in ["+", "-", "*", "/"] {
            let step: Step = match op {
                "+" => step!([a, b] => zip_components(a, b, |a, b| a + b)?),
                "-" => step!([a, b] => zip_components(a, b, |a, b| a - b)?),
                "*" => step!([a, b] => zip_components(a, b, |a, b| a * b)?),
                _ => step!([a, b] => zip_components(a, b, |a, b| a / b)?),
            };
            registry.define_operator(op, [Float, Float], Float, Some(step));
            let int_step: Step = match op {
                "+" => step!([Value::Scalar(a), Value::Scalar(b)] => Value::Scalar(a + b)),
                "-" => step!([Value::Scalar(a), Value::Scalar(b)] => Value::Scalar(a - b)),
                "*" => step!([Value::Scalar(a), Value::Scalar(b)] => Value::Scalar(a * b)),
                _ => step!([Value::Scalar(a), Value::Scalar(b)] => Value::Scalar(int_div(*a, *b)?)),
            };
            registry.define_operator(op, [Int, Int], Int, Some(int_step));
            for vector in [Vector2, Vector3, Vector4] {
                registry.define_operator(op, [vector, vector], vector, Some(step));
            }
        }
        for vector in [Vector2, Vector3, Vector4] {
            let scale: Step = step!([a, b] => zip_components(a, b, |a, b| a * b)?);
            registry.define_operator("*", [vector, Float], vector, Some(scale));
            registry.define_operator("*", [Float, vector], vector, Some(scale));
            let divide: Step = step!([a, b] => zip_components(a, b, |a, b| a / b)?);
            registry.define_operator("/", [vector, Float], vector, Some(divide));
        }
        registry.define_operator(
            "%",
            [Float, Float],
            Float,
            Some(step!([Value::Scalar(a), Value::Scalar(b)] => Value::Scalar(a - b * (a / b).floor()))),
        );
        registry.define_operator(
            "%",
            [Int, Int],
            Int,
            Some(step!([Value::Scalar(a), Value::Scalar(b)] => Value::Scalar(int_rem(*a, *b)?))),
        );
        for r#type in [Float, Int, Vector2, Vector3, Vector4] {
            registry.define_operator("+", [r#type], r#type, Some(step!([a] => a.clone())));
            registry.define_operator("-", [r#type], r#type, Some(step!([a] => map_components(a, |a| -a))));
        }

        // Comparisons
        for r#type in [Float, Int] {
            registry.define_operator("<", [r#type, r#type], Bool, Some(compare_step!(<)));
            registry.define_operator("<=", [r#type, r#type], Bool, Some(compare_step!(<=)));
            registry.define_operator(">", [r#type, r#type], Bool, Some(compare_step!(>)));
            registry.define_operator(">=", [r#type, r#type], Bool, Some(compare_step!(>=)));
        }
        for r#type in [Bool, Float, Int] {
            registry.define_operator("==", [r#type, r#type], Bool, Some(compare_step!(==)));
            registry.define_operator("!=", [r#type, r#type], Bool, Some(compare_step!(!=)));
        }

        // Logic
        registry.define_operator("!", [Bool], Bool, Some(step!([a] => Value::from_bool(!a.is_truthy()))));
        registry.define_operator(
            "&&",
            [Bool, Bool],
            Bool,
            Some(step!([a, b] => Value::from_bool(a.is_truthy() && b.is_truthy()))),
        );
        registry.define_operator(
            "||",
            [Bool, Bool],
            Bool,
            Some(step!([a, b] => Value::from_bool(a.is_truthy() || b.is_truthy()))),
        );

        // Constructors
        let construct: Step = |args| Some(Value::Vector(args.iter().filter_map(Value::as_scalar).collect()));
        registry.define_function("Vector2", [Float; 2], Vector2, Some(construct));
        registry.define_function("Vector3", [Float; 3], Vector3, Some(construct));
        registry.define_function("Vector4", [Float; 4], Vector4, Some(construct));
        registry.define_function("Quaternion", [Float; 4], Quaternion, Some(construct));
        registry.define_function("Color", [Float; 4], Color, Some(construct));
        registry.define_function(
            "Color",
            [Float; 3],
            Color,
            Some(step!([Value::Scalar(r), Value::Scalar(g), Value::Scalar(b)] => Value::from([*r, *g, *b, 1.0]))),
        );
        registry.define_function(
            "Color",
            [Float; 2],
            Color,
            Some(step!([Value::Scalar(v), Value::Scalar(a)] => Value::from([*v, *v, *v, *a]))),
        );
        registry.define_function(
            "Color",
            [Float],
            Color,
            Some(step!([Value::Scalar(v)] => Value::from([*v, *v, *v, 1.0]))),
        );

        // Explicit conversions
        registry.define_function("int", [Float], Int, Some(step!([Value::Scalar(a)] => Value::Scalar(a.trunc()))));
        registry.define_function("float", [Int], Float, Some(step!([a] => a.clone())));

        // Scalar math
        registry.define_function("abs", [Float], Float, Some(float_step!(abs)));
        registry.define_function("sqrt", [Float], Float, Some(float_step!(sqrt)));
        registry.define_function("exp", [Float], Float, Some(float_step!(exp)));
        registry.define_function("log", [Float], Float, Some(float_step!(ln)));
        registry.define_function("sin", [Float], Float, Some(float_step!(sin)));
        registry.define_function("cos", [Float], Float, Some(float_step!(cos)));
        registry.define_function("tan", [Float], Float, Some(float_step!(tan)));
        registry.define_function("asin", [Float], Float, Some(float_step!(asin)));
        registry.define_function("acos", [Float], Float, Some(float_step!(acos)));
        registry.define_function("atan", [Float], Float, Some(float_step!(atan)));
        registry.define_function("ceil", [Float], Float, Some(float_step!(ceil)));
        registry.define_function("floor", [Float], Float, Some(float_step!(floor)));
        registry.define_function("abs", [Int], Int, Some(step!([Value::Scalar(a)] => Value::Scalar(a.abs()))));
        registry.define_function(
            "atan2",
            [Float, Float],
            Float,
            Some(step!([Value::Scalar(y), Value::Scalar(x)] => Value::Scalar(y.atan2(*x)))),
        );
        for r#type in [Float, Int] {
            registry.define_function("min", [r#type, r#type], r#type, Some(step!([Value::Scalar(a), Value::Scalar(b)] => Value::Scalar(a.min(*b)))));
            registry.define_function("max", [r#type, r#type], r#type, Some(step!([Value::Scalar(a), Value::Scalar(b)] => Value::Scalar(a.max(*b)))));
        }
        registry.define_function(
            "clamp",
            [Float, Float, Float],
            Float,
            Some(step!([Value::Scalar(x), Value::Scalar(lo), Value::Scalar(hi)] => Value::Scalar(x.max(*lo).min(*hi)))),
        );
        for r#type in [Float, Vector2, Vector3, Vector4, Color] {
            registry.define_function("mix", [r#type, r#type, Float], r#type, Some(mix));
        }

        // Vector math
        for vector in [Vector2, Vector3, Vector4] {
            registry.define_function("dot", [vector, vector], Float, Some(step!([a, b] => Value::Scalar(dot(a, b)))));
        }
        for vector in [Vector2, Vector3, Vector4, Quaternion] {
            registry.define_function("length", [vector], Float, Some(step!([a] => Value::Scalar(dot(a, a).sqrt()))));
            registry.define_function("normalize", [vector], vector, Some(normalize));
        }
        registry.define_function("cross", [Vector3, Vector3], Vector3, Some(cross));

        // Quaternions
        registry.define_function("quat_mul", [Quaternion, Quaternion], Quaternion, None);
        registry.define_function("quat_conj", [Quaternion], Quaternion, None);
        registry.define_function("quat_slerp", [Quaternion, Quaternion, Float], Quaternion, None);
        registry.define_function("quat_rotate", [Quaternion, Vector3], Vector3, None);
        registry.define_function("quat_rotation", [Vector3, Float], Quaternion, None);

        // Colors
        registry.define_function("lab2rgb", [Color], Color, None);
        registry.define_function("hcl2rgb", [Color], Color, None);

        // Textures
        registry.define_function("array", [FloatArray, Float], Float, None);
        registry.define_function("array", [Vector2Array, Float], Vector2, None);
        registry.define_function("array", [Vector3Array, Float], Vector3, None);
        registry.define_function("array", [Vector4Array, Float], Vector4, None);
        registry.define_function("array", [ColorArray, Float], Color, None);
        registry.define_function("image", [Image, Vector2], Color, None);
        registry.define_function("image", [FloatImage, Vector2], Float, None);
        registry.define_function("image", [Vector2Image, Vector2], Vector2, None);
        registry.define_function("image", [Vector3Image, Vector2], Vector3, None);
        registry.define_function("image", [Vector4Image, Vector2], Vector4, None);

        // Provided by the platform at draw time
        registry.define_function("get_camera_direction", [Vector3], Vector3, None);

        // Implicit conversions, only from low to high precision
        registry.define_conversion(Bool, Int, 1);
        registry.define_conversion(Int, Float, 1);
        registry.define_conversion(Quaternion, Vector4, 0);
        registry.define_conversion(Vector4, Quaternion, 0);
        registry.define_conversion(Color, Vector4, 0);
        registry.define_conversion(Vector4, Color, 0);
        registry.define_conversion(Vector4Array, ColorArray, 0);
        registry.define_conversion(ColorArray, Vector4Array, 0);
        registry.define_conversion(Vector4Array2D, Image, 0);
        registry.define_conversion(Image, Vector4Image, 0);

        registry.define_constant("PI", Float, Value::Scalar(std::f64::consts::PI));
        registry.define_constant("SQRT2", Float, Value::Scalar(std::f64::consts::SQRT_2));
        registry.define_constant("SQRT1_2", Float, Value::Scalar(std::f64::consts::FRAC_1_SQRT_2));
        registry.define_constant("RED", Color, Value::from([1.0, 0.0, 0.0, 1.0]));

        registry.define_fields(Vector2, &["x", "y"]);
        registry.define_fields(Vector3, &["x", "y", "z", "r", "g", "b"]);
        registry.define_fields(Vector4, &["x", "y", "z", "w", "r", "g", "b", "a"]);
        registry.define_fields(Quaternion, &["x", "y", "z", "w"]);
        registry.define_fields(Color, &["r", "g", "b", "a"]);

        registry.build()
    }
}

impl Default for Registry {
    fn default() -> Registry {
        Registry::new()
    }
}

/// Index of a field within a value's components.
pub fn field_index(field: &str) -> Option<usize> {
    match field {
        "x" | "r" => Some(0),
        "y" | "g" => Some(1),
        "z" | "b" => Some(2),
        "w" | "a" => Some(3),
        _ => None,
    }
}

struct RegistryBuilder {
    registry: Registry,
}

impl RegistryBuilder {
    fn new() -> RegistryBuilder {
        RegistryBuilder {
            registry: Registry {
                intrinsics: Vec::new(),
                by_name: FxHashMap::default(),
                by_internal_name: FxHashMap::default(),
                conversions: FxHashMap::default(),
                constants: FxHashMap::default(),
                fields: FxHashMap::default(),
            },
        }
    }

    fn define_function<const ARITY: usize>(
        &mut self,
        name: &str,
        param_types: [ValueType; ARITY],
        return_type: ValueType,
        step: Option<Step>,
    ) -> String {
        let internal_name = internal_name(name, &param_types, return_type);
        let index = self.registry.intrinsics.len();
        self.registry.intrinsics.push(Intrinsic {
            name: name.to_owned(),
            internal_name: internal_name.clone(),
            param_types: param_types.to_vec(),
            return_type,
            step,
        });
        self.registry.by_name.entry(name.to_owned()).or_default().push(index);
        self.registry.by_internal_name.insert(internal_name.clone(), index);
        internal_name
    }

    fn define_operator<const ARITY: usize>(
        &mut self,
        op: &str,
        param_types: [ValueType; ARITY],
        return_type: ValueType,
        step: Option<Step>,
    ) {
        self.define_function(&operator_name(op), param_types, return_type, step);
    }

    /// Conversions are registered as unary intrinsics named
    /// `cast:<source>:<target>`, which are not callable from source code.
    fn define_conversion(&mut self, source: ValueType, target: ValueType, rank: u32) {
        let name = format!("cast:{source}:{target}");
        let step: Step = |args| args.first().cloned();
        let internal_name = self.define_function(&name, [source], target, Some(step));
        let conversion = Conversion {
            internal_name,
            rank,
        };
        self.registry.conversions.insert((source, target), conversion);
    }

    fn define_constant(&mut self, name: &'static str, r#type: ValueType, value: Value) {
        self.registry.constants.insert(name, Constant { r#type, value });
    }

    fn define_fields(&mut self, base: ValueType, fields: &[&'static str]) {
        for field in fields {
            self.registry.fields.insert((base, *field), ValueType::Float);
        }
    }

    fn build(self) -> Registry {
        self.registry
    }
}


fn map_components(value: &Value, f: impl Fn(f64) -> f64) -> Value {
    match value {
        Value::Scalar(value) => Value::Scalar(f(*value)),
        Value::Vector(components) => Value::Vector(components.iter().map(|c| f(*c)).collect()),
    }
}

/// Combine two values component-wise, broadcasting scalars.
fn zip_components(a: &Value, b: &Value, f: impl Fn(f64, f64) -> f64) -> Option<Value> {
    match (a, b) {
        (Value::Scalar(a), Value::Scalar(b)) => Some(Value::Scalar(f(*a, *b))),
        (Value::Vector(a), Value::Scalar(b)) => Some(Value::Vector(a.iter().map(|a| f(*a, *b)).collect())),
        (Value::Scalar(a), Value::Vector(b)) => Some(Value::Vector(b.iter().map(|b| f(*a, *b)).collect())),
        (Value::Vector(a), Value::Vector(b)) if a.len() == b.len() => {
            Some(Value::Vector(a.iter().zip(b).map(|(a, b)| f(*a, *b)).collect()))
        }
        (Value::Vector(_), Value::Vector(_)) => None,
    }
}

fn int_div(a: f64, b: f64) -> Option<f64> {
    if b == 0.0 {
        return None;
    }
    Some((a / b).trunc())
}

fn int_rem(a: f64, b: f64) -> Option<f64> {
    if b == 0.0 {
        return None;
    }
    Some(a % b)
}

fn dot(a: &Value, b: &Value) -> f64 {
    a.components().iter().zip(b.components()).map(|(a, b)| a * b).sum()
}

fn mix(args: &[Value]) -> Option<Value> {
    match args {
        [a, b, Value::Scalar(t)] => zip_components(a, b, |a, b| a + (b - a) * t),
        _ => None,
    }
}

fn normalize(args: &[Value]) -> Option<Value> {
    match args {
        [a] => {
            let length = dot(a, a).sqrt();
            Some(map_components(a, |c| c / length))
        }
        _ => None,
    }
}

fn cross(args: &[Value]) -> Option<Value> {
    match args {
        [a, b] => match (a.components(), b.components()) {
            ([ax, ay, az], [bx, by, bz]) => Some(Value::from([
                ay * bz - az * by,
                az * bx - ax * bz,
                ax * by - ay * bx,
            ])),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_names() {
        let registry = Registry::shared();
        let add = registry.functions("@+").next().unwrap();
        assert_eq!(add.internal_name(), "@@+:float,float:float");
        assert!(registry.intrinsic("@Vector2:float,float:Vector2").is_some());
        assert!(registry.intrinsic("@cast:int:float:int:float").is_some());
    }

    #[test]
    fn overloads_keep_declaration_order() {
        let registry = Registry::shared();
        let colors = registry
            .functions("Color")
            .map(|intrinsic| intrinsic.param_types().len())
            .collect::<Vec<_>>();
        assert_eq!(colors, [4, 3, 2, 1]);
    }

    #[test]
    fn conversions_are_ranked() {
        let registry = Registry::shared();
        assert_eq!(registry.conversion(ValueType::Int, ValueType::Float).unwrap().rank, 1);
        assert_eq!(registry.conversion(ValueType::Bool, ValueType::Int).unwrap().rank, 1);
        assert_eq!(registry.conversion(ValueType::Color, ValueType::Vector4).unwrap().rank, 0);
        assert!(registry.conversion(ValueType::Float, ValueType::Int).is_none());
        assert!(registry.conversion(ValueType::Image, ValueType::Vector4Array2D).is_none());
    }

    #[test]
    fn fields_and_constants() {
        let registry = Registry::shared();
        assert_eq!(registry.field_type(ValueType::Vector3, "r"), Some(ValueType::Float));
        assert_eq!(registry.field_type(ValueType::Vector2, "z"), None);
        assert_eq!(registry.field_type(ValueType::Color, "x"), None);
        assert_eq!(registry.constant("PI").unwrap().r#type, ValueType::Float);
        assert!(registry.constant("TAU").is_none());
    }

    #[test]
    fn host_steps() {
        let registry = Registry::shared();
        let eval = |name: &str, args: &[Value]| {
            let intrinsic = registry.intrinsic(name).unwrap();
            (intrinsic.step().unwrap())(args)
        };
        assert_eq!(
            eval("@@*:Vector2,float:Vector2", &[Value::from([1.0, 2.0]), Value::Scalar(2.0)]),
            Some(Value::from([2.0, 4.0]))
        );
        assert_eq!(
            eval("@@/:int,int:int", &[Value::Scalar(7.0), Value::Scalar(2.0)]),
            Some(Value::Scalar(3.0))
        );
        assert_eq!(eval("@@/:int,int:int", &[Value::Scalar(7.0), Value::Scalar(0.0)]), None);
        assert_eq!(
            eval("@@<=:int,int:bool", &[Value::Scalar(2.0), Value::Scalar(2.0)]),
            Some(Value::Scalar(1.0))
        );
        assert_eq!(
            eval("@cross:Vector3,Vector3:Vector3", &[Value::from([1.0, 0.0, 0.0]), Value::from([0.0, 1.0, 0.0])]),
            Some(Value::from([0.0, 0.0, 1.0]))
        );
        assert_eq!(eval("@int:float:int", &[Value::Scalar(2.7)]), Some(Value::Scalar(2.0)));
        assert!(registry.intrinsic("@quat_conj:Quaternion:Quaternion").unwrap().step().is_none());
    }
}
