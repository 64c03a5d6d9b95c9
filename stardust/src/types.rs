//! The catalog of value types, and the constant values they describe.

use std::fmt;

/// The machine representation of the components of a value type.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Primitive {
    Float,
    Int,
    /// Opaque texture handle, sampled with the `array` and `image` intrinsics.
    Texture,
}

macro_rules! def_value_types {
    ($($(#[$attr:meta])* $Name:ident => $name:literal, $size:literal, $Primitive:ident, $count:literal),* $(,)?) => {
        /// Value types.
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum ValueType {
            $($(#[$attr])* $Name),*
        }

        impl ValueType {
            pub const ALL: &'static [ValueType] = &[$(ValueType::$Name),*];

            /// The name used in source code and in internal intrinsic names.
            pub const fn name(self) -> &'static str {
                match self {
                    $(ValueType::$Name => $name),*
                }
            }

            /// Size in bytes of one value, zero for textures.
            pub const fn size(self) -> usize {
                match self {
                    $(ValueType::$Name => $size),*
                }
            }

            pub const fn primitive(self) -> Primitive {
                match self {
                    $(ValueType::$Name => Primitive::$Primitive),*
                }
            }

            /// Number of primitive components, or components per texel for
            /// texture types.
            pub const fn primitive_count(self) -> usize {
                match self {
                    $(ValueType::$Name => $count),*
                }
            }

            pub fn from_name(name: &str) -> Option<ValueType> {
                match name {
                    $($name => Some(ValueType::$Name),)*
                    _ => None,
                }
            }
        }
    };
}

def_value_types! {
    /// Booleans, stored as integers.
    Bool => "bool", 4, Int, 1,
    /// Signed 32-bit integers.
    Int => "int", 4, Int, 1,
    /// 32-bit floating point numbers.
    Float => "float", 4, Float, 1,
    Vector2 => "Vector2", 8, Float, 2,
    Vector3 => "Vector3", 12, Float, 3,
    Vector4 => "Vector4", 16, Float, 4,
    /// Rotation quaternion, stored as `[x, y, z, w]`.
    Quaternion => "Quaternion", 16, Float, 4,
    /// RGBA color.
    Color => "Color", 16, Float, 4,

    FloatArray => "FloatArray", 0, Texture, 1,
    Vector2Array => "Vector2Array", 0, Texture, 2,
    Vector3Array => "Vector3Array", 0, Texture, 3,
    Vector4Array => "Vector4Array", 0, Texture, 4,
    ColorArray => "ColorArray", 0, Texture, 4,
    Vector4Array2D => "Vector4Array2D", 0, Texture, 4,
    Image => "Image", 0, Texture, 4,
    FloatImage => "FloatImage", 0, Texture, 1,
    Vector2Image => "Vector2Image", 0, Texture, 2,
    Vector3Image => "Vector3Image", 0, Texture, 3,
    Vector4Image => "Vector4Image", 0, Texture, 4,
}

impl ValueType {
    pub const fn is_texture(self) -> bool {
        matches!(self.primitive(), Primitive::Texture)
    }

    /// The value an input of this type takes when its declaration does not
    /// give one. Textures have no default.
    pub fn default_value(self) -> Option<Value> {
        match self {
            ValueType::Bool | ValueType::Int | ValueType::Float => Some(Value::Scalar(0.0)),
            ValueType::Vector2 => Some(Value::Vector(vec![0.0; 2])),
            ValueType::Vector3 => Some(Value::Vector(vec![0.0; 3])),
            ValueType::Vector4 => Some(Value::Vector(vec![0.0; 4])),
            ValueType::Color | ValueType::Quaternion => {
                Some(Value::Vector(vec![0.0, 0.0, 0.0, 1.0]))
            }
            _ => None,
        }
    }

    /// Check that a value has the shape this type expects.
    pub fn accepts(self, value: &Value) -> bool {
        match value {
            Value::Scalar(_) => self.primitive_count() == 1 && !self.is_texture(),
            Value::Vector(components) => {
                !self.is_texture() && self.primitive_count() > 1 && components.len() == self.primitive_count()
            }
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A constant value: a scalar or a fixed-length vector of components.
///
/// Integers and booleans are carried as scalars, with booleans encoded as
/// `0` and `1`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl Value {
    pub fn components(&self) -> &[f64] {
        match self {
            Value::Scalar(value) => std::slice::from_ref(value),
            Value::Vector(components) => components,
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Value::Scalar(value) => Some(*value),
            Value::Vector(_) => None,
        }
    }

    pub fn from_bool(value: bool) -> Value {
        Value::Scalar(if value { 1.0 } else { 0.0 })
    }

    pub fn is_truthy(&self) -> bool {
        self.components().iter().any(|component| *component != 0.0)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Value {
        Value::Scalar(value)
    }
}

impl<const N: usize> From<[f64; N]> for Value {
    fn from(components: [f64; N]) -> Value {
        Value::Vector(components.to_vec())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Scalar(value) => write!(f, "{value}"),
            Value::Vector(components) => {
                write!(f, "[")?;
                for (index, component) in components.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{component}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Return `prefix`, or the first of `prefix1`, `prefix2`, ... that is
/// accepted by `is_unused`.
pub fn attempt_name(prefix: &str, mut is_unused: impl FnMut(&str) -> bool) -> String {
    if is_unused(prefix) {
        return prefix.to_owned();
    }
    (1..)
        .map(|index| format!("{prefix}{index}"))
        .find(|candidate| is_unused(candidate.as_str()))
        .unwrap_or_else(|| unreachable!("name space exhausted"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_the_catalog() {
        for r#type in ValueType::ALL {
            assert_eq!(ValueType::from_name(r#type.name()), Some(*r#type));
        }
        assert_eq!(ValueType::from_name("vec2"), None);
    }

    #[test]
    fn sizes_follow_component_counts() {
        assert_eq!(ValueType::Float.size(), 4);
        assert_eq!(ValueType::Vector3.size(), 12);
        assert_eq!(ValueType::Color.primitive_count(), 4);
        assert_eq!(ValueType::Int.primitive(), Primitive::Int);
        assert!(ValueType::Image.is_texture());
        assert!(!ValueType::Quaternion.is_texture());
    }

    #[test]
    fn default_values() {
        assert_eq!(ValueType::Float.default_value(), Some(Value::Scalar(0.0)));
        assert_eq!(
            ValueType::Color.default_value(),
            Some(Value::from([0.0, 0.0, 0.0, 1.0]))
        );
        assert_eq!(
            ValueType::Quaternion.default_value(),
            Some(Value::from([0.0, 0.0, 0.0, 1.0]))
        );
        assert_eq!(ValueType::FloatArray.default_value(), None);
    }

    #[test]
    fn accepts_matching_shapes() {
        assert!(ValueType::Float.accepts(&Value::Scalar(1.0)));
        assert!(ValueType::Vector2.accepts(&Value::from([1.0, 2.0])));
        assert!(!ValueType::Vector2.accepts(&Value::from([1.0, 2.0, 3.0])));
        assert!(!ValueType::Color.accepts(&Value::Scalar(1.0)));
    }

    #[test]
    fn attempt_name_counts_up() {
        let taken = ["tmp", "tmp1", "tmp2"];
        assert_eq!(attempt_name("tmp", |name| !taken.contains(&name)), "tmp3");
        assert_eq!(attempt_name("x", |name| !taken.contains(&name)), "x");
    }

    #[test]
    fn display_values() {
        assert_eq!(Value::Scalar(1.5).to_string(), "1.5");
        assert_eq!(Value::from([0.0, 1.0]).to_string(), "[0, 1]");
    }
}
