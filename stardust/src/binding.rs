//! Runtime associations between mark inputs and values.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use crate::compiler::CompileError;
use crate::types::{Value, ValueType};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("attribute `{0}` is undefined")]
    UndefinedAttribute(String),
    #[error("value `{value}` does not fit attribute `{name}` of type `{value_type}`")]
    MismatchedValue {
        name: String,
        value: Value,
        value_type: ValueType,
    },
    #[error("texture bindings cannot be evaluated per element")]
    TextureIteration,
    #[error("scale bound to `{name}` produces `{found}`, expected `{expected}`")]
    MismatchedScale {
        name: String,
        found: ValueType,
        expected: ValueType,
    },
    #[error("invalid scale expression: {0}")]
    InvalidScale(#[from] CompileError),
    #[error("no overload matches scale `{0}`")]
    UnresolvedScale(String),
}

/// A function from a datum and its index to an attribute value.
pub type BindingFunction<D> = Rc<dyn Fn(&D, usize) -> Value>;

pub enum BindingValue<D> {
    Literal(Value),
    Function(BindingFunction<D>),
    Texture(Rc<dyn TextureBinding>),
}

impl<D> BindingValue<D> {
    pub fn function(f: impl Fn(&D, usize) -> Value + 'static) -> BindingValue<D> {
        BindingValue::Function(Rc::new(f))
    }

    pub fn texture(texture: impl TextureBinding + 'static) -> BindingValue<D> {
        BindingValue::Texture(Rc::new(texture))
    }
}

impl<D> Clone for BindingValue<D> {
    fn clone(&self) -> Self {
        match self {
            BindingValue::Literal(value) => BindingValue::Literal(value.clone()),
            BindingValue::Function(f) => BindingValue::Function(Rc::clone(f)),
            BindingValue::Texture(texture) => BindingValue::Texture(Rc::clone(texture)),
        }
    }
}

impl<D> fmt::Debug for BindingValue<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingValue::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            BindingValue::Function(_) => f.write_str("Function(..)"),
            BindingValue::Texture(_) => f.write_str("Texture(..)"),
        }
    }
}

impl<D> From<Value> for BindingValue<D> {
    fn from(value: Value) -> Self {
        BindingValue::Literal(value)
    }
}

impl<D> From<f64> for BindingValue<D> {
    fn from(value: f64) -> Self {
        BindingValue::Literal(Value::Scalar(value))
    }
}

impl<D, const N: usize> From<[f64; N]> for BindingValue<D> {
    fn from(components: [f64; N]) -> Self {
        BindingValue::Literal(Value::from(components))
    }
}

/// A typed binding. Bindings are replaced wholesale, never mutated.
#[derive(Debug)]
pub struct Binding<D> {
    value_type: ValueType,
    value: BindingValue<D>,
}

impl<D> Clone for Binding<D> {
    fn clone(&self) -> Self {
        Binding {
            value_type: self.value_type,
            value: self.value.clone(),
        }
    }
}

impl<D> Binding<D> {
    pub fn new(value_type: ValueType, value: BindingValue<D>) -> Binding<D> {
        Binding { value_type, value }
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn value(&self) -> &BindingValue<D> {
        &self.value
    }

    pub fn is_function(&self) -> bool {
        matches!(self.value, BindingValue::Function(_))
    }

    /// The value of a literal binding.
    pub fn literal(&self) -> Option<&Value> {
        match &self.value {
            BindingValue::Literal(value) => Some(value),
            BindingValue::Function(_) | BindingValue::Texture(_) => None,
        }
    }

    pub fn for_each(&self, data: &[D], mut f: impl FnMut(&Value, usize)) -> Result<(), RuntimeError> {
        match &self.value {
            BindingValue::Literal(value) => (0..data.len()).for_each(|index| f(value, index)),
            BindingValue::Function(function) => {
                for (index, datum) in data.iter().enumerate() {
                    f(&function(datum, index), index);
                }
            }
            BindingValue::Texture(_) => return Err(RuntimeError::TextureIteration),
        }
        Ok(())
    }

    pub fn map(&self, data: &[D]) -> Result<Vec<Value>, RuntimeError> {
        let mut values = Vec::with_capacity(data.len());
        self.for_each(data, |value, _| values.push(value.clone()))?;
        Ok(values)
    }

    /// Append the components of the value for each datum to `out`, repeated
    /// `repeat` times. Missing components are zero.
    pub fn fill_binary<T: BinaryElement>(
        &self,
        data: &[D],
        repeat: usize,
        out: &mut Vec<T>,
    ) -> Result<(), RuntimeError> {
        let count = self.value_type.primitive_count();
        out.reserve(data.len() * repeat * count);
        self.for_each(data, |value, _| {
            let components = value.components();
            for _ in 0..repeat {
                for index in 0..count {
                    out.push(T::from_component(components.get(index).copied().unwrap_or(0.0)));
                }
            }
        })
    }
}

/// Element types of binary attribute buffers.
pub trait BinaryElement: Copy {
    fn from_component(component: f64) -> Self;
}

impl BinaryElement for f32 {
    fn from_component(component: f64) -> f32 {
        component as f32
    }
}

impl BinaryElement for i32 {
    fn from_component(component: f64) -> i32 {
        component as i32
    }
}

/// Alias of the attribute `name` of a neighbouring datum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShiftBinding {
    pub name: String,
    pub offset: i32,
}

/// Input name suffixes that alias neighbouring data, with their offsets.
pub const SHIFT_SUFFIXES: [(&str, i32); 4] = [("_pp", -2), ("_p", -1), ("_n", 1), ("_nn", 2)];

#[derive(Debug, Clone, PartialEq)]
pub struct TextureData {
    pub width: usize,
    pub height: usize,
    pub dimensions: usize,
    /// Components used in each texel. Texels always store four.
    pub components: usize,
    pub data: Vec<f32>,
}

pub trait TextureBinding {
    /// The texture contents, or `None` if there is nothing to upload.
    fn texture_data(&self) -> Option<TextureData>;
}

/// A function producing the texel value of a datum, given its index and the
/// whole dataset.
pub type ArrayFunction<T> = Box<dyn Fn(&T, usize, &[T]) -> Value>;

/// A one dimensional texture with one texel per datum.
pub struct ArrayTexture<T> {
    data: RefCell<Vec<T>>,
    value: RefCell<Option<ArrayFunction<T>>>,
    cache: RefCell<Option<Option<TextureData>>>,
}

impl<T> ArrayTexture<T> {
    pub fn new() -> ArrayTexture<T> {
        ArrayTexture {
            data: RefCell::new(Vec::new()),
            value: RefCell::new(None),
            cache: RefCell::new(None),
        }
    }

    pub fn set_data(&self, data: Vec<T>) -> &Self {
        *self.data.borrow_mut() = data;
        *self.cache.borrow_mut() = None;
        self
    }

    pub fn set_value(&self, f: impl Fn(&T, usize, &[T]) -> Value + 'static) -> &Self {
        *self.value.borrow_mut() = Some(Box::new(f));
        *self.cache.borrow_mut() = None;
        self
    }

    fn build(&self) -> Option<TextureData> {
        let data = self.data.borrow();
        let value = self.value.borrow();
        let value = value.as_ref()?;
        let values = (data.iter().enumerate())
            .map(|(index, datum)| value(datum, index, &data))
            .collect::<Vec<_>>();
        let components = values.first()?.components().len().min(4);

        let mut texels = vec![0.0; values.len() * 4];
        for (texel, value) in texels.chunks_mut(4).zip(&values) {
            for (slot, component) in texel.iter_mut().zip(value.components()) {
                *slot = *component as f32;
            }
        }
        Some(TextureData {
            width: values.len(),
            height: 1,
            dimensions: 1,
            components,
            data: texels,
        })
    }
}

impl<T> Default for ArrayTexture<T> {
    fn default() -> ArrayTexture<T> {
        ArrayTexture::new()
    }
}

impl<T> TextureBinding for ArrayTexture<T> {
    fn texture_data(&self) -> Option<TextureData> {
        let mut cache = self.cache.borrow_mut();
        cache.get_or_insert_with(|| self.build()).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_and_function_bindings() {
        let data = [1.0, 2.0, 3.0];
        let literal = Binding::<f64>::new(ValueType::Float, Value::Scalar(5.0).into());
        assert_eq!(literal.map(&data).unwrap(), vec![Value::Scalar(5.0); 3]);
        assert!(!literal.is_function());

        let function = Binding::new(
            ValueType::Vector2,
            BindingValue::function(|datum: &f64, index| Value::from([*datum, index as f64])),
        );
        assert!(function.is_function());
        let mut out = Vec::<f32>::new();
        function.fill_binary(&data, 2, &mut out).unwrap();
        assert_eq!(out, [1.0, 0.0, 1.0, 0.0, 2.0, 1.0, 2.0, 1.0, 3.0, 2.0, 3.0, 2.0]);
    }

    #[test]
    fn textures_cannot_be_iterated() {
        let binding = Binding::<f64>::new(ValueType::FloatArray, BindingValue::texture(ArrayTexture::<f64>::new()));
        assert_eq!(binding.map(&[1.0]), Err(RuntimeError::TextureIteration));
    }

    #[test]
    fn array_textures_pad_texels() {
        let texture = ArrayTexture::new();
        assert_eq!(texture.texture_data(), None);

        texture.set_value(|datum: &f64, _, _| Value::from([*datum, -*datum]));
        texture.set_data(vec![1.0, 2.0]);
        let data = texture.texture_data().unwrap();
        assert_eq!((data.width, data.height, data.components), (2, 1, 2));
        assert_eq!(data.data, [1.0, -1.0, 0.0, 0.0, 2.0, -2.0, 0.0, 0.0]);

        texture.set_data(Vec::new());
        assert_eq!(texture.texture_data(), None);
    }
}
