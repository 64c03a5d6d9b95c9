//! The interface to rendering backends.
//!
//! A backend compiles a prepared mark specification and a shader into a
//! [`PlatformMark`], which owns whatever GPU state is needed to draw it. Marks
//! only talk to backends through these traits.

use indexmap::IndexMap;

use crate::binding::{Binding, ShiftBinding, TextureBinding};
use crate::specification::Specification;
use crate::types::Value;

pub trait Platform<D> {
    type Mark: PlatformMark<D>;

    /// Compile a mark. Every input of `specification` has an entry in either
    /// `bindings` or `shift_bindings`.
    fn compile(
        &self,
        specification: &Specification,
        shader: &Specification,
        bindings: &IndexMap<String, Binding<D>>,
        shift_bindings: &IndexMap<String, ShiftBinding>,
    ) -> Self::Mark;
}

/// Updates to the per-draw state of a compiled mark.
pub trait UniformSink {
    fn update_uniform(&mut self, name: &str, value: &Value);
    fn update_texture(&mut self, name: &str, texture: &dyn TextureBinding);
}

pub trait PlatformMark<D>: UniformSink {
    /// Uploaded data, as returned by [`PlatformMark::upload_data`].
    type Data;

    /// Whether `name` was compiled as a value shared by every element, so that
    /// it can change without recompiling.
    fn is_uniform(&self, name: &str) -> bool;

    /// Upload one dataset per instance.
    fn upload_data(&mut self, datasets: &[&[D]]) -> Self::Data;

    /// Draw the uploaded data. `on_render` is called before each instance is
    /// drawn, with the index of the instance.
    fn render(&mut self, data: &Self::Data, on_render: &mut dyn FnMut(usize, &mut dyn UniformSink));
}
