//! Marks bound to data and compiled for a platform.
//!
//! A [`Mark`] holds a specification together with the current binding of each
//! of its inputs. Compiling for the platform is deferred until the mark is
//! prepared, and the compiled mark is kept until a binding change requires a
//! different specification. Literal bindings of inputs that the platform
//! compiled as uniforms are updated in place.

use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::binding::{Binding, BindingValue, RuntimeError, ShiftBinding, SHIFT_SUFFIXES};
use crate::platform::{Platform, PlatformMark, UniformSink};
use crate::scale::ScaleBinding;
use crate::specification::{Expr, Input, Specification, Stmt};
use crate::types::Value;

#[derive(Debug)]
pub enum MarkBinding<D> {
    Value(Binding<D>),
    Scale(ScaleBinding<D>),
}

/// One instance of a mark, drawn with its own data and uniform values.
pub struct Instance<D> {
    pub data: Vec<D>,
    pub attrs: IndexMap<String, Value>,
    /// Called before the instance is drawn.
    pub on_render: Option<Box<dyn FnOnce()>>,
}

impl<D> Instance<D> {
    pub fn new(data: Vec<D>) -> Instance<D> {
        Instance {
            data,
            attrs: IndexMap::new(),
            on_render: None,
        }
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }
}

/// Produces the instance for a datum, given its index and the whole dataset.
pub type InstanceFunction<D> = Box<dyn Fn(&D, usize, &[D]) -> Instance<D>>;

/// A specification with scale bindings expanded, ready for a platform.
#[derive(Debug)]
pub struct PreparedMark<D> {
    pub specification: Specification,
    pub bindings: IndexMap<String, Binding<D>>,
    pub shift_bindings: IndexMap<String, ShiftBinding>,
}

type PlatformData<D, P> = <<P as Platform<D>>::Mark as PlatformMark<D>>::Data;

pub struct Mark<D, P: Platform<D>> {
    specification: Specification,
    shader: Specification,
    platform: P,
    bindings: IndexMap<String, MarkBinding<D>>,
    shift_bindings: IndexMap<String, ShiftBinding>,
    data: Vec<D>,
    instance: Option<InstanceFunction<D>>,
    platform_mark: Option<P::Mark>,
    platform_data: Option<PlatformData<D, P>>,
    should_upload_data: bool,
}

impl<D, P: Platform<D>> Mark<D, P> {
    /// Create a mark drawn with the basic shader.
    pub fn new(specification: Specification, platform: P) -> Mark<D, P> {
        Mark::with_shader(specification, crate::shaders::basic().clone(), platform)
    }

    /// Create a mark. Inputs start out bound to their defaults, and inputs
    /// named after another input with a shift suffix read that input from the
    /// neighbouring data.
    pub fn with_shader(specification: Specification, shader: Specification, platform: P) -> Mark<D, P> {
        let mut bindings = IndexMap::new();
        let mut shift_bindings = IndexMap::new();
        for (name, input) in &specification.inputs {
            if let Some(default) = &input.default {
                let binding = Binding::new(input.r#type, BindingValue::Literal(default.clone()));
                bindings.insert(name.clone(), MarkBinding::Value(binding));
            }
            for (suffix, offset) in SHIFT_SUFFIXES {
                let shifted = format!("{name}{suffix}");
                if specification.inputs.contains_key(&shifted) {
                    let name = name.clone();
                    shift_bindings.insert(shifted, ShiftBinding { name, offset });
                }
            }
        }

        Mark {
            specification,
            shader,
            platform,
            bindings,
            shift_bindings,
            data: Vec::new(),
            instance: None,
            platform_mark: None,
            platform_data: None,
            should_upload_data: true,
        }
    }

    pub fn specification(&self) -> &Specification {
        &self.specification
    }

    pub fn is_compiled(&self) -> bool {
        self.platform_mark.is_some()
    }

    pub fn get_attr(&self, name: &str) -> Result<&MarkBinding<D>, RuntimeError> {
        (self.bindings.get(name)).ok_or_else(|| RuntimeError::UndefinedAttribute(name.to_owned()))
    }

    /// Bind an input. Literals fitting a uniform of the compiled mark are
    /// uploaded directly, and other changes discard the compiled mark.
    pub fn attr(&mut self, name: &str, value: impl Into<BindingValue<D>>) -> Result<&mut Self, RuntimeError> {
        let input = self.input(name)?;
        let binding = Binding::new(input.r#type, value.into());
        if let Some(value) = binding.literal() {
            if !input.r#type.accepts(value) {
                return Err(RuntimeError::MismatchedValue {
                    name: name.to_owned(),
                    value: value.clone(),
                    value_type: input.r#type,
                });
            }
        }

        let was_scale = matches!(self.bindings.get(name), Some(MarkBinding::Scale(_)));
        let was_shifted = self.shift_bindings.shift_remove(name).is_some();
        let in_place = !was_scale && !was_shifted && !binding.is_function();
        match &mut self.platform_mark {
            Some(platform_mark) if in_place && platform_mark.is_uniform(name) => match binding.value() {
                BindingValue::Literal(value) => {
                    trace!(name, %value, "updating uniform");
                    platform_mark.update_uniform(name, value);
                }
                BindingValue::Texture(texture) => platform_mark.update_texture(name, texture.as_ref()),
                BindingValue::Function(_) => {}
            },
            _ => self.invalidate(),
        }
        self.bindings.insert(name.to_owned(), MarkBinding::Value(binding));
        Ok(self)
    }

    /// Bind an input to a scale, which is then computed as part of the
    /// specification.
    pub fn scale(&mut self, name: &str, scale: ScaleBinding<D>) -> Result<&mut Self, RuntimeError> {
        let input = self.input(name)?;
        if scale.return_type() != input.r#type {
            return Err(RuntimeError::MismatchedScale {
                name: name.to_owned(),
                found: scale.return_type(),
                expected: input.r#type,
            });
        }
        self.shift_bindings.shift_remove(name);
        self.invalidate();
        self.bindings.insert(name.to_owned(), MarkBinding::Scale(scale));
        Ok(self)
    }

    pub fn data(&self) -> &[D] {
        &self.data
    }

    pub fn set_data(&mut self, data: Vec<D>) -> &mut Self {
        self.data = data;
        self.should_upload_data = true;
        self
    }

    /// Draw one instance per datum instead of one for the whole dataset.
    pub fn set_instance(&mut self, f: impl Fn(&D, usize, &[D]) -> Instance<D> + 'static) -> &mut Self {
        self.instance = Some(Box::new(f));
        self.should_upload_data = true;
        self
    }

    fn input(&self, name: &str) -> Result<Input, RuntimeError> {
        (self.specification.inputs.get(name).cloned())
            .ok_or_else(|| RuntimeError::UndefinedAttribute(name.to_owned()))
    }

    fn invalidate(&mut self) {
        if self.platform_mark.take().is_some() {
            debug!("discarding compiled mark");
        }
        self.platform_data = None;
        self.should_upload_data = true;
    }

    /// Expand scale bindings into the specification.
    ///
    /// The input bound to a scale becomes a variable, assigned at the start
    /// of the body from the scale expression. Each scale attribute becomes a
    /// new input named after the input and the attribute. Shifted copies of
    /// the input are computed from shifted copies of the attributes bound to
    /// functions.
    pub fn prepare_specification(&self) -> Result<PreparedMark<D>, RuntimeError> {
        let mut specification = self.specification.clone();
        let mut bindings = (self.bindings.iter())
            .filter_map(|(name, binding)| match binding {
                MarkBinding::Value(binding) => Some((name.clone(), binding.clone())),
                MarkBinding::Scale(_) => None,
            })
            .collect::<IndexMap<_, _>>();
        let mut shift_bindings = self.shift_bindings.clone();
        let mut prologue = Vec::new();

        for (name, binding) in &self.bindings {
            let MarkBinding::Scale(scale) = binding else { continue };
            let Some(input) = specification.inputs.shift_remove(name) else { continue };
            let attributes = scale.attributes();

            let mut attrs = IndexMap::new();
            for attr in &attributes {
                let bound_name = format!("{name}{}", attr.name);
                let input = Input {
                    r#type: attr.value_type,
                    default: None,
                };
                specification.inputs.insert(bound_name.clone(), input);
                bindings.insert(bound_name.clone(), Binding::new(attr.value_type, attr.binding.clone()));
                attrs.insert(attr.name.clone(), Expr::variable(bound_name, attr.value_type));
            }
            specification.variables.insert(name.clone(), input.r#type);
            prologue.push(Stmt::Assign(name.clone(), scale.expression(&attrs)?));
            debug!(name = name.as_str(), attributes = attributes.len(), "expanded scale");

            for (suffix, offset) in SHIFT_SUFFIXES {
                let shifted = format!("{name}{suffix}");
                if specification.inputs.shift_remove(&shifted).is_none() {
                    continue;
                }
                shift_bindings.shift_remove(&shifted);
                bindings.shift_remove(&shifted);
                specification.variables.insert(shifted.clone(), input.r#type);

                let mut shifted_attrs = IndexMap::new();
                for attr in &attributes {
                    let bound_name = format!("{name}{}", attr.name);
                    let expr = match attr.binding {
                        BindingValue::Function(_) => {
                            let shifted_name = format!("{bound_name}{suffix}");
                            let input = Input {
                                r#type: attr.value_type,
                                default: None,
                            };
                            specification.inputs.insert(shifted_name.clone(), input);
                            let shift = ShiftBinding {
                                name: bound_name,
                                offset,
                            };
                            shift_bindings.insert(shifted_name.clone(), shift);
                            Expr::variable(shifted_name, attr.value_type)
                        }
                        BindingValue::Literal(_) | BindingValue::Texture(_) => {
                            Expr::variable(bound_name, attr.value_type)
                        }
                    };
                    shifted_attrs.insert(attr.name.clone(), expr);
                }
                prologue.push(Stmt::Assign(shifted, scale.expression(&shifted_attrs)?));
            }
        }

        if let Some(name) = (specification.inputs.keys())
            .find(|name| !bindings.contains_key(*name) && !shift_bindings.contains_key(*name))
        {
            return Err(RuntimeError::UndefinedAttribute(name.clone()));
        }

        prologue.append(&mut specification.statements);
        specification.statements = prologue;
        Ok(PreparedMark {
            specification,
            bindings,
            shift_bindings,
        })
    }

    /// Compile the mark if needed, then upload any changed data.
    pub fn prepare(&mut self) -> Result<&mut Self, RuntimeError> {
        if self.platform_mark.is_none() {
            let prepared = self.prepare_specification()?;
            let platform_mark = self.platform.compile(
                &prepared.specification,
                &self.shader,
                &prepared.bindings,
                &prepared.shift_bindings,
            );
            debug!(
                inputs = prepared.specification.inputs.len(),
                shift_bindings = prepared.shift_bindings.len(),
                "compiled mark",
            );
            self.platform_mark = Some(platform_mark);
            self.should_upload_data = true;
        }

        if self.should_upload_data {
            if let Some(platform_mark) = &mut self.platform_mark {
                let data = match &self.instance {
                    None => platform_mark.upload_data(&[self.data.as_slice()]),
                    Some(instance) => {
                        let instances = (self.data.iter().enumerate())
                            .map(|(index, datum)| instance(datum, index, &self.data))
                            .collect::<Vec<_>>();
                        let datasets = (instances.iter())
                            .map(|instance| instance.data.as_slice())
                            .collect::<Vec<_>>();
                        platform_mark.upload_data(&datasets)
                    }
                };
                debug!(data = self.data.len(), "uploaded data");
                self.platform_data = Some(data);
            }
            self.should_upload_data = false;
        }
        Ok(self)
    }

    pub fn render(&mut self) -> Result<&mut Self, RuntimeError> {
        self.prepare()?;

        let bindings = &self.bindings;
        let data = self.data.as_slice();
        let instance = &self.instance;
        if let (Some(platform_mark), Some(platform_data)) = (&mut self.platform_mark, &self.platform_data) {
            platform_mark.render(platform_data, &mut |index: usize, sink: &mut dyn UniformSink| {
                if let (Some(instance), Some(datum)) = (instance, data.get(index)) {
                    let instance = instance(datum, index, data);
                    for (name, value) in &instance.attrs {
                        sink.update_uniform(name, value);
                    }
                    if let Some(on_render) = instance.on_render {
                        on_render();
                    }
                }
                upload_scale_uniforms(bindings, sink);
            });
        }
        Ok(self)
    }
}

/// Upload the literal attributes of every scale binding.
fn upload_scale_uniforms<D>(bindings: &IndexMap<String, MarkBinding<D>>, sink: &mut dyn UniformSink) {
    for (name, binding) in bindings {
        let MarkBinding::Scale(scale) = binding else { continue };
        for attr in scale.attributes() {
            let bound_name = format!("{name}{}", attr.name);
            match &attr.binding {
                BindingValue::Literal(value) => sink.update_uniform(&bound_name, value),
                BindingValue::Texture(texture) => sink.update_texture(&bound_name, texture.as_ref()),
                BindingValue::Function(_) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::binding::TextureBinding;
    use crate::eval::evaluate;
    use crate::scale;
    use crate::types::ValueType;
    use crate::Registry;

    #[derive(Default)]
    struct Log {
        compiles: Vec<PreparedMark<f64>>,
        uniforms: Vec<(String, Value)>,
        uploads: Vec<Vec<usize>>,
        renders: usize,
    }

    struct MockPlatform(Rc<RefCell<Log>>);

    struct MockMark {
        log: Rc<RefCell<Log>>,
        uniforms: Vec<String>,
    }

    impl Platform<f64> for MockPlatform {
        type Mark = MockMark;

        fn compile(
            &self,
            specification: &Specification,
            _: &Specification,
            bindings: &IndexMap<String, Binding<f64>>,
            shift_bindings: &IndexMap<String, ShiftBinding>,
        ) -> MockMark {
            let uniforms = (bindings.iter())
                .filter(|(_, binding)| !binding.is_function())
                .map(|(name, _)| name.clone())
                .collect();
            self.0.borrow_mut().compiles.push(PreparedMark {
                specification: specification.clone(),
                bindings: bindings.clone(),
                shift_bindings: shift_bindings.clone(),
            });
            MockMark {
                log: Rc::clone(&self.0),
                uniforms,
            }
        }
    }

    impl UniformSink for MockMark {
        fn update_uniform(&mut self, name: &str, value: &Value) {
            self.log.borrow_mut().uniforms.push((name.to_owned(), value.clone()));
        }

        fn update_texture(&mut self, _: &str, _: &dyn TextureBinding) {}
    }

    impl PlatformMark<f64> for MockMark {
        type Data = usize;

        fn is_uniform(&self, name: &str) -> bool {
            self.uniforms.iter().any(|uniform| uniform == name)
        }

        fn upload_data(&mut self, datasets: &[&[f64]]) -> usize {
            let lengths = datasets.iter().map(|data| data.len()).collect();
            self.log.borrow_mut().uploads.push(lengths);
            datasets.len()
        }

        fn render(&mut self, instances: &usize, on_render: &mut dyn FnMut(usize, &mut dyn UniformSink)) {
            self.log.borrow_mut().renders += 1;
            for index in 0..*instances {
                on_render(index, self);
            }
        }
    }

    fn mark(source: &str) -> (Mark<f64, MockPlatform>, Rc<RefCell<Log>>) {
        let specifications = crate::compile_string(source).unwrap();
        let log = Rc::new(RefCell::new(Log::default()));
        let mark = Mark::new(specifications[0].clone(), MockPlatform(Rc::clone(&log)));
        (mark, log)
    }

    fn datum() -> BindingValue<f64> {
        BindingValue::function(|datum: &f64, _| Value::Scalar(*datum))
    }

    #[test]
    fn scales_become_variables() {
        let (mut mark, _) = mark("mark M(x: float, y: float = 1) { emit [{ v: x + y }]; }");
        let scale = scale::linear(ValueType::Float).domain(0.0, 10.0).range(0.0, 1.0).bind(datum());
        mark.scale("x", scale).unwrap();

        let prepared = mark.prepare_specification().unwrap();
        let specification = &prepared.specification;
        assert!(!specification.inputs.contains_key("x"));
        assert_eq!(specification.variables["x"], ValueType::Float);
        assert_eq!(
            specification.inputs.keys().collect::<Vec<_>>(),
            ["y", "xsd0", "xsd1", "xsr0", "xsr1", "xa0"]
        );
        let assignments = (specification.statements.iter())
            .filter(|stmt| matches!(stmt, Stmt::Assign(name, _) if name == "x"))
            .count();
        assert_eq!(assignments, 1);
        assert!(matches!(&specification.statements[0], Stmt::Assign(name, _) if name == "x"));
        assert!(prepared.bindings["xa0"].is_function());
        assert!(!prepared.bindings.contains_key("x"));

        let mut inputs = (prepared.bindings.iter())
            .filter_map(|(name, binding)| Some((name.clone(), binding.literal()?.clone())))
            .collect::<IndexMap<_, _>>();
        inputs.insert("xa0".to_owned(), Value::Scalar(5.0));
        let vertices = evaluate(Registry::shared(), specification, &inputs).unwrap();
        assert_eq!(vertices[0]["v"], Value::Scalar(1.5));
    }

    #[test]
    fn scaled_inputs_shift_their_functions() {
        let (mut mark, _) = mark("mark M(x: float, x_n: float) { emit [{ v: x_n - x }]; }");
        assert_eq!(
            mark.shift_bindings["x_n"],
            ShiftBinding {
                name: "x".to_owned(),
                offset: 1
            }
        );
        mark.scale("x", scale::mul(datum(), 2.0).unwrap()).unwrap();

        let prepared = mark.prepare_specification().unwrap();
        let specification = &prepared.specification;
        assert_eq!(specification.inputs.keys().collect::<Vec<_>>(), ["xa0", "xa1", "xa0_n"]);
        assert_eq!(specification.variables["x_n"], ValueType::Float);
        assert_eq!(
            prepared.shift_bindings.into_iter().collect::<Vec<_>>(),
            [(
                "xa0_n".to_owned(),
                ShiftBinding {
                    name: "xa0".to_owned(),
                    offset: 1
                }
            )]
        );

        let inputs = IndexMap::from([
            ("xa0".to_owned(), Value::Scalar(1.0)),
            ("xa1".to_owned(), Value::Scalar(2.0)),
            ("xa0_n".to_owned(), Value::Scalar(4.0)),
        ]);
        let vertices = evaluate(Registry::shared(), specification, &inputs).unwrap();
        assert_eq!(vertices[0]["v"], Value::Scalar(6.0));
    }

    #[test]
    fn polylines_bind_their_neighbours() {
        let log = Rc::new(RefCell::new(Log::default()));
        let mut mark = Mark::new(crate::marks::polyline(), MockPlatform(Rc::clone(&log)));
        mark.attr("p", BindingValue::function(|datum: &f64, _| Value::from([*datum, 0.0]))).unwrap();
        mark.set_data(vec![0.0, 1.0, 2.0]).prepare().unwrap();
        let log = log.borrow();
        let offsets = (log.compiles[0].shift_bindings.iter())
            .map(|(name, shift)| (name.as_str(), shift.name.as_str(), shift.offset))
            .collect::<Vec<_>>();
        assert_eq!(offsets, [("p_p", "p", -1), ("p_n", "p", 1), ("p_nn", "p", 2)]);
        assert_eq!(log.uploads, [vec![3]]);
    }

    #[test]
    fn uniform_literals_keep_the_compiled_mark() {
        let (mut mark, log) = mark("mark M(x: float = 0, size: float = 1) { emit [{ v: x * size }]; }");
        mark.attr("x", datum()).unwrap();
        mark.set_data(vec![1.0, 2.0]).render().unwrap();
        assert!(mark.is_compiled());
        assert_eq!(log.borrow().compiles.len(), 1);

        mark.attr("size", 2.0).unwrap();
        assert!(mark.is_compiled());
        assert_eq!(log.borrow().uniforms, [("size".to_owned(), Value::Scalar(2.0))]);

        mark.attr("size", datum()).unwrap();
        assert!(!mark.is_compiled());
        mark.render().unwrap();
        assert_eq!(log.borrow().compiles.len(), 2);
        assert_eq!(log.borrow().renders, 2);

        mark.set_data(vec![3.0]).render().unwrap();
        assert_eq!(log.borrow().compiles.len(), 2);
        assert_eq!(log.borrow().uploads, [vec![2], vec![2], vec![1]]);
    }

    #[test]
    fn scale_uniforms_are_uploaded_on_render() {
        let (mut mark, log) = mark("mark M(x: float) { emit [{ v: x }]; }");
        mark.scale("x", scale::add(datum(), 3.0).unwrap()).unwrap();
        mark.set_data(vec![1.0]).render().unwrap();
        assert_eq!(log.borrow().uniforms, [("xa1".to_owned(), Value::Scalar(3.0))]);
    }

    #[test]
    fn instances_upload_their_own_data() {
        let (mut mark, log) = mark("mark M(x: float = 0, size: float = 1) { emit [{ v: x * size }]; }");
        mark.attr("x", datum()).unwrap();
        mark.set_data(vec![1.0, 2.0]);
        mark.set_instance(|datum, _, _| Instance::new(vec![*datum; 3]).attr("size", *datum));
        mark.render().unwrap();

        let log = log.borrow();
        assert_eq!(log.uploads, [vec![3, 3]]);
        assert_eq!(
            log.uniforms,
            [
                ("size".to_owned(), Value::Scalar(1.0)),
                ("size".to_owned(), Value::Scalar(2.0)),
            ]
        );
    }

    #[test]
    fn invalid_bindings() {
        let (mut mark, _) = mark("mark M(p: Vector2 = [0, 0]) { emit [{ v: p }]; }");
        assert_eq!(
            mark.attr("q", 1.0).err(),
            Some(RuntimeError::UndefinedAttribute("q".to_owned()))
        );
        assert!(matches!(mark.attr("p", 1.0), Err(RuntimeError::MismatchedValue { .. })));
        assert!(matches!(
            mark.scale("p", scale::linear(ValueType::Float).bind(1.0)),
            Err(RuntimeError::MismatchedScale { .. })
        ));
        let point = scale::mul(scale::vector2(datum(), 1.0).unwrap(), 2.0).unwrap();
        assert!(mark.scale("p", point).is_ok());
        let point = scale::mul(scale::vector2(datum(), 1.0).unwrap(), 2.0).unwrap();
        assert!(matches!(
            mark.scale("q", point),
            Err(RuntimeError::UndefinedAttribute(_))
        ));
        assert!(mark.get_attr("q").is_err());
        assert!(matches!(mark.get_attr("p"), Ok(MarkBinding::Scale(_))));
    }
}
