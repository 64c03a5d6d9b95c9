//! Builtin shaders.

use once_cell::sync::Lazy;

use crate::Specification;

const BASIC: &str = r#"
shader Default(
    color: Color = [0, 0, 0, 1]
) {
    emit { color: color };
}
"#;

const LIGHTING: &str = r#"
shader Default(
    color: Color = [0, 0, 0, 1],
    normal: Vector3,
    position: Vector3
) {
    let lighting = normalize(position);
    let NdotL = abs(dot(normal, lighting));
    let s = NdotL * 0.5 + 0.5;
    emit { color: Color(s * color.r, s * color.g, s * color.b, color.a) };
}
"#;

/// Compile one function of a builtin source.
pub(crate) fn builtin(source: &str, name: &str) -> Specification {
    match crate::compile_string(source) {
        Ok(mut specifications) => match specifications.shift_remove(name) {
            Some(specification) => specification,
            None => panic!("builtin source does not define `{name}`"),
        },
        Err(error) => panic!("failed to compile builtin `{name}`: {error}"),
    }
}

static BASIC_SHADER: Lazy<Specification> = Lazy::new(|| builtin(BASIC, "Default"));
static LIGHTING_SHADER: Lazy<Specification> = Lazy::new(|| builtin(LIGHTING, "Default"));

/// Passes the `color` attribute of each vertex through unchanged.
pub fn basic() -> &'static Specification {
    &BASIC_SHADER
}

/// Shades `color` by the angle between the surface `normal` and the direction
/// to `position`.
pub fn lighting() -> &'static Specification {
    &LIGHTING_SHADER
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;
    use crate::eval::evaluate;
    use crate::specification::SpecificationKind;
    use crate::types::{Value, ValueType};
    use crate::Registry;

    #[test]
    fn builtin_shaders_compile() {
        for shader in [basic(), lighting()] {
            assert_eq!(shader.kind, SpecificationKind::Shader);
            assert_eq!(shader.outputs["color"], ValueType::Color);
            assert!(shader.undeclared_variables().is_empty());
        }
        assert_eq!(lighting().inputs.keys().collect::<Vec<_>>(), ["color", "normal", "position"]);
    }

    #[test]
    fn lighting_scales_color() {
        let inputs = IndexMap::from([
            ("color".to_owned(), Value::from([1.0, 1.0, 1.0, 0.5])),
            ("normal".to_owned(), Value::from([0.0, 0.0, 1.0])),
            ("position".to_owned(), Value::from([1.0, 0.0, 0.0])),
        ]);
        let vertices = evaluate(Registry::shared(), lighting(), &inputs).unwrap();
        assert_eq!(vertices[0]["color"], Value::from([0.5, 0.5, 0.5, 0.5]));
    }
}
