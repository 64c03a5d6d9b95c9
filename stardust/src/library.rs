//! Builtin modules of marks, importable from source files.

use once_cell::sync::Lazy;

use crate::source::FileId;
use crate::syntax::{self, Block, Function, ParseError};

/// Builtin module names and sources. The index of each module is the file id
/// its source is parsed with.
pub const SOURCES: &[(&str, &str)] = &[("P2D", P2D), ("P3D", P3D)];

const P2D: &str = r#"
mark Triangle(
    p1: Vector2,
    p2: Vector2,
    p3: Vector2,
    color: Color = [0, 0, 0, 1]
) {
    emit [
        { position: p1, color: color },
        { position: p2, color: color },
        { position: p3, color: color }
    ];
}

mark Rectangle(
    p1: Vector2,
    p2: Vector2,
    color: Color = [0, 0, 0, 1]
) {
    emit [
        { position: Vector2(p1.x, p1.y), color: color },
        { position: Vector2(p2.x, p1.y), color: color },
        { position: Vector2(p2.x, p2.y), color: color }
    ];
    emit [
        { position: Vector2(p1.x, p1.y), color: color },
        { position: Vector2(p1.x, p2.y), color: color },
        { position: Vector2(p2.x, p2.y), color: color }
    ];
}

mark OutlinedRectangle(
    p1: Vector2,
    p2: Vector2,
    width: float = 1,
    color: Color = [0, 0, 0, 1]
) {
    Rectangle(p1, Vector2(p1.x + width, p2.y - width), color);
    Rectangle(Vector2(p1.x, p2.y - width), Vector2(p2.x - width, p2.y), color);
    Rectangle(Vector2(p1.x + width, p1.y), Vector2(p2.x, p1.y + width), color);
    Rectangle(Vector2(p2.x - width, p1.y + width), p2, color);
}

mark Hexagon(
    center: Vector2,
    radius: float,
    color: Color = [0, 0, 0, 1]
) {
    for (i in 0..5) {
        let a1 = i / 6.0 * PI * 2.0;
        let a2 = (i + 1) / 6.0 * PI * 2.0;
        let p1 = Vector2(radius * cos(a1), radius * sin(a1));
        let p2 = Vector2(radius * cos(a2), radius * sin(a2));
        emit [
            { position: center + p1, color: color },
            { position: center, color: color },
            { position: center + p2, color: color }
        ];
    }
}

mark Circle16(
    center: Vector2,
    radius: float,
    color: Color = [0, 0, 0, 1]
) {
    for (i in 0..15) {
        let a1 = i / 16.0 * PI * 2.0;
        let a2 = (i + 1) / 16.0 * PI * 2.0;
        let p1 = Vector2(radius * cos(a1), radius * sin(a1));
        let p2 = Vector2(radius * cos(a2), radius * sin(a2));
        emit [
            { position: center + p1, color: color },
            { position: center, color: color },
            { position: center + p2, color: color }
        ];
    }
}

mark Circle(
    center: Vector2,
    radius: float,
    color: Color = [0, 0, 0, 1]
) {
    for (i in 0..31) {
        let a1 = i / 32.0 * PI * 2.0;
        let a2 = (i + 1) / 32.0 * PI * 2.0;
        let p1 = Vector2(radius * cos(a1), radius * sin(a1));
        let p2 = Vector2(radius * cos(a2), radius * sin(a2));
        emit [
            { position: center + p1, color: color },
            { position: center, color: color },
            { position: center + p2, color: color }
        ];
    }
}

mark Line(
    p1: Vector2,
    p2: Vector2,
    thickness: float = 1,
    color: Color = [0, 0, 0, 1]
) {
    let d = normalize(p2 - p1);
    let t = Vector2(d.y, -d.x) * (thickness / 2);
    emit [
        { position: p1 + t, color: color },
        { position: p1 - t, color: color },
        { position: p2 + t, color: color }
    ];
    emit [
        { position: p1 - t, color: color },
        { position: p2 - t, color: color },
        { position: p2 + t, color: color }
    ];
}
"#;

const P3D: &str = r#"
mark Triangle(
    p1: Vector3,
    p2: Vector3,
    p3: Vector3,
    color: Color = [0, 0, 0, 1]
) {
    let normal = normalize(cross(p2 - p1, p3 - p1));
    emit [
        { position: p1, color: color, normal: normal },
        { position: p2, color: color, normal: normal },
        { position: p3, color: color, normal: normal }
    ];
}

mark Tetrahedron(
    p1: Vector3,
    p2: Vector3,
    p3: Vector3,
    p4: Vector3,
    color: Color = [0, 0, 0, 1]
) {
    Triangle(p3, p4, p1, color);
    Triangle(p1, p4, p2, color);
    Triangle(p1, p2, p3, color);
    Triangle(p2, p3, p4, color);
}

mark Line(
    p1: Vector3,
    p2: Vector3,
    width: float = 1,
    color: Color = [1, 0, 1, 1]
) {
    let center = (p1 + p2) * 0.5;
    let d = p2 - p1;
    let v = get_camera_direction(center);
    let F = normalize(cross(d, v));
    let normal = normalize(cross(F, d));
    let s = width * 0.5;
    emit [
        { position: p1 + F * s, color: color, normal: normal },
        { position: p2 + F * s, color: color, normal: normal },
        { position: p1 - F * s, color: color, normal: normal },
        { position: p1 - F * s, color: color, normal: normal },
        { position: p2 - F * s, color: color, normal: normal },
        { position: p2 + F * s, color: color, normal: normal }
    ];
}

mark Cube(
    center: Vector3,
    radius: float,
    color: Color
) {
    let p000 = Vector3(center.x - radius, center.y - radius, center.z - radius);
    let p001 = Vector3(center.x - radius, center.y - radius, center.z + radius);
    let p010 = Vector3(center.x - radius, center.y + radius, center.z - radius);
    let p011 = Vector3(center.x - radius, center.y + radius, center.z + radius);
    let p100 = Vector3(center.x + radius, center.y - radius, center.z - radius);
    let p101 = Vector3(center.x + radius, center.y - radius, center.z + radius);
    let p110 = Vector3(center.x + radius, center.y + radius, center.z - radius);
    let p111 = Vector3(center.x + radius, center.y + radius, center.z + radius);
    let nx = Vector3(1, 0, 0);
    let ny = Vector3(0, 1, 0);
    let nz = Vector3(0, 0, 1);
    emit [ { position: p000, color: color, normal: nz }, { position: p110, color: color, normal: nz }, { position: p100, color: color, normal: nz } ];
    emit [ { position: p000, color: color, normal: nz }, { position: p010, color: color, normal: nz }, { position: p110, color: color, normal: nz } ];
    emit [ { position: p001, color: color, normal: nz }, { position: p101, color: color, normal: nz }, { position: p111, color: color, normal: nz } ];
    emit [ { position: p001, color: color, normal: nz }, { position: p111, color: color, normal: nz }, { position: p011, color: color, normal: nz } ];
    emit [ { position: p000, color: color, normal: ny }, { position: p100, color: color, normal: ny }, { position: p101, color: color, normal: ny } ];
    emit [ { position: p000, color: color, normal: ny }, { position: p101, color: color, normal: ny }, { position: p001, color: color, normal: ny } ];
    emit [ { position: p010, color: color, normal: ny }, { position: p111, color: color, normal: ny }, { position: p110, color: color, normal: ny } ];
    emit [ { position: p010, color: color, normal: ny }, { position: p011, color: color, normal: ny }, { position: p111, color: color, normal: ny } ];
    emit [ { position: p000, color: color, normal: nx }, { position: p001, color: color, normal: nx }, { position: p011, color: color, normal: nx } ];
    emit [ { position: p000, color: color, normal: nx }, { position: p011, color: color, normal: nx }, { position: p010, color: color, normal: nx } ];
    emit [ { position: p100, color: color, normal: nx }, { position: p101, color: color, normal: nx }, { position: p111, color: color, normal: nx } ];
    emit [ { position: p100, color: color, normal: nx }, { position: p111, color: color, normal: nx }, { position: p110, color: color, normal: nx } ];
}
"#;

/// A named collection of functions.
pub struct Module {
    name: String,
    functions: Vec<Function>,
}

impl Module {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn functions<'m, 'n>(&'m self, name: &'n str) -> impl Iterator<Item = &'m Function> + 'n
    where
        'm: 'n,
    {
        self.functions.iter().filter(move |function| function.name == name)
    }

    pub fn function_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.functions.iter().map(|function| function.name.as_str())
    }

    pub fn all_functions(&self) -> &[Function] {
        &self.functions
    }
}

pub struct Library {
    modules: Vec<Module>,
}

static SHARED: Lazy<Library> = Lazy::new(|| match Library::builtin() {
    Ok(library) => library,
    Err(error) => panic!("failed to parse builtin library: {error}"),
});

impl Library {
    /// The builtin library, parsed on first use.
    pub fn shared() -> &'static Library {
        &SHARED
    }

    pub fn builtin() -> Result<Library, ParseError> {
        let modules = (SOURCES.iter().enumerate())
            .map(|(file_id, (name, source))| Module::parse(file_id, name, source))
            .collect::<Result<_, _>>()?;
        Ok(Library { modules })
    }

    pub fn module(&self, name: &str) -> Option<&Module> {
        self.modules.iter().find(|module| module.name == name)
    }

    pub fn module_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.modules.iter().map(|module| module.name.as_str())
    }
}

impl Module {
    fn parse(file_id: FileId, name: &str, source: &str) -> Result<Module, ParseError> {
        let file = syntax::parse_file(file_id, source)?;
        let functions = (file.blocks.into_iter())
            .filter_map(|block| match block {
                Block::Function(function) => Some(function),
                Block::Global(_) | Block::Import(_) => None,
            })
            .collect();
        Ok(Module {
            name: name.to_owned(),
            functions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_sources_parse() {
        let library = Library::builtin().unwrap();
        assert_eq!(library.module_names().collect::<Vec<_>>(), ["P2D", "P3D"]);
        let p2d = library.module("P2D").unwrap();
        assert_eq!(
            p2d.function_names().collect::<Vec<_>>(),
            ["Triangle", "Rectangle", "OutlinedRectangle", "Hexagon", "Circle16", "Circle", "Line"]
        );
        let p3d = library.module("P3D").unwrap();
        assert_eq!(
            p3d.function_names().collect::<Vec<_>>(),
            ["Triangle", "Tetrahedron", "Line", "Cube"]
        );
        assert!(library.module("P4D").is_none());
    }

    #[test]
    fn looked_up_functions_outlive_the_name() {
        let p2d = Library::shared().module("P2D").unwrap();
        let found = {
            let name = String::from("Line");
            p2d.functions(&name).collect::<Vec<_>>()
        };
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Line");
        assert_eq!(p2d.functions("Square").count(), 0);
    }
}
