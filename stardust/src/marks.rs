//! Prebuilt marks.

use once_cell::sync::Lazy;

use crate::shaders::builtin;
use crate::{Error, Specification};

const RECT: &str = r#"
mark Rectangle(
    p1: Vector2 = [0, 0],
    p2: Vector2 = [0, 0],
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
"#;

const LINE: &str = r#"
mark Line(
    p1: Vector2 = [0, 0],
    p2: Vector2 = [0, 0],
    width: float = 1,
    color: Color = [0, 0, 0, 1]
) {
    let d = normalize(p2 - p1);
    let t = Vector2(d.y, -d.x) * (width / 2);
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

const POLYLINE: &str = r#"
import { Triangle } from P2D;

mark Sector2(c: Vector2, p1: Vector2, p2: Vector2, color: Color) {
    let pc = c + normalize(p1 + p2 - c - c) * length(p1 - c);
    Triangle(c, p1, pc, color);
    Triangle(c, pc, p2, color);
}

mark Sector4(c: Vector2, p1: Vector2, p2: Vector2, color: Color) {
    let pc = c + normalize(p1 + p2 - c - c) * length(p1 - c);
    Sector2(c, p1, pc, color);
    Sector2(c, pc, p2, color);
}

mark PolylineRound(
    p: Vector2, p_p: Vector2, p_n: Vector2, p_nn: Vector2,
    width: float = 1,
    color: Color = [0, 0, 0, 1]
) {
    let EPS = 1e-5;
    let w = width / 2;
    let d = normalize(p - p_n);
    let n = Vector2(d.y, -d.x);
    let m1: Vector2;
    if length(p - p_p) < EPS {
        m1 = n * w;
    } else {
        m1 = normalize(d + normalize(p - p_p)) * w;
    }
    let m2: Vector2;
    if length(p_n - p_nn) < EPS {
        m2 = -n * w;
    } else {
        m2 = normalize(normalize(p_n - p_nn) - d) * w;
    }
    let c1a: Vector2;
    let c1b: Vector2;
    let a1: Vector2;
    let a2: Vector2;
    if dot(m1, n) > 0 {
        c1a = p + m1;
        c1b = p + n * w;
        a2 = c1b;
        a1 = p - m1 * (w / dot(m1, n));
    } else {
        c1a = p + m1;
        c1b = p - n * w;
        a2 = p + m1 * (w / dot(m1, n));
        a1 = c1b;
    }
    let c2a: Vector2;
    let c2b: Vector2;
    let b1: Vector2;
    let b2: Vector2;
    if dot(m2, n) < 0 {
        c2a = p_n + m2;
        c2b = p_n - n * w;
        b1 = c2b;
        b2 = p_n + m2 * (w / dot(m2, n));
    } else {
        c2a = p_n + m2;
        c2b = p_n + n * w;
        b2 = c2b;
        b1 = p_n - m2 * (w / dot(m2, n));
    }
    Sector4(p, c1a, c1b, color);
    Sector4(p_n, c2a, c2b, color);
    Triangle(p, a1, b1, color);
    Triangle(p, b1, p_n, color);
    Triangle(p, a2, b2, color);
    Triangle(p, b2, p_n, color);
}
"#;

static RECT_MARK: Lazy<Specification> = Lazy::new(|| builtin(RECT, "Rectangle"));
static LINE_MARK: Lazy<Specification> = Lazy::new(|| builtin(LINE, "Line"));
static POLYLINE_MARK: Lazy<Specification> = Lazy::new(|| Specification {
    repeat: Some((1, 1)),
    ..builtin(POLYLINE, "PolylineRound")
});

fn compile_one(source: &str, name: &str) -> Result<Specification, Error> {
    let mut specifications = crate::compile_string(source)?;
    match specifications.shift_remove(name) {
        Some(specification) => Ok(specification),
        None => panic!("generated source does not define `{name}`"),
    }
}

/// A filled circle approximated by `sides` triangles around `center`.
pub fn circle(sides: u32) -> Result<Specification, Error> {
    let sides = sides.max(1);
    compile_one(
        &format!(
            r#"
mark Circle(
    center: Vector2 = [0, 0],
    radius: float = 1,
    color: Color = [0, 0, 0, 1]
) {{
    for (i in 0..{last}) {{
        let a1 = i / {sides:.1} * PI * 2.0;
        let a2 = (i + 1) / {sides:.1} * PI * 2.0;
        let p1 = Vector2(radius * cos(a1), radius * sin(a1));
        let p2 = Vector2(radius * cos(a2), radius * sin(a2));
        emit [
            {{ position: center + p1, color: color }},
            {{ position: center, color: color }},
            {{ position: center + p2, color: color }}
        ];
    }}
}}
"#,
            last = sides - 1,
            sides = f64::from(sides),
        ),
        "Circle",
    )
}

/// An axis-aligned rectangle between the corners `p1` and `p2`.
pub fn rect() -> Specification {
    RECT_MARK.clone()
}

/// A straight segment from `p1` to `p2` of the given `width`.
pub fn line() -> Specification {
    LINE_MARK.clone()
}

/// An arc starting at `p1` whose direction turns from `theta1` to `theta2`
/// over its `length`, drawn with `sides` segments.
pub fn wedge(sides: u32) -> Result<Specification, Error> {
    let sides = sides.max(1);
    compile_one(
        &format!(
            r#"
import {{ Triangle }} from P2D;

mark Wedge(
    p1: Vector2 = [0, 0],
    theta1: float = 0,
    theta2: float = 0,
    length: float = 10,
    width: float = 1,
    color: Color = [0, 0, 0, 1]
) {{
    let dTheta = (theta2 - theta1) / {sides};
    let dL = length / {sides};
    for (i in 0..{last}) {{
        let dThetaA = i * dTheta;
        let dThetaB = (i + 1) * dTheta;
        let thetaA = theta1 + dThetaA;
        let thetaB = theta1 + dThetaB;
        let thetaCenterA = theta1 + dThetaA / 2;
        let thetaCenterB = theta1 + dThetaB / 2;
        let dlA = dL * i;
        let dlB = dL * (i + 1);
        if dThetaA > 1e-5 || dThetaA < -1e-5 {{
            dlA = dlA / dThetaA * 2 * sin(dThetaA / 2);
        }}
        if dThetaB > 1e-5 || dThetaB < -1e-5 {{
            dlB = dlB / dThetaB * 2 * sin(dThetaB / 2);
        }}
        let pAdvA = Vector2(-sin(thetaCenterA), cos(thetaCenterA)) * dlA;
        let pAdvB = Vector2(-sin(thetaCenterB), cos(thetaCenterB)) * dlB;
        let pA = p1 + pAdvA;
        let pB = p1 + pAdvB;

        let dpA = Vector2(cos(thetaA), sin(thetaA)) * width * 0.5;
        let dpB = Vector2(cos(thetaB), sin(thetaB)) * width * 0.5;

        Triangle(pA + dpA, pB + dpB, pB - dpB, color);
        Triangle(pA + dpA, pB - dpB, pA - dpA, color);
    }}
}}
"#,
            last = sides - 1,
        ),
        "Wedge",
    )
}

/// A line through consecutive data points with round joins. Each datum binds
/// `p`, and its neighbours are read through `p_p`, `p_n` and `p_nn`.
pub fn polyline() -> Specification {
    POLYLINE_MARK.clone()
}
