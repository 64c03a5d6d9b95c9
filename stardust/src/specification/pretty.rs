//! A pretty printer for specifications.
//!
//! This is mainly intended for debugging, and for snapshot tests.
//!
//! Example:
//!
//! ```
//! use stardust::specification::pretty::Context;
//!
//! let specs = stardust::compile_string("mark M(p: Vector2) { emit { position: p }; }").unwrap();
//!
//! let pp = Context::new();
//! let doc = pp.specification("M", &specs["M"]);
//! println!("{}", doc.pretty(80));
//! ```

use pretty::RcDoc;

use crate::eval::Vertex;
use crate::specification::{Expr, Specification, SpecificationKind, Stmt};
use crate::types::ValueType;

const INDENT: isize = 4;

pub struct Context {}

impl Context {
    pub fn new() -> Context {
        Context {}
    }

    pub fn specification<'a>(&self, name: &'a str, spec: &'a Specification) -> RcDoc<'a> {
        let keyword = match spec.kind {
            SpecificationKind::Mark => "mark",
            SpecificationKind::Shader => "shader",
        };

        let inputs = spec.inputs.iter().map(|(name, input)| {
            let default = match &input.default {
                Some(value) => RcDoc::text(" = ").append(RcDoc::text(value.to_string())),
                None => RcDoc::nil(),
            };
            RcDoc::concat([
                RcDoc::text("input "),
                self.declaration(name, input.r#type),
                default,
                RcDoc::text(";"),
            ])
        });
        let outputs = (spec.outputs.iter()).map(|(name, r#type)| {
            RcDoc::concat([
                RcDoc::text("output "),
                self.declaration(name, *r#type),
                RcDoc::text(";"),
            ])
        });
        let variables = (spec.variables.iter()).map(|(name, r#type)| {
            RcDoc::concat([
                RcDoc::text("var "),
                self.declaration(name, *r#type),
                RcDoc::text(";"),
            ])
        });
        let repeat = spec.repeat.map(|(start, end)| RcDoc::text(format!("repeat {start}..{end};")));

        let stmts = spec.statements.iter().map(|stmt| self.stmt(stmt));
        let lines = inputs.chain(outputs).chain(variables).chain(repeat).chain(stmts);
        let body = RcDoc::intersperse(lines, RcDoc::hardline());

        RcDoc::concat([
            RcDoc::text(keyword),
            RcDoc::space(),
            RcDoc::text(name),
            RcDoc::space(),
            self.block(body),
        ])
    }

    fn declaration<'a>(&self, name: &'a str, r#type: ValueType) -> RcDoc<'a> {
        RcDoc::concat([RcDoc::text(name), RcDoc::text(": "), RcDoc::text(r#type.name())])
    }

    fn block<'a>(&self, body: RcDoc<'a>) -> RcDoc<'a> {
        RcDoc::concat([
            RcDoc::text("{"),
            RcDoc::hardline().append(body).nest(INDENT),
            RcDoc::hardline(),
            RcDoc::text("}"),
        ])
    }

    /// An evaluated vertex, prefixed with its vertex index.
    pub fn vertex<'a>(&self, index: usize, vertex: &'a Vertex) -> RcDoc<'a> {
        let attrs = (vertex.iter()).map(|(name, value)| {
            RcDoc::concat([RcDoc::text(name.as_str()), RcDoc::text(": "), RcDoc::text(value.to_string())])
        });
        RcDoc::concat([
            RcDoc::text(format!("{index}: {{")),
            RcDoc::line()
                .append(RcDoc::intersperse(attrs, RcDoc::text(",").append(RcDoc::line())))
                .nest(INDENT),
            RcDoc::line(),
            RcDoc::text("}"),
        ])
        .group()
    }

    pub fn stmts<'a>(&self, stmts: &'a [Stmt]) -> RcDoc<'a> {
        RcDoc::intersperse(stmts.iter().map(|stmt| self.stmt(stmt)), RcDoc::hardline())
    }

    pub fn stmt<'a>(&self, stmt: &'a Stmt) -> RcDoc<'a> {
        match stmt {
            Stmt::Assign(var, expr) => RcDoc::concat([
                RcDoc::text(var.as_str()),
                RcDoc::text(" ="),
                RcDoc::line().append(self.expr(expr)).nest(INDENT),
                RcDoc::text(";"),
            ])
            .group(),
            Stmt::Emit(attrs) => {
                let attrs = attrs.iter().map(|(name, expr)| {
                    RcDoc::concat([RcDoc::text(name.as_str()), RcDoc::text(": "), self.expr(expr)])
                });
                RcDoc::concat([
                    RcDoc::text("emit {"),
                    RcDoc::line()
                        .append(RcDoc::intersperse(attrs, RcDoc::text(",").append(RcDoc::line())))
                        .nest(INDENT),
                    RcDoc::line(),
                    RcDoc::text("};"),
                ])
                .group()
            }
            Stmt::Condition {
                test,
                then_body,
                else_body,
            } => {
                let doc = RcDoc::concat([
                    RcDoc::text("if ("),
                    self.expr(test),
                    RcDoc::text(") "),
                    self.block(self.stmts(then_body)),
                ]);
                match else_body.as_slice() {
                    [] => doc,
                    _ => doc.append(RcDoc::text(" else ")).append(self.block(self.stmts(else_body))),
                }
            }
            Stmt::ForLoop {
                var,
                range_min,
                range_max,
                body,
            } => RcDoc::concat([
                RcDoc::text(format!("for ({var} in {range_min}..{range_max}) ")),
                self.block(self.stmts(body)),
            ]),
            Stmt::Discard => RcDoc::text("discard;"),
        }
    }

    pub fn expr<'a>(&self, expr: &'a Expr) -> RcDoc<'a> {
        match expr {
            Expr::Constant(value, ValueType::Float) if value.as_scalar().map_or(false, |v| v.fract() == 0.0) => {
                RcDoc::text(format!("{value}.0"))
            }
            Expr::Constant(value, _) => RcDoc::text(value.to_string()),
            Expr::Variable(name, _) => RcDoc::text(name.as_str()),
            Expr::Field(base, field, _) => self.expr(base).append(RcDoc::text(".")).append(RcDoc::text(field.as_str())),
            Expr::Call(function, args, _) => RcDoc::concat([
                RcDoc::text(function.as_str()),
                RcDoc::text("("),
                RcDoc::line_()
                    .append(RcDoc::intersperse(
                        args.iter().map(|arg| self.expr(arg)),
                        RcDoc::text(",").append(RcDoc::line()),
                    ))
                    .nest(INDENT),
                RcDoc::line_(),
                RcDoc::text(")"),
            ])
            .group(),
        }
    }
}

impl Default for Context {
    fn default() -> Context {
        Context::new()
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;
    use crate::specification::Input;
    use crate::types::Value;

    #[test]
    fn prints_a_small_specification() {
        let spec = Specification {
            kind: SpecificationKind::Mark,
            inputs: IndexMap::from([(
                "p".to_owned(),
                Input {
                    r#type: ValueType::Vector2,
                    default: Some(Value::from([0.0, 0.0])),
                },
            )]),
            outputs: IndexMap::from([("position".to_owned(), ValueType::Vector2)]),
            variables: IndexMap::new(),
            statements: vec![Stmt::Emit(IndexMap::from([(
                "position".to_owned(),
                Expr::variable("p", ValueType::Vector2),
            )]))],
            repeat: None,
        };

        let doc = Context::new().specification("M", &spec);
        assert_eq!(
            doc.pretty(80).to_string(),
            "mark M {\n    input p: Vector2 = [0, 0];\n    output position: Vector2;\n    emit { position: p };\n}"
        );
    }

    #[test]
    fn float_constants_keep_a_decimal_point() {
        let pp = Context::new();
        let float = Expr::constant(2.0, ValueType::Float);
        assert_eq!(pp.expr(&float).pretty(80).to_string(), "2.0");
        let int = Expr::constant(2.0, ValueType::Int);
        assert_eq!(pp.expr(&int).pretty(80).to_string(), "2");
    }

    #[test]
    fn vertices_fit_on_one_line() {
        let pp = Context::new();
        let vertex = IndexMap::from([
            ("position".to_owned(), Value::from([1.0, 0.5])),
            ("size".to_owned(), Value::Scalar(2.0)),
        ]);
        let doc = pp.vertex(3, &vertex);
        assert_eq!(doc.pretty(80).to_string(), "3: { position: [1, 0.5], size: 2 }");
        assert_eq!(doc.pretty(10).to_string(), "3: {\n    position: [1, 0.5],\n    size: 2\n}");
    }
}
