//! The specification IR: the flat, typed representation of a mark or shader
//! body that is handed to rendering platforms.

use indexmap::{IndexMap, IndexSet};

use crate::intrinsics;
use crate::types::{Value, ValueType};

pub mod pretty;

/// Expressions. Every node carries its resolved type.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Constant(Value, ValueType),
    Variable(String, ValueType),
    /// Component access, for example `p.x`.
    Field(Box<Expr>, String, ValueType),
    /// Call to an intrinsic, identified by its internal name.
    Call(String, Vec<Expr>, ValueType),
}

impl Expr {
    pub fn r#type(&self) -> ValueType {
        match self {
            Expr::Constant(_, r#type)
            | Expr::Variable(_, r#type)
            | Expr::Field(_, _, r#type)
            | Expr::Call(_, _, r#type) => *r#type,
        }
    }

    pub fn constant(value: impl Into<Value>, r#type: ValueType) -> Expr {
        Expr::Constant(value.into(), r#type)
    }

    pub fn variable(name: impl Into<String>, r#type: ValueType) -> Expr {
        Expr::Variable(name.into(), r#type)
    }

    /// Call an intrinsic by its source name, deriving the internal name from
    /// the argument types.
    pub fn intrinsic(name: &str, args: Vec<Expr>, return_type: ValueType) -> Expr {
        let param_types = args.iter().map(Expr::r#type).collect::<Vec<_>>();
        let internal_name = intrinsics::internal_name(name, &param_types, return_type);
        Expr::Call(internal_name, args, return_type)
    }

    /// Call a binary operator whose result has the type of its left operand.
    pub fn binop(op: &str, lhs: Expr, rhs: Expr) -> Expr {
        let r#type = lhs.r#type();
        Expr::intrinsic(&intrinsics::operator_name(op), vec![lhs, rhs], r#type)
    }

    pub fn compare(op: &str, lhs: Expr, rhs: Expr) -> Expr {
        Expr::intrinsic(&intrinsics::operator_name(op), vec![lhs, rhs], ValueType::Bool)
    }

    pub fn for_each_variable<'a>(&'a self, f: &mut impl FnMut(&'a str, ValueType)) {
        match self {
            Expr::Constant(..) => {}
            Expr::Variable(name, r#type) => f(name, *r#type),
            Expr::Field(base, _, _) => base.for_each_variable(f),
            Expr::Call(_, args, _) => args.iter().for_each(|arg| arg.for_each_variable(f)),
        }
    }
}

/// Statements, executed in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Assign(String, Expr),
    /// Produce one vertex, with a value for each output attribute.
    Emit(IndexMap<String, Expr>),
    Condition {
        test: Expr,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
    },
    /// Loop over the inclusive range `range_min..=range_max`.
    ForLoop {
        var: String,
        range_min: i64,
        range_max: i64,
        body: Vec<Stmt>,
    },
    Discard,
}

impl Stmt {
    fn for_each_variable<'a>(&'a self, f: &mut impl FnMut(&'a str, ValueType)) {
        match self {
            Stmt::Assign(var, expr) => {
                f(var, expr.r#type());
                expr.for_each_variable(f);
            }
            Stmt::Emit(attrs) => attrs.values().for_each(|expr| expr.for_each_variable(f)),
            Stmt::Condition {
                test,
                then_body,
                else_body,
            } => {
                test.for_each_variable(f);
                then_body.iter().for_each(|stmt| stmt.for_each_variable(f));
                else_body.iter().for_each(|stmt| stmt.for_each_variable(f));
            }
            Stmt::ForLoop { var, body, .. } => {
                f(var, ValueType::Int);
                body.iter().for_each(|stmt| stmt.for_each_variable(f));
            }
            Stmt::Discard => {}
        }
    }
}

/// Visit every emit statement, including those nested in conditions and
/// loops, in program order.
pub fn for_each_emit<'a>(stmts: &'a [Stmt], f: &mut impl FnMut(&'a IndexMap<String, Expr>)) {
    for stmt in stmts {
        match stmt {
            Stmt::Emit(attrs) => f(attrs),
            Stmt::Condition {
                then_body,
                else_body,
                ..
            } => {
                for_each_emit(then_body, f);
                for_each_emit(else_body, f);
            }
            Stmt::ForLoop { body, .. } => for_each_emit(body, f),
            Stmt::Assign(..) | Stmt::Discard => {}
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SpecificationKind {
    Mark,
    Shader,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Input {
    pub r#type: ValueType,
    pub default: Option<Value>,
}

/// A compiled mark or shader.
#[derive(Debug, Clone, PartialEq)]
pub struct Specification {
    pub kind: SpecificationKind,
    pub inputs: IndexMap<String, Input>,
    pub outputs: IndexMap<String, ValueType>,
    pub variables: IndexMap<String, ValueType>,
    pub statements: Vec<Stmt>,
    /// Number of times the first and last data elements are repeated, so that
    /// shifted attributes are defined at the ends of the data.
    pub repeat: Option<(i64, i64)>,
}

impl Specification {
    /// Check if `name` is declared as either an input or a variable.
    pub fn is_declared(&self, name: &str) -> bool {
        self.inputs.contains_key(name) || self.variables.contains_key(name)
    }

    pub fn declared_type(&self, name: &str) -> Option<ValueType> {
        let input = self.inputs.get(name).map(|input| input.r#type);
        input.or_else(|| self.variables.get(name).copied())
    }

    /// Names referenced by the statements that are neither an input nor a
    /// variable, or whose use disagrees with the declared type.
    pub fn undeclared_variables(&self) -> IndexSet<String> {
        let mut undeclared = IndexSet::new();
        for stmt in &self.statements {
            stmt.for_each_variable(&mut |name, r#type| {
                if self.declared_type(name) != Some(r#type) {
                    undeclared.insert(name.to_owned());
                }
            });
        }
        undeclared
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(statements: Vec<Stmt>) -> Specification {
        Specification {
            kind: SpecificationKind::Mark,
            inputs: IndexMap::from([(
                "x".to_owned(),
                Input {
                    r#type: ValueType::Float,
                    default: None,
                },
            )]),
            outputs: IndexMap::new(),
            variables: IndexMap::from([("y".to_owned(), ValueType::Float)]),
            statements,
            repeat: None,
        }
    }

    #[test]
    fn binop_names_the_overload() {
        let expr = Expr::binop(
            "+",
            Expr::variable("x", ValueType::Float),
            Expr::constant(1.0, ValueType::Float),
        );
        assert_eq!(expr.r#type(), ValueType::Float);
        assert!(matches!(&expr, Expr::Call(name, _, _) if name == "@@+:float,float:float"));
    }

    #[test]
    fn declared_variables_are_accepted() {
        let spec = spec(vec![Stmt::Assign(
            "y".to_owned(),
            Expr::variable("x", ValueType::Float),
        )]);
        assert!(spec.undeclared_variables().is_empty());
    }

    #[test]
    fn undeclared_variables_are_reported() {
        let spec = spec(vec![Stmt::Condition {
            test: Expr::variable("flag", ValueType::Bool),
            then_body: vec![Stmt::Emit(IndexMap::from([(
                "position".to_owned(),
                Expr::variable("z", ValueType::Vector2),
            )]))],
            else_body: vec![],
        }]);
        let undeclared = spec.undeclared_variables();
        assert_eq!(undeclared.into_iter().collect::<Vec<_>>(), ["flag", "z"]);
    }

    #[test]
    fn emits_are_visited_in_program_order() {
        let emit = |name: &str| Stmt::Emit(IndexMap::from([(name.to_owned(), Expr::constant(0.0, ValueType::Float))]));
        let stmts = vec![
            emit("a"),
            Stmt::ForLoop {
                var: "i".to_owned(),
                range_min: 0,
                range_max: 1,
                body: vec![emit("b")],
            },
            Stmt::Condition {
                test: Expr::constant(1.0, ValueType::Bool),
                then_body: vec![emit("c")],
                else_body: vec![emit("d")],
            },
        ];
        let mut seen = Vec::new();
        for_each_emit(&stmts, &mut |attrs| seen.extend(attrs.keys().cloned()));
        assert_eq!(seen, ["a", "b", "c", "d"]);
    }
}
