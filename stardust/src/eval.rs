//! A reference interpreter for specifications, running on the host.

use fxhash::FxHashMap;
use indexmap::IndexMap;
use thiserror::Error;

use crate::intrinsics::{self, Registry};
use crate::specification::{Expr, Specification, Stmt};
use crate::types::Value;

/// The attributes of one emitted vertex.
pub type Vertex = IndexMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("input `{0}` has no value")]
    MissingInput(String),
    #[error("variable `{0}` is read before it is assigned")]
    UndefinedVariable(String),
    #[error("intrinsic `{0}` has no host implementation")]
    Unsupported(String),
    #[error("arguments to `{0}` are outside of its domain")]
    DomainError(String),
    #[error("no component `{0}` on value `{1}`")]
    UndefinedField(String, Value),
}

/// Run a specification once, returning the vertices it emits in order.
///
/// Inputs missing from `inputs` take their declared defaults. A `discard`
/// ends the run and drops every vertex emitted so far.
pub fn evaluate(
    registry: &Registry,
    specification: &Specification,
    inputs: &IndexMap<String, Value>,
) -> Result<Vec<Vertex>, EvalError> {
    let mut env = FxHashMap::default();
    for (name, input) in &specification.inputs {
        let value = match (inputs.get(name), &input.default) {
            (Some(value), _) | (None, Some(value)) => value.clone(),
            (None, None) => return Err(EvalError::MissingInput(name.clone())),
        };
        env.insert(name.as_str(), value);
    }

    let mut evaluator = Evaluator {
        registry,
        env,
        vertices: Vec::new(),
    };
    match evaluator.stmts(&specification.statements)? {
        Flow::Continue => Ok(evaluator.vertices),
        Flow::Discard => Ok(Vec::new()),
    }
}

enum Flow {
    Continue,
    Discard,
}

struct Evaluator<'a> {
    registry: &'a Registry,
    env: FxHashMap<&'a str, Value>,
    vertices: Vec<Vertex>,
}

impl<'a> Evaluator<'a> {
    fn stmts(&mut self, stmts: &'a [Stmt]) -> Result<Flow, EvalError> {
        for stmt in stmts {
            if let Flow::Discard = self.stmt(stmt)? {
                return Ok(Flow::Discard);
            }
        }
        Ok(Flow::Continue)
    }

    fn stmt(&mut self, stmt: &'a Stmt) -> Result<Flow, EvalError> {
        match stmt {
            Stmt::Assign(var, expr) => {
                let value = self.expr(expr)?;
                self.env.insert(var, value);
            }
            Stmt::Emit(attrs) => {
                let vertex = (attrs.iter())
                    .map(|(name, expr)| Ok((name.clone(), self.expr(expr)?)))
                    .collect::<Result<_, EvalError>>()?;
                self.vertices.push(vertex);
            }
            Stmt::Condition {
                test,
                then_body,
                else_body,
            } => {
                let body = if self.expr(test)?.is_truthy() { then_body } else { else_body };
                return self.stmts(body);
            }
            Stmt::ForLoop {
                var,
                range_min,
                range_max,
                body,
            } => {
                for index in *range_min..=*range_max {
                    self.env.insert(var, Value::Scalar(index as f64));
                    if let Flow::Discard = self.stmts(body)? {
                        return Ok(Flow::Discard);
                    }
                }
            }
            Stmt::Discard => return Ok(Flow::Discard),
        }
        Ok(Flow::Continue)
    }

    fn expr(&self, expr: &Expr) -> Result<Value, EvalError> {
        match expr {
            Expr::Constant(value, _) => Ok(value.clone()),
            Expr::Variable(name, _) => (self.env.get(name.as_str()).cloned())
                .ok_or_else(|| EvalError::UndefinedVariable(name.clone())),
            Expr::Field(base, field, _) => {
                let base = self.expr(base)?;
                let component = intrinsics::field_index(field).and_then(|index| base.components().get(index));
                match component {
                    Some(component) => Ok(Value::Scalar(*component)),
                    None => Err(EvalError::UndefinedField(field.clone(), base)),
                }
            }
            Expr::Call(name, args, _) => {
                let step = (self.registry.intrinsic(name))
                    .and_then(|intrinsic| intrinsic.step())
                    .ok_or_else(|| EvalError::Unsupported(name.clone()))?;
                let args = args.iter().map(|arg| self.expr(arg)).collect::<Result<Vec<_>, _>>()?;
                step(&args).ok_or_else(|| EvalError::DomainError(name.clone()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ValueType;

    fn eval_mark(source: &str, inputs: &[(&str, Value)]) -> Result<Vec<Vertex>, EvalError> {
        let specs = crate::compile_string(source).unwrap();
        let inputs = (inputs.iter())
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();
        evaluate(Registry::shared(), &specs[0], &inputs)
    }

    #[test]
    fn runs_loops_and_conditions() {
        let vertices = eval_mark(
            "mark M(n: float) {
                for (i in 1..3) {
                    if i % 2 == 0 { emit [{ v: float(i) * n }]; }
                }
            }",
            &[("n", Value::Scalar(1.5))],
        )
        .unwrap();
        assert_eq!(vertices.len(), 1);
        assert_eq!(vertices[0]["v"], Value::Scalar(3.0));
    }

    #[test]
    fn vectors_and_fields() {
        let vertices = eval_mark(
            "mark M(p: Vector2) {
                let q = normalize(Vector3(p.x, p.y, 0));
                emit [{ x: q.x, c: Color(0.5) }];
            }",
            &[("p", Value::from([3.0, 4.0]))],
        )
        .unwrap();
        assert_eq!(vertices[0]["x"], Value::Scalar(0.6));
        assert_eq!(vertices[0]["c"], Value::from([0.5, 0.5, 0.5, 1.0]));
    }

    #[test]
    fn defaults_fill_missing_inputs() {
        let vertices = eval_mark("mark M(w: float = 2) { emit [{ w: w }]; }", &[]).unwrap();
        assert_eq!(vertices[0]["w"], Value::Scalar(2.0));
    }

    #[test]
    fn discard_drops_vertices() {
        let vertices = eval_mark("shader S() { emit { a: 1.0 }; discard; }", &[]).unwrap();
        assert!(vertices.is_empty());
    }

    #[test]
    fn failures() {
        let error = eval_mark("mark M() { let x = quat_conj(Quaternion(0, 0, 0, 1)); }", &[]).unwrap_err();
        assert_eq!(error, EvalError::Unsupported("@quat_conj:Quaternion:Quaternion".to_owned()));
        let error = eval_mark("mark M() { let x = 1 / 0; }", &[]).unwrap_err();
        assert_eq!(error, EvalError::DomainError("@@/:int,int:int".to_owned()));
        let error = eval_mark("mark M() { let x: float; emit [{ x: x }]; }", &[]).unwrap_err();
        assert_eq!(error, EvalError::UndefinedVariable("x".to_owned()));

        let spec = Specification {
            kind: crate::specification::SpecificationKind::Mark,
            inputs: IndexMap::from([(
                "t".to_owned(),
                crate::specification::Input {
                    r#type: ValueType::FloatArray,
                    default: None,
                },
            )]),
            outputs: IndexMap::new(),
            variables: IndexMap::new(),
            statements: Vec::new(),
            repeat: None,
        };
        let error = evaluate(Registry::shared(), &spec, &IndexMap::new()).unwrap_err();
        assert_eq!(error, EvalError::MissingInput("t".to_owned()));
    }
}
