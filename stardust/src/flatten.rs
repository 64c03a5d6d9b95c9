//! Rewriting of specifications so that a single vertex index selects one
//! emit, along with the state of its enclosing loops.
//!
//! Rendering executes one invocation per vertex with no dynamic loops, so the
//! whole body runs for every index while an emit cursor counts the emits that
//! an unflattened run would have produced. Only the emit whose position equals
//! the vertex index fires. Loops are not unrolled: the loop variable of the
//! iteration containing the vertex is computed directly, and the body is run
//! once.
//!
//! Emit counts are static upper bounds. A condition counts as its larger
//! branch even if the smaller one is taken, leaving the remaining indices
//! without an emit.

use fxhash::FxHashSet;
use thiserror::Error;
use tracing::debug;

use crate::specification::{Expr, Input, Specification, Stmt};
use crate::types::{attempt_name, Value, ValueType};

const INDEX_PREFIX: &str = "s3idx";
const VERTEX_INDEX_PREFIX: &str = "s3vidx";
const CURSOR_PREFIX: &str = "s3emitidx";
const LOOP_START_PREFIX: &str = "s3loop";

/// Largest emit count a flattened specification may have. Vertex indices and
/// the emit cursor are `int`s when rendered.
pub const MAX_EMIT_COUNT: usize = i32::MAX as usize;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FlattenError {
    #[error("specification emits more than {MAX_EMIT_COUNT} vertices")]
    TooManyEmits,
}

#[derive(Debug, Clone)]
pub struct FlattenedEmits {
    pub specification: Specification,
    /// Number of vertex indices to run the specification for.
    pub count: usize,
    /// Name of the float input holding the vertex index.
    pub index_variable: String,
}

pub fn flatten_emits(specification: &Specification) -> Result<FlattenedEmits, FlattenError> {
    let mut flattener = Flattener {
        used: FxHashSet::default(),
        specification,
        loop_starts: Vec::new(),
        vertex_index: String::new(),
        cursor: String::new(),
    };

    let index_variable = flattener.fresh_name(INDEX_PREFIX);
    flattener.vertex_index = flattener.fresh_name(VERTEX_INDEX_PREFIX);
    flattener.cursor = flattener.fresh_name(CURSOR_PREFIX);

    let vertex_index = Expr::variable(index_variable.as_str(), ValueType::Float);
    let mut statements = vec![
        Stmt::Assign(
            flattener.vertex_index.clone(),
            Expr::intrinsic("int", vec![vertex_index], ValueType::Int),
        ),
        Stmt::Assign(flattener.cursor.clone(), int(0)),
    ];
    let (body, count) = flattener.block(&specification.statements)?;
    statements.extend(body);

    let mut result = specification.clone();
    result.inputs.insert(
        index_variable.clone(),
        Input {
            r#type: ValueType::Float,
            default: Some(Value::Scalar(0.0)),
        },
    );
    for name in [&flattener.vertex_index, &flattener.cursor] {
        result.variables.insert(name.clone(), ValueType::Int);
    }
    for name in flattener.loop_starts {
        result.variables.insert(name, ValueType::Int);
    }
    result.statements = statements;

    debug!(count, index = %index_variable, "flattened emits");
    Ok(FlattenedEmits {
        specification: result,
        count,
        index_variable,
    })
}

/// Add emit counts, failing once the total no longer fits an `int`.
fn add_counts(lhs: usize, rhs: usize) -> Result<usize, FlattenError> {
    (lhs.checked_add(rhs))
        .filter(|count| *count <= MAX_EMIT_COUNT)
        .ok_or(FlattenError::TooManyEmits)
}

fn int(value: i64) -> Expr {
    Expr::constant(value as f64, ValueType::Int)
}

struct Flattener<'a> {
    /// Names generated so far.
    used: FxHashSet<String>,
    specification: &'a Specification,
    /// Loop start variables, in the order they were generated.
    loop_starts: Vec<String>,
    vertex_index: String,
    cursor: String,
}

impl<'a> Flattener<'a> {
    fn fresh_name(&mut self, prefix: &str) -> String {
        let name = attempt_name(prefix, |candidate| {
            !self.used.contains(candidate) && !self.specification.is_declared(candidate)
        });
        self.used.insert(name.clone());
        name
    }

    fn vertex_index(&self) -> Expr {
        Expr::variable(self.vertex_index.as_str(), ValueType::Int)
    }

    fn cursor(&self) -> Expr {
        Expr::variable(self.cursor.as_str(), ValueType::Int)
    }

    /// Rewrite a block, returning it along with its maximum emit count.
    fn block(&mut self, stmts: &[Stmt]) -> Result<(Vec<Stmt>, usize), FlattenError> {
        let mut result = Vec::with_capacity(stmts.len());
        let mut count = 0;
        for stmt in stmts {
            count = add_counts(count, self.stmt(stmt, &mut result)?)?;
        }
        Ok((result, count))
    }

    fn stmt(&mut self, stmt: &Stmt, result: &mut Vec<Stmt>) -> Result<usize, FlattenError> {
        match stmt {
            Stmt::Emit(_) => {
                result.push(Stmt::Condition {
                    test: Expr::compare("==", self.vertex_index(), self.cursor()),
                    then_body: vec![stmt.clone()],
                    else_body: Vec::new(),
                });
                result.push(Stmt::Assign(self.cursor.clone(), Expr::binop("+", self.cursor(), int(1))));
                Ok(1)
            }
            Stmt::Condition {
                test,
                then_body,
                else_body,
            } => {
                let (then_body, then_count) = self.block(then_body)?;
                let (else_body, else_count) = self.block(else_body)?;
                result.push(Stmt::Condition {
                    test: test.clone(),
                    then_body,
                    else_body,
                });
                Ok(then_count.max(else_count))
            }
            Stmt::ForLoop {
                var,
                range_min,
                range_max,
                body,
            } => {
                let trip_count = (range_max.checked_sub(*range_min))
                    .and_then(|span| usize::try_from(span).ok())
                    .map_or(0, |span| span.saturating_add(1));
                let (flattened, body_count) = self.block(body)?;
                if body_count == 0 || trip_count == 0 {
                    result.push(stmt.clone());
                    return Ok(0);
                }
                let total = (body_count.checked_mul(trip_count))
                    .filter(|total| *total <= MAX_EMIT_COUNT)
                    .ok_or(FlattenError::TooManyEmits)?;
                result.extend(self.window(var, *range_min, body_count, total, flattened));
                Ok(total)
            }
            Stmt::Assign(..) | Stmt::Discard => {
                result.push(stmt.clone());
                Ok(0)
            }
        }
    }

    /// Guard a flattened loop body so it only runs for vertex indices in the
    /// loop's window, with the loop variable of the containing iteration.
    fn window(
        &mut self,
        var: &str,
        range_min: i64,
        body_count: usize,
        total: usize,
        body: Vec<Stmt>,
    ) -> Vec<Stmt> {
        let start_name = self.fresh_name(LOOP_START_PREFIX);
        self.loop_starts.push(start_name.clone());
        let start = || Expr::variable(start_name.as_str(), ValueType::Int);
        let body_count = int(body_count as i64);
        let end = Stmt::Assign(self.cursor.clone(), Expr::binop("+", start(), int(total as i64)));

        let test = Expr::compare(
            "&&",
            Expr::compare("<=", start(), self.vertex_index()),
            Expr::compare(
                "<",
                self.vertex_index(),
                Expr::binop("+", start(), int(total as i64)),
            ),
        );

        let offset = Expr::binop("-", self.vertex_index(), start());
        let iteration = Expr::binop("/", offset, body_count.clone());
        let loop_var = Expr::variable(var, ValueType::Int);
        let iteration_start = Expr::binop(
            "+",
            start(),
            Expr::binop("*", Expr::binop("-", loop_var, int(range_min)), body_count),
        );

        let mut then_body = vec![
            Stmt::Assign(var.to_owned(), Expr::binop("+", int(range_min), iteration)),
            Stmt::Assign(self.cursor.clone(), iteration_start),
        ];
        then_body.extend(body);
        then_body.push(end.clone());

        vec![
            Stmt::Assign(start_name.clone(), self.cursor()),
            Stmt::Condition {
                test,
                then_body,
                else_body: vec![end],
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;
    use crate::eval::evaluate;
    use crate::intrinsics::Registry;

    fn flatten(source: &str) -> FlattenedEmits {
        let specs = crate::compile_string(source).unwrap();
        let (_, spec) = specs.first().unwrap();
        let flattened = flatten_emits(spec).unwrap();
        assert!(flattened.specification.undeclared_variables().is_empty());
        flattened
    }

    /// The values of `attr` emitted for each vertex index, or `None` where no
    /// emit fires.
    fn run(flattened: &FlattenedEmits, attr: &str, inputs: &[(&str, Value)]) -> Vec<Option<f64>> {
        (0..flattened.count + 1)
            .map(|index| {
                let mut values = (inputs.iter())
                    .map(|(name, value)| (name.to_string(), value.clone()))
                    .collect::<IndexMap<_, _>>();
                values.insert(flattened.index_variable.clone(), Value::Scalar(index as f64));
                let vertices = evaluate(Registry::shared(), &flattened.specification, &values).unwrap();
                assert!(vertices.len() <= 1, "index {index} fired {} emits", vertices.len());
                vertices.first().and_then(|vertex| vertex[attr].as_scalar())
            })
            .collect()
    }

    #[test]
    fn every_index_fires_one_emit() {
        let flattened = flatten(
            "mark M() {
                for (i in 0..2) {
                    emit [{ a: float(i), b: 0.0 }];
                    emit [{ a: float(i), b: 1.0 }];
                }
            }",
        );
        assert_eq!(flattened.count, 6);
        let a = run(&flattened, "a", &[]);
        assert_eq!(a, [Some(0.0), Some(0.0), Some(1.0), Some(1.0), Some(2.0), Some(2.0), None]);
        let b = run(&flattened, "b", &[]);
        assert_eq!(b, [Some(0.0), Some(1.0), Some(0.0), Some(1.0), Some(0.0), Some(1.0), None]);
    }

    #[test]
    fn emits_after_loops() {
        let flattened = flatten(
            "mark M() {
                for (i in 0..1) emit [{ a: float(i) }];
                emit [{ a: 10.0 }];
            }",
        );
        assert_eq!(flattened.count, 3);
        assert_eq!(run(&flattened, "a", &[]), [Some(0.0), Some(1.0), Some(10.0), None]);
    }

    #[test]
    fn nested_loops() {
        let flattened = flatten(
            "mark M() {
                for (i in 0..1) {
                    for (j in 0..2) emit [{ a: float(i * 10 + j) }];
                }
            }",
        );
        assert_eq!(flattened.count, 6);
        let a = run(&flattened, "a", &[]);
        assert_eq!(a, [Some(0.0), Some(1.0), Some(2.0), Some(10.0), Some(11.0), Some(12.0), None]);
        let loop_starts = (flattened.specification.variables.keys())
            .filter(|name| name.starts_with(LOOP_START_PREFIX))
            .collect::<Vec<_>>();
        assert_eq!(loop_starts.len(), 2);
    }

    #[test]
    fn conditions_count_their_larger_branch() {
        let flattened = flatten(
            "mark M(x: float) {
                if x > 0 { emit [{ a: 1.0 }, { a: 2.0 }]; } else { emit [{ a: 3.0 }]; }
                emit [{ a: 4.0 }];
            }",
        );
        assert_eq!(flattened.count, 3);
        let positive = run(&flattened, "a", &[("x", Value::Scalar(1.0))]);
        assert_eq!(positive, [Some(1.0), Some(2.0), Some(4.0), None]);
        let negative = run(&flattened, "a", &[("x", Value::Scalar(-1.0))]);
        assert_eq!(negative, [Some(3.0), Some(4.0), None, None]);
    }

    #[test]
    fn loops_without_emits_are_unchanged() {
        let source = "mark M() {
            for (i in 0..3) { let y = float(i); }
            for (k in 3..0) emit [{ a: 1.0 }];
        }";
        let specs = crate::compile_string(source).unwrap();
        let spec = &specs["M"];
        let flattened = flatten_emits(spec).unwrap();
        assert_eq!(flattened.count, 0);
        assert_eq!(flattened.specification.statements[2..], spec.statements[..]);
    }

    #[test]
    fn oversized_loops_are_rejected() {
        let source = "mark M() {
            for (i in 0..2000000000) {
                for (j in 0..2000000000) {
                    for (k in 0..2000000000) emit [{ a: 1.0 }];
                }
            }
        }";
        let specs = crate::compile_string(source).unwrap();
        assert_eq!(flatten_emits(&specs["M"]).unwrap_err(), FlattenError::TooManyEmits);

        let source = "mark M() {
            for (i in 0..1999999999) emit [{ a: 1.0 }];
            for (j in 0..1999999999) emit [{ a: 2.0 }];
        }";
        let specs = crate::compile_string(source).unwrap();
        assert_eq!(flatten_emits(&specs["M"]).unwrap_err(), FlattenError::TooManyEmits);

        let source = "mark M() { for (i in 0..2147483646) emit [{ a: 1.0 }]; }";
        let specs = crate::compile_string(source).unwrap();
        assert_eq!(flatten_emits(&specs["M"]).unwrap().count, MAX_EMIT_COUNT);
    }

    #[test]
    fn generated_names_avoid_inputs() {
        let flattened = flatten("mark M(s3idx: float, s3vidx: int) { emit [{ a: s3idx }]; }");
        assert_eq!(flattened.index_variable, "s3idx1");
        assert!(flattened.specification.variables.contains_key("s3vidx1"));
        assert!(flattened.specification.variables.contains_key("s3emitidx"));
        let inputs = [("s3idx", Value::Scalar(5.0))];
        assert_eq!(run(&flattened, "a", &inputs), [Some(5.0), None]);
    }
}
