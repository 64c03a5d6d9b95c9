//! Nested lexical environments, mapping source names to collision-free names
//! in the specification.

use fxhash::FxHashMap;
use indexmap::IndexMap;
use thiserror::Error;

use crate::types::{attempt_name, ValueType};

const TEMPORARY_PREFIX: &str = "tmp";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeVariable {
    pub name: String,
    pub r#type: ValueType,
    /// Unique name of the variable in the compiled specification.
    pub translated: String,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Placement {
    /// The innermost frame.
    Local,
    /// The outermost frame, regardless of the current nesting.
    Global,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeError {
    #[error("variable `{0}` is already declared")]
    Duplicate(String),
    #[error("variable `{0}` is undefined")]
    Undefined(String),
}

#[derive(Default)]
struct Frame {
    variables: FxHashMap<String, ScopeVariable>,
    /// Formal parameter names of an inlined function, mapped to names
    /// declared in the calling frame.
    arg_map: Option<FxHashMap<String, String>>,
}

impl Frame {
    fn binds(&self, name: &str) -> bool {
        self.variables.contains_key(name)
            || (self.arg_map.as_ref()).map_or(false, |arg_map| arg_map.contains_key(name))
    }
}

pub struct Scope {
    frames: Vec<Frame>,
    /// Every translated name handed out so far, in declaration order.
    translated: IndexMap<String, ValueType>,
}

impl Scope {
    pub fn new() -> Scope {
        Scope {
            frames: vec![Frame::default()],
            translated: IndexMap::new(),
        }
    }

    pub fn push(&mut self, arg_map: Option<FxHashMap<String, String>>) {
        self.frames.push(Frame {
            variables: FxHashMap::default(),
            arg_map,
        });
    }

    pub fn pop(&mut self) {
        debug_assert!(self.frames.len() > 1, "attempted to pop the outermost frame");
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    fn is_unused(&self, name: &str) -> bool {
        !self.translated.contains_key(name)
    }

    pub fn add_variable(
        &mut self,
        name: &str,
        r#type: ValueType,
        placement: Placement,
    ) -> Result<ScopeVariable, ScopeError> {
        let index = match placement {
            Placement::Local => self.frames.len() - 1,
            Placement::Global => 0,
        };
        if self.frames[index].binds(name) {
            return Err(ScopeError::Duplicate(name.to_owned()));
        }

        let translated = attempt_name(name, |candidate| self.is_unused(candidate));
        self.translated.insert(translated.clone(), r#type);
        let variable = ScopeVariable {
            name: name.to_owned(),
            r#type,
            translated,
        };
        self.frames[index].variables.insert(name.to_owned(), variable.clone());
        Ok(variable)
    }

    /// Declare a fresh temporary in the current frame.
    pub fn next_variable(&mut self, r#type: ValueType) -> ScopeVariable {
        let name = attempt_name(TEMPORARY_PREFIX, |candidate| {
            self.is_unused(candidate) && !self.frames.iter().any(|frame| frame.binds(candidate))
        });
        let variable = ScopeVariable {
            name: name.clone(),
            r#type,
            translated: name.clone(),
        };
        self.translated.insert(name.clone(), r#type);
        if let Some(frame) = self.frames.last_mut() {
            frame.variables.insert(name, variable.clone());
        }
        variable
    }

    pub fn get_variable(&self, name: &str) -> Result<&ScopeVariable, ScopeError> {
        self.lookup(self.frames.len(), name)
            .ok_or_else(|| ScopeError::Undefined(name.to_owned()))
    }

    pub fn translate_variable_name(&self, name: &str) -> Result<&str, ScopeError> {
        Ok(self.get_variable(name)?.translated.as_str())
    }

    /// Look `name` up in the first `depth` frames, innermost first. A frame's
    /// argument map is resolved against the frames enclosing it.
    fn lookup(&self, depth: usize, name: &str) -> Option<&ScopeVariable> {
        let mut depth = depth;
        while depth > 0 {
            let frame = &self.frames[depth - 1];
            if let Some(variable) = frame.variables.get(name) {
                return Some(variable);
            }
            if let Some(mapped) = frame.arg_map.as_ref().and_then(|arg_map| arg_map.get(name)) {
                return self.lookup(depth - 1, mapped);
            }
            depth -= 1;
        }
        None
    }

    /// Names visible from the current frame, for diagnostics.
    pub fn visible_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.frames.iter().flat_map(|frame| {
            let variables = frame.variables.keys();
            let formals = frame.arg_map.iter().flat_map(|arg_map| arg_map.keys());
            variables.chain(formals).map(String::as_str)
        })
    }

    /// Every translated name with its type, in declaration order.
    pub fn translated_names(&self) -> &IndexMap<String, ValueType> {
        &self.translated
    }
}

impl Default for Scope {
    fn default() -> Scope {
        Scope::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_in_the_same_frame() {
        let mut scope = Scope::new();
        scope.add_variable("x", ValueType::Float, Placement::Local).unwrap();
        assert_eq!(
            scope.add_variable("x", ValueType::Int, Placement::Local),
            Err(ScopeError::Duplicate("x".to_owned()))
        );
    }

    #[test]
    fn shadowing_gets_a_fresh_name() {
        let mut scope = Scope::new();
        scope.add_variable("x", ValueType::Float, Placement::Local).unwrap();
        scope.push(None);
        let inner = scope.add_variable("x", ValueType::Int, Placement::Local).unwrap();
        assert_eq!(inner.translated, "x1");
        assert_eq!(scope.get_variable("x").unwrap().r#type, ValueType::Int);
        scope.pop();
        assert_eq!(scope.translate_variable_name("x"), Ok("x"));

        // Names stay unique once their frame is gone.
        scope.push(None);
        let again = scope.add_variable("x", ValueType::Int, Placement::Local).unwrap();
        assert_eq!(again.translated, "x2");
    }

    #[test]
    fn globals_go_to_the_outermost_frame() {
        let mut scope = Scope::new();
        scope.push(None);
        scope.add_variable("g", ValueType::Float, Placement::Global).unwrap();
        scope.pop();
        assert!(scope.get_variable("g").is_ok());
        assert!(scope.add_variable("g", ValueType::Float, Placement::Global).is_err());
    }

    #[test]
    fn argument_maps_redirect_one_level() {
        let mut scope = Scope::new();
        let tmp = scope.next_variable(ValueType::Vector2);
        assert_eq!(tmp.translated, "tmp");
        scope.push(Some(FxHashMap::from_iter([("p".to_owned(), tmp.name.clone())])));
        assert_eq!(scope.translate_variable_name("p"), Ok("tmp"));
        assert_eq!(
            scope.add_variable("p", ValueType::Float, Placement::Local),
            Err(ScopeError::Duplicate("p".to_owned()))
        );

        // A nested inlining maps its own formal onto a temporary declared in
        // the first inlined frame.
        let inner_tmp = scope.next_variable(ValueType::Vector2);
        assert_eq!(inner_tmp.translated, "tmp1");
        scope.push(Some(FxHashMap::from_iter([("q".to_owned(), inner_tmp.name)])));
        assert_eq!(scope.translate_variable_name("q"), Ok("tmp1"));
        assert_eq!(scope.translate_variable_name("p"), Ok("tmp"));
        scope.pop();
        scope.pop();
        assert_eq!(
            scope.get_variable("p"),
            Err(ScopeError::Undefined("p".to_owned()))
        );
    }

    #[test]
    fn temporaries_avoid_declared_names() {
        let mut scope = Scope::new();
        scope.add_variable("tmp", ValueType::Float, Placement::Global).unwrap();
        scope.push(None);
        scope.add_variable("tmp1", ValueType::Float, Placement::Local).unwrap();
        assert_eq!(scope.next_variable(ValueType::Float).translated, "tmp2");
        scope.pop();
        assert_eq!(scope.next_variable(ValueType::Float).translated, "tmp3");
        let names = scope.translated_names().keys().cloned().collect::<Vec<_>>();
        assert_eq!(names, ["tmp", "tmp1", "tmp2", "tmp3"]);
    }
}
