// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Lexical scopes and the dynamic `$` variable overlay
//!
//! Scopes live in an arena and refer to their parent by id. Scopes pushed
//! for a call or block are released in LIFO order once they finish, unless
//! a closure captured them; capturing pins the captured scope and its
//! ancestors for the rest of the run.

use super::value::{FunctionValue, ModuleValue, Value};
use ahash::AHashMap;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u32);

#[derive(Debug, Default)]
struct Scope<'a> {
    parent: Option<ScopeId>,
    vars: AHashMap<String, Value<'a>>,
    functions: AHashMap<String, Rc<FunctionValue<'a>>>,
    modules: AHashMap<String, Rc<ModuleValue<'a>>>,
    pinned: bool,
}

#[derive(Debug)]
pub struct ScopeArena<'a> {
    scopes: Vec<Scope<'a>>,
}

impl Default for ScopeArena<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> ScopeArena<'a> {
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope {
                pinned: true,
                ..Scope::default()
            }],
        }
    }

    pub fn root(&self) -> ScopeId {
        ScopeId(0)
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    pub fn push(&mut self, parent: ScopeId) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope {
            parent: Some(parent),
            ..Scope::default()
        });
        id
    }

    /// Drop `id` if it is the newest scope and no closure pinned it
    pub fn release(&mut self, id: ScopeId) {
        let index = id.0 as usize;
        if index + 1 == self.scopes.len() && !self.scopes[index].pinned {
            self.scopes.pop();
        }
    }

    /// Keep `id` and its ancestors alive for the rest of the run
    pub fn pin(&mut self, id: ScopeId) {
        let mut next = Some(id);
        while let Some(current) = next {
            let scope = &mut self.scopes[current.0 as usize];
            if scope.pinned {
                break;
            }
            scope.pinned = true;
            next = scope.parent;
        }
    }

    pub fn set_var(&mut self, id: ScopeId, name: &str, value: Value<'a>) {
        self.scopes[id.0 as usize].vars.insert(name.to_string(), value);
    }

    pub fn lookup_var(&self, id: ScopeId, name: &str) -> Option<&Value<'a>> {
        self.chain(id).find_map(|scope| scope.vars.get(name))
    }

    pub fn define_function(&mut self, id: ScopeId, name: &str, function: Rc<FunctionValue<'a>>) {
        self.scopes[id.0 as usize]
            .functions
            .insert(name.to_string(), function);
    }

    pub fn lookup_function(&self, id: ScopeId, name: &str) -> Option<Rc<FunctionValue<'a>>> {
        self.chain(id)
            .find_map(|scope| scope.functions.get(name))
            .cloned()
    }

    pub fn define_module(&mut self, id: ScopeId, name: &str, module: Rc<ModuleValue<'a>>) {
        self.scopes[id.0 as usize]
            .modules
            .insert(name.to_string(), module);
    }

    pub fn lookup_module(&self, id: ScopeId, name: &str) -> Option<Rc<ModuleValue<'a>>> {
        self.chain(id)
            .find_map(|scope| scope.modules.get(name))
            .cloned()
    }

    /// Copy the functions and modules declared directly in `from` into `to`
    pub fn import_declarations(&mut self, from: ScopeId, to: ScopeId) {
        let source = &self.scopes[from.0 as usize];
        let functions: Vec<_> = source
            .functions
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let modules: Vec<_> = source
            .modules
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let target = &mut self.scopes[to.0 as usize];
        target.functions.extend(functions);
        target.modules.extend(modules);
    }

    fn chain(&self, id: ScopeId) -> impl Iterator<Item = &Scope<'a>> {
        std::iter::successors(Some(&self.scopes[id.0 as usize]), move |scope| {
            scope.parent.map(|p| &self.scopes[p.0 as usize])
        })
    }
}

/// Stack of `$` variable frames.
///
/// A frame is pushed for every module call, function call and block, so a
/// `$` assignment is visible to everything evaluated beneath it at runtime
/// and disappears when the frame pops.
#[derive(Debug)]
pub struct SpecialVars<'a> {
    frames: Vec<AHashMap<String, Value<'a>>>,
}

impl<'a> SpecialVars<'a> {
    pub fn new(base: impl IntoIterator<Item = (String, Value<'a>)>) -> Self {
        Self {
            frames: vec![base.into_iter().collect()],
        }
    }

    pub fn push_frame(&mut self) {
        self.frames.push(AHashMap::new());
    }

    pub fn pop_frame(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn set(&mut self, name: &str, value: Value<'a>) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(name.to_string(), value);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value<'a>> {
        self.frames.iter().rev().find_map(|frame| frame.get(name))
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_walks_parents() {
        let mut arena = ScopeArena::new();
        let root = arena.root();
        arena.set_var(root, "a", Value::Number(1.0));

        let child = arena.push(root);
        arena.set_var(child, "b", Value::Number(2.0));
        assert_eq!(arena.lookup_var(child, "a"), Some(&Value::Number(1.0)));
        assert_eq!(arena.lookup_var(root, "b"), None);

        arena.set_var(child, "a", Value::Number(3.0));
        assert_eq!(arena.lookup_var(child, "a"), Some(&Value::Number(3.0)));
        assert_eq!(arena.lookup_var(root, "a"), Some(&Value::Number(1.0)));
    }

    #[test]
    fn test_release_is_lifo_and_respects_pins() {
        let mut arena = ScopeArena::new();
        let a = arena.push(arena.root());
        let b = arena.push(a);
        arena.release(a);
        assert_eq!(arena.len(), 3);
        arena.release(b);
        arena.release(a);
        assert_eq!(arena.len(), 1);

        let c = arena.push(arena.root());
        arena.pin(c);
        arena.release(c);
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_pin_keeps_only_the_captured_chain() {
        let mut arena = ScopeArena::new();
        let a = arena.push(arena.root());
        let b = arena.push(a);
        let c = arena.push(b);
        arena.pin(b);

        arena.release(c);
        assert_eq!(arena.len(), 3);
        arena.release(b);
        arena.release(a);
        assert_eq!(arena.len(), 3);

        let d = arena.push(arena.root());
        arena.release(d);
        assert_eq!(arena.len(), 3);
    }

    #[test]
    fn test_special_frames() {
        let mut specials = SpecialVars::new([("$fn".to_string(), Value::Number(0.0))]);
        specials.push_frame();
        specials.set("$fn", Value::Number(12.0));
        assert_eq!(specials.number("$fn"), Some(12.0));
        specials.pop_frame();
        assert_eq!(specials.number("$fn"), Some(0.0));
        specials.pop_frame();
        assert_eq!(specials.depth(), 1);
    }
}
