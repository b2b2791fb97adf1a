//! Generic traversal over the expression variant set.
//!
//! [`ExprVisitor`] is read-only: one handler per variant, each defaulting to
//! [`ExprVisitor::default_visit`], which walks the children. Analyses
//! override only the variants they care about.
//!
//! [`ExprMutator`] rebuilds the tree: the default handler for every variant
//! mutates the children and re-interns an equal node. Because the arena
//! hash-conses, an unmodified subtree comes back as the *same* id; a rule
//! overrides one or two variants to drop a binding, substitute a variable,
//! and so on. Mutation is fallible so that rewrite passes can surface
//! malformed IR mid-traversal.

use crate::error::Result;
use crate::ir::{Arena, Attrs, ExprId, ExprKind, Literal, VarId};

/// Read-only traversal with one overridable handler per variant.
pub trait ExprVisitor {
    /// Dispatches on the variant of `id`.
    fn visit(&mut self, arena: &Arena, id: ExprId) {
        match arena.kind(id).clone() {
            ExprKind::Var(var) => self.visit_var(arena, id, var),
            ExprKind::Constant(lit) => self.visit_constant(arena, id, lit),
            ExprKind::Global(name) => self.visit_global(arena, id, &name),
            ExprKind::Tuple(fields) => self.visit_tuple(arena, id, &fields),
            ExprKind::Call { op, args, attrs } => self.visit_call(arena, id, &op, &args, &attrs),
            ExprKind::Let { var, value, body } => self.visit_let(arena, id, var, value, body),
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => self.visit_if(arena, id, cond, then_branch, else_branch),
            ExprKind::TupleGetItem { tuple, index } => {
                self.visit_tuple_get_item(arena, id, tuple, index)
            }
            ExprKind::Function { params, body } => self.visit_function(arena, id, &params, body),
            ExprKind::RefCreate(value) => self.visit_ref_create(arena, id, value),
            ExprKind::RefRead(target) => self.visit_ref_read(arena, id, target),
            ExprKind::RefWrite { target, value } => self.visit_ref_write(arena, id, target, value),
        }
    }

    /// Handler for variants without a dedicated override: walks children.
    fn default_visit(&mut self, arena: &Arena, id: ExprId) {
        for child in arena.children(id) {
            self.visit(arena, child);
        }
    }

    fn visit_var(&mut self, arena: &Arena, id: ExprId, _var: VarId) {
        self.default_visit(arena, id);
    }

    fn visit_constant(&mut self, arena: &Arena, id: ExprId, _lit: Literal) {
        self.default_visit(arena, id);
    }

    fn visit_global(&mut self, arena: &Arena, id: ExprId, _name: &str) {
        self.default_visit(arena, id);
    }

    fn visit_tuple(&mut self, arena: &Arena, id: ExprId, _fields: &[ExprId]) {
        self.default_visit(arena, id);
    }

    fn visit_call(&mut self, arena: &Arena, id: ExprId, _op: &str, _args: &[ExprId], _attrs: &Attrs) {
        self.default_visit(arena, id);
    }

    fn visit_let(&mut self, arena: &Arena, id: ExprId, _var: VarId, _value: ExprId, _body: ExprId) {
        self.default_visit(arena, id);
    }

    fn visit_if(
        &mut self,
        arena: &Arena,
        id: ExprId,
        _cond: ExprId,
        _then_branch: ExprId,
        _else_branch: ExprId,
    ) {
        self.default_visit(arena, id);
    }

    fn visit_tuple_get_item(&mut self, arena: &Arena, id: ExprId, _tuple: ExprId, _index: usize) {
        self.default_visit(arena, id);
    }

    fn visit_function(&mut self, arena: &Arena, id: ExprId, _params: &[VarId], _body: ExprId) {
        self.default_visit(arena, id);
    }

    fn visit_ref_create(&mut self, arena: &Arena, id: ExprId, _value: ExprId) {
        self.default_visit(arena, id);
    }

    fn visit_ref_read(&mut self, arena: &Arena, id: ExprId, _target: ExprId) {
        self.default_visit(arena, id);
    }

    fn visit_ref_write(&mut self, arena: &Arena, id: ExprId, _target: ExprId, _value: ExprId) {
        self.default_visit(arena, id);
    }
}

/// Tree-rebuilding traversal. Default handlers reconstruct an equal node
/// from mutated children; overriding a handler changes one variant's
/// behavior while the rest of the tree is rebuilt untouched.
pub trait ExprMutator {
    fn mutate(&mut self, arena: &mut Arena, id: ExprId) -> Result<ExprId> {
        match arena.kind(id).clone() {
            ExprKind::Var(var) => self.mutate_var(arena, id, var),
            ExprKind::Constant(lit) => self.mutate_constant(arena, id, lit),
            ExprKind::Global(name) => self.mutate_global(arena, id, name),
            ExprKind::Tuple(fields) => self.mutate_tuple(arena, id, fields),
            ExprKind::Call { op, args, attrs } => self.mutate_call(arena, id, op, args, attrs),
            ExprKind::Let { var, value, body } => self.mutate_let(arena, id, var, value, body),
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => self.mutate_if(arena, id, cond, then_branch, else_branch),
            ExprKind::TupleGetItem { tuple, index } => {
                self.mutate_tuple_get_item(arena, id, tuple, index)
            }
            ExprKind::Function { params, body } => self.mutate_function(arena, id, params, body),
            ExprKind::RefCreate(value) => self.mutate_ref_create(arena, id, value),
            ExprKind::RefRead(target) => self.mutate_ref_read(arena, id, target),
            ExprKind::RefWrite { target, value } => self.mutate_ref_write(arena, id, target, value),
        }
    }

    fn mutate_var(&mut self, _arena: &mut Arena, id: ExprId, _var: VarId) -> Result<ExprId> {
        Ok(id)
    }

    fn mutate_constant(&mut self, _arena: &mut Arena, id: ExprId, _lit: Literal) -> Result<ExprId> {
        Ok(id)
    }

    fn mutate_global(&mut self, _arena: &mut Arena, id: ExprId, _name: String) -> Result<ExprId> {
        Ok(id)
    }

    fn mutate_tuple(
        &mut self,
        arena: &mut Arena,
        _id: ExprId,
        fields: Vec<ExprId>,
    ) -> Result<ExprId> {
        let fields = fields
            .into_iter()
            .map(|f| self.mutate(arena, f))
            .collect::<Result<Vec<_>>>()?;
        Ok(arena.tuple(fields))
    }

    fn mutate_call(
        &mut self,
        arena: &mut Arena,
        _id: ExprId,
        op: String,
        args: Vec<ExprId>,
        attrs: Attrs,
    ) -> Result<ExprId> {
        let args = args
            .into_iter()
            .map(|a| self.mutate(arena, a))
            .collect::<Result<Vec<_>>>()?;
        Ok(arena.call(op, args, attrs))
    }

    fn mutate_let(
        &mut self,
        arena: &mut Arena,
        _id: ExprId,
        var: VarId,
        value: ExprId,
        body: ExprId,
    ) -> Result<ExprId> {
        let value = self.mutate(arena, value)?;
        let body = self.mutate(arena, body)?;
        Ok(arena.let_(var, value, body))
    }

    fn mutate_if(
        &mut self,
        arena: &mut Arena,
        _id: ExprId,
        cond: ExprId,
        then_branch: ExprId,
        else_branch: ExprId,
    ) -> Result<ExprId> {
        let cond = self.mutate(arena, cond)?;
        let then_branch = self.mutate(arena, then_branch)?;
        let else_branch = self.mutate(arena, else_branch)?;
        Ok(arena.if_(cond, then_branch, else_branch))
    }

    fn mutate_tuple_get_item(
        &mut self,
        arena: &mut Arena,
        _id: ExprId,
        tuple: ExprId,
        index: usize,
    ) -> Result<ExprId> {
        let tuple = self.mutate(arena, tuple)?;
        Ok(arena.tuple_get_item(tuple, index))
    }

    fn mutate_function(
        &mut self,
        arena: &mut Arena,
        _id: ExprId,
        params: Vec<VarId>,
        body: ExprId,
    ) -> Result<ExprId> {
        let body = self.mutate(arena, body)?;
        Ok(arena.function(params, body))
    }

    fn mutate_ref_create(&mut self, arena: &mut Arena, _id: ExprId, value: ExprId) -> Result<ExprId> {
        let value = self.mutate(arena, value)?;
        Ok(arena.ref_create(value))
    }

    fn mutate_ref_read(&mut self, arena: &mut Arena, _id: ExprId, target: ExprId) -> Result<ExprId> {
        let target = self.mutate(arena, target)?;
        Ok(arena.ref_read(target))
    }

    fn mutate_ref_write(
        &mut self,
        arena: &mut Arena,
        _id: ExprId,
        target: ExprId,
        value: ExprId,
    ) -> Result<ExprId> {
        let target = self.mutate(arena, target)?;
        let value = self.mutate(arena, value)?;
        Ok(arena.ref_write(target, value))
    }
}

/// Counts uses of one variable across an expression tree. Shared by the
/// storage-sharing analysis, which must prove an allocation is consumed
/// exactly once.
pub struct UseCounter {
    target: VarId,
    pub count: usize,
}

impl UseCounter {
    pub fn new(target: VarId) -> Self {
        Self { target, count: 0 }
    }

    pub fn count_in(arena: &Arena, target: VarId, roots: &[ExprId]) -> usize {
        let mut counter = UseCounter::new(target);
        for &root in roots {
            counter.visit(arena, root);
        }
        counter.count
    }
}

impl ExprVisitor for UseCounter {
    fn visit_var(&mut self, _arena: &Arena, _id: ExprId, var: VarId) {
        if var == self.target {
            self.count += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Attrs;

    /// Mutator with no overrides: must rebuild every tree to the same id.
    struct Identity;
    impl ExprMutator for Identity {}

    #[test]
    fn test_default_mutator_is_identity() {
        let mut arena = Arena::new();
        let x = arena.fresh_var("x");
        let y = arena.fresh_var("y");
        let xe = arena.var(x);
        let call = arena.call("add", vec![xe, xe], Attrs::new());
        let ye = arena.var(y);
        let tup = arena.tuple(vec![ye, xe]);
        let item = arena.tuple_get_item(tup, 1);
        let inner = arena.let_(y, call, item);
        let func = arena.function(vec![x], inner);

        let out = Identity.mutate(&mut arena, func).unwrap();
        assert_eq!(out, func);
    }

    /// Substitutes one variable for another via a single override.
    struct Subst {
        from: VarId,
        to: VarId,
    }
    impl ExprMutator for Subst {
        fn mutate_var(&mut self, arena: &mut Arena, id: ExprId, var: VarId) -> Result<ExprId> {
            if var == self.from {
                Ok(arena.var(self.to))
            } else {
                Ok(id)
            }
        }
    }

    #[test]
    fn test_variable_substitution() {
        let mut arena = Arena::new();
        let a = arena.fresh_var("a");
        let b = arena.fresh_var("b");
        let ae = arena.var(a);
        let call = arena.call("relu", vec![ae], Attrs::new());

        let out = Subst { from: a, to: b }.mutate(&mut arena, call).unwrap();
        let be = arena.var(b);
        assert_eq!(out, arena.call("relu", vec![be], Attrs::new()));
    }

    #[test]
    fn test_use_counter() {
        let mut arena = Arena::new();
        let x = arena.fresh_var("x");
        let y = arena.fresh_var("y");
        let xe = arena.var(x);
        let ye = arena.var(y);
        let call = arena.call("add", vec![xe, xe], Attrs::new());
        let tup = arena.tuple(vec![call, ye]);
        assert_eq!(UseCounter::count_in(&arena, x, &[tup]), 2);
        assert_eq!(UseCounter::count_in(&arena, y, &[tup]), 1);
    }
}
