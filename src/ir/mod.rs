//! IR core: an arena of immutable, hash-consed expression nodes.
//!
//! Expressions form a closed tagged variant ([`ExprKind`]) in let-normal
//! form. Nodes live in an [`Arena`] and are addressed by stable [`ExprId`]
//! indices; interning guarantees that structurally equal nodes share one id,
//! so id equality *is* structural equality. Rewrites never mutate a node in
//! place: they intern new nodes and leave the old ones untouched, which is
//! what lets passes hand back a new module while the input stays valid.
//!
//! Variables are identities, not names: a [`VarId`] indexes a per-arena
//! variable table carrying a purely cosmetic name hint and an optional
//! *may-share* annotation naming another variable whose backing storage it
//! is permitted to alias.

pub mod anf;
pub mod printer;
pub mod ty;
pub mod visit;

use std::hash::{Hash, Hasher};

use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use ty::DType;

/// Stable index of an expression node in an [`Arena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(u32);

impl ExprId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Identity of a variable. Two variables with the same name hint are still
/// distinct; maps throughout the crate key on `VarId`, never on the hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(u32);

impl VarId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A literal scalar constant.
#[derive(Debug, Clone, Copy)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Literal::Int(a), Literal::Int(b)) => a == b,
            (Literal::Float(a), Literal::Float(b)) => a.to_bits() == b.to_bits(),
            (Literal::Bool(a), Literal::Bool(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Literal {}

impl Hash for Literal {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Literal::Int(v) => {
                state.write_u8(0);
                v.hash(state);
            }
            Literal::Float(v) => {
                state.write_u8(1);
                v.to_bits().hash(state);
            }
            Literal::Bool(v) => {
                state.write_u8(2);
                v.hash(state);
            }
        }
    }
}

/// A non-tensor literal attribute of an operator call.
#[derive(Debug, Clone)]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Ints(Vec<i64>),
    Dtype(DType),
}

impl PartialEq for AttrValue {
    fn eq(&self, other: &Self) -> bool {
        use AttrValue::*;
        match (self, other) {
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Bool(a), Bool(b)) => a == b,
            (Str(a), Str(b)) => a == b,
            (Ints(a), Ints(b)) => a == b,
            (Dtype(a), Dtype(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for AttrValue {}

impl Hash for AttrValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        use AttrValue::*;
        match self {
            Int(v) => {
                state.write_u8(0);
                v.hash(state);
            }
            Float(v) => {
                state.write_u8(1);
                v.to_bits().hash(state);
            }
            Bool(v) => {
                state.write_u8(2);
                v.hash(state);
            }
            Str(v) => {
                state.write_u8(3);
                v.hash(state);
            }
            Ints(v) => {
                state.write_u8(4);
                v.hash(state);
            }
            Dtype(v) => {
                state.write_u8(5);
                v.hash(state);
            }
        }
    }
}

/// An ordered attribute record attached to an operator call.
///
/// Insertion order is preserved so that rendering and hashing are
/// deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Attrs(Vec<(String, AttrValue)>);

impl Attrs {
    pub fn new() -> Self {
        Attrs(Vec::new())
    }

    pub fn set(mut self, name: impl Into<String>, value: AttrValue) -> Self {
        self.0.push((name.into(), value));
        self
    }

    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The closed variant set of IR expressions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExprKind {
    /// A use of a variable identity.
    Var(VarId),
    /// A literal scalar constant.
    Constant(Literal),
    /// A reference to a module-level function by name.
    Global(String),
    Tuple(Vec<ExprId>),
    Call {
        op: String,
        args: Vec<ExprId>,
        attrs: Attrs,
    },
    Let {
        var: VarId,
        value: ExprId,
        body: ExprId,
    },
    If {
        cond: ExprId,
        then_branch: ExprId,
        else_branch: ExprId,
    },
    TupleGetItem {
        tuple: ExprId,
        index: usize,
    },
    Function {
        params: Vec<VarId>,
        body: ExprId,
    },
    RefCreate(ExprId),
    RefRead(ExprId),
    RefWrite {
        target: ExprId,
        value: ExprId,
    },
}

/// Per-variable metadata stored alongside the arena.
#[derive(Debug, Clone)]
pub struct VarInfo {
    /// Cosmetic name used only for rendering; never an identity.
    pub name_hint: String,
    /// Storage-aliasing hint: this variable's backing storage may alias the
    /// named variable's storage. Consumed by the storage-sharing pass.
    pub may_share: Option<VarId>,
}

/// Arena of interned expression nodes plus the variable table.
///
/// The arena is append-only: interning new nodes never invalidates existing
/// ids, so a pass can build a rewritten module while the input module's
/// expressions remain addressable.
#[derive(Debug, Default)]
pub struct Arena {
    nodes: Vec<ExprKind>,
    interned: FxHashMap<ExprKind, ExprId>,
    vars: Vec<VarInfo>,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a node, returning the existing id when a structurally equal
    /// node is already present.
    pub fn intern(&mut self, kind: ExprKind) -> ExprId {
        if let Some(&id) = self.interned.get(&kind) {
            return id;
        }
        let id = ExprId(self.nodes.len() as u32);
        self.nodes.push(kind.clone());
        self.interned.insert(kind, id);
        id
    }

    pub fn kind(&self, id: ExprId) -> &ExprKind {
        &self.nodes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    // --- Variables ---------------------------------------------------------

    /// Creates a fresh variable identity with a cosmetic name hint.
    pub fn fresh_var(&mut self, name_hint: impl Into<String>) -> VarId {
        let id = VarId(self.vars.len() as u32);
        self.vars.push(VarInfo {
            name_hint: name_hint.into(),
            may_share: None,
        });
        id
    }

    /// Creates a fresh variable whose storage may alias `target`'s storage.
    pub fn fresh_var_may_share(&mut self, name_hint: impl Into<String>, target: VarId) -> VarId {
        let id = self.fresh_var(name_hint);
        self.vars[id.index()].may_share = Some(target);
        id
    }

    pub fn var_info(&self, var: VarId) -> &VarInfo {
        &self.vars[var.index()]
    }

    pub fn may_share(&self, var: VarId) -> Option<VarId> {
        self.vars[var.index()].may_share
    }

    // --- Node builders -----------------------------------------------------

    pub fn var(&mut self, var: VarId) -> ExprId {
        self.intern(ExprKind::Var(var))
    }

    pub fn constant(&mut self, lit: Literal) -> ExprId {
        self.intern(ExprKind::Constant(lit))
    }

    pub fn global(&mut self, name: impl Into<String>) -> ExprId {
        self.intern(ExprKind::Global(name.into()))
    }

    pub fn tuple(&mut self, fields: Vec<ExprId>) -> ExprId {
        self.intern(ExprKind::Tuple(fields))
    }

    pub fn call(&mut self, op: impl Into<String>, args: Vec<ExprId>, attrs: Attrs) -> ExprId {
        self.intern(ExprKind::Call {
            op: op.into(),
            args,
            attrs,
        })
    }

    pub fn let_(&mut self, var: VarId, value: ExprId, body: ExprId) -> ExprId {
        self.intern(ExprKind::Let { var, value, body })
    }

    pub fn if_(&mut self, cond: ExprId, then_branch: ExprId, else_branch: ExprId) -> ExprId {
        self.intern(ExprKind::If {
            cond,
            then_branch,
            else_branch,
        })
    }

    pub fn tuple_get_item(&mut self, tuple: ExprId, index: usize) -> ExprId {
        self.intern(ExprKind::TupleGetItem { tuple, index })
    }

    pub fn function(&mut self, params: Vec<VarId>, body: ExprId) -> ExprId {
        self.intern(ExprKind::Function { params, body })
    }

    pub fn ref_create(&mut self, value: ExprId) -> ExprId {
        self.intern(ExprKind::RefCreate(value))
    }

    pub fn ref_read(&mut self, target: ExprId) -> ExprId {
        self.intern(ExprKind::RefRead(target))
    }

    pub fn ref_write(&mut self, target: ExprId, value: ExprId) -> ExprId {
        self.intern(ExprKind::RefWrite { target, value })
    }

    /// Direct children of a node, in a fixed order.
    pub fn children(&self, id: ExprId) -> Vec<ExprId> {
        match self.kind(id) {
            ExprKind::Var(_) | ExprKind::Constant(_) | ExprKind::Global(_) => vec![],
            ExprKind::Tuple(fields) => fields.clone(),
            ExprKind::Call { args, .. } => args.clone(),
            ExprKind::Let { value, body, .. } => vec![*value, *body],
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => vec![*cond, *then_branch, *else_branch],
            ExprKind::TupleGetItem { tuple, .. } => vec![*tuple],
            ExprKind::Function { body, .. } => vec![*body],
            ExprKind::RefCreate(v) | ExprKind::RefRead(v) => vec![*v],
            ExprKind::RefWrite { target, value } => vec![*target, *value],
        }
    }
}

/// An ordered mapping from global function name to [`ExprKind::Function`]
/// expression. Passes consume one module and produce a new one; the input
/// module is never mutated.
#[derive(Debug, Clone, Default)]
pub struct Module {
    functions: IndexMap<String, ExprId>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, func: ExprId) {
        self.functions.insert(name.into(), func);
    }

    pub fn get(&self, name: &str) -> Result<ExprId> {
        self.functions
            .get(name)
            .copied()
            .ok_or_else(|| Error::Lookup(format!("no function named `{name}` in module")))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ExprId)> {
        self.functions.iter().map(|(n, f)| (n.as_str(), *f))
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_dedups_structurally_equal_nodes() {
        let mut arena = Arena::new();
        let x = arena.fresh_var("x");
        let a = arena.var(x);
        let b = arena.var(x);
        assert_eq!(a, b);

        let c1 = arena.call("add", vec![a, b], Attrs::new());
        let c2 = arena.call("add", vec![a, b], Attrs::new());
        assert_eq!(c1, c2);

        let c3 = arena.call(
            "add",
            vec![a, b],
            Attrs::new().set("axis", AttrValue::Int(0)),
        );
        assert_ne!(c1, c3);
    }

    #[test]
    fn test_var_identity_is_not_name() {
        let mut arena = Arena::new();
        let x1 = arena.fresh_var("x");
        let x2 = arena.fresh_var("x");
        assert_ne!(x1, x2);
        assert_ne!(arena.var(x1), arena.var(x2));
    }

    #[test]
    fn test_float_attr_equality_by_bits() {
        let a = AttrValue::Float(0.1);
        let b = AttrValue::Float(0.1);
        let c = AttrValue::Float(0.2);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_module_lookup_fails_for_unknown_name() {
        let module = Module::new();
        assert!(module.get("main").is_err());
    }
}
