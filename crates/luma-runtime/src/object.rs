//! Managed heap entities
//!
//! The original design's class hierarchy collapses into one discriminated
//! union: every heap object is an [`ObjData`] behind a GC header in the
//! arena. Polymorphic operations become matches in the interpreter.

use crate::heap::ObjId;
use crate::intern::NameId;
use crate::value::{RuntimeError, Value};
use std::collections::BTreeMap;
use std::mem;

/// Host-provided callable
///
/// Reads its arguments through [`crate::vm::Vm::parameter`] and returns how
/// many results (0 or 1) it left on the value stack; the VM pops the
/// arguments afterwards.
pub type HostFn = fn(&mut crate::vm::Vm) -> Result<usize, RuntimeError>;

/// A table: named members plus an optional meta table for lookup fallback
#[derive(Debug, Default)]
pub struct Table {
    /// Member values keyed by interned name
    pub members: BTreeMap<NameId, Value>,
    /// Fallback lookup target, traversed when a member is absent
    pub meta: Option<ObjId>,
}

/// A user-defined closure
#[derive(Debug)]
pub struct Function {
    /// Index of the first instruction of the body
    pub entry: usize,
    /// Receiver bound by the most recent attribute-read lookup
    pub self_table: Option<ObjId>,
    /// Closed-over values in declaration order
    pub captures: Vec<Value>,
}

impl Function {
    /// A fresh function with no captures and no bound receiver
    pub fn new(entry: usize) -> Self {
        Self {
            entry,
            self_table: None,
            captures: Vec::new(),
        }
    }
}

/// Payload of a managed heap object
#[derive(Debug)]
pub enum ObjData {
    /// Name → value mapping with meta fallback
    Table(Table),
    /// Ordered sequence of values
    Array(Vec<Value>),
    /// Growable byte buffer; immutable from the program's view except for
    /// the identity-preserving `+`
    Str(Vec<u8>),
    /// User-defined closure
    Function(Function),
    /// Opaque host callable
    Host(HostFn),
}

impl ObjData {
    /// Kind name used in error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            ObjData::Table(_) => "table",
            ObjData::Array(_) => "array",
            ObjData::Str(_) => "string",
            ObjData::Function(_) => "function",
            ObjData::Host(_) => "host function",
        }
    }

    /// Approximate retained size, fed into the collector's byte accounting
    pub fn size_estimate(&self) -> usize {
        let base = mem::size_of::<Self>();
        match self {
            ObjData::Table(t) => {
                base + t.members.len() * (mem::size_of::<NameId>() + mem::size_of::<Value>())
            }
            ObjData::Array(v) => base + v.len() * mem::size_of::<Value>(),
            ObjData::Str(b) => base + b.len(),
            ObjData::Function(f) => base + f.captures.len() * mem::size_of::<Value>(),
            ObjData::Host(_) => base,
        }
    }

    /// Visit every value directly reachable from this object
    pub fn children(&self, visit: &mut dyn FnMut(Value)) {
        match self {
            ObjData::Table(t) => {
                if let Some(meta) = t.meta {
                    visit(Value::Obj(meta));
                }
                for value in t.members.values() {
                    visit(*value);
                }
            }
            ObjData::Array(v) => {
                for value in v {
                    visit(*value);
                }
            }
            ObjData::Str(_) | ObjData::Host(_) => {}
            ObjData::Function(f) => {
                if let Some(receiver) = f.self_table {
                    visit(Value::Obj(receiver));
                }
                for value in &f.captures {
                    visit(*value);
                }
            }
        }
    }
}
