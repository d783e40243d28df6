//! # Sable Core Runtime
//!
//! This crate provides the value model and fiber execution substrate that the
//! rest of the Sable scripting language is built on: the tagged [`Value`]
//! representation, the heap object taxonomy (strings, lists, dicts, ranges,
//! functions, closures, upvalues, classes, instances, modules and fibers),
//! and the [`Vm`] that owns every heap object and the garbage-collection
//! machinery over them.
//!
//! The bytecode compiler and the interpreter dispatch loop are separate
//! collaborators; they consume the types defined here. Nothing in this crate
//! dispatches opcodes — a function's bytecode is an opaque byte stream as far
//! as the core is concerned.

pub use self::{
    class::{ClassFlags, ForeignFn, InheritError, MethodBinding, PrimitiveFn},
    fiber::{CallFrame, FiberState},
    object::{
        ClassRef, ClosureRef, DictRef, FiberRef, FunctionRef, InstanceRef, ListRef, MethodRef,
        ModuleRef, ObjRef, ObjectKind, RangeRef, StringRef, TypedRef, UpvalueRef,
    },
    value::Value,
    vm::{CoreClasses, Handle, Vm},
};

pub mod class;
pub mod closure;
pub mod dict;
pub mod fiber;
pub mod function;
pub mod list;
pub mod module;
pub mod object;
pub mod range;
pub mod string;
pub mod testonly;
#[cfg(test)]
mod tests;
pub mod utf8;
pub mod value;
pub mod vm;
