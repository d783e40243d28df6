//! Heap object references, the uniform object header, and the closed sum of
//! object payloads.

use crate::{
    class::{ClassObject, InstanceObject, MethodObject},
    closure::{ClosureObject, UpvalueObject},
    dict::DictObject,
    fiber::FiberObject,
    function::FunctionObject,
    list::ListObject,
    module::ModuleObject,
    range::RangeObject,
    string::StringObject,
    value::Value,
};

/// Untyped reference to a heap object: an index into the [`Vm`]'s object
/// arena.
///
/// Handles are cheap to copy and stay valid until the referenced object is
/// collected. Holding a handle does *not* keep the object alive; pin values
/// with [`Vm::make_handle`] for that.
///
/// [`Vm`]: crate::Vm
/// [`Vm::make_handle`]: crate::Vm::make_handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef(u32);

impl ObjRef {
    pub(crate) fn from_index(index: usize) -> Self {
        Self(u32::try_from(index).expect("object arena index overflow"))
    }

    /// The arena slot index of this reference.
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Discriminates the payload embedded in a heap object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// A class object.
    Class,
    /// A closure: function plus captured upvalues.
    Closure,
    /// A hash-table dictionary.
    Dict,
    /// A cooperatively scheduled thread of execution.
    Fiber,
    /// A compiled function.
    Function,
    /// A class instance.
    Instance,
    /// A growable value array.
    List,
    /// A method bound into a class's method dictionary.
    Method,
    /// A module: globals, names and string constants.
    Module,
    /// An integer interval.
    Range,
    /// An immutable interned string.
    String,
    /// An indirection onto a (possibly closed-over) stack slot.
    Upvalue,
}

/// The uniform header that starts every heap object.
///
/// The header is the only part of an object the collector inspects directly;
/// type-specific fields are walked through per-kind tracing. `next` threads
/// the global all-objects list, `next_kiss` threads the temporary list of
/// objects known to survive the current collection cycle.
#[derive(Debug)]
pub struct ObjectHeader {
    pub(crate) kind: ObjectKind,
    /// The class describing this object's type. Set lazily during VM
    /// bootstrap; always present afterwards except on the bootstrap cycle's
    /// own scaffolding.
    pub(crate) class: Option<ClassRef>,
    pub(crate) next: Option<ObjRef>,
    pub(crate) next_kiss: Option<ObjRef>,
    pub(crate) marked: bool,
}

impl ObjectHeader {
    /// The kind of the payload that follows this header.
    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// The class describing this object's type, if already bound.
    pub fn class(&self) -> Option<ClassRef> {
        self.class
    }
}

/// A heap object: header plus kind-specific payload.
#[derive(Debug)]
pub(crate) struct HeapObject {
    pub(crate) header: ObjectHeader,
    pub(crate) payload: Payload,
}

/// Closed sum of all object payloads.
#[derive(Debug)]
pub(crate) enum Payload {
    Class(ClassObject),
    Closure(ClosureObject),
    Dict(DictObject),
    Fiber(FiberObject),
    Function(FunctionObject),
    Instance(InstanceObject),
    List(ListObject),
    Method(MethodObject),
    Module(ModuleObject),
    Range(RangeObject),
    String(StringObject),
    Upvalue(UpvalueObject),
}

impl Payload {
    pub(crate) fn kind(&self) -> ObjectKind {
        match self {
            Payload::Class(_) => ObjectKind::Class,
            Payload::Closure(_) => ObjectKind::Closure,
            Payload::Dict(_) => ObjectKind::Dict,
            Payload::Fiber(_) => ObjectKind::Fiber,
            Payload::Function(_) => ObjectKind::Function,
            Payload::Instance(_) => ObjectKind::Instance,
            Payload::List(_) => ObjectKind::List,
            Payload::Method(_) => ObjectKind::Method,
            Payload::Module(_) => ObjectKind::Module,
            Payload::Range(_) => ObjectKind::Range,
            Payload::String(_) => ObjectKind::String,
            Payload::Upvalue(_) => ObjectKind::Upvalue,
        }
    }
}

/// Implemented by the typed reference wrappers around [`ObjRef`].
pub trait TypedRef: Copy {
    /// The object kind this reference designates.
    const KIND: ObjectKind;

    /// Wraps an untyped reference. The caller asserts the referenced object
    /// has the right kind.
    fn from_raw(obj: ObjRef) -> Self;

    /// The untyped reference.
    fn raw(self) -> ObjRef;
}

macro_rules! typed_refs {
    ($($(#[$doc:meta])* $name:ident => $kind:ident),* $(,)?) => {
        $(
            $(#[$doc])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub struct $name(pub(crate) ObjRef);

            impl TypedRef for $name {
                const KIND: ObjectKind = ObjectKind::$kind;

                fn from_raw(obj: ObjRef) -> Self {
                    Self(obj)
                }

                fn raw(self) -> ObjRef {
                    self.0
                }
            }

            impl From<$name> for ObjRef {
                fn from(reference: $name) -> ObjRef {
                    reference.0
                }
            }

            impl From<$name> for Value {
                fn from(reference: $name) -> Value {
                    Value::Object(reference.0)
                }
            }
        )*
    };
}

typed_refs! {
    /// Typed reference to a class object.
    ClassRef => Class,
    /// Typed reference to a closure object.
    ClosureRef => Closure,
    /// Typed reference to a dictionary object.
    DictRef => Dict,
    /// Typed reference to a fiber object.
    FiberRef => Fiber,
    /// Typed reference to a function object.
    FunctionRef => Function,
    /// Typed reference to an instance object.
    InstanceRef => Instance,
    /// Typed reference to a list object.
    ListRef => List,
    /// Typed reference to a method object.
    MethodRef => Method,
    /// Typed reference to a module object.
    ModuleRef => Module,
    /// Typed reference to a range object.
    RangeRef => Range,
    /// Typed reference to a string object.
    StringRef => String,
    /// Typed reference to an upvalue object.
    UpvalueRef => Upvalue,
}
