//! Classes, method bindings and instances.

use std::{error, fmt};

use bitflags::bitflags;

use crate::{
    object::{ClassRef, ClosureRef, DictRef, InstanceRef, MethodRef, ModuleRef, Payload, StringRef},
    value::Value,
    vm::Vm,
};

bitflags! {
    /// Special behaviors of a class.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClassFlags: u32 {
        /// The class cannot be subclassed (used by the built-in classes).
        const UNINHERITABLE = 1 << 0;
        /// Instance allocation is delegated to a primitive; the built-in
        /// container types allocate their own representation.
        const SPECIAL_CREATION = 1 << 1;
        /// Instances carry an opaque embedder payload.
        const FOREIGN = 1 << 2;
    }
}

/// A native routine implementing a method directly against the VM.
///
/// `args[0]` is the receiver; the argument count is implicit in the method
/// signature. The return value is written into `args[0]`. Returning `false`
/// means a runtime error has been signalled in the running fiber's error
/// slot.
pub type PrimitiveFn = fn(&mut Vm, &mut [Value]) -> bool;

/// An embedder-supplied native method. The core stores and compares these
/// but never calls through them; the calling convention belongs to the
/// foreign-function bridge.
pub type ForeignFn = fn(&mut Vm, &mut [Value]) -> bool;

/// What a method dispatches to.
#[derive(Debug, Clone, Copy)]
pub enum MethodBinding {
    /// A native routine that manipulates the VM stack directly.
    Primitive(PrimitiveFn),
    /// An embedder-supplied native.
    Foreign(ForeignFn),
    /// A closure invoked with an implicit receiver.
    Bound(ClosureRef),
    /// A closure invoked as a static or free function.
    Unbound(ClosureRef),
}

/// A method installed in a class's method dictionary.
#[derive(Debug)]
pub struct MethodObject {
    /// The dispatch target.
    pub binding: MethodBinding,
}

/// A class object.
///
/// Methods are keyed by *signature string* (for example `+(_)` or
/// `name=(_)`), so overloading by arity and operator form is a plain
/// dictionary lookup. Superclass methods are copied down at inheritance
/// time; dispatch never walks the superclass chain.
#[derive(Debug)]
pub struct ClassObject {
    /// The superclass, once bound.
    pub super_class: Option<ClassRef>,
    /// Total fields contributed by ancestors. −1 for built-in classes.
    pub super_field_count: i32,
    /// Fields in an instance of this class, ancestors included. −1 for
    /// built-in classes.
    pub field_count: i32,
    /// Signature string → method object.
    pub methods: DictRef,
    /// The class name.
    pub name: StringRef,
    /// The module the class is defined in; `None` only for the bootstrap
    /// core classes.
    pub module: Option<ModuleRef>,
    /// Special-behavior flags.
    pub flags: ClassFlags,
}

/// A class instance: the class pointer lives in the object header, the
/// payload is the inline field vector.
#[derive(Debug)]
pub struct InstanceObject {
    pub(crate) fields: Box<[Value]>,
}

impl InstanceObject {
    /// The instance's fields, `class.field_count` of them.
    pub fn fields(&self) -> &[Value] {
        &self.fields
    }

    /// Mutable access to the instance's fields.
    pub fn fields_mut(&mut self) -> &mut [Value] {
        &mut self.fields
    }
}

/// Why a superclass binding was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InheritError {
    /// The superclass is flagged `UNINHERITABLE`.
    Uninheritable,
    /// The superclass is a built-in (its field count is −1).
    BuiltinSuperclass,
}

impl fmt::Display for InheritError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InheritError::Uninheritable => formatter.write_str("class cannot be inherited from"),
            InheritError::BuiltinSuperclass => {
                formatter.write_str("built-in classes cannot be subclassed")
            }
        }
    }
}

impl error::Error for InheritError {}

impl Vm {
    /// Allocates a new class with `field_count` fields of its own. The
    /// field count becomes cumulative when a superclass is bound.
    pub fn class_new(
        &mut self,
        module: Option<ModuleRef>,
        field_count: i32,
        name: StringRef,
    ) -> ClassRef {
        let methods = self.dict_new();
        let metaclass = self.core_class(|classes| classes.class);
        self.new_object(
            metaclass,
            Payload::Class(ClassObject {
                super_class: None,
                super_field_count: 0,
                field_count,
                methods,
                name,
                module,
                flags: ClassFlags::empty(),
            }),
        )
    }

    /// Binds `class` to its superclass: copies the superclass's methods into
    /// `class` (later bindings override them) and fixes up the field
    /// arithmetic so `field_count` covers the whole ancestor chain.
    pub fn bind_superclass(
        &mut self,
        class: ClassRef,
        superclass: ClassRef,
    ) -> Result<(), InheritError> {
        let (super_flags, super_field_count) = {
            let superclass = self.class(superclass);
            (superclass.flags, superclass.field_count)
        };
        if super_flags.contains(ClassFlags::UNINHERITABLE) {
            return Err(InheritError::Uninheritable);
        }
        if super_field_count < 0 {
            return Err(InheritError::BuiltinSuperclass);
        }

        let inherited: Vec<_> = {
            let methods = self.class(superclass).methods;
            self.dict(methods).table.live_entries().collect()
        };
        let child_methods = self.class(class).methods;
        for entry in inherited {
            self.dict_set(child_methods, entry.key, entry.value)
                .expect("method signatures are strings");
        }

        let class_object = self.class_mut(class);
        let own_field_count = class_object.field_count;
        class_object.super_class = Some(superclass);
        class_object.super_field_count = super_field_count;
        class_object.field_count = super_field_count + own_field_count;
        Ok(())
    }

    /// Installs a method under the signature string at `signature_index` in
    /// the owning module's string table.
    pub fn bind_method(
        &mut self,
        module: ModuleRef,
        class: ClassRef,
        signature_index: usize,
        binding: MethodBinding,
    ) -> MethodRef {
        let signature = self.module(module).strings.list[signature_index];
        let method: MethodRef = self.new_object(None, Payload::Method(MethodObject { binding }));
        let methods = self.class(class).methods;
        self.dict_set(methods, signature, Value::from(method))
            .expect("method signatures are strings");
        method
    }

    /// Resolves `signature` on `class` with a single dictionary lookup.
    pub fn lookup_method(&self, class: ClassRef, signature: StringRef) -> Option<MethodRef> {
        let methods = self.class(class).methods;
        self.downcast(self.dict_get(methods, Value::from(signature)))
    }

    /// Creates an instance of `class` with `field_count` fields initialized
    /// to `Null`. Returns `None` for classes whose construction is delegated
    /// elsewhere: `SPECIAL_CREATION` and `FOREIGN` classes, and built-ins.
    pub fn create_instance(&mut self, class: ClassRef) -> Option<Value> {
        let (flags, field_count) = {
            let class_object = self.class(class);
            (class_object.flags, class_object.field_count)
        };
        if flags.intersects(ClassFlags::SPECIAL_CREATION | ClassFlags::FOREIGN) || field_count < 0
        {
            return None;
        }

        #[allow(clippy::cast_sign_loss)]
        let fields = vec![Value::Null; field_count as usize].into_boxed_slice();
        let instance: InstanceRef =
            self.new_object(Some(class), Payload::Instance(InstanceObject { fields }));
        Some(Value::from(instance))
    }
}
