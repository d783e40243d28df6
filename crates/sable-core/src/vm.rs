//! The VM object store: the arena every heap object lives in, the intrusive
//! object list, the garbage-collection machinery, handles, and the core
//! class bootstrap.

use std::fmt;

use crate::{
    class::{ClassFlags, ClassObject, InstanceObject, MethodBinding, MethodObject},
    closure::{ClosureObject, UpvalueObject, UpvalueState},
    dict::DictObject,
    fiber::FiberObject,
    function::FunctionObject,
    list::ListObject,
    module::ModuleObject,
    object::{
        ClassRef, ClosureRef, DictRef, FiberRef, FunctionRef, HeapObject, InstanceRef, ListRef,
        MethodRef, ModuleRef, ObjRef, ObjectHeader, ObjectKind, Payload, RangeRef, StringRef,
        TypedRef, UpvalueRef,
    },
    range::RangeObject,
    string::{Interner, StringObject},
    value::Value,
};

/// The core classes created when a VM boots.
///
/// These form the bootstrap cycle described by the object model: every class
/// is described by `class`, which is described by itself.
#[derive(Debug, Clone, Copy)]
pub struct CoreClasses {
    /// Root of the class hierarchy; the only core class users may subclass.
    pub object: ClassRef,
    /// The class of class objects, its own class included.
    pub class: ClassRef,
    /// The class of `Null`.
    pub null: ClassRef,
    /// The class of integers.
    pub int: ClassRef,
    /// The class of strings.
    pub string: ClassRef,
    /// The class of lists.
    pub list: ClassRef,
    /// The class of dictionaries.
    pub dict: ClassRef,
    /// The class of ranges.
    pub range: ClassRef,
    /// The class of functions and closures.
    pub function: ClassRef,
    /// The class of fibers.
    pub fiber: ClassRef,
    /// The class of modules.
    pub module: ClassRef,
}

/// An embedder-held pin on a value. While the handle is live the value (and
/// everything reachable from it) survives collection. Release with
/// [`Vm::release_handle`].
#[derive(Debug)]
pub struct Handle {
    slot: usize,
}

/// The virtual machine core: owns every heap object and is the sole
/// destroyer of them.
pub struct Vm {
    slots: Vec<Option<HeapObject>>,
    /// Recycled arena slots, reused before the arena grows.
    free_slots: Vec<u32>,
    /// Head of the intrusive list threading every live object.
    first_object: Option<ObjRef>,
    /// Head of the kiss list: objects marked to survive the current cycle
    /// whose references have not been traced yet.
    kiss_head: Option<ObjRef>,
    pub(crate) interner: Interner,
    /// `None` only while `Vm::new` is still bootstrapping.
    classes: Option<CoreClasses>,
    handles: Vec<Option<Value>>,
    free_handles: Vec<usize>,
    running_fiber: Option<FiberRef>,
}

impl Vm {
    /// Creates a VM with its core classes bootstrapped.
    pub fn new() -> Self {
        let mut vm = Self {
            slots: Vec::new(),
            free_slots: Vec::new(),
            first_object: None,
            kiss_head: None,
            interner: Interner::default(),
            classes: None,
            handles: Vec::new(),
            free_handles: Vec::new(),
            running_fiber: None,
        };
        vm.bootstrap_core_classes();
        vm
    }

    /// The classes created at boot.
    pub fn core_classes(&self) -> &CoreClasses {
        self.classes.as_ref().expect("core classes are bootstrapped in Vm::new")
    }

    pub(crate) fn core_class(
        &self,
        pick: impl FnOnce(&CoreClasses) -> ClassRef,
    ) -> Option<ClassRef> {
        self.classes.as_ref().map(pick)
    }

    /// The fiber the interpreter is currently executing, if any.
    pub fn running_fiber(&self) -> Option<FiberRef> {
        self.running_fiber
    }

    /// Marks which fiber the interpreter is executing. The running fiber is
    /// a GC root.
    pub fn set_running_fiber(&mut self, fiber: Option<FiberRef>) {
        self.running_fiber = fiber;
    }

    /// Number of live heap objects.
    pub fn object_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Whether the arena slot behind `obj` currently holds an object.
    pub fn is_alive(&self, obj: ObjRef) -> bool {
        self.slots
            .get(obj.index() as usize)
            .is_some_and(Option::is_some)
    }

    // --- Object lifecycle -------------------------------------------------

    /// Allocates a heap object: primes its header and links it into the
    /// global object list. All object construction funnels through here.
    pub(crate) fn initialize_object(
        &mut self,
        class: Option<ClassRef>,
        payload: Payload,
    ) -> ObjRef {
        let object = HeapObject {
            header: ObjectHeader {
                kind: payload.kind(),
                class,
                next: self.first_object,
                next_kiss: None,
                marked: false,
            },
            payload,
        };

        let obj = match self.free_slots.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(object);
                ObjRef::from_index(index as usize)
            }
            None => {
                self.slots.push(Some(object));
                ObjRef::from_index(self.slots.len() - 1)
            }
        };
        self.first_object = Some(obj);
        obj
    }

    pub(crate) fn new_object<R: TypedRef>(
        &mut self,
        class: Option<ClassRef>,
        payload: Payload,
    ) -> R {
        debug_assert_eq!(payload.kind(), R::KIND);
        R::from_raw(self.initialize_object(class, payload))
    }

    /// Releases an object's resources and recycles its arena slot. Called
    /// only from the sweep phase; the caller has already unlinked the object
    /// from the global list.
    fn destroy_object(&mut self, obj: ObjRef) {
        if let Some(object) = &self.slots[obj.index() as usize] {
            if let Payload::String(string) = &object.payload {
                let hash = string.hash();
                self.interner.remove(hash, StringRef(obj));
            }
        }
        self.slots[obj.index() as usize] = None;
        self.free_slots.push(obj.index());
    }

    // --- Accessors --------------------------------------------------------

    fn heap_object(&self, obj: ObjRef) -> &HeapObject {
        self.slots[obj.index() as usize]
            .as_ref()
            .expect("stale object reference")
    }

    fn heap_object_mut(&mut self, obj: ObjRef) -> &mut HeapObject {
        self.slots[obj.index() as usize]
            .as_mut()
            .expect("stale object reference")
    }

    /// The uniform header of any heap object.
    pub fn header(&self, obj: ObjRef) -> &ObjectHeader {
        &self.heap_object(obj).header
    }

    /// Narrows a value to a typed object reference, checking the kind.
    pub fn downcast<R: TypedRef>(&self, value: Value) -> Option<R> {
        let obj = value.as_object()?;
        (self.header(obj).kind() == R::KIND).then(|| R::from_raw(obj))
    }

    /// The class of a value: `None` only for `Undefined`. Internal objects
    /// that carry no class report the root `Object` class.
    pub fn get_class(&self, value: Value) -> Option<ClassRef> {
        match value {
            Value::Undefined => None,
            Value::Null => Some(self.core_classes().null),
            Value::Integer(_) => Some(self.core_classes().int),
            Value::Object(obj) => Some(
                self.header(obj)
                    .class()
                    .unwrap_or(self.core_classes().object),
            ),
        }
    }

    // --- Handles ----------------------------------------------------------

    /// Pins `value` for the embedder: the value stays reachable until the
    /// handle is released.
    pub fn make_handle(&mut self, value: Value) -> Handle {
        let slot = match self.free_handles.pop() {
            Some(slot) => slot,
            None => {
                self.handles.push(None);
                self.handles.len() - 1
            }
        };
        self.handles[slot] = Some(value);
        Handle { slot }
    }

    /// Reads the value behind a handle.
    pub fn handle_value(&self, handle: &Handle) -> Value {
        self.handles[handle.slot].expect("handle slot is live while the Handle exists")
    }

    /// Releases a handle, unpinning its value.
    pub fn release_handle(&mut self, handle: Handle) {
        self.handles[handle.slot] = None;
        self.free_handles.push(handle.slot);
    }

    // --- Garbage collection ----------------------------------------------

    /// Marks an object to survive the current collection cycle and queues it
    /// on the kiss list for tracing. Idempotent.
    pub fn kiss(&mut self, obj: ObjRef) {
        let kiss_head = self.kiss_head;
        let header = &mut self.heap_object_mut(obj).header;
        if header.marked {
            return;
        }
        header.marked = true;
        header.next_kiss = kiss_head;
        self.kiss_head = Some(obj);
    }

    /// Marks the object behind a value, if it is one.
    pub fn kiss_value(&mut self, value: Value) {
        if let Value::Object(obj) = value {
            self.kiss(obj);
        }
    }

    /// Runs a full mark/sweep cycle. Roots are the embedder's handles, the
    /// core classes and the running fiber; everything else must be reachable
    /// from those to survive. When to call this is the caller's policy.
    pub fn collect(&mut self) {
        let roots: Vec<Value> = self.handles.iter().flatten().copied().collect();
        for root in roots {
            self.kiss_value(root);
        }
        let classes = *self.core_classes();
        for class in [
            classes.object,
            classes.class,
            classes.null,
            classes.int,
            classes.string,
            classes.list,
            classes.dict,
            classes.range,
            classes.function,
            classes.fiber,
            classes.module,
        ] {
            self.kiss(class.into());
        }
        if let Some(fiber) = self.running_fiber {
            self.kiss(fiber.into());
        }

        let mut scratch = Vec::new();
        while let Some(obj) = self.kiss_head {
            let next = self.heap_object(obj).header.next_kiss;
            self.heap_object_mut(obj).header.next_kiss = None;
            self.kiss_head = next;
            self.trace_object(obj, &mut scratch);
        }

        self.sweep();
    }

    /// Queues everything `obj` references. The header's class link is traced
    /// for every object; the payload walk is per-kind.
    fn trace_object(&mut self, obj: ObjRef, scratch: &mut Vec<ObjRef>) {
        scratch.clear();
        let object = self.heap_object(obj);
        if let Some(class) = object.header.class {
            scratch.push(class.into());
        }
        collect_children(self, &object.payload, scratch);
        for &child in scratch.iter() {
            self.kiss(child);
        }
    }

    /// Walks the global object list, unlinking and destroying everything
    /// left unmarked, and clearing the mark on the survivors.
    fn sweep(&mut self) {
        let mut previous: Option<ObjRef> = None;
        let mut current = self.first_object;
        while let Some(obj) = current {
            let header = &self.heap_object(obj).header;
            let next = header.next;
            if header.marked {
                self.heap_object_mut(obj).header.marked = false;
                previous = Some(obj);
            } else {
                match previous {
                    None => self.first_object = next,
                    Some(previous) => self.heap_object_mut(previous).header.next = next,
                }
                self.destroy_object(obj);
            }
            current = next;
        }
    }

    // --- Bootstrap --------------------------------------------------------

    fn bootstrap_core_classes(&mut self) {
        let sealed = ClassFlags::UNINHERITABLE | ClassFlags::SPECIAL_CREATION;
        let object = self.bootstrap_class("Object", 0, ClassFlags::empty());
        let class = self.bootstrap_class("Class", -1, sealed);
        let null = self.bootstrap_class("Null", -1, sealed);
        let int = self.bootstrap_class("Int", -1, sealed);
        let string = self.bootstrap_class("String", -1, sealed);
        let list = self.bootstrap_class("List", -1, sealed);
        let dict = self.bootstrap_class("Dict", -1, sealed);
        let range = self.bootstrap_class("Range", -1, sealed);
        let function = self.bootstrap_class("Function", -1, sealed);
        let fiber = self.bootstrap_class("Fiber", -1, sealed);
        let module = self.bootstrap_class("Module", -1, sealed);
        let classes = CoreClasses {
            object,
            class,
            null,
            int,
            string,
            list,
            dict,
            range,
            function,
            fiber,
            module,
        };
        self.classes = Some(classes);

        // Everything allocated above was created before its class existed;
        // patch the headers now that the cycle can be tied. The Class
        // object's class becomes itself.
        let mut current = self.first_object;
        while let Some(obj) = current {
            let patched = match self.header(obj).kind() {
                ObjectKind::String => classes.string,
                ObjectKind::Dict => classes.dict,
                ObjectKind::Class => classes.class,
                _ => unreachable!("unexpected object during bootstrap"),
            };
            let next = self.header(obj).next;
            self.heap_object_mut(obj).header.class = Some(patched);
            current = next;
        }

        for core in [
            class, null, int, string, list, dict, range, function, fiber, module,
        ] {
            self.class_mut(core).super_class = Some(object);
        }
    }

    fn bootstrap_class(&mut self, name: &str, field_count: i32, flags: ClassFlags) -> ClassRef {
        let name = self.string_from_bytes(name.as_bytes());
        let class = self.class_new(None, field_count, name);
        let class_object = self.class_mut(class);
        class_object.flags = flags;
        if field_count < 0 {
            class_object.super_field_count = -1;
        }
        class
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Vm {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Vm")
            .field("objects", &self.object_count())
            .field("handles", &self.handles.iter().flatten().count())
            .field("running_fiber", &self.running_fiber)
            .finish_non_exhaustive()
    }
}

/// Pushes every object `payload` references onto `scratch`.
fn collect_children(vm: &Vm, payload: &Payload, scratch: &mut Vec<ObjRef>) {
    let mut push_value = |scratch: &mut Vec<ObjRef>, value: Value| {
        if let Value::Object(obj) = value {
            scratch.push(obj);
        }
    };

    match payload {
        Payload::String(_) | Payload::Range(_) => {}
        Payload::List(list) => {
            for &element in &list.elements {
                push_value(scratch, element);
            }
        }
        Payload::Dict(dict) => {
            for entry in dict.table.live_entries() {
                push_value(scratch, entry.key);
                push_value(scratch, entry.value);
            }
        }
        Payload::Upvalue(upvalue) => match upvalue.state {
            UpvalueState::Open { fiber, .. } => scratch.push(fiber.into()),
            UpvalueState::Closed(value) => push_value(scratch, value),
        },
        Payload::Function(function) => {
            for &constant in &function.constants {
                push_value(scratch, constant);
            }
            scratch.push(function.module.into());
        }
        Payload::Closure(closure) => {
            scratch.push(closure.function.into());
            if let Some(class) = closure.class {
                scratch.push(class.into());
            }
            for &upvalue in closure.upvalues.iter() {
                scratch.push(upvalue.into());
            }
        }
        Payload::Method(method) => match method.binding {
            MethodBinding::Bound(closure) | MethodBinding::Unbound(closure) => {
                scratch.push(closure.into());
            }
            MethodBinding::Primitive(_) | MethodBinding::Foreign(_) => {}
        },
        Payload::Class(class) => {
            if let Some(superclass) = class.super_class {
                scratch.push(superclass.into());
            }
            scratch.push(class.methods.into());
            scratch.push(class.name.into());
            if let Some(module) = class.module {
                scratch.push(module.into());
            }
        }
        Payload::Instance(instance) => {
            for &field in instance.fields.iter() {
                push_value(scratch, field);
            }
        }
        Payload::Module(module) => {
            for &variable in &module.variables {
                push_value(scratch, variable);
            }
            for &name in &module.variable_names.list {
                push_value(scratch, name);
            }
            scratch.push(module.variable_names.index.into());
            for &constant in &module.strings.list {
                push_value(scratch, constant);
            }
            scratch.push(module.strings.index.into());
            if let Some(name) = module.name {
                scratch.push(name.into());
            }
            if let Some(loader) = module.loader {
                scratch.push(loader.into());
            }
        }
        Payload::Fiber(fiber) => {
            for &slot in &fiber.stack[..fiber.stack_top] {
                push_value(scratch, slot);
            }
            for frame in &fiber.frames {
                scratch.push(frame.closure.into());
            }
            let mut open = fiber.open_upvalues;
            while let Some(upvalue) = open {
                scratch.push(upvalue.into());
                open = vm.upvalue(upvalue).next;
            }
            if let Some(caller) = fiber.caller {
                scratch.push(caller.into());
            }
            push_value(scratch, fiber.error);
        }
    }
}

macro_rules! payload_accessors {
    ($($(#[$doc:meta])* ($name:ident, $name_mut:ident, $ref_ty:ty, $variant:ident, $payload_ty:ty)),* $(,)?) => {
        impl Vm {
            $(
                $(#[$doc])*
                pub fn $name(&self, reference: $ref_ty) -> &$payload_ty {
                    match &self.heap_object(reference.raw()).payload {
                        Payload::$variant(payload) => payload,
                        _ => unreachable!("typed reference kind mismatch"),
                    }
                }

                /// Mutable counterpart, for the interpreter and primitives.
                pub fn $name_mut(&mut self, reference: $ref_ty) -> &mut $payload_ty {
                    match &mut self.heap_object_mut(reference.raw()).payload {
                        Payload::$variant(payload) => payload,
                        _ => unreachable!("typed reference kind mismatch"),
                    }
                }
            )*
        }
    };
}

payload_accessors! {
    /// The payload of a class object.
    (class, class_mut, ClassRef, Class, ClassObject),
    /// The payload of a closure object.
    (closure, closure_mut, ClosureRef, Closure, ClosureObject),
    /// The payload of a dictionary object.
    (dict, dict_mut, DictRef, Dict, DictObject),
    /// The payload of a fiber object.
    (fiber, fiber_mut, FiberRef, Fiber, FiberObject),
    /// The payload of a function object.
    (function, function_mut, FunctionRef, Function, FunctionObject),
    /// The payload of an instance object.
    (instance, instance_mut, InstanceRef, Instance, InstanceObject),
    /// The payload of a list object.
    (list, list_mut, ListRef, List, ListObject),
    /// The payload of a method object.
    (method, method_mut, MethodRef, Method, MethodObject),
    /// The payload of a module object.
    (module, module_mut, ModuleRef, Module, ModuleObject),
    /// The payload of a range object.
    (range, range_mut, RangeRef, Range, RangeObject),
    /// The payload of a string object.
    (string, string_mut, StringRef, String, StringObject),
    /// The payload of an upvalue object.
    (upvalue, upvalue_mut, UpvalueRef, Upvalue, UpvalueObject),
}

impl Vm {
    pub(crate) fn string_payload(&self, obj: ObjRef) -> &StringObject {
        self.string(StringRef(obj))
    }

    pub(crate) fn range_payload(&self, obj: ObjRef) -> &RangeObject {
        self.range(RangeRef(obj))
    }
}
