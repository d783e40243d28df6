//! Test-only fixtures for exercising the core types.

use crate::{
    object::{ClosureRef, FiberRef, ModuleRef},
    value::Value,
    vm::Vm,
};

/// Creates a module with the given name.
pub fn test_module(vm: &mut Vm, name: &str) -> ModuleRef {
    let name = vm.string_from_bytes(name.as_bytes());
    vm.module_new(Some(name))
}

/// Creates a capture-free closure over an empty function that uses
/// `max_stack` slots.
pub fn test_closure(vm: &mut Vm, max_stack: usize) -> ClosureRef {
    let module = test_module(vm, "test");
    let function = vm.function_new(module, max_stack);
    vm.closure_new(function, None)
}

/// Creates a fiber with one active frame based at slot 0 and `max_stack`
/// live stack slots, the receiver in slot 0 and `Null` locals above it.
pub fn running_fiber(vm: &mut Vm, max_stack: usize) -> (FiberRef, ClosureRef) {
    let closure = test_closure(vm, max_stack);
    let fiber = vm.fiber_new(closure);
    vm.append_call_frame(fiber, closure, 0);
    while vm.fiber(fiber).stack_top() < max_stack {
        vm.fiber_push(fiber, Value::Null);
    }
    (fiber, closure)
}
