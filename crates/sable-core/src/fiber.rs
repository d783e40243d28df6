//! Fibers: first-class, cooperatively scheduled threads of execution.

use crate::{
    object::{ClosureRef, FiberRef, Payload, UpvalueRef},
    value::Value,
    vm::Vm,
};

/// Initial number of value-stack slots a fiber is created with.
const INITIAL_STACK: usize = 16;

/// State for one function call on a fiber.
///
/// `ip` is a byte offset into the running function's code. The receiver
/// occupies stack slot `stack_start`, arguments follow, then locals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallFrame {
    /// Byte offset of the next instruction in the closure's bytecode.
    pub ip: usize,
    /// The closure being executed.
    pub closure: ClosureRef,
    /// Absolute index of the frame's first stack slot.
    pub stack_start: usize,
}

/// Lifecycle state of a fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberState {
    /// Created but nothing has executed yet.
    New,
    /// Currently being executed by the VM.
    Running,
    /// Has frames but is not currently running.
    Suspended,
    /// Ran to completion without error.
    Finished,
    /// The error slot is set.
    Failed,
}

/// A fiber object.
///
/// The value stack is exclusively owned by its fiber and may move when it
/// grows; everything that aliases it (open upvalues, frame bases) does so by
/// slot index, so growth never invalidates a captured location.
#[derive(Debug)]
pub struct FiberObject {
    pub(crate) stack: Vec<Value>,
    pub(crate) stack_top: usize,
    pub(crate) frames: Vec<CallFrame>,
    /// Head of the open-upvalue list, sorted by descending stack slot.
    pub(crate) open_upvalues: Option<UpvalueRef>,
    pub(crate) caller: Option<FiberRef>,
    /// `Null` while no error is pending.
    pub(crate) error: Value,
    pub(crate) started: bool,
}

impl FiberObject {
    /// The live portion of the value stack, bottom first.
    pub fn stack(&self) -> &[Value] {
        &self.stack[..self.stack_top]
    }

    /// Index one past the last live stack slot.
    pub fn stack_top(&self) -> usize {
        self.stack_top
    }

    /// Number of allocated stack slots.
    pub fn stack_capacity(&self) -> usize {
        self.stack.len()
    }

    /// The call frames, oldest first.
    pub fn frames(&self) -> &[CallFrame] {
        &self.frames
    }

    /// Head of the open-upvalue list.
    pub fn open_upvalues(&self) -> Option<UpvalueRef> {
        self.open_upvalues
    }

    /// The fiber that ran this one, if any.
    pub fn caller(&self) -> Option<FiberRef> {
        self.caller
    }

    /// The pending error, or `Null` when none.
    pub fn error(&self) -> Value {
        self.error
    }
}

impl Vm {
    /// Creates a fiber set up to run `closure`: an empty call-frame stack
    /// and a value stack preloaded with the closure as its sole receiver.
    pub fn fiber_new(&mut self, closure: ClosureRef) -> FiberRef {
        let class = self.core_classes().fiber;
        let mut stack = vec![Value::Undefined; INITIAL_STACK];
        stack[0] = Value::from(closure);
        self.new_object(
            Some(class),
            Payload::Fiber(FiberObject {
                stack,
                stack_top: 1,
                frames: Vec::new(),
                open_upvalues: None,
                caller: None,
                error: Value::Null,
                started: false,
            }),
        )
    }

    /// Pushes a call frame for `closure` with its stack base at
    /// `stack_start`, growing the value stack to fit the function's
    /// declared `max_stack`. The receiver and arguments are expected to be
    /// in place at `stack_start` already.
    pub fn append_call_frame(&mut self, fiber: FiberRef, closure: ClosureRef, stack_start: usize) {
        let max_stack = self.function(self.closure(closure).function).max_stack;
        self.ensure_stack(fiber, stack_start + max_stack);
        let fiber_object = self.fiber_mut(fiber);
        fiber_object.frames.push(CallFrame {
            ip: 0,
            closure,
            stack_start,
        });
        fiber_object.started = true;
    }

    /// Grows the fiber's value stack to at least `size` slots (doubling).
    ///
    /// Growth may move the backing storage; open upvalues and frame bases
    /// reference slots by index, so they remain valid across the move —
    /// callers rely on captured locations surviving any push.
    pub fn ensure_stack(&mut self, fiber: FiberRef, size: usize) {
        let fiber_object = self.fiber_mut(fiber);
        if fiber_object.stack.len() < size {
            let new_len = size.max(fiber_object.stack.len() * 2);
            fiber_object.stack.resize(new_len, Value::Undefined);
        }
    }

    /// Pushes a value, growing the stack if required.
    pub fn fiber_push(&mut self, fiber: FiberRef, value: Value) {
        let required = self.fiber(fiber).stack_top + 1;
        self.ensure_stack(fiber, required);
        let fiber_object = self.fiber_mut(fiber);
        fiber_object.stack[fiber_object.stack_top] = value;
        fiber_object.stack_top += 1;
    }

    /// Pops and returns the top of the value stack.
    pub fn fiber_pop(&mut self, fiber: FiberRef) -> Value {
        let fiber_object = self.fiber_mut(fiber);
        debug_assert!(fiber_object.stack_top > 0, "pop from empty fiber stack");
        fiber_object.stack_top -= 1;
        fiber_object.stack[fiber_object.stack_top]
    }

    /// The top of the value stack, without popping.
    pub fn fiber_peek(&self, fiber: FiberRef) -> Value {
        let fiber_object = self.fiber(fiber);
        debug_assert!(fiber_object.stack_top > 0, "peek at empty fiber stack");
        fiber_object.stack[fiber_object.stack_top - 1]
    }

    /// Reads an absolute stack slot. The slot must be inside the ensured
    /// stack region.
    pub fn fiber_get_slot(&self, fiber: FiberRef, slot: usize) -> Value {
        self.fiber(fiber).stack[slot]
    }

    /// Writes an absolute stack slot. The slot must be inside the ensured
    /// stack region.
    pub fn fiber_set_slot(&mut self, fiber: FiberRef, slot: usize, value: Value) {
        self.fiber_mut(fiber).stack[slot] = value;
    }

    /// Unwinds the current frame: closes upvalues over the frame's stack
    /// region, pops the frame, truncates the stack to the frame base and
    /// pushes `result` there.
    pub fn fiber_return(&mut self, fiber: FiberRef, result: Value) {
        let frame = self
            .fiber_mut(fiber)
            .frames
            .pop()
            .expect("return without a call frame");
        self.close_upvalues(fiber, frame.stack_start);
        self.fiber_mut(fiber).stack_top = frame.stack_start;
        self.fiber_push(fiber, result);
    }

    /// Computes the fiber's lifecycle state.
    pub fn fiber_state(&self, fiber: FiberRef) -> FiberState {
        let fiber_object = self.fiber(fiber);
        if !fiber_object.error.is_null() {
            FiberState::Failed
        } else if self.running_fiber() == Some(fiber) {
            FiberState::Running
        } else if !fiber_object.frames.is_empty() {
            FiberState::Suspended
        } else if fiber_object.started {
            FiberState::Finished
        } else {
            FiberState::New
        }
    }

    /// Injects an error into the fiber. Any non-`Null` value puts the fiber
    /// into the failed state; the interpreter observes the slot between
    /// instructions and unwinds toward the caller chain. Passing `Null`
    /// clears a pending error.
    pub fn fiber_set_error(&mut self, fiber: FiberRef, error: Value) {
        self.fiber_mut(fiber).error = error;
    }

    /// The fiber's pending error, or `Null`.
    pub fn fiber_error(&self, fiber: FiberRef) -> Value {
        self.fiber(fiber).error
    }

    /// Links (or unlinks) the fiber that caused this one to run.
    pub fn fiber_set_caller(&mut self, fiber: FiberRef, caller: Option<FiberRef>) {
        self.fiber_mut(fiber).caller = caller;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testonly;

    #[test]
    fn new_fiber_holds_its_closure_as_receiver() {
        let mut vm = Vm::new();
        let closure = testonly::test_closure(&mut vm, 4);
        let fiber = vm.fiber_new(closure);

        assert_eq!(vm.fiber(fiber).stack(), &[Value::from(closure)]);
        assert!(vm.fiber(fiber).frames().is_empty());
        assert_eq!(vm.fiber_state(fiber), FiberState::New);
        assert_eq!(vm.fiber_error(fiber), Value::Null);
    }

    #[test]
    fn state_transitions() {
        let mut vm = Vm::new();
        let closure = testonly::test_closure(&mut vm, 4);
        let fiber = vm.fiber_new(closure);
        assert_eq!(vm.fiber_state(fiber), FiberState::New);

        vm.append_call_frame(fiber, closure, 0);
        assert_eq!(vm.fiber_state(fiber), FiberState::Suspended);

        vm.set_running_fiber(Some(fiber));
        assert_eq!(vm.fiber_state(fiber), FiberState::Running);
        vm.set_running_fiber(None);

        vm.fiber_return(fiber, Value::Null);
        assert_eq!(vm.fiber_state(fiber), FiberState::Finished);

        vm.fiber_set_error(fiber, Value::Integer(1));
        assert_eq!(vm.fiber_state(fiber), FiberState::Failed);
        vm.fiber_set_error(fiber, Value::Null);
        assert_eq!(vm.fiber_state(fiber), FiberState::Finished);
    }

    #[test]
    fn push_pop_and_peek() {
        let mut vm = Vm::new();
        let closure = testonly::test_closure(&mut vm, 4);
        let fiber = vm.fiber_new(closure);

        vm.fiber_push(fiber, Value::Integer(1));
        vm.fiber_push(fiber, Value::Integer(2));
        assert_eq!(vm.fiber_peek(fiber), Value::Integer(2));
        assert_eq!(vm.fiber_pop(fiber), Value::Integer(2));
        assert_eq!(vm.fiber_pop(fiber), Value::Integer(1));
        assert_eq!(vm.fiber(fiber).stack_top(), 1);
    }

    #[test]
    fn stack_growth_keeps_captured_slots_valid() {
        let mut vm = Vm::new();
        let (fiber, _closure) = testonly::running_fiber(&mut vm, 8);

        vm.fiber_set_slot(fiber, 3, Value::Integer(33));
        let upvalue = vm.capture_upvalue(fiber, 3);
        let frame_base = vm.fiber(fiber).frames()[0].stack_start;
        let before = vm.fiber(fiber).stack_capacity();

        // Push enough to force at least one reallocation.
        for i in 0..(before * 4) {
            #[allow(clippy::cast_possible_wrap)]
            vm.fiber_push(fiber, Value::Integer(i as i64));
        }
        assert!(vm.fiber(fiber).stack_capacity() > before);

        assert_eq!(vm.upvalue_get(upvalue), Value::Integer(33));
        assert_eq!(vm.fiber(fiber).frames()[0].stack_start, frame_base);
        vm.fiber_set_slot(fiber, 3, Value::Integer(44));
        assert_eq!(vm.upvalue_get(upvalue), Value::Integer(44));
    }

    #[test]
    fn ensure_stack_doubles() {
        let mut vm = Vm::new();
        let closure = testonly::test_closure(&mut vm, 4);
        let fiber = vm.fiber_new(closure);
        let initial = vm.fiber(fiber).stack_capacity();

        vm.ensure_stack(fiber, initial + 1);
        assert_eq!(vm.fiber(fiber).stack_capacity(), initial * 2);

        // Already-large stacks are left alone.
        vm.ensure_stack(fiber, 4);
        assert_eq!(vm.fiber(fiber).stack_capacity(), initial * 2);
    }

    #[test]
    fn fiber_return_unwinds_to_the_frame_base() {
        let mut vm = Vm::new();
        let closure = testonly::test_closure(&mut vm, 8);
        let fiber = vm.fiber_new(closure);
        vm.append_call_frame(fiber, closure, 0);

        // Locals, one of them captured.
        vm.fiber_push(fiber, Value::Integer(5));
        vm.fiber_push(fiber, Value::Integer(6));
        let upvalue = vm.capture_upvalue(fiber, 2);

        vm.fiber_return(fiber, Value::Integer(7));

        assert!(vm.fiber(fiber).frames().is_empty());
        assert_eq!(vm.fiber(fiber).stack(), &[Value::Integer(7)]);
        // The captured local was closed before its slot died.
        assert!(!vm.upvalue(upvalue).is_open());
        assert_eq!(vm.upvalue_get(upvalue), Value::Integer(6));
        assert_eq!(vm.fiber(fiber).open_upvalues(), None);
    }

    #[test]
    fn caller_links_form_a_chain() {
        let mut vm = Vm::new();
        let closure = testonly::test_closure(&mut vm, 4);
        let outer = vm.fiber_new(closure);
        let inner = vm.fiber_new(closure);

        vm.fiber_set_caller(inner, Some(outer));
        assert_eq!(vm.fiber(inner).caller(), Some(outer));
        assert_eq!(vm.fiber(outer).caller(), None);
        vm.fiber_set_caller(inner, None);
        assert_eq!(vm.fiber(inner).caller(), None);
    }
}
