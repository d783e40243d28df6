//! Closures and the upvalue capture/close protocols.

use crate::{
    function::UpvalueDescriptor,
    object::{ClassRef, ClosureRef, FiberRef, FunctionRef, Payload, UpvalueRef},
    value::Value,
    vm::Vm,
};

/// A closure: the runtime instantiation of a function at a particular
/// lexical binding.
#[derive(Debug)]
pub struct ClosureObject {
    /// The function this closure executes.
    pub function: FunctionRef,
    /// The class the closure is bound to, used to resolve `super` calls.
    pub class: Option<ClassRef>,
    /// Captured upvalues, exactly `function.upvalue_count()` of them.
    pub(crate) upvalues: Box<[UpvalueRef]>,
}

impl ClosureObject {
    /// The captured upvalues, in descriptor order.
    pub fn upvalues(&self) -> &[UpvalueRef] {
        &self.upvalues
    }
}

/// Where an upvalue's value currently lives.
#[derive(Debug, Clone, Copy)]
pub enum UpvalueState {
    /// Still aliasing a live stack slot of `fiber`.
    Open {
        /// The fiber whose stack holds the captured variable.
        fiber: FiberRef,
        /// Absolute slot index into that fiber's value stack.
        slot: usize,
    },
    /// The captured variable went out of scope and its value was hoisted
    /// into the upvalue itself.
    Closed(Value),
}

/// An indirection object giving an inner closure access to a local of an
/// outer function, even after the outer function has returned.
#[derive(Debug)]
pub struct UpvalueObject {
    pub(crate) state: UpvalueState,
    /// Next open upvalue of the owning fiber, in descending slot order.
    /// `None` for closed upvalues and list tails.
    pub(crate) next: Option<UpvalueRef>,
}

impl UpvalueObject {
    /// The current state of the upvalue.
    pub fn state(&self) -> UpvalueState {
        self.state
    }

    /// Whether the upvalue still aliases a live stack slot.
    pub fn is_open(&self) -> bool {
        matches!(self.state, UpvalueState::Open { .. })
    }
}

impl Vm {
    /// Creates a closure over a function that captures nothing. Functions
    /// with upvalues must be instantiated with [`Vm::closure_capture`].
    pub fn closure_new(&mut self, function: FunctionRef, class: Option<ClassRef>) -> ClosureRef {
        debug_assert_eq!(
            self.function(function).upvalue_count(),
            0,
            "function with upvalues needs closure_capture"
        );
        let object_class = self.core_classes().function;
        self.new_object(
            Some(object_class),
            Payload::Closure(ClosureObject {
                function,
                class,
                upvalues: Box::default(),
            }),
        )
    }

    /// Instantiates `function` as a closure in the context of `fiber`'s
    /// current call frame, resolving each upvalue descriptor: locals of the
    /// enclosing frame are captured (deduplicated per stack slot), upvalues
    /// of the enclosing closure are shared.
    pub fn closure_capture(
        &mut self,
        fiber: FiberRef,
        function: FunctionRef,
        class: Option<ClassRef>,
    ) -> ClosureRef {
        let frame = *self
            .fiber(fiber)
            .frames()
            .last()
            .expect("closure capture requires an active call frame");
        let descriptors = self.function(function).upvalues.clone();

        let mut upvalues = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let upvalue = match descriptor {
                UpvalueDescriptor::Local { slot } => {
                    self.capture_upvalue(fiber, frame.stack_start + usize::from(slot))
                }
                UpvalueDescriptor::Outer { index } => {
                    self.closure(frame.closure).upvalues[usize::from(index)]
                }
            };
            upvalues.push(upvalue);
        }

        let object_class = self.core_classes().function;
        self.new_object(
            Some(object_class),
            Payload::Closure(ClosureObject {
                function,
                class,
                upvalues: upvalues.into_boxed_slice(),
            }),
        )
    }

    /// Finds or creates the open upvalue for an absolute stack slot of
    /// `fiber`. The fiber's open list is kept sorted by descending slot so
    /// closing a stack region is a prefix walk.
    pub fn capture_upvalue(&mut self, fiber: FiberRef, slot: usize) -> UpvalueRef {
        let mut previous: Option<UpvalueRef> = None;
        let mut current = self.fiber(fiber).open_upvalues();
        while let Some(upvalue) = current {
            let existing = self.open_upvalue_slot(upvalue);
            if existing == slot {
                return upvalue;
            }
            if existing < slot {
                break;
            }
            previous = Some(upvalue);
            current = self.upvalue(upvalue).next;
        }

        let created = self.new_object(
            None,
            Payload::Upvalue(UpvalueObject {
                state: UpvalueState::Open { fiber, slot },
                next: current,
            }),
        );
        match previous {
            None => self.fiber_mut(fiber).open_upvalues = Some(created),
            Some(previous) => self.upvalue_mut(previous).next = Some(created),
        }
        created
    }

    /// Closes every open upvalue of `fiber` whose slot is at or above
    /// `boundary`: the current stack value is hoisted into the upvalue and
    /// the upvalue is spliced off the open list.
    pub fn close_upvalues(&mut self, fiber: FiberRef, boundary: usize) {
        while let Some(head) = self.fiber(fiber).open_upvalues() {
            let slot = self.open_upvalue_slot(head);
            if slot < boundary {
                return;
            }
            let value = self.fiber_get_slot(fiber, slot);
            let upvalue = self.upvalue_mut(head);
            let next = upvalue.next.take();
            upvalue.state = UpvalueState::Closed(value);
            self.fiber_mut(fiber).open_upvalues = next;
        }
    }

    /// Reads the value behind an upvalue, following the stack indirection
    /// while it is open.
    pub fn upvalue_get(&self, upvalue: UpvalueRef) -> Value {
        match self.upvalue(upvalue).state {
            UpvalueState::Open { fiber, slot } => self.fiber_get_slot(fiber, slot),
            UpvalueState::Closed(value) => value,
        }
    }

    /// Writes the value behind an upvalue, following the stack indirection
    /// while it is open.
    pub fn upvalue_set(&mut self, upvalue: UpvalueRef, value: Value) {
        match self.upvalue(upvalue).state {
            UpvalueState::Open { fiber, slot } => self.fiber_set_slot(fiber, slot, value),
            UpvalueState::Closed(_) => self.upvalue_mut(upvalue).state = UpvalueState::Closed(value),
        }
    }

    fn open_upvalue_slot(&self, upvalue: UpvalueRef) -> usize {
        match self.upvalue(upvalue).state {
            UpvalueState::Open { slot, .. } => slot,
            UpvalueState::Closed(_) => unreachable!("closed upvalue on the open list"),
        }
    }
}
