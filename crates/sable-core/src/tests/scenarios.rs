//! End-to-end scenarios exercising several components together.

use pretty_assertions::assert_eq;

use crate::{
    fiber::FiberState,
    object::InstanceRef,
    string::FormatArg,
    testonly,
    value::{hash_integer, Value},
    vm::Vm,
};

/// A colliding insert, a removal and a lookup across the tombstone.
#[test]
fn dict_survives_collision_then_removal() {
    let mut vm = Vm::new();
    let dict = vm.dict_new();

    let a = vm.string_from_bytes(b"a");
    vm.dict_set(dict, Value::Integer(1), Value::from(a)).unwrap();

    // Pick a second key that lands on the same probe start as key 1 under
    // the current capacity.
    let capacity = vm.dict(dict).capacity();
    let mask = capacity - 1;
    let base = hash_integer(1) as usize & mask;
    let colliding = (2..)
        .find(|&candidate| hash_integer(candidate) as usize & mask == base)
        .unwrap();

    let b = vm.string_from_bytes(b"b");
    vm.dict_set(dict, Value::Integer(colliding), Value::from(b)).unwrap();

    vm.dict_remove(dict, Value::Integer(1));

    let found = vm.dict_get(dict, Value::Integer(colliding));
    assert_eq!(found, Value::from(b));
    let interned_again = vm.string_from_bytes(b"b");
    assert_eq!(found, Value::from(interned_again));
}

/// A trivial "return 7" function, run by driving the frame protocol the way
/// the dispatch loop would.
#[test]
fn fiber_runs_a_trivial_function_to_completion() {
    let mut vm = Vm::new();
    let module = testonly::test_module(&mut vm, "main");
    let function = vm.function_new(module, 2);
    vm.function_mut(function).constants.push(Value::Integer(7));
    // Opaque bytecode; the core never interprets it.
    vm.function_mut(function).code = vec![0x01, 0x00, 0x02];

    let closure = vm.closure_new(function, None);
    let fiber = vm.fiber_new(closure);
    assert_eq!(vm.fiber_state(fiber), FiberState::New);

    vm.append_call_frame(fiber, closure, 0);
    vm.set_running_fiber(Some(fiber));

    // "Execute": load constant 0, then return the top of the stack.
    let constant = vm.function(function).constants[0];
    vm.fiber_push(fiber, constant);
    let result = vm.fiber_pop(fiber);
    vm.fiber_return(fiber, result);
    vm.set_running_fiber(None);

    assert!(vm.fiber(fiber).frames().is_empty());
    assert_eq!(vm.fiber_error(fiber), Value::Null);
    assert_eq!(vm.fiber_peek(fiber), Value::Integer(7));
    assert_eq!(vm.fiber_state(fiber), FiberState::Finished);
}

#[test]
fn format_interpolates_raw_and_object_strings() {
    let mut vm = Vm::new();
    let bar = vm.string_from_bytes(b"bar");
    let formatted = vm.string_format("$/@", &[FormatArg::Raw(b"foo"), FormatArg::String(bar)]);
    assert_eq!(vm.string(formatted).as_bytes(), b"foo/bar");
}

#[test]
fn ranges_compare_structurally_but_not_across_inclusivity() {
    let mut vm = Vm::new();
    let inclusive = vm.range_new(0, 5, true);
    let same = vm.range_new(0, 5, true);
    let exclusive = vm.range_new(0, 5, false);

    assert!(vm.values_equal(Value::from(inclusive), Value::from(same)));
    assert!(!vm.values_equal(Value::from(inclusive), Value::from(exclusive)));
}

#[test]
fn substring_search_finds_offsets_or_nothing() {
    let mut vm = Vm::new();
    let haystack = vm.string_from_bytes(b"hello world");
    let world = vm.string_from_bytes(b"world");
    let missing = vm.string_from_bytes(b"xyz");

    assert_eq!(vm.string_find(haystack, world), Some(6));
    assert_eq!(vm.string_find(haystack, missing), None);
}

/// Random churn against the collector: everything reachable from a pinned
/// list must survive arbitrary allocation and collection interleavings.
#[test]
fn gc_churn_with_random_object_graphs() {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    let mut rng = StdRng::seed_from_u64(0x5ab1e);
    let mut vm = Vm::new();
    let keep = vm.list_new(0);
    let pin = vm.make_handle(Value::from(keep));

    for _ in 0..50 {
        for _ in 0..rng.gen_range(1..20) {
            let value = match rng.gen_range(0..4) {
                0 => Value::Integer(rng.gen()),
                1 => {
                    let text = format!("churn-{}", rng.gen::<u16>());
                    Value::from(vm.string_from_bytes(text.as_bytes()))
                }
                2 => Value::from(vm.list_new(rng.gen_range(0..4))),
                _ => Value::from(vm.range_new(rng.gen(), rng.gen(), rng.gen())),
            };
            if rng.gen_bool(0.5) {
                vm.list_insert(keep, 0, value);
            }
        }
        if rng.gen_bool(0.3) && !vm.list(keep).is_empty() {
            let index = rng.gen_range(0..vm.list(keep).len());
            vm.list_remove(keep, index);
        }

        vm.collect();

        for &element in vm.list(keep).elements() {
            if let Value::Object(obj) = element {
                assert!(vm.is_alive(obj));
            }
        }
    }
    vm.release_handle(pin);
}

#[test]
fn subclass_instances_cover_the_whole_field_chain() {
    let mut vm = Vm::new();
    let name_a = vm.string_from_bytes(b"A");
    let a = vm.class_new(None, 2, name_a);
    let name_b = vm.string_from_bytes(b"B");
    let b = vm.class_new(None, 1, name_b);

    vm.bind_superclass(b, a).unwrap();
    assert_eq!(vm.class(b).field_count, 3);
    assert_eq!(vm.class(b).super_field_count, 2);

    let instance = vm.create_instance(b).unwrap();
    let instance: InstanceRef = vm.downcast(instance).unwrap();
    assert_eq!(vm.instance(instance).fields().len(), 3);
    assert!(vm.instance(instance).fields().iter().all(|v| Value::is_null(*v)));
}
