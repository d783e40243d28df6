//! Modules and their string tables.

use crate::{
    object::{DictRef, FiberRef, ModuleRef, Payload, StringRef},
    value::Value,
    vm::Vm,
};

/// A table of interned strings that supports both linear indexing and fast
/// lookup: an ordered value array paired with an interning dictionary that
/// maps each string to its index.
#[derive(Debug)]
pub struct StringTable {
    pub(crate) list: Vec<Value>,
    pub(crate) index: DictRef,
}

impl StringTable {
    /// Number of entries.
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// Whether the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// The entries, in insertion order.
    pub fn entries(&self) -> &[Value] {
        &self.list
    }
}

/// A module object.
///
/// `variables` holds the module-level variable slots; `variable_names` is
/// the parallel table mapping symbol ids to names. `strings` interns the
/// string constants referenced by the module's bytecode. While a module's
/// top-level code runs, `loader` holds the fiber executing it; the
/// reference is released once loading completes.
#[derive(Debug)]
pub struct ModuleObject {
    pub(crate) variables: Vec<Value>,
    pub(crate) variable_names: StringTable,
    pub(crate) strings: StringTable,
    /// The module name.
    pub name: Option<StringRef>,
    pub(crate) loader: Option<FiberRef>,
}

impl ModuleObject {
    /// The module-level variable slots.
    pub fn variables(&self) -> &[Value] {
        &self.variables
    }

    /// The names of the module-level variables, parallel to
    /// [`ModuleObject::variables`].
    pub fn variable_names(&self) -> &StringTable {
        &self.variable_names
    }

    /// The module's string-constant table.
    pub fn strings(&self) -> &StringTable {
        &self.strings
    }

    /// The fiber running the module's top-level code, while loading.
    pub fn loader(&self) -> Option<FiberRef> {
        self.loader
    }
}

impl Vm {
    /// Creates an empty module.
    pub fn module_new(&mut self, name: Option<StringRef>) -> ModuleRef {
        let variable_index = self.dict_new();
        let string_index = self.dict_new();
        let class = self.core_classes().module;
        self.new_object(
            Some(class),
            Payload::Module(ModuleObject {
                variables: Vec::new(),
                variable_names: StringTable {
                    list: Vec::new(),
                    index: variable_index,
                },
                strings: StringTable {
                    list: Vec::new(),
                    index: string_index,
                },
                name,
                loader: None,
            }),
        )
    }

    /// Interns `string` into the module's string-constant table, returning
    /// its index (existing or fresh).
    pub fn module_ensure_string(&mut self, module: ModuleRef, string: StringRef) -> usize {
        let index = self.module(module).strings.index;
        if let Value::Integer(position) = self.dict_get(index, Value::from(string)) {
            return position_to_usize(position);
        }
        let position = self.module(module).strings.list.len();
        self.dict_set(index, Value::from(string), usize_to_position(position))
            .expect("string keys are hashable");
        self.module_mut(module).strings.list.push(Value::from(string));
        position
    }

    /// Looks up `string` in the module's string-constant table.
    pub fn module_string_index(&self, module: ModuleRef, string: StringRef) -> Option<usize> {
        match self.dict_get(self.module(module).strings.index, Value::from(string)) {
            Value::Integer(position) => Some(position_to_usize(position)),
            _ => None,
        }
    }

    /// Defines (or redefines) a module-level variable, returning its slot.
    pub fn module_define_variable(
        &mut self,
        module: ModuleRef,
        name: StringRef,
        value: Value,
    ) -> usize {
        let index = self.module(module).variable_names.index;
        if let Value::Integer(position) = self.dict_get(index, Value::from(name)) {
            let position = position_to_usize(position);
            self.module_mut(module).variables[position] = value;
            return position;
        }

        let position = self.module(module).variable_names.list.len();
        self.dict_set(index, Value::from(name), usize_to_position(position))
            .expect("string keys are hashable");
        let module_object = self.module_mut(module);
        module_object.variable_names.list.push(Value::from(name));
        module_object.variables.push(value);
        position
    }

    /// Resolves a module-level variable slot by name.
    pub fn module_variable_index(&self, module: ModuleRef, name: StringRef) -> Option<usize> {
        match self.dict_get(self.module(module).variable_names.index, Value::from(name)) {
            Value::Integer(position) => Some(position_to_usize(position)),
            _ => None,
        }
    }

    /// Reads the module-level variable in `slot`.
    pub fn module_variable(&self, module: ModuleRef, slot: usize) -> Value {
        self.module(module).variables[slot]
    }

    /// Writes the module-level variable in `slot`.
    pub fn module_set_variable(&mut self, module: ModuleRef, slot: usize, value: Value) {
        self.module_mut(module).variables[slot] = value;
    }

    /// Records the fiber running the module's top-level code.
    pub fn module_set_loader(&mut self, module: ModuleRef, fiber: FiberRef) {
        self.module_mut(module).loader = Some(fiber);
    }

    /// Releases the loader fiber once the module's top-level code has
    /// finished executing.
    pub fn module_loading_complete(&mut self, module: ModuleRef) {
        self.module_mut(module).loader = None;
    }
}

fn position_to_usize(position: i64) -> usize {
    usize::try_from(position).expect("table positions are non-negative")
}

#[allow(clippy::cast_possible_wrap)]
fn usize_to_position(position: usize) -> Value {
    Value::Integer(position as i64)
}
