use std::cell::Cell;
use std::fmt::{self, Debug};

use bumpalo::collections::Vec;
use bumpalo::Bump;
use color_eyre::eyre::{self, eyre, Context};
use hashbrown::hash_map::DefaultHashBuilder;
use hashbrown::HashMap;

use crate::call_frame::JvmValue;
use crate::class_file::constant_pool::ConstantPool;
use crate::class_file::{
    AttributeInfo, BootstrapMethod, BootstrapMethodsAttribute, ClassAccessFlags, ClassFile,
    FieldAccessFlags, MethodAccessFlags,
};
use crate::descriptor::{parse_field_descriptor, parse_method_descriptor, FieldType};
use crate::instructions::{self, Bytecode};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitState {
    Uninitialized,
    Initializing,
    Initialized,
    Erroneous,
}

pub struct Class<'a> {
    name: &'a str,
    super_class: Option<&'a Class<'a>>,
    interfaces: Vec<'a, &'a Class<'a>>,
    access_flags: ClassAccessFlags,
    constant_pool: &'a ConstantPool<'a>,
    bootstrap_methods: Option<&'a BootstrapMethodsAttribute<'a>>,
    methods: HashMap<&'a str, Vec<'a, &'a Method<'a>>, DefaultHashBuilder, &'a Bump>,
    fields: Vec<'a, Field<'a>>,
    static_fields: HashMap<&'a str, Cell<JvmValue>, DefaultHashBuilder, &'a Bump>,
    init_state: Cell<InitState>,
}

#[derive(Debug)]
pub struct Method<'a> {
    pub name: &'a str,
    pub descriptor: &'a str,
    pub params: &'a [FieldType<'a>],
    pub return_type: Option<FieldType<'a>>,
    pub access_flags: MethodAccessFlags,
    pub body: Option<MethodBody<'a>>,
}

#[derive(Debug)]
pub struct MethodBody<'a> {
    pub locals: usize,
    pub stack_size: usize,
    pub code: Bytecode<'a>,
    pub handlers: Vec<'a, ExceptionHandler<'a>>,
}

/// An exception table entry with its range translated to instruction indexes.
#[derive(Clone, Copy, Debug)]
pub struct ExceptionHandler<'a> {
    pub start: usize,
    pub end: usize,
    pub handler: usize,
    /// `None` catches everything (`finally` blocks).
    pub catch_type: Option<&'a str>,
}

#[derive(Clone, Copy, Debug)]
pub struct Field<'a> {
    pub name: &'a str,
    pub field_type: FieldType<'a>,
    pub access_flags: FieldAccessFlags,
    /// Constant pool index of a `ConstantValue` attribute.
    pub constant_value: Option<u16>,
}

/// Declaration of a method implemented by the engine itself.
pub struct NativeMethod<'s> {
    pub name: &'s str,
    pub descriptor: &'s str,
    pub access_flags: MethodAccessFlags,
}

pub struct NativeField<'s> {
    pub name: &'s str,
    pub descriptor: &'s str,
    pub access_flags: FieldAccessFlags,
}

impl<'a> Class<'a> {
    pub fn new(
        arena: &'a Bump,
        class_file: &'a ClassFile<'a>,
        super_class: Option<&'a Class<'a>>,
        interfaces: Vec<'a, &'a Class<'a>>,
    ) -> eyre::Result<Class<'a>> {
        let constant_pool = &class_file.constant_pool;
        let name = class_file.name()?;

        let mut methods = HashMap::new_in(arena);
        for method in &class_file.methods {
            let method_name = constant_pool.utf8(method.name_index)?;
            let descriptor = constant_pool.utf8(method.descriptor_index)?;
            let parsed = parse_method_descriptor(descriptor)?;

            let body = method
                .attributes
                .iter()
                .find_map(|attr| match attr {
                    AttributeInfo::Code(code) => Some(code),
                    _ => None,
                })
                .map(|code| -> eyre::Result<MethodBody<'a>> {
                    let bytecode = instructions::decode(arena, &code.code)?;
                    let mut handlers = Vec::with_capacity_in(code.exception_table.len(), arena);
                    for entry in &code.exception_table {
                        handlers.push(ExceptionHandler {
                            start: bytecode
                                .index_of(entry.start_pc as usize)
                                .ok_or_else(|| eyre!("invalid handler start {}", entry.start_pc))?,
                            end: bytecode
                                .end_index_of(entry.end_pc as usize)
                                .ok_or_else(|| eyre!("invalid handler end {}", entry.end_pc))?,
                            handler: bytecode
                                .index_of(entry.handler_pc as usize)
                                .ok_or_else(|| eyre!("invalid handler pc {}", entry.handler_pc))?,
                            catch_type: match entry.catch_type {
                                0 => None,
                                index => Some(constant_pool.class_name(index)?),
                            },
                        });
                    }

                    Ok(MethodBody {
                        locals: code.max_locals as usize,
                        stack_size: code.max_stack as usize,
                        code: bytecode,
                        handlers,
                    })
                })
                .transpose()
                .wrap_err_with(|| eyre!("invalid code for method {method_name}{descriptor}"))?;

            methods
                .entry(method_name)
                .or_insert_with(|| Vec::new_in(arena))
                .push(&*arena.alloc(Method {
                    name: method_name,
                    descriptor,
                    params: arena.alloc_slice_copy(&parsed.params),
                    return_type: parsed.return_type,
                    access_flags: method.access_flags,
                    body,
                }));
        }

        let mut fields = Vec::with_capacity_in(class_file.fields.len(), arena);
        for field in &class_file.fields {
            let constant_value = field.attributes.iter().find_map(|attr| match attr {
                AttributeInfo::Custom(custom) if custom.info.len() == 2 => {
                    let attr_name = constant_pool.utf8(custom.attribute_name_index).ok()?;
                    (attr_name == "ConstantValue")
                        .then(|| u16::from_be_bytes([custom.info[0], custom.info[1]]))
                }
                _ => None,
            });

            fields.push(Field {
                name: constant_pool.utf8(field.name_index)?,
                field_type: parse_field_descriptor(constant_pool.utf8(field.descriptor_index)?)?
                    .field_type,
                access_flags: field.access_flags,
                constant_value,
            });
        }

        Ok(Class {
            name,
            super_class,
            interfaces,
            access_flags: class_file.access_flags,
            constant_pool,
            bootstrap_methods: class_file.bootstrap_methods(),
            methods,
            static_fields: static_cells(arena, &fields),
            fields,
            init_state: Cell::new(InitState::Uninitialized),
        })
    }

    /// Builds a class whose methods are all implemented natively by the engine.
    pub fn native(
        arena: &'a Bump,
        name: &str,
        access_flags: ClassAccessFlags,
        super_class: Option<&'a Class<'a>>,
        interfaces: Vec<'a, &'a Class<'a>>,
        native_fields: &[NativeField],
        native_methods: &[NativeMethod],
    ) -> eyre::Result<Class<'a>> {
        let mut methods = HashMap::new_in(arena);
        for native in native_methods {
            let name = &*arena.alloc_str(native.name);
            let descriptor = &*arena.alloc_str(native.descriptor);
            let parsed = parse_method_descriptor(descriptor)?;
            methods
                .entry(name)
                .or_insert_with(|| Vec::new_in(arena))
                .push(&*arena.alloc(Method {
                    name,
                    descriptor,
                    params: arena.alloc_slice_copy(&parsed.params),
                    return_type: parsed.return_type,
                    access_flags: native.access_flags | MethodAccessFlags::NATIVE,
                    body: None,
                }));
        }

        let mut fields = Vec::with_capacity_in(native_fields.len(), arena);
        for native in native_fields {
            let descriptor = &*arena.alloc_str(native.descriptor);
            fields.push(Field {
                name: arena.alloc_str(native.name),
                field_type: parse_field_descriptor(descriptor)?.field_type,
                access_flags: native.access_flags,
                constant_value: None,
            });
        }

        Ok(Class {
            name: arena.alloc_str(name),
            super_class,
            interfaces,
            access_flags,
            constant_pool: arena.alloc(ConstantPool::empty(arena)),
            bootstrap_methods: None,
            methods,
            static_fields: static_cells(arena, &fields),
            fields,
            init_state: Cell::new(InitState::Uninitialized),
        })
    }

    pub fn name(&self) -> &'a str {
        self.name
    }

    /// The name in the dotted form used by `java.lang.Class#getName`.
    pub fn java_name(&self) -> String {
        self.name.replace('/', ".")
    }

    pub fn super_class(&self) -> Option<&'a Class<'a>> {
        self.super_class
    }

    pub fn constant_pool(&self) -> &'a ConstantPool<'a> {
        self.constant_pool
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::INTERFACE)
    }

    pub fn is_abstract(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::ABSTRACT) || self.is_interface()
    }

    /// Looks up a method declared directly on this class.
    pub fn method(&self, name: &str, descriptor: &str) -> Option<&'a Method<'a>> {
        self.methods
            .get(name)?
            .iter()
            .find(|method| method.descriptor == descriptor)
            .copied()
    }

    /// All overloads named `name` declared directly on this class.
    pub fn methods_named(&self, name: &str) -> impl Iterator<Item = &'a Method<'a>> + '_ {
        self.methods
            .get(name)
            .into_iter()
            .flat_map(|methods| methods.iter().copied())
    }

    /// Looks up a method on this class, its superclasses, then its superinterfaces,
    /// returning the declaring class alongside it.
    pub fn resolve_method(
        &'a self,
        name: &str,
        descriptor: &str,
    ) -> Option<(&'a Class<'a>, &'a Method<'a>)> {
        self.ancestors()
            .find_map(|class| Some((class, class.method(name, descriptor)?)))
            .or_else(|| self.resolve_interface_method(name, descriptor))
    }

    fn resolve_interface_method(
        &'a self,
        name: &str,
        descriptor: &str,
    ) -> Option<(&'a Class<'a>, &'a Method<'a>)> {
        let mut abstract_match = None;
        for class in self.ancestors() {
            for interface in class.interfaces.iter() {
                if let Some(method) = interface.method(name, descriptor) {
                    if !method.access_flags.contains(MethodAccessFlags::ABSTRACT) {
                        return Some((interface, method));
                    }
                    abstract_match.get_or_insert((*interface, method));
                }
                if let Some(found) = interface.resolve_interface_method(name, descriptor) {
                    if !found.1.access_flags.contains(MethodAccessFlags::ABSTRACT) {
                        return Some(found);
                    }
                    abstract_match.get_or_insert(found);
                }
            }
        }
        abstract_match
    }

    /// Every interface this class implements, directly or through a superclass
    /// or another interface, each listed once.
    pub fn superinterfaces(&'a self) -> std::vec::Vec<&'a Class<'a>> {
        let mut found: std::vec::Vec<&'a Class<'a>> = std::vec::Vec::new();
        let mut pending: std::vec::Vec<&'a Class<'a>> = self
            .ancestors()
            .flat_map(|class| class.interfaces.iter().copied())
            .collect();
        pending.reverse();

        while let Some(interface) = pending.pop() {
            if found.iter().any(|seen| std::ptr::eq(*seen, interface)) {
                continue;
            }
            found.push(interface);
            pending.extend(interface.interfaces.iter().rev().copied());
        }
        found
    }

    /// Finds a static field on this class or any class or interface it inherits from.
    pub fn static_field(&'a self, name: &str) -> Option<&'a Cell<JvmValue>> {
        for class in self.ancestors() {
            if let Some(cell) = class.static_fields.get(name) {
                return Some(cell);
            }
            for interface in class.interfaces.iter() {
                if let Some(cell) = interface.static_field(name) {
                    return Some(cell);
                }
            }
        }
        None
    }

    pub fn fields(&self) -> &[Field<'a>] {
        &self.fields
    }

    /// Every non-static field an instance of this class carries, superclasses
    /// included, paired with the class that declares it.
    pub fn instance_fields(&'a self) -> impl Iterator<Item = (&'a Class<'a>, &'a Field<'a>)> + 'a {
        self.ancestors().flat_map(|class| {
            class
                .fields
                .iter()
                .filter(|field| !field.access_flags.contains(FieldAccessFlags::STATIC))
                .map(move |field| (class, field))
        })
    }

    /// The nearest class, starting from this one, that declares an instance
    /// field called `name`.
    pub fn field_owner(&'a self, name: &str) -> Option<&'a Class<'a>> {
        self.instance_fields()
            .find(|(_, field)| field.name == name)
            .map(|(owner, _)| owner)
    }

    /// This class followed by each of its superclasses.
    pub fn ancestors(&'a self) -> impl Iterator<Item = &'a Class<'a>> + 'a {
        std::iter::successors(Some(self), |class| class.super_class)
    }

    /// Whether this class is, extends or implements the class named `name`.
    pub fn is_subclass_of(&self, name: &str) -> bool {
        if self.name == name {
            return true;
        }
        if self.interfaces.iter().any(|i| i.is_subclass_of(name)) {
            return true;
        }
        self.super_class
            .is_some_and(|super_class| super_class.is_subclass_of(name))
    }

    pub fn bootstrap_method(&self, index: u16) -> eyre::Result<&'a BootstrapMethod<'a>> {
        self.bootstrap_methods
            .and_then(|attr| attr.bootstrap_methods.get(index as usize))
            .ok_or_else(|| eyre!("missing bootstrap method {index} in {}", self.name))
    }

    pub fn init_state(&self) -> InitState {
        self.init_state.get()
    }

    pub fn set_init_state(&self, state: InitState) {
        self.init_state.set(state);
    }
}

fn static_cells<'a>(
    arena: &'a Bump,
    fields: &[Field<'a>],
) -> HashMap<&'a str, Cell<JvmValue>, DefaultHashBuilder, &'a Bump> {
    let mut cells = HashMap::new_in(arena);
    for field in fields {
        if field.access_flags.contains(FieldAccessFlags::STATIC) {
            cells.insert(field.name, Cell::new(JvmValue::default_for(&field.field_type)));
        }
    }
    cells
}

impl Debug for Class<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.name)
            .field("super_class", &self.super_class.map(|c| c.name))
            .field(
                "interfaces",
                &self.interfaces.iter().map(|c| c.name).collect::<std::vec::Vec<_>>(),
            )
            .field("access_flags", &self.access_flags)
            .field(
                "methods",
                &self
                    .methods
                    .values()
                    .flatten()
                    .map(|m| format!("{}{}", m.name, m.descriptor))
                    .collect::<std::vec::Vec<_>>(),
            )
            .field("fields", &self.fields)
            .finish()
    }
}
