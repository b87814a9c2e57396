use std::collections::{HashMap, HashSet};
use std::io::{self, Cursor};

use bumpalo::Bump;
use color_eyre::eyre::{self, bail, eyre, Context};
use tracing::{debug, trace};

use crate::call_frame::{CallFrame, ExecResult, JvmValue, Trap};
use crate::class::{Class, InitState, Method};
use crate::class_file::constant_pool::ConstantInfo;
use crate::class_file::{ClassAccessFlags, FieldAccessFlags, MethodAccessFlags};
use crate::descriptor::{parse_field_descriptor, BaseType, FieldType};
use crate::error;
use crate::heap::{Heap, ObjectData, MAX_ARRAY_LENGTH};
use crate::jdk::{self, BootstrapClass};
use crate::reader::ClassReader;

/// Maximum number of nested method invocations before `StackOverflowError`.
pub const MAX_CALL_DEPTH: usize = 2048;

/// Source of class file bytes for classes outside the bootstrap set.
pub trait ClassPath {
    /// Returns the contents of `<name>.class`, or `None` if there is no such entry.
    fn read_class(&mut self, name: &str) -> eyre::Result<Option<Vec<u8>>>;
}

#[derive(Debug, thiserror::Error)]
#[error("class {0} not found")]
pub struct ClassNotFound(pub String);

pub struct Vm<'a> {
    arena: &'a Bump,
    class_path: &'a mut dyn ClassPath,
    classes: HashMap<&'a str, &'a Class<'a>>,
    loading: HashSet<String>,
    strings: HashMap<&'a str, usize>,
    pub(crate) heap: Heap<'a>,
    pub(crate) stdout: &'a mut dyn io::Write,
    depth: usize,
}

impl<'a> Vm<'a> {
    pub fn new(
        arena: &'a Bump,
        class_path: &'a mut dyn ClassPath,
        stdout: &'a mut dyn io::Write,
    ) -> Vm<'a> {
        Vm {
            arena,
            class_path,
            classes: HashMap::new(),
            loading: HashSet::new(),
            strings: HashMap::new(),
            heap: Heap::new(),
            stdout,
            depth: 0,
        }
    }

    /// Loads (but does not initialize) the class with the given internal name,
    /// looking at the bootstrap classes before the class path.
    pub fn load_class(&mut self, name: &str) -> eyre::Result<&'a Class<'a>> {
        if let Some(class) = self.classes.get(name) {
            return Ok(*class);
        }

        if !self.loading.insert(name.to_owned()) {
            bail!("class circularity detected while loading {name}");
        }
        let class = self.define_class(name);
        self.loading.remove(name);
        let class = class?;

        debug!(class = class.name(), "loaded class");
        self.classes.insert(class.name(), class);

        Ok(class)
    }

    fn define_class(&mut self, name: &str) -> eyre::Result<&'a Class<'a>> {
        if name.starts_with('[') {
            return self.define_array_class(name);
        }

        if let Some(bootstrap) = jdk::bootstrap_class(name) {
            return self.define_bootstrap_class(bootstrap);
        }

        let bytes = self
            .class_path
            .read_class(name)?
            .ok_or_else(|| ClassNotFound(name.replace('/', ".")))?;

        let class_file = &*self.arena.alloc(
            ClassReader::new(self.arena, Cursor::new(bytes))
                .read_class_file()
                .wrap_err_with(|| eyre!("failed to read class file for {name}"))?,
        );

        let declared = class_file.name()?;
        if declared != name {
            bail!("class file for {name} declares class {declared}");
        }

        let super_class = match class_file.super_class {
            0 => None,
            index => {
                let super_name = class_file.constant_pool.class_name(index)?;
                Some(
                    self.load_class(super_name)
                        .wrap_err_with(|| eyre!("failed to load superclass of {name}"))?,
                )
            }
        };

        let mut interfaces =
            bumpalo::collections::Vec::with_capacity_in(class_file.interfaces.len(), self.arena);
        for &index in &class_file.interfaces {
            let interface_name = class_file.constant_pool.class_name(index)?;
            interfaces.push(
                self.load_class(interface_name)
                    .wrap_err_with(|| eyre!("failed to load interface of {name}"))?,
            );
        }

        let class = Class::new(self.arena, class_file, super_class, interfaces)
            .wrap_err_with(|| eyre!("invalid class {name}"))?;

        Ok(&*self.arena.alloc(class))
    }

    fn define_bootstrap_class(&mut self, bootstrap: BootstrapClass) -> eyre::Result<&'a Class<'a>> {
        let super_class = bootstrap
            .super_class
            .map(|name| self.load_class(name))
            .transpose()?;

        let mut interfaces =
            bumpalo::collections::Vec::with_capacity_in(bootstrap.interfaces.len(), self.arena);
        for name in bootstrap.interfaces {
            interfaces.push(self.load_class(name)?);
        }

        let class = Class::native(
            self.arena,
            bootstrap.name,
            bootstrap.access_flags,
            super_class,
            interfaces,
            &bootstrap.fields,
            &bootstrap.methods,
        )?;

        Ok(&*self.arena.alloc(class))
    }

    fn define_array_class(&mut self, name: &str) -> eyre::Result<&'a Class<'a>> {
        let array_type = parse_field_descriptor(name)?.field_type;
        if let Some(FieldType::Base(BaseType::Object(component))) = array_type.component() {
            self.load_class(component)?;
        }

        let object = self.load_class(jdk::OBJECT)?;
        let mut interfaces = bumpalo::collections::Vec::with_capacity_in(2, self.arena);
        interfaces.push(self.load_class(jdk::CLONEABLE)?);
        interfaces.push(self.load_class(jdk::SERIALIZABLE)?);

        let class = Class::native(
            self.arena,
            name,
            ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL,
            Some(object),
            interfaces,
            &[],
            &[],
        )?;

        Ok(&*self.arena.alloc(class))
    }

    /// Like [`Vm::load_class`], but a missing class becomes a guest
    /// `NoClassDefFoundError`.
    pub fn class(&mut self, name: &str) -> ExecResult<&'a Class<'a>> {
        match self.load_class(name) {
            Ok(class) => Ok(class),
            Err(report) => {
                let missing = report
                    .downcast_ref::<ClassNotFound>()
                    .map(|missing| missing.0.replace('.', "/"));
                match missing {
                    Some(missing) => Err(self.throw(jdk::NO_CLASS_DEF_FOUND, Some(missing))),
                    None => Err(report.into()),
                }
            }
        }
    }

    /// Runs static initialization for `class` and its superclasses, once.
    pub fn initialize(&mut self, class: &'a Class<'a>) -> ExecResult<()> {
        match class.init_state() {
            InitState::Initialized | InitState::Initializing => return Ok(()),
            InitState::Erroneous => {
                let message = format!("Could not initialize class {}", class.java_name());
                return Err(self.throw(jdk::NO_CLASS_DEF_FOUND, Some(message)));
            }
            InitState::Uninitialized => {}
        }

        class.set_init_state(InitState::Initializing);

        if let Some(super_class) = class.super_class() {
            if let Err(trap) = self.initialize(super_class) {
                class.set_init_state(InitState::Erroneous);
                return Err(trap);
            }
        }

        if let Err(report) = self.apply_constant_values(class) {
            class.set_init_state(InitState::Erroneous);
            return Err(report.into());
        }

        if let Some(clinit) = class.method("<clinit>", "()V") {
            debug!(class = class.name(), "initializing class");
            match self.invoke(class, clinit, &[]) {
                Ok(_) => {}
                Err(Trap::Thrown(exception)) => {
                    class.set_init_state(InitState::Erroneous);
                    if self.class_of(exception)?.is_subclass_of(jdk::ERROR) {
                        return Err(Trap::Thrown(exception));
                    }
                    let error = self.new_throwable(jdk::EXCEPTION_IN_INITIALIZER, None)?;
                    self.heap
                        .get_mut(error)?
                        .set_field(jdk::THROWABLE, "cause", JvmValue::Reference(exception))?;
                    return Err(Trap::Thrown(error));
                }
                Err(fault) => {
                    class.set_init_state(InitState::Erroneous);
                    return Err(fault);
                }
            }
        }

        class.set_init_state(InitState::Initialized);
        Ok(())
    }

    fn apply_constant_values(&mut self, class: &'a Class<'a>) -> eyre::Result<()> {
        let pool = class.constant_pool();
        for field in class.fields() {
            if !field.access_flags.contains(FieldAccessFlags::STATIC) {
                continue;
            }
            let Some(index) = field.constant_value else {
                continue;
            };
            let Some(cell) = class.static_field(field.name) else {
                continue;
            };

            cell.set(match pool.entry(index)? {
                ConstantInfo::Integer(v) => JvmValue::Int(*v),
                ConstantInfo::Long(v) => JvmValue::Long(*v),
                ConstantInfo::Float(v) => JvmValue::Float(*v),
                ConstantInfo::Double(v) => JvmValue::Double(*v),
                ConstantInfo::String(string) => {
                    JvmValue::Reference(self.intern(pool.utf8(string.string_index)?)?)
                }
                other => bail!("invalid constant value for {}: {other:?}", field.name),
            });
        }
        Ok(())
    }

    /// Invokes `method` as declared on `class`. `args` starts with the receiver
    /// for instance methods.
    pub fn invoke(
        &mut self,
        class: &'a Class<'a>,
        method: &'a Method<'a>,
        args: &[JvmValue],
    ) -> ExecResult<Option<JvmValue>> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(self.throw(jdk::STACK_OVERFLOW, None));
        }

        trace!(
            class = class.name(),
            method = method.name,
            descriptor = method.descriptor,
            depth = self.depth,
            "invoke"
        );

        if method.access_flags.contains(MethodAccessFlags::ABSTRACT) {
            let message = format!("{}.{}{}", class.java_name(), method.name, method.descriptor);
            return Err(self.throw(jdk::ABSTRACT_METHOD, Some(message)));
        }

        if method.access_flags.contains(MethodAccessFlags::NATIVE) {
            self.depth += 1;
            let result = jdk::invoke_native(self, class, method, args);
            self.depth -= 1;
            return result;
        }

        self.depth += 1;
        let result = CallFrame::new(class, method, args, self)
            .map_err(Trap::from)
            .and_then(CallFrame::execute);
        self.depth -= 1;

        result
    }

    /// Invokes an instance method through virtual dispatch on `receiver`.
    pub fn call_virtual(
        &mut self,
        receiver: usize,
        name: &str,
        descriptor: &str,
        args: &[JvmValue],
    ) -> ExecResult<Option<JvmValue>> {
        let class = self.class_of(receiver)?;
        let Some((declaring, method)) = class.resolve_method(name, descriptor) else {
            let message = format!("'{}.{name}{descriptor}'", class.java_name());
            return Err(self.throw(jdk::NO_SUCH_METHOD, Some(message)));
        };

        let mut all = Vec::with_capacity(args.len() + 1);
        all.push(JvmValue::Reference(receiver));
        all.extend_from_slice(args);

        self.invoke(declaring, method, &all)
    }

    pub fn class_of(&self, reference: usize) -> eyre::Result<&'a Class<'a>> {
        Ok(self.heap.get(reference)?.class)
    }

    /// Allocates an instance with every field set to its default value.
    pub fn new_object(&mut self, class: &'a Class<'a>) -> usize {
        let data = if class.name() == jdk::STRING || class.name() == jdk::STRING_BUILDER {
            ObjectData::Text(Vec::new())
        } else {
            ObjectData::Fields(
                class
                    .instance_fields()
                    .map(|(owner, field)| {
                        ((owner.name(), field.name), JvmValue::default_for(&field.field_type))
                    })
                    .collect(),
            )
        };

        self.heap.alloc(class, data)
    }

    pub fn new_array(&mut self, component: FieldType<'a>, length: i32) -> ExecResult<usize> {
        if length < 0 {
            return Err(self.throw(jdk::NEGATIVE_ARRAY_SIZE, Some(length.to_string())));
        }

        let length = length as usize;
        if length > MAX_ARRAY_LENGTH {
            let message = "Requested array size exceeds VM limit".to_owned();
            return Err(self.throw(jdk::OUT_OF_MEMORY, Some(message)));
        }

        let class = self.class(&format!("[{}", component.to_descriptor()))?;
        let elements = vec![JvmValue::default_for(&component); length];

        Ok(self.heap.alloc(class, ObjectData::Array { component, elements }))
    }

    pub fn new_string(&mut self, value: &str) -> eyre::Result<usize> {
        self.new_string_utf16(value.encode_utf16().collect())
    }

    pub fn new_string_utf16(&mut self, units: Vec<u16>) -> eyre::Result<usize> {
        let class = self.load_class(jdk::STRING)?;
        Ok(self.heap.alloc(class, ObjectData::Text(units)))
    }

    /// Returns the shared `String` object for a constant pool string.
    pub fn intern(&mut self, value: &'a str) -> eyre::Result<usize> {
        if let Some(reference) = self.strings.get(value) {
            return Ok(*reference);
        }

        let reference = self.new_string(value)?;
        self.strings.insert(value, reference);
        Ok(reference)
    }

    /// Contents of a `String` or `StringBuilder` object.
    pub fn string(&self, reference: usize) -> eyre::Result<String> {
        Ok(String::from_utf16_lossy(self.heap.get(reference)?.text()?))
    }

    /// `String.valueOf(Object)`: `null`, or the result of the object's `toString()`.
    pub fn stringify(&mut self, reference: usize) -> ExecResult<String> {
        if reference == 0 {
            return Ok("null".to_owned());
        }

        if self.class_of(reference)?.name() == jdk::STRING {
            return Ok(self.string(reference)?);
        }

        match self.call_virtual(reference, "toString", "()Ljava/lang/String;", &[])? {
            Some(JvmValue::Reference(0)) | None => Ok("null".to_owned()),
            Some(JvmValue::Reference(string)) => Ok(self.string(string)?),
            Some(other) => Err(eyre!("toString returned {other:?}").into()),
        }
    }

    pub fn new_throwable(&mut self, class_name: &str, message: Option<String>) -> eyre::Result<usize> {
        let class = self.load_class(class_name)?;
        let exception = self.new_object(class);

        if let Some(message) = message {
            let message = self.new_string(&message)?;
            self.heap
                .get_mut(exception)?
                .set_field(jdk::THROWABLE, "detailMessage", JvmValue::Reference(message))?;
        }

        Ok(exception)
    }

    /// Creates a guest exception and returns the trap that raises it.
    pub fn throw(&mut self, class_name: &str, message: Option<String>) -> Trap {
        trace!(exception = class_name, message = ?message, "throwing");
        match self.new_throwable(class_name, message) {
            Ok(exception) => Trap::Thrown(exception),
            Err(report) => Trap::Fault(report.wrap_err(format!("failed to create {class_name}"))),
        }
    }

    /// Renders a trap for the user: the exception's `toString()` or the engine error chain.
    pub fn describe_trap(&mut self, trap: Trap) -> String {
        match trap {
            Trap::Thrown(exception) => match self.stringify(exception) {
                Ok(text) => text,
                Err(_) => self
                    .class_of(exception)
                    .map(|class| class.java_name())
                    .unwrap_or_else(|_| "unknown exception".to_owned()),
            },
            Trap::Fault(report) => error::describe(&report),
        }
    }

    pub fn is_instance_of(&mut self, reference: usize, target: &str) -> eyre::Result<bool> {
        let class = self.class_of(reference)?;
        self.is_assignable(class, target)
    }

    /// Whether a value of class `source` can be stored in a variable of type
    /// `target`, including array covariance.
    pub fn is_assignable(&mut self, source: &'a Class<'a>, target: &str) -> eyre::Result<bool> {
        if source.is_subclass_of(target) {
            return Ok(true);
        }

        let (Some(source_component), Some(target_component)) =
            (source.name().strip_prefix('['), target.strip_prefix('['))
        else {
            return Ok(false);
        };

        match (
            reference_component(source_component),
            reference_component(target_component),
        ) {
            (Some(source_name), Some(target_name)) => {
                let source = self.load_class(source_name)?;
                self.is_assignable(source, target_name)
            }
            _ => Ok(source_component == target_component),
        }
    }
}

/// Class name of an array component descriptor, `None` for primitives.
fn reference_component(descriptor: &str) -> Option<&str> {
    if descriptor.starts_with('[') {
        Some(descriptor)
    } else {
        descriptor.strip_prefix('L')?.strip_suffix(';')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EmptyClassPath;

    impl ClassPath for EmptyClassPath {
        fn read_class(&mut self, _name: &str) -> eyre::Result<Option<Vec<u8>>> {
            Ok(None)
        }
    }

    #[test]
    fn bootstrap_classes_load_with_their_hierarchy() {
        let arena = Bump::new();
        let mut class_path = EmptyClassPath;
        let mut out = Vec::new();
        let mut vm = Vm::new(&arena, &mut class_path, &mut out);

        let class = vm.load_class("java/lang/ArithmeticException").unwrap();
        assert!(class.is_subclass_of("java/lang/RuntimeException"));
        assert!(class.is_subclass_of("java/lang/Throwable"));
        assert!(class.is_subclass_of("java/io/Serializable"));
        assert!(!class.is_subclass_of("java/lang/Error"));
    }

    #[test]
    fn missing_classes_report_class_not_found() {
        let arena = Bump::new();
        let mut class_path = EmptyClassPath;
        let mut out = Vec::new();
        let mut vm = Vm::new(&arena, &mut class_path, &mut out);

        let error = vm.load_class("demo/Missing").unwrap_err();
        let missing = error.downcast_ref::<ClassNotFound>().unwrap();
        assert_eq!(missing.0, "demo.Missing");
    }

    #[test]
    fn arrays_are_covariant_in_reference_components() {
        let arena = Bump::new();
        let mut class_path = EmptyClassPath;
        let mut out = Vec::new();
        let mut vm = Vm::new(&arena, &mut class_path, &mut out);

        let strings = vm.load_class("[Ljava/lang/String;").unwrap();
        assert!(vm.is_assignable(strings, "[Ljava/lang/Object;").unwrap());
        assert!(vm.is_assignable(strings, "java/lang/Object").unwrap());
        assert!(vm.is_assignable(strings, "java/lang/Cloneable").unwrap());

        let ints = vm.load_class("[I").unwrap();
        assert!(vm.is_assignable(ints, "[I").unwrap());
        assert!(!vm.is_assignable(ints, "[J").unwrap());
        assert!(!vm.is_assignable(ints, "[Ljava/lang/Object;").unwrap());
    }

    #[test]
    fn throwables_render_through_to_string() {
        let arena = Bump::new();
        let mut class_path = EmptyClassPath;
        let mut out = Vec::new();
        let mut vm = Vm::new(&arena, &mut class_path, &mut out);

        let trap = vm.throw(jdk::ARITHMETIC, Some("/ by zero".to_owned()));
        assert_eq!(vm.describe_trap(trap), "java.lang.ArithmeticException: / by zero");

        let trap = vm.throw(jdk::NULL_POINTER, None);
        assert_eq!(vm.describe_trap(trap), "java.lang.NullPointerException");
    }
}
