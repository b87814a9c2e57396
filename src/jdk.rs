//! The bootstrap class library: the slice of `java.lang` that guest code links
//! against, implemented natively.

use std::io::{self, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use color_eyre::eyre::{self, eyre, Context, ContextCompat};

use crate::call_frame::{ExecResult, JvmValue, Trap};
use crate::class::{Class, Method, NativeField, NativeMethod};
use crate::class_file::{ClassAccessFlags, FieldAccessFlags, MethodAccessFlags};
use crate::coerce::{self, TypeToken};
use crate::descriptor::{BaseType, FieldType};
use crate::format;
use crate::heap::{self, ObjectData};
use crate::vm::Vm;

pub const OBJECT: &str = "java/lang/Object";
pub const STRING: &str = "java/lang/String";
pub const STRING_BUILDER: &str = "java/lang/StringBuilder";
pub const NUMBER: &str = "java/lang/Number";
pub const CHARACTER: &str = "java/lang/Character";
pub const MATH: &str = "java/lang/Math";
pub const SYSTEM: &str = "java/lang/System";
pub const PRINT_STREAM: &str = "java/io/PrintStream";
pub const OBJECTS: &str = "java/util/Objects";

pub const SERIALIZABLE: &str = "java/io/Serializable";
pub const COMPARABLE: &str = "java/lang/Comparable";
pub const CHAR_SEQUENCE: &str = "java/lang/CharSequence";
pub const CLONEABLE: &str = "java/lang/Cloneable";
pub const RUNNABLE: &str = "java/lang/Runnable";
pub const AUTO_CLOSEABLE: &str = "java/lang/AutoCloseable";

pub const THROWABLE: &str = "java/lang/Throwable";
pub const EXCEPTION: &str = "java/lang/Exception";
pub const ERROR: &str = "java/lang/Error";
pub const RUNTIME_EXCEPTION: &str = "java/lang/RuntimeException";
pub const ILLEGAL_ARGUMENT: &str = "java/lang/IllegalArgumentException";
pub const ILLEGAL_STATE: &str = "java/lang/IllegalStateException";
pub const ARITHMETIC: &str = "java/lang/ArithmeticException";
pub const NULL_POINTER: &str = "java/lang/NullPointerException";
pub const INDEX_OUT_OF_BOUNDS: &str = "java/lang/IndexOutOfBoundsException";
pub const ARRAY_INDEX_OUT_OF_BOUNDS: &str = "java/lang/ArrayIndexOutOfBoundsException";
pub const STRING_INDEX_OUT_OF_BOUNDS: &str = "java/lang/StringIndexOutOfBoundsException";
pub const CLASS_CAST: &str = "java/lang/ClassCastException";
pub const NEGATIVE_ARRAY_SIZE: &str = "java/lang/NegativeArraySizeException";
pub const ARRAY_STORE: &str = "java/lang/ArrayStoreException";
pub const UNSUPPORTED_OPERATION: &str = "java/lang/UnsupportedOperationException";
pub const NUMBER_FORMAT: &str = "java/lang/NumberFormatException";
pub const CLONE_NOT_SUPPORTED: &str = "java/lang/CloneNotSupportedException";
pub const INTERRUPTED: &str = "java/lang/InterruptedException";
pub const IO_EXCEPTION: &str = "java/io/IOException";
pub const VIRTUAL_MACHINE_ERROR: &str = "java/lang/VirtualMachineError";
pub const STACK_OVERFLOW: &str = "java/lang/StackOverflowError";
pub const OUT_OF_MEMORY: &str = "java/lang/OutOfMemoryError";
pub const LINKAGE_ERROR: &str = "java/lang/LinkageError";
pub const NO_CLASS_DEF_FOUND: &str = "java/lang/NoClassDefFoundError";
pub const EXCEPTION_IN_INITIALIZER: &str = "java/lang/ExceptionInInitializerError";
pub const UNSATISFIED_LINK: &str = "java/lang/UnsatisfiedLinkError";
pub const INCOMPATIBLE_CLASS_CHANGE: &str = "java/lang/IncompatibleClassChangeError";
pub const NO_SUCH_METHOD: &str = "java/lang/NoSuchMethodError";
pub const NO_SUCH_FIELD: &str = "java/lang/NoSuchFieldError";
pub const ABSTRACT_METHOD: &str = "java/lang/AbstractMethodError";
pub const INSTANTIATION_ERROR: &str = "java/lang/InstantiationError";

/// Every bootstrap throwable with its superclass. All of them inherit their
/// constructors and accessors from `Throwable`.
const THROWABLES: &[(&str, &str)] = &[
    (EXCEPTION, THROWABLE),
    (ERROR, THROWABLE),
    (RUNTIME_EXCEPTION, EXCEPTION),
    (ILLEGAL_ARGUMENT, RUNTIME_EXCEPTION),
    (ILLEGAL_STATE, RUNTIME_EXCEPTION),
    (ARITHMETIC, RUNTIME_EXCEPTION),
    (NULL_POINTER, RUNTIME_EXCEPTION),
    (INDEX_OUT_OF_BOUNDS, RUNTIME_EXCEPTION),
    (ARRAY_INDEX_OUT_OF_BOUNDS, INDEX_OUT_OF_BOUNDS),
    (STRING_INDEX_OUT_OF_BOUNDS, INDEX_OUT_OF_BOUNDS),
    (CLASS_CAST, RUNTIME_EXCEPTION),
    (NEGATIVE_ARRAY_SIZE, RUNTIME_EXCEPTION),
    (ARRAY_STORE, RUNTIME_EXCEPTION),
    (UNSUPPORTED_OPERATION, RUNTIME_EXCEPTION),
    (NUMBER_FORMAT, ILLEGAL_ARGUMENT),
    (CLONE_NOT_SUPPORTED, EXCEPTION),
    (INTERRUPTED, EXCEPTION),
    (IO_EXCEPTION, EXCEPTION),
    (VIRTUAL_MACHINE_ERROR, ERROR),
    (STACK_OVERFLOW, VIRTUAL_MACHINE_ERROR),
    (OUT_OF_MEMORY, VIRTUAL_MACHINE_ERROR),
    (LINKAGE_ERROR, ERROR),
    (NO_CLASS_DEF_FOUND, LINKAGE_ERROR),
    (EXCEPTION_IN_INITIALIZER, LINKAGE_ERROR),
    (UNSATISFIED_LINK, LINKAGE_ERROR),
    (INCOMPATIBLE_CLASS_CHANGE, LINKAGE_ERROR),
    (NO_SUCH_METHOD, INCOMPATIBLE_CLASS_CHANGE),
    (NO_SUCH_FIELD, INCOMPATIBLE_CLASS_CHANGE),
    (ABSTRACT_METHOD, INCOMPATIBLE_CLASS_CHANGE),
    (INSTANTIATION_ERROR, INCOMPATIBLE_CLASS_CHANGE),
];

/// Declaration of a natively implemented class.
pub struct BootstrapClass {
    pub name: &'static str,
    pub super_class: Option<&'static str>,
    pub interfaces: &'static [&'static str],
    pub access_flags: ClassAccessFlags,
    pub fields: Vec<NativeField<'static>>,
    pub methods: Vec<NativeMethod<'static>>,
}

impl BootstrapClass {
    fn new(name: &'static str, super_class: Option<&'static str>) -> BootstrapClass {
        BootstrapClass {
            name,
            super_class,
            interfaces: &[],
            access_flags: ClassAccessFlags::PUBLIC,
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    fn interface(name: &'static str) -> BootstrapClass {
        BootstrapClass::new(name, Some(OBJECT)).flags(
            ClassAccessFlags::PUBLIC | ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT,
        )
    }

    fn interfaces(mut self, interfaces: &'static [&'static str]) -> BootstrapClass {
        self.interfaces = interfaces;
        self
    }

    fn flags(mut self, access_flags: ClassAccessFlags) -> BootstrapClass {
        self.access_flags = access_flags;
        self
    }

    fn field(mut self, name: &'static str, descriptor: &'static str) -> BootstrapClass {
        self.fields.push(NativeField {
            name,
            descriptor,
            access_flags: FieldAccessFlags::PRIVATE,
        });
        self
    }

    fn static_field(mut self, name: &'static str, descriptor: &'static str) -> BootstrapClass {
        self.fields.push(NativeField {
            name,
            descriptor,
            access_flags: FieldAccessFlags::PUBLIC | FieldAccessFlags::STATIC | FieldAccessFlags::FINAL,
        });
        self
    }

    fn with_method(
        mut self,
        name: &'static str,
        descriptor: &'static str,
        access_flags: MethodAccessFlags,
    ) -> BootstrapClass {
        self.methods.push(NativeMethod {
            name,
            descriptor,
            access_flags,
        });
        self
    }

    fn method(self, name: &'static str, descriptor: &'static str) -> BootstrapClass {
        self.with_method(name, descriptor, MethodAccessFlags::PUBLIC)
    }

    fn abstract_method(self, name: &'static str, descriptor: &'static str) -> BootstrapClass {
        self.with_method(
            name,
            descriptor,
            MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT,
        )
    }

    fn static_method(self, name: &'static str, descriptor: &'static str) -> BootstrapClass {
        self.with_method(
            name,
            descriptor,
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        )
    }

    fn number_methods(self) -> BootstrapClass {
        self.method("intValue", "()I")
            .method("longValue", "()J")
            .method("floatValue", "()F")
            .method("doubleValue", "()D")
            .method("shortValue", "()S")
            .method("byteValue", "()B")
    }
}

macro_rules! boxed {
    ($name:literal, $primitive:literal, $super_class:expr, $unbox:literal) => {
        BootstrapClass::new($name, Some($super_class))
            .interfaces(&[SERIALIZABLE, COMPARABLE])
            .flags(ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL)
            .field("value", $primitive)
            .static_method("valueOf", concat!("(", $primitive, ")L", $name, ";"))
            .static_method("toString", concat!("(", $primitive, ")Ljava/lang/String;"))
            .static_method("compare", concat!("(", $primitive, $primitive, ")I"))
            .method($unbox, concat!("()", $primitive))
            .method("toString", "()Ljava/lang/String;")
            .method("hashCode", "()I")
            .method("equals", "(Ljava/lang/Object;)Z")
            .method("compareTo", concat!("(L", $name, ";)I"))
            .method("compareTo", "(Ljava/lang/Object;)I")
    };
    ($name:literal, $primitive:literal, $super_class:expr, $unbox:literal, $parse:literal) => {
        boxed!($name, $primitive, $super_class, $unbox)
            .static_method("valueOf", concat!("(Ljava/lang/String;)L", $name, ";"))
            .static_method($parse, concat!("(Ljava/lang/String;)", $primitive))
    };
}

/// Looks up the bootstrap declaration for an internal class name.
pub fn bootstrap_class(name: &str) -> Option<BootstrapClass> {
    let class = match name {
        OBJECT => BootstrapClass::new(OBJECT, None)
            .method("<init>", "()V")
            .method("hashCode", "()I")
            .method("equals", "(Ljava/lang/Object;)Z")
            .method("toString", "()Ljava/lang/String;")
            .with_method(
                "clone",
                "()Ljava/lang/Object;",
                MethodAccessFlags::PROTECTED,
            ),
        SERIALIZABLE => BootstrapClass::interface(SERIALIZABLE),
        CLONEABLE => BootstrapClass::interface(CLONEABLE),
        COMPARABLE => {
            BootstrapClass::interface(COMPARABLE).abstract_method("compareTo", "(Ljava/lang/Object;)I")
        }
        CHAR_SEQUENCE => BootstrapClass::interface(CHAR_SEQUENCE)
            .abstract_method("length", "()I")
            .abstract_method("charAt", "(I)C")
            .abstract_method("toString", "()Ljava/lang/String;"),
        RUNNABLE => BootstrapClass::interface(RUNNABLE).abstract_method("run", "()V"),
        AUTO_CLOSEABLE => BootstrapClass::interface(AUTO_CLOSEABLE).abstract_method("close", "()V"),
        STRING => BootstrapClass::new(STRING, Some(OBJECT))
            .interfaces(&[SERIALIZABLE, COMPARABLE, CHAR_SEQUENCE])
            .flags(ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL)
            .method("<init>", "()V")
            .method("<init>", "(Ljava/lang/String;)V")
            .method("<init>", "([C)V")
            .method("length", "()I")
            .method("isEmpty", "()Z")
            .method("isBlank", "()Z")
            .method("charAt", "(I)C")
            .method("equals", "(Ljava/lang/Object;)Z")
            .method("equalsIgnoreCase", "(Ljava/lang/String;)Z")
            .method("hashCode", "()I")
            .method("toString", "()Ljava/lang/String;")
            .method("concat", "(Ljava/lang/String;)Ljava/lang/String;")
            .method("substring", "(I)Ljava/lang/String;")
            .method("substring", "(II)Ljava/lang/String;")
            .method("indexOf", "(I)I")
            .method("indexOf", "(Ljava/lang/String;)I")
            .method("lastIndexOf", "(I)I")
            .method("contains", "(Ljava/lang/CharSequence;)Z")
            .method("startsWith", "(Ljava/lang/String;)Z")
            .method("endsWith", "(Ljava/lang/String;)Z")
            .method("toUpperCase", "()Ljava/lang/String;")
            .method("toLowerCase", "()Ljava/lang/String;")
            .method("trim", "()Ljava/lang/String;")
            .method("repeat", "(I)Ljava/lang/String;")
            .method("compareTo", "(Ljava/lang/String;)I")
            .method("compareTo", "(Ljava/lang/Object;)I")
            .method("toCharArray", "()[C")
            .static_method("valueOf", "(Ljava/lang/Object;)Ljava/lang/String;")
            .static_method("valueOf", "(I)Ljava/lang/String;")
            .static_method("valueOf", "(J)Ljava/lang/String;")
            .static_method("valueOf", "(F)Ljava/lang/String;")
            .static_method("valueOf", "(D)Ljava/lang/String;")
            .static_method("valueOf", "(Z)Ljava/lang/String;")
            .static_method("valueOf", "(C)Ljava/lang/String;"),
        STRING_BUILDER => BootstrapClass::new(STRING_BUILDER, Some(OBJECT))
            .interfaces(&[SERIALIZABLE, CHAR_SEQUENCE])
            .flags(ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL)
            .method("<init>", "()V")
            .method("<init>", "(I)V")
            .method("<init>", "(Ljava/lang/String;)V")
            .method("<init>", "(Ljava/lang/CharSequence;)V")
            .method("append", "(Ljava/lang/String;)Ljava/lang/StringBuilder;")
            .method("append", "(Ljava/lang/Object;)Ljava/lang/StringBuilder;")
            .method("append", "(Ljava/lang/CharSequence;)Ljava/lang/StringBuilder;")
            .method("append", "([C)Ljava/lang/StringBuilder;")
            .method("append", "(I)Ljava/lang/StringBuilder;")
            .method("append", "(J)Ljava/lang/StringBuilder;")
            .method("append", "(F)Ljava/lang/StringBuilder;")
            .method("append", "(D)Ljava/lang/StringBuilder;")
            .method("append", "(Z)Ljava/lang/StringBuilder;")
            .method("append", "(C)Ljava/lang/StringBuilder;")
            .method("insert", "(ILjava/lang/String;)Ljava/lang/StringBuilder;")
            .method("deleteCharAt", "(I)Ljava/lang/StringBuilder;")
            .method("reverse", "()Ljava/lang/StringBuilder;")
            .method("setLength", "(I)V")
            .method("length", "()I")
            .method("isEmpty", "()Z")
            .method("charAt", "(I)C")
            .method("toString", "()Ljava/lang/String;"),
        NUMBER => BootstrapClass::new(NUMBER, Some(OBJECT))
            .interfaces(&[SERIALIZABLE])
            .flags(ClassAccessFlags::PUBLIC | ClassAccessFlags::ABSTRACT)
            .method("<init>", "()V")
            .abstract_method("intValue", "()I")
            .abstract_method("longValue", "()J")
            .abstract_method("floatValue", "()F")
            .abstract_method("doubleValue", "()D")
            .method("shortValue", "()S")
            .method("byteValue", "()B"),
        "java/lang/Integer" => {
            boxed!("java/lang/Integer", "I", NUMBER, "intValue", "parseInt").number_methods()
        }
        "java/lang/Long" => {
            boxed!("java/lang/Long", "J", NUMBER, "longValue", "parseLong").number_methods()
        }
        "java/lang/Short" => {
            boxed!("java/lang/Short", "S", NUMBER, "shortValue", "parseShort").number_methods()
        }
        "java/lang/Byte" => {
            boxed!("java/lang/Byte", "B", NUMBER, "byteValue", "parseByte").number_methods()
        }
        "java/lang/Float" => {
            boxed!("java/lang/Float", "F", NUMBER, "floatValue", "parseFloat").number_methods()
        }
        "java/lang/Double" => {
            boxed!("java/lang/Double", "D", NUMBER, "doubleValue", "parseDouble").number_methods()
        }
        "java/lang/Boolean" => {
            boxed!("java/lang/Boolean", "Z", OBJECT, "booleanValue", "parseBoolean")
        }
        CHARACTER => boxed!("java/lang/Character", "C", OBJECT, "charValue")
            .static_method("isDigit", "(C)Z")
            .static_method("isLetter", "(C)Z")
            .static_method("isLetterOrDigit", "(C)Z")
            .static_method("isWhitespace", "(C)Z")
            .static_method("isUpperCase", "(C)Z")
            .static_method("isLowerCase", "(C)Z")
            .static_method("toUpperCase", "(C)C")
            .static_method("toLowerCase", "(C)C"),
        MATH => BootstrapClass::new(MATH, Some(OBJECT))
            .flags(ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL)
            .static_method("abs", "(I)I")
            .static_method("abs", "(J)J")
            .static_method("abs", "(F)F")
            .static_method("abs", "(D)D")
            .static_method("max", "(II)I")
            .static_method("max", "(JJ)J")
            .static_method("max", "(FF)F")
            .static_method("max", "(DD)D")
            .static_method("min", "(II)I")
            .static_method("min", "(JJ)J")
            .static_method("min", "(FF)F")
            .static_method("min", "(DD)D")
            .static_method("pow", "(DD)D")
            .static_method("sqrt", "(D)D")
            .static_method("cbrt", "(D)D")
            .static_method("floor", "(D)D")
            .static_method("ceil", "(D)D")
            .static_method("round", "(D)J")
            .static_method("round", "(F)I")
            .static_method("exp", "(D)D")
            .static_method("log", "(D)D")
            .static_method("log10", "(D)D")
            .static_method("sin", "(D)D")
            .static_method("cos", "(D)D")
            .static_method("tan", "(D)D")
            .static_method("hypot", "(DD)D")
            .static_method("floorDiv", "(II)I")
            .static_method("floorMod", "(II)I")
            .static_method("addExact", "(II)I")
            .static_method("addExact", "(JJ)J")
            .static_method("subtractExact", "(II)I")
            .static_method("subtractExact", "(JJ)J")
            .static_method("multiplyExact", "(II)I")
            .static_method("multiplyExact", "(JJ)J"),
        SYSTEM => BootstrapClass::new(SYSTEM, Some(OBJECT))
            .flags(ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL)
            .static_field("out", "Ljava/io/PrintStream;")
            .static_field("err", "Ljava/io/PrintStream;")
            .static_method("<clinit>", "()V")
            .static_method("currentTimeMillis", "()J")
            .static_method("nanoTime", "()J")
            .static_method("arraycopy", "(Ljava/lang/Object;ILjava/lang/Object;II)V")
            .static_method("identityHashCode", "(Ljava/lang/Object;)I")
            .static_method("lineSeparator", "()Ljava/lang/String;"),
        PRINT_STREAM => BootstrapClass::new(PRINT_STREAM, Some(OBJECT))
            .interfaces(&[AUTO_CLOSEABLE])
            .field("fd", "I")
            .method("println", "()V")
            .method("println", "(Ljava/lang/String;)V")
            .method("println", "(Ljava/lang/Object;)V")
            .method("println", "([C)V")
            .method("println", "(I)V")
            .method("println", "(J)V")
            .method("println", "(F)V")
            .method("println", "(D)V")
            .method("println", "(Z)V")
            .method("println", "(C)V")
            .method("print", "(Ljava/lang/String;)V")
            .method("print", "(Ljava/lang/Object;)V")
            .method("print", "([C)V")
            .method("print", "(I)V")
            .method("print", "(J)V")
            .method("print", "(F)V")
            .method("print", "(D)V")
            .method("print", "(Z)V")
            .method("print", "(C)V")
            .method("flush", "()V")
            .method("close", "()V"),
        OBJECTS => BootstrapClass::new(OBJECTS, Some(OBJECT))
            .flags(ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL)
            .static_method("requireNonNull", "(Ljava/lang/Object;)Ljava/lang/Object;")
            .static_method(
                "requireNonNull",
                "(Ljava/lang/Object;Ljava/lang/String;)Ljava/lang/Object;",
            )
            .static_method("equals", "(Ljava/lang/Object;Ljava/lang/Object;)Z")
            .static_method("hashCode", "(Ljava/lang/Object;)I")
            .static_method("toString", "(Ljava/lang/Object;)Ljava/lang/String;")
            .static_method("isNull", "(Ljava/lang/Object;)Z")
            .static_method("nonNull", "(Ljava/lang/Object;)Z"),
        THROWABLE => BootstrapClass::new(THROWABLE, Some(OBJECT))
            .interfaces(&[SERIALIZABLE])
            .field("detailMessage", "Ljava/lang/String;")
            .field("cause", "Ljava/lang/Throwable;")
            .method("<init>", "()V")
            .method("<init>", "(Ljava/lang/String;)V")
            .method("<init>", "(Ljava/lang/String;Ljava/lang/Throwable;)V")
            .method("<init>", "(Ljava/lang/Throwable;)V")
            .method("getMessage", "()Ljava/lang/String;")
            .method("getLocalizedMessage", "()Ljava/lang/String;")
            .method("getCause", "()Ljava/lang/Throwable;")
            .method("initCause", "(Ljava/lang/Throwable;)Ljava/lang/Throwable;")
            .method("fillInStackTrace", "()Ljava/lang/Throwable;")
            .method("addSuppressed", "(Ljava/lang/Throwable;)V")
            .method("printStackTrace", "()V")
            .method("toString", "()Ljava/lang/String;"),
        name => {
            let &(name, super_class) = THROWABLES.iter().find(|(n, _)| *n == name)?;
            BootstrapClass::new(name, Some(super_class))
        }
    };

    Some(class)
}

type NativeResult = ExecResult<Option<JvmValue>>;

/// Runs a method declared native on `class`.
pub fn invoke_native<'a>(
    vm: &mut Vm<'a>,
    class: &'a Class<'a>,
    method: &'a Method<'a>,
    args: &[JvmValue],
) -> NativeResult {
    match class.name() {
        OBJECT => object_native(vm, method, args),
        STRING => string_native(vm, method, args),
        STRING_BUILDER => builder_native(vm, method, args),
        THROWABLE => throwable_native(vm, method, args),
        MATH => math_native(vm, method, args),
        SYSTEM => system_native(vm, class, method, args),
        PRINT_STREAM => print_stream_native(vm, method, args),
        OBJECTS => objects_native(vm, method, args),
        CHARACTER => character_native(vm, class, method, args),
        NUMBER => boxed_native(vm, class, method, args, BaseType::Int),
        name => match box_primitive(name) {
            Some(primitive) => boxed_native(vm, class, method, args, primitive),
            None => Err(vm.throw(
                UNSATISFIED_LINK,
                Some(format!("'{}.{}{}'", class.java_name(), method.name, method.descriptor)),
            )),
        },
    }
}

fn not_implemented(method: &Method) -> Trap {
    Trap::Fault(eyre!(
        "native method {}{} is not implemented",
        method.name,
        method.descriptor
    ))
}

fn arg(args: &[JvmValue], index: usize) -> eyre::Result<JvmValue> {
    args.get(index)
        .copied()
        .wrap_err_with(|| eyre!("missing native argument {index}"))
}

fn int_arg(args: &[JvmValue], index: usize) -> eyre::Result<i32> {
    arg(args, index)?.as_int()
}

fn long_arg(args: &[JvmValue], index: usize) -> eyre::Result<i64> {
    arg(args, index)?.as_long()
}

fn float_arg(args: &[JvmValue], index: usize) -> eyre::Result<f32> {
    arg(args, index)?.as_float()
}

fn double_arg(args: &[JvmValue], index: usize) -> eyre::Result<f64> {
    arg(args, index)?.as_double()
}

fn reference_arg(args: &[JvmValue], index: usize) -> eyre::Result<usize> {
    arg(args, index)?.as_reference()
}

fn non_null(vm: &mut Vm, reference: usize) -> ExecResult<usize> {
    if reference == 0 {
        Err(vm.throw(NULL_POINTER, None))
    } else {
        Ok(reference)
    }
}

fn string_result(vm: &mut Vm, value: &str) -> NativeResult {
    Ok(Some(JvmValue::Reference(vm.new_string(value)?)))
}

fn utf16_result(vm: &mut Vm, units: Vec<u16>) -> NativeResult {
    Ok(Some(JvmValue::Reference(vm.new_string_utf16(units)?)))
}

fn bool_result(value: bool) -> NativeResult {
    Ok(Some(JvmValue::Int(value as i32)))
}

fn int_result(value: i32) -> NativeResult {
    Ok(Some(JvmValue::Int(value)))
}

fn text(vm: &Vm, reference: usize) -> eyre::Result<Vec<u16>> {
    Ok(vm.heap.get(reference)?.text()?.to_vec())
}

/// Contents of a `String`, `StringBuilder` or other `CharSequence`.
fn char_sequence(vm: &mut Vm, reference: usize) -> ExecResult<Vec<u16>> {
    let reference = non_null(vm, reference)?;
    match &vm.heap.get(reference)?.data {
        ObjectData::Text(units) => Ok(units.clone()),
        _ => Ok(vm.stringify(reference)?.encode_utf16().collect()),
    }
}

fn char_array(vm: &Vm, reference: usize) -> eyre::Result<Vec<u16>> {
    match &vm.heap.get(reference)?.data {
        ObjectData::Array { elements, .. } => elements
            .iter()
            .map(|element| Ok(element.as_int()? as u16))
            .collect(),
        _ => Err(eyre!("expected a char array")),
    }
}

fn string_index_out_of_bounds(vm: &mut Vm, message: String) -> Trap {
    vm.throw(STRING_INDEX_OUT_OF_BOUNDS, Some(message))
}

fn object_native<'a>(vm: &mut Vm<'a>, method: &Method, args: &[JvmValue]) -> NativeResult {
    let this = reference_arg(args, 0)?;
    match (method.name, method.descriptor) {
        ("<init>", "()V") => Ok(None),
        ("hashCode", "()I") => int_result(heap::identity_hash(this)),
        ("equals", "(Ljava/lang/Object;)Z") => bool_result(this == reference_arg(args, 1)?),
        ("toString", "()Ljava/lang/String;") => {
            let hash = vm
                .call_virtual(this, "hashCode", "()I", &[])?
                .wrap_err("hashCode returned no value")?
                .as_int()?;
            let name = vm.class_of(this)?.java_name();
            string_result(vm, &format!("{name}@{:x}", hash as u32))
        }
        ("clone", "()Ljava/lang/Object;") => {
            let object = vm.heap.get(this)?;
            let class = object.class;
            let cloneable = matches!(object.data, ObjectData::Array { .. })
                || class.is_subclass_of(CLONEABLE);
            if !cloneable {
                return Err(vm.throw(CLONE_NOT_SUPPORTED, Some(class.java_name())));
            }
            let data = vm.heap.get(this)?.data.clone();
            Ok(Some(JvmValue::Reference(vm.heap.alloc(class, data))))
        }
        _ => Err(not_implemented(method)),
    }
}

fn string_native<'a>(vm: &mut Vm<'a>, method: &'a Method<'a>, args: &[JvmValue]) -> NativeResult {
    if method.access_flags.contains(MethodAccessFlags::STATIC) {
        return match (method.name, method.params) {
            ("valueOf", [param]) => {
                let text = format::java_text(vm, arg(args, 0)?, param)?;
                string_result(vm, &text)
            }
            _ => Err(not_implemented(method)),
        };
    }

    let this = reference_arg(args, 0)?;
    let units = text(vm, this)?;

    match (method.name, method.descriptor) {
        ("<init>", "()V") => Ok(None),
        ("<init>", "(Ljava/lang/String;)V") => {
            let source = non_null(vm, reference_arg(args, 1)?)?;
            let copied = text(vm, source)?;
            *vm.heap.get_mut(this)?.text_mut()? = copied;
            Ok(None)
        }
        ("<init>", "([C)V") => {
            let source = non_null(vm, reference_arg(args, 1)?)?;
            let copied = char_array(vm, source)?;
            *vm.heap.get_mut(this)?.text_mut()? = copied;
            Ok(None)
        }
        ("length", "()I") => int_result(units.len() as i32),
        ("isEmpty", "()Z") => bool_result(units.is_empty()),
        ("isBlank", "()Z") => bool_result(
            String::from_utf16_lossy(&units)
                .chars()
                .all(char::is_whitespace),
        ),
        ("charAt", "(I)C") => {
            let index = int_arg(args, 1)?;
            match usize::try_from(index).ok().and_then(|i| units.get(i)) {
                Some(unit) => int_result(*unit as i32),
                None => Err(string_index_out_of_bounds(
                    vm,
                    format!("Index {index} out of bounds for length {}", units.len()),
                )),
            }
        }
        ("equals", "(Ljava/lang/Object;)Z") => {
            let other = reference_arg(args, 1)?;
            let equal = other != 0
                && vm.class_of(other)?.name() == STRING
                && text(vm, other)? == units;
            bool_result(equal)
        }
        ("equalsIgnoreCase", "(Ljava/lang/String;)Z") => {
            let other = reference_arg(args, 1)?;
            let equal = other != 0
                && String::from_utf16_lossy(&units).to_lowercase()
                    == vm.string(other)?.to_lowercase();
            bool_result(equal)
        }
        ("hashCode", "()I") => int_result(
            units
                .iter()
                .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(*unit as i32)),
        ),
        ("toString", "()Ljava/lang/String;") => Ok(Some(JvmValue::Reference(this))),
        ("concat", "(Ljava/lang/String;)Ljava/lang/String;") => {
            let other = non_null(vm, reference_arg(args, 1)?)?;
            let mut joined = units;
            joined.extend(text(vm, other)?);
            utf16_result(vm, joined)
        }
        ("substring", "(I)Ljava/lang/String;") | ("substring", "(II)Ljava/lang/String;") => {
            let begin = int_arg(args, 1)?;
            let end = match method.params.len() {
                2 => int_arg(args, 2)?,
                _ => units.len() as i32,
            };
            if begin < 0 || end > units.len() as i32 || begin > end {
                return Err(string_index_out_of_bounds(
                    vm,
                    format!("begin {begin}, end {end}, length {}", units.len()),
                ));
            }
            utf16_result(vm, units[begin as usize..end as usize].to_vec())
        }
        ("indexOf", "(I)I") => {
            let target = int_arg(args, 1)?;
            let found = units.iter().position(|unit| *unit as i32 == target);
            int_result(found.map_or(-1, |i| i as i32))
        }
        ("lastIndexOf", "(I)I") => {
            let target = int_arg(args, 1)?;
            let found = units.iter().rposition(|unit| *unit as i32 == target);
            int_result(found.map_or(-1, |i| i as i32))
        }
        ("indexOf", "(Ljava/lang/String;)I") => {
            let needle = char_sequence(vm, reference_arg(args, 1)?)?;
            int_result(find(&units, &needle).map_or(-1, |i| i as i32))
        }
        ("contains", "(Ljava/lang/CharSequence;)Z") => {
            let needle = char_sequence(vm, reference_arg(args, 1)?)?;
            bool_result(find(&units, &needle).is_some())
        }
        ("startsWith", "(Ljava/lang/String;)Z") => {
            let prefix = char_sequence(vm, reference_arg(args, 1)?)?;
            bool_result(units.starts_with(&prefix))
        }
        ("endsWith", "(Ljava/lang/String;)Z") => {
            let suffix = char_sequence(vm, reference_arg(args, 1)?)?;
            bool_result(units.ends_with(&suffix))
        }
        ("toUpperCase", "()Ljava/lang/String;") => {
            string_result(vm, &String::from_utf16_lossy(&units).to_uppercase())
        }
        ("toLowerCase", "()Ljava/lang/String;") => {
            string_result(vm, &String::from_utf16_lossy(&units).to_lowercase())
        }
        ("trim", "()Ljava/lang/String;") => {
            let start = units.iter().position(|unit| *unit > 0x20);
            let end = units.iter().rposition(|unit| *unit > 0x20);
            match (start, end) {
                (Some(0), Some(end)) if end + 1 == units.len() => {
                    Ok(Some(JvmValue::Reference(this)))
                }
                (Some(start), Some(end)) => utf16_result(vm, units[start..=end].to_vec()),
                _ => string_result(vm, ""),
            }
        }
        ("repeat", "(I)Ljava/lang/String;") => {
            let count = int_arg(args, 1)?;
            if count < 0 {
                return Err(vm.throw(
                    ILLEGAL_ARGUMENT,
                    Some(format!("count is negative: {count}")),
                ));
            }
            utf16_result(vm, units.repeat(count as usize))
        }
        ("compareTo", _) => {
            let other = non_null(vm, reference_arg(args, 1)?)?;
            let other = text(vm, other)?;
            let difference = units
                .iter()
                .zip(other.iter())
                .find(|(a, b)| a != b)
                .map(|(a, b)| *a as i32 - *b as i32)
                .unwrap_or(units.len() as i32 - other.len() as i32);
            int_result(difference)
        }
        ("toCharArray", "()[C") => {
            let array = vm.new_array(FieldType::Base(BaseType::Char), units.len() as i32)?;
            if let ObjectData::Array { elements, .. } = &mut vm.heap.get_mut(array)?.data {
                for (element, unit) in elements.iter_mut().zip(&units) {
                    *element = JvmValue::Int(*unit as i32);
                }
            }
            Ok(Some(JvmValue::Reference(array)))
        }
        _ => Err(not_implemented(method)),
    }
}

fn find(haystack: &[u16], needle: &[u16]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn builder_native<'a>(vm: &mut Vm<'a>, method: &'a Method<'a>, args: &[JvmValue]) -> NativeResult {
    let this = reference_arg(args, 0)?;

    match (method.name, method.params) {
        ("<init>", []) => Ok(None),
        ("<init>", [FieldType::Base(BaseType::Int)]) => {
            let capacity = int_arg(args, 1)?;
            if capacity < 0 {
                return Err(vm.throw(NEGATIVE_ARRAY_SIZE, Some(capacity.to_string())));
            }
            Ok(None)
        }
        ("<init>", [_]) => {
            let initial = char_sequence(vm, reference_arg(args, 1)?)?;
            *vm.heap.get_mut(this)?.text_mut()? = initial;
            Ok(None)
        }
        ("append", [param]) => {
            let value = arg(args, 1)?;
            let appended: Vec<u16> = match param {
                FieldType::Array(1, BaseType::Char) => {
                    let array = non_null(vm, value.as_reference()?)?;
                    char_array(vm, array)?
                }
                _ => format::java_text(vm, value, param)?.encode_utf16().collect(),
            };
            vm.heap.get_mut(this)?.text_mut()?.extend(appended);
            Ok(Some(JvmValue::Reference(this)))
        }
        ("insert", [_, _]) => {
            let offset = int_arg(args, 1)?;
            let inserted: Vec<u16> = vm.stringify(reference_arg(args, 2)?)?.encode_utf16().collect();
            let length = text(vm, this)?.len();
            let at = match usize::try_from(offset) {
                Ok(at) if at <= length => at,
                _ => {
                    return Err(string_index_out_of_bounds(
                        vm,
                        format!("offset {offset}, length {length}"),
                    ))
                }
            };
            let units = vm.heap.get_mut(this)?.text_mut()?;
            units.splice(at..at, inserted);
            Ok(Some(JvmValue::Reference(this)))
        }
        ("deleteCharAt", [_]) => {
            let index = int_arg(args, 1)?;
            let length = text(vm, this)?.len();
            match usize::try_from(index) {
                Ok(at) if at < length => {
                    vm.heap.get_mut(this)?.text_mut()?.remove(at);
                    Ok(Some(JvmValue::Reference(this)))
                }
                _ => Err(string_index_out_of_bounds(
                    vm,
                    format!("index {index},length {length}"),
                )),
            }
        }
        ("reverse", []) => {
            let reversed: String = String::from_utf16_lossy(&text(vm, this)?).chars().rev().collect();
            *vm.heap.get_mut(this)?.text_mut()? = reversed.encode_utf16().collect();
            Ok(Some(JvmValue::Reference(this)))
        }
        ("setLength", [_]) => {
            let length = int_arg(args, 1)?;
            if length < 0 {
                return Err(string_index_out_of_bounds(
                    vm,
                    format!("String index out of range: {length}"),
                ));
            }
            vm.heap
                .get_mut(this)?
                .text_mut()?
                .resize(length as usize, 0);
            Ok(None)
        }
        ("length", []) => int_result(text(vm, this)?.len() as i32),
        ("isEmpty", []) => bool_result(text(vm, this)?.is_empty()),
        ("charAt", [_]) => {
            let index = int_arg(args, 1)?;
            let units = text(vm, this)?;
            match usize::try_from(index).ok().and_then(|i| units.get(i)) {
                Some(unit) => int_result(*unit as i32),
                None => Err(string_index_out_of_bounds(
                    vm,
                    format!("index {index},length {}", units.len()),
                )),
            }
        }
        ("toString", []) => {
            let units = text(vm, this)?;
            utf16_result(vm, units)
        }
        _ => Err(not_implemented(method)),
    }
}

fn throwable_native<'a>(vm: &mut Vm<'a>, method: &Method, args: &[JvmValue]) -> NativeResult {
    let this = reference_arg(args, 0)?;

    match (method.name, method.descriptor) {
        ("<init>", "()V") => Ok(None),
        ("<init>", "(Ljava/lang/String;)V") => {
            let message = arg(args, 1)?;
            vm.heap.get_mut(this)?.set_field(THROWABLE, "detailMessage", message)?;
            Ok(None)
        }
        ("<init>", "(Ljava/lang/String;Ljava/lang/Throwable;)V") => {
            let (message, cause) = (arg(args, 1)?, arg(args, 2)?);
            let object = vm.heap.get_mut(this)?;
            object.set_field(THROWABLE, "detailMessage", message)?;
            object.set_field(THROWABLE, "cause", cause)?;
            Ok(None)
        }
        ("<init>", "(Ljava/lang/Throwable;)V") => {
            let cause = reference_arg(args, 1)?;
            let message = match cause {
                0 => JvmValue::NULL,
                cause => {
                    let text = vm.stringify(cause)?;
                    JvmValue::Reference(vm.new_string(&text)?)
                }
            };
            let object = vm.heap.get_mut(this)?;
            object.set_field(THROWABLE, "detailMessage", message)?;
            object.set_field(THROWABLE, "cause", JvmValue::Reference(cause))?;
            Ok(None)
        }
        ("getMessage", _) => Ok(Some(vm.heap.get(this)?.field(THROWABLE, "detailMessage")?)),
        ("getLocalizedMessage", _) => {
            vm.call_virtual(this, "getMessage", "()Ljava/lang/String;", &[])
        }
        ("getCause", _) => Ok(Some(vm.heap.get(this)?.field(THROWABLE, "cause")?)),
        ("initCause", _) => {
            let cause = arg(args, 1)?;
            vm.heap.get_mut(this)?.set_field(THROWABLE, "cause", cause)?;
            Ok(Some(JvmValue::Reference(this)))
        }
        ("fillInStackTrace", _) => Ok(Some(JvmValue::Reference(this))),
        ("addSuppressed", _) => Ok(None),
        ("printStackTrace", _) => {
            let description = vm.stringify(this)?;
            writeln!(io::stderr(), "{description}")?;
            Ok(None)
        }
        ("toString", _) => {
            let name = vm.class_of(this)?.java_name();
            let message = match vm.call_virtual(
                this,
                "getLocalizedMessage",
                "()Ljava/lang/String;",
                &[],
            )? {
                Some(JvmValue::Reference(0)) | None => None,
                Some(JvmValue::Reference(message)) => Some(vm.string(message)?),
                Some(other) => return Err(eyre!("getLocalizedMessage returned {other:?}").into()),
            };
            match message {
                Some(message) => string_result(vm, &format!("{name}: {message}")),
                None => string_result(vm, &name),
            }
        }
        _ => Err(not_implemented(method)),
    }
}

fn math_native(vm: &mut Vm, method: &Method, args: &[JvmValue]) -> NativeResult {
    let value = match (method.name, method.descriptor) {
        ("abs", "(I)I") => JvmValue::Int(int_arg(args, 0)?.wrapping_abs()),
        ("abs", "(J)J") => JvmValue::Long(long_arg(args, 0)?.wrapping_abs()),
        ("abs", "(F)F") => JvmValue::Float(float_arg(args, 0)?.abs()),
        ("abs", "(D)D") => JvmValue::Double(double_arg(args, 0)?.abs()),
        ("max", "(II)I") => JvmValue::Int(int_arg(args, 0)?.max(int_arg(args, 1)?)),
        ("max", "(JJ)J") => JvmValue::Long(long_arg(args, 0)?.max(long_arg(args, 1)?)),
        ("max", "(FF)F") => JvmValue::Float(
            java_max(float_arg(args, 0)? as f64, float_arg(args, 1)? as f64) as f32,
        ),
        ("max", "(DD)D") => JvmValue::Double(java_max(double_arg(args, 0)?, double_arg(args, 1)?)),
        ("min", "(II)I") => JvmValue::Int(int_arg(args, 0)?.min(int_arg(args, 1)?)),
        ("min", "(JJ)J") => JvmValue::Long(long_arg(args, 0)?.min(long_arg(args, 1)?)),
        ("min", "(FF)F") => JvmValue::Float(
            java_min(float_arg(args, 0)? as f64, float_arg(args, 1)? as f64) as f32,
        ),
        ("min", "(DD)D") => JvmValue::Double(java_min(double_arg(args, 0)?, double_arg(args, 1)?)),
        ("pow", _) => JvmValue::Double(double_arg(args, 0)?.powf(double_arg(args, 1)?)),
        ("sqrt", _) => JvmValue::Double(double_arg(args, 0)?.sqrt()),
        ("cbrt", _) => JvmValue::Double(double_arg(args, 0)?.cbrt()),
        ("floor", _) => JvmValue::Double(double_arg(args, 0)?.floor()),
        ("ceil", _) => JvmValue::Double(double_arg(args, 0)?.ceil()),
        ("round", "(D)J") => JvmValue::Long((double_arg(args, 0)? + 0.5).floor() as i64),
        ("round", "(F)I") => JvmValue::Int((float_arg(args, 0)? + 0.5).floor() as i32),
        ("exp", _) => JvmValue::Double(double_arg(args, 0)?.exp()),
        ("log", _) => JvmValue::Double(double_arg(args, 0)?.ln()),
        ("log10", _) => JvmValue::Double(double_arg(args, 0)?.log10()),
        ("sin", _) => JvmValue::Double(double_arg(args, 0)?.sin()),
        ("cos", _) => JvmValue::Double(double_arg(args, 0)?.cos()),
        ("tan", _) => JvmValue::Double(double_arg(args, 0)?.tan()),
        ("hypot", _) => JvmValue::Double(double_arg(args, 0)?.hypot(double_arg(args, 1)?)),
        ("floorDiv", _) | ("floorMod", _) => {
            let (a, b) = (int_arg(args, 0)?, int_arg(args, 1)?);
            if b == 0 {
                return Err(vm.throw(ARITHMETIC, Some("/ by zero".to_owned())));
            }
            let quotient = a.wrapping_div(b);
            let quotient = if (a % b != 0) && ((a < 0) != (b < 0)) {
                quotient - 1
            } else {
                quotient
            };
            JvmValue::Int(match method.name {
                "floorDiv" => quotient,
                _ => a.wrapping_sub(quotient.wrapping_mul(b)),
            })
        }
        (name, "(II)I") => {
            let (a, b) = (int_arg(args, 0)?, int_arg(args, 1)?);
            let result = match name {
                "addExact" => a.checked_add(b),
                "subtractExact" => a.checked_sub(b),
                "multiplyExact" => a.checked_mul(b),
                _ => return Err(not_implemented(method)),
            };
            match result {
                Some(result) => JvmValue::Int(result),
                None => return Err(vm.throw(ARITHMETIC, Some("integer overflow".to_owned()))),
            }
        }
        (name, "(JJ)J") => {
            let (a, b) = (long_arg(args, 0)?, long_arg(args, 1)?);
            let result = match name {
                "addExact" => a.checked_add(b),
                "subtractExact" => a.checked_sub(b),
                "multiplyExact" => a.checked_mul(b),
                _ => return Err(not_implemented(method)),
            };
            match result {
                Some(result) => JvmValue::Long(result),
                None => return Err(vm.throw(ARITHMETIC, Some("long overflow".to_owned()))),
            }
        }
        _ => return Err(not_implemented(method)),
    };

    Ok(Some(value))
}

/// `Math.max` for floating point: NaN wins and `0.0` is greater than `-0.0`.
fn java_max(a: f64, b: f64) -> f64 {
    if a.is_nan() {
        a
    } else if a == 0.0 && b == 0.0 && a.is_sign_negative() {
        b
    } else if a >= b {
        a
    } else {
        b
    }
}

fn java_min(a: f64, b: f64) -> f64 {
    if a.is_nan() {
        a
    } else if a == 0.0 && b == 0.0 && a.is_sign_positive() {
        b
    } else if a <= b {
        a
    } else {
        b
    }
}

fn system_native<'a>(
    vm: &mut Vm<'a>,
    class: &'a Class<'a>,
    method: &Method,
    args: &[JvmValue],
) -> NativeResult {
    match method.name {
        "<clinit>" => {
            let print_stream = vm.load_class(PRINT_STREAM)?;
            for (field, fd) in [("out", 1), ("err", 2)] {
                let stream = vm.new_object(print_stream);
                vm.heap.get_mut(stream)?.set_field(PRINT_STREAM, "fd", JvmValue::Int(fd))?;
                class
                    .static_field(field)
                    .wrap_err_with(|| eyre!("missing System.{field}"))?
                    .set(JvmValue::Reference(stream));
            }
            Ok(None)
        }
        "currentTimeMillis" => {
            let elapsed = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .wrap_err("system clock is before the epoch")?;
            Ok(Some(JvmValue::Long(elapsed.as_millis() as i64)))
        }
        "nanoTime" => {
            let elapsed = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .wrap_err("system clock is before the epoch")?;
            Ok(Some(JvmValue::Long(elapsed.as_nanos() as i64)))
        }
        "identityHashCode" => match reference_arg(args, 0)? {
            0 => int_result(0),
            reference => int_result(heap::identity_hash(reference)),
        },
        "lineSeparator" => string_result(vm, "\n"),
        "arraycopy" => {
            array_copy(vm, args)?;
            Ok(None)
        }
        _ => Err(not_implemented(method)),
    }
}

fn array_shape<'a>(vm: &Vm<'a>, reference: usize) -> eyre::Result<Option<(FieldType<'a>, usize)>> {
    Ok(match &vm.heap.get(reference)?.data {
        ObjectData::Array {
            component,
            elements,
        } => Some((*component, elements.len())),
        _ => None,
    })
}

fn array_copy(vm: &mut Vm, args: &[JvmValue]) -> ExecResult<()> {
    let source = non_null(vm, reference_arg(args, 0)?)?;
    let source_position = int_arg(args, 1)?;
    let destination = non_null(vm, reference_arg(args, 2)?)?;
    let destination_position = int_arg(args, 3)?;
    let length = int_arg(args, 4)?;

    let Some((source_component, source_length)) = array_shape(vm, source)? else {
        let message = "arraycopy: source type is not an array".to_owned();
        return Err(vm.throw(ARRAY_STORE, Some(message)));
    };
    let Some((destination_component, destination_length)) = array_shape(vm, destination)? else {
        let message = "arraycopy: destination type is not an array".to_owned();
        return Err(vm.throw(ARRAY_STORE, Some(message)));
    };

    let compatible = if source_component.is_reference() {
        destination_component.is_reference()
    } else {
        source_component == destination_component
    };
    if !compatible {
        let message = format!(
            "arraycopy: type mismatch: can not copy {source_component}[] into {destination_component}[]"
        );
        return Err(vm.throw(ARRAY_STORE, Some(message)));
    }

    let source_end = source_position as i64 + length as i64;
    let destination_end = destination_position as i64 + length as i64;
    let message = if length < 0 {
        Some(format!("arraycopy: length {length} is negative"))
    } else if source_position < 0 || source_end > source_length as i64 {
        Some(format!(
            "arraycopy: last source index {source_end} out of bounds for length {source_length}"
        ))
    } else if destination_position < 0 || destination_end > destination_length as i64 {
        Some(format!(
            "arraycopy: last destination index {destination_end} out of bounds for length {destination_length}"
        ))
    } else {
        None
    };
    if let Some(message) = message {
        return Err(vm.throw(ARRAY_INDEX_OUT_OF_BOUNDS, Some(message)));
    }

    let copied = match &vm.heap.get(source)?.data {
        ObjectData::Array { elements, .. } => {
            elements[source_position as usize..source_end as usize].to_vec()
        }
        _ => return Err(eyre!("arraycopy source changed shape").into()),
    };
    if let ObjectData::Array { elements, .. } = &mut vm.heap.get_mut(destination)?.data {
        let start = destination_position as usize;
        elements[start..start + copied.len()].copy_from_slice(&copied);
    }
    Ok(())
}

fn print_stream_native<'a>(
    vm: &mut Vm<'a>,
    method: &'a Method<'a>,
    args: &[JvmValue],
) -> NativeResult {
    let this = reference_arg(args, 0)?;

    let mut text = match (method.name, method.params) {
        ("flush", _) | ("close", _) => return Ok(None),
        ("println", []) => String::new(),
        ("print" | "println", [FieldType::Array(1, BaseType::Char)]) => {
            let array = non_null(vm, reference_arg(args, 1)?)?;
            String::from_utf16_lossy(&char_array(vm, array)?)
        }
        ("print" | "println", [param]) => format::java_text(vm, arg(args, 1)?, param)?,
        _ => return Err(not_implemented(method)),
    };

    if method.name == "println" {
        text.push('\n');
    }

    match vm.heap.get(this)?.field(PRINT_STREAM, "fd")?.as_int()? {
        2 => io::stderr().write_all(text.as_bytes())?,
        _ => vm.stdout.write_all(text.as_bytes())?,
    }
    Ok(None)
}

fn objects_native<'a>(vm: &mut Vm<'a>, method: &Method, args: &[JvmValue]) -> NativeResult {
    match (method.name, method.descriptor) {
        ("requireNonNull", _) => {
            let object = reference_arg(args, 0)?;
            if object == 0 {
                let message = match args.get(1) {
                    Some(JvmValue::Reference(message)) if *message != 0 => {
                        Some(vm.string(*message)?)
                    }
                    _ => None,
                };
                return Err(vm.throw(NULL_POINTER, message));
            }
            Ok(Some(JvmValue::Reference(object)))
        }
        ("equals", _) => {
            let (a, b) = (reference_arg(args, 0)?, reference_arg(args, 1)?);
            if a == b {
                return bool_result(true);
            }
            if a == 0 {
                return bool_result(false);
            }
            vm.call_virtual(a, "equals", "(Ljava/lang/Object;)Z", &[JvmValue::Reference(b)])
        }
        ("hashCode", _) => match reference_arg(args, 0)? {
            0 => int_result(0),
            object => vm.call_virtual(object, "hashCode", "()I", &[]),
        },
        ("toString", _) => {
            let text = vm.stringify(reference_arg(args, 0)?)?;
            string_result(vm, &text)
        }
        ("isNull", _) => bool_result(reference_arg(args, 0)? == 0),
        ("nonNull", _) => bool_result(reference_arg(args, 0)? != 0),
        _ => Err(not_implemented(method)),
    }
}

fn character_native<'a>(
    vm: &mut Vm<'a>,
    class: &'a Class<'a>,
    method: &'a Method<'a>,
    args: &[JvmValue],
) -> NativeResult {
    let is_static = method.access_flags.contains(MethodAccessFlags::STATIC);
    let predicate = |test: fn(char) -> bool| -> NativeResult {
        let unit = int_arg(args, 0)? as u32;
        bool_result(char::from_u32(unit).is_some_and(test))
    };
    let map = |convert: fn(char) -> Option<char>| -> NativeResult {
        let unit = int_arg(args, 0)?;
        let mapped = char::from_u32(unit as u32)
            .and_then(convert)
            .filter(|c| c.len_utf16() == 1)
            .map_or(unit, |c| c as i32);
        int_result(mapped)
    };

    match method.name {
        "isDigit" if is_static => predicate(|c| c.is_numeric()),
        "isLetter" if is_static => predicate(char::is_alphabetic),
        "isLetterOrDigit" if is_static => predicate(char::is_alphanumeric),
        "isWhitespace" if is_static => predicate(char::is_whitespace),
        "isUpperCase" if is_static => predicate(char::is_uppercase),
        "isLowerCase" if is_static => predicate(char::is_lowercase),
        "toUpperCase" if is_static => map(|c| c.to_uppercase().next()),
        "toLowerCase" if is_static => map(|c| c.to_lowercase().next()),
        _ => boxed_native(vm, class, method, args, BaseType::Char),
    }
}

fn box_primitive(name: &str) -> Option<BaseType<'static>> {
    Some(match name {
        "java/lang/Integer" => BaseType::Int,
        "java/lang/Long" => BaseType::Long,
        "java/lang/Short" => BaseType::Short,
        "java/lang/Byte" => BaseType::Byte,
        "java/lang/Float" => BaseType::Float,
        "java/lang/Double" => BaseType::Double,
        "java/lang/Boolean" => BaseType::Boolean,
        _ => return None,
    })
}

fn boxed_native<'a>(
    vm: &mut Vm<'a>,
    class: &'a Class<'a>,
    method: &'a Method<'a>,
    args: &[JvmValue],
    primitive: BaseType<'static>,
) -> NativeResult {
    let primitive_type = FieldType::Base(primitive);

    if method.access_flags.contains(MethodAccessFlags::STATIC) {
        return match (method.name, method.params) {
            ("valueOf", [FieldType::Base(BaseType::Object(_))]) => {
                let value = parse_primitive(vm, primitive, reference_arg(args, 0)?)?;
                box_value(vm, class, value)
            }
            ("valueOf", [_]) => box_value(vm, class, arg(args, 0)?),
            ("toString", [_]) => {
                let text = format::java_text(vm, arg(args, 0)?, &primitive_type)?;
                string_result(vm, &text)
            }
            ("compare", [_, _]) => int_result(compare(primitive, arg(args, 0)?, arg(args, 1)?)),
            (name, [_]) if name.starts_with("parse") => {
                let value = parse_primitive(vm, primitive, reference_arg(args, 0)?)?;
                Ok(Some(value))
            }
            _ => Err(not_implemented(method)),
        };
    }

    let this = reference_arg(args, 0)?;
    let owner = vm.class_of(this)?.name();
    let value = vm.heap.get(this)?.field(owner, "value")?;

    match (method.name, method.params) {
        ("toString", []) => {
            let text = format::java_text(vm, value, &primitive_type)?;
            string_result(vm, &text)
        }
        ("hashCode", []) => int_result(hash(value)),
        ("equals", [_]) => {
            let other = reference_arg(args, 1)?;
            let equal = other != 0
                && std::ptr::eq(vm.class_of(other)?, class)
                && canonical_bits(vm.heap.get(other)?.field(owner, "value")?)
                    == canonical_bits(value);
            bool_result(equal)
        }
        ("compareTo", [_]) => {
            let other = non_null(vm, reference_arg(args, 1)?)?;
            let other = vm.heap.get(other)?.field(owner, "value")?;
            int_result(compare(primitive, value, other))
        }
        (name, []) if name.ends_with("Value") => {
            let return_type = method.return_type.wrap_err("unboxing method returns void")?;
            Ok(Some(convert(value, &return_type)))
        }
        _ => Err(not_implemented(method)),
    }
}

fn box_value<'a>(vm: &mut Vm<'a>, class: &'a Class<'a>, value: JvmValue) -> NativeResult {
    let boxed = vm.new_object(class);
    vm.heap.get_mut(boxed)?.set_field(class.name(), "value", value)?;
    Ok(Some(JvmValue::Reference(boxed)))
}

/// `Integer.parseInt` and friends, sharing the argument coercion rules.
fn parse_primitive(vm: &mut Vm, primitive: BaseType, string: usize) -> ExecResult<JvmValue> {
    let token = match primitive {
        BaseType::Boolean => TypeToken::Boolean,
        BaseType::Char => TypeToken::Char,
        BaseType::Byte => TypeToken::Byte,
        BaseType::Short => TypeToken::Short,
        BaseType::Int => TypeToken::Int,
        BaseType::Long => TypeToken::Long,
        BaseType::Float => TypeToken::Float,
        BaseType::Double => TypeToken::Double,
        BaseType::Object(_) => return Err(eyre!("cannot parse a reference type").into()),
    };

    if string == 0 {
        return match token {
            TypeToken::Boolean => Ok(JvmValue::Int(0)),
            TypeToken::Float | TypeToken::Double => Err(vm.throw(NULL_POINTER, None)),
            _ => Err(vm.throw(
                NUMBER_FORMAT,
                Some("Cannot parse null string: null".to_owned()),
            )),
        };
    }

    let literal = vm.string(string)?;
    match coerce::parse_literal(token, &literal) {
        Ok(argument) => argument
            .primitive_value()
            .wrap_err("parsed literal is not a primitive")
            .map_err(Trap::from),
        Err(error) => Err(vm.throw(NUMBER_FORMAT, Some(error.to_string()))),
    }
}

fn compare(primitive: BaseType, a: JvmValue, b: JvmValue) -> i32 {
    match (primitive, a, b) {
        (BaseType::Char | BaseType::Short | BaseType::Byte, JvmValue::Int(a), JvmValue::Int(b)) => {
            a - b
        }
        (_, JvmValue::Int(a), JvmValue::Int(b)) => a.cmp(&b) as i32,
        (_, JvmValue::Long(a), JvmValue::Long(b)) => a.cmp(&b) as i32,
        (_, JvmValue::Float(a), JvmValue::Float(b)) => canonical_f32(a).total_cmp(&canonical_f32(b)) as i32,
        (_, JvmValue::Double(a), JvmValue::Double(b)) => {
            canonical_f64(a).total_cmp(&canonical_f64(b)) as i32
        }
        _ => 0,
    }
}

fn canonical_f32(value: f32) -> f32 {
    if value.is_nan() {
        f32::NAN
    } else {
        value
    }
}

fn canonical_f64(value: f64) -> f64 {
    if value.is_nan() {
        f64::NAN
    } else {
        value
    }
}

/// Bit pattern used by boxed `equals`, with NaNs collapsed as `floatToIntBits` does.
fn canonical_bits(value: JvmValue) -> i64 {
    match value {
        JvmValue::Int(v) => v as i64,
        JvmValue::Long(v) => v,
        JvmValue::Float(v) => canonical_f32(v).to_bits() as i64,
        JvmValue::Double(v) => canonical_f64(v).to_bits() as i64,
        JvmValue::Reference(v) => v as i64,
    }
}

fn hash(value: JvmValue) -> i32 {
    match value {
        JvmValue::Int(v) => v,
        JvmValue::Long(v) => (v ^ ((v as u64) >> 32) as i64) as i32,
        JvmValue::Float(v) => canonical_f32(v).to_bits() as i32,
        JvmValue::Double(v) => {
            let bits = canonical_f64(v).to_bits();
            (bits ^ (bits >> 32)) as i32
        }
        JvmValue::Reference(v) => heap::identity_hash(v),
    }
}

/// Primitive widening and narrowing conversion, as performed by the unboxing methods.
fn convert(value: JvmValue, target: &FieldType) -> JvmValue {
    let as_int = match value {
        JvmValue::Int(v) => v,
        JvmValue::Long(v) => v as i32,
        JvmValue::Float(v) => v as i32,
        JvmValue::Double(v) => v as i32,
        JvmValue::Reference(_) => 0,
    };

    match target {
        FieldType::Base(BaseType::Long) => JvmValue::Long(match value {
            JvmValue::Int(v) => v as i64,
            JvmValue::Long(v) => v,
            JvmValue::Float(v) => v as i64,
            JvmValue::Double(v) => v as i64,
            JvmValue::Reference(_) => 0,
        }),
        FieldType::Base(BaseType::Float) => JvmValue::Float(match value {
            JvmValue::Int(v) => v as f32,
            JvmValue::Long(v) => v as f32,
            JvmValue::Float(v) => v,
            JvmValue::Double(v) => v as f32,
            JvmValue::Reference(_) => 0.0,
        }),
        FieldType::Base(BaseType::Double) => JvmValue::Double(match value {
            JvmValue::Int(v) => v as f64,
            JvmValue::Long(v) => v as f64,
            JvmValue::Float(v) => v as f64,
            JvmValue::Double(v) => v,
            JvmValue::Reference(_) => 0.0,
        }),
        FieldType::Base(BaseType::Byte) => JvmValue::Int(as_int as i8 as i32),
        FieldType::Base(BaseType::Short) => JvmValue::Int(as_int as i16 as i32),
        FieldType::Base(BaseType::Char) => JvmValue::Int(as_int as u16 as i32),
        _ => JvmValue::Int(as_int),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_throwable_chains_to_throwable() {
        for (name, _) in THROWABLES {
            let mut current = bootstrap_class(name).unwrap();
            while current.name != THROWABLE {
                current = bootstrap_class(current.super_class.unwrap()).unwrap();
            }
        }
    }

    #[test]
    fn boxed_descriptors_are_spelled_out() {
        let integer = bootstrap_class("java/lang/Integer").unwrap();
        let descriptors: Vec<_> = integer
            .methods
            .iter()
            .map(|m| format!("{}{}", m.name, m.descriptor))
            .collect();
        assert!(descriptors.contains(&"valueOf(I)Ljava/lang/Integer;".to_owned()));
        assert!(descriptors.contains(&"parseInt(Ljava/lang/String;)I".to_owned()));
        assert!(descriptors.contains(&"compareTo(Ljava/lang/Integer;)I".to_owned()));
        assert!(descriptors.contains(&"doubleValue()D".to_owned()));
    }

    #[test]
    fn unknown_classes_are_not_bootstrap_classes() {
        assert!(bootstrap_class("demo/Calculator").is_none());
        assert!(bootstrap_class("java/util/ArrayList").is_none());
    }

    #[test]
    fn floating_min_max_follow_java() {
        assert!(java_max(f64::NAN, 1.0).is_nan());
        assert!(java_max(1.0, f64::NAN).is_nan());
        assert!(java_max(-0.0, 0.0).is_sign_positive());
        assert!(java_min(0.0, -0.0).is_sign_negative());
        assert_eq!(java_max(2.0, 3.0), 3.0);
    }

    #[test]
    fn conversions_narrow_like_java() {
        let target = FieldType::Base(BaseType::Byte);
        assert_eq!(convert(JvmValue::Int(300), &target), JvmValue::Int(44));
        let target = FieldType::Base(BaseType::Int);
        assert_eq!(convert(JvmValue::Double(1e20), &target), JvmValue::Int(i32::MAX));
        assert_eq!(hash(JvmValue::Long(1 << 32)), 1);
    }
}
