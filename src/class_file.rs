use bitflags::bitflags;
use bumpalo::collections::Vec;

use self::constant_pool::ConstantPool;

#[derive(Debug)]
pub struct ClassFile<'a> {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool<'a>,
    pub access_flags: ClassAccessFlags,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<'a, u16>,
    pub fields: Vec<'a, FieldInfo<'a>>,
    pub methods: Vec<'a, MethodInfo<'a>>,
    pub attributes: Vec<'a, AttributeInfo<'a>>,
}

pub mod constant_pool {
    use color_eyre::eyre::{self, bail, eyre};

    #[derive(Debug)]
    pub struct ConstantPool<'a>(pub(crate) bumpalo::collections::Vec<'a, ConstantInfo<'a>>);

    impl<'a> ConstantPool<'a> {
        pub fn empty(arena: &'a bumpalo::Bump) -> ConstantPool<'a> {
            ConstantPool(bumpalo::collections::Vec::new_in(arena))
        }

        pub fn get(&self, index: u16) -> Option<&ConstantInfo<'a>> {
            self.0.get(index.checked_sub(1)? as usize)
        }

        pub fn entry(&self, index: u16) -> eyre::Result<&ConstantInfo<'a>> {
            self.get(index)
                .ok_or_else(|| eyre!("constant pool index {index} out of range"))
        }

        pub fn utf8(&self, index: u16) -> eyre::Result<&'a str> {
            match self.entry(index)? {
                ConstantInfo::Utf8(value) => Ok(*value),
                other => bail!("expected utf8 at #{index}, found {other:?}"),
            }
        }

        pub fn class_name(&self, index: u16) -> eyre::Result<&'a str> {
            match self.entry(index)? {
                ConstantInfo::Class(Class { name_index }) => self.utf8(*name_index),
                other => bail!("expected class at #{index}, found {other:?}"),
            }
        }

        pub fn name_and_type(&self, index: u16) -> eyre::Result<(&'a str, &'a str)> {
            match self.entry(index)? {
                ConstantInfo::NameAndType(NameAndType {
                    name_index,
                    descriptor_index,
                }) => Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?)),
                other => bail!("expected name_and_type at #{index}, found {other:?}"),
            }
        }

        /// Resolves a field, method or interface method reference to its symbolic parts.
        pub fn member_ref(&self, index: u16) -> eyre::Result<SymbolicRef<'a>> {
            let member = match self.entry(index)? {
                ConstantInfo::FieldRef(member)
                | ConstantInfo::MethodRef(member)
                | ConstantInfo::InterfaceMethodRef(member) => member,
                other => bail!("expected member reference at #{index}, found {other:?}"),
            };

            let (name, descriptor) = self.name_and_type(member.name_and_type_index)?;

            Ok(SymbolicRef {
                class_name: self.class_name(member.class_index)?,
                name,
                descriptor,
            })
        }
    }

    #[derive(Clone, Copy, Debug)]
    pub struct SymbolicRef<'a> {
        pub class_name: &'a str,
        pub name: &'a str,
        pub descriptor: &'a str,
    }

    #[derive(Debug)]
    pub enum ConstantInfo<'a> {
        /// Second slot taken by a preceding long or double.
        Unused,
        Utf8(&'a str),
        Integer(i32),
        Float(f32),
        Long(i64),
        Double(f64),
        Class(Class),
        String(String),
        FieldRef(MemberRef),
        MethodRef(MemberRef),
        InterfaceMethodRef(MemberRef),
        NameAndType(NameAndType),
        MethodHandle(MethodHandle),
        MethodType(MethodType),
        Dynamic(Dynamic),
        InvokeDynamic(Dynamic),
        Module(Module),
        Package(Package),
    }

    #[derive(Debug)]
    pub struct Class {
        pub name_index: u16,
    }

    #[derive(Debug)]
    pub struct String {
        pub string_index: u16,
    }

    #[derive(Debug)]
    pub struct MemberRef {
        pub class_index: u16,
        pub name_and_type_index: u16,
    }

    #[derive(Debug)]
    pub struct NameAndType {
        pub name_index: u16,
        pub descriptor_index: u16,
    }

    #[derive(Debug)]
    pub struct MethodHandle {
        pub reference_kind: u8,
        pub reference_index: u16,
    }

    #[derive(Debug)]
    pub struct MethodType {
        pub descriptor_index: u16,
    }

    #[derive(Debug)]
    pub struct Dynamic {
        pub bootstrap_method_attr_index: u16,
        pub name_and_type_index: u16,
    }

    #[derive(Debug)]
    pub struct Module {
        pub name_index: u16,
    }

    #[derive(Debug)]
    pub struct Package {
        pub name_index: u16,
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug)]
    pub struct ClassAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const FINAL = 0x0010;
        const SUPER = 0x0020;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
        const MODULE = 0x8000;
    }
}

#[derive(Debug)]
pub struct FieldInfo<'a> {
    pub access_flags: FieldAccessFlags,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<'a, AttributeInfo<'a>>,
}

bitflags! {
    #[derive(Clone, Copy, Debug)]
    pub struct FieldAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const VOLATILE = 0x0040;
        const TRANSIENT = 0x0080;
        const SYNTHETIC = 0x1000;
        const ENUM = 0x4000;
    }
}

#[derive(Debug)]
pub struct MethodInfo<'a> {
    pub access_flags: MethodAccessFlags,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<'a, AttributeInfo<'a>>,
}

bitflags! {
    #[derive(Clone, Copy, Debug)]
    pub struct MethodAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const BRIDGE = 0x0040;
        const VARARGS = 0x0080;
        const NATIVE = 0x0100;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
        const SYNTHETIC = 0x1000;
    }
}

#[derive(Debug)]
pub enum AttributeInfo<'a> {
    Code(CodeAttribute<'a>),
    LineNumberTable(LineNumberTableAttribute<'a>),
    BootstrapMethods(BootstrapMethodsAttribute<'a>),
    SourceFile(SourceFileAttribute),
    Custom(CustomAttribute<'a>),
}

#[derive(Debug)]
pub struct CodeAttribute<'a> {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<'a, u8>,
    pub exception_table: Vec<'a, ExceptionTableEntry>,
    pub attributes: Vec<'a, AttributeInfo<'a>>,
}

#[derive(Clone, Copy, Debug)]
pub struct ExceptionTableEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

#[derive(Debug)]
pub struct LineNumberTableAttribute<'a> {
    pub line_number_table: Vec<'a, LineNumberTableEntry>,
}

#[derive(Debug)]
pub struct LineNumberTableEntry {
    pub start_pc: u16,
    pub line_number: u16,
}

#[derive(Debug)]
pub struct BootstrapMethodsAttribute<'a> {
    pub bootstrap_methods: Vec<'a, BootstrapMethod<'a>>,
}

#[derive(Debug)]
pub struct BootstrapMethod<'a> {
    pub bootstrap_method_ref: u16,
    pub bootstrap_arguments: Vec<'a, u16>,
}

#[derive(Debug)]
pub struct SourceFileAttribute {
    pub sourcefile_index: u16,
}

#[derive(Debug)]
pub struct CustomAttribute<'a> {
    pub attribute_name_index: u16,
    pub info: Vec<'a, u8>,
}

impl<'a> ClassFile<'a> {
    pub fn name(&self) -> color_eyre::eyre::Result<&'a str> {
        self.constant_pool.class_name(self.this_class)
    }

    pub fn bootstrap_methods(&self) -> Option<&BootstrapMethodsAttribute<'a>> {
        self.attributes.iter().find_map(|attr| match attr {
            AttributeInfo::BootstrapMethods(attr) => Some(attr),
            _ => None,
        })
    }
}
