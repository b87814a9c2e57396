use std::io;

use bumpalo::collections::Vec;
use bumpalo::Bump;
use byteorder::{BigEndian, ReadBytesExt};
use color_eyre::eyre::{self, bail, Context};

use crate::class_file::constant_pool::{self, ConstantInfo, ConstantPool};
use crate::class_file::{
    AttributeInfo, BootstrapMethod, BootstrapMethodsAttribute, ClassAccessFlags, ClassFile,
    CodeAttribute, CustomAttribute, ExceptionTableEntry, FieldAccessFlags, FieldInfo,
    LineNumberTableAttribute, LineNumberTableEntry, MethodAccessFlags, MethodInfo,
    SourceFileAttribute,
};

const MAGIC: u32 = 0xcafebabe;

pub struct ClassReader<'a, R> {
    arena: &'a Bump,
    reader: R,
}

impl<'a, R: io::Read> ClassReader<'a, R> {
    pub fn new(arena: &'a Bump, reader: R) -> ClassReader<'a, R> {
        ClassReader { arena, reader }
    }

    pub fn read_class_file(&mut self) -> eyre::Result<ClassFile<'a>> {
        let magic = self.read_u32().wrap_err("failed to read magic bytes")?;
        if magic != MAGIC {
            bail!("invalid magic bytes: 0x{magic:08x}");
        }

        let minor_version = self.read_u16()?;
        let major_version = self.read_u16()?;
        let constant_pool = self
            .read_constant_pool()
            .wrap_err("failed to read constant pool")?;
        let access_flags = ClassAccessFlags::from_bits_retain(self.read_u16()?);
        let this_class = self.read_u16()?;
        let super_class = self.read_u16()?;
        let interfaces = self.read_u16_table().wrap_err("failed to read interfaces")?;
        let fields = self
            .read_fields(&constant_pool)
            .wrap_err("failed to read fields")?;
        let methods = self
            .read_methods(&constant_pool)
            .wrap_err("failed to read methods")?;
        let attributes = self
            .read_attributes(&constant_pool)
            .wrap_err("failed to read class attributes")?;

        Ok(ClassFile {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    fn read_constant_pool(&mut self) -> eyre::Result<ConstantPool<'a>> {
        let constant_pool_count = self.read_u16()?;
        let mut constant_pool =
            Vec::with_capacity_in(constant_pool_count.saturating_sub(1) as usize, self.arena);

        let mut index = 1;
        while index < constant_pool_count {
            let tag = self.read_u8()?;
            let constant = match tag {
                1 => ConstantInfo::Utf8(self.read_utf8()?),
                3 => ConstantInfo::Integer(self.read_i32()?),
                4 => ConstantInfo::Float(f32::from_bits(self.read_u32()?)),
                5 => ConstantInfo::Long(self.read_i64()?),
                6 => ConstantInfo::Double(f64::from_bits(self.read_u64()?)),
                7 => ConstantInfo::Class(constant_pool::Class {
                    name_index: self.read_u16()?,
                }),
                8 => ConstantInfo::String(constant_pool::String {
                    string_index: self.read_u16()?,
                }),
                9 => ConstantInfo::FieldRef(self.read_member_ref()?),
                10 => ConstantInfo::MethodRef(self.read_member_ref()?),
                11 => ConstantInfo::InterfaceMethodRef(self.read_member_ref()?),
                12 => ConstantInfo::NameAndType(constant_pool::NameAndType {
                    name_index: self.read_u16()?,
                    descriptor_index: self.read_u16()?,
                }),
                15 => ConstantInfo::MethodHandle(constant_pool::MethodHandle {
                    reference_kind: self.read_u8()?,
                    reference_index: self.read_u16()?,
                }),
                16 => ConstantInfo::MethodType(constant_pool::MethodType {
                    descriptor_index: self.read_u16()?,
                }),
                17 => ConstantInfo::Dynamic(self.read_dynamic()?),
                18 => ConstantInfo::InvokeDynamic(self.read_dynamic()?),
                19 => ConstantInfo::Module(constant_pool::Module {
                    name_index: self.read_u16()?,
                }),
                20 => ConstantInfo::Package(constant_pool::Package {
                    name_index: self.read_u16()?,
                }),
                _ => bail!("unknown constant pool tag {tag} at #{index}"),
            };

            let wide = matches!(constant, ConstantInfo::Long(_) | ConstantInfo::Double(_));
            constant_pool.push(constant);

            if wide {
                constant_pool.push(ConstantInfo::Unused);
                index += 2;
            } else {
                index += 1;
            }
        }

        Ok(ConstantPool(constant_pool))
    }

    fn read_utf8(&mut self) -> eyre::Result<&'a str> {
        let length = self.read_u16()? as usize;
        let bytes = self.read_bytes(length)?;
        let value = decode_modified_utf8(&bytes).wrap_err("failed to read utf8 from constant pool")?;
        Ok(self.arena.alloc_str(&value))
    }

    fn read_member_ref(&mut self) -> eyre::Result<constant_pool::MemberRef> {
        Ok(constant_pool::MemberRef {
            class_index: self.read_u16()?,
            name_and_type_index: self.read_u16()?,
        })
    }

    fn read_dynamic(&mut self) -> eyre::Result<constant_pool::Dynamic> {
        Ok(constant_pool::Dynamic {
            bootstrap_method_attr_index: self.read_u16()?,
            name_and_type_index: self.read_u16()?,
        })
    }

    fn read_u16_table(&mut self) -> eyre::Result<Vec<'a, u16>> {
        let count = self.read_u16()? as usize;
        let mut table = Vec::with_capacity_in(count, self.arena);
        for _ in 0..count {
            table.push(self.read_u16()?);
        }
        Ok(table)
    }

    fn read_fields(&mut self, constant_pool: &ConstantPool) -> eyre::Result<Vec<'a, FieldInfo<'a>>> {
        let fields_count = self.read_u16()? as usize;
        let mut fields = Vec::with_capacity_in(fields_count, self.arena);
        for _ in 0..fields_count {
            fields.push(FieldInfo {
                access_flags: FieldAccessFlags::from_bits_retain(self.read_u16()?),
                name_index: self.read_u16()?,
                descriptor_index: self.read_u16()?,
                attributes: self.read_attributes(constant_pool)?,
            });
        }
        Ok(fields)
    }

    fn read_methods(
        &mut self,
        constant_pool: &ConstantPool,
    ) -> eyre::Result<Vec<'a, MethodInfo<'a>>> {
        let methods_count = self.read_u16()? as usize;
        let mut methods = Vec::with_capacity_in(methods_count, self.arena);
        for _ in 0..methods_count {
            methods.push(MethodInfo {
                access_flags: MethodAccessFlags::from_bits_retain(self.read_u16()?),
                name_index: self.read_u16()?,
                descriptor_index: self.read_u16()?,
                attributes: self.read_attributes(constant_pool)?,
            });
        }
        Ok(methods)
    }

    fn read_attributes(
        &mut self,
        constant_pool: &ConstantPool,
    ) -> eyre::Result<Vec<'a, AttributeInfo<'a>>> {
        let attributes_count = self.read_u16()? as usize;
        let mut attributes = Vec::with_capacity_in(attributes_count, self.arena);
        for _ in 0..attributes_count {
            attributes.push(self.read_attribute_info(constant_pool)?);
        }
        Ok(attributes)
    }

    fn read_attribute_info(&mut self, constant_pool: &ConstantPool) -> eyre::Result<AttributeInfo<'a>> {
        let attribute_name_index = self.read_u16()?;
        let length = self.read_u32()? as usize;

        let Some(ConstantInfo::Utf8(name)) = constant_pool.get(attribute_name_index) else {
            bail!("invalid attribute name index: {attribute_name_index}")
        };

        let attribute_info = match *name {
            "Code" => AttributeInfo::Code(
                self.read_code_attribute(constant_pool)
                    .wrap_err("failed to read code attribute")?,
            ),
            "LineNumberTable" => AttributeInfo::LineNumberTable(self.read_line_number_table()?),
            "BootstrapMethods" => AttributeInfo::BootstrapMethods(self.read_bootstrap_methods()?),
            "SourceFile" => AttributeInfo::SourceFile(SourceFileAttribute {
                sourcefile_index: self.read_u16()?,
            }),
            _ => AttributeInfo::Custom(CustomAttribute {
                attribute_name_index,
                info: self.read_bytes(length)?,
            }),
        };

        Ok(attribute_info)
    }

    fn read_code_attribute(&mut self, constant_pool: &ConstantPool) -> eyre::Result<CodeAttribute<'a>> {
        let max_stack = self.read_u16()?;
        let max_locals = self.read_u16()?;

        let code_length = self.read_u32()? as usize;
        let code = self.read_bytes(code_length)?;

        let exception_table_length = self.read_u16()? as usize;
        let mut exception_table = Vec::with_capacity_in(exception_table_length, self.arena);
        for _ in 0..exception_table_length {
            exception_table.push(ExceptionTableEntry {
                start_pc: self.read_u16()?,
                end_pc: self.read_u16()?,
                handler_pc: self.read_u16()?,
                catch_type: self.read_u16()?,
            });
        }

        Ok(CodeAttribute {
            max_stack,
            max_locals,
            code,
            exception_table,
            attributes: self.read_attributes(constant_pool)?,
        })
    }

    fn read_line_number_table(&mut self) -> eyre::Result<LineNumberTableAttribute<'a>> {
        let length = self.read_u16()? as usize;
        let mut line_number_table = Vec::with_capacity_in(length, self.arena);
        for _ in 0..length {
            line_number_table.push(LineNumberTableEntry {
                start_pc: self.read_u16()?,
                line_number: self.read_u16()?,
            });
        }
        Ok(LineNumberTableAttribute { line_number_table })
    }

    fn read_bootstrap_methods(&mut self) -> eyre::Result<BootstrapMethodsAttribute<'a>> {
        let length = self.read_u16()? as usize;
        let mut bootstrap_methods = Vec::with_capacity_in(length, self.arena);
        for _ in 0..length {
            bootstrap_methods.push(BootstrapMethod {
                bootstrap_method_ref: self.read_u16()?,
                bootstrap_arguments: self.read_u16_table()?,
            });
        }
        Ok(BootstrapMethodsAttribute { bootstrap_methods })
    }

    fn read_bytes(&mut self, length: usize) -> io::Result<Vec<'a, u8>> {
        let mut bytes = bumpalo::vec![in self.arena; 0; length];
        self.reader.read_exact(&mut bytes)?;
        Ok(bytes)
    }

    fn read_u8(&mut self) -> io::Result<u8> {
        self.reader.read_u8()
    }

    fn read_u16(&mut self) -> io::Result<u16> {
        self.reader.read_u16::<BigEndian>()
    }

    fn read_u32(&mut self) -> io::Result<u32> {
        self.reader.read_u32::<BigEndian>()
    }

    fn read_i32(&mut self) -> io::Result<i32> {
        self.reader.read_i32::<BigEndian>()
    }

    fn read_u64(&mut self) -> io::Result<u64> {
        self.reader.read_u64::<BigEndian>()
    }

    fn read_i64(&mut self) -> io::Result<i64> {
        self.reader.read_i64::<BigEndian>()
    }
}

/// Decodes the "modified UTF-8" used by class files: NUL is stored as `C0 80` and
/// supplementary characters as two encoded surrogates.
fn decode_modified_utf8(bytes: &[u8]) -> eyre::Result<String> {
    if let Ok(value) = std::str::from_utf8(bytes) {
        return Ok(value.to_owned());
    }

    let mut units = std::vec::Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b0 = bytes[i] as u16;
        let (unit, width) = match bytes[i] {
            0x01..=0x7f => (b0, 1),
            0xc0..=0xdf if i + 1 < bytes.len() => {
                (((b0 & 0x1f) << 6) | (bytes[i + 1] as u16 & 0x3f), 2)
            }
            0xe0..=0xef if i + 2 < bytes.len() => (
                ((b0 & 0x0f) << 12)
                    | ((bytes[i + 1] as u16 & 0x3f) << 6)
                    | (bytes[i + 2] as u16 & 0x3f),
                3,
            ),
            byte => bail!("invalid modified utf8 byte 0x{byte:02x} at offset {i}"),
        };
        units.push(unit);
        i += width;
    }

    Ok(String::from_utf16_lossy(&units))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_magic() {
        let arena = Bump::new();
        let bytes = [0xde, 0xad, 0xbe, 0xef, 0, 0, 0, 52];
        let err = ClassReader::new(&arena, &bytes[..])
            .read_class_file()
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid magic bytes: 0xdeadbeef");
    }

    #[test]
    fn truncated_constant_pool_is_an_error() {
        let arena = Bump::new();
        let bytes = [0xca, 0xfe, 0xba, 0xbe, 0, 0, 0, 52, 0, 3, 1, 0, 5, b'a'];
        let err = ClassReader::new(&arena, &bytes[..])
            .read_class_file()
            .unwrap_err();
        assert_eq!(err.to_string(), "failed to read constant pool");
    }

    #[test]
    fn decodes_encoded_nul_and_surrogate_pairs() {
        assert_eq!(decode_modified_utf8(&[b'a', 0xc0, 0x80, b'b']).unwrap(), "a\0b");
        // U+1F600 as a CESU-8 surrogate pair
        let bytes = [0xed, 0xa0, 0xbd, 0xed, 0xb8, 0x80];
        assert_eq!(decode_modified_utf8(&bytes).unwrap(), "\u{1F600}");
    }
}
