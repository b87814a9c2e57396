//! Just enough of a class file assembler to build test fixtures without a JDK.

use std::collections::HashMap;

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_PRIVATE: u16 = 0x0002;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_SUPER: u16 = 0x0020;
pub const ACC_INTERFACE: u16 = 0x0200;
pub const ACC_ABSTRACT: u16 = 0x0400;

pub mod op {
    pub const ACONST_NULL: u8 = 0x01;
    pub const ICONST_0: u8 = 0x03;
    pub const BIPUSH: u8 = 0x10;
    pub const SIPUSH: u8 = 0x11;
    pub const LDC: u8 = 0x12;
    pub const LDC_W: u8 = 0x13;
    pub const LDC2_W: u8 = 0x14;
    pub const ILOAD: u8 = 0x15;
    pub const LLOAD: u8 = 0x16;
    pub const FLOAD: u8 = 0x17;
    pub const DLOAD: u8 = 0x18;
    pub const ALOAD: u8 = 0x19;
    pub const IALOAD: u8 = 0x2e;
    pub const ISTORE: u8 = 0x36;
    pub const ASTORE: u8 = 0x3a;
    pub const IASTORE: u8 = 0x4f;
    pub const POP: u8 = 0x57;
    pub const DUP: u8 = 0x59;
    pub const IADD: u8 = 0x60;
    pub const ISUB: u8 = 0x64;
    pub const IMUL: u8 = 0x68;
    pub const LMUL: u8 = 0x69;
    pub const FMUL: u8 = 0x6a;
    pub const DMUL: u8 = 0x6b;
    pub const IDIV: u8 = 0x6c;
    pub const DDIV: u8 = 0x6f;
    pub const IREM: u8 = 0x70;
    pub const IXOR: u8 = 0x82;
    pub const IINC: u8 = 0x84;
    pub const IFNE: u8 = 0x9a;
    pub const IF_ICMPGE: u8 = 0xa2;
    pub const IF_ICMPGT: u8 = 0xa3;
    pub const GOTO: u8 = 0xa7;
    pub const IRETURN: u8 = 0xac;
    pub const LRETURN: u8 = 0xad;
    pub const FRETURN: u8 = 0xae;
    pub const DRETURN: u8 = 0xaf;
    pub const ARETURN: u8 = 0xb0;
    pub const RETURN: u8 = 0xb1;
    pub const GETSTATIC: u8 = 0xb2;
    pub const PUTSTATIC: u8 = 0xb3;
    pub const GETFIELD: u8 = 0xb4;
    pub const PUTFIELD: u8 = 0xb5;
    pub const INVOKEVIRTUAL: u8 = 0xb6;
    pub const INVOKESPECIAL: u8 = 0xb7;
    pub const INVOKESTATIC: u8 = 0xb8;
    pub const NEW: u8 = 0xbb;
    pub const NEWARRAY: u8 = 0xbc;
    pub const ARRAYLENGTH: u8 = 0xbe;
    pub const ATHROW: u8 = 0xbf;
    pub const IFNONNULL: u8 = 0xc7;
}

const MAX_STACK: u16 = 16;
const MAX_LOCALS: u16 = 16;

const STRING_CONCAT_FACTORY: &str = "java/lang/invoke/StringConcatFactory";
const MAKE_CONCAT_DESCRIPTOR: &str = "(Ljava/lang/invoke/MethodHandles$Lookup;Ljava/lang/String;\
Ljava/lang/invoke/MethodType;Ljava/lang/String;[Ljava/lang/Object;)Ljava/lang/invoke/CallSite;";
const REF_INVOKE_STATIC: u8 = 6;

#[derive(Default)]
pub struct ConstantPool {
    bytes: Vec<u8>,
    slots: u16,
    cache: HashMap<Vec<u8>, u16>,
    bootstrap_methods: Vec<(u16, Vec<u16>)>,
}

impl ConstantPool {
    fn add(&mut self, entry: Vec<u8>) -> u16 {
        if let Some(&index) = self.cache.get(&entry) {
            return index;
        }

        let index = self.slots + 1;
        self.slots += if matches!(entry[0], 5 | 6) { 2 } else { 1 };
        self.bytes.extend_from_slice(&entry);
        self.cache.insert(entry, index);
        index
    }

    pub fn utf8(&mut self, value: &str) -> u16 {
        let mut entry = vec![1];
        entry.extend((value.len() as u16).to_be_bytes());
        entry.extend(value.as_bytes());
        self.add(entry)
    }

    pub fn class(&mut self, name: &str) -> u16 {
        let name = self.utf8(name);
        self.add(tagged(7, &[name]))
    }

    pub fn string(&mut self, value: &str) -> u16 {
        let value = self.utf8(value);
        self.add(tagged(8, &[value]))
    }

    pub fn integer(&mut self, value: i32) -> u16 {
        let mut entry = vec![3];
        entry.extend(value.to_be_bytes());
        self.add(entry)
    }

    pub fn double(&mut self, value: f64) -> u16 {
        let mut entry = vec![6];
        entry.extend(value.to_bits().to_be_bytes());
        self.add(entry)
    }

    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        self.add(tagged(12, &[name, descriptor]))
    }

    pub fn member(&mut self, tag: u8, class: &str, name: &str, descriptor: &str) -> u16 {
        let class = self.class(class);
        let name_and_type = self.name_and_type(name, descriptor);
        self.add(tagged(tag, &[class, name_and_type]))
    }

    fn concat_call_site(&mut self, recipe: &str, descriptor: &str) -> u16 {
        let factory = self.member(10, STRING_CONCAT_FACTORY, "makeConcatWithConstants", MAKE_CONCAT_DESCRIPTOR);
        let mut handle = vec![15, REF_INVOKE_STATIC];
        handle.extend(factory.to_be_bytes());
        let handle = self.add(handle);

        let recipe = self.string(recipe);
        self.bootstrap_methods.push((handle, vec![recipe]));
        let bootstrap = self.bootstrap_methods.len() as u16 - 1;

        let name_and_type = self.name_and_type("makeConcatWithConstants", descriptor);
        self.add(tagged(18, &[bootstrap, name_and_type]))
    }
}

fn tagged(tag: u8, indexes: &[u16]) -> Vec<u8> {
    let mut entry = vec![tag];
    for index in indexes {
        entry.extend(index.to_be_bytes());
    }
    entry
}

/// The body of one method. Branches refer to named labels that are patched
/// once the method is complete.
pub struct Code<'p> {
    pool: &'p mut ConstantPool,
    bytes: Vec<u8>,
    labels: HashMap<&'static str, usize>,
    jumps: Vec<(usize, &'static str)>,
    handlers: Vec<(&'static str, &'static str, &'static str, u16)>,
}

impl<'p> Code<'p> {
    pub fn op(&mut self, opcode: u8) -> &mut Self {
        self.bytes.push(opcode);
        self
    }

    pub fn op_u8(&mut self, opcode: u8, operand: u8) -> &mut Self {
        self.bytes.extend([opcode, operand]);
        self
    }

    pub fn op_u16(&mut self, opcode: u8, operand: u16) -> &mut Self {
        self.bytes.push(opcode);
        self.bytes.extend(operand.to_be_bytes());
        self
    }

    pub fn int(&mut self, value: i32) -> &mut Self {
        match value {
            -1..=5 => self.op((op::ICONST_0 as i32 + value) as u8),
            -128..=127 => self.op_u8(op::BIPUSH, value as u8),
            -32768..=32767 => self.op_u16(op::SIPUSH, value as u16),
            _ => {
                let index = self.pool.integer(value);
                self.constant(index)
            }
        }
    }

    pub fn string(&mut self, value: &str) -> &mut Self {
        let index = self.pool.string(value);
        self.constant(index)
    }

    fn constant(&mut self, index: u16) -> &mut Self {
        match u8::try_from(index) {
            Ok(index) => self.op_u8(op::LDC, index),
            Err(_) => self.op_u16(op::LDC_W, index),
        }
    }

    pub fn double(&mut self, value: f64) -> &mut Self {
        let index = self.pool.double(value);
        self.op_u16(op::LDC2_W, index)
    }

    pub fn field(&mut self, opcode: u8, class: &str, name: &str, descriptor: &str) -> &mut Self {
        let index = self.pool.member(9, class, name, descriptor);
        self.op_u16(opcode, index)
    }

    pub fn invoke(&mut self, opcode: u8, class: &str, name: &str, descriptor: &str) -> &mut Self {
        let index = self.pool.member(10, class, name, descriptor);
        self.op_u16(opcode, index)
    }

    pub fn new_object(&mut self, class: &str) -> &mut Self {
        let index = self.pool.class(class);
        self.op_u16(op::NEW, index)
    }

    pub fn iinc(&mut self, local: u8, delta: i8) -> &mut Self {
        self.bytes.extend([op::IINC, local, delta as u8]);
        self
    }

    /// A `StringConcatFactory.makeConcatWithConstants` call site.
    pub fn concat(&mut self, recipe: &str, descriptor: &str) -> &mut Self {
        let index = self.pool.concat_call_site(recipe, descriptor);
        self.op_u16(0xba, index);
        self.bytes.extend([0, 0]);
        self
    }

    pub fn jump(&mut self, opcode: u8, label: &'static str) -> &mut Self {
        self.jumps.push((self.bytes.len(), label));
        self.bytes.extend([opcode, 0, 0]);
        self
    }

    pub fn label(&mut self, label: &'static str) -> &mut Self {
        self.labels.insert(label, self.bytes.len());
        self
    }

    pub fn handler(
        &mut self,
        start: &'static str,
        end: &'static str,
        handler: &'static str,
        catch_type: Option<&str>,
    ) -> &mut Self {
        let catch_type = catch_type.map_or(0, |name| self.pool.class(name));
        self.handlers.push((start, end, handler, catch_type));
        self
    }

    fn finish(mut self) -> (Vec<u8>, Vec<[u16; 4]>) {
        for (pc, label) in std::mem::take(&mut self.jumps) {
            let offset = (self.labels[label] as i32 - pc as i32) as i16;
            self.bytes[pc + 1..pc + 3].copy_from_slice(&offset.to_be_bytes());
        }

        let handlers = self
            .handlers
            .iter()
            .map(|(start, end, handler, catch_type)| {
                [
                    self.labels[start] as u16,
                    self.labels[end] as u16,
                    self.labels[handler] as u16,
                    *catch_type,
                ]
            })
            .collect();

        (self.bytes, handlers)
    }
}

pub struct ClassBuilder {
    pool: ConstantPool,
    access: u16,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    fields: Vec<[u16; 3]>,
    methods: Vec<u8>,
    method_count: u16,
}

impl ClassBuilder {
    pub fn new(name: &str) -> ClassBuilder {
        ClassBuilder::extending(name, "java/lang/Object")
    }

    pub fn extending(name: &str, super_class: &str) -> ClassBuilder {
        let mut pool = ConstantPool::default();
        let this_class = pool.class(name);
        let super_class = pool.class(super_class);
        ClassBuilder {
            pool,
            access: ACC_PUBLIC | ACC_SUPER,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            method_count: 0,
        }
    }

    pub fn flags(mut self, access: u16) -> ClassBuilder {
        self.access = access;
        self
    }

    pub fn implements(mut self, interface: &str) -> ClassBuilder {
        let interface = self.pool.class(interface);
        self.interfaces.push(interface);
        self
    }

    pub fn field(&mut self, access: u16, name: &str, descriptor: &str) -> &mut Self {
        let name = self.pool.utf8(name);
        let descriptor = self.pool.utf8(descriptor);
        self.fields.push([access, name, descriptor]);
        self
    }

    /// A constructor that only calls `super()`.
    pub fn default_constructor(&mut self, super_class: &str) -> &mut Self {
        let super_class = super_class.to_owned();
        self.method(ACC_PUBLIC, "<init>", "()V", |code| {
            code.op_u8(op::ALOAD, 0)
                .invoke(op::INVOKESPECIAL, &super_class, "<init>", "()V")
                .op(op::RETURN);
        })
    }

    pub fn method(
        &mut self,
        access: u16,
        name: &str,
        descriptor: &str,
        body: impl FnOnce(&mut Code),
    ) -> &mut Self {
        let name = self.pool.utf8(name);
        let descriptor = self.pool.utf8(descriptor);
        let code_name = self.pool.utf8("Code");

        let mut code = Code {
            pool: &mut self.pool,
            bytes: Vec::new(),
            labels: HashMap::new(),
            jumps: Vec::new(),
            handlers: Vec::new(),
        };
        body(&mut code);
        let (bytes, handlers) = code.finish();

        let mut attribute = Vec::new();
        attribute.extend(MAX_STACK.to_be_bytes());
        attribute.extend(MAX_LOCALS.to_be_bytes());
        attribute.extend((bytes.len() as u32).to_be_bytes());
        attribute.extend(&bytes);
        attribute.extend((handlers.len() as u16).to_be_bytes());
        for handler in handlers {
            for value in handler {
                attribute.extend(value.to_be_bytes());
            }
        }
        attribute.extend(0u16.to_be_bytes());

        self.methods.extend(access.to_be_bytes());
        self.methods.extend(name.to_be_bytes());
        self.methods.extend(descriptor.to_be_bytes());
        self.methods.extend(1u16.to_be_bytes());
        self.methods.extend(code_name.to_be_bytes());
        self.methods.extend((attribute.len() as u32).to_be_bytes());
        self.methods.extend(attribute);
        self.method_count += 1;
        self
    }

    pub fn abstract_method(&mut self, access: u16, name: &str, descriptor: &str) -> &mut Self {
        let name = self.pool.utf8(name);
        let descriptor = self.pool.utf8(descriptor);
        self.methods.extend((access | ACC_ABSTRACT).to_be_bytes());
        self.methods.extend(name.to_be_bytes());
        self.methods.extend(descriptor.to_be_bytes());
        self.methods.extend(0u16.to_be_bytes());
        self.method_count += 1;
        self
    }

    pub fn build(mut self) -> Vec<u8> {
        let bootstrap_name = self.pool.utf8("BootstrapMethods");

        let mut out = Vec::new();
        out.extend(0xcafe_babe_u32.to_be_bytes());
        out.extend(0u16.to_be_bytes());
        out.extend(61u16.to_be_bytes());
        out.extend((self.pool.slots + 1).to_be_bytes());
        out.extend(&self.pool.bytes);
        out.extend(self.access.to_be_bytes());
        out.extend(self.this_class.to_be_bytes());
        out.extend(self.super_class.to_be_bytes());
        out.extend((self.interfaces.len() as u16).to_be_bytes());
        for interface in &self.interfaces {
            out.extend(interface.to_be_bytes());
        }

        out.extend((self.fields.len() as u16).to_be_bytes());
        for field in &self.fields {
            for value in field {
                out.extend(value.to_be_bytes());
            }
            out.extend(0u16.to_be_bytes());
        }

        out.extend(self.method_count.to_be_bytes());
        out.extend(&self.methods);

        if self.pool.bootstrap_methods.is_empty() {
            out.extend(0u16.to_be_bytes());
        } else {
            let mut attribute = Vec::new();
            attribute.extend((self.pool.bootstrap_methods.len() as u16).to_be_bytes());
            for (handle, arguments) in &self.pool.bootstrap_methods {
                attribute.extend(handle.to_be_bytes());
                attribute.extend((arguments.len() as u16).to_be_bytes());
                for argument in arguments {
                    attribute.extend(argument.to_be_bytes());
                }
            }

            out.extend(1u16.to_be_bytes());
            out.extend(bootstrap_name.to_be_bytes());
            out.extend((attribute.len() as u32).to_be_bytes());
            out.extend(attribute);
        }

        out
    }
}
