use std::cell::Cell;
use std::io;

use color_eyre::eyre::{self, bail, eyre, ContextCompat};

use crate::class::{Class, Method, MethodBody};
use crate::class_file::constant_pool::ConstantInfo;
use crate::descriptor::{parse_field_descriptor, parse_method_descriptor, BaseType, FieldType};
use crate::format;
use crate::heap::ObjectData;
use crate::instructions::{
    ArrayLoadStoreType, ArrayType, EqCondition, Instruction, IntegerType, InvokeKind, NumberType,
    OrdCondition, ReturnType,
};
use crate::jdk;
use crate::vm::Vm;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum JvmValue {
    /// Also carries `boolean`, `byte`, `char` and `short` values.
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    /// A heap reference, `0` is `null`.
    Reference(usize),
}

impl JvmValue {
    pub const NULL: JvmValue = JvmValue::Reference(0);

    pub fn default_for(field_type: &FieldType) -> JvmValue {
        match field_type {
            FieldType::Base(BaseType::Long) => JvmValue::Long(0),
            FieldType::Base(BaseType::Float) => JvmValue::Float(0.0),
            FieldType::Base(BaseType::Double) => JvmValue::Double(0.0),
            FieldType::Base(BaseType::Object(_)) | FieldType::Array(..) => JvmValue::NULL,
            FieldType::Base(_) => JvmValue::Int(0),
        }
    }

    pub fn as_int(self) -> eyre::Result<i32> {
        match self {
            JvmValue::Int(v) => Ok(v),
            other => bail!("expected int, found {other:?}"),
        }
    }

    pub fn as_long(self) -> eyre::Result<i64> {
        match self {
            JvmValue::Long(v) => Ok(v),
            other => bail!("expected long, found {other:?}"),
        }
    }

    pub fn as_float(self) -> eyre::Result<f32> {
        match self {
            JvmValue::Float(v) => Ok(v),
            other => bail!("expected float, found {other:?}"),
        }
    }

    pub fn as_double(self) -> eyre::Result<f64> {
        match self {
            JvmValue::Double(v) => Ok(v),
            other => bail!("expected double, found {other:?}"),
        }
    }

    pub fn as_reference(self) -> eyre::Result<usize> {
        match self {
            JvmValue::Reference(v) => Ok(v),
            other => bail!("expected reference, found {other:?}"),
        }
    }

    /// Whether the value occupies two local variable slots.
    pub fn is_wide(self) -> bool {
        matches!(self, JvmValue::Long(_) | JvmValue::Double(_))
    }
}

/// Abrupt completion of a method.
#[derive(Debug)]
pub enum Trap {
    /// A guest exception, propagated through exception tables.
    Thrown(usize),
    /// An engine error, never catchable by guest code.
    Fault(eyre::Report),
}

pub type ExecResult<T> = Result<T, Trap>;

impl From<eyre::Report> for Trap {
    fn from(report: eyre::Report) -> Trap {
        Trap::Fault(report)
    }
}

impl From<io::Error> for Trap {
    fn from(error: io::Error) -> Trap {
        Trap::Fault(error.into())
    }
}

enum Flow {
    Next,
    Jump(usize),
    Return(Option<JvmValue>),
}

#[derive(Clone, Copy)]
enum Arithmetic {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Clone, Copy)]
enum Shift {
    Left,
    Right,
    UnsignedRight,
}

#[derive(Clone, Copy)]
enum Bitwise {
    And,
    Or,
    Xor,
}

pub struct CallFrame<'a, 'b> {
    class: &'a Class<'a>,
    method: &'a Method<'a>,
    body: &'a MethodBody<'a>,
    locals: Vec<JvmValue>,
    operand_stack: Vec<JvmValue>,
    vm: &'b mut Vm<'a>,
}

impl<'a, 'b> CallFrame<'a, 'b> {
    /// `args` includes the receiver for instance methods.
    pub fn new(
        class: &'a Class<'a>,
        method: &'a Method<'a>,
        args: &[JvmValue],
        vm: &'b mut Vm<'a>,
    ) -> eyre::Result<CallFrame<'a, 'b>> {
        let body = method.body.as_ref().wrap_err_with(|| {
            eyre!("missing method body for {}.{}{}", class.name(), method.name, method.descriptor)
        })?;

        let arg_slots: usize = args.iter().map(|arg| if arg.is_wide() { 2 } else { 1 }).sum();
        let mut locals = vec![JvmValue::Int(0); body.locals.max(arg_slots)];

        let mut slot = 0;
        for arg in args {
            locals[slot] = *arg;
            slot += if arg.is_wide() { 2 } else { 1 };
        }

        Ok(CallFrame {
            class,
            method,
            body,
            locals,
            operand_stack: Vec::with_capacity(body.stack_size),
            vm,
        })
    }

    pub fn execute(mut self) -> ExecResult<Option<JvmValue>> {
        let mut pc = 0;

        loop {
            let instruction = *self
                .body
                .code
                .instructions
                .get(pc)
                .wrap_err("execution ran past the end of the method")?;

            match self.step(instruction) {
                Ok(Flow::Next) => pc += 1,
                Ok(Flow::Jump(target)) => pc = target,
                Ok(Flow::Return(value)) => return Ok(value),
                Err(Trap::Thrown(exception)) => match self.find_handler(pc, exception)? {
                    Some(handler) => {
                        self.operand_stack.clear();
                        self.operand_stack.push(JvmValue::Reference(exception));
                        pc = handler;
                    }
                    None => return Err(Trap::Thrown(exception)),
                },
                Err(Trap::Fault(report)) => {
                    return Err(Trap::Fault(report.wrap_err(format!(
                        "in {}.{}{} at instruction {pc} ({instruction:?})",
                        self.class.name(),
                        self.method.name,
                        self.method.descriptor
                    ))))
                }
            }
        }
    }

    fn find_handler(&self, pc: usize, exception: usize) -> eyre::Result<Option<usize>> {
        let class = self.vm.class_of(exception)?;
        Ok(self
            .body
            .handlers
            .iter()
            .find(|handler| {
                handler.start <= pc
                    && pc < handler.end
                    && handler
                        .catch_type
                        .map_or(true, |catch_type| class.is_subclass_of(catch_type))
            })
            .map(|handler| handler.handler))
    }

    fn step(&mut self, instruction: Instruction<'a>) -> ExecResult<Flow> {
        match instruction {
            Instruction::nop => {}
            Instruction::aconst_null => self.push(JvmValue::NULL),
            Instruction::r#const { data_type, value } => self.push(match data_type {
                NumberType::Int => JvmValue::Int(value as i32),
                NumberType::Long => JvmValue::Long(value as i64),
                NumberType::Float => JvmValue::Float(value as f32),
                NumberType::Double => JvmValue::Double(value as f64),
            }),
            Instruction::bipush { value } => self.push(JvmValue::Int(value as i32)),
            Instruction::sipush { value } => self.push(JvmValue::Int(value as i32)),
            Instruction::ldc { index } | Instruction::ldc2 { index } => {
                let value = self.load_constant(index)?;
                self.push(value);
            }
            Instruction::load { index, .. } => {
                let value = *self
                    .locals
                    .get(index as usize)
                    .wrap_err_with(|| eyre!("local {index} out of range"))?;
                self.push(value);
            }
            Instruction::store { index, .. } => {
                let value = self.pop()?;
                let slot = self
                    .locals
                    .get_mut(index as usize)
                    .wrap_err_with(|| eyre!("local {index} out of range"))?;
                *slot = value;
            }
            Instruction::arrayload { data_type } => {
                let index = self.pop_int()?;
                let array = self.pop_reference()?;
                let array = self.non_null(array, || {
                    format!("Cannot load from {} array", array_kind(data_type))
                })?;
                let element = self.array_slot(array, index)?;
                self.push(element);
            }
            Instruction::arraystore { data_type } => {
                let value = self.pop()?;
                let index = self.pop_int()?;
                let array = self.pop_reference()?;
                let array = self.non_null(array, || {
                    format!("Cannot store to {} array", array_kind(data_type))
                })?;
                self.array_store(array, index, value)?;
            }
            Instruction::pop => {
                self.pop_slots(1)?;
            }
            Instruction::pop2 => {
                self.pop_slots(2)?;
            }
            Instruction::dup => self.duplicate(1, 0)?,
            Instruction::dup_x1 => self.duplicate(1, 1)?,
            Instruction::dup_x2 => self.duplicate(1, 2)?,
            Instruction::dup2 => self.duplicate(2, 0)?,
            Instruction::dup2_x1 => self.duplicate(2, 1)?,
            Instruction::dup2_x2 => self.duplicate(2, 2)?,
            Instruction::swap => {
                let top = self.pop_slots(1)?;
                let below = self.pop_slots(1)?;
                self.operand_stack.extend(top);
                self.operand_stack.extend(below);
            }
            Instruction::add { data_type } => self.arithmetic(Arithmetic::Add, data_type)?,
            Instruction::sub { data_type } => self.arithmetic(Arithmetic::Sub, data_type)?,
            Instruction::mul { data_type } => self.arithmetic(Arithmetic::Mul, data_type)?,
            Instruction::div { data_type } => self.arithmetic(Arithmetic::Div, data_type)?,
            Instruction::rem { data_type } => self.arithmetic(Arithmetic::Rem, data_type)?,
            Instruction::neg { data_type } => {
                let value = match data_type {
                    NumberType::Int => JvmValue::Int(self.pop_int()?.wrapping_neg()),
                    NumberType::Long => JvmValue::Long(self.pop_long()?.wrapping_neg()),
                    NumberType::Float => JvmValue::Float(-self.pop_float()?),
                    NumberType::Double => JvmValue::Double(-self.pop_double()?),
                };
                self.push(value);
            }
            Instruction::shl { data_type } => self.shift(Shift::Left, data_type)?,
            Instruction::shr { data_type } => self.shift(Shift::Right, data_type)?,
            Instruction::ushr { data_type } => self.shift(Shift::UnsignedRight, data_type)?,
            Instruction::and { data_type } => self.bitwise(Bitwise::And, data_type)?,
            Instruction::or { data_type } => self.bitwise(Bitwise::Or, data_type)?,
            Instruction::xor { data_type } => self.bitwise(Bitwise::Xor, data_type)?,
            Instruction::inc { index, value } => {
                let slot = self
                    .locals
                    .get_mut(index as usize)
                    .wrap_err_with(|| eyre!("local {index} out of range"))?;
                *slot = JvmValue::Int(slot.as_int()?.wrapping_add(value as i32));
            }
            Instruction::i2l => {
                let v = self.pop_int()?;
                self.push(JvmValue::Long(v as i64));
            }
            Instruction::i2f => {
                let v = self.pop_int()?;
                self.push(JvmValue::Float(v as f32));
            }
            Instruction::i2d => {
                let v = self.pop_int()?;
                self.push(JvmValue::Double(v as f64));
            }
            Instruction::l2i => {
                let v = self.pop_long()?;
                self.push(JvmValue::Int(v as i32));
            }
            Instruction::l2f => {
                let v = self.pop_long()?;
                self.push(JvmValue::Float(v as f32));
            }
            Instruction::l2d => {
                let v = self.pop_long()?;
                self.push(JvmValue::Double(v as f64));
            }
            // Float to integer casts saturate and map NaN to zero, as Java requires.
            Instruction::f2i => {
                let v = self.pop_float()?;
                self.push(JvmValue::Int(v as i32));
            }
            Instruction::f2l => {
                let v = self.pop_float()?;
                self.push(JvmValue::Long(v as i64));
            }
            Instruction::f2d => {
                let v = self.pop_float()?;
                self.push(JvmValue::Double(v as f64));
            }
            Instruction::d2i => {
                let v = self.pop_double()?;
                self.push(JvmValue::Int(v as i32));
            }
            Instruction::d2l => {
                let v = self.pop_double()?;
                self.push(JvmValue::Long(v as i64));
            }
            Instruction::d2f => {
                let v = self.pop_double()?;
                self.push(JvmValue::Float(v as f32));
            }
            Instruction::i2b => {
                let v = self.pop_int()?;
                self.push(JvmValue::Int(v as i8 as i32));
            }
            Instruction::i2c => {
                let v = self.pop_int()?;
                self.push(JvmValue::Int(v as u16 as i32));
            }
            Instruction::i2s => {
                let v = self.pop_int()?;
                self.push(JvmValue::Int(v as i16 as i32));
            }
            Instruction::lcmp => {
                let b = self.pop_long()?;
                let a = self.pop_long()?;
                self.push(JvmValue::Int(a.cmp(&b) as i32));
            }
            Instruction::fcmp { nan } => {
                let b = self.pop_float()?;
                let a = self.pop_float()?;
                self.push(JvmValue::Int(compare_floating(a.partial_cmp(&b), nan)));
            }
            Instruction::dcmp { nan } => {
                let b = self.pop_double()?;
                let a = self.pop_double()?;
                self.push(JvmValue::Int(compare_floating(a.partial_cmp(&b), nan)));
            }
            Instruction::r#if { condition, target } => {
                let value = self.pop_int()?;
                if condition.test(value.cmp(&0)) {
                    return Ok(Flow::Jump(target));
                }
            }
            Instruction::if_icmp { condition, target } => {
                let b = self.pop_int()?;
                let a = self.pop_int()?;
                if condition.test(a.cmp(&b)) {
                    return Ok(Flow::Jump(target));
                }
            }
            Instruction::if_acmp { condition, target } => {
                let b = self.pop_reference()?;
                let a = self.pop_reference()?;
                let taken = match condition {
                    EqCondition::Eq => a == b,
                    EqCondition::Ne => a != b,
                };
                if taken {
                    return Ok(Flow::Jump(target));
                }
            }
            Instruction::ifnull { target } => {
                if self.pop_reference()? == 0 {
                    return Ok(Flow::Jump(target));
                }
            }
            Instruction::ifnonnull { target } => {
                if self.pop_reference()? != 0 {
                    return Ok(Flow::Jump(target));
                }
            }
            Instruction::goto { target } => return Ok(Flow::Jump(target)),
            Instruction::tableswitch {
                default,
                low,
                targets,
            } => {
                let key = self.pop_int()? as i64;
                let target = usize::try_from(key - low as i64)
                    .ok()
                    .and_then(|offset| targets.get(offset))
                    .copied()
                    .unwrap_or(default);
                return Ok(Flow::Jump(target));
            }
            Instruction::lookupswitch { default, pairs } => {
                let key = self.pop_int()?;
                let target = pairs
                    .iter()
                    .find(|(value, _)| *value == key)
                    .map_or(default, |(_, target)| *target);
                return Ok(Flow::Jump(target));
            }
            Instruction::r#return { data_type } => {
                return Ok(Flow::Return(match data_type {
                    ReturnType::Void => None,
                    _ => Some(self.pop()?),
                }));
            }
            Instruction::getstatic { index } => {
                let field = self.static_field(index)?;
                self.push(field.get());
            }
            Instruction::putstatic { index } => {
                let field = self.static_field(index)?;
                field.set(self.pop()?);
            }
            Instruction::getfield { index } => {
                let field = self.class.constant_pool().member_ref(index)?;
                let object = self.pop_reference()?;
                let object = self.non_null(object, || {
                    format!("Cannot read field \"{}\"", field.name)
                })?;
                let owner = self.field_owner(field.class_name, field.name)?;
                let value = self.vm.heap.get(object)?.field(owner, field.name)?;
                self.push(value);
            }
            Instruction::putfield { index } => {
                let field = self.class.constant_pool().member_ref(index)?;
                let value = self.pop()?;
                let object = self.pop_reference()?;
                let object = self.non_null(object, || {
                    format!("Cannot assign field \"{}\"", field.name)
                })?;
                let owner = self.field_owner(field.class_name, field.name)?;
                self.vm
                    .heap
                    .get_mut(object)?
                    .set_field(owner, field.name, value)?;
            }
            Instruction::invoke {
                kind: InvokeKind::Dynamic,
                index,
            } => self.invoke_dynamic(index)?,
            Instruction::invoke { kind, index } => self.invoke(kind, index)?,
            Instruction::new { index } => {
                let class_name = self.class.constant_pool().class_name(index)?;
                let class = self.vm.class(class_name)?;
                if class.is_abstract() {
                    return Err(self
                        .vm
                        .throw(jdk::INSTANTIATION_ERROR, Some(class.java_name())));
                }
                self.vm.initialize(class)?;
                let object = self.vm.new_object(class);
                self.push(JvmValue::Reference(object));
            }
            Instruction::newarray { atype } => {
                let length = self.pop_int()?;
                let array = self.vm.new_array(primitive_component(atype), length)?;
                self.push(JvmValue::Reference(array));
            }
            Instruction::anewarray { index } => {
                let component = self.class_type(index)?;
                let length = self.pop_int()?;
                let array = self.vm.new_array(component, length)?;
                self.push(JvmValue::Reference(array));
            }
            Instruction::multianewarray { index, dimensions } => {
                let class_name = self.class.constant_pool().class_name(index)?;
                let array_type = parse_field_descriptor(class_name)?.field_type;
                let lengths = self
                    .pop_values(dimensions as usize)?
                    .into_iter()
                    .map(JvmValue::as_int)
                    .collect::<eyre::Result<Vec<_>>>()?;
                let array = self.new_multi_array(array_type, &lengths)?;
                self.push(JvmValue::Reference(array));
            }
            Instruction::arraylength => {
                let array = self.pop_reference()?;
                let array = self.non_null(array, || "Cannot read the array length".to_owned())?;
                let length = match &self.vm.heap.get(array)?.data {
                    ObjectData::Array { elements, .. } => elements.len(),
                    _ => return Err(eyre!("arraylength on a non-array object").into()),
                };
                self.push(JvmValue::Int(length as i32));
            }
            Instruction::athrow => {
                let exception = self.pop_reference()?;
                let exception =
                    self.non_null(exception, || "Cannot throw exception".to_owned())?;
                return Err(Trap::Thrown(exception));
            }
            Instruction::checkcast { index } => {
                let target = self.class.constant_pool().class_name(index)?;
                let object = self.peek_reference()?;
                if object != 0 && !self.vm.is_instance_of(object, target)? {
                    let source = self.vm.class_of(object)?.java_name();
                    let message = format!(
                        "class {source} cannot be cast to class {}",
                        target.replace('/', ".")
                    );
                    return Err(self.vm.throw(jdk::CLASS_CAST, Some(message)));
                }
            }
            Instruction::instanceof { index } => {
                let target = self.class.constant_pool().class_name(index)?;
                let object = self.pop_reference()?;
                let matches = object != 0 && self.vm.is_instance_of(object, target)?;
                self.push(JvmValue::Int(matches as i32));
            }
            Instruction::monitorenter | Instruction::monitorexit => {
                let object = self.pop_reference()?;
                self.non_null(object, || "Cannot enter synchronized block".to_owned())?;
            }
        }

        Ok(Flow::Next)
    }

    fn push(&mut self, value: JvmValue) {
        self.operand_stack.push(value);
    }

    fn pop(&mut self) -> eyre::Result<JvmValue> {
        self.operand_stack
            .pop()
            .wrap_err("operand stack underflow")
    }

    fn pop_int(&mut self) -> eyre::Result<i32> {
        self.pop()?.as_int()
    }

    fn pop_long(&mut self) -> eyre::Result<i64> {
        self.pop()?.as_long()
    }

    fn pop_float(&mut self) -> eyre::Result<f32> {
        self.pop()?.as_float()
    }

    fn pop_double(&mut self) -> eyre::Result<f64> {
        self.pop()?.as_double()
    }

    fn pop_reference(&mut self) -> eyre::Result<usize> {
        self.pop()?.as_reference()
    }

    fn peek_reference(&self) -> eyre::Result<usize> {
        self.operand_stack
            .last()
            .wrap_err("operand stack underflow")?
            .as_reference()
    }

    /// Pops `count` values, returned in the order they were pushed.
    fn pop_values(&mut self, count: usize) -> eyre::Result<Vec<JvmValue>> {
        let at = self
            .operand_stack
            .len()
            .checked_sub(count)
            .wrap_err("operand stack underflow")?;
        Ok(self.operand_stack.split_off(at))
    }

    /// Pops values covering exactly `slots` computational slots.
    fn pop_slots(&mut self, slots: usize) -> eyre::Result<Vec<JvmValue>> {
        let mut taken = 0;
        let mut count = 0;
        for value in self.operand_stack.iter().rev() {
            if taken >= slots {
                break;
            }
            taken += if value.is_wide() { 2 } else { 1 };
            count += 1;
        }
        if taken != slots {
            bail!("cannot split a {slots}-slot operand from the stack");
        }
        self.pop_values(count)
    }

    /// Implements the `dup` family: copies the top `slots` and inserts the copy
    /// below the `skip` slots underneath them.
    fn duplicate(&mut self, slots: usize, skip: usize) -> eyre::Result<()> {
        let top = self.pop_slots(slots)?;
        let below = self.pop_slots(skip)?;
        self.operand_stack.extend_from_slice(&top);
        self.operand_stack.extend(below);
        self.operand_stack.extend(top);
        Ok(())
    }

    fn non_null(&mut self, reference: usize, message: impl FnOnce() -> String) -> ExecResult<usize> {
        if reference == 0 {
            Err(self.vm.throw(jdk::NULL_POINTER, Some(message())))
        } else {
            Ok(reference)
        }
    }

    fn arithmetic(&mut self, op: Arithmetic, data_type: NumberType) -> ExecResult<()> {
        let result = match data_type {
            NumberType::Int => {
                let b = self.pop_int()?;
                let a = self.pop_int()?;
                JvmValue::Int(match op {
                    Arithmetic::Add => a.wrapping_add(b),
                    Arithmetic::Sub => a.wrapping_sub(b),
                    Arithmetic::Mul => a.wrapping_mul(b),
                    Arithmetic::Div | Arithmetic::Rem if b == 0 => {
                        return Err(self.divide_by_zero())
                    }
                    Arithmetic::Div => a.wrapping_div(b),
                    Arithmetic::Rem => a.wrapping_rem(b),
                })
            }
            NumberType::Long => {
                let b = self.pop_long()?;
                let a = self.pop_long()?;
                JvmValue::Long(match op {
                    Arithmetic::Add => a.wrapping_add(b),
                    Arithmetic::Sub => a.wrapping_sub(b),
                    Arithmetic::Mul => a.wrapping_mul(b),
                    Arithmetic::Div | Arithmetic::Rem if b == 0 => {
                        return Err(self.divide_by_zero())
                    }
                    Arithmetic::Div => a.wrapping_div(b),
                    Arithmetic::Rem => a.wrapping_rem(b),
                })
            }
            NumberType::Float => {
                let b = self.pop_float()?;
                let a = self.pop_float()?;
                JvmValue::Float(match op {
                    Arithmetic::Add => a + b,
                    Arithmetic::Sub => a - b,
                    Arithmetic::Mul => a * b,
                    Arithmetic::Div => a / b,
                    Arithmetic::Rem => a % b,
                })
            }
            NumberType::Double => {
                let b = self.pop_double()?;
                let a = self.pop_double()?;
                JvmValue::Double(match op {
                    Arithmetic::Add => a + b,
                    Arithmetic::Sub => a - b,
                    Arithmetic::Mul => a * b,
                    Arithmetic::Div => a / b,
                    Arithmetic::Rem => a % b,
                })
            }
        };
        self.push(result);
        Ok(())
    }

    fn divide_by_zero(&mut self) -> Trap {
        self.vm.throw(jdk::ARITHMETIC, Some("/ by zero".to_owned()))
    }

    fn shift(&mut self, op: Shift, data_type: IntegerType) -> eyre::Result<()> {
        let distance = self.pop_int()?;
        let result = match data_type {
            IntegerType::Int => {
                let value = self.pop_int()?;
                let distance = (distance & 0x1f) as u32;
                JvmValue::Int(match op {
                    Shift::Left => value << distance,
                    Shift::Right => value >> distance,
                    Shift::UnsignedRight => ((value as u32) >> distance) as i32,
                })
            }
            IntegerType::Long => {
                let value = self.pop_long()?;
                let distance = (distance & 0x3f) as u32;
                JvmValue::Long(match op {
                    Shift::Left => value << distance,
                    Shift::Right => value >> distance,
                    Shift::UnsignedRight => ((value as u64) >> distance) as i64,
                })
            }
        };
        self.push(result);
        Ok(())
    }

    fn bitwise(&mut self, op: Bitwise, data_type: IntegerType) -> eyre::Result<()> {
        let result = match data_type {
            IntegerType::Int => {
                let b = self.pop_int()?;
                let a = self.pop_int()?;
                JvmValue::Int(match op {
                    Bitwise::And => a & b,
                    Bitwise::Or => a | b,
                    Bitwise::Xor => a ^ b,
                })
            }
            IntegerType::Long => {
                let b = self.pop_long()?;
                let a = self.pop_long()?;
                JvmValue::Long(match op {
                    Bitwise::And => a & b,
                    Bitwise::Or => a | b,
                    Bitwise::Xor => a ^ b,
                })
            }
        };
        self.push(result);
        Ok(())
    }

    fn load_constant(&mut self, index: u16) -> ExecResult<JvmValue> {
        let pool = self.class.constant_pool();
        Ok(match pool.entry(index)? {
            ConstantInfo::Integer(v) => JvmValue::Int(*v),
            ConstantInfo::Float(v) => JvmValue::Float(*v),
            ConstantInfo::Long(v) => JvmValue::Long(*v),
            ConstantInfo::Double(v) => JvmValue::Double(*v),
            ConstantInfo::String(string) => {
                JvmValue::Reference(self.vm.intern(pool.utf8(string.string_index)?)?)
            }
            other => return Err(eyre!("unsupported constant for ldc: {other:?}").into()),
        })
    }

    /// The type named by a class constant, which is either a class name or an
    /// array descriptor.
    fn class_type(&self, index: u16) -> eyre::Result<FieldType<'a>> {
        let name = self.class.constant_pool().class_name(index)?;
        if name.starts_with('[') {
            Ok(parse_field_descriptor(name)?.field_type)
        } else {
            Ok(FieldType::Base(BaseType::Object(name)))
        }
    }

    fn static_field(&mut self, index: u16) -> ExecResult<&'a Cell<JvmValue>> {
        let field = self.class.constant_pool().member_ref(index)?;
        let class = self.vm.class(field.class_name)?;
        self.vm.initialize(class)?;
        match class.static_field(field.name) {
            Some(cell) => Ok(cell),
            None => Err(self.vm.throw(
                jdk::NO_SUCH_FIELD,
                Some(format!("{}.{}", class.java_name(), field.name)),
            )),
        }
    }

    /// Resolves an instance field reference to the class that declares it.
    fn field_owner(&mut self, class_name: &str, name: &str) -> ExecResult<&'a str> {
        let class = self.vm.class(class_name)?;
        match class.field_owner(name) {
            Some(owner) => Ok(owner.name()),
            None => Err(self.vm.throw(
                jdk::NO_SUCH_FIELD,
                Some(format!("{}.{name}", class.java_name())),
            )),
        }
    }

    fn array_slot(&mut self, array: usize, index: i32) -> ExecResult<JvmValue> {
        let element = match &self.vm.heap.get(array)?.data {
            ObjectData::Array { elements, .. } => usize::try_from(index)
                .ok()
                .and_then(|i| elements.get(i))
                .copied()
                .ok_or(elements.len()),
            _ => return Err(eyre!("array access on a non-array object").into()),
        };

        element.map_err(|length| self.out_of_bounds(index, length))
    }

    fn array_store(&mut self, array: usize, index: i32, value: JvmValue) -> ExecResult<()> {
        let (component, length) = match &self.vm.heap.get(array)?.data {
            ObjectData::Array {
                component,
                elements,
            } => (*component, elements.len()),
            _ => return Err(eyre!("array access on a non-array object").into()),
        };

        let slot = match usize::try_from(index) {
            Ok(slot) if slot < length => slot,
            _ => return Err(self.out_of_bounds(index, length)),
        };

        let value = match (component, value) {
            (FieldType::Base(BaseType::Boolean), JvmValue::Int(v)) => JvmValue::Int(v & 1),
            (FieldType::Base(BaseType::Byte), JvmValue::Int(v)) => JvmValue::Int(v as i8 as i32),
            (FieldType::Base(BaseType::Char), JvmValue::Int(v)) => JvmValue::Int(v as u16 as i32),
            (FieldType::Base(BaseType::Short), JvmValue::Int(v)) => {
                JvmValue::Int(v as i16 as i32)
            }
            (component, JvmValue::Reference(reference)) if component.is_reference() => {
                if reference != 0 {
                    let target = match component {
                        FieldType::Base(BaseType::Object(name)) => name.to_owned(),
                        array => array.to_descriptor(),
                    };
                    if !self.vm.is_instance_of(reference, &target)? {
                        let name = self.vm.class_of(reference)?.java_name();
                        return Err(self.vm.throw(jdk::ARRAY_STORE, Some(name)));
                    }
                }
                value
            }
            (_, value) => value,
        };

        if let ObjectData::Array { elements, .. } = &mut self.vm.heap.get_mut(array)?.data {
            elements[slot] = value;
        }
        Ok(())
    }

    fn out_of_bounds(&mut self, index: i32, length: usize) -> Trap {
        self.vm.throw(
            jdk::ARRAY_INDEX_OUT_OF_BOUNDS,
            Some(format!("Index {index} out of bounds for length {length}")),
        )
    }

    fn new_multi_array(&mut self, array_type: FieldType<'a>, lengths: &[i32]) -> ExecResult<usize> {
        let component = array_type
            .component()
            .wrap_err("multianewarray on a non-array type")?;
        let (&length, rest) = lengths
            .split_first()
            .wrap_err("multianewarray without dimensions")?;

        if length < 0 {
            return Err(self
                .vm
                .throw(jdk::NEGATIVE_ARRAY_SIZE, Some(length.to_string())));
        }

        let array = self.vm.new_array(component, length)?;
        if !rest.is_empty() {
            for i in 0..length as usize {
                let inner = self.new_multi_array(component, rest)?;
                if let ObjectData::Array { elements, .. } = &mut self.vm.heap.get_mut(array)?.data
                {
                    elements[i] = JvmValue::Reference(inner);
                }
            }
        }
        Ok(array)
    }

    fn invoke(&mut self, kind: InvokeKind, index: u16) -> ExecResult<()> {
        let target = self.class.constant_pool().member_ref(index)?;

        let result = match kind {
            InvokeKind::Static => {
                let class = self.vm.class(target.class_name)?;
                self.vm.initialize(class)?;
                let (declaring, method) =
                    self.resolve(class, target.name, target.descriptor)?;
                let args = self.pop_values(method.params.len())?;
                self.vm.invoke(declaring, method, &args)?
            }
            InvokeKind::Special => {
                let class = self.vm.class(target.class_name)?;
                let (declaring, method) =
                    self.resolve(class, target.name, target.descriptor)?;
                let args = self.pop_values(method.params.len() + 1)?;
                self.non_null(args[0].as_reference()?, || {
                    invoke_npe_message(class, target.name)
                })?;
                self.vm.invoke(declaring, method, &args)?
            }
            InvokeKind::Virtual | InvokeKind::Interface => {
                let class = self.vm.class(target.class_name)?;
                let (_, method) = self.resolve(class, target.name, target.descriptor)?;
                let args = self.pop_values(method.params.len() + 1)?;
                let receiver = self.non_null(args[0].as_reference()?, || {
                    invoke_npe_message(class, target.name)
                })?;
                let runtime_class = self.vm.class_of(receiver)?;
                let (declaring, method) = runtime_class
                    .resolve_method(target.name, target.descriptor)
                    .unwrap_or((class, method));
                self.vm.invoke(declaring, method, &args)?
            }
            InvokeKind::Dynamic => {
                return Err(eyre!("invokedynamic dispatched as a method call").into())
            }
        };

        if let Some(value) = result {
            self.push(value);
        }
        Ok(())
    }

    fn resolve(
        &mut self,
        class: &'a Class<'a>,
        name: &str,
        descriptor: &str,
    ) -> ExecResult<(&'a Class<'a>, &'a Method<'a>)> {
        match class.resolve_method(name, descriptor) {
            Some(found) => Ok(found),
            None => Err(self.vm.throw(
                jdk::NO_SUCH_METHOD,
                Some(format!("'{}.{name}{descriptor}'", class.java_name())),
            )),
        }
    }

    /// Only `StringConcatFactory` call sites are linked; they are evaluated
    /// directly rather than through a method handle.
    fn invoke_dynamic(&mut self, index: u16) -> ExecResult<()> {
        let pool = self.class.constant_pool();
        let ConstantInfo::InvokeDynamic(call_site) = pool.entry(index)? else {
            return Err(eyre!("expected invokedynamic constant at #{index}").into());
        };

        let (_, descriptor) = pool.name_and_type(call_site.name_and_type_index)?;
        let bootstrap = self
            .class
            .bootstrap_method(call_site.bootstrap_method_attr_index)?;
        let ConstantInfo::MethodHandle(handle) = pool.entry(bootstrap.bootstrap_method_ref)?
        else {
            return Err(eyre!("bootstrap method is not a method handle").into());
        };
        let factory = pool.member_ref(handle.reference_index)?;

        if factory.class_name != "java/lang/invoke/StringConcatFactory" {
            return Err(eyre!(
                "unsupported invokedynamic bootstrap {}.{}",
                factory.class_name,
                factory.name
            )
            .into());
        }

        let call_type = parse_method_descriptor(descriptor)?;
        let args = self.pop_values(call_type.params.len())?;

        let recipe = match factory.name {
            "makeConcatWithConstants" => {
                let recipe_index = *bootstrap
                    .bootstrap_arguments
                    .first()
                    .wrap_err("makeConcatWithConstants without a recipe")?;
                match pool.entry(recipe_index)? {
                    ConstantInfo::String(string) => pool.utf8(string.string_index)?.to_owned(),
                    other => return Err(eyre!("invalid concat recipe {other:?}").into()),
                }
            }
            "makeConcat" => "\u{1}".repeat(args.len()),
            other => return Err(eyre!("unsupported StringConcatFactory method {other}").into()),
        };

        let mut constants = bootstrap.bootstrap_arguments.iter().skip(1);
        let mut values = args.iter().zip(call_type.params.iter());
        let mut out = String::new();

        for c in recipe.chars() {
            match c {
                '\u{1}' => {
                    let (value, param) = values
                        .next()
                        .wrap_err("concat recipe is missing an argument")?;
                    out.push_str(&format::java_text(self.vm, *value, param)?);
                }
                '\u{2}' => {
                    let index = *constants
                        .next()
                        .wrap_err("concat recipe is missing a constant")?;
                    out.push_str(&constant_text(self.class, index)?);
                }
                c => out.push(c),
            }
        }

        let string = self.vm.new_string(&out)?;
        self.push(JvmValue::Reference(string));
        Ok(())
    }
}

fn compare_floating(ordering: Option<std::cmp::Ordering>, nan: OrdCondition) -> i32 {
    match (ordering, nan) {
        (Some(ordering), _) => ordering as i32,
        (None, OrdCondition::Lt) => -1,
        (None, OrdCondition::Gt) => 1,
    }
}

fn primitive_component(atype: ArrayType) -> FieldType<'static> {
    FieldType::Base(match atype {
        ArrayType::Boolean => BaseType::Boolean,
        ArrayType::Char => BaseType::Char,
        ArrayType::Float => BaseType::Float,
        ArrayType::Double => BaseType::Double,
        ArrayType::Byte => BaseType::Byte,
        ArrayType::Short => BaseType::Short,
        ArrayType::Int => BaseType::Int,
        ArrayType::Long => BaseType::Long,
    })
}

fn array_kind(data_type: ArrayLoadStoreType) -> &'static str {
    match data_type {
        ArrayLoadStoreType::Int => "int",
        ArrayLoadStoreType::Long => "long",
        ArrayLoadStoreType::Float => "float",
        ArrayLoadStoreType::Double => "double",
        ArrayLoadStoreType::Reference => "object",
        ArrayLoadStoreType::Byte => "byte/boolean",
        ArrayLoadStoreType::Char => "char",
        ArrayLoadStoreType::Short => "short",
    }
}

fn invoke_npe_message(class: &Class, name: &str) -> String {
    format!("Cannot invoke \"{}.{name}()\"", class.java_name())
}

fn constant_text(class: &Class, index: u16) -> eyre::Result<String> {
    let pool = class.constant_pool();
    Ok(match pool.entry(index)? {
        ConstantInfo::String(string) => pool.utf8(string.string_index)?.to_owned(),
        ConstantInfo::Integer(v) => v.to_string(),
        ConstantInfo::Long(v) => v.to_string(),
        ConstantInfo::Float(v) => format::float_to_string(*v),
        ConstantInfo::Double(v) => format::double_to_string(*v),
        other => bail!("unsupported concat constant {other:?}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_field_types() {
        assert_eq!(JvmValue::default_for(&FieldType::Base(BaseType::Long)), JvmValue::Long(0));
        assert_eq!(JvmValue::default_for(&FieldType::Base(BaseType::Char)), JvmValue::Int(0));
        assert_eq!(JvmValue::default_for(&FieldType::Array(1, BaseType::Int)), JvmValue::NULL);
        assert!(JvmValue::Double(1.0).is_wide());
        assert!(!JvmValue::NULL.is_wide());
    }

    #[test]
    fn floating_compare_respects_nan_variant() {
        assert_eq!(compare_floating(1.0f32.partial_cmp(&2.0), OrdCondition::Gt), -1);
        assert_eq!(compare_floating(f32::NAN.partial_cmp(&2.0), OrdCondition::Gt), 1);
        assert_eq!(compare_floating(f64::NAN.partial_cmp(&2.0), OrdCondition::Lt), -1);
    }

    #[test]
    fn accessors_reject_mismatched_values() {
        assert_eq!(JvmValue::Int(3).as_int().unwrap(), 3);
        assert!(JvmValue::Long(3).as_int().is_err());
        assert!(JvmValue::Int(3).as_reference().is_err());
    }
}
