use std::fmt::{self, Display};

use color_eyre::eyre::{self, eyre};
use winnow::combinator::{alt, delimited, dispatch, empty, fail, repeat, terminated};
use winnow::token::{any, take_till, take_while};
use winnow::error::{ContextError, ErrMode};
use winnow::Parser;

type ParseResult<T> = Result<T, ErrMode<ContextError>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BaseType<'a> {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
    Object(&'a str),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldType<'a> {
    Base(BaseType<'a>),
    Array(u8, BaseType<'a>),
}

#[derive(Debug)]
pub struct FieldDescriptor<'a> {
    pub field_type: FieldType<'a>,
}

#[derive(Debug)]
pub struct MethodDescriptor<'a> {
    pub params: Vec<FieldType<'a>>,
    pub return_type: Option<FieldType<'a>>,
}

pub const STRING: FieldType<'static> = FieldType::Base(BaseType::Object("java/lang/String"));
pub const OBJECT: FieldType<'static> = FieldType::Base(BaseType::Object("java/lang/Object"));

impl<'a> FieldType<'a> {
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            FieldType::Base(BaseType::Object(_)) | FieldType::Array(..)
        )
    }

    /// Element type of an array type, `None` for non-array types.
    pub fn component(&self) -> Option<FieldType<'a>> {
        match *self {
            FieldType::Array(1, base) => Some(FieldType::Base(base)),
            FieldType::Array(depth, base) => Some(FieldType::Array(depth - 1, base)),
            FieldType::Base(_) => None,
        }
    }

    /// Renders the type back into descriptor syntax, e.g. `[I` or `Ljava/lang/String;`.
    pub fn to_descriptor(&self) -> String {
        let (depth, base) = match *self {
            FieldType::Base(base) => (0, base),
            FieldType::Array(depth, base) => (depth, base),
        };

        let mut out = "[".repeat(depth as usize);
        match base {
            BaseType::Byte => out.push('B'),
            BaseType::Char => out.push('C'),
            BaseType::Double => out.push('D'),
            BaseType::Float => out.push('F'),
            BaseType::Int => out.push('I'),
            BaseType::Long => out.push('J'),
            BaseType::Short => out.push('S'),
            BaseType::Boolean => out.push('Z'),
            BaseType::Object(name) => {
                out.push('L');
                out.push_str(name);
                out.push(';');
            }
        }
        out
    }
}

impl Display for BaseType<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaseType::Byte => f.write_str("byte"),
            BaseType::Char => f.write_str("char"),
            BaseType::Double => f.write_str("double"),
            BaseType::Float => f.write_str("float"),
            BaseType::Int => f.write_str("int"),
            BaseType::Long => f.write_str("long"),
            BaseType::Short => f.write_str("short"),
            BaseType::Boolean => f.write_str("boolean"),
            BaseType::Object(name) => f.write_str(&name.replace('/', ".")),
        }
    }
}

/// Java source syntax, e.g. `java.lang.String[]`.
impl Display for FieldType<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Base(base) => write!(f, "{base}"),
            FieldType::Array(depth, base) => {
                write!(f, "{base}")?;
                for _ in 0..*depth {
                    f.write_str("[]")?;
                }
                Ok(())
            }
        }
    }
}

pub fn parse_method_descriptor(descriptor: &str) -> eyre::Result<MethodDescriptor> {
    let (params, return_type) = (parse_params_types, parse_return_type)
        .parse(descriptor)
        .map_err(|e| eyre!("invalid method descriptor '{descriptor}': {e}"))?;

    Ok(MethodDescriptor {
        params,
        return_type,
    })
}

pub fn parse_field_descriptor(descriptor: &str) -> eyre::Result<FieldDescriptor> {
    let field_type = parse_field_type
        .parse(descriptor)
        .map_err(|e| eyre!("invalid field descriptor '{descriptor}': {e}"))?;

    Ok(FieldDescriptor { field_type })
}

fn parse_base_type<'s>(input: &mut &'s str) -> ParseResult<BaseType<'s>> {
    dispatch! { any;
        'L' => terminated(take_till(1.., ';').map(BaseType::Object), ';'),
        'B' => empty.map(|_| BaseType::Byte),
        'C' => empty.map(|_| BaseType::Char),
        'D' => empty.map(|_| BaseType::Double),
        'F' => empty.map(|_| BaseType::Float),
        'I' => empty.map(|_| BaseType::Int),
        'J' => empty.map(|_| BaseType::Long),
        'S' => empty.map(|_| BaseType::Short),
        'Z' => empty.map(|_| BaseType::Boolean),
        _ => fail,
    }
    .parse_next(input)
}

fn parse_array_type<'s>(input: &mut &'s str) -> ParseResult<(u8, BaseType<'s>)> {
    let parse_array_depth = take_while(1..=255, '[').map(|v: &str| v.len() as u8);
    (parse_array_depth, parse_base_type).parse_next(input)
}

fn parse_field_type<'s>(input: &mut &'s str) -> ParseResult<FieldType<'s>> {
    alt((
        parse_base_type.map(FieldType::Base),
        parse_array_type.map(|(n, ty)| FieldType::Array(n, ty)),
    ))
    .parse_next(input)
}

fn parse_params_types<'s>(input: &mut &'s str) -> ParseResult<Vec<FieldType<'s>>> {
    delimited("(", repeat(.., parse_field_type), ")").parse_next(input)
}

fn parse_return_type<'s>(input: &mut &'s str) -> ParseResult<Option<FieldType<'s>>> {
    alt(("V".map(|_| None), parse_field_type.map(Some))).parse_next(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_method_descriptor() {
        let descriptor = parse_method_descriptor("(IJ[[Ljava/lang/String;Z)D").unwrap();
        assert_eq!(
            descriptor.params,
            vec![
                FieldType::Base(BaseType::Int),
                FieldType::Base(BaseType::Long),
                FieldType::Array(2, BaseType::Object("java/lang/String")),
                FieldType::Base(BaseType::Boolean),
            ]
        );
        assert_eq!(descriptor.return_type, Some(FieldType::Base(BaseType::Double)));
    }

    #[test]
    fn parses_void_return() {
        let descriptor = parse_method_descriptor("()V").unwrap();
        assert!(descriptor.params.is_empty());
        assert_eq!(descriptor.return_type, None);
    }

    #[test]
    fn rejects_malformed_descriptors() {
        assert!(parse_method_descriptor("(I").is_err());
        assert!(parse_method_descriptor("(Q)V").is_err());
        assert!(parse_method_descriptor("(L;)V").is_err());
        assert!(parse_field_descriptor("II").is_err());
    }

    #[test]
    fn renders_java_syntax_and_descriptors() {
        let ty = parse_field_descriptor("[Ljava/util/List;").unwrap().field_type;
        assert_eq!(ty.to_string(), "java.util.List[]");
        assert_eq!(ty.to_descriptor(), "[Ljava/util/List;");
        assert_eq!(ty.component(), Some(FieldType::Base(BaseType::Object("java/util/List"))));
        assert_eq!(FieldType::Base(BaseType::Char).to_string(), "char");
    }
}
