//! Type tokens from the descriptor file and the conversion of literal
//! argument text into typed values.

use std::str::FromStr;

use strum::EnumString;

use crate::call_frame::JvmValue;
use crate::descriptor::{self, BaseType, FieldType};
use crate::error::Failure;

/// A parameter type alias, as written in the descriptor file. Unrecognized
/// tokens map to [`TypeToken::Object`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum TypeToken {
    #[strum(serialize = "bool", serialize = "boolean")]
    Boolean,
    #[strum(serialize = "char", serialize = "character")]
    Char,
    #[strum(serialize = "byte")]
    Byte,
    #[strum(serialize = "short")]
    Short,
    #[strum(serialize = "int", serialize = "integer")]
    Int,
    #[strum(serialize = "long")]
    Long,
    #[strum(serialize = "float")]
    Float,
    #[strum(serialize = "double")]
    Double,
    #[strum(serialize = "string")]
    String,
    #[strum(disabled)]
    Object,
}

impl TypeToken {
    pub fn from_token(token: &str) -> TypeToken {
        TypeToken::from_str(token).unwrap_or(TypeToken::Object)
    }

    pub fn field_type(self) -> FieldType<'static> {
        match self {
            TypeToken::Boolean => FieldType::Base(BaseType::Boolean),
            TypeToken::Char => FieldType::Base(BaseType::Char),
            TypeToken::Byte => FieldType::Base(BaseType::Byte),
            TypeToken::Short => FieldType::Base(BaseType::Short),
            TypeToken::Int => FieldType::Base(BaseType::Int),
            TypeToken::Long => FieldType::Base(BaseType::Long),
            TypeToken::Float => FieldType::Base(BaseType::Float),
            TypeToken::Double => FieldType::Base(BaseType::Double),
            TypeToken::String => descriptor::STRING,
            TypeToken::Object => descriptor::OBJECT,
        }
    }
}

/// The parameter list part of a method descriptor, e.g. `(ILjava/lang/String;)`.
pub fn params_descriptor(tokens: &[TypeToken]) -> String {
    let params: String = tokens
        .iter()
        .map(|token| token.field_type().to_descriptor())
        .collect();
    format!("({params})")
}

/// Java source rendering of a parameter list, e.g. `int,java.lang.String`.
pub fn params_signature(tokens: &[TypeToken]) -> String {
    tokens
        .iter()
        .map(|token| token.field_type().to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// A coerced argument, not yet turned into an engine value.
#[derive(Clone, Debug, PartialEq)]
pub enum Argument {
    Null,
    Boolean(bool),
    Char(u16),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Text(String),
}

impl Argument {
    /// The engine value of a primitive argument; `None` for null and text.
    pub fn primitive_value(&self) -> Option<JvmValue> {
        Some(match *self {
            Argument::Boolean(v) => JvmValue::Int(v as i32),
            Argument::Char(v) => JvmValue::Int(v as i32),
            Argument::Byte(v) => JvmValue::Int(v as i32),
            Argument::Short(v) => JvmValue::Int(v as i32),
            Argument::Int(v) => JvmValue::Int(v),
            Argument::Long(v) => JvmValue::Long(v),
            Argument::Float(v) => JvmValue::Float(v),
            Argument::Double(v) => JvmValue::Double(v),
            Argument::Null | Argument::Text(_) => return None,
        })
    }
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum CoercionError {
    #[error("For input string: \"{0}\"")]
    Invalid(String),
    #[error("Value out of range. Value:\"{0}\" Radix:10")]
    OutOfRange(String),
    #[error("empty String")]
    Empty,
    #[error("Index 0 out of bounds for length 0")]
    EmptyChar,
}

/// Coerces one literal. `null` is the null reference for every type.
pub fn coerce(token: TypeToken, literal: &str) -> Result<Argument, CoercionError> {
    if literal == "null" {
        return Ok(Argument::Null);
    }
    parse_literal(token, literal)
}

/// Parses `literal` with the rules of the matching `parseXxx` method.
pub fn parse_literal(token: TypeToken, literal: &str) -> Result<Argument, CoercionError> {
    let invalid = || CoercionError::Invalid(literal.to_owned());

    Ok(match token {
        TypeToken::Boolean => Argument::Boolean(literal.eq_ignore_ascii_case("true")),
        TypeToken::Char => Argument::Char(
            literal
                .encode_utf16()
                .next()
                .ok_or(CoercionError::EmptyChar)?,
        ),
        TypeToken::Byte => {
            let value = parse_integer(literal)?;
            Argument::Byte(
                i8::try_from(value).map_err(|_| CoercionError::OutOfRange(literal.to_owned()))?,
            )
        }
        TypeToken::Short => {
            let value = parse_integer(literal)?;
            Argument::Short(
                i16::try_from(value).map_err(|_| CoercionError::OutOfRange(literal.to_owned()))?,
            )
        }
        TypeToken::Int => Argument::Int(parse_integer(literal)?),
        TypeToken::Long => {
            if !is_integer_literal(literal) {
                return Err(invalid());
            }
            Argument::Long(literal.parse().map_err(|_| invalid())?)
        }
        TypeToken::Float => Argument::Float(parse_floating(literal)?.parse().map_err(|_| invalid())?),
        TypeToken::Double => {
            Argument::Double(parse_floating(literal)?.parse().map_err(|_| invalid())?)
        }
        TypeToken::String | TypeToken::Object => Argument::Text(literal.to_owned()),
    })
}

fn is_integer_literal(literal: &str) -> bool {
    let digits = literal
        .strip_prefix(['-', '+'])
        .unwrap_or(literal);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// `Integer.parseInt`.
fn parse_integer(literal: &str) -> Result<i32, CoercionError> {
    if !is_integer_literal(literal) {
        return Err(CoercionError::Invalid(literal.to_owned()));
    }
    literal
        .parse()
        .map_err(|_| CoercionError::Invalid(literal.to_owned()))
}

/// Validates a `Double.parseDouble` literal and returns it in a form Rust's
/// float parser accepts.
fn parse_floating(literal: &str) -> Result<String, CoercionError> {
    let trimmed = literal.trim_matches(|c: char| c <= ' ');
    if trimmed.is_empty() {
        return Err(CoercionError::Empty);
    }
    let invalid = || CoercionError::Invalid(literal.to_owned());

    let (sign, unsigned) = match trimmed.as_bytes()[0] {
        b'-' => ("-", &trimmed[1..]),
        b'+' => ("", &trimmed[1..]),
        _ => ("", trimmed),
    };

    if unsigned == "NaN" {
        return Ok("NaN".to_owned());
    }
    if unsigned == "Infinity" {
        return Ok(format!("{sign}inf"));
    }

    let number = unsigned
        .strip_suffix(['f', 'F', 'd', 'D'])
        .unwrap_or(unsigned);

    let (mantissa, exponent) = match number.find(['e', 'E']) {
        Some(at) => (&number[..at], Some(&number[at + 1..])),
        None => (number, None),
    };

    let (whole, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let digits_only = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if whole.len() + fraction.len() == 0 || !digits_only(whole) || !digits_only(fraction) {
        return Err(invalid());
    }

    if let Some(exponent) = exponent {
        let exponent_digits = exponent.strip_prefix(['-', '+']).unwrap_or(exponent);
        if exponent_digits.is_empty() || !digits_only(exponent_digits) {
            return Err(invalid());
        }
    }

    Ok(format!("{sign}{number}"))
}

/// Coerces every literal against its token, checking the counts first.
/// Failures name the 1-based position of the offending argument.
pub fn coerce_all(tokens: &[TypeToken], values: &[String]) -> Result<Vec<Argument>, Failure> {
    if tokens.len() != values.len() {
        return Err(Failure::ArgumentCountMismatch {
            expected: tokens.len(),
            found: values.len(),
        });
    }

    tokens
        .iter()
        .zip(values)
        .enumerate()
        .map(|(index, (token, literal))| {
            coerce(*token, literal).map_err(|reason| Failure::Coercion {
                position: index + 1,
                literal: literal.clone(),
                target: token.field_type().to_string(),
                reason,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_case_insensitive_with_a_fallback() {
        assert_eq!(TypeToken::from_token("INT"), TypeToken::Int);
        assert_eq!(TypeToken::from_token("Integer"), TypeToken::Int);
        assert_eq!(TypeToken::from_token("Bool"), TypeToken::Boolean);
        assert_eq!(TypeToken::from_token("character"), TypeToken::Char);
        assert_eq!(TypeToken::from_token("String"), TypeToken::String);
        assert_eq!(TypeToken::from_token("java.util.List"), TypeToken::Object);
        assert_eq!(TypeToken::from_token("object"), TypeToken::Object);
    }

    #[test]
    fn descriptors_follow_the_token_table() {
        let tokens = ["int", "string", "double", "thing"].map(TypeToken::from_token);
        assert_eq!(
            params_descriptor(&tokens),
            "(ILjava/lang/String;DLjava/lang/Object;)"
        );
        assert_eq!(
            params_signature(&tokens),
            "int,java.lang.String,double,java.lang.Object"
        );
        assert_eq!(params_descriptor(&[]), "()");
    }

    #[test]
    fn null_is_null_for_every_type() {
        for token in [TypeToken::Int, TypeToken::Char, TypeToken::String] {
            assert_eq!(coerce(token, "null"), Ok(Argument::Null));
        }
        assert_eq!(
            coerce(TypeToken::String, "NULL"),
            Ok(Argument::Text("NULL".to_owned()))
        );
    }

    #[test]
    fn integers_are_range_checked_per_width() {
        assert_eq!(coerce(TypeToken::Int, "-42"), Ok(Argument::Int(-42)));
        assert_eq!(coerce(TypeToken::Int, "+7"), Ok(Argument::Int(7)));
        assert_eq!(coerce(TypeToken::Byte, "127"), Ok(Argument::Byte(127)));
        assert_eq!(
            coerce(TypeToken::Byte, "128"),
            Err(CoercionError::OutOfRange("128".to_owned()))
        );
        assert_eq!(
            coerce(TypeToken::Int, "2147483648"),
            Err(CoercionError::Invalid("2147483648".to_owned()))
        );
        assert_eq!(
            coerce(TypeToken::Long, "9223372036854775807"),
            Ok(Argument::Long(i64::MAX))
        );
        assert!(coerce(TypeToken::Int, " 1").is_err());
        assert!(coerce(TypeToken::Int, "1.0").is_err());
        assert!(coerce(TypeToken::Short, "-").is_err());
    }

    #[test]
    fn floats_accept_java_literal_forms() {
        assert_eq!(coerce(TypeToken::Double, " 2.5 "), Ok(Argument::Double(2.5)));
        assert_eq!(coerce(TypeToken::Double, "1e3"), Ok(Argument::Double(1000.0)));
        assert_eq!(coerce(TypeToken::Double, "-.5d"), Ok(Argument::Double(-0.5)));
        assert_eq!(coerce(TypeToken::Float, "3f"), Ok(Argument::Float(3.0)));
        assert_eq!(
            coerce(TypeToken::Double, "-Infinity"),
            Ok(Argument::Double(f64::NEG_INFINITY))
        );
        assert!(matches!(
            coerce(TypeToken::Double, "NaN"),
            Ok(Argument::Double(v)) if v.is_nan()
        ));
        assert!(coerce(TypeToken::Double, "nan").is_err());
        assert!(coerce(TypeToken::Double, "inf").is_err());
        assert!(coerce(TypeToken::Double, "1e").is_err());
        assert!(coerce(TypeToken::Double, ".").is_err());
        assert_eq!(coerce(TypeToken::Double, "  "), Err(CoercionError::Empty));
    }

    #[test]
    fn chars_and_booleans() {
        assert_eq!(coerce(TypeToken::Char, "xyz"), Ok(Argument::Char(b'x' as u16)));
        assert_eq!(coerce(TypeToken::Char, ""), Err(CoercionError::EmptyChar));
        assert_eq!(coerce(TypeToken::Boolean, "TRUE"), Ok(Argument::Boolean(true)));
        assert_eq!(coerce(TypeToken::Boolean, "yes"), Ok(Argument::Boolean(false)));
    }

    #[test]
    fn coercion_checks_counts_and_reports_positions() {
        let tokens = [TypeToken::Int, TypeToken::Int];
        let values = vec!["1".to_owned()];
        assert!(matches!(
            coerce_all(&tokens, &values),
            Err(Failure::ArgumentCountMismatch { expected: 2, found: 1 })
        ));

        let values = vec!["1".to_owned(), "two".to_owned()];
        match coerce_all(&tokens, &values) {
            Err(Failure::Coercion {
                position, target, ..
            }) => {
                assert_eq!(position, 2);
                assert_eq!(target, "int");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }
}
