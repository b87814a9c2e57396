//! Java's textual rendering of primitive and reference values, as used by
//! `String.valueOf`, string concatenation and the printed return value.

use crate::call_frame::{ExecResult, JvmValue};
use crate::descriptor::{BaseType, FieldType};
use crate::vm::Vm;

/// `Float.toString`.
pub fn float_to_string(value: f32) -> String {
    if let Some(special) = special(value.is_nan(), value.is_infinite(), value.is_sign_negative()) {
        return special.to_owned();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0.0" } else { "0.0" }.to_owned();
    }

    let magnitude = value.abs();
    if (1e-3..1e7).contains(&magnitude) {
        plain(format!("{value}"))
    } else {
        scientific(format!("{value:e}"))
    }
}

/// `Double.toString`.
pub fn double_to_string(value: f64) -> String {
    if let Some(special) = special(value.is_nan(), value.is_infinite(), value.is_sign_negative()) {
        return special.to_owned();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0.0" } else { "0.0" }.to_owned();
    }

    let magnitude = value.abs();
    if (1e-3..1e7).contains(&magnitude) {
        plain(format!("{value}"))
    } else {
        scientific(format!("{value:e}"))
    }
}

fn special(nan: bool, infinite: bool, negative: bool) -> Option<&'static str> {
    match (nan, infinite, negative) {
        (true, _, _) => Some("NaN"),
        (_, true, false) => Some("Infinity"),
        (_, true, true) => Some("-Infinity"),
        _ => None,
    }
}

fn plain(mut text: String) -> String {
    if !text.contains('.') {
        text.push_str(".0");
    }
    text
}

/// Turns Rust's `1.5e-5` into Java's `1.5E-5`, forcing a fractional digit.
fn scientific(text: String) -> String {
    match text.split_once('e') {
        Some((mantissa, exponent)) => {
            let mantissa = plain(mantissa.to_owned());
            format!("{mantissa}E{exponent}")
        }
        None => plain(text),
    }
}

/// Renders `value`, typed as `field_type`, the way `String.valueOf` would.
pub fn java_text<'a>(
    vm: &mut Vm<'a>,
    value: JvmValue,
    field_type: &FieldType,
) -> ExecResult<String> {
    Ok(match (field_type, value) {
        (FieldType::Base(BaseType::Boolean), JvmValue::Int(v)) => (v != 0).to_string(),
        (FieldType::Base(BaseType::Char), JvmValue::Int(v)) => char_text(v as u16),
        (FieldType::Base(_), JvmValue::Int(v)) => v.to_string(),
        (_, JvmValue::Long(v)) => v.to_string(),
        (_, JvmValue::Float(v)) => float_to_string(v),
        (_, JvmValue::Double(v)) => double_to_string(v),
        (_, JvmValue::Reference(reference)) => vm.stringify(reference)?,
        (FieldType::Array(..), JvmValue::Int(v)) => v.to_string(),
    })
}

fn char_text(unit: u16) -> String {
    char::decode_utf16([unit])
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_render_like_java() {
        assert_eq!(double_to_string(7.0), "7.0");
        assert_eq!(double_to_string(-2.5), "-2.5");
        assert_eq!(double_to_string(0.1), "0.1");
        assert_eq!(double_to_string(0.001), "0.001");
        assert_eq!(double_to_string(1e7), "1.0E7");
        assert_eq!(double_to_string(12345678.9), "1.23456789E7");
        assert_eq!(double_to_string(1.5e-5), "1.5E-5");
        assert_eq!(double_to_string(-0.0), "-0.0");
        assert_eq!(double_to_string(f64::NAN), "NaN");
        assert_eq!(double_to_string(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn floats_use_the_shortest_single_precision_digits() {
        assert_eq!(float_to_string(0.1), "0.1");
        assert_eq!(float_to_string(3.0), "3.0");
        assert_eq!(float_to_string(1.0e10), "1.0E10");
        assert_eq!(float_to_string(f32::INFINITY), "Infinity");
    }

    #[test]
    fn lone_surrogates_become_replacement_characters() {
        assert_eq!(char_text(b'x' as u16), "x");
        assert_eq!(char_text(0xd800), "\u{fffd}");
    }
}
