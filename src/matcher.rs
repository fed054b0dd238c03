//! Per-type operator semantics for strategy attributes.
//!
//! Equality operators are satisfied by any operand and their negations by none. Ordering
//! operators are satisfied only when the subject compares favorably against every operand.

use std::cmp::Ordering;

use log::{trace, warn};
use regex::Regex;

use crate::attribute_value::AttributeValue;
use crate::strategy::{Conditional, FieldType};

/// Applies `conditional` between a scalar `subject` and `operands`, both interpreted as
/// `field_type`. A value that cannot be interpreted as the type never matches.
pub(crate) fn matches(
    field_type: FieldType,
    conditional: Conditional,
    subject: &AttributeValue,
    operands: &[AttributeValue],
) -> bool {
    match field_type {
        FieldType::Boolean => boolean_op(conditional, subject, operands),
        FieldType::String => string_op(conditional, subject, operands),
        FieldType::Number => numeric_op(conditional, subject, operands),
        FieldType::SemanticVersion => semver_op(conditional, subject, operands),
        FieldType::Date => date_op(conditional, subject, operands, AttributeValue::to_iso_date),
        FieldType::Datetime => {
            date_op(conditional, subject, operands, AttributeValue::to_iso_datetime)
        }
        FieldType::IpAddress => ip_op(conditional, subject, operands),
        FieldType::Unknown => false,
    }
}

fn any<T, F: Fn(&T) -> bool>(operands: &[T], f: F) -> bool {
    operands.iter().any(f)
}

fn none<T, F: Fn(&T) -> bool>(operands: &[T], f: F) -> bool {
    !operands.iter().any(f)
}

fn all<T, F: Fn(&T) -> bool>(operands: &[T], f: F) -> bool {
    operands.iter().all(f)
}

/// Interprets every operand with `convert`, or None if any of them cannot be.
fn convert_all<T, F: Fn(&AttributeValue) -> Option<T>>(
    operands: &[AttributeValue],
    convert: F,
) -> Option<Vec<T>> {
    operands.iter().map(convert).collect()
}

/// Shared handling of equality and ordering for totally ordered types.
fn compare_op<T: PartialOrd>(conditional: Conditional, subject: &T, operands: &[T]) -> bool {
    let cmp = |op: &T| subject.partial_cmp(op);
    match conditional {
        Conditional::Equals => any(operands, |op| cmp(op) == Some(Ordering::Equal)),
        Conditional::NotEquals => none(operands, |op| cmp(op) == Some(Ordering::Equal)),
        Conditional::Greater => all(operands, |op| cmp(op) == Some(Ordering::Greater)),
        Conditional::GreaterEquals => all(operands, |op| {
            matches!(cmp(op), Some(Ordering::Greater | Ordering::Equal))
        }),
        Conditional::Less => all(operands, |op| cmp(op) == Some(Ordering::Less)),
        Conditional::LessEquals => all(operands, |op| {
            matches!(cmp(op), Some(Ordering::Less | Ordering::Equal))
        }),
        _ => {
            trace!("conditional {:?} does not apply to ordered values", conditional);
            false
        }
    }
}

fn boolean_op(conditional: Conditional, subject: &AttributeValue, operands: &[AttributeValue]) -> bool {
    let (subject, operands) = match (subject.to_bool(), convert_all(operands, AttributeValue::to_bool)) {
        (Some(s), Some(ops)) => (s, ops),
        _ => return false,
    };
    match conditional {
        Conditional::Equals => any(&operands, |op| *op == subject),
        Conditional::NotEquals => none(&operands, |op| *op == subject),
        _ => false,
    }
}

fn string_op(conditional: Conditional, subject: &AttributeValue, operands: &[AttributeValue]) -> bool {
    match (subject.to_match_string(), convert_all(operands, AttributeValue::to_match_string)) {
        (Some(s), Some(ops)) => match_strings(conditional, &s, &ops),
        _ => false,
    }
}

fn match_strings(conditional: Conditional, subject: &str, operands: &[String]) -> bool {
    match conditional {
        Conditional::StartsWith => any(operands, |op| subject.starts_with(op.as_str())),
        Conditional::EndsWith => any(operands, |op| subject.ends_with(op.as_str())),
        Conditional::Includes => any(operands, |op| subject.contains(op.as_str())),
        Conditional::Excludes => none(operands, |op| subject.contains(op.as_str())),
        Conditional::Regex => any(operands, |op| match Regex::new(op) {
            Ok(re) => re.is_match(subject),
            Err(e) => {
                warn!("Invalid regex for 'REGEX' conditional ({}): {}", e, op);
                false
            }
        }),
        _ => {
            let operands: Vec<&str> = operands.iter().map(String::as_str).collect();
            compare_op(conditional, &subject, &operands)
        }
    }
}

fn numeric_op(conditional: Conditional, subject: &AttributeValue, operands: &[AttributeValue]) -> bool {
    match (subject.to_f64(), convert_all(operands, AttributeValue::to_f64)) {
        (Some(s), Some(ops)) => compare_op(conditional, &s, &ops),
        _ => false,
    }
}

fn semver_op(conditional: Conditional, subject: &AttributeValue, operands: &[AttributeValue]) -> bool {
    match conditional {
        Conditional::StartsWith
        | Conditional::EndsWith
        | Conditional::Includes
        | Conditional::Excludes
        | Conditional::Regex => string_op(conditional, subject, operands),
        _ => match (subject.as_semver(), convert_all(operands, AttributeValue::as_semver)) {
            (Some(s), Some(ops)) => compare_op(conditional, &s, &ops),
            _ => false,
        },
    }
}

/// Dates and datetimes are matched as strings on their normalized ISO form. Operands that are
/// not themselves dates (such as a prefix "2021-") are compared as written.
fn date_op<F>(
    conditional: Conditional,
    subject: &AttributeValue,
    operands: &[AttributeValue],
    normalize: F,
) -> bool
where
    F: Fn(&AttributeValue) -> Option<String>,
{
    let subject = match normalize(subject) {
        Some(s) => s,
        None => return false,
    };
    let operands = convert_all(operands, |op| normalize(op).or_else(|| op.to_match_string()));
    match operands {
        Some(ops) => match_strings(conditional, &subject, &ops),
        None => false,
    }
}

fn ip_op(conditional: Conditional, subject: &AttributeValue, operands: &[AttributeValue]) -> bool {
    let subject = match subject.to_ip() {
        Some(ip) => ip,
        None => return false,
    };
    match conditional {
        Conditional::Equals | Conditional::Includes => match convert_all(operands, AttributeValue::to_ip_net) {
            Some(nets) => any(&nets, |net| net.contains(&subject)),
            None => false,
        },
        Conditional::NotEquals | Conditional::Excludes => match convert_all(operands, AttributeValue::to_ip_net) {
            Some(nets) => none(&nets, |net| net.contains(&subject)),
            None => false,
        },
        Conditional::Greater | Conditional::GreaterEquals | Conditional::Less | Conditional::LessEquals => {
            match convert_all(operands, AttributeValue::to_ip) {
                Some(addrs) => compare_op(conditional, &subject, &addrs),
                None => false,
            }
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn astring(s: &str) -> AttributeValue {
        AttributeValue::String(s.to_string())
    }

    fn afloat(f: f64) -> AttributeValue {
        AttributeValue::Number(f)
    }

    fn strings(values: &[&str]) -> Vec<AttributeValue> {
        values.iter().map(|v| astring(v)).collect()
    }

    #[test_case(Conditional::Equals, "true", &["true"], true)]
    #[test_case(Conditional::Equals, "false", &["true"], false)]
    #[test_case(Conditional::NotEquals, "false", &["true"], true)]
    #[test_case(Conditional::NotEquals, "true", &["true"], false)]
    #[test_case(Conditional::Greater, "true", &["false"], false)]
    #[test_case(Conditional::Equals, "yes", &["true"], false)]
    fn test_boolean(conditional: Conditional, subject: &str, operands: &[&str], expected: bool) {
        assert_eq!(
            matches(FieldType::Boolean, conditional, &astring(subject), &strings(operands)),
            expected
        );
        assert_eq!(
            matches(
                FieldType::Boolean,
                conditional,
                &astring(subject),
                &operands.iter().map(|o| AttributeValue::Bool(*o == "true")).collect::<Vec<_>>()
            ),
            expected
        );
    }

    #[test_case(Conditional::Equals, "russia", &["russia", "ukraine"], true)]
    #[test_case(Conditional::Equals, "Russia", &["russia"], false)]
    #[test_case(Conditional::NotEquals, "server", &["mobile", "watch"], true)]
    #[test_case(Conditional::NotEquals, "watch", &["mobile", "watch"], false)]
    #[test_case(Conditional::StartsWith, "food", &["bar", "foo"], true)]
    #[test_case(Conditional::StartsWith, "foo", &["food"], false)]
    #[test_case(Conditional::EndsWith, "food", &["ood"], true)]
    #[test_case(Conditional::EndsWith, "ood", &["food"], false)]
    #[test_case(Conditional::Includes, "food", &["oo"], true)]
    #[test_case(Conditional::Includes, "FOOD", &["oo"], false)]
    #[test_case(Conditional::Excludes, "food", &["xx", "yy"], true)]
    #[test_case(Conditional::Excludes, "food", &["xx", "oo"], false)]
    #[test_case(Conditional::Regex, "hello world", &["^hello"], true)]
    #[test_case(Conditional::Regex, "hello world", &["^world"], false)]
    #[test_case(Conditional::Regex, "hello", &["(unclosed"], false)]
    #[test_case(Conditional::Less, "b", &["c", "d"], true)]
    #[test_case(Conditional::Less, "b", &["c", "a"], false)]
    #[test_case(Conditional::LessEquals, "b", &["b", "c"], true)]
    #[test_case(Conditional::Greater, "b", &["a"], true)]
    #[test_case(Conditional::GreaterEquals, "b", &["c"], false)]
    fn test_string(conditional: Conditional, subject: &str, operands: &[&str], expected: bool) {
        assert_eq!(
            matches(FieldType::String, conditional, &astring(subject), &strings(operands)),
            expected
        );
    }

    #[test]
    fn string_operands_may_be_numbers() {
        assert!(matches(
            FieldType::String,
            Conditional::Equals,
            &astring("42"),
            &[afloat(42.0)]
        ));
    }

    #[test_case(Conditional::Equals, 5.0, &[1.0, 5.0], true)]
    #[test_case(Conditional::NotEquals, 5.0, &[1.0, 5.0], false)]
    #[test_case(Conditional::Less, 5.0, &[6.0, 7.0], true)]
    #[test_case(Conditional::Less, 5.0, &[6.0, 4.0], false)]
    #[test_case(Conditional::LessEquals, 5.0, &[5.0], true)]
    #[test_case(Conditional::Greater, 5.0, &[1.0, 4.9], true)]
    #[test_case(Conditional::Greater, 5.0, &[5.0], false)]
    #[test_case(Conditional::GreaterEquals, 5.0, &[5.0, 2.0], true)]
    #[test_case(Conditional::StartsWith, 5.0, &[5.0], false)]
    fn test_number(conditional: Conditional, subject: f64, operands: &[f64], expected: bool) {
        let operands: Vec<AttributeValue> = operands.iter().map(|f| afloat(*f)).collect();
        assert_eq!(
            matches(FieldType::Number, conditional, &afloat(subject), &operands),
            expected
        );
        assert_eq!(
            matches(FieldType::Number, conditional, &astring(&subject.to_string()), &operands),
            expected
        );
    }

    #[test]
    fn number_rejects_non_numeric_subject() {
        assert!(!matches(FieldType::Number, Conditional::Equals, &astring("abc"), &[afloat(1.0)]));
    }

    #[test_case(Conditional::Less, "5.6.7", &["15.23.4"], true)]
    #[test_case(Conditional::Less, "15.23.4", &["15.23.4"], false)]
    #[test_case(Conditional::Less, "16.0.0", &["15.23.4"], false)]
    #[test_case(Conditional::LessEquals, "15.23.4", &["15.23.4"], true)]
    #[test_case(Conditional::Greater, "16.0.1", &["16.0.0"], true)]
    #[test_case(Conditional::Greater, "16.0.0", &["16.0.0"], false)]
    #[test_case(Conditional::GreaterEquals, "16.0.0", &["16.0.0"], true)]
    #[test_case(Conditional::Equals, "2.1", &["2.1.0"], true)]
    #[test_case(Conditional::NotEquals, "2.1.1", &["2.1.0", "2.0.0"], true)]
    #[test_case(Conditional::Greater, "10.0.0", &["9.0.0", "2.0.0"], true)]
    #[test_case(Conditional::Greater, "10.0.0", &["9.0.0", "11.0.0"], false)]
    #[test_case(Conditional::StartsWith, "10.2.3", &["10."], true)]
    #[test_case(Conditional::Regex, "10.2.3-beta", &["-beta$"], true)]
    #[test_case(Conditional::Less, "not-a-version", &["1.0.0"], false)]
    fn test_semver(conditional: Conditional, subject: &str, operands: &[&str], expected: bool) {
        assert_eq!(
            matches(FieldType::SemanticVersion, conditional, &astring(subject), &strings(operands)),
            expected
        );
    }

    #[test_case(FieldType::Date, Conditional::Equals, "2021-03-04T10:00:00Z", &["2021-03-04"], true)]
    #[test_case(FieldType::Date, Conditional::Less, "2021-03-04", &["2021-03-05", "2022-01-01"], true)]
    #[test_case(FieldType::Date, Conditional::Greater, "2021-03-04", &["2021-03-05"], false)]
    #[test_case(FieldType::Date, Conditional::StartsWith, "2021-03-04", &["2021-"], true)]
    #[test_case(FieldType::Date, Conditional::Includes, "2021-03-04", &["-03-"], true)]
    #[test_case(FieldType::Date, Conditional::Excludes, "2021-03-04", &["-04-"], true)]
    #[test_case(FieldType::Date, Conditional::Regex, "2021-03-04", &["^\\d{4}-03"], true)]
    #[test_case(FieldType::Date, Conditional::Equals, "yesterday", &["2021-03-04"], false)]
    #[test_case(FieldType::Datetime, Conditional::Equals, "2021-03-04T12:00:00+02:00", &["2021-03-04T10:00:00Z"], true)]
    #[test_case(FieldType::Datetime, Conditional::GreaterEquals, "2021-03-04T10:00:00Z", &["2021-03-04T10:00:00Z"], true)]
    #[test_case(FieldType::Datetime, Conditional::EndsWith, "2021-03-04T10:00:00Z", &["00:00Z"], true)]
    fn test_dates(field_type: FieldType, conditional: Conditional, subject: &str, operands: &[&str], expected: bool) {
        assert_eq!(
            matches(field_type, conditional, &astring(subject), &strings(operands)),
            expected
        );
    }

    #[test_case(Conditional::Includes, "192.168.1.10", &["10.0.0.0/8", "192.168.1.0/24"], true)]
    #[test_case(Conditional::Equals, "192.168.1.10", &["192.168.1.10"], true)]
    #[test_case(Conditional::Equals, "192.168.2.10", &["192.168.1.0/24"], false)]
    #[test_case(Conditional::Excludes, "192.168.2.10", &["192.168.1.0/24"], true)]
    #[test_case(Conditional::NotEquals, "192.168.1.10", &["192.168.0.0/16"], false)]
    #[test_case(Conditional::Includes, "2001:db8::1", &["2001:db8::/32"], true)]
    #[test_case(Conditional::Includes, "2001:db8::1", &["10.0.0.0/8"], false)]
    #[test_case(Conditional::Less, "10.0.0.1", &["10.0.0.2", "10.0.1.0"], true)]
    #[test_case(Conditional::Greater, "10.0.0.1", &["10.0.0.2"], false)]
    #[test_case(Conditional::StartsWith, "10.0.0.1", &["10."], false)]
    #[test_case(Conditional::Includes, "garbage", &["10.0.0.0/8"], false)]
    fn test_ip(conditional: Conditional, subject: &str, operands: &[&str], expected: bool) {
        assert_eq!(
            matches(FieldType::IpAddress, conditional, &astring(subject), &strings(operands)),
            expected
        );
    }

    #[test]
    fn unknown_type_never_matches() {
        assert!(!matches(
            FieldType::Unknown,
            Conditional::Equals,
            &astring("a"),
            &strings(&["a"])
        ));
    }
}
