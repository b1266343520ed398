//! Choice rules: compilation from declarations and evaluation.
//!
//! Rules are evaluated in declaration order and the first rule that matches
//! decides the transition. A comparison against a value of the wrong type is
//! simply false; a `Variable` that does not resolve is a path failure (only
//! `IsPresent` treats absence as an answer).

use std::cmp::Ordering;

use chrono::{DateTime, FixedOffset};
use serde_json::Value;

use stepwise_types::definition::ChoiceRuleDocument;

use super::path::{JsonPath, PathError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Numeric,
    Boolean,
    Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equals,
    LessThan,
    GreaterThan,
    LessThanEquals,
    GreaterThanEquals,
    /// `StringMatches` glob.
    Matches,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTest {
    IsNull,
    IsPresent,
    IsNumeric,
    IsString,
    IsBoolean,
    IsTimestamp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(Value),
    Path(JsonPath),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChoiceRule {
    Compare {
        variable: JsonPath,
        kind: ValueKind,
        comparison: Comparison,
        operand: Operand,
    },
    Test {
        variable: JsonPath,
        test: TypeTest,
        expected: bool,
    },
    And(Vec<ChoiceRule>),
    Or(Vec<ChoiceRule>),
    Not(Box<ChoiceRule>),
}

/// A top-level rule and the state it leads to.
#[derive(Debug, Clone, PartialEq)]
pub struct Choice {
    pub rule: ChoiceRule,
    pub next: String,
}

fn parse_comparator(name: &str) -> Option<(ValueKind, Comparison, bool)> {
    let (base, is_path) = match name.strip_suffix("Path") {
        Some(base) => (base, true),
        None => (name, false),
    };
    let (kind, rest) = [
        ("String", ValueKind::String),
        ("Numeric", ValueKind::Numeric),
        ("Boolean", ValueKind::Boolean),
        ("Timestamp", ValueKind::Timestamp),
    ]
    .into_iter()
    .find_map(|(prefix, kind)| base.strip_prefix(prefix).map(|rest| (kind, rest)))?;

    let comparison = match rest {
        "Equals" => Comparison::Equals,
        "LessThan" => Comparison::LessThan,
        "GreaterThan" => Comparison::GreaterThan,
        "LessThanEquals" => Comparison::LessThanEquals,
        "GreaterThanEquals" => Comparison::GreaterThanEquals,
        "Matches" if kind == ValueKind::String && !is_path => Comparison::Matches,
        _ => return None,
    };
    if kind == ValueKind::Boolean && comparison != Comparison::Equals {
        return None;
    }
    Some((kind, comparison, is_path))
}

fn parse_type_test(name: &str) -> Option<TypeTest> {
    Some(match name {
        "IsNull" => TypeTest::IsNull,
        "IsPresent" => TypeTest::IsPresent,
        "IsNumeric" => TypeTest::IsNumeric,
        "IsString" => TypeTest::IsString,
        "IsBoolean" => TypeTest::IsBoolean,
        "IsTimestamp" => TypeTest::IsTimestamp,
        _ => return None,
    })
}

impl Choice {
    /// Compile a top-level `Choices` entry, which must carry `Next`.
    pub fn compile(doc: &ChoiceRuleDocument) -> Result<Self, String> {
        let next = doc
            .next
            .clone()
            .ok_or_else(|| "choice rule is missing 'Next'".to_string())?;
        let rule = ChoiceRule::compile(doc)?;
        Ok(Self { rule, next })
    }
}

impl ChoiceRule {
    fn compile(doc: &ChoiceRuleDocument) -> Result<Self, String> {
        let combinators = [doc.and.is_some(), doc.or.is_some(), doc.not.is_some()]
            .iter()
            .filter(|present| **present)
            .count();

        if combinators > 0 {
            if combinators > 1 || doc.variable.is_some() || !doc.comparator.is_empty() {
                return Err(
                    "a rule may use exactly one of 'And', 'Or', 'Not', or a 'Variable' comparison"
                        .to_string(),
                );
            }
            if let Some(rules) = &doc.and {
                return Ok(ChoiceRule::And(Self::compile_nested_list("And", rules)?));
            }
            if let Some(rules) = &doc.or {
                return Ok(ChoiceRule::Or(Self::compile_nested_list("Or", rules)?));
            }
            if let Some(rule) = &doc.not {
                return Ok(ChoiceRule::Not(Box::new(Self::compile_nested(rule)?)));
            }
        }

        let variable = doc
            .variable
            .as_deref()
            .ok_or_else(|| "comparison rule is missing 'Variable'".to_string())?;
        let variable = JsonPath::parse(variable).map_err(|e| e.to_string())?;

        let mut entries = doc.comparator.iter();
        let (name, operand) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            (None, _) => return Err("comparison rule has no comparator".to_string()),
            (Some(_), Some(_)) => {
                let names: Vec<&str> = doc.comparator.keys().map(String::as_str).collect();
                return Err(format!(
                    "comparison rule has more than one comparator or unknown fields: {}",
                    names.join(", ")
                ));
            }
        };

        if let Some(test) = parse_type_test(name) {
            let expected = operand
                .as_bool()
                .ok_or_else(|| format!("'{name}' expects a boolean"))?;
            return Ok(ChoiceRule::Test {
                variable,
                test,
                expected,
            });
        }

        let (kind, comparison, is_path) =
            parse_comparator(name).ok_or_else(|| format!("unknown comparator '{name}'"))?;

        let operand = if is_path {
            let source = operand
                .as_str()
                .ok_or_else(|| format!("'{name}' expects a path string"))?;
            Operand::Path(JsonPath::parse(source).map_err(|e| e.to_string())?)
        } else {
            check_literal(name, kind, operand)?;
            Operand::Literal(operand.clone())
        };

        Ok(ChoiceRule::Compare {
            variable,
            kind,
            comparison,
            operand,
        })
    }

    fn compile_nested(doc: &ChoiceRuleDocument) -> Result<Self, String> {
        if doc.next.is_some() {
            return Err("nested choice rules must not declare 'Next'".to_string());
        }
        Self::compile(doc)
    }

    fn compile_nested_list(label: &str, docs: &[ChoiceRuleDocument]) -> Result<Vec<Self>, String> {
        if docs.is_empty() {
            return Err(format!("'{label}' needs at least one rule"));
        }
        docs.iter().map(Self::compile_nested).collect()
    }

    /// Evaluate against the state input and context object.
    pub fn evaluate(&self, input: &Value, context: &Value) -> Result<bool, PathError> {
        match self {
            ChoiceRule::And(rules) => {
                for rule in rules {
                    if !rule.evaluate(input, context)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            ChoiceRule::Or(rules) => {
                for rule in rules {
                    if rule.evaluate(input, context)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            ChoiceRule::Not(rule) => Ok(!rule.evaluate(input, context)?),
            ChoiceRule::Test {
                variable,
                test,
                expected,
            } => {
                let actual = match (variable.select(input, context), test) {
                    (Ok(_), TypeTest::IsPresent) => true,
                    (Err(_), TypeTest::IsPresent) => false,
                    (Ok(value), test) => type_test(*test, value),
                    (Err(err), _) => return Err(err),
                };
                Ok(actual == *expected)
            }
            ChoiceRule::Compare {
                variable,
                kind,
                comparison,
                operand,
            } => {
                let left = variable.select(input, context)?;
                let right = match operand {
                    Operand::Literal(value) => value,
                    Operand::Path(path) => path.select(input, context)?,
                };
                Ok(compare(*kind, *comparison, left, right))
            }
        }
    }
}

/// First matching choice, in declaration order.
pub fn first_match<'a>(
    choices: &'a [Choice],
    input: &Value,
    context: &Value,
) -> Result<Option<&'a Choice>, PathError> {
    for choice in choices {
        if choice.rule.evaluate(input, context)? {
            return Ok(Some(choice));
        }
    }
    Ok(None)
}

fn check_literal(name: &str, kind: ValueKind, operand: &Value) -> Result<(), String> {
    let ok = match kind {
        ValueKind::String => operand.is_string(),
        ValueKind::Numeric => operand.is_number(),
        ValueKind::Boolean => operand.is_boolean(),
        ValueKind::Timestamp => operand.as_str().and_then(parse_timestamp).is_some(),
    };
    if ok {
        Ok(())
    } else {
        Err(format!("'{name}' has an operand of the wrong type: {operand}"))
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(s).ok()
}

fn type_test(test: TypeTest, value: &Value) -> bool {
    match test {
        TypeTest::IsNull => value.is_null(),
        TypeTest::IsPresent => true,
        TypeTest::IsNumeric => value.is_number(),
        TypeTest::IsString => value.is_string(),
        TypeTest::IsBoolean => value.is_boolean(),
        TypeTest::IsTimestamp => value.as_str().and_then(parse_timestamp).is_some(),
    }
}

fn compare(kind: ValueKind, comparison: Comparison, left: &Value, right: &Value) -> bool {
    if comparison == Comparison::Matches {
        return match (left.as_str(), right.as_str()) {
            (Some(text), Some(pattern)) => glob_matches(pattern, text),
            _ => false,
        };
    }

    let ordering = match kind {
        ValueKind::String => match (left.as_str(), right.as_str()) {
            (Some(a), Some(b)) => Some(a.cmp(b)),
            _ => None,
        },
        ValueKind::Numeric => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) if left.is_number() && right.is_number() => a.partial_cmp(&b),
            _ => None,
        },
        ValueKind::Boolean => match (left.as_bool(), right.as_bool()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => None,
        },
        ValueKind::Timestamp => {
            match (
                left.as_str().and_then(parse_timestamp),
                right.as_str().and_then(parse_timestamp),
            ) {
                (Some(a), Some(b)) => Some(a.cmp(&b)),
                _ => None,
            }
        }
    };

    let Some(ordering) = ordering else {
        return false;
    };
    match comparison {
        Comparison::Equals => ordering == Ordering::Equal,
        Comparison::LessThan => ordering == Ordering::Less,
        Comparison::GreaterThan => ordering == Ordering::Greater,
        Comparison::LessThanEquals => ordering != Ordering::Greater,
        Comparison::GreaterThanEquals => ordering != Ordering::Less,
        Comparison::Matches => false,
    }
}

/// `*` matches any run of characters; `\*` is a literal asterisk.
fn glob_matches(pattern: &str, text: &str) -> bool {
    #[derive(Clone, Copy, PartialEq)]
    enum Token {
        Any,
        Char(char),
    }

    let mut tokens = Vec::new();
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if matches!(chars.peek(), Some('*') | Some('\\')) => {
                if let Some(escaped) = chars.next() {
                    tokens.push(Token::Char(escaped));
                }
            }
            '*' => tokens.push(Token::Any),
            other => tokens.push(Token::Char(other)),
        }
    }

    let text: Vec<char> = text.chars().collect();
    let (mut t, mut p) = (0usize, 0usize);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match tokens.get(p) {
            Some(Token::Char(c)) if *c == text[t] => {
                t += 1;
                p += 1;
            }
            Some(Token::Any) => {
                backtrack = Some((p, t));
                p += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    t = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }
    tokens[p..].iter().all(|token| *token == Token::Any)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule(value: Value) -> ChoiceRule {
        let doc: ChoiceRuleDocument = serde_json::from_value(value).unwrap();
        ChoiceRule::compile(&doc).unwrap()
    }

    fn compile_err(value: Value) -> String {
        let doc: ChoiceRuleDocument = serde_json::from_value(value).unwrap();
        ChoiceRule::compile(&doc).unwrap_err()
    }

    fn eval(r: &ChoiceRule, input: Value) -> Result<bool, PathError> {
        r.evaluate(&input, &Value::Null)
    }

    #[test]
    fn test_string_comparators() {
        let r = rule(json!({"Variable": "$.state", "StringEquals": "success"}));
        assert!(eval(&r, json!({"state": "success"})).unwrap());
        assert!(!eval(&r, json!({"state": "pending"})).unwrap());
        assert!(!eval(&r, json!({"state": 5})).unwrap());

        let r = rule(json!({"Variable": "$.s", "StringLessThan": "b"}));
        assert!(eval(&r, json!({"s": "a"})).unwrap());
        assert!(!eval(&r, json!({"s": "b"})).unwrap());
    }

    #[test]
    fn test_numeric_comparators() {
        let r = rule(json!({"Variable": "$.current_attempts", "NumericLessThanPath": "$.max_attempts"}));
        assert!(eval(&r, json!({"current_attempts": 1, "max_attempts": 2})).unwrap());
        assert!(!eval(&r, json!({"current_attempts": 2, "max_attempts": 2})).unwrap());

        let r = rule(json!({"Variable": "$.n", "NumericGreaterThanEquals": 1.5}));
        assert!(eval(&r, json!({"n": 1.5})).unwrap());
        assert!(eval(&r, json!({"n": 2})).unwrap());
        assert!(!eval(&r, json!({"n": "2"})).unwrap());

        let r = rule(json!({"Variable": "$.n", "NumericEquals": 3}));
        assert!(eval(&r, json!({"n": 3.0})).unwrap());
    }

    #[test]
    fn test_boolean_and_timestamp() {
        let r = rule(json!({"Variable": "$.ready", "BooleanEquals": true}));
        assert!(eval(&r, json!({"ready": true})).unwrap());
        assert!(!eval(&r, json!({"ready": "true"})).unwrap());

        let r = rule(json!({"Variable": "$.at", "TimestampLessThan": "2024-06-01T00:00:00Z"}));
        assert!(eval(&r, json!({"at": "2024-05-31T23:59:59Z"})).unwrap());
        assert!(!eval(&r, json!({"at": "2024-06-01T02:00:00+02:00"})).unwrap());
        assert!(!eval(&r, json!({"at": "yesterday"})).unwrap());
    }

    #[test]
    fn test_string_matches_glob() {
        assert!(glob_matches("report-*.csv", "report-2024-01-01.csv"));
        assert!(glob_matches("*", ""));
        assert!(glob_matches("a*b*c", "aXXbYYc"));
        assert!(!glob_matches("a*b", "ac"));
        assert!(glob_matches(r"literal\*", "literal*"));
        assert!(!glob_matches(r"literal\*", "literalX"));

        let r = rule(json!({"Variable": "$.file", "StringMatches": "*.csv"}));
        assert!(eval(&r, json!({"file": "curve.csv"})).unwrap());
        assert!(!eval(&r, json!({"file": "curve.json"})).unwrap());
    }

    #[test]
    fn test_combinators() {
        let r = rule(json!({
            "And": [
                {"Variable": "$.state", "StringEquals": "pending"},
                {"Not": {"Variable": "$.n", "NumericGreaterThan": 3}}
            ]
        }));
        assert!(eval(&r, json!({"state": "pending", "n": 2})).unwrap());
        assert!(!eval(&r, json!({"state": "pending", "n": 4})).unwrap());

        let r = rule(json!({
            "Or": [
                {"Variable": "$.a", "BooleanEquals": true},
                {"Variable": "$.b", "BooleanEquals": true}
            ]
        }));
        assert!(eval(&r, json!({"a": false, "b": true})).unwrap());
        // Short-circuit: `$.b` is never read once `$.a` matches.
        assert!(eval(&r, json!({"a": true})).unwrap());
    }

    #[test]
    fn test_type_tests() {
        let r = rule(json!({"Variable": "$.x", "IsPresent": false}));
        assert!(eval(&r, json!({})).unwrap());
        assert!(!eval(&r, json!({"x": null})).unwrap());

        let r = rule(json!({"Variable": "$.x", "IsNull": true}));
        assert!(eval(&r, json!({"x": null})).unwrap());
        assert!(eval(&r, json!({})).is_err());

        let r = rule(json!({"Variable": "$.x", "IsTimestamp": true}));
        assert!(eval(&r, json!({"x": "2024-01-01T00:00:00Z"})).unwrap());
        assert!(!eval(&r, json!({"x": "2024-01-01"})).unwrap());
    }

    #[test]
    fn test_missing_variable_is_path_error() {
        let r = rule(json!({"Variable": "$.state", "StringEquals": "x"}));
        assert!(matches!(eval(&r, json!({})), Err(PathError::Missing { .. })));
    }

    #[test]
    fn test_compile_errors() {
        assert!(compile_err(json!({"Variable": "$.a"})).contains("no comparator"));
        assert!(compile_err(json!({"Variable": "$.a", "StringEquals": "x", "NumericEquals": 1}))
            .contains("more than one"));
        assert!(compile_err(json!({"Variable": "$.a", "StringFoo": "x"})).contains("unknown comparator"));
        assert!(compile_err(json!({"Variable": "$.a", "NumericEquals": "1"})).contains("wrong type"));
        assert!(compile_err(json!({"Variable": "$.a", "TimestampEquals": "noon"})).contains("wrong type"));
        assert!(compile_err(json!({"Variable": "$.a", "BooleanLessThan": true})).contains("unknown"));
        assert!(compile_err(json!({"StringEquals": "x"})).contains("Variable"));
        assert!(compile_err(json!({"Variable": "bad", "StringEquals": "x"})).contains("invalid path"));
        assert!(compile_err(json!({"And": []})).contains("at least one"));
        assert!(
            compile_err(json!({"Not": {"Variable": "$.a", "IsNull": true, "Next": "X"}}))
                .contains("must not declare 'Next'")
        );
    }

    #[test]
    fn test_top_level_requires_next() {
        let doc: ChoiceRuleDocument =
            serde_json::from_value(json!({"Variable": "$.a", "IsNull": true})).unwrap();
        assert!(Choice::compile(&doc).is_err());
    }

    #[test]
    fn test_first_match_prefers_declaration_order() {
        let choices: Vec<Choice> = [
            json!({"Variable": "$.state", "StringEquals": "success", "Next": "Ready"}),
            json!({"Variable": "$.current_attempts", "NumericLessThanPath": "$.max_attempts", "Next": "Retry"}),
        ]
        .into_iter()
        .map(|v| Choice::compile(&serde_json::from_value(v).unwrap()).unwrap())
        .collect();

        // Both rules match this document; the earlier one must win.
        let doc = json!({"state": "success", "current_attempts": 0, "max_attempts": 2});
        for _ in 0..10 {
            let hit = first_match(&choices, &doc, &Value::Null).unwrap().unwrap();
            assert_eq!(hit.next, "Ready");
        }

        let doc = json!({"state": "pending", "current_attempts": 2, "max_attempts": 2});
        assert!(first_match(&choices, &doc, &Value::Null).unwrap().is_none());
    }
}
