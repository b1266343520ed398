//! Intrinsic functions usable in `.$` template fields.
//!
//! A call such as `States.Format('report-{}.csv', $.date)` is parsed once at
//! load time into an [`IntrinsicCall`] and evaluated against the current
//! document every time the owning state runs. All functions are pure.

use chrono::{DateTime, Duration, FixedOffset, Months, NaiveDate, SecondsFormat};
use serde_json::{Number, Value};
use thiserror::Error;

use super::path::{describe, JsonPath, PathError};

/// Errors from parsing or evaluating intrinsic calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntrinsicError {
    #[error("invalid intrinsic call '{call}': {reason}")]
    Syntax { call: String, reason: String },

    #[error("{function} failed: {reason}")]
    Evaluation { function: &'static str, reason: String },

    #[error(transparent)]
    Path(#[from] PathError),
}

/// The supported functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntrinsicFunction {
    Format,
    DateAdd,
    StringToJson,
    JsonToString,
    Array,
    ArrayGetItem,
    ArrayLength,
    MathAdd,
}

impl IntrinsicFunction {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "States.Format" => Self::Format,
            "States.DateAdd" => Self::DateAdd,
            "States.StringToJson" => Self::StringToJson,
            "States.JsonToString" => Self::JsonToString,
            "States.Array" => Self::Array,
            "States.ArrayGetItem" => Self::ArrayGetItem,
            "States.ArrayLength" => Self::ArrayLength,
            "States.MathAdd" => Self::MathAdd,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Format => "States.Format",
            Self::DateAdd => "States.DateAdd",
            Self::StringToJson => "States.StringToJson",
            Self::JsonToString => "States.JsonToString",
            Self::Array => "States.Array",
            Self::ArrayGetItem => "States.ArrayGetItem",
            Self::ArrayLength => "States.ArrayLength",
            Self::MathAdd => "States.MathAdd",
        }
    }

    /// Accepted argument count as (min, max).
    fn arity(self) -> (usize, Option<usize>) {
        match self {
            Self::Format => (1, None),
            Self::DateAdd => (3, Some(3)),
            Self::StringToJson | Self::JsonToString | Self::ArrayLength => (1, Some(1)),
            Self::Array => (0, None),
            Self::ArrayGetItem | Self::MathAdd => (2, Some(2)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IntrinsicArg {
    Literal(Value),
    Path(JsonPath),
    Call(Box<IntrinsicCall>),
}

/// A parsed intrinsic invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct IntrinsicCall {
    pub function: IntrinsicFunction,
    pub args: Vec<IntrinsicArg>,
}

/// Whether a `.$` value should be parsed as an intrinsic call rather than a path.
pub fn looks_like_call(source: &str) -> bool {
    source.trim_start().starts_with("States.")
}

impl IntrinsicCall {
    pub fn parse(source: &str) -> Result<Self, IntrinsicError> {
        let mut parser = Parser::new(source);
        let call = parser.call()?;
        parser.skip_ws();
        if !parser.at_end() {
            return Err(parser.error("unexpected trailing characters"));
        }
        Ok(call)
    }

    pub fn evaluate(&self, document: &Value, context: &Value) -> Result<Value, IntrinsicError> {
        let mut values = Vec::with_capacity(self.args.len());
        for arg in &self.args {
            values.push(match arg {
                IntrinsicArg::Literal(v) => v.clone(),
                IntrinsicArg::Path(path) => path.select(document, context)?.clone(),
                IntrinsicArg::Call(call) => call.evaluate(document, context)?,
            });
        }

        match self.function {
            IntrinsicFunction::Format => format(&values),
            IntrinsicFunction::DateAdd => date_add(&values),
            IntrinsicFunction::StringToJson => {
                let text = expect_str(self.function, &values[0])?;
                serde_json::from_str(text).map_err(|e| eval_error(self.function, e.to_string()))
            }
            IntrinsicFunction::JsonToString => serde_json::to_string(&values[0])
                .map(Value::String)
                .map_err(|e| eval_error(self.function, e.to_string())),
            IntrinsicFunction::Array => Ok(Value::Array(values)),
            IntrinsicFunction::ArrayGetItem => array_get_item(&values),
            IntrinsicFunction::ArrayLength => match &values[0] {
                Value::Array(items) => Ok(Value::from(items.len())),
                other => Err(eval_error(
                    self.function,
                    format!("expected an array, got {}", describe(other)),
                )),
            },
            IntrinsicFunction::MathAdd => math_add(&values),
        }
    }
}

fn eval_error(function: IntrinsicFunction, reason: impl Into<String>) -> IntrinsicError {
    IntrinsicError::Evaluation {
        function: function.name(),
        reason: reason.into(),
    }
}

fn expect_str(function: IntrinsicFunction, value: &Value) -> Result<&str, IntrinsicError> {
    value
        .as_str()
        .ok_or_else(|| eval_error(function, format!("expected a string, got {}", describe(value))))
}

fn expect_integer(function: IntrinsicFunction, value: &Value) -> Result<i64, IntrinsicError> {
    if let Some(i) = value.as_i64() {
        return Ok(i);
    }
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(f as i64),
            _ => Err(eval_error(function, format!("{n} is not an integer"))),
        },
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| eval_error(function, format!("'{s}' is not an integer"))),
        other => Err(eval_error(
            function,
            format!("expected an integer, got {}", describe(other)),
        )),
    }
}

// ---------------------------------------------------------------------------
// Functions
// ---------------------------------------------------------------------------

fn format(values: &[Value]) -> Result<Value, IntrinsicError> {
    let function = IntrinsicFunction::Format;
    let template = expect_str(function, &values[0])?;
    let args = &values[1..];

    let mut out = String::with_capacity(template.len());
    let mut used = 0;
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if matches!(chars.peek(), Some('{') | Some('}')) => {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            }
            '{' if chars.peek() == Some(&'}') => {
                chars.next();
                let Some(arg) = args.get(used) else {
                    return Err(eval_error(
                        function,
                        format!("template has more placeholders than the {} argument(s) given", args.len()),
                    ));
                };
                match arg {
                    Value::String(s) => out.push_str(s),
                    other => out.push_str(&other.to_string()),
                }
                used += 1;
            }
            other => out.push(other),
        }
    }

    if used != args.len() {
        return Err(eval_error(
            function,
            format!("template has {used} placeholder(s) but {} argument(s) were given", args.len()),
        ));
    }
    Ok(Value::String(out))
}

enum DateBase {
    Date(NaiveDate),
    DateTime { value: DateTime<FixedOffset>, zulu: bool },
}

fn date_add(values: &[Value]) -> Result<Value, IntrinsicError> {
    let function = IntrinsicFunction::DateAdd;
    let raw = expect_str(function, &values[0])?.trim();
    let delta = expect_integer(function, &values[1])?;
    let unit = expect_str(function, &values[2])?.to_ascii_lowercase();

    let base = if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        DateBase::Date(date)
    } else if let Ok(value) = DateTime::parse_from_rfc3339(raw) {
        DateBase::DateTime {
            value,
            zulu: raw.ends_with('Z') || raw.ends_with('z'),
        }
    } else {
        return Err(eval_error(function, format!("unparsable base date '{raw}'")));
    };

    let overflow = || eval_error(function, format!("adding {delta} {unit} to '{raw}' overflows"));

    let months = match unit.as_str() {
        "day" | "days" => None,
        "month" | "months" => Some(delta),
        "year" | "years" => Some(delta.checked_mul(12).ok_or_else(overflow)?),
        other => {
            return Err(eval_error(
                function,
                format!("unknown unit '{other}', expected days, months or years"),
            ));
        }
    };

    let result = match (base, months) {
        (DateBase::Date(date), None) => {
            let days = Duration::try_days(delta).ok_or_else(overflow)?;
            let date = date.checked_add_signed(days).ok_or_else(overflow)?;
            date.format("%Y-%m-%d").to_string()
        }
        (DateBase::Date(date), Some(months)) => {
            let date = shift_months(date, months, NaiveDate::checked_add_months, NaiveDate::checked_sub_months)
                .ok_or_else(overflow)?;
            date.format("%Y-%m-%d").to_string()
        }
        (DateBase::DateTime { value, zulu }, None) => {
            let days = Duration::try_days(delta).ok_or_else(overflow)?;
            let value = value.checked_add_signed(days).ok_or_else(overflow)?;
            value.to_rfc3339_opts(SecondsFormat::AutoSi, zulu)
        }
        (DateBase::DateTime { value, zulu }, Some(months)) => {
            let value = shift_months(
                value,
                months,
                DateTime::checked_add_months,
                DateTime::checked_sub_months,
            )
            .ok_or_else(overflow)?;
            value.to_rfc3339_opts(SecondsFormat::AutoSi, zulu)
        }
    };

    Ok(Value::String(result))
}

/// Month arithmetic clamps to the last day of the target month.
fn shift_months<T>(
    value: T,
    months: i64,
    add: fn(T, Months) -> Option<T>,
    sub: fn(T, Months) -> Option<T>,
) -> Option<T> {
    let magnitude = u32::try_from(months.unsigned_abs()).ok()?;
    if months >= 0 {
        add(value, Months::new(magnitude))
    } else {
        sub(value, Months::new(magnitude))
    }
}

fn array_get_item(values: &[Value]) -> Result<Value, IntrinsicError> {
    let function = IntrinsicFunction::ArrayGetItem;
    let Value::Array(items) = &values[0] else {
        return Err(eval_error(
            function,
            format!("expected an array, got {}", describe(&values[0])),
        ));
    };
    let index = expect_integer(function, &values[1])?;
    let len = items.len() as i64;
    let resolved = if index < 0 { len + index } else { index };
    if !(0..len).contains(&resolved) {
        return Err(eval_error(
            function,
            format!("index {index} out of bounds for array of length {len}"),
        ));
    }
    Ok(items[resolved as usize].clone())
}

fn math_add(values: &[Value]) -> Result<Value, IntrinsicError> {
    let function = IntrinsicFunction::MathAdd;
    let (Value::Number(a), Value::Number(b)) = (&values[0], &values[1]) else {
        return Err(eval_error(
            function,
            format!(
                "expected two numbers, got {} and {}",
                describe(&values[0]),
                describe(&values[1])
            ),
        ));
    };

    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x
            .checked_add(y)
            .map(Value::from)
            .ok_or_else(|| eval_error(function, "integer overflow"));
    }

    let sum = a.as_f64().unwrap_or(f64::NAN) + b.as_f64().unwrap_or(f64::NAN);
    Number::from_f64(sum)
        .map(Value::Number)
        .ok_or_else(|| eval_error(function, "result is not a finite number"))
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, reason: &str) -> IntrinsicError {
        IntrinsicError::Syntax {
            call: self.source.to_string(),
            reason: format!("{reason} (at offset {})", self.pos),
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn call(&mut self) -> Result<IntrinsicCall, IntrinsicError> {
        self.skip_ws();
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_')
        {
            self.pos += 1;
        }
        let name: String = self.chars[start..self.pos].iter().collect();
        let function = IntrinsicFunction::from_name(&name)
            .ok_or_else(|| self.error(&format!("unknown function '{name}'")))?;

        self.skip_ws();
        if self.peek() != Some('(') {
            return Err(self.error("expected '('"));
        }
        self.pos += 1;

        let mut args = Vec::new();
        self.skip_ws();
        if self.peek() == Some(')') {
            self.pos += 1;
        } else {
            loop {
                args.push(self.arg()?);
                self.skip_ws();
                match self.peek() {
                    Some(',') => self.pos += 1,
                    Some(')') => {
                        self.pos += 1;
                        break;
                    }
                    _ => return Err(self.error("expected ',' or ')'")),
                }
            }
        }

        let (min, max) = function.arity();
        if args.len() < min || max.is_some_and(|max| args.len() > max) {
            return Err(self.error(&format!(
                "{} takes {} argument(s), got {}",
                function.name(),
                match max {
                    Some(max) if max == min => min.to_string(),
                    Some(max) => format!("{min} to {max}"),
                    None => format!("at least {min}"),
                },
                args.len()
            )));
        }

        Ok(IntrinsicCall { function, args })
    }

    fn arg(&mut self) -> Result<IntrinsicArg, IntrinsicError> {
        self.skip_ws();
        match self.peek() {
            Some('\'') => self.string().map(|s| IntrinsicArg::Literal(Value::String(s))),
            Some('$') => self.path(),
            Some(c) if c == '-' || c.is_ascii_digit() => self.number(),
            Some(_) => {
                let rest: String = self.chars[self.pos..].iter().collect();
                for (word, value) in [
                    ("true", Value::Bool(true)),
                    ("false", Value::Bool(false)),
                    ("null", Value::Null),
                ] {
                    if rest.starts_with(word) {
                        self.pos += word.len();
                        return Ok(IntrinsicArg::Literal(value));
                    }
                }
                if rest.starts_with("States.") {
                    return Ok(IntrinsicArg::Call(Box::new(self.call()?)));
                }
                Err(self.error("expected an argument"))
            }
            None => Err(self.error("unexpected end of input")),
        }
    }

    /// Single-quoted string. `\{` and `\}` keep their backslash so that
    /// `States.Format` can tell escaped braces from placeholders.
    fn string(&mut self) -> Result<String, IntrinsicError> {
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated string")),
                Some('\\') => {
                    let next = self
                        .chars
                        .get(self.pos + 1)
                        .copied()
                        .ok_or_else(|| self.error("dangling escape"))?;
                    if next == '{' || next == '}' {
                        out.push('\\');
                    }
                    out.push(next);
                    self.pos += 2;
                }
                Some('\'') => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some(c) => {
                    out.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    fn path(&mut self) -> Result<IntrinsicArg, IntrinsicError> {
        let start = self.pos;
        let mut quote: Option<char> = None;
        while let Some(c) = self.peek() {
            match quote {
                Some(q) if c == q => quote = None,
                Some(_) => {}
                None if c == '\'' || c == '"' => quote = Some(c),
                None if c == ',' || c == ')' => break,
                None => {}
            }
            self.pos += 1;
        }
        let raw: String = self.chars[start..self.pos].iter().collect();
        Ok(IntrinsicArg::Path(JsonPath::parse(raw.trim())?))
    }

    fn number(&mut self) -> Result<IntrinsicArg, IntrinsicError> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'))
        {
            self.pos += 1;
        }
        let raw: String = self.chars[start..self.pos].iter().collect();
        let number: Number = serde_json::from_str(&raw)
            .map_err(|_| self.error(&format!("'{raw}' is not a number")))?;
        Ok(IntrinsicArg::Literal(Value::Number(number)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(source: &str, doc: &Value) -> Result<Value, IntrinsicError> {
        IntrinsicCall::parse(source)?.evaluate(doc, &Value::Null)
    }

    #[test]
    fn test_parse_nested_call() {
        let call = IntrinsicCall::parse("States.Format('{}-{}', $.a, States.ArrayLength($.b))").unwrap();
        assert_eq!(call.function, IntrinsicFunction::Format);
        assert_eq!(call.args.len(), 3);
        assert!(matches!(call.args[2], IntrinsicArg::Call(_)));
    }

    #[test]
    fn test_parse_rejects_unknown_function() {
        let err = IntrinsicCall::parse("States.Nope(1)").unwrap_err();
        assert!(err.to_string().contains("unknown function"), "got: {err}");
    }

    #[test]
    fn test_parse_checks_arity() {
        assert!(IntrinsicCall::parse("States.DateAdd('2024-01-01', 1)").is_err());
        assert!(IntrinsicCall::parse("States.MathAdd(1, 2, 3)").is_err());
        assert!(IntrinsicCall::parse("States.Format()").is_err());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in [
            "States.Format('x'",
            "States.Format('x' $.a)",
            "States.Format('unterminated)",
            "States.Format('x') trailing",
            "States.Format(oops)",
        ] {
            assert!(IntrinsicCall::parse(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_format_substitutes_in_order() {
        let doc = json!({"name": "swaps", "count": 3});
        let out = eval("States.Format('{} has {} files', $.name, $.count)", &doc).unwrap();
        assert_eq!(out, json!("swaps has 3 files"));
    }

    #[test]
    fn test_format_escaped_braces() {
        let out = eval(r"States.Format('\{literal\} {}', 'x')", &json!({})).unwrap();
        assert_eq!(out, json!("{literal} x"));
    }

    #[test]
    fn test_format_argument_count_mismatch() {
        assert!(eval("States.Format('{} {}', 'a')", &json!({})).is_err());
        assert!(eval("States.Format('{}', 'a', 'b')", &json!({})).is_err());
    }

    #[test]
    fn test_format_missing_path_is_path_error() {
        let err = eval("States.Format('{}', $.missing)", &json!({})).unwrap_err();
        assert!(matches!(err, IntrinsicError::Path(_)));
    }

    #[test]
    fn test_date_add_days() {
        let doc = json!({"valuation_date": "2024-02-27"});
        let out = eval("States.DateAdd($.valuation_date, 3, 'days')", &doc).unwrap();
        assert_eq!(out, json!("2024-03-01"));
        let out = eval("States.DateAdd($.valuation_date, -27, 'day')", &doc).unwrap();
        assert_eq!(out, json!("2024-01-31"));
    }

    #[test]
    fn test_date_add_months_clamps_to_month_end() {
        let out = eval("States.DateAdd('2024-01-31', 1, 'months')", &json!({})).unwrap();
        assert_eq!(out, json!("2024-02-29"));
        let out = eval("States.DateAdd('2024-03-31', -1, 'Months')", &json!({})).unwrap();
        assert_eq!(out, json!("2024-02-29"));
    }

    #[test]
    fn test_date_add_years() {
        let out = eval("States.DateAdd('2024-02-29', 1, 'years')", &json!({})).unwrap();
        assert_eq!(out, json!("2025-02-28"));
    }

    #[test]
    fn test_date_add_preserves_timestamp_form() {
        let out = eval("States.DateAdd('2024-01-01T10:00:00Z', 2, 'days')", &json!({})).unwrap();
        assert_eq!(out, json!("2024-01-03T10:00:00Z"));
        let out = eval("States.DateAdd('2024-01-01T10:00:00+02:00', 1, 'month')", &json!({})).unwrap();
        assert_eq!(out, json!("2024-02-01T10:00:00+02:00"));
    }

    #[test]
    fn test_date_add_rejects_bad_input() {
        assert!(eval("States.DateAdd('not-a-date', 1, 'days')", &json!({})).is_err());
        assert!(eval("States.DateAdd('2024-01-01', 1, 'weeks')", &json!({})).is_err());
        assert!(eval("States.DateAdd('2024-01-01', 1.5, 'days')", &json!({})).is_err());
    }

    #[test]
    fn test_array_functions() {
        let doc = json!({"items": ["a", "b", "c"]});
        assert_eq!(eval("States.ArrayLength($.items)", &doc).unwrap(), json!(3));
        assert_eq!(eval("States.ArrayGetItem($.items, -1)", &doc).unwrap(), json!("c"));
        assert!(eval("States.ArrayGetItem($.items, 3)", &doc).is_err());
        assert_eq!(
            eval("States.Array(1, 'two', $.items[0], null)", &doc).unwrap(),
            json!([1, "two", "a", null])
        );
    }

    #[test]
    fn test_json_string_conversions() {
        let doc = json!({"raw": "{\"a\":[1,2]}", "obj": {"k": true}});
        assert_eq!(eval("States.StringToJson($.raw)", &doc).unwrap(), json!({"a": [1, 2]}));
        assert_eq!(eval("States.JsonToString($.obj)", &doc).unwrap(), json!("{\"k\":true}"));
        assert!(eval("States.StringToJson('{bad')", &doc).is_err());
    }

    #[test]
    fn test_math_add() {
        let doc = json!({"current_attempts": 1});
        assert_eq!(eval("States.MathAdd($.current_attempts, 1)", &doc).unwrap(), json!(2));
        assert_eq!(eval("States.MathAdd(1.5, -0.5)", &doc).unwrap(), json!(1.0));
        assert!(eval("States.MathAdd('1', 1)", &doc).is_err());
    }

    #[test]
    fn test_path_argument_with_quoted_comma() {
        let doc = json!({"a,b": "x"});
        assert_eq!(eval("States.Format('{}', $['a,b'])", &doc).unwrap(), json!("x"));
    }
}
