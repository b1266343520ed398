//! Payload templates (`Parameters`, `ResultSelector`).
//!
//! A template is compiled once from its JSON declaration into a recursive
//! [`Template`] value. Keys ending in `.$` become dynamic fields whose value
//! is a path or an intrinsic call; the suffix is dropped from the output key.

use serde_json::{Map, Value};
use thiserror::Error;

use super::intrinsics::{looks_like_call, IntrinsicCall, IntrinsicError};
use super::path::{JsonPath, PathError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("field '{0}' ends with '.$' but its value is not a string")]
    DynamicNotString(String),

    #[error("field '{0}' is declared twice")]
    DuplicateKey(String),

    #[error("field '{key}': {source}")]
    Path {
        key: String,
        #[source]
        source: PathError,
    },

    #[error("field '{key}': {source}")]
    Intrinsic {
        key: String,
        #[source]
        source: IntrinsicError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Template {
    Literal(Value),
    Path(JsonPath),
    Intrinsic(IntrinsicCall),
    Object(Vec<(String, Template)>),
    Array(Vec<Template>),
}

impl Template {
    pub fn compile(value: &Value) -> Result<Self, TemplateError> {
        match value {
            Value::Object(map) => {
                let mut fields: Vec<(String, Template)> = Vec::with_capacity(map.len());
                for (key, child) in map {
                    let (name, template) = match key.strip_suffix(".$") {
                        Some(name) => (name.to_string(), Self::compile_dynamic(key, child)?),
                        None => (key.clone(), Self::compile(child)?),
                    };
                    if fields.iter().any(|(existing, _)| *existing == name) {
                        return Err(TemplateError::DuplicateKey(name));
                    }
                    fields.push((name, template));
                }
                Ok(Template::Object(fields))
            }
            Value::Array(items) => items
                .iter()
                .map(Self::compile)
                .collect::<Result<Vec<_>, _>>()
                .map(Template::Array),
            other => Ok(Template::Literal(other.clone())),
        }
    }

    fn compile_dynamic(key: &str, value: &Value) -> Result<Self, TemplateError> {
        let Value::String(source) = value else {
            return Err(TemplateError::DynamicNotString(key.to_string()));
        };
        if looks_like_call(source) {
            IntrinsicCall::parse(source)
                .map(Template::Intrinsic)
                .map_err(|source| TemplateError::Intrinsic {
                    key: key.to_string(),
                    source,
                })
        } else {
            JsonPath::parse(source)
                .map(Template::Path)
                .map_err(|source| TemplateError::Path {
                    key: key.to_string(),
                    source,
                })
        }
    }

    /// Build the output value against the current document and context.
    pub fn evaluate(&self, document: &Value, context: &Value) -> Result<Value, IntrinsicError> {
        match self {
            Template::Literal(value) => Ok(value.clone()),
            Template::Path(path) => Ok(path.select(document, context)?.clone()),
            Template::Intrinsic(call) => call.evaluate(document, context),
            Template::Object(fields) => {
                let mut out = Map::with_capacity(fields.len());
                for (key, template) in fields {
                    out.insert(key.clone(), template.evaluate(document, context)?);
                }
                Ok(Value::Object(out))
            }
            Template::Array(items) => items
                .iter()
                .map(|item| item.evaluate(document, context))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compile_mixed_template() {
        let template = Template::compile(&json!({
            "bucket": "reports",
            "key.$": "$.file.name",
            "nested": {"date.$": "States.DateAdd($.date, 1, 'days')", "tags": ["a", "b"]}
        }))
        .unwrap();

        let Template::Object(fields) = &template else {
            panic!("expected object");
        };
        assert_eq!(fields.len(), 3);
        assert!(fields.iter().any(|(k, t)| k == "key" && matches!(t, Template::Path(_))));
    }

    #[test]
    fn test_evaluate_resolves_against_document() {
        let template = Template::compile(&json!({
            "bucket": "reports",
            "key.$": "$.file.name",
            "meta": {"date.$": "States.DateAdd($.date, 1, 'days')", "fixed": [1, {"x.$": "$.n"}]}
        }))
        .unwrap();
        let doc = json!({"file": {"name": "a.csv"}, "date": "2024-12-31", "n": 7});
        let out = template.evaluate(&doc, &Value::Null).unwrap();
        assert_eq!(
            out,
            json!({
                "bucket": "reports",
                "key": "a.csv",
                "meta": {"date": "2025-01-01", "fixed": [1, {"x": 7}]}
            })
        );
    }

    #[test]
    fn test_context_paths() {
        let template = Template::compile(&json!({"run.$": "$$.Execution.Name"})).unwrap();
        let ctx = json!({"Execution": {"Name": "daily-2024"}});
        let out = template.evaluate(&json!({}), &ctx).unwrap();
        assert_eq!(out, json!({"run": "daily-2024"}));
    }

    #[test]
    fn test_missing_path_fails() {
        let template = Template::compile(&json!({"a.$": "$.nope"})).unwrap();
        let err = template.evaluate(&json!({}), &Value::Null).unwrap_err();
        assert!(matches!(err, IntrinsicError::Path(_)));
    }

    #[test]
    fn test_compile_errors() {
        assert!(matches!(
            Template::compile(&json!({"a.$": 5})),
            Err(TemplateError::DynamicNotString(_))
        ));
        assert!(matches!(
            Template::compile(&json!({"a.$": "not a path"})),
            Err(TemplateError::Path { .. })
        ));
        assert!(matches!(
            Template::compile(&json!({"a.$": "States.Bogus()"})),
            Err(TemplateError::Intrinsic { .. })
        ));
        assert!(matches!(
            Template::compile(&json!({"a": 1, "a.$": "$.x"})),
            Err(TemplateError::DuplicateKey(_))
        ));
    }

    #[test]
    fn test_scalar_template_is_literal() {
        let template = Template::compile(&json!("plain")).unwrap();
        assert_eq!(template.evaluate(&json!({}), &Value::Null).unwrap(), json!("plain"));
    }
}
