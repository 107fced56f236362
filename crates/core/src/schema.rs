//! Declarative parameter schemas for task functions.
//!
//! A task declares the shape of the params it accepts; the submission
//! facade evaluates the schema before any job record is created. Evaluation
//! is pure logic: every violated rule produces one [`FieldViolation`].

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::error::CoreError;

/// JSON type a field must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Integer,
    Number,
    String,
    Boolean,
    Array,
    Object,
}

impl FieldType {
    fn name(self) -> &'static str {
        match self {
            FieldType::Integer => "integer",
            FieldType::Number => "number",
            FieldType::String => "string",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Object => "object",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Number => value.is_number(),
            FieldType::String => value.is_string(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
        }
    }
}

/// Rules attached to a single top-level params field.
#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    field_type: FieldType,
    required: bool,
    min: Option<f64>,
    max: Option<f64>,
    min_len: Option<usize>,
    max_len: Option<usize>,
    one_of: Option<Vec<Value>>,
    pattern: Option<Regex>,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
            min: None,
            max: None,
            min_len: None,
            max_len: None,
            one_of: None,
            pattern: None,
        }
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Integer)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Number)
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::String)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Boolean)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Inclusive lower bound for numeric fields.
    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    /// Inclusive upper bound for numeric fields.
    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    /// Length bounds for string and array fields.
    pub fn length(mut self, min: usize, max: usize) -> Self {
        self.min_len = Some(min);
        self.max_len = Some(max);
        self
    }

    pub fn one_of(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.one_of = Some(values.into_iter().collect());
        self
    }

    /// String fields must match `pattern`.
    pub fn pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }

    fn check(&self, value: Option<&Value>, out: &mut Vec<FieldViolation>) {
        let value = match value {
            None | Some(Value::Null) => {
                if self.required {
                    out.push(self.violation("required", "is required".into(), None));
                }
                return;
            }
            Some(v) => v,
        };

        if !self.field_type.matches(value) {
            out.push(self.violation(
                "type",
                format!("must be of type {}", self.field_type.name()),
                Some(value),
            ));
            return;
        }

        if let Some(num) = value.as_f64() {
            if let Some(min) = self.min.filter(|min| num < *min) {
                out.push(self.violation("min_value", format!("must be >= {min}"), Some(value)));
            }
            if let Some(max) = self.max.filter(|max| num > *max) {
                out.push(self.violation("max_value", format!("must be <= {max}"), Some(value)));
            }
        }

        let len = match value {
            Value::String(s) => Some(s.chars().count()),
            Value::Array(items) => Some(items.len()),
            _ => None,
        };
        if let Some(len) = len {
            if let Some(min) = self.min_len.filter(|min| len < *min) {
                out.push(self.violation(
                    "min_length",
                    format!("must have length >= {min}"),
                    Some(value),
                ));
            }
            if let Some(max) = self.max_len.filter(|max| len > *max) {
                out.push(self.violation(
                    "max_length",
                    format!("must have length <= {max}"),
                    Some(value),
                ));
            }
        }

        if let Some(allowed) = &self.one_of {
            if !allowed.contains(value) {
                out.push(self.violation(
                    "one_of",
                    format!("must be one of {}", Value::Array(allowed.clone())),
                    Some(value),
                ));
            }
        }

        if let (Some(re), Some(s)) = (&self.pattern, value.as_str()) {
            if !re.is_match(s) {
                out.push(self.violation(
                    "pattern",
                    format!("must match {}", re.as_str()),
                    Some(value),
                ));
            }
        }
    }

    fn violation(&self, rule: &'static str, message: String, value: Option<&Value>) -> FieldViolation {
        FieldViolation {
            field: self.name.clone(),
            rule,
            message: format!("'{}' {message}", self.name),
            value: value.cloned(),
        }
    }
}

/// A single field-level rule violation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub rule: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// The declared shape of a task's params object.
#[derive(Debug, Clone, Default)]
pub struct ParamSchema {
    fields: Vec<Field>,
    deny_unknown: bool,
}

impl ParamSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Reject params carrying keys that no field declares.
    pub fn deny_unknown_fields(mut self) -> Self {
        self.deny_unknown = true;
        self
    }

    /// Evaluate every rule and collect all violations.
    pub fn violations(&self, params: &Value) -> Vec<FieldViolation> {
        let Some(obj) = params.as_object() else {
            return vec![FieldViolation {
                field: String::new(),
                rule: "type",
                message: "params must be a JSON object".into(),
                value: Some(params.clone()),
            }];
        };

        let mut out = Vec::new();
        for field in &self.fields {
            field.check(obj.get(&field.name), &mut out);
        }

        if self.deny_unknown {
            for key in obj.keys() {
                if !self.fields.iter().any(|f| &f.name == key) {
                    out.push(FieldViolation {
                        field: key.clone(),
                        rule: "unknown_field",
                        message: format!("'{key}' is not a recognised parameter"),
                        value: None,
                    });
                }
            }
        }
        out
    }

    /// Validate `params`, joining all violation messages into one error.
    pub fn validate(&self, params: &Value) -> Result<(), CoreError> {
        let violations = self.violations(params);
        if violations.is_empty() {
            return Ok(());
        }
        let joined = violations
            .iter()
            .map(|v| v.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        Err(CoreError::Validation(joined))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn simulation_schema() -> ParamSchema {
        ParamSchema::new()
            .field(Field::integer("runs").required().min(1.0).max(1_000_000.0))
            .field(
                Field::string("symbol")
                    .length(1, 5)
                    .pattern(Regex::new("^[A-Z]+$").unwrap()),
            )
            .field(Field::string("model").one_of([json!("gbm"), json!("heston")]))
    }

    #[test]
    fn valid_params_pass() {
        let schema = simulation_schema();
        assert!(schema
            .validate(&json!({"runs": 100, "symbol": "AAPL", "model": "gbm"}))
            .is_ok());
    }

    #[test]
    fn missing_required_field_fails() {
        let v = simulation_schema().violations(&json!({"symbol": "AAPL"}));
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].field, "runs");
        assert_eq!(v[0].rule, "required");
    }

    #[test]
    fn null_counts_as_missing() {
        let v = simulation_schema().violations(&json!({"runs": null}));
        assert_eq!(v[0].rule, "required");
    }

    #[test]
    fn wrong_type_skips_remaining_rules() {
        let v = simulation_schema().violations(&json!({"runs": "many"}));
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].rule, "type");
    }

    #[test]
    fn float_is_not_an_integer() {
        let v = simulation_schema().violations(&json!({"runs": 1.5}));
        assert_eq!(v[0].rule, "type");
    }

    #[test]
    fn range_and_pattern_violations_accumulate() {
        let v = simulation_schema().violations(&json!({"runs": 0, "symbol": "aapl123"}));
        let rules: Vec<_> = v.iter().map(|v| v.rule).collect();
        assert_eq!(rules, vec!["min_value", "max_length", "pattern"]);
    }

    #[test]
    fn enum_violation() {
        let v = simulation_schema().violations(&json!({"runs": 5, "model": "bs"}));
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].rule, "one_of");
    }

    #[test]
    fn non_object_params_rejected() {
        let err = simulation_schema().validate(&json!([1, 2, 3])).unwrap_err();
        assert!(err.to_string().contains("JSON object"));
    }

    #[test]
    fn unknown_fields_rejected_only_when_denied() {
        let params = json!({"runs": 5, "seed": 7});
        assert!(simulation_schema().validate(&params).is_ok());

        let strict = simulation_schema().deny_unknown_fields();
        let v = strict.violations(&params);
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].field, "seed");
    }

    #[test]
    fn validate_joins_messages() {
        let err = simulation_schema()
            .validate(&json!({"runs": 0, "model": "bs"}))
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("'runs' must be >= 1"));
        assert!(msg.contains("'model' must be one of"));
    }
}
