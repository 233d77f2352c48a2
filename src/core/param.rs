//! Parameter schemas and constraints for catalog transforms.
//!
//! Each catalog entry declares its parameters (name, type, default, numeric
//! bounds) so a configuration can be checked before any transform is built.

use crate::core::types::{ParamType, ParamValue};
use serde::{Deserialize, Serialize};

/// Definition of a transform parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterDefinition {
    /// Parameter name as it appears in the params mapping
    pub name: String,
    /// Declared type
    pub param_type: ParamType,
    /// Default value used by the provider when the parameter is omitted
    pub default_value: ParamValue,
    /// Description for documentation
    pub description: String,
    /// Constraints for validation
    pub constraints: Vec<Constraint>,
}

/// Constraints that can be applied to parameter values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params")]
pub enum Constraint {
    /// Every numeric component must be within [min, max]
    Range { min: f64, max: f64 },
    /// Every numeric component must be >= min
    MinValue(f64),
    /// Every numeric component must be <= max
    MaxValue(f64),
    /// Every numeric component must be > 0
    Positive,
    /// Value must be one of the listed strings
    OneOf(Vec<String>),
    /// List must contain exactly this many items
    Length(usize),
}

impl ParameterDefinition {
    /// Create a new parameter definition.
    pub fn new(name: impl Into<String>, param_type: ParamType, default_value: ParamValue) -> Self {
        Self {
            name: name.into(),
            param_type,
            default_value,
            description: String::new(),
            constraints: Vec::new(),
        }
    }

    /// Shorthand for the probability parameter every transform carries.
    pub fn probability(default: f64) -> Self {
        Self::new("p", ParamType::Float, ParamValue::Float(default))
            .with_description("Probability of applying the transform")
            .with_range(0.0, 1.0)
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add a range constraint.
    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.constraints.push(Constraint::Range { min, max });
        self
    }

    /// Add a constraint.
    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Validate a value against this parameter's type and constraints.
    pub fn validate(&self, value: &ParamValue) -> Result<(), String> {
        if !self.param_type.matches(value) {
            return Err(format!(
                "parameter '{}' expects {}, got {} ({})",
                self.name,
                self.param_type,
                value.type_name(),
                value
            ));
        }

        if value.is_null() {
            return Ok(());
        }

        for constraint in &self.constraints {
            constraint
                .validate(value)
                .map_err(|e| format!("parameter '{}': {}", self.name, e))?;
        }

        Ok(())
    }
}

impl Constraint {
    /// Validate a value against this constraint.
    pub fn validate(&self, value: &ParamValue) -> Result<(), String> {
        match self {
            Constraint::Range { min, max } => {
                for num in value.numeric_values() {
                    if num < *min || num > *max {
                        return Err(format!("value {} is out of range [{}, {}]", num, min, max));
                    }
                }
            }

            Constraint::MinValue(min) => {
                for num in value.numeric_values() {
                    if num < *min {
                        return Err(format!("value {} is below minimum {}", num, min));
                    }
                }
            }

            Constraint::MaxValue(max) => {
                for num in value.numeric_values() {
                    if num > *max {
                        return Err(format!("value {} is above maximum {}", num, max));
                    }
                }
            }

            Constraint::Positive => {
                for num in value.numeric_values() {
                    if num <= 0.0 {
                        return Err(format!("value {} must be positive", num));
                    }
                }
            }

            Constraint::OneOf(options) => {
                if let Some(s) = value.as_str() {
                    if !options.iter().any(|o| o == s) {
                        return Err(format!("'{}' is not one of {:?}", s, options));
                    }
                }
            }

            Constraint::Length(len) => {
                if let ParamValue::List(items) = value {
                    if items.len() != *len {
                        return Err(format!("expected {} items, got {}", len, items.len()));
                    }
                }
            }
        }

        Ok(())
    }

    /// Get a human-readable description of this constraint.
    pub fn description(&self) -> String {
        match self {
            Constraint::Range { min, max } => format!("between {} and {}", min, max),
            Constraint::MinValue(min) => format!("at least {}", min),
            Constraint::MaxValue(max) => format!("at most {}", max),
            Constraint::Positive => "positive".to_string(),
            Constraint::OneOf(options) => format!("one of {}", options.join(", ")),
            Constraint::Length(len) => format!("{} items", len),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_checks_both_ends_of_a_range_value() {
        let def = ParameterDefinition::new("blur_limit", ParamType::Range, ParamValue::int_range(3, 7))
            .with_range(3.0, 31.0);

        assert!(def.validate(&ParamValue::int_range(3, 7)).is_ok());
        assert!(def.validate(&ParamValue::Int(9)).is_ok());
        assert!(def.validate(&ParamValue::int_range(1, 7)).is_err());
        assert!(def.validate(&ParamValue::int_range(3, 40)).is_err());
    }

    #[test]
    fn test_type_mismatch_is_reported() {
        let def = ParameterDefinition::probability(0.5);
        let err = def.validate(&ParamValue::Str("often".into())).unwrap_err();
        assert!(err.contains("'p'"));
        assert!(err.contains("float"));
    }

    #[test]
    fn test_probability_bounds() {
        let def = ParameterDefinition::probability(0.5);
        assert!(def.validate(&ParamValue::Float(1.0)).is_ok());
        assert!(def.validate(&ParamValue::Int(0)).is_ok());
        assert!(def.validate(&ParamValue::Float(1.5)).is_err());
    }

    #[test]
    fn test_null_skips_constraints() {
        let def = ParameterDefinition::new("mean", ParamType::List, ParamValue::Null)
            .with_constraint(Constraint::Length(3));
        assert!(def.validate(&ParamValue::Null).is_ok());
        assert!(def
            .validate(&ParamValue::List(vec![ParamValue::Float(0.5)]))
            .is_err());
    }

    #[test]
    fn test_one_of() {
        let c = Constraint::OneOf(vec!["a".into(), "b".into()]);
        assert!(c.validate(&ParamValue::Str("a".into())).is_ok());
        assert!(c.validate(&ParamValue::Str("c".into())).is_err());
    }
}
