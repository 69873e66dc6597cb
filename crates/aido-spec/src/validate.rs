//! Validation functions for sandbox specs
//!
//! Field-level checks run through the `validator` derive on the spec types;
//! their failures are translated into typed [`ValidationErrorKind`]s.
//! Checks that span a collection (path rules, env names) and numeric checks
//! run here directly. Every failure is collected before returning.

use std::borrow::Cow;

use validator::{Validate, ValidationErrors, ValidationErrorsKind};

use crate::error::{ConfigValidationError, UnitError, ValidationErrorKind};
use crate::path_rules;
use crate::types::SandboxConfig;
use crate::units;

const CODE_EMPTY_NAME: &str = "empty_name";
const CODE_EMPTY_RUNTIME: &str = "empty_runtime";
const CODE_INVALID_DURATION: &str = "invalid_duration";
const CODE_DURATION_RANGE: &str = "duration_out_of_range";
const CODE_INVALID_MEMORY: &str = "invalid_memory_format";

fn make_validation_error(
    code: &'static str,
    message: impl Into<Cow<'static, str>>,
    value: &str,
) -> validator::ValidationError {
    let mut err = validator::ValidationError::new(code);
    err.message = Some(message.into());
    err.add_param(Cow::Borrowed("value"), &value);
    err
}

// =============================================================================
// Wrapper functions for the validator crate's custom validation attribute
// =============================================================================

pub fn validate_name_wrapper(name: &str) -> Result<(), validator::ValidationError> {
    if name.trim().is_empty() {
        return Err(make_validation_error(
            CODE_EMPTY_NAME,
            "name must not be empty",
            name,
        ));
    }
    Ok(())
}

pub fn validate_runtime_wrapper(runtime: &str) -> Result<(), validator::ValidationError> {
    if runtime.trim().is_empty() {
        return Err(make_validation_error(
            CODE_EMPTY_RUNTIME,
            "runtime must not be empty",
            runtime,
        ));
    }
    Ok(())
}

/// Accepts `<integer><s|m|h>` between 1 minute and 24 hours
pub fn validate_duration_wrapper(value: &str) -> Result<(), validator::ValidationError> {
    match units::validate_bounded_duration(value) {
        Ok(_) => Ok(()),
        Err(e @ UnitError::DurationOutOfRange { .. }) => Err(make_validation_error(
            CODE_DURATION_RANGE,
            e.to_string(),
            value,
        )),
        Err(e) => Err(make_validation_error(
            CODE_INVALID_DURATION,
            e.to_string(),
            value,
        )),
    }
}

pub fn validate_memory_wrapper(value: &str) -> Result<(), validator::ValidationError> {
    units::parse_memory(value)
        .map(|_| ())
        .map_err(|e| make_validation_error(CODE_INVALID_MEMORY, e.to_string(), value))
}

// =============================================================================
// Whole-config validation
// =============================================================================

/// Validate a sandbox config, returning every violation found.
pub fn validate_config(config: &SandboxConfig) -> Result<(), ConfigValidationError> {
    let mut errors = ConfigValidationError::default();

    if let Err(field_errors) = config.validate() {
        collect_field_errors("", &field_errors, &mut errors);
    }

    validate_path_rules("inputs", &config.inputs, &mut errors);
    validate_path_rules("outputs", &config.outputs, &mut errors);
    validate_cpu(config.resources.cpu, &mut errors);
    validate_env_names(config, &mut errors);

    errors.into_result()
}

/// Every rule must pass the path safety check
pub fn validate_path_rules(field: &str, rules: &[String], errors: &mut ConfigValidationError) {
    for (index, rule) in rules.iter().enumerate() {
        if !path_rules::is_safe(rule) {
            errors.push(
                ValidationErrorKind::UnsafePath { rule: rule.clone() },
                format!("{field}[{index}]"),
            );
        }
    }
}

fn validate_cpu(cpu: f64, errors: &mut ConfigValidationError) {
    if !cpu.is_finite() || cpu <= 0.0 {
        errors.push(ValidationErrorKind::InvalidCpu { cpu }, "resources.cpu");
    }
}

fn validate_env_names(config: &SandboxConfig, errors: &mut ConfigValidationError) {
    for name in config.env.keys() {
        if name.is_empty() || name.contains('=') || name.contains('\0') {
            errors.push(
                ValidationErrorKind::InvalidEnvVar { name: name.clone() },
                format!("env.{name}"),
            );
        }
    }
}

fn collect_field_errors(prefix: &str, source: &ValidationErrors, out: &mut ConfigValidationError) {
    for (field, kind) in source.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };

        match kind {
            ValidationErrorsKind::Field(field_errors) => {
                for err in field_errors {
                    out.push(kind_from_code(err), path.clone());
                }
            }
            ValidationErrorsKind::Struct(inner) => collect_field_errors(&path, inner, out),
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    collect_field_errors(&format!("{path}[{index}]"), inner, out);
                }
            }
        }
    }
}

fn kind_from_code(err: &validator::ValidationError) -> ValidationErrorKind {
    let value = err
        .params
        .get("value")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    match err.code.as_ref() {
        CODE_EMPTY_NAME => ValidationErrorKind::EmptyName,
        CODE_EMPTY_RUNTIME => ValidationErrorKind::EmptyRuntime,
        CODE_INVALID_DURATION => ValidationErrorKind::InvalidDuration { value },
        CODE_DURATION_RANGE => ValidationErrorKind::DurationOutOfRange { value },
        CODE_INVALID_MEMORY => ValidationErrorKind::InvalidMemoryFormat { value },
        other => ValidationErrorKind::Generic {
            message: err
                .message
                .as_ref()
                .map(|m| m.to_string())
                .unwrap_or_else(|| other.to_string()),
        },
    }
}
