use std::sync::Arc;

use serde_json::Value;
use xval_core::{
    ConversionRequest, Converter, ErrorInfo, FieldPath, FormatValidator, Schema, ValidationOutcome,
    ValidatorError, ValidatorReference,
};

use crate::abi::ConversionReply;
use crate::config::HostConfig;
use crate::registry::ModuleRegistry;
use crate::serde::{from_json_slice, to_canonical_json_bytes};

/// [`FormatValidator`] and [`Converter`] backed by sandboxed WebAssembly modules.
///
/// References use the `<module>:<export>` form; the backend tag has already
/// been consumed by whoever selected this backend.
#[derive(Debug, Clone)]
pub struct WasmValidator {
    registry: Arc<ModuleRegistry>,
}

fn with_dispatch_context(
    err: ValidatorError,
    field_path: &FieldPath,
    reference: &str,
) -> ValidatorError {
    err.with_context("field_path", field_path.to_string())
        .with_context("reference", reference)
}

fn marshal_error(err: ValidatorError) -> ValidatorError {
    ValidatorError::Infrastructure(err.info().clone())
}

impl WasmValidator {
    /// Dispatches against an already populated registry.
    pub fn new(registry: Arc<ModuleRegistry>) -> Self {
        Self { registry }
    }

    /// Builds a registry from `config` and registers every preloaded module.
    pub fn from_config(config: &HostConfig) -> Result<Self, ValidatorError> {
        let registry = ModuleRegistry::new(config)?;
        for identifier in &config.preload {
            registry.register_module(identifier)?;
        }
        Ok(Self::new(Arc::new(registry)))
    }

    /// Registry backing this validator.
    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    fn call(
        &self,
        reference: &ValidatorReference,
        input: &[u8],
    ) -> Result<Option<Vec<u8>>, ValidatorError> {
        let invocation = self
            .registry
            .invoke(&reference.module, &reference.export, input)
            .inspect_err(|err| {
                if err.is_infrastructure() {
                    tracing::warn!(
                        module = %reference.module,
                        export = %reference.export,
                        code = %err.info().code,
                        "guest invocation failed"
                    );
                }
            })?;
        tracing::debug!(
            module = %reference.module,
            export = %reference.export,
            fuel_used = invocation.fuel_used,
            "guest invocation finished"
        );
        Ok(invocation.output)
    }

    fn run_validator(
        &self,
        reference: &str,
        value: &Value,
    ) -> Result<Option<String>, ValidatorError> {
        let reference = ValidatorReference::parse(reference)?;
        let input = to_canonical_json_bytes(value).map_err(marshal_error)?;
        let Some(failure) = self.call(&reference, &input)? else {
            return Ok(None);
        };
        String::from_utf8(failure).map(Some).map_err(|err| {
            ValidatorError::Infrastructure(
                ErrorInfo::new("marshal.invalid_utf8", "failure message is not UTF-8")
                    .with_hint(err.to_string()),
            )
        })
    }

    fn run_converter(&self, request: &ConversionRequest<'_>) -> Result<Value, ValidatorError> {
        let reference = ValidatorReference::parse(request.reference)?;
        let input = to_canonical_json_bytes(request).map_err(marshal_error)?;
        let output = self.call(&reference, &input)?.ok_or_else(|| {
            ValidatorError::Infrastructure(ErrorInfo::new(
                "marshal.empty_reply",
                "converter returned no reply",
            ))
        })?;
        match from_json_slice::<ConversionReply>(&output).map_err(marshal_error)? {
            ConversionReply::Converted(value) => Ok(value),
            ConversionReply::Rejected(message) => Err(ValidatorError::Rejected(
                ErrorInfo::new("conversion.rejected", message)
                    .with_context("current_version", request.current_version)
                    .with_context("target_version", request.target_version),
            )),
        }
    }
}

impl FormatValidator for WasmValidator {
    fn validate(
        &self,
        field_path: &FieldPath,
        reference: &str,
        _schema: &Schema,
        value: &Value,
    ) -> ValidationOutcome {
        match self.run_validator(reference, value) {
            Ok(None) => ValidationOutcome::Valid,
            Ok(Some(message)) => ValidationOutcome::Invalid { message },
            Err(err) => ValidationOutcome::Error(with_dispatch_context(err, field_path, reference)),
        }
    }

    fn validate_program(
        &self,
        field_path: &FieldPath,
        reference: &str,
        _schema: &Schema,
    ) -> Result<(), ValidatorError> {
        let parsed = ValidatorReference::parse(reference)
            .map_err(|err| with_dispatch_context(err, field_path, reference))?;
        self.registry
            .check_entry_point(&parsed.module, &parsed.export)
            .map_err(|err| with_dispatch_context(err, field_path, reference))
    }
}

impl Converter for WasmValidator {
    fn convert(&self, request: &ConversionRequest<'_>) -> Result<Value, ValidatorError> {
        self.run_converter(request)
            .map_err(|err| with_dispatch_context(err, request.field_path, request.reference))
    }
}
