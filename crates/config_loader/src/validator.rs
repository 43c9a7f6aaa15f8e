//! Settings validation
//!
//! Rules:
//! - write_key non-empty
//! - engine tunables legal (see `EngineConfig::validate`)

use contracts::{ContractError, Settings};

/// Validate settings
///
/// Returns the first error encountered, or Ok(()).
pub fn validate(settings: &Settings) -> Result<(), ContractError> {
    validate_write_key(settings)?;
    settings.engine.validate()?;
    Ok(())
}

fn validate_write_key(settings: &Settings) -> Result<(), ContractError> {
    if settings.write_key.trim().is_empty() {
        return Err(ContractError::config_validation(
            "write_key",
            "write_key cannot be empty",
        ));
    }
    Ok(())
}
