//! Protocol error codes reported by the sequencing engine.

use strum_macros::EnumIter;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, ScpiError>;

/// Errors surfaced to the protocol layer.
///
/// Each variant maps to the numeric SCPI error code returned by [`ScpiError::code`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
pub enum ScpiError {
    #[error("Execution error")]
    ExecutionError,
    #[error("Trigger ignored")]
    TriggerIgnored,
    #[error("Data out of range")]
    DataOutOfRange,
    #[error("Hardware error")]
    HardwareError,
    #[error("Hardware missing")]
    HardwareMissing,
    #[error("Mass storage error")]
    MassStorageError,
    #[error("Missing media")]
    MissingMassMedia,
    #[error("Power limit exceeded")]
    PowerLimitExceeded,
    #[error("Voltage limit exceeded")]
    VoltageLimitExceeded,
    #[error("Current limit exceeded")]
    CurrentLimitExceeded,
    #[error("Incompatible transient modes")]
    IncompatibleTransientModes,
    #[error("List lengths are not equivalent")]
    ListLengthsNotEquivalent,
    #[error("Cannot be changed while transient trigger is initiated")]
    CannotChangeTransientTrigger,
    #[error("Cannot initiate while in fixed mode")]
    CannotInitiateWhileInFixedMode,
    #[error("List not found")]
    ListNotFound,
    #[error("List is empty")]
    ListIsEmpty,
    #[error("Cannot load empty profile")]
    CannotLoadEmptyProfile,
    #[error("No FAT file system on mass media")]
    MassMediaNoFilesystem,
    #[error("Module mismatch in profile")]
    ProfileModuleMismatch,
    #[error("External EEPROM save failed")]
    ExternalEepromSaveFailed,
}

impl ScpiError {
    /// The numeric code pushed onto the SCPI error queue.
    pub const fn code(&self) -> i16 {
        use ScpiError as E;
        match self {
            E::ExecutionError => -200,
            E::TriggerIgnored => -211,
            E::DataOutOfRange => -222,
            E::HardwareError => -240,
            E::HardwareMissing => -241,
            E::MassStorageError => -250,
            E::MissingMassMedia => -252,
            E::PowerLimitExceeded => 150,
            E::VoltageLimitExceeded => 151,
            E::CurrentLimitExceeded => 152,
            E::IncompatibleTransientModes => 304,
            E::ListLengthsNotEquivalent => 307,
            E::CannotChangeTransientTrigger => 308,
            E::CannotInitiateWhileInFixedMode => 309,
            E::ListNotFound => 310,
            E::ListIsEmpty => 311,
            E::CannotLoadEmptyProfile => 400,
            E::ProfileModuleMismatch => 401,
            E::MassMediaNoFilesystem => 410,
            E::ExternalEepromSaveFailed => 615,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn error_codes_are_unique() {
        for (idx, a) in ScpiError::iter().enumerate() {
            for b in ScpiError::iter().skip(idx + 1) {
                assert_ne!(a.code(), b.code(), "{:?} and {:?} share a code", a, b);
            }
        }
    }

    #[test]
    fn module_mismatch_is_distinct_from_storage_failure() {
        assert_eq!(ScpiError::ProfileModuleMismatch.code(), 401);
        assert_eq!(ScpiError::MassStorageError.code(), -250);
        assert_eq!(ScpiError::TriggerIgnored.code(), -211);
    }
}
