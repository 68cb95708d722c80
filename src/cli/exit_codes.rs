//! CLI Exit Codes
//!
//! Standard exit codes for CLI operations and automation.

use crate::config::ConfigError;
use crate::core::client::RpcError;
use crate::core::orchestrator::RunError;
use crate::core::transport::TransportError;
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Socket could not be bound or used
    pub const NETWORK_ERROR: u8 = 3;

    /// No device answered discovery before the deadline
    pub const NO_DEVICES: u8 = 4;

    /// Permission denied (e.g. broadcast or privileged port)
    pub const PERMISSION_DENIED: u8 = 5;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 6;

    /// Protocol error
    pub const PROTOCOL_ERROR: u8 = 7;

    /// Writing records failed
    pub const OUTPUT_FAILED: u8 = 8;

    /// User cancelled
    pub const CANCELLED: u8 = 9;

    /// Internal error
    pub const INTERNAL_ERROR: u8 = 127;
}

/// CLI operation result
#[derive(Debug)]
pub enum CliResult {
    /// Success with optional message
    Success(Option<String>),

    /// Error with code and message
    Error(u8, String),
}

impl CliResult {
    /// Plain success
    pub fn success() -> Self {
        Self::Success(None)
    }

    /// Success with a message for stderr
    pub fn success_with_message(msg: impl Into<String>) -> Self {
        Self::Success(Some(msg.into()))
    }

    /// Failure with `code`
    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    /// Nothing answered discovery
    pub fn no_devices(target: impl std::fmt::Display) -> Self {
        Self::Error(ExitCodes::NO_DEVICES, format!("No device answered at {target}"))
    }

    /// Interrupted by the user
    pub fn cancelled() -> Self {
        Self::Error(ExitCodes::CANCELLED, "Interrupted".to_string())
    }

    /// Map a top-level error chain to an exit code
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let code = err
            .chain()
            .find_map(|cause| {
                if let Some(e) = cause.downcast_ref::<ConfigError>() {
                    Some(Self::from(e).code())
                } else if let Some(e) = cause.downcast_ref::<RunError>() {
                    Some(Self::from(e).code())
                } else if let Some(e) = cause.downcast_ref::<TransportError>() {
                    Some(Self::from(e).code())
                } else {
                    cause
                        .downcast_ref::<std::io::Error>()
                        .map(|e| Self::from(e).code())
                }
            })
            .unwrap_or(ExitCodes::ERROR);

        Self::Error(code, format!("{err:#}"))
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success(_) => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    /// Get message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(Some(msg)) | Self::Error(_, msg) => Some(msg),
            Self::Success(None) => None,
        }
    }

    /// Convert to `ExitCode`
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl From<&std::io::Error> for CliResult {
    fn from(err: &std::io::Error) -> Self {
        use std::io::ErrorKind;

        let code = match err.kind() {
            ErrorKind::PermissionDenied => ExitCodes::PERMISSION_DENIED,
            ErrorKind::AddrInUse | ErrorKind::AddrNotAvailable => ExitCodes::NETWORK_ERROR,
            ErrorKind::BrokenPipe => ExitCodes::OUTPUT_FAILED,
            _ => ExitCodes::ERROR,
        };

        Self::Error(code, err.to_string())
    }
}

impl From<&TransportError> for CliResult {
    fn from(err: &TransportError) -> Self {
        let code = match err {
            TransportError::BindFailed { source, .. } | TransportError::IoError(source)
                if source.kind() == std::io::ErrorKind::PermissionDenied =>
            {
                ExitCodes::PERMISSION_DENIED
            }
            _ => ExitCodes::NETWORK_ERROR,
        };
        Self::Error(code, err.to_string())
    }
}

impl From<&ConfigError> for CliResult {
    fn from(err: &ConfigError) -> Self {
        Self::Error(ExitCodes::CONFIG_ERROR, err.to_string())
    }
}

impl From<&RunError> for CliResult {
    fn from(err: &RunError) -> Self {
        let code = match err {
            RunError::Discovery(RpcError::Transport(e)) => return Self::from(e),
            RunError::Discovery(RpcError::Framing(_) | RpcError::InvalidRequestId(_)) => ExitCodes::PROTOCOL_ERROR,
            RunError::Discovery(_) => ExitCodes::INTERNAL_ERROR,
            RunError::Sink(_) => ExitCodes::OUTPUT_FAILED,
        };
        Self::Error(code, err.to_string())
    }
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "Network error",
        4 => "No devices found",
        5 => "Permission denied",
        6 => "Configuration error",
        7 => "Protocol error",
        8 => "Output failed",
        9 => "Operation cancelled",
        127 => "Internal error",
        _ => "Unknown error",
    }
}

/// Print exit code table
pub fn print_exit_codes() {
    println!("Exit Codes:");
    for code in [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 127] {
        println!("  {:>3}  {}", code, exit_code_description(code));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_result() {
        let success = CliResult::success();
        assert!(success.is_success());
        assert_eq!(success.code(), 0);

        let error = CliResult::no_devices("255.255.255.255:4800");
        assert!(!error.is_success());
        assert_eq!(error.code(), ExitCodes::NO_DEVICES);
        assert_eq!(error.message(), Some("No device answered at 255.255.255.255:4800"));
    }

    #[test]
    fn test_from_anyhow_chain() {
        let bind = TransportError::BindFailed {
            addr: "0.0.0.0:4800".parse().unwrap(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let err = anyhow::Error::new(bind).context("starting discovery");
        assert_eq!(CliResult::from_anyhow(&err).code(), ExitCodes::PERMISSION_DENIED);

        let err = anyhow::Error::new(RunError::Sink(std::io::Error::other("closed")));
        assert_eq!(CliResult::from_anyhow(&err).code(), ExitCodes::OUTPUT_FAILED);

        let err = anyhow::anyhow!("something else");
        assert_eq!(CliResult::from_anyhow(&err).code(), ExitCodes::ERROR);
    }

    #[test]
    fn test_descriptions_cover_table() {
        for code in [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 127] {
            assert_ne!(exit_code_description(code), "Unknown error");
        }
    }
}
