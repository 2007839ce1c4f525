use std::io;
use std::str::Utf8Error;
use thiserror::Error;
use btleplug;
use serde_json;

use crate::device::types::{CharacteristicRole, Phase};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to start application (io): {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to start application (device): {source}")]
    DeviceError { #[from] source: DeviceError },
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("No bluetooth adapter is available")]
    NoAdapter,

    #[error("Access to the bluetooth adapter was denied")]
    PermissionDenied,

    #[error("The peripheral {0} is not known to the adapter")]
    UnknownPeripheral(String),

    #[error("The bluetooth service is not available")]
    MissingService,

    #[error("A required bluetooth characteristic is not available")]
    MissingCharacteristic,

    #[error("The operation did not complete in time")]
    TimedOut,
}

impl DeviceError {
    pub fn is_permission_denied(&self) -> bool {
        match self {
            DeviceError::PermissionDenied => true,
            DeviceError::Btle { source: btleplug::Error::PermissionDenied } => true,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Command '{command}' is not available in state {phase}")]
    InvalidPhase { command: &'static str, phase: Phase },

    #[error("No peripheral has been found")]
    NoPeripheral,

    #[error("The capsense/led service has not been discovered")]
    MissingService,

    #[error("The {0} characteristic has not been discovered")]
    MissingCharacteristic(CharacteristicRole),

    #[error("The radio adapter refused the command: {source}")]
    Radio { #[from] source: DeviceError },

    #[error("The session task is no longer running")]
    SessionClosed,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("Sensor payload is empty")]
    Empty,

    #[error("Sensor payload of {0} bytes does not fit a 32-bit integer")]
    TooLong(usize),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseCommandError {
    #[error("Empty command")]
    Empty,

    #[error("Unknown command '{0}', type 'help' for a list of commands")]
    Unknown(String),

    #[error("Invalid argument '{argument}' for '{command}'")]
    InvalidArgument { command: &'static str, argument: String },
}
