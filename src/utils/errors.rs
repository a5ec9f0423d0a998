#![forbid(unsafe_code)]

use thiserror::Error;

/// Errors and log messages produced while bringing up the server.
#[derive(Error, Debug)]
pub enum Errors {
    /// Input parameter logging.
    #[error("hello_server input parameters:\n{}", .0)]
    InputParms(String),

    /// Represents all other cases of `std::io::Error`.
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error("Unable to initialize Log4rs using: {}", .0)]
    Log4rsInitialization(String),

    #[error("Reading application configuration file: {}", .0)]
    ReadingConfigFile(String),

    #[error("Unable to parse TOML file: {}", .0)]
    TOMLParseError(String),

    /// Data directory missing, misplaced or with the wrong permissions.
    #[error("Invalid data directory {}", .0)]
    DirectoryError(String),
}
