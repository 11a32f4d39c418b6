//! Setup errors that abort a command before any work starts.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration-fatal conditions. `main` maps these to exit code 1;
/// every other error exits with 2.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("invalid configuration: {0:#}")]
    Config(anyhow::Error),

    #[error("dataset root does not exist or is not a directory: {}", .0.display())]
    DatasetMissing(PathBuf),

    #[error("{0}")]
    Unsupported(String),
}

/// Exit code for an error returned by a command.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<SetupError>().is_some() {
        1
    } else {
        2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let setup = anyhow::Error::new(SetupError::DatasetMissing(PathBuf::from("/nope")));
        assert_eq!(exit_code(&setup), 1);
        let wrapped = anyhow::Error::new(SetupError::Unsupported("x".into())).context("while starting");
        assert_eq!(exit_code(&wrapped), 1);
        assert_eq!(exit_code(&anyhow::anyhow!("disk on fire")), 2);
    }
}
