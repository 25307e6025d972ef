use std::str::FromStr;

use thiserror::Error;

/// Writable paths a bus consumer may change.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkCommand {
    /// `/Ac/PowerLimit`, watts.
    SetPowerLimit(f64),
    /// `/CustomName`.
    SetCustomName(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("expected '<path>=<value>', got '{0}'")]
    Malformed(String),
    #[error("path {0} is not writable")]
    NotWritable(String),
    #[error("invalid power limit '{0}'")]
    InvalidPowerLimit(String),
}

impl FromStr for SinkCommand {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let (path, value) = line
            .trim()
            .split_once('=')
            .ok_or_else(|| CommandError::Malformed(line.to_string()))?;
        let value = value.trim();
        match path.trim() {
            "/Ac/PowerLimit" => value
                .parse::<f64>()
                .ok()
                .filter(|watts| watts.is_finite())
                .map(SinkCommand::SetPowerLimit)
                .ok_or_else(|| CommandError::InvalidPowerLimit(value.to_string())),
            "/CustomName" => Ok(SinkCommand::SetCustomName(value.to_string())),
            other => Err(CommandError::NotWritable(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_writable_paths() {
        assert_eq!(
            "/Ac/PowerLimit = 1500".parse(),
            Ok(SinkCommand::SetPowerLimit(1_500.0))
        );
        assert_eq!(
            "/CustomName=Garage roof".parse(),
            Ok(SinkCommand::SetCustomName("Garage roof".to_string()))
        );
    }

    #[test]
    fn rejects_everything_else() {
        assert!(matches!(
            "/Ac/Power=1".parse::<SinkCommand>(),
            Err(CommandError::NotWritable(_))
        ));
        assert!(matches!(
            "/Ac/PowerLimit=lots".parse::<SinkCommand>(),
            Err(CommandError::InvalidPowerLimit(_))
        ));
        assert!(matches!(
            "/Ac/PowerLimit=NaN".parse::<SinkCommand>(),
            Err(CommandError::InvalidPowerLimit(_))
        ));
        assert!(matches!(
            "PowerLimit".parse::<SinkCommand>(),
            Err(CommandError::Malformed(_))
        ));
    }
}
