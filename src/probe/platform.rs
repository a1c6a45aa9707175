use super::{DirectProber, ProbeStrategy, ShelledProber};
use crate::error::ProbeError;
use serde::{Deserialize, Serialize};

/// Which probing implementation runs the rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Raw ICMP receive plus UDP send
    Direct,
    /// Native trace utility, output parsed line by line
    Shelled,
}

/// Strategy requested by configuration or command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StrategyChoice {
    #[default]
    Auto,
    Direct,
    Shelled,
}

impl Platform {
    /// Pick the implementation for the running operating system.
    pub fn detect() -> Result<Self, ProbeError> {
        let platform = if cfg!(unix) {
            Self::Direct
        } else if cfg!(windows) {
            Self::Shelled
        } else {
            return Err(ProbeError::PlatformUnsupported(std::env::consts::OS));
        };
        log::debug!("[probe::platform] detect: os={} platform={:?}", std::env::consts::OS, platform);
        Ok(platform)
    }

    pub fn from_choice(choice: StrategyChoice) -> Result<Self, ProbeError> {
        match choice {
            StrategyChoice::Auto => Self::detect(),
            StrategyChoice::Direct if cfg!(unix) => Ok(Self::Direct),
            StrategyChoice::Direct => Err(ProbeError::PlatformUnsupported(std::env::consts::OS)),
            StrategyChoice::Shelled if cfg!(any(unix, windows)) => Ok(Self::Shelled),
            StrategyChoice::Shelled => Err(ProbeError::PlatformUnsupported(std::env::consts::OS)),
        }
    }

    pub fn strategy(self) -> Box<dyn ProbeStrategy> {
        match self {
            Self::Direct => Box::new(DirectProber::new()),
            Self::Shelled => Box::new(ShelledProber::for_host()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_unix_defaults_to_direct() {
        assert_eq!(Platform::detect().unwrap(), Platform::Direct);
        assert_eq!(Platform::from_choice(StrategyChoice::Auto).unwrap(), Platform::Direct);
        assert_eq!(Platform::from_choice(StrategyChoice::Shelled).unwrap(), Platform::Shelled);
    }

    #[cfg(windows)]
    #[test]
    fn test_windows_defaults_to_shelled() {
        assert_eq!(Platform::detect().unwrap(), Platform::Shelled);
        assert!(Platform::from_choice(StrategyChoice::Direct).is_err());
    }

    #[test]
    fn test_strategy_names() {
        assert_eq!(Platform::Direct.strategy().name(), "direct");
        assert_eq!(Platform::Shelled.strategy().name(), "shelled");
    }

    #[test]
    fn test_choice_deserializes_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            strategy: StrategyChoice,
        }

        let parsed: Wrapper = toml::from_str("strategy = \"shelled\"").unwrap();
        assert_eq!(parsed.strategy, StrategyChoice::Shelled);
        assert_eq!(StrategyChoice::default(), StrategyChoice::Auto);
    }
}
