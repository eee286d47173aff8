// src/packages/status.rs

//! Typed view of the dpkg `Status` field (`want flag state`)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What the administrator asked dpkg to do with the package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Want {
    Unknown,
    Install,
    Hold,
    Deinstall,
    Purge,
}

/// Error flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flag {
    Ok,
    Reinstreq,
}

/// Installation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum State {
    NotInstalled,
    ConfigFiles,
    HalfInstalled,
    Unpacked,
    HalfConfigured,
    TriggersAwaited,
    TriggersPending,
    Installed,
}

impl Want {
    pub fn as_str(&self) -> &'static str {
        match self {
            Want::Unknown => "unknown",
            Want::Install => "install",
            Want::Hold => "hold",
            Want::Deinstall => "deinstall",
            Want::Purge => "purge",
        }
    }
}

impl FromStr for Want {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(Want::Unknown),
            "install" => Ok(Want::Install),
            "hold" => Ok(Want::Hold),
            "deinstall" => Ok(Want::Deinstall),
            "purge" => Ok(Want::Purge),
            _ => Err(format!("Invalid selection state: {}", s)),
        }
    }
}

impl Flag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Flag::Ok => "ok",
            Flag::Reinstreq => "reinstreq",
        }
    }
}

impl FromStr for Flag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(Flag::Ok),
            "reinstreq" => Ok(Flag::Reinstreq),
            _ => Err(format!("Invalid error flag: {}", s)),
        }
    }
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::NotInstalled => "not-installed",
            State::ConfigFiles => "config-files",
            State::HalfInstalled => "half-installed",
            State::Unpacked => "unpacked",
            State::HalfConfigured => "half-configured",
            State::TriggersAwaited => "triggers-awaited",
            State::TriggersPending => "triggers-pending",
            State::Installed => "installed",
        }
    }

    /// Whether the package's files are expected to be on disk
    pub fn has_files(&self) -> bool {
        !matches!(self, State::NotInstalled | State::ConfigFiles)
    }
}

impl FromStr for State {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not-installed" => Ok(State::NotInstalled),
            "config-files" => Ok(State::ConfigFiles),
            "half-installed" => Ok(State::HalfInstalled),
            "unpacked" => Ok(State::Unpacked),
            "half-configured" => Ok(State::HalfConfigured),
            "triggers-awaited" => Ok(State::TriggersAwaited),
            "triggers-pending" => Ok(State::TriggersPending),
            "installed" => Ok(State::Installed),
            _ => Err(format!("Invalid package state: {}", s)),
        }
    }
}

/// Parsed `Status` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub want: Want,
    pub flag: Flag,
    pub state: State,
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        let [want, flag, state] = parts.as_slice() else {
            return Err(format!("Status must have three words: {}", s));
        };

        Ok(Self {
            want: want.parse()?,
            flag: flag.parse()?,
            state: state.parse()?,
        })
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.want.as_str(), self.flag.as_str(), self.state.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parsing() {
        let status: Status = "install ok installed".parse().unwrap();
        assert_eq!(status.want, Want::Install);
        assert_eq!(status.flag, Flag::Ok);
        assert_eq!(status.state, State::Installed);
        assert_eq!(status.to_string(), "install ok installed");

        let status: Status = "deinstall ok config-files".parse().unwrap();
        assert!(!status.state.has_files());
    }

    #[test]
    fn test_invalid_status() {
        assert!("install ok".parse::<Status>().is_err());
        assert!("install maybe installed".parse::<Status>().is_err());
        assert!("install ok installed extra".parse::<Status>().is_err());
    }
}
