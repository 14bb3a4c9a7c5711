//! Invocation target types
//!
//! The SSH client hands us the destination as a single `host:port:user`
//! string (a `ProxyCommand` substitution such as `apssh %h:%p:%r`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors parsing invocation arguments
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TargetParseError {
    /// Not of the form `host:port:user`
    #[error("expected HOST:PORT:USER, got '{0}'")]
    Format(String),

    /// Port is not a valid TCP port number
    #[error("invalid port '{0}'")]
    Port(String),

    /// Host or user is empty
    #[error("{0} must not be empty")]
    Empty(&'static str),

    /// Unknown credential type
    #[error("unknown credential type '{0}' (expected 'ssh' or 'sts')")]
    CredentialType(String),
}

/// SSH destination the tunnel is opened to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub host: String,
    pub port: u16,
    pub user: String,
}

impl TargetSpec {
    /// `host:port` address for dialing
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for TargetSpec {
    type Err = TargetParseError;

    // Split from the right so IPv6 literals keep their colons.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.rsplitn(3, ':');
        let user = parts.next();
        let port = parts.next();
        let host = parts.next();

        let (host, port, user) = match (host, port, user) {
            (Some(h), Some(p), Some(u)) => (h, p, u),
            _ => return Err(TargetParseError::Format(s.to_string())),
        };

        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(TargetParseError::Empty("host"));
        }
        if user.is_empty() {
            return Err(TargetParseError::Empty("user"));
        }
        let port = port
            .parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| TargetParseError::Port(port.to_string()))?;

        Ok(Self {
            host: host.to_string(),
            port,
            user: user.to_string(),
        })
    }
}

impl fmt::Display for TargetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.address())
    }
}

/// Kind of credential requested from the access proxy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialType {
    /// Short-lived SSH certificate
    #[default]
    Ssh,
    /// Cloud STS credentials
    Sts,
}

impl CredentialType {
    /// Value used in the `type` query parameter
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialType::Ssh => "ssh",
            CredentialType::Sts => "sts",
        }
    }
}

impl FromStr for CredentialType {
    type Err = TargetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ssh" => Ok(CredentialType::Ssh),
            "sts" => Ok(CredentialType::Sts),
            _ => Err(TargetParseError::CredentialType(s.to_string())),
        }
    }
}

impl fmt::Display for CredentialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target() {
        let target: TargetSpec = "bastion.example.com:22:alice".parse().unwrap();
        assert_eq!(target.host, "bastion.example.com");
        assert_eq!(target.port, 22);
        assert_eq!(target.user, "alice");
        assert_eq!(target.address(), "bastion.example.com:22");
    }

    #[test]
    fn test_parse_ipv6_target() {
        let target: TargetSpec = "[2001:db8::1]:2222:bob".parse().unwrap();
        assert_eq!(target.host, "2001:db8::1");
        assert_eq!(target.port, 2222);
        assert_eq!(target.address(), "[2001:db8::1]:2222");

        let bare: TargetSpec = "::1:22:bob".parse().unwrap();
        assert_eq!(bare.host, "::1");
    }

    #[test]
    fn test_parse_target_errors() {
        assert!(matches!(
            "host:22".parse::<TargetSpec>(),
            Err(TargetParseError::Format(_))
        ));
        assert!(matches!(
            "host:ssh:alice".parse::<TargetSpec>(),
            Err(TargetParseError::Port(_))
        ));
        assert!(matches!(
            "host:70000:alice".parse::<TargetSpec>(),
            Err(TargetParseError::Port(_))
        ));
        assert_eq!(
            ":22:alice".parse::<TargetSpec>(),
            Err(TargetParseError::Empty("host"))
        );
        assert_eq!(
            "host:22:".parse::<TargetSpec>(),
            Err(TargetParseError::Empty("user"))
        );
    }

    #[test]
    fn test_credential_type() {
        assert_eq!("ssh".parse::<CredentialType>(), Ok(CredentialType::Ssh));
        assert_eq!("STS".parse::<CredentialType>(), Ok(CredentialType::Sts));
        assert!("aws".parse::<CredentialType>().is_err());
        assert_eq!(CredentialType::default().to_string(), "ssh");
    }
}
