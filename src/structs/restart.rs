use serde::de::{Deserialize, Deserializer, Error as DeError};
use serde::ser::{Serialize, Serializer};
use std::fmt;

use super::Result;

/// Engine restart policy for a container
///
/// ```yaml
/// restart: on-failure:3
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RestartPolicy {
    No,
    Always,
    OnFailure(u32),
}

impl Default for RestartPolicy {
    fn default() -> Self {
        RestartPolicy::No
    }
}

impl RestartPolicy {
    pub fn parse(s: &str) -> Result<Self> {
        if s == "no" {
            return Ok(RestartPolicy::No);
        }
        if s == "always" {
            return Ok(RestartPolicy::Always);
        }
        if s == "on-failure" {
            return Ok(RestartPolicy::OnFailure(0));
        }
        if let Some(rest) = s.strip_prefix("on-failure:") {
            let n: u32 = rest
                .parse()
                .map_err(|_| format!("bad retry count in restart policy '{}'", s))?;
            return Ok(RestartPolicy::OnFailure(n));
        }
        bail!("unknown restart policy '{}'", s)
    }
}

impl fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartPolicy::No => write!(f, "no"),
            RestartPolicy::Always => write!(f, "always"),
            RestartPolicy::OnFailure(0) => write!(f, "on-failure"),
            RestartPolicy::OnFailure(n) => write!(f, "on-failure:{}", n),
        }
    }
}

impl Serialize for RestartPolicy {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for RestartPolicy {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<RestartPolicy, D::Error> {
        // YAML helpfully reads a bare `no` as false; relax it back
        let s = crate::deserializers::RelaxedString::deserialize(deserializer)?.to_string();
        let s = if s == "false" { "no".to_string() } else { s };
        RestartPolicy::parse(&s).map_err(D::Error::custom)
    }
}
