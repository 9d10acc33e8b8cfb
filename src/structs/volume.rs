use serde::de::{Deserialize, Deserializer, Error as DeError};
use serde::ser::{Serialize, Serializer};
use std::fmt;

use super::Result;

/// A volume mounted into a container
///
/// Three forms are accepted:
///
/// ```yaml
/// volumes:
/// - /var/lib/app                  # anonymous volume at the container path
/// - /srv/data:/var/lib/app        # host path bind mount
/// - appdata:/var/lib/app:ro       # named volume, read only
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VolumeMount {
    /// Host path or named volume; `None` for anonymous volumes
    pub source: Option<String>,
    /// Mount path inside the container
    pub target: String,
    pub read_only: bool,
}

impl VolumeMount {
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        let vm = match parts.len() {
            1 => VolumeMount {
                source: None,
                target: parts[0].to_string(),
                read_only: false,
            },
            2 | 3 => {
                let read_only = if parts.len() == 3 {
                    match parts[2] {
                        "ro" => true,
                        "rw" => false,
                        other => bail!("unknown volume mode '{}' in '{}'", other, s),
                    }
                } else {
                    false
                };
                VolumeMount {
                    source: Some(parts[0].to_string()),
                    target: parts[1].to_string(),
                    read_only,
                }
            }
            _ => bail!("volume '{}' is not [source:]target[:ro]", s),
        };
        if !vm.target.starts_with('/') {
            bail!("volume target '{}' must be an absolute path", vm.target);
        }
        Ok(vm)
    }

    /// Whether the source is a host path rather than a named volume
    pub fn is_bind(&self) -> bool {
        match &self.source {
            Some(s) => s.starts_with('/') || s.starts_with('.'),
            None => false,
        }
    }
}

impl fmt::Display for VolumeMount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref s) = self.source {
            write!(f, "{}:", s)?;
        }
        write!(f, "{}", self.target)?;
        if self.read_only {
            write!(f, ":ro")?;
        }
        Ok(())
    }
}

impl Serialize for VolumeMount {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for VolumeMount {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<VolumeMount, D::Error> {
        let s = String::deserialize(deserializer)?;
        VolumeMount::parse(&s).map_err(D::Error::custom)
    }
}
