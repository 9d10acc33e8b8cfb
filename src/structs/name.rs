use serde::de::{Deserialize, Deserializer, Error as DeError};
use serde::ser::{Serialize, Serializer};
use std::fmt;

use super::Result;

/// Identity of a container within a pod: `namespace.name`
///
/// Manifest references may leave the namespace out; `parse` fills in the
/// pod namespace in that case. The engine side always sees the full form.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContainerName {
    pub namespace: String,
    pub name: String,
}

impl ContainerName {
    pub fn new(namespace: &str, name: &str) -> Self {
        ContainerName {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parse a `[namespace.]name` reference, defaulting the namespace
    pub fn parse(s: &str, default_ns: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            bail!("empty container reference");
        }
        Ok(match s.find('.') {
            Some(ix) => ContainerName {
                namespace: s[..ix].to_string(),
                name: s[ix + 1..].to_string(),
            },
            None => ContainerName {
                namespace: default_ns.to_string(),
                name: s.to_string(),
            },
        })
    }
}

impl fmt::Display for ContainerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

impl Serialize for ContainerName {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ContainerName {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<ContainerName, D::Error> {
        let s = String::deserialize(deserializer)?;
        // namespace defaulting happens during normalization; keep it raw here
        ContainerName::parse(&s, "").map_err(D::Error::custom)
    }
}

/// A link to another container in the pod, with an optional alias
///
/// ```yaml
/// links:
/// - db
/// - other.statsd:metrics
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LinkRef {
    pub target: ContainerName,
    pub alias: Option<String>,
}

impl LinkRef {
    pub fn parse(s: &str, default_ns: &str) -> Result<Self> {
        let (tgt, alias) = match s.rfind(':') {
            Some(ix) => (&s[..ix], Some(s[ix + 1..].to_string())),
            None => (s, None),
        };
        Ok(LinkRef {
            target: ContainerName::parse(tgt, default_ns)?,
            alias,
        })
    }

    /// The name the link is exposed under inside the consuming container
    pub fn alias(&self) -> String {
        self.alias.clone().unwrap_or_else(|| self.target.name.clone())
    }
}

impl fmt::Display for LinkRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.alias {
            Some(a) => write!(f, "{}:{}", self.target, a),
            None => write!(f, "{}", self.target),
        }
    }
}

impl Serialize for LinkRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for LinkRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<LinkRef, D::Error> {
        let s = String::deserialize(deserializer)?;
        LinkRef::parse(&s, "").map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::{ContainerName, LinkRef};

    #[test]
    fn parse_qualified() {
        let n = ContainerName::parse("web.nginx", "other").unwrap();
        assert_eq!(n.namespace, "web");
        assert_eq!(n.name, "nginx");
        assert_eq!(n.to_string(), "web.nginx");
    }

    #[test]
    fn parse_defaulted() {
        let n = ContainerName::parse("nginx", "web").unwrap();
        assert_eq!(n.namespace, "web");
        assert_eq!(n.name, "nginx");
    }

    #[test]
    fn parse_link_alias() {
        let l = LinkRef::parse("db:primary", "app").unwrap();
        assert_eq!(l.target, ContainerName::new("app", "db"));
        assert_eq!(l.alias(), "primary");
        let l = LinkRef::parse("db", "app").unwrap();
        assert_eq!(l.alias(), "db");
    }
}
