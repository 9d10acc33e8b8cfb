use serde::de::{Deserialize, Deserializer, Error as DeError};
use serde::ser::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;

use super::Result;

/// A docker image reference: `[registry/]repository[:tag]`
///
/// The tag is preserved as written; equality treats a missing tag as
/// `latest` but rendering keeps it absent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImageName {
    pub registry: Option<String>,
    pub repository: String,
    pub tag: Option<String>,
}

impl ImageName {
    /// Parse an image reference
    ///
    /// The leading path segment is a registry when it contains a `.` or a
    /// `:` (hostname or host:port); the last `:` of the remainder splits
    /// the repository from the tag.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            bail!("empty image reference");
        }
        let (registry, rest) = match s.find('/') {
            Some(ix) => {
                let head = &s[..ix];
                if head.contains('.') || head.contains(':') {
                    (Some(head.to_string()), &s[ix + 1..])
                } else {
                    (None, s)
                }
            }
            None => (None, s),
        };
        if rest.is_empty() {
            bail!("image reference '{}' has no repository", s);
        }
        let (repository, tag) = match rest.rfind(':') {
            Some(ix) => (rest[..ix].to_string(), Some(rest[ix + 1..].to_string())),
            None => (rest.to_string(), None),
        };
        if repository.is_empty() {
            bail!("image reference '{}' has no repository", s);
        }
        Ok(ImageName {
            registry,
            repository,
            tag,
        })
    }

    /// Tag to use for equality purposes
    pub fn tag_or_latest(&self) -> String {
        self.tag.clone().unwrap_or_else(|| "latest".to_string())
    }

    /// Registry-qualified repository without the tag
    pub fn repo(&self) -> String {
        match &self.registry {
            Some(r) => format!("{}/{}", r, self.repository),
            None => self.repository.clone(),
        }
    }

    /// Canonical form with the tag made explicit
    pub fn canonical(&self) -> String {
        format!("{}:{}", self.repo(), self.tag_or_latest())
    }

    /// Same repository on the same registry
    pub fn same_repo(&self, other: &ImageName) -> bool {
        self.registry == other.registry && self.repository == other.repository
    }

    /// A sibling reference with a different tag
    pub fn with_tag(&self, tag: &str) -> ImageName {
        ImageName {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: Some(tag.to_string()),
        }
    }
}

impl fmt::Display for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref r) = self.registry {
            write!(f, "{}/", r)?;
        }
        write!(f, "{}", self.repository)?;
        if let Some(ref t) = self.tag {
            write!(f, ":{}", t)?;
        }
        Ok(())
    }
}

impl Serialize for ImageName {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ImageName {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<ImageName, D::Error> {
        let s = String::deserialize(deserializer)?;
        ImageName::parse(&s).map_err(D::Error::custom)
    }
}

// Strictly dotted-numeric tags parse into version tuples
fn numeric_tag(tag: &str) -> Option<Vec<u64>> {
    if tag.is_empty() {
        return None;
    }
    tag.split('.').map(|c| c.parse::<u64>().ok()).collect()
}

/// Total order over image tags
///
/// Dotted numeric tags compare as version tuples and order before every
/// non-numeric tag; non-numeric tags compare lexicographically.
pub fn compare_tags(a: &str, b: &str) -> Ordering {
    match (numeric_tag(a), numeric_tag(b)) {
        (Some(va), Some(vb)) => va.cmp(&vb),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}
