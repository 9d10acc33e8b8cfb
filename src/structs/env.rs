use serde::de::{Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use std::collections::{btree_map, BTreeMap};
use std::fmt;
use std::iter::FromIterator;
use std::ops::{Deref, DerefMut};

use crate::deserializers::RelaxedString;

/// Environment variables to inject into a container
///
/// Both the mapping and the `KEY=VALUE` list shorthand are accepted:
///
/// ```yaml
/// env:
///   DATABASE_URL: postgres://db/app
///   WORKERS: 4
/// ```
///
/// ```yaml
/// env:
/// - DATABASE_URL=postgres://db/app
/// - WORKERS=4
/// ```
#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct EnvVars(BTreeMap<String, String>);

impl EnvVars {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter<'a>(&'a self) -> impl Iterator<Item = (&String, &String)> + 'a {
        self.0.iter()
    }
}

impl<'de> Deserialize<'de> for EnvVars {
    fn deserialize<D>(deserializer: D) -> std::result::Result<EnvVars, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(EnvVarsVisitor)
    }
}

struct EnvVarsVisitor;

impl<'de> Visitor<'de> for EnvVarsVisitor {
    type Value = EnvVars;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a map of variables or a list of KEY=VALUE strings")
    }

    fn visit_map<A>(self, mut access: A) -> std::result::Result<EnvVars, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut map = BTreeMap::new();
        while let Some((k, v)) = access.next_entry::<String, RelaxedString>()? {
            map.insert(k, v.to_string());
        }
        Ok(EnvVars(map))
    }

    fn visit_seq<A>(self, mut access: A) -> std::result::Result<EnvVars, A::Error>
    where
        A: SeqAccess<'de>,
    {
        use serde::de::Error;
        let mut map = BTreeMap::new();
        while let Some(entry) = access.next_element::<String>()? {
            match entry.find('=') {
                Some(ix) => {
                    map.insert(entry[..ix].to_string(), entry[ix + 1..].to_string());
                }
                None => return Err(A::Error::custom(format!("env entry '{}' is not KEY=VALUE", entry))),
            }
        }
        Ok(EnvVars(map))
    }
}

impl IntoIterator for EnvVars {
    type Item = <BTreeMap<String, String> as IntoIterator>::Item;
    type IntoIter = <BTreeMap<String, String> as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a EnvVars {
    type Item = (&'a String, &'a String);
    type IntoIter = btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<(String, String)> for EnvVars {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        EnvVars(BTreeMap::from_iter(iter))
    }
}

impl Deref for EnvVars {
    type Target = BTreeMap<String, String>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for EnvVars {
    fn deref_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.0
    }
}

#[cfg(test)]
mod tests {
    use super::EnvVars;

    #[test]
    fn deserialize_map_form() {
        let ev: EnvVars = serde_yaml::from_str("{DATABASE_URL: 'postgres://db', WORKERS: 4}").unwrap();
        assert_eq!(ev.get("WORKERS"), Some(&"4".to_string()));
        assert_eq!(ev.get("DATABASE_URL"), Some(&"postgres://db".to_string()));
    }

    #[test]
    fn deserialize_list_form() {
        let ev: EnvVars = serde_yaml::from_str("['A=1', 'B=two=2']").unwrap();
        assert_eq!(ev.get("A"), Some(&"1".to_string()));
        assert_eq!(ev.get("B"), Some(&"two=2".to_string()));
        assert!(serde_yaml::from_str::<EnvVars>("['AB']").is_err());
    }
}
