use serde::de::{Deserialize, Deserializer, Error as DeError};
use serde::ser::{Serialize, Serializer};
use std::fmt;

use super::{Result, ResultExt};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Tcp
    }
}

impl Protocol {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            _ => bail!("unknown protocol '{}'", s),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// A published port: `[interface:]host:container[/protocol]`
///
/// ```yaml
/// ports:
/// - 8080:80
/// - 127.0.0.1:5300:53/udp
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PortMapping {
    pub host_ip: Option<String>,
    pub host_port: u16,
    pub container_port: u16,
    pub protocol: Protocol,
}

impl PortMapping {
    pub fn parse(s: &str) -> Result<Self> {
        let (addr, protocol) = split_protocol(s)?;
        let parts: Vec<&str> = addr.split(':').collect();
        let (host_ip, host, cont) = match parts.len() {
            2 => (None, parts[0], parts[1]),
            3 => (Some(parts[0].to_string()), parts[1], parts[2]),
            _ => bail!("port mapping '{}' is not host:container", s),
        };
        Ok(PortMapping {
            host_ip,
            host_port: host
                .parse()
                .chain_err(|| format!("bad host port in '{}'", s))?,
            container_port: cont
                .parse()
                .chain_err(|| format!("bad container port in '{}'", s))?,
            protocol,
        })
    }

    /// Key a publication collides on: interface, host port and protocol
    pub fn binding(&self) -> (String, u16, Protocol) {
        (
            self.host_ip.clone().unwrap_or_else(|| "0.0.0.0".into()),
            self.host_port,
            self.protocol.clone(),
        )
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref ip) = self.host_ip {
            write!(f, "{}:", ip)?;
        }
        write!(f, "{}:{}", self.host_port, self.container_port)?;
        if self.protocol != Protocol::Tcp {
            write!(f, "/{}", self.protocol)?;
        }
        Ok(())
    }
}

/// An exposed (pod-internal) port: `port[/protocol]`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExposedPort {
    pub port: u16,
    pub protocol: Protocol,
}

impl ExposedPort {
    pub fn parse(s: &str) -> Result<Self> {
        let (addr, protocol) = split_protocol(s)?;
        Ok(ExposedPort {
            port: addr
                .parse()
                .chain_err(|| format!("bad exposed port '{}'", s))?,
            protocol,
        })
    }
}

impl fmt::Display for ExposedPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.port)?;
        if self.protocol != Protocol::Tcp {
            write!(f, "/{}", self.protocol)?;
        }
        Ok(())
    }
}

fn split_protocol(s: &str) -> Result<(&str, Protocol)> {
    match s.find('/') {
        Some(ix) => Ok((&s[..ix], Protocol::parse(&s[ix + 1..])?)),
        None => Ok((s, Protocol::default())),
    }
}

macro_rules! string_serde {
    ( $type:ident ) => {
        impl Serialize for $type {
            fn serialize<S: Serializer>(
                &self,
                serializer: S,
            ) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }
        impl<'de> Deserialize<'de> for $type {
            fn deserialize<D: Deserializer<'de>>(
                deserializer: D,
            ) -> std::result::Result<$type, D::Error> {
                let s = crate::deserializers::RelaxedString::deserialize(deserializer)?;
                $type::parse(&s.to_string()).map_err(D::Error::custom)
            }
        }
    };
}
string_serde!(PortMapping);
string_serde!(ExposedPort);
