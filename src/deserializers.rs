use super::Result;
use serde::de::value::SeqAccessDeserializer;
use serde::de::{Deserialize, Deserializer, Error, SeqAccess, Visitor};
use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

/// Strings, numbers and booleans can be deserialized into a RelaxedString
///
/// Manifest values like `MYSQL_PORT: 3306` should not force users to quote.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RelaxedString(pub String);

impl ToString for RelaxedString {
    fn to_string(&self) -> String {
        let RelaxedString(x) = self;
        x.to_string()
    }
}

impl<'de> Deserialize<'de> for RelaxedString {
    fn deserialize<D>(deserializer: D) -> std::result::Result<RelaxedString, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(RelaxedStringVisitor)
    }
}

struct RelaxedStringVisitor;

macro_rules! visit_tostring {
    ( $name:ident, $type:ty ) => {
        fn $name<E>(self, v: $type) -> std::result::Result<Self::Value, E> where E: Error {
            self.visit_string(v.to_string())
        }
    };
}

impl<'de> Visitor<'de> for RelaxedStringVisitor {
    type Value = RelaxedString;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a string, number or boolean")
    }

    fn visit_string<E>(self, v: String) -> std::result::Result<Self::Value, E>
    where
        E: Error,
    {
        Ok(RelaxedString(v))
    }

    visit_tostring!(visit_bool, bool);
    visit_tostring!(visit_str, &str);
    visit_tostring!(visit_i64, i64);
    visit_tostring!(visit_u64, u64);
    visit_tostring!(visit_f64, f64);
}

/// Deserialize either a bare string or a list of strings into a `Vec<String>`
///
/// Allows `cmd: nginx -g 'daemon off;'` style shorthand (split on whitespace)
/// next to the explicit `cmd: [nginx, -g, daemon off;]` form.
pub fn string_or_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct StringOrList(PhantomData<fn() -> Vec<String>>);

    impl<'de> Visitor<'de> for StringOrList {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("string or list of strings")
        }

        fn visit_str<E>(self, value: &str) -> std::result::Result<Vec<String>, E>
        where
            E: Error,
        {
            Ok(value.split_whitespace().map(String::from).collect())
        }

        fn visit_seq<A>(self, seq: A) -> std::result::Result<Vec<String>, A::Error>
        where
            A: SeqAccess<'de>,
        {
            let xs: Vec<RelaxedString> = Deserialize::deserialize(SeqAccessDeserializer::new(seq))?;
            Ok(xs.into_iter().map(|x| x.to_string()).collect())
        }
    }
    deserializer.deserialize_any(StringOrList(PhantomData))
}

/// Parse a human duration like `10s`, `1m30s`, `2h` or a bare second count
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        bail!("empty duration");
    }
    if let Ok(n) = s.parse::<u64>() {
        return Ok(Duration::from_secs(n));
    }
    let mut total = 0u64;
    let mut digits = String::new();
    for ch in s.chars() {
        if ch.is_digit(10) {
            digits.push(ch);
        } else {
            if digits.is_empty() {
                bail!("invalid duration '{}'", s);
            }
            let n: u64 = digits.parse()?;
            total += match ch {
                's' => n,
                'm' => n * 60,
                'h' => n * 3600,
                _ => bail!("unknown duration unit '{}' in '{}'", ch, s),
            };
            digits.clear();
        }
    }
    if !digits.is_empty() {
        bail!("trailing digits without unit in '{}'", s);
    }
    Ok(Duration::from_secs(total))
}

/// Deserialize an optional duration from `10s` style strings or bare seconds
pub fn relaxed_duration_opt<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let v: Option<RelaxedString> = Deserialize::deserialize(deserializer)?;
    match v {
        None => Ok(None),
        Some(x) => parse_duration(&x.to_string())
            .map(Some)
            .map_err(D::Error::custom),
    }
}

/// Parse docker style byte sizes: `512m`, `1g`, `100k`, `4096b` or bare bytes
pub fn parse_size(s: &str) -> Result<u64> {
    let digits = s
        .chars()
        .take_while(|ch| ch.is_digit(10))
        .collect::<String>();
    let unit = s
        .chars()
        .skip_while(|ch| ch.is_digit(10))
        .collect::<String>();
    let res: u64 = digits.parse()?;
    trace!("Parsed {} ({})", digits, unit);
    let scaled = match unit.to_lowercase().as_str() {
        "" | "b" => res,
        "k" | "kb" => res * 1024,
        "m" | "mb" => res * 1024 * 1024,
        "g" | "gb" => res * 1024 * 1024 * 1024,
        _ => bail!("unknown size unit '{}'", unit),
    };
    trace!("Returned {} bytes", scaled);
    Ok(scaled)
}

#[cfg(test)]
mod tests {
    use super::{parse_duration, parse_size, RelaxedString};
    use std::time::Duration;

    #[test]
    fn relaxed_scalars() {
        let RelaxedString(x) = serde_yaml::from_str("'foo'").unwrap();
        assert_eq!(x, "foo");
        let RelaxedString(x) = serde_yaml::from_str("3306").unwrap();
        assert_eq!(x, "3306");
        let RelaxedString(x) = serde_yaml::from_str("true").unwrap();
        assert_eq!(x, "true");
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn sizes() {
        assert_eq!(parse_size("512").unwrap(), 512);
        assert_eq!(parse_size("512m").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_size("1G").unwrap(), 1024 * 1024 * 1024);
        assert!(parse_size("1q").is_err());
    }
}
