//! Typed attribute values: AS numbers, prefixes, source and set names.

use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    str::FromStr,
};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

lazy_static! {
    static ref SOURCE_NAME: Regex = Regex::new(r"^[A-Z][A-Z0-9-]*$").unwrap();
    static ref SET_COMPONENT: Regex = Regex::new(r"^[A-Z]{2}-[A-Z0-9_-]*[A-Z0-9]$").unwrap();
    static ref AS_NUMBER: Regex = Regex::new(r"^AS[0-9]+$").unwrap();
    static ref MNTNER_NAME: Regex = Regex::new(r"^[A-Z0-9][A-Z0-9._-]*$").unwrap();
    static ref NIC_HANDLE: Regex = Regex::new(r"^[A-Z0-9][A-Z0-9_-]*$").unwrap();
    static ref EMAIL: Regex = Regex::new(r"^[^@ ]+@[^@ ]+\.[^@ .]+$").unwrap();
    static ref KEY_CERT_NAME: Regex = Regex::new(r"^KEY-[0-9A-F]{64}$").unwrap();
}

//------------ InvalidValue --------------------------------------------------

/// A value that does not match the syntax of its field.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InvalidValue {
    kind: &'static str,
    value: String,
}

impl InvalidValue {
    pub fn new(kind: &'static str, value: &str) -> Self {
        InvalidValue {
            kind,
            value: value.to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }
}

impl fmt::Display for InvalidValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "invalid {}: '{}'", self.kind, self.value)
    }
}

impl std::error::Error for InvalidValue {}

//------------ SourceName ----------------------------------------------------

/// The name of a registry source, always upper case.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SourceName(String);

impl SourceName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for SourceName {
    type Err = InvalidValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        if SOURCE_NAME.is_match(&upper) {
            Ok(SourceName(upper))
        } else {
            Err(InvalidValue::new("source name", s))
        }
    }
}

impl fmt::Display for SourceName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Serialize for SourceName {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> Deserialize<'de> for SourceName {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let string = String::deserialize(d)?;
        SourceName::from_str(&string).map_err(de::Error::custom)
    }
}

//------------ AsNumber ------------------------------------------------------

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct AsNumber(u32);

impl AsNumber {
    pub fn new(number: u32) -> Self {
        AsNumber(number)
    }

    pub fn into_u32(self) -> u32 {
        self.0
    }
}

impl FromStr for AsNumber {
    type Err = InvalidValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        if !AS_NUMBER.is_match(&upper) {
            return Err(InvalidValue::new("AS number", s));
        }
        upper[2..]
            .parse::<u32>()
            .map(AsNumber)
            .map_err(|_| InvalidValue::new("AS number", s))
    }
}

impl fmt::Display for AsNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "AS{}", self.0)
    }
}

impl Serialize for AsNumber {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        self.to_string().serialize(s)
    }
}

impl<'de> Deserialize<'de> for AsNumber {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let string = String::deserialize(d)?;
        AsNumber::from_str(&string).map_err(de::Error::custom)
    }
}

//------------ IpVersion -----------------------------------------------------

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum IpVersion {
    #[serde(rename = "4")]
    V4,
    #[serde(rename = "6")]
    V6,
}

impl FromStr for IpVersion {
    type Err = InvalidValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "4" | "v4" | "ipv4" => Ok(IpVersion::V4),
            "6" | "v6" | "ipv6" => Ok(IpVersion::V6),
            _ => Err(InvalidValue::new("IP version", s)),
        }
    }
}

//------------ Prefix --------------------------------------------------------

/// An IPv4 or IPv6 prefix with all host bits set to zero.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Prefix {
    addr: IpAddr,
    len: u8,
}

impl Prefix {
    pub fn new(addr: IpAddr, len: u8) -> Result<Self, InvalidValue> {
        let max = Self::max_len_for(&addr);
        let prefix = Prefix { addr, len };
        if len > max || prefix.bits() & !Self::mask(len, max) != 0 {
            Err(InvalidValue::new("prefix", &format!("{addr}/{len}")))
        } else {
            Ok(prefix)
        }
    }

    fn max_len_for(addr: &IpAddr) -> u8 {
        match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        }
    }

    fn mask(len: u8, max: u8) -> u128 {
        if len == 0 {
            0
        } else {
            (u128::MAX << (128 - u32::from(len))) >> (128 - u32::from(max))
        }
    }

    fn bits(&self) -> u128 {
        match self.addr {
            IpAddr::V4(addr) => u128::from(u32::from(addr)),
            IpAddr::V6(addr) => u128::from(addr),
        }
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    pub fn len(&self) -> u8 {
        self.len
    }

    pub fn version(&self) -> IpVersion {
        match self.addr {
            IpAddr::V4(_) => IpVersion::V4,
            IpAddr::V6(_) => IpVersion::V6,
        }
    }

    pub fn is_ipv4(&self) -> bool {
        self.addr.is_ipv4()
    }

    /// Returns whether `other` is equal to or more specific than this prefix.
    pub fn contains(&self, other: &Prefix) -> bool {
        if self.version() != other.version() || other.len < self.len {
            return false;
        }
        let max = Self::max_len_for(&self.addr);
        other.bits() & Self::mask(self.len, max) == self.bits()
    }

    /// Returns whether the address is covered by this prefix.
    pub fn contains_addr(&self, addr: IpAddr) -> bool {
        let host = Prefix {
            addr,
            len: Self::max_len_for(&addr),
        };
        self.contains(&host)
    }
}

impl FromStr for Prefix {
    type Err = InvalidValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (addr, len) = s.split_once('/').ok_or_else(|| InvalidValue::new("prefix", s))?;
        let len = len.parse::<u8>().map_err(|_| InvalidValue::new("prefix", s))?;
        let addr = if addr.contains(':') {
            IpAddr::V6(Ipv6Addr::from_str(addr).map_err(|_| InvalidValue::new("prefix", s))?)
        } else {
            IpAddr::V4(Ipv4Addr::from_str(addr).map_err(|_| InvalidValue::new("prefix", s))?)
        };
        Prefix::new(addr, len)
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.len)
    }
}

impl Serialize for Prefix {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        self.to_string().serialize(s)
    }
}

impl<'de> Deserialize<'de> for Prefix {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let string = String::deserialize(d)?;
        Prefix::from_str(&string).map_err(de::Error::custom)
    }
}

//------------ Names ---------------------------------------------------------

/// The two kinds of hierarchical set names.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SetKind {
    AsSet,
    RouteSet,
}

impl SetKind {
    fn prefix(self) -> &'static str {
        match self {
            SetKind::AsSet => "AS-",
            SetKind::RouteSet => "RS-",
        }
    }

    /// Returns the kind of set the name refers to, if it is a set name.
    pub fn of(name: &str) -> Option<SetKind> {
        if is_set_name(name, SetKind::AsSet) {
            Some(SetKind::AsSet)
        } else if is_set_name(name, SetKind::RouteSet) {
            Some(SetKind::RouteSet)
        } else {
            None
        }
    }
}

/// Checks a hierarchical set name such as `AS65530:AS-CUSTOMERS`.
///
/// Every component is either an AS number or a set component, and at least
/// one component carries the prefix of the set kind.
pub fn is_set_name(name: &str, kind: SetKind) -> bool {
    let upper = name.trim().to_ascii_uppercase();
    let mut has_set_component = false;
    for component in upper.split(':') {
        if component.starts_with(kind.prefix()) && SET_COMPONENT.is_match(component) {
            has_set_component = true;
        } else if !AS_NUMBER.is_match(component) {
            return false;
        }
    }
    has_set_component
}

pub fn is_mntner_name(name: &str) -> bool {
    MNTNER_NAME.is_match(&name.trim().to_ascii_uppercase())
}

pub fn is_nic_handle(name: &str) -> bool {
    NIC_HANDLE.is_match(&name.trim().to_ascii_uppercase())
}

pub fn is_email(value: &str) -> bool {
    EMAIL.is_match(value.trim())
}

pub fn is_key_cert_name(name: &str) -> bool {
    KEY_CERT_NAME.is_match(&name.trim().to_ascii_uppercase())
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_names_are_upper_case() {
        let name = SourceName::from_str("test-db").unwrap();
        assert_eq!(name.as_str(), "TEST-DB");
        assert!(SourceName::from_str("1TEST").is_err());
        assert!(SourceName::from_str("").is_err());
    }

    #[test]
    fn parse_as_number() {
        assert_eq!(AsNumber::from_str("as65530").unwrap(), AsNumber::new(65530));
        assert_eq!(AsNumber::new(65530).to_string(), "AS65530");
        assert!(AsNumber::from_str("AS").is_err());
        assert!(AsNumber::from_str("AS4294967296").is_err());
        assert!(AsNumber::from_str("65530").is_err());
    }

    #[test]
    fn parse_prefix() {
        let p = Prefix::from_str("192.0.2.0/24").unwrap();
        assert_eq!(p.to_string(), "192.0.2.0/24");
        assert!(Prefix::from_str("192.0.2.1/24").is_err());
        assert!(Prefix::from_str("192.0.2.0/33").is_err());
        assert!(Prefix::from_str("0.0.0.0/0").is_ok());

        let v6 = Prefix::from_str("2001:DB8::/32").unwrap();
        assert_eq!(v6.to_string(), "2001:db8::/32");
        assert!(Prefix::from_str("2001:db8::1/32").is_err());
    }

    #[test]
    fn prefix_containment() {
        let p16 = Prefix::from_str("192.0.0.0/16").unwrap();
        let p24 = Prefix::from_str("192.0.2.0/24").unwrap();
        let other = Prefix::from_str("198.51.100.0/24").unwrap();
        let v6 = Prefix::from_str("2001:db8::/32").unwrap();

        assert!(p16.contains(&p24));
        assert!(p24.contains(&p24));
        assert!(!p24.contains(&p16));
        assert!(!p16.contains(&other));
        assert!(!p16.contains(&v6));
        assert!(Prefix::from_str("0.0.0.0/0").unwrap().contains(&other));
        assert!(p24.contains_addr("192.0.2.77".parse().unwrap()));
    }

    #[test]
    fn set_names() {
        assert!(is_set_name("AS-EXAMPLE", SetKind::AsSet));
        assert!(is_set_name("as65530:as-customers", SetKind::AsSet));
        assert!(is_set_name("AS-FOO:AS-BAR", SetKind::AsSet));
        assert!(!is_set_name("AS65530", SetKind::AsSet));
        assert!(!is_set_name("RS-EXAMPLE", SetKind::AsSet));
        assert!(is_set_name("RS-EXAMPLE", SetKind::RouteSet));
        assert!(!is_set_name("AS-", SetKind::AsSet));
        assert_eq!(SetKind::of("rs-foo"), Some(SetKind::RouteSet));
        assert_eq!(SetKind::of("MAINT-FOO"), None);
    }

    #[test]
    fn other_names() {
        assert!(is_mntner_name("MAINT-EXAMPLE"));
        assert!(!is_mntner_name("MAINT EXAMPLE"));
        assert!(is_nic_handle("PERSON1-TEST"));
        assert!(is_email("noc@example.net"));
        assert!(!is_email("noc.example.net"));
        assert!(!is_email("noc@example"));
    }
}
