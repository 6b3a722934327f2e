//! The closed set of supported object classes and their schemas.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::rpsl::fields::InvalidValue;

//------------ ObjectClass ---------------------------------------------------

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectClass {
    AutNum,
    AsSet,
    RouteSet,
    Route,
    Route6,
    Mntner,
    Person,
    Role,
    KeyCert,
}

impl ObjectClass {
    pub const ALL: [ObjectClass; 9] = [
        ObjectClass::AutNum,
        ObjectClass::AsSet,
        ObjectClass::RouteSet,
        ObjectClass::Route,
        ObjectClass::Route6,
        ObjectClass::Mntner,
        ObjectClass::Person,
        ObjectClass::Role,
        ObjectClass::KeyCert,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ObjectClass::AutNum => "aut-num",
            ObjectClass::AsSet => "as-set",
            ObjectClass::RouteSet => "route-set",
            ObjectClass::Route => "route",
            ObjectClass::Route6 => "route6",
            ObjectClass::Mntner => "mntner",
            ObjectClass::Person => "person",
            ObjectClass::Role => "role",
            ObjectClass::KeyCert => "key-cert",
        }
    }

    pub fn schema(self) -> &'static ClassSchema {
        match self {
            ObjectClass::AutNum => &AUT_NUM,
            ObjectClass::AsSet => &AS_SET,
            ObjectClass::RouteSet => &ROUTE_SET,
            ObjectClass::Route => &ROUTE,
            ObjectClass::Route6 => &ROUTE6,
            ObjectClass::Mntner => &MNTNER,
            ObjectClass::Person => &PERSON,
            ObjectClass::Role => &ROLE,
            ObjectClass::KeyCert => &KEY_CERT,
        }
    }

    pub fn is_route(self) -> bool {
        matches!(self, ObjectClass::Route | ObjectClass::Route6)
    }

    pub fn is_set(self) -> bool {
        matches!(self, ObjectClass::AsSet | ObjectClass::RouteSet)
    }

    /// Renders the attribute template of this class, one line per
    /// attribute, the way whois servers return it for `-t` queries.
    pub fn template(self) -> String {
        let schema = self.schema();
        let width = schema.attributes.iter().map(|a| a.name.len()).max().unwrap_or(0) + 2;

        let mut res = String::new();
        for spec in schema.attributes {
            let mut markers = Vec::new();
            if schema.primary_key.contains(&spec.name) {
                markers.push("primary key");
            }
            if spec.lookup {
                markers.push("lookup key");
            }
            let name = format!("{}:", spec.name);
            res.push_str(&format!(
                "{:<width$}[{}]  [{}]",
                name,
                if spec.mandatory { "mandatory" } else { "optional" },
                if spec.multiple { "multiple" } else { "single" },
            ));
            if !markers.is_empty() {
                res.push_str(&format!("  [{}]", markers.join(", ")));
            }
            res.push('\n');
        }
        res
    }
}

impl FromStr for ObjectClass {
    type Err = InvalidValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        ObjectClass::ALL
            .into_iter()
            .find(|class| class.name() == lower)
            .ok_or_else(|| InvalidValue::new("object class", s))
    }
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.name().fmt(f)
    }
}

//------------ Syntax --------------------------------------------------------

/// The syntax every value of an attribute must follow.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Syntax {
    FreeText,
    AsNumber,
    Ipv4Prefix,
    Ipv6Prefix,
    /// Comma separated list of IPv4 or IPv6 prefixes.
    PrefixList,
    Email,
    AuthMethod,
    AsSetName,
    RouteSetName,
    /// Comma separated AS numbers and as-set names.
    AsSetMembers,
    /// Comma separated prefixes, route-set, as-set and AS references.
    RouteSetMembers,
    MntnerName,
    /// Comma separated maintainer names.
    MntnerList,
    /// Comma separated maintainer names or `ANY`.
    MbrsByRef,
    /// Comma separated set names.
    SetList,
    NicHandle,
    KeyCertName,
    Source,
}

impl Syntax {
    /// Returns whether values are comma separated lists.
    pub fn is_list(self) -> bool {
        matches!(
            self,
            Syntax::PrefixList
                | Syntax::AsSetMembers
                | Syntax::RouteSetMembers
                | Syntax::MntnerList
                | Syntax::MbrsByRef
                | Syntax::SetList
        )
    }
}

//------------ ClassSchema ---------------------------------------------------

#[derive(Debug)]
pub struct AttributeSpec {
    pub name: &'static str,
    pub mandatory: bool,
    pub multiple: bool,
    pub syntax: Syntax,

    /// The classes a value must refer to, empty if this is not a strong
    /// reference.
    pub references: &'static [ObjectClass],

    /// Whether the attribute can be used for inverse lookups.
    pub lookup: bool,
}

impl AttributeSpec {
    const fn new(name: &'static str, mandatory: bool, multiple: bool, syntax: Syntax) -> Self {
        AttributeSpec {
            name,
            mandatory,
            multiple,
            syntax,
            references: &[],
            lookup: false,
        }
    }

    const fn mandatory(name: &'static str, syntax: Syntax) -> Self {
        Self::new(name, true, false, syntax)
    }

    const fn optional(name: &'static str, syntax: Syntax) -> Self {
        Self::new(name, false, false, syntax)
    }

    const fn mandatory_multi(name: &'static str, syntax: Syntax) -> Self {
        Self::new(name, true, true, syntax)
    }

    const fn optional_multi(name: &'static str, syntax: Syntax) -> Self {
        Self::new(name, false, true, syntax)
    }

    const fn lookup(mut self) -> Self {
        self.lookup = true;
        self
    }

    const fn references(mut self, classes: &'static [ObjectClass]) -> Self {
        self.references = classes;
        self
    }
}

#[derive(Debug)]
pub struct ClassSchema {
    pub class: ObjectClass,

    /// Attributes whose first values, concatenated, form the primary key.
    pub primary_key: &'static [&'static str],
    pub attributes: &'static [AttributeSpec],
}

impl ClassSchema {
    pub fn attribute(&self, name: &str) -> Option<&'static AttributeSpec> {
        self.attributes.iter().find(|spec| spec.name == name)
    }

    pub fn lookup_attributes(&self) -> impl Iterator<Item = &'static AttributeSpec> {
        self.attributes.iter().filter(|spec| spec.lookup)
    }
}

const CONTACTS: &[ObjectClass] = &[ObjectClass::Person, ObjectClass::Role];
const MNTNERS: &[ObjectClass] = &[ObjectClass::Mntner];

const fn mnt_by() -> AttributeSpec {
    AttributeSpec::mandatory_multi("mnt-by", Syntax::MntnerList)
        .lookup()
        .references(MNTNERS)
}

const fn admin_c(mandatory: bool) -> AttributeSpec {
    AttributeSpec::new("admin-c", mandatory, true, Syntax::NicHandle)
        .lookup()
        .references(CONTACTS)
}

const fn tech_c(mandatory: bool) -> AttributeSpec {
    AttributeSpec::new("tech-c", mandatory, true, Syntax::NicHandle)
        .lookup()
        .references(CONTACTS)
}

const DESCR: AttributeSpec = AttributeSpec::optional_multi("descr", Syntax::FreeText);
const REMARKS: AttributeSpec = AttributeSpec::optional_multi("remarks", Syntax::FreeText);
const NOTIFY: AttributeSpec = AttributeSpec::optional_multi("notify", Syntax::Email);
const CHANGED: AttributeSpec = AttributeSpec::optional_multi("changed", Syntax::FreeText);
const CREATED: AttributeSpec = AttributeSpec::optional("created", Syntax::FreeText);
const LAST_MODIFIED: AttributeSpec = AttributeSpec::optional("last-modified", Syntax::FreeText);
const SOURCE: AttributeSpec = AttributeSpec::mandatory("source", Syntax::Source);

const MBRS_BY_REF: AttributeSpec = AttributeSpec::optional_multi("mbrs-by-ref", Syntax::MbrsByRef)
    .lookup()
    .references(MNTNERS);

static AUT_NUM: ClassSchema = ClassSchema {
    class: ObjectClass::AutNum,
    primary_key: &["aut-num"],
    attributes: &[
        AttributeSpec::mandatory("aut-num", Syntax::AsNumber),
        AttributeSpec::mandatory("as-name", Syntax::FreeText),
        DESCR,
        AttributeSpec::optional_multi("member-of", Syntax::SetList).lookup(),
        AttributeSpec::optional_multi("import", Syntax::FreeText),
        AttributeSpec::optional_multi("mp-import", Syntax::FreeText),
        AttributeSpec::optional_multi("export", Syntax::FreeText),
        AttributeSpec::optional_multi("mp-export", Syntax::FreeText),
        AttributeSpec::optional_multi("default", Syntax::FreeText),
        AttributeSpec::optional_multi("mp-default", Syntax::FreeText),
        admin_c(true),
        tech_c(true),
        REMARKS,
        NOTIFY,
        mnt_by(),
        CHANGED,
        CREATED,
        LAST_MODIFIED,
        SOURCE,
    ],
};

static AS_SET: ClassSchema = ClassSchema {
    class: ObjectClass::AsSet,
    primary_key: &["as-set"],
    attributes: &[
        AttributeSpec::mandatory("as-set", Syntax::AsSetName),
        DESCR,
        AttributeSpec::optional_multi("members", Syntax::AsSetMembers).lookup(),
        MBRS_BY_REF,
        admin_c(false),
        tech_c(false),
        REMARKS,
        NOTIFY,
        mnt_by(),
        CHANGED,
        CREATED,
        LAST_MODIFIED,
        SOURCE,
    ],
};

static ROUTE_SET: ClassSchema = ClassSchema {
    class: ObjectClass::RouteSet,
    primary_key: &["route-set"],
    attributes: &[
        AttributeSpec::mandatory("route-set", Syntax::RouteSetName),
        DESCR,
        AttributeSpec::optional_multi("members", Syntax::RouteSetMembers).lookup(),
        AttributeSpec::optional_multi("mp-members", Syntax::RouteSetMembers).lookup(),
        MBRS_BY_REF,
        admin_c(false),
        tech_c(false),
        REMARKS,
        NOTIFY,
        mnt_by(),
        CHANGED,
        CREATED,
        LAST_MODIFIED,
        SOURCE,
    ],
};

static ROUTE: ClassSchema = ClassSchema {
    class: ObjectClass::Route,
    primary_key: &["route", "origin"],
    attributes: &[
        AttributeSpec::mandatory("route", Syntax::Ipv4Prefix),
        DESCR,
        AttributeSpec::mandatory("origin", Syntax::AsNumber).lookup(),
        AttributeSpec::optional_multi("holes", Syntax::PrefixList),
        AttributeSpec::optional_multi("member-of", Syntax::SetList).lookup(),
        AttributeSpec::optional_multi("inject", Syntax::FreeText),
        AttributeSpec::optional("aggr-mtd", Syntax::FreeText),
        AttributeSpec::optional("aggr-bndry", Syntax::FreeText),
        AttributeSpec::optional("export-comps", Syntax::FreeText),
        AttributeSpec::optional("components", Syntax::FreeText),
        admin_c(false),
        tech_c(false),
        AttributeSpec::optional_multi("geoidx", Syntax::FreeText),
        AttributeSpec::optional("roa-uri", Syntax::FreeText),
        REMARKS,
        NOTIFY,
        mnt_by(),
        CHANGED,
        CREATED,
        LAST_MODIFIED,
        SOURCE,
    ],
};

static ROUTE6: ClassSchema = ClassSchema {
    class: ObjectClass::Route6,
    primary_key: &["route6", "origin"],
    attributes: &[
        AttributeSpec::mandatory("route6", Syntax::Ipv6Prefix),
        DESCR,
        AttributeSpec::mandatory("origin", Syntax::AsNumber).lookup(),
        AttributeSpec::optional_multi("holes", Syntax::PrefixList),
        AttributeSpec::optional_multi("member-of", Syntax::SetList).lookup(),
        AttributeSpec::optional_multi("inject", Syntax::FreeText),
        AttributeSpec::optional("aggr-mtd", Syntax::FreeText),
        AttributeSpec::optional("aggr-bndry", Syntax::FreeText),
        AttributeSpec::optional("export-comps", Syntax::FreeText),
        AttributeSpec::optional("components", Syntax::FreeText),
        admin_c(false),
        tech_c(false),
        REMARKS,
        NOTIFY,
        mnt_by(),
        CHANGED,
        CREATED,
        LAST_MODIFIED,
        SOURCE,
    ],
};

static MNTNER: ClassSchema = ClassSchema {
    class: ObjectClass::Mntner,
    primary_key: &["mntner"],
    attributes: &[
        AttributeSpec::mandatory("mntner", Syntax::MntnerName),
        DESCR,
        admin_c(true),
        tech_c(false),
        AttributeSpec::mandatory_multi("upd-to", Syntax::Email),
        AttributeSpec::optional_multi("mnt-nfy", Syntax::Email),
        AttributeSpec::mandatory_multi("auth", Syntax::AuthMethod),
        REMARKS,
        NOTIFY,
        mnt_by(),
        CHANGED,
        CREATED,
        LAST_MODIFIED,
        SOURCE,
    ],
};

static PERSON: ClassSchema = ClassSchema {
    class: ObjectClass::Person,
    primary_key: &["nic-hdl"],
    attributes: &[
        AttributeSpec::mandatory("person", Syntax::FreeText),
        AttributeSpec::mandatory_multi("address", Syntax::FreeText),
        AttributeSpec::mandatory_multi("phone", Syntax::FreeText),
        AttributeSpec::optional_multi("fax-no", Syntax::FreeText),
        AttributeSpec::optional_multi("e-mail", Syntax::Email),
        AttributeSpec::mandatory("nic-hdl", Syntax::NicHandle),
        REMARKS,
        NOTIFY,
        mnt_by(),
        CHANGED,
        CREATED,
        LAST_MODIFIED,
        SOURCE,
    ],
};

static ROLE: ClassSchema = ClassSchema {
    class: ObjectClass::Role,
    primary_key: &["nic-hdl"],
    attributes: &[
        AttributeSpec::mandatory("role", Syntax::FreeText),
        AttributeSpec::optional("trouble", Syntax::FreeText),
        AttributeSpec::mandatory_multi("address", Syntax::FreeText),
        AttributeSpec::optional_multi("phone", Syntax::FreeText),
        AttributeSpec::optional_multi("fax-no", Syntax::FreeText),
        AttributeSpec::mandatory_multi("e-mail", Syntax::Email),
        admin_c(false),
        tech_c(false),
        AttributeSpec::mandatory("nic-hdl", Syntax::NicHandle),
        REMARKS,
        NOTIFY,
        mnt_by(),
        CHANGED,
        CREATED,
        LAST_MODIFIED,
        SOURCE,
    ],
};

static KEY_CERT: ClassSchema = ClassSchema {
    class: ObjectClass::KeyCert,
    primary_key: &["key-cert"],
    attributes: &[
        AttributeSpec::mandatory("key-cert", Syntax::KeyCertName),
        AttributeSpec::optional("method", Syntax::FreeText),
        AttributeSpec::optional_multi("owner", Syntax::FreeText),
        AttributeSpec::optional("fingerpr", Syntax::FreeText),
        AttributeSpec::mandatory_multi("certif", Syntax::FreeText),
        admin_c(false),
        tech_c(false),
        REMARKS,
        NOTIFY,
        mnt_by(),
        CHANGED,
        CREATED,
        LAST_MODIFIED,
        SOURCE,
    ],
};

//------------ Tests ---------------------------------------------------------
