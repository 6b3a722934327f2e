//! Options for read-only queries.

use crate::cli::client::{Error, IrrdClient, LookupResponse};
use crate::cli::report::Report;
use crate::commons::api::{ObjectList, PrefixList, SetMembers, StatusReport};

//------------ Sources -------------------------------------------------------

/// Restricts a query to some sources.
#[derive(clap::Args)]
pub struct Sources {
    /// Limit the query to these sources, in this order.
    #[arg(long = "source", value_name = "SOURCE")]
    pub sources: Vec<String>,
}

//------------ Status --------------------------------------------------------

#[derive(clap::Parser)]
pub struct Status {
    #[command(flatten)]
    sources: Sources,
}

impl Status {
    pub async fn run(self, client: &IrrdClient) -> Result<StatusReport, Error> {
        client.status(&self.sources.sources).await
    }
}

//------------ Lookup --------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, clap::ValueEnum)]
pub enum LookupMode {
    /// Objects of any class with exactly this primary key.
    #[default]
    Exact,

    /// Objects with this primary key in some classes, or routes for
    /// this prefix.
    Search,

    /// The members of the set with this name.
    Expand,
}

impl LookupMode {
    fn as_str(self) -> &'static str {
        match self {
            LookupMode::Exact => "exact",
            LookupMode::Search => "search",
            LookupMode::Expand => "expand",
        }
    }
}

#[derive(clap::Parser)]
pub struct Lookup {
    /// The primary key, or the set name when expanding.
    key: String,

    #[arg(long, value_enum, default_value_t = LookupMode::Exact)]
    mode: LookupMode,

    /// Limit a search to these object classes.
    #[arg(long = "class", value_name = "CLASS")]
    classes: Vec<String>,

    /// Expand sets recursively.
    #[arg(long)]
    recursive: bool,

    #[command(flatten)]
    sources: Sources,
}

impl Lookup {
    pub async fn run(self, client: &IrrdClient) -> Result<LookupResponse, Error> {
        let mut query = vec![("sources", self.sources.sources.join(","))];
        match self.mode {
            LookupMode::Search => query.push(("classes", self.classes.join(","))),
            LookupMode::Expand if self.recursive => query.push(("recursive", "true".into())),
            _ => {}
        }
        client.lookup(&self.key, self.mode.as_str(), &query).await
    }
}

//------------ Sets ----------------------------------------------------------

#[derive(clap::Parser)]
pub struct Sets {
    /// The name of the as-set or route-set.
    name: String,

    /// Expand nested sets.
    #[arg(long)]
    recursive: bool,

    #[command(flatten)]
    sources: Sources,
}

impl Sets {
    pub async fn run(self, client: &IrrdClient) -> Result<SetMembers, Error> {
        client.set_members(&self.name, self.recursive, &self.sources.sources).await
    }
}

//------------ Routes --------------------------------------------------------

#[derive(clap::Subcommand)]
pub enum Routes {
    /// The prefixes of all routes with this origin.
    Origin(RoutesOrigin),

    /// The prefixes of all routes originated by members of this as-set.
    AsSet(RoutesAsSet),

    /// Route objects related to a prefix.
    Search(RoutesSearch),
}

impl Routes {
    pub async fn run(self, client: &IrrdClient) -> Report {
        match self {
            Self::Origin(cmd) => cmd.run(client).await.into(),
            Self::AsSet(cmd) => cmd.run(client).await.into(),
            Self::Search(cmd) => cmd.run(client).await.into(),
        }
    }
}

#[derive(clap::Parser)]
pub struct RoutesOrigin {
    /// The origin AS, e.g. AS65000.
    origin: String,

    /// Only prefixes of this IP version, 4 or 6.
    #[arg(long)]
    version: Option<String>,

    #[command(flatten)]
    sources: Sources,
}

impl RoutesOrigin {
    pub async fn run(self, client: &IrrdClient) -> Result<PrefixList, Error> {
        client
            .routes_for_origin(&self.origin, self.version.as_deref(), &self.sources.sources)
            .await
    }
}

#[derive(clap::Parser)]
pub struct RoutesAsSet {
    /// The name of the as-set.
    name: String,

    /// Only prefixes of this IP version, 4 or 6.
    #[arg(long)]
    version: Option<String>,

    #[command(flatten)]
    sources: Sources,
}

impl RoutesAsSet {
    pub async fn run(self, client: &IrrdClient) -> Result<PrefixList, Error> {
        client
            .routes_for_as_set(&self.name, self.version.as_deref(), &self.sources.sources)
            .await
    }
}

#[derive(clap::Parser)]
pub struct RoutesSearch {
    /// The prefix to search for.
    prefix: String,

    /// One of exact, less-specific-one-level, less-specific or
    /// more-specific.
    #[arg(long = "type", default_value = "exact")]
    lookup: String,

    #[command(flatten)]
    sources: Sources,
}

impl RoutesSearch {
    pub async fn run(self, client: &IrrdClient) -> Result<ObjectList, Error> {
        client.route_search(&self.prefix, &self.lookup, &self.sources.sources).await
    }
}

//------------ Inverse -------------------------------------------------------

#[derive(clap::Parser)]
pub struct Inverse {
    /// The attribute name, e.g. mnt-by.
    attribute: String,

    /// The value to look for.
    value: String,

    #[command(flatten)]
    sources: Sources,
}

impl Inverse {
    pub async fn run(self, client: &IrrdClient) -> Result<ObjectList, Error> {
        client.inverse(&self.attribute, &self.value, &self.sources.sources).await
    }
}

//------------ References ----------------------------------------------------

#[derive(clap::Parser)]
pub struct References {
    /// The class of the referenced object.
    class: String,

    /// The primary key of the referenced object.
    pk: String,

    #[command(flatten)]
    sources: Sources,
}

impl References {
    pub async fn run(self, client: &IrrdClient) -> Result<ObjectList, Error> {
        client.references(&self.class, &self.pk, &self.sources.sources).await
    }
}

//------------ Text ----------------------------------------------------------

#[derive(clap::Parser)]
pub struct Text {
    /// The text to search for.
    value: String,

    #[command(flatten)]
    sources: Sources,
}

impl Text {
    pub async fn run(self, client: &IrrdClient) -> Result<ObjectList, Error> {
        client.text_search(&self.value, &self.sources.sources).await
    }
}

//------------ Template ------------------------------------------------------

#[derive(clap::Parser)]
pub struct Template {
    /// The object class.
    class: String,
}

impl Template {
    pub async fn run(self, client: &IrrdClient) -> Result<String, Error> {
        client.template(&self.class).await
    }
}

//------------ Dump ----------------------------------------------------------

#[derive(clap::Parser)]
pub struct Dump {
    /// The source to dump.
    source: String,
}

impl Dump {
    pub async fn run(self, client: &IrrdClient) -> Result<String, Error> {
        client.dump(&self.source).await
    }
}
