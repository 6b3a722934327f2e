//! Resolving lookups, searches and set expansions.

use std::{
    cell::OnceCell,
    collections::{BTreeSet, HashMap, HashSet, VecDeque},
    str::FromStr,
    sync::Arc,
    time::{Duration, Instant},
};

use crate::commons::api::{PrefixList, QueryObject, SetMembers, SourceStatus, StatusReport};
use crate::journal::SourceState;
use crate::mirror::ImportStatus;
use crate::rpsl::{
    AsNumber, IpVersion, ObjectClass, ObjectKey, Prefix, RpslObject, SourceName,
    fields::SetKind,
};

use super::{AccessEntry, QueryError};

type QueryResult<T> = Result<T, QueryError>;

//------------ SourceView ----------------------------------------------------

/// A snapshot of a source together with what is known about it.
#[derive(Clone, Debug)]
pub struct SourceView {
    pub state: Arc<SourceState>,
    pub authoritative: bool,
    pub upstream: Option<String>,
    pub import: Option<ImportStatus>,
}

impl SourceView {
    pub fn source(&self) -> &SourceName {
        self.state.source()
    }

    fn status(&self) -> SourceStatus {
        let import = self.import.clone().unwrap_or_default();
        SourceStatus {
            source: self.source().clone(),
            authoritative: self.authoritative,
            serial: self.state.serial(),
            oldest_journal_serial: self.state.oldest_journal_serial(),
            newest_journal_serial: self.state.newest_journal_serial(),
            object_count: self.state.object_count(),
            last_update: self.state.last_update(),
            upstream: self.upstream.clone(),
            upstream_serial: import.upstream_serial,
            last_import: import.last_import,
            last_import_error: import.last_error,
        }
    }
}

//------------ QueryLimits ---------------------------------------------------

#[derive(Clone, Copy, Debug)]
pub struct QueryLimits {
    pub max_results: usize,
    pub set_max_depth: usize,
    pub set_max_members: usize,
    pub timeout: Duration,

    /// Drops IPv6 prefixes from set expansions.
    pub ipv4_only_route_set_members: bool,
}

impl Default for QueryLimits {
    fn default() -> Self {
        QueryLimits {
            max_results: 10_000,
            set_max_depth: 32,
            set_max_members: 100_000,
            timeout: Duration::from_secs(30),
            ipv4_only_route_set_members: false,
        }
    }
}

//------------ LookupMode ----------------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LookupMode {
    /// Objects of any class with exactly this primary key.
    Exact,

    /// Objects of the given classes matching the key. A key that is a
    /// prefix also finds the route objects for it. An empty list means
    /// all classes.
    Search(Vec<ObjectClass>),

    /// The members of the named set.
    Expand { recursive: bool },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LookupResult {
    Objects(Vec<QueryObject>),
    Members(SetMembers),
}

//------------ RouteLookupType -----------------------------------------------

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RouteLookupType {
    Exact,
    LessSpecificOneLevel,
    LessSpecificWithExact,
    MoreSpecificWithoutExact,
}

impl FromStr for RouteLookupType {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exact" => Ok(RouteLookupType::Exact),
            "less-specific-one-level" => Ok(RouteLookupType::LessSpecificOneLevel),
            "less-specific" => Ok(RouteLookupType::LessSpecificWithExact),
            "more-specific" => Ok(RouteLookupType::MoreSpecificWithoutExact),
            _ => Err(QueryError::invalid(format!("unknown route lookup type '{s}'"))),
        }
    }
}

//------------ Member --------------------------------------------------------

/// A single item of a `members` or `mp-members` attribute.
enum Member<'a> {
    AsNumber(AsNumber),
    Set(String),

    /// A prefix, possibly with a range operator, kept as written.
    Prefix(&'a str),
}

impl<'a> Member<'a> {
    fn parse(item: &'a str) -> Option<Self> {
        let base = item.split('^').next().unwrap_or(item);
        if let Ok(asn) = AsNumber::from_str(item) {
            Some(Member::AsNumber(asn))
        } else if SetKind::of(base).is_some() {
            Some(Member::Set(base.to_ascii_uppercase()))
        } else if Prefix::from_str(base).is_ok() {
            Some(Member::Prefix(item))
        } else {
            None
        }
    }
}

//------------ QueryResolver -------------------------------------------------

/// Answers queries for one requester over a fixed set of source snapshots.
pub struct QueryResolver {
    /// Every source known to the daemon.
    all: Vec<SourceView>,

    /// The sources in scope, in order of priority.
    views: Vec<SourceView>,
    access: AccessEntry,
    limits: QueryLimits,
    deadline: Instant,

    /// Route prefixes per origin, built on first use.
    origins: OnceCell<HashMap<AsNumber, BTreeSet<Prefix>>>,
}

impl QueryResolver {
    pub fn new(views: Vec<SourceView>, access: AccessEntry, limits: QueryLimits) -> Self {
        QueryResolver {
            all: views.clone(),
            views,
            access,
            limits,
            deadline: Instant::now() + limits.timeout,
            origins: OnceCell::new(),
        }
    }

    /// Sets the scope used when a query names no sources. An empty list
    /// keeps all sources.
    pub fn with_default_sources(mut self, sources: &[SourceName]) -> Self {
        if !sources.is_empty() {
            self.views = sources
                .iter()
                .filter_map(|source| self.all.iter().find(|v| v.source() == source))
                .cloned()
                .collect();
            self.origins = OnceCell::new();
        }
        self
    }

    /// Restricts the query to the given sources, in the given order.
    /// Without sources the default scope applies.
    pub fn with_sources(mut self, sources: Option<&[SourceName]>) -> QueryResult<Self> {
        if let Some(sources) = sources {
            let mut views = Vec::with_capacity(sources.len());
            for source in sources {
                let view = self
                    .all
                    .iter()
                    .find(|v| v.source() == source)
                    .ok_or_else(|| QueryError::UnknownSource(source.clone()))?;
                views.push(view.clone());
            }
            self.views = views;
            self.origins = OnceCell::new();
        }
        Ok(self)
    }

    pub fn sources(&self) -> impl Iterator<Item = &SourceName> {
        self.views.iter().map(SourceView::source)
    }

    //--- Lookups

    pub fn lookup(&self, key: &str, mode: LookupMode) -> QueryResult<LookupResult> {
        self.check_query()?;
        let key = key.trim();
        if key.is_empty() {
            return Err(QueryError::invalid("empty search key"));
        }

        match mode {
            LookupMode::Exact => self.key_lookup(key, &ObjectClass::ALL).map(LookupResult::Objects),
            LookupMode::Search(classes) => {
                let classes = if classes.is_empty() { ObjectClass::ALL.to_vec() } else { classes };
                let mut res = self.key_lookup(key, &classes)?;
                if let Ok(prefix) = Prefix::from_str(key) {
                    let found = self.route_search(prefix, RouteLookupType::Exact)?;
                    res.extend(found.into_iter().filter(|obj| classes.contains(&obj.class)));
                }
                self.limit(res).map(LookupResult::Objects)
            }
            LookupMode::Expand { recursive } => self.members_for_set(key, recursive).map(LookupResult::Members),
        }
    }

    fn key_lookup(&self, key: &str, classes: &[ObjectClass]) -> QueryResult<Vec<QueryObject>> {
        let mut res = Vec::new();
        for view in &self.views {
            for class in classes {
                if let Some(object) = view.state.object(&ObjectKey::new(*class, key)) {
                    res.push(QueryObject::new(view.source().clone(), object));
                }
            }
        }
        self.limit(res)
    }

    //--- Sets

    /// Returns the members of an as-set or route-set.
    ///
    /// Without `recursive` the direct members are returned as written.
    /// Otherwise member sets are resolved until only AS numbers remain for
    /// an as-set, or only prefixes for a route-set. Objects that name the
    /// set in `member-of` are included when the set allows them through
    /// `mbrs-by-ref`.
    pub fn members_for_set(&self, name: &str, recursive: bool) -> QueryResult<SetMembers> {
        self.check_query()?;
        let root = name.trim().to_ascii_uppercase();
        let kind = SetKind::of(&root).ok_or_else(|| QueryError::invalid(format!("'{name}' is not a set name")))?;

        let mut members = SetMembers {
            name: root.clone(),
            ..Default::default()
        };
        let mut seen: HashSet<String> = HashSet::new();
        let mut visited: HashSet<String> = HashSet::from([root.clone()]);
        let mut queue: VecDeque<(String, usize)> = VecDeque::from([(root, 0)]);

        let mut push = |members: &mut SetMembers, value: String| {
            if seen.insert(value.clone()) {
                members.members.push(value);
            }
        };

        'sets: while let Some((set_name, depth)) = queue.pop_front() {
            self.check_deadline()?;

            let Some((source, set)) = self.find_set(&set_name, kind) else {
                if depth == 0 {
                    debug!("Set {set_name} not found");
                }
                continue;
            };

            for item in self.set_items(&source, &set) {
                match item {
                    SetItem::Member(Member::Set(sub)) => {
                        if !recursive {
                            push(&mut members, sub);
                        } else if kind == SetKind::AsSet && SetKind::of(&sub) != Some(SetKind::AsSet) {
                            continue;
                        } else if visited.insert(sub.clone()) {
                            if depth + 1 >= self.limits.set_max_depth {
                                members.truncated = true;
                            } else {
                                queue.push_back((sub, depth + 1));
                            }
                        }
                    }
                    SetItem::Member(Member::AsNumber(asn)) => {
                        if recursive && kind == SetKind::RouteSet {
                            for prefix in self.origin_prefixes(asn, None) {
                                push(&mut members, prefix.to_string());
                            }
                        } else {
                            push(&mut members, asn.to_string());
                        }
                    }
                    SetItem::Member(Member::Prefix(prefix)) => {
                        if kind == SetKind::RouteSet {
                            push(&mut members, prefix.to_string());
                        }
                    }
                    SetItem::Route(prefix) => push(&mut members, prefix.to_string()),
                }

                if members.members.len() >= self.limits.set_max_members {
                    members.truncated = true;
                    break 'sets;
                }
            }
        }

        let root = members.name.clone();
        members.members.retain(|member| *member != root);
        if self.limits.ipv4_only_route_set_members {
            members.members.retain(|member| {
                let base = member.split('^').next().unwrap_or(member);
                Prefix::from_str(base).map_or(true, |prefix| prefix.version() == IpVersion::V4)
            });
        }

        if members.truncated {
            info!("Expansion of set {} truncated", members.name);
        }
        Ok(members)
    }

    /// Finds a set in the first source that has it. A route-set expansion
    /// also follows as-sets.
    fn find_set(&self, name: &str, root: SetKind) -> Option<(SourceName, Arc<RpslObject>)> {
        let class = match SetKind::of(name)? {
            SetKind::AsSet => ObjectClass::AsSet,
            SetKind::RouteSet if root == SetKind::RouteSet => ObjectClass::RouteSet,
            SetKind::RouteSet => return None,
        };
        let key = ObjectKey::new(class, name);
        self.views
            .iter()
            .find_map(|view| view.state.object(&key).map(|obj| (view.source().clone(), obj.clone())))
    }

    /// The direct members of a set, including objects added through
    /// `mbrs-by-ref`.
    fn set_items<'a>(&'a self, source: &SourceName, set: &'a RpslObject) -> Vec<SetItem<'a>> {
        let mut items: Vec<SetItem> = set
            .list_values("members")
            .chain(set.list_values("mp-members"))
            .filter_map(Member::parse)
            .map(SetItem::Member)
            .collect();

        let mbrs_by_ref: Vec<String> = set.list_values("mbrs-by-ref").map(str::to_ascii_uppercase).collect();
        if mbrs_by_ref.is_empty() {
            return items;
        }
        let any = mbrs_by_ref.iter().any(|m| m == "ANY");

        let Some(view) = self.views.iter().find(|v| v.source() == source) else {
            return items;
        };
        for object in view.state.objects() {
            let candidate = match set.class() {
                ObjectClass::AsSet => object.class() == ObjectClass::AutNum,
                _ => object.class().is_route(),
            };
            if !candidate || !object.list_values("member-of").any(|s| s.eq_ignore_ascii_case(set.pk())) {
                continue;
            }
            if !any && !object.mnt_by().iter().any(|m| mbrs_by_ref.contains(m)) {
                continue;
            }
            if let Some(prefix) = object.prefix() {
                items.push(SetItem::Route(prefix));
            } else if let Ok(asn) = AsNumber::from_str(object.pk()) {
                items.push(SetItem::Member(Member::AsNumber(asn)));
            }
        }
        items
    }

    //--- Routes

    /// The prefixes of all route objects with the given origin.
    pub fn routes_for_origin(&self, origin: AsNumber, version: Option<IpVersion>) -> QueryResult<PrefixList> {
        self.check_query()?;
        Ok(PrefixList {
            prefixes: self.origin_prefixes(origin, version).map(|p| p.to_string()).collect(),
        })
    }

    /// The prefixes of all route objects originated by the members of an
    /// as-set.
    pub fn routes_for_as_set(&self, name: &str, version: Option<IpVersion>) -> QueryResult<PrefixList> {
        if SetKind::of(name) != Some(SetKind::AsSet) {
            return Err(QueryError::invalid(format!("'{name}' is not an as-set name")));
        }
        let members = self.members_for_set(name, true)?;

        let mut prefixes = BTreeSet::new();
        for member in &members.members {
            self.check_deadline()?;
            if let Ok(asn) = AsNumber::from_str(member) {
                prefixes.extend(self.origin_prefixes(asn, version));
            }
        }
        Ok(PrefixList {
            prefixes: prefixes.into_iter().map(|p| p.to_string()).collect(),
        })
    }

    fn origin_prefixes(&self, origin: AsNumber, version: Option<IpVersion>) -> impl Iterator<Item = Prefix> + '_ {
        let index = self.origins.get_or_init(|| {
            let mut index: HashMap<AsNumber, BTreeSet<Prefix>> = HashMap::new();
            for object in self.views.iter().flat_map(|v| v.state.objects()) {
                if let (Some(origin), Some(prefix)) = (object.origin(), object.prefix()) {
                    index.entry(origin).or_default().insert(prefix);
                }
            }
            index
        });
        index
            .get(&origin)
            .into_iter()
            .flatten()
            .copied()
            .filter(move |p| version.is_none_or(|v| p.version() == v))
    }

    /// Finds route objects by their relation to a prefix.
    pub fn route_search(&self, prefix: Prefix, lookup: RouteLookupType) -> QueryResult<Vec<QueryObject>> {
        self.check_query()?;

        let mut found: Vec<(SourceName, Prefix, &Arc<RpslObject>)> = Vec::new();
        for view in &self.views {
            for object in view.state.objects() {
                let Some(route) = object.prefix() else {
                    continue;
                };
                let matches = match lookup {
                    RouteLookupType::Exact => route == prefix,
                    RouteLookupType::LessSpecificOneLevel => route != prefix && route.contains(&prefix),
                    RouteLookupType::LessSpecificWithExact => route.contains(&prefix),
                    RouteLookupType::MoreSpecificWithoutExact => route != prefix && prefix.contains(&route),
                };
                if matches {
                    found.push((view.source().clone(), route, object));
                }
            }
            self.check_deadline()?;
        }

        if lookup == RouteLookupType::LessSpecificOneLevel {
            let longest = found.iter().map(|(_, route, _)| route.len()).max();
            found.retain(|(_, route, _)| Some(route.len()) == longest);
        }

        let res = found
            .into_iter()
            .map(|(source, _, object)| QueryObject::new(source, object))
            .collect();
        self.limit(res)
    }

    //--- Searches

    /// Finds objects by the value of a lookup attribute.
    pub fn attribute_search(&self, attribute: &str, value: &str) -> QueryResult<Vec<QueryObject>> {
        self.check_query()?;
        let attribute = attribute.trim().to_ascii_lowercase();
        let classes: Vec<ObjectClass> = ObjectClass::ALL
            .into_iter()
            .filter(|class| class.schema().lookup_attributes().any(|spec| spec.name == attribute))
            .collect();
        if classes.is_empty() {
            return Err(QueryError::invalid(format!("'{attribute}' is not a lookup attribute")));
        }

        let value = value.trim();
        let mut res = Vec::new();
        for view in &self.views {
            for object in view.state.objects() {
                if classes.contains(&object.class())
                    && object.list_values(&attribute).any(|v| v.eq_ignore_ascii_case(value))
                {
                    res.push(QueryObject::new(view.source().clone(), object));
                }
            }
            self.check_deadline()?;
        }
        self.limit(res)
    }

    /// Finds objects by primary key or contact name. This scans every
    /// object and is a bulk query.
    pub fn text_search(&self, value: &str) -> QueryResult<Vec<QueryObject>> {
        self.check_bulk()?;
        let value = value.trim();
        if value.is_empty() {
            return Err(QueryError::invalid("empty search text"));
        }

        let mut res = Vec::new();
        for view in &self.views {
            for object in view.state.objects() {
                let name = match object.class() {
                    ObjectClass::Person => object.first_value("person"),
                    ObjectClass::Role => object.first_value("role"),
                    _ => None,
                };
                if object.pk().eq_ignore_ascii_case(value) || name.is_some_and(|n| n.eq_ignore_ascii_case(value)) {
                    res.push(QueryObject::new(view.source().clone(), object));
                }
            }
            self.check_deadline()?;
        }
        self.limit(res)
    }

    /// The objects that refer to the given object.
    pub fn referencing(&self, key: &ObjectKey) -> QueryResult<Vec<QueryObject>> {
        self.check_query()?;
        let mut res = Vec::new();
        for view in &self.views {
            for referrer in view.state.references_to(key) {
                if let Some(object) = view.state.object(&referrer) {
                    res.push(QueryObject::new(view.source().clone(), object));
                }
            }
        }
        self.limit(res)
    }

    //--- Other

    pub fn template(&self, class: &str) -> QueryResult<String> {
        self.check_query()?;
        let class = ObjectClass::from_str(class).map_err(QueryError::invalid)?;
        Ok(class.template())
    }

    /// Reports the status of the requested sources, or all sources.
    pub fn database_status(&self, sources: Option<&[String]>) -> QueryResult<StatusReport> {
        self.check_query()?;
        let mut report = StatusReport::default();
        match sources {
            None => report.sources = self.all.iter().map(SourceView::status).collect(),
            Some(names) => {
                for name in names {
                    let view = SourceName::from_str(name)
                        .ok()
                        .and_then(|source| self.all.iter().find(|v| *v.source() == source));
                    match view {
                        Some(view) => report.sources.push(view.status()),
                        None => report.unknown_sources.push(name.clone()),
                    }
                }
            }
        }
        Ok(report)
    }

    /// All objects of a source.
    pub fn dump(&self, source: &SourceName) -> QueryResult<Vec<QueryObject>> {
        self.check_bulk()?;
        let view = self
            .all
            .iter()
            .find(|v| v.source() == source)
            .ok_or_else(|| QueryError::UnknownSource(source.clone()))?;
        Ok(view
            .state
            .objects()
            .map(|object| QueryObject::new(source.clone(), object))
            .collect())
    }

    //--- Limits

    fn check_query(&self) -> QueryResult<()> {
        if self.access.query {
            self.check_deadline()
        } else {
            Err(QueryError::NotAuthorized("queries are not allowed from this address".to_string()))
        }
    }

    fn check_bulk(&self) -> QueryResult<()> {
        self.check_query()?;
        if self.access.bulk_queries {
            Ok(())
        } else {
            Err(QueryError::NotAuthorized(
                "bulk queries are not allowed from this address".to_string(),
            ))
        }
    }

    fn check_deadline(&self) -> QueryResult<()> {
        if Instant::now() > self.deadline {
            Err(QueryError::Timeout)
        } else {
            Ok(())
        }
    }

    fn limit(&self, objects: Vec<QueryObject>) -> QueryResult<Vec<QueryObject>> {
        let limit = self.access.max_results.unwrap_or(self.limits.max_results);
        if objects.len() > limit {
            Err(QueryError::TooManyResults { limit })
        } else {
            Ok(objects)
        }
    }
}

//------------ SetItem -------------------------------------------------------

enum SetItem<'a> {
    Member(Member<'a>),

    /// A route object that joined the set through `member-of`.
    Route(Prefix),
}

//------------ Tests ---------------------------------------------------------
