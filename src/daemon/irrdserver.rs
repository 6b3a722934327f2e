//! The registry server that ties the sources, importers and queries
//! together.

use std::{
    collections::BTreeMap,
    net::IpAddr,
    path::PathBuf,
    sync::{Arc, PoisonError, RwLock},
};

use chrono::{Duration, Utc};
use tokio::sync::Mutex;

use crate::commons::{
    IrrdResult,
    api::{AdminResult, ConfigReloaded, ExpireJournal, LoadDump, SetSerial, StatusReport, SubmissionReport, SubmissionRequest},
    error::Error,
};
use crate::constants::*;
use crate::daemon::{
    config::{Config, RuntimeConfig, SourceConfig},
    submission::Submission,
};
use crate::journal::{JournalHandle, JournalStore};
use crate::mirror::{ErrorCode, ExportRegistry, Importer, ImporterHandle, ProtocolError};
use crate::query::{AccessEntry, QueryResolver, SourceView};
use crate::rpsl::{self, SourceName};

//------------ ManagedSource -------------------------------------------------

/// A configured source with its writer and, if mirrored, its importer.
struct ManagedSource {
    config: SourceConfig,
    journal: JournalHandle,
    importer: Option<ImporterHandle>,

    /// Held while a submission validates and commits, so that no other
    /// submission changes the source in between.
    submit_lock: Mutex<()>,
}

impl ManagedSource {
    fn view(&self) -> SourceView {
        SourceView {
            state: self.journal.snapshot(),
            authoritative: self.config.authoritative,
            upstream: self.config.upstream.clone(),
            import: self.importer.as_ref().map(ImporterHandle::status),
        }
    }
}

//------------ IrrdServer ----------------------------------------------------

/// This is the registry server that is doing all the orchestration for
/// all components.
pub struct IrrdServer {
    sources: BTreeMap<SourceName, ManagedSource>,

    // Swapped as a whole on reload
    runtime: RwLock<Arc<RuntimeConfig>>,

    // The file to re-read on a reload, if any
    config_file: Option<PathBuf>,

    pub config: Arc<Config>,
}

/// # Set up and initialization
impl IrrdServer {
    /// Loads all sources from storage and starts their writers and
    /// importers. Must be called from within a tokio runtime.
    pub fn build(config: Arc<Config>, config_file: Option<PathBuf>) -> IrrdResult<Self> {
        info!("Starting {} v{}", IRRD_SERVER_APP, IRRD_VERSION);

        let runtime = RuntimeConfig::from_config(&config, 1).map_err(|e| Error::ConfigError(e.to_string()))?;
        let store = Arc::new(JournalStore::create(&config.storage_uri)?);

        let mut sources = BTreeMap::new();
        for source_config in &config.sources {
            let journal = JournalHandle::spawn(store.clone(), source_config.name.clone())?;
            let importer = source_config.upstream.as_ref().map(|upstream| {
                info!("Mirroring source {} from {}", source_config.name, upstream);
                Importer::new(journal.clone(), upstream.clone(), config.mirror_timeout())
                    .spawn(config.import_schedule())
            });
            sources.insert(
                source_config.name.clone(),
                ManagedSource {
                    config: source_config.clone(),
                    journal,
                    importer,
                    submit_lock: Mutex::new(()),
                },
            );
        }

        Ok(IrrdServer {
            sources,
            runtime: RwLock::new(Arc::new(runtime)),
            config_file,
            config,
        })
    }

    /// Returns the current runtime configuration.
    pub fn runtime(&self) -> Arc<RuntimeConfig> {
        self.runtime.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn source(&self, name: &SourceName) -> IrrdResult<&ManagedSource> {
        self.sources.get(name).ok_or_else(|| Error::UnknownSource(name.clone()))
    }

    pub fn journal(&self, name: &SourceName) -> IrrdResult<JournalHandle> {
        self.source(name).map(|s| s.journal.clone())
    }
}

/// # Queries
impl IrrdServer {
    /// Returns a resolver over the current state of all sources, with the
    /// access rights of the peer. Admins get unrestricted access. Queries
    /// that name no sources use the configured default sources.
    pub fn resolver(&self, peer: IpAddr, admin: bool) -> QueryResolver {
        let runtime = self.runtime();
        let access = if admin {
            AccessEntry::unrestricted()
        } else {
            runtime.access().entry_for(peer)
        };
        let views = self.sources.values().map(ManagedSource::view).collect();
        QueryResolver::new(views, access, runtime.query_limits()).with_default_sources(runtime.sources_default())
    }

    pub fn status(&self, peer: IpAddr, admin: bool, sources: Option<&[String]>) -> IrrdResult<StatusReport> {
        let mut report = self.resolver(peer, admin).database_status(sources)?;
        report.config_version = self.runtime().version();
        Ok(report)
    }
}

/// # Submissions
impl IrrdServer {
    /// Processes a submission of changes to authoritative sources.
    ///
    /// Submissions to the same source are handled one at a time, those to
    /// different sources proceed in parallel.
    pub async fn submit(&self, request: SubmissionRequest) -> IrrdResult<SubmissionReport> {
        let mut submission = Submission::parse(&request)?;
        submission.check_sources(|name| match self.sources.get(name) {
            None => Some(format!("Unknown source '{name}'")),
            Some(source) if !source.config.authoritative => Some(format!("Source '{name}' is not authoritative")),
            Some(_) => None,
        });

        // Locks are taken in source order to rule out deadlocks.
        let mut guards = Vec::new();
        let mut journals = BTreeMap::new();
        for name in submission.sources() {
            let source = self.source(&name)?;
            guards.push(source.submit_lock.lock().await);
            journals.insert(name, source.journal.clone());
        }

        let runtime = self.runtime();
        let report = submission.process(&journals, &runtime).await;
        drop(guards);
        Ok(report)
    }
}

/// # Admin
impl IrrdServer {
    /// Discards a mirrored source and loads a fresh snapshot from its
    /// upstream.
    pub async fn force_reload(&self, name: &SourceName) -> IrrdResult<AdminResult> {
        let source = self.source(name)?;
        let importer = source
            .importer
            .as_ref()
            .ok_or_else(|| Error::SourceNotMirrored(name.clone()))?;
        let count = importer.force_reload().await?;
        info!("Reloaded source {name} from {}: {count} objects", importer.upstream());
        Ok(AdminResult {
            source: name.clone(),
            serial: source.journal.current_serial(),
            count,
        })
    }

    /// Replaces all objects of a source with the objects of a dump.
    ///
    /// The whole dump is rejected if any object cannot be parsed or
    /// belongs to another source.
    pub async fn load_dump(&self, name: &SourceName, dump: LoadDump) -> IrrdResult<AdminResult> {
        let source = self.source(name)?;

        let mut objects = Vec::new();
        let mut errors = Vec::new();
        for (idx, text) in rpsl::split_objects(&dump.objects).into_iter().enumerate() {
            match rpsl::parse(&text) {
                Ok(object) if object.source().as_ref() == Some(name) => objects.push(object),
                Ok(object) => errors.push(format!("object {} ({}) is not in source {name}", idx + 1, object.key())),
                Err(e) => errors.push(format!("object {}: {e}", idx + 1)),
            }
        }
        if !errors.is_empty() {
            return Err(Error::invalid_request(errors.join("; ")));
        }

        let _guard = source.submit_lock.lock().await;
        let count = source.journal.load_dump(objects, dump.serial).await?;
        info!("Loaded {count} objects into source {name}");
        Ok(AdminResult {
            source: name.clone(),
            serial: source.journal.current_serial(),
            count,
        })
    }

    /// Drops journal entries older than the retention of the source.
    pub async fn expire_journal(&self, name: &SourceName, expire: ExpireJournal) -> IrrdResult<AdminResult> {
        let source = self.source(name)?;
        let days = expire
            .retention_days
            .or(source.config.journal_retention_days)
            .ok_or_else(|| Error::invalid_request(format!("no journal retention configured for source {name}")))?;
        if days == 0 {
            return Err(Error::invalid_request("retention_days must be at least 1"));
        }

        let cutoff = Utc::now() - Duration::days(i64::from(days));
        let count = source.journal.expire(cutoff).await?;
        if count > 0 {
            info!("Expired {count} journal entries of source {name}");
        }
        Ok(AdminResult {
            source: name.clone(),
            serial: source.journal.current_serial(),
            count,
        })
    }

    /// Expires the journals of all sources with a configured retention.
    pub async fn expire_journals(&self) {
        for (name, source) in &self.sources {
            if source.config.journal_retention_days.is_none() {
                continue;
            }
            if let Err(e) = self.expire_journal(name, ExpireJournal::default()).await {
                error!("Could not expire journal of source {name}: {e}");
            }
        }
    }

    /// Sets the serial of an authoritative source.
    pub async fn set_serial(&self, name: &SourceName, set: SetSerial) -> IrrdResult<AdminResult> {
        let source = self.source(name)?;
        if !source.config.authoritative {
            return Err(Error::SourceNotAuthoritative(name.clone()));
        }
        let _guard = source.submit_lock.lock().await;
        source.journal.set_serial(set.serial).await?;
        info!("Set serial of source {name} to {}", set.serial);
        Ok(AdminResult {
            source: name.clone(),
            serial: source.journal.current_serial(),
            count: 0,
        })
    }

    /// Re-reads the configuration file and replaces the runtime
    /// configuration.
    ///
    /// Changes to sources, listeners and storage need a restart and are
    /// ignored with a warning.
    pub fn reload_config(&self) -> IrrdResult<ConfigReloaded> {
        let file = self
            .config_file
            .as_ref()
            .ok_or_else(|| Error::ConfigError("no configuration file to reload".to_string()))?;
        let file = file.to_string_lossy();
        let config = Config::read_config(&file).map_err(|e| Error::ConfigError(e.to_string()))?;
        config.verify().map_err(|e| Error::ConfigError(e.to_string()))?;

        if config.sources != self.config.sources || config.storage_uri != self.config.storage_uri {
            warn!("Changes to sources or storage in {file} take effect after a restart");
        }

        let mut runtime = self.runtime.write().unwrap_or_else(PoisonError::into_inner);
        let version = runtime.version() + 1;
        *runtime = Arc::new(RuntimeConfig::from_config(&config, version).map_err(|e| Error::ConfigError(e.to_string()))?);
        info!("Reloaded configuration from {file}, now at version {version}");
        Ok(ConfigReloaded { version })
    }
}

impl ExportRegistry for IrrdServer {
    fn export_journal(&self, source: &SourceName, peer: IpAddr) -> Result<JournalHandle, ProtocolError> {
        let managed = self
            .sources
            .get(source)
            .ok_or_else(|| ProtocolError::new(ErrorCode::UnknownSource, format!("unknown source {source}")))?;

        if !self.runtime().access().entry_for(peer).mirror_export {
            return Err(ProtocolError::new(ErrorCode::NotAuthorized, format!("{peer} may not mirror")));
        }
        if !managed.config.export {
            return Err(ProtocolError::new(
                ErrorCode::NotAuthorized,
                format!("source {source} is not exported"),
            ));
        }
        Ok(managed.journal.clone())
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::{fs, str::FromStr};

    use hyper::StatusCode;

    use super::*;

    use crate::commons::api::Outcome;
    use crate::journal::{JournalError, Serial};
    use crate::test;

    fn localhost() -> IpAddr {
        "127.0.0.1".parse().unwrap()
    }

    fn server_with(sources: Vec<SourceConfig>) -> IrrdServer {
        let config = Config::test(&test::mem_storage(), sources);
        IrrdServer::build(Arc::new(config), None).unwrap()
    }

    fn dump() -> String {
        format!(
            "{}\n{}\n{}",
            test::person_text("PERSON-TEST", "MNT-TEST"),
            test::mntner_text("MNT-TEST", &[test::MD5_PW_HASH]),
            test::route_text("192.0.2.0/24", 65001, "MNT-TEST")
        )
    }

    #[tokio::test]
    async fn load_dump_and_set_serial() {
        let name = test::source(test::TEST_SOURCE);
        let server = server_with(vec![SourceConfig::authoritative(name.clone())]);

        let res = server
            .load_dump(
                &name,
                LoadDump {
                    serial: Some(Serial::new(100)),
                    objects: dump(),
                },
            )
            .await
            .unwrap();
        assert_eq!(res.count, 3);
        assert_eq!(res.serial, Some(Serial::new(100)));

        let res = server.set_serial(&name, SetSerial { serial: Serial::new(200) }).await.unwrap();
        assert_eq!(res.serial, Some(Serial::new(200)));

        let err = server
            .load_dump(
                &name,
                LoadDump {
                    serial: Some(Serial::new(150)),
                    objects: dump(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Journal(JournalError::SerialNotIncreasing { .. })));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let res = server
            .load_dump(
                &name,
                LoadDump {
                    serial: None,
                    objects: dump(),
                },
            )
            .await
            .unwrap();
        assert_eq!(res.serial, Some(Serial::new(201)));

        let report = server.status(localhost(), false, None).unwrap();
        assert_eq!(report.config_version, 1);
        assert_eq!(report.sources[0].object_count, 3);

        let other = test::source("OTHER");
        assert!(matches!(
            server.set_serial(&other, SetSerial { serial: Serial::new(1) }).await,
            Err(Error::UnknownSource(_))
        ));
    }

    #[tokio::test]
    async fn load_dump_rejects_foreign_objects() {
        let name = test::source(test::TEST_SOURCE);
        let server = server_with(vec![SourceConfig::authoritative(name.clone())]);
        let objects = test::with_source(&test::route_text("192.0.2.0/24", 65001, "MNT-TEST"), "OTHER");
        let res = server.load_dump(&name, LoadDump { serial: None, objects }).await;
        assert!(matches!(res, Err(Error::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn submissions_go_to_authoritative_sources_only() {
        let name = test::source(test::TEST_SOURCE);
        let mirror = test::source("MIRROR");
        let server = server_with(vec![
            SourceConfig::authoritative(name.clone()),
            SourceConfig::mirror(mirror.clone(), "127.0.0.1:1"),
        ]);

        let objects = format!(
            "{}\n{}",
            dump(),
            test::with_source(&test::person_text("PERSON-MIRROR", "MNT-TEST"), "MIRROR")
        );
        let report = server
            .submit(SubmissionRequest {
                objects,
                passwords: vec![test::MD5_PW_PASSWORD.to_string()],
                ..Default::default()
            })
            .await
            .unwrap();

        let outcomes: Vec<_> = report.results().iter().map(|r| r.outcome.is_accepted()).collect();
        assert_eq!(outcomes, vec![true, true, true, false]);
        assert!(matches!(report.results()[3].outcome, Outcome::Rejected { .. }));
        assert!(matches!(
            server.set_serial(&mirror, SetSerial { serial: Serial::new(1) }).await,
            Err(Error::SourceNotAuthoritative(_))
        ));
        assert!(matches!(
            server.force_reload(&name).await,
            Err(Error::SourceNotMirrored(_))
        ));
    }

    #[tokio::test]
    async fn submissions_to_other_sources_are_not_blocked() {
        let busy = test::source("BUSY");
        let server = server_with(vec![
            SourceConfig::authoritative(busy.clone()),
            SourceConfig::authoritative(test::source(test::TEST_SOURCE)),
        ]);
        let request = |objects: String| SubmissionRequest {
            objects,
            passwords: vec![test::MD5_PW_PASSWORD.to_string()],
            ..Default::default()
        };
        let wait = std::time::Duration::from_secs(5);

        let held = server.sources[&busy].submit_lock.lock().await;

        let report = tokio::time::timeout(wait, server.submit(request(dump())))
            .await
            .expect("submission waited for another source")
            .unwrap();
        assert!(report.all_accepted(), "{report:?}");
        let journal = server.journal(&test::source(test::TEST_SOURCE)).unwrap();
        assert_eq!(journal.current_serial(), Some(Serial::new(3)));

        let blocked = server.submit(request(test::with_source(&dump(), "BUSY")));
        assert!(tokio::time::timeout(std::time::Duration::from_millis(100), blocked).await.is_err());

        drop(held);
        let report = tokio::time::timeout(wait, server.submit(request(test::with_source(&dump(), "BUSY"))))
            .await
            .expect("submission still blocked")
            .unwrap();
        assert!(report.all_accepted(), "{report:?}");
    }

    #[tokio::test]
    async fn queries_use_default_sources() {
        let mut config = Config::test(
            &test::mem_storage(),
            vec![
                SourceConfig::authoritative(test::source("FIRST")),
                SourceConfig::authoritative(test::source("SECOND")),
            ],
        );
        config.sources_default = vec![test::source("SECOND")];
        let server = IrrdServer::build(Arc::new(config), None).unwrap();

        let resolver = server.resolver(localhost(), false);
        let scope: Vec<_> = resolver.sources().cloned().collect();
        assert_eq!(scope, vec![test::source("SECOND")]);

        let resolver = resolver.with_sources(Some(&[test::source("FIRST")])).unwrap();
        let scope: Vec<_> = resolver.sources().cloned().collect();
        assert_eq!(scope, vec![test::source("FIRST")]);
        assert_eq!(server.status(localhost(), false, None).unwrap().sources.len(), 2);
    }

    #[tokio::test]
    async fn export_checks_access_and_source() {
        let name = test::source(test::TEST_SOURCE);
        let mut hidden = SourceConfig::authoritative(test::source("HIDDEN"));
        hidden.export = false;
        let server = server_with(vec![SourceConfig::authoritative(name.clone()), hidden]);

        assert!(server.export_journal(&name, localhost()).is_ok());

        let err = server.export_journal(&name, "192.0.2.1".parse().unwrap()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotAuthorized);

        let err = server
            .export_journal(&test::source("HIDDEN"), localhost())
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotAuthorized);

        let err = server
            .export_journal(&SourceName::from_str("NOPE").unwrap(), localhost())
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownSource);
    }

    #[tokio::test]
    async fn expire_needs_retention() {
        let name = test::source(test::TEST_SOURCE);
        let server = server_with(vec![SourceConfig::authoritative(name.clone())]);
        assert!(server.expire_journal(&name, ExpireJournal::default()).await.is_err());

        let res = server
            .expire_journal(&name, ExpireJournal { retention_days: Some(1) })
            .await
            .unwrap();
        assert_eq!(res.count, 0);
    }

    #[tokio::test]
    async fn reload_config_bumps_version() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("irrd.conf");
        let storage = test::mem_storage();
        fs::write(
            &file,
            format!(
                "storage_uri = \"{storage}\"\n\n[[sources]]\nname = \"TEST\"\nauthoritative = true\n\n[[access]]\nprefix = \"192.0.2.0/24\"\nmirror_export = true\n"
            ),
        )
        .unwrap();

        let config = Config::read_config(&file.to_string_lossy()).unwrap();
        let server = IrrdServer::build(Arc::new(config), Some(file.clone())).unwrap();
        let peer: IpAddr = "192.0.2.1".parse().unwrap();
        assert!(server.export_journal(&test::source("TEST"), peer).is_ok());

        fs::write(
            &file,
            format!("storage_uri = \"{storage}\"\n\n[[sources]]\nname = \"TEST\"\nauthoritative = true\n"),
        )
        .unwrap();
        assert_eq!(server.reload_config().unwrap().version, 2);
        assert!(server.export_journal(&test::source("TEST"), peer).is_err());
        assert_eq!(server.runtime().version(), 2);
    }
}
