//! Options for administrative commands.

use crate::cli::client::{Error, IrrdClient};
use crate::cli::report::Report;
use crate::commons::api::{AdminResult, ConfigReloaded, ExpireJournal, LoadDump, SetSerial};
use crate::journal::Serial;

use super::submit::read_text;

//------------ Command -------------------------------------------------------

#[derive(clap::Subcommand)]
pub enum Command {
    /// Re-import a mirrored source from its upstream.
    Reload(Reload),

    /// Replace all objects of a source with those in a dump file.
    Load(Load),

    /// Remove journal entries older than the retention period.
    Expire(Expire),

    /// Set the serial of an authoritative source.
    SetSerial(SetSerialCmd),

    /// Re-read the configuration file.
    ConfigReload(ConfigReload),
}

impl Command {
    pub async fn run(self, client: &IrrdClient) -> Report {
        match self {
            Self::Reload(cmd) => cmd.run(client).await.into(),
            Self::Load(cmd) => cmd.run(client).await.into(),
            Self::Expire(cmd) => cmd.run(client).await.into(),
            Self::SetSerial(cmd) => cmd.run(client).await.into(),
            Self::ConfigReload(cmd) => cmd.run(client).await.into(),
        }
    }
}

//------------ Reload --------------------------------------------------------

#[derive(clap::Parser)]
pub struct Reload {
    source: String,
}

impl Reload {
    pub async fn run(self, client: &IrrdClient) -> Result<AdminResult, Error> {
        client.force_reload(&self.source).await
    }
}

//------------ Load ----------------------------------------------------------

#[derive(clap::Parser)]
pub struct Load {
    source: String,

    /// The dump file. Use - for stdin.
    file: String,

    /// The serial of the source after loading. Must be higher than the
    /// current serial, defaults to the next serial.
    #[arg(long)]
    serial: Option<Serial>,
}

impl Load {
    pub async fn run(self, client: &IrrdClient) -> Result<AdminResult, Error> {
        let dump = LoadDump {
            serial: self.serial,
            objects: read_text(&self.file)?,
        };
        client.load_dump(&self.source, &dump).await
    }
}

//------------ Expire --------------------------------------------------------

#[derive(clap::Parser)]
pub struct Expire {
    source: String,

    /// Keep entries this many days instead of the configured retention.
    #[arg(long)]
    days: Option<u32>,
}

impl Expire {
    pub async fn run(self, client: &IrrdClient) -> Result<AdminResult, Error> {
        let expire = ExpireJournal {
            retention_days: self.days,
        };
        client.expire_journal(&self.source, &expire).await
    }
}

//------------ SetSerialCmd --------------------------------------------------

#[derive(clap::Parser)]
pub struct SetSerialCmd {
    source: String,
    serial: Serial,
}

impl SetSerialCmd {
    pub async fn run(self, client: &IrrdClient) -> Result<AdminResult, Error> {
        client.set_serial(&self.source, &SetSerial { serial: self.serial }).await
    }
}

//------------ ConfigReload --------------------------------------------------

#[derive(clap::Parser)]
pub struct ConfigReload;

impl ConfigReload {
    pub async fn run(self, client: &IrrdClient) -> Result<ConfigReloaded, Error> {
        client.reload_config().await
    }
}
