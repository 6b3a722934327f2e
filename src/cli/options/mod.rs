//! The command line options of `irrdc`.

//------------ Sub-modules ---------------------------------------------------

mod admin;
mod query;
mod submit;

//------------ Content -------------------------------------------------------

use clap::Parser;
use url::Url;

use crate::commons::api::Token;
use crate::constants::{IRRD_CLI_API_ENV, IRRD_CLI_FORMAT_ENV, IRRD_CLI_SERVER_ENV, IRRD_CLI_TOKEN_ENV};

use super::client::IrrdClient;
use super::report::{Report, ReportFormat};

//------------ Options -------------------------------------------------------

/// The command line options for the registry client.
#[derive(clap::Parser)]
#[command(version, about = "The IRRd command line client.")]
pub struct Options {
    #[command(flatten)]
    pub general: GeneralOptions,

    #[command(subcommand)]
    pub command: Command,
}

impl Options {
    /// Creates the options from the process arguments.
    ///
    /// If the arguments won’t result in usable options, exits the process.
    pub fn from_args() -> Self {
        Self::parse()
    }
}

//------------ GeneralOptions ------------------------------------------------

/// The options common to all commands.
#[derive(clap::Args)]
pub struct GeneralOptions {
    /// The base URI of the registry server.
    #[arg(short, long, env = IRRD_CLI_SERVER_ENV, default_value = "http://localhost:8080/")]
    pub server: Url,

    /// The admin token, needed for admin commands only.
    #[arg(short, long, env = IRRD_CLI_TOKEN_ENV)]
    pub token: Option<Token>,

    /// Report format
    #[arg(short, long, env = IRRD_CLI_FORMAT_ENV, value_enum, default_value_t = ReportFormat::Text)]
    pub format: ReportFormat,

    /// Only show the API call and exit.
    #[arg(long, env = IRRD_CLI_API_ENV)]
    pub api: bool,
}

impl GeneralOptions {
    pub fn client(&self) -> Result<IrrdClient, super::Error> {
        IrrdClient::new(self.server.clone(), self.token.clone(), self.api)
    }
}

//------------ Command -------------------------------------------------------

#[derive(clap::Subcommand)]
pub enum Command {
    /// Show the status of the sources.
    Status(query::Status),

    /// Look up objects by key.
    Lookup(query::Lookup),

    /// Show the members of an as-set or route-set.
    Sets(query::Sets),

    /// Show the prefixes of route objects.
    #[command(subcommand)]
    Routes(query::Routes),

    /// Find objects by the value of an attribute.
    Inverse(query::Inverse),

    /// Find objects referencing an object.
    References(query::References),

    /// Search objects for a text.
    Text(query::Text),

    /// Show the template of an object class.
    Template(query::Template),

    /// Print all objects of a source.
    Dump(query::Dump),

    /// Submit objects for creation, modification or deletion.
    Submit(submit::Submit),

    /// Hash a password for use in a maintainer or the configuration.
    HashPassword(submit::HashPassword),

    /// Administrative commands, which need the admin token.
    #[command(subcommand)]
    Admin(admin::Command),
}

impl Command {
    pub async fn run(self, client: &IrrdClient) -> Report {
        match self {
            Self::Status(cmd) => cmd.run(client).await.into(),
            Self::Lookup(cmd) => cmd.run(client).await.into(),
            Self::Sets(cmd) => cmd.run(client).await.into(),
            Self::Routes(cmd) => cmd.run(client).await,
            Self::Inverse(cmd) => cmd.run(client).await.into(),
            Self::References(cmd) => cmd.run(client).await.into(),
            Self::Text(cmd) => cmd.run(client).await.into(),
            Self::Template(cmd) => cmd.run(client).await.into(),
            Self::Dump(cmd) => cmd.run(client).await.into(),
            Self::Submit(cmd) => cmd.run(client).await.into(),
            Self::HashPassword(cmd) => cmd.run().into(),
            Self::Admin(cmd) => cmd.run(client).await,
        }
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn verify_cli() {
        Options::command().debug_assert();
    }

    #[test]
    fn parse_general_options() {
        let options = Options::try_parse_from([
            "irrdc",
            "--server",
            "http://127.0.0.1:9000/",
            "--token",
            "secret",
            "--format",
            "json",
            "status",
        ])
        .unwrap();
        assert_eq!(options.general.server.as_str(), "http://127.0.0.1:9000/");
        assert_eq!(options.general.token, Some(Token::from("secret")));
        assert_eq!(options.general.format, ReportFormat::Json);
        assert!(matches!(options.command, Command::Status(_)));
    }
}
