//! Formatting of API responses for the user.

use std::fmt::Write;
use std::process::ExitCode;

use serde::Serialize;

use crate::commons::api::{
    AdminResult, ConfigReloaded, ObjectList, PrefixList, SetMembers, StatusReport, SubmissionReport,
};

use super::client::{Error, LookupResponse};

//------------ ApiResponse ---------------------------------------------------

/// All responses `irrdc` knows how to report.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ApiResponse {
    Status(StatusReport),
    Objects(ObjectList),
    Members(SetMembers),
    Prefixes(PrefixList),
    Submission(SubmissionReport),
    Admin(AdminResult),
    ConfigReloaded(ConfigReloaded),

    /// Plain text such as a template, a dump or a password hash.
    Text(String),
}

impl ApiResponse {
    pub fn report(&self, format: ReportFormat) -> String {
        match format {
            ReportFormat::Json => match self {
                ApiResponse::Status(status) => json(status),
                ApiResponse::Objects(list) => json(list),
                ApiResponse::Members(members) => json(members),
                ApiResponse::Prefixes(prefixes) => json(prefixes),
                ApiResponse::Submission(report) => json(report),
                ApiResponse::Admin(result) => json(result),
                ApiResponse::ConfigReloaded(reloaded) => json(reloaded),
                ApiResponse::Text(text) => json(text),
            },
            ReportFormat::Text => match self {
                ApiResponse::Status(status) => status.text(),
                ApiResponse::Objects(list) => list.text(),
                ApiResponse::Members(members) => members.text(),
                ApiResponse::Prefixes(prefixes) => prefixes.text(),
                ApiResponse::Submission(report) => report.text(),
                ApiResponse::Admin(result) => result.text(),
                ApiResponse::ConfigReloaded(reloaded) => format!("Configuration version: {}", reloaded.version),
                ApiResponse::Text(text) => text.trim_end().to_string(),
            },
        }
    }

    /// Returns whether the response signals success.
    ///
    /// A submission in which any object was not accepted is a failure.
    pub fn is_success(&self) -> bool {
        match self {
            ApiResponse::Submission(report) => report.all_accepted(),
            _ => true,
        }
    }
}

macro_rules! from_response {
    ( $( $variant:ident($ty:ty) ),* ) => {
        $(
            impl From<$ty> for ApiResponse {
                fn from(src: $ty) -> Self {
                    ApiResponse::$variant(src)
                }
            }
        )*
    };
}

from_response!(
    Status(StatusReport),
    Objects(ObjectList),
    Members(SetMembers),
    Prefixes(PrefixList),
    Submission(SubmissionReport),
    Admin(AdminResult),
    ConfigReloaded(ConfigReloaded),
    Text(String)
);

impl From<LookupResponse> for ApiResponse {
    fn from(src: LookupResponse) -> Self {
        match src {
            LookupResponse::Objects(list) => ApiResponse::Objects(list),
            LookupResponse::Members(members) => ApiResponse::Members(members),
        }
    }
}

fn json(value: &impl Serialize) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("cannot serialize response: {e}"))
}

//------------ ReportFormat --------------------------------------------------

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, clap::ValueEnum)]
pub enum ReportFormat {
    Json,
    #[default]
    Text,
}

//------------ Report --------------------------------------------------------

/// The outcome of a command, ready to be shown to the user.
pub struct Report {
    content: Result<ApiResponse, Error>,
}

impl Report {
    pub fn new(content: Result<ApiResponse, Error>) -> Self {
        Report { content }
    }

    pub fn content(&self) -> &Result<ApiResponse, Error> {
        &self.content
    }

    /// Prints the report and returns the exit code for the process.
    pub fn report(self, format: ReportFormat) -> ExitCode {
        match self.content {
            Ok(response) => {
                println!("{}", response.report(format));
                if response.is_success() {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::FAILURE
                }
            }
            Err(err) => {
                eprintln!("Error: {err}");
                ExitCode::FAILURE
            }
        }
    }
}

impl<T: Into<ApiResponse>> From<Result<T, Error>> for Report {
    fn from(res: Result<T, Error>) -> Self {
        Report::new(res.map(Into::into))
    }
}

//------------ TextReport ----------------------------------------------------

/// Types that have a human readable representation.
trait TextReport {
    fn text(&self) -> String;
}

impl TextReport for StatusReport {
    fn text(&self) -> String {
        let mut res = String::new();
        let _ = writeln!(res, "Configuration version: {}", self.config_version);
        for source in &self.sources {
            let _ = writeln!(res);
            let _ = writeln!(res, "Source: {}", source.source);
            let kind = if source.authoritative { "authoritative" } else { "mirror" };
            let _ = writeln!(res, "  Type:     {kind}");
            let _ = writeln!(res, "  Serial:   {}", opt(source.serial));
            let _ = writeln!(
                res,
                "  Journal:  {} - {}",
                opt(source.oldest_journal_serial),
                opt(source.newest_journal_serial)
            );
            let _ = writeln!(res, "  Objects:  {}", source.object_count);
            let _ = writeln!(res, "  Updated:  {}", opt(source.last_update.map(|t| t.to_rfc3339())));
            if let Some(upstream) = &source.upstream {
                let _ = writeln!(res, "  Upstream: {upstream} (serial {})", opt(source.upstream_serial));
                let _ = writeln!(res, "  Imported: {}", opt(source.last_import.map(|t| t.to_rfc3339())));
            }
            if let Some(err) = &source.last_import_error {
                let _ = writeln!(res, "  Error:    {err}");
            }
        }
        for unknown in &self.unknown_sources {
            let _ = writeln!(res, "\nUnknown source: {unknown}");
        }
        res.trim_end().to_string()
    }
}

impl TextReport for ObjectList {
    fn text(&self) -> String {
        if self.objects.is_empty() {
            return "No entries found.".to_string();
        }
        let texts: Vec<&str> = self.objects.iter().map(|o| o.text.trim_end()).collect();
        texts.join("\n\n")
    }
}

impl TextReport for SetMembers {
    fn text(&self) -> String {
        let mut res = self.members.join("\n");
        if self.truncated {
            res.push_str("\n(truncated)");
        }
        res
    }
}

impl TextReport for PrefixList {
    fn text(&self) -> String {
        self.prefixes.join("\n")
    }
}

impl TextReport for SubmissionReport {
    fn text(&self) -> String {
        let mut res = String::new();
        for result in self.results() {
            let change = result.change.map(|c| c.to_string()).unwrap_or_else(|| "submit".into());
            let object = result.object.as_deref().unwrap_or("<unparseable object>");
            match &result.source {
                Some(source) => {
                    let _ = writeln!(res, "{change} {object} ({source}): {}", result.outcome);
                }
                None => {
                    let _ = writeln!(res, "{change} {object}: {}", result.outcome);
                }
            }
            for warning in &result.warnings {
                let _ = writeln!(res, "  warning: {warning}");
            }
        }
        res.trim_end().to_string()
    }
}

impl TextReport for AdminResult {
    fn text(&self) -> String {
        format!("Source: {}\nSerial: {}\nCount:  {}", self.source, opt(self.serial), self.count)
    }
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".into())
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commons::api::{ChangeType, ObjectResult, Outcome};
    use crate::journal::Serial;
    use crate::test;

    #[test]
    fn submission_text_and_success() {
        let report = SubmissionReport::new(vec![
            ObjectResult {
                object: Some("mntner/TEST-MNT".into()),
                source: Some(test::source("TEST")),
                change: Some(ChangeType::Create),
                outcome: Outcome::Accepted { serial: Serial::new(4) },
                warnings: vec![],
            },
            ObjectResult {
                object: Some("person/PERSON-TEST".into()),
                source: Some(test::source("TEST")),
                change: Some(ChangeType::Modify),
                outcome: Outcome::Denied {
                    reason: "no valid credentials".into(),
                },
                warnings: vec!["unknown attribute".into()],
            },
        ]);

        let response = ApiResponse::from(report);
        assert!(!response.is_success());
        assert_eq!(
            response.report(ReportFormat::Text),
            "create mntner/TEST-MNT (TEST): accepted (serial 4)\n\
             modify person/PERSON-TEST (TEST): denied (no valid credentials)\n  \
             warning: unknown attribute"
        );
    }

    #[test]
    fn members_text_marks_truncation() {
        let members = SetMembers {
            name: "AS-TEST".into(),
            members: vec!["AS65001".into(), "AS65002".into()],
            truncated: true,
        };
        assert_eq!(ApiResponse::from(members).report(ReportFormat::Text), "AS65001\nAS65002\n(truncated)");
    }

    #[test]
    fn empty_object_list() {
        let list = ObjectList::default();
        assert_eq!(ApiResponse::from(list.clone()).report(ReportFormat::Text), "No entries found.");
        assert_eq!(ApiResponse::from(list).report(ReportFormat::Json), "{\n  \"objects\": []\n}");
    }
}
