//! Test the HTTP API through the client.

use irrd::cli::Error;
use irrd::cli::client::LookupResponse;
use irrd::commons::api::{ExpireJournal, LoadDump, Outcome, SetSerial, SubmissionRequest};
use irrd::daemon::config::SourceConfig;
use irrd::journal::Serial;
use irrd::test;

mod common;

fn sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig::authoritative(test::source("TEST")),
        SourceConfig::authoritative(test::source("OTHER")),
    ]
}

#[tokio::test]
async fn submit_and_query() {
    let server = common::TestServer::start(sources()).await;

    eprintln!(">>>> Create maintainer, person and route.");
    let report = server.submit(common::maintained_objects("TEST")).await;
    assert!(report.all_accepted(), "{report:?}");
    assert_eq!(server.serial("TEST"), Some(Serial::new(3)));

    eprintln!(">>>> A wrong password changes nothing.");
    let report = server
        .client
        .submit(&SubmissionRequest {
            objects: test::route_text("198.51.100.0/24", 65000, "MNT-TEST"),
            passwords: vec!["wrong".into()],
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(matches!(report.results()[0].outcome, Outcome::Denied { .. }));
    assert_eq!(server.serial("TEST"), Some(Serial::new(3)));

    eprintln!(">>>> Lookups.");
    match server.client.lookup("MNT-TEST", "exact", &[]).await.unwrap() {
        LookupResponse::Objects(list) => {
            assert_eq!(list.objects.len(), 1);
            assert!(list.objects[0].text.starts_with("mntner:"));
        }
        other => panic!("unexpected response {other:?}"),
    }

    let prefixes = server.client.routes_for_origin("AS65000", None, &[]).await.unwrap();
    assert_eq!(prefixes.prefixes, vec!["192.0.2.0/24".to_string()]);

    let prefixes = server.client.routes_for_origin("AS65000", Some("6"), &[]).await.unwrap();
    assert!(prefixes.prefixes.is_empty());

    let list = server.client.inverse("mnt-by", "MNT-TEST", &[]).await.unwrap();
    assert_eq!(list.objects.len(), 3);

    let list = server.client.references("person", "PERSON-TEST", &[]).await.unwrap();
    assert_eq!(list.objects.len(), 1);
    assert_eq!(list.objects[0].pk, "MNT-TEST");

    let list = server.client.route_search("192.0.2.0/25", "less-specific", &[]).await.unwrap();
    assert_eq!(list.objects.len(), 1);

    eprintln!(">>>> Status, dump and templates.");
    let status = server.client.status(&["TEST".into(), "NOPE".into()]).await.unwrap();
    assert_eq!(status.sources.len(), 1);
    assert_eq!(status.sources[0].serial, Some(Serial::new(3)));
    assert_eq!(status.sources[0].object_count, 3);
    assert_eq!(status.unknown_sources, vec!["NOPE".to_string()]);

    let dump = server.client.dump("TEST").await.unwrap();
    assert!(dump.contains("route:"));
    assert!(dump.contains("mntner:"));

    let template = server.client.template("route").await.unwrap();
    assert!(template.contains("origin:"));

    eprintln!(">>>> Queries limited to another source find nothing.");
    let list = server.client.inverse("mnt-by", "MNT-TEST", &["OTHER".into()]).await.unwrap();
    assert!(list.objects.is_empty());
}

#[tokio::test]
async fn unknown_source_and_bad_requests() {
    let server = common::TestServer::start(sources()).await;

    let err = server.client.dump("NOPE").await.unwrap_err();
    assert_eq!(err.label(), Some("registry-unknown-source"), "{err}");

    let err = server.client.route_search("not-a-prefix", "exact", &[]).await.unwrap_err();
    assert!(matches!(err, Error::ErrorResponseWithJson(_, status, _) if status.as_u16() == 400), "{err}");
}

#[tokio::test]
async fn admin_needs_token() {
    let server = common::TestServer::start(sources()).await;
    server.submit(common::maintained_objects("TEST")).await;

    let err = server
        .client
        .set_serial("TEST", &SetSerial { serial: Serial::new(10) })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Forbidden(..)), "{err}");
    assert_eq!(server.serial("TEST"), Some(Serial::new(3)));

    let res = server
        .admin
        .set_serial("TEST", &SetSerial { serial: Serial::new(10) })
        .await
        .unwrap();
    assert_eq!(res.serial, Some(Serial::new(10)));

    let report = server.submit(test::route_text("2001:db8::/32", 65000, "MNT-TEST")).await;
    assert_eq!(report.results()[0].outcome.serial(), Some(Serial::new(11)));

    let err = server.admin.expire_journal("TEST", &ExpireJournal::default()).await.unwrap_err();
    assert_eq!(err.label(), Some("api-invalid-request"), "{err}");

    let res = server
        .admin
        .expire_journal("TEST", &ExpireJournal { retention_days: Some(1) })
        .await
        .unwrap();
    assert_eq!(res.count, 0);
}

#[tokio::test]
async fn load_dump_replaces_source() {
    let server = common::TestServer::start(sources()).await;
    server.submit(common::maintained_objects("OTHER")).await;
    assert_eq!(server.object_count("OTHER"), 3);

    let objects = test::with_source(&test::mntner_text("MNT-LOADED", &[test::MD5_PW_HASH]), "OTHER");
    let res = server
        .admin
        .load_dump(
            "OTHER",
            &LoadDump {
                serial: Some(Serial::new(42)),
                objects,
            },
        )
        .await
        .unwrap();
    assert_eq!(res.count, 1);
    assert_eq!(res.serial, Some(Serial::new(42)));
    assert_eq!(server.object_count("OTHER"), 1);

    let err = server
        .admin
        .load_dump(
            "OTHER",
            &LoadDump {
                serial: None,
                objects: test::mntner_text("MNT-FOREIGN", &[test::MD5_PW_HASH]),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.label(), Some("api-invalid-request"), "{err}");
    assert_eq!(server.object_count("OTHER"), 1);
}
