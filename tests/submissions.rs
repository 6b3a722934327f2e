//! Test concurrent submissions and set expansion over the API.

use futures_util::future::join_all;

use irrd::daemon::config::SourceConfig;
use irrd::journal::Serial;
use irrd::test;

mod common;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submissions_get_unique_serials() {
    let server = common::TestServer::start(vec![
        SourceConfig::authoritative(test::source("TEST")),
        SourceConfig::authoritative(test::source("OTHER")),
    ])
    .await;
    for source in ["TEST", "OTHER"] {
        let report = server.submit(common::maintained_objects(source)).await;
        assert!(report.all_accepted(), "{report:?}");
    }

    let submissions = (0..10u8).flat_map(|i| {
        ["TEST", "OTHER"].map(|source| {
            let route = test::route_text(&format!("10.{i}.0.0/16"), 65000, "MNT-TEST");
            server.submit(test::with_source(&route, source))
        })
    });
    let reports = join_all(submissions).await;

    for source in ["TEST", "OTHER"] {
        let mut serials: Vec<u64> = reports
            .iter()
            .flat_map(|r| r.results())
            .filter(|r| r.source.as_ref().map(ToString::to_string).as_deref() == Some(source))
            .map(|r| r.outcome.serial().expect("accepted").into_u64())
            .collect();
        serials.sort_unstable();
        assert_eq!(serials, (4..=13).collect::<Vec<_>>(), "serials of {source}");
        assert_eq!(server.serial(source), Some(Serial::new(13)));
        assert_eq!(server.object_count(source), 13);
    }
}

#[tokio::test]
async fn cyclic_sets_expand() {
    let server = common::TestServer::start(vec![SourceConfig::authoritative(test::source("TEST"))]).await;
    server.submit(common::maintained_objects("TEST")).await;

    let sets = [
        test::as_set_text("AS-ONE", &["AS65001", "AS-TWO"], "MNT-TEST"),
        test::as_set_text("AS-TWO", &["AS65002", "AS-ONE"], "MNT-TEST"),
        test::route_text("198.51.100.0/24", 65001, "MNT-TEST"),
        test::route_text("203.0.113.0/24", 65002, "MNT-TEST"),
    ]
    .join("\n");
    let report = server.submit(sets).await;
    assert!(report.all_accepted(), "{report:?}");

    let direct = server.client.set_members("AS-ONE", false, &[]).await.unwrap();
    assert_eq!(direct.members, vec!["AS65001".to_string(), "AS-TWO".to_string()]);

    let mut members = server.client.set_members("AS-ONE", true, &[]).await.unwrap();
    members.members.sort();
    assert_eq!(members.members, vec!["AS65001".to_string(), "AS65002".to_string()]);
    assert!(!members.truncated);

    let mut prefixes = server.client.routes_for_as_set("AS-TWO", Some("4"), &[]).await.unwrap();
    prefixes.prefixes.sort();
    assert_eq!(
        prefixes.prefixes,
        vec!["198.51.100.0/24".to_string(), "203.0.113.0/24".to_string()]
    );
}
