//! Federation tests: push fan-out, pull import, peer browsing and the
//! message log.

mod common;

use appstore_engine::federation::DownloadKind;
use appstore_engine::models::{InboxNotice, MessageFilter, PullableQuery};
use appstore_engine::types::{DeployMode, MessageType};
use appstore_engine::{AppError, PullRequest, Release, ReleaseStatus};
use common::{alice, bob, Fixture, FlakyMessageLog};
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn targets(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

/// A second store publishing `name 1.0`, hosted through `fx`'s fake peers as `store-a`.
async fn remote_offer(fx: &Fixture, name: &str) -> (Fixture, Release) {
    let remote = Fixture::with_config(|config| config.store.store_id = "store-a".to_string());
    let release = remote.published(name, "1.0", &bob()).await;

    let files = &remote.state.files;
    let package = files.retrieve(&release.files.package).await.unwrap();
    let icon = files.retrieve(&release.files.icon).await.unwrap();
    fx.peers
        .host(&release.package_id, DownloadKind::Package, package.to_vec());
    fx.peers.host(&release.package_id, DownloadKind::Icon, icon.to_vec());

    for offer in remote
        .state
        .federation
        .local_offers(&PullableQuery::default())
        .await
        .unwrap()
    {
        fx.peers.offer("store-a", offer);
    }
    (remote, release)
}

#[tokio::test]
async fn push_reports_each_target_in_order() {
    let fx = Fixture::new();
    let owner = alice();
    let release = fx.published("Demo", "1.0", &owner).await;
    fx.peers.take_down("store-b");

    let results = fx
        .state
        .federation
        .push(&release.package_id, &targets(&["store-a", "store-b", "store-c"]))
        .await
        .unwrap();
    let outcome: Vec<_> = results.iter().map(|r| (r.store_id.as_str(), r.success)).collect();
    assert_eq!(
        outcome,
        [("store-a", true), ("store-b", false), ("store-c", true)]
    );
    assert!(results[1].reason.is_some());

    let notices = fx.peers.notices.lock().unwrap().clone();
    assert_eq!(notices.len(), 2);
    let (_, notice) = &notices[0];
    assert_eq!(notice.source_store_id, "store-local");
    assert!(notice
        .package_url
        .ends_with(&format!("/download-package/{}", release.package_id)));

    let log = fx.state.repo.push_log(&release.package_id).await.unwrap().unwrap();
    assert!(log.targets["store-a"].last_success);
    assert!(!log.targets["store-b"].last_success);
    assert_eq!(log.targets["store-c"].attempts, 1);

    let pushes = fx
        .state
        .federation
        .messages(&MessageFilter {
            message_type: Some(MessageType::Push),
            package_id: None,
        })
        .await
        .unwrap();
    assert_eq!(pushes.len(), 2);
}

#[tokio::test]
async fn untested_releases_are_never_sent() {
    let fx = Fixture::new();
    let release = fx.upload("Demo", "1.0", &alice()).await;

    let results = fx
        .state
        .federation
        .push(&release.package_id, &targets(&["store-a", "store-c"]))
        .await
        .unwrap();
    assert!(results.iter().all(|r| !r.success));
    assert!(fx.peers.notices.lock().unwrap().is_empty());
    assert!(fx.state.repo.push_log(&release.package_id).await.unwrap().is_none());
}

#[tokio::test]
async fn tested_but_unpublished_releases_are_not_announced() {
    let fx = Fixture::new();
    let release = fx.tested("Demo", "1.0", &alice()).await;
    assert_eq!(release.status, ReleaseStatus::TestSuccess);

    let results = fx
        .state
        .federation
        .push(&release.package_id, &targets(&["store-a"]))
        .await
        .unwrap();
    assert!(!results[0].success);
    assert!(fx.peers.notices.lock().unwrap().is_empty());
    assert!(fx.state.repo.push_log(&release.package_id).await.unwrap().is_none());
}

#[tokio::test]
async fn unknown_targets_fail_alone() {
    let fx = Fixture::new();
    let release = fx.published("Demo", "1.0", &alice()).await;

    let results = fx
        .state
        .federation
        .push(&release.package_id, &targets(&["nowhere", "store-a"]))
        .await
        .unwrap();
    assert!(!results[0].success);
    assert!(results[1].success);

    let err = fx
        .state
        .federation
        .push(&appstore_engine::PackageId::from("missing"), &targets(&["store-a"]))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn pull_imports_offer_as_fresh_upload() {
    let fx = Fixture::new();
    let (_remote, remote_release) = remote_offer(&fx, "Remote").await;
    let requester = alice();

    let offers = fx
        .state
        .federation
        .peer_offers("store-a", &PullableQuery::default(), &requester)
        .await
        .unwrap();
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0].source_store_id, "store-a");

    let release = fx
        .state
        .federation
        .pull(PullRequest {
            store_id: "store-a".to_string(),
            offer: offers[0].clone(),
            requester: requester.clone(),
        })
        .await
        .unwrap();
    assert_eq!(release.status, ReleaseStatus::Upload);
    assert_eq!(release.source_store.as_deref(), Some("store-a"));
    assert_ne!(release.package_id, remote_release.package_id);
    assert_eq!(release.files.package_checksum, remote_release.files.package_checksum);
    assert_eq!(release.owner, requester.as_owner());
    assert_eq!(release.details.industry, "telecom");
    assert_eq!(fx.staging_leftovers(), 0);

    let pulls = fx
        .state
        .federation
        .messages(&MessageFilter {
            message_type: Some(MessageType::Pull),
            package_id: Some(release.package_id.clone()),
        })
        .await
        .unwrap();
    assert_eq!(pulls.len(), 1);
    assert_eq!(pulls[0].source_store, "store-a");

    // The requester now owns a copy, so the offer disappears.
    let offers = fx
        .state
        .federation
        .peer_offers("store-a", &PullableQuery::default(), &requester)
        .await
        .unwrap();
    assert!(offers.is_empty());
}

#[tokio::test]
async fn failed_download_commits_nothing() {
    let fx = Fixture::new();
    let (_remote, remote_release) = remote_offer(&fx, "Remote").await;
    fx.peers
        .artifacts
        .lock()
        .unwrap()
        .remove(&(remote_release.package_id.to_string(), DownloadKind::Icon.route()));

    let offer = fx
        .state
        .federation
        .peer_offers("store-a", &PullableQuery::default(), &alice())
        .await
        .unwrap()
        .remove(0);
    let err = fx
        .state
        .federation
        .pull(PullRequest {
            store_id: "store-a".to_string(),
            offer,
            requester: alice(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::PeerUnavailable { .. }));
    assert!(fx.state.repo.list_releases().await.unwrap().is_empty());
    assert_eq!(fx.staging_leftovers(), 0);
}

#[tokio::test]
async fn unrecorded_pull_is_rolled_back() {
    let repo = Arc::new(FlakyMessageLog::default());
    let fx = Fixture::with_repo(repo.clone(), |_| {});
    let (_remote, _) = remote_offer(&fx, "Remote").await;
    let offer = fx
        .state
        .federation
        .peer_offers("store-a", &PullableQuery::default(), &alice())
        .await
        .unwrap()
        .remove(0);
    repo.down.store(true, Ordering::SeqCst);

    let err = fx
        .state
        .federation
        .pull(PullRequest {
            store_id: "store-a".to_string(),
            offer,
            requester: alice(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InternalError(_)));
    assert!(fx.state.repo.list_releases().await.unwrap().is_empty());
    assert!(fx.state.repo.find_app("Remote", "acme").await.unwrap().is_none());
    let stored = std::fs::read_dir(fx.data_dir().join("packages"))
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(stored, 0);
    assert_eq!(fx.staging_leftovers(), 0);
}

#[tokio::test]
async fn browsing_hides_what_is_already_published_here() {
    let fx = Fixture::new();
    let (_remote, _) = remote_offer(&fx, "Shared").await;
    let (_other, _) = remote_offer(&fx, "Fresh").await;
    fx.published("Shared", "1.0", &bob()).await;
    fx.peers.take_down("store-c");

    let listings = fx
        .state
        .federation
        .browse_peers(&PullableQuery::default(), &alice())
        .await
        .unwrap();
    assert_eq!(listings.len(), 3);

    let store_a = listings.iter().find(|l| l.store_id == "store-a").unwrap();
    let names: Vec<_> = store_a.offers.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(names, ["Fresh"]);
    assert!(store_a.error.is_none());

    let store_c = listings.iter().find(|l| l.store_id == "store-c").unwrap();
    assert!(store_c.error.is_some());
    assert!(store_c.offers.is_empty());
}

#[tokio::test]
async fn inbox_notices_are_logged() {
    let fx = Fixture::new();
    let notice = InboxNotice {
        source_store_id: "store-b".to_string(),
        source_store_name: "Store B".to_string(),
        package_id: "remote-1".into(),
        name: "Remote".to_string(),
        provider: "acme".to_string(),
        version: "3.1".to_string(),
        deploy_mode: DeployMode::Vm,
        checksum: "00".repeat(32),
        package_url: "http://b/download-package/remote-1".to_string(),
        icon_url: "http://b/download-icon/remote-1".to_string(),
        demo_url: None,
        description: String::new(),
    };

    let message = fx.state.federation.receive_notice(notice.clone()).await.unwrap();
    assert_eq!(message.message_type, MessageType::Notice);
    assert_eq!(message.source_store, "store-b");
    assert_eq!(message.target_store, "store-local");
    assert_eq!(message.description, "Store B offers Remote 3.1");

    // The same peer announcing the same package again is not logged twice.
    let repeated = fx.state.federation.receive_notice(notice.clone()).await.unwrap();
    assert_eq!(repeated.message_id, message.message_id);

    // Another peer announcing it is.
    let relayed = InboxNotice {
        source_store_id: "store-c".to_string(),
        ..notice
    };
    let other = fx.state.federation.receive_notice(relayed).await.unwrap();
    assert_ne!(other.message_id, message.message_id);

    let notices = fx
        .state
        .federation
        .messages(&MessageFilter {
            message_type: Some(MessageType::Notice),
            package_id: None,
        })
        .await
        .unwrap();
    assert_eq!(notices.len(), 2);
}

#[tokio::test]
async fn downloads_count_only_published_releases() {
    let fx = Fixture::new();
    let draft = fx.upload("Draft", "1.0", &alice()).await;
    let err = fx
        .state
        .federation
        .record_download(&draft.package_id, "store-b")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let release = fx.published("Demo", "1.0", &alice()).await;
    fx.state
        .federation
        .record_download(&release.package_id, "store-b")
        .await
        .unwrap();
    fx.state
        .federation
        .record_download(&release.package_id, "store-c")
        .await
        .unwrap();

    let app = fx.state.repo.get_app(&release.app_id).await.unwrap().unwrap();
    assert_eq!(app.download_count, 2);

    let pushable = fx.state.federation.pushable_packages().await.unwrap();
    assert_eq!(pushable.len(), 1);
    assert!(pushable[0].latest_push_time.is_none());
}
