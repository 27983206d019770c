//! Fixture and log transfer against a scripted `gsutil`.

use std::collections::BTreeMap;
use std::sync::Arc;

use vcr_core::fakes::{FakeRunner, RecordingNotifier};
use vcr_core::{
    ExecError, ExecRunner, Mode, RunOptions, Tester, TesterConfig, UploadLogsOptions, Version,
    VcrError,
};

fn config() -> TesterConfig {
    TesterConfig {
        cassette_bucket: "cassettes".to_string(),
        log_bucket: "logs".to_string(),
        major_release_branch: Some("FEATURE-BRANCH-major-release-6.0.0".to_string()),
        ..TesterConfig::default()
    }
}

async fn tester(fake: &Arc<FakeRunner>, notifier: Arc<RecordingNotifier>) -> Tester {
    let rnr: Arc<dyn ExecRunner> = fake.clone();
    let mut tester = Tester::new(BTreeMap::new(), config(), rnr)
        .await
        .unwrap()
        .with_notifier(notifier);
    tester.set_repo_path(Version::Ga, "tpg");
    tester.set_repo_path(Version::Beta, "tpgb");
    tester
}

fn gsutil_failure() -> ExecError {
    ExecError::NonZeroExit {
        command: "gsutil".to_string(),
        code: 1,
        output: "AccessDeniedException: 403".to_string(),
    }
}

#[tokio::test]
async fn fetch_layers_main_base_and_head_tracks() {
    let dir = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRunner::new(dir.path()));
    let notifier = RecordingNotifier::new();
    let mut tester = tester(&fake, notifier.clone()).await;

    let path = tester
        .fetch_cassettes(Version::Beta, "release-5.x", Some("auto-pr-123"))
        .await
        .unwrap();
    assert_eq!(path, dir.path().join("cassettes/beta"));
    assert!(path.is_dir());

    let sources: Vec<String> = fake
        .calls_to("gsutil")
        .iter()
        .map(|c| c.args[3].clone())
        .collect();
    assert_eq!(
        sources,
        vec![
            "gs://cassettes/beta/fixtures/*",
            "gs://cassettes/beta/refs/branches/release-5.x/fixtures/*",
            "gs://cassettes/beta/refs/heads/auto-pr-123/fixtures/*",
        ]
    );
    for call in fake.calls_to("gsutil") {
        assert_eq!(call.args[..3], ["-m", "-q", "cp"].map(String::from));
        assert_eq!(call.args[4], path.display().to_string());
    }
    assert!(notifier.failures().is_empty());
}

#[tokio::test]
async fn fetch_is_idempotent_and_skips_redundant_tracks() {
    let dir = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRunner::new(dir.path()));
    let mut tester = tester(&fake, RecordingNotifier::new()).await;

    tester.fetch_cassettes(Version::Ga, "main", None).await.unwrap();
    tester
        .fetch_cassettes(Version::Ga, "main", Some("auto-pr-1"))
        .await
        .unwrap();

    let calls = fake.calls_to("gsutil");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].args[3], "gs://cassettes/fixtures/*");
}

#[tokio::test]
async fn fetch_on_major_release_branch_skips_main_track() {
    let dir = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRunner::new(dir.path()));
    let mut tester = tester(&fake, RecordingNotifier::new()).await;

    tester
        .fetch_cassettes(Version::Ga, "FEATURE-BRANCH-major-release-6.0.0", None)
        .await
        .unwrap();

    let calls = fake.calls_to("gsutil");
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].args[3],
        "gs://cassettes/refs/branches/FEATURE-BRANCH-major-release-6.0.0/fixtures/*"
    );
}

#[tokio::test]
async fn fetch_failures_are_reported_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRunner::new(dir.path()).with_responder(|_| Err(gsutil_failure())));
    let notifier = RecordingNotifier::new();
    let mut tester = tester(&fake, notifier.clone()).await;

    let path = tester
        .fetch_cassettes(Version::Ga, "main", Some("auto-pr-9"))
        .await
        .unwrap();
    assert!(path.is_dir());
    let failures = notifier.failures();
    assert_eq!(failures.len(), 2);
    assert!(failures.iter().all(|(op, _)| op == "fetch cassettes"));
    assert!(failures[0].1.contains("AccessDeniedException"));
}

#[tokio::test]
async fn upload_logs_requires_a_prior_run() {
    let dir = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRunner::new(dir.path()));
    let tester = tester(&fake, RecordingNotifier::new()).await;

    let err = tester
        .upload_logs(&UploadLogsOptions::new(Mode::Recording, Version::Ga))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        VcrError::LogPathMissing {
            mode: Mode::Recording,
            version: Version::Ga
        }
    ));
    assert!(fake.calls().is_empty());
}

#[tokio::test]
async fn upload_logs_after_parallel_recording() {
    let dir = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRunner::new(dir.path()));
    let notifier = RecordingNotifier::new();
    let mut tester = tester(&fake, notifier.clone()).await;
    tester
        .run_parallel(
            RunOptions::new(Mode::Recording, Version::Beta)
                .with_test_dirs(vec!["./google-beta/services/compute".to_string()])
                .with_tests(vec!["TestAccComputeInstance_basic".to_string()]),
        )
        .await
        .unwrap();

    let opts = UploadLogsOptions {
        head: Some("auto-pr-77".to_string()),
        build_id: Some("build-42".to_string()),
        parallel: true,
        after_recording: true,
        ..UploadLogsOptions::new(Mode::Recording, Version::Beta)
    };
    tester.upload_logs(&opts).await.unwrap();

    let uploads = fake.calls_to("gsutil");
    assert_eq!(uploads.len(), 3);
    let prefix = "gs://logs/beta/refs/heads/auto-pr-77/artifacts/build-42/";
    let destinations: Vec<&str> = uploads
        .iter()
        .map(|c| c.args.last().map(String::as_str).unwrap_or_default())
        .collect();
    assert_eq!(
        destinations,
        vec![
            format!("{}build-log/recording_test_after_recording.log", prefix),
            format!("{}build-log/recording_build_after_recording/", prefix),
            format!("{}recording_after_recording/", prefix),
        ]
    );
    assert!(uploads
        .iter()
        .all(|c| c.args[..2] == ["-h", "Content-Type:text/plain"].map(String::from)));
    assert_eq!(
        uploads[0].args[5],
        dir.path().join("testlogs/recording_test.log").display().to_string()
    );
    assert!(notifier.diagnostics().is_empty());
}

#[tokio::test]
async fn failed_log_upload_dumps_local_logs() {
    let dir = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRunner::new(dir.path()).with_responder(|call| {
        if call.command == "gsutil" {
            Err(gsutil_failure())
        } else {
            Ok("--- PASS: TestAccComputeInstance_basic (1.00s)\n".to_string())
        }
    }));
    let notifier = RecordingNotifier::new();
    let mut tester = tester(&fake, notifier.clone()).await;
    tester.adopt_cassettes(Version::Ga).await.unwrap();
    tester
        .run(
            RunOptions::new(Mode::Replaying, Version::Ga)
                .with_test_dirs(vec!["./google/services/compute".to_string()]),
        )
        .await
        .unwrap();
    let log_dir = dir.path().join("testlogs/replaying/ga");
    std::fs::write(log_dir.join("TestAccComputeInstance_basic.log"), "debug").unwrap();
    std::fs::write(log_dir.join("all_tests.log"), "everything").unwrap();

    tester
        .upload_logs(&UploadLogsOptions::new(Mode::Replaying, Version::Ga))
        .await
        .unwrap();

    let ops: Vec<String> = notifier.failures().into_iter().map(|(op, _)| op).collect();
    assert_eq!(ops, vec!["upload build log", "upload logs"]);
    assert_eq!(
        notifier.diagnostics(),
        vec![(
            "TestAccComputeInstance_basic.log".to_string(),
            "debug".to_string()
        )]
    );
}

#[tokio::test]
async fn upload_cassettes_targets_head_track() {
    let dir = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRunner::new(dir.path()));
    let mut tester = tester(&fake, RecordingNotifier::new()).await;

    let err = tester
        .upload_cassettes("auto-pr-5", Version::Beta)
        .await
        .unwrap_err();
    assert!(matches!(err, VcrError::CassettesMissing(Version::Beta)));

    tester
        .run(
            RunOptions::new(Mode::Recording, Version::Beta)
                .with_test_dirs(vec!["./google-beta/services/compute".to_string()]),
        )
        .await
        .unwrap();
    tester
        .upload_cassettes("auto-pr-5", Version::Beta)
        .await
        .unwrap();

    let uploads = fake.calls_to("gsutil");
    assert_eq!(uploads.len(), 1);
    assert_eq!(
        uploads[0].args[3],
        dir.path().join("cassettes/beta/*").display().to_string()
    );
    assert_eq!(
        uploads[0].args[4],
        "gs://cassettes/beta/refs/heads/auto-pr-5/fixtures/"
    );
}

#[tokio::test]
async fn upload_cassettes_keeps_ga_under_its_version_dir() {
    let dir = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeRunner::new(dir.path()));
    let mut tester = tester(&fake, RecordingNotifier::new()).await;

    tester.adopt_cassettes(Version::Ga).await.unwrap();
    tester.upload_cassettes("auto-pr-1", Version::Ga).await.unwrap();

    let uploads = fake.calls_to("gsutil");
    assert_eq!(uploads.len(), 1);
    assert_eq!(
        uploads[0].args[3],
        dir.path().join("cassettes/ga/*").display().to_string()
    );
    assert_eq!(
        uploads[0].args[4],
        "gs://cassettes/ga/refs/heads/auto-pr-1/fixtures/"
    );
}
