//! Integration tests for CryptSync
//!
//! These tests drive the pair engine, the coordinator and the change
//! reconciler against real temporary folders.

use cryptsync_engine::{
    name_codec, ChangeReconciler, Decision, PairEngine, ProgressTracker, ReconcileOutcome,
    SkipReason, StartOutcome, SyncCoordinator, SyncRequest, Trigger,
};
use cryptsync_tests::test_utils::{
    fast_archive_codec, list_files, mtime_secs, write_file, PairFixture, RecordingCodec,
    SEALED_PREFIX,
};
use cryptsync_types::{
    CancelToken, CodecProgress, CompressionMode, ContentCodec, FailureKind, ProgressAction,
    SyncDirection, SyncErrorFlags,
};
use proptest::prelude::*;
use rstest::rstest;
use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const T1: i64 = 1_600_000_000;

fn engine(context: &Arc<cryptsync_engine::SyncContext>) -> PairEngine {
    PairEngine::new(Arc::clone(context), CancelToken::new(), ProgressTracker::new())
}

fn sealed(text: &str) -> String {
    format!("{}{}", String::from_utf8_lossy(SEALED_PREFIX), text)
}

#[test]
fn test_new_original_is_encrypted_with_its_mtime() {
    let fx = PairFixture::new();
    let mut pair = fx.pair("correct horse");
    pair.encrypt_names = true;
    write_file(&fx.original, "a.txt", "hello", T1);
    let context = fx.context(vec![pair.clone()], fast_archive_codec());

    let outcome = engine(&context).run(&pair);
    assert!(outcome.flags.is_empty());
    assert_eq!(outcome.stats.encrypted, 1);

    let files = list_files(&fx.encrypted);
    assert_eq!(files.len(), 1);
    assert_ne!(files[0], "a.txt.7z");
    let decoded = name_codec(&pair).decode(&files[0]);
    assert_eq!(decoded.plain, "a.txt");
    assert!(decoded.was_encrypted);

    let archive = fx.encrypted.join(&files[0]);
    assert_eq!(mtime_secs(&archive), T1);

    let restored = fx.scratch().join("restored.txt");
    let go = |_: &CodecProgress<'_>| ProgressAction::Continue;
    fast_archive_codec()
        .decrypt(&archive, &restored, "correct horse", &go)
        .unwrap();
    assert_eq!(fs::read_to_string(restored).unwrap(), "hello");
}

#[rstest]
#[case(false)]
#[case(true)]
fn test_second_pass_performs_no_actions(#[case] encrypt_names: bool) {
    let fx = PairFixture::new();
    let mut pair = fx.pair("pw");
    pair.encrypt_names = encrypt_names;
    pair.sync_deletions = true;
    for rel in ["Makefile", "a.b.c", "backup.7z", "docs/readme.txt"] {
        write_file(&fx.original, rel, rel, T1);
    }
    let context = fx.context(vec![pair.clone()], fast_archive_codec());
    let engine = engine(&context);

    let first = engine.run(&pair);
    assert!(first.flags.is_empty());
    assert_eq!(first.stats.encrypted, 4);
    let originals = list_files(&fx.original);
    let encrypted = list_files(&fx.encrypted);
    assert_eq!(encrypted.len(), 4);
    if !encrypt_names {
        assert_eq!(
            encrypted,
            vec!["Makefile.7z", "a.b.c.7z", "backup.7z.7z", "docs/readme.txt.7z"]
        );
    }

    for _ in 0..2 {
        let again = engine.run(&pair);
        assert!(again.flags.is_empty());
        assert_eq!(again.stats.actions(), 0);
        assert_eq!(again.stats.skipped, 4);
        assert_eq!(list_files(&fx.original), originals);
        assert_eq!(list_files(&fx.encrypted), encrypted);
    }
}

#[test]
fn test_empty_original_does_not_restore_or_delete() {
    let fx = PairFixture::new();
    let pair = fx.pair("pw");
    write_file(&fx.encrypted, "a.txt.7z", &sealed("hello"), T1);
    let codec = Arc::new(RecordingCodec::new());
    let context = fx.context(vec![pair.clone()], codec.clone());

    let outcome = engine(&context).run(&pair);
    assert!(outcome.flags.is_empty());
    assert_eq!(outcome.stats.skipped, 1);
    assert_eq!(outcome.stats.actions(), 0);
    assert!(codec.calls().is_empty());
    assert!(list_files(&fx.original).is_empty());
    assert_eq!(list_files(&fx.encrypted), vec!["a.txt.7z"]);
    assert!(context.failures().is_empty());
}

#[test]
fn test_empty_original_with_deletions_clears_encrypted_folder() {
    let fx = PairFixture::new();
    let mut pair = fx.pair("pw");
    pair.sync_deletions = true;
    write_file(&fx.encrypted, "a.txt.7z", &sealed("hello"), T1);
    write_file(&fx.encrypted, "sub/b.txt.7z", &sealed("world"), T1);
    let context = fx.context(vec![pair.clone()], Arc::new(RecordingCodec::new()));

    let outcome = engine(&context).run(&pair);
    assert_eq!(outcome.stats.deleted, 2);
    assert!(list_files(&fx.encrypted).is_empty());
}

#[rstest]
#[case(true, 0)]
#[case(false, 1)]
fn test_fat_tolerance_treats_one_second_as_equal(#[case] fat: bool, #[case] encrypted: u64) {
    let fx = PairFixture::new();
    let mut pair = fx.pair("pw");
    pair.fat_time_tolerance = fat;
    write_file(&fx.original, "a.txt", "hello", T1);
    write_file(&fx.encrypted, "a.txt.7z", &sealed("hello"), T1 - 1);
    let codec = Arc::new(RecordingCodec::new());
    let context = fx.context(vec![pair.clone()], codec.clone());

    let outcome = engine(&context).run(&pair);
    assert_eq!(outcome.stats.encrypted, encrypted);
    assert_eq!(outcome.stats.skipped, 1 - encrypted);
    assert_eq!(codec.calls().len() as u64, encrypted);
}

#[test]
fn test_crypt_only_files_are_stored_uncompressed() {
    let fx = PairFixture::new();
    let mut pair = fx.pair("pw");
    pair.sync_direction = SyncDirection::SrcToDst;
    pair.filters.crypt_only = "secret*".to_string();
    write_file(&fx.original, "secret.txt", "s3cr3t", T1);
    let codec = Arc::new(RecordingCodec::new());
    let context = fx.context(vec![pair.clone()], codec.clone());

    let outcome = engine(&context).run(&pair);
    assert_eq!(outcome.stats.encrypted, 1);
    assert_eq!(codec.encrypt_modes(), vec![CompressionMode::Store]);

    write_file(&fx.original, "plain.txt", "text", T1);
    engine(&context).run(&pair);
    assert_eq!(
        codec.encrypt_modes(),
        vec![CompressionMode::Store, CompressionMode::Compress]
    );
}

#[test]
fn test_copy_only_file_is_copied_verbatim() {
    let fx = PairFixture::new();
    let mut pair = fx.pair("pw");
    pair.encrypt_names = true;
    pair.filters.copy_only = "readme.txt".to_string();
    write_file(&fx.original, "readme.txt", "read me", T1);
    let codec = Arc::new(RecordingCodec::new());
    let context = fx.context(vec![pair.clone()], codec.clone());

    let outcome = engine(&context).run(&pair);
    assert!(outcome.flags.is_empty());
    assert_eq!(outcome.stats.copied, 1);
    assert!(codec.calls().is_empty());
    assert_eq!(list_files(&fx.encrypted), vec!["readme.txt"]);
    assert_eq!(
        fs::read_to_string(fx.encrypted.join("readme.txt")).unwrap(),
        "read me"
    );
    assert_eq!(mtime_secs(&fx.encrypted.join("readme.txt")), T1);

    let again = engine(&context).run(&pair);
    assert_eq!(again.stats.actions(), 0);
}

#[test]
fn test_failed_encryption_leaves_both_sides_intact() {
    let fx = PairFixture::new();
    let pair = fx.pair("pw");
    let source = write_file(&fx.original, "a.txt", "new contents", T1 + 100);
    write_file(&fx.encrypted, "a.txt.7z", &sealed("old contents"), T1);
    let context = fx.context(vec![pair.clone()], Arc::new(RecordingCodec::failing()));

    let outcome = engine(&context).run(&pair);
    assert!(outcome.flags.contains(SyncErrorFlags::CRYPTO_ERROR));
    assert_eq!(outcome.stats.failed, 1);

    assert_eq!(fs::read_to_string(&source).unwrap(), "new contents");
    assert_eq!(list_files(&fx.encrypted), vec!["a.txt.7z"]);
    assert_eq!(
        fs::read_to_string(fx.encrypted.join("a.txt.7z")).unwrap(),
        sealed("old contents")
    );
    assert_eq!(context.failures().get(&source), Some(FailureKind::Encrypt));
}

#[test]
fn test_one_failure_does_not_stop_the_pass() {
    let fx = PairFixture::new();
    let mut pair = fx.pair("pw");
    pair.filters.copy_only = "*.md".to_string();
    write_file(&fx.original, "a.txt", "a", T1);
    write_file(&fx.original, "b.md", "b", T1);
    let context = fx.context(vec![pair.clone()], Arc::new(RecordingCodec::failing()));

    let outcome = engine(&context).run(&pair);
    assert!(outcome.flags.contains(SyncErrorFlags::CRYPTO_ERROR));
    assert_eq!(outcome.stats.failed, 1);
    assert_eq!(outcome.stats.copied, 1);
    assert_eq!(list_files(&fx.encrypted), vec!["b.md"]);
}

#[test]
fn test_no_sync_wins_over_copy_only() {
    let fx = PairFixture::new();
    let mut pair = fx.pair("pw");
    pair.filters.no_sync = "*.log".to_string();
    pair.filters.copy_only = "*.log".to_string();
    write_file(&fx.original, "build.log", "log", T1);
    write_file(&fx.original, "notes.bak", "bak", T1);
    write_file(&fx.original, "keep.txt", "keep", T1);
    let codec = Arc::new(RecordingCodec::new());
    let context = fx.context(vec![pair.clone()], codec.clone());
    context.set_ignore_patterns("*.bak");

    let outcome = engine(&context).run(&pair);
    assert_eq!(outcome.stats.copied, 0);
    assert_eq!(outcome.stats.encrypted, 1);
    assert_eq!(list_files(&fx.encrypted), vec!["keep.txt.7z"]);
}

#[test]
fn test_missing_root_does_not_block_other_pairs() {
    let fx = PairFixture::new();
    let broken = cryptsync_config::SyncPair::new(
        fx.scratch().join("missing"),
        fx.scratch().join("missing-crypt"),
        "pw",
    );
    let good = fx.pair("pw");
    write_file(&fx.original, "a.txt", "a", T1);
    let context = fx.context(vec![broken, good], Arc::new(RecordingCodec::new()));
    let coordinator = SyncCoordinator::new(context);

    let outcome = coordinator.run_blocking().unwrap();
    assert!(outcome.flags.contains(SyncErrorFlags::ACCESS_DENIED));
    assert_eq!(outcome.stats.encrypted, 1);
    assert_eq!(outcome.trigger, Trigger::Interactive);
    assert!(!fx.scratch().join("missing-crypt").exists());
}

#[test]
fn test_interactive_request_preempts_background_pass() {
    let fx = PairFixture::new();
    let pair = fx.pair("pw");
    for i in 0..5 {
        write_file(&fx.original, &format!("f{}.txt", i), "x", T1);
    }
    let codec = Arc::new(RecordingCodec::with_delay(Duration::from_millis(200)));
    let context = fx.context(vec![pair], codec);
    let coordinator = SyncCoordinator::new(context);

    assert_eq!(
        coordinator.start(SyncRequest::background()).unwrap(),
        StartOutcome::Started
    );
    assert_eq!(
        coordinator.start(SyncRequest::background()).unwrap(),
        StartOutcome::Dropped
    );
    assert_eq!(coordinator.running_trigger(), Some(Trigger::Background));

    assert_eq!(
        coordinator.start(SyncRequest::interactive()).unwrap(),
        StartOutcome::Restarted
    );
    assert_eq!(coordinator.running_trigger(), Some(Trigger::Interactive));
    assert_eq!(
        coordinator.start(SyncRequest::interactive()).unwrap(),
        StartOutcome::AlreadyRunning
    );
    assert_eq!(
        coordinator.start(SyncRequest::background()).unwrap(),
        StartOutcome::Dropped
    );

    let outcome = coordinator.wait(None).unwrap();
    assert_eq!(outcome.trigger, Trigger::Interactive);
    assert!(outcome.flags.is_empty());
    assert_eq!(outcome.stats.encrypted + outcome.stats.skipped, 5);
    assert_eq!(list_files(&fx.encrypted).len(), 5);
    assert!(!coordinator.is_running());
}

#[test]
fn test_stop_cancels_mid_file_without_leftovers() {
    let fx = PairFixture::new();
    let pair = fx.pair("pw");
    for i in 0..5 {
        write_file(&fx.original, &format!("f{}.txt", i), "x", T1);
    }
    let codec = Arc::new(RecordingCodec::with_delay(Duration::from_secs(5)));
    let context = fx.context(vec![pair], codec);
    let coordinator = SyncCoordinator::new(context);

    coordinator.start(SyncRequest::interactive()).unwrap();
    thread::sleep(Duration::from_millis(100));
    coordinator.stop();

    let outcome = coordinator.wait(Some(Duration::from_secs(10))).unwrap();
    assert!(outcome.flags.contains(SyncErrorFlags::CANCELLED));
    assert_eq!(outcome.stats.encrypted, 0);
    assert!(outcome.failures.is_empty());
    assert!(list_files(&fx.encrypted).is_empty());
    assert!(coordinator.current_pair().is_none());
}

#[test]
fn test_reconciler_handles_single_changes() {
    let fx = PairFixture::new();
    let pair = fx.pair("pw");
    fs::create_dir_all(&fx.encrypted).unwrap();
    let codec = Arc::new(RecordingCodec::new());
    let context = fx.context(vec![pair], codec);
    let reconciler = ChangeReconciler::new(Arc::clone(&context));

    let source = write_file(&fx.original, "docs/a.txt", "hello", T1);
    assert!(matches!(
        reconciler.handle(&source),
        ReconcileOutcome::Handled(Decision::Encrypt { .. })
    ));
    let archive = fx.encrypted.join("docs/a.txt.7z");
    assert_eq!(fs::read_to_string(&archive).unwrap(), sealed("hello"));

    // The engine's own write comes back once as a notification
    assert_eq!(reconciler.handle(&archive), ReconcileOutcome::Suppressed);
    assert_eq!(
        reconciler.handle(&archive),
        ReconcileOutcome::Handled(Decision::Skip(SkipReason::UpToDate))
    );

    assert_eq!(
        reconciler.handle(&fx.original.join("docs")),
        ReconcileOutcome::Skipped
    );
    assert_eq!(
        reconciler.handle(&fx.scratch().join("elsewhere.txt")),
        ReconcileOutcome::Unowned
    );
}

#[test]
fn test_reconciler_restores_edit_made_in_encrypted_folder() {
    let fx = PairFixture::new();
    let pair = fx.pair("pw");
    write_file(&fx.original, "a.txt", "old", T1);
    let archive = write_file(&fx.encrypted, "a.txt.7z", &sealed("edited"), T1 + 60);
    let context = fx.context(vec![pair], Arc::new(RecordingCodec::new()));
    let reconciler = ChangeReconciler::new(context);

    assert_eq!(
        reconciler.handle(&archive),
        ReconcileOutcome::Handled(Decision::Decrypt)
    );
    assert_eq!(
        fs::read_to_string(fx.original.join("a.txt")).unwrap(),
        "edited"
    );
    assert_eq!(mtime_secs(&fx.original.join("a.txt")), T1 + 60);
}

#[test]
fn test_reconciler_requeues_while_pair_is_scanned() {
    let fx = PairFixture::new();
    let pair = fx.pair("pw");
    for i in 0..5 {
        write_file(&fx.original, &format!("f{}.txt", i), "x", T1);
    }
    let codec = Arc::new(RecordingCodec::with_delay(Duration::from_millis(300)));
    let context = fx.context(vec![pair], codec);
    let coordinator = SyncCoordinator::new(Arc::clone(&context));
    let reconciler = ChangeReconciler::new(Arc::clone(&context));

    coordinator.start(SyncRequest::background()).unwrap();
    thread::sleep(Duration::from_millis(100));
    let changed = fx.original.join("f4.txt");
    let requeued = reconciler.handle_all(vec![changed.clone()]);
    assert_eq!(requeued, vec![changed]);

    coordinator.stop();
    coordinator.wait(None);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_encrypted_names_restore_to_the_same_file(
        name in "[a-zA-Z0-9_-]{1,12}\\.txt",
        compact in any::<bool>(),
        contents in "[ -~]{0,64}",
    ) {
        let fx = PairFixture::new();
        let mut pair = fx.pair("pw");
        pair.encrypt_names = true;
        pair.encrypt_names_new_scheme = compact;
        write_file(&fx.original, &name, &contents, T1);
        let context = fx.context(vec![pair.clone()], Arc::new(RecordingCodec::new()));

        let first = engine(&context).run(&pair);
        prop_assert_eq!(first.stats.encrypted, 1);

        fs::remove_file(fx.original.join(&name)).unwrap();
        pair.sync_direction = SyncDirection::DstToSrc;
        let restored = engine(&context).run(&pair);
        prop_assert_eq!(restored.stats.decrypted, 1);
        prop_assert_eq!(list_files(&fx.original), vec![name.clone()]);
        prop_assert_eq!(fs::read_to_string(fx.original.join(&name)).unwrap(), contents);
    }
}
