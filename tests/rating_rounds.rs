//! Rating round integration tests

mod common;

use common::{create_test_service, sample_article, seed_confident_ratings, StubJudge};
use reader_core::error::JudgeError;
use reader_core::{ArticleId, Comparison, Outcome, ReaderStorage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Every article's comparisons must chain: the rating after one comparison
/// is the rating before the next.
async fn assert_audit_chain(storage: &dyn ReaderStorage, id: ArticleId) {
    let mut history: Vec<Comparison> = storage.comparisons_for_article(id).await.unwrap();
    history.sort_by_key(|c| c.id);
    for pair in history.windows(2) {
        let (_, after) = pair[0].ratings_for(id).unwrap();
        let (before, _) = pair[1].ratings_for(id).unwrap();
        assert!(
            (after - before).abs() < 1e-9,
            "article {}: comparison {} ended at {} but {} started at {}",
            id,
            pair[0].id,
            after,
            pair[1].id,
            before
        );
    }
    if let Some(last) = history.last() {
        let (_, after) = last.ratings_for(id).unwrap();
        let stored = storage.get_article(id).await.unwrap().elo_rating;
        assert!((after - stored).abs() < 1e-9);
    }
}

#[tokio::test]
async fn test_first_article_keeps_default_rating() {
    let judge = Arc::new(StubJudge::always(Outcome::AWins));
    let (service, storage, _dir) = create_test_service(judge.clone()).await;

    let report = service.ingest_and_rate(sample_article("Lonely")).await.unwrap();

    assert_eq!(report.final_rating, 1500.0);
    assert_eq!(report.comparisons, 0);
    assert!(!report.confident);
    assert_eq!(report.attempted, 0);
    assert!(storage
        .comparisons_for_article(report.article_id)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(judge.compare_calls(), 0);
}

#[tokio::test]
async fn test_winning_round_against_confident_pool() {
    let judge = Arc::new(StubJudge::always(Outcome::AWins));
    let (service, storage, _dir) = create_test_service(judge.clone()).await;
    let generation = service.active_generation().await.unwrap();
    let seeded =
        seed_confident_ratings(storage.as_ref(), generation.id, &[1500.0; 7], 7).await;

    let report = service.ingest_and_rate(sample_article("Winner")).await.unwrap();

    assert_eq!(report.completed, 7);
    assert_eq!(report.comparisons, 7);
    assert!(report.confident);
    assert!(report.final_rating > 1500.0);
    assert_eq!(report.generation_id, generation.id);

    let history = service.comparison_history(report.article_id).await.unwrap();
    assert_eq!(history.len(), 7);
    let mut previous = 1500.0;
    for comparison in &history {
        assert_eq!(comparison.article_a_id, report.article_id);
        assert_eq!(comparison.winner_id, Some(report.article_id));
        assert!(seeded.contains(&comparison.article_b_id));
        let (before, after) = comparison.ratings_for(report.article_id).unwrap();
        assert!((before - previous).abs() < 1e-9);
        assert!(after > before, "rating must rise on every win");
        previous = after;
    }
    assert_audit_chain(storage.as_ref(), report.article_id).await;

    // Losing a comparison never takes confidence away
    for id in seeded {
        let article = storage.get_article(id).await.unwrap();
        assert!(article.elo_confidence);
        assert!(article.elo_rating < 1500.0);
    }
}

#[tokio::test]
async fn test_second_article_bootstraps_against_first() {
    let judge = Arc::new(StubJudge::preferring("Good"));
    let (service, storage, _dir) = create_test_service(judge).await;

    let first = service.ingest_and_rate(sample_article("Meh")).await.unwrap();
    let second = service.ingest_and_rate(sample_article("Good read")).await.unwrap();

    assert_eq!(second.completed, 1);
    assert!((second.final_rating - 1516.0).abs() < 1e-9);
    let first = storage.get_article(first.article_id).await.unwrap();
    assert_eq!(first.elo_comparisons, 1);
    assert!((first.elo_rating - 1484.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_judge_failure_skips_and_round_resumes() {
    let failing = Arc::new(AtomicBool::new(true));
    let flag = failing.clone();
    let judge = Arc::new(StubJudge::new(move |_, b| {
        if flag.load(Ordering::SeqCst) && b.title == "Seeded 2" {
            Err(JudgeError::Unavailable("connection refused".to_string()))
        } else {
            Ok(Outcome::Tie)
        }
    }));
    let (service, storage, _dir) = create_test_service(judge.clone()).await;
    let generation = service.active_generation().await.unwrap();
    seed_confident_ratings(storage.as_ref(), generation.id, &[1500.0; 7], 7).await;

    let report = service.ingest_and_rate(sample_article("Flaky")).await.unwrap();
    assert_eq!(report.attempted, 7);
    assert_eq!(report.completed, 6);
    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].reason.contains("connection refused"));
    assert_eq!(report.comparisons, 6);
    assert!(!report.confident);

    failing.store(false, Ordering::SeqCst);
    let resumed = service.rate_article(report.article_id).await.unwrap();
    assert!(!resumed.fresh_start);
    assert_eq!(resumed.attempted, 1);
    assert_eq!(resumed.completed, 1);
    assert_eq!(resumed.comparisons, 7);
    assert!(resumed.confident);

    // Resuming never repeats an opponent
    let history = service.comparison_history(report.article_id).await.unwrap();
    let opponents: std::collections::HashSet<_> =
        history.iter().map(|c| c.article_b_id).collect();
    assert_eq!(opponents.len(), 7);
}

#[tokio::test]
async fn test_rerun_of_confident_article_does_nothing() {
    let judge = Arc::new(StubJudge::always(Outcome::Tie));
    let (service, storage, _dir) = create_test_service(judge.clone()).await;
    let generation = service.active_generation().await.unwrap();
    seed_confident_ratings(storage.as_ref(), generation.id, &[1500.0; 7], 7).await;

    let report = service.ingest_and_rate(sample_article("Once")).await.unwrap();
    let calls = judge.compare_calls();
    let again = service.rate_article(report.article_id).await.unwrap();

    assert_eq!(again.attempted, 0);
    assert_eq!(again.comparisons, 7);
    assert_eq!(judge.compare_calls(), calls);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_rounds_keep_audit_chain() {
    let judge = Arc::new(StubJudge::preferring("Sharp"));
    judge.set_compare_delay(Duration::from_millis(5));
    let (service, storage, _dir) = create_test_service(judge).await;
    let generation = service.active_generation().await.unwrap();
    let seeded = seed_confident_ratings(
        storage.as_ref(),
        generation.id,
        &[1450.0, 1480.0, 1500.0, 1500.0, 1520.0, 1550.0, 1600.0],
        7,
    )
    .await;

    let mut handles = Vec::new();
    let mut ids = Vec::new();
    for title in ["Sharp one", "Dull one", "Sharp two", "Dull two"] {
        let (id, handle) = service.ingest(sample_article(title)).await.unwrap();
        ids.push(id);
        handles.push(handle);
    }

    let reports = tokio::time::timeout(Duration::from_secs(30), async {
        let mut reports = Vec::new();
        for handle in handles {
            reports.push(handle.await.unwrap().unwrap());
        }
        reports
    })
    .await
    .expect("concurrent rounds deadlocked");

    for report in &reports {
        assert_eq!(report.completed, report.attempted);
    }
    for id in seeded.iter().chain(ids.iter()) {
        assert_audit_chain(storage.as_ref(), *id).await;
    }

    let ratings: HashMap<ArticleId, f64> = reports
        .iter()
        .map(|r| (r.article_id, r.final_rating))
        .collect();
    assert!(ratings[&ids[0]] > ratings[&ids[1]]);
}

#[tokio::test]
async fn test_rate_pending_picks_up_unrated_articles() {
    let judge = Arc::new(StubJudge::always(Outcome::Tie));
    let (service, storage, _dir) = create_test_service(judge).await;

    let a = storage.insert_article(&sample_article("Queued A")).await.unwrap();
    let b = storage.insert_article(&sample_article("Queued B")).await.unwrap();

    let reports = service.rate_pending().await.unwrap();

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].article_id, a);
    assert_eq!(reports[1].article_id, b);
    assert_eq!(reports[1].comparisons, 1);
    assert!(service.rate_pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_deleted_article_leaves_no_history() {
    let judge = Arc::new(StubJudge::always(Outcome::AWins));
    let (service, storage, _dir) = create_test_service(judge).await;

    let first = service.ingest_and_rate(sample_article("First")).await.unwrap();
    let second = service.ingest_and_rate(sample_article("Second")).await.unwrap();
    service.record_feedback(first.article_id, "loved it").await.unwrap();

    service.delete_article(first.article_id).await.unwrap();

    assert!(storage
        .comparisons_for_article(second.article_id)
        .await
        .unwrap()
        .is_empty());
    assert!(service.get_article(first.article_id).await.is_err());
}
