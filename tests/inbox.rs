//! Ranking, percentile and inbox filtering tests

mod common;

use common::{create_test_service, sample_article, seed_confident_ratings, StubJudge};
use reader_core::{GenerationFilter, GenerationId, InboxQuery, Outcome};
use std::sync::Arc;

const POPULATION: [f64; 5] = [1400.0, 1480.0, 1500.0, 1520.0, 1600.0];

#[tokio::test]
async fn test_inbox_keeps_articles_at_or_above_median() {
    let judge = Arc::new(StubJudge::always(Outcome::Tie));
    let (service, storage, _dir) = create_test_service(judge).await;
    let generation = service.active_generation().await.unwrap();
    seed_confident_ratings(storage.as_ref(), generation.id, &POPULATION, 7).await;

    let ranked = service.inbox(&InboxQuery::default()).await.unwrap();

    let ratings: Vec<f64> = ranked.iter().map(|r| r.article.elo_rating).collect();
    assert_eq!(ratings, vec![1600.0, 1520.0, 1500.0]);
    assert_eq!(ranked[0].percentile, 80.0);
    assert_eq!(ranked[2].percentile, 40.0);

    let everything = service
        .inbox(&InboxQuery {
            show_all: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(everything.len(), 5);
    assert_eq!(everything.last().unwrap().percentile, 0.0);
}

#[tokio::test]
async fn test_inbox_limit_and_generation_filter() {
    let judge = Arc::new(StubJudge::always(Outcome::Tie));
    let (service, storage, _dir) = create_test_service(judge).await;
    let generation = service.active_generation().await.unwrap();
    seed_confident_ratings(storage.as_ref(), generation.id, &POPULATION, 7).await;

    let top = service
        .inbox(&InboxQuery {
            limit: Some(1),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].article.elo_rating, 1600.0);

    let other_generation = service
        .inbox(&InboxQuery {
            show_all: true,
            generations: Some(vec![GenerationId(generation.id.0 + 1)]),
            limit: None,
        })
        .await
        .unwrap();
    assert!(other_generation.is_empty());

    let current = service
        .confident_articles(&GenerationFilter::AtLeast(generation.id))
        .await
        .unwrap();
    assert_eq!(current.len(), 5);
}

#[tokio::test]
async fn test_percentiles_against_confident_population() {
    let judge = Arc::new(StubJudge::always(Outcome::Tie));
    let (service, storage, _dir) = create_test_service(judge).await;

    assert_eq!(service.percentile_for(1700.0).await.unwrap(), 50.0);

    let generation = service.active_generation().await.unwrap();
    let ids = seed_confident_ratings(storage.as_ref(), generation.id, &POPULATION, 7).await;

    assert_eq!(service.percentile_for(1399.0).await.unwrap(), 0.0);
    assert_eq!(service.percentile_for(1700.0).await.unwrap(), 100.0);
    assert_eq!(service.article_percentile(ids[3]).await.unwrap(), 60.0);
}

#[tokio::test]
async fn test_unconfident_articles_stay_out_of_the_inbox() {
    let judge = Arc::new(StubJudge::always(Outcome::AWins));
    let (service, storage, _dir) = create_test_service(judge).await;
    let generation = service.active_generation().await.unwrap();
    seed_confident_ratings(storage.as_ref(), generation.id, &[1500.0, 1500.0, 1500.0], 7).await;

    let report = service
        .ingest_and_rate(sample_article("Three comparisons only"))
        .await
        .unwrap();
    assert_eq!(report.comparisons, 3);
    assert!(!report.confident);

    let everything = service
        .inbox(&InboxQuery {
            show_all: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(everything.len(), 3);
    assert!(everything.iter().all(|r| r.article.id != report.article_id));
}
