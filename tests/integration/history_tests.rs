use chrono_tz::Australia::Sydney;
use serde_json::json;
use std::sync::Arc;

use super::*;
use repricer::history::HistoryAggregator;
use repricer::models::{DayObservations, ProductItem, RetailerLink};
use repricer::store::DocumentStore;

fn observations(entries: &[(&str, i64)]) -> DayObservations {
    entries
        .iter()
        .map(|(key, cents)| (key.to_string(), Price::from_cents(*cents)))
        .collect()
}

fn aggregator(store: Arc<dyn DocumentStore>) -> HistoryAggregator {
    HistoryAggregator::new(store, PRODUCTS, Sydney, BucketPolicy::FiscalQuarter)
}

#[tokio::test]
async fn test_merge_is_idempotent_on_sqlite() {
    let store = sqlite_store().await;
    let history = aggregator(store.clone());
    let path = "ProductItems/p1/History/Q32024";
    let day = observations(&[("A__PK__1", 1250)]);

    history.merge_observations(path, "2024-03-15", &day).await.unwrap();
    let once = store.get(path).await.unwrap().unwrap().data;
    history.merge_observations(path, "2024-03-15", &day).await.unwrap();
    let twice = store.get(path).await.unwrap().unwrap().data;

    assert_eq!(once, twice);
    assert_eq!(twice, json!({"2024-03-15": {"A__PK__1": 12.5}}));
}

#[tokio::test]
async fn test_concurrent_merges_keep_every_key() {
    let store = sqlite_store().await;
    let history = Arc::new(aggregator(store.clone()));
    let path = "ProductItems/p1/History/Q32024";

    let merges = (0..8).map(|i| {
        let history = Arc::clone(&history);
        async move {
            let key = format!("R{}__PK__1", i);
            history
                .merge_observations(path, "2024-03-15", &observations(&[(key.as_str(), 100 + i)]))
                .await
        }
    });
    for result in futures::future::join_all(merges).await {
        result.unwrap();
    }

    let bucket = store.get(path).await.unwrap().unwrap().data;
    let day = bucket["2024-03-15"].as_object().unwrap();
    assert_eq!(day.len(), 8);
    assert_eq!(day["R7__PK__1"], json!(1.07));
}

#[tokio::test]
async fn test_quarter_rollover_starts_new_bucket() {
    let store = Arc::new(MemoryDocumentStore::new());
    let history = aggregator(store.clone());

    let mut link = RetailerLink::new("A", 1, Some("x".to_string()));
    link.latest_price = Some(Price::from_cents(500));
    let mut item = ProductItem::transient("Bird Seed", vec![link]);
    item.source_record_id = Some("p9".to_string());

    // 2024-06-30T14:30Z is 00:30 on 1 July in Sydney: a new financial year.
    let june = chrono::TimeZone::with_ymd_and_hms(&chrono::Utc, 2024, 6, 30, 13, 0, 0).unwrap();
    let july = chrono::TimeZone::with_ymd_and_hms(&chrono::Utc, 2024, 6, 30, 14, 30, 0).unwrap();

    let first = history.append_history(&item, june).await.unwrap().unwrap();
    let second = history.append_history(&item, july).await.unwrap().unwrap();

    assert_eq!(first.bucket_id, "Q42024");
    assert_eq!(first.date_key, "2024-06-30");
    assert_eq!(second.bucket_id, "Q12024");
    assert_eq!(second.date_key, "2024-07-01");

    let buckets = store.get_all("ProductItems/p9/History").await.unwrap();
    let ids: Vec<&str> = buckets.iter().map(|doc| doc.id()).collect();
    assert_eq!(ids, vec!["Q12024", "Q42024"]);
}
