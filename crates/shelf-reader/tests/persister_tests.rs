mod common;

use common::*;
use shelf_reader::*;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::time::{Instant, sleep};

const WINDOW: Duration = Duration::from_millis(1000);

fn snapshot(page: u32) -> ProgressSnapshot {
    translator::pdf_snapshot(page, 100)
}

fn persister(library: &Arc<FakeLibrary>) -> ProgressPersister {
    ProgressPersister::spawn(42, AuthContext::user(7), library.clone(), WINDOW)
}

#[tokio::test(start_paused = true)]
async fn test_reports_coalesce_into_one_save() {
    let library = Arc::new(FakeLibrary::default());
    let persister = persister(&library);
    let started = Instant::now();

    for page in 1..=10 {
        persister.report(snapshot(page));
        sleep(Duration::from_millis(100)).await;
    }
    sleep(Duration::from_secs(3)).await;

    let saves = library.saves.lock().unwrap().clone();
    assert_eq!(saves.len(), 1);
    let (book_id, saved, at) = saves[0];
    assert_eq!(book_id, 42);
    assert_eq!(saved, snapshot(10));
    // Last report at 900ms plus the quiescence window
    assert_eq!(at.duration_since(started), Duration::from_millis(1900));
}

#[tokio::test(start_paused = true)]
async fn test_separate_bursts_save_separately() {
    let library = Arc::new(FakeLibrary::default());
    let persister = persister(&library);

    persister.report(snapshot(3));
    sleep(Duration::from_millis(1500)).await;
    persister.report(snapshot(4));
    sleep(Duration::from_millis(1500)).await;

    assert_eq!(library.saved(), vec![snapshot(3), snapshot(4)]);
}

#[tokio::test(start_paused = true)]
async fn test_at_most_one_save_in_flight() {
    let library = Arc::new(FakeLibrary::default());
    *library.save_delay.lock().unwrap() = Duration::from_secs(3);
    let persister = persister(&library);
    let started = Instant::now();

    // First save starts at 1s and completes at 4s
    persister.report(snapshot(1));
    sleep(Duration::from_millis(1200)).await;

    // Both windows elapse while the first save is still running
    persister.report(snapshot(2));
    sleep(Duration::from_millis(300)).await;
    persister.report(snapshot(3));

    sleep(Duration::from_secs(10)).await;

    let saves = library.saves.lock().unwrap().clone();
    assert_eq!(saves.len(), 2);
    assert_eq!(saves[0].1, snapshot(1));
    assert_eq!(saves[1].1, snapshot(3));
    // Held snapshot is sent as soon as the first save returns, then takes 3s itself
    assert_eq!(saves[0].2.duration_since(started), Duration::from_secs(4));
    assert_eq!(saves[1].2.duration_since(started), Duration::from_secs(7));
}

#[tokio::test(start_paused = true)]
async fn test_failed_save_is_swallowed_and_next_cycle_saves() {
    let library = Arc::new(FakeLibrary::default());
    library.fail_saves.store(true, Ordering::SeqCst);
    let persister = persister(&library);

    persister.report(snapshot(10));
    sleep(Duration::from_millis(1500)).await;
    assert!(library.saved().is_empty());

    library.fail_saves.store(false, Ordering::SeqCst);
    persister.report(snapshot(11));
    sleep(Duration::from_millis(1500)).await;

    // Failed values are not retried
    assert_eq!(library.saved(), vec![snapshot(11)]);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_pending_save() {
    let library = Arc::new(FakeLibrary::default());
    let persister = persister(&library);

    persister.report(snapshot(5));
    sleep(Duration::from_millis(500)).await;
    persister.shutdown();
    persister.shutdown();
    persister.report(snapshot(6));

    sleep(Duration::from_secs(5)).await;
    assert!(library.saved().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_lets_in_flight_save_finish() {
    let library = Arc::new(FakeLibrary::default());
    *library.save_delay.lock().unwrap() = Duration::from_secs(2);
    let persister = persister(&library);

    persister.report(snapshot(8));
    sleep(Duration::from_millis(1500)).await;
    drop(persister);

    sleep(Duration::from_secs(5)).await;
    assert_eq!(library.saved(), vec![snapshot(8)]);
}

#[tokio::test(start_paused = true)]
async fn test_settled_navigation_reports_progress() {
    let library = Arc::new(FakeLibrary::default());
    let persister = Arc::new(persister(&library));
    let (_tx, rx) = tokio::sync::watch::channel(None);
    let nav = NavigationController::new(Arc::new(FakeEngine::new(100)), rx, persister.clone());

    for _ in 0..49 {
        nav.next().await.unwrap();
    }
    sleep(Duration::from_secs(2)).await;

    let saved = library.saved();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].current_page, 50);
    assert!((saved[0].progress_percentage - 50.0).abs() < 1e-9);
}
