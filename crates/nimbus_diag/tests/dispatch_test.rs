use std::mem::discriminant;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nimbus_diag::output::{figure_path, FigureOutput, FigureTarget};
use nimbus_diag::{DiagError, DispatchMode, FailurePolicy, Figure, PlotDispatcher, PlotJob, Result};

fn unknown_parameter() -> Result<Figure> {
    Err(DiagError::UnknownParameter("q_50".to_string()))
}

fn tiny() -> Result<Figure> {
    Figure::render(8, 8, "tiny", |_| Ok(()))
}

#[test]
fn test_async_failure_matches_sync_failure() -> anyhow::Result<()> {
    let sync = PlotDispatcher::new("sync", DispatchMode::Synchronous, FigureOutput::default())?
        .with_failure_policy(FailurePolicy::Propagate);
    let sync_err = match sync.plot(true, PlotJob::new(unknown_parameter, FigureTarget::new("a", "a", 0))) {
        Err(e) => e,
        Ok(()) => panic!("synchronous plot should fail"),
    };

    let background = PlotDispatcher::new("async", DispatchMode::Asynchronous, FigureOutput::default())?
        .with_failure_policy(FailurePolicy::Propagate);
    let async_err = match background.plot(true, PlotJob::new(unknown_parameter, FigureTarget::new("a", "a", 0))) {
        Err(e) => e,
        Ok(()) => panic!("asynchronous plot should fail"),
    };

    assert!(matches!(async_err, DiagError::Async(_)));
    assert_eq!(discriminant(sync_err.innermost()), discriminant(async_err.innermost()));
    match &async_err {
        DiagError::Async(failure) => {
            assert_eq!(failure.tag, "a");
            assert_eq!(failure.thread, "plot-async");
        }
        other => panic!("unexpected error {other}"),
    }
    Ok(())
}

#[test]
fn test_teardown_drains_queued_jobs() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let rendered = Arc::new(AtomicUsize::new(0));
    let output = FigureOutput::new(Some(dir.path().to_path_buf()), Vec::new());
    let mut dispatcher = PlotDispatcher::new("drain", DispatchMode::Asynchronous, output)?;

    let mut pending = Vec::new();
    for i in 0..4 {
        let counter = Arc::clone(&rendered);
        let slow = move || {
            std::thread::sleep(Duration::from_millis(30));
            counter.fetch_add(1, Ordering::SeqCst);
            tiny()
        };
        pending.push(dispatcher.submit(PlotJob::new(slow, FigureTarget::new(format!("job{i}"), "job", 1)))?);
    }
    // nobody waits for the results
    drop(pending);
    dispatcher.teardown();

    assert_eq!(rendered.load(Ordering::SeqCst), 4);
    for i in 0..4 {
        assert!(figure_path(dir.path(), &format!("job{i}"), 1).exists());
    }
    Ok(())
}

#[test]
fn test_drop_drains_like_teardown() -> anyhow::Result<()> {
    let rendered = Arc::new(AtomicUsize::new(0));
    {
        let dispatcher = PlotDispatcher::new("dropped", DispatchMode::Asynchronous, FigureOutput::default())?;
        for _ in 0..3 {
            let counter = Arc::clone(&rendered);
            let job = move || {
                std::thread::sleep(Duration::from_millis(20));
                counter.fetch_add(1, Ordering::SeqCst);
                tiny()
            };
            dispatcher.submit(PlotJob::new(job, FigureTarget::new("x", "x", 0)))?;
        }
    }
    assert_eq!(rendered.load(Ordering::SeqCst), 3);
    Ok(())
}

#[test]
fn test_non_primary_rank_does_nothing() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let rendered = Arc::new(AtomicUsize::new(0));
    for mode in [DispatchMode::Synchronous, DispatchMode::Asynchronous] {
        let output = FigureOutput::new(Some(dir.path().to_path_buf()), Vec::new());
        let dispatcher = PlotDispatcher::new("rank1", mode, output)?;
        let counter = Arc::clone(&rendered);
        let job = move || {
            counter.fetch_add(1, Ordering::SeqCst);
            tiny()
        };
        dispatcher.plot(false, PlotJob::new(job, FigureTarget::new("never", "never", 0)))?;
    }
    assert_eq!(rendered.load(Ordering::SeqCst), 0);
    assert!(!dir.path().join("plots").exists());
    Ok(())
}
