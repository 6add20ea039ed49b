//! End-to-end tests against the simulated worker on an ephemeral port.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use noisescope_client::{
    ClientConfig, ClientError, RunMode, SessionCoordinator, SessionState, ViewUpdate,
};
use noisescope_core::{FrameStore, JobSpec, COSINE_METRIC};
use noisescope_worker_sim::state::{SimBehavior, SimState};
use pretty_assertions::assert_eq;

const SUBJECT_IMAGE: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUg==";
const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDRbody";

async fn sim(behavior: SimBehavior) -> ClientConfig {
    let (addr, _handle) = noisescope_worker_sim::serve_ephemeral(SimState::with_behavior(behavior))
        .await
        .unwrap();
    ClientConfig::ephemeral(format!("http://{addr}"))
}

async fn fast_sim() -> ClientConfig {
    sim(SimBehavior::default()).await
}

fn job(steps: u32) -> JobSpec {
    JobSpec::new(SUBJECT_IMAGE, steps)
}

/// `<seed>:<t>` encoded in a simulated preview.
fn decode_preview(image: &str) -> String {
    let payload = image.split_once(";base64,").unwrap().1;
    String::from_utf8(STANDARD.decode(payload).unwrap()).unwrap()
}

fn global_steps(store: &FrameStore) -> Vec<u64> {
    store.iter().map(|f| f.global_step).collect()
}

async fn activate(c: &mut SessionCoordinator, subject: &str) {
    c.switch_subject(
        Some(subject.to_string()),
        None,
        Some(SUBJECT_IMAGE.to_string()),
    )
    .await;
}

async fn run(c: &mut SessionCoordinator, spec: JobSpec) -> SessionState {
    let subject = c.view().subject.clone();
    c.run_diffusion(subject.as_deref(), spec, RunMode::Streamed)
        .await
        .unwrap();
    c.run_to_completion().await
}

#[tokio::test]
async fn five_hundred_steps_stay_within_frame_bound() {
    let config = fast_sim().await;
    let mut c = SessionCoordinator::from_config(&config);
    activate(&mut c, "s1").await;
    c.run_diffusion(Some("s1"), job(500), RunMode::Streamed)
        .await
        .unwrap();

    let mut frame_events = 0;
    while c.session_state().is_live() {
        if let Some(ViewUpdate::FrameMerged { .. }) = c.next_update().await {
            frame_events += 1;
        }
    }

    assert_eq!(c.session_state(), SessionState::Done);
    assert!(frame_events <= 26, "{frame_events} frame events");
    assert_eq!(c.timeline().len(), 26);
    let steps = global_steps(c.timeline());
    assert!(steps.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(steps.last(), Some(&499));
    assert_eq!(c.view().progress, 1.0);
}

#[tokio::test]
async fn late_messages_after_cancel_change_nothing() {
    let config = sim(SimBehavior {
        step_delay: Duration::from_millis(20),
        ..SimBehavior::default()
    })
    .await;
    let mut c = SessionCoordinator::from_config(&config);
    activate(&mut c, "s1").await;
    let generation = c
        .run_diffusion(Some("s1"), job(1000), RunMode::Streamed)
        .await
        .unwrap()
        .unwrap();

    loop {
        match c.next_update().await {
            Some(ViewUpdate::FrameMerged { .. }) => break,
            Some(_) => continue,
            None => panic!("event channel closed"),
        }
    }
    assert!(c.cancel_run());
    let snapshot = c.timeline().clone();

    while let Ok(Some(update)) =
        tokio::time::timeout(Duration::from_millis(200), c.next_update()).await
    {
        assert_eq!(update, ViewUpdate::StaleDropped { generation });
    }
    assert_eq!(c.timeline(), &snapshot);
    assert_eq!(c.session_state(), SessionState::Canceled);

    // Cancel twice is a no-op.
    assert!(!c.cancel_run());
    assert_eq!(c.session_state(), SessionState::Canceled);
}

#[tokio::test]
async fn switching_away_and_back_restores_timeline() {
    let config = fast_sim().await;
    let mut c = SessionCoordinator::from_config(&config);

    activate(&mut c, "a").await;
    assert_eq!(run(&mut c, job(50)).await, SessionState::Done);
    let a_frames = c.timeline().to_sorted_sequence();

    activate(&mut c, "b").await;
    assert!(c.timeline().is_empty());
    assert_eq!(run(&mut c, job(30).with_seed(7)).await, SessionState::Done);

    activate(&mut c, "a").await;
    assert_eq!(c.timeline().to_sorted_sequence(), a_frames);
}

#[tokio::test]
async fn first_subject_reappears_with_its_frames() {
    let config = fast_sim().await;
    let mut c = SessionCoordinator::from_config(&config);

    activate(&mut c, "img1").await;
    assert_eq!(run(&mut c, job(2)).await, SessionState::Done);

    activate(&mut c, "img2").await;
    assert_eq!(run(&mut c, job(4)).await, SessionState::Done);

    activate(&mut c, "img1").await;
    assert_eq!(c.timeline().len(), 2);
    let preview = c.view().preview.clone().unwrap();
    assert_eq!(decode_preview(&preview), "42:1");
    assert_eq!(c.view().current_step, Some(1));
}

#[tokio::test]
async fn second_run_replaces_history() {
    let config = fast_sim().await;
    let mut c = SessionCoordinator::from_config(&config);
    activate(&mut c, "a").await;

    assert_eq!(run(&mut c, job(10)).await, SessionState::Done);
    assert_eq!(run(&mut c, job(5).with_seed(9)).await, SessionState::Done);

    assert_eq!(global_steps(c.timeline()), vec![0, 1, 2, 3, 4]);
    for frame in c.timeline().iter() {
        let preview = decode_preview(frame.image.as_deref().unwrap());
        assert!(preview.starts_with("9:"), "{preview}");
    }
}

#[tokio::test]
async fn continue_appends_after_history() {
    let config = fast_sim().await;
    let mut c = SessionCoordinator::from_config(&config);
    activate(&mut c, "a").await;

    assert_eq!(run(&mut c, job(3)).await, SessionState::Done);
    assert_eq!(c.continuation_offset(), 3);

    c.continue_run(job(3)).unwrap();
    assert_eq!(c.run_to_completion().await, SessionState::Done);

    assert_eq!(global_steps(c.timeline()), vec![0, 1, 2, 3, 4, 5]);
    let local: Vec<u32> = c.timeline().iter().map(|f| f.local_step).collect();
    assert_eq!(local, vec![0, 1, 2, 0, 1, 2]);
}

#[tokio::test]
async fn dropped_connection_errors_and_keeps_partial_frames() {
    let config = sim(SimBehavior {
        drop_after: Some(5),
        ..SimBehavior::default()
    })
    .await;
    let mut c = SessionCoordinator::from_config(&config);
    activate(&mut c, "a").await;

    assert_eq!(run(&mut c, job(20)).await, SessionState::Errored);
    assert!(c.view().stream_error.is_some());
    assert_eq!(global_steps(c.timeline()), vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn worker_error_status_ends_session() {
    let config = sim(SimBehavior {
        fail_after: Some(2),
        ..SimBehavior::default()
    })
    .await;
    let mut c = SessionCoordinator::from_config(&config);
    activate(&mut c, "a").await;

    assert_eq!(run(&mut c, job(20)).await, SessionState::Errored);
    let error = c.view().stream_error.clone().unwrap();
    assert!(error.contains("simulated worker failure"), "{error}");
    assert_eq!(c.timeline().len(), 2);
}

#[tokio::test]
async fn malformed_messages_are_skipped() {
    let config = sim(SimBehavior {
        inject_garbage: true,
        ..SimBehavior::default()
    })
    .await;
    let mut c = SessionCoordinator::from_config(&config);
    activate(&mut c, "a").await;

    assert_eq!(run(&mut c, job(10)).await, SessionState::Done);
    assert_eq!(c.timeline().len(), 10);
}

#[tokio::test]
async fn metrics_only_followups_enrich_frames() {
    let config = sim(SimBehavior {
        metrics_followup: true,
        ..SimBehavior::default()
    })
    .await;
    let mut c = SessionCoordinator::from_config(&config);
    activate(&mut c, "a").await;

    assert_eq!(run(&mut c, job(10)).await, SessionState::Done);
    assert_eq!(c.timeline().len(), 10);
    for frame in c.timeline().iter() {
        assert!(frame.image.is_some());
        assert!(frame.metric(COSINE_METRIC).is_some());
    }
    assert_eq!(c.timeline().residual_series().len(), 10);
}

#[tokio::test]
async fn single_shot_sets_preview_without_timeline() {
    let config = fast_sim().await;
    let mut c = SessionCoordinator::from_config(&config);
    activate(&mut c, "a").await;

    let generation = c
        .run_diffusion(Some("a"), job(10), RunMode::SingleShot)
        .await
        .unwrap();
    assert!(generation.is_none());
    assert_eq!(c.view().progress, 1.0);
    assert_eq!(c.view().current_step, Some(9));
    assert_eq!(decode_preview(c.view().preview.as_deref().unwrap()), "42:9");
    assert!(c.timeline().is_empty());
}

#[tokio::test]
async fn timelines_survive_a_new_coordinator() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = fast_sim().await;
    config.cache_dir = Some(dir.path().to_path_buf());

    let mut first = SessionCoordinator::from_config(&config);
    activate(&mut first, "a").await;
    assert_eq!(run(&mut first, job(5)).await, SessionState::Done);
    let frames = first.timeline().to_sorted_sequence();
    first.shutdown().await;
    drop(first);

    let mut second = SessionCoordinator::from_config(&config);
    activate(&mut second, "a").await;
    assert_eq!(second.timeline().to_sorted_sequence(), frames);
}

#[tokio::test]
async fn upload_assigns_subject_and_delete_evicts() {
    let config = fast_sim().await;
    let mut c = SessionCoordinator::from_config(&config);

    let err = c
        .upload_subject(b"plain text".to_vec(), "notes.txt")
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Validation(_)));
    assert_eq!(c.view().subject, None);
    assert!(c.list_subjects().await.unwrap().is_empty());

    let record = c.upload_subject(PNG.to_vec(), "cat.png").await.unwrap();
    assert_eq!(record.id, "1");
    assert_eq!(c.view().subject.as_deref(), Some("1"));
    assert_eq!(c.list_subjects().await.unwrap().len(), 1);

    assert_eq!(run(&mut c, job(3)).await, SessionState::Done);
    c.delete_subject("1").await.unwrap();
    assert_eq!(c.view().subject, None);
    assert!(c.list_subjects().await.unwrap().is_empty());

    activate(&mut c, "1").await;
    assert!(c.timeline().is_empty());
}

#[tokio::test]
async fn unreachable_worker_is_a_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = ClientConfig::ephemeral(format!("http://{addr}"));
    let mut c = SessionCoordinator::from_config(&config);
    activate(&mut c, "a").await;

    assert_eq!(run(&mut c, job(5)).await, SessionState::Errored);
    assert!(c.view().stream_error.is_some());
    assert!(c.timeline().is_empty());
}
