//! Pipeline worker integration tests.
//!
//! Validation happens before any model work, so these run without model
//! artifacts or a decoder install.

use std::sync::Arc;

use tokio::sync::Mutex;
use verbatim::asr::Transcriber;
use verbatim::diarization::Diarizer;
use verbatim::models::ModelRegistry;
use verbatim::pipeline::PipelineOptions;
use verbatim::settings::Settings;
use verbatim::worker::{spawn_pipeline_worker, WorkerEvent};

fn harness(root: &std::path::Path) -> (Arc<Mutex<Transcriber>>, Arc<Mutex<Diarizer>>) {
    let mut settings = Settings::default();
    settings.paths.models = root.join("models");
    settings.paths.output = root.join("output");
    settings.paths.temp = root.join("temp");

    let registry = Arc::new(ModelRegistry::new(&settings.paths.models).unwrap());
    let transcriber = Arc::new(Mutex::new(Transcriber::new(&settings, registry)));
    let diarizer = Arc::new(Mutex::new(Diarizer::new(&settings)));
    (transcriber, diarizer)
}

async fn run_to_terminal<T>(
    handle: &mut verbatim::worker::WorkerHandle<T>,
) -> (Vec<WorkerEvent<T>>, String) {
    let mut events = Vec::new();
    let mut error = String::new();
    while let Some(event) = handle.next_event().await {
        if let WorkerEvent::Error(message) = &event {
            error = message.clone();
        }
        events.push(event);
    }
    (events, error)
}

#[tokio::test]
async fn missing_input_surfaces_file_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let (transcriber, diarizer) = harness(dir.path());

    let mut handle = spawn_pipeline_worker(
        transcriber,
        diarizer,
        dir.path().join("nope.wav"),
        PipelineOptions {
            diarization: true,
            ..Default::default()
        },
    );

    let (events, error) = run_to_terminal(&mut handle).await;
    assert!(matches!(events.first(), Some(WorkerEvent::Started)));
    assert!(error.contains("Audio file not found"));
    assert!(error.contains("nope.wav"));
    assert!(!events.iter().any(|e| matches!(e, WorkerEvent::Finished(_))));
    assert!(!events
        .iter()
        .any(|e| matches!(e, WorkerEvent::TranscriptionDone(_))));
}

#[tokio::test]
async fn unsupported_suffix_surfaces_format_error() {
    let dir = tempfile::tempdir().unwrap();
    let (transcriber, diarizer) = harness(dir.path());

    let input = dir.path().join("slides.pdf");
    std::fs::write(&input, b"%PDF").unwrap();

    let mut handle = spawn_pipeline_worker(
        transcriber,
        diarizer,
        input,
        PipelineOptions::default(),
    );

    let (events, error) = run_to_terminal(&mut handle).await;
    assert!(error.contains("Unsupported audio format"));
    let terminals = events
        .iter()
        .filter(|e| matches!(e, WorkerEvent::Finished(_) | WorkerEvent::Error(_)))
        .count();
    assert_eq!(terminals, 1);
}
