use mathchat::config::CompletionConfig;
use mathchat::pipeline::{FixedPicker, HttpTransport, RecordingSleeper, RequestPipeline};
use mathchat::storage::{ChatMessage, Session, SessionStore, DEFAULT_STORAGE_KEY};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

#[allow(dead_code)]
pub fn create_temp_store() -> (SessionStore, TempDir) {
    let tmp = TempDir::new().expect("failed to create tempdir");
    let store =
        SessionStore::open_dir(tmp.path(), DEFAULT_STORAGE_KEY).expect("failed to open store");
    (store, tmp)
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

/// Completion settings pointing at a mock server
#[allow(dead_code)]
pub fn completion_config(endpoint: &str) -> CompletionConfig {
    CompletionConfig {
        endpoint: endpoint.to_string(),
        api_key: Some("sk-test".to_string()),
        ..CompletionConfig::default()
    }
}

/// Real HTTP transport with a recording sleeper and a fixed fallback pick
#[allow(dead_code)]
pub fn http_pipeline(config: CompletionConfig) -> (RequestPipeline, Arc<RecordingSleeper>) {
    let transport = HttpTransport::new(&config).expect("failed to build transport");
    let sleeper = Arc::new(RecordingSleeper::default());
    let pipeline = RequestPipeline::new(
        config,
        Arc::new(transport),
        sleeper.clone(),
        Arc::new(FixedPicker(0)),
    );
    (pipeline, sleeper)
}

/// Session with one question and answer
#[allow(dead_code)]
pub fn answered_session(id: &str, question: &str, answer: &str) -> Session {
    let mut session = Session::new(id);
    session.record_exchange(
        ChatMessage::user(format!("{}-q", id), question),
        ChatMessage::assistant(format!("{}-a", id), answer),
    );
    session
}
