use assert_cmd::Command;
use predicates::str::contains;

fn topicflow() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("topicflow"));
    cmd.env_remove("OPENAI_API_KEY")
        .env_remove("RUST_LOG")
        .env("XDG_CONFIG_HOME", std::env::temp_dir().join("topicflow-cli-tests"));
    cmd
}

#[test]
fn test_cli_help() {
    topicflow()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("TopicFlow"));
}

#[test]
fn test_cli_version() {
    topicflow().arg("--version").assert().success();
}

#[test]
fn test_scripted_turn_writes_state() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("replies.json");
    let state = dir.path().join("conversation.json");
    std::fs::write(
        &script,
        r#"["THOUGHT: symptoms\nFINAL ANSWER: DIAGNOSIS", "How long has it hurt?"]"#,
    )
    .unwrap();

    let output = topicflow()
        .arg("--script")
        .arg(&script)
        .args(["--format", "json", "turn", "--state"])
        .arg(&state)
        .arg("my throat hurts")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let printed: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(printed["appended"].as_array().unwrap().len(), 2);
    assert_eq!(printed["appended"][1]["content"], "How long has it hurt?");
    assert_eq!(printed["state"]["topic_stack"][0]["handler"], "DIAGNOSIS");

    let saved: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&state).unwrap()).unwrap();
    assert_eq!(saved["dialogue"].as_array().unwrap().len(), 2);
}

#[test]
fn test_missing_api_key_fails() {
    let dir = tempfile::tempdir().unwrap();
    topicflow()
        .args(["turn", "--state"])
        .arg(dir.path().join("conversation.json"))
        .arg("hello")
        .assert()
        .failure()
        .stderr(contains("No OpenAI API key configured"));
}

#[test]
fn test_duplicate_topic_ids_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("replies.json");
    let state = dir.path().join("conversation.json");
    std::fs::write(&script, "[]").unwrap();

    let topic = r#"{"id": "0b6f2f7e-3c59-4b8a-9d0e-6a1f4f2b9c11", "handler": "DIAGNOSIS"}"#;
    std::fs::write(
        &state,
        format!(r#"{{"topic_stack": [{topic}], "archive": [{topic}]}}"#),
    )
    .unwrap();

    topicflow()
        .arg("--script")
        .arg(&script)
        .args(["turn", "--state"])
        .arg(&state)
        .arg("hello")
        .assert()
        .failure()
        .stderr(contains("appears more than once"));
}
