use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use toolchat::app::{ManualInterrupt, Session};
use toolchat::config::RunOptions;
use toolchat::confirm::prompt::PromptOptions;
use toolchat::confirm::{Confirmer, DEFAULT_SYSTEM_TOOL_PREFIX, REJECTION_REASON};
use toolchat::display::Display;
use toolchat::engine::mock::MockEngine;
use toolchat::engine::types::{Frame, ToolDef};
use toolchat::terminal::RecordingSurface;
use toolchat::test_support::ScriptedReader;
use toolchat::trust::TrustStore;

const TICK: Duration = Duration::from_millis(10);

fn frame(value: Value) -> Frame {
    serde_json::from_value(value).expect("frame")
}

fn run_start() -> Frame {
    frame(json!({"run": {"id": "r", "type": "runStart"}}))
}

fn run_finish(state: &str, extra: Value) -> Frame {
    let mut run = json!({"id": "r", "type": "runFinish", "state": state});
    if let (Some(run), Some(extra)) = (run.as_object_mut(), extra.as_object()) {
        run.extend(extra.clone());
    }
    frame(json!({ "run": run }))
}

fn chat_call(id: &str, content: &str) -> Frame {
    frame(json!({"call": {
        "id": id, "type": "callChat", "start": "2024-01-01T00:00:00Z",
        "output": [{"content": content}]
    }}))
}

fn options(workspace: &Path) -> RunOptions {
    RunOptions {
        tool: "chat.gpt".to_string(),
        input: "hi".to_string(),
        user_start_conversation: Some(false),
        workspace: Some(workspace.to_path_buf()),
        repaint_interval: TICK,
        ..RunOptions::default()
    }
}

struct Harness {
    engine: MockEngine,
    surface: RecordingSurface,
    reader: ScriptedReader,
    interrupt: ManualInterrupt,
    store: TrustStore,
}

impl Harness {
    fn new(lines: Vec<Option<&str>>) -> Self {
        Self {
            engine: MockEngine::new(),
            surface: RecordingSurface::new(100, 40),
            reader: ScriptedReader::new(lines),
            interrupt: ManualInterrupt::new(),
            store: TrustStore::in_memory(Vec::new()),
        }
    }

    async fn run(self, options: RunOptions) -> anyhow::Result<()> {
        let display = Display::new(self.surface.clone(), self.reader.clone(), options.repaint_interval);
        let confirmer = Confirmer::new(
            self.store,
            DEFAULT_SYSTEM_TOOL_PREFIX,
            PromptOptions::default(),
        );
        let session = Session::new(
            self.engine.clone(),
            display,
            confirmer,
            self.interrupt.clone(),
            options,
        );
        tokio::time::timeout(Duration::from_secs(20), session.run())
            .await
            .expect("session finished in time")
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_finished_run_ends_session_without_prompting() {
    let dir = tempfile::tempdir().expect("tempdir");
    let harness = Harness::new(Vec::new());
    harness.engine.push_run(vec![
        run_start(),
        chat_call("root", "Hello there"),
        run_finish("finished", json!({})),
    ]);
    let (engine, surface, reader) = (
        harness.engine.clone(),
        harness.surface.clone(),
        harness.reader.clone(),
    );

    harness.run(options(dir.path())).await.expect("session");

    assert!(surface.output().contains("Hello there"));
    assert!(surface.output().contains("> hi"));
    assert_eq!(reader.reads(), 0);
    assert!(reader.is_closed());

    let requests = engine.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].file, "chat.gpt");
    assert_eq!(requests[0].input, "hi");
    assert!(requests[0].confirm && requests[0].prompt && requests[0].include_events);
    assert_eq!(requests[0].workspace, dir.path().display().to_string());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_continue_prompts_with_responding_tool_and_carries_chat_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let harness = Harness::new(vec![Some("bye")]);
    harness.engine.push_run(vec![
        chat_call("root", "What next?"),
        run_finish(
            "continue",
            json!({"chatState": "{\"turn\":1}", "respondingTool": {"name": "helper"}}),
        ),
    ]);
    harness.engine.push_run(vec![
        chat_call("root2", "Goodbye"),
        run_finish("finished", json!({})),
    ]);
    let (engine, surface, reader) = (
        harness.engine.clone(),
        harness.surface.clone(),
        harness.reader.clone(),
    );

    harness.run(options(dir.path())).await.expect("session");

    assert_eq!(reader.prompts(), vec!["@helper>".to_string()]);
    let requests = engine.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].input, "bye");
    assert_eq!(requests[1].chat_state.as_deref(), Some("{\"turn\":1}"));
    assert!(surface.output().contains("Goodbye"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_interrupt_ends_turn_not_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let harness = Harness::new(vec![None]);
    harness
        .engine
        .push_held_run(vec![run_start(), chat_call("root", "Working on it")]);
    let (engine, surface, reader, interrupt) = (
        harness.engine.clone(),
        harness.surface.clone(),
        harness.reader.clone(),
        harness.interrupt.clone(),
    );

    let screen = surface.clone();
    tokio::spawn(async move {
        while !(engine.requests().len() == 1 && screen.output().contains("Working on it")) {
            tokio::time::sleep(TICK).await;
        }
        interrupt.trigger();
    });

    harness.run(options(dir.path())).await.expect("session");

    assert!(surface.output().contains("Interrupted\n\n"));
    assert_eq!(reader.reads(), 1);
    assert_eq!(reader.prompts(), vec![">".to_string()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_interrupted_turn_keeps_conversation_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let harness = Harness::new(vec![Some("second"), Some("third")]);
    harness.engine.push_run(vec![
        chat_call("root", "First answer"),
        run_finish("continue", json!({"chatState": "{\"turn\":1}"})),
    ]);
    harness
        .engine
        .push_held_run(vec![run_start(), chat_call("root2", "Still working")]);
    harness.engine.push_run(vec![
        chat_call("root3", "Third answer"),
        run_finish("finished", json!({})),
    ]);
    let (engine, surface, interrupt) = (
        harness.engine.clone(),
        harness.surface.clone(),
        harness.interrupt.clone(),
    );

    let watcher = (engine.clone(), surface.clone());
    tokio::spawn(async move {
        while !(watcher.0.requests().len() == 2 && watcher.1.output().contains("Still working")) {
            tokio::time::sleep(TICK).await;
        }
        interrupt.trigger();
    });

    harness.run(options(dir.path())).await.expect("session");

    assert!(surface.output().contains("Interrupted\n\n"));
    assert!(surface.output().contains("Third answer"));
    let chat_states: Vec<Option<String>> = engine
        .requests()
        .into_iter()
        .map(|request| request.chat_state)
        .collect();
    assert_eq!(
        chat_states,
        vec![
            None,
            Some("{\"turn\":1}".to_string()),
            Some("{\"turn\":1}".to_string()),
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_run_error_is_printed_and_session_keeps_prompting() {
    let dir = tempfile::tempdir().expect("tempdir");
    let harness = Harness::new(vec![None]);
    harness.engine.push_run(vec![
        chat_call("root", "Trying"),
        run_finish("error", json!({"error": "tool exploded"})),
    ]);
    let (surface, reader) = (harness.surface.clone(), harness.reader.clone());

    harness.run(options(dir.path())).await.expect("session");

    assert!(surface.output().contains("tool exploded"));
    assert_eq!(reader.reads(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_continuation_is_printed_and_prompted_again() {
    let dir = tempfile::tempdir().expect("tempdir");
    let harness = Harness::new(vec![Some("again"), None]);
    harness.engine.push_run(vec![
        chat_call("root", "Hi"),
        run_finish("continue", json!({})),
    ]);
    let (engine, surface, reader) = (
        harness.engine.clone(),
        harness.surface.clone(),
        harness.reader.clone(),
    );

    harness.run(options(dir.path())).await.expect("session");

    assert!(surface.output().contains("no more runs scripted"));
    assert_eq!(reader.reads(), 2);
    assert_eq!(engine.requests().len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_system_tool_confirmation_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let harness = Harness::new(vec![Some("maybe"), Some("n")]);
    harness.engine.push_run(vec![
        frame(json!({"call": {
            "id": "exec-1", "type": "callConfirm", "start": "2024-01-01T00:00:00Z",
            "tool": {"name": "exec", "instructions": "#!sys.exec"},
            "input": "{\"command\": \"rm -rf build\"}"
        }})),
        run_finish("finished", json!({})),
    ]);
    let (engine, surface, reader) = (
        harness.engine.clone(),
        harness.surface.clone(),
        harness.reader.clone(),
    );

    harness.run(options(dir.path())).await.expect("session");

    assert_eq!(reader.reads(), 2);
    assert!(surface.output().contains("rm -rf build"));
    let confirms = engine.confirms();
    assert_eq!(confirms.len(), 1);
    assert_eq!(confirms[0].id, "exec-1");
    assert!(!confirms[0].accept);
    assert_eq!(confirms[0].message, REJECTION_REASON);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_origin_grant_is_persisted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let auth_file = dir.path().join("auth/authorized.json");
    let mut harness = Harness::new(vec![Some("yes")]);
    harness.store = TrustStore::at_path(&auth_file, Vec::new());
    harness.engine.push_run(vec![
        frame(json!({"call": {
            "id": "c1", "type": "callConfirm", "start": "2024-01-01T00:00:00Z",
            "tool": {"name": "fetch", "source": {
                "location": "tool.gpt",
                "repo": {"VCS": "git", "Root": "https://github.com/acme/tools.git"}
            }}
        }})),
        run_finish("finished", json!({})),
    ]);
    let engine = harness.engine.clone();

    harness.run(options(dir.path())).await.expect("session");

    assert!(engine.confirms()[0].accept);
    let reloaded = TrustStore::at_path(&auth_file, Vec::new());
    assert!(reloaded.is_trusted("github.com/acme/tools"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_prompt_abort_ends_session_cleanly() {
    let dir = tempfile::tempdir().expect("tempdir");
    let harness = Harness::new(vec![None]);
    harness.engine.push_held_run(vec![frame(json!({"prompt": {
        "id": "p1", "type": "prompt", "message": "API key", "fields": ["key"], "sensitive": true
    }}))]);
    let engine = harness.engine.clone();

    harness.run(options(dir.path())).await.expect("session");

    assert!(engine.prompt_responses().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_user_start_detected_from_parsed_tools() {
    let dir = tempfile::tempdir().expect("tempdir");
    let harness = Harness::new(vec![Some("hello")]);
    let engine = harness.engine.clone().with_tools(vec![ToolDef {
        name: "chatbot".to_string(),
        chat: true,
        instructions: String::new(),
    }]);
    engine.push_run(vec![chat_call("root", "Hey"), run_finish("finished", json!({}))]);

    let reader = harness.reader.clone();
    harness
        .run(RunOptions {
            input: String::new(),
            user_start_conversation: None,
            ..options(dir.path())
        })
        .await
        .expect("session");

    assert_eq!(reader.prompts(), vec![">".to_string()]);
    assert_eq!(engine.requests()[0].input, "hello");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_resuming_chat_state_asks_for_input() {
    let dir = tempfile::tempdir().expect("tempdir");
    let harness = Harness::new(vec![Some("where were we")]);
    harness
        .engine
        .push_run(vec![chat_call("root", "Here"), run_finish("finished", json!({}))]);
    let (engine, reader) = (harness.engine.clone(), harness.reader.clone());

    harness
        .run(RunOptions {
            input: String::new(),
            chat_state: Some("{\"turn\":4}".to_string()),
            ..options(dir.path())
        })
        .await
        .expect("session");

    assert_eq!(reader.prompts(), vec!["Resuming conversation>".to_string()]);
    let request = &engine.requests()[0];
    assert_eq!(request.input, "where were we");
    assert_eq!(request.chat_state.as_deref(), Some("{\"turn\":4}"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_chat_state_file_saved_then_removed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let state_file = dir.path().join("chat.state");
    let harness = Harness::new(vec![None]);
    harness.engine.push_run(vec![
        chat_call("root", "Hi"),
        run_finish("continue", json!({"chatState": "{\"turn\":1}"})),
    ]);

    harness
        .run(RunOptions {
            save_chat_state_file: Some(state_file.clone()),
            ..options(dir.path())
        })
        .await
        .expect("session");
    assert_eq!(
        std::fs::read_to_string(&state_file).expect("state saved"),
        "{\"turn\":1}"
    );

    let harness = Harness::new(Vec::new());
    harness
        .engine
        .push_run(vec![chat_call("root", "Done"), run_finish("finished", json!({}))]);
    harness
        .run(RunOptions {
            save_chat_state_file: Some(state_file.clone()),
            ..options(dir.path())
        })
        .await
        .expect("session");
    assert!(!state_file.exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_event_log_skips_progress_frames() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log = dir.path().join("events.jsonl");
    let harness = Harness::new(Vec::new());
    harness.engine.push_run(vec![
        run_start(),
        frame(json!({"call": {
            "id": "root", "type": "callProgress", "start": "2024-01-01T00:00:00Z",
            "output": [{"content": "partial"}]
        }})),
        chat_call("root", "complete"),
        run_finish("finished", json!({})),
    ]);

    harness
        .run(RunOptions {
            event_log: Some(log.clone()),
            ..options(dir.path())
        })
        .await
        .expect("session");

    let contents = std::fs::read_to_string(&log).expect("log");
    let lines: Vec<Value> = contents
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect();
    assert_eq!(lines.len(), 3);
    assert!(lines.iter().all(|line| line["time"].is_string()));
    assert_eq!(lines[1]["event"]["call"]["type"], "callChat");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_load_message_shown_when_engine_is_silent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let harness = Harness::new(vec![None]);
    harness.engine.push_held_run(Vec::new());
    let (surface, interrupt) = (harness.surface.clone(), harness.interrupt.clone());

    let screen = surface.clone();
    tokio::spawn(async move {
        while !screen.output().contains("Warming up") {
            tokio::time::sleep(TICK).await;
        }
        interrupt.trigger();
    });

    harness
        .run(RunOptions {
            load_message: Some("Warming up".to_string()),
            ..options(dir.path())
        })
        .await
        .expect("session");

    assert!(surface.output().contains("Interrupted"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_inline_tools_sent_instead_of_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let harness = Harness::new(Vec::new());
    harness
        .engine
        .push_run(vec![chat_call("root", "ok"), run_finish("finished", json!({}))]);
    let engine = harness.engine.clone();

    harness
        .run(RunOptions {
            eval: vec![ToolDef {
                name: "inline".to_string(),
                chat: false,
                instructions: "Say ok".to_string(),
            }],
            ..options(dir.path())
        })
        .await
        .expect("session");

    let request = &engine.requests()[0];
    assert!(request.file.is_empty());
    assert_eq!(request.tools.len(), 1);
    assert_eq!(request.tools[0].name, "inline");
}
