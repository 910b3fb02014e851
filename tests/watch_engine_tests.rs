use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use agentdeck::config::{ObservationSettings, ProfilePaths, TEST_PROFILE, WatchSettings};
use agentdeck::error::Result;
use agentdeck::events::EventBus;
use agentdeck::mux::MuxBackend;
use agentdeck::mux::testing::MockMux;
use agentdeck::observer::SessionObserver;
use agentdeck::provider::{LlmProvider, Message};
use agentdeck::session::{Instance, NewInstance};
use agentdeck::tool::Tool;
use agentdeck::utils::CancelFlag;
use agentdeck::watch::{WatchAction, WatchGoal, WatchManager};
use chrono::Utc;

struct StubProvider {
    reply: String,
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl LlmProvider for StubProvider {
    fn name(&self) -> &'static str {
        "Stub"
    }

    async fn chat(&self, _messages: &[Message]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }

    async fn chat_stream(
        &self,
        _messages: &[Message],
        _cancel: CancelFlag,
    ) -> Result<tokio::sync::mpsc::Receiver<String>> {
        let (_tx, rx) = tokio::sync::mpsc::channel(1);
        Ok(rx)
    }
}

struct Fixture {
    manager: WatchManager,
    provider: Arc<StubProvider>,
    session_id: String,
}

async fn fixture(root: &std::path::Path, reply: &str, pane: &str) -> Fixture {
    let paths = ProfilePaths::under_root(root, TEST_PROFILE);
    std::fs::create_dir_all(&paths.observations_dir).unwrap();

    let mux = Arc::new(MockMux::new());
    let inst = Arc::new(
        Instance::create(
            NewInstance {
                title: "watched".into(),
                tool: Tool::Claude,
                project_path: std::env::temp_dir(),
                group_path: String::new(),
                tool_options: serde_json::json!({}),
            },
            Arc::clone(&mux) as Arc<dyn MuxBackend>,
        )
        .unwrap(),
    );
    mux.add_session(&inst.session_name());
    mux.set_pane(&inst.session_name(), pane);

    let observer = Arc::new(SessionObserver::new(
        paths.clone(),
        ObservationSettings::default(),
    ));
    observer.observe(&inst).await.unwrap();

    let provider = Arc::new(StubProvider {
        reply: reply.to_string(),
        calls: AtomicUsize::new(0),
    });
    let manager = WatchManager::new(
        observer,
        Arc::clone(&provider) as Arc<dyn LlmProvider>,
        WatchSettings::default(),
        paths,
        EventBus::default(),
        None,
        Duration::from_secs(30),
    );
    Fixture {
        manager,
        provider,
        session_id: inst.id.clone(),
    }
}

fn goal(session_id: &str, description: &str) -> WatchGoal {
    WatchGoal {
        id: String::new(),
        name: "guard".into(),
        description: description.into(),
        sessions: vec![session_id.to_string()],
        interval: Duration::from_secs(1),
        timeout: Duration::ZERO,
        action: WatchAction::Notify,
        paused: false,
        created_at: Utc::now(),
        last_triggered: None,
        trigger_count: 0,
    }
}

#[tokio::test(start_paused = true)]
async fn no_comment_reply_never_triggers() {
    let dir = tempfile::tempdir().unwrap();
    let f = fixture(dir.path(), "<NoComment>", "all good").await;

    let added = f.manager.add_goal(goal(&f.session_id, "alert on errors")).unwrap();
    f.manager.start();

    tokio::time::sleep(Duration::from_millis(3500)).await;
    f.manager.stop().await;

    assert!(f.provider.calls.load(Ordering::SeqCst) >= 3);
    let after = f.manager.get_goal(&added.id).unwrap();
    assert_eq!(after.trigger_count, 0);
    assert!(after.last_triggered.is_none());
}

#[tokio::test(start_paused = true)]
async fn actionable_reply_triggers_and_counts() {
    let dir = tempfile::tempdir().unwrap();
    let f = fixture(dir.path(), "Restart db", "FATAL: db down").await;

    let added = f.manager.add_goal(goal(&f.session_id, "alert on errors")).unwrap();
    f.manager.start();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    f.manager.stop().await;

    let after = f.manager.get_goal(&added.id).unwrap();
    assert!(after.trigger_count >= 1);
    assert!(after.last_triggered.is_some());
}

#[tokio::test(start_paused = true)]
async fn paused_goal_is_not_evaluated() {
    let dir = tempfile::tempdir().unwrap();
    let f = fixture(dir.path(), "Restart db", "FATAL: db down").await;

    let added = f.manager.add_goal(goal(&f.session_id, "alert on errors")).unwrap();
    f.manager.pause_goal(&added.id).unwrap();
    f.manager.start();

    tokio::time::sleep(Duration::from_millis(2500)).await;
    f.manager.stop().await;

    assert_eq!(f.provider.calls.load(Ordering::SeqCst), 0);
    assert_eq!(f.manager.get_goal(&added.id).unwrap().trigger_count, 0);
}

#[tokio::test(start_paused = true)]
async fn expired_goal_pauses_itself() {
    let dir = tempfile::tempdir().unwrap();
    let f = fixture(dir.path(), "<NoComment>", "quiet").await;

    let mut g = goal(&f.session_id, "short lived");
    g.timeout = Duration::from_secs(1);
    g.created_at = Utc::now() - chrono::Duration::seconds(10);
    let added = f.manager.add_goal(g).unwrap();
    f.manager.start();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    f.manager.stop().await;

    assert!(f.manager.get_goal(&added.id).unwrap().paused);
    assert_eq!(f.provider.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn goal_cap_enforced_at_max() {
    let dir = tempfile::tempdir().unwrap();
    let f = fixture(dir.path(), "<NoComment>", "quiet").await;

    for i in 0..10 {
        f.manager
            .add_goal(goal(&f.session_id, &format!("goal {i}")))
            .unwrap();
    }
    let err = f
        .manager
        .add_goal(goal(&f.session_id, "over the cap"))
        .unwrap_err();
    assert!(err.to_string().to_lowercase().contains("max"));

    // Active non-paused goals never exceed the cap.
    let active = f.manager.get_goals().iter().filter(|g| !g.paused).count();
    assert!(active <= 10);
}
