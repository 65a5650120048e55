//! End-to-end turn flows over scripted collaborators, on virtual time.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use talkover::{
    BackendError, ChatConfiguration, Conversation, ConversationTurnController, MemoryStore,
    MockBackend, Role, TurnDeps, TurnError, TurnPhase, TurnUpdate,
};
use talkover_capture::{
    ScriptedMicrophone, ScriptedRecognizer, UtteranceCaptureSession, UtteranceScript,
};
use talkover_foundation::AudioSessionArbiter;
use talkover_speech::{ScriptedSynthesizer, SpeechOutputCoordinator};

struct Harness {
    controller: ConversationTurnController,
    recognizer: Arc<ScriptedRecognizer>,
    mic: Arc<ScriptedMicrophone>,
    capture: Arc<UtteranceCaptureSession>,
    backend: Arc<MockBackend>,
    store: Arc<MemoryStore>,
    synth: Arc<ScriptedSynthesizer>,
    updates: broadcast::Receiver<TurnUpdate>,
}

fn harness(backend: MockBackend, config: ChatConfiguration) -> Harness {
    let recognizer = Arc::new(ScriptedRecognizer::new());
    let mic = Arc::new(ScriptedMicrophone::new());
    let arbiter = Arc::new(AudioSessionArbiter::noop());
    let capture = Arc::new(UtteranceCaptureSession::new(
        recognizer.clone(),
        mic.clone(),
        arbiter.clone(),
        config.capture_config(),
    ));
    let synth = Arc::new(ScriptedSynthesizer::default());
    let speech = Arc::new(SpeechOutputCoordinator::new(
        synth.clone(),
        arbiter,
        config.speech.clone(),
        config.release_grace,
    ));
    let backend = Arc::new(backend);
    let store = Arc::new(MemoryStore::new());
    let controller = ConversationTurnController::spawn(
        TurnDeps {
            capture: capture.clone(),
            speech,
            backend: backend.clone(),
            store: store.clone(),
        },
        config,
        Conversation::new("c1"),
    )
    .expect("controller spawns");
    let updates = controller.subscribe();
    Harness {
        controller,
        recognizer,
        mic,
        capture,
        backend,
        store,
        synth,
        updates,
    }
}

fn quiet_config() -> ChatConfiguration {
    ChatConfiguration {
        speak_replies: false,
        ..ChatConfiguration::default()
    }
}

async fn wait_phase(controller: &ConversationTurnController, phase: TurnPhase) {
    let mut rx = controller.phase();
    rx.wait_for(|p| *p == phase).await.expect("phase channel");
}

async fn next_matching(
    updates: &mut broadcast::Receiver<TurnUpdate>,
    matches: impl Fn(&TurnUpdate) -> bool,
) -> TurnUpdate {
    loop {
        let update = updates.recv().await.expect("updates channel");
        if matches(&update) {
            return update;
        }
    }
}

fn is_assistant_reply(update: &TurnUpdate) -> bool {
    matches!(update, TurnUpdate::MessageAppended(m) if m.role == Role::Assistant)
}

#[tokio::test(start_paused = true)]
async fn happy_path_voice_turn_commits_both_messages() {
    let mut h = harness(MockBackend::with_reply("Chào bạn!"), quiet_config());

    h.controller.begin_voice_turn().await.unwrap();
    wait_phase(&h.controller, TurnPhase::Listening).await;

    let stream = h.recognizer.next_stream().await;
    stream.partial("xin").await;
    stream.partial("xin chào").await;

    // Silence finalizes, the acknowledge delay elapses, the backend replies.
    next_matching(&mut h.updates, |u| matches!(u, TurnUpdate::TurnCompleted(_))).await;
    wait_phase(&h.controller, TurnPhase::Idle).await;

    let conversation = h.store.get("c1").expect("persisted");
    assert_eq!(conversation.messages.len(), 2);
    assert_eq!(conversation.messages[0].role, Role::User);
    assert_eq!(conversation.messages[0].text, "xin chào");
    assert_eq!(conversation.messages[1].role, Role::Assistant);
    assert_eq!(conversation.messages[1].text, "Chào bạn!");

    // The request carried the uncommitted voice input.
    let requests = h.backend.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].last().unwrap().text, "xin chào");
    drop(stream);
}

#[tokio::test(start_paused = true)]
async fn empty_utterance_reprompts_and_restarts_capture() {
    let h = harness(MockBackend::new(), quiet_config());

    h.controller.begin_voice_turn().await.unwrap();
    wait_phase(&h.controller, TurnPhase::Listening).await;
    let first = h.recognizer.next_stream().await;

    // Say nothing; the silence timer finalizes an empty transcript and the
    // controller loops back to prompting with a fresh session.
    let second = h.recognizer.next_stream().await;
    wait_phase(&h.controller, TurnPhase::Listening).await;
    assert_eq!(h.controller.metrics().snapshot().empty_utterances, 1);
    assert!(h.store.get("c1").is_none(), "no trace of the empty turn");

    h.controller.dismiss();
    wait_phase(&h.controller, TurnPhase::Idle).await;
    drop(first);
    drop(second);
}

#[tokio::test(start_paused = true)]
async fn permission_denial_surfaces_and_auto_dismisses() {
    let mut h = harness(MockBackend::new(), quiet_config());
    h.recognizer.deny_authorization();

    h.controller.begin_voice_turn().await.unwrap();
    let TurnUpdate::OverlayError(message) =
        next_matching(&mut h.updates, |u| matches!(u, TurnUpdate::OverlayError(_))).await
    else {
        unreachable!()
    };
    assert!(message.to_lowercase().contains("permission"));

    // Auto-dismiss after the configured delay; no capture session ever ran.
    wait_phase(&h.controller, TurnPhase::Idle).await;
    assert_eq!(h.capture.metrics().snapshot().sessions_started, 0);
    assert!(!h.mic.is_capturing());
    assert!(h.store.get("c1").is_none());
}

#[tokio::test(start_paused = true)]
async fn mid_listen_dismiss_cancels_without_finalizing() {
    let mut h = harness(MockBackend::new(), quiet_config());

    h.controller.begin_voice_turn().await.unwrap();
    wait_phase(&h.controller, TurnPhase::Listening).await;
    let stream = h.recognizer.next_stream().await;
    stream.partial("xin").await;
    next_matching(&mut h.updates, |u| {
        matches!(u, TurnUpdate::TranscriptChanged(t) if t == "xin")
    })
    .await;

    h.controller.dismiss();
    wait_phase(&h.controller, TurnPhase::Idle).await;
    // Let the session actor process the cancel.
    tokio::time::sleep(Duration::from_millis(10)).await;

    let capture_metrics = h.capture.metrics().snapshot();
    assert_eq!(capture_metrics.sessions_cancelled, 1);
    assert_eq!(capture_metrics.final_count, 0, "cancel suppresses finalize");
    assert!(h.store.get("c1").is_none(), "conversation unchanged");
    assert_eq!(h.backend.requests().len(), 0);
    drop(stream);
}

#[tokio::test(start_paused = true)]
async fn backend_failure_commits_nothing_for_voice() {
    let backend = MockBackend::new();
    backend.push_response(Err(BackendError::RequestFailed("timeout".into())));
    let mut h = harness(backend, quiet_config());

    h.controller.begin_voice_turn().await.unwrap();
    wait_phase(&h.controller, TurnPhase::Listening).await;
    let stream = h.recognizer.next_stream().await;
    stream.partial("xin chào").await;

    let TurnUpdate::ChatError(message) =
        next_matching(&mut h.updates, |u| matches!(u, TurnUpdate::ChatError(_))).await
    else {
        unreachable!()
    };
    assert!(message.contains("timeout"));

    wait_phase(&h.controller, TurnPhase::Idle).await;
    assert!(h.store.get("c1").is_none(), "failed voice turn leaves no trace");
    assert_eq!(h.controller.metrics().snapshot().backend_failures, 1);
    drop(stream);
}

#[tokio::test(start_paused = true)]
async fn suggestion_chip_bypasses_capture() {
    let mut h = harness(MockBackend::with_reply("Đã khóa thẻ giúp bạn."), quiet_config());

    h.controller.begin_voice_turn().await.unwrap();
    h.controller
        .select_suggestion("Tôi bị mất thẻ")
        .await
        .unwrap();

    next_matching(&mut h.updates, |u| matches!(u, TurnUpdate::TurnCompleted(_))).await;
    wait_phase(&h.controller, TurnPhase::Idle).await;

    let conversation = h.store.get("c1").unwrap();
    assert_eq!(conversation.messages[0].text, "Tôi bị mất thẻ");
    assert_eq!(conversation.messages[1].text, "Đã khóa thẻ giúp bạn.");
    // The chip's text went out; no transcript was ever finalized.
    assert_eq!(h.capture.metrics().snapshot().final_count, 0);
}

#[tokio::test(start_paused = true)]
async fn one_backend_call_in_flight_across_both_paths() {
    let backend = MockBackend::with_reply("ok").with_delay(Duration::from_secs(5));
    let mut h = harness(backend, quiet_config());

    h.controller.send_typed_text("first").await.unwrap();
    // Both entry points are gated while the call is out.
    assert!(matches!(
        h.controller.send_typed_text("second").await,
        Err(TurnError::Busy)
    ));
    assert!(matches!(
        h.controller.begin_voice_turn().await,
        Err(TurnError::Busy)
    ));
    assert_eq!(h.controller.metrics().snapshot().rejected_attempts, 2);

    next_matching(&mut h.updates, is_assistant_reply).await;
    // Gate reopens once the call resolves.
    h.controller.send_typed_text("third").await.unwrap();
    next_matching(&mut h.updates, is_assistant_reply).await;
    assert_eq!(h.backend.requests().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn typed_message_stays_in_history_on_backend_failure() {
    let backend = MockBackend::new();
    backend.push_response(Err(BackendError::RequestFailed("offline".into())));
    let mut h = harness(backend, quiet_config());

    h.controller.send_typed_text("hello").await.unwrap();
    next_matching(&mut h.updates, |u| matches!(u, TurnUpdate::ChatError(_))).await;

    // Typed input committed eagerly and survives the failure.
    let conversation = h.store.get("c1").unwrap();
    assert_eq!(conversation.messages.len(), 1);
    assert_eq!(conversation.messages[0].role, Role::User);
    assert_eq!(conversation.messages[0].text, "hello");
}

#[tokio::test(start_paused = true)]
async fn typed_success_appends_reply() {
    let mut h = harness(MockBackend::with_reply("hi there"), quiet_config());

    h.controller.send_typed_text("hello").await.unwrap();
    next_matching(&mut h.updates, is_assistant_reply).await;

    let conversation = h.store.get("c1").unwrap();
    assert_eq!(conversation.messages.len(), 2);
    assert_eq!(conversation.messages[1].text, "hi there");
    // Typed turns never open the overlay.
    assert_eq!(*h.controller.phase().borrow(), TurnPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn empty_typed_text_is_rejected() {
    let h = harness(MockBackend::new(), quiet_config());
    assert!(matches!(
        h.controller.send_typed_text("   ").await,
        Err(TurnError::EmptyInput)
    ));
    assert_eq!(h.backend.requests().len(), 0);
}

#[tokio::test(start_paused = true)]
async fn second_voice_turn_rejected_while_overlay_open() {
    let h = harness(MockBackend::new(), quiet_config());
    h.controller.begin_voice_turn().await.unwrap();
    wait_phase(&h.controller, TurnPhase::Listening).await;
    let stream = h.recognizer.next_stream().await;

    assert!(matches!(
        h.controller.begin_voice_turn().await,
        Err(TurnError::Busy)
    ));

    h.controller.dismiss();
    wait_phase(&h.controller, TurnPhase::Idle).await;
    drop(stream);
}

#[tokio::test(start_paused = true)]
async fn late_start_after_dismiss_is_cancelled() {
    let h = harness(MockBackend::new(), quiet_config());
    // Keep the permission dialog "open" long enough to dismiss first.
    h.recognizer
        .set_authorization_delay(Duration::from_millis(500));

    h.controller.begin_voice_turn().await.unwrap();
    h.controller.dismiss();
    wait_phase(&h.controller, TurnPhase::Idle).await;

    // Let the permission pipeline land; its session must be torn down, not
    // resurrect the dismissed overlay.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(*h.controller.phase().borrow(), TurnPhase::Idle);
    let capture_metrics = h.capture.metrics().snapshot();
    assert_eq!(capture_metrics.sessions_started, 1);
    assert_eq!(capture_metrics.sessions_cancelled, 1);
    assert!(!h.mic.is_capturing());
}

#[tokio::test(start_paused = true)]
async fn recognizer_failure_offers_recovered_text_and_dismisses() {
    let mut h = harness(MockBackend::new(), quiet_config());

    h.controller.begin_voice_turn().await.unwrap();
    wait_phase(&h.controller, TurnPhase::Listening).await;
    let stream = h.recognizer.next_stream().await;
    stream.partial("tôi muốn").await;
    next_matching(&mut h.updates, |u| {
        matches!(u, TurnUpdate::TranscriptChanged(t) if t == "tôi muốn")
    })
    .await;

    stream.error("engine died").await;
    // The caught text is re-surfaced for retry, then the overlay errors out.
    next_matching(&mut h.updates, |u| {
        matches!(u, TurnUpdate::TranscriptChanged(t) if t == "tôi muốn")
    })
    .await;
    next_matching(&mut h.updates, |u| matches!(u, TurnUpdate::OverlayError(_))).await;
    wait_phase(&h.controller, TurnPhase::Idle).await;
    assert!(h.store.get("c1").is_none());
    drop(stream);
}

#[tokio::test(start_paused = true)]
async fn voice_command_clears_conversation_without_backend() {
    let mut h = harness(MockBackend::new(), quiet_config());

    // Seed some history through the typed path.
    h.controller.send_typed_text("hello").await.unwrap();
    next_matching(&mut h.updates, is_assistant_reply).await;
    assert_eq!(h.store.get("c1").unwrap().messages.len(), 2);
    let prior_requests = h.backend.requests().len();

    h.controller.begin_voice_turn().await.unwrap();
    wait_phase(&h.controller, TurnPhase::Listening).await;
    let stream = h.recognizer.next_stream().await;
    stream.final_text("xóa hội thoại").await;

    next_matching(&mut h.updates, |u| {
        matches!(u, TurnUpdate::ConversationCleared)
    })
    .await;
    wait_phase(&h.controller, TurnPhase::Idle).await;

    assert!(h.store.get("c1").unwrap().messages.is_empty());
    assert_eq!(h.backend.requests().len(), prior_requests, "command bypassed the backend");
    drop(stream);
}

#[tokio::test(start_paused = true)]
async fn successful_voice_turn_speaks_reply_when_enabled() {
    let config = ChatConfiguration {
        speak_replies: true,
        ..ChatConfiguration::default()
    };
    let mut h = harness(MockBackend::with_reply("Chào bạn!"), config);

    h.controller.begin_voice_turn().await.unwrap();
    wait_phase(&h.controller, TurnPhase::Listening).await;
    let stream = h.recognizer.next_stream().await;
    stream.final_text("xin chào").await;

    next_matching(&mut h.updates, |u| {
        matches!(u, TurnUpdate::SpeakingReply { .. })
    })
    .await;
    wait_phase(&h.controller, TurnPhase::Idle).await;
    assert_eq!(h.synth.spoken_texts(), vec!["Chào bạn!".to_string()]);
    drop(stream);
}

#[tokio::test(start_paused = true)]
async fn immediate_final_during_start_handoff_still_completes() {
    // A recognizer that answers instantly can deliver its final before the
    // controller has processed the start outcome; the event must be held and
    // replayed, not dropped as stale. Repeat to cover both arrival orders of
    // the unbiased event loop.
    for _ in 0..10 {
        let mut h = harness(MockBackend::with_reply("ok"), quiet_config());
        h.recognizer.push_script(UtteranceScript {
            partials: Vec::new(),
            final_text: Some("xin chào".to_string()),
            gap: Duration::ZERO,
        });
        h.controller.begin_voice_turn().await.unwrap();

        let completed = tokio::time::timeout(
            Duration::from_secs(30),
            next_matching(&mut h.updates, |u| matches!(u, TurnUpdate::TurnCompleted(_))),
        )
        .await;
        assert!(completed.is_ok(), "final was lost during the handoff");
        wait_phase(&h.controller, TurnPhase::Idle).await;
        assert_eq!(h.store.get("c1").unwrap().messages.len(), 2);
        h.controller.shutdown();
    }
}

#[tokio::test(start_paused = true)]
async fn swapped_backend_serves_subsequent_turns() {
    let mut h = harness(MockBackend::with_reply("from old"), quiet_config());
    let replacement = Arc::new(MockBackend::with_reply("from new").named("replacement"));

    h.controller.swap_backend(replacement.clone());
    h.controller.send_typed_text("hello").await.unwrap();
    next_matching(&mut h.updates, is_assistant_reply).await;

    assert_eq!(h.backend.requests().len(), 0);
    assert_eq!(replacement.requests().len(), 1);
    assert_eq!(h.store.get("c1").unwrap().messages[1].text, "from new");
}

#[tokio::test(start_paused = true)]
async fn apply_configuration_swaps_suggestions() {
    let mut h = harness(MockBackend::new(), quiet_config());

    h.controller.apply_configuration(ChatConfiguration {
        suggestions: vec!["Kiểm tra số dư".to_string()],
        speak_replies: false,
        ..ChatConfiguration::default()
    });
    h.controller.begin_voice_turn().await.unwrap();

    let TurnUpdate::Suggestions(chips) =
        next_matching(&mut h.updates, |u| matches!(u, TurnUpdate::Suggestions(_))).await
    else {
        unreachable!()
    };
    assert_eq!(chips, vec!["Kiểm tra số dư".to_string()]);

    h.controller.dismiss();
    wait_phase(&h.controller, TurnPhase::Idle).await;
}
