//! End-to-end voice turn over scripted engines.
//!
//! Runs one complete exchange: the scripted recognizer plays back a short
//! Vietnamese utterance, trailing silence finalizes it, the mock backend
//! answers, and the scripted synthesizer "speaks" the reply. Run with
//! `cargo run -p talkover --example voice_demo`.

use std::sync::Arc;
use std::time::Duration;

use talkover::{
    ChatConfiguration, Conversation, ConversationTurnController, MemoryStore, MockBackend,
    TurnDeps, TurnPhase, TurnUpdate,
};
use talkover_capture::{
    ScriptedMicrophone, ScriptedRecognizer, UtteranceCaptureSession, UtteranceScript,
};
use talkover_foundation::AudioSessionArbiter;
use talkover_speech::{ScriptedSynthesizer, SpeechOutputCoordinator};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_target(true).init();

    let config = ChatConfiguration {
        suggestions: vec![
            "Tôi bị mất thẻ".to_string(),
            "Kiểm tra số dư".to_string(),
        ],
        ..ChatConfiguration::default()
    };

    let recognizer = Arc::new(ScriptedRecognizer::with_scripts([UtteranceScript {
        partials: vec![
            "xin".to_string(),
            "xin chào".to_string(),
            "xin chào trợ lý".to_string(),
        ],
        final_text: None,
        gap: Duration::from_millis(400),
    }]));
    let mic = Arc::new(ScriptedMicrophone::new());
    let arbiter = Arc::new(AudioSessionArbiter::noop());
    let capture = Arc::new(UtteranceCaptureSession::new(
        recognizer,
        mic.clone(),
        arbiter.clone(),
        config.capture_config(),
    ));
    let speech = Arc::new(SpeechOutputCoordinator::new(
        Arc::new(ScriptedSynthesizer::default()),
        arbiter,
        config.speech.clone(),
        config.release_grace,
    ));
    let backend = Arc::new(MockBackend::with_reply(
        "Chào bạn! Tôi có thể giúp gì cho bạn hôm nay?",
    ));
    let store = Arc::new(MemoryStore::new());

    let controller = ConversationTurnController::spawn(
        TurnDeps {
            capture,
            speech,
            backend,
            store: store.clone(),
        },
        config,
        Conversation::new("demo"),
    )?;

    let mut updates = controller.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(update) = updates.recv().await {
            match update {
                TurnUpdate::PhaseChanged(phase) => println!("phase: {phase:?}"),
                TurnUpdate::Suggestions(chips) => println!("suggestions: {chips:?}"),
                TurnUpdate::TranscriptChanged(text) => println!("transcript: {text:?}"),
                TurnUpdate::MessageAppended(message) => {
                    println!("message [{:?}]: {}", message.role, message.text)
                }
                TurnUpdate::SpeakingReply { text } => println!("speaking: {text}"),
                TurnUpdate::TurnCompleted(turn) => println!("turn completed: {:?}", turn.status),
                other => println!("update: {other:?}"),
            }
        }
    });

    controller.begin_voice_turn().await?;

    // Drive the level meter with a fake mic while the script plays.
    let feeder = tokio::spawn(async move {
        let frame: Vec<i16> = (0..320).map(|i| ((i % 64) as i16 - 32) * 400).collect();
        while !mic.is_capturing() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        while mic.feed(&frame) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    });

    // Wait out listening, silence detection, acknowledge and the backend.
    let mut phase = controller.phase();
    phase.wait_for(|p| *p != TurnPhase::Idle).await?;
    phase.wait_for(|p| *p == TurnPhase::Idle).await?;
    feeder.await?;

    if let Some(conversation) = store.get("demo") {
        println!("--- persisted conversation ---");
        for message in &conversation.messages {
            println!("[{:?}] {}", message.role, message.text);
        }
    }

    controller.shutdown();
    drop(printer);
    Ok(())
}
