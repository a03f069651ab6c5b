//! End-to-end session lifecycle against the mock audio platform and connector.
//!
//! Every test runs on a paused tokio clock, so retry backoff and connect
//! timeouts complete instantly while elapsed time stays exact.

use livevox::audio::MockAudioPlatform;
use livevox::codec::{EncodedPayload, encode};
use livevox::error::{ErrorKind, LivevoxError};
use livevox::language::Language;
use livevox::session::{
    SessionCommand, SessionConfig, SessionManager, SessionState, SessionStatus,
};
use livevox::transport::{ClientMessage, ConnectOutcome, MockConnector, ServerEvent};
use livevox::widget::WidgetView;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, timeout};

const LIMIT: Duration = Duration::from_secs(120);

fn config() -> SessionConfig {
    SessionConfig {
        api_key: Some("test-key".to_string()),
        ..SessionConfig::default()
    }
}

fn manager(platform: &MockAudioPlatform, connector: &MockConnector) -> SessionManager {
    SessionManager::new(
        Arc::new(platform.clone()),
        Arc::new(connector.clone()),
        config(),
    )
}

async fn drive_until(
    manager: &mut SessionManager,
    what: &str,
    done: impl Fn(&SessionManager) -> bool,
) {
    let reached = timeout(LIMIT, async {
        while !done(manager) {
            manager.step().await;
        }
    })
    .await
    .is_ok();
    assert!(reached, "timed out waiting for {what} (state {})", manager.state());
}

async fn drive_to(manager: &mut SessionManager, state: SessionState) {
    drive_until(manager, state.as_str(), |m| m.state() == state).await;
}

/// No signal arrives within `wait`.
async fn assert_quiet(manager: &mut SessionManager, wait: Duration) {
    assert!(
        timeout(wait, manager.step()).await.is_err(),
        "unexpected background activity in state {}",
        manager.state()
    );
}

fn assert_released(platform: &MockAudioPlatform) {
    assert!(platform.all_contexts_closed(), "audio contexts left open");
    assert_eq!(platform.live_microphones(), 0, "microphone still held");
}

async fn active_session() -> (MockAudioPlatform, MockConnector, SessionManager) {
    let platform = MockAudioPlatform::new();
    let connector = MockConnector::new();
    let mut manager = manager(&platform, &connector);
    manager.start().unwrap();
    drive_to(&mut manager, SessionState::Active).await;
    (platform, connector, manager)
}

fn audio_chunk(seconds: f64) -> ServerEvent {
    let samples = vec![0.1f32; (24_000.0 * seconds) as usize];
    ServerEvent::Audio(encode(&samples, 24_000))
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

#[tokio::test(start_paused = true)]
async fn start_reaches_active_and_captures() {
    let (platform, connector, manager) = active_session().await;

    assert!(manager.is_capturing());
    assert_eq!(platform.acquisitions(), 1);
    assert_eq!(platform.live_microphones(), 1);
    assert_eq!(platform.open_context_count(), 2);
    assert_eq!(connector.accepted(), 1);

    let request = &connector.requests()[0];
    assert_eq!(request.api_key, "test-key");
    assert_eq!(request.language, Language::En);
    assert_eq!(request.input_sample_rate, 16_000);
    assert_eq!(request.output_sample_rate, 24_000);

    let constraints = platform.last_constraints().unwrap();
    assert_eq!(constraints.sample_rate, 16_000);
    assert_eq!(constraints.channels, 1);
    assert!(constraints.echo_cancellation);

    assert_eq!(WidgetView::from_status(&manager.status()), WidgetView::Listening);
}

#[tokio::test(start_paused = true)]
async fn captured_audio_reaches_the_remote_in_whole_frames() {
    let (platform, connector, _manager) = active_session().await;

    assert!(platform.feed_microphone(&[0.25; 2048]));
    assert!(platform.feed_microphone(&[0.25; 1000]));

    let sent = connector.with_remote(0, |remote| remote.drain()).unwrap();
    assert_eq!(sent.len(), 1);
    let ClientMessage::Media(payload) = &sent[0];
    assert_eq!(payload.mime_type, "audio/pcm;rate=16000");
    assert_eq!(payload.data.len(), 2048 * 2);

    // The remainder completes the second frame.
    assert!(platform.feed_microphone(&[0.25; 1048]));
    let sent = connector.with_remote(0, |remote| remote.drain()).unwrap();
    assert_eq!(sent.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn response_audio_plays_back_to_back() {
    let (platform, connector, mut manager) = active_session().await;

    for _ in 0..3 {
        assert!(connector.send_latest(audio_chunk(0.1)));
        manager.step().await;
    }

    let scheduled = platform.scheduled_playbacks();
    assert_eq!(scheduled.len(), 3);
    assert_close(scheduled[0].0, 0.0);
    assert_close(scheduled[1].0, scheduled[0].0 + scheduled[0].1);
    assert_close(scheduled[2].0, scheduled[1].0 + scheduled[1].1);
    assert_eq!(manager.scheduled_playback(), 3);

    // A unit that ends on its own is forgotten.
    assert!(platform.finish_playback(0));
    manager.step().await;
    assert_eq!(manager.scheduled_playback(), 2);

    // A late chunk after the queue drained starts at the current time.
    platform.clock().set(5.0);
    assert!(connector.send_latest(audio_chunk(0.1)));
    manager.step().await;
    assert_close(platform.scheduled_playbacks()[3].0, 5.0);
}

#[tokio::test(start_paused = true)]
async fn barge_in_stops_playback_and_resets_the_cursor() {
    let (platform, connector, mut manager) = active_session().await;

    for _ in 0..3 {
        assert!(connector.send_latest(audio_chunk(0.5)));
        manager.step().await;
    }
    assert_eq!(manager.scheduled_playback(), 3);

    platform.clock().set(0.2);
    assert!(connector.send_latest(ServerEvent::Interrupted));
    manager.step().await;

    assert_eq!(platform.stopped_playback_count(), 3);
    assert_eq!(manager.scheduled_playback(), 0);
    assert_eq!(manager.state(), SessionState::Active);
    // Stopped units never report a natural end.
    assert!(!platform.finish_playback(1));

    assert!(connector.send_latest(audio_chunk(0.5)));
    manager.step().await;
    assert_close(platform.scheduled_playbacks()[3].0, 0.2);
}

#[tokio::test(start_paused = true)]
async fn malformed_response_audio_is_dropped() {
    let (platform, connector, mut manager) = active_session().await;

    let odd = EncodedPayload::new(vec![1, 2, 3], "audio/pcm;rate=24000");
    assert!(connector.send_latest(ServerEvent::Audio(odd)));
    manager.step().await;

    assert_eq!(manager.state(), SessionState::Active);
    assert!(platform.scheduled_playbacks().is_empty());
    assert_eq!(manager.status().error, None);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_back_off_linearly_then_stop() {
    let platform = MockAudioPlatform::new();
    let connector =
        MockConnector::new().with_fallback(ConnectOutcome::Fail(ErrorKind::TransientConnection));
    let mut manager = manager(&platform, &connector);
    manager.start().unwrap();

    for attempt in 1..=3u32 {
        drive_until(&mut manager, "retrying", |m| {
            m.state() == SessionState::ErrorRetrying && m.status().attempt == attempt
        })
        .await;
        let status = manager.status();
        let delay = Duration::from_secs(2 * u64::from(attempt));
        assert_eq!(status.retry_delay, Some(delay));
        assert_eq!(status.error, Some(ErrorKind::TransientConnection));
        assert_released(&platform);

        let waiting = Instant::now();
        drive_to(&mut manager, SessionState::Connecting).await;
        let waited = waiting.elapsed();
        assert!(
            waited >= delay && waited < delay + Duration::from_millis(50),
            "attempt {attempt} waited {waited:?}"
        );
    }

    drive_to(&mut manager, SessionState::ErrorTerminal).await;
    assert_eq!(connector.connection_attempts(), 4);
    assert_eq!(manager.status().attempt, 3);
    assert_released(&platform);

    // No further attempts happen on their own.
    assert_quiet(&mut manager, Duration::from_secs(60)).await;
    assert_eq!(connector.connection_attempts(), 4);
}

#[tokio::test(start_paused = true)]
async fn permission_denied_is_terminal_without_retries() {
    let platform = MockAudioPlatform::new().with_acquire_failure(ErrorKind::PermissionDenied);
    let connector = MockConnector::new();
    let mut manager = manager(&platform, &connector);
    manager.start().unwrap();

    drive_to(&mut manager, SessionState::ErrorTerminal).await;
    let status = manager.status();
    assert_eq!(status.error, Some(ErrorKind::PermissionDenied));
    assert_eq!(status.attempt, 0);
    assert_eq!(
        status.message.as_deref(),
        Some(ErrorKind::PermissionDenied.user_message())
    );
    assert_eq!(connector.connection_attempts(), 0);
    assert_released(&platform);

    assert_quiet(&mut manager, Duration::from_secs(30)).await;
    assert_eq!(platform.acquisitions(), 1);
}

#[tokio::test(start_paused = true)]
async fn busy_microphone_is_terminal() {
    let platform = MockAudioPlatform::new().with_acquire_failure(ErrorKind::DeviceBusy);
    let connector = MockConnector::new();
    let mut manager = manager(&platform, &connector);
    manager.start().unwrap();

    drive_to(&mut manager, SessionState::ErrorTerminal).await;
    assert_eq!(manager.status().error, Some(ErrorKind::DeviceBusy));
    assert_released(&platform);
}

#[tokio::test(start_paused = true)]
async fn rejected_credential_is_terminal_and_manual_retry_starts_over() {
    let platform = MockAudioPlatform::new();
    let connector = MockConnector::new().with_script([ConnectOutcome::Fail(ErrorKind::AuthRejected)]);
    let mut manager = manager(&platform, &connector);
    manager.start().unwrap();

    drive_to(&mut manager, SessionState::ErrorTerminal).await;
    assert_eq!(manager.status().error, Some(ErrorKind::AuthRejected));
    assert_eq!(connector.connection_attempts(), 1);
    assert_released(&platform);

    manager.handle_command(SessionCommand::Retry);
    assert_eq!(manager.state(), SessionState::Connecting);
    assert_eq!(manager.status().attempt, 0);
    drive_to(&mut manager, SessionState::Active).await;
    assert_eq!(connector.connection_attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn second_start_is_refused_without_acquiring_again() {
    let platform = MockAudioPlatform::new();
    let connector = MockConnector::new();
    let mut manager = manager(&platform, &connector);
    manager.start().unwrap();

    assert!(matches!(
        manager.start(),
        Err(LivevoxError::SessionAlreadyActive { .. })
    ));
    drive_to(&mut manager, SessionState::Active).await;
    assert!(matches!(
        manager.start(),
        Err(LivevoxError::SessionAlreadyActive { .. })
    ));

    assert_eq!(platform.acquisitions(), 1);
    assert_eq!(platform.input_contexts_opened(), 1);
    assert_eq!(platform.output_contexts_opened(), 1);
    assert_eq!(connector.connection_attempts(), 1);
    assert_eq!(manager.state(), SessionState::Active);
}

#[tokio::test(start_paused = true)]
async fn stop_releases_everything_and_is_idempotent() {
    let (platform, connector, mut manager) = active_session().await;
    let generation = manager.generation();

    manager.stop();
    assert_eq!(manager.state(), SessionState::Idle);
    assert!(!manager.is_capturing());
    assert_released(&platform);
    assert!(connector.with_remote(0, |remote| remote.is_closed_by_client()).unwrap());
    assert!(manager.generation() > generation);

    let status = manager.status();
    manager.stop();
    manager.handle_command(SessionCommand::Stop);
    assert_eq!(manager.status(), status);
    assert_released(&platform);
    assert!(!platform.feed_microphone(&[0.0; 2048]));
}

#[tokio::test(start_paused = true)]
async fn stop_while_connecting_releases_the_microphone() {
    let platform = MockAudioPlatform::new();
    let connector = MockConnector::new().with_delay(Duration::from_secs(5));
    let mut manager = manager(&platform, &connector);
    manager.start().unwrap();

    // Let the microphone be acquired while the handshake is pending.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(platform.live_microphones(), 1);

    // Released by stop itself, not by the aborted connect task.
    manager.stop();
    assert_eq!(manager.state(), SessionState::Idle);
    assert_released(&platform);

    assert_quiet(&mut manager, Duration::from_secs(30)).await;
    assert_eq!(connector.accepted(), 0);
}

#[tokio::test(start_paused = true)]
async fn signals_from_a_stopped_session_are_ignored() {
    let platform = MockAudioPlatform::new();
    let connector =
        MockConnector::new().with_fallback(ConnectOutcome::Fail(ErrorKind::TransientConnection));
    let mut manager = manager(&platform, &connector);
    manager.start().unwrap();

    // The failure is posted but not yet handled when the user stops.
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(connector.connection_attempts(), 1);
    manager.stop();

    manager.step().await;
    assert_eq!(manager.state(), SessionState::Idle);
    assert_eq!(manager.status().error, None);
    assert_quiet(&mut manager, Duration::from_secs(30)).await;
}

#[tokio::test(start_paused = true)]
async fn missing_credential_refuses_to_start() {
    let platform = MockAudioPlatform::new();
    let connector = MockConnector::new();
    let mut manager = SessionManager::new(
        Arc::new(platform.clone()),
        Arc::new(connector.clone()),
        SessionConfig::default(),
    );

    assert!(matches!(
        manager.start(),
        Err(LivevoxError::MissingCredential)
    ));
    assert_eq!(manager.state(), SessionState::Idle);
    assert_eq!(manager.status().error, Some(ErrorKind::MissingCredential));
    assert_eq!(platform.acquisitions(), 0);
    assert_eq!(platform.input_contexts_opened(), 0);
    assert_eq!(connector.connection_attempts(), 0);

    match WidgetView::from_status(&manager.status()) {
        WidgetView::IdleBubble { notice: Some(_) } => {}
        other => panic!("expected a notice on the bubble, got {other:?}"),
    }

    // Dismissing clears the notice.
    manager.stop();
    assert_eq!(manager.status().error, None);
}

#[tokio::test(start_paused = true)]
async fn connect_timeout_counts_as_transient() {
    let platform = MockAudioPlatform::new();
    let connector = MockConnector::new().with_fallback(ConnectOutcome::Hang);
    let mut manager = manager(&platform, &connector);
    let started = Instant::now();
    manager.start().unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(platform.live_microphones(), 1);

    drive_to(&mut manager, SessionState::ErrorRetrying).await;
    let waited = started.elapsed();
    assert!(
        waited >= Duration::from_secs(10) && waited < Duration::from_secs(11),
        "timed out after {waited:?}"
    );
    assert_eq!(manager.status().error, Some(ErrorKind::TransientConnection));
    assert_eq!(manager.status().attempt, 1);
    assert_released(&platform);
}

#[tokio::test(start_paused = true)]
async fn losing_the_microphone_while_active_is_terminal() {
    let (platform, connector, mut manager) = active_session().await;

    assert!(platform.fail_microphone(ErrorKind::DeviceUnavailable));
    drive_to(&mut manager, SessionState::ErrorTerminal).await;

    let status = manager.status();
    assert_eq!(status.error, Some(ErrorKind::DeviceUnavailable));
    assert_eq!(status.attempt, 0);
    assert!(!manager.is_capturing());
    assert_released(&platform);
    assert_eq!(
        connector.with_remote(0, |remote| remote.is_closed_by_client()),
        Some(true)
    );

    assert_quiet(&mut manager, Duration::from_secs(30)).await;
    assert_eq!(platform.acquisitions(), 1);
}

#[tokio::test(start_paused = true)]
async fn losing_the_output_device_while_connecting_is_terminal() {
    let platform = MockAudioPlatform::new();
    let connector = MockConnector::new().with_delay(Duration::from_secs(5));
    let mut manager = manager(&platform, &connector);
    manager.start().unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(platform.fail_output(ErrorKind::DeviceUnavailable));
    drive_to(&mut manager, SessionState::ErrorTerminal).await;
    assert_eq!(manager.status().error, Some(ErrorKind::DeviceUnavailable));
    assert_released(&platform);

    assert_quiet(&mut manager, Duration::from_secs(30)).await;
    assert_eq!(connector.accepted(), 0);
}

#[tokio::test(start_paused = true)]
async fn remote_close_returns_to_idle() {
    let (platform, connector, mut manager) = active_session().await;

    assert!(connector.send_latest(ServerEvent::Closed {
        reason: Some("session ended".to_string()),
    }));
    manager.step().await;

    assert_eq!(manager.state(), SessionState::Idle);
    assert_eq!(manager.status().error, None);
    assert_released(&platform);
}

#[tokio::test(start_paused = true)]
async fn dropped_connection_reconnects_and_keeps_the_attempt_count() {
    let (platform, connector, mut manager) = active_session().await;

    assert!(connector.send_latest(ServerEvent::Failed(LivevoxError::TransientConnection {
        message: "connection reset".to_string(),
    })));
    manager.step().await;
    assert_eq!(manager.state(), SessionState::ErrorRetrying);
    assert_released(&platform);

    drive_to(&mut manager, SessionState::Active).await;
    assert_eq!(connector.accepted(), 2);
    assert_eq!(manager.status().attempt, 1);
    assert_eq!(platform.live_microphones(), 1);
}

#[tokio::test(start_paused = true)]
async fn language_switch_tears_down_and_next_start_uses_it() {
    let (platform, connector, mut manager) = active_session().await;

    manager.set_language(Language::De);
    assert_eq!(manager.state(), SessionState::Idle);
    assert_eq!(manager.language(), Language::De);
    assert_eq!(manager.status().language, Language::De);
    assert_released(&platform);
    assert!(connector.with_remote(0, |remote| remote.is_closed_by_client()).unwrap());

    manager.start().unwrap();
    drive_to(&mut manager, SessionState::Active).await;
    let requests = connector.requests();
    assert_eq!(requests[1].language, Language::De);
    assert_ne!(requests[0].instructions, requests[1].instructions);
}

#[tokio::test(start_paused = true)]
async fn selecting_the_same_language_changes_nothing() {
    let (_platform, _connector, mut manager) = active_session().await;
    let generation = manager.generation();

    manager.handle_command(SessionCommand::SetLanguage(Language::En));
    assert_eq!(manager.state(), SessionState::Active);
    assert_eq!(manager.generation(), generation);
}

#[tokio::test(start_paused = true)]
async fn subscribers_see_each_state() {
    let platform = MockAudioPlatform::new();
    let connector = MockConnector::new();
    let mut manager = manager(&platform, &connector);
    let mut status = manager.subscribe();
    assert_eq!(status.borrow_and_update().state, SessionState::Idle);

    manager.start().unwrap();
    assert!(status.has_changed().unwrap());
    assert_eq!(status.borrow_and_update().state, SessionState::Connecting);

    drive_to(&mut manager, SessionState::Active).await;
    let seen: SessionStatus = status.borrow_and_update().clone();
    assert_eq!(seen.state, SessionState::Active);
    assert_eq!(seen, manager.status());
}

#[tokio::test(start_paused = true)]
async fn run_processes_commands_until_the_channel_closes() {
    let platform = MockAudioPlatform::new();
    let connector = MockConnector::new();
    let manager = manager(&platform, &connector);
    let mut status = manager.subscribe();
    let (commands, rx) = tokio::sync::mpsc::unbounded_channel();
    let driver = tokio::spawn(manager.run(rx));

    commands.send(SessionCommand::Start).unwrap();
    let reached = timeout(LIMIT, status.wait_for(|s| s.state == SessionState::Active))
        .await
        .map(|seen| seen.is_ok());
    assert_eq!(reached, Ok(true));
    assert_eq!(platform.live_microphones(), 1);

    drop(commands);
    driver.await.unwrap();
    assert_released(&platform);
}
