//! Seeking behavior, while playing and while paused.

mod common;

use common::{
    manual_sink, pump_until, sample_value, wait_until, Event, RecordingObserver,
    SyntheticDecoder, PUMP_TIMEOUT,
};
use gapless::{PlaybackState, Player};

const PULL: usize = 1024;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn seek_while_playing_repositions_the_stream() {
    init_logging();
    let (sink, handle) = manual_sink();
    let player = Player::new(sink).unwrap();

    player
        .enqueue(Box::new(SyntheticDecoder::new(44100.0, 2, 441_000)))
        .unwrap();
    player.play().unwrap();
    assert!(wait_until(PUMP_TIMEOUT, || handle.is_running()));

    // Let roughly 100k frames render, then jump to frame 200k.
    assert!(pump_until(&handle, PULL, PUMP_TIMEOUT, || {
        player
            .playback_position()
            .map(|p| p.current_frame >= 100_000)
            .unwrap_or(false)
    }));
    assert!(player.supports_seeking());
    player.seek_to_frame(200_000).unwrap();

    // The seek executes on the decoding thread; once it lands the position
    // jumps to the target.
    assert!(pump_until(&handle, PULL, PUMP_TIMEOUT, || {
        player
            .playback_position()
            .map(|p| (200_000..250_000).contains(&p.current_frame))
            .unwrap_or(false)
    }));

    // The samples coming out of the sink belong to the seek target, not to
    // the pre-seek read-ahead.
    let position = player.playback_position().unwrap().current_frame;
    let mut verified = false;
    for _ in 0..200 {
        let before = player.playback_position().unwrap().current_frame;
        if let Some((output, outcome)) = handle.render(PULL) {
            if !outcome.is_silence {
                let first = output.channel_f32(0)[0];
                assert_eq!(first, sample_value(before, 0));
                verified = true;
                break;
            }
        }
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
    assert!(verified, "no audible pull after the seek (position {position})");
}

#[test]
fn seek_while_paused_updates_position_without_starting() {
    init_logging();
    let (sink, handle) = manual_sink();
    let player = Player::new(sink).unwrap();

    player
        .enqueue(Box::new(SyntheticDecoder::new(44100.0, 2, 441_000)))
        .unwrap();
    player.play().unwrap();
    assert!(wait_until(PUMP_TIMEOUT, || handle.is_running()));
    assert!(pump_until(&handle, PULL, PUMP_TIMEOUT, || {
        player
            .playback_position()
            .map(|p| p.current_frame >= 10_000)
            .unwrap_or(false)
    }));

    player.pause().unwrap();
    assert!(!handle.is_running());

    player.seek_to_frame(300_000).unwrap();
    assert!(wait_until(PUMP_TIMEOUT, || {
        player
            .playback_position()
            .map(|p| p.current_frame == 300_000)
            .unwrap_or(false)
    }));

    // Still paused; the sink did not restart.
    assert!(!handle.is_running());
    assert_eq!(player.playback_state(), PlaybackState::Paused);

    player.resume().unwrap();
    assert!(pump_until(&handle, PULL, PUMP_TIMEOUT, || {
        player
            .playback_position()
            .map(|p| p.current_frame > 300_000)
            .unwrap_or(false)
    }));
}

#[test]
fn seek_variants_reduce_to_frames() {
    init_logging();
    let (sink, handle) = manual_sink();
    let player = Player::new(sink).unwrap();

    player
        .enqueue(Box::new(SyntheticDecoder::new(44100.0, 2, 441_000)))
        .unwrap();
    player.play().unwrap();
    assert!(wait_until(PUMP_TIMEOUT, || handle.is_running()));

    // 5 seconds at 44.1 kHz.
    player.seek_to_time(5.0).unwrap();
    assert!(pump_until(&handle, PULL, PUMP_TIMEOUT, || {
        player
            .playback_position()
            .map(|p| (220_500..260_000).contains(&p.current_frame))
            .unwrap_or(false)
    }));

    // Halfway through a 10-second track.
    player.seek_to_position(0.5).unwrap();
    assert!(pump_until(&handle, PULL, PUMP_TIMEOUT, || {
        player
            .playback_position()
            .map(|p| (220_500..260_000).contains(&p.current_frame))
            .unwrap_or(false)
    }));

    // Backward from there.
    player.seek_backward(3.0).unwrap();
    assert!(pump_until(&handle, PULL, PUMP_TIMEOUT, || {
        player
            .playback_position()
            .map(|p| (80_000..200_000).contains(&p.current_frame))
            .unwrap_or(false)
    }));
}

#[test]
fn seek_rejections() {
    init_logging();
    let (sink, handle) = manual_sink();
    let player = Player::new(sink).unwrap();

    // Nothing active.
    assert!(player.seek_to_frame(1000).is_err());
    assert!(!player.supports_seeking());

    player
        .enqueue(Box::new(SyntheticDecoder::new(44100.0, 2, 44_100).unseekable()))
        .unwrap();
    player.play().unwrap();
    assert!(wait_until(PUMP_TIMEOUT, || handle.is_running()));

    // The active decoder refuses to seek.
    assert!(!player.supports_seeking());
    assert!(player.seek_to_frame(1000).is_err());

    // Negative targets are rejected outright.
    assert!(player.seek_to_frame(-5).is_err());
}

#[test]
fn seek_into_a_buffered_next_track_abandons_the_current_one() {
    init_logging();
    let (sink, handle) = manual_sink();
    let player = Player::new(sink).unwrap();
    let observer = RecordingObserver::new();
    player.set_observer(observer.clone());

    // Both tracks fit in the default ring buffer, so B is fully buffered
    // while A is still rendering.
    let a = player
        .enqueue(Box::new(SyntheticDecoder::new(44100.0, 2, 8_000)))
        .unwrap();
    let b = player
        .enqueue(Box::new(SyntheticDecoder::new(44100.0, 2, 8_000)))
        .unwrap();

    player.play().unwrap();
    assert!(wait_until(PUMP_TIMEOUT, || handle.is_running()));
    assert!(wait_until(PUMP_TIMEOUT, || observer
        .contains(&Event::DecodingStarted(b))));

    // A global target beyond A's end lands inside B.
    player.seek_to_frame(10_000).unwrap();
    assert!(pump_until(&handle, PULL, PUMP_TIMEOUT, || observer
        .contains(&Event::EndOfAudio)));

    assert!(observer.contains(&Event::RenderingStarted(b)));
    assert!(observer.contains(&Event::RenderingComplete(b)));
    // A never finished: its remaining frames were abandoned by the seek.
    assert!(!observer.contains(&Event::RenderingComplete(a)));
}
