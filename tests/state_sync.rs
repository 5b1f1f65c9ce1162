mod common;

use common::*;
use dance_sync::bus::StateBus;
use dance_sync::transport::AudioLevels;
use dance_sync::{DanceTransport, FollowerPhase, Intent, ManualClock, PlaybackStateMessage, SyncMode};

const SPEAKERS: AudioLevels = AudioLevels {
    slider: 0.8,
    audio: 0.8,
};

fn position<T: DanceTransport>(transport: &T) -> f64 {
    transport.playback_time_seconds().unwrap()
}

#[test]
fn scheduled_start_is_audible_together() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new(T0);
    let mut lead = leader(dir.path(), SyncMode::State, &clock);
    let mut follow = follower(dir.path(), SyncMode::State, &clock);

    lead.begin_action(Intent::play_by_key("SongA")).unwrap();
    assert!(lead.hold().is_muted());
    assert!(lead.hold().is_frozen());

    tick_at(&clock, 1, &mut [&mut lead, &mut follow]);
    assert_eq!(follow.phase(), FollowerPhase::AwaitingScheduledStart);
    assert!(follow.hold().is_muted());
    assert!(follow.hold().is_frozen());
    assert_eq!(follow.transport().current_key(), Some("SongA"));

    for step in 2..10 {
        tick_at(&clock, step, &mut [&mut lead, &mut follow]);
    }
    // Selected once, re-reads of the same event are no-ops.
    assert_eq!(follow.transport().play_calls().len(), 1);
    assert!(follow.hold().is_muted());

    tick_at(&clock, 10, &mut [&mut lead, &mut follow]);
    assert_eq!(lead.phase(), FollowerPhase::Playing);
    assert_eq!(follow.phase(), FollowerPhase::Playing);
    assert!(!lead.hold().is_engaged());
    assert!(!follow.hold().is_engaged());
    assert_eq!(follow.transport().levels(), SPEAKERS);
    assert_eq!(lead.transport().levels(), SPEAKERS);

    for step in 11..20 {
        tick_at(&clock, step, &mut [&mut lead, &mut follow]);
    }
    let gap = (position(lead.transport()) - position(follow.transport())).abs();
    assert!(gap < 1e-6, "positions diverged by {}", gap);
    assert_eq!(follow.cursor().scheduled_event_applied, 1);
}

#[test]
fn drift_is_corrected_only_past_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new(T0);
    let mut lead = leader(dir.path(), SyncMode::State, &clock);
    let mut follow = follower(dir.path(), SyncMode::State, &clock);

    lead.begin_action(Intent::play_by_key("SongB")).unwrap();
    for step in 1..=15 {
        tick_at(&clock, step, &mut [&mut lead, &mut follow]);
    }
    let seeks = follow.transport().seek_count();

    follow.transport_mut().inject_drift(0.05);
    tick_at(&clock, 16, &mut [&mut lead, &mut follow]);
    assert_eq!(follow.transport().seek_count(), seeks);

    follow.transport_mut().inject_drift(0.5);
    tick_at(&clock, 17, &mut [&mut lead, &mut follow]);
    assert_eq!(follow.transport().seek_count(), seeks + 1);

    let gap = (position(lead.transport()) - position(follow.transport())).abs();
    assert!(gap <= follow.config().drift_threshold.as_secs_f64());
}

#[test]
fn leader_stop_reaches_followers() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new(T0);
    let mut lead = leader(dir.path(), SyncMode::State, &clock);
    let mut follow = follower(dir.path(), SyncMode::State, &clock);

    lead.begin_action(Intent::play()).unwrap();
    for step in 1..=12 {
        tick_at(&clock, step, &mut [&mut lead, &mut follow]);
    }
    assert!(follow.transport().is_playing().unwrap());

    lead.begin_action(Intent::stop()).unwrap();
    tick_at(&clock, 13, &mut [&mut lead, &mut follow]);
    assert!(!follow.transport().is_playing().unwrap());
    assert_eq!(follow.phase(), FollowerPhase::Idle);
    assert!(!follow.cursor().last_playing);

    let stops = follow.transport().calls().len();
    for step in 14..20 {
        tick_at(&clock, step, &mut [&mut lead, &mut follow]);
    }
    assert_eq!(follow.transport().calls().len(), stops);
}

#[test]
fn muting_followers_keep_mirroring_silently() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new(T0);
    let mut lead = leader(dir.path(), SyncMode::State, &clock);
    let mut cfg = config(dir.path(), SyncMode::State);
    cfg.mute_followers = true;
    let mut follow = node_with(cfg, 1, false, &clock);

    lead.begin_action(Intent::play_by_key("SongC")).unwrap();
    for step in 1..=12 {
        tick_at(&clock, step, &mut [&mut lead, &mut follow]);
    }
    assert_eq!(follow.phase(), FollowerPhase::Muted);
    assert!(follow.hold().is_muted());
    assert!(!follow.hold().is_frozen());
    assert_eq!(follow.transport().levels(), AudioLevels::SILENT);
    assert_eq!(follow.transport().current_key(), Some("SongC"));

    lead.begin_action(Intent::stop()).unwrap();
    tick_at(&clock, 13, &mut [&mut lead, &mut follow]);
    assert_eq!(follow.phase(), FollowerPhase::Idle);
    assert_eq!(follow.transport().levels(), SPEAKERS);
}

#[test]
fn late_joiner_lands_on_the_current_position() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new(T0);
    let mut lead = leader(dir.path(), SyncMode::State, &clock);

    lead.begin_action(Intent::play_by_key("SongA")).unwrap();
    for step in 1..=25 {
        tick_at(&clock, step, &mut [&mut lead]);
    }

    let mut late = follower(dir.path(), SyncMode::State, &clock);
    tick_at(&clock, 25, &mut [&mut late]);
    assert_eq!(late.phase(), FollowerPhase::Playing);
    assert_eq!(late.transport().current_key(), Some("SongA"));

    let gap = (position(lead.transport()) - position(late.transport())).abs();
    assert!(gap < 1e-6, "late joiner is {} s off", gap);
}

#[test]
fn playing_without_key_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new(T0);
    let cfg = config(dir.path(), SyncMode::State);
    let mut follow = node_with(cfg.clone(), 1, false, &clock);

    let bus = StateBus::new(cfg.state_path(), 0, cfg.read_retry_delay);
    bus.write(&PlaybackStateMessage {
        is_playing: true,
        version: 5,
        written_at_utc: T0,
        ..Default::default()
    })
    .unwrap();

    for step in 1..5 {
        tick_at(&clock, step, &mut [&mut follow]);
    }
    assert!(follow.transport().calls().is_empty());
    assert_eq!(follow.phase(), FollowerPhase::Idle);
}

#[test]
fn unknown_media_is_given_up_after_retries() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new(T0);
    let cfg = config(dir.path(), SyncMode::State);
    let mut follow = node_with(cfg.clone(), 1, false, &clock);

    let bus = StateBus::new(cfg.state_path(), 0, cfg.read_retry_delay);
    bus.write(&PlaybackStateMessage {
        media_key: "NotInCatalog".into(),
        is_playing: true,
        version: 1,
        written_at_utc: T0,
        has_scheduled_start: true,
        scheduled_start_utc: T0 + 1.0,
        event_id: 1,
        ..Default::default()
    })
    .unwrap();

    for step in 1..10 {
        tick_at(&clock, step, &mut [&mut follow]);
    }
    assert_eq!(
        follow.transport().play_calls().len(),
        cfg.max_apply_attempts as usize
    );
    assert!(!follow.hold().is_engaged());
    assert_eq!(follow.phase(), FollowerPhase::Idle);
}

#[test]
fn follower_tracks_a_recreated_bus() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new(T0);
    let cfg = config(dir.path(), SyncMode::State);
    let mut lead = leader(dir.path(), SyncMode::State, &clock);
    let mut follow = follower(dir.path(), SyncMode::State, &clock);

    lead.begin_action(Intent::play_by_key("SongA")).unwrap();
    for step in 1..=15 {
        tick_at(&clock, step, &mut [&mut lead, &mut follow]);
    }
    lead.begin_action(Intent::stop()).unwrap();
    for step in 16..=17 {
        tick_at(&clock, step, &mut [&mut lead, &mut follow]);
    }
    lead.begin_action(Intent::play_by_key("SongA")).unwrap();
    for step in 18..=30 {
        tick_at(&clock, step, &mut [&mut lead, &mut follow]);
    }
    assert_eq!(follow.transport().current_key(), Some("SongA"));
    assert_eq!(follow.phase(), FollowerPhase::Playing);

    // The old leader goes away with its bus; a fresh one starts over at v1.
    drop(lead);
    std::fs::remove_dir_all(cfg.bus_dir()).unwrap();
    let mut fresh = leader(dir.path(), SyncMode::State, &clock);
    fresh.begin_action(Intent::play_by_key("SongC")).unwrap();

    for step in 31..80 {
        tick_at(&clock, step, &mut [&mut fresh, &mut follow]);
    }
    assert_eq!(fresh.transport().current_key(), Some("SongC"));
    assert_eq!(follow.transport().current_key(), Some("SongC"));
    assert_eq!(follow.phase(), FollowerPhase::Playing);
    assert_eq!(follow.cursor().scheduled_event_applied, 1);

    let gap = (position(fresh.transport()) - position(follow.transport())).abs();
    assert!(gap < 1e-6, "positions diverged by {}", gap);
}

#[test]
fn far_future_start_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new(T0);
    let cfg = config(dir.path(), SyncMode::State);
    let mut follow = node_with(cfg.clone(), 1, false, &clock);

    let bus = StateBus::new(cfg.state_path(), 0, cfg.read_retry_delay);
    bus.write(&PlaybackStateMessage {
        media_key: "SongA".into(),
        is_playing: true,
        version: 1,
        written_at_utc: T0,
        has_scheduled_start: true,
        scheduled_start_utc: 1e300,
        event_id: 1,
        ..Default::default()
    })
    .unwrap();

    for step in 1..5 {
        tick_at(&clock, step, &mut [&mut follow]);
    }
    assert!(follow.transport().calls().is_empty());
    assert!(!follow.hold().is_engaged());
    assert!(follow.next_wake().is_none());
}

#[test]
fn damaged_state_is_reread_between_ticks() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new(T0);
    let mut lead = leader(dir.path(), SyncMode::State, &clock);
    let mut follow = follower(dir.path(), SyncMode::State, &clock);

    lead.begin_action(Intent::play_by_key("SongB")).unwrap();
    for step in 1..=15 {
        tick_at(&clock, step, &mut [&mut lead, &mut follow]);
    }
    let calls = follow.transport().calls().len();

    std::fs::write(lead.config().state_path(), b"{\"key\":\"So").unwrap();
    tick_at(&clock, 16, &mut [&mut follow]);
    assert!(follow.next_wake().is_some());

    // Re-reads run off the poll cadence until the backup is used.
    for _ in 0..follow.config().read_retries {
        clock.advance(0.002);
        follow.wake();
    }
    assert!(follow.next_wake().is_none());
    assert_eq!(follow.phase(), FollowerPhase::Playing);
    assert_eq!(follow.transport().calls().len(), calls);
}
