use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::Local;

use shuttlerun::{
    cues::{CueLog, ToneKind},
    participant::{ParticipantId, ParticipantOutcome, ParticipantStatus, StopReason},
    protocol::{ProtocolLevel, ProtocolTable},
    scoring::vo2_max,
    session::EndReason,
    EngineSettings, Phase, Session,
};

// Headless scheduling scenarios: the session is driven directly with explicit
// timestamps, so every boundary and every command lands at a known time.

const STEP: f64 = 0.05;

fn lvl(level: u32, shuttles: u32, time_per_shuttle: f64) -> ProtocolLevel {
    ProtocolLevel {
        level,
        shuttles,
        time_per_shuttle,
        speed_kmh: 72.0 / time_per_shuttle,
    }
}

/// Boundaries at 2, 4, 6 | 7.5, 9, 10.5, 12 | 13, 14.
fn mini_protocol() -> Arc<ProtocolTable> {
    Arc::new(
        ProtocolTable::new(
            "mini",
            vec![lvl(1, 3, 2.0), lvl(2, 4, 1.5), lvl(3, 2, 1.0)],
        )
        .unwrap(),
    )
}

fn session_with(protocol: Arc<ProtocolTable>, runners: &[&str]) -> (Session, Arc<CueLog>) {
    let cues = Arc::new(CueLog::new());
    let settings = EngineSettings {
        countdown_steps: 0,
        ..EngineSettings::default()
    };
    let roster = runners.iter().map(|r| r.parse().unwrap()).collect();
    let session = Session::new(protocol, roster, settings, cues.clone(), cues.clone()).unwrap();
    (session, cues)
}

/// Heartbeat on a fixed grid from `from` up to and including `to`.
fn run(session: &mut Session, from: f64, to: f64) {
    let mut i = (from / STEP).ceil() as u64;
    loop {
        let now = i as f64 * STEP;
        if now > to + 1e-9 {
            break;
        }
        session.heartbeat(now);
        i += 1;
    }
}

#[test]
fn three_runners_stop_eliminate_and_complete() {
    let (mut session, cues) = session_with(
        mini_protocol(),
        &["Ana:f:21", "Ben:m:25", "Cal:m:30"],
    );
    let (ana, ben, cal) = (ParticipantId(1), ParticipantId(2), ParticipantId(3));

    assert!(session.start(0.0));
    assert_eq!(session.phase(), Phase::Running);

    run(&mut session, 0.0, 3.0);
    assert_matches!(session.record_warning(ben, 3.0), ParticipantOutcome::Warned { count: 1 });

    run(&mut session, 3.0, 6.5);
    let stopped = session.stop(ana, 6.5);
    assert_matches!(stopped, ParticipantOutcome::Stopped(snap) => {
        assert_eq!((snap.level, snap.shuttle), (2, 1));
        assert_eq!(snap.distance_m, 60.0);
    });

    run(&mut session, 6.5, 8.0);
    assert_matches!(session.record_warning(ben, 8.0), ParticipantOutcome::Warned { count: 2 });

    run(&mut session, 8.0, 10.0);
    assert_matches!(session.record_warning(ben, 10.0), ParticipantOutcome::Eliminated(snap) => {
        assert_eq!((snap.level, snap.shuttle), (2, 3));
        assert_eq!(snap.distance_m, 100.0);
    });
    assert_eq!(session.phase(), Phase::Running);
    assert_eq!(session.active_participant_count(), 1);

    run(&mut session, 10.0, 15.0);
    assert_eq!(session.phase(), Phase::Finished);
    assert_eq!(session.end_reason(), Some(EndReason::ProtocolExhausted));

    let last = session.registry().get(cal).unwrap().result().copied().unwrap();
    assert_eq!(last.reason, StopReason::ProtocolComplete);
    assert_eq!((last.snapshot.level, last.snapshot.shuttle), (3, 2));
    assert_eq!(last.snapshot.distance_m, 180.0);

    assert_eq!(cues.count_tones(ToneKind::Shuttle), 7);
    assert_eq!(cues.count_tones(ToneKind::LevelUp), 2);
    assert_eq!(cues.count_tones(ToneKind::Fail), 2);
    assert_eq!(cues.count_tones(ToneKind::Stop), 3);
    let complete = cues
        .announcements()
        .iter()
        .filter(|a| a.as_str() == "Test complete")
        .count();
    assert_eq!(complete, 1);

    let reports = session.take_reports(Local::now()).unwrap();
    assert_eq!(reports.len(), 3);
    assert_eq!(reports[0].stop_reason, StopReason::Manual);
    assert_eq!(reports[0].vo2_max, vo2_max(2, 1, 4));
    assert_eq!(reports[1].stop_reason, StopReason::Warnings);
    assert_eq!(reports[1].warnings, 3);
    assert_eq!(reports[2].stop_reason, StopReason::ProtocolComplete);
    assert_eq!(reports[2].max_speed_kmh, 72.0);
    assert!(session.take_reports(Local::now()).is_none());
}

#[test]
fn irregular_heartbeats_do_not_drift() {
    let protocol = Arc::new(ProtocolTable::builtin("leger").unwrap());
    let (mut session, cues) = session_with(protocol.clone(), &["Ana:f:21"]);

    let t0 = 3.25;
    session.start(t0);

    // 10-59 ms jitter plus an occasional multi-second stall, about 760 s in
    // all, which runs well past level 10
    let mut now = t0;
    for i in 0u64..20_000 {
        now += 0.010 + ((i * 37) % 50) as f64 * 0.001;
        if i % 700 == 699 {
            now += 2.5;
        }
        session.heartbeat(now);
    }
    assert_eq!(session.phase(), Phase::Running);

    let mut expected = Vec::new();
    let mut acc = t0;
    for level in protocol.levels() {
        for _ in 0..level.shuttles {
            acc += level.time_per_shuttle;
            expected.push(acc);
        }
    }

    let tones = cues.tones();
    assert_eq!(tones[0], (ToneKind::Shuttle, t0));
    let crossings = &tones[1..];
    assert!(crossings.len() > 100);
    let level_ups = crossings
        .iter()
        .filter(|(kind, _)| *kind == ToneKind::LevelUp)
        .count();
    assert!(level_ups >= 10, "only {level_ups} level changes");
    for (idx, (_, at)) in crossings.iter().enumerate() {
        assert!(
            (at - expected[idx]).abs() < 1e-9,
            "boundary {idx} drifted: {at} vs {}",
            expected[idx]
        );
    }
    // nothing skipped: every boundary before the last heartbeat produced a tone
    let due = expected.iter().filter(|t| **t - now < 0.1).count();
    assert_eq!(crossings.len(), due);
}

#[test]
fn pausing_shifts_every_later_boundary_by_the_pause() {
    let protocol = Arc::new(ProtocolTable::builtin("leger").unwrap());
    let (mut steady, steady_cues) = session_with(protocol.clone(), &["Ana:f:21"]);
    let (mut paused, paused_cues) = session_with(protocol, &["Ana:f:21"]);

    steady.start(0.0);
    run(&mut steady, 0.0, 80.0);

    let pause_len = 7.3;
    paused.start(0.0);
    run(&mut paused, 0.0, 20.0);
    assert!(paused.pause(20.0));
    run(&mut paused, 20.0, 25.0);
    assert!(paused.resume(20.0 + pause_len));
    run(&mut paused, 20.0 + pause_len, 80.0 + pause_len);

    let steady_tones = steady_cues.tones();
    let paused_tones = paused_cues.tones();
    assert_eq!(steady_tones.len(), paused_tones.len());

    for ((kind_a, a), (kind_b, b)) in steady_tones.iter().zip(paused_tones.iter()) {
        assert_eq!(kind_a, kind_b);
        let shift = if *a < 20.0 { 0.0 } else { pause_len };
        assert!((b - a - shift).abs() < 1e-6, "{a} vs {b}");
    }

    let active = paused.active_elapsed(80.0 + pause_len);
    assert!((active - steady.active_elapsed(80.0)).abs() < 1e-6);
}

#[test]
fn third_warning_snapshot_matches_a_manual_stop() {
    let protocol = Arc::new(ProtocolTable::builtin("leger").unwrap());
    let (mut warned, _) = session_with(protocol.clone(), &["Ana:f:21", "Ben:m:22"]);
    let (mut stopped, _) = session_with(protocol, &["Ana:f:21", "Ben:m:22"]);
    let ana = ParticipantId(1);

    warned.start(0.0);
    stopped.start(0.0);
    for t in [10.0, 20.0, 31.0] {
        run(&mut warned, t - 10.0, t);
        warned.record_warning(ana, t);
    }
    run(&mut stopped, 0.0, 31.0);
    stopped.stop(ana, 31.0);

    let a = warned.registry().get(ana).unwrap().result().copied().unwrap();
    let b = stopped.registry().get(ana).unwrap().result().copied().unwrap();
    assert_eq!(a.snapshot, b.snapshot);
    assert_eq!(a.reason, StopReason::Warnings);
    assert_eq!(b.reason, StopReason::Manual);
}

#[test]
fn runners_are_independent() {
    let protocol = Arc::new(ProtocolTable::builtin("leger").unwrap());
    let (mut session, _) = session_with(protocol, &["Ana:f:21", "Ben:m:22"]);
    let (ana, ben) = (ParticipantId(1), ParticipantId(2));

    session.start(0.0);
    run(&mut session, 0.0, 15.0);
    session.stop(ana, 15.0);
    let ana_result = session.registry().get(ana).unwrap().result().copied();

    run(&mut session, 15.0, 16.0);
    session.record_warning(ben, 16.0);
    assert_matches!(session.stop(ana, 16.0), ParticipantOutcome::AlreadyFinished);
    assert_matches!(session.record_warning(ana, 16.0), ParticipantOutcome::AlreadyFinished);

    let ana_record = session.registry().get(ana).unwrap();
    let ben_record = session.registry().get(ben).unwrap();
    assert_eq!(ana_record.result().copied(), ana_result);
    assert_eq!(ana_record.warning_count(), 0);
    assert_eq!(ben_record.status(), ParticipantStatus::Running);
    assert_eq!(ben_record.warning_count(), 1);
    assert_eq!(session.phase(), Phase::Running);

    assert_matches!(session.stop(ParticipantId(99), 16.0), ParticipantOutcome::Unknown);
}

#[test]
fn last_runner_out_ends_the_session_with_one_announcement() {
    let (mut session, cues) = session_with(mini_protocol(), &["Ana:f:21", "Ben:m:25"]);
    session.start(0.0);
    run(&mut session, 0.0, 5.0);

    session.stop(ParticipantId(1), 5.0);
    assert_eq!(session.phase(), Phase::Running);
    session.stop(ParticipantId(2), 5.0);
    assert_eq!(session.phase(), Phase::Finished);
    assert_eq!(session.end_reason(), Some(EndReason::AllParticipantsFinished));

    let tones_at_finish = cues.tones().len();
    run(&mut session, 5.0, 20.0);
    assert_eq!(cues.tones().len(), tones_at_finish);
    assert_eq!(
        cues.announcements()
            .iter()
            .filter(|a| a.as_str() == "Test complete")
            .count(),
        1
    );
}
