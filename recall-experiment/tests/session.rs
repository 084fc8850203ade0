mod common;

use std::collections::HashSet;

use common::{
    FakeLink, ScriptedPresenter, config, initialized, resources, runner, runner_with, sync,
};
use recall_core::{Error, SessionPhase};
use recall_experiment::{JsonStateStore, MemoryStateStore, SessionOutcome, StateStore};
use recall_sync::{EventKind, SyncClient};
use recall_timing::VirtualTimer;

fn session_words(state: &recall_experiment::SessionState, session: usize) -> Vec<String> {
    state.session_lists[session]
        .iter()
        .flat_map(|t| t.words.iter().cloned())
        .collect()
}

#[test]
fn full_session_commits_after_every_trial() {
    let dir = resources(2);
    let config = config(dir.path(), 2);
    let state = initialized(&config);

    let timer = VirtualTimer::new();
    let mut sync = sync(&timer, true);
    let mut r = runner(config, MemoryStateStore::with_state(state.clone()), &mut sync);
    r.connect(|| unreachable!("link already attached")).unwrap();
    assert_eq!(r.run_session().unwrap(), SessionOutcome::Completed);
    assert_eq!(r.phase(), SessionPhase::Rollover);
    let parts = r.into_parts();

    let commits: Vec<usize> = parts.store.history.iter().map(|s| s.trial_num).collect();
    assert_eq!(commits, [0, 0, 0, 1, 2, 3, 4, 5, 6, 0]);
    let last = parts.store.history.last().unwrap();
    assert_eq!(last.session_num, 1);
    assert!(!last.session_started);
    assert!(!last.practice_done);
    assert_eq!(last.session_lists, state.session_lists);

    assert!(parts.log.contains("SESS_START\t1\tCLOSED_STIM_SESSION\tv_3.0"));
    assert!(parts.log.contains("PRACTICE_TRIAL"));
    assert!(parts.log.contains("SESS_END"));
    assert_eq!(parts.log.sessions, [0]);
    assert_eq!(parts.recorder.labels, ["p", "0", "1", "2", "3", "4", "5"]);

    let link = sync.link().unwrap();
    assert_eq!(link.handshakes, 1);
    // silent before practice, silent inside each of 7 lists, shown after each
    assert_eq!(link.probes, 5 * (1 + 7 + 7));
    let trials: Vec<i64> = link
        .of_kind(EventKind::Trial)
        .iter()
        .map(|e| e.payload["trial"].as_i64().unwrap())
        .collect();
    assert_eq!(trials, [-1, -1, 1, 2, 3, 4, 5, 6]);
    let session = link.of_kind(EventKind::Session)[0];
    assert_eq!(session.payload["session"], 1);
    assert_eq!(session.payload["session_type"], "CLOSED_STIM");
    assert_eq!(link.of_kind(EventKind::Word).len(), 3 * 7);
    assert_eq!(link.sent.last().unwrap().kind, EventKind::Exit);
}

#[test]
fn encoding_ends_at_the_last_word_offset() {
    let dir = resources(2);
    let config = config(dir.path(), 2);
    let state = initialized(&config);

    let timer = VirtualTimer::new();
    let mut sync = sync(&timer, true);
    let mut r = runner(config, MemoryStateStore::with_state(state.clone()), &mut sync);
    r.connect(|| unreachable!()).unwrap();
    r.run_session().unwrap();
    drop(r);

    let states = sync.link().unwrap().states();
    let mut ends = 0;
    for (i, &(name, value, ts)) in states.iter().enumerate() {
        if name.ends_with("ENCODING") && !value {
            assert_eq!(states[i - 1], ("WORD", false, ts));
            ends += 1;
        }
    }
    assert_eq!(ends, 7);

    let stim_lists = state.session_stim[0].iter().filter(|&&s| s).count();
    let stim_starts = states
        .iter()
        .filter(|&&(name, value, _)| name == "STIM ENCODING" && value)
        .count();
    assert_eq!(stim_starts, stim_lists);

    // ORIENT offset hands over to the encoding phase at the same instant
    for (i, &(name, value, ts)) in states.iter().enumerate() {
        if name.ends_with("ENCODING") && value {
            assert_eq!(states[i - 1], ("ORIENT", false, ts));
        }
    }
}

#[test]
fn restart_resumes_at_the_persisted_trial() {
    let dir = resources(2);
    let config = config(dir.path(), 2);
    let state_path = dir.path().join("data").join(common::SUBJECT).join("state.json");

    let timer = VirtualTimer::new();
    let mut link = FakeLink::new(timer.clone());
    link.exit_after_trials = Some(2);
    let mut sync = SyncClient::new(Some(link), timer.clone(), true);
    let mut first = runner(config.clone(), JsonStateStore::new(&state_path), &mut sync);
    let allocated = first.init_experiment().unwrap();
    first.connect(|| unreachable!()).unwrap();
    assert!(matches!(first.run_session(), Err(Error::HostExit)));
    drop(first);

    let store = JsonStateStore::new(&state_path);
    let interrupted = store.restore().unwrap().unwrap();
    assert_eq!(interrupted.trial_num, 2);
    assert!(interrupted.session_started);
    assert!(interrupted.practice_done);
    assert_eq!(interrupted.session_lists, allocated.session_lists);

    let timer = VirtualTimer::new();
    let mut sync = common::sync(&timer, true);
    let mut second = runner(config, store, &mut sync);
    assert!(!second.should_skip_session().unwrap());
    second.connect(|| unreachable!()).unwrap();
    assert_eq!(second.run_session().unwrap(), SessionOutcome::Completed);
    let parts = second.into_parts();

    let words: HashSet<String> = session_words(&allocated, 0).into_iter().collect();
    let presented: Vec<String> = parts
        .presenter
        .shown
        .iter()
        .filter(|t| words.contains(*t))
        .cloned()
        .collect();
    let expected: Vec<String> = allocated.session_lists[0][2..]
        .iter()
        .flat_map(|t| t.words.iter().cloned())
        .collect();
    assert_eq!(presented, expected);
    assert!(!parts.log.contains("PRACTICE_TRIAL"));
    assert_eq!(parts.recorder.labels, ["2", "3", "4", "5"]);

    let done = parts.store.restore().unwrap().unwrap();
    assert_eq!((done.session_num, done.trial_num), (1, 0));
}

#[test]
fn operator_skip_rolls_the_session_over() {
    let dir = resources(4);
    let config = config(dir.path(), 3);
    let mut state = initialized(&config);
    state.session_num = 2;
    state.trial_num = 5;
    state.session_started = true;
    state.practice_done = true;

    let timer = VirtualTimer::new();
    let mut sync = sync(&timer, true);
    let mut presenter = ScriptedPresenter::new(timer.clone());
    presenter.skip_session = true;
    let mut r = runner_with(config, MemoryStateStore::with_state(state.clone()), &mut sync, presenter);
    assert!(r.should_skip_session().unwrap());
    let parts = r.into_parts();

    assert_eq!(parts.store.writes(), 1);
    let skipped = parts.store.history.last().unwrap();
    assert_eq!(skipped.session_num, 3);
    assert_eq!(skipped.trial_num, 0);
    assert!(!skipped.practice_done);
    assert!(!skipped.session_started);
    assert!(parts.log.contains("SESSION_SKIPPED"));
    assert_eq!(parts.log.sessions, [2]);
    assert!(sync.link().unwrap().sent.is_empty());
}

#[test]
fn declined_skip_leaves_state_alone() {
    let dir = resources(2);
    let config = config(dir.path(), 2);
    let mut state = initialized(&config);
    state.trial_num = 3;
    state.session_started = true;

    let timer = VirtualTimer::new();
    let mut sync = sync(&timer, false);
    let mut r = runner(config, MemoryStateStore::with_state(state.clone()), &mut sync);
    assert!(!r.should_skip_session().unwrap());
    let parts = r.into_parts();
    assert_eq!(parts.store.writes(), 0);
    assert_eq!(
        parts.presenter.questions,
        [recall_experiment::Question::SkipSession { session: 1 }]
    );
}

#[test]
fn fresh_session_is_not_offered_a_skip() {
    let dir = resources(2);
    let config = config(dir.path(), 2);
    let state = initialized(&config);

    let timer = VirtualTimer::new();
    let mut sync = sync(&timer, false);
    let mut r = runner(config, MemoryStateStore::with_state(state.clone()), &mut sync);
    assert!(!r.should_skip_session().unwrap());
    assert!(r.presenter().questions.is_empty());
}

#[test]
fn out_of_sessions_returns_without_side_effects() {
    let dir = resources(2);
    let config = config(dir.path(), 2);
    let mut state = initialized(&config);
    state.session_num = state.session_lists.len();

    let timer = VirtualTimer::new();
    let mut sync = sync(&timer, true);
    let mut r = runner(config, MemoryStateStore::with_state(state), &mut sync);
    assert_eq!(r.run_session().unwrap(), SessionOutcome::OutOfSessions);
    assert_eq!(r.phase(), SessionPhase::OutOfSessions);
    let parts = r.into_parts();

    assert_eq!(parts.store.writes(), 0);
    assert!(parts.log.lines.is_empty());
    assert!(parts.presenter.questions.is_empty());
    let link = sync.link().unwrap();
    assert!(link.sent.is_empty());
    assert_eq!(link.probes, 0);
}

#[test]
fn disabled_host_is_never_contacted() {
    let dir = resources(2);
    let config = config(dir.path(), 2);
    let state = initialized(&config);

    let timer = VirtualTimer::new();
    let mut sync = sync(&timer, false);
    let mut r = runner(config, MemoryStateStore::with_state(state), &mut sync);
    r.connect(|| unreachable!()).unwrap();
    assert_eq!(r.run_session().unwrap(), SessionOutcome::Completed);
    let parts = r.into_parts();
    assert!(!parts.presenter.shown.iter().any(|t| t == "Syncing..."));

    let link = sync.link().unwrap();
    assert_eq!(link.handshakes, 0);
    assert_eq!(link.probes, 0);
    assert!(link.sent.is_empty());
}

#[test]
fn unknown_phase_name_is_fatal() {
    let dir = resources(2);
    let mut config = config(dir.path(), 2);
    config.state_list.retain(|s| s != "WORD");
    let state = initialized(&config);

    let timer = VirtualTimer::new();
    let mut sync = sync(&timer, false);
    let mut r = runner(config, MemoryStateStore::with_state(state), &mut sync);
    let err = r.run_session().unwrap_err();
    assert!(matches!(err, Error::Protocol(_)), "{err}");
    let parts = r.into_parts();
    assert_eq!(parts.store.writes(), 0);
}

#[test]
fn list_without_state_is_a_configuration_error() {
    let dir = resources(2);
    let config = config(dir.path(), 2);
    let state = initialized(&config);
    let words = state.session_lists[0][0].words.clone();

    let timer = VirtualTimer::new();
    let mut sync = sync(&timer, true);
    let mut r = runner(config, MemoryStateStore::with_state(state), &mut sync);
    let err = r.run_encoding(&words, None, false, false).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
    drop(r);
    assert!(sync.link().unwrap().sent.is_empty());
}

#[test]
fn failed_mic_test_persists_nothing() {
    let dir = resources(2);
    let config = config(dir.path(), 2);
    let state = initialized(&config);

    let timer = VirtualTimer::new();
    let mut sync = sync(&timer, true);
    let mut presenter = ScriptedPresenter::new(timer.clone());
    presenter.mic_ok = false;
    let mut r = runner_with(config, MemoryStateStore::with_state(state), &mut sync, presenter);
    r.connect(|| unreachable!()).unwrap();
    assert_eq!(r.run_session().unwrap(), SessionOutcome::MicTestFailed);
    let parts = r.into_parts();
    assert_eq!(parts.store.writes(), 0);
    assert!(parts.log.contains("MIC_TEST_START"));
    assert!(parts.log.contains("MIC_TEST_END"));

    let states = sync.link().unwrap().states();
    let mic: Vec<bool> = states
        .iter()
        .filter(|(name, _, _)| *name == "MIC TEST")
        .map(|&(_, v, _)| v)
        .collect();
    assert_eq!(mic, [true, false]);
}

#[test]
fn unconfirmed_session_is_an_operator_abort() {
    let dir = resources(2);
    let config = config(dir.path(), 2);
    let state = initialized(&config);

    let timer = VirtualTimer::new();
    let mut sync = sync(&timer, false);
    let mut presenter = ScriptedPresenter::new(timer.clone());
    presenter.confirm_session = false;
    let mut r = runner_with(config, MemoryStateStore::with_state(state), &mut sync, presenter);
    let err = r.run_session().unwrap_err();
    assert!(err.is_graceful());
    assert!(matches!(err, Error::OperatorAbort(_)));
    assert_eq!(r.store().writes(), 0);
}

#[test]
fn skipped_practice_still_counts_as_done() {
    let dir = resources(2);
    let config = config(dir.path(), 2);
    let state = initialized(&config);

    let timer = VirtualTimer::new();
    let mut sync = sync(&timer, true);
    let mut presenter = ScriptedPresenter::new(timer.clone());
    presenter.skip_practice = true;
    let mut r = runner_with(config, MemoryStateStore::with_state(state), &mut sync, presenter);
    r.connect(|| unreachable!()).unwrap();
    r.run_session().unwrap();
    let parts = r.into_parts();

    assert!(parts.store.history[1].practice_done);
    assert!(!parts.log.contains("PRACTICE_TRIAL"));
    assert!(!parts.recorder.labels.contains(&"p".to_owned()));
    let states = sync.link().unwrap().states();
    assert!(!states.iter().any(|(name, _, _)| *name == "PRACTICE"));
}

#[test]
fn distractor_reports_every_problem() {
    let dir = resources(1);
    let mut config = config(dir.path(), 1);
    config.fast_config = false;
    config.do_math_distract = true;
    let state = initialized(&config);

    let timer = VirtualTimer::new();
    let mut sync = sync(&timer, true);
    let mut r = runner(config, MemoryStateStore::with_state(state), &mut sync);
    r.connect(|| unreachable!()).unwrap();
    r.run_session().unwrap();
    drop(r);

    let link = sync.link().unwrap();
    let math = link.of_kind(EventKind::Math);
    // 20 s minimum at 5 s per answer, for the practice list and six trials
    assert_eq!(math.len(), 4 * 7);
    assert!(math.iter().all(|e| e.payload["correct"] == true));
    assert!(math.iter().all(|e| e.payload["rt"] == 5000));

    let states = link.states();
    let count = |want: &str| {
        states
            .iter()
            .filter(|&&(name, value, _)| name == want && value)
            .count()
    };
    assert_eq!(count("DISTRACT"), 7);
    assert_eq!(count("WAITING"), 7);
}

#[test]
fn second_init_is_refused() {
    let dir = resources(2);
    let config = config(dir.path(), 2);

    let timer = VirtualTimer::new();
    let mut sync = sync(&timer, false);
    let mut r = runner(config, MemoryStateStore::new(), &mut sync);
    let first = r.init_experiment().unwrap();
    let err = r.init_experiment().unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
    assert_eq!(r.store().history, [first]);
}

#[test]
fn missing_resources_stop_init_before_allocation() {
    let dir = resources(2);
    std::fs::remove_file(dir.path().join("video/countdown.mpg")).unwrap();
    let config = config(dir.path(), 2);

    let timer = VirtualTimer::new();
    let mut sync = sync(&timer, false);
    let mut r = runner(config, MemoryStateStore::new(), &mut sync);
    let err = r.init_experiment().unwrap_err();
    assert!(matches!(err, Error::MissingResource { .. }));
    assert!(r.store().history.is_empty());
}

#[test]
fn resource_removed_after_init_fails_before_the_session_starts() {
    let dir = resources(2);
    let config = config(dir.path(), 2);
    let state = initialized(&config);
    std::fs::remove_file(dir.path().join("text_EN/post_practiceList.txt")).unwrap();

    let timer = VirtualTimer::new();
    let mut sync = sync(&timer, true);
    let mut r = runner(config, MemoryStateStore::with_state(state), &mut sync);
    let err = r.run_session().unwrap_err();
    assert!(matches!(err, Error::MissingResource { .. }), "{err}");
    assert!(matches!(
        r.connect(|| unreachable!()),
        Err(Error::MissingResource { .. })
    ));
    let parts = r.into_parts();

    assert_eq!(parts.store.writes(), 0);
    assert!(parts.log.lines.is_empty());
    assert!(parts.log.sessions.is_empty());
    assert!(parts.presenter.questions.is_empty());
    let link = sync.link().unwrap();
    assert!(link.sent.is_empty());
    assert_eq!(link.handshakes, 0);
    assert_eq!(link.probes, 0);
}

#[test]
fn completed_trial_loop_only_rolls_over() {
    let dir = resources(2);
    let config = config(dir.path(), 2);
    let mut state = initialized(&config);
    state.trial_num = state.session_lists[0].len();
    state.session_started = true;
    state.practice_done = true;

    let timer = VirtualTimer::new();
    let mut sync = sync(&timer, true);
    let mut r = runner(config, MemoryStateStore::with_state(state.clone()), &mut sync);
    r.connect(|| unreachable!()).unwrap();
    assert_eq!(r.run_session().unwrap(), SessionOutcome::Completed);
    let parts = r.into_parts();

    let words: HashSet<String> = session_words(&state, 0).into_iter().collect();
    assert!(!parts.presenter.shown.iter().any(|t| words.contains(t)));
    assert!(parts.recorder.labels.is_empty());
    assert!(!parts.log.contains("PRACTICE_TRIAL"));

    let done = parts.store.history.last().unwrap();
    assert_eq!((done.session_num, done.trial_num), (1, 0));
    assert!(!done.session_started);
    assert!(!done.practice_done);
    let link = sync.link().unwrap();
    assert!(link.of_kind(EventKind::Word).is_empty());
    assert_eq!(link.sent.last().unwrap().kind, EventKind::Exit);
}
