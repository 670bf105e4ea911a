use kairos::aggregator::SessionAggregator;
use kairos::config::{EngineConfig, SessionConfig};
use kairos::engine::{CycleEngine, Effect};
use kairos::events::DomainEvent;
use kairos::model::Session;
use kairos::store::{KeyValueStore, MemoryStore, SESSIONS_KEY};
use kairos_ipc::{Phase, TimerSettings, TimerState};
use std::sync::Arc;

/// Routes queued domain events the way the runtime does, minus AI.
fn route(engine: &mut CycleEngine, sessions: &mut SessionAggregator) -> bool {
    let mut chain_finished = false;
    for effect in engine.drain_effects() {
        if let Effect::Domain(event) = effect {
            match event {
                DomainEvent::ChainStarted { narration } => {
                    sessions.start_new_session(narration).unwrap();
                }
                DomainEvent::WorkPeriodCompleted(wp) => {
                    sessions.on_work_period_completed(wp).unwrap();
                }
                DomainEvent::FullCycleCompleted => {
                    sessions.complete_current_session().unwrap();
                    chain_finished = true;
                }
                DomainEvent::BreakFeedbackReceived(fb) => {
                    sessions.on_break_feedback_received(fb);
                }
            }
        }
    }
    chain_finished
}

#[test]
fn four_cycle_chain_builds_one_session() {
    let settings = TimerSettings {
        work_minutes: 25,
        short_break_minutes: 5,
        long_break_minutes: 15,
        cycles_before_long_break: 4,
        delay_seconds: 30,
        use_voice_interaction: false,
    };
    let store = Arc::new(MemoryStore::new());
    let mut sessions =
        SessionAggregator::load(Box::new(store.clone()), SessionConfig::default(), None);
    let mut engine = CycleEngine::new(settings, EngineConfig::default());

    engine.start();
    engine
        .submit_narration("I'm working on the quarterly report. It's due Friday.")
        .unwrap();
    route(&mut engine, &mut sessions);
    let session_id = sessions.current_id().unwrap();

    let mut phases = Vec::new();
    let mut finished = false;
    let mut work_inputs = 0;
    for _ in 0..20_000 {
        if engine.state() == TimerState::AwaitingWorkInput {
            work_inputs += 1;
            engine
                .submit_work_input(&format!("period {}", work_inputs))
                .unwrap();
        } else {
            engine.tick();
        }
        if phases.last() != Some(&engine.phase()) {
            phases.push(engine.phase());
        }
        if route(&mut engine, &mut sessions) {
            finished = true;
            break;
        }
    }
    assert!(finished, "chain never completed");

    use Phase::*;
    assert_eq!(
        phases,
        vec![
            Work, Delay, ShortBreak, Delay, Work, Delay, ShortBreak, Delay, Work, Delay,
            ShortBreak, Delay, Work, Delay, LongBreak, Delay,
        ]
    );
    assert_eq!(engine.current_cycle(), 1);
    assert!(sessions.current_session().is_none());

    let session = sessions.session(session_id).unwrap();
    assert!(session.is_completed());
    assert_eq!(session.work_periods.len(), 4);
    assert!(session
        .work_periods
        .iter()
        .all(|wp| wp.task_description == "the quarterly report" && wp.end_time.is_some()));
    let inputs: Vec<&str> = session.work_periods.iter().map(|wp| wp.input.as_str()).collect();
    assert_eq!(inputs, ["period 1", "period 2", "period 3", "period 4"]);

    let saved: Vec<Session> =
        serde_json::from_str(&store.get(SESSIONS_KEY).unwrap().unwrap()).unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].work_periods.len(), 4);
    assert!(saved[0].end_time.is_some());
}
