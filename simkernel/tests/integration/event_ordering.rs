//! Ordering, identity and cancellation of scheduled events.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use simkernel::event::{Event, EventId, Message, SchedulingError};
use simkernel::model::{Context, Model, ModelError, TerminationKind};
use simkernel::simulation::{RunMode, RunUntil, SimInit, StopReason};
use simkernel::time::MonotonicTime;

type Log = Rc<RefCell<Vec<(u64, String)>>>;

fn t(secs: u64) -> MonotonicTime {
    MonotonicTime::EPOCH + Duration::from_secs(secs)
}

fn secs(time: MonotonicTime) -> u64 {
    time.duration_since(MonotonicTime::EPOCH).as_secs()
}

/// Schedules a fixed plan of self-messages and records their delivery.
struct Planner {
    plan: Vec<(u64, i16, &'static str)>,
    log: Log,
}

impl Model for Planner {
    fn initialize(&mut self, _: usize, cx: &mut Context<'_>) -> Result<(), ModelError> {
        for &(at, priority, name) in &self.plan {
            cx.schedule_at(t(at), Message::new(name).with_priority(priority))?;
        }

        Ok(())
    }

    fn handle_event(&mut self, event: Event, cx: &mut Context<'_>) -> Result<(), ModelError> {
        self.log
            .borrow_mut()
            .push((secs(cx.time()), event.name().to_owned()));

        Ok(())
    }
}

fn run_plan(plan: Vec<(u64, i16, &'static str)>) -> Vec<(u64, String)> {
    let log = Log::default();
    let model_log = log.clone();

    let mut simu = SimInit::new()
        .register("Planner", move || Planner {
            plan: plan.clone(),
            log: model_log.clone(),
        })
        .init_network("Planner")
        .unwrap();

    let reason = simu.run(RunMode::Normal, RunUntil::new()).unwrap();
    match reason {
        StopReason::Terminated(condition) => {
            assert_eq!(condition.kind(), TerminationKind::NoMoreEvents)
        }
        other => panic!("unexpected stop reason: {other:?}"),
    }

    let log = log.borrow().clone();
    log
}

#[test]
fn time_then_priority_then_insertion() {
    let log = run_plan(vec![(5, 0, "a"), (3, 0, "b"), (3, 1, "c"), (1, 0, "d")]);

    assert_eq!(
        log,
        vec![
            (1, "d".to_owned()),
            (3, "b".to_owned()),
            (3, "c".to_owned()),
            (5, "a".to_owned()),
        ]
    );
}

#[test]
fn lower_priority_value_first() {
    let log = run_plan(vec![(2, 3, "late"), (2, -1, "early"), (2, 0, "middle")]);

    let names: Vec<_> = log.into_iter().map(|(_, name)| name).collect();
    assert_eq!(names, ["early", "middle", "late"]);
}

#[test]
fn fifo_among_equal_keys() {
    let log = run_plan(vec![(2, 0, "x"), (2, 0, "y"), (1, 0, "w"), (2, 0, "z")]);

    let names: Vec<_> = log.into_iter().map(|(_, name)| name).collect();
    assert_eq!(names, ["w", "x", "y", "z"]);
}

/// Records the messages it receives.
struct Recorder {
    log: Log,
}

impl Model for Recorder {
    fn handle_event(&mut self, event: Event, cx: &mut Context<'_>) -> Result<(), ModelError> {
        self.log
            .borrow_mut()
            .push((secs(cx.time()), event.name().to_owned()));

        Ok(())
    }
}

#[test]
fn cancellation_is_idempotent() {
    let log = Log::default();
    let model_log = log.clone();
    let mut simu = SimInit::new()
        .register("Recorder", move || Recorder {
            log: model_log.clone(),
        })
        .init_network("Recorder")
        .unwrap();
    let root = simu.graph().root().unwrap();

    let _a = simu.inject(t(1), root, Message::new("a")).unwrap();
    let b = simu.inject(t(2), root, Message::new("b")).unwrap();
    let _c = simu.inject(t(3), root, Message::new("c")).unwrap();
    assert_eq!(simu.pending_events(), 3);

    assert_eq!(simu.cancel_event(b).map(|event| event.id()), Some(Some(b)));
    assert!(simu.cancel_event(b).is_none());
    assert_eq!(simu.pending_events(), 2);

    simu.run(RunMode::Normal, RunUntil::new()).unwrap();

    assert_eq!(*log.borrow(), [(1, "a".to_owned()), (3, "c".to_owned())]);
}

/// Re-arms the same self-message a few times, checking that it keeps its
/// identity.
struct Rearm {
    first_id: Rc<Cell<Option<EventId>>>,
    remaining: u32,
}

impl Model for Rearm {
    fn initialize(&mut self, _: usize, cx: &mut Context<'_>) -> Result<(), ModelError> {
        let id = cx.schedule_in(Duration::from_secs(1), Message::new("timer"))?;
        self.first_id.set(Some(id));

        Ok(())
    }

    fn handle_event(&mut self, event: Event, cx: &mut Context<'_>) -> Result<(), ModelError> {
        assert_eq!(event.id(), self.first_id.get());
        assert!(event.as_message().unwrap().is_self_message());
        assert!(!cx.is_scheduled(event.id().unwrap()));

        if self.remaining == 0 {
            return Ok(());
        }
        self.remaining -= 1;
        let id = cx.schedule_in(Duration::from_secs(1), event)?;
        assert_eq!(Some(id), self.first_id.get());

        Ok(())
    }
}

#[test]
fn rescheduled_event_keeps_identity() {
    let first_id = Rc::new(Cell::new(None));
    let model_id = first_id.clone();

    let mut simu = SimInit::new()
        .register("Rearm", move || Rearm {
            first_id: model_id.clone(),
            remaining: 3,
        })
        .init_network("Rearm")
        .unwrap();

    let reason = simu.run(RunMode::Normal, RunUntil::new()).unwrap();

    assert!(matches!(reason, StopReason::Terminated(_)));
    assert_eq!(simu.event_number(), 4);
    assert_eq!(simu.time(), t(4));
}

/// Tries to schedule into the past.
struct TimeTraveler {
    outcome: Rc<RefCell<Option<Result<EventId, SchedulingError>>>>,
}

impl Model for TimeTraveler {
    fn initialize(&mut self, _: usize, cx: &mut Context<'_>) -> Result<(), ModelError> {
        cx.schedule_at(t(5), Message::new("wake up"))?;

        Ok(())
    }

    fn handle_event(&mut self, _: Event, cx: &mut Context<'_>) -> Result<(), ModelError> {
        *self.outcome.borrow_mut() = Some(cx.schedule_at(t(1), Message::new("too late")));

        Ok(())
    }
}

#[test]
fn scheduling_in_the_past_is_rejected() {
    let outcome = Rc::new(RefCell::new(None));
    let model_outcome = outcome.clone();

    let mut simu = SimInit::new()
        .register("TimeTraveler", move || TimeTraveler {
            outcome: model_outcome.clone(),
        })
        .init_network("TimeTraveler")
        .unwrap();

    simu.step().unwrap();

    assert_eq!(
        outcome.borrow_mut().take(),
        Some(Err(SchedulingError::InvalidScheduledTime {
            scheduled: t(1),
            now: t(5),
        }))
    );
    assert_eq!(simu.pending_events(), 0);
}

#[test]
fn external_message_needs_an_existing_target() {
    let mut simu = SimInit::new()
        .register("Recorder", || Recorder {
            log: Log::default(),
        })
        .init_network("Recorder")
        .unwrap();
    let root = simu.graph().root().unwrap();

    simu.delete_network();

    assert!(simu.inject(t(1), root, Message::new("orphan")).is_err());
}
