//! Message delivery through gate chains and direct sends.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use simkernel::event::{Delivery, Event, EventId, HopDelay, Message};
use simkernel::graph::{Channel, ComponentId, GateId, GateType};
use simkernel::model::{Context, Model, ModelError, SendError};
use simkernel::notify::{MessageRoute, Notification, NotificationBuffer, Route};
use simkernel::simulation::{RunMode, RunUntil, SimInit, Simulation};
use simkernel::time::MonotonicTime;

const LINK_DELAY: Duration = Duration::from_millis(10);
const LINK_RATE: f64 = 1e6;

fn t(secs: u64) -> MonotonicTime {
    MonotonicTime::EPOCH + Duration::from_secs(secs)
}

/// Instruction carried by a message injected into an application.
#[derive(Clone, Debug)]
enum Command {
    Send(GateId),
    Direct(GateId, Duration),
    Relink(Channel),
    DeleteGate(&'static str),
    ReplaceGate(&'static str, &'static str),
}

type Outcomes = Rc<RefCell<Vec<Result<Option<EventId>, SendError>>>>;
type Received = Rc<RefCell<Vec<(MonotonicTime, Message)>>>;

#[derive(Clone, Default)]
struct Shared {
    outcomes: Outcomes,
    received: Received,
}

/// Two hosts, `host0.out` linked to `host1.in` through a channel.
struct Net;

impl Model for Net {
    fn build(&mut self, cx: &mut Context<'_>) -> Result<(), ModelError> {
        let net = cx.module_id();
        let host0 = cx.create_module("Host", "host0", net, None)?;
        let host1 = cx.create_module("Host", "host1", net, None)?;

        let out = cx.gate_of(host0, "out", None)?;
        let input = cx.gate_of(host1, "in", None)?;
        cx.connect(out, input, Some(Channel::with_delay(LINK_DELAY).datarate(LINK_RATE)))?;

        Ok(())
    }
}

/// Relays its gates to and from its application.
struct Host;

impl Model for Host {
    fn build(&mut self, cx: &mut Context<'_>) -> Result<(), ModelError> {
        cx.add_gate("in", GateType::Input, None)?;
        cx.add_gate("out", GateType::Output, None)?;
        let host = cx.module_id();
        let app = cx.create_module("App", "app", host, None)?;

        let app_out = cx.gate_of(app, "out", None)?;
        let host_out = cx.gate("out", None)?;
        cx.connect(app_out, host_out, None)?;
        let host_in = cx.gate("in", None)?;
        let app_in = cx.gate_of(app, "in", None)?;
        cx.connect(host_in, app_in, None)?;

        Ok(())
    }
}

/// Executes the commands it receives and records everything else.
struct App {
    shared: Shared,
}

impl Model for App {
    fn build(&mut self, cx: &mut Context<'_>) -> Result<(), ModelError> {
        cx.add_gate("in", GateType::Input, None)?;
        cx.add_gate("out", GateType::Output, None)?;
        cx.add_gate("radio", GateType::Input, None)?;
        cx.add_gate("spare", GateType::Output, None)?;

        Ok(())
    }

    fn handle_event(&mut self, event: Event, cx: &mut Context<'_>) -> Result<(), ModelError> {
        let Some(mut message) = event.into_message() else {
            return Ok(());
        };
        let Some(command) = message.take_payload::<Command>() else {
            self.shared.received.borrow_mut().push((cx.time(), message));
            return Ok(());
        };

        let frame = Message::new("frame").with_bit_length(1000);
        let outcome = match command {
            Command::Send(gate) => cx.send(frame, gate),
            Command::Direct(gate, delay) => cx.send_direct(frame, delay, gate).map(Some),
            Command::Relink(channel) => {
                let out = cx.gate_of(cx.module_id(), "out", None)?;
                let parent = cx.graph().parent(cx.module_id()).unwrap();
                let host_out = cx.gate_of(parent, "out", None)?;
                let next = cx.graph().gate(host_out).and_then(|gate| gate.next()).unwrap();
                cx.disconnect(host_out)?;
                cx.connect(host_out, next, Some(channel))?;
                cx.send(frame, out)
            }
            Command::DeleteGate(name) => {
                cx.delete_gate(name)?;
                return Ok(());
            }
            Command::ReplaceGate(old, new) => {
                cx.delete_gate(old)?;
                cx.add_gate(new, GateType::Input, None)?;
                return Ok(());
            }
        };
        self.shared.outcomes.borrow_mut().push(outcome);

        Ok(())
    }
}

fn network(shared: &Shared, buffer: &NotificationBuffer) -> Simulation {
    let shared = shared.clone();

    SimInit::new()
        .register("Net", || Net)
        .register("Host", || Host)
        .register("App", move || App {
            shared: shared.clone(),
        })
        .add_listener(buffer.listener())
        .init_network("Net")
        .unwrap()
}

struct Nodes {
    app0: ComponentId,
    app1: ComponentId,
}

fn nodes(simu: &Simulation) -> Nodes {
    Nodes {
        app0: simu.graph().find_by_path("Net.host0.app").unwrap(),
        app1: simu.graph().find_by_path("Net.host1.app").unwrap(),
    }
}

fn gate(simu: &Simulation, module: ComponentId, name: &str) -> GateId {
    simu.graph().gate_id(module, name, None).unwrap()
}

fn command(simu: &mut Simulation, time: MonotonicTime, target: ComponentId, command: Command) {
    simu.inject(time, target, Message::new("command").with_payload(command))
        .unwrap();
}

fn sent_messages(buffer: &NotificationBuffer) -> Vec<MessageRoute> {
    buffer
        .clone()
        .filter_map(|notification| match notification {
            Notification::MessageSent(route) => Some(route),
            _ => None,
        })
        .collect()
}

#[test]
fn chain_delay_adds_propagation_and_transmission() {
    let shared = Shared::default();
    let buffer = NotificationBuffer::new();
    let mut simu = network(&shared, &buffer);
    let Nodes { app0, app1 } = nodes(&simu);
    let host0 = simu.graph().parent(app0).unwrap();
    let host1 = simu.graph().parent(app1).unwrap();
    let out = gate(&simu, app0, "out");
    command(&mut simu, t(1), app0, Command::Send(out));

    simu.run(RunMode::Normal, RunUntil::new()).unwrap();

    let arrival = t(1) + Duration::from_millis(11);
    let received = shared.received.borrow();
    assert_eq!(received.len(), 1);
    let (time, message) = &received[0];
    assert_eq!(*time, arrival);
    assert_eq!(message.delivery(), Delivery::Gate);
    assert_eq!(message.sender_module(), Some(app0));
    assert_eq!(message.sender_gate(), Some(out));
    assert_eq!(message.arrival_module(), Some(app1));
    assert_eq!(message.arrival_gate(), Some(gate(&simu, app1, "in")));
    assert_eq!(message.sending_time(), t(1));
    assert_eq!(
        message.hops(),
        [HopDelay {
            gate: gate(&simu, host0, "out"),
            propagation_delay: LINK_DELAY,
            transmission_duration: Duration::from_millis(1),
        }]
    );

    let sent = sent_messages(&buffer);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].sender, app0);
    assert_eq!(sent[0].arrival_time, arrival);
    assert_eq!(
        sent[0].route,
        Route::Gates(vec![
            out,
            gate(&simu, host0, "out"),
            gate(&simu, host1, "in"),
            gate(&simu, app1, "in"),
        ])
    );
}

#[test]
fn disabled_channel_drops_the_message() {
    let shared = Shared::default();
    let buffer = NotificationBuffer::new();
    let mut simu = network(&shared, &buffer);
    let Nodes { app0, .. } = nodes(&simu);
    command(
        &mut simu,
        t(1),
        app0,
        Command::Relink(Channel::with_delay(LINK_DELAY).disable()),
    );

    simu.run(RunMode::Normal, RunUntil::new()).unwrap();

    assert!(matches!(shared.outcomes.borrow()[..], [Ok(None)]));
    assert!(shared.received.borrow().is_empty());
    assert_eq!(simu.event_number(), 1);

    let sent = sent_messages(&buffer);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].event, None);
}

#[test]
fn direct_send_follows_the_hierarchy() {
    let shared = Shared::default();
    let buffer = NotificationBuffer::new();
    let mut simu = network(&shared, &buffer);
    let Nodes { app0, app1 } = nodes(&simu);
    let radio = gate(&simu, app1, "radio");
    command(
        &mut simu,
        t(1),
        app0,
        Command::Direct(radio, Duration::from_millis(5)),
    );

    simu.run(RunMode::Normal, RunUntil::new()).unwrap();

    let received = shared.received.borrow();
    assert_eq!(received.len(), 1);
    let (time, message) = &received[0];
    assert_eq!(*time, t(1) + Duration::from_millis(5));
    assert_eq!(message.delivery(), Delivery::Direct);
    assert_eq!(message.arrival_gate(), Some(radio));
    assert!(message.hops().is_empty());

    let sent = sent_messages(&buffer);
    assert_eq!(
        sent[0].route,
        Route::Direct {
            hops: simu.graph().find_path(app0, app1).unwrap(),
            gate: radio,
        }
    );
}

#[test]
fn invalid_sends_are_rejected() {
    let shared = Shared::default();
    let buffer = NotificationBuffer::new();
    let mut simu = network(&shared, &buffer);
    let Nodes { app0, app1 } = nodes(&simu);
    let commands = [
        Command::Send(gate(&simu, app0, "spare")),
        Command::Send(gate(&simu, app0, "in")),
        Command::Send(gate(&simu, app1, "out")),
        Command::Direct(gate(&simu, app1, "in"), Duration::ZERO),
        Command::Direct(gate(&simu, app1, "out"), Duration::ZERO),
    ];
    for cmd in commands {
        command(&mut simu, t(1), app0, cmd);
    }

    simu.run(RunMode::Normal, RunUntil::new()).unwrap();

    let outcomes = shared.outcomes.borrow();
    assert!(matches!(outcomes[0], Err(SendError::NotConnected(_))));
    assert!(matches!(outcomes[1], Err(SendError::NotAnOutput(_))));
    assert!(matches!(outcomes[2], Err(SendError::ForeignGate(_))));
    assert!(matches!(outcomes[3], Err(SendError::ConnectedInput(_))));
    assert!(matches!(outcomes[4], Err(SendError::NotAnInput(_))));
    assert_eq!(simu.event_number(), 5);
    assert!(sent_messages(&buffer).is_empty());
}

#[test]
fn message_to_a_deleted_gate_is_discarded() {
    let shared = Shared::default();
    let buffer = NotificationBuffer::new();
    let mut simu = network(&shared, &buffer);
    let Nodes { app0, app1 } = nodes(&simu);
    let radio = gate(&simu, app1, "radio");
    command(
        &mut simu,
        t(1),
        app0,
        Command::Direct(radio, Duration::from_millis(10)),
    );
    command(
        &mut simu,
        t(1) + Duration::from_millis(1),
        app1,
        Command::DeleteGate("radio"),
    );

    simu.run(RunMode::Normal, RunUntil::new()).unwrap();

    assert!(matches!(shared.outcomes.borrow()[..], [Ok(Some(_))]));
    assert!(shared.received.borrow().is_empty());
    assert_eq!(simu.event_number(), 2);
    assert!(simu.graph().gate(radio).is_none());
}

#[test]
fn message_to_a_replaced_gate_is_discarded() {
    let shared = Shared::default();
    let buffer = NotificationBuffer::new();
    let mut simu = network(&shared, &buffer);
    let Nodes { app0, app1 } = nodes(&simu);
    let radio = gate(&simu, app1, "radio");
    command(
        &mut simu,
        t(1),
        app0,
        Command::Direct(radio, Duration::from_millis(10)),
    );
    command(
        &mut simu,
        t(1) + Duration::from_millis(1),
        app1,
        Command::ReplaceGate("radio", "sensor"),
    );

    simu.run(RunMode::Normal, RunUntil::new()).unwrap();

    let sensor = gate(&simu, app1, "sensor");
    assert_ne!(sensor, radio);
    assert!(simu.graph().gate(radio).is_none());
    assert!(shared.received.borrow().is_empty());
    assert_eq!(simu.event_number(), 2);
}

#[test]
fn unrepresentable_channel_delay_is_rejected() {
    let shared = Shared::default();
    let buffer = NotificationBuffer::new();
    let mut simu = network(&shared, &buffer);
    let Nodes { app0, .. } = nodes(&simu);
    command(
        &mut simu,
        t(1),
        app0,
        Command::Relink(Channel::with_delay(LINK_DELAY).datarate(1e-300)),
    );

    simu.run(RunMode::Normal, RunUntil::new()).unwrap();

    assert!(matches!(
        shared.outcomes.borrow()[..],
        [Err(SendError::InvalidDelay(_))]
    ));
    assert!(shared.received.borrow().is_empty());
    assert!(sent_messages(&buffer).is_empty());
}
