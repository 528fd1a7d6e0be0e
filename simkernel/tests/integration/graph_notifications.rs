//! Model-change notifications and their scoping.

use std::time::Duration;

use simkernel::event::{Event, Message};
use simkernel::graph::{Channel, ComponentId, GateType};
use simkernel::model::{Context, Model, ModelError};
use simkernel::notify::{ModelChange, Notification, NotificationBuffer};
use simkernel::simulation::{SimInit, Simulation};
use simkernel::time::MonotonicTime;

fn t(secs: u64) -> MonotonicTime {
    MonotonicTime::EPOCH + Duration::from_secs(secs)
}

/// Network with two hosts, each holding an application.
struct Net;

impl Model for Net {
    fn build(&mut self, cx: &mut Context<'_>) -> Result<(), ModelError> {
        let net = cx.module_id();
        cx.create_module("Host", "host0", net, None)?;
        cx.create_module("Host", "host1", net, None)?;

        Ok(())
    }
}

struct Host;

impl Model for Host {
    fn build(&mut self, cx: &mut Context<'_>) -> Result<(), ModelError> {
        cx.add_gate("in", GateType::Input, None)?;
        cx.add_gate("out", GateType::Output, None)?;
        let host = cx.module_id();
        cx.create_module("App", "app", host, None)?;

        Ok(())
    }
}

struct App;

impl Model for App {
    fn handle_event(&mut self, _: Event, _: &mut Context<'_>) -> Result<(), ModelError> {
        Ok(())
    }
}

fn network(buffer: &NotificationBuffer) -> Simulation {
    SimInit::new()
        .register("Net", || Net)
        .register("Host", || Host)
        .register("App", || App)
        .add_listener(buffer.listener())
        .init_network("Net")
        .unwrap()
}

fn module(simu: &Simulation, path: &str) -> ComponentId {
    simu.graph().find_by_path(path).unwrap()
}

/// Drains the recorded model changes.
fn changes(buffer: &NotificationBuffer) -> Vec<(Option<ComponentId>, ModelChange)> {
    buffer
        .clone()
        .filter_map(|notification| match notification {
            Notification::ModelChange { source, change } => Some((source, change)),
            _ => None,
        })
        .collect()
}

#[test]
fn network_creation_starts_with_the_root() {
    let buffer = NotificationBuffer::new();
    let simu = network(&buffer);
    let root = simu.graph().root().unwrap();

    let changes = changes(&buffer);

    assert_eq!(
        changes[..2],
        [
            (
                None,
                ModelChange::PreModuleAdd {
                    parent: None,
                    type_name: "Net".to_owned(),
                    name: "Net".to_owned(),
                    index: None,
                }
            ),
            (Some(root), ModelChange::PostModuleAdd { module: root }),
        ]
    );
    // 5 modules and 4 gates, each announced twice.
    assert_eq!(changes.len(), 18);
    assert!(changes
        .iter()
        .all(|(_, change)| matches!(
            change,
            ModelChange::PreModuleAdd { .. }
                | ModelChange::PostModuleAdd { .. }
                | ModelChange::PreGateAdd { .. }
                | ModelChange::PostGateAdd { .. }
        )));
}

#[test]
fn subtree_deletion_is_announced_around_each_module() {
    let buffer = NotificationBuffer::new();
    let mut simu = network(&buffer);
    let net = module(&simu, "Net");
    let host0 = module(&simu, "Net.host0");
    let app = module(&simu, "Net.host0.app");
    let other_app = module(&simu, "Net.host1.app");
    simu.inject(t(5), app, Message::new("orphaned")).unwrap();
    simu.inject(t(5), other_app, Message::new("kept")).unwrap();
    changes(&buffer);

    simu.schedule_action(t(1), "delete host0", move |cx| cx.delete_module(host0))
        .unwrap();
    simu.step().unwrap();

    let module_changes: Vec<_> = changes(&buffer)
        .into_iter()
        .filter(|(_, change)| {
            matches!(
                change,
                ModelChange::PreModuleDelete { .. } | ModelChange::PostModuleDelete { .. }
            )
        })
        .collect();
    assert_eq!(
        module_changes,
        [
            (Some(host0), ModelChange::PreModuleDelete { module: host0 }),
            (Some(app), ModelChange::PreModuleDelete { module: app }),
            (
                Some(host0),
                ModelChange::PostModuleDelete {
                    module: app,
                    parent: Some(host0),
                    type_name: "App".to_owned(),
                    name: "app".to_owned(),
                    index: None,
                }
            ),
            (
                Some(net),
                ModelChange::PostModuleDelete {
                    module: host0,
                    parent: Some(net),
                    type_name: "Host".to_owned(),
                    name: "host0".to_owned(),
                    index: None,
                }
            ),
        ]
    );

    assert!(simu.graph().find_by_path("Net.host0").is_none());
    assert_eq!(simu.graph().len(), 3);
    assert_eq!(simu.pending_events(), 1);
    assert!(simu
        .future_events()
        .all(|event| event.target() == Some(other_app)));
}

#[test]
fn root_cannot_be_deleted_by_a_model() {
    let buffer = NotificationBuffer::new();
    let mut simu = network(&buffer);
    let net = module(&simu, "Net");

    simu.schedule_action(t(1), "delete root", move |cx| cx.delete_module(net))
        .unwrap();

    assert!(matches!(
        simu.step(),
        Ok(simkernel::simulation::StopReason::Failed(_))
    ));
    assert_eq!(simu.graph().len(), 5);
}

#[test]
fn scope_is_evaluated_when_the_change_is_emitted() {
    let global = NotificationBuffer::new();
    let mut simu = network(&global);
    let net = module(&simu, "Net");
    let host0 = module(&simu, "Net.host0");
    let app = module(&simu, "Net.host0.app");
    let scoped = NotificationBuffer::new();
    simu.subscribe(host0, scoped.listener()).unwrap();
    changes(&global);

    simu.schedule_action(t(1), "move app", move |cx| {
        cx.reparent(app, net)?;
        cx.set_parameter(net, "moved", true)?;

        Ok(())
    })
    .unwrap();
    simu.step().unwrap();

    assert_eq!(
        changes(&global),
        [
            (
                Some(app),
                ModelChange::PreModuleReparent {
                    module: app,
                    new_parent: net,
                }
            ),
            (
                Some(app),
                ModelChange::PostModuleReparent {
                    module: app,
                    old_parent: host0,
                }
            ),
            (
                Some(net),
                ModelChange::PreParameterChange {
                    module: net,
                    name: "moved".to_owned(),
                }
            ),
            (
                Some(net),
                ModelChange::PostParameterChange {
                    module: net,
                    name: "moved".to_owned(),
                }
            ),
        ]
    );
    // Once moved, the application is out of the scope of its former parent.
    assert_eq!(
        changes(&scoped),
        [(
            Some(app),
            ModelChange::PreModuleReparent {
                module: app,
                new_parent: net,
            }
        )]
    );
    assert_eq!(simu.graph().find_by_path("Net.app"), Some(app));
    assert_eq!(simu.graph().parent(app), Some(net));
}

#[test]
fn connection_changes_reach_both_path_ends() {
    let global = NotificationBuffer::new();
    let mut simu = network(&global);
    let net = module(&simu, "Net");
    let host0 = module(&simu, "Net.host0");
    let host1 = module(&simu, "Net.host1");
    let out = simu.graph().gate_id(host0, "out", None).unwrap();
    let input = simu.graph().gate_id(host1, "in", None).unwrap();
    let scoped = NotificationBuffer::new();
    simu.subscribe(host1, scoped.listener()).unwrap();
    changes(&global);

    let channel = Channel::with_delay(Duration::from_millis(5));
    let connect_channel = channel.clone();
    simu.schedule_action(t(1), "connect", move |cx| {
        cx.connect(out, input, Some(connect_channel))?;

        Ok(())
    })
    .unwrap();
    simu.step().unwrap();

    let created: Vec<_> = changes(&global)
        .into_iter()
        .map(|(source, change)| {
            let label = match change {
                ModelChange::PrePathCreate {
                    start,
                    end,
                    changed,
                }
                | ModelChange::PostPathCreate {
                    start,
                    end,
                    changed,
                } => {
                    assert_eq!((start, end, changed), (out, input, out));
                    if change.is_pre() {
                        "pre-path"
                    } else {
                        "post-path"
                    }
                }
                ModelChange::PreGateConnect {
                    gate,
                    target,
                    channel: ref connection_channel,
                } => {
                    assert_eq!((gate, target), (out, input));
                    assert_eq!(connection_channel.as_ref(), Some(&channel));
                    "pre-connect"
                }
                ModelChange::PostGateConnect { gate } => {
                    assert_eq!(gate, out);
                    "post-connect"
                }
                other => panic!("unexpected change: {other:?}"),
            };
            (label, source)
        })
        .collect();
    assert_eq!(
        created,
        [
            ("pre-connect", Some(net)),
            ("pre-path", Some(host0)),
            ("pre-path", Some(host1)),
            ("post-path", Some(host0)),
            ("post-path", Some(host1)),
            ("post-connect", Some(net)),
        ]
    );

    // The listener scoped to the receiving host only sees the path changes
    // emitted on it.
    let sources: Vec<_> = changes(&scoped)
        .into_iter()
        .map(|(source, _)| source)
        .collect();
    assert_eq!(sources, [Some(host1), Some(host1)]);

    let gate = simu.graph().gate(out).unwrap();
    assert_eq!(gate.next(), Some(input));
    assert_eq!(gate.channel(), Some(&channel));
}

#[test]
fn scoped_listener_is_dropped_with_its_component() {
    let buffer = NotificationBuffer::new();
    let mut simu = network(&buffer);
    let host0 = module(&simu, "Net.host0");
    let id = simu.subscribe(host0, NotificationBuffer::new().listener()).unwrap();
    let kept = simu.add_listener(NotificationBuffer::new().listener());

    simu.schedule_action(t(1), "delete host0", move |cx| cx.delete_module(host0))
        .unwrap();
    simu.step().unwrap();

    assert!(!simu.remove_listener(id));
    assert!(simu.remove_listener(kept));
    assert!(simu.subscribe(host0, buffer.listener()).is_err());
}
