//! Name, gate and route resolution in a star network.

use std::time::Duration;

use simkernel::graph::{
    Channel, ComponentId, GateType, GraphError, Hop, ModuleGraph, ResolutionError,
    StructuralError,
};
use simkernel::model::{Context, Model, ModelError};
use simkernel::simulation::{SimInit, Simulation};

const HOSTS: usize = 3;

/// Hosts linked to a central switch through bidirectional ports.
struct Star;

impl Model for Star {
    fn build(&mut self, cx: &mut Context<'_>) -> Result<(), ModelError> {
        let star = cx.module_id();
        let switch = cx.create_module("Switch", "switch", star, None)?;
        for i in 0..HOSTS {
            let host = cx.create_module("Host", "host", star, Some(i))?;

            let uplink = Channel::with_delay(Duration::from_micros(100));
            let host_out = cx.gate_of(host, "port$o", None)?;
            let switch_in = cx.gate_of(switch, "port$i", Some(i))?;
            cx.connect(host_out, switch_in, Some(uplink.clone()))?;
            let switch_out = cx.gate_of(switch, "port$o", Some(i))?;
            let host_in = cx.gate_of(host, "port$i", None)?;
            cx.connect(switch_out, host_in, Some(uplink))?;
        }

        Ok(())
    }
}

struct Switch;

impl Model for Switch {
    fn build(&mut self, cx: &mut Context<'_>) -> Result<(), ModelError> {
        cx.add_gate("port", GateType::Inout, Some(HOSTS))?;

        Ok(())
    }
}

struct Host;

impl Model for Host {
    fn build(&mut self, cx: &mut Context<'_>) -> Result<(), ModelError> {
        cx.add_gate("port", GateType::Inout, None)?;

        Ok(())
    }
}

fn star() -> Simulation {
    SimInit::new()
        .register("Star", || Star)
        .register("Switch", || Switch)
        .register("Host", || Host)
        .init_network("Star")
        .unwrap()
}

fn module(graph: &ModuleGraph, path: &str) -> ComponentId {
    graph.find_by_path(path).unwrap()
}

#[test]
fn module_paths_round_trip() {
    let simu = star();
    let graph = simu.graph();

    assert_eq!(graph.len(), 2 + HOSTS);
    for id in graph.pre_order(graph.root().unwrap()) {
        let path = graph.full_path(id).unwrap();
        assert_eq!(graph.find_by_path(&path), Some(id), "{path}");
    }

    let host = module(graph, "Star.host[1]");
    let component = graph.component(host).unwrap();
    assert_eq!(component.name(), "host");
    assert_eq!(component.index(), Some(1));
    assert_eq!(component.type_name(), "Host");
    assert!(graph.find_by_path("Star.host").is_none());
    assert!(graph.find_by_path("Star.host[3]").is_none());
    assert!(graph.find_by_path("Other.switch").is_none());
}

#[test]
fn gates_resolve_by_half_and_index() {
    let simu = star();
    let graph = simu.graph();
    let switch = module(graph, "Star.switch");

    let gate = graph.gate_id(switch, "port$o", Some(2)).unwrap();
    assert_eq!(graph.gate_path(gate).unwrap(), "Star.switch.port$o[2]");
    assert_eq!(graph.gate_size(switch, "port"), Ok(Some(HOSTS)));
    assert_eq!(graph.gates(switch).len(), 2 * HOSTS);

    assert!(matches!(
        graph.gate_id(switch, "port$o", Some(HOSTS)),
        Err(GraphError::Resolution(ResolutionError::IndexOutOfRange { index: HOSTS, size: HOSTS, .. }))
    ));
    assert!(matches!(
        graph.gate_id(switch, "port$i", None),
        Err(GraphError::Structural(StructuralError::IsAVector(_)))
    ));
    assert!(matches!(
        graph.gate_id(switch, "port", Some(0)),
        Err(GraphError::Resolution(ResolutionError::NoSuchGate { .. }))
    ));
    assert!(matches!(
        graph.gate_id(switch, "port$x", Some(0)),
        Err(GraphError::Resolution(ResolutionError::NoSuchGate { .. }))
    ));
}

#[test]
fn gate_chains_have_two_ends() {
    let simu = star();
    let graph = simu.graph();
    let switch = module(graph, "Star.switch");
    let host = module(graph, "Star.host[0]");

    let host_out = graph.gate_id(host, "port$o", None).unwrap();
    let switch_in = graph.gate_id(switch, "port$i", Some(0)).unwrap();
    assert_eq!(graph.path_start(switch_in), Ok(host_out));
    assert_eq!(graph.path_end(host_out), Ok(switch_in));

    let gate = graph.gate(host_out).unwrap();
    assert_eq!(gate.next(), Some(switch_in));
    assert_eq!(gate.channel().map(|channel| channel.delay), Some(Duration::from_micros(100)));
    assert_eq!(graph.gate(switch_in).unwrap().prev(), Some(host_out));
}

#[test]
fn routes_through_the_hierarchy() {
    let simu = star();
    let graph = simu.graph();
    let root = graph.root().unwrap();
    let switch = module(graph, "Star.switch");
    let host0 = module(graph, "Star.host[0]");
    let host2 = module(graph, "Star.host[2]");

    assert_eq!(
        graph.find_path(host0, host2),
        Ok(vec![Hop::Cross {
            within: root,
            from: host0,
            to: host2,
        }])
    );
    assert_eq!(graph.find_path(root, switch), Ok(vec![Hop::Descend(switch)]));
    assert_eq!(graph.find_path(switch, root), Ok(vec![Hop::Ascend(switch)]));
    assert_eq!(graph.find_path(host2, host2), Ok(Vec::new()));
    assert_eq!(graph.common_ancestor(host0, switch), Some(root));
}

#[test]
fn connected_gate_vectors_cannot_shrink_over_connections() {
    let mut graph = ModuleGraph::new();
    let net = graph.create_component("Net", "net", None, None).unwrap();
    let a = graph.create_component("Node", "a", Some(net), None).unwrap();
    let b = graph.create_component("Node", "b", Some(net), None).unwrap();
    graph.add_gate(a, "out", GateType::Output, Some(2)).unwrap();
    graph.add_gate(b, "in", GateType::Input, Some(2)).unwrap();
    let from = graph.gate_id(a, "out", Some(1)).unwrap();
    let to = graph.gate_id(b, "in", Some(0)).unwrap();
    graph.connect(from, to, None).unwrap();

    assert!(matches!(
        graph.resize_gate_vector(a, "out", 1),
        Err(GraphError::Structural(StructuralError::ShrinkConnected(_)))
    ));

    graph.resize_gate_vector(a, "out", 4).unwrap();
    assert_eq!(graph.gate_size(a, "out"), Ok(Some(4)));
    assert_eq!(graph.gate_id(a, "out", Some(1)), Ok(from));
    assert_eq!(graph.gate(from).unwrap().next(), Some(to));

    // Shrinking over unconnected gates is allowed.
    graph.resize_gate_vector(b, "in", 1).unwrap();
    assert_eq!(graph.gate_id(b, "in", Some(0)), Ok(to));
    assert!(graph.gate_id(b, "in", Some(1)).is_err());
}

#[test]
fn moving_a_connected_module_is_rejected() {
    let mut graph = ModuleGraph::new();
    let net = graph.create_component("Net", "net", None, None).unwrap();
    let a = graph.create_component("Node", "a", Some(net), None).unwrap();
    let b = graph.create_component("Node", "b", Some(net), None).unwrap();
    let c = graph.create_component("Node", "c", Some(net), None).unwrap();
    graph.add_gate(a, "out", GateType::Output, None).unwrap();
    graph.add_gate(b, "in", GateType::Input, None).unwrap();
    let from = graph.gate_id(a, "out", None).unwrap();
    let to = graph.gate_id(b, "in", None).unwrap();
    graph.connect(from, to, None).unwrap();

    assert!(matches!(
        graph.reparent(a, c),
        Err(GraphError::Structural(StructuralError::ConnectedGates(_)))
    ));
    assert!(matches!(
        graph.reparent(net, c),
        Err(GraphError::Structural(StructuralError::RootOperation))
    ));

    graph.disconnect(from).unwrap();
    graph.reparent(a, c).unwrap();
    assert_eq!(graph.full_path(a).as_deref(), Some("net.c.a"));
    assert_eq!(
        graph.find_path(a, b),
        Ok(vec![
            Hop::Ascend(a),
            Hop::Cross {
                within: net,
                from: c,
                to: b,
            },
        ])
    );
}
