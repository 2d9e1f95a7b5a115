//! End-to-end properties of the engine, driven through access messages

use meshlight_core::{
    Delay, ElementId, MeshAddress, ModelEvent, ModelState, ScheduleAction, TransitionParams,
    TransitionTime,
};
use meshlight_runtime::{Node, NodeConfig};
use meshlight_state::MemoryNvm;
use meshlight_wire::{HslValue, ScheduleEntry, GEN_LEVEL_GET};
use proptest::collection::vec;
use proptest::prelude::*;

use crate::client::{Request, TestClient};
use crate::simulator::{MeshSimulator, SimulatedNode};

const E0: ElementId = ElementId(0);
const CLIENT: MeshAddress = MeshAddress(0x0002);

fn booted(config: NodeConfig) -> SimulatedNode {
    let mut node = Node::with_virtual_timers(config, MemoryNvm::new()).unwrap();
    node.power_up();
    node.drain_outbox();
    node.drain_events();
    node
}

fn deliver(node: &mut SimulatedNode, element: ElementId, request: &Request) {
    node.handle_message(&request.to(CLIENT, MeshAddress(0x0100 + element.0 as u16), element));
}

fn over(steps: u8) -> Option<TransitionParams> {
    Some(TransitionParams::new(TransitionTime::new(steps, 0), Delay(0)))
}

fn level(node: &SimulatedNode) -> i16 {
    node.level(E0).unwrap().model().present()
}

fn lightness(node: &SimulatedNode) -> u16 {
    node.lightness(E0).unwrap().model().present()
}

fn onoff(node: &SimulatedNode) -> bool {
    node.onoff(E0).unwrap().model().present()
}

fn state_updates(events: &[ModelEvent]) -> usize {
    events.iter().filter(|e| e.is_state_update()).count()
}

proptest! {
    #[test]
    fn prop_duplicate_set_is_idempotent(
        target in any::<i16>(),
        steps in 0u8..20,
        elapsed in 0u64..25,
    ) {
        let mut node = booted(NodeConfig::default());
        let mut client = TestClient::new(CLIENT);

        let set = client.level_set(target, over(steps));
        deliver(&mut node, E0, &set);
        node.advance(elapsed * 100);
        let model = node.level(E0).unwrap().model();
        let before = (model.present(), model.target(), model.remaining_ms(), model.is_active());
        node.drain_events();

        deliver(&mut node, E0, &set);
        let model = node.level(E0).unwrap().model();
        prop_assert_eq!(before, (model.present(), model.target(), model.remaining_ms(), model.is_active()));
        prop_assert_eq!(state_updates(&node.drain_events()), 0);

        node.advance(5_000);
        prop_assert_eq!(level(&node), target);
    }

    #[test]
    fn prop_transition_monotonic_and_exact(
        start in 1u16..=u16::MAX,
        target in 1u16..=u16::MAX,
        steps in 1u8..=30,
    ) {
        prop_assume!(start != target);
        let mut node = booted(NodeConfig::dimmable_light());
        let mut client = TestClient::new(CLIENT);
        node.set_lightness(E0, start, Some(TransitionParams::IMMEDIATE)).unwrap();
        node.drain_events();

        deliver(&mut node, E0, &client.lightness_set(target, over(steps)));
        node.advance(steps as u64 * 100);

        let updates: Vec<(u16, u32)> = node
            .drain_events()
            .iter()
            .filter_map(|e| match e {
                ModelEvent::StateUpdate {
                    state: ModelState::LightnessActual { present, remaining_ms, .. },
                    ..
                } => Some((*present, *remaining_ms)),
                _ => None,
            })
            .collect();

        prop_assert!(!updates.is_empty());
        for pair in updates.windows(2) {
            let ((a, ra), (b, rb)) = (pair[0], pair[1]);
            if target > start {
                prop_assert!(b >= a);
            } else {
                prop_assert!(b <= a);
            }
            prop_assert!(rb < ra);
        }
        prop_assert_eq!(updates.last().copied(), Some((target, 0)));
        prop_assert_eq!(lightness(&node), target);
        prop_assert!(!node.lightness(E0).unwrap().model().is_active());
    }

    #[test]
    fn prop_restart_is_continuous(
        first in any::<i16>(),
        second in any::<i16>(),
        ticks in 1u64..10,
    ) {
        let mut node = booted(NodeConfig::default());
        let mut client = TestClient::new(CLIENT);
        node.set_level(E0, 0, Some(TransitionParams::IMMEDIATE)).unwrap();

        deliver(&mut node, E0, &client.level_set(first, over(10)));
        node.advance(ticks * 100);
        let cancelled_at = level(&node);
        prop_assert!(node.level(E0).unwrap().model().is_active());

        deliver(&mut node, E0, &client.level_set(second, over(10)));
        prop_assert_eq!(level(&node), cancelled_at);

        node.advance(100);
        let jump = (level(&node) as i32 - cancelled_at as i32).abs();
        let tick_size = (second as i32 - cancelled_at as i32).abs() / 10;
        prop_assert!(jump <= tick_size);
    }

    #[test]
    fn prop_cascade_is_bounded(
        preset in 0usize..3,
        writes in vec((0u8..4, any::<u16>()), 1..20),
    ) {
        let config = match preset {
            0 => NodeConfig::default(),
            1 => NodeConfig::dimmable_light(),
            _ => NodeConfig::hsl_light(),
        };
        let mut node = booted(config);
        let others = node.graph().len().saturating_sub(1) as u64;

        for (kind, value) in writes {
            let before = node.stats().clone();
            let immediate = Some(TransitionParams::IMMEDIATE);
            let result = match kind {
                0 => node.set_onoff(E0, value & 1 == 1, immediate),
                1 => node.set_level(E0, value as i16, immediate),
                2 => node.set_lightness(E0, value, immediate),
                _ => node.set_hsl(
                    E0,
                    HslValue { lightness: value, hue: value.rotate_left(5), saturation: !value },
                    immediate,
                ),
            };
            if result.is_err() {
                continue;
            }
            let after = node.stats();
            let cascades = after.cascades - before.cascades;
            prop_assert!(cascades >= 1);
            prop_assert!(after.bound_updates - before.bound_updates <= cascades * others);
        }

        if preset > 0 {
            let lightness = lightness(&node);
            prop_assert_eq!(onoff(&node), lightness > 0);
            prop_assert_eq!(level(&node) as i32, lightness as i32 - 32_768);
        }
    }

    #[test]
    fn prop_scene_round_trip(
        scene in 1u16..=0xFFFE,
        stored in any::<u16>(),
        other in any::<u16>(),
    ) {
        let mut node = booted(NodeConfig::dimmable_light());
        let mut client = TestClient::new(CLIENT);
        let immediate = Some(TransitionParams::IMMEDIATE);

        node.set_lightness(E0, stored, immediate).unwrap();
        let snapshot = (lightness(&node), level(&node), onoff(&node));
        deliver(&mut node, E0, &client.scene_store(scene));

        node.set_lightness(E0, other, immediate).unwrap();
        deliver(&mut node, E0, &client.scene_recall(scene, immediate));

        prop_assert_eq!((lightness(&node), level(&node), onoff(&node)), snapshot);
        prop_assert_eq!(node.scene(E0).unwrap().register().current(), scene);
        prop_assert_eq!(node.stats().messages_dropped, 0);
    }
}

#[test]
fn test_scene_zero_is_rejected() {
    let mut node = booted(NodeConfig::dimmable_light());
    let mut client = TestClient::new(CLIENT);
    node.set_lightness(E0, 0x2000, Some(TransitionParams::IMMEDIATE)).unwrap();
    node.drain_outbox();
    node.drain_events();

    deliver(&mut node, E0, &client.scene_store(0));
    deliver(&mut node, E0, &client.scene_recall(0, None));
    deliver(&mut node, E0, &client.scene_delete(0));

    assert_eq!(node.stats().messages_dropped, 3);
    assert!(node.scene(E0).unwrap().register().scenes().is_empty());
    assert!(node.drain_outbox().is_empty());
    assert!(node.drain_events().is_empty());
    assert!(node.store_scene(E0, 0).is_err());
    assert_eq!(lightness(&node), 0x2000);
}

#[test]
fn test_level_one_second_example() {
    let mut sim = MeshSimulator::perfect();
    let index = sim.add_node(NodeConfig::default()).unwrap();
    let mut client = TestClient::new(CLIENT).with_tid(1);
    sim.node_mut(index).set_level(E0, 0, Some(TransitionParams::IMMEDIATE)).unwrap();
    sim.advance(0);
    sim.take_events(index);

    let set = client.level_set(100, over(10));
    assert_eq!(set.params[2], 1);
    sim.send(&client, index, E0, &set);
    sim.advance_by_steps(100, 10);

    let updates: Vec<(i16, u32)> = sim
        .take_events(index)
        .iter()
        .filter_map(|e| match e {
            ModelEvent::StateUpdate {
                state: ModelState::Level { present, remaining_ms, .. },
                ..
            } => Some((*present, *remaining_ms)),
            _ => None,
        })
        .collect();
    let expected: Vec<(i16, u32)> = (1..=10).map(|i| (i * 10, 1_000 - i as u32 * 100)).collect();
    assert_eq!(updates, expected);

    sim.send(&client, index, E0, &client.get(GEN_LEVEL_GET));
    assert_eq!(
        sim.events(index).last(),
        Some(&ModelEvent::CurrentState {
            element: E0,
            state: ModelState::Level {
                present: 100,
                target: 100,
                remaining_ms: 0,
            },
        })
    );
}

#[test]
fn test_unknown_schedule_trigger_is_noop() {
    let mut node = booted(NodeConfig::dimmable_light());
    let before = (onoff(&node), lightness(&node));

    assert_eq!(node.trigger_schedule(E0, 3).unwrap(), None);
    assert!(!node.clear_schedule(E0, 3).unwrap());
    assert_eq!((onoff(&node), lightness(&node)), before);
    assert!(node.drain_events().is_empty());

    let mut entry = ScheduleEntry::empty(3);
    entry.action = ScheduleAction::TurnOn;
    assert!(node.set_schedule(E0, entry).unwrap());
    assert_eq!(node.trigger_schedule(E0, 3).unwrap(), Some(entry));
    assert!(onoff(&node));

    assert!(node.clear_schedule(E0, 3).unwrap());
    node.set_onoff(E0, false, Some(TransitionParams::IMMEDIATE)).unwrap();
    assert_eq!(node.trigger_schedule(E0, 3).unwrap(), None);
    assert!(!onoff(&node));

    // Out of register range
    assert_eq!(node.trigger_schedule(E0, 200).unwrap(), None);
}
