//! Multi-node mesh simulator
//!
//! Every node runs on its own virtual timer wheel; the simulator keeps them
//! in lockstep on one shared clock. Client requests cross a [`LossyLink`],
//! and everything the nodes emit is logged per node for assertions.

use meshlight_core::{ElementId, MeshAddress, MeshError, MeshResult, ModelEvent};
use meshlight_runtime::{Node, NodeConfig};
use meshlight_state::MemoryNvm;
use meshlight_time::VirtualTimers;
use meshlight_wire::{Destination, OutboundMessage};
use tracing::debug;

use crate::client::{Request, TestClient};
use crate::link::{LinkConfig, LinkStats, LossyLink};

/// Unicast address stride between simulated nodes
pub const NODE_ADDRESS_STRIDE: u16 = 0x0100;

/// Largest node count that keeps every element unicast
pub const MAX_NODES: usize = 0x7F;

pub type SimulatedNode = Node<VirtualTimers, MemoryNvm>;

/// A node plus everything it has emitted
pub struct SimNode {
    /// Primary element address
    pub address: MeshAddress,
    pub node: SimulatedNode,
    pub outbound: Vec<OutboundMessage>,
    pub events: Vec<ModelEvent>,
    pub reboots: u32,
}

impl SimNode {
    fn collect(&mut self) {
        self.outbound.extend(self.node.drain_outbox());
        self.node.flush_events(&mut self.events);
    }

    /// Replies addressed to `client`
    pub fn replies_to(&self, client: MeshAddress) -> usize {
        self.outbound
            .iter()
            .filter(|m| m.dst == Destination::Reply(client))
            .count()
    }
}

/// Lockstep simulator for several nodes
pub struct MeshSimulator {
    nodes: Vec<SimNode>,
    link: LossyLink,
    now_ms: u64,
}

impl MeshSimulator {
    pub fn new(link: LinkConfig) -> Self {
        MeshSimulator {
            nodes: Vec::new(),
            link: LossyLink::new(link),
            now_ms: 0,
        }
    }

    /// Simulator over a link that never loses anything
    pub fn perfect() -> Self {
        Self::new(LinkConfig::perfect())
    }

    /// Boot a node with empty storage; returns its index
    pub fn add_node(&mut self, config: NodeConfig) -> MeshResult<usize> {
        if self.nodes.len() >= MAX_NODES {
            return Err(MeshError::CapacityExceeded("simulated nodes"));
        }
        let index = self.nodes.len();
        let address = MeshAddress((index as u16 + 1) * NODE_ADDRESS_STRIDE);
        let node = self.boot(config, MemoryNvm::new())?;
        let mut sim = SimNode {
            address,
            node,
            outbound: Vec::new(),
            events: Vec::new(),
            reboots: 0,
        };
        sim.collect();
        self.nodes.push(sim);
        Ok(index)
    }

    fn boot(&self, config: NodeConfig, nvm: MemoryNvm) -> MeshResult<SimulatedNode> {
        let mut node = Node::with_virtual_timers(config, nvm)?;
        node.run_until(self.now_ms);
        node.power_up();
        Ok(node)
    }

    /// Power-cycle node `index`: same configuration, same storage
    pub fn reboot(&mut self, index: usize) -> MeshResult<()> {
        let (config, nvm) = {
            let sim = &self.nodes[index];
            (sim.node.config().clone(), sim.node.nvm().clone())
        };
        let node = self.boot(config, nvm)?;
        let sim = &mut self.nodes[index];
        debug!(index, address = %sim.address, "node rebooted");
        sim.node = node;
        sim.reboots += 1;
        sim.collect();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    pub fn sim(&self, index: usize) -> &SimNode {
        &self.nodes[index]
    }

    pub fn node(&self, index: usize) -> &SimulatedNode {
        &self.nodes[index].node
    }

    /// Mutable node access; anything it emits is logged on the next step
    pub fn node_mut(&mut self, index: usize) -> &mut SimulatedNode {
        &mut self.nodes[index].node
    }

    /// Unicast address of `element` on node `index`
    pub fn address_of(&self, index: usize, element: ElementId) -> MeshAddress {
        MeshAddress(self.nodes[index].address.0 + element.0 as u16)
    }

    pub fn events(&self, index: usize) -> &[ModelEvent] {
        &self.nodes[index].events
    }

    pub fn outbound(&self, index: usize) -> &[OutboundMessage] {
        &self.nodes[index].outbound
    }

    pub fn take_events(&mut self, index: usize) -> Vec<ModelEvent> {
        std::mem::take(&mut self.nodes[index].events)
    }

    pub fn clear_logs(&mut self) {
        for sim in &mut self.nodes {
            sim.outbound.clear();
            sim.events.clear();
        }
    }

    pub fn link_stats(&self) -> &LinkStats {
        self.link.stats()
    }

    /// Send over the lossy link to one element; returns copies delivered
    pub fn send(&mut self, client: &TestClient, index: usize, element: ElementId, request: &Request) -> usize {
        let dst = self.address_of(index, element);
        let copies = self.link.transmit();
        let msg = request.to(client.address(), dst, element);
        let sim = &mut self.nodes[index];
        for _ in 0..copies {
            sim.node.handle_message(&msg);
        }
        sim.collect();
        copies
    }

    /// Send to `element` of every node through a group address
    pub fn broadcast(&mut self, client: &TestClient, group: MeshAddress, element: ElementId, request: &Request) -> usize {
        let msg = request.to(client.address(), group, element);
        let mut delivered = 0;
        for sim in &mut self.nodes {
            let copies = self.link.transmit();
            for _ in 0..copies {
                sim.node.handle_message(&msg);
            }
            sim.collect();
            delivered += copies;
        }
        delivered
    }

    /// Retransmit the same request until the node replies. Retransmissions
    /// keep their TID, so the node applies the request once.
    pub fn send_reliable(
        &mut self,
        client: &TestClient,
        index: usize,
        element: ElementId,
        request: &Request,
        attempts: usize,
        retry_ms: u64,
    ) -> bool {
        let before = self.nodes[index].replies_to(client.address());
        for attempt in 0..attempts {
            self.send(client, index, element, request);
            if self.nodes[index].replies_to(client.address()) > before {
                return true;
            }
            self.advance(retry_ms);
            if self.nodes[index].replies_to(client.address()) > before {
                return true;
            }
            debug!(attempt, index, "no reply, retransmitting");
        }
        false
    }

    /// Run every node to `until_ms` of shared time
    pub fn run_until(&mut self, until_ms: u64) -> usize {
        self.now_ms = self.now_ms.max(until_ms);
        let mut fired = 0;
        for sim in &mut self.nodes {
            fired += sim.node.run_until(self.now_ms);
            sim.collect();
        }
        fired
    }

    pub fn advance(&mut self, ms: u64) -> usize {
        self.run_until(self.now_ms + ms)
    }

    /// Advance in `step_ms` increments
    pub fn advance_by_steps(&mut self, step_ms: u64, steps: usize) -> usize {
        (0..steps).map(|_| self.advance(step_ms)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshlight_core::{Delay, ModelState, TransitionParams, TransitionTime, UpdateSource};
    use meshlight_wire::OnPowerUp;

    const E0: ElementId = ElementId(0);
    const CLIENT: MeshAddress = MeshAddress(0x0002);
    const GROUP: MeshAddress = MeshAddress(0xC001);

    fn lightness(sim: &MeshSimulator, index: usize) -> u16 {
        sim.node(index).lightness(E0).unwrap().model().present()
    }

    #[test]
    fn test_switch_turns_on_every_light() {
        let mut sim = MeshSimulator::perfect();
        for _ in 0..3 {
            sim.add_node(NodeConfig::dimmable_light()).unwrap();
        }
        let mut client = TestClient::new(CLIENT);

        let on = client.onoff_set_unack(true, None);
        assert_eq!(sim.broadcast(&client, GROUP, E0, &on), 3);
        sim.advance(100);

        for index in 0..3 {
            assert!(sim.node(index).onoff(E0).unwrap().model().present());
            assert!(lightness(&sim, index) > 0);
            // Group addressed: no replies
            assert_eq!(sim.sim(index).replies_to(CLIENT), 0);
        }
    }

    #[test]
    fn test_nodes_share_one_clock() {
        let mut sim = MeshSimulator::perfect();
        let a = sim.add_node(NodeConfig::default()).unwrap();
        let b = sim.add_node(NodeConfig::default()).unwrap();
        let mut client = TestClient::new(CLIENT);
        let level = |sim: &MeshSimulator, index: usize| sim.node(index).level(E0).unwrap().model().present();
        let (start_a, start_b) = (level(&sim, a) as i32, level(&sim, b));

        let transition = TransitionParams::new(TransitionTime::new(10, 0), Delay(0));
        let set = client.level_set(1_000, Some(transition));
        sim.send(&client, a, E0, &set);
        sim.advance(500);
        sim.add_node(NodeConfig::default()).unwrap();

        let halfway = start_a + (1_000 - start_a) * 5 / 10;
        assert_eq!(level(&sim, a) as i32, halfway);
        assert_eq!(level(&sim, b), start_b);
        assert_eq!(sim.node(2).now_ms(), 500);
        assert_eq!(sim.address_of(b, ElementId(1)), MeshAddress(0x0201));
    }

    #[test]
    fn test_reliable_send_applies_once() {
        let mut sim = MeshSimulator::new(LinkConfig::congested().with_seed(11));
        let node = sim.add_node(NodeConfig::dimmable_light()).unwrap();
        let mut client = TestClient::new(CLIENT);

        for target in [0x1000u16, 0x8000, 0x2000] {
            let set = client.lightness_set(target, None);
            assert!(sim.send_reliable(&client, node, E0, &set, 20, 50));
            assert_eq!(lightness(&sim, node), target);
        }

        // Duplicated copies never produce a second network update per Set
        let updates = sim
            .events(node)
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    ModelEvent::StateUpdate {
                        state: ModelState::LightnessActual { .. },
                        source: UpdateSource::Network,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(updates, 3);
    }

    #[test]
    fn test_reboot_restores_from_storage() {
        let mut sim = MeshSimulator::perfect();
        let node = sim.add_node(NodeConfig::dimmable_light()).unwrap();
        let mut client = TestClient::new(CLIENT);

        sim.send(&client, node, E0, &client.on_power_up_set(OnPowerUp::Restore));
        let set = client.lightness_set(0x4000, None);
        sim.send(&client, node, E0, &set);
        sim.advance(1_000);

        sim.reboot(node).unwrap();
        assert_eq!(sim.sim(node).reboots, 1);
        assert_eq!(lightness(&sim, node), 0x4000);
        assert!(sim.node(node).onoff(E0).unwrap().model().present());
        assert_eq!(sim.node(node).now_ms(), sim.now_ms());
    }

    #[test]
    fn test_node_limit() {
        let mut sim = MeshSimulator::perfect();
        for _ in 0..MAX_NODES {
            sim.add_node(NodeConfig::default()).unwrap();
        }
        assert!(sim.add_node(NodeConfig::default()).is_err());
    }
}
