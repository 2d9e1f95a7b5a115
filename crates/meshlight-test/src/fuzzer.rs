//! Message fuzzer for a single node
//!
//! Drives a node with a seeded mix of well-formed requests, retransmissions
//! and garbage parameters while virtual time moves on, then checks:
//! - Every message was accounted for
//! - Bound states agree once a final write settles them
//! - Scene register and transitions stay within their limits

use meshlight_core::{
    Delay, ElementId, MeshAddress, MeshResult, ModelKind, TransitionParams, TransitionTime,
};
use meshlight_runtime::{Node, NodeConfig};
use meshlight_state::MemoryNvm;
use meshlight_time::VirtualTimers;
use meshlight_wire::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::client::{Request, TestClient};

/// Fuzzer configuration
#[derive(Clone, Debug)]
pub struct FuzzerConfig {
    pub node: NodeConfig,
    /// Number of messages to send
    pub message_count: usize,
    /// Probability that a message carries random parameters
    pub malformed_prob: f64,
    /// Probability that the previous message is sent again
    pub retransmit_prob: f64,
    /// Upper bound of the virtual time between two messages
    pub max_gap_ms: u64,
    pub seed: u64,
}

impl Default for FuzzerConfig {
    fn default() -> Self {
        FuzzerConfig {
            node: NodeConfig::dimmable_light(),
            message_count: 1_000,
            malformed_prob: 0.1,
            retransmit_prob: 0.1,
            max_gap_ms: 400,
            seed: 42,
        }
    }
}

impl FuzzerConfig {
    /// Light fuzzing for quick tests
    pub fn light() -> Self {
        FuzzerConfig {
            message_count: 200,
            ..FuzzerConfig::default()
        }
    }

    /// Heavy fuzzing on the full HSL light
    pub fn heavy() -> Self {
        FuzzerConfig {
            node: NodeConfig::hsl_light(),
            message_count: 10_000,
            malformed_prob: 0.2,
            retransmit_prob: 0.2,
            max_gap_ms: 1_000,
            seed: 42,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Outcome of a fuzzing run
#[derive(Clone, Debug, Default)]
pub struct FuzzReport {
    pub messages_sent: u64,
    pub malformed_sent: u64,
    pub retransmissions: u64,
    pub messages_dropped: u64,
    pub events: u64,
    pub outbound: u64,
    pub violations: Vec<String>,
}

impl FuzzReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Opcodes the fuzzer fills with random parameters
const GARBAGE_OPCODES: [Opcode; 12] = [
    GEN_ONOFF_SET,
    GEN_LEVEL_SET,
    GEN_DELTA_SET,
    GEN_MOVE_SET_UNACK,
    GEN_DEF_TRANS_SET,
    GEN_ON_POWER_UP_SET,
    LIGHT_LIGHTNESS_SET,
    LIGHT_LIGHTNESS_RANGE_SET,
    LIGHT_LIGHTNESS_DEFAULT_SET,
    SCENE_RECALL,
    SCENE_STORE,
    Opcode(0x8FFF),
];

/// Seeded message fuzzer
pub struct MessageFuzzer {
    config: FuzzerConfig,
    node: Node<VirtualTimers, MemoryNvm>,
    client: TestClient,
    rng: StdRng,
    report: FuzzReport,
}

impl MessageFuzzer {
    pub fn new(config: FuzzerConfig) -> MeshResult<Self> {
        let mut node = Node::with_virtual_timers(config.node.clone(), MemoryNvm::new())?;
        node.power_up();
        Ok(MessageFuzzer {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            node,
            client: TestClient::new(MeshAddress(0x0002)),
            report: FuzzReport::default(),
        })
    }

    pub fn node(&self) -> &Node<VirtualTimers, MemoryNvm> {
        &self.node
    }

    /// Run the configured number of messages and check the node afterwards
    pub fn run(mut self) -> FuzzReport {
        let mut previous: Option<(ElementId, Request)> = None;

        for _ in 0..self.config.message_count {
            let (element, request) = match previous.take() {
                Some(prev) if self.rng.gen::<f64>() < self.config.retransmit_prob => {
                    self.report.retransmissions += 1;
                    prev
                }
                _ => self.generate(),
            };

            let msg = request.to(self.client.address(), MeshAddress(0x0100 + element.0 as u16), element);
            self.node.handle_message(&msg);
            self.report.messages_sent += 1;
            previous = Some((element, request));

            let gap = self.rng.gen_range(0..=self.config.max_gap_ms);
            self.node.advance(gap);
            self.drain();
            self.check_limits();
        }

        self.settle();
        self.report.messages_dropped = self.node.stats().messages_dropped;
        if self.node.stats().messages_in != self.report.messages_sent {
            let seen = self.node.stats().messages_in;
            self.violation(format!("node saw {} of {} messages", seen, self.report.messages_sent));
        }
        self.report
    }

    fn drain(&mut self) {
        self.report.outbound += self.node.drain_outbox().len() as u64;
        self.report.events += self.node.drain_events().len() as u64;
    }

    fn violation(&mut self, what: String) {
        tracing::warn!(%what, "fuzzer invariant violated");
        self.report.violations.push(what);
    }

    fn element_count(&self) -> usize {
        self.config.node.elements.len()
    }

    fn random_transition(&mut self) -> Option<TransitionParams> {
        if self.rng.gen_bool(0.3) {
            return None;
        }
        // 100 ms or 1 s resolution keeps every transition short enough to settle
        let steps = self.rng.gen_range(0..=20);
        let resolution = self.rng.gen_range(0..=1);
        Some(TransitionParams::new(
            TransitionTime::new(steps, resolution),
            Delay(self.rng.gen_range(0..=40)),
        ))
    }

    fn generate(&mut self) -> (ElementId, Request) {
        let element = ElementId(self.rng.gen_range(0..self.element_count()) as u8);

        if self.rng.gen::<f64>() < self.config.malformed_prob {
            self.report.malformed_sent += 1;
            let opcode = GARBAGE_OPCODES[self.rng.gen_range(0..GARBAGE_OPCODES.len())];
            let len = self.rng.gen_range(0..10);
            let params: Vec<u8> = (0..len).map(|_| self.rng.gen()).collect();
            return (element, Request::new(opcode, params));
        }

        let transition = self.random_transition();
        let request = match self.rng.gen_range(0..14) {
            0 => self.client.onoff_set(self.rng.gen(), transition),
            1 => self.client.onoff_set_unack(self.rng.gen(), transition),
            2 => self.client.level_set(self.rng.gen(), transition),
            3 => {
                let delta = self.rng.gen_range(-20_000..20_000);
                let continuing = self.rng.gen_bool(0.5);
                self.client.delta_set(delta, continuing, transition)
            }
            4 => self.client.move_set(self.rng.gen_range(-2_000..2_000), transition),
            5 => self.client.lightness_set(self.rng.gen(), transition),
            6 => self.client.lightness_linear_set(self.rng.gen(), transition),
            7 => {
                let min = self.rng.gen_range(1..0x8000);
                let max = self.rng.gen_range(min..=u16::MAX);
                self.client.lightness_range_set(min, max)
            }
            8 => self.client.default_transition_set(TransitionTime::new(
                self.rng.gen_range(0..=10),
                self.rng.gen_range(0..=1),
            )),
            9 => self.client.scene_store(self.rng.gen_range(0..8)),
            10 => self.client.scene_recall(self.rng.gen_range(0..8), transition),
            11 => self.client.scene_delete(self.rng.gen_range(0..8)),
            12 => self.client.hsl_set(
                HslValue {
                    lightness: self.rng.gen(),
                    hue: self.rng.gen(),
                    saturation: self.rng.gen(),
                },
                transition,
            ),
            _ => {
                let gets = [GEN_ONOFF_GET, GEN_LEVEL_GET, LIGHT_LIGHTNESS_GET, SCENE_REGISTER_GET, LIGHT_HSL_GET];
                self.client.get(gets[self.rng.gen_range(0..gets.len())])
            }
        };
        (element, request)
    }

    fn check_limits(&mut self) {
        let capacity = self.config.node.scene_capacity;
        let mut problems = Vec::new();
        for index in 0..self.element_count() {
            let element = ElementId(index as u8);
            if let Some(scene) = self.node.scene(element) {
                let stored = scene.register().scenes();
                if stored.len() > capacity {
                    problems.push(format!("{} stores {} scenes", element, stored.len()));
                }
                if stored.contains(&0) {
                    problems.push(format!("{} stored scene 0", element));
                }
            }
            if let Some(lightness) = self.node.lightness(element) {
                let model = lightness.model();
                if !model.is_active() && model.remaining_ms() != 0 {
                    problems.push(format!("{} idle with time remaining", element));
                }
            }
        }
        for problem in problems {
            self.violation(problem);
        }
    }

    /// Let pending transitions finish, then write a final lightness and
    /// check every state bound to it followed
    fn settle(&mut self) {
        self.node.advance(60_000);
        self.drain();

        let e0 = ElementId(0);
        if self.node.model(e0, ModelKind::LightLightness).is_none() {
            return;
        }
        let target = self.rng.gen();
        if let Err(err) = self.node.set_lightness(e0, target, Some(TransitionParams::IMMEDIATE)) {
            self.violation(format!("final lightness write failed: {}", err));
            return;
        }
        self.drain();

        let lightness = self.node.lightness(e0).map(|s| s.model().present()).unwrap_or_default();
        if let Some(onoff) = self.node.onoff(e0) {
            if onoff.model().present() != (lightness > 0) {
                self.violation(format!("onoff disagrees with lightness {:#06x}", lightness));
            }
        }
        if let Some(level) = self.node.level(e0) {
            let expected = (lightness as i32 - 32_768) as i16;
            if level.model().present() != expected {
                self.violation(format!(
                    "level {} disagrees with lightness {:#06x}",
                    level.model().present(),
                    lightness
                ));
            }
        }
        if let Some(hsl) = self.node.hsl(e0) {
            if hsl.present().lightness != lightness {
                self.violation(format!("hsl lightness disagrees with {:#06x}", lightness));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_light_fuzzing_is_clean() {
        let report = MessageFuzzer::new(FuzzerConfig::light()).unwrap().run();
        assert!(report.is_clean(), "{:?}", report.violations);
        assert_eq!(report.messages_sent, 200);
        assert!(report.events > 0);
    }

    #[test]
    fn test_hsl_fuzzing_is_clean() {
        for seed in [1, 2, 3] {
            let config = FuzzerConfig {
                node: NodeConfig::hsl_light(),
                message_count: 300,
                ..FuzzerConfig::light()
            }
            .with_seed(seed);
            let report = MessageFuzzer::new(config).unwrap().run();
            assert!(report.is_clean(), "seed {}: {:?}", seed, report.violations);
        }
    }

    #[test]
    fn test_same_seed_same_report() {
        let a = MessageFuzzer::new(FuzzerConfig::light().with_seed(9)).unwrap().run();
        let b = MessageFuzzer::new(FuzzerConfig::light().with_seed(9)).unwrap().run();
        assert_eq!(a.events, b.events);
        assert_eq!(a.outbound, b.outbound);
        assert_eq!(a.messages_dropped, b.messages_dropped);
    }

    #[test]
    #[ignore]
    fn test_heavy_fuzzing_is_clean() {
        let report = MessageFuzzer::new(FuzzerConfig::heavy()).unwrap().run();
        assert!(report.is_clean(), "{:?}", report.violations);
    }
}
