//! Async node driver
//!
//! Runs a [`Node`] on one tokio task. Every input goes through one channel
//! and is handled to completion before the next, so the node keeps its
//! single-threaded model. The node's virtual timer wheel is slaved to the
//! tokio clock: virtual milliseconds are milliseconds since the driver
//! started, and the loop sleeps until the next armed deadline.

use std::time::Duration;

use meshlight_core::{ElementId, ModelEvent, TransitionParams};
use meshlight_state::Nvm;
use meshlight_time::VirtualTimers;
use meshlight_wire::{InboundMessage, OutboundMessage};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{Node, NodeError, NodeResult};

/// Input queued to the driver
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Input {
    /// Access message from the transport
    Message(InboundMessage),
    /// Apply persisted state
    PowerUp,
    SetOnOff {
        element: ElementId,
        on: bool,
        transition: Option<TransitionParams>,
    },
    SetLevel {
        element: ElementId,
        level: i16,
        transition: Option<TransitionParams>,
    },
    SetLightness {
        element: ElementId,
        lightness: u16,
        transition: Option<TransitionParams>,
    },
    StoreScene {
        element: ElementId,
        scene: u16,
    },
    RecallScene {
        element: ElementId,
        scene: u16,
        transition: Option<TransitionParams>,
    },
    /// Stop the driver and hand the node back
    Shutdown,
}

/// What the node produced while handling inputs
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Output {
    pub outbound: Vec<OutboundMessage>,
    pub events: Vec<ModelEvent>,
}

impl Output {
    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty() && self.events.is_empty()
    }
}

/// Sending side of a running driver
#[derive(Clone, Debug)]
pub struct NodeHandle {
    tx: mpsc::Sender<Input>,
}

impl NodeHandle {
    pub async fn send(&self, input: Input) -> NodeResult<()> {
        self.tx.send(input).await.map_err(|_| NodeError::DriverStopped)
    }

    pub async fn message(&self, msg: InboundMessage) -> NodeResult<()> {
        self.send(Input::Message(msg)).await
    }

    pub async fn shutdown(&self) -> NodeResult<()> {
        self.send(Input::Shutdown).await
    }
}

/// Driver task state
pub struct NodeDriver<N> {
    node: Node<VirtualTimers, N>,
    inputs: mpsc::Receiver<Input>,
    outputs: mpsc::Sender<Output>,
    started: Instant,
}

impl<N: Nvm + Send + 'static> NodeDriver<N> {
    /// Spawn the driver. The join handle yields the node after shutdown.
    pub fn spawn(
        node: Node<VirtualTimers, N>,
        capacity: usize,
    ) -> (NodeHandle, mpsc::Receiver<Output>, JoinHandle<Node<VirtualTimers, N>>) {
        let (input_tx, input_rx) = mpsc::channel(capacity);
        let (output_tx, output_rx) = mpsc::channel(capacity);
        let driver = NodeDriver {
            node,
            inputs: input_rx,
            outputs: output_tx,
            started: Instant::now(),
        };
        let task = tokio::spawn(driver.run());
        (NodeHandle { tx: input_tx }, output_rx, task)
    }

    async fn run(mut self) -> Node<VirtualTimers, N> {
        info!("node driver started");

        loop {
            let deadline = self.node.timers().next_deadline();
            let wake = self.started + Duration::from_millis(deadline.unwrap_or(0));

            tokio::select! {
                input = self.inputs.recv() => match input {
                    Some(Input::Shutdown) | None => break,
                    Some(input) => {
                        self.catch_up();
                        self.apply(input);
                    }
                },

                _ = tokio::time::sleep_until(wake), if deadline.is_some() => {
                    self.catch_up();
                }
            }

            if self.flush().await.is_err() {
                debug!("output receiver dropped");
                break;
            }
        }

        info!(stats = ?self.node.stats(), "node driver stopped");
        self.node
    }

    /// Deliver timer expiries up to the current tokio time
    fn catch_up(&mut self) {
        let elapsed = self.started.elapsed().as_millis() as u64;
        self.node.run_until(elapsed);
    }

    fn apply(&mut self, input: Input) {
        let result = match input {
            Input::Message(msg) => {
                self.node.handle_message(&msg);
                Ok(())
            }
            Input::PowerUp => {
                self.node.power_up();
                Ok(())
            }
            Input::SetOnOff {
                element,
                on,
                transition,
            } => self.node.set_onoff(element, on, transition),
            Input::SetLevel {
                element,
                level,
                transition,
            } => self.node.set_level(element, level, transition),
            Input::SetLightness {
                element,
                lightness,
                transition,
            } => self.node.set_lightness(element, lightness, transition),
            Input::StoreScene { element, scene } => self.node.store_scene(element, scene),
            Input::RecallScene {
                element,
                scene,
                transition,
            } => self.node.recall_scene(element, scene, transition),
            Input::Shutdown => Ok(()),
        };
        if let Err(err) = result {
            warn!(%err, "local input rejected");
        }
    }

    async fn flush(&mut self) -> Result<(), mpsc::error::SendError<Output>> {
        let output = Output {
            outbound: self.node.drain_outbox(),
            events: self.node.drain_events(),
        };
        if output.is_empty() {
            return Ok(());
        }
        self.outputs.send(output).await
    }
}
