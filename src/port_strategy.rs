//! Provides a means to decide in which order ports are probed.
use crate::input::ScanOrder;
use rand::seq::SliceRandom;

/// Order in which a host's ports are handed to the probe pool.
///
/// Results are always reported sorted by port; the strategy only changes
/// the order in which probes are issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortStrategy {
    Serial(Vec<u16>),
    Random(Vec<u16>),
}

impl PortStrategy {
    /// Builds a strategy over an already validated port list.
    pub fn pick(ports: Vec<u16>, order: ScanOrder) -> Self {
        match order {
            ScanOrder::Serial => PortStrategy::Serial(ports),
            ScanOrder::Random => {
                let mut ports = ports;
                ports.shuffle(&mut rand::rng());
                PortStrategy::Random(ports)
            }
        }
    }

    pub fn order(&self) -> &[u16] {
        match self {
            PortStrategy::Serial(ports) | PortStrategy::Random(ports) => ports,
        }
    }

    pub fn len(&self) -> usize {
        self.order().len()
    }

    pub fn is_empty(&self) -> bool {
        self.order().is_empty()
    }
}
