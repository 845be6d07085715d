//! Message publishing capability.
//!
//! Discovery and reporting code talks to the broker through this trait so
//! the core stays decoupled from a specific MQTT client and testable
//! without one. The firmware wraps rust-mqtt behind it; the no-broker build
//! and the unit tests use log-only and recording sinks.

use core::convert::Infallible;

/// Delivery guarantee for one publish.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QoS {
    /// QoS 0 — at most once.
    AtMostOnce,
    /// QoS 1 — at least once.
    AtLeastOnce,
}

/// Minimal async publish interface.
#[allow(async_fn_in_trait)]
pub trait Publisher {
    type Err;

    /// Publish a binary payload to `topic` with the given QoS and retain
    /// flag.
    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), Self::Err>;
}

/// Log-only sink. Lets the discovery and reporting paths run without a
/// broker connection.
pub struct LogPublisher;

impl Publisher for LogPublisher {
    type Err = Infallible;

    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), Self::Err> {
        log::info!(
            "publish(log-only): topic='{}' len={} {:?} retain={}",
            topic,
            payload.len(),
            qos,
            retain
        );
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{Publisher, QoS};
    use std::string::{String, ToString};
    use std::vec::Vec;

    /// One captured publish.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Captured {
        pub topic: String,
        pub payload: String,
        pub qos: QoS,
        pub retain: bool,
    }

    /// Records every publish for inspection.
    #[derive(Default)]
    pub struct RecordingPublisher {
        pub published: Vec<Captured>,
    }

    impl RecordingPublisher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn topics(&self) -> Vec<String> {
            self.published.iter().map(|m| m.topic.clone()).collect()
        }
    }

    impl Publisher for RecordingPublisher {
        type Err = core::convert::Infallible;

        async fn publish(
            &mut self,
            topic: &str,
            payload: &[u8],
            qos: QoS,
            retain: bool,
        ) -> Result<(), Self::Err> {
            self.published.push(Captured {
                topic: topic.to_string(),
                payload: String::from_utf8_lossy(payload).to_string(),
                qos,
                retain,
            });
            Ok(())
        }
    }
}
