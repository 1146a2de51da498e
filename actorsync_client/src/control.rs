//! Control messages.
//!
//! The game supplies its control state every render; it is only sent when it
//! differs from the last value sent.

use actorsync_shared::codec;
use serde_json::Value;

#[derive(Debug, Default)]
pub struct ControlChannel {
    last_sent: Option<Value>,
    sent: u64,
}

impl ControlChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the frame to send for `control`, or `None` if it equals the
    /// previous one.
    pub fn outgoing(&mut self, control: Value) -> Option<String> {
        if self.last_sent.as_ref() == Some(&control) {
            return None;
        }
        let frame = codec::encode_value(&control);
        self.last_sent = Some(control);
        self.sent += 1;
        Some(frame)
    }

    pub fn last_sent(&self) -> Option<&Value> {
        self.last_sent.as_ref()
    }

    /// Number of control frames produced.
    pub fn sent(&self) -> u64 {
        self.sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identical_controls_are_sent_once() {
        let mut ch = ControlChannel::new();
        assert_eq!(ch.outgoing(json!({"dx": 1, "dy": 0})).as_deref(), Some("{dx:1,dy:0}"));
        assert_eq!(ch.outgoing(json!({"dx": 1, "dy": 0})), None);
        assert_eq!(ch.outgoing(json!({"dx": 0, "dy": 0})).as_deref(), Some("{dx:0,dy:0}"));
        assert_eq!(ch.outgoing(json!({"dx": 1, "dy": 0})).as_deref(), Some("{dx:1,dy:0}"));
        assert_eq!(ch.sent(), 3);
    }
}
