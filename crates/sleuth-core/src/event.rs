use crate::types::ResearchEvent;

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<ResearchEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: ResearchEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ResearchEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        bus.publish(ResearchEvent::RoundComplete { round: 1, notes: 0 });
    }

    #[tokio::test]
    async fn test_subscriber_receives() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(ResearchEvent::ToolInvoked {
            name: "read_file".into(),
            is_error: false,
        });
        match rx.recv().await.unwrap() {
            ResearchEvent::ToolInvoked { name, is_error } => {
                assert_eq!(name, "read_file");
                assert!(!is_error);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
