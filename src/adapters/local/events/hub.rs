use super::QueueEvent;
use tokio::sync::broadcast;

/// Fan-out of status and donation events to every subscriber.
#[derive(Debug)]
pub struct EventHub {
    sender: broadcast::Sender<QueueEvent>,
}

impl EventHub {
    pub fn new() -> Self {
        // Slow subscribers lag and skip rather than block publishers
        let (sender, _) = broadcast::channel(256);
        Self { sender }
    }

    /// Publish to current subscribers. Returns how many received it; having
    /// none is not an error.
    pub fn publish(&self, event: QueueEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let hub = EventHub::new();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        let event = QueueEvent::Donate {
            show_donate_popup: true,
        };
        assert_eq!(hub.publish(event.clone()), 2);
        assert_eq!(a.recv().await.unwrap(), event);
        assert_eq!(b.recv().await.unwrap(), event);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let hub = EventHub::new();
        assert_eq!(
            hub.publish(QueueEvent::Donate {
                show_donate_popup: true
            }),
            0
        );
    }
}
