use std::collections::HashMap;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};

use taskforge_types::{
    ticket_topic, BusEvent, MessageBody, TicketStatus, CONSOLE_TOPIC, STUCK_TOPIC,
};

/// Per-subscriber buffer; a subscriber further behind than this loses
/// events.
const SUBSCRIBER_BUFFER: usize = 256;

/// In-process topic fan-out for interactive observers.
///
/// Publishing never blocks: events go to each subscriber's bounded
/// channel with try_send, and a full or dropped subscriber silently
/// misses the event. Transcripts are durably persisted elsewhere; the
/// bus is a notification channel only.
#[derive(Clone, Default)]
pub struct BroadcastBus {
    topics: Arc<Mutex<HashMap<String, Vec<SyncSender<BusEvent>>>>>,
}

impl BroadcastBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, topic: &str) -> Receiver<BusEvent> {
        let (tx, rx) = sync_channel(SUBSCRIBER_BUFFER);
        self.topics
            .lock()
            .unwrap()
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        rx
    }

    pub fn publish(&self, topic: &str, event: &BusEvent) {
        let mut topics = self.topics.lock().unwrap();
        if let Some(subscribers) = topics.get_mut(topic) {
            subscribers.retain(|tx| match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => true,
                Err(TrySendError::Disconnected(_)) => false,
            });
            if subscribers.is_empty() {
                topics.remove(topic);
            }
        }
    }

    /// Persisted message fan-out: the ticket's topic plus the merged
    /// console topic.
    pub fn publish_message(&self, body: MessageBody) {
        let ticket_id = body.ticket_id;
        let event = BusEvent::Message {
            ticket_id,
            message: body,
        };
        self.publish(&ticket_topic(ticket_id), &event);
        self.publish(CONSOLE_TOPIC, &event);
    }

    pub fn publish_status(&self, ticket_id: i64, status: TicketStatus) {
        let event = BusEvent::Status { ticket_id, status };
        self.publish(&ticket_topic(ticket_id), &event);
    }

    pub fn publish_log(&self, ticket_id: i64, log_type: &str, text: &str) {
        let event = BusEvent::Log {
            log_type: log_type.to_string(),
            text: text.to_string(),
        };
        self.publish(&ticket_topic(ticket_id), &event);
    }

    pub fn publish_stuck(&self, ticket_id: i64, reason: &str) {
        let event = BusEvent::TicketStuck {
            ticket_id,
            reason: reason.to_string(),
        };
        self.publish(STUCK_TOPIC, &event);
        self.publish(&ticket_topic(ticket_id), &event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use taskforge_types::MessageRole;

    fn body(ticket_id: i64) -> MessageBody {
        MessageBody {
            id: 1,
            ticket_id,
            role: MessageRole::Assistant,
            content: Some("hello".to_string()),
            tool_name: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn messages_reach_ticket_and_console_topics() {
        let bus = BroadcastBus::new();
        let ticket_rx = bus.subscribe(&ticket_topic(7));
        let console_rx = bus.subscribe(CONSOLE_TOPIC);

        bus.publish_message(body(7));

        assert!(matches!(
            ticket_rx.try_recv().unwrap(),
            BusEvent::Message { ticket_id: 7, .. }
        ));
        assert!(matches!(
            console_rx.try_recv().unwrap(),
            BusEvent::Message { ticket_id: 7, .. }
        ));
    }

    #[test]
    fn publish_without_subscribers_does_not_block() {
        let bus = BroadcastBus::new();
        bus.publish_status(1, TicketStatus::InProgress);
    }

    #[test]
    fn slow_subscriber_loses_events_but_never_blocks() {
        let bus = BroadcastBus::new();
        let _rx = bus.subscribe(&ticket_topic(1));
        for _ in 0..(SUBSCRIBER_BUFFER + 50) {
            bus.publish_status(1, TicketStatus::InProgress);
        }
        // Producer survived; the receiver holds at most its buffer.
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = BroadcastBus::new();
        drop(bus.subscribe(&ticket_topic(2)));
        bus.publish_status(2, TicketStatus::Open);
        assert!(bus.topics.lock().unwrap().get("ticket:2").is_none());
    }

    #[test]
    fn events_arrive_in_order_per_topic() {
        let bus = BroadcastBus::new();
        let rx = bus.subscribe(&ticket_topic(3));
        bus.publish_status(3, TicketStatus::InProgress);
        bus.publish_status(3, TicketStatus::AwaitingInput);

        assert!(matches!(
            rx.try_recv().unwrap(),
            BusEvent::Status {
                status: TicketStatus::InProgress,
                ..
            }
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            BusEvent::Status {
                status: TicketStatus::AwaitingInput,
                ..
            }
        ));
    }
}
