//! Inter-agent communication bus.
//!
//! The mailbox table is read on every send and written only on
//! register/unregister, so it is copy-on-write: readers clone an `Arc` to
//! the current table and never hold the lock while delivering.
//!
//! Inboxes are bounded. A full inbox sheds its lowest-priority message,
//! oldest first, which may be the incoming message itself. Messages to a
//! name or group with no live registration are dropped with a warning, a
//! metric and a [`EventType::MessageDropped`] event; the sender never sees
//! an error.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use crew_core::{
    AgentMessage, BusConfig, EventEnvelope, EventSeverity, EventSink, EventType,
    MessageDroppedPayload, Priority, Recipient,
};

/// Why a message (or one copy of a broadcast) was not delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No live registration for the recipient.
    Unroutable,
    /// Shed from a full inbox.
    InboxFull,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unroutable => "unroutable",
            Self::InboxFull => "inbox_full",
        }
    }
}

/// Outcome of one send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: Vec<String>,
    pub dropped: Vec<(String, DropReason)>,
}

impl DeliveryReport {
    pub fn is_delivered(&self) -> bool {
        !self.delivered.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusStats {
    pub sent: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub received: HashMap<String, u64>,
}

struct Queued {
    priority: Priority,
    seq: u64,
    message: AgentMessage,
}

#[derive(Default)]
struct Inbox {
    next_seq: u64,
    messages: Vec<Queued>,
}

struct Mailbox {
    group: String,
    inbox: Mutex<Inbox>,
}

type MailboxTable = HashMap<String, Arc<Mailbox>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct CommunicationBus {
    mailboxes: RwLock<Arc<MailboxTable>>,
    history: Mutex<VecDeque<AgentMessage>>,
    stats: Mutex<BusStats>,
    inbox_capacity: usize,
    history_capacity: usize,
    events: Arc<dyn EventSink>,
}

impl CommunicationBus {
    pub fn new(config: &BusConfig, events: Arc<dyn EventSink>) -> Self {
        Self {
            mailboxes: RwLock::new(Arc::new(HashMap::new())),
            history: Mutex::new(VecDeque::new()),
            stats: Mutex::new(BusStats::default()),
            inbox_capacity: config.inbox_capacity.max(1),
            history_capacity: config.history_capacity,
            events,
        }
    }

    fn table(&self) -> Arc<MailboxTable> {
        self.mailboxes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Copy the table, apply `f`, publish the copy.
    fn update<R>(&self, f: impl FnOnce(&mut MailboxTable) -> R) -> R {
        let mut guard = self.mailboxes.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = (**guard).clone();
        let out = f(&mut next);
        *guard = Arc::new(next);
        out
    }

    /// Open a mailbox for `name` in `group`. Re-registering keeps pending
    /// messages and only moves the mailbox when the group differs.
    pub fn register(&self, name: &str, group: &str) {
        if self.table().get(name).is_some_and(|mb| mb.group == group) {
            return;
        }
        self.update(|table| {
            let inbox = match table.remove(name) {
                Some(old) => std::mem::take(&mut *lock(&old.inbox)),
                None => Inbox::default(),
            };
            table.insert(
                name.to_string(),
                Arc::new(Mailbox {
                    group: group.to_string(),
                    inbox: Mutex::new(inbox),
                }),
            );
        });
        tracing::debug!(agent = %name, group = %group, "Mailbox registered");
    }

    /// Close the mailbox for `name`. Pending messages are discarded.
    /// Returns false when `name` had no mailbox.
    pub fn unregister(&self, name: &str) -> bool {
        if !self.table().contains_key(name) {
            return false;
        }
        let removed = self.update(|table| table.remove(name));
        if let Some(mailbox) = removed {
            let pending = lock(&mailbox.inbox).messages.len();
            tracing::debug!(agent = %name, pending, "Mailbox closed");
            return true;
        }
        false
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.table().contains_key(name)
    }

    /// Every registered name, sorted.
    pub fn registered(&self) -> Vec<String> {
        let mut names: Vec<String> = self.table().keys().cloned().collect();
        names.sort();
        names
    }

    /// Members of `group`, sorted.
    pub fn members(&self, group: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .table()
            .iter()
            .filter(|(_, mb)| mb.group == group)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Route `message` to its recipient or group.
    pub fn send(&self, message: AgentMessage) -> DeliveryReport {
        self.remember(&message);
        let table = self.table();
        let mut report = DeliveryReport::default();

        match &message.recipient {
            Recipient::Agent(name) => match table.get(name) {
                Some(mailbox) => self.deliver(name, mailbox, message.clone(), &mut report),
                None => self.dropped(&message, name, DropReason::Unroutable, &mut report),
            },
            Recipient::Group(group) => {
                let mut members: Vec<(&String, &Arc<Mailbox>)> = table
                    .iter()
                    .filter(|(name, mb)| &mb.group == group && **name != message.sender)
                    .collect();
                members.sort_by(|a, b| a.0.cmp(b.0));
                if members.is_empty() {
                    self.dropped(&message, group, DropReason::Unroutable, &mut report);
                }
                for (name, mailbox) in members {
                    self.deliver(name, mailbox, message.clone(), &mut report);
                }
            }
        }
        report
    }

    fn deliver(
        &self,
        name: &str,
        mailbox: &Mailbox,
        message: AgentMessage,
        report: &mut DeliveryReport,
    ) {
        let (seq, shed) = {
            let mut inbox = lock(&mailbox.inbox);
            let seq = inbox.next_seq;
            inbox.next_seq += 1;
            inbox.messages.push(Queued {
                priority: message.priority,
                seq,
                message,
            });
            let victim = if inbox.messages.len() > self.inbox_capacity {
                inbox
                    .messages
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, q)| (q.priority, q.seq))
                    .map(|(i, _)| i)
            } else {
                None
            };
            (seq, victim.map(|i| inbox.messages.remove(i)))
        };

        if shed.as_ref().map_or(true, |victim| victim.seq != seq) {
            report.delivered.push(name.to_string());
            self.count_delivery(name);
        }
        if let Some(victim) = shed {
            self.dropped(&victim.message, name, DropReason::InboxFull, report);
        }
    }

    fn count_delivery(&self, name: &str) {
        let mut stats = lock(&self.stats);
        stats.delivered += 1;
        *stats.received.entry(name.to_string()).or_default() += 1;
    }

    fn dropped(
        &self,
        message: &AgentMessage,
        recipient: &str,
        reason: DropReason,
        report: &mut DeliveryReport,
    ) {
        tracing::warn!(
            message_id = %message.id,
            sender = %message.sender,
            recipient = %recipient,
            reason = reason.as_str(),
            "Message dropped"
        );
        lock(&self.stats).dropped += 1;
        crew_governance::track_message_dropped(reason.as_str());

        let payload = MessageDroppedPayload {
            message_id: message.id,
            sender: message.sender.clone(),
            recipient: recipient.to_string(),
            reason: reason.as_str().to_string(),
        };
        self.events.emit(
            EventEnvelope::new(
                EventType::MessageDropped,
                serde_json::to_value(&payload).unwrap_or_default(),
            )
            .with_actor("bus")
            .with_severity(EventSeverity::Warning),
        );
        report.dropped.push((recipient.to_string(), reason));
    }

    fn remember(&self, message: &AgentMessage) {
        lock(&self.stats).sent += 1;
        if self.history_capacity == 0 {
            return;
        }
        let mut history = lock(&self.history);
        if history.len() >= self.history_capacity {
            history.pop_front();
        }
        history.push_back(message.clone());
    }

    /// Take every pending message for `name`: highest priority first, FIFO
    /// within a priority.
    pub fn drain(&self, name: &str) -> Vec<AgentMessage> {
        let Some(mailbox) = self.table().get(name).cloned() else {
            return Vec::new();
        };
        let mut queued = std::mem::take(&mut lock(&mailbox.inbox).messages);
        queued.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
        queued.into_iter().map(|q| q.message).collect()
    }

    pub fn pending(&self, name: &str) -> usize {
        self.table()
            .get(name)
            .map(|mb| lock(&mb.inbox).messages.len())
            .unwrap_or(0)
    }

    /// Recent messages, oldest first.
    pub fn history(&self) -> Vec<AgentMessage> {
        lock(&self.history).iter().cloned().collect()
    }

    pub fn stats(&self) -> BusStats {
        lock(&self.stats).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crew_core::{MessageKind, RecordingEventSink};

    fn bus(inbox_capacity: usize) -> (CommunicationBus, RecordingEventSink) {
        let sink = RecordingEventSink::new();
        let config = BusConfig {
            inbox_capacity,
            history_capacity: 3,
        };
        (CommunicationBus::new(&config, Arc::new(sink.clone())), sink)
    }

    fn note(to: &str, content: &str) -> AgentMessage {
        AgentMessage::to_agent(MessageKind::Coordination, "Ada", to, content)
    }

    #[test]
    fn test_priority_order_then_fifo() {
        let (bus, _) = bus(10);
        bus.register("Bo", "crew");
        bus.send(note("Bo", "a"));
        bus.send(note("Bo", "urgent").with_priority(Priority::Urgent));
        bus.send(note("Bo", "b"));
        bus.send(note("Bo", "low").with_priority(Priority::Low));

        let contents: Vec<String> = bus.drain("Bo").into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["urgent", "a", "b", "low"]);
        assert!(bus.drain("Bo").is_empty());
    }

    #[test]
    fn test_unroutable_dropped_with_event() {
        let (bus, sink) = bus(10);
        let report = bus.send(note("Nobody", "hello"));

        assert!(!report.is_delivered());
        assert_eq!(report.dropped, vec![("Nobody".to_string(), DropReason::Unroutable)]);
        assert_eq!(sink.count(&EventType::MessageDropped), 1);
        assert_eq!(bus.stats().dropped, 1);
    }

    #[test]
    fn test_full_inbox_sheds_lowest_priority() {
        let (bus, _) = bus(2);
        bus.register("Bo", "crew");
        bus.send(note("Bo", "low").with_priority(Priority::Low));
        bus.send(note("Bo", "normal"));
        let report = bus.send(note("Bo", "high").with_priority(Priority::High));
        assert_eq!(report.dropped, vec![("Bo".to_string(), DropReason::InboxFull)]);

        let contents: Vec<String> = bus.drain("Bo").into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["high", "normal"]);

        // An incoming message below everything queued is the one shed.
        bus.send(note("Bo", "high").with_priority(Priority::High));
        bus.send(note("Bo", "high").with_priority(Priority::High));
        let report = bus.send(note("Bo", "low").with_priority(Priority::Low));
        assert!(!report.is_delivered());
        assert_eq!(bus.pending("Bo"), 2);
    }

    #[test]
    fn test_group_broadcast_skips_sender() {
        let (bus, _) = bus(10);
        bus.register("Ada", "crew");
        bus.register("Bo", "crew");
        bus.register("Cy", "crew");
        bus.register("Di", "other");

        let report = bus.send(AgentMessage::to_group(MessageKind::Broadcast, "Ada", "crew", "hi"));
        assert_eq!(report.delivered, vec!["Bo", "Cy"]);
        assert!(bus.drain("Ada").is_empty());
        assert_eq!(bus.members("crew"), vec!["Ada", "Bo", "Cy"]);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let (bus, _) = bus(10);
        bus.register("Bo", "crew");
        assert!(bus.unregister("Bo"));
        assert!(!bus.unregister("Bo"));
        assert!(!bus.is_registered("Bo"));
    }

    #[test]
    fn test_history_bounded() {
        let (bus, _) = bus(10);
        for i in 0..5 {
            bus.send(note("Nobody", &i.to_string()));
        }
        let history: Vec<String> = bus.history().into_iter().map(|m| m.content).collect();
        assert_eq!(history, vec!["2", "3", "4"]);
        assert_eq!(bus.stats().sent, 5);
    }
}
