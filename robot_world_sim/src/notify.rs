// Change notifications for observers of a simulation instance.
//
// Any number of observers `subscribe()` and receive every later
// `Notification` on their own std `mpsc` channel. Senders whose receiver has
// been dropped are pruned on the next publish.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, PoisonError};

use crate::types::ObjectId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Notification {
    /// Objects were added, removed or reset.
    WorldChanged,
    /// A robot moved, turned or changed speed.
    RobotChanged(ObjectId),
}

#[derive(Default)]
pub struct Notifier {
    subscribers: Mutex<Vec<Sender<Notification>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<Notification> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub fn publish(&self, notification: Notification) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| tx.send(notification).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_sees_each_notification() {
        let notifier = Notifier::new();
        let a = notifier.subscribe();
        let b = notifier.subscribe();
        notifier.publish(Notification::RobotChanged(ObjectId(3)));
        assert_eq!(a.try_recv().unwrap(), Notification::RobotChanged(ObjectId(3)));
        assert_eq!(b.try_recv().unwrap(), Notification::RobotChanged(ObjectId(3)));
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let notifier = Notifier::new();
        let keep = notifier.subscribe();
        drop(notifier.subscribe());
        notifier.publish(Notification::WorldChanged);
        assert_eq!(notifier.subscriber_count(), 1);
        assert_eq!(keep.try_recv().unwrap(), Notification::WorldChanged);
    }
}
