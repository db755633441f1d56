//! Entity path resolution for queues, subscriptions and their dead-letter sub-queues

use std::fmt;

use crate::constants::entity::{DEAD_LETTER_SUFFIX, SUBSCRIPTIONS_SEGMENT};

/// Dead-letter sub-queue path of `entity_path`
///
/// Appends the marker exactly once per call and does not inspect the input, so an empty name
/// yields `/$DeadLetterQueue`. Rejecting empty names is the caller's job.
pub fn dead_letter_path(entity_path: &str) -> String {
    format!("{entity_path}{DEAD_LETTER_SUFFIX}")
}

/// Entity path of a topic subscription
pub fn subscription_path(topic: &str, subscription: &str) -> String {
    format!("{topic}/{SUBSCRIPTIONS_SEGMENT}/{subscription}")
}

/// A logical drain target: an entity plus its dead-letter sub-queue
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DrainTarget {
    Queue { name: String },
    TopicSubscription { topic: String, subscription: String },
}

impl DrainTarget {
    pub fn queue(name: impl Into<String>) -> Self {
        Self::Queue { name: name.into() }
    }

    pub fn subscription(topic: impl Into<String>, subscription: impl Into<String>) -> Self {
        Self::TopicSubscription {
            topic: topic.into(),
            subscription: subscription.into(),
        }
    }

    pub fn primary_path(&self) -> String {
        match self {
            Self::Queue { name } => name.clone(),
            Self::TopicSubscription {
                topic,
                subscription,
            } => subscription_path(topic, subscription),
        }
    }

    pub fn dead_letter_path(&self) -> String {
        dead_letter_path(&self.primary_path())
    }
}

impl fmt::Display for DrainTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queue { name } => write!(f, "queue '{name}'"),
            Self::TopicSubscription {
                topic,
                subscription,
            } => write!(f, "subscription '{topic}/{subscription}'"),
        }
    }
}
