//! Fault injection for lifecycle transitions
//!
//! Test deployments register fault definitions keyed by a key class
//! (`"mount"`, `"unmount"`, `"flush"`) and a regex over the key value (the mount
//! path). A transition that hits a blocking fault is parked in a queue for
//! its key class until `unblock` releases it. Nothing here polls.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Key class checked before a mount completes
pub const MOUNT_KEY_CLASS: &str = "mount";

/// Key class checked before an unmount completes
pub const UNMOUNT_KEY_CLASS: &str = "unmount";

/// Key class checked before the overlay flush of an unmount; an error
/// fault here fails the flush
pub const FLUSH_KEY_CLASS: &str = "flush";

/// What a matching fault does to the transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultKind {
    /// Hold the transition until unblocked
    Block,
    /// Sleep before letting the transition continue
    Delay(Duration),
    /// Fail the transition
    Error(String),
}

/// A fault rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultDefinition {
    pub key_class: String,
    pub key_value_regex: String,
    pub kind: FaultKind,
}

impl FaultDefinition {
    /// Blocking fault
    pub fn block(key_class: impl Into<String>, key_value_regex: impl Into<String>) -> Self {
        FaultDefinition {
            key_class: key_class.into(),
            key_value_regex: key_value_regex.into(),
            kind: FaultKind::Block,
        }
    }
}

struct FaultRule {
    definition: FaultDefinition,
    pattern: Regex,
}

/// A transition parked on a blocking fault
struct PendingTransition {
    id: u64,
    key_value: String,
    release: oneshot::Sender<()>,
}

#[derive(Default)]
struct FaultState {
    /// Rules per key class, in registration order
    rules: HashMap<String, Vec<FaultRule>>,
    /// Parked transitions per key class, in arrival order
    pending: HashMap<String, VecDeque<PendingTransition>>,
    next_pending_id: u64,
}

/// Takes a parked transition off its queue once the waiter is gone,
/// including when the waiting future is dropped before release
struct PendingGuard<'a> {
    injector: &'a FaultInjector,
    key_class: &'a str,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.injector.state.lock();
        if let Some(queue) = state.pending.get_mut(self.key_class) {
            queue.retain(|p| p.id != self.id);
            if queue.is_empty() {
                state.pending.remove(self.key_class);
            }
        }
    }
}

/// Process-wide fault table, owned by the checkout service
pub struct FaultInjector {
    enabled: bool,
    state: Mutex<FaultState>,
}

/// Compile a key value regex matching the whole value
fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| Error::InvalidFaultPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

impl FaultInjector {
    pub fn new(enabled: bool) -> Self {
        FaultInjector {
            enabled,
            state: Mutex::new(FaultState::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Register a fault. Replaces an existing rule with the same key class
    /// and regex.
    pub fn inject(&self, definition: FaultDefinition) -> Result<()> {
        if !self.enabled {
            return Err(Error::FaultInjectionDisabled);
        }
        let pattern = compile(&definition.key_value_regex)?;

        info!(
            "Injecting fault {}/{}: {:?}",
            definition.key_class, definition.key_value_regex, definition.kind
        );

        let mut state = self.state.lock();
        let rules = state
            .rules
            .entry(definition.key_class.clone())
            .or_default();
        let rule = FaultRule {
            definition,
            pattern,
        };
        match rules
            .iter_mut()
            .find(|r| r.definition.key_value_regex == rule.definition.key_value_regex)
        {
            Some(existing) => *existing = rule,
            None => rules.push(rule),
        }
        Ok(())
    }

    /// Remove the rule for the pair and release parked transitions whose
    /// key value matches the regex, oldest first. Returns how many were
    /// released.
    pub fn unblock(&self, key_class: &str, key_value_regex: &str) -> Result<usize> {
        let pattern = compile(key_value_regex)?;
        let mut state = self.state.lock();

        if let Some(rules) = state.rules.get_mut(key_class) {
            rules.retain(|r| r.definition.key_value_regex != key_value_regex);
            if rules.is_empty() {
                state.rules.remove(key_class);
            }
        }

        let mut released = 0;
        if let Some(queue) = state.pending.get_mut(key_class) {
            let mut kept = VecDeque::with_capacity(queue.len());
            for pending in queue.drain(..) {
                if pattern.is_match(&pending.key_value) {
                    debug!("Releasing {} transition for {}", key_class, pending.key_value);
                    // receiver is gone if the waiting caller was cancelled
                    let _ = pending.release.send(());
                    released += 1;
                } else {
                    kept.push_back(pending);
                }
            }
            *queue = kept;
            if queue.is_empty() {
                state.pending.remove(key_class);
            }
        }

        info!(
            "Unblocked fault {}/{}: released {} transitions",
            key_class, key_value_regex, released
        );
        Ok(released)
    }

    /// Remove a rule without releasing anything parked on it
    pub fn remove(&self, key_class: &str, key_value_regex: &str) -> bool {
        let mut state = self.state.lock();
        let Some(rules) = state.rules.get_mut(key_class) else {
            return false;
        };
        let before = rules.len();
        rules.retain(|r| r.definition.key_value_regex != key_value_regex);
        let removed = rules.len() != before;
        if rules.is_empty() {
            state.rules.remove(key_class);
        }
        removed
    }

    /// All registered rules, grouped by key class
    pub fn list(&self) -> Vec<FaultDefinition> {
        let state = self.state.lock();
        let mut classes: Vec<_> = state.rules.keys().cloned().collect();
        classes.sort();
        classes
            .iter()
            .flat_map(|class| state.rules[class].iter().map(|r| r.definition.clone()))
            .collect()
    }

    /// Number of transitions parked on a key class
    pub fn pending_count(&self, key_class: &str) -> usize {
        self.state
            .lock()
            .pending
            .get(key_class)
            .map(|q| q.len())
            .unwrap_or(0)
    }

    /// Apply the first matching fault to a transition. Blocks (without
    /// polling) until released when the fault is a block.
    pub async fn check(&self, key_class: &str, key_value: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let kind = {
            let state = self.state.lock();
            state
                .rules
                .get(key_class)
                .and_then(|rules| rules.iter().find(|r| r.pattern.is_match(key_value)))
                .map(|r| r.definition.kind.clone())
        };

        match kind {
            None => Ok(()),
            Some(FaultKind::Block) => {
                let (tx, rx) = oneshot::channel();
                let id = {
                    let mut state = self.state.lock();
                    // rule may have been unblocked since the lookup
                    let still_blocked = state.rules.get(key_class).is_some_and(|rules| {
                        rules.iter().any(|r| {
                            r.definition.kind == FaultKind::Block && r.pattern.is_match(key_value)
                        })
                    });
                    if !still_blocked {
                        return Ok(());
                    }
                    let id = state.next_pending_id;
                    state.next_pending_id += 1;
                    state
                        .pending
                        .entry(key_class.to_string())
                        .or_default()
                        .push_back(PendingTransition {
                            id,
                            key_value: key_value.to_string(),
                            release: tx,
                        });
                    id
                };
                let _pending = PendingGuard {
                    injector: self,
                    key_class,
                    id,
                };
                debug!("{} transition for {} blocked by fault", key_class, key_value);
                if rx.await.is_err() {
                    warn!("Fault queue dropped {} transition for {}", key_class, key_value);
                }
                Ok(())
            }
            Some(FaultKind::Delay(delay)) => {
                debug!("Delaying {} transition for {} by {:?}", key_class, key_value, delay);
                tokio::time::sleep(delay).await;
                Ok(())
            }
            Some(FaultKind::Error(message)) => Err(Error::FaultInjected {
                key_class: key_class.to_string(),
                key_value: key_value.to_string(),
                message,
            }),
        }
    }
}
