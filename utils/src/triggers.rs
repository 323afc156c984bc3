pub use triggered::{Listener, Trigger};

/// Wrapper containing a single Trigger instance
///
/// Used as a one-shot shutdown signal: background loops `select!` on a clone of the listener
/// and the owner fires the trigger once.
#[derive(Debug, Clone)]
pub struct SingleTrigger {
    pub trigger: Trigger,
    pub listener: Listener,
}

impl SingleTrigger {
    pub fn new() -> SingleTrigger {
        let (trigger, listener) = triggered::trigger();
        SingleTrigger { trigger, listener }
    }

    pub fn is_triggered(&self) -> bool {
        self.trigger.is_triggered()
    }
}

impl Default for SingleTrigger {
    fn default() -> Self {
        Self::new()
    }
}
