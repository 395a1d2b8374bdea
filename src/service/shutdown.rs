// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use tokio::sync::broadcast;

/// Owner side of a shutdown signal. Triggering, or dropping the trigger,
/// wakes every [`Shutdown`] subscribed to it.
#[derive(Debug)]
pub struct ShutdownTrigger {
    notify: broadcast::Sender<()>,
}

impl ShutdownTrigger {
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(1);
        ShutdownTrigger { notify }
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            is_shutdown: false,
            notify: self.notify.subscribe(),
        }
    }

    /// Returns how many listeners were still waiting.
    pub fn trigger(self) -> usize {
        self.notify.send(()).unwrap_or(0)
    }
}

impl Default for ShutdownTrigger {
    fn default() -> Self {
        Self::new()
    }
}

/// Listener side of a [`ShutdownTrigger`]. Once signalled it stays shut down.
#[derive(Debug)]
pub struct Shutdown {
    is_shutdown: bool,
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown
    }

    pub async fn recv(&mut self) {
        if self.is_shutdown {
            return;
        }
        // a lagged or closed channel means the trigger fired or went away
        let _ = self.notify.recv().await;
        self.is_shutdown = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_wakes_every_listener() {
        let trigger = ShutdownTrigger::new();
        let mut first = trigger.subscribe();
        let mut second = trigger.subscribe();
        assert!(!first.is_shutdown());

        assert_eq!(trigger.trigger(), 2);
        first.recv().await;
        second.recv().await;
        assert!(first.is_shutdown() && second.is_shutdown());
        // stays shut down without waiting again
        first.recv().await;
    }

    #[tokio::test]
    async fn test_dropped_trigger_counts_as_signal() {
        let trigger = ShutdownTrigger::default();
        let mut listener = trigger.subscribe();
        drop(trigger);
        listener.recv().await;
        assert!(listener.is_shutdown());
    }

    #[test]
    fn test_trigger_without_listeners() {
        assert_eq!(ShutdownTrigger::new().trigger(), 0);
    }
}
