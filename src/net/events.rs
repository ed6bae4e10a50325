//! Input event buffers shared by the simulation and the wire protocol.

use crate::sim::actor::ClientId;
use crate::sim::input::SPAWN;

/// One client's input for one tick. Produced locally from captured input or
/// decoded from a peer packet; deleted once every peer has acknowledged it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientEvent {
    pub tick: u32,
    pub client: ClientId,
    pub input: Option<u32>,
}

/// Local and remote event buffers with the merge/ordering/GC rules the
/// simulator depends on.
#[derive(Debug, Clone, Default)]
pub struct EventPipeline {
    pub local: Vec<ClientEvent>,
    pub received: Vec<ClientEvent>,
}

impl EventPipeline {
    /// Record the local input word for `tick`, inserting the event if absent
    /// (idempotent per tick). A Spawn flag already recorded for that tick is
    /// merged rather than overwritten: losing the edge-triggered request
    /// because a later write landed on the same tick would drop the respawn.
    pub fn set_local_input(&mut self, tick: u32, client: ClientId, input: u32) {
        let mut input = input;
        if let Some(event) = self.local.iter_mut().find(|e| e.tick == tick) {
            if event.input.unwrap_or(0) & SPAWN != 0 {
                input |= SPAWN;
            }
            event.input = Some(input);
        } else {
            self.local.push(ClientEvent {
                tick,
                client,
                input: Some(input),
            });
        }
    }

    pub fn push_received(&mut self, event: ClientEvent) {
        self.received.push(event);
    }

    /// All events for `tick`, sorted by client id ascending. The sort is the
    /// sole cross-peer tie-break for simultaneous events and must not be
    /// reordered.
    pub fn events_for_tick(&self, tick: u32) -> Vec<ClientEvent> {
        let mut events: Vec<ClientEvent> = self
            .local
            .iter()
            .chain(self.received.iter())
            .filter(|e| e.tick == tick)
            .copied()
            .collect();
        events.sort_by_key(|e| e.client);
        events
    }

    /// Local events a peer has not acknowledged yet, up to `upto` inclusive
    pub fn unacked_local(&self, acknowledged: u32, upto: u32) -> Vec<ClientEvent> {
        self.local
            .iter()
            .filter(|e| e.tick > acknowledged && e.tick <= upto)
            .copied()
            .collect()
    }

    /// Drop events no future tick can depend on: received events at or below
    /// the locally committed tick, local events at or below the lowest tick
    /// acknowledged by every actively-playing peer.
    pub fn gc(&mut self, committed_tick: u32, min_acknowledged: u32) {
        self.received.retain(|e| e.tick > committed_tick);
        self.local.retain(|e| e.tick > min_acknowledged);
    }

    /// Reset for bootstrap adoption at `adopted_tick`
    pub fn reset_for_adoption(&mut self, adopted_tick: u32) {
        self.local.clear();
        self.received.retain(|e| e.tick > adopted_tick);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_event_is_idempotent_per_tick() {
        let mut pipeline = EventPipeline::default();
        pipeline.set_local_input(10, 1, 0x8);
        pipeline.set_local_input(10, 1, 0x10);
        assert_eq!(pipeline.local.len(), 1);
        assert_eq!(pipeline.local[0].input, Some(0x10));
    }

    #[test]
    fn spawn_flag_survives_rewrites() {
        let mut pipeline = EventPipeline::default();
        pipeline.set_local_input(5, 1, SPAWN);
        pipeline.set_local_input(5, 1, 0x8);
        assert_eq!(pipeline.local[0].input, Some(0x8 | SPAWN));
    }

    #[test]
    fn tick_events_sort_by_client_id() {
        let mut pipeline = EventPipeline::default();
        pipeline.set_local_input(3, 9, 1);
        pipeline.push_received(ClientEvent {
            tick: 3,
            client: 2,
            input: Some(2),
        });
        pipeline.push_received(ClientEvent {
            tick: 3,
            client: 5,
            input: Some(3),
        });
        let clients: Vec<_> = pipeline.events_for_tick(3).iter().map(|e| e.client).collect();
        assert_eq!(clients, vec![2, 5, 9]);
    }

    #[test]
    fn gc_is_monotone() {
        let mut pipeline = EventPipeline::default();
        for tick in 1..=10 {
            pipeline.set_local_input(tick, 1, 0);
            pipeline.push_received(ClientEvent {
                tick,
                client: 2,
                input: Some(0),
            });
        }
        pipeline.gc(6, 4);
        assert!(pipeline.received.iter().all(|e| e.tick > 6));
        assert!(pipeline.local.iter().all(|e| e.tick > 4));
        // once collected, a tick's events cannot reappear
        pipeline.gc(6, 4);
        assert_eq!(pipeline.received.len(), 4);
        assert_eq!(pipeline.local.len(), 6);
    }

    #[test]
    fn unacked_range_is_half_open_below() {
        let mut pipeline = EventPipeline::default();
        for tick in 1..=10 {
            pipeline.set_local_input(tick, 1, 0);
        }
        let picked = pipeline.unacked_local(3, 7);
        let ticks: Vec<u32> = picked.iter().map(|e| e.tick).collect();
        assert_eq!(ticks, vec![4, 5, 6, 7]);
    }
}
