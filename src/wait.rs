//! Ticketed FIFO wait slots with direct grant handoff
//!
//! Blocked borrowers register a slot; whoever frees a resource (or a capacity
//! slot) deposits a grant into the first eligible slot and wakes the pool's
//! condition variable. The grant stays reserved for that waiter, so a third
//! party cannot steal the resource between wake-up and re-acquisition. All
//! methods are called with the owning pool's mutex held.

use std::collections::VecDeque;

pub(crate) struct WaitQueue<K, G> {
    slots: VecDeque<WaitSlot<K, G>>,
    next_ticket: u64,
}

struct WaitSlot<K, G> {
    ticket: u64,
    want: Option<K>,
    grant: Option<G>,
}

impl<K, G> WaitQueue<K, G> {
    pub fn new() -> Self {
        Self {
            slots: VecDeque::new(),
            next_ticket: 0,
        }
    }

    /// Register a waiter; `want` of `None` accepts any resource.
    pub fn enqueue(&mut self, want: Option<K>) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.slots.push_back(WaitSlot {
            ticket,
            want,
            grant: None,
        });
        ticket
    }

    /// Deposit `grant` into the first ungranted slot accepted by `pred`.
    /// Hands the grant back if no slot matches.
    pub fn offer<P>(&mut self, pred: P, grant: G) -> Result<(), G>
    where
        P: Fn(Option<&K>) -> bool,
    {
        for slot in self.slots.iter_mut() {
            if slot.grant.is_none() && pred(slot.want.as_ref()) {
                slot.grant = Some(grant);
                return Ok(());
            }
        }
        Err(grant)
    }

    /// Consume the grant reserved for `ticket`, removing the slot.
    pub fn take_grant(&mut self, ticket: u64) -> Option<G> {
        let pos = self.slots.iter().position(|s| s.ticket == ticket)?;
        if self.slots[pos].grant.is_some() {
            self.slots.remove(pos).and_then(|s| s.grant)
        } else {
            None
        }
    }

    /// Withdraw a waiter, surrendering any grant that raced in.
    pub fn cancel(&mut self, ticket: u64) -> Option<G> {
        let pos = self.slots.iter().position(|s| s.ticket == ticket)?;
        self.slots.remove(pos).and_then(|s| s.grant)
    }

    /// Remove every slot, yielding the grants that were still undelivered.
    pub fn drain(&mut self) -> Vec<G> {
        self.slots.drain(..).filter_map(|s| s.grant).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grants_are_fifo_within_matching_slots() {
        let mut queue: WaitQueue<u32, &str> = WaitQueue::new();
        let first = queue.enqueue(Some(1));
        let second = queue.enqueue(Some(1));

        assert!(queue.offer(|want| want == Some(&1), "a").is_ok());
        assert_eq!(queue.take_grant(second), None);
        assert_eq!(queue.take_grant(first), Some("a"));

        assert!(queue.offer(|want| want == Some(&1), "b").is_ok());
        assert_eq!(queue.take_grant(second), Some("b"));
    }

    #[test]
    fn offer_skips_non_matching_slots() {
        let mut queue: WaitQueue<u32, &str> = WaitQueue::new();
        let other = queue.enqueue(Some(2));
        let any = queue.enqueue(None);

        assert!(queue.offer(|want| want == Some(&1), "x").is_err());
        assert!(queue.offer(|want| want.is_none(), "x").is_ok());
        assert_eq!(queue.take_grant(other), None);
        assert_eq!(queue.take_grant(any), Some("x"));
    }

    #[test]
    fn cancel_surrenders_a_delivered_grant() {
        let mut queue: WaitQueue<u32, &str> = WaitQueue::new();
        let ticket = queue.enqueue(None);
        assert!(queue.offer(|_| true, "late").is_ok());

        assert_eq!(queue.cancel(ticket), Some("late"));
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.cancel(ticket), None);
    }

    #[test]
    fn granted_slots_are_not_offered_twice() {
        let mut queue: WaitQueue<u32, &str> = WaitQueue::new();
        queue.enqueue(None);

        assert!(queue.offer(|_| true, "one").is_ok());
        assert!(queue.offer(|_| true, "two").is_err());
    }

    #[test]
    fn drain_returns_pending_grants_only() {
        let mut queue: WaitQueue<u32, &str> = WaitQueue::new();
        queue.enqueue(None);
        queue.enqueue(None);
        assert!(queue.offer(|_| true, "kept").is_ok());

        let grants = queue.drain();
        assert_eq!(grants, vec!["kept"]);
        assert_eq!(queue.len(), 0);
    }
}
