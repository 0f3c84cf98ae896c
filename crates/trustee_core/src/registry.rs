use std::collections::HashMap;

/// Identifies one registration, so a late "finished" message cannot remove a newer entry.
pub type Ticket = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry<H> {
    pub ticket: Ticket,
    pub handle: H,
}

/// Map from election id to its one outstanding cancellable command.
///
/// Single owner: the dispatcher lane. Workers never touch it directly; they report completion
/// with [`CancellationRegistry::finish`] messages processed on the lane.
#[derive(Debug)]
pub struct CancellationRegistry<H> {
    entries: HashMap<String, PendingEntry<H>>,
    next_ticket: Ticket,
}

impl<H> Default for CancellationRegistry<H> {
    fn default() -> Self {
        Self {
            entries: HashMap::with_capacity(4),
            next_ticket: 1,
        }
    }
}

impl<H> CancellationRegistry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pending command. Fails if the election already has one.
    pub fn register(&mut self, election_id: &str, handle: H) -> Option<Ticket> {
        if self.entries.contains_key(election_id) {
            return None;
        }
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.entries
            .insert(election_id.to_owned(), PendingEntry { ticket, handle });
        Some(ticket)
    }

    /// Removes and returns the pending entry for `election_id`, if any.
    pub fn cancel(&mut self, election_id: &str) -> Option<PendingEntry<H>> {
        self.entries.remove(election_id)
    }

    /// Removes the entry for `election_id` only if it still belongs to `ticket`.
    pub fn finish(&mut self, election_id: &str, ticket: Ticket) -> bool {
        match self.entries.get(election_id) {
            Some(entry) if entry.ticket == ticket => {
                self.entries.remove(election_id);
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self, election_id: &str) -> bool {
        self.entries.contains_key(election_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
