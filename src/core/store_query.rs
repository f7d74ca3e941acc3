use tracing::debug;

use crate::common::{Contact, Id, StoreRequest, ValueItem};
use crate::error::{ProtocolError, RpcError};

#[derive(Debug)]
/// Once a FIND_NODE lookup on the key is done, stores the value at the
/// closest responders, keeping track of acknowledging contacts and errors.
pub struct StoreQuery {
    item: ValueItem,
    started: bool,
    /// Contacts asked to store the value and not answered yet.
    pending: Vec<Id>,
    stored_at: Vec<Id>,
    /// Peer errors, highest count first.
    errors: Vec<(usize, ProtocolError)>,
    failures: usize,
}

impl StoreQuery {
    pub fn new(item: ValueItem) -> Self {
        Self {
            item,
            started: false,
            pending: Vec::new(),
            stored_at: Vec::new(),
            errors: Vec::new(),
            failures: 0,
        }
    }

    // === Getters ===

    pub fn key(&self) -> Id {
        self.item.key
    }

    pub fn item(&self) -> &ValueItem {
        &self.item
    }

    pub fn started(&self) -> bool {
        self.started
    }

    /// Returns true if a STORE to this contact is outstanding.
    pub fn inflight(&self, id: &Id) -> bool {
        self.pending.contains(id)
    }

    pub fn stored_at(&self) -> &[Id] {
        &self.stored_at
    }

    // === Public Methods ===

    /// Pick up to `count` contacts to send the STORE request to.
    ///
    /// Fails with [StoreQueryError::NoClosestContacts] if there are none.
    pub fn start(
        &mut self,
        closest: &[Contact],
        count: usize,
    ) -> Result<Vec<(Contact, StoreRequest)>, StoreQueryError> {
        let key = self.key();

        if closest.is_empty() {
            debug!(?key, "StoreQuery found no contacts to store at");

            return Err(StoreQueryError::NoClosestContacts);
        }

        self.started = true;

        let requests: Vec<(Contact, StoreRequest)> = closest
            .iter()
            .take(count)
            .map(|contact| (contact.clone(), StoreRequest::from(self.item.clone())))
            .collect();

        self.pending = requests.iter().map(|(contact, _)| *contact.id()).collect();

        debug!(?key, count = requests.len(), "StoreQuery start");

        Ok(requests)
    }

    pub fn success(&mut self, from: &Id) {
        if self.take_pending(from) {
            debug!(key = ?self.key(), ?from, "StoreQuery got success response");

            self.stored_at.push(*from);
        }
    }

    pub fn error(&mut self, from: &Id, error: RpcError) {
        if !self.take_pending(from) {
            return;
        }

        debug!(key = ?self.key(), ?from, ?error, "StoreQuery got error");

        self.failures += 1;

        let RpcError::Peer(error) = error else {
            return;
        };

        if let Some(pos) = self
            .errors
            .iter()
            .position(|(_, err)| error.code == err.code)
        {
            self.errors[pos].0 += 1;

            // Keep the highest count first
            let mut i = pos;
            while i > 0 && self.errors[i].0 > self.errors[i - 1].0 {
                self.errors.swap(i, i - 1);
                i -= 1;
            }
        } else {
            self.errors.push((1, error));
        }
    }

    /// Returns `None` while STORE requests are outstanding, then the ids that
    /// acknowledged the store or the reason none did.
    pub fn result(&self) -> Option<Result<Vec<Id>, StoreQueryError>> {
        if !self.started || !self.pending.is_empty() {
            return None;
        }

        let key = self.key();

        if self.stored_at.is_empty() {
            let most_common_error = self.most_common_error();

            debug!(?key, ?most_common_error, failures = self.failures, "StoreQuery failed");

            return Some(Err(most_common_error
                .map(|error| StoreQueryError::ErrorResponse(error.clone()))
                .unwrap_or(StoreQueryError::Timeout)));
        }

        debug!(?key, stored_at = self.stored_at.len(), "StoreQuery done successfully");

        Some(Ok(self.stored_at.clone()))
    }

    // === Private Methods ===

    fn take_pending(&mut self, from: &Id) -> bool {
        match self.pending.iter().position(|id| id == from) {
            Some(pos) => {
                self.pending.swap_remove(pos);
                true
            }
            None => false,
        }
    }

    fn most_common_error(&self) -> Option<&ProtocolError> {
        self.errors.first().map(|(_, error)| error)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Store query errors
pub enum StoreQueryError {
    /// The lookup found no contacts close to the key, usually means the
    /// routing table is empty and the node needs bootstrapping.
    #[error("Failed to find any contacts close to store value at")]
    NoClosestContacts,

    /// Every contact rejected the STORE, contains the most common error.
    #[error("Store query error response: {0}")]
    ErrorResponse(ProtocolError),

    /// Every STORE failed without a peer error.
    #[error("Store query timed out with no responses")]
    Timeout,
}

impl From<StoreQueryError> for crate::Error {
    fn from(error: StoreQueryError) -> Self {
        match error {
            StoreQueryError::NoClosestContacts => crate::Error::NotFound,
            StoreQueryError::ErrorResponse(error) => error.into(),
            StoreQueryError::Timeout => crate::Error::Timeout,
        }
    }
}
