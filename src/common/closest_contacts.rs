use std::vec::IntoIter;

use crate::common::{Contact, Id};

#[derive(Debug, Clone)]
/// Contacts ordered by ascending XOR distance to a target, without duplicate ids.
pub struct ClosestContacts {
    target: Id,
    contacts: Vec<Contact>,
}

impl ClosestContacts {
    pub fn new(target: Id) -> Self {
        Self {
            target,
            contacts: Vec::with_capacity(64),
        }
    }

    // === Getters ===

    pub fn target(&self) -> Id {
        self.target
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.position(id).is_ok()
    }

    // === Public Methods ===

    /// Insert a contact at its distance rank, returns `false` if a contact
    /// with the same id is already present.
    pub fn add(&mut self, contact: Contact) -> bool {
        match self.position(contact.id()) {
            Err(pos) => {
                self.contacts.insert(pos, contact);
                true
            }
            Ok(_) => false,
        }
    }

    pub fn remove(&mut self, id: &Id) -> Option<Contact> {
        self.position(id).ok().map(|pos| self.contacts.remove(pos))
    }

    /// Keep only the `count` closest contacts.
    pub fn truncate(&mut self, count: usize) {
        self.contacts.truncate(count)
    }

    /// The closest contact, if any.
    pub fn first(&self) -> Option<&Contact> {
        self.contacts.first()
    }

    // === Private Methods ===

    /// Distinct ids never share an XOR distance to the same target, so the
    /// distance alone is a total order.
    fn position(&self, id: &Id) -> Result<usize, usize> {
        let seek = id.xor(&self.target);

        self.contacts
            .binary_search_by(|contact| contact.id().xor(&self.target).cmp(&seek))
    }
}

impl IntoIterator for ClosestContacts {
    type Item = Contact;
    type IntoIter = IntoIter<Contact>;

    fn into_iter(self) -> Self::IntoIter {
        self.contacts.into_iter()
    }
}

impl<'a> IntoIterator for &'a ClosestContacts {
    type Item = &'a Contact;
    type IntoIter = std::slice::Iter<'a, Contact>;

    fn into_iter(self) -> Self::IntoIter {
        self.contacts.iter()
    }
}
