//! AsyncDht node.

use bytes::Bytes;

use crate::{
    actor::Info,
    common::{Contact, Id, Request, Response, Timestamp, ValueItem},
    dht::{ActorMessage, Dht},
    error::{ErrorCode, ProtocolError},
    Error, Result,
};

impl Dht {
    /// Return an async version of the Dht client.
    pub fn as_async(self) -> AsyncDht {
        AsyncDht(self)
    }
}

#[derive(Debug, Clone)]
/// Async version of the Dht node.
pub struct AsyncDht(Dht);

impl AsyncDht {
    // === Getters ===

    /// Information and statistics about this [Dht] node.
    pub async fn info(&self) -> Result<Info> {
        let (sender, receiver) = flume::bounded::<Info>(1);

        self.send(ActorMessage::Info(sender))?;

        receiver.recv_async().await.map_err(|_| Error::Shutdown)
    }

    // === Public Methods ===

    /// Shutdown the actor thread loop.
    pub async fn shutdown(&mut self) {
        let (sender, receiver) = flume::bounded::<()>(1);

        let _ = self.0 .0.send(ActorMessage::Shutdown(sender));
        let _ = receiver.recv_async().await;
    }

    /// See [Dht::bootstrap]
    pub async fn bootstrap(&self, contacts: &[Contact]) -> Result<Vec<Contact>> {
        let (sender, receiver) = flume::bounded::<Vec<Contact>>(1);

        self.send(ActorMessage::Bootstrap(contacts.to_vec(), sender))?;

        receiver.recv_async().await.map_err(|_| Error::Shutdown)
    }

    /// Wait until the bootstraping lookup is done.
    ///
    /// Returns true if the bootstraping was successful.
    pub async fn bootstrapped(&self) -> Result<bool> {
        let contacts = self.bootstrap(&[]).await?;

        Ok(!contacts.is_empty())
    }

    /// See [Dht::ping]
    pub async fn ping(&self, contact: Contact) -> Result<()> {
        let (sender, receiver) = flume::bounded::<Result<()>>(1);

        self.send(ActorMessage::Ping(contact, sender))?;

        receiver.recv_async().await.map_err(|_| Error::Shutdown)?
    }

    // === Find nodes ===

    pub async fn find_node(&self, target: Id) -> Result<Vec<Contact>> {
        let (sender, receiver) = flume::bounded::<Vec<Contact>>(1);

        self.send(ActorMessage::FindNode(target, sender))?;

        receiver.recv_async().await.map_err(|_| Error::Shutdown)
    }

    // === Values ===

    /// See [Dht::get]
    pub async fn get(&self, key: Id) -> Result<ValueItem> {
        let (sender, receiver) = flume::bounded::<Result<ValueItem>>(1);

        self.send(ActorMessage::Get(key, sender))?;

        receiver.recv_async().await.map_err(|_| Error::Shutdown)?
    }

    /// See [Dht::put]
    pub async fn put(&self, key: Id, value: impl Into<Bytes>) -> Result<Vec<Id>> {
        self.put_item(ValueItem::new(key, value, Timestamp::now()))
            .await
    }

    /// See [Dht::put_item]
    pub async fn put_item(&self, item: ValueItem) -> Result<Vec<Id>> {
        let (sender, receiver) = flume::bounded::<Result<Vec<Id>>>(1);

        self.send(ActorMessage::Put(item, sender))?;

        receiver.recv_async().await.map_err(|_| Error::Shutdown)?
    }

    // === Incoming requests ===

    /// See [Dht::handle_request]
    pub async fn handle_request(
        &self,
        from: Contact,
        request: Request,
    ) -> std::result::Result<Response, ProtocolError> {
        let (sender, receiver) = flume::bounded(1);

        if self
            .send(ActorMessage::Request(from, request, sender))
            .is_err()
        {
            return Err(ErrorCode::InternalError.into());
        }

        receiver
            .recv_async()
            .await
            .unwrap_or_else(|_| Err(ErrorCode::InternalError.into()))
    }

    fn send(&self, message: ActorMessage) -> Result<()> {
        self.0 .0.send(message).map_err(|_| Error::Shutdown)
    }
}
