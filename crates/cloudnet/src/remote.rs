//! Calling side of an `EntityProvider` on another node.

use std::marker::PhantomData;
use std::sync::Arc;

use cloudpack::Unpack;
use cloudrpc::RpcCall;

use crate::channel::NetworkChannel;
use crate::entity::Entity;
use crate::entity::GroupConfiguration;
use crate::entity::ServiceTask;
use crate::rpc::RpcSender;
use crate::task::AsyncResult;

pub type RemoteGroupConfigurationProvider = RemoteEntityProvider<GroupConfiguration>;
pub type RemoteServiceTaskProvider = RemoteEntityProvider<ServiceTask>;

#[derive(Debug, Clone)]
pub struct RemoteEntityProvider<T> {
    sender: RpcSender,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> RemoteEntityProvider<T> {
    pub fn new(channel: Arc<NetworkChannel>) -> Self {
        Self {
            sender: RpcSender::new(format!("{}Provider", T::NAME), channel),
            _entity: PhantomData,
        }
    }

    pub fn sender(&self) -> &RpcSender {
        &self.sender
    }

    fn call(&self, verb: &str, suffix: &str) -> RpcCall {
        self.sender.call(&format!("{}{}{}", verb, T::NAME, suffix))
    }

    pub fn add(&self, entity: &T) -> AsyncResult<()> {
        self.sender.invoke_void(self.call("add", "").arg(entity))
    }

    pub fn remove(&self, entity: &T) -> AsyncResult<()> {
        self.sender.invoke_void(self.call("remove", "").arg(entity))
    }

    pub fn remove_by_name(&self, name: &str) -> AsyncResult<bool> {
        self.sender.invoke(self.call("remove", "ByName").arg(name))
    }

    pub fn set_all(&self, entities: &[T]) -> AsyncResult<()> {
        self.sender.invoke_void(self.call("set", "s").arg(entities))
    }

    pub fn get(&self, name: &str) -> AsyncResult<Option<T>> {
        self.sender.invoke(self.call("get", "").arg(name))
    }

    pub fn all(&self) -> AsyncResult<Vec<T>> {
        self.sender.invoke(self.call("get", "s"))
    }

    pub fn is_present(&self, name: &str) -> AsyncResult<bool> {
        self.sender.invoke(self.call("is", "Present").arg(name))
    }

    pub fn reload(&self) -> AsyncResult<()> {
        self.sender.invoke_void(self.sender.call("reload"))
    }

    /// Calls the zero-argument `getter` on the named entity in a single round
    /// trip, e.g. `property::<String>("Lobby", "getName")`.
    pub fn property<R>(&self, name: &str, getter: &str) -> AsyncResult<R>
    where
        R: Unpack + Clone + Send + 'static,
    {
        let chain = self
            .call("require", "")
            .arg(name)
            .map(|first| first.then(RpcCall::new(T::NAME, getter)));
        self.sender.invoke(chain)
    }
}
