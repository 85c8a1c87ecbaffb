//! # Entity Providers
//!
//! Node-side owner of one entity type: persists through an `EntityStore`,
//! replicates through the `DataSyncRegistry`, and serves both over RPC.
//!
//! ## Invariants
//!
//! 1. A mutation is on disk before its cluster message is sent.
//! 2. The `_silently` variants never publish; they are what inbound cluster
//!    messages are applied through.
//!
//! ## RPC surface
//!
//! Under `<Name>Provider`, with `<Name>` the entity's type name:
//!
//! | method                   | args | reply        |
//! |--------------------------|------|--------------|
//! | `add<Name>`              | 1    | void         |
//! | `remove<Name>`           | 1    | void         |
//! | `remove<Name>ByName`     | 1    | `bool`       |
//! | `set<Name>s`             | 1    | void         |
//! | `get<Name>`              | 1    | `Option<T>`  |
//! | `require<Name>`          | 1    | `T`, or a `NoSuchElement` failure |
//! | `get<Name>s`             | 0    | `Vec<T>`     |
//! | `is<Name>Present`        | 1    | `bool`       |
//! | `reload`                 | 0    | void         |
//!
//! `require<Name>` exists for chains: its result is the entity itself, so the
//! next frame can call the getters registered under `<Name>`.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use cloudrpc::HandlerRegistry;
use cloudrpc::RemoteFailure;
use cloudrpc::RpcHandler;

use crate::entity::Entity;
use crate::entity::GroupConfiguration;
use crate::entity::ServiceTask;
use crate::message::Target;
use crate::store::EntityStore;
use crate::sync::DataSyncHandler;
use crate::sync::DataSyncRegistry;
use crate::sync::Verb;

pub type GroupConfigurationProvider = EntityProvider<GroupConfiguration>;
pub type ServiceTaskProvider = EntityProvider<ServiceTask>;

fn entity_key<T: Entity>(entity: &T) -> String {
    entity.name().to_string()
}

pub struct EntityProvider<T: Entity> {
    store: Arc<EntityStore<T>>,
    sync: Arc<DataSyncRegistry>,
}

impl<T: Entity> EntityProvider<T> {
    /// Opens the store under `directory`, folds in `legacy_file` if it still
    /// exists, and registers the type with `sync`.
    pub fn open(
        directory: impl Into<PathBuf>,
        legacy_file: &Path,
        sync: Arc<DataSyncRegistry>,
    ) -> anyhow::Result<Arc<Self>> {
        let store = Arc::new(EntityStore::open(directory, entity_key::<T>)?);
        store.migrate_legacy(legacy_file, T::LEGACY_FIELD)?;
        tracing::info!(entity = T::NAME, count = store.len(), "loaded entities");

        sync.register(Self::sync_handler(&store)?);
        Ok(Arc::new(Self { store, sync }))
    }

    fn sync_handler(store: &Arc<EntityStore<T>>) -> anyhow::Result<DataSyncHandler<T>> {
        let writer = store.clone();
        let remover = store.clone();
        let collector = store.clone();
        let getter = store.clone();
        DataSyncHandler::builder(T::SYNC_KEY)
            .name_extractor(entity_key::<T>)
            .writer(move |entity: T| Ok(writer.put(entity)?))
            .remover(move |name: &str| {
                remover.remove(name)?;
                Ok(())
            })
            .data_collector(move || collector.all())
            .current_getter(move |name: &str| getter.get(name))
            .build()
    }

    pub fn store(&self) -> &EntityStore<T> {
        &self.store
    }

    pub fn get(&self, name: &str) -> Option<T> {
        self.store.get(name)
    }

    pub fn all(&self) -> Vec<T> {
        self.store.all()
    }

    pub fn is_present(&self, name: &str) -> bool {
        self.store.contains(name)
    }

    pub fn add(&self, entity: T) -> anyhow::Result<()> {
        self.add_silently(entity.clone())?;
        self.sync.publish(Verb::Add, T::SYNC_KEY, &entity, Target::All)
    }

    pub fn add_silently(&self, entity: T) -> anyhow::Result<()> {
        self.store.put(entity)?;
        Ok(())
    }

    pub fn remove(&self, entity: &T) -> anyhow::Result<()> {
        self.remove_silently(entity.name())?;
        self.sync.publish(Verb::Remove, T::SYNC_KEY, entity, Target::All)
    }

    /// Removes the named entity if present. Only an actual removal is published.
    pub fn remove_by_name(&self, name: &str) -> anyhow::Result<bool> {
        match self.remove_silently(name)? {
            Some(entity) => {
                self.sync.publish(Verb::Remove, T::SYNC_KEY, &entity, Target::All)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn remove_silently(&self, name: &str) -> anyhow::Result<Option<T>> {
        Ok(self.store.remove(name)?)
    }

    /// Replaces every entity of this type, here and on every other node.
    pub fn set_all(&self, entities: Vec<T>) -> anyhow::Result<()> {
        self.set_all_silently(entities.clone())?;
        self.sync.publish(Verb::SetAll, T::SYNC_KEY, &entities, Target::All)
    }

    pub fn set_all_silently(&self, entities: Vec<T>) -> anyhow::Result<()> {
        self.store.replace_all(entities)?;
        Ok(())
    }

    /// Rereads the directory. Not published; other nodes keep their state.
    pub fn reload(&self) -> anyhow::Result<()> {
        self.store.reload()?;
        tracing::info!(entity = T::NAME, count = self.store.len(), "reloaded entities");
        Ok(())
    }

    /// Registers `<Name>Provider`, bound to this provider, and `<Name>`, which
    /// only serves chained calls.
    pub fn register_rpc(self: &Arc<Self>, registry: &HandlerRegistry) {
        let noun = T::NAME;
        let provider = RpcHandler::builder::<Self>(format!("{}Provider", noun))
            .bind(self.clone())
            .void_method(&format!("add{}", noun), 1, |this, args| {
                this.add(args.next()?).map_err(failure)
            })
            .void_method(&format!("remove{}", noun), 1, |this, args| {
                let entity: T = args.next()?;
                this.remove(&entity).map_err(failure)
            })
            .method(&format!("remove{}ByName", noun), 1, |this, args| {
                let name: String = args.next()?;
                this.remove_by_name(&name).map_err(failure)
            })
            .void_method(&format!("set{}s", noun), 1, |this, args| {
                this.set_all(args.next()?).map_err(failure)
            })
            .method(&format!("get{}", noun), 1, |this, args| {
                let name: String = args.next()?;
                Ok(this.get(&name))
            })
            .method(&format!("require{}", noun), 1, |this, args| {
                let name: String = args.next()?;
                this.get(&name).ok_or_else(|| {
                    RemoteFailure::new("NoSuchElement", format!("no {} named '{}'", T::NAME, name))
                })
            })
            .method(&format!("get{}s", noun), 0, |this, _| Ok(this.all()))
            .method(&format!("is{}Present", noun), 1, |this, args| {
                let name: String = args.next()?;
                Ok(this.is_present(&name))
            })
            .void_method("reload", 0, |this, _| this.reload().map_err(failure))
            .build();
        registry.register(provider);
        registry.register(T::accessors(RpcHandler::builder::<T>(T::NAME)).build());
    }
}

fn failure(error: anyhow::Error) -> RemoteFailure {
    RemoteFailure {
        type_name: "ProviderError".to_string(),
        message: error.to_string(),
        trace: error.chain().skip(1).map(|cause| cause.to_string()).collect(),
    }
}

impl<T: Entity> std::fmt::Debug for EntityProvider<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityProvider")
            .field("entity", &T::NAME)
            .field("store", &self.store)
            .finish()
    }
}
