use std::fmt;
use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::storage::{KeyValueStore, StorageFaults, StoreError};

/// A first-class record kept under the entity + index-list layout.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    type Id: Serialize + DeserializeOwned + PartialEq + Clone + fmt::Debug + Send + Sync;

    /// Collection name used in logs.
    const KIND: &'static str;
    /// Prepended to every entity key of this collection.
    const PREFIX: &'static [u8];
    /// Key holding the collection's id list.
    const LIST_KEY: &'static [u8];

    fn id(&self) -> Self::Id;

    /// Raw key bytes of an id, before the collection prefix.
    fn id_bytes(id: &Self::Id) -> Vec<u8>;

    fn key(id: &Self::Id) -> Vec<u8> {
        [Self::PREFIX, &Self::id_bytes(id)].concat()
    }
}

/// View over one collection of a [`Database`](super::Database).
///
/// Every public operation is soft: a storage or serialization failure is
/// logged, counted and reported as "no data" or a dropped write.
///
/// Creation writes the entity before its list entry and removal drops the
/// list entry before the entity, so a crash in between can only leave an
/// unlisted entity behind, never a list entry without a record.
pub struct Collection<'a, S, E> {
    store: &'a S,
    faults: &'a StorageFaults,
    list_lock: &'a Mutex<()>,
    _entity: PhantomData<fn() -> E>,
}

impl<'a, S, E> Collection<'a, S, E>
where
    S: KeyValueStore,
    E: Entity,
{
    pub(crate) fn new(store: &'a S, faults: &'a StorageFaults, list_lock: &'a Mutex<()>) -> Self {
        Self {
            store,
            faults,
            list_lock,
            _entity: PhantomData,
        }
    }

    fn fault(&self, op: &str, id: Option<&E::Id>, e: &StoreError) {
        self.faults.record();
        error!(kind = E::KIND, op, id = ?id, error = %e, "Storage operation failed");
    }

    pub async fn put(&self, entity: &E) -> bool {
        let id = entity.id();
        match self.try_put(entity).await {
            Ok(()) => true,
            Err(e) => {
                self.fault("put", Some(&id), &e);
                false
            }
        }
    }

    pub async fn get(&self, id: &E::Id) -> Option<E> {
        match self.try_get(id).await {
            Ok(entity) => entity,
            Err(e) => {
                self.fault("get", Some(id), &e);
                None
            }
        }
    }

    pub async fn delete(&self, id: &E::Id) -> bool {
        match self.store.delete(&E::key(id)).await {
            Ok(()) => true,
            Err(e) => {
                self.fault("delete", Some(id), &e);
                false
            }
        }
    }

    /// Adding an id that is already listed leaves the list unchanged.
    pub async fn add_to_list(&self, id: &E::Id) -> bool {
        let _guard = self.list_lock.lock().await;

        let result: Result<(), StoreError> = async {
            let mut ids = self.try_list().await?;
            if ids.contains(id) {
                return Ok(());
            }
            ids.push(id.clone());
            self.try_write_list(&ids).await
        }
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                self.fault("add_to_list", Some(id), &e);
                false
            }
        }
    }

    /// Removing an id that is not listed is a no-op.
    pub async fn remove_from_list(&self, id: &E::Id) -> bool {
        let _guard = self.list_lock.lock().await;

        let result: Result<(), StoreError> = async {
            let mut ids = self.try_list().await?;
            let before = ids.len();
            ids.retain(|listed| listed != id);
            if ids.len() == before {
                return Ok(());
            }
            self.try_write_list(&ids).await
        }
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                self.fault("remove_from_list", Some(id), &e);
                false
            }
        }
    }

    /// Ids in insertion order.
    pub async fn list(&self) -> Vec<E::Id> {
        match self.try_list().await {
            Ok(ids) => ids,
            Err(e) => {
                self.fault("list", None, &e);
                Vec::new()
            }
        }
    }

    /// Store `entity` and list it.
    pub async fn create(&self, entity: &E) -> bool {
        if !self.put(entity).await {
            return false;
        }
        let listed = self.add_to_list(&entity.id()).await;
        if listed {
            debug!(kind = E::KIND, id = ?entity.id(), "Entity created");
        }
        listed
    }

    /// Unlist `id` and drop its record.
    pub async fn remove(&self, id: &E::Id) -> bool {
        if !self.remove_from_list(id).await {
            return false;
        }
        self.delete(id).await
    }

    /// Every listed entity that can still be read.
    pub async fn all(&self) -> Vec<E> {
        let mut entities = Vec::new();
        for id in self.list().await {
            if let Some(entity) = self.get(&id).await {
                entities.push(entity);
            }
        }
        entities
    }

    async fn try_put(&self, entity: &E) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(entity)?;
        self.store.put(&E::key(&entity.id()), &bytes).await
    }

    async fn try_get(&self, id: &E::Id) -> Result<Option<E>, StoreError> {
        match self.store.get(&E::key(id)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn try_list(&self) -> Result<Vec<E::Id>, StoreError> {
        match self.store.get(E::LIST_KEY).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    async fn try_write_list(&self, ids: &[E::Id]) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(ids)?;
        self.store.put(E::LIST_KEY, &bytes).await
    }
}
