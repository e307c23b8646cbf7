use std::path::{Path, PathBuf};
use std::sync::Arc;

use jiff::Timestamp;
use tokio::sync::Mutex;
use tracing::{error, info};
use vigil_core::{ActionType, SensorPath, SensorType, UpdateMessage};

use crate::convert;
use crate::storage::entities::{
    AccessKeyEntity, FolderEntity, PolicyEntity, ProductEntity, SensorEntity, TelegramChatEntity,
    UserEntity,
};
use crate::storage::{Collection, Entity, KeyValueStore, StorageFaults, StoreError};

/// Typed access to everything the server persists.
///
/// Cheap to clone; clones share the store, the fault counter and the lock
/// that serializes index-list updates.
#[derive(Clone)]
pub struct Database<S> {
    pub(crate) store: S,
    pub(crate) faults: StorageFaults,
    list_lock: Arc<Mutex<()>>,
}

impl<S: KeyValueStore> Database<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            faults: StorageFaults::default(),
            list_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn collection<E: Entity>(&self) -> Collection<'_, S, E> {
        Collection::new(&self.store, &self.faults, &self.list_lock)
    }

    pub fn products(&self) -> Collection<'_, S, ProductEntity> {
        self.collection()
    }

    pub fn sensors(&self) -> Collection<'_, S, SensorEntity> {
        self.collection()
    }

    pub fn access_keys(&self) -> Collection<'_, S, AccessKeyEntity> {
        self.collection()
    }

    pub fn policies(&self) -> Collection<'_, S, PolicyEntity> {
        self.collection()
    }

    pub fn folders(&self) -> Collection<'_, S, FolderEntity> {
        self.collection()
    }

    pub fn users(&self) -> Collection<'_, S, UserEntity> {
        self.collection()
    }

    pub fn telegram_chats(&self) -> Collection<'_, S, TelegramChatEntity> {
        self.collection()
    }

    /// Soft storage failures observed so far, across all collections.
    pub fn fault_count(&self) -> u64 {
        self.faults.count()
    }

    pub fn faults(&self) -> &StorageFaults {
        &self.faults
    }

    /// Make sure the product and sensor behind `path` exist and note that the
    /// sensor reported at `seen_at`. Returns `false` if a write was dropped.
    pub async fn register_sensor(
        &self,
        path: &SensorPath,
        sensor_type: SensorType,
        seen_at: Timestamp,
    ) -> bool {
        let product: Box<str> = path.product().into();
        if self.products().get(&product).await.is_none() {
            let entity = ProductEntity::new(product.clone(), seen_at);
            if !self.products().create(&entity).await {
                return false;
            }
            info!(product = %product, "Product registered");
        }

        let id: Box<str> = path.as_str().into();
        match self.sensors().get(&id).await {
            Some(mut sensor) => {
                if sensor.last_update >= seen_at && sensor.sensor_type == sensor_type {
                    return true;
                }
                sensor.last_update = sensor.last_update.max(seen_at);
                sensor.sensor_type = sensor_type;
                self.sensors().put(&sensor).await
            }
            None => {
                let sensor = SensorEntity {
                    id,
                    product,
                    name: path.sensor().into(),
                    sensor_type,
                    created_at: seen_at,
                    last_update: seen_at,
                };
                let created = self.sensors().create(&sensor).await;
                if created {
                    info!(path = %path, sensor_type = ?sensor_type, "Sensor registered");
                }
                created
            }
        }
    }

    /// Sensors whose path starts with `product`.
    pub async fn product_sensors(&self, product: &str) -> Vec<SensorEntity> {
        self.sensors()
            .all()
            .await
            .into_iter()
            .filter(|sensor| &*sensor.product == product)
            .collect()
    }

    /// Current state of every registered sensor, or of one product's sensors.
    /// Sensors with no stored sample are left out.
    pub async fn latest_updates(&self, product: Option<&str>) -> Vec<UpdateMessage> {
        let mut updates = Vec::new();
        for sensor in self.sensors().all().await {
            if product.is_some_and(|p| p != &*sensor.product) {
                continue;
            }
            let Some(record) = self.latest_value(&sensor.id).await else {
                continue;
            };

            match convert::update_from_record(&record, &sensor.product) {
                Ok(update) => updates.push(update),
                Err(e) => {
                    error!(path = %sensor.id, error = %e, "Skipping unreadable latest value");
                }
            }
        }
        updates
    }

    /// Remove a product together with its sensors, their history, policies
    /// and access keys. Returns one `Remove` message per removed sensor, or
    /// `None` if the product does not exist.
    pub async fn remove_product(&self, id: &str, now: Timestamp) -> Option<Vec<UpdateMessage>> {
        let id: Box<str> = id.into();
        self.products().get(&id).await?;

        let mut removed = Vec::new();
        for sensor in self.product_sensors(&id).await {
            for policy in self.policies_for(&sensor.id).await {
                self.policies().remove(&policy.id).await;
            }
            self.remove_values(&sensor.id).await;
            if self.sensors().remove(&sensor.id).await {
                removed.push(UpdateMessage {
                    path: sensor.id,
                    product: id.clone(),
                    object_type: sensor.sensor_type,
                    time: now,
                    short_value: "".into(),
                    action: ActionType::Remove,
                });
            }
        }

        for key in self.access_keys().all().await {
            if key.product == id {
                self.access_keys().remove(&key.id).await;
            }
        }

        self.products().remove(&id).await;
        info!(product = %id, sensors = removed.len(), "Product removed");

        Some(removed)
    }

    /// Page `page` (0-based) of users, `size` per page, in list order.
    pub async fn users_page(&self, page: usize, size: usize) -> Vec<UserEntity> {
        let ids = self.users().list().await;

        let mut users = Vec::with_capacity(size);
        for id in ids.iter().skip(page.saturating_mul(size)).take(size) {
            if let Some(user) = self.users().get(id).await {
                users.push(user);
            }
        }
        users
    }

    pub async fn policies_for(&self, path: &str) -> Vec<PolicyEntity> {
        self.policies()
            .all()
            .await
            .into_iter()
            .filter(|policy| &*policy.sensor_path == path)
            .collect()
    }

    /// Snapshot the whole store into a new timestamped file under `dir`.
    pub async fn backup(&self, dir: &Path, now: Timestamp) -> Option<PathBuf> {
        let file_name = format!(
            "vigil-backup-{}-{:03}.{}",
            now.strftime("%Y%m%dT%H%M%S"),
            now.subsec_millisecond().max(0),
            self.store.backup_extension()
        );
        let destination = dir.join(file_name);

        let result: Result<(), StoreError> = async {
            tokio::fs::create_dir_all(dir).await?;
            self.store.backup(&destination).await
        }
        .await;

        match result {
            Ok(()) => {
                info!(path = %destination.display(), "Backup written");
                Some(destination)
            }
            Err(e) => {
                self.faults.record();
                error!(path = %destination.display(), error = %e, "Backup failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::storage::entities::{AlertSeverity, PolicyCondition};
    use ulid::Ulid;
    use vigil_core::StorageRecord;

    fn at(second: i64) -> Timestamp {
        Timestamp::from_second(second).unwrap()
    }

    fn record(path: &str, second: i64) -> StorageRecord {
        StorageRecord {
            path: path.into(),
            time: at(second),
            time_collected: at(second + 1),
            timestamp: second,
            data_type: SensorType::Int,
            typed_data: format!(r#"{{"value":{second}}}"#).into(),
        }
    }

    #[tokio::test]
    async fn latest_updates_cover_every_sensor() {
        let db = Database::new(MemoryStore::new());
        for (path, second) in [("shop/cpu", 10), ("shop/cpu", 20), ("shop/mem", 15), ("lab/temp", 5)] {
            let parsed = SensorPath::parse(path).unwrap();
            db.register_sensor(&parsed, SensorType::Int, at(second)).await;
            assert!(db.put_value(&record(path, second)).await);
        }
        let idle = SensorPath::parse("shop/idle").unwrap();
        db.register_sensor(&idle, SensorType::Int, at(1)).await;

        let mut all = db.latest_updates(None).await;
        all.sort_by(|a, b| a.path.cmp(&b.path));
        let rendered: Vec<_> = all
            .iter()
            .map(|u| (&*u.path, &*u.short_value, u.action))
            .collect();
        assert_eq!(
            rendered,
            vec![
                ("lab/temp", "Value = 5", ActionType::Update),
                ("shop/cpu", "Value = 20", ActionType::Update),
                ("shop/mem", "Value = 15", ActionType::Update),
            ]
        );
        assert_eq!(all[1].time, at(21));

        let shop = db.latest_updates(Some("shop")).await;
        assert_eq!(shop.len(), 2);
        assert!(shop.iter().all(|u| &*u.product == "shop"));
        assert!(db.latest_updates(Some("absent")).await.is_empty());
    }

    #[tokio::test]
    async fn register_sensor_creates_product_and_sensor_once() {
        let db = Database::new(MemoryStore::new());
        let path = SensorPath::parse("shop/db/latency").unwrap();

        assert!(db.register_sensor(&path, SensorType::Double, at(10)).await);
        assert!(db.register_sensor(&path, SensorType::Double, at(20)).await);

        assert_eq!(db.products().list().await, vec![Box::from("shop")]);
        assert_eq!(db.sensors().list().await, vec![Box::from("shop/db/latency")]);

        let sensor = db.sensors().get(&"shop/db/latency".into()).await.unwrap();
        assert_eq!(&*sensor.name, "latency");
        assert_eq!(sensor.created_at, at(10));
        assert_eq!(sensor.last_update, at(20));
    }

    #[tokio::test]
    async fn history_is_ordered_and_bounded() {
        let db = Database::new(MemoryStore::new());
        for second in [30, 10, 20, 40] {
            assert!(db.put_value(&record("shop/cpu", second)).await);
        }
        db.put_value(&record("shop/cpu2", 25)).await;

        let seconds: Vec<_> = db
            .history("shop/cpu", at(10), at(40), None)
            .await
            .iter()
            .map(|r| r.timestamp)
            .collect();
        assert_eq!(seconds, vec![10, 20, 30]);

        let limited = db.history("shop/cpu", at(0), at(100), Some(2)).await;
        assert_eq!(limited.len(), 2);

        let latest = db.latest_value("shop/cpu").await.unwrap();
        assert_eq!(latest.timestamp, 40);
    }

    #[tokio::test]
    async fn remove_product_cascades() {
        let db = Database::new(MemoryStore::new());
        let cpu = SensorPath::parse("shop/cpu").unwrap();
        let mem = SensorPath::parse("shop/mem").unwrap();
        let other = SensorPath::parse("lab/cpu").unwrap();
        for path in [&cpu, &mem, &other] {
            db.register_sensor(path, SensorType::Int, at(1)).await;
            db.put_value(&record(path.as_str(), 1)).await;
        }
        db.policies()
            .create(&PolicyEntity {
                id: Ulid::new(),
                sensor_path: "shop/cpu".into(),
                condition: PolicyCondition::Above(90.0),
                severity: AlertSeverity::Critical,
            })
            .await;

        let removed = db.remove_product("shop", at(5)).await.unwrap();
        let paths: Vec<_> = removed.iter().map(|m| &*m.path).collect();
        assert_eq!(paths, vec!["shop/cpu", "shop/mem"]);
        assert!(removed.iter().all(|m| m.action == ActionType::Remove));

        assert_eq!(db.products().list().await, vec![Box::from("lab")]);
        assert_eq!(db.sensors().list().await, vec![Box::from("lab/cpu")]);
        assert!(db.latest_value("shop/cpu").await.is_none());
        assert!(db.latest_value("lab/cpu").await.is_some());
        assert!(db.policies().list().await.is_empty());

        assert!(db.remove_product("shop", at(6)).await.is_none());
    }

    #[tokio::test]
    async fn users_are_paged_in_list_order() {
        let db = Database::new(MemoryStore::new());
        for name in ["ann", "bob", "cid", "dee", "eve"] {
            db.users()
                .create(&UserEntity {
                    id: name.into(),
                    password_hash: "x".into(),
                    is_admin: false,
                    product_roles: Vec::new(),
                })
                .await;
        }

        let names = |users: Vec<UserEntity>| users.into_iter().map(|u| u.id).collect::<Vec<_>>();
        assert_eq!(names(db.users_page(0, 2).await), vec![Box::<str>::from("ann"), Box::from("bob")]);
        assert_eq!(names(db.users_page(2, 2).await), vec![Box::<str>::from("eve")]);
        assert!(db.users_page(3, 2).await.is_empty());
    }
}
