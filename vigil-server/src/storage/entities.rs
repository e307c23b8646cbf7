use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use ulid::Ulid;
use vigil_core::{BoxStr, SensorType};

use crate::storage::Entity;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductEntity {
    /// The product name, which is also the first segment of its sensor paths.
    pub id: BoxStr,
    pub name: BoxStr,
    /// Shared secret handed to the product's collectors.
    pub key: Ulid,
    pub added_at: Timestamp,
}

impl ProductEntity {
    pub fn new(name: impl Into<BoxStr>, added_at: Timestamp) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            key: Ulid::new(),
            added_at,
        }
    }
}

impl Entity for ProductEntity {
    type Id = BoxStr;

    const KIND: &'static str = "product";
    const PREFIX: &'static [u8] = b"product:";
    const LIST_KEY: &'static [u8] = b"list:products";

    fn id(&self) -> BoxStr {
        self.id.clone()
    }

    fn id_bytes(id: &BoxStr) -> Vec<u8> {
        id.as_bytes().to_vec()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorEntity {
    /// Full `/`-delimited path.
    pub id: BoxStr,
    pub product: BoxStr,
    /// Last path segment.
    pub name: BoxStr,
    pub sensor_type: SensorType,
    pub created_at: Timestamp,
    pub last_update: Timestamp,
}

impl Entity for SensorEntity {
    type Id = BoxStr;

    const KIND: &'static str = "sensor";
    const PREFIX: &'static [u8] = b"sensor:";
    const LIST_KEY: &'static [u8] = b"list:sensors";

    fn id(&self) -> BoxStr {
        self.id.clone()
    }

    fn id_bytes(id: &BoxStr) -> Vec<u8> {
        id.as_bytes().to_vec()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyPermission {
    CanSendSensorData,
    CanAddNodes,
    CanAddSensors,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessKeyEntity {
    pub id: BoxStr,
    pub product: BoxStr,
    pub created_at: Timestamp,
    pub expires_at: Option<Timestamp>,
    pub permissions: Vec<KeyPermission>,
}

impl Entity for AccessKeyEntity {
    type Id = BoxStr;

    const KIND: &'static str = "access_key";
    const PREFIX: &'static [u8] = b"access_key:";
    const LIST_KEY: &'static [u8] = b"list:access_keys";

    fn id(&self) -> BoxStr {
        self.id.clone()
    }

    fn id_bytes(id: &BoxStr) -> Vec<u8> {
        id.as_bytes().to_vec()
    }
}

/// What a stored sample has to satisfy for a policy to raise an alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PolicyCondition {
    Equals(bool),
    Above(f64),
    Below(f64),
    Contains(BoxStr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyEntity {
    pub id: Ulid,
    pub sensor_path: BoxStr,
    pub condition: PolicyCondition,
    pub severity: AlertSeverity,
}

impl Entity for PolicyEntity {
    type Id = Ulid;

    const KIND: &'static str = "policy";
    const PREFIX: &'static [u8] = b"policy:";
    const LIST_KEY: &'static [u8] = b"list:policies";

    fn id(&self) -> Ulid {
        self.id
    }

    fn id_bytes(id: &Ulid) -> Vec<u8> {
        id.to_bytes().to_vec()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderEntity {
    pub id: BoxStr,
    pub name: BoxStr,
    pub products: Vec<BoxStr>,
    pub created_at: Timestamp,
}

impl Entity for FolderEntity {
    type Id = BoxStr;

    const KIND: &'static str = "folder";
    const PREFIX: &'static [u8] = b"folder:";
    const LIST_KEY: &'static [u8] = b"list:folders";

    fn id(&self) -> BoxStr {
        self.id.clone()
    }

    fn id_bytes(id: &BoxStr) -> Vec<u8> {
        id.as_bytes().to_vec()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductRole {
    Manager,
    Viewer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserEntity {
    /// The login name.
    pub id: BoxStr,
    pub password_hash: BoxStr,
    pub is_admin: bool,
    #[serde(default)]
    pub product_roles: Vec<(BoxStr, ProductRole)>,
}

impl Entity for UserEntity {
    type Id = BoxStr;

    const KIND: &'static str = "user";
    const PREFIX: &'static [u8] = b"user:";
    const LIST_KEY: &'static [u8] = b"list:users";

    fn id(&self) -> BoxStr {
        self.id.clone()
    }

    fn id_bytes(id: &BoxStr) -> Vec<u8> {
        id.as_bytes().to_vec()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelegramChatEntity {
    pub id: Ulid,
    pub chat_id: i64,
    pub name: BoxStr,
    pub authorized_at: Timestamp,
}

impl Entity for TelegramChatEntity {
    type Id = Ulid;

    const KIND: &'static str = "telegram_chat";
    const PREFIX: &'static [u8] = b"telegram_chat:";
    const LIST_KEY: &'static [u8] = b"list:telegram_chats";

    fn id(&self) -> Ulid {
        self.id
    }

    fn id_bytes(id: &Ulid) -> Vec<u8> {
        id.to_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guid_keys_use_raw_bytes() {
        let id = Ulid::new();
        let key = PolicyEntity::key(&id);
        assert_eq!(&key[..7], b"policy:");
        assert_eq!(key.len(), 7 + 16);
        assert_eq!(&key[7..], &id.to_bytes());
    }

    #[test]
    fn name_keys_use_utf8() {
        let key = ProductEntity::key(&"démo".into());
        assert_eq!(key, [b"product:".as_slice(), "démo".as_bytes()].concat());
    }
}
