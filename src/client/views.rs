//! Bound Views
//!
//! [`HashMapView`] and [`ListView`] pin a [`Client`] to one key so callers
//! can work with a single structure without repeating the key. Values are
//! converted to and from `V` through `serde_json`.
//!
//! ```
//! use storebox::Client;
//!
//! # tokio_test::block_on(async {
//! let client = Client::in_memory();
//! let scores = client.hash_map::<u32>("scores");
//!
//! scores.set("ariz", 42).await.unwrap();
//! assert_eq!(scores.get("ariz").await.unwrap(), Some(42));
//! # });
//! ```

use super::facade::{Client, ClientResult};
use crate::storage::{ListValue, Value};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::time::Duration;
use uuid::Uuid;

fn to_value<V: Serialize>(value: &V) -> ClientResult<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Converts a stored value, mapping `null` (missing or expired) to `None`.
fn from_value<V: DeserializeOwned>(value: Option<Value>) -> ClientResult<Option<V>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
    }
}

impl Client {
    /// Returns a hash view bound to `key`.
    pub fn hash_map<V>(&self, key: impl Into<String>) -> HashMapView<V> {
        HashMapView {
            client: self.clone(),
            key: key.into(),
            _marker: PhantomData,
        }
    }

    /// Returns a hash view bound to a fresh, unique key.
    pub fn anonymous_hash_map<V>(&self) -> HashMapView<V> {
        self.hash_map(format!("[HashMap-{}]", Uuid::new_v4().simple()))
    }

    /// Returns a list view bound to `key`.
    pub fn list<V>(&self, key: impl Into<String>) -> ListView<V> {
        ListView {
            client: self.clone(),
            key: key.into(),
            _marker: PhantomData,
        }
    }

    /// Returns a list view bound to a fresh, unique key.
    pub fn anonymous_list<V>(&self) -> ListView<V> {
        self.list(format!("[List-{}]", Uuid::new_v4().simple()))
    }
}

/// A hash stored under a single key.
pub struct HashMapView<V = Value> {
    client: Client,
    key: String,
    _marker: PhantomData<fn() -> V>,
}

impl<V> std::fmt::Debug for HashMapView<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashMapView").field("key", &self.key).finish()
    }
}

impl<V> Clone for HashMapView<V> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            key: self.key.clone(),
            _marker: PhantomData,
        }
    }
}

impl<V: Serialize + DeserializeOwned> HashMapView<V> {
    /// The key this view is bound to.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn get(&self, field: &str) -> ClientResult<Option<V>> {
        from_value(self.client.hget(&self.key, field).await?)
    }

    pub async fn set(&self, field: &str, value: V) -> ClientResult<()> {
        self.client.hset(&self.key, field, to_value(&value)?).await
    }

    pub async fn setex(&self, field: &str, value: V, ttl: Duration) -> ClientResult<()> {
        self.client
            .hsetex(&self.key, field, to_value(&value)?, ttl)
            .await
    }

    pub async fn del(&self, field: &str) -> ClientResult<()> {
        self.client.hdel(&self.key, field).await
    }

    pub async fn exists(&self, field: &str) -> ClientResult<bool> {
        self.client.hexists(&self.key, field).await
    }

    pub async fn has(&self, field: &str) -> ClientResult<bool> {
        self.exists(field).await
    }

    pub async fn size(&self) -> ClientResult<usize> {
        self.client.hsize(&self.key).await
    }

    pub async fn keys(&self) -> ClientResult<Vec<String>> {
        self.client.hkeys(&self.key).await
    }

    /// Returns every live value; expired fields are skipped.
    pub async fn values(&self) -> ClientResult<Vec<V>> {
        let mut values = Vec::new();
        for value in self.client.hvalues(&self.key).await? {
            if let Some(value) = from_value(Some(value))? {
                values.push(value);
            }
        }
        Ok(values)
    }

    pub async fn clear(&self) -> ClientResult<()> {
        self.client.hclear(&self.key).await
    }

    /// Returns every live field; expired fields are skipped.
    pub async fn getall(&self) -> ClientResult<HashMap<String, V>> {
        let mut all = HashMap::new();
        for (field, value) in self.client.hgetall(&self.key).await? {
            if let Some(value) = from_value(Some(value))? {
                all.insert(field, value);
            }
        }
        Ok(all)
    }
}

/// A list stored under a single key.
pub struct ListView<V = Value> {
    client: Client,
    key: String,
    _marker: PhantomData<fn() -> V>,
}

impl<V> std::fmt::Debug for ListView<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListView").field("key", &self.key).finish()
    }
}

impl<V> Clone for ListView<V> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            key: self.key.clone(),
            _marker: PhantomData,
        }
    }
}

impl<V: Serialize + DeserializeOwned> ListView<V> {
    /// The key this view is bound to.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn set(&self, index: usize, value: V) -> ClientResult<()> {
        self.client.lset(&self.key, index, to_value(&value)?).await
    }

    pub async fn setex(&self, index: usize, value: V, ttl: Duration) -> ClientResult<()> {
        self.client
            .lsetex(&self.key, index, to_value(&value)?, ttl)
            .await
    }

    pub async fn get(&self, index: usize) -> ClientResult<Option<V>> {
        from_value(self.client.lget(&self.key, index).await?)
    }

    pub async fn del(&self, index: usize) -> ClientResult<()> {
        self.client.ldel(&self.key, index).await
    }

    /// Appends `value`, returning the new length.
    pub async fn push(&self, value: V) -> ClientResult<usize> {
        self.client.lpush(&self.key, to_value(&value)?).await
    }

    pub async fn pushex(&self, value: V, ttl: Duration) -> ClientResult<usize> {
        self.client
            .lpushex(&self.key, to_value(&value)?, ttl)
            .await
    }

    /// Returns true if the list contains `value`.
    pub async fn exists(&self, value: &V) -> ClientResult<bool> {
        self.client.lexists(&self.key, to_value(value)?).await
    }

    pub async fn pop(&self) -> ClientResult<Option<V>> {
        from_value(self.client.lpop(&self.key).await?)
    }

    pub async fn size(&self) -> ClientResult<usize> {
        self.client.lsize(&self.key).await
    }

    pub async fn clear(&self) -> ClientResult<()> {
        self.client.lclear(&self.key).await
    }

    /// Returns slots `[start, stop)`, with expired slots as `None`.
    pub async fn range(&self, start: i64, stop: i64) -> ClientResult<Vec<Option<V>>> {
        convert_slots(self.client.lrange(&self.key, start, stop).await?)
    }

    /// Returns every slot, with expired slots as `None`.
    pub async fn to_vec(&self) -> ClientResult<Vec<Option<V>>> {
        convert_slots(self.client.lgetall(&self.key).await?)
    }

    /// Returns every live value; expired slots are skipped.
    pub async fn values(&self) -> ClientResult<Vec<V>> {
        Ok(self.to_vec().await?.into_iter().flatten().collect())
    }
}

fn convert_slots<V: DeserializeOwned>(list: ListValue) -> ClientResult<Vec<Option<V>>> {
    list.into_iter().map(|value| from_value(Some(value))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Point {
        x: i32,
        y: i32,
    }

    #[tokio::test]
    async fn test_hash_map_view() {
        let client = Client::in_memory();
        let points = client.hash_map::<Point>("points");

        points.set("origin", Point { x: 0, y: 0 }).await.unwrap();
        points.set("far", Point { x: 9, y: -9 }).await.unwrap();

        assert_eq!(
            points.get("far").await.unwrap(),
            Some(Point { x: 9, y: -9 })
        );
        assert!(points.has("origin").await.unwrap());
        assert_eq!(points.size().await.unwrap(), 2);
        assert_eq!(points.values().await.unwrap().len(), 2);

        // Same data through the untyped client
        assert_eq!(
            client.hget("points", "origin").await.unwrap(),
            Some(json!({ "x": 0, "y": 0 }))
        );

        points.del("origin").await.unwrap();
        assert_eq!(points.get("origin").await.unwrap(), None);

        points.clear().await.unwrap();
        assert!(points.getall().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_hash_map_view_expiry() {
        let client = Client::in_memory();
        let sessions = client.hash_map::<String>("sessions");

        sessions.set("keep", "a".to_string()).await.unwrap();
        sessions
            .setex("drop", "b".to_string(), Duration::from_millis(100))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;

        let all = sessions.getall().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all["keep"], "a");
        assert_eq!(sessions.keys().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_list_view() {
        let client = Client::in_memory();
        let queue = client.list::<u32>("queue");

        assert_eq!(queue.push(1).await.unwrap(), 1);
        assert_eq!(queue.push(2).await.unwrap(), 2);
        assert_eq!(queue.push(3).await.unwrap(), 3);

        assert!(queue.exists(&2).await.unwrap());
        assert_eq!(queue.get(0).await.unwrap(), Some(1));
        assert_eq!(queue.range(0, 2).await.unwrap(), vec![Some(1), Some(2)]);

        queue.set(0, 10).await.unwrap();
        queue.del(1).await.unwrap();
        assert_eq!(queue.values().await.unwrap(), vec![10, 3]);

        assert_eq!(queue.pop().await.unwrap(), Some(3));
        assert_eq!(queue.size().await.unwrap(), 1);

        queue.clear().await.unwrap();
        assert!(queue.to_vec().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_view_expiry() {
        let client = Client::in_memory();
        let queue = client.list::<String>("queue");

        queue.push("a".to_string()).await.unwrap();
        queue
            .pushex("b".to_string(), Duration::from_millis(100))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(
            queue.to_vec().await.unwrap(),
            vec![Some("a".to_string()), None]
        );
        assert_eq!(queue.values().await.unwrap(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_anonymous_views() {
        let client = Client::in_memory();

        let a = client.anonymous_list::<u8>();
        let b = client.anonymous_list::<u8>();
        assert_ne!(a.key(), b.key());
        assert!(a.key().starts_with("[List-"));

        let h = client.anonymous_hash_map::<u8>();
        assert!(h.key().starts_with("[HashMap-"));
        h.set("x", 1).await.unwrap();
        assert!(client.exists(h.key()).await.unwrap());
    }

    #[tokio::test]
    async fn test_view_conversion_error() {
        let client = Client::in_memory();
        client.hset("mixed", "n", "not a number").await.unwrap();

        let view = client.hash_map::<u32>("mixed");
        assert!(view.get("n").await.is_err());
    }
}
