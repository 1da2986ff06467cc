//! Space and index name resolution
//!
//! Names are looked up in the server's system catalog through the regular
//! handler chain and memoized for the lifetime of the client. Nothing is
//! evicted automatically: after a schema change the caller must
//! [`Schema::flush`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tarn_protocol::iproto::{VINDEX_ID, VINDEX_NAME_INDEX, VSPACE_ID, VSPACE_NAME_INDEX};
use tarn_protocol::{Iterator, Request, Value};

use crate::error::{Error, Result};
use crate::handler::Handler;

/// Cached view of one space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceMetadata {
    pub name: String,
    pub id: u32,
    /// Indexes resolved so far, by name
    pub indexes: HashMap<String, u32>,
}

#[derive(Debug, Default)]
struct Cache {
    space_ids: HashMap<String, u32>,
    space_names: HashMap<u32, String>,
    index_ids: HashMap<u32, HashMap<String, u32>>,
}

pub struct Schema {
    handler: Arc<dyn Handler>,
    cache: RwLock<Cache>,
}

impl Schema {
    pub fn new(handler: Arc<dyn Handler>) -> Self {
        Self {
            handler,
            cache: RwLock::new(Cache::default()),
        }
    }

    /// Numeric id of the space called `name`.
    pub async fn resolve_space_id(&self, name: &str) -> Result<u32> {
        let cached = self.cache.read().space_ids.get(name).copied();
        if let Some(id) = cached {
            return Ok(id);
        }

        let request = lookup(VSPACE_ID, VSPACE_NAME_INDEX, vec![Value::from(name)]);
        let response = self.handler.handle(&request).await?;
        let row = response
            .rows()
            .first()
            .ok_or_else(|| Error::SpaceNotFound(name.to_string()))?;
        let id = field_u32(row, 0, "space id")?;

        tracing::debug!(space = name, id, "resolved space");
        let mut cache = self.cache.write();
        cache.space_ids.insert(name.to_string(), id);
        cache.space_names.insert(id, name.to_string());
        Ok(id)
    }

    /// Numeric id of the index called `name` in space `space_id`.
    pub async fn resolve_index_id(&self, space_id: u32, name: &str) -> Result<u32> {
        let cached = self
            .cache
            .read()
            .index_ids
            .get(&space_id)
            .and_then(|indexes| indexes.get(name))
            .copied();
        if let Some(id) = cached {
            return Ok(id);
        }

        let request = lookup(
            VINDEX_ID,
            VINDEX_NAME_INDEX,
            vec![Value::from(space_id), Value::from(name)],
        );
        let response = self.handler.handle(&request).await?;
        let row = response
            .rows()
            .first()
            .ok_or_else(|| Error::IndexNotFound {
                space_id,
                name: name.to_string(),
            })?;
        let id = field_u32(row, 1, "index id")?;

        tracing::debug!(space_id, index = name, id, "resolved index");
        self.cache
            .write()
            .index_ids
            .entry(space_id)
            .or_default()
            .insert(name.to_string(), id);
        Ok(id)
    }

    /// Name of a space resolved earlier, without a round trip.
    pub fn space_name(&self, id: u32) -> Option<String> {
        self.cache.read().space_names.get(&id).cloned()
    }

    /// Everything cached about the space called `name`.
    pub fn space(&self, name: &str) -> Option<SpaceMetadata> {
        let cache = self.cache.read();
        let id = *cache.space_ids.get(name)?;
        Some(SpaceMetadata {
            name: name.to_string(),
            id,
            indexes: cache.index_ids.get(&id).cloned().unwrap_or_default(),
        })
    }

    /// Forget everything resolved so far.
    pub fn flush(&self) {
        *self.cache.write() = Cache::default();
        tracing::debug!("schema cache flushed");
    }
}

fn lookup(space_id: u32, index_id: u32, key: Vec<Value>) -> Request {
    Request::Select {
        space_id,
        index_id,
        key,
        limit: 1,
        offset: 0,
        iterator: Iterator::Eq,
    }
}

fn field_u32(row: &Value, pos: usize, what: &str) -> Result<u32> {
    row.as_array()
        .and_then(|fields| fields.get(pos))
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| {
            tarn_protocol::Error::Decode(format!("catalog row has no {what}: {row}")).into()
        })
}
