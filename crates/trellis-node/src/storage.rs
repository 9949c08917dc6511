//! Persistent tree storage using RocksDB.
//!
//! # Key Layout
//!
//! - `node:{id:020}` - JSON-encoded [`Node`], zero-padded so prefix scans run in id order
//! - `user:{user_id}` - owning node id
//! - `code:{referral_code}` - owning node id
//! - `meta:root` - root node id
//! - `meta:next_id` - next id to allocate
//!
//! Every mutation is written as one `WriteBatch` while holding the write
//! lock, so the slot check in [`TreeStore::set_child`] and the pointer
//! update are a single atomic step, and an attach lands entirely or not at
//! all.

use crate::error::Result;
use parking_lot::Mutex;
use rocksdb::{Options, WriteBatch, DB};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use trellis_tree::{Node, NodeId, Result as TreeResult, Side, TreeError, TreeStore};

const NODE_PREFIX: &[u8] = b"node:";
const ROOT_KEY: &[u8] = b"meta:root";
const NEXT_ID_KEY: &[u8] = b"meta:next_id";

fn node_key(id: NodeId) -> String {
    format!("node:{:020}", id.value())
}

fn user_key(user_id: &str) -> String {
    format!("user:{}", user_id)
}

fn code_key(code: &str) -> String {
    format!("code:{}", code)
}

fn db_err(e: rocksdb::Error) -> TreeError {
    TreeError::Storage(e.to_string())
}

fn codec_err(e: serde_json::Error) -> TreeError {
    TreeError::Storage(format!("corrupt record: {}", e))
}

/// A `TreeStore` persisted in RocksDB.
pub struct RocksTreeStore {
    db: DB,
    write_lock: Mutex<()>,
    next_id: AtomicU64,
}

impl RocksTreeStore {
    /// Open or create storage at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Self::from_db(db)
    }

    /// Open existing storage without taking the write lock on disk, so it
    /// can be inspected while a node holds it. Writes will fail.
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        let opts = Options::default();
        let db = DB::open_for_read_only(&opts, path, false)?;
        Self::from_db(db)
    }

    fn from_db(db: DB) -> Result<Self> {
        let next_id = match db.get(NEXT_ID_KEY)? {
            Some(raw) => serde_json::from_slice(&raw)?,
            None => 1,
        };

        Ok(Self {
            db,
            write_lock: Mutex::new(()),
            next_id: AtomicU64::new(next_id),
        })
    }

    // --- Reads ---

    fn load(&self, id: NodeId) -> TreeResult<Option<Node>> {
        match self.db.get(node_key(id).as_bytes()).map_err(db_err)? {
            Some(data) => Ok(Some(serde_json::from_slice(&data).map_err(codec_err)?)),
            None => Ok(None),
        }
    }

    fn load_id(&self, key: &[u8]) -> TreeResult<Option<NodeId>> {
        match self.db.get(key).map_err(db_err)? {
            Some(data) => Ok(Some(serde_json::from_slice(&data).map_err(codec_err)?)),
            None => Ok(None),
        }
    }

    fn exists(&self, key: &str) -> TreeResult<bool> {
        Ok(self.db.get(key.as_bytes()).map_err(db_err)?.is_some())
    }

    // --- Write staging ---

    /// Validate `node` for insertion and stage it into `batch`.
    ///
    /// Caller holds the write lock.
    fn stage_insert(&self, batch: &mut WriteBatch, node: Node) -> TreeResult<Node> {
        if self.load(node.id)?.is_some() {
            return Err(TreeError::DuplicateId(node.id));
        }
        if self.exists(&user_key(&node.user_id))? {
            return Err(TreeError::DuplicateUser(node.user_id));
        }
        if self.exists(&code_key(&node.referral_code))? {
            return Err(TreeError::DuplicateReferralCode(node.referral_code));
        }

        match node.parent_id {
            Some(parent_id) => {
                let parent = self.load(parent_id)?.ok_or_else(|| TreeError::InvalidParent {
                    node: node.id,
                    reason: format!("parent {} does not exist", parent_id),
                })?;
                if node.level != parent.level + 1 {
                    return Err(TreeError::InvalidParent {
                        node: node.id,
                        reason: format!(
                            "level {} does not follow parent level {}",
                            node.level, parent.level
                        ),
                    });
                }
            }
            None => {
                if let Some(root) = self.load_id(ROOT_KEY)? {
                    return Err(TreeError::RootExists(root));
                }
                batch.put(ROOT_KEY, encode(&node.id)?);
            }
        }

        let mut stored = node;
        stored.left_child_id = None;
        stored.right_child_id = None;

        let id = encode(&stored.id)?;
        batch.put(user_key(&stored.user_id).as_bytes(), &id);
        batch.put(code_key(&stored.referral_code).as_bytes(), &id);
        batch.put(node_key(stored.id).as_bytes(), encode(&stored)?);

        let next = self.next_id.load(Ordering::Relaxed).max(stored.id.value() + 1);
        batch.put(NEXT_ID_KEY, encode(&next)?);
        Ok(stored)
    }

    /// Check the `(parent, side)` slot is free and stage the link.
    ///
    /// `child` is the child as it will exist after the batch.
    fn stage_link(
        &self,
        batch: &mut WriteBatch,
        parent_id: NodeId,
        side: Side,
        child: &Node,
    ) -> TreeResult<()> {
        if child.parent_id != Some(parent_id) {
            return Err(TreeError::InvalidParent {
                node: child.id,
                reason: format!("child does not reference parent {}", parent_id),
            });
        }

        let mut parent = self.load(parent_id)?.ok_or(TreeError::NodeNotFound(parent_id))?;
        let slot = match side {
            Side::Left => &mut parent.left_child_id,
            Side::Right => &mut parent.right_child_id,
        };
        if slot.is_some() {
            return Err(TreeError::SlotOccupied {
                parent: parent_id,
                side,
            });
        }
        *slot = Some(child.id);
        batch.put(node_key(parent_id).as_bytes(), encode(&parent)?);
        Ok(())
    }

    fn commit(&self, batch: WriteBatch, bump_to: Option<NodeId>) -> TreeResult<()> {
        self.db.write(batch).map_err(db_err)?;
        if let Some(id) = bump_to {
            self.next_id.fetch_max(id.value() + 1, Ordering::Relaxed);
        }
        Ok(())
    }
}

fn encode<T: serde::Serialize>(value: &T) -> TreeResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(codec_err)
}

impl TreeStore for RocksTreeStore {
    fn allocate_id(&self) -> TreeResult<NodeId> {
        Ok(NodeId(self.next_id.fetch_add(1, Ordering::Relaxed)))
    }

    fn get(&self, id: NodeId) -> TreeResult<Node> {
        self.load(id)?.ok_or(TreeError::NodeNotFound(id))
    }

    fn get_by_user(&self, user_id: &str) -> TreeResult<Node> {
        let id = self
            .load_id(user_key(user_id).as_bytes())?
            .ok_or_else(|| TreeError::UserNotFound(user_id.to_string()))?;
        self.get(id)
    }

    fn get_by_sponsor_code(&self, code: &str) -> TreeResult<Node> {
        let id = self
            .load_id(code_key(code).as_bytes())?
            .ok_or_else(|| TreeError::CodeNotFound(code.to_string()))?;
        self.get(id)
    }

    fn root(&self) -> TreeResult<Option<Node>> {
        match self.load_id(ROOT_KEY)? {
            Some(id) => self.load(id),
            None => Ok(None),
        }
    }

    fn insert(&self, node: Node) -> TreeResult<Node> {
        let _guard = self.write_lock.lock();
        let mut batch = WriteBatch::default();
        let stored = self.stage_insert(&mut batch, node)?;
        self.commit(batch, Some(stored.id))?;
        Ok(stored)
    }

    fn set_child(&self, parent_id: NodeId, side: Side, child_id: NodeId) -> TreeResult<()> {
        let _guard = self.write_lock.lock();
        let child = self.get(child_id)?;
        let mut batch = WriteBatch::default();
        self.stage_link(&mut batch, parent_id, side, &child)?;
        self.commit(batch, None)
    }

    fn attach(&self, node: Node) -> TreeResult<Node> {
        let side = node.side.side();
        let _guard = self.write_lock.lock();
        let mut batch = WriteBatch::default();
        let stored = self.stage_insert(&mut batch, node)?;
        if let (Some(parent_id), Some(side)) = (stored.parent_id, side) {
            self.stage_link(&mut batch, parent_id, side, &stored)?;
        }
        self.commit(batch, Some(stored.id))?;
        Ok(stored)
    }

    fn set_active(&self, id: NodeId, active: bool) -> TreeResult<Node> {
        let _guard = self.write_lock.lock();
        let mut node = self.get(id)?;
        node.active = active;
        self.db
            .put(node_key(id).as_bytes(), encode(&node)?)
            .map_err(db_err)?;
        Ok(node)
    }

    fn scan(&self) -> TreeResult<Vec<Node>> {
        let mut nodes = Vec::new();

        let iter = self.db.prefix_iterator(NODE_PREFIX);
        for item in iter {
            let (key, value) = item.map_err(db_err)?;
            if key.starts_with(NODE_PREFIX) {
                nodes.push(serde_json::from_slice(&value).map_err(codec_err)?);
            } else {
                break;
            }
        }

        Ok(nodes)
    }

    fn len(&self) -> TreeResult<usize> {
        let mut count = 0;
        for item in self.db.prefix_iterator(NODE_PREFIX) {
            let (key, _) = item.map_err(db_err)?;
            if !key.starts_with(NODE_PREFIX) {
                break;
            }
            count += 1;
        }
        Ok(count)
    }
}
