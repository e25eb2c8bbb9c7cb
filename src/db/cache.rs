//! Cache manager collaborator hooks.
//!
//! LRU caches over traversals, property reads, and key lookups. Disabled
//! unless requested in the open options; the commit and checkpoint paths
//! invalidate affected entries.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use serde::Serialize;

use crate::types::*;

/// Traversal direction for cached neighbor lists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
  Out,
  In,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
  pub hits: u64,
  pub misses: u64,
  pub invalidations: u64,
}

pub struct CacheManager {
  traversal: LruCache<(NodeId, Option<ETypeId>, Direction), Arc<Vec<NodeId>>>,
  node_props: LruCache<(NodeId, PropKeyId), Option<PropValue>>,
  edge_props: LruCache<(NodeId, ETypeId, NodeId, PropKeyId), Option<PropValue>>,
  keys: LruCache<String, Option<NodeId>>,
  stats: CacheStats,
}

impl CacheManager {
  pub fn new(capacity: usize) -> Self {
    let cap = NonZeroUsize::new(capacity.max(16)).unwrap();
    Self {
      traversal: LruCache::new(cap),
      node_props: LruCache::new(cap),
      edge_props: LruCache::new(cap),
      keys: LruCache::new(cap),
      stats: CacheStats::default(),
    }
  }

  fn track<T>(&mut self, value: Option<T>) -> Option<T> {
    match value {
      Some(v) => {
        self.stats.hits += 1;
        Some(v)
      }
      None => {
        self.stats.misses += 1;
        None
      }
    }
  }

  pub fn get_traversal(
    &mut self,
    node_id: NodeId,
    etype: Option<ETypeId>,
    direction: Direction,
  ) -> Option<Arc<Vec<NodeId>>> {
    let hit = self.traversal.get(&(node_id, etype, direction)).cloned();
    self.track(hit)
  }

  pub fn set_traversal(
    &mut self,
    node_id: NodeId,
    etype: Option<ETypeId>,
    direction: Direction,
    neighbors: Arc<Vec<NodeId>>,
  ) {
    self.traversal.put((node_id, etype, direction), neighbors);
  }

  pub fn get_node_prop(&mut self, node_id: NodeId, key_id: PropKeyId) -> Option<Option<PropValue>> {
    let hit = self.node_props.get(&(node_id, key_id)).cloned();
    self.track(hit)
  }

  pub fn set_node_prop(&mut self, node_id: NodeId, key_id: PropKeyId, value: Option<PropValue>) {
    self.node_props.put((node_id, key_id), value);
  }

  pub fn get_edge_prop(
    &mut self,
    src: NodeId,
    etype: ETypeId,
    dst: NodeId,
    key_id: PropKeyId,
  ) -> Option<Option<PropValue>> {
    let hit = self.edge_props.get(&(src, etype, dst, key_id)).cloned();
    self.track(hit)
  }

  pub fn set_edge_prop(
    &mut self,
    src: NodeId,
    etype: ETypeId,
    dst: NodeId,
    key_id: PropKeyId,
    value: Option<PropValue>,
  ) {
    self.edge_props.put((src, etype, dst, key_id), value);
  }

  pub fn get_key(&mut self, key: &str) -> Option<Option<NodeId>> {
    let hit = self.keys.get(key).copied();
    self.track(hit)
  }

  pub fn set_key(&mut self, key: &str, node_id: Option<NodeId>) {
    self.keys.put(key.to_string(), node_id);
  }

  // ==========================================================================
  // Invalidation
  // ==========================================================================

  /// Drop everything touching a node: its traversals, its properties, and
  /// traversals that may list it as a neighbor.
  pub fn invalidate_node(&mut self, node_id: NodeId) {
    self.stats.invalidations += 1;
    // Neighbor lists can mention the node anywhere; scanning keys is as
    // expensive as dropping the cache
    self.traversal.clear();
    let stale: Vec<_> = self
      .node_props
      .iter()
      .filter(|((n, _), _)| *n == node_id)
      .map(|(k, _)| *k)
      .collect();
    for k in stale {
      self.node_props.pop(&k);
    }
    let stale: Vec<_> = self
      .edge_props
      .iter()
      .filter(|((s, _, d, _), _)| *s == node_id || *d == node_id)
      .map(|(k, _)| *k)
      .collect();
    for k in stale {
      self.edge_props.pop(&k);
    }
  }

  pub fn invalidate_edge(&mut self, src: NodeId, etype: ETypeId, dst: NodeId) {
    self.stats.invalidations += 1;
    for direction in [Direction::Out, Direction::In] {
      let node = if direction == Direction::Out { src } else { dst };
      self.traversal.pop(&(node, None, direction));
      self.traversal.pop(&(node, Some(etype), direction));
    }
    let stale: Vec<_> = self
      .edge_props
      .iter()
      .filter(|((s, e, d, _), _)| *s == src && *e == etype && *d == dst)
      .map(|(k, _)| *k)
      .collect();
    for k in stale {
      self.edge_props.pop(&k);
    }
  }

  pub fn invalidate_key(&mut self, key: &str) {
    self.stats.invalidations += 1;
    self.keys.pop(key);
  }

  pub fn clear(&mut self) {
    self.traversal.clear();
    self.node_props.clear();
    self.edge_props.clear();
    self.keys.clear();
  }

  pub fn stats(&self) -> CacheStats {
    self.stats
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn traversal_round_trip_and_invalidation() {
    let mut cache = CacheManager::new(64);
    assert!(cache.get_traversal(1, None, Direction::Out).is_none());
    cache.set_traversal(1, None, Direction::Out, Arc::new(vec![2, 3]));
    assert_eq!(
      cache.get_traversal(1, None, Direction::Out).unwrap().as_ref(),
      &vec![2, 3]
    );

    cache.invalidate_edge(1, 1, 2);
    assert!(cache.get_traversal(1, None, Direction::Out).is_none());
  }

  #[test]
  fn key_cache_caches_negative_lookups() {
    let mut cache = CacheManager::new(64);
    cache.set_key("missing", None);
    assert_eq!(cache.get_key("missing"), Some(None));
    cache.invalidate_key("missing");
    assert_eq!(cache.get_key("missing"), None);
  }

  #[test]
  fn node_invalidation_sweeps_props() {
    let mut cache = CacheManager::new(64);
    cache.set_node_prop(1, 1, Some(PropValue::I64(5)));
    cache.set_node_prop(2, 1, Some(PropValue::I64(6)));
    cache.invalidate_node(1);
    assert!(cache.get_node_prop(1, 1).is_none());
    assert_eq!(cache.get_node_prop(2, 1), Some(Some(PropValue::I64(6))));
  }
}
