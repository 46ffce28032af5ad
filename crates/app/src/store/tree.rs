use serde_json::{Map, Value};
use tokio::sync::mpsc;

use super::{Snapshot, Subscription};

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// True when one path is an ancestor of (or equal to) the other.
pub(crate) fn related(a: &str, b: &str) -> bool {
    let a = segments(a);
    let b = segments(b);
    let n = a.len().min(b.len());
    a[..n] == b[..n]
}

// ---------------------------------------------------------------------------
// JSON tree
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct Tree {
    root: Map<String, Value>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        let segs = segments(path);
        // The root itself is not addressable.
        let (first, rest) = segs.split_first()?;
        let mut node = self.root.get(*first)?;
        for seg in rest {
            node = node.as_object()?.get(*seg)?;
        }
        Some(node)
    }

    /// Store `value` at `path`. `None` (or JSON null) removes the entry and
    /// prunes parents left empty.
    pub fn set(&mut self, path: &str, value: Option<Value>) {
        let value = value.filter(|v| !v.is_null());
        let segs = segments(path);
        if segs.is_empty() {
            self.root = match value {
                Some(Value::Object(map)) => map,
                _ => Map::new(),
            };
            return;
        }
        set_in(&mut self.root, &segs, value);
    }
}

fn set_in(map: &mut Map<String, Value>, segs: &[&str], value: Option<Value>) {
    let Some((head, rest)) = segs.split_first() else {
        return;
    };

    if rest.is_empty() {
        match value {
            Some(v) => {
                map.insert(head.to_string(), v);
            }
            None => {
                map.remove(*head);
            }
        }
        return;
    }

    if value.is_none() && !map.contains_key(*head) {
        return;
    }

    let child = map
        .entry(head.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !child.is_object() {
        if value.is_none() {
            return;
        }
        *child = Value::Object(Map::new());
    }

    let mut now_empty = false;
    if let Value::Object(child_map) = child {
        set_in(child_map, rest, value);
        now_empty = child_map.is_empty();
    }
    if now_empty {
        map.remove(*head);
    }
}

// ---------------------------------------------------------------------------
// Tree + subscriber fan-out
// ---------------------------------------------------------------------------

struct Subscriber {
    path: String,
    tx: mpsc::UnboundedSender<Snapshot>,
}

/// A tree together with the listeners attached to it. Both stores keep one
/// of these behind a mutex.
#[derive(Default)]
pub struct Mirror {
    tree: Tree,
    subscribers: Vec<Subscriber>,
}

impl Mirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn subscribe(&mut self, path: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Snapshot {
            path: path.to_string(),
            value: self.tree.get(path).cloned(),
        });
        self.subscribers.push(Subscriber {
            path: path.to_string(),
            tx,
        });
        Subscription::new(rx)
    }

    /// Apply a change and notify every subscriber whose path overlaps it.
    pub fn apply(&mut self, path: &str, value: Option<Value>) {
        self.tree.set(path, value);
        self.subscribers.retain(|s| !s.tx.is_closed());
        for sub in &self.subscribers {
            if related(&sub.path, path) {
                let _ = sub.tx.send(Snapshot {
                    path: sub.path.clone(),
                    value: self.tree.get(&sub.path).cloned(),
                });
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.iter().filter(|s| !s.tx.is_closed()).count()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn related_paths() {
        assert!(related("schedules", "schedules/LED"));
        assert!(related("schedules/LED", "schedules"));
        assert!(related("devices/relay1", "devices/relay1"));
        assert!(!related("devices/relay1", "devices/relay10"));
        assert!(!related("Control/MRTA", "Control/LED"));
        assert!(related("", "sensors/water/ph"));
    }

    #[test]
    fn set_creates_intermediate_objects() {
        let mut tree = Tree::new();
        tree.set("sensors/water/ph", Some(json!(7.6)));
        assert_eq!(tree.get("sensors/water/ph"), Some(&json!(7.6)));
        assert_eq!(tree.get("sensors/water"), Some(&json!({"ph": 7.6})));
    }

    #[test]
    fn delete_prunes_empty_parents() {
        let mut tree = Tree::new();
        tree.set("schedules/LED", Some(json!({"enabled": true})));
        tree.set("schedules/LED", None);
        assert_eq!(tree.get("schedules/LED"), None);
        assert_eq!(tree.get("schedules"), None);
    }

    #[test]
    fn delete_keeps_siblings() {
        let mut tree = Tree::new();
        tree.set("schedules/LED", Some(json!(1)));
        tree.set("schedules/FAN", Some(json!(2)));
        tree.set("schedules/LED", None);
        assert_eq!(tree.get("schedules"), Some(&json!({"FAN": 2})));
    }

    #[test]
    fn null_is_treated_as_delete() {
        let mut tree = Tree::new();
        tree.set("Control/LED", Some(json!("1")));
        tree.set("Control/LED", Some(Value::Null));
        assert_eq!(tree.get("Control/LED"), None);
    }

    #[test]
    fn scalar_parent_is_replaced_by_object() {
        let mut tree = Tree::new();
        tree.set("devices", Some(json!("junk")));
        tree.set("devices/relay1", Some(json!({"message": "ON"})));
        assert_eq!(
            tree.get("devices/relay1"),
            Some(&json!({"message": "ON"}))
        );
    }

    #[test]
    fn delete_missing_path_is_noop() {
        let mut tree = Tree::new();
        tree.set("a/b/c", None);
        assert_eq!(tree.get("a"), None);
    }

    #[tokio::test]
    async fn subscribe_delivers_current_value_first() {
        let mut mirror = Mirror::new();
        mirror.apply("Control/MRTA", Some(json!("1")));
        let mut sub = mirror.subscribe("Control/MRTA");
        let snap = sub.recv().await.unwrap();
        assert_eq!(snap.value, Some(json!("1")));
    }

    #[tokio::test]
    async fn subscribers_see_descendant_writes() {
        let mut mirror = Mirror::new();
        let mut sub = mirror.subscribe("schedules");
        assert_eq!(sub.recv().await.unwrap().value, None);

        mirror.apply("schedules/LED", Some(json!({"enabled": false})));
        let snap = sub.recv().await.unwrap();
        assert_eq!(snap.path, "schedules");
        assert_eq!(snap.value, Some(json!({"LED": {"enabled": false}})));
    }

    #[tokio::test]
    async fn unrelated_writes_are_not_delivered() {
        let mut mirror = Mirror::new();
        let mut sub = mirror.subscribe("Control/LED");
        sub.recv().await.unwrap();

        mirror.apply("Control/FAN", Some(json!("1")));
        assert!(sub.rx.try_recv().is_err());
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let mut mirror = Mirror::new();
        let sub = mirror.subscribe("devices");
        assert_eq!(mirror.subscriber_count(), 1);
        drop(sub);
        mirror.apply("devices/relay1", Some(json!({"message": "OFF"})));
        assert_eq!(mirror.subscriber_count(), 0);
        assert!(mirror.subscribers.is_empty());
    }
}
