//! The host resource tree.
//!
//! Resources form a tree of groups and handler leaves stored in an arena:
//! nodes refer to each other by [`NodeId`], and façade objects handed to
//! guest code hold only an id plus the shared tree.
//!
//! ```text
//! (root)
//!  └─ api            Group("api")            path /api
//!      └─ posts      Group("posts")          path /api/posts
//!          ├─ list   Add(list)               GET  /api/posts
//!          └─ show   Add(show, {path: "/:id"}) GET /api/posts/:id
//! ```

mod facade;
mod response;

pub use facade::{GuestHandler, ResourceFacade};
pub use response::{RawResponse, Response, RAW_RESPONSE, RESPONSE_TAG};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// Stable identifier of a resource node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who may call a resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

/// Routing metadata of a group or handler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMeta {
    /// Node name; defaults to the group name or the handler's function name.
    #[serde(default)]
    pub name: Option<String>,
    /// HTTP method of a handler (default `GET`).
    #[serde(default)]
    pub method: Option<String>,
    /// Path segment(s); groups default to `/<name>`, handlers to the group's path.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub visibility: Option<Visibility>,
    /// Argument schema, consumed by the routing layer.
    #[serde(default)]
    pub args: Option<JsonValue>,
}

/// Host-native request handler.
pub trait Handler: Send + Sync {
    /// Handle one request, described as JSON.
    fn handle(&self, request: &JsonValue) -> Response;
}

struct Node {
    name: String,
    meta: ResourceMeta,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    handler: Option<Arc<dyn Handler>>,
}

/// Read-only snapshot of one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    pub id: NodeId,
    pub name: String,
    pub meta: ResourceMeta,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub has_handler: bool,
}

/// A routable handler.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub node: NodeId,
    pub method: String,
    pub path: String,
    pub visibility: Visibility,
}

impl Route {
    /// Match a request, returning the bound `:param` segments.
    pub fn matches(&self, method: &str, path: &str) -> Option<BTreeMap<String, String>> {
        if !self.method.eq_ignore_ascii_case(method) {
            return None;
        }

        let pattern: Vec<&str> = segments(&self.path).collect();
        let actual: Vec<&str> = segments(path).collect();
        if pattern.len() != actual.len() {
            return None;
        }

        let mut params = BTreeMap::new();
        for (expected, got) in pattern.iter().zip(actual.iter()) {
            match expected.strip_prefix(':') {
                Some(param) => {
                    params.insert(param.to_string(), got.to_string());
                }
                None if expected == got => {}
                None => return None,
            }
        }
        Some(params)
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn join(base: &str, path: &str) -> String {
    let joined: Vec<&str> = segments(base).chain(segments(path)).collect();
    format!("/{}", joined.join("/"))
}

/// Arena of resource nodes, rooted at [`ResourceTree::root`].
pub struct ResourceTree {
    nodes: RwLock<Vec<Node>>,
}

impl ResourceTree {
    /// A tree with only the root node.
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(vec![Node {
                name: String::new(),
                meta: ResourceMeta::default(),
                parent: None,
                children: Vec::new(),
                handler: None,
            }]),
        }
    }

    /// Root node id.
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        read(&self.nodes).len()
    }

    /// Whether the tree has only its root.
    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    /// Snapshot of a node.
    pub fn node(&self, id: NodeId) -> Option<NodeInfo> {
        let nodes = read(&self.nodes);
        nodes.get(id.0).map(|node| NodeInfo {
            id,
            name: node.name.clone(),
            meta: node.meta.clone(),
            parent: node.parent,
            children: node.children.clone(),
            has_handler: node.handler.is_some(),
        })
    }

    /// Get or create the group `name` under `parent`.
    ///
    /// An existing group keeps its metadata. Returns `None` if `parent`
    /// does not exist.
    pub fn group(&self, parent: NodeId, name: &str, meta: ResourceMeta) -> Option<NodeId> {
        let mut nodes = write(&self.nodes);
        let existing = nodes.get(parent.0)?.children.iter().copied().find(|child| {
            let node = &nodes[child.0];
            node.handler.is_none() && node.name == name
        });
        if let Some(id) = existing {
            return Some(id);
        }

        let id = insert(&mut nodes, parent, name.to_string(), meta, None);
        debug!(group = %name, id = %id, "Added resource group");
        Some(id)
    }

    /// Add a handler leaf under `parent`.
    pub fn add(&self, parent: NodeId, name: &str, handler: Arc<dyn Handler>, meta: ResourceMeta) -> Option<NodeId> {
        let mut nodes = write(&self.nodes);
        nodes.get(parent.0)?;
        let id = insert(&mut nodes, parent, name.to_string(), meta, Some(handler));
        debug!(handler = %name, id = %id, "Added resource handler");
        Some(id)
    }

    /// Find a node by a `/`-separated path of names relative to `from`.
    pub fn find(&self, from: NodeId, path: &str) -> Option<NodeId> {
        let nodes = read(&self.nodes);
        let mut current = from;
        nodes.get(current.0)?;
        for name in segments(path) {
            current = nodes[current.0]
                .children
                .iter()
                .copied()
                .find(|child| nodes[child.0].name == name)?;
        }
        Some(current)
    }

    /// Handler installed at a node.
    pub fn handler(&self, id: NodeId) -> Option<Arc<dyn Handler>> {
        read(&self.nodes).get(id.0).and_then(|node| node.handler.clone())
    }

    /// Every handler with its full method and path, in insertion order.
    pub fn routes(&self) -> Vec<Route> {
        let nodes = read(&self.nodes);
        let mut routes = Vec::new();
        for (index, node) in nodes.iter().enumerate() {
            if node.handler.is_none() {
                continue;
            }

            let mut path = node.meta.path.clone().unwrap_or_default();
            let mut parent = node.parent;
            while let Some(id) = parent {
                let group = &nodes[id.0];
                let base = match (&group.meta.path, group.parent) {
                    (Some(path), _) => path.clone(),
                    (None, Some(_)) => format!("/{}", group.name),
                    (None, None) => String::new(),
                };
                path = join(&base, &path);
                parent = group.parent;
            }

            routes.push(Route {
                node: NodeId(index),
                method: node
                    .meta
                    .method
                    .as_deref()
                    .unwrap_or("GET")
                    .to_ascii_uppercase(),
                path: join("", &path),
                visibility: node.meta.visibility.unwrap_or_default(),
            });
        }
        routes
    }

    /// Find the route and path parameters for a request.
    pub fn route(&self, method: &str, path: &str) -> Option<(Route, BTreeMap<String, String>)> {
        self.routes()
            .into_iter()
            .find_map(|route| route.matches(method, path).map(|params| (route, params)))
    }
}

impl Default for ResourceTree {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ResourceTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceTree")
            .field("nodes", &self.len())
            .finish()
    }
}

fn insert(
    nodes: &mut Vec<Node>,
    parent: NodeId,
    name: String,
    meta: ResourceMeta,
    handler: Option<Arc<dyn Handler>>,
) -> NodeId {
    let id = NodeId(nodes.len());
    nodes.push(Node {
        name,
        meta,
        parent: Some(parent),
        children: Vec::new(),
        handler,
    });
    nodes[parent.0].children.push(id);
    id
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
