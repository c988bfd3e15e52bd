//! Scenario tree and resolver.
//!
//! The tree is an owned hierarchy built once at startup. Resolution is a
//! pure function of (tree, session path, request): no clocks, no randomness.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::error::{KernelError, RegistrationError};
use super::handler::Handler;
use super::request::Request;

pub type MatchFn = dyn Fn(&Request) -> bool + Send + Sync;

/// Read-only predicate over the current turn.
#[derive(Clone)]
pub enum Matcher {
    /// Default-equivalent: matches every turn
    Always,
    /// Resolved intent name equals the given one
    Intent(String),
    /// Server action type equals the given one
    Action(String),
    Predicate(Arc<MatchFn>),
}

impl Matcher {
    pub fn intent(name: impl Into<String>) -> Self {
        Matcher::Intent(name.into())
    }

    pub fn action(action_type: impl Into<String>) -> Self {
        Matcher::Action(action_type.into())
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&Request) -> bool + Send + Sync + 'static,
    {
        Matcher::Predicate(Arc::new(f))
    }

    pub fn matches(&self, req: &Request) -> bool {
        match self {
            Matcher::Always => true,
            Matcher::Intent(name) => req.intent() == name.trim_start_matches('/'),
            Matcher::Action(action_type) => req.action_type() == Some(action_type.as_str()),
            Matcher::Predicate(f) => f(req),
        }
    }

    pub fn is_default(&self) -> bool {
        matches!(self, Matcher::Always)
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Always => write!(f, "Always"),
            Matcher::Intent(name) => write!(f, "Intent({name})"),
            Matcher::Action(action_type) => write!(f, "Action({action_type})"),
            Matcher::Predicate(_) => write!(f, "Predicate(..)"),
        }
    }
}

/// One dispatchable node.
#[derive(Clone)]
pub struct ScenarioNode {
    name: String,
    schema: String,
    matcher: Matcher,
    handler: Option<Arc<dyn Handler>>,
    children: Vec<ScenarioNode>,
}

impl ScenarioNode {
    /// Schema defaults to the node name.
    pub fn new(name: impl Into<String>, matcher: Matcher) -> Self {
        let name = name.into();
        Self {
            schema: name.clone(),
            name,
            matcher,
            handler: None,
            children: Vec::new(),
        }
    }

    /// Node matched by the intent of the same name.
    pub fn intent(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(name.clone(), Matcher::Intent(name))
    }

    pub fn fallback(name: impl Into<String>) -> Self {
        Self::new(name, Matcher::Always)
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn child(mut self, child: ScenarioNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema_id(&self) -> &str {
        &self.schema
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    pub fn handler_ref(&self) -> Option<&Arc<dyn Handler>> {
        self.handler.as_ref()
    }

    pub fn children(&self) -> &[ScenarioNode] {
        &self.children
    }
}

impl fmt::Debug for ScenarioNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScenarioNode")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .field("matcher", &self.matcher)
            .field("has_handler", &self.handler.is_some())
            .field("children", &self.children)
            .finish()
    }
}

/// Outcome of resolving a turn against the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub path: Vec<String>,
    pub schema: String,
}

/// Immutable scenario hierarchy. Top-level nodes hang off an implicit root.
#[derive(Debug, Clone, Default)]
pub struct ScenarioTree {
    roots: Vec<ScenarioNode>,
}

impl ScenarioTree {
    pub fn new(roots: Vec<ScenarioNode>) -> Result<Self, RegistrationError> {
        validate_level("", &roots)?;
        Ok(Self { roots })
    }

    pub fn roots(&self) -> &[ScenarioNode] {
        &self.roots
    }

    /// Explicit path lookup; the empty path is the root (not a node).
    pub fn node(&self, path: &[String]) -> Option<&ScenarioNode> {
        let (first, rest) = path.split_first()?;
        let mut node = self.roots.iter().find(|n| &n.name == first)?;
        for name in rest {
            node = node.children.iter().find(|n| &n.name == name)?;
        }
        Some(node)
    }

    fn children_of(&self, path: &[String]) -> Option<&[ScenarioNode]> {
        if path.is_empty() {
            return Some(&self.roots);
        }
        self.node(path).map(|n| n.children.as_slice())
    }

    /// Resolve the turn to exactly one node with a handler.
    ///
    /// Starts from `session_path` unless it is empty, stale, or `absolute`
    /// is set. Pass 1 walks from the start node up to the root looking at
    /// non-default children (first match wins). Pass 2 takes the nearest
    /// ancestor's always-true child.
    pub fn resolve(&self, session_path: &[String], req: &Request, absolute: bool) -> Result<Resolution, KernelError> {
        let start: &[String] = if absolute || self.node(session_path).is_none() {
            &[]
        } else {
            session_path
        };

        for depth in (0..=start.len()).rev() {
            if let Some(path) = self.descend(&start[..depth], req) {
                return Ok(self.resolution(path));
            }
        }

        for depth in (0..=start.len()).rev() {
            if let Some(path) = self.fallback_at(&start[..depth], req) {
                debug!(path = ?path, "Resolved through fallback node");
                return Ok(self.resolution(path));
            }
        }

        Err(KernelError::NoMatchingScenario {
            intent: req.intent().to_string(),
            path: session_path.to_vec(),
        })
    }

    /// Re-resolution for an explicit `dispatch` to the absolute `path`.
    /// A target with a handler runs as is; a grouping node is walked the
    /// same way `resolve` walks a matched handler-less child.
    pub fn locate(&self, path: &[String], req: &Request) -> Result<Resolution, KernelError> {
        let found = match self.node(path) {
            Some(node) if node.handler.is_some() => Some(path.to_vec()),
            Some(_) => self.descend(path, req).or_else(|| self.fallback_at(path, req)),
            None => None,
        };

        found
            .map(|p| self.resolution(p))
            .ok_or_else(|| KernelError::NoMatchingScenario {
                intent: req.intent().to_string(),
                path: path.to_vec(),
            })
    }

    /// A matched node with a handler consumes the turn; handler-less nodes
    /// only group their children, so the walk continues below them.
    fn descend(&self, anchor: &[String], req: &Request) -> Option<Vec<String>> {
        let children = self.children_of(anchor)?;
        let child = children
            .iter()
            .find(|c| !c.matcher.is_default() && c.matcher.matches(req))?;

        let mut path = anchor.to_vec();
        path.push(child.name.clone());

        if child.handler.is_some() {
            return Some(path);
        }
        self.descend(&path, req).or_else(|| self.fallback_at(&path, req))
    }

    fn fallback_at(&self, anchor: &[String], req: &Request) -> Option<Vec<String>> {
        let children = self.children_of(anchor)?;
        let child = children.iter().find(|c| c.matcher.is_default())?;

        let mut path = anchor.to_vec();
        path.push(child.name.clone());

        if child.handler.is_some() {
            return Some(path);
        }
        self.descend(&path, req).or_else(|| self.fallback_at(&path, req))
    }

    fn resolution(&self, path: Vec<String>) -> Resolution {
        let schema = self
            .node(&path)
            .map(|n| n.schema.clone())
            .unwrap_or_default();
        Resolution { path, schema }
    }
}

fn validate_level(parent: &str, nodes: &[ScenarioNode]) -> Result<(), RegistrationError> {
    let mut seen = HashSet::new();
    for node in nodes {
        if node.name.is_empty() || node.name.contains('/') {
            return Err(RegistrationError::InvalidNodeName(node.name.clone()));
        }
        if !seen.insert(node.name.as_str()) {
            return Err(RegistrationError::DuplicateNode {
                parent: parent.to_string(),
                name: node.name.clone(),
            });
        }
        if node.handler.is_none() && node.children.is_empty() {
            return Err(RegistrationError::DeadNode(node.name.clone()));
        }
        let qualified = if parent.is_empty() {
            node.name.clone()
        } else {
            format!("{parent}/{}", node.name)
        };
        validate_level(&qualified, &node.children)?;
    }
    Ok(())
}
