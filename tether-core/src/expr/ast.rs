//! Expression Tree
//!
//! The parser produces an arena of [`Node`]s addressed by [`NodeId`]. Nodes
//! refer to their children by id, which lets the analysis pass describe a
//! node's minimal watch set as a list of ids (possibly just the node's own
//! id) without cloning subtrees, and lets input evaluators share the arena
//! with the whole expression.

use serde::Serialize;
use smallvec::SmallVec;

use crate::value::Value;

/// Index of a node within its [`Ast`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Watch set of a node. Most nodes watch one or two things.
pub type WatchSet = SmallVec<[NodeId; 2]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnaryOp {
    Plus,
    Minus,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
}

impl BinaryOp {
    pub(crate) fn from_token(text: &str) -> Option<Self> {
        Some(match text {
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Sub,
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            "%" => BinaryOp::Rem,
            "==" => BinaryOp::Eq,
            "!=" => BinaryOp::NotEq,
            "===" => BinaryOp::StrictEq,
            "!==" => BinaryOp::StrictNotEq,
            "<" => BinaryOp::Lt,
            ">" => BinaryOp::Gt,
            "<=" => BinaryOp::LtEq,
            ">=" => BinaryOp::GtEq,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogicalOp {
    And,
    Or,
}

/// The node variants of the expression language.
#[derive(Debug, Clone, Serialize)]
pub enum NodeKind {
    Program(Vec<NodeId>),
    Literal(Value),
    Array(Vec<NodeId>),
    /// Children are `Property` nodes.
    Object(Vec<NodeId>),
    Property {
        key: String,
        value: NodeId,
    },
    Identifier(String),
    This,
    Locals,
    Member {
        object: NodeId,
        property: NodeId,
        computed: bool,
    },
    Call {
        callee: NodeId,
        arguments: Vec<NodeId>,
        filter: bool,
    },
    Assignment {
        target: NodeId,
        value: NodeId,
    },
    Unary {
        op: UnaryOp,
        argument: NodeId,
    },
    Binary {
        op: BinaryOp,
        left: NodeId,
        right: NodeId,
    },
    Logical {
        op: LogicalOp,
        left: NodeId,
        right: NodeId,
    },
    Conditional {
        test: NodeId,
        consequent: NodeId,
        alternate: NodeId,
    },
}

/// A node plus the annotations written by the analysis pass.
#[derive(Debug, Clone, Serialize)]
pub struct Node {
    pub kind: NodeKind,
    /// The node's value can never change between evaluations.
    pub constant: bool,
    /// Sub-expressions whose change is necessary for this node to change.
    pub to_watch: WatchSet,
}

/// A parsed expression: the node arena and the id of its `Program` node.
#[derive(Debug, Clone, Serialize)]
pub struct Ast {
    nodes: Vec<Node>,
    root: Option<NodeId>,
}

impl Ast {
    pub(crate) fn new() -> Self {
        Self {
            nodes: Vec::new(),
            root: None,
        }
    }

    /// Append a node and return its id.
    pub(crate) fn add(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            kind,
            constant: false,
            to_watch: WatchSet::new(),
        });
        id
    }

    pub(crate) fn set_root(&mut self, root: NodeId) {
        self.root = Some(root);
    }

    /// Id of the `Program` node.
    pub fn root(&self) -> NodeId {
        self.root.unwrap_or(NodeId(0))
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.node(id).kind
    }

    /// Statements of the program.
    pub fn body(&self) -> &[NodeId] {
        match self.kind(self.root()) {
            NodeKind::Program(body) => body,
            _ => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Names of all filters piped to anywhere in the tree.
    pub fn filter_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for node in &self.nodes {
            if let NodeKind::Call {
                callee,
                filter: true,
                ..
            } = &node.kind
            {
                if let NodeKind::Identifier(name) = self.kind(*callee) {
                    if !names.contains(&name.as_str()) {
                        names.push(name);
                    }
                }
            }
        }
        names
    }
}
