//! Node factory
//!
//! Maps the configuration object's type strings onto node constructors.
//! The built-in variants are always registered; embedding applications
//! register their own under `"custom"` (or any other distinct name)
//! before handing the factory to the engine.

use std::collections::HashMap;

use gm_core::{EngineError, EngineResult};

use crate::node::Node;
use crate::nodes::{
    AsioSinkNode, AsioSourceNode, FileSinkNode, FileSourceNode, FilterProcessorNode,
};

/// Constructor for one node type
pub type NodeConstructor = Box<dyn Fn() -> Box<dyn Node> + Send + Sync>;

/// Registry of node constructors keyed by type string
pub struct NodeFactory {
    constructors: HashMap<String, NodeConstructor>,
}

impl NodeFactory {
    /// Factory with the built-in node types registered.
    pub fn with_builtin() -> Self {
        let mut factory = Self {
            constructors: HashMap::new(),
        };
        factory.register("asio_source", Box::new(|| Box::new(AsioSourceNode::new())));
        factory.register("asio_sink", Box::new(|| Box::new(AsioSinkNode::new())));
        factory.register("file_source", Box::new(|| Box::new(FileSourceNode::new())));
        factory.register("file_sink", Box::new(|| Box::new(FileSinkNode::new())));
        factory.register(
            "filter_processor",
            Box::new(|| Box::new(FilterProcessorNode::new())),
        );
        factory
    }

    /// Register (or replace) a constructor. User-defined nodes go under
    /// `"custom"` or any other name the configuration refers to.
    pub fn register(&mut self, type_name: &str, constructor: NodeConstructor) {
        self.constructors.insert(type_name.to_string(), constructor);
    }

    /// Instantiate a node by type string.
    pub fn create(&self, type_name: &str) -> EngineResult<Box<dyn Node>> {
        self.constructors
            .get(type_name)
            .map(|ctor| ctor())
            .ok_or_else(|| EngineError::Config(format!("unknown node type '{type_name}'")))
    }

    pub fn registered_types(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }
}

impl Default for NodeFactory {
    fn default() -> Self {
        Self::with_builtin()
    }
}
