use std::{collections::HashMap, sync::Arc};

use log::debug;
use serde_json::Value;

use super::{
    Network,
    arch::{Architecture, DenseNetwork, FusedMlp, GemmMlp, GemmResNet},
};
use crate::{
    NetErr, Result, config::NetworkConfig, device::WorkspacePool, precision::Element,
};

/// Builds a network from a validated configuration document.
pub type Constructor<T> =
    fn(&NetworkConfig, &Arc<WorkspacePool>) -> Result<Box<dyn Network<T>>>;

/// Maps architecture tags to their constructors.
///
/// Tags are matched ignoring case. Networks built by a registry lease their inference scratch
/// memory from the registry's pool.
pub struct NetworkRegistry<T: Element> {
    constructors: HashMap<String, Constructor<T>>,
    pool: Arc<WorkspacePool>,
}

impl<T: Element> NetworkRegistry<T> {
    /// Creates a new empty `NetworkRegistry`.
    ///
    /// # Arguments
    /// * `pool` - The workspace handed to every constructed network.
    pub fn new(pool: Arc<WorkspacePool>) -> Self {
        Self {
            constructors: HashMap::new(),
            pool,
        }
    }

    /// Creates a new `NetworkRegistry` knowing every built-in architecture.
    pub fn with_defaults(pool: Arc<WorkspacePool>) -> Self {
        let mut registry = Self::new(pool);
        registry.register_architecture::<FusedMlp>();
        registry.register_architecture::<GemmMlp>();
        registry.register_architecture::<GemmResNet>();
        registry
    }

    /// Registers `constructor` under `otype`, replacing any previous one.
    pub fn register(&mut self, otype: &str, constructor: Constructor<T>) {
        self.constructors
            .insert(otype.to_ascii_lowercase(), constructor);
    }

    pub fn register_architecture<A: Architecture>(&mut self) {
        self.register(A::OTYPE, DenseNetwork::<T, A>::create);
    }

    pub fn contains(&self, otype: &str) -> bool {
        self.constructors
            .contains_key(&otype.to_ascii_lowercase())
    }

    /// Builds the network described by `config`.
    ///
    /// # Arguments
    /// * `config` - A JSON object with an `otype` tag and the architecture's keys.
    ///
    /// # Returns
    /// The initialized network, or a configuration error naming the offending key. Nothing is
    /// allocated when the tag is unknown.
    pub fn create(&self, config: &Value) -> Result<Box<dyn Network<T>>> {
        let config = NetworkConfig::from_value(config)?;
        let otype = config.otype()?;

        let constructor = self
            .constructors
            .get(&otype.to_ascii_lowercase())
            .ok_or_else(|| NetErr::config("otype", format!("unknown architecture `{otype}`")))?;

        debug!(otype = otype, precision = T::NAME; "creating network");
        constructor(&config, &self.pool)
    }
}

/// Builds the network described by `config` using the built-in architectures and the
/// process-wide workspace pool.
///
/// # Arguments
/// * `config` - A JSON object with an `otype` tag and the architecture's keys.
///
/// # Returns
/// The initialized network, or a configuration error naming the offending key.
pub fn create_network<T: Element>(config: &Value) -> Result<Box<dyn Network<T>>> {
    NetworkRegistry::with_defaults(Arc::clone(WorkspacePool::global())).create(config)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn tags_ignore_case() {
        let registry = NetworkRegistry::<f32>::with_defaults(Arc::new(WorkspacePool::new()));
        assert!(registry.contains("fullyfusedmlp"));
        assert!(registry.contains("CUTLASSRESNET"));
        assert!(!registry.contains("Transformer"));

        let net = registry
            .create(&json!({ "otype": "cutlassmlp", "n_input_dims": 2, "n_output_dims": 3 }))
            .unwrap();
        assert_eq!(net.name(), "CutlassMLP");
    }

    #[test]
    fn unknown_tag_names_otype() {
        let registry = NetworkRegistry::<f32>::with_defaults(Arc::new(WorkspacePool::new()));
        for config in [json!({ "otype": "Nope" }), json!({ "n_input_dims": 2 })] {
            let Err(err) = registry.create(&config) else {
                panic!("expected an error for {config}");
            };
            assert!(matches!(err, NetErr::Config { key, .. } if key == "otype"));
        }
    }

    fn linear(
        config: &NetworkConfig,
        pool: &Arc<WorkspacePool>,
    ) -> Result<Box<dyn Network<f32>>> {
        DenseNetwork::<f32, GemmMlp>::create(config, pool)
    }

    #[test]
    fn custom_constructors() {
        let mut registry = NetworkRegistry::<f32>::new(Arc::new(WorkspacePool::new()));
        assert!(!registry.contains("CutlassMLP"));

        registry.register("Linear", linear);
        let net = registry
            .create(&json!({
                "otype": "linear",
                "n_input_dims": 2,
                "n_output_dims": 1,
                "n_hidden_layers": 0,
            }))
            .unwrap();
        assert_eq!(net.layer_sizes(), vec![(1, 2)]);
    }
}
