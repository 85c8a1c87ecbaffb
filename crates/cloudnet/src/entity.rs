//! Replicated configuration entities.
//!
//! Each entity has two encodings: camelCase JSON for the files on disk, and a
//! cloudpack map for the wire. Both tolerate unknown fields and default the
//! optional ones.

use std::collections::HashMap;

use cloudpack::Pack;
use cloudpack::Unpack;
use cloudrpc::HandlerBuilder;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// A configuration record replicated across the cluster.
pub trait Entity: Serialize + DeserializeOwned + Pack + Unpack + Clone + Send + Sync + 'static {
    /// RPC type name of the entity; the provider is `<NAME>Provider`.
    const NAME: &'static str;
    /// Sync key, as in `add_<SYNC_KEY>`.
    const SYNC_KEY: &'static str;
    /// Array field of the legacy single-file layout.
    const LEGACY_FIELD: &'static str;

    /// Cluster-unique identity.
    fn name(&self) -> &str;

    /// Getters exposed for chained calls.
    fn accessors(builder: HandlerBuilder<Self>) -> HandlerBuilder<Self>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTemplate {
    pub prefix: String,
    pub name: String,
    pub storage: String,
    #[serde(default)]
    pub always_copy_to_static_services: bool,
}

cloudpack::record!(ServiceTemplate { prefix, name, storage; always_copy_to_static_services });

impl ServiceTemplate {
    pub fn new(prefix: impl Into<String>, name: impl Into<String>, storage: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            name: name.into(),
            storage: storage.into(),
            always_copy_to_static_services: false,
        }
    }
}

impl std::fmt::Display for ServiceTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}/{}", self.storage, self.prefix, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupConfiguration {
    pub name: String,
    #[serde(default)]
    pub jvm_options: Vec<String>,
    #[serde(default)]
    pub process_parameters: Vec<String>,
    #[serde(default)]
    pub target_environments: Vec<String>,
    #[serde(default)]
    pub templates: Vec<ServiceTemplate>,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

cloudpack::record!(GroupConfiguration {
    name;
    jvm_options, process_parameters, target_environments, templates, properties
});

impl GroupConfiguration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            jvm_options: Vec::new(),
            process_parameters: Vec::new(),
            target_environments: Vec::new(),
            templates: Vec::new(),
            properties: HashMap::new(),
        }
    }

    pub fn with_template(mut self, template: ServiceTemplate) -> Self {
        self.templates.push(template);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

impl Entity for GroupConfiguration {
    const NAME: &'static str = "GroupConfiguration";
    const SYNC_KEY: &'static str = "group_configuration";
    const LEGACY_FIELD: &'static str = "groups";

    fn name(&self) -> &str {
        &self.name
    }

    fn accessors(builder: HandlerBuilder<Self>) -> HandlerBuilder<Self> {
        builder
            .method("getName", 0, |this, _| Ok(this.name.clone()))
            .method("getJvmOptions", 0, |this, _| Ok(this.jvm_options.clone()))
            .method("getProcessParameters", 0, |this, _| Ok(this.process_parameters.clone()))
            .method("getTargetEnvironments", 0, |this, _| Ok(this.target_environments.clone()))
            .method("getTemplates", 0, |this, _| Ok(this.templates.clone()))
            .method("getProperty", 1, |this, args| {
                let key: String = args.next()?;
                Ok(this.properties.get(&key).cloned())
            })
    }
}

/// A permanent task: the recipe the node uses to keep services of one kind
/// running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTask {
    pub name: String,
    pub runtime: String,
    #[serde(default)]
    pub maintenance: bool,
    #[serde(default)]
    pub auto_delete_on_stop: bool,
    #[serde(default)]
    pub static_services: bool,
    #[serde(default)]
    pub minimum_service_count: i32,
    #[serde(default)]
    pub starting_port: i32,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub associated_nodes: Vec<String>,
    #[serde(default)]
    pub templates: Vec<ServiceTemplate>,
    #[serde(default)]
    pub jvm_options: Vec<String>,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

cloudpack::record!(ServiceTask {
    name, runtime;
    maintenance, auto_delete_on_stop, static_services, minimum_service_count, starting_port,
    groups, associated_nodes, templates, jvm_options, properties
});

impl ServiceTask {
    pub fn new(name: impl Into<String>, runtime: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            runtime: runtime.into(),
            maintenance: false,
            auto_delete_on_stop: true,
            static_services: false,
            minimum_service_count: 0,
            starting_port: 44955,
            groups: Vec::new(),
            associated_nodes: Vec::new(),
            templates: Vec::new(),
            jvm_options: Vec::new(),
            properties: HashMap::new(),
        }
    }

    pub fn with_groups(mut self, groups: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_minimum_service_count(mut self, count: i32) -> Self {
        self.minimum_service_count = count;
        self
    }
}

impl Entity for ServiceTask {
    const NAME: &'static str = "ServiceTask";
    const SYNC_KEY: &'static str = "service_task";
    const LEGACY_FIELD: &'static str = "tasks";

    fn name(&self) -> &str {
        &self.name
    }

    fn accessors(builder: HandlerBuilder<Self>) -> HandlerBuilder<Self> {
        builder
            .method("getName", 0, |this, _| Ok(this.name.clone()))
            .method("getRuntime", 0, |this, _| Ok(this.runtime.clone()))
            .method("isMaintenance", 0, |this, _| Ok(this.maintenance))
            .method("getMinServiceCount", 0, |this, _| Ok(this.minimum_service_count))
            .method("getStartPort", 0, |this, _| Ok(this.starting_port))
            .method("getGroups", 0, |this, _| Ok(this.groups.clone()))
            .method("getAssociatedNodes", 0, |this, _| Ok(this.associated_nodes.clone()))
            .method("getTemplates", 0, |this, _| Ok(this.templates.clone()))
            .method("getProperty", 1, |this, args| {
                let key: String = args.next()?;
                Ok(this.properties.get(&key).cloned())
            })
    }
}
