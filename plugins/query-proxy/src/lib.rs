//! Query Proxy Extension
//!
//! Registers an external query service that runs as a subprocess. The engine
//! owns spawning and the stdin/stdout exchange; this module only declares the
//! endpoint and the tools it serves. Registration needs the `proxy:spawn`
//! scope.
//!
//! Tools provided:
//! - query_records: Run a read-only query against the external data service
//! - list_collections: List the collections the service can query

use sdk::{
    AuthContext, EngineError, ExtensionModule, ProxyEndpoint, Registrar, ToolDescriptor,
    SCOPE_PROXY_SPAWN,
};
use serde_json::json;

pub const MODULE_NAME: &str = "query-proxy";

pub const QUERY_TOOL: &str = "query_records";
pub const LIST_TOOL: &str = "list_collections";

/// Extension module declaring the subprocess query endpoint
#[derive(Debug, Clone)]
pub struct QueryProxyModule {
    command: String,
    args: Vec<String>,
}

impl QueryProxyModule {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    fn endpoint(&self) -> ProxyEndpoint {
        ProxyEndpoint {
            name: MODULE_NAME.to_string(),
            command: self.command.clone(),
            args: self.args.clone(),
            tools: vec![
                ToolDescriptor::external(
                    QUERY_TOOL,
                    "Run a read-only query against the external data service and return matching records.",
                    json!({
                        "type": "object",
                        "properties": {
                            "collection": {
                                "type": "string",
                                "description": "Collection to query"
                            },
                            "filter": {
                                "type": "string",
                                "description": "Filter expression understood by the service"
                            },
                            "limit": {
                                "type": "integer",
                                "description": "Maximum number of records",
                                "minimum": 1,
                                "maximum": 100
                            }
                        },
                        "required": ["collection"]
                    }),
                ),
                ToolDescriptor::external(
                    LIST_TOOL,
                    "List the collections available in the external data service.",
                    json!({ "type": "object", "properties": {} }),
                ),
            ],
        }
    }
}

impl ExtensionModule for QueryProxyModule {
    fn name(&self) -> &str {
        MODULE_NAME
    }

    fn register(&self, registrar: &mut dyn Registrar, auth: &AuthContext) -> Result<(), EngineError> {
        auth.require(MODULE_NAME, SCOPE_PROXY_SPAWN)?;

        tracing::debug!(command = %self.command, "Registering query proxy endpoint");
        registrar.register_proxy(self.endpoint())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::{PromptTemplate, ToolHandler};
    use std::sync::Arc;

    #[derive(Default)]
    struct Recorder {
        proxies: Vec<ProxyEndpoint>,
    }

    impl Registrar for Recorder {
        fn register_tool(
            &mut self,
            _descriptor: ToolDescriptor,
            _handler: Option<Arc<dyn ToolHandler>>,
        ) -> Result<(), EngineError> {
            Ok(())
        }

        fn register_prompt(&mut self, _template: PromptTemplate) -> Result<(), EngineError> {
            Ok(())
        }

        fn register_proxy(&mut self, endpoint: ProxyEndpoint) -> Result<(), EngineError> {
            self.proxies.push(endpoint);
            Ok(())
        }
    }

    #[test]
    fn test_registers_endpoint_with_scope() {
        let module = QueryProxyModule::new("/usr/bin/qp", vec!["--readonly".to_string()]);
        let mut recorder = Recorder::default();
        let auth = AuthContext::new("test", [SCOPE_PROXY_SPAWN]);
        module.register(&mut recorder, &auth).unwrap();

        assert_eq!(recorder.proxies.len(), 1);
        let endpoint = &recorder.proxies[0];
        assert_eq!(endpoint.args, vec!["--readonly"]);
        let names: Vec<&str> = endpoint.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec![QUERY_TOOL, LIST_TOOL]);
    }

    #[test]
    fn test_denied_without_scope() {
        let module = QueryProxyModule::new("/usr/bin/qp", vec![]);
        let mut recorder = Recorder::default();
        let auth = AuthContext::new("test", Vec::<String>::new());
        assert!(matches!(
            module.register(&mut recorder, &auth),
            Err(EngineError::RegistrationDenied { .. })
        ));
        assert!(recorder.proxies.is_empty());
    }
}
