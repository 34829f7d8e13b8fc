//! Startup discovery pass
//!
//! The set of extension modules is known at compile time. Configuration only
//! selects which of them take part; `discover` then invokes each selected
//! module's registration entry point exactly once and freezes the result.

use super::builtin::{CoreModule, CORE_MODULE};
use super::{Catalog, RegistryBuilder};
use crate::config::ExtensionsConfig;
use sdk::errors::EngineError;
use sdk::registrar::{AuthContext, ExtensionModule, SCOPE_EXTERNAL_TOOLS, SCOPE_PROXY_SPAWN};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Principal extension modules register under
pub const ENGINE_PRINCIPAL: &str = "parley-engine";

/// Run every module's registration and freeze the catalog
///
/// Duplicate module names, name collisions and malformed descriptors abort
/// discovery. Discovery order does not affect the resulting catalog.
pub fn discover(
    modules: &[Arc<dyn ExtensionModule>],
    auth: &AuthContext,
) -> Result<Catalog, EngineError> {
    let mut seen = HashSet::new();
    let mut builder = RegistryBuilder::new(auth.clone());

    for module in modules {
        let name = module.name();
        if !seen.insert(name.to_string()) {
            return Err(EngineError::DuplicateModule(name.to_string()));
        }

        builder.begin_module(name);
        module.register(&mut builder, auth)?;
        info!(module = %name, "Extension module registered");
    }

    let catalog = builder.freeze()?;
    info!(
        modules = modules.len(),
        tools = catalog.tools().count(),
        prompts = catalog.prompts().count(),
        "Catalog frozen"
    );
    Ok(catalog)
}

/// Scopes granted to extension modules
pub fn auth_from_config(config: &ExtensionsConfig) -> AuthContext {
    let mut scopes = vec![SCOPE_EXTERNAL_TOOLS];
    if config.allow_proxy {
        scopes.push(SCOPE_PROXY_SPAWN);
    }
    AuthContext::new(ENGINE_PRINCIPAL, scopes)
}

/// Build the module list: the built-in `core` module followed by every
/// enabled extension, in configuration order
pub fn modules_from_config(
    config: &ExtensionsConfig,
) -> Result<Vec<Arc<dyn ExtensionModule>>, EngineError> {
    let mut modules: Vec<Arc<dyn ExtensionModule>> = vec![Arc::new(CoreModule::new())];

    for name in &config.enabled {
        match name.as_str() {
            CORE_MODULE => {} // always present
            session_notes::MODULE_NAME => {
                modules.push(Arc::new(session_notes::SessionNotesModule::new()));
            }
            query_proxy::MODULE_NAME => match &config.query_proxy {
                Some(proxy) => modules.push(Arc::new(query_proxy::QueryProxyModule::new(
                    proxy.command.clone(),
                    proxy.args.clone(),
                ))),
                None => warn!(
                    module = %name,
                    "Module enabled without [extensions.query_proxy] settings, skipping"
                ),
            },
            other => {
                return Err(EngineError::Config(format!(
                    "Unknown extension module '{}'",
                    other
                )))
            }
        }
    }

    Ok(modules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueryProxyConfig;
    use sdk::registrar::{PromptTemplate, Registrar};

    struct PromptOnly(&'static str, &'static str);

    impl ExtensionModule for PromptOnly {
        fn name(&self) -> &str {
            self.0
        }

        fn register(
            &self,
            registrar: &mut dyn Registrar,
            _auth: &AuthContext,
        ) -> Result<(), EngineError> {
            registrar.register_prompt(PromptTemplate::new(self.1, "text"))
        }
    }

    #[test]
    fn test_duplicate_module_is_fatal() {
        let modules: Vec<Arc<dyn ExtensionModule>> = vec![
            Arc::new(PromptOnly("alpha", "a")),
            Arc::new(PromptOnly("alpha", "b")),
        ];
        let auth = AuthContext::new("test", Vec::<String>::new());
        assert!(matches!(
            discover(&modules, &auth),
            Err(EngineError::DuplicateModule(_))
        ));
    }

    #[test]
    fn test_order_does_not_change_catalog() {
        let auth = AuthContext::new("test", Vec::<String>::new());
        let forward: Vec<Arc<dyn ExtensionModule>> = vec![
            Arc::new(PromptOnly("alpha", "a")),
            Arc::new(PromptOnly("beta", "b")),
        ];
        let backward: Vec<Arc<dyn ExtensionModule>> = forward.iter().rev().cloned().collect();

        let a = discover(&forward, &auth).unwrap();
        let b = discover(&backward, &auth).unwrap();
        let names = |c: &Catalog| {
            c.prompts()
                .map(|p| (p.template.name.clone(), p.module.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(names(&a), names(&b));
    }

    #[test]
    fn test_default_config_modules() {
        let config = ExtensionsConfig::default();
        let modules = modules_from_config(&config).unwrap();
        let names: Vec<&str> = modules.iter().map(|m| m.name()).collect();
        // query-proxy is skipped without settings
        assert_eq!(names, vec![CORE_MODULE, session_notes::MODULE_NAME]);

        let catalog = discover(&modules, &auth_from_config(&config)).unwrap();
        assert!(catalog.tool("thread_note_save").is_some());
    }

    #[test]
    fn test_proxy_module_needs_allow_proxy() {
        let mut config = ExtensionsConfig {
            enabled: vec![query_proxy::MODULE_NAME.to_string()],
            allow_proxy: false,
            query_proxy: Some(QueryProxyConfig {
                command: "/usr/local/bin/query-proxy".to_string(),
                args: vec![],
            }),
        };
        let modules = modules_from_config(&config).unwrap();
        assert!(matches!(
            discover(&modules, &auth_from_config(&config)),
            Err(EngineError::RegistrationDenied { .. })
        ));

        config.allow_proxy = true;
        let catalog = discover(&modules, &auth_from_config(&config)).unwrap();
        assert!(catalog.tool(query_proxy::QUERY_TOOL).is_some());
    }

    #[test]
    fn test_unknown_module_rejected() {
        let config = ExtensionsConfig {
            enabled: vec!["screenshot".to_string()],
            ..ExtensionsConfig::default()
        };
        assert!(matches!(
            modules_from_config(&config),
            Err(EngineError::Config(_))
        ));
    }
}
