//! Merging per-module OpenAPI fragments into one document.

use serde_json::{json, Value};

use libris_kernel::ModuleRegistry;

/// Build the service-wide OpenAPI document.
///
/// Each module contributes `paths` (relative to its mount point, prefixed here
/// with `/api/{module}`) and `components.schemas`. The shared `ErrorResponse`
/// schema and the `bearerAuth` scheme are defined once here.
pub fn merge_module_specs(registry: &ModuleRegistry) -> Value {
    let mut spec = base_document();

    for module in registry.modules() {
        let Some(fragment) = module.openapi() else {
            continue;
        };

        if let Some(paths) = fragment.get("paths").and_then(Value::as_object) {
            for (path, item) in paths {
                let prefixed = if path == "/" {
                    format!("/api/{}", module.name())
                } else {
                    format!("/api/{}{}", module.name(), path)
                };
                spec["paths"][prefixed] = item.clone();
            }
        }

        if let Some(schemas) = fragment
            .pointer("/components/schemas")
            .and_then(Value::as_object)
        {
            for (name, schema) in schemas {
                if spec["components"]["schemas"].get(name).is_some() {
                    tracing::warn!(module = module.name(), schema = %name, "schema redefined by module");
                }
                spec["components"]["schemas"][name] = schema.clone();
            }
        }
    }

    spec
}

fn base_document() -> Value {
    json!({
        "openapi": "3.1.0",
        "info": {
            "title": "Libris API",
            "version": env!("CARGO_PKG_VERSION"),
            "description": "Book catalog: listings, cover images, ratings and rankings"
        },
        "paths": {
            "/healthz": {
                "get": {
                    "summary": "Liveness probe",
                    "responses": {
                        "200": {
                            "description": "OK",
                            "content": { "text/plain": { "schema": { "type": "string" } } }
                        }
                    }
                }
            }
        },
        "components": {
            "securitySchemes": {
                "bearerAuth": { "type": "http", "scheme": "bearer", "bearerFormat": "JWT" }
            },
            "schemas": {
                "ErrorResponse": {
                    "type": "object",
                    "properties": {
                        "error": {
                            "type": "object",
                            "properties": {
                                "code": { "type": "string" },
                                "message": { "type": "string" },
                                "details": { "type": "array", "items": { "type": "object" } },
                                "trace_id": { "type": "string" },
                                "timestamp": { "type": "string", "format": "date-time" }
                            },
                            "required": ["code", "message", "details", "trace_id", "timestamp"]
                        }
                    },
                    "required": ["error"]
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct DocumentedModule;

    #[async_trait::async_trait]
    impl libris_kernel::Module for DocumentedModule {
        fn name(&self) -> &'static str {
            "shelves"
        }

        fn openapi(&self) -> Option<Value> {
            Some(json!({
                "paths": {
                    "/": { "get": { "summary": "List shelves" } },
                    "/{id}": { "get": { "summary": "Get shelf" } }
                },
                "components": { "schemas": { "Shelf": { "type": "object" } } }
            }))
        }
    }

    #[test]
    fn module_paths_are_prefixed_and_schemas_merged() {
        let mut registry = ModuleRegistry::new();
        registry.register(Arc::new(DocumentedModule)).unwrap();

        let spec = merge_module_specs(&registry);

        assert!(spec["paths"]["/healthz"].is_object());
        assert_eq!(spec["paths"]["/api/shelves"]["get"]["summary"], "List shelves");
        assert_eq!(spec["paths"]["/api/shelves/{id}"]["get"]["summary"], "Get shelf");
        assert!(spec["components"]["schemas"]["Shelf"].is_object());
        assert!(spec["components"]["schemas"]["ErrorResponse"].is_object());
    }

    #[test]
    fn empty_registry_still_documents_shared_parts() {
        let registry = ModuleRegistry::new();
        let spec = merge_module_specs(&registry);

        assert_eq!(spec["openapi"], "3.1.0");
        assert_eq!(spec["paths"].as_object().unwrap().len(), 1);
        assert_eq!(
            spec["components"]["securitySchemes"]["bearerAuth"]["scheme"],
            "bearer"
        );
    }
}
