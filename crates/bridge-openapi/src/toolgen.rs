//! Operation → MCP tool generation.
//!
//! Only same-document (`#/...`) `$ref`s are resolved; an operation that
//! depends on an external document fails generation and is skipped by the
//! caller with a warning.

use crate::catalog::{LoadedSpec, OperationDescriptor, OperationRef};
use crate::error::{CatalogError, Result};
use openapiv3::{Parameter, ParameterSchemaOrContent, ReferenceOr, RequestBody, Schema};
use regex::Regex;
use reqwest::Method;
use rmcp::model::{JsonObject, Tool};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use unrelated_bridge_http::outbound::{ParamLocation, PlannedParam, RequestPlan};
use unrelated_bridge_http::semantics::annotations_for_method;

/// A tool generated from one exposed operation: the MCP-facing definition
/// plus the request plan used to execute calls.
#[derive(Debug, Clone)]
pub struct GeneratedTool {
    pub name: String,
    pub descriptor: OperationDescriptor,
    pub description: Option<String>,
    pub input_schema: Value,
    pub plan: RequestPlan,
}

impl GeneratedTool {
    /// Render the MCP `Tool` definition for `tools/list`.
    #[must_use]
    pub fn to_tool(&self) -> Tool {
        let schema_obj = self
            .input_schema
            .as_object()
            .cloned()
            .unwrap_or_else(JsonObject::new);
        let mut tool = Tool::new(
            self.name.clone(),
            self.description.clone().unwrap_or_default(),
            Arc::new(schema_obj),
        );
        tool.annotations = Some(annotations_for_method(&self.plan.method));
        tool
    }
}

struct GeneratedParam {
    plan: PlannedParam,
    schema: Value,
}

/// Generates tools for exposed operations, keeping names unique across the
/// whole catalog.
pub struct ToolGenerator<'a> {
    json: &'a Value,
    names: HashSet<String>,
}

impl<'a> ToolGenerator<'a> {
    #[must_use]
    pub fn new(spec: &'a LoadedSpec) -> Self {
        Self {
            json: spec.json(),
            names: HashSet::new(),
        }
    }

    /// Generate the tool for one operation.
    ///
    /// # Errors
    ///
    /// Returns an error for unresolvable `$ref`s, argument-name collisions,
    /// or HTTP methods reqwest cannot represent.
    pub fn generate(&mut self, op: &OperationRef<'_>) -> Result<GeneratedTool> {
        let descriptor = op.descriptor.clone();
        let method: Method = descriptor.method.parse().map_err(|_| {
            CatalogError::OpenApi(format!("Unsupported HTTP method: {}", descriptor.method))
        })?;

        let mut params: Vec<GeneratedParam> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for param_ref in merge_parameter_refs(op) {
            let param: Parameter = self.resolve_local(param_ref)?;
            let Some(generated) = self.extract_parameter(&descriptor, &param)? else {
                continue;
            };
            if !seen.insert(generated.plan.tool_name.clone()) {
                return Err(CatalogError::OpenApi(format!(
                    "Parameter '{}' appears multiple times in {descriptor}",
                    generated.plan.tool_name
                )));
            }
            params.push(generated);
        }

        if let Some(body_ref) = &op.operation.request_body {
            let body: RequestBody = self.resolve_local(body_ref)?;
            for generated in self.extract_body_params(&descriptor, &body, &seen)? {
                seen.insert(generated.plan.tool_name.clone());
                params.push(generated);
            }
        }

        let base_name = descriptor
            .operation_id
            .clone()
            .unwrap_or_else(|| canonical_tool_name(&descriptor.method, &descriptor.path));
        let name = reserve_unique_name(&mut self.names, &base_name);

        let description = op
            .operation
            .summary
            .clone()
            .or_else(|| op.operation.description.clone())
            .or_else(|| Some(format!("Calls {descriptor}")));

        let input_schema = build_input_schema(&params);
        let plan = RequestPlan {
            method,
            path: descriptor.path.clone(),
            params: params.into_iter().map(|p| p.plan).collect(),
        };

        Ok(GeneratedTool {
            name,
            descriptor,
            description,
            input_schema,
            plan,
        })
    }

    fn extract_parameter(
        &self,
        descriptor: &OperationDescriptor,
        param: &Parameter,
    ) -> Result<Option<GeneratedParam>> {
        let (data, location) = match param {
            Parameter::Path { parameter_data, .. } => (parameter_data, ParamLocation::Path),
            Parameter::Query { parameter_data, .. } => (parameter_data, ParamLocation::Query),
            Parameter::Header { parameter_data, .. } => (parameter_data, ParamLocation::Header),
            Parameter::Cookie { parameter_data, .. } => {
                tracing::warn!(
                    operation = %descriptor,
                    parameter = %parameter_data.name,
                    "cookie parameters are not supported; skipping"
                );
                return Ok(None);
            }
        };

        let mut schema = match &data.format {
            ParameterSchemaOrContent::Schema(schema_ref) => {
                let resolved: Schema = self.resolve_local(schema_ref)?;
                serde_json::to_value(&resolved)?
            }
            ParameterSchemaOrContent::Content(_) => json!({"type": "string"}),
        };
        if let Some(obj) = schema.as_object_mut()
            && !obj.contains_key("description")
            && let Some(desc) = &data.description
        {
            obj.insert("description".to_string(), Value::String(desc.clone()));
        }

        // Path parameters are always required.
        let required = matches!(location, ParamLocation::Path) || data.required;

        Ok(Some(GeneratedParam {
            plan: PlannedParam {
                tool_name: data.name.clone(),
                http_name: data.name.clone(),
                location,
                required,
                default: None,
            },
            schema,
        }))
    }

    fn extract_body_params(
        &self,
        descriptor: &OperationDescriptor,
        body: &RequestBody,
        existing: &HashSet<String>,
    ) -> Result<Vec<GeneratedParam>> {
        let Some(schema_ref) = body
            .content
            .get("application/json")
            .and_then(|c| c.schema.as_ref())
        else {
            return Ok(Vec::new());
        };

        let schema: Schema = self.resolve_local(schema_ref)?;
        let mut out = Vec::new();

        if let openapiv3::SchemaKind::Type(openapiv3::Type::Object(obj)) = &schema.schema_kind {
            for (prop_name, prop_schema) in &obj.properties {
                if existing.contains(prop_name) {
                    return Err(CatalogError::OpenApi(format!(
                        "Body parameter '{prop_name}' collides with a path/query/header parameter in {descriptor}"
                    )));
                }

                let schema_value = match prop_schema {
                    ReferenceOr::Item(s) => serde_json::to_value(s.as_ref())?,
                    // Keep nested refs as-is; clients can still follow them.
                    ReferenceOr::Reference { reference } => json!({"$ref": reference}),
                };

                out.push(GeneratedParam {
                    plan: PlannedParam {
                        tool_name: prop_name.clone(),
                        http_name: prop_name.clone(),
                        location: ParamLocation::Body,
                        required: body.required && obj.required.contains(prop_name),
                        default: None,
                    },
                    schema: schema_value,
                });
            }
        } else if !existing.contains("body") {
            // Non-object body: expose it as a single `body` argument.
            out.push(GeneratedParam {
                plan: PlannedParam {
                    tool_name: "body".to_string(),
                    http_name: "body".to_string(),
                    location: ParamLocation::Body,
                    required: body.required,
                    default: None,
                },
                schema: serde_json::to_value(&schema)?,
            });
        }

        Ok(out)
    }

    fn resolve_local<T: Clone + DeserializeOwned>(&self, r: &ReferenceOr<T>) -> Result<T> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut cur: ReferenceOr<T> = r.clone();

        loop {
            match cur {
                ReferenceOr::Item(item) => return Ok(item),
                ReferenceOr::Reference { reference } => {
                    let pointer = reference.strip_prefix('#').ok_or_else(|| {
                        CatalogError::OpenApi(format!(
                            "Unsupported non-local $ref '{reference}' (only '#/...' refs are resolved)"
                        ))
                    })?;
                    if !pointer.starts_with('/') {
                        return Err(CatalogError::OpenApi(format!(
                            "Unsupported $ref fragment (expected JSON pointer): {reference}"
                        )));
                    }
                    if !seen.insert(reference.clone()) {
                        return Err(CatalogError::OpenApi(format!(
                            "Cyclic $ref detected while resolving: {reference}"
                        )));
                    }

                    let value = self.json.pointer(pointer).ok_or_else(|| {
                        CatalogError::OpenApi(format!("Unresolved $ref '{reference}'"))
                    })?;
                    cur = serde_json::from_value(value.clone()).map_err(|e| {
                        CatalogError::OpenApi(format!(
                            "Failed to deserialize $ref target '{reference}': {e}"
                        ))
                    })?;
                }
            }
        }
    }
}

/// Merge path-item-level and operation-level parameters; the operation wins
/// when both declare the same reference or name.
fn merge_parameter_refs<'a>(op: &'a OperationRef<'_>) -> Vec<&'a ReferenceOr<Parameter>> {
    let mut out: Vec<&ReferenceOr<Parameter>> = op.operation.parameters.iter().collect();
    for item_param in op.path_item_params {
        let dup = match (item_param, &out) {
            (ReferenceOr::Item(p), existing) => existing.iter().any(|e| match e {
                ReferenceOr::Item(q) => {
                    q.parameter_data_ref().name == p.parameter_data_ref().name
                }
                ReferenceOr::Reference { .. } => false,
            }),
            (ReferenceOr::Reference { reference }, existing) => {
                existing.iter().any(|e| match e {
                    ReferenceOr::Reference { reference: other } => other == reference,
                    ReferenceOr::Item(_) => false,
                })
            }
        };
        if !dup {
            out.push(item_param);
        }
    }
    out
}

fn build_input_schema(params: &[GeneratedParam]) -> Value {
    let mut properties = serde_json::Map::new();
    let mut required: Vec<String> = Vec::new();

    for param in params {
        let mut prop = param.schema.clone();
        if let Some(default) = &param.plan.default {
            prop["default"] = default.clone();
        }
        properties.insert(param.plan.tool_name.clone(), prop);

        if param.plan.required && param.plan.default.is_none() {
            required.push(param.plan.tool_name.clone());
        }
    }

    let mut schema = json!({
        "type": "object",
        "properties": properties,
    });
    if !required.is_empty() {
        schema["required"] = json!(required);
    }
    schema
}

/// Canonical tool name for operations without an `operationId`.
fn canonical_tool_name(method: &str, path: &str) -> String {
    let mut name = format!("{}_{}", method.to_lowercase(), path);

    let braces = Regex::new(r"\{([^}]+)\}").unwrap();
    name = braces.replace_all(&name, "_$1").to_string();

    let non_alnum = Regex::new(r"[^a-zA-Z0-9]+").unwrap();
    name = non_alnum.replace_all(&name, "_").to_string();

    name = name.trim_matches('_').to_string();
    if name.len() > 64 {
        name.truncate(64);
    }
    name
}

fn reserve_unique_name(names: &mut HashSet<String>, base: &str) -> String {
    if names.insert(base.to_string()) {
        return base.to_string();
    }
    let mut counter = 1;
    loop {
        let candidate = format!("{base}_{counter}");
        if names.insert(candidate.clone()) {
            return candidate;
        }
        counter += 1;
    }
}
