use crate::error::BridgeError;
use crate::registry::{Tool, ToolRegistry};

/// Handle LoadTool: fetch a tool into the cache and render its input schema.
///
/// The first load of an id reports "newly loaded"; later loads report
/// "from cache".
pub fn handle_load(registry: &ToolRegistry, tool_id: &str) -> Result<String, BridgeError> {
    if tool_id.trim().is_empty() {
        return Err(BridgeError::InvalidArgument("toolId is required".into()));
    }
    let (tool, cached) = registry.load(tool_id)?;
    let status = if cached { "from cache" } else { "newly loaded" };
    Ok(render_tool(&tool, status))
}

fn render_tool(tool: &Tool, status: &str) -> String {
    let mut out = format!("**{}** ({}) [{status}]\n", tool.name, tool.id);
    if !tool.description.is_empty() {
        out.push_str(&format!("{}\n", tool.description));
    }
    out.push_str("\nParameters:\n");

    let required: Vec<&str> = tool.input_schema["required"]
        .as_array()
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    let properties = tool.input_schema["properties"].as_object();
    match properties {
        Some(props) if !props.is_empty() => {
            for (name, prop) in props {
                let json_type = prop
                    .get("type")
                    .and_then(|t| t.as_str())
                    .unwrap_or("string");
                let requirement = if required.contains(&name.as_str()) {
                    "required"
                } else {
                    "optional"
                };
                let mut line = format!("  - {name} ({json_type}, {requirement})");
                if let Some(desc) = prop.get("description").and_then(|d| d.as_str()) {
                    line.push_str(&format!(": {desc}"));
                }
                line.push('\n');
                out.push_str(&line);
            }
        }
        _ => out.push_str("  (none)\n"),
    }
    out
}
