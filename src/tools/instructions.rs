// Copyright 2026 The Toolbridge Project
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use super::ToolDefinition;

/// Opens the injected block. Also the de-dup marker.
pub const INSTRUCTIONS_START: &str = "===TOOLS-INSTRUCTIONS===";
pub const INSTRUCTIONS_END: &str = "===TOOLS-END===";

const SYSTEM_PROMPT: &str = "I have access to a set of tools which I can execute for you.
The tools are listed below.
To use a tool, reply with a short explanation of why you need it, then the tool call in this exact format:
```tool:tool_name({\"param1\": \"value1\"})```
Then stop and wait for my reply with the result before continuing.

Notes:
- The format must be exact, including the fences. Use empty parentheses for tools without parameters.
- Use the full tool name as listed (e.g. \"weather-get_forecast\").
- Do not try to run the tool yourself or write code for it.
- Only use tools listed below.
- At most one tool call per response.

# Available Tools:";

/// Render the full instructions block, separators included.
///
/// Tools are grouped by class; classes are sorted and each gets a
/// `## <CLASS> TOOLS` header.
pub fn render_instructions(definitions: &[ToolDefinition]) -> String {
    let mut classes: BTreeMap<&str, Vec<&ToolDefinition>> = BTreeMap::new();
    for def in definitions {
        classes.entry(def.class_name.as_str()).or_default().push(def);
    }

    let mut sections = vec![SYSTEM_PROMPT.to_string()];
    for (class_name, tools) in classes {
        sections.push(format!("## {} TOOLS", class_name.to_uppercase()));
        sections.extend(tools.into_iter().map(render_tool));
        sections.push(String::new());
    }

    format!("{INSTRUCTIONS_START}{}{INSTRUCTIONS_END}", sections.join("\n\n"))
}

fn render_tool(tool: &ToolDefinition) -> String {
    let mut out = format!("### {}\n{}", tool.name, tool.description);
    if !tool.parameters.is_empty() {
        out.push_str("\nPARAMS:");
        for param in &tool.parameters {
            out.push_str(&format!("\n\t* \"{}\" : {}", param.name, param.description));
            if param.required {
                out.push_str(" (required)");
            }
        }
    }
    out.push('\n');
    out
}
