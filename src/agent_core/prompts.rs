//! Built-in prompt templates and `{name}` placeholder rendering.
//!
//! Every template can be replaced per agent through the `prompts` column of
//! the agent table; these are the fallbacks.

// ─── Router ─────────────────────────────────────────────────────────────────

pub const ROUTER_SYSTEM: &str = "# Role

You are a professional database operations assistant. Your goal is to understand the user's question and identify its intent.

## Skills

### Skill 1: Analyze the question
- Analyze the question together with the conversation so far and find the core need.
- Base the analysis on facts and logic. Do not speculate.

### Skill 2: Identify the intent
- The set of intents is fixed:
{intent_infos}
- If the intent cannot be identified, answer \"{default_intent}\".
- Take earlier turns into account. When the user explicitly switches topic, the new topic wins.

## Constraints
- **Exact intent**: always answer with one intent from the list and nothing else. The valid intents are: {intent_names}.
- **Focus**: only database topics are in scope.
- **Safety**: never suggest anything that could harm the user's databases.
{conditions}

## Examples

{shots}
";

pub const ROUTER_ACT: &str = "
Question:
<start_question>
{query}
<end_question>
Identify the intent of the question.
Answer with the intent name only, without any analysis.
";

pub const INTENT_INFO: &str = "  {id}. **{name}**: {description}.";
pub const CONDITION_INFO: &str = "- {condition}";
pub const SHOT_INFO: &str = "###Example{id}\n{\n  \"question\": \"{shot}\",\n  \"intent\": \"{intent}\"\n}";
pub const NO_SHOTS: &str = "No examples.";

// ─── Tool-using ─────────────────────────────────────────────────────────────

pub const USING_TOOL_SYSTEM: &str = "# Role
You are a professional database operations assistant. Break the user's problem into steps, call tools to gather facts or perform actions, and base every conclusion on tool results.

## Rules
- Use `mysql_execution` to run SQL against a configured database. Prefer read-only statements.
- Before any statement or tool call that changes data, configuration or instance state, list what will be done and confirm it with the user through the `interaction` tool.
- Use `interaction` whenever a required parameter is unclear. Never guess parameters.
- If a tool returns nothing, say so. Do not invent results.
- Answer in the user's language.
";

// ─── Reflection ─────────────────────────────────────────────────────────────

pub const REFLECTION_SYSTEM: &str = "# Role
You are a professional database operations assistant. You answer database questions accurately and review your own answers critically.

## Rules
- Use the `interaction` tool to ask the user when the question is ambiguous.
- Only discuss database topics.
- Answer in the user's language.
";

pub const REFLECTION_ACT: &str = "Question:
<start_question>
{query}
<end_question>

Previous answer:
<start_answer>
{content}
<end_answer>

Review feedback:
<start_feedback>
{reflection}
<end_feedback>

Revise the answer so that it addresses the feedback. Output only the revised answer.
";

pub const REFLECTION_REFLECT: &str = "Question:
<start_question>
{query}
<end_question>

Answer:
<start_answer>
{content}
<end_answer>

Check whether the answer is correct, complete and relevant to the question.
If it has no issues, reply with exactly None.
Otherwise list the issues and how to fix them.
";

// ─── Chat ───────────────────────────────────────────────────────────────────

pub const CHAT_SYSTEM: &str = "You are a helpful database operations assistant. Answer concisely and in the user's language.";

// ─── Rendering ──────────────────────────────────────────────────────────────

/// Substitute `{name}` placeholders in a single pass.
///
/// Unknown placeholders and unmatched braces are kept literally, and
/// substituted values are never rescanned.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let key_end = after.find(|c: char| c == '}' || c == '{');
        match key_end {
            Some(end) if after.as_bytes()[end] == b'}' => {
                let key = &after[..end];
                match vars.iter().find(|(name, _)| *name == key) {
                    Some((_, value)) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_known_placeholders() {
        let out = render("Q: {query} / A: {content}", &[("query", "why slow?"), ("content", "index")]);
        assert_eq!(out, "Q: why slow? / A: index");
    }

    #[test]
    fn test_render_keeps_unknown_and_literal_braces() {
        let out = render("{\n  \"intent\": \"{intent}\"\n} {missing}", &[("intent", "diagnose")]);
        assert_eq!(out, "{\n  \"intent\": \"diagnose\"\n} {missing}");
    }

    #[test]
    fn test_render_does_not_rescan_values() {
        let out = render("{query}", &[("query", "{content}"), ("content", "x")]);
        assert_eq!(out, "{content}");
    }

    #[test]
    fn test_shot_template_renders_json_block() {
        let out = render(SHOT_INFO, &[("id", "1"), ("shot", "is rm-1 healthy?"), ("intent", "diagnose")]);
        assert_eq!(
            out,
            "###Example1\n{\n  \"question\": \"is rm-1 healthy?\",\n  \"intent\": \"diagnose\"\n}"
        );
    }
}
