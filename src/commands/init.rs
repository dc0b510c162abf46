//! `mydba init`: create the configuration tables and seed the default agents.

use crate::config::{AgentInfo, AgentMode, AgentRegistry, ConfigError, ConfigStore, PromptValue, ToolFilter};
use crate::tools::LOCAL_PROVIDER;

pub const ROUTER_AGENT: &str = "router";
pub const SQL_AGENT: &str = "sql_agent";
pub const DEFAULT_AGENT: &str = "default";

/// The agent set a fresh installation starts with: a main router, a SQL
/// agent limited to local tools, and a reflective default agent.
pub fn default_agents() -> Vec<AgentInfo> {
    let mut router = AgentInfo::new(ROUTER_AGENT, AgentMode::Router);
    router.is_main = true;

    let mut sql = AgentInfo::new(SQL_AGENT, AgentMode::UsingTool).with_intent(
        "database operations",
        "inspect or change a configured MySQL database by running SQL, e.g. slow queries, locks, table sizes, processlist, schema changes",
    );
    sql.tool_filter = ToolFilter::allow(&[LOCAL_PROVIDER]);
    sql.prompts.insert(
        "shot".into(),
        PromptValue::List(vec![
            "Which sessions are blocking others on database orders?".into(),
            "How big is each table in the billing database?".into(),
        ]),
    );
    sql.prompts.insert(
        "condition".into(),
        PromptValue::List(vec![
            "Questions that need live data from a configured database are database operations.".into(),
        ]),
    );

    let mut default = AgentInfo::new(DEFAULT_AGENT, AgentMode::Reflection).with_intent(
        "general question",
        "database concepts, best practices and anything that needs no live data",
    );
    default.is_default = true;

    vec![router, sql, default]
}

/// Seed the default agents, optionally clearing existing ones first.
///
/// Returns the number of agents configured afterwards. The resulting set is
/// validated so a broken configuration is reported here rather than at the
/// next start.
pub fn run(store: &ConfigStore, reset: bool) -> Result<usize, ConfigError> {
    if reset {
        let removed = store.clear_agents()?;
        tracing::info!(removed, "existing agents cleared");
    }
    for agent in default_agents() {
        store.upsert_agent(&agent)?;
    }
    let registry = AgentRegistry::new(store.load_agents()?)?;
    tracing::info!(
        agents = registry.len(),
        config_database = %store.path().display(),
        "agents initialized"
    );
    Ok(registry.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_agents_form_a_valid_registry() {
        let registry = AgentRegistry::new(default_agents()).unwrap();
        assert_eq!(registry.main_agent().name, ROUTER_AGENT);
        assert_eq!(registry.default_agent().name, DEFAULT_AGENT);
        let sql = registry.by_intent("database operations").unwrap();
        assert!(sql.tool_filter.permits(LOCAL_PROVIDER));
        assert!(!sql.tool_filter.permits("rds"));
    }

    #[test]
    fn test_init_is_idempotent_and_reset_clears_custom_agents() {
        let store = ConfigStore::open(":memory:").unwrap();
        assert_eq!(run(&store, false).unwrap(), 3);
        assert_eq!(run(&store, false).unwrap(), 3);

        let custom = AgentInfo::new("tuner", AgentMode::Chat).with_intent("tuning", "tune");
        store.upsert_agent(&custom).unwrap();
        assert_eq!(store.load_agents().unwrap().len(), 4);

        assert_eq!(run(&store, true).unwrap(), 3);
        assert!(store
            .load_agents()
            .unwrap()
            .iter()
            .all(|a| a.name != "tuner"));
    }
}
