//! Deterministic system prompt assembly (§4.12). Pure function of the
//! active config, the resolved messaging targets, and whatever memory
//! context the caller supplies — identical inputs always produce an
//! identical string.

use sa_domain::config::{Config, MessagingTarget};

/// Build the full system prompt for a turn. `memory_context` is an
/// already-rendered block of retrieved memory (may be empty).
pub fn build_system_prompt(config: &Config, targets: &[MessagingTarget], memory_context: &str) -> String {
    let mut sections: Vec<String> = Vec::new();

    sections.push(persona_text(config));

    if let Some(role) = config.instructions.role.as_deref().filter(|r| !r.is_empty()) {
        sections.push(format!("## Operational Role\n{role}"));
    }

    let workflow_bullets: Vec<String> = config
        .instructions
        .workflow
        .iter()
        .filter(|s| !s.trigger.is_empty() && !s.action.is_empty())
        .map(|s| format!("- When {}: → {}", s.trigger, s.action))
        .collect();
    if !workflow_bullets.is_empty() {
        sections.push(format!("## Workflow\n{}", workflow_bullets.join("\n")));
    }

    let context_section = build_context_section(config);
    if let Some(context_section) = context_section {
        sections.push(context_section);
    }

    if !targets.is_empty() {
        let lines: Vec<String> = targets
            .iter()
            .map(|t| format!("- {} → {}", t.alias, t.room_id))
            .collect();
        sections.push(format!("## Messaging Targets\n{}", lines.join("\n")));
    }

    if !memory_context.trim().is_empty() {
        sections.push(format!("## Memory Context\n{}", memory_context.trim()));
    }

    sections.join("\n\n")
}

fn persona_text(config: &Config) -> String {
    match &config.persona {
        Some(persona) if !persona.system_prompt.trim().is_empty() => {
            persona.system_prompt.trim().to_string()
        }
        _ => {
            let description = config.metadata.description.as_deref().unwrap_or("an autonomous agent");
            format!("You are {}. {}", config.metadata.name, description)
        }
    }
}

fn build_context_section(config: &Config) -> Option<String> {
    let mut body = String::new();

    if let Some(user) = config.instructions.context.user.as_deref().filter(|u| !u.is_empty()) {
        body.push_str("### User\n");
        body.push_str(user);
    }

    if !config.instructions.context.peers.is_empty() {
        if !body.is_empty() {
            body.push_str("\n\n");
        }
        body.push_str("### Peer Agents\n");
        let lines: Vec<String> = config
            .instructions
            .context
            .peers
            .iter()
            .map(|p| match &p.role {
                Some(role) if !role.is_empty() => format!("- **{}**: {}", p.name, role),
                _ => format!("- **{}**", p.name),
            })
            .collect();
        body.push_str(&lines.join("\n"));
    }

    if body.is_empty() {
        None
    } else {
        Some(format!("## Context\n{body}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_domain::config::{InstructionsConfig, InstructionsContext, PeerAgent, PersonaConfig, WorkflowStep};

    fn base_config() -> Config {
        Config {
            persona: Some(PersonaConfig {
                system_prompt: "You are Kairo, a portfolio analyst.".into(),
                provider_id: "openai".into(),
                model_id: "gpt-4o".into(),
                temperature: 0.7,
                api_key_secret_ref: None,
            }),
            ..Config::default()
        }
    }

    #[test]
    fn deterministic_across_identical_inputs() {
        let config = base_config();
        let a = build_system_prompt(&config, &[], "");
        let b = build_system_prompt(&config, &[], "");
        assert_eq!(a, b);
    }

    #[test]
    fn falls_back_when_no_persona() {
        let mut config = Config::default();
        config.metadata.name = "kumo".into();
        config.metadata.description = Some("A news-enrichment agent.".into());
        config.persona = None;
        let prompt = build_system_prompt(&config, &[], "");
        assert_eq!(prompt, "You are kumo. A news-enrichment agent.");
    }

    #[test]
    fn assembles_full_sections_in_order() {
        let mut config = base_config();
        config.instructions = InstructionsConfig {
            role: Some("Analyze the portfolio and coordinate with Kumo.".into()),
            workflow: vec![WorkflowStep {
                trigger: "a scheduler trigger arrives".into(),
                action: "fetch metrics and request news".into(),
            }],
            context: InstructionsContext {
                user: Some("Prefers concise reports.".into()),
                peers: vec![PeerAgent {
                    name: "kumo".into(),
                    role: Some("news enrichment".into()),
                }],
            },
        };
        let targets = vec![MessagingTarget {
            alias: "kumo".into(),
            room_id: "!kumo:example.com".into(),
        }];

        let prompt = build_system_prompt(&config, &targets, "last cycle: AAPL +1.2%");

        assert!(prompt.starts_with("You are Kairo, a portfolio analyst."));
        assert!(prompt.contains("## Operational Role\nAnalyze the portfolio"));
        assert!(prompt.contains("## Workflow\n- When a scheduler trigger arrives: → fetch metrics"));
        assert!(prompt.contains("### User\nPrefers concise reports."));
        assert!(prompt.contains("### Peer Agents\n- **kumo**: news enrichment"));
        assert!(prompt.contains("## Messaging Targets\n- kumo → !kumo:example.com"));
        assert!(prompt.contains("## Memory Context\nlast cycle: AAPL +1.2%"));
    }

    #[test]
    fn omits_empty_optional_sections() {
        let config = base_config();
        let prompt = build_system_prompt(&config, &[], "");
        assert!(!prompt.contains("## Operational Role"));
        assert!(!prompt.contains("## Workflow"));
        assert!(!prompt.contains("## Context"));
        assert!(!prompt.contains("## Messaging Targets"));
        assert!(!prompt.contains("## Memory Context"));
    }
}
