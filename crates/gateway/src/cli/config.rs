use sa_domain::config::{Config, ConfigSeverity};

/// Parse and validate the config, printing any issues. Returns `true` when
/// no `Error`-severity issue was found.
pub fn validate(config: &Config, config_path: &str) -> bool {
    let issues = config.validate();

    if issues.is_empty() {
        println!("Config OK ({config_path})");
        return true;
    }

    let error_count = issues.iter().filter(|e| e.severity == ConfigSeverity::Error).count();
    let warning_count = issues.len() - error_count;

    for issue in &issues {
        println!("{issue}");
    }

    println!("\n{error_count} error(s), {warning_count} warning(s) in {config_path}");

    error_count == 0
}

/// Print the resolved config as pretty TOML with secret-reference fields
/// redacted — `api_key_secret_ref`, `env_var`, and the raw `name` of every
/// declared secret are replaced, never their resolved values (which this
/// process may not even hold yet).
pub fn show(config: &Config) {
    let mut redacted = config.clone();
    for secret in &mut redacted.secrets.secrets {
        secret.env_var = "***".to_string();
    }
    if let Some(persona) = &mut redacted.persona {
        if persona.api_key_secret_ref.is_some() {
            persona.api_key_secret_ref = Some("***".to_string());
        }
    }

    match toml::to_string_pretty(&redacted) {
        Ok(output) => print!("{output}"),
        Err(e) => {
            eprintln!("Failed to serialize config: {e}");
            std::process::exit(1);
        }
    }
}
