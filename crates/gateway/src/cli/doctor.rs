use sa_domain::config::{Config, ConfigSeverity};

/// Run all diagnostic checks and print a summary. Returns `Ok(true)` when
/// every check passes.
pub async fn run(config: &Config, config_path: &str) -> anyhow::Result<bool> {
    println!("serialagent doctor");
    println!("==================\n");

    let mut all_passed = true;

    check_config_file(config_path, &mut all_passed);
    check_config_validation(config, &mut all_passed);
    check_mcp_commands(config, &mut all_passed);
    check_store_path(&mut all_passed);

    println!();
    if all_passed {
        println!("All checks passed.");
    } else {
        println!("Some checks failed. Review the output above.");
    }

    Ok(all_passed)
}

fn check_config_file(config_path: &str, all_passed: &mut bool) {
    let exists = std::path::Path::new(config_path).exists();
    print_check(
        "Config file exists",
        exists,
        if exists {
            config_path.to_owned()
        } else {
            format!("{config_path} not found (using defaults)")
        },
    );
    if !exists {
        *all_passed = false;
    }
}

fn check_config_validation(config: &Config, all_passed: &mut bool) {
    let issues = config.validate();
    let error_count = issues.iter().filter(|e| e.severity == ConfigSeverity::Error).count();

    if issues.is_empty() {
        print_check("Config validation", true, "no issues".into());
    } else {
        print_check("Config validation", error_count == 0, format!("{} issue(s) ({error_count} error(s))", issues.len()));
        for issue in &issues {
            println!("      {issue}");
        }
        if error_count > 0 {
            *all_passed = false;
        }
    }
}

/// Probe that each declared MCP server's command exists on `PATH` (or is an
/// absolute/relative path that exists), without spawning it.
fn check_mcp_commands(config: &Config, all_passed: &mut bool) {
    if config.mcp.servers.is_empty() {
        print_check("MCP servers reachable", true, "none configured".into());
        return;
    }

    let mut missing = Vec::new();
    for server in &config.mcp.servers {
        if !command_exists(&server.command) {
            missing.push(server.name.clone());
        }
    }

    let ok = missing.is_empty();
    print_check(
        "MCP servers reachable",
        ok,
        if ok {
            format!("{} command(s) found", config.mcp.servers.len())
        } else {
            format!("command not found for: {}", missing.join(", "))
        },
    );
    if !ok {
        *all_passed = false;
    }
}

fn command_exists(command: &str) -> bool {
    let path = std::path::Path::new(command);
    if path.is_absolute() || command.contains('/') {
        return path.exists();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(command).exists()))
        .unwrap_or(false)
}

fn check_store_path(all_passed: &mut bool) {
    let path = std::env::var("SA_DB_PATH").unwrap_or_else(|_| "agent.db".into());
    let dir = std::path::Path::new(&path).parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));

    let probe = dir.join(".serialagent_doctor_probe");
    let writable = std::fs::write(&probe, b"probe").is_ok();
    let _ = std::fs::remove_file(&probe);

    print_check(
        "Durable store path writable",
        writable,
        if writable {
            format!("{path} (directory writable)")
        } else {
            format!("{path} (directory not writable)")
        },
    );
    if !writable {
        *all_passed = false;
    }
}

fn print_check(name: &str, passed: bool, detail: String) {
    let status = if passed { "PASS" } else { "FAIL" };
    println!("  [{status}] {name}: {detail}");
}
