use st_domain::config::{Config, ConfigSeverity};

/// Validate the config and print a report.  Returns false when any issue
/// is an error; warnings alone still pass.
pub fn validate(config: &Config, config_path: &str) -> bool {
    let (report, ok) = report(config, config_path);
    print!("{report}");
    ok
}

/// Build the validation report text.
pub fn report(config: &Config, config_path: &str) -> (String, bool) {
    let issues = config.validate();
    let roster = format!(
        "{} member(s), circle max {}, proximity {:?}, persistence {}",
        config.identity.members.len(),
        config.walk.max_circle_size,
        config.walk.proximity,
        if config.persistence.enabled { "on" } else { "off" },
    );

    if issues.is_empty() {
        return (format!("Config OK ({config_path})\n{roster}\n"), true);
    }

    let errors = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();
    let mut out = String::new();
    for issue in &issues {
        out.push_str(&format!("{issue}\n"));
    }
    out.push_str(&format!(
        "\n{errors} error(s), {} warning(s) in {config_path}\n{roster}\n",
        issues.len() - errors,
    ));
    (out, errors == 0)
}

/// Dump the resolved config (with all defaults filled in) as TOML.
pub fn show(config: &Config) -> anyhow::Result<()> {
    let output = toml::to_string_pretty(config)
        .map_err(|e| anyhow::anyhow!("serializing config: {e}"))?;
    print!("{output}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_ok() {
        let (text, ok) = report(&Config::default(), "config.toml");
        assert!(ok);
        assert!(text.starts_with("Config OK"));
        assert!(text.contains("circle max 3"));
    }

    #[test]
    fn errors_fail_validation() {
        let mut cfg = Config::default();
        cfg.walk.max_circle_size = 0;
        let (text, ok) = report(&cfg, "config.toml");
        assert!(!ok);
        assert!(text.contains("walk.max_circle_size"), "{text}");
    }
}
