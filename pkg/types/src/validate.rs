use anyhow::{Result, bail};

/// Validate a Kubernetes-style object name.
/// Rules: lowercase `[a-z0-9-]`, max 63 chars, no leading/trailing hyphens.
///
/// Dots are rejected, which keeps names safe to join into a profile reference.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("name must not be empty");
    }
    if name.len() > 63 {
        bail!("name '{}' exceeds 63 characters (got {})", name, name.len());
    }
    if name.starts_with('-') || name.ends_with('-') {
        bail!("name '{}' must not start or end with a hyphen", name);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        bail!(
            "name '{}' must contain only lowercase letters, digits, and hyphens [a-z0-9-]",
            name
        );
    }
    Ok(())
}

/// Validate a label value: at most 63 chars of `[A-Za-z0-9_.-]`,
/// beginning and ending with an alphanumeric. Empty is allowed.
pub fn validate_label_value(value: &str) -> Result<()> {
    if value.is_empty() {
        return Ok(());
    }
    if value.len() > 63 {
        bail!("label value '{}' exceeds 63 characters", value);
    }
    let edge_ok = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
    if !edge_ok(value.chars().next()) || !edge_ok(value.chars().last()) {
        bail!(
            "label value '{}' must begin and end with an alphanumeric character",
            value
        );
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        bail!("label value '{}' contains invalid characters", value);
    }
    Ok(())
}

/// Validate a label key: an optional DNS prefix and a `/`, then a name of
/// at most 63 chars following the label-value character rules.
pub fn validate_label_key(key: &str) -> Result<()> {
    let name = match key.split_once('/') {
        Some((prefix, name)) => {
            if prefix.is_empty() || prefix.len() > 253 {
                bail!("label key '{}' has an invalid prefix", key);
            }
            if name.contains('/') {
                bail!("label key '{}' may contain at most one '/'", key);
            }
            name
        }
        None => key,
    };
    if name.is_empty() {
        bail!("label key '{}' has an empty name", key);
    }
    validate_label_value(name)
}
