use crate::utils::error::{Result, SynthError};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

fn listener_arn_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^arn:aws[a-z-]*:elasticloadbalancing:[a-z0-9-]+:\d{12}:listener/(app|net)/[A-Za-z0-9-]+/[0-9a-f]+/[0-9a-f]+$",
        )
        .expect("listener ARN pattern is valid")
    })
}

fn vpc_link_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z0-9]{6,10}$").expect("VPC link id pattern is valid"))
}

pub fn validate_listener_arn(field_name: &str, arn: &str) -> Result<()> {
    if !listener_arn_pattern().is_match(arn) {
        return Err(SynthError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: arn.to_string(),
            reason: "Expected an Application/Network Load Balancer listener ARN".to_string(),
        });
    }
    Ok(())
}

pub fn validate_vpc_link_id(field_name: &str, id: &str) -> Result<()> {
    if !vpc_link_id_pattern().is_match(id) {
        return Err(SynthError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: id.to_string(),
            reason: "Expected a VPC link id such as '65vcat'".to_string(),
        });
    }
    Ok(())
}

pub fn validate_path(field_name: &str, path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(SynthError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.to_string(),
            reason: "Path cannot be empty".to_string(),
        });
    }

    if path.contains('\0') {
        return Err(SynthError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.to_string(),
            reason: "Path contains null bytes".to_string(),
        });
    }

    // ALB 的 path-pattern 與健康檢查路徑都必須以 `/` 開頭
    if !path.starts_with('/') {
        return Err(SynthError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.to_string(),
            reason: "Path must start with '/'".to_string(),
        });
    }

    Ok(())
}

/// URL 路徑前綴，例如 `/api/books`
pub fn validate_path_prefix(field_name: &str, prefix: &str) -> Result<()> {
    if !prefix.starts_with('/') || prefix.ends_with('/') || prefix.contains('*') {
        return Err(SynthError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: prefix.to_string(),
            reason: "Path prefix must start with '/', must not end with '/' and must not contain wildcards"
                .to_string(),
        });
    }
    Ok(())
}

pub fn validate_non_empty_string(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(SynthError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: "Value cannot be empty or whitespace-only".to_string(),
        });
    }
    Ok(())
}

pub fn validate_range<T: PartialOrd + std::fmt::Display + Copy>(
    field_name: &str,
    value: T,
    min: T,
    max: T,
) -> Result<()> {
    if value < min || value > max {
        return Err(SynthError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be between {} and {}", min, max),
        });
    }
    Ok(())
}

/// 檢查同一個 listener 上的優先順序不重複
pub fn validate_unique_priorities<'a, I>(listener: &str, rules: I) -> Result<()>
where
    I: IntoIterator<Item = (&'a str, u32)>,
{
    let mut seen: HashMap<u32, &str> = HashMap::new();
    for (rule, priority) in rules {
        if let Some(existing) = seen.insert(priority, rule) {
            return Err(SynthError::DuplicatePriorityError {
                listener: listener.to_string(),
                priority,
                rule: rule.to_string(),
                existing: existing.to_string(),
            });
        }
    }
    Ok(())
}
