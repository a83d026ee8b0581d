use crate::utils::error::{Result, SynthError};
use std::collections::BTreeMap;

/// 既有 VPC link id 的 context key
pub const HTTP_VPC_LINK_KEY: &str = "httpVpcLink";
/// 既有 listener ARN 的 context key
pub const HTTP_API_LISTENER_KEY: &str = "httpApiListener";

/// 合成時傳入的 `key=value` 參數
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    values: BTreeMap<String, String>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// 解析 `key=value` 格式；值可以包含 `=`
    pub fn parse_pair(pair: &str) -> Result<(String, String)> {
        match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.trim().to_string()))
            }
            _ => Err(SynthError::InvalidConfigValueError {
                field: "context".to_string(),
                value: pair.to_string(),
                reason: "Context values must be given as key=value".to_string(),
            }),
        }
    }

    pub fn from_pairs<I, S>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut context = Self::new();
        for pair in pairs {
            let (key, value) = Self::parse_pair(pair.as_ref())?;
            context.set(key, value);
        }
        Ok(context)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn try_get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
