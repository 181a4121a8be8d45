//! URI templates for parameterised resources.
//!
//! A template is a URI with named placeholders, e.g. `mcp://greeting/{name}`.
//! Each placeholder binds a non-empty run of characters that contains no
//! `/`; everything else must match literally.

use regex::Regex;
use serde_json::Value;

use crate::mcp::error::RegistryError;
use crate::mcp::types::Arguments;

/// A compiled URI template.
#[derive(Debug, Clone)]
pub struct UriTemplate {
    raw: String,
    pattern: Regex,
    placeholders: Vec<String>,
}

impl UriTemplate {
    /// Returns `true` if `key` uses template syntax.
    #[must_use]
    pub fn is_template(key: &str) -> bool {
        key.contains('{') || key.contains('}')
    }

    /// Compiles a template.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::InvalidTemplate` for unbalanced braces, empty
    /// or non-identifier placeholder names, duplicate names, or a template
    /// without any placeholder.
    pub fn parse(template: &str) -> Result<Self, RegistryError> {
        let invalid = |reason: &str| RegistryError::InvalidTemplate {
            template: template.to_string(),
            reason: reason.to_string(),
        };

        let mut regex = String::with_capacity(template.len() * 2);
        regex.push('^');
        let mut placeholders: Vec<String> = Vec::new();
        let mut chars = template.chars();

        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some('{') | None => return Err(invalid("unbalanced '{'")),
                            Some(ch) => name.push(ch),
                        }
                    }
                    if name.is_empty() {
                        return Err(invalid("empty placeholder name"));
                    }
                    if !name.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
                        return Err(invalid("placeholder names may only contain [A-Za-z0-9_]"));
                    }
                    if placeholders.contains(&name) {
                        return Err(invalid("duplicate placeholder name"));
                    }
                    placeholders.push(name);
                    regex.push_str("([^/]+)");
                }
                '}' => return Err(invalid("unbalanced '}'")),
                _ => regex.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
            }
        }
        regex.push('$');

        if placeholders.is_empty() {
            return Err(invalid("no placeholders"));
        }

        let pattern = Regex::new(&regex).map_err(|e| invalid(&e.to_string()))?;

        Ok(Self {
            raw: template.to_string(),
            pattern,
            placeholders,
        })
    }

    /// Returns the template as registered.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns the placeholder names in order of appearance.
    #[must_use]
    pub fn placeholders(&self) -> &[String] {
        &self.placeholders
    }

    /// Matches a concrete URI, returning the placeholder bindings.
    #[must_use]
    pub fn matches(&self, uri: &str) -> Option<Arguments> {
        let captures = self.pattern.captures(uri)?;
        let mut bindings = Arguments::new();
        for (index, name) in self.placeholders.iter().enumerate() {
            let value = captures.get(index + 1)?.as_str();
            bindings.insert(name.clone(), Value::String(value.to_string()));
        }
        Some(bindings)
    }
}
