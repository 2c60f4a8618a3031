use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Shell command with `{name}` placeholders, rendered once per task.
///
/// Placeholders without a binding are left untouched so that shell constructs
/// like `${HOME}` or awk blocks survive rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandTemplate(String);

impl CommandTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        CommandTemplate(template.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn render(&self, bindings: &TemplateBindings) -> String {
        let template = self.0.as_str();
        let mut rendered = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            rendered.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}') {
                Some(close) if is_placeholder_name(&after[..close]) => {
                    let name = &after[..close];
                    match bindings.get(name) {
                        Some(value) => rendered.push_str(value),
                        None => {
                            rendered.push('{');
                            rendered.push_str(name);
                            rendered.push('}');
                        }
                    }
                    rest = &after[close + 1..];
                }
                _ => {
                    rendered.push('{');
                    rest = after;
                }
            }
        }
        rendered.push_str(rest);
        rendered
    }
}

impl fmt::Display for CommandTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Placeholder values for one task.
#[derive(Debug, Clone, Default)]
pub struct TemplateBindings {
    values: HashMap<&'static str, String>,
}

impl TemplateBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.values.insert(name, value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_known_placeholders() {
        let template = CommandTemplate::new("bowtie -p {cores} {reference} {reads} > {output}");
        let bindings = TemplateBindings::new().set("cores", "4").set("reference", "/ref/hg19").set("reads", "a.fq").set("output", "/out/s1.bam");

        assert_eq!(template.render(&bindings), "bowtie -p 4 /ref/hg19 a.fq > /out/s1.bam");
    }

    #[test]
    fn leaves_unknown_placeholders_and_shell_syntax() {
        let template = CommandTemplate::new("echo {nope} ${HOME} awk '{print $1}' {sample}");
        let bindings = TemplateBindings::new().set("sample", "S1");

        assert_eq!(template.render(&bindings), "echo {nope} ${HOME} awk '{print $1}' S1");
    }

    #[test]
    fn unterminated_brace_is_literal() {
        let template = CommandTemplate::new("echo {sample");
        assert_eq!(template.render(&TemplateBindings::new().set("sample", "S1")), "echo {sample");
    }
}
