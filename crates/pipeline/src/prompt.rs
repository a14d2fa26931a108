//! Prompt templates with `{name}` placeholders.
//!
//! `{{` and `}}` produce literal braces. A placeholder with no bound value
//! renders as the empty string: a template that mentions an unknown or
//! unavailable variable degrades, it never fails a run.

use std::collections::HashMap;

/// Variable bindings for one template rendering.
#[derive(Debug, Clone, Default)]
pub struct PromptVars<'a> {
    values: HashMap<&'a str, &'a str>,
}

impl<'a> PromptVars<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` to `value`, replacing any earlier binding.
    pub fn set(&mut self, name: &'a str, value: &'a str) -> &mut Self {
        self.values.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&'a str> {
        self.values.get(name).copied()
    }
}

/// Renders `template` against `vars`.
pub fn render(template: &str, vars: &PromptVars<'_>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match c {
            '{' if matches!(chars.peek(), Some((_, '{'))) => {
                chars.next();
                out.push('{');
            }
            '}' if matches!(chars.peek(), Some((_, '}'))) => {
                chars.next();
                out.push('}');
            }
            '{' => match template[i + 1..].find('}') {
                Some(len) => {
                    let name = template[i + 1..i + 1 + len].trim();
                    out.push_str(vars.get(name).unwrap_or_default());
                    // Skip past the closing brace.
                    for (j, _) in chars.by_ref() {
                        if j == i + 1 + len {
                            break;
                        }
                    }
                }
                None => out.push('{'),
            },
            _ => out.push(c),
        }
    }
    out
}
