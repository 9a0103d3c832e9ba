// src/template.rs

//! `{name}` placeholder substitution for stage command lines.
//!
//! Shell expansions such as `${HOME}` are left alone. `{in:N}` refers to
//! the N-th resolved input of a job and is filled in at run time, after
//! the rest of the template was rendered at graph construction time.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::dag::JobValue;
use crate::errors::{JobError, NgsflowError, Result};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\$?)\{([A-Za-z_][A-Za-z0-9_.\-]*(?::[0-9]+)?)\}")
        .expect("placeholder regex is valid")
});

const INPUT_PREFIX: &str = "in:";

/// Render every placeholder from `vars`. Unknown names are an error.
pub fn render(template: &str, vars: &HashMap<String, String>) -> Result<String> {
    render_with(template, vars, false)
}

/// Like [`render`], but leaves `{in:N}` placeholders for
/// [`render_inputs`].
pub fn render_partial(template: &str, vars: &HashMap<String, String>) -> Result<String> {
    render_with(template, vars, true)
}

fn render_with(template: &str, vars: &HashMap<String, String>, keep_inputs: bool) -> Result<String> {
    let mut missing: Option<String> = None;

    let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures<'_>| {
        let whole = caps[0].to_string();
        if !caps[1].is_empty() {
            return whole;
        }
        let name = &caps[2];
        if keep_inputs && name.starts_with(INPUT_PREFIX) {
            return whole;
        }
        match vars.get(name) {
            Some(value) => value.clone(),
            None => {
                missing.get_or_insert_with(|| name.to_string());
                whole
            }
        }
    });

    match missing {
        Some(name) => Err(NgsflowError::Config(format!(
            "unknown placeholder {{{}}} in template `{}`",
            name, template
        ))),
        None => Ok(rendered.into_owned()),
    }
}

/// Substitute `{in:N}` placeholders with resolved job inputs.
///
/// Strings are inserted verbatim, arrays as space-separated items, other
/// values as JSON.
pub fn render_inputs(template: &str, inputs: &[JobValue]) -> std::result::Result<String, JobError> {
    let mut failure: Option<JobError> = None;

    let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures<'_>| {
        let whole = caps[0].to_string();
        if !caps[1].is_empty() {
            return whole;
        }
        let Some(index) = caps[2].strip_prefix(INPUT_PREFIX) else {
            return whole;
        };
        let Ok(index) = index.parse::<usize>() else {
            return whole;
        };
        match inputs.get(index) {
            Some(value) => value_to_arg(value),
            None => {
                failure.get_or_insert_with(|| JobError::Input {
                    index,
                    reason: format!("template refers to {{in:{}}} but job has {} inputs", index, inputs.len()),
                });
                whole
            }
        }
    });

    match failure {
        Some(err) => Err(err),
        None => Ok(rendered.into_owned()),
    }
}

fn value_to_arg(value: &JobValue) -> String {
    match value {
        JobValue::String(s) => s.clone(),
        JobValue::Null => String::new(),
        JobValue::Array(items) => items.iter().map(value_to_arg).collect::<Vec<_>>().join(" "),
        other => other.to_string(),
    }
}
