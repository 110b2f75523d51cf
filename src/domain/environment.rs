use std::collections::HashMap;

use log::warn;

use super::model::EnvAssignment;

/// Turns the stored JSON object into environment assignments for the runtime.
///
/// Anything that is not a flat object of strings resolves to no assignment at all,
/// the deployment goes on without environment. Empty keys or values are skipped.
pub fn resolve(raw: Option<&str>) -> Vec<EnvAssignment> {
    let raw = match raw.map(str::trim) {
        Some(raw) if !raw.is_empty() => raw,
        _ => return vec![],
    };
    match serde_json::from_str::<HashMap<String, String>>(raw) {
        Ok(variables) => {
            let mut assignments: Vec<EnvAssignment> = variables
                .into_iter()
                .filter(|(key, value)| !key.is_empty() && !value.is_empty())
                .map(|(key, value)| EnvAssignment { key, value })
                .collect();
            assignments.sort_by(|a, b| a.key.cmp(&b.key));
            assignments
        }
        Err(e) => {
            warn!("Ignoring malformed environment variables: {}", e);
            vec![]
        }
    }
}
