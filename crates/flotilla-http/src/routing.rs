//! Path pattern matching and handler chain execution.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::context::HttpContext;
use crate::registry::HttpHandlerRegistry;

/// Normalizes a path for registration and matching: a leading `/` is
/// ensured and exactly one trailing `/` is stripped, except for the root.
pub(crate) fn normalize_path(path: &str) -> String {
    let mut normalized = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    if normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }
    normalized
}

/// Matches a request path against a registered pattern.
///
/// Patterns are compared segment by segment. A `{name}` segment matches
/// any single segment and captures it; a `*` as the final pattern segment
/// matches the rest of the path. Without a trailing wildcard the segment
/// counts must be equal. Literal segments compare case-sensitively.
///
/// Returns the captured path parameters on a match.
pub(crate) fn match_pattern(pattern: &str, path: &str) -> Option<HashMap<String, String>> {
    let pattern_parts: Vec<&str> = pattern.split('/').collect();
    let path_parts: Vec<&str> = path.split('/').collect();

    if !pattern.ends_with('*') && pattern_parts.len() != path_parts.len() {
        return None;
    }
    if path_parts.len() < pattern_parts.len() {
        return None;
    }

    let mut params = HashMap::new();
    // Index 0 is the empty segment before the leading slash.
    for index in 1..path_parts.len() {
        let Some(pattern_part) = pattern_parts.get(index) else {
            return None;
        };
        if *pattern_part == "*" && index == pattern_parts.len() - 1 {
            break;
        }
        if pattern_part.len() > 2 && pattern_part.starts_with('{') && pattern_part.ends_with('}') {
            let name = &pattern_part[1..pattern_part.len() - 1];
            params.insert(name.to_string(), path_parts[index].to_string());
            continue;
        }
        if *pattern_part != path_parts[index] {
            return None;
        }
    }
    Some(params)
}

/// Runs the handler chain for one request.
///
/// Walks the registry snapshot in registration order (already sorted by
/// ascending priority), skipping entries whose port filter does not match.
/// Each matching handler sees the captured path parameters merged into the
/// request before it runs. Handler errors are logged and do not stop the
/// chain; a handler that sets `cancel_next` does.
///
/// Returns true when at least one handler ran successfully.
pub(crate) async fn route_request(
    registry: &HttpHandlerRegistry,
    port: u16,
    path: &str,
    context: &mut HttpContext,
) -> bool {
    let normalized = normalize_path(path);
    let mut handled = false;

    for entry in registry.snapshot().iter() {
        if let Some(filter) = entry.port {
            if filter != port {
                continue;
            }
        }
        let Some(params) = match_pattern(&entry.path, &normalized) else {
            continue;
        };

        context.request.path_params.extend(params);
        debug!(pattern = %entry.path, handler = entry.type_name, "invoking http handler");
        match entry.handler.handle(&normalized, context).await {
            Ok(()) => {
                handled = true;
                context.last_handler = Some(entry.type_name);
            }
            Err(error) => {
                warn!(pattern = %entry.path, handler = entry.type_name, %error, "http handler failed");
            }
        }
        if context.cancel_next {
            break;
        }
    }
    handled
}
