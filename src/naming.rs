use std::sync::LazyLock;

use regex::Regex;

use crate::openapi::Operation;

/// Trailing HTTP-method token appended by FastAPI's auto-generated
/// operation ids (`{verb}_{path_tokens}_{method}`).
static METHOD_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_(get|post|put|patch|delete|head|options)$").unwrap());

/// Verb prefixes recognized in operation ids. Compound prefixes sort first so
/// `batch_create` is tried before `create`.
static VERB_PREFIXES: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    let mut verbs = vec![
        "batch_create",
        "batch_update",
        "batch_delete",
        "batch_get",
        "bulk_create",
        "bulk_update",
        "bulk_delete",
        "create",
        "update",
        "delete",
        "remove",
        "patch",
        "list",
        "get",
        "read",
        "fetch",
        "find",
        "search",
        "query",
        "add",
        "set",
        "send",
        "upload",
        "download",
        "export",
        "import",
        "activate",
        "deactivate",
        "enable",
        "disable",
        "archive",
        "restore",
        "cancel",
        "approve",
        "reject",
        "publish",
        "assign",
        "verify",
        "validate",
        "refresh",
        "reset",
        "login",
        "logout",
        "register",
        "start",
        "stop",
        "sync",
    ];
    verbs.sort_by_key(|v| std::cmp::Reverse(v.len()));
    verbs
});

/// Derive the stable tool identifier for one (method, path, operation).
///
/// 1. A declared operationId free of internal redundancy is used verbatim.
/// 2. A FastAPI auto-generated id is reduced to `{resource}_{verb}`.
/// 3. Otherwise the identifier is composed from the path resource and a
///    method verb table.
pub fn tool_identifier(method: &str, path: &str, operation: &Operation) -> String {
    if let Some(id) = operation
        .operation_id
        .as_deref()
        .filter(|id| !id.is_empty())
    {
        let fastapi = METHOD_SUFFIX_RE.is_match(id);
        if !fastapi && !has_repeated_token(id) {
            return sanitize(id);
        }
        if fastapi && let Some(name) = from_fastapi_id(id, path) {
            return name;
        }
    }
    from_method_and_path(method, path)
}

/// A token appearing twice (e.g. `update_pet_pet`) marks a redundant id.
fn has_repeated_token(id: &str) -> bool {
    let tokens: Vec<&str> = id.split('_').filter(|t| !t.is_empty()).collect();
    for (i, token) in tokens.iter().enumerate() {
        if tokens[i + 1..].contains(token) {
            return true;
        }
    }
    false
}

/// Recover `{resource}_{verb}` from a FastAPI auto-generated operation id.
///
/// `create_pet_pets_post` -> strip `_post`, detect `create`, take `pets`
/// from the path -> `pets_create`. The path tokens embedded in the id (the
/// redundant resource suffix on the verb segment) are discarded along the way.
fn from_fastapi_id(id: &str, path: &str) -> Option<String> {
    let stripped = METHOD_SUFFIX_RE.replace(id, "");
    let verb = VERB_PREFIXES
        .iter()
        .find(|v| stripped.as_ref() == **v || stripped.starts_with(&format!("{v}_")))?;
    let resource = resource_from_path(path)?;
    Some(format!("{resource}_{verb}"))
}

/// Compose `{resource}_{verb}` from the path and a method verb table.
fn from_method_and_path(method: &str, path: &str) -> String {
    let resource = resource_from_path(path).unwrap_or_else(|| "root".to_string());
    let verb = verb_for_method(method, path);
    format!("{resource}_{verb}")
}

/// First path segment that is not a parameter placeholder, a version token,
/// or the literal `api` prefix.
pub fn resource_from_path(path: &str) -> Option<String> {
    path.split('/')
        .filter(|seg| !seg.is_empty())
        .find(|seg| {
            !seg.starts_with('{') && !is_version_token(seg) && !seg.eq_ignore_ascii_case("api")
        })
        .map(sanitize)
}

/// Version tokens are short segments like `v1`, `V2`, `12`.
fn is_version_token(seg: &str) -> bool {
    if seg.len() > 3 {
        return false;
    }
    let digits = seg
        .strip_prefix('v')
        .or_else(|| seg.strip_prefix('V'))
        .unwrap_or(seg);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

fn verb_for_method(method: &str, path: &str) -> &'static str {
    match method {
        "GET" => {
            if ends_with_parameter(path) {
                "get"
            } else {
                "list"
            }
        }
        "POST" => "create",
        "PUT" => "update",
        "PATCH" => "patch",
        "DELETE" => "delete",
        _ => "call",
    }
}

fn ends_with_parameter(path: &str) -> bool {
    path.trim_end_matches('/').ends_with('}')
}

/// Normalize an identifier to lowercase snake case.
fn sanitize<S: AsRef<str>>(raw: S) -> String {
    let mut out = String::with_capacity(raw.as_ref().len());
    for c in raw.as_ref().chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
        } else if c == '_' || c == '-' || c == '.' {
            if !out.ends_with('_') {
                out.push('_');
            }
        }
    }
    out.trim_matches('_').to_string()
}

/// Map an app name to PascalCase: split on `-`, `_`, `.`, capitalize each
/// part, concatenate. Used to label the served app.
pub fn pascal_case(name: &str) -> String {
    name.split(['-', '_', '.'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}
