//! Symbol name normalization

/// Namespace separator used in symbol names
pub const SEPARATOR: char = '\\';

/// Canonical index key: leading separator, lowercased.
///
/// `App\Models\User` and `\app\models\user` both become `\app\models\user`.
pub fn canonical_name(name: &str) -> String {
    let mut key = String::with_capacity(name.len() + 1);
    if !name.starts_with(SEPARATOR) {
        key.push(SEPARATOR);
    }
    key.push_str(name);
    key.to_lowercase()
}

/// Qualify a declared identifier with the namespace it was found in
pub fn qualified_name(namespace: Option<&str>, identifier: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{}{}{}", ns, SEPARATOR, identifier),
        _ => identifier.to_string(),
    }
}

/// Last path segment of a symbol name (`App\Models\User` -> `User`)
pub fn short_name(name: &str) -> &str {
    name.rsplit(SEPARATOR).next().unwrap_or(name)
}
