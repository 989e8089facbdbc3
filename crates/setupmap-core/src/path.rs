//! Mapping paths
//!
//! `Setup:` is the root, children append `/label` followed by one `_index`
//! suffix per replica coordinate: `Setup:/PS_0/out`.

pub const SETUP_SEPARATOR: char = ':';
pub const PATH_SEPARATOR: char = '/';
pub const INDEX_SEPARATOR: char = '_';

pub fn root_path(setup: &str) -> String {
    format!("{}{}", setup, SETUP_SEPARATOR)
}

pub fn child_path(parent: &str, label: &str, coordinates: &[u32]) -> String {
    let mut path = String::with_capacity(parent.len() + label.len() + 1 + coordinates.len() * 3);
    path.push_str(parent);
    path.push(PATH_SEPARATOR);
    path.push_str(label);
    for coordinate in coordinates {
        path.push(INDEX_SEPARATOR);
        path.push_str(&coordinate.to_string());
    }
    path
}

/// Split a path into its setup name and its segments
pub fn split(path: &str) -> Option<(&str, Vec<&str>)> {
    let (setup, rest) = path.split_once(SETUP_SEPARATOR)?;
    if setup.is_empty() {
        return None;
    }
    if rest.is_empty() {
        return Some((setup, Vec::new()));
    }
    let rest = rest.strip_prefix(PATH_SEPARATOR)?;
    let segments: Vec<&str> = rest.split(PATH_SEPARATOR).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return None;
    }
    Some((setup, segments))
}

pub fn is_root(path: &str) -> bool {
    matches!(split(path), Some((_, segments)) if segments.is_empty())
}

/// Path one placement up, `None` for the root
pub fn parent_path(path: &str) -> Option<&str> {
    let (_, segments) = split(path)?;
    if segments.is_empty() {
        return None;
    }
    let cut = path.rfind(PATH_SEPARATOR)?;
    Some(&path[..cut])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_paths() {
        let root = root_path("Setup");
        assert_eq!(root, "Setup:");
        let ps = child_path(&root, "PS", &[0]);
        assert_eq!(ps, "Setup:/PS_0");
        assert_eq!(child_path(&ps, "out", &[]), "Setup:/PS_0/out");
        assert_eq!(child_path(&root, "M", &[2, 11]), "Setup:/M_2_11");
    }

    #[test]
    fn test_split() {
        assert_eq!(split("Setup:"), Some(("Setup", vec![])));
        assert_eq!(split("Setup:/PS_0/out"), Some(("Setup", vec!["PS_0", "out"])));
        assert_eq!(split("Setup:PS_0"), None);
        assert_eq!(split("Setup:/PS_0//out"), None);
        assert_eq!(split(":/PS_0"), None);
        assert_eq!(split("PS_0"), None);
    }

    #[test]
    fn test_parent_path() {
        assert!(is_root("Setup:"));
        assert!(!is_root("Setup:/PS_0"));
        assert_eq!(parent_path("Setup:/PS_0/out"), Some("Setup:/PS_0"));
        assert_eq!(parent_path("Setup:/PS_0"), Some("Setup:"));
        assert_eq!(parent_path("Setup:"), None);
    }
}
