//! Member-name sanitization.
//!
//! Externally supplied paths (device paths, NTFS paths, URLs) are normalized
//! into safe archive member names so the container stays usable by fragile
//! extraction tools.  Names are forward-slash separated, relative, and can
//! never escape the archive root.

/// Normalize an externally supplied path into a safe member name.
///
/// Splits on both `/` and `\`, drops `.`, `..` and empty components, strips
/// unsafe characters from each remaining component and rejoins with `/`.
/// The result is never empty and never starts with `/`.
pub fn sanitize_name(store_as_name: &str) -> String {
    // Strip first, then drop: a component like "?.." must not survive as
    // a traversal component once its unsafe characters are removed.
    let components: Vec<String> = store_as_name
        .split(['/', '\\'])
        .map(sanitize_component)
        .filter(|c| !matches!(c.as_str(), "" | "." | ".."))
        .collect();

    if components.is_empty() {
        return "_".to_string();
    }
    components.join("/")
}

fn sanitize_component(component: &str) -> String {
    component.chars().filter(|c| !matches!(c, ':' | '?')).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn strips_traversal_and_unsafe_chars() {
        assert_eq!(sanitize_name("a/../b:c?.txt"), "a/bc.txt");
    }

    #[test]
    fn windows_device_path() {
        assert_eq!(
            sanitize_name("\\\\.\\C:\\Windows\\System32\\config\\SAM"),
            "C/Windows/System32/config/SAM"
        );
    }

    #[test]
    fn never_absolute() {
        assert_eq!(sanitize_name("/etc/passwd"), "etc/passwd");
        assert_eq!(sanitize_name("//host/share"), "host/share");
    }

    #[test]
    fn never_empty() {
        assert_eq!(sanitize_name(""), "_");
        assert_eq!(sanitize_name("../.."), "_");
        assert_eq!(sanitize_name("::"), "_");
    }

    proptest! {
        #[test]
        fn output_is_always_safe(input in ".{0,64}") {
            let name = sanitize_name(&input);
            prop_assert!(!name.is_empty());
            prop_assert!(!name.starts_with('/'));
            prop_assert!(!name.contains('\\'));
            prop_assert!(!name.contains(':'));
            prop_assert!(!name.contains('?'));
            prop_assert!(name.split('/').all(|c| c != ".." && c != "." && !c.is_empty()));
        }
    }
}
